//! Progress reporting for settlement runs.

use clearhouse_types::{ClearingError, CommittedTransaction, RecordId, SettlementStep};
use parking_lot::Mutex;

/// Receives every step change of every settlement run.
pub trait ProgressObserver: Send + Sync {
    /// `from` is `None` for the first step of a run.
    fn on_transition(&self, record: RecordId, from: Option<SettlementStep>, to: SettlementStep);

    /// The run stopped at `step` because of `error`.
    fn on_abort(&self, record: RecordId, step: SettlementStep, error: &ClearingError);

    fn on_committed(&self, record: RecordId, committed: &CommittedTransaction);
}

/// Logs progress with `tracing`. The default observer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn on_transition(&self, record: RecordId, from: Option<SettlementStep>, to: SettlementStep) {
        let from = from.map_or_else(|| "-".to_string(), |s| s.to_string());
        tracing::info!(
            %record,
            %from,
            step = %to,
            "{}",
            to.label()
        );
    }

    fn on_abort(&self, record: RecordId, step: SettlementStep, error: &ClearingError) {
        tracing::warn!(%record, %step, %error, "settlement aborted");
    }

    fn on_committed(&self, record: RecordId, committed: &CommittedTransaction) {
        tracing::info!(%record, tx = %committed.id(), "settlement committed");
    }
}

/// One observed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Transition {
        record: RecordId,
        from: Option<SettlementStep>,
        to: SettlementStep,
    },
    Aborted {
        record: RecordId,
        step: SettlementStep,
        error: String,
    },
    Committed {
        record: RecordId,
        tx: clearhouse_types::TxId,
    },
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingObserver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    /// Steps entered by `record`, in order.
    #[must_use]
    pub fn steps(&self, record: RecordId) -> Vec<SettlementStep> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Transition { record: r, to, .. } if *r == record => Some(*to),
                _ => None,
            })
            .collect()
    }
}

impl ProgressObserver for RecordingObserver {
    fn on_transition(&self, record: RecordId, from: Option<SettlementStep>, to: SettlementStep) {
        self.events
            .lock()
            .push(ProgressEvent::Transition { record, from, to });
    }

    fn on_abort(&self, record: RecordId, step: SettlementStep, error: &ClearingError) {
        self.events.lock().push(ProgressEvent::Aborted {
            record,
            step,
            error: error.to_string(),
        });
    }

    fn on_committed(&self, record: RecordId, committed: &CommittedTransaction) {
        self.events.lock().push(ProgressEvent::Committed {
            record,
            tx: committed.id(),
        });
    }
}
