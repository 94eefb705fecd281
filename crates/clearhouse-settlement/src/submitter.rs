//! Hands a fully signed transaction to the ordering authority.

use std::time::Duration;

use async_trait::async_trait;
use clearhouse_types::{
    ClearingError, CommittedTransaction, PartyKey, Result, SettlementStep, SignedTransaction,
};

/// The authority's verdict on one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed(CommittedTransaction),
    Rejected { reason: String },
}

/// Orders transactions and refuses double-spends. Also known as the notary.
#[async_trait]
pub trait OrderingAuthority: Send + Sync {
    /// Key the authority signs committed transactions with.
    fn notary(&self) -> PartyKey;

    /// Verify, order and durably record `stx`.
    async fn submit(&self, stx: SignedTransaction) -> CommitOutcome;
}

/// Bounded, single-shot submission. Never retries.
#[derive(Debug, Clone, Copy)]
pub struct CommitSubmitter {
    timeout: Duration,
}

impl CommitSubmitter {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// # Errors
    /// - `CommitRejected` if the authority refuses the transaction
    /// - `SessionTimeout` at COMMITTING if no verdict arrives in time
    pub async fn submit(
        &self,
        authority: &dyn OrderingAuthority,
        stx: SignedTransaction,
    ) -> Result<CommittedTransaction> {
        let id = stx.id();
        let outcome = tokio::time::timeout(self.timeout, authority.submit(stx))
            .await
            .map_err(|_| ClearingError::SessionTimeout {
                step: SettlementStep::Committing,
                counterparty: "ordering authority".into(),
            })?;
        match outcome {
            CommitOutcome::Committed(committed) => {
                tracing::info!(tx = %id, "transaction committed");
                Ok(committed)
            }
            CommitOutcome::Rejected { reason } => {
                tracing::warn!(tx = %id, %reason, "commit rejected");
                Err(ClearingError::CommitRejected { reason })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use clearhouse_types::{KeyPair, TransactionBuilder};

    use super::*;

    enum Verdict {
        Accept,
        Refuse,
        Hang,
    }

    struct Scripted(Verdict);

    #[async_trait]
    impl OrderingAuthority for Scripted {
        fn notary(&self) -> PartyKey {
            PartyKey([9; 32])
        }

        async fn submit(&self, stx: SignedTransaction) -> CommitOutcome {
            match self.0 {
                Verdict::Accept => CommitOutcome::Committed(CommittedTransaction {
                    tx: stx,
                    committed_at: Utc::now(),
                }),
                Verdict::Refuse => CommitOutcome::Rejected {
                    reason: "input already consumed".into(),
                },
                Verdict::Hang => std::future::pending().await,
            }
        }
    }

    fn stx() -> SignedTransaction {
        TransactionBuilder::new(PartyKey([9; 32])).sign_initial(&KeyPair::from_seed(&[1; 32]))
    }

    #[tokio::test]
    async fn committed_passes_through() {
        let submitter = CommitSubmitter::new(Duration::from_secs(1));
        let tx = stx();
        let committed = submitter.submit(&Scripted(Verdict::Accept), tx.clone()).await.unwrap();
        assert_eq!(committed.id(), tx.id());
    }

    #[tokio::test]
    async fn rejection_surfaces_reason() {
        let submitter = CommitSubmitter::new(Duration::from_secs(1));
        let err = submitter.submit(&Scripted(Verdict::Refuse), stx()).await.unwrap_err();
        assert!(matches!(err, ClearingError::CommitRejected { ref reason } if reason.contains("consumed")));
    }

    #[tokio::test]
    async fn silence_times_out_at_committing() {
        let submitter = CommitSubmitter::new(Duration::from_millis(20));
        let err = submitter.submit(&Scripted(Verdict::Hang), stx()).await.unwrap_err();
        assert!(matches!(
            err,
            ClearingError::SessionTimeout {
                step: SettlementStep::Committing,
                ..
            }
        ));
    }
}
