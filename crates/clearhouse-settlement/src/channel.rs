//! In-process session transport over `tokio::mpsc` channels.
//!
//! Each registered address is served by a [`Responder`]. Opening a session
//! creates a fresh pair of channels and spawns the responder on the far
//! end, so concurrent settlements against the same counterparty each get
//! their own session.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use clearhouse_types::{ClearingError, Endpoint, Party, Result, constants};
use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::session::{BoxedSession, ChannelClosed, CounterpartySession, SessionTransport};

/// The counterparty side of the protocol, started once per opened session.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, session: BoxedSession) -> Result<()>;
}

/// One end of an in-process session.
pub struct ChannelSession {
    counterparty: Party,
    outbound: mpsc::Sender<Vec<u8>>,
    inbound: mpsc::Receiver<Vec<u8>>,
}

impl ChannelSession {
    /// Two connected ends: the first talks to `b`, the second to `a`.
    #[must_use]
    pub fn pair(a: Party, b: Party) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel(constants::SESSION_CHANNEL_CAPACITY);
        let (b_tx, a_rx) = mpsc::channel(constants::SESSION_CHANNEL_CAPACITY);
        let a_end = Self {
            counterparty: b,
            outbound: a_tx,
            inbound: a_rx,
        };
        let b_end = Self {
            counterparty: a,
            outbound: b_tx,
            inbound: b_rx,
        };
        (a_end, b_end)
    }
}

#[async_trait]
impl CounterpartySession for ChannelSession {
    fn counterparty(&self) -> &Party {
        &self.counterparty
    }

    async fn send_bytes(&mut self, payload: Vec<u8>) -> std::result::Result<(), ChannelClosed> {
        self.outbound.send(payload).await.map_err(|_| ChannelClosed)
    }

    async fn receive_bytes(&mut self) -> Option<Vec<u8>> {
        self.inbound.recv().await
    }
}

/// Session transport for parties living in the same process.
pub struct ChannelTransport {
    local: Party,
    responders: RwLock<HashMap<String, Arc<dyn Responder>>>,
    opened: AtomicUsize,
}

impl ChannelTransport {
    /// Transport that opens sessions on behalf of `local`.
    #[must_use]
    pub fn new(local: Party) -> Self {
        Self {
            local,
            responders: RwLock::new(HashMap::new()),
            opened: AtomicUsize::new(0),
        }
    }

    /// Serve `address` with `responder`. Replaces any earlier registration.
    pub fn register(&self, address: impl Into<String>, responder: Arc<dyn Responder>) {
        self.responders.write().insert(address.into(), responder);
    }

    /// Number of sessions opened so far.
    #[must_use]
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SessionTransport for ChannelTransport {
    async fn open(&self, endpoint: &Endpoint) -> Result<BoxedSession> {
        let responder = self
            .responders
            .read()
            .get(&endpoint.address)
            .cloned()
            .ok_or_else(|| ClearingError::UnresolvedIdentity {
                key: endpoint.party.key,
                reason: format!("no route to {} at {}", endpoint.party, endpoint.address),
            })?;

        let (ours, theirs) = ChannelSession::pair(self.local.clone(), endpoint.party.clone());
        self.opened.fetch_add(1, Ordering::Relaxed);

        let counterparty = endpoint.party.name.clone();
        tokio::spawn(async move {
            if let Err(e) = responder.respond(Box::new(theirs)).await {
                tracing::warn!(counterparty = %counterparty, error = %e, "responder ended with error");
            }
        });

        tracing::debug!(counterparty = %endpoint.party, address = %endpoint.address, "session opened");
        Ok(Box::new(ours))
    }
}
