//! Sub-transaction fetcher: one request/response exchange per counterparty.

use std::time::Duration;

use clearhouse_types::{Result, SettlementStep, SignedTransaction, UnverifiedFragment};

use crate::session::{CounterpartySession, SessionMessage, receive_message, send_message, unexpected};

/// Asks a counterparty for its leg of the joint transaction.
#[derive(Debug, Clone, Copy)]
pub struct SubTransactionFetcher {
    timeout: Duration,
}

impl SubTransactionFetcher {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Send `provisional` and wait for exactly one `Fragment` reply.
    ///
    /// # Errors
    /// - `SessionTimeout` if the counterparty does not answer in time
    /// - `MalformedReply` if the reply does not decode or is not a fragment
    /// - `SessionClosed` if the channel closes first
    pub async fn fetch(
        &self,
        session: &mut dyn CounterpartySession,
        provisional: &SignedTransaction,
    ) -> Result<UnverifiedFragment> {
        const STEP: SettlementStep = SettlementStep::FetchingFragments;
        send_message(session, STEP, &SessionMessage::Proposal(provisional.clone())).await?;
        match receive_message(session, STEP, self.timeout).await? {
            SessionMessage::Fragment(fragment) => {
                tracing::debug!(
                    counterparty = %session.counterparty(),
                    fragment = %fragment.id(),
                    "fragment received"
                );
                Ok(UnverifiedFragment::new(fragment))
            }
            other => Err(unexpected(session, STEP, "Fragment", &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use clearhouse_types::{ClearingError, KeyPair, Party, PartyKey, TransactionBuilder};

    use super::*;
    use crate::channel::ChannelSession;

    fn pair() -> (ChannelSession, ChannelSession) {
        let ch = Party::from_keypair("CH", &KeyPair::from_seed(&[1; 32]));
        let seller = Party::from_keypair("Seller", &KeyPair::from_seed(&[2; 32]));
        ChannelSession::pair(ch, seller)
    }

    fn provisional() -> SignedTransaction {
        TransactionBuilder::new(PartyKey([9; 32])).sign_initial(&KeyPair::from_seed(&[1; 32]))
    }

    #[tokio::test]
    async fn fragment_reply_accepted() {
        let (mut ours, mut theirs) = pair();
        let reply = provisional();
        let expected = reply.id();
        tokio::spawn(async move {
            let _ = receive_message(&mut theirs, SettlementStep::FetchingFragments, Duration::from_secs(1)).await;
            send_message(&mut theirs, SettlementStep::FetchingFragments, &SessionMessage::Fragment(reply))
                .await
                .unwrap();
        });
        let fetcher = SubTransactionFetcher::new(Duration::from_secs(1));
        let fragment = fetcher.fetch(&mut ours, &provisional()).await.unwrap();
        assert_eq!(fragment.id(), expected);
    }

    #[tokio::test]
    async fn silence_times_out() {
        let (mut ours, _theirs) = pair();
        let fetcher = SubTransactionFetcher::new(Duration::from_millis(20));
        let err = fetcher.fetch(&mut ours, &provisional()).await.unwrap_err();
        assert!(matches!(
            err,
            ClearingError::SessionTimeout { step: SettlementStep::FetchingFragments, ref counterparty } if counterparty == "Seller"
        ));
    }

    #[tokio::test]
    async fn reject_is_declined_not_empty() {
        let (mut ours, mut theirs) = pair();
        tokio::spawn(async move {
            let _ = theirs.receive_bytes().await;
            let reject = SessionMessage::Reject { reason: "no holding".into() };
            theirs.send_bytes(reject.encode().unwrap()).await.unwrap();
        });
        let fetcher = SubTransactionFetcher::new(Duration::from_secs(1));
        let err = fetcher.fetch(&mut ours, &provisional()).await.unwrap_err();
        assert!(matches!(
            err,
            ClearingError::CounterpartyDeclined { step: SettlementStep::FetchingFragments, ref reason, .. }
                if reason == "no holding"
        ));
    }
}
