//! Signature collection from the counterparties owning the remaining keys.

use std::time::Duration;

use clearhouse_types::{
    ClearingError, PartyKey, Result, SettlementStep, SignedTransaction, TransactionSignature,
};
use futures::future::join_all;

use crate::{
    identity::IdentityService,
    session::{BoxedSession, CounterpartySession, SessionMessage, receive_message, send_message},
};

const STEP: SettlementStep = SettlementStep::Collecting;

/// Gathers the signatures a merged transaction still lacks.
#[derive(Debug, Clone, Copy)]
pub struct SignatureCollector {
    timeout: Duration,
    parallel: bool,
}

impl SignatureCollector {
    #[must_use]
    pub fn new(timeout: Duration, parallel: bool) -> Self {
        Self { timeout, parallel }
    }

    /// Request, verify and attach every missing required signature except
    /// those of `authority_keys`, which the ordering authority adds itself.
    ///
    /// # Errors
    /// Returns [`ClearingError::MissingSignature`] naming the signer if a
    /// key has no reachable owner, its owner does not answer in time, or
    /// the returned signature does not match the transaction.
    /// Returns [`ClearingError::CounterpartyDeclined`] if the owner refuses
    /// to sign.
    pub async fn collect(
        &self,
        stx: SignedTransaction,
        sessions: &mut [BoxedSession],
        identities: &IdentityService,
        authority_keys: &[PartyKey],
    ) -> Result<SignedTransaction> {
        stx.verify_signatures()?;

        let mut wanted: Vec<Vec<PartyKey>> = vec![Vec::new(); sessions.len()];
        for key in stx.missing_signers(authority_keys) {
            let owner = identities
                .well_known_for(&key)
                .ok_or_else(|| ClearingError::MissingSignature {
                    signer: key,
                    reason: "no known owner for this key".into(),
                })?;
            let index = sessions
                .iter()
                .position(|s| s.counterparty().key == owner.key)
                .ok_or_else(|| ClearingError::MissingSignature {
                    signer: key,
                    reason: format!("no open session with {owner}"),
                })?;
            wanted[index].push(key);
        }

        let requests = sessions
            .iter_mut()
            .zip(wanted.iter())
            .filter(|(_, keys)| !keys.is_empty());
        let replies = if self.parallel {
            join_all(requests.map(|(session, keys)| self.request(&mut **session, &stx, keys))).await
        } else {
            let mut replies = Vec::new();
            for (session, keys) in requests {
                replies.push(self.request(&mut **session, &stx, keys).await);
            }
            replies
        };

        let mut signed = stx;
        for reply in replies {
            for signature in reply? {
                signed = signed.with_signature(signature);
            }
        }
        signed.verify_required(authority_keys)?;
        tracing::debug!(
            tx = %signed.id(),
            signatures = signed.signatures.len(),
            "signatures collected"
        );
        Ok(signed)
    }

    async fn request(
        &self,
        session: &mut dyn CounterpartySession,
        stx: &SignedTransaction,
        wanted: &[PartyKey],
    ) -> Result<Vec<TransactionSignature>> {
        let Some(&first) = wanted.first() else {
            return Ok(Vec::new());
        };
        let missing = |reason: String| ClearingError::MissingSignature {
            signer: first,
            reason,
        };

        send_message(session, STEP, &SessionMessage::SignatureRequest(stx.clone()))
            .await
            .map_err(|e| missing(e.to_string()))?;
        let signatures = match receive_message(session, STEP, self.timeout)
            .await
            .map_err(|e| missing(e.to_string()))?
        {
            SessionMessage::Signatures(signatures) => signatures,
            SessionMessage::Reject { reason } => {
                return Err(ClearingError::CounterpartyDeclined {
                    step: STEP,
                    counterparty: session.counterparty().name.clone(),
                    reason,
                });
            }
            other => return Err(missing(format!("expected Signatures, got {}", other.kind()))),
        };

        let id = stx.id();
        let mut accepted = Vec::with_capacity(wanted.len());
        for key in wanted {
            let signature = signatures.iter().find(|s| s.by == *key).ok_or_else(|| {
                ClearingError::MissingSignature {
                    signer: *key,
                    reason: format!("{} returned no signature for this key", session.counterparty()),
                }
            })?;
            if !signature.verifies(&id) {
                return Err(ClearingError::MissingSignature {
                    signer: *key,
                    reason: format!("signature does not match {id}"),
                });
            }
            accepted.push(signature.clone());
        }
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use clearhouse_types::{Command, CommandKind, KeyPair, Party, TransactionBuilder};

    use super::*;
    use crate::channel::ChannelSession;

    const NOTARY: PartyKey = PartyKey([9; 32]);

    /// Answers every signature request by signing with `keys`, optionally
    /// over the wrong bytes.
    async fn signer(mut session: ChannelSession, keys: KeyPair, corrupt: bool) {
        while let Ok(SessionMessage::SignatureRequest(stx)) =
            receive_message(&mut session, STEP, Duration::from_secs(1)).await
        {
            let id = if corrupt {
                clearhouse_types::TxId([0; 32])
            } else {
                stx.id()
            };
            let reply = SessionMessage::Signatures(vec![keys.sign(&id)]);
            if send_message(&mut session, STEP, &reply).await.is_err() {
                break;
            }
        }
    }

    struct Fixture {
        ch: KeyPair,
        identities: IdentityService,
        stx: SignedTransaction,
        sessions: Vec<BoxedSession>,
        seller: PartyKey,
    }

    fn fixture(corrupt_buyer: bool) -> Fixture {
        let ch = KeyPair::from_seed(&[1; 32]);
        let seller_keys = KeyPair::from_seed(&[2; 32]);
        let buyer_keys = KeyPair::from_seed(&[3; 32]);
        let ch_party = Party::from_keypair("CH", &ch);
        let seller = Party::from_keypair("Seller", &seller_keys);
        let buyer = Party::from_keypair("Buyer", &buyer_keys);

        let identities = IdentityService::new();
        identities.register_party(seller.clone(), "seller");
        identities.register_party(buyer.clone(), "buyer");

        let mut builder = TransactionBuilder::new(NOTARY);
        builder.add_command(Command::new(
            CommandKind::SettleRequest,
            vec![buyer.key, seller.key, ch.public_key(), NOTARY],
        ));
        let stx = builder.sign_initial(&ch);

        let (s_ours, s_theirs) = ChannelSession::pair(ch_party.clone(), seller.clone());
        let (b_ours, b_theirs) = ChannelSession::pair(ch_party, buyer);
        tokio::spawn(signer(s_theirs, seller_keys, false));
        tokio::spawn(signer(b_theirs, buyer_keys, corrupt_buyer));

        Fixture {
            ch,
            identities,
            stx,
            sessions: vec![Box::new(s_ours), Box::new(b_ours)],
            seller: seller.key,
        }
    }

    #[tokio::test]
    async fn collects_from_both_sessions() {
        for parallel in [true, false] {
            let mut f = fixture(false);
            let collector = SignatureCollector::new(Duration::from_secs(1), parallel);
            let signed = collector
                .collect(f.stx, &mut f.sessions, &f.identities, &[NOTARY])
                .await
                .unwrap();
            assert_eq!(signed.signatures.len(), 3);
            assert!(signed.signed_by().contains(&f.ch.public_key()));
            assert!(signed.verify_required(&[NOTARY]).is_ok());
        }
    }

    #[tokio::test]
    async fn bad_signature_names_signer() {
        let mut f = fixture(true);
        let buyer = KeyPair::from_seed(&[3; 32]).public_key();
        let collector = SignatureCollector::new(Duration::from_secs(1), true);
        let err = collector
            .collect(f.stx, &mut f.sessions, &f.identities, &[NOTARY])
            .await
            .unwrap_err();
        assert!(matches!(err, ClearingError::MissingSignature { signer, .. } if signer == buyer));
    }

    #[tokio::test]
    async fn unknown_owner_is_missing_signature() {
        let mut f = fixture(false);
        let stranger = PartyKey([42; 32]);
        let mut builder = TransactionBuilder::new(NOTARY);
        builder.add_command(Command::new(CommandKind::MoveAsset, vec![f.seller, stranger]));
        let stx = builder.sign_initial(&f.ch);
        let collector = SignatureCollector::new(Duration::from_secs(1), false);
        let err = collector
            .collect(stx, &mut f.sessions, &f.identities, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ClearingError::MissingSignature { signer, .. } if signer == stranger));
    }

    struct Mute(Party);

    #[async_trait]
    impl CounterpartySession for Mute {
        fn counterparty(&self) -> &Party {
            &self.0
        }

        async fn send_bytes(&mut self, _: Vec<u8>) -> std::result::Result<(), crate::session::ChannelClosed> {
            Ok(())
        }

        async fn receive_bytes(&mut self) -> Option<Vec<u8>> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn silent_counterparty_times_out_as_missing_signature() {
        let ch = KeyPair::from_seed(&[1; 32]);
        let seller = Party::from_keypair("Seller", &KeyPair::from_seed(&[2; 32]));
        let identities = IdentityService::new();
        identities.register_party(seller.clone(), "seller");
        let mut builder = TransactionBuilder::new(NOTARY);
        builder.add_command(Command::new(CommandKind::MoveAsset, vec![seller.key]));
        let stx = builder.sign_initial(&ch);
        let mut sessions: Vec<BoxedSession> = vec![Box::new(Mute(seller.clone()))];

        let collector = SignatureCollector::new(Duration::from_millis(20), true);
        let err = collector
            .collect(stx, &mut sessions, &identities, &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClearingError::MissingSignature { signer, ref reason } if signer == seller.key && reason.contains("CH_ERR_200")
        ));
    }

    #[tokio::test]
    async fn refusal_is_declined_not_missing() {
        let ch = KeyPair::from_seed(&[1; 32]);
        let ch_party = Party::from_keypair("CH", &ch);
        let seller = Party::from_keypair("Seller", &KeyPair::from_seed(&[2; 32]));
        let identities = IdentityService::new();
        identities.register_party(seller.clone(), "seller");
        let mut builder = TransactionBuilder::new(NOTARY);
        builder.add_command(Command::new(CommandKind::MoveAsset, vec![seller.key]));
        let stx = builder.sign_initial(&ch);

        let (ours, mut theirs) = ChannelSession::pair(ch_party, seller);
        tokio::spawn(async move {
            let _ = receive_message(&mut theirs, STEP, Duration::from_secs(1)).await;
            let reject = SessionMessage::Reject {
                reason: "leg missing".into(),
            };
            let _ = send_message(&mut theirs, STEP, &reject).await;
        });
        let mut sessions: Vec<BoxedSession> = vec![Box::new(ours)];

        let err = SignatureCollector::new(Duration::from_secs(1), false)
            .collect(stx, &mut sessions, &identities, &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClearingError::CounterpartyDeclined { step: SettlementStep::Collecting, ref counterparty, ref reason }
                if counterparty == "Seller" && reason == "leg missing"
        ));
    }
}
