//! Identity reconciliation: mapping confidential keys to well-known parties.
//!
//! The [`IdentityService`] is a node's local view of the network map plus
//! the confidential identities it holds certificates for. The
//! [`IdentitySynchronizer`] makes the clearing house and both
//! counterparties agree on that view for every key a merged transaction
//! references. The mapping itself never enters the transaction.

use std::{
    collections::{BTreeSet, HashMap},
    time::Duration,
};

use clearhouse_types::{
    AbstractParty, ClearingError, Endpoint, IdentityCertificate, Party, PartyKey, Result,
    SettlementStep, WireTransaction,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::session::{BoxedSession, SessionMessage, receive_message, send_message, unexpected};

/// One resolved key: `key` belongs to the party owning `well_known`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IdentityMapping {
    pub key: PartyKey,
    pub well_known: PartyKey,
}

#[derive(Default)]
struct IdentityTables {
    parties: HashMap<PartyKey, Endpoint>,
    confidential: HashMap<PartyKey, IdentityCertificate>,
}

/// A node's identity store. Cheap to share behind an `Arc`.
#[derive(Default)]
pub struct IdentityService {
    tables: RwLock<IdentityTables>,
}

impl IdentityService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a network map entry for `party`.
    pub fn register_party(&self, party: Party, address: impl Into<String>) {
        let endpoint = Endpoint {
            address: address.into(),
            party,
        };
        self.tables.write().parties.insert(endpoint.party.key, endpoint);
    }

    /// Store a confidential mapping after checking its proof.
    ///
    /// # Errors
    /// Returns [`ClearingError::InvalidCertificate`] if the certificate does
    /// not verify.
    pub fn register_confidential(&self, certificate: IdentityCertificate) -> Result<()> {
        if !certificate.verify() {
            return Err(ClearingError::InvalidCertificate {
                key: certificate.anonymous,
            });
        }
        self.tables
            .write()
            .confidential
            .insert(certificate.anonymous, certificate);
        Ok(())
    }

    /// The well-known party behind `key`, if known. A well-known key maps to itself.
    #[must_use]
    pub fn well_known_for(&self, key: &PartyKey) -> Option<Party> {
        let tables = self.tables.read();
        if let Some(endpoint) = tables.parties.get(key) {
            return Some(endpoint.party.clone());
        }
        tables
            .confidential
            .get(key)
            .map(|cert| cert.well_known.clone())
    }

    #[must_use]
    pub fn certificate_for(&self, key: &PartyKey) -> Option<IdentityCertificate> {
        self.tables.read().confidential.get(key).cloned()
    }

    /// Network endpoint of the party behind `party`.
    ///
    /// # Errors
    /// Returns [`ClearingError::UnresolvedIdentity`] if the key is unknown
    /// or its well-known party has no network map entry.
    pub fn resolve(&self, party: &AbstractParty) -> Result<Endpoint> {
        let key = party.owning_key();
        let well_known = self
            .well_known_for(&key)
            .ok_or_else(|| ClearingError::UnresolvedIdentity {
                key,
                reason: "no well-known party for key".into(),
            })?;
        self.tables
            .read()
            .parties
            .get(&well_known.key)
            .cloned()
            .ok_or_else(|| ClearingError::UnresolvedIdentity {
                key,
                reason: format!("{well_known} is not on the network map"),
            })
    }

    /// Sorted mappings for every key in `keys` this service can resolve.
    #[must_use]
    pub fn mapping_for<'a>(&self, keys: impl IntoIterator<Item = &'a PartyKey>) -> Vec<IdentityMapping> {
        let mut mappings: Vec<IdentityMapping> = keys
            .into_iter()
            .filter_map(|key| {
                self.well_known_for(key).map(|party| IdentityMapping {
                    key: *key,
                    well_known: party.key,
                })
            })
            .collect();
        mappings.sort();
        mappings.dedup();
        mappings
    }

    /// Certificates held for any of `keys`.
    #[must_use]
    pub fn certificates_for<'a>(
        &self,
        keys: impl IntoIterator<Item = &'a PartyKey>,
    ) -> Vec<IdentityCertificate> {
        let tables = self.tables.read();
        keys.into_iter()
            .filter_map(|key| tables.confidential.get(key).cloned())
            .collect()
    }

    /// Register every certificate in `offered`; the first invalid one aborts.
    ///
    /// # Errors
    /// Returns [`ClearingError::InvalidCertificate`] for a certificate that
    /// does not verify.
    pub fn absorb(&self, offered: Vec<IdentityCertificate>) -> Result<()> {
        for certificate in offered {
            self.register_confidential(certificate)?;
        }
        Ok(())
    }
}

/// Drives the two-phase identity exchange with every open session.
///
/// 1. `IdentitySync { keys, offered }` → `IdentityOffer { offered }`:
///    each side learns certificates it lacked. Afterwards every key must
///    resolve locally.
/// 2. `IdentityConfirm { offered }` → `IdentityReport { resolved }`: each
///    counterparty reports its mapping, which must equal ours.
pub struct IdentitySynchronizer {
    timeout: Duration,
}

impl IdentitySynchronizer {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Reconcile identities for every key referenced by `tx`.
    ///
    /// # Errors
    /// - `UnresolvedIdentity` if a key cannot be resolved or a counterparty
    ///   reports a different mapping
    /// - `InvalidCertificate` if a counterparty offers a bad certificate
    /// - session errors from the exchange itself
    pub async fn synchronize(
        &self,
        identities: &IdentityService,
        tx: &WireTransaction,
        sessions: &mut [BoxedSession],
    ) -> Result<Vec<IdentityMapping>> {
        const STEP: SettlementStep = SettlementStep::SynchronizingIdentities;
        let keys: Vec<PartyKey> = tx.referenced_keys().into_iter().collect();

        for session in sessions.iter_mut() {
            let request = SessionMessage::IdentitySync {
                keys: keys.clone(),
                offered: identities.certificates_for(&keys),
            };
            send_message(&mut **session, STEP, &request).await?;
            match receive_message(&mut **session, STEP, self.timeout).await? {
                SessionMessage::IdentityOffer { offered } => identities.absorb(offered)?,
                other => return Err(unexpected(&**session, STEP, "IdentityOffer", &other)),
            }
        }

        let ours = identities.mapping_for(&keys);
        let resolved: BTreeSet<PartyKey> = ours.iter().map(|m| m.key).collect();
        if let Some(key) = keys.iter().find(|k| !resolved.contains(k)) {
            return Err(ClearingError::UnresolvedIdentity {
                key: *key,
                reason: "no counterparty could vouch for this key".into(),
            });
        }

        let everything = identities.certificates_for(&keys);
        for session in sessions.iter_mut() {
            let confirm = SessionMessage::IdentityConfirm {
                offered: everything.clone(),
            };
            send_message(&mut **session, STEP, &confirm).await?;
            let theirs = match receive_message(&mut **session, STEP, self.timeout).await? {
                SessionMessage::IdentityReport { resolved } => resolved,
                other => return Err(unexpected(&**session, STEP, "IdentityReport", &other)),
            };
            if let Some(key) = first_disagreement(&ours, &theirs) {
                return Err(ClearingError::UnresolvedIdentity {
                    key,
                    reason: format!("{} reports a different mapping", session.counterparty()),
                });
            }
        }

        tracing::debug!(keys = keys.len(), "identities synchronized");
        Ok(ours)
    }
}

/// First key on which two sorted mappings differ.
fn first_disagreement(ours: &[IdentityMapping], theirs: &[IdentityMapping]) -> Option<PartyKey> {
    let mut theirs = theirs.to_vec();
    theirs.sort();
    theirs.dedup();
    for (a, b) in ours.iter().zip(theirs.iter()) {
        if a != b {
            return Some(a.key.min(b.key));
        }
    }
    match ours.len().cmp(&theirs.len()) {
        std::cmp::Ordering::Equal => None,
        std::cmp::Ordering::Greater => Some(ours[theirs.len()].key),
        std::cmp::Ordering::Less => Some(theirs[ours.len()].key),
    }
}
