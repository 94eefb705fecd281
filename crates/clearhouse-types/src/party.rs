//! Party identities: well-known, confidential, and the proofs linking them.
//!
//! A transfer record may name its buyer and seller by a confidential
//! ([`AnonymousParty`]) key so the ledger never reveals who traded. Only
//! holders of the matching [`IdentityCertificate`] can map such a key back
//! to the well-known [`Party`] and its network [`Endpoint`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{KeyPair, PartyKey, keys::verify_signature};

/// A well-known party: legal name plus its published owning key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Party {
    pub name: String,
    pub key: PartyKey,
}

impl Party {
    #[must_use]
    pub fn new(name: impl Into<String>, key: PartyKey) -> Self {
        Self {
            name: name.into(),
            key,
        }
    }

    /// Build a party whose owning key is the public half of `keys`.
    #[must_use]
    pub fn from_keypair(name: impl Into<String>, keys: &KeyPair) -> Self {
        Self::new(name, keys.public_key())
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A confidential identity: a fresh key with no name attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnonymousParty {
    pub key: PartyKey,
}

/// Either kind of party reference, as it appears inside ledger states.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AbstractParty {
    WellKnown(Party),
    Anonymous(AnonymousParty),
}

impl AbstractParty {
    #[must_use]
    pub fn anonymous(key: PartyKey) -> Self {
        Self::Anonymous(AnonymousParty { key })
    }

    /// The key that must sign on behalf of this party.
    #[must_use]
    pub fn owning_key(&self) -> PartyKey {
        match self {
            Self::WellKnown(party) => party.key,
            Self::Anonymous(anon) => anon.key,
        }
    }

    #[must_use]
    pub fn is_confidential(&self) -> bool {
        matches!(self, Self::Anonymous(_))
    }
}

impl From<Party> for AbstractParty {
    fn from(party: Party) -> Self {
        Self::WellKnown(party)
    }
}

impl fmt::Display for AbstractParty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WellKnown(party) => write!(f, "{party}"),
            Self::Anonymous(anon) => write!(f, "anonymous({})", anon.key),
        }
    }
}

/// Where a well-known party can be reached for a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub party: Party,
    pub address: String,
}

/// Proof that a confidential key belongs to a well-known party.
///
/// The well-known key signs
/// `"clearhouse:identity:v1:" || anonymous || well_known.key || well_known.name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityCertificate {
    pub anonymous: PartyKey,
    pub well_known: Party,
    pub signature: Vec<u8>,
}

impl IdentityCertificate {
    /// Issue a certificate for `anonymous`, signed by the well-known key.
    #[must_use]
    pub fn issue(well_known: &Party, well_known_keys: &KeyPair, anonymous: PartyKey) -> Self {
        let payload = Self::payload(well_known, anonymous);
        Self {
            anonymous,
            well_known: well_known.clone(),
            signature: well_known_keys.sign_bytes(&payload),
        }
    }

    fn payload(well_known: &Party, anonymous: PartyKey) -> Vec<u8> {
        let mut payload = Vec::with_capacity(96 + well_known.name.len());
        payload.extend_from_slice(b"clearhouse:identity:v1:");
        payload.extend_from_slice(anonymous.as_bytes());
        payload.extend_from_slice(well_known.key.as_bytes());
        payload.extend_from_slice(well_known.name.as_bytes());
        payload
    }

    /// Returns `true` if the well-known key really vouched for `anonymous`.
    #[must_use]
    pub fn verify(&self) -> bool {
        let payload = Self::payload(&self.well_known, self.anonymous);
        verify_signature(&self.well_known.key, &payload, &self.signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owning_key_of_each_kind() {
        let kp = KeyPair::from_seed(&[1; 32]);
        let party = Party::from_keypair("Seller", &kp);
        assert_eq!(AbstractParty::from(party.clone()).owning_key(), party.key);

        let anon = KeyPair::from_seed(&[2; 32]).public_key();
        let abstract_anon = AbstractParty::anonymous(anon);
        assert_eq!(abstract_anon.owning_key(), anon);
        assert!(abstract_anon.is_confidential());
    }

    #[test]
    fn certificate_verifies() {
        let kp = KeyPair::from_seed(&[3; 32]);
        let party = Party::from_keypair("Buyer", &kp);
        let anon = KeyPair::from_seed(&[4; 32]).public_key();
        let cert = IdentityCertificate::issue(&party, &kp, anon);
        assert!(cert.verify());
    }

    #[test]
    fn forged_certificate_rejected() {
        let real = KeyPair::from_seed(&[5; 32]);
        let forger = KeyPair::from_seed(&[6; 32]);
        let party = Party::from_keypair("Buyer", &real);
        let anon = KeyPair::from_seed(&[7; 32]).public_key();
        let forged = IdentityCertificate::issue(&party, &forger, anon);
        assert!(!forged.verify());
    }

    #[test]
    fn certificate_bound_to_anonymous_key() {
        let kp = KeyPair::from_seed(&[8; 32]);
        let party = Party::from_keypair("Seller", &kp);
        let mut cert = IdentityCertificate::issue(&party, &kp, PartyKey([1; 32]));
        cert.anonymous = PartyKey([2; 32]);
        assert!(!cert.verify());
    }
}
