//! Ed25519 signing keys and transaction signatures.
//!
//! Every participant signs the 32-byte [`TxId`] of the transaction it
//! agrees to. A [`TransactionSignature`] records which key signed so the
//! collector can match returned signatures against required signers.

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::{PartyKey, TxId};

/// A signature by `by` over a transaction id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSignature {
    /// The key that produced the signature.
    pub by: PartyKey,
    /// Raw ed25519 signature bytes (64 bytes when well-formed).
    pub bytes: Vec<u8>,
}

impl TransactionSignature {
    /// Returns `true` if this signature verifies against `tx_id`.
    #[must_use]
    pub fn verifies(&self, tx_id: &TxId) -> bool {
        verify_signature(&self.by, tx_id.as_bytes(), &self.bytes)
    }
}

/// Ed25519 key pair held by one party (well-known or confidential).
pub struct KeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl KeyPair {
    /// Generate a fresh random key pair.
    #[must_use]
    pub fn generate() -> Self {
        Self::from_seed(&rand::random::<[u8; 32]>())
    }

    /// Deterministic key pair from a 32-byte seed.
    #[must_use]
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// The public half of this pair as a [`PartyKey`].
    #[must_use]
    pub fn public_key(&self) -> PartyKey {
        PartyKey(self.verifying_key.to_bytes())
    }

    /// Sign arbitrary bytes.
    #[must_use]
    pub fn sign_bytes(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message).to_bytes().to_vec()
    }

    /// Sign a transaction id.
    #[must_use]
    pub fn sign(&self, tx_id: &TxId) -> TransactionSignature {
        TransactionSignature {
            by: self.public_key(),
            bytes: self.sign_bytes(tx_id.as_bytes()),
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Verify `signature` over `message` with the public key `key`.
///
/// Malformed keys and signatures of the wrong length never verify.
#[must_use]
pub fn verify_signature(key: &PartyKey, message: &[u8], signature: &[u8]) -> bool {
    let Ok(bytes) = <[u8; 64]>::try_from(signature) else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(key.as_bytes()) else {
        return false;
    };
    verifying_key
        .verify(message, &Signature::from_bytes(&bytes))
        .is_ok()
}
