//! Custodian key derivation
//!
//! The signing oracle holds one root key. Each ledger and derivation path gets
//! its own child key by additive tweaking:
//!
//! ```text
//! epsilon   = sha256("satvault custodian epsilon derivation:" || ledger_id || "," || path)
//! custodian = root + epsilon * G
//! ```
//!
//! The oracle signs with `root_sk + epsilon`, so the ledger can compute the
//! custodian public key without ever seeing a secret.

use crate::error::LedgerError;
use bitcoin::hashes::{sha256, Hash};
use bitcoin::secp256k1::{Scalar, Secp256k1, SecretKey};
use bitcoin::PublicKey;

const EPSILON_DERIVATION_PREFIX: &str = "satvault custodian epsilon derivation:";

/// Tweak scalar for `(ledger_id, path)`.
pub fn derive_epsilon(ledger_id: &str, path: &str) -> Result<Scalar, LedgerError> {
    let preimage = format!("{}{},{}", EPSILON_DERIVATION_PREFIX, ledger_id, path);
    let hash = sha256::Hash::hash(preimage.as_bytes());
    Scalar::from_be_bytes(hash.to_byte_array()).map_err(|_| LedgerError::KeyDerivation)
}

/// Public side: root + epsilon*G.
pub fn derive_custodian_pubkey(
    root: &PublicKey,
    ledger_id: &str,
    path: &str,
) -> Result<PublicKey, LedgerError> {
    let epsilon = derive_epsilon(ledger_id, path)?;

    // epsilon * G
    let secp = Secp256k1::signing_only();
    let tweak_point = SecretKey::from_slice(&epsilon.to_be_bytes())
        .map_err(|_| LedgerError::KeyDerivation)?
        .public_key(&secp);

    root.inner
        .combine(&tweak_point)
        .map(PublicKey::new)
        .map_err(|_| LedgerError::KeyDerivation)
}

/// Oracle side: root_sk + epsilon (mod n).
pub fn derive_custodian_secret(
    root_secret: &SecretKey,
    ledger_id: &str,
    path: &str,
) -> Result<SecretKey, LedgerError> {
    let epsilon = derive_epsilon(ledger_id, path)?;
    root_secret
        .add_tweak(&epsilon)
        .map_err(|_| LedgerError::KeyDerivation)
}
