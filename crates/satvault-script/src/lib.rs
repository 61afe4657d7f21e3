//! # SatVault Script
//!
//! Bitcoin-level building blocks shared by the ledger and its tooling:
//!
//! - [`script`]: the version 1 deposit locking script, its P2WSH output and
//!   the solo / cooperative spending witnesses
//! - [`embed`]: the metadata message carried in a deposit's zero-value
//!   OP_RETURN output
//!
//! Everything here is pure and deterministic. Key material never enters this
//! crate; signatures are produced elsewhere and only arranged into witnesses.

pub mod embed;
pub mod script;

pub use embed::{DepositEmbedMsg, EmbedError, EMBED_MAGIC};
pub use script::{
    build_cooperative_witness, build_deposit_script, build_solo_witness, classify_witness,
    deposit_script_pubkey, p2wsh_sighash, sighash_message, RedeemPath, ScriptError,
};
