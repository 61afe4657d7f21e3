//! # SatVault Ledger
//!
//! Account ledger for BTC held in 2-of-2 (user + custodian) P2WSH deposits
//! with a user-only timelocked exit.
//!
//! # Lifecycle
//!
//! 1. **Deposit**: the user funds the version 1 deposit script and submits
//!    the transaction with an inclusion proof. Once the inclusion oracle
//!    confirms it, the deposit is credited to the user's account.
//! 2. **Queue**: the user signs `satvault.withdraw:{nonce}:{amount}sats` to
//!    queue a withdrawal. A waiting period starts.
//! 3. **Sign**: after the waiting period the user submits a partially signed
//!    PSBT spending their deposits. The ledger validates it and has the
//!    signing oracle co-sign each input. Fee bumps replace the pending PSBT.
//! 4. **Finalize**: once the withdrawal confirms, anyone submits it and the
//!    spent deposits move to the withdrawn set. Change sent back into
//!    custody is admitted as a new deposit.
//!
//! At any time the user can leave alone through the timelocked path; the
//! ledger recognises that spend at finalization too.
//!
//! # Example
//!
//! ```ignore
//! use satvault_ledger::{Ledger, LedgerConfig, LedgerState, Oracles, CallContext};
//!
//! let state = LedgerState::load_or_new(&path, LedgerConfig::new("owner"))?;
//! let mut ledger = Ledger::new(state, Oracles::new(inclusion, signer));
//! ledger.sync_root_pubkey().await?;
//!
//! let ctx = CallContext::now("alice");
//! ledger.submit_deposit_tx(&ctx, &tx_hex, 1, proof).await?;
//! for event in ledger.state_mut().take_events() {
//!     println!("{:?}", event);
//! }
//! ```

pub mod account;
pub mod admin;
pub mod auth;
pub mod config;
pub mod deposit;
pub mod error;
pub mod events;
pub mod finalize;
pub mod kdf;
pub mod ledger;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod oracle;
pub mod state;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod view;
pub mod withdraw;

pub use account::{Account, Deposit, DepositStatus, PendingSignPsbt, RedeemVersion};
pub use auth::{verify_message_signature, withdrawal_message};
pub use config::LedgerConfig;
pub use error::LedgerError;
pub use events::LedgerEvent;
pub use kdf::{derive_custodian_pubkey, derive_custodian_secret};
pub use ledger::Ledger;
pub use oracle::{
    Bip322Verifier, InclusionOracle, InclusionProof, OracleError, Oracles, SignOutcome,
    SignRequest, SigningOracle, TxProof,
};
pub use state::{LedgerState, StateError};
pub use types::{Balance, CallContext, Refund, SigType};
pub use view::{AccountView, DepositConstantsV1, LedgerSummary, WithdrawalConstantsV1};
pub use withdraw::SignPreview;
