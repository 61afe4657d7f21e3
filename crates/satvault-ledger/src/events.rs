//! Ledger events
//!
//! Every state change emits one event. Events are logged as
//! `EVENT_JSON:{"standard":"satvault","version":"1.0.0","event":...,"data":...}`
//! and buffered until the host drains them.

use bitcoin::Txid;
use serde::{Deserialize, Serialize};

pub const EVENT_STANDARD: &str = "satvault";
pub const EVENT_VERSION: &str = "1.0.0";

/// Events emitted by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// A deposit was admitted
    Deposit {
        user_pubkey: String,
        tx_id: Txid,
        deposit_vout: u32,
        value: u64,
    },

    /// A withdrawal request was accepted
    QueueWithdrawal {
        user_pubkey: String,
        amount: u64,
        /// Nonce the request was signed with
        nonce: u64,
        queue_withdrawal_amount: u64,
    },

    /// The custodian signed one input of a withdrawal PSBT
    SignWithdrawal {
        user_pubkey: String,
        tx_id: Txid,
        vin: u32,
        fully_signed: bool,
    },

    /// A deposit was spent by a confirmed withdrawal
    Withdrawn {
        user_pubkey: String,
        deposit_tx_id: Txid,
        deposit_vout: u32,
        withdrawal_tx_id: Txid,
        value: u64,
        /// "solo" or "cooperative"
        redeem_path: String,
    },

    /// Attached payment returned to the caller
    Refund {
        to: String,
        amount: u64,
        reason: String,
    },

    /// Owner changed a parameter
    Admin { action: String, detail: String },
}

#[derive(Serialize)]
struct Envelope<'a> {
    standard: &'static str,
    version: &'static str,
    #[serde(flatten)]
    event: &'a LedgerEvent,
}

impl LedgerEvent {
    /// The JSON line logged after `EVENT_JSON:`
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&Envelope {
            standard: EVENT_STANDARD,
            version: EVENT_VERSION,
            event: self,
        })
    }
}
