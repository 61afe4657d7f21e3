//! Call context, refunds and serde helpers shared across the ledger

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Amount of host currency attached to a call (storage and oracle fees).
pub type Balance = u64;

/// Prefix of the message a user signs to queue a withdrawal.
pub const WITHDRAWAL_MSG_PREFIX: &str = "satvault.withdraw";

/// Derivation path of the custodian key for version 1 deposit scripts.
pub const CUSTODIAN_PATH_V1: &str = "/btc/manage/v1";

/// Signing-oracle key version for version 1 deposit scripts.
pub const CUSTODIAN_KEY_VERSION_V1: u32 = 0;

/// Who is calling, what they attached, and the host's notion of "now".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub caller: String,
    pub attached: Balance,
    /// Milliseconds since the unix epoch
    pub timestamp_ms: u64,
}

impl CallContext {
    pub fn new(caller: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            caller: caller.into(),
            attached: 0,
            timestamp_ms,
        }
    }

    /// Context stamped with the local wall clock.
    pub fn now(caller: impl Into<String>) -> Self {
        Self::new(caller, current_timestamp_ms())
    }

    pub fn with_attached(mut self, attached: Balance) -> Self {
        self.attached = attached;
        self
    }
}

/// A payment the host must return to a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refund {
    pub to: String,
    pub amount: Balance,
}

/// How a withdrawal request was signed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigType {
    /// Standard Bitcoin signed message, recoverable ECDSA
    Ecdsa,
    /// BIP322 "full" signature for the given address
    Bip322Full { address: String },
}

pub(crate) fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Serde helper for OutPoint
pub(crate) mod outpoint_serde {
    use bitcoin::OutPoint;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(outpoint: &OutPoint, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        outpoint.to_string().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<OutPoint, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Serde helper for ordered OutPoint lists
pub(crate) mod outpoint_list_serde {
    use bitcoin::OutPoint;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(outpoints: &[OutPoint], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let strings: Vec<String> = outpoints.iter().map(|o| o.to_string()).collect();
        strings.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<OutPoint>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let strings = Vec::<String>::deserialize(deserializer)?;
        strings
            .iter()
            .map(|s| s.parse().map_err(serde::de::Error::custom))
            .collect()
    }
}

/// Serde helper for PSBTs (hex of the BIP174 encoding)
pub(crate) mod psbt_serde {
    use bitcoin::Psbt;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(psbt: &Psbt, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        psbt.serialize_hex().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Psbt, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        Psbt::deserialize(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Serde helper for Amount
pub(crate) mod amount_serde {
    use bitcoin::Amount;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(amount: &Amount, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(amount.to_sat())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Amount, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sats = u64::deserialize(deserializer)?;
        Ok(Amount::from_sat(sats))
    }
}
