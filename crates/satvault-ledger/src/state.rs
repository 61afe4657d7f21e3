//! Ledger state and persistence
//!
//! [`LedgerState`] holds everything the ledger knows: parameters, the root
//! key, accounts and the global deposit map. All of its mutations are
//! synchronous. Oracle round trips live in [`crate::Ledger`].

use crate::account::{Account, Deposit};
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::events::LedgerEvent;
use crate::kdf::derive_custodian_pubkey;
use crate::types::{Balance, CallContext, Refund, CUSTODIAN_PATH_V1};
use bitcoin::{OutPoint, PublicKey, Txid};
use satvault_script::RedeemPath;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

const SNAPSHOT_VERSION: u32 = 1;

/// Errors from state persistence
#[derive(Error, Debug)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported snapshot version {0}")]
    UnsupportedVersion(u32),

    #[error("Corrupt snapshot: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// On-disk form. Maps are flattened to lists and rebuilt on load.
#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    config: LedgerConfig,
    pending_owner_id: Option<String>,
    root_pubkey: Option<PublicKey>,
    paused: bool,
    accounts: Vec<Account>,
    deposits: Vec<Deposit>,
}

/// Everything the ledger knows
#[derive(Debug, Clone)]
pub struct LedgerState {
    pub(crate) config: LedgerConfig,
    pub(crate) pending_owner_id: Option<String>,
    pub(crate) root_pubkey: Option<PublicKey>,
    pub(crate) paused: bool,
    pub(crate) accounts: BTreeMap<PublicKey, Account>,
    pub(crate) deposits: HashMap<OutPoint, Deposit>,
    events: Vec<LedgerEvent>,
    refunds: Vec<Refund>,
}

impl LedgerState {
    /// Fresh ledger. The root key still has to be synced from the signer.
    pub fn new(config: LedgerConfig) -> Result<Self, LedgerError> {
        config.validate()?;
        Ok(Self {
            config,
            pending_owner_id: None,
            root_pubkey: None,
            paused: false,
            accounts: BTreeMap::new(),
            deposits: HashMap::new(),
            events: Vec::new(),
            refunds: Vec::new(),
        })
    }

    /// Load state from file
    pub fn load(path: &Path) -> Result<Self, StateError> {
        let contents = fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&contents)?;
        Self::from_snapshot(snapshot)
    }

    /// Load state from file, or start fresh from `config` if not exists
    pub fn load_or_new(path: &Path, config: LedgerConfig) -> Result<Self, StateError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::new(config)?)
        }
    }

    /// Save state to file
    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(&self.to_snapshot())?;
        fs::write(path, contents)?;
        Ok(())
    }

    fn to_snapshot(&self) -> Snapshot {
        let mut deposits: Vec<Deposit> = self.deposits.values().cloned().collect();
        deposits.sort_by_key(|d| d.outpoint);
        Snapshot {
            version: SNAPSHOT_VERSION,
            config: self.config.clone(),
            pending_owner_id: self.pending_owner_id.clone(),
            root_pubkey: self.root_pubkey,
            paused: self.paused,
            accounts: self.accounts.values().cloned().collect(),
            deposits,
        }
    }

    fn from_snapshot(snapshot: Snapshot) -> Result<Self, StateError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StateError::UnsupportedVersion(snapshot.version));
        }
        let mut state = Self::new(snapshot.config)?;
        state.pending_owner_id = snapshot.pending_owner_id;
        state.root_pubkey = snapshot.root_pubkey;
        state.paused = snapshot.paused;

        for deposit in snapshot.deposits {
            if state.deposits.insert(deposit.outpoint, deposit).is_some() {
                return Err(StateError::Corrupt("duplicate deposit".into()));
            }
        }
        for account in snapshot.accounts {
            let owned = account
                .active_deposits()
                .iter()
                .chain(account.withdrawn_deposits())
                .all(|o| {
                    state
                        .deposits
                        .get(o)
                        .map_or(false, |d| d.user_pubkey == account.pubkey)
                });
            if !owned {
                return Err(StateError::Corrupt(format!(
                    "account {} references unknown deposits",
                    account.pubkey
                )));
            }
            state.accounts.insert(account.pubkey, account);
        }
        Ok(state)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn pending_owner_id(&self) -> Option<&str> {
        self.pending_owner_id.as_deref()
    }

    pub fn root_pubkey(&self) -> Option<PublicKey> {
        self.root_pubkey
    }

    /// Custodian key for version 1 deposit scripts
    pub fn custodian_pubkey(&self) -> Result<PublicKey, LedgerError> {
        let root = self.root_pubkey.ok_or(LedgerError::RootPubkeyNotSynced)?;
        derive_custodian_pubkey(&root, &self.config.ledger_id, CUSTODIAN_PATH_V1)
    }

    pub fn account(&self, user_pubkey: &PublicKey) -> Option<&Account> {
        self.accounts.get(user_pubkey)
    }

    pub fn deposit(&self, outpoint: &OutPoint) -> Option<&Deposit> {
        self.deposits.get(outpoint)
    }

    pub fn is_deposit_saved(&self, outpoint: &OutPoint) -> bool {
        self.deposits.contains_key(outpoint)
    }

    /// Events not yet drained
    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<LedgerEvent> {
        std::mem::take(&mut self.events)
    }

    /// Payments the host still has to return
    pub fn refunds(&self) -> &[Refund] {
        &self.refunds
    }

    pub fn take_refunds(&mut self) -> Vec<Refund> {
        std::mem::take(&mut self.refunds)
    }

    pub(crate) fn assert_running(&self) -> Result<(), LedgerError> {
        if self.paused {
            return Err(LedgerError::Paused);
        }
        Ok(())
    }

    pub(crate) fn assert_owner(&self, ctx: &CallContext) -> Result<(), LedgerError> {
        if ctx.caller != self.config.owner_id {
            return Err(LedgerError::NotOwner);
        }
        Ok(())
    }

    pub(crate) fn emit(&mut self, event: LedgerEvent) {
        match event.to_json() {
            Ok(json) => log::info!("EVENT_JSON:{}", json),
            Err(e) => log::error!("Failed to serialize event {:?}: {}", event, e),
        }
        self.events.push(event);
    }

    pub(crate) fn refund(&mut self, to: &str, amount: Balance, reason: &str) {
        if amount == 0 {
            return;
        }
        log::debug!("Refunding {} to {}: {}", amount, to, reason);
        self.refunds.push(Refund {
            to: to.to_string(),
            amount,
        });
        self.emit(LedgerEvent::Refund {
            to: to.to_string(),
            amount,
            reason: reason.to_string(),
        });
    }

    /// Record a verified deposit and credit its owner.
    pub(crate) fn save_deposit(&mut self, deposit: Deposit) -> Result<(), LedgerError> {
        if self.deposits.contains_key(&deposit.outpoint) {
            return Err(LedgerError::DepositAlreadySaved);
        }
        let account = self
            .accounts
            .entry(deposit.user_pubkey)
            .or_insert_with(|| Account::new(deposit.user_pubkey));
        account.add_active_deposit(&deposit)?;

        let event = LedgerEvent::Deposit {
            user_pubkey: deposit.user_pubkey.to_string(),
            tx_id: deposit.outpoint.txid,
            deposit_vout: deposit.outpoint.vout,
            value: deposit.value.to_sat(),
        };
        log::info!(
            "Deposit {} saved for {} ({} sats)",
            deposit.outpoint,
            deposit.user_pubkey,
            deposit.value.to_sat()
        );
        self.deposits.insert(deposit.outpoint, deposit);
        self.emit(event);
        Ok(())
    }

    /// Move a deposit to the withdrawn set.
    pub(crate) fn complete_withdrawal(
        &mut self,
        user_pubkey: &PublicKey,
        outpoint: &OutPoint,
        withdrawal_tx_id: Txid,
        timestamp_ms: u64,
        path: RedeemPath,
    ) -> Result<(), LedgerError> {
        let deposit = self
            .deposits
            .get_mut(outpoint)
            .ok_or(LedgerError::DepositNotActive)?;
        if !deposit.is_active() {
            return Err(LedgerError::DepositAlreadyWithdrawn);
        }
        let account = self
            .accounts
            .get_mut(user_pubkey)
            .ok_or(LedgerError::DepositNotActive)?;
        account.move_to_withdrawn(deposit)?;
        deposit.mark_withdrawn(withdrawal_tx_id, timestamp_ms);

        let event = LedgerEvent::Withdrawn {
            user_pubkey: user_pubkey.to_string(),
            deposit_tx_id: outpoint.txid,
            deposit_vout: outpoint.vout,
            withdrawal_tx_id,
            value: deposit.value.to_sat(),
            redeem_path: match path {
                RedeemPath::Solo => "solo",
                RedeemPath::Cooperative => "cooperative",
                RedeemPath::Unknown => "unknown",
            }
            .to_string(),
        };
        self.emit(event);
        Ok(())
    }
}
