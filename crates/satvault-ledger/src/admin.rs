//! Owner operations
//!
//! Ownership moves in two steps: the owner proposes, the proposed account
//! accepts. Parameter changes apply to later calls only; admitted deposits
//! keep the terms they were admitted under.

use crate::error::LedgerError;
use crate::events::LedgerEvent;
use crate::ledger::Ledger;
use crate::oracle::{Bip322Verifier, InclusionOracle, SigningOracle};
use crate::state::LedgerState;
use crate::types::{Balance, CallContext};
use bitcoin::absolute::LockTime;
use std::sync::Arc;

impl LedgerState {
    fn admin_event(&mut self, action: &str, detail: String) {
        log::info!("Admin {}: {}", action, detail);
        self.emit(LedgerEvent::Admin {
            action: action.to_string(),
            detail,
        });
    }

    pub fn propose_change_owner(
        &mut self,
        ctx: &CallContext,
        new_owner_id: &str,
    ) -> Result<(), LedgerError> {
        self.assert_owner(ctx)?;
        if new_owner_id.is_empty() || new_owner_id == self.config.owner_id {
            return Err(LedgerError::InvalidOperation);
        }
        self.pending_owner_id = Some(new_owner_id.to_string());
        self.admin_event("propose_change_owner", new_owner_id.to_string());
        Ok(())
    }

    pub fn accept_change_owner(&mut self, ctx: &CallContext) -> Result<(), LedgerError> {
        let pending = self
            .pending_owner_id
            .clone()
            .ok_or(LedgerError::NoPendingOwner)?;
        if ctx.caller != pending {
            return Err(LedgerError::NotPendingOwner);
        }
        self.config.owner_id = pending;
        self.pending_owner_id = None;
        self.admin_event("accept_change_owner", ctx.caller.clone());
        Ok(())
    }

    pub fn set_paused(&mut self, ctx: &CallContext, paused: bool) -> Result<(), LedgerError> {
        self.assert_owner(ctx)?;
        if self.paused == paused {
            return Err(LedgerError::InvalidOperation);
        }
        self.paused = paused;
        self.admin_event("set_paused", paused.to_string());
        Ok(())
    }

    pub fn set_n_confirmation(&mut self, ctx: &CallContext, n: u64) -> Result<(), LedgerError> {
        self.assert_owner(ctx)?;
        if n == 0 {
            return Err(LedgerError::InvalidOperation);
        }
        self.config.n_confirmation = n;
        self.admin_event("set_n_confirmation", n.to_string());
        Ok(())
    }

    pub fn set_withdrawal_waiting_time_ms(
        &mut self,
        ctx: &CallContext,
        waiting_time_ms: u64,
    ) -> Result<(), LedgerError> {
        self.assert_owner(ctx)?;
        if waiting_time_ms == 0 {
            return Err(LedgerError::InvalidOperation);
        }
        self.config.withdrawal_waiting_time_ms = waiting_time_ms;
        self.admin_event("set_withdrawal_waiting_time_ms", waiting_time_ms.to_string());
        Ok(())
    }

    pub fn set_min_deposit_satoshi(
        &mut self,
        ctx: &CallContext,
        sats: u64,
    ) -> Result<(), LedgerError> {
        self.assert_owner(ctx)?;
        self.config.min_deposit_satoshi = sats;
        self.admin_event("set_min_deposit_satoshi", sats.to_string());
        Ok(())
    }

    pub fn set_earliest_deposit_block_height(
        &mut self,
        ctx: &CallContext,
        height: u32,
    ) -> Result<(), LedgerError> {
        self.assert_owner(ctx)?;
        if LockTime::from_height(height).is_err() {
            return Err(LedgerError::InvalidOperation);
        }
        self.config.earliest_deposit_block_height = height;
        self.admin_event("set_earliest_deposit_block_height", height.to_string());
        Ok(())
    }

    pub fn set_solo_withdrawal_seq_heights(
        &mut self,
        ctx: &CallContext,
        heights: Vec<u16>,
    ) -> Result<(), LedgerError> {
        self.assert_owner(ctx)?;
        if heights.is_empty() || heights.contains(&0) {
            return Err(LedgerError::InvalidOperation);
        }
        self.admin_event("set_solo_withdrawal_seq_heights", format!("{:?}", heights));
        self.config.solo_withdrawal_seq_heights = heights;
        Ok(())
    }

    pub fn set_deposit_storage_fee(
        &mut self,
        ctx: &CallContext,
        fee: Balance,
    ) -> Result<(), LedgerError> {
        self.assert_owner(ctx)?;
        self.config.deposit_storage_fee = fee;
        self.admin_event("set_deposit_storage_fee", fee.to_string());
        Ok(())
    }
}

impl Ledger {
    /// Fetch the signer's root key. Allowed once, by anyone.
    pub async fn sync_root_pubkey(&mut self) -> Result<(), LedgerError> {
        if self.state.root_pubkey.is_some() {
            return Err(LedgerError::RootPubkeyAlreadySynced);
        }
        let root = self
            .oracles
            .signer
            .root_public_key()
            .await
            .map_err(|e| LedgerError::RootPubkeySyncFailed(e.to_string()))?;
        if !root.compressed {
            return Err(LedgerError::RootPubkeySyncFailed(
                "root key must be compressed".into(),
            ));
        }
        if self.state.root_pubkey.is_some() {
            return Err(LedgerError::RootPubkeyAlreadySynced);
        }
        self.state.root_pubkey = Some(root);
        let custodian = self.state.custodian_pubkey()?;
        self.state
            .admin_event("sync_root_pubkey", format!("{} -> {}", root, custodian));
        Ok(())
    }

    pub fn set_inclusion_oracle(
        &mut self,
        ctx: &CallContext,
        oracle: Arc<dyn InclusionOracle>,
    ) -> Result<(), LedgerError> {
        self.state.assert_owner(ctx)?;
        let id = oracle.id().to_string();
        self.state.config.inclusion_oracle_id = id.clone();
        self.oracles.inclusion = oracle;
        self.state.admin_event("set_inclusion_oracle", id);
        Ok(())
    }

    pub fn set_signing_oracle(
        &mut self,
        ctx: &CallContext,
        oracle: Arc<dyn SigningOracle>,
    ) -> Result<(), LedgerError> {
        self.state.assert_owner(ctx)?;
        let id = oracle.id().to_string();
        self.state.config.signing_oracle_id = id.clone();
        self.oracles.signer = oracle;
        self.state.admin_event("set_signing_oracle", id);
        Ok(())
    }

    /// `None` disables BIP322 withdrawal requests.
    pub fn set_bip322_verifier(
        &mut self,
        ctx: &CallContext,
        verifier: Option<Arc<dyn Bip322Verifier>>,
    ) -> Result<(), LedgerError> {
        self.state.assert_owner(ctx)?;
        let id = verifier.as_ref().map(|v| v.id().to_string());
        self.state.config.bip322_verifier_id = id.clone();
        self.oracles.bip322 = verifier;
        self.state
            .admin_event("set_bip322_verifier", id.unwrap_or_else(|| "none".into()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBip322Verifier;
    use crate::test_utils::{test_config, TestHarness, OWNER};

    #[test]
    fn test_owner_transfer() {
        let mut state = LedgerState::new(test_config()).unwrap();
        let owner = CallContext::new(OWNER, 0);
        let bob = CallContext::new("bob", 0);
        let eve = CallContext::new("eve", 0);

        assert_eq!(
            state.accept_change_owner(&bob),
            Err(LedgerError::NoPendingOwner)
        );
        assert_eq!(
            state.propose_change_owner(&eve, "eve"),
            Err(LedgerError::NotOwner)
        );
        state.propose_change_owner(&owner, "bob").unwrap();
        assert_eq!(state.pending_owner_id(), Some("bob"));
        assert_eq!(
            state.accept_change_owner(&eve),
            Err(LedgerError::NotPendingOwner)
        );
        state.accept_change_owner(&bob).unwrap();
        assert_eq!(state.config().owner_id, "bob");
        assert!(state.pending_owner_id().is_none());

        // the old owner lost its rights
        assert_eq!(state.set_paused(&owner, true), Err(LedgerError::NotOwner));
    }

    #[test]
    fn test_pause_toggle() {
        let mut state = LedgerState::new(test_config()).unwrap();
        let owner = CallContext::new(OWNER, 0);
        assert_eq!(
            state.set_paused(&owner, false),
            Err(LedgerError::InvalidOperation)
        );
        state.set_paused(&owner, true).unwrap();
        assert!(state.is_paused());
        assert_eq!(state.assert_running(), Err(LedgerError::Paused));
        state.set_paused(&owner, false).unwrap();
        assert!(!state.is_paused());
    }

    #[test]
    fn test_parameter_setters() {
        let mut state = LedgerState::new(test_config()).unwrap();
        let owner = CallContext::new(OWNER, 0);
        let eve = CallContext::new("eve", 0);

        state.set_n_confirmation(&owner, 3).unwrap();
        state.set_withdrawal_waiting_time_ms(&owner, 1_000).unwrap();
        state.set_min_deposit_satoshi(&owner, 546).unwrap();
        state.set_earliest_deposit_block_height(&owner, 850_000).unwrap();
        state
            .set_solo_withdrawal_seq_heights(&owner, vec![6, 144])
            .unwrap();
        state.set_deposit_storage_fee(&owner, 10).unwrap();

        let config = state.config();
        assert_eq!(config.n_confirmation, 3);
        assert_eq!(config.withdrawal_waiting_time_ms, 1_000);
        assert_eq!(config.min_deposit_satoshi, 546);
        assert_eq!(config.earliest_deposit_block_height, 850_000);
        assert_eq!(config.solo_withdrawal_seq_heights, vec![6, 144]);
        assert_eq!(config.deposit_storage_fee, 10);

        assert_eq!(
            state.set_n_confirmation(&owner, 0),
            Err(LedgerError::InvalidOperation)
        );
        assert_eq!(
            state.set_solo_withdrawal_seq_heights(&owner, vec![]),
            Err(LedgerError::InvalidOperation)
        );
        assert_eq!(
            state.set_earliest_deposit_block_height(&owner, 500_000_000),
            Err(LedgerError::InvalidOperation)
        );
        assert_eq!(state.config().earliest_deposit_block_height, 850_000);
        assert_eq!(
            state.set_min_deposit_satoshi(&eve, 0),
            Err(LedgerError::NotOwner)
        );
        assert_eq!(state.take_events().len(), 6);
    }

    #[tokio::test]
    async fn test_root_pubkey_synced_once() {
        let mut h = TestHarness::new().await;
        assert_eq!(
            h.ledger.sync_root_pubkey().await,
            Err(LedgerError::RootPubkeyAlreadySynced)
        );
        assert_eq!(h.ledger.state().custodian_pubkey().unwrap(), h.custodian);
    }

    #[tokio::test]
    async fn test_oracle_rotation() {
        let mut h = TestHarness::new().await;
        let owner = CallContext::new(OWNER, 0);
        let eve = CallContext::new("eve", 0);

        assert_eq!(
            h.ledger.set_bip322_verifier(&eve, None),
            Err(LedgerError::NotOwner)
        );
        h.ledger.set_bip322_verifier(&owner, None).unwrap();
        assert!(h.ledger.oracles().bip322.is_none());
        assert!(h.ledger.state().config().bip322_verifier_id.is_none());

        h.ledger
            .set_bip322_verifier(&owner, Some(Arc::new(MockBip322Verifier::new(true))))
            .unwrap();
        assert_eq!(
            h.ledger.state().config().bip322_verifier_id.as_deref(),
            Some("mock-bip322")
        );

        let signer = h.signer.clone();
        h.ledger.set_signing_oracle(&owner, signer).unwrap();
        let inclusion = h.inclusion.clone();
        h.ledger.set_inclusion_oracle(&owner, inclusion).unwrap();
        assert_eq!(h.ledger.state().config().signing_oracle_id, "mock-signer");
        assert_eq!(
            h.ledger.state().config().inclusion_oracle_id,
            "mock-inclusion"
        );
    }
}
