//! The ledger service: state plus the oracles it consults

use crate::oracle::Oracles;
use crate::state::{LedgerState, StateError};
use std::path::Path;

/// BTC custody ledger
///
/// Operations that need an oracle are `async` and split in two: checks and
/// reservations before the call, and a continuation that re-validates and
/// commits (or refunds) once the answer arrives. Use one `Ledger` per
/// logical writer, or wrap it in a lock.
#[derive(Debug)]
pub struct Ledger {
    pub(crate) state: LedgerState,
    pub(crate) oracles: Oracles,
}

impl Ledger {
    pub fn new(state: LedgerState, oracles: Oracles) -> Self {
        if let Some(bip322) = &oracles.bip322 {
            log::debug!("BIP322 verifier: {}", bip322.id());
        }
        log::debug!(
            "Ledger {} using inclusion oracle {} and signer {}",
            state.config().ledger_id,
            oracles.inclusion.id(),
            oracles.signer.id()
        );
        Self { state, oracles }
    }

    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut LedgerState {
        &mut self.state
    }

    pub fn oracles(&self) -> &Oracles {
        &self.oracles
    }

    pub fn into_state(self) -> LedgerState {
        self.state
    }

    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        self.state.save(path)
    }
}
