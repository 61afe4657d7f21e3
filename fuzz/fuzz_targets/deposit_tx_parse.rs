#![no_main]

use libfuzzer_sys::fuzz_target;
use satvault_ledger::test_utils::TestHarness;
use satvault_ledger::LedgerState;
use std::sync::OnceLock;

fn state() -> &'static LedgerState {
    static STATE: OnceLock<LedgerState> = OnceLock::new();
    STATE.get_or_init(|| {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        rt.block_on(TestHarness::new()).ledger.into_state()
    })
}

fuzz_target!(|data: &[u8]| {
    let state = state();
    let embed_vout = data.first().copied().unwrap_or(0) as u64;

    // raw bytes as a transaction
    let hex: String = data.iter().map(|b| format!("{:02x}", b)).collect();
    let _ = state.dry_run_deposit(&hex, embed_vout);

    // and as caller-supplied hex text
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = state.dry_run_deposit(s, embed_vout);
    }
});
