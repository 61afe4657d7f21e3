#![no_main]

use bitcoin::psbt::Psbt;
use libfuzzer_sys::fuzz_target;
use satvault_ledger::test_utils::{test_keypair, TestHarness, GENESIS_MS};
use satvault_ledger::LedgerState;
use std::sync::OnceLock;

fn state() -> &'static LedgerState {
    static STATE: OnceLock<LedgerState> = OnceLock::new();
    STATE.get_or_init(|| {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        rt.block_on(async {
            let mut h = TestHarness::new().await;
            let (sk, user) = test_keypair(1);
            h.deposit(&user, 144, 100_000).await;
            h.queue(&sk, 50_000).await;
            h.ledger.into_state()
        })
    })
}

fuzz_target!(|data: &[u8]| {
    let _ = Psbt::deserialize(data);

    let state = state();
    let (_, user) = test_keypair(1);
    let vin = data.first().copied().unwrap_or(0) as usize;
    let hex: String = data.iter().map(|b| format!("{:02x}", b)).collect();
    let _ = state.dry_run_sign_withdrawal(&hex, &user, vin, Some(1), u64::MAX);
    let _ = state.dry_run_sign_withdrawal(&hex, &user, vin, None, GENESIS_MS);
});
