//! Full custody flows: deposit, queue, co-sign, broadcast-ready transaction,
//! finalization. Every transaction the ledger helps build is run through
//! libbitcoinconsensus.

use bitcoin::consensus::encode::{serialize, serialize_hex};
use bitcoin::{ecdsa, OutPoint, PublicKey, Transaction, TxOut};
use satvault_ledger::mock::MockSigningOracle;
use satvault_ledger::test_utils::{
    cooperative_tx, dummy_proof, sign_partial, solo_tx, test_keypair, withdrawal_psbt,
    TestHarness, WAITING_TIME_MS,
};
use satvault_ledger::{
    DepositStatus, Ledger, LedgerError, LedgerEvent, LedgerState, Oracles, SigType,
};
use satvault_script::deposit_script_pubkey;
use std::sync::Arc;

/// Consensus-verify every input of `tx` against the outputs it spends.
fn consensus_verify(tx: &Transaction, spent_outputs: &[TxOut]) -> Result<(), String> {
    let tx_bytes = serialize(tx);
    let utxos: Vec<bitcoinconsensus::Utxo> = spent_outputs
        .iter()
        .map(|o| {
            let sb = o.script_pubkey.as_bytes();
            bitcoinconsensus::Utxo {
                script_pubkey: sb.as_ptr(),
                script_pubkey_len: sb.len() as u32,
                value: o.value.to_sat() as i64,
            }
        })
        .collect();

    for (idx, txout) in spent_outputs.iter().enumerate() {
        bitcoinconsensus::verify(
            txout.script_pubkey.as_bytes(),
            txout.value.to_sat(),
            &tx_bytes,
            Some(&utxos),
            idx,
        )
        .map_err(|e| format!("input {}: {:?}", idx, e))?;
    }
    Ok(())
}

/// The outputs `tx` spends, looked up in the ledger.
fn spent_outputs(h: &TestHarness, tx: &Transaction) -> Vec<TxOut> {
    tx.input
        .iter()
        .map(|input| {
            let deposit = h.ledger.state().deposit(&input.previous_output).unwrap();
            TxOut {
                value: deposit.value,
                script_pubkey: deposit_script_pubkey(
                    &deposit.user_pubkey,
                    &h.custodian,
                    deposit.sequence,
                ),
            }
        })
        .collect()
}

async fn cosign_all(
    h: &mut TestHarness,
    psbt_hex: &str,
    user: &PublicKey,
    inputs: usize,
    embed_vout: Option<u64>,
) -> Vec<ecdsa::Signature> {
    let mut sigs = Vec::new();
    for vin in 0..inputs {
        let ctx = h.ctx("alice");
        let sig = h
            .ledger
            .sign_withdrawal(&ctx, psbt_hex, user, vin, embed_vout)
            .await
            .unwrap()
            .expect("custodian signature");
        sigs.push(sig);
    }
    sigs
}

// ============================================================================
// Cooperative withdrawal with change back into custody
// ============================================================================

#[tokio::test]
async fn test_cooperative_withdrawal_with_reinvest() {
    let mut h = TestHarness::new().await;
    let (sk, user) = test_keypair(1);
    let d1 = h.deposit(&user, 144, 60_000).await;
    let d2 = h.deposit(&user, 1008, 40_000).await;
    h.queue(&sk, 30_000).await;
    h.advance(WAITING_TIME_MS);

    // 29k out, 70k back into custody, 1k fee
    let mut psbt = withdrawal_psbt(h.ledger.state(), &[d1, d2], 29_000, Some(70_000));
    sign_partial(&mut psbt, h.ledger.state(), 0, &sk);
    sign_partial(&mut psbt, h.ledger.state(), 1, &sk);
    let sigs = cosign_all(&mut h, &psbt.serialize_hex(), &user, 2, Some(2)).await;

    let account = h.ledger.state().account(&user).unwrap();
    assert_eq!(account.queue_withdrawal_amount, 0);
    assert!(account.pending_sign_psbt.as_ref().unwrap().is_fully_signed());

    let tx = cooperative_tx(h.ledger.state(), &psbt, &user, &sigs);
    consensus_verify(&tx, &spent_outputs(&h, &tx)).unwrap();

    h.ledger.state_mut().take_events();
    let ctx = h.ctx("relayer");
    assert!(h
        .ledger
        .submit_withdrawal_tx(&ctx, &serialize_hex(&tx), &user, dummy_proof())
        .await
        .unwrap());

    let state = h.ledger.state();
    assert_eq!(state.deposit(&d1).unwrap().status, DepositStatus::Withdrawn);
    assert_eq!(state.deposit(&d2).unwrap().status, DepositStatus::Withdrawn);
    assert_eq!(
        state.deposit(&d1).unwrap().withdrawal_tx_id,
        Some(tx.compute_txid())
    );

    let reinvest = state
        .deposit(&OutPoint::new(tx.compute_txid(), 1))
        .expect("reinvest admitted");
    assert!(reinvest.is_active());
    assert_eq!(reinvest.value.to_sat(), 70_000);
    assert_eq!(reinvest.sequence, 144);

    let account = state.account(&user).unwrap();
    assert_eq!(account.total_deposit, 70_000);
    assert!(account.pending_sign_psbt.is_none());
    assert_eq!(account.active_deposits().len(), 1);
    assert_eq!(account.withdrawn_deposits().len(), 2);

    let events = h.ledger.state_mut().take_events();
    let withdrawn: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            LedgerEvent::Withdrawn { redeem_path, .. } => Some(redeem_path.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(withdrawn, vec!["cooperative", "cooperative"]);
    assert!(events
        .iter()
        .any(|e| matches!(e, LedgerEvent::Deposit { value: 70_000, .. })));
}

// ============================================================================
// Fee bump after a completed signing round
// ============================================================================

#[tokio::test]
async fn test_fee_bump_replaces_pending_psbt() {
    let mut h = TestHarness::new().await;
    let (sk, user) = test_keypair(1);
    let d1 = h.deposit(&user, 144, 100_000).await;
    let d2 = h.deposit(&user, 144, 5_000).await;
    h.queue(&sk, 100_000).await;
    h.advance(WAITING_TIME_MS);

    let mut first = withdrawal_psbt(h.ledger.state(), &[d1], 99_000, None);
    sign_partial(&mut first, h.ledger.state(), 0, &sk);
    cosign_all(&mut h, &first.serialize_hex(), &user, 1, None).await;
    assert_eq!(
        h.ledger.state().account(&user).unwrap().queue_withdrawal_amount,
        0
    );

    // the queue is spent, yet a bump of the same inputs is still signed
    let mut bumped = withdrawal_psbt(h.ledger.state(), &[d1], 97_500, None);
    sign_partial(&mut bumped, h.ledger.state(), 0, &sk);
    let sigs = cosign_all(&mut h, &bumped.serialize_hex(), &user, 1, None).await;
    let pending = h
        .ledger
        .state()
        .account(&user)
        .unwrap()
        .pending_sign_psbt
        .clone()
        .unwrap();
    assert_eq!(pending.txid(), bumped.unsigned_tx.compute_txid());

    // a different input set is not a replacement
    let mut other = withdrawal_psbt(h.ledger.state(), &[d1, d2], 104_000, None);
    sign_partial(&mut other, h.ledger.state(), 0, &sk);
    let ctx = h.ctx("alice");
    assert_eq!(
        h.ledger
            .sign_withdrawal(&ctx, &other.serialize_hex(), &user, 0, None)
            .await,
        Err(LedgerError::PsbtInputLenMismatch)
    );

    let tx = cooperative_tx(h.ledger.state(), &bumped, &user, &sigs);
    consensus_verify(&tx, &spent_outputs(&h, &tx)).unwrap();

    // signatures for the bump do not fit the first version
    let stale = cooperative_tx(h.ledger.state(), &first, &user, &sigs);
    assert!(consensus_verify(&stale, &spent_outputs(&h, &stale)).is_err());

    let ctx = h.ctx("relayer");
    h.ledger
        .submit_withdrawal_tx(&ctx, &serialize_hex(&tx), &user, dummy_proof())
        .await
        .unwrap();
    let account = h.ledger.state().account(&user).unwrap();
    assert!(account.pending_sign_psbt.is_none());
    assert_eq!(account.total_deposit, 5_000);
    assert_eq!(account.queue_withdrawal_amount, 0);
}

// ============================================================================
// Solo exit
// ============================================================================

#[tokio::test]
async fn test_solo_exit_after_timelock() {
    let mut h = TestHarness::new().await;
    let (sk, user) = test_keypair(1);
    let deposit = h.deposit(&user, 144, 50_000).await;

    let early = solo_tx(h.ledger.state(), &deposit, &sk, 143, 49_000);
    assert!(consensus_verify(&early, &spent_outputs(&h, &early)).is_err());
    let ctx = h.ctx("relayer");
    assert_eq!(
        h.ledger
            .submit_withdrawal_tx(&ctx, &serialize_hex(&early), &user, dummy_proof())
            .await,
        Err(LedgerError::InvalidWithdrawalWitness)
    );

    let tx = solo_tx(h.ledger.state(), &deposit, &sk, 144, 49_000);
    consensus_verify(&tx, &spent_outputs(&h, &tx)).unwrap();
    assert!(h
        .ledger
        .submit_withdrawal_tx(&ctx, &serialize_hex(&tx), &user, dummy_proof())
        .await
        .unwrap());

    assert_eq!(
        h.ledger.state().deposit(&deposit).unwrap().status,
        DepositStatus::Withdrawn
    );
    let events = h.ledger.state_mut().take_events();
    assert!(matches!(
        events.last(),
        Some(LedgerEvent::Withdrawn { redeem_path, value: 50_000, .. }) if redeem_path == "solo"
    ));
}

// ============================================================================
// Oracle outage and restart
// ============================================================================

#[tokio::test]
async fn test_signer_outage_then_retry() {
    let mut h = TestHarness::new().await;
    let (sk, user) = test_keypair(1);
    let deposit = h.deposit(&user, 144, 20_000).await;
    h.queue(&sk, 20_000).await;
    h.advance(WAITING_TIME_MS);

    let mut psbt = withdrawal_psbt(h.ledger.state(), &[deposit], 19_500, None);
    sign_partial(&mut psbt, h.ledger.state(), 0, &sk);

    h.signer.set_failing(true);
    let ctx = h.ctx("alice").with_attached(300);
    assert_eq!(
        h.ledger
            .sign_withdrawal(&ctx, &psbt.serialize_hex(), &user, 0, None)
            .await
            .unwrap(),
        None
    );
    let refunds = h.ledger.state_mut().take_refunds();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].amount, 300);
    assert_eq!(
        h.ledger.state().account(&user).unwrap().queue_withdrawal_amount,
        20_000
    );

    h.signer.set_failing(false);
    let sigs = cosign_all(&mut h, &psbt.serialize_hex(), &user, 1, None).await;
    let tx = cooperative_tx(h.ledger.state(), &psbt, &user, &sigs);
    consensus_verify(&tx, &spent_outputs(&h, &tx)).unwrap();
}

#[tokio::test]
async fn test_signing_resumes_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger_state.json");

    let mut h = TestHarness::new().await;
    let (sk, user) = test_keypair(1);
    let d1 = h.deposit(&user, 144, 30_000).await;
    let d2 = h.deposit(&user, 144, 30_000).await;
    h.queue(&sk, 60_000).await;
    h.advance(WAITING_TIME_MS);

    let mut psbt = withdrawal_psbt(h.ledger.state(), &[d1, d2], 59_000, None);
    sign_partial(&mut psbt, h.ledger.state(), 0, &sk);
    sign_partial(&mut psbt, h.ledger.state(), 1, &sk);
    let ctx = h.ctx("alice");
    let sig0 = h
        .ledger
        .sign_withdrawal(&ctx, &psbt.serialize_hex(), &user, 0, None)
        .await
        .unwrap()
        .unwrap();
    h.ledger.save(&path).unwrap();

    // a new process with the same signer
    let state = LedgerState::load(&path).unwrap();
    let ledger_id = state.config().ledger_id.clone();
    let (root_sk, _) = test_keypair(100);
    h.ledger = Ledger::new(
        state,
        Oracles::new(
            h.inclusion.clone(),
            Arc::new(MockSigningOracle::new(root_sk, ledger_id)),
        ),
    );

    let pending = h
        .ledger
        .state()
        .account(&user)
        .unwrap()
        .pending_sign_psbt
        .clone()
        .unwrap();
    assert_eq!(pending.signed_inputs.len(), 1);

    let ctx = h.ctx("alice");
    let sig1 = h
        .ledger
        .sign_withdrawal(&ctx, &psbt.serialize_hex(), &user, 1, None)
        .await
        .unwrap()
        .unwrap();
    let account = h.ledger.state().account(&user).unwrap();
    assert_eq!(account.queue_withdrawal_amount, 0);

    let tx = cooperative_tx(h.ledger.state(), &psbt, &user, &[sig0, sig1]);
    consensus_verify(&tx, &spent_outputs(&h, &tx)).unwrap();
    let ctx = h.ctx("relayer");
    h.ledger
        .submit_withdrawal_tx(&ctx, &serialize_hex(&tx), &user, dummy_proof())
        .await
        .unwrap();
    assert_eq!(h.ledger.state().account(&user).unwrap().total_deposit, 0);
}

// ============================================================================
// BIP322 requests
// ============================================================================

#[tokio::test]
async fn test_bip322_queue_request() {
    let mut h = TestHarness::new().await;
    let (_, user) = test_keypair(1);
    h.deposit(&user, 144, 10_000).await;
    let address = "bc1qexampleaddress".to_string();

    h.bip322.set_valid(false);
    let ctx = h.ctx("alice");
    assert!(!h
        .ledger
        .queue_withdrawal(
            &ctx,
            &user,
            5_000,
            "AkcwRAIg",
            SigType::Bip322Full {
                address: address.clone()
            }
        )
        .await
        .unwrap());
    assert_eq!(h.ledger.state().account(&user).unwrap().nonce, 0);

    h.bip322.set_valid(true);
    assert!(h
        .ledger
        .queue_withdrawal(&ctx, &user, 5_000, "AkcwRAIg", SigType::Bip322Full { address })
        .await
        .unwrap());
    let account = h.ledger.state().account(&user).unwrap();
    assert_eq!(account.nonce, 1);
    assert_eq!(account.queue_withdrawal_amount, 5_000);
}
