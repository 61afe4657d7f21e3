//! Security-specific tests.
//!
//! These tests verify:
//! 1. Malformed transactions, PSBTs and embed payloads are rejected without panics
//! 2. Deposits cannot be credited to the wrong key
//! 3. Withdrawal PSBTs cannot move someone else's funds or more than was queued
//! 4. A misbehaving oracle cannot corrupt state

use bitcoin::consensus::encode::serialize_hex;
use bitcoin::Amount;
use satvault_ledger::mock::MockSigningOracle;
use satvault_ledger::test_utils::{
    build_deposit_tx, dummy_proof, sign_partial, solo_tx, test_keypair, withdrawal_psbt,
    TestHarness, OWNER, WAITING_TIME_MS,
};
use satvault_ledger::{CallContext, DepositStatus, LedgerError, SigType};
use satvault_script::{build_deposit_script, deposit_script_pubkey, DepositEmbedMsg};
use secp256k1::rand::RngCore;
use std::sync::Arc;

// ============================================================================
// 1. Malformed input
// ============================================================================

#[test]
fn test_random_embed_payloads_never_panic() {
    let mut rng = secp256k1::rand::thread_rng();
    for len in 0..128 {
        let mut bytes = vec![0u8; len];
        rng.fill_bytes(&mut bytes);
        let _ = DepositEmbedMsg::decode(&bytes);

        let mut framed = b"satvault".to_vec();
        framed.extend_from_slice(&bytes);
        let _ = DepositEmbedMsg::decode(&framed);
    }
}

#[tokio::test]
async fn test_garbage_hex_rejected() {
    let mut h = TestHarness::new().await;
    let (_, user) = test_keypair(1);
    let ctx = h.ctx("mallory");
    let long = "ff".repeat(500);

    for junk in ["", "zz", "00", "0200000001", long.as_str()] {
        assert_eq!(
            h.ledger
                .submit_deposit_tx(&ctx, junk, 1, dummy_proof())
                .await,
            Err(LedgerError::InvalidTxHex)
        );
        assert_eq!(
            h.ledger
                .sign_withdrawal(&ctx, junk, &user, 0, None)
                .await,
            Err(LedgerError::InvalidPsbtHex)
        );
        assert_eq!(
            h.ledger
                .submit_withdrawal_tx(&ctx, junk, &user, dummy_proof())
                .await,
            Err(LedgerError::InvalidWithdrawalTxHex)
        );
    }
    assert_eq!(h.ledger.state().accounts_len(), 0);
}

#[tokio::test]
async fn test_out_of_range_indices() {
    let mut h = TestHarness::new().await;
    let (sk, user) = test_keypair(1);
    let tx = build_deposit_tx(&user, &h.custodian, 144, 10_000, 0);
    let ctx = h.ctx("mallory");

    for vout in [2, u64::from(u32::MAX) + 1, u64::MAX] {
        assert_eq!(
            h.ledger
                .submit_deposit_tx(&ctx, &serialize_hex(&tx), vout, dummy_proof())
                .await,
            Err(LedgerError::BadEmbedIndex)
        );
    }

    let deposit = h.deposit(&user, 144, 10_000).await;
    h.queue(&sk, 10_000).await;
    h.advance(WAITING_TIME_MS);
    let mut psbt = withdrawal_psbt(h.ledger.state(), &[deposit], 9_000, None);
    sign_partial(&mut psbt, h.ledger.state(), 0, &sk);
    let ctx = h.ctx("alice");
    assert_eq!(
        h.ledger
            .sign_withdrawal(&ctx, &psbt.serialize_hex(), &user, 1, None)
            .await,
        Err(LedgerError::BadInputIndex)
    );
}

// ============================================================================
// 2. Deposit attribution
// ============================================================================

#[tokio::test]
async fn test_embed_cannot_claim_foreign_deposit() {
    let mut h = TestHarness::new().await;
    let (_, alice) = test_keypair(1);
    let (_, mallory) = test_keypair(2);

    // alice's script, mallory's name in the embed
    let mut tx = build_deposit_tx(&alice, &h.custodian, 144, 10_000, 0);
    tx.output[1].script_pubkey = DepositEmbedMsg::v1(0, &mallory, 144).to_script().unwrap();
    let ctx = h.ctx("mallory");
    assert_eq!(
        h.ledger
            .submit_deposit_tx(&ctx, &serialize_hex(&tx), 1, dummy_proof())
            .await,
        Err(LedgerError::DepositBadScriptHash)
    );

    // the embed claims a different timelock than the script uses
    let mut tx = build_deposit_tx(&alice, &h.custodian, 144, 10_000, 0);
    tx.output[1].script_pubkey = DepositEmbedMsg::v1(0, &alice, 1008).to_script().unwrap();
    assert_eq!(
        h.ledger
            .submit_deposit_tx(&ctx, &serialize_hex(&tx), 1, dummy_proof())
            .await,
        Err(LedgerError::DepositBadScriptHash)
    );

    // non-zero embed output
    let mut tx = build_deposit_tx(&alice, &h.custodian, 144, 10_000, 0);
    tx.output[1].value = Amount::from_sat(1);
    assert!(matches!(
        h.ledger
            .submit_deposit_tx(&ctx, &serialize_hex(&tx), 1, dummy_proof())
            .await,
        Err(LedgerError::Embed(_))
    ));
    assert!(h.ledger.state().account(&mallory).is_none());
}

#[tokio::test]
async fn test_unconfirmed_deposit_releases_reservation() {
    let mut config = satvault_ledger::test_utils::test_config();
    config.deposit_storage_fee = 500;
    let mut h = TestHarness::with_config(config).await;
    let (_, user) = test_keypair(1);
    let tx = build_deposit_tx(&user, &h.custodian, 144, 10_000, 0);

    let ctx = h.ctx("alice").with_attached(499);
    assert_eq!(
        h.ledger
            .submit_deposit_tx(&ctx, &serialize_hex(&tx), 1, dummy_proof())
            .await,
        Err(LedgerError::NotEnoughPayment)
    );

    h.inclusion.set_confirmed(false);
    let ctx = h.ctx("alice").with_attached(800);
    assert!(!h
        .ledger
        .submit_deposit_tx(&ctx, &serialize_hex(&tx), 1, dummy_proof())
        .await
        .unwrap());
    let refunds = h.ledger.state_mut().take_refunds();
    assert_eq!(refunds[0].amount, 800);

    h.inclusion.set_confirmed(true);
    assert!(h
        .ledger
        .submit_deposit_tx(&ctx, &serialize_hex(&tx), 1, dummy_proof())
        .await
        .unwrap());
    // only the excess comes back
    let refunds = h.ledger.state_mut().take_refunds();
    assert_eq!(refunds[0].amount, 300);
}

// ============================================================================
// 3. Withdrawal PSBT policy
// ============================================================================

#[tokio::test]
async fn test_psbt_cannot_spend_foreign_deposit() {
    let mut h = TestHarness::new().await;
    let (alice_sk, alice) = test_keypair(1);
    let (_, bob) = test_keypair(2);
    let mine = h.deposit(&alice, 144, 10_000).await;
    let theirs = h.deposit(&bob, 144, 10_000).await;
    h.queue(&alice_sk, 10_000).await;
    h.advance(WAITING_TIME_MS);

    let mut psbt = withdrawal_psbt(h.ledger.state(), &[mine, theirs], 19_000, None);
    sign_partial(&mut psbt, h.ledger.state(), 0, &alice_sk);
    let ctx = h.ctx("alice");
    assert_eq!(
        h.ledger
            .sign_withdrawal(&ctx, &psbt.serialize_hex(), &alice, 0, None)
            .await,
        Err(LedgerError::DepositNotActive)
    );
    assert!(h
        .ledger
        .state()
        .account(&alice)
        .unwrap()
        .pending_sign_psbt
        .is_none());
}

#[tokio::test]
async fn test_psbt_limited_by_queue() {
    let mut h = TestHarness::new().await;
    let (sk, user) = test_keypair(1);
    let deposit = h.deposit(&user, 144, 50_000).await;
    h.queue(&sk, 10_000).await;
    h.advance(WAITING_TIME_MS);

    // 40k back into custody would be fine; 30k is not
    let mut psbt = withdrawal_psbt(h.ledger.state(), &[deposit], 19_000, Some(30_000));
    sign_partial(&mut psbt, h.ledger.state(), 0, &sk);
    let ctx = h.ctx("alice");
    assert_eq!(
        h.ledger
            .sign_withdrawal(&ctx, &psbt.serialize_hex(), &user, 0, Some(2))
            .await,
        Err(LedgerError::WithdrawalExceedsQueue)
    );

    // without naming the embed output the change is not counted
    let mut psbt = withdrawal_psbt(h.ledger.state(), &[deposit], 9_000, Some(40_000));
    sign_partial(&mut psbt, h.ledger.state(), 0, &sk);
    assert_eq!(
        h.ledger
            .sign_withdrawal(&ctx, &psbt.serialize_hex(), &user, 0, None)
            .await,
        Err(LedgerError::WithdrawalExceedsQueue)
    );
    assert!(h
        .ledger
        .sign_withdrawal(&ctx, &psbt.serialize_hex(), &user, 0, Some(2))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_reinvest_must_return_to_owner() {
    let mut h = TestHarness::new().await;
    let (sk, user) = test_keypair(1);
    let (_, bob) = test_keypair(2);
    let deposit = h.deposit(&user, 144, 50_000).await;
    h.queue(&sk, 10_000).await;
    h.advance(WAITING_TIME_MS);

    let mut psbt = withdrawal_psbt(h.ledger.state(), &[deposit], 9_000, Some(40_000));
    psbt.unsigned_tx.output[1].script_pubkey = deposit_script_pubkey(&bob, &h.custodian, 144);
    psbt.unsigned_tx.output[2].script_pubkey =
        DepositEmbedMsg::v1(1, &bob, 144).to_script().unwrap();
    sign_partial(&mut psbt, h.ledger.state(), 0, &sk);

    let ctx = h.ctx("alice");
    assert_eq!(
        h.ledger
            .sign_withdrawal(&ctx, &psbt.serialize_hex(), &user, 0, Some(2))
            .await,
        Err(LedgerError::PsbtReinvestPubkeyMismatch)
    );
}

#[tokio::test]
async fn test_partial_sig_must_be_users() {
    let mut h = TestHarness::new().await;
    let (sk, user) = test_keypair(1);
    let (other_sk, _) = test_keypair(2);
    let deposit = h.deposit(&user, 144, 10_000).await;
    h.queue(&sk, 10_000).await;
    h.advance(WAITING_TIME_MS);
    let ctx = h.ctx("alice");

    let unsigned = withdrawal_psbt(h.ledger.state(), &[deposit], 9_000, None);
    assert_eq!(
        h.ledger
            .sign_withdrawal(&ctx, &unsigned.serialize_hex(), &user, 0, None)
            .await,
        Err(LedgerError::MissingPartialSig)
    );

    // someone else's signature filed under the user's key
    let mut forged = unsigned.clone();
    sign_partial(&mut forged, h.ledger.state(), 0, &other_sk);
    let sig = *forged.inputs[0].partial_sigs.values().next().unwrap();
    forged.inputs[0].partial_sigs.clear();
    forged.inputs[0].partial_sigs.insert(user, sig);
    assert_eq!(
        h.ledger
            .sign_withdrawal(&ctx, &forged.serialize_hex(), &user, 0, None)
            .await,
        Err(LedgerError::InvalidPartialSig)
    );
}

// ============================================================================
// 4. Oracles and admin
// ============================================================================

#[tokio::test]
async fn test_signer_with_wrong_key_is_refused() {
    let mut h = TestHarness::new().await;
    let (sk, user) = test_keypair(1);
    let deposit = h.deposit(&user, 144, 10_000).await;
    h.queue(&sk, 10_000).await;
    h.advance(WAITING_TIME_MS);

    let owner = CallContext::new(OWNER, h.now);
    let ledger_id = h.ledger.state().config().ledger_id.clone();
    h.ledger
        .set_signing_oracle(&owner, Arc::new(MockSigningOracle::random(ledger_id)))
        .unwrap();

    let mut psbt = withdrawal_psbt(h.ledger.state(), &[deposit], 9_000, None);
    sign_partial(&mut psbt, h.ledger.state(), 0, &sk);
    let ctx = h.ctx("alice").with_attached(100);
    assert_eq!(
        h.ledger
            .sign_withdrawal(&ctx, &psbt.serialize_hex(), &user, 0, None)
            .await,
        Ok(None)
    );
    assert_eq!(h.ledger.state_mut().take_refunds()[0].amount, 100);

    let account = h.ledger.state().account(&user).unwrap();
    assert_eq!(account.queue_withdrawal_amount, 10_000);
    assert!(account
        .pending_sign_psbt
        .as_ref()
        .unwrap()
        .signed_inputs
        .is_empty());
}

#[tokio::test]
async fn test_pause_blocks_user_operations() {
    let mut h = TestHarness::new().await;
    let (sk, user) = test_keypair(1);
    let deposit = h.deposit(&user, 144, 10_000).await;
    let owner = CallContext::new(OWNER, h.now);
    h.ledger.state_mut().set_paused(&owner, true).unwrap();

    let ctx = h.ctx("alice");
    let tx = build_deposit_tx(&user, &h.custodian, 144, 20_000, 0);
    assert_eq!(
        h.ledger
            .submit_deposit_tx(&ctx, &serialize_hex(&tx), 1, dummy_proof())
            .await,
        Err(LedgerError::Paused)
    );
    let sig = satvault_ledger::test_utils::sign_withdrawal_message(&sk, 0, 10_000);
    assert_eq!(
        h.ledger
            .queue_withdrawal(&ctx, &user, 10_000, &sig, SigType::Ecdsa)
            .await,
        Err(LedgerError::Paused)
    );
    let exit = solo_tx(h.ledger.state(), &deposit, &sk, 144, 9_000);
    assert_eq!(
        h.ledger
            .submit_withdrawal_tx(&ctx, &serialize_hex(&exit), &user, dummy_proof())
            .await,
        Err(LedgerError::Paused)
    );

    h.ledger.state_mut().set_paused(&owner, false).unwrap();
    assert!(h
        .ledger
        .submit_withdrawal_tx(&ctx, &serialize_hex(&exit), &user, dummy_proof())
        .await
        .unwrap());
    assert_eq!(
        h.ledger.state().deposit(&deposit).unwrap().status,
        DepositStatus::Withdrawn
    );
}

#[tokio::test]
async fn test_foreign_witness_script_rejected() {
    let mut h = TestHarness::new().await;
    let (sk, user) = test_keypair(1);
    let (_, stranger) = test_keypair(3);
    let deposit = h.deposit(&user, 144, 10_000).await;

    let mut tx = solo_tx(h.ledger.state(), &deposit, &sk, 144, 9_000);
    let elements: Vec<Vec<u8>> = tx.input[0].witness.iter().map(|e| e.to_vec()).collect();
    let foreign = build_deposit_script(&user, &stranger, 144);
    tx.input[0].witness.clear();
    for element in &elements[..elements.len() - 1] {
        tx.input[0].witness.push(element);
    }
    tx.input[0].witness.push(foreign.as_bytes());

    let ctx = h.ctx("relayer");
    assert_eq!(
        h.ledger
            .submit_withdrawal_tx(&ctx, &serialize_hex(&tx), &user, dummy_proof())
            .await,
        Err(LedgerError::InvalidWithdrawalWitness)
    );
    assert!(h.ledger.state().deposit(&deposit).unwrap().is_active());

    // a spend that touches none of the user's deposits
    let mut other = tx.clone();
    other.input[0].previous_output.vout += 7;
    assert_eq!(
        h.ledger
            .submit_withdrawal_tx(&ctx, &serialize_hex(&other), &user, dummy_proof())
            .await,
        Err(LedgerError::NotWithdrawalTx)
    );
}
