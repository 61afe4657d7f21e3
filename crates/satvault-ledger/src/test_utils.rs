//! Shared test utilities for satvault-ledger tests.
//!
//! Provides deterministic keys, deposit and withdrawal transaction builders,
//! and a [`TestHarness`] wiring a ledger to the in-memory oracles. Used by
//! unit tests, the integration tests and the e2e crate.

use crate::account::Deposit;
use crate::auth::withdrawal_message;
use crate::config::LedgerConfig;
use crate::ledger::Ledger;
use crate::mock::{MockBip322Verifier, MockInclusionOracle, MockSigningOracle};
use crate::oracle::{Oracles, TxProof};
use crate::state::LedgerState;
use crate::types::{CallContext, SigType};
use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::psbt::Psbt;
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::sign_message::{signed_msg_hash, MessageSignature};
use bitcoin::transaction::Version;
use bitcoin::{
    ecdsa, Amount, BlockHash, OutPoint, PublicKey, ScriptBuf, Sequence, Transaction, TxIn, TxOut,
    Txid,
};
use satvault_script::{
    build_cooperative_witness, build_solo_witness, deposit_script_pubkey, p2wsh_sighash,
    sighash_message, DepositEmbedMsg,
};
use std::sync::Arc;

/// Owner account of test ledgers
pub const OWNER: &str = "owner";

/// Withdrawal waiting period of test ledgers (1 minute)
pub const WAITING_TIME_MS: u64 = 60_000;

/// Start of the test clock
pub const GENESIS_MS: u64 = 1_700_000_000_000;

/// Generate a deterministic keypair from a seed byte.
///
/// The secret key is `[0x01, 0x00, ..., 0x00, seed]` (32 bytes).
/// Different seed bytes produce different keys.
pub fn test_keypair(seed_byte: u8) -> (SecretKey, PublicKey) {
    let secp = Secp256k1::new();
    let mut secret_bytes = [0u8; 32];
    secret_bytes[31] = seed_byte;
    secret_bytes[0] = 0x01;
    let sk = SecretKey::from_slice(&secret_bytes).unwrap();
    (sk, PublicKey::new(sk.public_key(&secp)))
}

/// Default config with a short waiting period and BIP322 enabled.
pub fn test_config() -> LedgerConfig {
    let mut config = LedgerConfig::new(OWNER);
    config.withdrawal_waiting_time_ms = WAITING_TIME_MS;
    config.inclusion_oracle_id = "mock-inclusion".into();
    config.signing_oracle_id = "mock-signer".into();
    config.bip322_verifier_id = Some("mock-bip322".into());
    config
}

/// A proof the mock inclusion oracle accepts.
pub fn dummy_proof() -> TxProof {
    TxProof {
        tx_block_blockhash: BlockHash::all_zeros(),
        tx_index: 0,
        merkle_proof: Vec::new(),
    }
}

/// Deposit paying `value` sats to the version 1 script at output 0, with the
/// embed message at output 1.
pub fn build_deposit_tx(
    user: &PublicKey,
    custodian: &PublicKey,
    sequence_height: u16,
    value: u64,
    lock_height: u32,
) -> Transaction {
    let funding = sha256d::Hash::hash(&value.to_le_bytes());
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::from_height(lock_height).unwrap(),
        input: vec![TxIn {
            previous_output: OutPoint::new(Txid::from_raw_hash(funding), 0),
            sequence: Sequence::ENABLE_LOCKTIME_NO_RBF,
            ..Default::default()
        }],
        output: vec![
            TxOut {
                value: Amount::from_sat(value),
                script_pubkey: deposit_script_pubkey(user, custodian, sequence_height),
            },
            TxOut {
                value: Amount::ZERO,
                script_pubkey: DepositEmbedMsg::v1(0, user, sequence_height)
                    .to_script()
                    .unwrap(),
            },
        ],
    }
}

/// Hex signed-message signature over the withdrawal request text.
pub fn sign_withdrawal_message(sk: &SecretKey, nonce: u64, amount: u64) -> String {
    let secp = Secp256k1::new();
    let digest = signed_msg_hash(&withdrawal_message(nonce, amount));
    let msg = bitcoin::secp256k1::Message::from_digest(digest.to_byte_array());
    let sig = MessageSignature::new(secp.sign_ecdsa_recoverable(&msg, sk), true);
    hex::encode(sig.serialize())
}

fn payout_script() -> ScriptBuf {
    let (_, payee) = test_keypair(200);
    ScriptBuf::new_p2wpkh(&payee.wpubkey_hash().unwrap())
}

/// Withdrawal PSBT spending `inputs` (deposits of one user).
///
/// Output 0 pays `payout` sats out. With `reinvest`, output 1 returns that
/// many sats to a new 144-block deposit of the same user and output 2 carries
/// its embed message.
pub fn withdrawal_psbt(
    state: &LedgerState,
    inputs: &[OutPoint],
    payout: u64,
    reinvest: Option<u64>,
) -> Psbt {
    let user = state.deposit(&inputs[0]).unwrap().user_pubkey;
    let custodian = state.custodian_pubkey().unwrap();

    let mut output = vec![TxOut {
        value: Amount::from_sat(payout),
        script_pubkey: payout_script(),
    }];
    if let Some(value) = reinvest {
        output.push(TxOut {
            value: Amount::from_sat(value),
            script_pubkey: deposit_script_pubkey(&user, &custodian, 144),
        });
        output.push(TxOut {
            value: Amount::ZERO,
            script_pubkey: DepositEmbedMsg::v1(1, &user, 144).to_script().unwrap(),
        });
    }

    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: inputs
            .iter()
            .map(|outpoint| TxIn {
                previous_output: *outpoint,
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                ..Default::default()
            })
            .collect(),
        output,
    };
    Psbt::from_unsigned_tx(tx).unwrap()
}

fn deposit_sighash_sig(
    state: &LedgerState,
    tx: &Transaction,
    vin: usize,
    deposit: &Deposit,
    sk: &SecretKey,
) -> ecdsa::Signature {
    let secp = Secp256k1::new();
    let script = deposit.witness_script(&state.custodian_pubkey().unwrap());
    let sighash = p2wsh_sighash(tx, vin, &script, deposit.value).unwrap();
    ecdsa::Signature::sighash_all(secp.sign_ecdsa(&sighash_message(&sighash), sk))
}

/// Add a partial signature by `sk` for input `vin`.
pub fn sign_partial(psbt: &mut Psbt, state: &LedgerState, vin: usize, sk: &SecretKey) {
    let secp = Secp256k1::new();
    let deposit = state
        .deposit(&psbt.unsigned_tx.input[vin].previous_output)
        .unwrap()
        .clone();
    let sig = deposit_sighash_sig(state, &psbt.unsigned_tx, vin, &deposit, sk);
    psbt.inputs[vin]
        .partial_sigs
        .insert(PublicKey::new(sk.public_key(&secp)), sig);
}

/// Final transaction for a cooperatively signed PSBT.
pub fn cooperative_tx(
    state: &LedgerState,
    psbt: &Psbt,
    user: &PublicKey,
    custodian_sigs: &[ecdsa::Signature],
) -> Transaction {
    let custodian = state.custodian_pubkey().unwrap();
    let mut tx = psbt.unsigned_tx.clone();
    for (vin, input) in tx.input.iter_mut().enumerate() {
        let deposit = state.deposit(&input.previous_output).unwrap();
        let user_sig = psbt.inputs[vin].partial_sigs.get(user).unwrap();
        input.witness = build_cooperative_witness(
            user_sig,
            &custodian_sigs[vin],
            &deposit.witness_script(&custodian),
        );
    }
    tx
}

/// User-only exit of `deposit` after `csv` blocks, paying `payout` sats.
pub fn solo_tx(
    state: &LedgerState,
    deposit: &OutPoint,
    sk: &SecretKey,
    csv: u16,
    payout: u64,
) -> Transaction {
    let deposit = state.deposit(deposit).unwrap().clone();
    let mut tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: deposit.outpoint,
            sequence: Sequence::from_height(csv),
            ..Default::default()
        }],
        output: vec![TxOut {
            value: Amount::from_sat(payout),
            script_pubkey: payout_script(),
        }],
    };
    let sig = deposit_sighash_sig(state, &tx, 0, &deposit, sk);
    let script = deposit.witness_script(&state.custodian_pubkey().unwrap());
    tx.input[0].witness = build_solo_witness(&sig, &script);
    tx
}

/// A ledger with synced root key and in-memory oracles, plus a test clock.
pub struct TestHarness {
    pub ledger: Ledger,
    pub inclusion: Arc<MockInclusionOracle>,
    pub signer: Arc<MockSigningOracle>,
    pub bip322: Arc<MockBip322Verifier>,
    pub custodian: PublicKey,
    pub now: u64,
    funding_counter: u32,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: LedgerConfig) -> Self {
        let (root_sk, _) = test_keypair(100);
        let inclusion = Arc::new(MockInclusionOracle::new(true));
        let signer = Arc::new(MockSigningOracle::new(root_sk, config.ledger_id.clone()));
        let bip322 = Arc::new(MockBip322Verifier::new(true));
        let oracles = Oracles::new(inclusion.clone(), signer.clone()).with_bip322(bip322.clone());

        let mut ledger = Ledger::new(LedgerState::new(config).unwrap(), oracles);
        ledger.sync_root_pubkey().await.unwrap();
        let custodian = ledger.state().custodian_pubkey().unwrap();

        Self {
            ledger,
            inclusion,
            signer,
            bip322,
            custodian,
            now: GENESIS_MS,
            funding_counter: 0,
        }
    }

    /// Context for `caller` at the current test time
    pub fn ctx(&self, caller: &str) -> CallContext {
        CallContext::new(caller, self.now)
    }

    pub fn advance(&mut self, ms: u64) {
        self.now += ms;
    }

    /// Admit a fresh `value`-sat deposit of `user` and return its outpoint.
    pub async fn deposit(
        &mut self,
        user: &PublicKey,
        sequence_height: u16,
        value: u64,
    ) -> OutPoint {
        let mut tx = build_deposit_tx(user, &self.custodian, sequence_height, value, 0);
        self.funding_counter += 1;
        tx.input[0].previous_output.vout = self.funding_counter;

        let fee = self.ledger.state().config().deposit_storage_fee;
        let ctx = self.ctx("depositor").with_attached(fee);
        let ok = self
            .ledger
            .submit_deposit_tx(&ctx, &serialize_hex(&tx), 1, dummy_proof())
            .await
            .unwrap();
        assert!(ok, "deposit not admitted");
        OutPoint::new(tx.compute_txid(), 0)
    }

    /// Queue `amount` sats with a valid ECDSA request.
    pub async fn queue(&mut self, user_sk: &SecretKey, amount: u64) {
        let secp = Secp256k1::new();
        let user = PublicKey::new(user_sk.public_key(&secp));
        let nonce = self.ledger.state().account(&user).map_or(0, |a| a.nonce);
        let sig = sign_withdrawal_message(user_sk, nonce, amount);
        let ctx = self.ctx("user");
        let ok = self
            .ledger
            .queue_withdrawal(&ctx, &user, amount, &sig, SigType::Ecdsa)
            .await
            .unwrap();
        assert!(ok, "withdrawal not queued");
    }
}
