//! In-memory oracles for local runs and tests

use crate::kdf::derive_custodian_secret;
use crate::oracle::{
    Bip322Verifier, InclusionOracle, InclusionProof, OracleError, SignOutcome, SignRequest,
    SigningOracle,
};
use async_trait::async_trait;
use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};
use bitcoin::PublicKey;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Inclusion oracle answering with a fixed verdict
#[derive(Debug)]
pub struct MockInclusionOracle {
    confirmed: AtomicBool,
    requests: Mutex<Vec<InclusionProof>>,
}

impl MockInclusionOracle {
    pub fn new(confirmed: bool) -> Self {
        Self {
            confirmed: AtomicBool::new(confirmed),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set_confirmed(&self, confirmed: bool) {
        self.confirmed.store(confirmed, Ordering::SeqCst);
    }

    /// Every proof seen so far
    pub fn requests(&self) -> Vec<InclusionProof> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl InclusionOracle for MockInclusionOracle {
    fn id(&self) -> &str {
        "mock-inclusion"
    }

    async fn verify_transaction_inclusion(
        &self,
        proof: &InclusionProof,
    ) -> Result<bool, OracleError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(proof.clone());
        }
        Ok(self.confirmed.load(Ordering::SeqCst))
    }
}

/// Signing oracle holding a root secret in memory
pub struct MockSigningOracle {
    root_secret: SecretKey,
    ledger_id: String,
    failing: AtomicBool,
}

impl MockSigningOracle {
    pub fn new(root_secret: SecretKey, ledger_id: impl Into<String>) -> Self {
        Self {
            root_secret,
            ledger_id: ledger_id.into(),
            failing: AtomicBool::new(false),
        }
    }

    /// Fresh random root key
    pub fn random(ledger_id: impl Into<String>) -> Self {
        let secp = Secp256k1::new();
        let (root_secret, _) = secp.generate_keypair(&mut secp256k1::rand::thread_rng());
        Self::new(root_secret, ledger_id)
    }

    /// Make every following `sign` call fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl SigningOracle for MockSigningOracle {
    fn id(&self) -> &str {
        "mock-signer"
    }

    async fn root_public_key(&self) -> Result<PublicKey, OracleError> {
        let secp = Secp256k1::signing_only();
        Ok(PublicKey::new(self.root_secret.public_key(&secp)))
    }

    async fn sign(&self, request: SignRequest) -> SignOutcome {
        if self.failing.load(Ordering::SeqCst) {
            return SignOutcome::Failed("signer offline".into());
        }
        let child = match derive_custodian_secret(&self.root_secret, &self.ledger_id, &request.path)
        {
            Ok(sk) => sk,
            Err(e) => return SignOutcome::Failed(e.to_string()),
        };
        let secp = Secp256k1::signing_only();
        let msg = Message::from_digest(request.payload);
        SignOutcome::Signed(secp.sign_ecdsa(&msg, &child))
    }
}

/// BIP322 verifier answering with a fixed verdict
#[derive(Debug)]
pub struct MockBip322Verifier {
    valid: AtomicBool,
}

impl MockBip322Verifier {
    pub fn new(valid: bool) -> Self {
        Self {
            valid: AtomicBool::new(valid),
        }
    }

    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::SeqCst);
    }
}

#[async_trait]
impl Bip322Verifier for MockBip322Verifier {
    fn id(&self) -> &str {
        "mock-bip322"
    }

    async fn verify_bip322_full(
        &self,
        _pubkey: &PublicKey,
        _address: &str,
        _message: &str,
        _signature: &str,
    ) -> Result<bool, OracleError> {
        Ok(self.valid.load(Ordering::SeqCst))
    }
}
