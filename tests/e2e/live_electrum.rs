//! Live inclusion checks against public Electrum servers.
//!
//! Run with: cargo test -p satvault-e2e --test live_electrum -- --ignored

use bitcoin::Network;
use satvault_electrum::{default_server, ElectrumClient, ElectrumInclusionOracle};
use satvault_ledger::{InclusionOracle, InclusionProof, TxProof};

fn mainnet() -> ElectrumClient {
    ElectrumClient::new(default_server(Network::Bitcoin), Network::Bitcoin).unwrap()
}

#[tokio::test]
#[ignore = "requires network access"]
async fn test_recent_transaction_inclusion() {
    let client = mainnet();
    let tip = client.get_height().unwrap();
    let (txid, proof) = client.get_tx_proof_at(tip - 10, 1).unwrap();
    let oracle = ElectrumInclusionOracle::new(client);

    assert!(oracle
        .verify_transaction_inclusion(&InclusionProof::new(txid, proof.clone(), 6))
        .await
        .unwrap());

    // wrong position in the block
    let shifted = TxProof {
        tx_index: proof.tx_index + 1,
        ..proof.clone()
    };
    assert!(!oracle
        .verify_transaction_inclusion(&InclusionProof::new(txid, shifted, 6))
        .await
        .unwrap());

    // truncated branch
    let mut truncated = proof;
    truncated.merkle_proof.pop();
    assert!(!oracle
        .verify_transaction_inclusion(&InclusionProof::new(txid, truncated, 6))
        .await
        .unwrap());
}

#[tokio::test]
#[ignore = "requires network access"]
async fn test_confirmation_threshold() {
    let client = mainnet();
    let tip = client.get_height().unwrap();
    let (txid, proof) = client.get_tx_proof_at(tip - 20, 0).unwrap();
    let oracle = ElectrumInclusionOracle::new(client);

    let enough = InclusionProof::new(txid, proof.clone(), 6);
    assert!(oracle.verify_transaction_inclusion(&enough).await.unwrap());

    let too_many = InclusionProof::new(txid, proof, 1_000);
    assert!(!oracle.verify_transaction_inclusion(&too_many).await.unwrap());
}

#[tokio::test]
#[ignore = "requires network access"]
async fn test_block_outside_search_window() {
    let client = mainnet();
    let tip = client.get_height().unwrap();
    let (txid, proof) = client.get_tx_proof_at(tip - 50, 0).unwrap();
    let oracle = ElectrumInclusionOracle::new(client).with_search_window(20);

    let request = InclusionProof::new(txid, proof, 1);
    assert!(!oracle.verify_transaction_inclusion(&request).await.unwrap());
}
