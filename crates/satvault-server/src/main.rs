//! SatVault Server: operator tool for a SatVault ledger
//!
//! Loads the ledger state from the data directory and answers operator
//! queries: summaries, account views, deposit dry runs, and inclusion checks
//! against an Electrum server.
//!
//! # Usage
//!
//! ```bash
//! satvault-server --config /path/to/satvault-server.toml --summary
//! satvault-server --account 02ab...
//! satvault-server --dry-run-deposit 0200... --embed-vout 1
//! satvault-server --validate
//! ```

mod commands;
mod config;

use anyhow::{Context, Result};
use std::path::PathBuf;

enum Command {
    Validate,
    Summary,
    Account(String),
    Deposits(String),
    DryRunDeposit {
        tx_hex: String,
        embed_vout: u64,
    },
    CheckInclusion {
        txid: String,
        block_hash: String,
        tx_index: u64,
        proof: String,
    },
}

fn next_value(args: &[String], i: &mut usize, flag: &str) -> Result<String> {
    *i += 1;
    match args.get(*i) {
        Some(v) => Ok(v.clone()),
        None => anyhow::bail!("{} requires an argument", flag),
    }
}

fn main() -> Result<()> {
    // Parse CLI args
    let args: Vec<String> = std::env::args().collect();

    let mut config_path = PathBuf::from("/config/satvault-server.toml");
    let mut command = None;
    let mut embed_vout: Option<u64> = None;
    let mut block_hash: Option<String> = None;
    let mut tx_index: Option<u64> = None;
    let mut proof = String::new();

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--config" | "-c" => {
                config_path = PathBuf::from(next_value(&args, &mut i, flag)?);
            }
            "--validate" => command = Some(Command::Validate),
            "--summary" => command = Some(Command::Summary),
            "--account" => command = Some(Command::Account(next_value(&args, &mut i, flag)?)),
            "--deposits" => command = Some(Command::Deposits(next_value(&args, &mut i, flag)?)),
            "--dry-run-deposit" => {
                command = Some(Command::DryRunDeposit {
                    tx_hex: next_value(&args, &mut i, flag)?,
                    embed_vout: 0,
                })
            }
            "--embed-vout" => {
                let v = next_value(&args, &mut i, flag)?;
                embed_vout = Some(v.parse().context("--embed-vout must be a number")?);
            }
            "--check-inclusion" => {
                command = Some(Command::CheckInclusion {
                    txid: next_value(&args, &mut i, flag)?,
                    block_hash: String::new(),
                    tx_index: 0,
                    proof: String::new(),
                })
            }
            "--block-hash" => block_hash = Some(next_value(&args, &mut i, flag)?),
            "--tx-index" => {
                let v = next_value(&args, &mut i, flag)?;
                tx_index = Some(v.parse().context("--tx-index must be a number")?);
            }
            "--proof" => proof = next_value(&args, &mut i, flag)?,
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--version" | "-V" => {
                println!("satvault-server {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            other => {
                anyhow::bail!("Unknown argument: {}", other);
            }
        }
        i += 1;
    }

    // Fill in the options that belong to the chosen command
    let command = match command {
        Some(Command::DryRunDeposit { tx_hex, .. }) => Command::DryRunDeposit {
            tx_hex,
            embed_vout: embed_vout.context("--dry-run-deposit requires --embed-vout")?,
        },
        Some(Command::CheckInclusion { txid, .. }) => Command::CheckInclusion {
            txid,
            block_hash: block_hash.context("--check-inclusion requires --block-hash")?,
            tx_index: tx_index.context("--check-inclusion requires --tx-index")?,
            proof,
        },
        Some(other) => other,
        None => Command::Summary,
    };

    // Load config
    let mut server_config = config::ServerConfig::from_file(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    // Apply env overrides
    server_config
        .apply_env_overrides()
        .context("Invalid environment override")?;

    // Validate
    server_config
        .validate()
        .context("Configuration validation failed")?;

    // Init logger
    std::env::set_var("RUST_LOG", &server_config.server.log_level);
    env_logger::init();

    match command {
        Command::Validate => {
            println!("✅ Configuration is valid.");
            println!("  Network:       {}", server_config.bitcoin.network);
            println!("  Electrum:      {}", server_config.bitcoin.electrum_url);
            println!("  State file:    {}", server_config.state_path().display());
            println!("  Ledger id:     {}", server_config.ledger.ledger_id);
            println!("  Owner:         {}", server_config.ledger.owner_id);
            println!("  Confirmations: {}", server_config.ledger.n_confirmation);
            println!(
                "  Solo heights:  {:?}",
                server_config.ledger.solo_withdrawal_seq_heights
            );
        }
        Command::Summary => {
            let state = commands::open_state(&server_config)?;
            println!("{}", commands::summary(&state)?);
        }
        Command::Account(pubkey) => {
            let state = commands::open_state(&server_config)?;
            println!("{}", commands::account(&state, &pubkey)?);
        }
        Command::Deposits(pubkey) => {
            let state = commands::open_state(&server_config)?;
            println!("{}", commands::deposits(&state, &pubkey)?);
        }
        Command::DryRunDeposit { tx_hex, embed_vout } => {
            let state = commands::open_state(&server_config)?;
            println!("{}", commands::dry_run_deposit(&state, &tx_hex, embed_vout)?);
        }
        Command::CheckInclusion {
            txid,
            block_hash,
            tx_index,
            proof,
        } => {
            let proof = commands::parse_proof(&block_hash, tx_index, &proof)?;
            let rt = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
            let confirmed = rt.block_on(commands::check_inclusion(&server_config, &txid, proof))?;
            println!("{}", if confirmed { "confirmed" } else { "not confirmed" });
            if !confirmed {
                std::process::exit(2);
            }
        }
    }

    Ok(())
}

fn print_help() {
    println!(
        r#"SatVault Server: ledger operator tool

USAGE:
    satvault-server [OPTIONS] [COMMAND]

OPTIONS:
    -c, --config <PATH>   Config file path (default: /config/satvault-server.toml)
    -h, --help            Show this help message
    -V, --version         Show version

COMMANDS:
    --validate                     Validate config file and exit
    --summary                      Print the ledger summary (default)
    --account <PUBKEY>             Print one account
    --deposits <PUBKEY>            List an account's active and withdrawn deposits
    --dry-run-deposit <TX_HEX>     Run deposit admission checks
        --embed-vout <N>           Output carrying the embed message
    --check-inclusion <TXID>       Check a transaction's inclusion via Electrum
        --block-hash <HASH>        Block the transaction is in
        --tx-index <N>             Position of the transaction in the block
        --proof <H1,H2,...>        Merkle branch, leaf level first

ENVIRONMENT VARIABLES (override config file):
    SATVAULT_DATA_DIR         Data directory path
    SATVAULT_LOG_LEVEL        Log level (error/warn/info/debug/trace)
    SATVAULT_NETWORK          Bitcoin network (bitcoin/testnet/signet/regtest)
    SATVAULT_ELECTRUM_URL     Electrum server URL
    SATVAULT_LEDGER_ID        Ledger identity
    SATVAULT_OWNER_ID         Ledger owner
    SATVAULT_N_CONFIRMATION   Confirmations required for inclusion proofs

EXAMPLES:
    # Ledger summary
    satvault-server --config /path/to/config.toml --summary

    # Would this deposit be admitted?
    satvault-server --config config.toml --dry-run-deposit 0200... --embed-vout 1

    # Validate configuration
    satvault-server --config config.toml --validate
"#
    );
}
