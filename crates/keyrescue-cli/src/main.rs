//! keyrescue: sweep a 2-of-3 HD multisig wallet using only its keycard
//!
//! Finds the wallet from the three keycard keys, collects every unspent
//! output, signs a single sweep with the user and backup keys and
//! broadcasts it through Electrum.
//!
//! # Usage
//!
//! ```bash
//! keyrescue --config /path/to/keyrescue.toml
//! keyrescue --config keyrescue.toml --nosend   # Sign only, print the hex
//! keyrescue --config keyrescue.toml --validate # Validate config and exit
//! ```

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use keyrescue_core::SjclDecryptor;
use keyrescue_electrum::ElectrumClient;
use keyrescue_recover::{recover, BroadcastStatus, RecoveryOptions, RecoverySession};

use crate::config::RecoveryConfig;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    // Decrypted keys must not end up in a core file
    keyrescue_core::memory::disable_core_dumps();

    // Parse CLI args by hand
    let args: Vec<String> = std::env::args().collect();

    let mut config_path: Option<PathBuf> = None;
    let mut no_send = false;
    let mut testnet = false;
    let mut validate_only = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    config_path = Some(PathBuf::from(&args[i]));
                } else {
                    anyhow::bail!("--config requires a path argument");
                }
            }
            "--nosend" | "--dry-run" => {
                no_send = true;
            }
            "--testnet" => {
                testnet = true;
            }
            "--validate" => {
                validate_only = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--version" | "-V" => {
                println!("keyrescue {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            other => {
                anyhow::bail!("Unknown argument: {}", other);
            }
        }
        i += 1;
    }

    // Load config
    let mut config = match &config_path {
        Some(path) => RecoveryConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => RecoveryConfig::default(),
    };

    // Env overrides, then flags
    let ignored_overrides = config.apply_env_overrides();
    if no_send {
        config.recovery.dry_run = true;
    }
    if testnet {
        config.bitcoin.network = "testnet".to_string();
    }

    config
        .validate()
        .context("Configuration validation failed")?;

    // Init logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log.level))
        .init();
    for message in &ignored_overrides {
        log::warn!("{}", message);
    }

    let network = config.network()?;
    let electrum_url = config.electrum_url()?;

    if validate_only {
        println!("✅ Configuration is valid.");
        println!("  Network:       {}", network);
        println!("  Electrum:      {}", electrum_url);
        println!("  Timeout:       {} secs", config.bitcoin.timeout_secs);
        println!("  Destination:   {}", config.recovery.destination);
        println!("  Dry run:       {}", config.recovery.dry_run);
        println!("  Passphrase:    {}", config.keys.passphrase.is_some());
        return Ok(());
    }

    // Destination is checked before any network traffic
    let options = RecoveryOptions::new(
        &config.recovery.destination,
        network,
        config.recovery.dry_run,
    )?;

    let mut session = RecoverySession::from_keycard(
        &config.keys.user,
        &config.keys.backup,
        &config.keys.bitgo,
        config.passphrase(),
        &SjclDecryptor,
        network,
    )?;
    log::info!("Keys resolved");

    let client = ElectrumClient::new(&electrum_url, config.bitcoin.timeout_secs)
        .with_context(|| format!("Failed to connect to {}", electrum_url))?;

    let outcome = recover(&mut session, &client, &options)?;

    log::info!(
        "Recovering {} from {} inputs (fee {})",
        outcome.recovered,
        outcome.input_count,
        outcome.fee
    );
    println!("{}", outcome.tx_hex);

    match outcome.status {
        BroadcastStatus::Sent(txid) => {
            log::info!("Sent {} to {}: {}", outcome.recovered, options.destination(), txid);
        }
        BroadcastStatus::NotSent => {
            log::info!(
                "Not sending {} (dry run); broadcast the hex above to complete recovery",
                outcome.txid
            );
        }
    }

    Ok(())
}

fn print_help() {
    println!(
        r#"keyrescue: recover funds from a 2-of-3 HD multisig wallet keycard

USAGE:
    keyrescue [OPTIONS]

OPTIONS:
    -c, --config <PATH>   Config file path (TOML)
    --nosend, --dry-run   Sign the transaction but do not broadcast it
    --testnet             Use the Bitcoin testnet
    --validate            Validate configuration and exit
    -h, --help            Show this help message
    -V, --version         Show version

ENVIRONMENT VARIABLES (override config file):
    KEYRESCUE_USER_KEY        Keycard box A (user key, xprv or ciphertext)
    KEYRESCUE_BACKUP_KEY      Keycard box B (backup key, xprv or ciphertext)
    KEYRESCUE_BITGO_KEY       Keycard box C (BitGo key, xpub)
    KEYRESCUE_PASSPHRASE      Wallet passphrase for encrypted keys
    KEYRESCUE_DESTINATION     Address receiving the funds
    KEYRESCUE_NETWORK         Bitcoin network (bitcoin/testnet/signet/regtest)
    KEYRESCUE_ELECTRUM_URL    Electrum server URL
    KEYRESCUE_TIMEOUT_SECS    Electrum timeout in seconds (1-255)
    KEYRESCUE_LOG_LEVEL       Log level (error/warn/info/debug/trace)

EXAMPLES:
    # Sweep to a new address
    keyrescue --config keyrescue.toml

    # Sign only; the hex can be broadcast later
    keyrescue --config keyrescue.toml --nosend

    # Validate configuration
    keyrescue --config keyrescue.toml --validate
"#
    );
}
