//! keyrescue Recovery Pipeline
//!
//! Sweeps a 2-of-3 HD multisig wallet to a single address using only its
//! keycard:
//!
//! 1. Find the wallet's base address under the new or legacy path layout
//! 2. Scan the receive and change chains for funded sub-addresses
//! 3. Collect their unspent outputs
//! 4. Build one transaction spending all of them, signed by user and backup
//! 5. Broadcast it, or stop at the signed hex for a dry run
//!
//! Each stage runs to completion before the next starts and any error aborts
//! the run.
//!
//! # Example
//!
//! ```ignore
//! use keyrescue_recover::{recover, RecoveryOptions, RecoverySession};
//!
//! let mut session = RecoverySession::from_keycard(user, backup, bitgo, pass, &SjclDecryptor, network)?;
//! let options = RecoveryOptions::new("bc1q...", network, false)?;
//! let outcome = recover(&mut session, &electrum, &options)?;
//! println!("{}", outcome.tx_hex);
//! ```

pub mod broadcast;
pub mod builder;
pub mod error;
pub mod oracle;
pub mod scan;
pub mod search;
pub mod session;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod unspents;

use bitcoin::address::NetworkUnchecked;
use bitcoin::{Address, Amount, Network, Txid};

pub use broadcast::BroadcastStatus;
pub use error::RecoveryError;
pub use oracle::{AddressActivity, ChainOracle, OracleError, OracleUnspent};
pub use session::{RecoverySession, SubAddress, UnspentOutput, WalletAddress};

/// Where the funds go and whether to publish the result
#[derive(Debug, Clone)]
pub struct RecoveryOptions {
    destination: Address,
    dry_run: bool,
}

impl RecoveryOptions {
    /// Validate `destination` for `network` before any oracle traffic.
    pub fn new(destination: &str, network: Network, dry_run: bool) -> Result<Self, RecoveryError> {
        Ok(Self {
            destination: parse_destination(destination, network)?,
            dry_run,
        })
    }

    pub fn destination(&self) -> &Address {
        &self.destination
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }
}

/// Result of a completed recovery
#[derive(Debug, Clone)]
pub struct RecoveryOutcome {
    /// Signed transaction, consensus-encoded hex
    pub tx_hex: String,
    pub txid: Txid,
    /// Amount paid to the destination
    pub recovered: Amount,
    pub fee: Amount,
    pub input_count: usize,
    pub status: BroadcastStatus,
}

/// Parse a destination address and check it belongs to `network`.
pub fn parse_destination(destination: &str, network: Network) -> Result<Address, RecoveryError> {
    let trimmed = destination.trim();
    if trimmed.is_empty() {
        return Err(RecoveryError::InvalidDestination("address is empty".into()));
    }
    let unchecked: Address<NetworkUnchecked> = trimmed
        .parse()
        .map_err(|e| RecoveryError::InvalidDestination(format!("{}: {}", trimmed, e)))?;
    unchecked
        .require_network(network)
        .map_err(|e| RecoveryError::InvalidDestination(format!("{}: {}", trimmed, e)))
}

/// Run the whole pipeline on `session`.
pub fn recover(
    session: &mut RecoverySession,
    oracle: &dyn ChainOracle,
    options: &RecoveryOptions,
) -> Result<RecoveryOutcome, RecoveryError> {
    search::find_wallet_address(session, oracle)?;

    let funded = scan::scan_sub_addresses(session, oracle)?;
    log::info!("Found {} funded sub-addresses", funded);

    unspents::collect_unspents(session, oracle)?;
    builder::build_transaction(session, &options.destination)?;
    let pending = builder::sign_transaction(session)?;
    let txid = pending.tx.compute_txid();
    let recovered = pending.output_value();
    let fee = pending.fee;
    let input_count = pending.tx.input.len();

    let (tx_hex, status) = broadcast::broadcast_transaction(session, oracle, options.dry_run)?;

    Ok(RecoveryOutcome {
        tx_hex,
        txid,
        recovered,
        fee,
        input_count,
        status,
    })
}
