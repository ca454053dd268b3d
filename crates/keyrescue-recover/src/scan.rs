//! Sub-address scanner
//!
//! Walks `<base>/<chain>/<index>` for the receive chain (0) and then the
//! change chain (1), recording every address that currently holds funds. A
//! chain ends after [`GAP_LIMIT`] consecutive addresses without any
//! transaction history; balance plays no part in that count.

use bitcoin::Amount;

use crate::error::RecoveryError;
use crate::oracle::ChainOracle;
use crate::session::{RecoverySession, SubAddress};

/// Consecutive unused addresses that end a chain
pub const GAP_LIMIT: u32 = 20;

/// Receive chain, then change chain
pub const CHAINS: [u32; 2] = [0, 1];

/// Scan both chains under the discovered base paths.
///
/// Returns the number of funded sub-addresses recorded in the session.
pub fn scan_sub_addresses(
    session: &mut RecoverySession,
    oracle: &dyn ChainOracle,
) -> Result<usize, RecoveryError> {
    let base_paths = session
        .wallet
        .as_ref()
        .map(|wallet| wallet.base_paths.clone())
        .ok_or(RecoveryError::WalletNotFound)?;

    log::info!("Searching for funded wallet sub-addresses");
    for chain in CHAINS {
        let mut unused_streak = 0;
        let mut index = 0;

        while unused_streak < GAP_LIMIT {
            let sub = SubAddress::derive(session, &base_paths, chain, index)?;
            let activity = oracle.address_activity(&sub.address)?;
            log::debug!(
                "Chain {} index {}: {} ({} txs)",
                chain,
                index,
                sub.address,
                activity.transaction_count
            );

            if activity.transaction_count == 0 {
                unused_streak += 1;
            } else {
                unused_streak = 0;
            }

            if activity.balance > Amount::ZERO {
                log::info!("Found {} at {}", activity.balance, sub.address);
                session.sub_addresses.insert(sub.address.to_string(), sub);
            }

            index += 1;
        }
        log::debug!("Chain {} ended after {} addresses", chain, index);
    }

    Ok(session.sub_addresses.len())
}
