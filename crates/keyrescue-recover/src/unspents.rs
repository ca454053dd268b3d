//! Unspent aggregator

use bitcoin::Amount;

use crate::error::RecoveryError;
use crate::oracle::ChainOracle;
use crate::session::{RecoverySession, UnspentOutput};

/// Collect the unspent outputs of every funded sub-address.
///
/// Each output carries a copy of its owning sub-address so the signer has the
/// keys and redeem script at hand. Returns the total value collected.
pub fn collect_unspents(
    session: &mut RecoverySession,
    oracle: &dyn ChainOracle,
) -> Result<Amount, RecoveryError> {
    if session.sub_addresses.is_empty() {
        return Err(RecoveryError::NoFunds(
            "no funded sub-addresses were found".into(),
        ));
    }

    let mut unspents = Vec::new();
    for sub in session.sub_addresses.values() {
        let expected_script = sub.derived.multisig.script_pubkey();
        for unspent in oracle.list_unspents(&sub.address)? {
            if unspent.script_pubkey != expected_script {
                log::warn!(
                    "Skipping {}: script does not pay {}",
                    unspent.outpoint,
                    sub.address
                );
                continue;
            }
            unspents.push(UnspentOutput {
                outpoint: unspent.outpoint,
                value: unspent.value,
                script_pubkey: unspent.script_pubkey,
                owner: sub.clone(),
            });
        }
    }

    if unspents.is_empty() {
        return Err(RecoveryError::NoFunds(
            "funded sub-addresses have no unspent outputs".into(),
        ));
    }

    let total = unspents
        .iter()
        .try_fold(Amount::ZERO, |acc, u| acc.checked_add(u.value))
        .ok_or_else(|| RecoveryError::NoFunds("unspent total overflows".into()))?;

    log::info!("Collected {} unspent outputs worth {}", unspents.len(), total);
    session.unspents = unspents;
    Ok(total)
}
