//! Broadcaster

use bitcoin::consensus::encode::serialize_hex;
use bitcoin::Txid;

use crate::error::RecoveryError;
use crate::oracle::ChainOracle;
use crate::session::RecoverySession;

/// What happened to the signed transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastStatus {
    /// Accepted by the oracle under this id
    Sent(Txid),
    /// Dry run; nothing was submitted
    NotSent,
}

/// Serialize the signed sweep and submit it unless `dry_run` is set.
///
/// Returns the transaction hex along with the outcome.
pub fn broadcast_transaction(
    session: &RecoverySession,
    oracle: &dyn ChainOracle,
    dry_run: bool,
) -> Result<(String, BroadcastStatus), RecoveryError> {
    let pending = session
        .transaction
        .as_ref()
        .ok_or_else(|| RecoveryError::NoFunds("no transaction has been built".into()))?;
    if !pending.complete {
        return Err(RecoveryError::IncompleteTransaction {
            input: 0,
            reason: "transaction has not been signed".into(),
        });
    }

    let tx_hex = serialize_hex(&pending.tx);
    if dry_run {
        log::info!("Dry run: not broadcasting {}", pending.tx.compute_txid());
        return Ok((tx_hex, BroadcastStatus::NotSent));
    }

    let txid = oracle
        .broadcast(&tx_hex)
        .map_err(|e| RecoveryError::Broadcast(e.to_string()))?;
    if txid != pending.tx.compute_txid() {
        log::warn!(
            "Oracle reported txid {} but the transaction hashes to {}",
            txid,
            pending.tx.compute_txid()
        );
    }
    log::info!("Broadcast {}", txid);

    Ok((tx_hex, BroadcastStatus::Sent(txid)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{build_transaction, sign_transaction};
    use crate::test_utils::{funded_session, test_destination, MockOracle};

    fn signed_session() -> RecoverySession {
        let mut session = funded_session(&[100_000]);
        build_transaction(&mut session, &test_destination()).unwrap();
        sign_transaction(&mut session).unwrap();
        session
    }

    #[test]
    fn test_dry_run_skips_oracle() {
        let session = signed_session();
        let oracle = MockOracle::new();

        let (tx_hex, status) = broadcast_transaction(&session, &oracle, true).unwrap();
        assert_eq!(status, BroadcastStatus::NotSent);
        assert_eq!(tx_hex, serialize_hex(&session.transaction().unwrap().tx));
        assert!(oracle.broadcasts().is_empty());
    }

    #[test]
    fn test_broadcast_reports_txid() {
        let session = signed_session();
        let oracle = MockOracle::new();

        let (tx_hex, status) = broadcast_transaction(&session, &oracle, false).unwrap();
        let expected = session.transaction().unwrap().tx.compute_txid();
        assert_eq!(status, BroadcastStatus::Sent(expected));
        assert_eq!(oracle.broadcasts(), vec![tx_hex]);
    }

    #[test]
    fn test_rejection_is_broadcast_error() {
        let session = signed_session();
        let oracle = MockOracle::new().rejecting_broadcasts("min relay fee not met");

        let err = broadcast_transaction(&session, &oracle, false).unwrap_err();
        match err {
            RecoveryError::Broadcast(reason) => assert!(reason.contains("min relay fee")),
            other => panic!("expected broadcast error, got {other}"),
        }
    }

    #[test]
    fn test_unsigned_transaction_is_not_broadcast() {
        let mut session = funded_session(&[100_000]);
        build_transaction(&mut session, &test_destination()).unwrap();
        let oracle = MockOracle::new();

        let result = broadcast_transaction(&session, &oracle, false);
        assert!(matches!(
            result,
            Err(RecoveryError::IncompleteTransaction { .. })
        ));
        assert!(oracle.broadcasts().is_empty());
    }
}
