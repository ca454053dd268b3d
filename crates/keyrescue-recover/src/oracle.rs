//! Block-chain data oracle
//!
//! The pipeline only needs three things from the outside world: how active
//! an address is, what it can spend, and a way to publish the sweep.
//! [`ChainOracle`] is that seam; [`ElectrumClient`] fulfils it in production
//! and `test_utils::MockOracle` in tests.

use bitcoin::{Address, Amount, OutPoint, ScriptBuf, Txid};
use keyrescue_electrum::{ElectrumClient, Error as ElectrumError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("{operation} for {subject} failed: {reason}")]
    Request {
        operation: &'static str,
        subject: String,
        reason: String,
    },

    #[error("Transaction rejected: {0}")]
    Rejected(String),
}

/// Transaction count and current balance of an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddressActivity {
    pub transaction_count: u64,
    pub balance: Amount,
}

/// An unspent output as reported by the oracle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleUnspent {
    pub outpoint: OutPoint,
    pub value: Amount,
    pub script_pubkey: ScriptBuf,
}

pub trait ChainOracle {
    fn address_activity(&self, address: &Address) -> Result<AddressActivity, OracleError>;

    /// Whether `address` has ever been part of a transaction
    fn has_transaction_history(&self, address: &Address) -> Result<bool, OracleError> {
        Ok(self.address_activity(address)?.transaction_count > 0)
    }

    fn list_unspents(&self, address: &Address) -> Result<Vec<OracleUnspent>, OracleError>;

    /// Submit a serialized transaction, returning its id.
    fn broadcast(&self, tx_hex: &str) -> Result<Txid, OracleError>;
}

fn request_failed(operation: &'static str, address: &Address, err: ElectrumError) -> OracleError {
    OracleError::Request {
        operation,
        subject: address.to_string(),
        reason: err.to_string(),
    }
}

impl ChainOracle for ElectrumClient {
    fn address_activity(&self, address: &Address) -> Result<AddressActivity, OracleError> {
        let script = address.script_pubkey();
        let transaction_count = self
            .history_len(&script)
            .map_err(|e| request_failed("History lookup", address, e))?;
        let balance = self
            .get_balance(&script)
            .map_err(|e| request_failed("Balance lookup", address, e))?;
        Ok(AddressActivity {
            transaction_count,
            balance,
        })
    }

    fn has_transaction_history(&self, address: &Address) -> Result<bool, OracleError> {
        let count = self
            .history_len(&address.script_pubkey())
            .map_err(|e| request_failed("History lookup", address, e))?;
        Ok(count > 0)
    }

    fn list_unspents(&self, address: &Address) -> Result<Vec<OracleUnspent>, OracleError> {
        let utxos = self
            .get_utxos(address)
            .map_err(|e| request_failed("Unspent lookup", address, e))?;
        Ok(utxos
            .into_iter()
            .map(|u| OracleUnspent {
                outpoint: u.outpoint,
                value: u.value,
                script_pubkey: u.script_pubkey,
            })
            .collect())
    }

    fn broadcast(&self, tx_hex: &str) -> Result<Txid, OracleError> {
        let raw = hex::decode(tx_hex).map_err(|e| OracleError::Rejected(e.to_string()))?;
        self.broadcast_raw(&raw).map_err(|e| match e {
            ElectrumError::BroadcastFailed(reason) => OracleError::Rejected(reason),
            other => OracleError::Request {
                operation: "Broadcast",
                subject: "transaction".into(),
                reason: other.to_string(),
            },
        })
    }
}
