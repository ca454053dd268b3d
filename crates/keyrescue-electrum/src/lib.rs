//! keyrescue Electrum Client
//!
//! Provides the block-chain data the recovery pipeline needs:
//! - Address activity (history length and balance) for path search and scanning
//! - Unspent outputs of funded addresses
//! - Raw transaction broadcasting
//!
//! # Security
//!
//! - Use SSL/TLS connections (ssl://); the server learns every probed address
//! - Private keys never leave the process
//!
//! # Example
//!
//! ```ignore
//! use keyrescue_electrum::{default_server, ElectrumClient};
//! use bitcoin::Network;
//!
//! let client = ElectrumClient::new(default_server(Network::Bitcoin), 30)?;
//! let utxos = client.get_utxos(&address)?;
//! ```

use bitcoin::{Address, Amount, Network, OutPoint, Script, ScriptBuf, Txid};
use electrum_client::{ConfigBuilder, ElectrumApi, Error as ElectrumError};
use thiserror::Error;

/// Default socket timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u8 = 30;

/// Errors from Electrum operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Electrum protocol error: {0}")]
    Protocol(#[from] ElectrumError),

    #[error("Broadcast failed: {0}")]
    BroadcastFailed(String),
}

/// A UTXO (unspent transaction output) discovered via Electrum
#[derive(Debug, Clone)]
pub struct Utxo {
    /// The outpoint (txid:vout)
    pub outpoint: OutPoint,
    /// Value in satoshis
    pub value: Amount,
    /// The script pubkey
    pub script_pubkey: ScriptBuf,
}

/// Electrum client for Bitcoin network operations
pub struct ElectrumClient {
    client: electrum_client::Client,
}

impl ElectrumClient {
    /// Create a new Electrum client
    ///
    /// # Arguments
    /// * `url` - Electrum server URL (e.g., "ssl://electrum.blockstream.info:60002")
    /// * `timeout_secs` - Socket read/write timeout; every call fails after it
    pub fn new(url: &str, timeout_secs: u8) -> Result<Self, Error> {
        if !url.starts_with("ssl://") {
            log::warn!("Connecting to Electrum without SSL - probed addresses are visible in transit");
        }

        let config = ConfigBuilder::new().timeout(Some(timeout_secs)).build();
        let client = electrum_client::Client::from_config(url, config)
            .map_err(|e: ElectrumError| Error::Connection(e.to_string()))?;

        log::debug!("Connected to {} ({} s timeout)", url, timeout_secs);
        Ok(Self { client })
    }

    /// Number of transactions that ever touched `script`, confirmed or not
    pub fn history_len(&self, script: &Script) -> Result<u64, Error> {
        let history = self.client.script_get_history(script)?;
        Ok(history.len() as u64)
    }

    /// Get the balance for a script
    pub fn get_balance(&self, script: &Script) -> Result<Amount, Error> {
        let balance = self.client.script_get_balance(script)?;
        // Unconfirmed can be negative (pending spends)
        let total = balance.confirmed as i64 + balance.unconfirmed;
        Ok(Amount::from_sat(total.max(0) as u64))
    }

    /// Get UTXOs for a script
    pub fn get_utxos_for_script(&self, script: &Script) -> Result<Vec<Utxo>, Error> {
        let unspent = self.client.script_list_unspent(script)?;

        let utxos: Vec<Utxo> = unspent
            .into_iter()
            .map(|u| Utxo {
                outpoint: OutPoint {
                    txid: u.tx_hash,
                    vout: u.tx_pos as u32,
                },
                value: Amount::from_sat(u.value),
                script_pubkey: script.to_owned(),
            })
            .collect();

        Ok(utxos)
    }

    /// Get UTXOs for an address
    pub fn get_utxos(&self, address: &Address) -> Result<Vec<Utxo>, Error> {
        self.get_utxos_for_script(address.script_pubkey().as_script())
    }

    /// Broadcast a serialized transaction
    ///
    /// # Returns
    /// The txid reported by the server
    pub fn broadcast_raw(&self, raw_tx: &[u8]) -> Result<Txid, Error> {
        self.client
            .transaction_broadcast_raw(raw_tx)
            .map_err(|e: ElectrumError| Error::BroadcastFailed(e.to_string()))
    }

}

/// Default Electrum servers for each network
pub fn default_server(network: Network) -> &'static str {
    match network {
        Network::Bitcoin => "ssl://electrum.blockstream.info:60002",
        Network::Testnet => "ssl://electrum.blockstream.info:60004",
        Network::Signet => "ssl://mempool.space:60602",
        Network::Regtest => "tcp://127.0.0.1:60401",
        _ => "ssl://electrum.blockstream.info:60002",
    }
}
