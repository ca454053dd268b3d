//! Shared test utilities for keyrescue-recover tests.
//!
//! Provides deterministic keys, address helpers and an in-memory
//! [`ChainOracle`] that records every request made of it.

use std::cell::RefCell;
use std::collections::HashMap;

use bitcoin::bip32::{DerivationPath, Xpriv, Xpub};
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::{
    Address, Amount, CompressedPublicKey, Network, OutPoint, ScriptBuf, Transaction, Txid,
};
use keyrescue_core::{HdKey, KeyTriple};

use crate::oracle::{AddressActivity, ChainOracle, OracleError, OracleUnspent};
use crate::search::PathProbe;
use crate::session::{RecoverySession, SubAddress, UnspentOutput, WalletAddress};

/// Deterministic master key from a seed byte.
pub fn test_xpriv(seed_byte: u8) -> Xpriv {
    Xpriv::new_master(Network::Bitcoin, &[seed_byte; 32]).unwrap()
}

/// User and backup private, BitGo public only (the usual keycard).
pub fn test_keys() -> KeyTriple {
    let secp = Secp256k1::new();
    KeyTriple::new(
        test_xpriv(1),
        test_xpriv(2),
        HdKey::Public(Xpub::from_priv(&secp, &test_xpriv(3))),
    )
}

/// Same wallet as [`test_keys`] but with the BitGo private key available.
pub fn test_keys_with_private_bitgo() -> KeyTriple {
    KeyTriple::new(test_xpriv(1), test_xpriv(2), HdKey::Private(test_xpriv(3)))
}

pub fn test_session() -> RecoverySession {
    RecoverySession::new(test_keys(), Network::Bitcoin)
}

/// Multisig address of [`test_keys`] derived along per-key `paths`.
pub fn address_at(paths: [&str; 3]) -> Address {
    let secp = Secp256k1::new();
    let paths: [DerivationPath; 3] = paths.map(|p| p.parse().unwrap());
    test_keys()
        .derive(&secp, paths)
        .unwrap()
        .multisig
        .address(Network::Bitcoin)
}

/// Address probed by the new-scheme search at `address_index`.
pub fn new_scheme_address(address_index: u32) -> Address {
    let path = format!("m/0/0/0/{}", address_index);
    address_at([&path, &path, &path])
}

/// Address probed by the legacy search.
pub fn legacy_address(bitgo_key_index: u32, address_index: u32) -> Address {
    address_at([
        &format!("m/100'/101/0/{}", address_index),
        &format!("m/101/0/{}", address_index),
        &format!("m/{}/0/{}", bitgo_key_index, address_index),
    ])
}

/// Sub-address of a new-scheme wallet (base `m/0/0`).
pub fn sub_address(chain: u32, index: u32) -> Address {
    let path = format!("m/0/0/{}/{}", chain, index);
    address_at([&path, &path, &path])
}

pub fn test_txid(n: u8) -> Txid {
    Txid::from_byte_array([n; 32])
}

/// A P2WPKH destination unrelated to the wallet keys.
pub fn test_destination() -> Address {
    let secp = Secp256k1::new();
    let mut bytes = [0u8; 32];
    bytes[31] = 9;
    bytes[0] = 0x01;
    let pubkey = SecretKey::from_slice(&bytes).unwrap().public_key(&secp);
    Address::p2wpkh(&CompressedPublicKey(pubkey), Network::Bitcoin)
}

/// Session for a new-scheme wallet with one funded chain-0 sub-address per
/// entry of `values`, each holding one unspent of that many satoshis.
///
/// Skips search, scan and aggregation.
pub fn funded_session(values: &[u64]) -> RecoverySession {
    let mut session = test_session();
    let probe = PathProbe::FIRST;
    let wallet = WalletAddress::new(new_scheme_address(0), probe, probe.paths().unwrap());

    for (i, sats) in values.iter().enumerate() {
        let sub = SubAddress::derive(&session, &wallet.base_paths, 0, i as u32).unwrap();
        session.unspents.push(UnspentOutput {
            outpoint: OutPoint::new(test_txid(i as u8 + 1), 0),
            value: Amount::from_sat(*sats),
            script_pubkey: sub.address.script_pubkey(),
            owner: sub.clone(),
        });
        session.sub_addresses.insert(sub.address.to_string(), sub);
    }
    session.wallet = Some(wallet);
    session
}

/// In-memory chain oracle.
///
/// Unknown addresses have no history and no funds. Every activity probe,
/// unspent query and broadcast is recorded in call order.
#[derive(Debug, Default)]
pub struct MockOracle {
    activity: HashMap<String, AddressActivity>,
    unspents: HashMap<String, Vec<OracleUnspent>>,
    probes: RefCell<Vec<String>>,
    unspent_queries: RefCell<Vec<String>>,
    broadcasts: RefCell<Vec<String>>,
    rejection: Option<String>,
    failing: bool,
}

impl MockOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// `address` has `transaction_count` transactions and no balance.
    pub fn with_history(self, address: &Address, transaction_count: u64) -> Self {
        self.with_funds(address, transaction_count, Amount::ZERO)
    }

    pub fn with_funds(mut self, address: &Address, transaction_count: u64, balance: Amount) -> Self {
        self.activity.insert(
            address.to_string(),
            AddressActivity {
                transaction_count,
                balance,
            },
        );
        self
    }

    /// Add an unspent paying `address`'s own script.
    pub fn with_unspent(self, address: &Address, outpoint: OutPoint, value: Amount) -> Self {
        let script = address.script_pubkey();
        self.with_unspent_script(address, outpoint, value, script)
    }

    pub fn with_unspent_script(
        mut self,
        address: &Address,
        outpoint: OutPoint,
        value: Amount,
        script_pubkey: ScriptBuf,
    ) -> Self {
        self.unspents
            .entry(address.to_string())
            .or_default()
            .push(OracleUnspent {
                outpoint,
                value,
                script_pubkey,
            });
        self
    }

    /// Reject every broadcast with `reason`.
    pub fn rejecting_broadcasts(mut self, reason: &str) -> Self {
        self.rejection = Some(reason.to_string());
        self
    }

    /// Fail every lookup after recording it.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    /// Addresses passed to activity lookups, in order
    pub fn probes(&self) -> Vec<String> {
        self.probes.borrow().clone()
    }

    pub fn unspent_queries(&self) -> Vec<String> {
        self.unspent_queries.borrow().clone()
    }

    /// Transaction hex of every broadcast attempt
    pub fn broadcasts(&self) -> Vec<String> {
        self.broadcasts.borrow().clone()
    }

    fn check_failing(&self, operation: &'static str, address: &Address) -> Result<(), OracleError> {
        if self.failing {
            return Err(OracleError::Request {
                operation,
                subject: address.to_string(),
                reason: "connection reset".into(),
            });
        }
        Ok(())
    }
}

impl ChainOracle for MockOracle {
    fn address_activity(&self, address: &Address) -> Result<AddressActivity, OracleError> {
        self.probes.borrow_mut().push(address.to_string());
        self.check_failing("Activity lookup", address)?;
        Ok(self
            .activity
            .get(&address.to_string())
            .copied()
            .unwrap_or_default())
    }

    fn list_unspents(&self, address: &Address) -> Result<Vec<OracleUnspent>, OracleError> {
        self.unspent_queries.borrow_mut().push(address.to_string());
        self.check_failing("Unspent lookup", address)?;
        Ok(self
            .unspents
            .get(&address.to_string())
            .cloned()
            .unwrap_or_default())
    }

    fn broadcast(&self, tx_hex: &str) -> Result<Txid, OracleError> {
        self.broadcasts.borrow_mut().push(tx_hex.to_string());
        if let Some(reason) = &self.rejection {
            return Err(OracleError::Rejected(reason.clone()));
        }
        let raw = hex::decode(tx_hex).map_err(|e| OracleError::Rejected(e.to_string()))?;
        let tx: Transaction = bitcoin::consensus::deserialize(&raw)
            .map_err(|e| OracleError::Rejected(e.to_string()))?;
        Ok(tx.compute_txid())
    }
}
