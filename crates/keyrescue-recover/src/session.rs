//! Recovery session state
//!
//! A [`RecoverySession`] is created once per run and threaded through every
//! pipeline stage. Each stage fills in one field; later stages read what the
//! earlier ones left behind.

use std::collections::BTreeMap;

use bitcoin::bip32::DerivationPath;
use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::{Address, Amount, Network, OutPoint, ScriptBuf, Transaction};
use keyrescue_core::path::{address_path, base_path};
use keyrescue_core::{resolve_keys, DerivedTriple, KeyDecryptor, KeyTriple};

use crate::error::RecoveryError;
use crate::search::PathProbe;

/// The first active address found by the path search
#[derive(Debug, Clone)]
pub struct WalletAddress {
    pub address: Address,
    pub probe: PathProbe,
    /// Per-key paths that reached `address`, in [`KeyRole::ALL`] order
    ///
    /// [`KeyRole::ALL`]: keyrescue_core::KeyRole::ALL
    pub paths: [DerivationPath; 3],
    /// `paths` with the trailing `chain/index` removed
    pub base_paths: [DerivationPath; 3],
}

impl WalletAddress {
    pub fn new(address: Address, probe: PathProbe, paths: [DerivationPath; 3]) -> Self {
        let base_paths = [
            base_path(&paths[0]),
            base_path(&paths[1]),
            base_path(&paths[2]),
        ];
        Self {
            address,
            probe,
            paths,
            base_paths,
        }
    }
}

/// A funded address at `<base>/<chain>/<index>`
#[derive(Debug, Clone)]
pub struct SubAddress {
    pub address: Address,
    pub chain: u32,
    pub index: u32,
    pub derived: DerivedTriple,
}

impl SubAddress {
    pub fn derive(
        session: &RecoverySession,
        base_paths: &[DerivationPath; 3],
        chain: u32,
        index: u32,
    ) -> Result<Self, RecoveryError> {
        let paths = [
            address_path(&base_paths[0], chain, index).map_err(RecoveryError::derivation)?,
            address_path(&base_paths[1], chain, index).map_err(RecoveryError::derivation)?,
            address_path(&base_paths[2], chain, index).map_err(RecoveryError::derivation)?,
        ];

        let derived = session
            .keys
            .derive(&session.secp, paths)
            .map_err(RecoveryError::derivation)?;
        let address = derived.multisig.address(session.network);

        Ok(Self {
            address,
            chain,
            index,
            derived,
        })
    }
}

/// A spendable output together with the sub-address that can sign for it
#[derive(Debug, Clone)]
pub struct UnspentOutput {
    pub outpoint: OutPoint,
    pub value: Amount,
    pub script_pubkey: ScriptBuf,
    pub owner: SubAddress,
}

/// The sweep transaction while it is being built and signed
#[derive(Debug, Clone)]
pub struct PendingTransaction {
    pub tx: Transaction,
    pub fee: Amount,
    pub input_total: Amount,
    /// Set once every input carries two verified signatures
    pub complete: bool,
}

impl PendingTransaction {
    /// Amount paid to the destination
    pub fn output_value(&self) -> Amount {
        self.tx
            .output
            .first()
            .map(|o| o.value)
            .unwrap_or(Amount::ZERO)
    }
}

/// State of one recovery run
pub struct RecoverySession {
    pub(crate) network: Network,
    pub(crate) secp: Secp256k1<All>,
    pub(crate) keys: KeyTriple,
    pub(crate) wallet: Option<WalletAddress>,
    pub(crate) sub_addresses: BTreeMap<String, SubAddress>,
    pub(crate) unspents: Vec<UnspentOutput>,
    pub(crate) transaction: Option<PendingTransaction>,
}

impl RecoverySession {
    pub fn new(keys: KeyTriple, network: Network) -> Self {
        Self {
            network,
            secp: Secp256k1::new(),
            keys,
            wallet: None,
            sub_addresses: BTreeMap::new(),
            unspents: Vec::new(),
            transaction: None,
        }
    }

    /// Start a session from the three keycard entries.
    pub fn from_keycard(
        user: &str,
        backup: &str,
        bitgo: &str,
        passphrase: &str,
        decryptor: &dyn KeyDecryptor,
        network: Network,
    ) -> Result<Self, RecoveryError> {
        let keys = resolve_keys(user, backup, bitgo, passphrase, decryptor)?;
        Ok(Self::new(keys, network))
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn keys(&self) -> &KeyTriple {
        &self.keys
    }

    pub fn wallet(&self) -> Option<&WalletAddress> {
        self.wallet.as_ref()
    }

    /// Funded sub-addresses, keyed by address string
    pub fn sub_addresses(&self) -> &BTreeMap<String, SubAddress> {
        &self.sub_addresses
    }

    pub fn unspents(&self) -> &[UnspentOutput] {
        &self.unspents
    }

    pub fn transaction(&self) -> Option<&PendingTransaction> {
        self.transaction.as_ref()
    }
}
