//! Path search engine
//!
//! Wallets of this scheme were created under one of two path layouts and the
//! keycard does not say which. The search walks a fixed probe sequence and
//! stops at the first multisig address with any transaction history:
//!
//! ```text
//! new:     user, backup, bitgo  m/0/0/0/a                 a in 0..3
//! legacy:  user                 m/100'/101/0/a            k in 101..120
//!          backup               m/101/0/a                 a in 0..3
//!          bitgo                m/k/0/a
//! ```
//!
//! The legacy address index is the inner loop.

use std::fmt;

use bitcoin::bip32::DerivationPath;

use crate::error::RecoveryError;
use crate::oracle::ChainOracle;
use crate::session::{RecoverySession, WalletAddress};

/// Address indices tried under each key layout
pub const ADDRESS_INDICES: u32 = 3;

/// First legacy BitGo key index
pub const LEGACY_BITGO_FIRST: u32 = 101;

/// One past the last legacy BitGo key index
pub const LEGACY_BITGO_END: u32 = 120;

/// A single candidate in the search sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathProbe {
    New {
        address_index: u32,
    },
    Legacy {
        bitgo_key_index: u32,
        address_index: u32,
    },
}

impl PathProbe {
    pub const FIRST: PathProbe = PathProbe::New { address_index: 0 };

    /// The probe after this one, or `None` once both layouts are exhausted
    pub fn next(self) -> Option<PathProbe> {
        match self {
            PathProbe::New { address_index } if address_index + 1 < ADDRESS_INDICES => {
                Some(PathProbe::New {
                    address_index: address_index + 1,
                })
            }
            PathProbe::New { .. } => Some(PathProbe::Legacy {
                bitgo_key_index: LEGACY_BITGO_FIRST,
                address_index: 0,
            }),
            PathProbe::Legacy {
                bitgo_key_index,
                address_index,
            } if address_index + 1 < ADDRESS_INDICES => Some(PathProbe::Legacy {
                bitgo_key_index,
                address_index: address_index + 1,
            }),
            PathProbe::Legacy {
                bitgo_key_index, ..
            } if bitgo_key_index + 1 < LEGACY_BITGO_END => Some(PathProbe::Legacy {
                bitgo_key_index: bitgo_key_index + 1,
                address_index: 0,
            }),
            PathProbe::Legacy { .. } => None,
        }
    }

    /// The full probe sequence, in search order
    pub fn sequence() -> impl Iterator<Item = PathProbe> {
        std::iter::successors(Some(PathProbe::FIRST), |probe| probe.next())
    }

    /// Per-key derivation paths in user, backup, bitgo order
    pub fn paths(self) -> Result<[DerivationPath; 3], RecoveryError> {
        let templates = match self {
            PathProbe::New { address_index } => {
                let shared = format!("m/0/0/0/{}", address_index);
                [shared.clone(), shared.clone(), shared]
            }
            PathProbe::Legacy {
                bitgo_key_index,
                address_index,
            } => [
                format!("m/100'/101/0/{}", address_index),
                format!("m/101/0/{}", address_index),
                format!("m/{}/0/{}", bitgo_key_index, address_index),
            ],
        };

        let [user, backup, bitgo] = templates;
        Ok([parse_path(&user)?, parse_path(&backup)?, parse_path(&bitgo)?])
    }
}

impl fmt::Display for PathProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathProbe::New { address_index } => write!(f, "new scheme, address {}", address_index),
            PathProbe::Legacy {
                bitgo_key_index,
                address_index,
            } => write!(
                f,
                "legacy scheme, bitgo key {}, address {}",
                bitgo_key_index, address_index
            ),
        }
    }
}

fn parse_path(template: &str) -> Result<DerivationPath, RecoveryError> {
    template
        .parse()
        .map_err(|e| RecoveryError::Derivation(format!("{}: {}", template, e)))
}

/// Find the wallet's first active address and record it in the session.
pub fn find_wallet_address<'s>(
    session: &'s mut RecoverySession,
    oracle: &dyn ChainOracle,
) -> Result<&'s WalletAddress, RecoveryError> {
    for probe in PathProbe::sequence() {
        let derived = session
            .keys
            .derive(&session.secp, probe.paths()?)
            .map_err(RecoveryError::derivation)?;
        let address = derived.multisig.address(session.network);
        log::debug!("Trying {}: {}", probe, address);

        if oracle.has_transaction_history(&address)? {
            log::info!("Found wallet base address {} ({})", address, probe);
            let wallet = WalletAddress::new(address, probe, derived.paths);
            return Ok(session.wallet.insert(wallet));
        }
    }

    Err(RecoveryError::WalletNotFound)
}
