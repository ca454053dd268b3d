//! keyrescue Core
//!
//! Key material and script primitives for recovering funds from a 2-of-3
//! HD multisig wallet using only its keycard.
//!
//! # Keys
//!
//! A keycard carries three root extended keys:
//! - **User** key (private, usually encrypted with the wallet passphrase)
//! - **Backup** key (private, usually encrypted with the wallet passphrase)
//! - **BitGo** key (public only is enough)
//!
//! # Scripts
//!
//! Each wallet address is a P2SH of `OP_2 <user> <backup> <bitgo> OP_3 OP_CHECKMULTISIG`
//! with the keys derived along the same relative path.

pub mod crypto;
pub mod keys;
pub mod memory;
pub mod multisig;
pub mod path;

pub use crypto::{CryptoError, KeyDecryptor, SjclDecryptor};
pub use keys::*;
pub use multisig::MultisigScript;
