//! Keycard key resolution and HD derivation
//!
//! Turns the three keycard strings into HD key nodes. Each string is either a
//! plain base58 extended key or an encrypted envelope that must be opened with
//! the wallet passphrase first.

use std::fmt;
use std::str::FromStr;

use bitcoin::bip32::{DerivationPath, Xpriv, Xpub};
use bitcoin::secp256k1::{All, PublicKey, Secp256k1, SecretKey};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::crypto::{CryptoError, KeyDecryptor};
use crate::multisig::MultisigScript;

/// Prefixes of base58 extended private keys (mainnet, testnet)
const PRIVATE_PREFIXES: [&str; 2] = ["xprv", "tprv"];

/// Prefixes of base58 extended public keys (mainnet, testnet)
const PUBLIC_PREFIXES: [&str; 2] = ["xpub", "tpub"];

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid {role} key: decryption failed: {source}")]
    Decrypt {
        role: KeyRole,
        #[source]
        source: CryptoError,
    },
    #[error("Invalid {role} key: {reason}")]
    Parse { role: KeyRole, reason: String },
    #[error("Invalid {role} key: must be an extended private key")]
    NotPrivate { role: KeyRole },
    #[error("Derivation failed: {0}")]
    DerivationFailed(String),
}

/// Which keycard box a key came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyRole {
    User,
    Backup,
    Bitgo,
}

impl KeyRole {
    /// All roles, in redeem-script order
    pub const ALL: [KeyRole; 3] = [KeyRole::User, KeyRole::Backup, KeyRole::Bitgo];

    /// Roles whose keys sign during recovery
    pub const SIGNERS: [KeyRole; 2] = [KeyRole::User, KeyRole::Backup];

    /// Whether the keycard must carry a private key for this role
    pub fn requires_private(self) -> bool {
        !matches!(self, KeyRole::Bitgo)
    }

    /// Position of this role's key in a [`KeyTriple`] and its redeem script
    pub fn index(self) -> usize {
        match self {
            KeyRole::User => 0,
            KeyRole::Backup => 1,
            KeyRole::Bitgo => 2,
        }
    }
}

impl fmt::Display for KeyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyRole::User => write!(f, "user"),
            KeyRole::Backup => write!(f, "backup"),
            KeyRole::Bitgo => write!(f, "bitgo"),
        }
    }
}

/// An HD key node, private or public-only
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HdKey {
    Private(Xpriv),
    Public(Xpub),
}

impl HdKey {
    /// Derive a child node along `path`.
    ///
    /// Hardened steps fail on a public-only node.
    pub fn derive(&self, secp: &Secp256k1<All>, path: &DerivationPath) -> Result<HdKey, KeyError> {
        match self {
            HdKey::Private(xpriv) => xpriv.derive_priv(secp, path).map(HdKey::Private),
            HdKey::Public(xpub) => xpub.derive_pub(secp, path).map(HdKey::Public),
        }
        .map_err(|e| KeyError::DerivationFailed(format!("{}: {}", path, e)))
    }

    /// The node's compressed secp256k1 public key
    pub fn public_key(&self, secp: &Secp256k1<All>) -> PublicKey {
        match self {
            HdKey::Private(xpriv) => xpriv.private_key.public_key(secp),
            HdKey::Public(xpub) => xpub.public_key,
        }
    }

    /// The node's private key, if it has one
    pub fn secret_key(&self) -> Option<SecretKey> {
        match self {
            HdKey::Private(xpriv) => Some(xpriv.private_key),
            HdKey::Public(_) => None,
        }
    }

    pub fn is_private(&self) -> bool {
        matches!(self, HdKey::Private(_))
    }
}

/// The three root keys of a wallet.
///
/// User and backup are always private; the BitGo key may be public-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTriple {
    keys: [HdKey; 3],
}

impl KeyTriple {
    pub fn new(user: Xpriv, backup: Xpriv, bitgo: HdKey) -> Self {
        Self {
            keys: [HdKey::Private(user), HdKey::Private(backup), bitgo],
        }
    }

    pub fn get(&self, role: KeyRole) -> &HdKey {
        &self.keys[role.index()]
    }

    /// Derive each key along its own path and build the multisig for the result.
    ///
    /// `paths` is indexed like [`KeyRole::ALL`].
    pub fn derive(
        &self,
        secp: &Secp256k1<All>,
        paths: [DerivationPath; 3],
    ) -> Result<DerivedTriple, KeyError> {
        let user = self.keys[0].derive(secp, &paths[0])?;
        let backup = self.keys[1].derive(secp, &paths[1])?;
        let bitgo = self.keys[2].derive(secp, &paths[2])?;
        let keys = [user, backup, bitgo];

        let multisig = MultisigScript::new([
            keys[0].public_key(secp),
            keys[1].public_key(secp),
            keys[2].public_key(secp),
        ]);

        Ok(DerivedTriple {
            keys,
            paths,
            multisig,
        })
    }
}

/// Three keys derived from a [`KeyTriple`], with the multisig they form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedTriple {
    pub keys: [HdKey; 3],
    pub paths: [DerivationPath; 3],
    pub multisig: MultisigScript,
}

impl DerivedTriple {
    pub fn get(&self, role: KeyRole) -> &HdKey {
        &self.keys[role.index()]
    }
}

/// Whether `input` is a plain base58 extended key rather than ciphertext
pub fn is_plain_extended_key(input: &str) -> bool {
    PRIVATE_PREFIXES
        .iter()
        .chain(PUBLIC_PREFIXES.iter())
        .any(|prefix| input.starts_with(prefix))
}

/// Resolve one keycard entry into an HD key node.
///
/// Whitespace is stripped first, since keycard text is often copied with
/// line breaks.
pub fn resolve_key(
    role: KeyRole,
    input: &str,
    passphrase: &str,
    decryptor: &dyn KeyDecryptor,
) -> Result<HdKey, KeyError> {
    let compact: Zeroizing<String> = Zeroizing::new(input.split_whitespace().collect());

    let plain = if is_plain_extended_key(&compact) {
        compact
    } else {
        decryptor
            .decrypt(&compact, passphrase)
            .map_err(|source| KeyError::Decrypt { role, source })?
    };

    let is_private = PRIVATE_PREFIXES.iter().any(|p| plain.starts_with(p));
    if role.requires_private() && !is_private {
        return Err(KeyError::NotPrivate { role });
    }

    let parsed = if is_private {
        Xpriv::from_str(&plain).map(HdKey::Private)
    } else {
        Xpub::from_str(&plain).map(HdKey::Public)
    };
    parsed.map_err(|e| KeyError::Parse {
        role,
        reason: e.to_string(),
    })
}

/// Resolve all three keycard entries.
pub fn resolve_keys(
    user: &str,
    backup: &str,
    bitgo: &str,
    passphrase: &str,
    decryptor: &dyn KeyDecryptor,
) -> Result<KeyTriple, KeyError> {
    let user = expect_private(KeyRole::User, resolve_key(KeyRole::User, user, passphrase, decryptor)?)?;
    let backup = expect_private(
        KeyRole::Backup,
        resolve_key(KeyRole::Backup, backup, passphrase, decryptor)?,
    )?;
    let bitgo = resolve_key(KeyRole::Bitgo, bitgo, passphrase, decryptor)?;

    Ok(KeyTriple::new(user, backup, bitgo))
}

fn expect_private(role: KeyRole, key: HdKey) -> Result<Xpriv, KeyError> {
    match key {
        HdKey::Private(xpriv) => Ok(xpriv),
        HdKey::Public(_) => Err(KeyError::NotPrivate { role }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SjclDecryptor;

    /// BIP-32 test vector 1 master pair
    const TV1_XPRV: &str = "xprv9s21ZrQH143K3QTDL4LXw2F7HEK3wJUD2nW2nRk4stbPy6cq3jPPqjiChkVvvNKmPGJxWUtg6LnF5kejMRNNU3TGtRBeJgk33yuGBxrMPHi";
    const TV1_XPUB: &str = "xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjqJoCu1Rupje8YtGqsefD265TMg7usUDFdp6W1EGMcet8";

    /// TV1_XPRV encrypted under "correct horse battery staple"
    const TV1_ENVELOPE: &str = r#"{"iv":"AAECAwQFBgcICQoLDA0ODw==","v":1,"iter":10000,"ks":256,"ts":64,"mode":"ccm","adata":"","cipher":"aes","salt":"obLD1OX2Bxg=","ct":"ss0Ss2W9lIOdCxdIPygLEfV5HIVaIHkTQtVF+lZao5vGyZSZEYlREysVhKikN5qzaQUShBuOknfcjKl1lUlivJMsLU/RG/ANDkeIr87JffG/lvqxb58eBwRB6WpyZ15pI+pmLINgInAeccJ2Bn0YCri6Wa34Vrs="}"#;

    fn master(seed_byte: u8) -> Xpriv {
        Xpriv::new_master(bitcoin::Network::Bitcoin, &[seed_byte; 32]).unwrap()
    }

    #[test]
    fn test_plain_key_detection() {
        assert!(is_plain_extended_key(TV1_XPRV));
        assert!(is_plain_extended_key(TV1_XPUB));
        assert!(is_plain_extended_key("tpubD6NzVbkrYhZ4"));
        assert!(!is_plain_extended_key(TV1_ENVELOPE));
    }

    #[test]
    fn test_resolve_plain_keys() {
        let keys = resolve_keys(TV1_XPRV, TV1_XPRV, TV1_XPUB, "", &SjclDecryptor).unwrap();
        assert!(keys.get(KeyRole::User).is_private());
        assert!(keys.get(KeyRole::Backup).is_private());
        assert!(!keys.get(KeyRole::Bitgo).is_private());
    }

    #[test]
    fn test_resolve_strips_whitespace() {
        let wrapped = format!("{}\n{}", &TV1_XPRV[..40], &TV1_XPRV[40..]);
        let key = resolve_key(KeyRole::User, &wrapped, "", &SjclDecryptor).unwrap();
        assert_eq!(key, HdKey::Private(Xpriv::from_str(TV1_XPRV).unwrap()));
    }

    #[test]
    fn test_resolve_encrypted_key() {
        let key = resolve_key(
            KeyRole::User,
            TV1_ENVELOPE,
            "correct horse battery staple",
            &SjclDecryptor,
        )
        .unwrap();
        assert_eq!(key, HdKey::Private(Xpriv::from_str(TV1_XPRV).unwrap()));
    }

    #[test]
    fn test_wrong_passphrase_is_invalid_key() {
        let err = resolve_key(KeyRole::Backup, TV1_ENVELOPE, "nope", &SjclDecryptor).unwrap_err();
        assert!(matches!(
            err,
            KeyError::Decrypt {
                role: KeyRole::Backup,
                ..
            }
        ));
    }

    #[test]
    fn test_user_key_must_be_private() {
        let err = resolve_keys(TV1_XPUB, TV1_XPRV, TV1_XPUB, "", &SjclDecryptor).unwrap_err();
        assert!(matches!(err, KeyError::NotPrivate { role: KeyRole::User }));
    }

    #[test]
    fn test_backup_key_must_be_private() {
        let err = resolve_keys(TV1_XPRV, TV1_XPUB, TV1_XPUB, "", &SjclDecryptor).unwrap_err();
        assert!(matches!(err, KeyError::NotPrivate { role: KeyRole::Backup }));
    }

    #[test]
    fn test_bitgo_key_may_be_private() {
        let keys = resolve_keys(TV1_XPRV, TV1_XPRV, TV1_XPRV, "", &SjclDecryptor).unwrap();
        assert!(keys.get(KeyRole::Bitgo).is_private());
    }

    #[test]
    fn test_corrupt_base58_is_parse_error() {
        let mut corrupt = TV1_XPRV.to_string();
        corrupt.pop();
        corrupt.push('j');
        let err = resolve_key(KeyRole::User, &corrupt, "", &SjclDecryptor).unwrap_err();
        assert!(matches!(err, KeyError::Parse { role: KeyRole::User, .. }));
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let secp = Secp256k1::new();
        let keys = KeyTriple::new(master(1), master(2), HdKey::Private(master(3)));
        let path: DerivationPath = "m/0/0/0/1".parse().unwrap();
        let paths = [path.clone(), path.clone(), path];

        let first = keys.derive(&secp, paths.clone()).unwrap();
        let second = keys.derive(&secp, paths).unwrap();

        assert_eq!(first.multisig.pubkeys(), second.multisig.pubkeys());
        assert_eq!(first.multisig.redeem_script(), second.multisig.redeem_script());
        assert_eq!(
            first.multisig.address(bitcoin::Network::Bitcoin),
            second.multisig.address(bitcoin::Network::Bitcoin)
        );
    }

    #[test]
    fn test_public_derivation_matches_private() {
        let secp = Secp256k1::new();
        let xpriv = master(7);
        let xpub = Xpub::from_priv(&secp, &xpriv);
        let path: DerivationPath = "m/101/0/2".parse().unwrap();

        let from_priv = HdKey::Private(xpriv).derive(&secp, &path).unwrap();
        let from_pub = HdKey::Public(xpub).derive(&secp, &path).unwrap();

        assert_eq!(from_priv.public_key(&secp), from_pub.public_key(&secp));
    }

    #[test]
    fn test_hardened_step_fails_on_public_key() {
        let secp = Secp256k1::new();
        let xpub = Xpub::from_priv(&secp, &master(7));
        let path: DerivationPath = "m/100'/101/0/0".parse().unwrap();

        let result = HdKey::Public(xpub).derive(&secp, &path);
        assert!(matches!(result, Err(KeyError::DerivationFailed(_))));
    }
}
