//! Keycard ciphertext decryption
//!
//! Encrypted keycard keys are JSON envelopes produced by the SJCL library:
//!
//! ```text
//! {"iv":"..","v":1,"iter":10000,"ks":256,"ts":64,"mode":"ccm",
//!  "adata":"","cipher":"aes","salt":"..","ct":".."}
//! ```
//!
//! # Format
//!
//! - Key: PBKDF2-HMAC-SHA256(password, salt, iter), `ks` bits long
//! - Cipher: AES-128 or AES-256 in CCM mode, `ts`-bit authentication tag
//! - Nonce: the first 13 bytes of `iv` (payloads below 64 KiB)
//! - `ct`: ciphertext followed by the tag, base64 encoded
//!
//! The password is never stored and derived key bytes are zeroized on drop.

use aes::{Aes128, Aes256};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ccm::aead::{Aead, KeyInit, Nonce, Payload};
use ccm::consts::{U13, U16, U8};
use ccm::Ccm;
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

/// CCM nonce length for payloads whose length fits in two bytes
const NONCE_LEN: usize = 13;

/// Only version 1 envelopes exist
const ENVELOPE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("Unsupported envelope: {0}")]
    Unsupported(String),
    #[error("Invalid ciphertext format: {0}")]
    InvalidFormat(String),
}

/// Passphrase-based decryption of keycard key material.
pub trait KeyDecryptor {
    /// Decrypt `ciphertext` with `password`, returning the plaintext key string.
    fn decrypt(&self, ciphertext: &str, password: &str) -> Result<Zeroizing<String>, CryptoError>;
}

/// SJCL-compatible keycard envelope
#[derive(Debug, Clone, Deserialize)]
pub struct SjclEnvelope {
    pub iv: String,
    pub v: u32,
    pub iter: u32,
    pub ks: u32,
    pub ts: u32,
    pub mode: String,
    #[serde(default)]
    pub adata: String,
    pub cipher: String,
    pub salt: String,
    pub ct: String,
}

impl SjclEnvelope {
    /// Parse an envelope from its JSON text.
    pub fn parse(json: &str) -> Result<Self, CryptoError> {
        serde_json::from_str(json).map_err(|e| CryptoError::InvalidFormat(e.to_string()))
    }

    fn check_supported(&self) -> Result<(), CryptoError> {
        if self.v != ENVELOPE_VERSION {
            return Err(CryptoError::Unsupported(format!("version {}", self.v)));
        }
        if self.mode != "ccm" {
            return Err(CryptoError::Unsupported(format!("mode {}", self.mode)));
        }
        if self.cipher != "aes" {
            return Err(CryptoError::Unsupported(format!("cipher {}", self.cipher)));
        }
        if self.iter == 0 {
            return Err(CryptoError::InvalidFormat("iteration count is zero".into()));
        }
        Ok(())
    }

    /// Decrypt the envelope payload with a password.
    pub fn open(&self, password: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        self.check_supported()?;

        let iv = decode_field("iv", &self.iv)?;
        let salt = decode_field("salt", &self.salt)?;
        let ct = decode_field("ct", &self.ct)?;
        let adata = decode_field("adata", &self.adata)?;

        if iv.len() < NONCE_LEN {
            return Err(CryptoError::InvalidFormat(format!(
                "iv is {} bytes, need at least {}",
                iv.len(),
                NONCE_LEN
            )));
        }
        let nonce = &iv[..NONCE_LEN];

        let key = derive_key(password, &salt, self.iter, self.ks)?;
        let payload = Payload {
            msg: &ct,
            aad: &adata,
        };

        let plaintext = match (self.ks, self.ts) {
            (128, 64) => open_with::<Ccm<Aes128, U8, U13>>(&key, nonce, payload),
            (128, 128) => open_with::<Ccm<Aes128, U16, U13>>(&key, nonce, payload),
            (256, 64) => open_with::<Ccm<Aes256, U8, U13>>(&key, nonce, payload),
            (256, 128) => open_with::<Ccm<Aes256, U16, U13>>(&key, nonce, payload),
            (ks, ts) => Err(CryptoError::Unsupported(format!(
                "key size {} with tag size {}",
                ks, ts
            ))),
        }?;

        Ok(Zeroizing::new(plaintext))
    }
}

/// Decryptor for SJCL keycard envelopes
#[derive(Debug, Clone, Copy, Default)]
pub struct SjclDecryptor;

impl KeyDecryptor for SjclDecryptor {
    fn decrypt(&self, ciphertext: &str, password: &str) -> Result<Zeroizing<String>, CryptoError> {
        let envelope = SjclEnvelope::parse(ciphertext)?;
        let plaintext = envelope.open(password)?;
        let text = std::str::from_utf8(&plaintext)
            .map_err(|_| CryptoError::DecryptionFailed("plaintext is not UTF-8".into()))?;
        Ok(Zeroizing::new(text.to_string()))
    }
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>, CryptoError> {
    BASE64
        .decode(value)
        .map_err(|e| CryptoError::InvalidFormat(format!("{}: {}", name, e)))
}

/// Derive the AES key from a password using PBKDF2-HMAC-SHA256
fn derive_key(
    password: &str,
    salt: &[u8],
    iterations: u32,
    key_bits: u32,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if key_bits != 128 && key_bits != 256 {
        return Err(CryptoError::Unsupported(format!("key size {}", key_bits)));
    }
    let mut key = Zeroizing::new(vec![0u8; (key_bits / 8) as usize]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key);
    Ok(key)
}

fn open_with<C>(key: &[u8], nonce: &[u8], payload: Payload<'_, '_>) -> Result<Vec<u8>, CryptoError>
where
    C: Aead + KeyInit,
{
    let cipher =
        C::new_from_slice(key).map_err(|e| CryptoError::InvalidFormat(e.to_string()))?;
    cipher
        .decrypt(Nonce::<C>::from_slice(nonce), payload)
        .map_err(|_| CryptoError::DecryptionFailed("Invalid password or corrupted data".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASSWORD: &str = "correct horse battery staple";

    /// BIP-32 test vector 1 master key
    const PLAINTEXT: &str = "xprv9s21ZrQH143K3QTDL4LXw2F7HEK3wJUD2nW2nRk4stbPy6cq3jPPqjiChkVvvNKmPGJxWUtg6LnF5kejMRNNU3TGtRBeJgk33yuGBxrMPHi";

    /// AES-256, 64-bit tag, 10000 iterations (keycard defaults)
    const ENVELOPE_256: &str = r#"{"iv":"AAECAwQFBgcICQoLDA0ODw==","v":1,"iter":10000,"ks":256,"ts":64,"mode":"ccm","adata":"","cipher":"aes","salt":"obLD1OX2Bxg=","ct":"ss0Ss2W9lIOdCxdIPygLEfV5HIVaIHkTQtVF+lZao5vGyZSZEYlREysVhKikN5qzaQUShBuOknfcjKl1lUlivJMsLU/RG/ANDkeIr87JffG/lvqxb58eBwRB6WpyZ15pI+pmLINgInAeccJ2Bn0YCri6Wa34Vrs="}"#;

    /// AES-128, 64-bit tag, 1000 iterations (older library defaults)
    const ENVELOPE_128: &str = r#"{"iv":"ZGVmZ2hpamtsbW5vcHFycw==","v":1,"iter":1000,"ks":128,"ts":64,"mode":"ccm","adata":"","cipher":"aes","salt":"obLD1OX2Bxg=","ct":"QLLleMMKsAWM1iIEcq7FGAczqw+wtQ7ak0ob/ANlSJ5suzbjmdwi8lhV3bS1xtRpO/8gB/LoFZNyptF/iVJWbG3i5pObG31WqSVCufEvAnaT83GFLPO54+Qg7d4Doa2dLML1evZ7xanCwZR6+zchNGPVzpDI0U0="}"#;

    #[test]
    fn test_decrypt_aes256_envelope() {
        let plaintext = SjclDecryptor.decrypt(ENVELOPE_256, PASSWORD).unwrap();
        assert_eq!(plaintext.as_str(), PLAINTEXT);
    }

    #[test]
    fn test_decrypt_aes128_envelope() {
        let plaintext = SjclDecryptor.decrypt(ENVELOPE_128, PASSWORD).unwrap();
        assert_eq!(plaintext.as_str(), PLAINTEXT);
    }

    #[test]
    fn test_wrong_password_fails() {
        let result = SjclDecryptor.decrypt(ENVELOPE_256, "wrong password");
        assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let mut envelope = SjclEnvelope::parse(ENVELOPE_256).unwrap();
        let mut ct = BASE64.decode(&envelope.ct).unwrap();
        ct[0] ^= 0x01;
        envelope.ct = BASE64.encode(ct);

        assert!(matches!(
            envelope.open(PASSWORD),
            Err(CryptoError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_unsupported_mode() {
        let json = ENVELOPE_256.replace("\"ccm\"", "\"ocb2\"");
        let result = SjclDecryptor.decrypt(&json, PASSWORD);
        assert!(matches!(result, Err(CryptoError::Unsupported(_))));
    }

    #[test]
    fn test_unsupported_key_size() {
        let json = ENVELOPE_256.replace("\"ks\":256", "\"ks\":192");
        let result = SjclDecryptor.decrypt(&json, PASSWORD);
        assert!(matches!(result, Err(CryptoError::Unsupported(_))));
    }

    #[test]
    fn test_not_json() {
        let result = SjclDecryptor.decrypt("definitely not an envelope", PASSWORD);
        assert!(matches!(result, Err(CryptoError::InvalidFormat(_))));
    }

    #[test]
    fn test_short_iv_rejected() {
        let json = ENVELOPE_256.replace("AAECAwQFBgcICQoLDA0ODw==", "AAECAw==");
        let result = SjclDecryptor.decrypt(&json, PASSWORD);
        assert!(matches!(result, Err(CryptoError::InvalidFormat(_))));
    }
}
