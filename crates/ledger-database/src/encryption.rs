//! Field-level encryption for sensitive session columns.
//!
//! [`FieldEncryptor`] is the boundary the record store talks to. [`FieldCipher`]
//! implements it with ChaCha20-Poly1305; encrypted values are stored as
//! `enc1:` followed by base64 of the nonce and ciphertext.

use crate::{DatabaseError, DatabaseResult};
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use std::collections::BTreeMap;
use std::fmt;

/// Nonce size for ChaCha20-Poly1305 (96 bits = 12 bytes).
pub const NONCE_SIZE: usize = 12;

/// Key size for ChaCha20-Poly1305 (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

/// Marker prefixed to every encrypted value.
pub const ENCRYPTED_PREFIX: &str = "enc1:";

const BASE64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// Field name to value.
pub type FieldMap = BTreeMap<String, String>;

/// Encrypts and decrypts named string fields.
pub trait FieldEncryptor: Send + Sync {
    /// Encrypt every value. Values that are already encrypted pass through.
    fn encrypt_fields(&self, fields: &FieldMap) -> DatabaseResult<FieldMap>;

    /// Decrypt every encrypted value. Plaintext values pass through.
    fn decrypt_fields(&self, fields: &FieldMap) -> DatabaseResult<FieldMap>;

    /// Whether a stored value carries the encryption marker.
    fn looks_encrypted(&self, value: &str) -> bool {
        value.starts_with(ENCRYPTED_PREFIX)
    }
}

/// Generate a random nonce for encryption.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Generate a random encryption key.
pub fn generate_key() -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

fn check_sizes(key: &[u8], nonce: &[u8]) -> DatabaseResult<()> {
    if key.len() != KEY_SIZE {
        return Err(DatabaseError::encryption(format!(
            "Invalid key size: expected {}, got {}",
            KEY_SIZE,
            key.len()
        )));
    }
    if nonce.len() != NONCE_SIZE {
        return Err(DatabaseError::encryption(format!(
            "Invalid nonce size: expected {}, got {}",
            NONCE_SIZE,
            nonce.len()
        )));
    }
    Ok(())
}

/// Encrypt content using ChaCha20-Poly1305.
///
/// Returns the ciphertext with the authentication tag appended.
pub fn encrypt_content(key: &[u8], nonce: &[u8], plaintext: &[u8]) -> DatabaseResult<Vec<u8>> {
    check_sizes(key, nonce)?;
    let cipher = ChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| DatabaseError::encryption(e.to_string()))?;

    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|e| DatabaseError::encryption(e.to_string()))
}

/// Decrypt content using ChaCha20-Poly1305.
pub fn decrypt_content(key: &[u8], nonce: &[u8], ciphertext: &[u8]) -> DatabaseResult<Vec<u8>> {
    check_sizes(key, nonce)?;
    let cipher = ChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| DatabaseError::encryption(e.to_string()))?;

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| DatabaseError::encryption(e.to_string()))
}

/// ChaCha20-Poly1305 field encryptor with a fresh nonce per value.
#[derive(Clone)]
pub struct FieldCipher {
    key: [u8; KEY_SIZE],
}

impl fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldCipher").finish_non_exhaustive()
    }
}

impl FieldCipher {
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Cipher with a freshly generated key.
    pub fn generate() -> Self {
        Self::new(generate_key())
    }

    /// Build from a base64-encoded 32-byte key.
    pub fn from_base64_key(encoded: &str) -> DatabaseResult<Self> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| DatabaseError::encryption(format!("Invalid key encoding: {}", e)))?;
        let key: [u8; KEY_SIZE] = bytes.as_slice().try_into().map_err(|_| {
            DatabaseError::encryption(format!(
                "Invalid key size: expected {}, got {}",
                KEY_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self::new(key))
    }

    /// Base64 form of the key, for storing alongside the configuration.
    pub fn key_base64(&self) -> String {
        BASE64.encode(self.key)
    }

    pub fn encrypt_value(&self, plaintext: &str) -> DatabaseResult<String> {
        let nonce = generate_nonce();
        let ciphertext = encrypt_content(&self.key, &nonce, plaintext.as_bytes())?;

        let mut payload = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);
        Ok(format!("{}{}", ENCRYPTED_PREFIX, BASE64.encode(payload)))
    }

    pub fn decrypt_value(&self, stored: &str) -> DatabaseResult<String> {
        let encoded = stored
            .strip_prefix(ENCRYPTED_PREFIX)
            .ok_or_else(|| DatabaseError::encryption("Value is not encrypted"))?;
        let payload = BASE64
            .decode(encoded)
            .map_err(|e| DatabaseError::encryption(format!("Invalid ciphertext encoding: {}", e)))?;
        if payload.len() <= NONCE_SIZE {
            return Err(DatabaseError::encryption("Ciphertext too short"));
        }

        let (nonce, ciphertext) = payload.split_at(NONCE_SIZE);
        let plaintext = decrypt_content(&self.key, nonce, ciphertext)?;
        String::from_utf8(plaintext)
            .map_err(|e| DatabaseError::encryption(format!("Decrypted value is not UTF-8: {}", e)))
    }
}

impl FieldEncryptor for FieldCipher {
    fn encrypt_fields(&self, fields: &FieldMap) -> DatabaseResult<FieldMap> {
        fields
            .iter()
            .map(|(name, value)| -> DatabaseResult<(String, String)> {
                let out = if self.looks_encrypted(value) {
                    value.clone()
                } else {
                    self.encrypt_value(value)?
                };
                Ok((name.clone(), out))
            })
            .collect()
    }

    fn decrypt_fields(&self, fields: &FieldMap) -> DatabaseResult<FieldMap> {
        fields
            .iter()
            .map(|(name, value)| -> DatabaseResult<(String, String)> {
                let out = if self.looks_encrypted(value) {
                    self.decrypt_value(value)?
                } else {
                    value.clone()
                };
                Ok((name.clone(), out))
            })
            .collect()
    }
}
