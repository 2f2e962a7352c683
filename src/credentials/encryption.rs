//! AES-256-GCM field encryption for the credential store.
//!
//! Every sensitive column (tokens, metadata) is sealed on its own with a
//! fresh nonce. The master key is 32 bytes, supplied base64-encoded via env.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// A sealed value as stored in SQLite: base64 ciphertext plus base64 nonce.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedValue {
    pub ciphertext: String,
    pub nonce: String,
}

/// Decodes a base64 master key and checks it is exactly 32 bytes.
pub fn validate_key(key_base64: &str) -> Result<Vec<u8>> {
    let key_bytes = BASE64
        .decode(key_base64.trim())
        .context("Failed to decode base64 encryption key")?;

    if key_bytes.len() != KEY_SIZE {
        return Err(anyhow!(
            "Encryption key must be {} bytes (256 bits), got {} bytes",
            KEY_SIZE,
            key_bytes.len()
        ));
    }

    Ok(key_bytes)
}

/// Generates a random master key, base64-encoded, suitable for
/// `BIZHUB_ENCRYPTION_KEY`.
pub fn generate_key() -> String {
    let key = Aes256Gcm::generate_key(&mut OsRng);
    BASE64.encode(key)
}

fn cipher(key: &[u8]) -> Result<Aes256Gcm> {
    if key.len() != KEY_SIZE {
        return Err(anyhow!("Encryption key must be {} bytes", KEY_SIZE));
    }
    Aes256Gcm::new_from_slice(key).map_err(|e| anyhow!("Failed to create cipher: {}", e))
}

/// Seals `plaintext` under `key` with a random nonce.
pub fn encrypt(plaintext: &str, key: &[u8]) -> Result<EncryptedValue> {
    let cipher = cipher(key)?;

    // Never reuse a nonce under the same key
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    Ok(EncryptedValue {
        ciphertext: BASE64.encode(&ciphertext),
        nonce: BASE64.encode(nonce),
    })
}

/// Opens a value sealed by [`encrypt`]. Fails on wrong key, wrong nonce or tampering.
pub fn decrypt(value: &EncryptedValue, key: &[u8]) -> Result<String> {
    let cipher = cipher(key)?;

    let ciphertext = BASE64
        .decode(&value.ciphertext)
        .context("Failed to decode ciphertext")?;
    let nonce_bytes = BASE64.decode(&value.nonce).context("Failed to decode nonce")?;

    if nonce_bytes.len() != NONCE_SIZE {
        return Err(anyhow!(
            "Invalid nonce size: expected {}, got {}",
            NONCE_SIZE,
            nonce_bytes.len()
        ));
    }

    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
        .map_err(|e| anyhow!("Decryption failed (wrong key or corrupted data): {}", e))?;

    String::from_utf8(plaintext).context("Decrypted data is not valid UTF-8")
}

/// [`encrypt`] lifted over `Option`.
pub fn encrypt_optional(plaintext: Option<&str>, key: &[u8]) -> Result<Option<EncryptedValue>> {
    plaintext.map(|p| encrypt(p, key)).transpose()
}

/// Rebuilds and opens an optional column pair. Either half missing means no value.
pub fn decrypt_optional(
    ciphertext: Option<String>,
    nonce: Option<String>,
    key: &[u8],
) -> Result<Option<String>> {
    match (ciphertext, nonce) {
        (Some(ciphertext), Some(nonce)) => {
            decrypt(&EncryptedValue { ciphertext, nonce }, key).map(Some)
        }
        _ => Ok(None),
    }
}
