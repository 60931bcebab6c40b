//! AES-256-GCM encryption for refresh tokens at rest

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as base64_engine;
use rand::RngExt;

use crate::error::{Error, Result};

const NONCE_LEN: usize = 12;

/// A 256-bit key held for the lifetime of the store, zeroized on drop.
pub struct EncryptionKey(common::Secret<[u8; 32]>);

impl EncryptionKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(common::Secret::new(bytes))
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.0.expose()))
    }
}

/// Encrypt `plaintext`, returning base64 ciphertext and base64 nonce.
pub fn encrypt(key: &EncryptionKey, plaintext: &str) -> Result<(String, String)> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rng().fill(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = key
        .cipher()
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| Error::Encryption(format!("encrypting refresh token: {e}")))?;

    Ok((
        base64_engine.encode(ciphertext),
        base64_engine.encode(nonce_bytes),
    ))
}

/// Decrypt a base64 ciphertext/nonce pair produced by [`encrypt`].
pub fn decrypt(key: &EncryptionKey, ciphertext_b64: &str, nonce_b64: &str) -> Result<String> {
    let ciphertext = base64_engine
        .decode(ciphertext_b64)
        .map_err(|e| Error::Encryption(format!("decoding ciphertext: {e}")))?;
    let nonce_bytes = base64_engine
        .decode(nonce_b64)
        .map_err(|e| Error::Encryption(format!("decoding nonce: {e}")))?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(Error::Encryption("nonce has unexpected length".into()));
    }
    let nonce = Nonce::from_slice(&nonce_bytes);

    let plaintext = key
        .cipher()
        .decrypt(nonce, ciphertext.as_slice())
        .map_err(|e| Error::Encryption(format!("decrypting refresh token: {e}")))?;

    String::from_utf8(plaintext).map_err(|e| Error::Encryption(format!("non-utf8 plaintext: {e}")))
}
