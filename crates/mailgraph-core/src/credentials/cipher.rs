//! AES-256-GCM encryption for tokens at rest.

use crate::error::MailgraphError;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};

/// Encrypts and decrypts token material with a key held outside the process
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    /// Key is hex-encoded, exactly 32 bytes once decoded
    pub fn from_hex_key(hex_key: &str) -> Result<Self, MailgraphError> {
        let bytes = hex::decode(hex_key)
            .map_err(|e| MailgraphError::Config(format!("credential key is not hex: {}", e)))?;
        if bytes.len() != 32 {
            return Err(MailgraphError::Config(format!(
                "credential key must be 32 bytes, got {}",
                bytes.len()
            )));
        }

        let key = Key::<Aes256Gcm>::from_slice(&bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Returns (ciphertext, nonce); a fresh random nonce per encryption
    pub fn encrypt(&self, plaintext: &str) -> Result<(Vec<u8>, Vec<u8>), MailgraphError> {
        let nonce_bytes: [u8; 12] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| MailgraphError::Config(format!("token encryption failed: {}", e)))?;

        Ok((ciphertext, nonce_bytes.to_vec()))
    }

    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8]) -> Result<String, MailgraphError> {
        if nonce.len() != 12 {
            return Err(MailgraphError::Config(format!(
                "bad nonce length {}",
                nonce.len()
            )));
        }

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| MailgraphError::Config(format!("token decryption failed: {}", e)))?;

        String::from_utf8(plaintext)
            .map_err(|e| MailgraphError::Config(format!("decrypted token is not utf-8: {}", e)))
    }
}
