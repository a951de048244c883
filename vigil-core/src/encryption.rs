use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use hkdf::Hkdf;
use sha2::{Digest, Sha256};

use crate::config::SecurityConfig;

const NONCE_LEN: usize = 12;

/// Resolve the master key for at-rest content.
///
/// A configured `MESSAGE_ENCRYPTION_KEY` wins. Otherwise the key is
/// `hex(SHA-256(secret_key))`. Stored ciphertext depends on this derivation,
/// so it must not change.
pub fn resolve_content_key(security: &SecurityConfig) -> String {
    match &security.message_encryption_key {
        Some(key) => key.clone(),
        None => {
            tracing::warn!("MESSAGE_ENCRYPTION_KEY not set, deriving content key from SECRET_KEY");
            hex::encode(Sha256::digest(security.secret_key.as_bytes()))
        }
    }
}

/// Encrypt content with AES-256-GCM under a key scoped to `scope` (the owning user id).
/// Output is base64 of nonce followed by ciphertext.
pub fn encrypt_content(content: &str, scope: &str, master_key: &str) -> Result<String> {
    let key = derive_scoped_key(master_key, scope)?;
    let cipher = Aes256Gcm::new(&key);
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, content.as_bytes())
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    let mut encrypted = nonce.to_vec();
    encrypted.extend_from_slice(&ciphertext);

    Ok(STANDARD.encode(&encrypted))
}

pub fn decrypt_content(encrypted_content: &str, scope: &str, master_key: &str) -> Result<String> {
    let encrypted = STANDARD
        .decode(encrypted_content)
        .map_err(|e| anyhow!("Base64 decode failed: {}", e))?;

    if encrypted.len() < NONCE_LEN {
        return Err(anyhow!("Invalid encrypted data: too short"));
    }

    let (nonce, ciphertext) = encrypted.split_at(NONCE_LEN);
    let key = derive_scoped_key(master_key, scope)?;
    let cipher = Aes256Gcm::new(&key);

    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| anyhow!("Decryption failed: {}", e))?;

    String::from_utf8(plaintext).map_err(|e| anyhow!("Invalid UTF-8 after decryption: {}", e))
}

fn derive_scoped_key(master_key: &str, scope: &str) -> Result<Key<Aes256Gcm>> {
    // 64 chars is taken as hex; anything else is used as raw bytes padded to 32
    let master_key_bytes = if master_key.len() == 64 {
        hex::decode(master_key).map_err(|e| anyhow!("Invalid hex master key: {}", e))?
    } else {
        let mut key_bytes = master_key.as_bytes().to_vec();
        key_bytes.resize(32, 0);
        key_bytes
    };

    let hk = Hkdf::<Sha256>::new(None, &master_key_bytes);
    let mut okm = [0u8; 32];
    hk.expand(scope.as_bytes(), &mut okm)
        .map_err(|e| anyhow!("HKDF expansion failed: {}", e))?;

    Ok(*Key::<Aes256Gcm>::from_slice(&okm))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let master_key = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";
        let original = "If you are reading this, please water my plants.";

        let encrypted = encrypt_content(original, "user-1", master_key).unwrap();
        assert_ne!(encrypted, original);
        assert_eq!(decrypt_content(&encrypted, "user-1", master_key).unwrap(), original);
        assert!(decrypt_content(&encrypted, "user-2", master_key).is_err());
    }

    #[test]
    fn test_derived_key_is_stable() {
        let security = SecurityConfig {
            secret_key: "s3cret".to_string(),
            message_encryption_key: None,
        };
        let key = resolve_content_key(&security);
        assert_eq!(key.len(), 64);
        assert_eq!(key, resolve_content_key(&security));

        let encrypted = encrypt_content("hello", "scope", &key).unwrap();
        assert_eq!(decrypt_content(&encrypted, "scope", &resolve_content_key(&security)).unwrap(), "hello");

        let dedicated = SecurityConfig {
            secret_key: "s3cret".to_string(),
            message_encryption_key: Some("dedicated".to_string()),
        };
        assert_eq!(resolve_content_key(&dedicated), "dedicated");
    }
}
