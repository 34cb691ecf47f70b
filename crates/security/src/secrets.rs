//! Sealing of credentials at rest with AES-256-GCM.
//!
//! The key is either derived from a configured secret (SHA-256) or read
//! from a key file that is generated on first use. Sealed values are
//! `base64(nonce || ciphertext)` so they fit in a JSON string.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::path::Path;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Seals and opens secrets with one symmetric key.
pub struct SecretsManager {
    cipher: Aes256Gcm,
}

impl SecretsManager {
    /// Derive the key from a passphrase.
    pub fn new(passphrase: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"clawdvc-credential-key:");
        hasher.update(passphrase.as_bytes());
        let key: [u8; KEY_LEN] = hasher.finalize().into();
        Self::from_key(&key)
    }

    /// Use raw key bytes.
    pub fn from_key(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Read the key from `path`, generating and writing a fresh one if the
    /// file does not exist.
    pub fn from_key_file(path: &Path) -> Result<Self, SecretError> {
        if path.exists() {
            let encoded = std::fs::read_to_string(path)
                .map_err(|e| SecretError::KeyFile(format!("{}: {e}", path.display())))?;
            let bytes = BASE64
                .decode(encoded.trim())
                .map_err(|e| SecretError::KeyFile(format!("{}: {e}", path.display())))?;
            let key: [u8; KEY_LEN] = bytes
                .try_into()
                .map_err(|_| SecretError::KeyFile(format!("{}: key must be 32 bytes", path.display())))?;
            return Ok(Self::from_key(&key));
        }

        let mut key = [0u8; KEY_LEN];
        rand::rng().fill(&mut key[..]);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SecretError::KeyFile(format!("{}: {e}", parent.display())))?;
        }
        std::fs::write(path, BASE64.encode(key))
            .map_err(|e| SecretError::KeyFile(format!("{}: {e}", path.display())))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
        }
        tracing::info!(path = %path.display(), "Generated credential key file");
        Ok(Self::from_key(&key))
    }

    /// Encrypt `plaintext` under a fresh random nonce.
    pub fn seal(&self, plaintext: &str) -> Result<String, SecretError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill(&mut nonce[..]);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| SecretError::EncryptionFailed)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    /// Decrypt a value produced by [`seal`](Self::seal).
    pub fn open(&self, sealed: &str) -> Result<String, SecretError> {
        let bytes = BASE64
            .decode(sealed.trim())
            .map_err(|e| SecretError::DecryptionFailed(e.to_string()))?;
        if bytes.len() < NONCE_LEN {
            return Err(SecretError::DecryptionFailed("sealed value too short".into()));
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| SecretError::DecryptionFailed("authentication failed".into()))?;
        String::from_utf8(plaintext)
            .map_err(|_| SecretError::DecryptionFailed("invalid UTF-8 after decryption".into()))
    }

    /// Check if an output string contains any of the known secrets.
    pub fn scan_for_leakage(output: &str, secrets: &[&str]) -> bool {
        secrets.iter().any(|s| !s.is_empty() && output.contains(s))
    }

    /// Replace every occurrence of the known secrets with `[REDACTED]`.
    pub fn redact(output: &str, secrets: &[&str]) -> String {
        secrets
            .iter()
            .filter(|s| !s.is_empty())
            .fold(output.to_string(), |acc, s| acc.replace(s, "[REDACTED]"))
    }
}

/// Errors from secrets operations.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Key file error: {0}")]
    KeyFile(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let manager = SecretsManager::new("my-secure-password-123");
        let plaintext = "auth_token=abc; ct0=def";
        let sealed = manager.seal(plaintext).unwrap();
        assert!(!sealed.contains("auth_token"));
        assert_eq!(manager.open(&sealed).unwrap(), plaintext);
    }

    #[test]
    fn fresh_nonce_per_seal() {
        let manager = SecretsManager::new("password");
        let a = manager.seal("same").unwrap();
        let b = manager.seal("same").unwrap();
        assert_ne!(a, b);
        assert_eq!(manager.open(&a).unwrap(), "same");
        assert_eq!(manager.open(&b).unwrap(), "same");
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let sealed = SecretsManager::new("correct").seal("my-api-key").unwrap();
        let err = SecretsManager::new("wrong").open(&sealed).unwrap_err();
        assert!(matches!(err, SecretError::DecryptionFailed(_)));
    }

    #[test]
    fn tampered_value_is_rejected() {
        let manager = SecretsManager::new("password");
        let sealed = manager.seal("secret").unwrap();
        let mut bytes = BASE64.decode(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(manager.open(&BASE64.encode(bytes)).is_err());
        assert!(manager.open("bm9wZQ==").is_err());
        assert!(manager.open("not base64!").is_err());
    }

    #[test]
    fn key_file_is_created_then_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join(".account_key");
        let first = SecretsManager::from_key_file(&path).unwrap();
        assert!(path.exists());
        let sealed = first.seal("cookie").unwrap();

        let second = SecretsManager::from_key_file(&path).unwrap();
        assert_eq!(second.open(&sealed).unwrap(), "cookie");
    }

    #[test]
    fn leakage_detection_and_redaction() {
        let secrets = ["sk-abc123", ""];
        assert!(SecretsManager::scan_for_leakage("key is sk-abc123", &secrets));
        assert!(!SecretsManager::scan_for_leakage("nothing here", &secrets));
        assert_eq!(
            SecretsManager::redact("key is sk-abc123.", &secrets),
            "key is [REDACTED]."
        );
    }
}
