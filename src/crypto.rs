//! Credential vault using AES-256-GCM
//!
//! This module wraps and unwraps OAuth credentials stored in the database.
//! The ciphertext layout is self-describing (version byte, then nonce, then
//! ciphertext and tag) so the algorithm can be rotated later. The vault
//! treats payloads as opaque strings and knows nothing about token
//! semantics.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

const VERSION_AES_GCM: u8 = 0x01;
const VERSION_FIELD_LEN: usize = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_WRAPPED_LEN: usize = VERSION_FIELD_LEN + NONCE_LEN + TAG_LEN;

/// Vault error types
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("wrap failed: {0}")]
    WrapFailed(String),
    #[error("unwrap failed: {0}")]
    UnwrapFailed(String),
    #[error("unsupported ciphertext version {0:#04x}")]
    UnsupportedVersion(u8),
    #[error("invalid ciphertext format")]
    InvalidFormat,
    #[error("empty ciphertext")]
    EmptyCiphertext,
}

/// Secure wrapper for the vault key with zeroization
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct VaultKey([u8; 32]);

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VaultKey(..)")
    }
}

impl VaultKey {
    /// Derive the vault key from the deployment encryption secret.
    pub fn derive(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest);
        VaultKey(key)
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Wrap a plaintext credential for at-rest storage.
pub fn wrap(key: &VaultKey, plaintext: &str) -> Result<Vec<u8>, VaultError> {
    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let mut ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| VaultError::WrapFailed(e.to_string()))?;

    let mut result = Vec::with_capacity(VERSION_FIELD_LEN + NONCE_LEN + ciphertext.len());
    result.push(VERSION_AES_GCM);
    result.extend_from_slice(&nonce);
    result.append(&mut ciphertext);

    Ok(result)
}

/// Unwrap a stored ciphertext back to the plaintext credential.
pub fn unwrap(key: &VaultKey, wrapped: &[u8]) -> Result<String, VaultError> {
    if wrapped.is_empty() {
        return Err(VaultError::EmptyCiphertext);
    }

    if wrapped[0] != VERSION_AES_GCM {
        return Err(VaultError::UnsupportedVersion(wrapped[0]));
    }

    if wrapped.len() < MIN_WRAPPED_LEN {
        return Err(VaultError::InvalidFormat);
    }

    let nonce = Nonce::from_slice(&wrapped[VERSION_FIELD_LEN..VERSION_FIELD_LEN + NONCE_LEN]);
    let ciphertext = &wrapped[VERSION_FIELD_LEN + NONCE_LEN..];

    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| VaultError::UnwrapFailed(e.to_string()))?;

    String::from_utf8(plaintext)
        .map_err(|e| VaultError::UnwrapFailed(format!("invalid UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> VaultKey {
        VaultKey::derive("test-secret")
    }

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let key = test_key();
        let plaintext = "ya29.sample-access-token";

        let wrapped = wrap(&key, plaintext).expect("wrap succeeds");
        let unwrapped = unwrap(&key, &wrapped).expect("unwrap succeeds");

        assert_eq!(unwrapped, plaintext);
    }

    #[test]
    fn test_key_derivation_is_deterministic() {
        let wrapped = wrap(&VaultKey::derive("secret-a"), "token").expect("wrap succeeds");
        let unwrapped = unwrap(&VaultKey::derive("secret-a"), &wrapped).expect("same secret");
        assert_eq!(unwrapped, "token");
    }

    #[test]
    fn test_different_secret_fails() {
        let wrapped = wrap(&VaultKey::derive("secret-a"), "token").expect("wrap succeeds");
        let result = unwrap(&VaultKey::derive("secret-b"), &wrapped);
        assert!(result.is_err());
    }

    #[test]
    fn test_modified_ciphertext_fails() {
        let key = test_key();
        let mut wrapped = wrap(&key, "token").expect("wrap succeeds");
        wrapped[13] ^= 0x01;

        let result = unwrap(&key, &wrapped);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_plaintext_works() {
        let key = test_key();
        let wrapped = wrap(&key, "").expect("wrap succeeds");
        let unwrapped = unwrap(&key, &wrapped).expect("unwrap succeeds");
        assert_eq!(unwrapped, "");
    }

    #[test]
    fn test_nonce_uniqueness() {
        let key = test_key();
        let wrapped1 = wrap(&key, "token").expect("wrap succeeds");
        let wrapped2 = wrap(&key, "token").expect("wrap succeeds");

        // Nonces (bytes 1-13) should be different
        assert_ne!(&wrapped1[1..13], &wrapped2[1..13]);
        assert_eq!(unwrap(&key, &wrapped1).unwrap(), "token");
        assert_eq!(unwrap(&key, &wrapped2).unwrap(), "token");
    }

    #[test]
    fn test_unknown_version_rejected() {
        let key = test_key();
        let mut wrapped = wrap(&key, "token").expect("wrap succeeds");
        wrapped[0] = 0x7f;

        let result = unwrap(&key, &wrapped);
        assert!(matches!(result, Err(VaultError::UnsupportedVersion(0x7f))));
    }

    #[test]
    fn test_empty_ciphertext_rejected() {
        let result = unwrap(&test_key(), b"");
        assert!(matches!(result, Err(VaultError::EmptyCiphertext)));
    }

    #[test]
    fn test_truncated_ciphertext_rejected() {
        let result = unwrap(&test_key(), &[VERSION_AES_GCM, 0x02, 0x03]);
        assert!(matches!(result, Err(VaultError::InvalidFormat)));
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        let key = test_key();
        assert_eq!(format!("{:?}", key), "VaultKey(..)");
    }
}
