//! Session key types and derivation.

use crate::hkdf;
use homekit_core::error::CryptoError;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Shared secret from SRP or ECDH.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret(Vec<u8>);

/// 32-byte encryption key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey(pub [u8; 32]);

/// Traffic keys for one encrypted connection.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SessionKeys {
    /// Key for encrypting data we send.
    pub write_key: EncryptionKey,
    /// Key for decrypting data we receive.
    pub read_key: EncryptionKey,
}

impl SharedSecret {
    /// Create from raw bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl EncryptionKey {
    /// Create from raw bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Pair-setup M5/M6 key from the SRP session key.
    pub fn pair_setup(session_key: &SharedSecret) -> Result<Self, CryptoError> {
        hkdf::derive_pair_setup_key(session_key.as_bytes()).map(Self)
    }

    /// Pair-verify M2/M3 key from the ECDH shared secret.
    pub fn pair_verify(shared_secret: &SharedSecret) -> Result<Self, CryptoError> {
        hkdf::derive_pair_verify_key(shared_secret.as_bytes()).map(Self)
    }
}

impl SessionKeys {
    /// Controller-side control channel keys.
    pub fn derive_control_keys(shared_secret: &SharedSecret) -> Result<Self, CryptoError> {
        Ok(Self {
            write_key: EncryptionKey(hkdf::derive_control_write_key(shared_secret.as_bytes())?),
            read_key: EncryptionKey(hkdf::derive_control_read_key(shared_secret.as_bytes())?),
        })
    }

    /// Accessory-side keys: the controller's write key is the accessory's read key.
    pub fn derive_accessory_keys(shared_secret: &SharedSecret) -> Result<Self, CryptoError> {
        Self::derive_control_keys(shared_secret).map(|keys| Self {
            write_key: keys.read_key.clone(),
            read_key: keys.write_key.clone(),
        })
    }
}
