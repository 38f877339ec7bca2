//! Encrypted control channel with length-prefixed framing.
//!
//! After pair-verify completes, every request and response on the
//! connection is carried in ChaCha20-Poly1305 frames:
//!
//! ```text
//! +----------------+------------------+----------+
//! | Length (2 LE)  | Ciphertext (N)   | Tag (16) |
//! +----------------+------------------+----------+
//! ```
//!
//! N is at most 1024. Nonces are per-direction counters starting at 0.

use homekit_core::{CryptoError, Error, ErrorKind, Result, Stage};
use homekit_crypto::chacha::{frame_length, ControlCipher};
use homekit_crypto::keys::SessionKeys;
use tracing::warn;

pub use homekit_crypto::chacha::{FRAME_HEADER_LEN, MAX_FRAME_PLAINTEXT, TAG_LEN};

/// Encrypted channel for post-verify traffic.
///
/// Any framing or authentication failure poisons the channel: the counters
/// can no longer be trusted, so every later call fails with
/// [`ErrorKind::SessionInvalidated`] and the connection must be re-verified.
pub struct EncryptedChannel {
    cipher: ControlCipher,
    poisoned: bool,
}

impl EncryptedChannel {
    /// Create a channel from the controller-side session keys.
    pub fn new(keys: SessionKeys) -> Self {
        Self {
            cipher: ControlCipher::new(*keys.write_key.as_bytes(), *keys.read_key.as_bytes()),
            poisoned: false,
        }
    }

    /// Create a channel with explicit keys.
    pub fn with_keys(write_key: [u8; 32], read_key: [u8; 32]) -> Self {
        Self {
            cipher: ControlCipher::new(write_key, read_key),
            poisoned: false,
        }
    }

    /// Encrypt a request into one or more frames.
    pub fn encrypt_frame(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.ensure_usable()?;
        let result = self.cipher.encrypt(plaintext);
        self.check(result)
    }

    /// Decrypt a buffer holding complete frames.
    pub fn decrypt_frame(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.ensure_usable()?;
        let result = self.cipher.decrypt(data);
        self.check(result)
    }

    /// Decrypt one frame body read after its 2-byte header.
    pub fn decrypt_block(&mut self, header: [u8; 2], body: &[u8]) -> Result<Vec<u8>> {
        self.ensure_usable()?;
        let result = self.cipher.decrypt_block(body, u16::from_le_bytes(header));
        self.check(result)
    }

    /// Body length (ciphertext plus tag) announced by a frame header.
    pub fn body_length(header: [u8; 2]) -> usize {
        frame_length(header)
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Frames sent so far.
    pub fn encrypt_counter(&self) -> u64 {
        self.cipher.encrypt_counter()
    }

    /// Frames received so far.
    pub fn decrypt_counter(&self) -> u64 {
        self.cipher.decrypt_counter()
    }

    /// Mark the channel unusable after an error outside the cipher.
    pub fn poison(&mut self) {
        self.poisoned = true;
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.poisoned {
            return Err(Error::new(Stage::Session, ErrorKind::SessionInvalidated));
        }
        Ok(())
    }

    fn check(&mut self, result: std::result::Result<Vec<u8>, CryptoError>) -> Result<Vec<u8>> {
        result.map_err(|err| {
            self.poisoned = true;
            warn!("Encrypted channel failed: {}", err);
            let kind = match err {
                CryptoError::Decryption(msg) => ErrorKind::Format(msg),
                other => other.into(),
            };
            Error::new(Stage::Session, kind)
        })
    }
}
