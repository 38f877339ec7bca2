//! Curve25519 ECDH for pair-verify session agreement.

use crate::keys::SharedSecret;
use homekit_core::error::CryptoError;
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::ZeroizeOnDrop;

/// Ephemeral Curve25519 key pair for ECDH.
#[derive(ZeroizeOnDrop)]
pub struct EcdhKeyPair {
    #[zeroize(skip)]
    public: [u8; 32],
    secret: [u8; 32],
}

impl EcdhKeyPair {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self {
            public: public.to_bytes(),
            secret: secret.to_bytes(),
        }
    }

    /// Create from existing secret key bytes.
    pub fn from_secret(secret: &[u8; 32]) -> Self {
        let static_secret = StaticSecret::from(*secret);
        Self {
            public: PublicKey::from(&static_secret).to_bytes(),
            secret: *secret,
        }
    }

    /// Get the public key (32 bytes).
    pub fn public_key(&self) -> [u8; 32] {
        self.public
    }

    /// Perform Diffie-Hellman with a peer key taken off the wire.
    ///
    /// Consumes the key pair. Rejects keys that are not 32 bytes and
    /// low-order points (all-zero shared secret).
    pub fn diffie_hellman(self, peer_public: &[u8]) -> Result<SharedSecret, CryptoError> {
        let peer: [u8; 32] = peer_public
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: 32,
                actual: peer_public.len(),
            })?;

        if peer.iter().all(|&b| b == 0) {
            return Err(CryptoError::KeyDerivation(
                "peer public key is all zeros".to_string(),
            ));
        }

        let shared = StaticSecret::from(self.secret).diffie_hellman(&PublicKey::from(peer));
        if !shared.was_contributory() {
            return Err(CryptoError::KeyDerivation(
                "shared secret is all zeros (low-order point)".to_string(),
            ));
        }

        Ok(SharedSecret::new(shared.as_bytes().to_vec()))
    }
}
