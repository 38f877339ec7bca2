//! Controller long-term identity.
//!
//! The same pairing id and Ed25519 key must be presented in pair-setup M5
//! and in every pair-verify M3, otherwise the accessory will not recognize
//! this controller.

use homekit_core::identity::hex_32;
use homekit_core::{PairingId, PairingIdentity, Permissions};
use homekit_crypto::ed25519::IdentityKeyPair;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::ZeroizeOnDrop;

/// The controller's pairing id and long-term signing key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "StoredIdentity", into = "StoredIdentity")]
pub struct ControllerIdentity {
    pairing_id: PairingId,
    keypair: IdentityKeyPair,
}

/// On-disk form: the seed plus its public key for a consistency check.
#[derive(Serialize, Deserialize, ZeroizeOnDrop)]
struct StoredIdentity {
    #[zeroize(skip)]
    pairing_id: PairingId,
    #[zeroize(skip)]
    #[serde(with = "hex_32")]
    public_key: [u8; 32],
    #[serde(with = "hex_32")]
    secret_seed: [u8; 32],
}

impl ControllerIdentity {
    /// Generate a new identity with a random uppercase UUID as pairing id.
    pub fn generate() -> Self {
        let id = Uuid::new_v4().hyphenated().to_string().to_uppercase();
        Self::with_id(IdentityKeyPair::generate(), id)
    }

    /// Create from an existing keypair with a custom identifier.
    pub fn with_id(keypair: IdentityKeyPair, id: impl Into<PairingId>) -> Self {
        Self {
            pairing_id: id.into(),
            keypair,
        }
    }

    pub fn pairing_id(&self) -> &PairingId {
        &self.pairing_id
    }

    /// Ed25519 public key (LTPK).
    pub fn public_key(&self) -> [u8; 32] {
        self.keypair.public_key()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.keypair.sign(message)
    }

    /// This controller as accessories record it after pair-setup.
    pub fn as_pairing_identity(&self) -> PairingIdentity {
        PairingIdentity::new(
            self.pairing_id.clone(),
            self.public_key(),
            Permissions::Admin,
        )
    }
}

impl TryFrom<StoredIdentity> for ControllerIdentity {
    type Error = String;

    fn try_from(stored: StoredIdentity) -> Result<Self, Self::Error> {
        let keypair = IdentityKeyPair::from_seed(&stored.secret_seed);
        if keypair.public_key() != stored.public_key {
            return Err(format!(
                "public key for controller {} does not match its seed",
                stored.pairing_id
            ));
        }
        Ok(Self::with_id(keypair, stored.pairing_id.clone()))
    }
}

impl From<ControllerIdentity> for StoredIdentity {
    fn from(identity: ControllerIdentity) -> Self {
        Self {
            pairing_id: identity.pairing_id.clone(),
            public_key: identity.keypair.public_key(),
            secret_seed: identity.keypair.seed(),
        }
    }
}
