//! Pairing identities: the unit of trust between controller and accessory.

use crate::error::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable peer identifier.
///
/// Accessories use their `XX:XX:XX:XX:XX:XX` device id, controllers a UUID.
/// Both travel as UTF-8 in the `Identifier` TLV.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PairingId(String);

impl PairingId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Decode an identifier received on the wire.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        std::str::from_utf8(bytes)
            .map(|s| Self(s.to_string()))
            .map_err(|_| ParseError::InvalidValue("pairing id is not valid UTF-8".to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for PairingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PairingId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PairingId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Permission level of a pairing (`kTLVType_Permissions`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permissions {
    Regular,
    Admin,
}

impl Permissions {
    pub fn from_byte(b: u8) -> Result<Self, ParseError> {
        match b {
            0x00 => Ok(Permissions::Regular),
            0x01 => Ok(Permissions::Admin),
            other => Err(ParseError::InvalidValue(format!(
                "unknown permissions value {:#04x}",
                other
            ))),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Permissions::Regular => 0x00,
            Permissions::Admin => 0x01,
        }
    }
}

/// A peer's identifier, long-term Ed25519 public key, and permission level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingIdentity {
    pub pairing_id: PairingId,
    #[serde(with = "hex_32")]
    pub long_term_public_key: [u8; 32],
    pub permissions: Permissions,
}

impl PairingIdentity {
    pub fn new(
        pairing_id: impl Into<PairingId>,
        long_term_public_key: [u8; 32],
        permissions: Permissions,
    ) -> Self {
        Self {
            pairing_id: pairing_id.into(),
            long_term_public_key,
            permissions,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.permissions == Permissions::Admin
    }
}

/// Serde adapter storing 32-byte keys as lowercase hex strings.
pub mod hex_32 {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|v: Vec<u8>| de::Error::invalid_length(v.len(), &"32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod pairing_id {
        use super::*;

        #[test]
        fn from_utf8_bytes() {
            let id = PairingId::from_bytes(b"12:34:56:00:01:0A").unwrap();
            assert_eq!(id.as_str(), "12:34:56:00:01:0A");
            assert_eq!(id.as_bytes(), b"12:34:56:00:01:0A");
        }

        #[test]
        fn rejects_invalid_utf8() {
            assert!(PairingId::from_bytes(&[0xFF, 0xFE]).is_err());
        }
    }

    mod permissions {
        use super::*;

        #[test]
        fn byte_values() {
            assert_eq!(Permissions::from_byte(0).unwrap(), Permissions::Regular);
            assert_eq!(Permissions::from_byte(1).unwrap(), Permissions::Admin);
            assert_eq!(Permissions::Admin.as_byte(), 1);
            assert_eq!(Permissions::Regular.as_byte(), 0);
        }

        #[test]
        fn unknown_value_rejected() {
            assert!(Permissions::from_byte(2).is_err());
        }
    }

    mod serde_format {
        use super::*;

        #[test]
        fn identity_serializes_key_as_hex() {
            let identity =
                PairingIdentity::new("AA:BB:CC:DD:EE:FF", [0xAB; 32], Permissions::Admin);
            let json = serde_json::to_string(&identity).unwrap();
            assert!(json.contains(&"ab".repeat(32)));
            assert!(json.contains("\"admin\""));

            let back: PairingIdentity = serde_json::from_str(&json).unwrap();
            assert_eq!(back, identity);
        }

        #[test]
        fn short_key_rejected() {
            let json =
                r#"{"pairing_id":"x","long_term_public_key":"abcd","permissions":"regular"}"#;
            assert!(serde_json::from_str::<PairingIdentity>(json).is_err());
        }
    }
}
