//! # homekit-crypto
//!
//! Cryptographic building blocks for HomeKit controller pairing.
//!
//! This crate provides:
//! - TLV8 message codec
//! - SRP-6a (3072-bit, SHA-512) for pair-setup, client and verifier sides
//! - Curve25519 ECDH for pair-verify key agreement
//! - Ed25519 long-term identities and signatures
//! - ChaCha20-Poly1305 for pairing sub-messages and session frames
//! - HKDF-SHA512 with the protocol's salt/info strings
//!
//! All secret material is zeroized on drop.

pub mod chacha;
pub mod curve25519;
pub mod ed25519;
pub mod hkdf;
pub mod keys;
pub mod srp;
pub mod tlv;

pub use chacha::ControlCipher;
pub use curve25519::EcdhKeyPair;
pub use ed25519::IdentityKeyPair;
pub use keys::{EncryptionKey, SessionKeys, SharedSecret};
pub use srp::{SrpClient, SrpServer};
pub use tlv::{Method, Tlv8, TlvItem, TlvType};
