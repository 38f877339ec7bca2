//! # homekit-core
//!
//! Core types, traits, and error definitions shared across all HomeKit
//! controller crates.
//!
//! This crate provides:
//! - The staged error taxonomy used by every pairing operation
//! - Pairing identities and permission levels
//! - Accessory advertisement records as produced by discovery
//! - Feature, status and category flags from the `_hap._tcp` TXT record

pub mod device;
pub mod error;
pub mod features;
pub mod identity;

pub use device::{Advertisement, Category, DeviceId};
pub use error::{
    CryptoError, Error, ErrorKind, ParseError, Result, ResultExt, Stage, TransportError,
};
pub use features::{FeatureFlags, StatusFlags};
pub use identity::{PairingId, PairingIdentity, Permissions};
