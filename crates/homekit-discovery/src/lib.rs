//! # homekit-discovery
//!
//! Discovery boundary for HomeKit accessories.
//!
//! This crate provides:
//! - The [`Discovery`] trait a Bonjour/mDNS backend implements
//! - `_hap._tcp` TXT record parsing into [`Advertisement`]s
//! - Time-boxed lookup of an accessory's address by device id
//!
//! ## Example
//!
//! ```ignore
//! use homekit_discovery::{find_device_address, Discovery};
//!
//! let addr = find_device_address(&backend, &device_id, 10).await?;
//! println!("accessory listening on {}", addr);
//! ```
//!
//! [`Advertisement`]: homekit_core::Advertisement

mod parser;
mod traits;

pub use parser::{ServiceRecord, TxtRecordParser};
pub use traits::{find_advertisement, find_device_address, Discovery, StaticDiscovery};

/// HomeKit Accessory Protocol service type.
pub const HAP_SERVICE_TYPE: &str = "_hap._tcp.local.";
