//! Pairing feature flags (`ff`) and status flags (`sf`) from the HAP TXT record.
//!
//! Both are advertised as decimal integers.

use crate::error::ParseError;

/// `ff` TXT field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureFlags(pub u8);

impl FeatureFlags {
    /// Accessory pairs via an Apple authentication coprocessor.
    pub const SUPPORTS_MFI_HARDWARE_AUTH: u8 = 1 << 0;
    /// Accessory supports software token authentication.
    pub const SUPPORTS_SOFTWARE_AUTH: u8 = 1 << 1;

    pub fn from_txt_value(s: &str) -> Result<Self, ParseError> {
        parse_decimal(s, "ff").map(Self)
    }

    pub fn supports_mfi_hardware_auth(&self) -> bool {
        self.0 & Self::SUPPORTS_MFI_HARDWARE_AUTH != 0
    }

    pub fn supports_software_auth(&self) -> bool {
        self.0 & Self::SUPPORTS_SOFTWARE_AUTH != 0
    }

    /// Human-readable summary matching what pairing tools show.
    pub fn description(&self) -> &'static str {
        if self.supports_mfi_hardware_auth() {
            "Supports HAP Pairing"
        } else if self.supports_software_auth() {
            "Supports software authentication"
        } else {
            "No support for HAP Pairing"
        }
    }
}

/// `sf` TXT field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusFlags(pub u8);

impl StatusFlags {
    pub const NOT_PAIRED: u8 = 1 << 0;
    pub const WIFI_NOT_CONFIGURED: u8 = 1 << 1;
    pub const PROBLEM_DETECTED: u8 = 1 << 2;

    pub fn from_txt_value(s: &str) -> Result<Self, ParseError> {
        parse_decimal(s, "sf").map(Self)
    }

    /// Whether the accessory already has at least one controller pairing.
    pub fn is_paired(&self) -> bool {
        self.0 & Self::NOT_PAIRED == 0
    }

    pub fn wifi_configured(&self) -> bool {
        self.0 & Self::WIFI_NOT_CONFIGURED == 0
    }

    pub fn problem_detected(&self) -> bool {
        self.0 & Self::PROBLEM_DETECTED != 0
    }
}

fn parse_decimal(s: &str, field: &str) -> Result<u8, ParseError> {
    s.trim()
        .parse::<u8>()
        .map_err(|_| ParseError::InvalidValue(format!("invalid {} value: {}", field, s)))
}
