//! Accessory identification and advertisement records.

use crate::features::{FeatureFlags, StatusFlags};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Device identifier advertised in the `id` TXT field (MAC-like, 6 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub [u8; 6]);

/// Accessory category from the `ci` TXT field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Other,
    Bridge,
    Fan,
    GarageDoorOpener,
    Lightbulb,
    DoorLock,
    Outlet,
    Switch,
    Thermostat,
    Sensor,
    SecuritySystem,
    Door,
    Window,
    WindowCovering,
    ProgrammableSwitch,
    RangeExtender,
    IpCamera,
    VideoDoorbell,
    AirPurifier,
    Heater,
    AirConditioner,
    Humidifier,
    Dehumidifier,
    Sprinkler,
    Faucet,
    ShowerSystem,
    Television,
    Remote,
    /// Identifier not known to this controller.
    Unknown(u16),
}

/// One `_hap._tcp` service advertisement.
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    pub name: String,
    pub address: IpAddr,
    pub port: u16,
    /// `c#`: bumped whenever the accessory database changes.
    pub config_number: u32,
    pub feature_flags: FeatureFlags,
    pub id: DeviceId,
    pub model: String,
    pub protocol_version: String,
    /// `s#`: current state number.
    pub state_number: u32,
    pub status_flags: StatusFlags,
    pub category: Category,
}

impl DeviceId {
    /// Parse a device id from string.
    ///
    /// Supports formats:
    /// - Colon-separated: "AA:BB:CC:DD:EE:FF"
    /// - Bare hex: "AABBCCDDEEFF"
    pub fn from_mac_string(s: &str) -> Result<Self, crate::error::ParseError> {
        use crate::error::ParseError;

        let s = s.trim();
        let digits: String = if s.contains(':') {
            let parts: Vec<&str> = s.split(':').collect();
            if parts.iter().any(|p| p.len() != 2) {
                return Err(ParseError::InvalidFormat(format!(
                    "device id groups must be two hex digits: {}",
                    s
                )));
            }
            parts.concat()
        } else {
            s.to_string()
        };

        if digits.len() != 12 {
            return Err(ParseError::InvalidFormat(format!(
                "device id must have 6 bytes, got {}",
                s
            )));
        }

        let bytes = hex::decode(&digits).map_err(|_| ParseError::InvalidHex(s.to_string()))?;
        let mut arr = [0u8; 6];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Convert to colon-separated string (uppercase).
    pub fn to_mac_string(&self) -> String {
        format!(
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_mac_string())
    }
}

impl Category {
    pub fn from_id(id: u16) -> Self {
        match id {
            1 => Category::Other,
            2 => Category::Bridge,
            3 => Category::Fan,
            4 => Category::GarageDoorOpener,
            5 => Category::Lightbulb,
            6 => Category::DoorLock,
            7 => Category::Outlet,
            8 => Category::Switch,
            9 => Category::Thermostat,
            10 => Category::Sensor,
            11 => Category::SecuritySystem,
            12 => Category::Door,
            13 => Category::Window,
            14 => Category::WindowCovering,
            15 => Category::ProgrammableSwitch,
            16 => Category::RangeExtender,
            17 => Category::IpCamera,
            18 => Category::VideoDoorbell,
            19 => Category::AirPurifier,
            20 => Category::Heater,
            21 => Category::AirConditioner,
            22 => Category::Humidifier,
            23 => Category::Dehumidifier,
            28 => Category::Sprinkler,
            29 => Category::Faucet,
            30 => Category::ShowerSystem,
            31 => Category::Television,
            32 => Category::Remote,
            other => Category::Unknown(other),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Category::Other => "Other",
            Category::Bridge => "Bridge",
            Category::Fan => "Fan",
            Category::GarageDoorOpener => "Garage Door Opener",
            Category::Lightbulb => "Lightbulb",
            Category::DoorLock => "Door Lock",
            Category::Outlet => "Outlet",
            Category::Switch => "Switch",
            Category::Thermostat => "Thermostat",
            Category::Sensor => "Sensor",
            Category::SecuritySystem => "Security System",
            Category::Door => "Door",
            Category::Window => "Window",
            Category::WindowCovering => "Window Covering",
            Category::ProgrammableSwitch => "Programmable Switch",
            Category::RangeExtender => "Range Extender",
            Category::IpCamera => "IP Camera",
            Category::VideoDoorbell => "Video Doorbell",
            Category::AirPurifier => "Air Purifier",
            Category::Heater => "Heater",
            Category::AirConditioner => "Air Conditioner",
            Category::Humidifier => "Humidifier",
            Category::Dehumidifier => "Dehumidifier",
            Category::Sprinkler => "Sprinkler",
            Category::Faucet => "Faucet",
            Category::ShowerSystem => "Shower System",
            Category::Television => "Television",
            Category::Remote => "Remote",
            Category::Unknown(_) => "Unknown",
        }
    }
}

impl Advertisement {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// Pairing id the accessory will present during pair-setup and pair-verify.
    pub fn pairing_id(&self) -> String {
        self.id.to_mac_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod device_id {
        use super::*;

        #[test]
        fn parse_colon_separated() {
            let id = DeviceId::from_mac_string("12:34:56:00:01:0A").unwrap();
            assert_eq!(id.0, [0x12, 0x34, 0x56, 0x00, 0x01, 0x0A]);
        }

        #[test]
        fn parse_bare_hex() {
            let id = DeviceId::from_mac_string("aabbccddeeff").unwrap();
            assert_eq!(id.0, [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        }

        #[test]
        fn roundtrip_uppercases() {
            let id = DeviceId::from_mac_string("12:34:56:00:01:0a").unwrap();
            assert_eq!(id.to_mac_string(), "12:34:56:00:01:0A");
            assert_eq!(id.to_string(), "12:34:56:00:01:0A");
        }

        #[test]
        fn parse_rejects_short_id() {
            assert!(DeviceId::from_mac_string("12:34:56").is_err());
            assert!(DeviceId::from_mac_string("1:2:3:4:5:6").is_err());
        }

        #[test]
        fn parse_rejects_non_hex() {
            assert!(DeviceId::from_mac_string("GG:34:56:00:01:0A").is_err());
        }
    }

    mod category {
        use super::*;

        #[test]
        fn known_identifiers() {
            assert_eq!(Category::from_id(2), Category::Bridge);
            assert_eq!(Category::from_id(5), Category::Lightbulb);
            assert_eq!(Category::from_id(5).name(), "Lightbulb");
            assert_eq!(Category::from_id(32), Category::Remote);
        }

        #[test]
        fn gaps_are_unknown() {
            assert_eq!(Category::from_id(24), Category::Unknown(24));
            assert_eq!(Category::from_id(0).name(), "Unknown");
        }
    }
}
