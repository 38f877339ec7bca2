//! `_hap._tcp` TXT record parsing.

use homekit_core::error::ParseError;
use homekit_core::{Advertisement, Category, DeviceId, FeatureFlags, StatusFlags};
use std::collections::HashMap;
use std::net::IpAddr;
use tracing::debug;

/// A resolved service as handed over by an mDNS backend.
#[derive(Debug, Clone, Default)]
pub struct ServiceRecord {
    /// Full service instance name.
    pub name: String,
    pub addresses: Vec<IpAddr>,
    pub port: u16,
    pub txt: HashMap<String, String>,
}

/// Parser for mDNS TXT records.
pub struct TxtRecordParser;

impl TxtRecordParser {
    /// Parse a `_hap._tcp` service TXT record into an Advertisement.
    ///
    /// `c#`, `id`, `md`, `s#` and `ci` are required. `ff` and `sf` default
    /// to 0 and `pv` to "1.0".
    pub fn parse_hap_txt(
        name: &str,
        txt: &HashMap<String, String>,
        address: IpAddr,
        port: u16,
    ) -> Result<Advertisement, ParseError> {
        let config_number = Self::parse_u32(Self::required(txt, "c#")?, "c#")?;

        let feature_flags = txt
            .get("ff")
            .map(|ff| FeatureFlags::from_txt_value(ff))
            .transpose()?
            .unwrap_or_default();

        let id = DeviceId::from_mac_string(Self::required(txt, "id")?)?;
        let model = Self::required(txt, "md")?.to_string();

        let protocol_version = txt
            .get("pv")
            .cloned()
            .unwrap_or_else(|| "1.0".to_string());

        let state_number = Self::parse_u32(Self::required(txt, "s#")?, "s#")?;

        let status_flags = txt
            .get("sf")
            .map(|sf| StatusFlags::from_txt_value(sf))
            .transpose()?
            .unwrap_or_default();

        let category_id = Self::required(txt, "ci")?;
        let category = category_id
            .trim()
            .parse::<u16>()
            .map(Category::from_id)
            .map_err(|_| ParseError::InvalidValue(format!("ci: {}", category_id)))?;

        Ok(Advertisement {
            name: name.to_string(),
            address,
            port,
            config_number,
            feature_flags,
            id,
            model,
            protocol_version,
            state_number,
            status_flags,
            category,
        })
    }

    /// Parse a batch of resolved services, dropping incomplete ones.
    pub fn parse_records<I>(records: I) -> Vec<Advertisement>
    where
        I: IntoIterator<Item = ServiceRecord>,
    {
        records
            .into_iter()
            .filter_map(|record| {
                let Some(&address) = record.addresses.first() else {
                    debug!("Service {} has no addresses, skipping", record.name);
                    return None;
                };
                match Self::parse_hap_txt(&record.name, &record.txt, address, record.port) {
                    Ok(advertisement) => {
                        debug!(
                            "Parsed accessory: {} ({})",
                            advertisement.name,
                            advertisement.id.to_mac_string()
                        );
                        Some(advertisement)
                    }
                    Err(e) => {
                        debug!("Skipping service {}: {}", record.name, e);
                        None
                    }
                }
            })
            .collect()
    }

    fn required<'a>(
        txt: &'a HashMap<String, String>,
        key: &'static str,
    ) -> Result<&'a str, ParseError> {
        txt.get(key)
            .map(String::as_str)
            .ok_or(ParseError::MissingField(key))
    }

    fn parse_u32(value: &str, key: &str) -> Result<u32, ParseError> {
        value
            .trim()
            .parse()
            .map_err(|_| ParseError::InvalidValue(format!("{}: {}", key, value)))
    }
}
