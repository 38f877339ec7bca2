//! Trait definitions for service discovery (enables mocking in tests).

use async_trait::async_trait;
use homekit_core::{Advertisement, DeviceId, Error, ErrorKind, Result, Stage};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Trait for `_hap._tcp` discovery backends.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait Discovery: Send + Sync {
    /// Collect every accessory advertised within `window`.
    async fn enumerate(&self, window: Duration) -> Result<Vec<Advertisement>>;

    /// Address of the accessory with `device_id`, if it advertised within `window`.
    async fn resolve(&self, device_id: &DeviceId, window: Duration) -> Result<Option<SocketAddr>> {
        Ok(self
            .enumerate(window)
            .await?
            .into_iter()
            .find(|ad| &ad.id == device_id)
            .map(|ad| ad.socket_addr()))
    }
}

/// Discovery over a fixed set of advertisements.
///
/// Covers accessories with a statically configured address.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    advertisements: Vec<Advertisement>,
}

impl StaticDiscovery {
    pub fn new(advertisements: Vec<Advertisement>) -> Self {
        Self { advertisements }
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn enumerate(&self, _window: Duration) -> Result<Vec<Advertisement>> {
        Ok(self.advertisements.clone())
    }
}

/// Look an accessory up by device id, polling about once per second.
///
/// Gives up with `AccessoryNotFound` once `max_seconds` have elapsed. At
/// least one lookup is always made.
pub async fn find_device_address<D>(
    discovery: &D,
    device_id: &DeviceId,
    max_seconds: u64,
) -> Result<SocketAddr>
where
    D: Discovery + ?Sized,
{
    let addr = poll_for(device_id, max_seconds, || {
        discovery.resolve(device_id, POLL_INTERVAL)
    })
    .await?;
    info!("Found accessory {} at {}", device_id, addr);
    Ok(addr)
}

/// Like [`find_device_address`], returning the whole advertisement.
pub async fn find_advertisement<D>(
    discovery: &D,
    device_id: &DeviceId,
    max_seconds: u64,
) -> Result<Advertisement>
where
    D: Discovery + ?Sized,
{
    let advertisement = poll_for(device_id, max_seconds, move || async move {
        Ok::<_, Error>(discovery
            .enumerate(POLL_INTERVAL)
            .await?
            .into_iter()
            .find(|ad| &ad.id == device_id))
    })
    .await?;
    info!(
        "Found accessory {} ({}) at {}",
        device_id,
        advertisement.model,
        advertisement.socket_addr()
    );
    Ok(advertisement)
}

async fn poll_for<T, F, Fut>(device_id: &DeviceId, max_seconds: u64, mut lookup: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = Instant::now() + Duration::from_secs(max_seconds);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let started = Instant::now();

        if let Some(found) = lookup().await? {
            return Ok(found);
        }
        debug!("Accessory {} not seen (attempt {})", device_id, attempt);

        if Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep_until((started + POLL_INTERVAL).min(deadline)).await;
        if Instant::now() >= deadline {
            break;
        }
    }

    Err(Error::new(
        Stage::Discovery,
        ErrorKind::AccessoryNotFound(device_id.to_mac_string()),
    ))
}
