//! Pairing session orchestrator.
//!
//! [`Controller`] drives the handshakes against a [`Transport`] and owns the
//! only code paths that write to the [`PairingStore`]. A successful verify
//! yields a [`SecureSession`] bound to one connection.

use crate::channel::EncryptedChannel;
use crate::http::HttpTransport;
use crate::pair_setup::{PairSetup, SetupStep};
use crate::pair_verify::{PairVerify, VerifyStep};
use crate::pairings;
use crate::store::{AccessoryPairing, PairingStore};
use crate::traits::{Endpoint, Request, Transport};
use homekit_core::{
    DeviceId, Error, ErrorKind, PairingId, PairingIdentity, Permissions, Result, Stage,
    TransportError,
};
use homekit_discovery::{find_advertisement, find_device_address, Discovery};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Controller settings.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Upper bound for each request/response round.
    pub request_timeout: Duration,
    /// Local interface hint handed to transports, uninterpreted.
    pub adapter: Option<String>,
    /// How long `pair_discovered` looks for the accessory.
    pub discovery_seconds: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            adapter: None,
            discovery_seconds: 10,
        }
    }
}

impl ControllerConfig {
    pub fn builder() -> ControllerConfigBuilder {
        ControllerConfigBuilder::default()
    }
}

/// Builder for [`ControllerConfig`].
#[derive(Debug, Default)]
pub struct ControllerConfigBuilder {
    config: ControllerConfig,
}

impl ControllerConfigBuilder {
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn adapter(mut self, adapter: impl Into<String>) -> Self {
        self.config.adapter = Some(adapter.into());
        self
    }

    pub fn discovery_seconds(mut self, seconds: u64) -> Self {
        self.config.discovery_seconds = seconds;
        self
    }

    pub fn build(self) -> ControllerConfig {
        self.config
    }
}

/// Runs pair-setup and pair-verify on behalf of the stored controller identity.
#[derive(Clone)]
pub struct Controller {
    store: PairingStore,
    config: ControllerConfig,
}

impl Controller {
    pub fn new(store: PairingStore, config: ControllerConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &PairingStore {
        &self.store
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Aliases of all paired accessories.
    pub fn pairings(&self) -> Vec<String> {
        self.store.snapshot().aliases().map(str::to_string).collect()
    }

    /// Run pair-setup and record the accessory under `alias`.
    ///
    /// Nothing is written unless M6 verifies.
    pub async fn perform_pairing<T>(
        &self,
        transport: &mut T,
        alias: &str,
        setup_code: &str,
        address: Option<(String, u16)>,
    ) -> Result<PairingIdentity>
    where
        T: Transport + ?Sized,
    {
        if self.store.accessory(alias).is_some() {
            return Err(Error::new(
                Stage::PairSetup(1),
                ErrorKind::AlreadyPaired(alias.to_string()),
            ));
        }

        let mut setup = PairSetup::new(setup_code, self.store.controller())?;
        let mut request = setup.start()?;
        let mut response_message = 2u8;

        let accessory = loop {
            let stage = Stage::PairSetup(response_message);
            let response = self
                .round(transport.post(Endpoint::PairSetup, &request), stage)
                .await?;
            match setup.advance(&response)? {
                SetupStep::Send(next) => {
                    request = next;
                    response_message += 2;
                }
                SetupStep::Complete(accessory) => break accessory,
            }
        };

        self.store
            .insert_accessory(alias, AccessoryPairing::new(accessory.clone(), address))
            .await?;
        info!("Paired accessory {} as '{}'", accessory.pairing_id, alias);
        Ok(accessory)
    }

    /// Find an unpaired accessory by device id and pair with it over HTTP.
    pub async fn pair_discovered<D>(
        &self,
        discovery: &D,
        alias: &str,
        device_id: &DeviceId,
        setup_code: &str,
    ) -> Result<PairingIdentity>
    where
        D: Discovery + ?Sized,
    {
        let advertisement =
            find_advertisement(discovery, device_id, self.config.discovery_seconds).await?;
        if advertisement.status_flags.is_paired() {
            return Err(Error::new(
                Stage::PairSetup(1),
                ErrorKind::AlreadyPaired(device_id.to_mac_string()),
            ));
        }

        let addr = advertisement.socket_addr();
        let mut transport = self
            .round(
                HttpTransport::connect(addr, self.config.adapter.clone()),
                Stage::PairSetup(1),
            )
            .await?;
        self.perform_pairing(
            &mut transport,
            alias,
            setup_code,
            Some((addr.ip().to_string(), addr.port())),
        )
        .await
    }

    /// Look a paired accessory up again and record its address if it moved.
    pub async fn refresh_address<D>(&self, discovery: &D, alias: &str) -> Result<SocketAddr>
    where
        D: Discovery + ?Sized,
    {
        let entry = self.store.accessory(alias).ok_or_else(|| {
            Error::new(Stage::Discovery, ErrorKind::Unpaired(alias.to_string()))
        })?;
        let device_id = DeviceId::from_mac_string(entry.accessory.pairing_id.as_str())
            .map_err(|e| Error::new(Stage::Discovery, e))?;

        let addr = find_device_address(discovery, &device_id, self.config.discovery_seconds).await?;
        let address = Some((addr.ip().to_string(), addr.port()));
        if entry.address != address {
            debug!("'{}' moved to {}", alias, addr);
            self.store.set_address(alias, address).await?;
        }
        Ok(addr)
    }

    /// Resolve a paired accessory, connect over HTTP and run pair-verify.
    pub async fn connect_discovered<D>(
        &self,
        discovery: &D,
        alias: &str,
    ) -> Result<SecureSession<HttpTransport>>
    where
        D: Discovery + ?Sized,
    {
        let addr = self.refresh_address(discovery, alias).await?;
        let transport = self
            .round(
                HttpTransport::connect(addr, self.config.adapter.clone()),
                Stage::PairVerify(1),
            )
            .await?;
        self.connect(transport, alias).await
    }

    /// Run pair-verify against a stored accessory and open a session.
    pub async fn connect<T>(&self, mut transport: T, alias: &str) -> Result<SecureSession<T>>
    where
        T: Transport,
    {
        let entry = self.store.accessory(alias).ok_or_else(|| {
            Error::new(Stage::PairVerify(1), ErrorKind::Unpaired(alias.to_string()))
        })?;
        let controller = self.store.controller();
        let controller_id = controller.pairing_id().clone();

        let mut verify = PairVerify::new(controller, entry.accessory.clone());
        let mut request = verify.start()?;
        let mut response_message = 2u8;

        let keys = loop {
            let stage = Stage::PairVerify(response_message);
            let response = self
                .round(transport.post(Endpoint::PairVerify, &request), stage)
                .await?;
            match verify.advance(&response)? {
                VerifyStep::Send(next) => {
                    request = next;
                    response_message += 2;
                }
                VerifyStep::Complete(keys) => break keys,
            }
        };

        debug!("Session open with '{}'", alias);
        Ok(SecureSession {
            transport,
            channel: EncryptedChannel::new(keys),
            store: self.store.clone(),
            alias: alias.to_string(),
            accessory: entry.accessory,
            controller_id,
            request_timeout: self.config.request_timeout,
            removed: false,
            in_flight: false,
        })
    }

    /// Ask an unpaired accessory to identify itself.
    pub async fn identify_unpaired<T>(&self, transport: &mut T) -> Result<()>
    where
        T: Transport + ?Sized,
    {
        self.round(transport.post(Endpoint::Identify, &[]), Stage::Identify)
            .await
            .map(|_| ())
    }

    async fn round<F, O>(&self, request: F, stage: Stage) -> Result<O>
    where
        F: Future<Output = Result<O>>,
    {
        bounded(self.config.request_timeout, request, stage).await
    }
}

async fn bounded<F, O>(timeout: Duration, request: F, stage: Stage) -> Result<O>
where
    F: Future<Output = Result<O>>,
{
    match tokio::time::timeout(timeout, request).await {
        Ok(result) => result.map_err(|e| e.with_stage(stage)),
        Err(_) => Err(Error::new(stage, TransportError::Timeout(timeout))),
    }
}

/// A verified, encrypted connection to one accessory.
pub struct SecureSession<T> {
    transport: T,
    channel: EncryptedChannel,
    store: PairingStore,
    alias: String,
    accessory: PairingIdentity,
    controller_id: PairingId,
    request_timeout: Duration,
    removed: bool,
    /// Set while a request is outstanding; still set if its future was dropped.
    in_flight: bool,
}

impl<T: Transport> SecureSession<T> {
    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn accessory(&self) -> &PairingIdentity {
        &self.accessory
    }

    /// False once the channel failed, a request was abandoned, or this
    /// controller unpaired itself.
    pub fn is_valid(&self) -> bool {
        !self.removed && !self.in_flight && !self.channel.is_poisoned()
    }

    /// Send an application request and return the response body.
    pub async fn request(&mut self, request: Request) -> Result<Vec<u8>> {
        self.send(&request, Stage::Session).await
    }

    /// Register another controller with the accessory.
    pub async fn add_pairing(
        &mut self,
        pairing_id: impl Into<PairingId>,
        public_key: [u8; 32],
        permissions: Permissions,
    ) -> Result<()> {
        let pairing_id = pairing_id.into();
        let request = Request::pairing(
            Endpoint::Pairings,
            pairings::add_pairing_request(&pairing_id, &public_key, permissions),
        );
        let response = self.send(&request, Stage::AddPairing).await?;
        pairings::parse_add_pairing_response(&response, &pairing_id)?;

        info!("Added pairing {} to '{}'", pairing_id, self.alias);
        self.store
            .upsert_peer(
                &self.alias,
                PairingIdentity::new(pairing_id, public_key, permissions),
            )
            .await
    }

    /// Remove a pairing from the accessory.
    ///
    /// Removing this controller's own id ends the session and forgets the
    /// accessory.
    pub async fn remove_pairing(&mut self, pairing_id: &PairingId) -> Result<()> {
        let request = Request::pairing(
            Endpoint::Pairings,
            pairings::remove_pairing_request(pairing_id),
        );
        let response = self.send(&request, Stage::RemovePairing).await?;
        pairings::parse_remove_pairing_response(&response)?;

        if pairing_id == &self.controller_id {
            self.removed = true;
            info!("Unpaired from '{}'", self.alias);
            self.store.remove_accessory(&self.alias).await.map(|_| ())
        } else {
            info!("Removed pairing {} from '{}'", pairing_id, self.alias);
            self.store.remove_peer(&self.alias, pairing_id).await
        }
    }

    /// Pairings the accessory currently holds.
    pub async fn list_pairings(&mut self) -> Result<Vec<PairingIdentity>> {
        let request = Request::pairing(Endpoint::Pairings, pairings::list_pairings_request());
        let response = self.send(&request, Stage::ListPairings).await?;
        pairings::parse_list_pairings_response(&response)
    }

    async fn send(&mut self, request: &Request, stage: Stage) -> Result<Vec<u8>> {
        if self.in_flight {
            // An earlier request was dropped mid-exchange.
            self.channel.poison();
        }
        if self.removed || self.channel.is_poisoned() {
            return Err(Error::new(stage, ErrorKind::SessionInvalidated));
        }

        self.in_flight = true;
        let result = bounded(
            self.request_timeout,
            self.transport.send_encrypted(&mut self.channel, request),
            stage,
        )
        .await;
        self.in_flight = false;

        if let Err(err) = &result {
            if matches!(err.kind(), ErrorKind::Transport(TransportError::Timeout(_))) {
                // A half-read response leaves the counters out of step.
                self.channel.poison();
            }
            warn!("{} to '{}' failed: {}", request, self.alias, err);
        }
        result
    }
}
