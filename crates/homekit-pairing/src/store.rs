//! Durable pairing record: controller identity plus every paired accessory.
//!
//! [`PairingStore`] is a cheap-clone handle. Readers take an `Arc` snapshot
//! and never wait on I/O; writers serialize on one async mutex, persist the
//! new record through the [`PairingBackend`], and only then publish it.

use crate::controller::ControllerIdentity;
use homekit_core::{Error, ErrorKind, PairingId, PairingIdentity, Result, Stage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info};

/// Schema version of the persisted record.
pub const RECORD_VERSION: u32 = 1;

/// Raw storage for the serialized record.
#[cfg_attr(test, mockall::automock)]
pub trait PairingBackend: Send + Sync {
    /// Stored bytes, or `None` if nothing was ever written.
    fn load(&self) -> io::Result<Option<Vec<u8>>>;

    /// Replace the stored bytes atomically.
    fn store(&self, bytes: &[u8]) -> io::Result<()>;
}

/// JSON file written via a temporary file and rename.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PairingBackend for JsonFileBackend {
    fn load(&self) -> io::Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn store(&self, bytes: &[u8]) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let temp_path = self.path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&temp_path, fs::Permissions::from_mode(0o600))?;
        }

        fs::rename(&temp_path, &self.path)
    }
}

/// In-memory backend. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    data: Arc<Mutex<Option<Vec<u8>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current stored bytes.
    pub fn bytes(&self) -> Option<Vec<u8>> {
        lock(&self.data).clone()
    }
}

impl PairingBackend for MemoryBackend {
    fn load(&self) -> io::Result<Option<Vec<u8>>> {
        Ok(self.bytes())
    }

    fn store(&self, bytes: &[u8]) -> io::Result<()> {
        *lock(&self.data) = Some(bytes.to_vec());
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Everything known about one paired accessory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessoryPairing {
    /// The accessory's long-term identity from pair-setup.
    pub accessory: PairingIdentity,
    /// Last known `(host, port)`.
    pub address: Option<(String, u16)>,
    /// Other controllers this controller added to the accessory.
    #[serde(default)]
    pub peers: BTreeMap<PairingId, PairingIdentity>,
}

impl AccessoryPairing {
    pub fn new(accessory: PairingIdentity, address: Option<(String, u16)>) -> Self {
        Self {
            accessory,
            address,
            peers: BTreeMap::new(),
        }
    }
}

/// The persisted document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingRecord {
    pub version: u32,
    pub controller: ControllerIdentity,
    #[serde(default)]
    pub accessories: BTreeMap<String, AccessoryPairing>,
}

impl PairingRecord {
    fn new(controller: ControllerIdentity) -> Self {
        Self {
            version: RECORD_VERSION,
            controller,
            accessories: BTreeMap::new(),
        }
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.accessories.keys().map(String::as_str)
    }

    /// Whether an accessory with this pairing id is already recorded.
    pub fn contains_accessory_id(&self, pairing_id: &PairingId) -> bool {
        self.accessories
            .values()
            .any(|entry| &entry.accessory.pairing_id == pairing_id)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let record: PairingRecord = serde_json::from_slice(bytes)
            .map_err(|e| Error::new(Stage::Store, ErrorKind::ConfigLoading(e.to_string())))?;
        if record.version != RECORD_VERSION {
            return Err(Error::new(
                Stage::Store,
                ErrorKind::ConfigLoading(format!(
                    "unsupported record version {} (expected {})",
                    record.version, RECORD_VERSION
                )),
            ));
        }
        Ok(record)
    }

    fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| Error::new(Stage::Store, ErrorKind::ConfigSaving(e.to_string())))
    }
}

struct StoreInner {
    backend: Box<dyn PairingBackend>,
    snapshot: RwLock<Arc<PairingRecord>>,
    writer: tokio::sync::Mutex<()>,
}

/// Shared handle to the pairing record.
#[derive(Clone)]
pub struct PairingStore {
    inner: Arc<StoreInner>,
}

impl PairingStore {
    /// Load the record, creating and persisting a fresh controller identity
    /// on first use.
    pub fn open(backend: impl PairingBackend + 'static) -> Result<Self> {
        let record = match load_record(&backend)? {
            Some(record) => {
                debug!(
                    "Loaded pairing record with {} accessories",
                    record.accessories.len()
                );
                record
            }
            None => {
                let record = PairingRecord::new(ControllerIdentity::generate());
                persist(&backend, &record)?;
                info!(
                    "Created controller identity {}",
                    record.controller.pairing_id()
                );
                record
            }
        };

        Ok(Self {
            inner: Arc::new(StoreInner {
                backend: Box::new(backend),
                snapshot: RwLock::new(Arc::new(record)),
                writer: tokio::sync::Mutex::new(()),
            }),
        })
    }

    /// Current record.
    pub fn snapshot(&self) -> Arc<PairingRecord> {
        self.inner
            .snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn controller(&self) -> ControllerIdentity {
        self.snapshot().controller.clone()
    }

    pub fn accessory(&self, alias: &str) -> Option<AccessoryPairing> {
        self.snapshot().accessories.get(alias).cloned()
    }

    /// Record a new accessory under `alias`.
    ///
    /// One accessory id maps to at most one alias.
    pub async fn insert_accessory(&self, alias: &str, pairing: AccessoryPairing) -> Result<()> {
        self.mutate(|record| {
            if record.accessories.contains_key(alias) {
                return Err(Error::new(
                    Stage::Store,
                    ErrorKind::AlreadyPaired(alias.to_string()),
                ));
            }
            if record.contains_accessory_id(&pairing.accessory.pairing_id) {
                return Err(Error::new(
                    Stage::Store,
                    ErrorKind::AlreadyPaired(pairing.accessory.pairing_id.to_string()),
                ));
            }
            record.accessories.insert(alias.to_string(), pairing);
            Ok(())
        })
        .await
    }

    /// Forget an accessory, returning its entry.
    pub async fn remove_accessory(&self, alias: &str) -> Result<AccessoryPairing> {
        let mut removed = None;
        self.mutate(|record| {
            removed = Some(take_entry(record, alias)?);
            Ok(())
        })
        .await?;
        removed.ok_or_else(|| unpaired(alias))
    }

    /// Add or update a peer controller on an accessory.
    pub async fn upsert_peer(&self, alias: &str, peer: PairingIdentity) -> Result<()> {
        self.mutate(|record| {
            let entry = record
                .accessories
                .get_mut(alias)
                .ok_or_else(|| unpaired(alias))?;
            entry.peers.insert(peer.pairing_id.clone(), peer);
            Ok(())
        })
        .await
    }

    /// Drop a peer controller from an accessory. Unknown peers are ignored.
    pub async fn remove_peer(&self, alias: &str, pairing_id: &PairingId) -> Result<()> {
        self.mutate(|record| {
            let entry = record
                .accessories
                .get_mut(alias)
                .ok_or_else(|| unpaired(alias))?;
            entry.peers.remove(pairing_id);
            Ok(())
        })
        .await
    }

    /// Update the last known address of an accessory.
    pub async fn set_address(&self, alias: &str, address: Option<(String, u16)>) -> Result<()> {
        self.mutate(|record| {
            let entry = record
                .accessories
                .get_mut(alias)
                .ok_or_else(|| unpaired(alias))?;
            entry.address = address;
            Ok(())
        })
        .await
    }

    /// Re-read the record from the backend, replacing the snapshot.
    pub async fn reload(&self) -> Result<()> {
        let _guard = self.inner.writer.lock().await;
        let record = load_record(self.inner.backend.as_ref())?.ok_or_else(|| {
            Error::new(
                Stage::Store,
                ErrorKind::ConfigLoading("pairing record disappeared".to_string()),
            )
        })?;
        self.publish(record);
        Ok(())
    }

    async fn mutate<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut PairingRecord) -> Result<()>,
    {
        let _guard = self.inner.writer.lock().await;
        let mut next = (*self.snapshot()).clone();
        apply(&mut next)?;
        persist(self.inner.backend.as_ref(), &next)?;
        self.publish(next);
        Ok(())
    }

    fn publish(&self, record: PairingRecord) {
        *self
            .inner
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(record);
    }
}

fn take_entry(record: &mut PairingRecord, alias: &str) -> Result<AccessoryPairing> {
    record.accessories.remove(alias).ok_or_else(|| unpaired(alias))
}

fn unpaired(alias: &str) -> Error {
    Error::new(Stage::Store, ErrorKind::Unpaired(alias.to_string()))
}

fn load_record<B: PairingBackend + ?Sized>(backend: &B) -> Result<Option<PairingRecord>> {
    let bytes = backend
        .load()
        .map_err(|e| Error::new(Stage::Store, ErrorKind::ConfigLoading(e.to_string())))?;
    bytes.map(|bytes| PairingRecord::decode(&bytes)).transpose()
}

fn persist<B: PairingBackend + ?Sized>(backend: &B, record: &PairingRecord) -> Result<()> {
    let bytes = record.encode()?;
    backend
        .store(&bytes)
        .map_err(|e| Error::new(Stage::Store, ErrorKind::ConfigSaving(e.to_string())))
}
