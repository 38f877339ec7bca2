//! # homekit-pairing
//!
//! Controller side of HomeKit pairing.
//!
//! This crate implements:
//! - Pair-setup (SRP-6a based) for new accessories
//! - Pair-verify (Curve25519 + Ed25519) at the start of each connection
//! - The encrypted session channel and an HTTP transport over TCP
//! - Add/remove/list pairing management
//! - A durable pairing store shared across tasks
//!
//! ## Example
//!
//! ```ignore
//! use homekit_pairing::{
//!     Controller, ControllerConfig, HttpTransport, JsonFileBackend, PairingStore, Request,
//! };
//!
//! let store = PairingStore::open(JsonFileBackend::new("pairings.json"))?;
//! let controller = Controller::new(store, ControllerConfig::default());
//!
//! let mut transport = HttpTransport::connect(addr, None).await?;
//! controller.perform_pairing(&mut transport, "lamp", "031-45-154", None).await?;
//!
//! let transport = HttpTransport::connect(addr, None).await?;
//! let mut session = controller.connect(transport, "lamp").await?;
//! for peer in session.list_pairings().await? {
//!     println!("{} admin={}", peer.pairing_id, peer.is_admin());
//! }
//! let accessories = session.request(Request::get("/accessories")).await?;
//! ```

mod channel;
mod controller;
mod http;
mod messages;
mod pair_setup;
mod pair_verify;
mod pairings;
mod session;
mod store;
mod traits;

pub use channel::EncryptedChannel;
pub use controller::ControllerIdentity;
pub use http::HttpTransport;
pub use pair_setup::{PairSetup, SetupStep};
pub use pair_verify::{PairVerify, VerifyStep};
pub use pairings::{
    add_pairing_request, list_pairings_request, parse_add_pairing_response,
    parse_list_pairings_response, parse_remove_pairing_response, remove_pairing_request,
};
pub use session::{Controller, ControllerConfig, ControllerConfigBuilder, SecureSession};
pub use store::{
    AccessoryPairing, JsonFileBackend, MemoryBackend, PairingBackend, PairingRecord,
    PairingStore, RECORD_VERSION,
};
pub use traits::{
    Endpoint, HttpMethod, Request, Transport, HAP_JSON_CONTENT_TYPE, PAIRING_CONTENT_TYPE,
};
