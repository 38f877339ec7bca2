//! Error types for the HomeKit controller.
//!
//! Every failure surfaced to a caller is an [`Error`]: an [`ErrorKind`]
//! discriminant plus the protocol [`Stage`] it originated from. The same
//! accessory error code can mean different things in different exchanges,
//! so the stage always travels with the kind.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Protocol step an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Pair-setup, numbered by the message being produced or processed (1-6).
    PairSetup(u8),
    /// Pair-verify, numbered by message (1-4).
    PairVerify(u8),
    /// Encrypted session traffic after verify.
    Session,
    AddPairing,
    RemovePairing,
    ListPairings,
    Identify,
    /// Loading or persisting pairing data.
    Store,
    Discovery,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::PairSetup(step) => write!(f, "pair-setup M{}", step),
            Stage::PairVerify(step) => write!(f, "pair-verify M{}", step),
            Stage::Session => f.write_str("session"),
            Stage::AddPairing => f.write_str("add-pairing"),
            Stage::RemovePairing => f.write_str("remove-pairing"),
            Stage::ListPairings => f.write_str("list-pairings"),
            Stage::Identify => f.write_str("identify"),
            Stage::Store => f.write_str("pairing store"),
            Stage::Discovery => f.write_str("discovery"),
        }
    }
}

/// Primary error type for all controller operations.
#[derive(Error, Debug)]
#[error("{kind} (during {stage})")]
pub struct Error {
    stage: Stage,
    kind: ErrorKind,
}

/// What went wrong, independent of where.
#[derive(Error, Debug)]
pub enum ErrorKind {
    #[error("Format error: {0}")]
    Format(String),

    #[error("Authentication failed")]
    Authentication,

    #[error("Invalid authentication tag")]
    InvalidAuthTag,

    #[error("Incorrect pairing id: expected {expected}, got {actual}")]
    IncorrectPairingId { expected: String, actual: String },

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Accessory reported an unknown error")]
    Unknown,

    #[error("Accessory reported undefined error code {0:#04x}")]
    Invalid(u8),

    #[error("Accessory cannot accept additional pairings")]
    MaxPeers,

    #[error("Accessory exhausted its authentication attempts")]
    MaxTries,

    #[error("Accessory requested backoff (retry after {retry_delay:?} seconds)")]
    Backoff { retry_delay: Option<u16> },

    #[error("Accessory is busy")]
    Busy,

    #[error("Accessory is unavailable")]
    Unavailable,

    #[error("Not paired: {0}")]
    Unpaired(String),

    #[error("Already paired: {0}")]
    AlreadyPaired(String),

    #[error("Could not load pairing data: {0}")]
    ConfigLoading(String),

    #[error("Could not save pairing data: {0}")]
    ConfigSaving(String),

    #[error("Accessory not found: {0}")]
    AccessoryNotFound(String),

    #[error("Unexpected HTTP status {0}")]
    Http(u16),

    #[error("Session is no longer usable")]
    SessionInvalidated,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Crypto error: {0}")]
    Crypto(CryptoError),
}

/// Failures below the protocol: the request never produced a usable response.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection closed by peer")]
    Closed,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Cryptographic operation errors.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Authentication tag mismatch")]
    AuthTagMismatch,

    #[error("Invalid setup code: {0}")]
    InvalidSetupCode(String),

    #[error("Invalid public value: {0}")]
    InvalidPublicKey(&'static str),

    #[error("SRP proof mismatch")]
    ProofMismatch,

    #[error("Signature verification failed")]
    SignatureInvalid,

    #[error("Nonce counter exhausted")]
    NonceExhausted,
}

/// Parsing errors for wire and text formats.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid hex value: {0}")]
    InvalidHex(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Convenience Result type.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn new(stage: Stage, kind: impl Into<ErrorKind>) -> Self {
        Self {
            stage,
            kind: kind.into(),
        }
    }

    /// Build an error from an accessory's `Error` TLV value.
    pub fn from_accessory(stage: Stage, code: u8, retry_delay: Option<u16>) -> Self {
        Self::new(stage, ErrorKind::from_accessory_code(code, retry_delay))
    }

    pub fn format(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(stage, ErrorKind::Format(message.into()))
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Re-attribute an error raised below the protocol layer.
    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = stage;
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn into_kind(self) -> ErrorKind {
        self.kind
    }

    /// Whether the caller may retry the operation with fresh state.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn is_transport(&self) -> bool {
        matches!(self.kind, ErrorKind::Transport(_))
    }
}

impl ErrorKind {
    /// Map a `kTLVError_*` code to its kind.
    ///
    /// Codes outside 1-7 are reported as [`ErrorKind::Invalid`].
    pub fn from_accessory_code(code: u8, retry_delay: Option<u16>) -> Self {
        match code {
            0x01 => ErrorKind::Unknown,
            0x02 => ErrorKind::Authentication,
            0x03 => ErrorKind::Backoff { retry_delay },
            0x04 => ErrorKind::MaxPeers,
            0x05 => ErrorKind::MaxTries,
            0x06 => ErrorKind::Unavailable,
            0x07 => ErrorKind::Busy,
            other => ErrorKind::Invalid(other),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Transport(_)
                | ErrorKind::Authentication
                | ErrorKind::Backoff { .. }
                | ErrorKind::Busy
                | ErrorKind::Unavailable
        )
    }
}

impl From<CryptoError> for ErrorKind {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::AuthTagMismatch | CryptoError::Decryption(_) => ErrorKind::InvalidAuthTag,
            CryptoError::ProofMismatch | CryptoError::InvalidPublicKey(_) => {
                ErrorKind::Authentication
            }
            CryptoError::SignatureInvalid => ErrorKind::InvalidSignature,
            CryptoError::InvalidSetupCode(msg) => ErrorKind::Format(msg),
            CryptoError::InvalidKeyLength { expected, actual } => ErrorKind::Format(format!(
                "expected {} byte key, got {}",
                expected, actual
            )),
            CryptoError::NonceExhausted => ErrorKind::SessionInvalidated,
            other => ErrorKind::Crypto(other),
        }
    }
}

impl From<ParseError> for ErrorKind {
    fn from(err: ParseError) -> Self {
        ErrorKind::Format(err.to_string())
    }
}

/// Attach a [`Stage`] to lower-level results.
pub trait ResultExt<T> {
    fn at_stage(self, stage: Stage) -> Result<T>;
}

impl<T, E: Into<ErrorKind>> ResultExt<T> for std::result::Result<T, E> {
    fn at_stage(self, stage: Stage) -> Result<T> {
        self.map_err(|e| Error::new(stage, e))
    }
}
