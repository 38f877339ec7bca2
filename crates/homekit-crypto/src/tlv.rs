//! TLV8 encoding/decoding for HomeKit pairing messages.
//!
//! TLV8 format: [Type: 1 byte][Length: 1 byte][Value: 0-255 bytes]
//! Values longer than 255 bytes are fragmented across consecutive items with
//! the same type. A fragment continues the previous one only when that
//! previous fragment was full (255 bytes).

use homekit_core::error::ParseError;

const MAX_FRAGMENT: usize = 255;

/// TLV type constants for HomeKit pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TlvType {
    Method = 0x00,
    Identifier = 0x01,
    Salt = 0x02,
    PublicKey = 0x03,
    Proof = 0x04,
    EncryptedData = 0x05,
    State = 0x06,
    Error = 0x07,
    RetryDelay = 0x08,
    Certificate = 0x09,
    Signature = 0x0A,
    Permissions = 0x0B,
    FragmentData = 0x0C,
    FragmentLast = 0x0D,
    Flags = 0x13,
    Separator = 0xFF,
}

/// Pairing method carried in the `Method` item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Method {
    PairSetup = 0x00,
    PairSetupWithAuth = 0x01,
    PairVerify = 0x02,
    AddPairing = 0x03,
    RemovePairing = 0x04,
    ListPairings = 0x05,
}

/// One (type, value) item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlvItem {
    pub tag: u8,
    pub value: Vec<u8>,
}

/// Ordered TLV8 message.
///
/// Items keep their insertion/wire order. Lookups return the first match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tlv8 {
    items: Vec<TlvItem>,
}

impl Tlv8 {
    /// Create empty TLV8 message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Tlv8::push`].
    pub fn with(mut self, typ: TlvType, value: impl Into<Vec<u8>>) -> Self {
        self.push(typ, value);
        self
    }

    /// Append an item.
    pub fn push(&mut self, typ: TlvType, value: impl Into<Vec<u8>>) {
        self.push_raw(typ as u8, value);
    }

    /// Append an item with a raw type byte.
    pub fn push_raw(&mut self, tag: u8, value: impl Into<Vec<u8>>) {
        self.items.push(TlvItem {
            tag,
            value: value.into(),
        });
    }

    /// Append a zero-length separator item.
    pub fn push_separator(&mut self) {
        self.push_raw(TlvType::Separator as u8, Vec::new());
    }

    /// Parse TLV8 from bytes.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let mut items: Vec<TlvItem> = Vec::new();
        let mut last_was_full = false;
        let mut i = 0;

        while i < data.len() {
            if i + 2 > data.len() {
                return Err(ParseError::InvalidFormat(
                    "TLV8: truncated header".to_string(),
                ));
            }

            let tag = data[i];
            let len = data[i + 1] as usize;
            i += 2;

            if i + len > data.len() {
                return Err(ParseError::InvalidFormat(format!(
                    "TLV8: truncated value (expected {} bytes, got {})",
                    len,
                    data.len() - i
                )));
            }

            let value = &data[i..i + len];
            i += len;

            match items.last_mut() {
                Some(prev) if last_was_full && prev.tag == tag => {
                    prev.value.extend_from_slice(value)
                }
                _ => items.push(TlvItem {
                    tag,
                    value: value.to_vec(),
                }),
            }

            last_was_full = len == MAX_FRAGMENT;
        }

        Ok(Self { items })
    }

    /// Encode to bytes, fragmenting long values.
    ///
    /// Two adjacent items with the same type are only unambiguous when the
    /// first one's length is not a multiple of 255; a zero-length
    /// separator between them is the caller's responsibility.
    pub fn encode(&self) -> Vec<u8> {
        let mut result = Vec::with_capacity(self.encoded_len());

        for item in &self.items {
            if item.value.is_empty() {
                result.push(item.tag);
                result.push(0);
                continue;
            }
            for chunk in item.value.chunks(MAX_FRAGMENT) {
                result.push(item.tag);
                result.push(chunk.len() as u8);
                result.extend_from_slice(chunk);
            }
        }

        result
    }

    fn encoded_len(&self) -> usize {
        self.items
            .iter()
            .map(|item| item.value.len() + 2 * item.value.len().div_ceil(MAX_FRAGMENT).max(1))
            .sum()
    }

    /// Get first value for type.
    pub fn get(&self, typ: TlvType) -> Option<&[u8]> {
        self.get_raw(typ as u8)
    }

    /// Get first value for raw type.
    pub fn get_raw(&self, tag: u8) -> Option<&[u8]> {
        self.items
            .iter()
            .find(|item| item.tag == tag)
            .map(|item| item.value.as_slice())
    }

    /// All values for type, in order.
    pub fn get_all(&self, typ: TlvType) -> impl Iterator<Item = &[u8]> {
        let tag = typ as u8;
        self.items
            .iter()
            .filter(move |item| item.tag == tag)
            .map(|item| item.value.as_slice())
    }

    /// Get a value that must be present.
    pub fn require(&self, typ: TlvType) -> Result<&[u8], ParseError> {
        self.get(typ).ok_or(ParseError::MissingField(typ.name()))
    }

    /// Check if type is present.
    pub fn contains(&self, typ: TlvType) -> bool {
        self.get(typ).is_some()
    }

    /// Items in wire order.
    pub fn items(&self) -> &[TlvItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<TlvItem> {
        self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Get state value (single byte).
    pub fn state(&self) -> Option<u8> {
        self.get(TlvType::State).and_then(|v| v.first().copied())
    }

    /// Get error value (single byte).
    pub fn error(&self) -> Option<u8> {
        self.get(TlvType::Error).and_then(|v| v.first().copied())
    }

    /// Get retry delay value in seconds.
    /// The value is little-endian encoded (1-2 bytes).
    pub fn retry_delay(&self) -> Option<u16> {
        self.get(TlvType::RetryDelay).map(|v| match v.len() {
            0 => 0,
            1 => v[0] as u16,
            _ => u16::from_le_bytes([v[0], v[1]]),
        })
    }

    /// Split a list response into one message per group.
    ///
    /// Groups are delimited by `Separator` items. Empty groups are dropped.
    pub fn split_on_separator(&self) -> Vec<Tlv8> {
        let mut groups = Vec::new();
        let mut current = Tlv8::new();

        for item in &self.items {
            if item.tag == TlvType::Separator as u8 {
                if !current.is_empty() {
                    groups.push(std::mem::take(&mut current));
                }
            } else {
                current.items.push(item.clone());
            }
        }
        if !current.is_empty() {
            groups.push(current);
        }

        groups
    }
}

impl FromIterator<TlvItem> for Tlv8 {
    fn from_iter<I: IntoIterator<Item = TlvItem>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl TlvType {
    /// Convert from raw byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Method),
            0x01 => Some(Self::Identifier),
            0x02 => Some(Self::Salt),
            0x03 => Some(Self::PublicKey),
            0x04 => Some(Self::Proof),
            0x05 => Some(Self::EncryptedData),
            0x06 => Some(Self::State),
            0x07 => Some(Self::Error),
            0x08 => Some(Self::RetryDelay),
            0x09 => Some(Self::Certificate),
            0x0A => Some(Self::Signature),
            0x0B => Some(Self::Permissions),
            0x0C => Some(Self::FragmentData),
            0x0D => Some(Self::FragmentLast),
            0x13 => Some(Self::Flags),
            0xFF => Some(Self::Separator),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Method => "Method",
            Self::Identifier => "Identifier",
            Self::Salt => "Salt",
            Self::PublicKey => "PublicKey",
            Self::Proof => "Proof",
            Self::EncryptedData => "EncryptedData",
            Self::State => "State",
            Self::Error => "Error",
            Self::RetryDelay => "RetryDelay",
            Self::Certificate => "Certificate",
            Self::Signature => "Signature",
            Self::Permissions => "Permissions",
            Self::FragmentData => "FragmentData",
            Self::FragmentLast => "FragmentLast",
            Self::Flags => "Flags",
            Self::Separator => "Separator",
        }
    }
}

impl Method {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::PairSetup),
            0x01 => Some(Self::PairSetupWithAuth),
            0x02 => Some(Self::PairVerify),
            0x03 => Some(Self::AddPairing),
            0x04 => Some(Self::RemovePairing),
            0x05 => Some(Self::ListPairings),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}
