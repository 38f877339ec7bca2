//! Add, remove and list pairing exchanges (`/pairings`).
//!
//! All three are single round trips over an established session: a
//! `State=1` request carrying the method, answered by `State=2`.

use crate::messages::{check_response, parse_response};
use homekit_core::{
    Error, ErrorKind, PairingId, PairingIdentity, Permissions, Result, ResultExt, Stage,
};
use homekit_crypto::tlv::{Method, Tlv8, TlvType};

fn request(method: Method) -> Tlv8 {
    Tlv8::new()
        .with(TlvType::State, [0x01])
        .with(TlvType::Method, [method.as_byte()])
}

/// {State=1, Method=AddPairing, Identifier, PublicKey, Permissions}
pub fn add_pairing_request(
    pairing_id: &PairingId,
    public_key: &[u8; 32],
    permissions: Permissions,
) -> Vec<u8> {
    request(Method::AddPairing)
        .with(TlvType::Identifier, pairing_id.as_bytes().to_vec())
        .with(TlvType::PublicKey, public_key.to_vec())
        .with(TlvType::Permissions, [permissions.as_byte()])
        .encode()
}

/// {State=1, Method=RemovePairing, Identifier}
pub fn remove_pairing_request(pairing_id: &PairingId) -> Vec<u8> {
    request(Method::RemovePairing)
        .with(TlvType::Identifier, pairing_id.as_bytes().to_vec())
        .encode()
}

/// {State=1, Method=ListPairings}
pub fn list_pairings_request() -> Vec<u8> {
    request(Method::ListPairings).encode()
}

/// Check an add-pairing response.
///
/// Accessories answer `Unknown` when the id is already paired under a
/// different key, which is reported as [`ErrorKind::AlreadyPaired`].
pub fn parse_add_pairing_response(body: &[u8], pairing_id: &PairingId) -> Result<()> {
    match parse_response(body, 0x02, Stage::AddPairing) {
        Ok(_) => Ok(()),
        Err(err) if matches!(err.kind(), ErrorKind::Unknown) => Err(Error::new(
            Stage::AddPairing,
            ErrorKind::AlreadyPaired(pairing_id.to_string()),
        )),
        Err(err) => Err(err),
    }
}

/// Check a remove-pairing response.
pub fn parse_remove_pairing_response(body: &[u8]) -> Result<()> {
    parse_response(body, 0x02, Stage::RemovePairing).map(|_| ())
}

/// Parse a list-pairings response into the accessory's peers.
pub fn parse_list_pairings_response(body: &[u8]) -> Result<Vec<PairingIdentity>> {
    let stage = Stage::ListPairings;
    let tlv = Tlv8::parse(body).at_stage(stage)?;
    check_response(&tlv, 0x02, stage)?;

    tlv.split_on_separator()
        .into_iter()
        .filter_map(|group| {
            let entry: Tlv8 = group
                .into_items()
                .into_iter()
                .filter(|item| item.tag != TlvType::State as u8)
                .collect();
            (!entry.is_empty()).then_some(entry)
        })
        .map(|entry| parse_entry(&entry))
        .collect()
}

fn parse_entry(entry: &Tlv8) -> Result<PairingIdentity> {
    let stage = Stage::ListPairings;
    let raw_id = entry.require(TlvType::Identifier).at_stage(stage)?;
    let pairing_id = PairingId::from_bytes(raw_id).at_stage(stage)?;
    let public_key: [u8; 32] = entry
        .require(TlvType::PublicKey)
        .at_stage(stage)?
        .try_into()
        .map_err(|_| {
            Error::format(stage, format!("public key of {} must be 32 bytes", pairing_id))
        })?;

    let permissions = match entry.require(TlvType::Permissions).at_stage(stage)? {
        [byte] => Permissions::from_byte(*byte).at_stage(stage)?,
        other => {
            return Err(Error::format(
                stage,
                format!("permissions of {} is {} bytes", pairing_id, other.len()),
            ))
        }
    };

    Ok(PairingIdentity::new(pairing_id, public_key, permissions))
}
