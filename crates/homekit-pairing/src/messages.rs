//! Response checks shared by every TLV exchange.

use homekit_core::{Error, ResultExt, Stage};
use homekit_crypto::tlv::Tlv8;
use tracing::warn;

/// Parse an accessory response and check it carries `expected_state`.
///
/// An `Error` item takes precedence over everything else in the message.
pub(crate) fn parse_response(
    body: &[u8],
    expected_state: u8,
    stage: Stage,
) -> Result<Tlv8, Error> {
    let tlv = Tlv8::parse(body).at_stage(stage)?;
    check_response(&tlv, expected_state, stage)?;
    Ok(tlv)
}

pub(crate) fn check_response(tlv: &Tlv8, expected_state: u8, stage: Stage) -> Result<(), Error> {
    if let Some(code) = tlv.error() {
        let retry_delay = tlv.retry_delay();
        warn!(
            "Accessory reported error {:#04x} during {} (retry delay {:?})",
            code, stage, retry_delay
        );
        return Err(Error::from_accessory(stage, code, retry_delay));
    }

    match tlv.state() {
        Some(state) if state == expected_state => Ok(()),
        other => Err(Error::format(
            stage,
            format!("expected state {}, got {:?}", expected_state, other),
        )),
    }
}
