//! HomeKit pair-verify protocol (M1-M4).
//!
//! Each connection to a paired accessory starts with pair-verify: an
//! ephemeral Curve25519 exchange authenticated by both sides' long-term
//! Ed25519 keys. The ECDH shared secret then seeds the control channel keys.

use crate::controller::ControllerIdentity;
use crate::messages::{check_response, parse_response};
use homekit_core::{Error, ErrorKind, PairingId, PairingIdentity, Result, ResultExt, Stage};
use homekit_crypto::chacha::{decrypt_with_nonce, encrypt_with_nonce, nonce_from_string};
use homekit_crypto::curve25519::EcdhKeyPair;
use homekit_crypto::ed25519;
use homekit_crypto::keys::{EncryptionKey, SessionKeys, SharedSecret};
use homekit_crypto::tlv::{Tlv8, TlvType};
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Nonces for pair-verify encryption.
const PV_MSG02_NONCE: &[u8] = b"PV-Msg02";
const PV_MSG03_NONCE: &[u8] = b"PV-Msg03";

/// Next action in a pair-verify exchange.
pub enum VerifyStep {
    /// Send this request to `/pair-verify`.
    Send(Vec<u8>),
    /// Verification succeeded; open the control channel with these keys.
    Complete(SessionKeys),
}

impl std::fmt::Debug for VerifyStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyStep::Send(bytes) => f.debug_tuple("Send").field(&bytes.len()).finish(),
            VerifyStep::Complete(_) => f.write_str("Complete(..)"),
        }
    }
}

enum VerifyState {
    Initial(EcdhKeyPair),
    AwaitingM2(EcdhKeyPair),
    AwaitingM4(SharedSecret),
    Complete,
    Failed,
}

/// Pair-verify state machine for one connection.
pub struct PairVerify {
    controller: ControllerIdentity,
    accessory: PairingIdentity,
    state: VerifyState,
}

impl PairVerify {
    /// Verify against a previously paired accessory.
    pub fn new(controller: ControllerIdentity, accessory: PairingIdentity) -> Self {
        Self::with_ephemeral(controller, accessory, EcdhKeyPair::generate())
    }

    /// Use a caller-supplied ephemeral key.
    pub fn with_ephemeral(
        controller: ControllerIdentity,
        accessory: PairingIdentity,
        ephemeral: EcdhKeyPair,
    ) -> Self {
        Self {
            controller,
            accessory,
            state: VerifyState::Initial(ephemeral),
        }
    }

    /// Generate M1: {State=1, PublicKey(ephemeral)}.
    pub fn start(&mut self) -> Result<Vec<u8>> {
        match std::mem::replace(&mut self.state, VerifyState::Failed) {
            VerifyState::Initial(ephemeral) => {
                let m1 = Tlv8::new()
                    .with(TlvType::State, [0x01])
                    .with(TlvType::PublicKey, ephemeral.public_key().to_vec())
                    .encode();
                debug!("pair-verify: sending M1 to {}", self.accessory.pairing_id);
                self.state = VerifyState::AwaitingM2(ephemeral);
                Ok(m1)
            }
            _ => Err(Error::format(
                Stage::PairVerify(1),
                "pair-verify already started",
            )),
        }
    }

    /// Feed the accessory's response to the last request.
    pub fn advance(&mut self, response: &[u8]) -> Result<VerifyStep> {
        match std::mem::replace(&mut self.state, VerifyState::Failed) {
            VerifyState::AwaitingM2(ephemeral) => {
                let (secret, m3) = self.process_m2(ephemeral, response)?;
                self.state = VerifyState::AwaitingM4(secret);
                Ok(VerifyStep::Send(m3))
            }
            VerifyState::AwaitingM4(secret) => {
                let keys = self.process_m4(&secret, response)?;
                self.state = VerifyState::Complete;
                Ok(VerifyStep::Complete(keys))
            }
            VerifyState::Initial(_) => Err(Error::format(
                Stage::PairVerify(2),
                "advance called before start",
            )),
            VerifyState::Complete | VerifyState::Failed => Err(Error::new(
                Stage::PairVerify(4),
                ErrorKind::SessionInvalidated,
            )),
        }
    }

    /// M2: {State=2, PublicKey, EncryptedData(Identifier, Signature)} -> M3
    fn process_m2(
        &self,
        ephemeral: EcdhKeyPair,
        response: &[u8],
    ) -> Result<(SharedSecret, Vec<u8>)> {
        let stage = Stage::PairVerify(2);
        let tlv = parse_response(response, 0x02, stage)?;

        let accessory_public: [u8; 32] = tlv
            .require(TlvType::PublicKey)
            .at_stage(stage)?
            .try_into()
            .map_err(|_| Error::format(stage, "accessory ephemeral key must be 32 bytes"))?;
        let encrypted = tlv.require(TlvType::EncryptedData).at_stage(stage)?;

        let controller_public = ephemeral.public_key();
        let shared = ephemeral.diffie_hellman(&accessory_public).at_stage(stage)?;
        let key = EncryptionKey::pair_verify(&shared).at_stage(stage)?;

        let decrypted = Zeroizing::new(
            decrypt_with_nonce(key.as_bytes(), &nonce_from_string(PV_MSG02_NONCE), encrypted)
                .at_stage(stage)?,
        );
        let sub_tlv = Tlv8::parse(&decrypted).at_stage(stage)?;
        let identifier = sub_tlv.require(TlvType::Identifier).at_stage(stage)?;
        let signature = sub_tlv.require(TlvType::Signature).at_stage(stage)?;

        let actual = PairingId::from_bytes(identifier).at_stage(stage)?;
        if actual != self.accessory.pairing_id {
            return Err(Error::new(
                stage,
                ErrorKind::IncorrectPairingId {
                    expected: self.accessory.pairing_id.to_string(),
                    actual: actual.to_string(),
                },
            ));
        }

        // accessory ephemeral || accessory id || controller ephemeral
        let mut accessory_info = Vec::with_capacity(64 + identifier.len());
        accessory_info.extend_from_slice(&accessory_public);
        accessory_info.extend_from_slice(identifier);
        accessory_info.extend_from_slice(&controller_public);
        ed25519::verify(
            &self.accessory.long_term_public_key,
            &accessory_info,
            signature,
        )
        .at_stage(stage)?;

        let stage = Stage::PairVerify(3);
        let pairing_id = self.controller.pairing_id().as_bytes();

        // controller ephemeral || controller id || accessory ephemeral
        let mut device_info = Vec::with_capacity(64 + pairing_id.len());
        device_info.extend_from_slice(&controller_public);
        device_info.extend_from_slice(pairing_id);
        device_info.extend_from_slice(&accessory_public);
        let signature = self.controller.sign(&device_info);

        let sub_tlv = Zeroizing::new(
            Tlv8::new()
                .with(TlvType::Identifier, pairing_id.to_vec())
                .with(TlvType::Signature, signature.to_vec())
                .encode(),
        );
        let encrypted =
            encrypt_with_nonce(key.as_bytes(), &nonce_from_string(PV_MSG03_NONCE), &sub_tlv)
                .at_stage(stage)?;

        debug!("pair-verify: M2 verified, sending M3");
        let m3 = Tlv8::new()
            .with(TlvType::State, [0x03])
            .with(TlvType::EncryptedData, encrypted)
            .encode();
        Ok((shared, m3))
    }

    /// M4 is implicit: an empty body or {State=4} means success.
    fn process_m4(&self, shared: &SharedSecret, response: &[u8]) -> Result<SessionKeys> {
        let stage = Stage::PairVerify(4);
        if !response.is_empty() {
            let tlv = Tlv8::parse(response).at_stage(stage)?;
            if !tlv.is_empty() {
                check_response(&tlv, 0x04, stage)?;
            }
        }

        let keys = SessionKeys::derive_control_keys(shared).at_stage(stage)?;
        info!("pair-verify: session established with {}", self.accessory.pairing_id);
        Ok(keys)
    }

    pub fn accessory(&self) -> &PairingIdentity {
        &self.accessory
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, VerifyState::Complete)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, VerifyState::Failed)
    }
}

/// Accessory side of pair-verify for tests.
#[cfg(test)]
pub(crate) struct MockVerifyServer {
    pub(crate) identity: homekit_crypto::ed25519::IdentityKeyPair,
    pub(crate) pairing_id: String,
    controller: PairingIdentity,
    ephemeral: Option<EcdhKeyPair>,
    controller_public: [u8; 32],
    accessory_public: [u8; 32],
    shared: Option<SharedSecret>,
}

#[cfg(test)]
impl MockVerifyServer {
    pub(crate) fn new(controller: PairingIdentity) -> Self {
        Self {
            identity: homekit_crypto::ed25519::IdentityKeyPair::generate(),
            pairing_id: "AA:BB:CC:DD:EE:FF".to_string(),
            controller,
            ephemeral: Some(EcdhKeyPair::generate()),
            controller_public: [0; 32],
            accessory_public: [0; 32],
            shared: None,
        }
    }

    pub(crate) fn accessory_identity(&self) -> PairingIdentity {
        PairingIdentity::new(
            self.pairing_id.as_str(),
            self.identity.public_key(),
            homekit_core::Permissions::Admin,
        )
    }

    pub(crate) fn handle_m1(&mut self, m1: &[u8]) -> Vec<u8> {
        let tlv = Tlv8::parse(m1).unwrap();
        assert_eq!(tlv.state(), Some(0x01));
        self.controller_public = tlv.get(TlvType::PublicKey).unwrap().try_into().unwrap();

        let ephemeral = self.ephemeral.take().unwrap();
        self.accessory_public = ephemeral.public_key();
        let shared = ephemeral.diffie_hellman(&self.controller_public).unwrap();
        let key = EncryptionKey::pair_verify(&shared).unwrap();
        self.shared = Some(shared);

        let mut info = self.accessory_public.to_vec();
        info.extend_from_slice(self.pairing_id.as_bytes());
        info.extend_from_slice(&self.controller_public);
        let inner = Tlv8::new()
            .with(TlvType::Identifier, self.pairing_id.as_bytes().to_vec())
            .with(TlvType::Signature, self.identity.sign(&info).to_vec())
            .encode();
        let encrypted =
            encrypt_with_nonce(key.as_bytes(), &nonce_from_string(PV_MSG02_NONCE), &inner).unwrap();

        Tlv8::new()
            .with(TlvType::State, [0x02])
            .with(TlvType::PublicKey, self.accessory_public.to_vec())
            .with(TlvType::EncryptedData, encrypted)
            .encode()
    }

    pub(crate) fn handle_m3(&self, m3: &[u8]) -> Vec<u8> {
        let shared = self.shared.as_ref().unwrap();
        let key = EncryptionKey::pair_verify(shared).unwrap();
        let tlv = Tlv8::parse(m3).unwrap();
        assert_eq!(tlv.state(), Some(0x03));
        let inner = decrypt_with_nonce(
            key.as_bytes(),
            &nonce_from_string(PV_MSG03_NONCE),
            tlv.get(TlvType::EncryptedData).unwrap(),
        )
        .unwrap();
        let inner = Tlv8::parse(&inner).unwrap();

        let id = inner.get(TlvType::Identifier).unwrap();
        let mut info = self.controller_public.to_vec();
        info.extend_from_slice(id);
        info.extend_from_slice(&self.accessory_public);
        let verified = id == self.controller.pairing_id.as_bytes()
            && ed25519::verify(
                &self.controller.long_term_public_key,
                &info,
                inner.get(TlvType::Signature).unwrap(),
            )
            .is_ok();

        let mut response = Tlv8::new().with(TlvType::State, [0x04]);
        if !verified {
            response.push(TlvType::Error, [0x02]);
        }
        response.encode()
    }

    pub(crate) fn session_keys(&self) -> SessionKeys {
        SessionKeys::derive_accessory_keys(self.shared.as_ref().unwrap()).unwrap()
    }
}
