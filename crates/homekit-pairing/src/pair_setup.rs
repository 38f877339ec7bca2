//! HomeKit pair-setup protocol (M1-M6).
//!
//! SRP-6a over the accessory's setup code establishes a session key, which
//! then protects an exchange of long-term Ed25519 identities. Nothing is
//! persisted here: the caller stores the returned [`PairingIdentity`] only
//! once [`SetupStep::Complete`] is reached.

use crate::controller::ControllerIdentity;
use crate::messages::parse_response;
use homekit_core::{
    Error, ErrorKind, PairingId, PairingIdentity, Permissions, Result, ResultExt, Stage,
};
use homekit_crypto::chacha::{decrypt_with_nonce, encrypt_with_nonce, nonce_from_string};
use homekit_crypto::srp::{SrpClient, N_BYTES, SALT_LEN};
use homekit_crypto::tlv::{Method, Tlv8, TlvType};
use homekit_crypto::{ed25519, hkdf};
use rand::{CryptoRng, RngCore};
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Nonce for pair-setup M5 encryption.
const PS_MSG05_NONCE: &[u8] = b"PS-Msg05";
/// Nonce for pair-setup M6 decryption.
const PS_MSG06_NONCE: &[u8] = b"PS-Msg06";

/// Next action in a pair-setup exchange.
#[derive(Debug)]
pub enum SetupStep {
    /// Send this request to `/pair-setup`.
    Send(Vec<u8>),
    /// The accessory's long-term identity, verified. Persist it.
    Complete(PairingIdentity),
}

enum SetupState {
    Initial(SrpClient),
    AwaitingM2(SrpClient),
    AwaitingM4(SrpClient),
    AwaitingM6 { session_key: Zeroizing<Vec<u8>> },
    Complete,
    Failed,
}

/// Pair-setup state machine.
///
/// Every error leaves the machine in a failed state with all SRP secrets
/// dropped. A new attempt needs a new `PairSetup`.
pub struct PairSetup {
    controller: ControllerIdentity,
    state: SetupState,
}

impl PairSetup {
    /// Prepare pair-setup with the accessory's setup code (`NNN-NN-NNN`).
    pub fn new(setup_code: &str, controller: ControllerIdentity) -> Result<Self> {
        let srp = SrpClient::start(setup_code).at_stage(Stage::PairSetup(1))?;
        Ok(Self::from_client(srp, controller))
    }

    /// Like [`PairSetup::new`], with an explicit randomness source.
    pub fn with_rng<R: RngCore + CryptoRng>(
        setup_code: &str,
        controller: ControllerIdentity,
        rng: &mut R,
    ) -> Result<Self> {
        let srp = SrpClient::start_with_rng(setup_code, rng).at_stage(Stage::PairSetup(1))?;
        Ok(Self::from_client(srp, controller))
    }

    fn from_client(srp: SrpClient, controller: ControllerIdentity) -> Self {
        Self {
            controller,
            state: SetupState::Initial(srp),
        }
    }

    /// Generate M1: {State=1, Method=PairSetup}.
    pub fn start(&mut self) -> Result<Vec<u8>> {
        match std::mem::replace(&mut self.state, SetupState::Failed) {
            SetupState::Initial(srp) => {
                debug!("pair-setup: sending M1");
                self.state = SetupState::AwaitingM2(srp);
                Ok(Tlv8::new()
                    .with(TlvType::State, [0x01])
                    .with(TlvType::Method, [Method::PairSetup.as_byte()])
                    .encode())
            }
            _ => Err(Error::format(
                Stage::PairSetup(1),
                "pair-setup already started",
            )),
        }
    }

    /// Feed the accessory's response to the last request.
    pub fn advance(&mut self, response: &[u8]) -> Result<SetupStep> {
        let stage = Stage::PairSetup(self.expected_message());
        let (next, step) = match std::mem::replace(&mut self.state, SetupState::Failed) {
            SetupState::AwaitingM2(srp) => self.process_m2(srp, response)?,
            SetupState::AwaitingM4(srp) => self.process_m4(srp, response)?,
            SetupState::AwaitingM6 { session_key } => self.process_m6(&session_key, response)?,
            SetupState::Initial(_) => {
                return Err(Error::format(
                    Stage::PairSetup(2),
                    "advance called before start",
                ))
            }
            SetupState::Complete | SetupState::Failed => {
                return Err(Error::new(stage, ErrorKind::SessionInvalidated))
            }
        };
        self.state = next;
        Ok(step)
    }

    /// M2: {State=2, Salt, PublicKey(B)} -> M3: {State=3, PublicKey(A), Proof(M1)}
    fn process_m2(&self, mut srp: SrpClient, response: &[u8]) -> Result<(SetupState, SetupStep)> {
        let stage = Stage::PairSetup(2);
        let tlv = parse_response(response, 0x02, stage)?;

        let salt = tlv.require(TlvType::Salt).at_stage(stage)?;
        if salt.len() != SALT_LEN {
            return Err(Error::format(
                stage,
                format!("salt is {} bytes, expected {}", salt.len(), SALT_LEN),
            ));
        }

        let server_public = tlv.require(TlvType::PublicKey).at_stage(stage)?;
        if server_public.len() > N_BYTES {
            return Err(Error::format(
                stage,
                format!("SRP public key is {} bytes", server_public.len()),
            ));
        }

        srp.compute_session_key(salt, server_public).at_stage(stage)?;
        let client_proof = srp.client_proof().at_stage(stage)?.to_vec();

        debug!("pair-setup: M2 accepted, sending M3");
        let m3 = Tlv8::new()
            .with(TlvType::State, [0x03])
            .with(TlvType::PublicKey, srp.public_key())
            .with(TlvType::Proof, client_proof)
            .encode();

        Ok((SetupState::AwaitingM4(srp), SetupStep::Send(m3)))
    }

    /// M4: {State=4, Proof(M2)} -> M5: {State=5, EncryptedData}
    fn process_m4(&self, srp: SrpClient, response: &[u8]) -> Result<(SetupState, SetupStep)> {
        let stage = Stage::PairSetup(4);
        let tlv = parse_response(response, 0x04, stage)?;

        let server_proof = tlv.require(TlvType::Proof).at_stage(stage)?;
        srp.verify_server_proof(server_proof).at_stage(stage)?;

        let session_key: Zeroizing<Vec<u8>> = Zeroizing::new(
            srp.session_key()
                .ok_or_else(|| Error::format(stage, "SRP session key missing"))?
                .to_vec(),
        );
        drop(srp);

        let stage = Stage::PairSetup(5);
        let encryption_key =
            Zeroizing::new(hkdf::derive_pair_setup_key(&session_key).at_stage(stage)?);
        let device_x =
            Zeroizing::new(hkdf::derive_controller_sign_key(&session_key).at_stage(stage)?);

        let pairing_id = self.controller.pairing_id().as_bytes();
        let ltpk = self.controller.public_key();

        // iOSDeviceX || iOSDevicePairingID || iOSDeviceLTPK
        let mut device_info = Vec::with_capacity(32 + pairing_id.len() + 32);
        device_info.extend_from_slice(&device_x[..]);
        device_info.extend_from_slice(pairing_id);
        device_info.extend_from_slice(&ltpk);
        let signature = self.controller.sign(&device_info);

        let sub_tlv = Zeroizing::new(
            Tlv8::new()
                .with(TlvType::Identifier, pairing_id.to_vec())
                .with(TlvType::PublicKey, ltpk.to_vec())
                .with(TlvType::Signature, signature.to_vec())
                .encode(),
        );
        let nonce = nonce_from_string(PS_MSG05_NONCE);
        let encrypted = encrypt_with_nonce(&encryption_key, &nonce, &sub_tlv).at_stage(stage)?;

        debug!("pair-setup: M4 accepted, sending M5");
        let m5 = Tlv8::new()
            .with(TlvType::State, [0x05])
            .with(TlvType::EncryptedData, encrypted)
            .encode();

        Ok((SetupState::AwaitingM6 { session_key }, SetupStep::Send(m5)))
    }

    /// M6: {State=6, EncryptedData(Identifier, PublicKey, Signature)}
    fn process_m6(&self, session_key: &[u8], response: &[u8]) -> Result<(SetupState, SetupStep)> {
        let stage = Stage::PairSetup(6);
        let tlv = parse_response(response, 0x06, stage)?;

        let encrypted = tlv.require(TlvType::EncryptedData).at_stage(stage)?;
        let encryption_key =
            Zeroizing::new(hkdf::derive_pair_setup_key(session_key).at_stage(stage)?);
        let decrypted = Zeroizing::new(
            decrypt_with_nonce(&encryption_key, &nonce_from_string(PS_MSG06_NONCE), encrypted)
                .at_stage(stage)?,
        );

        let sub_tlv = Tlv8::parse(&decrypted).at_stage(stage)?;
        let accessory_id = sub_tlv.require(TlvType::Identifier).at_stage(stage)?;
        let accessory_ltpk: [u8; 32] = sub_tlv
            .require(TlvType::PublicKey)
            .at_stage(stage)?
            .try_into()
            .map_err(|_| Error::format(stage, "accessory LTPK must be 32 bytes"))?;
        let signature = sub_tlv.require(TlvType::Signature).at_stage(stage)?;

        let accessory_x =
            Zeroizing::new(hkdf::derive_accessory_sign_key(session_key).at_stage(stage)?);

        // AccessoryX || AccessoryPairingID || AccessoryLTPK
        let mut accessory_info = Vec::with_capacity(32 + accessory_id.len() + 32);
        accessory_info.extend_from_slice(&accessory_x[..]);
        accessory_info.extend_from_slice(accessory_id);
        accessory_info.extend_from_slice(&accessory_ltpk);
        ed25519::verify(&accessory_ltpk, &accessory_info, signature).at_stage(stage)?;

        let pairing_id = PairingId::from_bytes(accessory_id).at_stage(stage)?;
        info!("pair-setup: paired with accessory {}", pairing_id);

        Ok((
            SetupState::Complete,
            SetupStep::Complete(PairingIdentity::new(
                pairing_id,
                accessory_ltpk,
                Permissions::Admin,
            )),
        ))
    }

    fn expected_message(&self) -> u8 {
        match self.state {
            SetupState::Initial(_) => 1,
            SetupState::AwaitingM2(_) => 2,
            SetupState::AwaitingM4(_) => 4,
            SetupState::AwaitingM6 { .. } | SetupState::Complete | SetupState::Failed => 6,
        }
    }

    /// Get current state.
    pub fn state(&self) -> &'static str {
        match self.state {
            SetupState::Initial(_) => "initial",
            SetupState::AwaitingM2(_) => "awaiting_m2",
            SetupState::AwaitingM4(_) => "awaiting_m4",
            SetupState::AwaitingM6 { .. } => "awaiting_m6",
            SetupState::Complete => "complete",
            SetupState::Failed => "failed",
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, SetupState::Complete)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, SetupState::Failed)
    }
}

/// Accessory side of pair-setup for tests.
#[cfg(test)]
pub(crate) struct MockSetupServer {
    srp: homekit_crypto::srp::SrpServer,
    identity: homekit_crypto::ed25519::IdentityKeyPair,
    pairing_id: String,
    session_key: Option<Vec<u8>>,
    pub(crate) controller: Option<PairingIdentity>,
}

#[cfg(test)]
impl MockSetupServer {
    pub(crate) fn new(setup_code: &str) -> Self {
        Self {
            srp: homekit_crypto::srp::SrpServer::new(setup_code).unwrap(),
            identity: homekit_crypto::ed25519::IdentityKeyPair::generate(),
            pairing_id: "AA:BB:CC:DD:EE:FF".to_string(),
            session_key: None,
            controller: None,
        }
    }

    pub(crate) fn public_key(&self) -> [u8; 32] {
        self.identity.public_key()
    }

    pub(crate) fn pairing_id(&self) -> &str {
        &self.pairing_id
    }

    pub(crate) fn handle_m1(&self, m1: &[u8]) -> Vec<u8> {
        let tlv = Tlv8::parse(m1).unwrap();
        assert_eq!(tlv.state(), Some(0x01));
        assert_eq!(tlv.get(TlvType::Method), Some([0x00].as_slice()));
        Tlv8::new()
            .with(TlvType::State, [0x02])
            .with(TlvType::Salt, self.srp.salt().to_vec())
            .with(TlvType::PublicKey, self.srp.public_key())
            .encode()
    }

    pub(crate) fn handle_m3(&mut self, m3: &[u8]) -> Vec<u8> {
        let tlv = Tlv8::parse(m3).unwrap();
        let a = tlv.get(TlvType::PublicKey).unwrap();
        let m1 = tlv.get(TlvType::Proof).unwrap();
        match self.srp.verify_client(a, m1) {
            Ok(m2) => {
                self.session_key = Some(self.srp.session_key().unwrap().to_vec());
                Tlv8::new()
                    .with(TlvType::State, [0x04])
                    .with(TlvType::Proof, m2)
                    .encode()
            }
            Err(_) => Tlv8::new()
                .with(TlvType::State, [0x04])
                .with(TlvType::Error, [0x02])
                .encode(),
        }
    }

    pub(crate) fn handle_m5(&mut self, m5: &[u8]) -> Vec<u8> {
        let k = self.session_key.clone().unwrap();
        let key = hkdf::derive_pair_setup_key(&k).unwrap();
        let tlv = Tlv8::parse(m5).unwrap();
        let sub = decrypt_with_nonce(
            &key,
            &nonce_from_string(PS_MSG05_NONCE),
            tlv.get(TlvType::EncryptedData).unwrap(),
        )
        .unwrap();
        let sub = Tlv8::parse(&sub).unwrap();

        let id = sub.get(TlvType::Identifier).unwrap();
        let ltpk: [u8; 32] = sub.get(TlvType::PublicKey).unwrap().try_into().unwrap();
        let mut info = hkdf::derive_controller_sign_key(&k).unwrap().to_vec();
        info.extend_from_slice(id);
        info.extend_from_slice(&ltpk);
        ed25519::verify(&ltpk, &info, sub.get(TlvType::Signature).unwrap()).unwrap();
        self.controller = Some(PairingIdentity::new(
            PairingId::from_bytes(id).unwrap(),
            ltpk,
            Permissions::Admin,
        ));

        let mut info = hkdf::derive_accessory_sign_key(&k).unwrap().to_vec();
        info.extend_from_slice(self.pairing_id.as_bytes());
        info.extend_from_slice(&self.identity.public_key());
        let inner = Tlv8::new()
            .with(TlvType::Identifier, self.pairing_id.as_bytes().to_vec())
            .with(TlvType::PublicKey, self.identity.public_key().to_vec())
            .with(TlvType::Signature, self.identity.sign(&info).to_vec())
            .encode();
        let encrypted =
            encrypt_with_nonce(&key, &nonce_from_string(PS_MSG06_NONCE), &inner).unwrap();

        Tlv8::new()
            .with(TlvType::State, [0x06])
            .with(TlvType::EncryptedData, encrypted)
            .encode()
    }
}
