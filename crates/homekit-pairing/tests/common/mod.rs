//! A simulated HomeKit accessory speaking the pairing protocol in memory.
//!
//! `SimulatedAccessory` holds the long-lived state (identity, setup code,
//! pairing table). Each `connection()` is a fresh [`Transport`] with its own
//! handshake and session state, like a new TCP connection.

#![allow(dead_code)]

use async_trait::async_trait;
use homekit_core::{Error, ErrorKind, PairingId, PairingIdentity, Permissions, Result, Stage};
use homekit_crypto::chacha::{decrypt_with_nonce, encrypt_with_nonce, nonce_from_string};
use homekit_crypto::curve25519::EcdhKeyPair;
use homekit_crypto::ed25519::{self, IdentityKeyPair};
use homekit_crypto::keys::{EncryptionKey, SessionKeys, SharedSecret};
use homekit_crypto::srp::SrpServer;
use homekit_crypto::tlv::{Method, Tlv8, TlvType};
use homekit_crypto::{hkdf, ControlCipher};
use homekit_pairing::{Endpoint, EncryptedChannel, Request, Transport};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

const ERROR_UNKNOWN: u8 = 0x01;
const ERROR_AUTHENTICATION: u8 = 0x02;
const ERROR_UNAVAILABLE: u8 = 0x06;

struct Shared {
    pairing_id: String,
    identity: IdentityKeyPair,
    setup_code: String,
    pairings: BTreeMap<PairingId, PairingIdentity>,
    corrupt_m6: bool,
}

/// Accessory state that outlives connections.
#[derive(Clone)]
pub struct SimulatedAccessory {
    shared: Arc<Mutex<Shared>>,
}

impl SimulatedAccessory {
    pub fn new(pairing_id: &str, setup_code: &str) -> Self {
        Self::with_identity(pairing_id, setup_code, IdentityKeyPair::generate())
    }

    pub fn with_identity(pairing_id: &str, setup_code: &str, identity: IdentityKeyPair) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                pairing_id: pairing_id.to_string(),
                identity,
                setup_code: setup_code.to_string(),
                pairings: BTreeMap::new(),
                corrupt_m6: false,
            })),
        }
    }

    /// Open a new connection to the accessory.
    pub fn connection(&self) -> SimulatedConnection {
        SimulatedConnection {
            accessory: self.clone(),
            srp: None,
            setup_key: None,
            verify: None,
            session: None,
        }
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.lock().identity.public_key()
    }

    pub fn pairing_id(&self) -> String {
        self.lock().pairing_id.clone()
    }

    /// Pairings the accessory holds, keyed by id.
    pub fn pairings(&self) -> BTreeMap<PairingId, PairingIdentity> {
        self.lock().pairings.clone()
    }

    /// Flip a ciphertext bit in the next M6.
    pub fn corrupt_next_m6(&self) {
        self.lock().corrupt_m6 = true;
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap()
    }
}

struct VerifyInProgress {
    shared: SharedSecret,
    accessory_public: [u8; 32],
    controller_public: [u8; 32],
}

/// One connection to a [`SimulatedAccessory`].
pub struct SimulatedConnection {
    accessory: SimulatedAccessory,
    srp: Option<SrpServer>,
    setup_key: Option<Vec<u8>>,
    verify: Option<VerifyInProgress>,
    session: Option<ControlCipher>,
}

fn error_response(state: u8, code: u8) -> Vec<u8> {
    Tlv8::new()
        .with(TlvType::State, [state])
        .with(TlvType::Error, [code])
        .encode()
}

impl SimulatedConnection {
    fn pair_setup(&mut self, body: &[u8]) -> Vec<u8> {
        let tlv = Tlv8::parse(body).unwrap();
        match tlv.state() {
            Some(1) => {
                let shared = self.accessory.lock();
                if shared.pairings.values().any(PairingIdentity::is_admin) {
                    return error_response(2, ERROR_UNAVAILABLE);
                }
                let srp = SrpServer::new(&shared.setup_code).unwrap();
                let response = Tlv8::new()
                    .with(TlvType::State, [0x02])
                    .with(TlvType::Salt, srp.salt().to_vec())
                    .with(TlvType::PublicKey, srp.public_key())
                    .encode();
                self.srp = Some(srp);
                response
            }
            Some(3) => {
                let srp = self.srp.as_mut().unwrap();
                let a = tlv.get(TlvType::PublicKey).unwrap();
                let proof = tlv.get(TlvType::Proof).unwrap();
                match srp.verify_client(a, proof) {
                    Ok(server_proof) => {
                        self.setup_key = Some(srp.session_key().unwrap().to_vec());
                        Tlv8::new()
                            .with(TlvType::State, [0x04])
                            .with(TlvType::Proof, server_proof)
                            .encode()
                    }
                    Err(_) => error_response(4, ERROR_AUTHENTICATION),
                }
            }
            Some(5) => self.pair_setup_m5(&tlv),
            other => panic!("unexpected pair-setup state {:?}", other),
        }
    }

    fn pair_setup_m5(&mut self, tlv: &Tlv8) -> Vec<u8> {
        let k = self.setup_key.take().unwrap();
        let key = hkdf::derive_pair_setup_key(&k).unwrap();
        let Ok(inner) = decrypt_with_nonce(
            &key,
            &nonce_from_string(b"PS-Msg05"),
            tlv.get(TlvType::EncryptedData).unwrap(),
        ) else {
            return error_response(6, ERROR_AUTHENTICATION);
        };
        let inner = Tlv8::parse(&inner).unwrap();

        let id = inner.get(TlvType::Identifier).unwrap();
        let ltpk: [u8; 32] = inner.get(TlvType::PublicKey).unwrap().try_into().unwrap();
        let mut info = hkdf::derive_controller_sign_key(&k).unwrap().to_vec();
        info.extend_from_slice(id);
        info.extend_from_slice(&ltpk);
        if ed25519::verify(&ltpk, &info, inner.get(TlvType::Signature).unwrap()).is_err() {
            return error_response(6, ERROR_AUTHENTICATION);
        }

        let mut shared = self.accessory.lock();
        let controller_id = PairingId::from_bytes(id).unwrap();
        shared.pairings.insert(
            controller_id.clone(),
            PairingIdentity::new(controller_id, ltpk, Permissions::Admin),
        );

        let mut info = hkdf::derive_accessory_sign_key(&k).unwrap().to_vec();
        info.extend_from_slice(shared.pairing_id.as_bytes());
        info.extend_from_slice(&shared.identity.public_key());
        let sub_tlv = Tlv8::new()
            .with(TlvType::Identifier, shared.pairing_id.as_bytes().to_vec())
            .with(TlvType::PublicKey, shared.identity.public_key().to_vec())
            .with(TlvType::Signature, shared.identity.sign(&info).to_vec())
            .encode();
        let mut encrypted =
            encrypt_with_nonce(&key, &nonce_from_string(b"PS-Msg06"), &sub_tlv).unwrap();
        if std::mem::take(&mut shared.corrupt_m6) {
            encrypted[0] ^= 0x01;
        }

        Tlv8::new()
            .with(TlvType::State, [0x06])
            .with(TlvType::EncryptedData, encrypted)
            .encode()
    }

    fn pair_verify(&mut self, body: &[u8]) -> Vec<u8> {
        let tlv = Tlv8::parse(body).unwrap();
        match tlv.state() {
            Some(1) => {
                let controller_public: [u8; 32] =
                    tlv.get(TlvType::PublicKey).unwrap().try_into().unwrap();
                let ephemeral = EcdhKeyPair::generate();
                let accessory_public = ephemeral.public_key();
                let shared_secret = ephemeral.diffie_hellman(&controller_public).unwrap();
                let key = EncryptionKey::pair_verify(&shared_secret).unwrap();

                let shared = self.accessory.lock();
                let mut info = accessory_public.to_vec();
                info.extend_from_slice(shared.pairing_id.as_bytes());
                info.extend_from_slice(&controller_public);
                let sub_tlv = Tlv8::new()
                    .with(TlvType::Identifier, shared.pairing_id.as_bytes().to_vec())
                    .with(TlvType::Signature, shared.identity.sign(&info).to_vec())
                    .encode();
                let encrypted =
                    encrypt_with_nonce(key.as_bytes(), &nonce_from_string(b"PV-Msg02"), &sub_tlv)
                        .unwrap();
                drop(shared);

                self.verify = Some(VerifyInProgress {
                    shared: shared_secret,
                    accessory_public,
                    controller_public,
                });
                Tlv8::new()
                    .with(TlvType::State, [0x02])
                    .with(TlvType::PublicKey, accessory_public.to_vec())
                    .with(TlvType::EncryptedData, encrypted)
                    .encode()
            }
            Some(3) => {
                let verify = self.verify.take().unwrap();
                let key = EncryptionKey::pair_verify(&verify.shared).unwrap();
                let inner = decrypt_with_nonce(
                    key.as_bytes(),
                    &nonce_from_string(b"PV-Msg03"),
                    tlv.get(TlvType::EncryptedData).unwrap(),
                )
                .unwrap();
                let inner = Tlv8::parse(&inner).unwrap();
                let id = PairingId::from_bytes(inner.get(TlvType::Identifier).unwrap()).unwrap();

                let Some(controller) = self.accessory.lock().pairings.get(&id).cloned() else {
                    return error_response(4, ERROR_AUTHENTICATION);
                };
                let mut info = verify.controller_public.to_vec();
                info.extend_from_slice(id.as_bytes());
                info.extend_from_slice(&verify.accessory_public);
                if ed25519::verify(
                    &controller.long_term_public_key,
                    &info,
                    inner.get(TlvType::Signature).unwrap(),
                )
                .is_err()
                {
                    return error_response(4, ERROR_AUTHENTICATION);
                }

                let keys = SessionKeys::derive_accessory_keys(&verify.shared).unwrap();
                self.session = Some(ControlCipher::new(
                    *keys.write_key.as_bytes(),
                    *keys.read_key.as_bytes(),
                ));
                // Real accessories answer {State=4}; an empty body is accepted too.
                Vec::new()
            }
            other => panic!("unexpected pair-verify state {:?}", other),
        }
    }

    fn pairings(&mut self, body: &[u8]) -> Vec<u8> {
        let tlv = Tlv8::parse(body).unwrap();
        let method = tlv.get(TlvType::Method).and_then(|m| Method::from_byte(m[0]));
        let mut shared = self.accessory.lock();

        match method {
            Some(Method::AddPairing) => {
                let id = PairingId::from_bytes(tlv.get(TlvType::Identifier).unwrap()).unwrap();
                let key: [u8; 32] = tlv.get(TlvType::PublicKey).unwrap().try_into().unwrap();
                let permissions =
                    Permissions::from_byte(tlv.get(TlvType::Permissions).unwrap()[0]).unwrap();
                if let Some(existing) = shared.pairings.get_mut(&id) {
                    if existing.long_term_public_key != key {
                        return error_response(2, ERROR_UNKNOWN);
                    }
                    existing.permissions = permissions;
                } else {
                    shared
                        .pairings
                        .insert(id.clone(), PairingIdentity::new(id, key, permissions));
                }
                Tlv8::new().with(TlvType::State, [0x02]).encode()
            }
            Some(Method::RemovePairing) => {
                let id = PairingId::from_bytes(tlv.get(TlvType::Identifier).unwrap()).unwrap();
                shared.pairings.remove(&id);
                Tlv8::new().with(TlvType::State, [0x02]).encode()
            }
            Some(Method::ListPairings) => {
                let mut response = Tlv8::new().with(TlvType::State, [0x02]);
                for (i, peer) in shared.pairings.values().enumerate() {
                    if i > 0 {
                        response.push_separator();
                    }
                    response.push(TlvType::Identifier, peer.pairing_id.as_bytes().to_vec());
                    response.push(TlvType::PublicKey, peer.long_term_public_key.to_vec());
                    response.push(TlvType::Permissions, [peer.permissions.as_byte()]);
                }
                response.encode()
            }
            other => panic!("unexpected pairings method {:?}", other),
        }
    }
}

#[async_trait]
impl Transport for SimulatedConnection {
    async fn post(&mut self, endpoint: Endpoint, body: &[u8]) -> Result<Vec<u8>> {
        match endpoint {
            Endpoint::PairSetup => Ok(self.pair_setup(body)),
            Endpoint::PairVerify => Ok(self.pair_verify(body)),
            Endpoint::Identify => Ok(Vec::new()),
            _ => Err(Error::new(endpoint.stage(), ErrorKind::Http(470))),
        }
    }

    async fn send_encrypted(
        &mut self,
        channel: &mut EncryptedChannel,
        request: &Request,
    ) -> Result<Vec<u8>> {
        let wire = channel.encrypt_frame(&request.body)?;

        let Some(cipher) = self.session.as_mut() else {
            return Err(Error::new(Stage::Session, ErrorKind::Http(470)));
        };
        let body = cipher.decrypt(&wire).unwrap();

        let response = if request.path == Endpoint::Pairings.path() {
            self.pairings(&body)
        } else {
            // Application resources echo the request body.
            body
        };

        let wire = self.session.as_mut().unwrap().encrypt(&response).unwrap();
        channel.decrypt_frame(&wire)
    }
}
