//! Full controller flows against a simulated accessory.
//!
//! Run with: cargo test -p homekit-pairing --test end_to_end

mod common;

use common::SimulatedAccessory;
use homekit_core::{ErrorKind, PairingId, Permissions, Stage};
use homekit_crypto::ed25519::IdentityKeyPair;
use homekit_pairing::{
    Controller, ControllerConfig, ControllerIdentity, MemoryBackend, PairingStore, Request,
};

const SETUP_CODE: &str = "031-45-154";
const ACCESSORY_ID: &str = "3C:2E:F9:01:7A:10";

fn controller(backend: &MemoryBackend) -> Controller {
    Controller::new(
        PairingStore::open(backend.clone()).unwrap(),
        ControllerConfig::default(),
    )
}

async fn paired() -> (Controller, SimulatedAccessory, MemoryBackend) {
    let backend = MemoryBackend::new();
    let controller = controller(&backend);
    let accessory = SimulatedAccessory::new(ACCESSORY_ID, SETUP_CODE);

    controller
        .perform_pairing(
            &mut accessory.connection(),
            "lamp",
            SETUP_CODE,
            Some(("192.168.1.30".to_string(), 51826)),
        )
        .await
        .unwrap();
    (controller, accessory, backend)
}

#[tokio::test]
async fn setup_verify_and_encrypted_round_trip() {
    let (controller, accessory, _) = paired().await;

    let entry = controller.store().accessory("lamp").unwrap();
    assert_eq!(entry.accessory.pairing_id.as_str(), ACCESSORY_ID);
    assert_eq!(entry.accessory.long_term_public_key, accessory.public_key());
    assert_eq!(entry.address, Some(("192.168.1.30".to_string(), 51826)));

    let our_id = controller.store().controller().pairing_id().clone();
    assert!(accessory.pairings().get(&our_id).unwrap().is_admin());

    let mut session = controller.connect(accessory.connection(), "lamp").await.unwrap();
    assert!(session.is_valid());

    let payload: Vec<u8> = (0u8..37).collect();
    let echoed = session
        .request(Request::put("/characteristics", payload.clone()))
        .await
        .unwrap();
    assert_eq!(echoed, payload);

    // Several requests keep both counters in step.
    for _ in 0..3 {
        let echoed = session
            .request(Request::post("/accessories", vec![0xEE; 1500]))
            .await
            .unwrap();
        assert_eq!(echoed, vec![0xEE; 1500]);
    }
}

#[tokio::test]
async fn wrong_setup_code_leaves_store_untouched() {
    let backend = MemoryBackend::new();
    let controller = controller(&backend);
    let before = backend.bytes();
    let accessory = SimulatedAccessory::new(ACCESSORY_ID, SETUP_CODE);

    let err = controller
        .perform_pairing(&mut accessory.connection(), "lamp", "999-99-999", None)
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Authentication));
    assert_eq!(err.stage(), Stage::PairSetup(4));
    assert!(err.is_retryable());
    assert_eq!(backend.bytes(), before);

    // A retry with the right code succeeds.
    controller
        .perform_pairing(&mut accessory.connection(), "lamp", SETUP_CODE, None)
        .await
        .unwrap();
    assert_ne!(backend.bytes(), before);
}

#[tokio::test]
async fn corrupt_m6_leaves_store_untouched() {
    let backend = MemoryBackend::new();
    let controller = controller(&backend);
    let before = backend.bytes();
    let accessory = SimulatedAccessory::new(ACCESSORY_ID, SETUP_CODE);
    accessory.corrupt_next_m6();

    let err = controller
        .perform_pairing(&mut accessory.connection(), "lamp", SETUP_CODE, None)
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::InvalidAuthTag));
    assert_eq!(err.stage(), Stage::PairSetup(6));
    assert_eq!(backend.bytes(), before);
    assert!(controller.pairings().is_empty());
}

#[tokio::test]
async fn accessory_with_admin_refuses_second_setup() {
    let (_, accessory, _) = paired().await;
    let other = controller(&MemoryBackend::new());

    let err = other
        .perform_pairing(&mut accessory.connection(), "lamp", SETUP_CODE, None)
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Unavailable));
    assert_eq!(err.stage(), Stage::PairSetup(2));
}

#[tokio::test]
async fn verify_rejects_impostor_key() {
    let (controller, _, _) = paired().await;
    let impostor =
        SimulatedAccessory::with_identity(ACCESSORY_ID, SETUP_CODE, IdentityKeyPair::generate());

    let err = controller
        .connect(impostor.connection(), "lamp")
        .await
        .err()
        .unwrap();
    assert!(matches!(err.kind(), ErrorKind::InvalidSignature));
    assert_eq!(err.stage(), Stage::PairVerify(2));
}

#[tokio::test]
async fn verify_rejects_wrong_accessory_id() {
    let (controller, _, _) = paired().await;
    let stranger = SimulatedAccessory::new("AA:00:00:00:00:01", SETUP_CODE);

    match controller.connect(stranger.connection(), "lamp").await {
        Err(err) => match err.into_kind() {
            ErrorKind::IncorrectPairingId { expected, actual } => {
                assert_eq!(expected, ACCESSORY_ID);
                assert_eq!(actual, "AA:00:00:00:00:01");
            }
            other => panic!("unexpected error: {:?}", other),
        },
        Ok(_) => panic!("verify should fail"),
    }
}

#[tokio::test]
async fn verify_reuses_long_term_identity_across_connections() {
    let (controller, accessory, backend) = paired().await;

    // A controller reopened from the same backend presents the same identity.
    let reopened = Controller::new(
        PairingStore::open(backend.clone()).unwrap(),
        ControllerConfig::default(),
    );
    for c in [&controller, &reopened] {
        let mut session = c.connect(accessory.connection(), "lamp").await.unwrap();
        let ping = Request::post("/x", b"ping".to_vec());
        let echoed = session.request(ping).await.unwrap();
        assert_eq!(echoed, b"ping");
    }
}

#[tokio::test]
async fn add_list_and_remove_peer() {
    let (controller, accessory, _) = paired().await;
    let guest = ControllerIdentity::generate();
    let mut session = controller.connect(accessory.connection(), "lamp").await.unwrap();

    session
        .add_pairing(guest.pairing_id().clone(), guest.public_key(), Permissions::Regular)
        .await
        .unwrap();

    let listed = session.list_pairings().await.unwrap();
    assert_eq!(listed.len(), 2);
    let listed_guest = listed
        .iter()
        .find(|p| &p.pairing_id == guest.pairing_id())
        .unwrap();
    assert_eq!(listed_guest.permissions, Permissions::Regular);
    assert_eq!(listed_guest.long_term_public_key, guest.public_key());

    let peers = controller.store().accessory("lamp").unwrap().peers;
    assert!(peers.contains_key(guest.pairing_id()));

    session.remove_pairing(guest.pairing_id()).await.unwrap();
    assert!(session.is_valid());
    assert!(!accessory.pairings().contains_key(guest.pairing_id()));
    assert!(controller.store().accessory("lamp").unwrap().peers.is_empty());
}

#[tokio::test]
async fn re_adding_with_different_key_is_already_paired() {
    let (controller, accessory, _) = paired().await;
    let mut session = controller.connect(accessory.connection(), "lamp").await.unwrap();
    let guest = PairingId::new("guest-controller");

    session
        .add_pairing(guest.clone(), [0x01; 32], Permissions::Regular)
        .await
        .unwrap();
    let err = session
        .add_pairing(guest.clone(), [0x02; 32], Permissions::Admin)
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::AlreadyPaired(id) if id == "guest-controller"));
    assert_eq!(err.stage(), Stage::AddPairing);

    // Same key with new permissions is an update.
    session
        .add_pairing(guest.clone(), [0x01; 32], Permissions::Admin)
        .await
        .unwrap();
    assert!(accessory.pairings().get(&guest).unwrap().is_admin());
}

#[tokio::test]
async fn self_removal_ends_session_and_forgets_accessory() {
    let (controller, accessory, backend) = paired().await;
    let our_id = controller.store().controller().pairing_id().clone();
    let mut session = controller.connect(accessory.connection(), "lamp").await.unwrap();

    session.remove_pairing(&our_id).await.unwrap();
    assert!(!session.is_valid());

    let err = session
        .request(Request::get("/characteristics?id=1.10"))
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::SessionInvalidated));
    assert_eq!(err.stage(), Stage::Session);
    assert!(session.list_pairings().await.is_err());

    let reloaded = PairingStore::open(backend).unwrap();
    assert!(reloaded.accessory("lamp").is_none());
    assert!(controller.pairings().is_empty());

    let err = controller
        .connect(accessory.connection(), "lamp")
        .await
        .err()
        .unwrap();
    assert!(matches!(err.kind(), ErrorKind::Unpaired(_)));
}

#[tokio::test]
async fn identify_needs_no_session() {
    let backend = MemoryBackend::new();
    let controller = controller(&backend);
    let accessory = SimulatedAccessory::new(ACCESSORY_ID, SETUP_CODE);

    controller
        .identify_unpaired(&mut accessory.connection())
        .await
        .unwrap();
}
