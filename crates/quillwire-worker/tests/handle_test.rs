//! Engine task isolation, correlation routing and the JSON command codec.

use std::{
    collections::BTreeSet,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use quillwire_core::{EngineConfig, EngineError, Environment, PeerId, RatchetEngine, Role};
use quillwire_worker::{
    Command, CommandError, EngineHandle, EngineTasks, Reply, WorkerConfig, spawn_engine,
    wire::dispatch_json,
};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde_json::{Value, json};

/// Seeded environment whose RNG can be made to stall, simulating a busy engine.
#[derive(Clone)]
struct TestEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
    stall_millis: Arc<AtomicU64>,
}

impl TestEnv {
    fn seeded(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
            stall_millis: Arc::new(AtomicU64::new(0)),
        }
    }

    fn stall(&self, millis: u64) {
        self.stall_millis.store(millis, Ordering::SeqCst);
    }
}

impl Environment for TestEnv {
    fn random_bytes(&self, buffer: &mut [u8]) {
        let stall = self.stall_millis.load(Ordering::SeqCst);
        if stall > 0 {
            std::thread::sleep(Duration::from_millis(stall));
        }
        self.rng.lock().unwrap().fill_bytes(buffer);
    }

    fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        async {}
    }

    fn wall_clock_millis(&self) -> u64 {
        1_700_000_000_000
    }
}

fn spawn(seed: u64, config: WorkerConfig) -> (TestEnv, EngineHandle, EngineTasks) {
    let env = TestEnv::seeded(seed);
    let engine = RatchetEngine::new(env.clone(), EngineConfig::default()).unwrap();
    let (handle, tasks) = spawn_engine(engine, config);
    (env, handle, tasks)
}

fn alice_id() -> PeerId {
    PeerId::from("alice")
}

fn bob_id() -> PeerId {
    PeerId::from("bob")
}

async fn connected_pair() -> (EngineHandle, EngineHandle) {
    let (_, alice, _) = spawn(1, WorkerConfig::default());
    let (_, bob, _) = spawn(2, WorkerConfig::default());

    let alice_identity = alice.init_identity(None).await.unwrap();
    let bob_identity = bob.init_identity(None).await.unwrap();

    alice.init_session(bob_id(), bob_identity.public_key.clone(), Role::Initiator).await.unwrap();
    bob.init_session(alice_id(), alice_identity.public_key.clone(), Role::Responder)
        .await
        .unwrap();

    (alice, bob)
}

#[tokio::test]
async fn roundtrip_through_engine_tasks() {
    let (alice, bob) = connected_pair().await;

    let message = alice.encrypt(bob_id(), "hello bob").await.unwrap();
    assert_eq!(message.header.count, 0);

    let text = bob.decrypt(alice_id(), message).await.unwrap();
    assert_eq!(text, "hello bob");
    assert_eq!(alice.pending_calls(), 0);
    assert_eq!(bob.pending_calls(), 0);
}

#[tokio::test]
async fn concurrent_callers_get_their_own_replies() {
    let (alice, bob) = connected_pair().await;

    let calls = (0..16).map(|i| {
        let alice = alice.clone();
        tokio::spawn(async move {
            let text = format!("message {i}");
            let message = alice.encrypt(bob_id(), text.clone()).await.unwrap();
            (text, message)
        })
    });

    let mut sent = Vec::new();
    for call in calls.collect::<Vec<_>>() {
        sent.push(call.await.unwrap());
    }

    // Every call saw a distinct chain position
    let counts: BTreeSet<u32> = sent.iter().map(|(_, message)| message.header.count).collect();
    assert_eq!(counts, (0..16).collect());

    // And each reply belongs to the caller that asked for it
    for (text, message) in sent {
        assert_eq!(bob.decrypt(alice_id(), message).await.unwrap(), text);
    }
}

#[tokio::test]
async fn engine_errors_cross_the_boundary_tagged() {
    let (_, handle, _) = spawn(3, WorkerConfig::default());
    handle.init_identity(None).await.unwrap();

    let err = handle.encrypt(bob_id(), "nobody home").await.unwrap_err();
    assert_eq!(err, CommandError::Engine(EngineError::MissingSession { peer_id: bob_id() }));
}

#[tokio::test]
async fn cleared_session_needs_reestablishing() {
    let (alice, bob) = connected_pair().await;

    alice.clear_session(bob_id()).await.unwrap();
    assert!(alice.encrypt(bob_id(), "gone").await.is_err());

    bob.clear_state().await.unwrap();
    let err = bob.encrypt(alice_id(), "wiped").await.unwrap_err();
    assert_eq!(err, CommandError::Engine(EngineError::MissingSession { peer_id: alice_id() }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timed_out_call_drops_late_reply() {
    let config =
        WorkerConfig { call_timeout: Some(Duration::from_millis(50)), ..Default::default() };
    let (env, handle, _tasks) = spawn(4, config);

    env.stall(300);
    let err = handle.init_identity(None).await.unwrap_err();
    assert_eq!(err, CommandError::Timeout);
    assert!(err.is_transient());
    assert_eq!(handle.pending_calls(), 0);

    // Let the stalled command finish; its reply has no caller left
    env.stall(0);
    tokio::time::sleep(Duration::from_millis(600)).await;

    let identity = handle.init_identity(None).await.unwrap();
    assert_eq!(identity.public_key.len(), 65);
    assert_eq!(handle.pending_calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn caller_giving_up_on_full_queue_leaves_nothing_pending() {
    let config = WorkerConfig { channel_capacity: 1, call_timeout: None };
    let (env, handle, _tasks) = spawn(10, config);
    env.stall(300);

    // One command occupies the engine, the next fills the queue
    let busy = tokio::spawn({
        let handle = handle.clone();
        async move { handle.init_identity(None).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    let queued = tokio::spawn({
        let handle = handle.clone();
        async move { handle.init_identity(None).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let gave_up =
        tokio::time::timeout(Duration::from_millis(50), handle.init_identity(None)).await;
    assert!(gave_up.is_err());

    env.stall(0);
    busy.await.unwrap().unwrap();
    queued.await.unwrap().unwrap();
    assert_eq!(handle.pending_calls(), 0);
}

#[tokio::test]
async fn submitted_commands_run_in_submission_order() {
    let (alice, _bob) = connected_pair().await;

    let mut replies = Vec::new();
    for i in 0..20 {
        let command = Command::Encrypt { peer_id: bob_id(), text: format!("m{i}").into() };
        replies.push(alice.submit(command).await.unwrap());
    }

    // Wait in reverse; counters still follow submission order
    for (i, reply) in replies.into_iter().enumerate().rev() {
        let Reply::Encrypted(message) = reply.wait().await.unwrap() else {
            panic!("expected ciphertext");
        };
        assert_eq!(message.header.count, i as u32);
    }
    assert_eq!(alice.pending_calls(), 0);
}

#[tokio::test]
async fn aborted_engine_reports_stopped() {
    let (_, handle, tasks) = spawn(5, WorkerConfig::default());
    handle.init_identity(None).await.unwrap();

    tasks.abort();
    let _ = tasks.engine.await;
    let _ = tasks.router.await;

    let err = handle.init_identity(None).await.unwrap_err();
    assert_eq!(err, CommandError::EngineStopped);
}

#[tokio::test]
async fn engine_stops_when_handles_drop() {
    let (_, handle, tasks) = spawn(6, WorkerConfig::default());
    let clone = handle.clone();
    clone.init_identity(None).await.unwrap();

    drop(handle);
    drop(clone);

    tasks.engine.await.unwrap();
    tasks.router.await.unwrap();
}

async fn call_json(handle: &EngineHandle, request: Value) -> Value {
    let response = dispatch_json(handle, &request.to_string()).await;
    serde_json::from_str(&response).unwrap()
}

#[tokio::test]
async fn json_conversation() {
    let (_, alice, _) = spawn(7, WorkerConfig::default());
    let (_, bob, _) = spawn(8, WorkerConfig::default());

    let alice_identity =
        call_json(&alice, json!({"id": "a1", "type": "INIT_IDENTITY", "payload": null})).await;
    let bob_identity = call_json(&bob, json!({"id": "b1", "type": "INIT_IDENTITY"})).await;
    assert_eq!(alice_identity["id"], json!("a1"));
    assert_eq!(alice_identity["result"]["privateKey"].as_array().unwrap().len(), 32);

    let ok = call_json(&alice, json!({"id": "a2", "type": "INIT_SESSION", "payload": {
        "peerId": "bob",
        "peerPublicKey": bob_identity["result"]["publicKey"],
        "isInitiator": true,
    }}))
    .await;
    assert_eq!(ok, json!({"id": "a2", "result": {"status": "OK"}}));

    call_json(&bob, json!({"id": "b2", "type": "INIT_SESSION", "payload": {
        "peerId": "alice",
        "peerPublicKey": alice_identity["result"]["publicKey"],
        "isInitiator": false,
    }}))
    .await;

    let encrypted = call_json(&alice, json!({"id": "a3", "type": "ENCRYPT", "payload": {
        "peerId": "bob",
        "text": "over json",
    }}))
    .await;
    let message = &encrypted["result"];
    assert_eq!(message["header"]["count"], json!(0));
    assert_eq!(message["iv"].as_array().unwrap().len(), 12);

    let decrypted = call_json(&bob, json!({"id": "b3", "type": "DECRYPT", "payload": {
        "peerId": "alice",
        "ciphertext": message["ciphertext"],
        "iv": message["iv"],
        "header": message["header"],
    }}))
    .await;
    assert_eq!(decrypted, json!({"id": "b3", "result": "over json"}));

    // Same message again is refused without saying why
    let replayed = call_json(&bob, json!({"id": "b4", "type": "DECRYPT", "payload": {
        "peerId": "alice",
        "ciphertext": message["ciphertext"],
        "iv": message["iv"],
        "header": message["header"],
    }}))
    .await;
    assert_eq!(replayed["error"], json!({"class": "security", "message": "message rejected"}));

    let wiped = call_json(&bob, json!({"id": "b5", "type": "CLEAR_STATE"})).await;
    assert_eq!(wiped["result"], json!({"status": "FULL_WIPE"}));

    let request = json!({"id": "a4", "type": "ZEROIZE_SESSION", "payload": {"peerId": "bob"}});
    let cleared = call_json(&alice, request).await;
    assert_eq!(cleared["result"], json!({"status": "CLEARED"}));
}

#[tokio::test]
async fn json_errors_are_distinguishable() {
    let (_, handle, _) = spawn(9, WorkerConfig::default());

    let unknown = call_json(&handle, json!({"id": 1, "type": "SELF_DESTRUCT"})).await;
    assert_eq!(unknown["error"]["class"], json!("malformed"));
    assert_eq!(unknown["error"]["message"], json!("unknown command: SELF_DESTRUCT"));

    let malformed = call_json(&handle, json!({"id": 2, "type": "ENCRYPT", "payload": {}})).await;
    assert_eq!(malformed["id"], json!(2));
    assert!(malformed["error"]["message"].as_str().unwrap().starts_with("malformed command"));

    let no_identity = call_json(&handle, json!({"id": 3, "type": "INIT_SESSION", "payload": {
        "peerId": "bob",
        "peerPublicKey": [4, 1, 2],
        "isInitiator": true,
    }}))
    .await;
    assert_eq!(no_identity["error"]["class"], json!("fatal_for_call"));
}
