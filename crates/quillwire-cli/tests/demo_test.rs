//! End-to-end runs through the loopback relay task.

use std::time::Duration;

use quillwire_cli::{DemoConfig, DemoReport, RelayConfig, keygen, run_demo, spawn_relay};
use quillwire_core::{
    IdentityRecord, IdentityRequest, PeerId, RelayEnvelope, Registration,
    relay::{NOT_REGISTERED, PEER_NOT_CONNECTED},
};
use quillwire_worker::SystemEnv;

fn quiet(messages: usize) -> DemoConfig {
    DemoConfig { messages, max_send_jitter: Duration::ZERO, relay: RelayConfig::default() }
}

#[tokio::test]
async fn demo_delivers_every_message() {
    let mut transcript = Vec::new();
    let report = run_demo(SystemEnv::new(), quiet(5), &mut transcript).await.unwrap();

    assert_eq!(report, DemoReport { delivered: 5, alerts: 0, relay_errors: 1 });

    let transcript = String::from_utf8(transcript).unwrap();
    assert!(transcript.contains(&format!("relay: {PEER_NOT_CONNECTED}")));
    assert!(transcript.contains("[alice] session with bob established (Initiator)"));
    assert!(transcript.contains("[bob] session with alice established (Responder)"));
    assert!(transcript.contains("message 5 from alice"));
    assert!(transcript.contains("message 4 from bob"));
}

#[tokio::test]
async fn rate_limited_demo_fails_instead_of_hanging() {
    let config = DemoConfig {
        relay: RelayConfig { max_frames_per_window: 3, ..Default::default() },
        ..quiet(4)
    };

    // alice: register, two identity requests, then her first message is refused
    let result = run_demo(SystemEnv::new(), config, &mut Vec::new()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn relay_task_routes_by_registration() {
    let relay = spawn_relay(SystemEnv::new(), RelayConfig::default());
    let mut alice = relay.connect().await.unwrap();
    let mut bob = relay.connect().await.unwrap();

    let request = RelayEnvelope::RequestIdentity(IdentityRequest {
        from: PeerId::from("alice"),
        to: PeerId::from("bob"),
    });

    assert!(alice.send(request.to_json()).await);
    let refused = RelayEnvelope::from_json(&alice.recv().await.unwrap()).unwrap();
    assert_eq!(refused, RelayEnvelope::error(NOT_REGISTERED));

    for (connection, name) in [(&mut alice, "alice"), (&mut bob, "bob")] {
        let register = RelayEnvelope::Register(Registration { peer_id: PeerId::from(name) });
        assert!(connection.send(register.to_json()).await);
        let reply = RelayEnvelope::from_json(&connection.recv().await.unwrap()).unwrap();
        assert_eq!(reply, RelayEnvelope::Registered(Registration { peer_id: PeerId::from(name) }));
    }

    assert!(alice.send(request.to_json()).await);
    let forwarded = RelayEnvelope::from_json(&bob.recv().await.unwrap()).unwrap();
    assert_eq!(forwarded, request);

    bob.close().await;
    assert!(alice.send(request.to_json()).await);
    let gone = RelayEnvelope::from_json(&alice.recv().await.unwrap()).unwrap();
    assert_eq!(gone, RelayEnvelope::error(PEER_NOT_CONNECTED));
}

#[tokio::test]
async fn replaced_connection_is_closed() {
    let relay = spawn_relay(SystemEnv::new(), RelayConfig::default());
    let mut first = relay.connect().await.unwrap();
    let mut second = relay.connect().await.unwrap();
    let register = RelayEnvelope::Register(Registration { peer_id: PeerId::from("alice") });

    assert!(first.send(register.to_json()).await);
    first.recv().await.unwrap();
    assert!(second.send(register.to_json()).await);
    second.recv().await.unwrap();

    assert!(first.recv().await.is_none());
}

#[test]
fn keygen_record_roundtrips_through_json() {
    let record = keygen(SystemEnv::new()).unwrap();
    let json = serde_json::to_string_pretty(&record).unwrap();
    let parsed: IdentityRecord = serde_json::from_str(&json).unwrap();

    assert_eq!(parsed, record);
    assert_eq!(record.public_key.len(), 65);
    assert_eq!(record.private_key.len(), 32);
}
