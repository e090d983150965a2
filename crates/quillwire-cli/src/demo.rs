//! Two-party conversation over the loopback relay.
//!
//! Alice and Bob each get their own engine task, messenger and relay
//! connection. The demo walks the full client flow: register, ask for the
//! peer's identity key, establish a session on both sides, then alternate
//! encrypted messages. Everything printed comes from messenger events, so
//! the transcript shows exactly what a client would surface.

use std::{io::Write, time::Duration};

use quillwire_core::{EngineConfig, Environment, PeerId, RatchetEngine, RelayEnvelope};
use quillwire_worker::{
    Messenger, MessengerAction, MessengerConfig, MessengerEvent, SecurityEvent, WorkerConfig,
    spawn_engine,
};

use crate::{
    error::CliError,
    relay::{RelayConfig, RelayConnection, RelayHandle, spawn_relay},
};

/// How long to wait for the relay before giving up on a frame.
const RELAY_WAIT: Duration = Duration::from_secs(5);

/// Engine call deadline for demo peers.
const CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Demo settings.
#[derive(Debug, Clone, Copy)]
pub struct DemoConfig {
    /// Messages to exchange, alternating sender
    pub messages: usize,
    /// Send jitter upper bound for both peers
    pub max_send_jitter: Duration,
    /// Loopback relay limits
    pub relay: RelayConfig,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            messages: 6,
            max_send_jitter: Duration::from_millis(300),
            relay: RelayConfig::default(),
        }
    }
}

/// What happened during a demo run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemoReport {
    /// Messages decrypted by their recipient
    pub delivered: usize,
    /// Security alerts raised by either peer
    pub alerts: usize,
    /// Error notices from the relay
    pub relay_errors: usize,
}

struct DemoPeer<E: Environment> {
    messenger: Messenger<E>,
    connection: RelayConnection,
}

impl<E: Environment> DemoPeer<E> {
    async fn join(
        env: &E,
        relay: &RelayHandle,
        name: &str,
        config: &DemoConfig,
    ) -> Result<Self, CliError> {
        let engine = RatchetEngine::new(env.clone(), EngineConfig::default())?;
        let worker = WorkerConfig { call_timeout: Some(CALL_TIMEOUT), ..Default::default() };
        let (handle, _tasks) = spawn_engine(engine, worker);

        let messenger_config =
            MessengerConfig { max_send_jitter: config.max_send_jitter, ..Default::default() };
        let mut messenger =
            Messenger::new(env.clone(), handle, PeerId::from(name), messenger_config);
        messenger.start(None).await?;

        let connection = relay.connect().await.ok_or(CliError::Disconnected)?;
        let peer = Self { messenger, connection };
        peer.send(peer.messenger.register()).await?;
        Ok(peer)
    }

    fn id(&self) -> &PeerId {
        self.messenger.peer_id()
    }

    async fn send(&self, envelope: RelayEnvelope) -> Result<(), CliError> {
        if self.connection.send(envelope.to_json()).await {
            Ok(())
        } else {
            Err(CliError::Disconnected)
        }
    }

    /// Handle the next frame from the relay, forwarding any replies.
    async fn pump(&mut self) -> Result<Vec<MessengerEvent>, CliError> {
        let frame = tokio::time::timeout(RELAY_WAIT, self.connection.recv())
            .await
            .map_err(|_| CliError::Unexpected("relay went quiet".into()))?
            .ok_or(CliError::Disconnected)?;
        let envelope = RelayEnvelope::from_json(&frame)?;

        let mut events = Vec::new();
        for action in self.messenger.handle(envelope).await {
            match action {
                MessengerAction::Send(reply) => self.send(reply).await?,
                MessengerAction::Emit(event) => events.push(event),
            }
        }
        Ok(events)
    }

    /// Pump one frame and narrate what it produced.
    async fn step(
        &mut self,
        out: &mut impl Write,
        report: &mut DemoReport,
    ) -> Result<(), CliError> {
        let events = self.pump().await?;
        narrate(out, report, self.id(), &events)
    }
}

/// Run the demo, writing a transcript to `out`.
pub async fn run_demo<E: Environment>(
    env: E,
    config: DemoConfig,
    out: &mut impl Write,
) -> Result<DemoReport, CliError> {
    let relay = spawn_relay(env.clone(), config.relay);
    let mut report = DemoReport::default();

    let mut alice = DemoPeer::join(&env, &relay, "alice", &config).await?;
    alice.step(out, &mut report).await?;

    // Bob is not online yet; the relay says so
    alice.send(alice.messenger.request_identity(PeerId::from("bob"))).await?;
    alice.step(out, &mut report).await?;

    let mut bob = DemoPeer::join(&env, &relay, "bob", &config).await?;
    bob.step(out, &mut report).await?;

    alice.send(alice.messenger.request_identity(bob.id().clone())).await?;
    bob.step(out, &mut report).await?;
    alice.step(out, &mut report).await?;

    for n in 1..=config.messages {
        let (sender, receiver) =
            if n % 2 == 1 { (&mut alice, &mut bob) } else { (&mut bob, &mut alice) };

        let text = format!("message {n} from {}", sender.id());
        let envelope = sender.messenger.send_text(receiver.id(), text, None).await?;
        sender.send(envelope).await?;
        receiver.step(out, &mut report).await?;
    }

    writeln!(
        out,
        "done: {} delivered, {} security alerts, {} relay errors",
        report.delivered, report.alerts, report.relay_errors
    )?;

    alice.connection.close().await;
    bob.connection.close().await;
    Ok(report)
}

fn narrate(
    out: &mut impl Write,
    report: &mut DemoReport,
    owner: &PeerId,
    events: &[MessengerEvent],
) -> Result<(), CliError> {
    for event in events {
        match event {
            MessengerEvent::Registered { peer_id } => {
                writeln!(out, "[{owner}] registered as {peer_id}")?;
            },
            MessengerEvent::SessionEstablished { peer_id, role } => {
                writeln!(out, "[{owner}] session with {peer_id} established ({role:?})")?;
            },
            MessengerEvent::Received { id, from, content, .. } => {
                report.delivered += 1;
                writeln!(out, "[{owner}] {from} ({id}): {content}")?;
            },
            MessengerEvent::Edited { from, id, content } => {
                writeln!(out, "[{owner}] {from} edited {id}: {content}")?;
            },
            MessengerEvent::Deleted { from, id } => {
                writeln!(out, "[{owner}] {from} deleted {id}")?;
            },
            MessengerEvent::SecurityAlert(alert) => {
                report.alerts += 1;
                writeln!(out, "[{owner}] SECURITY: {}", describe(alert))?;
            },
            MessengerEvent::CommandFailed { peer_id, error } => {
                writeln!(out, "[{owner}] engine call for {peer_id} failed: {error}")?;
            },
            MessengerEvent::RelayError(message) => {
                report.relay_errors += 1;
                writeln!(out, "[{owner}] relay: {message}")?;
            },
        }
    }
    Ok(())
}

fn describe(alert: &SecurityEvent) -> String {
    match alert {
        SecurityEvent::IdentityMismatch { peer_id } => {
            format!("identity key for {peer_id} changed, peer blocked")
        },
        SecurityEvent::ReplayBlocked { peer_id } => format!("replayed message from {peer_id}"),
        SecurityEvent::DecryptFailure { peer_id } => {
            format!("undecryptable message from {peer_id}, peer blocked")
        },
        SecurityEvent::MissingIdentityKey { peer_id } => {
            format!("{peer_id} sent no identity key")
        },
    }
}
