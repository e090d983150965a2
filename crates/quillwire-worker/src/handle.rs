//! Engine task and the handle used to reach it.
//!
//! The engine lives in one tokio task and is only reachable through an mpsc
//! command channel. Commands are drained one at a time in arrival order and
//! each runs to completion before the next is read, so no two operations
//! ever interleave on the same session.
//!
//! Replies come back on a separate channel tagged with the request's
//! [`CorrelationId`]. A router task resolves the matching pending call and
//! drops replies nobody is waiting for (for example after a timeout).
//!
//! ```text
//!  EngineHandle ──Request{id}──▶ engine task ──Response{id}──▶ router
//!       ▲                                                         │
//!       └───────────────── oneshot (pending[id]) ◀────────────────┘
//! ```

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use quillwire_core::{EncryptedMessage, Environment, IdentityRecord, PeerId, RatchetEngine, Role};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use zeroize::Zeroizing;

use crate::{
    command::{Command, CorrelationId, Reply, Request, Response, execute},
    error::CommandError,
};

/// Default depth of the command and response channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Settings for [`spawn_engine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Depth of the command and response channels
    pub channel_capacity: usize,
    /// Per-call deadline; `None` waits indefinitely
    pub call_timeout: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { channel_capacity: DEFAULT_CHANNEL_CAPACITY, call_timeout: None }
    }
}

type PendingMap = HashMap<CorrelationId, oneshot::Sender<Result<Reply, CommandError>>>;
type Pending = Arc<Mutex<PendingMap>>;

/// Cloneable handle to a running engine task.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Request>,
    pending: Pending,
    next_id: Arc<AtomicU64>,
    call_timeout: Option<Duration>,
}

/// Join handles for the tasks behind an [`EngineHandle`].
pub struct EngineTasks {
    /// Task owning the engine
    pub engine: JoinHandle<()>,
    /// Task routing replies to callers
    pub router: JoinHandle<()>,
}

impl EngineTasks {
    /// Stop both tasks. Pending and later calls fail with `EngineStopped`.
    pub fn abort(&self) {
        self.engine.abort();
        self.router.abort();
    }
}

/// Move `engine` into its own task and return a handle to it.
///
/// The tasks stop once every handle is dropped.
pub fn spawn_engine<E: Environment>(
    engine: RatchetEngine<E>,
    config: WorkerConfig,
) -> (EngineHandle, EngineTasks) {
    let capacity = config.channel_capacity.max(1);
    let (command_tx, command_rx) = mpsc::channel(capacity);
    let (response_tx, response_rx) = mpsc::channel(capacity);
    let pending: Pending = Arc::default();

    let engine_task = tokio::spawn(run_engine(engine, command_rx, response_tx));
    let router_task = tokio::spawn(route_replies(response_rx, Arc::clone(&pending)));

    let handle = EngineHandle {
        commands: command_tx,
        pending,
        next_id: Arc::new(AtomicU64::new(1)),
        call_timeout: config.call_timeout,
    };
    (handle, EngineTasks { engine: engine_task, router: router_task })
}

async fn run_engine<E: Environment>(
    mut engine: RatchetEngine<E>,
    mut requests: mpsc::Receiver<Request>,
    responses: mpsc::Sender<Response>,
) {
    while let Some(Request { id, command }) = requests.recv().await {
        let name = command.name();
        let result = execute(&mut engine, command);
        if let Err(err) = &result {
            tracing::debug!(id = id.0, command = name, class = ?err.class(), "command failed");
        }

        if responses.send(Response { id, result }).await.is_err() {
            break;
        }
    }

    engine.clear_all();
    tracing::debug!("engine task stopped");
}

async fn route_replies(mut responses: mpsc::Receiver<Response>, pending: Pending) {
    while let Some(Response { id, result }) = responses.recv().await {
        let waiter = lock_pending(&pending).remove(&id);
        match waiter {
            // Receiver gone means the caller stopped waiting
            Some(waiter) => {
                let _ = waiter.send(result);
            },
            None => tracing::debug!(id = id.0, "dropping reply with no pending call"),
        }
    }

    // Wake every remaining caller with EngineStopped
    lock_pending(&pending).clear();
}

/// Removes a pending entry when the call it belongs to goes away.
struct PendingGuard {
    id: CorrelationId,
    pending: Pending,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        lock_pending(&self.pending).remove(&self.id);
    }
}

fn lock_pending(pending: &Pending) -> MutexGuard<'_, PendingMap> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A command already queued on the engine, waiting for its reply.
///
/// Dropping it abandons the call; the reply is then discarded by the router.
pub struct PendingReply {
    reply: oneshot::Receiver<Result<Reply, CommandError>>,
    call_timeout: Option<Duration>,
    guard: PendingGuard,
}

impl PendingReply {
    /// Wait for the reply, honouring the handle's call timeout.
    pub async fn wait(self) -> Result<Reply, CommandError> {
        let id = self.guard.id;
        let reply = match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, self.reply).await.map_err(|_| {
                tracing::warn!(id = id.0, "engine call timed out");
                CommandError::Timeout
            })?,
            None => self.reply.await,
        };

        reply.map_err(|_| CommandError::EngineStopped)?
    }
}

impl EngineHandle {
    /// Send `command` and wait for its correlated reply.
    pub async fn call(&self, command: Command) -> Result<Reply, CommandError> {
        self.submit(command).await?.wait().await
    }

    /// Queue `command` on the engine without waiting for the reply.
    ///
    /// Commands reach the engine in the order their `submit` calls complete,
    /// so awaiting each `submit` in turn fixes the execution order while the
    /// replies are awaited concurrently.
    pub async fn submit(&self, command: Command) -> Result<PendingReply, CommandError> {
        let id = CorrelationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (reply_tx, reply_rx) = oneshot::channel();
        lock_pending(&self.pending).insert(id, reply_tx);
        let guard = PendingGuard { id, pending: Arc::clone(&self.pending) };

        // Guard drops the entry if the send fails or this future is dropped
        self.commands
            .send(Request { id, command })
            .await
            .map_err(|_| CommandError::EngineStopped)?;

        Ok(PendingReply { reply: reply_rx, call_timeout: self.call_timeout, guard })
    }

    /// Number of calls awaiting a reply.
    pub fn pending_calls(&self) -> usize {
        lock_pending(&self.pending).len()
    }

    /// `INIT_IDENTITY`: import `existing` or generate a fresh identity.
    pub async fn init_identity(
        &self,
        existing: Option<IdentityRecord>,
    ) -> Result<IdentityRecord, CommandError> {
        match self.call(Command::InitIdentity { existing }).await? {
            Reply::Identity(record) => Ok(record),
            _ => unreachable!("INIT_IDENTITY answered with a different reply kind"),
        }
    }

    /// `INIT_SESSION`: establish the session with `peer_id`.
    pub async fn init_session(
        &self,
        peer_id: PeerId,
        peer_public_key: Vec<u8>,
        role: Role,
    ) -> Result<(), CommandError> {
        self.expect_status(Command::InitSession { peer_id, peer_public_key, role }).await
    }

    /// `ENCRYPT`: encrypt `text` for `peer_id`.
    pub async fn encrypt(
        &self,
        peer_id: PeerId,
        text: impl Into<String>,
    ) -> Result<EncryptedMessage, CommandError> {
        let text = Zeroizing::new(text.into());
        match self.call(Command::Encrypt { peer_id, text }).await? {
            Reply::Encrypted(message) => Ok(message),
            _ => unreachable!("ENCRYPT answered with a different reply kind"),
        }
    }

    /// `DECRYPT`: decrypt `message` from `peer_id`.
    pub async fn decrypt(
        &self,
        peer_id: PeerId,
        message: EncryptedMessage,
    ) -> Result<String, CommandError> {
        match self.call(Command::Decrypt { peer_id, message }).await? {
            Reply::Plaintext(text) => Ok(text),
            _ => unreachable!("DECRYPT answered with a different reply kind"),
        }
    }

    /// `ZEROIZE_SESSION`: wipe the session with `peer_id`.
    pub async fn clear_session(&self, peer_id: PeerId) -> Result<(), CommandError> {
        self.expect_status(Command::ZeroizeSession { peer_id }).await
    }

    /// `CLEAR_STATE`: wipe every session and the identity.
    pub async fn clear_state(&self) -> Result<(), CommandError> {
        self.expect_status(Command::ClearState).await
    }

    async fn expect_status(&self, command: Command) -> Result<(), CommandError> {
        match self.call(command).await? {
            Reply::Status(_) => Ok(()),
            _ => unreachable!("status command answered with a payload"),
        }
    }
}
