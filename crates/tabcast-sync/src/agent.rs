//! # Sync Agent
//!
//! Per-instance orchestrator. Owns the host store, the router and its
//! channel registry, and sequences everything that touches them on one task.
//!
//! ## Agent Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncAgent Architecture                           │
//! │                                                                         │
//! │   SyncAgentHandle (cloneable)                                           │
//! │     commit / dispatch / module_state / shutdown                         │
//! │              │                                                          │
//! │              ▼ commands                                                 │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                      agent loop (select!)                        │  │
//! │  │                                                                  │  │
//! │  │  commands ─────► store ──► local events ──► router ──► channels  │  │
//! │  │  inbound frames ──────────────────────────► router ──► store     │  │
//! │  │  coordination frames ──► elector                                 │  │
//! │  │  elector output ───────► coordination channel                    │  │
//! │  │  leadership won ───────► dispatch <module>/setLeader             │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │              │                                                          │
//! │              ▼ watch                                                    │
//! │   SyncStatus { identity, is_leader, channels, counters }                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Local events are drained right after every store operation, so a commit
//! and its broadcast form one step and a send failure is returned to the
//! committer.

use std::sync::Arc;

use serde_json::{json, Value};
use tabcast_core::mutation::qualify;
use tabcast_core::{InstanceId, Mutation};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::election::{self, ElectionConfig, ElectionHandle};
use crate::error::{SyncError, SyncResult};
use crate::module::{SyncModule, SyncModuleState, ACTION_SET_LEADER, ACTION_SET_UID};
use crate::protocol::{ElectionMessage, InboundFrame};
use crate::registry::ChannelRegistry;
use crate::router::{InboundOutcome, MutationRouter, RouteOutcome};
use crate::store::{CommittedMutation, HostStore, MutationOrigin};
use crate::transport::Transport;

/// Capacity of the handle → agent command queue.
const COMMAND_BUFFER: usize = 64;

// =============================================================================
// Sync Status
// =============================================================================

/// Current sync status for external queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    /// Identity of this instance.
    pub identity: InstanceId,

    /// Whether this instance won the election.
    pub is_leader: bool,

    /// Names of the live channels.
    pub channels: Vec<String>,

    /// Mutations broadcast to peers.
    pub broadcast: u64,

    /// Inbound mutations committed into the store.
    pub applied: u64,

    /// Inbound messages dropped as echoes or duplicates.
    pub suppressed: u64,
}

impl SyncStatus {
    fn new(identity: InstanceId) -> Self {
        SyncStatus {
            identity,
            is_leader: false,
            channels: Vec::new(),
            broadcast: 0,
            applied: 0,
            suppressed: 0,
        }
    }
}

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Receives agent events, e.g. to forward them to a UI.
pub trait SyncEventEmitter: Send + Sync {
    /// Emits a sync status change event.
    fn emit_status(&self, status: &SyncStatus);

    /// Emits a sync error event.
    fn emit_error(&self, message: &str);
}

/// No-op event emitter.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_status(&self, _status: &SyncStatus) {}
    fn emit_error(&self, _message: &str) {}
}

// =============================================================================
// Commands
// =============================================================================

enum Command {
    Commit {
        mutation: Mutation,
        reply: oneshot::Sender<SyncResult<RouteOutcome>>,
    },
    Dispatch {
        action_type: String,
        payload: Value,
        reply: oneshot::Sender<SyncResult<()>>,
    },
    ModuleState {
        name: String,
        reply: oneshot::Sender<Option<Value>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

// =============================================================================
// Sync Agent
// =============================================================================

/// Synchronization engine for one instance.
pub struct SyncAgent<S: HostStore> {
    config: Arc<SyncConfig>,
    store: S,
    router: MutationRouter,
    events: mpsc::UnboundedReceiver<CommittedMutation>,
    frames: mpsc::UnboundedReceiver<InboundFrame>,
    emitter: Arc<dyn SyncEventEmitter>,
    status: SyncStatus,
}

impl<S: HostStore> SyncAgent<S> {
    /// Wires a store to the transport.
    ///
    /// Registers the sync module, opens the coordination channel (when
    /// election is enabled) and one channel per broadcast module, then
    /// records this instance's identity in the store.
    pub fn init(config: SyncConfig, mut store: S, transport: Arc<dyn Transport>) -> SyncResult<Self> {
        config.validate()?;

        let identity = InstanceId::generate();
        info!(
            identity = %identity,
            main_channel = %config.main_channel,
            module_name = %config.module_name,
            mode = %config.channel.mode,
            election = config.is_election_enabled(),
            "Initializing sync agent"
        );

        store.register_module(&config.module_name, Box::new(SyncModule::new()))?;
        let events = store.subscribe();

        let (frame_tx, frames) = mpsc::unbounded_channel();
        let mut registry = ChannelRegistry::new(transport, frame_tx);
        let options = config.channel_options();

        if config.is_election_enabled() {
            registry.get_or_create(&config.main_channel, &options, None)?;
        }
        for (name, declaration) in config.modules.broadcast_modules() {
            registry.get_or_create(name, &options, Some(declaration))?;
        }

        let router = MutationRouter::new(identity.clone(), config.module_name.clone(), registry);
        let mut status = SyncStatus::new(identity.clone());
        status.channels = router.registry().names();

        let mut agent = SyncAgent {
            config: Arc::new(config),
            store,
            router,
            events,
            frames,
            emitter: Arc::new(NoOpEmitter),
            status,
        };

        agent.dispatch_own(ACTION_SET_UID, json!(identity.as_str()))?;
        agent.drain_local()?;

        Ok(agent)
    }

    /// Sets the event emitter.
    pub fn with_emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    /// Identity of this instance.
    pub fn identity(&self) -> &InstanceId {
        self.router.identity()
    }

    /// Current status.
    pub fn status(&self) -> &SyncStatus {
        &self.status
    }

    /// Starts the agent loop (and the elector, when enabled) on the current
    /// tokio runtime.
    pub fn spawn(self) -> SyncAgentHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (status_tx, status_rx) = watch::channel(self.status.clone());

        let handle = SyncAgentHandle {
            identity: self.identity().clone(),
            module_name: self.config.module_name.clone(),
            election_enabled: self.config.is_election_enabled(),
            commands: command_tx,
            status: status_rx,
        };

        let election = self
            .config
            .is_election_enabled()
            .then(|| election::spawn(ElectionConfig::from(&self.config.election)));

        tokio::spawn(self.run(command_rx, status_tx, election));
        handle
    }

    // =========================================================================
    // Agent Loop
    // =========================================================================

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        status_tx: watch::Sender<SyncStatus>,
        election: Option<(ElectionHandle, mpsc::UnboundedReceiver<ElectionMessage>)>,
    ) {
        let (mut elector, mut outbound) = match election {
            Some((handle, outbound)) => (Some(handle), Some(outbound)),
            None => (None, None),
        };
        let mut leadership = elector.as_ref().map(ElectionHandle::subscribe);

        info!(identity = %self.identity(), "Sync agent started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.teardown(elector.take(), &status_tx);
                        let _ = reply.send(());
                        return;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("All handles dropped");
                        break;
                    }
                },

                Some(event) = self.events.recv() => {
                    if let Err(e) = self.route(&event) {
                        error!(error = %e, "Failed to broadcast mutation");
                        self.emitter.emit_error(&e.to_string());
                    }
                }

                Some(frame) = self.frames.recv() => {
                    self.handle_frame(frame, elector.as_ref());
                }

                Some(message) = next_election_message(&mut outbound) => {
                    self.post_election(&message);
                }

                true = leadership_won(&mut leadership) => {
                    self.on_leadership();
                }
            }

            self.publish(&status_tx);
        }

        self.teardown(elector.take(), &status_tx);
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Commit { mutation, reply } => {
                let result = self.commit_local(mutation);
                let _ = reply.send(result);
            }
            Command::Dispatch {
                action_type,
                payload,
                reply,
            } => {
                let result = self
                    .store
                    .dispatch(&action_type, payload)
                    .and_then(|_| self.drain_local().map(|_| ()));
                let _ = reply.send(result);
            }
            Command::ModuleState { name, reply } => {
                let _ = reply.send(self.store.module_state(&name));
            }
            Command::Shutdown { reply } => {
                // Handled by the loop.
                let _ = reply.send(());
            }
        }
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    fn commit_local(&mut self, mutation: Mutation) -> SyncResult<RouteOutcome> {
        self.store.commit(mutation, MutationOrigin::Local)?;
        let outcomes = self.drain_local()?;
        Ok(outcomes.into_iter().next().unwrap_or(RouteOutcome::NoChannel))
    }

    /// Routes every pending local event. Returns the first routing error
    /// after all events have been processed.
    fn drain_local(&mut self) -> SyncResult<Vec<RouteOutcome>> {
        let mut outcomes = Vec::new();
        let mut first_error = None;

        while let Ok(event) = self.events.try_recv() {
            match self.route(&event) {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!(mutation_type = %event.mutation.mutation_type, error = %e, "Broadcast failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(outcomes),
        }
    }

    fn route(&mut self, event: &CommittedMutation) -> SyncResult<RouteOutcome> {
        let outcome = self.router.route_local(event)?;
        if matches!(outcome, RouteOutcome::Sent { .. }) {
            self.status.broadcast += 1;
        }
        Ok(outcome)
    }

    fn dispatch_own(&mut self, action: &str, payload: Value) -> SyncResult<()> {
        let action_type = qualify(&self.config.module_name, action);
        self.store.dispatch(&action_type, payload)
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    fn handle_frame(&mut self, frame: InboundFrame, elector: Option<&ElectionHandle>) {
        if let Some(elector) = elector {
            if frame.channel == self.config.main_channel {
                self.handle_election_frame(&frame, elector);
                return;
            }
        }

        match self.router.accept_inbound(&mut self.store, &frame) {
            Ok(InboundOutcome::Applied { .. }) => {
                self.status.applied += 1;
                if let Err(e) = self.drain_local() {
                    warn!(error = %e, "Failed to route replayed mutation");
                }
            }
            Ok(outcome) if outcome.is_suppressed() => self.status.suppressed += 1,
            Ok(_) => {}
            Err(e) => {
                error!(channel = %frame.channel, error = %e, "Failed to apply inbound mutation");
                self.emitter.emit_error(&e.to_string());
            }
        }
    }

    fn handle_election_frame(&mut self, frame: &InboundFrame, elector: &ElectionHandle) {
        if !self.router.registry().is_current(frame) {
            return;
        }
        match ElectionMessage::from_json(&frame.body) {
            Ok(message) => {
                debug!(action = message.action(), token = %message.token(), "Coordination message");
                elector.deliver(message);
            }
            Err(e) => warn!(error = %e, "Dropping malformed coordination frame"),
        }
    }

    // =========================================================================
    // Election
    // =========================================================================

    fn post_election(&mut self, message: &ElectionMessage) {
        let Some(channel) = self.router.registry().get(&self.config.main_channel) else {
            return;
        };
        if let Err(e) = channel.post(message) {
            warn!(action = message.action(), error = %e, "Failed to post coordination message");
        }
    }

    fn on_leadership(&mut self) {
        if self.status.is_leader {
            return;
        }
        self.status.is_leader = true;
        info!(identity = %self.identity(), "This instance is now the leader");

        let result = self
            .dispatch_own(ACTION_SET_LEADER, Value::Null)
            .and_then(|_| self.drain_local().map(|_| ()));
        if let Err(e) = result {
            error!(error = %e, "Failed to record leadership in the store");
            self.emitter.emit_error(&e.to_string());
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    fn publish(&mut self, status_tx: &watch::Sender<SyncStatus>) {
        self.status.channels = self.router.registry().names();
        let next = self.status.clone();
        let changed = status_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            self.emitter.emit_status(&self.status);
        }
    }

    fn teardown(&mut self, elector: Option<ElectionHandle>, status_tx: &watch::Sender<SyncStatus>) {
        info!(identity = %self.identity(), "Shutting down sync agent");

        if let Some(death) = elector.and_then(ElectionHandle::shutdown) {
            self.post_election(&death);
        }
        self.router.registry_mut().close_all();
        self.publish(status_tx);

        info!(identity = %self.identity(), "Sync agent stopped");
    }
}

async fn next_election_message(
    outbound: &mut Option<mpsc::UnboundedReceiver<ElectionMessage>>,
) -> Option<ElectionMessage> {
    match outbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Resolves to the leadership flag after each change. Never resolves when
/// election is disabled or the elector is gone.
async fn leadership_won(leadership: &mut Option<watch::Receiver<bool>>) -> bool {
    match leadership {
        Some(rx) => {
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
            let won = *rx.borrow_and_update();
            won
        }
        None => std::future::pending().await,
    }
}

// =============================================================================
// Agent Handle (for external control)
// =============================================================================

/// Handle for talking to a running [`SyncAgent`].
#[derive(Clone)]
pub struct SyncAgentHandle {
    identity: InstanceId,
    module_name: String,
    election_enabled: bool,
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SyncStatus>,
}

impl SyncAgentHandle {
    /// Identity of the instance.
    pub fn identity(&self) -> &InstanceId {
        &self.identity
    }

    /// Commits a local mutation and broadcasts it if eligible.
    pub async fn commit(
        &self,
        mutation_type: impl Into<String>,
        payload: Value,
    ) -> SyncResult<RouteOutcome> {
        let mutation = Mutation::new(mutation_type, payload);
        self.request(|reply| Command::Commit { mutation, reply })
            .await?
    }

    /// Runs a store action.
    pub async fn dispatch(&self, action_type: impl Into<String>, payload: Value) -> SyncResult<()> {
        let action_type = action_type.into();
        self.request(|reply| Command::Dispatch {
            action_type,
            payload,
            reply,
        })
        .await?
    }

    /// State of a store module.
    pub async fn module_state(&self, name: impl Into<String>) -> SyncResult<Option<Value>> {
        let name = name.into();
        self.request(|reply| Command::ModuleState { name, reply }).await
    }

    /// State of the synchronization module.
    pub async fn sync_state(&self) -> SyncResult<SyncModuleState> {
        let value = self
            .module_state(self.module_name.clone())
            .await?
            .ok_or_else(|| SyncError::UnknownModule(self.module_name.clone()))?;
        SyncModuleState::from_value(value)
    }

    /// Latest published status.
    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    /// Subscribes to status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.clone()
    }

    /// Returns true once this instance has won the election.
    pub fn is_leader(&self) -> bool {
        self.status.borrow().is_leader
    }

    /// Waits until this instance is the leader.
    pub async fn wait_for_leadership(&self) -> SyncResult<()> {
        if !self.election_enabled {
            return Err(SyncError::InvalidConfig("leader election is disabled".into()));
        }
        let mut status = self.status.clone();
        status
            .wait_for(|status| status.is_leader)
            .await
            .map(|_| ())
            .map_err(|_| SyncError::ShuttingDown)
    }

    /// Stops the agent: a leader announces its death, every channel closes.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> SyncResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(build(reply_tx))
            .await
            .map_err(|_| SyncError::ShuttingDown)?;
        reply_rx.await.map_err(|_| SyncError::ShuttingDown)
    }
}
