//! # Transport Boundary
//!
//! The engine never talks to tabs, workers or sockets directly. It opens
//! named broadcast endpoints through a [`Transport`] and exchanges JSON text
//! frames over them.
//!
//! ## Endpoint Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Named Broadcast Endpoints                           │
//! │                                                                         │
//! │   context A                 transport                 context B         │
//! │  ┌──────────┐   post()   ┌─────────────┐  listener  ┌──────────┐       │
//! │  │ "todos"  │ ─────────► │   "todos"   │ ─────────► │ "todos"  │       │
//! │  │ endpoint │            │  (fan-out)  │            │ endpoint │       │
//! │  └──────────┘            └─────────────┘            └──────────┘       │
//! │                                                                         │
//! │  • Broadcast, not queued: with no listener the frame is simply lost    │
//! │  • ExcludeSelf: the posting endpoint does not hear its own frame       │
//! │  • FullMesh:    the posting endpoint hears its own frame too           │
//! │  • Faults surface as SyncError::Transport, never retried here          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! [`memory`] provides a process-local implementation used by the tests and
//! the demo binary.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::SyncResult;

// =============================================================================
// Channel Options
// =============================================================================

/// Whether a posting endpoint receives its own frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Frames reach every other endpoint bound to the name.
    #[default]
    ExcludeSelf,

    /// Frames reach every endpoint bound to the name, the sender included.
    FullMesh,
}

impl std::fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryMode::ExcludeSelf => write!(f, "exclude_self"),
            DeliveryMode::FullMesh => write!(f, "full_mesh"),
        }
    }
}

impl std::str::FromStr for DeliveryMode {
    type Err = crate::error::SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "exclude_self" | "native" => Ok(DeliveryMode::ExcludeSelf),
            "full_mesh" | "mesh" => Ok(DeliveryMode::FullMesh),
            other => Err(crate::error::SyncError::InvalidConfig(format!(
                "Unknown channel mode: '{}'. Valid options: exclude_self, full_mesh",
                other
            ))),
        }
    }
}

/// Options passed to the transport when opening a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelOptions {
    /// Delivery mode.
    #[serde(default)]
    pub mode: DeliveryMode,

    /// Allow endpoints to be opened from worker contexts.
    #[serde(default)]
    pub worker_support: bool,
}

/// Kind of execution context a transport serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// A top-level context (tab, window, process).
    Window,
    /// A secondary worker context.
    Worker,
}

// =============================================================================
// Traits
// =============================================================================

/// Callback invoked with the text of every frame delivered to an endpoint.
pub type Listener = Arc<dyn Fn(&str) + Send + Sync>;

/// Opens named broadcast endpoints.
pub trait Transport: Send + Sync {
    /// Opens an endpoint bound to `name`.
    fn open(&self, name: &str, options: &ChannelOptions) -> SyncResult<Box<dyn Endpoint>>;
}

/// One open endpoint of a named broadcast channel.
pub trait Endpoint: Send {
    /// Posts a frame to the other endpoints bound to the same name.
    fn post(&self, frame: &str) -> SyncResult<()>;

    /// Registers the inbound listener, replacing any previous one.
    fn listen(&mut self, listener: Listener);

    /// Detaches the inbound listener.
    fn remove_listeners(&mut self);

    /// Releases the endpoint. Idempotent.
    fn close(&mut self);

    /// Returns true once [`Endpoint::close`] has been called.
    fn is_closed(&self) -> bool;
}

// =============================================================================
// In-Memory Transport
// =============================================================================

/// A process-local broadcast bus.
///
/// Every [`memory::MemoryTransport`] created from one [`memory::MemoryBus`]
/// behaves like a separate execution context sharing the same channels.
pub mod memory {
    use std::collections::HashMap;
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tracing::{debug, trace};

    use super::*;
    use crate::error::SyncError;

    /// A registered listener on the bus.
    struct Subscriber {
        endpoint_id: u64,
        listener: Listener,
    }

    #[derive(Default)]
    struct BusState {
        next_endpoint_id: u64,
        subscribers: HashMap<String, Vec<Subscriber>>,
        posted: HashMap<String, u64>,
        offline: bool,
    }

    /// Shared state for the in-memory network.
    #[derive(Clone, Default)]
    pub struct MemoryBus {
        state: Arc<Mutex<BusState>>,
    }

    impl MemoryBus {
        /// Creates a new bus.
        pub fn new() -> Self {
            Self::default()
        }

        /// Creates a transport for one execution context.
        pub fn transport(&self, context: ContextKind) -> Arc<MemoryTransport> {
            Arc::new(MemoryTransport {
                bus: self.clone(),
                context,
            })
        }

        /// Simulates a transport outage: while offline every post fails.
        pub fn set_offline(&self, offline: bool) {
            self.state.lock().offline = offline;
        }

        /// Number of frames posted on `channel` so far.
        pub fn posted(&self, channel: &str) -> u64 {
            self.state.lock().posted.get(channel).copied().unwrap_or(0)
        }

        /// Total number of frames posted on all channels.
        pub fn total_posted(&self) -> u64 {
            self.state.lock().posted.values().sum()
        }

        /// Number of endpoints listening on `channel`.
        pub fn listeners(&self, channel: &str) -> usize {
            self.state
                .lock()
                .subscribers
                .get(channel)
                .map(Vec::len)
                .unwrap_or(0)
        }

        fn next_endpoint_id(&self) -> u64 {
            let mut state = self.state.lock();
            state.next_endpoint_id += 1;
            state.next_endpoint_id
        }

        fn subscribe(&self, channel: &str, endpoint_id: u64, listener: Listener) {
            let mut state = self.state.lock();
            let subscribers = state.subscribers.entry(channel.to_string()).or_default();
            subscribers.retain(|s| s.endpoint_id != endpoint_id);
            subscribers.push(Subscriber {
                endpoint_id,
                listener,
            });
        }

        fn unsubscribe(&self, channel: &str, endpoint_id: u64) {
            let mut state = self.state.lock();
            if let Some(subscribers) = state.subscribers.get_mut(channel) {
                subscribers.retain(|s| s.endpoint_id != endpoint_id);
                if subscribers.is_empty() {
                    state.subscribers.remove(channel);
                }
            }
        }

        fn deliver(
            &self,
            channel: &str,
            sender_id: u64,
            mode: DeliveryMode,
            frame: &str,
        ) -> SyncResult<usize> {
            // Listeners run outside the lock so they may post themselves.
            let targets: Vec<Listener> = {
                let mut state = self.state.lock();
                if state.offline {
                    return Err(SyncError::Transport(format!(
                        "memory bus is offline, cannot post on '{}'",
                        channel
                    )));
                }
                *state.posted.entry(channel.to_string()).or_insert(0) += 1;

                state
                    .subscribers
                    .get(channel)
                    .map(|subscribers| {
                        subscribers
                            .iter()
                            .filter(|s| mode == DeliveryMode::FullMesh || s.endpoint_id != sender_id)
                            .map(|s| Arc::clone(&s.listener))
                            .collect()
                    })
                    .unwrap_or_default()
            };

            for listener in &targets {
                listener(frame);
            }
            Ok(targets.len())
        }
    }

    /// Transport for one execution context on a [`MemoryBus`].
    pub struct MemoryTransport {
        bus: MemoryBus,
        context: ContextKind,
    }

    impl MemoryTransport {
        /// Context this transport serves.
        pub fn context(&self) -> ContextKind {
            self.context
        }
    }

    impl Transport for MemoryTransport {
        fn open(&self, name: &str, options: &ChannelOptions) -> SyncResult<Box<dyn Endpoint>> {
            if self.context == ContextKind::Worker && !options.worker_support {
                return Err(SyncError::Transport(format!(
                    "cannot open '{}' from a worker context without worker support",
                    name
                )));
            }

            let id = self.bus.next_endpoint_id();
            debug!(channel = %name, endpoint = id, mode = %options.mode, "Opened memory endpoint");

            Ok(Box::new(MemoryEndpoint {
                bus: self.bus.clone(),
                name: name.to_string(),
                id,
                mode: options.mode,
                closed: false,
            }))
        }
    }

    /// An endpoint on a [`MemoryBus`].
    pub struct MemoryEndpoint {
        bus: MemoryBus,
        name: String,
        id: u64,
        mode: DeliveryMode,
        closed: bool,
    }

    impl Endpoint for MemoryEndpoint {
        fn post(&self, frame: &str) -> SyncResult<()> {
            if self.closed {
                return Err(SyncError::ChannelClosed(self.name.clone()));
            }
            let delivered = self.bus.deliver(&self.name, self.id, self.mode, frame)?;
            trace!(channel = %self.name, endpoint = self.id, delivered, "Posted frame");
            Ok(())
        }

        fn listen(&mut self, listener: Listener) {
            if !self.closed {
                self.bus.subscribe(&self.name, self.id, listener);
            }
        }

        fn remove_listeners(&mut self) {
            self.bus.unsubscribe(&self.name, self.id);
        }

        fn close(&mut self) {
            if self.closed {
                return;
            }
            self.remove_listeners();
            self.closed = true;
            debug!(channel = %self.name, endpoint = self.id, "Closed memory endpoint");
        }

        fn is_closed(&self) -> bool {
            self.closed
        }
    }

    impl Drop for MemoryEndpoint {
        fn drop(&mut self) {
            self.close();
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn recorder() -> (Listener, Arc<Mutex<Vec<String>>>) {
            let frames = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&frames);
            let listener: Listener = Arc::new(move |frame: &str| sink.lock().push(frame.to_string()));
            (listener, frames)
        }

        #[test]
        fn test_exclude_self_delivery() {
            let bus = MemoryBus::new();
            let a = bus.transport(ContextKind::Window);
            let b = bus.transport(ContextKind::Window);
            let options = ChannelOptions::default();

            let mut ea = a.open("todos", &options).unwrap();
            let mut eb = b.open("todos", &options).unwrap();
            let (la, fa) = recorder();
            let (lb, fb) = recorder();
            ea.listen(la);
            eb.listen(lb);

            ea.post("hello").unwrap();

            assert!(fa.lock().is_empty());
            assert_eq!(*fb.lock(), vec!["hello".to_string()]);
            assert_eq!(bus.posted("todos"), 1);
        }

        #[test]
        fn test_full_mesh_delivers_to_sender() {
            let bus = MemoryBus::new();
            let a = bus.transport(ContextKind::Window);
            let options = ChannelOptions {
                mode: DeliveryMode::FullMesh,
                worker_support: false,
            };

            let mut ea = a.open("todos", &options).unwrap();
            let (la, fa) = recorder();
            ea.listen(la);
            ea.post("echo").unwrap();

            assert_eq!(*fa.lock(), vec!["echo".to_string()]);
        }

        #[test]
        fn test_channels_are_isolated_by_name() {
            let bus = MemoryBus::new();
            let t = bus.transport(ContextKind::Window);
            let options = ChannelOptions::default();

            let ea = t.open("todos", &options).unwrap();
            let mut eb = t.open("cart", &options).unwrap();
            let (lb, fb) = recorder();
            eb.listen(lb);

            ea.post("x").unwrap();
            assert!(fb.lock().is_empty());
        }

        #[test]
        fn test_close_is_idempotent_and_stops_delivery() {
            let bus = MemoryBus::new();
            let t = bus.transport(ContextKind::Window);
            let options = ChannelOptions::default();

            let sender = t.open("todos", &options).unwrap();
            let mut receiver = t.open("todos", &options).unwrap();
            let (l, frames) = recorder();
            receiver.listen(l);
            assert_eq!(bus.listeners("todos"), 1);

            receiver.close();
            receiver.close();
            assert!(receiver.is_closed());
            assert_eq!(bus.listeners("todos"), 0);

            sender.post("late").unwrap();
            assert!(frames.lock().is_empty());
            assert!(matches!(receiver.post("x"), Err(SyncError::ChannelClosed(_))));
        }

        #[test]
        fn test_worker_context_requires_worker_support() {
            let bus = MemoryBus::new();
            let worker = bus.transport(ContextKind::Worker);

            let denied = worker.open("todos", &ChannelOptions::default());
            assert!(matches!(denied, Err(SyncError::Transport(_))));

            let allowed = worker.open(
                "todos",
                &ChannelOptions {
                    worker_support: true,
                    ..Default::default()
                },
            );
            assert!(allowed.is_ok());
        }

        #[test]
        fn test_offline_bus_fails_posts() {
            let bus = MemoryBus::new();
            let endpoint = bus
                .transport(ContextKind::Window)
                .open("todos", &ChannelOptions::default())
                .unwrap();

            bus.set_offline(true);
            assert!(matches!(endpoint.post("x"), Err(SyncError::Transport(_))));
            assert_eq!(bus.posted("todos"), 0);

            bus.set_offline(false);
            assert!(endpoint.post("x").is_ok());
        }
    }
}
