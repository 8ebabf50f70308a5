//! # Channel Registry
//!
//! Owns every live channel of one instance, keyed by name.
//!
//! ## Replacement
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  get_or_create("todos", ..)                             │
//! │                                                                         │
//! │   before                          after                                 │
//! │   ┌──────────────────────┐        ┌──────────────────────┐             │
//! │   │ "todos"  epoch 3     │  ───►  │ "todos"  epoch 4     │             │
//! │   │ (closed, listener    │        │ (fresh endpoint,     │             │
//! │   │  removed)            │        │  empty last message) │             │
//! │   └──────────────────────┘        └──────────────────────┘             │
//! │                                                                         │
//! │   Frames already queued from epoch 3 fail `is_current` and are dropped. │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! At most one live channel exists per name. The registry is the only place
//! channels are created and closed.

use std::collections::HashMap;
use std::sync::Arc;

use tabcast_core::ModuleDeclaration;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::channel::Channel;
use crate::error::SyncResult;
use crate::protocol::InboundFrame;
use crate::transport::{ChannelOptions, Transport};

/// A live channel together with its generation.
struct Entry {
    epoch: u64,
    channel: Channel,
}

/// Name → channel map for one instance.
pub struct ChannelRegistry {
    transport: Arc<dyn Transport>,
    channels: HashMap<String, Entry>,
    next_epoch: u64,
    sink: mpsc::UnboundedSender<InboundFrame>,
}

impl ChannelRegistry {
    /// Creates an empty registry. Every channel it opens forwards inbound
    /// frames to `sink`.
    pub fn new(transport: Arc<dyn Transport>, sink: mpsc::UnboundedSender<InboundFrame>) -> Self {
        ChannelRegistry {
            transport,
            channels: HashMap::new(),
            next_epoch: 0,
            sink,
        }
    }

    /// Creates the channel `name`, replacing any existing one.
    ///
    /// An existing channel is closed before the new endpoint is opened. If
    /// opening fails the name is left without a channel.
    pub fn get_or_create(
        &mut self,
        name: &str,
        options: &ChannelOptions,
        scope: Option<&ModuleDeclaration>,
    ) -> SyncResult<&mut Channel> {
        if let Some(mut previous) = self.channels.remove(name) {
            debug!(channel = %name, epoch = previous.epoch, "Replacing channel");
            previous.channel.close();
        }

        let mut channel = Channel::create(&*self.transport, name, options, scope)?;

        self.next_epoch += 1;
        let epoch = self.next_epoch;

        let sink = self.sink.clone();
        let channel_name = name.to_string();
        channel.listen(Arc::new(move |body: &str| {
            // The agent may already be gone during teardown.
            let _ = sink.send(InboundFrame::new(channel_name.clone(), epoch, body));
        }));

        let entry = self
            .channels
            .entry(name.to_string())
            .or_insert(Entry { epoch, channel });
        Ok(&mut entry.channel)
    }

    /// Looks up a channel by name.
    pub fn get(&self, name: &str) -> Option<&Channel> {
        self.channels.get(name).map(|entry| &entry.channel)
    }

    /// Looks up a channel by name, mutably.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Channel> {
        self.channels.get_mut(name).map(|entry| &mut entry.channel)
    }

    /// Generation of the live channel `name`.
    pub fn epoch(&self, name: &str) -> Option<u64> {
        self.channels.get(name).map(|entry| entry.epoch)
    }

    /// Returns true if `frame` was received by the live channel of its name.
    pub fn is_current(&self, frame: &InboundFrame) -> bool {
        let current = self.epoch(&frame.channel) == Some(frame.epoch);
        if !current {
            trace!(channel = %frame.channel, epoch = frame.epoch, "Frame from a replaced channel");
        }
        current
    }

    /// Names of all live channels, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of live channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Returns true if no channel is live.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Closes and forgets every channel.
    pub fn close_all(&mut self) {
        for (name, mut entry) in self.channels.drain() {
            trace!(channel = %name, "Closing channel at teardown");
            entry.channel.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryBus;
    use crate::transport::ContextKind;
    use serde_json::json;
    use tabcast_core::{Envelope, InstanceId, Mutation};

    fn todos() -> ModuleDeclaration {
        ModuleDeclaration::broadcast(["pushTodo"])
    }

    fn push() -> Envelope {
        Envelope::new(
            InstanceId::from("peer"),
            Mutation::new("todos/pushTodo", json!({ "_id": "a1" })),
        )
    }

    #[test]
    fn test_listener_forwards_frames_with_epoch() {
        let bus = MemoryBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut registry = ChannelRegistry::new(bus.transport(ContextKind::Window), tx);
        registry
            .get_or_create("todos", &ChannelOptions::default(), Some(&todos()))
            .unwrap();

        let peer = bus
            .transport(ContextKind::Window)
            .open("todos", &ChannelOptions::default())
            .unwrap();
        peer.post(&push().to_json().unwrap()).unwrap();

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.channel, "todos");
        assert_eq!(Some(frame.epoch), registry.epoch("todos"));
        assert!(registry.is_current(&frame));
    }

    #[test]
    fn test_replacement_closes_previous_channel() {
        let bus = MemoryBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut registry = ChannelRegistry::new(bus.transport(ContextKind::Window), tx);
        let options = ChannelOptions::default();

        let first = registry.get_or_create("todos", &options, Some(&todos())).unwrap();
        first.set_last_message(&push().value);
        let first_epoch = registry.epoch("todos").unwrap();

        let second = registry.get_or_create("todos", &options, Some(&todos())).unwrap();
        assert!(second.last_message().is_none());
        let second_epoch = registry.epoch("todos").unwrap();

        assert_ne!(first_epoch, second_epoch);
        assert_eq!(registry.len(), 1);
        assert_eq!(bus.listeners("todos"), 1);

        let stale = InboundFrame::new("todos", first_epoch, "{}");
        assert!(!registry.is_current(&stale));

        let peer = bus.transport(ContextKind::Window).open("todos", &options).unwrap();
        peer.post("{}").unwrap();
        assert_eq!(rx.try_recv().unwrap().epoch, second_epoch);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unknown_channel_frame_is_not_current() {
        let bus = MemoryBus::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let registry = ChannelRegistry::new(bus.transport(ContextKind::Window), tx);

        assert!(registry.get("todos").is_none());
        assert!(!registry.is_current(&InboundFrame::new("todos", 1, "{}")));
    }

    #[test]
    fn test_failed_open_leaves_no_channel() {
        let bus = MemoryBus::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut registry = ChannelRegistry::new(bus.transport(ContextKind::Worker), tx);

        let result = registry.get_or_create("todos", &ChannelOptions::default(), Some(&todos()));
        assert!(result.unwrap_err().is_transport_error());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_close_all() {
        let bus = MemoryBus::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut registry = ChannelRegistry::new(bus.transport(ContextKind::Window), tx);
        let options = ChannelOptions::default();
        registry.get_or_create("todos", &options, Some(&todos())).unwrap();
        registry.get_or_create("tabcast", &options, None).unwrap();
        assert_eq!(registry.names(), vec!["tabcast", "todos"]);

        registry.close_all();

        assert!(registry.is_empty());
        assert_eq!(bus.listeners("todos"), 0);
        assert_eq!(bus.listeners("tabcast"), 0);
    }
}
