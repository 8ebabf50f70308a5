//! # Leader Election Module
//!
//! Elects exactly one leader among the instances sharing the coordination
//! channel.
//!
//! ## Election Protocol
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Leader Election Protocol                             │
//! │                                                                         │
//! │  Every elector owns a random token (UUID v4).                           │
//! │                                                                         │
//! │  APPLYING:                                                             │
//! │  ─────────                                                             │
//! │  1. Post { action: "apply", token }                                    │
//! │  2. Wait response_time. Lose on:                                       │
//! │       • any foreign "tell"                                             │
//! │       • a foreign "apply" with a greater token                         │
//! │     Own messages are ignored.                                          │
//! │  3. Not lost → LEADING, post { action: "tell", token }                 │
//! │                                                                         │
//! │  WAITING (after losing):                                               │
//! │  ───────────────────────                                               │
//! │  • fallback_interval elapses   → apply again                           │
//! │  • foreign "death" arrives     → apply again immediately               │
//! │                                                                         │
//! │  LEADING:                                                              │
//! │  ────────                                                              │
//! │  • foreign "apply" → answer with "tell"                                │
//! │  • never demotes                                                       │
//! │  • on shutdown the agent posts { action: "death", token }              │
//! │                                                                         │
//! │  STATE TRANSITIONS:                                                    │
//! │  ───────────────────                                                   │
//! │                                                                         │
//! │  ┌────────────┐   no objection   ┌─────────────┐                       │
//! │  │  APPLYING  │ ───────────────▶ │   LEADING   │                       │
//! │  └─────┬──────┘                  └─────────────┘                       │
//! │        │ tell / higher apply            ▲                               │
//! │        ▼                                │ (via APPLYING)                │
//! │  ┌────────────┐   fallback / death      │                               │
//! │  │  WAITING   │ ────────────────────────┘                               │
//! │  └────────────┘                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The elector runs on its own task and only talks to the agent through
//! channels, so waiting for an election never delays mutation routing.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ElectionSettings;
use crate::protocol::ElectionMessage;

// =============================================================================
// Configuration
// =============================================================================

/// Timing of one elector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElectionConfig {
    /// How long an application waits for objections.
    pub response_time: Duration,

    /// How long a losing elector waits before applying again.
    pub fallback_interval: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        ElectionConfig::from(&ElectionSettings::default())
    }
}

impl From<&ElectionSettings> for ElectionConfig {
    fn from(settings: &ElectionSettings) -> Self {
        ElectionConfig {
            response_time: settings.response_time(),
            fallback_interval: settings.fallback_interval(),
        }
    }
}

// =============================================================================
// Election Handle
// =============================================================================

/// Handle to a running elector.
///
/// Dropping the handle stops the elector.
#[derive(Debug)]
pub struct ElectionHandle {
    token: String,
    inbound: mpsc::UnboundedSender<ElectionMessage>,
    leadership: watch::Receiver<bool>,
    stop: Option<oneshot::Sender<()>>,
}

impl ElectionHandle {
    /// Token of this elector.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Hands a message received on the coordination channel to the elector.
    ///
    /// Returns false if the elector has stopped.
    pub fn deliver(&self, message: ElectionMessage) -> bool {
        self.inbound.send(message).is_ok()
    }

    /// A sender that delivers to this elector, for relays.
    pub fn sender(&self) -> mpsc::UnboundedSender<ElectionMessage> {
        self.inbound.clone()
    }

    /// Returns true once this elector has won.
    pub fn is_leader(&self) -> bool {
        *self.leadership.borrow()
    }

    /// Subscribes to leadership changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.leadership.clone()
    }

    /// Stops the elector. Returns the `death` message to post if it was
    /// leading.
    pub fn shutdown(mut self) -> Option<ElectionMessage> {
        let death = self.is_leader().then(|| ElectionMessage::Death {
            token: self.token.clone(),
        });
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        debug!(token = %self.token, leader = death.is_some(), "Elector stopped");
        death
    }
}

/// Starts an elector on a new task.
///
/// Returns its handle and the receiver of the messages it wants posted on
/// the coordination channel.
pub fn spawn(config: ElectionConfig) -> (ElectionHandle, mpsc::UnboundedReceiver<ElectionMessage>) {
    let token = Uuid::new_v4().to_string();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (leadership_tx, leadership_rx) = watch::channel(false);
    let (stop_tx, stop_rx) = oneshot::channel();

    let elector = Elector {
        token: token.clone(),
        config,
        inbound: inbound_rx,
        outbound: outbound_tx,
        leadership: leadership_tx,
        stop: stop_rx,
    };
    tokio::spawn(elector.run());

    let handle = ElectionHandle {
        token,
        inbound: inbound_tx,
        leadership: leadership_rx,
        stop: Some(stop_tx),
    };
    (handle, outbound_rx)
}

// =============================================================================
// Elector Task
// =============================================================================

/// Result of one phase of the elector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Won,
    Lost,
    Retry,
    Stopped,
}

struct Elector {
    token: String,
    config: ElectionConfig,
    inbound: mpsc::UnboundedReceiver<ElectionMessage>,
    outbound: mpsc::UnboundedSender<ElectionMessage>,
    leadership: watch::Sender<bool>,
    stop: oneshot::Receiver<()>,
}

impl Elector {
    async fn run(mut self) {
        debug!(token = %self.token, "Elector started");

        loop {
            match self.apply_once().await {
                Phase::Won => break,
                Phase::Stopped => return,
                _ => {}
            }
            if self.wait_for_vacancy().await == Phase::Stopped {
                return;
            }
        }

        info!(token = %self.token, "Won leader election");
        self.leadership.send_replace(true);
        if !self.post(ElectionMessage::Tell {
            token: self.token.clone(),
        }) {
            return;
        }

        self.lead().await;
    }

    /// Posts `apply` and waits `response_time` for objections.
    async fn apply_once(&mut self) -> Phase {
        debug!(token = %self.token, "Applying for leadership");
        if !self.post(ElectionMessage::Apply {
            token: self.token.clone(),
        }) {
            return Phase::Stopped;
        }

        let deadline = sleep(self.config.response_time);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut self.stop => return Phase::Stopped,
                _ = &mut deadline => return Phase::Won,
                message = self.inbound.recv() => {
                    let Some(message) = message else {
                        return Phase::Stopped;
                    };
                    if message.token() == self.token {
                        continue;
                    }
                    match message {
                        ElectionMessage::Tell { token } => {
                            debug!(leader = %token, "Application lost to existing leader");
                            return Phase::Lost;
                        }
                        ElectionMessage::Apply { token } if token > self.token => {
                            debug!(rival = %token, "Application lost to greater token");
                            return Phase::Lost;
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Waits `fallback_interval`, or until a leader announces its death.
    async fn wait_for_vacancy(&mut self) -> Phase {
        let fallback = sleep(self.config.fallback_interval);
        tokio::pin!(fallback);

        loop {
            tokio::select! {
                _ = &mut self.stop => return Phase::Stopped,
                _ = &mut fallback => return Phase::Retry,
                message = self.inbound.recv() => match message {
                    None => return Phase::Stopped,
                    Some(ElectionMessage::Death { token }) if token != self.token => {
                        debug!(leader = %token, "Leader died, applying again");
                        return Phase::Retry;
                    }
                    Some(_) => {}
                },
            }
        }
    }

    /// Answers applications until stopped.
    async fn lead(&mut self) {
        loop {
            tokio::select! {
                _ = &mut self.stop => return,
                message = self.inbound.recv() => match message {
                    None => return,
                    Some(message) if message.token() == self.token => {}
                    Some(ElectionMessage::Apply { token }) => {
                        debug!(applicant = %token, "Answering application");
                        if !self.post(ElectionMessage::Tell { token: self.token.clone() }) {
                            return;
                        }
                    }
                    Some(ElectionMessage::Tell { token }) => {
                        warn!(other = %token, "Another instance claims leadership");
                    }
                    Some(ElectionMessage::Death { .. }) => {}
                },
            }
        }
    }

    fn post(&self, message: ElectionMessage) -> bool {
        self.outbound.send(message).is_ok()
    }
}
