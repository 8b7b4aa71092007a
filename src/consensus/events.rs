//! Engine events.
//!
//! Every state transition publishes one [`CouncilEvent`] after the local state
//! has been updated. A transport layer observes `MessageSent` and friends to
//! perform the actual delivery.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 1024;

/// Events emitted by the engines and the council facade.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CouncilEvent {
    Initialized {
        node_id: String,
        protocol: String,
    },
    Shutdown {
        node_id: String,
        protocol: String,
    },
    CouncilInitialized {
        protocol: String,
    },
    CouncilShutdown {
        protocol: String,
    },
    ConsensusProposed {
        petition_id: String,
        protocol: String,
        term: u64,
    },
    ConsensusAchieved {
        petition_id: String,
        approved: bool,
        approval_rate: f64,
        /// Decided by the designated veto holder
        veto: bool,
    },
    ConsensusExpired {
        petition_id: String,
    },
    LeaderElected {
        leader_id: String,
        term: u64,
    },
    LogCommitted {
        index: u64,
        term: u64,
        petition_id: String,
    },
    MessageSent {
        to: String,
        message_id: String,
        kind: String,
    },
    AntiEntropySync {
        neighbor: String,
        version: u64,
        pending: usize,
    },
    PrimaryElected {
        primary_id: String,
        view: u64,
    },
    ViewChanged {
        view: u64,
    },
}

impl CouncilEvent {
    /// Dotted event name, stable across releases.
    pub fn name(&self) -> &'static str {
        match self {
            CouncilEvent::Initialized { .. } => "initialized",
            CouncilEvent::Shutdown { .. } => "shutdown",
            CouncilEvent::CouncilInitialized { .. } => "council.initialized",
            CouncilEvent::CouncilShutdown { .. } => "council.shutdown",
            CouncilEvent::ConsensusProposed { .. } => "consensus.proposed",
            CouncilEvent::ConsensusAchieved { .. } => "consensus.achieved",
            CouncilEvent::ConsensusExpired { .. } => "consensus.expired",
            CouncilEvent::LeaderElected { .. } => "leader.elected",
            CouncilEvent::LogCommitted { .. } => "log.committed",
            CouncilEvent::MessageSent { .. } => "message.sent",
            CouncilEvent::AntiEntropySync { .. } => "anti_entropy.sync",
            CouncilEvent::PrimaryElected { .. } => "primary.elected",
            CouncilEvent::ViewChanged { .. } => "view.changed",
        }
    }
}

/// Broadcast fan-out of [`CouncilEvent`]s.
///
/// Emitting with no subscribers is not an error; slow subscribers lag rather
/// than block the engine.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<CouncilEvent>,
}

impl EventBus {
    /// Create a new bus.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    /// Publish an event.
    pub fn emit(&self, event: CouncilEvent) {
        tracing::trace!(event = event.name(), "council event");
        let _ = self.sender.send(event);
    }

    /// Subscribe to all subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<CouncilEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Drain every event currently buffered in a receiver.
#[cfg(test)]
pub(crate) fn drain(receiver: &mut broadcast::Receiver<CouncilEvent>) -> Vec<CouncilEvent> {
    let mut events = Vec::new();
    loop {
        match receiver.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new();
        bus.emit(CouncilEvent::ViewChanged { view: 1 });
    }

    #[test]
    fn test_subscribe_and_drain() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.emit(CouncilEvent::ViewChanged { view: 1 });
        bus.emit(CouncilEvent::CouncilShutdown {
            protocol: "whisper".to_string(),
        });

        let events = drain(&mut rx);
        let names: Vec<&str> = events.iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["view.changed", "council.shutdown"]);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(CouncilEvent::ViewChanged { view: 3 }).unwrap();
        assert_eq!(json["event"], "view_changed");
        assert_eq!(json["view"], 3);
    }
}
