//! Process-wide council defaults.

use serde::Serialize;

/// Default wait before a pending petition expires.
pub const DEFAULT_CONSENSUS_TIMEOUT_MS: u64 = 30_000;
/// Default approval fraction for threshold-based protocols.
pub const DEFAULT_CONSENSUS_THRESHOLD: f64 = 0.66;
pub const DEFAULT_MAX_AGENTS: usize = 100;
/// Default bound on concurrently pending petitions per engine.
pub const DEFAULT_MAX_TASKS: usize = 1000;
/// Bound on queued outbound gossip messages.
pub const MAX_QUEUE_SIZE: usize = 10_000;
/// Gossip message ids remembered for duplicate suppression.
pub const MAX_SEEN_MESSAGES: usize = 50_000;
/// Delivery attempts per peer before a replication request is abandoned.
pub const MAX_RETRIES: u32 = 3;

/// Defaults exposed as one value, for embedders that want to display or
/// serialize them.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct CouncilConstants {
    pub default_consensus_timeout_ms: u64,
    pub default_consensus_threshold: f64,
    pub default_max_agents: usize,
    pub default_max_tasks: usize,
    pub max_queue_size: usize,
    pub max_retries: u32,
}

pub const COUNCIL_CONSTANTS: CouncilConstants = CouncilConstants {
    default_consensus_timeout_ms: DEFAULT_CONSENSUS_TIMEOUT_MS,
    default_consensus_threshold: DEFAULT_CONSENSUS_THRESHOLD,
    default_max_agents: DEFAULT_MAX_AGENTS,
    default_max_tasks: DEFAULT_MAX_TASKS,
    max_queue_size: MAX_QUEUE_SIZE,
    max_retries: MAX_RETRIES,
};
