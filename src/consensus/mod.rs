//! Consensus Module
//!
//! Pluggable agreement protocols behind one petition lifecycle:
//! - Gate quorum: frequency-weighted single-round voting with veto
//! - Raft: leader election and majority replication
//! - Gossip: epidemic propagation with convergence tracking
//! - Byzantine: PBFT-style three-phase agreement
//! - Council engine facade and protocol selection

mod ballot;
pub mod byzantine;
pub mod engine;
pub mod events;
pub mod gate_quorum;
pub mod gossip;
pub mod petition;
pub mod protocol;
pub mod raft;
mod timers;

pub use byzantine::{ByzantineConfig, ByzantineConsensus, PbftMessage, PbftPhase};
pub use engine::{create_council_engine, CouncilEngine, CouncilEngineOptions};
pub use events::{CouncilEvent, EventBus};
pub use gate_quorum::{GateQuorumConfig, GateQuorumConsensus, QuorumTally};
pub use gossip::{GossipConfig, GossipConsensus, GossipMessage, GossipPayload};
pub use petition::{CouncilConfig, CouncilResult, NodeProfile, Petition, PetitionStatus, Vote};
pub use protocol::{select_council_protocol, ConsensusProtocol, CouncilProtocol, Element};
pub use raft::{
    AppendRequest, LogEntry, RaftConfig, RaftConsensus, RaftState, RaftTransport, SimulatedPeers,
    VoteRequest,
};
