//! # Council - pluggable consensus engine
//!
//! Submit petitions, collect votes and reach a bounded-time decision using one
//! of several agreement protocols:
//! - **Gate quorum**: frequency-weighted voting with a designated veto holder
//! - **Raft** (`council-vote`, also serving `ancient-accord`): leader-based replication
//! - **Gossip** (`whisper`): epidemic propagation until convergence
//! - **Byzantine** (`shinkamis-decree`): PBFT-style agreement tolerating `f` faults
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use council::consensus::{create_council_engine, CouncilEngineOptions, CouncilProtocol, Vote};
//!
//! #[tokio::main]
//! async fn main() -> council::Result<()> {
//!     let engine = create_council_engine(CouncilEngineOptions::new(
//!         CouncilProtocol::GateQuorum,
//!         "seer",
//!     ))?;
//!     engine.initialize(None).await?;
//!
//!     let petition = engine.propose(Some(serde_json::json!({"action": "deploy"}))).await?;
//!     engine.vote(&petition.id, Vote::approve("oracle")).await?;
//!     let result = engine.await_consensus(&petition.id).await?;
//!     println!("approved: {}", result.approved);
//!     Ok(())
//! }
//! ```

pub mod consensus;
pub mod core;

pub use consensus::{
    create_council_engine, select_council_protocol, CouncilEngine, CouncilEngineOptions,
    CouncilEvent, CouncilProtocol, CouncilResult, Element, Petition, Vote,
};
pub use core::error::{Error, Result};
