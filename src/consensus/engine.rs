//! Council engine facade.
//!
//! Wraps exactly one protocol engine behind the shared petition lifecycle and
//! exposes that engine's event bus unchanged.

use crate::consensus::byzantine::{ByzantineConfig, ByzantineConsensus};
use crate::consensus::events::{CouncilEvent, EventBus};
use crate::consensus::gate_quorum::{GateQuorumConfig, GateQuorumConsensus};
use crate::consensus::gossip::{GossipConfig, GossipConsensus};
use crate::consensus::petition::{CouncilConfig, CouncilResult, NodeProfile, Petition, Vote};
use crate::consensus::protocol::{
    select_council_protocol, ConsensusProtocol, CouncilProtocol, Element,
};
use crate::consensus::raft::{RaftConfig, RaftConsensus};
use crate::core::{Error, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;

/// Options for [`create_council_engine`].
///
/// Only the config matching `protocol` is used; a missing one falls back to
/// its defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CouncilEngineOptions {
    pub protocol: CouncilProtocol,
    pub node_id: String,
    #[serde(default)]
    pub gate_quorum: Option<GateQuorumConfig>,
    #[serde(default)]
    pub raft: Option<RaftConfig>,
    #[serde(default)]
    pub gossip: Option<GossipConfig>,
    #[serde(default)]
    pub byzantine: Option<ByzantineConfig>,
}

impl CouncilEngineOptions {
    pub fn new(protocol: CouncilProtocol, node_id: &str) -> Self {
        Self {
            protocol,
            node_id: node_id.to_string(),
            gate_quorum: None,
            raft: None,
            gossip: None,
            byzantine: None,
        }
    }

    /// Options for the protocol suited to a domain hint.
    pub fn for_element(node_id: &str, hint: Option<Element>) -> Self {
        Self::new(select_council_protocol(hint), node_id)
    }

    /// Parse options from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    pub fn with_gate_quorum(mut self, config: GateQuorumConfig) -> Self {
        self.gate_quorum = Some(config);
        self
    }

    pub fn with_raft(mut self, config: RaftConfig) -> Self {
        self.raft = Some(config);
        self
    }

    pub fn with_gossip(mut self, config: GossipConfig) -> Self {
        self.gossip = Some(config);
        self
    }

    pub fn with_byzantine(mut self, config: ByzantineConfig) -> Self {
        self.byzantine = Some(config);
        self
    }

    /// Reject option sets no engine could run with.
    pub fn validate(&self) -> Result<()> {
        if self.node_id.trim().is_empty() {
            return Err(Error::InvalidConfig("node_id must not be empty".to_string()));
        }
        let unit = |name: &str, value: f64| {
            if value.is_finite() && value > 0.0 && value <= 1.0 {
                Ok(())
            } else {
                Err(Error::InvalidConfig(format!("{} must be in (0, 1], got {}", name, value)))
            }
        };

        match self.protocol {
            CouncilProtocol::GateQuorum => {
                if let Some(cfg) = &self.gate_quorum {
                    if cfg.quorum_size == 0 {
                        return Err(Error::InvalidConfig("quorum_size must be positive".to_string()));
                    }
                    let basis = cfg.baseline_weight_basis;
                    if basis.is_nan() || basis <= 0.0 {
                        return Err(Error::InvalidConfig(
                            "baseline_weight_basis must be positive".to_string(),
                        ));
                    }
                    unit("approval_threshold", cfg.approval_threshold)?;
                }
            }
            CouncilProtocol::Raft | CouncilProtocol::Paxos => {
                if let Some(cfg) = &self.raft {
                    if cfg.election_timeout_min_ms > cfg.election_timeout_max_ms {
                        return Err(Error::InvalidConfig(
                            "election_timeout_min_ms exceeds election_timeout_max_ms".to_string(),
                        ));
                    }
                    unit("threshold", cfg.threshold)?;
                }
            }
            CouncilProtocol::Gossip => {
                if let Some(cfg) = &self.gossip {
                    if cfg.fanout == 0 {
                        return Err(Error::InvalidConfig("fanout must be positive".to_string()));
                    }
                    unit("threshold", cfg.threshold)?;
                    unit("convergence_threshold", cfg.convergence_threshold)?;
                }
            }
            CouncilProtocol::Byzantine => {}
        }
        Ok(())
    }
}

#[derive(Clone)]
enum Backend {
    GateQuorum(GateQuorumConsensus),
    Raft(RaftConsensus),
    Gossip(GossipConsensus),
    Byzantine(ByzantineConsensus),
}

impl Backend {
    fn engine(&self) -> &dyn ConsensusProtocol {
        match self {
            Backend::GateQuorum(e) => e,
            Backend::Raft(e) => e,
            Backend::Gossip(e) => e,
            Backend::Byzantine(e) => e,
        }
    }
}

/// One council participant running a single agreement protocol.
#[derive(Clone)]
pub struct CouncilEngine {
    protocol: CouncilProtocol,
    backend: Backend,
}

/// Instantiate the engine selected by `options.protocol`.
pub fn create_council_engine(options: CouncilEngineOptions) -> Result<CouncilEngine> {
    CouncilEngine::new(options)
}

impl CouncilEngine {
    pub fn new(options: CouncilEngineOptions) -> Result<Self> {
        options.validate()?;
        let node_id = options.node_id.as_str();
        let backend = match options.protocol {
            CouncilProtocol::GateQuorum => Backend::GateQuorum(GateQuorumConsensus::new(
                node_id,
                options.gate_quorum.unwrap_or_default(),
            )),
            CouncilProtocol::Raft | CouncilProtocol::Paxos => {
                Backend::Raft(RaftConsensus::new(node_id, options.raft.unwrap_or_default()))
            }
            CouncilProtocol::Gossip => Backend::Gossip(GossipConsensus::new(
                node_id,
                options.gossip.unwrap_or_default(),
            )),
            CouncilProtocol::Byzantine => Backend::Byzantine(ByzantineConsensus::new(
                node_id,
                options.byzantine.unwrap_or_default(),
            )),
        };
        Ok(Self {
            protocol: options.protocol,
            backend,
        })
    }

    /// Protocol this engine was created for.
    pub fn protocol(&self) -> CouncilProtocol {
        self.protocol
    }

    pub fn node_id(&self) -> &str {
        self.backend.engine().node_id()
    }

    pub fn events(&self) -> &EventBus {
        self.backend.engine().events()
    }

    /// Subscribe to every event of the wrapped engine and the facade.
    pub fn subscribe(&self) -> broadcast::Receiver<CouncilEvent> {
        self.events().subscribe()
    }

    pub async fn initialize(&self, config: Option<CouncilConfig>) -> Result<()> {
        self.backend.engine().initialize(config).await?;
        info!(protocol = %self.protocol, node = self.node_id(), "council initialized");
        self.events().emit(CouncilEvent::CouncilInitialized {
            protocol: self.protocol.as_str().to_string(),
        });
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.backend.engine().shutdown().await?;
        info!(protocol = %self.protocol, node = self.node_id(), "council shut down");
        self.events().emit(CouncilEvent::CouncilShutdown {
            protocol: self.protocol.as_str().to_string(),
        });
        Ok(())
    }

    pub fn add_node(&self, node_id: &str, profile: Option<NodeProfile>) {
        self.backend.engine().add_node(node_id, profile)
    }

    pub fn remove_node(&self, node_id: &str) {
        self.backend.engine().remove_node(node_id)
    }

    pub async fn propose(&self, value: Option<serde_json::Value>) -> Result<Petition> {
        self.backend.engine().propose(value).await
    }

    pub async fn vote(&self, petition_id: &str, vote: Vote) -> Result<()> {
        self.backend.engine().vote(petition_id, vote).await
    }

    pub async fn await_consensus(&self, petition_id: &str) -> Result<CouncilResult> {
        self.backend.engine().await_consensus(petition_id).await
    }

    pub fn petition(&self, petition_id: &str) -> Option<Petition> {
        self.backend.engine().petition(petition_id)
    }

    pub fn as_gate_quorum(&self) -> Option<&GateQuorumConsensus> {
        match &self.backend {
            Backend::GateQuorum(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_raft(&self) -> Option<&RaftConsensus> {
        match &self.backend {
            Backend::Raft(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_gossip(&self) -> Option<&GossipConsensus> {
        match &self.backend {
            Backend::Gossip(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_byzantine(&self) -> Option<&ByzantineConsensus> {
        match &self.backend {
            Backend::Byzantine(e) => Some(e),
            _ => None,
        }
    }
}
