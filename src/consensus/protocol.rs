//! Protocol names, domain hints and the common engine interface.

use crate::consensus::events::EventBus;
use crate::consensus::petition::{CouncilConfig, CouncilResult, NodeProfile, Petition, Vote};
use crate::core::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Agreement protocol served by a council engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CouncilProtocol {
    /// Frequency-weighted single-round quorum
    #[serde(rename = "gate-quorum")]
    GateQuorum,
    /// Leader election and majority replication
    #[serde(rename = "council-vote")]
    Raft,
    /// Paxos lineage, served by the Raft engine
    #[serde(rename = "ancient-accord")]
    Paxos,
    /// Epidemic propagation with convergence
    #[serde(rename = "whisper")]
    Gossip,
    /// Single-primary three-phase agreement
    #[serde(rename = "shinkamis-decree")]
    Byzantine,
}

impl CouncilProtocol {
    /// Canonical protocol name.
    pub fn as_str(&self) -> &'static str {
        match self {
            CouncilProtocol::GateQuorum => "gate-quorum",
            CouncilProtocol::Raft => "council-vote",
            CouncilProtocol::Paxos => "ancient-accord",
            CouncilProtocol::Gossip => "whisper",
            CouncilProtocol::Byzantine => "shinkamis-decree",
        }
    }
}

impl std::fmt::Display for CouncilProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CouncilProtocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gate-quorum" | "gate_quorum" | "quorum" => Ok(CouncilProtocol::GateQuorum),
            "council-vote" | "raft" => Ok(CouncilProtocol::Raft),
            "ancient-accord" | "paxos" => Ok(CouncilProtocol::Paxos),
            "whisper" | "gossip" => Ok(CouncilProtocol::Gossip),
            "shinkamis-decree" | "byzantine" | "pbft" => Ok(CouncilProtocol::Byzantine),
            other => Err(Error::UnknownProtocol(other.to_string())),
        }
    }
}

/// Domain hint used to pick a protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Element {
    Earth,
    Fire,
    Water,
    Wind,
    Void,
    Spirit,
}

impl FromStr for Element {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earth" => Ok(Element::Earth),
            "fire" => Ok(Element::Fire),
            "water" => Ok(Element::Water),
            "wind" => Ok(Element::Wind),
            "void" => Ok(Element::Void),
            "spirit" => Ok(Element::Spirit),
            other => Err(Error::UnknownElement(other.to_string())),
        }
    }
}

/// Map a domain hint to a protocol.
///
/// earth → Raft (stable leadership), fire/void → Byzantine (hostile or unknown
/// participants), water → Gossip (fluid propagation), wind/spirit or no hint →
/// weighted quorum.
pub fn select_council_protocol(hint: Option<Element>) -> CouncilProtocol {
    match hint {
        Some(Element::Earth) => CouncilProtocol::Raft,
        Some(Element::Fire) | Some(Element::Void) => CouncilProtocol::Byzantine,
        Some(Element::Water) => CouncilProtocol::Gossip,
        Some(Element::Wind) | Some(Element::Spirit) | None => CouncilProtocol::GateQuorum,
    }
}

/// Common surface of every agreement engine.
#[async_trait]
pub trait ConsensusProtocol: Send + Sync {
    /// Protocol implemented by this engine.
    fn protocol(&self) -> CouncilProtocol;

    /// Local participant id.
    fn node_id(&self) -> &str;

    /// Event bus the engine publishes on.
    fn events(&self) -> &EventBus;

    /// Start timers and accept proposals.
    async fn initialize(&self, config: Option<CouncilConfig>) -> Result<()>;

    /// Cancel timers and drop petitions. Safe to call repeatedly.
    async fn shutdown(&self) -> Result<()>;

    /// Register a participant.
    fn add_node(&self, node_id: &str, profile: Option<NodeProfile>);

    /// Remove a participant. Unknown ids are ignored.
    fn remove_node(&self, node_id: &str);

    /// Submit a value for agreement.
    async fn propose(&self, value: Option<serde_json::Value>) -> Result<Petition>;

    /// Cast or overwrite a vote.
    async fn vote(&self, petition_id: &str, vote: Vote) -> Result<()>;

    /// Wait for the terminal result of a petition.
    async fn await_consensus(&self, petition_id: &str) -> Result<CouncilResult>;

    /// Snapshot of a petition.
    fn petition(&self, petition_id: &str) -> Option<Petition>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_protocol_by_element() {
        assert_eq!(select_council_protocol(None), CouncilProtocol::GateQuorum);
        assert_eq!(select_council_protocol(Some(Element::Earth)), CouncilProtocol::Raft);
        assert_eq!(select_council_protocol(Some(Element::Fire)), CouncilProtocol::Byzantine);
        assert_eq!(select_council_protocol(Some(Element::Water)), CouncilProtocol::Gossip);
        assert_eq!(select_council_protocol(Some(Element::Wind)), CouncilProtocol::GateQuorum);
        assert_eq!(select_council_protocol(Some(Element::Void)), CouncilProtocol::Byzantine);
        assert_eq!(select_council_protocol(Some(Element::Spirit)), CouncilProtocol::GateQuorum);
    }

    #[test]
    fn test_protocol_names_round_trip() {
        for protocol in [
            CouncilProtocol::GateQuorum,
            CouncilProtocol::Raft,
            CouncilProtocol::Paxos,
            CouncilProtocol::Gossip,
            CouncilProtocol::Byzantine,
        ] {
            assert_eq!(protocol.as_str().parse::<CouncilProtocol>().unwrap(), protocol);
        }
        assert_eq!("raft".parse::<CouncilProtocol>().unwrap(), CouncilProtocol::Raft);
        assert!("smoke-signals".parse::<CouncilProtocol>().is_err());
    }

    #[test]
    fn test_element_parse() {
        assert_eq!(" Water ".parse::<Element>().unwrap(), Element::Water);
        assert!(matches!("aether".parse::<Element>(), Err(Error::UnknownElement(_))));
    }

    #[test]
    fn test_protocol_serde_names() {
        let json = serde_json::to_string(&CouncilProtocol::Byzantine).unwrap();
        assert_eq!(json, "\"shinkamis-decree\"");
        let parsed: CouncilProtocol = serde_json::from_str("\"whisper\"").unwrap();
        assert_eq!(parsed, CouncilProtocol::Gossip);
    }
}
