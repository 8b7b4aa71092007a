//! Petition, vote and result shapes shared by every protocol.

use crate::core::{now, Timestamp, DEFAULT_CONSENSUS_THRESHOLD, DEFAULT_CONSENSUS_TIMEOUT_MS};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle of a petition. Moves from `Pending` to one terminal state once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PetitionStatus {
    /// Awaiting votes
    Pending,
    /// Agreement reached in favour
    Accepted,
    /// Agreement reached against
    Rejected,
    /// Bounded wait elapsed without agreement
    Expired,
}

impl PetitionStatus {
    /// Whether this status is final.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PetitionStatus::Pending)
    }
}

impl std::fmt::Display for PetitionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PetitionStatus::Pending => write!(f, "pending"),
            PetitionStatus::Accepted => write!(f, "accepted"),
            PetitionStatus::Rejected => write!(f, "rejected"),
            PetitionStatus::Expired => write!(f, "expired"),
        }
    }
}

/// A single vote (seal) from a participant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    /// Voting participant
    pub voter_id: String,
    /// Approve or reject
    pub approve: bool,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Vote timestamp
    pub timestamp: Timestamp,
    /// Optional justification
    pub reason: Option<String>,
}

impl Vote {
    /// Create a vote with full confidence.
    pub fn new(voter_id: &str, approve: bool) -> Self {
        Self {
            voter_id: voter_id.to_string(),
            approve,
            confidence: 1.0,
            timestamp: now(),
            reason: None,
        }
    }

    /// Shorthand for an approving vote.
    pub fn approve(voter_id: &str) -> Self {
        Self::new(voter_id, true)
    }

    /// Shorthand for a rejecting vote.
    pub fn reject(voter_id: &str) -> Self {
        Self::new(voter_id, false)
    }

    /// Set confidence, clamped into [0, 1].
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        self
    }

    /// Add justification.
    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }
}

/// The unit of agreement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Petition {
    /// Protocol-prefixed unique id
    pub id: String,
    /// Participant that submitted the petition
    pub petitioner_id: String,
    /// Opaque caller payload
    pub value: Option<serde_json::Value>,
    /// Current status
    pub status: PetitionStatus,
    /// Raft term, PBFT sequence number, or 1 for single-round protocols
    pub term: u64,
    /// Creation time
    pub timestamp: Timestamp,
    /// Latest vote per participant
    pub votes: HashMap<String, Vote>,
}

impl Petition {
    /// Create a pending petition with no votes.
    pub fn new(id: String, petitioner_id: &str, value: Option<serde_json::Value>, term: u64) -> Self {
        Self {
            id,
            petitioner_id: petitioner_id.to_string(),
            value,
            status: PetitionStatus::Pending,
            term,
            timestamp: now(),
            votes: HashMap::new(),
        }
    }

    /// Number of approving votes.
    pub fn approvals(&self) -> usize {
        self.votes.values().filter(|v| v.approve).count()
    }

    /// Number of rejecting votes.
    pub fn rejections(&self) -> usize {
        self.votes.len() - self.approvals()
    }
}

/// Terminal outcome of a petition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CouncilResult {
    /// Petition this result belongs to
    pub petition_id: String,
    /// Whether the petition was accepted
    pub approved: bool,
    /// Approving share of the counted votes
    pub approval_rate: f64,
    /// Share of known participants that voted
    pub participation_rate: f64,
    /// Payload of the petition
    pub final_value: Option<serde_json::Value>,
    /// Time from proposal to resolution
    pub duration_ms: u64,
    /// Protocol rounds used, when meaningful
    pub rounds: Option<u32>,
}

/// Optional attributes of a participant.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeProfile {
    /// Weight basis for weighted protocols (positive)
    pub weight_basis: Option<f64>,
    /// Category used for affinity bonuses
    pub affinity: Option<String>,
}

impl NodeProfile {
    /// Profile with a weight basis.
    pub fn weighted(weight_basis: f64) -> Self {
        Self {
            weight_basis: Some(weight_basis),
            affinity: None,
        }
    }

    /// Set the affinity tag.
    pub fn with_affinity(mut self, affinity: &str) -> Self {
        self.affinity = Some(affinity.to_string());
        self
    }
}

/// Runtime overrides applied at `initialize`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CouncilConfig {
    /// Approval threshold
    pub threshold: f64,
    /// Bounded wait for pending petitions
    pub timeout_ms: u64,
}

impl Default for CouncilConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_CONSENSUS_THRESHOLD,
            timeout_ms: DEFAULT_CONSENSUS_TIMEOUT_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminal() {
        assert!(!PetitionStatus::Pending.is_terminal());
        assert!(PetitionStatus::Accepted.is_terminal());
        assert!(PetitionStatus::Rejected.is_terminal());
        assert!(PetitionStatus::Expired.is_terminal());
        assert_eq!(PetitionStatus::Expired.to_string(), "expired");
    }

    #[test]
    fn test_confidence_clamped() {
        assert_eq!(Vote::approve("a").with_confidence(1.7).confidence, 1.0);
        assert_eq!(Vote::approve("a").with_confidence(-0.2).confidence, 0.0);
        assert_eq!(Vote::approve("a").with_confidence(f64::NAN).confidence, 0.0);
        assert_eq!(Vote::reject("a").with_confidence(0.4).confidence, 0.4);
    }

    #[test]
    fn test_votes_last_write_wins() {
        let mut petition = Petition::new("gq_x".to_string(), "n", None, 1);
        petition.votes.insert("a".to_string(), Vote::approve("a"));
        petition.votes.insert("a".to_string(), Vote::reject("a"));
        assert_eq!(petition.votes.len(), 1);
        assert_eq!(petition.approvals(), 0);
        assert_eq!(petition.rejections(), 1);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&PetitionStatus::Accepted).unwrap();
        assert_eq!(json, "\"accepted\"");
    }
}
