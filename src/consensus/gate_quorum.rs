//! Frequency-weighted quorum voting.
//!
//! Single round: once `quorum_size` distinct participants have voted the
//! petition resolves from the weighted approval ratio. A participant's weight
//! is its weight basis over the configured baseline, so the baseline
//! participant counts 1.0x, with a bonus for a matching affinity tag. The
//! participant holding the unique highest basis may veto.

use crate::consensus::ballot::{ratio, wait_for_result, Ballot, PetitionTable};
use crate::consensus::events::{CouncilEvent, EventBus};
use crate::consensus::petition::{
    CouncilConfig, CouncilResult, NodeProfile, Petition, PetitionStatus, Vote,
};
use crate::consensus::protocol::{ConsensusProtocol, CouncilProtocol};
use crate::consensus::timers::TimerSet;
use crate::core::{unique_id, Error, Result, DEFAULT_CONSENSUS_TIMEOUT_MS, DEFAULT_MAX_TASKS};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Weight basis of the lowest-weighted canonical participant.
pub const BASELINE_WEIGHT_BASIS: f64 = 174.0;
/// Multiplier for voters whose affinity matches the configured one.
pub const AFFINITY_BONUS: f64 = 1.25;

/// GateQuorum configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateQuorumConfig {
    /// Distinct votes needed to resolve
    pub quorum_size: usize,
    /// Weight votes by participant weight basis
    pub weight_by_frequency: bool,
    /// Weighted approval fraction needed to accept
    pub approval_threshold: f64,
    /// Wait before an unresolved petition is rejected
    pub vote_timeout_ms: u64,
    /// Let the highest-weight participant veto
    pub shinkam_override: bool,
    /// Affinity tag that earns the bonus
    pub element_affinity: Option<String>,
    /// Basis that maps to weight 1.0
    pub baseline_weight_basis: f64,
    /// Affinity bonus multiplier
    pub affinity_bonus: f64,
    /// Maximum concurrently pending petitions
    pub max_pending: usize,
}

impl Default for GateQuorumConfig {
    fn default() -> Self {
        Self {
            quorum_size: 5,
            weight_by_frequency: true,
            approval_threshold: 0.6,
            vote_timeout_ms: DEFAULT_CONSENSUS_TIMEOUT_MS,
            shinkam_override: true,
            element_affinity: None,
            baseline_weight_basis: BASELINE_WEIGHT_BASIS,
            affinity_bonus: AFFINITY_BONUS,
            max_pending: DEFAULT_MAX_TASKS,
        }
    }
}

/// Weighted tally of a petition's votes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QuorumTally {
    pub approve_weight: f64,
    pub reject_weight: f64,
    /// Designated veto holder voted to reject
    pub vetoed: bool,
}

impl QuorumTally {
    pub fn total_weight(&self) -> f64 {
        self.approve_weight + self.reject_weight
    }

    pub fn approval_ratio(&self) -> f64 {
        ratio(self.approve_weight, self.total_weight())
    }
}

struct GateState {
    config: GateQuorumConfig,
    initialized: bool,
    nodes: HashMap<String, NodeProfile>,
    petitions: PetitionTable,
}

impl GateState {
    fn basis_of(&self, node_id: &str) -> f64 {
        self.nodes
            .get(node_id)
            .and_then(|p| p.weight_basis)
            .unwrap_or(self.config.baseline_weight_basis)
    }

    fn weight_of(&self, node_id: &str) -> f64 {
        if !self.config.weight_by_frequency {
            return 1.0;
        }
        let mut weight = ratio(self.basis_of(node_id), self.config.baseline_weight_basis);
        let affinity = self.nodes.get(node_id).and_then(|p| p.affinity.as_deref());
        if let (Some(wanted), Some(actual)) = (self.config.element_affinity.as_deref(), affinity) {
            if wanted == actual {
                weight *= self.config.affinity_bonus;
            }
        }
        weight
    }

    /// Participant with the unique highest weight basis.
    fn veto_holder(&self) -> Option<&str> {
        let mut best: Option<(&str, f64)> = None;
        let mut tied = false;
        for id in self.nodes.keys() {
            let basis = self.basis_of(id);
            match best {
                Some((_, top)) if basis < top => {}
                Some((_, top)) if basis == top => tied = true,
                _ => {
                    best = Some((id.as_str(), basis));
                    tied = false;
                }
            }
        }
        if tied {
            None
        } else {
            best.map(|(id, _)| id)
        }
    }

    fn tally(&self, petition: &Petition) -> QuorumTally {
        let holder = if self.config.shinkam_override {
            self.veto_holder()
        } else {
            None
        };

        let mut tally = QuorumTally::default();
        for (voter, vote) in &petition.votes {
            let weight = self.weight_of(voter);
            if vote.approve {
                tally.approve_weight += weight;
            } else {
                tally.reject_weight += weight;
                if holder == Some(voter.as_str()) {
                    tally.vetoed = true;
                }
            }
        }
        tally
    }

    fn participation(&self, ballot: &Ballot) -> f64 {
        ratio(
            ballot.petition().votes.len() as f64,
            self.nodes.len().max(1) as f64,
        )
    }
}

struct Shared {
    node_id: String,
    events: EventBus,
    timers: TimerSet,
    state: Mutex<GateState>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reject a petition still pending when its vote window closes.
    fn expire(&self, petition_id: &str) {
        let expired = {
            let mut state = self.state();
            let (tally, participation) = match state.petitions.get(petition_id) {
                Some(ballot) if ballot.is_pending() => {
                    (state.tally(ballot.petition()), state.participation(ballot))
                }
                _ => return,
            };
            state.petitions.get_mut(petition_id).map_or(false, |ballot| {
                let outcome = ballot.outcome(false, tally.approval_ratio(), participation, Some(1));
                ballot.resolve(PetitionStatus::Rejected, outcome)
            })
        };

        if expired {
            info!(petition = petition_id, "gate quorum not reached before timeout");
            self.events.emit(CouncilEvent::ConsensusExpired {
                petition_id: petition_id.to_string(),
            });
        }
    }
}

/// Frequency-weighted quorum engine.
///
/// ```
/// use council::consensus::{GateQuorumConfig, GateQuorumConsensus, NodeProfile, Vote};
/// # tokio_test::block_on(async {
/// let gq = GateQuorumConsensus::new(
///     "seer",
///     GateQuorumConfig { quorum_size: 2, shinkam_override: false, ..Default::default() },
/// );
/// gq.initialize(None).await.unwrap();
/// gq.add_node("heavy", Some(NodeProfile::weighted(1111.0)));
/// gq.add_node("light", Some(NodeProfile::weighted(174.0)));
///
/// let petition = gq.propose(None).await.unwrap();
/// gq.vote(&petition.id, Vote::approve("heavy")).await.unwrap();
/// gq.vote(&petition.id, Vote::reject("light")).await.unwrap();
/// assert!(gq.await_consensus(&petition.id).await.unwrap().approved);
/// # gq.shutdown().await.unwrap();
/// # });
/// ```
#[derive(Clone)]
pub struct GateQuorumConsensus {
    inner: Arc<Shared>,
}

impl GateQuorumConsensus {
    /// Create a new engine for the local node.
    pub fn new(node_id: &str, config: GateQuorumConfig) -> Self {
        let petitions = PetitionTable::new(config.max_pending);
        Self {
            inner: Arc::new(Shared {
                node_id: node_id.to_string(),
                events: EventBus::new(),
                timers: TimerSet::new(),
                state: Mutex::new(GateState {
                    config,
                    initialized: false,
                    nodes: HashMap::new(),
                    petitions,
                }),
            }),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults(node_id: &str) -> Self {
        Self::new(node_id, GateQuorumConfig::default())
    }

    /// Mark the engine ready, optionally overriding threshold and timeout.
    pub async fn initialize(&self, config: Option<CouncilConfig>) -> Result<()> {
        {
            let mut state = self.inner.state();
            if let Some(overrides) = config {
                state.config.approval_threshold = overrides.threshold;
                state.config.vote_timeout_ms = overrides.timeout_ms;
            }
            state.initialized = true;
        }
        info!(node = %self.inner.node_id, "gate quorum initialized");
        self.inner.events.emit(CouncilEvent::Initialized {
            node_id: self.inner.node_id.clone(),
            protocol: CouncilProtocol::GateQuorum.as_str().to_string(),
        });
        Ok(())
    }

    /// Cancel timers and drop all petitions.
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.timers.cancel_all();
        {
            let mut state = self.inner.state();
            state.petitions.clear();
            state.initialized = false;
        }
        self.inner.events.emit(CouncilEvent::Shutdown {
            node_id: self.inner.node_id.clone(),
            protocol: CouncilProtocol::GateQuorum.as_str().to_string(),
        });
        Ok(())
    }

    /// Register a participant. A missing or non-positive basis falls back to
    /// the baseline.
    pub fn add_node(&self, node_id: &str, profile: Option<NodeProfile>) {
        let mut profile = profile.unwrap_or_default();
        if let Some(basis) = profile.weight_basis {
            if !basis.is_finite() || basis <= 0.0 {
                warn!(node = node_id, basis, "ignoring invalid weight basis");
                profile.weight_basis = None;
            }
        }
        self.inner.state().nodes.insert(node_id.to_string(), profile);
    }

    /// Remove a participant; unknown ids are ignored.
    pub fn remove_node(&self, node_id: &str) {
        self.inner.state().nodes.remove(node_id);
    }

    /// Number of registered participants.
    pub fn node_count(&self) -> usize {
        self.inner.state().nodes.len()
    }

    /// Effective vote weight of a participant.
    pub fn weight_of(&self, node_id: &str) -> f64 {
        self.inner.state().weight_of(node_id)
    }

    /// Current veto holder, if the override is enabled and one exists.
    pub fn veto_holder(&self) -> Option<String> {
        let state = self.inner.state();
        if !state.config.shinkam_override {
            return None;
        }
        state.veto_holder().map(str::to_string)
    }

    /// Submit a petition.
    pub async fn propose(&self, value: Option<serde_json::Value>) -> Result<Petition> {
        let (petition, quorum_size, timeout) = {
            let mut state = self.inner.state();
            if !state.initialized {
                return Err(Error::NotInitialized(self.inner.node_id.clone()));
            }
            let petition = Petition::new(unique_id("gq"), &self.inner.node_id, value, 1);
            state.petitions.open(petition.clone())?;
            (
                petition,
                state.config.quorum_size,
                Duration::from_millis(state.config.vote_timeout_ms),
            )
        };

        let weak: Weak<Shared> = Arc::downgrade(&self.inner);
        let id = petition.id.clone();
        self.inner.timers.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = weak.upgrade() {
                shared.expire(&id);
            }
        });

        debug!(petition = %petition.id, quorum_size, "petition submitted");
        self.inner.events.emit(CouncilEvent::ConsensusProposed {
            petition_id: petition.id.clone(),
            protocol: CouncilProtocol::GateQuorum.as_str().to_string(),
            term: petition.term,
        });
        Ok(petition)
    }

    /// Cast a vote. Unknown petitions are ignored; resolved petitions keep
    /// the vote for audit only.
    pub async fn vote(&self, petition_id: &str, vote: Vote) -> Result<()> {
        if let Some(event) = self.record_vote(petition_id, vote) {
            self.inner.events.emit(event);
        }
        Ok(())
    }

    fn record_vote(&self, petition_id: &str, vote: Vote) -> Option<CouncilEvent> {
        let mut state = self.inner.state();
        let quorum_size = state.config.quorum_size;
        let threshold = state.config.approval_threshold;

        let ballot = match state.petitions.get_mut(petition_id) {
            Some(ballot) => ballot,
            None => {
                debug!(petition = petition_id, "vote for unknown petition ignored");
                return None;
            }
        };
        let was_pending = ballot.is_pending();
        debug!(petition = petition_id, voter = %vote.voter_id, approve = vote.approve, "vote received");
        ballot.record(vote);
        if !was_pending || ballot.petition().votes.len() < quorum_size {
            return None;
        }

        let ballot = state.petitions.get(petition_id)?;
        let tally = state.tally(ballot.petition());
        let participation = state.participation(ballot);
        let approval_rate = tally.approval_ratio();
        let approved = !tally.vetoed && approval_rate >= threshold;
        let status = if approved {
            PetitionStatus::Accepted
        } else {
            PetitionStatus::Rejected
        };

        let ballot = state.petitions.get_mut(petition_id)?;
        let outcome = ballot.outcome(approved, approval_rate, participation, Some(1));
        if !ballot.resolve(status, outcome) {
            return None;
        }
        info!(petition = petition_id, approved, approval_rate, vetoed = tally.vetoed, "gate quorum resolved");
        Some(CouncilEvent::ConsensusAchieved {
            petition_id: petition_id.to_string(),
            approved,
            approval_rate,
            veto: tally.vetoed,
        })
    }

    /// Wait for a petition's terminal result.
    pub async fn await_consensus(&self, petition_id: &str) -> Result<CouncilResult> {
        let rx = self.inner.state().petitions.watch(petition_id)?;
        wait_for_result(petition_id, rx).await
    }

    /// Snapshot of a petition.
    pub fn petition(&self, petition_id: &str) -> Option<Petition> {
        self.inner
            .state()
            .petitions
            .get(petition_id)
            .map(|b| b.petition().clone())
    }

    /// Weighted tally of a petition's current votes.
    pub fn tally(&self, petition_id: &str) -> Option<QuorumTally> {
        let state = self.inner.state();
        let ballot = state.petitions.get(petition_id)?;
        Some(state.tally(ballot.petition()))
    }

    /// Current configuration.
    pub fn config(&self) -> GateQuorumConfig {
        self.inner.state().config.clone()
    }

    /// Event bus of this engine.
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }
}

#[async_trait]
impl ConsensusProtocol for GateQuorumConsensus {
    fn protocol(&self) -> CouncilProtocol {
        CouncilProtocol::GateQuorum
    }

    fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    fn events(&self) -> &EventBus {
        &self.inner.events
    }

    async fn initialize(&self, config: Option<CouncilConfig>) -> Result<()> {
        GateQuorumConsensus::initialize(self, config).await
    }

    async fn shutdown(&self) -> Result<()> {
        GateQuorumConsensus::shutdown(self).await
    }

    fn add_node(&self, node_id: &str, profile: Option<NodeProfile>) {
        GateQuorumConsensus::add_node(self, node_id, profile)
    }

    fn remove_node(&self, node_id: &str) {
        GateQuorumConsensus::remove_node(self, node_id)
    }

    async fn propose(&self, value: Option<serde_json::Value>) -> Result<Petition> {
        GateQuorumConsensus::propose(self, value).await
    }

    async fn vote(&self, petition_id: &str, vote: Vote) -> Result<()> {
        GateQuorumConsensus::vote(self, petition_id, vote).await
    }

    async fn await_consensus(&self, petition_id: &str) -> Result<CouncilResult> {
        GateQuorumConsensus::await_consensus(self, petition_id).await
    }

    fn petition(&self, petition_id: &str) -> Option<Petition> {
        GateQuorumConsensus::petition(self, petition_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::events::drain;
    use serde_json::json;
    use std::collections::HashSet;

    fn config(quorum_size: usize, weighted: bool, veto: bool) -> GateQuorumConfig {
        GateQuorumConfig {
            quorum_size,
            weight_by_frequency: weighted,
            approval_threshold: 0.6,
            vote_timeout_ms: 5_000,
            shinkam_override: veto,
            ..Default::default()
        }
    }

    async fn engine(cfg: GateQuorumConfig) -> GateQuorumConsensus {
        let gq = GateQuorumConsensus::new("test-node", cfg);
        gq.initialize(None).await.unwrap();
        gq
    }

    #[tokio::test]
    async fn test_propose_requires_initialize() {
        let gq = GateQuorumConsensus::with_defaults("cold");
        let err = gq.propose(None).await.unwrap_err();
        assert!(matches!(err, Error::NotInitialized(_)));
    }

    #[tokio::test]
    async fn test_propose_shape() {
        let gq = engine(config(3, true, true)).await;
        let petition = gq.propose(Some(json!({"action": "deploy-v2"}))).await.unwrap();

        assert!(petition.id.starts_with("gq_"));
        assert_eq!(petition.petitioner_id, "test-node");
        assert_eq!(petition.value, Some(json!({"action": "deploy-v2"})));
        assert_eq!(petition.status, PetitionStatus::Pending);
        assert_eq!(petition.term, 1);
        assert!(petition.votes.is_empty());
        gq.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_equal_weights_reject_majority() {
        let gq = engine(config(3, false, false)).await;
        for id in ["a", "b", "c"] {
            gq.add_node(id, None);
        }
        let petition = gq.propose(None).await.unwrap();
        gq.vote(&petition.id, Vote::approve("a")).await.unwrap();
        gq.vote(&petition.id, Vote::reject("b")).await.unwrap();
        gq.vote(&petition.id, Vote::reject("c")).await.unwrap();

        let result = gq.await_consensus(&petition.id).await.unwrap();
        assert!(!result.approved);
        assert!((result.approval_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(result.rounds, Some(1));
    }

    #[tokio::test]
    async fn test_equal_weights_approve_majority() {
        let gq = engine(config(3, false, false)).await;
        let petition = gq.propose(None).await.unwrap();
        gq.vote(&petition.id, Vote::approve("a")).await.unwrap();
        gq.vote(&petition.id, Vote::approve("b")).await.unwrap();
        gq.vote(&petition.id, Vote::reject("c")).await.unwrap();

        let result = gq.await_consensus(&petition.id).await.unwrap();
        assert!(result.approved);
    }

    #[tokio::test]
    async fn test_heavy_voter_outweighs_light() {
        let gq = engine(GateQuorumConfig {
            approval_threshold: 0.5,
            ..config(2, true, false)
        })
        .await;
        gq.add_node("light", Some(NodeProfile::weighted(174.0)));
        gq.add_node("heavy", Some(NodeProfile::weighted(1111.0)));
        assert!((gq.weight_of("heavy") - 6.385).abs() < 0.01);

        let petition = gq.propose(None).await.unwrap();
        gq.vote(&petition.id, Vote::reject("light")).await.unwrap();
        gq.vote(&petition.id, Vote::approve("heavy")).await.unwrap();

        let result = gq.await_consensus(&petition.id).await.unwrap();
        assert!(result.approved);
        assert!((result.approval_rate - 1111.0 / 1285.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_veto_holder_rejects() {
        // Without the veto, 0.34 weighted approval would clear this threshold.
        let gq = engine(GateQuorumConfig {
            approval_threshold: 0.3,
            ..config(3, true, true)
        })
        .await;
        gq.add_node("low", Some(NodeProfile::weighted(174.0)));
        gq.add_node("mid", Some(NodeProfile::weighted(396.0)));
        gq.add_node("top", Some(NodeProfile::weighted(1111.0)));
        assert_eq!(gq.veto_holder().as_deref(), Some("top"));

        let mut events = gq.events().subscribe();
        let petition = gq.propose(None).await.unwrap();
        gq.vote(&petition.id, Vote::approve("low")).await.unwrap();
        gq.vote(&petition.id, Vote::approve("mid")).await.unwrap();
        gq.vote(&petition.id, Vote::reject("top")).await.unwrap();

        let result = gq.await_consensus(&petition.id).await.unwrap();
        assert!(!result.approved);
        assert!(drain(&mut events)
            .iter()
            .any(|e| matches!(e, CouncilEvent::ConsensusAchieved { veto: true, .. })));
    }

    #[test]
    fn test_no_veto_holder_on_tie() {
        let gq = GateQuorumConsensus::with_defaults("n");
        gq.add_node("a", None);
        gq.add_node("b", None);
        assert_eq!(gq.veto_holder(), None);
    }

    #[tokio::test]
    async fn test_affinity_bonus_applies() {
        let gq = engine(GateQuorumConfig {
            element_affinity: Some("water".to_string()),
            ..config(2, true, false)
        })
        .await;
        gq.add_node("tide", Some(NodeProfile::weighted(285.0).with_affinity("water")));
        gq.add_node("ember", Some(NodeProfile::weighted(285.0).with_affinity("fire")));

        let tide = gq.weight_of("tide");
        let ember = gq.weight_of("ember");
        assert!((tide / ember - 1.25).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unknown_petition_vote_is_noop() {
        let gq = engine(config(3, true, true)).await;
        gq.vote("nonexistent-id", Vote::approve("x")).await.unwrap();
        assert!(gq.petition("nonexistent-id").is_none());
    }

    #[tokio::test]
    async fn test_await_unknown_is_not_found() {
        let gq = engine(config(3, true, true)).await;
        let err = gq.await_consensus("nonexistent-id").await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_rejects() {
        let gq = engine(GateQuorumConfig {
            vote_timeout_ms: 500,
            ..config(5, true, false)
        })
        .await;
        gq.add_node("only-voter", None);
        let petition = gq.propose(None).await.unwrap();
        gq.vote(&petition.id, Vote::approve("only-voter")).await.unwrap();

        let result = gq.await_consensus(&petition.id).await.unwrap();
        assert!(!result.approved);
        assert!(result.duration_ms >= 500);
        assert_eq!(gq.petition(&petition.id).unwrap().status, PetitionStatus::Rejected);
    }

    #[tokio::test]
    async fn test_duplicate_votes_overwrite() {
        let gq = engine(config(2, true, false)).await;
        let petition = gq.propose(None).await.unwrap();
        gq.vote(&petition.id, Vote::approve("a")).await.unwrap();
        gq.vote(&petition.id, Vote::reject("a").with_confidence(0.5)).await.unwrap();

        let snapshot = gq.petition(&petition.id).unwrap();
        assert_eq!(snapshot.votes.len(), 1);
        assert!(!snapshot.votes["a"].approve);
        assert_eq!(snapshot.status, PetitionStatus::Pending);
    }

    #[tokio::test]
    async fn test_late_vote_does_not_change_result() {
        let gq = engine(config(1, true, false)).await;
        gq.add_node("a", None);
        gq.add_node("b", None);
        let petition = gq.propose(None).await.unwrap();
        gq.vote(&petition.id, Vote::approve("a")).await.unwrap();
        let first = gq.await_consensus(&petition.id).await.unwrap();

        gq.vote(&petition.id, Vote::reject("b")).await.unwrap();
        let second = gq.await_consensus(&petition.id).await.unwrap();
        assert_eq!(first, second);
        assert!(second.approved);
        assert_eq!(gq.petition(&petition.id).unwrap().votes.len(), 2);
    }

    #[tokio::test]
    async fn test_unique_ids() {
        let gq = engine(config(10, true, true)).await;
        let mut ids = HashSet::new();
        for i in 0..20 {
            let p = gq.propose(Some(json!({ "index": i }))).await.unwrap();
            assert!(ids.insert(p.id));
        }
        assert_eq!(ids.len(), 20);
        gq.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_before_initialize_and_twice() {
        let gq = GateQuorumConsensus::with_defaults("shutdown-first");
        gq.shutdown().await.unwrap();
        gq.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_initialize_overrides() {
        let gq = GateQuorumConsensus::with_defaults("n");
        gq.initialize(Some(CouncilConfig {
            threshold: 0.75,
            timeout_ms: 1_000,
        }))
        .await
        .unwrap();
        let cfg = gq.config();
        assert_eq!(cfg.approval_threshold, 0.75);
        assert_eq!(cfg.vote_timeout_ms, 1_000);
    }

    #[tokio::test]
    async fn test_invalid_basis_falls_back() {
        let gq = engine(config(1, true, false)).await;
        gq.add_node("bad", Some(NodeProfile::weighted(-3.0)));
        assert_eq!(gq.weight_of("bad"), 1.0);
    }
}
