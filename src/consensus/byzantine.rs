//! PBFT-style agreement under Byzantine participants.
//!
//! One primary per view (`nodes[view % n]`) orders proposals with a sequence
//! number and a SHA3-256 digest. Votes walk a petition through the prepare and
//! commit phases; `2f + 1` approvals commit it. A petition that outlives the
//! view-change timeout expires and moves the engine to the next view.

use crate::consensus::ballot::{ratio, wait_for_result, PetitionTable};
use crate::consensus::events::{CouncilEvent, EventBus};
use crate::consensus::petition::{
    CouncilConfig, CouncilResult, NodeProfile, Petition, PetitionStatus, Vote,
};
use crate::consensus::protocol::{ConsensusProtocol, CouncilProtocol};
use crate::consensus::timers::TimerSet;
use crate::core::{
    now, Error, Hash256, Result, Timestamp, DEFAULT_CONSENSUS_TIMEOUT_MS, DEFAULT_MAX_TASKS,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Byzantine engine configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ByzantineConfig {
    /// Unresolved petitions expire and trigger a view change after this long
    pub view_change_timeout_ms: u64,
    pub max_pending: usize,
}

impl Default for ByzantineConfig {
    fn default() -> Self {
        Self {
            view_change_timeout_ms: DEFAULT_CONSENSUS_TIMEOUT_MS,
            max_pending: DEFAULT_MAX_TASKS,
        }
    }
}

/// Phase of a petition in the three-phase protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PbftPhase {
    PrePrepare,
    Prepare,
    Commit,
    Reply,
}

/// Largest number of faulty nodes `n` participants tolerate.
pub fn max_faulty(n: usize) -> usize {
    n.saturating_sub(1) / 3
}

/// Digest binding a payload to its view and sequence number.
pub fn pbft_digest(
    view_number: u64,
    sequence_number: u64,
    payload: &Option<serde_json::Value>,
) -> Result<Hash256> {
    let mut data = Vec::with_capacity(64);
    data.extend_from_slice(&view_number.to_be_bytes());
    data.extend_from_slice(&sequence_number.to_be_bytes());
    data.extend_from_slice(&serde_json::to_vec(payload)?);
    Ok(Hash256::digest(&data))
}

/// Petition id derived from the ordering of a pre-prepare.
pub fn petition_id_for(view_number: u64, sequence_number: u64, digest: &Hash256) -> String {
    let hex = digest.to_hex();
    format!("bft_{}_{}_{}", view_number, sequence_number, &hex[..8])
}

/// Pre-prepare sent by the primary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PbftMessage {
    pub view_number: u64,
    pub sequence_number: u64,
    pub digest: Hash256,
    pub sender_id: String,
    pub timestamp: Timestamp,
    pub payload: Option<serde_json::Value>,
}

impl PbftMessage {
    /// Build a pre-prepare with its digest filled in.
    pub fn pre_prepare(
        view_number: u64,
        sequence_number: u64,
        sender_id: &str,
        payload: Option<serde_json::Value>,
    ) -> Result<Self> {
        let digest = pbft_digest(view_number, sequence_number, &payload)?;
        Ok(Self {
            view_number,
            sequence_number,
            digest,
            sender_id: sender_id.to_string(),
            timestamp: now(),
            payload,
        })
    }

    pub fn petition_id(&self) -> String {
        petition_id_for(self.view_number, self.sequence_number, &self.digest)
    }
}

struct ByzantineInner {
    config: ByzantineConfig,
    initialized: bool,
    nodes: Vec<String>,
    view: u64,
    sequence: u64,
    is_primary: bool,
    phases: HashMap<String, PbftPhase>,
    prepared: HashSet<String>,
    committed: HashSet<String>,
    petitions: PetitionTable,
}

impl ByzantineInner {
    fn quorum(&self) -> usize {
        2 * max_faulty(self.nodes.len()) + 1
    }

    fn primary_for(&self, view: u64) -> Option<&str> {
        if self.nodes.is_empty() {
            return None;
        }
        let index = (view % self.nodes.len() as u64) as usize;
        self.nodes.get(index).map(String::as_str)
    }

    fn check_resolution(&mut self, petition_id: &str) -> Option<CouncilEvent> {
        let n = self.nodes.len();
        let quorum = self.quorum();
        let ballot = self.petitions.get_mut(petition_id)?;
        if !ballot.is_pending() {
            return None;
        }

        let votes = ballot.petition().votes.len();
        let approvals = ballot.petition().approvals();
        let approval_rate = ratio(approvals as f64, n as f64);
        let participation = ratio(votes as f64, n as f64);

        let (status, approved) = if approvals >= quorum {
            (PetitionStatus::Accepted, true)
        } else if votes >= n {
            (PetitionStatus::Rejected, false)
        } else {
            if votes > 0 {
                self.phases
                    .insert(petition_id.to_string(), PbftPhase::Prepare);
            }
            return None;
        };

        let outcome = ballot.outcome(approved, approval_rate, participation, Some(3));
        if !ballot.resolve(status, outcome) {
            return None;
        }
        if approved {
            self.prepared.insert(petition_id.to_string());
            self.committed.insert(petition_id.to_string());
        }
        self.phases.insert(petition_id.to_string(), PbftPhase::Reply);
        info!(petition = petition_id, approved, approvals, quorum, "pbft petition resolved");
        Some(CouncilEvent::ConsensusAchieved {
            petition_id: petition_id.to_string(),
            approved,
            approval_rate,
            veto: false,
        })
    }

    fn view_change(&mut self) -> u64 {
        self.view += 1;
        self.is_primary = false;
        self.view
    }
}

struct Shared {
    node_id: String,
    events: EventBus,
    timers: TimerSet,
    inner: Mutex<ByzantineInner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ByzantineInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm_view_change(self: &Arc<Self>, petition_id: String, timeout: Duration) {
        let weak: Weak<Shared> = Arc::downgrade(self);
        self.timers.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = weak.upgrade() {
                shared.expire(&petition_id);
            }
        });
    }

    fn expire(&self, petition_id: &str) {
        let view = {
            let mut inner = self.lock();
            let n = inner.nodes.len() as f64;
            let expired = inner.petitions.get_mut(petition_id).map_or(false, |ballot| {
                if !ballot.is_pending() {
                    return false;
                }
                let votes = ballot.petition().votes.len() as f64;
                let approvals = ballot.petition().approvals() as f64;
                let outcome =
                    ballot.outcome(false, ratio(approvals, n), ratio(votes, n), Some(3));
                ballot.resolve(PetitionStatus::Expired, outcome)
            });
            if !expired {
                return;
            }
            inner.view_change()
        };

        warn!(petition = petition_id, view, "pbft petition timed out, changing view");
        self.events.emit(CouncilEvent::ConsensusExpired {
            petition_id: petition_id.to_string(),
        });
        self.events.emit(CouncilEvent::ViewChanged { view });
    }
}

/// Byzantine fault tolerant engine.
#[derive(Clone)]
pub struct ByzantineConsensus {
    shared: Arc<Shared>,
}

impl ByzantineConsensus {
    pub fn new(node_id: &str, config: ByzantineConfig) -> Self {
        let petitions = PetitionTable::new(config.max_pending);
        Self {
            shared: Arc::new(Shared {
                node_id: node_id.to_string(),
                events: EventBus::new(),
                timers: TimerSet::new(),
                inner: Mutex::new(ByzantineInner {
                    config,
                    initialized: false,
                    nodes: vec![node_id.to_string()],
                    view: 0,
                    sequence: 0,
                    is_primary: false,
                    phases: HashMap::new(),
                    prepared: HashSet::new(),
                    committed: HashSet::new(),
                    petitions,
                }),
            }),
        }
    }

    pub fn with_defaults(node_id: &str) -> Self {
        Self::new(node_id, ByzantineConfig::default())
    }

    /// Start accepting messages. Call [`elect_primary`](Self::elect_primary)
    /// before proposing.
    pub async fn initialize(&self, config: Option<CouncilConfig>) -> Result<()> {
        {
            let mut inner = self.shared.lock();
            if let Some(overrides) = config {
                inner.config.view_change_timeout_ms = overrides.timeout_ms;
            }
            inner.initialized = true;
        }
        info!(node = %self.shared.node_id, "byzantine node initialized");
        self.shared.events.emit(CouncilEvent::Initialized {
            node_id: self.shared.node_id.clone(),
            protocol: CouncilProtocol::Byzantine.as_str().to_string(),
        });
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.shared.timers.cancel_all();
        {
            let mut inner = self.shared.lock();
            inner.initialized = false;
            inner.is_primary = false;
            inner.phases.clear();
            inner.petitions.clear();
        }
        self.shared.events.emit(CouncilEvent::Shutdown {
            node_id: self.shared.node_id.clone(),
            protocol: CouncilProtocol::Byzantine.as_str().to_string(),
        });
        Ok(())
    }

    /// Append a participant to the ordered node list.
    pub fn add_node(&self, node_id: &str) {
        let mut inner = self.shared.lock();
        if !inner.nodes.iter().any(|n| n == node_id) {
            inner.nodes.push(node_id.to_string());
        }
    }

    /// Remove a participant. The local node is never removed.
    pub fn remove_node(&self, node_id: &str) {
        if node_id == self.shared.node_id {
            return;
        }
        self.shared.lock().nodes.retain(|n| n != node_id);
    }

    pub fn node_count(&self) -> usize {
        self.shared.lock().nodes.len()
    }

    /// floor((n - 1) / 3)
    pub fn max_faulty_nodes(&self) -> usize {
        max_faulty(self.node_count())
    }

    pub fn can_tolerate(&self, faulty: usize) -> bool {
        faulty <= self.max_faulty_nodes()
    }

    /// Pick `nodes[view % n]` as primary for the current view.
    pub fn elect_primary(&self) -> String {
        let (primary, view) = {
            let mut inner = self.shared.lock();
            let view = inner.view;
            let primary = inner
                .primary_for(view)
                .unwrap_or(self.shared.node_id.as_str())
                .to_string();
            inner.is_primary = primary == self.shared.node_id;
            (primary, view)
        };
        info!(primary = %primary, view, "primary elected");
        self.shared.events.emit(CouncilEvent::PrimaryElected {
            primary_id: primary.clone(),
            view,
        });
        primary
    }

    /// Move to the next view. Does not elect a new primary.
    pub fn initiate_view_change(&self) -> u64 {
        let view = self.shared.lock().view_change();
        info!(view, "view change initiated");
        self.shared.events.emit(CouncilEvent::ViewChanged { view });
        view
    }

    pub fn is_primary(&self) -> bool {
        self.shared.lock().is_primary
    }

    pub fn view_number(&self) -> u64 {
        self.shared.lock().view
    }

    pub fn sequence_number(&self) -> u64 {
        self.shared.lock().sequence
    }

    pub fn prepared_count(&self) -> usize {
        self.shared.lock().prepared.len()
    }

    pub fn committed_count(&self) -> usize {
        self.shared.lock().committed.len()
    }

    /// Phase a petition is in, if known.
    pub fn phase(&self, petition_id: &str) -> Option<PbftPhase> {
        self.shared.lock().phases.get(petition_id).copied()
    }

    /// Order and broadcast a proposal. Primary only.
    pub async fn propose(&self, value: Option<serde_json::Value>) -> Result<Petition> {
        let (petition, targets, timeout) = {
            let mut inner = self.shared.lock();
            if !inner.initialized {
                return Err(Error::NotInitialized(self.shared.node_id.clone()));
            }
            if !inner.is_primary {
                return Err(Error::NotPrimary {
                    node_id: self.shared.node_id.clone(),
                    view: inner.view,
                });
            }

            let sequence = inner.sequence + 1;
            let message = PbftMessage::pre_prepare(inner.view, sequence, &self.shared.node_id, value)?;
            let petition = Petition::new(
                message.petition_id(),
                &self.shared.node_id,
                message.payload.clone(),
                sequence,
            );
            inner.petitions.open(petition.clone())?;
            inner.sequence = sequence;
            inner
                .phases
                .insert(petition.id.clone(), PbftPhase::PrePrepare);

            let targets: Vec<String> = inner
                .nodes
                .iter()
                .filter(|n| **n != self.shared.node_id)
                .cloned()
                .collect();
            let timeout = Duration::from_millis(inner.config.view_change_timeout_ms);
            (petition, targets, timeout)
        };

        self.shared.arm_view_change(petition.id.clone(), timeout);
        for target in targets {
            self.shared.events.emit(CouncilEvent::MessageSent {
                to: target,
                message_id: petition.id.clone(),
                kind: "pre-prepare".to_string(),
            });
        }
        debug!(petition = %petition.id, sequence = petition.term, "pre-prepare broadcast");
        self.shared.events.emit(CouncilEvent::ConsensusProposed {
            petition_id: petition.id.clone(),
            protocol: CouncilProtocol::Byzantine.as_str().to_string(),
            term: petition.term,
        });
        Ok(petition)
    }

    /// Register a proposal ordered by a remote primary.
    ///
    /// Returns false for stale views and duplicates. The digest is recomputed
    /// from view, sequence and payload, and a message carrying any other
    /// digest is refused rather than registered.
    pub async fn handle_pre_prepare(&self, message: PbftMessage) -> bool {
        let expected = match pbft_digest(message.view_number, message.sequence_number, &message.payload) {
            Ok(digest) => digest,
            Err(e) => {
                warn!(sender = %message.sender_id, error = %e, "pre-prepare payload not hashable");
                return false;
            }
        };
        if expected != message.digest {
            warn!(sender = %message.sender_id, "pre-prepare digest mismatch");
            return false;
        }

        let registered = {
            let mut inner = self.shared.lock();
            if message.view_number < inner.view {
                warn!(sender = %message.sender_id, view = message.view_number, current = inner.view, "stale pre-prepare");
                return false;
            }
            let id = message.petition_id();
            if inner.petitions.contains(&id) {
                debug!(petition = %id, "duplicate pre-prepare");
                return false;
            }
            if message.view_number > inner.view {
                inner.view = message.view_number;
                inner.is_primary = false;
            }
            inner.sequence = inner.sequence.max(message.sequence_number);
            let petition = Petition::new(
                id.clone(),
                &message.sender_id,
                message.payload,
                message.sequence_number,
            );
            inner.petitions.adopt(petition);
            inner.phases.insert(id.clone(), PbftPhase::PrePrepare);
            (id, Duration::from_millis(inner.config.view_change_timeout_ms))
        };

        let (id, timeout) = registered;
        debug!(petition = %id, "pre-prepare accepted");
        self.shared.arm_view_change(id, timeout);
        true
    }

    /// Record a vote. Unknown petitions are an error.
    pub async fn vote(&self, petition_id: &str, vote: Vote) -> Result<()> {
        let event = {
            let mut inner = self.shared.lock();
            let ballot = inner
                .petitions
                .get_mut(petition_id)
                .ok_or_else(|| Error::PetitionNotFound(petition_id.to_string()))?;
            debug!(petition = petition_id, voter = %vote.voter_id, approve = vote.approve, "vote received");
            ballot.record(vote);
            inner.check_resolution(petition_id)
        };
        if let Some(event) = event {
            self.shared.events.emit(event);
        }
        Ok(())
    }

    pub async fn await_consensus(&self, petition_id: &str) -> Result<CouncilResult> {
        let rx = self.shared.lock().petitions.watch(petition_id)?;
        wait_for_result(petition_id, rx).await
    }

    pub fn petition(&self, petition_id: &str) -> Option<Petition> {
        self.shared
            .lock()
            .petitions
            .get(petition_id)
            .map(|b| b.petition().clone())
    }

    pub fn config(&self) -> ByzantineConfig {
        self.shared.lock().config.clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }
}

#[async_trait]
impl ConsensusProtocol for ByzantineConsensus {
    fn protocol(&self) -> CouncilProtocol {
        CouncilProtocol::Byzantine
    }

    fn node_id(&self) -> &str {
        &self.shared.node_id
    }

    fn events(&self) -> &EventBus {
        &self.shared.events
    }

    async fn initialize(&self, config: Option<CouncilConfig>) -> Result<()> {
        ByzantineConsensus::initialize(self, config).await
    }

    async fn shutdown(&self) -> Result<()> {
        ByzantineConsensus::shutdown(self).await
    }

    fn add_node(&self, node_id: &str, _profile: Option<NodeProfile>) {
        ByzantineConsensus::add_node(self, node_id)
    }

    fn remove_node(&self, node_id: &str) {
        ByzantineConsensus::remove_node(self, node_id)
    }

    async fn propose(&self, value: Option<serde_json::Value>) -> Result<Petition> {
        ByzantineConsensus::propose(self, value).await
    }

    async fn vote(&self, petition_id: &str, vote: Vote) -> Result<()> {
        ByzantineConsensus::vote(self, petition_id, vote).await
    }

    async fn await_consensus(&self, petition_id: &str) -> Result<CouncilResult> {
        ByzantineConsensus::await_consensus(self, petition_id).await
    }

    fn petition(&self, petition_id: &str) -> Option<Petition> {
        ByzantineConsensus::petition(self, petition_id)
    }
}
