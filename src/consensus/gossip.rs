//! Epidemic agreement.
//!
//! Proposals and votes travel as [`GossipMessage`]s. Every round drains the
//! outbound queue to a random subset of direct neighbors; receivers forward
//! what they have not seen before. A petition resolves once enough of the
//! known participants have voted.

use crate::consensus::ballot::{ratio, wait_for_result, PetitionTable};
use crate::consensus::events::{CouncilEvent, EventBus};
use crate::consensus::petition::{
    CouncilConfig, CouncilResult, NodeProfile, Petition, PetitionStatus, Vote,
};
use crate::consensus::protocol::{ConsensusProtocol, CouncilProtocol};
use crate::consensus::timers::TimerSet;
use crate::core::{
    now, unique_id, Error, Result, Timestamp, DEFAULT_CONSENSUS_THRESHOLD,
    DEFAULT_CONSENSUS_TIMEOUT_MS, DEFAULT_MAX_TASKS, MAX_QUEUE_SIZE, MAX_SEEN_MESSAGES,
};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Gossip configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipConfig {
    /// Neighbors contacted per message per round
    pub fanout: usize,
    pub gossip_interval_ms: u64,
    /// Messages are not forwarded past this many hops
    pub max_hops: u32,
    /// Fraction of participants that must vote before resolving
    pub convergence_threshold: f64,
    /// Approval fraction among voters needed to accept
    pub threshold: f64,
    pub timeout_ms: u64,
    pub max_pending: usize,
    /// Oldest message ids are forgotten past this many
    pub max_seen: usize,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            fanout: 3,
            gossip_interval_ms: 100,
            max_hops: 10,
            convergence_threshold: 0.8,
            threshold: DEFAULT_CONSENSUS_THRESHOLD,
            timeout_ms: DEFAULT_CONSENSUS_TIMEOUT_MS,
            max_pending: DEFAULT_MAX_TASKS,
            max_seen: MAX_SEEN_MESSAGES,
        }
    }
}

/// What a gossip message carries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GossipPayload {
    Proposal { petition: Petition },
    Vote { petition_id: String, vote: Vote },
}

impl GossipPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            GossipPayload::Proposal { .. } => "proposal",
            GossipPayload::Vote { .. } => "vote",
        }
    }
}

/// Unit of epidemic propagation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GossipMessage {
    pub id: String,
    pub origin: String,
    pub version: u64,
    pub hops: u32,
    pub timestamp: Timestamp,
    pub payload: GossipPayload,
}

impl GossipMessage {
    pub fn new(origin: &str, version: u64, payload: GossipPayload) -> Self {
        Self {
            id: unique_id("msg"),
            origin: origin.to_string(),
            version,
            hops: 0,
            timestamp: now(),
            payload,
        }
    }
}

struct GossipInner {
    config: GossipConfig,
    initialized: bool,
    nodes: BTreeSet<String>,
    neighbors: BTreeSet<String>,
    version: u64,
    seen: HashSet<String>,
    seen_order: VecDeque<String>,
    queue: VecDeque<GossipMessage>,
    petitions: PetitionTable,
}

impl GossipInner {
    fn participants(&self) -> usize {
        self.nodes.len() + 1
    }

    fn convergence(&self, petition_id: &str) -> f64 {
        self.petitions.get(petition_id).map_or(0.0, |ballot| {
            ratio(
                ballot.petition().votes.len() as f64,
                self.participants() as f64,
            )
        })
    }

    /// Record a message id. False if it was already known.
    fn remember(&mut self, id: &str) -> bool {
        if !self.seen.insert(id.to_string()) {
            return false;
        }
        self.seen_order.push_back(id.to_string());
        while self.seen_order.len() > self.config.max_seen.max(1) {
            if let Some(oldest) = self.seen_order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    fn enqueue(&mut self, message: GossipMessage) {
        if self.queue.len() >= MAX_QUEUE_SIZE {
            if let Some(dropped) = self.queue.pop_front() {
                warn!(message = %dropped.id, "gossip queue full, dropping oldest message");
            }
        }
        self.queue.push_back(message);
    }

    fn check_resolution(&mut self, petition_id: &str) -> Option<CouncilEvent> {
        let convergence = self.convergence(petition_id);
        if convergence < self.config.convergence_threshold {
            return None;
        }
        let threshold = self.config.threshold;
        let ballot = self.petitions.get_mut(petition_id)?;
        if !ballot.is_pending() {
            return None;
        }

        let petition = ballot.petition();
        let approval_rate = ratio(petition.approvals() as f64, petition.votes.len() as f64);
        let approved = approval_rate >= threshold;
        let status = if approved {
            PetitionStatus::Accepted
        } else {
            PetitionStatus::Rejected
        };
        let outcome = ballot.outcome(approved, approval_rate, convergence.min(1.0), None);
        if !ballot.resolve(status, outcome) {
            return None;
        }
        info!(petition = petition_id, approved, approval_rate, convergence, "gossip converged");
        Some(CouncilEvent::ConsensusAchieved {
            petition_id: petition_id.to_string(),
            approved,
            approval_rate,
            veto: false,
        })
    }
}

struct Shared {
    node_id: String,
    events: EventBus,
    timers: TimerSet,
    inner: Mutex<GossipInner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, GossipInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drain the queue to random neighbors. Returns the number of transmissions.
    fn gossip_round(&self) -> usize {
        let events = {
            let mut inner = self.lock();
            if inner.neighbors.is_empty() || inner.queue.is_empty() {
                return 0;
            }
            let neighbors: Vec<String> = inner.neighbors.iter().cloned().collect();
            let fanout = inner.config.fanout;
            let max_hops = inner.config.max_hops;
            let mut rng = rand::thread_rng();
            let mut events = Vec::new();

            while let Some(message) = inner.queue.pop_front() {
                if message.hops >= max_hops {
                    debug!(message = %message.id, hops = message.hops, "hop limit reached");
                    continue;
                }
                for target in neighbors.choose_multiple(&mut rng, fanout) {
                    events.push(CouncilEvent::MessageSent {
                        to: target.clone(),
                        message_id: message.id.clone(),
                        kind: message.payload.kind().to_string(),
                    });
                }
            }
            events
        };

        let sent = events.len();
        for event in events {
            self.events.emit(event);
        }
        sent
    }

    fn arm_timeout(self: &Arc<Self>, petition_id: String, timeout: Duration) {
        let weak: Weak<Shared> = Arc::downgrade(self);
        self.timers.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = weak.upgrade() {
                shared.expire(&petition_id);
            }
        });
    }

    fn expire(&self, petition_id: &str) {
        let expired = {
            let mut inner = self.lock();
            let convergence = inner.convergence(petition_id);
            inner.petitions.get_mut(petition_id).map_or(false, |ballot| {
                if !ballot.is_pending() {
                    return false;
                }
                let petition = ballot.petition();
                let approval_rate =
                    ratio(petition.approvals() as f64, petition.votes.len() as f64);
                let outcome = ballot.outcome(false, approval_rate, convergence.min(1.0), None);
                ballot.resolve(PetitionStatus::Expired, outcome)
            })
        };
        if expired {
            info!(petition = petition_id, "gossip did not converge before timeout");
            self.events.emit(CouncilEvent::ConsensusExpired {
                petition_id: petition_id.to_string(),
            });
        }
    }
}

/// Gossip agreement engine.
#[derive(Clone)]
pub struct GossipConsensus {
    shared: Arc<Shared>,
}

impl GossipConsensus {
    pub fn new(node_id: &str, config: GossipConfig) -> Self {
        let petitions = PetitionTable::new(config.max_pending);
        Self {
            shared: Arc::new(Shared {
                node_id: node_id.to_string(),
                events: EventBus::new(),
                timers: TimerSet::new(),
                inner: Mutex::new(GossipInner {
                    config,
                    initialized: false,
                    nodes: BTreeSet::new(),
                    neighbors: BTreeSet::new(),
                    version: 0,
                    seen: HashSet::new(),
                    seen_order: VecDeque::new(),
                    queue: VecDeque::new(),
                    petitions,
                }),
            }),
        }
    }

    pub fn with_defaults(node_id: &str) -> Self {
        Self::new(node_id, GossipConfig::default())
    }

    /// Start periodic gossip rounds.
    pub async fn initialize(&self, config: Option<CouncilConfig>) -> Result<()> {
        let (first_start, interval) = {
            let mut inner = self.shared.lock();
            if let Some(overrides) = config {
                inner.config.threshold = overrides.threshold;
                inner.config.timeout_ms = overrides.timeout_ms;
            }
            let interval = Duration::from_millis(inner.config.gossip_interval_ms.max(1));
            (!std::mem::replace(&mut inner.initialized, true), interval)
        };

        if first_start {
            let weak: Weak<Shared> = Arc::downgrade(&self.shared);
            self.shared.timers.spawn(async move {
                loop {
                    tokio::time::sleep(interval).await;
                    let Some(shared) = weak.upgrade() else { break };
                    shared.gossip_round();
                }
            });
        }

        info!(node = %self.shared.node_id, "gossip node initialized");
        self.shared.events.emit(CouncilEvent::Initialized {
            node_id: self.shared.node_id.clone(),
            protocol: CouncilProtocol::Gossip.as_str().to_string(),
        });
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.shared.timers.cancel_all();
        {
            let mut inner = self.shared.lock();
            inner.initialized = false;
            inner.queue.clear();
            inner.seen.clear();
            inner.seen_order.clear();
            inner.petitions.clear();
        }
        self.shared.events.emit(CouncilEvent::Shutdown {
            node_id: self.shared.node_id.clone(),
            protocol: CouncilProtocol::Gossip.as_str().to_string(),
        });
        Ok(())
    }

    /// Register a participant for convergence accounting.
    pub fn add_node(&self, node_id: &str) {
        if node_id == self.shared.node_id {
            return;
        }
        self.shared.lock().nodes.insert(node_id.to_string());
    }

    /// Forget a participant, also as a neighbor.
    pub fn remove_node(&self, node_id: &str) {
        let mut inner = self.shared.lock();
        inner.nodes.remove(node_id);
        inner.neighbors.remove(node_id);
    }

    /// Add a direct gossip target.
    pub fn add_neighbor(&self, node_id: &str) {
        if node_id == self.shared.node_id {
            return;
        }
        self.shared.lock().neighbors.insert(node_id.to_string());
    }

    pub fn remove_neighbor(&self, node_id: &str) {
        self.shared.lock().neighbors.remove(node_id);
    }

    pub fn version(&self) -> u64 {
        self.shared.lock().version
    }

    pub fn neighbor_count(&self) -> usize {
        self.shared.lock().neighbors.len()
    }

    pub fn queue_depth(&self) -> usize {
        self.shared.lock().queue.len()
    }

    pub fn seen_message_count(&self) -> usize {
        self.shared.lock().seen.len()
    }

    /// Fraction of participants that voted on a petition; 0 for unknown ids.
    pub fn convergence(&self, petition_id: &str) -> f64 {
        self.shared.lock().convergence(petition_id)
    }

    /// Run one gossip round now.
    pub fn gossip_round(&self) -> usize {
        self.shared.gossip_round()
    }

    /// Push a digest of every pending petition to each neighbor.
    ///
    /// Returns the number of neighbors synced; zero neighbors is not an error.
    pub fn anti_entropy(&self) -> usize {
        let events: Vec<CouncilEvent> = {
            let inner = self.shared.lock();
            let pending = inner.petitions.pending_count();
            inner
                .neighbors
                .iter()
                .map(|neighbor| CouncilEvent::AntiEntropySync {
                    neighbor: neighbor.clone(),
                    version: inner.version,
                    pending,
                })
                .collect()
        };
        let synced = events.len();
        debug!(node = %self.shared.node_id, synced, "anti-entropy pass");
        for event in events {
            self.shared.events.emit(event);
        }
        synced
    }

    pub async fn propose(&self, value: Option<serde_json::Value>) -> Result<Petition> {
        let (petition, timeout, resolved) = {
            let mut inner = self.shared.lock();
            if !inner.initialized {
                return Err(Error::NotInitialized(self.shared.node_id.clone()));
            }
            let mut petition = Petition::new(unique_id("gossip"), &self.shared.node_id, value, 1);
            petition
                .votes
                .insert(self.shared.node_id.clone(), Vote::approve(&self.shared.node_id));
            inner.petitions.open(petition.clone())?;

            inner.version += 1;
            let message = GossipMessage::new(
                &self.shared.node_id,
                inner.version,
                GossipPayload::Proposal {
                    petition: petition.clone(),
                },
            );
            inner.remember(&message.id);
            inner.enqueue(message);

            let timeout = Duration::from_millis(inner.config.timeout_ms);
            let resolved = inner.check_resolution(&petition.id);
            (petition, timeout, resolved)
        };

        self.shared.arm_timeout(petition.id.clone(), timeout);
        debug!(petition = %petition.id, "proposal queued for gossip");
        self.shared.events.emit(CouncilEvent::ConsensusProposed {
            petition_id: petition.id.clone(),
            protocol: CouncilProtocol::Gossip.as_str().to_string(),
            term: petition.term,
        });
        if let Some(event) = resolved {
            self.shared.events.emit(event);
        }
        Ok(self.petition(&petition.id).unwrap_or(petition))
    }

    /// Record a vote and gossip it. Unknown petitions are ignored.
    pub async fn vote(&self, petition_id: &str, vote: Vote) -> Result<()> {
        let event = {
            let mut inner = self.shared.lock();
            let Some(ballot) = inner.petitions.get_mut(petition_id) else {
                debug!(petition = petition_id, "vote for unknown petition ignored");
                return Ok(());
            };
            ballot.record(vote.clone());

            inner.version += 1;
            let message = GossipMessage::new(
                &self.shared.node_id,
                inner.version,
                GossipPayload::Vote {
                    petition_id: petition_id.to_string(),
                    vote,
                },
            );
            inner.remember(&message.id);
            inner.enqueue(message);
            inner.check_resolution(petition_id)
        };
        if let Some(event) = event {
            self.shared.events.emit(event);
        }
        Ok(())
    }

    /// Inbound message from a neighbor. Returns false for duplicates.
    pub async fn handle_message(&self, message: GossipMessage) -> bool {
        let (adopted, event) = {
            let mut inner = self.shared.lock();
            if !inner.remember(&message.id) {
                return false;
            }
            inner.version = inner.version.max(message.version);

            let mut adopted = None;
            let mut event = None;
            match &message.payload {
                GossipPayload::Proposal { petition } => {
                    if !inner.petitions.contains(&petition.id) {
                        let mut fresh = petition.clone();
                        fresh.status = PetitionStatus::Pending;
                        inner.petitions.adopt(fresh);
                        adopted = Some((
                            petition.id.clone(),
                            Duration::from_millis(inner.config.timeout_ms),
                        ));
                    }
                    event = inner.check_resolution(&petition.id);
                }
                GossipPayload::Vote { petition_id, vote } => {
                    if let Some(ballot) = inner.petitions.get_mut(petition_id) {
                        ballot.record(vote.clone());
                        event = inner.check_resolution(petition_id);
                    }
                }
            }

            debug!(message = %message.id, origin = %message.origin, hops = message.hops, "gossip received");
            let mut forward = message;
            forward.hops += 1;
            inner.enqueue(forward);
            (adopted, event)
        };

        if let Some((petition_id, timeout)) = adopted {
            self.shared.arm_timeout(petition_id, timeout);
        }
        if let Some(event) = event {
            self.shared.events.emit(event);
        }
        true
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

    pub fn config(&self) -> GossipConfig {
        self.shared.lock().config.clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }
}

#[async_trait]
impl ConsensusProtocol for GossipConsensus {
    fn protocol(&self) -> CouncilProtocol {
        CouncilProtocol::Gossip
    }

    fn node_id(&self) -> &str {
        &self.shared.node_id
    }

    fn events(&self) -> &EventBus {
        &self.shared.events
    }

    async fn initialize(&self, config: Option<CouncilConfig>) -> Result<()> {
        GossipConsensus::initialize(self, config).await
    }

    async fn shutdown(&self) -> Result<()> {
        GossipConsensus::shutdown(self).await
    }

    fn add_node(&self, node_id: &str, _profile: Option<NodeProfile>) {
        GossipConsensus::add_node(self, node_id)
    }

    fn remove_node(&self, node_id: &str) {
        GossipConsensus::remove_node(self, node_id)
    }

    async fn propose(&self, value: Option<serde_json::Value>) -> Result<Petition> {
        GossipConsensus::propose(self, value).await
    }

    async fn vote(&self, petition_id: &str, vote: Vote) -> Result<()> {
        GossipConsensus::vote(self, petition_id, vote).await
    }

    async fn await_consensus(&self, petition_id: &str) -> Result<CouncilResult> {
        GossipConsensus::await_consensus(self, petition_id).await
    }

    fn petition(&self, petition_id: &str) -> Option<Petition> {
        GossipConsensus::petition(self, petition_id)
    }
}
