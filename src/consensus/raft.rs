//! Leader-based agreement.
//!
//! Nodes start as followers. A randomized election timer promotes a follower
//! that has not heard from a leader to candidate; a majority of the cluster
//! (self-vote included) makes it leader. Only the leader accepts proposals,
//! which are appended to the log and replicated through a [`RaftTransport`].

use crate::consensus::ballot::{ratio, wait_for_result, PetitionTable};
use crate::consensus::events::{CouncilEvent, EventBus};
use crate::consensus::petition::{
    CouncilConfig, CouncilResult, NodeProfile, Petition, PetitionStatus, Vote,
};
use crate::consensus::protocol::{ConsensusProtocol, CouncilProtocol};
use crate::consensus::timers::TimerSet;
use crate::core::{
    unique_id, Error, Result, DEFAULT_CONSENSUS_THRESHOLD, DEFAULT_CONSENSUS_TIMEOUT_MS,
    DEFAULT_MAX_TASKS, MAX_RETRIES,
};
use async_trait::async_trait;
use futures::future::join_all;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Raft configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftConfig {
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// Fraction of the cluster that must approve
    pub threshold: f64,
    /// Wait before an unresolved petition expires
    pub timeout_ms: u64,
    /// Attempts per peer request before giving up
    pub max_retries: u32,
    pub max_pending: usize,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min_ms: 150,
            election_timeout_max_ms: 300,
            heartbeat_interval_ms: 50,
            threshold: DEFAULT_CONSENSUS_THRESHOLD,
            timeout_ms: DEFAULT_CONSENSUS_TIMEOUT_MS,
            max_retries: MAX_RETRIES,
            max_pending: DEFAULT_MAX_TASKS,
        }
    }
}

/// Role of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RaftState {
    Follower,
    Candidate,
    Leader,
}

impl std::fmt::Display for RaftState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RaftState::Follower => write!(f, "follower"),
            RaftState::Candidate => write!(f, "candidate"),
            RaftState::Leader => write!(f, "leader"),
        }
    }
}

/// Replicated log entry. Indexes start at 1.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: u64,
    pub term: u64,
    pub petition_id: String,
    pub value: Option<serde_json::Value>,
}

/// RequestVote arguments.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub candidate_id: String,
    pub term: u64,
    pub last_log_index: u64,
    pub last_log_term: u64,
}

/// AppendEntries arguments. Empty `entries` is a heartbeat.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppendRequest {
    pub leader_id: String,
    pub term: u64,
    pub entries: Vec<LogEntry>,
    pub leader_commit: u64,
}

/// Delivery of Raft RPCs to peers.
#[async_trait]
pub trait RaftTransport: Send + Sync {
    /// Ask `peer` for its vote. `Ok(false)` is a refusal, `Err` an unreachable peer.
    async fn request_vote(&self, peer: &str, request: &VoteRequest) -> Result<bool>;

    /// Replicate entries (or heartbeat) to `peer`.
    async fn append_entries(&self, peer: &str, request: &AppendRequest) -> Result<bool>;
}

/// In-process stand-in for remote peers.
///
/// Each peer remembers the last term it saw: it grants a vote only to a newer
/// term and accepts appends from a term that is not older.
#[derive(Debug, Default)]
pub struct SimulatedPeers {
    terms: Mutex<HashMap<String, u64>>,
    unreachable: Mutex<HashSet<String>>,
}

impl SimulatedPeers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a peer fail every request until restored.
    pub fn set_unreachable(&self, peer: &str, unreachable: bool) {
        let mut set = self.unreachable.lock().unwrap_or_else(PoisonError::into_inner);
        if unreachable {
            set.insert(peer.to_string());
        } else {
            set.remove(peer);
        }
    }

    /// Last term seen by a peer.
    pub fn term_of(&self, peer: &str) -> u64 {
        self.terms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(peer)
            .copied()
            .unwrap_or(0)
    }

    fn check_reachable(&self, peer: &str) -> Result<()> {
        let set = self.unreachable.lock().unwrap_or_else(PoisonError::into_inner);
        if set.contains(peer) {
            return Err(Error::Transport {
                peer: peer.to_string(),
                reason: "simulated partition".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RaftTransport for SimulatedPeers {
    async fn request_vote(&self, peer: &str, request: &VoteRequest) -> Result<bool> {
        self.check_reachable(peer)?;
        let mut terms = self.terms.lock().unwrap_or_else(PoisonError::into_inner);
        let seen = terms.entry(peer.to_string()).or_insert(0);
        if request.term > *seen {
            *seen = request.term;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn append_entries(&self, peer: &str, request: &AppendRequest) -> Result<bool> {
        self.check_reachable(peer)?;
        let mut terms = self.terms.lock().unwrap_or_else(PoisonError::into_inner);
        let seen = terms.entry(peer.to_string()).or_insert(0);
        if request.term >= *seen {
            *seen = request.term;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

struct RaftInner {
    config: RaftConfig,
    initialized: bool,
    state: RaftState,
    term: u64,
    voted_for: Option<String>,
    leader_id: Option<String>,
    log: Vec<LogEntry>,
    commit_index: u64,
    peers: BTreeSet<String>,
    last_heartbeat: Instant,
    petitions: PetitionTable,
}

impl RaftInner {
    fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }

    fn last_log(&self) -> (u64, u64) {
        self.log.last().map_or((0, 0), |e| (e.index, e.term))
    }

    fn step_down(&mut self, term: u64) {
        self.term = term;
        self.state = RaftState::Follower;
        self.voted_for = None;
        self.leader_id = None;
    }

    /// Apply an AppendEntries from `leader_id`. Ids of petitions seen for the
    /// first time are pushed onto `adopted`.
    fn accept_entries(
        &mut self,
        leader_id: &str,
        term: u64,
        entries: Vec<LogEntry>,
        leader_commit: u64,
        adopted: &mut Vec<String>,
    ) -> bool {
        if term < self.term {
            warn!(leader = leader_id, term, current = self.term, "append from stale leader refused");
            return false;
        }
        if term > self.term {
            self.voted_for = None;
        }
        self.term = term;
        self.state = RaftState::Follower;
        self.leader_id = Some(leader_id.to_string());
        self.last_heartbeat = Instant::now();

        for entry in entries {
            let position = entry.index.saturating_sub(1) as usize;
            if entry.index == 0 || position > self.log.len() {
                warn!(leader = leader_id, index = entry.index, "gap in replicated log");
                continue;
            }
            if let Some(existing) = self.log.get(position) {
                if existing.term == entry.term {
                    continue;
                }
                self.log.truncate(position);
            }
            if !self.petitions.contains(&entry.petition_id) {
                let petition = Petition::new(
                    entry.petition_id.clone(),
                    leader_id,
                    entry.value.clone(),
                    entry.term,
                );
                self.petitions.adopt(petition);
                adopted.push(entry.petition_id.clone());
            }
            self.log.push(entry);
        }

        let commit = leader_commit.min(self.log.len() as u64);
        if commit > self.commit_index {
            self.commit_index = commit;
        }
        true
    }

    /// Resolve a petition once the cluster-wide tally is decisive.
    fn check_resolution(&mut self, petition_id: &str) -> Option<CouncilEvent> {
        let n = self.cluster_size() as f64;
        let threshold = self.config.threshold;
        let ballot = self.petitions.get_mut(petition_id)?;
        if !ballot.is_pending() {
            return None;
        }

        let votes = ballot.petition().votes.len() as f64;
        let approvals = ballot.petition().approvals() as f64;
        let approval_rate = ratio(approvals, n);
        let best_case = ratio(approvals + (n - votes).max(0.0), n);

        let (status, approved) = if approval_rate >= threshold {
            (PetitionStatus::Accepted, true)
        } else if best_case < threshold {
            (PetitionStatus::Rejected, false)
        } else {
            return None;
        };

        let outcome = ballot.outcome(approved, approval_rate, ratio(votes, n), None);
        if !ballot.resolve(status, outcome) {
            return None;
        }
        info!(petition = petition_id, approved, approval_rate, "raft petition resolved");
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
    transport: Arc<dyn RaftTransport>,
    inner: Mutex<RaftInner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, RaftInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn election_timeout(&self) -> Duration {
        let inner = self.lock();
        let min = inner.config.election_timeout_min_ms;
        let max = inner.config.election_timeout_max_ms.max(min);
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    fn election_due(&self, timeout: Duration) -> bool {
        let inner = self.lock();
        inner.initialized
            && inner.state != RaftState::Leader
            && inner.last_heartbeat.elapsed() >= timeout
    }

    fn max_retries(&self) -> u32 {
        self.lock().config.max_retries.max(1)
    }

    async fn request_vote_from(&self, peer: &str, request: &VoteRequest, attempts: u32) -> bool {
        for attempt in 1..=attempts {
            match self.transport.request_vote(peer, request).await {
                Ok(granted) => return granted,
                Err(e) => debug!(peer, attempt, error = %e, "vote request failed"),
            }
        }
        warn!(peer, attempts, "peer unreachable during election");
        false
    }

    async fn append_to(&self, peer: &str, request: &AppendRequest, attempts: u32) -> bool {
        for attempt in 1..=attempts {
            match self.transport.append_entries(peer, request).await {
                Ok(accepted) => return accepted,
                Err(e) => debug!(peer, attempt, error = %e, "append failed"),
            }
        }
        warn!(peer, attempts, "peer unreachable during replication");
        false
    }

    async fn run_election(self: &Arc<Self>) {
        let (request, peers, cluster) = {
            let mut inner = self.lock();
            inner.term += 1;
            inner.state = RaftState::Candidate;
            inner.voted_for = Some(self.node_id.clone());
            inner.leader_id = None;
            inner.last_heartbeat = Instant::now();
            let (last_log_index, last_log_term) = inner.last_log();
            let request = VoteRequest {
                candidate_id: self.node_id.clone(),
                term: inner.term,
                last_log_index,
                last_log_term,
            };
            let peers: Vec<String> = inner.peers.iter().cloned().collect();
            (request, peers, inner.cluster_size())
        };
        info!(node = %self.node_id, term = request.term, "starting election");

        let attempts = self.max_retries();
        let replies = join_all(
            peers
                .iter()
                .map(|peer| self.request_vote_from(peer, &request, attempts)),
        )
        .await;
        let granted = 1 + replies.into_iter().filter(|g| *g).count();

        let won = {
            let mut inner = self.lock();
            let still_candidate =
                inner.state == RaftState::Candidate && inner.term == request.term;
            if still_candidate && granted * 2 > cluster {
                inner.state = RaftState::Leader;
                inner.leader_id = Some(self.node_id.clone());
                true
            } else {
                false
            }
        };

        if won {
            info!(node = %self.node_id, term = request.term, votes = granted, "elected leader");
            self.events.emit(CouncilEvent::LeaderElected {
                leader_id: self.node_id.clone(),
                term: request.term,
            });
            self.start_heartbeats();
        } else {
            debug!(node = %self.node_id, votes = granted, cluster, "election lost");
        }
    }

    fn start_heartbeats(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let interval = Duration::from_millis(self.lock().config.heartbeat_interval_ms.max(1));
        self.timers.spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(shared) = weak.upgrade() else { break };
                if !shared.send_heartbeats().await {
                    break;
                }
            }
        });
    }

    /// One heartbeat round. Returns false once this node is no longer leader.
    async fn send_heartbeats(&self) -> bool {
        let (request, peers) = {
            let inner = self.lock();
            if inner.state != RaftState::Leader || !inner.initialized {
                return false;
            }
            let request = AppendRequest {
                leader_id: self.node_id.clone(),
                term: inner.term,
                entries: Vec::new(),
                leader_commit: inner.commit_index,
            };
            (request, inner.peers.iter().cloned().collect::<Vec<_>>())
        };
        let acks = join_all(peers.iter().map(|peer| self.append_to(peer, &request, 1))).await;
        let refused = acks.iter().filter(|a| !**a).count();
        if refused > 0 {
            debug!(node = %self.node_id, refused, "heartbeat refused by peers");
        }
        true
    }

    /// Expire `petition_id` after the configured wait unless it resolves first.
    fn arm_expiry(self: &Arc<Self>, petition_id: &str, timeout: Duration) {
        let weak: Weak<Shared> = Arc::downgrade(self);
        let id = petition_id.to_string();
        self.timers.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = weak.upgrade() {
                shared.expire(&id);
            }
        });
    }

    fn expire(&self, petition_id: &str) {
        let expired = {
            let mut inner = self.lock();
            let n = inner.cluster_size() as f64;
            inner.petitions.get_mut(petition_id).map_or(false, |ballot| {
                if !ballot.is_pending() {
                    return false;
                }
                let votes = ballot.petition().votes.len() as f64;
                let approvals = ballot.petition().approvals() as f64;
                let outcome = ballot.outcome(false, ratio(approvals, n), ratio(votes, n), None);
                ballot.resolve(PetitionStatus::Expired, outcome)
            })
        };
        if expired {
            info!(petition = petition_id, "raft petition expired");
            self.events.emit(CouncilEvent::ConsensusExpired {
                petition_id: petition_id.to_string(),
            });
        }
    }
}

/// Raft agreement engine.
#[derive(Clone)]
pub struct RaftConsensus {
    shared: Arc<Shared>,
}

impl RaftConsensus {
    /// Create a node backed by [`SimulatedPeers`].
    pub fn new(node_id: &str, config: RaftConfig) -> Self {
        Self::with_transport(node_id, config, Arc::new(SimulatedPeers::new()))
    }

    /// Create a node with a custom transport.
    pub fn with_transport(
        node_id: &str,
        config: RaftConfig,
        transport: Arc<dyn RaftTransport>,
    ) -> Self {
        let petitions = PetitionTable::new(config.max_pending);
        Self {
            shared: Arc::new(Shared {
                node_id: node_id.to_string(),
                events: EventBus::new(),
                timers: TimerSet::new(),
                transport,
                inner: Mutex::new(RaftInner {
                    config,
                    initialized: false,
                    state: RaftState::Follower,
                    term: 0,
                    voted_for: None,
                    leader_id: None,
                    log: Vec::new(),
                    commit_index: 0,
                    peers: BTreeSet::new(),
                    last_heartbeat: Instant::now(),
                    petitions,
                }),
            }),
        }
    }

    pub fn with_defaults(node_id: &str) -> Self {
        Self::new(node_id, RaftConfig::default())
    }

    /// Arm the election timer.
    pub async fn initialize(&self, config: Option<CouncilConfig>) -> Result<()> {
        let first_start = {
            let mut inner = self.shared.lock();
            if let Some(overrides) = config {
                inner.config.threshold = overrides.threshold;
                inner.config.timeout_ms = overrides.timeout_ms;
            }
            inner.last_heartbeat = Instant::now();
            !std::mem::replace(&mut inner.initialized, true)
        };

        if first_start {
            let weak: Weak<Shared> = Arc::downgrade(&self.shared);
            self.shared.timers.spawn(async move {
                loop {
                    let timeout = match weak.upgrade() {
                        Some(shared) => shared.election_timeout(),
                        None => break,
                    };
                    tokio::time::sleep(timeout).await;
                    let Some(shared) = weak.upgrade() else { break };
                    if shared.election_due(timeout) {
                        shared.run_election().await;
                    }
                }
            });
        }

        info!(node = %self.shared.node_id, "raft node initialized");
        self.shared.events.emit(CouncilEvent::Initialized {
            node_id: self.shared.node_id.clone(),
            protocol: CouncilProtocol::Raft.as_str().to_string(),
        });
        Ok(())
    }

    /// Stop timers and drop petitions. The log and term are kept.
    pub async fn shutdown(&self) -> Result<()> {
        self.shared.timers.cancel_all();
        {
            let mut inner = self.shared.lock();
            inner.initialized = false;
            inner.state = RaftState::Follower;
            inner.leader_id = None;
            inner.petitions.clear();
        }
        self.shared.events.emit(CouncilEvent::Shutdown {
            node_id: self.shared.node_id.clone(),
            protocol: CouncilProtocol::Raft.as_str().to_string(),
        });
        Ok(())
    }

    pub fn add_peer(&self, peer_id: &str) {
        if peer_id == self.shared.node_id {
            return;
        }
        self.shared.lock().peers.insert(peer_id.to_string());
    }

    pub fn remove_peer(&self, peer_id: &str) {
        self.shared.lock().peers.remove(peer_id);
    }

    pub fn peer_count(&self) -> usize {
        self.shared.lock().peers.len()
    }

    pub fn state(&self) -> RaftState {
        self.shared.lock().state
    }

    pub fn term(&self) -> u64 {
        self.shared.lock().term
    }

    pub fn is_leader(&self) -> bool {
        self.shared.lock().state == RaftState::Leader
    }

    pub fn leader_id(&self) -> Option<String> {
        self.shared.lock().leader_id.clone()
    }

    pub fn commit_index(&self) -> u64 {
        self.shared.lock().commit_index
    }

    pub fn log_len(&self) -> usize {
        self.shared.lock().log.len()
    }

    /// Log entries from `from_index` (1-based) onward.
    pub fn entries_from(&self, from_index: u64) -> Vec<LogEntry> {
        self.shared
            .lock()
            .log
            .iter()
            .filter(|e| e.index >= from_index)
            .cloned()
            .collect()
    }

    /// Start an election immediately instead of waiting for the timer.
    pub async fn campaign(&self) -> Result<bool> {
        if !self.shared.lock().initialized {
            return Err(Error::NotInitialized(self.shared.node_id.clone()));
        }
        self.shared.run_election().await;
        Ok(self.is_leader())
    }

    /// Inbound RequestVote.
    pub fn handle_vote_request(
        &self,
        candidate_id: &str,
        term: u64,
        last_log_index: u64,
        last_log_term: u64,
    ) -> bool {
        let mut inner = self.shared.lock();
        if term < inner.term {
            debug!(candidate = candidate_id, term, current = inner.term, "stale vote request");
            return false;
        }
        if term > inner.term {
            inner.step_down(term);
        }

        let (my_index, my_term) = inner.last_log();
        let up_to_date =
            last_log_term > my_term || (last_log_term == my_term && last_log_index >= my_index);
        let free = inner
            .voted_for
            .as_deref()
            .map_or(true, |voted| voted == candidate_id);

        if up_to_date && free {
            inner.voted_for = Some(candidate_id.to_string());
            inner.last_heartbeat = Instant::now();
            debug!(candidate = candidate_id, term, "vote granted");
            true
        } else {
            false
        }
    }

    /// Inbound AppendEntries.
    ///
    /// Petitions first seen here expire after `timeout_ms` like the leader's own.
    pub async fn handle_append_entries(
        &self,
        leader_id: &str,
        term: u64,
        entries: Vec<LogEntry>,
        leader_commit: u64,
    ) -> bool {
        let mut adopted = Vec::new();
        let timeout = {
            let mut inner = self.shared.lock();
            if !inner.accept_entries(leader_id, term, entries, leader_commit, &mut adopted) {
                return false;
            }
            Duration::from_millis(inner.config.timeout_ms)
        };
        for petition_id in &adopted {
            debug!(petition = %petition_id, leader = leader_id, "replicated petition adopted");
            self.shared.arm_expiry(petition_id, timeout);
        }
        true
    }

    /// Append a petition to the log and replicate it. Leader only.
    pub async fn propose(&self, value: Option<serde_json::Value>) -> Result<Petition> {
        let (petition, request, peers, cluster, timeout, resolved) = {
            let mut inner = self.shared.lock();
            if inner.state != RaftState::Leader {
                return Err(Error::NotLeader {
                    node_id: self.shared.node_id.clone(),
                    leader: inner.leader_id.clone(),
                });
            }

            let term = inner.term;
            let index = inner.log.len() as u64 + 1;
            let mut petition = Petition::new(unique_id("raft"), &self.shared.node_id, value, term);
            petition
                .votes
                .insert(self.shared.node_id.clone(), Vote::approve(&self.shared.node_id));
            inner.petitions.open(petition.clone())?;

            let entry = LogEntry {
                index,
                term,
                petition_id: petition.id.clone(),
                value: petition.value.clone(),
            };
            inner.log.push(entry.clone());
            let request = AppendRequest {
                leader_id: self.shared.node_id.clone(),
                term,
                entries: vec![entry],
                leader_commit: inner.commit_index,
            };
            let peers: Vec<String> = inner.peers.iter().cloned().collect();
            let cluster = inner.cluster_size();
            let timeout = Duration::from_millis(inner.config.timeout_ms);
            let resolved = inner.check_resolution(&petition.id);
            (petition, request, peers, cluster, timeout, resolved)
        };

        self.shared.arm_expiry(&petition.id, timeout);
        self.shared.events.emit(CouncilEvent::ConsensusProposed {
            petition_id: petition.id.clone(),
            protocol: CouncilProtocol::Raft.as_str().to_string(),
            term: petition.term,
        });

        let attempts = self.shared.max_retries();
        let acks = join_all(
            peers
                .iter()
                .map(|peer| self.shared.append_to(peer, &request, attempts)),
        )
        .await;
        let replicated = 1 + acks.into_iter().filter(|a| *a).count();
        let index = request.entries.first().map_or(0, |e| e.index);

        if replicated * 2 > cluster {
            let committed = {
                let mut inner = self.shared.lock();
                if inner.commit_index < index {
                    inner.commit_index = index;
                    true
                } else {
                    false
                }
            };
            if committed {
                debug!(index, term = request.term, replicated, "entry committed");
                self.shared.events.emit(CouncilEvent::LogCommitted {
                    index,
                    term: request.term,
                    petition_id: petition.id.clone(),
                });
            }
        } else {
            warn!(index, replicated, cluster, "entry not replicated to a majority");
        }

        if let Some(event) = resolved {
            self.shared.events.emit(event);
        }
        Ok(self.petition(&petition.id).unwrap_or(petition))
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

    pub fn config(&self) -> RaftConfig {
        self.shared.lock().config.clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }
}

#[async_trait]
impl ConsensusProtocol for RaftConsensus {
    fn protocol(&self) -> CouncilProtocol {
        CouncilProtocol::Raft
    }

    fn node_id(&self) -> &str {
        &self.shared.node_id
    }

    fn events(&self) -> &EventBus {
        &self.shared.events
    }

    async fn initialize(&self, config: Option<CouncilConfig>) -> Result<()> {
        RaftConsensus::initialize(self, config).await
    }

    async fn shutdown(&self) -> Result<()> {
        RaftConsensus::shutdown(self).await
    }

    fn add_node(&self, node_id: &str, _profile: Option<NodeProfile>) {
        self.add_peer(node_id)
    }

    fn remove_node(&self, node_id: &str) {
        self.remove_peer(node_id)
    }

    async fn propose(&self, value: Option<serde_json::Value>) -> Result<Petition> {
        RaftConsensus::propose(self, value).await
    }

    async fn vote(&self, petition_id: &str, vote: Vote) -> Result<()> {
        RaftConsensus::vote(self, petition_id, vote).await
    }

    async fn await_consensus(&self, petition_id: &str) -> Result<CouncilResult> {
        RaftConsensus::await_consensus(self, petition_id).await
    }

    fn petition(&self, petition_id: &str) -> Option<Petition> {
        RaftConsensus::petition(self, petition_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::events::drain;
    use serde_json::json;

    fn fast_config() -> RaftConfig {
        RaftConfig {
            timeout_ms: 2_000,
            ..Default::default()
        }
    }

    async fn leader_with_peers(peers: &[&str]) -> (RaftConsensus, Arc<SimulatedPeers>) {
        let transport = Arc::new(SimulatedPeers::new());
        let raft = RaftConsensus::with_transport("leader", fast_config(), transport.clone());
        for peer in peers {
            raft.add_peer(peer);
        }
        raft.initialize(None).await.unwrap();
        assert!(raft.campaign().await.unwrap());
        (raft, transport)
    }

    #[tokio::test]
    async fn test_starts_as_follower() {
        let raft = RaftConsensus::with_defaults("n1");
        assert_eq!(raft.state(), RaftState::Follower);
        assert_eq!(raft.term(), 0);
        assert!(!raft.is_leader());
        assert_eq!(raft.leader_id(), None);
    }

    #[tokio::test]
    async fn test_follower_cannot_propose() {
        let raft = RaftConsensus::with_defaults("n1");
        raft.add_peer("n2");
        raft.add_peer("n3");
        let err = raft.propose(Some(json!({"k": 1}))).await.unwrap_err();
        assert!(matches!(err, Error::NotLeader { .. }));
        assert!(err.to_string().contains("Only leader can propose"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_node_elects_itself() {
        let raft = RaftConsensus::with_defaults("solo");
        let mut events = raft.events().subscribe();
        raft.initialize(None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(raft.is_leader());
        assert_eq!(raft.leader_id().as_deref(), Some("solo"));
        assert_eq!(raft.term(), 1);
        assert!(drain(&mut events)
            .iter()
            .any(|e| matches!(e, CouncilEvent::LeaderElected { term: 1, .. })));
        raft.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_majority_elects_leader() {
        let (raft, transport) = leader_with_peers(&["b", "c"]).await;
        assert_eq!(raft.state(), RaftState::Leader);
        assert_eq!(transport.term_of("b"), 1);
        raft.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_partitioned_candidate_loses() {
        let transport = Arc::new(SimulatedPeers::new());
        transport.set_unreachable("b", true);
        transport.set_unreachable("c", true);
        let raft = RaftConsensus::with_transport("a", fast_config(), transport);
        raft.add_peer("b");
        raft.add_peer("c");
        raft.initialize(None).await.unwrap();

        assert!(!raft.campaign().await.unwrap());
        assert_eq!(raft.state(), RaftState::Candidate);
        raft.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_propose_commits_and_resolves() {
        let (raft, _) = leader_with_peers(&["b", "c"]).await;
        let mut events = raft.events().subscribe();

        let petition = raft.propose(Some(json!({"cmd": "set"}))).await.unwrap();
        assert!(petition.id.starts_with("raft_"));
        assert_eq!(petition.term, 1);
        assert_eq!(raft.commit_index(), 1);
        assert_eq!(raft.log_len(), 1);

        raft.vote(&petition.id, Vote::approve("b")).await.unwrap();
        let result = raft.await_consensus(&petition.id).await.unwrap();
        assert!(result.approved);
        assert_eq!(result.final_value, Some(json!({"cmd": "set"})));

        let names: Vec<&str> = drain(&mut events).iter().map(|e| e.name()).collect();
        assert!(names.contains(&"log.committed"));
        assert!(names.contains(&"consensus.achieved"));
        raft.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_once_unreachable() {
        let (raft, _) = leader_with_peers(&["b", "c"]).await;
        let petition = raft.propose(None).await.unwrap();
        raft.vote(&petition.id, Vote::reject("b")).await.unwrap();
        // 2/3 is still reachable.
        assert_eq!(raft.petition(&petition.id).unwrap().status, PetitionStatus::Pending);
        raft.vote(&petition.id, Vote::reject("c")).await.unwrap();

        let result = raft.await_consensus(&petition.id).await.unwrap();
        assert!(!result.approved);
        assert_eq!(raft.petition(&petition.id).unwrap().status, PetitionStatus::Rejected);
        raft.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_expires() {
        let (raft, _) = leader_with_peers(&["b", "c", "d", "e"]).await;
        let petition = raft.propose(None).await.unwrap();

        let result = raft.await_consensus(&petition.id).await.unwrap();
        assert!(!result.approved);
        assert_eq!(raft.petition(&petition.id).unwrap().status, PetitionStatus::Expired);
        raft.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_vote_unknown_petition() {
        let raft = RaftConsensus::with_defaults("n1");
        let err = raft.vote("missing", Vote::approve("n2")).await.unwrap_err();
        assert!(matches!(err, Error::PetitionNotFound(_)));
    }

    #[test]
    fn test_vote_request_terms() {
        let raft = RaftConsensus::with_defaults("n1");
        assert!(raft.handle_vote_request("c1", 2, 0, 0));
        assert_eq!(raft.term(), 2);
        // Same term, different candidate.
        assert!(!raft.handle_vote_request("c2", 2, 0, 0));
        // Same term, same candidate.
        assert!(raft.handle_vote_request("c1", 2, 0, 0));
        // Stale term.
        assert!(!raft.handle_vote_request("c3", 1, 0, 0));
        assert_eq!(raft.term(), 2);
        // Newer term clears the vote.
        assert!(raft.handle_vote_request("c2", 3, 0, 0));
    }

    #[tokio::test]
    async fn test_append_entries_registers_petitions() {
        let raft = RaftConsensus::with_defaults("follower");
        let entry = LogEntry {
            index: 1,
            term: 4,
            petition_id: "raft_remote".to_string(),
            value: Some(json!(7)),
        };
        assert!(raft.handle_append_entries("leader", 4, vec![entry], 1).await);
        assert_eq!(raft.term(), 4);
        assert_eq!(raft.leader_id().as_deref(), Some("leader"));
        assert_eq!(raft.commit_index(), 1);
        assert_eq!(raft.petition("raft_remote").unwrap().value, Some(json!(7)));

        assert!(!raft.handle_append_entries("old", 3, Vec::new(), 0).await);
        assert_eq!(raft.leader_id().as_deref(), Some("leader"));
    }

    #[tokio::test]
    async fn test_append_conflict_truncates() {
        let raft = RaftConsensus::with_defaults("f");
        let entry = |index, term, id: &str| LogEntry {
            index,
            term,
            petition_id: id.to_string(),
            value: None,
        };
        raft.handle_append_entries("l1", 1, vec![entry(1, 1, "p1"), entry(2, 1, "p2")], 0)
            .await;
        raft.handle_append_entries("l2", 2, vec![entry(2, 2, "p3")], 0)
            .await;
        let log = raft.entries_from(1);
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].petition_id, "p3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_replicated_petition_expires_on_follower() {
        let raft = RaftConsensus::new(
            "follower",
            RaftConfig {
                timeout_ms: 500,
                ..Default::default()
            },
        );
        raft.add_peer("leader");
        raft.add_peer("other");
        let mut events = raft.events().subscribe();
        let entry = LogEntry {
            index: 1,
            term: 1,
            petition_id: "raft_remote".to_string(),
            value: None,
        };
        assert!(raft.handle_append_entries("leader", 1, vec![entry.clone()], 0).await);
        // Re-delivery of the same entry does not arm a second deadline.
        assert!(raft.handle_append_entries("leader", 1, vec![entry], 0).await);

        let result = tokio::time::timeout(
            Duration::from_secs(3600),
            raft.await_consensus("raft_remote"),
        )
        .await
        .expect("follower petition must expire")
        .unwrap();
        assert!(!result.approved);
        assert!(result.duration_ms >= 500);
        assert_eq!(raft.petition("raft_remote").unwrap().status, PetitionStatus::Expired);

        let expired = drain(&mut events)
            .iter()
            .filter(|e| matches!(e, CouncilEvent::ConsensusExpired { .. }))
            .count();
        assert_eq!(expired, 1);
    }

    #[tokio::test]
    async fn test_vote_refused_to_stale_log() {
        let raft = RaftConsensus::with_defaults("n1");
        let entry = LogEntry {
            index: 1,
            term: 1,
            petition_id: "p1".to_string(),
            value: None,
        };
        raft.handle_append_entries("l1", 1, vec![entry], 0).await;
        // Newer term but an empty log.
        assert!(!raft.handle_vote_request("c", 5, 0, 0));
        assert_eq!(raft.term(), 5);
        // Same term, log caught up.
        assert!(raft.handle_vote_request("c", 5, 1, 1));
    }

    #[tokio::test]
    async fn test_remove_unknown_peer_is_noop() {
        let raft = RaftConsensus::with_defaults("n1");
        raft.remove_peer("ghost");
        raft.add_peer("n1");
        assert_eq!(raft.peer_count(), 0);
    }
}
