//! Petition table shared by the protocol engines.
//!
//! A [`Ballot`] owns one petition plus a `watch` slot that receives the
//! terminal [`CouncilResult`] exactly once. Awaiters subscribe to the slot and
//! never poll.

use crate::consensus::petition::{CouncilResult, Petition, PetitionStatus, Vote};
use crate::core::{Error, Result};
use std::collections::HashMap;
use tokio::sync::watch;
use tokio::time::Instant;

/// One petition and its result slot.
#[derive(Debug)]
pub(crate) struct Ballot {
    petition: Petition,
    opened: Instant,
    result_tx: watch::Sender<Option<CouncilResult>>,
}

impl Ballot {
    pub(crate) fn new(petition: Petition) -> Self {
        let (result_tx, _) = watch::channel(None);
        Self {
            petition,
            opened: Instant::now(),
            result_tx,
        }
    }

    pub(crate) fn petition(&self) -> &Petition {
        &self.petition
    }

    pub(crate) fn is_pending(&self) -> bool {
        !self.petition.status.is_terminal()
    }

    /// Record a vote, overwriting any earlier vote from the same voter.
    ///
    /// Votes arriving after resolution are kept for audit; they never touch
    /// the published result.
    pub(crate) fn record(&mut self, vote: Vote) {
        self.petition.votes.insert(vote.voter_id.clone(), vote);
    }

    pub(crate) fn elapsed_ms(&self) -> u64 {
        self.opened.elapsed().as_millis() as u64
    }

    /// Move to a terminal status and publish the result.
    ///
    /// Returns `false` (and changes nothing) when already resolved.
    pub(crate) fn resolve(&mut self, status: PetitionStatus, result: CouncilResult) -> bool {
        if !self.is_pending() || !status.is_terminal() {
            return false;
        }
        self.petition.status = status;
        self.result_tx.send_replace(Some(result));
        true
    }

    #[cfg(test)]
    pub(crate) fn result(&self) -> Option<CouncilResult> {
        self.result_tx.borrow().clone()
    }

    /// Build a result for this petition with the elapsed duration filled in.
    pub(crate) fn outcome(
        &self,
        approved: bool,
        approval_rate: f64,
        participation_rate: f64,
        rounds: Option<u32>,
    ) -> CouncilResult {
        CouncilResult {
            petition_id: self.petition.id.clone(),
            approved,
            approval_rate,
            participation_rate,
            final_value: self.petition.value.clone(),
            duration_ms: self.elapsed_ms(),
            rounds,
        }
    }

    fn subscribe(&self) -> watch::Receiver<Option<CouncilResult>> {
        self.result_tx.subscribe()
    }
}

/// Petitions owned by one engine instance.
#[derive(Debug)]
pub(crate) struct PetitionTable {
    ballots: HashMap<String, Ballot>,
    max_pending: usize,
}

impl PetitionTable {
    pub(crate) fn new(max_pending: usize) -> Self {
        Self {
            ballots: HashMap::new(),
            max_pending,
        }
    }

    /// Register a new petition, refusing when too many are pending.
    pub(crate) fn open(&mut self, petition: Petition) -> Result<&mut Ballot> {
        let pending = self.pending_count();
        if pending >= self.max_pending {
            return Err(Error::CapacityExceeded(pending));
        }
        Ok(self.ballots.entry(petition.id.clone()).or_insert_with(|| Ballot::new(petition)))
    }

    /// Register a petition learned from a peer. Existing entries are kept.
    pub(crate) fn adopt(&mut self, petition: Petition) -> &mut Ballot {
        self.ballots
            .entry(petition.id.clone())
            .or_insert_with(|| Ballot::new(petition))
    }

    pub(crate) fn get(&self, id: &str) -> Option<&Ballot> {
        self.ballots.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut Ballot> {
        self.ballots.get_mut(id)
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.ballots.contains_key(id)
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.ballots.values().filter(|b| b.is_pending()).count()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.ballots.len()
    }

    /// Result receiver for a petition.
    pub(crate) fn watch(&self, id: &str) -> Result<watch::Receiver<Option<CouncilResult>>> {
        self.ballots
            .get(id)
            .map(Ballot::subscribe)
            .ok_or_else(|| Error::PetitionNotFound(id.to_string()))
    }

    /// Drop every petition. Pending awaiters observe a withdrawn petition.
    pub(crate) fn clear(&mut self) {
        self.ballots.clear();
    }
}

/// Wait until the slot holds a terminal result.
pub(crate) async fn wait_for_result(
    petition_id: &str,
    mut rx: watch::Receiver<Option<CouncilResult>>,
) -> Result<CouncilResult> {
    match rx.wait_for(|slot| slot.is_some()).await {
        Ok(slot) => slot
            .clone()
            .ok_or_else(|| Error::Internal(format!("empty result slot for {}", petition_id))),
        Err(_) => Err(Error::PetitionWithdrawn(petition_id.to_string())),
    }
}

/// Fraction helper returning 0 for an empty denominator.
pub(crate) fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator <= 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn petition(id: &str) -> Petition {
        Petition::new(id.to_string(), "node", None, 1)
    }

    #[tokio::test]
    async fn test_resolve_exactly_once() {
        let mut table = PetitionTable::new(10);
        let ballot = table.open(petition("p1")).unwrap();
        let first = ballot.outcome(true, 1.0, 1.0, Some(1));
        assert!(ballot.resolve(PetitionStatus::Accepted, first.clone()));

        let second = ballot.outcome(false, 0.0, 1.0, Some(1));
        assert!(!ballot.resolve(PetitionStatus::Rejected, second));
        assert_eq!(ballot.petition().status, PetitionStatus::Accepted);

        let rx = table.watch("p1").unwrap();
        let result = wait_for_result("p1", rx).await.unwrap();
        assert_eq!(result, first);
    }

    #[tokio::test]
    async fn test_late_vote_recorded_not_published() {
        let mut table = PetitionTable::new(10);
        let ballot = table.open(petition("p1")).unwrap();
        ballot.record(Vote::approve("a"));
        let outcome = ballot.outcome(true, 1.0, 1.0, None);
        ballot.resolve(PetitionStatus::Accepted, outcome);
        ballot.record(Vote::reject("b"));

        assert_eq!(ballot.petition().votes.len(), 2);
        assert!(ballot.result().unwrap().approved);
    }

    #[test]
    fn test_watch_unknown_is_not_found() {
        let table = PetitionTable::new(10);
        assert!(matches!(table.watch("nope"), Err(Error::PetitionNotFound(_))));
    }

    #[tokio::test]
    async fn test_clear_withdraws_awaiters() {
        let mut table = PetitionTable::new(10);
        table.open(petition("p1")).unwrap();
        let rx = table.watch("p1").unwrap();
        table.clear();
        let err = wait_for_result("p1", rx).await.unwrap_err();
        assert!(matches!(err, Error::PetitionWithdrawn(_)));
    }

    #[test]
    fn test_capacity_counts_pending_only() {
        let mut table = PetitionTable::new(1);
        table.open(petition("p1")).unwrap();
        assert!(matches!(
            table.open(petition("p2")),
            Err(Error::CapacityExceeded(1))
        ));

        let ballot_p1 = table.get_mut("p1").unwrap();
        let outcome = ballot_p1.outcome(false, 0.0, 0.0, None);
        ballot_p1.resolve(PetitionStatus::Expired, outcome);
        assert!(table.open(petition("p2")).is_ok());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_ratio_zero_denominator() {
        assert_eq!(ratio(1.0, 0.0), 0.0);
        assert_eq!(ratio(1.0, 4.0), 0.25);
    }
}
