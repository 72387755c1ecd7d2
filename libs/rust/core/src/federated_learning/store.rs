//! In-memory round book.
//!
//! Every round lives behind its own mutex; all mutations of one round go
//! through that lock. Lock order is store, then round, then participants.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::round::{RoundId, RoundOrigin, RoundStatus, RoundSummary, TrainingRound};
use crate::error::{FederationError, FederationResult};

pub type RoundCell = Arc<Mutex<TrainingRound>>;

#[derive(Default)]
pub struct RoundStore {
    rounds: RwLock<Vec<RoundCell>>,
}

impl RoundStore {
    pub fn new() -> Self { Self::default() }

    /// Creates the next round. At most one round may be live at a time.
    pub fn open(&self, origin: RoundOrigin) -> FederationResult<RoundCell> {
        let mut rounds = self.rounds.write();
        ensure_idle(&rounds)?;
        let number = rounds.last().map(|c| c.lock().round_number + 1).unwrap_or(1);
        let cell = Arc::new(Mutex::new(TrainingRound::new(number, origin)));
        rounds.push(cell.clone());
        Ok(cell)
    }

    /// Runs `f` while no round is live. The store stays write-locked for the
    /// duration, so no round can be opened until `f` returns.
    pub fn when_idle<T>(&self, f: impl FnOnce() -> FederationResult<T>) -> FederationResult<T> {
        let rounds = self.rounds.write();
        ensure_idle(&rounds)?;
        f()
    }

    pub fn cell(&self, id: RoundId) -> FederationResult<RoundCell> {
        self.rounds
            .read()
            .iter()
            .find(|c| c.lock().id == id)
            .cloned()
            .ok_or(FederationError::RoundNotFound(id))
    }

    pub fn snapshot(&self, id: RoundId) -> FederationResult<TrainingRound> {
        Ok(self.cell(id)?.lock().clone())
    }

    /// Newest first.
    pub fn history(&self, limit: usize) -> Vec<RoundSummary> {
        self.rounds.read().iter().rev().take(limit).map(|c| c.lock().summary()).collect()
    }

    pub fn live(&self) -> Option<TrainingRound> {
        self.latest_where(|r| !r.is_terminal())
    }

    pub fn latest_completed(&self) -> Option<TrainingRound> {
        self.latest_where(|r| r.status == RoundStatus::Completed)
    }

    pub fn len(&self) -> usize { self.rounds.read().len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    fn latest_where(&self, pred: impl Fn(&TrainingRound) -> bool) -> Option<TrainingRound> {
        self.rounds.read().iter().rev().find_map(|c| {
            let r = c.lock();
            pred(&r).then(|| r.clone())
        })
    }
}

fn ensure_idle(rounds: &[RoundCell]) -> FederationResult<()> {
    match rounds.iter().rev().find(|c| !c.lock().is_terminal()) {
        Some(live) => Err(FederationError::RoundInProgress(live.lock().id)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_rounds_sequentially() {
        let store = RoundStore::new();
        let first = store.open(RoundOrigin::Orchestrated).unwrap();
        assert_eq!(first.lock().round_number, 1);
        first.lock().fail("nothing to do").unwrap();
        let second = store.open(RoundOrigin::Submissions).unwrap();
        assert_eq!(second.lock().round_number, 2);
    }

    #[test]
    fn refuses_second_live_round() {
        let store = RoundStore::new();
        let live = store.open(RoundOrigin::Orchestrated).unwrap();
        let id = live.lock().id;
        assert!(matches!(store.open(RoundOrigin::Orchestrated), Err(FederationError::RoundInProgress(x)) if x == id));
        assert_eq!(store.live().map(|r| r.id), Some(id));
    }

    #[test]
    fn idle_work_is_refused_while_a_round_is_live() {
        let store = RoundStore::new();
        assert_eq!(store.when_idle(|| Ok(7)).unwrap(), 7);
        let live = store.open(RoundOrigin::Submissions).unwrap();
        let mut ran = false;
        let refused = store.when_idle(|| {
            ran = true;
            Ok(())
        });
        assert!(matches!(refused, Err(FederationError::RoundInProgress(_))));
        assert!(!ran);
        live.lock().fail("closed").unwrap();
        assert!(store.when_idle(|| Ok(())).is_ok());
    }

    #[test]
    fn history_is_newest_first_and_limited() {
        let store = RoundStore::new();
        for _ in 0..4 {
            store.open(RoundOrigin::Orchestrated).unwrap().lock().fail("x").unwrap();
        }
        let h = store.history(2);
        assert_eq!(h.iter().map(|r| r.round_number).collect::<Vec<_>>(), vec![4, 3]);
        assert!(store.latest_completed().is_none());
    }

    #[test]
    fn unknown_round_is_not_found() {
        let store = RoundStore::new();
        assert!(matches!(store.snapshot(RoundId::generate()), Err(FederationError::RoundNotFound(_))));
    }
}
