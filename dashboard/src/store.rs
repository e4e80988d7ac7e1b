//! Keyed cache of poll entities
//!
//! The store is the single local source of truth for poll state.
//! Snapshots replace entries wholesale (`upsert`); the only partial
//! mutation is the optimistic vote increment, which exists to mask the
//! round trip of the local user's own vote.

use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::warn;

use poll_core::{OptionId, Poll, PollId};

use crate::error::{DashboardError, Result};

pub struct PollStore {
    inner: RwLock<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    polls: HashMap<PollId, Poll>,
    // Insertion order doubles as display order for the admin view
    order: Vec<PollId>,
}

impl PollStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
        }
    }

    /// Inserts or replaces the poll at `poll.id` with a full snapshot.
    /// The last snapshot applied wins. Returns true when the id was not
    /// cached before.
    pub fn upsert(&self, poll: Poll) -> bool {
        if !poll.tally_consistent() {
            warn!(
                "Accepted inconsistent snapshot for poll {}: total {} != option sum",
                poll.id, poll.total_votes
            );
        }

        let mut inner = self.inner.write();
        let is_new = !inner.polls.contains_key(&poll.id);
        if is_new {
            inner.order.push(poll.id);
        }
        inner.polls.insert(poll.id, poll);
        is_new
    }

    pub fn get(&self, id: PollId) -> Option<Poll> {
        self.inner.read().polls.get(&id).cloned()
    }

    /// All cached polls in insertion order
    pub fn all(&self) -> Vec<Poll> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.polls.get(id))
            .cloned()
            .collect()
    }

    pub fn ids(&self) -> Vec<PollId> {
        self.inner.read().order.clone()
    }

    pub fn contains(&self, id: PollId) -> bool {
        self.inner.read().polls.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().polls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().polls.is_empty()
    }

    /// Increments the named option and the poll total in place, ahead of
    /// server confirmation. The next authoritative snapshot for this
    /// poll overwrites the guess.
    pub fn apply_optimistic_vote(&self, poll_id: PollId, option_id: OptionId) -> Result<()> {
        let mut inner = self.inner.write();
        let poll = inner
            .polls
            .get_mut(&poll_id)
            .ok_or_else(|| DashboardError::NotFound(format!("Poll {} is not cached", poll_id)))?;
        let option = poll
            .options
            .iter_mut()
            .find(|option| option.id == option_id)
            .ok_or_else(|| {
                DashboardError::NotFound(format!("Option {} is not part of poll {}", option_id, poll_id))
            })?;

        option.vote_count += 1;
        poll.total_votes += 1;
        Ok(())
    }

    /// Undoes one optimistic increment after a failed submission
    pub fn revert_optimistic_vote(&self, poll_id: PollId, option_id: OptionId) -> Result<()> {
        let mut inner = self.inner.write();
        let poll = inner
            .polls
            .get_mut(&poll_id)
            .ok_or_else(|| DashboardError::NotFound(format!("Poll {} is not cached", poll_id)))?;
        let option = poll
            .options
            .iter_mut()
            .find(|option| option.id == option_id)
            .ok_or_else(|| {
                DashboardError::NotFound(format!("Option {} is not part of poll {}", option_id, poll_id))
            })?;

        option.vote_count = option.vote_count.saturating_sub(1);
        poll.total_votes = poll.total_votes.saturating_sub(1);
        Ok(())
    }

    pub fn remove(&self, id: PollId) -> Option<Poll> {
        let mut inner = self.inner.write();
        let removed = inner.polls.remove(&id);
        if removed.is_some() {
            inner.order.retain(|cached| *cached != id);
        }
        removed
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.polls.clear();
        inner.order.clear();
    }
}

impl Default for PollStore {
    fn default() -> Self {
        Self::new()
    }
}
