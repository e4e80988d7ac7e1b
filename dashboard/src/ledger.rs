//! Per-poll "has the current user voted" ledger
//!
//! Tracked separately from the vote counts in the store: the counts say
//! how everyone voted, the ledger says whether *this* user did. Absence
//! of an entry means unresolved, not "no".

use parking_lot::RwLock;
use std::collections::HashMap;

use poll_core::{PollId, VoteStatus};

pub struct VoteLedger {
    entries: RwLock<HashMap<PollId, VoteStatus>>,
}

impl VoteLedger {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn has_voted(&self, id: PollId) -> VoteStatus {
        self.entries
            .read()
            .get(&id)
            .copied()
            .unwrap_or(VoteStatus::Unknown)
    }

    /// Records the local user's own vote. Idempotent; once set it sticks
    /// for the rest of the session.
    pub fn mark_voted(&self, id: PollId) {
        self.entries.write().insert(id, VoteStatus::Voted);
    }

    /// Applies the result of a backend vote check. A check that started
    /// before the user voted may complete after `mark_voted`; it must
    /// not clobber that entry, so `Voted` is never downgraded here.
    pub fn apply_check(&self, id: PollId, voted: bool) {
        let mut entries = self.entries.write();
        if entries.get(&id) == Some(&VoteStatus::Voted) {
            return;
        }
        let status = if voted { VoteStatus::Voted } else { VoteStatus::NotVoted };
        entries.insert(id, status);
    }

    /// Drops one entry back to unresolved (failed-submission rollback)
    pub fn clear(&self, id: PollId) {
        self.entries.write().remove(&id);
    }

    /// Session boundary: forget everything
    pub fn reset(&self) {
        self.entries.write().clear();
    }
}

impl Default for VoteLedger {
    fn default() -> Self {
        Self::new()
    }
}
