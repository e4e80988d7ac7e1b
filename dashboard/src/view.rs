//! Read-only projections of the store for rendering
//!
//! Derives the poll list a renderer needs without mutating anything.
//! Filtering treats an unresolved vote status as "not voted" until the
//! check lands, so unresolved polls stay actionable in the UI.

use serde::Serialize;

use poll_core::{Poll, VoteFilter, VoteStatus};

use crate::ledger::VoteLedger;
use crate::store::PollStore;

/// One poll as the renderer sees it
#[derive(Debug, Clone, Serialize)]
pub struct ProjectedPoll {
    pub poll: Poll,
    pub vote_status: VoteStatus,
}

/// User view: store order, filtered by the ledger tri-state
pub fn project(store: &PollStore, ledger: &VoteLedger, filter: VoteFilter) -> Vec<ProjectedPoll> {
    store
        .all()
        .into_iter()
        .map(|poll| {
            let vote_status = ledger.has_voted(poll.id);
            ProjectedPoll { poll, vote_status }
        })
        .filter(|projected| match filter {
            VoteFilter::All => true,
            VoteFilter::Voted => projected.vote_status == VoteStatus::Voted,
            VoteFilter::NotVoted => projected.vote_status != VoteStatus::Voted,
        })
        .collect()
}

/// Admin view: every poll in creation (insertion) order, regardless of
/// the local user's votes
pub fn admin_overview(store: &PollStore) -> Vec<Poll> {
    store.all()
}
