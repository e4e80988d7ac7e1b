//! Poll API trait definitions

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::model::*;

/// Poll backend contract consumed by the dashboard engine.
///
/// `fetch_all_polls`, `fetch_poll` and `check_user_voted` are idempotent
/// and safe to retry after a transport failure. All calls are issued on
/// behalf of the authenticated user the implementation was built for.
#[async_trait]
pub trait PollApi: Send + Sync {
    /// Bulk fetch of every poll visible to the user
    async fn fetch_all_polls(&self) -> Result<Vec<Poll>, ApiError>;

    /// Fetch a single poll snapshot
    async fn fetch_poll(&self, id: PollId) -> Result<Poll, ApiError>;

    /// Whether the current user has already voted on the given poll
    async fn check_user_voted(&self, id: PollId) -> Result<bool, ApiError>;

    /// Cast a vote. Returns the resulting poll snapshot when the backend
    /// includes one in its response; `None` means the caller has to
    /// re-fetch the poll itself.
    async fn submit_vote(&self, poll_id: PollId, option_id: OptionId) -> Result<Option<Poll>, ApiError>;

    /// Create a new poll (admin operation)
    async fn create_poll(&self, new_poll: NewPoll) -> Result<Poll, ApiError>;
}

/// Push channel contract: per-poll membership calls plus the stream of
/// authoritative snapshots.
///
/// Delivery is at-least-once and order-preserving per poll id; snapshots
/// for different polls may interleave arbitrarily. Duplicates are
/// harmless to apply because every update carries a full snapshot.
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Join the broadcast group for one poll (fire-and-forget)
    async fn subscribe(&self, poll_id: PollId);

    /// Leave the broadcast group for one poll (fire-and-forget)
    async fn unsubscribe(&self, poll_id: PollId);

    /// New receiver for the snapshot stream
    fn updates(&self) -> broadcast::Receiver<PushUpdate>;
}
