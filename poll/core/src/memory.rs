//! In-memory poll service used by tests and the demo binary

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::api::{PollApi, PushChannel};
use crate::model::*;

const UPDATE_BUFFER: usize = 100;

/// Authoritative in-memory poll table with per-user vote records.
///
/// Implements both [`PollApi`] and [`PushChannel`]. Poll mutation and
/// snapshot broadcast happen under one write lock, which upholds the
/// per-poll ordering contract of the push channel.
#[derive(Clone)]
pub struct MemoryPollService {
    user: String,
    shared: Arc<Shared>,
}

struct Shared {
    state: RwLock<ServiceState>,
    updates: broadcast::Sender<PushUpdate>,
    snapshot_in_response: AtomicBool,
}

#[derive(Default)]
struct ServiceState {
    polls: HashMap<PollId, Poll>,
    order: Vec<PollId>,
    voters: HashMap<PollId, HashSet<String>>,
}

impl MemoryPollService {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_BUFFER);
        Self {
            user: "local".to_string(),
            shared: Arc::new(Shared {
                state: RwLock::new(ServiceState::default()),
                updates,
                snapshot_in_response: AtomicBool::new(true),
            }),
        }
    }

    /// Handle onto the same backend, authenticated as another user
    pub fn for_user(&self, user: &str) -> Self {
        Self {
            user: user.to_string(),
            shared: self.shared.clone(),
        }
    }

    /// When disabled, `submit_vote` responds without a snapshot and the
    /// client has to re-fetch the poll itself.
    pub fn set_snapshot_in_response(&self, enabled: bool) {
        self.shared.snapshot_in_response.store(enabled, Ordering::SeqCst);
    }

    fn build_poll(new_poll: &NewPoll) -> Result<Poll, ApiError> {
        let question = new_poll.question.trim();
        if question.is_empty() {
            return Err(ApiError::Validation("Poll question must not be empty".to_string()));
        }

        let options: Vec<PollOption> = new_poll
            .options
            .iter()
            .map(|text| text.trim())
            .filter(|text| !text.is_empty())
            .map(|text| PollOption {
                id: OptionId::new(),
                text: text.to_string(),
                vote_count: 0,
            })
            .collect();

        if options.len() < 2 {
            return Err(ApiError::Validation("A poll needs at least two options".to_string()));
        }

        Ok(Poll {
            id: PollId::new(),
            question: question.to_string(),
            options,
            total_votes: 0,
            created_at: Utc::now(),
        })
    }
}

#[async_trait]
impl PollApi for MemoryPollService {
    async fn fetch_all_polls(&self) -> Result<Vec<Poll>, ApiError> {
        let state = self.shared.state.read();
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.polls.get(id))
            .cloned()
            .collect())
    }

    async fn fetch_poll(&self, id: PollId) -> Result<Poll, ApiError> {
        self.shared
            .state
            .read()
            .polls
            .get(&id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("Poll {} does not exist", id)))
    }

    async fn check_user_voted(&self, id: PollId) -> Result<bool, ApiError> {
        let state = self.shared.state.read();
        if !state.polls.contains_key(&id) {
            return Err(ApiError::NotFound(format!("Poll {} does not exist", id)));
        }
        Ok(state
            .voters
            .get(&id)
            .map(|voters| voters.contains(&self.user))
            .unwrap_or(false))
    }

    async fn submit_vote(&self, poll_id: PollId, option_id: OptionId) -> Result<Option<Poll>, ApiError> {
        let snapshot = {
            let mut state = self.shared.state.write();

            if state
                .voters
                .get(&poll_id)
                .map(|voters| voters.contains(&self.user))
                .unwrap_or(false)
            {
                return Err(ApiError::Validation("User has already voted on this poll".to_string()));
            }

            let poll = state
                .polls
                .get_mut(&poll_id)
                .ok_or_else(|| ApiError::NotFound(format!("Poll {} does not exist", poll_id)))?;
            let option = poll
                .options
                .iter_mut()
                .find(|option| option.id == option_id)
                .ok_or_else(|| {
                    ApiError::Validation(format!("Option {} is not part of poll {}", option_id, poll_id))
                })?;

            option.vote_count += 1;
            poll.total_votes += 1;
            let snapshot = poll.clone();

            state.voters.entry(poll_id).or_default().insert(self.user.clone());

            // Broadcast under the lock so updates for one poll stay ordered
            let _ = self.shared.updates.send(PushUpdate {
                poll_id,
                poll: snapshot.clone(),
            });

            snapshot
        };

        if self.shared.snapshot_in_response.load(Ordering::SeqCst) {
            Ok(Some(snapshot))
        } else {
            Ok(None)
        }
    }

    async fn create_poll(&self, new_poll: NewPoll) -> Result<Poll, ApiError> {
        let poll = Self::build_poll(&new_poll)?;

        let mut state = self.shared.state.write();
        state.order.push(poll.id);
        state.polls.insert(poll.id, poll.clone());
        let _ = self.shared.updates.send(PushUpdate {
            poll_id: poll.id,
            poll: poll.clone(),
        });

        Ok(poll)
    }
}

#[async_trait]
impl PushChannel for MemoryPollService {
    // Membership is a no-op here: the broadcast sender reaches every
    // receiver regardless of poll id.
    async fn subscribe(&self, _poll_id: PollId) {}

    async fn unsubscribe(&self, _poll_id: PollId) {}

    fn updates(&self) -> broadcast::Receiver<PushUpdate> {
        self.shared.updates.subscribe()
    }
}
