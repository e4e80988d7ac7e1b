//! Update reconciliation
//!
//! The merger is the single place where optimistic, fetched, and pushed
//! poll data compete and resolve. Everything funnels through here: the
//! initial bulk load, the per-poll vote-check fan-out, pushed
//! authoritative snapshots, and the local user's own votes. For any one
//! poll the last full snapshot applied wins; optimistic increments only
//! mask the round trip of the local vote and are superseded by the next
//! snapshot.

use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use poll_core::{NewPoll, OptionId, Poll, PollApi, PollId, PushChannel, PushUpdate, VoteStatus};

use crate::config::DashboardConfig;
use crate::error::{DashboardError, Result};
use crate::ledger::VoteLedger;
use crate::session::SessionHandle;
use crate::store::PollStore;
use crate::subscriptions::SubscriptionManager;

pub struct UpdateMerger {
    api: Arc<dyn PollApi>,
    channel: Arc<dyn PushChannel>,
    store: PollStore,
    ledger: VoteLedger,
    subscriptions: SubscriptionManager,
    session: SessionHandle,
    config: DashboardConfig,
}

impl UpdateMerger {
    pub fn new(api: Arc<dyn PollApi>, channel: Arc<dyn PushChannel>, config: DashboardConfig) -> Self {
        Self {
            api,
            subscriptions: SubscriptionManager::new(channel.clone()),
            channel,
            store: PollStore::new(),
            ledger: VoteLedger::new(),
            session: SessionHandle::new(),
            config,
        }
    }

    pub fn store(&self) -> &PollStore {
        &self.store
    }

    pub fn ledger(&self) -> &VoteLedger {
        &self.ledger
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Bulk load: fetches every poll, caches them in received order,
    /// subscribes new ids, then resolves the user's vote status per poll.
    /// Returns the number of polls fetched.
    pub async fn load_polls(&self) -> Result<usize> {
        let generation = self.session.generation();

        let polls = self.api.fetch_all_polls().await?;
        if !self.session.is_current(generation) {
            return Err(DashboardError::StaleSession);
        }

        let count = polls.len();
        info!("Loaded {} polls", count);
        for poll in polls {
            let poll_id = poll.id;
            if self.store.upsert(poll) {
                self.subscriptions.ensure_subscribed(poll_id).await;
            }
        }

        self.resolve_vote_checks(generation).await;
        Ok(count)
    }

    /// Re-runs the bulk load against the current cache
    pub async fn refresh(&self) -> Result<usize> {
        self.load_polls().await
    }

    /// Fans out one vote check per cached poll. Checks run concurrently;
    /// completions apply to the ledger in whatever order they land. A
    /// failed check leaves that poll unresolved rather than "not voted".
    async fn resolve_vote_checks(&self, generation: u64) {
        let concurrency = self.config.sync.vote_check_concurrency.max(1);
        let checks = stream::iter(self.store.ids().into_iter().map(|id| {
            let api = self.api.clone();
            async move { (id, api.check_user_voted(id).await) }
        }))
        .buffer_unordered(concurrency);
        futures_util::pin_mut!(checks);

        while let Some((poll_id, result)) = checks.next().await {
            if !self.session.is_current(generation) {
                debug!("Discarding vote check results from an ended session");
                return;
            }
            match result {
                Ok(voted) => self.ledger.apply_check(poll_id, voted),
                Err(err) => warn!("Vote check for poll {} failed: {}", poll_id, err),
            }
        }
    }

    /// Applies one pushed authoritative snapshot. A poll id seen for the
    /// first time is an insert (poll created) and gets a subscription.
    /// Duplicates are harmless: the snapshot replaces the entry wholesale.
    pub async fn apply_push(&self, update: PushUpdate) {
        let PushUpdate { poll_id, poll } = update;
        debug!("Applying pushed snapshot for poll {}", poll_id);
        if self.store.upsert(poll) {
            info!("Poll {} first seen via push", poll_id);
            self.subscriptions.ensure_subscribed(poll_id).await;
        }
    }

    /// Casts the local user's vote. The selection is validated against
    /// the cached poll before any network call; the increment is applied
    /// optimistically so the voter sees it without waiting for the round
    /// trip, then the server's snapshot (from the response, or from one
    /// targeted re-fetch) overwrites the guess. A rejected submission
    /// rolls the increment back and clears the ledger entry.
    pub async fn submit_vote(&self, poll_id: PollId, option_id: OptionId) -> Result<Poll> {
        let generation = self.session.generation();

        let cached = self
            .store
            .get(poll_id)
            .ok_or_else(|| DashboardError::NotFound(format!("Poll {} is not cached", poll_id)))?;
        if cached.option(option_id).is_none() {
            return Err(DashboardError::InvalidInput(format!(
                "Option {} is not part of poll {}",
                option_id, poll_id
            )));
        }
        if self.ledger.has_voted(poll_id) == VoteStatus::Voted {
            return Err(DashboardError::InvalidInput(format!(
                "Already voted on poll {}",
                poll_id
            )));
        }

        self.store.apply_optimistic_vote(poll_id, option_id)?;
        self.ledger.mark_voted(poll_id);

        match self.api.submit_vote(poll_id, option_id).await {
            Ok(response) => {
                if !self.session.is_current(generation) {
                    return Err(DashboardError::StaleSession);
                }
                let snapshot = match response {
                    Some(snapshot) => snapshot,
                    // No snapshot in the response: one targeted re-fetch
                    None => match self.api.fetch_poll(poll_id).await {
                        Ok(snapshot) => snapshot,
                        Err(err) => {
                            // The vote was accepted upstream; keep the
                            // optimistic view and let the next push or
                            // refresh settle the counts
                            warn!("Re-fetch after vote on poll {} failed: {}", poll_id, err);
                            return self.store.get(poll_id).ok_or(DashboardError::StaleSession);
                        }
                    },
                };
                if !self.session.is_current(generation) {
                    return Err(DashboardError::StaleSession);
                }
                self.store.upsert(snapshot.clone());
                info!("Vote on poll {} confirmed, total now {}", poll_id, snapshot.total_votes);
                Ok(snapshot)
            }
            Err(err) => {
                warn!("Vote submission for poll {} failed: {}", poll_id, err);
                if self.session.is_current(generation) {
                    let _ = self.store.revert_optimistic_vote(poll_id, option_id);
                    self.ledger.clear(poll_id);
                }
                Err(err.into())
            }
        }
    }

    /// Creates a poll (admin operation) and caches the returned snapshot
    pub async fn create_poll(&self, new_poll: NewPoll) -> Result<Poll> {
        let generation = self.session.generation();

        if new_poll.question.trim().is_empty() {
            return Err(DashboardError::InvalidInput(
                "Poll question must not be empty".to_string(),
            ));
        }
        let filled = new_poll
            .options
            .iter()
            .filter(|option| !option.trim().is_empty())
            .count();
        if filled < 2 {
            return Err(DashboardError::InvalidInput(
                "Please provide at least 2 options".to_string(),
            ));
        }

        let poll = self.api.create_poll(new_poll).await?;
        if !self.session.is_current(generation) {
            return Err(DashboardError::StaleSession);
        }

        info!("Created poll {}", poll.id);
        if self.store.upsert(poll.clone()) {
            self.subscriptions.ensure_subscribed(poll.id).await;
        }
        Ok(poll)
    }

    /// Collaborator-signaled poll deletion
    pub async fn remove_poll(&self, poll_id: PollId) -> Option<Poll> {
        let removed = self.store.remove(poll_id);
        if removed.is_some() {
            info!("Removed poll {}", poll_id);
            self.subscriptions.drop_subscription(poll_id).await;
        }
        removed
    }

    /// Spawns the task that feeds pushed snapshots into the merger. The
    /// task ends when the channel closes or the session generation moves
    /// on; a lagged receiver triggers a full resync when configured.
    pub fn spawn_push_pump(self: Arc<Self>) -> JoinHandle<()> {
        let merger = self;
        let mut updates = merger.channel.updates();
        let generation = merger.session.generation();

        tokio::spawn(async move {
            loop {
                match updates.recv().await {
                    Ok(update) => {
                        if !merger.session.is_current(generation) {
                            debug!("Push pump stopping: session ended");
                            break;
                        }
                        merger.apply_push(update).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Push channel lagged, {} updates lost", skipped);
                        if merger.config.push.resync_on_lag {
                            if let Err(err) = merger.load_polls().await {
                                warn!("Resync after push lag failed: {}", err);
                            }
                        }
                    }
                    Err(RecvError::Closed) => {
                        info!("Push channel closed");
                        break;
                    }
                }
            }
        })
    }

    /// Logout: invalidates in-flight work, drops every subscription and
    /// forgets all local poll state
    pub async fn end_session(&self) {
        self.session.bump();
        self.subscriptions.shutdown().await;
        self.ledger.reset();
        self.store.clear();
        info!("Session ended, local poll state cleared");
    }
}
