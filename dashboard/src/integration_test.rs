#[cfg(test)]
mod integration_tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::{broadcast, Semaphore};
    use tokio_test::assert_ok;

    use poll_core::{
        ApiError, MemoryPollService, NewPoll, OptionId, Poll, PollApi, PollId, PushChannel,
        PushUpdate, VoteFilter, VoteStatus,
    };

    use crate::config::DashboardConfig;
    use crate::error::DashboardError;
    use crate::merger::UpdateMerger;
    use crate::view;

    fn new_poll(question: &str, options: &[&str]) -> NewPoll {
        NewPoll {
            question: question.to_string(),
            options: options.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Backend with two polls: P1 untouched, P2 carrying five votes from
    /// other users
    async fn seeded_service() -> (MemoryPollService, Poll, Poll) {
        let service = MemoryPollService::new();
        let admin = service.for_user("admin");
        let p1 = admin
            .create_poll(new_poll("Favorite dining court?", &["North", "South"]))
            .await
            .unwrap();
        let p2 = admin
            .create_poll(new_poll("Best lunch option?", &["Pizza", "Tacos"]))
            .await
            .unwrap();
        for i in 0..5 {
            service
                .for_user(&format!("voter{}", i))
                .submit_vote(p2.id, p2.options[0].id)
                .await
                .unwrap();
        }
        (service, p1, p2)
    }

    fn merger_for(api: Arc<dyn PollApi>, channel: Arc<dyn PushChannel>) -> Arc<UpdateMerger> {
        Arc::new(UpdateMerger::new(api, channel, DashboardConfig::default()))
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) {
        for _ in 0..100 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("Condition not reached in time");
    }

    /// Push channel wrapper that counts membership calls per poll id
    struct CountingChannel {
        inner: MemoryPollService,
        subscribes: Mutex<HashMap<PollId, usize>>,
    }

    impl CountingChannel {
        fn new(inner: MemoryPollService) -> Self {
            Self {
                inner,
                subscribes: Mutex::new(HashMap::new()),
            }
        }

        fn subscribe_count(&self, id: PollId) -> usize {
            self.subscribes.lock().get(&id).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl PushChannel for CountingChannel {
        async fn subscribe(&self, poll_id: PollId) {
            *self.subscribes.lock().entry(poll_id).or_insert(0) += 1;
            self.inner.subscribe(poll_id).await;
        }

        async fn unsubscribe(&self, poll_id: PollId) {
            self.inner.unsubscribe(poll_id).await;
        }

        fn updates(&self) -> broadcast::Receiver<PushUpdate> {
            self.inner.updates()
        }
    }

    /// API wrapper with per-poll check failures and vote failure
    struct FlakyApi {
        inner: MemoryPollService,
        fail_checks: Mutex<HashSet<PollId>>,
        fail_votes: AtomicBool,
        submit_calls: AtomicUsize,
    }

    impl FlakyApi {
        fn new(inner: MemoryPollService) -> Self {
            Self {
                inner,
                fail_checks: Mutex::new(HashSet::new()),
                fail_votes: AtomicBool::new(false),
                submit_calls: AtomicUsize::new(0),
            }
        }

        fn fail_check_for(&self, id: PollId) {
            self.fail_checks.lock().insert(id);
        }

        fn fail_submissions(&self) {
            self.fail_votes.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl PollApi for FlakyApi {
        async fn fetch_all_polls(&self) -> Result<Vec<Poll>, ApiError> {
            self.inner.fetch_all_polls().await
        }

        async fn fetch_poll(&self, id: PollId) -> Result<Poll, ApiError> {
            self.inner.fetch_poll(id).await
        }

        async fn check_user_voted(&self, id: PollId) -> Result<bool, ApiError> {
            if self.fail_checks.lock().contains(&id) {
                return Err(ApiError::Network("connection reset".to_string()));
            }
            self.inner.check_user_voted(id).await
        }

        async fn submit_vote(
            &self,
            poll_id: PollId,
            option_id: OptionId,
        ) -> Result<Option<Poll>, ApiError> {
            self.submit_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_votes.load(Ordering::SeqCst) {
                return Err(ApiError::Network("connection reset".to_string()));
            }
            self.inner.submit_vote(poll_id, option_id).await
        }

        async fn create_poll(&self, new_poll: NewPoll) -> Result<Poll, ApiError> {
            self.inner.create_poll(new_poll).await
        }
    }

    /// API wrapper whose vote checks block until permits are released
    struct GatedApi {
        inner: MemoryPollService,
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl PollApi for GatedApi {
        async fn fetch_all_polls(&self) -> Result<Vec<Poll>, ApiError> {
            self.inner.fetch_all_polls().await
        }

        async fn fetch_poll(&self, id: PollId) -> Result<Poll, ApiError> {
            self.inner.fetch_poll(id).await
        }

        async fn check_user_voted(&self, id: PollId) -> Result<bool, ApiError> {
            let _permit = self.gate.acquire().await;
            self.inner.check_user_voted(id).await
        }

        async fn submit_vote(
            &self,
            poll_id: PollId,
            option_id: OptionId,
        ) -> Result<Option<Poll>, ApiError> {
            self.inner.submit_vote(poll_id, option_id).await
        }

        async fn create_poll(&self, new_poll: NewPoll) -> Result<Poll, ApiError> {
            self.inner.create_poll(new_poll).await
        }
    }

    #[tokio::test]
    async fn test_initial_load_populates_store_and_subscribes_once() {
        let (service, p1, p2) = seeded_service().await;
        let channel = Arc::new(CountingChannel::new(service.clone()));
        let merger = merger_for(Arc::new(service), channel.clone());

        let count = merger.load_polls().await.unwrap();
        assert_eq!(count, 2);

        let cached: Vec<PollId> = merger.store().all().iter().map(|p| p.id).collect();
        assert_eq!(cached, vec![p1.id, p2.id]);
        assert_eq!(merger.store().get(p1.id).unwrap().total_votes, 0);
        assert_eq!(merger.store().get(p2.id).unwrap().total_votes, 5);

        assert_eq!(channel.subscribe_count(p1.id), 1);
        assert_eq!(channel.subscribe_count(p2.id), 1);

        // A refresh re-upserts every poll but never re-subscribes
        merger.refresh().await.unwrap();
        assert_eq!(channel.subscribe_count(p1.id), 1);
        assert_eq!(channel.subscribe_count(p2.id), 1);
    }

    #[tokio::test]
    async fn test_vote_check_fanout_resolves_ledger() {
        let (service, p1, p2) = seeded_service().await;
        // The local user voted on P2 in an earlier session
        service.submit_vote(p2.id, p2.options[1].id).await.unwrap();

        let channel = Arc::new(service.clone());
        let merger = merger_for(Arc::new(service), channel);
        assert_ok!(merger.load_polls().await);

        assert_eq!(merger.ledger().has_voted(p1.id), VoteStatus::NotVoted);
        assert_eq!(merger.ledger().has_voted(p2.id), VoteStatus::Voted);
    }

    #[tokio::test]
    async fn test_optimistic_vote_superseded_by_push() {
        let (service, p1, _) = seeded_service().await;
        let channel = Arc::new(service.clone());
        let merger = merger_for(Arc::new(service.clone()), channel);
        merger.load_polls().await.unwrap();

        let mut updates = service.updates();
        let choice = p1.options[0].id;
        merger.submit_vote(p1.id, choice).await.unwrap();

        // Two other users vote before our view settles; their pushed
        // snapshots carry the authoritative totals
        service
            .for_user("bob")
            .submit_vote(p1.id, p1.options[1].id)
            .await
            .unwrap();
        service
            .for_user("carol")
            .submit_vote(p1.id, p1.options[1].id)
            .await
            .unwrap();
        while let Ok(update) = updates.try_recv() {
            merger.apply_push(update).await;
        }

        let cached = merger.store().get(p1.id).unwrap();
        assert_eq!(cached.total_votes, 3);
        assert!(cached.tally_consistent());
        // The push never touches the ledger
        assert_eq!(merger.ledger().has_voted(p1.id), VoteStatus::Voted);
    }

    #[tokio::test]
    async fn test_optimistic_increment_is_visible_before_confirmation() {
        let (service, p1, _) = seeded_service().await;
        let channel = Arc::new(service.clone());
        let merger = merger_for(Arc::new(service), channel);
        merger.load_polls().await.unwrap();

        merger
            .store()
            .apply_optimistic_vote(p1.id, p1.options[0].id)
            .unwrap();

        let cached = merger.store().get(p1.id).unwrap();
        assert_eq!(cached.total_votes, 1);
        assert_eq!(cached.options[0].vote_count, 1);
    }

    #[tokio::test]
    async fn test_push_pump_applies_remote_votes() {
        let (service, p1, _) = seeded_service().await;
        let channel = Arc::new(service.clone());
        let merger = merger_for(Arc::new(service.clone()), channel);
        merger.load_polls().await.unwrap();
        let pump = merger.clone().spawn_push_pump();

        service
            .for_user("bob")
            .submit_vote(p1.id, p1.options[0].id)
            .await
            .unwrap();

        let store = merger.clone();
        let id = p1.id;
        wait_until(move || store.store().get(id).map(|p| p.total_votes) == Some(1)).await;
        // Someone else's vote leaves our ledger alone
        assert_eq!(merger.ledger().has_voted(id), VoteStatus::NotVoted);

        pump.abort();
    }

    #[tokio::test]
    async fn test_poll_created_while_watching_appears_and_subscribes() {
        let (service, _, _) = seeded_service().await;
        let channel = Arc::new(CountingChannel::new(service.clone()));
        let merger = merger_for(Arc::new(service.clone()), channel.clone());
        merger.load_polls().await.unwrap();
        let pump = merger.clone().spawn_push_pump();

        let created = service
            .for_user("admin")
            .create_poll(new_poll("Breakfast?", &["Bagel", "Cereal"]))
            .await
            .unwrap();

        let store = merger.clone();
        let id = created.id;
        wait_until(move || store.store().contains(id)).await;
        assert_eq!(channel.subscribe_count(id), 1);
        assert_eq!(merger.store().len(), 3);

        pump.abort();
    }

    #[tokio::test]
    async fn test_check_failure_leaves_status_unknown() {
        let (service, p1, p2) = seeded_service().await;
        let api = Arc::new(FlakyApi::new(service.clone()));
        api.fail_check_for(p2.id);
        let merger = merger_for(api, Arc::new(service));

        merger.load_polls().await.unwrap();

        assert_eq!(merger.ledger().has_voted(p1.id), VoteStatus::NotVoted);
        assert_eq!(merger.ledger().has_voted(p2.id), VoteStatus::Unknown);

        // Unresolved polls stay in the not-voted view and out of the
        // voted one
        let not_voted = view::project(merger.store(), merger.ledger(), VoteFilter::NotVoted);
        assert!(not_voted.iter().any(|p| p.poll.id == p2.id));
        let voted = view::project(merger.store(), merger.ledger(), VoteFilter::Voted);
        assert!(voted.iter().all(|p| p.poll.id != p2.id));
    }

    #[tokio::test]
    async fn test_failed_submission_rolls_back() {
        let (service, p1, _) = seeded_service().await;
        let api = Arc::new(FlakyApi::new(service.clone()));
        let merger = merger_for(api.clone(), Arc::new(service));
        merger.load_polls().await.unwrap();

        api.fail_submissions();
        let result = merger.submit_vote(p1.id, p1.options[0].id).await;
        assert!(matches!(result, Err(DashboardError::Transport(_))));

        // Counts restored, ledger entry dropped back to unresolved
        let cached = merger.store().get(p1.id).unwrap();
        assert_eq!(cached.total_votes, 0);
        assert_eq!(cached.options[0].vote_count, 0);
        assert_eq!(merger.ledger().has_voted(p1.id), VoteStatus::Unknown);
    }

    #[tokio::test]
    async fn test_vote_without_snapshot_refetches() {
        let (service, p1, _) = seeded_service().await;
        service.set_snapshot_in_response(false);
        let channel = Arc::new(service.clone());
        let merger = merger_for(Arc::new(service), channel);
        merger.load_polls().await.unwrap();

        let confirmed = merger.submit_vote(p1.id, p1.options[0].id).await.unwrap();
        assert_eq!(confirmed.total_votes, 1);
        assert!(confirmed.tally_consistent());
        assert_eq!(merger.store().get(p1.id).unwrap().total_votes, 1);
        assert_eq!(merger.ledger().has_voted(p1.id), VoteStatus::Voted);
    }

    #[tokio::test]
    async fn test_vote_validation_rejects_before_network() {
        let (service, p1, _) = seeded_service().await;
        let api = Arc::new(FlakyApi::new(service.clone()));
        let merger = merger_for(api.clone(), Arc::new(service));
        merger.load_polls().await.unwrap();

        let unknown_poll = merger.submit_vote(PollId::new(), p1.options[0].id).await;
        assert!(matches!(unknown_poll, Err(DashboardError::NotFound(_))));

        let unknown_option = merger.submit_vote(p1.id, OptionId::new()).await;
        assert!(matches!(unknown_option, Err(DashboardError::InvalidInput(_))));

        assert_eq!(api.submit_calls.load(Ordering::SeqCst), 0);

        // A second vote on the same poll is rejected locally too
        merger.submit_vote(p1.id, p1.options[0].id).await.unwrap();
        let duplicate = merger.submit_vote(p1.id, p1.options[1].id).await;
        assert!(matches!(duplicate, Err(DashboardError::InvalidInput(_))));
        assert_eq!(api.submit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_create_poll_validates_and_subscribes() {
        let (service, _, _) = seeded_service().await;
        let channel = Arc::new(CountingChannel::new(service.clone()));
        let merger = merger_for(Arc::new(service), channel.clone());
        merger.load_polls().await.unwrap();

        let too_few = merger.create_poll(new_poll("Breakfast?", &["Bagel", " "])).await;
        assert!(matches!(too_few, Err(DashboardError::InvalidInput(_))));

        let created = merger
            .create_poll(new_poll("Breakfast?", &["Bagel", "Cereal"]))
            .await
            .unwrap();
        assert!(merger.store().contains(created.id));
        assert_eq!(channel.subscribe_count(created.id), 1);

        // Creation order is preserved for the admin overview
        let overview = view::admin_overview(merger.store());
        assert_eq!(overview.last().map(|p| p.id), Some(created.id));
    }

    #[tokio::test]
    async fn test_stale_vote_checks_are_discarded() {
        let (service, p1, p2) = seeded_service().await;
        let gate = Arc::new(Semaphore::new(0));
        let api = Arc::new(GatedApi {
            inner: service.clone(),
            gate: gate.clone(),
        });
        let merger = merger_for(api, Arc::new(service));

        let loader = merger.clone();
        let task = tokio::spawn(async move { loader.load_polls().await });

        // Let the load reach the gated vote checks, then log out
        tokio::time::sleep(Duration::from_millis(20)).await;
        merger.end_session().await;
        gate.add_permits(16);
        task.await.unwrap().unwrap();

        // Nothing from the old generation was applied
        assert!(merger.store().is_empty());
        assert_eq!(merger.ledger().has_voted(p1.id), VoteStatus::Unknown);
        assert_eq!(merger.ledger().has_voted(p2.id), VoteStatus::Unknown);
        assert_eq!(merger.subscriptions().active_count(), 0);
    }

    #[tokio::test]
    async fn test_end_session_clears_everything() {
        let (service, p1, _) = seeded_service().await;
        let channel = Arc::new(service.clone());
        let merger = merger_for(Arc::new(service), channel);
        merger.load_polls().await.unwrap();
        merger.submit_vote(p1.id, p1.options[0].id).await.unwrap();

        merger.end_session().await;

        assert!(merger.store().is_empty());
        assert_eq!(merger.ledger().has_voted(p1.id), VoteStatus::Unknown);
        assert_eq!(merger.subscriptions().active_count(), 0);
    }

    #[tokio::test]
    async fn test_remove_poll_drops_subscription() {
        let (service, p1, p2) = seeded_service().await;
        let channel = Arc::new(CountingChannel::new(service.clone()));
        let merger = merger_for(Arc::new(service), channel);
        merger.load_polls().await.unwrap();

        assert!(merger.remove_poll(p1.id).await.is_some());
        assert!(merger.remove_poll(p1.id).await.is_none());

        assert_eq!(merger.store().ids(), vec![p2.id]);
        assert_eq!(merger.subscriptions().active_count(), 1);
    }
}
