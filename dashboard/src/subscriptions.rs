//! Push subscription management
//!
//! Maintains exactly one logical channel subscription per cached poll
//! id. The state slot is reserved under the lock before any channel
//! call goes out, so issuing two subscribes for the same id is
//! structurally impossible rather than merely avoided.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use poll_core::{PollId, PushChannel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Subscribing,
    Subscribed,
}

pub struct SubscriptionManager {
    channel: Arc<dyn PushChannel>,
    states: Mutex<HashMap<PollId, SubscriptionState>>,
}

impl SubscriptionManager {
    pub fn new(channel: Arc<dyn PushChannel>) -> Self {
        Self {
            channel,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribes the poll id unless a subscription already exists or is
    /// being set up. Re-ensuring a known id is a no-op.
    pub async fn ensure_subscribed(&self, poll_id: PollId) {
        {
            let mut states = self.states.lock();
            if states.contains_key(&poll_id) {
                return;
            }
            states.insert(poll_id, SubscriptionState::Subscribing);
        }

        self.channel.subscribe(poll_id).await;

        let torn_down = {
            let mut states = self.states.lock();
            match states.get_mut(&poll_id) {
                Some(state) => {
                    *state = SubscriptionState::Subscribed;
                    false
                }
                // A teardown raced the subscribe call; the channel-side
                // membership must not outlive our record of it
                None => true,
            }
        };
        if torn_down {
            debug!("Subscription for poll {} torn down mid-subscribe", poll_id);
            self.channel.unsubscribe(poll_id).await;
        }
    }

    /// Drops the subscription for a removed poll
    pub async fn drop_subscription(&self, poll_id: PollId) {
        let known = self.states.lock().remove(&poll_id).is_some();
        if known {
            self.channel.unsubscribe(poll_id).await;
        }
    }

    /// Session teardown: unsubscribes every tracked poll
    pub async fn shutdown(&self) {
        let ids: Vec<PollId> = {
            let mut states = self.states.lock();
            states.drain().map(|(id, _)| id).collect()
        };
        for id in ids {
            self.channel.unsubscribe(id).await;
        }
    }

    pub fn state(&self, poll_id: PollId) -> Option<SubscriptionState> {
        self.states.lock().get(&poll_id).copied()
    }

    pub fn active_count(&self) -> usize {
        self.states.lock().len()
    }
}
