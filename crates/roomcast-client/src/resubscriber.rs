//! Subscription state machine and restart-triggered rejoin.
//!
//! ```text
//! Disconnected -> Connecting -> Subscribed -> Resubscribing -> Subscribed
//!                     ^             |
//!                     +-- send failed
//! ```
//!
//! Any state moves to `Disconnected` when the client stops. A rejoin keeps
//! retrying in `Resubscribing` until it succeeds or the client stops.

use std::sync::Arc;
use std::time::Duration;

use roomcast_rpc::EventListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::establisher::Establisher;
use crate::handle::ClientHandle;

const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Disconnected,
    Connecting,
    Subscribed,
    Resubscribing,
}

/// Rejoins the room when the channel reports a server restart.
#[derive(Debug)]
pub struct Resubscriber {
    handle: Arc<ClientHandle>,
    establisher: Arc<Establisher>,
    state: watch::Sender<SubscriptionState>,
    retry_delay: Duration,
}

impl Resubscriber {
    #[must_use]
    pub fn new(handle: Arc<ClientHandle>, establisher: Arc<Establisher>) -> Self {
        let (state, _) = watch::channel(SubscriptionState::Disconnected);
        Self {
            handle,
            establisher,
            state,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Pause between failed rejoin attempts.
    #[must_use]
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SubscriptionState> {
        self.state.subscribe()
    }

    /// Start a foreground join. Refused while a rejoin is running.
    pub fn begin_connecting(&self) -> bool {
        self.update(|state| {
            matches!(
                state,
                SubscriptionState::Disconnected | SubscriptionState::Subscribed
            )
            .then_some(SubscriptionState::Connecting)
        })
    }

    /// Finish a foreground join.
    pub fn mark_subscribed(&self) -> bool {
        self.transition(SubscriptionState::Connecting, SubscriptionState::Subscribed)
    }

    /// A send failed; the foreground loop will join again.
    pub fn mark_send_failed(&self) -> bool {
        self.transition(SubscriptionState::Subscribed, SubscriptionState::Connecting)
    }

    pub fn mark_disconnected(&self) {
        self.update(|state| {
            (state != SubscriptionState::Disconnected).then_some(SubscriptionState::Disconnected)
        });
    }

    /// Wait until no rejoin is running and return the state it settled in.
    pub async fn settled(&self) -> SubscriptionState {
        let mut rx = self.state.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            if state != SubscriptionState::Resubscribing {
                return state;
            }
            if rx.changed().await.is_err() {
                return state;
            }
        }
    }

    fn update(&self, next: impl FnOnce(SubscriptionState) -> Option<SubscriptionState>) -> bool {
        self.state.send_if_modified(|state| {
            let Some(to) = next(*state) else {
                return false;
            };
            debug!(from = ?*state, ?to, "Subscription state");
            *state = to;
            true
        })
    }

    /// Move `from -> to` only if the state is still `from`.
    fn transition(&self, from: SubscriptionState, to: SubscriptionState) -> bool {
        self.update(|state| (state == from).then_some(to))
    }

    /// Re-run the join protocol after `host` restarted.
    ///
    /// Only a subscribed client rejoins here; a client that is connecting
    /// is already in the foreground retry loop. Failed attempts are logged
    /// and retried after the retry delay until one succeeds or the client
    /// stops.
    pub async fn resubscribe(&self, host: &str) {
        if !self.transition(SubscriptionState::Subscribed, SubscriptionState::Resubscribing) {
            debug!(%host, state = ?self.state(), "Restart seen while not subscribed");
            return;
        }

        warn!(%host, nickname = self.handle.nickname(), "Server restarted, re-entering the chat room");
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let joined = self
                .establisher
                .join_if(&self.handle, || self.state() == SubscriptionState::Resubscribing)
                .await;
            match joined {
                Ok(room) => {
                    if self.transition(SubscriptionState::Resubscribing, SubscriptionState::Subscribed) {
                        info!(room = room.room(), attempt, "Resubscribed after server restart");
                    }
                    break;
                }
                Err(e) => {
                    warn!(
                        %host,
                        attempt,
                        "Resubscription failed: {e}. Next attempt in {:?}.",
                        self.retry_delay
                    );
                }
            }

            tokio::time::sleep(self.retry_delay).await;
            if self.state() != SubscriptionState::Resubscribing {
                break;
            }
        }
    }
}

impl EventListener for Resubscriber {
    async fn on_server_restart(&self, host: &str) {
        self.resubscribe(host).await;
    }
}
