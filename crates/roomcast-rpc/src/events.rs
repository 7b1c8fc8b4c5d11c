//! Connection lifecycle event feed.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    ConnectionEstablished {
        host: String,
        server_instance: Uuid,
    },
    /// On the server `nickname` is the member bound to the closed connection.
    ConnectionClosed {
        host: String,
        nickname: Option<String>,
    },
    /// A reconnect to `host` reached a different server process.
    ServerRestartDetected { host: String },
}

/// Callbacks run on the dispatch task spawned by [`EventSource::register`].
///
/// Handlers must not fail: anything that goes wrong is theirs to log.
pub trait EventListener: Send + Sync + 'static {
    fn on_connection_established(
        &self,
        _host: &str,
        _server_instance: Uuid,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }

    fn on_connection_closed(
        &self,
        _host: &str,
        _nickname: Option<&str>,
    ) -> impl Future<Output = ()> + Send {
        async {}
    }

    fn on_server_restart(&self, _host: &str) -> impl Future<Output = ()> + Send {
        async {}
    }
}

#[derive(Debug, Clone)]
pub struct EventSource {
    tx: broadcast::Sender<ChannelEvent>,
}

impl Default for EventSource {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSource {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: ChannelEvent) {
        debug!(?event, "Publishing channel event");
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.tx.subscribe()
    }

    /// Dispatch every future event to `listener` on a dedicated task.
    ///
    /// The task ends when the source is dropped; abort the handle to
    /// unregister earlier.
    pub fn register<L: EventListener>(&self, listener: Arc<L>) -> JoinHandle<()> {
        let mut rx = self.tx.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ChannelEvent::ConnectionEstablished {
                        host,
                        server_instance,
                    }) => {
                        listener
                            .on_connection_established(&host, server_instance)
                            .await;
                    }
                    Ok(ChannelEvent::ConnectionClosed { host, nickname }) => {
                        listener
                            .on_connection_closed(&host, nickname.as_deref())
                            .await;
                    }
                    Ok(ChannelEvent::ServerRestartDetected { host }) => {
                        listener.on_server_restart(&host).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Event listener lagged, skipped {skipped} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl EventListener for Recorder {
        async fn on_connection_closed(&self, host: &str, nickname: Option<&str>) {
            self.seen
                .lock()
                .unwrap()
                .push(format!("closed {host} {}", nickname.unwrap_or("-")));
        }

        async fn on_server_restart(&self, host: &str) {
            self.seen.lock().unwrap().push(format!("restart {host}"));
        }
    }

    #[tokio::test]
    async fn test_register_dispatches_in_order() {
        let source = EventSource::new();
        let recorder = Arc::new(Recorder::default());
        let handle = source.register(recorder.clone());

        source.publish(ChannelEvent::ConnectionClosed {
            host: "h:1".into(),
            nickname: Some("alice".into()),
        });
        source.publish(ChannelEvent::ConnectionEstablished {
            host: "h:1".into(),
            server_instance: Uuid::new_v4(),
        });
        source.publish(ChannelEvent::ServerRestartDetected { host: "h:1".into() });
        drop(source);

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec!["closed h:1 alice".to_string(), "restart h:1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let source = EventSource::new();
        source.publish(ChannelEvent::ServerRestartDetected { host: "x".into() });
        let mut rx = source.subscribe();
        assert!(rx.try_recv().is_err());
    }
}
