//! Client channel: lazily opened, authenticated connections per server.
//!
//! The channel owns at most one [`RpcConnection`] per `host:port`. The first
//! call to a host connects and runs the security handshake; the server
//! instance id it returns is remembered so that a later reconnect to a
//! different process is reported as [`ChannelEvent::ServerRestartDetected`].
//! Dropped connections are reported as [`ChannelEvent::ConnectionClosed`] and
//! re-established in the background.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::callback::{ChatMessage, MessageReceiver};
use crate::connection::{ClientError, RpcConnection};
use crate::error::ChatError;
use crate::events::{ChannelEvent, EventSource};
use crate::protocol::{HandshakeResult, Invocation, Message, ReceiveMessageParams, methods};
use crate::proxy::RemoteUri;
use crate::security::{ConnectionClass, SecurityContext};

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Bounds connecting and every remote call.
    pub call_timeout: Duration,
    /// Delay between background reconnect attempts after a drop.
    pub reconnect_interval: Duration,
    pub auto_reconnect: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            reconnect_interval: Duration::from_secs(3),
            auto_reconnect: true,
        }
    }
}

#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    config: ChannelConfig,
    security: Arc<SecurityContext>,
    events: EventSource,
    connections: Mutex<HashMap<String, Arc<RpcConnection>>>,
    instances: StdMutex<HashMap<String, Uuid>>,
    delivery: RwLock<Option<mpsc::UnboundedSender<ChatMessage>>>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Channel {
    #[must_use]
    pub fn new(config: ChannelConfig, security: Arc<SecurityContext>) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                config,
                security,
                events: EventSource::new(),
                connections: Mutex::new(HashMap::new()),
                instances: StdMutex::new(HashMap::new()),
                delivery: RwLock::new(None),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn security(&self) -> &Arc<SecurityContext> {
        &self.inner.security
    }

    #[must_use]
    pub fn events(&self) -> &EventSource {
        &self.inner.events
    }

    /// Last server instance id seen on `host`.
    #[must_use]
    pub fn server_instance(&self, host: &str) -> Option<Uuid> {
        self.inner
            .instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(host)
            .copied()
    }

    /// Route incoming `ReceiveMessage` callbacks to `receiver`.
    ///
    /// Messages are handed over on a dedicated delivery task. Registering
    /// again replaces the previous receiver.
    pub fn register_receiver<R: MessageReceiver>(&self, receiver: Arc<R>) -> JoinHandle<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<ChatMessage>();
        *self
            .inner
            .delivery
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(tx);

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                receiver.on_message(&message);
            }
            debug!("Delivery task finished");
        })
    }

    /// Invoke `method` on the object `uri` names.
    ///
    /// Calls made through a named proxy (`connection_name` set) carry the
    /// session bound to [`ConnectionClass::Named`]; all others carry the
    /// [`ConnectionClass::Invocation`] session, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Connection`] if the server cannot be reached or
    /// the call fails in transit, [`ChatError::Authentication`] if the
    /// handshake or the call's session is rejected, and
    /// [`ChatError::Protocol`] for anything the server did not understand.
    pub async fn invoke<A, R>(
        &self,
        uri: &RemoteUri,
        method: &str,
        args: A,
        connection_name: Option<&str>,
    ) -> Result<R, ChatError>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let class = if connection_name.is_some() {
            ConnectionClass::Named
        } else {
            ConnectionClass::Invocation
        };
        let invocation = Invocation {
            object: uri.object().to_string(),
            security_session: self.inner.security.session_for(class).map(|s| s.name),
            args,
        };
        let params = serde_json::to_value(&invocation).map_err(ClientError::from)?;

        let connection = self.inner.connection(uri.host()).await?;
        trace!(
            host = uri.host(),
            object = uri.object(),
            method,
            connection = connection_name.unwrap_or("-"),
            "Invoking"
        );
        Ok(connection.request(method, Some(params)).await?)
    }
}

impl ChannelInner {
    async fn connection(self: &Arc<Self>, host: &str) -> Result<Arc<RpcConnection>, ChatError> {
        let mut connections = self.connections.lock().await;
        if let Some(existing) = connections.get(host)
            && !existing.is_closed()
        {
            return Ok(existing.clone());
        }

        let (connection, incoming) =
            RpcConnection::connect(host, self.config.call_timeout).await?;
        let params =
            serde_json::to_value(self.security.handshake_params()).map_err(ClientError::from)?;
        let handshake: HandshakeResult = connection
            .request(methods::HANDSHAKE, Some(params))
            .await?;

        let connection = Arc::new(connection);
        connections.insert(host.to_string(), connection.clone());
        drop(connections);

        let previous = self
            .instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(host.to_string(), handshake.server_instance);

        info!(
            %host,
            principal = %handshake.identity.principal_name,
            instance = %handshake.server_instance,
            "Connected to chat server"
        );
        tokio::spawn(pump(Arc::downgrade(self), host.to_string(), incoming));

        self.events.publish(ChannelEvent::ConnectionEstablished {
            host: host.to_string(),
            server_instance: handshake.server_instance,
        });
        if previous.is_some_and(|old| old != handshake.server_instance) {
            warn!(%host, "Server restart detected");
            self.events.publish(ChannelEvent::ServerRestartDetected {
                host: host.to_string(),
            });
        }

        Ok(connection)
    }

    fn dispatch(&self, host: &str, message: &Message) {
        let Some((method, params)) = message.as_notification() else {
            warn!(%host, "Ignoring unexpected request from server");
            return;
        };
        if method != methods::RECEIVE_MESSAGE {
            debug!(%host, method, "Ignoring unknown notification");
            return;
        }

        let params: ReceiveMessageParams =
            match serde_json::from_value(params.cloned().unwrap_or_default()) {
                Ok(params) => params,
                Err(e) => {
                    warn!(%host, "Malformed {method} notification: {e}");
                    return;
                }
            };

        let delivery = self.delivery.read().unwrap_or_else(PoisonError::into_inner);
        match delivery.as_ref() {
            Some(tx) => {
                if tx.send(ChatMessage::from(params)).is_err() {
                    debug!("Delivery task gone, dropping message");
                }
            }
            None => debug!("No message receiver registered, dropping message"),
        }
    }

    async fn connection_lost(self: &Arc<Self>, host: &str) {
        {
            let mut connections = self.connections.lock().await;
            if connections.get(host).is_some_and(|c| c.is_closed()) {
                connections.remove(host);
            }
        }

        info!(%host, "Connection to chat server lost");
        self.events.publish(ChannelEvent::ConnectionClosed {
            host: host.to_string(),
            nickname: None,
        });

        if self.config.auto_reconnect {
            tokio::spawn(reconnect(Arc::downgrade(self), host.to_string()));
        }
    }
}

async fn pump(channel: Weak<ChannelInner>, host: String, mut incoming: mpsc::Receiver<Message>) {
    while let Some(message) = incoming.recv().await {
        let Some(inner) = channel.upgrade() else {
            return;
        };
        inner.dispatch(&host, &message);
    }

    if let Some(inner) = channel.upgrade() {
        inner.connection_lost(&host).await;
    }
}

// Boxed: `connection` spawns `pump`, which spawns this, which calls `connection`.
fn reconnect(channel: Weak<ChannelInner>, host: String) -> BoxFuture<'static, ()> {
    async move { reconnect_loop(channel, host).await }.boxed()
}

async fn reconnect_loop(channel: Weak<ChannelInner>, host: String) {
    let mut attempt: u32 = 0;
    loop {
        let Some(interval) = channel.upgrade().map(|c| c.config.reconnect_interval) else {
            return;
        };
        tokio::time::sleep(interval).await;

        let Some(inner) = channel.upgrade() else {
            return;
        };
        attempt += 1;
        match inner.connection(&host).await {
            Ok(_) => {
                debug!(%host, attempt, "Reconnected");
                return;
            }
            Err(e) => debug!(%host, attempt, "Reconnect failed: {e}"),
        }
    }
}
