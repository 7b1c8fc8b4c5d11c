//! Wiring of the client pieces around one channel.

use std::sync::Arc;

use roomcast_rpc::{
    Channel, ChatError, ChatServerProxy, ConnectionClass, EventListener, KeyProvider,
    MessageReceiver, SecurityContext,
};
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::establisher::Establisher;
use crate::handle::ClientHandle;
use crate::resubscriber::Resubscriber;
use crate::session::ChatSession;

/// Register the configured session and bind it to every connection class.
///
/// # Errors
///
/// Returns [`ChatError::Configuration`] if a bind fails.
pub fn security_context(config: &ClientConfig) -> Result<SecurityContext, ChatError> {
    let security = SecurityContext::new();
    security.set_key(
        config.session_name.clone(),
        KeyProvider::new(config.target_name.clone()),
    );
    for class in [
        ConnectionClass::Persistent,
        ConnectionClass::Named,
        ConnectionClass::Invocation,
    ] {
        security.bind(
            &config.session_name,
            class,
            config.credentials.clone(),
            config.target_name.clone(),
        )?;
    }
    Ok(security)
}

/// Logs every channel lifecycle event.
#[derive(Debug, Default)]
pub struct EventLogger;

impl EventListener for EventLogger {
    async fn on_connection_established(&self, host: &str, server_instance: Uuid) {
        info!(%host, %server_instance, "Connection established");
    }

    async fn on_connection_closed(&self, host: &str, _nickname: Option<&str>) {
        info!(%host, "Connection closed");
    }

    async fn on_server_restart(&self, host: &str) {
        info!(%host, "Server restart detected");
    }
}

/// One chat participant: channel, room handle, establisher and resubscriber.
///
/// Event and callback tasks are aborted when the client is dropped.
#[derive(Debug)]
pub struct ChatClient {
    channel: Channel,
    handle: Arc<ClientHandle>,
    establisher: Arc<Establisher>,
    resubscriber: Arc<Resubscriber>,
    config: ClientConfig,
    tasks: Vec<JoinHandle<()>>,
}

impl ChatClient {
    /// Build a client for `nickname`. Nothing is connected until the first call.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Configuration`] for an unusable security setup or
    /// server address.
    pub fn new(config: ClientConfig, nickname: impl Into<String>) -> Result<Self, ChatError> {
        let security = security_context(&config)?;
        let channel = Channel::new(config.channel_config(), Arc::new(security));
        let server = ChatServerProxy::from_base_uri(channel.clone(), &config.remote_host_uri)?;

        let handle = Arc::new(ClientHandle::new(nickname));
        let establisher = Arc::new(Establisher::new(server));
        let resubscriber = Arc::new(
            Resubscriber::new(Arc::clone(&handle), Arc::clone(&establisher))
                .with_retry_delay(config.retry_policy().delay),
        );

        let tasks = vec![
            channel.events().register(Arc::clone(&resubscriber)),
            channel.events().register(Arc::new(EventLogger)),
        ];

        Ok(Self {
            channel,
            handle,
            establisher,
            resubscriber,
            config,
            tasks,
        })
    }

    /// Route pushed broadcasts to `receiver`.
    pub fn register_receiver<R: MessageReceiver>(&mut self, receiver: Arc<R>) {
        self.tasks.push(self.channel.register_receiver(receiver));
    }

    #[must_use]
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    #[must_use]
    pub fn handle(&self) -> &Arc<ClientHandle> {
        &self.handle
    }

    #[must_use]
    pub fn establisher(&self) -> &Arc<Establisher> {
        &self.establisher
    }

    #[must_use]
    pub fn resubscriber(&self) -> &Arc<Resubscriber> {
        &self.resubscriber
    }

    #[must_use]
    pub fn session(&self) -> ChatSession {
        ChatSession::new(
            Arc::clone(&self.handle),
            Arc::clone(&self.establisher),
            Arc::clone(&self.resubscriber),
            self.config.retry_policy(),
        )
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomcast_rpc::Credentials;

    #[test]
    fn test_security_binds_every_class() {
        let config = ClientConfig {
            credentials: Some(Credentials::shared_secret("alice", "s3cret")),
            ..ClientConfig::default()
        };
        let security = security_context(&config).unwrap();

        for class in [
            ConnectionClass::Persistent,
            ConnectionClass::Named,
            ConnectionClass::Invocation,
        ] {
            let session = security.session_for(class).unwrap();
            assert_eq!(session.name, "/TEST/SSPI1");
            assert_eq!(session.connection_class, class);
        }
    }

    #[tokio::test]
    async fn test_bad_uri_is_configuration_error() {
        let config = ClientConfig {
            remote_host_uri: "tcp://".to_string(),
            ..ClientConfig::default()
        };
        let err = ChatClient::new(config, "alice").unwrap_err();
        assert!(matches!(err, ChatError::Configuration(_)));
    }
}
