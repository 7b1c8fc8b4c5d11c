//! Channel behaviour against a scripted in-process server.
//!
//! The mock speaks just enough of the protocol to exercise the handshake,
//! restart detection, reconnects and callback delivery.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use roomcast_rpc::protocol::{HandshakeParams, HandshakeResult, Invocation, methods};
use roomcast_rpc::{
    Channel, ChannelConfig, ChannelEvent, ChatError, ChatMessage, ChatServerProxy, ConnectionClass,
    Identity, KeyProvider, Message, MessageCodec, MessageReceiver, Notification, Response,
    RpcError, SecurityContext,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::Framed;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(5);

struct MockServer {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl MockServer {
    async fn start(addr: &str, instance: Uuid, required_session: Option<&'static str>) -> Self {
        let listener = TcpListener::bind(addr).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let mut connections = JoinSet::new();
            while let Ok((stream, _)) = listener.accept().await {
                connections.spawn(serve(stream, instance, required_session));
            }
        });
        Self { addr, task }
    }

    fn base_uri(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    /// Stop accepting and drop every open connection.
    async fn shutdown(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

async fn serve(stream: TcpStream, instance: Uuid, required_session: Option<&'static str>) {
    let mut framed = Framed::new(stream, MessageCodec::new());
    while let Some(Ok(Message::Request(req))) = framed.next().await {
        let Some(id) = req.id.clone() else { continue };
        let params = req.params.clone().unwrap_or_default();

        let response = match req.method.as_str() {
            methods::HANDSHAKE => {
                let params: HandshakeParams = serde_json::from_value(params).unwrap();
                if required_session.is_some() && params.session_name.as_deref() != required_session
                {
                    Response::error(id, RpcError::authentication_failed("unknown session"))
                } else {
                    let result = HandshakeResult {
                        server_instance: instance,
                        identity: Identity::anonymous(),
                    };
                    Response::success(id, serde_json::to_value(result).unwrap())
                }
            }
            methods::TEST => {
                let invocation: Invocation<serde_json::Value> =
                    serde_json::from_value(params).unwrap();
                let push = Notification::new(
                    methods::RECEIVE_MESSAGE,
                    Some(serde_json::json!({"message": "welcome", "nickname": "server"})),
                );
                framed.send(Message::Notification(push)).await.unwrap();
                let reply = invocation
                    .security_session
                    .unwrap_or_else(|| "no session".to_string());
                Response::success(id, serde_json::json!(reply))
            }
            other => Response::error(id, RpcError::method_not_found(other)),
        };
        if framed.send(Message::Response(response)).await.is_err() {
            break;
        }
    }
}

fn fast_config() -> ChannelConfig {
    ChannelConfig {
        call_timeout: Duration::from_secs(5),
        reconnect_interval: Duration::from_millis(50),
        auto_reconnect: true,
    }
}

async fn next_matching(
    rx: &mut broadcast::Receiver<ChannelEvent>,
    pred: impl Fn(&ChannelEvent) -> bool,
) -> ChannelEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = rx.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event should arrive")
}

#[tokio::test]
async fn test_first_connection_reports_instance_without_restart() {
    let instance = Uuid::new_v4();
    let server = MockServer::start("127.0.0.1:0", instance, None).await;
    let channel = Channel::new(fast_config(), Arc::new(SecurityContext::new()));
    let mut events = channel.events().subscribe();

    let proxy = ChatServerProxy::from_base_uri(channel.clone(), &server.base_uri()).unwrap();
    assert_eq!(proxy.test().await.unwrap(), "no session");

    let event = next_matching(&mut events, |_| true).await;
    assert_eq!(
        event,
        ChannelEvent::ConnectionEstablished {
            host: server.addr.to_string(),
            server_instance: instance,
        }
    );
    assert_eq!(channel.server_instance(&server.addr.to_string()), Some(instance));
    assert!(events.try_recv().is_err(), "no restart on first connect");

    server.shutdown().await;
}

#[tokio::test]
async fn test_restart_on_same_port_is_detected() {
    let server = MockServer::start("127.0.0.1:0", Uuid::new_v4(), None).await;
    let addr = server.addr;
    let channel = Channel::new(fast_config(), Arc::new(SecurityContext::new()));
    let mut events = channel.events().subscribe();

    let proxy = ChatServerProxy::from_base_uri(channel.clone(), &server.base_uri()).unwrap();
    proxy.test().await.unwrap();

    server.shutdown().await;
    let closed = next_matching(&mut events, |e| {
        matches!(e, ChannelEvent::ConnectionClosed { .. })
    })
    .await;
    assert_eq!(
        closed,
        ChannelEvent::ConnectionClosed {
            host: addr.to_string(),
            nickname: None,
        }
    );

    let restarted = MockServer::start(&addr.to_string(), Uuid::new_v4(), None).await;
    let event = next_matching(&mut events, |e| {
        matches!(e, ChannelEvent::ServerRestartDetected { .. })
    })
    .await;
    assert_eq!(
        event,
        ChannelEvent::ServerRestartDetected {
            host: addr.to_string()
        }
    );

    // The background reconnect left a usable connection behind.
    proxy.test().await.unwrap();
    restarted.shutdown().await;
}

#[tokio::test]
async fn test_reconnect_to_same_instance_is_not_a_restart() {
    let instance = Uuid::new_v4();
    let server = MockServer::start("127.0.0.1:0", instance, None).await;
    let addr = server.addr;
    let channel = Channel::new(fast_config(), Arc::new(SecurityContext::new()));
    let mut events = channel.events().subscribe();

    let proxy = ChatServerProxy::from_base_uri(channel.clone(), &server.base_uri()).unwrap();
    proxy.test().await.unwrap();
    server.shutdown().await;

    let again = MockServer::start(&addr.to_string(), instance, None).await;
    let established = next_matching(&mut events, |e| {
        matches!(e, ChannelEvent::ConnectionEstablished { .. })
    })
    .await;
    // First established event is the original connect; wait for the second.
    assert!(matches!(established, ChannelEvent::ConnectionEstablished { .. }));
    next_matching(&mut events, |e| {
        matches!(e, ChannelEvent::ConnectionEstablished { .. })
    })
    .await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, ChannelEvent::ServerRestartDetected { .. }),
            "same instance must not count as a restart"
        );
    }
    again.shutdown().await;
}

struct Collector(mpsc::UnboundedSender<ChatMessage>);

impl MessageReceiver for Collector {
    fn on_message(&self, message: &ChatMessage) {
        let _ = self.0.send(message.clone());
    }
}

#[tokio::test]
async fn test_server_push_reaches_registered_receiver() {
    let server = MockServer::start("127.0.0.1:0", Uuid::new_v4(), None).await;
    let channel = Channel::new(fast_config(), Arc::new(SecurityContext::new()));
    let (tx, mut rx) = mpsc::unbounded_channel();
    channel.register_receiver(Arc::new(Collector(tx)));

    let proxy = ChatServerProxy::from_base_uri(channel.clone(), &server.base_uri()).unwrap();
    proxy.test().await.unwrap();

    let message = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(message, ChatMessage::new("welcome", "server"));
    server.shutdown().await;
}

fn bound_context(session: &str) -> Arc<SecurityContext> {
    let security = SecurityContext::new();
    security.set_key(session, KeyProvider::new(Some("localhost".into())));
    for class in [
        ConnectionClass::Persistent,
        ConnectionClass::Named,
        ConnectionClass::Invocation,
    ] {
        security.bind(session, class, None, None).unwrap();
    }
    Arc::new(security)
}

#[tokio::test]
async fn test_calls_carry_invocation_session() {
    let server = MockServer::start("127.0.0.1:0", Uuid::new_v4(), Some("/TEST/SSPI1")).await;
    let channel = Channel::new(fast_config(), bound_context("/TEST/SSPI1"));

    let proxy = ChatServerProxy::from_base_uri(channel, &server.base_uri()).unwrap();
    assert_eq!(proxy.test().await.unwrap(), "/TEST/SSPI1");
    server.shutdown().await;
}

#[tokio::test]
async fn test_named_proxy_uses_named_session() {
    let server = MockServer::start("127.0.0.1:0", Uuid::new_v4(), None).await;
    let security = bound_context("/TEST/SSPI1");
    security.set_key("/NAMED", KeyProvider::default());
    security
        .bind("/NAMED", ConnectionClass::Named, None, None)
        .unwrap();
    let channel = Channel::new(fast_config(), security);

    let base = ChatServerProxy::from_base_uri(channel.clone(), &server.base_uri()).unwrap();
    let named = ChatServerProxy::named(channel, base.uri().clone(), "console");
    assert_eq!(named.test().await.unwrap(), "/NAMED");
    assert_eq!(base.test().await.unwrap(), "/TEST/SSPI1");
    server.shutdown().await;
}

#[tokio::test]
async fn test_rejected_handshake_is_authentication_error() {
    let server = MockServer::start("127.0.0.1:0", Uuid::new_v4(), Some("/TEST/SSPI1")).await;
    let channel = Channel::new(fast_config(), bound_context("/WRONG"));

    let proxy = ChatServerProxy::from_base_uri(channel.clone(), &server.base_uri()).unwrap();
    let err = proxy.test().await.unwrap_err();
    assert!(matches!(err, ChatError::Authentication(_)), "got {err:?}");
    assert!(!err.is_transient());
    assert!(channel.server_instance(&server.addr.to_string()).is_none());
    server.shutdown().await;
}

#[tokio::test]
async fn test_unknown_method_is_protocol_error() {
    let server = MockServer::start("127.0.0.1:0", Uuid::new_v4(), None).await;
    let channel = Channel::new(fast_config(), Arc::new(SecurityContext::new()));
    let proxy = ChatServerProxy::from_base_uri(channel, &server.base_uri()).unwrap();

    let err = proxy.enter_to_chat_room("alice").await.unwrap_err();
    assert!(matches!(err, ChatError::Protocol(ref m) if m.contains("EnterToChatRoom")));
    server.shutdown().await;
}
