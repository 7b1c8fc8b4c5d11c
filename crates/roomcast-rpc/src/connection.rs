//! One persistent JSON-RPC connection to a chat server.
//!
//! A reader task routes responses to their pending callers and forwards
//! everything else (server push notifications) to the receiver returned by
//! [`RpcConnection::connect`]. When the socket closes the receiver yields
//! `None` and every in-flight call fails with [`ClientError::ConnectionClosed`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, trace};

use crate::protocol::{Message, Notification, Request, RequestId, Response, RpcError};
use crate::transport::{CodecError, MessageCodec};

/// Errors that can occur on a connection
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("RPC error: {code} - {message}")]
    Rpc { code: i32, message: String },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Request timeout")]
    Timeout,

    #[error("Unexpected response type")]
    UnexpectedResponse,
}

impl From<RpcError> for ClientError {
    fn from(e: RpcError) -> Self {
        ClientError::Rpc {
            code: e.code,
            message: e.message,
        }
    }
}

type PendingRequest = oneshot::Sender<Result<Response, ClientError>>;
type PendingMap = Arc<Mutex<HashMap<RequestId, PendingRequest>>>;

pub struct RpcConnection {
    peer: SocketAddr,
    sink: Mutex<SplitSink<Framed<TcpStream, MessageCodec>, Message>>,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
    next_id: AtomicU64,
    call_timeout: Duration,
    reader: JoinHandle<()>,
}

impl std::fmt::Debug for RpcConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcConnection")
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl RpcConnection {
    /// Open a TCP connection to `addr`.
    ///
    /// `call_timeout` bounds both the connect itself and every later request.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Io` if the server is unreachable and
    /// `ClientError::Timeout` if it does not accept in time.
    pub async fn connect(
        addr: &str,
        call_timeout: Duration,
    ) -> Result<(Self, mpsc::Receiver<Message>), ClientError> {
        let stream = tokio::time::timeout(call_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::Timeout)??;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;

        let (sink, mut stream) = Framed::new(stream, MessageCodec::new()).split();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let (incoming_tx, incoming_rx) = mpsc::channel(64);

        let reader = {
            let pending = pending.clone();
            let closed = closed.clone();
            tokio::spawn(async move {
                while let Some(result) = stream.next().await {
                    match result {
                        Ok(Message::Response(resp)) => {
                            if let Some(tx) = pending.lock().await.remove(&resp.id) {
                                let _ = tx.send(Ok(resp));
                            } else {
                                trace!(id = %resp.id, "Dropping response with no caller");
                            }
                        }
                        Ok(msg) => {
                            if incoming_tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            debug!(%peer, "Connection read error: {e}");
                            break;
                        }
                    }
                }

                closed.store(true, Ordering::SeqCst);
                for (_, tx) in pending.lock().await.drain() {
                    let _ = tx.send(Err(ClientError::ConnectionClosed));
                }
                debug!(%peer, "Connection reader finished");
            })
        };

        let connection = Self {
            peer,
            sink: Mutex::new(sink),
            pending,
            closed,
            next_id: AtomicU64::new(1),
            call_timeout,
            reader,
        };
        Ok((connection, incoming_rx))
    }

    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send a request and wait for its response.
    ///
    /// # Errors
    ///
    /// Returns an error if sending fails, the connection closes, the call
    /// times out, the server answers with an error, or deserialization fails.
    pub async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<T, ClientError> {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let request = Request::new(method, params, id.clone());

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        // The reader marks the connection closed before draining, so a request
        // registered after the drain is caught here.
        if self.is_closed() {
            self.pending.lock().await.remove(&id);
            return Err(ClientError::ConnectionClosed);
        }

        let sent = self.sink.lock().await.send(Message::Request(request)).await;
        if let Err(e) = sent {
            self.pending.lock().await.remove(&id);
            return Err(e.into());
        }

        let response = match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(response)) => response?,
            Ok(Err(_)) => return Err(ClientError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(ClientError::Timeout);
            }
        };

        if let Some(error) = response.error {
            return Err(error.into());
        }

        let result = response.result.ok_or(ClientError::UnexpectedResponse)?;
        Ok(serde_json::from_value(result)?)
    }

    /// Send a notification (no response expected).
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Codec` if sending fails.
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::ConnectionClosed);
        }
        let notification = Notification::new(method, params);
        self.sink
            .lock()
            .await
            .send(Message::Notification(notification))
            .await?;
        Ok(())
    }
}

impl Drop for RpcConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    use crate::protocol::Response;

    async fn serve_once<F>(handler: F) -> SocketAddr
    where
        F: FnOnce(Framed<TcpStream, MessageCodec>) -> tokio::task::JoinHandle<()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let _ = handler(Framed::new(stream, MessageCodec::new())).await;
        });
        addr
    }

    #[test]
    fn test_client_error_from_rpc_error() {
        let client_err: ClientError = RpcError::not_authenticated().into();
        match client_err {
            ClientError::Rpc { code, message } => {
                assert_eq!(code, crate::protocol::NOT_AUTHENTICATED);
                assert!(message.contains("Handshake"));
            }
            other => panic!("Expected Rpc error, got {other:?}"),
        }
    }

    #[test]
    fn test_client_error_display() {
        assert_eq!(ClientError::ConnectionClosed.to_string(), "Connection closed");
        assert_eq!(ClientError::Timeout.to_string(), "Request timeout");
        assert_eq!(
            ClientError::UnexpectedResponse.to_string(),
            "Unexpected response type"
        );
    }

    #[tokio::test]
    async fn test_request_receives_matching_response() {
        let addr = serve_once(|mut framed| {
            tokio::spawn(async move {
                let Some(Ok(Message::Request(req))) = framed.next().await else {
                    panic!("expected request");
                };
                assert_eq!(req.method, "Test");
                let resp = Response::success(req.id.unwrap(), serde_json::json!("pong"));
                framed.send(Message::Response(resp)).await.unwrap();
            })
        })
        .await;

        let (conn, _incoming) = RpcConnection::connect(&addr.to_string(), Duration::from_secs(5))
            .await
            .unwrap();
        let reply: String = conn.request("Test", None).await.unwrap();
        assert_eq!(reply, "pong");
        assert_eq!(conn.peer_addr(), addr);
    }

    #[tokio::test]
    async fn test_error_response_becomes_rpc_error() {
        let addr = serve_once(|mut framed| {
            tokio::spawn(async move {
                let Some(Ok(Message::Request(req))) = framed.next().await else {
                    panic!("expected request");
                };
                let resp = Response::error(req.id.unwrap(), RpcError::method_not_found(&req.method));
                framed.send(Message::Response(resp)).await.unwrap();
            })
        })
        .await;

        let (conn, _incoming) = RpcConnection::connect(&addr.to_string(), Duration::from_secs(5))
            .await
            .unwrap();
        let err = conn
            .request::<serde_json::Value>("Nope", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Rpc { code, .. } if code == crate::protocol::METHOD_NOT_FOUND));
    }

    #[tokio::test]
    async fn test_notifications_are_forwarded() {
        let addr = serve_once(|mut framed| {
            tokio::spawn(async move {
                let notif = Notification::new(
                    "ReceiveMessage",
                    Some(serde_json::json!({"message": "hi", "nickname": "bob"})),
                );
                framed.send(Message::Notification(notif)).await.unwrap();
                // Hold the socket open until the client is done.
                let _ = framed.next().await;
            })
        })
        .await;

        let (_conn, mut incoming) =
            RpcConnection::connect(&addr.to_string(), Duration::from_secs(5))
                .await
                .unwrap();
        let msg = tokio::time::timeout(Duration::from_secs(5), incoming.recv())
            .await
            .unwrap()
            .unwrap();
        let (method, _) = msg.as_notification().unwrap();
        assert_eq!(method, "ReceiveMessage");
    }

    #[tokio::test]
    async fn test_pending_request_fails_when_server_closes() {
        let addr = serve_once(|mut framed| {
            tokio::spawn(async move {
                let _ = framed.next().await;
                drop(framed);
            })
        })
        .await;

        let (conn, mut incoming) =
            RpcConnection::connect(&addr.to_string(), Duration::from_secs(5))
                .await
                .unwrap();
        let err = conn
            .request::<serde_json::Value>("Test", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed));

        assert!(incoming.recv().await.is_none());
        assert!(conn.is_closed());
        assert!(matches!(
            conn.request::<serde_json::Value>("Test", None).await,
            Err(ClientError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_request_times_out() {
        let addr = serve_once(|mut framed| {
            tokio::spawn(async move {
                while framed.next().await.is_some() {}
            })
        })
        .await;

        let (conn, _incoming) =
            RpcConnection::connect(&addr.to_string(), Duration::from_millis(100))
                .await
                .unwrap();
        let err = conn
            .request::<serde_json::Value>("Test", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout));
    }

    #[tokio::test]
    async fn test_connect_refused_is_io_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = RpcConnection::connect(&addr.to_string(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Io(_)));
    }
}
