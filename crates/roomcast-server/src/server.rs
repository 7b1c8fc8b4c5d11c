//! TCP accept loop and per-connection processing.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use roomcast_rpc::{
    ChannelEvent, EventListener, EventSource, Message, MessageCodec, RequestId, Response,
    ServerKeyStore,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::handlers::{HandlerContext, handle_request};
use crate::room::ChatRoom;
use crate::session::ConnectionSession;

/// State shared by every connection of one server process.
#[derive(Debug)]
pub struct ServerState {
    /// Picked at startup; clients compare it across reconnects to spot restarts.
    pub instance: Uuid,
    pub room: ChatRoom,
    pub keys: ServerKeyStore,
    pub events: EventSource,
}

impl ServerState {
    #[must_use]
    pub fn new(keys: ServerKeyStore) -> Self {
        Self {
            instance: Uuid::new_v4(),
            room: ChatRoom::default(),
            keys,
            events: EventSource::new(),
        }
    }
}

/// Logs members whose connection went away.
struct DisconnectLogger;

impl EventListener for DisconnectLogger {
    async fn on_connection_closed(&self, host: &str, nickname: Option<&str>) {
        match nickname {
            Some(nickname) => info!("Client \"{nickname}\" has been disconnected."),
            None => debug!(%host, "Connection closed before entering the room"),
        }
    }
}

pub struct ChatServer {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl ChatServer {
    /// Bind the listening socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(addr: &str, keys: ServerKeyStore) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            state: Arc::new(ServerState::new(keys)),
        })
    }

    /// # Errors
    ///
    /// Returns an error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    #[must_use]
    pub fn state(&self) -> Arc<ServerState> {
        self.state.clone()
    }

    /// Serve until `shutdown` completes, then close every connection.
    ///
    /// # Errors
    ///
    /// Currently infallible once bound; accept errors are logged and skipped.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let logger = self.state.events.register(Arc::new(DisconnectLogger));
        let token = CancellationToken::new();
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        info!(instance = %self.state.instance, "Ready to accept connections");
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown requested, stopping server");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "Accepted connection");
                        let state = self.state.clone();
                        let token = token.child_token();
                        connections.spawn(async move {
                            if let Err(e) = handle_connection(stream, peer, state, token).await {
                                error!(%peer, "Connection error: {e}");
                            }
                        });
                    }
                    Err(e) => error!("Accept error: {e}"),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        drop(self.listener);
        token.cancel();
        while connections.join_next().await.is_some() {}
        logger.abort();
        Ok(())
    }

    /// Serve until Ctrl-C.
    ///
    /// # Errors
    ///
    /// See [`ChatServer::run_until`].
    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<ServerState>,
    shutdown: CancellationToken,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let (mut sink, mut stream) = Framed::new(stream, MessageCodec::new()).split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let mut session = ConnectionSession::new(peer, tx.clone());
    debug!(session = %session.id, %peer, "New connection");

    let session_id = session.id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = sink.send(msg).await {
                warn!("Failed to send to {session_id}: {e}");
                break;
            }
        }
        trace!("[{session_id}] send_task ended");
    });

    loop {
        let next = tokio::select! {
            () = shutdown.cancelled() => break,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(msg)) => {
                if let Some(response) = process_message(&mut session, msg, &state).await
                    && tx.send(response).is_err()
                {
                    break;
                }
            }
            Some(Err(e)) => {
                warn!(session = %session.id, "Read error: {e}");
                break;
            }
            None => break,
        }
    }

    debug!(session = %session.id, "Connection closed");
    if let Some(nickname) = session.nickname.as_deref() {
        state.room.detach_endpoint(nickname, &session.id).await;
    }
    state.events.publish(ChannelEvent::ConnectionClosed {
        host: peer.to_string(),
        nickname: session.nickname.clone(),
    });

    send_task.abort();
    Ok(())
}

async fn process_message(
    session: &mut ConnectionSession,
    msg: Message,
    state: &ServerState,
) -> Option<Message> {
    match msg {
        Message::Request(request) if request.id.is_some() => {
            trace!(method = %request.method, id = ?request.id, "Processing request");
            let mut ctx = HandlerContext { state, session };
            let response = match handle_request(&mut ctx, &request).await {
                Ok(resp) => resp,
                Err(err) => Response::error(request.id.unwrap_or(RequestId::Number(0)), err),
            };
            Some(Message::Response(response))
        }
        Message::Request(request) => {
            debug!(method = %request.method, "Ignoring client notification");
            None
        }
        Message::Notification(notification) => {
            debug!(method = %notification.method, "Ignoring client notification");
            None
        }
        Message::Response(resp) => {
            debug!(id = %resp.id, "Ignoring unexpected response from client");
            None
        }
    }
}
