//! Request handlers for the chat server.
//!
//! Every connection must complete the `handshake` first. After that, calls
//! are routed by the object they target:
//! - `ChatServer.rem`: `Test`, `EnterToChatRoom`
//! - `ChatRoom.rem`: `SendMessage`

use roomcast_rpc::protocol::{
    EnterParams, HandshakeParams, HandshakeResult, Invocation, SendMessageParams,
    SendMessageResult, methods,
};
use roomcast_rpc::{CHAT_ROOM_OBJECT, CHAT_SERVER_OBJECT, Request, RequestId, Response, RpcError};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Result, ServerError};
use crate::room::DeliveryEndpoint;
use crate::server::ServerState;
use crate::session::ConnectionSession;

/// Fixed reply of the diagnostic `Test` call.
pub const TEST_REPLY: &str = "roomcast chat server";

pub struct HandlerContext<'a> {
    pub state: &'a ServerState,
    pub session: &'a mut ConnectionSession,
}

pub async fn handle_request(
    ctx: &mut HandlerContext<'_>,
    request: &Request,
) -> std::result::Result<Response, RpcError> {
    let id = request.id.clone().unwrap_or(RequestId::Number(0));

    let result = if request.method == methods::HANDSHAKE {
        handle_handshake(ctx, request.params.as_ref())
    } else {
        dispatch(ctx, &request.method, request.params.as_ref()).await
    };

    match result {
        Ok(value) => Ok(Response::success(id, value)),
        Err(e) => {
            debug!(session = %ctx.session.id, method = %request.method, "Request failed: {e}");
            Err(e.into())
        }
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<&Value>) -> Result<T> {
    let params = params.ok_or_else(|| ServerError::InvalidParams("missing params".into()))?;
    serde_json::from_value(params.clone()).map_err(|e| ServerError::InvalidParams(e.to_string()))
}

fn handle_handshake(ctx: &mut HandlerContext<'_>, params: Option<&Value>) -> Result<Value> {
    let params: HandshakeParams = match params {
        Some(_) => parse_params(params)?,
        None => HandshakeParams::default(),
    };

    let identity = ctx.state.keys.authenticate(&params)?;
    info!(
        session = %ctx.session.id,
        peer = %ctx.session.peer,
        principal = %identity.principal_name,
        method = ?identity.authentication_method,
        "Client authenticated"
    );
    ctx.session.identity = Some(identity.clone());

    Ok(serde_json::to_value(HandshakeResult {
        server_instance: ctx.state.instance,
        identity,
    })?)
}

async fn dispatch(ctx: &mut HandlerContext<'_>, method: &str, params: Option<&Value>) -> Result<Value> {
    if !ctx.session.is_authenticated() {
        return Err(ServerError::NotAuthenticated);
    }

    let invocation: Invocation<Value> = parse_params(params)?;
    if let Some(security_session) = invocation.security_session.as_deref()
        && !ctx.state.keys.accepts(security_session)
    {
        return Err(ServerError::Authentication(format!(
            "unknown security session '{security_session}'"
        )));
    }

    match (invocation.object.as_str(), method) {
        (CHAT_SERVER_OBJECT, methods::TEST) => Ok(Value::String(TEST_REPLY.to_string())),
        (CHAT_SERVER_OBJECT, methods::ENTER_TO_CHAT_ROOM) => {
            let args: EnterParams = parse_args(invocation.args)?;
            enter_to_chat_room(ctx, args).await
        }
        (CHAT_ROOM_OBJECT, methods::SEND_MESSAGE) => {
            let args: SendMessageParams = parse_args(invocation.args)?;
            send_message(ctx, args).await
        }
        (CHAT_SERVER_OBJECT | CHAT_ROOM_OBJECT, other) => {
            Err(ServerError::MethodNotFound(other.to_string()))
        }
        (object, _) => Err(ServerError::ObjectNotFound(object.to_string())),
    }
}

fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T> {
    serde_json::from_value(args).map_err(|e| ServerError::InvalidParams(e.to_string()))
}

async fn enter_to_chat_room(ctx: &mut HandlerContext<'_>, args: EnterParams) -> Result<Value> {
    let nickname = args.nickname.as_str();
    if nickname.trim().is_empty() {
        return Err(ServerError::InvalidParams("nickname must not be empty".into()));
    }
    // Nicknames are matched exactly.
    if nickname.trim() != nickname {
        return Err(ServerError::InvalidParams(format!(
            "nickname '{nickname}' has leading or trailing whitespace"
        )));
    }

    info!(
        principal = %ctx.session.principal(),
        nickname,
        "Client is entering the chat room"
    );

    // A connection holds at most one nickname.
    if let Some(previous) = ctx.session.nickname.take()
        && previous != nickname
    {
        ctx.state
            .room
            .detach_endpoint(&previous, &ctx.session.id)
            .await;
    }

    let endpoint = DeliveryEndpoint::new(ctx.session.id.clone(), ctx.session.sender().clone());
    let room = ctx.state.room.enter(nickname, endpoint).await;
    ctx.session.nickname = Some(nickname.to_string());

    Ok(serde_json::to_value(room)?)
}

async fn send_message(ctx: &mut HandlerContext<'_>, args: SendMessageParams) -> Result<Value> {
    let nickname = ctx.session.nickname.as_deref().ok_or(ServerError::NotAMember)?;
    if !ctx.state.room.is_member(nickname, &ctx.session.id).await {
        return Err(ServerError::NotAMember);
    }

    let delivered = ctx.state.room.send_message(nickname, &args.text).await;
    Ok(serde_json::to_value(SendMessageResult { delivered })?)
}
