//! Join protocol: check the server, enter the room, store the handle.

use roomcast_rpc::{ChatError, ChatServerProxy, RoomProxy};
use tracing::{debug, info};

use crate::handle::ClientHandle;

#[derive(Debug, Clone)]
pub struct Establisher {
    server: ChatServerProxy,
}

impl Establisher {
    /// `server` is resolved once; every join re-invokes it.
    #[must_use]
    pub fn new(server: ChatServerProxy) -> Self {
        Self { server }
    }

    #[must_use]
    pub fn server(&self) -> &ChatServerProxy {
        &self.server
    }

    /// Run the join protocol for `handle`'s nickname.
    ///
    /// The whole sequence holds the handle's lock, so a restart-triggered
    /// rejoin and a regular join never interleave. On failure the previous
    /// handle is left in place.
    ///
    /// # Errors
    ///
    /// Returns the error of the first remote call that fails.
    pub async fn join(&self, handle: &ClientHandle) -> Result<RoomProxy, ChatError> {
        self.join_if(handle, || true).await
    }

    /// Like [`Establisher::join`], but the new room handle is only stored
    /// if `keep()` still holds once the room has been entered.
    ///
    /// # Errors
    ///
    /// Returns the error of the first remote call that fails.
    pub async fn join_if(
        &self,
        handle: &ClientHandle,
        keep: impl FnOnce() -> bool,
    ) -> Result<RoomProxy, ChatError> {
        let mut room = handle.lock().await;

        let reply = self.server.test().await?;
        info!(server = %self.server.uri(), "{reply}");

        let joined = self.server.enter_to_chat_room(handle.nickname()).await?;
        if keep() {
            *room = Some(joined.clone());
        } else {
            debug!(nickname = handle.nickname(), "Discarding room handle of a stopped client");
        }
        Ok(joined)
    }
}
