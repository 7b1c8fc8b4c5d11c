//! Named security sessions.
//!
//! A client registers a [`KeyProvider`] per session name in its
//! [`SecurityContext`], then binds that name to one or more
//! [`ConnectionClass`]es. The persistent connection authenticates with the
//! session bound to [`ConnectionClass::Persistent`]; individual calls carry
//! the invocation (or named) session so the server can resolve the caller's
//! [`Identity`] per call.
//!
//! The server side keeps a [`ServerKeyStore`] of accepted session names.

use std::collections::HashMap;
use std::fmt;
use std::ops::BitOr;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ChatError;
use crate::protocol::HandshakeParams;

/// Lifetime/usage pattern of a connection, used to pick its security session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionClass {
    Persistent,
    Named,
    Invocation,
}

impl fmt::Display for ConnectionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionClass::Persistent => "persistent",
            ConnectionClass::Named => "named",
            ConnectionClass::Invocation => "invocation",
        };
        f.write_str(name)
    }
}

/// Flags attached to a security session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionAttributes(u32);

impl SessionAttributes {
    pub const NONE: Self = Self(0);
    pub const FORCE_SYNC: Self = Self(1);
    pub const FORCE_ASYNC: Self = Self(1 << 1);
    pub const ENABLE_COMPRESSION: Self = Self(1 << 2);

    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for SessionAttributes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionTimeout {
    #[default]
    Never,
    After(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecuritySession {
    pub name: String,
    pub connection_class: ConnectionClass,
    pub attributes: SessionAttributes,
    pub timeout: SessionTimeout,
}

/// Credentials presented during the handshake.
///
/// With no user the process identity is used (`$USER`/`$USERNAME`).
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl Credentials {
    #[must_use]
    pub fn shared_secret(user: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            secret: Some(secret.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationMethod {
    Anonymous,
    ProcessIdentity,
    SharedSecret,
}

/// Who the server authenticated a security session as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub principal_name: String,
    pub authentication_method: AuthenticationMethod,
}

impl Identity {
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            principal_name: "anonymous".to_string(),
            authentication_method: AuthenticationMethod::Anonymous,
        }
    }
}

/// Client-side key material for one session name.
#[derive(Debug, Clone, Default)]
pub struct KeyProvider {
    pub credentials: Credentials,
    /// Name the server must present; checked by the server against its own.
    pub target_name: Option<String>,
}

impl KeyProvider {
    #[must_use]
    pub fn new(target_name: Option<String>) -> Self {
        Self {
            credentials: Credentials::default(),
            target_name,
        }
    }
}

/// Process-wide security configuration of a client channel.
#[derive(Debug, Default)]
pub struct SecurityContext {
    keys: RwLock<HashMap<String, KeyProvider>>,
    sessions: RwLock<HashMap<ConnectionClass, SecuritySession>>,
}

impl SecurityContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the key provider for a session name.
    pub fn set_key(&self, session_name: impl Into<String>, provider: KeyProvider) {
        let session_name = session_name.into();
        debug!(session = %session_name, "Key provider registered");
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_name, provider);
    }

    /// Use `session_name` for every future connection of `class`.
    ///
    /// Credentials and target name are written into the session's key
    /// provider (`None` leaves the stored value untouched). Attributes
    /// already configured for `class` carry over to the new session.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Configuration`] if no key provider has been
    /// registered for `session_name`.
    pub fn bind(
        &self,
        session_name: &str,
        class: ConnectionClass,
        credentials: Option<Credentials>,
        target_name: Option<String>,
    ) -> Result<(), ChatError> {
        {
            let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);
            let Some(provider) = keys.get_mut(session_name) else {
                return Err(ChatError::Configuration(format!(
                    "no key provider registered for security session '{session_name}'"
                )));
            };
            if let Some(credentials) = credentials {
                provider.credentials = credentials;
            }
            if target_name.is_some() {
                provider.target_name = target_name;
            }
        }

        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let attributes = sessions
            .get(&class)
            .map_or(SessionAttributes::NONE, |existing| existing.attributes);
        sessions.insert(
            class,
            SecuritySession {
                name: session_name.to_string(),
                connection_class: class,
                attributes,
                timeout: SessionTimeout::Never,
            },
        );
        debug!(session = %session_name, %class, "Security session bound");
        Ok(())
    }

    /// Replace the attributes of the session bound to `class`, keeping its name.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Configuration`] if nothing is bound to `class`.
    pub fn set_attributes(
        &self,
        class: ConnectionClass,
        attributes: SessionAttributes,
    ) -> Result<(), ChatError> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let session = sessions.get_mut(&class).ok_or_else(|| {
            ChatError::Configuration(format!("no security session bound to {class} connections"))
        })?;
        session.attributes = attributes;
        Ok(())
    }

    #[must_use]
    pub fn session_for(&self, class: ConnectionClass) -> Option<SecuritySession> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&class)
            .cloned()
    }

    pub(crate) fn handshake_params(&self) -> HandshakeParams {
        let Some(session) = self.session_for(ConnectionClass::Persistent) else {
            return HandshakeParams::default();
        };

        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        let provider = keys.get(&session.name).cloned().unwrap_or_default();
        let mut credentials = provider.credentials;
        if credentials.user.is_none() {
            credentials.user = process_user();
        }

        HandshakeParams {
            session_name: Some(session.name),
            target_name: provider.target_name,
            credentials,
        }
    }
}

fn process_user() -> Option<String> {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
}

/// Server-side acceptance rules for one session name.
#[derive(Debug, Clone, Default)]
pub struct ServerKeyProvider {
    /// When set, clients must present this exact target name.
    pub target_name: Option<String>,
    /// When set, clients must present this secret.
    pub shared_secret: Option<String>,
}

/// Session names a server accepts.
#[derive(Debug, Default)]
pub struct ServerKeyStore {
    keys: RwLock<HashMap<String, ServerKeyProvider>>,
}

impl ServerKeyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_global_key(&self, session_name: impl Into<String>, provider: ServerKeyProvider) {
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_name.into(), provider);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Whether calls made under `session_name` are allowed.
    ///
    /// An empty store accepts every session.
    #[must_use]
    pub fn accepts(&self, session_name: &str) -> bool {
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        keys.is_empty() || keys.contains_key(session_name)
    }

    /// Resolve the identity behind a handshake.
    ///
    /// A store with no keys accepts every connection, identified by the
    /// presented user name (or anonymously without a session). Once a key is
    /// registered, a known session name is mandatory.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Authentication`] when the session is unknown,
    /// the target name does not match, or the secret is wrong.
    pub fn authenticate(&self, params: &HandshakeParams) -> Result<Identity, ChatError> {
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);

        let Some(session_name) = params.session_name.as_deref() else {
            if keys.is_empty() {
                return Ok(Identity::anonymous());
            }
            return Err(ChatError::Authentication(
                "security session required".to_string(),
            ));
        };

        if keys.is_empty() {
            return Ok(params.credentials.user.clone().map_or_else(
                Identity::anonymous,
                |principal_name| Identity {
                    principal_name,
                    authentication_method: AuthenticationMethod::ProcessIdentity,
                },
            ));
        }

        let provider = keys.get(session_name).ok_or_else(|| {
            ChatError::Authentication(format!("unknown security session '{session_name}'"))
        })?;

        if let (Some(expected), Some(presented)) = (&provider.target_name, &params.target_name)
            && expected != presented
        {
            return Err(ChatError::Authentication(format!(
                "target name mismatch: client expects '{presented}', server is '{expected}'"
            )));
        }

        let principal_name = params
            .credentials
            .user
            .clone()
            .unwrap_or_else(|| "unknown".to_string());

        let authentication_method = match &provider.shared_secret {
            Some(expected) => {
                if params.credentials.secret.as_ref() != Some(expected) {
                    return Err(ChatError::Authentication(format!(
                        "credentials rejected for '{principal_name}'"
                    )));
                }
                AuthenticationMethod::SharedSecret
            }
            None => AuthenticationMethod::ProcessIdentity,
        };

        Ok(Identity {
            principal_name,
            authentication_method,
        })
    }
}
