//! roomcast console client.
//!
//! Joins the shared chat room under a nickname, forwards typed lines to it
//! and prints every broadcast. When the channel reconnects to a restarted
//! server the client re-enters the room on its own.
//!
//! # Architecture
//!
//! - [`establisher`]: Probe the server, enter the room, store the handle
//! - [`handle`]: The shared room handle guarded by one lock
//! - [`resubscriber`]: Subscription state machine, rejoin on restart
//! - [`receiver`]: Console rendering of pushed messages
//! - [`session`]: Foreground input loop with retry
//! - [`client`]: Security setup and wiring around one channel
//! - [`config`]: `client.json` settings

pub mod client;
pub mod config;
pub mod establisher;
pub mod handle;
pub mod receiver;
pub mod resubscriber;
pub mod retry;
pub mod session;

pub use client::{ChatClient, EventLogger, security_context};
pub use config::ClientConfig;
pub use establisher::Establisher;
pub use handle::ClientHandle;
pub use receiver::{ConsoleReceiver, render};
pub use resubscriber::{Resubscriber, SubscriptionState};
pub use retry::RetryPolicy;
pub use session::{ChatSession, LineSource, PROMPT, StdinLines};
