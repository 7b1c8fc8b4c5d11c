//! Console rendering of incoming broadcasts.

use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

use roomcast_rpc::{ChatMessage, MessageReceiver};
use tracing::warn;

/// Prints `Message "<text>" from "<nick>".` for every broadcast.
#[derive(Debug)]
pub struct ConsoleReceiver<W> {
    out: Mutex<W>,
}

impl ConsoleReceiver<io::Stdout> {
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> ConsoleReceiver<W> {
    #[must_use]
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    #[must_use]
    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

#[must_use]
pub fn render(message: &ChatMessage) -> String {
    format!(
        "Message \"{}\" from \"{}\".",
        message.text, message.sender_nickname
    )
}

impl<W: Write + Send + 'static> MessageReceiver for ConsoleReceiver<W> {
    fn on_message(&self, message: &ChatMessage) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(out, "{}", render(message)).and_then(|()| out.flush()) {
            warn!("Failed to render message: {e}");
        }
    }
}
