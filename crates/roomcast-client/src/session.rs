//! Foreground loop: join, forward input lines, retry on failure.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use roomcast_rpc::ChatError;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::establisher::Establisher;
use crate::handle::ClientHandle;
use crate::resubscriber::{Resubscriber, SubscriptionState};
use crate::retry::RetryPolicy;

pub const PROMPT: &str = "Enter a message to send or an empty string to exit.";

/// Where outgoing lines come from. `None` means end of input.
pub trait LineSource: Send {
    fn next_line(&mut self) -> impl Future<Output = Option<String>> + Send;
}

impl LineSource for mpsc::Receiver<String> {
    fn next_line(&mut self) -> impl Future<Output = Option<String>> + Send {
        self.recv()
    }
}

/// Lines from standard input, prompting before each read.
#[derive(Debug)]
pub struct StdinLines {
    lines: Lines<BufReader<Stdin>>,
}

impl Default for StdinLines {
    fn default() -> Self {
        Self::new()
    }
}

impl StdinLines {
    #[must_use]
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    /// Print `prompt` and read one line.
    pub async fn ask(&mut self, prompt: &str) -> Option<String> {
        println!("{prompt}");
        match self.lines.next_line().await {
            Ok(line) => line.map(|l| l.trim_end_matches('\r').to_string()),
            Err(e) => {
                warn!("Failed to read standard input: {e}");
                None
            }
        }
    }
}

impl LineSource for StdinLines {
    fn next_line(&mut self) -> impl Future<Output = Option<String>> + Send {
        self.ask(PROMPT)
    }
}

enum Flow {
    Continue,
    Exit,
}

/// Ties the establisher, the resubscriber and the retry policy together.
#[derive(Debug)]
pub struct ChatSession {
    handle: Arc<ClientHandle>,
    establisher: Arc<Establisher>,
    resubscriber: Arc<Resubscriber>,
    policy: RetryPolicy,
}

impl ChatSession {
    #[must_use]
    pub fn new(
        handle: Arc<ClientHandle>,
        establisher: Arc<Establisher>,
        resubscriber: Arc<Resubscriber>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            handle,
            establisher,
            resubscriber,
            policy,
        }
    }

    /// Join the room and send every line from `lines` until an empty line
    /// or end of input.
    ///
    /// Join and send failures are retried after the policy's delay. A line
    /// whose send failed is sent again after the next successful join.
    /// Input typed during the delay is queued; an empty line still exits.
    /// While a restart-triggered rejoin runs, the loop waits for it instead
    /// of joining on its own.
    ///
    /// # Errors
    ///
    /// Returns the last error once the retry policy gives up.
    pub async fn run<L: LineSource>(&self, lines: &mut L) -> Result<(), ChatError> {
        let mut queued: VecDeque<String> = VecDeque::new();
        let mut failures: u32 = 0;

        loop {
            if let Flow::Exit = self.wait_for_rejoin(lines, &mut queued).await {
                break;
            }

            let error = match self.ensure_joined().await {
                Ok(()) => {
                    failures = 0;
                    match self.forward(lines, &mut queued).await {
                        Ok(()) => break,
                        Err(e) => {
                            self.resubscriber.mark_send_failed();
                            e
                        }
                    }
                }
                Err(e) => e,
            };

            failures += 1;
            warn!(attempt = failures, "{error}");
            if !self.policy.should_retry(failures) {
                warn!("Giving up after {failures} failed attempts");
                self.stop().await;
                return Err(error);
            }

            warn!(
                "Next attempt to connect to the server will be in {:?}.",
                self.policy.delay
            );
            if let Flow::Exit = self.wait_before_retry(lines, &mut queued).await {
                break;
            }
        }

        self.stop().await;
        Ok(())
    }

    async fn ensure_joined(&self) -> Result<(), ChatError> {
        if self.resubscriber.state() == SubscriptionState::Subscribed
            && self.handle.is_joined().await
        {
            debug!("Chat room was rejoined in the background");
            return Ok(());
        }

        self.resubscriber.begin_connecting();
        let room = self.establisher.join(&self.handle).await?;
        self.resubscriber.mark_subscribed();
        info!(nickname = self.handle.nickname(), room = room.room(), "Joined chat room");
        Ok(())
    }

    async fn wait_for_rejoin<L: LineSource>(
        &self,
        lines: &mut L,
        queued: &mut VecDeque<String>,
    ) -> Flow {
        if self.resubscriber.state() != SubscriptionState::Resubscribing {
            return Flow::Continue;
        }

        debug!("Waiting for the chat room to be rejoined");
        let settled = self.resubscriber.settled();
        tokio::pin!(settled);
        loop {
            tokio::select! {
                biased;
                _ = &mut settled => return Flow::Continue,
                line = lines.next_line() => match line {
                    Some(line) if !line.is_empty() => queued.push_back(line),
                    _ => return Flow::Exit,
                },
            }
        }
    }

    async fn forward<L: LineSource>(
        &self,
        lines: &mut L,
        queued: &mut VecDeque<String>,
    ) -> Result<(), ChatError> {
        loop {
            let line = match queued.pop_front() {
                Some(line) => line,
                None => match lines.next_line().await {
                    Some(line) => line,
                    None => return Ok(()),
                },
            };
            if line.is_empty() {
                return Ok(());
            }

            if let Err(e) = self.handle.send_message(&line).await {
                queued.push_front(line);
                return Err(e);
            }
        }
    }

    async fn wait_before_retry<L: LineSource>(
        &self,
        lines: &mut L,
        queued: &mut VecDeque<String>,
    ) -> Flow {
        let sleep = tokio::time::sleep(self.policy.delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = &mut sleep => return Flow::Continue,
                line = lines.next_line() => match line {
                    Some(line) if !line.is_empty() => queued.push_back(line),
                    _ => return Flow::Exit,
                },
            }
        }
    }

    async fn stop(&self) {
        self.resubscriber.mark_disconnected();
        self.handle.clear().await;
    }
}
