//! Overall and inactivity deadlines around a chat stream.
//!
//! The wrapper races the inner stream against two optional timers and the
//! stream's cancellation token. A timer expiry fires its callback and ends the
//! stream cleanly; a token cancellation is an external interrupt and is
//! surfaced to the consumer as [`ChatError::Cancelled`]. Dropping the wrapped
//! stream drops both timers.

use std::pin::Pin;
use std::time::Duration;

use async_stream::stream;
use futures::StreamExt;
use tokio::time::{Instant, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::chat::event::ChatEvent;
use crate::chat::handle::ChatStream;
use crate::chat::params::Callback;
use crate::error::{ChatError, Result};

/// Which deadline ended the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Timeout,
    Inactivity,
}

/// Decide which deadline expired from the state of both timers.
///
/// When both have elapsed the overall timeout wins. Both outcomes end the
/// stream so the ordering only affects which callback runs.
pub fn resolve_expiry(timeout_elapsed: bool, inactivity_elapsed: bool) -> Option<Expiry> {
    match (timeout_elapsed, inactivity_elapsed) {
        (true, _) => Some(Expiry::Timeout),
        (false, true) => Some(Expiry::Inactivity),
        (false, false) => None,
    }
}

/// Deadline configuration for one stream.
#[derive(Debug, Clone, Default)]
pub struct Deadlines {
    pub timeout: Option<Duration>,
    pub inactivity_timeout: Option<Duration>,
    pub on_timeout: Option<Callback>,
    pub on_inactivity_timeout: Option<Callback>,
}

impl Deadlines {
    pub fn is_empty(&self) -> bool {
        self.timeout.is_none() && self.inactivity_timeout.is_none()
    }

    /// Wrap `inner`, observing `token` for external interrupts.
    pub fn wrap(self, mut inner: ChatStream, token: CancellationToken) -> ChatStream {
        Box::pin(stream! {
            let overall = self.timeout.map(tokio::time::sleep);
            tokio::pin!(overall);
            let idle = self.inactivity_timeout.map(tokio::time::sleep);
            tokio::pin!(idle);

            loop {
                let step = tokio::select! {
                    biased;
                    _ = token.cancelled() => Step::Cancelled,
                    _ = expire(overall.as_mut().as_pin_mut()) => Step::Expired,
                    _ = expire(idle.as_mut().as_pin_mut()) => Step::Expired,
                    item = inner.next() => Step::Item(item),
                };
                match step {
                    Step::Cancelled => {
                        debug!("Chat stream interrupted");
                        yield Err(ChatError::Cancelled);
                        break;
                    }
                    Step::Expired => {
                        self.expire(&overall, &idle);
                        break;
                    }
                    Step::Item(Some(item)) => {
                        if let (Some(sleep), Some(d)) =
                            (idle.as_mut().as_pin_mut(), self.inactivity_timeout)
                        {
                            sleep.reset(Instant::now() + d);
                        }
                        yield item;
                    }
                    Step::Item(None) => break,
                }
            }
        })
    }

    fn expire(&self, overall: &Option<Sleep>, idle: &Option<Sleep>) {
        let elapsed = |sleep: &Option<Sleep>| sleep.as_ref().is_some_and(Sleep::is_elapsed);
        match resolve_expiry(elapsed(overall), elapsed(idle)) {
            Some(Expiry::Timeout) => {
                info!(timeout = ?self.timeout, "Chat stream timed out");
                if let Some(cb) = &self.on_timeout {
                    cb.call();
                }
            }
            Some(Expiry::Inactivity) => {
                info!(
                    inactivity_timeout = ?self.inactivity_timeout,
                    "No chat activity, ending stream"
                );
                if let Some(cb) = &self.on_inactivity_timeout {
                    cb.call();
                }
            }
            None => {}
        }
    }
}

enum Step {
    Cancelled,
    Expired,
    Item(Option<Result<ChatEvent>>),
}

async fn expire(sleep: Option<Pin<&mut Sleep>>) {
    match sleep {
        Some(sleep) => sleep.await,
        None => std::future::pending().await,
    }
}
