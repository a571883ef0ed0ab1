use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio_util::sync::CancellationToken;

use crate::chat::event::ChatEvent;
use crate::error::Result;

/// A boxed, lazily evaluated stream of chat events.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatEvent>> + Send>>;

/// Metadata about the stream a chat belongs to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatInfo {
    pub site: &'static str,
    /// Platform-specific identifier (video id, channel name, post id).
    pub id: String,
    pub title: String,
    /// Length in seconds, when known (replays).
    pub duration: Option<f64>,
    pub is_live: bool,
    /// Stream start in microseconds since the epoch.
    pub start_time: Option<i64>,
}

/// The result of a `get_chat` call: metadata plus a single-pass event
/// stream.
pub struct Chat {
    pub info: ChatInfo,
    events: ChatStream,
    token: CancellationToken,
}

impl Chat {
    pub fn new(info: ChatInfo, events: ChatStream, token: CancellationToken) -> Self {
        Self {
            info,
            events,
            token,
        }
    }

    pub fn site(&self) -> &'static str {
        self.info.site
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn title(&self) -> &str {
        &self.info.title
    }

    pub fn duration(&self) -> Option<f64> {
        self.info.duration
    }

    pub fn is_live(&self) -> bool {
        self.info.is_live
    }

    pub fn start_time(&self) -> Option<i64> {
        self.info.start_time
    }

    /// Interrupt the stream. The next poll yields
    /// [`ChatError::Cancelled`](crate::ChatError::Cancelled) and then ends.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Token observed by every wait in this chat's stream.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn map_events(mut self, f: impl FnOnce(ChatStream) -> ChatStream) -> Self {
        let events = std::mem::replace(&mut self.events, Box::pin(futures::stream::empty()));
        self.events = f(events);
        self
    }
}

impl Stream for Chat {
    type Item = Result<ChatEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for Chat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chat").field("info", &self.info).finish()
    }
}
