//! Live comments over the post's websocket.

use async_stream::stream;
use futures::StreamExt;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::chat::handle::ChatStream;
use crate::chat::params::ResolvedParams;
use crate::chat::retry::retry;
use crate::error::ChatError;
use crate::sites::reddit::parser::parse_live_message;

enum Step {
    Cancelled,
    Idle,
    Frame(Option<Result<Message, tungstenite::Error>>),
}

pub struct LiveFeed {
    pub websocket_url: String,
    pub params: ResolvedParams,
    pub token: CancellationToken,
}

impl LiveFeed {
    /// Follow the websocket until cancelled, reconnecting through the retry
    /// policy when the connection drops.
    pub fn into_stream(self) -> ChatStream {
        Box::pin(stream! {
            let params = &self.params;
            let mut attempt = 1u32;

            loop {
                let connected = tokio::select! {
                    biased;
                    _ = self.token.cancelled() => Err(ChatError::Cancelled),
                    ws = connect_async(self.websocket_url.as_str()) => ws.map_err(ChatError::from),
                };
                let lost = match connected {
                    Ok((mut ws_stream, _)) => {
                        info!("Connected to Reddit live comments");
                        'session: loop {
                            let step = tokio::select! {
                                biased;
                                _ = self.token.cancelled() => Step::Cancelled,
                                frame = timeout(params.message_receive_timeout, ws_stream.next()) => match frame {
                                    Ok(frame) => Step::Frame(frame),
                                    Err(_) => Step::Idle,
                                },
                            };
                            match step {
                                Step::Cancelled => {
                                    let _ = ws_stream.close(None).await;
                                    yield Err(ChatError::Cancelled);
                                    return;
                                }
                                Step::Idle => continue,
                                Step::Frame(Some(Ok(Message::Text(text)))) => {
                                    attempt = 1;
                                    trace!(len = text.len(), "Received websocket frame");
                                    let Some(event) = parse_live_message(text.as_str()) else {
                                        continue;
                                    };
                                    if params.filter.must_add_item(&event.message_type) {
                                        yield Ok(event);
                                    }
                                }
                                Step::Frame(Some(Ok(Message::Close(frame)))) => {
                                    debug!(?frame, "Server closed websocket");
                                    break 'session ChatError::from(tungstenite::Error::ConnectionClosed);
                                }
                                Step::Frame(Some(Ok(_))) => {}
                                Step::Frame(Some(Err(e))) => break 'session ChatError::from(e),
                                Step::Frame(None) => {
                                    debug!("WebSocket stream closed");
                                    break 'session ChatError::from(tungstenite::Error::ConnectionClosed);
                                }
                            }
                        }
                    }
                    Err(e) if e.is_retryable() => e,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };

                info!(error = %lost, "Lost connection to Reddit live comments");
                if let Err(e) = retry(attempt, params.max_attempts, &lost, params.retry_timeout, &self.token).await {
                    yield Err(e);
                    return;
                }
                attempt += 1;
            }
        })
    }
}
