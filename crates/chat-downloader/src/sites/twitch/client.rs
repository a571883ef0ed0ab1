//! Live chat over the Twitch IRC socket.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::chat::handle::ChatStream;
use crate::chat::params::ResolvedParams;
use crate::chat::retry::retry;
use crate::error::{ChatError, Result};
use crate::sites::twitch::badges::BadgeCache;
use crate::sites::twitch::irc::IrcBuffer;
use crate::sites::twitch::parser::parse_message;

/// Interval between unsolicited keepalive pings.
pub const PING_INTERVAL: Duration = Duration::from_secs(60);

fn anonymous_nick() -> String {
    format!("justinfan{}", rand::random::<u32>() % 100000)
}

/// Open the socket, log in anonymously and join `#channel`.
async fn connect(address: &str, channel: &str) -> Result<TcpStream> {
    let mut socket = TcpStream::connect(address).await?;
    let nick = anonymous_nick();
    let handshake = format!(
        "CAP REQ :twitch.tv/tags twitch.tv/commands\r\nPASS oauth:\r\nNICK {nick}\r\nJOIN #{channel}\r\n"
    );
    socket.write_all(handshake.as_bytes()).await?;
    debug!(address, nick = %nick, channel, "Sent IRC handshake");
    Ok(socket)
}

enum Step {
    Cancelled,
    Ping,
    Read(io::Result<usize>),
}

/// State for one live channel.
pub struct IrcFeed {
    /// `host:port` of the IRC server.
    pub address: String,
    /// Lowercase channel name without the `#`.
    pub channel: String,
    pub badges: Arc<BadgeCache>,
    pub params: ResolvedParams,
    pub token: CancellationToken,
    pub ping_interval: Duration,
}

impl IrcFeed {
    /// Read the channel until cancelled. Lost connections are re-established
    /// through the retry policy and the channel is joined again.
    pub fn into_stream(self) -> ChatStream {
        Box::pin(stream! {
            let params = &self.params;
            let mut attempt = 1u32;

            loop {
                let connected = tokio::select! {
                    biased;
                    _ = self.token.cancelled() => Err(ChatError::Cancelled),
                    socket = connect(&self.address, &self.channel) => socket,
                };
                let lost = match connected {
                    Ok(mut socket) => {
                        info!(channel = %self.channel, "Joined Twitch chat");
                        let mut buffer = IrcBuffer::new();
                        let mut read_buf = vec![0u8; params.buffer_size.max(1)];
                        let mut ping = interval_at(Instant::now() + self.ping_interval, self.ping_interval);

                        'session: loop {
                            let step = tokio::select! {
                                biased;
                                _ = self.token.cancelled() => Step::Cancelled,
                                _ = ping.tick() => Step::Ping,
                                read = socket.read(&mut read_buf) => Step::Read(read),
                            };
                            match step {
                                Step::Cancelled => {
                                    yield Err(ChatError::Cancelled);
                                    return;
                                }
                                Step::Ping => {
                                    trace!("Sending keepalive PING");
                                    if let Err(e) = socket.write_all(b"PING :tmi.twitch.tv\r\n").await {
                                        break 'session ChatError::from(e);
                                    }
                                }
                                Step::Read(Ok(0)) => {
                                    break 'session ChatError::Io(io::Error::new(
                                        io::ErrorKind::UnexpectedEof,
                                        "connection closed by server",
                                    ));
                                }
                                Step::Read(Err(e)) => break 'session ChatError::from(e),
                                Step::Read(Ok(n)) => {
                                    attempt = 1;
                                    let parsed = buffer.feed_bytes(&read_buf[..n]);
                                    for payload in &parsed.pings {
                                        trace!(payload = %payload, "Answering PING");
                                        let pong = format!("PONG {payload}\r\n");
                                        if let Err(e) = socket.write_all(pong.as_bytes()).await {
                                            break 'session ChatError::from(e);
                                        }
                                    }
                                    for message in &parsed.messages {
                                        let Some(mut event) = parse_message(message) else {
                                            continue;
                                        };
                                        if !params.filter.must_add_item(&event.message_type) {
                                            continue;
                                        }
                                        let room_id = event.extra_str("channel_id").map(String::from);
                                        self.badges
                                            .resolve(&mut event.author.badges, room_id.as_deref())
                                            .await;
                                        yield Ok(event);
                                    }
                                    if parsed.reconnect {
                                        info!("Server requested reconnect");
                                        break 'session ChatError::Io(io::Error::new(
                                            io::ErrorKind::ConnectionReset,
                                            "server requested reconnect",
                                        ));
                                    }
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

                info!(channel = %self.channel, error = %lost, "Lost connection to Twitch chat");
                if let Err(e) = retry(attempt, params.max_attempts, &lost, params.retry_timeout, &self.token).await {
                    yield Err(e);
                    return;
                }
                attempt += 1;
            }
        })
    }
}
