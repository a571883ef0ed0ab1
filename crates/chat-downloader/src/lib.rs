//! Retrieve live and replay chat from streaming platforms as one stream of
//! normalized [`ChatEvent`]s.
//!
//! ```rust,no_run
//! use chat_downloader::{ChatDownloader, ChatParams};
//! use futures::StreamExt;
//!
//! # async fn run() -> chat_downloader::Result<()> {
//! let downloader = ChatDownloader::default();
//! let mut chat = downloader
//!     .get_chat(
//!         "https://www.youtube.com/watch?v=jfKfPfyJRdk",
//!         ChatParams::new().with_max_messages(10),
//!     )
//!     .await?;
//!
//! println!("{}", chat.title());
//! while let Some(event) = chat.next().await {
//!     let event = event?;
//!     println!("{}: {}", event.author.name, event.message.unwrap_or_default());
//! }
//! # Ok(())
//! # }
//! ```

pub mod chat;
pub mod error;
pub mod sites;
pub(crate) mod utils;

pub use chat::{
    Author, Badge, Chat, ChatDownloader, ChatEvent, ChatInfo, ChatParams, ChatStream, ChatType,
    Image, Money, RetryTimeout, SessionConfig,
};
pub use error::{ChatError, Result};
