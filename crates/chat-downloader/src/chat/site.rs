//! The interface every platform adapter implements.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::chat::handle::Chat;
use crate::chat::params::{ResolvedParams, SiteDefaults};
use crate::error::Result;

/// A platform adapter session.
///
/// One instance is created lazily per platform and owns that platform's HTTP
/// client and caches. `get_chat` performs the initial metadata requests
/// eagerly and returns a [`Chat`] whose event stream is lazy.
#[async_trait]
pub trait ChatSite: Send + Sync {
    /// Lowercase site name (`"youtube"`, `"twitch"`, ...).
    fn name(&self) -> &'static str;

    fn defaults(&self) -> &'static SiteDefaults;

    /// Start retrieving chat for `url`. Every wait inside the returned stream
    /// observes `token`.
    async fn get_chat(
        &self,
        url: &str,
        params: ResolvedParams,
        token: CancellationToken,
    ) -> Result<Chat>;

    /// Release session resources. Called on [`ChatDownloader::close`].
    ///
    /// [`ChatDownloader::close`]: crate::ChatDownloader::close
    fn close(&self) {}
}
