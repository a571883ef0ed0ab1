use std::sync::{Arc, LazyLock};

use futures::StreamExt;
use parking_lot::Mutex;
use regex::Regex;
use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::chat::deadline::Deadlines;
use crate::chat::handle::{Chat, ChatStream};
use crate::chat::params::ChatParams;
use crate::chat::session::SessionConfig;
use crate::chat::site::ChatSite;
use crate::error::{ChatError, Result};
use crate::sites::{
    self, facebook::Facebook, reddit::Reddit, twitch::Twitch, younow::YouNow, youtube::YouTube,
    zoom::Zoom,
};

type SiteConstructor = fn(&SessionConfig) -> Result<Arc<dyn ChatSite>>;

struct SiteEntry {
    name: &'static str,
    regex: &'static LazyLock<Regex>,
    constructor: SiteConstructor,
}

macro_rules! site_registry {
    ( $( $name:literal : $regex:path => $builder:path ),+ $(,)? ) => {
        &[
            $(
                SiteEntry {
                    name: $name,
                    regex: &$regex,
                    constructor: |config| {
                        Ok(Arc::new($builder(config)?) as Arc<dyn ChatSite>)
                    },
                },
            )+
        ]
    };
}

static SITES: &[SiteEntry] = site_registry![
    "youtube": sites::youtube::URL_REGEX => YouTube::new,
    "twitch": sites::twitch::URL_REGEX => Twitch::new,
    "reddit": sites::reddit::URL_REGEX => Reddit::new,
    "younow": sites::younow::URL_REGEX => YouNow::new,
    "zoom": sites::zoom::URL_REGEX => Zoom::new,
    "facebook": sites::facebook::URL_REGEX => Facebook::new,
];

fn find_site(url: &str) -> Option<&'static SiteEntry> {
    SITES.iter().find(|site| site.regex.is_match(url))
}

/// Whether `url` already carries a scheme and host.
fn has_scheme(url: &str) -> bool {
    url::Url::parse(url).is_ok_and(|u| u.has_host())
}

/// Find the site handling `url`, prefixing `https://` once when the input
/// has no scheme. Returns the entry and the URL that matched.
fn match_site(url: &str) -> Result<(&'static SiteEntry, String)> {
    let url = url.trim();
    if let Some(site) = find_site(url) {
        return Ok((site, url.to_string()));
    }
    if has_scheme(url) {
        return Err(ChatError::SiteNotSupported(url.to_string()));
    }
    let prefixed = format!("https://{url}");
    if let Some(site) = find_site(&prefixed) {
        return Ok((site, prefixed));
    }
    if has_scheme(&prefixed) {
        Err(ChatError::SiteNotSupported(prefixed))
    } else {
        Err(ChatError::InvalidUrl(url.to_string()))
    }
}

/// Name of the site that would handle `url`, if any.
pub fn site_for_url(url: &str) -> Option<&'static str> {
    match_site(url).ok().map(|(site, _)| site.name)
}

/// Names of every supported site.
pub fn supported_sites() -> impl Iterator<Item = &'static str> {
    SITES.iter().map(|site| site.name)
}

/// Entry point: routes URLs to site sessions and hands back chat streams.
pub struct ChatDownloader {
    config: SessionConfig,
    sessions: Mutex<FxHashMap<&'static str, Arc<dyn ChatSite>>>,
    token: Mutex<CancellationToken>,
}

impl Default for ChatDownloader {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl ChatDownloader {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(FxHashMap::default()),
            token: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn session(&self, entry: &SiteEntry) -> Result<Arc<dyn ChatSite>> {
        let mut sessions = self.sessions.lock();
        if let Some(site) = sessions.get(entry.name) {
            return Ok(site.clone());
        }
        debug!(site = entry.name, "Creating site session");
        let site = (entry.constructor)(&self.config)?;
        sessions.insert(entry.name, site.clone());
        Ok(site)
    }

    /// Start retrieving chat for `url`.
    ///
    /// Parameter validation happens before any network request. The returned
    /// stream is capped to `max_messages` and ends when the overall or
    /// inactivity deadline expires.
    pub async fn get_chat(&self, url: &str, params: ChatParams) -> Result<Chat> {
        let (entry, url) = match_site(url)?;
        let site = self.session(entry)?;
        let resolved = params.resolve(site.defaults())?;
        let token = self.token.lock().child_token();

        info!(site = entry.name, url = %url, "Retrieving chat");
        let chat = site.get_chat(&url, resolved, token.clone()).await?;

        let deadlines = Deadlines {
            timeout: params.timeout,
            inactivity_timeout: params.inactivity_timeout,
            on_timeout: params.on_timeout,
            on_inactivity_timeout: params.on_inactivity_timeout,
        };
        let max_messages = params.max_messages;
        Ok(chat.map_events(move |events| {
            let events: ChatStream = match max_messages {
                Some(max) => Box::pin(events.take(max)),
                None => events,
            };
            deadlines.wrap(events, token)
        }))
    }

    /// Interrupt every active stream and drop all site sessions.
    pub fn close(&self) {
        let token = std::mem::replace(&mut *self.token.lock(), CancellationToken::new());
        token.cancel();
        let sessions: Vec<_> = self.sessions.lock().drain().collect();
        for (name, site) in sessions {
            debug!(site = name, "Closing site session");
            site.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("https://www.youtube.com/watch?v=dQw4w9WgXcQ", "youtube")]
    #[case("youtube.com/watch?v=dQw4w9WgXcQ", "youtube")]
    #[case("https://youtu.be/dQw4w9WgXcQ", "youtube")]
    #[case("https://www.twitch.tv/xqc", "twitch")]
    #[case("twitch.tv/videos/123456789", "twitch")]
    #[case("https://www.reddit.com/r/pan/comments/abc123/some_title/", "reddit")]
    #[case("https://www.younow.com/someone", "younow")]
    #[case("https://us02web.zoom.us/rec/play/abcDEF", "zoom")]
    #[case("https://www.facebook.com/someone/videos/1234567890/", "facebook")]
    fn test_site_for_url(#[case] url: &str, #[case] site: &str) {
        assert_eq!(site_for_url(url), Some(site));
    }

    #[test]
    fn test_unsupported_and_invalid_urls() {
        assert!(matches!(
            match_site("https://example.com/stream"),
            Err(ChatError::SiteNotSupported(_))
        ));
        assert!(matches!(
            match_site("example.com/stream"),
            Err(ChatError::SiteNotSupported(url)) if url == "https://example.com/stream"
        ));
        assert!(matches!(
            match_site("not a url at all"),
            Err(ChatError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_group_fails_before_network() {
        let downloader = ChatDownloader::default();
        let params = ChatParams::new().with_message_groups(["definitely_not_a_group"]);
        let err = downloader
            .get_chat("https://www.youtube.com/watch?v=dQw4w9WgXcQ", params)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidParameter(_)));
    }

    #[test]
    fn test_sessions_are_cached_and_closed() {
        let downloader = ChatDownloader::default();
        let entry = find_site("https://www.twitch.tv/xqc").unwrap();
        let a = downloader.session(entry).unwrap();
        let b = downloader.session(entry).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let token = downloader.token.lock().child_token();
        downloader.close();
        assert!(token.is_cancelled());
        assert!(downloader.sessions.lock().is_empty());
        assert!(!downloader.token.lock().is_cancelled());
    }
}
