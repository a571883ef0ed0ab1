//! Per-call chat parameters and per-site defaults.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::chat::filter::{MessageFilter, MessageGroups};
use crate::chat::retry::RetryTimeout;
use crate::chat::time::parse_time;
use crate::error::{ChatError, Result};

/// Default number of attempts before giving up on a transient failure.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 15;

/// Which YouTube chat feed to follow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChatType {
    #[default]
    Live,
    Top,
}

/// Callback fired when a deadline expires.
#[derive(Clone)]
pub struct Callback(Arc<dyn Fn() + Send + Sync>);

impl Callback {
    pub fn new(f: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn call(&self) {
        (self.0)()
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback")
    }
}

/// Parameters for a single `get_chat` call.
///
/// Site-specific knobs left as `None` are filled from the site's
/// [`SiteDefaults`].
#[derive(Debug, Clone)]
pub struct ChatParams {
    /// Replay offset (seconds) to start from.
    pub start_time: Option<f64>,
    /// Replay offset (seconds) to stop at.
    pub end_time: Option<f64>,
    pub max_attempts: u32,
    pub retry_timeout: RetryTimeout,
    /// Hard deadline measured from the start of the stream.
    pub timeout: Option<Duration>,
    /// Deadline reset every time an event is produced.
    pub inactivity_timeout: Option<Duration>,
    pub on_timeout: Option<Callback>,
    pub on_inactivity_timeout: Option<Callback>,
    pub max_messages: Option<usize>,
    pub message_groups: Option<Vec<String>>,
    pub message_types: Option<Vec<String>>,
    pub chat_type: Option<ChatType>,
    /// IRC receive buffer size in bytes.
    pub buffer_size: Option<usize>,
    /// Websocket read timeout.
    pub message_receive_timeout: Option<Duration>,
}

impl Default for ChatParams {
    fn default() -> Self {
        Self {
            start_time: None,
            end_time: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_timeout: RetryTimeout::default(),
            timeout: None,
            inactivity_timeout: None,
            on_timeout: None,
            on_inactivity_timeout: None,
            max_messages: None,
            message_groups: None,
            message_types: None,
            chat_type: None,
            buffer_size: None,
            message_receive_timeout: None,
        }
    }
}

impl ChatParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the start offset from seconds or `hh:mm:ss` text.
    pub fn with_start_time(mut self, value: &str) -> Result<Self> {
        self.start_time = Some(parse_time(value)?);
        Ok(self)
    }

    /// Set the end offset from seconds or `hh:mm:ss` text.
    pub fn with_end_time(mut self, value: &str) -> Result<Self> {
        self.end_time = Some(parse_time(value)?);
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = Some(timeout);
        self
    }

    pub fn on_timeout(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_timeout = Some(Callback::new(f));
        self
    }

    pub fn on_inactivity_timeout(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_inactivity_timeout = Some(Callback::new(f));
        self
    }

    pub fn with_max_messages(mut self, max: usize) -> Self {
        self.max_messages = Some(max);
        self
    }

    pub fn with_message_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.message_groups = Some(groups.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_message_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.message_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, retry_timeout: RetryTimeout) -> Self {
        self.max_attempts = max_attempts;
        self.retry_timeout = retry_timeout;
        self
    }

    /// Fill unset knobs from `defaults` and validate the result.
    pub fn resolve(&self, defaults: &SiteDefaults) -> Result<ResolvedParams> {
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if start > end {
                return Err(ChatError::invalid_parameter(format!(
                    "start_time ({start}) is after end_time ({end})"
                )));
            }
        }
        if self.max_attempts == 0 {
            return Err(ChatError::invalid_parameter("max_attempts must be at least 1"));
        }

        let groups = self.message_groups.clone().unwrap_or_else(|| {
            defaults
                .message_groups
                .iter()
                .map(|g| g.to_string())
                .collect()
        });
        let types = self.message_types.clone().unwrap_or_default();
        let filter = MessageFilter::new(defaults.groups, &groups, &types)?;

        Ok(ResolvedParams {
            start_time: self.start_time,
            end_time: self.end_time,
            max_attempts: self.max_attempts,
            retry_timeout: self.retry_timeout,
            timeout: self.timeout,
            inactivity_timeout: self.inactivity_timeout,
            filter,
            chat_type: self.chat_type.unwrap_or(defaults.chat_type),
            buffer_size: self.buffer_size.unwrap_or(defaults.buffer_size),
            message_receive_timeout: self
                .message_receive_timeout
                .unwrap_or(defaults.message_receive_timeout),
        })
    }
}

/// Defaults a site supplies once at construction.
pub struct SiteDefaults {
    pub groups: &'static MessageGroups,
    pub message_groups: &'static [&'static str],
    pub chat_type: ChatType,
    pub buffer_size: usize,
    pub message_receive_timeout: Duration,
}

impl SiteDefaults {
    pub const fn new(groups: &'static MessageGroups, message_groups: &'static [&'static str]) -> Self {
        Self {
            groups,
            message_groups,
            chat_type: ChatType::Live,
            buffer_size: 4096,
            message_receive_timeout: Duration::from_millis(100),
        }
    }
}

/// Parameters after defaults have been applied, as seen by a site.
#[derive(Debug, Clone)]
pub struct ResolvedParams {
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub max_attempts: u32,
    pub retry_timeout: RetryTimeout,
    pub timeout: Option<Duration>,
    pub inactivity_timeout: Option<Duration>,
    pub filter: MessageFilter,
    pub chat_type: ChatType,
    pub buffer_size: usize,
    pub message_receive_timeout: Duration,
}

impl Default for ResolvedParams {
    fn default() -> Self {
        Self {
            start_time: None,
            end_time: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_timeout: RetryTimeout::default(),
            timeout: None,
            inactivity_timeout: None,
            filter: MessageFilter::pass_all(),
            chat_type: ChatType::Live,
            buffer_size: 4096,
            message_receive_timeout: Duration::from_millis(100),
        }
    }
}
