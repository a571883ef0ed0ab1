//! Chat retrieval error types.

use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, ChatError>;

/// Errors that can occur while retrieving chat.
#[derive(Error, Debug)]
pub enum ChatError {
    /// The input could not be interpreted as a URL of any kind.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The URL is well-formed but no site handles it.
    #[error("site not supported: {0}")]
    SiteNotSupported(String),

    /// A transient failure kept happening until the attempt budget ran out.
    #[error("maximum number of retries ({attempts}) exceeded: {last_error}")]
    RetriesExceeded { attempts: u32, last_error: String },

    /// HTML was returned where JSON was expected.
    #[error("unexpected HTML response: {title}")]
    UnexpectedHtml { title: String, html: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// The platform returned data in a shape we could not understand.
    #[error("parsing error: {0}")]
    Parsing(String),

    /// Rejected before any network call was made.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("video unavailable: {0}")]
    VideoUnavailable(String),

    #[error("login required: {0}")]
    LoginRequired(String),

    #[error("video unplayable: {0}")]
    VideoUnplayable(String),

    #[error("no chat replay: {0}")]
    NoChatReplay(String),

    #[error("chat disabled: {0}")]
    ChatDisabled(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    /// The stream was interrupted from outside (explicit cancel or session close).
    #[error("cancelled")]
    Cancelled,
}

impl ChatError {
    /// Create a parsing error.
    pub fn parsing(msg: impl Into<String>) -> Self {
        Self::Parsing(msg.into())
    }

    /// Create an invalid parameter error.
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// Create an unexpected HTML error, pulling the `<title>` out of the page.
    pub fn unexpected_html(html: impl Into<String>) -> Self {
        let html = html.into();
        let title = html
            .split_once("<title>")
            .and_then(|(_, rest)| rest.split_once("</title>"))
            .map(|(title, _)| title.trim().to_string())
            .unwrap_or_default();
        Self::UnexpectedHtml { title, html }
    }

    /// Whether the failure is transient and worth another attempt.
    ///
    /// Platform-reported unavailability, parameter errors and cancellation
    /// are surfaced immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => !e.is_builder() && !e.is_redirect(),
            Self::Json(_) | Self::Io(_) | Self::WebSocket(_) | Self::UnexpectedHtml { .. } => true,
            _ => false,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ChatError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unexpected_html_extracts_title() {
        let err = ChatError::unexpected_html(
            "<html><head><title> Sorry... </title></head><body>blocked</body></html>",
        );
        match err {
            ChatError::UnexpectedHtml { title, html } => {
                assert_eq!(title, "Sorry...");
                assert!(html.contains("blocked"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ChatError::unexpected_html("<html></html>").is_retryable());
        assert!(ChatError::Io(std::io::Error::other("reset")).is_retryable());
        assert!(!ChatError::VideoUnavailable("gone".into()).is_retryable());
        assert!(!ChatError::Cancelled.is_retryable());
        assert!(!ChatError::invalid_parameter("bad group").is_retryable());
    }
}
