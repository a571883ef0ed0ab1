//! Session-wide configuration and the shared HTTP helper every site uses.

use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder};
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{ChatError, Result};

pub(crate) const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Settings shared by every chat retrieved through one downloader.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Proxy URL handed straight to the HTTP client.
    pub proxy: Option<String>,
    /// Raw `Cookie` header value (`name=value; other=value`).
    pub cookies: Option<String>,
    pub user_agent: String,
    pub http_timeout: Duration,
    /// Base URL overrides keyed by site name, for pointing a site at a
    /// local server.
    pub base_urls: FxHashMap<&'static str, String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            cookies: None,
            user_agent: DEFAULT_UA.to_string(),
            http_timeout: Duration::from_secs(30),
            base_urls: FxHashMap::default(),
        }
    }
}

impl SessionConfig {
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn with_cookies(mut self, cookies: impl Into<String>) -> Self {
        self.cookies = Some(cookies.into());
        self
    }

    pub fn with_base_url(mut self, site: &'static str, url: impl Into<String>) -> Self {
        self.base_urls
            .insert(site, url.into().trim_end_matches('/').to_string());
        self
    }

    /// The base URL to use for `key`, or `default` when not overridden.
    pub fn base_url(&self, key: &str, default: &str) -> String {
        self.base_urls
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    pub fn build_client(&self) -> Result<Client> {
        let mut builder = Client::builder()
            .user_agent(self.user_agent.clone())
            .timeout(self.http_timeout)
            .cookie_store(true);
        if let Some(proxy) = &self.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        Ok(builder.build()?)
    }
}

/// HTTP client plus the default headers of one site.
#[derive(Debug, Clone)]
pub struct Http {
    client: Client,
    headers: HeaderMap,
}

impl Http {
    pub fn new(client: Client, config: &SessionConfig) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.9"),
        );
        let mut http = Self { client, headers };
        if let Some(cookies) = &config.cookies {
            http.insert_header(header::COOKIE, cookies);
        }
        http
    }

    /// Insert a default header, skipping values that are not valid header
    /// text.
    pub fn insert_header<K: Into<HeaderName>>(&mut self, key: K, value: &str) {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                self.headers.insert(key.into(), value);
            }
            Err(e) => debug!(error = %e, "Invalid header value; skipping"),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.client.get(url).headers(self.headers.clone())
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.client.post(url).headers(self.headers.clone())
    }

    /// Send a request and return the body, failing on non-success status.
    pub async fn send_text(&self, request: RequestBuilder) -> Result<String> {
        let response = request.send().await?.error_for_status()?;
        Ok(response.text().await?)
    }

    /// Send a request and decode a JSON body. HTML bodies are reported as
    /// [`ChatError::UnexpectedHtml`].
    pub async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let body = self.send_text(request).await?;
        parse_json_body(&body)
    }

    pub async fn get_text(&self, url: &str) -> Result<String> {
        self.send_text(self.get(url)).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        self.send_json(self.get(url)).await
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T> {
        self.send_json(self.post(url).json(body)).await
    }
}

/// Decode a response body, distinguishing HTML pages from broken JSON.
pub fn parse_json_body<T: DeserializeOwned>(body: &str) -> Result<T> {
    match serde_json::from_str(body) {
        Ok(value) => Ok(value),
        Err(e) => {
            let head = body.trim_start();
            if head.starts_with('<') {
                Err(ChatError::unexpected_html(body))
            } else {
                Err(e.into())
            }
        }
    }
}
