//! Comment replay for finished broadcasts.
//!
//! Comment ids come sorted by creation, so fixed-size id batches are ordered
//! by time. With a start offset, the first batch to read is found by a binary
//! search over batches instead of reading from the beginning.

use async_stream::stream;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::chat::event::ChatEvent;
use crate::chat::handle::ChatStream;
use crate::chat::params::ResolvedParams;
use crate::chat::retry::with_retries;
use crate::chat::session::Http;
use crate::error::{ChatError, Result};
use crate::sites::reddit::parser::parse_comment;
use crate::sites::reddit::seek::{BatchSearch, SearchStep};

/// Maximum ids per `api/info` request.
pub const BATCH_SIZE: usize = 100;

/// Sort base-36 comment ids into creation order.
pub fn sort_comment_ids(ids: &mut [String]) {
    ids.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
}

/// Observed offset range of a batch, if any of its comments carry one.
fn offset_range(events: &[ChatEvent]) -> Option<(f64, f64)> {
    events
        .iter()
        .filter_map(|e| e.time_in_seconds)
        .fold(None, |range, t| match range {
            None => Some((t, t)),
            Some((min, max)) => Some((f64::min(min, t), f64::max(max, t))),
        })
}

pub struct ReplayFeed {
    pub http: Http,
    /// Comment id listing endpoint, with the post id appended.
    pub comment_ids_url: String,
    /// `api/info` endpoint.
    pub info_url: String,
    /// Broadcast start in seconds since the epoch.
    pub start: Option<f64>,
    pub params: ResolvedParams,
    pub token: CancellationToken,
}

impl ReplayFeed {
    async fn comment_ids(&self) -> Result<Vec<String>> {
        let response: Value = self.http.get_json(&self.comment_ids_url).await?;
        let mut ids: Vec<String> = response
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| ChatError::parsing("comment id listing without data"))?
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect();
        sort_comment_ids(&mut ids);
        Ok(ids)
    }

    async fn fetch_batch(&self, ids: &[String]) -> Result<Vec<ChatEvent>> {
        let names = ids
            .iter()
            .map(|id| format!("t1_{id}"))
            .collect::<Vec<_>>()
            .join(",");
        let request = self
            .http
            .get(&self.info_url)
            .query(&[("id", names.as_str()), ("raw_json", "1")]);
        let response: Value = self.http.send_json(request).await?;
        let mut events: Vec<ChatEvent> = response
            .pointer("/data/children")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|child| child.get("data").and_then(Value::as_object))
            .filter_map(|data| parse_comment(data, self.start))
            .collect();
        events.sort_by(|a, b| {
            a.time_in_seconds
                .partial_cmp(&b.time_in_seconds)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.timestamp.cmp(&b.timestamp))
        });
        Ok(events)
    }

    pub fn into_stream(self) -> ChatStream {
        Box::pin(stream! {
            let params = &self.params;
            let ids = match with_retries(params.max_attempts, params.retry_timeout, &self.token, || self.comment_ids()).await {
                Ok(ids) => ids,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            debug!(comments = ids.len(), "Fetched Reddit comment ids");
            let mut batches = Batches::new(&self, ids);

            let first = match (params.start_time, self.start) {
                (Some(target), Some(_)) => match batches.seek(target).await {
                    Ok(index) => index,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                },
                _ => 0,
            };
            trace!(first, batches = batches.len(), "Starting Reddit replay");

            for index in first..batches.len() {
                let events = match batches.take(index).await {
                    Ok(events) => events,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                for event in events {
                    if let Some(t) = event.time_in_seconds {
                        if params.start_time.is_some_and(|s| t < s) {
                            continue;
                        }
                        if params.end_time.is_some_and(|e| t > e) {
                            debug!(time = t, "Reached end of requested window");
                            return;
                        }
                    }
                    if params.filter.must_add_item(&event.message_type) {
                        yield Ok(event);
                    }
                }
                if self.token.is_cancelled() {
                    yield Err(ChatError::Cancelled);
                    return;
                }
            }
        })
    }
}

/// Comment batches fetched on demand and kept by index until consumed.
struct Batches<'a> {
    feed: &'a ReplayFeed,
    ids: Vec<String>,
    cache: FxHashMap<usize, Vec<ChatEvent>>,
}

impl<'a> Batches<'a> {
    fn new(feed: &'a ReplayFeed, ids: Vec<String>) -> Self {
        Self {
            feed,
            ids,
            cache: FxHashMap::default(),
        }
    }

    fn len(&self) -> usize {
        self.ids.len().div_ceil(BATCH_SIZE)
    }

    async fn fetch(&self, index: usize) -> Result<Vec<ChatEvent>> {
        let from = index * BATCH_SIZE;
        let ids = &self.ids[from..(from + BATCH_SIZE).min(self.ids.len())];
        let params = &self.feed.params;
        with_retries(params.max_attempts, params.retry_timeout, &self.feed.token, || {
            self.feed.fetch_batch(ids)
        })
        .await
    }

    async fn range(&mut self, index: usize) -> Result<Option<(f64, f64)>> {
        if !self.cache.contains_key(&index) {
            let events = self.fetch(index).await?;
            self.cache.insert(index, events);
        }
        Ok(self.cache.get(&index).and_then(|events| offset_range(events)))
    }

    async fn take(&mut self, index: usize) -> Result<Vec<ChatEvent>> {
        match self.cache.remove(&index) {
            Some(events) => Ok(events),
            None => self.fetch(index).await,
        }
    }

    /// Index of the first batch to read for `target`.
    async fn seek(&mut self, target: f64) -> Result<usize> {
        let mut search = BatchSearch::new(target, self.len());
        let mut step = search.start();
        loop {
            match step {
                SearchStep::Continue(candidate) => {
                    let range = self.range(candidate).await?;
                    trace!(candidate, ?range, "Checked comment batch");
                    step = search.observe(candidate, range);
                }
                SearchStep::Found(index) => return Ok(index),
                SearchStep::Exhausted { insertion } => return Ok(insertion),
            }
        }
    }
}
