//! Continuation polling loop.

use std::time::Duration;

use async_stream::stream;
use serde_json::{Value, json};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::chat::event::ChatEvent;
use crate::chat::handle::ChatStream;
use crate::chat::params::ResolvedParams;
use crate::chat::poll::RecentIds;
use crate::chat::retry::{interruptible_sleep, with_retries};
use crate::chat::session::Http;
use crate::error::{ChatError, Result};
use crate::sites::youtube::parser::{flatten_actions, parse_event};

/// One response from the chat endpoint.
#[derive(Debug, Default)]
pub struct Batch {
    pub actions: Vec<Value>,
    pub continuation: Option<String>,
    /// Suggested wait before the next request.
    pub timeout_ms: Option<u64>,
}

const CONTINUATION_KINDS: &[&str] = &[
    "invalidationContinuationData",
    "timedContinuationData",
    "reloadContinuationData",
    "liveChatReplayContinuationData",
];

impl Batch {
    pub fn from_response(response: &Value) -> Self {
        let Some(contents) = response.pointer("/continuationContents/liveChatContinuation") else {
            return Self::default();
        };
        let actions = contents
            .get("actions")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let data = contents
            .get("continuations")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .and_then(|c| CONTINUATION_KINDS.iter().find_map(|kind| c.get(*kind)));
        // `playerSeekContinuationData` only hints at a seek; the replay loop
        // re-polls its current continuation instead.
        let continuation = data
            .and_then(|d| d.get("continuation"))
            .and_then(Value::as_str)
            .map(String::from);
        let timeout_ms = data.and_then(|d| d.get("timeoutMs")).and_then(Value::as_u64);

        Self {
            actions,
            continuation,
            timeout_ms,
        }
    }
}

/// What to do with a replay event relative to the requested window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowDecision {
    Emit,
    Skip,
    Stop,
}

/// Apply the replay window.
///
/// While still seeking (`seeking == true`) events before the start are
/// skipped. Once past the seek, the feed is ordered by offset, so any event
/// outside the window ends the stream.
pub fn window_decision(
    time_in_seconds: Option<f64>,
    start: Option<f64>,
    end: Option<f64>,
    seeking: bool,
) -> WindowDecision {
    let Some(t) = time_in_seconds else {
        return WindowDecision::Emit;
    };
    let before_start = start.is_some_and(|s| t < s);
    let after_end = end.is_some_and(|e| t > e);
    match (before_start, after_end) {
        (false, false) => WindowDecision::Emit,
        (true, _) if seeking => WindowDecision::Skip,
        _ => WindowDecision::Stop,
    }
}

/// Wait suggested by the server, bounded so the caller's own deadlines are
/// never overshot.
pub fn backpressure_delay(
    suggested: Duration,
    started: Instant,
    last_activity: Instant,
    timeout: Option<Duration>,
    inactivity_timeout: Option<Duration>,
    now: Instant,
) -> Duration {
    let mut delay = suggested;
    if let Some(timeout) = timeout {
        delay = delay.min((started + timeout).saturating_duration_since(now));
    }
    if let Some(inactivity) = inactivity_timeout {
        delay = delay.min((last_activity + inactivity).saturating_duration_since(now));
    }
    delay
}

/// Everything the polling loop needs.
pub struct Feed {
    pub http: Http,
    /// Chat endpoint URL including the api key.
    pub endpoint: String,
    pub context: Value,
    pub continuation: String,
    pub is_live: bool,
    pub params: ResolvedParams,
    pub token: CancellationToken,
}

impl Feed {
    async fn fetch(&self, continuation: &str, offset_ms: Option<i64>) -> Result<Batch> {
        let mut body = json!({
            "context": self.context,
            "continuation": continuation,
        });
        if let Some(offset) = offset_ms {
            body["currentPlayerState"] = json!({ "playerOffsetMs": offset.to_string() });
        }
        let response: Value = self.http.post_json(&self.endpoint, &body).await?;
        Ok(Batch::from_response(&response))
    }

    pub fn into_stream(self) -> ChatStream {
        Box::pin(stream! {
            let params = &self.params;
            let started = Instant::now();
            let mut last_activity = started;
            let mut continuation = self.continuation.clone();
            let start_ms = params.start_time.map(|s| (s * 1000.0) as i64);
            // Batch 0 is the bootstrap request without an offset, batch 1 the
            // first request seeking to the start.
            let mut batch_number = 0u32;
            let mut last_offset: Option<i64> = None;
            let mut recent = RecentIds::default();

            loop {
                let offset_ms = if self.is_live || batch_number == 0 {
                    None
                } else {
                    Some(last_offset.unwrap_or(0).max(start_ms.unwrap_or(0)))
                };

                let fetched = with_retries(params.max_attempts, params.retry_timeout, &self.token, || {
                    self.fetch(&continuation, offset_ms)
                })
                .await;
                let batch = match fetched {
                    Ok(batch) => batch,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                trace!(
                    actions = batch.actions.len(),
                    has_continuation = batch.continuation.is_some(),
                    "Received chat batch"
                );

                let seeking = batch_number <= 1;
                let offset_before = last_offset;
                for (action, offset) in flatten_actions(&batch.actions) {
                    let Some(event) = parse_event(action, offset) else {
                        continue;
                    };
                    if !self.is_live {
                        match window_decision(event.time_in_seconds, params.start_time, params.end_time, seeking) {
                            WindowDecision::Emit => {}
                            WindowDecision::Skip => continue,
                            WindowDecision::Stop => {
                                debug!(time = ?event.time_in_seconds, "Reached end of requested window");
                                return;
                            }
                        }
                        if offset.is_some() {
                            last_offset = offset;
                        }
                        // Re-polling from an offset may repeat the last events.
                        if let Some(id) = event.message_id.as_deref() {
                            if !recent.insert(id) {
                                continue;
                            }
                        }
                    }
                    if params.filter.must_add_item(&event.message_type) {
                        last_activity = Instant::now();
                        yield Ok::<ChatEvent, _>(event);
                    }
                }

                let had_actions = !batch.actions.is_empty();
                match batch.continuation {
                    Some(next) => continuation = next,
                    None if self.is_live => {
                        info!("Live stream ended");
                        return;
                    }
                    None if !had_actions => {
                        debug!("Replay finished");
                        return;
                    }
                    // Keep the current continuation and seek past the last
                    // event seen.
                    None if batch_number == 0 || last_offset > offset_before => {}
                    None => {
                        debug!(offset = ?last_offset, "Replay stopped advancing");
                        return;
                    }
                }
                batch_number += 1;

                if self.is_live {
                    let suggested = Duration::from_millis(batch.timeout_ms.unwrap_or(0));
                    let delay = backpressure_delay(
                        suggested,
                        started,
                        last_activity,
                        params.timeout,
                        params.inactivity_timeout,
                        Instant::now(),
                    );
                    if let Err(e) = interruptible_sleep(delay, &self.token).await {
                        yield Err(e);
                        return;
                    }
                } else if self.token.is_cancelled() {
                    yield Err(ChatError::Cancelled);
                    return;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::session::SessionConfig;
    use futures::StreamExt;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CHAT_PATH: &str = "/youtubei/v1/live_chat/get_live_chat";

    fn text_action(id: &str) -> Value {
        json!({"addChatItemAction": {"item": {"liveChatTextMessageRenderer": {
            "id": id,
            "message": {"runs": [{"text": id}]},
            "authorName": {"simpleText": "viewer"},
            "authorExternalChannelId": "UCviewer",
            "timestampUsec": "1600000000000000"
        }}}})
    }

    fn replay_action(id: &str, offset_ms: u64) -> Value {
        json!({"replayChatItemAction": {
            "videoOffsetTimeMsec": offset_ms.to_string(),
            "actions": [text_action(id)]
        }})
    }

    fn response(actions: Vec<Value>, continuations: Value) -> Value {
        json!({"continuationContents": {"liveChatContinuation": {
            "actions": actions,
            "continuations": continuations
        }}})
    }

    async fn mount(server: &MockServer, body: Value, reply: Value) {
        Mock::given(method("POST"))
            .and(path(CHAT_PATH))
            .and(body_partial_json(body))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply))
            .mount(server)
            .await;
    }

    fn feed(server: &MockServer, continuation: &str, is_live: bool) -> Feed {
        let config = SessionConfig::default();
        Feed {
            http: Http::new(config.build_client().unwrap(), &config),
            endpoint: format!("{}{CHAT_PATH}", server.uri()),
            context: json!({"client": {"clientName": "WEB"}}),
            continuation: continuation.to_string(),
            is_live,
            params: ResolvedParams::default(),
            token: CancellationToken::new(),
        }
    }

    fn ids(events: Vec<Result<ChatEvent>>) -> Vec<String> {
        events
            .into_iter()
            .map(|e| e.unwrap().message_id.unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_replay_repolls_without_continuation() {
        let server = MockServer::start().await;
        mount(
            &server,
            json!({"continuation": "c1"}),
            response(
                vec![replay_action("a", 1000)],
                json!([{"liveChatReplayContinuationData": {"continuation": "c2"}}]),
            ),
        )
        .await;
        mount(
            &server,
            json!({"continuation": "c2", "currentPlayerState": {"playerOffsetMs": "1000"}}),
            response(
                vec![replay_action("a", 1000), replay_action("b", 2000)],
                json!([{"playerSeekContinuationData": {"continuation": "seek"}}]),
            ),
        )
        .await;
        mount(
            &server,
            json!({"continuation": "c2", "currentPlayerState": {"playerOffsetMs": "2000"}}),
            response(vec![replay_action("c", 3000)], json!([])),
        )
        .await;
        mount(
            &server,
            json!({"continuation": "c2", "currentPlayerState": {"playerOffsetMs": "3000"}}),
            response(vec![], json!([])),
        )
        .await;

        let events: Vec<_> = feed(&server, "c1", false).into_stream().collect().await;
        assert_eq!(ids(events), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_replay_stops_when_offset_does_not_advance() {
        let server = MockServer::start().await;
        mount(
            &server,
            json!({"continuation": "c1"}),
            response(
                vec![replay_action("a", 1000)],
                json!([{"liveChatReplayContinuationData": {"continuation": "c2"}}]),
            ),
        )
        .await;
        mount(
            &server,
            json!({"continuation": "c2"}),
            response(vec![replay_action("a", 1000)], json!([])),
        )
        .await;

        let events: Vec<_> = feed(&server, "c1", false).into_stream().collect().await;
        assert_eq!(ids(events), vec!["a"]);
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_live_waits_between_polls_and_ends_without_continuation() {
        let server = MockServer::start().await;
        mount(
            &server,
            json!({"continuation": "l1"}),
            response(
                vec![text_action("a")],
                json!([{"timedContinuationData": {"continuation": "l2", "timeoutMs": 300}}]),
            ),
        )
        .await;
        mount(
            &server,
            json!({"continuation": "l2"}),
            response(vec![text_action("b")], json!([])),
        )
        .await;

        let started = std::time::Instant::now();
        let events: Vec<_> = feed(&server, "l1", true).into_stream().collect().await;
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(ids(events), vec!["a", "b"]);

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        for request in requests {
            let body: Value = serde_json::from_slice(&request.body).unwrap();
            assert!(body.get("currentPlayerState").is_none());
        }
    }

    #[test]
    fn test_window_first_batch_skips_early_events() {
        let (start, end) = (Some(20.0), Some(40.0));
        assert_eq!(window_decision(Some(5.0), start, end, true), WindowDecision::Skip);
        assert_eq!(window_decision(Some(25.0), start, end, true), WindowDecision::Emit);
        assert_eq!(window_decision(Some(45.0), start, end, true), WindowDecision::Stop);
    }

    // Later batches are assumed ordered: an early event there means the feed
    // jumped backwards, and the stream ends rather than skipping.
    #[test]
    fn test_window_later_batches_stop_on_any_out_of_range_event() {
        let (start, end) = (Some(20.0), Some(40.0));
        assert_eq!(window_decision(Some(5.0), start, end, false), WindowDecision::Stop);
        assert_eq!(window_decision(Some(45.0), start, end, false), WindowDecision::Stop);
        assert_eq!(window_decision(Some(30.0), start, end, false), WindowDecision::Emit);
        assert_eq!(window_decision(None, start, end, false), WindowDecision::Emit);
    }

    #[test]
    fn test_backpressure_delay_respects_deadlines() {
        let now = Instant::now();
        let started = now - Duration::from_secs(8);
        let last = now - Duration::from_secs(1);

        let delay = backpressure_delay(Duration::from_secs(5), started, last, None, None, now);
        assert_eq!(delay, Duration::from_secs(5));

        let delay = backpressure_delay(
            Duration::from_secs(5),
            started,
            last,
            Some(Duration::from_secs(10)),
            None,
            now,
        );
        assert_eq!(delay, Duration::from_secs(2));

        let delay = backpressure_delay(
            Duration::from_secs(5),
            started,
            last,
            Some(Duration::from_secs(10)),
            Some(Duration::from_secs(2)),
            now,
        );
        assert_eq!(delay, Duration::from_secs(1));
    }

    #[test]
    fn test_batch_from_response() {
        let response = json!({"continuationContents": {"liveChatContinuation": {
            "actions": [{"addChatItemAction": {}}],
            "continuations": [{"timedContinuationData": {"continuation": "next", "timeoutMs": 5000}}]
        }}});
        let batch = Batch::from_response(&response);
        assert_eq!(batch.actions.len(), 1);
        assert_eq!(batch.continuation.as_deref(), Some("next"));
        assert_eq!(batch.timeout_ms, Some(5000));

        let end = json!({"continuationContents": {"liveChatContinuation": {
            "continuations": [{"playerSeekContinuationData": {"continuation": "seek"}}]
        }}});
        assert!(Batch::from_response(&end).continuation.is_none());
        assert!(Batch::from_response(&json!({})).actions.is_empty());
    }
}
