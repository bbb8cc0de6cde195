use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::response::Response;
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE};
use reqwest::StatusCode;
use tracing::{error, warn};

use super::logging::{get_log_manager, RequestLogContext, CLIENT_CLOSED_REQUEST};
use crate::schema::enum_def::LogStatus;
use crate::service::pool::{Lease, RetryKind, SettleOutcome};
use crate::service::rewrite::RegexPipeline;
use crate::service::transform::estimate_tokens;
use crate::service::transform::gemini::{
    generate_completion_id, ChatCompletionChunk, UsageMetadata,
};
use crate::service::upstream::{StreamEvent, UpstreamStream};
use crate::utils::sse::SseEvent;

/// Owns the lease and the log context for the lifetime of one relayed
/// stream. Every way the stream can end settles the lease and produces
/// exactly one log row: `complete` and `fail` handle the explicit paths, and
/// `Drop` covers the client disconnecting mid-stream.
struct RelayGuard {
    lease: Option<Lease>,
    context: Arc<Mutex<RequestLogContext>>,
    estimated_input: i32,
    output_codepoints: usize,
    saw_delta: bool,
    usage: Option<UsageMetadata>,
    finished: bool,
}

impl RelayGuard {
    fn new(lease: Lease, context: Arc<Mutex<RequestLogContext>>, estimated_input: i32) -> Self {
        Self {
            lease: Some(lease),
            context,
            estimated_input,
            output_codepoints: 0,
            saw_delta: false,
            usage: None,
            finished: false,
        }
    }

    fn on_delta(&mut self) {
        self.saw_delta = true;
        self.context.lock().unwrap().mark_first_delta();
    }

    fn add_output(&mut self, text: &str) {
        self.output_codepoints += text.chars().count();
    }

    fn set_usage(&mut self, usage: Option<UsageMetadata>) {
        if usage.is_some() {
            self.usage = usage;
        }
    }

    fn tokens(&self) -> (i64, i64, bool) {
        match self.usage {
            Some(meta) => (
                i64::from(meta.prompt_token_count),
                i64::from(meta.candidates_token_count),
                false,
            ),
            None => (
                i64::from(self.estimated_input),
                i64::from(estimate_tokens(self.output_codepoints)),
                true,
            ),
        }
    }

    fn record_tokens(&self, context: &mut RequestLogContext) {
        let (tokens_in, tokens_out, estimated) = self.tokens();
        context.input_tokens = Some(tokens_in as i32);
        context.output_tokens = Some(tokens_out as i32);
        context.tokens_estimated = estimated;
    }

    /// Normal end of stream.
    fn complete(&mut self) -> RequestLogContext {
        self.finished = true;
        let (tokens_in, tokens_out, _) = self.tokens();
        if let Some(lease) = self.lease.take() {
            lease.settle(SettleOutcome::Ok {
                tokens_in,
                tokens_out,
            });
        }
        let mut context = self.context.lock().unwrap();
        self.record_tokens(&mut context);
        context.finish(LogStatus::Ok, Some(200));
        context.clone()
    }

    /// The upstream broke after bytes were already flushed; the stream is
    /// truncated and the failure stays at the transport level.
    fn fail(&mut self) -> RequestLogContext {
        self.finished = true;
        if let Some(lease) = self.lease.take() {
            lease.settle(SettleOutcome::Retryable {
                kind: RetryKind::Transport,
                status_code: None,
            });
        }
        let mut context = self.context.lock().unwrap();
        self.record_tokens(&mut context);
        context.finish(LogStatus::Error, Some(200));
        context.clone()
    }
}

impl Drop for RelayGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Client disconnected mid-stream. The credential did its job if any
        // delta arrived; otherwise the attempt never proved out.
        if let Some(lease) = self.lease.take() {
            if self.saw_delta {
                let (tokens_in, tokens_out, _) = self.tokens();
                lease.settle(SettleOutcome::Ok {
                    tokens_in,
                    tokens_out,
                });
            } else {
                lease.settle(SettleOutcome::Retryable {
                    kind: RetryKind::Transport,
                    status_code: None,
                });
            }
        }
        let snapshot = {
            let mut context = self.context.lock().unwrap();
            warn!("stream for request {} cancelled by the client", context.id);
            self.record_tokens(&mut context);
            context.status = LogStatus::Error;
            if context.status_code.is_none() {
                context.status_code = Some(CLIENT_CLOSED_REQUEST);
            }
            context.completed_at = Some(chrono::Utc::now().timestamp_millis());
            context.clone()
        };
        get_log_manager().log_detached(snapshot);
    }
}

/// Relays a committed upstream stream to the client as OpenAI SSE chunks:
/// one chunk per upstream delta (post-phase rules applied per delta), then
/// the `[DONE]` sentinel. Deltas are flushed in upstream order.
pub(super) fn stream_response(
    lease: Lease,
    mut upstream: UpstreamStream,
    post_pipeline: RegexPipeline,
    context: Arc<Mutex<RequestLogContext>>,
    model: String,
    estimated_input: i32,
) -> Response<Body> {
    // The guard is created before the body is handed to the server so that a
    // response dropped without ever being polled still settles the lease and
    // writes its log row.
    let mut guard = RelayGuard::new(lease, context, estimated_input);

    let monitored_stream = async_stream::stream! {
        let completion_id = generate_completion_id();

        while let Some(event) = upstream.next().await {
            match event {
                StreamEvent::Delta(text) => {
                    guard.on_delta();
                    let rewritten = post_pipeline.apply(&text);
                    guard.add_output(&rewritten);
                    let chunk = ChatCompletionChunk::delta(&completion_id, &model, rewritten);
                    match serde_json::to_string(&chunk) {
                        Ok(payload) => {
                            let frame = SseEvent { event: None, data: payload };
                            yield Ok::<_, std::io::Error>(frame.to_bytes().freeze());
                        }
                        Err(e) => {
                            error!("failed to serialize stream chunk: {}", e);
                        }
                    }
                }
                StreamEvent::Summary { usage, .. } => {
                    guard.set_usage(usage);
                }
                StreamEvent::Error(failure) => {
                    warn!("upstream stream failed mid-relay: {}", failure);
                    let snapshot = guard.fail();
                    get_log_manager().log(snapshot).await;
                    return;
                }
            }
        }

        let snapshot = guard.complete();
        get_log_manager().log(snapshot).await;
        let done = SseEvent { event: None, data: "[DONE]".to_string() };
        yield Ok::<_, std::io::Error>(done.to_bytes().freeze());
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(monitored_stream))
        .unwrap()
}
