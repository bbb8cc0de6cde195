use bytes::Bytes;
use flate2::read::GzDecoder;
use futures::StreamExt;
use reqwest::header::CONTENT_ENCODING;
use reqwest::StatusCode;
use std::io::Read;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::config::CONFIG;
use crate::service::pool::{FatalKind, RetryKind};
use crate::service::transform::gemini::{GeminiRequest, GeminiResponse, UsageMetadata};
use crate::utils::sse::SseParser;

const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Error)]
pub enum UpstreamFailure {
    #[error("retryable upstream failure ({kind:?}): {message}")]
    Retryable {
        kind: RetryKind,
        status_code: Option<u16>,
        message: String,
    },
    #[error("fatal upstream failure ({kind:?}): {message}")]
    Fatal {
        kind: FatalKind,
        status_code: u16,
        message: String,
    },
}

impl UpstreamFailure {
    fn transport(message: String) -> Self {
        UpstreamFailure::Retryable {
            kind: RetryKind::Transport,
            status_code: None,
            message,
        }
    }
}

// Markers the upstream puts in a 400 body when the credential itself, not the
// request, is invalid.
const PERMANENT_INVALIDITY_MARKERS: [&str; 2] = ["API_KEY_INVALID", "API key not valid"];

/// Maps a non-2xx upstream status (plus its body) to the pool's settle
/// vocabulary.
pub fn classify_error_status(status: StatusCode, body: &str) -> UpstreamFailure {
    let code = status.as_u16();
    match code {
        429 => UpstreamFailure::Retryable {
            kind: RetryKind::RateLimited,
            status_code: Some(code),
            message: truncate(body),
        },
        401 => UpstreamFailure::Fatal {
            kind: FatalKind::Unauthorized,
            status_code: code,
            message: truncate(body),
        },
        403 => UpstreamFailure::Fatal {
            kind: FatalKind::Forbidden,
            status_code: code,
            message: truncate(body),
        },
        400 if PERMANENT_INVALIDITY_MARKERS
            .iter()
            .any(|marker| body.contains(marker)) =>
        {
            UpstreamFailure::Fatal {
                kind: FatalKind::PermanentlyInvalid,
                status_code: code,
                message: truncate(body),
            }
        }
        _ => UpstreamFailure::Retryable {
            kind: RetryKind::ServerError,
            status_code: Some(code),
            message: truncate(body),
        },
    }
}

fn truncate(body: &str) -> String {
    const LIMIT: usize = 512;
    if body.len() <= LIMIT {
        body.to_string()
    } else {
        let mut end = LIMIT;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body[..end].to_string()
    }
}

/// The complete result of a buffered upstream call.
#[derive(Debug)]
pub struct BufferedReply {
    pub text: String,
    pub usage: Option<UsageMetadata>,
    pub finish_reason: Option<String>,
}

/// One element of the streaming reply: text deltas in upstream order, then a
/// single trailing summary. The sequence is finite and not restartable.
#[derive(Debug)]
pub enum StreamEvent {
    Delta(String),
    Summary {
        usage: Option<UsageMetadata>,
        finish_reason: Option<String>,
    },
    Error(UpstreamFailure),
}

/// Consumer handle for a streaming call. Dropping it closes the underlying
/// transport within one poll of the relay task.
#[derive(Debug)]
pub struct UpstreamStream {
    receiver: mpsc::Receiver<StreamEvent>,
}

impl UpstreamStream {
    pub async fn next(&mut self) -> Option<StreamEvent> {
        self.receiver.recv().await
    }
}

/// Issues single calls to the upstream with a leased credential.
pub struct UpstreamClient {
    base_url: String,
    client: reqwest::Client,
}

impl UpstreamClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, UpstreamFailure> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| UpstreamFailure::transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    pub fn from_config() -> Result<Self, UpstreamFailure> {
        Self::new(CONFIG.upstream_base_url.clone())
    }

    /// Buffered mode: awaits the complete upstream response.
    pub async fn generate(
        &self,
        model: &str,
        secret: &str,
        payload: &GeminiRequest,
    ) -> Result<BufferedReply, UpstreamFailure> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, model);
        debug!("upstream request: {}", url);

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, secret)
            .json(payload)
            .send()
            .await
            .map_err(|e| UpstreamFailure::transport(format!("upstream request failed: {}", e)))?;

        let status = response.status();
        let is_gzip = response
            .headers()
            .get(CONTENT_ENCODING)
            .map_or(false, |value| value.to_str().unwrap_or("").contains("gzip"));

        let body_bytes = response
            .bytes()
            .await
            .map_err(|e| UpstreamFailure::transport(format!("failed to read upstream body: {}", e)))?;
        let body_bytes = decompress_if_needed(body_bytes, is_gzip);
        let body_str = String::from_utf8_lossy(&body_bytes);

        if !status.is_success() {
            error!("upstream returned {}: {}", status, truncate(&body_str));
            return Err(classify_error_status(status, &body_str));
        }

        let parsed: GeminiResponse = serde_json::from_slice(&body_bytes).map_err(|e| {
            UpstreamFailure::Retryable {
                kind: RetryKind::ServerError,
                status_code: Some(status.as_u16()),
                message: format!("malformed upstream body: {}", e),
            }
        })?;

        let text = parsed.candidate_text().ok_or_else(|| UpstreamFailure::Retryable {
            kind: RetryKind::ServerError,
            status_code: Some(status.as_u16()),
            message: "upstream body carried no candidate text".to_string(),
        })?;

        let finish_reason = parsed.finish_reason().map(|reason| reason.to_string());
        Ok(BufferedReply {
            text,
            usage: parsed.usage_metadata,
            finish_reason,
        })
    }

    /// Streaming mode: resolves once response headers arrive; the returned
    /// handle yields deltas as the upstream produces them.
    pub async fn stream_generate(
        &self,
        model: &str,
        secret: &str,
        payload: &GeminiRequest,
    ) -> Result<UpstreamStream, UpstreamFailure> {
        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent",
            self.base_url, model
        );
        debug!("upstream streaming request: {}", url);

        let response = self
            .client
            .post(&url)
            .query(&[("alt", "sse")])
            .header(API_KEY_HEADER, secret)
            .json(payload)
            .send()
            .await
            .map_err(|e| UpstreamFailure::transport(format!("upstream request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body_bytes = response.bytes().await.unwrap_or_default();
            let body_str = String::from_utf8_lossy(&body_bytes);
            error!("upstream stream returned {}: {}", status, truncate(&body_str));
            return Err(classify_error_status(status, &body_str));
        }

        let (sender, receiver) = mpsc::channel::<StreamEvent>(16);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut parser = SseParser::new();
            let mut usage: Option<UsageMetadata> = None;
            let mut finish_reason: Option<String> = None;

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let failure =
                            UpstreamFailure::transport(format!("upstream stream broke: {}", e));
                        let _ = sender.send(StreamEvent::Error(failure)).await;
                        return;
                    }
                };

                for event in parser.process(&chunk) {
                    let parsed: GeminiResponse = match serde_json::from_str(&event.data) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            warn!("skipping unparseable upstream event: {}", e);
                            continue;
                        }
                    };

                    if let Some(meta) = parsed.usage_metadata {
                        usage = Some(meta);
                    }
                    if let Some(reason) = parsed.finish_reason() {
                        finish_reason = Some(reason.to_string());
                    }
                    if let Some(text) = parsed.candidate_text() {
                        if !text.is_empty()
                            && sender.send(StreamEvent::Delta(text)).await.is_err()
                        {
                            // Consumer is gone; dropping the response closes
                            // the upstream connection.
                            return;
                        }
                    }
                }
            }

            let _ = sender
                .send(StreamEvent::Summary {
                    usage,
                    finish_reason,
                })
                .await;
        });

        Ok(UpstreamStream { receiver })
    }
}

fn decompress_if_needed(body: Bytes, is_gzip: bool) -> Bytes {
    if !is_gzip || body.is_empty() {
        return body;
    }
    let mut decoder = GzDecoder::new(&body[..]);
    let mut decompressed = Vec::new();
    match decoder.read_to_end(&mut decompressed) {
        Ok(_) => Bytes::from(decompressed),
        Err(e) => {
            error!("gzip decoding of upstream body failed: {}", e);
            body
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::enum_def::MessageRole;
    use crate::service::transform::gemini::build_gemini_request;
    use crate::service::transform::{ChatCompletionRequest, ChatMessage};
    use httpmock::prelude::*;
    use serde_json::json;

    fn payload() -> GeminiRequest {
        let messages = vec![ChatMessage::new(MessageRole::User, "Hi")];
        let request = ChatCompletionRequest {
            model: "gemini-2.0-flash".to_string(),
            messages: messages.clone(),
            stream: false,
            temperature: None,
            top_p: None,
            n: None,
            max_tokens: None,
            stop: None,
            presence_penalty: None,
            frequency_penalty: None,
            user: None,
        };
        build_gemini_request(&request, &messages)
    }

    #[tokio::test]
    async fn test_buffered_success() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1beta/models/gemini-2.0-flash:generateContent")
                    .header(API_KEY_HEADER, "sk-test");
                then.status(200).json_body(json!({
                    "candidates": [{
                        "content": {"parts": [{"text": "Hi there"}], "role": "model"},
                        "finishReason": "STOP"
                    }],
                    "usageMetadata": {
                        "promptTokenCount": 6,
                        "candidatesTokenCount": 2,
                        "totalTokenCount": 8
                    }
                }));
            })
            .await;

        let client = UpstreamClient::new(server.base_url()).unwrap();
        let reply = client
            .generate("gemini-2.0-flash", "sk-test", &payload())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(reply.text, "Hi there");
        let usage = reply.usage.unwrap();
        assert_eq!(usage.prompt_token_count, 6);
        assert_eq!(usage.candidates_token_count, 2);
        assert_eq!(reply.finish_reason.as_deref(), Some("STOP"));
    }

    #[tokio::test]
    async fn test_rate_limit_classification() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path_contains(":generateContent");
                then.status(429).body("slow down");
            })
            .await;

        let client = UpstreamClient::new(server.base_url()).unwrap();
        let failure = client
            .generate("gemini-2.0-flash", "sk-test", &payload())
            .await
            .unwrap_err();

        assert!(matches!(
            failure,
            UpstreamFailure::Retryable {
                kind: RetryKind::RateLimited,
                status_code: Some(429),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_forbidden_is_fatal() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path_contains(":generateContent");
                then.status(403).body("nope");
            })
            .await;

        let client = UpstreamClient::new(server.base_url()).unwrap();
        let failure = client
            .generate("gemini-2.0-flash", "sk-test", &payload())
            .await
            .unwrap_err();

        assert!(matches!(
            failure,
            UpstreamFailure::Fatal {
                kind: FatalKind::Forbidden,
                status_code: 403,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_invalid_key_400_is_permanently_invalid() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path_contains(":generateContent");
                then.status(400).json_body(json!({
                    "error": {
                        "code": 400,
                        "message": "API key not valid. Please pass a valid API key.",
                        "status": "INVALID_ARGUMENT",
                        "details": [{"reason": "API_KEY_INVALID"}]
                    }
                }));
            })
            .await;

        let client = UpstreamClient::new(server.base_url()).unwrap();
        let failure = client
            .generate("gemini-2.0-flash", "bad", &payload())
            .await
            .unwrap_err();

        assert!(matches!(
            failure,
            UpstreamFailure::Fatal {
                kind: FatalKind::PermanentlyInvalid,
                status_code: 400,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_malformed_success_body_is_retryable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path_contains(":generateContent");
                then.status(200).body("not json at all");
            })
            .await;

        let client = UpstreamClient::new(server.base_url()).unwrap();
        let failure = client
            .generate("gemini-2.0-flash", "sk-test", &payload())
            .await
            .unwrap_err();

        assert!(matches!(
            failure,
            UpstreamFailure::Retryable {
                kind: RetryKind::ServerError,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_streaming_deltas_and_summary() {
        let server = MockServer::start_async().await;
        let event = |text: &str| {
            format!(
                "data: {}\n\n",
                json!({"candidates": [{"content": {"parts": [{"text": text}], "role": "model"}}]})
            )
        };
        let final_event = format!(
            "data: {}\n\n",
            json!({
                "candidates": [{
                    "content": {"parts": [{"text": "az"}], "role": "model"},
                    "finishReason": "STOP"
                }],
                "usageMetadata": {"promptTokenCount": 6, "candidatesTokenCount": 3, "totalTokenCount": 9}
            })
        );
        let body = format!("{}{}{}", event("fo"), event("o b"), final_event);

        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1beta/models/gemini-2.0-flash:streamGenerateContent")
                    .query_param("alt", "sse");
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .body(body);
            })
            .await;

        let client = UpstreamClient::new(server.base_url()).unwrap();
        let mut stream = client
            .stream_generate("gemini-2.0-flash", "sk-test", &payload())
            .await
            .unwrap();

        let mut deltas = Vec::new();
        let mut summary = None;
        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::Delta(text) => deltas.push(text),
                StreamEvent::Summary {
                    usage,
                    finish_reason,
                } => {
                    summary = Some((usage, finish_reason));
                }
                StreamEvent::Error(e) => panic!("unexpected stream error: {}", e),
            }
        }

        assert_eq!(deltas, vec!["fo", "o b", "az"]);
        let (usage, finish_reason) = summary.unwrap();
        let usage = usage.unwrap();
        assert_eq!(usage.prompt_token_count, 6);
        assert_eq!(usage.candidates_token_count, 3);
        assert_eq!(finish_reason.as_deref(), Some("STOP"));
    }

    #[tokio::test]
    async fn test_streaming_error_status_before_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path_contains(":streamGenerateContent");
                then.status(500).body("boom");
            })
            .await;

        let client = UpstreamClient::new(server.base_url()).unwrap();
        let failure = client
            .stream_generate("gemini-2.0-flash", "sk-test", &payload())
            .await
            .unwrap_err();

        assert!(matches!(
            failure,
            UpstreamFailure::Retryable {
                kind: RetryKind::ServerError,
                status_code: Some(500),
                ..
            }
        ));
    }
}
