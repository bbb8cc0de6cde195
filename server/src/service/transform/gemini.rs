use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{ChatCompletionRequest, ChatMessage, TokenUsage};
use crate::schema::enum_def::MessageRole;
use crate::utils::random_alphanumeric;

// --- Upstream request schema ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeminiPart {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeminiContent {
    pub role: String,
    pub parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GeminiSystemInstruction {
    pub parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeminiRequest {
    pub contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<GeminiSystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

/// Translates the expanded message list plus the request's sampling params
/// into the upstream's native schema. System messages fold into
/// `systemInstruction`; assistant messages take the upstream's `model` role.
pub fn build_gemini_request(request: &ChatCompletionRequest, messages: &[ChatMessage]) -> GeminiRequest {
    let mut contents = Vec::new();
    let mut system_parts = Vec::new();

    for message in messages {
        match message.role {
            MessageRole::System => system_parts.push(GeminiPart {
                text: message.content.clone(),
            }),
            MessageRole::User => contents.push(GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: message.content.clone(),
                }],
            }),
            MessageRole::Assistant => contents.push(GeminiContent {
                role: "model".to_string(),
                parts: vec![GeminiPart {
                    text: message.content.clone(),
                }],
            }),
        }
    }

    let generation_config = GenerationConfig {
        temperature: request.temperature,
        top_p: request.top_p,
        candidate_count: request.n,
        max_output_tokens: request.max_tokens,
        stop_sequences: request.stop.clone().map(|s| s.into_vec()),
        presence_penalty: request.presence_penalty,
        frequency_penalty: request.frequency_penalty,
    };
    let generation_config = if generation_config == GenerationConfig::default() {
        None
    } else {
        Some(generation_config)
    };

    GeminiRequest {
        contents,
        system_instruction: if system_parts.is_empty() {
            None
        } else {
            Some(GeminiSystemInstruction {
                parts: system_parts,
            })
        },
        generation_config,
    }
}

// --- Upstream response schema ---

#[derive(Debug, Clone, Deserialize)]
pub struct GeminiResponsePart {
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeminiResponseContent {
    #[serde(default)]
    pub parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiCandidate {
    pub content: Option<GeminiResponseContent>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: i32,
    #[serde(default)]
    pub candidates_token_count: i32,
    #[serde(default)]
    pub total_token_count: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiResponse {
    #[serde(default)]
    pub candidates: Vec<GeminiCandidate>,
    pub usage_metadata: Option<UsageMetadata>,
}

impl GeminiResponse {
    /// Concatenated text of the first candidate, or None when the body
    /// carries no textual content at all.
    pub fn candidate_text(&self) -> Option<String> {
        let candidate = self.candidates.first()?;
        let content = candidate.content.as_ref()?;
        let mut text = String::new();
        for part in &content.parts {
            if let Some(part_text) = &part.text {
                text.push_str(part_text);
            }
        }
        Some(text)
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.candidates.first()?.finish_reason.as_deref()
    }
}

pub fn map_finish_reason(upstream: &str) -> &'static str {
    match upstream {
        "MAX_TOKENS" => "length",
        _ => "stop",
    }
}

// --- Client-facing OpenAI schema ---

pub fn generate_completion_id() -> String {
    format!("chatcmpl-{}", random_alphanumeric(21))
}

#[derive(Debug, Serialize)]
pub struct UsageReport {
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub total_tokens: i32,
}

impl From<&TokenUsage> for UsageReport {
    fn from(usage: &TokenUsage) -> Self {
        Self {
            prompt_tokens: usage.input_tokens,
            completion_tokens: usage.output_tokens,
            total_tokens: usage.input_tokens + usage.output_tokens,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AssistantMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct CompletionChoice {
    pub index: u32,
    pub message: AssistantMessage,
    pub finish_reason: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<CompletionChoice>,
    pub usage: UsageReport,
}

impl ChatCompletionResponse {
    pub fn new(model: &str, content: String, finish_reason: &'static str, usage: &TokenUsage) -> Self {
        Self {
            id: generate_completion_id(),
            object: "chat.completion",
            created: Utc::now().timestamp(),
            model: model.to_string(),
            choices: vec![CompletionChoice {
                index: 0,
                message: AssistantMessage {
                    role: "assistant",
                    content,
                },
                finish_reason,
            }],
            usage: usage.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    pub finish_reason: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

impl ChatCompletionChunk {
    pub fn delta(id: &str, model: &str, content: String) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion.chunk",
            created: Utc::now().timestamp(),
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    content: Some(content),
                },
                finish_reason: None,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(messages: Vec<ChatMessage>) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "gemini-2.0-flash".to_string(),
            messages,
            stream: false,
            temperature: None,
            top_p: None,
            n: None,
            max_tokens: None,
            stop: None,
            presence_penalty: None,
            frequency_penalty: None,
            user: None,
        }
    }

    #[test]
    fn test_build_request_maps_roles() {
        let messages = vec![
            ChatMessage::new(MessageRole::System, "be helpful"),
            ChatMessage::new(MessageRole::User, "hi"),
            ChatMessage::new(MessageRole::Assistant, "hello"),
            ChatMessage::new(MessageRole::User, "bye"),
        ];
        let req = request(messages.clone());
        let payload = build_gemini_request(&req, &messages);

        assert_eq!(payload.contents.len(), 3);
        assert_eq!(payload.contents[0].role, "user");
        assert_eq!(payload.contents[1].role, "model");
        assert_eq!(payload.contents[2].role, "user");
        let system = payload.system_instruction.unwrap();
        assert_eq!(system.parts[0].text, "be helpful");
    }

    #[test]
    fn test_build_request_sampling_params() {
        let messages = vec![ChatMessage::new(MessageRole::User, "hi")];
        let mut req = request(messages.clone());
        req.temperature = Some(0.5);
        req.max_tokens = Some(100);
        req.stop = Some(super::super::StopSequences::One("END".to_string()));

        let payload = build_gemini_request(&req, &messages);
        let config = payload.generation_config.clone().unwrap();
        assert_eq!(config.temperature, Some(0.5));
        assert_eq!(config.max_output_tokens, Some(100));
        assert_eq!(config.stop_sequences, Some(vec!["END".to_string()]));

        let value = serde_json::to_value(&payload).unwrap();
        assert!(value.get("generationConfig").is_some());
        assert_eq!(value["generationConfig"]["maxOutputTokens"], json!(100));
    }

    #[test]
    fn test_build_request_omits_empty_config() {
        let messages = vec![ChatMessage::new(MessageRole::User, "hi")];
        let req = request(messages.clone());
        let payload = build_gemini_request(&req, &messages);
        assert!(payload.generation_config.is_none());

        let value = serde_json::to_value(&payload).unwrap();
        assert!(value.get("generationConfig").is_none());
        assert!(value.get("systemInstruction").is_none());
    }

    #[test]
    fn test_parse_response_text_and_usage() {
        let body = json!({
            "candidates": [{
                "content": {"parts": [{"text": "Hi "}, {"text": "there"}], "role": "model"},
                "finishReason": "STOP"
            }],
            "usageMetadata": {
                "promptTokenCount": 6,
                "candidatesTokenCount": 2,
                "totalTokenCount": 8
            }
        });
        let parsed: GeminiResponse = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.candidate_text().unwrap(), "Hi there");
        let usage = parsed.usage_metadata.unwrap();
        assert_eq!(usage.prompt_token_count, 6);
        assert_eq!(usage.candidates_token_count, 2);
        assert_eq!(usage.total_token_count, 8);
        assert_eq!(map_finish_reason(parsed.finish_reason().unwrap()), "stop");
    }

    #[test]
    fn test_parse_response_without_candidates() {
        let parsed: GeminiResponse = serde_json::from_value(json!({})).unwrap();
        assert!(parsed.candidate_text().is_none());
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(map_finish_reason("MAX_TOKENS"), "length");
        assert_eq!(map_finish_reason("STOP"), "stop");
        assert_eq!(map_finish_reason("SAFETY"), "stop");
    }

    #[test]
    fn test_chunk_shape() {
        let chunk = ChatCompletionChunk::delta("chatcmpl-test", "m", "abc".to_string());
        let value = serde_json::to_value(&chunk).unwrap();
        assert_eq!(value["object"], "chat.completion.chunk");
        assert_eq!(value["choices"][0]["delta"]["content"], "abc");
        assert_eq!(value["choices"][0]["finish_reason"], serde_json::Value::Null);
    }

    #[test]
    fn test_completion_response_shape() {
        let usage = TokenUsage {
            input_tokens: 6,
            output_tokens: 2,
            estimated: false,
        };
        let response =
            ChatCompletionResponse::new("m", "Hi there".to_string(), "stop", &usage);
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["choices"][0]["message"]["content"], "Hi there");
        assert_eq!(value["usage"]["prompt_tokens"], 6);
        assert_eq!(value["usage"]["completion_tokens"], 2);
        assert_eq!(value["usage"]["total_tokens"], 8);
        assert!(value["id"].as_str().unwrap().starts_with("chatcmpl-"));
    }
}
