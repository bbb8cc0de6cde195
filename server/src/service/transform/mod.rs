use serde::{Deserialize, Serialize};

use crate::schema::enum_def::MessageRole;

pub mod gemini;

/// One inbound or expanded chat message. Non-string content is rejected at
/// the parsing boundary; the pipeline operates on plain text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StopSequences {
    One(String),
    Many(Vec<String>),
}

impl StopSequences {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            StopSequences::One(s) => vec![s],
            StopSequences::Many(v) => v,
        }
    }
}

/// The OpenAI chat-completions request surface. Unknown fields are dropped by
/// deserialization; recognized sampling fields are forwarded to the upstream.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub n: Option<u32>,
    pub max_tokens: Option<u32>,
    pub stop: Option<StopSequences>,
    pub presence_penalty: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub user: Option<String>,
}

/// Token counts as reported by the upstream, or estimated when it stays
/// silent (codepoints / 4, rounded up, flagged as estimated).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TokenUsage {
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub estimated: bool,
}

pub fn estimate_tokens(text_codepoints: usize) -> i32 {
    text_codepoints.div_ceil(4) as i32
}

pub fn estimate_message_tokens(messages: &[ChatMessage]) -> i32 {
    let codepoints: usize = messages.iter().map(|m| m.content.chars().count()).sum();
    estimate_tokens(codepoints)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_drops_unknown_fields() {
        let raw = serde_json::json!({
            "model": "gemini-2.0-flash",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true,
            "logit_bias": {"50256": -100},
            "tools": [],
        });
        let parsed: ChatCompletionRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.model, "gemini-2.0-flash");
        assert!(parsed.stream);
        assert_eq!(parsed.messages.len(), 1);
        assert_eq!(parsed.messages[0].role, MessageRole::User);
    }

    #[test]
    fn test_stop_accepts_string_or_list() {
        let single: ChatCompletionRequest = serde_json::from_value(serde_json::json!({
            "model": "m", "messages": [], "stop": "END"
        }))
        .unwrap();
        assert_eq!(single.stop.unwrap().into_vec(), vec!["END"]);

        let many: ChatCompletionRequest = serde_json::from_value(serde_json::json!({
            "model": "m", "messages": [], "stop": ["a", "b"]
        }))
        .unwrap();
        assert_eq!(many.stop.unwrap().into_vec(), vec!["a", "b"]);
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(0), 0);
        assert_eq!(estimate_tokens(1), 1);
        assert_eq!(estimate_tokens(4), 1);
        assert_eq!(estimate_tokens(5), 2);
    }

    #[test]
    fn test_estimate_counts_codepoints_not_bytes() {
        let messages = vec![ChatMessage::new(MessageRole::User, "\u{1F680}\u{1F680}\u{1F680}\u{1F680}")];
        // Four codepoints, sixteen bytes.
        assert_eq!(estimate_message_tokens(&messages), 1);
    }
}
