use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::provider::{ProviderAdapter, ProviderRequest};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct ClaudeRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

/// Anthropic Messages API: the system prompt travels in its own field and
/// the reply is a list of typed content blocks.
pub struct ClaudeAdapter {
    api_key: String,
    model: String,
    base_url: String,
}

impl ClaudeAdapter {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            api_key,
            model,
            base_url,
        }
    }
}

impl ProviderAdapter for ClaudeAdapter {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("x-api-key", self.api_key.clone()),
            ("anthropic-version", ANTHROPIC_VERSION.to_string()),
            ("content-type", "application/json".to_string()),
        ]
    }

    fn to_wire(&self, request: &ProviderRequest) -> Value {
        let body = ClaudeRequest {
            model: &self.model,
            max_tokens: request.max_output_tokens,
            system: &request.system,
            messages: vec![Message {
                role: "user",
                content: &request.user,
            }],
            temperature: request.temperature,
        };
        serde_json::to_value(body).unwrap_or(Value::Null)
    }

    fn text_from(&self, body: &Value) -> Option<String> {
        let parsed: ClaudeResponse = serde_json::from_value(body.clone()).ok()?;
        let text: String = parsed
            .content
            .into_iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n");
        (!text.is_empty()).then_some(text)
    }
}
