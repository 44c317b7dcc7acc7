use serde_json::{json, Map, Value};

use super::provider::{ProviderAdapter, ProviderRequest};

/// Which output budget field a chat-completions model accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenField {
    MaxTokens,
    /// Reasoning models: `max_completion_tokens`, no temperature.
    MaxCompletionTokens,
}

impl TokenField {
    fn for_model(model: &str) -> Self {
        let model = model.to_ascii_lowercase();
        if ["gpt-5", "o1", "o3", "o4"]
            .iter()
            .any(|family| model.starts_with(family))
        {
            TokenField::MaxCompletionTokens
        } else {
            TokenField::MaxTokens
        }
    }
}

/// OpenAI chat completions. The model family is resolved once, here, so
/// callers never branch on model names.
pub struct OpenAiAdapter {
    api_key: String,
    model: String,
    base_url: String,
    token_field: TokenField,
}

impl OpenAiAdapter {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        let token_field = TokenField::for_model(&model);
        Self {
            api_key,
            model,
            base_url,
            token_field,
        }
    }
}

impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("authorization", format!("Bearer {}", self.api_key)),
            ("content-type", "application/json".to_string()),
        ]
    }

    fn to_wire(&self, request: &ProviderRequest) -> Value {
        let mut body = Map::new();
        body.insert("model".into(), json!(self.model));
        body.insert(
            "messages".into(),
            json!([
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ]),
        );
        match self.token_field {
            TokenField::MaxCompletionTokens => {
                body.insert("max_completion_tokens".into(), json!(request.max_output_tokens));
            }
            TokenField::MaxTokens => {
                body.insert("max_tokens".into(), json!(request.max_output_tokens));
                if let Some(temperature) = request.temperature {
                    body.insert("temperature".into(), json!(temperature));
                }
            }
        }
        Value::Object(body)
    }

    fn text_from(&self, body: &Value) -> Option<String> {
        let from_choices = body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string);

        // Responses-style shapes some compatible gateways return.
        let from_output_text = || body.get("output_text").and_then(Value::as_str).map(str::to_string);
        let from_parts = || {
            let parts: Vec<&str> = body
                .get("content")?
                .as_array()?
                .iter()
                .filter(|part| {
                    matches!(
                        part.get("type").and_then(Value::as_str),
                        Some("output_text") | Some("text")
                    )
                })
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect();
            (!parts.is_empty()).then(|| parts.join("\n"))
        };

        from_choices
            .filter(|text| !text.is_empty())
            .or_else(from_output_text)
            .or_else(from_parts)
    }
}
