use llmgate_protocol::{claude, gemini, openai};
use llmgate_provider_core::Proto;
use serde_json::Value as JsonValue;

/// Canonical classification of an inbound request, produced by `classify_request`
/// and consumed by the dispatcher. One variant per dialect endpoint in the
/// inbound HTTP surface.
#[derive(Debug)]
pub enum ProxyRequest {
    ClaudeMessages(claude::create_message::request::CreateMessageRequest),
    ClaudeMessagesStream(claude::create_message::request::CreateMessageRequest),
    ClaudeCountTokens(claude::count_tokens::request::CountTokensRequest),
    ClaudeModelsList(claude::list_models::request::ListModelsRequest),
    ClaudeModelsGet(claude::get_model::request::GetModelRequest),
    OpenAIChat(openai::create_chat_completions::request::CreateChatCompletionRequest),
    OpenAIChatStream(openai::create_chat_completions::request::CreateChatCompletionRequest),
    OpenAIResponses(openai::create_response::request::CreateResponseRequest),
    OpenAIResponsesStream(openai::create_response::request::CreateResponseRequest),
    OpenAIInputTokens(openai::count_tokens::request::InputTokenCountRequest),
    OpenAIModelsList(openai::list_models::request::ListModelsRequest),
    OpenAIModelsGet(openai::get_model::request::GetModelRequest),
    GeminiGenerate(gemini::generate_content::request::GenerateContentRequest),
    GeminiGenerateStream(gemini::stream_content::request::StreamGenerateContentRequest),
    GeminiCountTokens(gemini::count_tokens::request::CountTokensRequest),
    GeminiModelsList(gemini::list_models::request::ListModelsRequest),
    GeminiModelsGet(gemini::get_model::request::GetModelRequest),
}

/// Capabilities the candidate resolver must find on a binding for this request
/// to be satisfiable. Detected structurally (presence of well-known fields),
/// not by fully validating the dialect schema — good enough to filter
/// bindings, not a substitute for the adapter's own `UNSUPPORTED` checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequiredCapabilities {
    pub tool_call: bool,
    pub structured_output: bool,
    pub image: bool,
}

impl ProxyRequest {
    pub fn proto(&self) -> Proto {
        match self {
            ProxyRequest::ClaudeMessages(_)
            | ProxyRequest::ClaudeMessagesStream(_)
            | ProxyRequest::ClaudeCountTokens(_)
            | ProxyRequest::ClaudeModelsList(_)
            | ProxyRequest::ClaudeModelsGet(_) => Proto::Claude,
            ProxyRequest::OpenAIChat(_) | ProxyRequest::OpenAIChatStream(_) => Proto::OpenAIChat,
            ProxyRequest::OpenAIResponses(_)
            | ProxyRequest::OpenAIResponsesStream(_)
            | ProxyRequest::OpenAIInputTokens(_) => Proto::OpenAIResponse,
            ProxyRequest::OpenAIModelsList(_) | ProxyRequest::OpenAIModelsGet(_) => Proto::OpenAI,
            ProxyRequest::GeminiGenerate(_)
            | ProxyRequest::GeminiGenerateStream(_)
            | ProxyRequest::GeminiCountTokens(_)
            | ProxyRequest::GeminiModelsList(_)
            | ProxyRequest::GeminiModelsGet(_) => Proto::Gemini,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(
            self,
            ProxyRequest::ClaudeMessagesStream(_)
                | ProxyRequest::OpenAIChatStream(_)
                | ProxyRequest::OpenAIResponsesStream(_)
                | ProxyRequest::GeminiGenerateStream(_)
        )
    }

    /// The logical model name this request targets, used to resolve candidates.
    /// `None` for requests that don't name a model (list endpoints).
    pub fn model_name(&self) -> Option<String> {
        match self {
            ProxyRequest::ClaudeMessages(r) | ProxyRequest::ClaudeMessagesStream(r) => {
                Some(claude_model_name(&r.body.model))
            }
            ProxyRequest::ClaudeCountTokens(r) => Some(claude_model_name(&r.body.model)),
            ProxyRequest::ClaudeModelsGet(r) => Some(r.path.model_id.clone()),
            ProxyRequest::OpenAIChat(r) | ProxyRequest::OpenAIChatStream(r) => {
                Some(r.body.model.clone())
            }
            ProxyRequest::OpenAIResponses(r) | ProxyRequest::OpenAIResponsesStream(r) => {
                Some(r.body.model.clone())
            }
            ProxyRequest::OpenAIInputTokens(r) => Some(r.body.model.clone()),
            ProxyRequest::OpenAIModelsGet(r) => Some(r.path.model.clone()),
            ProxyRequest::GeminiGenerate(r) => Some(r.path.model.clone()),
            ProxyRequest::GeminiGenerateStream(r) => Some(r.path.model.clone()),
            ProxyRequest::GeminiCountTokens(r) => Some(r.path.model.clone()),
            ProxyRequest::GeminiModelsGet(r) => Some(r.path.name.clone()),
            ProxyRequest::ClaudeModelsList(_)
            | ProxyRequest::OpenAIModelsList(_)
            | ProxyRequest::GeminiModelsList(_) => None,
        }
    }

    /// Structural scan of the serialized body for capability markers. All four
    /// dialects name their tool array `tools`, so a single key lookup covers
    /// every variant; structured-output and image markers vary by dialect and
    /// are matched by a fixed set of known key names.
    pub fn required_capabilities(&self) -> RequiredCapabilities {
        let value = self.body_as_json();
        RequiredCapabilities {
            tool_call: has_nonempty_array(&value, "tools"),
            structured_output: has_structured_output_marker(&value),
            image: has_image_marker(&value),
        }
    }

    fn body_as_json(&self) -> JsonValue {
        let encoded = match self {
            ProxyRequest::ClaudeMessages(r) | ProxyRequest::ClaudeMessagesStream(r) => {
                serde_json::to_value(&r.body)
            }
            ProxyRequest::ClaudeCountTokens(r) => serde_json::to_value(&r.body),
            ProxyRequest::OpenAIChat(r) | ProxyRequest::OpenAIChatStream(r) => {
                serde_json::to_value(&r.body)
            }
            ProxyRequest::OpenAIResponses(r) | ProxyRequest::OpenAIResponsesStream(r) => {
                serde_json::to_value(&r.body)
            }
            ProxyRequest::OpenAIInputTokens(r) => serde_json::to_value(&r.body),
            ProxyRequest::GeminiGenerate(r) => serde_json::to_value(&r.body),
            ProxyRequest::GeminiGenerateStream(r) => serde_json::to_value(&r.body),
            ProxyRequest::GeminiCountTokens(r) => serde_json::to_value(&r.body),
            ProxyRequest::ClaudeModelsList(_)
            | ProxyRequest::ClaudeModelsGet(_)
            | ProxyRequest::OpenAIModelsList(_)
            | ProxyRequest::OpenAIModelsGet(_)
            | ProxyRequest::GeminiModelsList(_)
            | ProxyRequest::GeminiModelsGet(_) => Ok(JsonValue::Null),
        };
        encoded.unwrap_or(JsonValue::Null)
    }
}

fn claude_model_name(model: &claude::count_tokens::types::Model) -> String {
    match model {
        claude::count_tokens::types::Model::Custom(name) => name.clone(),
        claude::count_tokens::types::Model::Known(_) => serde_json::to_value(model)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default(),
    }
}

const STRUCTURED_OUTPUT_KEYS: &[&str] = &[
    "response_format",
    "output_format",
    "response_schema",
    "responseSchema",
];

fn has_structured_output_marker(value: &JsonValue) -> bool {
    if find_key(value, "responseMimeType")
        .and_then(|v| v.as_str().map(|s| s == "application/json"))
        .unwrap_or(false)
    {
        return true;
    }
    STRUCTURED_OUTPUT_KEYS
        .iter()
        .any(|key| matches!(find_key(value, key), Some(v) if !v.is_null()))
}

const IMAGE_MARKER_KEYS: &[&str] = &["image_url", "inline_data", "inlineData"];

fn has_image_marker(value: &JsonValue) -> bool {
    if IMAGE_MARKER_KEYS
        .iter()
        .any(|key| find_key(value, key).is_some())
    {
        return true;
    }
    any_value(value, |v| {
        v.as_str().map(|s| s == "image").unwrap_or(false)
    })
}

fn has_nonempty_array(value: &JsonValue, key: &str) -> bool {
    find_key(value, key)
        .and_then(|v| v.as_array())
        .map(|arr| !arr.is_empty())
        .unwrap_or(false)
}

/// Depth-first search for the first occurrence of `key` anywhere in the tree.
fn find_key<'a>(value: &'a JsonValue, key: &str) -> Option<&'a JsonValue> {
    match value {
        JsonValue::Object(map) => {
            if let Some(found) = map.get(key) {
                return Some(found);
            }
            map.values().find_map(|v| find_key(v, key))
        }
        JsonValue::Array(items) => items.iter().find_map(|v| find_key(v, key)),
        _ => None,
    }
}

/// Depth-first search for a leaf value matching `type` == "image"-style markers.
fn any_value(value: &JsonValue, pred: impl Fn(&JsonValue) -> bool + Copy) -> bool {
    match value {
        JsonValue::Object(map) => {
            if let Some(t) = map.get("type") {
                if pred(t) {
                    return true;
                }
            }
            map.values().any(|v| any_value(v, pred))
        }
        JsonValue::Array(items) => items.iter().any(|v| any_value(v, pred)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detects_tools_by_common_key() {
        let value = json!({"tools": [{"name": "x"}]});
        assert!(has_nonempty_array(&value, "tools"));
        let empty = json!({"tools": []});
        assert!(!has_nonempty_array(&empty, "tools"));
    }

    #[test]
    fn detects_structured_output_markers() {
        assert!(has_structured_output_marker(&json!({"response_format": {"type": "json_object"}})));
        assert!(has_structured_output_marker(&json!({"generationConfig": {"responseMimeType": "application/json"}})));
        assert!(!has_structured_output_marker(&json!({"foo": "bar"})));
    }

    #[test]
    fn detects_image_markers_nested() {
        let value = json!({"messages": [{"content": [{"type": "image", "source": {}}]}]});
        assert!(has_image_marker(&value));
        assert!(!has_image_marker(&json!({"messages": [{"content": "hi"}]})));
    }
}
