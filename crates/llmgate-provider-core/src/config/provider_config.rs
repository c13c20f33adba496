use serde::{Deserialize, Serialize};

/// Opaque per-provider configuration. Every variant carries at least
/// `base_url`/`api_key`; anthropic and gemini additionally carry `version`
/// (the `anthropic-version` header / Gemini API version segment).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "config", rename_all = "kebab-case")]
pub enum ProviderConfig {
    OpenAi(OpenAiConfig),
    #[serde(rename = "openai-res")]
    OpenAiRes(OpenAiConfig),
    Anthropic(AnthropicConfig),
    Gemini(GeminiConfig),
}

impl ProviderConfig {
    pub fn base_url(&self) -> &str {
        match self {
            ProviderConfig::OpenAi(c) | ProviderConfig::OpenAiRes(c) => &c.base_url,
            ProviderConfig::Anthropic(c) => &c.base_url,
            ProviderConfig::Gemini(c) => &c.base_url,
        }
    }

    pub fn api_key(&self) -> &str {
        match self {
            ProviderConfig::OpenAi(c) | ProviderConfig::OpenAiRes(c) => &c.api_key,
            ProviderConfig::Anthropic(c) => &c.api_key,
            ProviderConfig::Gemini(c) => &c.api_key,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnthropicConfig {
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_anthropic_version")]
    pub version: String,
}

fn default_anthropic_version() -> String {
    "2023-06-01".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeminiConfig {
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_gemini_version")]
    pub version: String,
}

fn default_gemini_version() -> String {
    "v1beta".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let cfg = ProviderConfig::Anthropic(AnthropicConfig {
            base_url: "https://api.anthropic.com".into(),
            api_key: "sk-test".into(),
            version: "2023-06-01".into(),
        });
        let json = serde_json::to_value(&cfg).unwrap();
        let back: ProviderConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.base_url(), "https://api.anthropic.com");
    }

    #[test]
    fn defaults_anthropic_version_when_absent() {
        let json = serde_json::json!({
            "kind": "anthropic",
            "config": {"base_url": "https://x", "api_key": "k"}
        });
        let cfg: ProviderConfig = serde_json::from_value(json).unwrap();
        match cfg {
            ProviderConfig::Anthropic(c) => assert_eq!(c.version, "2023-06-01"),
            _ => panic!("wrong variant"),
        }
    }
}
