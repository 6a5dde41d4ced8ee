use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiMessage {
    pub role: String,
    pub content: String,
}

impl AiMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            model: "gemini-1.5-flash".to_string(),
            // Low temperature keeps the structured block stable between runs
            temperature: 0.2,
            max_tokens: Some(1024),
        }
    }
}

/// Response from an AI provider.
///
/// `content` is the raw text of the model's answer. Callers that expect
/// structured output have to locate and parse it themselves.
#[derive(Debug, Clone, Default)]
pub struct AiProviderResponse {
    pub content: String,
}
