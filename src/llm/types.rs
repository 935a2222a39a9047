// Claude API request/response types

use serde::{Deserialize, Serialize};

/// One prompt pair bound for the model.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    /// Cache namespace, normally the stage name. The cache digests this
    /// together with both prompts and the temperature.
    pub cache_key: String,
    /// Dry-run flag: answer only from cache, never hit the network.
    pub fake: bool,
}

impl ChatRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            temperature: 0.0,
            cache_key: String::new(),
            fake: false,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_cache_key(mut self, cache_key: impl Into<String>) -> Self {
        self.cache_key = cache_key.into();
        self
    }

    pub fn fake(mut self) -> Self {
        self.fake = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageRequest {
    pub model: String,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub temperature: f32,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageResponse {
    pub content: Vec<ContentBlock>,
    pub model: String,
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
}

impl MessageResponse {
    /// Concatenated text across content blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = ChatRequest::new("system", "user")
            .with_temperature(0.5)
            .with_cache_key("refine");
        assert_eq!(request.temperature, 0.5);
        assert_eq!(request.cache_key, "refine");
        assert!(!request.fake);
    }

    #[test]
    fn test_response_text_concatenates_blocks() {
        let response = MessageResponse {
            content: vec![
                ContentBlock::Text {
                    text: "1. Label: a\n".to_string(),
                },
                ContentBlock::Text {
                    text: "Criteria: b".to_string(),
                },
            ],
            model: "claude".to_string(),
            stop_reason: None,
        };
        assert_eq!(response.text(), "1. Label: a\nCriteria: b");
    }
}
