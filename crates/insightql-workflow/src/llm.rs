//! The narrow LLM seam every generative node calls through. Kept separate
//! from any concrete provider so nodes are testable against an in-memory
//! double instead of a live model.

use async_trait::async_trait;

/// A single completion call: a prompt plus the surrounding context a
/// provider needs to fill in its own system/style preamble.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub system_context: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_context: None,
            max_tokens: 2048,
            temperature: 0.2,
        }
    }

    #[must_use]
    pub fn with_system_context(mut self, context: impl Into<String>) -> Self {
        self.system_context = Some(context.into());
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// The outcome of a completion call. Modeled as a result-shaped struct
/// rather than a bare `Result` so providers can report a soft failure
/// (filtered, truncated) alongside whatever partial content they have.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub success: bool,
    pub content: String,
    pub error: Option<String>,
}

impl CompletionResponse {
    #[must_use]
    pub fn ok(content: impl Into<String>) -> Self {
        Self { success: true, content: content.into(), error: None }
    }

    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, content: String::new(), error: Some(error.into()) }
    }
}

/// Anything capable of turning a prompt into text: a hosted model client, a
/// local model runner, or (in tests) a canned-response double.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate_completion(&self, request: CompletionRequest) -> CompletionResponse;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_request_has_sane_generation_defaults() {
        let req = CompletionRequest::new("hello");
        assert!(req.system_context.is_none());
        assert_eq!(req.max_tokens, 2048);
        assert_eq!(req.temperature, 0.2);
    }

    #[test]
    fn builder_methods_are_chainable() {
        let req = CompletionRequest::new("hello")
            .with_system_context("be terse")
            .with_temperature(0.9);
        assert_eq!(req.system_context.as_deref(), Some("be terse"));
        assert_eq!(req.temperature, 0.9);
    }

    #[test]
    fn failed_response_carries_no_content() {
        let resp = CompletionResponse::failed("rate limited");
        assert!(!resp.success);
        assert!(resp.content.is_empty());
        assert_eq!(resp.error.as_deref(), Some("rate limited"));
    }
}
