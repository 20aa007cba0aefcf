use wf_domain::error::Result;
use wf_domain::stream::{BoxStream, StreamEvent};
use wf_domain::tool::{Message, ToolDefinition};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic streaming chat request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Model identifier override. `None` = the provider's default.
    pub model: Option<String>,
    /// System prompt, sent ahead of the conversation.
    pub system: Option<String>,
    /// The conversation messages to send.
    pub messages: Vec<Message>,
    /// Every tool definition the deployment knows about.
    pub tools: Vec<ToolDefinition>,
    /// When `Some`, the model may only call these tools this step.
    pub active_tools: Option<Vec<String>>,
    /// Sampling temperature. `None` lets the provider choose.
    pub temperature: Option<f32>,
    /// Response token cap. `None` lets the provider choose.
    pub max_tokens: Option<u32>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every LLM adapter implements.
///
/// Adapters translate between our internal types and each provider's wire
/// format. Tool-call arguments that arrive as malformed JSON must be
/// surfaced in-stream (an empty-object default or a
/// [`StreamEvent::Error`]) rather than by unwinding, so the orchestrator's
/// validation and repair path stays in control.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Open a streaming completion. The stream ends with
    /// [`StreamEvent::Done`]; a `finish_reason` of `"stop"` is the
    /// final-response marker.
    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}
