//! Scripted LLM provider for tests.
//!
//! Each queued script becomes one streamed step; once the queue is empty
//! every further call streams a plain final answer. Recorded requests let
//! tests assert on the tool subset and messages each step received.

use std::collections::VecDeque;

use parking_lot::Mutex;

use wf_domain::error::Result;
use wf_domain::stream::{BoxStream, StreamEvent, Usage};

use crate::traits::{ChatRequest, LlmProvider};

pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Vec<StreamEvent>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a raw event script for the next step.
    pub fn push_step(&self, events: Vec<StreamEvent>) {
        self.scripts.lock().push_back(events);
    }

    /// Queue a step that emits text and then the given tool calls.
    pub fn push_tool_step(&self, text: &str, calls: Vec<(&str, serde_json::Value)>) {
        let mut events = Vec::new();
        if !text.is_empty() {
            events.push(StreamEvent::Token { text: text.into() });
        }
        for (i, (name, args)) in calls.into_iter().enumerate() {
            let call_id = format!("call-{}-{}", self.scripts.lock().len(), i);
            events.push(StreamEvent::ToolCallStarted {
                call_id: call_id.clone(),
                tool_name: name.into(),
            });
            events.push(StreamEvent::ToolCallFinished {
                call_id,
                tool_name: name.into(),
                arguments: args,
            });
        }
        events.push(StreamEvent::Done {
            usage: Some(Usage {
                prompt_tokens: 100,
                completion_tokens: 20,
                total_tokens: 120,
            }),
            finish_reason: Some("tool_calls".into()),
        });
        self.scripts.lock().push_back(events);
    }

    /// Queue a final step: text only, `finish_reason = "stop"`.
    pub fn push_final_step(&self, text: &str) {
        let mut events = Vec::new();
        if !text.is_empty() {
            events.push(StreamEvent::Token { text: text.into() });
        }
        events.push(StreamEvent::Done {
            usage: Some(Usage {
                prompt_tokens: 100,
                completion_tokens: 10,
                total_tokens: 110,
            }),
            finish_reason: Some("stop".into()),
        });
        self.scripts.lock().push_back(events);
    }

    /// Every request this provider has served, in order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        self.requests.lock().push(req.clone());
        let events = self.scripts.lock().pop_front().unwrap_or_else(|| {
            vec![
                StreamEvent::Token {
                    text: "Done.".into(),
                },
                StreamEvent::Done {
                    usage: None,
                    finish_reason: Some("stop".into()),
                },
            ]
        });
        let stream = async_stream::stream! {
            for event in events {
                yield Ok(event);
            }
        };
        Ok(Box::pin(stream))
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn scripts_play_in_order_then_default() {
        let provider = ScriptedProvider::new();
        provider.push_tool_step("thinking", vec![("writeFile", serde_json::json!({"path": "a"}))]);
        provider.push_final_step("all set");

        let req = ChatRequest::default();

        let mut first = provider.chat_stream(&req).await.unwrap();
        let mut saw_tool_call = false;
        while let Some(event) = first.next().await {
            if matches!(event.unwrap(), StreamEvent::ToolCallFinished { .. }) {
                saw_tool_call = true;
            }
        }
        assert!(saw_tool_call);

        let mut second = provider.chat_stream(&req).await.unwrap();
        let mut text = String::new();
        while let Some(event) = second.next().await {
            if let StreamEvent::Token { text: t } = event.unwrap() {
                text.push_str(&t);
            }
        }
        assert_eq!(text, "all set");

        // Exhausted scripts fall back to a plain final answer.
        let mut third = provider.chat_stream(&req).await.unwrap();
        let mut done = false;
        while let Some(event) = third.next().await {
            if let StreamEvent::Done { finish_reason, .. } = event.unwrap() {
                assert_eq!(finish_reason.as_deref(), Some("stop"));
                done = true;
            }
        }
        assert!(done);
        assert_eq!(provider.requests().len(), 3);
    }
}
