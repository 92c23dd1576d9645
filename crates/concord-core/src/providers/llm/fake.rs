use super::{ChatRequest, ChatResponse, ModelClient, TokenUsage};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted model client. Queued replies are served first, then the
/// default reply.
#[derive(Clone)]
pub struct FakeModelClient {
    model: String,
    default_reply: String,
    script: Arc<Mutex<VecDeque<Result<String, String>>>>,
    calls: Arc<AtomicUsize>,
    last_request: Arc<Mutex<Option<ChatRequest>>>,
    cost_per_call: f64,
    delay: Option<Duration>,
}

impl FakeModelClient {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            default_reply: r#"{"equivalent": true, "confidence": 0.9, "reasoning": "same meaning", "violations": []}"#
                .to_string(),
            script: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(AtomicUsize::new(0)),
            last_request: Arc::new(Mutex::new(None)),
            cost_per_call: 0.0,
            delay: None,
        }
    }

    pub fn with_response(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = reply.into();
        self
    }

    pub fn with_cost(mut self, cost_per_call: f64) -> Self {
        self.cost_per_call = cost_per_call;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_response(&self, reply: impl Into<String>) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Ok(reply.into()));
    }

    pub fn push_error(&self, message: impl Into<String>) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Err(message.into()));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<ChatRequest> {
        self.last_request
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl ModelClient for FakeModelClient {
    async fn chat(&self, request: &ChatRequest) -> anyhow::Result<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap_or_else(|e| e.into_inner()) = Some(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        let text = match next {
            Some(Ok(text)) => text,
            Some(Err(message)) => anyhow::bail!(message),
            None => self.default_reply.clone(),
        };

        let prompt_chars: usize = request.messages.iter().map(|m| m.content.len()).sum();
        Ok(ChatResponse {
            token_usage: TokenUsage {
                prompt_tokens: (prompt_chars / 4) as u32,
                completion_tokens: (text.len() / 4) as u32,
            },
            text,
            latency_ms: self.delay.map(|d| d.as_millis() as u64).unwrap_or(0),
            cost_usd: self.cost_per_call,
            model: self.model.clone(),
            provider: "fake".to_string(),
        })
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }

    fn model_id(&self) -> String {
        self.model.clone()
    }
}
