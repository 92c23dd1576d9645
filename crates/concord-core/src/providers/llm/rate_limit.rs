use super::{ChatRequest, ChatResponse, ModelClient};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Enforces a minimum interval between calls to the wrapped client.
///
/// The lock is held across the wait so concurrent callers queue up.
pub struct RateLimitedClient {
    inner: Arc<dyn ModelClient>,
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimitedClient {
    pub fn new(inner: Arc<dyn ModelClient>, min_interval: Duration) -> Self {
        Self {
            inner,
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// `max_per_second <= 0` disables the limit.
    pub fn per_second(inner: Arc<dyn ModelClient>, max_per_second: f64) -> Self {
        let min_interval = if max_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / max_per_second)
        } else {
            Duration::ZERO
        };
        Self::new(inner, min_interval)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

#[async_trait]
impl ModelClient for RateLimitedClient {
    async fn chat(&self, request: &ChatRequest) -> anyhow::Result<ChatResponse> {
        {
            let mut last = self.last_call.lock().await;
            if let Some(prev) = *last {
                let ready_at = prev + self.min_interval;
                if ready_at > Instant::now() {
                    tokio::time::sleep_until(ready_at).await;
                }
            }
            *last = Some(Instant::now());
        }
        self.inner.chat(request).await
    }

    fn provider_name(&self) -> &'static str {
        self.inner.provider_name()
    }

    fn model_id(&self) -> String {
        self.inner.model_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::llm::{ChatMessage, FakeModelClient};

    #[tokio::test]
    async fn spaces_out_consecutive_calls() {
        let fake = FakeModelClient::new("m");
        let client = RateLimitedClient::new(Arc::new(fake.clone()), Duration::from_millis(40));
        let req = ChatRequest {
            messages: vec![ChatMessage::user("hi")],
            max_tokens: 8,
            temperature: 0.0,
            seed: Some(7),
        };

        let started = std::time::Instant::now();
        client.chat(&req).await.unwrap();
        client.chat(&req).await.unwrap();
        client.chat(&req).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(80));
        assert_eq!(fake.calls(), 3);
    }

    #[test]
    fn zero_rate_disables_limit() {
        let client = RateLimitedClient::per_second(Arc::new(FakeModelClient::new("m")), 0.0);
        assert_eq!(client.min_interval(), Duration::ZERO);
        let client = RateLimitedClient::per_second(Arc::new(FakeModelClient::new("m")), 4.0);
        assert_eq!(client.min_interval(), Duration::from_millis(250));
    }
}
