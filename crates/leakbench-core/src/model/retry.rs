//! Retry with exponential backoff and jitter for model calls.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{ModelProvider, ModelRequest, ModelResponse, ProviderError};
use crate::obs;

/// Backoff configuration for transient provider failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retries (0 = call once).
    pub max_retries: u32,
    /// Delay before the first retry; doubles on every subsequent retry.
    pub base_delay_ms: u64,
    /// Upper bound of the uniform jitter added to each delay.
    pub max_jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 500,
            max_jitter_ms: 500,
        }
    }
}

impl RetryPolicy {
    /// Deterministic part of the delay before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    fn jittered(&self, attempt: u32) -> Duration {
        let jitter = if self.max_jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.max_jitter_ms)
        };
        self.backoff(attempt) + Duration::from_millis(jitter)
    }
}

/// Call `provider`, retrying transient failures per `policy`.
///
/// Fatal failures return immediately. When the retry ceiling is reached the
/// last transient failure is returned to the caller.
pub async fn call_with_retry<P>(
    provider: &P,
    request: &ModelRequest<'_>,
    policy: &RetryPolicy,
) -> Result<ModelResponse, ProviderError>
where
    P: ModelProvider + ?Sized,
{
    let mut attempt = 0u32;
    loop {
        match provider.complete(request).await {
            Ok(response) => return Ok(response),
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                let delay = policy.jittered(attempt);
                obs::emit_provider_retry(provider.name(), attempt + 1, delay, &err);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::ScriptedProvider;
    use crate::model::ContentBlock;

    fn request() -> ModelRequest<'static> {
        ModelRequest {
            model: "test-model",
            max_tokens: 16,
            tools: &[],
            messages: &[],
        }
    }

    fn text_reply() -> ModelResponse {
        ModelResponse {
            content: vec![ContentBlock::Text {
                text: "done".into(),
            }],
            stop_reason: Some("end_turn".into()),
        }
    }

    #[test]
    fn test_backoff_doubles_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(500));
        assert_eq!(policy.backoff(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff(4), Duration::from_millis(8000));
    }

    #[test]
    fn test_jitter_is_bounded() {
        let policy = RetryPolicy {
            max_retries: 1,
            base_delay_ms: 100,
            max_jitter_ms: 50,
        };
        for _ in 0..100 {
            let d = policy.jittered(1);
            assert!(d >= Duration::from_millis(200));
            assert!(d <= Duration::from_millis(250));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::transient("overloaded").with_status(529)),
            Err(ProviderError::transient("rate limited").with_status(429)),
            Ok(text_reply()),
        ]);

        let resp = call_with_retry(&provider, &request(), &RetryPolicy::default())
            .await
            .unwrap();

        assert_eq!(resp, text_reply());
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_not_retried() {
        let provider = ScriptedProvider::new(vec![
            Err(ProviderError::fatal("invalid x-api-key").with_status(401)),
            Ok(text_reply()),
        ]);

        let err = call_with_retry(&provider, &request(), &RetryPolicy::default())
            .await
            .unwrap_err();

        assert!(!err.is_transient());
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_ceiling_surfaces_last_transient_error() {
        let policy = RetryPolicy::default();
        let script = (0..10)
            .map(|i| Err(ProviderError::transient(format!("overloaded #{i}"))))
            .collect();
        let provider = ScriptedProvider::new(script);

        let err = call_with_retry(&provider, &request(), &policy)
            .await
            .unwrap_err();

        assert!(err.is_transient());
        assert_eq!(err.message, "overloaded #5");
        assert_eq!(provider.call_count(), 6);
    }
}
