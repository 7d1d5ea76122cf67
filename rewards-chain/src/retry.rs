use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::ChainError;

/// `rand(0..5)·(attempt+1) + 5` seconds, used for both RPC init probing and
/// the per-query retry rounds — same shape as the repo's
/// `attemptWithClients` backoff.
pub fn backoff(attempt: u32) -> Duration {
    let jitter: u64 = rand::thread_rng().gen_range(0..5);
    Duration::from_secs(jitter * (attempt as u64 + 1) + 5)
}

/// Outer attempt loop x inner provider loop x randomized backoff. `call`
/// is handed the provider's base URL and returns whatever `ChainError` the
/// underlying transport produced; the first success short-circuits.
pub async fn call_with_rotation<T, F, Fut>(
    providers: &[String],
    max_attempts: u32,
    cancel: &CancellationToken,
    mut call: F,
) -> Result<T, ChainError>
where
    F: FnMut(&str) -> Fut,
    Fut: Future<Output = Result<T, ChainError>>,
{
    if providers.is_empty() {
        return Err(ChainError::NoProvidersAvailable);
    }

    let mut last_error = ChainError::NoProvidersAvailable;

    for attempt in 0..max_attempts {
        if cancel.is_cancelled() {
            return Err(ChainError::Cancelled);
        }

        for provider in providers {
            if cancel.is_cancelled() {
                return Err(ChainError::Cancelled);
            }

            match call(provider).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    tracing::warn!(provider, attempt, error = %err, "chain call failed");
                    last_error = err;
                }
            }
        }

        if attempt + 1 < max_attempts {
            let delay = backoff(attempt);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(ChainError::Cancelled),
            }
        }
    }

    Err(ChainError::ProvidersExhausted(last_error.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn returns_first_success_without_exhausting_providers() {
        let providers = vec!["a".to_string(), "b".to_string()];
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let result = call_with_rotation(&providers, 3, &cancel, |_p| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, ChainError>(42) }
        })
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_all_providers_before_failing() {
        let providers = vec!["a".to_string()];
        let cancel = CancellationToken::new();

        let result: Result<i32, _> = call_with_rotation(&providers, 1, &cancel, |_p| async {
            Err(ChainError::Decode("nope".into()))
        })
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn honors_cancellation() {
        let providers = vec!["a".to_string()];
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<i32, _> =
            call_with_rotation(&providers, 3, &cancel, |_p| async { Ok(1) }).await;

        assert!(matches!(result, Err(ChainError::Cancelled)));
    }
}
