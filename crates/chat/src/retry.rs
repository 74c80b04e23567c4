//! Exponential backoff around a streaming backend call.

use std::time::Duration;

use {
    futures::StreamExt,
    parley_service_traits::TextStream,
    tracing::warn,
};

/// Restart policy for transient upstream failures.
///
/// The whole stream is re-created from scratch on each attempt. Text already
/// yielded by a failed attempt has reached the caller and is not retracted,
/// so the restarted output follows it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Total attempts, including the first.
    pub tries: u32,
    pub delay: Duration,
    pub factor: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            tries: 4,
            delay: Duration::from_secs(3),
            factor: 2.0,
        }
    }
}

impl Backoff {
    /// Stream from `make`, re-invoking it after transient failures.
    ///
    /// Non-transient errors and the failure of the last attempt are passed
    /// through unchanged.
    pub fn stream<F>(self, make: F) -> TextStream
    where
        F: Fn() -> TextStream + Send + 'static,
    {
        let policy = self;
        Box::pin(async_stream::stream! {
            let mut delay = policy.delay;
            let mut attempt = 1;
            loop {
                let mut inner = make();
                let mut retry_after = None;
                while let Some(item) = inner.next().await {
                    match item {
                        Ok(text) => yield Ok(text),
                        Err(e) if e.kind().is_transient() && attempt < policy.tries => {
                            retry_after = Some(e);
                            break;
                        },
                        Err(e) => {
                            yield Err(e);
                            return;
                        },
                    }
                }
                let Some(error) = retry_after else {
                    return;
                };
                warn!(
                    attempt,
                    tries = policy.tries,
                    delay_secs = delay.as_secs_f64(),
                    %error,
                    "transient upstream failure, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = delay.mul_f64(policy.factor);
                attempt += 1;
            }
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        futures::stream,
        parley_service_traits::BackendError,
        std::sync::{
            Arc,
            atomic::{AtomicU32, Ordering},
        },
        tokio::time::Instant,
    };

    /// A producer whose first `failures` attempts yield `partial` then fail with `error`.
    fn flaky(
        failures: u32,
        error: BackendError,
        partial: Option<&'static str>,
    ) -> (Arc<AtomicU32>, impl Fn() -> TextStream + Send + 'static) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let make = move || -> TextStream {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= failures {
                let mut items = Vec::new();
                if let Some(text) = partial {
                    items.push(Ok(text.to_string()));
                }
                items.push(Err(error.clone()));
                Box::pin(stream::iter(items))
            } else {
                Box::pin(stream::iter(vec![Ok("ok".to_string())]))
            }
        };
        (calls, make)
    }

    async fn collect(stream: TextStream) -> Vec<Result<String, BackendError>> {
        stream.collect().await
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_two_transient_failures() {
        let (calls, make) = flaky(2, BackendError::Connect("refused".into()), None);
        let start = Instant::now();
        let items = collect(Backoff::default().stream(make)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_deref().ok(), Some("ok"));
        assert_eq!(start.elapsed(), Duration::from_secs(3 + 6));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_tries_attempts() {
        let (calls, make) = flaky(10, BackendError::Timeout("read".into()), None);
        let items = collect(Backoff::default().stream(make)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(matches!(items.as_slice(), [Err(BackendError::Timeout(_))]));
    }

    #[tokio::test(start_paused = true)]
    async fn hard_failures_are_not_retried() {
        let error = BackendError::Status {
            status: 400,
            body: "bad request".into(),
        };
        let (calls, make) = flaky(1, error, None);
        let items = collect(Backoff::default().stream(make)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(items.as_slice(), [Err(BackendError::Status { status: 400, .. })]));
    }

    #[tokio::test(start_paused = true)]
    async fn partial_output_of_failed_attempt_stays_delivered() {
        let (_, make) = flaky(1, BackendError::Connect("reset".into()), Some("par"));
        let items = collect(Backoff::default().stream(make)).await;
        let texts: Vec<_> = items.into_iter().map(Result::unwrap).collect();
        assert_eq!(texts, vec!["par", "ok"]);
    }

    #[tokio::test(start_paused = true)]
    async fn single_try_never_sleeps() {
        let (calls, make) = flaky(1, BackendError::Connect("refused".into()), None);
        let policy = Backoff {
            tries: 1,
            ..Backoff::default()
        };
        let start = Instant::now();
        let items = collect(policy.stream(make)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(items[0].is_err());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
