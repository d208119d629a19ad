use std::future::Future;

use futures::future::{self, Either};
use futures_channel::oneshot;

use crate::trace::{TraceEventKind, TraceSink};
use crate::{QueryError, RetryPolicy};

/// Runs one logical fetch through the shared retry/backoff policy.
///
/// Both the fetch itself and the backoff sleeps race against `cancellation`;
/// an aborted fetch resolves to [`QueryError::Aborted`] and the caller must
/// drop the result silently. A cancellation sender dropped without sending is
/// treated the same as an abort: the owner went away.
///
/// Used identically by single-query fetches and by per-page fetches of
/// infinite queries.
pub(crate) async fn fetch_with_retry<V, Fu>(
    make_attempt: impl Fn() -> Fu,
    mut cancellation: oneshot::Receiver<()>,
    policy: RetryPolicy,
    trace: &TraceSink,
    key_hash: u64,
) -> Result<V, QueryError>
where
    Fu: Future<Output = Result<V, QueryError>>,
{
    trace.emit(
        TraceEventKind::Start,
        key_hash,
        format!("max_retries={}", policy.max_retries),
    );

    let mut attempt: u32 = 0;
    loop {
        let fetch = std::pin::pin!(make_attempt());
        let outcome = match future::select(fetch, &mut cancellation).await {
            Either::Left((outcome, _)) => outcome,
            Either::Right((_, _)) => return Err(QueryError::Aborted),
        };

        match outcome {
            Ok(value) => {
                // An abort that raced the final attempt still wins.
                if !matches!(cancellation.try_recv(), Ok(None)) {
                    return Err(QueryError::Aborted);
                }
                trace.emit(
                    TraceEventKind::Success,
                    key_hash,
                    format!("attempt={attempt}"),
                );
                return Ok(value);
            }
            Err(QueryError::Aborted) => return Err(QueryError::Aborted),
            Err(error) => {
                let retrying = policy.should_retry(&error, attempt);
                trace.emit(
                    TraceEventKind::RetryCheck,
                    key_hash,
                    format!(
                        "attempt={attempt} retryable={} error={error}",
                        error.is_retryable()
                    ),
                );
                if !retrying {
                    trace.emit(
                        TraceEventKind::Failure,
                        key_hash,
                        format!("attempt={attempt} error={error}"),
                    );
                    return Err(error);
                }

                let delay = policy.backoff(attempt);
                trace.emit(
                    TraceEventKind::RetryWait,
                    key_hash,
                    format!("attempt={attempt} delay_ms={}", delay.as_millis()),
                );
                let backoff = std::pin::pin!(tokio::time::sleep(delay));
                if let Either::Right(_) = future::select(backoff, &mut cancellation).await {
                    return Err(QueryError::Aborted);
                }
                attempt += 1;
            }
        }
    }
}
