// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Retry with exponential backoff for fallible bridge operations.
//!
//! The executor knows nothing about the operation it wraps; it only consults
//! [`Error::is_retryable`]. Non-retryable errors are returned immediately
//! without consuming an attempt.
//!
//! ```no_run
//! # async fn demo(bridge: zbridge::Bridge) -> zbridge::Result<()> {
//! use zbridge::{RetryExecutor, RetryPolicy, SessionConfig};
//!
//! let executor = RetryExecutor::new(RetryPolicy::default());
//! let session = executor
//!     .execute(|| bridge.open(SessionConfig::default()))
//!     .await?;
//! # drop(session);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use log::warn;

use crate::error::{Error, Result};

/// Immutable backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    backoff_multiplier: f64,
    max_delay: Duration,
}

impl RetryPolicy {
    /// Build a policy, rejecting `max_attempts == 0`, `backoff_multiplier < 1.0`
    /// (or non finite) and `max_delay < initial_delay`.
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        backoff_multiplier: f64,
        max_delay: Duration,
    ) -> Result<Self> {
        if max_attempts == 0 {
            return Err(Error::InvalidConfig("max_attempts must be at least 1".into()));
        }
        if !backoff_multiplier.is_finite() || backoff_multiplier < 1.0 {
            return Err(Error::InvalidConfig(format!(
                "backoff_multiplier must be >= 1.0, got {}",
                backoff_multiplier
            )));
        }
        if max_delay < initial_delay {
            return Err(Error::InvalidConfig(
                "max_delay must not be smaller than initial_delay".into(),
            ));
        }
        Ok(Self {
            max_attempts,
            initial_delay,
            backoff_multiplier,
            max_delay,
        })
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Wait before retry number `retry` (1-based).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 || self.initial_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        // Out of range saturates to the cap.
        Duration::try_from_secs_f64(secs).map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

impl Default for RetryPolicy {
    /// 3 attempts, 100 ms initial delay, doubling, capped at 2 s.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(2),
        }
    }
}

/// Attempt bookkeeping shared by the one-shot and streaming variants.
struct Attempts<'p> {
    policy: &'p RetryPolicy,
    failed: u32,
}

impl<'p> Attempts<'p> {
    fn new(policy: &'p RetryPolicy) -> Self {
        Self { policy, failed: 0 }
    }

    /// Record a failure. `Err` means stop with this error; `Ok` means the
    /// backoff has been waited and the caller should try again.
    async fn on_failure(&mut self, err: Error) -> Result<()> {
        if !err.is_retryable() {
            return Err(err);
        }
        self.failed += 1;
        if self.failed >= self.policy.max_attempts {
            return Err(Error::RetryExhausted {
                attempts: self.failed,
                last: Box::new(err),
            });
        }
        let delay = self.policy.delay_for_retry(self.failed);
        warn!(
            "attempt {}/{} failed: {}; retrying in {:?}",
            self.failed, self.policy.max_attempts, err, delay
        );
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

/// Runs operations under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or
    /// `max_attempts` retryable failures occurred ([`Error::RetryExhausted`]).
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = Attempts::new(&self.policy);
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => attempts.on_failure(err).await?,
            }
        }
    }

    /// Streaming variant: `operation` opens a sequence of results.
    ///
    /// A failure while opening, or an `Err` item before the sequence ends,
    /// restarts the whole sequence from the top under the same attempt budget.
    /// Items yielded before the failure are not withheld, so a restarted
    /// sequence may repeat them. The terminal error, if any, is the last item.
    pub fn execute_stream<'a, F, Fut, S, T>(&'a self, operation: F) -> impl Stream<Item = Result<T>> + 'a
    where
        F: FnMut() -> Fut + 'a,
        Fut: Future<Output = Result<S>> + 'a,
        S: Stream<Item = Result<T>> + Unpin + 'a,
        T: 'a,
    {
        struct State<'p, F, S> {
            operation: F,
            attempts: Attempts<'p>,
            current: Option<S>,
            done: bool,
        }

        let state = State {
            operation,
            attempts: Attempts::new(&self.policy),
            current: None,
            done: false,
        };

        stream::unfold(state, |mut st| async move {
            loop {
                if st.done {
                    return None;
                }
                if st.current.is_none() {
                    match (st.operation)().await {
                        Ok(opened) => st.current = Some(opened),
                        Err(err) => match st.attempts.on_failure(err).await {
                            Ok(()) => continue,
                            Err(fatal) => {
                                st.done = true;
                                return Some((Err(fatal), st));
                            }
                        },
                    }
                }
                let Some(current) = st.current.as_mut() else {
                    continue;
                };
                match current.next().await {
                    Some(Ok(item)) => return Some((Ok(item), st)),
                    None => return None,
                    Some(Err(err)) => {
                        st.current = None;
                        if let Err(fatal) = st.attempts.on_failure(err).await {
                            st.done = true;
                            return Some((Err(fatal), st));
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    type Items = stream::Iter<std::vec::IntoIter<Result<u32>>>;

    fn policy(max: u32, initial_ms: u64, mult: f64, max_ms: u64) -> RetryPolicy {
        RetryPolicy::new(
            max,
            Duration::from_millis(initial_ms),
            mult,
            Duration::from_millis(max_ms),
        )
        .unwrap()
    }

    #[test]
    fn policy_validation() {
        assert!(RetryPolicy::new(0, Duration::ZERO, 1.0, Duration::ZERO).is_err());
        assert!(RetryPolicy::new(1, Duration::ZERO, 0.5, Duration::ZERO).is_err());
        assert!(RetryPolicy::new(1, Duration::ZERO, f64::NAN, Duration::ZERO).is_err());
        assert!(
            RetryPolicy::new(1, Duration::from_secs(2), 1.0, Duration::from_secs(1)).is_err()
        );
        assert_eq!(RetryPolicy::none().max_attempts(), 1);
    }

    #[test]
    fn delays_grow_and_cap() {
        let p = policy(10, 100, 2.0, 1000);
        assert_eq!(p.delay_for_retry(1), Duration::from_millis(100));
        assert_eq!(p.delay_for_retry(2), Duration::from_millis(200));
        assert_eq!(p.delay_for_retry(3), Duration::from_millis(400));
        assert_eq!(p.delay_for_retry(5), Duration::from_millis(1000));
        assert_eq!(p.delay_for_retry(60), Duration::from_millis(1000));
    }

    #[test]
    fn unbounded_cap_saturates_instead_of_overflowing() {
        let p = RetryPolicy::new(3, Duration::MAX, 2.0, Duration::MAX).unwrap();
        assert_eq!(p.delay_for_retry(1), Duration::MAX);
        assert_eq!(p.delay_for_retry(2), Duration::MAX);

        let p = RetryPolicy::new(100, Duration::from_millis(1), 2.0, Duration::MAX).unwrap();
        assert_eq!(p.delay_for_retry(1), Duration::from_millis(1));
        assert_eq!(p.delay_for_retry(11), Duration::from_millis(1024));
        assert_eq!(p.delay_for_retry(99), Duration::MAX);
        assert_eq!(p.delay_for_retry(u32::MAX), Duration::MAX);

        let p = RetryPolicy::new(5, Duration::ZERO, 10.0, Duration::MAX).unwrap();
        assert_eq!(p.delay_for_retry(u32::MAX), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_returns_immediately() {
        let calls = AtomicU32::new(0);
        let executor = RetryExecutor::new(policy(5, 100, 2.0, 1000));
        let result: Result<()> = executor
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::InvalidKeyExpression("a//b".into())) }
            })
            .await;
        assert!(matches!(result, Err(Error::InvalidKeyExpression(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_restarts_from_top() {
        let opens = AtomicU32::new(0);
        let executor = RetryExecutor::new(policy(3, 10, 1.0, 10));
        let items: Vec<Result<u32>> = executor
            .execute_stream(|| {
                let n = opens.fetch_add(1, Ordering::SeqCst);
                async move {
                    let items: Vec<Result<u32>> = if n == 0 {
                        vec![Ok(1), Err(Error::Timeout)]
                    } else {
                        vec![Ok(1), Ok(2)]
                    };
                    Ok(stream::iter(items))
                }
            })
            .collect()
            .await;

        let values: Vec<u32> = items.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![1, 1, 2]);
        assert_eq!(opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_gives_up_after_budget() {
        let executor = RetryExecutor::new(policy(2, 10, 1.0, 10));
        let start = Instant::now();
        let items: Vec<Result<u32>> = executor
            .execute_stream(|| async { Err::<Items, _>(Error::OpenFailed("down".into())) })
            .collect()
            .await;
        assert_eq!(items.len(), 1);
        assert!(matches!(
            items[0],
            Err(Error::RetryExhausted { attempts: 2, .. })
        ));
        assert_eq!(start.elapsed(), Duration::from_millis(10));
    }
}
