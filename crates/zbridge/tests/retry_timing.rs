// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Backoff timing of the retry executor on a paused clock.

use std::sync::Arc;
use std::time::Duration;

use futures::{stream, StreamExt};
use parking_lot::Mutex;
use tokio::time::Instant;
use zbridge::{Error, Result, RetryExecutor, RetryPolicy};

fn default_policy() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(100), 2.0, Duration::from_secs(2)).unwrap()
}

#[tokio::test(start_paused = true)]
async fn delays_double_between_attempts() {
    let executor = RetryExecutor::new(default_policy());
    let start = Instant::now();
    let calls: Arc<Mutex<Vec<Duration>>> = Arc::default();

    let result: Result<()> = executor
        .execute(|| {
            let calls = Arc::clone(&calls);
            async move {
                calls.lock().push(start.elapsed());
                Err(Error::PutFailed { code: Some(-1) })
            }
        })
        .await;

    match result {
        Err(Error::RetryExhausted { attempts, last }) => {
            assert_eq!(attempts, 3);
            assert_eq!(last.native_code(), Some(-1));
        }
        other => panic!("expected RetryExhausted, got {:?}", other),
    }
    let calls = calls.lock();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0], Duration::ZERO);
    assert!(calls[1] >= Duration::from_millis(100) && calls[1] < Duration::from_millis(110));
    assert!(calls[2] >= Duration::from_millis(300) && calls[2] < Duration::from_millis(310));
}

#[tokio::test(start_paused = true)]
async fn success_after_a_transient_failure_stops_retrying() {
    let executor = RetryExecutor::new(default_policy());
    let attempts = Arc::new(Mutex::new(0u32));

    let value = executor
        .execute(|| {
            let attempts = Arc::clone(&attempts);
            async move {
                let mut n = attempts.lock();
                *n += 1;
                if *n == 1 {
                    Err(Error::Timeout)
                } else {
                    Ok(*n)
                }
            }
        })
        .await
        .unwrap();
    assert_eq!(value, 2);
}

#[tokio::test(start_paused = true)]
async fn two_failures_then_success_waits_100_then_200_ms() {
    let policy =
        RetryPolicy::new(3, Duration::from_millis(100), 2.0, Duration::from_secs(1)).unwrap();
    let executor = RetryExecutor::new(policy);
    let start = Instant::now();
    let calls: Arc<Mutex<Vec<Duration>>> = Arc::default();

    let value = executor
        .execute(|| {
            let calls = Arc::clone(&calls);
            async move {
                let mut calls = calls.lock();
                calls.push(start.elapsed());
                if calls.len() < 3 {
                    Err(Error::OpenFailed("engine not ready".into()))
                } else {
                    Ok("session")
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(value, "session");
    let calls = calls.lock();
    assert_eq!(calls.len(), 3);
    let first_wait = calls[1] - calls[0];
    let second_wait = calls[2] - calls[1];
    assert!(first_wait >= Duration::from_millis(100) && first_wait < Duration::from_millis(110));
    assert!(second_wait >= Duration::from_millis(200) && second_wait < Duration::from_millis(210));
}

#[tokio::test(start_paused = true)]
async fn local_errors_are_never_retried() {
    let executor = RetryExecutor::new(default_policy());
    let start = Instant::now();
    let attempts = Arc::new(Mutex::new(0u32));

    let result: Result<()> = executor
        .execute(|| {
            let attempts = Arc::clone(&attempts);
            async move {
                *attempts.lock() += 1;
                Err(Error::InvalidKeyExpression("a//b".into()))
            }
        })
        .await;
    assert!(matches!(result, Err(Error::InvalidKeyExpression(_))));
    assert_eq!(*attempts.lock(), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn delay_is_capped() {
    let policy =
        RetryPolicy::new(5, Duration::from_millis(500), 3.0, Duration::from_secs(1)).unwrap();
    assert_eq!(policy.delay_for_retry(1), Duration::from_millis(500));
    assert_eq!(policy.delay_for_retry(2), Duration::from_secs(1));
    assert_eq!(policy.delay_for_retry(4), Duration::from_secs(1));

    let executor = RetryExecutor::new(policy);
    let start = Instant::now();
    let result: Result<()> = executor.execute(|| async { Err(Error::Timeout) }).await;
    assert!(matches!(result, Err(Error::RetryExhausted { attempts: 5, .. })));
    // 0.5 + 1 + 1 + 1 seconds of backoff.
    let waited = start.elapsed();
    assert!(waited >= Duration::from_millis(3_500) && waited < Duration::from_millis(3_600));
}

#[tokio::test(start_paused = true)]
async fn streams_restart_from_the_top() {
    let executor = RetryExecutor::new(default_policy());
    let opened = Arc::new(Mutex::new(0u32));

    let items: Vec<Result<u32>> = executor
        .execute_stream(|| {
            let opened = Arc::clone(&opened);
            async move {
                let mut n = opened.lock();
                *n += 1;
                let items = if *n == 1 {
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
    assert_eq!(values, [1, 1, 2]);
    assert_eq!(*opened.lock(), 2);
}
