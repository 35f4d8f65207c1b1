// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test code readability over pedantic

//! Queryables, `get` and the completion/deadline supervisor.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{eventually, peer, within};
use futures::StreamExt;
use parking_lot::Mutex;
use zbridge::{Encoding, Error, FaultPoint, GetOptions, QueryOutcome, ReplyOptions};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn get_collects_replies_then_completes() {
    let (bridge, engine, session) = peer().await;
    let _echo = session
        .declare_queryable("svc/echo", |query| {
            let body = format!(
                "{}|{}",
                query.payload().to_string_lossy(),
                query.parameters()
            );
            query.reply(query.key(), body).unwrap();
        })
        .await
        .unwrap();

    let stream = session
        .get("svc/echo?x=1", GetOptions::default().payload("ping"))
        .await
        .unwrap();
    let token = stream.token();
    let pending = within("replies", stream.collect_all()).await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].key, "svc/echo");
    assert_eq!(pending[0].payload.as_str().unwrap(), "ping|x=1");

    eventually("registry cleanup", || !bridge.registry().contains(token)).await;
    eventually("buffers released", || engine.stats().buffers_outstanding() == 0).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wildcard_get_reaches_every_matching_queryable() {
    let (_bridge, _engine, session) = peer().await;
    let mut queryables = Vec::new();
    for name in ["a", "b", "c"] {
        let key = format!("robots/{}/state", name);
        let reply_key = key.clone();
        queryables.push(
            session
                .declare_queryable(&key, move |query| {
                    query
                        .reply_with(
                            &reply_key,
                            "idle",
                            &ReplyOptions::default()
                                .encoding(Encoding::TextPlain)
                                .attachment(b"v1".to_vec()),
                        )
                        .unwrap();
                })
                .await
                .unwrap(),
        );
    }

    let mut stream = session
        .get("robots/*/state", GetOptions::default())
        .await
        .unwrap();
    let mut keys = Vec::new();
    while let Some(reply) = within("reply", stream.next()).await {
        assert_eq!(reply.encoding, Encoding::TextPlain);
        assert_eq!(reply.attachment.unwrap().as_slice(), b"v1");
        keys.push(reply.key);
    }
    keys.sort();
    assert_eq!(keys, ["robots/a/state", "robots/b/state", "robots/c/state"]);
    assert_eq!(stream.outcome(), Some(QueryOutcome::Completed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn get_without_queryables_completes_empty() {
    let (_bridge, _engine, session) = peer().await;
    let stream = session.get("nobody/**", GetOptions::default()).await.unwrap();
    let replies = within("completion", stream.collect_all()).await;
    assert!(replies.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deadline_wins_over_slow_completion() {
    let (bridge, engine, session) = peer().await;
    engine.set_completion_delay(Duration::from_millis(200));
    let _queryable = session
        .declare_queryable("slow/q", |query| {
            query.reply("slow/q", "early").unwrap();
        })
        .await
        .unwrap();

    let started = Instant::now();
    let mut stream = session
        .get("slow/q", GetOptions::default().timeout(Duration::from_millis(50)))
        .await
        .unwrap();
    let first = within("early reply", stream.recv()).await.unwrap();
    assert_eq!(first.payload.as_str().unwrap(), "early");
    assert!(within("deadline", stream.recv()).await.is_none());
    assert!(started.elapsed() < Duration::from_millis(200));
    assert_eq!(stream.outcome(), Some(QueryOutcome::TimedOut));
    assert!(!bridge.registry().contains(stream.token()));

    // The late completion still reclaims its context without effect.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(stream.outcome(), Some(QueryOutcome::TimedOut));
    assert!(bridge.registry().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn replies_after_the_deadline_are_dropped() {
    let (bridge, engine, session) = peer().await;
    engine.set_reply_delay(Duration::from_millis(200));
    let _queryable = session
        .declare_queryable("late/q", |query| {
            query.reply("late/q", "too late").unwrap();
        })
        .await
        .unwrap();

    let stream = session
        .get("late/q", GetOptions::default().timeout(Duration::from_millis(50)))
        .await
        .unwrap();
    let token = stream.token();
    let replies = within("deadline", stream.collect_all()).await;
    assert!(replies.is_empty());
    assert!(!bridge.registry().contains(token));

    let before = engine.stats().callbacks;
    eventually("late reply and completion", || {
        engine.stats().callbacks >= before + 2
    })
    .await;
    eventually("buffers released", || engine.stats().buffers_outstanding() == 0).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropping_the_stream_cancels_the_query() {
    let (bridge, engine, session) = peer().await;
    engine.set_completion_delay(Duration::from_millis(100));
    let stream = session.get("any/key", GetOptions::default()).await.unwrap();
    let token = stream.token();
    assert!(bridge.registry().contains(token));
    drop(stream);
    assert!(!bridge.registry().contains(token));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn closing_the_session_cancels_pending_queries() {
    let (bridge, engine, session) = peer().await;
    engine.set_completion_delay(Duration::from_millis(300));
    let stream = session.get("any/key", GetOptions::default()).await.unwrap();
    session.close();
    assert_eq!(stream.outcome(), Some(QueryOutcome::Cancelled));
    assert!(within("cancelled stream", stream.collect_all()).await.is_empty());
    assert!(bridge.registry().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_get_reports_failure_and_leaves_no_entry() {
    let (bridge, engine, session) = peer().await;
    engine.fail_next(FaultPoint::Get, 1);
    let err = session.get("x/y", GetOptions::default()).await.unwrap_err();
    assert!(matches!(err, Error::EngineError { code: -1 }), "{:?}", err);
    assert!(bridge.registry().is_empty());

    let err = session.get("bad//selector", GetOptions::default()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidKeyExpression(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reply_errors_reach_the_handler() {
    let (_bridge, engine, session) = peer().await;
    let outcomes: Arc<Mutex<Vec<bool>>> = Arc::default();
    let seen = Arc::clone(&outcomes);
    let _queryable = session
        .declare_queryable("rep/**", move |query| {
            seen.lock().push(query.reply("rep/a", "1").is_ok());
            seen.lock().push(query.reply("elsewhere/a", "2").is_ok());
            seen.lock().push(query.reply("bad//key", "3").is_ok());
        })
        .await
        .unwrap();

    engine.fail_next(FaultPoint::Reply, 1);
    let replies = within("first query", async {
        session
            .get("rep/**", GetOptions::default())
            .await
            .unwrap()
            .collect_all()
            .await
    })
    .await;
    assert!(replies.is_empty());
    assert_eq!(*outcomes.lock(), [false, false, false]);

    outcomes.lock().clear();
    let replies = within("second query", async {
        session
            .get("rep/**", GetOptions::default())
            .await
            .unwrap()
            .collect_all()
            .await
    })
    .await;
    assert_eq!(replies.len(), 1);
    assert_eq!(*outcomes.lock(), [true, false, false]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_handler_does_not_poison_the_engine() {
    let (_bridge, _engine, session) = peer().await;
    let _queryable = session
        .declare_queryable("boom", |_query| panic!("handler failure"))
        .await
        .unwrap();
    let replies = within("completion", async {
        session
            .get("boom", GetOptions::default())
            .await
            .unwrap()
            .collect_all()
            .await
    })
    .await;
    assert!(replies.is_empty());

    let mut subscriber = session.declare_subscriber("still/alive").await.unwrap();
    session.put("still/alive", "yes").unwrap();
    assert!(within("sample", subscriber.recv()).await.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn undeclared_queryable_stops_answering() {
    let (_bridge, engine, session) = peer().await;
    let queryable = session
        .declare_queryable("gone/q", |query| {
            query.reply("gone/q", "here").unwrap();
        })
        .await
        .unwrap();
    queryable.undeclare();
    queryable.undeclare();
    assert!(!queryable.is_declared());

    let replies = within("completion", async {
        session
            .get("gone/q", GetOptions::default())
            .await
            .unwrap()
            .collect_all()
            .await
    })
    .await;
    assert!(replies.is_empty());
    assert_eq!(engine.stats().invalid_releases, 0);
}
