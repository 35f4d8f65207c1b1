// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Completion and timeout supervision of query-shaped operations.
//!
//! A query's reply stream closes on whichever comes first: the engine's
//! completion callback or the deadline (`timeout` plus a small grace). The
//! first trigger records the outcome, closes the sink, then removes the
//! registry entry; later triggers are no-ops, and replies still in flight are
//! dropped because the sink no longer accepts them.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use log::debug;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::handle::Teardown;
use crate::registry::{CallbackToken, WeakRegistry};
use crate::sink::{EventSink, EventStream};

/// How a query stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryOutcome {
    /// The engine signalled completion.
    Completed,
    /// The deadline elapsed first.
    TimedOut,
    /// The stream was dropped, or its session closed, before completion.
    Cancelled,
    /// The engine rejected the query.
    Failed,
}

/// Shared state of one outstanding query.
pub(crate) struct PendingQuery<T> {
    sink: EventSink<T>,
    token: CallbackToken,
    registry: WeakRegistry,
    outcome: Mutex<Option<QueryOutcome>>,
    done: Notify,
}

impl<T> PendingQuery<T> {
    pub(crate) fn new(sink: EventSink<T>, token: CallbackToken, registry: WeakRegistry) -> Self {
        Self {
            sink,
            token,
            registry,
            outcome: Mutex::new(None),
            done: Notify::new(),
        }
    }

    pub(crate) fn emit(&self, event: T) -> bool {
        self.sink.emit(event)
    }

    pub(crate) fn outcome(&self) -> Option<QueryOutcome> {
        *self.outcome.lock()
    }

    /// Close the stream with `outcome`. Only the first call has any effect.
    pub(crate) fn finish(&self, outcome: QueryOutcome) -> bool {
        {
            let mut slot = self.outcome.lock();
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
        }
        self.sink.close();
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.token);
        }
        self.done.notify_one();
        debug!("query {} finished: {:?}", self.token, outcome);
        true
    }
}

impl<T: Send> Teardown for PendingQuery<T> {
    fn teardown(&self) {
        self.finish(QueryOutcome::Cancelled);
    }
}

/// Close `pending` as `TimedOut` once `deadline` elapses, unless it finishes first.
pub(crate) fn supervise<T: Send + 'static>(pending: Arc<PendingQuery<T>>, deadline: Duration) {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(deadline) => {
                pending.finish(QueryOutcome::TimedOut);
            }
            _ = pending.done.notified() => {}
        }
    });
}

/// Replies of a query, ending at completion or timeout.
///
/// Dropping the stream before it ends cancels the query on the managed side;
/// replies the engine still produces are discarded.
pub struct ReplyStream<T> {
    events: EventStream<T>,
    pending: Arc<PendingQuery<T>>,
}

impl<T> ReplyStream<T> {
    pub(crate) fn new(events: EventStream<T>, pending: Arc<PendingQuery<T>>) -> Self {
        Self { events, pending }
    }

    pub async fn recv(&mut self) -> Option<T> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.events.try_recv()
    }

    /// Drain every remaining reply.
    pub async fn collect_all(mut self) -> Vec<T> {
        let mut replies = Vec::new();
        while let Some(reply) = self.events.recv().await {
            replies.push(reply);
        }
        replies
    }

    /// `None` while the query is still open.
    pub fn outcome(&self) -> Option<QueryOutcome> {
        self.pending.outcome()
    }

    pub fn token(&self) -> CallbackToken {
        self.pending.token
    }
}

impl<T> Stream for ReplyStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl<T> Drop for ReplyStream<T> {
    fn drop(&mut self) {
        self.pending.finish(QueryOutcome::Cancelled);
    }
}

impl<T> std::fmt::Debug for ReplyStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyStream")
            .field("token", &self.pending.token)
            .field("outcome", &self.outcome())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{CallbackKind, CallbackRegistry, Sink};
    use crate::sample::Reply;
    use crate::sink;

    fn pending() -> (CallbackRegistry, Arc<PendingQuery<Reply>>, EventStream<Reply>) {
        let registry = CallbackRegistry::new();
        let token = registry.allocate(CallbackKind::Query);
        let (tx, rx) = sink::channel();
        let pending = Arc::new(PendingQuery::new(tx, token, registry.downgrade()));
        registry.register(token, Sink::Replies(Arc::clone(&pending)));
        (registry, pending, rx)
    }

    #[test]
    fn finish_is_exactly_once() {
        let (registry, pending, _rx) = pending();
        assert!(pending.finish(QueryOutcome::Completed));
        assert!(!pending.finish(QueryOutcome::TimedOut));
        assert_eq!(pending.outcome(), Some(QueryOutcome::Completed));
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_closes_stream() {
        let (registry, pending, rx) = pending();
        supervise(Arc::clone(&pending), Duration::from_millis(55));
        let mut stream = ReplyStream::new(rx, Arc::clone(&pending));

        assert!(stream.recv().await.is_none());
        assert_eq!(stream.outcome(), Some(QueryOutcome::TimedOut));
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn completion_wins_before_deadline() {
        let (_registry, pending, rx) = pending();
        supervise(Arc::clone(&pending), Duration::from_secs(10));
        let mut stream = ReplyStream::new(rx, Arc::clone(&pending));

        pending.finish(QueryOutcome::Completed);
        assert!(stream.recv().await.is_none());
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(stream.outcome(), Some(QueryOutcome::Completed));
    }

    #[test]
    fn dropping_stream_cancels() {
        let (registry, pending, rx) = pending();
        drop(ReplyStream::new(rx, Arc::clone(&pending)));
        assert_eq!(pending.outcome(), Some(QueryOutcome::Cancelled));
        assert!(registry.is_empty());
    }
}
