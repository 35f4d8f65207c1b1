// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-resource event channels.
//!
//! The trampoline is the only producer of an [`EventSink`]; the resource
//! handle's [`EventStream`] is the only consumer. Closing the sink drops the
//! sender, so the stream ends once buffered events are drained.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Producer side, shared between the registry entry and the owning handle.
pub(crate) struct EventSink<T> {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<T>>>>,
}

impl<T> Clone for EventSink<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T> EventSink<T> {
    /// Push one event. Returns false if the sink is closed or the consumer is gone.
    pub(crate) fn emit(&self, event: T) -> bool {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Close for good. Returns true only for the call that actually closed it.
    pub(crate) fn close(&self) -> bool {
        self.tx.lock().take().is_some()
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }
}

/// Create a connected sink/stream pair.
pub(crate) fn channel<T>() -> (EventSink<T>, EventStream<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        EventSink {
            tx: Arc::new(Mutex::new(Some(tx))),
        },
        EventStream { rx },
    )
}

/// Consumer side: an ordered, unbounded, non-restartable sequence of events.
#[derive(Debug)]
pub struct EventStream<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> EventStream<T> {
    /// Next event, or `None` once the producing resource is closed and drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> Stream for EventStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn events_arrive_in_order_then_end() {
        let (sink, mut stream) = channel();
        for i in 0..5 {
            assert!(sink.emit(i));
        }
        assert!(sink.close());
        assert!(!sink.close());
        assert!(!sink.emit(99));

        let collected: Vec<i32> = (&mut stream).collect().await;
        assert_eq!(collected, vec![0, 1, 2, 3, 4]);
        assert_eq!(stream.recv().await, None);
    }

    #[test]
    fn emit_fails_when_consumer_dropped() {
        let (sink, stream) = channel::<u8>();
        drop(stream);
        assert!(!sink.emit(1));
        assert!(!sink.is_closed());
    }

    #[test]
    fn clones_share_closure() {
        let (sink, mut stream) = channel::<u8>();
        let other = sink.clone();
        assert!(other.close());
        assert!(sink.is_closed());
        assert_eq!(stream.try_recv(), None);
    }
}
