// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Declared subscribers.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use zbridge_sys::ZSubscriber;

use crate::handle::ResourceCore;
use crate::keyexpr::KeyExpr;
use crate::registry::CallbackToken;
use crate::sample::Sample;
use crate::sink::EventStream;

/// A declared subscriber and its sample stream.
///
/// Samples arrive in the order the engine delivered them. The stream ends
/// after [`undeclare`](Subscriber::undeclare) (or session close) once the
/// already buffered samples have been read. Undeclared on drop.
pub struct Subscriber {
    core: Arc<ResourceCore<ZSubscriber>>,
    key: KeyExpr,
    samples: EventStream<Sample>,
}

impl Subscriber {
    pub(crate) fn new(
        core: Arc<ResourceCore<ZSubscriber>>,
        key: KeyExpr,
        samples: EventStream<Sample>,
    ) -> Self {
        Self { core, key, samples }
    }

    pub fn key_expr(&self) -> &KeyExpr {
        &self.key
    }

    pub fn token(&self) -> Option<CallbackToken> {
        self.core.token()
    }

    pub fn is_declared(&self) -> bool {
        self.core.is_live()
    }

    pub async fn recv(&mut self) -> Option<Sample> {
        self.samples.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Sample> {
        self.samples.try_recv()
    }

    /// Stop delivery. Idempotent.
    pub fn undeclare(&self) {
        self.core.undeclare();
    }
}

impl Stream for Subscriber {
    type Item = Sample;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Sample>> {
        Pin::new(&mut self.samples).poll_next(cx)
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("key", &self.key)
            .field("token", &self.token())
            .finish()
    }
}
