// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Liveliness tokens and subscribers.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use zbridge_sys::{ZLivelinessToken, ZSubscriber};

use crate::handle::ResourceCore;
use crate::keyexpr::KeyExpr;
use crate::registry::CallbackToken;
use crate::sample::LivelinessEvent;
use crate::sink::EventStream;

/// Presence marker: alive while declared. Undeclared on drop.
pub struct LivelinessToken {
    core: Arc<ResourceCore<ZLivelinessToken>>,
    key: KeyExpr,
}

impl LivelinessToken {
    pub(crate) fn new(core: Arc<ResourceCore<ZLivelinessToken>>, key: KeyExpr) -> Self {
        Self { core, key }
    }

    pub fn key_expr(&self) -> &KeyExpr {
        &self.key
    }

    pub fn is_declared(&self) -> bool {
        self.core.is_live()
    }

    /// Idempotent.
    pub fn undeclare(&self) {
        self.core.undeclare();
    }
}

impl std::fmt::Debug for LivelinessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivelinessToken")
            .field("key", &self.key)
            .field("declared", &self.is_declared())
            .finish()
    }
}

/// Stream of alive / not-alive transitions of matching tokens.
pub struct LivelinessSubscriber {
    core: Arc<ResourceCore<ZSubscriber>>,
    key: KeyExpr,
    events: EventStream<LivelinessEvent>,
}

impl LivelinessSubscriber {
    pub(crate) fn new(
        core: Arc<ResourceCore<ZSubscriber>>,
        key: KeyExpr,
        events: EventStream<LivelinessEvent>,
    ) -> Self {
        Self { core, key, events }
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

    pub async fn recv(&mut self) -> Option<LivelinessEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<LivelinessEvent> {
        self.events.try_recv()
    }

    pub fn undeclare(&self) {
        self.core.undeclare();
    }
}

impl Stream for LivelinessSubscriber {
    type Item = LivelinessEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<LivelinessEvent>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl std::fmt::Debug for LivelinessSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivelinessSubscriber")
            .field("key", &self.key)
            .field("token", &self.token())
            .finish()
    }
}
