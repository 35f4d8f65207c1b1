// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared helpers for the loopback integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::time::Duration;

use zbridge::{Bridge, LoopbackEngine, Mode, Session, SessionConfig};

/// Upper bound for anything that should happen "soon".
pub const PATIENCE: Duration = Duration::from_secs(5);

pub async fn within<F: Future>(what: &str, fut: F) -> F::Output {
    match tokio::time::timeout(PATIENCE, fut).await {
        Ok(out) => out,
        Err(_) => panic!("timed out waiting for {}", what),
    }
}

/// Fresh loopback engine with one open peer session.
pub async fn peer() -> (Bridge, LoopbackEngine, Session) {
    let (bridge, engine) = Bridge::loopback();
    let session = bridge
        .open(SessionConfig::new(Mode::Peer))
        .await
        .expect("open loopback session");
    (bridge, engine, session)
}

/// Poll `cond` until it holds or `PATIENCE` elapses.
pub async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    within(what, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
}
