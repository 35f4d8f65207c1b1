// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # zbridge - native bridge to a C-ABI pub/sub/query engine
//!
//! Safe, async Rust bindings over the raw entry points declared in
//! `zbridge-sys`. The bridge owns everything that crosses the FFI boundary:
//! buffers, engine handles, callback contexts and the lifetime of in-flight
//! queries.
//!
//! ## Quick Start
//!
//! ```rust
//! use futures::StreamExt;
//! use zbridge::{Bridge, GetOptions, Mode, Result, SessionConfig};
//!
//! #[tokio::main(flavor = "multi_thread")]
//! async fn main() -> Result<()> {
//!     // In-process engine; `Bridge::linked()` uses the native shim instead.
//!     let (bridge, _engine) = Bridge::loopback();
//!     let session = bridge.open(SessionConfig::new(Mode::Peer)).await?;
//!
//!     let mut subscriber = session.declare_subscriber("demo/**").await?;
//!     session.put("demo/greeting", "hello")?;
//!     let sample = subscriber.next().await.expect("sample");
//!     assert_eq!(sample.payload.as_slice(), b"hello");
//!
//!     let _queryable = session
//!         .declare_queryable("demo/answer", |query| {
//!             let _ = query.reply("demo/answer", "42");
//!         })
//!         .await?;
//!     let replies = session
//!         .get("demo/answer", GetOptions::default())
//!         .await?
//!         .collect_all()
//!         .await;
//!     assert_eq!(replies.len(), 1);
//!
//!     session.close();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                         Application (async)                         |
//! |   Session -> Publisher / Subscriber / Queryable / Liveliness / get  |
//! +---------------------------------------------------------------------+
//! |                            Bridge layer                             |
//! |  Resource handles | Callback registry | Query supervisor | Retry    |
//! +---------------------------------------------------------------------+
//! |                        Dispatch trampolines                         |
//! |  extern "C" callbacks -> token lookup -> copy buffers -> channels   |
//! +---------------------------------------------------------------------+
//! |                      NativeApi (engine seam)                        |
//! |        LinkedApi (zbridge-sys, feature `native`) | LoopbackEngine   |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Bridge`] | Engine plus shared callback registry; opens sessions |
//! | [`Session`] | Open engine session, factory for every resource |
//! | [`Subscriber`] | Stream of [`Sample`]s for a key expression |
//! | [`Queryable`] | Answers `get` queries through a synchronous handler |
//! | [`ReplyStream`] | Replies of one query, closed on completion or deadline |
//! | [`CallbackRegistry`] | Token -> sink table consulted by every callback |
//! | [`RetryExecutor`] | Exponential backoff around fallible operations |
//!
//! ## Callback safety
//!
//! The engine never sees a Rust reference: each callback receives a boxed
//! context holding a weak registry handle and a [`CallbackToken`]. A callback
//! whose token is no longer registered is dropped, so events arriving after an
//! undeclare, a query deadline or a session close cannot reach freed state.

pub mod bridge;
pub mod buffer;
pub mod config;
mod dispatch;
pub mod engine;
pub mod error;
mod handle;
pub mod keyexpr;
pub mod liveliness;
pub mod logging;
pub mod options;
pub mod publisher;
pub mod queryable;
pub mod registry;
pub mod retry;
pub mod sample;
pub mod scout;
pub mod session;
mod sink;
pub mod subscriber;
pub mod supervisor;

pub use bridge::Bridge;
pub use buffer::Payload;
pub use config::{query_deadline, Mode, SessionConfig};
#[cfg(feature = "native")]
pub use engine::LinkedApi;
pub use engine::{FaultPoint, LoopbackEngine, LoopbackStats, NativeApi};
pub use error::{Error, ResourceKind, Result};
pub use keyexpr::{KeyExpr, Selector};
pub use liveliness::{LivelinessSubscriber, LivelinessToken};
pub use logging::LogLevel;
pub use options::{
    CongestionControl, Encoding, GetOptions, Priority, PublisherOptions, PutOptions,
    ReplyOptions, SampleKind,
};
pub use publisher::Publisher;
pub use queryable::{Query, Queryable};
pub use registry::{CallbackKind, CallbackRegistry, CallbackToken};
pub use retry::{RetryExecutor, RetryPolicy};
pub use sample::{LivelinessEvent, Reply, Sample};
pub use scout::{Hello, ScoutTarget, WhatAmI};
pub use session::Session;
pub use sink::EventStream;
pub use subscriber::Subscriber;
pub use supervisor::{QueryOutcome, ReplyStream};
