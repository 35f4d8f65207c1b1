// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Native engine seam.
//!
//! [`NativeApi`] mirrors the C ABI of `zbridge-sys` one entry point per
//! method. The bridge only ever talks to the engine through this trait, so a
//! [`Bridge`](crate::Bridge) can run against the linked shim
//! ([`LinkedApi`], feature `native`) or the in-process [`LoopbackEngine`].
//!
//! # Contract
//!
//! Every implementation must honour the ownership rules documented in
//! `zbridge-sys`:
//!
//! - buffers passed in are copied before the call returns;
//! - buffers passed to a callback are freed by the engine after it returns;
//! - `undeclare_*` does not return while a callback for that handle is still
//!   running, and no callback for it starts afterwards;
//! - `get`/`liveliness_get` returning `>= 0` fire the completion callback
//!   exactly once, after the last reply; returning `< 0` fires nothing;
//! - the `reply_context` of a query callback is only valid during that call.

use std::os::raw::{c_char, c_int, c_void};

use zbridge_sys::{
    ZCompleteCallback, ZEncodingId, ZGetOptions, ZLivelinessCallback, ZLivelinessToken,
    ZPublisher, ZPublisherOptions, ZPutOptions, ZQuery, ZQueryCallback, ZQueryable,
    ZReplyCallback, ZSampleCallback, ZScoutCallback, ZSession, ZSubscriber,
};

#[cfg(feature = "native")]
mod linked;
pub mod loopback;

#[cfg(feature = "native")]
pub use linked::LinkedApi;
pub use loopback::{FaultPoint, LoopbackEngine, LoopbackStats};

/// Raw engine entry points.
///
/// # Safety
///
/// All methods take raw pointers straight from the bridge. Callers must pass
/// handles previously returned by the same implementation and not yet
/// released, and NUL-terminated strings / `len`-sized buffers valid for the
/// duration of the call.
#[allow(clippy::too_many_arguments)]
pub trait NativeApi: Send + Sync + 'static {
    /// Short engine name used in logs.
    fn name(&self) -> &'static str;

    unsafe fn init_logger(&self) -> c_int;

    // Session
    unsafe fn open_session(&self, mode: *const c_char, endpoints: *const c_char)
        -> *mut ZSession;
    unsafe fn open_session_with_config(&self, config: *const c_char) -> *mut ZSession;
    unsafe fn close_session(&self, session: *mut ZSession);
    unsafe fn session_info(&self, session: *mut ZSession) -> *mut c_char;
    unsafe fn free_string(&self, s: *mut c_char);

    // Publisher
    unsafe fn declare_publisher(
        &self,
        session: *mut ZSession,
        key: *const c_char,
        options: *const ZPublisherOptions,
    ) -> *mut ZPublisher;
    unsafe fn publisher_put(
        &self,
        publisher: *mut ZPublisher,
        data: *const u8,
        len: usize,
        options: *const ZPutOptions,
    ) -> c_int;
    unsafe fn publisher_delete(&self, publisher: *mut ZPublisher) -> c_int;
    unsafe fn undeclare_publisher(&self, publisher: *mut ZPublisher);

    // Subscriber
    unsafe fn declare_subscriber(
        &self,
        session: *mut ZSession,
        key: *const c_char,
        callback: ZSampleCallback,
        context: *mut c_void,
    ) -> *mut ZSubscriber;
    unsafe fn undeclare_subscriber(&self, subscriber: *mut ZSubscriber);

    // Queryable
    unsafe fn declare_queryable(
        &self,
        session: *mut ZSession,
        key: *const c_char,
        callback: ZQueryCallback,
        context: *mut c_void,
    ) -> *mut ZQueryable;
    unsafe fn undeclare_queryable(&self, queryable: *mut ZQueryable);
    unsafe fn query_reply(
        &self,
        reply_context: *const ZQuery,
        key: *const c_char,
        data: *const u8,
        len: usize,
        encoding: ZEncodingId,
        attachment: *const u8,
        attachment_len: usize,
    ) -> c_int;

    // Ad-hoc operations
    unsafe fn put(
        &self,
        session: *mut ZSession,
        key: *const c_char,
        data: *const u8,
        len: usize,
        options: *const ZPutOptions,
    ) -> c_int;
    unsafe fn delete(&self, session: *mut ZSession, key: *const c_char) -> c_int;

    // Query
    unsafe fn get(
        &self,
        session: *mut ZSession,
        selector: *const c_char,
        callback: ZReplyCallback,
        complete: ZCompleteCallback,
        context: *mut c_void,
        options: *const ZGetOptions,
    ) -> c_int;

    // Liveliness
    unsafe fn declare_liveliness_token(
        &self,
        session: *mut ZSession,
        key: *const c_char,
    ) -> *mut ZLivelinessToken;
    unsafe fn undeclare_liveliness_token(&self, token: *mut ZLivelinessToken);
    unsafe fn declare_liveliness_subscriber(
        &self,
        session: *mut ZSession,
        key: *const c_char,
        callback: ZLivelinessCallback,
        context: *mut c_void,
        history: bool,
    ) -> *mut ZSubscriber;
    unsafe fn liveliness_get(
        &self,
        session: *mut ZSession,
        key: *const c_char,
        callback: ZLivelinessCallback,
        complete: ZCompleteCallback,
        context: *mut c_void,
        timeout_ms: u64,
    ) -> c_int;

    // Scouting (blocking)
    unsafe fn scout(
        &self,
        what: *const c_char,
        config: *const c_char,
        callback: ZScoutCallback,
        context: *mut c_void,
        timeout_ms: u64,
    ) -> c_int;
}
