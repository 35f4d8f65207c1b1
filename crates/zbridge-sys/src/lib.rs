// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # zbridge-sys
//!
//! Raw declarations of the C ABI exposed by the native publish/subscribe/query
//! engine shim. Nothing in this crate is safe to use directly; the `zbridge`
//! crate wraps every entry point behind owned handles and typed errors.
//!
//! # Ownership conventions
//!
//! - Handles (`*mut ZSession`, `*mut ZPublisher`, ...) are allocated by the
//!   engine and released by the matching `close`/`undeclare` entry point.
//! - Buffers passed *into* the engine are copied before the call returns.
//! - Buffers passed *to* a callback are owned by the engine and freed as soon
//!   as the callback returns.
//! - Strings returned by the engine (`zenoh_session_info`) must be released
//!   with `zenoh_free_string`.
//!
//! The extern block is only compiled with the `link` feature, which makes the
//! build script emit the link directive for the native shim.

#![allow(non_camel_case_types)]

use std::os::raw::{c_char, c_int, c_void};

// =============================================================================
// Opaque handles
// =============================================================================

/// Opaque handle to a native session
#[repr(C)]
pub struct ZSession {
    _private: [u8; 0],
}

/// Opaque handle to a native publisher
#[repr(C)]
pub struct ZPublisher {
    _private: [u8; 0],
}

/// Opaque handle to a native subscriber (data or liveliness)
#[repr(C)]
pub struct ZSubscriber {
    _private: [u8; 0],
}

/// Opaque handle to a native queryable
#[repr(C)]
pub struct ZQueryable {
    _private: [u8; 0],
}

/// Opaque handle to a native liveliness token
#[repr(C)]
pub struct ZLivelinessToken {
    _private: [u8; 0],
}

/// Opaque reply context handed to a queryable callback.
///
/// Only valid for the duration of the callback invocation.
#[repr(C)]
pub struct ZQuery {
    _private: [u8; 0],
}

// =============================================================================
// Enums
// =============================================================================

/// Message priority (1 = highest)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZPriority {
    RealTime = 1,
    InteractiveHigh = 2,
    InteractiveLow = 3,
    DataHigh = 4,
    Data = 5,
    DataLow = 6,
    Background = 7,
}

/// Congestion control strategy
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZCongestionControl {
    Block = 0,
    Drop = 1,
    DropFirst = 2,
}

/// Predefined encodings understood by the shim.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZEncodingId {
    Empty = 0,
    Bytes = 1,
    String = 2,
    Json = 3,
    TextPlain = 4,
    TextJson = 5,
    TextHtml = 6,
    TextXml = 7,
    TextCss = 8,
    TextCsv = 9,
    TextJavascript = 10,
    ImagePng = 11,
    ImageJpeg = 12,
    ImageGif = 13,
    ImageBmp = 14,
    ImageWebp = 15,
    ApplicationOctetStream = 16,
    ApplicationJson = 17,
    ApplicationXml = 18,
    ApplicationCbor = 19,
    ApplicationYaml = 20,
    ApplicationProtobuf = 21,
    ApplicationCdr = 22,
    Custom = 100,
}

/// Sample kind value carried by sample/reply callbacks (`c_int`).
pub const Z_SAMPLE_KIND_PUT: c_int = 0;
/// Sample kind value for deletions.
pub const Z_SAMPLE_KIND_DELETE: c_int = 1;

/// Generic failure status returned by the shim.
pub const Z_ERR_GENERIC: c_int = -1;

// =============================================================================
// Option structs
// =============================================================================

/// Options for `zenoh_declare_publisher_with_options`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ZPublisherOptions {
    pub priority: ZPriority,
    pub congestion_control: ZCongestionControl,
    pub encoding: ZEncodingId,
    /// Optional schema / custom encoding string (NULL if none)
    pub encoding_schema: *const c_char,
    /// Express mode (no batching)
    pub is_express: bool,
}

/// Options for put operations
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ZPutOptions {
    pub priority: ZPriority,
    pub congestion_control: ZCongestionControl,
    pub encoding: ZEncodingId,
    pub encoding_schema: *const c_char,
    /// Attachment bytes (NULL if none)
    pub attachment: *const u8,
    pub attachment_len: usize,
    pub is_express: bool,
}

/// Options for `zenoh_get_async_with_options`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ZGetOptions {
    /// Timeout in milliseconds (0 = engine default)
    pub timeout_ms: u64,
    pub priority: ZPriority,
    pub congestion_control: ZCongestionControl,
    /// Query payload (NULL if none)
    pub payload: *const u8,
    pub payload_len: usize,
    pub encoding: ZEncodingId,
    pub attachment: *const u8,
    pub attachment_len: usize,
}

// =============================================================================
// Callback types
// =============================================================================

/// Data subscriber callback.
///
/// # Parameters
/// - `key`: NUL-terminated key expression of the sample
/// - `value`/`len`: payload bytes (NULL when `len == 0`)
/// - `sample_kind`: `Z_SAMPLE_KIND_PUT` or `Z_SAMPLE_KIND_DELETE`
/// - `priority`, `congestion_control`: raw enum values
/// - `encoding`: NUL-terminated encoding string (may be NULL)
/// - `attachment`/`attachment_len`: attachment bytes (NULL if none)
/// - `timestamp`: engine timestamp, 0 if unavailable
/// - `context`: context pointer given at declaration
pub type ZSampleCallback = unsafe extern "C" fn(
    key: *const c_char,
    value: *const u8,
    len: usize,
    sample_kind: c_int,
    priority: c_int,
    congestion_control: c_int,
    encoding: *const c_char,
    attachment: *const u8,
    attachment_len: usize,
    timestamp: u64,
    context: *mut c_void,
);

/// Query reply callback.
pub type ZReplyCallback = unsafe extern "C" fn(
    key: *const c_char,
    value: *const u8,
    len: usize,
    sample_kind: c_int,
    encoding: *const c_char,
    attachment: *const u8,
    attachment_len: usize,
    context: *mut c_void,
);

/// Completion callback, fired exactly once after the last reply.
pub type ZCompleteCallback = unsafe extern "C" fn(context: *mut c_void);

/// Queryable callback.
///
/// `reply_context` may only be used (with `zenoh_query_reply_with_options`)
/// before this callback returns.
pub type ZQueryCallback = unsafe extern "C" fn(
    key: *const c_char,
    parameters: *const c_char,
    value: *const u8,
    len: usize,
    attachment: *const u8,
    attachment_len: usize,
    reply_context: *const ZQuery,
    context: *mut c_void,
);

/// Liveliness callback (`is_alive` is 1 when a token appears, 0 when it goes away).
pub type ZLivelinessCallback =
    unsafe extern "C" fn(key: *const c_char, is_alive: c_int, context: *mut c_void);

/// Scouting callback, one JSON document per discovered node.
pub type ZScoutCallback = unsafe extern "C" fn(info: *const c_char, context: *mut c_void);

// =============================================================================
// Entry points
// =============================================================================

#[cfg(feature = "link")]
extern "C" {
    pub fn zenoh_init_logger() -> c_int;

    // Session
    pub fn zenoh_open_session(mode: *const c_char, endpoints: *const c_char) -> *mut ZSession;
    pub fn zenoh_open_session_with_config(config: *const c_char) -> *mut ZSession;
    pub fn zenoh_close_session(session: *mut ZSession);
    pub fn zenoh_session_info(session: *mut ZSession) -> *mut c_char;
    pub fn zenoh_free_string(s: *mut c_char);

    // Publisher
    pub fn zenoh_declare_publisher_with_options(
        session: *mut ZSession,
        key: *const c_char,
        options: *const ZPublisherOptions,
    ) -> *mut ZPublisher;
    pub fn zenoh_publisher_put_with_options(
        publisher: *mut ZPublisher,
        data: *const u8,
        len: usize,
        options: *const ZPutOptions,
    ) -> c_int;
    pub fn zenoh_publisher_delete(publisher: *mut ZPublisher) -> c_int;
    pub fn zenoh_undeclare_publisher(publisher: *mut ZPublisher);

    // Subscriber
    pub fn zenoh_declare_subscriber_ex(
        session: *mut ZSession,
        key: *const c_char,
        callback: ZSampleCallback,
        context: *mut c_void,
    ) -> *mut ZSubscriber;
    pub fn zenoh_undeclare_subscriber(subscriber: *mut ZSubscriber);

    // Queryable
    pub fn zenoh_declare_queryable(
        session: *mut ZSession,
        key: *const c_char,
        callback: ZQueryCallback,
        context: *mut c_void,
    ) -> *mut ZQueryable;
    pub fn zenoh_undeclare_queryable(queryable: *mut ZQueryable);
    pub fn zenoh_query_reply_with_options(
        reply_context: *const ZQuery,
        key: *const c_char,
        data: *const u8,
        len: usize,
        encoding: ZEncodingId,
        attachment: *const u8,
        attachment_len: usize,
    ) -> c_int;

    // Ad-hoc operations
    pub fn zenoh_put_with_options(
        session: *mut ZSession,
        key: *const c_char,
        data: *const u8,
        len: usize,
        options: *const ZPutOptions,
    ) -> c_int;
    pub fn zenoh_delete(session: *mut ZSession, key: *const c_char) -> c_int;

    // Query
    pub fn zenoh_get_async_with_options(
        session: *mut ZSession,
        selector: *const c_char,
        callback: ZReplyCallback,
        complete_callback: ZCompleteCallback,
        context: *mut c_void,
        options: *const ZGetOptions,
    ) -> c_int;

    // Liveliness
    pub fn zenoh_declare_liveliness_token(
        session: *mut ZSession,
        key: *const c_char,
    ) -> *mut ZLivelinessToken;
    pub fn zenoh_undeclare_liveliness_token(token: *mut ZLivelinessToken);
    pub fn zenoh_declare_liveliness_subscriber(
        session: *mut ZSession,
        key: *const c_char,
        callback: ZLivelinessCallback,
        context: *mut c_void,
        history: bool,
    ) -> *mut ZSubscriber;
    pub fn zenoh_liveliness_get(
        session: *mut ZSession,
        key: *const c_char,
        callback: ZLivelinessCallback,
        complete_callback: ZCompleteCallback,
        context: *mut c_void,
        timeout_ms: u64,
    ) -> c_int;

    // Scouting
    pub fn zenoh_scout(
        what: *const c_char,
        config: *const c_char,
        callback: ZScoutCallback,
        context: *mut c_void,
        timeout_ms: u64,
    ) -> c_int;
}
