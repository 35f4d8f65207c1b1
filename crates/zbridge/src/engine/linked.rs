// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! [`NativeApi`] backed by the linked native shim.

use std::os::raw::{c_char, c_int, c_void};

use zbridge_sys as sys;
use zbridge_sys::{
    ZCompleteCallback, ZEncodingId, ZGetOptions, ZLivelinessCallback, ZLivelinessToken,
    ZPublisher, ZPublisherOptions, ZPutOptions, ZQuery, ZQueryCallback, ZQueryable,
    ZReplyCallback, ZSampleCallback, ZScoutCallback, ZSession, ZSubscriber,
};

use super::NativeApi;

/// Forwards every call to the `zbridge-sys` externs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkedApi;

impl NativeApi for LinkedApi {
    fn name(&self) -> &'static str {
        "native"
    }

    unsafe fn init_logger(&self) -> c_int {
        sys::zenoh_init_logger()
    }

    unsafe fn open_session(&self, mode: *const c_char, endpoints: *const c_char) -> *mut ZSession {
        sys::zenoh_open_session(mode, endpoints)
    }

    unsafe fn open_session_with_config(&self, config: *const c_char) -> *mut ZSession {
        sys::zenoh_open_session_with_config(config)
    }

    unsafe fn close_session(&self, session: *mut ZSession) {
        sys::zenoh_close_session(session)
    }

    unsafe fn session_info(&self, session: *mut ZSession) -> *mut c_char {
        sys::zenoh_session_info(session)
    }

    unsafe fn free_string(&self, s: *mut c_char) {
        sys::zenoh_free_string(s)
    }

    unsafe fn declare_publisher(
        &self,
        session: *mut ZSession,
        key: *const c_char,
        options: *const ZPublisherOptions,
    ) -> *mut ZPublisher {
        sys::zenoh_declare_publisher_with_options(session, key, options)
    }

    unsafe fn publisher_put(
        &self,
        publisher: *mut ZPublisher,
        data: *const u8,
        len: usize,
        options: *const ZPutOptions,
    ) -> c_int {
        sys::zenoh_publisher_put_with_options(publisher, data, len, options)
    }

    unsafe fn publisher_delete(&self, publisher: *mut ZPublisher) -> c_int {
        sys::zenoh_publisher_delete(publisher)
    }

    unsafe fn undeclare_publisher(&self, publisher: *mut ZPublisher) {
        sys::zenoh_undeclare_publisher(publisher)
    }

    unsafe fn declare_subscriber(
        &self,
        session: *mut ZSession,
        key: *const c_char,
        callback: ZSampleCallback,
        context: *mut c_void,
    ) -> *mut ZSubscriber {
        sys::zenoh_declare_subscriber_ex(session, key, callback, context)
    }

    unsafe fn undeclare_subscriber(&self, subscriber: *mut ZSubscriber) {
        sys::zenoh_undeclare_subscriber(subscriber)
    }

    unsafe fn declare_queryable(
        &self,
        session: *mut ZSession,
        key: *const c_char,
        callback: ZQueryCallback,
        context: *mut c_void,
    ) -> *mut ZQueryable {
        sys::zenoh_declare_queryable(session, key, callback, context)
    }

    unsafe fn undeclare_queryable(&self, queryable: *mut ZQueryable) {
        sys::zenoh_undeclare_queryable(queryable)
    }

    unsafe fn query_reply(
        &self,
        reply_context: *const ZQuery,
        key: *const c_char,
        data: *const u8,
        len: usize,
        encoding: ZEncodingId,
        attachment: *const u8,
        attachment_len: usize,
    ) -> c_int {
        sys::zenoh_query_reply_with_options(
            reply_context,
            key,
            data,
            len,
            encoding,
            attachment,
            attachment_len,
        )
    }

    unsafe fn put(
        &self,
        session: *mut ZSession,
        key: *const c_char,
        data: *const u8,
        len: usize,
        options: *const ZPutOptions,
    ) -> c_int {
        sys::zenoh_put_with_options(session, key, data, len, options)
    }

    unsafe fn delete(&self, session: *mut ZSession, key: *const c_char) -> c_int {
        sys::zenoh_delete(session, key)
    }

    unsafe fn get(
        &self,
        session: *mut ZSession,
        selector: *const c_char,
        callback: ZReplyCallback,
        complete: ZCompleteCallback,
        context: *mut c_void,
        options: *const ZGetOptions,
    ) -> c_int {
        sys::zenoh_get_async_with_options(session, selector, callback, complete, context, options)
    }

    unsafe fn declare_liveliness_token(
        &self,
        session: *mut ZSession,
        key: *const c_char,
    ) -> *mut ZLivelinessToken {
        sys::zenoh_declare_liveliness_token(session, key)
    }

    unsafe fn undeclare_liveliness_token(&self, token: *mut ZLivelinessToken) {
        sys::zenoh_undeclare_liveliness_token(token)
    }

    unsafe fn declare_liveliness_subscriber(
        &self,
        session: *mut ZSession,
        key: *const c_char,
        callback: ZLivelinessCallback,
        context: *mut c_void,
        history: bool,
    ) -> *mut ZSubscriber {
        sys::zenoh_declare_liveliness_subscriber(session, key, callback, context, history)
    }

    unsafe fn liveliness_get(
        &self,
        session: *mut ZSession,
        key: *const c_char,
        callback: ZLivelinessCallback,
        complete: ZCompleteCallback,
        context: *mut c_void,
        timeout_ms: u64,
    ) -> c_int {
        sys::zenoh_liveliness_get(session, key, callback, complete, context, timeout_ms)
    }

    unsafe fn scout(
        &self,
        what: *const c_char,
        config: *const c_char,
        callback: ZScoutCallback,
        context: *mut c_void,
        timeout_ms: u64,
    ) -> c_int {
        sys::zenoh_scout(what, config, callback, context, timeout_ms)
    }
}
