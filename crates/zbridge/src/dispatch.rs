// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Callback trampolines invoked by the native engine.
//!
//! Each trampoline may run on any engine thread. The steps are always the
//! same:
//!
//! 1. resolve the context token in the registry; an absent entry means the
//!    resource is gone and the event is dropped before any decoding;
//! 2. copy every native buffer into owned values (the engine frees them as
//!    soon as the trampoline returns);
//! 3. emit the decoded event into the resolved sink.
//!
//! Decode failures drop the single event with a warning. Everything runs
//! under `catch_unwind`: a panic must never unwind into the engine.

use std::any::Any;
use std::os::raw::{c_char, c_int, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;

use log::{error, trace, warn};
use zbridge_sys::ZQuery;

use crate::buffer::{NativeSlice, NativeStr, Payload};
use crate::options::{CongestionControl, Encoding, Priority, SampleKind};
use crate::queryable::{Query, ReplyContext};
use crate::registry::{CallbackToken, Sink, WeakRegistry};
use crate::sample::{LivelinessEvent, Reply, Sample};
use crate::scout::ScoutCollector;
use crate::supervisor::QueryOutcome;

/// What the engine receives as `context`: the registry and the token to look up.
pub(crate) struct DispatchContext {
    registry: WeakRegistry,
    token: CallbackToken,
}

impl DispatchContext {
    pub(crate) fn new(registry: WeakRegistry, token: CallbackToken) -> Self {
        Self { registry, token }
    }

    fn resolve(&self) -> Option<Sink> {
        self.registry.upgrade()?.resolve(self.token)
    }
}

/// Heap-allocated [`DispatchContext`] whose address is handed to the engine.
///
/// Freed on drop. For queries, ownership moves to the engine with
/// [`ContextBox::into_raw`] and comes back in the completion trampoline.
pub(crate) struct ContextBox(NonNull<DispatchContext>);

// SAFETY: DispatchContext is Send + Sync; the box is only freed once.
unsafe impl Send for ContextBox {}
unsafe impl Sync for ContextBox {}

impl ContextBox {
    pub(crate) fn new(context: DispatchContext) -> Self {
        Self(NonNull::from(Box::leak(Box::new(context))))
    }

    /// Address to pass as the callback context. Ownership stays here.
    pub(crate) fn as_raw(&self) -> *mut c_void {
        self.0.as_ptr().cast()
    }

    /// Give up ownership (the engine will hand it back on completion).
    pub(crate) fn into_raw(self) -> *mut c_void {
        let raw = self.as_raw();
        std::mem::forget(self);
        raw
    }

    /// # Safety
    /// `raw` must come from [`ContextBox::into_raw`] and not be reclaimed twice.
    pub(crate) unsafe fn from_raw(raw: *mut c_void) -> Option<Self> {
        NonNull::new(raw.cast::<DispatchContext>()).map(Self)
    }
}

impl Drop for ContextBox {
    fn drop(&mut self) {
        // SAFETY: allocated by Box in `new`, freed exactly once here.
        unsafe { drop(Box::from_raw(self.0.as_ptr())) };
    }
}

/// # Safety
/// `raw` is NULL or a live `DispatchContext` for the duration of the callback.
unsafe fn context<'cb>(raw: *mut c_void) -> Option<&'cb DispatchContext> {
    raw.cast::<DispatchContext>().cast_const().as_ref()
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

fn guarded(callback: &str, f: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        error!(
            "panic in {} callback: {}",
            callback,
            panic_message(payload.as_ref())
        );
    }
}

fn dropped(ctx: &DispatchContext, what: &str) {
    trace!("{} for {} dropped: no live sink", what, ctx.token);
}

// =============================================================================
// Decoding
// =============================================================================

type Decoded<T> = std::result::Result<T, &'static str>;

unsafe fn decode_key(key: *const c_char) -> Decoded<String> {
    NativeStr::from_raw(key)
        .ok_or("null key")?
        .to_owned_string()
        .map_err(|_| "key is not UTF-8")
}

unsafe fn decode_encoding(encoding: *const c_char) -> Decoded<Encoding> {
    match NativeStr::from_raw(encoding) {
        None => Ok(Encoding::default()),
        Some(s) => s
            .to_owned_string()
            .map(|mime| Encoding::from_mime(&mime))
            .map_err(|_| "encoding is not UTF-8"),
    }
}

unsafe fn decode_payload(ptr: *const u8, len: usize) -> Decoded<Payload> {
    NativeSlice::from_raw(ptr, len)
        .map(|s| s.to_payload())
        .ok_or("null payload with non-zero length")
}

unsafe fn decode_attachment(ptr: *const u8, len: usize) -> Option<Payload> {
    NativeSlice::optional(ptr, len).map(|s| s.to_payload())
}

fn decode_kind(kind: c_int) -> Decoded<SampleKind> {
    SampleKind::from_raw(kind).ok_or("unknown sample kind")
}

// =============================================================================
// Subscriber
// =============================================================================

#[allow(clippy::too_many_arguments)]
pub(crate) unsafe extern "C" fn on_sample(
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
    raw_context: *mut c_void,
) {
    guarded("sample", || {
        let Some(ctx) = context(raw_context) else {
            return;
        };
        let Some(Sink::Samples(sink)) = ctx.resolve() else {
            dropped(ctx, "sample");
            return;
        };

        let decoded = (|| -> Decoded<Sample> {
            Ok(Sample {
                key: decode_key(key)?,
                payload: decode_payload(value, len)?,
                kind: decode_kind(sample_kind)?,
                encoding: decode_encoding(encoding)?,
                attachment: decode_attachment(attachment, attachment_len),
                priority: Priority::from_raw(priority).unwrap_or_default(),
                congestion_control: CongestionControl::from_raw(congestion_control)
                    .unwrap_or_default(),
                timestamp,
            })
        })();

        match decoded {
            Ok(sample) => {
                if !sink.emit(sample) {
                    dropped(ctx, "sample");
                }
            }
            Err(why) => warn!("malformed sample for {} dropped: {}", ctx.token, why),
        }
    });
}

// =============================================================================
// Query (get)
// =============================================================================

#[allow(clippy::too_many_arguments)]
pub(crate) unsafe extern "C" fn on_reply(
    key: *const c_char,
    value: *const u8,
    len: usize,
    sample_kind: c_int,
    encoding: *const c_char,
    attachment: *const u8,
    attachment_len: usize,
    raw_context: *mut c_void,
) {
    guarded("reply", || {
        let Some(ctx) = context(raw_context) else {
            return;
        };
        let Some(Sink::Replies(pending)) = ctx.resolve() else {
            dropped(ctx, "reply");
            return;
        };

        let decoded = (|| -> Decoded<Reply> {
            Ok(Reply {
                key: decode_key(key)?,
                payload: decode_payload(value, len)?,
                kind: decode_kind(sample_kind)?,
                encoding: decode_encoding(encoding)?,
                attachment: decode_attachment(attachment, attachment_len),
            })
        })();

        match decoded {
            Ok(reply) => {
                if !pending.emit(reply) {
                    dropped(ctx, "reply");
                }
            }
            Err(why) => warn!("malformed reply for {} dropped: {}", ctx.token, why),
        }
    });
}

/// Completion of a `get` or liveliness `get`. Reclaims the context.
pub(crate) unsafe extern "C" fn on_query_complete(raw_context: *mut c_void) {
    guarded("completion", || {
        let Some(ctx) = ContextBox::from_raw(raw_context) else {
            return;
        };
        // SAFETY: the box is live until `ctx` drops at the end of this closure.
        let dispatch = &*ctx.0.as_ptr();
        match dispatch.resolve() {
            Some(Sink::Replies(pending)) => {
                pending.finish(QueryOutcome::Completed);
            }
            Some(Sink::LivelinessReplies(pending)) => {
                pending.finish(QueryOutcome::Completed);
            }
            _ => trace!("completion for {} after close ignored", dispatch.token),
        }
    });
}

// =============================================================================
// Queryable
// =============================================================================

#[allow(clippy::too_many_arguments)]
pub(crate) unsafe extern "C" fn on_query(
    key: *const c_char,
    parameters: *const c_char,
    value: *const u8,
    len: usize,
    attachment: *const u8,
    attachment_len: usize,
    reply_context: *const ZQuery,
    raw_context: *mut c_void,
) {
    guarded("query", || {
        let Some(ctx) = context(raw_context) else {
            return;
        };
        let Some(Sink::Queries(entry)) = ctx.resolve() else {
            dropped(ctx, "query");
            return;
        };
        if entry.is_closed() {
            dropped(ctx, "query");
            return;
        }

        let decoded = (|| -> Decoded<(String, String, Payload)> {
            let key = decode_key(key)?;
            let parameters = match NativeStr::from_raw(parameters) {
                Some(p) => p.to_owned_string().map_err(|_| "parameters are not UTF-8")?,
                None => String::new(),
            };
            Ok((key, parameters, decode_payload(value, len)?))
        })();

        match decoded {
            Ok((key, parameters, payload)) => {
                let query = Query::new(
                    key,
                    parameters,
                    payload,
                    decode_attachment(attachment, attachment_len),
                    ReplyContext::new(reply_context, entry.api()),
                );
                entry.handle(&query);
            }
            Err(why) => warn!("malformed query for {} dropped: {}", ctx.token, why),
        }
    });
}

// =============================================================================
// Liveliness
// =============================================================================

pub(crate) unsafe extern "C" fn on_liveliness(
    key: *const c_char,
    is_alive: c_int,
    raw_context: *mut c_void,
) {
    guarded("liveliness", || {
        let Some(ctx) = context(raw_context) else {
            return;
        };
        let sink = match ctx.resolve() {
            Some(sink @ (Sink::Liveliness(_) | Sink::LivelinessReplies(_))) => sink,
            _ => {
                dropped(ctx, "liveliness event");
                return;
            }
        };

        let key = match decode_key(key) {
            Ok(key) => key,
            Err(why) => {
                warn!("malformed liveliness event for {} dropped: {}", ctx.token, why);
                return;
            }
        };
        let event = LivelinessEvent {
            key,
            alive: is_alive != 0,
        };
        let delivered = match &sink {
            Sink::Liveliness(events) => events.emit(event),
            Sink::LivelinessReplies(pending) => pending.emit(event),
            _ => false,
        };
        if !delivered {
            dropped(ctx, "liveliness event");
        }
    });
}

// =============================================================================
// Scouting
// =============================================================================

/// `context` is a `ScoutCollector` living on the stack of the blocking scout call.
pub(crate) unsafe extern "C" fn on_scout(info: *const c_char, raw_context: *mut c_void) {
    guarded("scout", || {
        let Some(collector) = raw_context.cast::<ScoutCollector>().cast_const().as_ref() else {
            return;
        };
        match NativeStr::from_raw(info).map(|s| s.to_owned_string()) {
            Some(Ok(json)) => collector.push_json(&json),
            Some(Err(_)) => warn!("scout hello is not UTF-8, skipped"),
            None => warn!("null scout hello skipped"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{CallbackKind, CallbackRegistry};
    use crate::sink;
    use std::ffi::CString;
    use std::ptr;

    fn fire_sample(ctx: *mut c_void, key: &CString, payload: &[u8], kind: c_int) {
        unsafe {
            on_sample(
                key.as_ptr(),
                if payload.is_empty() {
                    ptr::null()
                } else {
                    payload.as_ptr()
                },
                payload.len(),
                kind,
                5,
                1,
                ptr::null(),
                ptr::null(),
                0,
                0,
                ctx,
            )
        }
    }

    #[test]
    fn sample_is_decoded_into_owned_event() {
        let registry = CallbackRegistry::new();
        let token = registry.allocate(CallbackKind::Subscriber);
        let (tx, mut rx) = sink::channel();
        registry.register(token, Sink::Samples(tx));
        let ctx = ContextBox::new(DispatchContext::new(registry.downgrade(), token));

        let key = CString::new("demo/a").unwrap();
        let mut native = vec![1u8, 2, 3];
        fire_sample(ctx.as_raw(), &key, &native, 0);
        native.fill(0);

        let sample = rx.try_recv().unwrap();
        assert_eq!(sample.key, "demo/a");
        assert_eq!(sample.payload.as_slice(), &[1, 2, 3]);
        assert_eq!(sample.kind, SampleKind::Put);
        assert_eq!(sample.priority, Priority::Data);
        assert_eq!(sample.encoding, Encoding::Bytes);
        assert!(sample.attachment.is_none());
    }

    #[test]
    fn callback_for_removed_id_is_a_no_op() {
        let registry = CallbackRegistry::new();
        let token = registry.allocate(CallbackKind::Subscriber);
        let (tx, mut rx) = sink::channel();
        registry.register(token, Sink::Samples(tx.clone()));
        let ctx = ContextBox::new(DispatchContext::new(registry.downgrade(), token));
        registry.remove(token);

        let key = CString::new("demo/a").unwrap();
        fire_sample(ctx.as_raw(), &key, b"late", 0);

        assert!(rx.try_recv().is_none());
        assert!(!tx.is_closed());
        assert!(registry.is_empty());
    }

    #[test]
    fn callback_after_registry_dropped_is_a_no_op() {
        let registry = CallbackRegistry::new();
        let token = registry.allocate(CallbackKind::Subscriber);
        let ctx = ContextBox::new(DispatchContext::new(registry.downgrade(), token));
        drop(registry);

        let key = CString::new("demo/a").unwrap();
        fire_sample(ctx.as_raw(), &key, b"x", 0);
    }

    #[test]
    fn malformed_sample_is_dropped_not_fatal() {
        let registry = CallbackRegistry::new();
        let token = registry.allocate(CallbackKind::Subscriber);
        let (tx, mut rx) = sink::channel();
        registry.register(token, Sink::Samples(tx));
        let ctx = ContextBox::new(DispatchContext::new(registry.downgrade(), token));

        let bad_key = CString::new(vec![0x61, 0xff]).unwrap();
        fire_sample(ctx.as_raw(), &bad_key, b"x", 0);
        let key = CString::new("demo/a").unwrap();
        fire_sample(ctx.as_raw(), &key, b"x", 42);
        unsafe {
            on_sample(
                key.as_ptr(),
                ptr::null(),
                16,
                0,
                5,
                1,
                ptr::null(),
                ptr::null(),
                0,
                0,
                ctx.as_raw(),
            )
        };
        fire_sample(ctx.as_raw(), &key, b"ok", 1);

        let sample = rx.try_recv().unwrap();
        assert_eq!(sample.kind, SampleKind::Delete);
        assert_eq!(sample.payload.as_slice(), b"ok");
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn null_context_is_ignored() {
        let key = CString::new("demo/a").unwrap();
        fire_sample(ptr::null_mut(), &key, b"x", 0);
        unsafe { on_query_complete(ptr::null_mut()) };
        unsafe { on_liveliness(key.as_ptr(), 1, ptr::null_mut()) };
    }

    #[test]
    fn liveliness_event_decodes_alive_flag() {
        let registry = CallbackRegistry::new();
        let token = registry.allocate(CallbackKind::Liveliness);
        let (tx, mut rx) = sink::channel();
        registry.register(token, Sink::Liveliness(tx));
        let ctx = ContextBox::new(DispatchContext::new(registry.downgrade(), token));

        let key = CString::new("group/member").unwrap();
        unsafe {
            on_liveliness(key.as_ptr(), 1, ctx.as_raw());
            on_liveliness(key.as_ptr(), 0, ctx.as_raw());
        }
        assert!(rx.try_recv().unwrap().alive);
        assert!(!rx.try_recv().unwrap().alive);
    }

    #[test]
    fn context_box_round_trips_ownership() {
        let registry = CallbackRegistry::new();
        let token = registry.allocate(CallbackKind::Query);
        let raw = ContextBox::new(DispatchContext::new(registry.downgrade(), token)).into_raw();
        let back = unsafe { ContextBox::from_raw(raw) }.unwrap();
        assert_eq!(back.as_raw(), raw);
        assert!(unsafe { ContextBox::from_raw(ptr::null_mut()) }.is_none());
    }
}
