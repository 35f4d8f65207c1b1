// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process engine.
//!
//! [`LoopbackEngine`] implements [`NativeApi`] without touching the network.
//! Every session opened on one engine (or any clone of it) shares a single
//! fabric, so a publisher in one session reaches the subscribers of all of
//! them. Samples and liveliness changes are delivered on one thread in
//! publication order; each query runs on its own thread. Callback buffers are
//! `malloc`ed and freed right after the callback returns, the way the native
//! shim does it, and [`LoopbackEngine::stats`] exposes the accounting.
//!
//! Fault injection ([`LoopbackEngine::fail_next`]) and the delay knobs make
//! error paths and deadlines reproducible in tests.
//!
//! ```
//! use zbridge::{FaultPoint, LoopbackEngine};
//!
//! let engine = LoopbackEngine::new();
//! engine.fail_next(FaultPoint::Open, 2);
//! assert_eq!(engine.stats().live_handles, 0);
//! ```

mod fabric;
mod keymatch;

use std::collections::hash_map::RandomState;
use std::collections::{HashMap, HashSet};
use std::hash::BuildHasher;
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, error, trace, warn};
use parking_lot::Mutex;
use zbridge_sys::{
    ZCompleteCallback, ZEncodingId, ZGetOptions, ZLivelinessCallback, ZLivelinessToken,
    ZPublisher, ZPublisherOptions, ZPutOptions, ZQuery, ZQueryCallback, ZQueryable,
    ZReplyCallback, ZSampleCallback, ZScoutCallback, ZSession, ZSubscriber, Z_ERR_GENERIC,
    Z_SAMPLE_KIND_DELETE, Z_SAMPLE_KIND_PUT,
};

use self::fabric::{
    attachment_buf, deliver_liveliness, deliver_sample, payload_buf, Delivery, Gate,
    HandleTable, ListenerRecord, NativeBuf, PublisherDefaults, PublisherRecord,
    QueryableRecord, RawContext, RoutedSample, SessionRecord, Stats, TokenRecord, Worker,
};
use super::NativeApi;
use crate::buffer::{NativeSlice, NativeStr};
use crate::options::{CongestionControl, Encoding, Priority};

/// Operation whose next calls can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    /// `open_session*` returns NULL.
    Open,
    /// Every `declare_*` returns NULL.
    Declare,
    /// `put` / `publisher_put` return an error status.
    Put,
    /// `delete` / `publisher_delete` return an error status.
    Delete,
    /// `get` / `liveliness_get` return an error status (no completion).
    Get,
    /// `query_reply` returns an error status.
    Reply,
    /// `scout` returns an error status.
    Scout,
}

/// Accounting snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopbackStats {
    /// Callback buffers allocated / freed by the engine.
    pub buffers_allocated: u64,
    pub buffers_freed: u64,
    /// Strings returned by `session_info` / released through `free_string`.
    pub strings_allocated: u64,
    pub strings_freed: u64,
    /// Handles handed out and not released yet.
    pub live_handles: u64,
    /// Releases of handles the engine does not know (double undeclare).
    pub invalid_releases: u64,
    /// Callback invocations.
    pub callbacks: u64,
    /// Calls made into the engine through its C entry points.
    pub native_calls: u64,
}

impl LoopbackStats {
    pub fn buffers_outstanding(&self) -> u64 {
        self.buffers_allocated.saturating_sub(self.buffers_freed)
    }

    pub fn strings_outstanding(&self) -> u64 {
        self.strings_allocated.saturating_sub(self.strings_freed)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Timing {
    open_delay: Duration,
    reply_delay: Duration,
    completion_delay: Duration,
}

fn pause(delay: Duration) {
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}

/// # Safety
/// `ptr` is NULL or points to `len` readable bytes.
unsafe fn read_payload(ptr: *const u8, len: usize) -> Option<Vec<u8>> {
    let slice = NativeSlice::from_raw(ptr, len);
    if slice.is_none() {
        warn!("loopback: NULL payload with length {}", len);
    }
    slice.map(|s| s.to_payload().into_vec())
}

/// # Safety
/// `ptr` is NULL or a NUL-terminated string.
unsafe fn read_str(ptr: *const c_char) -> Option<String> {
    NativeStr::from_raw(ptr)?.to_owned_string().ok()
}

/// # Safety
/// `ptr` is NULL or valid for `len` bytes.
unsafe fn read_optional(ptr: *const u8, len: usize) -> Option<Vec<u8>> {
    NativeSlice::optional(ptr, len).map(|s| s.to_payload().into_vec())
}

/// # Safety
/// `schema` is NULL or a NUL-terminated string.
unsafe fn encoding_string(id: ZEncodingId, schema: *const c_char) -> String {
    let schema = read_str(schema);
    Encoding::from_raw(id, schema.as_deref()).as_mime().to_string()
}

fn session_defaults() -> PublisherDefaults {
    PublisherDefaults {
        priority: Priority::default().to_raw() as c_int,
        congestion_control: CongestionControl::default().to_raw() as c_int,
        encoding: Encoding::default().as_mime().to_string(),
    }
}

/// Reply context handed to queryable callbacks as `*const ZQuery`.
struct PendingReplies {
    key: String,
    replies: Mutex<Vec<RoutedReply>>,
    open: AtomicBool,
}

struct RoutedReply {
    key: String,
    payload: Vec<u8>,
    encoding: String,
    attachment: Option<Vec<u8>>,
}

impl PendingReplies {
    fn new(key: String) -> Self {
        Self {
            key,
            replies: Mutex::new(Vec::new()),
            open: AtomicBool::new(true),
        }
    }

    fn push(&self, reply: RoutedReply) -> c_int {
        if !self.open.load(Ordering::Acquire) {
            warn!("loopback: reply after the query callback returned");
            return Z_ERR_GENERIC;
        }
        if !keymatch::intersects(&self.key, &reply.key) {
            warn!(
                "loopback: reply key '{}' does not match query '{}'",
                reply.key, self.key
            );
            return Z_ERR_GENERIC;
        }
        self.replies.lock().push(reply);
        0
    }

    fn close(self) -> Vec<RoutedReply> {
        self.open.store(false, Ordering::Release);
        self.replies.into_inner()
    }
}

struct QueryJob {
    key: String,
    parameters: String,
    payload: Vec<u8>,
    attachment: Option<Vec<u8>>,
    queryables: Vec<Arc<QueryableRecord>>,
    on_reply: ZReplyCallback,
    complete: ZCompleteCallback,
    context: RawContext,
}

struct LivelinessQueryJob {
    keys: Vec<String>,
    callback: ZLivelinessCallback,
    complete: ZCompleteCallback,
    context: RawContext,
}

struct Fabric {
    stats: Stats,
    sessions: HandleTable<SessionRecord>,
    publishers: HandleTable<PublisherRecord>,
    subscribers: HandleTable<ListenerRecord>,
    queryables: HandleTable<QueryableRecord>,
    tokens: HandleTable<TokenRecord>,
    worker: Option<Worker>,
    faults: Mutex<HashMap<FaultPoint, u32>>,
    timing: Mutex<Timing>,
    next_session: AtomicU64,
    clock: AtomicU64,
    hasher: RandomState,
}

impl Fabric {
    fn new() -> Self {
        let worker = match Worker::spawn() {
            Ok(worker) => Some(worker),
            Err(e) => {
                warn!("loopback: no delivery thread ({}), delivering inline", e);
                None
            }
        };
        Self {
            stats: Stats::default(),
            sessions: HandleTable::default(),
            publishers: HandleTable::default(),
            subscribers: HandleTable::default(),
            queryables: HandleTable::default(),
            tokens: HandleTable::default(),
            worker,
            faults: Mutex::new(HashMap::new()),
            timing: Mutex::new(Timing::default()),
            next_session: AtomicU64::new(1),
            clock: AtomicU64::new(1),
            hasher: RandomState::new(),
        }
    }

    fn trip(&self, point: FaultPoint) -> bool {
        let mut faults = self.faults.lock();
        match faults.get_mut(&point) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                debug!("loopback: injected {:?} failure", point);
                true
            }
            _ => false,
        }
    }

    fn timing(&self) -> Timing {
        *self.timing.lock()
    }

    fn session(&self, raw: *mut ZSession) -> Option<Arc<SessionRecord>> {
        let record = self.sessions.get(raw);
        if record.is_none() {
            error!("loopback: unknown session handle {:p}", raw);
        }
        record
    }

    fn new_zid(&self, id: u64) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos());
        let hi = self.hasher.hash_one((id, nanos));
        let lo = self.hasher.hash_one((nanos, id, hi));
        format!(
            "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            hi >> 32,
            (hi >> 16) & 0xffff,
            hi & 0xffff,
            lo >> 48,
            lo & 0xffff_ffff_ffff
        )
    }

    fn open(&self, mode: &str) -> *mut ZSession {
        if !matches!(mode, "peer" | "client" | "router") {
            warn!("loopback: unknown mode '{}'", mode);
            return ptr::null_mut();
        }
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let zid = self.new_zid(id);
        debug!("loopback: session {} opened ({} mode)", zid, mode);
        self.sessions.insert(
            SessionRecord {
                id,
                zid,
                mode: mode.to_string(),
            },
            &self.stats,
        )
    }

    /// Run `job` on the delivery thread, after everything already queued.
    fn enqueue(self: &Arc<Self>, job: impl FnOnce(&Fabric) + Send + 'static) {
        match &self.worker {
            Some(worker) => {
                let fabric = Arc::clone(self);
                worker.submit(move || job(&fabric));
            }
            None => job(&**self),
        }
    }

    fn route_sample(self: &Arc<Self>, sample: RoutedSample) {
        let listeners: Vec<_> = self
            .subscribers
            .snapshot()
            .into_iter()
            .filter(|l| {
                matches!(l.delivery, Delivery::Sample(_)) && keymatch::intersects(&l.key, &sample.key)
            })
            .collect();
        trace!(
            "loopback: {} ({} bytes) -> {} subscriber(s)",
            sample.key,
            sample.payload.len(),
            listeners.len()
        );
        if listeners.is_empty() {
            return;
        }
        self.enqueue(move |fabric| {
            for listener in &listeners {
                deliver_sample(listener, &sample, &fabric.stats);
            }
        });
    }

    fn route_liveliness(self: &Arc<Self>, key: String, alive: bool) {
        let listeners: Vec<_> = self
            .subscribers
            .snapshot()
            .into_iter()
            .filter(|l| {
                matches!(l.delivery, Delivery::Liveliness(_)) && keymatch::intersects(&l.key, &key)
            })
            .collect();
        if listeners.is_empty() {
            return;
        }
        self.enqueue(move |fabric| {
            for listener in &listeners {
                deliver_liveliness(listener, &key, alive, &fabric.stats);
            }
        });
    }

    fn sample(&self, key: String, payload: Vec<u8>, kind: c_int, fields: PutFields) -> RoutedSample {
        RoutedSample {
            key,
            payload,
            kind,
            priority: fields.priority,
            congestion_control: fields.congestion_control,
            encoding: fields.encoding,
            attachment: fields.attachment,
            timestamp: self.clock.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn run_query(&self, job: QueryJob) {
        let timing = self.timing();
        let mut replies = Vec::new();
        for queryable in &job.queryables {
            queryable.gate.enter(|| {
                let (Some(key), Some(parameters)) = (
                    NativeBuf::c_str(&job.key, &self.stats),
                    NativeBuf::c_str(&job.parameters, &self.stats),
                ) else {
                    return;
                };
                let (_payload, payload_ptr, payload_len) = payload_buf(&job.payload, &self.stats);
                let (_attachment, att_ptr, att_len) =
                    attachment_buf(job.attachment.as_deref(), &self.stats);
                let pending = PendingReplies::new(job.key.clone());
                Stats::bump(&self.stats.callbacks);
                // SAFETY: buffers and `pending` outlive the callback.
                unsafe {
                    (queryable.callback)(
                        key.as_c_ptr(),
                        parameters.as_c_ptr(),
                        payload_ptr,
                        payload_len,
                        att_ptr,
                        att_len,
                        (&pending as *const PendingReplies).cast::<ZQuery>(),
                        queryable.context.0,
                    )
                };
                replies.extend(pending.close());
            });
        }

        for reply in replies {
            pause(timing.reply_delay);
            let (Some(key), Some(encoding)) = (
                NativeBuf::c_str(&reply.key, &self.stats),
                NativeBuf::c_str(&reply.encoding, &self.stats),
            ) else {
                continue;
            };
            let (_payload, payload_ptr, payload_len) = payload_buf(&reply.payload, &self.stats);
            let (_attachment, att_ptr, att_len) =
                attachment_buf(reply.attachment.as_deref(), &self.stats);
            Stats::bump(&self.stats.callbacks);
            // SAFETY: buffers live until the end of this iteration.
            unsafe {
                (job.on_reply)(
                    key.as_c_ptr(),
                    payload_ptr,
                    payload_len,
                    Z_SAMPLE_KIND_PUT,
                    encoding.as_c_ptr(),
                    att_ptr,
                    att_len,
                    job.context.0,
                )
            };
        }

        pause(timing.completion_delay);
        Stats::bump(&self.stats.callbacks);
        // SAFETY: fired exactly once, after the last reply.
        unsafe { (job.complete)(job.context.0) };
    }

    fn run_liveliness_query(&self, job: LivelinessQueryJob) {
        let timing = self.timing();
        for key in &job.keys {
            pause(timing.reply_delay);
            let Some(key) = NativeBuf::c_str(key, &self.stats) else {
                continue;
            };
            Stats::bump(&self.stats.callbacks);
            // SAFETY: key lives until the end of this iteration.
            unsafe { (job.callback)(key.as_c_ptr(), 1, job.context.0) };
        }
        pause(timing.completion_delay);
        Stats::bump(&self.stats.callbacks);
        // SAFETY: fired exactly once, after the last reply.
        unsafe { (job.complete)(job.context.0) };
    }

    fn matching_tokens(&self, key: &str) -> Vec<String> {
        self.tokens
            .snapshot()
            .into_iter()
            .filter(|t| keymatch::intersects(key, &t.key))
            .map(|t| t.key.clone())
            .collect()
    }

    fn spawn_query(self: &Arc<Self>, name: &str, run: impl FnOnce(&Fabric) + Send + 'static) -> c_int {
        let fabric = Arc::clone(self);
        match thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(&fabric))
        {
            Ok(_) => 0,
            Err(e) => {
                error!("loopback: cannot start query thread: {}", e);
                Z_ERR_GENERIC
            }
        }
    }
}

struct PutFields {
    priority: c_int,
    congestion_control: c_int,
    encoding: String,
    attachment: Option<Vec<u8>>,
}

impl PutFields {
    /// # Safety
    /// `options` is NULL or a valid `ZPutOptions` whose pointers are live.
    unsafe fn resolve(options: *const ZPutOptions, defaults: &PublisherDefaults) -> Self {
        match options.as_ref() {
            None => Self {
                priority: defaults.priority,
                congestion_control: defaults.congestion_control,
                encoding: defaults.encoding.clone(),
                attachment: None,
            },
            Some(o) => Self {
                priority: o.priority as c_int,
                congestion_control: o.congestion_control as c_int,
                encoding: encoding_string(o.encoding, o.encoding_schema),
                attachment: read_optional(o.attachment, o.attachment_len),
            },
        }
    }

    fn defaults(defaults: &PublisherDefaults) -> Self {
        Self {
            priority: defaults.priority,
            congestion_control: defaults.congestion_control,
            encoding: defaults.encoding.clone(),
            attachment: None,
        }
    }
}

/// In-process engine. Clones share the same fabric.
#[derive(Clone)]
pub struct LoopbackEngine {
    fabric: Arc<Fabric>,
}

impl Default for LoopbackEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self {
            fabric: Arc::new(Fabric::new()),
        }
    }

    /// Make the next `times` calls at `point` fail.
    pub fn fail_next(&self, point: FaultPoint, times: u32) {
        *self.fabric.faults.lock().entry(point).or_insert(0) += times;
    }

    pub fn clear_faults(&self) {
        self.fabric.faults.lock().clear();
    }

    /// Delay every session open (the call blocks).
    pub fn set_open_delay(&self, delay: Duration) {
        self.fabric.timing.lock().open_delay = delay;
    }

    /// Delay before each query reply is delivered.
    pub fn set_reply_delay(&self, delay: Duration) {
        self.fabric.timing.lock().reply_delay = delay;
    }

    /// Delay between the last reply and the completion callback.
    pub fn set_completion_delay(&self, delay: Duration) {
        self.fabric.timing.lock().completion_delay = delay;
    }

    /// Block until every sample and liveliness event published so far has
    /// been delivered.
    pub fn flush(&self) {
        if let Some(worker) = &self.fabric.worker {
            worker.flush();
        }
    }

    pub fn open_sessions(&self) -> usize {
        self.fabric.sessions.snapshot().len()
    }

    pub fn stats(&self) -> LoopbackStats {
        let s = &self.fabric.stats;
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        LoopbackStats {
            buffers_allocated: load(&s.buffers_allocated),
            buffers_freed: load(&s.buffers_freed),
            strings_allocated: load(&s.strings_allocated),
            strings_freed: load(&s.strings_freed),
            live_handles: load(&s.handles_allocated).saturating_sub(load(&s.handles_released)),
            invalid_releases: load(&s.invalid_releases),
            callbacks: load(&s.callbacks),
            native_calls: load(&s.native_calls),
        }
    }

    fn enter(&self) -> &Arc<Fabric> {
        Stats::bump(&self.fabric.stats.native_calls);
        &self.fabric
    }
}

impl std::fmt::Debug for LoopbackEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackEngine")
            .field("stats", &self.stats())
            .finish()
    }
}

impl NativeApi for LoopbackEngine {
    fn name(&self) -> &'static str {
        "loopback"
    }

    unsafe fn init_logger(&self) -> c_int {
        self.enter();
        0
    }

    unsafe fn open_session(&self, mode: *const c_char, endpoints: *const c_char) -> *mut ZSession {
        let fabric = self.enter();
        pause(fabric.timing().open_delay);
        if fabric.trip(FaultPoint::Open) {
            return ptr::null_mut();
        }
        let Some(mode) = read_str(mode).and_then(|m| serde_json::from_str::<String>(&m).ok())
        else {
            warn!("loopback: mode is not a JSON string");
            return ptr::null_mut();
        };
        if let Some(endpoints) = read_str(endpoints) {
            match serde_json::from_str::<Vec<String>>(&endpoints) {
                Ok(list) => trace!("loopback: ignoring {} endpoint(s)", list.len()),
                Err(e) => {
                    warn!("loopback: malformed endpoints: {}", e);
                    return ptr::null_mut();
                }
            }
        }
        fabric.open(&mode)
    }

    unsafe fn open_session_with_config(&self, config: *const c_char) -> *mut ZSession {
        let fabric = self.enter();
        pause(fabric.timing().open_delay);
        if fabric.trip(FaultPoint::Open) {
            return ptr::null_mut();
        }
        let parsed = read_str(config).map(|c| serde_json::from_str::<serde_json::Value>(&c));
        match parsed {
            Some(Ok(value)) => {
                let mode = value.get("mode").and_then(|m| m.as_str()).unwrap_or("peer");
                fabric.open(mode)
            }
            Some(Err(e)) => {
                warn!("loopback: config is not JSON: {}", e);
                ptr::null_mut()
            }
            None => ptr::null_mut(),
        }
    }

    unsafe fn close_session(&self, session: *mut ZSession) {
        let fabric = self.enter();
        let Some(record) = fabric.sessions.remove(session, "session", &fabric.stats) else {
            return;
        };
        let leftover = fabric
            .publishers
            .snapshot()
            .iter()
            .filter(|p| p.session == record.id)
            .count()
            + fabric
                .subscribers
                .snapshot()
                .iter()
                .filter(|s| s.session == record.id)
                .count()
            + fabric
                .queryables
                .snapshot()
                .iter()
                .filter(|q| q.session == record.id)
                .count()
            + fabric
                .tokens
                .snapshot()
                .iter()
                .filter(|t| t.session == record.id)
                .count();
        if leftover > 0 {
            warn!(
                "loopback: session {} closed with {} live resource(s)",
                record.zid, leftover
            );
        }
        debug!("loopback: session {} closed", record.zid);
    }

    unsafe fn session_info(&self, session: *mut ZSession) -> *mut c_char {
        let fabric = self.enter();
        let Some(record) = fabric.session(session) else {
            return ptr::null_mut();
        };
        let bytes = record.zid.as_bytes();
        let out = libc::malloc(bytes.len() + 1).cast::<u8>();
        if out.is_null() {
            return ptr::null_mut();
        }
        ptr::copy_nonoverlapping(bytes.as_ptr(), out, bytes.len());
        *out.add(bytes.len()) = 0;
        Stats::bump(&fabric.stats.strings_allocated);
        out.cast()
    }

    unsafe fn free_string(&self, s: *mut c_char) {
        let fabric = self.enter();
        if s.is_null() {
            return;
        }
        libc::free(s.cast());
        Stats::bump(&fabric.stats.strings_freed);
    }

    unsafe fn declare_publisher(
        &self,
        session: *mut ZSession,
        key: *const c_char,
        options: *const ZPublisherOptions,
    ) -> *mut ZPublisher {
        let fabric = self.enter();
        if fabric.trip(FaultPoint::Declare) {
            return ptr::null_mut();
        }
        let (Some(record), Some(key)) = (fabric.session(session), read_str(key)) else {
            return ptr::null_mut();
        };
        let defaults = match options.as_ref() {
            Some(o) => PublisherDefaults {
                priority: o.priority as c_int,
                congestion_control: o.congestion_control as c_int,
                encoding: encoding_string(o.encoding, o.encoding_schema),
            },
            None => session_defaults(),
        };
        fabric.publishers.insert(
            PublisherRecord {
                session: record.id,
                key,
                defaults,
            },
            &fabric.stats,
        )
    }

    unsafe fn publisher_put(
        &self,
        publisher: *mut ZPublisher,
        data: *const u8,
        len: usize,
        options: *const ZPutOptions,
    ) -> c_int {
        let fabric = self.enter();
        if fabric.trip(FaultPoint::Put) {
            return Z_ERR_GENERIC;
        }
        let Some(record) = fabric.publishers.get(publisher) else {
            error!("loopback: put on unknown publisher {:p}", publisher);
            return Z_ERR_GENERIC;
        };
        let Some(payload) = read_payload(data, len) else {
            return Z_ERR_GENERIC;
        };
        let fields = PutFields::resolve(options, &record.defaults);
        fabric.route_sample(fabric.sample(record.key.clone(), payload, Z_SAMPLE_KIND_PUT, fields));
        0
    }

    unsafe fn publisher_delete(&self, publisher: *mut ZPublisher) -> c_int {
        let fabric = self.enter();
        if fabric.trip(FaultPoint::Delete) {
            return Z_ERR_GENERIC;
        }
        let Some(record) = fabric.publishers.get(publisher) else {
            error!("loopback: delete on unknown publisher {:p}", publisher);
            return Z_ERR_GENERIC;
        };
        let fields = PutFields::defaults(&record.defaults);
        fabric.route_sample(fabric.sample(
            record.key.clone(),
            Vec::new(),
            Z_SAMPLE_KIND_DELETE,
            fields,
        ));
        0
    }

    unsafe fn undeclare_publisher(&self, publisher: *mut ZPublisher) {
        let fabric = self.enter();
        fabric.publishers.remove(publisher, "publisher", &fabric.stats);
    }

    unsafe fn declare_subscriber(
        &self,
        session: *mut ZSession,
        key: *const c_char,
        callback: ZSampleCallback,
        context: *mut c_void,
    ) -> *mut ZSubscriber {
        let fabric = self.enter();
        if fabric.trip(FaultPoint::Declare) {
            return ptr::null_mut();
        }
        let (Some(record), Some(key)) = (fabric.session(session), read_str(key)) else {
            return ptr::null_mut();
        };
        fabric.subscribers.insert(
            ListenerRecord {
                session: record.id,
                key,
                delivery: Delivery::Sample(callback),
                context: RawContext(context),
                gate: Gate::default(),
            },
            &fabric.stats,
        )
    }

    unsafe fn undeclare_subscriber(&self, subscriber: *mut ZSubscriber) {
        let fabric = self.enter();
        if let Some(record) = fabric.subscribers.remove(subscriber, "subscriber", &fabric.stats) {
            record.gate.close();
        }
    }

    unsafe fn declare_queryable(
        &self,
        session: *mut ZSession,
        key: *const c_char,
        callback: ZQueryCallback,
        context: *mut c_void,
    ) -> *mut ZQueryable {
        let fabric = self.enter();
        if fabric.trip(FaultPoint::Declare) {
            return ptr::null_mut();
        }
        let (Some(record), Some(key)) = (fabric.session(session), read_str(key)) else {
            return ptr::null_mut();
        };
        fabric.queryables.insert(
            QueryableRecord {
                session: record.id,
                key,
                callback,
                context: RawContext(context),
                gate: Gate::default(),
            },
            &fabric.stats,
        )
    }

    unsafe fn undeclare_queryable(&self, queryable: *mut ZQueryable) {
        let fabric = self.enter();
        if let Some(record) = fabric.queryables.remove(queryable, "queryable", &fabric.stats) {
            record.gate.close();
        }
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
        let Some(pending) = reply_context.cast::<PendingReplies>().as_ref() else {
            return Z_ERR_GENERIC;
        };
        if self.enter().trip(FaultPoint::Reply) {
            return Z_ERR_GENERIC;
        }
        let (Some(key), Some(payload)) = (read_str(key), read_payload(data, len)) else {
            return Z_ERR_GENERIC;
        };
        pending.push(RoutedReply {
            key,
            payload,
            encoding: Encoding::from_raw(encoding, None).as_mime().to_string(),
            attachment: read_optional(attachment, attachment_len),
        })
    }

    unsafe fn put(
        &self,
        session: *mut ZSession,
        key: *const c_char,
        data: *const u8,
        len: usize,
        options: *const ZPutOptions,
    ) -> c_int {
        let fabric = self.enter();
        if fabric.trip(FaultPoint::Put) {
            return Z_ERR_GENERIC;
        }
        let (Some(_), Some(key)) = (fabric.session(session), read_str(key)) else {
            return Z_ERR_GENERIC;
        };
        let Some(payload) = read_payload(data, len) else {
            return Z_ERR_GENERIC;
        };
        let fields = PutFields::resolve(options, &session_defaults());
        fabric.route_sample(fabric.sample(key, payload, Z_SAMPLE_KIND_PUT, fields));
        0
    }

    unsafe fn delete(&self, session: *mut ZSession, key: *const c_char) -> c_int {
        let fabric = self.enter();
        if fabric.trip(FaultPoint::Delete) {
            return Z_ERR_GENERIC;
        }
        let (Some(_), Some(key)) = (fabric.session(session), read_str(key)) else {
            return Z_ERR_GENERIC;
        };
        let fields = PutFields::defaults(&session_defaults());
        fabric.route_sample(fabric.sample(key, Vec::new(), Z_SAMPLE_KIND_DELETE, fields));
        0
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
        let fabric = self.enter();
        if fabric.trip(FaultPoint::Get) {
            return Z_ERR_GENERIC;
        }
        let (Some(_), Some(selector)) = (fabric.session(session), read_str(selector)) else {
            return Z_ERR_GENERIC;
        };
        let (key, parameters) = selector.split_once('?').unwrap_or((selector.as_str(), ""));
        let (payload, attachment) = match options.as_ref() {
            Some(o) => (
                read_optional(o.payload, o.payload_len).unwrap_or_default(),
                read_optional(o.attachment, o.attachment_len),
            ),
            None => (Vec::new(), None),
        };
        let queryables: Vec<_> = fabric
            .queryables
            .snapshot()
            .into_iter()
            .filter(|q| keymatch::intersects(key, &q.key))
            .collect();
        trace!("loopback: get {} -> {} queryable(s)", selector, queryables.len());

        let job = QueryJob {
            key: key.to_string(),
            parameters: parameters.to_string(),
            payload,
            attachment,
            queryables,
            on_reply: callback,
            complete,
            context: RawContext(context),
        };
        fabric.spawn_query("zbridge-loopback-get", move |fabric| fabric.run_query(job))
    }

    unsafe fn declare_liveliness_token(
        &self,
        session: *mut ZSession,
        key: *const c_char,
    ) -> *mut ZLivelinessToken {
        let fabric = self.enter();
        if fabric.trip(FaultPoint::Declare) {
            return ptr::null_mut();
        }
        let (Some(record), Some(key)) = (fabric.session(session), read_str(key)) else {
            return ptr::null_mut();
        };
        let token = fabric.tokens.insert(
            TokenRecord {
                session: record.id,
                key: key.clone(),
            },
            &fabric.stats,
        );
        fabric.route_liveliness(key, true);
        token
    }

    unsafe fn undeclare_liveliness_token(&self, token: *mut ZLivelinessToken) {
        let fabric = self.enter();
        if let Some(record) = fabric.tokens.remove(token, "liveliness token", &fabric.stats) {
            fabric.route_liveliness(record.key.clone(), false);
        }
    }

    unsafe fn declare_liveliness_subscriber(
        &self,
        session: *mut ZSession,
        key: *const c_char,
        callback: ZLivelinessCallback,
        context: *mut c_void,
        history: bool,
    ) -> *mut ZSubscriber {
        let fabric = self.enter();
        if fabric.trip(FaultPoint::Declare) {
            return ptr::null_mut();
        }
        let (Some(record), Some(key)) = (fabric.session(session), read_str(key)) else {
            return ptr::null_mut();
        };
        let current = if history {
            fabric.matching_tokens(&key)
        } else {
            Vec::new()
        };
        let raw: *mut ZSubscriber = fabric.subscribers.insert(
            ListenerRecord {
                session: record.id,
                key,
                delivery: Delivery::Liveliness(callback),
                context: RawContext(context),
                gate: Gate::default(),
            },
            &fabric.stats,
        );
        if let Some(listener) = fabric.subscribers.get(raw).filter(|_| !current.is_empty()) {
            fabric.enqueue(move |fabric| {
                for key in &current {
                    deliver_liveliness(&listener, key, true, &fabric.stats);
                }
            });
        }
        raw
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
        let fabric = self.enter();
        if fabric.trip(FaultPoint::Get) {
            return Z_ERR_GENERIC;
        }
        let (Some(_), Some(key)) = (fabric.session(session), read_str(key)) else {
            return Z_ERR_GENERIC;
        };
        let job = LivelinessQueryJob {
            keys: fabric.matching_tokens(&key),
            callback,
            complete,
            context: RawContext(context),
        };
        trace!(
            "loopback: liveliness get {} -> {} token(s), timeout {} ms",
            key,
            job.keys.len(),
            timeout_ms
        );
        fabric.spawn_query("zbridge-loopback-liveliness", move |fabric| {
            fabric.run_liveliness_query(job)
        })
    }

    unsafe fn scout(
        &self,
        what: *const c_char,
        _config: *const c_char,
        callback: ZScoutCallback,
        context: *mut c_void,
        timeout_ms: u64,
    ) -> c_int {
        let fabric = self.enter();
        if fabric.trip(FaultPoint::Scout) {
            return Z_ERR_GENERIC;
        }
        let Some(what) = read_str(what) else {
            return Z_ERR_GENERIC;
        };
        let wanted: HashSet<&str> = what.split('|').map(str::trim).collect();
        let mut found = 0usize;
        for session in fabric.sessions.snapshot() {
            if !wanted.contains(session.mode.as_str()) {
                continue;
            }
            let hello = serde_json::json!({
                "event": "peer_discovered",
                "whatami": session.mode,
                "zid": session.zid,
            })
            .to_string();
            let Some(info) = NativeBuf::c_str(&hello, &fabric.stats) else {
                continue;
            };
            Stats::bump(&fabric.stats.callbacks);
            callback(info.as_c_ptr(), context);
            found += 1;
        }
        trace!("loopback: scout '{}' found {} node(s) within {} ms", what, found, timeout_ms);
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::{CStr, CString};

    fn open(engine: &LoopbackEngine, mode: &str) -> *mut ZSession {
        let mode = CString::new(format!("\"{}\"", mode)).unwrap();
        unsafe { engine.open_session(mode.as_ptr(), ptr::null()) }
    }

    #[test]
    fn open_rejects_unknown_mode_and_bad_endpoints() {
        let engine = LoopbackEngine::new();
        assert!(open(&engine, "mesh").is_null());
        let mode = CString::new("\"peer\"").unwrap();
        let endpoints = CString::new("tcp/not-json").unwrap();
        assert!(unsafe { engine.open_session(mode.as_ptr(), endpoints.as_ptr()) }.is_null());
        assert_eq!(engine.open_sessions(), 0);
    }

    #[test]
    fn injected_open_failures_are_consumed() {
        let engine = LoopbackEngine::new();
        engine.fail_next(FaultPoint::Open, 1);
        assert!(open(&engine, "peer").is_null());
        let session = open(&engine, "peer");
        assert!(!session.is_null());
        unsafe { engine.close_session(session) };
        assert_eq!(engine.stats().live_handles, 0);
    }

    #[test]
    fn config_open_reads_mode() {
        let engine = LoopbackEngine::new();
        let config = CString::new(r#"{"mode":"router"}"#).unwrap();
        let session = unsafe { engine.open_session_with_config(config.as_ptr()) };
        assert!(!session.is_null());
        let bad = CString::new("{mode: router").unwrap();
        assert!(unsafe { engine.open_session_with_config(bad.as_ptr()) }.is_null());
        unsafe { engine.close_session(session) };
    }

    #[test]
    fn session_info_string_is_accounted() {
        let engine = LoopbackEngine::new();
        let session = open(&engine, "client");
        unsafe {
            let info = engine.session_info(session);
            let zid = CStr::from_ptr(info).to_str().unwrap().to_string();
            assert_eq!(zid.len(), 36);
            assert_eq!(zid.matches('-').count(), 4);
            engine.free_string(info);
            engine.close_session(session);
        }
        let stats = engine.stats();
        assert_eq!(stats.strings_allocated, 1);
        assert_eq!(stats.strings_outstanding(), 0);
    }

    #[test]
    fn double_close_is_counted_not_freed() {
        let engine = LoopbackEngine::new();
        let session = open(&engine, "peer");
        unsafe {
            engine.close_session(session);
            engine.close_session(session);
        }
        assert_eq!(engine.stats().invalid_releases, 1);
    }

    #[test]
    fn reply_outside_callback_is_rejected() {
        let pending = PendingReplies::new("a/*".into());
        let ok = RoutedReply {
            key: "a/b".into(),
            payload: vec![1],
            encoding: "zenoh/bytes".into(),
            attachment: None,
        };
        assert_eq!(pending.push(ok), 0);
        let mismatched = RoutedReply {
            key: "c/d".into(),
            payload: Vec::new(),
            encoding: "zenoh/bytes".into(),
            attachment: None,
        };
        assert_eq!(pending.push(mismatched), Z_ERR_GENERIC);
        assert_eq!(pending.close().len(), 1);
    }

    #[test]
    fn stats_outstanding_saturates() {
        let stats = LoopbackStats {
            buffers_allocated: 1,
            buffers_freed: 3,
            ..LoopbackStats::default()
        };
        assert_eq!(stats.buffers_outstanding(), 0);
    }
}
