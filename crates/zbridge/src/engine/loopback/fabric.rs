// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Loopback engine internals: handle tables, callback gates, engine-owned
//! buffers and the delivery worker.

use std::os::raw::{c_char, c_int, c_void};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam::channel::{self, Sender};
use dashmap::DashMap;
use log::{error, trace};
use parking_lot::ReentrantMutex;
use zbridge_sys::{ZLivelinessCallback, ZQueryCallback, ZSampleCallback};

// =============================================================================
// Accounting
// =============================================================================

#[derive(Default)]
pub(super) struct Stats {
    pub(super) buffers_allocated: AtomicU64,
    pub(super) buffers_freed: AtomicU64,
    pub(super) strings_allocated: AtomicU64,
    pub(super) strings_freed: AtomicU64,
    pub(super) handles_allocated: AtomicU64,
    pub(super) handles_released: AtomicU64,
    pub(super) invalid_releases: AtomicU64,
    pub(super) callbacks: AtomicU64,
    pub(super) native_calls: AtomicU64,
}

impl Stats {
    pub(super) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

// =============================================================================
// Engine-owned callback buffers
// =============================================================================

/// A `malloc`ed buffer handed to a callback and freed when dropped.
pub(super) struct NativeBuf<'s> {
    ptr: *mut u8,
    len: usize,
    stats: &'s Stats,
}

impl<'s> NativeBuf<'s> {
    /// Copy `bytes` into a fresh allocation (at least one byte, so the
    /// pointer is never NULL).
    pub(super) fn bytes(bytes: &[u8], stats: &'s Stats) -> Option<Self> {
        // SAFETY: plain allocation, checked for NULL below.
        let ptr = unsafe { libc::malloc(bytes.len().max(1)) }.cast::<u8>();
        if ptr.is_null() {
            error!("loopback: out of memory for {} byte callback buffer", bytes.len());
            return None;
        }
        // SAFETY: ptr has room for bytes.len() bytes and does not overlap.
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len()) };
        Stats::bump(&stats.buffers_allocated);
        Some(Self {
            ptr,
            len: bytes.len(),
            stats,
        })
    }

    /// NUL-terminated copy of `s`.
    pub(super) fn c_str(s: &str, stats: &'s Stats) -> Option<Self> {
        let mut bytes = Vec::with_capacity(s.len() + 1);
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
        Self::bytes(&bytes, stats).map(|mut buf| {
            buf.len = s.len();
            buf
        })
    }

    pub(super) fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    pub(super) fn as_c_ptr(&self) -> *const c_char {
        self.ptr.cast()
    }

    pub(super) fn len(&self) -> usize {
        self.len
    }
}

impl Drop for NativeBuf<'_> {
    fn drop(&mut self) {
        // SAFETY: allocated with malloc in `bytes`, freed once.
        unsafe { libc::free(self.ptr.cast()) };
        Stats::bump(&self.stats.buffers_freed);
    }
}

/// Optional payload: NULL/0 when empty.
pub(super) fn payload_buf<'s>(bytes: &[u8], stats: &'s Stats) -> (Option<NativeBuf<'s>>, *const u8, usize) {
    if bytes.is_empty() {
        return (None, ptr::null(), 0);
    }
    match NativeBuf::bytes(bytes, stats) {
        Some(buf) => {
            let (p, l) = (buf.as_ptr(), buf.len());
            (Some(buf), p, l)
        }
        None => (None, ptr::null(), 0),
    }
}

/// Optional attachment: NULL when absent, non-NULL (possibly empty) otherwise.
pub(super) fn attachment_buf<'s>(
    bytes: Option<&[u8]>,
    stats: &'s Stats,
) -> (Option<NativeBuf<'s>>, *const u8, usize) {
    match bytes.and_then(|b| NativeBuf::bytes(b, stats)) {
        Some(buf) => {
            let (p, l) = (buf.as_ptr(), buf.len());
            (Some(buf), p, l)
        }
        None => (None, ptr::null(), 0),
    }
}

// =============================================================================
// Handle tables
// =============================================================================

/// Maps opaque handles (boxed ids) to engine records.
pub(super) struct HandleTable<R> {
    records: DashMap<usize, Arc<R>>,
    next_id: AtomicU64,
}

impl<R> Default for HandleTable<R> {
    fn default() -> Self {
        Self {
            records: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<R> HandleTable<R> {
    pub(super) fn insert<T>(&self, record: R, stats: &Stats) -> *mut T {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let raw = Box::into_raw(Box::new(id));
        self.records.insert(raw as usize, Arc::new(record));
        Stats::bump(&stats.handles_allocated);
        raw.cast()
    }

    pub(super) fn get<T>(&self, raw: *mut T) -> Option<Arc<R>> {
        self.records.get(&(raw as usize)).map(|r| Arc::clone(r.value()))
    }

    /// Forget the handle and free its allocation. Unknown handles are
    /// counted, never freed.
    pub(super) fn remove<T>(&self, raw: *mut T, what: &str, stats: &Stats) -> Option<Arc<R>> {
        match self.records.remove(&(raw as usize)) {
            Some((_, record)) => {
                // SAFETY: `raw` was produced by `insert` and was still registered.
                unsafe { drop(Box::from_raw(raw.cast::<u64>())) };
                Stats::bump(&stats.handles_released);
                Some(record)
            }
            None => {
                error!("loopback: release of unknown {} handle", what);
                Stats::bump(&stats.invalid_releases);
                None
            }
        }
    }

    pub(super) fn snapshot(&self) -> Vec<Arc<R>> {
        self.records.iter().map(|r| Arc::clone(r.value())).collect()
    }
}

// =============================================================================
// Callback gating
// =============================================================================

/// Serializes callbacks of one resource against its undeclaration.
///
/// Reentrant so a callback may undeclare its own resource.
pub(super) struct Gate {
    active: AtomicBool,
    lock: ReentrantMutex<()>,
}

impl Default for Gate {
    fn default() -> Self {
        Self {
            active: AtomicBool::new(true),
            lock: ReentrantMutex::new(()),
        }
    }
}

impl Gate {
    /// Run `f` unless closed; closing waits for it.
    pub(super) fn enter<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        if !self.active.load(Ordering::Acquire) {
            return None;
        }
        let _held = self.lock.lock();
        if !self.active.load(Ordering::Acquire) {
            return None;
        }
        Some(f())
    }

    /// After this returns no callback is running or will start.
    pub(super) fn close(&self) {
        self.active.store(false, Ordering::Release);
        drop(self.lock.lock());
    }
}

/// Callback context pointer owned by the bridge.
#[derive(Clone, Copy)]
pub(super) struct RawContext(pub(super) *mut c_void);

// SAFETY: the bridge's contexts are Send + Sync and outlive the registration.
unsafe impl Send for RawContext {}
unsafe impl Sync for RawContext {}

// =============================================================================
// Records
// =============================================================================

pub(super) struct SessionRecord {
    pub(super) id: u64,
    pub(super) zid: String,
    pub(super) mode: String,
}

#[derive(Clone)]
pub(super) struct PublisherDefaults {
    pub(super) priority: c_int,
    pub(super) congestion_control: c_int,
    pub(super) encoding: String,
}

pub(super) struct PublisherRecord {
    pub(super) session: u64,
    pub(super) key: String,
    pub(super) defaults: PublisherDefaults,
}

pub(super) enum Delivery {
    Sample(ZSampleCallback),
    Liveliness(ZLivelinessCallback),
}

pub(super) struct ListenerRecord {
    pub(super) session: u64,
    pub(super) key: String,
    pub(super) delivery: Delivery,
    pub(super) context: RawContext,
    pub(super) gate: Gate,
}

pub(super) struct QueryableRecord {
    pub(super) session: u64,
    pub(super) key: String,
    pub(super) callback: ZQueryCallback,
    pub(super) context: RawContext,
    pub(super) gate: Gate,
}

pub(super) struct TokenRecord {
    pub(super) session: u64,
    pub(super) key: String,
}

/// Sample as routed through the fabric (owned copy).
#[derive(Clone)]
pub(super) struct RoutedSample {
    pub(super) key: String,
    pub(super) payload: Vec<u8>,
    pub(super) kind: c_int,
    pub(super) priority: c_int,
    pub(super) congestion_control: c_int,
    pub(super) encoding: String,
    pub(super) attachment: Option<Vec<u8>>,
    pub(super) timestamp: u64,
}

// =============================================================================
// Delivery
// =============================================================================

type Job = Box<dyn FnOnce() + Send>;

/// Single delivery thread: samples and liveliness events leave in FIFO order.
pub(super) struct Worker {
    jobs: Sender<Job>,
}

impl Worker {
    pub(super) fn spawn() -> std::io::Result<Self> {
        let (jobs, rx) = channel::unbounded::<Job>();
        thread::Builder::new()
            .name("zbridge-loopback".into())
            .spawn(move || {
                for job in rx {
                    job();
                }
                trace!("loopback worker stopped");
            })?;
        Ok(Self { jobs })
    }

    pub(super) fn submit(&self, job: impl FnOnce() + Send + 'static) {
        if self.jobs.send(Box::new(job)).is_err() {
            error!("loopback worker is gone, event dropped");
        }
    }

    /// Block until every job submitted so far has run.
    pub(super) fn flush(&self) {
        let (done_tx, done_rx) = channel::bounded::<()>(1);
        self.submit(move || {
            let _ = done_tx.send(());
        });
        let _ = done_rx.recv();
    }
}

/// Invoke a sample callback with engine-owned copies of every field.
pub(super) fn deliver_sample(listener: &ListenerRecord, sample: &RoutedSample, stats: &Stats) {
    let Delivery::Sample(callback) = listener.delivery else {
        return;
    };
    listener.gate.enter(|| {
        let Some(key) = NativeBuf::c_str(&sample.key, stats) else {
            return;
        };
        let Some(encoding) = NativeBuf::c_str(&sample.encoding, stats) else {
            return;
        };
        let (_payload, payload_ptr, payload_len) = payload_buf(&sample.payload, stats);
        let (_attachment, att_ptr, att_len) = attachment_buf(sample.attachment.as_deref(), stats);
        Stats::bump(&stats.callbacks);
        // SAFETY: every buffer lives until the end of this closure.
        unsafe {
            callback(
                key.as_c_ptr(),
                payload_ptr,
                payload_len,
                sample.kind,
                sample.priority,
                sample.congestion_control,
                encoding.as_c_ptr(),
                att_ptr,
                att_len,
                sample.timestamp,
                listener.context.0,
            )
        };
    });
}

/// Invoke a liveliness callback.
pub(super) fn deliver_liveliness(listener: &ListenerRecord, key: &str, alive: bool, stats: &Stats) {
    let Delivery::Liveliness(callback) = listener.delivery else {
        return;
    };
    listener.gate.enter(|| {
        let Some(key) = NativeBuf::c_str(key, stats) else {
            return;
        };
        Stats::bump(&stats.callbacks);
        // SAFETY: key lives until the end of this closure.
        unsafe { callback(key.as_c_ptr(), c_int::from(alive), listener.context.0) };
    });
}
