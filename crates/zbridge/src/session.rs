// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sessions and the declare paths of every resource kind.
//!
//! # Lifecycle
//!
//! `open -> active -> closed`. Closing marks the session closed (every later
//! operation fails locally with [`Error::SessionClosed`]), takes the native
//! handle out once in-flight native calls have returned, undeclares every
//! live child resource, and finally closes the native session. Resources are
//! registered as children while the session handle is read-locked, so a
//! concurrent close cannot miss one.

use std::os::raw::{c_int, c_void};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use log::{debug, error, info};
use parking_lot::Mutex;
use zbridge_sys as sys;
use zbridge_sys::ZSession;

use crate::buffer::{NativeString, OutboundBytes};
use crate::config::query_deadline;
use crate::dispatch::{self, ContextBox, DispatchContext};
use crate::engine::NativeApi;
use crate::error::{Error, ResourceKind, Result};
use crate::handle::{CallbackBinding, HandleSlot, NativeHandle, Release, ResourceCore, Teardown};
use crate::keyexpr::{KeyExpr, Selector};
use crate::liveliness::{LivelinessSubscriber, LivelinessToken};
use crate::options::{GetOptions, PublisherOptions, PutOptions};
use crate::publisher::Publisher;
use crate::queryable::{Query, Queryable, QueryableEntry};
use crate::registry::{CallbackKind, CallbackRegistry, CallbackToken, Sink};
use crate::sample::{LivelinessEvent, Reply};
use crate::sink;
use crate::subscriber::Subscriber;
use crate::supervisor::{self, PendingQuery, QueryOutcome, ReplyStream};

/// Map a failed blocking task to an engine error.
pub(crate) fn join_error(err: tokio::task::JoinError) -> Error {
    error!("blocking native call did not complete: {}", err);
    Error::EngineError {
        code: sys::Z_ERR_GENERIC,
    }
}

/// State shared by a session and every resource declared under it.
pub(crate) struct SessionInner {
    api: Arc<dyn NativeApi>,
    registry: CallbackRegistry,
    handle: HandleSlot<ZSession>,
    closed: AtomicBool,
    children: Mutex<Vec<Weak<dyn Teardown>>>,
}

impl SessionInner {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Fail with `SessionClosed` if the session is closed.
    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::SessionClosed)
        } else {
            Ok(())
        }
    }

    /// Run `f` against the native session, which cannot be closed meanwhile.
    pub(crate) fn with_native<R>(&self, f: impl FnOnce(*mut ZSession) -> Result<R>) -> Result<R> {
        self.ensure_open()?;
        self.handle.with(f).unwrap_or(Err(Error::SessionClosed))
    }

    fn adopt(&self, child: Weak<dyn Teardown>) {
        let mut children = self.children.lock();
        children.retain(|c| c.strong_count() > 0);
        children.push(child);
    }

    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let handle = self.handle.take();
        let children = std::mem::take(&mut *self.children.lock());
        let mut undeclared = 0usize;
        for child in children.iter().filter_map(Weak::upgrade) {
            child.teardown();
            undeclared += 1;
        }
        if let Some(handle) = handle {
            // SAFETY: taken out of the slot; no other call can reach it.
            unsafe { self.api.close_session(handle.as_ptr()) };
        }
        info!(
            "session closed on {} engine ({} child resources torn down)",
            self.api.name(),
            undeclared
        );
        true
    }

    pub(crate) fn put_blocking(&self, key: &KeyExpr, payload: &[u8], options: &PutOptions) -> Result<()> {
        let c_key = key.to_cstring()?;
        let lowered = options.lower()?;
        let payload = OutboundBytes::new(payload);
        let status: c_int = self.with_native(|session| {
            // SAFETY: live session; every pointer outlives the call.
            Ok(unsafe {
                self.api.put(
                    session,
                    c_key.as_ptr(),
                    payload.as_ptr(),
                    payload.len(),
                    lowered.as_ptr(),
                )
            })
        })?;
        if status < 0 {
            return Err(Error::put_failed(status));
        }
        Ok(())
    }

    /// Declare a resource that receives no callbacks.
    fn declare_plain<T: 'static>(
        &self,
        kind: ResourceKind,
        release: Release<T>,
        declare: impl FnOnce(*mut ZSession) -> *mut T,
    ) -> Result<Arc<ResourceCore<T>>> {
        self.with_native(|session| {
            let handle = NativeHandle::new(declare(session)).ok_or(Error::DeclareFailed { kind })?;
            let core = Arc::new(ResourceCore::new(
                kind,
                Arc::clone(&self.api),
                handle,
                release,
                None,
            ));
            self.adopt(Arc::downgrade(&core) as Weak<dyn Teardown>);
            debug!("{} declared", kind);
            Ok(core)
        })
    }

    /// Declare a callback-carrying resource: register the sink first so early
    /// callbacks resolve, then declare natively; roll back on failure.
    fn declare_with_callback<T: 'static>(
        &self,
        kind: ResourceKind,
        token: CallbackToken,
        sink: Sink,
        release: Release<T>,
        declare: impl FnOnce(*mut ZSession, *mut c_void) -> *mut T,
    ) -> Result<Arc<ResourceCore<T>>> {
        self.registry.register(token, sink);
        let context = ContextBox::new(DispatchContext::new(self.registry.downgrade(), token));

        let declared = self.with_native(|session| {
            let handle = NativeHandle::new(declare(session, context.as_raw()))
                .ok_or(Error::DeclareFailed { kind })?;
            let binding = CallbackBinding::new(self.registry.clone(), token, context);
            let core = Arc::new(ResourceCore::new(
                kind,
                Arc::clone(&self.api),
                handle,
                release,
                Some(binding),
            ));
            self.adopt(Arc::downgrade(&core) as Weak<dyn Teardown>);
            Ok(core)
        });

        match declared {
            Ok(core) => {
                debug!("{} declared ({})", kind, token);
                Ok(core)
            }
            Err(err) => {
                if let Some(sink) = self.registry.remove(token) {
                    sink.close();
                }
                debug!("{} declare failed ({}): {}", kind, token, err);
                Err(err)
            }
        }
    }

    /// Start a query-shaped operation whose replies land in a supervised stream.
    fn start_query<T: Send + 'static>(
        &self,
        kind: CallbackKind,
        wrap: fn(Arc<PendingQuery<T>>) -> Sink,
        timeout: Duration,
        call: impl FnOnce(*mut ZSession, *mut c_void) -> c_int,
    ) -> Result<ReplyStream<T>> {
        let token = self.registry.allocate(kind);
        let (tx, rx) = sink::channel();
        let pending = Arc::new(PendingQuery::new(tx, token, self.registry.downgrade()));
        self.registry.register(token, wrap(Arc::clone(&pending)));

        // Ownership of the context moves to the engine on success; it comes
        // back in the completion trampoline.
        let raw_context =
            ContextBox::new(DispatchContext::new(self.registry.downgrade(), token)).into_raw();

        let status = self.with_native(|session| {
            self.adopt(Arc::downgrade(&pending) as Weak<dyn Teardown>);
            Ok(call(session, raw_context))
        });

        match status {
            Ok(code) if code >= 0 => {
                supervisor::supervise(Arc::clone(&pending), query_deadline(timeout));
                debug!("query {} started (timeout {:?})", token, timeout);
                Ok(ReplyStream::new(rx, pending))
            }
            other => {
                // SAFETY: the engine rejected the call and never took the context.
                drop(unsafe { ContextBox::from_raw(raw_context) });
                pending.finish(QueryOutcome::Failed);
                match other {
                    Ok(code) => Err(Error::EngineError { code }),
                    Err(err) => Err(err),
                }
            }
        }
    }
}

/// An open session. Closed on drop.
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub(crate) fn new(
        api: Arc<dyn NativeApi>,
        registry: CallbackRegistry,
        handle: NativeHandle<ZSession>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                api,
                registry,
                handle: HandleSlot::new(handle),
                closed: AtomicBool::new(false),
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Undeclare every resource of this session, then close it. Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Session identifier as reported by the engine.
    pub fn zid(&self) -> Result<String> {
        let api = &*self.inner.api;
        self.inner.with_native(|session| {
            // SAFETY: live session; the returned string is owned by us.
            let info = unsafe { NativeString::from_raw(api.session_info(session), api) };
            info.map(|s| s.to_string_lossy()).ok_or(Error::EngineError {
                code: sys::Z_ERR_GENERIC,
            })
        })
    }

    /// Put `payload` on `key` with default options.
    pub fn put(&self, key: &str, payload: impl AsRef<[u8]>) -> Result<()> {
        let key = KeyExpr::new(key)?;
        self.inner
            .put_blocking(&key, payload.as_ref(), &PutOptions::default())
    }

    /// Put with options on a blocking thread (`Block` congestion control may wait).
    pub async fn put_with(
        &self,
        key: &str,
        payload: impl Into<Vec<u8>>,
        options: PutOptions,
    ) -> Result<()> {
        let key = KeyExpr::new(key)?;
        self.inner.ensure_open()?;
        let inner = Arc::clone(&self.inner);
        let payload = payload.into();
        tokio::task::spawn_blocking(move || inner.put_blocking(&key, &payload, &options))
            .await
            .map_err(join_error)?
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        let key = KeyExpr::new(key)?;
        let c_key = key.to_cstring()?;
        let api = &*self.inner.api;
        // SAFETY: live session; key outlives the call.
        let status = self
            .inner
            .with_native(|session| Ok(unsafe { api.delete(session, c_key.as_ptr()) }))?;
        if status < 0 {
            return Err(Error::delete_failed(status));
        }
        Ok(())
    }

    pub async fn declare_publisher(&self, key: &str, options: PublisherOptions) -> Result<Publisher> {
        let key = KeyExpr::new(key)?;
        let c_key = key.to_cstring()?;
        let lowered = options.lower()?;
        let api = Arc::clone(&self.inner.api);
        let core = self.inner.declare_plain(
            ResourceKind::Publisher,
            release_publisher,
            // SAFETY: live session; key and options outlive the call.
            |session| unsafe { api.declare_publisher(session, c_key.as_ptr(), lowered.as_ptr()) },
        )?;
        Ok(Publisher::new(core, Arc::clone(&self.inner), key, options))
    }

    pub async fn declare_subscriber(&self, key: &str) -> Result<Subscriber> {
        let key = KeyExpr::new(key)?;
        let c_key = key.to_cstring()?;
        let token = self.inner.registry.allocate(CallbackKind::Subscriber);
        let (tx, rx) = sink::channel();
        let api = Arc::clone(&self.inner.api);
        let core = self.inner.declare_with_callback(
            ResourceKind::Subscriber,
            token,
            Sink::Samples(tx),
            release_subscriber,
            // SAFETY: live session; the context outlives the subscriber.
            |session, context| unsafe {
                api.declare_subscriber(session, c_key.as_ptr(), dispatch::on_sample, context)
            },
        )?;
        Ok(Subscriber::new(core, key, rx))
    }

    /// Declare a queryable whose `handler` runs on an engine thread for every
    /// matching query. See [`Query`] for the reply window.
    pub async fn declare_queryable<F>(&self, key: &str, handler: F) -> Result<Queryable>
    where
        F: Fn(&Query<'_>) + Send + Sync + 'static,
    {
        let key = KeyExpr::new(key)?;
        let c_key = key.to_cstring()?;
        let token = self.inner.registry.allocate(CallbackKind::Queryable);
        let entry = QueryableEntry::new(Box::new(handler), Arc::clone(&self.inner.api));
        let api = Arc::clone(&self.inner.api);
        let core = self.inner.declare_with_callback(
            ResourceKind::Queryable,
            token,
            Sink::Queries(Arc::new(entry)),
            release_queryable,
            // SAFETY: live session; the context outlives the queryable.
            |session, context| unsafe {
                api.declare_queryable(session, c_key.as_ptr(), dispatch::on_query, context)
            },
        )?;
        Ok(Queryable::new(core, key))
    }

    pub async fn declare_liveliness_token(&self, key: &str) -> Result<LivelinessToken> {
        let key = KeyExpr::new(key)?;
        let c_key = key.to_cstring()?;
        let api = Arc::clone(&self.inner.api);
        let core = self.inner.declare_plain(
            ResourceKind::LivelinessToken,
            release_liveliness_token,
            // SAFETY: live session; key outlives the call.
            |session| unsafe { api.declare_liveliness_token(session, c_key.as_ptr()) },
        )?;
        Ok(LivelinessToken::new(core, key))
    }

    /// Watch tokens matching `key`. With `history`, tokens alive at declaration
    /// time are reported first.
    pub async fn declare_liveliness_subscriber(
        &self,
        key: &str,
        history: bool,
    ) -> Result<LivelinessSubscriber> {
        let key = KeyExpr::new(key)?;
        let c_key = key.to_cstring()?;
        let token = self.inner.registry.allocate(CallbackKind::Liveliness);
        let (tx, rx) = sink::channel();
        let api = Arc::clone(&self.inner.api);
        let core = self.inner.declare_with_callback(
            ResourceKind::LivelinessSubscriber,
            token,
            Sink::Liveliness(tx),
            release_subscriber,
            // SAFETY: live session; the context outlives the subscriber.
            |session, context| unsafe {
                api.declare_liveliness_subscriber(
                    session,
                    c_key.as_ptr(),
                    dispatch::on_liveliness,
                    context,
                    history,
                )
            },
        )?;
        Ok(LivelinessSubscriber::new(core, key, rx))
    }

    /// Query `selector`. The stream ends when the engine signals completion or
    /// once `options.timeout` (plus a small grace) has elapsed.
    pub async fn get(&self, selector: &str, options: GetOptions) -> Result<ReplyStream<Reply>> {
        let selector = Selector::parse(selector)?;
        let c_selector = selector.to_cstring()?;
        let lowered = options.lower();
        let api = Arc::clone(&self.inner.api);
        self.inner.start_query(
            CallbackKind::Query,
            Sink::Replies,
            options.timeout,
            // SAFETY: live session; selector and options outlive the call, the
            // context is handed over to the engine.
            |session, context| unsafe {
                api.get(
                    session,
                    c_selector.as_ptr(),
                    dispatch::on_reply,
                    dispatch::on_query_complete,
                    context,
                    lowered.as_ptr(),
                )
            },
        )
    }

    /// Currently alive tokens matching `key`.
    pub async fn liveliness_get(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<ReplyStream<LivelinessEvent>> {
        let key = KeyExpr::new(key)?;
        let c_key = key.to_cstring()?;
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let api = Arc::clone(&self.inner.api);
        self.inner.start_query(
            CallbackKind::Liveliness,
            Sink::LivelinessReplies,
            timeout,
            // SAFETY: as for `get`.
            |session, context| unsafe {
                api.liveliness_get(
                    session,
                    c_key.as_ptr(),
                    dispatch::on_liveliness,
                    dispatch::on_query_complete,
                    context,
                    timeout_ms,
                )
            },
        )
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("engine", &self.inner.api.name())
            .field("closed", &self.is_closed())
            .finish()
    }
}

unsafe fn release_publisher(api: &dyn NativeApi, raw: *mut sys::ZPublisher) {
    api.undeclare_publisher(raw)
}

unsafe fn release_subscriber(api: &dyn NativeApi, raw: *mut sys::ZSubscriber) {
    api.undeclare_subscriber(raw)
}

unsafe fn release_queryable(api: &dyn NativeApi, raw: *mut sys::ZQueryable) {
    api.undeclare_queryable(raw)
}

unsafe fn release_liveliness_token(api: &dyn NativeApi, raw: *mut sys::ZLivelinessToken) {
    api.undeclare_liveliness_token(raw)
}
