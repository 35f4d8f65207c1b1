// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Queryables and the queries they receive.
//!
//! The engine's reply context is only valid while the query callback runs, so
//! the handler is called synchronously inside the callback and receives a
//! borrowed [`Query`]. A `Query` is neither `Send` nor `'static`: it cannot
//! be stored or moved to another task, and every reply happens inside the
//! window. Handlers that need async work should compute the answer ahead of
//! time (or keep a cache) rather than reply later.

use std::marker::PhantomData;
use std::os::raw::c_int;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;
use zbridge_sys::{ZQuery, ZQueryable};

use crate::buffer::{OutboundBytes, Payload};
use crate::engine::NativeApi;
use crate::error::{Error, ResourceKind, Result};
use crate::handle::ResourceCore;
use crate::keyexpr::KeyExpr;
use crate::options::ReplyOptions;
use crate::registry::CallbackToken;

pub(crate) type QueryHandler = Box<dyn Fn(&Query<'_>) + Send + Sync>;

/// Registry side of a queryable: the user handler plus the engine to reply through.
pub(crate) struct QueryableEntry {
    handler: QueryHandler,
    api: Arc<dyn NativeApi>,
    closed: AtomicBool,
}

impl QueryableEntry {
    pub(crate) fn new(handler: QueryHandler, api: Arc<dyn NativeApi>) -> Self {
        Self {
            handler,
            api,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn api(&self) -> &dyn NativeApi {
        &*self.api
    }

    pub(crate) fn handle(&self, query: &Query<'_>) {
        (self.handler)(query);
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Engine reply context, borrowed for one callback invocation.
pub(crate) struct ReplyContext<'cb> {
    raw: *const ZQuery,
    api: &'cb dyn NativeApi,
    _window: PhantomData<&'cb ZQuery>,
}

impl<'cb> ReplyContext<'cb> {
    pub(crate) fn new(raw: *const ZQuery, api: &'cb dyn NativeApi) -> Self {
        Self {
            raw,
            api,
            _window: PhantomData,
        }
    }
}

/// A query received by a queryable. Only valid inside the handler call.
pub struct Query<'cb> {
    key: String,
    parameters: String,
    payload: Payload,
    attachment: Option<Payload>,
    reply: ReplyContext<'cb>,
}

impl<'cb> Query<'cb> {
    pub(crate) fn new(
        key: String,
        parameters: String,
        payload: Payload,
        attachment: Option<Payload>,
        reply: ReplyContext<'cb>,
    ) -> Self {
        Self {
            key,
            parameters,
            payload,
            attachment,
            reply,
        }
    }

    /// Key expression the query was issued on.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Selector parameters (text after `?`), empty if none.
    pub fn parameters(&self) -> &str {
        &self.parameters
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn attachment(&self) -> Option<&Payload> {
        self.attachment.as_ref()
    }

    /// Reply with `payload` on `key`.
    pub fn reply(&self, key: &str, payload: impl AsRef<[u8]>) -> Result<()> {
        self.reply_with(key, payload, &ReplyOptions::default())
    }

    /// Reply with explicit encoding/attachment.
    ///
    /// The engine rejects keys that do not intersect the query
    /// ([`Error::EngineError`]).
    pub fn reply_with(
        &self,
        key: &str,
        payload: impl AsRef<[u8]>,
        options: &ReplyOptions,
    ) -> Result<()> {
        let key = KeyExpr::new(key)?;
        let c_key = key.to_cstring()?;
        let payload = OutboundBytes::new(payload.as_ref());
        let (attachment, attachment_len) = OutboundBytes::optional(options.attachment.as_deref());

        // SAFETY: we are inside the query callback, so the reply context is
        // valid; every buffer outlives the call.
        let status: c_int = unsafe {
            self.reply.api.query_reply(
                self.reply.raw,
                c_key.as_ptr(),
                payload.as_ptr(),
                payload.len(),
                options.encoding.to_raw(),
                attachment,
                attachment_len,
            )
        };
        if status < 0 {
            return Err(Error::EngineError { code: status });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Query<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("key", &self.key)
            .field("parameters", &self.parameters)
            .field("payload", &self.payload)
            .finish()
    }
}

/// A declared queryable. Undeclared on drop.
pub struct Queryable {
    core: Arc<ResourceCore<ZQueryable>>,
    key: KeyExpr,
}

impl Queryable {
    pub(crate) fn new(core: Arc<ResourceCore<ZQueryable>>, key: KeyExpr) -> Self {
        Self { core, key }
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

    /// Undeclare; once this returns the handler is not called again. Idempotent.
    pub fn undeclare(&self) {
        if !self.core.undeclare() {
            debug!("{} on '{}' already undeclared", ResourceKind::Queryable, self.key);
        }
    }
}

impl std::fmt::Debug for Queryable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queryable")
            .field("key", &self.key)
            .field("token", &self.token())
            .finish()
    }
}
