// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Declared publishers.

use std::os::raw::c_int;
use std::ptr;
use std::sync::Arc;

use zbridge_sys::ZPublisher;

use crate::buffer::OutboundBytes;
use crate::error::{Error, ResourceKind, Result};
use crate::handle::ResourceCore;
use crate::keyexpr::KeyExpr;
use crate::options::{PublisherOptions, PutOptions};
use crate::session::{join_error, SessionInner};

/// Publisher shared with blocking put tasks.
struct Shared {
    core: Arc<ResourceCore<ZPublisher>>,
    session: Arc<SessionInner>,
}

impl Shared {
    fn ensure_usable(&self) -> Result<()> {
        self.session.ensure_open()?;
        if !self.core.is_live() {
            return Err(Error::Undeclared(ResourceKind::Publisher));
        }
        Ok(())
    }

    fn put(&self, payload: &[u8], options: Option<&PutOptions>) -> Result<()> {
        self.ensure_usable()?;
        let lowered = options.map(PutOptions::lower).transpose()?;
        let options_ptr = lowered.as_ref().map_or(ptr::null(), |l| l.as_ptr());
        let payload = OutboundBytes::new(payload);
        let api = self.core.api();
        let status: c_int = self
            .core
            // SAFETY: live publisher; payload and options outlive the call.
            .with(|publisher| unsafe {
                api.publisher_put(publisher, payload.as_ptr(), payload.len(), options_ptr)
            })
            .ok_or(Error::Undeclared(ResourceKind::Publisher))?;
        if status < 0 {
            return Err(Error::put_failed(status));
        }
        Ok(())
    }
}

/// A declared publisher. Undeclared on drop.
///
/// A failed put is never considered delivered.
pub struct Publisher {
    shared: Arc<Shared>,
    key: KeyExpr,
    options: PublisherOptions,
}

impl Publisher {
    pub(crate) fn new(
        core: Arc<ResourceCore<ZPublisher>>,
        session: Arc<SessionInner>,
        key: KeyExpr,
        options: PublisherOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared { core, session }),
            key,
            options,
        }
    }

    pub fn key_expr(&self) -> &KeyExpr {
        &self.key
    }

    pub fn options(&self) -> &PublisherOptions {
        &self.options
    }

    pub fn is_declared(&self) -> bool {
        self.shared.core.is_live()
    }

    /// Publish with the options fixed at declaration.
    pub fn put(&self, payload: impl AsRef<[u8]>) -> Result<()> {
        self.shared.put(payload.as_ref(), None)
    }

    /// Publish with per-call options on a blocking thread.
    pub async fn put_with(&self, payload: impl Into<Vec<u8>>, options: PutOptions) -> Result<()> {
        self.shared.ensure_usable()?;
        let shared = Arc::clone(&self.shared);
        let payload = payload.into();
        tokio::task::spawn_blocking(move || shared.put(&payload, Some(&options)))
            .await
            .map_err(join_error)?
    }

    /// Publish a deletion on the publisher's key.
    pub fn delete(&self) -> Result<()> {
        self.shared.ensure_usable()?;
        let api = self.shared.core.api();
        let status = self
            .shared
            .core
            // SAFETY: live publisher.
            .with(|publisher| unsafe { api.publisher_delete(publisher) })
            .ok_or(Error::Undeclared(ResourceKind::Publisher))?;
        if status < 0 {
            return Err(Error::delete_failed(status));
        }
        Ok(())
    }

    /// Idempotent.
    pub fn undeclare(&self) {
        self.shared.core.undeclare();
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("key", &self.key)
            .field("declared", &self.is_declared())
            .finish()
    }
}
