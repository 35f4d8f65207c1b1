// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Entry point: an engine plus the callback registry its sessions share.

use std::ptr;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use zbridge_sys::ZSession;

use crate::buffer::c_string;
use crate::config::{OpenArgs, SessionConfig};
use crate::dispatch;
use crate::engine::{LoopbackEngine, NativeApi};
use crate::error::{Error, Result};
use crate::handle::NativeHandle;
use crate::registry::CallbackRegistry;
use crate::retry::RetryExecutor;
use crate::scout::{Hello, ScoutCollector, ScoutTarget};
use crate::session::{join_error, Session};

/// Engine handle and callback registry. Cheap to clone.
#[derive(Clone)]
pub struct Bridge {
    api: Arc<dyn NativeApi>,
    registry: CallbackRegistry,
}

impl Bridge {
    /// Bridge over `api` with a fresh registry.
    pub fn new(api: Arc<dyn NativeApi>) -> Self {
        Self::with_registry(api, CallbackRegistry::new())
    }

    pub fn with_registry(api: Arc<dyn NativeApi>, registry: CallbackRegistry) -> Self {
        Self { api, registry }
    }

    /// Bridge over the linked native shim.
    #[cfg(feature = "native")]
    pub fn linked() -> Self {
        Self::new(Arc::new(crate::engine::LinkedApi))
    }

    /// Bridge over a fresh in-process loopback engine.
    pub fn loopback() -> (Self, LoopbackEngine) {
        let engine = LoopbackEngine::new();
        (Self::new(Arc::new(engine.clone())), engine)
    }

    pub fn registry(&self) -> &CallbackRegistry {
        &self.registry
    }

    pub fn engine_name(&self) -> &'static str {
        self.api.name()
    }

    /// Ask the engine to install its own logger.
    pub fn init_native_logger(&self) -> Result<()> {
        // SAFETY: no arguments.
        let status = unsafe { self.api.init_logger() };
        if status < 0 {
            return Err(Error::EngineError { code: status });
        }
        Ok(())
    }

    /// Open a session.
    ///
    /// Each attempt is bounded by the configured open timeout; with a retry
    /// policy, retryable failures are retried with backoff.
    pub async fn open(&self, config: SessionConfig) -> Result<Session> {
        config.validate()?;
        match config.retry_policy() {
            Some(policy) => {
                RetryExecutor::new(policy.clone())
                    .execute(|| self.open_once(&config))
                    .await
            }
            None => self.open_once(&config).await,
        }
    }

    async fn open_once(&self, config: &SessionConfig) -> Result<Session> {
        let args = config.open_args()?;
        let api = Arc::clone(&self.api);
        let mut join = tokio::task::spawn_blocking(move || {
            // SAFETY: arguments are valid C strings owned by this closure.
            let raw: *mut ZSession = unsafe {
                match &args {
                    OpenArgs::Mode { mode, endpoints } => {
                        let endpoints = if endpoints.as_bytes().is_empty() {
                            ptr::null()
                        } else {
                            endpoints.as_ptr()
                        };
                        api.open_session(mode.as_ptr(), endpoints)
                    }
                    OpenArgs::Config(config) => api.open_session_with_config(config.as_ptr()),
                }
            };
            NativeHandle::new(raw)
        });

        let opened = match tokio::time::timeout(config.get_open_timeout(), &mut join).await {
            Ok(joined) => joined.map_err(join_error)?,
            Err(_) => {
                // The blocking open cannot be interrupted; close it if it ever succeeds.
                let api = Arc::clone(&self.api);
                tokio::spawn(async move {
                    if let Ok(Some(late)) = join.await {
                        warn!("session opened after timeout, closing it");
                        // SAFETY: nobody else knows this handle.
                        unsafe { api.close_session(late.as_ptr()) };
                    }
                });
                return Err(Error::Timeout);
            }
        };

        let handle = opened.ok_or_else(|| {
            Error::OpenFailed(format!(
                "{} engine refused {} session",
                self.api.name(),
                config.mode()
            ))
        })?;
        info!("session opened ({} mode, {} engine)", config.mode(), self.api.name());
        Ok(Session::new(
            Arc::clone(&self.api),
            self.registry.clone(),
            handle,
        ))
    }

    /// Discover routers/peers for `timeout`. Malformed reports are skipped.
    pub async fn scout(&self, target: ScoutTarget, timeout: Duration) -> Result<Vec<Hello>> {
        let what = c_string(target.as_str(), "scout target")?;
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let api = Arc::clone(&self.api);
        tokio::task::spawn_blocking(move || {
            let collector = ScoutCollector::default();
            // SAFETY: `collector` outlives the blocking call, which is the only
            // window in which the engine calls back.
            let status = unsafe {
                api.scout(
                    what.as_ptr(),
                    ptr::null(),
                    dispatch::on_scout,
                    (&collector as *const ScoutCollector).cast_mut().cast(),
                    timeout_ms,
                )
            };
            if status < 0 {
                return Err(Error::EngineError { code: status });
            }
            Ok(collector.into_hellos())
        })
        .await
        .map_err(join_error)?
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("engine", &self.api.name())
            .field("registry", &self.registry)
            .finish()
    }
}
