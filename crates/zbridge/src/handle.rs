// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ownership of native handles.
//!
//! A [`NativeHandle`] is the only place a native pointer is stored. It offers
//! no arithmetic and no casts; the pointer only ever flows back into the
//! engine that produced it. [`HandleSlot`] makes release exclusive: native
//! calls run under a read lock, release takes the handle out under the write
//! lock, so a handle is released at most once and never while in use.

use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::Arc;

use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::dispatch::ContextBox;
use crate::engine::NativeApi;
use crate::error::ResourceKind;
use crate::registry::{CallbackRegistry, CallbackToken};

/// Owned opaque engine handle.
pub(crate) struct NativeHandle<T> {
    ptr: NonNull<T>,
    _owns: PhantomData<T>,
}

// SAFETY: the engine handles are thread-safe; the bridge serializes release
// through `HandleSlot`.
unsafe impl<T> Send for NativeHandle<T> {}
unsafe impl<T> Sync for NativeHandle<T> {}

impl<T> NativeHandle<T> {
    /// `None` for the engine's null failure value.
    pub(crate) fn new(ptr: *mut T) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self {
            ptr,
            _owns: PhantomData,
        })
    }

    pub(crate) fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }
}

impl<T> fmt::Debug for NativeHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeHandle<{}>", std::any::type_name::<T>())
    }
}

/// A handle that can be used concurrently and released exactly once.
pub(crate) struct HandleSlot<T> {
    slot: RwLock<Option<NativeHandle<T>>>,
}

impl<T> HandleSlot<T> {
    pub(crate) fn new(handle: NativeHandle<T>) -> Self {
        Self {
            slot: RwLock::new(Some(handle)),
        }
    }

    /// Run `f` with the raw handle while it cannot be released.
    /// `None` once released.
    pub(crate) fn with<R>(&self, f: impl FnOnce(*mut T) -> R) -> Option<R> {
        let guard = self.slot.read();
        guard.as_ref().map(|handle| f(handle.as_ptr()))
    }

    /// Take the handle out for release. Waits for in-flight `with` calls.
    pub(crate) fn take(&self) -> Option<NativeHandle<T>> {
        self.slot.write().take()
    }

    /// Take the handle and run `release` on it while still holding the write
    /// lock, so a concurrent release waits until this one has finished.
    pub(crate) fn release_with(&self, release: impl FnOnce(NativeHandle<T>)) -> bool {
        let mut slot = self.slot.write();
        match slot.take() {
            Some(handle) => {
                release(handle);
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_live(&self) -> bool {
        self.slot.read().is_some()
    }
}

/// Something the session must shut down before closing its native handle.
pub(crate) trait Teardown: Send + Sync {
    fn teardown(&self);
}

/// Registry entry and callback context owned by a resource.
pub(crate) struct CallbackBinding {
    registry: CallbackRegistry,
    token: CallbackToken,
    context: Mutex<Option<ContextBox>>,
}

impl CallbackBinding {
    pub(crate) fn new(registry: CallbackRegistry, token: CallbackToken, context: ContextBox) -> Self {
        Self {
            registry,
            token,
            context: Mutex::new(Some(context)),
        }
    }

    pub(crate) fn token(&self) -> CallbackToken {
        self.token
    }

    fn release(&self) {
        if let Some(sink) = self.registry.remove(self.token) {
            sink.close();
        }
        // The engine no longer references the context once undeclare returned.
        drop(self.context.lock().take());
    }
}

pub(crate) type Release<T> = unsafe fn(&dyn NativeApi, *mut T);

/// Native handle plus its bridge bookkeeping, shared by every resource type.
pub(crate) struct ResourceCore<T> {
    kind: ResourceKind,
    api: Arc<dyn NativeApi>,
    handle: HandleSlot<T>,
    release: Release<T>,
    callback: Option<CallbackBinding>,
}

impl<T> ResourceCore<T> {
    pub(crate) fn new(
        kind: ResourceKind,
        api: Arc<dyn NativeApi>,
        handle: NativeHandle<T>,
        release: Release<T>,
        callback: Option<CallbackBinding>,
    ) -> Self {
        Self {
            kind,
            api,
            handle: HandleSlot::new(handle),
            release,
            callback,
        }
    }

    pub(crate) fn api(&self) -> &dyn NativeApi {
        &*self.api
    }

    pub(crate) fn token(&self) -> Option<CallbackToken> {
        self.callback.as_ref().map(CallbackBinding::token)
    }

    pub(crate) fn with<R>(&self, f: impl FnOnce(*mut T) -> R) -> Option<R> {
        self.handle.with(f)
    }

    pub(crate) fn is_live(&self) -> bool {
        self.handle.is_live()
    }

    /// Release the native handle, then the registry entry, then the sink.
    ///
    /// Returns false if the resource was already undeclared.
    pub(crate) fn undeclare(&self) -> bool {
        let released = self.handle.release_with(|handle| {
            // SAFETY: handle came from this engine and was taken out of the
            // slot, so no other call can use or release it.
            unsafe { (self.release)(&*self.api, handle.as_ptr()) };
        });
        if !released {
            return false;
        }
        if let Some(callback) = &self.callback {
            callback.release();
            debug!("{} undeclared ({})", self.kind, callback.token());
        } else {
            debug!("{} undeclared", self.kind);
        }
        true
    }
}

impl<T> Teardown for ResourceCore<T> {
    fn teardown(&self) {
        self.undeclare();
    }
}

impl<T> Drop for ResourceCore<T> {
    fn drop(&mut self) {
        self.undeclare();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_not_a_handle() {
        assert!(NativeHandle::<u8>::new(std::ptr::null_mut()).is_none());
    }

    #[test]
    fn slot_releases_once() {
        let mut value = 7u32;
        let handle = NativeHandle::new(&mut value as *mut u32).unwrap();
        let slot = HandleSlot::new(handle);

        assert_eq!(slot.with(|p| unsafe { *p }), Some(7));
        let mut released = 0;
        assert!(slot.release_with(|_| released += 1));
        assert!(!slot.release_with(|_| released += 1));
        assert_eq!(released, 1);
        assert!(slot.take().is_none());
        assert!(!slot.is_live());
        assert_eq!(slot.with(|_| ()), None);
    }
}
