// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Callback registry: maps the token carried by a native callback back to the
//! managed sink of the resource that declared it.
//!
//! The registry is an injectable service, not global state: each
//! [`Bridge`](crate::Bridge) owns one, and independent registries can coexist
//! in the same process.
//!
//! # Concurrency
//!
//! - `allocate` is a single `fetch_add` on a per-kind counter (wait-free).
//! - `register`/`remove` take the write lock, so mutation is serialized.
//! - `resolve` takes the read lock and clones the sink out. A resolve racing
//!   a remove observes either the sink or nothing; the clone keeps the sink
//!   alive, and a closed sink rejects further events.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use log::{trace, warn};
use parking_lot::RwLock;

use crate::queryable::QueryableEntry;
use crate::sample::{LivelinessEvent, Reply, Sample};
use crate::sink::EventSink;
use crate::supervisor::{PendingQuery, QueryOutcome};

/// Id sequence a callback belongs to. Each kind counts independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    Subscriber,
    Query,
    Queryable,
    Liveliness,
}

impl CallbackKind {
    const COUNT: usize = 4;

    const fn index(self) -> usize {
        match self {
            CallbackKind::Subscriber => 0,
            CallbackKind::Query => 1,
            CallbackKind::Queryable => 2,
            CallbackKind::Liveliness => 3,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            CallbackKind::Subscriber => "subscriber",
            CallbackKind::Query => "query",
            CallbackKind::Queryable => "queryable",
            CallbackKind::Liveliness => "liveliness",
        }
    }
}

/// Tagged registry key: `{kind, id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackToken {
    pub kind: CallbackKind,
    pub id: u64,
}

impl fmt::Display for CallbackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind.as_str(), self.id)
    }
}

/// Managed destination of a callback.
#[derive(Clone)]
pub(crate) enum Sink {
    Samples(EventSink<Sample>),
    Replies(Arc<PendingQuery<Reply>>),
    Queries(Arc<QueryableEntry>),
    Liveliness(EventSink<LivelinessEvent>),
    LivelinessReplies(Arc<PendingQuery<LivelinessEvent>>),
}

impl Sink {
    /// Stop accepting events.
    pub(crate) fn close(&self) {
        match self {
            Sink::Samples(sink) => {
                sink.close();
            }
            Sink::Liveliness(sink) => {
                sink.close();
            }
            Sink::Replies(pending) => {
                pending.finish(QueryOutcome::Cancelled);
            }
            Sink::LivelinessReplies(pending) => {
                pending.finish(QueryOutcome::Cancelled);
            }
            Sink::Queries(entry) => entry.close(),
        }
    }
}

struct Inner {
    next_ids: [AtomicU64; CallbackKind::COUNT],
    entries: RwLock<HashMap<CallbackToken, Sink>>,
}

/// Shared callback registry. Clones refer to the same table.
#[derive(Clone)]
pub struct CallbackRegistry {
    inner: Arc<Inner>,
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("entries", &self.len())
            .finish()
    }
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                next_ids: [
                    AtomicU64::new(0),
                    AtomicU64::new(0),
                    AtomicU64::new(0),
                    AtomicU64::new(0),
                ],
                entries: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Next id for `kind`, starting at 0.
    pub fn allocate(&self, kind: CallbackKind) -> CallbackToken {
        let id = self.inner.next_ids[kind.index()].fetch_add(1, Ordering::Relaxed);
        CallbackToken { kind, id }
    }

    /// Bind `sink` to `token`. Refuses to replace a live entry.
    pub(crate) fn register(&self, token: CallbackToken, sink: Sink) -> bool {
        let mut entries = self.inner.entries.write();
        if entries.contains_key(&token) {
            warn!("callback {} already registered, keeping existing sink", token);
            return false;
        }
        entries.insert(token, sink);
        true
    }

    pub(crate) fn resolve(&self, token: CallbackToken) -> Option<Sink> {
        self.inner.entries.read().get(&token).cloned()
    }

    /// Remove the entry, if any. Removing an absent token is a no-op.
    pub(crate) fn remove(&self, token: CallbackToken) -> Option<Sink> {
        let removed = self.inner.entries.write().remove(&token);
        if removed.is_some() {
            trace!("callback {} removed", token);
        }
        removed
    }

    pub fn contains(&self, token: CallbackToken) -> bool {
        self.inner.entries.read().contains_key(&token)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and close every entry. Returns how many were live.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<Sink> = self.inner.entries.write().drain().map(|(_, s)| s).collect();
        // Closing outside the lock: finishing a query re-enters `remove`.
        for sink in &drained {
            sink.close();
        }
        drained.len()
    }

    pub(crate) fn downgrade(&self) -> WeakRegistry {
        WeakRegistry {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Non-owning registry reference held by callback contexts.
#[derive(Clone)]
pub(crate) struct WeakRegistry {
    inner: Weak<Inner>,
}

impl WeakRegistry {
    pub(crate) fn upgrade(&self) -> Option<CallbackRegistry> {
        self.inner.upgrade().map(|inner| CallbackRegistry { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn ids_are_per_kind_and_start_at_zero() {
        let registry = CallbackRegistry::new();
        assert_eq!(registry.allocate(CallbackKind::Subscriber).id, 0);
        assert_eq!(registry.allocate(CallbackKind::Subscriber).id, 1);
        assert_eq!(registry.allocate(CallbackKind::Query).id, 0);
        assert_eq!(registry.allocate(CallbackKind::Liveliness).id, 0);
        assert_eq!(registry.allocate(CallbackKind::Subscriber).id, 2);
    }

    #[test]
    fn independent_registries_do_not_share_ids() {
        let a = CallbackRegistry::new();
        let b = CallbackRegistry::new();
        a.allocate(CallbackKind::Queryable);
        assert_eq!(b.allocate(CallbackKind::Queryable).id, 0);
    }

    #[test]
    fn concurrent_allocation_is_unique() {
        let registry = CallbackRegistry::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || {
                    (0..500)
                        .map(|_| registry.allocate(CallbackKind::Subscriber).id)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "id {} allocated twice", id);
            }
        }
        assert_eq!(seen.len(), 4000);
    }

    #[test]
    fn register_resolve_remove() {
        let registry = CallbackRegistry::new();
        let token = registry.allocate(CallbackKind::Subscriber);
        let (tx, _rx) = sink::channel::<Sample>();

        assert!(registry.resolve(token).is_none());
        assert!(registry.register(token, Sink::Samples(tx.clone())));
        assert!(!registry.register(token, Sink::Samples(tx)));
        assert!(registry.contains(token));
        assert!(matches!(registry.resolve(token), Some(Sink::Samples(_))));

        assert!(registry.remove(token).is_some());
        assert!(registry.remove(token).is_none());
        assert!(registry.resolve(token).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn shutdown_closes_all_sinks() {
        let registry = CallbackRegistry::new();
        let (a, _ra) = sink::channel::<Sample>();
        let (b, _rb) = sink::channel::<LivelinessEvent>();
        registry.register(registry.allocate(CallbackKind::Subscriber), Sink::Samples(a.clone()));
        registry.register(registry.allocate(CallbackKind::Liveliness), Sink::Liveliness(b.clone()));

        assert_eq!(registry.shutdown(), 2);
        assert!(a.is_closed());
        assert!(b.is_closed());
        assert!(registry.is_empty());
    }

    #[test]
    fn weak_registry_does_not_keep_table_alive() {
        let registry = CallbackRegistry::new();
        let weak = registry.downgrade();
        assert!(weak.upgrade().is_some());
        drop(registry);
        assert!(weak.upgrade().is_none());
    }
}
