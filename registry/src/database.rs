//! Per-database shared state (§4.3): schema version and the set of
//! connection views currently attached, reachable concurrently from
//! every connection task open against that database. The compiled-query
//! cache itself is thread-unsafe and owned per-view (§4.2); what lives
//! here is the authoritative `dbver` each view's cache is checked
//! against, so sibling views can tell a cached handle has gone stale
//! without a shared lock on every lookup.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use common::fingerprint::Fingerprint;
use dashmap::{DashMap, DashSet};
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use crate::model::CompiledQuery;

/// A schema namespace inside a database (the "module"/branch axis).
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    pub name: String,
    pub reflection_cache: Vec<u8>,
}

/// All state shared by every connection view open against one database.
pub struct Database {
    pub name: String,
    dbver: AtomicU64,
    namespaces: DashMap<String, Namespace>,
    /// Ids of connection views currently attached, for schema-change
    /// broadcast — the engine looks these up to push invalidation.
    subscribers: DashSet<Uuid>,
    introspection_lock: Mutex<()>,
    /// Single-flight compile broker (§8: "at most one compilation of f is
    /// outstanding... at a time"). This is distinct from the per-view
    /// bounded LRU cache in §4.2: it only exists to let concurrent
    /// connections compiling the same fingerprint converge on one
    /// compile, handing the result to every waiter. Cleared wholesale on
    /// a `dbver` bump, same as any other compiled-query state.
    in_flight: DashMap<Fingerprint, Arc<Notify>>,
    published: DashMap<Fingerprint, CompiledQuery>,
}

impl Database {
    pub fn new(name: impl Into<String>) -> Self {
        Database {
            name: name.into(),
            dbver: AtomicU64::new(1),
            namespaces: DashMap::new(),
            subscribers: DashSet::new(),
            introspection_lock: Mutex::new(()),
            in_flight: DashMap::new(),
            published: DashMap::new(),
        }
    }

    pub fn dbver(&self) -> u64 {
        self.dbver.load(Ordering::Acquire)
    }

    /// Bumps the schema version — called once a DDL unit commits (§4.3).
    /// Every view's cache entries were stamped with the `dbver` in force
    /// when they were compiled; a view notices the mismatch against this
    /// new value on its next lookup and drops the stale entry instead of
    /// trusting a shared, lock-guarded cache. The single-flight broker's
    /// published results are cleared outright since they'd all be stale.
    pub fn bump_dbver(&self) -> u64 {
        let new_ver = self.dbver.fetch_add(1, Ordering::AcqRel) + 1;
        self.published.clear();
        new_ver
    }

    /// Looks up a fingerprint already published by a prior single-flight
    /// compile on this database, if it's still current.
    pub fn published_compile(&self, fp: &Fingerprint) -> Option<CompiledQuery> {
        self.published.get(fp).map(|e| e.value().clone())
    }

    /// Registers this fingerprint as being compiled by the caller. Returns
    /// `None` if the caller won the race and must compile; returns
    /// `Some(notify)` if someone else is already compiling it, in which
    /// case the caller should await the notification and retry
    /// `published_compile`.
    pub fn begin_compile(&self, fp: &Fingerprint) -> Option<Arc<Notify>> {
        if let Some(existing) = self.in_flight.get(fp) {
            return Some(existing.clone());
        }
        self.in_flight.insert(*fp, Arc::new(Notify::new()));
        None
    }

    /// Publishes the compiled result and wakes anyone waiting on it.
    pub fn finish_compile(&self, fp: Fingerprint, query: CompiledQuery) {
        self.published.insert(fp, query);
        if let Some((_, notify)) = self.in_flight.remove(&fp) {
            notify.notify_waiters();
        }
    }

    /// Releases the single-flight slot without publishing a result (the
    /// compile failed) and wakes waiters so they retry independently.
    pub fn abort_compile(&self, fp: &Fingerprint) {
        if let Some((_, notify)) = self.in_flight.remove(fp) {
            notify.notify_waiters();
        }
    }

    pub fn insert_namespace(&self, ns: Namespace) {
        self.namespaces.insert(ns.name.clone(), ns);
    }

    pub fn namespace(&self, name: &str) -> Option<Namespace> {
        self.namespaces.get(name).map(|e| e.value().clone())
    }

    pub fn subscribe(&self, view_id: Uuid) {
        self.subscribers.insert(view_id);
    }

    pub fn unsubscribe(&self, view_id: &Uuid) {
        self.subscribers.remove(view_id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Serializes introspection (DDL reflection) against other writers —
    /// acquire before running a DDL unit's backend statements.
    pub async fn introspection_guard(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.introspection_lock.lock().await
    }
}

/// The process-wide map from database name to its shared state (§4.3).
/// Databases are created lazily on first connection and never removed
/// while a view is attached.
pub struct DatabaseRegistry {
    databases: DashMap<String, Arc<Database>>,
}

impl DatabaseRegistry {
    pub fn new() -> Self {
        DatabaseRegistry {
            databases: DashMap::new(),
        }
    }

    /// Returns the shared `Database` for `name`, creating it on first use.
    pub fn get_or_create(&self, name: &str) -> Arc<Database> {
        if let Some(db) = self.databases.get(name) {
            return db.clone();
        }
        let db = Arc::new(Database::new(name));
        self.databases.entry(name.to_string()).or_insert(db).clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Database>> {
        self.databases.get(name).map(|e| e.value().clone())
    }

    /// Registers a freshly-established connection view against `name`,
    /// creating the database record if this is the first connection to
    /// see it. Mirrors the engine calling `new_view` on handshake (§4.5).
    pub fn new_view(&self, name: &str, view_id: Uuid) -> Arc<Database> {
        let db = self.get_or_create(name);
        db.subscribe(view_id);
        db
    }

    pub fn drop_view(&self, name: &str, view_id: &Uuid) {
        if let Some(db) = self.databases.get(name) {
            db.unsubscribe(view_id);
        }
    }

    pub fn drop_database(&self, name: &str) {
        self.databases.remove(name);
    }

    pub fn database_count(&self) -> usize {
        self.databases.len()
    }
}

impl Default for DatabaseRegistry {
    fn default() -> Self {
        Self::new()
    }
}
