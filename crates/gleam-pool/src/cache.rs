//! In-process key-value cache served through the pool.
//!
//! [`MemoryCacheManager`] implements `r2d2::ManageConnection`, so the cache
//! is leased, bounded, and health-checked exactly like the SQL backend.
//! Entries expire lazily on read and in bulk on each validation pass.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use thiserror::Error;

use crate::errors::{PoolError, Result};

/// Cache operations available on a leased cache connection.
pub trait CacheBackend {
    /// Value stored under `key`, if present and not expired.
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>>;
    /// Store `value`; `ttl` of `None` uses the store default.
    fn set(&mut self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;
    /// Remove `key`, returning whether it existed.
    fn delete(&mut self, key: &str) -> Result<bool>;
}

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
struct Store {
    entries: DashMap<String, Entry>,
    default_ttl: Option<Duration>,
}

impl Store {
    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        before - self.entries.len()
    }
}

/// Errors from the cache connection manager.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The store handle was closed.
    #[error("cache connection closed")]
    Closed,
}

/// Connection manager for the shared in-process store.
#[derive(Clone, Debug)]
pub struct MemoryCacheManager {
    store: Arc<Store>,
}

impl MemoryCacheManager {
    /// A new empty store. A zero `default_ttl` means entries never expire.
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            store: Arc::new(Store {
                entries: DashMap::new(),
                default_ttl: (!default_ttl.is_zero()).then_some(default_ttl),
            }),
        }
    }

    /// Number of stored entries (expired ones included until purged).
    pub fn len(&self) -> usize {
        self.store.entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.store.entries.is_empty()
    }
}

impl Default for MemoryCacheManager {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

/// A leased handle onto the store.
#[derive(Debug)]
pub struct CacheConnection {
    store: Option<Arc<Store>>,
}

impl CacheConnection {
    fn store(&self) -> Result<&Store> {
        self.store
            .as_deref()
            .ok_or_else(|| PoolError::Cache(CacheError::Closed.to_string()))
    }

    /// Detach from the store; later operations fail and the pool treats
    /// the connection as broken.
    pub fn close(&mut self) {
        self.store = None;
    }
}

impl CacheBackend for CacheConnection {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        let store = self.store()?;
        let now = Instant::now();
        match store.entries.get(key) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => {}
        }
        let _ = store.entries.remove_if(key, |_, e| e.is_expired(now));
        Ok(None)
    }

    fn set(&mut self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let store = self.store()?;
        let ttl = ttl.filter(|t| !t.is_zero()).or(store.default_ttl);
        let entry = Entry {
            value,
            expires_at: ttl.map(|t| Instant::now() + t),
        };
        let _ = store.entries.insert(key.to_owned(), entry);
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<bool> {
        Ok(self.store()?.entries.remove(key).is_some())
    }
}

impl r2d2::ManageConnection for MemoryCacheManager {
    type Connection = CacheConnection;
    type Error = CacheError;

    fn connect(&self) -> std::result::Result<CacheConnection, CacheError> {
        Ok(CacheConnection {
            store: Some(Arc::clone(&self.store)),
        })
    }

    fn is_valid(&self, conn: &mut CacheConnection) -> std::result::Result<(), CacheError> {
        let store = conn.store.as_ref().ok_or(CacheError::Closed)?;
        let _ = store.purge_expired();
        Ok(())
    }

    fn has_broken(&self, conn: &mut CacheConnection) -> bool {
        conn.store.is_none()
    }
}
