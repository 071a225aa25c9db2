//! `DataSource`: owns a database's connection pool and encryption key, and
//! deduplicates instances across a process by configuration (spec
//! component C9).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock, Weak};

use tracing::info;

use crate::config::DataSourceConfig;
use crate::connection::PooledConnection;
use crate::error::{Error, Result};
use crate::key::Key;
use crate::pool::{Borrowed, CommonObjectPool, ObjectFactory, ObjectPool, SingleObjectPool};

const STATEMENT_CACHE_CAPACITY: usize = 64;
const PARAM_CACHE_CAPACITY: usize = 64;

/// Opaque factory type parameterising the [`Borrowed`] handles returned by
/// [`DataSource::connection`] and [`DataSource::writer`]. Not constructible
/// outside this module.
pub struct ConnectionFactory {
    config: DataSourceConfig,
    key: Option<Key>,
    tag_counter: AtomicUsize,
}

impl ConnectionFactory {
    fn make(&self, primary: bool) -> Result<PooledConnection> {
        let mut config = self.config.clone();
        config.key = self
            .key
            .as_ref()
            .map(|key| key.use_key(|bytes| bytes.to_vec()));
        let tag = format!(
            "{}#{}",
            if primary { "primary" } else { "reader" },
            self.tag_counter.fetch_add(1, Ordering::Relaxed)
        );
        PooledConnection::open(
            &config,
            tag,
            primary,
            STATEMENT_CACHE_CAPACITY,
            PARAM_CACHE_CAPACITY,
        )
    }
}

impl ObjectFactory for ConnectionFactory {
    type Object = PooledConnection;

    fn make_primary(&self) -> Result<PooledConnection> {
        self.make(true)
    }

    fn make_object(&self) -> Result<PooledConnection> {
        self.make(false)
    }

    fn destroy(&self, obj: PooledConnection) {
        // `rusqlite::Connection` closes the native handle on drop.
        drop(obj);
    }

    fn close(&self) {
        if let Some(key) = &self.key {
            key.zero();
        }
    }
}

enum PoolKind {
    Single(SingleObjectPool<ConnectionFactory>),
    Common(Box<CommonObjectPool<ConnectionFactory>>),
}

impl PoolKind {
    fn borrow_for(&self, primary_hint: bool) -> Result<Borrowed<'_, ConnectionFactory>> {
        match self {
            PoolKind::Single(pool) => pool.borrow_for(primary_hint),
            PoolKind::Common(pool) => pool.borrow_for(primary_hint),
        }
    }

    fn close(&self) {
        match self {
            PoolKind::Single(pool) => pool.close(),
            PoolKind::Common(pool) => pool.close(),
        }
    }

    fn evict_idle(&self) {
        match self {
            PoolKind::Single(pool) => pool.evict_idle(),
            PoolKind::Common(pool) => pool.evict_idle(),
        }
    }
}

/// A pooled handle onto one SQLite database, deduplicated per
/// [`DataSourceConfig::cache_key`] within a process.
pub struct DataSource {
    config: DataSourceConfig,
    pool: PoolKind,
    closed: AtomicBool,
}

fn registry() -> &'static StdMutex<HashMap<String, Weak<DataSource>>> {
    static REGISTRY: OnceLock<StdMutex<HashMap<String, Weak<DataSource>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| StdMutex::new(HashMap::new()))
}

impl DataSource {
    /// Opens a fresh, unshared `DataSource`. Most callers should prefer
    /// [`DataSource::shared`], which deduplicates by configuration.
    pub fn open(mut config: DataSourceConfig) -> Result<Self> {
        config.validate()?;
        let key = config.key.take().map(|bytes| Key::from_bytes(&bytes));
        if config.encrypt && key.is_none() {
            return Err(Error::InvalidConfiguration {
                field: "key",
                reason: "encrypt = true requires a key".to_string(),
            });
        }

        let factory = ConnectionFactory {
            config: config.clone(),
            key,
            tag_counter: AtomicUsize::new(0),
        };

        let pool = if config.pool_size == 1 {
            PoolKind::Single(SingleObjectPool::new(
                factory,
                Some(std::time::Duration::from_secs(10)),
            ))
        } else {
            let pool_config = crate::config::PoolConfig {
                max_size: config.pool_size,
                primary_budget: 1,
                eviction_delay: std::time::Duration::from_secs(30),
                eviction_interval: Some(std::time::Duration::from_secs(10)),
            };
            PoolKind::Common(Box::new(CommonObjectPool::new(factory, pool_config)))
        };

        info!(path = %config.path, pool_size = config.pool_size, "opened data source");

        Ok(Self {
            config,
            pool,
            closed: AtomicBool::new(false),
        })
    }

    /// Parses `jdbc:sqlite:<path>[?k=v(&k=v)*]` plus an overriding property
    /// bag, then opens the resulting configuration (spec §4.6/§6).
    pub fn open_url(url: &str, properties: &HashMap<String, String>) -> Result<Self> {
        Self::open(DataSourceConfig::from_url(url, properties)?)
    }

    /// Returns the existing `DataSource` for an identical configuration if
    /// one is still alive in this process, otherwise opens and registers a
    /// new one. Deduplication key is [`DataSourceConfig::cache_key`].
    pub fn shared(config: DataSourceConfig) -> Result<Arc<Self>> {
        let key = config.cache_key();
        let mut map = registry()
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(existing) = map.get(&key).and_then(Weak::upgrade) {
            return Ok(existing);
        }
        let opened = Arc::new(Self::open(config)?);
        map.insert(key, Arc::downgrade(&opened));
        Ok(opened)
    }

    #[must_use]
    pub fn config(&self) -> &DataSourceConfig {
        &self.config
    }

    /// Borrows a secondary (reader) connection, suspending the caller if
    /// none is immediately available.
    pub fn connection(&self) -> Result<Borrowed<'_, ConnectionFactory>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::AlreadyClosed);
        }
        self.pool.borrow_for(false)
    }

    /// Borrows the primary (writer) connection.
    pub fn writer(&self) -> Result<Borrowed<'_, ConnectionFactory>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::AlreadyClosed);
        }
        self.pool.borrow_for(true)
    }

    /// Runs one background eviction pass over idle connections.
    pub fn evict_idle(&self) {
        self.pool.evict_idle();
    }

    /// Idempotently closes the pool and zeroes the encryption key, if any.
    /// Only affects this handle; see [`DataSource::close_all`] to close
    /// every cached database in the process's registry at once.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.pool.close();
        info!(path = %self.config.path, "closed data source");
        Ok(())
    }

    /// Closes every database still cached by [`DataSource::shared`],
    /// clearing the registry so later calls to `shared` open fresh
    /// instances. The first failure becomes the returned error's primary
    /// cause; any further failures are attached as suppressed causes rather
    /// than discarded.
    pub fn close_all() -> Result<()> {
        let mut map = registry()
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let entries = std::mem::take(&mut *map);
        drop(map);

        let mut errors = Vec::new();
        for (_, weak) in entries {
            if let Some(ds) = weak.upgrade()
                && let Err(e) = ds.close()
            {
                errors.push(e);
            }
        }
        Error::aggregate(errors).map_or(Ok(()), Err)
    }
}

impl Drop for DataSource {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, path = %self.config.path, "failed to close data source on drop");
        }
    }
}
