//! Pooled SQLite connection with named-parameter statement caching (spec
//! component C8).
//!
//! Two independent caches sit in front of every query:
//!
//! 1. `rusqlite`'s own prepared-statement cache (`prepare_cached`), an LRU
//!    over native `sqlite3_stmt` handles.
//! 2. This module's [`FastLinkedStringMap`], caching the *parsed parameter
//!    map* for each distinct SQL string, so that binding named parameters
//!    on a cache hit costs one hash lookup plus `O(params)` positional
//!    binds rather than re-scanning the SQL text and asking SQLite to
//!    resolve each name with `sqlite3_bind_parameter_index`.
//!
//! Caching native `sqlite3_stmt` handles ourselves would require either
//! `unsafe` raw FFI juggling or a self-referential struct (an owned
//! `Connection` next to `Statement<'_>` values borrowed from it); `rusqlite`
//! already solves that safely, so we delegate to it and reserve our own
//! cache for the part `rusqlite` doesn't do: parameter-name resolution.

use rusqlite::types::ToSql;
use rusqlite::Row;
use tracing::{debug, warn};

use crate::config::DataSourceConfig;
use crate::error::{Error, Result};
use crate::fast_map::FastLinkedStringMap;
use crate::key::KEY_LEN;
use crate::pool::PooledObject;
use crate::sql_parser::{parse_named_parameters, ParamMap};

type ParamCache = FastLinkedStringMap<ParamMap, fn(Box<str>, ParamMap)>;

fn new_param_cache(capacity: usize) -> ParamCache {
    FastLinkedStringMap::new(capacity, (|_key, _value| {}) as fn(Box<str>, ParamMap))
}

/// A single pooled SQLite connection: either the pool's primary (writer) or
/// one of its secondary (reader) handles.
pub struct PooledConnection {
    conn: rusqlite::Connection,
    tag: String,
    primary: bool,
    param_cache: ParamCache,
}

impl PooledConnection {
    pub(crate) fn open(
        config: &DataSourceConfig,
        tag: String,
        primary: bool,
        statement_cache_capacity: usize,
        param_cache_capacity: usize,
    ) -> Result<Self> {
        let conn = rusqlite::Connection::open(&config.path)?;
        conn.set_prepared_statement_cache_capacity(statement_cache_capacity);

        if config.encrypt {
            let key = config
                .key
                .as_ref()
                .ok_or_else(|| Error::InvalidConfiguration {
                    field: "key",
                    reason: "encrypt = true requires a key".to_string(),
                })?;
            if key.len() != KEY_LEN {
                return Err(Error::InvalidConfiguration {
                    field: "key",
                    reason: format!("expected {KEY_LEN} bytes, got {}", key.len()),
                });
            }
            let hex: String = key.iter().map(|b| format!("{b:02x}")).collect();
            conn.pragma_update(None, "key", format!("x'{hex}'"))?;
        }

        conn.pragma_update(None, "journal_mode", config.journal_mode.as_pragma_value())?;
        conn.busy_timeout(config.busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", config.foreign_keys)?;

        debug!(tag = %tag, primary, path = %config.path, "opened pooled connection");

        Ok(Self {
            conn,
            tag,
            primary,
            param_cache: new_param_cache(param_cache_capacity),
        })
    }

    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The parsed parameter map for `sql`, served from cache on repeat calls
    /// with the identical SQL text.
    fn param_map_for(&mut self, sql: &str) -> ParamMap {
        if let Some(cached) = self.param_cache.get(sql) {
            return cached.clone();
        }
        let map = parse_named_parameters(sql);
        self.param_cache.insert(sql, map.clone());
        map
    }

    /// Executes `sql` (a statement with no result rows) binding each of
    /// `named_params` by its first-occurrence position in `sql`, looked up
    /// through the cached [`ParamMap`] rather than `rusqlite`'s own
    /// by-name resolution.
    pub fn execute(&mut self, sql: &str, named_params: &[(&str, &dyn ToSql)]) -> Result<usize> {
        let map = self.param_map_for(sql);
        let mut stmt = self.conn.prepare_cached(sql)?;
        for (name, value) in named_params {
            if let Some(position) = map.get(name) {
                stmt.raw_bind_parameter(position as usize, value)?;
            }
        }
        Ok(stmt.raw_execute()?)
    }

    /// Executes `sql` (expected to return at most one row) and maps it with
    /// `row_fn`, using the same cached parameter resolution as [`Self::execute`].
    pub fn query_row<T>(
        &mut self,
        sql: &str,
        named_params: &[(&str, &dyn ToSql)],
        row_fn: impl FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let map = self.param_map_for(sql);
        let mut stmt = self.conn.prepare_cached(sql)?;
        for (name, value) in named_params {
            if let Some(position) = map.get(name) {
                stmt.raw_bind_parameter(position as usize, value)?;
            }
        }
        let mut rows = stmt.raw_query();
        let row = rows
            .next()?
            .ok_or_else(|| Error::InvalidArgument(format!("no row returned for {sql:?}")))?;
        Ok(row_fn(row)?)
    }

    /// Direct access for callers who need a query shape this module does
    /// not wrap (multi-row iteration, DDL, `EXPLAIN`, etc). Bypasses the
    /// parameter-map cache entirely.
    #[must_use]
    pub fn raw(&self) -> &rusqlite::Connection {
        &self.conn
    }
}

impl PooledObject for PooledConnection {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn is_primary(&self) -> bool {
        self.primary
    }

    fn release_memory(&self) {
        if let Err(err) = self.conn.execute_batch("PRAGMA shrink_memory;") {
            warn!(tag = %self.tag, %err, "shrink_memory pragma failed");
        }
    }
}
