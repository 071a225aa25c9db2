//! Pool and `DataSource` configuration, validated at construction time
//! rather than deep inside the pool (spec §6 "Configuration invariants").

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::error::Error;

/// Value type configuring a [`crate::pool::CommonObjectPool`] or
/// [`crate::pool::SingleObjectPool`].
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Maximum number of live objects, N ≥ 1.
    pub max_size: usize,
    /// Primary budget P, 1 ≤ P ≤ N. Typically 1 for SQLite WAL write
    /// serialisation.
    pub primary_budget: usize,
    /// An idle object is eligible for eviction once it has been idle at
    /// least this long.
    pub eviction_delay: Duration,
    /// How often the background eviction sweep runs. `None` disables
    /// scheduled eviction entirely (mirrors a negative interval in the
    /// source design).
    pub eviction_interval: Option<Duration>,
}

impl PoolConfig {
    /// Validates `max_size >= 1` and `1 <= primary_budget <= max_size`.
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_size == 0 {
            return Err(Error::InvalidConfiguration {
                field: "max_size",
                reason: "must be >= 1".to_string(),
            });
        }
        if self.primary_budget == 0 || self.primary_budget > self.max_size {
            return Err(Error::InvalidConfiguration {
                field: "primary_budget",
                reason: format!("must be between 1 and max_size ({})", self.max_size),
            });
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            primary_budget: 1,
            eviction_delay: Duration::from_secs(30),
            eviction_interval: Some(Duration::from_secs(10)),
        }
    }
}

/// SQLite journal mode, selecting defaults for other pragmas (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JournalMode {
    Delete,
    Truncate,
    Persist,
    Memory,
    #[default]
    Wal,
    Off,
}

impl JournalMode {
    #[must_use]
    pub fn as_pragma_value(self) -> &'static str {
        match self {
            JournalMode::Delete => "DELETE",
            JournalMode::Truncate => "TRUNCATE",
            JournalMode::Persist => "PERSIST",
            JournalMode::Memory => "MEMORY",
            JournalMode::Wal => "WAL",
            JournalMode::Off => "OFF",
        }
    }

    pub fn parse(value: &str) -> Result<Self, Error> {
        match value.to_ascii_uppercase().as_str() {
            "DELETE" => Ok(JournalMode::Delete),
            "TRUNCATE" => Ok(JournalMode::Truncate),
            "PERSIST" => Ok(JournalMode::Persist),
            "MEMORY" => Ok(JournalMode::Memory),
            "WAL" => Ok(JournalMode::Wal),
            "OFF" => Ok(JournalMode::Off),
            other => Err(Error::InvalidConfiguration {
                field: "journalMode",
                reason: format!("unrecognised journal mode {other:?}"),
            }),
        }
    }
}

/// Fully parsed, validated `DataSource` configuration (spec §4.6/§6).
#[derive(Debug, Clone)]
pub struct DataSourceConfig {
    pub path: String,
    pub encrypt: bool,
    pub key: Option<Vec<u8>>,
    pub pool_size: usize,
    pub busy_timeout: Duration,
    pub journal_mode: JournalMode,
    pub foreign_keys: bool,
}

impl DataSourceConfig {
    /// Canonicalised cache key: `<path>?<sorted k=v joined by &>`, used to
    /// deduplicate databases that share a configuration (spec §4.6).
    #[must_use]
    pub fn cache_key(&self) -> String {
        let mut pairs = [
            format!("encrypt={}", self.encrypt),
            format!("poolSize={}", self.pool_size),
            format!("busyTimeout={}", self.busy_timeout.as_millis()),
            format!("journalMode={}", self.journal_mode.as_pragma_value()),
            format!("foreignKeys={}", self.foreign_keys),
        ];
        pairs.sort_unstable();
        format!("{}?{}", self.path, pairs.join("&"))
    }

    /// Validates the invariants spec.md §6 checks at construction:
    /// `poolSize > 0` and `busyTimeout >= 0` (the latter is implied here by
    /// `Duration` being unsigned; only `poolSize` needs an explicit check).
    pub fn validate(&self) -> Result<(), Error> {
        if self.pool_size == 0 {
            return Err(Error::InvalidConfiguration {
                field: "poolSize",
                reason: "must be > 0".to_string(),
            });
        }
        Ok(())
    }

    /// Parses a `jdbc:sqlite:<path>[?k=v(&k=v)*]` connection URL plus an
    /// overriding property bag (spec §4.6/§6). Properties present in both
    /// the URL query string and `overrides` resolve in favour of
    /// `overrides`, mirroring JDBC's `DriverManager.getConnection(url,
    /// properties)` precedence. Unrecognised keys are ignored at `debug`.
    pub fn from_url(url: &str, overrides: &HashMap<String, String>) -> Result<Self, Error> {
        const PREFIX: &str = "jdbc:sqlite:";
        let rest = url.strip_prefix(PREFIX).ok_or_else(|| Error::InvalidConfiguration {
            field: "url",
            reason: format!("expected a {PREFIX:?} URL, got {url:?}"),
        })?;

        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, query),
            None => (rest, ""),
        };

        let mut props: HashMap<String, String> = HashMap::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some((k, v)) => {
                    props.insert(k.to_string(), v.to_string());
                }
                None => {
                    props.insert(pair.to_string(), String::new());
                }
            }
        }
        for (k, v) in overrides {
            props.insert(k.clone(), v.clone());
        }

        let mut config = DataSourceConfig {
            path: path.to_string(),
            encrypt: false,
            key: None,
            pool_size: 10,
            busy_timeout: Duration::from_millis(0),
            journal_mode: JournalMode::Wal,
            foreign_keys: true,
        };

        for (key, value) in props {
            match key.as_str() {
                "encrypt" => {
                    config.encrypt = parse_bool(&value)?;
                }
                "key" => {
                    config.key = Some(parse_key_source(&value)?);
                }
                "poolSize" => {
                    config.pool_size = value.parse::<usize>().map_err(|_| {
                        Error::InvalidConfiguration {
                            field: "poolSize",
                            reason: format!("not a positive integer: {value:?}"),
                        }
                    })?;
                }
                "busyTimeout" => {
                    let millis = value.parse::<u64>().map_err(|_| {
                        Error::InvalidConfiguration {
                            field: "busyTimeout",
                            reason: format!("not a non-negative integer: {value:?}"),
                        }
                    })?;
                    config.busy_timeout = Duration::from_millis(millis);
                }
                "journalMode" => {
                    config.journal_mode = JournalMode::parse(&value)?;
                }
                "foreignKeys" => {
                    config.foreign_keys = parse_bool(&value)?;
                }
                other => {
                    debug!(property = other, "ignoring unrecognised DataSource property");
                }
            }
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_bool(value: &str) -> Result<bool, Error> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(Error::InvalidConfiguration {
            field: "<bool property>",
            reason: format!("not a boolean: {other:?}"),
        }),
    }
}

/// Resolves a `key` property's raw string form into key bytes (spec §4.6):
/// `0x`/`0X`-prefixed even-length hex decodes to bytes; a value naming an
/// existing regular file is read as that file's bytes; anything else is
/// encoded as UTF-8.
pub fn parse_key_source(raw: &str) -> Result<Vec<u8>, Error> {
    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        if hex.len() % 2 != 0 {
            return Err(Error::InvalidConfiguration {
                field: "key",
                reason: "hex-encoded key must have an even number of digits".to_string(),
            });
        }
        let mut bytes = Vec::with_capacity(hex.len() / 2);
        for chunk in hex.as_bytes().chunks(2) {
            let pair = std::str::from_utf8(chunk).unwrap_or("");
            let byte = u8::from_str_radix(pair, 16).map_err(|_| Error::InvalidConfiguration {
                field: "key",
                reason: format!("invalid hex digit pair {pair:?}"),
            })?;
            bytes.push(byte);
        }
        return Ok(bytes);
    }

    let path = Path::new(raw);
    if path.is_file() {
        return Ok(std::fs::read(path)?);
    }

    Ok(raw.as_bytes().to_vec())
}
