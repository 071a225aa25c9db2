//! Pooled embedded-SQLite runtime.
//!
//! This crate provides the core execution primitives for a connection-pool
//! backed SQLite access layer: a cancellable mutex and generic object pool
//! ([`mutex`], [`pool`]), a hot-path named-parameter SQL parser
//! ([`sql_parser`]), an insertion-ordered string-keyed cache used to
//! memoise parsed statements ([`fast_map`]), a zeroising encryption key
//! ([`key`]), validated pool/datasource configuration ([`config`]), and the
//! `DataSource`/pooled-connection layer that ties them together
//! ([`connection`], [`datasource`]).
//!
//! Nothing here spawns an async runtime: borrowing and returning objects is
//! a synchronous, blocking operation by design, matching SQLite's own
//! single-writer concurrency model.

pub mod config;
pub mod connection;
pub mod datasource;
pub mod error;
pub mod fast_map;
pub mod key;
pub mod mutex;
pub mod pool;
pub mod sql_parser;

pub use config::{DataSourceConfig, JournalMode, PoolConfig};
pub use connection::PooledConnection;
pub use datasource::DataSource;
pub use error::{Error, Result};
pub use key::Key;
pub use sql_parser::{parse_named_parameters, ParamMap};
