//! End-to-end exercise of the `DataSource` surface against real, on-disk
//! SQLite files: URL parsing, pool caching, concurrent readers plus a
//! serialised writer, and close-then-reject semantics.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use selekt_core::DataSource;

fn temp_db_path(tempdir: &tempfile::TempDir, name: &str) -> String {
    tempdir.path().join(name).to_string_lossy().into_owned()
}

#[test]
fn writer_and_readers_see_each_others_commits() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_db_path(&dir, "app.db");
    let mut props = HashMap::new();
    props.insert("poolSize".to_string(), "4".to_string());
    props.insert("journalMode".to_string(), "WAL".to_string());

    let ds = DataSource::open_url(&format!("jdbc:sqlite:{path}"), &props).unwrap();

    {
        let writer = ds.writer().unwrap();
        writer
            .raw()
            .execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
            .unwrap();
    }
    {
        let mut writer = ds.writer().unwrap();
        let affected = writer
            .execute(
                "INSERT INTO t (id, name) VALUES (:id, :name)",
                &[(":id", &1i64), (":name", &"ada")],
            )
            .unwrap();
        assert_eq!(affected, 1);
    }

    let reader = ds.connection().unwrap();
    let name: String = reader
        .raw()
        .query_row("SELECT name FROM t WHERE id = 1", [], |row| row.get(0))
        .unwrap();
    assert_eq!(name, "ada");
}

#[test]
fn concurrent_readers_each_get_a_distinct_connection() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_db_path(&dir, "concurrent.db");
    let mut props = HashMap::new();
    props.insert("poolSize".to_string(), "4".to_string());

    let ds = Arc::new(DataSource::open_url(&format!("jdbc:sqlite:{path}"), &props).unwrap());
    ds.writer()
        .unwrap()
        .raw()
        .execute_batch("CREATE TABLE t (id INTEGER)")
        .unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let ds = Arc::clone(&ds);
            thread::spawn(move || {
                let conn = ds.connection().unwrap();
                let count: i64 = conn
                    .raw()
                    .query_row("SELECT count(*) FROM t", [], |row| row.get(0))
                    .unwrap();
                count
            })
        })
        .collect();

    for h in handles {
        assert_eq!(h.join().unwrap(), 0);
    }
}

#[test]
fn shared_datasources_share_one_pool_across_handles() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_db_path(&dir, "shared.db");
    let mut props = HashMap::new();
    props.insert("poolSize".to_string(), "2".to_string());
    let url = format!("jdbc:sqlite:{path}");

    let cfg_a = selekt_core::DataSourceConfig::from_url(&url, &props).unwrap();
    let cfg_b = selekt_core::DataSourceConfig::from_url(&url, &props).unwrap();

    let a = DataSource::shared(cfg_a).unwrap();
    let b = DataSource::shared(cfg_b).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
}

#[test]
fn close_rejects_subsequent_borrows_and_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_db_path(&dir, "closing.db");
    let ds = DataSource::open_url(&format!("jdbc:sqlite:{path}"), &HashMap::new()).unwrap();

    ds.writer().unwrap();
    ds.close().unwrap();
    ds.close().unwrap();

    assert!(ds.connection().is_err());
    assert!(ds.writer().is_err());
}

#[test]
fn hex_key_round_trips_through_an_encrypted_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_db_path(&dir, "enc.db");
    let mut props = HashMap::new();
    props.insert("encrypt".to_string(), "true".to_string());
    props.insert("key".to_string(), "0x".to_string() + &"ab".repeat(32));

    let ds = DataSource::open_url(&format!("jdbc:sqlite:{path}"), &props).unwrap();
    let writer = ds.writer().unwrap();
    writer
        .raw()
        .execute_batch("CREATE TABLE t (id INTEGER)")
        .unwrap();
}

/// Only meaningful with the `sqlcipher` feature: plain bundled SQLite
/// silently ignores an unrecognized `key` pragma, so this is the one test
/// that actually exercises libsqlcipher's hex-key parsing rather than just
/// asserting that opening the database didn't error.
#[test]
#[cfg(feature = "sqlcipher")]
fn hex_key_actually_encrypts_and_wrong_key_cannot_read_it_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = temp_db_path(&dir, "enc_real.db");
    let hex_key = "0x".to_string() + &"ab".repeat(32);

    let mut props = HashMap::new();
    props.insert("encrypt".to_string(), "true".to_string());
    props.insert("key".to_string(), hex_key.clone());
    {
        let ds = DataSource::open_url(&format!("jdbc:sqlite:{path}"), &props).unwrap();
        let writer = ds.writer().unwrap();
        writer
            .raw()
            .execute_batch("CREATE TABLE t (id INTEGER); INSERT INTO t VALUES (42)")
            .unwrap();
        ds.close().unwrap();
    }

    // Reopening with the same key must read the row back.
    let ds = DataSource::open_url(&format!("jdbc:sqlite:{path}"), &props).unwrap();
    let id: i64 = ds
        .connection()
        .unwrap()
        .raw()
        .query_row("SELECT id FROM t", [], |row| row.get(0))
        .unwrap();
    assert_eq!(id, 42);
    ds.close().unwrap();

    // Reopening with the wrong key must not be able to read the table. The
    // mismatch is caught as soon as a connection is opened against it (the
    // very first pragma already has to read page 1), not just on query.
    let mut wrong_props = HashMap::new();
    wrong_props.insert("encrypt".to_string(), "true".to_string());
    wrong_props.insert("key".to_string(), "0x".to_string() + &"cd".repeat(32));
    let wrong_path = path.clone();
    let ds_wrong = DataSource::open_url(&format!("jdbc:sqlite:{wrong_path}"), &wrong_props).unwrap();
    assert!(
        ds_wrong.connection().is_err(),
        "wrong key must not decrypt the database"
    );
}
