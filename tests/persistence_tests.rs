// Snapshot persistence: round trips, missing and malformed files, and the
// save-on-shutdown / load-on-start lifecycle.

use std::fs;

use memkv::{Config, Db, Reply};

fn config_at(dir: &tempfile::TempDir) -> Config {
    Config::new()
        .hash_seed(7)
        .persistence_filepath(dir.path().join("db.json"))
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn save_flushall_reload_restores_the_dataset() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Db::start(config_at(&dir)).expect("db starts");

    db.command("SET author cch137");
    db.command("RPUSH list1 a b c d e f g");
    db.command("ZADD scores 1 alice");
    db.command("ZADD scores 2.5 bob");
    assert_eq!(db.command("SAVE"), Reply::Bool(true));
    assert_eq!(db.command("FLUSHALL"), Reply::Bool(true));
    assert_eq!(db.command("KEYS *"), Reply::List(Vec::new()));

    // a fresh handle loads the snapshot taken before the flush
    let db = Db::start(config_at(&dir)).expect("db restarts");
    assert_eq!(db.command("GET author"), Reply::Str("cch137".to_string()));
    assert_eq!(
        db.command("LRANGE list1 0 -1"),
        Reply::List(strings(&["a", "b", "c", "d", "e", "f", "g"]))
    );
    assert_eq!(db.command("ZCARD scores"), Reply::UInt(2));
    assert_eq!(db.command("ZSCORE scores bob"), Reply::Double(2.5));
    assert_eq!(db.command("ZRANK scores alice"), Reply::UInt(0));
}

#[test]
fn missing_snapshot_starts_empty() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Db::start(config_at(&dir)).expect("db starts");
    assert_eq!(db.command("KEYS *"), Reply::List(Vec::new()));
}

#[test]
fn malformed_snapshot_starts_empty() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(dir.path().join("db.json"), "this is not json {").expect("write");
    let db = Db::start(config_at(&dir)).expect("db starts");
    assert_eq!(db.command("KEYS *"), Reply::List(Vec::new()));
    // the store still works after ignoring the bad file
    assert_eq!(db.command("SET k v"), Reply::Bool(true));
}

#[test]
fn shutdown_saves_implicitly() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut db = Db::start(config_at(&dir)).expect("db starts");
    db.command("SET persisted yes");
    assert_eq!(db.command("SHUTDOWN"), Reply::Bool(true));
    db.stop().expect("stop");

    let db = Db::start(config_at(&dir)).expect("db restarts");
    assert_eq!(db.command("GET persisted"), Reply::Str("yes".to_string()));
}

#[test]
fn snapshot_is_a_json_object_keyed_by_key() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Db::start(config_at(&dir)).expect("db starts");
    db.command("SET s hello");
    db.command("RPUSH l x y");
    db.command("ZADD z 1.5 m");
    assert_eq!(db.command("SAVE"), Reply::Bool(true));
    drop(db);

    let raw = fs::read_to_string(dir.path().join("db.json")).expect("snapshot exists");
    let doc: serde_json::Value = serde_json::from_str(&raw).expect("valid json");
    assert_eq!(doc["s"], serde_json::json!("hello"));
    assert_eq!(doc["l"], serde_json::json!(["x", "y"]));
    assert_eq!(doc["z"], serde_json::json!({ "m": 1.5 }));
}

#[test]
fn empty_list_and_empty_zset_stay_distinct_across_a_roundtrip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Db::start(config_at(&dir)).expect("db starts");
    db.command("RPUSH l only");
    db.command("LPOP l 1");
    db.command("ZADD z 1 only");
    db.command("ZREM z only");
    assert_eq!(db.command("SAVE"), Reply::Bool(true));
    drop(db);

    let db = Db::start(config_at(&dir)).expect("db restarts");
    // a list op on the reloaded empty list works, a zset op on it does not
    assert_eq!(db.command("LLEN l"), Reply::UInt(0));
    assert_eq!(db.command("ZCARD z"), Reply::UInt(0));
    assert_eq!(db.command("RPUSH l again"), Reply::UInt(1));
    assert_eq!(db.command("ZADD z 2 again"), Reply::UInt(1));
}

#[test]
fn save_roundtrip_preserves_scores_exactly() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Db::start(config_at(&dir)).expect("db starts");
    db.command("ZADD z 0.1 a");
    db.command("ZADD z -3.25 b");
    db.command("ZADD z 1000000 c");
    assert_eq!(db.command("SAVE"), Reply::Bool(true));
    drop(db);

    let db = Db::start(config_at(&dir)).expect("db restarts");
    assert_eq!(db.command("ZSCORE z a"), Reply::Double(0.1));
    assert_eq!(db.command("ZSCORE z b"), Reply::Double(-3.25));
    assert_eq!(db.command("ZSCORE z c"), Reply::Double(1_000_000.0));
    // negative scores order before positive ones
    assert_eq!(db.command("ZRANK z b"), Reply::UInt(0));
}
