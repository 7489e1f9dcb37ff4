//! End-to-end scenario: an explicit transaction that inserts rows and then
//! rolls back must leave no trace, and a committed transaction alongside it
//! must still be visible.

use stratumdb::config::EngineConfig;
use stratumdb::engine::Engine;
use stratumdb::txn::IsolationLevel;
use stratumdb::value::Value;

fn test_engine() -> (Engine, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        data_directory: dir.path().to_path_buf(),
        log_directory: dir.path().to_path_buf(),
        ..EngineConfig::default()
    };
    (Engine::bootstrap(config).unwrap(), dir)
}

#[test]
fn aborted_insert_is_invisible_after_rollback() {
    let (engine, _dir) = test_engine();
    engine.execute_autocommit("CREATE TABLE t (id INT)").unwrap();

    let txn = engine.begin(IsolationLevel::ReadCommitted);
    engine.execute_in(&txn, "INSERT INTO t VALUES (1)").unwrap();
    engine.execute_in(&txn, "INSERT INTO t VALUES (2)").unwrap();
    engine.abort(&txn).unwrap();

    let result = engine.execute_autocommit("SELECT id FROM t").unwrap();
    assert!(result.rows.is_empty());
}

#[test]
fn committed_rows_survive_a_sibling_rollback() {
    let (engine, _dir) = test_engine();
    engine.execute_autocommit("CREATE TABLE t (id INT)").unwrap();
    engine.execute_autocommit("INSERT INTO t VALUES (1)").unwrap();

    let txn = engine.begin(IsolationLevel::ReadCommitted);
    engine.execute_in(&txn, "INSERT INTO t VALUES (2)").unwrap();
    engine.abort(&txn).unwrap();

    let result = engine.execute_autocommit("SELECT id FROM t").unwrap();
    assert_eq!(result.rows, vec![vec![Value::I32(1)]]);
}

#[test]
fn update_then_rollback_restores_the_old_value() {
    let (engine, _dir) = test_engine();
    engine.execute_autocommit("CREATE TABLE t (id INT, v INT)").unwrap();
    engine.execute_autocommit("INSERT INTO t VALUES (1, 10)").unwrap();

    let txn = engine.begin(IsolationLevel::ReadCommitted);
    engine.execute_in(&txn, "UPDATE t SET v = 99 WHERE id = 1").unwrap();
    engine.abort(&txn).unwrap();

    let result = engine.execute_autocommit("SELECT v FROM t WHERE id = 1").unwrap();
    assert_eq!(result.rows, vec![vec![Value::I32(10)]]);
}
