//! End-to-end scenario: two transactions that each hold a row lock the
//! other wants form a cycle in the lock manager's wait-for graph; the
//! background detector must abort one of them so the other can proceed.

use std::sync::Arc;
use std::time::Duration;

use stratumdb::config::EngineConfig;
use stratumdb::engine::Engine;
use stratumdb::rid::Rid;
use stratumdb::txn::{IsolationLevel, LockMode};

fn test_engine() -> (Arc<Engine>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        data_directory: dir.path().to_path_buf(),
        log_directory: dir.path().to_path_buf(),
        ..EngineConfig::default()
    };
    (Arc::new(Engine::bootstrap(config).unwrap()), dir)
}

#[test]
fn a_lock_cycle_is_broken_by_aborting_one_side() {
    let (engine, _dir) = test_engine();
    let table_oid = 1u32;
    let row_a = Rid::new(1, 0);
    let row_b = Rid::new(1, 1);

    let t1 = engine.begin(IsolationLevel::ReadCommitted);
    let t2 = engine.begin(IsolationLevel::ReadCommitted);

    engine.lock_manager.lock_table(&t1, LockMode::IntentionExclusive, table_oid).unwrap();
    engine.lock_manager.lock_table(&t2, LockMode::IntentionExclusive, table_oid).unwrap();
    engine.lock_manager.lock_row(&t1, LockMode::Exclusive, table_oid, row_a).unwrap();
    engine.lock_manager.lock_row(&t2, LockMode::Exclusive, table_oid, row_b).unwrap();

    // t1 waits on row_b (held by t2); t2 waits on row_a (held by t1): a cycle.
    // Whichever side the detector marks as victim must itself call `abort`
    // to release its held locks, same as a real client reacting to a
    // concurrency error - the detector only flips the transaction's state.
    let engine_for_t2 = Arc::clone(&engine);
    let t2_for_thread = Arc::clone(&t2);
    let waiter = std::thread::spawn(move || {
        let outcome = engine_for_t2.lock_manager.lock_row(&t2_for_thread, LockMode::Exclusive, table_oid, row_a);
        if outcome.is_err() {
            let _ = engine_for_t2.abort(&t2_for_thread);
        }
        outcome
    });

    std::thread::sleep(Duration::from_millis(20));
    let outcome = engine.lock_manager.lock_row(&t1, LockMode::Exclusive, table_oid, row_b);
    if outcome.is_err() {
        engine.abort(&t1).unwrap();
    }

    // Whichever side the detector picks as victim fails to acquire the
    // lock; the other succeeds once the victim releases its locks. Exactly
    // one of the two must win.
    let t1_won = outcome.is_ok();
    let t2_won = waiter.join().unwrap().is_ok();
    assert!(t1_won != t2_won, "exactly one side of the cycle should win the lock");

    if t1_won {
        assert!(t2.is_aborted());
        engine.commit(&t1).unwrap();
    } else {
        assert!(t1.is_aborted());
        engine.commit(&t2).unwrap();
    }
}
