//! `Engine` — the owned facade tying storage, WAL, locking, and SQL
//! together: every subsystem is an explicit field, constructed once in
//! `Engine::open` and handed around as `Arc`s, never reached through a
//! process-wide static.

use std::sync::Arc;

use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::sql::executor::{ExecContext, QueryResult};
use crate::storage::buffer_pool::BufferPool;
use crate::storage::disk_manager::DiskManager;
use crate::txn::{DeadlockDetector, IsolationLevel, LockManager, Transaction, TransactionManager};
use crate::wal::log_manager::LogManager;
use crate::wal::recovery;

pub struct Engine {
    pub config: EngineConfig,
    pub buffer_pool: Arc<BufferPool>,
    pub log_manager: Arc<LogManager>,
    pub lock_manager: Arc<LockManager>,
    pub catalog: Arc<Catalog>,
    pub transaction_manager: Arc<TransactionManager>,
    pub deadlock_detector: Arc<DeadlockDetector>,
    exec_ctx: Arc<ExecContext>,
}

impl Engine {
    /// Open (or create) the database at `config.data_directory`, replaying
    /// the WAL before anything else runs.
    pub fn open(config: EngineConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_directory)?;
        std::fs::create_dir_all(&config.log_directory)?;

        let disk_manager = DiskManager::open(config.database_file())?;
        let buffer_pool = Arc::new(BufferPool::new(config.buffer_pool_frames, disk_manager));
        let log_manager = LogManager::open(config.log_file())?;
        buffer_pool.attach_log_manager(Arc::clone(&log_manager));

        recovery::recover(&config.log_file(), &buffer_pool, &log_manager)?;

        let catalog = Arc::new(Catalog::open(Arc::clone(&buffer_pool))?);
        let lock_manager = Arc::new(LockManager::new());
        let transaction_manager =
            TransactionManager::new(Arc::clone(&buffer_pool), Arc::clone(&log_manager), Arc::clone(&lock_manager));
        let deadlock_detector = DeadlockDetector::spawn(Arc::clone(&lock_manager), Arc::clone(&transaction_manager));

        let exec_ctx = Arc::new(ExecContext::new(
            Arc::clone(&catalog),
            Arc::clone(&buffer_pool),
            Arc::clone(&log_manager),
            Arc::clone(&lock_manager),
        ));

        Ok(Self {
            config,
            buffer_pool,
            log_manager,
            lock_manager,
            catalog,
            transaction_manager,
            deadlock_detector,
            exec_ctx,
        })
    }

    /// Bootstrap a brand new, empty database (no existing catalog on disk).
    /// Used by tests and by the CLI's fresh-start path.
    pub fn bootstrap(config: EngineConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_directory)?;
        std::fs::create_dir_all(&config.log_directory)?;

        let disk_manager = DiskManager::open(config.database_file())?;
        let buffer_pool = Arc::new(BufferPool::new(config.buffer_pool_frames, disk_manager));
        let log_manager = LogManager::open(config.log_file())?;
        buffer_pool.attach_log_manager(Arc::clone(&log_manager));

        let catalog = Arc::new(Catalog::bootstrap(Arc::clone(&buffer_pool))?);
        let lock_manager = Arc::new(LockManager::new());
        let transaction_manager =
            TransactionManager::new(Arc::clone(&buffer_pool), Arc::clone(&log_manager), Arc::clone(&lock_manager));
        let deadlock_detector = DeadlockDetector::spawn(Arc::clone(&lock_manager), Arc::clone(&transaction_manager));

        let exec_ctx = Arc::new(ExecContext::new(
            Arc::clone(&catalog),
            Arc::clone(&buffer_pool),
            Arc::clone(&log_manager),
            Arc::clone(&lock_manager),
        ));

        Ok(Self {
            config,
            buffer_pool,
            log_manager,
            lock_manager,
            catalog,
            transaction_manager,
            deadlock_detector,
            exec_ctx,
        })
    }

    pub fn begin(&self, isolation: IsolationLevel) -> Arc<Transaction> {
        self.transaction_manager.begin(isolation)
    }

    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<()> {
        self.transaction_manager.commit(txn)
    }

    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<()> {
        self.transaction_manager.abort(txn)
    }

    /// Run one statement inside an implicit transaction, committing on
    /// success and aborting on error. Statement-level autocommit, used by
    /// the CLI/server for any statement outside an explicit `BEGIN` block.
    pub fn execute_autocommit(&self, sql: &str) -> Result<QueryResult> {
        let txn = self.begin(IsolationLevel::ReadCommitted);
        match crate::sql::execute(&self.exec_ctx, &txn, sql) {
            Ok(result) => {
                self.commit(&txn)?;
                Ok(result)
            }
            Err(e) => {
                let _ = self.abort(&txn);
                Err(e)
            }
        }
    }

    /// Run one statement against an already-open transaction, for session
    /// handling of explicit `BEGIN ... COMMIT` blocks.
    pub fn execute_in(&self, txn: &Arc<Transaction>, sql: &str) -> Result<QueryResult> {
        crate::sql::execute(&self.exec_ctx, txn, sql)
    }

    /// Run an already-parsed statement (as cached by `PREPARE`) inside its
    /// own implicit transaction.
    pub fn execute_parsed_autocommit(&self, query: crate::sql::ast::ParsedQuery) -> Result<QueryResult> {
        let txn = self.begin(IsolationLevel::ReadCommitted);
        match crate::sql::execute_parsed(&self.exec_ctx, &txn, query) {
            Ok(result) => {
                self.commit(&txn)?;
                Ok(result)
            }
            Err(e) => {
                let _ = self.abort(&txn);
                Err(e)
            }
        }
    }

    /// Run an already-parsed statement against an already-open transaction.
    pub fn execute_parsed_in(&self, txn: &Arc<Transaction>, query: crate::sql::ast::ParsedQuery) -> Result<QueryResult> {
        crate::sql::execute_parsed(&self.exec_ctx, txn, query)
    }

    pub fn exec_context(&self) -> &Arc<ExecContext> {
        &self.exec_ctx
    }

    /// Flush all dirty pages and the WAL tail, then stop the background
    /// deadlock detector. Called on graceful shutdown (`SAVE DATABASE`/CLI
    /// exit).
    pub fn shutdown(&self) -> Result<()> {
        self.buffer_pool.flush_all_pages()?;
        self.log_manager.flush()?;
        self.log_manager.shutdown();
        self.deadlock_detector.shutdown();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, ColumnType};
    use crate::value::Value;

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
    fn create_insert_select_round_trip() {
        let (engine, _dir) = test_engine();
        engine.execute_autocommit("CREATE TABLE t (id INT PRIMARY KEY, v INT)").unwrap();
        engine.execute_autocommit("INSERT INTO t VALUES (1, 10), (2, 20)").unwrap();
        let result = engine.execute_autocommit("SELECT v FROM t WHERE id = 2").unwrap();
        assert_eq!(result.rows, vec![vec![Value::I32(20)]]);
    }

    #[test]
    fn explicit_transaction_rolls_back_on_abort() {
        let (engine, _dir) = test_engine();
        engine.catalog.create_table("t", vec![Column::new("v", ColumnType::I32, false)]).unwrap();

        let txn = engine.begin(IsolationLevel::ReadCommitted);
        engine.execute_in(&txn, "INSERT INTO t VALUES (1)").unwrap();
        engine.abort(&txn).unwrap();

        let result = engine.execute_autocommit("SELECT v FROM t").unwrap();
        assert!(result.rows.is_empty());
    }
}
