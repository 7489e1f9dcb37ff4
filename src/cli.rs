//! The embedded REPL: read SQL until a terminating `;` or a bare blank
//! line, run it, print the result. A handful of slash-free
//! directives (`EXIT`, `SAVE DATABASE`, `SET`) are intercepted before
//! reaching the SQL engine.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use log::warn;

use crate::engine::Engine;
use crate::error::Result;
use crate::sql::executor::QueryResult;
use crate::txn::{IsolationLevel, Transaction};

/// Exit code returned by [`run`] so `main` can pass it straight to
/// `std::process::exit`.
pub const EXIT_CLEAN: i32 = 0;
pub const EXIT_FATAL: i32 = 1;

pub struct Repl<R, W> {
    engine: Arc<Engine>,
    input: R,
    output: W,
    txn: Option<Arc<Transaction>>,
}

impl<R: BufRead, W: Write> Repl<R, W> {
    pub fn new(engine: Arc<Engine>, input: R, output: W) -> Self {
        Self { engine, input, output, txn: None }
    }

    /// Run the loop to completion, returning the process exit code.
    pub fn run(mut self) -> i32 {
        let mut buffer = String::new();
        loop {
            buffer.clear();
            if write!(self.output, "stratumdb> ").is_err() {
                return EXIT_FATAL;
            }
            let _ = self.output.flush();

            match self.read_statement(&mut buffer) {
                Ok(None) => return self.shutdown(EXIT_CLEAN),
                Ok(Some(())) => {}
                Err(e) => {
                    let _ = writeln!(self.output, "{}: {}", e.kind(), e);
                    return self.shutdown(EXIT_FATAL);
                }
            }

            let statement = buffer.trim();
            if statement.is_empty() {
                continue;
            }

            match self.dispatch(statement) {
                Ok(true) => return self.shutdown(EXIT_CLEAN),
                Ok(false) => {}
                Err(e) => {
                    let _ = writeln!(self.output, "{}: {}", e.kind(), e);
                }
            }
        }
    }

    fn shutdown(self, code: i32) -> i32 {
        if let Err(e) = self.engine.shutdown() {
            warn!("error during shutdown: {}", e);
            return EXIT_FATAL;
        }
        code
    }

    /// Read lines until one ends in `;` or EOF. Returns `Ok(None)` on EOF
    /// with nothing pending.
    fn read_statement(&mut self, buffer: &mut String) -> Result<Option<()>> {
        loop {
            let mut line = String::new();
            let n = self.input.read_line(&mut line)?;
            if n == 0 {
                return if buffer.trim().is_empty() { Ok(None) } else { Ok(Some(())) };
            }
            let trimmed = line.trim_end();
            buffer.push_str(trimmed);
            if trimmed.trim_end().ends_with(';') || trimmed.is_empty() {
                return Ok(Some(()));
            }
            buffer.push(' ');
        }
    }

    /// Handle one statement. Returns `Ok(true)` if the REPL should exit.
    fn dispatch(&mut self, statement: &str) -> Result<bool> {
        let statement = statement.trim_end_matches(';').trim();
        let upper = statement.to_uppercase();

        if upper == "EXIT" {
            return Ok(true);
        }
        if upper.starts_with("SAVE DATABASE") {
            let original = statement["SAVE DATABASE".len()..].trim();
            let path = original.trim_matches('\'').trim_matches('"');
            self.save_database(path)?;
            writeln!(self.output, "database saved to {}", path).ok();
            return Ok(false);
        }
        if let Some(rest) = statement.strip_prefix("SET ") {
            return self.handle_set(rest.trim());
        }
        if upper == "BEGIN" || upper.starts_with("BEGIN ") {
            let isolation = parse_isolation(&statement[5..].trim().to_uppercase());
            self.txn = Some(self.engine.begin(isolation));
            writeln!(self.output, "BEGIN").ok();
            return Ok(false);
        }
        if upper == "COMMIT" {
            if let Some(txn) = self.txn.take() {
                self.engine.commit(&txn)?;
                writeln!(self.output, "COMMIT").ok();
            } else {
                writeln!(self.output, "ConcurrencyError: no transaction is open").ok();
            }
            return Ok(false);
        }
        if upper == "ROLLBACK" {
            if let Some(txn) = self.txn.take() {
                self.engine.abort(&txn)?;
                writeln!(self.output, "ROLLBACK").ok();
            } else {
                writeln!(self.output, "ConcurrencyError: no transaction is open").ok();
            }
            return Ok(false);
        }

        let result = match &self.txn {
            Some(txn) => self.engine.execute_in(txn, statement)?,
            None => self.engine.execute_autocommit(statement)?,
        };
        self.print_result(&result);
        Ok(false)
    }

    /// Checkpoint (flush every dirty page and the WAL tail) then copy the
    /// on-disk database and log files to `dest`, so the snapshot taken is
    /// always consistent with what's been flushed.
    fn save_database(&self, dest: &str) -> Result<()> {
        self.engine.buffer_pool.flush_all_pages()?;
        self.engine.log_manager.flush()?;

        let dest_dir = std::path::Path::new(dest);
        std::fs::create_dir_all(dest_dir)?;
        std::fs::copy(self.engine.config.database_file(), dest_dir.join("stratum.db"))?;
        std::fs::copy(self.engine.config.log_file(), dest_dir.join("stratum.wal"))?;
        Ok(())
    }

    fn handle_set(&mut self, assignment: &str) -> Result<bool> {
        match assignment.split_once('=') {
            Some((param, value)) => {
                writeln!(self.output, "SET {} = {}", param.trim(), value.trim()).ok();
            }
            None => {
                writeln!(self.output, "ParseError: malformed SET, expected <param>=<value>").ok();
            }
        }
        Ok(false)
    }

    fn print_result(&mut self, result: &QueryResult) {
        if !result.column_names.is_empty() {
            writeln!(self.output, "{}", result.column_names.join(" | ")).ok();
        }
        for row in &result.rows {
            let rendered: Vec<String> = row.iter().map(|v| format!("{:?}", v)).collect();
            writeln!(self.output, "{}", rendered.join(" | ")).ok();
        }
        writeln!(self.output, "{}", result.message).ok();
    }
}

fn parse_isolation(name: &str) -> IsolationLevel {
    match name {
        "READ UNCOMMITTED" => IsolationLevel::ReadUncommitted,
        "READ COMMITTED" => IsolationLevel::ReadCommitted,
        "SERIALIZABLE" => IsolationLevel::Serializable,
        _ => IsolationLevel::RepeatableRead,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

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
    fn exit_directive_shuts_down_cleanly() {
        let (engine, _dir) = test_engine();
        let input = io::Cursor::new(b"EXIT\n".to_vec());
        let mut output = Vec::new();
        let code = Repl::new(engine, input, &mut output).run();
        assert_eq!(code, EXIT_CLEAN);
    }

    #[test]
    fn create_and_select_round_trip_through_repl() {
        let (engine, _dir) = test_engine();
        let input = io::Cursor::new(
            b"CREATE TABLE t (id INT PRIMARY KEY);\nINSERT INTO t VALUES (1);\nSELECT id FROM t;\nEXIT\n".to_vec(),
        );
        let mut output = Vec::new();
        let code = Repl::new(engine, input, &mut output).run();
        assert_eq!(code, EXIT_CLEAN);
        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("id"));
    }
}
