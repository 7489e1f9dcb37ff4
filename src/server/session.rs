//! Per-connection session state: a thin wrapper the wire handler drives,
//! owning at most one open transaction and this connection's prepared
//! statements.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::sql::ast::ParsedQuery;
use crate::sql::parser;
use crate::txn::{IsolationLevel, Transaction};

pub struct Session {
    txn: Option<Arc<Transaction>>,
    prepared: HashMap<u64, ParsedQuery>,
    next_handle: u64,
}

impl Session {
    pub fn new() -> Self {
        Self { txn: None, prepared: HashMap::new(), next_handle: 1 }
    }

    pub fn current_txn(&self) -> Option<Arc<Transaction>> {
        self.txn.clone()
    }

    pub fn begin(&mut self, engine: &crate::engine::Engine, isolation: IsolationLevel) {
        self.txn = Some(engine.begin(isolation));
    }

    pub fn commit(&mut self, engine: &crate::engine::Engine) -> Result<()> {
        match self.txn.take() {
            Some(txn) => engine.commit(&txn),
            None => Err(Error::concurrency("no transaction is open on this session")),
        }
    }

    pub fn rollback(&mut self, engine: &crate::engine::Engine) -> Result<()> {
        match self.txn.take() {
            Some(txn) => engine.abort(&txn),
            None => Err(Error::concurrency("no transaction is open on this session")),
        }
    }

    pub fn prepare(&mut self, sql: &str) -> Result<u64> {
        let query = parser::parse(sql)?;
        let handle = self.next_handle;
        self.next_handle += 1;
        self.prepared.insert(handle, query);
        Ok(handle)
    }

    pub fn prepared_query(&self, handle: u64) -> Result<ParsedQuery> {
        self.prepared
            .get(&handle)
            .cloned()
            .ok_or_else(|| Error::catalog(format!("no prepared statement with handle {}", handle)))
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
