//! SQL front end and execution engine: parse text into a closed AST, plan
//! it against the catalog, run the plan.

pub mod ast;
pub mod executor;
pub mod parser;
pub mod plan;
pub mod planner;
pub mod row;

use std::sync::Arc;

use crate::error::Result;
use crate::sql::executor::{execute_plan, ExecContext, QueryResult};
use crate::txn::transaction::Transaction;

/// Parse, plan, and execute one statement against an already-open
/// transaction. `ast::ParsedQuery`'s DDL and transaction-control variants
/// are handled here directly; everything else goes through the planner.
pub fn execute(ctx: &ExecContext, txn: &Arc<Transaction>, sql: &str) -> Result<QueryResult> {
    execute_parsed(ctx, txn, parser::parse(sql)?)
}

/// Same as [`execute`], but for a statement already parsed (and possibly
/// cached, as `PREPARE`/`EXECUTE` do).
pub fn execute_parsed(ctx: &ExecContext, txn: &Arc<Transaction>, query: ast::ParsedQuery) -> Result<QueryResult> {
    match query {
        ast::ParsedQuery::CreateTable { name, columns } => executor::ddl::execute_create_table(ctx, &columns, &name),
        ast::ParsedQuery::CreateIndex { name, table, columns, unique } => {
            executor::ddl::execute_create_index(ctx, &name, &table, &columns, unique)
        }
        ast::ParsedQuery::DropTable { name } => executor::ddl::execute_drop_table(ctx, txn, &name),
        ast::ParsedQuery::Begin { .. } | ast::ParsedQuery::Commit | ast::ParsedQuery::Rollback => {
            Err(crate::error::Error::internal("transaction control statements are handled by the session layer"))
        }
        other => {
            let plan = planner::plan(other, &ctx.catalog)?;
            execute_plan(ctx, txn, plan)
        }
    }
}
