//! The closed plan-tree enum: a closed sum type with a dispatch function
//! rather than runtime polymorphism. `sql::planner` builds one of these
//! from a `ParsedQuery` and the catalog; `sql::executor` walks it.

use crate::sql::ast::{AggregateFunction, Expr, JoinKind};
use crate::sql::row::RowSchema;
use crate::value::Value;

#[derive(Debug, Clone)]
pub enum PlanNode {
    SeqScan {
        table: String,
        table_oid: u32,
        schema: RowSchema,
    },
    /// An equality or range scan over a named index. `lower`/`upper` are
    /// already-folded constants; `None` means unbounded on that side.
    IndexScan {
        table: String,
        table_oid: u32,
        index: String,
        schema: RowSchema,
        lower: Option<Value>,
        upper: Option<Value>,
    },
    Filter {
        input: Box<PlanNode>,
        predicate: Expr,
    },
    Project {
        input: Box<PlanNode>,
        items: Vec<(Expr, String)>,
        schema: RowSchema,
    },
    NestedLoopJoin {
        left: Box<PlanNode>,
        right: Box<PlanNode>,
        kind: JoinKind,
        on: Expr,
        schema: RowSchema,
    },
    HashJoin {
        left: Box<PlanNode>,
        right: Box<PlanNode>,
        kind: JoinKind,
        left_key: Expr,
        right_key: Expr,
        schema: RowSchema,
    },
    HashAggregate {
        input: Box<PlanNode>,
        group_by: Vec<Expr>,
        /// `(function, argument, output column name)`; `CountStar` has no
        /// argument.
        aggregates: Vec<(AggregateFunction, Option<Expr>, String)>,
        schema: RowSchema,
    },
    Sort {
        input: Box<PlanNode>,
        /// Resolved output-column index and ascending flag.
        keys: Vec<(usize, bool)>,
    },
    Limit {
        input: Box<PlanNode>,
        limit: u64,
    },
    Insert {
        table: String,
        table_oid: u32,
        rows: Vec<Vec<Expr>>,
    },
    Update {
        table: String,
        table_oid: u32,
        input: Box<PlanNode>,
        assignments: Vec<(usize, Expr)>,
    },
    Delete {
        table: String,
        table_oid: u32,
        input: Box<PlanNode>,
    },
}

impl PlanNode {
    /// The row shape this node produces, for nodes that produce rows at
    /// all (DML nodes report affected-row counts instead and have none).
    pub fn output_schema(&self) -> Option<&RowSchema> {
        match self {
            PlanNode::SeqScan { schema, .. }
            | PlanNode::IndexScan { schema, .. }
            | PlanNode::Project { schema, .. }
            | PlanNode::NestedLoopJoin { schema, .. }
            | PlanNode::HashJoin { schema, .. }
            | PlanNode::HashAggregate { schema, .. } => Some(schema),
            PlanNode::Filter { input, .. } | PlanNode::Sort { input, .. } | PlanNode::Limit { input, .. } => {
                input.output_schema()
            }
            PlanNode::Insert { .. } | PlanNode::Update { .. } | PlanNode::Delete { .. } => None,
        }
    }
}
