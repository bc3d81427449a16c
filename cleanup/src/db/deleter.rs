// Ordered deletion of selected rows
use async_trait::async_trait;
use sqlx::{Postgres, Transaction};
use std::collections::BTreeSet;
use std::fmt;
use std::io::Write;

use crate::db::{
    models::{IdSets, Table, WORKFLOW_STEP_JOIN_TABLE},
    Database,
};
use crate::error::{CleanupError, CleanupResult};

/// A `DELETE ... WHERE column IN (ids)` against one table.
///
/// Executed with the IDs bound as a single `BIGINT[]` parameter; the
/// [`Display`](fmt::Display) form spells the IDs out for logs and dry runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteStatement {
    table: &'static str,
    column: &'static str,
    ids: Vec<i64>,
}

impl DeleteStatement {
    pub fn new(table: &'static str, column: &'static str, ids: &BTreeSet<i64>) -> Self {
        Self {
            table,
            column,
            ids: ids.iter().copied().collect(),
        }
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn column(&self) -> &'static str {
        self.column
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn sql(&self) -> String {
        format!("DELETE FROM {} WHERE {} = ANY($1)", self.table, self.column)
    }
}

impl fmt::Display for DeleteStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DELETE FROM {} WHERE {} IN (", self.table, self.column)?;
        for (index, id) in self.ids.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", id)?;
        }
        f.write_str(")")
    }
}

/// Statements in foreign-key-safe order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionPlan {
    statements: Vec<DeleteStatement>,
}

impl DeletionPlan {
    /// Tables with no IDs are skipped. Dependent IDs without any execution IDs
    /// cannot come out of the selector and are reported as a contract violation.
    pub fn from_id_sets(sets: &IdSets) -> CleanupResult<Self> {
        if sets.get(Table::Execution).is_empty() {
            if let Some(table) = Table::ALL.into_iter().find(|t| !sets.get(*t).is_empty()) {
                return Err(CleanupError::Contract(format!(
                    "{} ids selected for '{}' but no executions",
                    sets.get(table).len(),
                    table
                )));
            }
        }

        let mut statements = Vec::new();
        for table in Table::DELETION_ORDER {
            let ids = sets.get(table);
            if ids.is_empty() {
                tracing::debug!(table = table.name(), "Nothing to delete");
                continue;
            }

            if let Some(join_column) = table.join_column() {
                statements.push(DeleteStatement::new(WORKFLOW_STEP_JOIN_TABLE, join_column, ids));
            }
            statements.push(DeleteStatement::new(table.name(), "id", ids));
        }

        Ok(Self { statements })
    }

    pub fn statements(&self) -> &[DeleteStatement] {
        &self.statements
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Render statements without executing them.
    pub dry_run: bool,
    /// Print each statement before executing it.
    pub verbose: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionOutcome {
    pub table: &'static str,
    pub column: &'static str,
    pub id_count: usize,
    /// `None` when the statement was not executed (dry run).
    pub rows_affected: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionReport {
    pub dry_run: bool,
    pub outcomes: Vec<DeletionOutcome>,
}

impl DeletionReport {
    pub fn total_rows_deleted(&self) -> u64 {
        self.outcomes.iter().filter_map(|o| o.rows_affected).sum()
    }
}

/// Runs a single delete statement and returns the number of rows removed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatementExecutor: Send {
    async fn execute(&mut self, statement: &DeleteStatement) -> Result<u64, sqlx::Error>;
}

/// Executes statements inside an open Postgres transaction.
pub struct TransactionExecutor<'c> {
    tx: Transaction<'c, Postgres>,
}

impl<'c> TransactionExecutor<'c> {
    pub fn new(tx: Transaction<'c, Postgres>) -> Self {
        Self { tx }
    }

    pub async fn commit(self) -> Result<(), sqlx::Error> {
        self.tx.commit().await
    }

    pub async fn rollback(self) -> Result<(), sqlx::Error> {
        self.tx.rollback().await
    }
}

#[async_trait]
impl StatementExecutor for TransactionExecutor<'_> {
    async fn execute(&mut self, statement: &DeleteStatement) -> Result<u64, sqlx::Error> {
        let sql = statement.sql();
        let result = sqlx::query(&sql)
            .bind(statement.ids())
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Walks the plan in order, printing statements to stdout.
/// See [`run_plan_to`].
pub async fn run_plan<E>(
    plan: &DeletionPlan,
    executor: &mut E,
    options: DeleteOptions,
) -> CleanupResult<DeletionReport>
where
    E: StatementExecutor + ?Sized,
{
    run_plan_to(plan, executor, options, &mut std::io::stdout()).await
}

/// Walks the plan in order. In a dry run every statement is written to `out`
/// and the executor is never called; with `verbose` each statement is written
/// before it executes. Statement text is only rendered when written or when a
/// statement fails, in which case it is logged and carried in the error.
pub async fn run_plan_to<E, W>(
    plan: &DeletionPlan,
    executor: &mut E,
    options: DeleteOptions,
    out: &mut W,
) -> CleanupResult<DeletionReport>
where
    E: StatementExecutor + ?Sized,
    W: Write + ?Sized,
{
    let mut report = DeletionReport {
        dry_run: options.dry_run,
        outcomes: Vec::with_capacity(plan.statements().len()),
    };

    for statement in plan.statements() {
        if options.dry_run || options.verbose {
            writeln!(out, "{}", statement).map_err(CleanupError::Output)?;
        }

        let rows_affected = if options.dry_run {
            None
        } else {
            match executor.execute(statement).await {
                Ok(rows) => Some(rows),
                Err(e) => {
                    let rendered = statement.to_string();
                    tracing::error!(
                        table = statement.table(),
                        error = %e,
                        last_statement = %rendered,
                        "Delete failed"
                    );
                    return Err(CleanupError::query(rendered, e));
                }
            }
        };

        report.outcomes.push(DeletionOutcome {
            table: statement.table(),
            column: statement.column(),
            id_count: statement.ids().len(),
            rows_affected,
        });
    }

    out.flush().map_err(CleanupError::Output)?;
    Ok(report)
}

impl Database {
    /// Deletes every row in `sets` inside one transaction, committed once at the end.
    /// A dry run opens the transaction, executes nothing and rolls back.
    pub async fn delete_selected(
        &self,
        sets: &IdSets,
        options: DeleteOptions,
    ) -> CleanupResult<DeletionReport> {
        let plan = DeletionPlan::from_id_sets(sets)?;
        if plan.is_empty() {
            tracing::info!("Nothing to delete");
            return Ok(DeletionReport {
                dry_run: options.dry_run,
                outcomes: Vec::new(),
            });
        }

        let tx = self.pool.begin().await.map_err(CleanupError::Connect)?;
        let mut executor = TransactionExecutor::new(tx);

        // On error the transaction is dropped, which rolls it back.
        let report = run_plan(&plan, &mut executor, options).await?;

        if options.dry_run {
            executor
                .rollback()
                .await
                .map_err(|e| CleanupError::query("ROLLBACK", e))?;
            tracing::info!(
                statements = report.outcomes.len(),
                "Dry run complete; nothing was deleted"
            );
            return Ok(report);
        }

        executor
            .commit()
            .await
            .map_err(|e| CleanupError::query("COMMIT", e))?;

        for outcome in &report.outcomes {
            tracing::info!(
                table = outcome.table,
                ids = outcome.id_count,
                rows_deleted = outcome.rows_affected.unwrap_or(0),
                "Deleted rows"
            );
        }
        tracing::info!(total = report.total_rows_deleted(), "Cleanup committed");

        Ok(report)
    }
}
