// Selection of expired executions and every row that hangs off them
use chrono::{DateTime, Utc};
use sqlx::{Column, Postgres, QueryBuilder, Row};

use crate::db::{
    models::{IdSets, SelectionCriteria, Table},
    Database,
};
use crate::error::{CleanupError, CleanupResult};

// (table, alias) pairs for the outer select list, in select-column order.
const SELECT_ALIASES: [(Table, &str); 6] = [
    (Table::Execution, "e"),
    (Table::LogFileStorageRequest, "lfsr"),
    (Table::BaseReport, "br"),
    (Table::Orchestrator, "o"),
    (Table::Workflow, "w"),
    (Table::WorkflowStep, "ws"),
];

/// Builds the selection query.
///
/// The LIMIT sits on the candidate-execution subquery so that fan-out into
/// dependent rows never reduces the number of executions swept. Every join is
/// a LEFT JOIN: an execution without a workflow, report or log storage request
/// is still collected.
///
/// Rundeck stores `base_report.jc_exec_id` as a string column, so the
/// execution id is cast to text for that join.
pub fn selection_query(
    criteria: &SelectionCriteria,
    cutoff: DateTime<Utc>,
) -> QueryBuilder<'static, Postgres> {
    let select_list = SELECT_ALIASES
        .iter()
        .map(|(table, alias)| format!("{}.id AS {}", alias, table.column()))
        .collect::<Vec<_>>()
        .join(", ");

    let mut query_builder = QueryBuilder::new(format!(
        "SELECT {}
       FROM (SELECT id, workflow_id, orchestrator_id
               FROM execution
              WHERE date_started < ",
        select_list
    ));
    query_builder.push_bind(cutoff);

    if let Some(project) = criteria.project() {
        query_builder.push(" AND project = ");
        query_builder.push_bind(project.to_owned());
    }

    query_builder.push(" ORDER BY date_started, id LIMIT ");
    query_builder.push_bind(i64::from(criteria.max_count()));

    query_builder.push(
        ") e
       LEFT JOIN workflow w ON e.workflow_id = w.id
       LEFT JOIN log_file_storage_request lfsr ON lfsr.execution_id = e.id
       LEFT JOIN base_report br ON br.jc_exec_id = CAST(e.id AS VARCHAR)
       LEFT JOIN orchestrator o ON e.orchestrator_id = o.id
       LEFT JOIN workflow_workflow_step wws ON wws.workflow_commands_id = w.id
       LEFT JOIN workflow_step ws ON wws.workflow_step_id = ws.id",
    );

    query_builder
}

impl Database {
    /// Collects the IDs of expired executions and of every row that must go with them.
    pub async fn select_expired(&self, criteria: &SelectionCriteria) -> CleanupResult<IdSets> {
        let cutoff = criteria.age().cutoff(Utc::now())?;

        tracing::info!(
            cutoff = %cutoff,
            age = %criteria.age(),
            max_count = criteria.max_count(),
            project = criteria.project().unwrap_or("*"),
            "Selecting expired executions"
        );

        let mut query_builder = selection_query(criteria, cutoff);
        let statement = query_builder.sql().to_string();

        let rows = query_builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CleanupError::query(statement.as_str(), e))?;

        // Column metadata only travels with rows; nothing matched means nothing to delete.
        let Some(first) = rows.first() else {
            tracing::info!("No executions matched");
            return Ok(IdSets::new());
        };

        let columns: Vec<String> = first
            .columns()
            .iter()
            .map(|column| column.name().to_string())
            .collect();

        let values = rows
            .iter()
            .map(|row| {
                (0..columns.len())
                    .map(|index| row.try_get::<Option<i64>, _>(index))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CleanupError::query(statement.as_str(), e))?;

        let sets = IdSets::from_columns(&columns, values)?;

        for table in Table::ALL {
            tracing::info!(
                table = table.name(),
                count = sets.get(table).len(),
                "Collected ids"
            );
        }

        Ok(sets)
    }
}
