use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{CleanupError, CleanupResult};

/// Hard ceiling on the number of executions considered in one run.
pub const MAX_EXECUTIONS_CEILING: u32 = 1_000_000;

/// Many-to-many join table between `workflow` and `workflow_step`.
pub const WORKFLOW_STEP_JOIN_TABLE: &str = "workflow_workflow_step";

/// Tables touched by a cleanup run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Table {
  Execution,
  LogFileStorageRequest,
  BaseReport,
  Orchestrator,
  Workflow,
  WorkflowStep,
}

impl Table {
  /// Every table, in select-column order.
  pub const ALL: [Table; 6] = [
    Table::Execution,
    Table::LogFileStorageRequest,
    Table::BaseReport,
    Table::Orchestrator,
    Table::Workflow,
    Table::WorkflowStep,
  ];

  /// Children before parents. Do not reorder.
  pub const DELETION_ORDER: [Table; 6] = [
    Table::BaseReport,
    Table::LogFileStorageRequest,
    Table::Execution,
    Table::Orchestrator,
    Table::WorkflowStep,
    Table::Workflow,
  ];

  pub const fn name(self) -> &'static str {
    match self {
      Table::Execution => "execution",
      Table::LogFileStorageRequest => "log_file_storage_request",
      Table::BaseReport => "base_report",
      Table::Orchestrator => "orchestrator",
      Table::Workflow => "workflow",
      Table::WorkflowStep => "workflow_step",
    }
  }

  /// Column alias carrying this table's IDs in the selection result.
  pub const fn column(self) -> &'static str {
    match self {
      Table::Execution => "execution_id",
      Table::LogFileStorageRequest => "log_file_storage_request_id",
      Table::BaseReport => "base_report_id",
      Table::Orchestrator => "orchestrator_id",
      Table::Workflow => "workflow_id",
      Table::WorkflowStep => "workflow_step_id",
    }
  }

  /// Foreign-key column in `workflow_workflow_step` that points at this table.
  pub const fn join_column(self) -> Option<&'static str> {
    match self {
      Table::Workflow => Some("workflow_commands_id"),
      Table::WorkflowStep => Some("workflow_step_id"),
      _ => None,
    }
  }

  pub fn from_column(column: &str) -> Option<Table> {
    Table::ALL.into_iter().find(|table| table.column() == column)
  }

  /// Checks the declared registry is self-consistent: unique column aliases,
  /// aliases of the form `<table>_id`, and a deletion order covering every table once.
  pub fn validate_registry() -> CleanupResult<()> {
    let mut columns = BTreeSet::new();
    for table in Table::ALL {
      if table.column() != format!("{}_id", table.name()) {
        return Err(CleanupError::Contract(format!(
          "column alias '{}' does not match table '{}'",
          table.column(),
          table.name()
        )));
      }
      if !columns.insert(table.column()) {
        return Err(CleanupError::Contract(format!(
          "duplicate column alias '{}'",
          table.column()
        )));
      }
    }

    let ordered: BTreeSet<Table> = Table::DELETION_ORDER.into_iter().collect();
    if ordered.len() != Table::ALL.len() {
      return Err(CleanupError::Contract(
        "deletion order must list every table exactly once".to_string(),
      ));
    }
    Ok(())
  }
}

impl fmt::Display for Table {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

static NO_IDS: BTreeSet<i64> = BTreeSet::new();

/// Unique, non-null row IDs per table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdSets {
  sets: BTreeMap<Table, BTreeSet<i64>>,
}

impl Default for IdSets {
  fn default() -> Self {
    Self::new()
  }
}

impl IdSets {
  /// An empty set for every table.
  pub fn new() -> Self {
    Self {
      sets: Table::ALL
        .into_iter()
        .map(|table| (table, BTreeSet::new()))
        .collect(),
    }
  }

  pub fn get(&self, table: Table) -> &BTreeSet<i64> {
    self.sets.get(&table).unwrap_or(&NO_IDS)
  }

  pub fn insert(&mut self, table: Table, id: i64) {
    self.sets.entry(table).or_default().insert(id);
  }

  pub fn extend(&mut self, table: Table, ids: impl IntoIterator<Item = i64>) {
    self.sets.entry(table).or_default().extend(ids);
  }

  pub fn is_empty(&self) -> bool {
    self.sets.values().all(BTreeSet::is_empty)
  }

  /// Reshapes selection rows into per-table sets, dropping NULLs and duplicates.
  ///
  /// `columns` are the result column names; each must resolve through
  /// [`Table::from_column`], and every table must be present.
  pub fn from_columns<I>(columns: &[String], rows: I) -> CleanupResult<Self>
  where
    I: IntoIterator<Item = Vec<Option<i64>>>,
  {
    let tables = columns
      .iter()
      .map(|column| {
        Table::from_column(column).ok_or_else(|| {
          CleanupError::Contract(format!("unexpected column '{}' in selection", column))
        })
      })
      .collect::<CleanupResult<Vec<Table>>>()?;

    if let Some(missing) = Table::ALL.into_iter().find(|t| !tables.contains(t)) {
      return Err(CleanupError::Contract(format!(
        "selection has no '{}' column",
        missing.column()
      )));
    }

    let mut sets = Self::new();
    for row in rows {
      if row.len() != tables.len() {
        return Err(CleanupError::Contract(format!(
          "row has {} values, expected {}",
          row.len(),
          tables.len()
        )));
      }
      for (table, value) in tables.iter().zip(row) {
        if let Some(id) = value {
          sets.insert(*table, id);
        }
      }
    }
    Ok(sets)
  }
}

/// How old an execution must be before it is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeThreshold {
  Months(u32),
  Days(u32),
}

impl AgeThreshold {
  /// Executions started strictly before the returned instant are eligible.
  pub fn cutoff(self, now: DateTime<Utc>) -> CleanupResult<DateTime<Utc>> {
    let cutoff = match self {
      AgeThreshold::Months(months) => now.checked_sub_months(chrono::Months::new(months)),
      AgeThreshold::Days(days) => now.checked_sub_days(chrono::Days::new(u64::from(days))),
    };
    cutoff.ok_or_else(|| CleanupError::Config(format!("age threshold {} is out of range", self)))
  }

  fn amount(self) -> u32 {
    match self {
      AgeThreshold::Months(n) | AgeThreshold::Days(n) => n,
    }
  }
}

impl fmt::Display for AgeThreshold {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      AgeThreshold::Months(n) => write!(f, "{} months", n),
      AgeThreshold::Days(n) => write!(f, "{} days", n),
    }
  }
}

/// Clamps a requested execution count to [`MAX_EXECUTIONS_CEILING`].
pub fn clamp_max_count(requested: u64) -> u32 {
  u32::try_from(requested)
    .unwrap_or(MAX_EXECUTIONS_CEILING)
    .min(MAX_EXECUTIONS_CEILING)
}

/// Which executions the selector considers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionCriteria {
  max_count: u32,
  age: AgeThreshold,
  project: Option<String>,
}

impl SelectionCriteria {
  /// An empty `project` means every project. An age too large to subtract
  /// from the current time is rejected here, before any connection is opened.
  pub fn new(max_count: u64, age: AgeThreshold, project: impl Into<String>) -> CleanupResult<Self> {
    if max_count == 0 {
      return Err(CleanupError::Config("max count must be at least 1".to_string()));
    }
    if age.amount() == 0 {
      return Err(CleanupError::Config("age threshold must be at least 1".to_string()));
    }
    age.cutoff(Utc::now())?;

    let clamped = clamp_max_count(max_count);
    if u64::from(clamped) != max_count {
      tracing::warn!(
        requested = max_count,
        ceiling = MAX_EXECUTIONS_CEILING,
        "Requested max count exceeds ceiling; clamping"
      );
    }

    let project = project.into();
    Ok(Self {
      max_count: clamped,
      age,
      project: if project.is_empty() { None } else { Some(project) },
    })
  }

  pub fn max_count(&self) -> u32 {
    self.max_count
  }

  pub fn age(&self) -> AgeThreshold {
    self.age
  }

  pub fn project(&self) -> Option<&str> {
    self.project.as_deref()
  }
}
