use anyhow::{Context, Result};
use clap::Args;

use rundeck_cleanup::db::{
    AgeThreshold, DeleteOptions, DeletionReport, IdSets, SelectionCriteria, Table,
};
use rundeck_cleanup::{CleanupResult, Database};

use crate::config::DatabaseConfig;

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct RunArgs {
    /// Don't run any DELETEs; print them instead
    #[arg(long)]
    pub dry_run: bool,

    /// Maximum number of executions to delete (capped at 1000000)
    #[arg(long = "max", value_parser = clap::value_parser!(u64).range(1..))]
    pub max: u64,

    /// Delete executions older than this many months
    #[arg(
        long,
        value_parser = clap::value_parser!(u32).range(1..),
        conflicts_with = "days",
        required_unless_present = "days"
    )]
    pub months: Option<u32>,

    /// Delete executions older than this many days
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub days: Option<u32>,

    /// Project to delete executions from (default: all projects)
    #[arg(long, default_value = "")]
    pub project: String,

    /// Print each DELETE statement before executing it
    #[arg(short, long)]
    pub verbose: bool,
}

impl RunArgs {
    pub fn age(&self) -> Result<AgeThreshold> {
        match (self.months, self.days) {
            (Some(months), None) => Ok(AgeThreshold::Months(months)),
            (None, Some(days)) => Ok(AgeThreshold::Days(days)),
            _ => anyhow::bail!("exactly one of --months or --days is required"),
        }
    }

    pub fn delete_options(&self) -> DeleteOptions {
        DeleteOptions {
            dry_run: self.dry_run,
            verbose: self.verbose,
        }
    }
}

pub async fn run(args: RunArgs) -> Result<()> {
    // Everything that can be rejected without a connection is checked first.
    Table::validate_registry().context("Table registry is inconsistent")?;
    let criteria = SelectionCriteria::new(args.max, args.age()?, args.project.clone())?;
    let config = DatabaseConfig::from_env()?;

    tracing::info!(
        "Connecting to Postgres DB as user '{}' on {}:{}/{}",
        config.user,
        config.host,
        config.port,
        config.database
    );

    let db = Database::connect(config.connect_options()?)
        .await
        .with_context(|| format!("Failed to connect to database on {}", config.host))?;

    let result = select_and_delete(&db, &criteria, args.delete_options()).await;
    db.close().await;

    match result {
        Ok(report) => {
            if report.dry_run {
                tracing::info!(statements = report.outcomes.len(), "Dry run finished");
            }
            println!();
            Ok(())
        }
        Err(e) => {
            if let Some(statement) = e.last_statement() {
                eprintln!("{}", statement);
            }
            Err(e).context("Cleanup aborted")
        }
    }
}

async fn select_and_delete(
    db: &Database,
    criteria: &SelectionCriteria,
    options: DeleteOptions,
) -> CleanupResult<DeletionReport> {
    let sets: IdSets = db.select_expired(criteria).await?;
    db.delete_selected(&sets, options).await
}
