// Integration tests for selecting expired executions
use std::collections::BTreeSet;

use rundeck_cleanup::db::{AgeThreshold, SelectionCriteria, Table};

use crate::common::{
    insert_base_report, insert_execution, insert_full_execution, insert_log_file_storage_request,
    insert_orchestrator, insert_workflow, setup_test_db,
};

#[tokio::test]
async fn test_selects_only_executions_older_than_threshold() {
    let Some(db) = setup_test_db().await else {
        return;
    };

    let old_a = insert_full_execution(&db, "ops", 400, 2).await;
    let old_b = insert_full_execution(&db, "ops", 200, 1).await;
    let recent = insert_full_execution(&db, "ops", 10, 1).await;

    let criteria = SelectionCriteria::new(100, AgeThreshold::Months(3), "").unwrap();
    let sets = db
        .select_expired(&criteria)
        .await
        .expect("Failed to select expired executions");

    assert_eq!(sets.get(Table::Execution), &BTreeSet::from([old_a, old_b]));
    assert!(!sets.get(Table::Execution).contains(&recent));
    assert_eq!(sets.get(Table::Orchestrator).len(), 2);
    assert_eq!(sets.get(Table::Workflow).len(), 2);
    assert_eq!(sets.get(Table::WorkflowStep).len(), 3);
}

#[tokio::test]
async fn test_project_filter_scopes_selection() {
    let Some(db) = setup_test_db().await else {
        return;
    };

    let ops = insert_full_execution(&db, "ops", 60, 1).await;
    let billing = insert_full_execution(&db, "billing", 60, 1).await;

    let scoped = SelectionCriteria::new(100, AgeThreshold::Days(30), "billing").unwrap();
    let sets = db.select_expired(&scoped).await.unwrap();
    assert_eq!(sets.get(Table::Execution), &BTreeSet::from([billing]));

    let unscoped = SelectionCriteria::new(100, AgeThreshold::Days(30), "").unwrap();
    let sets = db.select_expired(&unscoped).await.unwrap();
    assert_eq!(sets.get(Table::Execution), &BTreeSet::from([ops, billing]));
}

#[tokio::test]
async fn test_max_count_limits_executions_not_joined_rows() {
    let Some(db) = setup_test_db().await else {
        return;
    };

    // Each execution fans out into five rows through its steps.
    let oldest = insert_full_execution(&db, "ops", 90, 5).await;
    let older = insert_full_execution(&db, "ops", 80, 5).await;
    insert_full_execution(&db, "ops", 70, 5).await;

    let criteria = SelectionCriteria::new(2, AgeThreshold::Days(30), "").unwrap();
    let sets = db.select_expired(&criteria).await.unwrap();

    assert_eq!(sets.get(Table::Execution), &BTreeSet::from([oldest, older]));
    assert_eq!(sets.get(Table::WorkflowStep).len(), 10);
}

#[tokio::test]
async fn test_executions_without_dependents_are_still_selected() {
    let Some(db) = setup_test_db().await else {
        return;
    };

    let bare = insert_execution(&db, "ops", 100, None, None).await;
    let orchestrator_id = insert_orchestrator(&db).await;
    let (workflow_id, _) = insert_workflow(&db, 0).await;
    let stepless = insert_execution(&db, "ops", 100, Some(workflow_id), Some(orchestrator_id)).await;

    let criteria = SelectionCriteria::new(10, AgeThreshold::Days(30), "").unwrap();
    let sets = db.select_expired(&criteria).await.unwrap();

    assert_eq!(sets.get(Table::Execution), &BTreeSet::from([bare, stepless]));
    assert_eq!(sets.get(Table::Workflow), &BTreeSet::from([workflow_id]));
    assert_eq!(sets.get(Table::Orchestrator), &BTreeSet::from([orchestrator_id]));
    assert!(sets.get(Table::WorkflowStep).is_empty());
    assert!(sets.get(Table::BaseReport).is_empty());
    assert!(sets.get(Table::LogFileStorageRequest).is_empty());
}

#[tokio::test]
async fn test_optional_records_are_collected_without_duplicates() {
    let Some(db) = setup_test_db().await else {
        return;
    };

    let execution = insert_full_execution(&db, "ops", 100, 3).await;
    let report_a = insert_base_report(&db, execution).await;
    let report_b = insert_base_report(&db, execution).await;
    let request = insert_log_file_storage_request(&db, execution).await;

    let criteria = SelectionCriteria::new(10, AgeThreshold::Days(30), "").unwrap();
    let sets = db.select_expired(&criteria).await.unwrap();

    assert_eq!(sets.get(Table::Execution), &BTreeSet::from([execution]));
    assert_eq!(sets.get(Table::BaseReport), &BTreeSet::from([report_a, report_b]));
    assert_eq!(sets.get(Table::LogFileStorageRequest), &BTreeSet::from([request]));
    assert_eq!(sets.get(Table::Orchestrator).len(), 1);
    assert_eq!(sets.get(Table::WorkflowStep).len(), 3);
}

#[tokio::test]
async fn test_no_matches_yields_empty_sets() {
    let Some(db) = setup_test_db().await else {
        return;
    };

    insert_full_execution(&db, "ops", 1, 1).await;

    let criteria = SelectionCriteria::new(10, AgeThreshold::Months(1), "").unwrap();
    let sets = db.select_expired(&criteria).await.unwrap();

    assert!(sets.is_empty());
}
