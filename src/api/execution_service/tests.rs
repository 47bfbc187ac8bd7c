use super::*;
use crate::api::error::PreconditionViolation;
use crate::domain::lottery::EventKind;
use crate::domain::spec::LotterySpec;
use crate::domain::types::UnitRef;
use crate::engine::error::SolverError;
use crate::engine::solver::{SolveContext, Solver, TestSolver};
use crate::repository::{FamilyRecord, UnitRecord};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::json;

struct FailingSolver;

#[async_trait]
impl Solver for FailingSolver {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn distribute(
        &self,
        _ctx: &SolveContext,
        _spec: &LotterySpec,
    ) -> Result<BTreeMap<FamilyId, UnitRef>, SolverError> {
        Err(SolverError::ProcessFailed("glpsol exited with status 1".to_string()))
    }
}

struct PanickingSolver;

#[async_trait]
impl Solver for PanickingSolver {
    fn name(&self) -> &'static str {
        "panicking"
    }

    async fn distribute(
        &self,
        _ctx: &SolveContext,
        _spec: &LotterySpec,
    ) -> Result<BTreeMap<FamilyId, UnitRef>, SolverError> {
        panic!("cannot convert float seconds to Duration");
    }
}

fn shared() -> Arc<Mutex<Connection>> {
    let conn = Connection::open_in_memory().unwrap();
    crate::db::configure_sqlite_connection(&conn).unwrap();
    crate::db::ensure_schema(&conn).unwrap();
    Arc::new(Mutex::new(conn))
}

/// 项目 1: 类型 1 两户两单元，抽签 7 已发布、日期已到
fn seed(conn: &Arc<Mutex<Connection>>, units: &[UnitId]) {
    let projects = ProjectRepository::new(conn.clone());
    projects.insert_unit_type(1, 1, "2BR").unwrap();
    for unit_id in units {
        projects
            .insert_unit(
                1,
                &UnitRecord { unit_id: *unit_id, unit_type_id: 1, identifier: None, family_id: None },
            )
            .unwrap();
    }
    for family_id in [1, 2] {
        projects
            .insert_family(
                1,
                &FamilyRecord { family_id, unit_type_id: 1, preferences: vec![] },
            )
            .unwrap();
    }

    LotteryRepository::new(conn.clone())
        .insert(&Lottery {
            id: 7,
            project_id: 1,
            kind: EventKind::Lottery,
            is_published: true,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).and_then(|d| d.and_hms_opt(0, 0, 0)),
            status: ExecutionStatus::NotExecuted,
        })
        .unwrap();
}

fn service(conn: &Arc<Mutex<Connection>>, solver: Arc<dyn Solver>, mode: DispatchMode) -> ExecutionService {
    let orchestrator = Arc::new(LotteryOrchestrator::new(solver, true));
    ExecutionService::new(conn.clone(), orchestrator, mode, json!({}))
}

#[tokio::test]
async fn test_inline_execution_persists_picks() {
    let conn = shared();
    seed(&conn, &[10, 11]);
    let service = service(&conn, Arc::new(TestSolver), DispatchMode::Inline);

    let ticket = service.execute(7, ExecutionOptions::default()).await.unwrap();
    let uuid = ticket.execution_uuid.clone();
    let outcome = ticket.wait().await;

    assert!(outcome.is_executed());
    assert_eq!(outcome.execution_uuid(), uuid);
    assert_eq!(service.lottery(7).unwrap().status, ExecutionStatus::Executed);

    let assigned = ProjectRepository::new(conn.clone()).assigned_units(1).unwrap();
    assert_eq!(assigned.len(), 2);

    let types: Vec<AuditType> = service
        .execution_trail(&uuid)
        .unwrap()
        .into_iter()
        .map(|r| r.audit_type)
        .collect();
    assert_eq!(
        types,
        vec![AuditType::Init, AuditType::GroupExecution, AuditType::ProjectExecution]
    );
}

#[tokio::test]
async fn test_async_execution_completes_in_background() {
    let conn = shared();
    seed(&conn, &[10, 11]);
    let service = service(&conn, Arc::new(TestSolver), DispatchMode::Async);

    let outcome = service
        .execute(7, ExecutionOptions::default())
        .await
        .unwrap()
        .wait()
        .await;

    assert!(outcome.is_executed());
    assert_eq!(service.lottery(7).unwrap().status, ExecutionStatus::Executed);
}

#[tokio::test]
async fn test_sync_failure_rolls_back_reservation() {
    let conn = shared();
    // 两户三单元: 类型计数不一致
    seed(&conn, &[10, 11, 12]);
    let service = service(&conn, Arc::new(TestSolver), DispatchMode::Inline);

    let err = service.execute(7, ExecutionOptions::default()).await.unwrap_err();
    assert!(matches!(err, ExecutionError::CountMismatch { ref mismatches } if mismatches.len() == 1));

    let lottery = service.lottery(7).unwrap();
    assert!(lottery.is_published);
    assert_eq!(lottery.status, ExecutionStatus::NotExecuted);
    assert!(service.audit_trail(7, true).unwrap().is_empty());

    // 允许不一致后可执行，多余单元成为孤儿
    let outcome = service
        .execute(7, ExecutionOptions::mismatch_allowed())
        .await
        .unwrap()
        .wait()
        .await;
    match outcome {
        ExecutionOutcome::Executed { picks, orphans, .. } => {
            assert_eq!(picks.len(), 2);
            assert_eq!(orphans.units.len(), 1);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_async_failure_records_failure_and_releases() {
    let conn = shared();
    seed(&conn, &[10, 11]);
    let service = service(&conn, Arc::new(FailingSolver), DispatchMode::Inline);

    let outcome = service
        .execute(7, ExecutionOptions::default())
        .await
        .unwrap()
        .wait()
        .await;

    match &outcome {
        ExecutionOutcome::Failed { error_type, reason_code, .. } => {
            assert_eq!(error_type, "SOLVER");
            assert_eq!(reason_code, "PROCESS_FAILED");
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    let lottery = service.lottery(7).unwrap();
    assert!(lottery.is_published);
    assert_eq!(lottery.status, ExecutionStatus::NotExecuted);

    let trail = service.execution_trail(outcome.execution_uuid()).unwrap();
    let failure = trail.last().unwrap();
    assert_eq!(failure.audit_type, AuditType::Failure);
    assert_eq!(failure.payload["exception"], "PROCESS_FAILED");
    assert_eq!(ProjectRepository::new(conn.clone()).assigned_units(1).unwrap().len(), 0);
}

#[tokio::test]
async fn test_panicking_solver_records_failure_and_releases() {
    let conn = shared();
    seed(&conn, &[10, 11]);
    let panicking = service(&conn, Arc::new(PanickingSolver), DispatchMode::Async);

    let outcome = panicking
        .execute(7, ExecutionOptions::default())
        .await
        .unwrap()
        .wait()
        .await;

    match &outcome {
        ExecutionOutcome::Failed { error_type, reason_code, message, .. } => {
            assert_eq!(error_type, "TASK_PANICKED");
            assert_eq!(reason_code, "TASK_PANICKED");
            assert!(message.contains("cannot convert float seconds"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    let lottery = panicking.lottery(7).unwrap();
    assert!(lottery.is_published);
    assert_eq!(lottery.status, ExecutionStatus::NotExecuted);

    let trail = panicking.execution_trail(outcome.execution_uuid()).unwrap();
    let failure = trail.last().unwrap();
    assert_eq!(failure.audit_type, AuditType::Failure);
    assert_eq!(failure.payload["exception"], "TASK_PANICKED");

    // 释放后可重新执行
    let retry = service(&conn, Arc::new(TestSolver), DispatchMode::Inline)
        .execute(7, ExecutionOptions::default())
        .await
        .unwrap()
        .wait()
        .await;
    assert!(retry.is_executed());
}

#[tokio::test]
async fn test_second_execution_is_already_reserved() {
    let conn = shared();
    seed(&conn, &[10, 11]);
    let service = service(&conn, Arc::new(TestSolver), DispatchMode::Inline);

    service.execute(7, ExecutionOptions::default()).await.unwrap().wait().await;
    let err = service.execute(7, ExecutionOptions::default()).await.unwrap_err();
    assert!(matches!(
        err,
        ExecutionError::Precondition(PreconditionViolation::AlreadyReserved)
    ));
}

#[tokio::test]
async fn test_invalidate_requires_executed_and_resets() {
    let conn = shared();
    seed(&conn, &[10, 11]);
    let service = service(&conn, Arc::new(TestSolver), DispatchMode::Inline);

    assert!(matches!(service.invalidate(7), Err(ExecutionError::NotExecuted(7))));
    assert!(matches!(service.invalidate(99), Err(ExecutionError::NotFound(99))));

    let first = service.execute(7, ExecutionOptions::default()).await.unwrap().wait().await;
    let report = service.invalidate(7).unwrap();
    assert_eq!(report.execution_uuid, first.execution_uuid());
    assert_eq!(report.cleared_units, 2);
    assert_eq!(report.retired_records, 4);

    let lottery = service.lottery(7).unwrap();
    assert!(lottery.is_published);
    assert_eq!(lottery.status, ExecutionStatus::NotExecuted);
    assert!(service.audit_trail(7, false).unwrap().is_empty());

    let retired = service.audit_trail(7, true).unwrap();
    assert_eq!(retired.last().map(|r| r.audit_type), Some(AuditType::Invalidate));
    assert!(retired.iter().all(|r| r.is_retired()));
}
