// ==========================================
// 抽签分配引擎 - 审计记录适配器
// ==========================================
// 职责: 实现 Engine 层定义的 AuditSink trait，写入 lottery_audit 表
// 架构: 依赖倒置 - API 层实现 Engine 层定义的接口
// ==========================================

use crate::api::error::ExecutionError;
use crate::domain::audit::AuditType;
use crate::domain::spec::LotteryManifest;
use crate::domain::types::{LotteryId, ProjectId};
use crate::engine::events::{AuditEvent, AuditSink};
use crate::repository::{AuditRepository, NewAuditRecord, RepositoryResult};
use rusqlite::Connection;
use serde_json::{json, Value as JsonValue};
use std::error::Error;
use std::sync::Arc;

/// 单次执行的审计输出
///
/// 绑定 project_id / lottery_id，将引擎事件落库
pub struct ExecutionAuditSink {
    repo: Arc<AuditRepository>,
    project_id: ProjectId,
    lottery_id: LotteryId,
}

impl ExecutionAuditSink {
    pub fn new(repo: Arc<AuditRepository>, project_id: ProjectId, lottery_id: LotteryId) -> Self {
        Self {
            repo,
            project_id,
            lottery_id,
        }
    }
}

impl AuditSink for ExecutionAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        let audit_id = self.repo.insert(&NewAuditRecord {
            execution_uuid: &event.execution_uuid,
            project_id: self.project_id,
            lottery_id: self.lottery_id,
            audit_type: event.audit_type,
            payload: &event.payload,
        })?;

        tracing::debug!(
            audit_id,
            execution_uuid = %event.execution_uuid,
            audit_type = event.audit_type.as_str(),
            "审计记录已写入"
        );
        Ok(())
    }
}

// ==========================================
// 生命周期审计（INIT / FAILURE / INVALIDATE）
// ==========================================

/// 写入 INIT 记录（同一事务内先作废该抽签的残留有效记录）
///
/// # 返回
/// - 被作废的残留记录数
pub fn record_init_in(
    conn: &Connection,
    manifest: &LotteryManifest,
    solver: &str,
    config_snapshot: &JsonValue,
) -> RepositoryResult<usize> {
    let retired = AuditRepository::retire_by_lottery_in(conn, manifest.lottery_id)?;

    let payload = json!({
        "manifest": manifest,
        "solver": solver,
        "options": manifest.options.flags(),
        "family_count": manifest.family_count(),
        "unit_count": manifest.unit_count(),
        "retired_records": retired,
        "config": config_snapshot,
    });

    AuditRepository::insert_in(
        conn,
        &NewAuditRecord {
            execution_uuid: &manifest.execution_uuid,
            project_id: manifest.project_id,
            lottery_id: manifest.lottery_id,
            audit_type: AuditType::Init,
            payload: &payload,
        },
    )?;
    Ok(retired)
}

/// FAILURE 负载
pub fn failure_payload(err: &ExecutionError) -> JsonValue {
    json!({
        "error_type": err.kind(),
        "exception": err.reason_code(),
        "message": err.to_string(),
        "user_message": err.user_message(),
        "retryable": err.is_retryable(),
    })
}

/// INVALIDATE 负载
pub fn invalidate_payload(lottery_id: LotteryId, cleared_units: usize) -> JsonValue {
    json!({
        "lottery_id": lottery_id,
        "cleared_units": cleared_units,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::PreconditionViolation;
    use crate::domain::lottery::ExecutionOptions;
    use rusqlite::Connection;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn shared() -> Arc<Mutex<Connection>> {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        crate::db::ensure_schema(&conn).unwrap();
        Arc::new(Mutex::new(conn))
    }

    #[test]
    fn test_sink_writes_bound_ids() {
        let conn = shared();
        let repo = Arc::new(AuditRepository::new(conn));
        let sink = ExecutionAuditSink::new(repo.clone(), 3, 9);

        sink.record(AuditEvent::custom("exec-1", json!({"task": "min_satisfaction"})))
            .unwrap();

        let records = repo.find_by_lottery(9).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].project_id, 3);
        assert_eq!(records[0].audit_type, AuditType::Custom);
        assert_eq!(records[0].payload["task"], "min_satisfaction");
    }

    #[test]
    fn test_init_retires_stale_records() {
        let conn = shared();
        let repo = Arc::new(AuditRepository::new(conn.clone()));
        let sink = ExecutionAuditSink::new(repo.clone(), 1, 9);
        sink.record(AuditEvent::new("stale", AuditType::Failure, json!({})))
            .unwrap();

        let manifest = LotteryManifest::new(9, 1, ExecutionOptions::default(), BTreeMap::new());
        let retired = {
            let guard = conn.lock().unwrap();
            record_init_in(&guard, &manifest, "glpk", &json!({})).unwrap()
        };
        assert_eq!(retired, 1);

        let visible = repo.find_by_lottery(9).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].audit_type, AuditType::Init);
        assert_eq!(visible[0].execution_uuid, manifest.execution_uuid);
        assert_eq!(visible[0].payload["solver"], "glpk");
    }

    #[test]
    fn test_failure_payload_fields() {
        let payload = failure_payload(&ExecutionError::from(PreconditionViolation::AlreadyReserved));
        assert_eq!(payload["error_type"], "PRECONDITION");
        assert_eq!(payload["exception"], "PRECONDITION");
        assert_eq!(payload["retryable"], false);
        assert!(payload["user_message"].as_str().is_some());
    }
}
