// ==========================================
// 抽签分配引擎 - 审计记录仓储
// ==========================================
// 对齐: lottery_audit 表
// 红线: 只追加，唯一允许的更新是 retired_at
// ==========================================

use crate::db::TIMESTAMP_FORMAT;
use crate::domain::audit::{AuditRecord, AuditType};
use crate::domain::types::{LotteryId, ProjectId};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex};

/// 待写入的审计记录
#[derive(Debug, Clone)]
pub struct NewAuditRecord<'a> {
    pub execution_uuid: &'a str,
    pub project_id: ProjectId,
    pub lottery_id: LotteryId,
    pub audit_type: AuditType,
    pub payload: &'a JsonValue,
}

const SELECT_COLUMNS: &str = r#"
    SELECT audit_id, execution_uuid, project_id, lottery_id, audit_type,
           payload_json, created_at, retired_at
    FROM lottery_audit
"#;

struct AuditRow {
    audit_id: i64,
    execution_uuid: String,
    project_id: i64,
    lottery_id: i64,
    audit_type: String,
    payload_json: String,
    created_at: String,
    retired_at: Option<String>,
}

impl AuditRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            audit_id: row.get(0)?,
            execution_uuid: row.get(1)?,
            project_id: row.get(2)?,
            lottery_id: row.get(3)?,
            audit_type: row.get(4)?,
            payload_json: row.get(5)?,
            created_at: row.get(6)?,
            retired_at: row.get(7)?,
        })
    }

    fn into_record(self) -> RepositoryResult<AuditRecord> {
        let audit_type = AuditType::from_db(&self.audit_type).ok_or_else(|| {
            RepositoryError::FieldValueError {
                field: "audit_type".to_string(),
                message: format!("未知的审计类型: {}", self.audit_type),
            }
        })?;
        let payload = serde_json::from_str(&self.payload_json).map_err(|e| {
            RepositoryError::FieldValueError {
                field: "payload_json".to_string(),
                message: e.to_string(),
            }
        })?;

        Ok(AuditRecord {
            audit_id: self.audit_id,
            execution_uuid: self.execution_uuid,
            project_id: self.project_id,
            lottery_id: self.lottery_id,
            audit_type,
            payload,
            created_at: parse_ts("created_at", &self.created_at)?,
            retired_at: self
                .retired_at
                .as_deref()
                .map(|raw| parse_ts("retired_at", raw))
                .transpose()?,
        })
    }
}

fn parse_ts(field: &str, raw: &str) -> RepositoryResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT).map_err(|e| RepositoryError::FieldValueError {
        field: field.to_string(),
        message: format!("{} ({})", e, raw),
    })
}

fn now_string() -> String {
    chrono::Local::now().naive_local().format(TIMESTAMP_FORMAT).to_string()
}

// ==========================================
// AuditRepository - 审计记录仓储
// ==========================================
pub struct AuditRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AuditRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 追加审计记录
    ///
    /// # 返回
    /// - 新记录的 audit_id
    pub fn insert(&self, record: &NewAuditRecord<'_>) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        Self::insert_in(&conn, record)
    }

    pub fn insert_in(conn: &Connection, record: &NewAuditRecord<'_>) -> RepositoryResult<i64> {
        let payload_json = serde_json::to_string(record.payload).map_err(|e| {
            RepositoryError::FieldValueError {
                field: "payload_json".to_string(),
                message: e.to_string(),
            }
        })?;

        conn.execute(
            r#"
            INSERT INTO lottery_audit
                (execution_uuid, project_id, lottery_id, audit_type, payload_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                record.execution_uuid,
                record.project_id,
                record.lottery_id,
                record.audit_type.as_str(),
                payload_json,
                now_string(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 抽签的有效审计记录（不含已作废）
    pub fn find_by_lottery(&self, lottery_id: LotteryId) -> RepositoryResult<Vec<AuditRecord>> {
        self.query(
            &format!(
                "{} WHERE lottery_id = ?1 AND retired_at IS NULL ORDER BY audit_id",
                SELECT_COLUMNS
            ),
            params![lottery_id],
        )
    }

    /// 抽签的全部审计记录（含已作废）
    pub fn find_by_lottery_with_retired(&self, lottery_id: LotteryId) -> RepositoryResult<Vec<AuditRecord>> {
        self.query(
            &format!("{} WHERE lottery_id = ?1 ORDER BY audit_id", SELECT_COLUMNS),
            params![lottery_id],
        )
    }

    /// 单次执行的全部审计记录
    pub fn find_by_execution(&self, execution_uuid: &str) -> RepositoryResult<Vec<AuditRecord>> {
        self.query(
            &format!("{} WHERE execution_uuid = ?1 ORDER BY audit_id", SELECT_COLUMNS),
            params![execution_uuid],
        )
    }

    /// 最近一次（未作废）执行的 uuid
    pub fn latest_execution_uuid(&self, lottery_id: LotteryId) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        Self::latest_execution_uuid_in(&conn, lottery_id)
    }

    pub fn latest_execution_uuid_in(conn: &Connection, lottery_id: LotteryId) -> RepositoryResult<Option<String>> {
        let uuid = conn
            .query_row(
                r#"
                SELECT execution_uuid FROM lottery_audit
                WHERE lottery_id = ?1 AND retired_at IS NULL
                ORDER BY audit_id DESC
                LIMIT 1
                "#,
                params![lottery_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(uuid)
    }

    /// 作废抽签的全部有效记录
    ///
    /// # 返回
    /// - 被作废的记录数
    pub fn retire_by_lottery(&self, lottery_id: LotteryId) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        Self::retire_by_lottery_in(&conn, lottery_id)
    }

    pub fn retire_by_lottery_in(conn: &Connection, lottery_id: LotteryId) -> RepositoryResult<usize> {
        let rows = conn.execute(
            "UPDATE lottery_audit SET retired_at = ?1 WHERE lottery_id = ?2 AND retired_at IS NULL",
            params![now_string(), lottery_id],
        )?;
        Ok(rows)
    }

    fn query(&self, sql: &str, params: impl rusqlite::Params) -> RepositoryResult<Vec<AuditRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, AuditRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(AuditRow::into_record).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup() -> AuditRepository {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        crate::db::ensure_schema(&conn).unwrap();
        AuditRepository::new(Arc::new(Mutex::new(conn)))
    }

    fn record<'a>(uuid: &'a str, audit_type: AuditType, payload: &'a JsonValue) -> NewAuditRecord<'a> {
        NewAuditRecord {
            execution_uuid: uuid,
            project_id: 1,
            lottery_id: 7,
            audit_type,
            payload,
        }
    }

    #[test]
    fn test_insert_and_find_by_execution() {
        let repo = setup();
        let payload = json!({"families": 3});
        repo.insert(&record("exec-a", AuditType::Init, &payload)).unwrap();
        repo.insert(&record("exec-a", AuditType::ProjectExecution, &json!({}))).unwrap();
        repo.insert(&record("exec-b", AuditType::Init, &json!({}))).unwrap();

        let records = repo.find_by_execution("exec-a").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].audit_type, AuditType::Init);
        assert_eq!(records[0].payload, payload);
        assert_eq!(records[1].audit_type, AuditType::ProjectExecution);
    }

    #[test]
    fn test_retired_records_hidden_but_queryable() {
        let repo = setup();
        repo.insert(&record("exec-a", AuditType::Init, &json!({}))).unwrap();
        repo.insert(&record("exec-a", AuditType::Failure, &json!({}))).unwrap();

        assert_eq!(repo.retire_by_lottery(7).unwrap(), 2);
        repo.insert(&record("exec-b", AuditType::Init, &json!({}))).unwrap();

        let visible = repo.find_by_lottery(7).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].execution_uuid, "exec-b");

        let all = repo.find_by_lottery_with_retired(7).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all[0].is_retired());
        assert!(!all[2].is_retired());

        assert_eq!(repo.latest_execution_uuid(7).unwrap().as_deref(), Some("exec-b"));
    }

    #[test]
    fn test_latest_execution_uuid_none() {
        let repo = setup();
        assert_eq!(repo.latest_execution_uuid(7).unwrap(), None);
    }
}
