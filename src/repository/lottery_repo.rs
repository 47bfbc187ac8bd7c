// ==========================================
// 抽签分配引擎 - 抽签活动仓储
// ==========================================
// 对齐: event 表
// 预约为条件更新（is_published = 1 才能翻转），是唯一的互斥原语
// `*_in` 方法在调用方事务内执行
// ==========================================

use crate::db::TIMESTAMP_FORMAT;
use crate::domain::lottery::{EventKind, ExecutionStatus, Lottery};
use crate::domain::types::LotteryId;
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

/// event 表原始行
struct LotteryRow {
    id: i64,
    project_id: i64,
    kind: String,
    is_published: bool,
    start_date: Option<String>,
    status: String,
}

impl LotteryRow {
    fn into_lottery(self) -> RepositoryResult<Lottery> {
        let status = ExecutionStatus::from_db(&self.status).ok_or_else(|| {
            RepositoryError::FieldValueError {
                field: "execution_status".to_string(),
                message: format!("未知的执行状态: {}", self.status),
            }
        })?;

        let start_date = match self.start_date.as_deref() {
            Some(raw) => Some(parse_timestamp(raw).ok_or_else(|| RepositoryError::FieldValueError {
                field: "start_date".to_string(),
                message: format!("无法解析日期: {}", raw),
            })?),
            None => None,
        };

        Ok(Lottery {
            id: self.id,
            project_id: self.project_id,
            kind: EventKind::from_db(&self.kind),
            is_published: self.is_published,
            start_date,
            status,
        })
    }
}

/// 解析时间戳（兼容仅日期）
fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S").ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn now_string() -> String {
    chrono::Local::now().naive_local().format(TIMESTAMP_FORMAT).to_string()
}

// ==========================================
// LotteryRepository - 抽签活动仓储
// ==========================================
// 红线: Repository 不做业务逻辑,只做数据映射
pub struct LotteryRepository {
    conn: Arc<Mutex<Connection>>,
}

impl LotteryRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 查询操作
    // ==========================================

    pub fn find(&self, lottery_id: LotteryId) -> RepositoryResult<Option<Lottery>> {
        let conn = self.get_conn()?;
        Self::find_in(&conn, lottery_id)
    }

    pub fn find_in(conn: &Connection, lottery_id: LotteryId) -> RepositoryResult<Option<Lottery>> {
        let row = conn
            .query_row(
                r#"
                SELECT event_id, project_id, kind, is_published, start_date, execution_status
                FROM event
                WHERE event_id = ?1
                "#,
                params![lottery_id],
                |row| {
                    Ok(LotteryRow {
                        id: row.get(0)?,
                        project_id: row.get(1)?,
                        kind: row.get(2)?,
                        is_published: row.get::<_, i64>(3)? != 0,
                        start_date: row.get(4)?,
                        status: row.get(5)?,
                    })
                },
            )
            .optional()?;

        row.map(LotteryRow::into_lottery).transpose()
    }

    // ==========================================
    // 写入操作
    // ==========================================

    /// 新增抽签活动
    pub fn insert(&self, lottery: &Lottery) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO event (event_id, project_id, kind, is_published, start_date, execution_status, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                lottery.id,
                lottery.project_id,
                lottery.kind.as_str(),
                lottery.is_published as i64,
                lottery.start_date.map(|d| d.format(TIMESTAMP_FORMAT).to_string()),
                lottery.status.as_str(),
                now_string(),
            ],
        )?;
        Ok(())
    }

    /// 原子预约
    ///
    /// # 返回
    /// - `Ok(true)`: 预约成功（is_published 1 → 0，状态 EXECUTING）
    /// - `Ok(false)`: 已被其他执行预约
    pub fn try_reserve_in(conn: &Connection, lottery_id: LotteryId) -> RepositoryResult<bool> {
        let rows = conn.execute(
            r#"
            UPDATE event
            SET is_published = 0, execution_status = ?1, updated_at = ?2
            WHERE event_id = ?3 AND is_published = 1
            "#,
            params![ExecutionStatus::Executing.as_str(), now_string(), lottery_id],
        )?;
        Ok(rows == 1)
    }

    /// 释放预约（执行失败后恢复可执行）
    pub fn release(&self, lottery_id: LotteryId) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::transition_in(
            &conn,
            lottery_id,
            ExecutionStatus::Executing,
            ExecutionStatus::NotExecuted,
            true,
        )
    }

    /// 标记已执行
    pub fn mark_executed_in(conn: &Connection, lottery_id: LotteryId) -> RepositoryResult<()> {
        Self::transition_in(
            conn,
            lottery_id,
            ExecutionStatus::Executing,
            ExecutionStatus::Executed,
            false,
        )
    }

    /// 作废后恢复可执行
    pub fn restore_in(conn: &Connection, lottery_id: LotteryId) -> RepositoryResult<()> {
        Self::transition_in(
            conn,
            lottery_id,
            ExecutionStatus::Executed,
            ExecutionStatus::NotExecuted,
            true,
        )
    }

    fn transition_in(
        conn: &Connection,
        lottery_id: LotteryId,
        from: ExecutionStatus,
        to: ExecutionStatus,
        publish: bool,
    ) -> RepositoryResult<()> {
        let rows = conn.execute(
            r#"
            UPDATE event
            SET execution_status = ?1, is_published = ?2, updated_at = ?3
            WHERE event_id = ?4 AND execution_status = ?5
            "#,
            params![to.as_str(), publish as i64, now_string(), lottery_id, from.as_str()],
        )?;

        if rows == 0 {
            return Err(RepositoryError::InvalidStateTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        Ok(())
    }
}
