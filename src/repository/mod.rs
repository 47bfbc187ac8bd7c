// ==========================================
// 抽签分配引擎 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod audit_repo;
pub mod error;
pub mod lottery_repo;
pub mod project_repo;

// 重导出核心仓储
pub use audit_repo::{AuditRepository, NewAuditRecord};
pub use error::{RepositoryError, RepositoryResult};
pub use lottery_repo::LotteryRepository;
pub use project_repo::{FamilyRecord, ProjectRepository, UnitRecord};

use rusqlite::Connection;
use std::sync::{Arc, Mutex};

/// 在单个事务内执行闭包
///
/// 闭包返回 Ok 时提交，返回 Err 时事务随 drop 回滚。
/// 仓储的 `*_in` 方法接收 `&Connection`，可在闭包内组合调用。
pub fn with_transaction<T, E, F>(conn: &Arc<Mutex<Connection>>, f: F) -> Result<T, E>
where
    E: From<RepositoryError>,
    F: FnOnce(&Connection) -> Result<T, E>,
{
    let guard = conn
        .lock()
        .map_err(|e| RepositoryError::LockError(e.to_string()))?;
    let tx = guard
        .unchecked_transaction()
        .map_err(RepositoryError::from)?;

    let value = f(&tx)?;

    tx.commit().map_err(RepositoryError::from)?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> Arc<Mutex<Connection>> {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        crate::db::ensure_schema(&conn).unwrap();
        Arc::new(Mutex::new(conn))
    }

    fn count_types(conn: &Arc<Mutex<Connection>>) -> i64 {
        conn.lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM unit_type", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_with_transaction_commits_on_ok() {
        let conn = shared();
        let result: RepositoryResult<()> = with_transaction(&conn, |c| {
            c.execute("INSERT INTO unit_type (unit_type_id, project_id, name) VALUES (1, 1, 'A')", [])?;
            Ok(())
        });
        result.unwrap();
        assert_eq!(count_types(&conn), 1);
    }

    #[test]
    fn test_with_transaction_rolls_back_on_err() {
        let conn = shared();
        let result: RepositoryResult<()> = with_transaction(&conn, |c| {
            c.execute("INSERT INTO unit_type (unit_type_id, project_id, name) VALUES (1, 1, 'A')", [])?;
            Err(RepositoryError::InvalidStateTransition {
                from: "a".to_string(),
                to: "b".to_string(),
            })
        });
        assert!(result.is_err());
        assert_eq!(count_types(&conn), 0);
    }
}
