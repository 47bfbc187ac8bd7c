// ==========================================
// 抽签分配引擎 - 仓储层错误类型
// ==========================================
// 工具: thiserror 派生宏
// ==========================================

use rusqlite::ErrorCode;
use thiserror::Error;

/// 仓储层错误类型
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("数据库锁获取失败: {0}")]
    LockError(String),

    /// 其他连接持有写锁且超过 busy_timeout
    #[error("数据库繁忙: {0}")]
    Busy(String),

    #[error("约束违反: {0}")]
    ConstraintViolation(String),

    #[error("数据库操作失败: {0}")]
    Database(rusqlite::Error),

    /// 条件更新未命中（状态已被其他执行改变）
    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    /// 持久化的值无法还原为领域类型
    #[error("字段值错误 (field={field}): {message}")]
    FieldValueError { field: String, message: String },
}

impl From<rusqlite::Error> for RepositoryError {
    fn from(err: rusqlite::Error) -> Self {
        let code = err.sqlite_error_code();
        match code {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
                RepositoryError::Busy(err.to_string())
            }
            Some(ErrorCode::ConstraintViolation) => {
                RepositoryError::ConstraintViolation(err.to_string())
            }
            _ => RepositoryError::Database(err),
        }
    }
}

/// Result 类型别名
pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_constraint_errors_are_classified() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY); INSERT INTO t VALUES (1);")
            .unwrap();

        let err: RepositoryError = conn
            .execute("INSERT INTO t VALUES (1)", [])
            .unwrap_err()
            .into();
        assert!(matches!(err, RepositoryError::ConstraintViolation(_)));
    }

    #[test]
    fn test_other_errors_keep_source() {
        let conn = Connection::open_in_memory().unwrap();
        let err: RepositoryError = conn.execute("SELECT * FROM missing", []).unwrap_err().into();
        assert!(matches!(err, RepositoryError::Database(_)));
    }
}
