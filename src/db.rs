// ==========================================
// 抽签分配引擎 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为（外键、busy_timeout）
// - 建表（幂等），记录 schema_version
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 时间戳存储格式
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER NOT NULL,
    applied_at  TEXT    NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id    TEXT NOT NULL DEFAULT 'global',
    key         TEXT NOT NULL,
    value       TEXT NOT NULL,
    updated_at  TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (scope_id, key)
);

CREATE TABLE IF NOT EXISTS unit_type (
    unit_type_id  INTEGER PRIMARY KEY,
    project_id    INTEGER NOT NULL,
    name          TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS event (
    event_id          INTEGER PRIMARY KEY,
    project_id        INTEGER NOT NULL,
    kind              TEXT    NOT NULL DEFAULT 'lottery',
    is_published      INTEGER NOT NULL DEFAULT 0,
    start_date        TEXT,
    execution_status  TEXT    NOT NULL DEFAULT 'NOT_EXECUTED',
    updated_at        TEXT
);

CREATE TABLE IF NOT EXISTS family (
    family_id     INTEGER PRIMARY KEY,
    project_id    INTEGER NOT NULL,
    unit_type_id  INTEGER NOT NULL REFERENCES unit_type(unit_type_id),
    name          TEXT
);

CREATE TABLE IF NOT EXISTS unit (
    unit_id       INTEGER PRIMARY KEY,
    project_id    INTEGER NOT NULL,
    unit_type_id  INTEGER NOT NULL REFERENCES unit_type(unit_type_id),
    identifier    TEXT,
    family_id     INTEGER REFERENCES family(family_id)
);

CREATE TABLE IF NOT EXISTS family_preference (
    family_id  INTEGER NOT NULL REFERENCES family(family_id),
    unit_id    INTEGER NOT NULL REFERENCES unit(unit_id),
    rank       INTEGER NOT NULL,
    PRIMARY KEY (family_id, unit_id)
);

CREATE TABLE IF NOT EXISTS lottery_audit (
    audit_id        INTEGER PRIMARY KEY AUTOINCREMENT,
    execution_uuid  TEXT    NOT NULL,
    project_id      INTEGER NOT NULL,
    lottery_id      INTEGER NOT NULL,
    audit_type      TEXT    NOT NULL,
    payload_json    TEXT    NOT NULL,
    created_at      TEXT    NOT NULL,
    retired_at      TEXT
);

CREATE INDEX IF NOT EXISTS idx_family_project ON family(project_id, unit_type_id);
CREATE INDEX IF NOT EXISTS idx_unit_project ON unit(project_id, unit_type_id);
CREATE INDEX IF NOT EXISTS idx_audit_lottery ON lottery_audit(lottery_id, retired_at);
CREATE INDEX IF NOT EXISTS idx_audit_execution ON lottery_audit(execution_uuid);
"#;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：foreign_keys 与 busy_timeout 需要"每个连接"单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 打开连接、建表，并包装为仓储共享句柄
pub fn open_shared_connection(db_path: &str) -> rusqlite::Result<Arc<Mutex<Connection>>> {
    let conn = open_sqlite_connection(db_path)?;
    ensure_schema(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// 建表（幂等）
pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    let version = read_schema_version(conn)?;
    if version.map_or(true, |v| v < CURRENT_SCHEMA_VERSION) {
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [CURRENT_SCHEMA_VERSION],
        )?;
    }
    Ok(())
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();

        ensure_schema(&conn).unwrap();
        ensure_schema(&conn).unwrap();

        assert_eq!(read_schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_schema_version_missing_table() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), None);
    }
}
