// ==========================================
// 抽签分配引擎 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、写入
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::lottery_config::{config_keys, ConfigError, LotteryConfig};
use crate::db::open_sqlite_connection;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, ConfigError> {
        let conn = open_sqlite_connection(db_path)?;
        crate::db::ensure_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 共享连接（供同库的仓储复用）
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    fn get_conn(&self) -> Result<std::sync::MutexGuard<Connection>, ConfigError> {
        self.conn
            .lock()
            .map_err(|e| ConfigError::Lock(e.to_string()))
    }

    /// 读取 global scope 的配置值
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> Result<Option<String>, ConfigError> {
        let conn = self.get_conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入 global scope 的配置值（UPSERT）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO config_kv (scope_id, key, value, updated_at)
            VALUES ('global', ?1, ?2, datetime('now'))
            ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    /// 获取 global 配置快照（JSON 格式，键有序）
    ///
    /// # 用途
    /// - 写入 INIT 审计，记录本次执行使用的配置
    pub fn get_config_snapshot(&self) -> Result<String, ConfigError> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;

        let config_map: BTreeMap<String, String> = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<_, _>>()?;

        Ok(serde_json::to_string(&json!(config_map))?)
    }

    /// 读取抽签配置
    ///
    /// 缺失键使用默认值；存在但无法解析的值返回 InvalidValue
    pub fn load_lottery_config(&self) -> Result<LotteryConfig, ConfigError> {
        let defaults = LotteryConfig::default();

        let config = LotteryConfig {
            solver: self.parse_or(config_keys::SOLVER, defaults.solver)?,
            optimizer: self.parse_or(config_keys::OPTIMIZER, defaults.optimizer)?,
            glpsol_path: self
                .non_empty(config_keys::GLPSOL_PATH)?
                .map(PathBuf::from)
                .unwrap_or(defaults.glpsol_path),
            temp_dir: self
                .non_empty(config_keys::TEMP_DIR)?
                .map(PathBuf::from)
                .unwrap_or(defaults.temp_dir),
            timeout_secs: self.parse_or(config_keys::TIMEOUT_SECS, defaults.timeout_secs)?,
            phase1_max_size: self.parse_or(config_keys::PHASE1_MAX_SIZE, defaults.phase1_max_size)?,
            phase1_timeout_secs: self
                .parse_or(config_keys::PHASE1_TIMEOUT_SECS, defaults.phase1_timeout_secs)?,
            redistribute_orphans: self
                .parse_or(config_keys::REDISTRIBUTE_ORPHANS, defaults.redistribute_orphans)?,
            dispatch_mode: self.parse_or(config_keys::DISPATCH_MODE, defaults.dispatch_mode)?,
        };

        config.validate()?;
        tracing::debug!(?config, "抽签配置已加载");
        Ok(config)
    }

    fn non_empty(&self, key: &str) -> Result<Option<String>, ConfigError> {
        Ok(self
            .get_global_config_value(key)?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()))
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.non_empty(key)? {
            Some(raw) => raw
                .parse::<T>()
                .map_err(|e| ConfigError::invalid(key, &raw, e.to_string())),
            None => Ok(default),
        }
    }
}
