// ==========================================
// 抽签分配引擎 - 抽签配置
// ==========================================
// 存储: config_kv 表（scope_id='global'），缺失键使用默认值
// 传递: 由组合根（AppState）读取后注入引擎与执行服务
// ==========================================

use crate::engine::glpk::GlpkSettings;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("数据库错误: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("配置锁获取失败: {0}")]
    Lock(String),

    #[error("配置值无效 (key={key}, value={value}): {message}")]
    InvalidValue {
        key: String,
        value: String,
        message: String,
    },

    #[error("配置序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, value: &str, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            message: message.into(),
        }
    }
}

// ==========================================
// 配置枚举
// ==========================================

/// 分配策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverKind {
    Glpk,
    Greedy,
    Random,
    Test,
}

/// GLPK 优化器实现
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    Glpsol,
    InMemory,
}

/// 求解调度方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// tokio::spawn 后台执行
    Async,
    /// 在请求内同步执行
    Inline,
}

macro_rules! config_enum_str {
    ($ty:ty { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("未知取值: {}", other)),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

config_enum_str!(SolverKind { Glpk => "glpk", Greedy => "greedy", Random => "random", Test => "test" });
config_enum_str!(OptimizerKind { Glpsol => "glpsol", InMemory => "in_memory" });
config_enum_str!(DispatchMode { Async => "async", Inline => "inline" });

// ==========================================
// LotteryConfig - 抽签配置
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LotteryConfig {
    pub solver: SolverKind,
    pub optimizer: OptimizerKind,
    pub glpsol_path: PathBuf,
    pub temp_dir: PathBuf,
    pub timeout_secs: f64,
    pub phase1_max_size: usize,
    pub phase1_timeout_secs: f64,
    pub redistribute_orphans: bool,
    pub dispatch_mode: DispatchMode,
}

impl Default for LotteryConfig {
    fn default() -> Self {
        Self {
            solver: SolverKind::Glpk,
            optimizer: OptimizerKind::Glpsol,
            glpsol_path: PathBuf::from("/usr/bin/glpsol"),
            temp_dir: std::env::temp_dir(),
            timeout_secs: 30.0,
            phase1_max_size: 25,
            phase1_timeout_secs: 0.5,
            redistribute_orphans: true,
            dispatch_mode: DispatchMode::Async,
        }
    }
}

impl LotteryConfig {
    /// 校验数值范围
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_timeout(config_keys::TIMEOUT_SECS, self.timeout_secs)?;
        check_timeout(config_keys::PHASE1_TIMEOUT_SECS, self.phase1_timeout_secs)?;
        if self.phase1_max_size == 0 {
            return Err(ConfigError::invalid(
                config_keys::PHASE1_MAX_SIZE,
                "0",
                "必须大于 0",
            ));
        }
        Ok(())
    }

    /// 转换为 GLPK 求解设置
    pub fn glpk_settings(&self) -> GlpkSettings {
        GlpkSettings {
            timeout: Duration::from_secs_f64(self.timeout_secs),
            phase1_max_size: self.phase1_max_size,
            phase1_timeout: Duration::from_secs_f64(self.phase1_timeout_secs),
            ..GlpkSettings::default()
        }
    }
}

/// 求解限时上限（秒）
pub const MAX_TIMEOUT_SECS: f64 = 3600.0;

fn check_timeout(key: &str, value: f64) -> Result<(), ConfigError> {
    if !(value.is_finite() && value > 0.0) {
        return Err(ConfigError::invalid(key, &value.to_string(), "必须为正数"));
    }
    if value > MAX_TIMEOUT_SECS {
        return Err(ConfigError::invalid(
            key,
            &value.to_string(),
            format!("不能超过 {} 秒", MAX_TIMEOUT_SECS),
        ));
    }
    Ok(())
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 策略
    pub const SOLVER: &str = "lottery.solver";
    pub const REDISTRIBUTE_ORPHANS: &str = "lottery.redistribute_orphans";
    pub const DISPATCH_MODE: &str = "lottery.dispatch_mode";

    // GLPK
    pub const OPTIMIZER: &str = "lottery.glpk.optimizer";
    pub const GLPSOL_PATH: &str = "lottery.glpk.glpsol_path";
    pub const TEMP_DIR: &str = "lottery.glpk.temp_dir";
    pub const TIMEOUT_SECS: &str = "lottery.glpk.timeout_secs";
    pub const PHASE1_MAX_SIZE: &str = "lottery.glpk.phase1_max_size";
    pub const PHASE1_TIMEOUT_SECS: &str = "lottery.glpk.phase1_timeout_secs";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = LotteryConfig::default();
        config.validate().unwrap();

        let settings = config.glpk_settings();
        assert_eq!(settings.timeout, Duration::from_secs(30));
        assert_eq!(settings.phase1_max_size, 25);
        assert_eq!(settings.phase1_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!("GLPK".parse::<SolverKind>().unwrap(), SolverKind::Glpk);
        assert_eq!("random".parse::<SolverKind>().unwrap(), SolverKind::Random);
        assert_eq!(" in_memory ".parse::<OptimizerKind>().unwrap(), OptimizerKind::InMemory);
        assert_eq!("inline".parse::<DispatchMode>().unwrap(), DispatchMode::Inline);
        assert!("simplex".parse::<SolverKind>().is_err());
    }

    #[test]
    fn test_validate_rejects_non_positive_timeout() {
        let config = LotteryConfig {
            timeout_secs: 0.0,
            ..LotteryConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == config_keys::TIMEOUT_SECS));
    }

    #[test]
    fn test_validate_rejects_oversized_timeouts() {
        let huge = LotteryConfig {
            timeout_secs: 1.5e19,
            ..LotteryConfig::default()
        };
        let err = huge.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == config_keys::TIMEOUT_SECS));

        let phase1 = LotteryConfig {
            phase1_timeout_secs: MAX_TIMEOUT_SECS + 1.0,
            ..LotteryConfig::default()
        };
        let err = phase1.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == config_keys::PHASE1_TIMEOUT_SECS));

        let at_limit = LotteryConfig {
            timeout_secs: MAX_TIMEOUT_SECS,
            ..LotteryConfig::default()
        };
        at_limit.validate().unwrap();
        // 上限值下单家庭二分步限时不溢出
        let glpk = crate::engine::glpk::Glpk::new(
            std::sync::Arc::new(crate::engine::glpk::InMemoryOptimizer::new()),
            at_limit.glpk_settings(),
        );
        assert_eq!(glpk.step_timeout(1), Duration::from_secs(7200));
    }
}
