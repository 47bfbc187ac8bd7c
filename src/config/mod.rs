// ==========================================
// 抽签分配引擎 - 配置层
// ==========================================
// 职责: 系统配置管理
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod lottery_config;

// 重导出核心配置管理器
pub use config_manager::ConfigManager;
pub use lottery_config::{
    config_keys, ConfigError, DispatchMode, LotteryConfig, OptimizerKind, SolverKind,
};
