// ==========================================
// 抽签分配引擎 - 核心库
// ==========================================
// 技术栈: Rust + SQLite + GLPK (glpsol)
// 系统定位: 按偏好公平分配住房单元，结果可复现、可审计
// ==========================================

// 初始化国际化系统
rust_i18n::i18n!("locales", fallback = "zh-CN");

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 平衡、求解、编排
pub mod engine;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一/建表）
pub mod db;

// 日志系统
pub mod logging;

// 国际化
pub mod i18n;

// API 层 - 执行生命周期
pub mod api;

// 应用层 - 组合根
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::{
    AuditRecord, AuditType, ExecutionOptions, ExecutionStatus, FamilyId, Lottery,
    LotteryManifest, LotterySpec, Orphans, SolverResult, UnitId, UnitRef,
};

// 引擎
pub use engine::{
    AuditEvent, AuditSink, EngineError, GlpkSolver, GreedySolver, LotteryOrchestrator,
    SolveContext, Solver, SolverError, SpecBalancer, TestSolver,
};

// API
pub use api::{ExecutionError, ExecutionOutcome, ExecutionService, ExecutionTicket};

// 应用
pub use app::AppState;

// ==========================================
// 系统常量
// ==========================================

/// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 系统名称
pub const APP_NAME: &str = "抽签分配引擎";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
