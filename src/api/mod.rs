// ==========================================
// 抽签分配引擎 - API 层
// ==========================================
// 职责: 抽签执行生命周期（校验、预约、调度、作废），供入口程序与库调用方使用
// ==========================================

pub mod audit_recorder;
pub mod error;
pub mod execution_service;
pub mod manifest_builder;
pub mod validator;

// 重导出核心类型
pub use audit_recorder::ExecutionAuditSink;
pub use error::{ExecutionError, ExecutionResult, PreconditionViolation};
pub use execution_service::{
    ExecutionOutcome, ExecutionService, ExecutionTicket, InvalidationReport,
};
pub use manifest_builder::build_manifest_in;
