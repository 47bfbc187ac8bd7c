// ==========================================
// 抽签分配引擎 - 引擎层
// ==========================================
// 职责: 规格平衡、GMPL 编解码、求解策略、分组编排
// 红线: Engine 不拼 SQL，不读配置表；策略与审计输出均由调用方注入
// ==========================================

pub mod balancer;
pub mod error;
pub mod events;
pub mod glpk;
pub mod orchestrator;
pub mod solver;

// 重导出核心引擎
pub use balancer::{BalancedSpec, SpecBalancer};
pub use error::{EngineError, SolverError};
pub use events::{AuditEvent, AuditSink, MemoryAuditSink, NoOpAuditSink};
pub use glpk::{
    FeasibilityOutcome, Glpk, GlpkSettings, GlpsolOptimizer, InMemoryOptimizer, OptimizerPort,
    Strategy,
};
pub use orchestrator::LotteryOrchestrator;
pub use solver::{GlpkSolver, GreedySolver, RandomSolver, SolveContext, Solver, TestSolver};
