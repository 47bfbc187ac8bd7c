// ==========================================
// 抽签分配引擎 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、不变量
// 红线: 不含数据访问逻辑,不含求解逻辑
// ==========================================

pub mod audit;
pub mod lottery;
pub mod result;
pub mod spec;
pub mod types;

// 重导出核心类型
pub use audit::{AuditRecord, AuditType};
pub use lottery::{
    AssignedUnit, EventKind, ExecutionOptions, ExecutionStatus, Lottery, TypeCountMismatch,
    UnknownOption,
};
pub use result::{Orphans, SolverResult};
pub use spec::{LotteryManifest, LotterySpec, SpecError};
pub use types::{FamilyId, GroupKey, LotteryId, ProjectId, UnitId, UnitRef, MOCK_UNIT_PREFIX};
