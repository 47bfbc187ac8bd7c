// ==========================================
// 抽签分配引擎 - 引擎层错误类型
// ==========================================
// 工具: thiserror 派生宏
// ==========================================

use crate::domain::spec::SpecError;
use crate::domain::types::GroupKey;
use thiserror::Error;

/// 求解器错误
///
/// 每个变体对应一个稳定的原因代码（写入 FAILURE 审计记录）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SolverError {
    #[error("求解器可执行文件不存在或不可执行: {path}")]
    BinaryNotFound { path: String },

    #[error("求解器工作目录不可写: {path} ({message})")]
    WorkspaceUnwritable { path: String, message: String },

    #[error("求解超时: {task}, 限时 {limit_ms}ms")]
    Timeout { task: String, limit_ms: u64 },

    #[error("求解输出无法解析: {0}")]
    Unparseable(String),

    #[error("模型不可行: {0}")]
    Infeasible(String),

    #[error("求解器进程失败: {0}")]
    ProcessFailed(String),

    #[error("求解结果不是完美匹配: {0}")]
    InvalidSolution(String),

    #[error("规格无效: {0}")]
    InvalidSpec(#[from] SpecError),
}

impl SolverError {
    /// 稳定的原因代码
    pub fn reason_code(&self) -> &'static str {
        match self {
            SolverError::BinaryNotFound { .. } => "BINARY_NOT_FOUND",
            SolverError::WorkspaceUnwritable { .. } => "WORKSPACE_UNWRITABLE",
            SolverError::Timeout { .. } => "TIMEOUT",
            SolverError::Unparseable(_) => "UNPARSEABLE",
            SolverError::Infeasible(_) => "INFEASIBLE",
            SolverError::ProcessFailed(_) => "PROCESS_FAILED",
            SolverError::InvalidSolution(_) => "INVALID_SOLUTION",
            SolverError::InvalidSpec(_) => "INVALID_SPEC",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SolverError::Timeout { .. })
    }

    pub fn is_infeasible(&self) -> bool {
        matches!(self, SolverError::Infeasible(_))
    }
}

/// 引擎层错误（编排器）
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("清单无效: {0}")]
    InvalidManifest(#[from] SpecError),

    #[error("分组求解失败: group={group:?}, {source}")]
    Solver {
        group: Option<GroupKey>,
        #[source]
        source: SolverError,
    },

    #[error("结果对账失败: {0}")]
    AccountingMismatch(String),

    #[error("审计记录写入失败: {0}")]
    AuditSink(String),
}

impl EngineError {
    /// 底层求解器错误（若有）
    pub fn solver_error(&self) -> Option<&SolverError> {
        match self {
            EngineError::Solver { source, .. } => Some(source),
            _ => None,
        }
    }

    pub fn reason_code(&self) -> &'static str {
        match self {
            EngineError::InvalidManifest(_) => "INVALID_MANIFEST",
            EngineError::Solver { source, .. } => source.reason_code(),
            EngineError::AccountingMismatch(_) => "ACCOUNTING_MISMATCH",
            EngineError::AuditSink(_) => "AUDIT_SINK",
        }
    }
}
