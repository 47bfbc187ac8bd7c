// ==========================================
// 抽签分配引擎 - 执行服务错误类型
// ==========================================
// 职责: 汇总前置校验、求解、存储错误，提供稳定的错误分类与本地化用户消息
// ==========================================

use crate::domain::lottery::{TypeCountMismatch, UnknownOption};
use crate::domain::types::LotteryId;
use crate::engine::error::{EngineError, SolverError};
use crate::i18n::{t, t_with_args};
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 前置条件违反
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreconditionViolation {
    #[error("事件类型不是抽签")]
    NotALottery,

    #[error("抽签未发布")]
    NotPublished,

    #[error("抽签未设置开始日期")]
    NoDateSet,

    #[error("抽签开始日期未到")]
    NotYetScheduled,

    #[error("抽签已执行或正在执行")]
    AlreadyReserved,
}

impl PreconditionViolation {
    fn message_key(&self) -> &'static str {
        match self {
            PreconditionViolation::NotALottery => "lottery.not_a_lottery",
            PreconditionViolation::NotPublished => "lottery.cannot_execute_generic",
            PreconditionViolation::NoDateSet => "lottery.no_date_set",
            PreconditionViolation::NotYetScheduled => "lottery.not_yet_scheduled",
            PreconditionViolation::AlreadyReserved => "lottery.already_reserved",
        }
    }
}

/// 执行服务错误
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("前置条件不满足: {0}")]
    Precondition(PreconditionViolation),

    #[error("抽签不存在: lottery_id={0}")]
    NotFound(LotteryId),

    #[error("抽签未执行，无法作废: lottery_id={0}")]
    NotExecuted(LotteryId),

    #[error("家庭数量不足: 需要至少 2 户，实际 {count} 户")]
    InsufficientFamilies { count: i64 },

    #[error("单元类型数量不一致: {} 个类型", .mismatches.len())]
    CountMismatch { mismatches: Vec<TypeCountMismatch> },

    #[error("数据状态异常: 已有 {assigned} 个单元被分配")]
    CorruptedState { assigned: i64 },

    #[error("求解失败: {0}")]
    Solver(#[from] SolverError),

    #[error("引擎执行失败: {0}")]
    Engine(#[from] EngineError),

    #[error("存储错误: {0}")]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    InvalidOption(#[from] UnknownOption),

    /// 求解任务 panic（已写 FAILURE 并释放预约）
    #[error("求解任务异常终止: {0}")]
    Panicked(String),
}

impl From<PreconditionViolation> for ExecutionError {
    fn from(violation: PreconditionViolation) -> Self {
        ExecutionError::Precondition(violation)
    }
}

impl ExecutionError {
    /// 稳定的错误类别（写入 FAILURE 审计的 error_type）
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::Precondition(_) => "PRECONDITION",
            ExecutionError::NotFound(_) => "NOT_FOUND",
            ExecutionError::NotExecuted(_) => "NOT_EXECUTED",
            ExecutionError::InsufficientFamilies { .. } => "INSUFFICIENT_FAMILIES",
            ExecutionError::CountMismatch { .. } => "COUNT_MISMATCH",
            ExecutionError::CorruptedState { .. } => "CORRUPTED_STATE",
            ExecutionError::Solver(_) => "SOLVER",
            ExecutionError::Engine(e) if e.solver_error().is_some() => "SOLVER",
            ExecutionError::Engine(_) => "ENGINE",
            ExecutionError::Repository(_) => "REPOSITORY",
            ExecutionError::InvalidOption(_) => "INVALID_OPTION",
            ExecutionError::Panicked(_) => "TASK_PANICKED",
        }
    }

    /// 细分原因码（求解器错误取其 reason_code）
    pub fn reason_code(&self) -> &'static str {
        match self {
            ExecutionError::Solver(e) => e.reason_code(),
            ExecutionError::Engine(e) => e.reason_code(),
            other => other.kind(),
        }
    }

    /// 是否可重试
    ///
    /// CountMismatch 可通过 `mismatch-allowed` 重试
    pub fn is_retryable(&self) -> bool {
        match self {
            ExecutionError::CountMismatch { .. }
            | ExecutionError::Solver(_)
            | ExecutionError::Repository(_) => true,
            ExecutionError::Engine(e) => e.solver_error().is_some(),
            _ => false,
        }
    }

    /// 面向用户的本地化消息
    pub fn user_message(&self) -> String {
        match self {
            ExecutionError::Precondition(v) => t(v.message_key()),
            ExecutionError::NotFound(id) => {
                t_with_args("lottery.not_found", &[("id", &id.to_string())])
            }
            ExecutionError::NotExecuted(_) => t("lottery.not_executed"),
            ExecutionError::InsufficientFamilies { count } => t_with_args(
                "lottery.insufficient_families",
                &[("count", &count.to_string())],
            ),
            ExecutionError::CountMismatch { mismatches } => mismatch_message(mismatches),
            ExecutionError::CorruptedState { assigned } => t_with_args(
                "lottery.corrupted_state",
                &[("count", &assigned.to_string())],
            ),
            ExecutionError::InvalidOption(_) => t("lottery.cannot_execute_generic"),
            ExecutionError::Solver(_)
            | ExecutionError::Engine(_)
            | ExecutionError::Repository(_)
            | ExecutionError::Panicked(_) => {
                t("lottery.execution_failed")
            }
        }
    }
}

fn mismatch_message(mismatches: &[TypeCountMismatch]) -> String {
    let mut lines = vec![t("lottery.mismatch_intro")];
    for m in mismatches {
        let key = if m.has_excess_units() {
            "lottery.mismatch_excess_units"
        } else {
            "lottery.mismatch_insufficient_units"
        };
        lines.push(t_with_args(
            key,
            &[
                ("unit_type", &m.unit_type_name),
                ("units", &m.units_count.to_string()),
                ("families", &m.families_count.to_string()),
            ],
        ));
    }
    lines.join("\n")
}

/// Result 类型别名
pub type ExecutionResult<T> = Result<T, ExecutionError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i18n::{set_locale, tests::LOCALE_TEST_LOCK};

    fn mismatch(name: &str, units: i64, families: i64) -> TypeCountMismatch {
        TypeCountMismatch {
            unit_type_id: 1,
            unit_type_name: name.to_string(),
            units_count: units,
            families_count: families,
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(!ExecutionError::from(PreconditionViolation::AlreadyReserved).is_retryable());
        assert!(!ExecutionError::InsufficientFamilies { count: 1 }.is_retryable());
        assert!(!ExecutionError::CorruptedState { assigned: 2 }.is_retryable());
        assert!(ExecutionError::CountMismatch { mismatches: vec![] }.is_retryable());
        assert!(ExecutionError::Solver(SolverError::Unparseable("x".into())).is_retryable());
        assert!(ExecutionError::Repository(RepositoryError::LockError("x".into())).is_retryable());
        assert!(!ExecutionError::Panicked("boom".into()).is_retryable());
    }

    #[test]
    fn test_reason_code_from_engine() {
        let err = ExecutionError::Engine(EngineError::Solver {
            group: Some(1),
            source: SolverError::BinaryNotFound { path: "/nope".into() },
        });
        assert_eq!(err.kind(), "SOLVER");
        assert_eq!(err.reason_code(), "BINARY_NOT_FOUND");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_mismatch_user_message() {
        let _guard = LOCALE_TEST_LOCK.lock().unwrap();
        set_locale("en");

        let err = ExecutionError::CountMismatch {
            mismatches: vec![mismatch("2BR", 3, 2), mismatch("3BR", 1, 2)],
        };
        let msg = err.user_message();
        assert_eq!(
            msg,
            "There are inconsistencies between units and families:\n\
             2BR has 3 units for 2 families (excess units)\n\
             3BR has 1 units for 2 families (insufficient units)"
        );

        set_locale("zh-CN");
    }

    #[test]
    fn test_precondition_user_message() {
        let _guard = LOCALE_TEST_LOCK.lock().unwrap();
        set_locale("en");
        assert_eq!(
            ExecutionError::from(PreconditionViolation::NoDateSet).user_message(),
            "You must schedule a start date for the lottery before executing it."
        );
        set_locale("zh-CN");
    }
}
