// ==========================================
// 抽签分配引擎 - 执行前置校验器
// ==========================================
// 职责: 执行前按固定顺序校验，首个失败即中止
// 顺序:
//   1. 事件类型为抽签
//   2. 已发布（未发布且已被占用 → 已预约）
//   3. 已设置开始日期且不晚于当前时间
//   4. 原子预约（调用方事务内）
//   5. 家庭数 ≥ 2
//   6. 项目内无已分配单元
//   7. 各类型单元数与家庭数一致（mismatch-allowed 时跳过）
// ==========================================

use crate::api::error::{ExecutionError, ExecutionResult, PreconditionViolation};
use crate::domain::lottery::{ExecutionOptions, Lottery};
use crate::repository::{LotteryRepository, ProjectRepository};
use chrono::NaiveDateTime;
use rusqlite::Connection;

/// 最少家庭数
pub const MIN_FAMILIES: i64 = 2;

/// 校验 1-3（只读，不触碰持久化状态）
pub fn check_lottery(lottery: &Lottery, now: NaiveDateTime) -> Result<(), PreconditionViolation> {
    if !lottery.is_lottery() {
        return Err(PreconditionViolation::NotALottery);
    }

    if !lottery.is_published {
        return Err(if lottery.is_claimed() {
            PreconditionViolation::AlreadyReserved
        } else {
            PreconditionViolation::NotPublished
        });
    }

    match lottery.start_date {
        None => Err(PreconditionViolation::NoDateSet),
        Some(start) if start > now => Err(PreconditionViolation::NotYetScheduled),
        Some(_) => Ok(()),
    }
}

/// 校验 4-7（须在同一事务内调用，失败时由调用方回滚）
pub fn reserve_and_check_in(
    conn: &Connection,
    lottery: &Lottery,
    options: &ExecutionOptions,
) -> ExecutionResult<()> {
    if !LotteryRepository::try_reserve_in(conn, lottery.id)? {
        return Err(PreconditionViolation::AlreadyReserved.into());
    }

    let families = ProjectRepository::family_count_in(conn, lottery.project_id)?;
    if families < MIN_FAMILIES {
        return Err(ExecutionError::InsufficientFamilies { count: families });
    }

    let assigned = ProjectRepository::assigned_unit_count_in(conn, lottery.project_id)?;
    if assigned > 0 {
        return Err(ExecutionError::CorruptedState { assigned });
    }

    if !options.mismatch_allowed {
        let mismatches = ProjectRepository::type_count_mismatches_in(conn, lottery.project_id)?;
        if !mismatches.is_empty() {
            return Err(ExecutionError::CountMismatch { mismatches });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::lottery::{EventKind, ExecutionStatus};
    use chrono::NaiveDate;

    fn at(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, day)
            .and_then(|d| d.and_hms_opt(10, 0, 0))
            .unwrap()
    }

    fn lottery() -> Lottery {
        Lottery {
            id: 1,
            project_id: 1,
            kind: EventKind::Lottery,
            is_published: true,
            start_date: Some(at(10)),
            status: ExecutionStatus::NotExecuted,
        }
    }

    #[test]
    fn test_ready_lottery_passes() {
        assert_eq!(check_lottery(&lottery(), at(10)), Ok(()));
        assert_eq!(check_lottery(&lottery(), at(11)), Ok(()));
    }

    #[test]
    fn test_checks_run_in_order() {
        // 类型错误优先于未发布
        let meeting = Lottery {
            kind: EventKind::Meeting,
            is_published: false,
            ..lottery()
        };
        assert_eq!(check_lottery(&meeting, at(11)), Err(PreconditionViolation::NotALottery));

        let unpublished = Lottery {
            is_published: false,
            start_date: None,
            ..lottery()
        };
        assert_eq!(check_lottery(&unpublished, at(11)), Err(PreconditionViolation::NotPublished));
    }

    #[test]
    fn test_unpublished_claimed_lottery_is_already_reserved() {
        for status in [ExecutionStatus::Executing, ExecutionStatus::Executed] {
            let claimed = Lottery {
                is_published: false,
                status,
                ..lottery()
            };
            assert_eq!(
                check_lottery(&claimed, at(11)),
                Err(PreconditionViolation::AlreadyReserved)
            );
        }
    }

    #[test]
    fn test_date_checks() {
        let no_date = Lottery {
            start_date: None,
            ..lottery()
        };
        assert_eq!(check_lottery(&no_date, at(11)), Err(PreconditionViolation::NoDateSet));
        assert_eq!(
            check_lottery(&lottery(), at(9)),
            Err(PreconditionViolation::NotYetScheduled)
        );
    }
}
