// ==========================================
// 抽签分配引擎 - 抽签活动领域模型
// ==========================================
// 执行状态与发布标记分离:
// - is_published: 可被执行（预约时原子翻转为 false）
// - ExecutionStatus: 执行生命周期
// ==========================================

use crate::domain::types::{LotteryId, ProjectId, UnitId};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ==========================================
// EventKind - 活动类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Lottery,
    Meeting,
    Other,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Lottery => "lottery",
            EventKind::Meeting => "meeting",
            EventKind::Other => "other",
        }
    }

    /// 从数据库字符串解析（未知类型归为 Other）
    pub fn from_db(s: &str) -> Self {
        match s {
            "lottery" => EventKind::Lottery,
            "meeting" => EventKind::Meeting,
            _ => EventKind::Other,
        }
    }
}

// ==========================================
// ExecutionStatus - 抽签执行状态
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    NotExecuted, // 未执行（可执行）
    Executing,   // 已预约，执行中
    Executed,    // 已执行（软关闭，需显式作废才能重试）
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::NotExecuted => "NOT_EXECUTED",
            ExecutionStatus::Executing => "EXECUTING",
            ExecutionStatus::Executed => "EXECUTED",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "NOT_EXECUTED" => Some(ExecutionStatus::NotExecuted),
            "EXECUTING" => Some(ExecutionStatus::Executing),
            "EXECUTED" => Some(ExecutionStatus::Executed),
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==========================================
// Lottery - 抽签活动
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lottery {
    pub id: LotteryId,
    pub project_id: ProjectId,
    pub kind: EventKind,
    pub is_published: bool,
    pub start_date: Option<NaiveDateTime>,
    pub status: ExecutionStatus,
}

impl Lottery {
    pub fn is_lottery(&self) -> bool {
        self.kind == EventKind::Lottery
    }

    /// 已被某次执行占用（执行中或已执行）
    pub fn is_claimed(&self) -> bool {
        matches!(
            self.status,
            ExecutionStatus::Executing | ExecutionStatus::Executed
        )
    }
}

// ==========================================
// ExecutionOptions - 执行选项
// ==========================================
// 入口接受的选项标记: `mismatch-allowed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionOptions {
    /// 允许单元类型内家庭数/单元数不一致
    pub mismatch_allowed: bool,
}

impl ExecutionOptions {
    pub const MISMATCH_ALLOWED: &'static str = "mismatch-allowed";

    pub fn mismatch_allowed() -> Self {
        Self {
            mismatch_allowed: true,
        }
    }

    /// 从选项标记列表解析
    pub fn from_flags<I, S>(flags: I) -> Result<Self, UnknownOption>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = Self::default();
        for flag in flags {
            match flag.as_ref().parse::<ExecutionOption>()? {
                ExecutionOption::MismatchAllowed => options.mismatch_allowed = true,
            }
        }
        Ok(options)
    }

    pub fn flags(&self) -> Vec<&'static str> {
        let mut flags = Vec::new();
        if self.mismatch_allowed {
            flags.push(Self::MISMATCH_ALLOWED);
        }
        flags
    }
}

/// 单个选项标记
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOption {
    MismatchAllowed,
}

/// 未知选项标记
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("未知的执行选项: {0}")]
pub struct UnknownOption(pub String);

impl FromStr for ExecutionOption {
    type Err = UnknownOption;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches("--") {
            ExecutionOptions::MISMATCH_ALLOWED => Ok(ExecutionOption::MismatchAllowed),
            other => Err(UnknownOption(other.to_string())),
        }
    }
}

// ==========================================
// TypeCountMismatch - 单元类型计数不一致
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeCountMismatch {
    pub unit_type_id: i64,
    pub unit_type_name: String,
    pub units_count: i64,
    pub families_count: i64,
}

impl TypeCountMismatch {
    /// 单元多于家庭
    pub fn has_excess_units(&self) -> bool {
        self.units_count > self.families_count
    }
}

/// 已分配单元（数据损坏检查）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignedUnit {
    pub unit_id: UnitId,
    pub family_id: i64,
}
