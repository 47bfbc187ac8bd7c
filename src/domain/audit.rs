// ==========================================
// 抽签分配引擎 - 审计记录领域模型
// ==========================================
// 对齐: lottery_audit 表
// 每条记录携带 execution_uuid，同一次执行的记录按时间排序可重建执行过程
// ==========================================

use crate::domain::types::{LotteryId, ProjectId};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// AuditType - 审计记录类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditType {
    Init,             // 执行开始（清单快照）
    Custom,           // 求解器自定义事件
    GroupExecution,   // 分组求解结果
    ProjectExecution, // 合并后的最终结果
    Failure,          // 执行失败
    Invalidate,       // 显式作废
}

impl AuditType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditType::Init => "INIT",
            AuditType::Custom => "CUSTOM",
            AuditType::GroupExecution => "GROUP_EXECUTION",
            AuditType::ProjectExecution => "PROJECT_EXECUTION",
            AuditType::Failure => "FAILURE",
            AuditType::Invalidate => "INVALIDATE",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "INIT" => Some(AuditType::Init),
            "CUSTOM" => Some(AuditType::Custom),
            "GROUP_EXECUTION" => Some(AuditType::GroupExecution),
            "PROJECT_EXECUTION" => Some(AuditType::ProjectExecution),
            "FAILURE" => Some(AuditType::Failure),
            "INVALIDATE" => Some(AuditType::Invalidate),
            _ => None,
        }
    }
}

// ==========================================
// AuditRecord - 审计记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub audit_id: i64,
    pub execution_uuid: String,
    pub project_id: ProjectId,
    pub lottery_id: LotteryId,
    pub audit_type: AuditType,
    pub payload: JsonValue,
    pub created_at: NaiveDateTime,
    /// 已作废（软删除）时间
    pub retired_at: Option<NaiveDateTime>,
}

impl AuditRecord {
    pub fn is_retired(&self) -> bool {
        self.retired_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_type_db_strings() {
        for audit_type in [
            AuditType::Init,
            AuditType::Custom,
            AuditType::GroupExecution,
            AuditType::ProjectExecution,
            AuditType::Failure,
            AuditType::Invalidate,
        ] {
            assert_eq!(AuditType::from_db(audit_type.as_str()), Some(audit_type));
        }
        assert_eq!(AuditType::from_db("UNKNOWN"), None);
    }

    #[test]
    fn test_audit_type_serializes_screaming_snake() {
        let json = serde_json::to_string(&AuditType::GroupExecution).unwrap();
        assert_eq!(json, "\"GROUP_EXECUTION\"");
    }
}
