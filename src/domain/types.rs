// ==========================================
// 抽签分配引擎 - 领域类型定义
// ==========================================
// 职责: 标识符类型、单元引用（真实/占位）
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

/// 家庭 ID（数据库主键）
pub type FamilyId = i64;

/// 住房单元 ID（数据库主键）
pub type UnitId = i64;

/// 分组键（单元类型 ID）
pub type GroupKey = i64;

/// 抽签活动 ID
pub type LotteryId = i64;

/// 项目 ID
pub type ProjectId = i64;

/// 占位单元在 GMPL 文本中的标识前缀
pub const MOCK_UNIT_PREFIX: &str = "MOCK_";

// ==========================================
// UnitRef - 单元引用
// ==========================================
// 真实单元与占位单元使用带标签的联合类型区分，
// 不依赖字符串前缀判断。
// 排序: Real 在前（按 ID），Mock 在后（按序号）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum UnitRef {
    Real(UnitId),
    Mock(u32),
}

impl UnitRef {
    /// 是否为占位单元
    pub fn is_mock(&self) -> bool {
        matches!(self, UnitRef::Mock(_))
    }

    /// 真实单元 ID（占位单元返回 None）
    pub fn real_id(&self) -> Option<UnitId> {
        match self {
            UnitRef::Real(id) => Some(*id),
            UnitRef::Mock(_) => None,
        }
    }

    /// GMPL 集合元素后缀（不含 `v` 前缀）
    pub fn token(&self) -> String {
        match self {
            UnitRef::Real(id) => id.to_string(),
            UnitRef::Mock(seq) => format!("{}{}", MOCK_UNIT_PREFIX, seq),
        }
    }

    /// 从 GMPL 元素后缀解析（大小写不敏感）
    ///
    /// # 示例
    /// - `"10"` → `Real(10)`
    /// - `"MOCK_3"` / `"mock_3"` → `Mock(3)`
    pub fn from_token(token: &str) -> Option<Self> {
        let token = token.trim();
        if token.len() > MOCK_UNIT_PREFIX.len()
            && token[..MOCK_UNIT_PREFIX.len()].eq_ignore_ascii_case(MOCK_UNIT_PREFIX)
        {
            return token[MOCK_UNIT_PREFIX.len()..]
                .parse::<u32>()
                .ok()
                .map(UnitRef::Mock);
        }
        token.parse::<UnitId>().ok().map(UnitRef::Real)
    }
}

impl From<UnitId> for UnitRef {
    fn from(id: UnitId) -> Self {
        UnitRef::Real(id)
    }
}

impl fmt::Display for UnitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token())
    }
}
