// ==========================================
// 抽签分配引擎 - 求解结果
// ==========================================

use crate::domain::types::{FamilyId, UnitId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// 未匹配的家庭与单元
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Orphans {
    pub families: Vec<FamilyId>,
    pub units: Vec<UnitId>,
}

impl Orphans {
    pub fn is_empty(&self) -> bool {
        self.families.is_empty() && self.units.is_empty()
    }
}

// ==========================================
// SolverResult - 求解结果
// ==========================================
// 不变量:
// - picks 为单射（同一单元不出现两次）
// - |picks| + |orphans.families| == 家庭数
// - |picks| + |orphans.units| == 单元数
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SolverResult {
    /// 家庭 → 单元
    pub picks: BTreeMap<FamilyId, UnitId>,
    pub orphans: Orphans,
}

impl SolverResult {
    pub fn new(picks: BTreeMap<FamilyId, UnitId>, orphans: Orphans) -> Self {
        Self { picks, orphans }
    }

    /// 合并多个结果（分组结果 + 孤儿再分配结果）
    pub fn merge<I>(results: I) -> Self
    where
        I: IntoIterator<Item = SolverResult>,
    {
        let mut merged = SolverResult::default();
        for result in results {
            merged.picks.extend(result.picks);
            merged.orphans.families.extend(result.orphans.families);
            merged.orphans.units.extend(result.orphans.units);
        }
        merged
    }

    /// picks 是否为单射
    pub fn is_injective(&self) -> bool {
        let units: BTreeSet<UnitId> = self.picks.values().copied().collect();
        units.len() == self.picks.len()
    }

    /// 校验结果与输入家庭/单元集合的精确对账
    ///
    /// 每个家庭恰好出现在 picks 或 orphans.families 之一；单元同理。
    pub fn accounts_for(&self, families: &BTreeSet<FamilyId>, units: &BTreeSet<UnitId>) -> bool {
        if !self.is_injective() {
            return false;
        }

        let mut seen_families = BTreeSet::new();
        for family_id in self.picks.keys().chain(self.orphans.families.iter()) {
            if !seen_families.insert(*family_id) {
                return false;
            }
        }

        let mut seen_units = BTreeSet::new();
        for unit_id in self.picks.values().chain(self.orphans.units.iter()) {
            if !seen_units.insert(*unit_id) {
                return false;
            }
        }

        &seen_families == families && &seen_units == units
    }
}
