// ==========================================
// 抽签分配引擎 - 抽签规格与清单
// ==========================================
// LotterySpec: 单一分组（单元类型）内的家庭偏好与单元列表
// LotteryManifest: 一次执行的完整输入（按单元类型分组）
// ==========================================

use crate::domain::lottery::ExecutionOptions;
use crate::domain::types::{FamilyId, GroupKey, LotteryId, ProjectId, UnitId, UnitRef};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

/// 规格/清单校验错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpecError {
    #[error("单元重复: unit={0}")]
    DuplicateUnit(UnitRef),

    #[error("家庭偏好重复: family={family_id}, unit={unit}")]
    DuplicatePreference { family_id: FamilyId, unit: UnitRef },

    #[error("偏好引用了不存在的单元: family={family_id}, unit={unit}")]
    UnknownPreferredUnit { family_id: FamilyId, unit: UnitRef },

    #[error("家庭同时出现在多个分组: family={family_id}")]
    FamilyInMultipleGroups { family_id: FamilyId },

    #[error("单元同时出现在多个分组: unit={unit_id}")]
    UnitInMultipleGroups { unit_id: UnitId },

    #[error("清单中不允许出现占位单元: group={group}")]
    MockUnitInManifest { group: GroupKey },
}

// ==========================================
// LotterySpec - 抽签规格
// ==========================================
// 不变量: 家庭 ID 唯一（由 BTreeMap 保证）；
// 平衡后每个偏好单元都在 units 中
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LotterySpec {
    /// 家庭 → 偏好列表（最优在前）
    pub families: BTreeMap<FamilyId, Vec<UnitRef>>,
    /// 单元列表（GMPL 列顺序）
    pub units: Vec<UnitRef>,
}

impl LotterySpec {
    pub fn new(families: BTreeMap<FamilyId, Vec<UnitRef>>, units: Vec<UnitRef>) -> Self {
        Self { families, units }
    }

    /// 由真实单元 ID 构建（调用方入口）
    pub fn from_ids<I, P>(families: I, units: Vec<UnitId>) -> Self
    where
        I: IntoIterator<Item = (FamilyId, P)>,
        P: IntoIterator<Item = UnitId>,
    {
        let families = families
            .into_iter()
            .map(|(family_id, prefs)| (family_id, prefs.into_iter().map(UnitRef::Real).collect()))
            .collect();

        Self {
            families,
            units: units.into_iter().map(UnitRef::Real).collect(),
        }
    }

    pub fn family_count(&self) -> usize {
        self.families.len()
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// 家庭数与单元数是否相等
    pub fn is_balanced(&self) -> bool {
        self.family_count() == self.unit_count()
    }

    pub fn family_ids(&self) -> Vec<FamilyId> {
        self.families.keys().copied().collect()
    }

    /// 真实单元 ID（跳过占位单元）
    pub fn real_unit_ids(&self) -> Vec<UnitId> {
        self.units.iter().filter_map(UnitRef::real_id).collect()
    }

    /// 未列入偏好的单元所取的秩次（比任何已列秩次都差）
    pub fn missing_rank(&self) -> u32 {
        self.unit_count() as u32 + 1
    }

    /// 家庭对某单元的偏好秩次（1 起，越小越好）
    pub fn rank_of(&self, family_id: FamilyId, unit: &UnitRef) -> u32 {
        self.families
            .get(&family_id)
            .and_then(|prefs| prefs.iter().position(|u| u == unit))
            .map(|pos| pos as u32 + 1)
            .unwrap_or_else(|| self.missing_rank())
    }

    /// 可能出现的最差秩次（二分查找上界）
    pub fn worst_rank(&self) -> u32 {
        let units: HashSet<&UnitRef> = self.units.iter().collect();
        self.families
            .values()
            .map(|prefs| {
                let listed = prefs.iter().filter(|u| units.contains(u)).count();
                if listed < self.unit_count() {
                    self.missing_rank()
                } else {
                    self.unit_count() as u32
                }
            })
            .max()
            .unwrap_or(1)
            .max(1)
    }

    /// 校验规格内部一致性
    pub fn validate(&self) -> Result<(), SpecError> {
        let mut units = HashSet::with_capacity(self.units.len());
        for unit in &self.units {
            if !units.insert(*unit) {
                return Err(SpecError::DuplicateUnit(*unit));
            }
        }

        for (family_id, prefs) in &self.families {
            let mut seen = HashSet::with_capacity(prefs.len());
            for unit in prefs {
                if !seen.insert(*unit) {
                    return Err(SpecError::DuplicatePreference {
                        family_id: *family_id,
                        unit: *unit,
                    });
                }
                if !units.contains(unit) {
                    return Err(SpecError::UnknownPreferredUnit {
                        family_id: *family_id,
                        unit: *unit,
                    });
                }
            }
        }

        Ok(())
    }
}

// ==========================================
// LotteryManifest - 抽签执行清单
// ==========================================
// 不变量: 各分组之间家庭集合、单元集合两两不相交
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotteryManifest {
    /// 本次执行 ID（审计记录分组键）
    pub execution_uuid: String,
    pub lottery_id: LotteryId,
    pub project_id: ProjectId,
    pub options: ExecutionOptions,
    /// 单元类型 → 分组规格
    pub groups: BTreeMap<GroupKey, LotterySpec>,
}

impl LotteryManifest {
    pub fn new(
        lottery_id: LotteryId,
        project_id: ProjectId,
        options: ExecutionOptions,
        groups: BTreeMap<GroupKey, LotterySpec>,
    ) -> Self {
        Self {
            execution_uuid: uuid::Uuid::new_v4().to_string(),
            lottery_id,
            project_id,
            options,
            groups,
        }
    }

    pub fn family_count(&self) -> usize {
        self.groups.values().map(LotterySpec::family_count).sum()
    }

    pub fn unit_count(&self) -> usize {
        self.groups.values().map(LotterySpec::unit_count).sum()
    }

    /// 校验分组不相交，且清单只含真实单元
    pub fn validate(&self) -> Result<(), SpecError> {
        let mut families = HashSet::new();
        let mut units = HashSet::new();

        for (group, spec) in &self.groups {
            for family_id in spec.families.keys() {
                if !families.insert(*family_id) {
                    return Err(SpecError::FamilyInMultipleGroups {
                        family_id: *family_id,
                    });
                }
            }
            for unit in &spec.units {
                let unit_id = unit
                    .real_id()
                    .ok_or(SpecError::MockUnitInManifest { group: *group })?;
                if !units.insert(unit_id) {
                    return Err(SpecError::UnitInMultipleGroups { unit_id });
                }
            }
        }

        Ok(())
    }
}
