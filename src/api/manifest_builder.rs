// ==========================================
// 抽签分配引擎 - 执行清单构建
// ==========================================
// 分组: 按单元类型，每个类型一个 LotterySpec
// 偏好: 家庭显式排序的同类型单元在前，其余同类型单元按 id 升序补齐
// ==========================================

use crate::domain::lottery::{ExecutionOptions, Lottery};
use crate::domain::spec::{LotteryManifest, LotterySpec};
use crate::domain::types::{FamilyId, GroupKey, UnitId, UnitRef};
use crate::repository::{ProjectRepository, RepositoryResult};
use rusqlite::Connection;
use std::collections::{BTreeMap, HashSet};

/// 从存储构建执行清单
pub fn build_manifest_in(
    conn: &Connection,
    lottery: &Lottery,
    options: ExecutionOptions,
) -> RepositoryResult<LotteryManifest> {
    let families = ProjectRepository::families_in(conn, lottery.project_id)?;
    let units_by_type = ProjectRepository::units_by_type_in(conn, lottery.project_id)?;

    let mut grouped: BTreeMap<GroupKey, BTreeMap<FamilyId, Vec<UnitRef>>> = BTreeMap::new();
    for family in &families {
        let type_units = units_by_type
            .get(&family.unit_type_id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        grouped
            .entry(family.unit_type_id)
            .or_default()
            .insert(family.family_id, complete_preferences(&family.preferences, type_units));
    }

    let mut groups = BTreeMap::new();
    for (unit_type_id, unit_ids) in &units_by_type {
        let prefs = grouped.remove(unit_type_id).unwrap_or_default();
        groups.insert(
            *unit_type_id,
            LotterySpec::new(prefs, unit_ids.iter().copied().map(UnitRef::Real).collect()),
        );
    }
    // 有家庭但无单元的类型
    for (unit_type_id, prefs) in grouped {
        groups.insert(unit_type_id, LotterySpec::new(prefs, Vec::new()));
    }

    Ok(LotteryManifest::new(lottery.id, lottery.project_id, options, groups))
}

/// 显式偏好（限同类型单元，去重）+ 其余同类型单元
fn complete_preferences(explicit: &[UnitId], type_units: &[UnitId]) -> Vec<UnitRef> {
    let allowed: HashSet<UnitId> = type_units.iter().copied().collect();
    let mut seen = HashSet::new();
    let mut prefs: Vec<UnitRef> = explicit
        .iter()
        .copied()
        .filter(|id| allowed.contains(id) && seen.insert(*id))
        .map(UnitRef::Real)
        .collect();

    prefs.extend(
        type_units
            .iter()
            .copied()
            .filter(|id| !seen.contains(id))
            .map(UnitRef::Real),
    );
    prefs
}
