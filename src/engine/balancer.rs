// ==========================================
// 抽签分配引擎 - 规格平衡器
// ==========================================
// 职责: 使家庭数与单元数相等
// - 单元多于家庭: 逐个剔除聚合秩次最差的单元
// - 家庭多于单元: 追加占位单元（由求解器决定哪些家庭落空）
// ==========================================

use crate::domain::spec::LotterySpec;
use crate::domain::types::{UnitId, UnitRef};
use tracing::debug;

/// 平衡结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalancedSpec {
    pub spec: LotterySpec,
    /// 被剔除的真实单元（由调用方记为孤儿单元）
    pub pruned_units: Vec<UnitId>,
}

// ==========================================
// SpecBalancer - 规格平衡器
// ==========================================
#[derive(Debug, Clone, Copy, Default)]
pub struct SpecBalancer;

impl SpecBalancer {
    pub fn new() -> Self {
        Self
    }

    /// 家庭数与单元数是否相等
    pub fn is_balanced(&self, spec: &LotterySpec) -> bool {
        spec.is_balanced()
    }

    /// 是否为占位单元
    pub fn is_mock_unit(&self, unit: &UnitRef) -> bool {
        unit.is_mock()
    }

    /// 平衡规格（已平衡则原样返回）
    pub fn balance(&self, spec: &LotterySpec) -> BalancedSpec {
        if spec.unit_count() > spec.family_count() {
            self.prune_worst_units(spec)
        } else if spec.family_count() > spec.unit_count() {
            BalancedSpec {
                spec: self.add_mock_units(spec),
                pruned_units: Vec::new(),
            }
        } else {
            BalancedSpec {
                spec: spec.clone(),
                pruned_units: Vec::new(),
            }
        }
    }

    /// 剔除最差单元，直到单元数等于家庭数
    ///
    /// 每轮计算每个单元的聚合秩次（各家庭对该单元秩次之和，
    /// 未列入偏好计为 unit_count + 1），剔除聚合秩次最大者；
    /// 并列时剔除 ID 最大者。
    ///
    /// # 返回
    /// 平衡后的规格与被剔除单元（按剔除顺序）
    pub fn prune_worst_units(&self, spec: &LotterySpec) -> BalancedSpec {
        let mut current = spec.clone();
        let mut pruned_units = Vec::new();

        while current.unit_count() > current.family_count() {
            let worst = current
                .units
                .iter()
                .map(|unit| (Self::aggregate_rank(&current, unit), *unit))
                .max();

            let Some((score, worst)) = worst else {
                break;
            };

            debug!(unit = %worst, aggregate_rank = score, "剔除最差单元");

            current.units.retain(|u| u != &worst);
            for prefs in current.families.values_mut() {
                prefs.retain(|u| u != &worst);
            }
            if let Some(unit_id) = worst.real_id() {
                pruned_units.push(unit_id);
            }
        }

        BalancedSpec {
            spec: current,
            pruned_units,
        }
    }

    /// 追加占位单元，直到单元数等于家庭数
    ///
    /// 占位单元 `Mock(1..=deficit)` 追加到单元列表末尾，
    /// 并追加到每个家庭偏好列表末尾。
    pub fn add_mock_units(&self, spec: &LotterySpec) -> LotterySpec {
        let deficit = spec.family_count().saturating_sub(spec.unit_count());
        if deficit == 0 {
            return spec.clone();
        }

        let mocks: Vec<UnitRef> = (1..=deficit as u32).map(UnitRef::Mock).collect();

        let mut padded = spec.clone();
        padded.units.extend(mocks.iter().copied());
        for prefs in padded.families.values_mut() {
            prefs.extend(mocks.iter().copied());
        }

        debug!(deficit, "追加占位单元");
        padded
    }

    fn aggregate_rank(spec: &LotterySpec, unit: &UnitRef) -> u64 {
        spec.families
            .keys()
            .map(|family_id| spec.rank_of(*family_id, unit) as u64)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prune_removes_least_wanted_unit() {
        // 两个家庭都把 30 排在最后
        let spec = LotterySpec::from_ids(
            vec![(1, vec![10, 20, 30]), (2, vec![20, 10, 30])],
            vec![10, 20, 30],
        );

        let balanced = SpecBalancer::new().prune_worst_units(&spec);

        assert!(balanced.spec.is_balanced());
        assert_eq!(balanced.pruned_units, vec![30]);
        assert_eq!(
            balanced.spec.units,
            vec![UnitRef::Real(10), UnitRef::Real(20)]
        );
        for prefs in balanced.spec.families.values() {
            assert!(!prefs.contains(&UnitRef::Real(30)));
        }
    }

    #[test]
    fn test_prune_ties_remove_greatest_id() {
        let spec = LotterySpec::from_ids(vec![(1, vec![10])], vec![10, 20, 30]);

        let balanced = SpecBalancer::new().prune_worst_units(&spec);

        // 20 与 30 聚合秩次相同，先剔除 30
        assert_eq!(balanced.pruned_units, vec![30, 20]);
        assert_eq!(balanced.spec.units, vec![UnitRef::Real(10)]);
    }

    #[test]
    fn test_add_mock_units_pads_units_and_preferences() {
        let spec = LotterySpec::from_ids(
            vec![(1, vec![10]), (2, vec![10]), (3, vec![10])],
            vec![10],
        );

        let padded = SpecBalancer::new().add_mock_units(&spec);

        assert!(padded.is_balanced());
        assert_eq!(
            padded.units,
            vec![UnitRef::Real(10), UnitRef::Mock(1), UnitRef::Mock(2)]
        );
        for prefs in padded.families.values() {
            assert_eq!(&prefs[1..], &[UnitRef::Mock(1), UnitRef::Mock(2)]);
        }
    }

    #[test]
    fn test_is_mock_unit() {
        let balancer = SpecBalancer::new();
        assert!(balancer.is_mock_unit(&UnitRef::Mock(1)));
        assert!(!balancer.is_mock_unit(&UnitRef::Real(1)));
        assert!(!balancer.is_mock_unit(&UnitRef::Real(999)));
    }

    /// (名称, 家庭偏好, 单元)
    type Shape = (&'static str, Vec<(i64, Vec<i64>)>, Vec<i64>);

    fn shapes() -> Vec<Shape> {
        vec![
            ("无单元", vec![(1, vec![]), (2, vec![]), (3, vec![])], vec![]),
            ("无家庭", vec![], vec![10, 20, 30]),
            ("1 户 N 单元", vec![(1, vec![30, 10])], vec![10, 20, 30, 40]),
            ("N 户 1 单元", vec![(1, vec![10]), (2, vec![]), (3, vec![10]), (4, vec![10])], vec![10]),
            (
                "聚合秩次全部并列",
                vec![(1, vec![10, 20, 30, 40]), (2, vec![40, 30, 20, 10])],
                vec![10, 20, 30, 40],
            ),
            (
                "部分并列",
                vec![(1, vec![10, 20]), (2, vec![20, 10]), (3, vec![])],
                vec![10, 20, 30, 40, 50],
            ),
            ("已平衡", vec![(1, vec![20]), (2, vec![10])], vec![10, 20]),
        ]
    }

    #[test]
    fn test_balance_invariants_across_shapes() {
        let balancer = SpecBalancer::new();

        for (name, families, units) in shapes() {
            let spec = LotterySpec::from_ids(families, units.clone());
            let balanced = balancer.balance(&spec);
            let out = &balanced.spec;

            assert!(out.is_balanced(), "{}: 未平衡", name);
            assert_eq!(out.unit_count(), spec.family_count(), "{}: 单元数应等于家庭数", name);
            assert_eq!(out.family_ids(), spec.family_ids(), "{}: 家庭集合被改变", name);

            if units.len() > spec.family_count() {
                // 剔除后剩余单元 + 被剔除单元 = 输入单元
                assert_eq!(balanced.pruned_units.len(), units.len() - spec.family_count(), "{}", name);
                let mut seen: Vec<i64> = out.real_unit_ids();
                seen.extend(&balanced.pruned_units);
                seen.sort_unstable();
                assert_eq!(seen, units, "{}: 单元丢失或重复", name);
                assert!(out.units.iter().all(|u| !u.is_mock()), "{}: 不应出现占位单元", name);
                for prefs in out.families.values() {
                    assert!(prefs.iter().all(|u| out.units.contains(u)), "{}: 偏好引用已剔除单元", name);
                }
            } else {
                let deficit = spec.family_count() - units.len();
                let mocks: Vec<UnitRef> = out.units.iter().copied().filter(UnitRef::is_mock).collect();
                let expected: Vec<UnitRef> = (1..=deficit as u32).map(UnitRef::Mock).collect();
                assert_eq!(mocks, expected, "{}: 占位单元应为 1..=deficit", name);
                assert!(balanced.pruned_units.is_empty(), "{}", name);
                for prefs in out.families.values() {
                    assert!(prefs.ends_with(&expected), "{}: 偏好末尾应为占位单元", name);
                }
            }
        }
    }

    #[test]
    fn test_balance_is_noop_when_balanced() {
        let spec = LotterySpec::from_ids(vec![(1, vec![10])], vec![10]);
        let balanced = SpecBalancer::new().balance(&spec);
        assert_eq!(balanced.spec, spec);
        assert!(balanced.pruned_units.is_empty());
    }
}
