// ==========================================
// 抽签分配引擎 - GMPL 数据生成
// ==========================================
// 集合元素: 家庭 `c<id>`，单元 `v<id>` / `vMOCK_<seq>`
// 秩次矩阵: 每个秩次输出为 `rank - ε(c,v)`
// - ε 两两不同且为正，任意完整分配的 ε 之和 < 0.5
// - 整数 z 仍等于最差整数秩次；`<= S` 约束语义不变
// - 秩次总和相同的分配被 ε 唯一区分，结果可复现
// ==========================================

use crate::domain::spec::LotterySpec;
use std::fmt::Write;

/// GMPL 数据生成器
#[derive(Debug, Clone, Copy, Default)]
pub struct DataGenerator;

impl DataGenerator {
    pub fn new() -> Self {
        Self
    }

    /// 阶段一数据
    pub fn phase1_data(&self, spec: &LotterySpec) -> String {
        let mut out = self.body(spec);
        out.push_str("end;\n");
        out
    }

    /// 阶段二数据（附带秩次上限 S）
    pub fn phase2_data(&self, spec: &LotterySpec, min_satisfaction: u32) -> String {
        let mut out = self.body(spec);
        let _ = writeln!(out, "param S := {};\n", min_satisfaction);
        out.push_str("end;\n");
        out
    }

    /// 扰动项 ε(c,v)
    ///
    /// `ci`、`vi` 为家庭、单元在规格中的位置（0 起）。
    /// ε ∈ (0, 1/(2F))，F 个家庭的完整分配之和 < 0.5
    pub fn perturbation(family_index: usize, unit_index: usize, family_count: usize, unit_count: usize) -> f64 {
        let f = family_count.max(1) as f64;
        let u = unit_count.max(1) as f64;
        let ordinal = (family_index * unit_count.max(1) + unit_index + 1) as f64;
        ordinal / (2.0 * (f * u + 1.0) * f)
    }

    fn body(&self, spec: &LotterySpec) -> String {
        let family_count = spec.family_count();
        let unit_count = spec.unit_count();

        let mut out = String::from("data;\n\n");

        let families: Vec<String> = spec.families.keys().map(|id| format!("c{}", id)).collect();
        let units: Vec<String> = spec.units.iter().map(|u| format!("v{}", u.token())).collect();

        let _ = writeln!(out, "set C := {};", families.join(" "));
        let _ = writeln!(out, "set V := {};\n", units.join(" "));

        let _ = writeln!(out, "param p : {} :=", units.join(" "));
        for (ci, family_id) in spec.families.keys().enumerate() {
            let _ = write!(out, "c{}", family_id);
            for (vi, unit) in spec.units.iter().enumerate() {
                let rank = spec.rank_of(*family_id, unit) as f64;
                let value = rank - Self::perturbation(ci, vi, family_count, unit_count);
                let _ = write!(out, " {:.12}", value);
            }
            out.push('\n');
        }
        out.push_str(";\n\n");

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::UnitRef;

    fn spec() -> LotterySpec {
        let mut spec = LotterySpec::from_ids(vec![(1, vec![10, 20]), (2, vec![20])], vec![10, 20]);
        spec.units.push(UnitRef::Mock(1));
        spec
    }

    #[test]
    fn test_phase1_data_layout() {
        let data = DataGenerator::new().phase1_data(&spec());
        assert!(data.starts_with("data;"));
        assert!(data.contains("set C := c1 c2;"));
        assert!(data.contains("set V := v10 v20 vMOCK_1;"));
        assert!(data.contains("param p : v10 v20 vMOCK_1 :="));
        assert!(!data.contains("param S"));
        assert!(data.trim_end().ends_with("end;"));
    }

    #[test]
    fn test_phase2_data_carries_ceiling() {
        let data = DataGenerator::new().phase2_data(&spec(), 2);
        assert!(data.contains("param S := 2;"));
    }

    #[test]
    fn test_perturbation_keeps_integer_rank_dominant() {
        let (f, u) = (4, 4);
        let mut values = Vec::new();
        for ci in 0..f {
            for vi in 0..u {
                let eps = DataGenerator::perturbation(ci, vi, f, u);
                assert!(eps > 0.0 && eps < 0.5 / f as f64);
                values.push(eps);
            }
        }
        // 两两不同
        let mut sorted = values.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        sorted.dedup();
        assert_eq!(sorted.len(), values.len());

        // 最大的 F 个之和仍 < 0.5
        let worst: f64 = sorted.iter().rev().take(f).sum();
        assert!(worst < 0.5);
    }
}
