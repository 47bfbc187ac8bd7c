// ==========================================
// 抽签分配引擎 - 退化规格检测
// ==========================================
// 退化规格会让 glpsol 在大量等价最优解之间反复搜索:
//   规模: max(家庭数, 单元数) >= size_threshold
//   相似: 前 5 个偏好完全相同的家庭占比 >= similarity_threshold
//   对立: 两个最常见的前 3 偏好模式互为逆序（至少 4 个家庭）
// 命中任一条件即跳过阶段一，直接走二分回退流程
// ==========================================

use crate::domain::spec::LotterySpec;
use crate::domain::types::UnitRef;

/// 相似模式取前 N 个偏好
const SIMILARITY_PREFIX: usize = 5;
/// 对立模式取前 N 个偏好
const OPPOSITION_PREFIX: usize = 3;
/// 对立检测所需的最少家庭数
const OPPOSITION_MIN_FAMILIES: usize = 4;

/// 退化原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Degeneracy {
    Size,
    Similarity,
    Opposition,
}

impl Degeneracy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Degeneracy::Size => "size",
            Degeneracy::Similarity => "similarity",
            Degeneracy::Opposition => "opposition",
        }
    }
}

/// 检测阈值
#[derive(Debug, Clone, PartialEq)]
pub struct DegeneracySettings {
    pub enabled: bool,
    pub size_threshold: usize,
    pub similarity_threshold: f64,
    pub opposition_threshold: f64,
}

impl Default for DegeneracySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            size_threshold: 11,
            similarity_threshold: 0.80,
            opposition_threshold: 0.67,
        }
    }
}

impl DegeneracySettings {
    /// 检测规格是否退化
    ///
    /// # 返回
    /// - `Some(原因)`: 命中的第一个条件
    /// - `None`: 非退化或检测已关闭
    pub fn detect(&self, spec: &LotterySpec) -> Option<Degeneracy> {
        if !self.enabled || spec.family_count() == 0 {
            return None;
        }
        if spec.family_count().max(spec.unit_count()) >= self.size_threshold {
            return Some(Degeneracy::Size);
        }
        if self.is_similar(spec) {
            return Some(Degeneracy::Similarity);
        }
        if self.is_opposed(spec) {
            return Some(Degeneracy::Opposition);
        }
        None
    }

    fn is_similar(&self, spec: &LotterySpec) -> bool {
        let patterns = prefix_patterns(spec, SIMILARITY_PREFIX);
        let most_common = patterns.iter().map(|(_, members)| members.len()).max().unwrap_or(0);
        most_common as f64 / spec.family_count() as f64 >= self.similarity_threshold
    }

    fn is_opposed(&self, spec: &LotterySpec) -> bool {
        if spec.family_count() < OPPOSITION_MIN_FAMILIES {
            return false;
        }

        let mut patterns = prefix_patterns(spec, OPPOSITION_PREFIX);
        if patterns.len() < 2 {
            return false;
        }
        // 稳定排序: 同频模式保持首次出现顺序
        patterns.sort_by(|a, b| b.1.len().cmp(&a.1.len()));

        let first = patterns[0].1[0];
        let second = patterns[1].1[0];
        let checks = first.len().min(OPPOSITION_PREFIX);
        if checks == 0 {
            return false;
        }

        let matches = first
            .iter()
            .zip(second.iter().rev())
            .take(checks)
            .filter(|(a, b)| a == b)
            .count();
        matches as f64 / checks as f64 >= self.opposition_threshold
    }
}

/// 按前缀分组的偏好模式（按首次出现顺序）
fn prefix_patterns(spec: &LotterySpec, prefix: usize) -> Vec<(&[UnitRef], Vec<&[UnitRef]>)> {
    let mut patterns: Vec<(&[UnitRef], Vec<&[UnitRef]>)> = Vec::new();
    for prefs in spec.families.values() {
        let key = &prefs[..prefs.len().min(prefix)];
        match patterns.iter_mut().find(|(pattern, _)| *pattern == key) {
            Some((_, members)) => members.push(prefs.as_slice()),
            None => patterns.push((key, vec![prefs.as_slice()])),
        }
    }
    patterns
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(families: Vec<(i64, Vec<i64>)>, units: Vec<i64>) -> Option<Degeneracy> {
        DegeneracySettings::default().detect(&LotterySpec::from_ids(families, units))
    }

    #[test]
    fn test_distinct_preferences_are_not_degenerate() {
        let result = detect(
            vec![(1, vec![10, 20, 30]), (2, vec![20, 30, 10]), (3, vec![30, 10, 20])],
            vec![10, 20, 30],
        );
        assert_eq!(result, None);
    }

    #[test]
    fn test_large_specs_are_degenerate() {
        let units: Vec<i64> = (1..=11).collect();
        let families = units.iter().map(|u| (*u, vec![*u])).collect();
        assert_eq!(detect(families, units), Some(Degeneracy::Size));
    }

    #[test]
    fn test_identical_or_missing_preferences_are_similar() {
        let identical = detect(
            vec![(1, vec![10, 20]), (2, vec![10, 20]), (3, vec![10, 20]), (4, vec![10, 20]), (5, vec![20, 10])],
            vec![10, 20, 30, 40, 50],
        );
        assert_eq!(identical, Some(Degeneracy::Similarity));

        let missing = detect(vec![(1, vec![]), (2, vec![])], vec![10, 20]);
        assert_eq!(missing, Some(Degeneracy::Similarity));

        // 3/4 = 0.75 < 0.80
        let below = detect(
            vec![(1, vec![10]), (2, vec![10]), (3, vec![10]), (4, vec![20])],
            vec![10, 20, 30, 40],
        );
        assert_eq!(below, None);
    }

    #[test]
    fn test_reversed_camps_are_opposed() {
        let result = detect(
            vec![
                (1, vec![10, 20, 30]),
                (2, vec![10, 20, 30]),
                (3, vec![30, 20, 10]),
                (4, vec![30, 20, 10]),
            ],
            vec![10, 20, 30, 40],
        );
        assert_eq!(result, Some(Degeneracy::Opposition));
    }

    #[test]
    fn test_disabled_detection() {
        let settings = DegeneracySettings {
            enabled: false,
            ..DegeneracySettings::default()
        };
        let spec = LotterySpec::from_ids(vec![(1, vec![10]), (2, vec![10])], vec![10, 20]);
        assert_eq!(settings.detect(&spec), None);
    }
}
