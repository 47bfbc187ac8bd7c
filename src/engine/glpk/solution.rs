// ==========================================
// 抽签分配引擎 - glpsol 解文件解析
// ==========================================
// 解析内容:
// - `Objective:  resultado = 3 (MINimum)` → 四舍五入为整数
// - `x[c<family>,v<unit>] [*] <activity>`，activity >= 0.99 视为选中
//   名称过长时 glpsol 会换行输出数值，按空白切分后跨行匹配
// - 不可行标记优先于一切解析结果
// ==========================================

use crate::domain::types::{FamilyId, UnitRef};
use crate::engine::error::SolverError;
use std::collections::BTreeMap;

/// 不可行标记（大小写不敏感）
///
/// INTEGER UNDEFINED: LP 松弛不可行时未进入分支定界（超时已由 stdout 先行识别）
const INFEASIBLE_MARKERS: [&str; 5] = [
    "INTEGER EMPTY",
    "INTEGER UNDEFINED",
    "SOLUTION IS INFEASIBLE",
    "NO PRIMAL FEASIBLE",
    "NO INTEGER FEASIBLE",
];

/// 选中阈值
const ACTIVITY_THRESHOLD: f64 = 0.99;

/// glpsol 解文件解析器
#[derive(Debug, Clone, Copy, Default)]
pub struct SolutionParser;

impl SolutionParser {
    pub fn new() -> Self {
        Self
    }

    /// 是否含不可行标记
    pub fn is_infeasible(&self, content: &str) -> bool {
        let upper = content.to_ascii_uppercase();
        INFEASIBLE_MARKERS.iter().any(|marker| upper.contains(marker))
    }

    /// 提取目标值（四舍五入）
    pub fn extract_objective(&self, content: &str) -> Result<i64, SolverError> {
        if self.is_infeasible(content) {
            return Err(SolverError::Infeasible("解文件报告模型不可行".to_string()));
        }

        content
            .lines()
            .find_map(|line| Self::objective_value(line))
            .map(|value| value.round() as i64)
            .ok_or_else(|| SolverError::Unparseable("解文件中未找到目标值".to_string()))
    }

    /// 提取分配结果（家庭 → 单元）
    pub fn extract_assignments(&self, content: &str) -> Result<BTreeMap<FamilyId, UnitRef>, SolverError> {
        if self.is_infeasible(content) {
            return Err(SolverError::Infeasible("解文件报告模型不可行".to_string()));
        }

        let mut picks = BTreeMap::new();
        let mut tokens = content.split_whitespace().peekable();

        while let Some(token) = tokens.next() {
            let Some((family_id, unit)) = Self::assignment_variable(token) else {
                continue;
            };

            if tokens.peek() == Some(&"*") {
                tokens.next();
            }

            let activity = tokens.peek().and_then(|t| t.parse::<f64>().ok());
            if let Some(activity) = activity {
                tokens.next();
                if activity >= ACTIVITY_THRESHOLD {
                    picks.insert(family_id, unit);
                }
            }
        }

        if picks.is_empty() {
            return Err(SolverError::Unparseable("解文件中未找到分配结果".to_string()));
        }

        Ok(picks)
    }

    /// `Objective:  <name> = <number> (...)`
    fn objective_value(line: &str) -> Option<f64> {
        let trimmed = line.trim_start();
        let prefix = trimmed.get(..10)?;
        if !prefix.eq_ignore_ascii_case("objective:") {
            return None;
        }
        let (_, rhs) = trimmed[10..].split_once('=')?;
        rhs.split_whitespace().next()?.parse::<f64>().ok()
    }

    /// `x[c<family>,v<unit>]`
    fn assignment_variable(token: &str) -> Option<(FamilyId, UnitRef)> {
        let head = token.get(..3)?;
        if !head.eq_ignore_ascii_case("x[c") || !token.ends_with(']') {
            return None;
        }

        let inner = &token[3..token.len() - 1];
        let (family, unit) = inner.split_once(',')?;
        let unit = unit.strip_prefix('v').or_else(|| unit.strip_prefix('V'))?;

        Some((family.parse().ok()?, UnitRef::from_token(unit)?))
    }
}
