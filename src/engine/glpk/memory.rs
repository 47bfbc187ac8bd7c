// ==========================================
// 抽签分配引擎 - 进程内优化器
// ==========================================
// 读取 DataGenerator 生成的 GMPL 数据，精确求解两阶段模型，
// 输出与 glpsol 同格式的解文本。无需外部求解器即可运行完整流程。
// - 阶段一: 阈值递增 + 二分图完美匹配（瓶颈指派）
// - 阶段二: 过滤 p > S 的边后做最小权完美匹配（匈牙利算法）
// ==========================================

use crate::engine::error::SolverError;
use crate::engine::glpk::port::{GlpkTask, OptimizerJob, OptimizerPort, OptimizerReport};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;
use std::sync::Mutex;
use std::time::Duration;

const EPSILON: f64 = 1e-9;

/// 解析后的 GMPL 数据
#[derive(Debug, Clone, Default, PartialEq)]
struct GmplData {
    families: Vec<String>,
    units: Vec<String>,
    /// p[family][unit]，按 units 列顺序
    ranks: Vec<Vec<f64>>,
    ceiling: Option<f64>,
}

impl GmplData {
    fn parse(text: &str) -> Result<Self, SolverError> {
        let mut data = GmplData::default();
        let mut in_matrix = false;
        let mut columns: Vec<String> = Vec::new();
        let mut rows: HashMap<String, Vec<f64>> = HashMap::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if in_matrix {
                if line.starts_with(';') {
                    in_matrix = false;
                    continue;
                }
                let mut tokens = line.split_whitespace();
                let Some(family) = tokens.next() else {
                    continue;
                };
                let values = tokens
                    .map(|t| t.parse::<f64>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| SolverError::ProcessFailed(format!("数据矩阵格式错误: {}", e)))?;
                if values.len() != columns.len() {
                    return Err(SolverError::ProcessFailed(format!(
                        "数据矩阵列数不一致: {}",
                        family
                    )));
                }
                rows.insert(family.to_string(), values);
                continue;
            }

            if let Some(rest) = line.strip_prefix("set C :=") {
                data.families = Self::set_members(rest);
            } else if let Some(rest) = line.strip_prefix("set V :=") {
                data.units = Self::set_members(rest);
            } else if let Some(rest) = line.strip_prefix("param p :") {
                columns = rest
                    .trim_end_matches(":=")
                    .split_whitespace()
                    .map(str::to_string)
                    .collect();
                in_matrix = true;
            } else if let Some(rest) = line.strip_prefix("param S :=") {
                let value = rest.trim().trim_end_matches(';').trim();
                data.ceiling = Some(value.parse::<f64>().map_err(|e| {
                    SolverError::ProcessFailed(format!("参数 S 格式错误: {}", e))
                })?);
            }
        }

        if columns != data.units {
            return Err(SolverError::ProcessFailed("数据矩阵列与集合 V 不一致".to_string()));
        }

        for family in &data.families {
            let row = rows
                .remove(family)
                .ok_or_else(|| SolverError::ProcessFailed(format!("数据矩阵缺少行: {}", family)))?;
            data.ranks.push(row);
        }

        Ok(data)
    }

    fn set_members(rest: &str) -> Vec<String> {
        rest.trim_end_matches(';')
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    fn is_square(&self) -> bool {
        self.families.len() == self.units.len()
    }
}

// ==========================================
// 匹配算法
// ==========================================

/// Kuhn 增广路: 仅使用 allowed 边的完美匹配（行 → 列）
fn perfect_matching<F>(n: usize, allowed: F) -> Option<Vec<usize>>
where
    F: Fn(usize, usize) -> bool,
{
    fn augment<F: Fn(usize, usize) -> bool>(
        row: usize,
        n: usize,
        allowed: &F,
        seen: &mut [bool],
        col_owner: &mut [Option<usize>],
    ) -> bool {
        for col in 0..n {
            if !allowed(row, col) || seen[col] {
                continue;
            }
            seen[col] = true;
            let free = match col_owner[col] {
                None => true,
                Some(other) => augment(other, n, allowed, seen, col_owner),
            };
            if free {
                col_owner[col] = Some(row);
                return true;
            }
        }
        false
    }

    let mut col_owner: Vec<Option<usize>> = vec![None; n];
    for row in 0..n {
        let mut seen = vec![false; n];
        if !augment(row, n, &allowed, &mut seen, &mut col_owner) {
            return None;
        }
    }

    let mut assignment = vec![0; n];
    for (col, owner) in col_owner.iter().enumerate() {
        if let Some(row) = owner {
            assignment[*row] = col;
        }
    }
    Some(assignment)
}

/// 匈牙利算法: 方阵最小权完美匹配（行 → 列）
fn hungarian(cost: &[Vec<f64>]) -> Vec<usize> {
    let n = cost.len();
    let mut u = vec![0.0; n + 1];
    let mut v = vec![0.0; n + 1];
    let mut p = vec![0usize; n + 1];
    let mut way = vec![0usize; n + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0;
        let mut minv = vec![f64::INFINITY; n + 1];
        let mut used = vec![false; n + 1];
        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0;
            for j in 1..=n {
                if used[j] {
                    continue;
                }
                let cur = cost[i0 - 1][j - 1] - u[i0] - v[j];
                if cur < minv[j] {
                    minv[j] = cur;
                    way[j] = j0;
                }
                if minv[j] < delta {
                    delta = minv[j];
                    j1 = j;
                }
            }
            for j in 0..=n {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }
            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }
        loop {
            let j1 = way[j0];
            p[j0] = p[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut assignment = vec![0; n];
    for j in 1..=n {
        if p[j] > 0 {
            assignment[p[j] - 1] = j - 1;
        }
    }
    assignment
}

/// 求解结果
enum Outcome {
    Optimal { objective: f64, assignment: Vec<usize> },
    Empty,
}

fn solve_min_satisfaction(data: &GmplData) -> Outcome {
    let n = data.families.len();
    if !data.is_square() {
        return Outcome::Empty;
    }
    if n == 0 {
        return Outcome::Optimal {
            objective: 0.0,
            assignment: Vec::new(),
        };
    }

    let mut thresholds: Vec<f64> = data
        .ranks
        .iter()
        .flatten()
        .map(|p| (p - EPSILON).ceil())
        .collect();
    thresholds.sort_by(|a, b| a.total_cmp(b));
    thresholds.dedup();

    for threshold in thresholds {
        let allowed = |i: usize, j: usize| data.ranks[i][j] <= threshold + EPSILON;
        if let Some(assignment) = perfect_matching(n, allowed) {
            return Outcome::Optimal {
                objective: threshold,
                assignment,
            };
        }
    }

    Outcome::Empty
}

fn solve_unit_distribution(data: &GmplData) -> Outcome {
    let n = data.families.len();
    let ceiling = data.ceiling.unwrap_or(f64::INFINITY);
    if !data.is_square() {
        return Outcome::Empty;
    }

    let allowed = |i: usize, j: usize| data.ranks[i][j] <= ceiling + EPSILON;
    if perfect_matching(n, allowed).is_none() {
        return Outcome::Empty;
    }

    let max_rank = data.ranks.iter().flatten().fold(0.0_f64, |acc, p| acc.max(*p));
    let forbidden = (n as f64) * (max_rank + 1.0) + 1.0;
    let cost: Vec<Vec<f64>> = (0..n)
        .map(|i| {
            (0..n)
                .map(|j| if allowed(i, j) { data.ranks[i][j] } else { forbidden })
                .collect()
        })
        .collect();

    let assignment = hungarian(&cost);
    let objective = assignment
        .iter()
        .enumerate()
        .map(|(i, j)| data.ranks[i][*j])
        .sum();

    Outcome::Optimal {
        objective,
        assignment,
    }
}

fn render(task: GlpkTask, data: &GmplData, outcome: &Outcome) -> String {
    let n = data.families.len();
    let m = data.units.len();
    let mut out = String::new();

    let _ = writeln!(out, "Problem:    {}", task.file_stem());
    let _ = writeln!(out, "Rows:       {}", n + m + 1);
    let _ = writeln!(out, "Columns:    {} ({} integer, {} binary)", n * m, n * m, n * m);

    match outcome {
        Outcome::Empty => {
            out.push_str("Status:     INTEGER EMPTY\n");
            out.push_str("Objective:  resultado = 0 (MINimum)\n");
        }
        Outcome::Optimal {
            objective,
            assignment,
        } => {
            out.push_str("Status:     INTEGER OPTIMAL\n");
            let _ = writeln!(out, "Objective:  resultado = {} (MINimum)\n", objective);
            out.push_str("   No. Column name       Activity     Lower bound   Upper bound\n");
            out.push_str("------ ------------    ------------- ------------- -------------\n");
            let mut column = 0;
            for (i, family) in data.families.iter().enumerate() {
                for (j, unit) in data.units.iter().enumerate() {
                    column += 1;
                    let activity = if assignment.get(i) == Some(&j) { 1 } else { 0 };
                    let _ = writeln!(
                        out,
                        "{:>6} x[{},{}]    * {:>14} {:>13} {:>13}",
                        column, family, unit, activity, 0, 1
                    );
                }
            }
        }
    }

    out.push_str("\nEnd of output\n");
    out
}

// ==========================================
// InMemoryOptimizer - 进程内优化器
// ==========================================
#[derive(Debug, Default)]
pub struct InMemoryOptimizer {
    /// 任务 → 模拟耗时
    latency: HashMap<GlpkTask, Duration>,
    submissions: Mutex<Vec<GlpkTask>>,
}

impl InMemoryOptimizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为某类任务设置模拟耗时（超过作业限时则报告超时）
    pub fn with_latency(mut self, task: GlpkTask, latency: Duration) -> Self {
        self.latency.insert(task, latency);
        self
    }

    /// 已提交的任务序列
    pub fn submissions(&self) -> Vec<GlpkTask> {
        self.submissions
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn submission_count(&self, task: GlpkTask) -> usize {
        self.submissions().iter().filter(|t| **t == task).count()
    }
}

#[async_trait]
impl OptimizerPort for InMemoryOptimizer {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn submit(&self, job: OptimizerJob) -> Result<OptimizerReport, SolverError> {
        if let Ok(mut submissions) = self.submissions.lock() {
            submissions.push(job.task);
        }

        if let Some(latency) = self.latency.get(&job.task).copied() {
            if latency >= job.time_limit {
                tokio::time::sleep(job.time_limit).await;
                return Err(SolverError::Timeout {
                    task: job.task.as_str().to_string(),
                    limit_ms: job.time_limit.as_millis() as u64,
                });
            }
            tokio::time::sleep(latency).await;
        }

        let data = GmplData::parse(&job.data)?;
        let outcome = match job.task {
            GlpkTask::MinSatisfaction => solve_min_satisfaction(&data),
            GlpkTask::UnitDistribution => solve_unit_distribution(&data),
        };
        let solution = render(job.task, &data, &outcome);

        let stem = job.task.file_stem();
        let mut artifacts = BTreeMap::new();
        artifacts.insert(format!("{}.mod", stem), job.model);
        artifacts.insert(format!("{}.dat", stem), job.data);
        artifacts.insert(format!("{}.sol", stem), solution.clone());

        Ok(OptimizerReport {
            solution,
            artifacts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::spec::LotterySpec;
    use crate::engine::glpk::data::DataGenerator;
    use crate::engine::glpk::solution::SolutionParser;

    fn job(task: GlpkTask, data: String) -> OptimizerJob {
        OptimizerJob {
            task,
            model: String::new(),
            data,
            time_limit: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_hungarian_finds_minimum() {
        let cost = vec![
            vec![4.0, 1.0, 3.0],
            vec![2.0, 0.0, 5.0],
            vec![3.0, 2.0, 2.0],
        ];
        let assignment = hungarian(&cost);
        let total: f64 = assignment.iter().enumerate().map(|(i, j)| cost[i][*j]).sum();
        assert_eq!(total, 5.0);
    }

    #[test]
    fn test_parse_roundtrips_generated_data() {
        let spec = LotterySpec::from_ids(vec![(1, vec![10, 20]), (2, vec![20, 10])], vec![10, 20]);
        let text = DataGenerator::new().phase2_data(&spec, 2);
        let data = GmplData::parse(&text).unwrap();
        assert_eq!(data.families, vec!["c1", "c2"]);
        assert_eq!(data.units, vec!["v10", "v20"]);
        assert_eq!(data.ceiling, Some(2.0));
        assert!(data.ranks[0][0] < 1.0 && data.ranks[0][0] > 0.5);
    }

    #[tokio::test]
    async fn test_phase1_objective_is_bottleneck_rank() {
        // 两个家庭都首选 10，最优最差秩次为 2
        let spec = LotterySpec::from_ids(vec![(1, vec![10, 20]), (2, vec![10, 20])], vec![10, 20]);
        let text = DataGenerator::new().phase1_data(&spec);

        let report = InMemoryOptimizer::new()
            .submit(job(GlpkTask::MinSatisfaction, text))
            .await
            .unwrap();

        assert_eq!(SolutionParser::new().extract_objective(&report.solution).unwrap(), 2);
        assert!(report.artifacts.contains_key("phase1.sol"));
    }

    #[tokio::test]
    async fn test_phase2_reports_integer_empty_below_bottleneck() {
        let spec = LotterySpec::from_ids(vec![(1, vec![10, 20]), (2, vec![10, 20])], vec![10, 20]);
        let text = DataGenerator::new().phase2_data(&spec, 1);

        let report = InMemoryOptimizer::new()
            .submit(job(GlpkTask::UnitDistribution, text))
            .await
            .unwrap();

        assert!(SolutionParser::new().is_infeasible(&report.solution));
    }

    #[tokio::test]
    async fn test_latency_beyond_limit_times_out() {
        let optimizer = InMemoryOptimizer::new()
            .with_latency(GlpkTask::MinSatisfaction, Duration::from_secs(10));
        let spec = LotterySpec::from_ids(vec![(1, vec![10])], vec![10]);
        let mut job = job(GlpkTask::MinSatisfaction, DataGenerator::new().phase1_data(&spec));
        job.time_limit = Duration::from_millis(20);

        let err = optimizer.submit(job).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(optimizer.submission_count(GlpkTask::MinSatisfaction), 1);
    }
}
