// ==========================================
// 抽签分配引擎 - GLPK 两阶段求解
// ==========================================
// 精确流程 (exact):
//   阶段一求最优最差秩次 z*（限时 min(timeout, phase1_timeout)）
//   阶段二在 S = z* 下求秩次总和最小的分配
// 回退流程 (fallback):
//   在 [1, worst_rank] 上二分 S，每步仅跑阶段二
//   可行 → hi = S-1；不可行或单步超时 → lo = S+1
//   最后一个可行解即结果
// 家庭数 >= phase1_max_size 或规格退化时直接走回退流程；
// 精确流程任一阶段超时也转入回退流程
// ==========================================

pub mod data;
pub mod degeneracy;
pub mod memory;
pub mod model;
pub mod port;
pub mod solution;
pub mod workspace;

pub use data::DataGenerator;
pub use degeneracy::{Degeneracy, DegeneracySettings};
pub use memory::InMemoryOptimizer;
pub use model::ModelGenerator;
pub use port::{GlpkTask, GlpsolOptimizer, OptimizerJob, OptimizerPort, OptimizerReport};
pub use solution::SolutionParser;
pub use workspace::SolverWorkspace;

use crate::domain::spec::LotterySpec;
use crate::domain::types::{FamilyId, UnitRef};
use crate::engine::error::SolverError;
use crate::engine::solver::SolveContext;
use serde_json::{json, Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

// ==========================================
// GlpkSettings - 求解参数
// ==========================================
#[derive(Debug, Clone, PartialEq)]
pub struct GlpkSettings {
    /// 单次求解总限时
    pub timeout: Duration,
    /// 家庭数达到该值时跳过阶段一
    pub phase1_max_size: usize,
    /// 阶段一限时
    pub phase1_timeout: Duration,
    /// 退化规格检测
    pub degeneracy: DegeneracySettings,
}

impl Default for GlpkSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            phase1_max_size: 25,
            phase1_timeout: Duration::from_millis(500),
            degeneracy: DegeneracySettings::default(),
        }
    }
}

/// 求解策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Exact,
    Fallback,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Exact => "exact",
            Strategy::Fallback => "fallback",
        }
    }
}

/// 阶段二分配结果
#[derive(Debug, Clone, PartialEq)]
pub struct Distribution {
    pub picks: BTreeMap<FamilyId, UnitRef>,
    pub min_satisfaction: u32,
    pub time_ms: f64,
    pub artifacts: BTreeMap<String, String>,
}

/// 阶段一结果
#[derive(Debug, Clone, PartialEq)]
pub struct MinSatisfaction {
    pub value: u32,
    pub time_ms: f64,
    pub artifacts: BTreeMap<String, String>,
}

/// 阶段二可行性
#[derive(Debug, Clone, PartialEq)]
pub enum FeasibilityOutcome {
    Feasible(Distribution),
    Infeasible,
    TimedOut,
}

// ==========================================
// Glpk - 两阶段求解器
// ==========================================
pub struct Glpk {
    optimizer: Arc<dyn OptimizerPort>,
    settings: GlpkSettings,
    models: ModelGenerator,
    data: DataGenerator,
    parser: SolutionParser,
}

impl Glpk {
    pub fn new(optimizer: Arc<dyn OptimizerPort>, settings: GlpkSettings) -> Self {
        Self {
            optimizer,
            settings,
            models: ModelGenerator::new(),
            data: DataGenerator::new(),
            parser: SolutionParser::new(),
        }
    }

    pub fn settings(&self) -> &GlpkSettings {
        &self.settings
    }

    /// 按规模与退化检测选择策略
    pub fn select_strategy(&self, spec: &LotterySpec) -> Strategy {
        if spec.family_count() >= self.settings.phase1_max_size
            || self.settings.degeneracy.detect(spec).is_some()
        {
            Strategy::Fallback
        } else {
            Strategy::Exact
        }
    }

    /// 二分查找单步限时: 2·timeout / (⌈log2 n⌉ + 1)，溢出时取 Duration::MAX
    pub fn step_timeout(&self, family_count: usize) -> Duration {
        let n = family_count.max(1) as f64;
        let steps = n.log2().ceil() + 1.0;
        Duration::try_from_secs_f64(self.settings.timeout.as_secs_f64() * 2.0 / steps)
            .unwrap_or(Duration::MAX)
    }

    /// 阶段一: 求最优最差秩次
    pub async fn min_satisfaction(
        &self,
        spec: &LotterySpec,
        time_limit: Duration,
    ) -> Result<MinSatisfaction, SolverError> {
        let started = Instant::now();
        let job = OptimizerJob {
            task: GlpkTask::MinSatisfaction,
            model: self.models.phase1_model().to_string(),
            data: self.data.phase1_data(spec),
            time_limit,
        };

        let report = self.optimizer.submit(job).await?;
        let objective = self.parser.extract_objective(&report.solution)?;
        let value = u32::try_from(objective)
            .map_err(|_| SolverError::Unparseable(format!("目标值越界: {}", objective)))?;

        Ok(MinSatisfaction {
            value,
            time_ms: elapsed_ms(started),
            artifacts: report.artifacts,
        })
    }

    /// 阶段二: 在秩次上限 S 下求分配
    ///
    /// # 返回
    /// - `Feasible`: 找到分配
    /// - `Infeasible`: 解文件报告不可行
    /// - `TimedOut`: 本步超时
    pub async fn unit_distribution(
        &self,
        spec: &LotterySpec,
        min_satisfaction: u32,
        time_limit: Duration,
    ) -> Result<FeasibilityOutcome, SolverError> {
        let started = Instant::now();
        let job = OptimizerJob {
            task: GlpkTask::UnitDistribution,
            model: self.models.phase2_model().to_string(),
            data: self.data.phase2_data(spec, min_satisfaction),
            time_limit,
        };

        let report = match self.optimizer.submit(job).await {
            Ok(report) => report,
            Err(e) if e.is_timeout() => return Ok(FeasibilityOutcome::TimedOut),
            Err(e) if e.is_infeasible() => return Ok(FeasibilityOutcome::Infeasible),
            Err(e) => return Err(e),
        };

        match self.parser.extract_assignments(&report.solution) {
            Ok(picks) => Ok(FeasibilityOutcome::Feasible(Distribution {
                picks,
                min_satisfaction,
                time_ms: elapsed_ms(started),
                artifacts: report.artifacts,
            })),
            Err(e) if e.is_infeasible() => Ok(FeasibilityOutcome::Infeasible),
            Err(e) => Err(e),
        }
    }

    /// 求解平衡后的规格
    pub async fn distribute(
        &self,
        ctx: &SolveContext,
        spec: &LotterySpec,
    ) -> Result<BTreeMap<FamilyId, UnitRef>, SolverError> {
        let strategy = self.select_strategy(spec);
        let degeneracy = self.settings.degeneracy.detect(spec);
        info!(
            execution_uuid = %ctx.execution_uuid,
            group = ?ctx.group,
            family_count = spec.family_count(),
            strategy = strategy.as_str(),
            degeneracy = degeneracy.map(|d| d.as_str()).unwrap_or("none"),
            "GLPK 求解开始"
        );

        if strategy == Strategy::Exact {
            if let Some(distribution) = self.exact_distribution(ctx, spec).await? {
                return Ok(distribution.picks);
            }
            warn!(
                execution_uuid = %ctx.execution_uuid,
                group = ?ctx.group,
                "精确流程超时，转入二分回退流程"
            );
        }

        let distribution = self.hybrid_distribution(ctx, spec).await?;
        Ok(distribution.picks)
    }

    /// 精确流程（超时返回 None）
    async fn exact_distribution(
        &self,
        ctx: &SolveContext,
        spec: &LotterySpec,
    ) -> Result<Option<Distribution>, SolverError> {
        let phase1_limit = self.settings.timeout.min(self.settings.phase1_timeout);

        let phase1 = match self.min_satisfaction(spec, phase1_limit).await {
            Ok(phase1) => phase1,
            Err(e) if e.is_timeout() => {
                ctx.custom(json!({
                    "task": GlpkTask::MinSatisfaction.as_str(),
                    "status": "timeout",
                    "strategy": Strategy::Exact.as_str(),
                    "metadata": { "timeout_ms": phase1_limit.as_millis() as u64 },
                }));
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        debug!(min_satisfaction = phase1.value, time_ms = phase1.time_ms, "阶段一完成");
        ctx.custom(json!({
            "task": GlpkTask::MinSatisfaction.as_str(),
            "status": "success",
            "strategy": Strategy::Exact.as_str(),
            "result": { "min_satisfaction": phase1.value },
            "metadata": {
                "time_ms": phase1.time_ms,
                "timeout_ms": phase1_limit.as_millis() as u64,
                "artifacts": phase1.artifacts,
            },
        }));

        match self
            .unit_distribution(spec, phase1.value, self.settings.timeout)
            .await?
        {
            FeasibilityOutcome::Feasible(distribution) => {
                ctx.custom(json!({
                    "task": GlpkTask::UnitDistribution.as_str(),
                    "status": "success",
                    "strategy": Strategy::Exact.as_str(),
                    "result": {
                        "distribution": distribution_json(&distribution.picks),
                        "min_satisfaction": distribution.min_satisfaction,
                    },
                    "metadata": {
                        "time_ms": distribution.time_ms,
                        "artifacts": distribution.artifacts,
                    },
                }));
                Ok(Some(distribution))
            }
            FeasibilityOutcome::TimedOut => {
                ctx.custom(json!({
                    "task": GlpkTask::UnitDistribution.as_str(),
                    "status": "timeout",
                    "strategy": Strategy::Exact.as_str(),
                    "metadata": { "timeout_ms": self.settings.timeout.as_millis() as u64 },
                }));
                Ok(None)
            }
            FeasibilityOutcome::Infeasible => Err(SolverError::Infeasible(format!(
                "阶段二在 S={} 下不可行",
                phase1.value
            ))),
        }
    }

    /// 二分回退流程
    async fn hybrid_distribution(
        &self,
        ctx: &SolveContext,
        spec: &LotterySpec,
    ) -> Result<Distribution, SolverError> {
        let started = Instant::now();
        let step_timeout = self.step_timeout(spec.family_count());

        let mut lo: u32 = 1;
        let mut hi: u32 = spec.worst_rank();
        let mut iterations = 0u32;
        let mut feasible_steps = Vec::new();
        let mut timed_out_steps = 0u32;
        let mut best: Option<Distribution> = None;

        while lo <= hi {
            iterations += 1;
            let candidate = lo + (hi - lo) / 2;

            match self.unit_distribution(spec, candidate, step_timeout).await? {
                FeasibilityOutcome::Feasible(distribution) => {
                    debug!(candidate, "二分步可行");
                    feasible_steps.push(json!({
                        "distribution": distribution_json(&distribution.picks),
                        "min_satisfaction": distribution.min_satisfaction,
                        "time_ms": distribution.time_ms,
                    }));
                    best = Some(distribution);
                    hi = candidate - 1;
                }
                FeasibilityOutcome::Infeasible => {
                    debug!(candidate, "二分步不可行");
                    lo = candidate + 1;
                }
                FeasibilityOutcome::TimedOut => {
                    warn!(candidate, step_timeout_ms = step_timeout.as_millis() as u64, "二分步超时，按不可行处理");
                    timed_out_steps += 1;
                    lo = candidate + 1;
                }
            }
        }

        let best = match best {
            Some(best) => best,
            // 有步骤超时时无法断言不可行
            None if timed_out_steps > 0 => {
                return Err(SolverError::Timeout {
                    task: "hybrid_distribution".to_string(),
                    limit_ms: step_timeout.as_millis() as u64,
                })
            }
            None => {
                return Err(SolverError::Infeasible(format!(
                    "二分查找 {} 步未找到可行解",
                    iterations
                )))
            }
        };

        info!(
            iterations,
            min_satisfaction = best.min_satisfaction,
            "二分回退流程完成"
        );

        ctx.custom(json!({
            "task": "hybrid_distribution",
            "status": "success",
            "strategy": Strategy::Fallback.as_str(),
            "result": {
                "distribution": distribution_json(&best.picks),
                "min_satisfaction": best.min_satisfaction,
            },
            "metadata": {
                "time_ms": elapsed_ms(started),
                "iterations": iterations,
                "step_timeout_ms": step_timeout.as_millis() as u64,
                "timed_out_steps": timed_out_steps,
                "feasible_steps": feasible_steps,
                "artifacts": best.artifacts,
            },
        }));

        Ok(best)
    }
}

/// 分配结果的审计表示: `{"<family>": "<unit token>"}`
pub fn distribution_json(picks: &BTreeMap<FamilyId, UnitRef>) -> JsonValue {
    let map: Map<String, JsonValue> = picks
        .iter()
        .map(|(family_id, unit)| (family_id.to_string(), JsonValue::String(unit.token())))
        .collect();
    JsonValue::Object(map)
}

fn elapsed_ms(started: Instant) -> f64 {
    (started.elapsed().as_secs_f64() * 100_000.0).round() / 100.0
}
