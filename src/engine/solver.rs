// ==========================================
// 抽签分配引擎 - 求解策略
// ==========================================
// Solver trait: 单一分组的求解入口
// - distribute(): 各策略实现，输入为已平衡的规格，输出完美匹配
// - execute():    统一流程 = 校验 → 平衡 → distribute → 校验匹配 → 归类孤儿
// 策略在组合根注入（见 app::state::build_solver）
// ==========================================

use crate::domain::audit::AuditType;
use crate::domain::result::{Orphans, SolverResult};
use crate::domain::spec::LotterySpec;
use crate::domain::types::{FamilyId, GroupKey, UnitRef};
use crate::engine::balancer::SpecBalancer;
use crate::engine::error::SolverError;
use crate::engine::events::{AuditEvent, AuditSink, NoOpAuditSink};
use crate::engine::glpk::Glpk;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::{json, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

// ==========================================
// SolveContext - 求解上下文
// ==========================================
#[derive(Clone)]
pub struct SolveContext {
    pub execution_uuid: String,
    pub group: Option<GroupKey>,
    pub audit: Arc<dyn AuditSink>,
}

impl SolveContext {
    pub fn new(execution_uuid: impl Into<String>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            execution_uuid: execution_uuid.into(),
            group: None,
            audit,
        }
    }

    /// 不写审计的上下文（库调用方直接求解时使用）
    pub fn detached() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), Arc::new(NoOpAuditSink))
    }

    pub fn with_group(&self, group: Option<GroupKey>) -> Self {
        Self {
            execution_uuid: self.execution_uuid.clone(),
            group,
            audit: self.audit.clone(),
        }
    }

    /// 写入 CUSTOM 审计记录（失败仅告警，不中断求解）
    pub fn custom(&self, mut payload: JsonValue) {
        if let JsonValue::Object(map) = &mut payload {
            map.insert("group".to_string(), json!(self.group));
        }

        let event = AuditEvent::new(self.execution_uuid.clone(), AuditType::Custom, payload);
        if let Err(e) = self.audit.record(event) {
            warn!(execution_uuid = %self.execution_uuid, error = %e, "CUSTOM 审计记录写入失败");
        }
    }
}

impl std::fmt::Debug for SolveContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolveContext")
            .field("execution_uuid", &self.execution_uuid)
            .field("group", &self.group)
            .finish()
    }
}

// ==========================================
// Solver Trait
// ==========================================

/// 求解策略
#[async_trait]
pub trait Solver: Send + Sync {
    /// 策略名称（写入审计记录）
    fn name(&self) -> &'static str;

    /// 求解已平衡的规格
    ///
    /// # 返回
    /// 家庭 → 单元的完美匹配（可能包含占位单元）
    async fn distribute(
        &self,
        ctx: &SolveContext,
        spec: &LotterySpec,
    ) -> Result<BTreeMap<FamilyId, UnitRef>, SolverError>;

    /// 完整求解流程
    ///
    /// # 返回
    /// - picks: 仅包含真实单元
    /// - orphans.families: 匹配到占位单元的家庭
    /// - orphans.units: 平衡时被剔除的单元
    async fn execute(&self, ctx: &SolveContext, spec: &LotterySpec) -> Result<SolverResult, SolverError> {
        spec.validate()?;

        if spec.family_count() == 0 || spec.unit_count() == 0 {
            return Ok(SolverResult::new(
                BTreeMap::new(),
                Orphans {
                    families: spec.family_ids(),
                    units: spec.real_unit_ids(),
                },
            ));
        }

        let balancer = SpecBalancer::new();
        let balanced = balancer.balance(spec);

        let picks = self.distribute(ctx, &balanced.spec).await?;
        verify_perfect_matching(&balanced.spec, &picks)?;

        let mut result = SolverResult::default();
        for (family_id, unit) in picks {
            match unit.real_id() {
                Some(unit_id) => {
                    result.picks.insert(family_id, unit_id);
                }
                None => result.orphans.families.push(family_id),
            }
        }
        result.orphans.units = balanced.pruned_units;
        result.orphans.families.sort_unstable();
        result.orphans.units.sort_unstable();

        debug!(
            solver = self.name(),
            picks = result.picks.len(),
            orphan_families = result.orphans.families.len(),
            orphan_units = result.orphans.units.len(),
            "分组求解完成"
        );

        Ok(result)
    }
}

/// 校验 picks 为平衡规格上的完美匹配
fn verify_perfect_matching(
    spec: &LotterySpec,
    picks: &BTreeMap<FamilyId, UnitRef>,
) -> Result<(), SolverError> {
    let families: BTreeSet<FamilyId> = spec.families.keys().copied().collect();
    let picked_families: BTreeSet<FamilyId> = picks.keys().copied().collect();
    if families != picked_families {
        return Err(SolverError::InvalidSolution(format!(
            "家庭集合不一致: 期望 {} 个, 实际 {} 个",
            families.len(),
            picked_families.len()
        )));
    }

    let units: BTreeSet<UnitRef> = spec.units.iter().copied().collect();
    let mut used = BTreeSet::new();
    for (family_id, unit) in picks {
        if !units.contains(unit) {
            return Err(SolverError::InvalidSolution(format!(
                "家庭 {} 分配到未知单元 {}",
                family_id, unit
            )));
        }
        if !used.insert(*unit) {
            return Err(SolverError::InvalidSolution(format!("单元 {} 被重复分配", unit)));
        }
    }

    Ok(())
}

// ==========================================
// GlpkSolver - 两阶段精确求解（含回退）
// ==========================================
pub struct GlpkSolver {
    glpk: Glpk,
}

impl GlpkSolver {
    pub fn new(glpk: Glpk) -> Self {
        Self { glpk }
    }
}

#[async_trait]
impl Solver for GlpkSolver {
    fn name(&self) -> &'static str {
        "glpk"
    }

    async fn distribute(
        &self,
        ctx: &SolveContext,
        spec: &LotterySpec,
    ) -> Result<BTreeMap<FamilyId, UnitRef>, SolverError> {
        self.glpk.distribute(ctx, spec).await
    }
}

// ==========================================
// GreedySolver - 贪心快速求解
// ==========================================
// 家庭按 ID 升序依次取偏好中最靠前的空闲单元；
// 偏好全部被占时取 ID 最小的空闲单元
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedySolver;

#[async_trait]
impl Solver for GreedySolver {
    fn name(&self) -> &'static str {
        "greedy"
    }

    async fn distribute(
        &self,
        _ctx: &SolveContext,
        spec: &LotterySpec,
    ) -> Result<BTreeMap<FamilyId, UnitRef>, SolverError> {
        let mut free: BTreeSet<UnitRef> = spec.units.iter().copied().collect();
        let mut picks = BTreeMap::new();

        for (family_id, prefs) in &spec.families {
            let choice = prefs
                .iter()
                .find(|unit| free.contains(unit))
                .copied()
                .or_else(|| free.iter().next().copied());

            let Some(unit) = choice else {
                return Err(SolverError::InvalidSolution(format!(
                    "家庭 {} 无可用单元",
                    family_id
                )));
            };
            free.remove(&unit);
            picks.insert(*family_id, unit);
        }

        Ok(picks)
    }
}

// ==========================================
// TestSolver - 确定性配对（忽略偏好）
// ==========================================
// 家庭 ID 升序与单元升序逐一配对
#[derive(Debug, Clone, Copy, Default)]
pub struct TestSolver;

#[async_trait]
impl Solver for TestSolver {
    fn name(&self) -> &'static str {
        "test"
    }

    async fn distribute(
        &self,
        _ctx: &SolveContext,
        spec: &LotterySpec,
    ) -> Result<BTreeMap<FamilyId, UnitRef>, SolverError> {
        let mut units = spec.units.clone();
        units.sort();

        Ok(spec.families.keys().copied().zip(units).collect())
    }
}

// ==========================================
// RandomSolver - 随机配对（忽略偏好）
// ==========================================
// 单元随机打乱后与家庭逐一配对；占位单元同样参与打乱，
// 因此落空的家庭也是随机的
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSolver {
    seed: Option<u64>,
}

impl RandomSolver {
    pub fn new() -> Self {
        Self { seed: None }
    }

    /// 固定种子（每次求解使用同一序列）
    pub fn with_seed(seed: u64) -> Self {
        Self { seed: Some(seed) }
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

#[async_trait]
impl Solver for RandomSolver {
    fn name(&self) -> &'static str {
        "random"
    }

    async fn distribute(
        &self,
        ctx: &SolveContext,
        spec: &LotterySpec,
    ) -> Result<BTreeMap<FamilyId, UnitRef>, SolverError> {
        let mut units = spec.units.clone();
        units.shuffle(&mut self.rng());
        debug!(
            execution_uuid = %ctx.execution_uuid,
            group = ?ctx.group,
            seeded = self.seed.is_some(),
            "随机配对"
        );

        Ok(spec.families.keys().copied().zip(units).collect())
    }
}
