// ==========================================
// 抽签分配引擎 - 引擎编排器
// ==========================================
// 主流程:
//   1. 校验清单（分组间家庭/单元不相交）
//   2. 按 GroupKey 升序逐组求解，每组写 GROUP_EXECUTION
//   3. 汇总各组孤儿，按需再分配（家庭 ID 升序 × 单元 ID 升序配对）
//   4. 精确对账，写 PROJECT_EXECUTION
// ==========================================

use crate::domain::audit::AuditType;
use crate::domain::result::{Orphans, SolverResult};
use crate::domain::spec::{LotteryManifest, LotterySpec};
use crate::domain::types::{FamilyId, UnitId};
use crate::engine::error::EngineError;
use crate::engine::events::{AuditEvent, AuditSink};
use crate::engine::solver::{SolveContext, Solver, TestSolver};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

// ==========================================
// LotteryOrchestrator - 引擎编排器
// ==========================================
pub struct LotteryOrchestrator {
    solver: Arc<dyn Solver>,
    redistribute_orphans: bool,
}

impl LotteryOrchestrator {
    /// 创建编排器
    ///
    /// # 参数
    /// - solver: 分组求解策略
    /// - redistribute_orphans: 是否对跨组孤儿做再分配
    pub fn new(solver: Arc<dyn Solver>, redistribute_orphans: bool) -> Self {
        Self {
            solver,
            redistribute_orphans,
        }
    }

    pub fn solver_name(&self) -> &'static str {
        self.solver.name()
    }

    /// 执行完整清单
    ///
    /// # 返回
    /// 合并后的结果；每个输入家庭/单元恰好出现在 picks 或孤儿之一
    pub async fn execute(
        &self,
        manifest: &LotteryManifest,
        audit: Arc<dyn AuditSink>,
    ) -> Result<SolverResult, EngineError> {
        manifest.validate()?;

        info!(
            execution_uuid = %manifest.execution_uuid,
            lottery_id = manifest.lottery_id,
            groups = manifest.groups.len(),
            family_count = manifest.family_count(),
            unit_count = manifest.unit_count(),
            solver = self.solver.name(),
            "开始执行抽签编排"
        );

        let ctx = SolveContext::new(manifest.execution_uuid.clone(), audit.clone());

        // ==========================================
        // 步骤1: 逐组求解
        // ==========================================
        let mut picks = BTreeMap::new();
        let mut pooled = Orphans::default();

        for (group, spec) in &manifest.groups {
            let group_ctx = ctx.with_group(Some(*group));
            let result = self
                .solver
                .execute(&group_ctx, spec)
                .await
                .map_err(|source| EngineError::Solver {
                    group: Some(*group),
                    source,
                })?;

            debug!(
                group,
                picks = result.picks.len(),
                orphan_families = result.orphans.families.len(),
                orphan_units = result.orphans.units.len(),
                "分组完成"
            );

            self.record(
                &audit,
                &manifest.execution_uuid,
                AuditType::GroupExecution,
                json!({
                    "group": group,
                    "solver": self.solver.name(),
                    "picks": result.picks,
                    "orphans": result.orphans,
                }),
            )?;

            picks.extend(result.picks);
            pooled.families.extend(result.orphans.families);
            pooled.units.extend(result.orphans.units);
        }

        // ==========================================
        // 步骤2: 孤儿再分配
        // ==========================================
        pooled.families.sort_unstable();
        pooled.units.sort_unstable();

        let orphans = if self.redistribute_orphans
            && !pooled.families.is_empty()
            && !pooled.units.is_empty()
        {
            let redistributed = self.redistribute(&ctx, &pooled).await?;

            self.record(
                &audit,
                &manifest.execution_uuid,
                AuditType::GroupExecution,
                json!({
                    "group": null,
                    "phase": "orphan_redistribution",
                    "picks": redistributed.picks,
                    "orphans": redistributed.orphans,
                }),
            )?;

            picks.extend(redistributed.picks);
            redistributed.orphans
        } else {
            pooled
        };

        let result = SolverResult::new(picks, orphans);

        // ==========================================
        // 步骤3: 精确对账
        // ==========================================
        let (families, units) = Self::input_sets(manifest);
        if !result.accounts_for(&families, &units) {
            return Err(EngineError::AccountingMismatch(format!(
                "家庭 {} / 单元 {} 与结果 picks {} + 孤儿家庭 {} + 孤儿单元 {} 不一致",
                families.len(),
                units.len(),
                result.picks.len(),
                result.orphans.families.len(),
                result.orphans.units.len()
            )));
        }

        self.record(
            &audit,
            &manifest.execution_uuid,
            AuditType::ProjectExecution,
            json!({
                "solver": self.solver.name(),
                "redistribute_orphans": self.redistribute_orphans,
                "picks": result.picks,
                "orphans": result.orphans,
            }),
        )?;

        info!(
            execution_uuid = %manifest.execution_uuid,
            picks = result.picks.len(),
            orphan_families = result.orphans.families.len(),
            orphan_units = result.orphans.units.len(),
            "抽签编排完成"
        );

        Ok(result)
    }

    /// 孤儿再分配: 忽略偏好，家庭 ID 升序与单元 ID 升序配对
    async fn redistribute(&self, ctx: &SolveContext, pooled: &Orphans) -> Result<SolverResult, EngineError> {
        let spec = LotterySpec::from_ids(
            pooled
                .families
                .iter()
                .map(|family_id| (*family_id, Vec::<UnitId>::new())),
            pooled.units.clone(),
        );

        TestSolver
            .execute(&ctx.with_group(None), &spec)
            .await
            .map_err(|source| EngineError::Solver {
                group: None,
                source,
            })
    }

    fn input_sets(manifest: &LotteryManifest) -> (BTreeSet<FamilyId>, BTreeSet<UnitId>) {
        let families = manifest
            .groups
            .values()
            .flat_map(|spec| spec.families.keys().copied())
            .collect();
        let units = manifest
            .groups
            .values()
            .flat_map(|spec| spec.real_unit_ids())
            .collect();
        (families, units)
    }

    fn record(
        &self,
        audit: &Arc<dyn AuditSink>,
        execution_uuid: &str,
        audit_type: AuditType,
        payload: serde_json::Value,
    ) -> Result<(), EngineError> {
        audit
            .record(AuditEvent::new(execution_uuid, audit_type, payload))
            .map_err(|e| EngineError::AuditSink(e.to_string()))
    }
}
