// ==========================================
// 抽签分配引擎 - 抽签执行服务
// ==========================================
// 职责:
// 1. 前置校验与原子预约（同一事务）
// 2. 构建清单、写入 INIT 审计
// 3. 调度求解（tokio::spawn 或请求内同步）
// 4. 成功: 写入分配结果并标记 EXECUTED
//    失败: 写入 FAILURE 审计并释放预约
// 5. 作废已执行结果
// ==========================================

use crate::api::audit_recorder::{
    failure_payload, invalidate_payload, record_init_in, ExecutionAuditSink,
};
use crate::api::error::{ExecutionError, ExecutionResult};
use crate::api::manifest_builder::build_manifest_in;
use crate::api::validator::{check_lottery, reserve_and_check_in};
use crate::config::DispatchMode;
use crate::domain::audit::{AuditRecord, AuditType};
use crate::domain::lottery::{ExecutionOptions, ExecutionStatus, Lottery};
use crate::domain::result::{Orphans, SolverResult};
use crate::domain::spec::LotteryManifest;
use crate::domain::types::{FamilyId, LotteryId, UnitId};
use crate::engine::events::{AuditEvent, AuditSink};
use crate::engine::orchestrator::LotteryOrchestrator;
use crate::repository::{
    with_transaction, AuditRepository, LotteryRepository, NewAuditRecord, ProjectRepository,
};
use futures::FutureExt;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

// ==========================================
// 执行结果
// ==========================================

/// 异步阶段的最终结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Executed {
        execution_uuid: String,
        picks: BTreeMap<FamilyId, UnitId>,
        orphans: Orphans,
    },
    Failed {
        execution_uuid: String,
        error_type: String,
        reason_code: String,
        message: String,
        user_message: String,
    },
}

impl ExecutionOutcome {
    pub fn is_executed(&self) -> bool {
        matches!(self, ExecutionOutcome::Executed { .. })
    }

    pub fn execution_uuid(&self) -> &str {
        match self {
            ExecutionOutcome::Executed { execution_uuid, .. }
            | ExecutionOutcome::Failed { execution_uuid, .. } => execution_uuid,
        }
    }

    fn failed(execution_uuid: &str, err: &ExecutionError) -> Self {
        ExecutionOutcome::Failed {
            execution_uuid: execution_uuid.to_string(),
            error_type: err.kind().to_string(),
            reason_code: err.reason_code().to_string(),
            message: err.to_string(),
            user_message: err.user_message(),
        }
    }
}

/// 执行受理凭据
///
/// 同步阶段通过后返回；异步模式下持有后台任务句柄
#[derive(Debug)]
pub struct ExecutionTicket {
    pub execution_uuid: String,
    pub lottery_id: LotteryId,
    pending: Pending,
}

#[derive(Debug)]
enum Pending {
    Spawned(JoinHandle<ExecutionOutcome>),
    Done(ExecutionOutcome),
}

impl ExecutionTicket {
    /// 等待异步阶段结束
    pub async fn wait(self) -> ExecutionOutcome {
        match self.pending {
            Pending::Done(outcome) => outcome,
            Pending::Spawned(handle) => match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(execution_uuid = %self.execution_uuid, error = %e, "执行任务异常退出");
                    ExecutionOutcome::Failed {
                        execution_uuid: self.execution_uuid,
                        error_type: "ENGINE".to_string(),
                        reason_code: "TASK_ABORTED".to_string(),
                        message: e.to_string(),
                        user_message: crate::i18n::t("lottery.execution_failed"),
                    }
                }
            },
        }
    }
}

/// 作废结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidationReport {
    pub execution_uuid: String,
    pub cleared_units: usize,
    pub retired_records: usize,
}

// ==========================================
// ExecutionService - 抽签执行服务
// ==========================================
pub struct ExecutionService {
    conn: Arc<Mutex<Connection>>,
    lottery_repo: Arc<LotteryRepository>,
    audit_repo: Arc<AuditRepository>,
    runner: Arc<ExecutionRunner>,
    dispatch_mode: DispatchMode,
    config_snapshot: JsonValue,
}

impl ExecutionService {
    /// 创建执行服务
    ///
    /// # 参数
    /// - conn: 共享数据库连接（预约事务、结果写入）
    /// - orchestrator: 已注入求解策略的编排器
    /// - dispatch_mode: 求解调度方式
    /// - config_snapshot: 写入 INIT 审计的配置快照
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        orchestrator: Arc<LotteryOrchestrator>,
        dispatch_mode: DispatchMode,
        config_snapshot: JsonValue,
    ) -> Self {
        let lottery_repo = Arc::new(LotteryRepository::new(conn.clone()));
        let audit_repo = Arc::new(AuditRepository::new(conn.clone()));
        let runner = Arc::new(ExecutionRunner {
            conn: conn.clone(),
            lottery_repo: lottery_repo.clone(),
            audit_repo: audit_repo.clone(),
            orchestrator,
        });

        Self {
            conn,
            lottery_repo,
            audit_repo,
            runner,
            dispatch_mode,
            config_snapshot,
        }
    }

    pub fn dispatch_mode(&self) -> DispatchMode {
        self.dispatch_mode
    }

    /// 执行抽签
    ///
    /// # 返回
    /// - Ok(ExecutionTicket): 同步阶段通过，求解已调度
    /// - Err(ExecutionError): 同步阶段失败，持久化状态未改变
    #[instrument(skip(self), fields(dispatch = self.dispatch_mode.as_str()))]
    pub async fn execute(
        &self,
        lottery_id: LotteryId,
        options: ExecutionOptions,
    ) -> ExecutionResult<ExecutionTicket> {
        let lottery = self.load(lottery_id)?;
        check_lottery(&lottery, chrono::Local::now().naive_local())?;

        let solver = self.runner.orchestrator.solver_name();
        let manifest = with_transaction(&self.conn, |conn| {
            reserve_and_check_in(conn, &lottery, &options)?;
            let manifest = build_manifest_in(conn, &lottery, options)?;
            let retired = record_init_in(conn, &manifest, solver, &self.config_snapshot)?;
            if retired > 0 {
                info!(retired, "已作废历史审计记录");
            }
            Ok::<_, ExecutionError>(manifest)
        })?;

        info!(
            execution_uuid = %manifest.execution_uuid,
            project_id = manifest.project_id,
            groups = manifest.groups.len(),
            family_count = manifest.family_count(),
            unit_count = manifest.unit_count(),
            "抽签已预约，开始调度求解"
        );

        let execution_uuid = manifest.execution_uuid.clone();
        let runner = self.runner.clone();
        let pending = match self.dispatch_mode {
            DispatchMode::Async => Pending::Spawned(tokio::spawn(async move { runner.run(manifest).await })),
            DispatchMode::Inline => Pending::Done(runner.run(manifest).await),
        };

        Ok(ExecutionTicket {
            execution_uuid,
            lottery_id,
            pending,
        })
    }

    /// 作废已执行的抽签结果
    ///
    /// 同一事务内: 写入 INVALIDATE（沿用原执行 uuid）、清空分配、作废审计、恢复可执行
    #[instrument(skip(self))]
    pub fn invalidate(&self, lottery_id: LotteryId) -> ExecutionResult<InvalidationReport> {
        let lottery = self.load(lottery_id)?;
        if lottery.status != ExecutionStatus::Executed {
            return Err(ExecutionError::NotExecuted(lottery_id));
        }

        let report = with_transaction(&self.conn, |conn| {
            let execution_uuid = AuditRepository::latest_execution_uuid_in(conn, lottery_id)?
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

            let cleared_units = ProjectRepository::clear_assignments_in(conn, lottery.project_id)?;
            AuditRepository::insert_in(
                conn,
                &NewAuditRecord {
                    execution_uuid: &execution_uuid,
                    project_id: lottery.project_id,
                    lottery_id,
                    audit_type: AuditType::Invalidate,
                    payload: &invalidate_payload(lottery_id, cleared_units),
                },
            )?;
            let retired_records = AuditRepository::retire_by_lottery_in(conn, lottery_id)?;
            LotteryRepository::restore_in(conn, lottery_id)?;

            Ok::<_, ExecutionError>(InvalidationReport {
                execution_uuid,
                cleared_units,
                retired_records,
            })
        })?;

        info!(
            execution_uuid = %report.execution_uuid,
            cleared_units = report.cleared_units,
            retired_records = report.retired_records,
            "抽签结果已作废"
        );
        Ok(report)
    }

    /// 查询抽签
    pub fn lottery(&self, lottery_id: LotteryId) -> ExecutionResult<Lottery> {
        self.load(lottery_id)
    }

    /// 抽签审计记录
    ///
    /// # 参数
    /// - include_retired: 是否包含已作废记录
    pub fn audit_trail(
        &self,
        lottery_id: LotteryId,
        include_retired: bool,
    ) -> ExecutionResult<Vec<AuditRecord>> {
        let records = if include_retired {
            self.audit_repo.find_by_lottery_with_retired(lottery_id)?
        } else {
            self.audit_repo.find_by_lottery(lottery_id)?
        };
        Ok(records)
    }

    /// 单次执行的审计记录
    pub fn execution_trail(&self, execution_uuid: &str) -> ExecutionResult<Vec<AuditRecord>> {
        Ok(self.audit_repo.find_by_execution(execution_uuid)?)
    }

    fn load(&self, lottery_id: LotteryId) -> ExecutionResult<Lottery> {
        self.lottery_repo
            .find(lottery_id)?
            .ok_or(ExecutionError::NotFound(lottery_id))
    }
}

// ==========================================
// ExecutionRunner - 异步阶段
// ==========================================
// 红线: 不向外抛错，所有失败转为 FAILURE 审计并释放预约
struct ExecutionRunner {
    conn: Arc<Mutex<Connection>>,
    lottery_repo: Arc<LotteryRepository>,
    audit_repo: Arc<AuditRepository>,
    orchestrator: Arc<LotteryOrchestrator>,
}

impl std::fmt::Debug for ExecutionRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionRunner")
            .field("solver", &self.orchestrator.solver_name())
            .finish()
    }
}

impl ExecutionRunner {
    async fn run(&self, manifest: LotteryManifest) -> ExecutionOutcome {
        let sink: Arc<dyn AuditSink> = Arc::new(ExecutionAuditSink::new(
            self.audit_repo.clone(),
            manifest.project_id,
            manifest.lottery_id,
        ));

        let solved = AssertUnwindSafe(self.solve_and_persist(&manifest, sink.clone()))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(ExecutionError::Panicked(panic_message(&*panic))));

        match solved {
            Ok(result) => {
                info!(
                    execution_uuid = %manifest.execution_uuid,
                    picks = result.picks.len(),
                    orphan_families = result.orphans.families.len(),
                    orphan_units = result.orphans.units.len(),
                    "抽签执行完成"
                );
                ExecutionOutcome::Executed {
                    execution_uuid: manifest.execution_uuid,
                    picks: result.picks,
                    orphans: result.orphans,
                }
            }
            Err(err) => {
                error!(
                    execution_uuid = %manifest.execution_uuid,
                    error_type = err.kind(),
                    reason_code = err.reason_code(),
                    error = %err,
                    "抽签执行失败"
                );
                self.fail(&manifest, sink.as_ref(), &err);
                ExecutionOutcome::failed(&manifest.execution_uuid, &err)
            }
        }
    }

    async fn solve_and_persist(
        &self,
        manifest: &LotteryManifest,
        sink: Arc<dyn AuditSink>,
    ) -> ExecutionResult<SolverResult> {
        let result = self.orchestrator.execute(manifest, sink).await?;

        with_transaction(&self.conn, |conn| {
            ProjectRepository::apply_picks_in(conn, manifest.project_id, &result.picks)?;
            LotteryRepository::mark_executed_in(conn, manifest.lottery_id)?;
            Ok::<_, ExecutionError>(())
        })?;

        Ok(result)
    }

    /// 记录失败并释放预约（自身失败只记日志）
    fn fail(&self, manifest: &LotteryManifest, sink: &dyn AuditSink, err: &ExecutionError) {
        let event = AuditEvent::new(
            manifest.execution_uuid.clone(),
            AuditType::Failure,
            failure_payload(err),
        );
        if let Err(e) = sink.record(event) {
            error!(execution_uuid = %manifest.execution_uuid, error = %e, "FAILURE 审计写入失败");
        }

        match self.lottery_repo.release(manifest.lottery_id) {
            Ok(()) => warn!(lottery_id = manifest.lottery_id, "已释放预约，抽签可重新执行"),
            Err(e) => error!(lottery_id = manifest.lottery_id, error = %e, "释放预约失败"),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests;
