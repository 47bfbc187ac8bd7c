// ==========================================
// 抽签分配引擎 - 优化器端口
// ==========================================
// OptimizerPort: 提交 GMPL 模型与数据，返回解文件文本
// - GlpsolOptimizer: 外部 glpsol 子进程
// - InMemoryOptimizer: 进程内精确求解（见 memory.rs）
// ==========================================

use crate::engine::error::SolverError;
use crate::engine::glpk::workspace::SolverWorkspace;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// glpsol 超时输出标记
const TIME_LIMIT_MARKER: &str = "TIME LIMIT EXCEEDED";

/// glpsol 不可行输出标记（LP 松弛不可行时解文件只有 INTEGER UNDEFINED）
const NO_FEASIBLE_MARKERS: [&str; 2] = [
    "PROBLEM HAS NO PRIMAL FEASIBLE SOLUTION",
    "PROBLEM HAS NO INTEGER FEASIBLE SOLUTION",
];

// ==========================================
// GlpkTask - 求解任务类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlpkTask {
    /// 阶段一: 最差秩次
    MinSatisfaction,
    /// 阶段二: 单元分配
    UnitDistribution,
}

impl GlpkTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            GlpkTask::MinSatisfaction => "min_satisfaction",
            GlpkTask::UnitDistribution => "unit_distribution",
        }
    }

    /// 工作区文件名主干
    pub fn file_stem(&self) -> &'static str {
        match self {
            GlpkTask::MinSatisfaction => "phase1",
            GlpkTask::UnitDistribution => "phase2",
        }
    }
}

/// 优化器作业
#[derive(Debug, Clone)]
pub struct OptimizerJob {
    pub task: GlpkTask,
    pub model: String,
    pub data: String,
    pub time_limit: Duration,
}

/// 优化器输出
#[derive(Debug, Clone, Default)]
pub struct OptimizerReport {
    /// 解文件文本
    pub solution: String,
    /// 文件名 → 内容
    pub artifacts: BTreeMap<String, String>,
}

/// 优化器端口
#[async_trait]
pub trait OptimizerPort: Send + Sync {
    fn name(&self) -> &'static str;

    /// 提交作业
    ///
    /// # 返回
    /// - `Ok(report)`: 求解器正常结束（解文件可能报告不可行，由解析器判定）
    /// - `Err`: 环境错误、超时，或 stdout 已报告不可行
    async fn submit(&self, job: OptimizerJob) -> Result<OptimizerReport, SolverError>;
}

// ==========================================
// GlpsolOptimizer - glpsol 子进程
// ==========================================
#[derive(Debug, Clone)]
pub struct GlpsolOptimizer {
    glpsol_path: PathBuf,
    temp_dir: PathBuf,
}

impl GlpsolOptimizer {
    pub fn new(glpsol_path: impl Into<PathBuf>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            glpsol_path: glpsol_path.into(),
            temp_dir: temp_dir.into(),
        }
    }

    /// glpsol 的 --tmlim 参数（整秒，至少 1）
    fn tmlim_secs(time_limit: Duration) -> u64 {
        time_limit.as_secs_f64().ceil().max(1.0) as u64
    }

    /// 按 stdout 标记识别超时与不可行
    fn classify_stdout(job: &OptimizerJob, stdout: &str) -> Option<SolverError> {
        let upper = stdout.to_ascii_uppercase();
        if upper.contains(TIME_LIMIT_MARKER) {
            return Some(SolverError::Timeout {
                task: job.task.as_str().to_string(),
                limit_ms: job.time_limit.as_millis() as u64,
            });
        }
        NO_FEASIBLE_MARKERS
            .iter()
            .find(|marker| upper.contains(*marker))
            .map(|marker| SolverError::Infeasible(format!("glpsol: {}", marker)))
    }

    fn spawn_error(&self, err: io::Error) -> SolverError {
        match err.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => SolverError::BinaryNotFound {
                path: self.glpsol_path.display().to_string(),
            },
            _ => SolverError::ProcessFailed(format!("glpsol 启动失败: {}", err)),
        }
    }
}

#[async_trait]
impl OptimizerPort for GlpsolOptimizer {
    fn name(&self) -> &'static str {
        "glpsol"
    }

    async fn submit(&self, job: OptimizerJob) -> Result<OptimizerReport, SolverError> {
        let stem = job.task.file_stem();
        let mut workspace = SolverWorkspace::create(&self.temp_dir)?;

        let model_path = workspace.write(&format!("{}.mod", stem), &job.model)?;
        let data_path = workspace.write(&format!("{}.dat", stem), &job.data)?;
        let solution_name = format!("{}.sol", stem);
        let solution_path = workspace.reserve(&solution_name);

        debug!(
            task = job.task.as_str(),
            workspace = %workspace.path().display(),
            time_limit_ms = job.time_limit.as_millis() as u64,
            "启动 glpsol"
        );

        let child = Command::new(&self.glpsol_path)
            .arg("--model")
            .arg(&model_path)
            .arg("--data")
            .arg(&data_path)
            .arg("--tmlim")
            .arg(Self::tmlim_secs(job.time_limit).to_string())
            .arg("--output")
            .arg(&solution_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        // 超时后 child 随 future 一并丢弃，kill_on_drop 终止子进程
        let output = match tokio::time::timeout(job.time_limit, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(SolverError::ProcessFailed(format!("glpsol 等待失败: {}", e)));
            }
            Err(_) => {
                warn!(task = job.task.as_str(), "glpsol 超时，已终止子进程");
                return Err(SolverError::Timeout {
                    task: job.task.as_str().to_string(),
                    limit_ms: job.time_limit.as_millis() as u64,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if let Some(err) = Self::classify_stdout(&job, &stdout) {
            return Err(err);
        }

        if !output.status.success() {
            let message = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(SolverError::ProcessFailed(format!(
                "glpsol 退出码 {:?}: {}",
                output.status.code(),
                message
            )));
        }

        let solution = workspace.read_output(&solution_name)?;

        Ok(OptimizerReport {
            solution,
            artifacts: workspace.into_artifacts(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn job() -> OptimizerJob {
        OptimizerJob {
            task: GlpkTask::MinSatisfaction,
            model: "end;".to_string(),
            data: "data;\nend;".to_string(),
            time_limit: Duration::from_millis(500),
        }
    }

    #[test]
    fn test_tmlim_rounds_up() {
        assert_eq!(GlpsolOptimizer::tmlim_secs(Duration::from_millis(500)), 1);
        assert_eq!(GlpsolOptimizer::tmlim_secs(Duration::from_millis(2100)), 3);
    }

    #[test]
    fn test_stdout_markers_classify_failures() {
        let lp_infeasible = "\
GLPK Integer Optimizer 5.0
Solving LP relaxation...
PROBLEM HAS NO PRIMAL FEASIBLE SOLUTION
Writing MIP solution to 'phase2.sol'...
";
        let err = GlpsolOptimizer::classify_stdout(&job(), lp_infeasible).unwrap();
        assert!(err.is_infeasible());

        let mip_infeasible = "+     3: mip =     not found yet >=              -inf\nPROBLEM HAS NO INTEGER FEASIBLE SOLUTION\n";
        assert!(GlpsolOptimizer::classify_stdout(&job(), mip_infeasible).unwrap().is_infeasible());

        let timed_out = "TIME LIMIT EXCEEDED; SEARCH TERMINATED\n";
        assert!(GlpsolOptimizer::classify_stdout(&job(), timed_out).unwrap().is_timeout());

        assert!(GlpsolOptimizer::classify_stdout(&job(), "INTEGER OPTIMAL SOLUTION FOUND\n").is_none());
    }

    #[tokio::test]
    async fn test_missing_binary_cleans_workspace() {
        let root = TempDir::new().unwrap();
        let optimizer = GlpsolOptimizer::new("/nonexistent/glpsol", root.path());

        let err = optimizer.submit(job()).await.unwrap_err();

        assert_eq!(err.reason_code(), "BINARY_NOT_FOUND");
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_unwritable_temp_dir() {
        let root = TempDir::new().unwrap();
        let optimizer = GlpsolOptimizer::new("/nonexistent/glpsol", root.path().join("missing"));

        let err = optimizer.submit(job()).await.unwrap_err();
        assert_eq!(err.reason_code(), "WORKSPACE_UNWRITABLE");
    }
}
