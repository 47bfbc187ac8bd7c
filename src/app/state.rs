// ==========================================
// 抽签分配引擎 - 应用状态（组合根）
// ==========================================
// 职责: 打开数据库、读取配置、注入求解策略，组装执行服务
// 约束: 求解策略只在此处选择，引擎内部不读取配置
// ==========================================

use std::sync::Arc;

use crate::api::ExecutionService;
use crate::config::{ConfigManager, LotteryConfig, OptimizerKind, SolverKind};
use crate::engine::glpk::{Glpk, GlpsolOptimizer, InMemoryOptimizer, OptimizerPort};
use crate::engine::orchestrator::LotteryOrchestrator;
use crate::engine::solver::{GlpkSolver, GreedySolver, RandomSolver, Solver, TestSolver};

/// 数据库路径环境变量
pub const DB_PATH_ENV: &str = "LOTTERY_ENGINE_DB_PATH";

/// 应用状态
///
/// 包含共享配置与执行服务
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 生效的抽签配置
    pub config: LotteryConfig,

    /// 配置管理器
    pub config_manager: Arc<ConfigManager>,

    /// 抽签执行服务
    pub execution_service: Arc<ExecutionService>,
}

impl AppState {
    /// 创建新的AppState实例（配置取自 config_kv）
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    ///
    /// # 返回
    /// - Ok(AppState): 应用状态实例
    /// - Err(String): 初始化错误
    pub fn new(db_path: String) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let conn = crate::db::open_shared_connection(&db_path)
            .map_err(|e| format!("无法打开数据库: {}", e))?;
        let config_manager = ConfigManager::from_connection(conn);
        let config = config_manager
            .load_lottery_config()
            .map_err(|e| format!("无法读取抽签配置: {}", e))?;

        Self::assemble(db_path, config, config_manager)
    }

    /// 使用显式配置创建AppState（忽略 config_kv 中的抽签配置）
    pub fn with_config(db_path: String, config: LotteryConfig) -> Result<Self, String> {
        config
            .validate()
            .map_err(|e| format!("抽签配置无效: {}", e))?;

        let conn = crate::db::open_shared_connection(&db_path)
            .map_err(|e| format!("无法打开数据库: {}", e))?;
        let config_manager = ConfigManager::from_connection(conn);

        Self::assemble(db_path, config, config_manager)
    }

    fn assemble(
        db_path: String,
        config: LotteryConfig,
        config_manager: ConfigManager,
    ) -> Result<Self, String> {
        let conn = config_manager.connection();

        let snapshot = config_manager
            .get_config_snapshot()
            .map_err(|e| format!("无法读取配置快照: {}", e))?;
        let snapshot = serde_json::from_str(&snapshot)
            .map_err(|e| format!("配置快照格式错误: {}", e))?;

        let solver = build_solver(&config);
        let orchestrator = Arc::new(LotteryOrchestrator::new(
            solver,
            config.redistribute_orphans,
        ));
        let execution_service = Arc::new(ExecutionService::new(
            conn,
            orchestrator,
            config.dispatch_mode,
            snapshot,
        ));

        tracing::info!(
            solver = config.solver.as_str(),
            optimizer = config.optimizer.as_str(),
            dispatch = config.dispatch_mode.as_str(),
            "AppState初始化完成"
        );

        Ok(Self {
            db_path,
            config,
            config_manager: Arc::new(config_manager),
            execution_service,
        })
    }
}

/// 按配置构建求解策略
pub fn build_solver(config: &LotteryConfig) -> Arc<dyn Solver> {
    match config.solver {
        SolverKind::Glpk => {
            let glpk = Glpk::new(build_optimizer(config), config.glpk_settings());
            Arc::new(GlpkSolver::new(glpk))
        }
        SolverKind::Greedy => Arc::new(GreedySolver),
        SolverKind::Random => Arc::new(RandomSolver::new()),
        SolverKind::Test => Arc::new(TestSolver),
    }
}

/// 按配置构建 GLPK 优化器
pub fn build_optimizer(config: &LotteryConfig) -> Arc<dyn OptimizerPort> {
    match config.optimizer {
        OptimizerKind::Glpsol => Arc::new(GlpsolOptimizer::new(
            config.glpsol_path.clone(),
            config.temp_dir.clone(),
        )),
        OptimizerKind::InMemory => Arc::new(InMemoryOptimizer::new()),
    }
}

/// 获取默认数据库路径
///
/// # 返回
/// - 环境变量 LOTTERY_ENGINE_DB_PATH（若设置）
/// - 否则: 用户数据目录/lottery-engine/lottery.db
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./lottery.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("lottery-engine");
        // 目录创建失败时回退到当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("lottery.db");
        }
    }

    path.to_string_lossy().to_string()
}
