// ==========================================
// 抽签分配引擎 - 应用层
// ==========================================
// 职责: 组合根，连接配置、引擎与执行服务
// ==========================================

pub mod state;

// 重导出
pub use state::{build_optimizer, build_solver, get_default_db_path, AppState};
