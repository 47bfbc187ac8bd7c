// ==========================================
// 抽签分配引擎 - 求解器临时工作区
// ==========================================
// 每次求解调用独占一个临时目录，Drop 时整体删除
// 写入的文件内容同时保存为审计产物（文件名 → 内容）
// ==========================================

use crate::engine::error::SolverError;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// 工作区目录名前缀
pub const WORKSPACE_PREFIX: &str = "lottery_glpk_";

/// 求解器临时工作区
#[derive(Debug)]
pub struct SolverWorkspace {
    dir: TempDir,
    artifacts: BTreeMap<String, String>,
}

impl SolverWorkspace {
    /// 在指定目录下创建工作区
    ///
    /// # 错误
    /// 目录不存在或不可写时返回 `WorkspaceUnwritable`
    pub fn create(temp_dir: &Path) -> Result<Self, SolverError> {
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(temp_dir)
            .map_err(|e| SolverError::WorkspaceUnwritable {
                path: temp_dir.display().to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            dir,
            artifacts: BTreeMap::new(),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// 写入文件并记录产物
    pub fn write(&mut self, file_name: &str, content: &str) -> Result<PathBuf, SolverError> {
        let path = self.dir.path().join(file_name);
        fs::write(&path, content).map_err(|e| SolverError::WorkspaceUnwritable {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        self.artifacts.insert(file_name.to_string(), content.to_string());
        Ok(path)
    }

    /// 预留输出文件路径（不创建文件）
    pub fn reserve(&self, file_name: &str) -> PathBuf {
        self.dir.path().join(file_name)
    }

    /// 读取求解器输出文件并记录产物
    ///
    /// # 错误
    /// 文件缺失或为空时返回 `Unparseable`
    pub fn read_output(&mut self, file_name: &str) -> Result<String, SolverError> {
        let path = self.dir.path().join(file_name);
        let content = fs::read_to_string(&path)
            .map_err(|e| SolverError::Unparseable(format!("求解器未生成解文件: {}", e)))?;

        if content.trim().is_empty() {
            return Err(SolverError::Unparseable("求解器生成的解文件为空".to_string()));
        }

        self.artifacts.insert(file_name.to_string(), content.clone());
        Ok(content)
    }

    /// 已记录的产物
    pub fn artifacts(&self) -> &BTreeMap<String, String> {
        &self.artifacts
    }

    pub fn into_artifacts(self) -> BTreeMap<String, String> {
        self.artifacts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_count(dir: &Path) -> usize {
        fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_workspace_is_removed_on_drop() {
        let root = TempDir::new().unwrap();
        {
            let mut ws = SolverWorkspace::create(root.path()).unwrap();
            ws.write("phase1.mod", "end;").unwrap();
            assert_eq!(entry_count(root.path()), 1);
            assert!(ws.path().join("phase1.mod").exists());
        }
        assert_eq!(entry_count(root.path()), 0);
    }

    #[test]
    fn test_missing_temp_dir_is_unwritable() {
        let root = TempDir::new().unwrap();
        let missing = root.path().join("does-not-exist");
        let err = SolverWorkspace::create(&missing).unwrap_err();
        assert_eq!(err.reason_code(), "WORKSPACE_UNWRITABLE");
    }

    #[test]
    fn test_read_output_records_artifact() {
        let root = TempDir::new().unwrap();
        let mut ws = SolverWorkspace::create(root.path()).unwrap();

        assert_eq!(ws.read_output("phase1.sol").unwrap_err().reason_code(), "UNPARSEABLE");

        fs::write(ws.reserve("phase1.sol"), "Objective: resultado = 2").unwrap();
        let content = ws.read_output("phase1.sol").unwrap();
        assert!(content.contains("resultado"));
        assert!(ws.artifacts().contains_key("phase1.sol"));
    }
}
