// ==========================================
// 抽签分配引擎 - 项目数据仓储
// ==========================================
// 对齐: family / family_preference / unit / unit_type 表
// 职责: 读取清单原始数据、执行前置校验所需的计数、写入分配结果
// ==========================================

use crate::domain::lottery::{AssignedUnit, TypeCountMismatch};
use crate::domain::types::{FamilyId, ProjectId, UnitId};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// 家庭记录（偏好按 rank 升序）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyRecord {
    pub family_id: FamilyId,
    pub unit_type_id: i64,
    pub preferences: Vec<UnitId>,
}

/// 住房单元记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitRecord {
    pub unit_id: UnitId,
    pub unit_type_id: i64,
    pub identifier: Option<String>,
    pub family_id: Option<FamilyId>,
}

// ==========================================
// ProjectRepository - 项目数据仓储
// ==========================================
pub struct ProjectRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ProjectRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 写入操作（基础数据）
    // ==========================================

    pub fn insert_unit_type(&self, project_id: ProjectId, unit_type_id: i64, name: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO unit_type (unit_type_id, project_id, name) VALUES (?1, ?2, ?3)",
            params![unit_type_id, project_id, name],
        )?;
        Ok(())
    }

    pub fn insert_family(&self, project_id: ProjectId, family: &FamilyRecord) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO family (family_id, project_id, unit_type_id) VALUES (?1, ?2, ?3)",
            params![family.family_id, project_id, family.unit_type_id],
        )?;
        for (idx, unit_id) in family.preferences.iter().enumerate() {
            tx.execute(
                "INSERT INTO family_preference (family_id, unit_id, rank) VALUES (?1, ?2, ?3)",
                params![family.family_id, unit_id, idx as i64 + 1],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn insert_unit(&self, project_id: ProjectId, unit: &UnitRecord) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO unit (unit_id, project_id, unit_type_id, identifier, family_id)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                unit.unit_id,
                project_id,
                unit.unit_type_id,
                unit.identifier,
                unit.family_id
            ],
        )?;
        Ok(())
    }

    // ==========================================
    // 查询操作
    // ==========================================

    /// 项目全部家庭（family_id 升序，偏好按 rank 升序）
    pub fn families(&self, project_id: ProjectId) -> RepositoryResult<Vec<FamilyRecord>> {
        let conn = self.get_conn()?;
        Self::families_in(&conn, project_id)
    }

    pub fn families_in(conn: &Connection, project_id: ProjectId) -> RepositoryResult<Vec<FamilyRecord>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT family_id, unit_type_id
            FROM family
            WHERE project_id = ?1
            ORDER BY family_id
            "#,
        )?;
        let mut families: BTreeMap<FamilyId, FamilyRecord> = stmt
            .query_map(params![project_id], |row| {
                Ok(FamilyRecord {
                    family_id: row.get(0)?,
                    unit_type_id: row.get(1)?,
                    preferences: Vec::new(),
                })
            })?
            .map(|r| r.map(|f| (f.family_id, f)))
            .collect::<Result<_, _>>()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT fp.family_id, fp.unit_id
            FROM family_preference fp
            JOIN family f ON f.family_id = fp.family_id
            WHERE f.project_id = ?1
            ORDER BY fp.family_id, fp.rank, fp.unit_id
            "#,
        )?;
        let rows = stmt.query_map(params![project_id], |row| {
            Ok((row.get::<_, FamilyId>(0)?, row.get::<_, UnitId>(1)?))
        })?;
        for row in rows {
            let (family_id, unit_id) = row?;
            if let Some(family) = families.get_mut(&family_id) {
                family.preferences.push(unit_id);
            }
        }

        Ok(families.into_values().collect())
    }

    /// 项目全部住房单元（unit_id 升序）
    pub fn units(&self, project_id: ProjectId) -> RepositoryResult<Vec<UnitRecord>> {
        let conn = self.get_conn()?;
        Self::units_in(&conn, project_id)
    }

    pub fn units_in(conn: &Connection, project_id: ProjectId) -> RepositoryResult<Vec<UnitRecord>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT unit_id, unit_type_id, identifier, family_id
            FROM unit
            WHERE project_id = ?1
            ORDER BY unit_id
            "#,
        )?;
        let units = stmt
            .query_map(params![project_id], |row| {
                Ok(UnitRecord {
                    unit_id: row.get(0)?,
                    unit_type_id: row.get(1)?,
                    identifier: row.get(2)?,
                    family_id: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(units)
    }

    /// 按类型分组的住房单元 id（组内升序）
    pub fn units_by_type_in(
        conn: &Connection,
        project_id: ProjectId,
    ) -> RepositoryResult<BTreeMap<i64, Vec<UnitId>>> {
        let mut grouped: BTreeMap<i64, Vec<UnitId>> = BTreeMap::new();
        for unit in Self::units_in(conn, project_id)? {
            grouped.entry(unit.unit_type_id).or_default().push(unit.unit_id);
        }
        Ok(grouped)
    }

    pub fn family_count_in(conn: &Connection, project_id: ProjectId) -> RepositoryResult<i64> {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM family WHERE project_id = ?1",
            params![project_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// 已分配住房单元数量
    pub fn assigned_unit_count_in(conn: &Connection, project_id: ProjectId) -> RepositoryResult<i64> {
        let count = conn.query_row(
            "SELECT COUNT(*) FROM unit WHERE project_id = ?1 AND family_id IS NOT NULL",
            params![project_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// 已分配住房单元（unit_id 升序）
    pub fn assigned_units(&self, project_id: ProjectId) -> RepositoryResult<Vec<AssignedUnit>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT unit_id, family_id
            FROM unit
            WHERE project_id = ?1 AND family_id IS NOT NULL
            ORDER BY unit_id
            "#,
        )?;
        let units = stmt
            .query_map(params![project_id], |row| {
                Ok(AssignedUnit {
                    unit_id: row.get(0)?,
                    family_id: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(units)
    }

    /// 各类型住房单元与家庭数量不一致的明细
    pub fn type_count_mismatches_in(
        conn: &Connection,
        project_id: ProjectId,
    ) -> RepositoryResult<Vec<TypeCountMismatch>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT ut.unit_type_id,
                   ut.name,
                   (SELECT COUNT(*) FROM unit u
                     WHERE u.unit_type_id = ut.unit_type_id AND u.project_id = ?1) AS units_count,
                   (SELECT COUNT(*) FROM family f
                     WHERE f.unit_type_id = ut.unit_type_id AND f.project_id = ?1) AS families_count
            FROM unit_type ut
            WHERE ut.project_id = ?1
            ORDER BY ut.unit_type_id
            "#,
        )?;
        let rows = stmt
            .query_map(params![project_id], |row| {
                Ok(TypeCountMismatch {
                    unit_type_id: row.get(0)?,
                    unit_type_name: row.get(1)?,
                    units_count: row.get(2)?,
                    families_count: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter(|m| m.units_count != m.families_count)
            .collect())
    }

    // ==========================================
    // 分配结果写入
    // ==========================================

    /// 写入分配结果
    ///
    /// # 返回
    /// - 写入的住房单元数量
    ///
    /// 目标单元已被占用或不属于本项目时返回 InvalidStateTransition，由调用方回滚事务
    pub fn apply_picks_in(
        conn: &Connection,
        project_id: ProjectId,
        picks: &BTreeMap<FamilyId, UnitId>,
    ) -> RepositoryResult<usize> {
        let mut stmt = conn.prepare(
            r#"
            UPDATE unit
            SET family_id = ?1
            WHERE unit_id = ?2 AND project_id = ?3 AND family_id IS NULL
            "#,
        )?;
        for (family_id, unit_id) in picks {
            let rows = stmt.execute(params![family_id, unit_id, project_id])?;
            if rows != 1 {
                return Err(RepositoryError::InvalidStateTransition {
                    from: format!("unit {} (已分配或不存在)", unit_id),
                    to: format!("family {}", family_id),
                });
            }
        }
        Ok(picks.len())
    }

    /// 清空项目全部分配
    pub fn clear_assignments_in(conn: &Connection, project_id: ProjectId) -> RepositoryResult<usize> {
        let rows = conn.execute(
            "UPDATE unit SET family_id = NULL WHERE project_id = ?1 AND family_id IS NOT NULL",
            params![project_id],
        )?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Arc<Mutex<Connection>>, ProjectRepository) {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        crate::db::ensure_schema(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));
        (conn.clone(), ProjectRepository::new(conn))
    }

    fn unit(unit_id: UnitId, unit_type_id: i64) -> UnitRecord {
        UnitRecord {
            unit_id,
            unit_type_id,
            identifier: Some(format!("U-{}", unit_id)),
            family_id: None,
        }
    }

    fn seed(repo: &ProjectRepository) {
        repo.insert_unit_type(1, 1, "2BR").unwrap();
        repo.insert_unit_type(1, 2, "3BR").unwrap();
        for (id, ty) in [(10, 1), (11, 1), (20, 2), (21, 2), (22, 2)] {
            repo.insert_unit(1, &unit(id, ty)).unwrap();
        }
        repo.insert_family(
            1,
            &FamilyRecord { family_id: 2, unit_type_id: 1, preferences: vec![11, 10] },
        )
        .unwrap();
        repo.insert_family(
            1,
            &FamilyRecord { family_id: 1, unit_type_id: 1, preferences: vec![10] },
        )
        .unwrap();
        repo.insert_family(
            1,
            &FamilyRecord { family_id: 3, unit_type_id: 2, preferences: vec![] },
        )
        .unwrap();
    }

    #[test]
    fn test_families_keep_preference_order() {
        let (_, repo) = setup();
        seed(&repo);

        let families = repo.families(1).unwrap();
        assert_eq!(families.len(), 3);
        assert_eq!(families[0].family_id, 1);
        assert_eq!(families[1].preferences, vec![11, 10]);
        assert!(families[2].preferences.is_empty());
    }

    #[test]
    fn test_type_count_mismatches() {
        let (conn, repo) = setup();
        seed(&repo);

        let guard = conn.lock().unwrap();
        let mismatches = ProjectRepository::type_count_mismatches_in(&guard, 1).unwrap();
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].unit_type_name, "3BR");
        assert_eq!(mismatches[0].units_count, 3);
        assert_eq!(mismatches[0].families_count, 1);
        assert!(mismatches[0].has_excess_units());
    }

    #[test]
    fn test_apply_and_clear_picks() {
        let (conn, repo) = setup();
        seed(&repo);

        let picks = BTreeMap::from([(1, 10), (2, 11)]);
        {
            let guard = conn.lock().unwrap();
            assert_eq!(ProjectRepository::apply_picks_in(&guard, 1, &picks).unwrap(), 2);
            assert_eq!(ProjectRepository::assigned_unit_count_in(&guard, 1).unwrap(), 2);
        }

        let assigned = repo.assigned_units(1).unwrap();
        assert_eq!(assigned, vec![
            AssignedUnit { unit_id: 10, family_id: 1 },
            AssignedUnit { unit_id: 11, family_id: 2 },
        ]);

        let guard = conn.lock().unwrap();
        assert_eq!(ProjectRepository::clear_assignments_in(&guard, 1).unwrap(), 2);
        assert_eq!(ProjectRepository::assigned_unit_count_in(&guard, 1).unwrap(), 0);
    }

    #[test]
    fn test_apply_picks_rejects_taken_unit() {
        let (conn, repo) = setup();
        seed(&repo);

        let guard = conn.lock().unwrap();
        ProjectRepository::apply_picks_in(&guard, 1, &BTreeMap::from([(1, 10)])).unwrap();
        let err = ProjectRepository::apply_picks_in(&guard, 1, &BTreeMap::from([(2, 10)])).unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_units_by_type() {
        let (conn, repo) = setup();
        seed(&repo);

        let guard = conn.lock().unwrap();
        let grouped = ProjectRepository::units_by_type_in(&guard, 1).unwrap();
        assert_eq!(grouped[&1], vec![10, 11]);
        assert_eq!(grouped[&2], vec![20, 21, 22]);
        assert_eq!(ProjectRepository::family_count_in(&guard, 1).unwrap(), 3);
    }
}
