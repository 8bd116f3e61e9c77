//! Application database: users, workspaces, memberships, projects, tasks.
//!
//! Every write is a single statement, except workspace creation which inserts
//! the workspace and its owner membership in one transaction.

use chrono::{DateTime, Utc};
use pmsync_core::error::{Result, SyncError};
use pmsync_core::types::{
    Assignee, MemberRole, Project, Task, TaskDetail, TaskStatus, User, Workspace, WorkspaceMember,
};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Application record store.
pub struct AppDb {
    conn: Mutex<Connection>,
}

/// Map a SQLite failure onto the store's error taxonomy.
fn store_err(context: &str, e: rusqlite::Error) -> SyncError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation => {
            SyncError::Conflict(format!("{context}: {e}"))
        }
        _ => SyncError::StoreUnavailable(format!("{context}: {e}")),
    }
}

/// Zero affected rows on a keyed write means the record is absent.
fn expect_row(affected: usize, entity: &'static str, id: &str) -> Result<()> {
    if affected == 0 {
        Err(SyncError::not_found(entity, id))
    } else {
        Ok(())
    }
}

/// A stored value outside its domain; `store_err` reports it as store unavailable.
fn corrupt(column: usize, detail: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, detail.into())
}

fn parse_ts(column: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| corrupt(column, format!("bad timestamp '{s}': {e}")))
    })
    .transpose()
}

const TASK_DETAIL_SELECT: &str = "SELECT t.id, t.project_id, t.title, t.description, t.status, t.due_date, t.assignee_id,
        u.name, u.email, p.workspace_id, p.name
    FROM tasks t
    JOIN users u ON u.id = t.assignee_id
    JOIN projects p ON p.id = t.project_id
    WHERE t.id = ?1";

fn row_to_task_detail(row: &rusqlite::Row) -> rusqlite::Result<TaskDetail> {
    let status: String = row.get(4)?;
    let task = Task {
        id: row.get(0)?,
        project_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        status: TaskStatus::parse(&status)
            .ok_or_else(|| corrupt(4, format!("unknown task status '{status}'")))?,
        due_date: parse_ts(5, row.get(5)?)?,
        assignee_id: row.get(6)?,
    };
    let assignee = Assignee {
        id: task.assignee_id.clone(),
        name: row.get(7)?,
        email: row.get(8)?,
    };
    let project = Project {
        id: task.project_id.clone(),
        workspace_id: row.get(9)?,
        name: row.get(10)?,
    };
    Ok(TaskDetail {
        task,
        assignee,
        project,
    })
}

impl AppDb {
    /// Open or create the application database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| store_err("DB open", e))?;
        // WAL keeps readers off the writer's back when the gateway and tick loop share the file
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        Self::init(conn)
    }

    /// In-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| store_err("DB open", e))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| store_err("Enable foreign keys", e))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| SyncError::StoreUnavailable(format!("Lock: {e}")))
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT,
                name TEXT NOT NULL DEFAULT '',
                image TEXT,
                created_at TEXT DEFAULT (datetime('now')),
                updated_at TEXT DEFAULT (datetime('now'))
            );

            -- owner_id is informational; ownership is expressed by the ADMIN membership
            CREATE TABLE IF NOT EXISTS workspaces (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                slug TEXT NOT NULL DEFAULT '',
                owner_id TEXT NOT NULL,
                image_url TEXT,
                created_at TEXT DEFAULT (datetime('now')),
                updated_at TEXT DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS workspace_members (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
                role TEXT NOT NULL DEFAULT 'MEMBER',
                created_at TEXT DEFAULT (datetime('now')),
                UNIQUE (user_id, workspace_id)
            );

            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                workspace_id TEXT NOT NULL REFERENCES workspaces(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                created_at TEXT DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'TODO',
                due_date TEXT,                    -- RFC3339, NULL = no due date
                assignee_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at TEXT DEFAULT (datetime('now')),
                updated_at TEXT DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_members_workspace ON workspace_members(workspace_id);
            CREATE INDEX IF NOT EXISTS idx_tasks_assignee ON tasks(assignee_id);
        ",
        )
        .map_err(|e| store_err("Migration", e))?;
        Ok(())
    }

    // ─── Users ──────────────────────────────────────

    pub fn create_user(&self, user: &User) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO users (id, email, name, image) VALUES (?1, ?2, ?3, ?4)",
            params![user.id, user.email, user.name, user.image],
        )
        .map_err(|e| store_err("Create user", e))?;
        tracing::debug!("user created: {}", user.id);
        Ok(())
    }

    /// Overwrite email, name and image of an existing user.
    pub fn update_user(&self, user: &User) -> Result<()> {
        let conn = self.lock()?;
        let affected = conn
            .execute(
                "UPDATE users SET email = ?1, name = ?2, image = ?3, updated_at = datetime('now')
                 WHERE id = ?4",
                params![user.email, user.name, user.image, user.id],
            )
            .map_err(|e| store_err("Update user", e))?;
        expect_row(affected, "user", &user.id)
    }

    pub fn delete_user(&self, id: &str) -> Result<()> {
        let conn = self.lock()?;
        let affected = conn
            .execute("DELETE FROM users WHERE id = ?1", [id])
            .map_err(|e| store_err("Delete user", e))?;
        expect_row(affected, "user", id)
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, email, name, image FROM users WHERE id = ?1",
            [id],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    name: row.get(2)?,
                    image: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(|e| store_err("Get user", e))
    }

    // ─── Workspaces ──────────────────────────────────────

    /// Insert a workspace and its owner's ADMIN membership atomically.
    ///
    /// If the membership insert fails the workspace insert is rolled back.
    pub fn create_workspace_with_owner(&self, workspace: &Workspace) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| store_err("Begin workspace tx", e))?;
        tx.execute(
            "INSERT INTO workspaces (id, name, slug, owner_id, image_url) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                workspace.id,
                workspace.name,
                workspace.slug,
                workspace.owner_id,
                workspace.image_url
            ],
        )
        .map_err(|e| store_err("Create workspace", e))?;
        tx.execute(
            "INSERT INTO workspace_members (user_id, workspace_id, role) VALUES (?1, ?2, ?3)",
            params![workspace.owner_id, workspace.id, MemberRole::Admin.as_str()],
        )
        .map_err(|e| store_err("Add workspace owner", e))?;
        tx.commit().map_err(|e| store_err("Commit workspace tx", e))?;
        tracing::debug!("workspace created: {} (owner {})", workspace.id, workspace.owner_id);
        Ok(())
    }

    /// Overwrite name, slug and image of an existing workspace.
    pub fn update_workspace(
        &self,
        id: &str,
        name: &str,
        slug: &str,
        image_url: Option<&str>,
    ) -> Result<()> {
        let conn = self.lock()?;
        let affected = conn
            .execute(
                "UPDATE workspaces SET name = ?1, slug = ?2, image_url = ?3, updated_at = datetime('now')
                 WHERE id = ?4",
                params![name, slug, image_url, id],
            )
            .map_err(|e| store_err("Update workspace", e))?;
        expect_row(affected, "workspace", id)
    }

    /// Delete a workspace; members, projects and tasks cascade.
    pub fn delete_workspace(&self, id: &str) -> Result<()> {
        let conn = self.lock()?;
        let affected = conn
            .execute("DELETE FROM workspaces WHERE id = ?1", [id])
            .map_err(|e| store_err("Delete workspace", e))?;
        expect_row(affected, "workspace", id)
    }

    pub fn get_workspace(&self, id: &str) -> Result<Option<Workspace>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, name, slug, owner_id, image_url FROM workspaces WHERE id = ?1",
            [id],
            |row| {
                Ok(Workspace {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    slug: row.get(2)?,
                    owner_id: row.get(3)?,
                    image_url: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(|e| store_err("Get workspace", e))
    }

    // ─── Members ──────────────────────────────────────

    pub fn add_workspace_member(
        &self,
        user_id: &str,
        workspace_id: &str,
        role: MemberRole,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO workspace_members (user_id, workspace_id, role) VALUES (?1, ?2, ?3)",
            params![user_id, workspace_id, role.as_str()],
        )
        .map_err(|e| store_err("Add workspace member", e))?;
        tracing::debug!("member added: {user_id} → {workspace_id} as {role}");
        Ok(())
    }

    pub fn list_workspace_members(&self, workspace_id: &str) -> Result<Vec<WorkspaceMember>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, user_id, workspace_id, role FROM workspace_members
                 WHERE workspace_id = ?1 ORDER BY id",
            )
            .map_err(|e| store_err("List members", e))?;
        let rows = stmt
            .query_map([workspace_id], |row| {
                let role: String = row.get(3)?;
                Ok(WorkspaceMember {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    workspace_id: row.get(2)?,
                    role: MemberRole::parse(&role)
                        .ok_or_else(|| corrupt(3, format!("unknown member role '{role}'")))?,
                })
            })
            .map_err(|e| store_err("List members", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| store_err("List members", e))
    }

    // ─── Projects & Tasks ──────────────────────────────────────

    pub fn create_project(&self, project: &Project) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO projects (id, workspace_id, name) VALUES (?1, ?2, ?3)",
            params![project.id, project.workspace_id, project.name],
        )
        .map_err(|e| store_err("Create project", e))?;
        Ok(())
    }

    pub fn create_task(&self, task: &Task) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO tasks (id, project_id, title, description, status, due_date, assignee_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                task.id,
                task.project_id,
                task.title,
                task.description,
                task.status.as_str(),
                task.due_date.map(|d| d.to_rfc3339()),
                task.assignee_id,
            ],
        )
        .map_err(|e| store_err("Create task", e))?;
        Ok(())
    }

    pub fn set_task_status(&self, id: &str, status: TaskStatus) -> Result<()> {
        let conn = self.lock()?;
        let affected = conn
            .execute(
                "UPDATE tasks SET status = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![status.as_str(), id],
            )
            .map_err(|e| store_err("Set task status", e))?;
        expect_row(affected, "task", id)
    }

    pub fn delete_task(&self, id: &str) -> Result<()> {
        let conn = self.lock()?;
        let affected = conn
            .execute("DELETE FROM tasks WHERE id = ?1", [id])
            .map_err(|e| store_err("Delete task", e))?;
        expect_row(affected, "task", id)
    }

    /// Load a task joined with its assignee and project. `None` if the task is gone.
    pub fn find_task_detail(&self, task_id: &str) -> Result<Option<TaskDetail>> {
        let conn = self.lock()?;
        conn.query_row(TASK_DETAIL_SELECT, [task_id], row_to_task_detail)
            .optional()
            .map_err(|e| store_err("Find task", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> User {
        User {
            id: id.into(),
            email: Some(format!("{id}@example.com")),
            name: "Ada Lovelace".into(),
            image: None,
        }
    }

    fn workspace(id: &str, owner: &str) -> Workspace {
        Workspace {
            id: id.into(),
            name: "Acme".into(),
            slug: "acme".into(),
            owner_id: owner.into(),
            image_url: None,
        }
    }

    #[test]
    fn test_user_crud() {
        let db = AppDb::open_in_memory().unwrap();
        db.create_user(&user("u1")).unwrap();

        let mut updated = user("u1");
        updated.name = "Grace Hopper".into();
        db.update_user(&updated).unwrap();
        assert_eq!(db.get_user("u1").unwrap().unwrap().name, "Grace Hopper");

        db.delete_user("u1").unwrap();
        assert!(db.get_user("u1").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_user_is_conflict() {
        let db = AppDb::open_in_memory().unwrap();
        db.create_user(&user("u1")).unwrap();
        let err = db.create_user(&user("u1")).unwrap_err();
        assert!(matches!(err, SyncError::Conflict(_)), "got {err:?}");
    }

    #[test]
    fn test_missing_rows_are_not_found() {
        let db = AppDb::open_in_memory().unwrap();
        assert!(db.delete_user("ghost").unwrap_err().is_not_found());
        assert!(db.update_user(&user("ghost")).unwrap_err().is_not_found());
        assert!(db.delete_workspace("ghost").unwrap_err().is_not_found());
        assert!(
            db.update_workspace("ghost", "n", "s", None)
                .unwrap_err()
                .is_not_found()
        );
    }

    #[test]
    fn test_workspace_with_owner_adds_admin() {
        let db = AppDb::open_in_memory().unwrap();
        db.create_user(&user("u1")).unwrap();
        db.create_workspace_with_owner(&workspace("w1", "u1")).unwrap();

        let members = db.list_workspace_members("w1").unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].user_id, "u1");
        assert_eq!(members[0].role, MemberRole::Admin);
    }

    #[test]
    fn test_workspace_rolls_back_when_owner_membership_fails() {
        let db = AppDb::open_in_memory().unwrap();
        // owner not synced yet → membership FK fails
        let err = db
            .create_workspace_with_owner(&workspace("w1", "missing"))
            .unwrap_err();
        assert!(matches!(err, SyncError::Conflict(_)), "got {err:?}");
        assert!(db.get_workspace("w1").unwrap().is_none());
    }

    #[test]
    fn test_delete_workspace_cascades_members() {
        let db = AppDb::open_in_memory().unwrap();
        db.create_user(&user("u1")).unwrap();
        db.create_user(&user("u2")).unwrap();
        db.create_workspace_with_owner(&workspace("w1", "u1")).unwrap();
        db.add_workspace_member("u2", "w1", MemberRole::Member).unwrap();

        db.delete_workspace("w1").unwrap();
        assert!(db.list_workspace_members("w1").unwrap().is_empty());
    }

    #[test]
    fn test_task_detail_join() {
        let db = AppDb::open_in_memory().unwrap();
        db.create_user(&user("u1")).unwrap();
        db.create_workspace_with_owner(&workspace("w1", "u1")).unwrap();
        db.create_project(&Project {
            id: "p1".into(),
            workspace_id: "w1".into(),
            name: "Launch".into(),
        })
        .unwrap();
        let due = Utc::now();
        db.create_task(&Task {
            id: "t1".into(),
            project_id: "p1".into(),
            title: "Write docs".into(),
            description: "All of them".into(),
            status: TaskStatus::InProgress,
            due_date: Some(due),
            assignee_id: "u1".into(),
        })
        .unwrap();

        let detail = db.find_task_detail("t1").unwrap().unwrap();
        assert_eq!(detail.project.name, "Launch");
        assert_eq!(detail.assignee.email.as_deref(), Some("u1@example.com"));
        assert_eq!(detail.task.status, TaskStatus::InProgress);
        assert_eq!(detail.task.due_date.map(|d| d.timestamp()), Some(due.timestamp()));

        db.set_task_status("t1", TaskStatus::Done).unwrap();
        assert_eq!(
            db.find_task_detail("t1").unwrap().unwrap().task.status,
            TaskStatus::Done
        );

        db.delete_task("t1").unwrap();
        assert!(db.find_task_detail("t1").unwrap().is_none());
    }

    #[test]
    fn test_unknown_stored_values_are_errors() {
        let db = AppDb::open_in_memory().unwrap();
        db.create_user(&user("u1")).unwrap();
        db.create_workspace_with_owner(&workspace("w1", "u1")).unwrap();
        db.create_project(&Project {
            id: "p1".into(),
            workspace_id: "w1".into(),
            name: "Launch".into(),
        })
        .unwrap();
        db.create_task(&Task {
            id: "t1".into(),
            project_id: "p1".into(),
            title: "Write docs".into(),
            description: String::new(),
            status: TaskStatus::Todo,
            due_date: None,
            assignee_id: "u1".into(),
        })
        .unwrap();

        let raw = |sql: &str| db.lock().unwrap().execute(sql, []).unwrap();
        raw("UPDATE tasks SET status = 'ARCHIVED' WHERE id = 't1'");
        let err = db.find_task_detail("t1").unwrap_err();
        assert!(matches!(err, SyncError::StoreUnavailable(_)), "got {err:?}");
        assert!(err.to_string().contains("ARCHIVED"));

        raw("UPDATE tasks SET status = 'TODO', due_date = 'next friday' WHERE id = 't1'");
        assert!(db.find_task_detail("t1").is_err());

        raw("UPDATE workspace_members SET role = 'OWNER' WHERE user_id = 'u1'");
        let err = db.list_workspace_members("w1").unwrap_err();
        assert!(matches!(err, SyncError::StoreUnavailable(_)), "got {err:?}");
    }
}
