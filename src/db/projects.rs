//! Project lifecycle and membership.
//!
//! A project is one rooted tree: its root task shares the project's id. The
//! `project_locks` marker row is what mutations lock against.

use super::access::{must_have_access, role_of};
use super::activities::log_activity;
use super::locks::{Deadline, ensure_lock_row};
use super::mutator::validate_name;
use super::tasks::insert_task;
use super::{Database, new_id, now_ms};
use crate::error::{TreeError, TreeResult};
use crate::types::{Action, ItemType, Project, ProjectKey, Role, Task};
use rusqlite::{TransactionBehavior, params};
use tracing::info;

impl Database {
    /// Create a project owned by `actor`, with its root task.
    pub fn create_project(&self, actor: &str, name: &str, is_public: bool) -> TreeResult<Project> {
        validate_name(name)?;

        let id = new_id();
        let key = ProjectKey::new(actor, id.clone());
        let now = now_ms();
        let root = Task {
            id: id.clone(),
            parent: None,
            first_child: None,
            next_sibling: None,
            user: None,
            name: name.to_string(),
            description: None,
            created_by: actor.to_string(),
            created_on: now,
            minimum_time: 0,
            estimated_time: 0,
            logged_time: 0,
            estimated_expense: 0,
            logged_expense: 0,
            file_count: 0,
            file_size: 0,
            estimated_sub_time: 0,
            logged_sub_time: 0,
            estimated_sub_expense: 0,
            logged_sub_expense: 0,
            file_sub_count: 0,
            file_sub_size: 0,
            child_count: 0,
            descendant_count: 0,
            is_parallel: true,
        };

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO project_locks (host, id) VALUES (?1, ?2)",
                params![&key.host, &key.project],
            )?;
            tx.execute(
                "INSERT INTO projects (host, id, name, is_public, created_on) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![&key.host, &key.project, name, is_public, now],
            )?;
            tx.execute(
                "INSERT INTO project_users (host, project, id, role, is_active) VALUES (?1, ?2, ?3, ?4, 1)",
                params![&key.host, &key.project, actor, Role::Admin.as_i64()],
            )?;
            insert_task(&tx, &key, &root)?;
            log_activity(
                &tx,
                &key,
                actor,
                &id,
                ItemType::Project,
                Action::Created,
                Some(name),
                None,
            )?;

            tx.commit()?;
            Ok(())
        })?;

        info!(host = %key.host, project = %key.project, "project created");

        Ok(Project {
            host: key.host,
            id,
            name: name.to_string(),
            is_public,
            created_on: now,
            root,
        })
    }

    /// Delete a project and everything in it. Host only.
    pub fn delete_project(&self, key: &ProjectKey, actor: &str) -> TreeResult<()> {
        if actor != key.host {
            return Err(TreeError::forbidden("only the host may delete a project"));
        }

        let deadline = Deadline::after(self.settings.op_timeout);
        let _guard = self.locks.acquire(key, &deadline)?;

        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            ensure_lock_row(&tx, key)?;

            for sql in [
                "DELETE FROM tasks WHERE host = ?1 AND project = ?2",
                "DELETE FROM times WHERE host = ?1 AND project = ?2",
                "DELETE FROM expenses WHERE host = ?1 AND project = ?2",
                "DELETE FROM activities WHERE host = ?1 AND project = ?2",
                "DELETE FROM project_users WHERE host = ?1 AND project = ?2",
                "DELETE FROM projects WHERE host = ?1 AND id = ?2",
                "DELETE FROM project_locks WHERE host = ?1 AND id = ?2",
            ] {
                tx.execute(sql, params![&key.host, &key.project])?;
            }

            deadline.check()?;
            tx.commit()?;
            Ok(())
        })?;

        info!(host = %key.host, project = %key.project, "project deleted");
        Ok(())
    }

    /// Add a member or change their role. Admin only.
    pub fn add_project_user(
        &self,
        key: &ProjectKey,
        actor: &str,
        user: &str,
        role: Role,
    ) -> TreeResult<()> {
        if user == key.host {
            return Err(TreeError::invalid_value("user", "the host's role cannot be changed"));
        }

        self.with_conn(|conn| {
            must_have_access(conn, key, Some(actor), Role::Admin)?;
            ensure_lock_row(conn, key)?;
            conn.execute(
                "INSERT INTO project_users (host, project, id, role, is_active) VALUES (?1, ?2, ?3, ?4, 1)
                 ON CONFLICT (host, project, id) DO UPDATE SET role = excluded.role, is_active = 1",
                params![&key.host, &key.project, user, role.as_i64()],
            )?;
            Ok(())
        })?;

        info!(host = %key.host, project = %key.project, user, ?role, "project member set");
        Ok(())
    }

    /// The user's effective role on the project, if any.
    pub fn get_role(&self, key: &ProjectKey, user: &str) -> TreeResult<Option<Role>> {
        self.with_conn(|conn| role_of(conn, key, user))
    }
}
