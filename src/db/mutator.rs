//! Create, move/update and delete of tasks.
//!
//! Every structural mutation follows the same discipline: check inputs and
//! roles first, take the project lock, open a transaction, load the nodes to
//! edit into a [`Workset`], relink pointers there, write the touched rows in
//! one batch, log activity, recompute the affected ancestor chains and
//! commit. Any error drops the transaction (rolling it back) and then the
//! lock guard.

use super::access::{must_get_role, must_have_access};
use super::activities::{log_activity, mark_items_deleted, rename_item};
use super::aggregates::recalculate_chain;
use super::ancestry::{descendant_ids, is_ancestor_of};
use super::entries::delete_entries_for;
use super::locks::{Deadline, ProjectLockGuard, ensure_lock_row};
use super::tasks::{delete_rows, get_one, get_previous_sibling, insert_task, must_get_one, save_task};
use super::{Database, new_id, now_ms};
use crate::error::{TreeError, TreeResult};
use crate::types::{Action, CreateTask, ItemType, ProjectKey, Role, Task, UpdateTask};
use rusqlite::{Connection, TransactionBehavior};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use tracing::{debug, info};

pub const NAME_MIN_LEN: usize = 1;
pub const NAME_MAX_LEN: usize = 250;
pub const DESCRIPTION_MIN_LEN: usize = 1;
pub const DESCRIPTION_MAX_LEN: usize = 1250;

fn validate_len(field: &str, value: &str, min: usize, max: usize) -> TreeResult<()> {
    if value.is_empty() && min > 0 {
        return Err(TreeError::missing_field(field));
    }
    let len = value.chars().count();
    if len < min || len > max {
        return Err(TreeError::invalid_value(
            field,
            format!("{} must be between {} and {} characters", field, min, max),
        ));
    }
    Ok(())
}

pub(crate) fn validate_name(name: &str) -> TreeResult<()> {
    validate_len("name", name, NAME_MIN_LEN, NAME_MAX_LEN)
}

fn validate_description(description: &str) -> TreeResult<()> {
    validate_len(
        "description",
        description,
        DESCRIPTION_MIN_LEN,
        DESCRIPTION_MAX_LEN,
    )
}

pub(crate) fn validate_amount(field: &str, value: i64) -> TreeResult<()> {
    if value < 0 {
        return Err(TreeError::invalid_value(field, format!("{} must not be negative", field)));
    }
    Ok(())
}

/// An empty description is stored as no description.
fn normalize_description(description: Option<String>) -> Option<String> {
    description.filter(|d| !d.is_empty())
}

/// Fail with `AssigneeLacksAccess` unless the assignee is the actor or can write.
fn check_assignee(conn: &Connection, key: &ProjectKey, actor: &str, user: &str) -> TreeResult<()> {
    if user == actor {
        return Ok(());
    }
    must_have_access(conn, key, Some(user), Role::Writer)
        .map_err(|_| TreeError::assignee_lacks_access(user))
}

/// Nodes loaded for one structural edit, written back as one batch.
struct Workset<'a> {
    conn: &'a Connection,
    key: &'a ProjectKey,
    nodes: HashMap<String, Task>,
    dirty: Vec<String>,
}

impl<'a> Workset<'a> {
    fn new(conn: &'a Connection, key: &'a ProjectKey) -> Self {
        Self {
            conn,
            key,
            nodes: HashMap::new(),
            dirty: Vec::new(),
        }
    }

    /// Load a node if not already held. Returns whether it exists.
    fn fetch(&mut self, id: &str) -> TreeResult<bool> {
        if self.nodes.contains_key(id) {
            return Ok(true);
        }
        match get_one(self.conn, self.key, id)? {
            Some(task) => {
                self.nodes.insert(id.to_string(), task);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn get(&self, id: &str) -> TreeResult<&Task> {
        self.nodes
            .get(id)
            .ok_or_else(|| TreeError::internal(format!("task {} not loaded", id)))
    }

    /// Mutable access; marks the node for writing.
    fn get_mut(&mut self, id: &str) -> TreeResult<&mut Task> {
        if !self.dirty.iter().any(|d| d == id) {
            self.dirty.push(id.to_string());
        }
        self.nodes
            .get_mut(id)
            .ok_or_else(|| TreeError::internal(format!("task {} not loaded", id)))
    }

    /// Load and validate a prospective previous sibling for `task` under `parent`.
    fn check_sibling(&mut self, sibling: &str, parent: &str, task: &str) -> TreeResult<()> {
        if sibling == task {
            return Err(TreeError::invalid_value(
                "previous_sibling",
                "a task cannot be its own previous sibling",
            ));
        }
        if !self.fetch(sibling)? {
            return Err(TreeError::previous_sibling_not_found(sibling));
        }
        if self.get(sibling)?.parent.as_deref() != Some(parent) {
            return Err(TreeError::sibling_parent_mismatch(sibling, parent));
        }
        Ok(())
    }

    /// Unlink `id` from its parent's sibling chain.
    ///
    /// Finds the previous sibling in storage, so it must run before any
    /// pointer edits in this workset.
    fn detach(&mut self, id: &str) -> TreeResult<()> {
        if !self.dirty.is_empty() {
            return Err(TreeError::internal("detach after pointer edits"));
        }
        let (parent, next) = {
            let task = self.get(id)?;
            (task.parent.clone(), task.next_sibling.clone())
        };
        let parent = parent
            .ok_or_else(|| TreeError::internal(format!("task {} has no parent", id)))?;

        match get_previous_sibling(self.conn, self.key, id)? {
            Some(prev) => {
                self.fetch(&prev.id)?;
                self.get_mut(&prev.id)?.next_sibling = next;
            }
            None => {
                if !self.fetch(&parent)? {
                    return Err(TreeError::internal(format!("parent {} of {} is missing", parent, id)));
                }
                let parent_task = self.get_mut(&parent)?;
                if parent_task.first_child.as_deref() != Some(id) {
                    return Err(TreeError::internal(format!(
                        "task {} is neither a first child nor anyone's next sibling",
                        id
                    )));
                }
                parent_task.first_child = next;
            }
        }

        self.get_mut(id)?.next_sibling = None;
        Ok(())
    }

    /// Link `id` under `parent`, after `prev` or as the first child.
    /// `prev` must already be loaded via `check_sibling`.
    fn attach(&mut self, id: &str, parent: &str, prev: Option<&str>) -> TreeResult<()> {
        let next = match prev {
            Some(prev) => {
                let prev_task = self.get_mut(prev)?;
                prev_task.next_sibling.replace(id.to_string())
            }
            None => {
                if !self.fetch(parent)? {
                    return Err(TreeError::parent_not_found(parent));
                }
                let parent_task = self.get_mut(parent)?;
                parent_task.first_child.replace(id.to_string())
            }
        };

        let task = self.get_mut(id)?;
        task.parent = Some(parent.to_string());
        task.next_sibling = next;
        Ok(())
    }

    /// Write every touched node.
    fn flush(&self) -> TreeResult<usize> {
        for id in &self.dirty {
            save_task(self.conn, self.key, self.get(id)?)?;
        }
        Ok(self.dirty.len())
    }
}

impl Database {
    fn lock_project(&self, key: &ProjectKey, deadline: &Deadline) -> TreeResult<ProjectLockGuard<'_>> {
        self.locks.acquire(key, deadline)
    }

    /// Create a task under `req.parent`, after `req.previous_sibling` or as
    /// the first child.
    pub fn create_task(&self, key: &ProjectKey, actor: &str, req: CreateTask) -> TreeResult<Task> {
        validate_name(&req.name)?;
        let description = normalize_description(req.description);
        if let Some(ref d) = description {
            validate_description(d)?;
        }
        validate_amount("estimated_time", req.estimated_time)?;
        validate_amount("estimated_expense", req.estimated_expense)?;

        self.with_conn(|conn| {
            must_have_access(conn, key, Some(actor), Role::Writer)?;
            if let Some(ref user) = req.user {
                check_assignee(conn, key, actor, user)?;
            }
            Ok(())
        })?;

        let deadline = Deadline::after(self.settings.op_timeout);
        let _guard = self.lock_project(key, &deadline)?;
        let max_steps = self.settings.max_traversal;

        let task = self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            ensure_lock_row(&tx, key)?;

            let id = new_id();
            let mut ws = Workset::new(&tx, key);
            if !ws.fetch(&req.parent)? {
                return Err(TreeError::parent_not_found(&req.parent));
            }
            if let Some(ref prev) = req.previous_sibling {
                ws.check_sibling(prev, &req.parent, &id)?;
            }

            let task = Task {
                id: id.clone(),
                parent: Some(req.parent.clone()),
                first_child: None,
                next_sibling: None,
                user: req.user.clone(),
                name: req.name.clone(),
                description: description.clone(),
                created_by: actor.to_string(),
                created_on: now_ms(),
                minimum_time: req.estimated_time,
                estimated_time: req.estimated_time,
                logged_time: 0,
                estimated_expense: req.estimated_expense,
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
                is_parallel: req.is_parallel,
            };
            insert_task(&tx, key, &task)?;
            ws.fetch(&id)?;
            ws.attach(&id, &req.parent, req.previous_sibling.as_deref())?;
            ws.flush()?;
            deadline.check()?;

            recalculate_chain(&tx, key, &req.parent, max_steps)?;
            log_activity(
                &tx,
                key,
                actor,
                &id,
                ItemType::Task,
                Action::Created,
                Some(task.name.as_str()),
                None,
            )?;
            deadline.check()?;

            drop(ws);
            let created = must_get_one(&tx, key, &id)?;
            tx.commit()?;
            Ok(created)
        })?;

        info!(
            host = %key.host,
            project = %key.project,
            task = %task.id,
            parent = ?task.parent,
            "task created"
        );
        Ok(task)
    }

    /// Move and/or edit a task. Returns `None` when nothing changed, in
    /// which case nothing was written or logged.
    pub fn update_task(
        &self,
        key: &ProjectKey,
        actor: &str,
        req: UpdateTask,
    ) -> TreeResult<Option<Task>> {
        if req.is_empty() {
            return Ok(None);
        }

        if let Some(ref name) = req.name {
            validate_name(name)?;
        }
        if let Some(Some(ref d)) = req.description {
            if !d.is_empty() {
                validate_description(d)?;
            }
        }
        if let Some(v) = req.estimated_time {
            validate_amount("estimated_time", v)?;
        }
        if let Some(v) = req.estimated_expense {
            validate_amount("estimated_expense", v)?;
        }

        if key.is_root(&req.id) {
            if actor != key.host {
                return Err(TreeError::forbidden("only the host may edit the project root node"));
            }
            if req.user.is_some() {
                return Err(TreeError::restricted_root_field("user"));
            }
            if req.parent.is_some() {
                return Err(TreeError::restricted_root_field("parent"));
            }
            if req.previous_sibling.is_some() {
                return Err(TreeError::restricted_root_field("previous_sibling"));
            }
        } else {
            self.with_conn(|conn| must_have_access(conn, key, Some(actor), Role::Writer))?;
        }

        let deadline = Deadline::after(self.settings.op_timeout);
        let guard = if req.may_affect_tree() {
            Some(self.lock_project(key, &deadline)?)
        } else {
            None
        };
        let max_steps = self.settings.max_traversal;

        let updated = self.with_conn_mut(|conn| {
            let tx = if guard.is_some() {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                ensure_lock_row(&tx, key)?;
                tx
            } else {
                conn.transaction()?
            };

            let mut ws = Workset::new(&tx, key);
            if !ws.fetch(&req.id)? {
                return Err(TreeError::task_not_found(&req.id));
            }
            let current_parent = ws.get(&req.id)?.parent.clone();

            let mut changes = Map::new();
            let mut tree_changed = false;
            let mut simple_changed = false;
            let mut old_parent: Option<String> = None;

            let new_parent = req
                .parent
                .as_deref()
                .filter(|p| Some(*p) != current_parent.as_deref());

            if let Some(new_parent) = new_parent {
                if !ws.fetch(new_parent)? {
                    return Err(TreeError::parent_not_found(new_parent));
                }
                if is_ancestor_of(&tx, key, &req.id, new_parent, max_steps)? {
                    return Err(TreeError::ancestor_loop(&req.id, new_parent));
                }
                let prev = req.previous_sibling.clone().flatten();
                if let Some(ref prev) = prev {
                    ws.check_sibling(prev, new_parent, &req.id)?;
                }

                ws.detach(&req.id)?;
                ws.attach(&req.id, new_parent, prev.as_deref())?;

                old_parent = current_parent.clone();
                tree_changed = true;
                changes.insert("parent".into(), json!(new_parent));
                changes.insert("previous_sibling".into(), json!(prev));
            } else if let Some(ref prev) = req.previous_sibling {
                let current_prev = get_previous_sibling(&tx, key, &req.id)?.map(|t| t.id);
                if current_prev != *prev {
                    let parent = current_parent
                        .clone()
                        .ok_or_else(|| TreeError::internal(format!("task {} has no parent", req.id)))?;
                    if let Some(p) = prev {
                        ws.check_sibling(p, &parent, &req.id)?;
                    }

                    ws.detach(&req.id)?;
                    ws.attach(&req.id, &parent, prev.as_deref())?;

                    tree_changed = true;
                    changes.insert("previous_sibling".into(), json!(prev));
                }
            }

            let mut task = ws.get(&req.id)?.clone();
            let mut renamed = false;

            if let Some(ref name) = req.name {
                if *name != task.name {
                    task.name = name.clone();
                    renamed = true;
                    simple_changed = true;
                    changes.insert("name".into(), json!(name));
                }
            }
            if let Some(ref description) = req.description {
                let description = normalize_description(description.clone());
                if description != task.description {
                    changes.insert("description".into(), json!(description));
                    task.description = description;
                    simple_changed = true;
                }
            }
            if let Some(is_parallel) = req.is_parallel {
                if is_parallel != task.is_parallel {
                    task.is_parallel = is_parallel;
                    tree_changed = true;
                    changes.insert("is_parallel".into(), json!(is_parallel));
                }
            }
            if let Some(ref user) = req.user {
                if *user != task.user {
                    if let Some(u) = user {
                        check_assignee(&tx, key, actor, u)?;
                    }
                    task.user = user.clone();
                    simple_changed = true;
                    changes.insert("user".into(), json!(user));
                }
            }
            if let Some(estimated_time) = req.estimated_time {
                if estimated_time != task.estimated_time {
                    task.estimated_time = estimated_time;
                    tree_changed = true;
                    changes.insert("estimated_time".into(), json!(estimated_time));
                }
            }
            if let Some(estimated_expense) = req.estimated_expense {
                if estimated_expense != task.estimated_expense {
                    task.estimated_expense = estimated_expense;
                    tree_changed = true;
                    changes.insert("estimated_expense".into(), json!(estimated_expense));
                }
            }

            if !tree_changed && !simple_changed {
                debug!(task = %req.id, "update is a no-op");
                return Ok(None);
            }

            *ws.get_mut(&req.id)? = task;
            let written = ws.flush()?;
            deadline.check()?;

            log_activity(
                &tx,
                key,
                actor,
                &req.id,
                ItemType::Task,
                Action::Updated,
                Some(ws.get(&req.id)?.name.as_str()),
                Some(&Value::Object(changes)),
            )?;
            if renamed {
                rename_item(&tx, key, &req.id, &ws.get(&req.id)?.name)?;
            }

            if tree_changed {
                if let Some(ref old_parent) = old_parent {
                    recalculate_chain(&tx, key, old_parent, max_steps)?;
                }
                recalculate_chain(&tx, key, &req.id, max_steps)?;
            }
            deadline.check()?;

            drop(ws);
            let updated = must_get_one(&tx, key, &req.id)?;
            tx.commit()?;

            debug!(task = %req.id, written, tree_changed, "task updated");
            Ok(Some(updated))
        })?;
        drop(guard);

        if let Some(ref task) = updated {
            info!(host = %key.host, project = %key.project, task = %task.id, "task updated");
        }
        Ok(updated)
    }

    /// Delete a task and its whole subtree.
    ///
    /// Writers may only delete small, recent subtrees; anything larger or
    /// older than the configured policy needs an admin.
    pub fn delete_task(&self, key: &ProjectKey, actor: &str, id: &str) -> TreeResult<()> {
        if key.is_root(id) {
            return Err(TreeError::invalid_value(
                "id",
                "use delete_project to delete a project root node",
            ));
        }

        let role = self.with_conn(|conn| must_get_role(conn, key, actor))?;
        if role == Role::Reader {
            return Err(TreeError::forbidden("you don't have permission to delete a task"));
        }

        let deadline = Deadline::after(self.settings.op_timeout);
        let _guard = self.lock_project(key, &deadline)?;
        let settings = &self.settings;

        let removed = self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            ensure_lock_row(&tx, key)?;

            let task = must_get_one(&tx, key, id)?;
            if role == Role::Writer
                && (task.descendant_count > settings.writer_max_descendants
                    || task.created_on < now_ms() - settings.writer_max_age_ms)
            {
                return Err(TreeError::admin_required(id));
            }

            let mut subtree = vec![id.to_string()];
            subtree.extend(descendant_ids(&tx, key, id)?);

            let mut ws = Workset::new(&tx, key);
            ws.fetch(id)?;
            ws.detach(id)?;
            ws.flush()?;
            drop(ws);

            let removed = delete_rows(&tx, key, &subtree)?;
            let entries = delete_entries_for(&tx, key, &subtree)?;
            deadline.check()?;

            if let Some(ref parent) = task.parent {
                recalculate_chain(&tx, key, parent, settings.max_traversal)?;
            }

            subtree.extend(entries);
            mark_items_deleted(&tx, key, &subtree)?;
            log_activity(
                &tx,
                key,
                actor,
                id,
                ItemType::Task,
                Action::Deleted,
                Some(task.name.as_str()),
                Some(&json!({ "descendant_count": task.descendant_count })),
            )?;
            deadline.check()?;

            tx.commit()?;
            Ok(removed)
        })?;

        info!(host = %key.host, project = %key.project, task = id, removed, "task deleted");
        Ok(())
    }
}
