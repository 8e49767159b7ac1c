//! Task storage and read-side tree queries.
//!
//! Tree shape lives in three pointer columns: `parent`, `first_child` and
//! `next_sibling`. Sibling order is only recoverable by following
//! `next_sibling` links, so paged child reads walk the chain rather than
//! sorting on a column.

use super::access::must_have_access;
use super::ancestry::{ancestor_path, descendant_ids};
use super::{Database, not_found_as_none, placeholders};
use crate::error::{TreeError, TreeResult};
use crate::types::{Page, ProjectKey, Role, Task};
use rusqlite::{Connection, Row, params, params_from_iter};
use std::collections::HashMap;

/// Maximum ids accepted by a single `get_tasks` call.
pub const MAX_IDS_PER_GET: usize = 100;

pub fn parse_task_row(row: &Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get("id")?,
        parent: row.get("parent")?,
        first_child: row.get("first_child")?,
        next_sibling: row.get("next_sibling")?,
        user: row.get("user")?,
        name: row.get("name")?,
        description: row.get("description")?,
        created_by: row.get("created_by")?,
        created_on: row.get("created_on")?,
        minimum_time: row.get("minimum_time")?,
        estimated_time: row.get("estimated_time")?,
        logged_time: row.get("logged_time")?,
        estimated_expense: row.get("estimated_expense")?,
        logged_expense: row.get("logged_expense")?,
        file_count: row.get("file_count")?,
        file_size: row.get("file_size")?,
        estimated_sub_time: row.get("estimated_sub_time")?,
        logged_sub_time: row.get("logged_sub_time")?,
        estimated_sub_expense: row.get("estimated_sub_expense")?,
        logged_sub_expense: row.get("logged_sub_expense")?,
        file_sub_count: row.get("file_sub_count")?,
        file_sub_size: row.get("file_sub_size")?,
        child_count: row.get("child_count")?,
        descendant_count: row.get("descendant_count")?,
        is_parallel: row.get("is_parallel")?,
    })
}

/// Get one task using an existing connection (avoids deadlock).
pub(crate) fn get_one(conn: &Connection, key: &ProjectKey, id: &str) -> TreeResult<Option<Task>> {
    let mut stmt =
        conn.prepare_cached("SELECT * FROM tasks WHERE host = ?1 AND project = ?2 AND id = ?3")?;
    not_found_as_none(stmt.query_row(params![&key.host, &key.project, id], parse_task_row))
}

/// Get one task, failing with `TaskNotFound` when it is missing.
pub(crate) fn must_get_one(conn: &Connection, key: &ProjectKey, id: &str) -> TreeResult<Task> {
    get_one(conn, key, id)?.ok_or_else(|| TreeError::task_not_found(id))
}

/// Get several tasks in one query. Missing ids are skipped; order follows `ids`.
pub(crate) fn get_many(conn: &Connection, key: &ProjectKey, ids: &[String]) -> TreeResult<Vec<Task>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT * FROM tasks WHERE host = ? AND project = ? AND id IN ({})",
        placeholders(ids.len())
    );
    let args = [&key.host, &key.project].into_iter().chain(ids.iter());

    let mut stmt = conn.prepare(&sql)?;
    let mut by_id: HashMap<String, Task> = stmt
        .query_map(params_from_iter(args), parse_task_row)?
        .map(|r| r.map(|t| (t.id.clone(), t)))
        .collect::<rusqlite::Result<_>>()?;

    Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
}

/// Direct children of a task in storage order (not sibling order).
pub(crate) fn get_child_rows(conn: &Connection, key: &ProjectKey, parent: &str) -> TreeResult<Vec<Task>> {
    let mut stmt = conn.prepare_cached(
        "SELECT * FROM tasks WHERE host = ?1 AND project = ?2 AND parent = ?3 AND id <> ?3",
    )?;
    let children = stmt
        .query_map(params![&key.host, &key.project, parent], parse_task_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(children)
}

/// The sibling whose `next_sibling` points at `id`, if any.
pub(crate) fn get_previous_sibling(
    conn: &Connection,
    key: &ProjectKey,
    id: &str,
) -> TreeResult<Option<Task>> {
    let mut stmt = conn.prepare_cached(
        "SELECT * FROM tasks WHERE host = ?1 AND project = ?2 AND next_sibling = ?3",
    )?;
    not_found_as_none(stmt.query_row(params![&key.host, &key.project, id], parse_task_row))
}

/// Walk a sibling chain from `start`, returning at most `limit + 1` tasks.
fn sibling_chain(
    conn: &Connection,
    key: &ProjectKey,
    start: &str,
    limit: usize,
) -> TreeResult<Vec<Task>> {
    let mut stmt = conn.prepare_cached(
        "WITH RECURSIVE chain (n, id) AS (
            SELECT 0, ?3
            UNION ALL
            SELECT c.n + 1, t.next_sibling FROM tasks t
            INNER JOIN chain c ON t.id = c.id
            WHERE t.host = ?1 AND t.project = ?2
            AND t.next_sibling IS NOT NULL AND c.n < ?4
        )
        SELECT t.* FROM chain c
        INNER JOIN tasks t ON t.id = c.id
        WHERE t.host = ?1 AND t.project = ?2
        ORDER BY c.n",
    )?;
    let tasks = stmt
        .query_map(
            params![&key.host, &key.project, start, limit as i64],
            parse_task_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tasks)
}

fn into_page<T>(mut set: Vec<T>, limit: usize) -> Page<T> {
    let more = set.len() > limit;
    set.truncate(limit);
    Page { set, more }
}

/// Insert a freshly built task row.
pub(crate) fn insert_task(conn: &Connection, key: &ProjectKey, t: &Task) -> TreeResult<()> {
    conn.execute(
        "INSERT INTO tasks (
            host, project, id, parent, first_child, next_sibling, user, name, description,
            created_by, created_on, minimum_time, estimated_time, logged_time,
            estimated_sub_time, logged_sub_time, estimated_expense, logged_expense,
            estimated_sub_expense, logged_sub_expense, file_count, file_size,
            file_sub_count, file_sub_size, child_count, descendant_count, is_parallel
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                  ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27)",
        params![
            &key.host,
            &key.project,
            &t.id,
            &t.parent,
            &t.first_child,
            &t.next_sibling,
            &t.user,
            &t.name,
            &t.description,
            &t.created_by,
            t.created_on,
            t.minimum_time,
            t.estimated_time,
            t.logged_time,
            t.estimated_sub_time,
            t.logged_sub_time,
            t.estimated_expense,
            t.logged_expense,
            t.estimated_sub_expense,
            t.logged_sub_expense,
            t.file_count,
            t.file_size,
            t.file_sub_count,
            t.file_sub_size,
            t.child_count,
            t.descendant_count,
            t.is_parallel,
        ],
    )?;
    Ok(())
}

/// Persist the pointer and user-editable columns of a task.
/// Aggregate columns are owned by the recalculator and left alone.
pub(crate) fn save_task(conn: &Connection, key: &ProjectKey, t: &Task) -> TreeResult<()> {
    let mut stmt = conn.prepare_cached(
        "UPDATE tasks SET parent = ?4, first_child = ?5, next_sibling = ?6, name = ?7,
            description = ?8, is_parallel = ?9, user = ?10, estimated_time = ?11,
            estimated_expense = ?12
         WHERE host = ?1 AND project = ?2 AND id = ?3",
    )?;
    stmt.execute(params![
        &key.host,
        &key.project,
        &t.id,
        &t.parent,
        &t.first_child,
        &t.next_sibling,
        &t.name,
        &t.description,
        t.is_parallel,
        &t.user,
        t.estimated_time,
        t.estimated_expense,
    ])?;
    Ok(())
}

/// Remove a set of task rows. Returns the number deleted.
pub(crate) fn delete_rows(conn: &Connection, key: &ProjectKey, ids: &[String]) -> TreeResult<usize> {
    if ids.is_empty() {
        return Ok(0);
    }
    let sql = format!(
        "DELETE FROM tasks WHERE host = ? AND project = ? AND id IN ({})",
        placeholders(ids.len())
    );
    let args = [&key.host, &key.project].into_iter().chain(ids.iter());
    Ok(conn.execute(&sql, params_from_iter(args))?)
}

impl Database {
    /// Get a task by id.
    pub fn get_task(&self, key: &ProjectKey, actor: Option<&str>, id: &str) -> TreeResult<Task> {
        self.with_conn(|conn| {
            must_have_access(conn, key, actor, Role::Reader)?;
            must_get_one(conn, key, id)
        })
    }

    /// Get several tasks by id, in request order. Unknown ids are skipped.
    pub fn get_tasks(
        &self,
        key: &ProjectKey,
        actor: Option<&str>,
        ids: &[String],
    ) -> TreeResult<Vec<Task>> {
        if ids.len() > MAX_IDS_PER_GET {
            return Err(TreeError::invalid_value(
                "ids",
                format!("at most {} ids may be requested", MAX_IDS_PER_GET),
            ));
        }
        self.with_conn(|conn| {
            must_have_access(conn, key, actor, Role::Reader)?;
            get_many(conn, key, ids)
        })
    }

    /// Ancestors of a task, nearest first, excluding the task itself.
    /// With `after`, the page starts above that ancestor.
    pub fn get_ancestors(
        &self,
        key: &ProjectKey,
        actor: Option<&str>,
        id: &str,
        after: Option<&str>,
        limit: Option<usize>,
    ) -> TreeResult<Page<Task>> {
        let limit = self.page_limit(limit);
        let max_steps = self.settings.max_traversal;
        self.with_conn(|conn| {
            must_have_access(conn, key, actor, Role::Reader)?;
            let path = ancestor_path(conn, key, id, max_steps)?;
            let skip = match after {
                Some(after_id) => {
                    let at = path
                        .iter()
                        .skip(1)
                        .position(|a| a == after_id)
                        .ok_or_else(|| {
                            TreeError::invalid_value(
                                "after",
                                format!("{} is not an ancestor of {}", after_id, id),
                            )
                        })?;
                    at + 2
                }
                None => 1,
            };
            let wanted: Vec<String> = path.into_iter().skip(skip).take(limit + 1).collect();
            let ancestors = get_many(conn, key, &wanted)?;
            Ok(into_page(ancestors, limit))
        })
    }

    /// Children of a task in sibling order, optionally starting after a
    /// given child.
    pub fn get_children(
        &self,
        key: &ProjectKey,
        actor: Option<&str>,
        id: &str,
        after: Option<&str>,
        limit: Option<usize>,
    ) -> TreeResult<Page<Task>> {
        let limit = self.page_limit(limit);
        self.with_conn(|conn| {
            must_have_access(conn, key, actor, Role::Reader)?;
            let parent = must_get_one(conn, key, id)?;

            let start = match after {
                Some(after_id) => {
                    let after_task = must_get_one(conn, key, after_id)?;
                    if after_task.parent.as_deref() != Some(id) {
                        return Err(TreeError::sibling_parent_mismatch(after_id, id)
                            .with_field("after"));
                    }
                    after_task.next_sibling
                }
                None => parent.first_child,
            };

            match start {
                Some(start) => Ok(into_page(sibling_chain(conn, key, &start, limit)?, limit)),
                None => Ok(Page {
                    set: Vec::new(),
                    more: false,
                }),
            }
        })
    }

    /// Every task in the project keyed by id. Intended for inspection of
    /// small trees.
    pub fn get_project_tree(
        &self,
        key: &ProjectKey,
        actor: Option<&str>,
    ) -> TreeResult<HashMap<String, Task>> {
        self.with_conn(|conn| {
            must_have_access(conn, key, actor, Role::Reader)?;
            let mut stmt = conn.prepare("SELECT * FROM tasks WHERE host = ?1 AND project = ?2")?;
            let tree = stmt
                .query_map(params![&key.host, &key.project], parse_task_row)?
                .map(|r| r.map(|t| (t.id.clone(), t)))
                .collect::<rusqlite::Result<HashMap<_, _>>>()?;
            Ok(tree)
        })
    }

    /// True if `candidate` lies on `task`'s ancestor path (the task itself
    /// included). No access check; callers gate.
    pub fn is_ancestor_of(&self, key: &ProjectKey, candidate: &str, task: &str) -> TreeResult<bool> {
        let max_steps = self.settings.max_traversal;
        self.with_conn(|conn| super::ancestry::is_ancestor_of(conn, key, candidate, task, max_steps))
    }

    /// Ids of every task below `id`. No access check; callers gate.
    pub fn get_descendant_ids(&self, key: &ProjectKey, id: &str) -> TreeResult<Vec<String>> {
        self.with_conn(|conn| descendant_ids(conn, key, id))
    }

    fn page_limit(&self, requested: Option<usize>) -> usize {
        let cap = self.settings.page_limit;
        requested.unwrap_or(cap).clamp(1, cap)
    }
}
