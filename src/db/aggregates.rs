//! Bottom-up aggregate recomputation.
//!
//! A node's rolled-up values depend only on its own estimate and the current
//! values of its direct children, so recomputing a single ancestor chain
//! after a mutation keeps the whole tree consistent. Time rollups follow the
//! critical path: a parallel node takes the longest child branch, a
//! sequential node adds its children up. Expense and file rollups always add.

use super::ancestry::ancestor_path;
use super::tasks::{get_child_rows, must_get_one};
use crate::error::TreeResult;
use crate::types::{ProjectKey, Task};
use rusqlite::{Connection, params};
use tracing::debug;

/// The derived columns of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Aggregates {
    pub minimum_time: i64,
    pub estimated_sub_time: i64,
    pub logged_sub_time: i64,
    pub estimated_sub_expense: i64,
    pub logged_sub_expense: i64,
    pub file_sub_count: i64,
    pub file_sub_size: i64,
    pub child_count: i64,
    pub descendant_count: i64,
}

impl Aggregates {
    /// The aggregates currently stored on a task.
    pub fn of(task: &Task) -> Self {
        Self {
            minimum_time: task.minimum_time,
            estimated_sub_time: task.estimated_sub_time,
            logged_sub_time: task.logged_sub_time,
            estimated_sub_expense: task.estimated_sub_expense,
            logged_sub_expense: task.logged_sub_expense,
            file_sub_count: task.file_sub_count,
            file_sub_size: task.file_sub_size,
            child_count: task.child_count,
            descendant_count: task.descendant_count,
        }
    }

    pub fn apply_to(&self, task: &mut Task) {
        task.minimum_time = self.minimum_time;
        task.estimated_sub_time = self.estimated_sub_time;
        task.logged_sub_time = self.logged_sub_time;
        task.estimated_sub_expense = self.estimated_sub_expense;
        task.logged_sub_expense = self.logged_sub_expense;
        task.file_sub_count = self.file_sub_count;
        task.file_sub_size = self.file_sub_size;
        task.child_count = self.child_count;
        task.descendant_count = self.descendant_count;
    }
}

/// Combine child time values: longest branch when parallel, total otherwise.
fn combine_time(is_parallel: bool, values: impl Iterator<Item = i64>) -> i64 {
    if is_parallel {
        values.max().unwrap_or(0)
    } else {
        values.fold(0, i64::saturating_add)
    }
}

fn sum(values: impl Iterator<Item = i64>) -> i64 {
    values.fold(0, i64::saturating_add)
}

/// Compute a node's aggregates from its direct children's current values.
///
/// Pure: `children` must be exactly the node's direct children, each
/// carrying already-consistent aggregates of its own.
pub fn compute_aggregates(node: &Task, children: &[Task]) -> Aggregates {
    let p = node.is_parallel;
    Aggregates {
        minimum_time: node
            .estimated_time
            .saturating_add(combine_time(p, children.iter().map(|c| c.minimum_time))),
        estimated_sub_time: combine_time(
            p,
            children
                .iter()
                .map(|c| c.estimated_time.saturating_add(c.estimated_sub_time)),
        ),
        logged_sub_time: combine_time(
            p,
            children
                .iter()
                .map(|c| c.logged_time.saturating_add(c.logged_sub_time)),
        ),
        estimated_sub_expense: sum(children
            .iter()
            .map(|c| c.estimated_expense.saturating_add(c.estimated_sub_expense))),
        logged_sub_expense: sum(children
            .iter()
            .map(|c| c.logged_expense.saturating_add(c.logged_sub_expense))),
        file_sub_count: sum(children
            .iter()
            .map(|c| c.file_count.saturating_add(c.file_sub_count))),
        file_sub_size: sum(children
            .iter()
            .map(|c| c.file_size.saturating_add(c.file_sub_size))),
        child_count: children.len() as i64,
        descendant_count: sum(children.iter().map(|c| 1 + c.descendant_count)),
    }
}

pub(crate) fn write_aggregates(
    conn: &Connection,
    key: &ProjectKey,
    id: &str,
    agg: &Aggregates,
) -> TreeResult<()> {
    let mut stmt = conn.prepare_cached(
        "UPDATE tasks SET minimum_time = ?4, estimated_sub_time = ?5, logged_sub_time = ?6,
            estimated_sub_expense = ?7, logged_sub_expense = ?8, file_sub_count = ?9,
            file_sub_size = ?10, child_count = ?11, descendant_count = ?12
         WHERE host = ?1 AND project = ?2 AND id = ?3",
    )?;
    stmt.execute(params![
        &key.host,
        &key.project,
        id,
        agg.minimum_time,
        agg.estimated_sub_time,
        agg.logged_sub_time,
        agg.estimated_sub_expense,
        agg.logged_sub_expense,
        agg.file_sub_count,
        agg.file_sub_size,
        agg.child_count,
        agg.descendant_count,
    ])?;
    Ok(())
}

/// Recompute `start` and every ancestor above it, bottom-up. Reads only each
/// node's direct children. Returns how many rows actually changed.
pub(crate) fn recalculate_chain(
    conn: &Connection,
    key: &ProjectKey,
    start: &str,
    max_steps: usize,
) -> TreeResult<usize> {
    let chain = ancestor_path(conn, key, start, max_steps)?;
    let mut changed = 0;

    for id in &chain {
        let node = must_get_one(conn, key, id)?;
        let children = get_child_rows(conn, key, id)?;
        let agg = compute_aggregates(&node, &children);
        if agg != Aggregates::of(&node) {
            write_aggregates(conn, key, id, &agg)?;
            changed += 1;
        }
    }

    debug!(
        host = %key.host,
        project = %key.project,
        start,
        depth = chain.len(),
        changed,
        "recalculated ancestor chain"
    );
    Ok(changed)
}
