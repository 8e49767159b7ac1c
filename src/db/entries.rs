//! Logged time and expense entries.
//!
//! An entry adds to its task's own `logged_time` / `logged_expense`, which
//! then flows up the ancestor chain like any other aggregate input.

use super::access::must_have_access;
use super::activities::log_activity;
use super::aggregates::recalculate_chain;
use super::locks::{Deadline, ensure_lock_row};
use super::tasks::must_get_one;
use super::{Database, new_id, now_ms, placeholders};
use crate::error::{TreeError, TreeResult};
use crate::types::{Action, ExpenseEntry, ItemType, ProjectKey, Role, TimeEntry};
use rusqlite::{Connection, TransactionBehavior, params, params_from_iter};
use serde_json::json;
use tracing::info;

pub const NOTE_MAX_LEN: usize = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Time,
    Expense,
}

impl EntryKind {
    fn amount_field(self) -> &'static str {
        match self {
            EntryKind::Time => "duration",
            EntryKind::Expense => "value",
        }
    }

    fn item_type(self) -> ItemType {
        match self {
            EntryKind::Time => ItemType::Time,
            EntryKind::Expense => ItemType::Expense,
        }
    }
}

/// Remove every time and expense entry attached to the given tasks and
/// return the removed entry ids.
pub(crate) fn delete_entries_for(
    conn: &Connection,
    key: &ProjectKey,
    tasks: &[String],
) -> TreeResult<Vec<String>> {
    if tasks.is_empty() {
        return Ok(Vec::new());
    }
    let mut removed = Vec::new();
    for table in ["times", "expenses"] {
        let filter = format!(
            "FROM {} WHERE host = ? AND project = ? AND task IN ({})",
            table,
            placeholders(tasks.len())
        );
        let args = || [&key.host, &key.project].into_iter().chain(tasks.iter());

        let mut stmt = conn.prepare(&format!("SELECT id {}", filter))?;
        let ids = stmt
            .query_map(params_from_iter(args()), |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        conn.execute(&format!("DELETE {}", filter), params_from_iter(args()))?;
        removed.extend(ids);
    }
    Ok(removed)
}

impl Database {
    /// Log time spent on a task.
    pub fn log_time(
        &self,
        key: &ProjectKey,
        actor: &str,
        task: &str,
        duration: i64,
        note: Option<String>,
    ) -> TreeResult<TimeEntry> {
        let (id, created_on, note) = self.record_entry(key, actor, task, EntryKind::Time, duration, note)?;
        Ok(TimeEntry {
            id,
            task: task.to_string(),
            created_by: actor.to_string(),
            created_on,
            duration,
            note,
        })
    }

    /// Log money spent on a task.
    pub fn log_expense(
        &self,
        key: &ProjectKey,
        actor: &str,
        task: &str,
        value: i64,
        note: Option<String>,
    ) -> TreeResult<ExpenseEntry> {
        let (id, created_on, note) =
            self.record_entry(key, actor, task, EntryKind::Expense, value, note)?;
        Ok(ExpenseEntry {
            id,
            task: task.to_string(),
            created_by: actor.to_string(),
            created_on,
            value,
            note,
        })
    }

    fn record_entry(
        &self,
        key: &ProjectKey,
        actor: &str,
        task_id: &str,
        kind: EntryKind,
        amount: i64,
        note: Option<String>,
    ) -> TreeResult<(String, i64, Option<String>)> {
        if amount <= 0 {
            return Err(TreeError::invalid_value(
                kind.amount_field(),
                format!("{} must be positive", kind.amount_field()),
            ));
        }
        let note = note.filter(|n| !n.is_empty());
        if let Some(ref n) = note {
            if n.chars().count() > NOTE_MAX_LEN {
                return Err(TreeError::invalid_value(
                    "note",
                    format!("note must be at most {} characters", NOTE_MAX_LEN),
                ));
            }
        }

        self.with_conn(|conn| must_have_access(conn, key, Some(actor), Role::Writer))?;

        let deadline = Deadline::after(self.settings.op_timeout);
        let _guard = self.locks.acquire(key, &deadline)?;
        let max_steps = self.settings.max_traversal;

        let id = new_id();
        let created_on = now_ms();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            ensure_lock_row(&tx, key)?;

            let task = must_get_one(&tx, key, task_id)?;
            match kind {
                EntryKind::Time => {
                    tx.execute(
                        "INSERT INTO times (host, project, task, id, created_by, created_on, duration, note)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                        params![&key.host, &key.project, task_id, &id, actor, created_on, amount, &note],
                    )?;
                    tx.execute(
                        "UPDATE tasks SET logged_time = logged_time + ?4
                         WHERE host = ?1 AND project = ?2 AND id = ?3",
                        params![&key.host, &key.project, task_id, amount],
                    )?;
                }
                EntryKind::Expense => {
                    tx.execute(
                        "INSERT INTO expenses (host, project, task, id, created_by, created_on, value, note)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                        params![&key.host, &key.project, task_id, &id, actor, created_on, amount, &note],
                    )?;
                    tx.execute(
                        "UPDATE tasks SET logged_expense = logged_expense + ?4
                         WHERE host = ?1 AND project = ?2 AND id = ?3",
                        params![&key.host, &key.project, task_id, amount],
                    )?;
                }
            }
            deadline.check()?;

            if let Some(ref parent) = task.parent {
                recalculate_chain(&tx, key, parent, max_steps)?;
            }

            log_activity(
                &tx,
                key,
                actor,
                &id,
                kind.item_type(),
                Action::Created,
                Some(task.name.as_str()),
                Some(&json!({ "task": task_id, kind.amount_field(): amount })),
            )?;
            deadline.check()?;

            tx.commit()?;
            Ok(())
        })?;

        info!(
            host = %key.host,
            project = %key.project,
            task = task_id,
            kind = ?kind,
            amount,
            "entry logged"
        );
        Ok((id, created_on, note))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_kinds_map_to_activity_types() {
        assert_eq!(EntryKind::Time.item_type(), ItemType::Time);
        assert_eq!(EntryKind::Expense.item_type(), ItemType::Expense);
        assert_eq!(EntryKind::Time.amount_field(), "duration");
        assert_eq!(EntryKind::Expense.amount_field(), "value");
    }
}
