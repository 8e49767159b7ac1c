//! Append-only activity log.
//!
//! Entries keep a denormalized copy of the item's name so the log reads well
//! after the item changes. Renames rewrite that copy on every prior entry and
//! deletes flag every prior entry for the item.

use super::access::must_have_access;
use super::{Database, now_ms, placeholders};
use crate::error::TreeResult;
use crate::types::{Action, Activity, ActivityFilter, ItemType, Page, ProjectKey, Role};
use rusqlite::{Connection, Row, params, params_from_iter};

/// Append one entry. A `Deleted` entry also flags every earlier entry for
/// the same item.
#[allow(clippy::too_many_arguments)]
pub(crate) fn log_activity(
    conn: &Connection,
    key: &ProjectKey,
    actor: &str,
    item: &str,
    item_type: ItemType,
    action: Action,
    item_name: Option<&str>,
    extra_info: Option<&serde_json::Value>,
) -> TreeResult<()> {
    let deleted = action == Action::Deleted;
    let extra_info = extra_info.map(serde_json::to_string).transpose()?;

    conn.execute(
        "INSERT INTO activities (
            host, project, occurred_on, actor, item, item_type,
            item_has_been_deleted, action, item_name, extra_info
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            &key.host,
            &key.project,
            now_ms(),
            actor,
            item,
            item_type.as_str(),
            deleted,
            action.as_str(),
            item_name,
            extra_info,
        ],
    )?;

    if deleted {
        mark_items_deleted(conn, key, &[item.to_string()])?;
    }
    Ok(())
}

/// Keep every entry's `item_name` in step with the item's current name.
/// Time and expense entries carry their task's name, so they follow the
/// task they were logged against.
pub(crate) fn rename_item(conn: &Connection, key: &ProjectKey, item: &str, new_name: &str) -> TreeResult<()> {
    conn.execute(
        "UPDATE activities SET item_name = ?4
         WHERE host = ?1 AND project = ?2
           AND (item = ?3
                OR (item_type IN (?5, ?6) AND json_extract(extra_info, '$.task') = ?3))",
        params![
            &key.host,
            &key.project,
            item,
            new_name,
            ItemType::Time.as_str(),
            ItemType::Expense.as_str(),
        ],
    )?;
    Ok(())
}

/// Flag all entries for the given items as referring to deleted items.
pub(crate) fn mark_items_deleted(conn: &Connection, key: &ProjectKey, items: &[String]) -> TreeResult<()> {
    if items.is_empty() {
        return Ok(());
    }
    let sql = format!(
        "UPDATE activities SET item_has_been_deleted = 1
         WHERE host = ? AND project = ? AND item IN ({})",
        placeholders(items.len())
    );
    let args = [&key.host, &key.project].into_iter().chain(items.iter());
    conn.execute(&sql, params_from_iter(args))?;
    Ok(())
}

fn parse_activity_row(row: &Row) -> rusqlite::Result<Activity> {
    let item_type: String = row.get("item_type")?;
    let action: String = row.get("action")?;
    let extra_info: Option<String> = row.get("extra_info")?;

    Ok(Activity {
        seq: row.get("seq")?,
        project: row.get("project")?,
        occurred_on: row.get("occurred_on")?,
        actor: row.get("actor")?,
        item: row.get("item")?,
        item_type: ItemType::parse(&item_type).unwrap_or(ItemType::Task),
        item_has_been_deleted: row.get("item_has_been_deleted")?,
        action: Action::parse(&action).unwrap_or(Action::Updated),
        item_name: row.get("item_name")?,
        extra_info: extra_info.and_then(|s| serde_json::from_str(&s).ok()),
    })
}

impl Database {
    /// Activity entries for a project, newest first.
    pub fn get_activities(
        &self,
        key: &ProjectKey,
        actor: Option<&str>,
        filter: &ActivityFilter,
    ) -> TreeResult<Page<Activity>> {
        let cap = self.settings.page_limit;
        let limit = filter.limit.unwrap_or(cap).clamp(1, cap);

        self.with_conn(|conn| {
            must_have_access(conn, key, actor, Role::Reader)?;

            let mut sql = String::from("SELECT * FROM activities WHERE host = ? AND project = ?");
            let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> =
                vec![Box::new(key.host.clone()), Box::new(key.project.clone())];

            if let Some(ref item) = filter.item {
                sql.push_str(" AND item = ?");
                params_vec.push(Box::new(item.clone()));
            }
            if let Some(ref by) = filter.actor {
                sql.push_str(" AND actor = ?");
                params_vec.push(Box::new(by.clone()));
            }
            if let Some(after) = filter.occurred_after {
                sql.push_str(" AND occurred_on > ?");
                params_vec.push(Box::new(after));
            }
            if let Some(before) = filter.occurred_before {
                sql.push_str(" AND occurred_on < ?");
                params_vec.push(Box::new(before));
            }
            sql.push_str(&format!(" ORDER BY seq DESC LIMIT {}", limit + 1));

            let params_refs: Vec<&dyn rusqlite::ToSql> =
                params_vec.iter().map(|b| b.as_ref()).collect();

            let mut stmt = conn.prepare(&sql)?;
            let mut set = stmt
                .query_map(params_refs.as_slice(), parse_activity_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let more = set.len() > limit;
            set.truncate(limit);
            Ok(Page { set, more })
        })
    }
}
