//! Ancestor and descendant traversal.

use crate::error::{TreeError, TreeResult};
use crate::types::ProjectKey;
use rusqlite::{Connection, params};
use std::collections::HashSet;

/// Path from `id` up to the project root. Index is the distance from `id`
/// (0 = the task itself).
///
/// Fails with `TraversalLimitExceeded` rather than looping when the parent
/// links revisit a node or the walk exceeds `max_steps`.
pub(crate) fn ancestor_path(
    conn: &Connection,
    key: &ProjectKey,
    id: &str,
    max_steps: usize,
) -> TreeResult<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT parent FROM tasks WHERE host = ?1 AND project = ?2 AND id = ?3",
    )?;
    let mut parent_of = |task: &str| -> TreeResult<Option<Option<String>>> {
        super::not_found_as_none(
            stmt.query_row(params![&key.host, &key.project, task], |row| row.get(0)),
        )
    };

    let mut path = vec![id.to_string()];
    let mut seen: HashSet<String> = HashSet::from([id.to_string()]);
    let mut parent = parent_of(id)?.ok_or_else(|| TreeError::task_not_found(id))?;

    while let Some(next) = parent {
        // the project root may carry a self reference
        if path.last().is_some_and(|last| *last == next) {
            break;
        }
        if !seen.insert(next.clone()) {
            return Err(TreeError::traversal_limit(id, max_steps)
                .with_details(format!("revisited {}", next)));
        }
        if path.len() > max_steps {
            return Err(TreeError::traversal_limit(id, max_steps)
                .with_details(format!("stopped at {}", next)));
        }
        parent = match parent_of(&next)? {
            Some(p) => p,
            // dangling parent pointer: stop at the last row that exists
            None => break,
        };
        path.push(next);
    }

    Ok(path)
}

/// True if `candidate` appears on `task`'s ancestor path, `task` included.
/// A reparent of X under P is a cycle exactly when `is_ancestor_of(X, P)`.
pub(crate) fn is_ancestor_of(
    conn: &Connection,
    key: &ProjectKey,
    candidate: &str,
    task: &str,
    max_steps: usize,
) -> TreeResult<bool> {
    let path = ancestor_path(conn, key, task, max_steps)?;
    Ok(path.iter().any(|id| id == candidate))
}

/// Ids of every task below `id`, excluding `id` itself.
pub(crate) fn descendant_ids(conn: &Connection, key: &ProjectKey, id: &str) -> TreeResult<Vec<String>> {
    // UNION (not UNION ALL) discards revisits, so corrupt parent loops still terminate
    let mut stmt = conn.prepare_cached(
        "WITH RECURSIVE descendants (id) AS (
            SELECT id FROM tasks WHERE host = ?1 AND project = ?2 AND parent = ?3
            UNION
            SELECT t.id FROM tasks t
            INNER JOIN descendants d ON t.parent = d.id
            WHERE t.host = ?1 AND t.project = ?2
        )
        SELECT id FROM descendants WHERE id <> ?3",
    )?;
    let ids = stmt
        .query_map(params![&key.host, &key.project, id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Connection, ProjectKey) {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE tasks (host TEXT, project TEXT, id TEXT, parent TEXT);
             INSERT INTO tasks VALUES ('h', 'p', 'p', NULL);
             INSERT INTO tasks VALUES ('h', 'p', 'a', 'p');
             INSERT INTO tasks VALUES ('h', 'p', 'b', 'a');
             INSERT INTO tasks VALUES ('h', 'p', 'c', 'b');
             INSERT INTO tasks VALUES ('h', 'p', 'd', 'a');
             INSERT INTO tasks VALUES ('h', 'other', 'x', 'a');",
        )
        .unwrap();
        (conn, ProjectKey::new("h", "p"))
    }

    #[test]
    fn ancestor_path_walks_to_root() {
        let (conn, key) = setup();
        let path = ancestor_path(&conn, &key, "c", 100).unwrap();
        assert_eq!(path, vec!["c", "b", "a", "p"]);
    }

    #[test]
    fn ancestor_path_of_root_is_itself() {
        let (conn, key) = setup();
        assert_eq!(ancestor_path(&conn, &key, "p", 100).unwrap(), vec!["p"]);
    }

    #[test]
    fn ancestor_path_missing_task_is_not_found() {
        let (conn, key) = setup();
        let err = ancestor_path(&conn, &key, "nope", 100).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::TaskNotFound);
    }

    #[test]
    fn ancestor_path_fails_fast_on_loops() {
        let (conn, key) = setup();
        conn.execute("UPDATE tasks SET parent = 'c' WHERE id = 'a'", [])
            .unwrap();
        let err = ancestor_path(&conn, &key, "c", 100).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::TraversalLimitExceeded);
        assert_eq!(err.details.as_deref(), Some("revisited c"));
    }

    #[test]
    fn ancestor_path_respects_ceiling() {
        let (conn, key) = setup();
        let err = ancestor_path(&conn, &key, "c", 2).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::TraversalLimitExceeded);
        assert_eq!(err.details.as_deref(), Some("stopped at p"));
    }

    #[test]
    fn is_ancestor_of_includes_self() {
        let (conn, key) = setup();
        assert!(is_ancestor_of(&conn, &key, "a", "c", 100).unwrap());
        assert!(is_ancestor_of(&conn, &key, "c", "c", 100).unwrap());
        assert!(!is_ancestor_of(&conn, &key, "c", "a", 100).unwrap());
        assert!(!is_ancestor_of(&conn, &key, "d", "c", 100).unwrap());
    }

    #[test]
    fn descendants_stay_in_project() {
        let (conn, key) = setup();
        let mut ids = descendant_ids(&conn, &key, "a").unwrap();
        ids.sort();
        assert_eq!(ids, vec!["b", "c", "d"]);
        assert!(descendant_ids(&conn, &key, "c").unwrap().is_empty());
    }

    #[test]
    fn descendants_terminate_on_loops() {
        let (conn, key) = setup();
        conn.execute("UPDATE tasks SET parent = 'c' WHERE id = 'a'", [])
            .unwrap();
        let mut ids = descendant_ids(&conn, &key, "a").unwrap();
        ids.sort();
        assert_eq!(ids, vec!["b", "c", "d"]);
    }
}
