//! Project role checks.

use super::not_found_as_none;
use crate::error::{TreeError, TreeResult};
use crate::types::{ProjectKey, Role};
use rusqlite::{Connection, params};

/// `Some(is_public)` for an existing project, `None` otherwise.
pub(crate) fn project_is_public(conn: &Connection, key: &ProjectKey) -> TreeResult<Option<bool>> {
    let mut stmt = conn.prepare_cached("SELECT is_public FROM projects WHERE host = ?1 AND id = ?2")?;
    not_found_as_none(stmt.query_row(params![&key.host, &key.project], |row| row.get(0)))
}

/// The user's effective role on the project. The host is always admin.
pub(crate) fn role_of(conn: &Connection, key: &ProjectKey, user: &str) -> TreeResult<Option<Role>> {
    if user == key.host {
        return Ok(Some(Role::Admin));
    }
    let mut stmt = conn.prepare_cached(
        "SELECT role FROM project_users
         WHERE host = ?1 AND project = ?2 AND id = ?3 AND is_active = 1",
    )?;
    let role: Option<i64> = not_found_as_none(
        stmt.query_row(params![&key.host, &key.project, user], |row| row.get(0)),
    )?;
    Ok(role.and_then(Role::from_i64))
}

/// Fail with `Forbidden` unless `user` holds at least `required` on the
/// project. Reads of public projects are open to anyone, signed in or not.
pub(crate) fn must_have_access(
    conn: &Connection,
    key: &ProjectKey,
    user: Option<&str>,
    required: Role,
) -> TreeResult<()> {
    if user == Some(key.host.as_str()) {
        return Ok(());
    }

    if user.is_none() || required == Role::Reader {
        if project_is_public(conn, key)?.unwrap_or(false) {
            return Ok(());
        }
    }

    let Some(user) = user else {
        return Err(TreeError::forbidden("sign in required for this project"));
    };

    match role_of(conn, key, user)? {
        Some(role) if role.satisfies(required) => Ok(()),
        _ => Err(TreeError::forbidden(format!(
            "user {} lacks {:?} access to project {}",
            user, required, key.project
        ))),
    }
}

/// The caller's role, `Forbidden` if they have none.
pub(crate) fn must_get_role(conn: &Connection, key: &ProjectKey, user: &str) -> TreeResult<Role> {
    role_of(conn, key, user)?
        .ok_or_else(|| TreeError::forbidden(format!("user {} is not a member of this project", user)))
}
