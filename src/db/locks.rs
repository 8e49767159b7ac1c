//! Per-project exclusive locking and operation time budgets.
//!
//! Every mutation that can change sibling/parent pointers or any
//! aggregate-influencing value takes the project's lock before it reads the
//! rows it will modify, and holds it until its transaction commits or rolls
//! back. Different projects never contend.

use crate::error::{TreeError, TreeResult};
use crate::types::ProjectKey;
use rusqlite::{Connection, params};
use std::collections::HashSet;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Time budget for one logical operation, lock wait included.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    /// Time left, or `None` once the budget is spent.
    pub fn remaining(&self) -> Option<Duration> {
        self.budget
            .checked_sub(self.started.elapsed())
            .filter(|d| !d.is_zero())
    }

    /// Fail with `DeadlineExceeded` once the budget is spent.
    pub fn check(&self) -> TreeResult<()> {
        match self.remaining() {
            Some(_) => Ok(()),
            None => Err(TreeError::deadline_exceeded(self.budget.as_millis() as u64)),
        }
    }
}

/// Table of currently locked projects.
#[derive(Default)]
pub struct ProjectLocks {
    held: Mutex<HashSet<ProjectKey>>,
    released: Condvar,
}

/// Holds a project's lock; releases it on drop.
#[must_use = "the project lock is released as soon as the guard is dropped"]
pub struct ProjectLockGuard<'a> {
    locks: &'a ProjectLocks,
    key: ProjectKey,
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the project's lock is free or the deadline passes.
    pub fn acquire(&self, key: &ProjectKey, deadline: &Deadline) -> TreeResult<ProjectLockGuard<'_>> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);

        loop {
            if !held.contains(key) {
                held.insert(key.clone());
                debug!(host = %key.host, project = %key.project, "project lock acquired");
                return Ok(ProjectLockGuard {
                    locks: self,
                    key: key.clone(),
                });
            }

            let Some(wait) = deadline.remaining() else {
                warn!(host = %key.host, project = %key.project, "timed out waiting for project lock");
                return Err(TreeError::lock_timeout(&key.project));
            };

            let (guard, _) = self
                .released
                .wait_timeout(held, wait)
                .unwrap_or_else(PoisonError::into_inner);
            held = guard;
        }
    }

    /// Whether the project is currently locked.
    pub fn is_locked(&self, key: &ProjectKey) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    fn release(&self, key: &ProjectKey) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.remove(key);
        drop(held);
        self.released.notify_all();
    }
}

impl Drop for ProjectLockGuard<'_> {
    fn drop(&mut self) {
        self.locks.release(&self.key);
        debug!(host = %self.key.host, project = %self.key.project, "project lock released");
    }
}

/// Check the project's lock marker row inside the current transaction.
/// A missing marker means the project does not exist.
pub(crate) fn ensure_lock_row(conn: &Connection, key: &ProjectKey) -> TreeResult<()> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) = 1 FROM project_locks WHERE host = ?1 AND id = ?2",
        params![&key.host, &key.project],
        |row| row.get(0),
    )?;
    if exists {
        Ok(())
    } else {
        Err(TreeError::project_not_found(&key.project))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn key(project: &str) -> ProjectKey {
        ProjectKey::new("host", project)
    }

    #[test]
    fn guard_releases_on_drop() {
        let locks = ProjectLocks::new();
        let deadline = Deadline::after(Duration::from_millis(100));
        {
            let _guard = locks.acquire(&key("p1"), &deadline).unwrap();
            assert!(locks.is_locked(&key("p1")));
        }
        assert!(!locks.is_locked(&key("p1")));
    }

    #[test]
    fn second_acquire_times_out_while_held() {
        let locks = ProjectLocks::new();
        let _guard = locks
            .acquire(&key("p1"), &Deadline::after(Duration::from_millis(100)))
            .unwrap();

        let err = locks
            .acquire(&key("p1"), &Deadline::after(Duration::from_millis(20)))
            .err()
            .unwrap();
        assert_eq!(err.code, ErrorCode::LockTimeout);
    }

    #[test]
    fn different_projects_do_not_contend() {
        let locks = ProjectLocks::new();
        let deadline = Deadline::after(Duration::from_millis(100));
        let _a = locks.acquire(&key("p1"), &deadline).unwrap();
        let _b = locks.acquire(&key("p2"), &deadline).unwrap();
        assert!(locks.is_locked(&key("p1")));
        assert!(locks.is_locked(&key("p2")));
    }

    #[test]
    fn waiter_proceeds_after_release() {
        let locks = Arc::new(ProjectLocks::new());
        let holder_done = Arc::new(AtomicBool::new(false));

        let guard = locks
            .acquire(&key("p1"), &Deadline::after(Duration::from_secs(1)))
            .unwrap();

        let waiter = {
            let locks = Arc::clone(&locks);
            let holder_done = Arc::clone(&holder_done);
            thread::spawn(move || {
                let _guard = locks
                    .acquire(&key("p1"), &Deadline::after(Duration::from_secs(5)))
                    .unwrap();
                // must only get here once the first holder let go
                holder_done.load(Ordering::SeqCst)
            })
        };

        thread::sleep(Duration::from_millis(30));
        holder_done.store(true, Ordering::SeqCst);
        drop(guard);

        assert!(waiter.join().unwrap());
        assert!(!locks.is_locked(&key("p1")));
    }

    #[test]
    fn deadline_expires() {
        let deadline = Deadline::after(Duration::from_millis(1));
        thread::sleep(Duration::from_millis(5));
        assert!(deadline.remaining().is_none());
        assert_eq!(deadline.check().unwrap_err().code, ErrorCode::DeadlineExceeded);
    }
}
