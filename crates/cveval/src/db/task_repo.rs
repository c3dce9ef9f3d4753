//! Task repository: the durable backing of the work queue.
//!
//! A task moves `waiting -> active -> completed | failed`, and back from
//! `active` to `waiting` when a failed attempt is scheduled for redelivery.
//! Every mutation of an active task is conditioned on its lease token so a
//! worker whose lease expired cannot touch the newer delivery.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

#[derive(Debug, Clone)]
pub struct TaskRow {
    pub id: String,
    pub queue: String,
    pub job_id: String,
    pub payload: String,
    pub state: String,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub available_at: String,
    pub lease_token: Option<String>,
    pub lease_expires_at: Option<String>,
    pub worker_id: Option<String>,
    pub last_error: Option<String>,
    pub created_at: String,
    pub finished_at: Option<String>,
}

impl TaskRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            queue: row.get("queue")?,
            job_id: row.get("job_id")?,
            payload: row.get("payload")?,
            state: row.get("state")?,
            attempts_made: row.get("attempts_made")?,
            max_attempts: row.get("max_attempts")?,
            available_at: row.get("available_at")?,
            lease_token: row.get("lease_token")?,
            lease_expires_at: row.get("lease_expires_at")?,
            worker_id: row.get("worker_id")?,
            last_error: row.get("last_error")?,
            created_at: row.get("created_at")?,
            finished_at: row.get("finished_at")?,
        })
    }
}

/// Per-state totals for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

pub fn insert(db: &Database, task: &TaskRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO tasks (id, queue, job_id, payload, state, attempts_made, max_attempts,
             available_at, lease_token, lease_expires_at, worker_id, last_error, created_at,
             finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                task.id,
                task.queue,
                task.job_id,
                task.payload,
                task.state,
                task.attempts_made,
                task.max_attempts,
                task.available_at,
                task.lease_token,
                task.lease_expires_at,
                task.worker_id,
                task.last_error,
                task.created_at,
                task.finished_at,
            ],
        )?;
        Ok(())
    })
}

#[cfg(test)]
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<TaskRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row("SELECT * FROM tasks WHERE id = ?1", params![id], TaskRow::from_row)
            .optional()?;
        Ok(row)
    })
}

/// Atomically moves the oldest due waiting task to `active` under a new
/// lease and bumps its attempt counter.
pub fn claim_next(
    db: &Database,
    queue: &str,
    worker_id: &str,
    lease_token: &str,
    now: &str,
    lease_expires_at: &str,
) -> Result<Option<TaskRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "UPDATE tasks
                 SET state = 'active', attempts_made = attempts_made + 1, lease_token = ?3,
                     lease_expires_at = ?5, worker_id = ?2
                 WHERE id = (
                     SELECT id FROM tasks
                     WHERE queue = ?1 AND state = 'waiting' AND available_at <= ?4
                     ORDER BY available_at, created_at
                     LIMIT 1
                 )
                 RETURNING *",
                params![queue, worker_id, lease_token, now, lease_expires_at],
                TaskRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Active tasks whose lease ran out before `now`.
pub fn expired_leases(db: &Database, queue: &str, now: &str) -> Result<Vec<TaskRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM tasks
             WHERE queue = ?1 AND state = 'active' AND lease_expires_at < ?2
             ORDER BY lease_expires_at",
        )?;
        let rows = stmt
            .query_map(params![queue, now], TaskRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Marks an active task completed. Returns false when the lease is stale.
pub fn mark_completed(
    db: &Database,
    id: &str,
    lease_token: &str,
    finished_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE tasks
             SET state = 'completed', finished_at = ?3, lease_token = NULL,
                 lease_expires_at = NULL
             WHERE id = ?1 AND state = 'active' AND lease_token = ?2",
            params![id, lease_token, finished_at],
        )?;
        Ok(changed > 0)
    })
}

/// Pushes the lease of an active task out to `lease_expires_at`. Returns
/// false when the lease is stale.
pub fn extend_lease(
    db: &Database,
    id: &str,
    lease_token: &str,
    lease_expires_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE tasks SET lease_expires_at = ?3
             WHERE id = ?1 AND state = 'active' AND lease_token = ?2",
            params![id, lease_token, lease_expires_at],
        )?;
        Ok(changed > 0)
    })
}

/// Puts an active task back to `waiting`, due at `available_at`.
pub fn reschedule(
    db: &Database,
    id: &str,
    lease_token: &str,
    available_at: &str,
    error: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE tasks
             SET state = 'waiting', available_at = ?3, last_error = ?4, lease_token = NULL,
                 lease_expires_at = NULL, worker_id = NULL
             WHERE id = ?1 AND state = 'active' AND lease_token = ?2",
            params![id, lease_token, available_at, error],
        )?;
        Ok(changed > 0)
    })
}

/// Moves an active task to the dead `failed` state.
pub fn mark_failed(
    db: &Database,
    id: &str,
    lease_token: &str,
    error: &str,
    finished_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE tasks
             SET state = 'failed', last_error = ?3, finished_at = ?4, lease_token = NULL,
                 lease_expires_at = NULL
             WHERE id = ?1 AND state = 'active' AND lease_token = ?2",
            params![id, lease_token, error, finished_at],
        )?;
        Ok(changed > 0)
    })
}

/// Deletes all but the `keep` most recently finished tasks in `state`.
/// Returns the number of rows removed.
pub fn prune_finished(
    db: &Database,
    queue: &str,
    state: &str,
    keep: u32,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let removed = conn.execute(
            "DELETE FROM tasks
             WHERE queue = ?1 AND state = ?2 AND id NOT IN (
                 SELECT id FROM tasks
                 WHERE queue = ?1 AND state = ?2
                 ORDER BY finished_at DESC, created_at DESC
                 LIMIT ?3
             )",
            params![queue, state, keep],
        )?;
        Ok(removed)
    })
}

pub fn count_by_state(db: &Database, queue: &str) -> Result<StateCounts, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT state, COUNT(*) FROM tasks WHERE queue = ?1 GROUP BY state")?;
        let mut counts = StateCounts::default();
        let rows = stmt.query_map(params![queue], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, u64>(1)?))
        })?;
        for row in rows {
            let (state, n) = row?;
            match state.as_str() {
                "waiting" => counts.waiting = n,
                "active" => counts.active = n,
                "completed" => counts.completed = n,
                "failed" => counts.failed = n,
                other => log::warn!("Unknown task state '{}' in queue {}", other, queue),
            }
        }
        Ok(counts)
    })
}
