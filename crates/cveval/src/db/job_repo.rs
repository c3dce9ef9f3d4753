//! Job repository: CRUD operations for the `jobs` table.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database. `result` holds the serialized
/// evaluation result.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub job_title: String,
    pub cv_id: String,
    pub project_report_id: String,
    pub status: String,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_title: row.get("job_title")?,
            cv_id: row.get("cv_id")?,
            project_report_id: row.get("project_report_id")?,
            status: row.get("status")?,
            result: row.get("result")?,
            error: row.get("error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Outcome of a guarded status write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// The row exists but is already `completed` or `failed`.
    Terminal,
    Missing,
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, job_title, cv_id, project_report_id, status, result, error,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                job.id,
                job.job_title,
                job.cv_id,
                job.project_report_id,
                job.status,
                job.result,
                job.error,
                job.created_at,
                job.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row("SELECT * FROM jobs WHERE id = ?1", params![id], JobRow::from_row)
            .optional()?;
        Ok(row)
    })
}

/// Overwrites status, result, error and updated_at unless the job is
/// already terminal. Terminal rows are left untouched.
pub fn write_status(
    db: &Database,
    id: &str,
    status: &str,
    result: Option<&str>,
    error: Option<&str>,
    updated_at: &str,
) -> Result<WriteOutcome, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = ?2, result = ?3, error = ?4, updated_at = ?5
             WHERE id = ?1 AND status NOT IN ('completed', 'failed')",
            params![id, status, result, error, updated_at],
        )?;
        if changed > 0 {
            return Ok(WriteOutcome::Written);
        }

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM jobs WHERE id = ?1)",
            params![id],
            |r| r.get(0),
        )?;
        Ok(if exists {
            WriteOutcome::Terminal
        } else {
            WriteOutcome::Missing
        })
    })
}
