// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job history backed by SQLite.
//
// Stores job metadata only; document bytes live with the dispatch task and
// are referenced here by their SHA-256 hash. In-memory by default, so
// history does not survive a restart unless a file path is configured.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tracing::{debug, info, instrument, warn};

use printbridge_core::error::{PrintBridgeError, Result};
use printbridge_core::{
    DocumentType, FailureKind, JobFailure, JobId, JobState, PrintJob, PrintOptions, PrinterId,
};

/// SQLite schema for the jobs table.
const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        printer_id TEXT NOT NULL,
        document_type TEXT NOT NULL,
        document_hash TEXT NOT NULL,
        document_len INTEGER NOT NULL,
        options TEXT NOT NULL,
        state TEXT NOT NULL,
        failure_kind TEXT,
        failure_reason TEXT,
        remote_job_id TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
"#;

const SELECT_COLUMNS: &str = "SELECT id, printer_id, document_type, document_hash, document_len,
        options, state, failure_kind, failure_reason, remote_job_id, created_at, updated_at
        FROM jobs";

/// Job history store.
///
/// All methods are synchronous because `rusqlite` does not support async
/// natively. Statements are short single-row operations.
pub struct JobQueue {
    conn: Connection,
}

impl JobQueue {
    /// Open (or create) the history database at the given path.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| PrintBridgeError::Database(format!("open: {e}")))?;

        // WAL survives unclean shutdowns more gracefully.
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| PrintBridgeError::Database(format!("WAL pragma: {e}")))?;

        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| PrintBridgeError::Database(format!("create table: {e}")))?;

        info!("job history database opened");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| PrintBridgeError::Database(format!("open in-memory: {e}")))?;

        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| PrintBridgeError::Database(format!("create table: {e}")))?;

        debug!("in-memory job history opened");
        Ok(Self { conn })
    }

    #[instrument(skip(self, job), fields(job_id = %job.id))]
    pub fn insert_job(&self, job: &PrintJob) -> Result<()> {
        let failure = job.failure.as_ref();
        self.conn
            .execute(
                "INSERT INTO jobs (id, printer_id, document_type, document_hash, document_len,
                 options, state, failure_kind, failure_reason, remote_job_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    job.id.to_string(),
                    job.printer_id.as_str(),
                    serde_json::to_string(&job.document_type)?,
                    job.document_hash,
                    job.document_len as i64,
                    serde_json::to_string(&job.options)?,
                    serde_json::to_string(&job.state)?,
                    failure.map(|f| serde_json::to_string(&f.kind)).transpose()?,
                    failure.map(|f| f.reason.as_str()),
                    job.remote_job_id,
                    job.created_at.to_rfc3339(),
                    job.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| PrintBridgeError::Database(format!("insert job: {e}")))?;

        debug!("job recorded");
        Ok(())
    }

    /// Move a job to `next`, enforcing the forward-only state machine.
    ///
    /// A failure reason is stored only when `next` is `Failed`.
    #[instrument(skip(self, failure), fields(job_id = %job_id, next = next.as_str()))]
    pub fn transition(
        &self,
        job_id: &JobId,
        next: JobState,
        failure: Option<&JobFailure>,
    ) -> Result<PrintJob> {
        let mut job = self
            .get_job(job_id)?
            .ok_or_else(|| PrintBridgeError::NotFound(format!("job {job_id}")))?;

        if !job.state.can_transition_to(next) {
            return Err(PrintBridgeError::InvalidTransition(format!(
                "job {job_id}: {} -> {}",
                job.state.as_str(),
                next.as_str()
            )));
        }

        job.state = next;
        job.updated_at = Utc::now();
        if next == JobState::Failed {
            job.failure = failure.cloned();
        }

        let failure = job.failure.as_ref();
        self.conn
            .execute(
                "UPDATE jobs SET state = ?1, failure_kind = ?2, failure_reason = ?3,
                 updated_at = ?4 WHERE id = ?5",
                params![
                    serde_json::to_string(&job.state)?,
                    failure.map(|f| serde_json::to_string(&f.kind)).transpose()?,
                    failure.map(|f| f.reason.as_str()),
                    job.updated_at.to_rfc3339(),
                    job_id.to_string(),
                ],
            )
            .map_err(|e| PrintBridgeError::Database(format!("update state: {e}")))?;

        Ok(job)
    }

    pub fn set_remote_job_id(&self, job_id: &JobId, remote_job_id: &str) -> Result<()> {
        let rows = self
            .conn
            .execute(
                "UPDATE jobs SET remote_job_id = ?1 WHERE id = ?2",
                params![remote_job_id, job_id.to_string()],
            )
            .map_err(|e| PrintBridgeError::Database(format!("update remote id: {e}")))?;
        if rows == 0 {
            return Err(PrintBridgeError::NotFound(format!("job {job_id}")));
        }
        Ok(())
    }

    /// Returns `None` if the job does not exist.
    pub fn get_job(&self, job_id: &JobId) -> Result<Option<PrintJob>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
            .map_err(|e| PrintBridgeError::Database(format!("prepare get_job: {e}")))?;

        let mut rows = stmt
            .query_map(params![job_id.to_string()], row_to_print_job)
            .map_err(|e| PrintBridgeError::Database(format!("query get_job: {e}")))?;

        match rows.next() {
            Some(Ok(job)) => Ok(Some(job)),
            Some(Err(e)) => Err(PrintBridgeError::Database(format!("row parse: {e}"))),
            None => Ok(None),
        }
    }

    /// All jobs, newest first.
    pub fn get_all_jobs(&self) -> Result<Vec<PrintJob>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_COLUMNS} ORDER BY created_at DESC"))
            .map_err(|e| PrintBridgeError::Database(format!("prepare get_all_jobs: {e}")))?;

        let jobs = stmt
            .query_map([], row_to_print_job)
            .map_err(|e| PrintBridgeError::Database(format!("query get_all_jobs: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| PrintBridgeError::Database(format!("collect rows: {e}")))?;

        Ok(jobs)
    }

    /// Delete terminal jobs last updated before `cutoff`.
    #[instrument(skip(self))]
    pub fn prune_terminal(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM jobs WHERE state IN (?1, ?2) AND updated_at < ?3",
                params![
                    serde_json::to_string(&JobState::Completed)?,
                    serde_json::to_string(&JobState::Failed)?,
                    cutoff.to_rfc3339(),
                ],
            )
            .map_err(|e| PrintBridgeError::Database(format!("prune: {e}")))?;

        if removed > 0 {
            debug!(removed, "expired jobs pruned");
        }
        Ok(removed)
    }

    /// Fail every job left mid-pipeline by a previous process. The printer
    /// may or may not have printed, so none of them can be trusted.
    #[instrument(skip(self))]
    pub fn fail_interrupted(&self) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let failed = self
            .conn
            .execute(
                "UPDATE jobs SET state = ?1, failure_kind = ?2, failure_reason = ?3,
                 updated_at = ?4 WHERE state NOT IN (?1, ?5)",
                params![
                    serde_json::to_string(&JobState::Failed)?,
                    serde_json::to_string(&FailureKind::Internal)?,
                    "interrupted by restart",
                    now,
                    serde_json::to_string(&JobState::Completed)?,
                ],
            )
            .map_err(|e| PrintBridgeError::Database(format!("fail interrupted: {e}")))?;

        if failed > 0 {
            warn!(failed, "jobs interrupted by restart marked failed");
        }
        Ok(failed)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn json_column<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn time_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Column indices follow `SELECT_COLUMNS`.
fn row_to_print_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<PrintJob> {
    let id_str: String = row.get(0)?;
    let id = JobId::parse(&id_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("bad job id {id_str}").into(),
        )
    })?;
    let printer_id: String = row.get(1)?;
    let document_type: DocumentType = json_column(row, 2)?;
    let document_hash: String = row.get(3)?;
    let document_len: i64 = row.get(4)?;
    let options: PrintOptions = json_column(row, 5)?;
    let state: JobState = json_column(row, 6)?;

    let failure_kind: Option<String> = row.get(7)?;
    let failure_reason: Option<String> = row.get(8)?;
    let failure = match failure_kind {
        Some(kind) => Some(JobFailure {
            kind: serde_json::from_str(&kind).unwrap_or(FailureKind::Internal),
            reason: failure_reason.unwrap_or_default(),
        }),
        None => None,
    };

    Ok(PrintJob {
        id,
        printer_id: PrinterId(printer_id),
        document_type,
        document_hash,
        document_len: document_len as u64,
        options,
        state,
        failure,
        remote_job_id: row.get(9)?,
        created_at: time_column(row, 10)?,
        updated_at: time_column(row, 11)?,
    })
}
