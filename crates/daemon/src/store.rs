use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use log::debug;
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};

use crate::error::StoreError;
use crate::job::{JobRecord, JobStatus, NewJob};

pub const STORE_PREFIX: &str = "profile_";
pub const STORE_EXTENSION: &str = "db";

/// The daemon and the UI may hold the same file open
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const COLUMNS: &str =
    "id, profile_id, channel_name, channel_url, start_time, end_time, status, program_name, created_at";

/// Profile hashes are limited to `[A-Za-z0-9_-]` so every store written can be discovered again
pub fn is_valid_profile_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Path of the store file for a profile hash
pub fn store_path(dir: &Path, profile_id: &str) -> Result<PathBuf, StoreError> {
    if !is_valid_profile_id(profile_id) {
        return Err(StoreError::InvalidProfileId(profile_id.to_string()));
    }
    Ok(dir.join(format!("{STORE_PREFIX}{profile_id}.{STORE_EXTENSION}")))
}

/// Scheduled recordings for a single profile, backed by one SQLite file.
///
/// Every method is a single statement, committed on return.
pub struct JobStore {
    conn: Connection,
    path: PathBuf,
}

impl JobStore {
    /// Open (creating if needed) the store at `path` and make sure the schema exists
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let open_err = |source: rusqlite::Error| StoreError::Open { path: path.clone(), source };

        let conn = Connection::open(&path).map_err(open_err)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(open_err)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS scheduled_recordings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                profile_id TEXT NOT NULL,
                channel_name TEXT NOT NULL,
                channel_url TEXT NOT NULL,
                start_time INTEGER NOT NULL,
                end_time INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                program_name TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_scheduled_recordings_status
                ON scheduled_recordings (status, start_time);
            ",
        )
        .map_err(open_err)?;

        debug!("Opened job store {}", path.display());
        Ok(Self { conn, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert a pending job; timestamps are stored as given
    pub fn add(&self, job: &NewJob) -> Result<i64, StoreError> {
        self.conn.execute(
            "
            INSERT INTO scheduled_recordings
                (profile_id, channel_name, channel_url, start_time, end_time, status, program_name, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ",
            params![
                job.profile_id,
                job.channel_name,
                job.channel_url,
                job.start_time,
                job.end_time,
                JobStatus::Pending.as_str(),
                job.program_name,
                Utc::now().timestamp(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get(&self, id: i64) -> Result<JobRecord, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM scheduled_recordings WHERE id = ?1");
        match self.conn.query_row(&sql, params![id], map_row) {
            Ok(job) => Ok(job),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(StoreError::NotFound(id)),
            Err(err) => Err(err.into()),
        }
    }

    /// Pending jobs whose start time has arrived
    pub fn list_due(&self, now: i64) -> Result<Vec<JobRecord>, StoreError> {
        self.query(
            "WHERE status = ?1 AND start_time <= ?2 ORDER BY start_time ASC",
            params![JobStatus::Pending.as_str(), now],
        )
    }

    /// Jobs currently marked as recording
    pub fn list_active(&self) -> Result<Vec<JobRecord>, StoreError> {
        self.query(
            "WHERE status = ?1 ORDER BY start_time ASC",
            params![JobStatus::Recording.as_str()],
        )
    }

    /// Recording jobs whose end time has passed
    pub fn list_expired(&self, now: i64) -> Result<Vec<JobRecord>, StoreError> {
        self.query(
            "WHERE status = ?1 AND end_time <= ?2 ORDER BY end_time ASC",
            params![JobStatus::Recording.as_str(), now],
        )
    }

    pub fn list_all(&self) -> Result<Vec<JobRecord>, StoreError> {
        self.query("ORDER BY start_time DESC, id DESC", params![])
    }

    /// Move a job to `status`, refusing any transition outside the lifecycle graph
    pub fn set_status(&self, id: i64, status: JobStatus) -> Result<(), StoreError> {
        let allowed = JobStatus::predecessors(status);
        if allowed.is_empty() {
            return Err(StoreError::InvalidTransition { id, to: status });
        }
        let in_list = allowed
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE scheduled_recordings SET status = ?1 WHERE id = ?2 AND status IN ({in_list})"
        );

        let changed = self.conn.execute(&sql, params![status.as_str(), id])?;
        if changed == 0 {
            // Distinguish a missing row from a rejected transition
            self.get(id)?;
            return Err(StoreError::InvalidTransition { id, to: status });
        }
        debug!("Job {} in {} -> {}", id, self.path.display(), status);
        Ok(())
    }

    pub fn delete(&self, id: i64) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute("DELETE FROM scheduled_recordings WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    fn query(&self, clause: &str, args: impl rusqlite::Params) -> Result<Vec<JobRecord>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM scheduled_recordings {clause}");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(args, map_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    let status: String = row.get(6)?;
    let status = status
        .parse::<JobStatus>()
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(err)))?;

    Ok(JobRecord {
        id: row.get(0)?,
        profile_id: row.get(1)?,
        channel_name: row.get(2)?,
        channel_url: row.get(3)?,
        start_time: row.get(4)?,
        end_time: row.get(5)?,
        status,
        program_name: row.get(7)?,
        created_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, JobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::open(store_path(dir.path(), "abc123").unwrap()).unwrap();
        (dir, store)
    }

    fn job(start: i64, end: i64) -> NewJob {
        NewJob::new("abc123", "Das Erste", "http://example.invalid/1.ts", start, end, Some("Tagesschau".into()))
    }

    #[test]
    fn store_path_follows_profile_pattern() {
        let path = store_path(Path::new("/cfg"), "9f8e").unwrap();
        assert_eq!(path, PathBuf::from("/cfg/profile_9f8e.db"));
    }

    #[test]
    fn store_path_rejects_undiscoverable_ids() {
        for id in ["", "alice.home", "a/b", "../x", "caf\u{e9}"] {
            assert!(
                matches!(store_path(Path::new("/cfg"), id), Err(StoreError::InvalidProfileId(_))),
                "{id:?} accepted"
            );
        }
        assert!(store_path(Path::new("/cfg"), "A-9_z").is_ok());
    }

    #[test]
    fn add_assigns_ids_and_starts_pending() {
        let (_dir, store) = open_temp();
        let a = store.add(&job(100, 200)).unwrap();
        let b = store.add(&job(300, 400)).unwrap();
        assert_ne!(a, b);

        let rec = store.get(a).unwrap();
        assert_eq!(rec.status, JobStatus::Pending);
        assert_eq!(rec.program_name.as_deref(), Some("Tagesschau"));
        assert_eq!((rec.start_time, rec.end_time), (100, 200));
    }

    #[test]
    fn due_and_expired_filters() {
        let (_dir, store) = open_temp();
        let due = store.add(&job(90, 150)).unwrap();
        let later = store.add(&job(500, 600)).unwrap();

        let listed: Vec<i64> = store.list_due(100).unwrap().iter().map(|j| j.id).collect();
        assert_eq!(listed, vec![due]);

        store.set_status(due, JobStatus::Recording).unwrap();
        assert!(store.list_due(100).unwrap().is_empty());
        assert_eq!(store.list_active().unwrap().len(), 1);
        assert!(store.list_expired(149).unwrap().is_empty());
        assert_eq!(store.list_expired(150).unwrap()[0].id, due);

        assert_eq!(store.list_all().unwrap().len(), 2);
        assert_eq!(store.get(later).unwrap().status, JobStatus::Pending);
    }

    #[test]
    fn set_status_rejects_backwards_transitions() {
        let (_dir, store) = open_temp();
        let id = store.add(&job(0, 10)).unwrap();

        assert!(matches!(
            store.set_status(id, JobStatus::Completed),
            Err(StoreError::InvalidTransition { .. })
        ));
        store.set_status(id, JobStatus::Recording).unwrap();
        store.set_status(id, JobStatus::Completed).unwrap();
        assert!(matches!(
            store.set_status(id, JobStatus::Failed),
            Err(StoreError::InvalidTransition { .. })
        ));
        assert!(matches!(
            store.set_status(id, JobStatus::Pending),
            Err(StoreError::InvalidTransition { .. })
        ));
        assert_eq!(store.get(id).unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn pending_can_fail_directly() {
        let (_dir, store) = open_temp();
        let id = store.add(&job(0, 10)).unwrap();
        store.set_status(id, JobStatus::Failed).unwrap();
        assert_eq!(store.get(id).unwrap().status, JobStatus::Failed);
    }

    #[test]
    fn missing_rows_report_not_found() {
        let (_dir, store) = open_temp();
        assert!(matches!(store.set_status(42, JobStatus::Recording), Err(StoreError::NotFound(42))));
        assert!(matches!(store.delete(42), Err(StoreError::NotFound(42))));
        assert!(matches!(store.get(42), Err(StoreError::NotFound(42))));
    }

    #[test]
    fn delete_removes_row() {
        let (_dir, store) = open_temp();
        let id = store.add(&job(0, 10)).unwrap();
        store.delete(id).unwrap();
        assert!(store.list_all().unwrap().is_empty());
    }

    #[test]
    fn two_handles_see_each_others_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_path(dir.path(), "shared").unwrap();
        let ui = JobStore::open(&path).unwrap();
        let daemon = JobStore::open(&path).unwrap();

        let id = ui.add(&job(0, 10)).unwrap();
        daemon.set_status(id, JobStatus::Recording).unwrap();
        assert_eq!(ui.get(id).unwrap().status, JobStatus::Recording);
    }

    #[test]
    fn corrupt_file_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_path(dir.path(), "broken").unwrap();
        std::fs::write(&path, vec![b'x'; 4096]).unwrap();

        assert!(matches!(JobStore::open(&path), Err(StoreError::Open { .. })));
    }
}
