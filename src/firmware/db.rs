use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::models::*;

/// Async-safe handle to the build database.
///
/// Wraps `BuildDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O
/// never ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<BuildDb>>,
}

impl DbHandle {
    pub fn new(db: BuildDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&BuildDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

/// Outcome of a dedup lookup.
#[derive(Debug, Clone)]
pub enum BuildLookup {
    /// A `BUILDING` or `DONE` record already covers this configuration.
    Existing(BuildRecord),
    /// A fresh `BUILDING` record was inserted.
    Created(BuildRecord),
}

impl BuildLookup {
    pub fn record(&self) -> &BuildRecord {
        match self {
            Self::Existing(record) | Self::Created(record) => record,
        }
    }
}

const BUILD_COLUMNS: &str = "id, fingerprint, release_id, status, build_config, firmware_files, \
                             message, created_at, updated_at";

pub struct BuildDb {
    conn: Connection,
}

impl BuildDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .busy_timeout(std::time::Duration::from_secs(5))
            .context("Failed to set busy timeout")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS builds (
                    id TEXT PRIMARY KEY,
                    fingerprint TEXT NOT NULL,
                    release_id TEXT NOT NULL,
                    owner TEXT NOT NULL,
                    repo TEXT NOT NULL,
                    version TEXT NOT NULL,
                    is_branch INTEGER NOT NULL DEFAULT 0,
                    status TEXT NOT NULL DEFAULT 'BUILDING',
                    build_config TEXT NOT NULL,
                    firmware_files TEXT NOT NULL DEFAULT '[]',
                    message TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_builds_fingerprint
                    ON builds(fingerprint, release_id);
                CREATE INDEX IF NOT EXISTS idx_builds_release
                    ON builds(owner, repo, version);
                CREATE UNIQUE INDEX IF NOT EXISTS idx_builds_single_building
                    ON builds(fingerprint, release_id) WHERE status = 'BUILDING';
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Builds ────────────────────────────────────────────────────────

    /// Return the live record for `(fingerprint, release_id)`, or insert a
    /// new `BUILDING` one. Lookup and insert share one transaction, so two
    /// concurrent submissions can never both create a record.
    pub fn create_or_reuse_build(
        &self,
        fingerprint: &str,
        release_id: &str,
        config: &BuildConfiguration,
    ) -> Result<BuildLookup> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        let existing = tx
            .query_row(
                &format!(
                    "SELECT {} FROM builds
                     WHERE fingerprint = ?1 AND release_id = ?2 AND status IN ('BUILDING', 'DONE')
                     ORDER BY CASE status WHEN 'BUILDING' THEN 0 ELSE 1 END, rowid DESC
                     LIMIT 1",
                    BUILD_COLUMNS
                ),
                params![fingerprint, release_id],
                row_to_build,
            )
            .optional()
            .context("Failed to look up existing build")?;

        if let Some(record) = existing {
            tx.commit().context("Failed to commit lookup")?;
            return Ok(BuildLookup::Existing(record));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let config_json =
            serde_json::to_string(config).context("Failed to serialize build configuration")?;
        tx.execute(
            "INSERT INTO builds (id, fingerprint, release_id, owner, repo, version, is_branch, status, build_config)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'BUILDING', ?8)",
            params![
                id,
                fingerprint,
                release_id,
                config.release.owner,
                config.release.repo,
                config.release.version,
                config.release.is_branch,
                config_json,
            ],
        )
        .context("Failed to insert build")?;
        tx.commit().context("Failed to commit build insert")?;

        let record = self
            .get_build(&id)?
            .context("Build not found after insert")?;
        Ok(BuildLookup::Created(record))
    }

    pub fn get_build(&self, id: &str) -> Result<Option<BuildRecord>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM builds WHERE id = ?1", BUILD_COLUMNS),
                params![id],
                row_to_build,
            )
            .optional()
            .context("Failed to query build")
    }

    pub fn list_done_builds(&self) -> Result<Vec<BuildRecord>> {
        self.query_builds(
            &format!(
                "SELECT {} FROM builds WHERE status = 'DONE' ORDER BY rowid",
                BUILD_COLUMNS
            ),
            params![],
        )
    }

    /// Move a `BUILDING` record to `DONE`. Returns `None` when the record is
    /// missing or already terminal; terminal records are never rewritten.
    pub fn complete_build(&self, id: &str, files: &[FirmwareFile]) -> Result<Option<BuildRecord>> {
        let files_json =
            serde_json::to_string(files).context("Failed to serialize firmware files")?;
        let rows = self
            .conn
            .execute(
                "UPDATE builds SET status = 'DONE', firmware_files = ?1, message = NULL,
                 updated_at = datetime('now') WHERE id = ?2 AND status = 'BUILDING'",
                params![files_json, id],
            )
            .context("Failed to complete build")?;
        if rows == 0 {
            return Ok(None);
        }
        self.get_build(id)
    }

    /// Move a `BUILDING` record to `FAILED`. Returns `None` when the record
    /// is missing or already terminal.
    pub fn fail_build(&self, id: &str, message: &str) -> Result<Option<BuildRecord>> {
        let rows = self
            .conn
            .execute(
                "UPDATE builds SET status = 'FAILED', message = ?1, updated_at = datetime('now')
                 WHERE id = ?2 AND status = 'BUILDING'",
                params![message, id],
            )
            .context("Failed to fail build")?;
        if rows == 0 {
            return Ok(None);
        }
        self.get_build(id)
    }

    /// Mark every `BUILDING` record as `FAILED`. Returns the number updated.
    pub fn fail_building_builds(&self, message: &str) -> Result<usize> {
        self.conn
            .execute(
                "UPDATE builds SET status = 'FAILED', message = ?1, updated_at = datetime('now')
                 WHERE status = 'BUILDING'",
                params![message],
            )
            .context("Failed to fail building builds")
    }

    /// Terminal records built from `branch` of `owner/repo`.
    pub fn list_builds_for_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<Vec<BuildRecord>> {
        self.query_builds(
            &format!(
                "SELECT {} FROM builds
                 WHERE owner = ?1 AND repo = ?2 AND version = ?3 AND is_branch = 1
                   AND status IN ('DONE', 'FAILED')
                 ORDER BY rowid",
                BUILD_COLUMNS
            ),
            params![owner, repo, branch],
        )
    }

    /// Returns whether a record was deleted.
    pub fn delete_build(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM builds WHERE id = ?1", params![id])
            .context("Failed to delete build")?;
        Ok(rows > 0)
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql).context("Failed to execute batch")
    }

    fn query_builds(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<BuildRecord>> {
        let mut stmt = self.conn.prepare(sql).context("Failed to prepare build query")?;
        let rows = stmt
            .query_map(params, row_to_build)
            .context("Failed to query builds")?;
        let mut builds = Vec::new();
        for row in rows {
            builds.push(row.context("Failed to read build row")?);
        }
        Ok(builds)
    }
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_build(row: &Row) -> rusqlite::Result<BuildRecord> {
    let status: String = row.get(3)?;
    let status = BuildStatus::from_str(&status).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })?;
    Ok(BuildRecord {
        id: row.get(0)?,
        fingerprint: row.get(1)?,
        release_id: row.get(2)?,
        status,
        build_config: json_column(row, 4)?,
        firmware_files: json_column(row, 5)?,
        message: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::normalize::normalize;
    use crate::firmware::release::ReleaseCatalog;

    fn config(board: BoardType, version: &str) -> BuildConfiguration {
        normalize(
            BuildRequest::for_board(
                board,
                ReleaseRequest {
                    owner: "SlimeVR".into(),
                    version: version.into(),
                    ..Default::default()
                },
            ),
            &ReleaseCatalog::default(),
        )
        .unwrap()
    }

    fn files() -> Vec<FirmwareFile> {
        vec![
            FirmwareFile {
                offset: 0x1000,
                url: "builds/x/firmware-part-0.bin".into(),
            },
            FirmwareFile {
                offset: 0x10000,
                url: "builds/x/firmware-part-1.bin".into(),
            },
        ]
    }

    #[test]
    fn test_create_database_and_run_migrations() -> Result<()> {
        let db = BuildDb::new_in_memory()?;
        // Running migrations twice must be harmless.
        db.run_migrations()?;
        assert!(db.list_done_builds()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_create_build() -> Result<()> {
        let db = BuildDb::new_in_memory()?;
        let cfg = config(BoardType::BoardWroom32, "main");
        let lookup = db.create_or_reuse_build("fp", "sha1", &cfg)?;
        let record = match lookup {
            BuildLookup::Created(record) => record,
            other => panic!("expected Created, got {:?}", other),
        };
        assert_eq!(record.status, BuildStatus::Building);
        assert_eq!(record.fingerprint, "fp");
        assert_eq!(record.release_id, "sha1");
        assert_eq!(record.build_config, cfg);
        assert!(record.firmware_files.is_empty());
        assert!(uuid::Uuid::parse_str(&record.id).is_ok());
        assert!(!record.created_at.is_empty());
        Ok(())
    }

    #[test]
    fn test_reuses_building_record() -> Result<()> {
        let db = BuildDb::new_in_memory()?;
        let cfg = config(BoardType::BoardWroom32, "main");
        let first = db.create_or_reuse_build("fp", "sha1", &cfg)?;
        let second = db.create_or_reuse_build("fp", "sha1", &cfg)?;
        assert!(matches!(second, BuildLookup::Existing(_)));
        assert_eq!(first.record().id, second.record().id);
        Ok(())
    }

    #[test]
    fn test_reuses_done_record_with_files() -> Result<()> {
        let db = BuildDb::new_in_memory()?;
        let cfg = config(BoardType::BoardWroom32, "main");
        let id = db.create_or_reuse_build("fp", "sha1", &cfg)?.record().id.clone();
        db.complete_build(&id, &files())?;

        let again = db.create_or_reuse_build("fp", "sha1", &cfg)?;
        match again {
            BuildLookup::Existing(record) => {
                assert_eq!(record.id, id);
                assert_eq!(record.status, BuildStatus::Done);
                assert_eq!(record.firmware_files, files());
            }
            other => panic!("expected Existing, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_failed_record_is_rebuilt() -> Result<()> {
        let db = BuildDb::new_in_memory()?;
        let cfg = config(BoardType::BoardWroom32, "main");
        let id = db.create_or_reuse_build("fp", "sha1", &cfg)?.record().id.clone();
        db.fail_build(&id, "Build failed: bad exit code")?;

        let again = db.create_or_reuse_build("fp", "sha1", &cfg)?;
        assert!(matches!(again, BuildLookup::Created(_)));
        assert_ne!(again.record().id, id);
        Ok(())
    }

    #[test]
    fn test_new_commit_creates_new_record() -> Result<()> {
        let db = BuildDb::new_in_memory()?;
        let cfg = config(BoardType::BoardWroom32, "main");
        let a = db.create_or_reuse_build("fp", "sha1", &cfg)?;
        let b = db.create_or_reuse_build("fp", "sha2", &cfg)?;
        assert!(matches!(b, BuildLookup::Created(_)));
        assert_ne!(a.record().id, b.record().id);
        Ok(())
    }

    #[test]
    fn test_single_building_index_is_enforced() -> Result<()> {
        let db = BuildDb::new_in_memory()?;
        let cfg = config(BoardType::BoardWroom32, "main");
        db.create_or_reuse_build("fp", "sha1", &cfg)?;
        let dup = db.conn.execute(
            "INSERT INTO builds (id, fingerprint, release_id, owner, repo, version, build_config)
             VALUES ('other', 'fp', 'sha1', 'o', 'r', 'v', '{}')",
            [],
        );
        assert!(dup.is_err());
        Ok(())
    }

    #[test]
    fn test_fail_build_sets_message() -> Result<()> {
        let db = BuildDb::new_in_memory()?;
        let cfg = config(BoardType::BoardWroom32, "main");
        let id = db.create_or_reuse_build("fp", "sha1", &cfg)?.record().id.clone();
        let failed = db.fail_build(&id, "boom")?.unwrap();
        assert_eq!(failed.status, BuildStatus::Failed);
        assert_eq!(failed.message.as_deref(), Some("boom"));
        Ok(())
    }

    #[test]
    fn test_done_record_is_never_failed() -> Result<()> {
        let db = BuildDb::new_in_memory()?;
        let cfg = config(BoardType::BoardWroom32, "main");
        let id = db.create_or_reuse_build("fp", "sha1", &cfg)?.record().id.clone();
        assert!(db.complete_build(&id, &files())?.is_some());

        assert!(db.fail_build(&id, "Build interrupted by server shutdown")?.is_none());
        let record = db.get_build(&id)?.unwrap();
        assert_eq!(record.status, BuildStatus::Done);
        assert_eq!(record.firmware_files, files());
        assert!(record.message.is_none());
        Ok(())
    }

    #[test]
    fn test_failed_record_is_never_completed() -> Result<()> {
        let db = BuildDb::new_in_memory()?;
        let cfg = config(BoardType::BoardWroom32, "main");
        let id = db.create_or_reuse_build("fp", "sha1", &cfg)?.record().id.clone();
        db.fail_build(&id, "boom")?;

        assert!(db.complete_build(&id, &files())?.is_none());
        let record = db.get_build(&id)?.unwrap();
        assert_eq!(record.status, BuildStatus::Failed);
        assert!(record.firmware_files.is_empty());
        assert!(db.complete_build("missing", &files())?.is_none());
        Ok(())
    }

    #[test]
    fn test_fail_building_builds() -> Result<()> {
        let db = BuildDb::new_in_memory()?;
        let cfg = config(BoardType::BoardWroom32, "main");
        let a = db.create_or_reuse_build("fp-a", "sha1", &cfg)?.record().id.clone();
        let b = db.create_or_reuse_build("fp-b", "sha1", &cfg)?.record().id.clone();
        db.complete_build(&b, &files())?;

        let updated = db.fail_building_builds("interrupted")?;
        assert_eq!(updated, 1);
        let a = db.get_build(&a)?.unwrap();
        assert_eq!(a.status, BuildStatus::Failed);
        assert_eq!(a.message.as_deref(), Some("interrupted"));
        assert_eq!(db.get_build(&b)?.unwrap().status, BuildStatus::Done);
        Ok(())
    }

    #[test]
    fn test_list_done_builds() -> Result<()> {
        let db = BuildDb::new_in_memory()?;
        let cfg = config(BoardType::BoardWroom32, "main");
        let a = db.create_or_reuse_build("fp-a", "sha1", &cfg)?.record().id.clone();
        db.create_or_reuse_build("fp-b", "sha1", &cfg)?;
        db.complete_build(&a, &files())?;

        let done = db.list_done_builds()?;
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].id, a);
        Ok(())
    }

    #[test]
    fn test_list_builds_for_branch() -> Result<()> {
        let db = BuildDb::new_in_memory()?;
        let branch = config(BoardType::BoardWroom32, "main");
        let tag = config(BoardType::BoardWroom32, "v0.4.0");
        assert!(branch.release.is_branch);
        assert!(!tag.release.is_branch);

        let done = db.create_or_reuse_build("fp-a", "sha1", &branch)?.record().id.clone();
        db.complete_build(&done, &files())?;
        // Still building: never returned.
        db.create_or_reuse_build("fp-b", "sha1", &branch)?;
        let tagged = db.create_or_reuse_build("fp-c", "v0.4.0", &tag)?.record().id.clone();
        db.complete_build(&tagged, &files())?;

        let records = db.list_builds_for_branch("SlimeVR", "SlimeVR-Tracker-ESP", "main")?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, done);
        assert!(
            db.list_builds_for_branch("SlimeVR", "SlimeVR-Tracker-ESP", "v0.4.0")?
                .is_empty()
        );
        Ok(())
    }

    #[test]
    fn test_delete_build() -> Result<()> {
        let db = BuildDb::new_in_memory()?;
        let cfg = config(BoardType::BoardWroom32, "main");
        let id = db.create_or_reuse_build("fp", "sha1", &cfg)?.record().id.clone();
        assert!(db.delete_build(&id)?);
        assert!(db.get_build(&id)?.is_none());
        assert!(!db.delete_build(&id)?);
        Ok(())
    }

    #[tokio::test]
    async fn test_db_handle_call() -> Result<()> {
        let handle = DbHandle::new(BuildDb::new_in_memory()?);
        let cfg = config(BoardType::BoardWroom32, "main");
        let lookup = handle
            .call(move |db| db.create_or_reuse_build("fp", "sha1", &cfg))
            .await?;
        let id = lookup.record().id.clone();
        let fetched = handle.call(move |db| db.get_build(&id)).await?;
        assert!(fetched.is_some());
        Ok(())
    }
}
