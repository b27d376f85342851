//! SQLite-backed workspace store.
//!
//! One workspace is one SQLite file holding the scanned file records, the
//! configured scan roots and a summary row. The connection sits behind a
//! mutex, which makes the store the single logical writer: concurrent callers
//! queue on the lock and batch writes are applied in one transaction.
//!
//! # Schema versions
//!
//! `PRAGMA user_version` tracks the schema. Version 0 files written by the
//! earlier tool (`xxhash`/`md5` columns) are migrated in place on open; files
//! from a newer version are refused as [`StoreError::Corrupt`].

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use super::entry::{parse_timestamp, DirectoryEntry, FileRecord, FileStatus, WorkspaceStats};

/// Current schema version written to `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// Columns every `files` table must have after initialisation.
const REQUIRED_FILE_COLUMNS: [&str; 6] = [
    "path",
    "size",
    "modified",
    "fingerprint",
    "confirm_hash",
    "status",
];

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS files (
        id INTEGER PRIMARY KEY,
        path TEXT UNIQUE NOT NULL,
        size INTEGER NOT NULL,
        modified INTEGER NOT NULL,
        fingerprint TEXT,
        confirm_hash TEXT,
        status TEXT NOT NULL DEFAULT 'present',
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    );
    CREATE TABLE IF NOT EXISTS workspace_config (
        key TEXT PRIMARY KEY,
        value TEXT
    );
    CREATE TABLE IF NOT EXISTS workspace_metadata (
        id INTEGER PRIMARY KEY,
        workspace_name TEXT,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        last_scan TIMESTAMP,
        total_files INTEGER DEFAULT 0,
        total_size INTEGER DEFAULT 0,
        duplicate_groups INTEGER DEFAULT 0
    );
    CREATE TABLE IF NOT EXISTS workspace_directories (
        id INTEGER PRIMARY KEY,
        directory_path TEXT,
        added_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        last_scanned TIMESTAMP
    );
";

const INDEXES: &str = "
    CREATE INDEX IF NOT EXISTS idx_files_fingerprint ON files(fingerprint);
    CREATE INDEX IF NOT EXISTS idx_files_confirm_hash ON files(confirm_hash);
    CREATE INDEX IF NOT EXISTS idx_files_size ON files(size);
";

const UPSERT_FILE: &str = "
    INSERT INTO files (path, size, modified, fingerprint, confirm_hash, status)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
    ON CONFLICT(path) DO UPDATE SET
        size = excluded.size,
        modified = excluded.modified,
        fingerprint = excluded.fingerprint,
        confirm_hash = excluded.confirm_hash,
        status = excluded.status";

const SELECT_FILES: &str =
    "SELECT path, size, modified, fingerprint, confirm_hash, status FROM files";

/// Errors that can occur in workspace storage.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// The workspace file does not exist.
    #[error("Workspace not found: {0}")]
    NotFound(PathBuf),

    /// The file is not a workspace this program can read.
    #[error("Workspace is corrupt or incompatible: {0}")]
    Corrupt(String),

    /// SQLite reported an error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Filesystem error around the workspace file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored JSON value could not be read or written.
    #[error("Invalid JSON value: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for workspace storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Map SQLite's "this is not a database" codes onto [`StoreError::Corrupt`].
fn classify(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, msg)
            if matches!(e.code, ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt) =>
        {
            StoreError::Corrupt(msg.clone().unwrap_or_else(|| e.to_string()))
        }
        _ => StoreError::Database(err),
    }
}

fn to_sql_size(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

fn from_sql_size(size: Option<i64>) -> u64 {
    size.and_then(|s| u64::try_from(s).ok()).unwrap_or(0)
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let path: String = row.get(0)?;
    let status: Option<String> = row.get(5)?;
    Ok(FileRecord {
        path: PathBuf::from(path),
        size: from_sql_size(row.get(1)?),
        modified: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
        fingerprint: row.get(3)?,
        confirm_hash: row.get(4)?,
        status: FileStatus::parse(status.as_deref()),
    })
}

fn read_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    Ok(row
        .get::<_, Option<String>>(idx)?
        .as_deref()
        .and_then(parse_timestamp))
}

fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
    let columns = stmt
        .query_map([table], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(columns)
}

/// Persistent store for one workspace.
pub struct WorkspaceStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    name: String,
}

impl std::fmt::Debug for WorkspaceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceStore")
            .field("path", &self.path)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl WorkspaceStore {
    /// Create a workspace at `path`, or open it if it already exists.
    ///
    /// Schema creation is idempotent; missing parent directories are created.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] if `path` exists but is not a readable
    /// workspace.
    pub fn create(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Self::connect(path)
    }

    /// Open an existing workspace.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if nothing exists at `path` and
    /// [`StoreError::Corrupt`] if the file is not a readable workspace.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if !path.exists() {
            return Err(StoreError::NotFound(path.to_path_buf()));
        }
        Self::connect(path)
    }

    /// Open a private in-memory workspace.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
            name: "in-memory".to_string(),
        })
    }

    fn connect(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path).map_err(classify)?;
        Self::initialize(&conn)?;
        let name = path
            .file_stem()
            .map_or_else(|| path_text(path), |s| s.to_string_lossy().into_owned());
        log::debug!("Opened workspace {} ({})", name, path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
            name,
        })
    }

    fn initialize(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(classify)?;

        let version: i64 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .map_err(classify)?;
        if version > SCHEMA_VERSION {
            return Err(StoreError::Corrupt(format!(
                "schema version {version} is newer than supported version {SCHEMA_VERSION}"
            )));
        }

        let tx = conn.unchecked_transaction()?;
        if version == 0 {
            let columns = table_columns(&tx, "files")?;
            if columns.iter().any(|c| c == "xxhash") {
                Self::migrate_legacy(&tx, &columns)?;
            }
        }
        tx.execute_batch(SCHEMA)?;

        let columns = table_columns(&tx, "files")?;
        if let Some(missing) = REQUIRED_FILE_COLUMNS
            .iter()
            .find(|required| !columns.iter().any(|c| c == *required))
        {
            return Err(StoreError::Corrupt(format!(
                "files table has no '{missing}' column"
            )));
        }
        tx.execute_batch(INDEXES)?;

        tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        tx.commit()?;
        Ok(())
    }

    /// Rename the version-0 hash columns. Old MD5 confirmations are dropped
    /// because confirmation now uses a different hash.
    fn migrate_legacy(conn: &Connection, columns: &[String]) -> StoreResult<()> {
        log::info!("Migrating legacy workspace schema to version {}", SCHEMA_VERSION);
        conn.execute_batch(
            "DROP INDEX IF EXISTS idx_files_xxhash;
             DROP INDEX IF EXISTS idx_files_md5;
             ALTER TABLE files RENAME COLUMN xxhash TO fingerprint;",
        )?;
        if columns.iter().any(|c| c == "md5") {
            conn.execute_batch(
                "ALTER TABLE files RENAME COLUMN md5 TO confirm_hash;
                 UPDATE files SET confirm_hash = NULL;",
            )?;
        } else if !columns.iter().any(|c| c == "confirm_hash") {
            conn.execute_batch("ALTER TABLE files ADD COLUMN confirm_hash TEXT;")?;
        }
        conn.execute_batch("UPDATE files SET status = 'present' WHERE status IS NULL;")?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Filesystem location, `None` for in-memory stores.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Display name derived from the file name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert or fully replace the record for `record.path`.
    pub fn upsert_file(&self, record: &FileRecord) -> StoreResult<()> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(UPSERT_FILE)?;
        stmt.execute(params![
            path_text(&record.path),
            to_sql_size(record.size),
            record.modified,
            record.fingerprint,
            record.confirm_hash,
            record.status.as_str(),
        ])?;
        Ok(())
    }

    /// Upsert many records in a single transaction.
    ///
    /// Either every record is written or none is.
    pub fn upsert_files(&self, records: &[FileRecord]) -> StoreResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        write_records(&tx, records)?;
        tx.commit()?;
        log::trace!("Committed {} file records", records.len());
        Ok(records.len())
    }

    /// Replace the whole file table with `records` in a single transaction.
    ///
    /// A full rescan publishes its results this way, so the previous records
    /// stay intact until the new set is complete.
    pub fn replace_files(&self, records: &[FileRecord]) -> StoreResult<usize> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM files", [])?;
        write_records(&tx, records)?;
        tx.commit()?;
        log::debug!(
            "Replaced {} file records with {}",
            removed,
            records.len()
        );
        Ok(records.len())
    }

    /// Look up one record by path.
    pub fn get_file(&self, path: &Path) -> StoreResult<Option<FileRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(&format!("{SELECT_FILES} WHERE path = ?1"))?;
        Ok(stmt
            .query_row([path_text(path)], row_to_record)
            .optional()?)
    }

    /// Every stored record, in no particular order.
    pub fn get_all_files(&self) -> StoreResult<Vec<FileRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(SELECT_FILES)?;
        let records = stmt
            .query_map([], row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Number of stored records, including missing ones.
    pub fn file_count(&self) -> StoreResult<u64> {
        let conn = self.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        Ok(from_sql_size(Some(count)))
    }

    /// Delete every file record.
    pub fn clear_files(&self) -> StoreResult<()> {
        let conn = self.lock();
        let removed = conn.execute("DELETE FROM files", [])?;
        log::debug!("Cleared {} file records", removed);
        Ok(())
    }

    /// Mark records under `roots` whose path is not in `seen` as missing.
    ///
    /// Records directly inside an `unlisted` folder are left alone, since
    /// their absence from `seen` says nothing about the files.
    ///
    /// Returns the number of records that changed state.
    pub fn mark_missing(
        &self,
        roots: &[PathBuf],
        seen: &HashSet<PathBuf>,
        unlisted: &[PathBuf],
    ) -> StoreResult<usize> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let stale: Vec<String> = {
            let mut stmt = tx.prepare("SELECT path FROM files WHERE status != 'missing'")?;
            let paths = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            paths
                .into_iter()
                .filter(|p| {
                    let path = Path::new(p);
                    roots.iter().any(|root| path.starts_with(root))
                        && !seen.contains(path)
                        && !path
                            .parent()
                            .is_some_and(|dir| unlisted.iter().any(|u| u == dir))
                })
                .collect()
        };
        {
            let mut stmt = tx.prepare("UPDATE files SET status = 'missing' WHERE path = ?1")?;
            for path in &stale {
                stmt.execute([path])?;
            }
        }
        tx.commit()?;
        if !stale.is_empty() {
            log::info!("Marked {} vanished files as missing", stale.len());
        }
        Ok(stale.len())
    }

    /// Replace the list of scan roots.
    ///
    /// Roots that were already configured keep their added/scanned stamps.
    pub fn save_directories(&self, directories: &[PathBuf]) -> StoreResult<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let existing: HashMap<String, (Option<String>, Option<String>)> = {
            let mut stmt = tx.prepare(
                "SELECT directory_path, added_at, last_scanned FROM workspace_directories",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, (row.get(1)?, row.get(2)?)))
                })?
                .collect::<rusqlite::Result<HashMap<_, _>>>()?;
            rows
        };

        tx.execute("DELETE FROM workspace_directories", [])?;
        {
            let now = Utc::now().to_rfc3339();
            let mut stmt = tx.prepare(
                "INSERT INTO workspace_directories (directory_path, added_at, last_scanned)
                 VALUES (?1, ?2, ?3)",
            )?;
            for dir in directories {
                let key = path_text(dir);
                let (added_at, last_scanned) = existing
                    .get(&key)
                    .cloned()
                    .unwrap_or_else(|| (Some(now.clone()), None));
                stmt.execute(params![key, added_at.unwrap_or_else(|| now.clone()), last_scanned])?;
            }
        }
        tx.commit()?;
        log::debug!("Saved {} scan roots", directories.len());
        Ok(())
    }

    /// Configured scan roots in the order they were added.
    ///
    /// When none are stored, a directory list from the legacy
    /// `workspace_config` entry is read and copied into the current table.
    /// The legacy entry itself is never written.
    pub fn load_directories(&self) -> StoreResult<Vec<PathBuf>> {
        let dirs = self.directory_entries()?;
        if !dirs.is_empty() {
            return Ok(dirs.into_iter().map(|d| d.path).collect());
        }

        let legacy: Option<String> = {
            let conn = self.lock();
            conn.query_row(
                "SELECT value FROM workspace_config WHERE key = 'directories'",
                [],
                |row| row.get(0),
            )
            .optional()?
        };
        let Some(blob) = legacy else {
            return Ok(Vec::new());
        };
        let dirs: Vec<PathBuf> = serde_json::from_str::<Vec<String>>(&blob)?
            .into_iter()
            .map(PathBuf::from)
            .collect();
        if !dirs.is_empty() {
            log::info!("Migrating {} scan roots from legacy configuration", dirs.len());
            self.save_directories(&dirs)?;
        }
        Ok(dirs)
    }

    /// Configured scan roots with their timestamps.
    pub fn directory_entries(&self) -> StoreResult<Vec<DirectoryEntry>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT directory_path, added_at, last_scanned
             FROM workspace_directories ORDER BY id",
        )?;
        let entries = stmt
            .query_map([], |row| {
                Ok(DirectoryEntry {
                    path: PathBuf::from(row.get::<_, String>(0)?),
                    added_at: read_timestamp(row, 1)?,
                    last_scanned: read_timestamp(row, 2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Stamp `directories` as scanned at `at`.
    pub fn mark_directories_scanned(
        &self,
        directories: &[PathBuf],
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE workspace_directories SET last_scanned = ?1 WHERE directory_path = ?2",
            )?;
            let stamp = at.to_rfc3339();
            for dir in directories {
                stmt.execute(params![stamp, path_text(dir)])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Recompute and persist the summary row.
    ///
    /// Counts exclude missing files. The duplicate group count is the number
    /// of fingerprints shared by more than one file.
    pub fn recompute_metadata(&self) -> StoreResult<WorkspaceStats> {
        {
            let conn = self.lock();
            let (total_files, total_size): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM files WHERE status != 'missing'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let duplicate_groups: i64 = conn.query_row(
                "SELECT COUNT(*) FROM (
                     SELECT fingerprint FROM files
                     WHERE fingerprint IS NOT NULL AND status != 'missing'
                     GROUP BY fingerprint
                     HAVING COUNT(*) > 1
                 )",
                [],
                |row| row.get(0),
            )?;

            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO workspace_metadata
                     (id, workspace_name, created_at, last_scan, total_files, total_size, duplicate_groups)
                 VALUES (1, ?1, ?2, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                     workspace_name = excluded.workspace_name,
                     last_scan = excluded.last_scan,
                     total_files = excluded.total_files,
                     total_size = excluded.total_size,
                     duplicate_groups = excluded.duplicate_groups",
                params![self.name, now, total_files, total_size, duplicate_groups],
            )?;
            log::debug!(
                "Metadata: {} files, {} bytes, {} duplicate groups",
                total_files,
                total_size,
                duplicate_groups
            );
        }
        self.get_stats()
    }

    /// Last persisted summary, or zero values if none was ever written.
    pub fn get_stats(&self) -> StoreResult<WorkspaceStats> {
        let conn = self.lock();
        let stats = conn
            .query_row(
                "SELECT workspace_name, created_at, last_scan, total_files, total_size, duplicate_groups
                 FROM workspace_metadata WHERE id = 1",
                [],
                |row| {
                    Ok(WorkspaceStats {
                        workspace_name: row
                            .get::<_, Option<String>>(0)?
                            .unwrap_or_else(|| self.name.clone()),
                        created_at: read_timestamp(row, 1)?,
                        last_scan: read_timestamp(row, 2)?,
                        total_files: from_sql_size(row.get(3)?),
                        total_size: from_sql_size(row.get(4)?),
                        duplicate_groups: from_sql_size(row.get(5)?),
                    })
                },
            )
            .optional()?;
        Ok(stats.unwrap_or_else(|| WorkspaceStats::empty(self.name.clone())))
    }

    /// Close the underlying connection, surfacing any error from SQLite.
    pub fn close(self) -> StoreResult<()> {
        let conn = self.conn.into_inner().unwrap_or_else(PoisonError::into_inner);
        conn.close().map_err(|(_, e)| StoreError::Database(e))
    }
}

fn write_records(tx: &rusqlite::Transaction<'_>, records: &[FileRecord]) -> StoreResult<()> {
    let mut stmt = tx.prepare_cached(UPSERT_FILE)?;
    for record in records {
        stmt.execute(params![
            path_text(&record.path),
            to_sql_size(record.size),
            record.modified,
            record.fingerprint,
            record.confirm_hash,
            record.status.as_str(),
        ])?;
    }
    Ok(())
}
