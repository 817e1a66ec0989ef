use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::DownloadRecord;

/// Database schema version.
///
/// Bump this when introducing a new migration.
const SCHEMA_VERSION: i64 = 1;

const RECORD_COLUMNS: &str =
    "id, url, title, quality, filename, size, download_date, status";

/// Determines the per-user app data directory and returns its path.
///
/// macOS:  ~/Library/Application Support/mediagrab
/// Windows: %APPDATA%\\mediagrab
/// Linux:  ~/.local/share/mediagrab (depending on XDG)
pub fn app_project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("com", "mediagrab", "mediagrab")
        .ok_or_else(|| anyhow!("failed to resolve per-user app data directory"))
}

/// Returns the directory where mediagrab stores its state (config, history, logs).
pub fn app_data_dir() -> Result<PathBuf> {
    Ok(app_project_dirs()?.data_dir().to_path_buf())
}

/// Create required directories for state storage: data dir and logs dir.
pub fn ensure_app_dirs() -> Result<AppDirs> {
    AppDirs::at(app_data_dir()?)
}

#[derive(Debug, Clone)]
pub struct AppDirs {
    pub data: PathBuf,
    pub logs: PathBuf,
}

impl AppDirs {
    /// Lay out (and create) the state directories under `data`.
    pub fn at(data: impl Into<PathBuf>) -> Result<Self> {
        let data = data.into();
        let logs = data.join("logs");

        fs::create_dir_all(&data)
            .with_context(|| format!("create data dir: {}", data.display()))?;
        fs::create_dir_all(&logs)
            .with_context(|| format!("create logs dir: {}", logs.display()))?;

        Ok(Self { data, logs })
    }

    pub fn config_file(&self) -> PathBuf {
        self.data.join("config.json")
    }

    pub fn history_db(&self) -> PathBuf {
        self.data.join("history.sqlite3")
    }

    pub fn schedule_file(&self) -> PathBuf {
        self.data.join("schedule.json")
    }

    pub fn log_file(&self) -> PathBuf {
        self.logs.join("mediagrab.log")
    }
}

/// Append-only log of completed downloads.
///
/// Notes:
/// - No connection is held; every call opens the file and drops the
///   connection before returning, so the store can be shared across tasks.
/// - There is no update path. Rows leave only through [`HistoryStore::clear`].
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    /// Bind the store to `path` and bring the schema up to date.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create history dir: {}", parent.display()))?;
        }

        let store = Self { path };
        let mut conn = store.connect()?;
        migrate(&mut conn)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)
            .with_context(|| format!("open sqlite db: {}", self.path.display()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(conn)
    }

    /// Insert one completed download. Timestamp and status come from the
    /// column defaults.
    pub fn record(
        &self,
        url: &str,
        title: &str,
        quality: &str,
        filename: &str,
        size: i64,
    ) -> Result<DownloadRecord> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO downloads (url, title, quality, filename, size) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![url, title, quality, filename, size],
        )
        .context("Failed to insert history record")?;

        let id = conn.last_insert_rowid();
        let sql = format!("SELECT {RECORD_COLUMNS} FROM downloads WHERE id = ?1");
        conn.query_row(&sql, params![id], row_to_record)
            .optional()?
            .ok_or_else(|| anyhow!("history record {} vanished after insert", id))
    }

    /// Up to `limit` records, newest first.
    pub fn list(&self, limit: u32) -> Result<Vec<DownloadRecord>> {
        let conn = self.connect()?;
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM downloads ORDER BY download_date DESC, id DESC LIMIT ?1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit], row_to_record)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Delete every record. Returns how many rows were removed.
    pub fn clear(&self) -> Result<usize> {
        let conn = self.connect()?;
        let removed = conn
            .execute("DELETE FROM downloads", [])
            .context("Failed to clear history")?;
        Ok(removed)
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM downloads", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Write the whole table as tab-separated text, newest first, with a header.
    pub fn export_tsv<W: Write>(&self, writer: W) -> Result<usize> {
        let records = self.list(u32::MAX)?;

        let mut out = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .quote_style(csv::QuoteStyle::Necessary)
            .from_writer(writer);

        out.write_record([
            "id", "date", "url", "title", "quality", "filename", "size", "status",
        ])?;
        for r in &records {
            out.write_record([
                r.id.to_string(),
                r.downloaded_at.to_rfc3339(),
                r.url.clone(),
                r.title.clone(),
                r.quality.clone(),
                r.filename.clone(),
                r.size.to_string(),
                r.status.clone(),
            ])?;
        }
        out.flush().context("Failed to flush history export")?;

        Ok(records.len())
    }
}

/// Helper function to convert a database row to DownloadRecord.
fn row_to_record(row: &Row) -> rusqlite::Result<DownloadRecord> {
    let downloaded_at: String = row.get(6)?;
    let downloaded_at = parse_timestamp(&downloaded_at).ok_or(rusqlite::Error::InvalidQuery)?;

    Ok(DownloadRecord {
        id: row.get(0)?,
        url: row.get(1)?,
        title: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        quality: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        filename: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        size: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
        downloaded_at,
        status: row.get(7)?,
    })
}

/// Accepts our RFC 3339 default as well as SQLite's `CURRENT_TIMESTAMP` form.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Apply migrations to bring database to current schema.
fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );
        "#,
    )?;

    let existing: Option<String> = conn
        .query_row(
            r#"SELECT value FROM meta WHERE key = 'schema_version'"#,
            [],
            |r| r.get(0),
        )
        .optional()?;

    let current_version: i64 = existing
        .as_deref()
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(0);

    if current_version > SCHEMA_VERSION {
        return Err(anyhow!(
            "db schema version {} is newer than app supports {}",
            current_version,
            SCHEMA_VERSION
        ));
    }

    if current_version == 0 {
        migration_v1(conn)?;
        set_schema_version(conn, 1)?;
    }

    Ok(())
}

fn set_schema_version(conn: &mut Connection, v: i64) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO meta(key, value) VALUES('schema_version', ?1)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
        params![v.to_string()],
    )?;
    Ok(())
}

fn migration_v1(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS downloads (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          url TEXT NOT NULL,
          title TEXT,
          quality TEXT,
          filename TEXT,
          size INTEGER,
          download_date TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
          status TEXT NOT NULL DEFAULT 'completed'
        );

        CREATE INDEX IF NOT EXISTS idx_downloads_date ON downloads(download_date);
        "#,
    )?;

    Ok(())
}
