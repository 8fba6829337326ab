use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::error::TicketsError;
use super::filter::EntryFilter;
use crate::config::DatabaseConfig;

const EXPECTED_COLUMNS: [&str; 9] = [
    "date",
    "time",
    "policy_identity",
    "internal_ip",
    "external_ip",
    "action",
    "destination",
    "categories",
    "source_file",
];

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS log_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    date TEXT,
    time TEXT,
    policy_identity TEXT,
    internal_ip TEXT,
    external_ip TEXT,
    action TEXT,
    destination TEXT,
    categories TEXT,
    source_file TEXT
);
CREATE TABLE IF NOT EXISTS processed_files (
    filename TEXT PRIMARY KEY,
    processed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);
";

const SELECT_COLUMNS: &str = "id, date, time, policy_identity, internal_ip, external_ip, \
                              action, destination, categories, source_file";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    pub id: i64,
    pub date: Option<String>,
    pub time: Option<String>,
    pub policy_identity: Option<String>,
    pub internal_ip: Option<String>,
    pub external_ip: Option<String>,
    pub action: Option<String>,
    pub destination: Option<String>,
    pub categories: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
}

impl LogEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            date: row.get(1)?,
            time: row.get(2)?,
            policy_identity: row.get(3)?,
            internal_ip: row.get(4)?,
            external_ip: row.get(5)?,
            action: row.get(6)?,
            destination: row.get(7)?,
            categories: row.get(8)?,
            source_file: row.get(9)?,
        })
    }
}

/// A row read from a CSV file, before it is assigned an id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewLogEntry {
    pub date: String,
    pub time: String,
    pub policy_identity: String,
    pub internal_ip: String,
    pub external_ip: String,
    pub action: String,
    pub destination: String,
    pub categories: String,
}

/// SQLite-backed storage for ingested log entries and the processed-file ledger.
pub struct TicketStore {
    conn: Mutex<Connection>,
    echo: bool,
}

impl TicketStore {
    pub fn open(config: &DatabaseConfig) -> Result<Self, TicketsError> {
        let conn = match sqlite_location(&config.url)? {
            None => Connection::open_in_memory()?,
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                Connection::open(path)?
            }
        };
        info!(url = %config.url, "Opened tickets database");
        Ok(Self {
            conn: Mutex::new(conn),
            echo: config.echo,
        })
    }

    pub fn open_in_memory() -> Result<Self, TicketsError> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            echo: false,
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn echo(&self, sql: &str) {
        if self.echo {
            info!(target: "tickets_sql", "{}", sql.trim());
        }
    }

    /// Creates missing tables and adds expected columns absent from an older schema.
    pub fn initialize(&self) -> Result<(), TicketsError> {
        let conn = self.conn();
        self.echo(SCHEMA);
        conn.execute_batch(SCHEMA)?;

        let existing: Vec<String> = {
            let mut stmt = conn.prepare("SELECT name FROM pragma_table_info('log_entries')")?;
            let names = stmt.query_map([], |row| row.get(0))?;
            names.collect::<Result<_, _>>()?
        };

        for column in EXPECTED_COLUMNS {
            if existing.iter().any(|c| c == column) {
                continue;
            }
            let sql = format!("ALTER TABLE log_entries ADD COLUMN {} TEXT", column);
            self.echo(&sql);
            match conn.execute(&sql, []) {
                Ok(_) => info!(column, "Added missing column to log_entries"),
                Err(e) => warn!(column, "Could not add column: {}", e),
            }
        }

        info!("Tickets database initialized");
        Ok(())
    }

    pub fn count_lines(&self) -> Result<i64, TicketsError> {
        let sql = "SELECT COUNT(*) FROM log_entries";
        self.echo(sql);
        Ok(self.conn().query_row(sql, [], |row| row.get(0))?)
    }

    pub fn get_line_by_id(&self, id: i64) -> Result<Option<LogEntry>, TicketsError> {
        let sql = format!("SELECT {} FROM log_entries WHERE id = ?1", SELECT_COLUMNS);
        self.echo(&sql);
        Ok(self
            .conn()
            .query_row(&sql, params![id], LogEntry::from_row)
            .optional()?)
    }

    pub fn count_entries(&self, filter: &EntryFilter) -> Result<i64, TicketsError> {
        let (where_clause, values) = build_where(filter);
        let sql = format!("SELECT COUNT(*) FROM log_entries{}", where_clause);
        self.echo(&sql);
        Ok(self
            .conn()
            .query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?)
    }

    /// Matching entries in insertion order, without their `source_file`.
    pub fn get_entries(&self, filter: &EntryFilter) -> Result<Vec<LogEntry>, TicketsError> {
        let (where_clause, values) = build_where(filter);
        let sql = format!(
            "SELECT {} FROM log_entries{} ORDER BY id",
            SELECT_COLUMNS, where_clause
        );
        self.echo(&sql);

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), LogEntry::from_row)?;

        let mut entries = Vec::new();
        for row in rows {
            let mut entry = row?;
            entry.source_file = None;
            entries.push(entry);
        }
        debug!(count = entries.len(), "Fetched log entries");
        Ok(entries)
    }

    pub fn add_log_entry(&self, entry: &NewLogEntry, source_file: &str) -> Result<i64, TicketsError> {
        let conn = self.conn();
        insert_entry(&conn, entry, source_file)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn is_file_processed(&self, filename: &str) -> Result<bool, TicketsError> {
        let sql = "SELECT 1 FROM processed_files WHERE filename = ?1";
        self.echo(sql);
        Ok(self
            .conn()
            .query_row(sql, params![filename], |_| Ok(()))
            .optional()?
            .is_some())
    }

    /// Stores every row of a file and marks it processed in one transaction.
    ///
    /// Returns `None` when the file had already been processed.
    pub fn ingest_file_entries(
        &self,
        filename: &str,
        entries: &[NewLogEntry],
    ) -> Result<Option<usize>, TicketsError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let already: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM processed_files WHERE filename = ?1",
                params![filename],
                |row| row.get(0),
            )
            .optional()?;
        if already.is_some() {
            return Ok(None);
        }

        for entry in entries {
            insert_entry(&tx, entry, filename)?;
        }
        tx.execute(
            "INSERT INTO processed_files (filename) VALUES (?1)",
            params![filename],
        )?;
        tx.commit()?;

        Ok(Some(entries.len()))
    }
}

fn insert_entry(conn: &Connection, entry: &NewLogEntry, source_file: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO log_entries (date, time, policy_identity, internal_ip, external_ip, \
         action, destination, categories, source_file) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            entry.date,
            entry.time,
            entry.policy_identity,
            entry.internal_ip,
            entry.external_ip,
            entry.action,
            entry.destination,
            entry.categories,
            source_file,
        ],
    )
}

fn build_where(filter: &EntryFilter) -> (String, Vec<String>) {
    let conditions = filter.conditions();
    if conditions.is_empty() {
        return (String::new(), Vec::new());
    }

    let clauses: Vec<String> = conditions
        .iter()
        .enumerate()
        .map(|(i, (column, _))| format!("{} LIKE ?{}", column, i + 1))
        .collect();
    let values = conditions.into_iter().map(|(_, pattern)| pattern).collect();

    (format!(" WHERE {}", clauses.join(" AND ")), values)
}

/// Maps a `DATABASE_URL` to a SQLite file path; `None` means in-memory.
fn sqlite_location(url: &str) -> Result<Option<&Path>, TicketsError> {
    let location = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);

    if location == ":memory:" {
        return Ok(None);
    }
    if location.is_empty() || location.contains("://") {
        return Err(TicketsError::UnsupportedDatabaseUrl(url.to_string()));
    }
    Ok(Some(Path::new(location)))
}
