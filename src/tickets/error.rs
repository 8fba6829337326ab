use thiserror::Error;

#[derive(Error, Debug)]
pub enum TicketsError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("Unsupported database URL '{0}': only SQLite locations are supported")]
    UnsupportedDatabaseUrl(String),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV file {file} missing required columns: {}", .columns.join(", "))]
    MissingColumns { file: String, columns: Vec<String> },

    #[error("File watcher error: {0}")]
    WatcherError(#[from] notify::Error),

    #[error("Background task failed: {0}")]
    TaskError(#[from] tokio::task::JoinError),

    #[error("Invalid argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },
}
