use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::error::TicketsError;
use super::store::{NewLogEntry, TicketStore};

pub const REQUIRED_COLUMNS: [&str; 8] = [
    "Date",
    "Time",
    "Policy Identity",
    "Internal IP Address",
    "External IP Address",
    "Action",
    "Destination",
    "Categories",
];

// Newly created files are often still being written when the event fires.
const SETTLE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Ingested(usize),
    AlreadyProcessed,
}

pub struct CsvIngestor {
    store: Arc<TicketStore>,
    separator: u8,
}

impl CsvIngestor {
    pub fn new(store: Arc<TicketStore>, separator: u8) -> Self {
        Self { store, separator }
    }

    pub fn ingest_file(&self, path: &Path) -> Result<IngestOutcome, TicketsError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        if self.store.is_file_processed(&filename)? {
            debug!(file = %filename, "CSV file already processed, skipping");
            return Ok(IngestOutcome::AlreadyProcessed);
        }

        let entries = read_entries(File::open(path)?, self.separator, &filename)?;

        match self.store.ingest_file_entries(&filename, &entries)? {
            Some(count) => {
                info!(file = %filename, entries = count, "Ingested CSV file");
                Ok(IngestOutcome::Ingested(count))
            }
            None => Ok(IngestOutcome::AlreadyProcessed),
        }
    }

    /// Ingests every `.csv` file in `directory`, returning how many were new.
    /// A failing file is logged and skipped.
    pub fn process_existing_files(&self, directory: &Path) -> Result<usize, TicketsError> {
        if !directory.exists() {
            return Ok(0);
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(directory)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_csv(path))
            .collect();
        paths.sort();

        let mut processed = 0;
        for path in paths {
            match self.ingest_file(&path) {
                Ok(IngestOutcome::Ingested(_)) => processed += 1,
                Ok(IngestOutcome::AlreadyProcessed) => {}
                Err(e) => error!(file = %path.display(), "Failed to ingest CSV file: {}", e),
            }
        }

        if processed > 0 {
            info!(processed, directory = %directory.display(), "Processed existing CSV files");
        }
        Ok(processed)
    }
}

pub fn is_csv(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
}

fn read_entries<R: std::io::Read>(
    reader: R,
    separator: u8,
    filename: &str,
) -> Result<Vec<NewLogEntry>, TicketsError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(separator)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    let mut positions = [0usize; REQUIRED_COLUMNS.len()];
    let mut missing = Vec::new();
    for (slot, column) in positions.iter_mut().zip(REQUIRED_COLUMNS) {
        match headers.iter().position(|h| h == column) {
            Some(index) => *slot = index,
            None => missing.push(column.to_string()),
        }
    }
    if !missing.is_empty() {
        return Err(TicketsError::MissingColumns {
            file: filename.to_string(),
            columns: missing,
        });
    }

    let mut entries = Vec::new();
    for record in reader.records() {
        let record = record?;
        let field = |i: usize| record.get(positions[i]).unwrap_or_default().to_string();
        entries.push(NewLogEntry {
            date: field(0),
            time: field(1),
            policy_identity: field(2),
            internal_ip: field(3),
            external_ip: field(4),
            action: field(5),
            destination: field(6),
            categories: field(7),
        });
    }
    Ok(entries)
}

/// Ingests existing CSV files in a directory and then every CSV file that
/// appears in it later.
pub struct CsvWatcher {
    directory: PathBuf,
    ingestor: Arc<CsvIngestor>,
    task: Option<JoinHandle<()>>,
}

impl CsvWatcher {
    pub fn new(directory: impl Into<PathBuf>, ingestor: Arc<CsvIngestor>) -> Self {
        Self {
            directory: directory.into(),
            ingestor,
            task: None,
        }
    }

    /// Scans the directory, then watches it for new files. Returns the number
    /// of pre-existing files ingested.
    pub async fn start(&mut self) -> Result<usize, TicketsError> {
        let processed = self.process_existing_files().await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })?;
        watcher.watch(&self.directory, RecursiveMode::NonRecursive)?;

        self.task = Some(tokio::spawn(handle_events(
            watcher,
            rx,
            Arc::clone(&self.ingestor),
        )));

        info!(directory = %self.directory.display(), "CSV watcher started");
        Ok(processed)
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!(directory = %self.directory.display(), "CSV watcher stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Ingests the files already in the directory on the blocking pool.
    pub async fn process_existing_files(&self) -> Result<usize, TicketsError> {
        let ingestor = Arc::clone(&self.ingestor);
        let directory = self.directory.clone();
        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&directory)?;
            ingestor.process_existing_files(&directory)
        })
        .await?
    }
}

impl Drop for CsvWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn is_arrival(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Both))
    )
}

// Owns the watcher so that aborting the task also stops the notifications.
async fn handle_events(
    _watcher: RecommendedWatcher,
    mut rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    ingestor: Arc<CsvIngestor>,
) {
    while let Some(res) = rx.recv().await {
        let event = match res {
            Ok(event) => event,
            Err(e) => {
                warn!("File watcher error: {}", e);
                continue;
            }
        };
        if !is_arrival(&event.kind) {
            continue;
        }

        for path in event.paths.into_iter().filter(|p| is_csv(p)) {
            tokio::time::sleep(SETTLE_DELAY).await;
            let ingestor = Arc::clone(&ingestor);
            let file_name = path.display().to_string();
            match tokio::task::spawn_blocking(move || ingestor.ingest_file(&path)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!(file = %file_name, "Failed to ingest CSV file: {}", e),
                Err(e) => error!(file = %file_name, "CSV ingestion task failed: {}", e),
            }
        }
    }
}
