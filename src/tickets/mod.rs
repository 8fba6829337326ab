pub mod error;
pub mod filter;
pub mod ingest;
pub mod mcp_server;
pub mod store;

pub use error::TicketsError;
pub use filter::{parse_entry_id, EntryFilter};
pub use ingest::{CsvIngestor, CsvWatcher, IngestOutcome};
pub use mcp_server::TicketsToolsServer;
pub use store::{LogEntry, NewLogEntry, TicketStore};
