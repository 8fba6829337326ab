//! Tickets Manager integration tests
//!
//! CSV ingestion into an on-disk SQLite database, the directory watcher, and the
//! `mcp-tickets` subcommand driven over stdio by the platform's own MCP client.

use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use unified_security_platform::config::DatabaseConfig;
use unified_security_platform::mcp::{McpClient, McpServerCommand};
use unified_security_platform::tickets::{
    CsvIngestor, CsvWatcher, EntryFilter, IngestOutcome, TicketStore, TicketsError,
};

const HEADER: &str = "Date;Time;Policy Identity;Internal IP Address;External IP Address;Action;Destination;Categories";

fn csv(rows: &[&str]) -> String {
    let mut data = String::from(HEADER);
    for row in rows {
        data.push('\n');
        data.push_str(row);
    }
    data.push('\n');
    data
}

fn database_url(dir: &Path) -> String {
    format!("sqlite://{}", dir.join("data").join("tickets.db").display())
}

fn open_store(dir: &Path) -> Arc<TicketStore> {
    let store = TicketStore::open(&DatabaseConfig {
        url: database_url(dir),
        echo: false,
    })
    .expect("Failed to open store");
    store.initialize().expect("Failed to initialize schema");
    Arc::new(store)
}

async fn wait_for_count(store: &TicketStore, expected: i64) -> bool {
    for _ in 0..50 {
        if store.count_lines().unwrap() == expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    false
}

#[cfg(test)]
mod ingestion_tests {
    use super::*;

    #[test]
    fn test_files_are_ingested_once() {
        let dir = TempDir::new().unwrap();
        let store = open_store(dir.path());
        let ingestor = CsvIngestor::new(Arc::clone(&store), b';');

        let path = dir.path().join("export-2025-07-29.csv");
        std::fs::write(
            &path,
            csv(&[
                "29/07/2025;13:13:05;Default;107.78.99.191;203.0.113.9;Blocked;bad.example;Malware",
                "29/07/2025;13:45:10;Default;107.78.99.191;203.0.113.10;Allowed;ok.example;News",
            ]),
        )
        .unwrap();

        assert_eq!(ingestor.ingest_file(&path).unwrap(), IngestOutcome::Ingested(2));
        assert_eq!(ingestor.ingest_file(&path).unwrap(), IngestOutcome::AlreadyProcessed);
        assert_eq!(store.count_lines().unwrap(), 2);
        assert!(store.is_file_processed("export-2025-07-29.csv").unwrap());
    }

    #[test]
    fn test_existing_files_survive_a_bad_neighbour() {
        let dir = TempDir::new().unwrap();
        let store = open_store(dir.path());
        let ingestor = CsvIngestor::new(Arc::clone(&store), b';');

        std::fs::write(
            dir.path().join("a.csv"),
            csv(&["29/07/2025;08:00:00;P;10.0.0.1;1.1.1.1;Allowed;a.example;News"]),
        )
        .unwrap();
        std::fs::write(dir.path().join("b.csv"), "Date;Time\n29/07/2025;08:00\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a csv").unwrap();

        assert_eq!(ingestor.process_existing_files(dir.path()).unwrap(), 1);
        assert_eq!(store.count_lines().unwrap(), 1);
        assert!(!store.is_file_processed("b.csv").unwrap());

        let err = ingestor.ingest_file(&dir.path().join("b.csv")).unwrap_err();
        assert!(matches!(err, TicketsError::MissingColumns { .. }));
        assert!(err.to_string().starts_with("CSV file b.csv missing required columns: "));
    }

    #[test]
    fn test_filters_combine_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(dir.path());
            let ingestor = CsvIngestor::new(Arc::clone(&store), b';');
            std::fs::write(
                dir.path().join("day.csv"),
                csv(&[
                    "29/07/2025;13:13:05;Default;107.78.99.191;203.0.113.9;Blocked;bad.example;Malware",
                    "29/07/2025;13:59:59;Default;107.78.99.191;203.0.113.9;Allowed;ok.example;News",
                    "30/07/2025;13:13:05;Default;192.168.1.1;203.0.113.9;Blocked;bad.example;Malware",
                ]),
            )
            .unwrap();
            ingestor.process_existing_files(dir.path()).unwrap();
        }

        let store = open_store(dir.path());
        let mut args = Map::new();
        args.insert("internal_ip".to_string(), json!("107.78.99.191"));
        args.insert("datetime".to_string(), json!("29/07/2025 13:13"));
        let filter = EntryFilter::from_args(&args);

        assert_eq!(store.count_entries(&filter).unwrap(), 2);
        let entries = store.get_entries(&filter).unwrap();
        assert_eq!(entries[0].action.as_deref(), Some("Blocked"));
        assert_eq!(entries[1].action.as_deref(), Some("Allowed"));
    }
}

#[cfg(test)]
mod watcher_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_watcher_ingests_new_and_renamed_files() {
        let dir = TempDir::new().unwrap();
        let watch = dir.path().join("incoming");
        std::fs::create_dir_all(&watch).unwrap();
        std::fs::write(
            watch.join("before.csv"),
            csv(&["29/07/2025;09:00:00;P;10.0.0.1;1.1.1.1;Allowed;a.example;News"]),
        )
        .unwrap();

        let store = open_store(dir.path());
        let ingestor = Arc::new(CsvIngestor::new(Arc::clone(&store), b';'));
        let mut watcher = CsvWatcher::new(&watch, ingestor);

        assert_eq!(watcher.start().await.unwrap(), 1);
        assert!(watcher.is_running());

        std::fs::write(
            watch.join("after.csv"),
            csv(&["29/07/2025;10:00:00;P;10.0.0.2;1.1.1.1;Blocked;b.example;Malware"]),
        )
        .unwrap();
        assert!(wait_for_count(&store, 2).await, "new file was not ingested");

        let staging = watch.join("upload.partial");
        std::fs::write(
            &staging,
            csv(&["29/07/2025;11:00:00;P;10.0.0.3;1.1.1.1;Blocked;c.example;Malware"]),
        )
        .unwrap();
        std::fs::rename(&staging, watch.join("renamed.csv")).unwrap();
        assert!(wait_for_count(&store, 3).await, "renamed file was not ingested");

        watcher.stop();
        assert!(!watcher.is_running());
    }
}

#[cfg(test)]
mod mcp_tickets_tests {
    use super::*;

    fn server_command(dir: &Path) -> McpServerCommand {
        McpServerCommand::new(env!("CARGO_BIN_EXE_unified-security-platform"), "test-client")
            .with_args(vec!["mcp-tickets".to_string()])
            .with_envs(vec![
                ("DATABASE_URL".to_string(), database_url(dir)),
                ("GEMINI_API_KEY".to_string(), "unused".to_string()),
                (
                    "WATCH_DIRECTORY".to_string(),
                    dir.join("incoming").display().to_string(),
                ),
                ("RUST_LOG".to_string(), "warn".to_string()),
            ])
            .with_timeout(Duration::from_secs(20))
    }

    #[tokio::test]
    async fn test_mcp_tickets_serves_queries() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(dir.path());
            let ingestor = CsvIngestor::new(Arc::clone(&store), b';');
            let path = dir.path().join("day.csv");
            std::fs::write(
                &path,
                csv(&[
                    "29/07/2025;13:13:05;Default;107.78.99.191;203.0.113.9;Blocked;bad.example;Malware",
                    "29/07/2025;14:00:00;Default;10.0.0.2;203.0.113.9;Allowed;ok.example;News",
                ]),
            )
            .unwrap();
            ingestor.ingest_file(&path).unwrap();
        }

        let client = McpClient::connect(server_command(dir.path()))
            .await
            .expect("Failed to start mcp-tickets");

        let mut names: Vec<&str> = client.tools().iter().map(|t| t.name.as_str()).collect();
        names.sort();
        assert_eq!(
            names,
            vec!["count_entries", "count_lines", "get_entries", "get_line_by_id"]
        );

        let total = client.call_tool("count_lines", Map::new()).await.unwrap();
        assert_eq!(total, json!("2"));

        let mut filter = Map::new();
        filter.insert("action".to_string(), json!("Blocked"));
        let blocked = client.call_tool("count_entries", filter.clone()).await.unwrap();
        assert_eq!(blocked, json!("1"));

        let entries = client.call_tool("get_entries", filter).await.unwrap();
        let entry: Value = serde_json::from_str(entries.as_str().unwrap()).unwrap();
        assert_eq!(entry["destination"], "bad.example");

        let mut by_id = Map::new();
        by_id.insert("id".to_string(), json!(99));
        let missing = client.call_tool("get_line_by_id", by_id).await.unwrap();
        assert_eq!(missing, json!("No entry found with that ID"));

        let mut by_string_id = Map::new();
        by_string_id.insert("id".to_string(), json!("1"));
        let first = client.call_tool("get_line_by_id", by_string_id).await.unwrap();
        let first: Value = serde_json::from_str(first.as_str().unwrap()).unwrap();
        assert_eq!(first["id"], 1);
        assert_eq!(first["internal_ip"], "107.78.99.191");

        let mut bad_id = Map::new();
        bad_id.insert("id".to_string(), json!("first"));
        let rejected = client.call_tool("get_line_by_id", bad_id).await.unwrap();
        assert_eq!(
            rejected,
            json!("Error reading log entry ID: Invalid argument 'id': expected an integer, got \"first\"")
        );

        client.shutdown().await;
    }
}
