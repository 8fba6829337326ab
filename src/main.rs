//
// Purpose:
//
// Command-line entry point of the Unified Security Platform. It hosts three AI
// assistants (Tickets Manager, Wazuh, TheHive) that turn analyst questions into tool
// calls, either behind an HTTP API or in an interactive terminal chat.
//
// Structure:
// - `main()`: Parses the command line, loads configuration from `.env` and the
//   environment, initializes logging (tracing, written to stderr) and dispatches to
//   one of the subcommands below.
//
// - `serve`: Builds an `AssistantHub` backed by Gemini and serves the axum router from
//   the `server` module until Ctrl-C.
//
// - `chat`: Reads prompts from stdin and prints the messages the selected assistant
//   appends to its history.
//
// - `ingest`: Ingests the CSV files already present in the watch directory and exits.
//
// - `mcp-tickets`: Serves the Tickets Manager queries as MCP tools over stdio with
//   `rmcp`, so other MCP clients can query the ingested logs.
//
// - `probe-mcp`: Starts the Wazuh or TheHive MCP server the way the assistants do,
//   lists its tools and optionally calls one. Useful when a server refuses to start.
//
// Configuration:
// See `config.rs`. `DATABASE_URL`, `GEMINI_API_KEY` and `WATCH_DIRECTORY` are required.
// Logging is controlled by `RUST_LOG`.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use rmcp::{transport::stdio, ServiceExt};
use serde_json::{Map, Value};
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use unified_security_platform::assistants::AssistantHub;
use unified_security_platform::config::AppConfig;
use unified_security_platform::mcp::{McpClient, McpServerCommand};
use unified_security_platform::server;
use unified_security_platform::tickets::{CsvIngestor, TicketStore, TicketsToolsServer};
use unified_security_platform::AssistantKind;

#[derive(Parser, Debug)]
#[command(name = "unified-security-platform")]
#[command(about = "AI assistants for CSV log analysis, Wazuh SIEM and TheHive case management")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: SocketAddr,
    },
    /// Chat with one assistant in the terminal
    Chat {
        #[arg(long, short, default_value = "tickets_manager")]
        assistant: AssistantKind,
    },
    /// Ingest the CSV files currently in the watch directory, then exit
    Ingest {
        /// Directory to read instead of WATCH_DIRECTORY
        #[arg(long)]
        directory: Option<PathBuf>,
    },
    /// Serve the Tickets Manager queries as an MCP server on stdio
    McpTickets,
    /// Start an assistant's MCP server, list its tools and optionally call one
    ProbeMcp {
        #[arg(long, default_value = "wazuh")]
        assistant: AssistantKind,
        /// Server binary to run instead of the configured one
        #[arg(long)]
        server: Option<PathBuf>,
        /// Tool to call after the handshake
        #[arg(long)]
        call: Option<String>,
        /// JSON object with the tool arguments
        #[arg(long, default_value = "{}")]
        args: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;

    match args.command {
        Command::Serve { bind } => {
            tracing::info!("Starting Unified Security Platform API...");
            let hub = Arc::new(AssistantHub::from_config(&config)?);
            server::serve(bind, hub).await
        }
        Command::Chat { assistant } => run_chat(&config, assistant).await,
        Command::Ingest { directory } => {
            let directory = directory.unwrap_or_else(|| config.ingestion.watch_directory.clone());
            let store = Arc::new(TicketStore::open(&config.database)?);
            store.initialize()?;
            let ingestor = CsvIngestor::new(Arc::clone(&store), config.ingestion.csv_separator);
            let processed = ingestor.process_existing_files(&directory)?;
            println!(
                "Ingested {} new file(s) from {}; {} entries stored",
                processed,
                directory.display(),
                store.count_lines()?
            );
            Ok(())
        }
        Command::McpTickets => {
            tracing::info!("Starting Tickets MCP Server...");
            let store = Arc::new(TicketStore::open(&config.database)?);
            store.initialize()?;

            tracing::info!("Using stdio transport");
            let service = TicketsToolsServer::new(store)
                .serve(stdio())
                .await
                .inspect_err(|e| {
                    tracing::error!("serving error: {:?}", e);
                })?;

            service.waiting().await?;
            Ok(())
        }
        Command::ProbeMcp {
            assistant,
            server,
            call,
            args,
        } => probe_mcp(&config, assistant, server, call, &args).await,
    }
}

async fn run_chat(config: &AppConfig, kind: AssistantKind) -> anyhow::Result<()> {
    let hub = AssistantHub::from_config(config)?;
    let session = hub
        .session(kind)
        .with_context(|| format!("Assistant {} is not available", kind))?;

    {
        let session = session.lock().await;
        let assistant = session.assistant();
        println!("## {}", assistant.display_name());
        println!("*{}*", assistant.description());
        println!("Type 'list tools' to see the tools, '/clear' to clear the history, 'exit' to quit.");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\nyou> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let prompt = line.trim();
        match prompt {
            "" => continue,
            "exit" | "quit" => break,
            "/clear" => {
                session.lock().await.clear_history();
                println!("History cleared.");
                continue;
            }
            "/reconnect" => {
                session.lock().await.reconnect().await;
                println!("Resources released; they will be initialized on the next prompt.");
                continue;
            }
            _ => {}
        }

        let messages = session.lock().await.submit(prompt).await;
        for message in messages.iter().skip(1) {
            println!("\n{}", message.render());
        }
    }

    hub.shutdown().await;
    Ok(())
}

async fn probe_mcp(
    config: &AppConfig,
    kind: AssistantKind,
    server: Option<PathBuf>,
    call: Option<String>,
    raw_args: &str,
) -> anyhow::Result<()> {
    let (configured_path, mut envs, client_name) = match kind {
        AssistantKind::Wazuh => (
            Some(config.mcp.wazuh_server_path.clone()),
            config.wazuh.server_env(),
            "wazuh-assistant",
        ),
        AssistantKind::TheHive => (
            Some(config.mcp.thehive_server_path.clone()),
            config.thehive.server_env(),
            "thehive-assistant",
        ),
        AssistantKind::TicketsManager => (None, Vec::new(), "debug-probe"),
    };
    let Some(path) = server.or(configured_path) else {
        bail!("{} has no MCP server of its own; pass --server", kind);
    };
    envs.push(("RUST_LOG".to_string(), config.mcp.rust_log.clone()));

    let arguments: Map<String, Value> =
        serde_json::from_str(raw_args).context("--args must be a JSON object")?;

    let command = McpServerCommand::new(path.clone(), client_name)
        .with_envs(envs)
        .with_timeout(config.mcp.request_timeout);
    let client = McpClient::connect(command)
        .await
        .with_context(|| format!("Failed to start MCP server {}", path.display()))?;

    println!(
        "✅ MCP client initialized successfully! Found {} tools",
        client.tools().len()
    );
    for tool in client.tools() {
        println!("  - {}", tool.name);
    }

    if let Some(tool) = call {
        let outcome = client.call_tool(&tool, arguments).await;
        match outcome {
            Ok(Value::String(text)) => println!("\n{}", text),
            Ok(other) => println!("\n{}", serde_json::to_string_pretty(&other)?),
            Err(e) => {
                client.shutdown().await;
                return Err(e).with_context(|| format!("Tool call {} failed", tool));
            }
        }
    }

    client.shutdown().await;
    Ok(())
}
