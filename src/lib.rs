//! # Unified Security Platform
//!
//! Three natural-language assistants for SOC analysts behind one HTTP API and a
//! terminal chat:
//!
//! - **Tickets Manager**: ingests firewall/proxy CSV exports into SQLite (watching a
//!   directory for new files) and answers count/filter/lookup questions.
//! - **Wazuh Assistant**: drives an external Wazuh MCP server over stdio.
//! - **TheHive Assistant**: drives an external TheHive MCP server over stdio.
//!
//! A Gemini model turns each prompt into either a plain answer or a JSON tool call,
//! which the selected assistant executes and formats.
//!
//! ## Usage
//!
//! The binary's `serve` subcommand exposes [`server::create_router`]; the Tickets
//! queries are also available as an MCP server of their own through
//! [`tickets::TicketsToolsServer`].

pub mod assistants;
pub mod config;
pub mod llm;
pub mod mcp;
pub mod server;
pub mod tickets;

pub use assistants::{AssistantHub, AssistantKind};
pub use config::AppConfig;
