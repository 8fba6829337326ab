use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variables:\n{}", format_missing(.0))]
    MissingVariables(Vec<(&'static str, &'static str)>),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

fn format_missing(vars: &[(&'static str, &'static str)]) -> String {
    vars.iter()
        .map(|(name, description)| format!("- {} ({})", name, description))
        .collect::<Vec<_>>()
        .join("\n")
}

const REQUIRED_VARS: &[(&str, &str)] = &[
    ("DATABASE_URL", "Database connection string"),
    ("GEMINI_API_KEY", "Gemini API key"),
    ("WATCH_DIRECTORY", "CSV files watch directory"),
];

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub echo: bool,
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct WazuhConfig {
    pub api_host: String,
    pub api_port: String,
    pub api_username: String,
    pub api_password: String,
    pub indexer_host: String,
    pub indexer_port: String,
    pub indexer_username: String,
    pub indexer_password: String,
    pub verify_ssl: String,
    pub test_protocol: String,
}

#[derive(Debug, Clone)]
pub struct TheHiveConfig {
    pub url: String,
    pub api_token: String,
    pub verify_ssl: String,
}

#[derive(Debug, Clone)]
pub struct McpConfig {
    pub wazuh_server_path: PathBuf,
    pub thehive_server_path: PathBuf,
    pub rust_log: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub watch_directory: PathBuf,
    pub csv_separator: u8,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub gemini: GeminiConfig,
    pub wazuh: WazuhConfig,
    pub thehive: TheHiveConfig,
    pub mcp: McpConfig,
    pub ingestion: IngestionConfig,
}

impl AppConfig {
    /// Reads `.env` (if present) and then the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let missing: Vec<_> = REQUIRED_VARS
            .iter()
            .filter(|(name, _)| get(name).is_none())
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingVariables(missing));
        }

        let csv_separator = parse_separator(&or("CSV_SEPARATOR", ";"))?;

        let timeout_raw = or("MCP_REQUEST_TIMEOUT_SECS", "30");
        let timeout_secs: u64 = timeout_raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                name: "MCP_REQUEST_TIMEOUT_SECS",
                reason: format!("'{}' is not a number of seconds", timeout_raw),
            })?;

        Ok(Self {
            database: DatabaseConfig {
                url: or("DATABASE_URL", ""),
                echo: or("DB_ECHO", "false").to_lowercase() == "true",
            },
            gemini: GeminiConfig {
                api_key: or("GEMINI_API_KEY", ""),
                model: or("GEMINI_MODEL", "gemini-2.0-flash"),
                api_base: or(
                    "GEMINI_API_BASE",
                    "https://generativelanguage.googleapis.com/v1beta",
                ),
            },
            wazuh: WazuhConfig {
                api_host: or("WAZUH_API_HOST", ""),
                api_port: or("WAZUH_API_PORT", ""),
                api_username: or("WAZUH_API_USERNAME", ""),
                api_password: or("WAZUH_API_PASSWORD", ""),
                indexer_host: or("WAZUH_INDEXER_HOST", ""),
                indexer_port: or("WAZUH_INDEXER_PORT", ""),
                indexer_username: or("WAZUH_INDEXER_USERNAME", ""),
                indexer_password: or("WAZUH_INDEXER_PASSWORD", ""),
                verify_ssl: or("WAZUH_VERIFY_SSL", "true"),
                test_protocol: or("WAZUH_TEST_PROTOCOL", "https"),
            },
            thehive: TheHiveConfig {
                url: or("THEHIVE_URL", ""),
                api_token: or("THEHIVE_API_TOKEN", ""),
                verify_ssl: or("VERIFY_SSL", "true"),
            },
            mcp: McpConfig {
                wazuh_server_path: PathBuf::from(or(
                    "WAZUH_MCP_SERVER",
                    "./mcp-servers/mcp-server-wazuh-linux-amd64",
                )),
                thehive_server_path: PathBuf::from(or(
                    "THEHIVE_MCP_SERVER",
                    "./mcp-servers/mcp-server-thehive-linux-amd64",
                )),
                rust_log: or("RUST_LOG", "info"),
                request_timeout: Duration::from_secs(timeout_secs),
            },
            ingestion: IngestionConfig {
                watch_directory: PathBuf::from(or("WATCH_DIRECTORY", "")),
                csv_separator,
            },
        })
    }
}

fn parse_separator(raw: &str) -> Result<u8, ConfigError> {
    match raw.as_bytes() {
        [b] if b.is_ascii() => Ok(*b),
        _ => Err(ConfigError::InvalidValue {
            name: "CSV_SEPARATOR",
            reason: format!("'{}' must be a single ASCII character", raw),
        }),
    }
}

impl WazuhConfig {
    /// Environment handed to the Wazuh MCP server process. Empty settings are left out
    /// so the server falls back to its own defaults.
    pub fn server_env(&self) -> Vec<(String, String)> {
        non_empty_env(&[
            ("WAZUH_API_HOST", &self.api_host),
            ("WAZUH_API_PORT", &self.api_port),
            ("WAZUH_API_USERNAME", &self.api_username),
            ("WAZUH_API_PASSWORD", &self.api_password),
            ("WAZUH_INDEXER_HOST", &self.indexer_host),
            ("WAZUH_INDEXER_PORT", &self.indexer_port),
            ("WAZUH_INDEXER_USERNAME", &self.indexer_username),
            ("WAZUH_INDEXER_PASSWORD", &self.indexer_password),
            ("WAZUH_VERIFY_SSL", &self.verify_ssl),
            ("WAZUH_TEST_PROTOCOL", &self.test_protocol),
        ])
    }
}

impl TheHiveConfig {
    pub fn server_env(&self) -> Vec<(String, String)> {
        non_empty_env(&[
            ("THEHIVE_URL", &self.url),
            ("THEHIVE_API_TOKEN", &self.api_token),
            ("VERIFY_SSL", &self.verify_ssl),
        ])
    }
}

fn non_empty_env(pairs: &[(&str, &String)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}
