//! Configuration: a JSON document on disk is the durable layer, environment
//! variables override specific fields at startup, and `--config <path>`
//! selects the file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use kiro_auth::credentials::AccountRecord;
use kiro_governor::GovernorConfig;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const CURRENT_SCHEMA_VERSION: u32 = 1;
const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";

/// The on-disk document, `~/.kiro-proxy/config.json` by default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigDocument {
    pub schema_version: u32,
    #[serde(default)]
    pub accounts: Vec<AccountRecord>,
    #[serde(default)]
    pub governor: GovernorConfig,
    #[serde(default)]
    pub token_discovery_paths: Vec<String>,
}

impl Default for ConfigDocument {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            accounts: Vec::new(),
            governor: GovernorConfig::default(),
            token_discovery_paths: vec!["~/.aws/sso/cache".to_string()],
        }
    }
}

/// Fully resolved runtime configuration: the document plus env/CLI overrides.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub global_inflight_cap: usize,
    pub config_path: PathBuf,
    pub document: ConfigDocument,
}

impl Config {
    /// Resolve the config file path: `--config` flag > `KIRO_GATEWAY_CONFIG_PATH` > default.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("KIRO_GATEWAY_CONFIG_PATH") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Load the document from `path` (creating a default one if missing),
    /// then apply environment variable overrides.
    pub async fn load(path: &Path) -> Result<Self> {
        let document = if path.exists() {
            let raw = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| Error::Config(format!("reading {}: {e}", path.display())))?;
            let doc: ConfigDocument = serde_json::from_str(&raw)
                .map_err(|e| Error::Config(format!("parsing {}: {e}", path.display())))?;
            if doc.schema_version > CURRENT_SCHEMA_VERSION {
                return Err(Error::Config(format!(
                    "config schema version {} is newer than supported version {CURRENT_SCHEMA_VERSION}",
                    doc.schema_version
                )));
            }
            doc
        } else {
            ConfigDocument::default()
        };

        let listen_addr = std::env::var("KIRO_GATEWAY_LISTEN_ADDR")
            .unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string())
            .parse()
            .map_err(|e| Error::Config(format!("invalid KIRO_GATEWAY_LISTEN_ADDR: {e}")))?;

        let global_inflight_cap = std::env::var("KIRO_GATEWAY_GLOBAL_INFLIGHT_CAP")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(256);

        Ok(Self {
            listen_addr,
            global_inflight_cap,
            config_path: path.to_path_buf(),
            document,
        })
    }
}

fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".kiro-proxy").join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = Config::load(&path).await.unwrap();
        assert_eq!(config.document.schema_version, CURRENT_SCHEMA_VERSION);
        assert!(config.document.accounts.is_empty());
    }

    #[tokio::test]
    async fn load_rejects_newer_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, r#"{"schema_version": 99}"#).await.unwrap();
        let result = Config::load(&path).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn load_parses_persisted_accounts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(
            &path,
            r#"{"schema_version": 1, "accounts": [], "token_discovery_paths": ["/custom/path"]}"#,
        )
        .await
        .unwrap();
        let config = Config::load(&path).await.unwrap();
        assert_eq!(config.document.token_discovery_paths, vec!["/custom/path"]);
    }

    #[test]
    fn resolve_path_prefers_cli_flag() {
        let path = Config::resolve_path(Some("/explicit/path.json"));
        assert_eq!(path, PathBuf::from("/explicit/path.json"));
    }
}
