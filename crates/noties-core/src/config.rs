use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Scope used when no PIN has been entered.
pub const DEFAULT_SCOPE: &str = "default";

const CONFIG_HEADER: &str = r#"# noties configuration file
# Schema: run `noties-syncd config-schema` to print the JSON schema
"#;

/// Configuration for the noties sync daemon
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct SyncSettings {
    /// Remote document store URL (if None, runs in local-only mode)
    pub server_url: Option<String>,

    /// Scope token partitioning all remote paths (`pins/{scope}/...`)
    #[serde(default = "default_scope")]
    pub scope: Option<String>,

    /// Bearer token sent when connecting to the remote store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    /// Seconds between reachability probes of the remote store
    #[serde(default = "default_probe_interval")]
    pub probe_interval_seconds: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct StorageSettings {
    /// Path to the local SQLite database (cache + pending changes)
    pub database_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct LoggingSettings {
    /// Default tracing filter level, overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_scope() -> Option<String> {
    Some(DEFAULT_SCOPE.to_string())
}

fn default_probe_interval() -> u64 {
    15
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            server_url: None,
            scope: default_scope(),
            auth_token: None,
            probe_interval_seconds: default_probe_interval(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Save configuration to a specific path, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, format!("{CONFIG_HEADER}\n{toml_str}"))
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Config path from `NOTIES_CONFIG`, falling back to ~/.config/noties/config.toml
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(custom_path) = std::env::var("NOTIES_CONFIG") {
            return Ok(PathBuf::from(custom_path));
        }
        let home_dir = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home_dir.join(".config").join("noties").join("config.toml"))
    }

    /// Get the database path, using ~/.local/share/noties/noties.db if not configured
    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.storage.database_path {
            return Ok(path.clone());
        }
        let home_dir = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home_dir
            .join(".local")
            .join("share")
            .join("noties")
            .join("noties.db"))
    }

    /// Active scope, ignoring blank values
    pub fn scope(&self) -> Option<&str> {
        self.sync
            .scope
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Generate JSON schema for the configuration
    pub fn generate_schema() -> Result<String> {
        let schema = schemars::schema_for!(Config);
        let json_schema =
            serde_json::to_string_pretty(&schema).context("Failed to serialize schema to JSON")?;
        Ok(json_schema)
    }
}
