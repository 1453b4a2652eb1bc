use anyhow::{Context, Result};
pub use noties_core::Config;
use std::path::{Path, PathBuf};

/// Where the daemon's configuration came from.
pub struct LoadedConfig {
    pub config: Config,
    pub path: PathBuf,
    /// The file was missing and defaults were written to `path`
    pub created: bool,
}

/// Expand a leading `~/` against the home directory.
pub fn expand_path(raw: &str) -> Result<PathBuf> {
    match raw.strip_prefix("~/") {
        Some(rest) => Ok(dirs::home_dir()
            .context("Cannot determine home directory")?
            .join(rest)),
        None => Ok(PathBuf::from(raw)),
    }
}

/// Load the daemon configuration, writing defaults when the file is missing.
///
/// Without an explicit path the shared noties config location is used.
pub fn load_syncd_config(path: Option<&str>) -> Result<LoadedConfig> {
    let path = match path {
        Some(raw) => expand_path(raw)?,
        None => Config::default_path()?,
    };
    load_or_create(&path)
}

fn load_or_create(path: &Path) -> Result<LoadedConfig> {
    if !path.exists() {
        let config = Config::default();
        config
            .save_to(path)
            .context("Failed to save default config")?;
        return Ok(LoadedConfig {
            config,
            path: path.to_path_buf(),
            created: true,
        });
    }
    Ok(LoadedConfig {
        config: Config::load_from(path)?,
        path: path.to_path_buf(),
        created: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gets_defaults_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noties").join("config.toml");

        let first = load_syncd_config(path.to_str()).unwrap();
        assert!(first.created);
        assert_eq!(first.config.scope(), Some("default"));

        let second = load_syncd_config(path.to_str()).unwrap();
        assert!(!second.created);
        assert_eq!(second.config, first.config);
    }

    #[test]
    fn test_expand_path_leaves_absolute_paths() {
        assert_eq!(
            expand_path("/etc/noties.toml").unwrap(),
            PathBuf::from("/etc/noties.toml")
        );
    }
}
