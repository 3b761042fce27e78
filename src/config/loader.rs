use super::Config;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Find config file in order of priority:
/// 1. Explicit --config flag path
/// 2. ./snapstate.toml (current directory)
/// 3. ~/.config/snapstate/snapstate.toml
/// 4. ~/.snapstate.toml
///
/// Returns `None` when no file exists and none was requested explicitly.
pub fn find_config_file(explicit_path: Option<&Path>) -> Result<Option<PathBuf>> {
    // 1. Explicit path
    if let Some(path) = explicit_path {
        if path.exists() {
            return Ok(Some(path.to_path_buf()));
        }
        anyhow::bail!("Config file not found: {}", path.display());
    }

    // 2. Current directory
    let cwd_config = PathBuf::from("./snapstate.toml");
    if cwd_config.exists() {
        return Ok(Some(cwd_config));
    }

    // 3. ~/.config/snapstate/snapstate.toml
    if let Some(config_dir) = dirs::config_dir() {
        let config_path = config_dir.join("snapstate/snapstate.toml");
        if config_path.exists() {
            return Ok(Some(config_path));
        }
    }

    // 4. ~/.snapstate.toml
    if let Some(home_dir) = dirs::home_dir() {
        let home_config = home_dir.join(".snapstate.toml");
        if home_config.exists() {
            return Ok(Some(home_config));
        }
    }

    Ok(None)
}

/// Load and parse config file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse TOML config: {}", path.display()))?;

    Ok(config)
}

/// Load config with automatic discovery, falling back to defaults
pub fn load_config_auto(explicit_path: Option<&Path>) -> Result<(Option<PathBuf>, Config)> {
    match find_config_file(explicit_path)? {
        Some(path) => {
            let config = load_config(&path)?;
            Ok((Some(path), config))
        }
        None => Ok((None, Config::default())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().expect("must create tempdir");
        let missing = dir.path().join("nope.toml");
        let err = find_config_file(Some(&missing)).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn explicit_file_is_loaded() {
        let dir = tempfile::tempdir().expect("must create tempdir");
        let path = dir.path().join("snapstate.toml");
        fs::write(&path, "[settings]\nmax_passes = 3\n").expect("must write config");

        let (found, config) = load_config_auto(Some(&path)).expect("must load");
        assert_eq!(found, Some(path));
        assert_eq!(config.settings.max_passes, 3);
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = tempfile::tempdir().expect("must create tempdir");
        let path = dir.path().join("snapstate.toml");
        fs::write(&path, "[settings\n").expect("must write config");

        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse TOML config"));
    }
}
