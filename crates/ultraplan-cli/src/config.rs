//! Configuration file management for ultraplan.
//!
//! Provides a TOML config file at `~/.config/ultraplan/config.toml` (or
//! `$XDG_CONFIG_HOME/ultraplan/config.toml`) and defers the actual
//! CLI-flag > env > file > default resolution to
//! [`ultraplan_core::config::resolve`].

use std::path::PathBuf;

use anyhow::{Context, Result};

use ultraplan_core::config::ConfigFile;

/// Return the ultraplan config directory, honoring `XDG_CONFIG_HOME`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("ultraplan");
    }
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".config").join("ultraplan")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Load and parse the config file if present. A missing file is `Ok(None)`.
pub fn load() -> Result<Option<ConfigFile>> {
    let path = config_path();
    ultraplan_core::config::load_config_file(&path)
        .with_context(|| format!("failed to load config file at {}", path.display()))
}

/// Write a starter config file, creating parent directories as needed.
pub fn save_default(force: bool) -> Result<PathBuf> {
    let path = config_path();
    if path.exists() && !force {
        anyhow::bail!("config file already exists at {}\nUse --force to overwrite.", path.display());
    }

    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = "[defaults]\n\
         max_parallel = 3\n\
         poll_interval_secs = 1\n\
         max_revisions = 3\n\
         branch_prefix = \"ultraplan\"\n";
    std::fs::write(&path, contents).with_context(|| format!("failed to write config file at {}", path.display()))?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(path.ends_with("ultraplan/config.toml"), "unexpected config path: {}", path.display());
    }
}
