//! `EngineConfig` and the chain that resolves it: CLI flags > environment
//! variables > a TOML config file > built-in defaults. A missing config
//! file is not an error — it just means every value falls through to its
//! default.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Which [`crate::consolidate::ConsolidationMode`] strategy to build. Kept
/// separate from the runtime `ConsolidationMode` enum because the latter
/// carries a live `Arc<dyn InstanceHost>` that configuration alone can't
/// produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsolidationModeKind {
    ProgrammaticCherryPick,
    DelegatedWorker,
}

/// Resolved engine configuration, per §1.1/§3.1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub max_parallel: usize,
    pub task_timeout: Duration,
    pub poll_interval: Duration,
    pub max_revisions: u32,
    pub branch_prefix: String,
    pub consolidation_mode: ConsolidationModeKind,
    pub synthesis_enabled: bool,
    pub synthesis_auto_advance: bool,
    pub harness_command: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel: 3,
            task_timeout: Duration::from_secs(60 * 30),
            poll_interval: Duration::from_secs(1),
            max_revisions: 3,
            branch_prefix: "ultraplan".to_string(),
            consolidation_mode: ConsolidationModeKind::ProgrammaticCherryPick,
            synthesis_enabled: true,
            synthesis_auto_advance: true,
            harness_command: "true".to_string(),
        }
    }
}

/// `[defaults]` section of the on-disk config file
/// (`~/.config/ultraplan/config.toml` or `$XDG_CONFIG_HOME/...`).
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ConfigFile {
    #[serde(default)]
    pub defaults: ConfigFileDefaults,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ConfigFileDefaults {
    pub max_parallel: Option<usize>,
    pub poll_interval_secs: Option<u64>,
    pub max_revisions: Option<u32>,
    pub branch_prefix: Option<String>,
}

/// Overrides collected from CLI flags; `None` means "not passed", letting
/// lower-priority sources take over.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub max_parallel: Option<usize>,
    pub harness_command: Option<String>,
    pub synthesis_enabled: Option<bool>,
}

/// Default location of the config file, honoring `XDG_CONFIG_HOME`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("ultraplan").join("config.toml"))
}

/// Load the config file at `path`. A missing file is `Ok(None)`, not an
/// error; a present-but-malformed file is an error.
pub fn load_config_file(path: &std::path::Path) -> anyhow::Result<Option<ConfigFile>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(toml::from_str(&contents)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Resolve an [`EngineConfig`] from CLI overrides, environment variables,
/// an optional parsed config file, and built-in defaults, in that
/// priority order.
pub fn resolve(cli: &CliOverrides, config_file: Option<&ConfigFile>) -> EngineConfig {
    let defaults = EngineConfig::default();
    let file_defaults = config_file.map(|c| &c.defaults);

    let max_parallel = cli
        .max_parallel
        .or_else(|| std::env::var("ULTRAPLAN_MAX_PARALLEL").ok().and_then(|v| v.parse().ok()))
        .or_else(|| file_defaults.and_then(|d| d.max_parallel))
        .unwrap_or(defaults.max_parallel);

    let harness_command = cli
        .harness_command
        .clone()
        .or_else(|| std::env::var("ULTRAPLAN_HARNESS_CMD").ok())
        .unwrap_or(defaults.harness_command);

    let poll_interval = file_defaults
        .and_then(|d| d.poll_interval_secs)
        .map(Duration::from_secs)
        .unwrap_or(defaults.poll_interval);

    let max_revisions = file_defaults.and_then(|d| d.max_revisions).unwrap_or(defaults.max_revisions);

    let branch_prefix =
        file_defaults.and_then(|d| d.branch_prefix.clone()).unwrap_or(defaults.branch_prefix);

    let synthesis_enabled = cli.synthesis_enabled.unwrap_or(defaults.synthesis_enabled);

    EngineConfig { max_parallel, poll_interval, max_revisions, branch_prefix, harness_command, synthesis_enabled, ..defaults }
}

/// Resolve the log filter directive from `ULTRAPLAN_LOG`, falling back to
/// `RUST_LOG`, falling back to `"info"`.
pub fn log_filter_directive() -> String {
    std::env::var("ULTRAPLAN_LOG").or_else(|_| std::env::var("RUST_LOG")).unwrap_or_else(|_| "info".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_used_when_nothing_else_present() {
        let resolved = resolve(&CliOverrides::default(), None);
        assert_eq!(resolved.max_parallel, 3);
        assert_eq!(resolved.max_revisions, 3);
    }

    #[test]
    fn cli_override_wins_over_config_file() {
        let cli = CliOverrides { max_parallel: Some(7), ..Default::default() };
        let config_file = ConfigFile {
            defaults: ConfigFileDefaults { max_parallel: Some(2), ..Default::default() },
        };
        let resolved = resolve(&cli, Some(&config_file));
        assert_eq!(resolved.max_parallel, 7);
    }

    #[test]
    fn config_file_wins_over_built_in_default() {
        let config_file = ConfigFile {
            defaults: ConfigFileDefaults { max_parallel: Some(9), ..Default::default() },
        };
        let resolved = resolve(&CliOverrides::default(), Some(&config_file));
        assert_eq!(resolved.max_parallel, 9);
    }

    #[test]
    fn missing_config_file_is_not_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let result = load_config_file(&dir.path().join("does-not-exist.toml")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn malformed_config_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not valid toml [[[").unwrap();
        assert!(load_config_file(&path).is_err());
    }
}
