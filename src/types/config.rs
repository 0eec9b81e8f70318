//! Supervisor configuration from environment variables

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Default CLI binary name, resolved through `PATH`
pub const DEFAULT_CLI_PATH: &str = "q";
/// Grace period between SIGTERM and SIGKILL on abort
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(5);
/// Staging directory for decoded attachments, relative to the working directory
pub const DEFAULT_STAGING_DIR: &str = ".tmp/images";

/// Supervisor configuration
///
/// Every field has a default; environment variables override the defaults and
/// command-line flags override the environment.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Path or name of the Q Developer CLI binary
    /// Environment variable: `QDEV_CLI_PATH`
    pub cli_path: String,

    /// How long an aborted process gets to exit after SIGTERM before SIGKILL
    /// Environment variable: `QDEV_KILL_GRACE_MS`
    pub kill_grace: Duration,

    /// Attachment staging root, relative to each run's working directory
    /// Environment variable: `QDEV_STAGING_DIR` (absolute paths and `..` are ignored)
    pub staging_dir: PathBuf,

    /// Extra environment variables passed to every child process
    pub extra_env: HashMap<String, String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            cli_path: DEFAULT_CLI_PATH.to_string(),
            kill_grace: DEFAULT_KILL_GRACE,
            staging_dir: PathBuf::from(DEFAULT_STAGING_DIR),
            extra_env: HashMap::new(),
        }
    }
}

impl SupervisorConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables
    ///
    /// Reads the following environment variables:
    /// - `QDEV_CLI_PATH`: CLI binary path or name
    /// - `QDEV_KILL_GRACE_MS`: abort grace period in milliseconds
    /// - `QDEV_STAGING_DIR`: attachment staging directory
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("QDEV_CLI_PATH").filter(|p| !p.trim().is_empty()) {
            config.cli_path = path;
        }

        // Unparseable values fall back to the default
        if let Some(raw) = lookup("QDEV_KILL_GRACE_MS") {
            match raw.trim().parse::<u64>() {
                Ok(ms) => config.kill_grace = Duration::from_millis(ms),
                Err(e) => tracing::warn!(
                    value = %raw,
                    error = %e,
                    "Ignoring invalid QDEV_KILL_GRACE_MS"
                ),
            }
        }

        if let Some(dir) = lookup("QDEV_STAGING_DIR").filter(|d| !d.trim().is_empty()) {
            if is_contained(Path::new(&dir)) {
                config.staging_dir = PathBuf::from(dir);
            } else {
                tracing::warn!(
                    value = %dir,
                    "Ignoring QDEV_STAGING_DIR: must be relative to the working directory"
                );
            }
        }

        config
    }

    /// Set the CLI binary path
    pub fn with_cli_path(mut self, cli_path: impl Into<String>) -> Self {
        self.cli_path = cli_path.into();
        self
    }

    /// Set the abort grace period
    pub fn with_kill_grace(mut self, kill_grace: Duration) -> Self {
        self.kill_grace = kill_grace;
        self
    }

    /// Add an extra environment variable for child processes
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_env.insert(key.into(), value.into());
        self
    }
}

/// Whether `path` stays under the directory it is joined onto
fn is_contained(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = SupervisorConfig::default();
        assert_eq!(config.cli_path, "q");
        assert_eq!(config.kill_grace, Duration::from_secs(5));
        assert_eq!(config.staging_dir, PathBuf::from(".tmp/images"));
        assert!(config.extra_env.is_empty());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = SupervisorConfig::from_lookup(lookup_from(&[
            ("QDEV_CLI_PATH", "/opt/q/bin/q"),
            ("QDEV_KILL_GRACE_MS", "250"),
            ("QDEV_STAGING_DIR", "scratch"),
        ]));

        assert_eq!(config.cli_path, "/opt/q/bin/q");
        assert_eq!(config.kill_grace, Duration::from_millis(250));
        assert_eq!(config.staging_dir, PathBuf::from("scratch"));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = SupervisorConfig::from_lookup(lookup_from(&[
            ("QDEV_CLI_PATH", "   "),
            ("QDEV_KILL_GRACE_MS", "soon"),
        ]));

        assert_eq!(config.cli_path, DEFAULT_CLI_PATH);
        assert_eq!(config.kill_grace, DEFAULT_KILL_GRACE);
    }

    #[test]
    fn test_staging_dir_must_stay_under_working_dir() {
        for value in ["/tmp/elsewhere", "../outside", "a/../../b"] {
            let config = SupervisorConfig::from_lookup(lookup_from(&[("QDEV_STAGING_DIR", value)]));
            assert_eq!(config.staging_dir, PathBuf::from(DEFAULT_STAGING_DIR), "{value}");
        }

        let config = SupervisorConfig::from_lookup(lookup_from(&[("QDEV_STAGING_DIR", "./cache/img")]));
        assert_eq!(config.staging_dir, PathBuf::from("./cache/img"));
    }

    #[test]
    fn test_builders() {
        let config = SupervisorConfig::new()
            .with_cli_path("fake-q")
            .with_kill_grace(Duration::from_millis(10))
            .with_env("AWS_PROFILE", "dev");

        assert_eq!(config.cli_path, "fake-q");
        assert_eq!(config.kill_grace, Duration::from_millis(10));
        assert_eq!(config.extra_env.get("AWS_PROFILE").unwrap(), "dev");
    }
}
