//! Configuration loading and management.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub delete_policy: DeletePolicyConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from(".task-tree/tree.db")
}

fn default_busy_timeout() -> u64 {
    5000
}

/// Per-operation limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Budget for one mutation, lock wait included.
    #[serde(default = "default_op_timeout")]
    pub op_timeout_ms: u64,

    /// Hard ceiling on ancestor walk steps.
    #[serde(default = "default_max_traversal")]
    pub max_traversal: usize,

    /// Default and maximum page size for paged reads.
    #[serde(default = "default_page_limit")]
    pub page_limit: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            op_timeout_ms: default_op_timeout(),
            max_traversal: default_max_traversal(),
            page_limit: default_page_limit(),
        }
    }
}

fn default_op_timeout() -> u64 {
    500
}

fn default_max_traversal() -> usize {
    10_000
}

fn default_page_limit() -> usize {
    100
}

/// Which subtrees a writer (non-admin) may delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletePolicyConfig {
    #[serde(default = "default_writer_max_descendants")]
    pub writer_max_descendants: i64,

    #[serde(default = "default_writer_max_age")]
    pub writer_max_age_secs: i64,
}

impl Default for DeletePolicyConfig {
    fn default() -> Self {
        Self {
            writer_max_descendants: default_writer_max_descendants(),
            writer_max_age_secs: default_writer_max_age(),
        }
    }
}

fn default_writer_max_descendants() -> i64 {
    5
}

fn default_writer_max_age() -> i64 {
    3600 // 1 hour
}

/// Runtime settings the database layer consults on every operation.
#[derive(Debug, Clone)]
pub struct TreeSettings {
    pub op_timeout: Duration,
    pub max_traversal: usize,
    pub page_limit: usize,
    pub writer_max_descendants: i64,
    pub writer_max_age_ms: i64,
}

impl Default for TreeSettings {
    fn default() -> Self {
        Config::default().tree_settings()
    }
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from an explicit path, the default locations, or
    /// fall back to defaults. Environment variables override file values.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => Self::candidate_paths()
                .into_iter()
                .find(|p| p.exists())
                .map(|p| {
                    debug!(path = %p.display(), "loading config");
                    Self::load(&p)
                })
                .transpose()?
                .unwrap_or_default(),
        };

        config.apply_env();
        Ok(config)
    }

    /// Project-level config first, then the user config directory.
    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(".task-tree/config.yaml")];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("task-tree").join("config.yaml"));
        }
        paths
    }

    fn apply_env(&mut self) {
        if let Ok(db_path) = std::env::var("TASK_TREE_DB_PATH") {
            self.server.db_path = PathBuf::from(db_path);
        }

        if let Ok(timeout) = std::env::var("TASK_TREE_OP_TIMEOUT_MS") {
            if let Ok(timeout) = timeout.parse() {
                self.limits.op_timeout_ms = timeout;
            }
        }
    }

    /// Ensure the database directory exists.
    pub fn ensure_db_dir(&self) -> Result<()> {
        if let Some(parent) = self.server.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    pub fn tree_settings(&self) -> TreeSettings {
        TreeSettings {
            op_timeout: Duration::from_millis(self.limits.op_timeout_ms),
            max_traversal: self.limits.max_traversal.max(1),
            page_limit: self.limits.page_limit.clamp(1, 100),
            writer_max_descendants: self.delete_policy.writer_max_descendants,
            writer_max_age_ms: self.delete_policy.writer_max_age_secs * 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_limits() {
        let settings = TreeSettings::default();
        assert_eq!(settings.op_timeout, Duration::from_millis(500));
        assert_eq!(settings.page_limit, 100);
        assert_eq!(settings.writer_max_descendants, 5);
        assert_eq!(settings.writer_max_age_ms, 3_600_000);
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config: Config = serde_yaml::from_str(
            "limits:\n  op_timeout_ms: 250\ndelete_policy:\n  writer_max_descendants: 10\n",
        )
        .unwrap();
        assert_eq!(config.limits.op_timeout_ms, 250);
        assert_eq!(config.limits.max_traversal, 10_000);
        assert_eq!(config.delete_policy.writer_max_descendants, 10);
        assert_eq!(config.delete_policy.writer_max_age_secs, 3600);
        assert_eq!(config.server.db_path, PathBuf::from(".task-tree/tree.db"));
    }

    #[test]
    fn page_limit_is_capped() {
        let mut config = Config::default();
        config.limits.page_limit = 5000;
        assert_eq!(config.tree_settings().page_limit, 100);
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "server:\n  db_path: /tmp/other.db").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.db_path, PathBuf::from("/tmp/other.db"));
    }
}
