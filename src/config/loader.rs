//! Configuration loading with multi-layer merge

use crate::coordinator::ExecutionSettings;
use crate::runner::stream::DEFAULT_STREAM_BUFFER;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level orchestrator configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Limits applied to every run
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionConfig {
    /// Reject workflows with more nodes than this (0 = unlimited)
    #[serde(default)]
    pub max_node_count_per_workflow: u32,

    /// Capacity of the streaming message pipe
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,

    /// How often a running graph checks the cancel flag
    #[serde(default = "default_cancel_poll_interval_ms")]
    pub cancel_poll_interval_ms: u64,
}

fn default_stream_buffer() -> usize {
    DEFAULT_STREAM_BUFFER
}

fn default_cancel_poll_interval_ms() -> u64 {
    200
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_node_count_per_workflow: 0,
            stream_buffer: default_stream_buffer(),
            cancel_poll_interval_ms: default_cancel_poll_interval_ms(),
        }
    }
}

impl ExecutionConfig {
    pub fn settings(&self) -> ExecutionSettings {
        ExecutionSettings {
            max_node_count: self.max_node_count_per_workflow,
            stream_buffer: self.stream_buffer.max(1),
            cancel_poll_interval: Duration::from_millis(self.cancel_poll_interval_ms.max(1)),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// SQLite database file; `~` is expanded
    pub path: Option<String>,
}

impl StorageConfig {
    /// Database path, falling back to the user config directory
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(path) => {
                let expanded = shellexpand::tilde(path);
                Ok(PathBuf::from(expanded.as_ref()))
            }
            None => {
                let dir = dirs::config_dir()
                    .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
                Ok(dir.join("wf-orchestrator").join("executions.db"))
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Also write logs to this file; `~` is expanded
    pub file: Option<String>,
}

impl LoggingConfig {
    pub fn file_path(&self) -> Option<PathBuf> {
        self.file
            .as_ref()
            .map(|f| PathBuf::from(shellexpand::tilde(f).as_ref()))
    }
}

impl OrchestratorConfig {
    /// Load configuration from the standard hierarchy
    ///
    /// Load order (later overrides earlier):
    /// 1. Built-in defaults
    /// 2. ~/.config/wf-orchestrator/config.toml
    /// 3. .wf-orchestrator/config.toml (project)
    pub fn load(project_dir: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(user_config_path) = Self::user_config_path() {
            if user_config_path.exists() {
                let user_config = Self::load_file(&user_config_path)
                    .with_context(|| format!("loading {}", user_config_path.display()))?;
                config.merge(user_config);
            }
        }

        let project_config_path = project_dir
            .map(|p| p.join(".wf-orchestrator/config.toml"))
            .unwrap_or_else(|| PathBuf::from(".wf-orchestrator/config.toml"));

        if project_config_path.exists() {
            let project_config = Self::load_file(&project_config_path)
                .with_context(|| format!("loading {}", project_config_path.display()))?;
            config.merge(project_config);
        }

        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Get the user config path (~/.config/wf-orchestrator/config.toml)
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("wf-orchestrator/config.toml"))
    }

    /// Merge another config into this one (other takes precedence)
    pub fn merge(&mut self, other: Self) {
        let defaults = ExecutionConfig::default();
        if other.execution.max_node_count_per_workflow != defaults.max_node_count_per_workflow {
            self.execution.max_node_count_per_workflow =
                other.execution.max_node_count_per_workflow;
        }
        if other.execution.stream_buffer != defaults.stream_buffer {
            self.execution.stream_buffer = other.execution.stream_buffer;
        }
        if other.execution.cancel_poll_interval_ms != defaults.cancel_poll_interval_ms {
            self.execution.cancel_poll_interval_ms = other.execution.cancel_poll_interval_ms;
        }

        if other.storage.path.is_some() {
            self.storage.path = other.storage.path;
        }
        if other.logging.file.is_some() {
            self.logging.file = other.logging.file;
        }
    }

    /// Starter file written by `wf-orchestrator init`
    pub fn template() -> &'static str {
        r#"[execution]
# Reject workflows with more nodes than this (0 = unlimited)
max_node_count_per_workflow = 0
stream_buffer = 10
cancel_poll_interval_ms = 200

[storage]
# path = "~/.config/wf-orchestrator/executions.db"

[logging]
# file = "~/.config/wf-orchestrator/logs/orchestrator.log"
"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_load_empty_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.execution.max_node_count_per_workflow, 0);
        assert_eq!(config.execution.stream_buffer, 10);
        assert!(config.storage.path.is_none());

        let settings = config.execution.settings();
        assert_eq!(settings.cancel_poll_interval, Duration::from_millis(200));
    }

    #[test]
    fn test_load_config_file() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.toml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
            [execution]
            max_node_count_per_workflow = 150

            [storage]
            path = "~/runs.db"
        "#
        )
        .unwrap();

        let config = OrchestratorConfig::load_file(&config_path).unwrap();
        assert_eq!(config.execution.max_node_count_per_workflow, 150);
        assert_eq!(config.execution.stream_buffer, 10);
        let path = config.storage.database_path().unwrap();
        assert!(path.ends_with("runs.db"));
        assert!(!path.to_string_lossy().starts_with('~'));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "[execution]\nmax_nodes = 3\n").unwrap();

        assert!(OrchestratorConfig::load_file(&config_path).is_err());
    }

    #[test]
    fn test_project_config_overrides() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".wf-orchestrator")).unwrap();
        std::fs::write(
            dir.path().join(".wf-orchestrator/config.toml"),
            "[execution]\nstream_buffer = 32\n\n[logging]\nfile = \"/tmp/wf.log\"\n",
        )
        .unwrap();

        let config = OrchestratorConfig::load(Some(dir.path())).unwrap();
        assert_eq!(config.execution.stream_buffer, 32);
        assert_eq!(config.logging.file_path(), Some(PathBuf::from("/tmp/wf.log")));
    }

    #[test]
    fn test_config_merge() {
        let mut base = OrchestratorConfig::default();
        base.execution.max_node_count_per_workflow = 50;
        base.storage.path = Some("/a.db".into());

        let mut other = OrchestratorConfig::default();
        other.execution.cancel_poll_interval_ms = 20;
        other.storage.path = Some("/b.db".into());

        base.merge(other);

        // Defaults in the override leave the base alone
        assert_eq!(base.execution.max_node_count_per_workflow, 50);
        assert_eq!(base.execution.cancel_poll_interval_ms, 20);
        assert_eq!(base.storage.path.as_deref(), Some("/b.db"));
    }

    #[test]
    fn test_template_parses() {
        let config: OrchestratorConfig = toml::from_str(OrchestratorConfig::template()).unwrap();
        assert_eq!(config.execution.stream_buffer, 10);
    }
}
