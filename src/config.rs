use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// The target relational database the assistant answers questions about.
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    #[serde(default = "default_database_name")]
    pub name: String,
}

fn default_database_name() -> String {
    "main".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct GraphConfig {
    #[serde(default = "default_graph_backend")]
    pub backend: String,
    /// Path of the SQLite graph store. Ignored for the memory backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            backend: default_graph_backend(),
            path: None,
        }
    }
}

fn default_graph_backend() -> String {
    "memory".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: default_base_url(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Total repair attempts per turn, shared between validation and
    /// execution failures.
    #[serde(default = "default_max_repairs")]
    pub max_repairs: u32,
    #[serde(default = "default_max_context_tables")]
    pub max_context_tables: usize,
    /// Deadline for any single collaborator call within a turn.
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
    /// Cap on rows the executor returns; larger result sets are
    /// truncated.
    #[serde(default = "default_max_result_rows")]
    pub max_result_rows: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_repairs: default_max_repairs(),
            max_context_tables: default_max_context_tables(),
            stage_timeout_secs: default_stage_timeout_secs(),
            max_result_rows: default_max_result_rows(),
        }
    }
}

fn default_max_repairs() -> u32 {
    3
}
fn default_max_context_tables() -> usize {
    10
}
fn default_stage_timeout_secs() -> u64 {
    120
}
fn default_max_result_rows() -> usize {
    1000
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.pipeline.max_repairs == 0 {
        anyhow::bail!("pipeline.max_repairs must be >= 1");
    }
    if config.pipeline.max_context_tables == 0 {
        anyhow::bail!("pipeline.max_context_tables must be >= 1");
    }
    if config.pipeline.stage_timeout_secs == 0 {
        anyhow::bail!("pipeline.stage_timeout_secs must be >= 1");
    }
    if config.pipeline.max_result_rows == 0 {
        anyhow::bail!("pipeline.max_result_rows must be >= 1");
    }

    match config.graph.backend.as_str() {
        "memory" => {}
        "sqlite" => {
            if config.graph.path.is_none() {
                anyhow::bail!("graph.path must be set when graph.backend is 'sqlite'");
            }
        }
        other => anyhow::bail!(
            "Unknown graph backend: '{}'. Must be memory or sqlite.",
            other
        ),
    }

    match config.llm.provider.as_str() {
        "disabled" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled or ollama.",
            other
        ),
    }

    if config.llm.is_enabled() && config.llm.model.is_none() {
        anyhow::bail!(
            "llm.model must be specified when provider is '{}'",
            config.llm.provider
        );
    }

    Ok(config)
}
