// Configuration management for cxxgraph

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::ast::ParseOptions;
use crate::index::cache::KeyStrategy;

/// Name of the per-project configuration file
pub const CONFIG_FILE_NAME: &str = ".cxxgraph.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub project: ProjectConfig,
    pub compilation: CompilationConfig,
    pub indexing: IndexingConfig,
    pub parser: ParserConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Explicit project root; discovered from the working directory when unset.
    pub root: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilationConfig {
    /// Compilation database file name, relative to the project root
    pub database: String,
    /// Only index files under one of these prefixes (all files when empty)
    pub path_range: Vec<String>,
    pub system_c_include_dirs: Vec<String>,
    pub system_cxx_include_dirs: Vec<String>,
    pub system_framework_dirs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    /// Worker count, 0 for the available parallelism
    pub jobs: usize,
    pub queue_capacity: usize,
    pub key_strategy: KeyStrategy,
    pub scratch_dir: Option<String>,
    /// Index store location, relative to the project root
    pub store_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    pub keep_going: bool,
    pub detailed_preprocessing_record: bool,
    pub skip_function_bodies: bool,
}

impl Default for CompilationConfig {
    fn default() -> Self {
        Self {
            database: "compile_commands.json".to_string(),
            path_range: Vec::new(),
            system_c_include_dirs: Vec::new(),
            system_cxx_include_dirs: Vec::new(),
            system_framework_dirs: Vec::new(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            jobs: 0,
            queue_capacity: 64,
            key_strategy: KeyStrategy::Path,
            scratch_dir: None,
            store_path: ".cxxgraph/index.db".to_string(),
        }
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        let options = ParseOptions::default();
        Self {
            keep_going: options.keep_going,
            detailed_preprocessing_record: options.detailed_preprocessing_record,
            skip_function_bodies: options.skip_function_bodies,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from project directory
    /// Looks for .cxxgraph.toml in the project root
    pub fn from_project_dir<P: AsRef<Path>>(project_dir: P) -> Self {
        let config_path = project_dir.as_ref().join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            tracing::debug!("No {} in {}, using defaults", CONFIG_FILE_NAME, project_dir.as_ref().display());
            return Self::default();
        }

        match Self::from_file(&config_path) {
            Ok(config) => {
                tracing::info!("Loaded configuration from {}", config_path.display());
                config
            }
            Err(e) => {
                tracing::warn!("Ignoring invalid config {}: {}", config_path.display(), e);
                Self::default()
            }
        }
    }

    /// Store location resolved against the project root
    pub fn store_path(&self, root: &Path) -> PathBuf {
        root.join(&self.indexing.store_path)
    }

    pub fn scratch_dir(&self, root: &Path) -> Option<PathBuf> {
        self.indexing.scratch_dir.as_ref().map(|dir| root.join(dir))
    }

    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            keep_going: self.parser.keep_going,
            detailed_preprocessing_record: self.parser.detailed_preprocessing_record,
            skip_function_bodies: self.parser.skip_function_bodies,
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.compilation.database.is_empty() {
            return Err(anyhow::anyhow!("Compilation database name cannot be empty"));
        }
        if self.compilation.path_range.iter().any(|p| p.is_empty()) {
            return Err(anyhow::anyhow!("Path range entries cannot be empty"));
        }

        if self.indexing.queue_capacity == 0 {
            return Err(anyhow::anyhow!("Queue capacity must be greater than 0"));
        }
        if self.indexing.store_path.is_empty() {
            return Err(anyhow::anyhow!("Store path cannot be empty"));
        }
        if matches!(&self.indexing.scratch_dir, Some(dir) if dir.is_empty()) {
            return Err(anyhow::anyhow!("Scratch directory cannot be empty"));
        }

        Ok(())
    }
}
