// CLI command implementations

pub mod index;
pub mod show;
pub mod stats;

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use crate::compdb;
use crate::config::{CompilationConfig, Config};

/// Project root together with its configuration
pub struct ProjectContext {
    pub root: PathBuf,
    pub config: Config,
}

impl ProjectContext {
    /// Resolve the project root (explicit, or discovered from the working
    /// directory) and load its configuration.
    pub fn load(project: Option<&str>) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to read the working directory")?;
        let root = compdb::resolve_root(project, &cwd, &CompilationConfig::default().database)?;
        let config = Config::from_project_dir(&root);

        // A configured root only applies when none was given on the command line
        let root = match (project, &config.project.root) {
            (None, Some(configured)) => {
                let configured = root.join(configured);
                std::fs::canonicalize(&configured)
                    .with_context(|| format!("Configured project root {} not found", configured.display()))?
            }
            _ => root,
        };

        debug!("Project root: {}", root.display());
        Ok(Self { root, config })
    }

    pub fn store_path(&self) -> PathBuf {
        self.config.store_path(&self.root)
    }
}
