use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use tracing::info;

use super::ProjectContext;
use crate::ast::{AstProvider, TreeSitterProvider};
use crate::compdb;
use crate::index::cache::KeyStrategy;
use crate::index::db::IndexStore;
use crate::indexer::{Indexer, IndexerOptions, Job};

pub async fn index_project(
    project: Option<String>,
    jobs: Option<usize>,
    key_strategy: Option<String>,
    rebuild: bool,
    diagnostics: bool,
) -> Result<()> {
    let ProjectContext { root, mut config } = ProjectContext::load(project.as_deref())?;

    // CLI flags override the config file
    if let Some(jobs) = jobs {
        config.indexing.jobs = jobs;
    }
    if let Some(strategy) = key_strategy {
        config.indexing.key_strategy = KeyStrategy::from_str(&strategy)?;
    }
    config.validate()?;

    let provider = Arc::new(TreeSitterProvider::new());

    println!("cxxgraph indexer v{}", env!("CARGO_PKG_VERSION"));
    println!("Project: {}", root.display());
    println!("Provider: {}", provider.version());
    println!("Key strategy: {}", config.indexing.key_strategy.as_str());

    let commands = compdb::load(&root, &config.compilation)?;
    let jobs: Vec<Job> = commands.into_iter().map(Job::from).collect();
    println!("Compile commands: {}", jobs.len());

    let store_path = config.store_path(&root);
    println!("Store: {}", store_path.display());
    let store = IndexStore::open(&store_path)?;
    if rebuild {
        info!("Rebuilding index from scratch");
        store.clear().context("Failed to clear the index store")?;
    }
    store
        .set_key_strategy(config.indexing.key_strategy)
        .context("Failed to record the key strategy")?;

    let mut options = IndexerOptions::from_config(&config, &root);
    options.diagnostics = diagnostics;

    let indexer = Arc::new(
        Indexer::new(provider, Arc::new(store.clone()), options).with_progress(progress_bar(jobs.len())),
    );
    let summary = indexer.run(jobs).await?;

    println!("\nIndexing complete in {:.2?}", summary.elapsed);
    println!("  Files: {}", summary.submitted);
    println!("  Cache hits: {}", summary.cache_hits);
    println!("  Indexed: {}", summary.indexed);
    println!("  Failed: {}", summary.failed);
    if summary.not_persisted > 0 {
        println!("  Not persisted: {}", summary.not_persisted);
    }
    if !summary.unhandled_kinds.is_empty() {
        println!("\nUnhandled node kinds:");
        for (kind, count) in &summary.unhandled_kinds {
            println!("  {}: {}", kind, count);
        }
    }

    store.close();
    Ok(())
}

fn progress_bar(total: usize) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}") {
        pb.set_style(style.progress_chars("##-"));
    }
    pb
}
