use anyhow::Result;
use std::path::Path;

use super::ProjectContext;
use crate::index::db::IndexStore;

pub async fn show_stats(project: Option<String>) -> Result<()> {
    let context = ProjectContext::load(project.as_deref())?;
    let store_path = context.store_path();

    println!("cxxgraph statistics v{}", env!("CARGO_PKG_VERSION"));
    println!("Project: {}", context.root.display());

    if !store_path.exists() {
        println!("\nNo index at {}. Run `cxxgraph index` first.", store_path.display());
        return Ok(());
    }

    let store = IndexStore::open(&store_path)?;
    let stats = store.stats()?;

    println!("\nIndex Statistics:");
    println!("  Entries: {}", stats.total_entries);
    println!("  Stored records: {:.2} MB", to_mb(stats.total_bytes));
    println!("  Index size: {:.2} MB", get_db_size(&store_path)?);
    if let Some(strategy) = store.key_strategy()? {
        println!("  Key strategy: {}", strategy.as_str());
    }
    match stats.last_indexed.and_then(|ts| chrono::DateTime::from_timestamp(ts, 0)) {
        Some(when) => println!("  Last indexed: {}", when.to_rfc3339()),
        None => println!("  Last indexed: never"),
    }

    store.close();
    Ok(())
}

fn to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

fn get_db_size(db_path: &Path) -> Result<f64> {
    let metadata = std::fs::metadata(db_path)?;
    Ok(to_mb(metadata.len()))
}
