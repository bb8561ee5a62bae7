use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;

use super::ProjectContext;
use crate::compdb::absolutize;
use crate::index::db::{IndexStore, StoredEntry};
use crate::index::{Declaration, Definition, FileRecord, Header, Reference};

/// JSON shape of a stored record; the embedded AST is summarized by size.
#[derive(Debug, Serialize)]
struct RecordView<'a> {
    key: &'a str,
    indexed_at: i64,
    path: &'a str,
    flags: &'a [String],
    declarations: &'a [Declaration],
    definitions: &'a [Definition],
    references: &'a [Reference],
    headers: &'a [Header],
    translation_unit_bytes: usize,
}

pub async fn show_record(file: String, project: Option<String>, format: String) -> Result<()> {
    let context = ProjectContext::load(project.as_deref())?;
    let store_path = context.store_path();
    if !store_path.exists() {
        bail!("No index at {}. Run `cxxgraph index` first.", store_path.display());
    }

    let store = IndexStore::open(&store_path)?;
    let mut entry = None;
    for candidate in candidate_paths(&file, &context.root) {
        entry = store.find_by_path(&candidate)?;
        if entry.is_some() {
            break;
        }
    }
    let entry = entry.with_context(|| format!("No record for {}", file))?;
    let path = entry.path.clone();
    let record = FileRecord::from_bytes(&entry.value)
        .with_context(|| format!("Stored record for {} is unreadable", path))?;

    match format.as_str() {
        "json" => println!("{}", render_json(&entry, &record)?),
        "text" => print!("{}", render_text(&entry, &record)),
        other => bail!("Unknown output format: {}", other),
    }

    store.close();
    Ok(())
}

/// Records are keyed by the lexically normalized path from the compilation
/// database, so a relative argument is tried against the working directory
/// and then the project root.
fn candidate_paths(file: &str, root: &Path) -> Vec<String> {
    let mut candidates = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(absolutize(&cwd, file));
    }
    let from_root = absolutize(root, file);
    if !candidates.contains(&from_root) {
        candidates.push(from_root);
    }
    candidates
}

fn render_json(entry: &StoredEntry, record: &FileRecord) -> Result<String> {
    let view = RecordView {
        key: &entry.key,
        indexed_at: entry.indexed_at,
        path: &record.path,
        flags: &record.flags,
        declarations: &record.declarations,
        definitions: &record.definitions,
        references: &record.references,
        headers: &record.headers,
        translation_unit_bytes: record.translation_unit().len(),
    };
    Ok(serde_json::to_string_pretty(&view)?)
}

fn render_text(entry: &StoredEntry, record: &FileRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", record.path);
    let _ = writeln!(out, "  key: {}", entry.key);
    let _ = writeln!(out, "  flags: {}", record.flags.join(" "));
    let _ = writeln!(out, "  ast: {} bytes", record.translation_unit().len());

    let _ = writeln!(out, "\nDeclarations ({}):", record.declarations.len());
    for declaration in &record.declarations {
        let _ = writeln!(out, "  {}", short(&declaration.location.to_string(), &record.path));
    }

    let _ = writeln!(out, "\nDefinitions ({}):", record.definitions.len());
    for definition in &record.definitions {
        let _ = writeln!(
            out,
            "  {} -> {}",
            short(&definition.location.to_string(), &record.path),
            short(&definition.definition.to_string(), &record.path)
        );
    }

    let _ = writeln!(out, "\nReferences ({}):", record.references.len());
    for reference in &record.references {
        let _ = writeln!(
            out,
            "  {} -> {}{}",
            short(&reference.location.to_string(), &record.path),
            short(&reference.referenced.to_string(), &record.path),
            if reference.is_call { " (call)" } else { "" }
        );
    }

    let _ = writeln!(out, "\nHeaders ({}):", record.headers.len());
    for header in &record.headers {
        let target = if header.included_file.is_empty() {
            "<not found>"
        } else {
            header.included_file.as_str()
        };
        let _ = writeln!(out, "  {} -> {}", header.spelling, target);
    }

    out
}

/// Drop the directory of the record's own file from a location string.
fn short(location: &str, record_path: &str) -> String {
    match Path::new(record_path).parent().map(|p| p.to_string_lossy().to_string()) {
        Some(dir) if !dir.is_empty() => location
            .strip_prefix(&format!("{}/", dir))
            .unwrap_or(location)
            .to_string(),
        _ => location.to_string(),
    }
}
