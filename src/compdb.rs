// Compilation database loading and normalization

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CompilationConfig;
use crate::error::IndexError;

/// One normalized compile command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileCommand {
    /// Absolute path of the source file
    pub file: String,
    /// Compiler flags without the compiler, the output and the source file
    pub arguments: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    directory: String,
    file: String,
    #[serde(default)]
    arguments: Option<Vec<String>>,
    #[serde(default)]
    command: Option<String>,
}

/// Find the project root by walking up from `start` to the first directory
/// holding `database` or a `.git` entry.
pub fn find_project_root(start: &Path, database: &str) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(database).is_file() || dir.join(".git").exists())
        .map(Path::to_path_buf)
}

/// Use the explicit root when given, otherwise discover it from `start`.
pub fn resolve_root(explicit: Option<&str>, start: &Path, database: &str) -> Result<PathBuf, IndexError> {
    if let Some(root) = explicit {
        return std::fs::canonicalize(root)
            .map_err(|e| IndexError::config(format!("project root {}: {}", root, e)));
    }

    let start = std::fs::canonicalize(start)
        .map_err(|e| IndexError::config(format!("{}: {}", start.display(), e)))?;
    find_project_root(&start, database).ok_or_else(|| {
        IndexError::config(format!(
            "no {} or .git found above {}",
            database,
            start.display()
        ))
    })
}

/// Load `<root>/<config.database>` into normalized commands, in database order.
pub fn load(root: &Path, config: &CompilationConfig) -> Result<Vec<CompileCommand>, IndexError> {
    let path = root.join(&config.database);
    info!("Loading compilation database from {}", path.display());

    let content = std::fs::read_to_string(&path)
        .map_err(|e| IndexError::config(format!("cannot read {}: {}", path.display(), e)))?;
    let entries: Vec<RawEntry> = serde_json::from_str(&content)
        .map_err(|e| IndexError::config(format!("malformed {}: {}", path.display(), e)))?;

    let ranges: Vec<String> = config
        .path_range
        .iter()
        .map(|prefix| absolutize(root, prefix))
        .collect();

    let mut seen = HashSet::new();
    let mut commands = Vec::new();
    for entry in entries {
        let command = match normalize(&entry) {
            Ok(command) => command,
            Err(reason) => {
                warn!("Skipping compile command for {}: {}", entry.file, reason);
                continue;
            }
        };

        if !ranges.is_empty() && !ranges.iter().any(|prefix| command.file.starts_with(prefix.as_str())) {
            continue;
        }
        if !seen.insert(command.file.clone()) {
            debug!("Duplicate compile command for {}, keeping the first", command.file);
            continue;
        }

        commands.push(with_system_flags(command, config));
    }

    if commands.is_empty() {
        return Err(IndexError::config(format!("no compile commands in {}", path.display())));
    }

    info!("Loaded {} compile commands", commands.len());
    Ok(commands)
}

fn normalize(entry: &RawEntry) -> Result<CompileCommand, String> {
    let directory = Path::new(&entry.directory);
    let file = absolutize(directory, &entry.file);

    let argv = match (&entry.arguments, &entry.command) {
        (Some(arguments), _) => arguments.clone(),
        (None, Some(command)) => shlex::split(command).ok_or("invalid quoting in command")?,
        (None, None) => return Err("neither arguments nor command given".to_string()),
    };

    let mut arguments = Vec::new();
    let mut args = argv.into_iter().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" => continue,
            "-o" => {
                args.next();
                continue;
            }
            "-I" | "-iquote" | "-isystem" => {
                arguments.push(arg.clone());
                if let Some(dir) = args.next() {
                    arguments.push(absolutize(directory, &dir));
                }
                continue;
            }
            _ => {}
        }

        if is_joined_output(&arg) {
            continue;
        }
        if !arg.starts_with('-') && absolutize(directory, &arg) == file {
            continue;
        }

        let joined = ["-iquote", "-isystem", "-I"]
            .into_iter()
            .find_map(|flag| arg.strip_prefix(flag).map(|dir| (flag, dir)));
        match joined {
            Some((flag, dir)) if !dir.is_empty() => {
                arguments.push(format!("{}{}", flag, absolutize(directory, dir)));
            }
            _ => arguments.push(arg),
        }
    }

    Ok(CompileCommand { file, arguments })
}

/// Prepend the configured system search paths. C++ include dirs are skipped for `.c` files.
fn with_system_flags(command: CompileCommand, config: &CompilationConfig) -> CompileCommand {
    let is_c = command.file.ends_with(".c");
    let mut arguments = Vec::new();

    for dir in &config.system_c_include_dirs {
        arguments.push("-isystem".to_string());
        arguments.push(dir.clone());
    }
    if !is_c {
        for dir in &config.system_cxx_include_dirs {
            arguments.push("-isystem".to_string());
            arguments.push(dir.clone());
        }
    }
    for dir in &config.system_framework_dirs {
        arguments.push("-F".to_string());
        arguments.push(dir.clone());
    }

    arguments.extend(command.arguments);
    CompileCommand {
        file: command.file,
        arguments,
    }
}

/// Driver options that begin with `-o` but are not an output file.
const OUTPUT_LOOKALIKES: &[&str] = &["-obj"];

/// `-o<file>` written as one argument.
fn is_joined_output(arg: &str) -> bool {
    arg.len() > 2
        && arg.starts_with("-o")
        && !OUTPUT_LOOKALIKES.iter().any(|prefix| arg.starts_with(prefix))
}

/// Join a relative path onto `base` and resolve `.` and `..` lexically,
/// without touching the filesystem.
pub fn absolutize(base: &Path, path: &str) -> String {
    let joined = if Path::new(path).is_absolute() {
        PathBuf::from(path)
    } else {
        base.join(path)
    };

    let mut cleaned = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(cleaned.components().next_back(), Some(Component::Normal(_))) {
                    cleaned.pop();
                } else if !cleaned.has_root() {
                    cleaned.push("..");
                }
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned.to_string_lossy().to_string()
}
