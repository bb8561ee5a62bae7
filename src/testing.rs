// Test doubles for the provider and cache seams

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;

use crate::ast::tree::{Node, NodeRef, SyntaxTree, ROOT};
use crate::ast::{AstProvider, CursorKind, ParseOptions, SaveOptions, TranslationUnit, VisitResult};
use crate::error::{ProviderError, StoreError};
use crate::index::cache::{Cache, CacheKey};
use crate::index::SourceLocation;

/// Translation unit whose save can be made to fail.
#[derive(Debug)]
pub struct FakeUnit {
    tree: SyntaxTree,
    fail_save: bool,
}

impl TranslationUnit for FakeUnit {
    type Cursor<'a> = NodeRef<'a>;

    fn spelling(&self) -> &str {
        self.tree.spelling()
    }

    fn traverse<'a>(&'a self, visitor: &mut dyn FnMut(Self::Cursor<'a>) -> VisitResult) {
        self.tree.traverse(visitor)
    }

    fn save(&self, path: &Path, options: SaveOptions) -> Result<(), ProviderError> {
        if self.fail_save {
            return Err(ProviderError::Save(format!("refusing to save {}", self.spelling())));
        }
        self.tree.save(path, options)
    }
}

/// Provider producing a small synthetic tree per file without reading it.
///
/// Files whose path ends with a registered failing suffix fail to parse; files
/// ending with a panicking suffix panic inside `parse`.
#[derive(Debug, Default)]
pub struct FakeProvider {
    parses: AtomicUsize,
    failing: Vec<String>,
    panicking: Vec<String>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(mut self, suffix: &str) -> Self {
        self.failing.push(suffix.to_string());
        self
    }

    pub fn panic_on(mut self, suffix: &str) -> Self {
        self.panicking.push(suffix.to_string());
        self
    }

    pub fn parse_count(&self) -> usize {
        self.parses.load(Ordering::SeqCst)
    }

    pub fn unit_failing_save(&self, path: &str) -> FakeUnit {
        FakeUnit {
            tree: synthetic_tree(path),
            fail_save: true,
        }
    }
}

/// `f(count)` defined at line 2, a prototype at line 1, a self call and a macro.
pub fn synthetic_tree(path: &str) -> SyntaxTree {
    let loc = |line| SourceLocation::new(path, line, 1, line * 16);
    let mut tree = SyntaxTree::new(path);

    let mac = tree.push(ROOT, Node::new(CursorKind::MacroDefinition, "LIMIT", loc(1)));
    tree.set_definition(mac, mac);
    let proto = tree.push(ROOT, Node::new(CursorKind::FunctionDecl, "f", loc(1)));
    let def = tree.push(ROOT, Node::new(CursorKind::FunctionDecl, "f", loc(2)));
    tree.set_definition(proto, def);
    tree.set_definition(def, def);
    tree.push(def, Node::new(CursorKind::ParmDecl, "count", loc(2)));
    let call = tree.push(def, Node::new(CursorKind::CallExpr, "f", loc(3)));
    tree.set_referenced(call, def);
    let expansion = tree.push(call, Node::new(CursorKind::MacroExpansion, "LIMIT", loc(3)));
    tree.set_referenced(expansion, mac);
    tree
}

impl AstProvider for FakeProvider {
    type Unit = FakeUnit;

    fn version(&self) -> String {
        "fake".to_string()
    }

    fn parse(&self, filename: &Path, _flags: &[String], _options: ParseOptions) -> Result<FakeUnit, ProviderError> {
        self.parses.fetch_add(1, Ordering::SeqCst);
        let path = filename.to_string_lossy().to_string();

        if self.panicking.iter().any(|s| path.ends_with(s.as_str())) {
            panic!("provider crashed on {}", path);
        }
        if self.failing.iter().any(|s| path.ends_with(s.as_str())) {
            return Err(ProviderError::Parse {
                path: filename.to_path_buf(),
                reason: "synthetic failure".to_string(),
            });
        }

        Ok(FakeUnit {
            tree: synthetic_tree(&path),
            fail_save: false,
        })
    }

    fn reconstruct(&self, path: &Path) -> Result<FakeUnit, ProviderError> {
        Ok(FakeUnit {
            tree: SyntaxTree::read_from(path)?,
            fail_save: false,
        })
    }
}

/// In-memory cache that counts writes.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<CacheKey, Vec<u8>>,
    puts: AtomicUsize,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Cache for MemoryCache {
    fn has(&self, key: &CacheKey) -> Result<bool, StoreError> {
        Ok(self.entries.contains_key(key))
    }

    fn get(&self, key: &CacheKey) -> Result<Vec<u8>, StoreError> {
        self.entries
            .get(key)
            .map(|value| value.clone())
            .ok_or_else(|| StoreError::NotFound(key.to_hex()))
    }

    fn put(&self, key: &CacheKey, _path: &str, value: &[u8]) -> Result<(), StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.entries.insert(*key, value.to_vec());
        Ok(())
    }
}

/// Cache whose reads and writes all fail, like an unreachable store.
#[derive(Debug, Default)]
pub struct BrokenCache;

impl Cache for BrokenCache {
    fn has(&self, _key: &CacheKey) -> Result<bool, StoreError> {
        Err(StoreError::Sqlite(rusqlite::Error::InvalidQuery))
    }

    fn get(&self, _key: &CacheKey) -> Result<Vec<u8>, StoreError> {
        Err(StoreError::Sqlite(rusqlite::Error::InvalidQuery))
    }

    fn put(&self, _key: &CacheKey, _path: &str, _value: &[u8]) -> Result<(), StoreError> {
        Err(StoreError::Sqlite(rusqlite::Error::InvalidQuery))
    }
}
