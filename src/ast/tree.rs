// Owned AST arena shared by providers that can lower their syntax trees

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{Cursor, CursorKind, SaveOptions, TranslationUnit, VisitResult};
use crate::error::ProviderError;
use crate::index::SourceLocation;

/// Leading bytes of a saved syntax tree.
pub const AST_MAGIC: &[u8; 4] = b"CXAS";

/// Saved syntax tree format version.
pub const AST_VERSION: u8 = 1;

pub type NodeId = u32;

/// Root node of every tree.
pub const ROOT: NodeId = 0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub kind: CursorKind,
    pub spelling: String,
    pub location: SourceLocation,
    pub children: Vec<NodeId>,
    pub definition: Option<NodeId>,
    pub referenced: Option<NodeId>,
    pub included_file: Option<String>,
}

impl Node {
    pub fn new(kind: CursorKind, spelling: impl Into<String>, location: SourceLocation) -> Self {
        Self {
            kind,
            spelling: spelling.into(),
            location,
            children: Vec::new(),
            definition: None,
            referenced: None,
            included_file: None,
        }
    }
}

/// A translation unit stored as a flat arena of nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntaxTree {
    spelling: String,
    nodes: Vec<Node>,
    has_errors: bool,
}

impl SyntaxTree {
    pub fn new(spelling: impl Into<String>) -> Self {
        let spelling = spelling.into();
        let root = Node::new(
            CursorKind::TranslationUnit,
            spelling.clone(),
            SourceLocation::default(),
        );
        Self {
            spelling,
            nodes: vec![root],
            has_errors: false,
        }
    }

    /// Append `node` as the last child of `parent` and return its id.
    pub fn push(&mut self, parent: NodeId, node: Node) -> NodeId {
        let id = self.nodes.len() as NodeId;
        self.nodes.push(node);
        self.nodes[parent as usize].children.push(id);
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id as usize]
    }

    pub fn set_definition(&mut self, id: NodeId, definition: NodeId) {
        self.nodes[id as usize].definition = Some(definition);
    }

    pub fn set_referenced(&mut self, id: NodeId, referenced: NodeId) {
        self.nodes[id as usize].referenced = Some(referenced);
    }

    pub fn set_included_file(&mut self, id: NodeId, file: impl Into<String>) {
        self.nodes[id as usize].included_file = Some(file.into());
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn mark_errors(&mut self) {
        self.has_errors = true;
    }

    pub fn has_errors(&self) -> bool {
        self.has_errors
    }

    pub fn cursor(&self, id: NodeId) -> NodeRef<'_> {
        NodeRef { tree: self, id }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        let mut buf = Vec::with_capacity(AST_MAGIC.len() + 1 + self.nodes.len() * 48);
        buf.extend_from_slice(AST_MAGIC);
        buf.push(AST_VERSION);
        rmp_serde::encode::write(&mut buf, self)?;
        Ok(buf)
    }

    pub fn from_bytes(path: &Path, bytes: &[u8]) -> Result<Self, ProviderError> {
        let malformed = |reason: String| ProviderError::Malformed {
            path: path.to_path_buf(),
            reason,
        };

        if bytes.len() < AST_MAGIC.len() + 1 || &bytes[..AST_MAGIC.len()] != AST_MAGIC {
            return Err(malformed("missing AST header".to_string()));
        }
        let version = bytes[AST_MAGIC.len()];
        if version != AST_VERSION {
            return Err(malformed(format!("unsupported AST version {}", version)));
        }

        let tree: SyntaxTree =
            rmp_serde::from_slice(&bytes[AST_MAGIC.len() + 1..]).map_err(|e| malformed(e.to_string()))?;
        tree.check_links().map_err(malformed)?;
        Ok(tree)
    }

    pub fn read_from(path: &Path) -> Result<Self, ProviderError> {
        let bytes = std::fs::read(path).map_err(|source| ProviderError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(path, &bytes)
    }

    /// Every link must point inside the arena, or cursors would panic later.
    /// Child links must form a tree under the root: no node has two parents
    /// and the root has none, so traversal always terminates.
    fn check_links(&self) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("empty node arena".to_string());
        }
        let len = self.nodes.len() as NodeId;
        let mut has_parent = vec![false; self.nodes.len()];
        for (index, node) in self.nodes.iter().enumerate() {
            let links = node
                .children
                .iter()
                .chain(node.definition.iter())
                .chain(node.referenced.iter());
            for &link in links {
                if link >= len {
                    return Err(format!("node {} links to missing node {}", index, link));
                }
            }

            for &child in &node.children {
                if child == ROOT {
                    return Err(format!("node {} lists the root as a child", index));
                }
                if std::mem::replace(&mut has_parent[child as usize], true) {
                    return Err(format!("node {} has more than one parent", child));
                }
            }
        }
        Ok(())
    }
}

impl TranslationUnit for SyntaxTree {
    type Cursor<'a> = NodeRef<'a>;

    fn spelling(&self) -> &str {
        &self.spelling
    }

    fn traverse<'a>(&'a self, visitor: &mut dyn FnMut(Self::Cursor<'a>) -> VisitResult) {
        let mut stack: Vec<NodeId> = self.nodes[ROOT as usize].children.iter().rev().copied().collect();

        while let Some(id) = stack.pop() {
            match visitor(self.cursor(id)) {
                VisitResult::Break => return,
                VisitResult::Continue => {}
                VisitResult::Recurse => {
                    stack.extend(self.nodes[id as usize].children.iter().rev().copied());
                }
            }
        }
    }

    fn save(&self, path: &Path, options: SaveOptions) -> Result<(), ProviderError> {
        if self.has_errors && !options.keep_going {
            return Err(ProviderError::Save(format!(
                "{} has errors and keep-going was not requested",
                self.spelling
            )));
        }

        let bytes = self.to_bytes().map_err(|e| ProviderError::Save(e.to_string()))?;
        std::fs::write(path, bytes).map_err(|e| ProviderError::Save(format!("{}: {}", path.display(), e)))
    }
}

/// Cursor into a `SyntaxTree`.
#[derive(Debug, Clone, Copy)]
pub struct NodeRef<'a> {
    tree: &'a SyntaxTree,
    id: NodeId,
}

impl<'a> NodeRef<'a> {
    fn node(&self) -> &'a Node {
        &self.tree.nodes[self.id as usize]
    }
}

impl PartialEq for NodeRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.tree, other.tree) && self.id == other.id
    }
}

impl<'a> Cursor for NodeRef<'a> {
    fn kind(&self) -> &CursorKind {
        &self.node().kind
    }

    fn spelling(&self) -> &str {
        &self.node().spelling
    }

    fn location(&self) -> SourceLocation {
        self.node().location.clone()
    }

    fn definition(&self) -> Option<Self> {
        self.node().definition.map(|id| self.tree.cursor(id))
    }

    fn referenced(&self) -> Option<Self> {
        self.node().referenced.map(|id| self.tree.cursor(id))
    }

    fn included_file(&self) -> Option<&str> {
        self.node().included_file.as_deref()
    }
}
