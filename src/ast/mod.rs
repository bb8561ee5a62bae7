// AST provider seam
//
// The indexer never talks to a parser directly. It asks an `AstProvider` for a
// translation unit, walks it through `Cursor`s, and persists it through the
// provider's file-based save/reconstruct pair.

pub mod tree;
pub mod treesitter;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::index::SourceLocation;

pub use tree::{Node, NodeId, NodeRef, SyntaxTree};
pub use treesitter::TreeSitterProvider;

/// Node kinds the indexer distinguishes.
///
/// Anything else is `Unexposed`, carrying the provider's own kind name so it can
/// show up in diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CursorKind {
    TranslationUnit,
    FunctionDecl,
    StructDecl,
    FieldDecl,
    TypedefDecl,
    EnumDecl,
    EnumConstantDecl,
    MacroDefinition,
    VarDecl,
    ParmDecl,
    CallExpr,
    DeclRefExpr,
    TypeRef,
    MemberRefExpr,
    MacroExpansion,
    InclusionDirective,
    Unexposed(String),
}

impl CursorKind {
    pub fn as_str(&self) -> &str {
        match self {
            CursorKind::TranslationUnit => "TranslationUnit",
            CursorKind::FunctionDecl => "FunctionDecl",
            CursorKind::StructDecl => "StructDecl",
            CursorKind::FieldDecl => "FieldDecl",
            CursorKind::TypedefDecl => "TypedefDecl",
            CursorKind::EnumDecl => "EnumDecl",
            CursorKind::EnumConstantDecl => "EnumConstantDecl",
            CursorKind::MacroDefinition => "MacroDefinition",
            CursorKind::VarDecl => "VarDecl",
            CursorKind::ParmDecl => "ParmDecl",
            CursorKind::CallExpr => "CallExpr",
            CursorKind::DeclRefExpr => "DeclRefExpr",
            CursorKind::TypeRef => "TypeRef",
            CursorKind::MemberRefExpr => "MemberRefExpr",
            CursorKind::MacroExpansion => "MacroExpansion",
            CursorKind::InclusionDirective => "InclusionDirective",
            CursorKind::Unexposed(name) => name,
        }
    }
}

impl fmt::Display for CursorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a traversal does after visiting a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitResult {
    /// Stop the whole traversal.
    Break,
    /// Go on with the next sibling, skipping this cursor's children.
    Continue,
    /// Descend into this cursor's children.
    Recurse,
}

/// Options for parsing a translation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseOptions {
    /// Produce a translation unit even when the source has errors.
    pub keep_going: bool,
    /// Emit macro definition, macro expansion and inclusion cursors.
    pub detailed_preprocessing_record: bool,
    pub skip_function_bodies: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            keep_going: true,
            detailed_preprocessing_record: true,
            skip_function_bodies: false,
        }
    }
}

/// Options for saving a translation unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveOptions {
    /// Save even when the translation unit carries recoverable errors.
    pub keep_going: bool,
}

/// A node handle inside a translation unit.
pub trait Cursor: Sized + PartialEq {
    fn kind(&self) -> &CursorKind;
    fn spelling(&self) -> &str;
    fn location(&self) -> SourceLocation;
    /// The defining cursor of the entity this cursor declares, if known.
    fn definition(&self) -> Option<Self>;
    /// The entity this cursor refers to, if it could be resolved.
    fn referenced(&self) -> Option<Self>;
    /// Resolved path of the file an inclusion directive pulls in.
    fn included_file(&self) -> Option<&str>;
}

/// One parsed source file. Dropping the unit releases it.
pub trait TranslationUnit: Send + Sync {
    type Cursor<'a>: Cursor
    where
        Self: 'a;

    fn spelling(&self) -> &str;

    /// Depth-first, pre-order walk over every cursor below the root.
    fn traverse<'a>(&'a self, visitor: &mut dyn FnMut(Self::Cursor<'a>) -> VisitResult);

    /// Write the unit to `path` in the provider's own format.
    fn save(&self, path: &Path, options: SaveOptions) -> Result<(), ProviderError>;
}

/// A C/C++ parser able to produce and restore translation units.
pub trait AstProvider: Send + Sync + 'static {
    type Unit: TranslationUnit + 'static;

    /// Human readable provider name and version.
    fn version(&self) -> String;

    fn parse(&self, filename: &Path, flags: &[String], options: ParseOptions) -> Result<Self::Unit, ProviderError>;

    /// Rebuild a unit from a file previously written by `TranslationUnit::save`.
    fn reconstruct(&self, path: &Path) -> Result<Self::Unit, ProviderError>;
}
