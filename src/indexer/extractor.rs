// Symbol extraction: one traversal of a translation unit into a file record

use std::sync::Arc;

use dashmap::DashMap;

use crate::ast::{Cursor, CursorKind, TranslationUnit, VisitResult};
use crate::index::{FileRecord, SourceLocation};

/// Counts of node kinds the extractor does not classify.
///
/// Shared between workers; only populated when a collector is configured.
#[derive(Debug, Default)]
pub struct Diagnostics {
    unhandled: DashMap<String, usize>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, kind: &str) {
        *self.unhandled.entry(kind.to_string()).or_insert(0) += 1;
    }

    /// Counts sorted by descending frequency, then by kind name.
    pub fn snapshot(&self) -> Vec<(String, usize)> {
        let mut counts: Vec<(String, usize)> = self
            .unhandled
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExtractorConfig {
    pub diagnostics: Option<Arc<Diagnostics>>,
}

/// How a cursor kind contributes to a file record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Declaration entry, or definition entry when a separate definition exists.
    Declared,
    /// Self-referential definition entry.
    SelfDefined,
    /// Always a declaration entry.
    Variable,
    /// Declaration entry when the parameter is named.
    Parameter,
    /// Reference edge; `true` for calls.
    Reference(bool),
    Header,
    Ignored,
}

impl Classification {
    pub fn of(kind: &CursorKind) -> Self {
        match kind {
            CursorKind::FunctionDecl
            | CursorKind::StructDecl
            | CursorKind::FieldDecl
            | CursorKind::TypedefDecl
            | CursorKind::EnumDecl
            | CursorKind::EnumConstantDecl => Classification::Declared,
            CursorKind::MacroDefinition => Classification::SelfDefined,
            CursorKind::VarDecl => Classification::Variable,
            CursorKind::ParmDecl => Classification::Parameter,
            CursorKind::CallExpr => Classification::Reference(true),
            CursorKind::DeclRefExpr
            | CursorKind::TypeRef
            | CursorKind::MemberRefExpr
            | CursorKind::MacroExpansion => Classification::Reference(false),
            CursorKind::InclusionDirective => Classification::Header,
            CursorKind::TranslationUnit | CursorKind::Unexposed(_) => Classification::Ignored,
        }
    }
}

/// Builds file records from translation units.
#[derive(Debug, Clone, Default)]
pub struct Extractor {
    config: ExtractorConfig,
}

impl Extractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    /// Walk `unit` once and classify every cursor located in an indexable file.
    ///
    /// Never fails: unresolved references become edges with an empty target.
    pub fn extract<U: TranslationUnit>(&self, unit: &U, path: &str, flags: &[String]) -> FileRecord {
        let mut record = FileRecord::new(path, flags.to_vec());

        unit.traverse(&mut |cursor| {
            let location = cursor.location();
            if location.is_indexable() {
                self.classify(&cursor, location, &mut record);
            }
            VisitResult::Recurse
        });

        record
    }

    fn classify<C: Cursor>(&self, cursor: &C, location: SourceLocation, record: &mut FileRecord) {
        match Classification::of(cursor.kind()) {
            Classification::Declared => match cursor.definition() {
                Some(definition) if definition != *cursor => {
                    record.add_definition(location, definition.location());
                }
                _ => record.add_declaration(location),
            },
            Classification::SelfDefined => {
                record.add_definition(location.clone(), location);
            }
            Classification::Variable => record.add_declaration(location),
            Classification::Parameter => {
                if !cursor.spelling().is_empty() {
                    record.add_declaration(location);
                }
            }
            Classification::Reference(is_call) => {
                let referenced = cursor
                    .referenced()
                    .map(|target| target.location())
                    .unwrap_or_default();
                record.add_reference(location, referenced, is_call);
            }
            Classification::Header => {
                record.add_header(cursor.spelling(), cursor.included_file().unwrap_or_default());
            }
            Classification::Ignored => {
                if let Some(diagnostics) = &self.config.diagnostics {
                    diagnostics.record(cursor.kind().as_str());
                }
            }
        }
    }
}
