// Index data model and storage

pub mod cache;
pub mod db;
pub mod schema;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RecordError;

/// Leading bytes of every encoded file record.
pub const RECORD_MAGIC: &[u8; 4] = b"CXFR";

/// Current file record format version.
pub const RECORD_VERSION: u8 = 1;

/// Location in source code
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub offset: u32,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: u32, column: u32, offset: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
            offset,
        }
    }

    /// The empty location stands for "no location", e.g. an unresolved target.
    pub fn is_empty(&self) -> bool {
        self.file.is_empty()
    }

    /// Builtin and command-line locations resolve to "" or "." and are never indexed.
    pub fn is_indexable(&self) -> bool {
        !(self.file.is_empty() || self.file == ".")
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "<unresolved>");
        }
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A pure declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declaration {
    pub location: SourceLocation,
}

/// An occurrence linked to its definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    pub location: SourceLocation,
    pub definition: SourceLocation,
}

/// Edge from a referencing occurrence to the referenced entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub location: SourceLocation,
    pub referenced: SourceLocation,
    pub is_call: bool,
}

/// An inclusion directive. `included_file` is empty when the target was not found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub spelling: String,
    pub included_file: String,
}

/// Normalized symbol graph of one source file, plus its serialized AST.
///
/// Entries are appended in traversal order while the record is built; once
/// encoded and persisted the record is never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub flags: Vec<String>,
    pub declarations: Vec<Declaration>,
    pub definitions: Vec<Definition>,
    pub references: Vec<Reference>,
    pub headers: Vec<Header>,
    #[serde(with = "serde_bytes")]
    translation_unit: Vec<u8>,
}

impl FileRecord {
    pub fn new(path: impl Into<String>, flags: Vec<String>) -> Self {
        Self {
            path: path.into(),
            flags,
            declarations: Vec::new(),
            definitions: Vec::new(),
            references: Vec::new(),
            headers: Vec::new(),
            translation_unit: Vec::new(),
        }
    }

    pub fn add_declaration(&mut self, location: SourceLocation) {
        self.declarations.push(Declaration { location });
    }

    pub fn add_definition(&mut self, location: SourceLocation, definition: SourceLocation) {
        self.definitions.push(Definition {
            location,
            definition,
        });
    }

    pub fn add_reference(&mut self, location: SourceLocation, referenced: SourceLocation, is_call: bool) {
        self.references.push(Reference {
            location,
            referenced,
            is_call,
        });
    }

    pub fn add_header(&mut self, spelling: impl Into<String>, included_file: impl Into<String>) {
        self.headers.push(Header {
            spelling: spelling.into(),
            included_file: included_file.into(),
        });
    }

    pub fn set_translation_unit(&mut self, bytes: Vec<u8>) {
        self.translation_unit = bytes;
    }

    /// Serialized AST carried by this record.
    pub fn translation_unit(&self) -> &[u8] {
        &self.translation_unit
    }

    pub fn entry_count(&self) -> usize {
        self.declarations.len() + self.definitions.len() + self.references.len() + self.headers.len()
    }

    /// Encode into the compact on-disk representation.
    pub fn to_bytes(&self) -> Result<Vec<u8>, RecordError> {
        let mut buf = Vec::with_capacity(self.translation_unit.len() + 256);
        buf.extend_from_slice(RECORD_MAGIC);
        buf.push(RECORD_VERSION);
        rmp_serde::encode::write(&mut buf, self)?;
        Ok(buf)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RecordError> {
        if bytes.len() < RECORD_MAGIC.len() + 1 || &bytes[..RECORD_MAGIC.len()] != RECORD_MAGIC {
            return Err(RecordError::BadMagic);
        }
        let version = bytes[RECORD_MAGIC.len()];
        if version != RECORD_VERSION {
            return Err(RecordError::UnsupportedVersion(version));
        }
        Ok(rmp_serde::from_slice(&bytes[RECORD_MAGIC.len() + 1..])?)
    }
}
