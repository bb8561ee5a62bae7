// Translation-unit codec: moves ASTs between providers and byte buffers
//
// Providers only save and restore through named files, so both directions go
// through a uniquely named scratch file that is removed on every exit path.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::{Builder, NamedTempFile};
use tracing::debug;

use crate::ast::{AstProvider, SaveOptions, TranslationUnit};
use crate::error::CodecError;

pub struct TranslationUnitCodec<P: AstProvider> {
    provider: Arc<P>,
    scratch_dir: Option<PathBuf>,
}

impl<P: AstProvider> TranslationUnitCodec<P> {
    /// Scratch files go to `scratch_dir`, or the system temp directory when `None`.
    pub fn new(provider: Arc<P>, scratch_dir: Option<PathBuf>) -> Self {
        Self { provider, scratch_dir }
    }

    fn scratch_file(&self, hint: &str) -> Result<NamedTempFile, CodecError> {
        let mut builder = Builder::new();
        builder.prefix(hint).suffix(".ast");
        let file = match &self.scratch_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        Ok(file)
    }

    /// Save `unit` and return the saved bytes.
    pub fn serialize(&self, unit: &P::Unit) -> Result<Vec<u8>, CodecError> {
        let scratch = self.scratch_file(&scratch_hint(unit.spelling()))?;

        unit.save(scratch.path(), SaveOptions { keep_going: true })?;
        let bytes = std::fs::read(scratch.path())?;
        debug!("Serialized {} into {} bytes", unit.spelling(), bytes.len());

        scratch.close()?;
        Ok(bytes)
    }

    /// Rebuild a unit from bytes produced by `serialize`.
    pub fn deserialize(&self, bytes: &[u8]) -> Result<P::Unit, CodecError> {
        let mut scratch = self.scratch_file("restore-")?;
        scratch.write_all(bytes)?;
        scratch.flush()?;

        let unit = self.provider.reconstruct(scratch.path())?;

        scratch.close()?;
        Ok(unit)
    }
}

/// Scratch file prefix derived from the unit's file name, for readable temp dirs.
fn scratch_hint(spelling: &str) -> String {
    let name = Path::new(spelling)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    format!("{}-", name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::tree::{Node, SyntaxTree, ROOT};
    use crate::ast::{CursorKind, TreeSitterProvider};
    use crate::index::SourceLocation;
    use crate::indexer::extractor::Extractor;
    use crate::testing::FakeProvider;
    use tempfile::tempdir;

    fn sample() -> SyntaxTree {
        let mut tree = SyntaxTree::new("/src/main.c");
        let loc = |line| SourceLocation::new("/src/main.c", line, 1, 0);
        let f = tree.push(ROOT, Node::new(CursorKind::FunctionDecl, "f", loc(1)));
        tree.set_definition(f, f);
        let call = tree.push(f, Node::new(CursorKind::CallExpr, "f", loc(2)));
        tree.set_referenced(call, f);
        tree
    }

    fn scratch_entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_round_trip_preserves_classification() {
        let scratch = tempdir().unwrap();
        let codec = TranslationUnitCodec::new(
            Arc::new(TreeSitterProvider::new()),
            Some(scratch.path().to_path_buf()),
        );
        let unit = sample();

        let bytes = codec.serialize(&unit).unwrap();
        let restored = codec.deserialize(&bytes).unwrap();

        let extractor = Extractor::default();
        assert_eq!(
            extractor.extract(&restored, "/src/main.c", &[]),
            extractor.extract(&unit, "/src/main.c", &[])
        );
        assert_eq!(scratch_entries(scratch.path()), 0);
    }

    #[test]
    fn test_scratch_removed_on_save_failure() {
        let scratch = tempdir().unwrap();
        let provider = Arc::new(FakeProvider::new());
        let codec = TranslationUnitCodec::new(provider.clone(), Some(scratch.path().to_path_buf()));

        let unit = provider.unit_failing_save("/src/bad.c");
        assert!(matches!(codec.serialize(&unit), Err(CodecError::Provider(_))));
        assert_eq!(scratch_entries(scratch.path()), 0);
    }

    #[test]
    fn test_malformed_bytes_fail_and_clean_up() {
        let scratch = tempdir().unwrap();
        let codec = TranslationUnitCodec::new(
            Arc::new(TreeSitterProvider::new()),
            Some(scratch.path().to_path_buf()),
        );

        assert!(matches!(codec.deserialize(b"not an ast"), Err(CodecError::Provider(_))));
        assert_eq!(scratch_entries(scratch.path()), 0);
    }

    #[test]
    fn test_missing_scratch_dir_is_a_scratch_error() {
        let codec = TranslationUnitCodec::new(
            Arc::new(TreeSitterProvider::new()),
            Some(PathBuf::from("/definitely/not/a/dir")),
        );
        assert!(matches!(codec.serialize(&sample()), Err(CodecError::Scratch(_))));
    }

    #[test]
    fn test_scratch_hint() {
        assert_eq!(scratch_hint("/src/main.c"), "main.c-");
        assert_eq!(scratch_hint(""), "-");
    }
}
