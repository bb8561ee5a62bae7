// Tree-sitter backed C/C++ provider
//
// Tree-sitter gives a concrete syntax tree with no semantic links, so the
// lowering pass below rebuilds the cursor kinds the indexer needs and resolves
// definitions and references by name within the file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tree_sitter::{Node as TsNode, Parser as TreeParser, Tree};

use super::tree::{Node, NodeId, SyntaxTree, ROOT};
use super::{AstProvider, CursorKind, ParseOptions};
use crate::error::ProviderError;
use crate::index::SourceLocation;

/// Deepest syntax nesting the lowering pass follows before giving up on a file.
const MAX_NESTING: usize = 512;

/// C/C++ provider built on tree-sitter grammars.
#[derive(Debug, Default, Clone)]
pub struct TreeSitterProvider;

impl TreeSitterProvider {
    pub fn new() -> Self {
        Self
    }
}

impl AstProvider for TreeSitterProvider {
    type Unit = SyntaxTree;

    fn version(&self) -> String {
        format!("tree-sitter (language ABI {})", tree_sitter::LANGUAGE_VERSION)
    }

    fn parse(&self, filename: &Path, flags: &[String], options: ParseOptions) -> Result<SyntaxTree, ProviderError> {
        let source = std::fs::read(filename).map_err(|source| ProviderError::Io {
            path: filename.to_path_buf(),
            source,
        })?;

        let dialect = Dialect::detect(filename, flags);
        let tree = parse_tree(&source, dialect).map_err(|reason| ProviderError::Parse {
            path: filename.to_path_buf(),
            reason,
        })?;

        let has_errors = tree.root_node().has_error();
        if has_errors && !options.keep_going {
            return Err(ProviderError::Parse {
                path: filename.to_path_buf(),
                reason: "source has syntax errors".to_string(),
            });
        }

        let file = filename.to_string_lossy().to_string();
        let search = IncludeSearch::from_flags(filename, flags);
        let mut lowerer = Lowerer::new(&source, file, options, search);
        lowerer.lower_children(tree.root_node(), ROOT);
        if lowerer.too_deep {
            return Err(ProviderError::Parse {
                path: filename.to_path_buf(),
                reason: format!("nesting deeper than {} levels", MAX_NESTING),
            });
        }
        let mut unit = lowerer.finish();
        if has_errors {
            unit.mark_errors();
        }
        Ok(unit)
    }

    fn reconstruct(&self, path: &Path) -> Result<SyntaxTree, ProviderError> {
        SyntaxTree::read_from(path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    C,
    Cpp,
}

impl Dialect {
    /// `-x` in the flags wins over the file extension.
    fn detect(filename: &Path, flags: &[String]) -> Self {
        let mut forced = None;
        let mut args = flags.iter();
        while let Some(arg) = args.next() {
            let language = if arg == "-x" {
                args.next().map(String::as_str)
            } else {
                arg.strip_prefix("-x")
            };
            match language {
                Some("c") | Some("c-header") => forced = Some(Dialect::C),
                Some("c++") | Some("c++-header") => forced = Some(Dialect::Cpp),
                _ => {}
            }
        }
        if let Some(dialect) = forced {
            return dialect;
        }

        match filename.extension().and_then(|e| e.to_str()) {
            Some("c") | Some("h") => Dialect::C,
            _ => Dialect::Cpp,
        }
    }
}

fn parse_tree(source: &[u8], dialect: Dialect) -> Result<Tree, String> {
    let mut parser = TreeParser::new();
    let language = match dialect {
        Dialect::C => tree_sitter_c::LANGUAGE.into(),
        Dialect::Cpp => tree_sitter_cpp::LANGUAGE.into(),
    };
    parser.set_language(&language).map_err(|e| e.to_string())?;
    parser
        .parse(source, None)
        .ok_or_else(|| "tree-sitter returned no tree".to_string())
}

/// Include search path derived from the compile flags.
#[derive(Debug, Default)]
struct IncludeSearch {
    quote_dirs: Vec<PathBuf>,
    angled_dirs: Vec<PathBuf>,
}

impl IncludeSearch {
    fn from_flags(filename: &Path, flags: &[String]) -> Self {
        let mut search = IncludeSearch::default();
        if let Some(dir) = filename.parent() {
            search.quote_dirs.push(dir.to_path_buf());
        }

        let mut args = flags.iter();
        while let Some(arg) = args.next() {
            for (flag, angled) in [("-iquote", false), ("-isystem", true), ("-I", true)] {
                let Some(rest) = arg.strip_prefix(flag) else {
                    continue;
                };
                let dir = if rest.is_empty() {
                    args.next().cloned()
                } else {
                    Some(rest.to_string())
                };
                if let Some(dir) = dir {
                    if angled {
                        search.angled_dirs.push(PathBuf::from(dir));
                    } else {
                        search.quote_dirs.push(PathBuf::from(dir));
                    }
                }
                break;
            }
        }
        search
    }

    fn resolve(&self, spelling: &str, angled: bool) -> Option<String> {
        let quoted = if angled { &[][..] } else { &self.quote_dirs[..] };
        quoted
            .iter()
            .chain(self.angled_dirs.iter())
            .map(|dir| dir.join(spelling))
            .find(|candidate| candidate.is_file())
            .map(|found| found.to_string_lossy().to_string())
    }
}

/// Name lookup space used when a reference is resolved after lowering.
#[derive(Debug, Clone, Copy)]
enum Space {
    /// Callee of a call expression.
    Call,
    /// Plain identifier in an expression.
    Value,
    /// Type name (typedef or tag).
    Type,
    /// `struct`/`union`/`enum` tag.
    Tag,
    /// Member of a field expression.
    Field,
}

#[derive(Debug, Default)]
struct FileSymbols {
    function_decls: HashMap<String, Vec<NodeId>>,
    function_defs: HashMap<String, NodeId>,
    tag_decls: HashMap<String, Vec<NodeId>>,
    tag_defs: HashMap<String, NodeId>,
    typedefs: HashMap<String, NodeId>,
    enumerators: HashMap<String, NodeId>,
    fields: HashMap<String, NodeId>,
    globals: HashMap<String, NodeId>,
    macros: HashMap<String, NodeId>,
}

impl FileSymbols {
    fn function(&self, name: &str) -> Option<NodeId> {
        self.function_defs
            .get(name)
            .copied()
            .or_else(|| self.function_decls.get(name).and_then(|ids| ids.first().copied()))
    }

    fn tag(&self, name: &str) -> Option<NodeId> {
        self.tag_defs
            .get(name)
            .copied()
            .or_else(|| self.tag_decls.get(name).and_then(|ids| ids.first().copied()))
    }

    fn lookup(&self, space: Space, name: &str) -> Option<NodeId> {
        match space {
            Space::Call => self.function(name).or_else(|| self.globals.get(name).copied()),
            Space::Value => self
                .globals
                .get(name)
                .copied()
                .or_else(|| self.enumerators.get(name).copied())
                .or_else(|| self.function(name)),
            Space::Type => self.typedefs.get(name).copied().or_else(|| self.tag(name)),
            Space::Tag => self.tag(name),
            Space::Field => self.fields.get(name).copied(),
        }
    }
}

struct Lowerer<'s> {
    source: &'s [u8],
    file: String,
    options: ParseOptions,
    search: IncludeSearch,
    tree: SyntaxTree,
    scopes: Vec<HashMap<String, NodeId>>,
    symbols: FileSymbols,
    pending: Vec<(NodeId, Space, String)>,
    depth: usize,
    too_deep: bool,
}

impl<'s> Lowerer<'s> {
    fn new(source: &'s [u8], file: String, options: ParseOptions, search: IncludeSearch) -> Self {
        Self {
            source,
            tree: SyntaxTree::new(file.clone()),
            file,
            options,
            search,
            scopes: Vec::new(),
            symbols: FileSymbols::default(),
            pending: Vec::new(),
            depth: 0,
            too_deep: false,
        }
    }

    fn finish(mut self) -> SyntaxTree {
        for (id, space, name) in std::mem::take(&mut self.pending) {
            if let Some(target) = self.symbols.lookup(space, &name) {
                self.tree.set_referenced(id, target);
            }
        }

        for (name, decls) in &self.symbols.function_decls {
            if let Some(&def) = self.symbols.function_defs.get(name) {
                for &decl in decls {
                    self.tree.set_definition(decl, def);
                }
            }
        }
        for (name, decls) in &self.symbols.tag_decls {
            if let Some(&def) = self.symbols.tag_defs.get(name) {
                for &decl in decls {
                    self.tree.set_definition(decl, def);
                }
            }
        }

        self.tree
    }

    fn text(&self, node: TsNode) -> &'s str {
        node.utf8_text(self.source).unwrap_or_default()
    }

    fn location(&self, node: TsNode) -> SourceLocation {
        let point = node.start_position();
        SourceLocation::new(
            self.file.clone(),
            point.row as u32 + 1,
            point.column as u32 + 1,
            node.start_byte() as u32,
        )
    }

    fn push(&mut self, parent: NodeId, kind: CursorKind, spelling: &str, at: TsNode) -> NodeId {
        let location = self.location(at);
        self.tree.push(parent, Node::new(kind, spelling, location))
    }

    fn push_self_defined(&mut self, parent: NodeId, kind: CursorKind, spelling: &str, at: TsNode) -> NodeId {
        let id = self.push(parent, kind, spelling, at);
        self.tree.set_definition(id, id);
        id
    }

    fn lookup_local(&self, name: &str) -> Option<NodeId> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name).copied())
    }

    fn declare_value(&mut self, name: &str, id: NodeId) {
        match self.scopes.last_mut() {
            Some(scope) => {
                scope.insert(name.to_string(), id);
            }
            None => {
                self.symbols.globals.entry(name.to_string()).or_insert(id);
            }
        }
    }

    /// Resolve `name` now against local scopes, or queue it for the file-level tables.
    fn reference(&mut self, id: NodeId, space: Space, name: &str) {
        let local = match space {
            Space::Call | Space::Value => self.lookup_local(name),
            _ => None,
        };
        match local {
            Some(target) => self.tree.set_referenced(id, target),
            None => self.pending.push((id, space, name.to_string())),
        }
    }

    fn lower_children(&mut self, node: TsNode, parent: NodeId) {
        let mut cursor = node.walk();
        let children: Vec<TsNode> = node.named_children(&mut cursor).collect();
        for child in children {
            self.lower(child, parent);
        }
    }

    /// Step one level deeper, or flag the file once the nesting limit is hit.
    fn descend(&mut self) -> bool {
        if self.too_deep || self.depth >= MAX_NESTING {
            self.too_deep = true;
            return false;
        }
        self.depth += 1;
        true
    }

    fn lower(&mut self, node: TsNode, parent: NodeId) {
        if !node.is_named() || node.kind() == "comment" {
            return;
        }
        if !self.descend() {
            return;
        }
        self.lower_node(node, parent);
        self.depth -= 1;
    }

    fn lower_node(&mut self, node: TsNode, parent: NodeId) {
        match node.kind() {
            "function_definition" => self.lower_function_definition(node, parent),
            "declaration" => self.lower_declaration(node, parent),
            "field_declaration" => self.lower_field_declaration(node, parent),
            "parameter_declaration" | "optional_parameter_declaration" => self.lower_parameter(node, parent),
            "type_definition" => self.lower_typedef(node, parent),
            "struct_specifier" | "union_specifier" | "class_specifier" => self.lower_record(node, parent),
            "enum_specifier" => self.lower_enum(node, parent),
            "enumerator" => self.lower_enumerator(node, parent),
            "preproc_def" | "preproc_function_def" => self.lower_macro_definition(node, parent),
            "preproc_include" => self.lower_include(node, parent),
            "preproc_ifdef" => self.lower_ifdef(node, parent),
            "call_expression" => self.lower_call(node, parent),
            "field_expression" => self.lower_member(node, parent),
            "identifier" | "qualified_identifier" => self.lower_identifier(node, parent),
            "type_identifier" => self.lower_type_ref(node, parent),
            "compound_statement" => {
                let id = self.push(parent, CursorKind::Unexposed(node.kind().to_string()), "", node);
                self.scopes.push(HashMap::new());
                self.lower_children(node, id);
                self.scopes.pop();
            }
            kind => {
                let id = self.push(parent, CursorKind::Unexposed(kind.to_string()), "", node);
                self.lower_children(node, id);
            }
        }
    }

    /// Lower the parts of a declarator other than the declared name itself.
    fn lower_declarator(&mut self, node: TsNode, parent: NodeId) {
        if !self.descend() {
            return;
        }
        self.lower_declarator_parts(node, parent);
        self.depth -= 1;
    }

    fn lower_declarator_parts(&mut self, node: TsNode, parent: NodeId) {
        match node.kind() {
            kind if is_name_kind(kind) => {}
            "function_declarator" => {
                if let Some(inner) = node.child_by_field_name("declarator") {
                    self.lower_declarator(inner, parent);
                }
                if let Some(parameters) = node.child_by_field_name("parameters") {
                    self.lower_children(parameters, parent);
                }
            }
            "init_declarator" => {
                if let Some(inner) = node.child_by_field_name("declarator") {
                    self.lower_declarator(inner, parent);
                }
                if let Some(value) = node.child_by_field_name("value") {
                    self.lower(value, parent);
                }
            }
            _ => {
                let mut cursor = node.walk();
                let children: Vec<TsNode> = node.named_children(&mut cursor).collect();
                for child in children {
                    if is_declarator_kind(child.kind()) {
                        self.lower_declarator(child, parent);
                    } else {
                        self.lower(child, parent);
                    }
                }
            }
        }
    }

    fn lower_function_definition(&mut self, node: TsNode, parent: NodeId) {
        let declarator = node.child_by_field_name("declarator");
        let name_node = declarator.and_then(|d| declarator_name(d));
        let name = name_node.map(|n| self.text(n)).unwrap_or_default();

        let id = self.push_self_defined(parent, CursorKind::FunctionDecl, name, name_node.unwrap_or(node));
        if !name.is_empty() {
            self.symbols.function_defs.entry(name.to_string()).or_insert(id);
        }

        if let Some(ty) = node.child_by_field_name("type") {
            self.lower(ty, id);
        }

        self.scopes.push(HashMap::new());
        if let Some(declarator) = declarator {
            self.lower_declarator(declarator, id);
        }
        if let Some(body) = node.child_by_field_name("body") {
            if !self.options.skip_function_bodies {
                self.lower(body, id);
            }
        }
        self.scopes.pop();
    }

    fn lower_declaration(&mut self, node: TsNode, parent: NodeId) {
        if let Some(ty) = node.child_by_field_name("type") {
            self.lower(ty, parent);
        }

        let mut cursor = node.walk();
        let declarators: Vec<TsNode> = node.children_by_field_name("declarator", &mut cursor).collect();
        for declarator in declarators {
            let Some(name_node) = declarator_name(declarator) else {
                self.lower(declarator, parent);
                continue;
            };
            let name = self.text(name_node);

            if is_function_declarator(declarator) {
                let id = self.push(parent, CursorKind::FunctionDecl, name, name_node);
                self.symbols
                    .function_decls
                    .entry(name.to_string())
                    .or_default()
                    .push(id);
                self.scopes.push(HashMap::new());
                self.lower_declarator(declarator, id);
                self.scopes.pop();
            } else {
                let id = self.push(parent, CursorKind::VarDecl, name, name_node);
                self.declare_value(name, id);
                self.lower_declarator(declarator, id);
            }
        }
    }

    fn lower_field_declaration(&mut self, node: TsNode, parent: NodeId) {
        if let Some(ty) = node.child_by_field_name("type") {
            self.lower(ty, parent);
        }

        let mut cursor = node.walk();
        let declarators: Vec<TsNode> = node.children_by_field_name("declarator", &mut cursor).collect();
        for declarator in declarators {
            let Some(name_node) = declarator_name(declarator) else {
                continue;
            };
            let name = self.text(name_node);

            if is_function_declarator(declarator) {
                let id = self.push(parent, CursorKind::FunctionDecl, name, name_node);
                self.symbols
                    .function_decls
                    .entry(name.to_string())
                    .or_default()
                    .push(id);
                self.scopes.push(HashMap::new());
                self.lower_declarator(declarator, id);
                self.scopes.pop();
            } else {
                let id = self.push_self_defined(parent, CursorKind::FieldDecl, name, name_node);
                self.symbols.fields.entry(name.to_string()).or_insert(id);
                self.lower_declarator(declarator, id);
            }
        }
    }

    fn lower_parameter(&mut self, node: TsNode, parent: NodeId) {
        let declarator = node.child_by_field_name("declarator");
        let name_node = declarator.and_then(|d| declarator_name(d));
        let name = name_node.map(|n| self.text(n)).unwrap_or_default();

        let id = self.push(parent, CursorKind::ParmDecl, name, name_node.unwrap_or(node));
        if !name.is_empty() {
            self.declare_value(name, id);
        }

        if let Some(ty) = node.child_by_field_name("type") {
            self.lower(ty, id);
        }
        if let Some(declarator) = declarator {
            self.lower_declarator(declarator, id);
        }
        if let Some(default_value) = node.child_by_field_name("default_value") {
            self.lower(default_value, id);
        }
    }

    fn lower_typedef(&mut self, node: TsNode, parent: NodeId) {
        if let Some(ty) = node.child_by_field_name("type") {
            self.lower(ty, parent);
        }

        let mut cursor = node.walk();
        let declarators: Vec<TsNode> = node.children_by_field_name("declarator", &mut cursor).collect();
        for declarator in declarators {
            let Some(name_node) = declarator_name(declarator) else {
                continue;
            };
            let name = self.text(name_node);
            let id = self.push_self_defined(parent, CursorKind::TypedefDecl, name, name_node);
            self.symbols.typedefs.entry(name.to_string()).or_insert(id);
            self.scopes.push(HashMap::new());
            self.lower_declarator(declarator, id);
            self.scopes.pop();
        }
    }

    /// `struct`, `union` and `class` specifiers.
    fn lower_record(&mut self, node: TsNode, parent: NodeId) {
        let name_node = node.child_by_field_name("name");
        let name = name_node.map(|n| self.text(n)).unwrap_or_default();

        match node.child_by_field_name("body") {
            Some(body) => {
                let id = self.push_self_defined(parent, CursorKind::StructDecl, name, name_node.unwrap_or(node));
                if !name.is_empty() {
                    self.symbols.tag_defs.entry(name.to_string()).or_insert(id);
                }
                self.lower_children(body, id);
            }
            None if is_type_position(node) => self.push_tag_ref(node, name_node, parent),
            None => {
                let id = self.push(parent, CursorKind::StructDecl, name, name_node.unwrap_or(node));
                if !name.is_empty() {
                    self.symbols.tag_decls.entry(name.to_string()).or_default().push(id);
                }
            }
        }
    }

    fn lower_enum(&mut self, node: TsNode, parent: NodeId) {
        let name_node = node.child_by_field_name("name");
        let name = name_node.map(|n| self.text(n)).unwrap_or_default();

        match node.child_by_field_name("body") {
            Some(body) => {
                let id = self.push_self_defined(parent, CursorKind::EnumDecl, name, name_node.unwrap_or(node));
                if !name.is_empty() {
                    self.symbols.tag_defs.entry(name.to_string()).or_insert(id);
                }
                self.lower_children(body, id);
            }
            None if is_type_position(node) => self.push_tag_ref(node, name_node, parent),
            None => {
                let id = self.push(parent, CursorKind::EnumDecl, name, name_node.unwrap_or(node));
                if !name.is_empty() {
                    self.symbols.tag_decls.entry(name.to_string()).or_default().push(id);
                }
            }
        }
    }

    fn push_tag_ref(&mut self, node: TsNode, name_node: Option<TsNode>, parent: NodeId) {
        let Some(name_node) = name_node else {
            return;
        };
        let name = self.text(name_node);
        let keyword = node.kind().trim_end_matches("_specifier");
        let spelling = format!("{} {}", keyword, name);
        let id = self.push(parent, CursorKind::TypeRef, &spelling, name_node);
        self.reference(id, Space::Tag, name);
    }

    fn lower_enumerator(&mut self, node: TsNode, parent: NodeId) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);
        let id = self.push_self_defined(parent, CursorKind::EnumConstantDecl, name, name_node);
        self.symbols.enumerators.entry(name.to_string()).or_insert(id);
        if let Some(value) = node.child_by_field_name("value") {
            self.lower(value, id);
        }
    }

    fn lower_macro_definition(&mut self, node: TsNode, parent: NodeId) {
        if !self.options.detailed_preprocessing_record {
            return;
        }
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name_node);
        let id = self.push_self_defined(parent, CursorKind::MacroDefinition, name, name_node);
        self.symbols.macros.insert(name.to_string(), id);
    }

    fn lower_include(&mut self, node: TsNode, parent: NodeId) {
        if !self.options.detailed_preprocessing_record {
            return;
        }
        let Some(path) = node.child_by_field_name("path") else {
            return;
        };
        let angled = path.kind() == "system_lib_string";
        let spelling = self
            .text(path)
            .trim_matches(|c| c == '"' || c == '<' || c == '>')
            .to_string();

        let id = self.push(parent, CursorKind::InclusionDirective, &spelling, node);
        if let Some(found) = self.search.resolve(&spelling, angled) {
            self.tree.set_included_file(id, found);
        }
    }

    /// `#ifdef NAME` is not an expansion of NAME; only the guarded body is lowered.
    fn lower_ifdef(&mut self, node: TsNode, parent: NodeId) {
        let id = self.push(parent, CursorKind::Unexposed(node.kind().to_string()), "", node);
        let name = node.child_by_field_name("name");
        let mut cursor = node.walk();
        let children: Vec<TsNode> = node.named_children(&mut cursor).collect();
        for child in children {
            if Some(child) != name {
                self.lower(child, id);
            }
        }
    }

    fn lower_call(&mut self, node: TsNode, parent: NodeId) {
        let function = node.child_by_field_name("function");
        let arguments = node.child_by_field_name("arguments");

        if let Some(callee) = function.filter(|f| f.kind() == "identifier") {
            let name = self.text(callee);
            if let Some(&macro_id) = self.symbols.macros.get(name) {
                if self.options.detailed_preprocessing_record {
                    let id = self.push(parent, CursorKind::MacroExpansion, name, callee);
                    self.tree.set_referenced(id, macro_id);
                    if let Some(arguments) = arguments {
                        self.lower_children(arguments, id);
                    }
                    return;
                }
            }
        }

        let callee_name = function.and_then(|f| match f.kind() {
            "identifier" | "qualified_identifier" => Some(f),
            "field_expression" => f.child_by_field_name("field"),
            _ => None,
        });
        let name = callee_name.map(|n| self.text(n)).unwrap_or_default();

        let id = self.push(parent, CursorKind::CallExpr, name, node);
        if !name.is_empty() {
            self.reference(id, Space::Call, name);
        }
        if let Some(function) = function {
            self.lower(function, id);
        }
        if let Some(arguments) = arguments {
            self.lower_children(arguments, id);
        }
    }

    fn lower_member(&mut self, node: TsNode, parent: NodeId) {
        let field = node.child_by_field_name("field");
        let name = field.map(|f| self.text(f)).unwrap_or_default();

        let id = self.push(parent, CursorKind::MemberRefExpr, name, field.unwrap_or(node));
        if !name.is_empty() {
            self.reference(id, Space::Field, name);
        }
        if let Some(argument) = node.child_by_field_name("argument") {
            self.lower(argument, id);
        }
    }

    fn lower_identifier(&mut self, node: TsNode, parent: NodeId) {
        if node.parent().is_some_and(|p| p.kind() == "preproc_defined") {
            return;
        }
        let name = self.text(node);

        if self.options.detailed_preprocessing_record {
            if let Some(&macro_id) = self.symbols.macros.get(name) {
                let id = self.push(parent, CursorKind::MacroExpansion, name, node);
                self.tree.set_referenced(id, macro_id);
                return;
            }
        }

        let id = self.push(parent, CursorKind::DeclRefExpr, name, node);
        self.reference(id, Space::Value, name);
    }

    fn lower_type_ref(&mut self, node: TsNode, parent: NodeId) {
        let name = self.text(node);
        let id = self.push(parent, CursorKind::TypeRef, name, node);
        self.reference(id, Space::Type, name);
    }
}

/// Node kinds that spell a declared name.
fn is_name_kind(kind: &str) -> bool {
    matches!(
        kind,
        "identifier"
            | "field_identifier"
            | "type_identifier"
            | "qualified_identifier"
            | "destructor_name"
            | "operator_name"
    )
}

fn is_declarator_kind(kind: &str) -> bool {
    kind.ends_with("_declarator") || is_name_kind(kind)
}

/// The identifier a declarator declares, looking through pointers, arrays,
/// parentheses and initializers.
fn declarator_name(node: TsNode) -> Option<TsNode> {
    let mut current = node;
    loop {
        if is_name_kind(current.kind()) {
            return Some(current);
        }
        current = match current.child_by_field_name("declarator") {
            Some(inner) => inner,
            None => {
                let mut cursor = current.walk();
                let inner = current
                    .named_children(&mut cursor)
                    .find(|child| is_declarator_kind(child.kind()));
                inner?
            }
        };
    }
}

/// True when the declarator declares a function rather than an object, which
/// excludes function pointers such as `int (*fp)(int)`.
fn is_function_declarator(node: TsNode) -> bool {
    let mut current = node;
    loop {
        match current.kind() {
            "function_declarator" => {
                return current
                    .child_by_field_name("declarator")
                    .is_some_and(|inner| inner.kind() != "parenthesized_declarator");
            }
            "pointer_declarator" | "reference_declarator" | "attributed_declarator" => {
                let next = current.child_by_field_name("declarator").or_else(|| {
                    let mut cursor = current.walk();
                    let found = current
                        .named_children(&mut cursor)
                        .find(|child| is_declarator_kind(child.kind()));
                    found
                });
                match next {
                    Some(next) => current = next,
                    None => return false,
                }
            }
            _ => return false,
        }
    }
}

/// A specifier without a body names a type when its parent uses it as the
/// `type` of something; on its own (`struct S;`) it is a forward declaration.
fn is_type_position(node: TsNode) -> bool {
    let Some(parent) = node.parent() else {
        return false;
    };
    if matches!(parent.kind(), "declaration" | "field_declaration")
        && parent.child_by_field_name("declarator").is_none()
    {
        return false;
    }
    parent.child_by_field_name("type").is_some_and(|ty| ty == node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Cursor, TranslationUnit, VisitResult};
    use tempfile::tempdir;

    const SAMPLE: &str = "#include \"util.h\"
#define MAX(a, b) ((a) > (b) ? (a) : (b))
#define LIMIT 10

struct point;
struct point { int x; int y; };
typedef struct point point_t;
enum color { RED, GREEN };

int add(int count, int);
int add(int count, int step) {
    int total = count + step;
    return MAX(total, LIMIT);
}

int main(void) {
    point_t p;
    p.x = add(1, 2);
    return p.x;
}
";

    struct Flat {
        kind: CursorKind,
        spelling: String,
        line: u32,
        definition_line: Option<u32>,
        referenced_line: Option<u32>,
        included_file: Option<String>,
    }

    fn flatten(unit: &SyntaxTree) -> Vec<Flat> {
        let mut out = Vec::new();
        unit.traverse(&mut |cursor| {
            out.push(Flat {
                kind: cursor.kind().clone(),
                spelling: cursor.spelling().to_string(),
                line: cursor.location().line,
                definition_line: cursor.definition().map(|d| d.location().line),
                referenced_line: cursor.referenced().map(|r| r.location().line),
                included_file: cursor.included_file().map(str::to_string),
            });
            VisitResult::Recurse
        });
        out
    }

    fn find<'a>(flat: &'a [Flat], kind: CursorKind, spelling: &str, line: u32) -> &'a Flat {
        flat.iter()
            .find(|f| f.kind == kind && f.spelling == spelling && f.line == line)
            .unwrap_or_else(|| panic!("no {} '{}' at line {}", kind, spelling, line))
    }

    fn parse_sample(options: ParseOptions) -> (tempfile::TempDir, SyntaxTree) {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("util.h"), "int helper(void);\n").unwrap();
        let file = dir.path().join("sample.c");
        std::fs::write(&file, SAMPLE).unwrap();
        let unit = TreeSitterProvider::new().parse(&file, &[], options).unwrap();
        (dir, unit)
    }

    #[test]
    fn test_declarations_and_definitions() {
        let (_dir, unit) = parse_sample(ParseOptions::default());
        let flat = flatten(&unit);

        let prototype = find(&flat, CursorKind::FunctionDecl, "add", 10);
        assert_eq!(prototype.definition_line, Some(11));
        let definition = find(&flat, CursorKind::FunctionDecl, "add", 11);
        assert_eq!(definition.definition_line, Some(11));

        let forward = find(&flat, CursorKind::StructDecl, "point", 5);
        assert_eq!(forward.definition_line, Some(6));
        find(&flat, CursorKind::FieldDecl, "x", 6);
        find(&flat, CursorKind::TypedefDecl, "point_t", 7);
        find(&flat, CursorKind::EnumDecl, "color", 8);
        find(&flat, CursorKind::EnumConstantDecl, "GREEN", 8);
        find(&flat, CursorKind::VarDecl, "total", 12);
        find(&flat, CursorKind::VarDecl, "p", 17);

        let macro_def = find(&flat, CursorKind::MacroDefinition, "MAX", 2);
        assert_eq!(macro_def.definition_line, Some(2));
    }

    #[test]
    fn test_parameters() {
        let (_dir, unit) = parse_sample(ParseOptions::default());
        let flat = flatten(&unit);

        let on_line_10: Vec<&str> = flat
            .iter()
            .filter(|f| f.kind == CursorKind::ParmDecl && f.line == 10)
            .map(|f| f.spelling.as_str())
            .collect();
        assert_eq!(on_line_10, vec!["count", ""]);

        // `int main(void)` declares no named parameter
        assert!(!flat
            .iter()
            .any(|f| f.kind == CursorKind::ParmDecl && f.line == 16 && !f.spelling.is_empty()));
    }

    #[test]
    fn test_references() {
        let (_dir, unit) = parse_sample(ParseOptions::default());
        let flat = flatten(&unit);

        let call = find(&flat, CursorKind::CallExpr, "add", 18);
        assert_eq!(call.referenced_line, Some(11));

        let max = find(&flat, CursorKind::MacroExpansion, "MAX", 13);
        assert_eq!(max.referenced_line, Some(2));
        let limit = find(&flat, CursorKind::MacroExpansion, "LIMIT", 13);
        assert_eq!(limit.referenced_line, Some(3));
        assert!(!flat.iter().any(|f| f.kind == CursorKind::CallExpr && f.spelling == "MAX"));

        let member = find(&flat, CursorKind::MemberRefExpr, "x", 18);
        assert_eq!(member.referenced_line, Some(6));

        let local = find(&flat, CursorKind::DeclRefExpr, "count", 12);
        assert_eq!(local.referenced_line, Some(11));

        let typedef_ref = find(&flat, CursorKind::TypeRef, "point_t", 17);
        assert_eq!(typedef_ref.referenced_line, Some(7));
        let tag_ref = find(&flat, CursorKind::TypeRef, "struct point", 7);
        assert_eq!(tag_ref.referenced_line, Some(6));
    }

    #[test]
    fn test_include_resolution() {
        let (dir, unit) = parse_sample(ParseOptions::default());
        let flat = flatten(&unit);

        let include = find(&flat, CursorKind::InclusionDirective, "util.h", 1);
        let expected = dir.path().join("util.h").to_string_lossy().to_string();
        assert_eq!(include.included_file.as_deref(), Some(expected.as_str()));
    }

    #[test]
    fn test_angled_include_uses_search_path() {
        let dir = tempdir().unwrap();
        let include_dir = dir.path().join("include");
        std::fs::create_dir_all(&include_dir).unwrap();
        std::fs::write(include_dir.join("lib.h"), "").unwrap();
        let file = dir.path().join("main.c");
        std::fs::write(&file, "#include <lib.h>\n#include <missing.h>\n").unwrap();

        let flags = vec![format!("-I{}", include_dir.display())];
        let unit = TreeSitterProvider::new()
            .parse(&file, &flags, ParseOptions::default())
            .unwrap();
        let flat = flatten(&unit);

        let found = find(&flat, CursorKind::InclusionDirective, "lib.h", 1);
        assert!(found.included_file.as_deref().unwrap().ends_with("lib.h"));
        let missing = find(&flat, CursorKind::InclusionDirective, "missing.h", 2);
        assert!(missing.included_file.is_none());
    }

    #[test]
    fn test_without_preprocessing_record() {
        let options = ParseOptions {
            detailed_preprocessing_record: false,
            ..ParseOptions::default()
        };
        let (_dir, unit) = parse_sample(options);
        let flat = flatten(&unit);

        assert!(!flat.iter().any(|f| matches!(
            f.kind,
            CursorKind::MacroDefinition | CursorKind::MacroExpansion | CursorKind::InclusionDirective
        )));
        // Without macro knowledge MAX(...) looks like an unresolved call
        let call = find(&flat, CursorKind::CallExpr, "MAX", 13);
        assert_eq!(call.referenced_line, None);
    }

    #[test]
    fn test_skip_function_bodies() {
        let options = ParseOptions {
            skip_function_bodies: true,
            ..ParseOptions::default()
        };
        let (_dir, unit) = parse_sample(options);
        let flat = flatten(&unit);

        find(&flat, CursorKind::FunctionDecl, "main", 16);
        assert!(!flat.iter().any(|f| f.kind == CursorKind::CallExpr));
        assert!(!flat.iter().any(|f| f.kind == CursorKind::VarDecl && f.spelling == "total"));
    }

    #[test]
    fn test_syntax_errors_and_keep_going() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("broken.c");
        std::fs::write(&file, "int main( { return ; \n").unwrap();
        let provider = TreeSitterProvider::new();

        let strict = ParseOptions {
            keep_going: false,
            ..ParseOptions::default()
        };
        assert!(matches!(
            provider.parse(&file, &[], strict),
            Err(ProviderError::Parse { .. })
        ));

        let unit = provider.parse(&file, &[], ParseOptions::default()).unwrap();
        assert!(unit.has_errors());
    }

    fn else_if_chain(branches: usize) -> String {
        let mut source = String::from("int pick(int x) {\n    if (x == 0) { return 0; }\n");
        for i in 1..branches {
            source.push_str(&format!("    else if (x == {i}) {{ return {i}; }}\n"));
        }
        source.push_str("    return -1;\n}\n");
        source
    }

    #[test]
    fn test_nesting_limit() {
        let dir = tempdir().unwrap();
        let provider = TreeSitterProvider::new();

        let shallow = dir.path().join("shallow.c");
        std::fs::write(&shallow, else_if_chain(100)).unwrap();
        let unit = provider.parse(&shallow, &[], ParseOptions::default()).unwrap();
        find(&flatten(&unit), CursorKind::FunctionDecl, "pick", 1);

        let deep = dir.path().join("deep.c");
        std::fs::write(&deep, else_if_chain(5000)).unwrap();
        match provider.parse(&deep, &[], ParseOptions::default()) {
            Err(ProviderError::Parse { reason, .. }) => assert!(reason.contains("nesting")),
            other => panic!("expected a nesting error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_deep_pointer_declarator() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("ptr.c");
        std::fs::write(&file, format!("int {}p;\n", "*".repeat(5000))).unwrap();

        let result = TreeSitterProvider::new().parse(&file, &[], ParseOptions::default());
        assert!(matches!(result, Err(ProviderError::Parse { .. })));
    }

    #[test]
    fn test_missing_file() {
        let result = TreeSitterProvider::new().parse(Path::new("/no/such/file.c"), &[], ParseOptions::default());
        assert!(matches!(result, Err(ProviderError::Io { .. })));
    }

    #[test]
    fn test_function_pointer_is_a_variable() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("fp.c");
        std::fs::write(&file, "int (*handler)(int);\nint *make(void);\n").unwrap();
        let unit = TreeSitterProvider::new()
            .parse(&file, &[], ParseOptions::default())
            .unwrap();
        let flat = flatten(&unit);

        find(&flat, CursorKind::VarDecl, "handler", 1);
        find(&flat, CursorKind::FunctionDecl, "make", 2);
    }

    #[test]
    fn test_cpp_dialect() {
        assert_eq!(Dialect::detect(Path::new("a.c"), &[]), Dialect::C);
        assert_eq!(Dialect::detect(Path::new("a.h"), &[]), Dialect::C);
        assert_eq!(Dialect::detect(Path::new("a.cc"), &[]), Dialect::Cpp);
        assert_eq!(Dialect::detect(Path::new("a.h"), &["-x".into(), "c++".into()]), Dialect::Cpp);
        assert_eq!(Dialect::detect(Path::new("a.cpp"), &["-xc".into()]), Dialect::C);

        let dir = tempdir().unwrap();
        let file = dir.path().join("shape.cpp");
        std::fs::write(
            &file,
            "class Shape {\n  int sides;\n};\nint area(Shape s);\nint use() { Shape s; return area(s); }\n",
        )
        .unwrap();
        let unit = TreeSitterProvider::new()
            .parse(&file, &[], ParseOptions::default())
            .unwrap();
        let flat = flatten(&unit);

        find(&flat, CursorKind::StructDecl, "Shape", 1);
        find(&flat, CursorKind::FieldDecl, "sides", 2);
        let call = find(&flat, CursorKind::CallExpr, "area", 5);
        assert_eq!(call.referenced_line, Some(4));
    }

    #[test]
    fn test_saved_unit_reconstructs() {
        let (dir, unit) = parse_sample(ParseOptions::default());
        let saved = dir.path().join("sample.ast");
        unit.save(&saved, crate::ast::SaveOptions { keep_going: true }).unwrap();

        let restored = TreeSitterProvider::new().reconstruct(&saved).unwrap();
        assert_eq!(restored, unit);
    }
}
