use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use cxxgraph::ast::tree::{Node, SyntaxTree, ROOT};
use cxxgraph::ast::{AstProvider, CursorKind, ParseOptions, TreeSitterProvider};
use cxxgraph::index::cache::{content_key, path_key};
use cxxgraph::index::SourceLocation;
use cxxgraph::indexer::extractor::Extractor;

const PATH: &str = "/bench/src/generated.c";

/// Synthetic tree with `functions` definitions, each holding a parameter, a
/// local, a call to the previous function and a macro expansion.
fn synthetic_tree(functions: u32) -> SyntaxTree {
    let loc = |line| SourceLocation::new(PATH, line, 1, line * 32);
    let mut tree = SyntaxTree::new(PATH);
    let limit = tree.push(ROOT, Node::new(CursorKind::MacroDefinition, "LIMIT", loc(1)));
    tree.set_definition(limit, limit);

    let mut previous = None;
    for i in 0..functions {
        let line = 2 + i * 5;
        let def = tree.push(ROOT, Node::new(CursorKind::FunctionDecl, format!("f{}", i), loc(line)));
        tree.set_definition(def, def);
        tree.push(def, Node::new(CursorKind::ParmDecl, "count", loc(line)));
        let body = tree.push(def, Node::new(CursorKind::Unexposed("compound_statement".into()), "", loc(line)));
        tree.push(body, Node::new(CursorKind::VarDecl, "total", loc(line + 1)));
        let call = tree.push(body, Node::new(CursorKind::CallExpr, "f", loc(line + 2)));
        if let Some(previous) = previous {
            tree.set_referenced(call, previous);
        }
        let expansion = tree.push(call, Node::new(CursorKind::MacroExpansion, "LIMIT", loc(line + 2)));
        tree.set_referenced(expansion, limit);
        previous = Some(def);
    }
    tree
}

fn generated_source(functions: usize) -> String {
    let mut source = String::from("#define LIMIT 8\nint f0(int count) { return count; }\n");
    for i in 1..functions {
        source.push_str(&format!(
            "int f{i}(int count) {{\n  int total = count + LIMIT;\n  return f{}(total);\n}}\n",
            i - 1
        ));
    }
    source
}

fn bench_extract(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract");
    let extractor = Extractor::default();

    for functions in [100u32, 1000] {
        let tree = synthetic_tree(functions);
        group.bench_with_input(BenchmarkId::from_parameter(functions), &tree, |b, tree| {
            b.iter(|| extractor.extract(tree, PATH, &[]));
        });
    }

    group.finish();
}

fn bench_record_encode(c: &mut Criterion) {
    let tree = synthetic_tree(1000);
    let mut record = Extractor::default().extract(&tree, PATH, &[]);
    record.set_translation_unit(tree.to_bytes().unwrap());

    c.bench_function("record_encode_1000", |b| b.iter(|| record.to_bytes().unwrap()));
}

fn bench_cache_keys(c: &mut Criterion) {
    let content = generated_source(200).into_bytes();
    let flags: Vec<String> = (0..20).map(|i| format!("-I/usr/include/lib{}", i)).collect();

    c.bench_function("path_key", |b| b.iter(|| path_key(PATH)));
    c.bench_function("content_key", |b| b.iter(|| content_key(PATH, &content, &flags)));
}

fn bench_tree_sitter_parse(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("generated.c");
    std::fs::write(&file, generated_source(200)).unwrap();
    let provider = TreeSitterProvider::new();

    c.bench_function("tree_sitter_parse_200", |b| {
        b.iter(|| provider.parse(&file, &[], ParseOptions::default()).unwrap());
    });
}

criterion_group!(
    benches,
    bench_extract,
    bench_record_encode,
    bench_cache_keys,
    bench_tree_sitter_parse
);
criterion_main!(benches);
