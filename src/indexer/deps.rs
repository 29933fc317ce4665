//! Dependency graph construction.
//!
//! The graph is always rebuilt from the whole index, since an edge may
//! cross into files outside a changed set. Three edge kinds exist:
//!
//! - **import**: file → file, for relative imports that resolve to an
//!   indexed file. Package imports never produce edges.
//! - **call**: function/method → the symbol its called name resolves to.
//! - **inheritance**: class → the class it extends or implements.
//!
//! Name resolution is first match wins over symbols in id order. It is not
//! scope-aware: two functions with the same name in different files resolve
//! to whichever id sorts first.

use std::collections::{BTreeMap, HashMap};

use codectx_core::graph::DependencyGraph;
use codectx_core::models::{CodebaseIndex, FileIndex, SymbolKind};

/// Extensions tried, in order, when resolving an extensionless import.
const CANDIDATE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs", "py", "rs"];

/// Directory entry files tried when an import names a directory.
const INDEX_FILES: &[&str] = &[
    "index.ts",
    "index.tsx",
    "index.js",
    "index.jsx",
    "__init__.py",
    "mod.rs",
];

pub fn rebuild_graph(index: &mut CodebaseIndex) {
    let mut graph = DependencyGraph::new();
    for path in index.files.keys() {
        graph.add_node(path.as_str());
    }
    for id in index.symbols.keys() {
        graph.add_node(id.as_str());
    }

    for file in index.files.values() {
        for source in &file.imports {
            if let Some(target) = resolve_import(&file.path, source, &index.files) {
                graph.add_edge(&file.path, &target);
            }
        }
    }

    let mut callables: HashMap<&str, &str> = HashMap::new();
    let mut classes: HashMap<&str, &str> = HashMap::new();
    for symbol in index.symbols.values() {
        let table = match symbol.kind {
            SymbolKind::Class => &mut classes,
            SymbolKind::Function | SymbolKind::Method => &mut callables,
        };
        table.entry(symbol.name.as_str()).or_insert(symbol.id.as_str());
    }

    for symbol in index.symbols.values() {
        for name in &symbol.references {
            let target = match symbol.kind {
                SymbolKind::Class => classes.get(name.as_str()),
                SymbolKind::Function | SymbolKind::Method => callables
                    .get(name.as_str())
                    .or_else(|| classes.get(name.as_str())),
            };
            if let Some(target) = target {
                graph.add_edge(&symbol.id, target);
            }
        }
    }

    index.graph = graph;
}

/// Resolve a relative import written in `from` to an indexed file path.
pub fn resolve_import(
    from: &str,
    source: &str,
    files: &BTreeMap<String, FileIndex>,
) -> Option<String> {
    if !(source.starts_with("./") || source.starts_with("../")) {
        return None;
    }
    let base = match from.rsplit_once('/') {
        Some((dir, _)) => dir,
        None => "",
    };
    let joined = normalize(&format!("{}/{}", base, source))?;

    let mut candidates = vec![joined.clone()];
    // `import './b.js'` in TypeScript names the compiled output of `b.ts`.
    if let Some(stem) = joined
        .strip_suffix(".js")
        .or_else(|| joined.strip_suffix(".jsx"))
    {
        candidates.push(format!("{}.ts", stem));
        candidates.push(format!("{}.tsx", stem));
    }
    candidates.extend(CANDIDATE_EXTENSIONS.iter().map(|e| format!("{}.{}", joined, e)));
    candidates.extend(INDEX_FILES.iter().map(|f| format!("{}/{}", joined, f)));

    candidates.into_iter().find(|c| files.contains_key(c))
}

/// Collapse `.` and `..` segments. `None` when the path escapes the root.
fn normalize(path: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            s => parts.push(s),
        }
    }
    Some(parts.join("/"))
}
