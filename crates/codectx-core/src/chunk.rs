//! Semantic code chunker.
//!
//! Turns a built [`CodebaseIndex`] plus the source text of its files into
//! [`CodeChunk`]s labeled by role. Chunks are produced in priority order:
//!
//! 1. **Function chunks**: one per top-level function. Oversized functions
//!    are dropped, never truncated, so no incoherent fragment gets embedded.
//! 2. **Class chunks**: properties and method signatures followed by the
//!    class body, under the same size policy.
//! 3. **File chunks**: whole small files that no function or class chunk
//!    already covers.
//! 4. **Documentation chunks**: README, CONTRIBUTING, ARCHITECTURE, API,
//!    and CHANGELOG files, split on paragraph boundaries.
//!
//! Each chunk's embedding text starts with a short header naming the file,
//! the symbol, and a truncated dependency list, which biases the embedding
//! toward the chunk's semantic role. Chunk ids are derived from the chunk's
//! position, so re-chunking an unchanged file yields the same ids.
//!
//! # Example
//!
//! ```rust
//! use codectx_core::chunk::{is_documentation_file, CodeChunker, ChunkerConfig};
//!
//! assert!(is_documentation_file("docs/ARCHITECTURE.md"));
//! let chunker = CodeChunker::new(ChunkerConfig::default());
//! let docs = chunker.chunk_documentation("README.md", "# Title\n\nBody.", 0);
//! assert_eq!(docs.len(), 1);
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::content_hash;
use crate::models::{
    ChunkMetadata, ChunkType, CodeChunk, CodebaseIndex, FileIndex, Symbol, SymbolKind,
};

/// Approximate characters-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// File stems recognized as project documentation.
pub const DOC_FILE_STEMS: &[&str] = &["README", "CONTRIBUTING", "ARCHITECTURE", "API", "CHANGELOG"];

/// Keyword → tag table. A tag applies when any keyword occurs in the
/// lowercased symbol name or file path.
const TAG_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "authentication",
        &["auth", "login", "logout", "session", "password", "credential", "jwt", "oauth"],
    ),
    ("validation", &["valid", "verify", "sanitiz", "assert", "check"]),
    (
        "database",
        &["database", "sql", "query", "repository", "schema", "migration", "db"],
    ),
    (
        "api",
        &["api", "route", "endpoint", "handler", "controller", "request", "response", "http"],
    ),
    ("testing", &["test", "spec", "mock", "fixture"]),
    ("configuration", &["config", "setting", "env", "option"]),
    ("error-handling", &["error", "exception", "retry", "fail"]),
    ("parsing", &["parse", "lexer", "tokeniz", "serializ", "deserializ"]),
    ("caching", &["cache", "memo"]),
    ("ui", &["component", "view", "render", "widget", "page"]),
    ("utility", &["util", "helper"]),
];

/// Complexity above which a chunk is tagged `complex`.
const COMPLEX_THRESHOLD: u32 = 10;

/// Size limits for the chunker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    pub max_function_chars: usize,
    pub max_class_chars: usize,
    pub max_file_chars: usize,
    pub max_header_dependencies: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_function_chars: 4000,
            max_class_chars: 8000,
            max_file_chars: 6000,
            max_header_dependencies: 5,
        }
    }
}

/// Output of a chunking pass.
#[derive(Debug, Clone, Default)]
pub struct ChunkSet {
    pub chunks: Vec<CodeChunk>,
    /// Function and class chunks dropped for exceeding their size limit.
    pub oversized: usize,
    /// Indexed files whose source text was not supplied.
    pub missing_sources: usize,
}

/// Builds labeled chunks from an index.
#[derive(Debug, Clone, Default)]
pub struct CodeChunker {
    config: ChunkerConfig,
}

impl CodeChunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Chunk every file of `index` whose text is present in `sources`
    /// (relative path → content), then every documentation file in `docs`
    /// (relative path, content, modified unix seconds).
    pub fn chunk_index(
        &self,
        index: &CodebaseIndex,
        sources: &BTreeMap<String, String>,
        docs: &[(String, String, i64)],
    ) -> ChunkSet {
        let mut set = ChunkSet::default();
        let mut covered: BTreeSet<&str> = BTreeSet::new();
        let files: Vec<(&FileIndex, Vec<&str>)> = index
            .files
            .values()
            .filter_map(|file| match sources.get(&file.path) {
                Some(content) => Some((file, content.lines().collect())),
                None => {
                    set.missing_sources += 1;
                    None
                }
            })
            .collect();

        for (file, lines) in &files {
            for symbol in index.symbols_in(&file.path) {
                if symbol.kind != SymbolKind::Function {
                    continue;
                }
                match self.function_chunk(index, file, symbol, lines) {
                    Some(chunk) => {
                        covered.insert(file.path.as_str());
                        set.chunks.push(chunk);
                    }
                    None => set.oversized += 1,
                }
            }
        }

        for (file, lines) in &files {
            for symbol in index.symbols_in(&file.path) {
                if symbol.kind != SymbolKind::Class {
                    continue;
                }
                match self.class_chunk(index, file, symbol, lines) {
                    Some(chunk) => {
                        covered.insert(file.path.as_str());
                        set.chunks.push(chunk);
                    }
                    None => set.oversized += 1,
                }
            }
        }

        for (file, _) in &files {
            if covered.contains(file.path.as_str()) {
                continue;
            }
            let content = &sources[&file.path];
            if let Some(chunk) = self.file_chunk(index, file, content) {
                set.chunks.push(chunk);
            }
        }

        for (path, content, modified) in docs {
            set.chunks
                .extend(self.chunk_documentation(path, content, *modified));
        }

        set
    }

    fn function_chunk(
        &self,
        index: &CodebaseIndex,
        file: &FileIndex,
        symbol: &Symbol,
        lines: &[&str],
    ) -> Option<CodeChunk> {
        let (start, end, content) = span(lines, symbol.line, symbol.end_line);
        if content.trim().is_empty() || content.len() > self.config.max_function_chars {
            return None;
        }

        let mut header = format!("// File: {}\n// Function: {}", file.path, display_signature(symbol));
        if symbol.is_async {
            header.push_str(" (async)");
        }
        header.push('\n');
        header.push_str(&self.dependency_line(&symbol.references));
        if let Some(doc) = &symbol.doc {
            header.push_str(&format!("// Doc: {}\n", first_line(doc)));
        }

        let metadata = ChunkMetadata {
            language: file.language.clone(),
            symbol: Some(symbol.name.clone()),
            complexity: symbol.complexity,
            dependencies: symbol.references.clone(),
            exports: exported_names(symbol),
            tags: derive_tags(&symbol.name, &file.path, symbol.complexity, symbol.is_async),
            last_modified: file.modified,
            exported: symbol.exported,
            dependents: index.graph.dependent_count(&symbol.id),
        };

        Some(make_chunk(
            ChunkType::Function,
            &file.path,
            Some(&symbol.name),
            start,
            end,
            content,
            header,
            metadata,
        ))
    }

    fn class_chunk(
        &self,
        index: &CodebaseIndex,
        file: &FileIndex,
        symbol: &Symbol,
        lines: &[&str],
    ) -> Option<CodeChunk> {
        let (start, end, body) = span(lines, symbol.line, symbol.end_line);
        let methods: Vec<&Symbol> = index
            .symbols_in(&file.path)
            .filter(|s| s.kind == SymbolKind::Method && s.parent.as_deref() == Some(symbol.name.as_str()))
            .collect();

        let mut content = String::new();
        if !symbol.properties.is_empty() {
            content.push_str(&format!("// Properties: {}\n", symbol.properties.join(", ")));
        }
        if !methods.is_empty() {
            let sigs: Vec<String> = methods.iter().map(|m| display_signature(m)).collect();
            content.push_str(&format!("// Methods: {}\n", sigs.join(", ")));
        }
        content.push_str(&body);

        if body.trim().is_empty() || content.len() > self.config.max_class_chars {
            return None;
        }

        let header = format!(
            "// File: {}\n// Class: {}\n{}",
            file.path,
            symbol.name,
            self.dependency_line(&symbol.references)
        );

        let complexity = methods.iter().map(|m| m.complexity).sum::<u32>();
        let any_async = methods.iter().any(|m| m.is_async);
        let mut dependencies = symbol.references.clone();
        for method in &methods {
            for dep in &method.references {
                if !dependencies.contains(dep) {
                    dependencies.push(dep.clone());
                }
            }
        }

        let metadata = ChunkMetadata {
            language: file.language.clone(),
            symbol: Some(symbol.name.clone()),
            complexity,
            dependencies,
            exports: exported_names(symbol),
            tags: derive_tags(&symbol.name, &file.path, complexity, any_async),
            last_modified: file.modified,
            exported: symbol.exported,
            dependents: index.graph.dependent_count(&symbol.id),
        };

        Some(make_chunk(
            ChunkType::Class,
            &file.path,
            Some(&symbol.name),
            start,
            end,
            content,
            header,
            metadata,
        ))
    }

    fn file_chunk(&self, index: &CodebaseIndex, file: &FileIndex, content: &str) -> Option<CodeChunk> {
        if content.trim().is_empty() || content.len() > self.config.max_file_chars {
            return None;
        }
        let header = format!(
            "// File: {}\n// Language: {}\n{}",
            file.path,
            file.language,
            self.dependency_line(&file.imports)
        );
        let line_count = content.lines().count().max(1);
        let stem = file_stem(&file.path);
        let metadata = ChunkMetadata {
            language: file.language.clone(),
            symbol: None,
            complexity: file.complexity,
            dependencies: file.imports.clone(),
            exports: file.exports.clone(),
            tags: derive_tags(stem, &file.path, file.complexity, false),
            last_modified: file.modified,
            exported: !file.exports.is_empty(),
            dependents: index.graph.dependent_count(&file.path),
        };
        Some(make_chunk(
            ChunkType::File,
            &file.path,
            None,
            1,
            line_count,
            content.to_string(),
            header,
            metadata,
        ))
    }

    /// Split a documentation file on paragraph boundaries into chunks of at
    /// most `max_file_chars` characters. Paragraphs longer than the limit
    /// are split between lines.
    pub fn chunk_documentation(&self, path: &str, content: &str, modified: i64) -> Vec<CodeChunk> {
        let max_chars = self.config.max_file_chars.max(1);
        let mut chunks = Vec::new();
        for (start, end, text) in paragraph_sections(content, max_chars) {
            let header = format!("// Documentation: {}\n", path);
            let mut tags = derive_tags(file_stem(path), path, 0, false);
            tags.insert(0, "documentation".to_string());
            let metadata = ChunkMetadata {
                language: "markdown".to_string(),
                symbol: None,
                complexity: 0,
                dependencies: Vec::new(),
                exports: Vec::new(),
                tags,
                last_modified: modified,
                exported: false,
                dependents: 0,
            };
            chunks.push(make_chunk(
                ChunkType::Documentation,
                path,
                None,
                start,
                end,
                text,
                header,
                metadata,
            ));
        }
        chunks
    }

    fn dependency_line(&self, deps: &[String]) -> String {
        if deps.is_empty() {
            return String::new();
        }
        let limit = self.config.max_header_dependencies;
        let shown: Vec<&str> = deps.iter().take(limit).map(|s| s.as_str()).collect();
        let mut line = format!("// Dependencies: {}", shown.join(", "));
        if deps.len() > limit {
            line.push_str(&format!(" (+{} more)", deps.len() - limit));
        }
        line.push('\n');
        line
    }
}

fn display_signature(symbol: &Symbol) -> String {
    if symbol.signature.is_empty() {
        symbol.name.clone()
    } else {
        symbol.signature.clone()
    }
}

/// Whether `path` names a recognized documentation file.
pub fn is_documentation_file(path: &str) -> bool {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) => (stem, Some(ext.to_ascii_lowercase())),
        None => (name, None),
    };
    let ext_ok = matches!(ext.as_deref(), None | Some("md") | Some("txt") | Some("rst"));
    ext_ok && DOC_FILE_STEMS.iter().any(|d| d.eq_ignore_ascii_case(stem))
}

/// Tags from keyword matches on a name and path, plus structural signals.
pub fn derive_tags(name: &str, path: &str, complexity: u32, is_async: bool) -> Vec<String> {
    let name_words = words(name);
    let path_words = words(path);
    let name = name.to_lowercase();
    let path = path.to_lowercase();
    let mut tags: Vec<String> = TAG_KEYWORDS
        .iter()
        .filter(|(_, keywords)| {
            keywords.iter().any(|k| {
                if k.len() <= 3 {
                    name_words.iter().chain(path_words.iter()).any(|w| w == k)
                } else {
                    name.contains(k) || path.contains(k)
                }
            })
        })
        .map(|(tag, _)| tag.to_string())
        .collect();
    if complexity > COMPLEX_THRESHOLD {
        tags.push("complex".to_string());
    }
    if is_async {
        tags.push("async".to_string());
    }
    tags
}

/// Lowercased words of an identifier or path, split on punctuation and
/// camelCase humps. Short keywords must match a whole word so `db` does not
/// fire on `feedback`.
pub fn words(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in s.chars() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            out.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

/// Rough token count: one token per [`CHARS_PER_TOKEN`] characters.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

fn exported_names(symbol: &Symbol) -> Vec<String> {
    if symbol.exported {
        vec![symbol.name.clone()]
    } else {
        Vec::new()
    }
}

fn file_stem(path: &str) -> &str {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    name.split('.').next().unwrap_or(name)
}

fn first_line(text: &str) -> &str {
    text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("")
}

/// Lines `line..=end_line` (1-based) joined, with the span clamped to the
/// file. An `end_line` before `line` selects the single start line.
fn span(lines: &[&str], line: usize, end_line: usize) -> (usize, usize, String) {
    if lines.is_empty() {
        return (line.max(1), line.max(1), String::new());
    }
    let start = line.clamp(1, lines.len());
    let end = end_line.max(start).min(lines.len());
    (start, end, lines[start - 1..end].join("\n"))
}

/// Group paragraphs (blank-line separated) into sections of at most
/// `max_chars`, returning `(start_line, end_line, text)` with 1-based lines.
fn paragraph_sections(content: &str, max_chars: usize) -> Vec<(usize, usize, String)> {
    let mut paragraphs: Vec<(usize, usize, Vec<&str>)> = Vec::new();
    let mut current: Option<(usize, usize, Vec<&str>)> = None;
    for (i, line) in content.lines().enumerate() {
        let lineno = i + 1;
        if line.trim().is_empty() {
            if let Some(p) = current.take() {
                paragraphs.push(p);
            }
            continue;
        }
        match current.as_mut() {
            Some((_, end, lines)) => {
                *end = lineno;
                lines.push(line);
            }
            None => current = Some((lineno, lineno, vec![line])),
        }
    }
    if let Some(p) = current.take() {
        paragraphs.push(p);
    }

    let mut sections = Vec::new();
    let mut buf = String::new();
    let mut buf_start = 0;
    let mut buf_end = 0;

    for (start, end, lines) in paragraphs {
        let text = lines.join("\n");
        let would_be = if buf.is_empty() {
            text.len()
        } else {
            buf.len() + 2 + text.len()
        };
        if would_be > max_chars && !buf.is_empty() {
            flush(&mut buf, buf_start, buf_end, &mut sections);
        }
        if text.len() > max_chars {
            // Oversized paragraph: split between lines.
            for (offset, line) in lines.iter().enumerate() {
                let lineno = start + offset;
                let piece = truncate_at_char_boundary(line, max_chars);
                if !buf.is_empty() && buf.len() + 1 + piece.len() > max_chars {
                    flush(&mut buf, buf_start, buf_end, &mut sections);
                }
                if buf.is_empty() {
                    buf_start = lineno;
                } else {
                    buf.push('\n');
                }
                buf.push_str(piece);
                buf_end = lineno;
            }
            flush(&mut buf, buf_start, buf_end, &mut sections);
            continue;
        }
        if buf.is_empty() {
            buf_start = start;
        } else {
            buf.push_str("\n\n");
        }
        buf.push_str(&text);
        buf_end = end;
    }
    flush(&mut buf, buf_start, buf_end, &mut sections);
    sections
}

fn flush(buf: &mut String, start: usize, end: usize, sections: &mut Vec<(usize, usize, String)>) {
    if !buf.trim().is_empty() {
        sections.push((start, end, std::mem::take(buf)));
    }
    buf.clear();
}

/// Longest prefix of `s` with at most `max_bytes` bytes that ends on a
/// UTF-8 char boundary.
pub fn truncate_at_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut i = max_bytes;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    &s[..i]
}

#[allow(clippy::too_many_arguments)]
fn make_chunk(
    chunk_type: ChunkType,
    path: &str,
    symbol: Option<&str>,
    start_line: usize,
    end_line: usize,
    content: String,
    header: String,
    metadata: ChunkMetadata,
) -> CodeChunk {
    let id_source = format!(
        "{}:{}:{}:{}",
        chunk_type.as_str(),
        path,
        symbol.unwrap_or(""),
        start_line
    );
    let id = content_hash(&id_source)[..32].to_string();
    let hash = content_hash(&content);
    let embedding_text = format!("{}\n{}", header, content);
    CodeChunk {
        id,
        chunk_type,
        source_path: path.to_string(),
        start_line,
        end_line,
        content,
        embedding_text,
        hash,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol(file: &str, name: &str, kind: SymbolKind, line: usize, end_line: usize) -> Symbol {
        let id = Symbol::function_id(file, name, line);
        Symbol {
            id,
            name: name.to_string(),
            kind,
            file: file.to_string(),
            line,
            end_line,
            exported: true,
            doc: None,
            parent: None,
            signature: String::new(),
            complexity: 1,
            is_async: false,
            properties: Vec::new(),
            references: Vec::new(),
        }
    }

    fn file(path: &str, symbols: &[&Symbol]) -> FileIndex {
        FileIndex {
            path: path.to_string(),
            hash: String::new(),
            language: "typescript".to_string(),
            lines: 0,
            symbols: symbols.iter().map(|s| s.id.clone()).collect(),
            imports: vec!["./b".to_string()],
            exports: Vec::new(),
            complexity: 1,
            modified: 0,
        }
    }

    fn index_with(files: Vec<FileIndex>, symbols: Vec<Symbol>) -> CodebaseIndex {
        let mut index = CodebaseIndex::new("repo", "/tmp/repo");
        for f in files {
            index.files.insert(f.path.clone(), f);
        }
        for s in symbols {
            index.symbols.insert(s.id.clone(), s);
        }
        index
    }

    #[test]
    fn test_function_chunk_with_header() {
        let mut validate = symbol("src/a.ts", "validateInput", SymbolKind::Function, 1, 3);
        validate.references = (0..7).map(|i| format!("dep{}", i)).collect();
        let index = index_with(vec![file("src/a.ts", &[&validate])], vec![validate]);
        let mut sources = BTreeMap::new();
        sources.insert(
            "src/a.ts".to_string(),
            "function validateInput(x) {\n  return check(x);\n}\n".to_string(),
        );

        let set = CodeChunker::default().chunk_index(&index, &sources, &[]);
        assert_eq!(set.chunks.len(), 1);
        let chunk = &set.chunks[0];
        assert_eq!(chunk.chunk_type, ChunkType::Function);
        assert_eq!((chunk.start_line, chunk.end_line), (1, 3));
        assert!(chunk.embedding_text.starts_with("// File: src/a.ts\n// Function: validateInput"));
        assert!(chunk.embedding_text.contains("dep4 (+2 more)"));
        assert!(chunk.metadata.tags.contains(&"validation".to_string()));
        assert!(!chunk.content.contains("// File"));
    }

    #[test]
    fn test_oversized_function_dropped_not_truncated() {
        let big = symbol("src/big.ts", "huge", SymbolKind::Function, 1, 2);
        let index = index_with(vec![file("src/big.ts", &[&big])], vec![big]);
        let mut sources = BTreeMap::new();
        sources.insert("src/big.ts".to_string(), format!("function huge() {{\n{}\n}}", "x".repeat(50)));

        let chunker = CodeChunker::new(ChunkerConfig {
            max_function_chars: 20,
            max_file_chars: 10,
            ..Default::default()
        });
        let set = chunker.chunk_index(&index, &sources, &[]);
        assert_eq!(set.oversized, 1);
        assert!(set.chunks.is_empty());
    }

    #[test]
    fn test_file_chunk_only_when_uncovered() {
        let f = symbol("src/a.ts", "foo", SymbolKind::Function, 1, 1);
        let index = index_with(
            vec![file("src/a.ts", &[&f]), file("src/consts.ts", &[])],
            vec![f],
        );
        let mut sources = BTreeMap::new();
        sources.insert("src/a.ts".to_string(), "function foo() {}".to_string());
        sources.insert("src/consts.ts".to_string(), "export const X = 1;".to_string());

        let set = CodeChunker::default().chunk_index(&index, &sources, &[]);
        let types: Vec<(ChunkType, &str)> = set
            .chunks
            .iter()
            .map(|c| (c.chunk_type, c.source_path.as_str()))
            .collect();
        assert_eq!(
            types,
            vec![(ChunkType::Function, "src/a.ts"), (ChunkType::File, "src/consts.ts")]
        );
    }

    #[test]
    fn test_priority_order_and_class_content() {
        let class = symbol("src/a.ts", "UserRepository", SymbolKind::Class, 1, 4);
        let mut method = symbol("src/a.ts", "find", SymbolKind::Method, 2, 3);
        method.id = Symbol::method_id("src/a.ts", "UserRepository", "find", 2);
        method.parent = Some("UserRepository".to_string());
        method.signature = "find(id)".to_string();
        let helper = symbol("src/b.ts", "helper", SymbolKind::Function, 1, 1);
        let mut class_with_props = class.clone();
        class_with_props.properties = vec!["db".to_string()];

        let index = index_with(
            vec![file("src/a.ts", &[&class, &method]), file("src/b.ts", &[&helper])],
            vec![class_with_props, method, helper],
        );
        let mut sources = BTreeMap::new();
        sources.insert(
            "src/a.ts".to_string(),
            "class UserRepository {\n  find(id) {\n  }\n}".to_string(),
        );
        sources.insert("src/b.ts".to_string(), "function helper() {}".to_string());
        let docs = vec![("README.md".to_string(), "# Demo\n\nHello.".to_string(), 0)];

        let set = CodeChunker::default().chunk_index(&index, &sources, &docs);
        let types: Vec<ChunkType> = set.chunks.iter().map(|c| c.chunk_type).collect();
        assert_eq!(
            types,
            vec![ChunkType::Function, ChunkType::Class, ChunkType::Documentation]
        );
        let class_chunk = &set.chunks[1];
        assert!(class_chunk.content.starts_with("// Properties: db\n// Methods: find(id)\n"));
        assert!(class_chunk.metadata.tags.contains(&"database".to_string()));
    }

    #[test]
    fn test_chunk_ids_deterministic() {
        let f = symbol("src/a.ts", "foo", SymbolKind::Function, 1, 1);
        let index = index_with(vec![file("src/a.ts", &[&f])], vec![f]);
        let mut sources = BTreeMap::new();
        sources.insert("src/a.ts".to_string(), "function foo() {}".to_string());
        let a = CodeChunker::default().chunk_index(&index, &sources, &[]);
        let b = CodeChunker::default().chunk_index(&index, &sources, &[]);
        assert_eq!(a.chunks[0].id, b.chunks[0].id);
        assert_eq!(a.chunks[0].hash, b.chunks[0].hash);
    }

    #[test]
    fn test_missing_source_counted() {
        let index = index_with(vec![file("src/gone.ts", &[])], vec![]);
        let set = CodeChunker::default().chunk_index(&index, &BTreeMap::new(), &[]);
        assert_eq!(set.missing_sources, 1);
        assert!(set.chunks.is_empty());
    }

    #[test]
    fn test_documentation_split_on_paragraphs() {
        let chunker = CodeChunker::new(ChunkerConfig {
            max_file_chars: 30,
            ..Default::default()
        });
        let text = "# Title\n\nFirst paragraph here.\n\nSecond paragraph here.\n";
        let chunks = chunker.chunk_documentation("README.md", text, 0);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 3);
        assert_eq!(chunks[1].start_line, 5);
        assert!(chunks.iter().all(|c| c.content.len() <= 30));
        assert!(chunks[0].metadata.tags.starts_with(&["documentation".to_string()]));
    }

    #[test]
    fn test_documentation_multibyte_long_line() {
        let chunker = CodeChunker::new(ChunkerConfig {
            max_file_chars: 7,
            ..Default::default()
        });
        let chunks = chunker.chunk_documentation("API.md", "┌──────────┐", 0);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.len() <= 7);
    }

    #[test]
    fn test_is_documentation_file() {
        assert!(is_documentation_file("README.md"));
        assert!(is_documentation_file("docs/api.md"));
        assert!(is_documentation_file("CHANGELOG"));
        assert!(!is_documentation_file("src/readme.ts"));
        assert!(!is_documentation_file("NOTES.md"));
    }

    #[test]
    fn test_derive_tags_structural() {
        let tags = derive_tags("fetchUser", "src/api/users.ts", 12, true);
        assert_eq!(tags, vec!["api", "complex", "async"]);
        let none = derive_tags("feedback", "src/feedback.ts", 1, false);
        assert!(none.is_empty());
        let db = derive_tags("openDb", "src/store.ts", 1, false);
        assert_eq!(db, vec!["database"]);
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }
}
