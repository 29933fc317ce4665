//! Language front-ends.
//!
//! A front-end turns raw source into a [`ParsedFile`]: functions, classes
//! with their methods and properties, imports, exports, and cyclomatic
//! complexity. The indexer only ever sees these records.
//!
//! [`TreeSitterFrontend`] parses TypeScript, JavaScript, Python, and Rust
//! with their tree-sitter grammars and walks the syntax tree. Each language
//! has its own extraction module; the helpers here cover what they share:
//! call collection, decision counting, doc comments, and code line counts.

mod javascript;
mod python;
mod rust;

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{anyhow, bail, Result};
use codectx_core::parsed::ParsedFile;
use tracing::debug;
use tree_sitter::{Node, Parser};

/// Turns source text into a parsed-file record.
pub trait LanguageFrontend: Send + Sync {
    /// Language name for `path`, or `None` when unsupported.
    fn language_for(&self, path: &str) -> Option<&'static str>;

    /// Parse `content`. `path` is the repository-relative path.
    fn parse(&self, path: &str, content: &str) -> Result<ParsedFile>;
}

/// Supported grammar. TSX is TypeScript with its own grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lang {
    TypeScript,
    Tsx,
    JavaScript,
    Python,
    Rust,
}

impl Lang {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "ts" | "mts" | "cts" => Some(Self::TypeScript),
            "tsx" => Some(Self::Tsx),
            "js" | "jsx" | "mjs" | "cjs" => Some(Self::JavaScript),
            "py" | "pyi" => Some(Self::Python),
            "rs" => Some(Self::Rust),
            _ => None,
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Language name recorded in the index.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::TypeScript | Self::Tsx => "typescript",
            Self::JavaScript => "javascript",
            Self::Python => "python",
            Self::Rust => "rust",
        }
    }

    #[must_use]
    pub fn grammar(self) -> tree_sitter::Language {
        match self {
            Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Self::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Self::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Self::Python => tree_sitter_python::LANGUAGE.into(),
            Self::Rust => tree_sitter_rust::LANGUAGE.into(),
        }
    }

    fn is_comment(self, kind: &str) -> bool {
        matches!(kind, "comment" | "line_comment" | "block_comment")
    }

    /// Node kinds that add a branch to cyclomatic complexity.
    fn decision_kinds(self) -> &'static [&'static str] {
        match self {
            Self::TypeScript | Self::Tsx | Self::JavaScript => &[
                "if_statement",
                "for_statement",
                "for_in_statement",
                "while_statement",
                "do_statement",
                "switch_case",
                "catch_clause",
                "ternary_expression",
            ],
            Self::Python => &[
                "if_statement",
                "elif_clause",
                "for_statement",
                "while_statement",
                "except_clause",
                "conditional_expression",
                "boolean_operator",
                "case_clause",
                "for_in_clause",
                "if_clause",
            ],
            Self::Rust => &[
                "if_expression",
                "for_expression",
                "while_expression",
                "loop_expression",
                "match_arm",
            ],
        }
    }

    fn logical_operators(self) -> &'static [&'static str] {
        match self {
            Self::TypeScript | Self::Tsx | Self::JavaScript => &["&&", "||", "??"],
            Self::Rust => &["&&", "||"],
            // Python's `and`/`or` are boolean_operator nodes.
            Self::Python => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TreeSitterFrontend;

impl LanguageFrontend for TreeSitterFrontend {
    fn language_for(&self, path: &str) -> Option<&'static str> {
        Lang::from_path(path).map(Lang::id)
    }

    fn parse(&self, path: &str, content: &str) -> Result<ParsedFile> {
        if content.contains('\0') {
            bail!("{} looks like a binary file", path);
        }
        let Some(lang) = Lang::from_path(path) else {
            bail!("unsupported language for {}", path);
        };

        let mut parser = Parser::new();
        parser
            .set_language(&lang.grammar())
            .map_err(|e| anyhow!("set_language failed for {}: {e}", lang.id()))?;
        let tree = parser
            .parse(content, None)
            .ok_or_else(|| anyhow!("tree-sitter returned no tree for {}", path))?;
        let root = tree.root_node();
        if root.has_error() {
            debug!(path, "syntax errors in file, extracting what parsed");
        }

        let src = Source { text: content, lang };
        let mut parsed = match lang {
            Lang::TypeScript | Lang::Tsx | Lang::JavaScript => javascript::extract(root, &src),
            Lang::Python => python::extract(root, &src),
            Lang::Rust => rust::extract(root, &src),
        };
        parsed.path = path.to_string();
        parsed.language = lang.id().to_string();
        parsed.complexity = src.complexity(root);
        parsed.code_lines = src.code_lines(root);
        Ok(parsed)
    }
}

/// Callees that never resolve to a symbol in the repository.
const NOT_CALLS: &[&str] = &["require", "super", "Some", "Ok", "Err", "print"];

/// Source text plus grammar, shared by the extraction modules.
pub(crate) struct Source<'a> {
    text: &'a str,
    lang: Lang,
}

impl<'a> Source<'a> {
    pub(crate) fn text(&self, node: Node<'_>) -> &'a str {
        self.text.get(node.byte_range()).unwrap_or("")
    }

    pub(crate) fn field_text(&self, node: Node<'_>, field: &str) -> Option<&'a str> {
        node.child_by_field_name(field).map(|n| self.text(n))
    }

    /// Names called anywhere under `node`, in source order, without
    /// duplicates or self-recursion.
    pub(crate) fn calls(&self, node: Node<'_>, own_name: &str) -> Vec<String> {
        let mut calls = Vec::new();
        for n in descendants(node) {
            if !matches!(n.kind(), "call_expression" | "call") {
                continue;
            }
            let Some(callee) = n.child_by_field_name("function") else {
                continue;
            };
            if let Some(name) = self.callee_name(callee) {
                if name != own_name && !NOT_CALLS.contains(&name) {
                    push_unique(&mut calls, name);
                }
            }
        }
        calls
    }

    fn callee_name(&self, callee: Node<'_>) -> Option<&'a str> {
        let name = match callee.kind() {
            "identifier" => self.text(callee),
            "member_expression" => self.field_text(callee, "property")?,
            "attribute" => self.field_text(callee, "attribute")?,
            "field_expression" => self.field_text(callee, "field")?,
            "scoped_identifier" => self.field_text(callee, "name")?,
            "generic_function" => return self.callee_name(callee.child_by_field_name("function")?),
            _ => return None,
        };
        Some(name.trim_start_matches('#'))
    }

    /// One plus the number of branch points under `node`.
    pub(crate) fn complexity(&self, node: Node<'_>) -> u32 {
        let kinds = self.lang.decision_kinds();
        let logical = self.lang.logical_operators();
        let branches = descendants(node)
            .into_iter()
            .filter(|n| {
                kinds.contains(&n.kind())
                    || (n.kind() == "binary_expression"
                        && n.child_by_field_name("operator")
                            .is_some_and(|op| logical.contains(&op.kind())))
            })
            .count();
        1 + branches as u32
    }

    /// Text of the comments directly above `node`, skipping attributes
    /// and decorators. Inner doc comments (`//!`) end the run.
    pub(crate) fn leading_doc(&self, node: Node<'_>) -> Option<String> {
        let mut anchor = node.start_position().row;
        let mut comments = Vec::new();
        let mut prev = node.prev_sibling();
        while let Some(p) = prev {
            let kind = p.kind();
            if kind == "attribute_item" || kind == "decorator" {
                anchor = p.start_position().row;
            } else if self.lang.is_comment(kind) {
                let text = self.text(p);
                if text.starts_with("//!") || text.starts_with("/*!") || last_row(p) + 1 < anchor {
                    break;
                }
                comments.push(clean_comment(text));
                anchor = p.start_position().row;
            } else {
                break;
            }
            prev = p.prev_sibling();
        }
        comments.reverse();
        let doc = comments.join("\n").trim().to_string();
        (!doc.is_empty()).then_some(doc)
    }

    /// Rows covered by tokens outside comments.
    pub(crate) fn code_lines(&self, root: Node<'_>) -> usize {
        let mut rows = BTreeSet::new();
        let mut stack = vec![root];
        while let Some(n) = stack.pop() {
            if self.lang.is_comment(n.kind()) {
                continue;
            }
            if n.child_count() == 0 {
                if n.start_byte() < n.end_byte() {
                    rows.extend(n.start_position().row..=last_row(n));
                }
                continue;
            }
            stack.extend(children(n));
        }
        rows.len()
    }
}

/// Every node under `node` (inclusive) in preorder.
pub(crate) fn descendants(node: Node<'_>) -> Vec<Node<'_>> {
    let mut out = Vec::new();
    let mut stack = vec![node];
    while let Some(n) = stack.pop() {
        out.push(n);
        let mut kids = children(n);
        kids.reverse();
        stack.extend(kids);
    }
    out
}

pub(crate) fn children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).collect()
}

pub(crate) fn named_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

pub(crate) fn first_named(node: Node<'_>) -> Option<Node<'_>> {
    let mut cursor = node.walk();
    let first = node.named_children(&mut cursor).next();
    first
}

/// Whether `node` has a direct anonymous child token such as `async`.
pub(crate) fn has_token(node: Node<'_>, token: &str) -> bool {
    children(node).iter().any(|c| !c.is_named() && c.kind() == token)
}

/// 1-based first line.
pub(crate) fn line(node: Node<'_>) -> usize {
    node.start_position().row + 1
}

/// 1-based last line (inclusive).
pub(crate) fn end_line(node: Node<'_>) -> usize {
    last_row(node) + 1
}

/// 0-based last row; a node ending at column 0 ends on the row before.
fn last_row(node: Node<'_>) -> usize {
    let start = node.start_position().row;
    let end = node.end_position();
    if end.column == 0 && end.row > start {
        end.row - 1
    } else {
        end.row
    }
}

fn clean_comment(text: &str) -> String {
    let body = text.trim();
    let body = body
        .strip_prefix("/**")
        .or_else(|| body.strip_prefix("/*"))
        .map(|b| b.strip_suffix("*/").unwrap_or(b))
        .unwrap_or(body);
    body.lines()
        .map(|l| {
            let l = l.trim();
            l.trim_start_matches("///")
                .trim_start_matches("//")
                .trim_start_matches('#')
                .trim_start_matches('*')
                .trim()
        })
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Strip quotes from a string literal.
pub(crate) fn unquote(text: &str) -> &str {
    text.trim_matches(|c| c == '"' || c == '\'' || c == '`')
}

pub(crate) fn push_unique(list: &mut Vec<String>, name: &str) {
    if !name.is_empty() && !list.iter().any(|n| n == name) {
        list.push(name.to_string());
    }
}
