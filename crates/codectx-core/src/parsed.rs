//! Parsed-file records produced by a language front-end.
//!
//! The indexer never inspects raw syntax itself: a front-end turns a source
//! file into a [`ParsedFile`], and everything downstream works from these
//! records.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedFunction {
    pub name: String,
    /// 1-based first line.
    pub line: usize,
    /// 1-based last line (inclusive).
    pub end_line: usize,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default)]
    pub is_async: bool,
    #[serde(default)]
    pub is_exported: bool,
    /// Names of functions called from the body.
    #[serde(default)]
    pub calls: Vec<String>,
    #[serde(default)]
    pub complexity: u32,
    #[serde(default)]
    pub doc: Option<String>,
}

impl ParsedFunction {
    pub fn signature(&self) -> String {
        let prefix = if self.is_async { "async " } else { "" };
        format!("{}{}({})", prefix, self.name, self.params.join(", "))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedClass {
    pub name: String,
    pub line: usize,
    pub end_line: usize,
    #[serde(default)]
    pub extends: Option<String>,
    #[serde(default)]
    pub implements: Vec<String>,
    #[serde(default)]
    pub methods: Vec<ParsedFunction>,
    #[serde(default)]
    pub properties: Vec<String>,
    #[serde(default)]
    pub is_exported: bool,
    #[serde(default)]
    pub doc: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedImport {
    /// Module specifier as written, e.g. `./utils` or `react`.
    pub source: String,
    /// Imported names, if any were listed.
    #[serde(default)]
    pub names: Vec<String>,
}

impl ParsedImport {
    /// Relative imports (`./x`, `../x`) can resolve to files in the repository.
    pub fn is_relative(&self) -> bool {
        self.source.starts_with("./") || self.source.starts_with("../")
    }
}

/// Structured view of one source file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedFile {
    pub path: String,
    pub language: String,
    #[serde(default)]
    pub functions: Vec<ParsedFunction>,
    #[serde(default)]
    pub classes: Vec<ParsedClass>,
    #[serde(default)]
    pub imports: Vec<ParsedImport>,
    #[serde(default)]
    pub exports: Vec<String>,
    #[serde(default)]
    pub complexity: u32,
    /// Lines holding code, excluding blank and comment-only lines.
    #[serde(default)]
    pub code_lines: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_import_detection() {
        let rel = ParsedImport {
            source: "./b".into(),
            names: vec![],
        };
        let up = ParsedImport {
            source: "../lib/c".into(),
            names: vec![],
        };
        let pkg = ParsedImport {
            source: "react".into(),
            names: vec![],
        };
        assert!(rel.is_relative());
        assert!(up.is_relative());
        assert!(!pkg.is_relative());
    }

    #[test]
    fn test_signature() {
        let f = ParsedFunction {
            name: "load".into(),
            params: vec!["path".into(), "opts".into()],
            is_async: true,
            ..Default::default()
        };
        assert_eq!(f.signature(), "async load(path, opts)");
    }
}
