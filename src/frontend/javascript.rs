//! TypeScript and JavaScript extraction.
//!
//! Handles ES modules and CommonJS. Top-level function declarations,
//! function-valued `const`/`let`/`var` bindings, and classes become symbols.

use codectx_core::parsed::{ParsedClass, ParsedFile, ParsedFunction, ParsedImport};
use tree_sitter::Node;

use super::{end_line, first_named, has_token, line, named_children, push_unique, unquote, Source};

/// Binding values that make a variable declaration a function.
const FUNCTION_VALUES: &[&str] = &[
    "arrow_function",
    "function_expression",
    "function",
    "generator_function",
];

pub(super) fn extract(root: Node<'_>, src: &Source<'_>) -> ParsedFile {
    let mut parsed = ParsedFile::default();
    let items = named_children(root);

    // Imports and exports first, so `module.exports = { run }` at the bottom
    // of a file still marks `run` as exported.
    for &item in &items {
        match item.kind() {
            "import_statement" => parsed.imports.push(import(item, src)),
            "export_statement" => export(item, src, &mut parsed),
            "lexical_declaration" | "variable_declaration" => {
                require_imports(item, src, &mut parsed.imports)
            }
            "expression_statement" => commonjs_exports(item, src, &mut parsed.exports),
            _ => {}
        }
    }

    for &item in &items {
        let (decl, exported) = if item.kind() == "export_statement" {
            match item.child_by_field_name("declaration") {
                Some(decl) => (decl, true),
                None => continue,
            }
        } else {
            (item, false)
        };
        declaration(item, decl, exported, src, &mut parsed);
    }
    parsed
}

fn declaration(outer: Node<'_>, decl: Node<'_>, exported: bool, src: &Source<'_>, parsed: &mut ParsedFile) {
    match decl.kind() {
        "function_declaration" | "generator_function_declaration" => {
            let Some(name) = src.field_text(decl, "name") else {
                return;
            };
            let exported = exported || parsed.exports.iter().any(|e| e == name);
            parsed.functions.push(function(outer, decl, name, exported, src));
        }
        "class_declaration" | "abstract_class_declaration" => {
            let Some(name) = src.field_text(decl, "name") else {
                return;
            };
            let exported = exported || parsed.exports.iter().any(|e| e == name);
            parsed.classes.push(class(outer, decl, name, exported, src));
        }
        "lexical_declaration" | "variable_declaration" => {
            for declarator in named_children(decl) {
                if declarator.kind() != "variable_declarator" {
                    continue;
                }
                let (Some(name), Some(value)) = (
                    declarator.child_by_field_name("name"),
                    declarator.child_by_field_name("value"),
                ) else {
                    continue;
                };
                if name.kind() != "identifier" || !FUNCTION_VALUES.contains(&value.kind()) {
                    continue;
                }
                let name = src.text(name);
                let exported = exported || parsed.exports.iter().any(|e| e == name);
                parsed.functions.push(function(outer, value, name, exported, src));
            }
        }
        _ => {}
    }
}

/// `outer` gives the span and doc comment, `node` the parameters and body.
fn function(outer: Node<'_>, node: Node<'_>, name: &str, is_exported: bool, src: &Source<'_>) -> ParsedFunction {
    let body = node.child_by_field_name("body").unwrap_or(node);
    ParsedFunction {
        name: name.to_string(),
        line: line(outer),
        end_line: end_line(outer),
        params: params(node, src),
        is_async: has_token(node, "async"),
        is_exported,
        calls: src.calls(body, name),
        complexity: src.complexity(node),
        doc: src.leading_doc(outer),
    }
}

fn params(node: Node<'_>, src: &Source<'_>) -> Vec<String> {
    if let Some(single) = node.child_by_field_name("parameter") {
        return param_name(single, src).into_iter().collect();
    }
    let Some(list) = node.child_by_field_name("parameters") else {
        return Vec::new();
    };
    named_children(list)
        .into_iter()
        .filter_map(|p| param_name(p, src))
        .collect()
}

fn param_name(node: Node<'_>, src: &Source<'_>) -> Option<String> {
    let name = match node.kind() {
        "identifier" => src.text(node).to_string(),
        "required_parameter" | "optional_parameter" => {
            return param_name(node.child_by_field_name("pattern")?, src)
        }
        "assignment_pattern" => return param_name(node.child_by_field_name("left")?, src),
        "rest_pattern" => return param_name(first_named(node)?, src),
        "object_pattern" | "array_pattern" => src.text(node).to_string(),
        _ => return None,
    };
    (name != "this").then_some(name)
}

fn class(outer: Node<'_>, decl: Node<'_>, name: &str, is_exported: bool, src: &Source<'_>) -> ParsedClass {
    let mut class = ParsedClass {
        name: name.to_string(),
        line: line(outer),
        end_line: end_line(outer),
        is_exported,
        doc: src.leading_doc(outer),
        ..Default::default()
    };

    if let Some(heritage) = named_children(decl).into_iter().find(|c| c.kind() == "class_heritage") {
        for clause in named_children(heritage) {
            match clause.kind() {
                "extends_clause" => {
                    class.extends = src.field_text(clause, "value").map(|v| last_segment(v).to_string());
                }
                "implements_clause" => {
                    for ty in named_children(clause) {
                        push_unique(&mut class.implements, type_name(ty, src));
                    }
                }
                // Plain JavaScript: `extends <expression>`.
                _ if class.extends.is_none() => {
                    class.extends = Some(last_segment(src.text(clause)).to_string());
                }
                _ => {}
            }
        }
    }

    let Some(body) = decl.child_by_field_name("body") else {
        return class;
    };
    for member in named_children(body) {
        match member.kind() {
            "method_definition" => {
                let Some(name_node) = member.child_by_field_name("name") else {
                    continue;
                };
                let private = name_node.kind() == "private_property_identifier"
                    || named_children(member)
                        .iter()
                        .any(|c| c.kind() == "accessibility_modifier" && src.text(*c) == "private");
                let name = src.text(name_node).trim_start_matches('#');
                class
                    .methods
                    .push(function(member, member, name, is_exported && !private, src));
            }
            "public_field_definition" => {
                if let Some(prop) = src.field_text(member, "name") {
                    push_unique(&mut class.properties, prop.trim_start_matches('#'));
                }
            }
            "field_definition" => {
                if let Some(prop) = src.field_text(member, "property") {
                    push_unique(&mut class.properties, prop.trim_start_matches('#'));
                }
            }
            _ => {}
        }
    }
    class
}

fn type_name<'a>(ty: Node<'_>, src: &Source<'a>) -> &'a str {
    match ty.kind() {
        "generic_type" | "nested_type_identifier" => src.field_text(ty, "name").unwrap_or(""),
        _ => src.text(ty),
    }
}

fn last_segment(path: &str) -> &str {
    path.rsplit('.').next().unwrap_or(path)
}

fn import(item: Node<'_>, src: &Source<'_>) -> ParsedImport {
    let mut names = Vec::new();
    let mut source = src.field_text(item, "source").map(unquote);
    for clause in named_children(item) {
        match clause.kind() {
            "import_clause" => {
                for part in named_children(clause) {
                    match part.kind() {
                        "identifier" => push_unique(&mut names, src.text(part)),
                        "namespace_import" => {
                            if let Some(ns) = first_named(part) {
                                push_unique(&mut names, src.text(ns));
                            }
                        }
                        "named_imports" => {
                            for spec in named_children(part) {
                                if let Some(name) = src.field_text(spec, "name") {
                                    push_unique(&mut names, unquote(name));
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
            // TypeScript `import fs = require("fs")`.
            "import_require_clause" => {
                if let Some(id) = first_named(clause) {
                    push_unique(&mut names, src.text(id));
                }
                if source.is_none() {
                    source = src.field_text(clause, "source").map(unquote);
                }
            }
            _ => {}
        }
    }
    ParsedImport {
        source: source.unwrap_or_default().to_string(),
        names,
    }
}

fn export(item: Node<'_>, src: &Source<'_>, parsed: &mut ParsedFile) {
    if let Some(decl) = item.child_by_field_name("declaration") {
        for name in declared_names(decl, src) {
            push_unique(&mut parsed.exports, name);
        }
    }
    if let Some(value) = item.child_by_field_name("value") {
        if value.kind() == "identifier" {
            push_unique(&mut parsed.exports, src.text(value));
        }
    }

    let mut reexported = Vec::new();
    for clause in named_children(item) {
        if clause.kind() != "export_clause" {
            continue;
        }
        for spec in named_children(clause) {
            let Some(name) = src.field_text(spec, "name") else {
                continue;
            };
            let public = src.field_text(spec, "alias").unwrap_or(name);
            push_unique(&mut parsed.exports, unquote(public));
            push_unique(&mut reexported, unquote(name));
        }
    }
    if let Some(source) = src.field_text(item, "source") {
        parsed.imports.push(ParsedImport {
            source: unquote(source).to_string(),
            names: reexported,
        });
    }
}

fn declared_names<'a>(decl: Node<'_>, src: &Source<'a>) -> Vec<&'a str> {
    match decl.kind() {
        "lexical_declaration" | "variable_declaration" => named_children(decl)
            .into_iter()
            .filter(|d| d.kind() == "variable_declarator")
            .filter_map(|d| d.child_by_field_name("name"))
            .filter(|n| n.kind() == "identifier")
            .map(|n| src.text(n))
            .collect(),
        _ => src.field_text(decl, "name").into_iter().collect(),
    }
}

/// `const x = require("y")` and `const { a, b: c } = require("y")`.
fn require_imports(decl: Node<'_>, src: &Source<'_>, imports: &mut Vec<ParsedImport>) {
    for declarator in named_children(decl) {
        let (Some(binding), Some(value)) = (
            declarator.child_by_field_name("name"),
            declarator.child_by_field_name("value"),
        ) else {
            continue;
        };
        if value.kind() != "call_expression" || src.field_text(value, "function") != Some("require") {
            continue;
        }
        let Some(source) = value
            .child_by_field_name("arguments")
            .and_then(first_named)
            .filter(|a| a.kind() == "string")
        else {
            continue;
        };

        let mut names = Vec::new();
        match binding.kind() {
            "identifier" => push_unique(&mut names, src.text(binding)),
            "object_pattern" => {
                for part in named_children(binding) {
                    match part.kind() {
                        "shorthand_property_identifier_pattern" => push_unique(&mut names, src.text(part)),
                        "pair_pattern" => {
                            if let Some(key) = src.field_text(part, "key") {
                                push_unique(&mut names, unquote(key));
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
        imports.push(ParsedImport {
            source: unquote(src.text(source)).to_string(),
            names,
        });
    }
}

/// `module.exports = { a, b }`, `module.exports = a`, `exports.a = ...`.
fn commonjs_exports(stmt: Node<'_>, src: &Source<'_>, exports: &mut Vec<String>) {
    let Some(assign) = first_named(stmt).filter(|n| n.kind() == "assignment_expression") else {
        return;
    };
    let (Some(left), Some(right)) = (
        assign.child_by_field_name("left"),
        assign.child_by_field_name("right"),
    ) else {
        return;
    };

    if src.text(left) == "module.exports" {
        match right.kind() {
            "identifier" => push_unique(exports, src.text(right)),
            "object" => {
                for entry in named_children(right) {
                    let name = match entry.kind() {
                        "shorthand_property_identifier" => Some(src.text(entry)),
                        "pair" => src.field_text(entry, "key").map(unquote),
                        "method_definition" => src.field_text(entry, "name"),
                        _ => None,
                    };
                    if let Some(name) = name {
                        push_unique(exports, name);
                    }
                }
            }
            _ => {}
        }
    } else if left.kind() == "member_expression"
        && matches!(src.field_text(left, "object"), Some("exports" | "module.exports"))
    {
        if let Some(name) = src.field_text(left, "property") {
            push_unique(exports, name);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::frontend::{LanguageFrontend, TreeSitterFrontend};
    use codectx_core::parsed::ParsedFile;

    fn parse(path: &str, src: &str) -> ParsedFile {
        TreeSitterFrontend.parse(path, src).unwrap()
    }

    #[test]
    fn test_typescript_functions_imports_exports() {
        let src = r#"import { foo, bar as baz } from './b';
import React from "react";

/** Entry point. */
export async function main(args: string[], opts?: Options) {
  if (args.length > 0 && opts) {
    await foo(args);
  }
  return baz();
}

const helper = (x) => x + 1;
"#;
        let p = parse("src/a.ts", src);
        assert_eq!(p.language, "typescript");
        assert_eq!(p.imports.len(), 2);
        assert_eq!(p.imports[0].source, "./b");
        assert_eq!(p.imports[0].names, vec!["foo", "bar"]);
        assert_eq!(p.imports[1].source, "react");
        assert_eq!(p.imports[1].names, vec!["React"]);
        assert_eq!(p.exports, vec!["main"]);

        assert_eq!(p.functions.len(), 2);
        let main = &p.functions[0];
        assert_eq!(main.name, "main");
        assert_eq!((main.line, main.end_line), (5, 10));
        assert!(main.is_async && main.is_exported);
        assert_eq!(main.params, vec!["args", "opts"]);
        assert_eq!(main.calls, vec!["foo", "baz"]);
        assert_eq!(main.complexity, 3);
        assert_eq!(main.doc.as_deref(), Some("Entry point."));

        let helper = &p.functions[1];
        assert_eq!(helper.name, "helper");
        assert_eq!((helper.line, helper.end_line), (12, 12));
        assert_eq!(helper.params, vec!["x"]);
        assert!(!helper.is_exported);
    }

    #[test]
    fn test_typescript_class_members() {
        let src = r#"export class UserService extends BaseService implements Loader, Saver {
  private cache: Map<string, User>;
  name = "users";

  constructor(db: Db) {
    super(db);
  }

  async load(id: string): Promise<User> {
    const row = await this.db.query("select {");
    return toUser(row);
  }

  private reset() {
    this.cache.clear();
  }
}
"#;
        let p = parse("src/user.ts", src);
        assert!(p.functions.is_empty());
        assert_eq!(p.classes.len(), 1);
        let c = &p.classes[0];
        assert_eq!(c.name, "UserService");
        assert_eq!(c.extends.as_deref(), Some("BaseService"));
        assert_eq!(c.implements, vec!["Loader", "Saver"]);
        assert_eq!((c.line, c.end_line), (1, 17));
        assert_eq!(c.properties, vec!["cache", "name"]);
        let names: Vec<&str> = c.methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["constructor", "load", "reset"]);
        assert!(c.methods[0].calls.is_empty());
        assert!(c.methods[1].is_async);
        assert_eq!(c.methods[1].calls, vec!["query", "toUser"]);
        assert!(c.methods[1].is_exported);
        assert!(!c.methods[2].is_exported);
    }

    #[test]
    fn test_javascript_class_extends_expression() {
        let src = "class Widget extends ui.Base {\n  #count = 0;\n  render() {\n    return draw(this.#count);\n  }\n}\n";
        let p = parse("src/widget.js", src);
        let c = &p.classes[0];
        assert_eq!(c.extends.as_deref(), Some("Base"));
        assert_eq!(c.properties, vec!["count"]);
        assert_eq!(c.methods[0].calls, vec!["draw"]);
        assert!(!c.is_exported);
    }

    #[test]
    fn test_commonjs_require_and_exports() {
        let src = "const { readFile } = require('./fs-utils');\nfunction run() {\n  readFile();\n}\nmodule.exports = { run };\n";
        let p = parse("lib/run.js", src);
        assert_eq!(p.imports[0].source, "./fs-utils");
        assert_eq!(p.imports[0].names, vec!["readFile"]);
        assert_eq!(p.exports, vec!["run"]);
        assert!(p.functions[0].is_exported);
        assert_eq!(p.functions[0].calls, vec!["readFile"]);
    }

    #[test]
    fn test_reexports_become_imports() {
        let src = "export { a as b } from './x';\nexport * from './y';\nexport default run;\n";
        let p = parse("src/index.ts", src);
        let sources: Vec<&str> = p.imports.iter().map(|i| i.source.as_str()).collect();
        assert_eq!(sources, vec!["./x", "./y"]);
        assert_eq!(p.imports[0].names, vec!["a"]);
        assert_eq!(p.exports, vec!["b", "run"]);
    }

    #[test]
    fn test_strings_do_not_unbalance_braces() {
        let src = "function a() {\n  const s = \"}\";\n  return s;\n}\nfunction b() {}\n";
        let p = parse("a.js", src);
        assert_eq!(p.functions.len(), 2);
        assert_eq!(p.functions[0].end_line, 4);
    }

    #[test]
    fn test_template_literal_braces_stay_inside_function() {
        let src = "export function render() {\n  return `\n  }\n  `;\n}\n";
        let p = parse("src/render.ts", src);
        assert_eq!(p.functions.len(), 1);
        let render = &p.functions[0];
        assert_eq!((render.line, render.end_line), (1, 5));
        assert_eq!(p.code_lines, 5);
    }

    #[test]
    fn test_tsx_components() {
        let src = "export const App = () => {\n  return <div>{label()}</div>;\n};\n";
        let p = parse("src/App.tsx", src);
        assert_eq!(p.language, "typescript");
        assert_eq!(p.functions[0].name, "App");
        assert_eq!(p.functions[0].calls, vec!["label"]);
        assert_eq!(p.exports, vec!["App"]);
    }
}
