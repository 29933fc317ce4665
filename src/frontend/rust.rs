//! Rust extraction.
//!
//! Structs, enums, traits, and unions become classes. Methods from `impl`
//! blocks attach to the type they implement when it is declared in the
//! same file, and to the top-level function list otherwise.

use codectx_core::parsed::{ParsedClass, ParsedFile, ParsedFunction, ParsedImport};
use tree_sitter::Node;

use super::{end_line, first_named, has_token, line, named_children, push_unique, Source};

const TYPE_ITEMS: &[&str] = &["struct_item", "enum_item", "trait_item", "union_item"];

pub(super) fn extract(root: Node<'_>, src: &Source<'_>) -> ParsedFile {
    let mut parsed = ParsedFile::default();
    let mut impls = Vec::new();

    for item in named_children(root) {
        match item.kind() {
            "use_declaration" => {
                if let Some(arg) = item.child_by_field_name("argument") {
                    parsed.imports.push(use_import(arg, src));
                }
            }
            "mod_item" if item.child_by_field_name("body").is_none() => {
                if let Some(name) = src.field_text(item, "name") {
                    parsed.imports.push(ParsedImport {
                        source: format!("./{}", name),
                        names: Vec::new(),
                    });
                }
            }
            "function_item" => {
                let function = function(item, src);
                if function.is_exported {
                    push_unique(&mut parsed.exports, &function.name);
                }
                parsed.functions.push(function);
            }
            kind if TYPE_ITEMS.contains(&kind) => {
                let Some(class) = type_item(item, src) else {
                    continue;
                };
                if class.is_exported {
                    push_unique(&mut parsed.exports, &class.name);
                }
                parsed.classes.push(class);
            }
            "impl_item" => impls.push(item),
            _ => {}
        }
    }

    for item in impls {
        let Some(target) = item.child_by_field_name("type").map(|t| type_name(t, src)) else {
            continue;
        };
        let trait_name = item.child_by_field_name("trait").map(|t| type_name(t, src));
        let methods = item
            .child_by_field_name("body")
            .map(|body| body_functions(body, src))
            .unwrap_or_default();
        match parsed.classes.iter_mut().find(|c| c.name == target) {
            Some(class) => {
                if let Some(t) = trait_name {
                    push_unique(&mut class.implements, t);
                }
                class.methods.extend(methods);
            }
            None => parsed.functions.extend(methods),
        }
    }
    parsed
}

fn is_pub(item: Node<'_>) -> bool {
    named_children(item)
        .iter()
        .any(|c| c.kind() == "visibility_modifier")
}

fn function(item: Node<'_>, src: &Source<'_>) -> ParsedFunction {
    let name = src.field_text(item, "name").unwrap_or_default();
    let is_async = named_children(item)
        .iter()
        .any(|c| c.kind() == "function_modifiers" && has_token(*c, "async"));
    ParsedFunction {
        name: name.to_string(),
        line: line(item),
        end_line: end_line(item),
        params: params(item, src),
        is_async,
        is_exported: is_pub(item),
        calls: item
            .child_by_field_name("body")
            .map(|body| src.calls(body, name))
            .unwrap_or_default(),
        complexity: src.complexity(item),
        doc: src.leading_doc(item),
    }
}

fn params(item: Node<'_>, src: &Source<'_>) -> Vec<String> {
    let Some(list) = item.child_by_field_name("parameters") else {
        return Vec::new();
    };
    named_children(list)
        .into_iter()
        .filter(|p| p.kind() == "parameter")
        .filter_map(|p| p.child_by_field_name("pattern"))
        .map(|pattern| match pattern.kind() {
            "mut_pattern" => first_named(pattern).map_or("", |n| src.text(n)),
            _ => src.text(pattern),
        })
        .map(str::to_string)
        .collect()
}

/// Functions declared directly inside an `impl` or `trait` body.
fn body_functions(body: Node<'_>, src: &Source<'_>) -> Vec<ParsedFunction> {
    named_children(body)
        .into_iter()
        .filter(|n| matches!(n.kind(), "function_item" | "function_signature_item"))
        .map(|n| function(n, src))
        .collect()
}

fn type_item(item: Node<'_>, src: &Source<'_>) -> Option<ParsedClass> {
    let name = src.field_text(item, "name")?;
    let mut class = ParsedClass {
        name: name.to_string(),
        line: line(item),
        end_line: end_line(item),
        is_exported: is_pub(item),
        doc: src.leading_doc(item),
        ..Default::default()
    };
    let Some(body) = item.child_by_field_name("body") else {
        return Some(class);
    };
    match body.kind() {
        "field_declaration_list" => {
            for field in named_children(body) {
                if let Some(name) = src.field_text(field, "name") {
                    push_unique(&mut class.properties, name);
                }
            }
        }
        "declaration_list" => class.methods = body_functions(body, src),
        _ => {}
    }
    Some(class)
}

/// Bare name of an impl target: `Parser<'a>` and `crate::x::Parser` give `Parser`.
fn type_name<'a>(ty: Node<'_>, src: &Source<'a>) -> &'a str {
    match ty.kind() {
        "generic_type" | "reference_type" => ty
            .child_by_field_name("type")
            .map_or_else(|| src.text(ty), |inner| type_name(inner, src)),
        "scoped_type_identifier" => src.field_text(ty, "name").unwrap_or_else(|| src.text(ty)),
        _ => src.text(ty),
    }
}

fn last_segment(path: &str) -> &str {
    path.rsplit("::").next().unwrap_or(path)
}

fn use_import(arg: Node<'_>, src: &Source<'_>) -> ParsedImport {
    match arg.kind() {
        "scoped_use_list" => {
            let mut names = Vec::new();
            if let Some(list) = arg.child_by_field_name("list") {
                for entry in named_children(list) {
                    let name = match entry.kind() {
                        "identifier" => src.text(entry),
                        "scoped_identifier" => src.field_text(entry, "name").unwrap_or_default(),
                        "use_as_clause" => src.field_text(entry, "path").map(last_segment).unwrap_or_default(),
                        _ => "",
                    };
                    push_unique(&mut names, name);
                }
            }
            ParsedImport {
                source: src.field_text(arg, "path").unwrap_or_default().to_string(),
                names,
            }
        }
        "use_as_clause" => {
            let path = src.field_text(arg, "path").unwrap_or_default();
            ParsedImport {
                source: path.to_string(),
                names: vec![last_segment(path).to_string()],
            }
        }
        "use_wildcard" => ParsedImport {
            source: src.text(arg).trim_end_matches("::*").to_string(),
            names: Vec::new(),
        },
        _ => {
            let path = src.text(arg);
            ParsedImport {
                source: path.to_string(),
                names: vec![last_segment(path).to_string()],
            }
        }
    }
}
