//! Python extraction.

use codectx_core::parsed::{ParsedClass, ParsedFile, ParsedFunction, ParsedImport};
use tree_sitter::Node;

use super::{descendants, end_line, first_named, has_token, line, named_children, push_unique, Source};

pub(super) fn extract(root: Node<'_>, src: &Source<'_>) -> ParsedFile {
    let mut parsed = ParsedFile::default();
    let dunder_all = dunder_all(root, src);

    for item in named_children(root) {
        match item.kind() {
            "import_statement" => {
                for module in field_children(item, "name") {
                    parsed.imports.push(ParsedImport {
                        source: imported_name(module, src).to_string(),
                        names: Vec::new(),
                    });
                }
            }
            "import_from_statement" => {
                let Some(module) = src.field_text(item, "module_name") else {
                    continue;
                };
                let mut names = Vec::new();
                for name in field_children(item, "name") {
                    push_unique(&mut names, imported_name(name, src));
                }
                parsed.imports.push(ParsedImport {
                    source: python_module_path(module),
                    names,
                });
            }
            _ => {
                let Some(def) = definition(item) else {
                    continue;
                };
                let Some(name) = src.field_text(def, "name") else {
                    continue;
                };
                let exported = match &dunder_all {
                    Some(all) => all.iter().any(|n| n == name),
                    None => !name.starts_with('_'),
                };
                if exported && dunder_all.is_none() {
                    push_unique(&mut parsed.exports, name);
                }
                if def.kind() == "class_definition" {
                    parsed.classes.push(class(item, def, name, exported, src));
                } else {
                    parsed.functions.push(function(item, def, name, exported, src));
                }
            }
        }
    }
    if let Some(all) = dunder_all {
        parsed.exports = all;
    }
    parsed
}

/// The class or function behind `item`, looking through decorators.
fn definition(item: Node<'_>) -> Option<Node<'_>> {
    let def = if item.kind() == "decorated_definition" {
        item.child_by_field_name("definition")?
    } else {
        item
    };
    matches!(def.kind(), "class_definition" | "function_definition").then_some(def)
}

fn field_children<'t>(node: Node<'t>, field: &str) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.children_by_field_name(field, &mut cursor).collect()
}

fn imported_name<'a>(node: Node<'_>, src: &Source<'a>) -> &'a str {
    match node.kind() {
        "aliased_import" => src.field_text(node, "name").unwrap_or(""),
        _ => src.text(node),
    }
}

/// `__all__ = ["a", "b"]` at module level, when present.
fn dunder_all(root: Node<'_>, src: &Source<'_>) -> Option<Vec<String>> {
    for stmt in named_children(root) {
        let Some(assign) = first_named(stmt).filter(|n| n.kind() == "assignment") else {
            continue;
        };
        if src.field_text(assign, "left") != Some("__all__") {
            continue;
        }
        let list = assign
            .child_by_field_name("right")
            .filter(|r| matches!(r.kind(), "list" | "tuple"))?;
        let mut names = Vec::new();
        for item in named_children(list) {
            if item.kind() == "string" {
                push_unique(&mut names, strip_string(src.text(item)));
            }
        }
        return Some(names);
    }
    None
}

fn function(outer: Node<'_>, def: Node<'_>, name: &str, is_exported: bool, src: &Source<'_>) -> ParsedFunction {
    let body = def.child_by_field_name("body");
    ParsedFunction {
        name: name.to_string(),
        line: line(outer),
        end_line: end_line(outer),
        params: params(def, src),
        is_async: has_token(def, "async"),
        is_exported,
        calls: body.map(|b| src.calls(b, name)).unwrap_or_default(),
        complexity: src.complexity(def),
        doc: body
            .and_then(|b| docstring(b, src))
            .or_else(|| src.leading_doc(outer)),
    }
}

fn params(def: Node<'_>, src: &Source<'_>) -> Vec<String> {
    let Some(list) = def.child_by_field_name("parameters") else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for param in named_children(list) {
        let name = match param.kind() {
            "identifier" => Some(src.text(param)),
            "default_parameter" | "typed_default_parameter" => src.field_text(param, "name"),
            "typed_parameter" | "list_splat_pattern" | "dictionary_splat_pattern" => {
                first_named(param).map(|n| src.text(n))
            }
            _ => None,
        };
        let Some(name) = name.map(|n| n.trim_start_matches('*')) else {
            continue;
        };
        if name != "self" && name != "cls" {
            push_unique(&mut out, name);
        }
    }
    out
}

fn docstring(body: Node<'_>, src: &Source<'_>) -> Option<String> {
    let first = named_children(body)
        .into_iter()
        .find(|n| n.kind() != "comment")?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string = first_named(first).filter(|n| n.kind() == "string")?;
    let doc = strip_string(src.text(string)).trim();
    (!doc.is_empty()).then(|| doc.to_string())
}

fn strip_string(text: &str) -> &str {
    text.trim_start_matches(|c: char| c.is_ascii_alphabetic())
        .trim_matches(|c| c == '"' || c == '\'')
}

fn class(outer: Node<'_>, def: Node<'_>, name: &str, is_exported: bool, src: &Source<'_>) -> ParsedClass {
    let mut class = ParsedClass {
        name: name.to_string(),
        line: line(outer),
        end_line: end_line(outer),
        is_exported,
        ..Default::default()
    };

    if let Some(bases) = def.child_by_field_name("superclasses") {
        let mut bases = named_children(bases)
            .into_iter()
            .filter(|b| matches!(b.kind(), "identifier" | "attribute"))
            .map(|b| src.text(b))
            .filter(|b| *b != "object");
        class.extends = bases.next().map(str::to_string);
        for base in bases {
            push_unique(&mut class.implements, base);
        }
    }

    let Some(body) = def.child_by_field_name("body") else {
        return class;
    };
    class.doc = docstring(body, src).or_else(|| src.leading_doc(outer));

    let mut methods = Vec::new();
    for member in named_children(body) {
        if let Some(method) = definition(member).filter(|d| d.kind() == "function_definition") {
            methods.push((member, method));
            continue;
        }
        if member.kind() != "expression_statement" {
            continue;
        }
        if let Some(assign) = first_named(member).filter(|n| n.kind() == "assignment") {
            if let Some(left) = assign.child_by_field_name("left").filter(|l| l.kind() == "identifier") {
                push_unique(&mut class.properties, src.text(left));
            }
        }
    }

    for (member, method) in methods {
        let Some(name) = src.field_text(method, "name") else {
            continue;
        };
        for node in descendants(method) {
            if !matches!(node.kind(), "assignment" | "augmented_assignment") {
                continue;
            }
            let Some(left) = node.child_by_field_name("left").filter(|l| l.kind() == "attribute") else {
                continue;
            };
            if src.field_text(left, "object") == Some("self") {
                if let Some(attr) = src.field_text(left, "attribute") {
                    push_unique(&mut class.properties, attr);
                }
            }
        }
        let exported = is_exported && !name.starts_with('_');
        class.methods.push(function(member, method, name, exported, src));
    }
    class
}

/// `.b` becomes `./b`, `..pkg.mod` becomes `../pkg/mod`.
fn python_module_path(module: &str) -> String {
    let dots = module.chars().take_while(|c| *c == '.').count();
    if dots == 0 {
        return module.to_string();
    }
    let rest = module[dots..].replace('.', "/");
    let prefix = if dots == 1 {
        "./".to_string()
    } else {
        "../".repeat(dots - 1)
    };
    if rest.is_empty() {
        format!("{}__init__", prefix)
    } else {
        format!("{}{}", prefix, rest)
    }
}

#[cfg(test)]
mod tests {
    use super::python_module_path;
    use crate::frontend::{LanguageFrontend, TreeSitterFrontend};
    use codectx_core::parsed::ParsedFile;

    fn parse(path: &str, src: &str) -> ParsedFile {
        TreeSitterFrontend.parse(path, src).unwrap()
    }

    #[test]
    fn test_python_module() {
        let src = r#"from .models import User, Account
import os, json as j

class Repo(Base, Mixin):
    """Stores users."""
    table = "users"

    def __init__(self, db):
        self.db = db

    async def find(self, user_id):
        if user_id:
            return self.db.get(user_id)
        return None


def _private():
    pass


def load(path, strict=False):
    # comment
    data = read(path)
    return data
"#;
        let p = parse("app/repo.py", src);
        assert_eq!(p.imports.len(), 3);
        assert_eq!(p.imports[0].source, "./models");
        assert_eq!(p.imports[0].names, vec!["User", "Account"]);
        assert_eq!(p.imports[1].source, "os");
        assert_eq!(p.imports[2].source, "json");

        let c = &p.classes[0];
        assert_eq!(c.name, "Repo");
        assert_eq!(c.extends.as_deref(), Some("Base"));
        assert_eq!(c.implements, vec!["Mixin"]);
        assert_eq!(c.doc.as_deref(), Some("Stores users."));
        assert_eq!(c.properties, vec!["table", "db"]);
        assert_eq!(c.methods.len(), 2);
        assert_eq!(c.methods[0].params, vec!["db"]);
        assert!(c.methods[1].is_async);
        assert_eq!(c.methods[1].params, vec!["user_id"]);
        assert_eq!(c.methods[1].complexity, 2);
        assert_eq!((c.line, c.end_line), (4, 14));

        let names: Vec<&str> = p.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["_private", "load"]);
        assert!(!p.functions[0].is_exported);
        assert_eq!(p.functions[1].params, vec!["path", "strict"]);
        assert_eq!(p.functions[1].calls, vec!["read"]);
        assert_eq!(p.exports, vec!["Repo", "load"]);
    }

    #[test]
    fn test_decorators_and_dunder_all() {
        let src = r#"__all__ = ["handler"]

@route("/x")
def handler(request, *args, **kwargs):
    return render(request)


def helper():
    pass
"#;
        let p = parse("app/views.py", src);
        assert_eq!(p.exports, vec!["handler"]);
        let handler = &p.functions[0];
        assert_eq!(handler.line, 3);
        assert_eq!(handler.params, vec!["request", "args", "kwargs"]);
        assert_eq!(handler.calls, vec!["render"]);
        assert!(handler.is_exported);
        assert!(!p.functions[1].is_exported);
    }

    #[test]
    fn test_python_relative_module_paths() {
        assert_eq!(python_module_path(".b"), "./b");
        assert_eq!(python_module_path("..pkg.mod"), "../pkg/mod");
        assert_eq!(python_module_path("."), "./__init__");
        assert_eq!(python_module_path("os.path"), "os.path");
    }
}
