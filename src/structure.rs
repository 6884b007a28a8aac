use serde::Serialize;
use tree_sitter::{Node, Parser};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Class,
    Interface,
    Enum,
    Record,
    Annotation,
}

/// A top-level type declared in one compilation unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeclaredType {
    pub name: String,
    pub kind: TypeKind,
    /// Fully-qualified names of the direct superclass and implemented or
    /// extended interfaces.
    pub supertypes: Vec<String>,
}

struct CompilationUnit {
    package: String,
    imports: Vec<String>,
}

pub fn parse_declared_types(source: &str) -> Option<Vec<DeclaredType>> {
    if source.trim().is_empty() {
        return Some(Vec::new());
    }

    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_java::LANGUAGE.into())
        .ok()?;
    let tree = parser.parse(source, None)?;
    let root = tree.root_node();
    let bytes = source.as_bytes();

    let mut unit = CompilationUnit {
        package: String::new(),
        imports: Vec::new(),
    };
    let mut pending = Vec::new();

    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        match child.kind() {
            "package_declaration" => {
                unit.package = extract_package(&child, bytes);
            }
            "import_declaration" => {
                if let Some(imp) = extract_import(&child, bytes) {
                    unit.imports.push(imp);
                }
            }
            "class_declaration" => pending.push((child, TypeKind::Class)),
            "interface_declaration" => pending.push((child, TypeKind::Interface)),
            "enum_declaration" => pending.push((child, TypeKind::Enum)),
            "record_declaration" => pending.push((child, TypeKind::Record)),
            "annotation_type_declaration" => pending.push((child, TypeKind::Annotation)),
            _ => {}
        }
    }

    let types = pending
        .into_iter()
        .filter_map(|(node, kind)| {
            let simple = declared_name(&node, bytes)?;
            let supertypes = extract_supertypes(&node, bytes)
                .into_iter()
                .map(|name| unit.resolve(&name))
                .collect();
            Some(DeclaredType {
                name: unit.qualify(simple),
                kind,
                supertypes,
            })
        })
        .collect();

    Some(types)
}

impl CompilationUnit {
    fn qualify(&self, simple: &str) -> String {
        if self.package.is_empty() {
            simple.to_string()
        } else {
            format!("{}.{simple}", self.package)
        }
    }

    /// Resolves a type name as written in source against explicit imports, then
    /// the unit's own package. Wildcard imports are not expanded.
    fn resolve(&self, name: &str) -> String {
        if name.contains('.') {
            return name.to_string();
        }
        let suffix = format!(".{name}");
        if let Some(imported) = self.imports.iter().find(|imp| imp.ends_with(&suffix)) {
            return imported.clone();
        }
        self.qualify(name)
    }
}

fn extract_package(node: &Node, source: &[u8]) -> String {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "scoped_identifier" || child.kind() == "identifier" {
            return node_text(&child, source).to_string();
        }
    }
    String::new()
}

fn extract_import(node: &Node, source: &[u8]) -> Option<String> {
    let mut path = String::new();
    let mut is_static = false;

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "static" => is_static = true,
            "scoped_identifier" | "identifier" => {
                path = node_text(&child, source).to_string();
            }
            "asterisk" => return None,
            _ => {}
        }
    }

    if path.is_empty() || is_static {
        None
    } else {
        Some(path)
    }
}

fn declared_name<'a>(node: &Node, source: &'a [u8]) -> Option<&'a str> {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "identifier" {
            return Some(node_text(&child, source));
        }
    }
    None
}

fn extract_supertypes(node: &Node, source: &[u8]) -> Vec<String> {
    let mut names = Vec::new();

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "superclass" | "super_interfaces" | "extends_interfaces" => {
                collect_type_names(&child, source, &mut names);
            }
            "class_body" | "interface_body" | "enum_body" | "annotation_type_body" => break,
            _ => {}
        }
    }

    names
}

fn collect_type_names(node: &Node, source: &[u8], names: &mut Vec<String>) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        match child.kind() {
            "type_list" => collect_type_names(&child, source, names),
            "type_identifier" | "scoped_type_identifier" => {
                names.push(strip_whitespace(node_text(&child, source)));
            }
            "generic_type" => {
                let mut inner = child.walk();
                if let Some(base) = child.named_children(&mut inner).find(|n| {
                    n.kind() == "type_identifier" || n.kind() == "scoped_type_identifier"
                }) {
                    names.push(strip_whitespace(node_text(&base, source)));
                }
            }
            _ => {}
        }
    }
}

fn node_text<'a>(node: &Node, source: &'a [u8]) -> &'a str {
    node.utf8_text(source).unwrap_or("")
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}
