//! Syntactic view of companion Python source.
//!
//! Only the module's top level is inspected: import statements, function
//! definitions and class definitions (with their direct methods). Decorated
//! definitions keep their decorators in the captured text.

use tree_sitter::{Node, Parser};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclarationKind<'s> {
    Function,
    Class { methods: Vec<&'s str> },
}

/// A top-level definition and its full source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration<'s> {
    pub name: &'s str,
    pub kind: DeclarationKind<'s>,
    pub text: &'s str,
}

impl Declaration<'_> {
    /// True when the declaration is, or contains a method, named in `names`.
    pub fn matches(&self, names: &[String]) -> bool {
        match &self.kind {
            DeclarationKind::Function => names.iter().any(|n| n == self.name),
            DeclarationKind::Class { methods } => {
                methods.iter().any(|m| names.iter().any(|n| n == m))
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PythonModule<'s> {
    pub imports: Vec<&'s str>,
    pub declarations: Vec<Declaration<'s>>,
}

impl<'s> PythonModule<'s> {
    /// Function and method names in source order.
    pub fn declared_names(&self) -> Vec<String> {
        self.declarations
            .iter()
            .flat_map(|decl| match &decl.kind {
                DeclarationKind::Function => vec![decl.name],
                DeclarationKind::Class { methods } => methods.clone(),
            })
            .map(str::to_string)
            .collect()
    }

    /// Declarations matching `names`, whole classes included, in source order.
    pub fn select(&self, names: &[String]) -> Vec<&Declaration<'s>> {
        self.declarations
            .iter()
            .filter(|decl| decl.matches(names))
            .collect()
    }
}

/// Parse Python source. Returns `None` when the source has syntax errors.
pub fn parse_module(source: &str) -> Option<PythonModule<'_>> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .ok()?;
    let tree = parser.parse(source, None)?;
    let root = tree.root_node();
    if root.has_error() {
        return None;
    }

    let mut module = PythonModule::default();
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        match child.kind() {
            "import_statement" | "import_from_statement" | "future_import_statement" => {
                module.imports.push(&source[child.byte_range()]);
            }
            _ => {
                if let Some(decl) = declaration(child, source) {
                    module.declarations.push(decl);
                }
            }
        }
    }
    Some(module)
}

fn declaration<'s>(node: Node<'_>, source: &'s str) -> Option<Declaration<'s>> {
    let definition = unwrap_decorated(node)?;
    let name = field_text(definition, "name", source)?;
    let kind = match definition.kind() {
        "function_definition" => DeclarationKind::Function,
        "class_definition" => DeclarationKind::Class {
            methods: class_methods(definition, source),
        },
        _ => return None,
    };
    Some(Declaration {
        name,
        kind,
        text: &source[node.byte_range()],
    })
}

fn class_methods<'s>(class: Node<'_>, source: &'s str) -> Vec<&'s str> {
    let Some(body) = class.child_by_field_name("body") else {
        return Vec::new();
    };
    let mut cursor = body.walk();
    body.named_children(&mut cursor)
        .filter_map(unwrap_decorated)
        .filter(|node| node.kind() == "function_definition")
        .filter_map(|node| field_text(node, "name", source))
        .collect()
}

fn unwrap_decorated(node: Node<'_>) -> Option<Node<'_>> {
    match node.kind() {
        "decorated_definition" => node.child_by_field_name("definition"),
        "function_definition" | "class_definition" => Some(node),
        _ => None,
    }
}

fn field_text<'s>(node: Node<'_>, field: &str, source: &'s str) -> Option<&'s str> {
    node.child_by_field_name(field)?
        .utf8_text(source.as_bytes())
        .ok()
}
