//! Python extraction via AST traversal.
//!
//! Produces functions (with methods and nested definitions), classes with
//! their bases, module and local variables, import declarations including
//! relative and wildcard forms, and call sites with their receivers.

use std::path::Path;
use tree_sitter::{Node, Parser};

use super::complexity::cyclomatic_complexity;
use super::language::SupportedLanguage;
use super::{join_qualified, line_span, new_parser, node_text, truncate, Extractor};
use crate::error::{CgcError, Result};
use crate::graph::types::{
    ExtractedCall, ExtractedImport, ExtractedInheritance, ExtractedSymbol, FileExtraction,
    NodeKind,
};

const MAX_SNIPPET_CHARS: usize = 8000;
const MAX_VALUE_CHARS: usize = 200;

pub struct PythonExtractor {
    parser: Parser,
}

impl PythonExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            parser: new_parser(SupportedLanguage::Python)?,
        })
    }
}

impl Extractor for PythonExtractor {
    fn language(&self) -> SupportedLanguage {
        SupportedLanguage::Python
    }

    fn extract(&mut self, path: &Path, source: &str) -> Result<FileExtraction> {
        let tree = self
            .parser
            .parse(source, None)
            .ok_or_else(|| CgcError::Pipeline(format!("parse aborted: {}", path.display())))?;
        let mut out = FileExtraction::new(path.to_path_buf(), SupportedLanguage::Python);
        out.line_count = source.lines().count();
        walk(tree.root_node(), &Context::default(), source.as_bytes(), &mut out);
        Ok(out)
    }
}

/// Where the walk currently is.
#[derive(Debug, Clone, Default)]
struct Context {
    /// Qualified name of the innermost function or class.
    scope: Option<String>,
    /// Qualified name of the innermost function; calls are attributed to it.
    function: Option<String>,
    /// Directly inside a class body.
    in_class: bool,
}

fn walk(node: Node<'_>, ctx: &Context, source: &[u8], out: &mut FileExtraction) {
    match node.kind() {
        "decorated_definition" => {
            let decorators = decorators_of(node, source);
            if let Some(definition) = node.child_by_field_name("definition") {
                match definition.kind() {
                    "function_definition" => {
                        visit_function(definition, node, decorators, ctx, source, out)
                    }
                    "class_definition" => visit_class(definition, node, decorators, ctx, source, out),
                    _ => walk(definition, ctx, source, out),
                }
            }
            // Decorator expressions run in the enclosing scope.
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                if child.kind() == "decorator" {
                    walk_children(child, ctx, source, out);
                }
            }
        }
        "function_definition" => visit_function(node, node, Vec::new(), ctx, source, out),
        "class_definition" => visit_class(node, node, Vec::new(), ctx, source, out),
        "import_statement" => visit_import(node, source, out),
        "import_from_statement" => visit_import_from(node, source, out),
        "future_import_statement" => {}
        "call" => {
            visit_call(node, ctx, source, out);
            walk_children(node, ctx, source, out);
        }
        "assignment" => {
            visit_assignment(node, ctx, source, out);
            walk_children(node, ctx, source, out);
        }
        _ => walk_children(node, ctx, source, out),
    }
}

fn walk_children(node: Node<'_>, ctx: &Context, source: &[u8], out: &mut FileExtraction) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        walk(child, ctx, source, out);
    }
}

/// `outer` is the decorated wrapper when there is one; its span and text
/// include the decorators.
fn visit_function(
    node: Node<'_>,
    outer: Node<'_>,
    decorators: Vec<String>,
    ctx: &Context,
    source: &[u8],
    out: &mut FileExtraction,
) {
    let Some(name) = node.child_by_field_name("name").map(|n| node_text(n, source)) else {
        return;
    };
    let qualified_name = join_qualified(ctx.scope.as_deref(), &name);
    let (line_start, line_end) = line_span(outer);
    let body = node.child_by_field_name("body");

    out.symbols.push(ExtractedSymbol {
        name,
        qualified_name: qualified_name.clone(),
        kind: Some(NodeKind::Function),
        line_start,
        line_end,
        code_snippet: truncate(&node_text(outer, source), MAX_SNIPPET_CHARS),
        parent: ctx.scope.clone(),
        complexity: Some(cyclomatic_complexity(node, SupportedLanguage::Python, source)),
        args: node
            .child_by_field_name("parameters")
            .map(|p| parameters(p, source))
            .unwrap_or_default(),
        decorators,
        bases: Vec::new(),
        docstring: body.and_then(|b| docstring(b, source)),
        value: None,
        is_method: ctx.in_class,
    });

    // Default values are evaluated in the enclosing scope.
    if let Some(params) = node.child_by_field_name("parameters") {
        walk_children(params, ctx, source, out);
    }
    if let Some(body) = body {
        let inner = Context {
            scope: Some(qualified_name.clone()),
            function: Some(qualified_name),
            in_class: false,
        };
        walk_children(body, &inner, source, out);
    }
}

fn visit_class(
    node: Node<'_>,
    outer: Node<'_>,
    decorators: Vec<String>,
    ctx: &Context,
    source: &[u8],
    out: &mut FileExtraction,
) {
    let Some(name) = node.child_by_field_name("name").map(|n| node_text(n, source)) else {
        return;
    };
    let qualified_name = join_qualified(ctx.scope.as_deref(), &name);
    let (line_start, line_end) = line_span(outer);
    let body = node.child_by_field_name("body");

    let mut bases = Vec::new();
    if let Some(superclasses) = node.child_by_field_name("superclasses") {
        let mut cursor = superclasses.walk();
        for base in superclasses.named_children(&mut cursor) {
            // `metaclass=ABCMeta` and friends are not bases.
            if matches!(base.kind(), "identifier" | "attribute" | "subscript") {
                bases.push(node_text(base, source));
            }
        }
        // Base expressions may call things (`namedtuple(...)`).
        walk_children(superclasses, ctx, source, out);
    }
    for base in &bases {
        out.inheritance.push(ExtractedInheritance {
            class: qualified_name.clone(),
            base: base.clone(),
            line: line_start,
        });
    }

    out.symbols.push(ExtractedSymbol {
        name,
        qualified_name: qualified_name.clone(),
        kind: Some(NodeKind::Class),
        line_start,
        line_end,
        code_snippet: truncate(&node_text(outer, source), MAX_SNIPPET_CHARS),
        parent: ctx.scope.clone(),
        complexity: None,
        args: Vec::new(),
        decorators,
        bases,
        docstring: body.and_then(|b| docstring(b, source)),
        value: None,
        is_method: false,
    });

    if let Some(body) = body {
        let inner = Context {
            scope: Some(qualified_name),
            function: ctx.function.clone(),
            in_class: true,
        };
        walk_children(body, &inner, source, out);
    }
}

fn visit_import(node: Node<'_>, source: &[u8], out: &mut FileExtraction) {
    let line = node.start_position().row + 1;
    let mut cursor = node.walk();
    for child in node.children_by_field_name("name", &mut cursor) {
        let (module, alias) = match child.kind() {
            "aliased_import" => (
                child
                    .child_by_field_name("name")
                    .map(|n| node_text(n, source))
                    .unwrap_or_default(),
                child.child_by_field_name("alias").map(|n| node_text(n, source)),
            ),
            _ => (node_text(child, source), None),
        };
        if module.is_empty() {
            continue;
        }
        out.imports.push(ExtractedImport {
            module,
            names: Vec::new(),
            alias,
            level: 0,
            line,
        });
    }
}

fn visit_import_from(node: Node<'_>, source: &[u8], out: &mut FileExtraction) {
    let line = node.start_position().row + 1;
    let (module, level) = match node.child_by_field_name("module_name") {
        Some(m) if m.kind() == "relative_import" => {
            let mut level = 0;
            let mut module = String::new();
            let mut cursor = m.walk();
            for part in m.named_children(&mut cursor) {
                match part.kind() {
                    "import_prefix" => level = node_text(part, source).matches('.').count(),
                    _ => module = node_text(part, source),
                }
            }
            (module, level)
        }
        Some(m) => (node_text(m, source), 0),
        None => return,
    };

    let mut names = Vec::new();
    let mut cursor = node.walk();
    for child in node.children_by_field_name("name", &mut cursor) {
        let name = match child.kind() {
            "aliased_import" => child
                .child_by_field_name("name")
                .map(|n| node_text(n, source))
                .unwrap_or_default(),
            _ => node_text(child, source),
        };
        if !name.is_empty() {
            names.push(name);
        }
    }
    let mut cursor = node.walk();
    if node
        .named_children(&mut cursor)
        .any(|c| c.kind() == "wildcard_import")
    {
        names.push("*".to_string());
    }

    out.imports.push(ExtractedImport {
        module,
        names,
        alias: None,
        level,
        line,
    });
}

fn visit_call(node: Node<'_>, ctx: &Context, source: &[u8], out: &mut FileExtraction) {
    let Some(function) = node.child_by_field_name("function") else {
        return;
    };
    let (callee, receiver) = match function.kind() {
        "identifier" => (node_text(function, source), None),
        "attribute" => {
            let Some(attr) = function.child_by_field_name("attribute") else {
                return;
            };
            (
                node_text(attr, source),
                function
                    .child_by_field_name("object")
                    .map(|o| node_text(o, source)),
            )
        }
        // Calls through subscripts or call results have no static name.
        _ => return,
    };
    out.calls.push(ExtractedCall {
        caller: ctx.function.clone(),
        callee,
        receiver,
        line: node.start_position().row + 1,
    });
}

fn visit_assignment(node: Node<'_>, ctx: &Context, source: &[u8], out: &mut FileExtraction) {
    let Some(left) = node.child_by_field_name("left") else {
        return;
    };
    let value = node
        .child_by_field_name("right")
        .map(|r| truncate(&node_text(r, source), MAX_VALUE_CHARS));
    let (line_start, line_end) = line_span(node);

    let mut targets = Vec::new();
    collect_targets(left, source, &mut targets);
    for name in targets {
        let qualified_name = join_qualified(ctx.scope.as_deref(), &name);
        // First binding wins; rebinding the same name is one variable.
        if out
            .symbols
            .iter()
            .any(|s| s.kind() == NodeKind::Variable && s.qualified_name == qualified_name)
        {
            continue;
        }
        out.symbols.push(ExtractedSymbol {
            name,
            qualified_name,
            kind: Some(NodeKind::Variable),
            line_start,
            line_end,
            code_snippet: truncate(&node_text(node, source), MAX_VALUE_CHARS),
            parent: ctx.scope.clone(),
            value: value.clone(),
            ..Default::default()
        });
    }
}

fn collect_targets(node: Node<'_>, source: &[u8], targets: &mut Vec<String>) {
    match node.kind() {
        "identifier" => targets.push(node_text(node, source)),
        "pattern_list" | "tuple_pattern" | "list_pattern" => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                collect_targets(child, source, targets);
            }
        }
        // `self.x = ...` and `a[i] = ...` bind no new name.
        _ => {}
    }
}

fn decorators_of(node: Node<'_>, source: &[u8]) -> Vec<String> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|c| c.kind() == "decorator")
        .map(|c| node_text(c, source).trim_start_matches('@').trim().to_string())
        .collect()
}

fn parameters(params: Node<'_>, source: &[u8]) -> Vec<String> {
    let mut cursor = params.walk();
    params
        .named_children(&mut cursor)
        .filter_map(|p| parameter_name(p, source))
        .collect()
}

fn parameter_name(param: Node<'_>, source: &[u8]) -> Option<String> {
    match param.kind() {
        "identifier" | "list_splat_pattern" | "dictionary_splat_pattern" => {
            Some(node_text(param, source))
        }
        "default_parameter" | "typed_default_parameter" => param
            .child_by_field_name("name")
            .map(|n| node_text(n, source)),
        "typed_parameter" => param.named_child(0).map(|n| node_text(n, source)),
        _ => None,
    }
}

/// First statement of a body when it is a bare string literal.
fn docstring(body: Node<'_>, source: &[u8]) -> Option<String> {
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let literal = first.named_child(0)?;
    if literal.kind() != "string" {
        return None;
    }
    let text = node_text(literal, source);
    let unprefixed = text.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    let stripped = ["\"\"\"", "'''", "\"", "'"]
        .iter()
        .find_map(|q| {
            unprefixed
                .strip_prefix(q)
                .and_then(|rest| rest.strip_suffix(q))
        })
        .unwrap_or(unprefixed);
    let doc = stripped.trim();
    (!doc.is_empty()).then(|| doc.to_string())
}
