//! JavaScript / TypeScript / TSX extraction via AST traversal.
//!
//! Handles function declarations, functions bound to `const`/`let`
//! declarators, classes with `extends` heritage and their methods, ES
//! `import` statements, CommonJS `require` calls, and call/`new` sites.

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

pub struct JavaScriptExtractor {
    language: SupportedLanguage,
    parser: Parser,
}

impl JavaScriptExtractor {
    pub fn new(language: SupportedLanguage) -> Result<Self> {
        if language == SupportedLanguage::Python {
            return Err(CgcError::UnsupportedLanguage(language.name().to_string()));
        }
        Ok(Self {
            language,
            parser: new_parser(language)?,
        })
    }
}

impl Extractor for JavaScriptExtractor {
    fn language(&self) -> SupportedLanguage {
        self.language
    }

    fn extract(&mut self, path: &Path, source: &str) -> Result<FileExtraction> {
        let tree = self
            .parser
            .parse(source, None)
            .ok_or_else(|| CgcError::Pipeline(format!("parse aborted: {}", path.display())))?;
        let mut out = FileExtraction::new(path.to_path_buf(), self.language);
        out.line_count = source.lines().count();
        let walker = Walker {
            language: self.language,
            source: source.as_bytes(),
        };
        walker.walk(tree.root_node(), &Context::default(), &mut out);
        Ok(out)
    }
}

#[derive(Debug, Clone, Default)]
struct Context {
    scope: Option<String>,
    function: Option<String>,
    in_class: bool,
}

struct Walker<'s> {
    language: SupportedLanguage,
    source: &'s [u8],
}

impl Walker<'_> {
    fn text(&self, node: Node<'_>) -> String {
        node_text(node, self.source)
    }

    fn walk(&self, node: Node<'_>, ctx: &Context, out: &mut FileExtraction) {
        match node.kind() {
            "function_declaration" | "generator_function_declaration" => {
                if let Some(name) = node.child_by_field_name("name") {
                    let name = self.text(name);
                    self.visit_function(node, name, ctx, out);
                }
            }
            "method_definition" => {
                if let Some(name) = node.child_by_field_name("name") {
                    let name = self.text(name);
                    self.visit_function(node, name, ctx, out);
                }
            }
            "class_declaration" | "abstract_class_declaration" | "class" => {
                self.visit_class(node, ctx, out)
            }
            "variable_declarator" => self.visit_declarator(node, ctx, out),
            "import_statement" => self.visit_import(node, out),
            "call_expression" => {
                self.visit_call(node, ctx, out);
                self.walk_children(node, ctx, out);
            }
            "new_expression" => {
                if let Some(constructor) = node.child_by_field_name("constructor") {
                    self.push_call(constructor, node, ctx, out);
                }
                self.walk_children(node, ctx, out);
            }
            _ => self.walk_children(node, ctx, out),
        }
    }

    fn walk_children(&self, node: Node<'_>, ctx: &Context, out: &mut FileExtraction) {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.walk(child, ctx, out);
        }
    }

    fn visit_function(&self, node: Node<'_>, name: String, ctx: &Context, out: &mut FileExtraction) {
        let qualified_name = join_qualified(ctx.scope.as_deref(), &name);
        let (line_start, line_end) = line_span(node);
        out.symbols.push(ExtractedSymbol {
            name,
            qualified_name: qualified_name.clone(),
            kind: Some(NodeKind::Function),
            line_start,
            line_end,
            code_snippet: truncate(&self.text(node), MAX_SNIPPET_CHARS),
            parent: ctx.scope.clone(),
            complexity: Some(cyclomatic_complexity(node, self.language, self.source)),
            args: node
                .child_by_field_name("parameters")
                .map(|p| self.parameters(p))
                .unwrap_or_default(),
            decorators: self.decorators(node),
            bases: Vec::new(),
            docstring: self.doc_comment(node),
            value: None,
            is_method: ctx.in_class,
        });

        if let Some(body) = node.child_by_field_name("body") {
            let inner = Context {
                scope: Some(qualified_name.clone()),
                function: Some(qualified_name),
                in_class: false,
            };
            self.walk(body, &inner, out);
        }
    }

    fn visit_class(&self, node: Node<'_>, ctx: &Context, out: &mut FileExtraction) {
        let Some(name) = node.child_by_field_name("name").map(|n| self.text(n)) else {
            // Anonymous class expression: only its body matters.
            self.walk_children(node, ctx, out);
            return;
        };
        let qualified_name = join_qualified(ctx.scope.as_deref(), &name);
        let (line_start, line_end) = line_span(node);

        let mut bases = Vec::new();
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if child.kind() == "class_heritage" {
                self.heritage(child, &mut bases);
            }
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
            code_snippet: truncate(&self.text(node), MAX_SNIPPET_CHARS),
            parent: ctx.scope.clone(),
            decorators: self.decorators(node),
            bases,
            docstring: self.doc_comment(node),
            ..Default::default()
        });

        if let Some(body) = node.child_by_field_name("body") {
            let inner = Context {
                scope: Some(qualified_name),
                function: ctx.function.clone(),
                in_class: true,
            };
            self.walk_children(body, &inner, out);
        }
    }

    /// `extends X` in JS is a bare expression; TS wraps it in `extends_clause`.
    fn heritage(&self, heritage: Node<'_>, bases: &mut Vec<String>) {
        let mut cursor = heritage.walk();
        for child in heritage.named_children(&mut cursor) {
            match child.kind() {
                "extends_clause" => {
                    let mut inner = child.walk();
                    for value in child.children_by_field_name("value", &mut inner) {
                        bases.push(self.text(value));
                    }
                }
                "implements_clause" => {}
                _ => bases.push(self.text(child)),
            }
        }
    }

    fn visit_declarator(&self, node: Node<'_>, ctx: &Context, out: &mut FileExtraction) {
        let Some(name_node) = node.child_by_field_name("name") else {
            return;
        };
        let value = node.child_by_field_name("value");

        if name_node.kind() == "identifier" {
            let name = self.text(name_node);
            let required = value.and_then(|v| self.require_target(v));
            match (value, required) {
                (_, Some(module)) => {
                    out.imports.push(ExtractedImport {
                        module,
                        names: Vec::new(),
                        alias: Some(name),
                        level: 0,
                        line: node.start_position().row + 1,
                    });
                    return;
                }
                (Some(v), None)
                    if matches!(v.kind(), "arrow_function" | "function_expression" | "function") =>
                {
                    self.visit_function_value(node, v, name, ctx, out);
                    return;
                }
                _ => {
                    let qualified_name = join_qualified(ctx.scope.as_deref(), &name);
                    let exists = out.symbols.iter().any(|s| {
                        s.kind() == NodeKind::Variable && s.qualified_name == qualified_name
                    });
                    if !exists {
                        let (line_start, line_end) = line_span(node);
                        out.symbols.push(ExtractedSymbol {
                            name,
                            qualified_name,
                            kind: Some(NodeKind::Variable),
                            line_start,
                            line_end,
                            code_snippet: truncate(&self.text(node), MAX_VALUE_CHARS),
                            parent: ctx.scope.clone(),
                            value: value.map(|v| truncate(&self.text(v), MAX_VALUE_CHARS)),
                            ..Default::default()
                        });
                    }
                }
            }
        }
        if let Some(value) = value {
            self.walk(value, ctx, out);
        }
    }

    /// `const handler = (req) => { ... }` becomes a function named `handler`.
    fn visit_function_value(
        &self,
        declarator: Node<'_>,
        function: Node<'_>,
        name: String,
        ctx: &Context,
        out: &mut FileExtraction,
    ) {
        let qualified_name = join_qualified(ctx.scope.as_deref(), &name);
        let (line_start, line_end) = line_span(declarator);
        let args = match function.child_by_field_name("parameters") {
            Some(params) => self.parameters(params),
            // `x => x * 2`
            None => function
                .child_by_field_name("parameter")
                .map(|p| vec![self.text(p)])
                .unwrap_or_default(),
        };
        let doc_anchor = declarator.parent().unwrap_or(declarator);
        out.symbols.push(ExtractedSymbol {
            name,
            qualified_name: qualified_name.clone(),
            kind: Some(NodeKind::Function),
            line_start,
            line_end,
            code_snippet: truncate(&self.text(declarator), MAX_SNIPPET_CHARS),
            parent: ctx.scope.clone(),
            complexity: Some(cyclomatic_complexity(function, self.language, self.source)),
            args,
            docstring: self.doc_comment(doc_anchor),
            is_method: false,
            ..Default::default()
        });
        if let Some(body) = function.child_by_field_name("body") {
            let inner = Context {
                scope: Some(qualified_name.clone()),
                function: Some(qualified_name),
                in_class: false,
            };
            self.walk(body, &inner, out);
        }
    }

    fn visit_import(&self, node: Node<'_>, out: &mut FileExtraction) {
        let Some(module) = node
            .child_by_field_name("source")
            .map(|s| unquote(&self.text(s)))
        else {
            return;
        };
        let mut names = Vec::new();
        let mut alias = None;
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if child.kind() != "import_clause" {
                continue;
            }
            let mut clause_cursor = child.walk();
            for part in child.named_children(&mut clause_cursor) {
                match part.kind() {
                    "identifier" => names.push(self.text(part)),
                    "namespace_import" => {
                        alias = part.named_child(0).map(|n| self.text(n));
                    }
                    "named_imports" => {
                        let mut spec_cursor = part.walk();
                        for spec in part.named_children(&mut spec_cursor) {
                            if let Some(name) = spec.child_by_field_name("name") {
                                names.push(self.text(name));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        out.imports.push(ExtractedImport {
            module,
            names,
            alias,
            level: 0,
            line: node.start_position().row + 1,
        });
    }

    fn visit_call(&self, node: Node<'_>, ctx: &Context, out: &mut FileExtraction) {
        if let Some(module) = self.require_target(node) {
            out.imports.push(ExtractedImport {
                module,
                line: node.start_position().row + 1,
                ..Default::default()
            });
            return;
        }
        if let Some(function) = node.child_by_field_name("function") {
            self.push_call(function, node, ctx, out);
        }
    }

    fn push_call(&self, callee: Node<'_>, site: Node<'_>, ctx: &Context, out: &mut FileExtraction) {
        let (name, receiver) = match callee.kind() {
            "identifier" => (self.text(callee), None),
            "member_expression" => {
                let Some(property) = callee.child_by_field_name("property") else {
                    return;
                };
                (
                    self.text(property),
                    callee.child_by_field_name("object").map(|o| self.text(o)),
                )
            }
            _ => return,
        };
        out.calls.push(ExtractedCall {
            caller: ctx.function.clone(),
            callee: name,
            receiver,
            line: site.start_position().row + 1,
        });
    }

    /// Module string of a `require('x')` call.
    fn require_target(&self, node: Node<'_>) -> Option<String> {
        if node.kind() != "call_expression" {
            return None;
        }
        let function = node.child_by_field_name("function")?;
        if function.kind() != "identifier" || self.text(function) != "require" {
            return None;
        }
        let arg = node.child_by_field_name("arguments")?.named_child(0)?;
        (arg.kind() == "string").then(|| unquote(&self.text(arg)))
    }

    fn parameters(&self, params: Node<'_>) -> Vec<String> {
        let mut cursor = params.walk();
        params
            .named_children(&mut cursor)
            .filter_map(|p| match p.kind() {
                "identifier" | "rest_pattern" | "object_pattern" | "array_pattern" => {
                    Some(self.text(p))
                }
                "assignment_pattern" => p.child_by_field_name("left").map(|l| self.text(l)),
                "required_parameter" | "optional_parameter" => {
                    p.child_by_field_name("pattern").map(|l| self.text(l))
                }
                _ => None,
            })
            .collect()
    }

    fn decorators(&self, node: Node<'_>) -> Vec<String> {
        let mut cursor = node.walk();
        node.named_children(&mut cursor)
            .filter(|c| c.kind() == "decorator")
            .map(|c| self.text(c).trim_start_matches('@').trim().to_string())
            .collect()
    }

    /// A `/** ... */` block directly above the declaration (or its `export`).
    fn doc_comment(&self, node: Node<'_>) -> Option<String> {
        let anchor = match node.parent() {
            Some(parent) if parent.kind() == "export_statement" => parent,
            _ => node,
        };
        let comment = anchor.prev_named_sibling()?;
        if comment.kind() != "comment" {
            return None;
        }
        let text = self.text(comment);
        let body = text.strip_prefix("/**")?.strip_suffix("*/")?;
        let doc = body
            .lines()
            .map(|l| l.trim().trim_start_matches('*').trim())
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        (!doc.is_empty()).then_some(doc)
    }
}

fn unquote(text: &str) -> String {
    text.trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(language: SupportedLanguage, source: &str) -> FileExtraction {
        JavaScriptExtractor::new(language)
            .unwrap()
            .extract(Path::new("/repo/app.js"), source)
            .unwrap()
    }

    #[test]
    fn classes_methods_and_heritage() {
        let out = extract(
            SupportedLanguage::JavaScript,
            "\
/** Base shape. */
class Shape {}

export class Circle extends Shape {
  area(r = 1) {
    return Math.PI * square(r);
  }
}
",
        );
        let shape = out.find_symbol("Shape").unwrap();
        assert_eq!(shape.docstring.as_deref(), Some("Base shape."));

        let circle = out.find_symbol("Circle").unwrap();
        assert_eq!(circle.bases, vec!["Shape"]);

        let area = out.find_symbol("Circle.area").unwrap();
        assert!(area.is_method);
        assert_eq!(area.args, vec!["r"]);

        let call = out.calls.iter().find(|c| c.callee == "square").unwrap();
        assert_eq!(call.caller.as_deref(), Some("Circle.area"));
    }

    #[test]
    fn arrow_functions_and_variables() {
        let out = extract(
            SupportedLanguage::JavaScript,
            "\
const LIMIT = 10;
const double = (x) => helper(x) * 2;
function helper(v) { return v || LIMIT; }
",
        );
        let double = out.find_symbol("double").unwrap();
        assert_eq!(double.kind(), NodeKind::Function);
        assert_eq!(double.args, vec!["x"]);

        let limit = out.find_symbol("LIMIT").unwrap();
        assert_eq!(limit.kind(), NodeKind::Variable);
        assert_eq!(limit.value.as_deref(), Some("10"));

        assert_eq!(out.find_symbol("helper").unwrap().complexity, Some(2));
        let call = out.calls.iter().find(|c| c.callee == "helper").unwrap();
        assert_eq!(call.caller.as_deref(), Some("double"));
    }

    #[test]
    fn es_and_commonjs_imports() {
        let out = extract(
            SupportedLanguage::JavaScript,
            "\
import React, { useState as useS, useEffect } from 'react';
import * as path from \"path\";
const fs = require('fs');
require('./side-effect');
",
        );
        let modules: Vec<&str> = out.imports.iter().map(|i| i.module.as_str()).collect();
        assert_eq!(modules, vec!["react", "path", "fs", "./side-effect"]);
        assert_eq!(out.imports[0].names, vec!["React", "useState", "useEffect"]);
        assert_eq!(out.imports[1].alias.as_deref(), Some("path"));
        assert_eq!(out.imports[2].alias.as_deref(), Some("fs"));
        assert!(out.calls.iter().all(|c| c.callee != "require"));
    }

    #[test]
    fn typescript_extends_clause() {
        let out = extract(
            SupportedLanguage::TypeScript,
            "class Repo extends Base<Item> implements Store { get(id: string): Item { return this.find(id); } }",
        );
        let repo = out.find_symbol("Repo").unwrap();
        assert_eq!(repo.bases, vec!["Base"]);
        let get = out.find_symbol("Repo.get").unwrap();
        assert_eq!(get.args, vec!["id"]);
        let find = out.calls.iter().find(|c| c.callee == "find").unwrap();
        assert_eq!(find.receiver.as_deref(), Some("this"));
    }
}
