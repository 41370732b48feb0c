//! Cyclomatic complexity from the syntax tree.
//!
//! `1 + decision points` over the body of one function. Nested function and
//! class bodies are their own units and are not counted toward the outer
//! function. A `try` statement with its handlers counts the statement
//! itself, each handler, and a `finally` join.

use tree_sitter::Node;

use super::language::SupportedLanguage;

/// Complexity of the function rooted at `function_node`.
pub fn cyclomatic_complexity(function_node: Node<'_>, language: SupportedLanguage, source: &[u8]) -> u32 {
    let body = function_node
        .child_by_field_name("body")
        .unwrap_or(function_node);
    // An expression-bodied arrow function may itself be a decision.
    let own = u32::from(body.id() != function_node.id() && is_decision(body, language, source));
    1 + own + count_decisions(body, language, source)
}

fn count_decisions(node: Node<'_>, language: SupportedLanguage, source: &[u8]) -> u32 {
    let mut total = 0;
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if is_nested_scope(child.kind(), language) {
            continue;
        }
        if is_decision(child, language, source) {
            total += 1;
        }
        total += count_decisions(child, language, source);
    }
    total
}

fn is_nested_scope(kind: &str, language: SupportedLanguage) -> bool {
    match language {
        SupportedLanguage::Python => matches!(
            kind,
            "function_definition" | "class_definition" | "lambda"
        ),
        _ => matches!(
            kind,
            "function_declaration"
                | "generator_function_declaration"
                | "function_expression"
                | "function"
                | "arrow_function"
                | "method_definition"
                | "class_declaration"
                | "class"
        ),
    }
}

fn is_decision(node: Node<'_>, language: SupportedLanguage, source: &[u8]) -> bool {
    let kind = node.kind();
    match language {
        SupportedLanguage::Python => matches!(
            kind,
            "if_statement"
                | "elif_clause"
                | "for_statement"
                | "while_statement"
                | "try_statement"
                | "except_clause"
                | "except_group_clause"
                | "finally_clause"
                | "case_clause"
                | "conditional_expression"
                | "boolean_operator"
                | "if_clause"
                | "for_in_clause"
        ),
        _ => match kind {
            "if_statement"
            | "for_statement"
            | "for_in_statement"
            | "while_statement"
            | "do_statement"
            | "try_statement"
            | "catch_clause"
            | "finally_clause"
            | "switch_case"
            | "ternary_expression" => true,
            "binary_expression" => node
                .child_by_field_name("operator")
                .and_then(|op| op.utf8_text(source).ok())
                .is_some_and(|op| matches!(op, "&&" | "||" | "??")),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::new_parser;

    fn first_function(source: &str, language: SupportedLanguage, kind: &str) -> u32 {
        let mut parser = new_parser(language).unwrap();
        let tree = parser.parse(source, None).unwrap();
        let root = tree.root_node();
        let mut cursor = root.walk();
        let func = root
            .named_children(&mut cursor)
            .find(|n| n.kind() == kind)
            .expect("function in fixture");
        cyclomatic_complexity(func, language, source.as_bytes())
    }

    #[test]
    fn straight_line_function_is_one() {
        let src = "def f(x):\n    return x + 1\n";
        assert_eq!(first_function(src, SupportedLanguage::Python, "function_definition"), 1);
    }

    #[test]
    fn try_except_finally_is_four() {
        let src = "\
def try_except_finally(x):
    try:
        result = 10 / x
    except ZeroDivisionError:
        result = 0
    finally:
        print('done')
    return result
";
        assert_eq!(first_function(src, SupportedLanguage::Python, "function_definition"), 4);
    }

    #[test]
    fn branches_and_boolean_operators_count() {
        let src = "\
def f(a, b):
    if a and b:
        return 1
    elif a or b:
        return 2
    for i in range(3):
        pass
    return 0
";
        // if, and, elif, or, for
        assert_eq!(first_function(src, SupportedLanguage::Python, "function_definition"), 6);
    }

    #[test]
    fn nested_functions_are_separate_units() {
        let src = "\
def outer():
    def inner(x):
        if x:
            return 1
        return 0
    return inner
";
        assert_eq!(first_function(src, SupportedLanguage::Python, "function_definition"), 1);
    }

    #[test]
    fn javascript_logical_operators_count() {
        let src = "function f(a, b) { if (a && b) { return 1; } return a ? 2 : 3; }";
        assert_eq!(
            first_function(src, SupportedLanguage::JavaScript, "function_declaration"),
            4
        );
    }
}
