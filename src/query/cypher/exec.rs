//! Pattern matching and projection over the code graph.

use petgraph::stable_graph::{EdgeIndex, NodeIndex};
use petgraph::Direction;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::parser::{
    ArithOp, CompareOp, Expr, Literal, NodePattern, OrderItem, PathPattern, Query, RelDirection,
    RelPattern, StringOp,
};
use super::QueryOutput;
use crate::error::{CgcError, Result};
use crate::graph::{CodeGraph, EdgeKind, NodeData, NodeKind};

/// Cap on rows produced while matching, counted across the whole query.
const MAX_INTERMEDIATE_ROWS: usize = 200_000;

/// Cap on edges followed while matching, counted across the whole query.
const MAX_TRAVERSAL_STEPS: usize = 2_000_000;

#[derive(Debug, Clone, PartialEq)]
pub enum Val {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Val>),
    Node(NodeIndex),
    Rel(EdgeIndex),
}

type Row = BTreeMap<String, Val>;

/// Where an expression is evaluated: one binding row, or a group of rows
/// for aggregating projections.
#[derive(Clone, Copy)]
enum Scope<'r> {
    Row(&'r Row),
    Group(&'r [Row]),
}

impl<'r> Scope<'r> {
    fn lookup(&self, var: &str) -> Val {
        let row = match self {
            Scope::Row(row) => Some(*row),
            Scope::Group(rows) => rows.first(),
        };
        row.and_then(|r| r.get(var)).cloned().unwrap_or(Val::Null)
    }
}

/// Work allowance for one query. Matching stops with a validation error as
/// soon as either counter runs out, so a runaway pattern never finishes
/// enumerating before it is refused.
struct Budget {
    rows: usize,
    steps: usize,
}

impl Budget {
    fn new(rows: usize, steps: usize) -> Self {
        Self { rows, steps }
    }

    fn exhausted() -> CgcError {
        CgcError::validation("query matches too many rows; narrow the pattern")
    }

    fn take_row(&mut self) -> Result<()> {
        self.rows = self.rows.checked_sub(1).ok_or_else(Self::exhausted)?;
        Ok(())
    }

    fn take_step(&mut self) -> Result<()> {
        self.steps = self.steps.checked_sub(1).ok_or_else(Self::exhausted)?;
        Ok(())
    }
}

pub fn execute(graph: &CodeGraph, query: &Query, max_rows: usize) -> Result<QueryOutput> {
    let mut budget = Budget::new(MAX_INTERMEDIATE_ROWS, MAX_TRAVERSAL_STEPS);
    execute_within(graph, query, max_rows, &mut budget)
}

fn execute_within(graph: &CodeGraph, query: &Query, max_rows: usize, budget: &mut Budget) -> Result<QueryOutput> {
    check_variables(query)?;

    let mut rows: Vec<Row> = vec![Row::new()];
    for clause in &query.matches {
        let mut next = Vec::new();
        for row in &rows {
            let mut extended = vec![row.clone()];
            for pattern in &clause.patterns {
                let mut grown = Vec::new();
                for partial in &extended {
                    match_pattern(graph, pattern, partial, &mut grown, budget)?;
                }
                extended = grown;
            }
            if let Some(filter) = &clause.filter {
                extended.retain(|r| eval(graph, filter, Scope::Row(r)) == Val::Bool(true));
            }
            if extended.is_empty() && clause.optional {
                let mut padded = row.clone();
                for var in clause.patterns.iter().flat_map(PathPattern::variables) {
                    padded.entry(var).or_insert(Val::Null);
                }
                budget.take_row()?;
                next.push(padded);
            } else {
                next.extend(extended);
            }
        }
        rows = next;
    }

    project(graph, query, rows, max_rows)
}

// ─── Variable checking ──────────────────────────────────────────

fn collect_variables(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Variable(name) => out.push(name.clone()),
        Expr::Literal(_) => {}
        Expr::Property(inner, _) | Expr::Not(inner) | Expr::Neg(inner) => collect_variables(inner, out),
        Expr::IsNull { expr, .. } => collect_variables(expr, out),
        Expr::List(items) => items.iter().for_each(|e| collect_variables(e, out)),
        Expr::Call { args, .. } => args.iter().for_each(|e| collect_variables(e, out)),
        Expr::And(a, b)
        | Expr::Or(a, b)
        | Expr::Xor(a, b)
        | Expr::Compare(_, a, b)
        | Expr::Str(_, a, b)
        | Expr::In(a, b)
        | Expr::Arith(_, a, b) => {
            collect_variables(a, out);
            collect_variables(b, out);
        }
    }
}

fn ensure_known(expr: &Expr, known: &HashSet<String>) -> Result<()> {
    let mut used = Vec::new();
    collect_variables(expr, &mut used);
    match used.into_iter().find(|v| !known.contains(v)) {
        Some(missing) => Err(CgcError::syntax(0, format!("variable `{missing}` is not defined"))),
        None => Ok(()),
    }
}

fn check_variables(query: &Query) -> Result<()> {
    let mut known: HashSet<String> = HashSet::new();
    for clause in &query.matches {
        for pattern in &clause.patterns {
            known.extend(pattern.variables());
        }
        for pattern in &clause.patterns {
            let props = std::iter::once(&pattern.start.props)
                .chain(pattern.steps.iter().flat_map(|(r, n)| [&r.props, &n.props]));
            for (_, expr) in props.flatten() {
                ensure_known(expr, &known)?;
            }
        }
        if let Some(filter) = &clause.filter {
            ensure_known(filter, &known)?;
        }
    }
    if query.ret.star && known.is_empty() {
        return Err(CgcError::syntax(0, "RETURN * requires at least one variable"));
    }
    for item in &query.ret.items {
        ensure_known(&item.expr, &known)?;
    }
    known.extend(query.ret.items.iter().map(|i| i.alias.clone()));
    for order in &query.order_by {
        ensure_known(&order.expr, &known)?;
    }
    Ok(())
}

// ─── Pattern matching ───────────────────────────────────────────

fn bind(row: &mut Row, var: &Option<String>, value: Val) {
    if let Some(var) = var {
        row.insert(var.clone(), value);
    }
}

fn node_matches(graph: &CodeGraph, pattern: &NodePattern, idx: NodeIndex, row: &Row) -> bool {
    let Some(node) = graph.node(idx) else {
        return false;
    };
    if let Some(bound) = pattern.var.as_ref().and_then(|v| row.get(v)) {
        if *bound != Val::Node(idx) {
            return false;
        }
    }
    if !pattern
        .labels
        .iter()
        .all(|l| NodeKind::from_label(l) == Some(node.kind))
    {
        return false;
    }
    pattern.props.iter().all(|(key, expr)| {
        let wanted = eval(graph, expr, Scope::Row(row));
        equals(&node_property(node, key), &wanted) == Some(true)
    })
}

fn start_candidates(graph: &CodeGraph, pattern: &NodePattern, row: &Row) -> Vec<NodeIndex> {
    if let Some(bound) = pattern.var.as_ref().and_then(|v| row.get(v)) {
        return match bound {
            Val::Node(idx) => vec![*idx],
            _ => Vec::new(),
        };
    }
    match pattern.labels.first() {
        Some(label) => match NodeKind::from_label(label) {
            Some(kind) => graph.nodes_of_kind(kind),
            None => Vec::new(),
        },
        None => {
            let mut all: Vec<NodeIndex> = graph.node_indices().collect();
            all.sort();
            all
        }
    }
}

fn match_pattern(
    graph: &CodeGraph,
    pattern: &PathPattern,
    row: &Row,
    out: &mut Vec<Row>,
    budget: &mut Budget,
) -> Result<()> {
    for start in start_candidates(graph, &pattern.start, row) {
        budget.take_step()?;
        if !node_matches(graph, &pattern.start, start, row) {
            continue;
        }
        let mut bound = row.clone();
        bind(&mut bound, &pattern.start.var, Val::Node(start));
        expand(graph, &pattern.steps, bound, start, &mut Vec::new(), out, budget)?;
    }
    Ok(())
}

fn rel_matches(graph: &CodeGraph, rel: &RelPattern, edge: EdgeIndex, row: &Row) -> bool {
    let Some(data) = graph.edge(edge) else {
        return false;
    };
    if !rel.types.is_empty() && !rel.types.iter().any(|t| EdgeKind::from_name(t) == Some(data.kind)) {
        return false;
    }
    rel.props.iter().all(|(key, expr)| {
        let wanted = eval(graph, expr, Scope::Row(row));
        equals(&rel_property(data.line, key), &wanted) == Some(true)
    })
}

fn step_edges(graph: &CodeGraph, from: NodeIndex, direction: RelDirection) -> Vec<(EdgeIndex, NodeIndex)> {
    match direction {
        RelDirection::Outgoing => graph.neighbors(from, Direction::Outgoing, None),
        RelDirection::Incoming => graph.neighbors(from, Direction::Incoming, None),
        RelDirection::Either => {
            let mut both = graph.neighbors(from, Direction::Outgoing, None);
            both.extend(graph.neighbors(from, Direction::Incoming, None));
            both
        }
    }
}

fn expand(
    graph: &CodeGraph,
    steps: &[(RelPattern, NodePattern)],
    row: Row,
    current: NodeIndex,
    used: &mut Vec<EdgeIndex>,
    out: &mut Vec<Row>,
    budget: &mut Budget,
) -> Result<()> {
    let Some(((rel, node_pattern), rest)) = steps.split_first() else {
        budget.take_row()?;
        out.push(row);
        return Ok(());
    };

    match rel.range {
        None => {
            for (edge, next) in step_edges(graph, current, rel.direction) {
                budget.take_step()?;
                if used.contains(&edge) || !rel_matches(graph, rel, edge, &row) {
                    continue;
                }
                if let Some(bound) = rel.var.as_ref().and_then(|v| row.get(v)) {
                    if *bound != Val::Rel(edge) {
                        continue;
                    }
                }
                if !node_matches(graph, node_pattern, next, &row) {
                    continue;
                }
                let mut bound = row.clone();
                bind(&mut bound, &rel.var, Val::Rel(edge));
                bind(&mut bound, &node_pattern.var, Val::Node(next));
                used.push(edge);
                let grown = expand(graph, rest, bound, next, used, out, budget);
                used.pop();
                grown?;
            }
            Ok(())
        }
        Some((min, max)) => {
            let walk = RangeWalk {
                graph,
                steps,
                row: &row,
                min,
                max,
            };
            walk.run(current, &mut Vec::new(), used, out, budget)
        }
    }
}

/// Depth-first enumeration of variable-length paths. Each edge appears at
/// most once per path.
struct RangeWalk<'a> {
    graph: &'a CodeGraph,
    steps: &'a [(RelPattern, NodePattern)],
    row: &'a Row,
    min: u32,
    max: u32,
}

impl RangeWalk<'_> {
    fn run(
        &self,
        current: NodeIndex,
        path: &mut Vec<EdgeIndex>,
        used: &mut Vec<EdgeIndex>,
        out: &mut Vec<Row>,
        budget: &mut Budget,
    ) -> Result<()> {
        let Some(((rel, node_pattern), rest)) = self.steps.split_first() else {
            return Ok(());
        };
        let graph = self.graph;
        let row = self.row;
        let depth = path.len() as u32;
        if depth >= self.min && node_matches(graph, node_pattern, current, row) {
            let rels = Val::List(path.iter().map(|&e| Val::Rel(e)).collect());
            let rel_ok = rel
                .var
                .as_ref()
                .and_then(|v| row.get(v))
                .map_or(true, |bound| *bound == rels);
            if rel_ok {
                let mut bound = row.clone();
                bind(&mut bound, &rel.var, rels);
                bind(&mut bound, &node_pattern.var, Val::Node(current));
                used.extend(path.iter().copied());
                let grown = expand(graph, rest, bound, current, used, out, budget);
                used.truncate(used.len() - path.len());
                grown?;
            }
        }
        if depth >= self.max {
            return Ok(());
        }
        for (edge, next) in step_edges(graph, current, rel.direction) {
            budget.take_step()?;
            if used.contains(&edge) || path.contains(&edge) || !rel_matches(graph, rel, edge, row) {
                continue;
            }
            path.push(edge);
            let walked = self.run(next, path, used, out, budget);
            path.pop();
            walked?;
        }
        Ok(())
    }
}

// ─── Properties ─────────────────────────────────────────────────

fn strings(items: &[String]) -> Val {
    Val::List(items.iter().cloned().map(Val::Str).collect())
}

fn opt_str(value: &Option<String>) -> Val {
    value.clone().map_or(Val::Null, Val::Str)
}

fn node_property(node: &NodeData, key: &str) -> Val {
    match key {
        "name" => Val::Str(node.name.clone()),
        "qualified_name" => Val::Str(node.qualified_name.clone()),
        "path" | "file_path" => Val::Str(node.file_path.display().to_string()),
        "file_name" => Val::Str(node.file_name()),
        "line_number" | "line_start" => Val::Int(node.line_start as i64),
        "end_line" | "line_end" => Val::Int(node.line_end as i64),
        "complexity" | "cyclomatic_complexity" => node.complexity.map_or(Val::Null, |c| Val::Int(i64::from(c))),
        "args" => strings(&node.args),
        "decorators" => strings(&node.decorators),
        "bases" => strings(&node.bases),
        "imports" => strings(&node.imports),
        "docstring" => opt_str(&node.docstring),
        "source" => Val::Str(node.source.clone()),
        "lang" | "language" => Val::Str(node.language.tag().to_string()),
        "repo_path" => Val::Str(node.repo_path.display().to_string()),
        "scope" => opt_str(&node.scope),
        "value" => opt_str(&node.value),
        "is_method" => Val::Bool(node.is_method),
        "kind" => Val::Str(node.kind.to_string()),
        _ => Val::Null,
    }
}

fn rel_property(line: Option<usize>, key: &str) -> Val {
    match (key, line) {
        ("line_number", Some(line)) => Val::Int(line as i64),
        _ => Val::Null,
    }
}

/// Keys included when a whole node is returned.
fn rendered_keys(kind: NodeKind) -> &'static [&'static str] {
    const COMMON: [&str; 7] = ["name", "qualified_name", "path", "line_number", "end_line", "lang", "repo_path"];
    match kind {
        NodeKind::Function => &["name", "qualified_name", "path", "line_number", "end_line", "lang", "repo_path", "complexity", "args", "decorators", "docstring", "is_method"],
        NodeKind::Class => &["name", "qualified_name", "path", "line_number", "end_line", "lang", "repo_path", "bases", "decorators", "docstring"],
        NodeKind::Variable => &["name", "qualified_name", "path", "line_number", "end_line", "lang", "repo_path", "scope", "value"],
        NodeKind::Module => &COMMON,
    }
}

// ─── Evaluation ─────────────────────────────────────────────────

fn is_number(v: &Val) -> bool {
    matches!(v, Val::Int(_) | Val::Float(_))
}

fn as_f64(v: &Val) -> Option<f64> {
    match v {
        Val::Int(i) => Some(*i as f64),
        Val::Float(f) => Some(*f),
        _ => None,
    }
}

/// Cypher equality: `None` when either side is null.
fn equals(a: &Val, b: &Val) -> Option<bool> {
    match (a, b) {
        (Val::Null, _) | (_, Val::Null) => None,
        (Val::List(xs), Val::List(ys)) => {
            if xs.len() != ys.len() {
                return Some(false);
            }
            let mut unknown = false;
            for (x, y) in xs.iter().zip(ys) {
                match equals(x, y) {
                    Some(false) => return Some(false),
                    None => unknown = true,
                    Some(true) => {}
                }
            }
            if unknown {
                None
            } else {
                Some(true)
            }
        }
        _ if is_number(a) && is_number(b) => Some(as_f64(a) == as_f64(b)),
        _ => Some(a == b),
    }
}

/// Ordering between comparable values; `None` for mixed or null operands.
fn compare(a: &Val, b: &Val) -> Option<Ordering> {
    match (a, b) {
        (Val::Str(x), Val::Str(y)) => Some(x.cmp(y)),
        (Val::Bool(x), Val::Bool(y)) => Some(x.cmp(y)),
        (Val::Int(x), Val::Int(y)) => Some(x.cmp(y)),
        _ if is_number(a) && is_number(b) => as_f64(a)?.partial_cmp(&as_f64(b)?),
        (Val::List(xs), Val::List(ys)) => {
            for (x, y) in xs.iter().zip(ys) {
                match compare(x, y)? {
                    Ordering::Equal => continue,
                    other => return Some(other),
                }
            }
            Some(xs.len().cmp(&ys.len()))
        }
        _ => None,
    }
}

/// Total order for ORDER BY: values of different types sort by type,
/// nulls last.
fn sort_order(a: &Val, b: &Val) -> Ordering {
    fn rank(v: &Val) -> u8 {
        match v {
            Val::Node(_) => 0,
            Val::Rel(_) => 1,
            Val::List(_) => 2,
            Val::Str(_) => 3,
            Val::Bool(_) => 4,
            Val::Int(_) | Val::Float(_) => 5,
            Val::Null => 6,
        }
    }
    match (a, b) {
        (Val::Node(x), Val::Node(y)) => x.cmp(y),
        (Val::Rel(x), Val::Rel(y)) => x.cmp(y),
        _ => compare(a, b).unwrap_or_else(|| rank(a).cmp(&rank(b))),
    }
}

fn truth(v: &Val) -> Option<bool> {
    match v {
        Val::Bool(b) => Some(*b),
        _ => None,
    }
}

fn from_truth(t: Option<bool>) -> Val {
    t.map_or(Val::Null, Val::Bool)
}

fn display_string(v: &Val) -> Option<String> {
    match v {
        Val::Str(s) => Some(s.clone()),
        Val::Int(i) => Some(i.to_string()),
        Val::Float(f) => Some(f.to_string()),
        Val::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn arith(op: ArithOp, a: Val, b: Val) -> Val {
    match (op, a, b) {
        (_, Val::Null, _) | (_, _, Val::Null) => Val::Null,
        (ArithOp::Add, Val::List(mut xs), Val::List(ys)) => {
            xs.extend(ys);
            Val::List(xs)
        }
        (ArithOp::Add, Val::List(mut xs), y) => {
            xs.push(y);
            Val::List(xs)
        }
        (ArithOp::Add, a @ Val::Str(_), b) | (ArithOp::Add, a, b @ Val::Str(_)) => {
            match (display_string(&a), display_string(&b)) {
                (Some(x), Some(y)) => Val::Str(x + &y),
                _ => Val::Null,
            }
        }
        (op, Val::Int(x), Val::Int(y)) => {
            let result = match op {
                ArithOp::Add => x.checked_add(y),
                ArithOp::Sub => x.checked_sub(y),
                ArithOp::Mul => x.checked_mul(y),
                ArithOp::Div => x.checked_div(y),
                ArithOp::Mod => x.checked_rem(y),
            };
            result.map_or(Val::Null, Val::Int)
        }
        (op, a, b) => match (as_f64(&a), as_f64(&b)) {
            (Some(x), Some(y)) => Val::Float(match op {
                ArithOp::Add => x + y,
                ArithOp::Sub => x - y,
                ArithOp::Mul => x * y,
                ArithOp::Div => x / y,
                ArithOp::Mod => x % y,
            }),
            _ => Val::Null,
        },
    }
}

fn eval(graph: &CodeGraph, expr: &Expr, scope: Scope<'_>) -> Val {
    match expr {
        Expr::Literal(lit) => match lit {
            Literal::Null => Val::Null,
            Literal::Bool(b) => Val::Bool(*b),
            Literal::Int(i) => Val::Int(*i),
            Literal::Float(f) => Val::Float(*f),
            Literal::Str(s) => Val::Str(s.clone()),
        },
        Expr::Variable(name) => scope.lookup(name),
        Expr::Property(inner, key) => match eval(graph, inner, scope) {
            Val::Node(idx) => graph.node(idx).map_or(Val::Null, |n| node_property(n, key)),
            Val::Rel(edge) => rel_property(graph.edge(edge).and_then(|e| e.line), key),
            _ => Val::Null,
        },
        Expr::List(items) => Val::List(items.iter().map(|e| eval(graph, e, scope)).collect()),
        Expr::Not(inner) => from_truth(truth(&eval(graph, inner, scope)).map(|b| !b)),
        Expr::And(a, b) => {
            let (x, y) = (truth(&eval(graph, a, scope)), truth(&eval(graph, b, scope)));
            match (x, y) {
                (Some(false), _) | (_, Some(false)) => Val::Bool(false),
                (Some(true), Some(true)) => Val::Bool(true),
                _ => Val::Null,
            }
        }
        Expr::Or(a, b) => {
            let (x, y) = (truth(&eval(graph, a, scope)), truth(&eval(graph, b, scope)));
            match (x, y) {
                (Some(true), _) | (_, Some(true)) => Val::Bool(true),
                (Some(false), Some(false)) => Val::Bool(false),
                _ => Val::Null,
            }
        }
        Expr::Xor(a, b) => {
            let (x, y) = (truth(&eval(graph, a, scope)), truth(&eval(graph, b, scope)));
            match (x, y) {
                (Some(x), Some(y)) => Val::Bool(x != y),
                _ => Val::Null,
            }
        }
        Expr::Compare(op, a, b) => {
            let (x, y) = (eval(graph, a, scope), eval(graph, b, scope));
            let result = match op {
                CompareOp::Eq => equals(&x, &y),
                CompareOp::Neq => equals(&x, &y).map(|e| !e),
                CompareOp::Lt => compare(&x, &y).map(|o| o == Ordering::Less),
                CompareOp::Gt => compare(&x, &y).map(|o| o == Ordering::Greater),
                CompareOp::Le => compare(&x, &y).map(|o| o != Ordering::Greater),
                CompareOp::Ge => compare(&x, &y).map(|o| o != Ordering::Less),
            };
            from_truth(result)
        }
        Expr::Str(op, a, b) => match (eval(graph, a, scope), eval(graph, b, scope)) {
            (Val::Str(x), Val::Str(y)) => Val::Bool(match op {
                StringOp::Contains => x.contains(&y),
                StringOp::StartsWith => x.starts_with(&y),
                StringOp::EndsWith => x.ends_with(&y),
            }),
            _ => Val::Null,
        },
        Expr::In(a, b) => {
            let needle = eval(graph, a, scope);
            match eval(graph, b, scope) {
                Val::List(items) => {
                    let mut unknown = false;
                    for item in &items {
                        match equals(&needle, item) {
                            Some(true) => return Val::Bool(true),
                            None => unknown = true,
                            Some(false) => {}
                        }
                    }
                    if unknown {
                        Val::Null
                    } else {
                        Val::Bool(false)
                    }
                }
                _ => Val::Null,
            }
        }
        Expr::IsNull { expr, negated } => {
            let is_null = eval(graph, expr, scope) == Val::Null;
            Val::Bool(is_null != *negated)
        }
        Expr::Arith(op, a, b) => arith(*op, eval(graph, a, scope), eval(graph, b, scope)),
        Expr::Neg(inner) => match eval(graph, inner, scope) {
            Val::Int(i) => i.checked_neg().map_or(Val::Null, Val::Int),
            Val::Float(f) => Val::Float(-f),
            _ => Val::Null,
        },
        Expr::Call {
            name,
            distinct,
            star,
            args,
        } => {
            if super::parser::AGGREGATES.contains(&name.as_str()) {
                let rows: &[Row] = match scope {
                    Scope::Group(rows) => rows,
                    Scope::Row(row) => std::slice::from_ref(row),
                };
                return aggregate(graph, name, *distinct, *star, args.first(), rows);
            }
            let values: Vec<Val> = args.iter().map(|a| eval(graph, a, scope)).collect();
            scalar(graph, name, values)
        }
    }
}

fn scalar(graph: &CodeGraph, name: &str, mut args: Vec<Val>) -> Val {
    if name == "coalesce" {
        return args.into_iter().find(|v| *v != Val::Null).unwrap_or(Val::Null);
    }
    let arg = if args.is_empty() { Val::Null } else { args.swap_remove(0) };
    match (name, arg) {
        (_, Val::Null) => Val::Null,
        ("tolower", Val::Str(s)) => Val::Str(s.to_lowercase()),
        ("toupper", Val::Str(s)) => Val::Str(s.to_uppercase()),
        ("size", Val::Str(s)) => Val::Int(s.chars().count() as i64),
        ("size", Val::List(items)) => Val::Int(items.len() as i64),
        ("labels", Val::Node(idx)) => graph.node(idx).map_or(Val::Null, |n| {
            Val::List(vec![Val::Str(n.kind.label().to_string())])
        }),
        ("type", Val::Rel(edge)) => graph
            .edge(edge)
            .map_or(Val::Null, |e| Val::Str(e.kind.as_str().to_string())),
        ("id", Val::Node(idx)) => Val::Int(idx.index() as i64),
        ("id", Val::Rel(edge)) => Val::Int(edge.index() as i64),
        ("tostring", value) => display_string(&value).map_or(Val::Null, Val::Str),
        _ => Val::Null,
    }
}

fn dedupe(values: Vec<Val>) -> Vec<Val> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|v| seen.insert(format!("{v:?}")))
        .collect()
}

fn aggregate(
    graph: &CodeGraph,
    name: &str,
    distinct: bool,
    star: bool,
    arg: Option<&Expr>,
    rows: &[Row],
) -> Val {
    if star {
        return Val::Int(rows.len() as i64);
    }
    let Some(arg) = arg else {
        return Val::Null;
    };
    let mut values: Vec<Val> = rows
        .iter()
        .map(|r| eval(graph, arg, Scope::Row(r)))
        .filter(|v| *v != Val::Null)
        .collect();
    if distinct {
        values = dedupe(values);
    }
    match name {
        "count" => Val::Int(values.len() as i64),
        "collect" => Val::List(values),
        "min" => values
            .into_iter()
            .min_by(sort_order)
            .unwrap_or(Val::Null),
        "max" => values
            .into_iter()
            .max_by(sort_order)
            .unwrap_or(Val::Null),
        "sum" => {
            if values.iter().all(|v| matches!(v, Val::Int(_))) {
                let total = values.iter().try_fold(0i64, |acc, v| match v {
                    Val::Int(i) => acc.checked_add(*i),
                    _ => Some(acc),
                });
                total.map_or(Val::Null, Val::Int)
            } else {
                Val::Float(values.iter().filter_map(as_f64).sum())
            }
        }
        "avg" => {
            let numbers: Vec<f64> = values.iter().filter_map(as_f64).collect();
            if numbers.is_empty() {
                Val::Null
            } else {
                Val::Float(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        _ => Val::Null,
    }
}

// ─── Projection ─────────────────────────────────────────────────

struct Projected<'r> {
    scope: Scope<'r>,
    values: Vec<Val>,
}

fn project(graph: &CodeGraph, query: &Query, rows: Vec<Row>, max_rows: usize) -> Result<QueryOutput> {
    let items: Vec<(String, Expr)> = if query.ret.star {
        let mut vars: Vec<String> = query
            .matches
            .iter()
            .flat_map(|m| m.patterns.iter().flat_map(PathPattern::variables))
            .collect();
        vars.sort();
        vars.dedup();
        vars.into_iter().map(|v| (v.clone(), Expr::Variable(v))).collect()
    } else {
        query
            .ret
            .items
            .iter()
            .map(|i| (i.alias.clone(), i.expr.clone()))
            .collect()
    };
    let columns: Vec<String> = items.iter().map(|(alias, _)| alias.clone()).collect();
    let aggregated = items.iter().any(|(_, e)| e.is_aggregate());

    let groups: Vec<Vec<Row>>;
    let mut projected: Vec<Projected<'_>> = Vec::new();
    if aggregated {
        let mut order: Vec<String> = Vec::new();
        let mut grouped: HashMap<String, Vec<Row>> = HashMap::new();
        for row in rows {
            let key: Vec<Val> = items
                .iter()
                .filter(|(_, e)| !e.is_aggregate())
                .map(|(_, e)| eval(graph, e, Scope::Row(&row)))
                .collect();
            let key = format!("{key:?}");
            if !grouped.contains_key(&key) {
                order.push(key.clone());
            }
            grouped.entry(key).or_default().push(row);
        }
        let only_aggregates = items.iter().all(|(_, e)| e.is_aggregate());
        if order.is_empty() && only_aggregates {
            order.push(String::new());
            grouped.insert(String::new(), Vec::new());
        }
        groups = order
            .into_iter()
            .filter_map(|k| grouped.remove(&k))
            .collect();
        for group in &groups {
            let scope = Scope::Group(group);
            let values = items.iter().map(|(_, e)| eval(graph, e, scope)).collect();
            projected.push(Projected { scope, values });
        }
    } else {
        groups = rows.into_iter().map(|r| vec![r]).collect();
        for group in &groups {
            let Some(row) = group.first() else {
                continue;
            };
            let scope = Scope::Row(row);
            let values = items.iter().map(|(_, e)| eval(graph, e, scope)).collect();
            projected.push(Projected { scope, values });
        }
    }

    if query.ret.distinct {
        let mut seen = HashSet::new();
        projected.retain(|p| seen.insert(format!("{:?}", p.values)));
    }

    if !query.order_by.is_empty() {
        let keys: Vec<Vec<Val>> = projected
            .iter()
            .map(|p| {
                query
                    .order_by
                    .iter()
                    .map(|o| order_key(graph, o, &columns, p))
                    .collect()
            })
            .collect();
        let mut indices: Vec<usize> = (0..projected.len()).collect();
        indices.sort_by(|&a, &b| {
            for (i, order) in query.order_by.iter().enumerate() {
                let ord = sort_order(&keys[a][i], &keys[b][i]);
                let ord = if order.descending { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        let mut slots: Vec<Option<Projected<'_>>> = projected.into_iter().map(Some).collect();
        projected = indices.into_iter().filter_map(|i| slots[i].take()).collect();
    }

    let limit = query.limit.unwrap_or(max_rows);
    let rows: Vec<Map<String, Value>> = projected
        .into_iter()
        .skip(query.skip.unwrap_or(0))
        .take(limit)
        .map(|p| {
            columns
                .iter()
                .cloned()
                .zip(p.values.iter().map(|v| to_json(graph, v)))
                .collect()
        })
        .collect();

    Ok(QueryOutput { columns, rows })
}

fn order_key(graph: &CodeGraph, order: &OrderItem, columns: &[String], row: &Projected<'_>) -> Val {
    let column = match &order.expr {
        Expr::Variable(name) => columns.iter().position(|c| c == name),
        _ => None,
    }
    .or_else(|| columns.iter().position(|c| *c == order.text));
    match column {
        Some(i) => row.values.get(i).cloned().unwrap_or(Val::Null),
        None => eval(graph, &order.expr, row.scope),
    }
}

fn to_json(graph: &CodeGraph, value: &Val) -> Value {
    match value {
        Val::Null => Value::Null,
        Val::Bool(b) => Value::Bool(*b),
        Val::Int(i) => Value::from(*i),
        Val::Float(f) => serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number),
        Val::Str(s) => Value::String(s.clone()),
        Val::List(items) => Value::Array(items.iter().map(|v| to_json(graph, v)).collect()),
        Val::Node(idx) => match graph.node(*idx) {
            Some(node) => Value::Object(
                rendered_keys(node.kind)
                    .iter()
                    .map(|&key| (key.to_string(), to_json(graph, &node_property(node, key))))
                    .collect(),
            ),
            None => Value::Null,
        },
        Val::Rel(edge) => match graph.edge(*edge) {
            Some(data) => {
                let mut map = Map::new();
                map.insert("type".to_string(), Value::String(data.kind.as_str().to_string()));
                map.insert(
                    "line_number".to_string(),
                    data.line.map_or(Value::Null, Value::from),
                );
                Value::Object(map)
            }
            None => Value::Null,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::super::{lexer::tokenize, parser::parse};
    use super::*;
    use crate::graph::engine::tests::node;
    use crate::graph::EdgeData;
    use serde_json::json;

    /// a.py: foo -> helper -> leaf, foo -> leaf; class C(A).
    fn sample() -> CodeGraph {
        let mut graph = CodeGraph::new();
        let module = graph.upsert_node(node("/r", "/r/a.py", "a", NodeKind::Module));
        let mut foo_data = node("/r", "/r/a.py", "a.foo", NodeKind::Function);
        foo_data.complexity = Some(4);
        foo_data.line_start = 3;
        let foo = graph.upsert_node(foo_data);
        let mut helper_data = node("/r", "/r/a.py", "a.helper", NodeKind::Function);
        helper_data.complexity = Some(2);
        helper_data.line_start = 10;
        let helper = graph.upsert_node(helper_data);
        let mut leaf_data = node("/r", "/r/a.py", "a.leaf", NodeKind::Function);
        leaf_data.line_start = 20;
        let leaf = graph.upsert_node(leaf_data);
        let a = graph.upsert_node(node("/r", "/r/a.py", "a.A", NodeKind::Class));
        let c = graph.upsert_node(node("/r", "/r/a.py", "a.C", NodeKind::Class));

        for child in [foo, helper, leaf, a, c] {
            graph.upsert_edge(module, child, EdgeData::new(EdgeKind::Contains));
        }
        graph.upsert_edge(foo, helper, EdgeData::at_line(EdgeKind::Calls, 4));
        graph.upsert_edge(helper, leaf, EdgeData::at_line(EdgeKind::Calls, 11));
        graph.upsert_edge(foo, leaf, EdgeData::at_line(EdgeKind::Calls, 5));
        graph.upsert_edge(c, a, EdgeData::new(EdgeKind::Inherits));
        graph
    }

    fn run(graph: &CodeGraph, text: &str) -> Result<QueryOutput> {
        let query = parse(text, &tokenize(text)?)?;
        execute(graph, &query, 100)
    }

    fn column(output: &QueryOutput, name: &str) -> Vec<Value> {
        output.rows.iter().map(|r| r[name].clone()).collect()
    }

    #[test]
    fn match_where_and_alias() {
        let graph = sample();
        let out = run(
            &graph,
            "MATCH (f:Function) WHERE f.complexity > 1 RETURN f.name AS functionName ORDER BY f.complexity DESC",
        )
        .unwrap();
        assert_eq!(out.columns, vec!["functionName"]);
        assert_eq!(column(&out, "functionName"), vec![json!("foo"), json!("helper")]);
    }

    #[test]
    fn relationship_patterns_and_directions() {
        let graph = sample();
        let out = run(
            &graph,
            "MATCH (caller:Function)-[r:CALLS]->(callee {name: 'leaf'}) \
             RETURN caller.name, r.line_number ORDER BY caller.name",
        )
        .unwrap();
        assert_eq!(column(&out, "caller.name"), vec![json!("foo"), json!("helper")]);
        assert_eq!(column(&out, "r.line_number"), vec![json!(5), json!(11)]);

        let out = run(&graph, "MATCH (p:Class)<-[:INHERITS]-(c) RETURN c.name, p.name").unwrap();
        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0]["c.name"], json!("C"));
        assert_eq!(out.rows[0]["p.name"], json!("A"));
    }

    #[test]
    fn variable_length_paths() {
        let graph = sample();
        let out = run(
            &graph,
            "MATCH (f:Function {name: 'foo'})-[:CALLS*2]->(g) RETURN g.name",
        )
        .unwrap();
        assert_eq!(column(&out, "g.name"), vec![json!("leaf")]);

        let out = run(
            &graph,
            "MATCH (f:Function {name: 'foo'})-[rs:CALLS*1..3]->(g) RETURN g.name, size(rs) AS hops ORDER BY hops, g.name",
        )
        .unwrap();
        assert_eq!(column(&out, "g.name"), vec![json!("helper"), json!("leaf"), json!("leaf")]);
        assert_eq!(column(&out, "hops"), vec![json!(1), json!(1), json!(2)]);
    }

    #[test]
    fn aggregation_groups_by_plain_items() {
        let graph = sample();
        let out = run(
            &graph,
            "MATCH (f:Function)-[:CALLS]->(g) RETURN f.name AS caller, count(g) AS calls, collect(g.name) AS names ORDER BY caller",
        )
        .unwrap();
        assert_eq!(column(&out, "caller"), vec![json!("foo"), json!("helper")]);
        assert_eq!(column(&out, "calls"), vec![json!(2), json!(1)]);
        assert_eq!(out.rows[0]["names"], json!(["helper", "leaf"]));

        let out = run(&graph, "MATCH (n:Variable) RETURN count(*) AS total").unwrap();
        assert_eq!(out.rows[0]["total"], json!(0));

        let out = run(
            &graph,
            "MATCH (f:Function) RETURN sum(f.complexity) AS s, max(f.complexity) AS m, avg(f.complexity) AS a",
        )
        .unwrap();
        assert_eq!(out.rows[0]["s"], json!(7));
        assert_eq!(out.rows[0]["m"], json!(4));
    }

    #[test]
    fn optional_match_binds_null() {
        let graph = sample();
        let out = run(
            &graph,
            "MATCH (c:Class) OPTIONAL MATCH (c)-[:INHERITS]->(p) RETURN c.name, p.name ORDER BY c.name",
        )
        .unwrap();
        assert_eq!(column(&out, "c.name"), vec![json!("A"), json!("C")]);
        assert_eq!(column(&out, "p.name"), vec![Value::Null, json!("A")]);
    }

    #[test]
    fn null_logic_strings_and_lists() {
        let graph = sample();
        let out = run(
            &graph,
            "MATCH (n) WHERE n.complexity IS NULL AND n.name IN ['A', 'a'] RETURN toUpper(n.name) + '!' AS shout",
        )
        .unwrap();
        assert_eq!(column(&out, "shout"), vec![json!("A!"), json!("A!")]);

        let out = run(
            &graph,
            "MATCH (f:Function) WHERE f.name STARTS WITH 'he' OR f.missing = 1 RETURN f.qualified_name",
        )
        .unwrap();
        assert_eq!(column(&out, "f.qualified_name"), vec![json!("a.helper")]);
    }

    #[test]
    fn distinct_skip_limit_and_default_cap() {
        let graph = sample();
        let out = run(&graph, "MATCH (n) RETURN DISTINCT labels(n) AS l ORDER BY l").unwrap();
        assert_eq!(
            column(&out, "l"),
            vec![json!(["Class"]), json!(["Function"]), json!(["Module"])]
        );

        let out = run(&graph, "MATCH (f:Function) RETURN f.name ORDER BY f.name SKIP 1 LIMIT 1").unwrap();
        assert_eq!(column(&out, "f.name"), vec![json!("helper")]);

        let query = parse("MATCH (n) RETURN n", &tokenize("MATCH (n) RETURN n").unwrap()).unwrap();
        assert_eq!(execute(&graph, &query, 2).unwrap().rows.len(), 2);
    }

    #[test]
    fn nodes_and_relationships_render_as_maps() {
        let graph = sample();
        let out = run(
            &graph,
            "MATCH (f:Function {name: 'foo'})-[r:CALLS]->(g {name: 'helper'}) RETURN f, r, type(r) AS t",
        )
        .unwrap();
        let f = &out.rows[0]["f"];
        assert_eq!(f["name"], json!("foo"));
        assert_eq!(f["lang"], json!("python"));
        assert_eq!(f["line_number"], json!(3));
        assert!(f.get("source").is_none());
        assert_eq!(out.rows[0]["r"], json!({"type": "CALLS", "line_number": 4}));
        assert_eq!(out.rows[0]["t"], json!("CALLS"));
    }

    /// `n` functions, each calling the next `fanout` ones.
    fn dense_calls(n: usize, fanout: usize) -> CodeGraph {
        let mut graph = CodeGraph::new();
        let funcs: Vec<NodeIndex> = (0..n)
            .map(|i| graph.upsert_node(node("/r", "/r/a.py", &format!("a.f{i}"), NodeKind::Function)))
            .collect();
        for i in 0..n {
            for j in (i + 1)..(i + 1 + fanout).min(n) {
                graph.upsert_edge(funcs[i], funcs[j], EdgeData::at_line(EdgeKind::Calls, i + 1));
            }
        }
        graph
    }

    #[test]
    fn runaway_variable_length_match_is_refused_early() {
        let graph = dense_calls(30, 4);
        let started = std::time::Instant::now();
        let err = run(
            &graph,
            "MATCH (a:Function)-[:CALLS*1..10]->(b:Function) RETURN count(*) AS c",
        )
        .unwrap_err();
        assert!(matches!(err, CgcError::Validation(_)));
        assert!(err.to_string().contains("too many rows"));
        assert!(started.elapsed() < std::time::Duration::from_secs(20));
    }

    #[test]
    fn budget_is_checked_while_a_single_pattern_expands() {
        let graph = dense_calls(12, 3);
        let text = "MATCH (a:Function)-[:CALLS*1..6]->(b) RETURN count(*) AS c";
        let query = parse(text, &tokenize(text).unwrap()).unwrap();

        let mut rows_only = Budget::new(50, usize::MAX);
        assert!(matches!(
            execute_within(&graph, &query, 100, &mut rows_only),
            Err(CgcError::Validation(_))
        ));
        assert_eq!(rows_only.rows, 0);

        let mut steps_only = Budget::new(usize::MAX, 100);
        assert!(execute_within(&graph, &query, 100, &mut steps_only).is_err());
        assert_eq!(steps_only.steps, 0);

        let mut ample = Budget::new(MAX_INTERMEDIATE_ROWS, MAX_TRAVERSAL_STEPS);
        assert!(execute_within(&graph, &query, 100, &mut ample).is_ok());
    }

    #[test]
    fn undefined_variables_are_syntax_errors() {
        let graph = sample();
        assert!(matches!(
            run(&graph, "MATCH (n) RETURN m.name"),
            Err(CgcError::QuerySyntax { .. })
        ));
        assert!(matches!(
            run(&graph, "MATCH (n) WHERE x.name = 'a' RETURN n"),
            Err(CgcError::QuerySyntax { .. })
        ));
    }
}
