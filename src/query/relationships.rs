//! Relationship queries over CALLS, INHERITS, IMPORTS and CONTAINS edges.

use petgraph::stable_graph::{EdgeIndex, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::dead_code::{decorator_name, find_dead_code};
use super::metrics::{calculate_cyclomatic_complexity, path_matches};
use crate::error::{CgcError, Result};
use crate::graph::{CodeGraph, EdgeKind, NodeData, NodeKind};

/// Hop limit for transitive traversals.
pub const MAX_DEPTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    FindCallers,
    FindCallees,
    FindAllCallers,
    FindAllCallees,
    CallChain,
    ClassHierarchy,
    Overrides,
    FindImporters,
    ModuleDeps,
    VariableScope,
    FindComplexity,
    FindFunctionsByArgument,
    FindFunctionsByDecorator,
    DeadCode,
}

impl QueryType {
    pub const ALL: [QueryType; 14] = [
        QueryType::FindCallers,
        QueryType::FindCallees,
        QueryType::FindAllCallers,
        QueryType::FindAllCallees,
        QueryType::CallChain,
        QueryType::ClassHierarchy,
        QueryType::Overrides,
        QueryType::FindImporters,
        QueryType::ModuleDeps,
        QueryType::VariableScope,
        QueryType::FindComplexity,
        QueryType::FindFunctionsByArgument,
        QueryType::FindFunctionsByDecorator,
        QueryType::DeadCode,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::FindCallers => "find_callers",
            QueryType::FindCallees => "find_callees",
            QueryType::FindAllCallers => "find_all_callers",
            QueryType::FindAllCallees => "find_all_callees",
            QueryType::CallChain => "call_chain",
            QueryType::ClassHierarchy => "class_hierarchy",
            QueryType::Overrides => "overrides",
            QueryType::FindImporters => "find_importers",
            QueryType::ModuleDeps => "module_deps",
            QueryType::VariableScope => "variable_scope",
            QueryType::FindComplexity => "find_complexity",
            QueryType::FindFunctionsByArgument => "find_functions_by_argument",
            QueryType::FindFunctionsByDecorator => "find_functions_by_decorator",
            QueryType::DeadCode => "dead_code",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryType {
    type Err = CgcError;

    fn from_str(s: &str) -> Result<Self> {
        QueryType::ALL
            .iter()
            .copied()
            .find(|q| q.as_str() == s)
            .ok_or_else(|| {
                let supported: Vec<&str> = QueryType::ALL.iter().map(|q| q.as_str()).collect();
                CgcError::validation(format!(
                    "Unsupported query_type '{s}'. Supported: {}",
                    supported.join(", ")
                ))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerHit {
    pub caller_function: String,
    pub caller_qualified_name: String,
    pub caller_kind: NodeKind,
    pub caller_file_path: String,
    pub caller_line_number: usize,
    pub call_line_number: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalleeHit {
    pub called_function: String,
    pub called_qualified_name: String,
    pub called_kind: NodeKind,
    pub called_file_path: String,
    pub called_line_number: usize,
    pub call_line_number: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitiveHit {
    pub function_name: String,
    pub qualified_name: String,
    pub kind: NodeKind,
    pub file_path: String,
    pub line_number: usize,
    pub depth: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHop {
    pub function_name: String,
    pub qualified_name: String,
    pub file_path: String,
    pub line_number: usize,
    /// Line of the call that reached this hop; `None` for the first.
    pub call_line_number: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallChain {
    pub source: String,
    pub destination: String,
    pub found: bool,
    pub chain: Vec<ChainHop>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentClass {
    pub parent_class: String,
    pub parent_qualified_name: String,
    pub parent_file_path: String,
    pub parent_line_number: usize,
    pub depth: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildClass {
    pub child_class: String,
    pub child_file_path: String,
    pub child_line_number: usize,
    pub depth: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodInfo {
    pub method_name: String,
    pub method_args: Vec<String>,
    pub line_number: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassHierarchy {
    pub class_name: String,
    pub qualified_name: String,
    pub file_path: String,
    pub line_number: usize,
    pub parent_classes: Vec<ParentClass>,
    pub child_classes: Vec<ChildClass>,
    pub methods: Vec<MethodInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideHit {
    pub class_name: String,
    pub method_name: String,
    pub file_path: String,
    pub line_number: usize,
    pub overrides_class: String,
    pub overrides_file_path: String,
    pub overrides_line_number: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImporterHit {
    pub file_name: String,
    pub file_path: String,
    pub module_name: String,
    pub imported_module: String,
    pub line_number: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRef {
    pub module_name: String,
    pub file_name: String,
    pub file_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDeps {
    /// The name the module was asked for by.
    pub module_name: String,
    pub qualified_name: String,
    pub file_path: String,
    /// Every declared import, resolved or not.
    pub imports: Vec<String>,
    pub resolved_imports: Vec<ModuleRef>,
    pub imported_by: Vec<ModuleRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableHit {
    pub variable_name: String,
    pub qualified_name: String,
    pub scope: Option<String>,
    pub value: Option<String>,
    pub file_path: String,
    pub line_number: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureHit {
    pub name: String,
    pub qualified_name: String,
    pub kind: NodeKind,
    pub file_path: String,
    pub line_number: usize,
    pub args: Vec<String>,
    pub decorators: Vec<String>,
}

/// Run one relationship query. `context` narrows the target to a file (or
/// names the destination of a `call_chain`).
pub fn analyze(
    graph: &CodeGraph,
    query_type: QueryType,
    target: &str,
    context: Option<&str>,
) -> Result<Value> {
    let target = target.trim();
    if target.is_empty() && query_type != QueryType::DeadCode {
        return Err(CgcError::validation("target must not be empty"));
    }
    let context = context.map(str::trim).filter(|c| !c.is_empty());
    let scope = context.map(scope_path);
    let scope = scope.as_deref();

    let value = match query_type {
        QueryType::FindCallers => serde_json::to_value(find_callers(graph, target, scope))?,
        QueryType::FindCallees => serde_json::to_value(find_callees(graph, target, scope))?,
        QueryType::FindAllCallers => {
            serde_json::to_value(transitive(graph, target, scope, Direction::Incoming))?
        }
        QueryType::FindAllCallees => {
            serde_json::to_value(transitive(graph, target, scope, Direction::Outgoing))?
        }
        QueryType::CallChain => {
            let (source, destination) = match target.split_once("->") {
                Some((from, to)) => (from.trim(), to.trim()),
                None => (
                    target,
                    context.ok_or_else(|| {
                        CgcError::validation("call_chain needs 'source->destination' or a context naming the destination")
                    })?,
                ),
            };
            serde_json::to_value(call_chain(graph, source, destination))?
        }
        QueryType::ClassHierarchy => serde_json::to_value(class_hierarchy(graph, target, scope)?)?,
        QueryType::Overrides => serde_json::to_value(overrides(graph, target, scope))?,
        QueryType::FindImporters => serde_json::to_value(find_importers(graph, target))?,
        QueryType::ModuleDeps => serde_json::to_value(module_deps(graph, target)?)?,
        QueryType::VariableScope => serde_json::to_value(variable_scope(graph, target, scope))?,
        QueryType::FindComplexity => {
            serde_json::to_value(calculate_cyclomatic_complexity(graph, target, scope)?)?
        }
        QueryType::FindFunctionsByArgument => {
            serde_json::to_value(functions_by_argument(graph, target, scope))?
        }
        QueryType::FindFunctionsByDecorator => {
            serde_json::to_value(functions_by_decorator(graph, target, scope))?
        }
        QueryType::DeadCode => serde_json::to_value(find_dead_code(graph, &[]))?,
    };
    Ok(value)
}

fn scope_path(context: &str) -> PathBuf {
    let raw = PathBuf::from(context);
    std::fs::canonicalize(&raw).unwrap_or(raw)
}

/// Nodes of one of `kinds` named `name` (short or qualified), in file/line
/// order, optionally restricted to `scope`.
fn targets(graph: &CodeGraph, name: &str, kinds: &[NodeKind], scope: Option<&Path>) -> Vec<NodeIndex> {
    let short = name.rsplit('.').next().unwrap_or(name);
    let mut found: Vec<NodeIndex> = graph
        .by_name(short)
        .into_iter()
        .filter(|&idx| {
            graph.node(idx).is_some_and(|n| {
                kinds.contains(&n.kind)
                    && (n.name == name || n.qualified_name == name)
                    && scope.map_or(true, |s| path_matches(&n.file_path, s))
            })
        })
        .collect();
    sort_by_location(graph, &mut found);
    found
}

fn sort_by_location(graph: &CodeGraph, nodes: &mut [NodeIndex]) {
    nodes.sort_by(|&a, &b| match (graph.node(a), graph.node(b)) {
        (Some(na), Some(nb)) => (&na.file_path, na.line_start).cmp(&(&nb.file_path, nb.line_start)),
        _ => a.cmp(&b),
    });
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

const CALLABLE: &[NodeKind] = &[NodeKind::Function, NodeKind::Class];

fn call_edges<'g>(
    graph: &'g CodeGraph,
    target: &str,
    scope: Option<&Path>,
    direction: Direction,
) -> Vec<(&'g NodeData, Option<usize>)> {
    let mut seen: HashSet<NodeIndex> = HashSet::new();
    let mut out = Vec::new();
    for idx in targets(graph, target, CALLABLE, scope) {
        for (edge, other) in graph.neighbors(idx, direction, Some(EdgeKind::Calls)) {
            if !seen.insert(other) {
                continue;
            }
            if let Some(node) = graph.node(other) {
                out.push((node, graph.edge(edge).and_then(|e| e.line)));
            }
        }
    }
    out.sort_by(|a, b| (&a.0.file_path, a.0.line_start).cmp(&(&b.0.file_path, b.0.line_start)));
    out
}

pub fn find_callers(graph: &CodeGraph, target: &str, scope: Option<&Path>) -> Vec<CallerHit> {
    call_edges(graph, target, scope, Direction::Incoming)
        .into_iter()
        .map(|(node, line)| CallerHit {
            caller_function: node.name.clone(),
            caller_qualified_name: node.qualified_name.clone(),
            caller_kind: node.kind,
            caller_file_path: display(&node.file_path),
            caller_line_number: node.line_start,
            call_line_number: line,
        })
        .collect()
}

pub fn find_callees(graph: &CodeGraph, target: &str, scope: Option<&Path>) -> Vec<CalleeHit> {
    call_edges(graph, target, scope, Direction::Outgoing)
        .into_iter()
        .map(|(node, line)| CalleeHit {
            called_function: node.name.clone(),
            called_qualified_name: node.qualified_name.clone(),
            called_kind: node.kind,
            called_file_path: display(&node.file_path),
            called_line_number: node.line_start,
            call_line_number: line,
        })
        .collect()
}

/// Breadth-first closure over `kind` edges from `start`, yielding each
/// reached node once with its hop distance.
fn closure(
    graph: &CodeGraph,
    start: &[NodeIndex],
    direction: Direction,
    kind: EdgeKind,
) -> Vec<(NodeIndex, usize)> {
    let mut visited: HashSet<NodeIndex> = start.iter().copied().collect();
    let mut queue: VecDeque<(NodeIndex, usize)> = start.iter().map(|&s| (s, 0)).collect();
    let mut reached = Vec::new();
    while let Some((current, depth)) = queue.pop_front() {
        if depth >= MAX_DEPTH {
            continue;
        }
        for (_, next) in graph.neighbors(current, direction, Some(kind)) {
            if visited.insert(next) {
                reached.push((next, depth + 1));
                queue.push_back((next, depth + 1));
            }
        }
    }
    reached
}

fn transitive(
    graph: &CodeGraph,
    target: &str,
    scope: Option<&Path>,
    direction: Direction,
) -> Vec<TransitiveHit> {
    let start = targets(graph, target, CALLABLE, scope);
    closure(graph, &start, direction, EdgeKind::Calls)
        .into_iter()
        .filter_map(|(idx, depth)| {
            let node = graph.node(idx)?;
            Some(TransitiveHit {
                function_name: node.name.clone(),
                qualified_name: node.qualified_name.clone(),
                kind: node.kind,
                file_path: display(&node.file_path),
                line_number: node.line_start,
                depth,
            })
        })
        .collect()
}

/// Shortest CALLS path from any function named `source` to any named
/// `destination`.
pub fn call_chain(graph: &CodeGraph, source: &str, destination: &str) -> CallChain {
    let starts = targets(graph, source, CALLABLE, None);
    let goals: HashSet<NodeIndex> = targets(graph, destination, CALLABLE, None).into_iter().collect();

    let mut came_from: HashMap<NodeIndex, (NodeIndex, EdgeIndex)> = HashMap::new();
    let mut visited: HashSet<NodeIndex> = starts.iter().copied().collect();
    let mut queue: VecDeque<(NodeIndex, usize)> = starts.iter().map(|&s| (s, 0)).collect();
    let mut reached = starts.iter().copied().find(|s| goals.contains(s));

    while reached.is_none() {
        let Some((current, depth)) = queue.pop_front() else {
            break;
        };
        if depth >= MAX_DEPTH {
            continue;
        }
        for (edge, next) in graph.neighbors(current, Direction::Outgoing, Some(EdgeKind::Calls)) {
            if !visited.insert(next) {
                continue;
            }
            came_from.insert(next, (current, edge));
            if goals.contains(&next) {
                reached = Some(next);
                break;
            }
            queue.push_back((next, depth + 1));
        }
    }

    let mut chain = Vec::new();
    let mut cursor = reached;
    while let Some(idx) = cursor {
        let step = came_from.get(&idx).copied();
        if let Some(node) = graph.node(idx) {
            chain.push(ChainHop {
                function_name: node.name.clone(),
                qualified_name: node.qualified_name.clone(),
                file_path: display(&node.file_path),
                line_number: node.line_start,
                call_line_number: step.and_then(|(_, edge)| graph.edge(edge)).and_then(|e| e.line),
            });
        }
        cursor = step.map(|(prev, _)| prev);
    }
    chain.reverse();

    CallChain {
        source: source.to_string(),
        destination: destination.to_string(),
        found: reached.is_some(),
        chain,
    }
}

pub fn class_hierarchy(graph: &CodeGraph, target: &str, scope: Option<&Path>) -> Result<ClassHierarchy> {
    let class = targets(graph, target, &[NodeKind::Class], scope)
        .into_iter()
        .next()
        .ok_or_else(|| CgcError::not_found(format!("Class not found: {target}")))?;
    let node = graph
        .node(class)
        .ok_or_else(|| CgcError::not_found(format!("Class not found: {target}")))?;

    let parent_classes = closure(graph, &[class], Direction::Outgoing, EdgeKind::Inherits)
        .into_iter()
        .filter_map(|(idx, depth)| {
            let parent = graph.node(idx)?;
            Some(ParentClass {
                parent_class: parent.name.clone(),
                parent_qualified_name: parent.qualified_name.clone(),
                parent_file_path: display(&parent.file_path),
                parent_line_number: parent.line_start,
                depth,
            })
        })
        .collect();
    let child_classes = closure(graph, &[class], Direction::Incoming, EdgeKind::Inherits)
        .into_iter()
        .filter_map(|(idx, depth)| {
            let child = graph.node(idx)?;
            Some(ChildClass {
                child_class: child.name.clone(),
                child_file_path: display(&child.file_path),
                child_line_number: child.line_start,
                depth,
            })
        })
        .collect();

    let mut methods: Vec<MethodInfo> = graph
        .neighbors(class, Direction::Outgoing, Some(EdgeKind::Contains))
        .into_iter()
        .filter_map(|(_, idx)| graph.node(idx))
        .filter(|m| m.kind == NodeKind::Function)
        .map(|m| MethodInfo {
            method_name: m.name.clone(),
            method_args: m.args.clone(),
            line_number: m.line_start,
        })
        .collect();
    methods.sort_by_key(|m| m.line_number);

    Ok(ClassHierarchy {
        class_name: node.name.clone(),
        qualified_name: node.qualified_name.clone(),
        file_path: display(&node.file_path),
        line_number: node.line_start,
        parent_classes,
        child_classes,
        methods,
    })
}

fn method_named(graph: &CodeGraph, class: NodeIndex, name: &str) -> Option<NodeIndex> {
    graph
        .neighbors(class, Direction::Outgoing, Some(EdgeKind::Contains))
        .into_iter()
        .map(|(_, idx)| idx)
        .find(|&idx| graph.node(idx).is_some_and(|m| m.kind == NodeKind::Function && m.name == name))
}

/// Methods named `method` that redefine a method of an ancestor class.
pub fn overrides(graph: &CodeGraph, method: &str, scope: Option<&Path>) -> Vec<OverrideHit> {
    let mut hits = Vec::new();
    for idx in targets(graph, method, &[NodeKind::Function], scope) {
        let Some(class) = graph.container_of(idx).filter(|&c| {
            graph.node(c).is_some_and(|n| n.kind == NodeKind::Class)
        }) else {
            continue;
        };
        let overridden = closure(graph, &[class], Direction::Outgoing, EdgeKind::Inherits)
            .into_iter()
            .find_map(|(ancestor, _)| method_named(graph, ancestor, method).map(|m| (ancestor, m)));
        let Some((ancestor, base_method)) = overridden else {
            continue;
        };
        let (Some(node), Some(class_node), Some(ancestor_node), Some(base_node)) = (
            graph.node(idx),
            graph.node(class),
            graph.node(ancestor),
            graph.node(base_method),
        ) else {
            continue;
        };
        hits.push(OverrideHit {
            class_name: class_node.name.clone(),
            method_name: node.name.clone(),
            file_path: display(&node.file_path),
            line_number: node.line_start,
            overrides_class: ancestor_node.name.clone(),
            overrides_file_path: display(&base_node.file_path),
            overrides_line_number: base_node.line_start,
        });
    }
    hits
}

/// Whether a declared import `entry` refers to module `target`
/// (`pkg.module_b`, `./module_b` and `module_b` all name `module_b`).
fn import_names_module(entry: &str, target: &str) -> bool {
    if entry == target {
        return true;
    }
    let last = entry
        .trim_end_matches(".js")
        .trim_end_matches(".ts")
        .rsplit(['.', '/'])
        .next()
        .unwrap_or(entry);
    last == target || entry.starts_with(&format!("{target}."))
}

fn module_ref(node: &NodeData) -> ModuleRef {
    ModuleRef {
        module_name: node.qualified_name.clone(),
        file_name: node.file_name(),
        file_path: display(&node.file_path),
    }
}

pub fn find_importers(graph: &CodeGraph, target: &str) -> Vec<ImporterHit> {
    let mut hits: Vec<ImporterHit> = Vec::new();
    let mut seen: HashSet<NodeIndex> = HashSet::new();

    let imported: Vec<NodeIndex> = graph
        .nodes_of_kind(NodeKind::Module)
        .into_iter()
        .filter(|&idx| graph.node(idx).is_some_and(|m| m.name == target || m.qualified_name == target))
        .collect();
    for module in imported {
        for (edge, importer) in graph.neighbors(module, Direction::Incoming, Some(EdgeKind::Imports)) {
            let (Some(node), Some(module_node)) = (graph.node(importer), graph.node(module)) else {
                continue;
            };
            if seen.insert(importer) {
                hits.push(ImporterHit {
                    file_name: node.file_name(),
                    file_path: display(&node.file_path),
                    module_name: node.qualified_name.clone(),
                    imported_module: module_node.qualified_name.clone(),
                    line_number: graph.edge(edge).and_then(|e| e.line),
                });
            }
        }
    }

    // Declarations that name the module without an indexed target.
    for idx in graph.nodes_of_kind(NodeKind::Module) {
        if seen.contains(&idx) {
            continue;
        }
        let Some(node) = graph.node(idx) else {
            continue;
        };
        if let Some(entry) = node.imports.iter().find(|i| import_names_module(i, target)) {
            seen.insert(idx);
            hits.push(ImporterHit {
                file_name: node.file_name(),
                file_path: display(&node.file_path),
                module_name: node.qualified_name.clone(),
                imported_module: entry.clone(),
                line_number: None,
            });
        }
    }

    hits.sort_by(|a, b| a.file_path.cmp(&b.file_path));
    hits
}

pub fn module_deps(graph: &CodeGraph, target: &str) -> Result<ModuleDeps> {
    let as_path = scope_path(target);
    let module = graph
        .module_by_path(&as_path)
        .or_else(|| {
            graph
                .nodes_of_kind(NodeKind::Module)
                .into_iter()
                .find(|&idx| graph.node(idx).is_some_and(|m| m.name == target || m.qualified_name == target))
        })
        .ok_or_else(|| CgcError::not_found(format!("Module not found: {target}")))?;
    let node = graph
        .node(module)
        .ok_or_else(|| CgcError::not_found(format!("Module not found: {target}")))?;

    let linked = |direction| -> Vec<ModuleRef> {
        let mut refs: Vec<ModuleRef> = graph
            .neighbors(module, direction, Some(EdgeKind::Imports))
            .into_iter()
            .filter_map(|(_, idx)| graph.node(idx))
            .map(module_ref)
            .collect();
        refs.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        refs
    };

    Ok(ModuleDeps {
        module_name: target.to_string(),
        qualified_name: node.qualified_name.clone(),
        file_path: display(&node.file_path),
        imports: node.imports.clone(),
        resolved_imports: linked(Direction::Outgoing),
        imported_by: linked(Direction::Incoming),
    })
}

pub fn variable_scope(graph: &CodeGraph, name: &str, scope: Option<&Path>) -> Vec<VariableHit> {
    targets(graph, name, &[NodeKind::Variable], scope)
        .into_iter()
        .filter_map(|idx| graph.node(idx))
        .map(|v| VariableHit {
            variable_name: v.name.clone(),
            qualified_name: v.qualified_name.clone(),
            scope: v.scope.clone(),
            value: v.value.clone(),
            file_path: display(&v.file_path),
            line_number: v.line_start,
        })
        .collect()
}

fn signature_hit(node: &NodeData) -> SignatureHit {
    SignatureHit {
        name: node.name.clone(),
        qualified_name: node.qualified_name.clone(),
        kind: node.kind,
        file_path: display(&node.file_path),
        line_number: node.line_start,
        args: node.args.clone(),
        decorators: node.decorators.clone(),
    }
}

/// Parameter name without splat markers, annotation or default.
fn arg_name(arg: &str) -> &str {
    let arg = arg.trim().trim_start_matches('*').trim_start_matches("...");
    let arg = arg.split([':', '=']).next().unwrap_or(arg);
    arg.trim().trim_end_matches('?')
}

pub fn functions_by_argument(graph: &CodeGraph, argument: &str, scope: Option<&Path>) -> Vec<SignatureHit> {
    let wanted = arg_name(argument);
    graph
        .nodes_of_kind(NodeKind::Function)
        .into_iter()
        .filter_map(|idx| graph.node(idx))
        .filter(|f| scope.map_or(true, |s| path_matches(&f.file_path, s)))
        .filter(|f| f.args.iter().any(|a| arg_name(a) == wanted))
        .map(signature_hit)
        .collect()
}

pub fn functions_by_decorator(graph: &CodeGraph, decorator: &str, scope: Option<&Path>) -> Vec<SignatureHit> {
    let wanted = decorator_name(decorator);
    let mut hits: Vec<SignatureHit> = [NodeKind::Function, NodeKind::Class]
        .into_iter()
        .flat_map(|kind| graph.nodes_of_kind(kind))
        .filter_map(|idx| graph.node(idx))
        .filter(|f| scope.map_or(true, |s| path_matches(&f.file_path, s)))
        .filter(|f| f.decorators.iter().any(|d| decorator_name(d) == wanted))
        .map(signature_hit)
        .collect();
    hits.sort_by(|a, b| (&a.file_path, a.line_number).cmp(&(&b.file_path, b.line_number)));
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::engine::tests::node;
    use crate::graph::EdgeData;

    struct Fixture {
        graph: CodeGraph,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                graph: CodeGraph::new(),
            }
        }

        fn add(&mut self, file: &str, qualified: &str, kind: NodeKind, line: usize) -> NodeIndex {
            let mut n = node("/r", file, qualified, kind);
            n.line_start = line;
            self.graph.upsert_node(n)
        }

        fn link(&mut self, from: NodeIndex, to: NodeIndex, kind: EdgeKind, line: usize) {
            self.graph.upsert_edge(from, to, EdgeData::at_line(kind, line));
        }
    }

    fn names<T>(items: &[T], f: impl Fn(&T) -> &str) -> Vec<String> {
        items.iter().map(|i| f(i).to_string()).collect()
    }

    #[test]
    fn callers_and_callees_respect_context() {
        let mut fx = Fixture::new();
        let foo_a = fx.add("/r/a.py", "foo", NodeKind::Function, 1);
        let foo_b = fx.add("/r/b.py", "foo", NodeKind::Function, 1);
        let helper = fx.add("/r/util.py", "helper", NodeKind::Function, 1);
        let other = fx.add("/r/util.py", "other", NodeKind::Function, 5);
        fx.link(foo_a, helper, EdgeKind::Calls, 3);
        fx.link(foo_b, other, EdgeKind::Calls, 4);

        let callers = find_callers(&fx.graph, "helper", None);
        assert_eq!(names(&callers, |c| &c.caller_function), vec!["foo"]);
        assert_eq!(callers[0].call_line_number, Some(3));

        let all = find_callees(&fx.graph, "foo", None);
        assert_eq!(all.len(), 2);
        let scoped = find_callees(&fx.graph, "foo", Some(Path::new("/r/a.py")));
        assert_eq!(names(&scoped, |c| &c.called_function), vec!["helper"]);
    }

    #[test]
    fn transitive_and_chain() {
        let mut fx = Fixture::new();
        let a = fx.add("/r/m.py", "a", NodeKind::Function, 1);
        let b = fx.add("/r/m.py", "b", NodeKind::Function, 5);
        let c = fx.add("/r/m.py", "c", NodeKind::Function, 9);
        fx.link(a, b, EdgeKind::Calls, 2);
        fx.link(b, c, EdgeKind::Calls, 6);
        fx.link(c, a, EdgeKind::Calls, 10);

        let down = transitive(&fx.graph, "a", None, Direction::Outgoing);
        assert_eq!(
            down.iter().map(|h| (h.function_name.as_str(), h.depth)).collect::<Vec<_>>(),
            vec![("b", 1), ("c", 2)]
        );

        let chain = call_chain(&fx.graph, "a", "c");
        assert!(chain.found);
        assert_eq!(names(&chain.chain, |h| &h.function_name), vec!["a", "b", "c"]);
        assert_eq!(chain.chain[2].call_line_number, Some(6));

        assert!(!call_chain(&fx.graph, "a", "missing").found);
    }

    #[test]
    fn hierarchy_surfaces_all_ancestors() {
        let mut fx = Fixture::new();
        let a = fx.add("/r/classes.py", "A", NodeKind::Class, 1);
        let b = fx.add("/r/classes.py", "B", NodeKind::Class, 5);
        let c = fx.add("/r/classes.py", "C", NodeKind::Class, 9);
        let d = fx.add("/r/classes.py", "D", NodeKind::Class, 20);
        fx.link(b, a, EdgeKind::Inherits, 5);
        fx.link(c, b, EdgeKind::Inherits, 9);
        fx.link(c, a, EdgeKind::Inherits, 9);
        fx.link(d, c, EdgeKind::Inherits, 20);
        let run = fx.add("/r/classes.py", "C.run", NodeKind::Function, 10);
        fx.link(c, run, EdgeKind::Contains, 10);

        let hierarchy = class_hierarchy(&fx.graph, "C", Some(Path::new("/r/classes.py"))).unwrap();
        let parents: Vec<(&str, usize)> = hierarchy
            .parent_classes
            .iter()
            .map(|p| (p.parent_class.as_str(), p.depth))
            .collect();
        assert_eq!(parents, vec![("B", 1), ("A", 1)]);
        assert_eq!(names(&hierarchy.child_classes, |c| &c.child_class), vec!["D"]);
        assert_eq!(names(&hierarchy.methods, |m| &m.method_name), vec!["run"]);

        assert!(matches!(
            class_hierarchy(&fx.graph, "C", Some(Path::new("/r/other.py"))),
            Err(CgcError::NotFound(_))
        ));
    }

    #[test]
    fn overrides_find_ancestor_definitions() {
        let mut fx = Fixture::new();
        let base = fx.add("/r/m.py", "Base", NodeKind::Class, 1);
        let child = fx.add("/r/m.py", "Child", NodeKind::Class, 10);
        fx.link(child, base, EdgeKind::Inherits, 10);
        let base_run = fx.add("/r/m.py", "Base.run", NodeKind::Function, 2);
        let child_run = fx.add("/r/m.py", "Child.run", NodeKind::Function, 11);
        fx.link(base, base_run, EdgeKind::Contains, 2);
        fx.link(child, child_run, EdgeKind::Contains, 11);

        let hits = overrides(&fx.graph, "run", None);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].class_name, "Child");
        assert_eq!(hits[0].overrides_class, "Base");
        assert_eq!(hits[0].overrides_line_number, 2);
    }

    #[test]
    fn importers_include_edges_and_declarations() {
        let mut fx = Fixture::new();
        let module_b = fx.add("/r/module_b.py", "module_b", NodeKind::Module, 1);
        let module_a = fx.add("/r/module_a.py", "module_a", NodeKind::Module, 1);
        fx.link(module_a, module_b, EdgeKind::Imports, 2);
        let mut loose = node("/r", "/r/pkg/sub.py", "pkg.sub", NodeKind::Module);
        loose.imports = vec!["pkg.module_b".to_string()];
        fx.graph.upsert_node(loose);

        let hits = find_importers(&fx.graph, "module_b");
        assert_eq!(names(&hits, |h| &h.file_name), vec!["module_a.py", "sub.py"]);
        assert_eq!(hits[0].line_number, Some(2));

        let deps = module_deps(&fx.graph, "module_b").unwrap();
        assert_eq!(deps.module_name, "module_b");
        assert_eq!(names(&deps.imported_by, |m| &m.file_name), vec!["module_a.py"]);
        assert!(matches!(module_deps(&fx.graph, "nope"), Err(CgcError::NotFound(_))));
    }

    #[test]
    fn signature_queries() {
        let mut fx = Fixture::new();
        let mut handler = node("/r", "/r/app.py", "handler", NodeKind::Function);
        handler.args = vec!["request: Request".to_string(), "*args".to_string()];
        handler.decorators = vec!["app.route('/')".to_string()];
        fx.graph.upsert_node(handler);
        fx.add("/r/app.py", "plain", NodeKind::Function, 9);

        assert_eq!(functions_by_argument(&fx.graph, "request", None).len(), 1);
        assert_eq!(functions_by_argument(&fx.graph, "args", None).len(), 1);
        assert_eq!(functions_by_decorator(&fx.graph, "route", None)[0].name, "handler");
    }

    #[test]
    fn query_types_parse() {
        assert_eq!("find_callers".parse::<QueryType>().unwrap(), QueryType::FindCallers);
        let err = "bogus".parse::<QueryType>().unwrap_err();
        assert!(err.to_string().contains("class_hierarchy"));
        for q in QueryType::ALL {
            assert_eq!(q.as_str().parse::<QueryType>().unwrap(), q);
        }
    }
}
