use std::collections::HashMap;

use indexmap::IndexMap;

use crate::ast::{ModuleId, NodeId, NodeKind, ParameterSyntax};
use crate::program::Program;

/// One binding of a name inside a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Declaration {
    /// `name = value`, `name: Ann = value` or `self.name = value`.
    Assignment { target: NodeId, statement: NodeId },
    /// `a, (b, c) = value`; `path` indexes into the value from the outside in.
    Unpacked {
        target: NodeId,
        statement: NodeId,
        path: Vec<usize>,
    },
    ForTarget {
        target: NodeId,
        statement: NodeId,
        path: Vec<usize>,
    },
    Function(NodeId),
    Class(NodeId),
    Parameter(NodeId),
    Import {
        statement: NodeId,
        module: Option<ModuleId>,
    },
}

impl Declaration {
    /// Node that identifies the binding site.
    pub fn node(&self) -> NodeId {
        match self {
            Declaration::Assignment { target, .. }
            | Declaration::Unpacked { target, .. }
            | Declaration::ForTarget { target, .. } => *target,
            Declaration::Function(node) | Declaration::Class(node) | Declaration::Parameter(node) => {
                *node
            }
            Declaration::Import { statement, .. } => *statement,
        }
    }
}

/// Name lookup the evaluator relies on.
pub trait SymbolIndex {
    /// Bindings of `name` made directly in `scope`, in source order.
    fn declarations_in(&self, program: &Program, scope: NodeId, name: &str) -> Vec<Declaration>;

    /// `self.name = ...` assignments made in the methods of `class`.
    fn instance_attributes(&self, program: &Program, class: NodeId, name: &str)
        -> Vec<Declaration>;
}

type ScopeTable = IndexMap<String, Vec<Declaration>>;

/// Precomputed tables for every scope in a program.
#[derive(Debug, Default)]
pub struct ScopeIndex {
    scopes: HashMap<NodeId, ScopeTable>,
    instance_attributes: HashMap<NodeId, ScopeTable>,
}

impl ScopeIndex {
    pub fn build(program: &Program) -> Self {
        let mut index = Self::default();
        for module in program.modules() {
            index.add_scope(program, module.root);
            for node in program.descendants(module.root) {
                match program.kind(node) {
                    Some(NodeKind::Function(_)) => index.add_scope(program, node),
                    Some(NodeKind::Class(_)) => {
                        index.add_scope(program, node);
                        index
                            .instance_attributes
                            .insert(node, collect_instance_attributes(program, node));
                    }
                    _ => {}
                }
            }
        }
        index
    }

    fn add_scope(&mut self, program: &Program, scope: NodeId) {
        self.scopes.insert(scope, collect_scope(program, scope));
    }

    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }
}

impl SymbolIndex for ScopeIndex {
    fn declarations_in(&self, _program: &Program, scope: NodeId, name: &str) -> Vec<Declaration> {
        self.scopes
            .get(&scope)
            .and_then(|table| table.get(name))
            .cloned()
            .unwrap_or_default()
    }

    fn instance_attributes(
        &self,
        _program: &Program,
        class: NodeId,
        name: &str,
    ) -> Vec<Declaration> {
        self.instance_attributes
            .get(&class)
            .and_then(|table| table.get(name))
            .cloned()
            .unwrap_or_default()
    }
}

/// Answers every query by walking the tree again.
#[derive(Debug, Default, Clone, Copy)]
pub struct TreeScopes;

impl SymbolIndex for TreeScopes {
    fn declarations_in(&self, program: &Program, scope: NodeId, name: &str) -> Vec<Declaration> {
        collect_scope(program, scope)
            .swap_remove(name)
            .unwrap_or_default()
    }

    fn instance_attributes(
        &self,
        program: &Program,
        class: NodeId,
        name: &str,
    ) -> Vec<Declaration> {
        collect_instance_attributes(program, class)
            .swap_remove(name)
            .unwrap_or_default()
    }
}

/// Looks `name` up from the position of `at`: enclosing scopes from the
/// inside out, then the builtins module.
///
/// Class bodies are only visible to code directly inside them, not to
/// methods nested in them.
pub fn lookup(
    program: &Program,
    index: &dyn SymbolIndex,
    at: NodeId,
    name: &str,
) -> Vec<Declaration> {
    let mut scope = program.scope_of(at).or_else(|| {
        // `at` may itself be a module root
        program.module_node(at).map(|_| at)
    });
    let mut first = true;

    while let Some(current) = scope {
        let is_class = matches!(program.kind(current), Some(NodeKind::Class(_)));
        if first || !is_class {
            let found = index.declarations_in(program, current, name);
            if !found.is_empty() {
                return found;
            }
        }
        first = false;
        scope = program.scope_of(current);
    }

    let Some(builtins) = program
        .builtins_module()
        .and_then(|module| program.module(module))
    else {
        return Vec::new();
    };
    if program.module_of(at) == Some(builtins.id) {
        // already searched the builtins root on the way out
        return Vec::new();
    }
    index.declarations_in(program, builtins.root, name)
}

fn collect_scope(program: &Program, scope: NodeId) -> ScopeTable {
    let mut table = ScopeTable::new();

    if let Some(definition) = program.function_definition(scope) {
        for parameter in &definition.parameters {
            collect_parameter(program, *parameter, &mut table);
        }
    }

    collect_block(program, program.scope_body(scope), &mut table);
    table
}

fn collect_parameter(program: &Program, parameter: NodeId, table: &mut ScopeTable) {
    let Some(node) = program.parameter(parameter) else {
        return;
    };
    match node.syntax {
        ParameterSyntax::Tuple => {
            for element in &node.elements {
                collect_parameter(program, *element, table);
            }
        }
        ParameterSyntax::KeywordOnlyMarker => {}
        _ => {
            if let Some(name) = &node.name {
                push(table, name, Declaration::Parameter(parameter));
            }
        }
    }
}

fn collect_block(program: &Program, statements: &[NodeId], table: &mut ScopeTable) {
    for statement in statements {
        let Some(kind) = program.kind(*statement) else {
            continue;
        };
        match kind {
            NodeKind::Assignment(assignment) => {
                collect_target(program, assignment.target, *statement, &mut Vec::new(), false, table);
            }
            NodeKind::For(for_statement) => {
                collect_target(program, for_statement.target, *statement, &mut Vec::new(), true, table);
                collect_block(program, &for_statement.body, table);
            }
            NodeKind::If(if_statement) => {
                collect_block(program, &if_statement.then_body, table);
                collect_block(program, &if_statement.else_body, table);
            }
            NodeKind::While(while_statement) => {
                collect_block(program, &while_statement.body, table);
            }
            NodeKind::Function(function) => {
                push(table, &function.name, Declaration::Function(*statement));
            }
            NodeKind::Class(class) => {
                push(table, &class.name, Declaration::Class(*statement));
            }
            NodeKind::Import(import) => {
                let module = program.module_by_name(&import.name).map(|info| info.id);
                push(
                    table,
                    &import.name,
                    Declaration::Import {
                        statement: *statement,
                        module,
                    },
                );
            }
            _ => {}
        }
    }
}

fn collect_target(
    program: &Program,
    target: NodeId,
    statement: NodeId,
    path: &mut Vec<usize>,
    loop_target: bool,
    table: &mut ScopeTable,
) {
    match program.kind(target) {
        Some(NodeKind::Name(name)) => {
            let declaration = match (loop_target, path.is_empty()) {
                (true, _) => Declaration::ForTarget {
                    target,
                    statement,
                    path: path.clone(),
                },
                (false, true) => Declaration::Assignment { target, statement },
                (false, false) => Declaration::Unpacked {
                    target,
                    statement,
                    path: path.clone(),
                },
            };
            push(table, name, declaration);
        }
        Some(NodeKind::Tuple(elements) | NodeKind::List(elements)) => {
            for (index, element) in elements.iter().enumerate() {
                path.push(index);
                collect_target(program, *element, statement, path, loop_target, table);
                path.pop();
            }
        }
        _ => {}
    }
}

fn collect_instance_attributes(program: &Program, class: NodeId) -> ScopeTable {
    let mut table = ScopeTable::new();
    let Some(definition) = program.class_definition(class) else {
        return table;
    };

    for member in &definition.body {
        let Some(method) = program.function_definition(*member) else {
            continue;
        };
        let Some(receiver) = method
            .parameters
            .first()
            .and_then(|parameter| program.parameter(*parameter))
            .and_then(|parameter| parameter.name.as_deref())
        else {
            continue;
        };

        for node in program.descendants(*member) {
            let Some(NodeKind::Assignment(assignment)) = program.kind(node) else {
                continue;
            };
            collect_receiver_target(program, assignment.target, node, receiver, &mut Vec::new(), &mut table);
        }
    }
    table
}

fn collect_receiver_target(
    program: &Program,
    target: NodeId,
    statement: NodeId,
    receiver: &str,
    path: &mut Vec<usize>,
    table: &mut ScopeTable,
) {
    match program.kind(target) {
        Some(NodeKind::Attribute(attribute)) => {
            if !matches!(program.kind(attribute.object), Some(NodeKind::Name(name)) if name == receiver)
            {
                return;
            }
            let declaration = if path.is_empty() {
                Declaration::Assignment { target, statement }
            } else {
                Declaration::Unpacked {
                    target,
                    statement,
                    path: path.clone(),
                }
            };
            push(table, &attribute.name, declaration);
        }
        Some(NodeKind::Tuple(elements) | NodeKind::List(elements)) => {
            for (index, element) in elements.iter().enumerate() {
                path.push(index);
                collect_receiver_target(program, *element, statement, receiver, path, table);
                path.pop();
            }
        }
        _ => {}
    }
}

fn push(table: &mut ScopeTable, name: &str, declaration: Declaration) {
    table.entry(name.to_string()).or_default().push(declaration);
}
