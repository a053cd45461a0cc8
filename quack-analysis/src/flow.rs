use std::collections::{BTreeSet, HashSet};

use crate::ast::{NodeId, NodeKind, ParameterSyntax};
use crate::program::Program;

/// Binding sites of one name that may still be live, or `None` past a `return`.
type Live = Option<BTreeSet<NodeId>>;

/// Binding sites of `name` inside `scope` that can reach the read `read`.
///
/// `scope` is a function or a module. Works on the structured statements
/// directly: both `if` branches are merged, loop bodies are run twice to
/// account for the back edge and `return` ends a path. Returns `None` when
/// `read` is not a plain read in the scope's own body (a nested definition,
/// for instance).
pub fn reaching_definitions(
    program: &Program,
    scope: NodeId,
    read: NodeId,
    name: &str,
) -> Option<Vec<NodeId>> {
    let (body, entry) = scope_entry(program, scope, name)?;
    let path: HashSet<NodeId> = std::iter::once(read).chain(program.ancestors(read)).collect();
    if !path.contains(&scope) {
        return None;
    }

    let mut walker = FlowWalker {
        program,
        name,
        path: &path,
        searching: true,
        found: None,
    };
    walker.block(body, Some(entry));
    walker.found.map(|found| found.into_iter().collect())
}

/// Binding sites of `name` still live once the whole module `scope` has run.
///
/// This is what a function defined in the module sees when it is called
/// later on.
pub fn final_definitions(program: &Program, scope: NodeId, name: &str) -> Option<Vec<NodeId>> {
    program.module_node(scope)?;
    let (body, entry) = scope_entry(program, scope, name)?;
    let path = HashSet::new();
    let mut walker = FlowWalker {
        program,
        name,
        path: &path,
        searching: false,
        found: None,
    };
    let live = walker.block(body, Some(entry))?;
    Some(live.into_iter().collect())
}

/// Statements of a function or module scope and the bindings live on entry.
fn scope_entry<'p>(
    program: &'p Program,
    scope: NodeId,
    name: &str,
) -> Option<(&'p [NodeId], BTreeSet<NodeId>)> {
    let mut entry = BTreeSet::new();
    if let Some(definition) = program.function_definition(scope) {
        for parameter in &definition.parameters {
            parameter_bindings(program, *parameter, name, &mut entry);
        }
        return Some((definition.body.as_slice(), entry));
    }
    let module = program.module_node(scope)?;
    Some((module.statements.as_slice(), entry))
}

fn parameter_bindings(program: &Program, parameter: NodeId, name: &str, out: &mut BTreeSet<NodeId>) {
    let Some(node) = program.parameter(parameter) else {
        return;
    };
    if node.syntax == ParameterSyntax::Tuple {
        for element in &node.elements {
            parameter_bindings(program, *element, name, out);
        }
    } else if node.name.as_deref() == Some(name) {
        out.insert(parameter);
    }
}

struct FlowWalker<'a> {
    program: &'a Program,
    name: &'a str,
    path: &'a HashSet<NodeId>,
    searching: bool,
    found: Option<BTreeSet<NodeId>>,
}

impl FlowWalker<'_> {
    fn done(&self) -> bool {
        self.found.is_some()
    }

    fn record(&mut self, live: &Live) {
        if self.searching && self.found.is_none() {
            self.found = Some(live.clone().unwrap_or_default());
        }
    }

    fn contains(&self, node: NodeId) -> bool {
        self.searching && self.path.contains(&node)
    }

    fn block(&mut self, statements: &[NodeId], mut live: Live) -> Live {
        for statement in statements {
            if self.done() {
                break;
            }
            live = self.statement(*statement, live);
        }
        live
    }

    /// Runs `body` without looking for the read, to compute loop back edges.
    fn quiet_block(&mut self, statements: &[NodeId], live: Live) -> Live {
        let searching = std::mem::replace(&mut self.searching, false);
        let out = self.block(statements, live);
        self.searching = searching;
        out
    }

    fn statement(&mut self, statement: NodeId, live: Live) -> Live {
        let program = self.program;
        let Some(kind) = program.kind(statement) else {
            return live;
        };
        let inside = self.contains(statement);

        match kind {
            NodeKind::Assignment(assignment) => {
                if inside {
                    self.record(&live);
                    return live;
                }
                self.write_target(assignment.target, live)
            }
            NodeKind::If(if_statement) => {
                if inside {
                    if self.path.contains(&if_statement.condition) {
                        self.record(&live);
                    } else if if_statement.then_body.iter().any(|s| self.path.contains(s)) {
                        self.block(&if_statement.then_body, live.clone());
                    } else {
                        self.block(&if_statement.else_body, live.clone());
                    }
                    return live;
                }
                let then_live = self.block(&if_statement.then_body, live.clone());
                let else_live = self.block(&if_statement.else_body, live);
                merge(then_live, else_live)
            }
            NodeKind::While(while_statement) => {
                let entry = self.loop_entry(&while_statement.body, live, None);
                if inside {
                    if self.path.contains(&while_statement.condition) {
                        self.record(&entry);
                    } else {
                        self.block(&while_statement.body, entry.clone());
                    }
                }
                entry
            }
            NodeKind::For(for_statement) => {
                if inside && self.path.contains(&for_statement.iterable) {
                    self.record(&live);
                    return live;
                }
                let entry = self.loop_entry(&for_statement.body, live, Some(for_statement.target));
                if inside {
                    let body_live = self.write_target(for_statement.target, entry.clone());
                    self.block(&for_statement.body, body_live);
                }
                entry
            }
            NodeKind::Return(_) => {
                if inside {
                    self.record(&live);
                }
                None
            }
            NodeKind::Function(function) => {
                if inside {
                    // decorators and defaults run here; the body is another scope
                    if self.read_outside_body(&function.body) {
                        self.record(&live);
                    }
                    return live;
                }
                self.bind_if_named(&function.name, statement, live)
            }
            NodeKind::Class(class) => {
                if inside {
                    if self.read_outside_body(&class.body) {
                        self.record(&live);
                    }
                    return live;
                }
                self.bind_if_named(&class.name, statement, live)
            }
            NodeKind::Import(import) => self.bind_if_named(&import.name, statement, live),
            NodeKind::ExpressionStatement(_) => {
                if inside {
                    self.record(&live);
                }
                live
            }
            _ => live,
        }
    }

    /// True when the read sits in a definition header rather than its body.
    fn read_outside_body(&self, body: &[NodeId]) -> bool {
        !body.iter().any(|statement| self.path.contains(statement))
    }

    fn loop_entry(&mut self, body: &[NodeId], live: Live, target: Option<NodeId>) -> Live {
        let mut entry = live.clone();
        for _ in 0..2 {
            let body_live = match target {
                Some(target) => self.write_target(target, entry.clone()),
                None => entry.clone(),
            };
            let out = self.quiet_block(body, body_live);
            entry = merge(live.clone(), out);
        }
        entry
    }

    fn bind_if_named(&self, bound: &str, statement: NodeId, live: Live) -> Live {
        if bound == self.name {
            live.map(|_| BTreeSet::from([statement]))
        } else {
            live
        }
    }

    fn write_target(&self, target: NodeId, live: Live) -> Live {
        let mut written = BTreeSet::new();
        self.collect_written(target, &mut written);
        if written.is_empty() {
            live
        } else {
            live.map(|_| written)
        }
    }

    fn collect_written(&self, target: NodeId, out: &mut BTreeSet<NodeId>) {
        match self.program.kind(target) {
            Some(NodeKind::Name(name)) if name == self.name => {
                out.insert(target);
            }
            Some(NodeKind::Tuple(elements) | NodeKind::List(elements)) => {
                for element in elements {
                    self.collect_written(*element, out);
                }
            }
            _ => {}
        }
    }
}

fn merge(left: Live, right: Live) -> Live {
    match (left, right) {
        (None, other) | (other, None) => other,
        (Some(mut left), Some(right)) => {
            left.extend(right);
            Some(left)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(text: &str) -> (Program, NodeId) {
        let mut program = Program::new();
        let module = program.add_module("m", text).expect("parse");
        let root = program.module(module).expect("module").root;
        let function = program.module_node(root).expect("root").statements[0];
        (program, function)
    }

    /// The `x` read by the last `return x` in the function.
    fn last_read(program: &Program, function: NodeId) -> NodeId {
        program
            .descendants(function)
            .into_iter()
            .filter(|node| {
                matches!(program.kind(*node), Some(NodeKind::Name(name)) if name == "x")
                    && matches!(
                        program.parent(*node).and_then(|p| program.kind(p)),
                        Some(NodeKind::Return(_))
                    )
            })
            .last()
            .expect("read")
    }

    fn written_values(program: &Program, found: &[NodeId]) -> Vec<String> {
        found
            .iter()
            .filter_map(|target| match program.parent(*target).and_then(|p| program.kind(p)) {
                Some(NodeKind::Assignment(assignment)) => match program.kind(assignment.value) {
                    Some(NodeKind::Literal(literal)) => Some(format!("{literal:?}")),
                    _ => None,
                },
                _ => None,
            })
            .collect()
    }

    #[test]
    fn later_write_kills_earlier_one() {
        let (program, function) = setup("def f()\n  x = 1\n  x = 2\n  return x\nend\n");
        let read = last_read(&program, function);
        let found = reaching_definitions(&program, function, read, "x").expect("flow");
        assert_eq!(written_values(&program, &found), vec!["Integer(2)"]);
    }

    #[test]
    fn branches_merge() {
        let text = "def f(c)\n  if c\n    x = 1\n  else\n    x = 2\n  end\n  return x\nend\n";
        let (program, function) = setup(text);
        let read = last_read(&program, function);
        let found = reaching_definitions(&program, function, read, "x").expect("flow");
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn one_sided_branch_keeps_the_parameter() {
        let text = "def f(x)\n  if x\n    x = 1\n  end\n  return x\nend\n";
        let (program, function) = setup(text);
        let read = last_read(&program, function);
        let found = reaching_definitions(&program, function, read, "x").expect("flow");
        assert_eq!(found.len(), 2);
        assert!(found.iter().any(|node| program.parameter(*node).is_some()));
    }

    #[test]
    fn loop_back_edge_reaches_the_top_of_the_body() {
        let text = "def f(xs)\n  x = 0\n  for y in xs\n    return x\n    x = 1\n  end\nend\n";
        let (program, function) = setup(text);
        let read = last_read(&program, function);
        let found = reaching_definitions(&program, function, read, "x").expect("flow");
        // only `x = 0` reaches: the return ends the path before `x = 1`
        assert_eq!(written_values(&program, &found), vec!["Integer(0)"]);
    }

    #[test]
    fn while_loop_merges_both_writes() {
        let text = "def f(c)\n  x = 0\n  while c\n    x = 1\n  end\n  return x\nend\n";
        let (program, function) = setup(text);
        let read = last_read(&program, function);
        let found = reaching_definitions(&program, function, read, "x").expect("flow");
        assert_eq!(found.len(), 2);
    }

    fn module_root(text: &str) -> (Program, NodeId) {
        let mut program = Program::new();
        let module = program.add_module("m", text).expect("parse");
        let root = program.module(module).expect("module").root;
        (program, root)
    }

    #[test]
    fn module_bodies_follow_statement_order() {
        let (program, root) = module_root("x = 1\nx = 2\nprint(x)\nx = 3\n");
        let read = program
            .descendants(root)
            .into_iter()
            .find(|node| {
                matches!(program.kind(*node), Some(NodeKind::Name(name)) if name == "x")
                    && matches!(
                        program.parent(*node).and_then(|p| program.kind(p)),
                        Some(NodeKind::Call(_))
                    )
            })
            .expect("read");
        let found = reaching_definitions(&program, root, read, "x").expect("flow");
        assert_eq!(written_values(&program, &found), vec!["Integer(2)"]);

        let last = final_definitions(&program, root, "x").expect("flow");
        assert_eq!(written_values(&program, &last), vec!["Integer(3)"]);
    }

    #[test]
    fn final_bindings_merge_branches() {
        let (program, root) =
            module_root("if c\n  def f()\n  end\nelse\n  def f(a)\n  end\nend\n");
        let found = final_definitions(&program, root, "f").expect("flow");
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn final_bindings_need_a_module() {
        let (program, function) = setup("def f()\n  x = 1\nend\n");
        assert!(final_definitions(&program, function, "x").is_none());
    }
}
