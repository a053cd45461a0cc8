use std::collections::BTreeSet;

use crate::ast::{NodeId, NodeKind};
use crate::context::TypeEvalContext;
use crate::types::Type;

/// Pluggable source of types, asked before the built-in rules.
///
/// Returning `None` abstains and lets the next provider (or the evaluator
/// itself) answer.
pub trait TypeProvider: Send {
    fn name(&self) -> &'static str;

    fn expression_type(&self, _expr: NodeId, _context: &TypeEvalContext<'_>) -> Option<Type> {
        None
    }

    /// Type of a parameter that has neither an annotation nor a default.
    fn parameter_type(&self, _parameter: NodeId, _context: &TypeEvalContext<'_>) -> Option<Type> {
        None
    }
}

/// Guesses a parameter's type from the attributes read off it in the
/// function body, so `def close(f) f.flush() end` gives `f` the weak type
/// `{flush}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParameterUsageProvider;

impl TypeProvider for ParameterUsageProvider {
    fn name(&self) -> &'static str {
        "parameter-usage"
    }

    fn parameter_type(&self, parameter: NodeId, context: &TypeEvalContext<'_>) -> Option<Type> {
        if !context.full_tree() {
            return None;
        }
        let program = context.program();
        let name = program.parameter(parameter)?.name.as_deref()?;
        let function = program
            .ancestors(parameter)
            .find(|node| program.function_definition(*node).is_some())?;

        let mut attributes = BTreeSet::new();
        for statement in program.scope_body(function) {
            for node in std::iter::once(*statement).chain(program.descendants(*statement)) {
                let Some(NodeKind::Attribute(attribute)) = program.kind(node) else {
                    continue;
                };
                let on_parameter = matches!(
                    program.kind(attribute.object),
                    Some(NodeKind::Name(object)) if object == name
                );
                // a nested function may rebind the name
                if on_parameter && program.enclosing_function(attribute.object) == Some(function) {
                    attributes.insert(attribute.name.clone());
                }
            }
        }

        if attributes.is_empty() {
            None
        } else {
            Some(Type::Structural(attributes).weak())
        }
    }
}
