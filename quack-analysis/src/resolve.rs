use std::collections::HashSet;

use tracing::trace;

use crate::ast::{NodeId, NodeKind};
use crate::program::Program;
use crate::scope::Declaration;

/// A declaration offered for a reference, with how it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub declaration: Declaration,
    /// Found by a heuristic rather than by an explicit binding.
    pub implicit: bool,
}

impl Candidate {
    pub fn explicit(declaration: Declaration) -> Self {
        Self {
            declaration,
            implicit: false,
        }
    }

    pub fn implicit(declaration: Declaration) -> Self {
        Self {
            declaration,
            implicit: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveResult {
    pub element: Option<Declaration>,
    /// Qualifier expressions met along the alias chain, outermost first.
    pub qualifiers: Vec<NodeId>,
    pub implicit: bool,
    /// Other non-aliasing candidates from the pass that produced `element`.
    pub alternatives: Vec<Declaration>,
}

impl ResolveResult {
    pub fn is_empty(&self) -> bool {
        self.element.is_none()
    }
}

/// Chases `start` through plain alias assignments (`a = b`, `m = obj.method`)
/// until it reaches a declaration that is not itself an alias.
///
/// `lookup` yields the candidates for a name or attribute expression. Every
/// followed alias value goes into a visited set, so cycles end the chase
/// with an empty result.
pub fn chase_reference<F>(program: &Program, start: NodeId, mut lookup: F) -> ResolveResult
where
    F: FnMut(NodeId) -> Vec<Candidate>,
{
    let mut visited = HashSet::from([start]);
    let mut qualifiers = Vec::new();
    let mut implicit = false;
    let mut seeker = start;
    push_qualifier(program, seeker, &mut qualifiers);

    loop {
        let candidates = lookup(seeker);
        trace!(seeker = seeker.0, candidates = candidates.len(), "chasing reference");

        let mut terminal: Option<Candidate> = None;
        let mut alternatives = Vec::new();
        let mut next = None;

        for candidate in candidates {
            match alias_value(program, &candidate.declaration) {
                Some(value) => {
                    if next.is_none() && !visited.contains(&value) {
                        next = Some((value, candidate.implicit));
                    }
                }
                None => match terminal {
                    None => terminal = Some(candidate),
                    Some(_) => alternatives.push(candidate.declaration),
                },
            }
        }

        if let Some(found) = terminal {
            return ResolveResult {
                element: Some(found.declaration),
                qualifiers,
                implicit: implicit || found.implicit,
                alternatives,
            };
        }

        let Some((value, via_heuristic)) = next else {
            return ResolveResult::default();
        };
        visited.insert(value);
        implicit |= via_heuristic;
        push_qualifier(program, value, &mut qualifiers);
        seeker = value;
    }
}

/// Right-hand side of an unannotated `x = <name or attribute>` binding.
pub fn alias_value(program: &Program, declaration: &Declaration) -> Option<NodeId> {
    let Declaration::Assignment { statement, .. } = declaration else {
        return None;
    };
    let Some(NodeKind::Assignment(assignment)) = program.kind(*statement) else {
        return None;
    };
    if assignment.annotation.is_some() {
        return None;
    }
    program
        .kind(assignment.value)
        .filter(|kind| kind.is_reference())
        .map(|_| assignment.value)
}

fn push_qualifier(program: &Program, seeker: NodeId, qualifiers: &mut Vec<NodeId>) {
    if let Some(NodeKind::Attribute(attribute)) = program.kind(seeker) {
        qualifiers.push(attribute.object);
    }
}
