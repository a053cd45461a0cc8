use std::collections::{BTreeSet, HashMap};

use crate::ast::{ModuleId, NodeId};
use crate::program::Program;

/// A type variable introduced by `T = TypeVar("T")`, identified by that assignment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GenericVar {
    pub id: NodeId,
    pub name: String,
}

pub type Substitutions = HashMap<GenericVar, Type>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Type {
    /// No information.
    Unknown,
    None,
    /// An instance of `class`, or the class object itself when `definition` is set.
    Class { class: NodeId, definition: bool },
    /// Always flattened, with at least two members and no `Unknown`/`Weak` inside.
    Union(BTreeSet<Type>),
    /// `homogeneous` is set for tuples of unknown length (`*args`), with no `elements`.
    Tuple {
        elements: Vec<Type>,
        homogeneous: Option<Box<Type>>,
    },
    Collection { class: NodeId, elements: Vec<Type> },
    Function(NodeId),
    Module(ModuleId),
    Generic(GenericVar),
    /// Anything that has these attributes.
    Structural(BTreeSet<String>),
    /// A low-confidence guess.
    Weak(Box<Type>),
}

impl Type {
    pub fn instance(class: NodeId) -> Self {
        Type::Class {
            class,
            definition: false,
        }
    }

    pub fn definition(class: NodeId) -> Self {
        Type::Class {
            class,
            definition: true,
        }
    }

    pub fn tuple(elements: Vec<Type>) -> Self {
        Type::Tuple {
            elements,
            homogeneous: None,
        }
    }

    pub fn homogeneous_tuple(element: Type) -> Self {
        Type::Tuple {
            elements: Vec::new(),
            homogeneous: Some(Box::new(element)),
        }
    }

    /// Flattens nested unions and deduplicates.
    ///
    /// No members gives `Unknown` and one member gives that member. `Unknown`
    /// or weak members make the whole result weak.
    pub fn union<I>(types: I) -> Type
    where
        I: IntoIterator<Item = Type>,
    {
        let mut members = BTreeSet::new();
        let mut weak = false;
        for ty in types {
            collect_union_member(ty, &mut members, &mut weak);
        }

        let mut iter = members.into_iter();
        let combined = match (iter.next(), iter.next()) {
            (None, _) => Type::Unknown,
            (Some(only), None) => only,
            (Some(first), Some(second)) => {
                let mut set: BTreeSet<Type> = iter.collect();
                set.insert(first);
                set.insert(second);
                Type::Union(set)
            }
        };

        if weak {
            combined.weak()
        } else {
            combined
        }
    }

    pub fn weak(self) -> Type {
        match self {
            Type::Unknown => Type::Unknown,
            Type::Weak(_) => self,
            other => Type::Weak(Box::new(other)),
        }
    }

    pub fn unwrap_weak(&self) -> &Type {
        match self {
            Type::Weak(inner) => inner,
            other => other,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Type::Unknown)
    }

    pub fn is_weak(&self) -> bool {
        matches!(self, Type::Weak(_))
    }

    /// Members of a union, or the type itself.
    pub fn members(&self) -> Vec<&Type> {
        match self.unwrap_weak() {
            Type::Union(members) => members.iter().collect(),
            other => vec![other],
        }
    }

    pub fn has_generics(&self) -> bool {
        match self {
            Type::Generic(_) => true,
            Type::Union(members) => members.iter().any(Type::has_generics),
            Type::Tuple {
                elements,
                homogeneous,
            } => {
                elements.iter().any(Type::has_generics)
                    || homogeneous.as_deref().map_or(false, Type::has_generics)
            }
            Type::Collection { elements, .. } => elements.iter().any(Type::has_generics),
            Type::Weak(inner) => inner.has_generics(),
            Type::Unknown
            | Type::None
            | Type::Class { .. }
            | Type::Function(_)
            | Type::Module(_)
            | Type::Structural(_) => false,
        }
    }

    /// Rewrites bound generics; unbound ones are left in place.
    pub fn substitute(&self, substitutions: &Substitutions) -> Type {
        match self {
            Type::Generic(var) => substitutions
                .get(var)
                .cloned()
                .unwrap_or_else(|| self.clone()),
            Type::Union(members) => {
                Type::union(members.iter().map(|member| member.substitute(substitutions)))
            }
            Type::Tuple {
                elements,
                homogeneous,
            } => Type::Tuple {
                elements: elements
                    .iter()
                    .map(|element| element.substitute(substitutions))
                    .collect(),
                homogeneous: homogeneous
                    .as_deref()
                    .map(|element| Box::new(element.substitute(substitutions))),
            },
            Type::Collection { class, elements } => Type::Collection {
                class: *class,
                elements: elements
                    .iter()
                    .map(|element| element.substitute(substitutions))
                    .collect(),
            },
            Type::Weak(inner) => inner.substitute(substitutions).weak(),
            other => other.clone(),
        }
    }

    /// Replaces every remaining generic with `Unknown`.
    pub fn erase_generics(&self) -> Type {
        if !self.has_generics() {
            return self.clone();
        }
        match self {
            Type::Generic(_) => Type::Unknown,
            Type::Union(members) => Type::union(members.iter().map(Type::erase_generics)),
            Type::Tuple {
                elements,
                homogeneous,
            } => Type::Tuple {
                elements: elements.iter().map(Type::erase_generics).collect(),
                homogeneous: homogeneous
                    .as_deref()
                    .map(|element| Box::new(element.erase_generics())),
            },
            Type::Collection { class, elements } => Type::Collection {
                class: *class,
                elements: elements.iter().map(Type::erase_generics).collect(),
            },
            Type::Weak(inner) => inner.erase_generics().weak(),
            other => other.clone(),
        }
    }

    /// Human-readable rendering (`int`, `list[int | str]`, `type[Shape]`, `~T`).
    pub fn describe(&self, program: &Program) -> String {
        match self {
            Type::Unknown => "unknown".to_string(),
            Type::None => "None".to_string(),
            Type::Class {
                class,
                definition: false,
            } => class_name(program, *class),
            Type::Class {
                class,
                definition: true,
            } => format!("type[{}]", class_name(program, *class)),
            Type::Union(members) => {
                let mut parts: Vec<String> = members
                    .iter()
                    .map(|member| member.describe(program))
                    .collect();
                parts.sort();
                parts.join(" | ")
            }
            Type::Tuple {
                homogeneous: Some(element),
                ..
            } => format!("tuple[{}, ...]", element.describe(program)),
            Type::Tuple { elements, .. } if elements.is_empty() => "tuple[()]".to_string(),
            Type::Tuple { elements, .. } => format!("tuple[{}]", describe_list(program, elements)),
            Type::Collection { class, elements } if elements.is_empty() => {
                class_name(program, *class)
            }
            Type::Collection { class, elements } => format!(
                "{}[{}]",
                class_name(program, *class),
                describe_list(program, elements)
            ),
            Type::Function(function) => format!(
                "def {}",
                program.name_text(*function).unwrap_or("<function>")
            ),
            Type::Module(module) => format!(
                "module {}",
                program
                    .module(*module)
                    .map(|info| info.name.as_str())
                    .unwrap_or("<module>")
            ),
            Type::Generic(var) => format!("~{}", var.name),
            Type::Structural(attributes) => {
                let names: Vec<&str> = attributes.iter().map(String::as_str).collect();
                format!("{{{}}}", names.join(", "))
            }
            Type::Weak(inner) => format!("weak({})", inner.describe(program)),
        }
    }
}

fn collect_union_member(ty: Type, members: &mut BTreeSet<Type>, weak: &mut bool) {
    match ty {
        Type::Unknown => *weak = true,
        Type::Weak(inner) => {
            *weak = true;
            collect_union_member(*inner, members, weak);
        }
        Type::Union(inner) => members.extend(inner),
        other => {
            members.insert(other);
        }
    }
}

fn class_name(program: &Program, class: NodeId) -> String {
    program.name_text(class).unwrap_or("<class>").to_string()
}

fn describe_list(program: &Program, types: &[Type]) -> String {
    types
        .iter()
        .map(|ty| ty.describe(program))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Class relationships consulted while matching types.
pub trait ClassHierarchy {
    /// True when `class` is `base` or inherits from it.
    fn is_subclass(&self, class: NodeId, base: NodeId) -> bool;

    fn has_attribute(&self, ty: &Type, name: &str) -> bool;

    /// Builtin or declared class whose instances `ty` describes (`None` -> `NoneType`).
    fn class_of(&self, ty: &Type) -> Option<NodeId>;
}

/// Checks that a value of type `actual` can be passed where `expected` is
/// declared, binding generics in `expected` along the way.
///
/// Binding a generic twice widens it to the union of both bindings.
pub fn match_types(
    expected: &Type,
    actual: &Type,
    substitutions: &mut Substitutions,
    hierarchy: &dyn ClassHierarchy,
) -> bool {
    let expected = expected.unwrap_weak();
    let actual = actual.unwrap_weak();

    match (expected, actual) {
        (Type::Unknown, _) | (_, Type::Unknown) => true,
        (Type::Generic(var), _) => {
            let bound = match substitutions.remove(var) {
                Some(existing) => Type::union([existing, actual.clone()]),
                None => actual.clone(),
            };
            substitutions.insert(var.clone(), bound);
            true
        }
        (Type::Union(members), _) => {
            let mut matched = false;
            for member in members {
                matched |= match_types(member, actual, substitutions, hierarchy);
            }
            matched
        }
        (_, Type::Union(members)) => members
            .iter()
            .any(|member| match_types(expected, member, substitutions, hierarchy)),
        (_, Type::Generic(_)) | (_, Type::Structural(_)) => true,
        (Type::Structural(attributes), _) => attributes
            .iter()
            .all(|attribute| hierarchy.has_attribute(actual, attribute)),
        (
            Type::Tuple {
                homogeneous: Some(element),
                ..
            },
            Type::Tuple {
                elements,
                homogeneous,
            },
        ) => {
            let mut ok = true;
            if let Some(other) = homogeneous {
                ok &= match_types(element, other, substitutions, hierarchy);
            }
            for actual_element in elements {
                ok &= match_types(element, actual_element, substitutions, hierarchy);
            }
            ok
        }
        (
            Type::Tuple {
                elements: expected_elements,
                homogeneous: None,
            },
            Type::Tuple {
                elements: actual_elements,
                homogeneous: actual_homogeneous,
            },
        ) => match actual_homogeneous {
            Some(element) => {
                let mut ok = true;
                for expected_element in expected_elements {
                    ok &= match_types(expected_element, element, substitutions, hierarchy);
                }
                ok
            }
            None => {
                if expected_elements.len() != actual_elements.len() {
                    return false;
                }
                let mut ok = true;
                for (expected_element, actual_element) in
                    expected_elements.iter().zip(actual_elements)
                {
                    ok &= match_types(expected_element, actual_element, substitutions, hierarchy);
                }
                ok
            }
        },
        (
            Type::Collection {
                class: expected_class,
                elements: expected_elements,
            },
            Type::Collection {
                class: actual_class,
                elements: actual_elements,
            },
        ) => {
            if !hierarchy.is_subclass(*actual_class, *expected_class) {
                return false;
            }
            let mut ok = true;
            if expected_elements.len() == actual_elements.len() {
                for (expected_element, actual_element) in
                    expected_elements.iter().zip(actual_elements)
                {
                    ok &= match_types(expected_element, actual_element, substitutions, hierarchy);
                }
            }
            ok
        }
        (
            Type::Class {
                class: expected_class,
                definition: expected_definition,
            },
            Type::Class {
                class: actual_class,
                definition: actual_definition,
            },
        ) => {
            expected_definition == actual_definition
                && hierarchy.is_subclass(*actual_class, *expected_class)
        }
        (Type::None, Type::None) => true,
        (Type::Function(_), Type::Function(_)) => true,
        (
            Type::Class {
                class: expected_class,
                definition: false,
            },
            _,
        )
        | (
            Type::Collection {
                class: expected_class,
                ..
            },
            _,
        ) => hierarchy
            .class_of(actual)
            .map_or(false, |class| hierarchy.is_subclass(class, *expected_class)),
        (Type::Tuple { .. }, _) => match (hierarchy.class_of(expected), hierarchy.class_of(actual)) {
            (Some(expected_class), Some(actual_class)) => {
                hierarchy.is_subclass(actual_class, expected_class)
            }
            _ => false,
        },
        _ => expected == actual,
    }
}
