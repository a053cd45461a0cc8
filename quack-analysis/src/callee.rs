use tracing::debug;

use crate::arguments::{map_arguments_to_parameters, Argument, ArgumentMapping};
use crate::ast::{NodeId, NodeKind};
use crate::callable::{Callable, Modifier};
use crate::context::TypeEvalContext;
use crate::scope::Declaration;
use crate::types::{ClassHierarchy, Type};

/// The callable behind a call site and how it is being invoked.
#[derive(Debug, Clone, PartialEq)]
pub struct CalleeResolution {
    pub callable: Callable,
    /// The callable's own modifier, or one taken from a
    /// `name = classmethod(name)` rebinding.
    pub modifier: Modifier,
    /// Leading parameters the calling convention fills in.
    pub implicit_offset: usize,
    /// The callee was found through a heuristic rather than a binding.
    pub implicit: bool,
    pub is_constructor_call: bool,
    /// Class being instantiated, for constructor calls.
    pub constructed: Option<NodeId>,
}

/// How a callable was reached from its call site.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Binding {
    pub by_instance: bool,
    pub by_class: bool,
    pub constructor: bool,
}

/// Number of leading parameters of `callable` supplied without an argument.
pub fn implicit_offset(callable: &Callable, binding: Binding, modifier: Modifier) -> usize {
    let mut receiver_added = !callable.parameters.is_empty()
        && !callable.first_parameter_is_variadic()
        && (binding.by_instance || binding.constructor);
    let mut offset: isize = isize::from(receiver_added);

    if callable.is_allocator() {
        offset = isize::from(binding.constructor);
        receiver_added = false;
    } else if callable.is_initializer()
        && !binding.by_instance
        && !binding.by_class
        && !binding.constructor
    {
        offset = 1;
        receiver_added = false;
    }

    // a static `__init__` reached through a constructor gets no instance either
    match modifier {
        Modifier::StaticMethod if receiver_added => offset -= 1,
        Modifier::ClassMethod if !binding.by_instance => offset += 1,
        _ => {}
    }
    offset.max(0) as usize
}

/// A callable found for a callee, before binding is worked out.
struct Target {
    function: NodeId,
    constructed: Option<NodeId>,
    modifier: Option<Modifier>,
    /// Reached through a value (a property, a returned function) rather than
    /// a member lookup, so the qualifier does not bind it.
    detached: bool,
}

impl Target {
    fn function(function: NodeId) -> Self {
        Self {
            function,
            constructed: None,
            modifier: None,
            detached: false,
        }
    }
}

impl TypeEvalContext<'_> {
    /// The callable a call expression invokes, or `None` when it cannot be
    /// determined without guessing.
    pub fn resolve_callee(&self, call: NodeId) -> Option<CalleeResolution> {
        let program = self.program();
        let Some(NodeKind::Call(expression)) = program.kind(call) else {
            return None;
        };
        let callee = expression.callee;

        let (target, qualifier, implicit) =
            if program.kind(callee).is_some_and(NodeKind::is_reference) {
                let result = self.resolve(callee);
                let qualifier = result.qualifiers.last().map(|node| self.type_of(*node));
                let element = result.element.as_ref()?;
                let target = self.declaration_target(element, qualifier.as_ref())?;

                for alternative in &result.alternatives {
                    let Some(other) = self.declaration_target(alternative, qualifier.as_ref())
                    else {
                        continue;
                    };
                    if other.function != target.function {
                        debug!(
                            callee = program.name_text(callee).unwrap_or_default(),
                            "ambiguous callee"
                        );
                        return None;
                    }
                }
                (target, qualifier, result.implicit)
            } else {
                let mut target = self.value_target(&self.type_of(callee))?;
                target.detached = true;
                (target, None, false)
            };

        let callable = self.callable(target.function)?;
        let binding = self.binding(&callable, &target, qualifier.as_ref(), implicit);
        let modifier = match callable.modifier {
            Modifier::None => target.modifier.unwrap_or_default(),
            own => own,
        };
        let implicit_offset = implicit_offset(&callable, binding, modifier);

        Some(CalleeResolution {
            callable,
            modifier,
            implicit_offset,
            implicit,
            is_constructor_call: binding.constructor,
            constructed: target.constructed,
        })
    }

    fn binding(
        &self,
        callable: &Callable,
        target: &Target,
        qualifier: Option<&Type>,
        implicit: bool,
    ) -> Binding {
        let constructor = target.constructed.is_some();
        let qualifier = if target.detached { None } else { qualifier };

        let (by_instance, by_class) = match qualifier.map(Type::unwrap_weak) {
            None => (implicit && callable.declaring_class.is_some(), false),
            Some(Type::Module(_)) => (false, false),
            Some(Type::Class {
                class,
                definition: true,
            }) => {
                let related = callable.declaring_class.is_some_and(|declaring| {
                    self.is_subclass(*class, declaring) || self.is_subclass(declaring, *class)
                });
                (false, related)
            }
            Some(_) => (true, false),
        };

        Binding {
            by_instance,
            by_class,
            constructor,
        }
    }

    /// Callable target of a resolved declaration.
    fn declaration_target(&self, declaration: &Declaration, qualifier: Option<&Type>) -> Option<Target> {
        let on_instance = qualifier.is_some_and(|qualifier| {
            !matches!(
                qualifier.unwrap_weak(),
                Type::Class {
                    definition: true,
                    ..
                } | Type::Module(_)
            )
        });

        match declaration {
            Declaration::Function(function) => {
                let is_property = self
                    .program()
                    .decorator_names(*function)
                    .contains(&"property");
                if is_property && on_instance {
                    // `obj.prop(...)` calls whatever the getter returns
                    let mut target = self.value_target(&self.return_type(*function))?;
                    target.detached = true;
                    return Some(target);
                }
                Some(Target::function(*function))
            }
            Declaration::Class(class) => self.constructor_target(*class),
            Declaration::Assignment { statement, .. } => match self.wrapper_call(*statement) {
                Some(("property", getter)) if on_instance => {
                    let getter = self.wrapped_function(getter)?;
                    let mut target = self.value_target(&self.return_type(getter))?;
                    target.detached = true;
                    Some(target)
                }
                Some((wrapper, wrapped)) => {
                    let function = self.wrapped_function(wrapped)?;
                    Some(Target {
                        modifier: Modifier::from_name(wrapper),
                        ..Target::function(function)
                    })
                }
                None => self.detached_value_target(declaration),
            },
            other => self.detached_value_target(other),
        }
    }

    fn detached_value_target(&self, declaration: &Declaration) -> Option<Target> {
        let mut target = self.value_target(&self.declaration_type(declaration))?;
        target.detached = true;
        Some(target)
    }

    /// Callable target of a callee value: a function, or a class to construct.
    fn value_target(&self, ty: &Type) -> Option<Target> {
        match ty.unwrap_weak() {
            Type::Function(function) => Some(Target::function(*function)),
            Type::Class {
                class,
                definition: true,
            } => self.constructor_target(*class),
            _ => None,
        }
    }

    /// `__init__` found through the bases, else `__new__`.
    fn constructor_target(&self, class: NodeId) -> Option<Target> {
        let function = ["__init__", "__new__"].iter().find_map(|name| {
            self.mro(class).into_iter().find_map(|candidate| {
                self.symbols()
                    .declarations_in(self.program(), candidate, name)
                    .into_iter()
                    .rev()
                    .find_map(|declaration| match declaration {
                        Declaration::Function(function) => Some(function),
                        _ => None,
                    })
            })
        })?;
        Some(Target {
            constructed: Some(class),
            ..Target::function(function)
        })
    }

    /// Call-site arguments of `call`, in source order.
    pub fn call_arguments(&self, call: NodeId) -> Vec<Argument> {
        let program = self.program();
        match program.kind(call) {
            Some(NodeKind::Call(expression)) => expression
                .arguments
                .iter()
                .map(|argument| Argument::from_node(program, *argument))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Maps the arguments of `call` onto its callee's parameters.
    ///
    /// Without a callee every argument is unmapped and there are no
    /// parameters.
    pub fn map_call_arguments(&self, call: NodeId) -> ArgumentMapping {
        let arguments = self.call_arguments(call);
        match self.resolve_callee(call) {
            Some(callee) => self.map_resolved_arguments(&callee, &arguments),
            None => ArgumentMapping::unresolved(&arguments),
        }
    }

    pub(crate) fn map_resolved_arguments(
        &self,
        callee: &CalleeResolution,
        arguments: &[Argument],
    ) -> ArgumentMapping {
        let program = self.program();
        let (implicit, explicit) = callee.callable.split_implicit(callee.implicit_offset);
        let mut mapping = map_arguments_to_parameters(
            arguments,
            &explicit,
            &|node| program.literal_elements(node),
            self.language().mapping_options(),
        );
        mapping.implicit_parameters = implicit;
        mapping
    }
}
