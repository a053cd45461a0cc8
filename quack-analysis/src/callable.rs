use crate::arguments::{Parameter, ParameterKind};
use crate::ast::NodeId;
use crate::types::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Modifier {
    #[default]
    None,
    ClassMethod,
    StaticMethod,
}

impl Modifier {
    /// Modifier named by a decorator or wrapping builtin (`classmethod`, `staticmethod`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "classmethod" => Some(Modifier::ClassMethod),
            "staticmethod" => Some(Modifier::StaticMethod),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Modifier::None => "none",
            Modifier::ClassMethod => "classmethod",
            Modifier::StaticMethod => "staticmethod",
        }
    }
}

/// A function definition viewed as something that can be called.
#[derive(Debug, Clone, PartialEq)]
pub struct Callable {
    pub function: NodeId,
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub modifier: Modifier,
    pub declaring_class: Option<NodeId>,
    pub declared_return_type: Option<Type>,
    pub is_property: bool,
}

impl Callable {
    pub fn is_initializer(&self) -> bool {
        self.declaring_class.is_some() && self.name == "__init__"
    }

    pub fn is_allocator(&self) -> bool {
        self.declaring_class.is_some() && self.name == "__new__"
    }

    pub fn first_parameter_is_variadic(&self) -> bool {
        self.parameters.first().map_or(false, Parameter::is_variadic)
    }

    /// Splits off up to `offset` leading parameters supplied implicitly.
    ///
    /// Stops early at a variadic parameter, which keeps absorbing the
    /// explicit arguments as well.
    pub fn split_implicit(&self, offset: usize) -> (Vec<Parameter>, Vec<Parameter>) {
        let mut implicit = Vec::new();
        let mut rest = self.parameters.iter();
        let mut explicit = Vec::new();
        for parameter in rest.by_ref() {
            if implicit.len() == offset
                || matches!(
                    parameter.kind,
                    ParameterKind::VariadicPositional | ParameterKind::VariadicKeyword
                )
            {
                explicit.push(parameter.clone());
                break;
            }
            implicit.push(parameter.clone());
        }
        explicit.extend(rest.cloned());
        (implicit, explicit)
    }
}
