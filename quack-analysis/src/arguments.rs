use std::collections::VecDeque;

use indexmap::{IndexMap, IndexSet};

use crate::ast::{NodeId, NodeKind, ParameterSyntax};
use crate::program::Program;
use crate::types::Type;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArgumentKind {
    Positional,
    Keyword(String),
    /// `*expr`
    VariadicPositional,
    /// `**expr`
    VariadicKeyword,
}

/// A call-site argument. `expr` is the value expression, without any `name=`
/// or star prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Argument {
    pub expr: NodeId,
    pub kind: ArgumentKind,
}

impl Argument {
    pub fn positional(expr: NodeId) -> Self {
        Self {
            expr,
            kind: ArgumentKind::Positional,
        }
    }

    pub fn keyword(name: &str, expr: NodeId) -> Self {
        Self {
            expr,
            kind: ArgumentKind::Keyword(name.to_string()),
        }
    }

    pub fn from_node(program: &Program, node: NodeId) -> Self {
        match program.kind(node) {
            Some(NodeKind::Keyword(keyword)) => Self::keyword(&keyword.name, keyword.value),
            Some(NodeKind::Starred(inner)) => Self {
                expr: *inner,
                kind: ArgumentKind::VariadicPositional,
            },
            Some(NodeKind::DoubleStarred(inner)) => Self {
                expr: *inner,
                kind: ArgumentKind::VariadicKeyword,
            },
            _ => Self::positional(node),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParameterKind {
    Positional,
    /// `*args`
    VariadicPositional,
    /// `**kwargs`
    VariadicKeyword,
    /// Bare `*`.
    KeywordOnlyMarker,
    /// `(a, b)`
    Tuple(Vec<Parameter>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Parameter {
    pub node: NodeId,
    pub name: Option<String>,
    pub kind: ParameterKind,
    pub has_default: bool,
    pub declared_type: Option<Type>,
}

impl Parameter {
    /// Builds the parameter list entry for a parameter node; annotations are
    /// turned into types by `annotation`.
    pub fn from_node(
        program: &Program,
        node: NodeId,
        annotation: &mut dyn FnMut(NodeId) -> Type,
    ) -> Option<Self> {
        let parameter = program.parameter(node)?;
        let kind = match parameter.syntax {
            ParameterSyntax::Plain => ParameterKind::Positional,
            ParameterSyntax::Star => ParameterKind::VariadicPositional,
            ParameterSyntax::DoubleStar => ParameterKind::VariadicKeyword,
            ParameterSyntax::KeywordOnlyMarker => ParameterKind::KeywordOnlyMarker,
            ParameterSyntax::Tuple => ParameterKind::Tuple(
                parameter
                    .elements
                    .iter()
                    .filter_map(|element| Self::from_node(program, *element, annotation))
                    .collect(),
            ),
        };
        Some(Self {
            node,
            name: parameter.name.clone(),
            kind,
            has_default: parameter.default.is_some(),
            declared_type: parameter.annotation.map(|expr| annotation(expr)),
        })
    }

    pub fn is_variadic(&self) -> bool {
        matches!(
            self.kind,
            ParameterKind::VariadicPositional | ParameterKind::VariadicKeyword
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArgumentMapping {
    /// Several arguments may map to one `*args`/`**kwargs` parameter.
    pub mapped: IndexMap<Argument, Parameter>,
    pub unmapped_parameters: IndexSet<Parameter>,
    pub unmapped_arguments: IndexSet<Argument>,
    /// Parameters a variadic argument could plausibly supply.
    pub variadic_spillover_parameters: IndexSet<Parameter>,
    /// Parameters left to their default, including empty variadic containers.
    pub defaulted_parameters: IndexSet<Parameter>,
    /// Open `*`/`**` arguments taken as feeding the spillover parameters.
    pub absorbed_arguments: IndexSet<Argument>,
    /// Elements spliced out of a literal `*[...]` argument.
    pub variadic_components: IndexSet<Argument>,
    /// Parameters that took their value from a spliced `*[...]` element.
    /// They are also in `mapped`; this only tags where the value came from.
    pub parameters_mapped_to_variadic_components: IndexSet<Parameter>,
    /// Leading parameters filled in by the calling convention.
    pub implicit_parameters: Vec<Parameter>,
}

impl ArgumentMapping {
    /// Result for a call without a known callee: nothing can be matched.
    pub fn unresolved(arguments: &[Argument]) -> Self {
        Self {
            unmapped_arguments: arguments.iter().cloned().collect(),
            ..Self::default()
        }
    }

    /// Parameters mapped to at least one argument, in mapping order.
    pub fn mapped_parameters(&self) -> IndexSet<&Parameter> {
        self.mapped.values().collect()
    }

    pub fn parameter_for(&self, expr: NodeId) -> Option<&Parameter> {
        self.mapped
            .iter()
            .find(|(argument, _)| argument.expr == expr)
            .map(|(_, parameter)| parameter)
    }

    fn map(&mut self, argument: Argument, parameter: &Parameter) {
        if self.variadic_components.contains(&argument) {
            self.parameters_mapped_to_variadic_components
                .insert(parameter.clone());
        }
        self.mapped.insert(argument, parameter.clone());
    }

    fn absorb(&mut self, other: ArgumentMapping) {
        self.mapped.extend(other.mapped);
        self.unmapped_parameters.extend(other.unmapped_parameters);
        self.unmapped_arguments.extend(other.unmapped_arguments);
        self.variadic_spillover_parameters
            .extend(other.variadic_spillover_parameters);
        self.defaulted_parameters.extend(other.defaulted_parameters);
        self.absorbed_arguments.extend(other.absorbed_arguments);
        self.variadic_components.extend(other.variadic_components);
        self.parameters_mapped_to_variadic_components
            .extend(other.parameters_mapped_to_variadic_components);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MappingOptions {
    /// Splice `*[a, b]` into the positional arguments.
    pub splice_literal_star_args: bool,
}

impl Default for MappingOptions {
    fn default() -> Self {
        Self {
            splice_literal_star_args: true,
        }
    }
}

/// Matches call-site arguments against declared parameters (receiver and
/// other implicit parameters already removed).
///
/// `components` returns the syntactic elements of a literal tuple or list;
/// it drives both `*[...]` splicing and tuple parameters. Every argument
/// ends up mapped, unmapped or absorbed, and every parameter other than a
/// bare `*` ends up mapped, unmapped, spillover or defaulted.
pub fn map_arguments_to_parameters(
    arguments: &[Argument],
    parameters: &[Parameter],
    components: &dyn Fn(NodeId) -> Option<Vec<NodeId>>,
    options: MappingOptions,
) -> ArgumentMapping {
    let mut mapping = ArgumentMapping::default();
    let mut positional = VecDeque::new();
    let mut keywords: IndexMap<String, Argument> = IndexMap::new();
    let mut variadic_positional = Vec::new();
    let mut variadic_keyword = Vec::new();

    for argument in arguments {
        match &argument.kind {
            ArgumentKind::Positional => positional.push_back(argument.clone()),
            ArgumentKind::Keyword(name) => {
                if keywords.contains_key(name) {
                    mapping.unmapped_arguments.insert(argument.clone());
                } else {
                    keywords.insert(name.clone(), argument.clone());
                }
            }
            ArgumentKind::VariadicPositional => {
                let spliced = options
                    .splice_literal_star_args
                    .then(|| components(argument.expr))
                    .flatten();
                match spliced {
                    Some(elements) => {
                        for element in elements {
                            let component = Argument::positional(element);
                            mapping.variadic_components.insert(component.clone());
                            positional.push_back(component);
                        }
                        // the star argument is represented by its elements
                        mapping.absorbed_arguments.insert(argument.clone());
                    }
                    None => variadic_positional.push(argument.clone()),
                }
            }
            ArgumentKind::VariadicKeyword => variadic_keyword.push(argument.clone()),
        }
    }

    let mut keyword_only = false;
    let mut spilled = false;

    for parameter in parameters {
        match &parameter.kind {
            ParameterKind::VariadicPositional => {
                keyword_only = true;
                let mut consumed = false;
                // several opaque `*` sources cannot be told apart; the post-pass
                // reports them
                let star = if variadic_positional.len() == 1 {
                    variadic_positional.pop()
                } else {
                    None
                };
                for argument in positional.drain(..).chain(star) {
                    mapping.map(argument, parameter);
                    consumed = true;
                }
                if !consumed {
                    mapping.defaulted_parameters.insert(parameter.clone());
                }
            }
            ParameterKind::VariadicKeyword => {
                let mut consumed = false;
                for argument in keywords
                    .drain(..)
                    .map(|(_, argument)| argument)
                    .chain(variadic_keyword.drain(..))
                {
                    mapping.mapped.insert(argument, parameter.clone());
                    consumed = true;
                }
                if !consumed {
                    mapping.defaulted_parameters.insert(parameter.clone());
                }
            }
            ParameterKind::KeywordOnlyMarker => keyword_only = true,
            ParameterKind::Positional => {
                if !keyword_only {
                    if let Some(argument) = positional.pop_front() {
                        mapping.map(argument, parameter);
                        continue;
                    }
                }
                let by_name = parameter
                    .name
                    .as_ref()
                    .and_then(|name| keywords.shift_remove(name));
                if let Some(argument) = by_name {
                    mapping.mapped.insert(argument, parameter.clone());
                    continue;
                }
                let variadic_source = if keyword_only {
                    !variadic_keyword.is_empty()
                } else {
                    !variadic_positional.is_empty() || !variadic_keyword.is_empty()
                };
                spilled |= classify_missing(&mut mapping, parameter, variadic_source);
            }
            ParameterKind::Tuple(nested) => {
                let next = if keyword_only {
                    None
                } else {
                    positional.pop_front()
                };
                match next {
                    Some(argument) => match components(argument.expr) {
                        Some(elements) => {
                            let sub_arguments: Vec<Argument> =
                                elements.into_iter().map(Argument::positional).collect();
                            let sub = map_arguments_to_parameters(
                                &sub_arguments,
                                nested,
                                components,
                                options,
                            );
                            mapping.absorb(sub);
                            mapping.map(argument, parameter);
                        }
                        None => mapping.map(argument, parameter),
                    },
                    None => {
                        let variadic_source = !keyword_only && !variadic_positional.is_empty();
                        spilled |= classify_missing(&mut mapping, parameter, variadic_source);
                    }
                }
            }
        }
    }

    mapping.unmapped_arguments.extend(positional);
    mapping
        .unmapped_arguments
        .extend(keywords.into_values());
    for argument in variadic_positional.into_iter().chain(variadic_keyword) {
        if spilled {
            mapping.absorbed_arguments.insert(argument);
        } else {
            mapping.unmapped_arguments.insert(argument);
        }
    }
    mapping
}

/// Returns true when the parameter was classified as spillover.
fn classify_missing(
    mapping: &mut ArgumentMapping,
    parameter: &Parameter,
    variadic_source: bool,
) -> bool {
    if variadic_source {
        mapping
            .variadic_spillover_parameters
            .insert(parameter.clone());
        true
    } else if parameter.has_default {
        mapping.defaulted_parameters.insert(parameter.clone());
        false
    } else {
        mapping.unmapped_parameters.insert(parameter.clone());
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(id: u32, name: &str, kind: ParameterKind) -> Parameter {
        Parameter {
            node: NodeId(id),
            name: Some(name.to_string()),
            kind,
            has_default: false,
            declared_type: None,
        }
    }

    fn plain(id: u32, name: &str) -> Parameter {
        param(id, name, ParameterKind::Positional)
    }

    fn no_components(_: NodeId) -> Option<Vec<NodeId>> {
        None
    }

    fn map(arguments: &[Argument], parameters: &[Parameter]) -> ArgumentMapping {
        map_arguments_to_parameters(arguments, parameters, &no_components, MappingOptions::default())
    }

    #[test]
    fn fills_variadic_containers() {
        let parameters = [
            plain(1, "a"),
            plain(2, "b"),
            param(3, "args", ParameterKind::VariadicPositional),
            param(4, "kwargs", ParameterKind::VariadicKeyword),
        ];
        let arguments = [
            Argument::positional(NodeId(10)),
            Argument::positional(NodeId(11)),
            Argument::positional(NodeId(12)),
            Argument::keyword("x", NodeId(13)),
        ];
        let mapping = map(&arguments, &parameters);
        assert_eq!(mapping.mapped.get(&arguments[0]), Some(&parameters[0]));
        assert_eq!(mapping.mapped.get(&arguments[1]), Some(&parameters[1]));
        assert_eq!(mapping.mapped.get(&arguments[2]), Some(&parameters[2]));
        assert_eq!(mapping.mapped.get(&arguments[3]), Some(&parameters[3]));
        assert!(mapping.unmapped_arguments.is_empty());
        assert!(mapping.unmapped_parameters.is_empty());
    }

    #[test]
    fn missing_argument_is_an_unmapped_parameter() {
        let parameters = [plain(1, "a"), plain(2, "b")];
        let arguments = [Argument::positional(NodeId(10))];
        let mapping = map(&arguments, &parameters);
        assert_eq!(mapping.mapped.len(), 1);
        assert!(mapping.unmapped_parameters.contains(&parameters[1]));
        assert!(mapping.unmapped_arguments.is_empty());
    }

    #[test]
    fn keyword_only_parameters_ignore_positionals() {
        let parameters = [
            plain(1, "a"),
            param(2, "*", ParameterKind::KeywordOnlyMarker),
            plain(3, "b"),
        ];

        let by_keyword = [
            Argument::positional(NodeId(10)),
            Argument::keyword("b", NodeId(11)),
        ];
        let mapping = map(&by_keyword, &parameters);
        assert_eq!(mapping.mapped.get(&by_keyword[1]), Some(&parameters[2]));
        assert!(mapping.unmapped_parameters.is_empty());

        let by_position = [
            Argument::positional(NodeId(10)),
            Argument::positional(NodeId(11)),
        ];
        let mapping = map(&by_position, &parameters);
        assert_eq!(mapping.mapped.get(&by_position[0]), Some(&parameters[0]));
        assert!(mapping.unmapped_parameters.contains(&parameters[2]));
        assert!(mapping.unmapped_arguments.contains(&by_position[1]));
    }

    #[test]
    fn star_argument_spills_over_missing_parameters() {
        let parameters = [plain(1, "a"), plain(2, "b")];
        let arguments = [Argument {
            expr: NodeId(10),
            kind: ArgumentKind::VariadicPositional,
        }];
        let mapping = map(&arguments, &parameters);
        assert_eq!(mapping.variadic_spillover_parameters.len(), 2);
        assert!(mapping.unmapped_arguments.is_empty());
        assert!(mapping.absorbed_arguments.contains(&arguments[0]));
    }

    #[test]
    fn repeated_keyword_is_unmapped() {
        let parameters = [plain(1, "a")];
        let arguments = [
            Argument::keyword("a", NodeId(10)),
            Argument::keyword("a", NodeId(11)),
        ];
        let mapping = map(&arguments, &parameters);
        assert_eq!(mapping.mapped.get(&arguments[0]), Some(&parameters[0]));
        assert!(mapping.unmapped_arguments.contains(&arguments[1]));
    }

    #[test]
    fn literal_star_argument_is_spliced() {
        let parameters = [plain(1, "a"), plain(2, "b")];
        let arguments = [Argument {
            expr: NodeId(10),
            kind: ArgumentKind::VariadicPositional,
        }];
        let components = |expr: NodeId| (expr == NodeId(10)).then(|| vec![NodeId(20), NodeId(21)]);
        let mapping = map_arguments_to_parameters(
            &arguments,
            &parameters,
            &components,
            MappingOptions::default(),
        );
        assert_eq!(
            mapping.mapped.get(&Argument::positional(NodeId(21))),
            Some(&parameters[1])
        );
        assert_eq!(mapping.variadic_components.len(), 2);

        let opaque = map_arguments_to_parameters(
            &arguments,
            &parameters,
            &components,
            MappingOptions {
                splice_literal_star_args: false,
            },
        );
        assert_eq!(opaque.variadic_spillover_parameters.len(), 2);
        assert!(opaque.variadic_components.is_empty());
    }

    #[test]
    fn tuple_parameter_destructures_its_argument() {
        let parameters = [param(
            1,
            "pair",
            ParameterKind::Tuple(vec![plain(2, "x"), plain(3, "y")]),
        )];
        let arguments = [Argument::positional(NodeId(10))];
        let components = |expr: NodeId| (expr == NodeId(10)).then(|| vec![NodeId(20)]);
        let mapping = map_arguments_to_parameters(
            &arguments,
            &parameters,
            &components,
            MappingOptions::default(),
        );
        assert_eq!(mapping.mapped.get(&arguments[0]), Some(&parameters[0]));
        assert_eq!(
            mapping.parameter_for(NodeId(20)).and_then(|p| p.name.as_deref()),
            Some("x")
        );
        assert!(mapping
            .unmapped_parameters
            .iter()
            .any(|p| p.name.as_deref() == Some("y")));
    }

    #[test]
    fn defaults_and_empty_containers_are_defaulted() {
        let mut optional = plain(1, "a");
        optional.has_default = true;
        let parameters = [optional, param(2, "rest", ParameterKind::VariadicPositional)];
        let mapping = map(&[], &parameters);
        assert_eq!(mapping.defaulted_parameters.len(), 2);
        assert!(mapping.unmapped_parameters.is_empty());
    }

    fn star(id: u32) -> Argument {
        Argument {
            expr: NodeId(id),
            kind: ArgumentKind::VariadicPositional,
        }
    }

    #[test]
    fn a_single_star_argument_feeds_the_variadic_parameter() {
        let parameters = [param(1, "args", ParameterKind::VariadicPositional)];
        let arguments = [star(10)];
        let mapping = map(&arguments, &parameters);
        assert_eq!(mapping.mapped.get(&arguments[0]), Some(&parameters[0]));
        assert!(mapping.unmapped_arguments.is_empty());
    }

    #[test]
    fn several_star_arguments_stay_unmapped() {
        let parameters = [param(1, "args", ParameterKind::VariadicPositional)];
        let arguments = [Argument::positional(NodeId(9)), star(10), star(11)];
        let mapping = map(&arguments, &parameters);
        assert_eq!(mapping.mapped.len(), 1);
        assert_eq!(mapping.mapped.get(&arguments[0]), Some(&parameters[0]));
        assert!(mapping.unmapped_arguments.contains(&arguments[1]));
        assert!(mapping.unmapped_arguments.contains(&arguments[2]));
        assert!(mapping.absorbed_arguments.is_empty());
    }

    #[test]
    fn parameters_fed_by_spliced_elements_are_tagged() {
        let parameters = [plain(1, "a"), plain(2, "b"), plain(3, "c")];
        let arguments = [Argument::positional(NodeId(9)), star(10)];
        let components = |expr: NodeId| (expr == NodeId(10)).then(|| vec![NodeId(20)]);
        let mapping = map_arguments_to_parameters(
            &arguments,
            &parameters,
            &components,
            MappingOptions::default(),
        );
        let tagged: Vec<&Parameter> = mapping
            .parameters_mapped_to_variadic_components
            .iter()
            .collect();
        assert_eq!(tagged, vec![&parameters[1]]);
        assert!(mapping.mapped_parameters().contains(&parameters[1]));
        assert!(mapping.unmapped_parameters.contains(&parameters[2]));
    }
}
