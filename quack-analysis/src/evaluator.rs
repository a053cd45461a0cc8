//! Per-expression typing rules, run by [`TypeEvalContext::type_of`] once the
//! provider chain has abstained.

use tracing::trace;

use crate::arguments::{ArgumentKind, Parameter, ParameterKind};
use crate::ast::{
    BinaryExpression, BinaryOperator, CallExpression, Literal, NodeId, NodeKind, ParameterSyntax,
    SubscriptExpression, UnaryOperator,
};
use crate::callable::{Callable, Modifier};
use crate::context::{EvalKey, TypeEvalContext};
use crate::scope::Declaration;
use crate::types::{match_types, ClassHierarchy, GenericVar, Substitutions, Type};

impl TypeEvalContext<'_> {
    pub(crate) fn evaluate(&self, expr: NodeId) -> Type {
        let program = self.program();
        let Some(kind) = program.kind(expr) else {
            return Type::Unknown;
        };

        match kind {
            NodeKind::Literal(literal) => self.literal_type(literal),
            NodeKind::List(elements) => {
                let elements = self.element_union(elements);
                self.builtin_collection("list", elements)
            }
            NodeKind::Dict(entries) => {
                let elements = if entries.is_empty() {
                    Vec::new()
                } else {
                    vec![
                        Type::union(entries.iter().map(|entry| self.type_of(entry.key))),
                        Type::union(entries.iter().map(|entry| self.type_of(entry.value))),
                    ]
                };
                self.builtin_collection("dict", elements)
            }
            NodeKind::Tuple(elements) => {
                Type::tuple(elements.iter().map(|element| self.type_of(*element)).collect())
            }
            NodeKind::BoolOp(expression) => Type::union([
                self.type_of(expression.left),
                self.type_of(expression.right),
            ]),
            NodeKind::Unary(expression) => match expression.operator {
                UnaryOperator::Not => self.builtin_instance("bool"),
                UnaryOperator::Negative | UnaryOperator::Positive => {
                    self.type_of(expression.operand)
                }
            },
            NodeKind::Binary(expression) => self.binary_type(expression),
            NodeKind::Subscript(subscript) => self.subscript_type(subscript),
            NodeKind::Name(name) => self.name_type(expr, name),
            NodeKind::Attribute(_) => self.attribute_type(expr),
            NodeKind::Call(call) => self.call_type(expr, call),
            NodeKind::Keyword(keyword) => self.type_of(keyword.value),
            NodeKind::Starred(inner) | NodeKind::DoubleStarred(inner) => self.type_of(*inner),
            NodeKind::ExpressionStatement(inner) => self.type_of(*inner),
            // the value a generator receives is whatever the caller sends
            NodeKind::Yield(_) => Type::Unknown,
            NodeKind::Parameter(_) => self.parameter_type(expr),
            NodeKind::Function(_) => Type::Function(expr),
            NodeKind::Class(_) => Type::definition(expr),
            NodeKind::Module(_) => program
                .module_of(expr)
                .map(Type::Module)
                .unwrap_or(Type::Unknown),
            NodeKind::Import(import) => program
                .module_by_name(&import.name)
                .map(|info| Type::Module(info.id))
                .unwrap_or(Type::Unknown),
            NodeKind::Assignment(_)
            | NodeKind::Return(_)
            | NodeKind::If(_)
            | NodeKind::While(_)
            | NodeKind::For(_)
            | NodeKind::Pass => Type::Unknown,
        }
    }

    fn literal_type(&self, literal: &Literal) -> Type {
        match literal {
            Literal::Integer(_) => self.builtin_instance("int"),
            Literal::Float(_) => self.builtin_instance("float"),
            Literal::String(_) => self.builtin_instance("str"),
            Literal::Boolean(_) => self.builtin_instance("bool"),
            Literal::None => Type::None,
        }
    }

    /// `[union of elements]`, or no element types for an empty display.
    fn element_union(&self, elements: &[NodeId]) -> Vec<Type> {
        if elements.is_empty() {
            return Vec::new();
        }
        vec![Type::union(elements.iter().map(|element| self.type_of(*element)))]
    }

    fn binary_type(&self, expression: &BinaryExpression) -> Type {
        if expression.operator.is_comparison() {
            return self.builtin_instance("bool");
        }
        let left = self.type_of(expression.left);
        self.operator_type(&left, expression.operator.method_name())
    }

    /// Return type of the dunder method `method` looked up on `operand`.
    fn operator_type(&self, operand: &Type, method: &str) -> Type {
        let result = match operand.unwrap_weak() {
            Type::Unknown => return Type::Unknown,
            Type::Union(members) => {
                Type::union(members.iter().map(|member| self.operator_type(member, method)))
            }
            known => {
                let returned = self
                    .member_declarations(known, method)
                    .into_iter()
                    .rev()
                    .find_map(|declaration| match declaration {
                        Declaration::Function(function) => Some(function),
                        _ => None,
                    })
                    .and_then(|function| self.callable(function))
                    .map(|callable| self.callable_return_type(&callable))
                    .unwrap_or(Type::Unknown);
                // `list.__add__ -> list` keeps the element types of the operand
                match (known, &returned) {
                    (Type::Collection { class, .. }, Type::Class { class: other, definition: false })
                        if class == other =>
                    {
                        known.clone()
                    }
                    _ => returned.erase_generics(),
                }
            }
        };
        if operand.is_weak() {
            result.weak()
        } else {
            result
        }
    }

    fn subscript_type(&self, subscript: &SubscriptExpression) -> Type {
        let object = self.type_of(subscript.object);
        let result = match object.unwrap_weak() {
            Type::Tuple {
                homogeneous: Some(element),
                ..
            } => (**element).clone(),
            Type::Tuple { elements, .. } => match self.literal_index(subscript.index) {
                Some(index) => {
                    let position = if index < 0 {
                        elements.len() as i64 + index
                    } else {
                        index
                    };
                    usize::try_from(position)
                        .ok()
                        .and_then(|position| elements.get(position))
                        .cloned()
                        .unwrap_or(Type::Unknown)
                }
                None => Type::union(elements.iter().cloned()),
            },
            Type::Collection { class, elements } if self.is_builtin_named(*class, "dict") => {
                elements.get(1).cloned().unwrap_or(Type::Unknown)
            }
            Type::Collection { elements, .. } if !elements.is_empty() => {
                elements.first().cloned().unwrap_or(Type::Unknown)
            }
            _ => self.operator_type(object.unwrap_weak(), "__getitem__"),
        };
        if object.is_weak() {
            result.weak()
        } else {
            result
        }
    }

    /// Integer value of a literal index such as `2` or `-1`.
    fn literal_index(&self, index: NodeId) -> Option<i64> {
        match self.program().kind(index)? {
            NodeKind::Literal(Literal::Integer(value)) => Some(*value),
            NodeKind::Unary(unary) if unary.operator == UnaryOperator::Negative => {
                self.literal_index(unary.operand).map(|value| -value)
            }
            _ => None,
        }
    }

    pub(crate) fn is_builtin_named(&self, class: NodeId, name: &str) -> bool {
        self.builtin_class(name) == Some(class)
    }

    fn name_type(&self, reference: NodeId, name: &str) -> Type {
        let declarations = self.visible_declarations(reference, name);
        trace!(name, count = declarations.len(), "typing name");
        Type::union(
            declarations
                .iter()
                .map(|declaration| self.declaration_type(declaration)),
        )
    }

    fn attribute_type(&self, attribute: NodeId) -> Type {
        let Some(NodeKind::Attribute(expression)) = self.program().kind(attribute) else {
            return Type::Unknown;
        };
        let object = self.type_of(expression.object);
        let on_instance = !matches!(
            object.unwrap_weak(),
            Type::Class {
                definition: true,
                ..
            } | Type::Module(_)
        );

        Type::union(self.reference_candidates(attribute).into_iter().map(|candidate| {
            let ty = self.member_type(&candidate.declaration, on_instance);
            if candidate.implicit {
                ty.weak()
            } else {
                ty
            }
        }))
    }

    /// Type of a member read, seeing through properties and method wrappers.
    fn member_type(&self, declaration: &Declaration, on_instance: bool) -> Type {
        match declaration {
            Declaration::Function(function) => {
                let is_property = self
                    .program()
                    .decorator_names(*function)
                    .contains(&"property");
                if is_property && on_instance {
                    self.return_type(*function)
                } else {
                    Type::Function(*function)
                }
            }
            Declaration::Assignment { statement, .. } => match self.wrapper_call(*statement) {
                Some(("property", wrapped)) if on_instance => self
                    .wrapped_function(wrapped)
                    .map(|getter| self.return_type(getter))
                    .unwrap_or(Type::Unknown),
                Some((_, wrapped)) => self
                    .wrapped_function(wrapped)
                    .map(Type::Function)
                    .unwrap_or(Type::Unknown),
                None => self.declaration_type(declaration),
            },
            other => self.declaration_type(other),
        }
    }

    /// `(wrapper, argument)` of an `x = classmethod(f)`-style assignment.
    pub(crate) fn wrapper_call(&self, statement: NodeId) -> Option<(&'static str, NodeId)> {
        let program = self.program();
        let Some(NodeKind::Assignment(assignment)) = program.kind(statement) else {
            return None;
        };
        let Some(NodeKind::Call(call)) = program.kind(assignment.value) else {
            return None;
        };
        let [argument] = call.arguments.as_slice() else {
            return None;
        };
        if !matches!(program.kind(*argument), Some(NodeKind::Name(_))) {
            return None;
        }
        let wrapper = match program.kind(call.callee) {
            Some(NodeKind::Name(name)) => match name.as_str() {
                "classmethod" => "classmethod",
                "staticmethod" => "staticmethod",
                "property" => "property",
                _ => return None,
            },
            _ => return None,
        };
        Some((wrapper, *argument))
    }

    /// Function named by the argument of a wrapper call like `classmethod(f)`.
    ///
    /// The name is usually rebound by the wrapping assignment itself, so
    /// only `def` bindings are considered.
    pub(crate) fn wrapped_function(&self, wrapped: NodeId) -> Option<NodeId> {
        let name = self.program().name_text(wrapped)?;
        self.lookup_name(wrapped, name)
            .into_iter()
            .rev()
            .find_map(|declaration| match declaration {
                Declaration::Function(function) => Some(function),
                _ => None,
            })
    }

    /// Type bound by one declaration.
    pub fn declaration_type(&self, declaration: &Declaration) -> Type {
        let program = self.program();
        match declaration {
            Declaration::Assignment { statement, .. } => {
                let Some(NodeKind::Assignment(assignment)) = program.kind(*statement) else {
                    return Type::Unknown;
                };
                match assignment.annotation {
                    Some(annotation) => self.annotation_type(annotation),
                    None => self.type_of(assignment.value),
                }
            }
            Declaration::Unpacked {
                statement, path, ..
            } => {
                let Some(NodeKind::Assignment(assignment)) = program.kind(*statement) else {
                    return Type::Unknown;
                };
                self.element_at_path(self.type_of(assignment.value), path)
            }
            Declaration::ForTarget {
                statement, path, ..
            } => {
                let Some(NodeKind::For(for_statement)) = program.kind(*statement) else {
                    return Type::Unknown;
                };
                let element = self.iterated_type(&self.type_of(for_statement.iterable));
                self.element_at_path(element, path)
            }
            Declaration::Function(function) => Type::Function(*function),
            Declaration::Class(class) => Type::definition(*class),
            Declaration::Parameter(parameter) => self.type_of(*parameter),
            Declaration::Import { module, .. } => {
                module.map(Type::Module).unwrap_or(Type::Unknown)
            }
        }
    }

    fn element_at_path(&self, mut ty: Type, path: &[usize]) -> Type {
        for index in path {
            ty = self.element_at(&ty, *index);
        }
        ty
    }

    fn element_at(&self, ty: &Type, index: usize) -> Type {
        match ty {
            Type::Weak(inner) => self.element_at(inner, index).weak(),
            Type::Union(members) => {
                Type::union(members.iter().map(|member| self.element_at(member, index)))
            }
            Type::Tuple {
                homogeneous: Some(element),
                ..
            } => (**element).clone(),
            Type::Tuple { elements, .. } => elements.get(index).cloned().unwrap_or(Type::Unknown),
            Type::Collection { class, elements } if !self.is_builtin_named(*class, "dict") => {
                elements.first().cloned().unwrap_or(Type::Unknown)
            }
            _ => Type::Unknown,
        }
    }

    /// Type of the values produced by iterating over a value of type `ty`.
    pub fn iterated_type(&self, ty: &Type) -> Type {
        match ty {
            Type::Weak(inner) => self.iterated_type(inner).weak(),
            Type::Union(members) => {
                Type::union(members.iter().map(|member| self.iterated_type(member)))
            }
            Type::Tuple {
                homogeneous: Some(element),
                ..
            } => (**element).clone(),
            Type::Tuple { elements, .. } => Type::union(elements.iter().cloned()),
            // lists and generators yield their element, dicts their keys
            Type::Collection { elements, .. } => {
                elements.first().cloned().unwrap_or(Type::Unknown)
            }
            Type::Class {
                class,
                definition: false,
            } if self.is_builtin_named(*class, "str") => ty.clone(),
            _ => Type::Unknown,
        }
    }

    fn parameter_type(&self, parameter: NodeId) -> Type {
        let Some(node) = self.program().parameter(parameter) else {
            return Type::Unknown;
        };

        match node.syntax {
            ParameterSyntax::Tuple => {
                return Type::tuple(
                    node.elements
                        .iter()
                        .map(|element| self.type_of(*element))
                        .collect(),
                )
            }
            ParameterSyntax::KeywordOnlyMarker => return Type::Unknown,
            ParameterSyntax::Plain | ParameterSyntax::Star | ParameterSyntax::DoubleStar => {}
        }

        if let Some(annotation) = node.annotation {
            let declared = self.annotation_type(annotation);
            return match node.syntax {
                ParameterSyntax::Star => Type::homogeneous_tuple(declared),
                ParameterSyntax::DoubleStar => {
                    self.builtin_collection("dict", vec![self.builtin_instance("str"), declared])
                }
                _ => declared,
            };
        }

        match node.syntax {
            ParameterSyntax::Star => return Type::homogeneous_tuple(Type::Unknown),
            ParameterSyntax::DoubleStar => {
                return self
                    .builtin_collection("dict", vec![self.builtin_instance("str"), Type::Unknown])
            }
            _ => {}
        }

        if let Some(receiver) = self.receiver_type(parameter) {
            return receiver;
        }
        if let Some(default) = node.default {
            return self.type_of(default).weak();
        }

        for provider in self.providers() {
            if let Some(ty) = provider.parameter_type(parameter, self) {
                trace!(
                    provider = provider.name(),
                    node = parameter.0,
                    "provider supplied parameter type"
                );
                return ty;
            }
        }
        Type::Unknown
    }

    /// `self` or `cls` of a method, when `parameter` is its first parameter.
    fn receiver_type(&self, parameter: NodeId) -> Option<Type> {
        let program = self.program();
        let function = program.parent(parameter)?;
        let definition = program.function_definition(function)?;
        if definition.parameters.first() != Some(&parameter) {
            return None;
        }
        let class = program.declaring_class(function)?;
        match self.method_modifier(function) {
            Modifier::StaticMethod => None,
            Modifier::ClassMethod => Some(Type::definition(class)),
            Modifier::None if definition.name == "__new__" => Some(Type::definition(class)),
            Modifier::None => Some(Type::instance(class)),
        }
    }

    /// Modifier from a decorator, or from a `name = classmethod(name)` line
    /// in the class body.
    pub(crate) fn method_modifier(&self, function: NodeId) -> Modifier {
        let program = self.program();
        if let Some(modifier) = program
            .decorator_names(function)
            .into_iter()
            .find_map(Modifier::from_name)
        {
            return modifier;
        }
        let (Some(class), Some(name)) = (program.declaring_class(function), program.name_text(function))
        else {
            return Modifier::None;
        };
        program
            .scope_body(class)
            .iter()
            .filter_map(|statement| {
                let NodeKind::Assignment(assignment) = program.kind(*statement)? else {
                    return None;
                };
                let (wrapper, argument) = self.wrapper_call(*statement)?;
                let rebinds = program.name_text(assignment.target) == Some(name)
                    && program.name_text(argument) == Some(name);
                rebinds.then(|| Modifier::from_name(wrapper)).flatten()
            })
            .last()
            .unwrap_or_default()
    }

    /// Type described by an annotation expression.
    pub fn annotation_type(&self, annotation: NodeId) -> Type {
        self.guarded(EvalKey::Annotation(annotation), || {
            let program = self.program();
            match program.kind(annotation) {
                Some(NodeKind::Literal(Literal::None)) => Type::None,
                Some(NodeKind::Name(_) | NodeKind::Attribute(_)) => {
                    self.annotation_reference(annotation)
                }
                Some(NodeKind::Subscript(subscript)) => {
                    let arguments: Vec<Type> = match program.kind(subscript.index) {
                        Some(NodeKind::Tuple(elements)) => elements
                            .iter()
                            .map(|element| self.annotation_type(*element))
                            .collect(),
                        _ => vec![self.annotation_type(subscript.index)],
                    };
                    match self.type_of(subscript.object).unwrap_weak() {
                        Type::Class {
                            class,
                            definition: true,
                        } if self.is_builtin_named(*class, "tuple") => Type::tuple(arguments),
                        Type::Class {
                            class,
                            definition: true,
                        } => Type::Collection {
                            class: *class,
                            elements: arguments,
                        },
                        _ => Type::Unknown,
                    }
                }
                Some(NodeKind::Binary(binary))
                    if binary.operator == BinaryOperator::BitOr =>
                {
                    Type::union([
                        self.annotation_type(binary.left),
                        self.annotation_type(binary.right),
                    ])
                }
                _ => Type::Unknown,
            }
        })
    }

    fn annotation_reference(&self, annotation: NodeId) -> Type {
        if let Some(var) = self.type_variable(annotation) {
            return Type::Generic(var);
        }
        match self.type_of(annotation).unwrap_weak() {
            Type::Class {
                class,
                definition: true,
            } if self.is_builtin_named(*class, "NoneType") => Type::None,
            Type::Class {
                class,
                definition: true,
            } => Type::instance(*class),
            _ => Type::Unknown,
        }
    }

    /// The type variable a name refers to, if it names a `TypeVar(...)` binding.
    fn type_variable(&self, reference: NodeId) -> Option<GenericVar> {
        let program = self.program();
        let Declaration::Assignment { target, statement } = self.resolve(reference).element? else {
            return None;
        };
        let NodeKind::Assignment(assignment) = program.kind(statement)? else {
            return None;
        };
        let NodeKind::Call(call) = program.kind(assignment.value)? else {
            return None;
        };
        if program.name_text(call.callee) != Some("TypeVar") {
            return None;
        }
        let name = call
            .arguments
            .first()
            .and_then(|argument| match program.kind(*argument) {
                Some(NodeKind::Literal(Literal::String(name))) => Some(name.clone()),
                _ => None,
            })
            .or_else(|| program.name_text(target).map(str::to_string))?;
        Some(GenericVar {
            id: statement,
            name,
        })
    }

    /// A function definition viewed as a [`Callable`].
    pub fn callable(&self, function: NodeId) -> Option<Callable> {
        let program = self.program();
        let definition = program.function_definition(function)?;
        let mut annotation = |expr: NodeId| self.annotation_type(expr);
        let parameters = definition
            .parameters
            .iter()
            .filter_map(|parameter| Parameter::from_node(program, *parameter, &mut annotation))
            .collect();
        let decorators = program.decorator_names(function);
        let modifier = decorators
            .iter()
            .copied()
            .find_map(Modifier::from_name)
            .unwrap_or_default();

        Some(Callable {
            function,
            name: definition.name.clone(),
            parameters,
            modifier,
            declaring_class: program.declaring_class(function),
            declared_return_type: definition
                .return_annotation
                .map(|annotation| self.annotation_type(annotation)),
            is_property: decorators.contains(&"property"),
        })
    }

    pub fn callable_return_type(&self, callable: &Callable) -> Type {
        match &callable.declared_return_type {
            Some(declared) => declared.clone(),
            None => self.inferred_return_type(callable.function),
        }
    }

    /// Declared return type of `function`, else the one inferred from its body.
    pub fn return_type(&self, function: NodeId) -> Type {
        let annotation = self
            .program()
            .function_definition(function)
            .and_then(|definition| definition.return_annotation);
        match annotation {
            Some(annotation) => self.annotation_type(annotation),
            None => self.inferred_return_type(function),
        }
    }

    fn inferred_return_type(&self, function: NodeId) -> Type {
        let program = self.program();
        // builtin stubs have empty bodies
        if program.is_builtin(function) || !self.full_tree() {
            return Type::Unknown;
        }
        self.guarded(EvalKey::Return(function), || {
            let Some(definition) = program.function_definition(function) else {
                return Type::Unknown;
            };
            let own = own_nodes(self, &definition.body);

            let yields: Vec<Type> = own
                .iter()
                .filter_map(|node| match program.kind(*node) {
                    Some(NodeKind::Yield(value)) => {
                        Some(value.map_or(Type::None, |value| self.type_of(value)))
                    }
                    _ => None,
                })
                .collect();
            if !yields.is_empty() {
                return self.builtin_collection("generator", vec![Type::union(yields)]);
            }

            let mut returned: Vec<Type> = own
                .iter()
                .filter_map(|node| match program.kind(*node) {
                    Some(NodeKind::Return(statement)) => {
                        Some(statement.value.map_or(Type::None, |value| self.type_of(value)))
                    }
                    _ => None,
                })
                .collect();
            if falls_through(self, &definition.body) {
                returned.push(Type::None);
            }
            Type::union(returned)
        })
    }

    fn call_type(&self, call: NodeId, expression: &CallExpression) -> Type {
        if let Some(special) = self.special_call_type(call, expression) {
            return special;
        }
        let Some(callee) = self.resolve_callee(call) else {
            return Type::Unknown;
        };
        if callee.is_constructor_call {
            return callee
                .constructed
                .map(Type::instance)
                .unwrap_or(Type::Unknown);
        }

        let declared = self.callable_return_type(&callee.callable);
        if !declared.has_generics() {
            return declared;
        }

        let mapping = self.map_resolved_arguments(&callee, &self.call_arguments(call));
        let mut substitutions = Substitutions::new();
        for (argument, parameter) in &mapping.mapped {
            let Some(expected) = &parameter.declared_type else {
                continue;
            };
            let actual = self.type_of(argument.expr);
            let actual = match (&parameter.kind, &argument.kind) {
                (ParameterKind::VariadicPositional, ArgumentKind::VariadicPositional) => {
                    self.iterated_type(&actual)
                }
                (ParameterKind::VariadicKeyword, ArgumentKind::VariadicKeyword) => {
                    match actual.unwrap_weak() {
                        Type::Collection { elements, .. } => {
                            elements.get(1).cloned().unwrap_or(Type::Unknown)
                        }
                        _ => Type::Unknown,
                    }
                }
                _ => actual,
            };
            let required = !parameter.has_default && !parameter.is_variadic();
            if !match_types(expected, &actual, &mut substitutions, self as &dyn ClassHierarchy)
                && required
            {
                trace!(
                    parameter = parameter.name.as_deref().unwrap_or_default(),
                    "argument does not match a generic parameter"
                );
                return Type::Unknown;
            }
        }
        declared.substitute(&substitutions).erase_generics()
    }

    /// `super(...)` and one-argument `type(x)`.
    fn special_call_type(&self, call: NodeId, expression: &CallExpression) -> Option<Type> {
        let program = self.program();
        let NodeKind::Name(name) = program.kind(expression.callee)? else {
            return None;
        };
        if !matches!(name.as_str(), "super" | "type") {
            return None;
        }
        // only the builtin classes, not user bindings of the same name
        let builtin = self
            .lookup_name(expression.callee, name)
            .last()
            .map(Declaration::node)
            .filter(|node| program.is_builtin(*node))?;
        if self.builtin_class(name) != Some(builtin) {
            return None;
        }

        if name == "type" {
            let [argument] = expression.arguments.as_slice() else {
                return None;
            };
            return Some(self.class_object_type(&self.type_of(*argument)));
        }
        Some(self.super_type(call, &expression.arguments))
    }

    fn class_object_type(&self, ty: &Type) -> Type {
        match ty {
            Type::Weak(inner) => self.class_object_type(inner).weak(),
            Type::Union(members) => {
                Type::union(members.iter().map(|member| self.class_object_type(member)))
            }
            Type::Unknown | Type::Structural(_) | Type::Generic(_) => Type::Unknown,
            other => self
                .class_of(other)
                .map(Type::definition)
                .unwrap_or(Type::Unknown),
        }
    }

    fn super_type(&self, call: NodeId, arguments: &[NodeId]) -> Type {
        let program = self.program();
        let (class, receiver) = match arguments {
            [] => {
                let Some(class) = program.enclosing_class(call) else {
                    return Type::Unknown;
                };
                let on_class = program
                    .enclosing_function(call)
                    .map(|function| {
                        self.method_modifier(function) == Modifier::ClassMethod
                            || program.name_text(function) == Some("__new__")
                    })
                    .unwrap_or(false);
                let receiver = if on_class {
                    Type::definition(class)
                } else {
                    Type::instance(class)
                };
                (class, receiver)
            }
            [kind] => match self.type_of(*kind).unwrap_weak() {
                Type::Class {
                    class,
                    definition: true,
                } => (*class, Type::definition(*class)),
                _ => return Type::Unknown,
            },
            [kind, instance, ..] => {
                let Type::Class {
                    class,
                    definition: true,
                } = self.type_of(*kind).unwrap_weak().clone()
                else {
                    return Type::Unknown;
                };
                (class, self.type_of(*instance).unwrap_weak().clone())
            }
        };

        // the class after `class` in the receiver's own linearisation
        let (receiver_class, definition) = match receiver {
            Type::Class { class, definition } => (class, definition),
            _ => (class, false),
        };
        let order = self.mro(receiver_class);
        let next = order
            .iter()
            .skip_while(|candidate| **candidate != class)
            .nth(1)
            .copied();
        match next {
            Some(base) if definition => Type::definition(base),
            Some(base) => Type::instance(base),
            None => Type::Unknown,
        }
    }
}

/// Statements and expressions of a body, nested definitions excluded.
fn own_nodes(context: &TypeEvalContext<'_>, body: &[NodeId]) -> Vec<NodeId> {
    let program = context.program();
    let mut out = Vec::new();
    let mut stack: Vec<NodeId> = body.iter().rev().copied().collect();
    while let Some(node) = stack.pop() {
        out.push(node);
        if matches!(
            program.kind(node),
            Some(NodeKind::Function(_) | NodeKind::Class(_))
        ) {
            continue;
        }
        stack.extend(program.children(node).into_iter().rev());
    }
    out
}

/// True when control can reach the end of `body`.
fn falls_through(context: &TypeEvalContext<'_>, body: &[NodeId]) -> bool {
    match body.last().and_then(|last| context.program().kind(*last)) {
        Some(NodeKind::Return(_)) => false,
        Some(NodeKind::If(statement)) => {
            falls_through(context, &statement.then_body)
                || falls_through(context, &statement.else_body)
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::builtins::BuiltinTypeCache;
    use crate::program::Program;

    fn program(text: &str) -> (Program, Vec<NodeId>) {
        let mut program = Program::with_builtins().expect("builtins");
        let module = program.add_module("m", text).expect("parse");
        let root = program.module(module).expect("module").root;
        let statements = program.module_node(root).expect("root").statements.clone();
        (program, statements)
    }

    /// Value of the assignment statement at `index`.
    fn value(program: &Program, statements: &[NodeId], index: usize) -> NodeId {
        match program.kind(statements[index]) {
            Some(NodeKind::Assignment(assignment)) => assignment.value,
            Some(NodeKind::ExpressionStatement(expr)) => *expr,
            other => panic!("not an assignment: {other:?}"),
        }
    }

    fn describe(text: &str, index: usize) -> String {
        let (program, statements) = program(text);
        let context = TypeEvalContext::code_analysis(&program, Arc::new(BuiltinTypeCache::new()));
        let expr = value(&program, &statements, index);
        context.type_of(expr).describe(&program)
    }

    #[test]
    fn literals_and_displays() {
        assert_eq!(describe("x = 1\n", 0), "int");
        assert_eq!(describe("x = [1, \"a\"]\n", 0), "list[int | str]");
        assert_eq!(describe("x = {\"a\": 1}\n", 0), "dict[str, int]");
        assert_eq!(describe("x = (1, None)\n", 0), "tuple[int, None]");
        assert_eq!(describe("x = []\n", 0), "list");
    }

    #[test]
    fn operators_use_dunder_methods() {
        assert_eq!(describe("x = 1 + 2\n", 0), "int");
        assert_eq!(describe("x = 1 / 2\n", 0), "float");
        assert_eq!(describe("x = \"a\" * 3\n", 0), "str");
        assert_eq!(describe("x = 1 < 2\n", 0), "bool");
        assert_eq!(describe("x = not 1\n", 0), "bool");
        assert_eq!(describe("x = 1 or \"a\"\n", 0), "int | str");
    }

    #[test]
    fn subscripts_index_tuples_and_collections() {
        let text = "t = (1, \"a\")\nx = t[1]\ny = t[-2]\nz = [1.5][0]\nw = {1: \"a\"}[1]\n";
        assert_eq!(describe(text, 1), "str");
        assert_eq!(describe(text, 2), "int");
        assert_eq!(describe(text, 3), "float");
        assert_eq!(describe(text, 4), "str");
        assert_eq!(describe("x = \"abc\"[0]\n", 0), "str");
    }

    #[test]
    fn unpacking_and_loops() {
        let text = "a, (b, c) = 1, (\"s\", 2.0)\nx = c\nfor k, v in [(1, \"s\")]\n  y = v\nend\n";
        assert_eq!(describe(text, 1), "float");
        let (program, statements) = program(text);
        let context = TypeEvalContext::code_analysis(&program, Arc::new(BuiltinTypeCache::new()));
        let Some(NodeKind::For(for_statement)) = program.kind(statements[2]) else {
            panic!("for");
        };
        let Some(NodeKind::Assignment(assignment)) = program.kind(for_statement.body[0]) else {
            panic!("assignment");
        };
        assert_eq!(context.type_of(assignment.value).describe(&program), "str");
    }

    #[test]
    fn parameters_are_typed_from_their_syntax() {
        let text = "class C\n  def m(self, a: int, *rest: str, scale=1.0, **options)\n  end\nend\n";
        let (program, statements) = program(text);
        let context = TypeEvalContext::code_analysis(&program, Arc::new(BuiltinTypeCache::new()));
        let method = program.class_definition(statements[0]).expect("class").body[0];
        let parameters = program.function_definition(method).expect("def").parameters.clone();
        let described: Vec<String> = parameters
            .iter()
            .map(|parameter| context.type_of(*parameter).describe(&program))
            .collect();
        assert_eq!(
            described,
            vec![
                "C",
                "int",
                "tuple[str, ...]",
                "weak(float)",
                "dict[str, unknown]"
            ]
        );
    }

    #[test]
    fn classmethod_receiver_is_the_class_object() {
        let text = "class C\n  @classmethod\n  def make(cls)\n    return cls\n  end\n  def other(k)\n    return k\n  end\n  other = classmethod(other)\nend\n";
        let (program, statements) = program(text);
        let context = TypeEvalContext::code_analysis(&program, Arc::new(BuiltinTypeCache::new()));
        let body = &program.class_definition(statements[0]).expect("class").body;
        assert_eq!(context.return_type(body[0]).describe(&program), "type[C]");
        assert_eq!(context.return_type(body[1]).describe(&program), "type[C]");
    }

    #[test]
    fn return_types_are_inferred_from_bodies() {
        let text = "def f(c)\n  if c\n    return 1\n  end\nend\ndef g()\n  yield 1\n  yield \"s\"\nend\ndef h(c)\n  if c\n    return 1\n  else\n    return 2.0\n  end\nend\n";
        let (program, statements) = program(text);
        let context = TypeEvalContext::code_analysis(&program, Arc::new(BuiltinTypeCache::new()));
        assert_eq!(context.return_type(statements[0]).describe(&program), "None | int");
        assert_eq!(
            context.return_type(statements[1]).describe(&program),
            "generator[int | str]"
        );
        assert_eq!(context.return_type(statements[2]).describe(&program), "float | int");
    }

    #[test]
    fn index_only_mode_does_not_infer_returns() {
        let (program, statements) = program("def f()\n  return 1\nend\nx = f()\n");
        let index = crate::scope::ScopeIndex::build(&program);
        let context =
            TypeEvalContext::index_only(&program, &index, Arc::new(BuiltinTypeCache::new()));
        let expr = value(&program, &statements, 1);
        assert_eq!(context.type_of(expr), Type::Unknown);
    }

    #[test]
    fn properties_give_the_getter_type_on_instances() {
        let text = "class C\n  @property\n  def size(self) -> int\n  end\nend\nx = C().size\ny = C.size\n";
        assert_eq!(describe(text, 1), "int");
        assert_eq!(describe(text, 2), "def size");
    }

    #[test]
    fn super_and_type_calls() {
        let text = "class A\n  def hello(self) -> int\n  end\nend\nclass B(A)\n  def hello(self) -> str\n    return super().hello()\n  end\nend\nx = type(B())\ny = super(B, B())\n";
        assert_eq!(describe(text, 2), "type[B]");
        assert_eq!(describe(text, 3), "A");
        let (program, statements) = program(text);
        let context = TypeEvalContext::code_analysis(&program, Arc::new(BuiltinTypeCache::new()));
        let method = program.class_definition(statements[1]).expect("class").body[0];
        let Some(NodeKind::Return(statement)) =
            program.kind(program.function_definition(method).expect("def").body[0])
        else {
            panic!("return");
        };
        let call = statement.value.expect("value");
        assert_eq!(context.type_of(call).describe(&program), "int");
    }

    #[test]
    fn generic_returns_are_substituted() {
        let text = "T = TypeVar(\"T\")\ndef first(items: list[T]) -> T\nend\ndef pair(a: T, b: T) -> tuple[T, T]\nend\nx = first([1])\ny = pair(1, \"s\")\n";
        assert_eq!(describe(text, 3), "int");
        assert_eq!(describe(text, 4), "tuple[int | str, int | str]");
    }
}
