mod arguments;
mod ast;
mod builtins;
mod callable;
mod callee;
mod config;
mod context;
mod diagnostics;
mod error;
mod evaluator;
mod flow;
mod lexer;
mod parser;
mod program;
mod providers;
mod resolve;
mod scope;
mod source;
mod types;

pub use crate::arguments::{
    map_arguments_to_parameters, Argument, ArgumentKind, ArgumentMapping, MappingOptions,
    Parameter, ParameterKind,
};
pub use crate::ast::{
    AssignmentStatement, AttributeExpression, BinaryExpression, BinaryOperator, BoolOpExpression,
    BoolOperator, CallExpression, ClassDefinition, DictEntry, ForStatement, FunctionDefinition,
    IfStatement, ImportStatement, KeywordArgument, Literal, ModuleId, ModuleNode, Node, NodeId,
    NodeKind, ParameterNode, ParameterSyntax, ReturnStatement, SourceSpan, SubscriptExpression,
    UnaryExpression, UnaryOperator, WhileStatement,
};
pub use crate::builtins::{BuiltinTypeCache, BuiltinsProvider};
pub use crate::callable::{Callable, Modifier};
pub use crate::callee::{implicit_offset, Binding, CalleeResolution};
pub use crate::config::{AnalysisMode, AnalyzerConfig, LanguageConfig, ProviderConfig};
pub use crate::context::TypeEvalContext;
pub use crate::diagnostics::{Diagnostic, DiagnosticLevel, Diagnostics};
pub use crate::error::{ConfigError, LoadError};
pub use crate::flow::{final_definitions, reaching_definitions};
pub use crate::lexer::{Keyword, Lexer, Token, TokenKind};
pub use crate::parser::Parser;
pub use crate::program::{ModuleInfo, Program};
pub use crate::providers::{ParameterUsageProvider, TypeProvider};
pub use crate::resolve::{alias_value, chase_reference, Candidate, ResolveResult};
pub use crate::scope::{lookup, Declaration, ScopeIndex, SymbolIndex, TreeScopes};
pub use crate::source::{SourceFile, SourceId};
pub use crate::types::{match_types, ClassHierarchy, GenericVar, Substitutions, Type};

/// Type of `expr`; shorthand for [`TypeEvalContext::type_of`].
pub fn evaluate_type(expr: NodeId, context: &TypeEvalContext<'_>) -> Type {
    context.type_of(expr)
}

pub fn resolve_callee(call: NodeId, context: &TypeEvalContext<'_>) -> Option<CalleeResolution> {
    context.resolve_callee(call)
}

pub fn map_arguments(call: NodeId, context: &TypeEvalContext<'_>) -> ArgumentMapping {
    context.map_call_arguments(call)
}
