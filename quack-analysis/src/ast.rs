use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SourceSpan {
    pub line: usize,
    pub column: usize,
    pub end_line: usize,
    pub end_column: usize,
}

impl SourceSpan {
    pub fn new(line: usize, column: usize, end_line: usize, end_column: usize) -> Self {
        Self {
            line,
            column,
            end_line,
            end_column,
        }
    }

    pub fn single_point(line: usize, column: usize) -> Self {
        Self::new(line, column, line, column)
    }

    pub fn union(a: &Self, b: &Self) -> Self {
        if a.line == 0 {
            return *b;
        }
        if b.line == 0 {
            return *a;
        }

        let (start_line, start_column) =
            if (a.line < b.line) || (a.line == b.line && a.column <= b.column) {
                (a.line, a.column)
            } else {
                (b.line, b.column)
            };

        let (end_line, end_column) = if (a.end_line > b.end_line)
            || (a.end_line == b.end_line && a.end_column >= b.end_column)
        {
            (a.end_line, a.end_column)
        } else {
            (b.end_line, b.end_column)
        };

        Self::new(start_line, start_column, end_line, end_column)
    }
}

impl Default for SourceSpan {
    fn default() -> Self {
        Self::new(0, 0, 0, 0)
    }
}

/// Stable identity of a syntax node inside a [`crate::Program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ModuleId(pub u32);

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub span: SourceSpan,
    pub parent: Option<NodeId>,
    pub module: ModuleId,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Module(ModuleNode),
    Class(ClassDefinition),
    Function(FunctionDefinition),
    Parameter(ParameterNode),
    Assignment(AssignmentStatement),
    Return(ReturnStatement),
    If(IfStatement),
    While(WhileStatement),
    For(ForStatement),
    Import(ImportStatement),
    Pass,
    ExpressionStatement(NodeId),
    Name(String),
    Attribute(AttributeExpression),
    Call(CallExpression),
    Keyword(KeywordArgument),
    Starred(NodeId),
    DoubleStarred(NodeId),
    Subscript(SubscriptExpression),
    Literal(Literal),
    List(Vec<NodeId>),
    Tuple(Vec<NodeId>),
    Dict(Vec<DictEntry>),
    BoolOp(BoolOpExpression),
    Unary(UnaryExpression),
    Binary(BinaryExpression),
    Yield(Option<NodeId>),
}

#[derive(Debug, Clone)]
pub struct ModuleNode {
    pub name: String,
    pub statements: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct ClassDefinition {
    pub name: String,
    pub name_span: SourceSpan,
    pub decorators: Vec<NodeId>,
    pub bases: Vec<NodeId>,
    pub body: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct FunctionDefinition {
    pub name: String,
    pub name_span: SourceSpan,
    pub decorators: Vec<NodeId>,
    pub parameters: Vec<NodeId>,
    pub return_annotation: Option<NodeId>,
    pub body: Vec<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterSyntax {
    Plain,
    /// `*args`
    Star,
    /// `**kwargs`
    DoubleStar,
    /// Bare `*` separating the keyword-only region.
    KeywordOnlyMarker,
    /// `(a, b)`; the nested parameters live in `ParameterNode::elements`.
    Tuple,
}

#[derive(Debug, Clone)]
pub struct ParameterNode {
    pub name: Option<String>,
    pub syntax: ParameterSyntax,
    pub annotation: Option<NodeId>,
    pub default: Option<NodeId>,
    pub elements: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct AssignmentStatement {
    pub target: NodeId,
    pub annotation: Option<NodeId>,
    pub value: NodeId,
}

#[derive(Debug, Clone)]
pub struct ReturnStatement {
    pub value: Option<NodeId>,
}

#[derive(Debug, Clone)]
pub struct IfStatement {
    pub condition: NodeId,
    pub then_body: Vec<NodeId>,
    pub else_body: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct WhileStatement {
    pub condition: NodeId,
    pub body: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct ForStatement {
    pub target: NodeId,
    pub iterable: NodeId,
    pub body: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct ImportStatement {
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct AttributeExpression {
    pub object: NodeId,
    pub name: String,
    pub name_span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct CallExpression {
    pub callee: NodeId,
    pub arguments: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct KeywordArgument {
    pub name: String,
    pub value: NodeId,
}

#[derive(Debug, Clone)]
pub struct SubscriptExpression {
    pub object: NodeId,
    pub index: NodeId,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    None,
}

#[derive(Debug, Clone)]
pub struct DictEntry {
    pub key: NodeId,
    pub value: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOperator {
    And,
    Or,
}

#[derive(Debug, Clone)]
pub struct BoolOpExpression {
    pub operator: BoolOperator,
    pub left: NodeId,
    pub right: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Negative,
    Positive,
}

#[derive(Debug, Clone)]
pub struct UnaryExpression {
    pub operator: UnaryOperator,
    pub operand: NodeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    BitOr,
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
}

impl BinaryOperator {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOperator::Equal
                | BinaryOperator::NotEqual
                | BinaryOperator::Greater
                | BinaryOperator::GreaterEqual
                | BinaryOperator::Less
                | BinaryOperator::LessEqual
        )
    }

    /// Dunder method the left operand's class implements for this operator.
    pub fn method_name(self) -> &'static str {
        match self {
            BinaryOperator::Add => "__add__",
            BinaryOperator::Subtract => "__sub__",
            BinaryOperator::Multiply => "__mul__",
            BinaryOperator::Divide => "__truediv__",
            BinaryOperator::Modulo => "__mod__",
            BinaryOperator::BitOr => "__or__",
            BinaryOperator::Equal => "__eq__",
            BinaryOperator::NotEqual => "__ne__",
            BinaryOperator::Greater => "__gt__",
            BinaryOperator::GreaterEqual => "__ge__",
            BinaryOperator::Less => "__lt__",
            BinaryOperator::LessEqual => "__le__",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BinaryExpression {
    pub operator: BinaryOperator,
    pub left: NodeId,
    pub right: NodeId,
}

impl NodeKind {
    /// Direct children in source order.
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            NodeKind::Module(module) => module.statements.clone(),
            NodeKind::Class(class) => class
                .decorators
                .iter()
                .chain(&class.bases)
                .chain(&class.body)
                .copied()
                .collect(),
            NodeKind::Function(function) => function
                .decorators
                .iter()
                .chain(&function.parameters)
                .chain(&function.return_annotation)
                .chain(&function.body)
                .copied()
                .collect(),
            NodeKind::Parameter(parameter) => parameter
                .elements
                .iter()
                .chain(&parameter.annotation)
                .chain(&parameter.default)
                .copied()
                .collect(),
            NodeKind::Assignment(assignment) => {
                let mut children = vec![assignment.target];
                children.extend(assignment.annotation);
                children.push(assignment.value);
                children
            }
            NodeKind::Return(statement) => statement.value.into_iter().collect(),
            NodeKind::If(statement) => std::iter::once(statement.condition)
                .chain(statement.then_body.iter().copied())
                .chain(statement.else_body.iter().copied())
                .collect(),
            NodeKind::While(statement) => std::iter::once(statement.condition)
                .chain(statement.body.iter().copied())
                .collect(),
            NodeKind::For(statement) => [statement.target, statement.iterable]
                .into_iter()
                .chain(statement.body.iter().copied())
                .collect(),
            NodeKind::Import(_) | NodeKind::Pass | NodeKind::Name(_) | NodeKind::Literal(_) => {
                Vec::new()
            }
            NodeKind::ExpressionStatement(expression)
            | NodeKind::Starred(expression)
            | NodeKind::DoubleStarred(expression) => vec![*expression],
            NodeKind::Attribute(attribute) => vec![attribute.object],
            NodeKind::Call(call) => std::iter::once(call.callee)
                .chain(call.arguments.iter().copied())
                .collect(),
            NodeKind::Keyword(keyword) => vec![keyword.value],
            NodeKind::Subscript(subscript) => vec![subscript.object, subscript.index],
            NodeKind::List(elements) | NodeKind::Tuple(elements) => elements.clone(),
            NodeKind::Dict(entries) => entries
                .iter()
                .flat_map(|entry| [entry.key, entry.value])
                .collect(),
            NodeKind::BoolOp(expression) => vec![expression.left, expression.right],
            NodeKind::Unary(expression) => vec![expression.operand],
            NodeKind::Binary(expression) => vec![expression.left, expression.right],
            NodeKind::Yield(value) => value.iter().copied().collect(),
        }
    }

    /// Statements that open a new name scope.
    pub fn is_scope(&self) -> bool {
        matches!(
            self,
            NodeKind::Module(_) | NodeKind::Class(_) | NodeKind::Function(_)
        )
    }

    /// Expressions that can stand as a reference to a declaration.
    pub fn is_reference(&self) -> bool {
        matches!(self, NodeKind::Name(_) | NodeKind::Attribute(_))
    }
}
