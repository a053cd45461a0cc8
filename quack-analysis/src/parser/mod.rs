use anyhow::{bail, Result};

use crate::ast::*;
use crate::diagnostics::Diagnostics;
use crate::lexer::{Keyword, Token, TokenKind};
use crate::program::Program;

#[derive(Copy, Clone, PartialEq, PartialOrd)]
enum Precedence {
    Lowest = 0,
    Or,
    And,
    Comparison,
    BitOr,
    Term,
    Factor,
    Unary,
}

impl Precedence {
    fn of(kind: &TokenKind) -> Option<Self> {
        match kind {
            TokenKind::Keyword(Keyword::Or) => Some(Precedence::Or),
            TokenKind::Keyword(Keyword::And) => Some(Precedence::And),
            TokenKind::DoubleEqual
            | TokenKind::BangEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual
            | TokenKind::Less
            | TokenKind::LessEqual => Some(Precedence::Comparison),
            TokenKind::Pipe => Some(Precedence::BitOr),
            TokenKind::Plus | TokenKind::Minus => Some(Precedence::Term),
            TokenKind::Star | TokenKind::Slash | TokenKind::Percent => Some(Precedence::Factor),
            _ => None,
        }
    }
}

pub struct Parser<'p> {
    tokens: Vec<Token>,
    current: usize,
    program: &'p mut Program,
    module: ModuleId,
    module_name: String,
    diagnostics: Diagnostics,
}

impl<'p> Parser<'p> {
    pub fn new(
        tokens: Vec<Token>,
        program: &'p mut Program,
        module: ModuleId,
        module_name: &str,
    ) -> Self {
        Self {
            tokens,
            current: 0,
            program,
            module,
            module_name: module_name.to_string(),
            diagnostics: Diagnostics::new(),
        }
    }

    fn span_from_token(token: &Token) -> SourceSpan {
        let len = token.lexeme.chars().count().max(1);
        SourceSpan::new(
            token.line,
            token.column,
            token.line,
            token.column + len.saturating_sub(1),
        )
    }

    fn node(&mut self, kind: NodeKind, span: SourceSpan) -> NodeId {
        self.program.alloc(self.module, kind, span)
    }

    fn span_of(&self, id: NodeId) -> SourceSpan {
        self.program.span(id)
    }

    fn union_spans(a: &SourceSpan, b: &SourceSpan) -> SourceSpan {
        SourceSpan::union(a, b)
    }

    /// Parses the whole token stream and returns the module root node.
    pub fn parse(&mut self) -> Result<NodeId> {
        let mut statements = Vec::new();

        while !self.is_at_end() {
            self.skip_newlines();
            if self.is_at_end() {
                break;
            }
            let statement = self.parse_statement()?;
            statements.push(statement);
        }

        let span = match (statements.first(), statements.last()) {
            (Some(first), Some(last)) => {
                Self::union_spans(&self.span_of(*first), &self.span_of(*last))
            }
            _ => SourceSpan::default(),
        };
        let name = self.module_name.clone();
        Ok(self.node(NodeKind::Module(ModuleNode { name, statements }), span))
    }

    pub fn into_diagnostics(self) -> Diagnostics {
        self.diagnostics
    }

    fn parse_statement(&mut self) -> Result<NodeId> {
        match self.peek_kind() {
            TokenKind::At => self.parse_decorated(),
            TokenKind::Keyword(Keyword::Def) => self.parse_function(Vec::new()),
            TokenKind::Keyword(Keyword::Class) => self.parse_class(Vec::new()),
            TokenKind::Keyword(Keyword::If) => self.parse_conditional(),
            TokenKind::Keyword(Keyword::While) => self.parse_while(),
            TokenKind::Keyword(Keyword::For) => self.parse_for(),
            TokenKind::Keyword(Keyword::Return) => self.parse_return(),
            TokenKind::Keyword(Keyword::Import) => self.parse_import(),
            TokenKind::Keyword(Keyword::Pass) => {
                let token = self.advance().clone();
                self.expect_newline("expected newline after pass")?;
                Ok(self.node(NodeKind::Pass, Self::span_from_token(&token)))
            }
            _ => self.parse_simple_statement(),
        }
    }

    fn parse_decorated(&mut self) -> Result<NodeId> {
        let mut decorators = Vec::new();
        while matches!(self.peek_kind(), TokenKind::At) {
            self.advance(); // consume '@'
            let decorator = self.parse_expression_with(default_expression_terminator)?;
            decorators.push(decorator);
            self.expect_newline("expected newline after decorator")?;
        }

        match self.peek_kind().clone() {
            TokenKind::Keyword(Keyword::Def) => self.parse_function(decorators),
            TokenKind::Keyword(Keyword::Class) => self.parse_class(decorators),
            other => {
                let span = Self::span_from_token(&self.peek().clone());
                self.diagnostics.error(
                    span,
                    format!("expected 'def' or 'class' after decorator, found {:?}", other),
                );
                bail!("decorator without definition");
            }
        }
    }

    fn parse_function(&mut self, decorators: Vec<NodeId>) -> Result<NodeId> {
        let def_token = self.advance().clone(); // consume 'def'
        let name_token = self.peek().clone();
        let name_span = Self::span_from_token(&name_token);
        let name = match &name_token.kind {
            TokenKind::Identifier => {
                self.advance();
                name_token.lexeme
            }
            _ => bail!(
                "expected function name after 'def' at line {}, column {}",
                name_token.line,
                name_token.column
            ),
        };

        let lparen_token = self.peek().clone();
        if !matches!(lparen_token.kind, TokenKind::LParen) {
            let span = Self::span_from_token(&lparen_token);
            self.diagnostics
                .error(span, "expected '(' after function name");
            bail!("missing function parameter list");
        }
        self.advance(); // consume '('
        let parameters = self.parse_parameters(TokenKind::RParen)?;

        let return_annotation = if matches!(self.peek_kind(), TokenKind::Arrow) {
            self.advance();
            Some(self.parse_expression_with(default_expression_terminator)?)
        } else {
            None
        };

        self.expect_newline("expected newline after function signature")?;
        let body = self.parse_block_until(&[Keyword::End])?;
        let end_token = self.peek().clone();
        self.expect_keyword(Keyword::End, "expected 'end' to close function")?;
        self.expect_newline("expected newline after function end")?;

        let span = Self::union_spans(
            &Self::span_from_token(&def_token),
            &Self::span_from_token(&end_token),
        );
        Ok(self.node(
            NodeKind::Function(FunctionDefinition {
                name,
                name_span,
                decorators,
                parameters,
                return_annotation,
                body,
            }),
            span,
        ))
    }

    /// Parameter list up to and including `closing`.
    fn parse_parameters(&mut self, closing: TokenKind) -> Result<Vec<NodeId>> {
        let mut parameters = Vec::new();

        loop {
            self.skip_newlines();
            if std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(&closing) {
                self.advance();
                return Ok(parameters);
            }

            parameters.push(self.parse_parameter()?);

            self.skip_newlines();
            match self.peek_kind().clone() {
                TokenKind::Comma => {
                    self.advance();
                }
                kind if std::mem::discriminant(&kind) == std::mem::discriminant(&closing) => {}
                other => {
                    let span = Self::span_from_token(&self.peek().clone());
                    self.diagnostics.error(
                        span,
                        format!("expected ',' or closing delimiter in parameters, found {:?}", other),
                    );
                    bail!("invalid parameter separator");
                }
            }
        }
    }

    fn parse_parameter(&mut self) -> Result<NodeId> {
        let first = self.advance().clone();
        let first_span = Self::span_from_token(&first);
        let (syntax, name, elements, mut span) = match first.kind {
            TokenKind::Star => match self.peek_kind() {
                TokenKind::Identifier => {
                    let name_token = self.advance().clone();
                    let span =
                        Self::union_spans(&first_span, &Self::span_from_token(&name_token));
                    (ParameterSyntax::Star, Some(name_token.lexeme), Vec::new(), span)
                }
                _ => (ParameterSyntax::KeywordOnlyMarker, None, Vec::new(), first_span),
            },
            TokenKind::DoubleStar => {
                let name_token = self.advance().clone();
                if !matches!(name_token.kind, TokenKind::Identifier) {
                    bail!(
                        "expected parameter name after '**' at line {}, column {}",
                        name_token.line,
                        name_token.column
                    );
                }
                let span = Self::union_spans(&first_span, &Self::span_from_token(&name_token));
                (ParameterSyntax::DoubleStar, Some(name_token.lexeme), Vec::new(), span)
            }
            TokenKind::LParen => {
                let elements = self.parse_parameters(TokenKind::RParen)?;
                let closing = self.tokens[self.current - 1].clone();
                let span = Self::union_spans(&first_span, &Self::span_from_token(&closing));
                (ParameterSyntax::Tuple, None, elements, span)
            }
            TokenKind::Identifier => (ParameterSyntax::Plain, Some(first.lexeme), Vec::new(), first_span),
            other => {
                self.diagnostics.error(
                    first_span,
                    format!("unexpected {:?} in parameter list", other),
                );
                bail!(
                    "invalid parameter at line {}, column {}",
                    first.line,
                    first.column
                );
            }
        };

        let annotation = if matches!(self.peek_kind(), TokenKind::Colon) {
            self.advance(); // consume ':'
            let annotation = self.parse_expression_prec(Precedence::Lowest, terminator_parameter)?;
            span = Self::union_spans(&span, &self.span_of(annotation));
            Some(annotation)
        } else {
            None
        };

        let default = if matches!(self.peek_kind(), TokenKind::Equal) {
            self.advance(); // consume '='
            let default = self.parse_expression_prec(Precedence::Lowest, terminator_parameter)?;
            span = Self::union_spans(&span, &self.span_of(default));
            Some(default)
        } else {
            None
        };

        Ok(self.node(
            NodeKind::Parameter(ParameterNode {
                name,
                syntax,
                annotation,
                default,
                elements,
            }),
            span,
        ))
    }

    fn parse_class(&mut self, decorators: Vec<NodeId>) -> Result<NodeId> {
        let class_token = self.advance().clone(); // consume 'class'
        let name_token = self.peek().clone();
        let name_span = Self::span_from_token(&name_token);
        let name = match &name_token.kind {
            TokenKind::Identifier => {
                self.advance();
                name_token.lexeme
            }
            _ => bail!(
                "expected class name after 'class' at line {}, column {}",
                name_token.line,
                name_token.column
            ),
        };

        let mut bases = Vec::new();
        if matches!(self.peek_kind(), TokenKind::LParen) {
            self.advance(); // consume '('
            loop {
                self.skip_newlines();
                if matches!(self.peek_kind(), TokenKind::RParen) {
                    self.advance();
                    break;
                }
                bases.push(self.parse_expression_prec(Precedence::Lowest, terminator_comma_or_rparen)?);
                if matches!(self.peek_kind(), TokenKind::Comma) {
                    self.advance();
                }
            }
        }

        self.expect_newline("expected newline after class header")?;
        let body = self.parse_block_until(&[Keyword::End])?;
        let end_token = self.peek().clone();
        self.expect_keyword(Keyword::End, "expected 'end' to close class")?;
        self.expect_newline("expected newline after class end")?;

        let span = Self::union_spans(
            &Self::span_from_token(&class_token),
            &Self::span_from_token(&end_token),
        );
        Ok(self.node(
            NodeKind::Class(ClassDefinition {
                name,
                name_span,
                decorators,
                bases,
                body,
            }),
            span,
        ))
    }

    /// `if`/`elif`/`else` chain; an `elif` becomes a nested `if` in the else branch
    /// and shares the single closing `end`.
    fn parse_conditional(&mut self) -> Result<NodeId> {
        let keyword_token = self.advance().clone(); // consume 'if' or 'elif'
        let condition = self.parse_expression_with(default_expression_terminator)?;
        self.expect_newline("expected newline after conditional header")?;
        let then_body = self.parse_block_until(&[Keyword::Elif, Keyword::Else, Keyword::End])?;

        let else_body = if self.check_keyword(Keyword::Elif) {
            let nested = self.parse_conditional()?;
            let span = Self::union_spans(&Self::span_from_token(&keyword_token), &self.span_of(nested));
            let node = self.node(
                NodeKind::If(IfStatement {
                    condition,
                    then_body,
                    else_body: vec![nested],
                }),
                span,
            );
            return Ok(node);
        } else if self.check_keyword(Keyword::Else) {
            self.advance(); // consume 'else'
            self.expect_newline("expected newline after else")?;
            self.parse_block_until(&[Keyword::End])?
        } else {
            Vec::new()
        };

        let end_token = self.peek().clone();
        self.expect_keyword(Keyword::End, "expected 'end' to close conditional")?;
        self.expect_newline("expected newline after conditional end")?;

        let span = Self::union_spans(
            &Self::span_from_token(&keyword_token),
            &Self::span_from_token(&end_token),
        );
        Ok(self.node(
            NodeKind::If(IfStatement {
                condition,
                then_body,
                else_body,
            }),
            span,
        ))
    }

    fn parse_while(&mut self) -> Result<NodeId> {
        let while_token = self.advance().clone(); // consume 'while'
        let condition = self.parse_expression_with(default_expression_terminator)?;
        self.expect_newline("expected newline after loop header")?;
        let body = self.parse_block_until(&[Keyword::End])?;
        let end_token = self.peek().clone();
        self.expect_keyword(Keyword::End, "expected 'end' to close loop")?;
        self.expect_newline("expected newline after loop end")?;

        let span = Self::union_spans(
            &Self::span_from_token(&while_token),
            &Self::span_from_token(&end_token),
        );
        Ok(self.node(NodeKind::While(WhileStatement { condition, body }), span))
    }

    fn parse_for(&mut self) -> Result<NodeId> {
        let for_token = self.advance().clone(); // consume 'for'
        let target = self.parse_expression_list(terminator_keyword_in)?;
        self.expect_keyword(Keyword::In, "expected 'in' in for loop")?;
        let iterable = self.parse_expression_with(default_expression_terminator)?;
        self.expect_newline("expected newline after for loop header")?;

        let body = self.parse_block_until(&[Keyword::End])?;
        let end_token = self.peek().clone();
        self.expect_keyword(Keyword::End, "expected 'end' to close for loop")?;
        self.expect_newline("expected newline after for loop end")?;

        let span = Self::union_spans(
            &Self::span_from_token(&for_token),
            &Self::span_from_token(&end_token),
        );
        Ok(self.node(
            NodeKind::For(ForStatement {
                target,
                iterable,
                body,
            }),
            span,
        ))
    }

    fn parse_return(&mut self) -> Result<NodeId> {
        let return_token = self.advance().clone(); // consume 'return'
        let mut span = Self::span_from_token(&return_token);
        let value = if default_expression_terminator(self.peek_kind()) {
            None
        } else {
            let value = self.parse_expression_list(default_expression_terminator)?;
            span = Self::union_spans(&span, &self.span_of(value));
            Some(value)
        };
        self.expect_newline("expected newline after return statement")?;
        Ok(self.node(NodeKind::Return(ReturnStatement { value }), span))
    }

    fn parse_import(&mut self) -> Result<NodeId> {
        let import_token = self.advance().clone(); // consume 'import'
        let name_token = self.peek().clone();
        if !matches!(name_token.kind, TokenKind::Identifier) {
            let span = Self::span_from_token(&name_token);
            self.diagnostics
                .error(span, "expected module name after 'import'");
            bail!("invalid import");
        }
        self.advance();
        self.expect_newline("expected newline after import")?;
        let span = Self::union_spans(
            &Self::span_from_token(&import_token),
            &Self::span_from_token(&name_token),
        );
        Ok(self.node(
            NodeKind::Import(ImportStatement {
                name: name_token.lexeme,
            }),
            span,
        ))
    }

    /// Expression statement, plain assignment or annotated assignment.
    fn parse_simple_statement(&mut self) -> Result<NodeId> {
        let first = self.parse_expression_list(terminator_statement)?;

        let annotation = if matches!(self.peek_kind(), TokenKind::Colon) {
            if !matches!(self.program.kind(first), Some(NodeKind::Name(_))) {
                let span = self.span_of(first);
                self.diagnostics
                    .error(span, "only simple names can be annotated");
                bail!("invalid annotation target");
            }
            self.advance(); // consume ':'
            Some(self.parse_expression_prec(Precedence::Lowest, terminator_statement)?)
        } else {
            None
        };

        if matches!(self.peek_kind(), TokenKind::Equal) {
            self.advance(); // consume '='
            self.ensure_assignable(first)?;
            let value = self.parse_expression_list(terminator_statement)?;
            self.expect_newline("expected newline after assignment")?;
            let span = Self::union_spans(&self.span_of(first), &self.span_of(value));
            return Ok(self.node(
                NodeKind::Assignment(AssignmentStatement {
                    target: first,
                    annotation,
                    value,
                }),
                span,
            ));
        }

        if annotation.is_some() {
            let span = self.span_of(first);
            self.diagnostics
                .error(span, "annotated name requires a value");
            bail!("annotation without value");
        }

        if let Err(err) = self.expect_newline("expected newline after expression") {
            let span = self.span_of(first);
            self.diagnostics
                .error(span, err.to_string());
            return Err(err);
        }
        let span = self.span_of(first);
        Ok(self.node(NodeKind::ExpressionStatement(first), span))
    }

    fn ensure_assignable(&mut self, target: NodeId) -> Result<()> {
        let assignable = match self.program.kind(target) {
            Some(NodeKind::Name(_) | NodeKind::Attribute(_) | NodeKind::Subscript(_)) => true,
            Some(NodeKind::Tuple(elements) | NodeKind::List(elements)) => {
                let elements = elements.clone();
                for element in elements {
                    self.ensure_assignable(element)?;
                }
                true
            }
            _ => false,
        };
        if !assignable {
            let span = self.span_of(target);
            self.diagnostics
                .error(span, "cannot assign to expression");
            bail!("invalid assignment target");
        }
        Ok(())
    }

    fn parse_block_until(&mut self, terminators: &[Keyword]) -> Result<Vec<NodeId>> {
        let mut statements = Vec::new();

        loop {
            self.skip_newlines();
            if self
                .peek_keyword()
                .map(|kw| terminators.contains(&kw))
                .unwrap_or(false)
            {
                break;
            }
            if self.is_at_end() {
                break;
            }
            statements.push(self.parse_statement()?);
        }

        Ok(statements)
    }

    /// `a` or `a, b, c` (an unparenthesised tuple).
    fn parse_expression_list(&mut self, terminator: fn(&TokenKind) -> bool) -> Result<NodeId> {
        let first = self.parse_expression_with(terminator)?;
        if !matches!(self.peek_kind(), TokenKind::Comma) {
            return Ok(first);
        }

        let mut elements = vec![first];
        while matches!(self.peek_kind(), TokenKind::Comma) {
            self.advance(); // consume ','
            if terminator(self.peek_kind()) || matches!(self.peek_kind(), TokenKind::Equal) {
                break;
            }
            elements.push(self.parse_expression_prec(Precedence::Lowest, terminator)?);
        }
        let span = Self::union_spans(&self.span_of(first), &self.span_of(elements[elements.len() - 1]));
        Ok(self.node(NodeKind::Tuple(elements), span))
    }

    fn parse_expression_with(&mut self, terminator: fn(&TokenKind) -> bool) -> Result<NodeId> {
        self.parse_expression_prec(Precedence::Lowest, terminator)
    }

    fn parse_expression_prec(
        &mut self,
        precedence: Precedence,
        terminator: fn(&TokenKind) -> bool,
    ) -> Result<NodeId> {
        let mut expr = self.parse_prefix_expression(terminator)?;

        loop {
            if self.is_at_end() || terminator(self.peek_kind()) {
                break;
            }

            match self.peek_kind() {
                TokenKind::LParen => {
                    expr = self.finish_call(expr)?;
                    continue;
                }
                TokenKind::LBracket => {
                    expr = self.finish_subscript(expr)?;
                    continue;
                }
                TokenKind::Dot => {
                    expr = self.finish_attribute(expr)?;
                    continue;
                }
                _ => {}
            }

            let next_precedence = match Precedence::of(self.peek_kind()) {
                Some(p) => p,
                None => break,
            };

            if precedence >= next_precedence {
                break;
            }

            expr = self.parse_infix_expression(expr, next_precedence, terminator)?;
        }

        Ok(expr)
    }

    fn parse_prefix_expression(&mut self, terminator: fn(&TokenKind) -> bool) -> Result<NodeId> {
        let token = self.advance().clone();
        let token_span = Self::span_from_token(&token);
        match token.kind {
            TokenKind::Identifier => Ok(self.node(NodeKind::Name(token.lexeme), token_span)),
            TokenKind::IntegerLiteral(value) => {
                Ok(self.node(NodeKind::Literal(Literal::Integer(value)), token_span))
            }
            TokenKind::FloatLiteral(value) => {
                Ok(self.node(NodeKind::Literal(Literal::Float(value)), token_span))
            }
            TokenKind::StringLiteral(value) => {
                Ok(self.node(NodeKind::Literal(Literal::String(value)), token_span))
            }
            TokenKind::BooleanLiteral(value) => {
                Ok(self.node(NodeKind::Literal(Literal::Boolean(value)), token_span))
            }
            TokenKind::Keyword(Keyword::None) => {
                Ok(self.node(NodeKind::Literal(Literal::None), token_span))
            }
            TokenKind::Keyword(Keyword::Yield) => {
                if terminator(self.peek_kind()) || matches!(self.peek_kind(), TokenKind::RParen) {
                    return Ok(self.node(NodeKind::Yield(None), token_span));
                }
                let value = self.parse_expression_prec(Precedence::Lowest, terminator)?;
                let span = Self::union_spans(&token_span, &self.span_of(value));
                Ok(self.node(NodeKind::Yield(Some(value)), span))
            }
            TokenKind::Minus | TokenKind::Plus => {
                let operator = if matches!(token.kind, TokenKind::Minus) {
                    UnaryOperator::Negative
                } else {
                    UnaryOperator::Positive
                };
                let operand = self.parse_expression_prec(Precedence::Unary, terminator)?;
                let span = Self::union_spans(&token_span, &self.span_of(operand));
                Ok(self.node(NodeKind::Unary(UnaryExpression { operator, operand }), span))
            }
            TokenKind::Keyword(Keyword::Not) => {
                // `not a == b` negates the comparison
                let operand = self.parse_expression_prec(Precedence::And, terminator)?;
                let span = Self::union_spans(&token_span, &self.span_of(operand));
                Ok(self.node(
                    NodeKind::Unary(UnaryExpression {
                        operator: UnaryOperator::Not,
                        operand,
                    }),
                    span,
                ))
            }
            TokenKind::LParen => self.parse_parenthesized(token_span),
            TokenKind::LBracket => self.parse_list_literal(token_span),
            TokenKind::LBrace => self.parse_dict_literal(token_span),
            other => {
                self.diagnostics.error(
                    token_span,
                    format!("unexpected token {:?}", other),
                );
                bail!(
                    "unexpected token {:?} at line {}, column {}",
                    other,
                    token.line,
                    token.column
                )
            }
        }
    }

    /// `( )`, `(expr)` or a tuple display `(a,)` / `(a, b)`.
    fn parse_parenthesized(&mut self, opening_span: SourceSpan) -> Result<NodeId> {
        let mut elements = Vec::new();
        let mut saw_comma = false;
        loop {
            self.skip_newlines();
            if matches!(self.peek_kind(), TokenKind::RParen) {
                break;
            }
            elements.push(self.parse_expression_prec(Precedence::Lowest, terminator_comma_or_rparen)?);
            self.skip_newlines();
            if matches!(self.peek_kind(), TokenKind::Comma) {
                self.advance();
                saw_comma = true;
            } else {
                break;
            }
        }
        let closing_token = self.peek().clone();
        self.expect_token(TokenKind::RParen, "expected ')' after expression")?;
        let span = Self::union_spans(&opening_span, &Self::span_from_token(&closing_token));

        if elements.len() == 1 && !saw_comma {
            return Ok(elements[0]);
        }
        Ok(self.node(NodeKind::Tuple(elements), span))
    }

    fn parse_list_literal(&mut self, opening_span: SourceSpan) -> Result<NodeId> {
        let mut elements = Vec::new();
        loop {
            self.skip_newlines();
            if matches!(self.peek_kind(), TokenKind::RBracket) {
                break;
            }
            elements.push(self.parse_expression_prec(Precedence::Lowest, terminator_comma_or_rbracket)?);
            self.skip_newlines();
            if matches!(self.peek_kind(), TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        let closing_token = self.peek().clone();
        self.expect_token(TokenKind::RBracket, "expected ']' to close list literal")?;
        let span = Self::union_spans(&opening_span, &Self::span_from_token(&closing_token));
        Ok(self.node(NodeKind::List(elements), span))
    }

    fn parse_dict_literal(&mut self, opening_span: SourceSpan) -> Result<NodeId> {
        let mut entries = Vec::new();
        loop {
            self.skip_newlines();
            if matches!(self.peek_kind(), TokenKind::RBrace) {
                break;
            }
            let key = self.parse_expression_prec(Precedence::Lowest, terminator_colon)?;
            self.expect_token(TokenKind::Colon, "expected ':' after dictionary key")?;
            self.skip_newlines();
            let value = self.parse_expression_prec(Precedence::Lowest, terminator_comma_or_rbrace)?;
            entries.push(DictEntry { key, value });
            self.skip_newlines();
            if matches!(self.peek_kind(), TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        let closing_token = self.peek().clone();
        self.expect_token(TokenKind::RBrace, "expected '}' to close dictionary literal")?;
        let span = Self::union_spans(&opening_span, &Self::span_from_token(&closing_token));
        Ok(self.node(NodeKind::Dict(entries), span))
    }

    fn parse_infix_expression(
        &mut self,
        left: NodeId,
        precedence: Precedence,
        terminator: fn(&TokenKind) -> bool,
    ) -> Result<NodeId> {
        let operator_token = self.advance().clone();
        let right = self.parse_expression_prec(precedence, terminator)?;
        let span = Self::union_spans(&self.span_of(left), &self.span_of(right));
        let kind = match operator_token.kind {
            TokenKind::Keyword(Keyword::And) => NodeKind::BoolOp(BoolOpExpression {
                operator: BoolOperator::And,
                left,
                right,
            }),
            TokenKind::Keyword(Keyword::Or) => NodeKind::BoolOp(BoolOpExpression {
                operator: BoolOperator::Or,
                left,
                right,
            }),
            ref other => NodeKind::Binary(BinaryExpression {
                operator: binary_operator_from_token(other)?,
                left,
                right,
            }),
        };
        Ok(self.node(kind, span))
    }

    fn finish_call(&mut self, callee: NodeId) -> Result<NodeId> {
        self.expect_token(TokenKind::LParen, "expected '(' to start argument list")?;
        let mut arguments = Vec::new();
        let mut saw_keyword = false;

        loop {
            self.skip_newlines();
            if matches!(self.peek_kind(), TokenKind::RParen) {
                break;
            }

            let argument = self.parse_argument()?;
            match self.program.kind(argument) {
                Some(NodeKind::Keyword(_) | NodeKind::DoubleStarred(_)) => saw_keyword = true,
                Some(NodeKind::Starred(_)) => {}
                _ if saw_keyword => {
                    let span = self.span_of(argument);
                    self.diagnostics.warning(
                        span,
                        "positional argument follows keyword argument",
                    );
                }
                _ => {}
            }
            arguments.push(argument);

            self.skip_newlines();
            match self.peek_kind().clone() {
                TokenKind::Comma => {
                    self.advance();
                }
                TokenKind::RParen => break,
                other => {
                    let span = Self::span_from_token(&self.peek().clone());
                    self.diagnostics.error(
                        span,
                        format!("expected ',' or ')' in argument list, found {:?}", other),
                    );
                    bail!("invalid argument separator");
                }
            }
        }

        let closing_token = self.peek().clone();
        self.expect_token(TokenKind::RParen, "expected ')' to close argument list")?;
        let span = Self::union_spans(&self.span_of(callee), &Self::span_from_token(&closing_token));
        Ok(self.node(NodeKind::Call(CallExpression { callee, arguments }), span))
    }

    /// `expr`, `name=expr`, `*expr` or `**expr`.
    fn parse_argument(&mut self) -> Result<NodeId> {
        let token = self.peek().clone();
        let token_span = Self::span_from_token(&token);
        match token.kind {
            TokenKind::Star | TokenKind::DoubleStar => {
                self.advance();
                let value =
                    self.parse_expression_prec(Precedence::Lowest, terminator_comma_or_rparen)?;
                let span = Self::union_spans(&token_span, &self.span_of(value));
                let kind = if matches!(token.kind, TokenKind::Star) {
                    NodeKind::Starred(value)
                } else {
                    NodeKind::DoubleStarred(value)
                };
                Ok(self.node(kind, span))
            }
            TokenKind::Identifier if matches!(self.peek_kind_at(1), Some(TokenKind::Equal)) => {
                self.advance(); // name
                self.advance(); // '='
                self.skip_newlines();
                let value =
                    self.parse_expression_prec(Precedence::Lowest, terminator_comma_or_rparen)?;
                let span = Self::union_spans(&token_span, &self.span_of(value));
                Ok(self.node(
                    NodeKind::Keyword(KeywordArgument {
                        name: token.lexeme,
                        value,
                    }),
                    span,
                ))
            }
            _ => self.parse_expression_prec(Precedence::Lowest, terminator_comma_or_rparen),
        }
    }

    fn finish_subscript(&mut self, object: NodeId) -> Result<NodeId> {
        self.expect_token(TokenKind::LBracket, "expected '[' for subscript")?;
        let mut indices = Vec::new();
        loop {
            self.skip_newlines();
            indices.push(self.parse_expression_prec(Precedence::Lowest, terminator_comma_or_rbracket)?);
            if matches!(self.peek_kind(), TokenKind::Comma) {
                self.advance();
                continue;
            }
            break;
        }
        let closing_token = self.peek().clone();
        self.expect_token(TokenKind::RBracket, "expected ']' after subscript")?;
        let closing_span = Self::span_from_token(&closing_token);

        let index = if indices.len() == 1 {
            indices[0]
        } else {
            let span = Self::union_spans(&self.span_of(indices[0]), &closing_span);
            self.node(NodeKind::Tuple(indices), span)
        };
        let span = Self::union_spans(&self.span_of(object), &closing_span);
        Ok(self.node(NodeKind::Subscript(SubscriptExpression { object, index }), span))
    }

    fn finish_attribute(&mut self, object: NodeId) -> Result<NodeId> {
        self.expect_token(TokenKind::Dot, "expected '.' for attribute access")?;
        let name_token = self.peek().clone();
        let name_span = Self::span_from_token(&name_token);
        let name = match name_token.kind {
            TokenKind::Identifier | TokenKind::Keyword(_) => {
                self.advance();
                name_token.lexeme
            }
            ref other => {
                bail!(
                    "expected identifier after '.', found {:?} at line {}, column {}",
                    other,
                    name_token.line,
                    name_token.column
                );
            }
        };

        let span = Self::union_spans(&self.span_of(object), &name_span);
        Ok(self.node(
            NodeKind::Attribute(AttributeExpression {
                object,
                name,
                name_span,
            }),
            span,
        ))
    }

    fn expect_newline(&mut self, message: &str) -> Result<()> {
        match self.peek_kind().clone() {
            TokenKind::Newline | TokenKind::Semicolon => {
                self.advance();
                self.skip_newlines();
                Ok(())
            }
            TokenKind::Eof => Ok(()),
            other => {
                let span = Self::span_from_token(&self.peek().clone());
                self.diagnostics
                    .error(span, format!("{} (found '{:?}')", message, other));
                bail!("{} at line {}", message, span.line);
            }
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword, message: &str) -> Result<()> {
        if self.check_keyword(keyword) {
            self.advance();
            Ok(())
        } else {
            let token = self.peek().clone();
            self.diagnostics
                .error_at(token.line, token.column, message);
            bail!(
                "{} at line {}, column {} (found '{}')",
                message,
                token.line,
                token.column,
                token.lexeme
            );
        }
    }

    fn expect_token(&mut self, expected: TokenKind, message: &str) -> Result<()> {
        if std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(&expected) {
            self.advance();
            Ok(())
        } else {
            let token = self.peek().clone();
            self.diagnostics
                .error_at(token.line, token.column, message);
            bail!(
                "{} at line {}, column {} (found '{}')",
                message,
                token.line,
                token.column,
                token.lexeme
            );
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Semicolon) {
            self.advance();
        }
    }

    fn check_keyword(&self, keyword: Keyword) -> bool {
        matches!(self.peek_keyword(), Some(kw) if kw == keyword)
    }

    fn peek_keyword(&self) -> Option<Keyword> {
        match self.peek_kind() {
            TokenKind::Keyword(kw) => Some(*kw),
            _ => None,
        }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.tokens[self.current].kind
    }

    fn peek_kind_at(&self, offset: usize) -> Option<TokenKind> {
        self.tokens
            .get(self.current + offset)
            .map(|token| token.kind.clone())
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        &self.tokens[self.current - 1]
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }
}

fn default_expression_terminator(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Newline
            | TokenKind::Semicolon
            | TokenKind::Eof
            | TokenKind::Keyword(Keyword::End)
            | TokenKind::Keyword(Keyword::Else)
    )
}

fn terminator_statement(kind: &TokenKind) -> bool {
    default_expression_terminator(kind) || matches!(kind, TokenKind::Equal | TokenKind::Colon)
}

fn terminator_parameter(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Comma | TokenKind::RParen | TokenKind::Equal | TokenKind::Eof
    )
}

fn terminator_comma_or_rparen(kind: &TokenKind) -> bool {
    matches!(kind, TokenKind::Comma | TokenKind::RParen | TokenKind::Eof)
}

fn terminator_comma_or_rbracket(kind: &TokenKind) -> bool {
    matches!(kind, TokenKind::Comma | TokenKind::RBracket | TokenKind::Eof)
}

fn terminator_comma_or_rbrace(kind: &TokenKind) -> bool {
    matches!(kind, TokenKind::Comma | TokenKind::RBrace | TokenKind::Eof)
}

fn terminator_colon(kind: &TokenKind) -> bool {
    matches!(kind, TokenKind::Colon | TokenKind::Eof)
}

fn terminator_keyword_in(kind: &TokenKind) -> bool {
    matches!(kind, TokenKind::Keyword(Keyword::In) | TokenKind::Eof)
}

fn binary_operator_from_token(kind: &TokenKind) -> Result<BinaryOperator> {
    let operator = match kind {
        TokenKind::Plus => BinaryOperator::Add,
        TokenKind::Minus => BinaryOperator::Subtract,
        TokenKind::Star => BinaryOperator::Multiply,
        TokenKind::Slash => BinaryOperator::Divide,
        TokenKind::Percent => BinaryOperator::Modulo,
        TokenKind::Pipe => BinaryOperator::BitOr,
        TokenKind::DoubleEqual => BinaryOperator::Equal,
        TokenKind::BangEqual => BinaryOperator::NotEqual,
        TokenKind::Greater => BinaryOperator::Greater,
        TokenKind::GreaterEqual => BinaryOperator::GreaterEqual,
        TokenKind::Less => BinaryOperator::Less,
        TokenKind::LessEqual => BinaryOperator::LessEqual,
        other => bail!("unsupported binary operator {:?}", other),
    };
    Ok(operator)
}

#[cfg(test)]
mod tests {
    use crate::ast::{NodeKind, ParameterSyntax};
    use crate::program::Program;

    fn first_statement(program: &Program) -> crate::ast::NodeId {
        let root = program.modules()[0].root;
        program.module_node(root).expect("module").statements[0]
    }

    #[test]
    fn parses_every_parameter_form() {
        let mut program = Program::new();
        let text = "def f(a, b: int = 1, (c, d), *args, e, **kwargs)\nend\n";
        program.add_module("m", text).expect("parse");
        let function = first_statement(&program);
        let definition = program.function_definition(function).expect("def");
        let syntaxes: Vec<_> = definition
            .parameters
            .iter()
            .map(|id| program.parameter(*id).expect("parameter").syntax)
            .collect();
        assert_eq!(
            syntaxes,
            vec![
                ParameterSyntax::Plain,
                ParameterSyntax::Plain,
                ParameterSyntax::Tuple,
                ParameterSyntax::Star,
                ParameterSyntax::Plain,
                ParameterSyntax::DoubleStar,
            ]
        );
        let tuple = program.parameter(definition.parameters[2]).expect("tuple");
        assert_eq!(tuple.elements.len(), 2);
    }

    #[test]
    fn parses_keyword_only_marker() {
        let mut program = Program::new();
        let text = "def f(a, *, b)\nend\n";
        program.add_module("m", text).expect("parse");
        let function = first_statement(&program);
        let definition = program.function_definition(function).expect("def");
        let marker = program.parameter(definition.parameters[1]).expect("marker");
        assert_eq!(marker.syntax, ParameterSyntax::KeywordOnlyMarker);
        assert!(marker.name.is_none());
    }

    #[test]
    fn parses_call_argument_kinds() {
        let mut program = Program::new();
        let text = "f(1, *xs, key=2, **opts)\n";
        program.add_module("m", text).expect("parse");
        let statement = first_statement(&program);
        let Some(NodeKind::ExpressionStatement(call)) = program.kind(statement) else {
            panic!("expected expression statement");
        };
        let Some(NodeKind::Call(call)) = program.kind(*call) else {
            panic!("expected call");
        };
        let kinds: Vec<&str> = call
            .arguments
            .iter()
            .map(|argument| match program.kind(*argument) {
                Some(NodeKind::Starred(_)) => "star",
                Some(NodeKind::DoubleStarred(_)) => "double-star",
                Some(NodeKind::Keyword(_)) => "keyword",
                _ => "positional",
            })
            .collect();
        assert_eq!(kinds, vec!["positional", "star", "keyword", "double-star"]);
    }

    #[test]
    fn elif_nests_inside_else_branch() {
        let mut program = Program::new();
        let text = "if a\n  x = 1\nelif b\n  x = 2\nelse\n  x = 3\nend\n";
        program.add_module("m", text).expect("parse");
        let statement = first_statement(&program);
        let Some(NodeKind::If(outer)) = program.kind(statement) else {
            panic!("expected if");
        };
        assert_eq!(outer.else_body.len(), 1);
        let Some(NodeKind::If(inner)) = program.kind(outer.else_body[0]) else {
            panic!("expected nested if");
        };
        assert_eq!(inner.else_body.len(), 1);
    }

    #[test]
    fn parses_tuple_unpacking_and_annotated_assignment() {
        let mut program = Program::new();
        let text = "a, b = 1, 2\nc: int = 3\n";
        program.add_module("m", text).expect("parse");
        let root = program.modules()[0].root;
        let statements = &program.module_node(root).expect("module").statements;
        let Some(NodeKind::Assignment(unpack)) = program.kind(statements[0]) else {
            panic!("expected assignment");
        };
        assert!(matches!(program.kind(unpack.target), Some(NodeKind::Tuple(e)) if e.len() == 2));
        assert!(matches!(program.kind(unpack.value), Some(NodeKind::Tuple(e)) if e.len() == 2));
        let Some(NodeKind::Assignment(annotated)) = program.kind(statements[1]) else {
            panic!("expected annotated assignment");
        };
        assert!(annotated.annotation.is_some());
    }

    #[test]
    fn rejects_assignment_to_call() {
        let mut program = Program::new();
        assert!(program.add_module("m", "f() = 1\n").is_err());
    }
}
