use anyhow::{bail, Context, Result};

use crate::source::SourceFile;

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub line: usize,
    pub column: usize,
}

impl Token {
    fn new(kind: TokenKind, lexeme: String, line: usize, column: usize) -> Self {
        Self {
            kind,
            lexeme,
            line,
            column,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Identifier,
    IntegerLiteral(i64),
    FloatLiteral(f64),
    StringLiteral(String),
    BooleanLiteral(bool),
    Keyword(Keyword),
    Newline,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Colon,
    Semicolon,
    Equal,
    DoubleEqual,
    BangEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    Percent,
    Pipe,
    Arrow, // ->
    At,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Def,
    Class,
    End,
    Return,
    Yield,
    If,
    Elif,
    Else,
    While,
    For,
    In,
    And,
    Or,
    Not,
    Import,
    Pass,
    None,
}

pub struct Lexer<'a> {
    input: &'a str,
    position: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a SourceFile) -> Self {
        Self {
            input: &source.contents,
            position: 0,
            line: 1,
            column: 1,
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();

        while let Some(ch) = self.peek_char() {
            match ch {
                ' ' | '\t' => {
                    self.advance_char();
                }
                '\r' | '\n' => {
                    self.advance_char();
                    tokens.push(self.make_newline_token());
                }
                '\\' if matches!(self.peek_next_char(), Some('\n' | '\r')) => {
                    // explicit line continuation
                    self.advance_char();
                    self.advance_char();
                }
                '#' => {
                    self.skip_comment();
                }
                '"' | '\'' => {
                    let token = self.lex_string(ch)?;
                    tokens.push(token);
                }
                '0'..='9' => {
                    let token = self.lex_number()?;
                    tokens.push(token);
                }
                'a'..='z' | 'A'..='Z' | '_' => {
                    tokens.push(self.lex_identifier_or_keyword());
                }
                '(' => tokens.push(self.simple_token(TokenKind::LParen)),
                ')' => tokens.push(self.simple_token(TokenKind::RParen)),
                '{' => tokens.push(self.simple_token(TokenKind::LBrace)),
                '}' => tokens.push(self.simple_token(TokenKind::RBrace)),
                '[' => tokens.push(self.simple_token(TokenKind::LBracket)),
                ']' => tokens.push(self.simple_token(TokenKind::RBracket)),
                ',' => tokens.push(self.simple_token(TokenKind::Comma)),
                ';' => tokens.push(self.simple_token(TokenKind::Semicolon)),
                ':' => tokens.push(self.simple_token(TokenKind::Colon)),
                '.' => tokens.push(self.simple_token(TokenKind::Dot)),
                '@' => tokens.push(self.simple_token(TokenKind::At)),
                '|' => tokens.push(self.simple_token(TokenKind::Pipe)),
                '/' => tokens.push(self.simple_token(TokenKind::Slash)),
                '%' => tokens.push(self.simple_token(TokenKind::Percent)),
                '+' => tokens.push(self.simple_token(TokenKind::Plus)),
                '=' => tokens.push(self.lex_pair('=', TokenKind::DoubleEqual, TokenKind::Equal)),
                '>' => tokens.push(self.lex_pair(
                    '=',
                    TokenKind::GreaterEqual,
                    TokenKind::Greater,
                )),
                '<' => tokens.push(self.lex_pair('=', TokenKind::LessEqual, TokenKind::Less)),
                '*' => tokens.push(self.lex_pair('*', TokenKind::DoubleStar, TokenKind::Star)),
                '-' => tokens.push(self.lex_pair('>', TokenKind::Arrow, TokenKind::Minus)),
                '!' if self.peek_next_char() == Some('=') => {
                    tokens.push(self.lex_pair('=', TokenKind::BangEqual, TokenKind::BangEqual));
                }
                other => {
                    bail!(
                        "Unexpected character '{}' at line {}, column {}",
                        other,
                        self.line,
                        self.column
                    );
                }
            }
        }

        tokens.push(Token::new(
            TokenKind::Eof,
            String::new(),
            self.line,
            self.column,
        ));

        Ok(tokens)
    }

    fn make_newline_token(&self) -> Token {
        Token::new(
            TokenKind::Newline,
            "\n".to_string(),
            self.line.saturating_sub(1),
            1,
        )
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch == '\n' {
                break;
            }
            self.advance_char();
        }
    }

    fn lex_string(&mut self, quote: char) -> Result<Token> {
        let start = self.position;
        let start_line = self.line;
        let start_column = self.column;
        self.advance_char(); // consume opening quote

        let mut value = String::new();
        while let Some(ch) = self.peek_char() {
            match ch {
                c if c == quote => {
                    self.advance_char(); // consume closing quote
                    let lexeme = self.slice(start, self.position);
                    return Ok(Token::new(
                        TokenKind::StringLiteral(value),
                        lexeme.to_string(),
                        start_line,
                        start_column,
                    ));
                }
                '\\' => {
                    self.advance_char();
                    let escaped = self
                        .peek_char()
                        .context("Unterminated escape sequence in string literal")?;
                    let escaped_char = match escaped {
                        'n' => '\n',
                        'r' => '\r',
                        't' => '\t',
                        other => other,
                    };
                    value.push(escaped_char);
                    self.advance_char();
                }
                '\n' => {
                    bail!(
                        "Unterminated string literal starting at line {}, column {}",
                        start_line,
                        start_column
                    );
                }
                _ => {
                    value.push(ch);
                    self.advance_char();
                }
            }
        }

        bail!(
            "Unterminated string literal starting at line {}, column {}",
            start_line,
            start_column
        );
    }

    fn lex_number(&mut self) -> Result<Token> {
        let start = self.position;
        let start_line = self.line;
        let start_column = self.column;
        let mut is_float = false;

        self.advance_char(); // consume first digit

        while let Some(ch) = self.peek_char() {
            match ch {
                '0'..='9' | '_' => {
                    self.advance_char();
                }
                '.' => {
                    if is_float || !matches!(self.peek_next_char(), Some('0'..='9')) {
                        break;
                    }
                    is_float = true;
                    self.advance_char();
                }
                _ => break,
            }
        }

        let raw = self.slice(start, self.position).to_string();
        let digits = raw.replace('_', "");
        let kind = if is_float {
            let value = digits.parse::<f64>().with_context(|| {
                format!(
                    "Failed to parse float literal '{}' at line {}, column {}",
                    raw, start_line, start_column
                )
            })?;
            TokenKind::FloatLiteral(value)
        } else {
            let value = digits.parse::<i64>().with_context(|| {
                format!(
                    "Failed to parse integer literal '{}' at line {}, column {}",
                    raw, start_line, start_column
                )
            })?;
            TokenKind::IntegerLiteral(value)
        };
        Ok(Token::new(kind, raw, start_line, start_column))
    }

    fn lex_identifier_or_keyword(&mut self) -> Token {
        let start = self.position;
        let start_line = self.line;
        let start_column = self.column;
        self.advance_char();

        while let Some(ch) = self.peek_char() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                self.advance_char();
            } else {
                break;
            }
        }

        let lexeme = self.slice(start, self.position).to_string();
        let kind = if let Some(keyword) = keyword_from_lexeme(&lexeme) {
            TokenKind::Keyword(keyword)
        } else if lexeme == "True" {
            TokenKind::BooleanLiteral(true)
        } else if lexeme == "False" {
            TokenKind::BooleanLiteral(false)
        } else {
            TokenKind::Identifier
        };
        Token::new(kind, lexeme, start_line, start_column)
    }

    /// Lexes a one-character token that becomes `double` when followed by `second`.
    fn lex_pair(&mut self, second: char, double: TokenKind, single: TokenKind) -> Token {
        let start_line = self.line;
        let start_column = self.column;
        let start = self.position;
        self.advance_char();

        let kind = if self.peek_char() == Some(second) {
            self.advance_char();
            double
        } else {
            single
        };
        Token::new(
            kind,
            self.slice(start, self.position).to_string(),
            start_line,
            start_column,
        )
    }

    fn simple_token(&mut self, kind: TokenKind) -> Token {
        let start_line = self.line;
        let start_column = self.column;
        let start = self.position;
        self.advance_char();
        Token::new(
            kind,
            self.slice(start, self.position).to_string(),
            start_line,
            start_column,
        )
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn peek_next_char(&self) -> Option<char> {
        let mut iter = self.input[self.position..].chars();
        iter.next()?;
        iter.next()
    }

    fn advance_char(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.position += ch.len_utf8();
        if ch == '\r' || ch == '\n' {
            if ch == '\r' && self.peek_char() == Some('\n') {
                self.position += 1;
            }
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn slice(&self, start: usize, end: usize) -> &str {
        &self.input[start..end]
    }
}

fn keyword_from_lexeme(lexeme: &str) -> Option<Keyword> {
    match lexeme {
        "def" => Some(Keyword::Def),
        "class" => Some(Keyword::Class),
        "end" => Some(Keyword::End),
        "return" => Some(Keyword::Return),
        "yield" => Some(Keyword::Yield),
        "if" => Some(Keyword::If),
        "elif" => Some(Keyword::Elif),
        "else" => Some(Keyword::Else),
        "while" => Some(Keyword::While),
        "for" => Some(Keyword::For),
        "in" => Some(Keyword::In),
        "and" => Some(Keyword::And),
        "or" => Some(Keyword::Or),
        "not" => Some(Keyword::Not),
        "import" => Some(Keyword::Import),
        "pass" => Some(Keyword::Pass),
        "None" => Some(Keyword::None),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::source::SourceId;

    fn kinds(text: &str) -> Vec<TokenKind> {
        let source = SourceFile::new(SourceId(0), PathBuf::from("t.qk"), text.to_string());
        Lexer::new(&source)
            .tokenize()
            .expect("tokenize")
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn lexes_variadic_parameter_markers() {
        assert_eq!(
            kinds("def f(*a, **k) -> int"),
            vec![
                TokenKind::Keyword(Keyword::Def),
                TokenKind::Identifier,
                TokenKind::LParen,
                TokenKind::Star,
                TokenKind::Identifier,
                TokenKind::Comma,
                TokenKind::DoubleStar,
                TokenKind::Identifier,
                TokenKind::RParen,
                TokenKind::Arrow,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn distinguishes_float_from_attribute_access_on_integers() {
        assert_eq!(
            kinds("1.5 2.real"),
            vec![
                TokenKind::FloatLiteral(1.5),
                TokenKind::IntegerLiteral(2),
                TokenKind::Dot,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn reports_unterminated_strings() {
        let source = SourceFile::new(SourceId(0), PathBuf::from("t.qk"), "'abc\n".to_string());
        let error = Lexer::new(&source).tokenize().unwrap_err();
        assert!(error.to_string().contains("Unterminated string literal"));
    }
}
