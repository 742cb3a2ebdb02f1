//! Boolean expressions for conditional branching
//!
//! Grammar, highest precedence first:
//!
//! ```text
//! primary    := '(' or ')' | STRING | NUMBER | 'true' | 'false' | 'null' | PATH
//! unary      := '!' unary | primary
//! comparison := unary (CMP unary)?
//! and        := comparison ('&&' comparison)*
//! or         := and ('||' and)*
//! CMP        := '==' | '!=' | '>' | '<' | '>=' | '<=' | 'contains' | 'startsWith' | 'endsWith'
//! ```
//!
//! Expressions are tokenized and parsed into an [`Expr`] tree; nothing is ever
//! executed. [`ExpressionEngine::evaluate`] maps every failure to `false`.

use std::fmt;

use serde_json::{Number, Value};
use thiserror::Error;
use tracing::warn;

use super::context::TemplateContext;
use super::path::{PathError, ValuePath};

/// Errors produced while tokenizing, parsing or evaluating an expression
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExpressionError {
    #[error("Expression is empty")]
    Empty,

    #[error("Unexpected character '{ch}' at offset {offset}")]
    UnexpectedCharacter { ch: char, offset: usize },

    #[error("Unterminated string literal starting at offset {offset}")]
    UnterminatedString { offset: usize },

    #[error("Invalid number '{text}' at offset {offset}")]
    InvalidNumber { text: String, offset: usize },

    #[error("Unknown token '{text}' at offset {offset}: {source}")]
    UnknownToken {
        text: String,
        offset: usize,
        #[source]
        source: PathError,
    },

    #[error("Expected {expected}, found {found} at offset {offset}")]
    UnexpectedToken {
        expected: &'static str,
        found: String,
        offset: usize,
    },

    #[error("Expected {expected}, found end of expression")]
    UnexpectedEnd { expected: &'static str },

    #[error("Expression nesting exceeds maximum depth of {max}")]
    TooDeep { max: usize },

    #[error("Path resolution failed: {0}")]
    Resolution(#[from] PathError),
}

/// Deepest expression tree the parser accepts
pub const MAX_DEPTH: usize = 64;

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Contains,
    StartsWith,
    EndsWith,
}

impl CompareOp {
    /// Apply the operator; type mismatches yield `false`
    pub fn apply(&self, left: &Value, right: &Value) -> bool {
        match self {
            Self::Eq => strict_equals(left, right),
            Self::Ne => !strict_equals(left, right),
            Self::Gt => compare_numbers(left, right, |a, b| a > b),
            Self::Lt => compare_numbers(left, right, |a, b| a < b),
            Self::Ge => compare_numbers(left, right, |a, b| a >= b),
            Self::Le => compare_numbers(left, right, |a, b| a <= b),
            Self::Contains => contains(left, right),
            Self::StartsWith => match (left.as_str(), right.as_str()) {
                (Some(l), Some(r)) => l.starts_with(r),
                _ => false,
            },
            Self::EndsWith => match (left.as_str(), right.as_str()) {
                (Some(l), Some(r)) => l.ends_with(r),
                _ => false,
            },
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Contains => "contains",
            Self::StartsWith => "startsWith",
            Self::EndsWith => "endsWith",
        }
    }
}

/// Logical connectives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Path(ValuePath),
    Not(Box<Expr>),
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    /// Evaluate to a boolean using truthiness for non-boolean results
    pub fn evaluate(&self, context: &TemplateContext) -> Result<bool, ExpressionError> {
        Ok(is_truthy(&self.value(context)?))
    }

    fn value(&self, context: &TemplateContext) -> Result<Value, ExpressionError> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Path(path) => Ok(path.resolve(context)?.cloned().unwrap_or(Value::Null)),
            Self::Not(inner) => Ok(Value::Bool(!inner.evaluate(context)?)),
            Self::Compare { op, left, right } => {
                let left = left.value(context)?;
                let right = right.value(context)?;
                Ok(Value::Bool(op.apply(&left, &right)))
            }
            Self::Logical { op, left, right } => {
                let left = left.evaluate(context)?;
                let result = match op {
                    LogicalOp::And => left && right.evaluate(context)?,
                    LogicalOp::Or => left || right.evaluate(context)?,
                };
                Ok(Value::Bool(result))
            }
        }
    }

    /// Height of the tree; a bare value has depth 1
    pub fn depth(&self) -> usize {
        match self {
            Self::Literal(_) | Self::Path(_) => 1,
            Self::Not(inner) => 1 + inner.depth(),
            Self::Compare { left, right, .. } | Self::Logical { left, right, .. } => {
                1 + left.depth().max(right.depth())
            }
        }
    }

    /// Paths referenced anywhere in the tree, left to right
    pub fn paths(&self) -> Vec<&ValuePath> {
        let mut paths = Vec::new();
        self.collect_paths(&mut paths);
        paths
    }

    fn collect_paths<'a>(&'a self, paths: &mut Vec<&'a ValuePath>) {
        match self {
            Self::Literal(_) => {}
            Self::Path(path) => paths.push(path),
            Self::Not(inner) => inner.collect_paths(paths),
            Self::Compare { left, right, .. } | Self::Logical { left, right, .. } => {
                left.collect_paths(paths);
                right.collect_paths(paths);
            }
        }
    }
}

/// Stateless parser and evaluator
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionEngine;

impl ExpressionEngine {
    /// Evaluate an expression; any parse or evaluation failure yields `false`
    pub fn evaluate(expression: &str, context: &TemplateContext) -> bool {
        match Self::try_evaluate(expression, context) {
            Ok(result) => result,
            Err(e) => {
                warn!(expression = %expression, error = %e, "Expression evaluation failed, treating as false");
                false
            }
        }
    }

    /// Evaluate an expression, surfacing the failure reason
    pub fn try_evaluate(
        expression: &str,
        context: &TemplateContext,
    ) -> Result<bool, ExpressionError> {
        Self::parse(expression)?.evaluate(context)
    }

    /// Parse an expression into a tree without evaluating it
    pub fn parse(expression: &str) -> Result<Expr, ExpressionError> {
        let tokens = Lexer::new(expression).tokenize()?;
        if tokens.is_empty() {
            return Err(ExpressionError::Empty);
        }

        let mut parser = Parser {
            tokens,
            pos: 0,
            nesting: 0,
        };
        let expr = parser.parse_or()?;

        match parser.peek() {
            None => Ok(expr),
            Some(token) => Err(ExpressionError::UnexpectedToken {
                expected: "end of expression",
                found: token.kind.to_string(),
                offset: token.offset,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Value semantics
// ---------------------------------------------------------------------------

/// JavaScript-like truthiness
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare_numbers<F>(a: &Value, b: &Value, f: F) -> bool
where
    F: Fn(f64, f64) -> bool,
{
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => f(x, y),
            _ => false,
        },
        _ => false,
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => needle.as_str().is_some_and(|n| s.contains(n)),
        Value::Array(items) => items.iter().any(|item| strict_equals(item, needle)),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Literal(Value),
    Path(ValuePath),
    Compare(CompareOp),
    And,
    Or,
    Not,
    OpenParen,
    CloseParen,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => write!(f, "{}", value),
            Self::Path(path) => write!(f, "{}", path),
            Self::Compare(op) => write!(f, "'{}'", op.symbol()),
            Self::And => write!(f, "'&&'"),
            Self::Or => write!(f, "'||'"),
            Self::Not => write!(f, "'!'"),
            Self::OpenParen => write!(f, "'('"),
            Self::CloseParen => write!(f, "')'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

struct Lexer {
    input: Vec<char>,
    pos: usize,
}

fn is_word_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '$' | '-' | '.' | '[' | ']')
}

impl Lexer {
    fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
        }
    }

    fn tokenize(&mut self) -> Result<Vec<Token>, ExpressionError> {
        let mut tokens = Vec::new();

        loop {
            while self.current().is_some_and(char::is_whitespace) {
                self.pos += 1;
            }

            let Some(ch) = self.current() else {
                break;
            };
            tokens.push(self.next_token(ch)?);
        }

        Ok(tokens)
    }

    fn current(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.input.get(self.pos + 1).copied()
    }

    fn next_token(&mut self, ch: char) -> Result<Token, ExpressionError> {
        let offset = self.pos;
        let token = |kind| Token { kind, offset };

        match ch {
            '(' => {
                self.pos += 1;
                Ok(token(TokenKind::OpenParen))
            }
            ')' => {
                self.pos += 1;
                Ok(token(TokenKind::CloseParen))
            }
            '"' | '\'' => self.read_string(ch).map(|s| token(TokenKind::Literal(Value::String(s)))),
            '=' | '!' | '>' | '<' | '&' | '|' => self.read_operator(ch).map(token),
            c if c.is_ascii_digit() => self.read_number().map(token),
            '-' if self.peek_next().is_some_and(|c| c.is_ascii_digit()) => {
                self.read_number().map(token)
            }
            c if is_word_start(c) => self.read_word().map(token),
            c => Err(ExpressionError::UnexpectedCharacter { ch: c, offset }),
        }
    }

    fn read_operator(&mut self, ch: char) -> Result<TokenKind, ExpressionError> {
        let offset = self.pos;
        let next = self.peek_next();

        let (kind, width) = match (ch, next) {
            ('=', Some('=')) => (TokenKind::Compare(CompareOp::Eq), 2),
            ('!', Some('=')) => (TokenKind::Compare(CompareOp::Ne), 2),
            ('!', _) => (TokenKind::Not, 1),
            ('>', Some('=')) => (TokenKind::Compare(CompareOp::Ge), 2),
            ('>', _) => (TokenKind::Compare(CompareOp::Gt), 1),
            ('<', Some('=')) => (TokenKind::Compare(CompareOp::Le), 2),
            ('<', _) => (TokenKind::Compare(CompareOp::Lt), 1),
            ('&', Some('&')) => (TokenKind::And, 2),
            ('|', Some('|')) => (TokenKind::Or, 2),
            _ => return Err(ExpressionError::UnexpectedCharacter { ch, offset }),
        };

        self.pos += width;
        Ok(kind)
    }

    fn read_string(&mut self, quote: char) -> Result<String, ExpressionError> {
        let offset = self.pos;
        self.pos += 1;
        let mut value = String::new();

        while let Some(c) = self.current() {
            self.pos += 1;
            match c {
                c if c == quote => return Ok(value),
                '\\' => {
                    let escaped = self
                        .current()
                        .ok_or(ExpressionError::UnterminatedString { offset })?;
                    self.pos += 1;
                    value.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        other => other,
                    });
                }
                c => value.push(c),
            }
        }

        Err(ExpressionError::UnterminatedString { offset })
    }

    fn read_number(&mut self) -> Result<TokenKind, ExpressionError> {
        let offset = self.pos;
        if self.current() == Some('-') {
            self.pos += 1;
        }
        while self
            .current()
            .is_some_and(|c| c.is_ascii_digit() || c == '.')
        {
            self.pos += 1;
        }
        if matches!(self.current(), Some('e' | 'E')) {
            self.pos += 1;
            if matches!(self.current(), Some('+' | '-')) {
                self.pos += 1;
            }
            while self.current().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }

        let text: String = self.input[offset..self.pos].iter().collect();
        let invalid = || ExpressionError::InvalidNumber {
            text: text.clone(),
            offset,
        };

        // `5abc` is neither a number nor a path
        if self.current().is_some_and(is_word_char) {
            return Err(invalid());
        }

        let number = if let Ok(int) = text.parse::<i64>() {
            Number::from(int)
        } else {
            text.parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .ok_or_else(invalid)?
        };

        Ok(TokenKind::Literal(Value::Number(number)))
    }

    fn read_word(&mut self) -> Result<TokenKind, ExpressionError> {
        let offset = self.pos;
        while self.current().is_some_and(is_word_char) {
            self.pos += 1;
        }
        let text: String = self.input[offset..self.pos].iter().collect();

        let kind = match text.as_str() {
            "true" => TokenKind::Literal(Value::Bool(true)),
            "false" => TokenKind::Literal(Value::Bool(false)),
            "null" => TokenKind::Literal(Value::Null),
            "contains" => TokenKind::Compare(CompareOp::Contains),
            "startsWith" => TokenKind::Compare(CompareOp::StartsWith),
            "endsWith" => TokenKind::Compare(CompareOp::EndsWith),
            _ => {
                let path = ValuePath::parse(&text).map_err(|source| {
                    ExpressionError::UnknownToken {
                        text: text.clone(),
                        offset,
                        source,
                    }
                })?;
                TokenKind::Path(path)
            }
        };

        Ok(kind)
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    nesting: usize,
}

impl Parser {
    fn enter(&mut self) -> Result<(), ExpressionError> {
        self.nesting += 1;
        if self.nesting > MAX_DEPTH {
            return Err(ExpressionError::TooDeep { max: MAX_DEPTH });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.nesting -= 1;
    }

    /// Reject nodes whose subtree would exceed `MAX_DEPTH`
    fn node(&self, expr: Expr) -> Result<Expr, ExpressionError> {
        if expr.depth() > MAX_DEPTH {
            return Err(ExpressionError::TooDeep { max: MAX_DEPTH });
        }
        Ok(expr)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_or(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_and()?;

        while self.peek().is_some_and(|t| t.kind == TokenKind::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = self.node(Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            })?;
        }

        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_comparison()?;

        while self.peek().is_some_and(|t| t.kind == TokenKind::And) {
            self.pos += 1;
            let right = self.parse_comparison()?;
            left = self.node(Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            })?;
        }

        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExpressionError> {
        let left = self.parse_unary()?;

        let op = match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Compare(op)) => *op,
            _ => return Ok(left),
        };
        self.pos += 1;

        let right = self.parse_unary()?;
        self.node(Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.peek().is_some_and(|t| t.kind == TokenKind::Not) {
            self.pos += 1;
            self.enter()?;
            let inner = self.parse_unary()?;
            self.leave();
            return self.node(Expr::Not(Box::new(inner)));
        }

        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        let token = self
            .advance()
            .ok_or(ExpressionError::UnexpectedEnd { expected: "a value" })?;

        match token.kind {
            TokenKind::Literal(value) => Ok(Expr::Literal(value)),
            TokenKind::Path(path) => Ok(Expr::Path(path)),
            TokenKind::OpenParen => {
                self.enter()?;
                let inner = self.parse_or()?;
                self.leave();
                match self.advance() {
                    Some(Token {
                        kind: TokenKind::CloseParen,
                        ..
                    }) => Ok(inner),
                    Some(other) => Err(ExpressionError::UnexpectedToken {
                        expected: "')'",
                        found: other.kind.to_string(),
                        offset: other.offset,
                    }),
                    None => Err(ExpressionError::UnexpectedEnd { expected: "')'" }),
                }
            }
            other => Err(ExpressionError::UnexpectedToken {
                expected: "a value",
                found: other.to_string(),
                offset: token.offset,
            }),
        }
    }
}
