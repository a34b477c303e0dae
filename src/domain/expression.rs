//! Expression Engine - Restricted Formula and Condition Evaluator
//!
//! Parses and evaluates the small language used by derived-instrument
//! formulas and alert conditions. The grammar is deliberately closed:
//!
//! ```text
//! expression := comparison EOF
//! comparison := additive ( ("<" | "<=" | ">" | ">=" | "==" | "!=") additive )?
//! additive   := term ( ("+" | "-") term )*
//! term       := unary ( ("*" | "/") unary )*
//! unary      := "-" unary | primary
//! primary    := NUMBER | IDENT | "(" comparison ")"
//! ```
//!
//! Identifiers are canonicalized with the same rules as cache keys. A
//! separator character only stays inside an identifier when the next
//! character continues the identifier, so `kucoin_BTC-USDT` is a single
//! variable while `a - b` is a subtraction.
//!
//! Evaluation is pure: it reads a variable namespace and never mutates it.
//! A variable missing from the namespace is an error, never zero.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use thiserror::Error;

use super::instrument::{canonicalize, is_separator};

/// Maximum nesting depth of parentheses and unary operators.
const MAX_DEPTH: usize = 64;

/// Maximum number of tokens. Binary chains are left-associative, so this
/// also bounds the depth of the tree walked by type checking and
/// evaluation.
const MAX_TOKENS: usize = 256;

/// Static type of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Number,
    Bool,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number => write!(f, "number"),
            Self::Bool => write!(f, "boolean"),
        }
    }
}

/// Result of evaluating an expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Number(f64),
    Bool(bool),
}

impl Value {
    pub const fn as_f64(self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(n),
            Self::Bool(_) => None,
        }
    }

    pub const fn as_bool(self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(b),
            Self::Number(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Rejected at registration time; nothing is registered.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("expression is empty")]
    Empty,
    #[error("unexpected character '{ch}' at position {position}")]
    UnexpectedChar { ch: char, position: usize },
    #[error("invalid number '{text}' at position {position}")]
    InvalidNumber { text: String, position: usize },
    #[error("unexpected '{found}' at position {position}")]
    UnexpectedToken { found: String, position: usize },
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
    #[error("expected a {expected} expression, found {found}")]
    TypeMismatch { expected: ValueType, found: ValueType },
    #[error("expression nests deeper than {0} levels")]
    TooDeep(usize),
    #[error("expression has more than {0} tokens")]
    TooLong(usize),
}

/// Raised while evaluating; the entity is skipped for this pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationError {
    #[error("variable '{0}' is not available")]
    MissingVariable(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("result is not a finite number")]
    NonFinite,
}

/// Read-only variable namespace consulted during evaluation.
pub trait Variables {
    /// Value bound to a canonical variable name.
    fn lookup(&self, name: &str) -> Option<f64>;
}

impl Variables for HashMap<String, f64> {
    fn lookup(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl Variables for BTreeMap<String, f64> {
    fn lookup(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CompareOp {
    fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
            #[allow(clippy::float_cmp)]
            Self::Eq => lhs == rhs,
            #[allow(clippy::float_cmp)]
            Self::Ne => lhs != rhs,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Number(f64),
    Variable(String),
    Neg(Box<Node>),
    Arith { op: ArithOp, lhs: Box<Node>, rhs: Box<Node> },
    Compare { op: CompareOp, lhs: Box<Node>, rhs: Box<Node> },
}

impl Node {
    fn value_type(&self) -> Result<ValueType, ValidationError> {
        match self {
            Self::Number(_) | Self::Variable(_) => Ok(ValueType::Number),
            Self::Neg(inner) => expect_type(inner, ValueType::Number),
            Self::Arith { lhs, rhs, .. } => {
                expect_type(lhs, ValueType::Number)?;
                expect_type(rhs, ValueType::Number)
            }
            Self::Compare { lhs, rhs, .. } => {
                expect_type(lhs, ValueType::Number)?;
                expect_type(rhs, ValueType::Number)?;
                Ok(ValueType::Bool)
            }
        }
    }

    fn collect_variables(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::Number(_) => {}
            Self::Variable(name) => {
                out.insert(name.clone());
            }
            Self::Neg(inner) => inner.collect_variables(out),
            Self::Arith { lhs, rhs, .. } | Self::Compare { lhs, rhs, .. } => {
                lhs.collect_variables(out);
                rhs.collect_variables(out);
            }
        }
    }

    fn eval<V: Variables + ?Sized>(&self, vars: &V) -> Result<Value, EvaluationError> {
        match self {
            Self::Number(n) => Ok(Value::Number(*n)),
            Self::Variable(name) => vars
                .lookup(name)
                .map(Value::Number)
                .ok_or_else(|| EvaluationError::MissingVariable(name.clone())),
            Self::Neg(inner) => Ok(Value::Number(-inner.eval_number(vars)?)),
            Self::Arith { op, lhs, rhs } => {
                let a = lhs.eval_number(vars)?;
                let b = rhs.eval_number(vars)?;
                let result = match op {
                    ArithOp::Add => a + b,
                    ArithOp::Sub => a - b,
                    ArithOp::Mul => a * b,
                    ArithOp::Div => {
                        if b == 0.0 {
                            return Err(EvaluationError::DivisionByZero);
                        }
                        a / b
                    }
                };
                if result.is_finite() {
                    Ok(Value::Number(result))
                } else {
                    Err(EvaluationError::NonFinite)
                }
            }
            Self::Compare { op, lhs, rhs } => {
                let a = lhs.eval_number(vars)?;
                let b = rhs.eval_number(vars)?;
                Ok(Value::Bool(op.apply(a, b)))
            }
        }
    }

    fn eval_number<V: Variables + ?Sized>(&self, vars: &V) -> Result<f64, EvaluationError> {
        match self.eval(vars)? {
            Value::Number(n) => Ok(n),
            // Type checking at parse time rules this out.
            Value::Bool(_) => Err(EvaluationError::NonFinite),
        }
    }
}

fn expect_type(node: &Node, expected: ValueType) -> Result<ValueType, ValidationError> {
    let found = node.value_type()?;
    if found == expected {
        Ok(found)
    } else {
        Err(ValidationError::TypeMismatch { expected, found })
    }
}

/// A parsed, type-checked expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Node,
    value_type: ValueType,
    variables: BTreeSet<String>,
}

impl Expression {
    /// Parse and type-check `text` without checking variable names.
    pub fn parse(text: &str) -> Result<Self, ValidationError> {
        let tokens = tokenize(text)?;
        if tokens.is_empty() {
            return Err(ValidationError::Empty);
        }
        let root = Parser::new(&tokens).parse()?;
        let value_type = root.value_type()?;
        let mut variables = BTreeSet::new();
        root.collect_variables(&mut variables);
        Ok(Self {
            source: text.trim().to_string(),
            root,
            value_type,
            variables,
        })
    }

    /// Parse `text` and require every variable to satisfy `is_known`.
    pub fn validate<F>(text: &str, is_known: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> bool,
    {
        let expr = Self::parse(text)?;
        if let Some(unknown) = expr.variables.iter().find(|name| !is_known(name)) {
            return Err(ValidationError::UnknownVariable(unknown.clone()));
        }
        Ok(expr)
    }

    /// Validate a numeric formula (derived instruments).
    pub fn formula<F>(text: &str, is_known: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> bool,
    {
        Self::validate(text, is_known)?.require(ValueType::Number)
    }

    /// Validate a boolean condition (alert rules).
    pub fn condition<F>(text: &str, is_known: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> bool,
    {
        Self::validate(text, is_known)?.require(ValueType::Bool)
    }

    fn require(self, expected: ValueType) -> Result<Self, ValidationError> {
        if self.value_type == expected {
            Ok(self)
        } else {
            Err(ValidationError::TypeMismatch {
                expected,
                found: self.value_type,
            })
        }
    }

    /// Evaluate against a variable namespace.
    pub fn evaluate<V: Variables + ?Sized>(&self, vars: &V) -> Result<Value, EvaluationError> {
        self.root.eval(vars)
    }

    /// Original (trimmed) text of the expression.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub const fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Canonical names of every referenced variable.
    pub const fn variables(&self) -> &BTreeSet<String> {
        &self.variables
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

// ── Tokenizer ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Compare(CompareOp),
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Ident(name) => f.write_str(name),
            Self::Plus => f.write_str("+"),
            Self::Minus => f.write_str("-"),
            Self::Star => f.write_str("*"),
            Self::Slash => f.write_str("/"),
            Self::LParen => f.write_str("("),
            Self::RParen => f.write_str(")"),
            Self::Compare(op) => f.write_str(match op {
                CompareOp::Lt => "<",
                CompareOp::Le => "<=",
                CompareOp::Gt => ">",
                CompareOp::Ge => ">=",
                CompareOp::Eq => "==",
                CompareOp::Ne => "!=",
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    position: usize,
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn tokenize(text: &str) -> Result<Vec<Token>, ValidationError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;

        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if tokens.len() == MAX_TOKENS {
            return Err(ValidationError::TooLong(MAX_TOKENS));
        }

        let next = chars.get(i + 1).copied();

        if c.is_ascii_digit() || (c == '.' && next.is_some_and(|n| n.is_ascii_digit())) {
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    i = j;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let literal: String = chars[start..i].iter().collect();
            let value = literal
                .parse::<f64>()
                .map_err(|_| ValidationError::InvalidNumber {
                    text: literal.clone(),
                    position: start,
                })?;
            tokens.push(Token {
                kind: TokenKind::Number(value),
                position: start,
            });
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            let mut raw = String::new();
            while i < chars.len() {
                let ch = chars[i];
                if is_ident_continue(ch) {
                    raw.push(ch);
                    i += 1;
                } else if is_separator(ch) && chars.get(i + 1).copied().is_some_and(is_ident_continue) {
                    raw.push(ch);
                    i += 1;
                } else {
                    break;
                }
            }
            tokens.push(Token {
                kind: TokenKind::Ident(canonicalize(&raw)),
                position: start,
            });
            continue;
        }

        let (kind, width) = match (c, next) {
            ('+', _) => (TokenKind::Plus, 1),
            ('-', _) => (TokenKind::Minus, 1),
            ('*', _) => (TokenKind::Star, 1),
            ('/', _) => (TokenKind::Slash, 1),
            ('(', _) => (TokenKind::LParen, 1),
            (')', _) => (TokenKind::RParen, 1),
            ('<', Some('=')) => (TokenKind::Compare(CompareOp::Le), 2),
            ('<', _) => (TokenKind::Compare(CompareOp::Lt), 1),
            ('>', Some('=')) => (TokenKind::Compare(CompareOp::Ge), 2),
            ('>', _) => (TokenKind::Compare(CompareOp::Gt), 1),
            ('=', Some('=')) => (TokenKind::Compare(CompareOp::Eq), 2),
            ('!', Some('=')) => (TokenKind::Compare(CompareOp::Ne), 2),
            _ => return Err(ValidationError::UnexpectedChar { ch: c, position: start }),
        };
        tokens.push(Token { kind, position: start });
        i += width;
    }

    Ok(tokens)
}

// ── Parser ──────────────────────────────────────────────────

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    const fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn parse(mut self) -> Result<Node, ValidationError> {
        let node = self.comparison()?;
        match self.peek() {
            None => Ok(node),
            Some(token) => Err(unexpected(token)),
        }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn descend(&mut self) -> Result<(), ValidationError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            Err(ValidationError::TooDeep(MAX_DEPTH))
        } else {
            Ok(())
        }
    }

    fn comparison(&mut self) -> Result<Node, ValidationError> {
        let lhs = self.additive()?;
        if let Some(Token {
            kind: TokenKind::Compare(op),
            ..
        }) = self.peek()
        {
            let op = *op;
            self.pos += 1;
            let rhs = self.additive()?;
            return Ok(Node::Compare {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            });
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Node, ValidationError> {
        let mut node = self.term()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Plus) => ArithOp::Add,
                Some(TokenKind::Minus) => ArithOp::Sub,
                _ => return Ok(node),
            };
            self.pos += 1;
            let rhs = self.term()?;
            node = Node::Arith {
                op,
                lhs: Box::new(node),
                rhs: Box::new(rhs),
            };
        }
    }

    fn term(&mut self) -> Result<Node, ValidationError> {
        let mut node = self.unary()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Star) => ArithOp::Mul,
                Some(TokenKind::Slash) => ArithOp::Div,
                _ => return Ok(node),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            node = Node::Arith {
                op,
                lhs: Box::new(node),
                rhs: Box::new(rhs),
            };
        }
    }

    fn unary(&mut self) -> Result<Node, ValidationError> {
        if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Minus)) {
            self.pos += 1;
            self.descend()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Node::Neg(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Node, ValidationError> {
        let token = self.advance().ok_or(ValidationError::UnexpectedEnd)?;
        match &token.kind {
            TokenKind::Number(n) => Ok(Node::Number(*n)),
            TokenKind::Ident(name) => Ok(Node::Variable(name.clone())),
            TokenKind::LParen => {
                self.descend()?;
                let inner = self.comparison()?;
                self.depth -= 1;
                match self.advance() {
                    Some(Token {
                        kind: TokenKind::RParen,
                        ..
                    }) => Ok(inner),
                    Some(other) => Err(unexpected(other)),
                    None => Err(ValidationError::UnexpectedEnd),
                }
            }
            _ => Err(unexpected(token)),
        }
    }
}

fn unexpected(token: &Token) -> ValidationError {
    ValidationError::UnexpectedToken {
        found: token.kind.to_string(),
        position: token.position,
    }
}
