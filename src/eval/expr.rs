//! Expression parsing and three-valued evaluation
//!
//! Conditions and action values are written as small infix expressions over
//! sensor keys and literals (`input:temperature * 1.8 + 32`,
//! `input:flow > 5 and not output:bypass`). This module owns the tokenizer,
//! a precedence-climbing parser, and the evaluator.
//!
//! Evaluation is pure: given the same context it always yields the same
//! value, and it never blocks. Missing readings propagate as
//! [`Value::Absent`]; boolean results surface Absent operands as
//! [`Kleene::Indeterminate`]. Division by zero and numeric overflow are
//! diagnosed through `tracing` and degrade to Absent / saturated values
//! rather than aborting the cycle.

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::warn;

use crate::types::{Kleene, Value};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExprError {
    #[error("Unexpected character '{0}' at offset {1}")]
    UnexpectedChar(char, usize),

    #[error("Unterminated string literal starting at offset {0}")]
    UnterminatedString(usize),

    #[error("Unexpected token '{0}' at offset {1}")]
    UnexpectedToken(String, usize),

    #[error("Unexpected end of expression")]
    UnexpectedEnd,

    #[error("Unknown operator '{0}'")]
    UnknownOperator(String),

    #[error("Unclosed '{{' in template '{0}'")]
    UnclosedPlaceholder(String),
}

// ============================================================================
// Comparison Operators
// ============================================================================

/// The six comparison operators, accepted in symbolic and named form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl CompareOp {
    /// Parse either spelling: `>` / `greater_than`, `==` / `equal_to`, ...
    pub fn parse(raw: &str) -> Result<Self, ExprError> {
        match raw {
            ">" | "greater_than" => Ok(CompareOp::Gt),
            ">=" | "greater_than_or_equal" | "greater_or_equal" => Ok(CompareOp::Ge),
            "<" | "less_than" => Ok(CompareOp::Lt),
            "<=" | "less_than_or_equal" | "less_or_equal" => Ok(CompareOp::Le),
            "==" | "equal_to" | "equals" => Ok(CompareOp::Eq),
            "!=" | "not_equal_to" | "not_equals" => Ok(CompareOp::Ne),
            other => Err(ExprError::UnknownOperator(other.to_string())),
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        }
    }

    /// Apply to two numbers. Callers have already ruled out Absent.
    pub fn apply_numeric(self, lhs: f64, rhs: f64) -> Kleene {
        if lhs.is_nan() || rhs.is_nan() {
            return Kleene::Indeterminate;
        }
        let held = match self {
            CompareOp::Gt => lhs > rhs,
            CompareOp::Ge => lhs >= rhs,
            CompareOp::Lt => lhs < rhs,
            CompareOp::Le => lhs <= rhs,
            CompareOp::Eq => (lhs - rhs).abs() < f64::EPSILON,
            CompareOp::Ne => (lhs - rhs).abs() >= f64::EPSILON,
        };
        held.into()
    }

    /// Three-valued comparison over full values.
    ///
    /// Any Absent operand yields Indeterminate. Equality also covers booleans
    /// and strings; ordering is numeric-only and diagnoses a type mismatch
    /// otherwise.
    pub fn apply(self, lhs: &Value, rhs: &Value) -> Kleene {
        if lhs.is_absent() || rhs.is_absent() {
            return Kleene::Indeterminate;
        }
        match (lhs, rhs) {
            (Value::Number(a), Value::Number(b)) => self.apply_numeric(*a, *b),
            (Value::Bool(a), Value::Bool(b)) => match self {
                CompareOp::Eq => (a == b).into(),
                CompareOp::Ne => (a != b).into(),
                _ => {
                    warn!("Ordering comparison applied to booleans");
                    Kleene::Indeterminate
                }
            },
            (Value::Text(a), Value::Text(b)) => match self {
                CompareOp::Eq => (a == b).into(),
                CompareOp::Ne => (a != b).into(),
                _ => {
                    warn!("Ordering comparison applied to strings");
                    Kleene::Indeterminate
                }
            },
            (a, b) => {
                warn!("Type mismatch in comparison: {:?} {} {:?}", a, self.symbol(), b);
                Kleene::Indeterminate
            }
        }
    }

    /// Mirror across the comparison: `a > b` iff `b < a`.
    pub fn flipped(self) -> Self {
        match self {
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::Ge => CompareOp::Le,
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::Le => CompareOp::Ge,
            CompareOp::Eq => CompareOp::Eq,
            CompareOp::Ne => CompareOp::Ne,
        }
    }

    /// Logical negation of the operator.
    pub fn negated(self) -> Self {
        match self {
            CompareOp::Gt => CompareOp::Le,
            CompareOp::Ge => CompareOp::Lt,
            CompareOp::Lt => CompareOp::Ge,
            CompareOp::Le => CompareOp::Gt,
            CompareOp::Eq => CompareOp::Ne,
            CompareOp::Ne => CompareOp::Eq,
        }
    }
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

// ============================================================================
// Expression AST
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Cmp(CompareOp),
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Piece of a string template: literal text or a `{sensor}` placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Literal(String),
    Sensor(String),
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// A sensor reference by full namespaced key, e.g. `input:temperature`.
    Sensor(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Concatenation of literal text and sensor references.
    Template(Vec<TemplatePart>),
}

/// Read-only view the evaluator uses to resolve sensor references.
pub trait ValueSource {
    /// Current value for a full sensor key, Absent when unknown.
    fn value(&self, key: &str) -> Value;
}

impl ValueSource for std::collections::HashMap<String, Value> {
    fn value(&self, key: &str) -> Value {
        self.get(key).cloned().unwrap_or(Value::Absent)
    }
}

impl Expr {
    /// Parse an infix expression.
    pub fn parse(raw: &str) -> Result<Self, ExprError> {
        let tokens = tokenize(raw)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        match parser.peek() {
            None => Ok(expr),
            Some(tok) => Err(ExprError::UnexpectedToken(tok.describe(), tok.offset())),
        }
    }

    /// Parse a string template: literal text with `{sensor}` placeholders.
    pub fn parse_template(raw: &str) -> Result<Self, ExprError> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = raw.chars();
        while let Some(c) = chars.next() {
            if c != '{' {
                literal.push(c);
                continue;
            }
            if !literal.is_empty() {
                parts.push(TemplatePart::Literal(std::mem::take(&mut literal)));
            }
            let mut placeholder = String::new();
            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(c) => placeholder.push(c),
                    None => return Err(ExprError::UnclosedPlaceholder(raw.to_string())),
                }
            }
            parts.push(TemplatePart::Sensor(placeholder.trim().to_string()));
        }
        if !literal.is_empty() {
            parts.push(TemplatePart::Literal(literal));
        }
        Ok(Expr::Template(parts))
    }

    /// Collect every sensor key referenced anywhere in the tree.
    pub fn referenced_sensors(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Sensor(key) => {
                out.insert(key.clone());
            }
            Expr::Unary { operand, .. } => operand.referenced_sensors(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.referenced_sensors(out);
                rhs.referenced_sensors(out);
            }
            Expr::Template(parts) => {
                for part in parts {
                    if let TemplatePart::Sensor(key) = part {
                        out.insert(key.clone());
                    }
                }
            }
        }
    }

    /// Evaluate against a context.
    ///
    /// Boolean sub-results are carried as `Value::Bool`; Indeterminate maps
    /// to `Value::Absent` so three-valued truth survives nesting inside
    /// arithmetic-shaped trees.
    pub fn eval(&self, ctx: &dyn ValueSource) -> Value {
        match self {
            Expr::Literal(v) => v.clone(),
            Expr::Sensor(key) => ctx.value(key),
            Expr::Unary { op, operand } => match op {
                UnaryOp::Neg => match operand.eval(ctx) {
                    Value::Number(n) => Value::Number(-n),
                    Value::Absent => Value::Absent,
                    other => {
                        warn!("Negation applied to non-number {:?}", other);
                        Value::Absent
                    }
                },
                UnaryOp::Not => kleene_to_value(operand.eval_kleene(ctx).not()),
            },
            Expr::Binary { op, lhs, rhs } => match op {
                BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => {
                    eval_arithmetic(*op, &lhs.eval(ctx), &rhs.eval(ctx))
                }
                BinOp::Cmp(cmp) => kleene_to_value(cmp.apply(&lhs.eval(ctx), &rhs.eval(ctx))),
                BinOp::And => kleene_to_value(lhs.eval_kleene(ctx).and(rhs.eval_kleene(ctx))),
                BinOp::Or => kleene_to_value(lhs.eval_kleene(ctx).or(rhs.eval_kleene(ctx))),
            },
            Expr::Template(parts) => {
                let mut rendered = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Literal(text) => rendered.push_str(text),
                        TemplatePart::Sensor(key) => rendered.push_str(&ctx.value(key).render()),
                    }
                }
                Value::Text(rendered)
            }
        }
    }

    /// Evaluate as a three-valued truth value.
    pub fn eval_kleene(&self, ctx: &dyn ValueSource) -> Kleene {
        match self.eval(ctx) {
            Value::Bool(b) => b.into(),
            Value::Absent => Kleene::Indeterminate,
            other => {
                warn!("Condition evaluated to non-boolean {:?}", other);
                Kleene::Indeterminate
            }
        }
    }
}

fn kleene_to_value(k: Kleene) -> Value {
    match k {
        Kleene::True => Value::Bool(true),
        Kleene::False => Value::Bool(false),
        Kleene::Indeterminate => Value::Absent,
    }
}

/// Numeric arithmetic with Absent propagation, divide-by-zero diagnosis,
/// and overflow saturation.
fn eval_arithmetic(op: BinOp, lhs: &Value, rhs: &Value) -> Value {
    if lhs.is_absent() || rhs.is_absent() {
        return Value::Absent;
    }
    let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) else {
        warn!("Arithmetic on non-numeric operands: {:?}, {:?}", lhs, rhs);
        return Value::Absent;
    };
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                warn!("Division by zero: {} / 0", a);
                return Value::Absent;
            }
            a / b
        }
        _ => unreachable!("eval_arithmetic called with non-arithmetic op"),
    };
    if result.is_infinite() && a.is_finite() && b.is_finite() {
        warn!("Numeric overflow, saturating: {} {:?} {}", a, op, b);
        return Value::Number(if result > 0.0 { f64::MAX } else { f64::MIN });
    }
    Value::Number(result)
}

// ============================================================================
// Tokenizer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number(f64),
    Str(String),
    Sensor(String),
    True,
    False,
    Null,
    And,
    Or,
    Not,
    Cmp(CompareOp),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

impl Token {
    fn describe(&self) -> String {
        format!("{:?}", self.kind)
    }

    fn offset(&self) -> usize {
        self.offset
    }
}

fn tokenize(raw: &str) -> Result<Vec<Token>, ExprError> {
    let bytes: Vec<char> = raw.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        match c {
            c if c.is_whitespace() => {
                i += 1;
            }
            '(' => {
                tokens.push(Token { kind: TokenKind::LParen, offset: start });
                i += 1;
            }
            ')' => {
                tokens.push(Token { kind: TokenKind::RParen, offset: start });
                i += 1;
            }
            '+' => {
                tokens.push(Token { kind: TokenKind::Plus, offset: start });
                i += 1;
            }
            '-' => {
                tokens.push(Token { kind: TokenKind::Minus, offset: start });
                i += 1;
            }
            '*' => {
                tokens.push(Token { kind: TokenKind::Star, offset: start });
                i += 1;
            }
            '/' => {
                tokens.push(Token { kind: TokenKind::Slash, offset: start });
                i += 1;
            }
            '>' | '<' | '=' | '!' => {
                let two: String = bytes[i..bytes.len().min(i + 2)].iter().collect();
                if two.len() == 2 && (two.ends_with('=')) {
                    match two.as_str() {
                        ">=" => tokens.push(Token { kind: TokenKind::Cmp(CompareOp::Ge), offset: start }),
                        "<=" => tokens.push(Token { kind: TokenKind::Cmp(CompareOp::Le), offset: start }),
                        "==" => tokens.push(Token { kind: TokenKind::Cmp(CompareOp::Eq), offset: start }),
                        "!=" => tokens.push(Token { kind: TokenKind::Cmp(CompareOp::Ne), offset: start }),
                        _ => return Err(ExprError::UnexpectedChar(c, start)),
                    }
                    i += 2;
                } else {
                    match c {
                        '>' => tokens.push(Token { kind: TokenKind::Cmp(CompareOp::Gt), offset: start }),
                        '<' => tokens.push(Token { kind: TokenKind::Cmp(CompareOp::Lt), offset: start }),
                        '!' => tokens.push(Token { kind: TokenKind::Not, offset: start }),
                        _ => return Err(ExprError::UnexpectedChar(c, start)),
                    }
                    i += 1;
                }
            }
            '&' | '|' => {
                if i + 1 < bytes.len() && bytes[i + 1] == c {
                    tokens.push(Token {
                        kind: if c == '&' { TokenKind::And } else { TokenKind::Or },
                        offset: start,
                    });
                    i += 2;
                } else {
                    return Err(ExprError::UnexpectedChar(c, start));
                }
            }
            '"' | '\'' => {
                let quote = c;
                let mut text = String::new();
                i += 1;
                loop {
                    if i >= bytes.len() {
                        return Err(ExprError::UnterminatedString(start));
                    }
                    let ch = bytes[i];
                    if ch == quote {
                        i += 1;
                        break;
                    }
                    if ch == '\\' && i + 1 < bytes.len() {
                        text.push(bytes[i + 1]);
                        i += 2;
                        continue;
                    }
                    text.push(ch);
                    i += 1;
                }
                tokens.push(Token { kind: TokenKind::Str(text), offset: start });
            }
            c if c.is_ascii_digit() || c == '.' => {
                let mut text = String::new();
                while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == '.') {
                    text.push(bytes[i]);
                    i += 1;
                }
                let n: f64 = text
                    .parse()
                    .map_err(|_| ExprError::UnexpectedToken(text.clone(), start))?;
                tokens.push(Token { kind: TokenKind::Number(n), offset: start });
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut text = String::new();
                while i < bytes.len()
                    && (bytes[i].is_alphanumeric() || bytes[i] == '_' || bytes[i] == ':')
                {
                    text.push(bytes[i]);
                    i += 1;
                }
                let kind = match text.as_str() {
                    "true" => TokenKind::True,
                    "false" => TokenKind::False,
                    "null" => TokenKind::Null,
                    "and" => TokenKind::And,
                    "or" => TokenKind::Or,
                    "not" => TokenKind::Not,
                    // Named comparison operators are synonyms for the symbols.
                    named if CompareOp::parse(named).is_ok() => {
                        TokenKind::Cmp(CompareOp::parse(named).unwrap_or(CompareOp::Eq))
                    }
                    _ => TokenKind::Sensor(text),
                };
                tokens.push(Token { kind, offset: start });
            }
            other => return Err(ExprError::UnexpectedChar(other, start)),
        }
    }
    Ok(tokens)
}

// ============================================================================
// Parser
// ============================================================================

/// Precedence-climbing parser over the token stream.
///
/// Grammar (loosest first): or → and → not → comparison → additive →
/// multiplicative → unary minus → primary. Comparisons do not chain.
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Or)) {
            self.pos += 1;
            let rhs = self.parse_and()?;
            lhs = Expr::Binary {
                op: BinOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_not()?;
        while matches!(self.peek().map(|t| &t.kind), Some(TokenKind::And)) {
            self.pos += 1;
            let rhs = self.parse_not()?;
            lhs = Expr::Binary {
                op: BinOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, ExprError> {
        if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Not)) {
            self.pos += 1;
            let operand = self.parse_not()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExprError> {
        let lhs = self.parse_additive()?;
        if let Some(TokenKind::Cmp(op)) = self.peek().map(|t| t.kind.clone()) {
            self.pos += 1;
            let rhs = self.parse_additive()?;
            return Ok(Expr::Binary {
                op: BinOp::Cmp(op),
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            });
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Plus) => BinOp::Add,
                Some(TokenKind::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Star) => BinOp::Mul,
                Some(TokenKind::Slash) => BinOp::Div,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Minus)) {
            self.pos += 1;
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        let tok = self.next().ok_or(ExprError::UnexpectedEnd)?;
        match tok.kind {
            TokenKind::Number(n) => Ok(Expr::Literal(Value::Number(n))),
            TokenKind::Str(s) => Ok(Expr::Literal(Value::Text(s))),
            TokenKind::True => Ok(Expr::Literal(Value::Bool(true))),
            TokenKind::False => Ok(Expr::Literal(Value::Bool(false))),
            TokenKind::Null => Ok(Expr::Literal(Value::Absent)),
            TokenKind::Sensor(key) => Ok(Expr::Sensor(key)),
            TokenKind::LParen => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token { kind: TokenKind::RParen, .. }) => Ok(inner),
                    Some(tok) => Err(ExprError::UnexpectedToken(tok.describe(), tok.offset)),
                    None => Err(ExprError::UnexpectedEnd),
                }
            }
            _ => Err(ExprError::UnexpectedToken(tok.describe(), tok.offset)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn ctx(entries: &[(&str, Value)]) -> HashMap<String, Value> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn arithmetic_precedence() {
        let expr = Expr::parse("1 + 2 * 3").unwrap();
        assert_eq!(expr.eval(&ctx(&[])), Value::Number(7.0));

        let expr = Expr::parse("(1 + 2) * 3").unwrap();
        assert_eq!(expr.eval(&ctx(&[])), Value::Number(9.0));
    }

    #[test]
    fn sensor_references_resolve_from_context() {
        let expr = Expr::parse("input:temperature * 1.8 + 32").unwrap();
        let c = ctx(&[("input:temperature", Value::Number(100.0))]);
        assert_eq!(expr.eval(&c), Value::Number(212.0));
    }

    #[test]
    fn absent_propagates_through_arithmetic() {
        let expr = Expr::parse("input:flow + 1").unwrap();
        assert_eq!(expr.eval(&ctx(&[])), Value::Absent);
    }

    #[test]
    fn comparison_with_absent_is_indeterminate() {
        let expr = Expr::parse("input:flow > 5").unwrap();
        assert_eq!(expr.eval_kleene(&ctx(&[])), Kleene::Indeterminate);

        let c = ctx(&[("input:flow", Value::Number(7.0))]);
        assert_eq!(expr.eval_kleene(&c), Kleene::True);
    }

    #[test]
    fn kleene_connectives_follow_the_tables() {
        // F && ⊥ == F even though one side is unknown
        let expr = Expr::parse("input:a > 5 && input:missing > 5").unwrap();
        let c = ctx(&[("input:a", Value::Number(1.0))]);
        assert_eq!(expr.eval_kleene(&c), Kleene::False);

        // T || ⊥ == T
        let expr = Expr::parse("input:a < 5 || input:missing > 5").unwrap();
        assert_eq!(expr.eval_kleene(&c), Kleene::True);
    }

    #[test]
    fn word_operators_are_synonyms() {
        let sym = Expr::parse("input:t > 30 and input:p < 10").unwrap();
        let named = Expr::parse("input:t greater_than 30 and input:p less_than 10").unwrap();
        let c = ctx(&[
            ("input:t", Value::Number(35.0)),
            ("input:p", Value::Number(5.0)),
        ]);
        assert_eq!(sym.eval_kleene(&c), named.eval_kleene(&c));
        assert_eq!(sym.eval_kleene(&c), Kleene::True);
    }

    #[test]
    fn not_binds_over_comparison() {
        let expr = Expr::parse("not input:t > 30").unwrap();
        let c = ctx(&[("input:t", Value::Number(35.0))]);
        assert_eq!(expr.eval_kleene(&c), Kleene::False);
    }

    #[test]
    fn division_by_zero_yields_absent() {
        let expr = Expr::parse("10 / input:divisor").unwrap();
        let c = ctx(&[("input:divisor", Value::Number(0.0))]);
        assert_eq!(expr.eval(&c), Value::Absent);
    }

    #[test]
    fn overflow_saturates() {
        let expr = Expr::parse("input:big * input:big").unwrap();
        let c = ctx(&[("input:big", Value::Number(1e200))]);
        assert_eq!(expr.eval(&c), Value::Number(f64::MAX));
    }

    #[test]
    fn string_equality() {
        let expr = Expr::parse("output:alert == 'HOT'").unwrap();
        let c = ctx(&[("output:alert", Value::Text("HOT".into()))]);
        assert_eq!(expr.eval_kleene(&c), Kleene::True);
    }

    #[test]
    fn template_renders_absent_as_null() {
        let expr = Expr::parse_template("temp={input:temperature} flow={input:flow}").unwrap();
        let c = ctx(&[("input:temperature", Value::Number(35.0))]);
        assert_eq!(expr.eval(&c), Value::Text("temp=35 flow=null".into()));
    }

    #[test]
    fn unclosed_placeholder_is_an_error() {
        assert!(matches!(
            Expr::parse_template("temp={input:temperature"),
            Err(ExprError::UnclosedPlaceholder(_))
        ));
    }

    #[test]
    fn referenced_sensors_are_collected() {
        let expr = Expr::parse("input:a > 5 && (input:b + output:c) < 10").unwrap();
        let mut out = BTreeSet::new();
        expr.referenced_sensors(&mut out);
        assert_eq!(
            out.into_iter().collect::<Vec<_>>(),
            vec!["input:a", "input:b", "output:c"]
        );
    }

    #[test]
    fn evaluation_is_deterministic() {
        let expr = Expr::parse("input:a > 5 || input:b < 3").unwrap();
        let c = ctx(&[("input:a", Value::Number(9.0))]);
        let first = expr.eval_kleene(&c);
        let second = expr.eval_kleene(&c);
        assert_eq!(first, second);
    }

    #[test]
    fn parse_errors_carry_position() {
        assert!(matches!(
            Expr::parse("input:a # 3"),
            Err(ExprError::UnexpectedChar('#', 8))
        ));
        assert!(matches!(Expr::parse("input:a >"), Err(ExprError::UnexpectedEnd)));
    }
}
