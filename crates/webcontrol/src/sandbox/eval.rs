//! Expression evaluator for the sandbox host.
//!
//! Scripts are single expressions over numbers, strings and booleans:
//!
//! ```text
//! 1 + 2 * 3            -> 7
//! "hp: " + (40 + 2)    -> hp: 42
//! 3 > 2 && !false      -> true
//! sum(1, 2, 3.5)       -> 6.5
//! ```
//!
//! Lexing works on a byte-offset cursor; parsing is a Pratt parser over
//! binding power tables, producing a small tree that is then evaluated.

use std::fmt;
use thiserror::Error;

/// Longest script accepted, in bytes.
const MAX_SCRIPT_LEN: usize = 64 * 1024;

/// Deepest nesting of operators, parentheses and calls.
const MAX_DEPTH: usize = 256;

/// A script value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Text(_) => "string",
            Value::Bool(_) => "bool",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => f.write_str(s),
            Value::Bool(b) => write!(f, "{b}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("syntax error at {pos}: {message}")]
    Syntax { pos: usize, message: String },

    #[error("type error: {0}")]
    Type(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("script exceeds {0} bytes")]
    TooLong(usize),
}

impl EvalError {
    fn syntax(pos: usize, message: impl Into<String>) -> Self {
        EvalError::Syntax {
            pos,
            message: message.into(),
        }
    }
}

/// Resolves function calls made from inside an expression.
pub trait Functions {
    fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, EvalError>;
}

/// Parses and evaluates `source`.
///
/// Parsing fails once operators, parentheses or calls nest deeper than
/// a fixed limit, so neither evaluation nor dropping the tree can exhaust
/// the stack.
pub fn evaluate(source: &str, functions: &dyn Functions) -> Result<Value, EvalError> {
    if source.len() > MAX_SCRIPT_LEN {
        return Err(EvalError::TooLong(MAX_SCRIPT_LEN));
    }

    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        index: 0,
        end: source.len(),
        depth: 0,
    };
    let expr = parser.expr_bp(0)?;
    if let Some(token) = parser.peek() {
        return Err(EvalError::syntax(token.pos, "unexpected trailing input"));
    }
    eval(&expr, functions)
}

// ── Lexer ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number(f64),
    Str(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AmpAmp,
    PipePipe,
    LParen,
    RParen,
    Comma,
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    pos: usize,
}

struct Cursor<'src> {
    source: &'src str,
    pos: usize,
    chars: std::str::Chars<'src>,
}

impl<'src> Cursor<'src> {
    fn new(source: &'src str) -> Self {
        Self {
            source,
            pos: 0,
            chars: source.chars(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.clone().next()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_while(&mut self, predicate: impl Fn(char) -> bool) {
        while self.peek().is_some_and(&predicate) {
            self.advance();
        }
    }

    fn slice(&self, start: usize) -> &'src str {
        &self.source[start..self.pos]
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, EvalError> {
    let mut cursor = Cursor::new(source);
    let mut tokens = Vec::new();

    loop {
        cursor.eat_while(char::is_whitespace);
        let start = cursor.pos;
        let Some(c) = cursor.advance() else { break };

        let kind = match c {
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            ',' => TokenKind::Comma,
            '!' if cursor.eat('=') => TokenKind::NotEq,
            '!' => TokenKind::Bang,
            '=' if cursor.eat('=') => TokenKind::EqEq,
            '<' if cursor.eat('=') => TokenKind::LtEq,
            '<' => TokenKind::Lt,
            '>' if cursor.eat('=') => TokenKind::GtEq,
            '>' => TokenKind::Gt,
            '&' if cursor.eat('&') => TokenKind::AmpAmp,
            '|' if cursor.eat('|') => TokenKind::PipePipe,
            '"' | '\'' => TokenKind::Str(lex_string(&mut cursor, c, start)?),
            c if c.is_ascii_digit() || c == '.' => {
                cursor.eat_while(|c| c.is_ascii_digit() || c == '.');
                let text = cursor.slice(start);
                let n = text
                    .parse::<f64>()
                    .map_err(|_| EvalError::syntax(start, format!("invalid number '{text}'")))?;
                TokenKind::Number(n)
            }
            c if c.is_alphabetic() || c == '_' => {
                cursor.eat_while(|c| c.is_alphanumeric() || c == '_');
                TokenKind::Ident(cursor.slice(start).to_string())
            }
            other => {
                return Err(EvalError::syntax(start, format!("unexpected character '{other}'")));
            }
        };
        tokens.push(Token { kind, pos: start });
    }

    Ok(tokens)
}

fn lex_string(cursor: &mut Cursor<'_>, quote: char, start: usize) -> Result<String, EvalError> {
    let mut text = String::new();
    loop {
        match cursor.advance() {
            None => return Err(EvalError::syntax(start, "unterminated string")),
            Some(c) if c == quote => return Ok(text),
            Some('\\') => match cursor.advance() {
                Some('n') => text.push('\n'),
                Some('t') => text.push('\t'),
                Some(c) => text.push(c),
                None => return Err(EvalError::syntax(start, "unterminated string")),
            },
            Some(c) => text.push(c),
        }
    }
}

// ── Parser ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

/// Returns the operator and its (left_bp, right_bp) for infix tokens.
fn infix_binding_power(kind: &TokenKind) -> Option<(BinaryOp, u8, u8)> {
    let entry = match kind {
        TokenKind::PipePipe => (BinaryOp::Or, 1, 2),
        TokenKind::AmpAmp => (BinaryOp::And, 3, 4),
        TokenKind::EqEq => (BinaryOp::Eq, 5, 6),
        TokenKind::NotEq => (BinaryOp::NotEq, 5, 6),
        TokenKind::Lt => (BinaryOp::Lt, 7, 8),
        TokenKind::LtEq => (BinaryOp::LtEq, 7, 8),
        TokenKind::Gt => (BinaryOp::Gt, 7, 8),
        TokenKind::GtEq => (BinaryOp::GtEq, 7, 8),
        TokenKind::Plus => (BinaryOp::Add, 9, 10),
        TokenKind::Minus => (BinaryOp::Sub, 9, 10),
        TokenKind::Star => (BinaryOp::Mul, 11, 12),
        TokenKind::Slash => (BinaryOp::Div, 11, 12),
        TokenKind::Percent => (BinaryOp::Rem, 11, 12),
        _ => return None,
    };
    Some(entry)
}

const PREFIX_BP: u8 = 13;

struct Parser {
    tokens: Vec<Token>,
    index: usize,
    end: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.index).cloned();
        if token.is_some() {
            self.index += 1;
        }
        token
    }

    fn at(&self, kind: &TokenKind) -> bool {
        self.peek().is_some_and(|token| &token.kind == kind)
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<(), EvalError> {
        match self.next() {
            Some(token) if token.kind == kind => Ok(()),
            Some(token) => Err(EvalError::syntax(token.pos, format!("expected {what}"))),
            None => Err(EvalError::syntax(self.end, format!("expected {what}"))),
        }
    }

    fn descend(&mut self, pos: usize) -> Result<(), EvalError> {
        if self.depth >= MAX_DEPTH {
            return Err(EvalError::syntax(pos, "expression nested too deeply"));
        }
        self.depth += 1;
        Ok(())
    }

    fn expr_bp(&mut self, min_bp: u8) -> Result<Expr, EvalError> {
        let mut lhs = self.lhs()?;
        // Left-deep chains nest the tree as much as parentheses do
        let mut levels = 0;

        while let Some(token) = self.peek() {
            let Some((op, l_bp, r_bp)) = infix_binding_power(&token.kind) else {
                break;
            };
            if l_bp < min_bp {
                break;
            }
            let pos = token.pos;
            self.descend(pos)?;
            levels += 1;
            self.index += 1;
            let rhs = self.expr_bp(r_bp)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }

        self.depth -= levels;
        Ok(lhs)
    }

    fn prefix(&mut self, op: UnaryOp, pos: usize) -> Result<Expr, EvalError> {
        self.descend(pos)?;
        let operand = self.expr_bp(PREFIX_BP)?;
        self.depth -= 1;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn lhs(&mut self) -> Result<Expr, EvalError> {
        let Some(token) = self.next() else {
            return Err(EvalError::syntax(self.end, "expected an expression"));
        };

        match token.kind {
            TokenKind::Number(n) => Ok(Expr::Literal(Value::Number(n))),
            TokenKind::Str(s) => Ok(Expr::Literal(Value::Text(s))),
            TokenKind::Minus => self.prefix(UnaryOp::Neg, token.pos),
            TokenKind::Bang => self.prefix(UnaryOp::Not, token.pos),
            TokenKind::LParen => {
                self.descend(token.pos)?;
                let inner = self.expr_bp(0)?;
                self.expect(TokenKind::RParen, "')'")?;
                self.depth -= 1;
                Ok(inner)
            }
            TokenKind::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                _ => self.call(name, token.pos),
            },
            _ => Err(EvalError::syntax(token.pos, "expected an expression")),
        }
    }

    fn call(&mut self, name: String, pos: usize) -> Result<Expr, EvalError> {
        if !self.at(&TokenKind::LParen) {
            return Err(EvalError::syntax(pos, format!("unknown identifier '{name}'")));
        }
        self.descend(pos)?;
        self.index += 1;

        let mut args = Vec::new();
        if !self.at(&TokenKind::RParen) {
            loop {
                args.push(self.expr_bp(0)?);
                if !self.at(&TokenKind::Comma) {
                    break;
                }
                self.index += 1;
            }
        }
        self.expect(TokenKind::RParen, "')'")?;
        self.depth -= 1;
        Ok(Expr::Call(name, args))
    }
}

// ── Evaluation ─────────────────────────────────────────────────────────

fn eval(expr: &Expr, functions: &dyn Functions) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Unary(op, operand) => {
            let value = eval(operand, functions)?;
            match (op, value) {
                (UnaryOp::Neg, Value::Number(n)) => Ok(Value::Number(-n)),
                (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                (UnaryOp::Neg, other) => Err(type_error("negate", &other)),
                (UnaryOp::Not, other) => Err(type_error("invert", &other)),
            }
        }
        Expr::Binary(BinaryOp::And, lhs, rhs) => {
            Ok(Value::Bool(truthy(eval(lhs, functions)?)? && truthy(eval(rhs, functions)?)?))
        }
        Expr::Binary(BinaryOp::Or, lhs, rhs) => {
            Ok(Value::Bool(truthy(eval(lhs, functions)?)? || truthy(eval(rhs, functions)?)?))
        }
        Expr::Binary(op, lhs, rhs) => {
            let lhs = eval(lhs, functions)?;
            let rhs = eval(rhs, functions)?;
            binary(*op, lhs, rhs)
        }
        Expr::Call(name, args) => {
            let args = args
                .iter()
                .map(|arg| eval(arg, functions))
                .collect::<Result<Vec<_>, _>>()?;
            functions.call(name, args)
        }
    }
}

fn truthy(value: Value) -> Result<bool, EvalError> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(type_error("use as condition", &other)),
    }
}

fn type_error(action: &str, value: &Value) -> EvalError {
    EvalError::Type(format!("cannot {action} a {}", value.type_name()))
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    use Value::{Bool, Number, Text};

    let value = match (op, lhs, rhs) {
        (BinaryOp::Add, Number(a), Number(b)) => Number(a + b),
        (BinaryOp::Add, Text(a), b) => Text(format!("{a}{b}")),
        (BinaryOp::Add, a, Text(b)) => Text(format!("{a}{b}")),
        (BinaryOp::Sub, Number(a), Number(b)) => Number(a - b),
        (BinaryOp::Mul, Number(a), Number(b)) => Number(a * b),
        (BinaryOp::Div | BinaryOp::Rem, Number(_), Number(b)) if b == 0.0 => {
            return Err(EvalError::DivisionByZero);
        }
        (BinaryOp::Div, Number(a), Number(b)) => Number(a / b),
        (BinaryOp::Rem, Number(a), Number(b)) => Number(a % b),
        (BinaryOp::Eq, a, b) => Bool(a == b),
        (BinaryOp::NotEq, a, b) => Bool(a != b),
        (BinaryOp::Lt, Number(a), Number(b)) => Bool(a < b),
        (BinaryOp::LtEq, Number(a), Number(b)) => Bool(a <= b),
        (BinaryOp::Gt, Number(a), Number(b)) => Bool(a > b),
        (BinaryOp::GtEq, Number(a), Number(b)) => Bool(a >= b),
        (BinaryOp::Lt, Text(a), Text(b)) => Bool(a < b),
        (BinaryOp::LtEq, Text(a), Text(b)) => Bool(a <= b),
        (BinaryOp::Gt, Text(a), Text(b)) => Bool(a > b),
        (BinaryOp::GtEq, Text(a), Text(b)) => Bool(a >= b),
        (op, a, b) => {
            return Err(EvalError::Type(format!(
                "unsupported operands for {op:?}: {} and {}",
                a.type_name(),
                b.type_name()
            )));
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoFunctions;

    impl Functions for NoFunctions {
        fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
            match name {
                "first" => args
                    .into_iter()
                    .next()
                    .ok_or_else(|| EvalError::Type("first() needs an argument".to_string())),
                _ => Err(EvalError::UnknownFunction(name.to_string())),
            }
        }
    }

    fn run(source: &str) -> Result<String, EvalError> {
        evaluate(source, &NoFunctions).map(|value| value.to_string())
    }

    #[test]
    fn test_arithmetic_and_precedence() {
        assert_eq!(run("1+1").unwrap(), "2");
        assert_eq!(run("1 + 2 * 3").unwrap(), "7");
        assert_eq!(run("(1 + 2) * 3").unwrap(), "9");
        assert_eq!(run("10 - 4 - 3").unwrap(), "3");
        assert_eq!(run("7 / 2").unwrap(), "3.5");
        assert_eq!(run("-2 * -3").unwrap(), "6");
        assert_eq!(run("17 % 5").unwrap(), "2");
    }

    #[test]
    fn test_strings_and_booleans() {
        assert_eq!(run(r#""hp: " + (40 + 2)"#).unwrap(), "hp: 42");
        assert_eq!(run(r#"'it\'s'"#).unwrap(), "it's");
        assert_eq!(run("3 > 2 && !false").unwrap(), "true");
        assert_eq!(run("1 == 2 || 2 <= 2").unwrap(), "true");
        assert_eq!(run(r#""a" < "b""#).unwrap(), "true");
        assert_eq!(run(r#"1 == "1""#).unwrap(), "false");
    }

    #[test]
    fn test_calls() {
        assert_eq!(run("first(4 * 2, 1)").unwrap(), "8");
        assert_eq!(
            run("nothing()"),
            Err(EvalError::UnknownFunction("nothing".to_string()))
        );
    }

    #[test]
    fn test_errors() {
        assert_eq!(run("1 / 0"), Err(EvalError::DivisionByZero));
        assert!(matches!(run("1 +"), Err(EvalError::Syntax { pos: 3, .. })));
        assert!(matches!(run("(1"), Err(EvalError::Syntax { .. })));
        assert!(matches!(run("1 2"), Err(EvalError::Syntax { pos: 2, .. })));
        assert!(matches!(run("x"), Err(EvalError::Syntax { pos: 0, .. })));
        assert!(matches!(run("\"open"), Err(EvalError::Syntax { .. })));
        assert!(matches!(run("true + 1"), Err(EvalError::Type(_))));
        assert!(matches!(run("!3"), Err(EvalError::Type(_))));
        assert!(matches!(run("1 # 2"), Err(EvalError::Syntax { pos: 2, .. })));
    }

    fn assert_too_deep(source: &str) {
        match run(source) {
            Err(EvalError::Syntax { message, .. }) => {
                assert_eq!(message, "expression nested too deeply");
            }
            other => panic!("expected nesting error, got {other:?}"),
        }
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        assert_too_deep(&format!("{}1", "-".repeat(10_000)));
        assert_too_deep(&format!("{}true", "!".repeat(10_000)));
        assert_too_deep(&"(".repeat(1000));
        assert_too_deep(&format!("{}1{}", "(".repeat(1000), ")".repeat(1000)));
        assert_too_deep(&format!("{}1", "1+".repeat(1000)));
        assert_too_deep(&format!("{}1{}", "first(".repeat(1000), ")".repeat(1000)));
    }

    #[test]
    fn test_nesting_below_the_limit_still_evaluates() {
        let parens = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(run(&parens).unwrap(), "1");
        assert_eq!(run(&format!("{}1", "--".repeat(50))).unwrap(), "1");
        assert_eq!(run(&format!("{}1", "1+".repeat(200))).unwrap(), "201");
        // Sibling arguments do not add up
        let siblings = format!("first({})", vec!["((((1))))"; 500].join(", "));
        assert_eq!(run(&siblings).unwrap(), "1");
    }

    #[test]
    fn test_oversized_script_is_rejected() {
        let source = format!("{}1", "-".repeat(200_000));
        assert_eq!(run(&source), Err(EvalError::TooLong(MAX_SCRIPT_LEN)));
    }
}
