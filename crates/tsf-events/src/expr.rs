//! Expression engine for evaluating selections, weights and derived columns
//! from string expressions over event columns.
//!
//! Supports arithmetic (+, -, *, /), comparisons (==, !=, <, <=, >, >=),
//! boolean operators (&&, ||, !), and built-in functions (abs, sqrt, log,
//! exp, pow, min, max). Booleans are `1.0`/`0.0`; a row passes a selection
//! when its value is `> 0`.

use rayon::prelude::*;
use tsf_core::{Error, Result};

/// Rows evaluated per parallel work item.
pub const DEFAULT_CHUNK_SIZE: usize = 16_384;

/// Whitespace-normalize a (possibly multi-line) expression: strip every line,
/// drop blank lines, join the rest with single spaces.
pub fn sanitize_expression(expression: &str) -> String {
    expression.lines().map(str::trim).filter(|l| !l.is_empty()).collect::<Vec<_>>().join(" ")
}

// ── Syntax tree ────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Expr {
    Number(f64),
    /// Position in `CompiledExpr::required_columns`.
    Column(usize),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
}

#[derive(Debug, Clone, Copy)]
enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    /// Left binding power; all binary operators are left-associative.
    fn precedence(self) -> u8 {
        match self {
            BinOp::Or => 1,
            BinOp::And => 2,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => 3,
            BinOp::Add | BinOp::Sub => 4,
            BinOp::Mul | BinOp::Div => 5,
        }
    }

    fn is_comparison(self) -> bool {
        self.precedence() == 3
    }
}

#[derive(Debug, Clone, Copy)]
enum Func {
    Abs,
    Sqrt,
    Log,
    Exp,
    Pow,
    Min,
    Max,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "abs" => Func::Abs,
            "sqrt" => Func::Sqrt,
            "log" => Func::Log,
            "exp" => Func::Exp,
            "pow" => Func::Pow,
            "min" => Func::Min,
            "max" => Func::Max,
            _ => return None,
        })
    }

    fn arity(self) -> usize {
        match self {
            Func::Pow | Func::Min | Func::Max => 2,
            Func::Abs | Func::Sqrt | Func::Log | Func::Exp => 1,
        }
    }
}

/// A compiled expression ready for evaluation.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    ast: Expr,
    source: String,
    /// Column names referenced by this expression (ordered by first occurrence).
    pub required_columns: Vec<String>,
}

impl CompiledExpr {
    /// Sanitize, parse and compile an expression string.
    pub fn compile(input: &str) -> Result<Self> {
        let source = sanitize_expression(input);
        if source.is_empty() {
            return Err(Error::Expression("empty expression".into()));
        }
        let tokens = lex(&source)?;
        let mut parser = Parser { tokens: &tokens, pos: 0, columns: Vec::new(), source: &source };
        let ast = parser.expression(0)?;
        if let Some(tok) = parser.peek() {
            return Err(parser.error(format!("unexpected {} after expression", tok)));
        }
        let required_columns = parser.columns;
        Ok(CompiledExpr { ast, source, required_columns })
    }

    /// The normalized expression text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate the expression for a single row.
    ///
    /// `values` must have the same length and order as `required_columns`.
    pub fn eval_row(&self, values: &[f64]) -> f64 {
        eval_expr(&self.ast, values)
    }

    /// Evaluate the expression for `n_rows` rows, column-wise.
    ///
    /// `columns` must match `required_columns` in length and order. Rows are
    /// split into fixed-size chunks evaluated in parallel; the output order
    /// is the row order, independent of the thread count.
    pub fn eval_columns(&self, columns: &[&[f64]], n_rows: usize) -> Vec<f64> {
        if columns.is_empty() {
            // Constant expression: evaluate once
            return vec![eval_expr(&self.ast, &[]); n_rows];
        }
        let mut out = vec![0.0f64; n_rows];
        out.par_chunks_mut(DEFAULT_CHUNK_SIZE).enumerate().for_each(|(chunk, slot)| {
            let start = chunk * DEFAULT_CHUNK_SIZE;
            let mut row = vec![0.0f64; columns.len()];
            for (offset, value) in slot.iter_mut().enumerate() {
                for (cell, col) in row.iter_mut().zip(columns) {
                    *cell = col[start + offset];
                }
                *value = eval_expr(&self.ast, &row);
            }
        });
        out
    }
}

// ── Evaluation ─────────────────────────────────────────────────

#[inline]
fn truth(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

fn eval_expr(e: &Expr, vals: &[f64]) -> f64 {
    match e {
        Expr::Number(n) => *n,
        Expr::Column(i) => vals[*i],
        Expr::Unary(UnOp::Neg, a) => -eval_expr(a, vals),
        Expr::Unary(UnOp::Not, a) => truth(eval_expr(a, vals) <= 0.0),
        Expr::Binary(op, a, b) => {
            let lhs = eval_expr(a, vals);
            let rhs = || eval_expr(b, vals);
            match op {
                // `&&` and `||` short-circuit.
                BinOp::And => truth(lhs > 0.0 && rhs() > 0.0),
                BinOp::Or => truth(lhs > 0.0 || rhs() > 0.0),
                BinOp::Add => lhs + rhs(),
                BinOp::Sub => lhs - rhs(),
                BinOp::Mul => lhs * rhs(),
                BinOp::Div => lhs / rhs(),
                BinOp::Eq => truth((lhs - rhs()).abs() < f64::EPSILON),
                BinOp::Ne => truth((lhs - rhs()).abs() >= f64::EPSILON),
                BinOp::Lt => truth(lhs < rhs()),
                BinOp::Le => truth(lhs <= rhs()),
                BinOp::Gt => truth(lhs > rhs()),
                BinOp::Ge => truth(lhs >= rhs()),
            }
        }
        Expr::Call(f, args) => {
            let arg = |i: usize| eval_expr(&args[i], vals);
            match f {
                Func::Abs => arg(0).abs(),
                Func::Sqrt => arg(0).sqrt(),
                Func::Log => arg(0).ln(),
                Func::Exp => arg(0).exp(),
                Func::Pow => arg(0).powf(arg(1)),
                Func::Min => arg(0).min(arg(1)),
                Func::Max => arg(0).max(arg(1)),
            }
        }
    }
}

// ── Lexer ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Name(String),
    Op(BinOp),
    Bang,
    Open,
    Close,
    Comma,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Number(n) => write!(f, "number {}", n),
            Token::Name(n) => write!(f, "name '{}'", n),
            Token::Op(op) => write!(f, "operator {:?}", op),
            Token::Bang => f.write_str("'!'"),
            Token::Open => f.write_str("'('"),
            Token::Close => f.write_str("')'"),
            Token::Comma => f.write_str("','"),
        }
    }
}

fn lex(input: &str) -> Result<Vec<Token>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let next = bytes.get(i + 1).copied();
        let (token, width) = match (c, next) {
            (b' ' | b'\t' | b'\r' | b'\n', _) => {
                i += 1;
                continue;
            }
            (b'&', Some(b'&')) => (Token::Op(BinOp::And), 2),
            (b'|', Some(b'|')) => (Token::Op(BinOp::Or), 2),
            (b'=', Some(b'=')) => (Token::Op(BinOp::Eq), 2),
            (b'!', Some(b'=')) => (Token::Op(BinOp::Ne), 2),
            (b'<', Some(b'=')) => (Token::Op(BinOp::Le), 2),
            (b'>', Some(b'=')) => (Token::Op(BinOp::Ge), 2),
            (b'<', _) => (Token::Op(BinOp::Lt), 1),
            (b'>', _) => (Token::Op(BinOp::Gt), 1),
            (b'+', _) => (Token::Op(BinOp::Add), 1),
            (b'-', _) => (Token::Op(BinOp::Sub), 1),
            (b'*', _) => (Token::Op(BinOp::Mul), 1),
            (b'/', _) => (Token::Op(BinOp::Div), 1),
            (b'!', _) => (Token::Bang, 1),
            (b'(', _) => (Token::Open, 1),
            (b')', _) => (Token::Close, 1),
            (b',', _) => (Token::Comma, 1),
            (b'0'..=b'9' | b'.', _) => {
                let len = number_len(&bytes[i..]);
                let text = &input[i..i + len];
                let value = text
                    .parse()
                    .map_err(|_| Error::Expression(format!("invalid number '{}' in '{}'", text, input)))?;
                (Token::Number(value), len)
            }
            (b'a'..=b'z' | b'A'..=b'Z' | b'_', _) => {
                let len = bytes[i..]
                    .iter()
                    .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
                    .count();
                (Token::Name(input[i..i + len].to_string()), len)
            }
            _ => {
                let ch = input[i..].chars().next().unwrap_or('?');
                return Err(Error::Expression(format!(
                    "unexpected character '{}' at offset {} in '{}'",
                    ch, i, input
                )));
            }
        };
        tokens.push(token);
        i += width;
    }

    Ok(tokens)
}

/// Length of the numeric literal at the start of `bytes`: digits and dots,
/// then an optional signed exponent.
fn number_len(bytes: &[u8]) -> usize {
    let mut len = bytes.iter().take_while(|b| b.is_ascii_digit() || **b == b'.').count();
    if matches!(bytes.get(len), Some(b'e' | b'E')) {
        let mut exp = len + 1;
        if matches!(bytes.get(exp), Some(b'+' | b'-')) {
            exp += 1;
        }
        let digits = bytes[exp.min(bytes.len())..].iter().take_while(|b| b.is_ascii_digit()).count();
        if digits > 0 {
            len = exp + digits;
        }
    }
    len
}

// ── Parser (precedence climbing) ───────────────────────────────

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    columns: Vec<String>,
    source: &'a str,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += usize::from(tok.is_some());
        tok
    }

    fn error(&self, msg: String) -> Error {
        Error::Expression(format!("{} in '{}'", msg, self.source))
    }

    fn eat(&mut self, expected: &Token) -> Result<()> {
        match self.next() {
            Some(ref tok) if tok == expected => Ok(()),
            Some(tok) => Err(self.error(format!("expected {}, found {}", expected, tok))),
            None => Err(self.error(format!("expected {}, found end of input", expected))),
        }
    }

    fn column(&mut self, name: String) -> usize {
        match self.columns.iter().position(|c| *c == name) {
            Some(i) => i,
            None => {
                self.columns.push(name);
                self.columns.len() - 1
            }
        }
    }

    /// Parse operators binding tighter than `min_prec`.
    fn expression(&mut self, min_prec: u8) -> Result<Expr> {
        let mut lhs = self.prefix()?;
        while let Some(&Token::Op(op)) = self.peek() {
            let prec = op.precedence();
            if prec <= min_prec {
                break;
            }
            self.pos += 1;
            let rhs = self.expression(prec)?;
            // Comparisons do not chain: `a < b < c` is rejected.
            if op.is_comparison()
                && let Some(&Token::Op(after)) = self.peek()
                && after.is_comparison()
            {
                return Err(self.error("chained comparison".into()));
            }
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Op(BinOp::Sub)) => Ok(Expr::Unary(UnOp::Neg, Box::new(self.prefix()?))),
            Some(Token::Bang) => Ok(Expr::Unary(UnOp::Not, Box::new(self.prefix()?))),
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Open) => {
                let inner = self.expression(0)?;
                self.eat(&Token::Close)?;
                Ok(inner)
            }
            Some(Token::Name(name)) if self.peek() == Some(&Token::Open) => {
                self.pos += 1;
                self.call(&name)
            }
            Some(Token::Name(name)) => Ok(Expr::Column(self.column(name))),
            Some(tok) => Err(self.error(format!("expected a value, found {}", tok))),
            None => Err(self.error("expression ends early".into())),
        }
    }

    fn call(&mut self, name: &str) -> Result<Expr> {
        let func = Func::from_name(name)
            .ok_or_else(|| self.error(format!("unknown function '{}'", name)))?;
        let mut args = vec![self.expression(0)?];
        while self.peek() == Some(&Token::Comma) {
            self.pos += 1;
            args.push(self.expression(0)?);
        }
        self.eat(&Token::Close)?;
        if args.len() != func.arity() {
            return Err(self.error(format!(
                "'{}' takes {} argument(s), got {}",
                name,
                func.arity(),
                args.len()
            )));
        }
        Ok(Expr::Call(func, args))
    }
}

// ── Tests ──────────────────────────────────────────────────────
