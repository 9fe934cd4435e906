//! Typed expressions over one table's rows.
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! expr    := or
//! or      := and ("||" and)*
//! and     := eq ("&&" eq)*
//! eq      := cmp (("==" | "!=") cmp)*
//! cmp     := add (("<" | "<=" | ">" | ">=") add)*
//! add     := mul (("+" | "-") mul)*
//! mul     := unary (("*" | "/" | "%") unary)*
//! unary   := ("!" | "-") unary | primary
//! primary := TRUE | FALSE | number | 'text' | "text" | _id | _score
//!          | column ("." column)* | "(" expr ")"
//! ```
//!
//! Types are checked while parsing. Comparisons involving NA are false and
//! arithmetic with NA yields NA.

use std::cmp::Ordering;

use super::{Column, DataKind, Datum, Db, Record, Table};
use crate::error::{CoordError, Result};

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Text(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
}

const OPERATORS: [&str; 15] = [
    "&&", "||", "==", "!=", "<=", ">=", "<", ">", "!", "+", "-", "*", "/", "%", "=",
];

fn syntax(message: impl Into<String>) -> CoordError {
    CoordError::InvalidArgument(format!("expression: {}", message.into()))
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let bytes = text.as_bytes();
    let mut pos = 0;
    while pos < bytes.len() {
        let c = bytes[pos];
        if c.is_ascii_whitespace() {
            pos += 1;
        } else if c == b'(' {
            tokens.push(Token::LParen);
            pos += 1;
        } else if c == b')' {
            tokens.push(Token::RParen);
            pos += 1;
        } else if c == b'\'' || c == b'"' {
            let mut value = String::new();
            let mut chars = text[pos + 1..].char_indices();
            let mut escaped = false;
            let mut end = None;
            for (offset, ch) in chars.by_ref() {
                if escaped {
                    value.push(ch);
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch as u32 == u32::from(c) {
                    end = Some(pos + 1 + offset + 1);
                    break;
                } else {
                    value.push(ch);
                }
            }
            pos = end.ok_or_else(|| syntax("unterminated text literal"))?;
            tokens.push(Token::Text(value));
        } else if c.is_ascii_digit() {
            let start = pos;
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
            let mut is_float = false;
            if pos < bytes.len() && bytes[pos] == b'.' {
                is_float = true;
                pos += 1;
                while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                    pos += 1;
                }
            }
            if pos < bytes.len() && (bytes[pos] == b'e' || bytes[pos] == b'E') {
                is_float = true;
                pos += 1;
                if pos < bytes.len() && (bytes[pos] == b'+' || bytes[pos] == b'-') {
                    pos += 1;
                }
                while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                    pos += 1;
                }
            }
            let literal = &text[start..pos];
            let token = if is_float {
                Token::Float(
                    literal
                        .parse()
                        .map_err(|_| syntax(format!("bad number {literal}")))?,
                )
            } else {
                Token::Int(
                    literal
                        .parse()
                        .map_err(|_| syntax(format!("integer out of range: {literal}")))?,
                )
            };
            tokens.push(token);
        } else if c.is_ascii_alphabetic() || c == b'_' {
            let start = pos;
            while pos < bytes.len()
                && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_' || bytes[pos] == b'.')
            {
                pos += 1;
            }
            tokens.push(Token::Ident(text[start..pos].to_string()));
        } else {
            let rest = &text[pos..];
            let op = *OPERATORS
                .iter()
                .find(|op| rest.starts_with(**op))
                .ok_or_else(|| syntax(format!("unexpected character at {pos}: {rest:?}")))?;
            if op == "=" {
                return Err(syntax("use == for equality"));
            }
            tokens.push(Token::Op(op));
            pos += op.len();
        }
    }
    Ok(tokens)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum UnaryOp {
    Not,
    Neg,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    fn from_token(op: &str) -> Option<(Self, u8)> {
        let entry = match op {
            "||" => (BinaryOp::Or, 1),
            "&&" => (BinaryOp::And, 2),
            "==" => (BinaryOp::Eq, 3),
            "!=" => (BinaryOp::Ne, 3),
            "<" => (BinaryOp::Lt, 4),
            "<=" => (BinaryOp::Le, 4),
            ">" => (BinaryOp::Gt, 4),
            ">=" => (BinaryOp::Ge, 4),
            "+" => (BinaryOp::Add, 5),
            "-" => (BinaryOp::Sub, 5),
            "*" => (BinaryOp::Mul, 6),
            "/" => (BinaryOp::Div, 6),
            "%" => (BinaryOp::Rem, 6),
            _ => return None,
        };
        Some(entry)
    }
}

#[derive(Debug)]
enum Node<'a> {
    Constant(Datum),
    RowId,
    Score,
    /// Column path; every column but the last is a reference column.
    Column(Vec<&'a Column>),
    Unary(UnaryOp, Box<Node<'a>>),
    Binary(BinaryOp, Box<Node<'a>>, Box<Node<'a>>),
}

struct Parser<'a, 't> {
    db: &'a Db,
    table: &'a Table,
    tokens: &'t [Token],
    pos: usize,
}

impl<'a, 't> Parser<'a, 't> {
    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn parse_binary(&mut self, min_prec: u8) -> Result<(Node<'a>, DataKind)> {
        let (mut lhs, mut lhs_kind) = self.parse_unary()?;
        while let Some(Token::Op(op)) = self.peek() {
            let Some((binary, prec)) = BinaryOp::from_token(op) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let (rhs, rhs_kind) = self.parse_binary(prec + 1)?;
            let kind = binary_kind(binary, lhs_kind, rhs_kind)?;
            lhs = Node::Binary(binary, Box::new(lhs), Box::new(rhs));
            lhs_kind = kind;
        }
        Ok((lhs, lhs_kind))
    }

    fn parse_unary(&mut self) -> Result<(Node<'a>, DataKind)> {
        match self.peek() {
            Some(Token::Op("!")) => {
                self.pos += 1;
                let (operand, kind) = self.parse_unary()?;
                if kind != DataKind::Bool {
                    return Err(syntax(format!("! needs a Bool operand, got {kind}")));
                }
                Ok((Node::Unary(UnaryOp::Not, Box::new(operand)), DataKind::Bool))
            }
            Some(Token::Op("-")) => {
                self.pos += 1;
                let (operand, kind) = self.parse_unary()?;
                if !kind.is_numeric() {
                    return Err(syntax(format!("- needs a numeric operand, got {kind}")));
                }
                Ok((Node::Unary(UnaryOp::Neg, Box::new(operand)), kind))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<(Node<'a>, DataKind)> {
        let token = self.advance().ok_or_else(|| syntax("unexpected end of input"))?;
        match token {
            Token::Int(i) => Ok((Node::Constant(Datum::Int(*i)), DataKind::Int)),
            Token::Float(f) => Ok((Node::Constant(Datum::Float(*f)), DataKind::Float)),
            Token::Text(s) => Ok((Node::Constant(Datum::Text(s.clone())), DataKind::Text)),
            Token::LParen => {
                let inner = self.parse_binary(1)?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(syntax("missing )")),
                }
            }
            Token::Ident(name) => match name.as_str() {
                "TRUE" => Ok((Node::Constant(Datum::Bool(true)), DataKind::Bool)),
                "FALSE" => Ok((Node::Constant(Datum::Bool(false)), DataKind::Bool)),
                "_id" => Ok((Node::RowId, DataKind::Int)),
                "_score" => Ok((Node::Score, DataKind::Float)),
                path => self.resolve_path(path),
            },
            other => Err(syntax(format!("unexpected token {other:?}"))),
        }
    }

    fn resolve_path(&self, path: &str) -> Result<(Node<'a>, DataKind)> {
        let mut table = self.table;
        let mut chain = Vec::new();
        let mut parts = path.split('.').peekable();
        while let Some(part) = parts.next() {
            let column = table.find_column(part).ok_or_else(|| {
                CoordError::NotFound(format!("column {}.{part}", table.name()))
            })?;
            chain.push(column);
            if parts.peek().is_some() {
                let target = column.reference().ok_or_else(|| {
                    syntax(format!("{}.{part} is not a reference column", table.name()))
                })?;
                table = self.db.table(target)?;
            }
        }
        let kind = chain
            .last()
            .map(|c| c.kind())
            .ok_or_else(|| syntax(format!("empty column path {path:?}")))?;
        Ok((Node::Column(chain), kind))
    }
}

fn binary_kind(op: BinaryOp, lhs: DataKind, rhs: DataKind) -> Result<DataKind> {
    let numeric = lhs.is_numeric() && rhs.is_numeric();
    let kind = match op {
        BinaryOp::Or | BinaryOp::And if lhs == DataKind::Bool && rhs == DataKind::Bool => {
            DataKind::Bool
        }
        BinaryOp::Eq | BinaryOp::Ne if lhs == rhs || numeric => DataKind::Bool,
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
            if numeric || (lhs == DataKind::Text && rhs == DataKind::Text) =>
        {
            DataKind::Bool
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem
            if numeric =>
        {
            if lhs == DataKind::Int && rhs == DataKind::Int {
                DataKind::Int
            } else {
                DataKind::Float
            }
        }
        _ => {
            return Err(syntax(format!(
                "operator {op:?} does not apply to {lhs} and {rhs}"
            )))
        }
    };
    Ok(kind)
}

fn compare(lhs: &Datum, rhs: &Datum) -> Option<Ordering> {
    match (lhs, rhs) {
        (Datum::Na, _) | (_, Datum::Na) => None,
        (Datum::Int(a), Datum::Int(b)) => Some(a.cmp(b)),
        (Datum::Text(a), Datum::Text(b)) => Some(a.cmp(b)),
        (Datum::Bool(a), Datum::Bool(b)) => Some(a.cmp(b)),
        (a, b) => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

fn arithmetic(op: BinaryOp, lhs: Datum, rhs: Datum) -> Datum {
    match (lhs, rhs) {
        (Datum::Int(a), Datum::Int(b)) => {
            let value = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div => a.checked_div(b),
                BinaryOp::Rem => a.checked_rem(b),
                _ => None,
            };
            value.map_or(Datum::Na, Datum::Int)
        }
        (a, b) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Datum::Float(match op {
                BinaryOp::Add => x + y,
                BinaryOp::Sub => x - y,
                BinaryOp::Mul => x * y,
                BinaryOp::Div => x / y,
                BinaryOp::Rem => x % y,
                _ => return Datum::Na,
            }),
            _ => Datum::Na,
        },
    }
}

impl Node<'_> {
    fn evaluate(&self, record: &Record) -> Datum {
        match self {
            Node::Constant(datum) => datum.clone(),
            Node::RowId => Datum::Int(record.row_id),
            Node::Score => Datum::Float(record.score),
            Node::Column(chain) => {
                let mut row_id = record.row_id;
                let Some((last, references)) = chain.split_last() else {
                    return Datum::Na;
                };
                for column in references {
                    match column.get(row_id) {
                        Datum::Int(target) => row_id = target,
                        _ => return Datum::Na,
                    }
                }
                last.get(row_id)
            }
            Node::Unary(op, operand) => match (op, operand.evaluate(record)) {
                (UnaryOp::Not, Datum::Bool(b)) => Datum::Bool(!b),
                (UnaryOp::Neg, Datum::Int(i)) => i.checked_neg().map_or(Datum::Na, Datum::Int),
                (UnaryOp::Neg, Datum::Float(f)) => Datum::Float(-f),
                _ => Datum::Na,
            },
            Node::Binary(op, lhs, rhs) => {
                let lhs = lhs.evaluate(record);
                match op {
                    BinaryOp::And => {
                        if lhs != Datum::Bool(true) {
                            return Datum::Bool(false);
                        }
                        Datum::Bool(rhs.evaluate(record) == Datum::Bool(true))
                    }
                    BinaryOp::Or => {
                        if lhs == Datum::Bool(true) {
                            return Datum::Bool(true);
                        }
                        Datum::Bool(rhs.evaluate(record) == Datum::Bool(true))
                    }
                    _ => {
                        let rhs = rhs.evaluate(record);
                        let ordering = || compare(&lhs, &rhs);
                        match op {
                            BinaryOp::Eq => Datum::Bool(ordering() == Some(Ordering::Equal)),
                            BinaryOp::Ne => Datum::Bool(matches!(
                                ordering(),
                                Some(Ordering::Less | Ordering::Greater)
                            )),
                            BinaryOp::Lt => Datum::Bool(ordering() == Some(Ordering::Less)),
                            BinaryOp::Le => Datum::Bool(matches!(
                                ordering(),
                                Some(Ordering::Less | Ordering::Equal)
                            )),
                            BinaryOp::Gt => Datum::Bool(ordering() == Some(Ordering::Greater)),
                            BinaryOp::Ge => Datum::Bool(matches!(
                                ordering(),
                                Some(Ordering::Greater | Ordering::Equal)
                            )),
                            _ => arithmetic(*op, lhs, rhs),
                        }
                    }
                }
            }
        }
    }
}

/// A parsed, type-checked expression bound to a table.
#[derive(Debug)]
pub struct Expression<'a> {
    root: Node<'a>,
    kind: DataKind,
}

impl<'a> Expression<'a> {
    pub fn parse(db: &'a Db, table: &str, text: &str) -> Result<Self> {
        let table = db.table(table)?;
        let tokens = tokenize(text)?;
        let mut parser = Parser {
            db,
            table,
            tokens: &tokens,
            pos: 0,
        };
        let (root, kind) = parser.parse_binary(1)?;
        if let Some(token) = parser.peek() {
            return Err(syntax(format!("unexpected token {token:?}")));
        }
        Ok(Self { root, kind })
    }

    pub fn kind(&self) -> DataKind {
        self.kind
    }

    pub fn evaluate(&self, record: &Record) -> Datum {
        self.root.evaluate(record)
    }

    pub fn evaluate_all(&self, records: &[Record]) -> Vec<Datum> {
        records.iter().map(|r| self.evaluate(r)).collect()
    }

    /// Keeps records for which the expression is true, skipping the first
    /// `offset` matches and keeping at most `limit`.
    pub fn filter(&self, records: &mut Vec<Record>, offset: usize, limit: usize) {
        let mut skipped = 0;
        let mut kept = 0;
        records.retain(|record| {
            if kept >= limit || self.evaluate(record) != Datum::Bool(true) {
                return false;
            }
            if skipped < offset {
                skipped += 1;
                return false;
            }
            kept += 1;
            true
        });
    }

    /// Replaces each record's score with the expression's value. NA
    /// becomes 0.
    pub fn adjust(&self, records: &mut [Record]) {
        for record in records {
            record.score = self.evaluate(record).as_f64().unwrap_or(0.0);
        }
    }
}
