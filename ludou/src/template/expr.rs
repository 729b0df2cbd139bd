//! Expression grammar
//!
//! ```text
//! expr    := or
//! or      := and (("||" | "or") and)*
//! and     := cmp (("&&" | "and") cmp)*
//! cmp     := sum (("==" | "!=" | "<" | "<=" | ">" | ">=") sum)*
//! sum     := product (("+" | "-" | "~") product)*
//! product := unary (("*" | "/" | "%") unary)*
//! unary   := ("!" | "not" | "-") unary | postfix
//! postfix := primary ("." ident | "->" ident | "[" expr "]" | "|" ident ("(" args ")")?)*
//! primary := $var | ident | ident "(" args ")" | literal | "[" args "]" | "(" expr ")"
//! ```
//!
//! Filters bind tighter than any operator: `$a ~ $b | upper` upper-cases `$b` only.

use super::ast::{BinaryOp, Expr, Literal, UnaryOp};

/// Parse failure, with a byte offset relative to the expression text
#[derive(Debug, Clone, PartialEq)]
pub struct ExprError {
    pub message: String,
    pub offset: usize,
}

impl std::fmt::Display for ExprError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (at offset {})", self.message, self.offset)
    }
}

impl std::error::Error for ExprError {}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Var(String),
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    Op(&'static str),
}

/// Operators, longest first so `<=` wins over `<`
const OPERATORS: &[&str] = &[
    "->", "==", "!=", "<=", ">=", "&&", "||", "<", ">", "!", "+", "-", "*", "/", "%", "~", "|",
    ".", ",", "(", ")", "[", "]",
];

fn tokenize(text: &str) -> Result<Vec<(Tok, usize)>, ExprError> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let start = i;

        if c == b'$' || c.is_ascii_alphabetic() || c == b'_' {
            let name_start = if c == b'$' { i + 1 } else { i };
            let mut j = name_start;
            while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_') {
                j += 1;
            }
            if j == name_start {
                return Err(ExprError {
                    message: "expected a variable name after `$`".to_string(),
                    offset: start,
                });
            }
            let name = text[name_start..j].to_string();
            tokens.push((if c == b'$' { Tok::Var(name) } else { Tok::Ident(name) }, start));
            i = j;
        } else if c.is_ascii_digit() {
            let mut j = i;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            let is_float =
                j + 1 < bytes.len() && bytes[j] == b'.' && bytes[j + 1].is_ascii_digit();
            if is_float {
                j += 1;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    j += 1;
                }
                let value = text[i..j].parse::<f64>().map_err(|e| ExprError {
                    message: format!("invalid number: {e}"),
                    offset: start,
                })?;
                tokens.push((Tok::Float(value), start));
            } else {
                let value = text[i..j].parse::<i64>().map_err(|e| ExprError {
                    message: format!("invalid number: {e}"),
                    offset: start,
                })?;
                tokens.push((Tok::Int(value), start));
            }
            i = j;
        } else if c == b'\'' || c == b'"' {
            let (value, end) = read_string(text, i)?;
            tokens.push((Tok::Str(value), start));
            i = end;
        } else if let Some(op) = OPERATORS.iter().find(|op| text[i..].starts_with(**op)) {
            tokens.push((Tok::Op(*op), start));
            i += op.len();
        } else {
            let ch = text[i..].chars().next().unwrap_or('?');
            return Err(ExprError {
                message: format!("unexpected character `{ch}`"),
                offset: start,
            });
        }
    }

    Ok(tokens)
}

/// Read a quoted string starting at `start` (the quote). Returns the
/// unescaped value and the offset just past the closing quote.
fn read_string(text: &str, start: usize) -> Result<(String, usize), ExprError> {
    let quote = text.as_bytes()[start] as char;
    let mut value = String::new();
    let mut chars = text[start + 1..].char_indices();

    while let Some((idx, ch)) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some((_, 'n')) => value.push('\n'),
                Some((_, 't')) => value.push('\t'),
                Some((_, other)) => value.push(other),
                None => break,
            },
            c if c == quote => return Ok((value, start + 1 + idx + 1)),
            c => value.push(c),
        }
    }

    Err(ExprError {
        message: "unterminated string literal".to_string(),
        offset: start,
    })
}

/// Parse a complete expression
pub fn parse_expr(text: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return Err(ExprError {
            message: "empty expression".to_string(),
            offset: 0,
        });
    }
    let mut parser = ExprParser {
        tokens,
        pos: 0,
        len: text.len(),
    };
    let expr = parser.parse_or()?;
    if let Some((tok, offset)) = parser.tokens.get(parser.pos) {
        return Err(ExprError {
            message: format!("unexpected {} after expression", describe(tok)),
            offset: *offset,
        });
    }
    Ok(expr)
}

/// Parse a comma-separated argument list such as `'name', 'default'`
pub fn parse_args(text: &str) -> Result<Vec<Expr>, ExprError> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let tokens = tokenize(text)?;
    let mut parser = ExprParser {
        tokens,
        pos: 0,
        len: text.len(),
    };
    let mut args = vec![parser.parse_or()?];
    while parser.eat_op(",") {
        args.push(parser.parse_or()?);
    }
    if let Some((tok, offset)) = parser.tokens.get(parser.pos) {
        return Err(ExprError {
            message: format!("unexpected {} in argument list", describe(tok)),
            offset: *offset,
        });
    }
    Ok(args)
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Var(name) => format!("variable `${name}`"),
        Tok::Ident(name) => format!("`{name}`"),
        Tok::Str(_) => "string".to_string(),
        Tok::Int(_) | Tok::Float(_) => "number".to_string(),
        Tok::Op(op) => format!("`{op}`"),
    }
}

struct ExprParser {
    tokens: Vec<(Tok, usize)>,
    pos: usize,
    len: usize,
}

impl ExprParser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(_, o)| *o).unwrap_or(self.len)
    }

    fn error(&self, message: impl Into<String>) -> ExprError {
        ExprError {
            message: message.into(),
            offset: self.offset(),
        }
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn is_op(&self, op: &str) -> bool {
        matches!(self.peek(), Some(Tok::Op(o)) if *o == op)
    }

    fn is_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Tok::Ident(name)) if name == kw)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.is_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> Result<(), ExprError> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(match self.peek() {
                Some(tok) => self.error(format!("expected `{op}`, found {}", describe(tok))),
                None => self.error(format!("expected `{op}`, found end of expression")),
            })
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_and()?;
        while self.eat_op("||") || self.eat_keyword("or") {
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_cmp()?;
        while self.eat_op("&&") || self.eat_keyword("and") {
            let right = self.parse_cmp()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_cmp(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_sum()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Op("==")) => BinaryOp::Eq,
                Some(Tok::Op("!=")) => BinaryOp::Ne,
                Some(Tok::Op("<")) => BinaryOp::Lt,
                Some(Tok::Op("<=")) => BinaryOp::Le,
                Some(Tok::Op(">")) => BinaryOp::Gt,
                Some(Tok::Op(">=")) => BinaryOp::Ge,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_sum()?;
            left = binary(op, left, right);
        }
    }

    fn parse_sum(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_product()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Op("+")) => BinaryOp::Add,
                Some(Tok::Op("-")) => BinaryOp::Sub,
                Some(Tok::Op("~")) => BinaryOp::Concat,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_product()?;
            left = binary(op, left, right);
        }
    }

    fn parse_product(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Op("*")) => BinaryOp::Mul,
                Some(Tok::Op("/")) => BinaryOp::Div,
                Some(Tok::Op("%")) => BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        let op = if self.eat_op("!") || self.eat_keyword("not") {
            UnaryOp::Not
        } else if self.eat_op("-") {
            UnaryOp::Neg
        } else {
            return self.parse_postfix();
        };
        let expr = self.parse_unary()?;
        Ok(Expr::Unary {
            op,
            expr: Box::new(expr),
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat_op(".") || self.eat_op("->") {
                let field = match self.next() {
                    Some(Tok::Ident(name)) => name,
                    Some(Tok::Int(i)) => i.to_string(),
                    _ => return Err(self.error("expected a field name")),
                };
                expr = Expr::Field {
                    base: Box::new(expr),
                    field,
                };
            } else if self.eat_op("[") {
                let index = self.parse_or()?;
                self.expect_op("]")?;
                expr = Expr::Index {
                    base: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.eat_op("|") {
                let name = match self.next() {
                    Some(Tok::Ident(name)) => name,
                    _ => return Err(self.error("expected a filter name after `|`")),
                };
                let args = if self.eat_op("(") {
                    self.parse_call_args()?
                } else {
                    Vec::new()
                };
                expr = Expr::Filter {
                    expr: Box::new(expr),
                    name,
                    args,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        let Some(tok) = self.next() else {
            return Err(self.error("unexpected end of expression"));
        };
        match tok {
            Tok::Var(name) => Ok(Expr::Var(name)),
            Tok::Str(s) => Ok(Expr::Literal(Literal::Str(s))),
            Tok::Int(i) => Ok(Expr::Literal(Literal::Int(i))),
            Tok::Float(f) => Ok(Expr::Literal(Literal::Float(f))),
            Tok::Ident(name) => {
                let literal = match name.as_str() {
                    "true" => Some(Literal::Bool(true)),
                    "false" => Some(Literal::Bool(false)),
                    "null" | "none" => Some(Literal::Null),
                    _ => None,
                };
                if let Some(literal) = literal {
                    Ok(Expr::Literal(literal))
                } else if self.eat_op("(") {
                    Ok(Expr::Call {
                        name,
                        args: self.parse_call_args()?,
                    })
                } else {
                    // Bare identifiers read as variables
                    Ok(Expr::Var(name))
                }
            }
            Tok::Op("(") => {
                let expr = self.parse_or()?;
                self.expect_op(")")?;
                Ok(expr)
            }
            Tok::Op("[") => {
                let mut items = Vec::new();
                if !self.eat_op("]") {
                    items.push(self.parse_or()?);
                    while self.eat_op(",") {
                        items.push(self.parse_or()?);
                    }
                    self.expect_op("]")?;
                }
                Ok(Expr::List(items))
            }
            other => {
                self.pos -= 1;
                Err(self.error(format!("unexpected {}", describe(&other))))
            }
        }
    }

    /// Arguments after an opening `(`, consuming the closing `)`
    fn parse_call_args(&mut self) -> Result<Vec<Expr>, ExprError> {
        let mut args = Vec::new();
        if self.eat_op(")") {
            return Ok(args);
        }
        args.push(self.parse_or()?);
        while self.eat_op(",") {
            args.push(self.parse_or()?);
        }
        self.expect_op(")")?;
        Ok(args)
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.is_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}
