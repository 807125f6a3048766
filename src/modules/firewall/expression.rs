//! Firewall expression language
//!
//! ```text
//! or       := and ("||" and)*
//! and      := compare ("&&" compare)*
//! compare  := unary ((cmp | OPERATOR) unary)?
//! unary    := "!" unary | primary
//! primary  := STRING | INTEGER | "true" | "false" | FACT | "(" or ")"
//! cmp      := "==" | "!=" | "<" | "<=" | ">" | ">="
//! ```
//!
//! `OPERATOR` is any name in the [`OperatorRegistry`], written infix:
//! `http.query contains "union"`.

use super::error::{FirewallError, FirewallResult};
use super::facts::RequestFacts;
use super::operators::{OperatorRegistry, Value};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Str(String),
    Int(i64),
    Ident(String),
    LParen,
    RParen,
    Not,
    And,
    Or,
    Cmp(CmpOp),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone)]
enum Node {
    Literal(Value),
    Fact(String),
    Not(Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Compare(CmpOp, Box<Node>, Box<Node>),
    Call {
        operator: String,
        variable: Box<Node>,
        expression: Box<Node>,
    },
}

/// A compiled firewall expression
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    root: Node,
}

impl Expression {
    /// Compile `source`, resolving infix operators against `registry`.
    ///
    /// # Errors
    ///
    /// [`FirewallError::Parse`] on malformed text and
    /// [`FirewallError::UnknownOperator`] on an unregistered infix name.
    pub fn parse(source: &str, registry: &OperatorRegistry) -> FirewallResult<Self> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            end: source.len(),
            registry,
        };
        let root = parser.or()?;
        if let Some((offset, token)) = parser.tokens.get(parser.pos) {
            return Err(FirewallError::parse(
                *offset,
                format!("unexpected {:?} after expression", token),
            ));
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    /// Expression text as written
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate to a boolean.
    ///
    /// # Errors
    ///
    /// Unknown facts, operator failures, and non-boolean results.
    pub fn evaluate(&self, facts: &RequestFacts, registry: &OperatorRegistry) -> FirewallResult<bool> {
        match eval(&self.root, facts, registry)? {
            Value::Bool(b) => Ok(b),
            other => Err(FirewallError::TypeMismatch(format!(
                "expression yields {}, expected boolean",
                other.type_name()
            ))),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn eval(node: &Node, facts: &RequestFacts, registry: &OperatorRegistry) -> FirewallResult<Value> {
    match node {
        Node::Literal(value) => Ok(value.clone()),
        Node::Fact(key) => facts
            .get(key)
            .map(Value::from)
            .ok_or_else(|| FirewallError::UnknownFact(key.clone())),
        Node::Not(inner) => Ok(Value::Bool(!truthy(&eval(inner, facts, registry)?)?)),
        Node::And(lhs, rhs) => {
            if !truthy(&eval(lhs, facts, registry)?)? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(truthy(&eval(rhs, facts, registry)?)?))
        },
        Node::Or(lhs, rhs) => {
            if truthy(&eval(lhs, facts, registry)?)? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(truthy(&eval(rhs, facts, registry)?)?))
        },
        Node::Compare(op, lhs, rhs) => {
            let lhs = eval(lhs, facts, registry)?;
            let rhs = eval(rhs, facts, registry)?;
            compare(*op, &lhs, &rhs).map(Value::Bool)
        },
        Node::Call {
            operator,
            variable,
            expression,
        } => {
            let variable = eval(variable, facts, registry)?;
            let expression = eval(expression, facts, registry)?;
            registry
                .call(operator, &expression, &variable)
                .map(Value::Bool)
        },
    }
}

fn truthy(value: &Value) -> FirewallResult<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => Err(FirewallError::TypeMismatch(format!(
            "{} used as boolean",
            other.type_name()
        ))),
    }
}

fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> FirewallResult<bool> {
    let ordering = match op {
        CmpOp::Eq | CmpOp::Ne => {
            let equal = match (lhs, rhs) {
                (Value::Bool(a), Value::Bool(b)) => a == b,
                (Value::Bool(_), _) | (_, Value::Bool(_)) => {
                    return Err(FirewallError::TypeMismatch(format!(
                        "cannot compare {} with {}",
                        lhs.type_name(),
                        rhs.type_name()
                    )))
                },
                _ => lhs.as_text() == rhs.as_text(),
            };
            return Ok(equal == (op == CmpOp::Eq));
        },
        _ => match (lhs.as_int(), rhs.as_int()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => {
                return Err(FirewallError::TypeMismatch(format!(
                    "cannot order {} and {}",
                    lhs, rhs
                )))
            },
        },
    };

    Ok(match op {
        CmpOp::Lt => ordering == Ordering::Less,
        CmpOp::Le => ordering != Ordering::Greater,
        CmpOp::Gt => ordering == Ordering::Greater,
        CmpOp::Ge => ordering != Ordering::Less,
        CmpOp::Eq | CmpOp::Ne => false,
    })
}

struct Parser<'r> {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
    registry: &'r OperatorRegistry,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(o, _)| *o).unwrap_or(self.end)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn or(&mut self) -> FirewallResult<Node> {
        let mut node = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            node = Node::Or(Box::new(node), Box::new(self.and()?));
        }
        Ok(node)
    }

    fn and(&mut self) -> FirewallResult<Node> {
        let mut node = self.compare()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            node = Node::And(Box::new(node), Box::new(self.compare()?));
        }
        Ok(node)
    }

    fn compare(&mut self) -> FirewallResult<Node> {
        let lhs = self.unary()?;
        match self.peek().cloned() {
            Some(Token::Cmp(op)) => {
                self.pos += 1;
                let rhs = self.unary()?;
                Ok(Node::Compare(op, Box::new(lhs), Box::new(rhs)))
            },
            Some(Token::Ident(name)) => {
                if !self.registry.contains(&name) {
                    return Err(FirewallError::UnknownOperator(name));
                }
                self.pos += 1;
                let offset = self.offset();
                let rhs = self.unary()?;
                if self.registry.requires_literal(&name) && !matches!(rhs, Node::Literal(_)) {
                    return Err(FirewallError::parse(
                        offset,
                        format!("operator '{}' needs a literal operand", name),
                    ));
                }
                Ok(Node::Call {
                    operator: name,
                    variable: Box::new(lhs),
                    expression: Box::new(rhs),
                })
            },
            _ => Ok(lhs),
        }
    }

    fn unary(&mut self) -> FirewallResult<Node> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Node::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> FirewallResult<Node> {
        let offset = self.offset();
        match self.next() {
            Some(Token::Str(s)) => Ok(Node::Literal(Value::Str(s))),
            Some(Token::Int(n)) => Ok(Node::Literal(Value::Int(n))),
            Some(Token::Ident(name)) => Ok(match name.as_str() {
                "true" => Node::Literal(Value::Bool(true)),
                "false" => Node::Literal(Value::Bool(false)),
                _ => Node::Fact(name),
            }),
            Some(Token::LParen) => {
                let inner = self.or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(FirewallError::parse(self.offset(), "expected ')'")),
                }
            },
            Some(token) => Err(FirewallError::parse(
                offset,
                format!("unexpected {:?}", token),
            )),
            None => Err(FirewallError::parse(offset, "unexpected end of expression")),
        }
    }
}

fn tokenize(source: &str) -> FirewallResult<Vec<(usize, Token)>> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let token = match c {
            '(' => {
                chars.next();
                Token::LParen
            },
            ')' => {
                chars.next();
                Token::RParen
            },
            '&' | '|' => {
                chars.next();
                match chars.next() {
                    Some((_, n)) if n == c => {
                        if c == '&' {
                            Token::And
                        } else {
                            Token::Or
                        }
                    },
                    _ => return Err(FirewallError::parse(start, format!("expected '{}{}'", c, c))),
                }
            },
            '!' | '=' | '<' | '>' => {
                chars.next();
                let eq = chars.next_if(|&(_, n)| n == '=').is_some();
                match (c, eq) {
                    ('!', false) => Token::Not,
                    ('!', true) => Token::Cmp(CmpOp::Ne),
                    ('=', true) => Token::Cmp(CmpOp::Eq),
                    ('<', false) => Token::Cmp(CmpOp::Lt),
                    ('<', true) => Token::Cmp(CmpOp::Le),
                    ('>', false) => Token::Cmp(CmpOp::Gt),
                    ('>', true) => Token::Cmp(CmpOp::Ge),
                    _ => return Err(FirewallError::parse(start, "expected '=='")),
                }
            },
            '"' | '\'' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some((_, q)) if q == c => break,
                        Some((_, '\\')) => match chars.next() {
                            Some((_, 'n')) => text.push('\n'),
                            Some((_, 't')) => text.push('\t'),
                            Some((_, other)) => text.push(other),
                            None => return Err(FirewallError::parse(start, "unterminated string")),
                        },
                        Some((_, other)) => text.push(other),
                        None => return Err(FirewallError::parse(start, "unterminated string")),
                    }
                }
                Token::Str(text)
            },
            c if c.is_ascii_digit() || c == '-' => {
                chars.next();
                let mut end = start + c.len_utf8();
                while let Some((i, d)) = chars.next_if(|&(_, d)| d.is_ascii_digit()) {
                    end = i + d.len_utf8();
                }
                let literal = &source[start..end];
                let n = literal
                    .parse()
                    .map_err(|_| FirewallError::parse(start, format!("invalid integer '{}'", literal)))?;
                Token::Int(n)
            },
            c if c.is_alphabetic() || c == '_' => {
                let mut end = start;
                while let Some((i, d)) =
                    chars.next_if(|&(_, d)| d.is_alphanumeric() || d == '_' || d == '.')
                {
                    end = i + d.len_utf8();
                }
                Token::Ident(source[start..end].to_string())
            },
            other => {
                return Err(FirewallError::parse(
                    start,
                    format!("unexpected character '{}'", other),
                ))
            },
        };
        tokens.push((start, token));
    }

    Ok(tokens)
}
