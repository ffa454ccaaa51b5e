//! Parser for the host expression syntax.
//!
//! Only what specifications and placeholder statements need: literals,
//! names, member access, calls, indexing, `new`, casts, unary and binary
//! operators. Unqualified calls `f(x)` parse as calls on `this`.

use std::rc::Rc;

use logos::Logos;
use thiserror::Error;

use crate::expr::{BinopKind, Expr, Literal, UnopKind};
use crate::types::Type;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at offset {offset}")]
pub struct ParseError {
    pub offset: usize,
    pub message: String,
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
enum Token {
    #[token("true", |_| true)]
    #[token("false", |_| false)]
    Bool(bool),
    #[token("null")]
    Null,
    /// Magnitude only; the parser range-checks it once a leading minus
    /// has been folded in.
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<u64>().ok())]
    Int(u64),
    #[regex(r"[0-9]+[lL]", |lex| {
        let s = lex.slice();
        s[..s.len() - 1].parse::<u64>().ok()
    })]
    Long(u64),
    #[regex(r"[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Double(f64),
    #[regex(r#""([^"\\]|\\.)*""#, |lex| {
        let s = lex.slice();
        unescape(&s[1..s.len() - 1])
    })]
    Str(String),
    #[regex(r"'([^'\\]|\\.)+'", |lex| {
        let s = lex.slice();
        let text = unescape(&s[1..s.len() - 1])?;
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(ch), None) => Some(ch),
            _ => None,
        }
    })]
    Char(char),
    #[regex(r"[a-zA-Z_$][a-zA-Z0-9_$]*", |lex| lex.slice().to_string())]
    Ident(String),
    #[token("==", |_| "==")]
    #[token("!=", |_| "!=")]
    #[token("<=", |_| "<=")]
    #[token(">=", |_| ">=")]
    #[token("&&", |_| "&&")]
    #[token("||", |_| "||")]
    #[token("(", |_| "(")]
    #[token(")", |_| ")")]
    #[token("[", |_| "[")]
    #[token("]", |_| "]")]
    #[token("{", |_| "{")]
    #[token("}", |_| "}")]
    #[token(".", |_| ".")]
    #[token(",", |_| ",")]
    #[token(";", |_| ";")]
    #[token("+", |_| "+")]
    #[token("-", |_| "-")]
    #[token("*", |_| "*")]
    #[token("/", |_| "/")]
    #[token("%", |_| "%")]
    #[token("<", |_| "<")]
    #[token(">", |_| ">")]
    #[token("!", |_| "!")]
    #[token("=", |_| "=")]
    Punct(StaticStr),
}

/// Alias so the `Logos` derive does not rewrite `'static` to the source
/// lifetime.
type StaticStr = &'static str;

impl Token {
    fn starts_operand(&self) -> bool {
        match self {
            Token::Punct(p) => matches!(*p, "(" | "!"),
            _ => true,
        }
    }
}

fn unescape(s: &str) -> Option<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        out.push(match chars.next()? {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            other => other,
        });
    }
    Some(out)
}

fn lex(src: &str) -> Result<Vec<(usize, Token)>, ParseError> {
    Token::lexer(src)
        .spanned()
        .map(|(tok, span)| match tok {
            Ok(tok) => Ok((span.start, tok)),
            Err(()) => Err(ParseError {
                offset: span.start,
                message: format!("bad token `{}`", &src[span]),
            }),
        })
        .collect()
}

/// Applies the sign to a lexed magnitude, rejecting values outside `T`.
fn signed<T: TryFrom<i128>>(magnitude: u64, negative: bool) -> Option<T> {
    let x = i128::from(magnitude);
    T::try_from(if negative { -x } else { x }).ok()
}

/// Recursive-descent parser with precedence climbing for binary operators.
pub struct Parser<'a> {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
    is_type: &'a dyn Fn(&str) -> bool,
}

impl<'a> Parser<'a> {
    /// `is_type` decides whether a bare identifier names a type (and thus
    /// parses as a static reference) rather than a variable.
    pub fn new(src: &str, is_type: &'a dyn Fn(&str) -> bool) -> Result<Self, ParseError> {
        Ok(Self {
            tokens: lex(src)?,
            pos: 0,
            end: src.len(),
            is_type,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn peek_at(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |(at, _)| *at)
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T, ParseError> {
        Err(ParseError {
            offset: self.offset(),
            message: message.into(),
        })
    }

    fn eat(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Some(Token::Punct(p)) if *p == punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> Result<(), ParseError> {
        if self.eat(punct) {
            Ok(())
        } else {
            self.error(format!("expected `{punct}`"))
        }
    }

    pub fn ident(&mut self) -> Result<String, ParseError> {
        match self.peek().cloned() {
            Some(Token::Ident(name)) => {
                self.pos += 1;
                Ok(name)
            },
            _ => self.error("expected identifier"),
        }
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    pub fn finish(&mut self) -> Result<(), ParseError> {
        self.eat(";");
        if self.at_end() {
            Ok(())
        } else {
            self.error("trailing input")
        }
    }

    pub fn eat_assign(&mut self) -> bool {
        self.eat("=")
    }

    pub fn expr(&mut self) -> Result<Expr, ParseError> {
        self.binary(0)
    }

    fn binop(&self) -> Option<BinopKind> {
        let Some(Token::Punct(p)) = self.peek() else {
            return None;
        };

        BinopKind::ALL.into_iter().find(|op| op.symbol() == *p)
    }

    fn binary(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.unary()?;

        while let Some(op) = self.binop() {
            if op.precedence() < min_prec {
                break;
            }
            self.pos += 1;
            let rhs = self.binary(op.precedence() + 1)?;
            lhs = Expr::binop(op, lhs, rhs);
        }

        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat("!") {
            return Ok(Expr::unop(UnopKind::Not, self.unary()?));
        }

        if self.eat("-") {
            if let Some(lit) = self.negative_literal()? {
                return Ok(Expr::literal(lit));
            }
            let operand = self.unary()?;
            let folded = match operand.as_literal() {
                Some(Literal::Double(bits)) => Some(Literal::Double((-f64::from_bits(*bits)).to_bits())),
                _ => None,
            };
            return Ok(match folded {
                Some(lit) => Expr::literal(lit),
                None => Expr::unop(UnopKind::Negate, operand),
            });
        }

        if let Some(ty) = self.cast_prefix() {
            return Ok(Expr::cast(ty, self.unary()?));
        }

        self.postfix()
    }

    /// Folds the minus into an integral literal that follows it directly,
    /// so `-2147483648` is an int. A literal with postfix access such as
    /// `-1.x` is left to the general rule.
    fn negative_literal(&mut self) -> Result<Option<Literal>, ParseError> {
        if matches!(self.peek_at(1), Some(Token::Punct("." | "["))) {
            return Ok(None);
        }
        let lit = match self.peek() {
            Some(&Token::Int(n)) => signed(n, true).map(Literal::Int),
            Some(&Token::Long(n)) => signed(n, true).map(Literal::Long),
            _ => return Ok(None),
        };
        match lit {
            Some(lit) => {
                self.pos += 1;
                Ok(Some(lit))
            },
            None => self.error("literal out of range"),
        }
    }

    /// Recognizes `(Type) operand`. A parenthesized name counts as a cast
    /// when it names a type and the next token can start an operand.
    fn cast_prefix(&mut self) -> Option<Type> {
        if !matches!(self.peek(), Some(Token::Punct("("))) {
            return None;
        }

        let Some(Token::Ident(name)) = self.peek_at(1) else {
            return None;
        };
        let mut name = name.clone();
        let mut len = 2;
        while matches!(self.peek_at(len), Some(Token::Punct("["))) && matches!(self.peek_at(len + 1), Some(Token::Punct("]"))) {
            name.push_str("[]");
            len += 2;
        }

        if !matches!(self.peek_at(len), Some(Token::Punct(")"))) {
            return None;
        }

        let starts_operand = self.peek_at(len + 1).is_some_and(Token::starts_operand);
        let base = name.trim_end_matches("[]");
        let names_type = Type::parse(base).is_some_and(|t| t.is_primitive()) || (self.is_type)(base);

        if !starts_operand || !names_type {
            return None;
        }

        let ty = Type::parse(&name)?;
        self.pos += len + 1;
        Some(ty)
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut e = self.primary()?;

        loop {
            if self.eat(".") {
                let name = self.ident()?;
                if self.eat("(") {
                    let args = self.args()?;
                    e = Expr::call(e, &name, args);
                } else {
                    e = Expr::field(e, &name);
                }
            } else if self.eat("[") {
                let idx = self.expr()?;
                self.expect("]")?;
                e = Expr::index(e, idx);
            } else {
                return Ok(e);
            }
        }
    }

    fn args(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();

        if self.eat(")") {
            return Ok(args);
        }

        loop {
            args.push(self.expr()?);
            if self.eat(")") {
                return Ok(args);
            }
            self.expect(",")?;
        }
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let lit = match self.peek().cloned() {
            Some(Token::Bool(b)) => Literal::Bool(b),
            Some(Token::Null) => Literal::Null,
            Some(Token::Int(n)) => match signed(n, false) {
                Some(x) => Literal::Int(x),
                None => return self.error("int literal out of range"),
            },
            Some(Token::Long(n)) => match signed(n, false) {
                Some(x) => Literal::Long(x),
                None => return self.error("long literal out of range"),
            },
            Some(Token::Double(x)) => Literal::Double(x.to_bits()),
            Some(Token::Str(text)) => Literal::Str(text.into()),
            Some(Token::Char(ch)) => Literal::Char(ch),
            _ => return self.name_or_group(),
        };
        self.pos += 1;
        Ok(Expr::literal(lit))
    }

    fn name_or_group(&mut self) -> Result<Expr, ParseError> {
        match self.peek().cloned() {
            Some(Token::Punct("(")) => {
                self.pos += 1;
                let inner = self.expr()?;
                self.expect(")")?;
                Ok(Expr::paren(inner))
            },
            Some(Token::Ident(name)) => {
                self.pos += 1;
                match name.as_str() {
                    "this" => Ok(Expr::this()),
                    "new" => {
                        let mut ty_name = self.ident()?;
                        while self.eat("[") {
                            self.expect("]")?;
                            ty_name.push_str("[]");
                        }
                        let Some(ty) = Type::parse(&ty_name) else {
                            return self.error(format!("bad type `{ty_name}`"));
                        };
                        self.expect("(")?;
                        let args = self.args()?;
                        Ok(Expr::new_instance(ty, args))
                    },
                    _ if self.eat("(") => {
                        let args = self.args()?;
                        Ok(Expr::call(Expr::this(), &name, args))
                    },
                    _ if (self.is_type)(&name) => Ok(Expr::static_ref(Type::Class(Rc::from(name)))),
                    _ => Ok(Expr::var(&name)),
                }
            },
            Some(Token::Punct(p)) => self.error(format!("unexpected `{p}`")),
            Some(_) => self.error("expected an expression"),
            None => self.error("unexpected end of input"),
        }
    }
}

/// Parses a complete expression.
pub fn parse_expr(src: &str, is_type: &dyn Fn(&str) -> bool) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(src, is_type)?;
    let e = parser.expr()?;
    parser.finish()?;

    Ok(e)
}

/// Parses a single literal such as `7`, `"ab"` or `'c'`.
pub fn parse_literal(src: &str) -> Result<Literal, ParseError> {
    let e = parse_expr(src, &|_| false)?;

    match e.as_literal() {
        Some(lit) => Ok(lit.clone()),
        None => Err(ParseError {
            offset: 0,
            message: format!("`{src}` is not a literal"),
        }),
    }
}
