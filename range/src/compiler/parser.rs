//! Recursive descent parser for range expressions.
//!
//! Grammar (all set operators left-associative):
//!
//! ```text
//! range      = union ;
//! union      = diff      { "," diff } ;
//! diff       = inter     { "-" inter } ;
//! inter      = unary     { "&" unary } ;
//! unary      = "%" unary | "^" unary | "*" unary | "!" unary | postfix ;
//! postfix    = atom [ ":" word ] ;
//! atom       = word | literal | regex | sequence | function
//!            | "(" range ")" | brace ;
//! brace      = [ word ] "{" [ range ] "}" [ word ] ;
//! sequence   = word ".." word ;
//! function   = FUNCTION "(" range { ";" range } ")" ;
//! ```

use std::collections::BTreeSet;

use crate::compiler::ast::Expr;
use crate::compiler::token::{tokenize, Token, TokenKind};
use crate::error::{CResult, Error};

/// Parses an expression against the given function symbol table.
pub fn parse(source: &str, functions: &BTreeSet<String>) -> CResult<Expr> {
    let tokens = tokenize(source, functions)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_range()?;
    parser.expect(TokenKind::EOI)?;
    Ok(expr)
}

struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Token<'a> {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn peek_ahead(&self, n: usize) -> TokenKind {
        self.tokens[(self.pos + n).min(self.tokens.len() - 1)].kind
    }

    fn advance(&mut self) -> Token<'a> {
        let token = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: &str) -> Error {
        let token = self.peek();
        Error::InvalidRangeExpression(format!(
            "{} at offset {}, found {}",
            message, token.span.start, token.kind
        ))
    }

    fn expect(&mut self, kind: TokenKind) -> CResult<Token<'a>> {
        if self.peek_kind() == kind {
            Ok(self.advance())
        } else {
            Err(self.error(&format!("expected {}", kind)))
        }
    }

    fn parse_range(&mut self) -> CResult<Expr> {
        self.parse_union()
    }

    fn parse_union(&mut self) -> CResult<Expr> {
        let mut lhs = self.parse_diff()?;
        while self.peek_kind() == TokenKind::Comma {
            self.advance();
            let rhs = self.parse_diff()?;
            lhs = Expr::Union(lhs.boxed(), rhs.boxed());
        }
        Ok(lhs)
    }

    fn parse_diff(&mut self) -> CResult<Expr> {
        let mut lhs = self.parse_inter()?;
        while self.peek_kind() == TokenKind::Minus {
            self.advance();
            let rhs = self.parse_inter()?;
            lhs = Expr::Difference(lhs.boxed(), rhs.boxed());
        }
        Ok(lhs)
    }

    fn parse_inter(&mut self) -> CResult<Expr> {
        let mut lhs = self.parse_unary()?;
        while self.peek_kind() == TokenKind::Ampersand {
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Intersection(lhs.boxed(), rhs.boxed());
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> CResult<Expr> {
        match self.peek_kind() {
            TokenKind::Percent => {
                self.advance();
                Ok(Expr::Expand(self.parse_unary()?.boxed()))
            }
            TokenKind::Caret => {
                self.advance();
                Ok(Expr::Admin(self.parse_unary()?.boxed()))
            }
            TokenKind::Star => {
                self.advance();
                Ok(Expr::GetCluster(self.parse_unary()?.boxed()))
            }
            TokenKind::Bang => {
                self.advance();
                Ok(Expr::Negate(self.parse_unary()?.boxed()))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> CResult<Expr> {
        let atom = self.parse_atom()?;
        if self.peek_kind() == TokenKind::Colon {
            self.advance();
            let key = self.expect(TokenKind::Bareword)?;
            return Ok(Expr::KeyExpand { lhs: atom.boxed(), key: key.text().to_string() });
        }
        Ok(atom)
    }

    fn parse_atom(&mut self) -> CResult<Expr> {
        match self.peek_kind() {
            TokenKind::Bareword => {
                let word = self.advance().text().to_string();
                match self.peek_kind() {
                    TokenKind::Sequence => {
                        self.advance();
                        let rhs = self.expect(TokenKind::Bareword)?;
                        Ok(Expr::Sequence { lhs: word, rhs: rhs.text().to_string() })
                    }
                    TokenKind::LBrace => self.parse_brace(Expr::Word(word)),
                    _ => Ok(Expr::Word(word)),
                }
            }
            TokenKind::SingleQuoted | TokenKind::DoubleQuoted => {
                let token = self.advance();
                Ok(Expr::Literal(unquote(token.text())))
            }
            TokenKind::Regex => {
                let token = self.advance();
                Ok(Expr::Regex { pattern: unslash(token.text()), positive: true })
            }
            TokenKind::Function => {
                let name = self.advance().text().to_string();
                self.expect(TokenKind::LParen)?;
                let mut args = Vec::new();
                if self.peek_kind() != TokenKind::RParen {
                    args.push(self.parse_range()?);
                    while self.peek_kind() == TokenKind::Semicolon {
                        self.advance();
                        args.push(self.parse_range()?);
                    }
                }
                self.expect(TokenKind::RParen)?;
                Ok(Expr::Function {
                    name,
                    args: Expr::FunctionArguments(args).boxed(),
                })
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_range()?;
                self.expect(TokenKind::RParen)?;
                Ok(Expr::Group(inner.boxed()))
            }
            TokenKind::LBrace => self.parse_brace(Expr::Null),
            _ => Err(self.error("expected a word, literal, regex, function or group")),
        }
    }

    /// Parses the `{…}` part of a brace expression, `left` already consumed.
    fn parse_brace(&mut self, left: Expr) -> CResult<Expr> {
        self.expect(TokenKind::LBrace)?;
        let center =
            if self.peek_kind() == TokenKind::RBrace { Expr::Null } else { self.parse_range()? };
        self.expect(TokenKind::RBrace)?;
        let right = if self.peek_kind() == TokenKind::Bareword {
            Expr::Word(self.advance().text().to_string())
        } else {
            Expr::Null
        };
        Ok(Expr::BraceExpand {
            left: left.boxed(),
            center: center.boxed(),
            right: right.boxed(),
        })
    }
}

/// Strips quotes and resolves backslash escapes in a quoted literal.
fn unquote(text: &str) -> String {
    let inner = &text[1..text.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Strips the slashes of a regex token and resolves `\/` escapes; all other
/// escapes are left for the regex engine.
fn unslash(text: &str) -> String {
    let inner = &text[1..text.len() - 1];
    inner.replace("\\/", "/")
}
