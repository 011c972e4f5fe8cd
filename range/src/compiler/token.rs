use std::collections::BTreeSet;
use std::ops::Range;

use logos::{Lexer, Logos};
use strum_macros::{Display, EnumIter};

use crate::error::{CResult, Error};

/// Lexical token kinds of the range expression language.
#[derive(Logos, EnumIter, Display, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenKind {
    EOI,

    #[regex(r"[ \t\r\n\f]+", logos::skip)]
    Whitespace,

    /// A name fragment: alphanumerics plus `.`, `-` and `_`. A bareword
    /// cannot start with `-` (that is the difference operator), and `..`
    /// always lexes as Sequence, never as part of a bareword.
    #[regex(r"[0-9A-Za-z_][0-9A-Za-z_\-]*(\.[0-9A-Za-z_\-]+)*")]
    Bareword,

    /// A bareword whose spelling is registered in the function symbol table.
    /// The tokenizer decides this, not the parser.
    Function,

    #[regex(r#"/([^/\\]|\\.)*/"#)]
    Regex,

    #[regex(r#"'([^'\\]|\\.)*'"#)]
    SingleQuoted,

    #[regex(r#""([^"\\]|\\.)*""#)]
    DoubleQuoted,

    #[token("..")]
    Sequence,

    #[token("%")]
    Percent,
    #[token("^")]
    Caret,
    #[token("*")]
    Star,
    #[token("!")]
    Bang,
    #[token(",")]
    Comma,
    #[token("-")]
    Minus,
    #[token("&")]
    Ampersand,
    #[token(";")]
    Semicolon,
    #[token(":")]
    Colon,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
}

/// A token with its source span.
#[derive(Clone, PartialEq, Eq)]
pub struct Token<'a> {
    pub source: &'a str,
    pub kind: TokenKind,
    pub span: Range<usize>,
}

impl<'a> Token<'a> {
    fn new_eoi(source: &'a str) -> Self {
        Token { source, kind: TokenKind::EOI, span: source.len()..source.len() }
    }

    pub fn text(&self) -> &'a str {
        &self.source[self.span.clone()]
    }
}

impl<'a> std::fmt::Debug for Token<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({:?})", self.kind, self.span)
    }
}

/// Tokenizes a range expression. Barewords that name a registered function
/// are reclassified as Function tokens against the given symbol table.
pub struct Tokenizer<'a> {
    source: &'a str,
    lexer: Lexer<'a, TokenKind>,
    functions: &'a BTreeSet<String>,
    eoi: bool,
}

impl<'a> Tokenizer<'a> {
    pub fn new(source: &'a str, functions: &'a BTreeSet<String>) -> Self {
        Tokenizer { source, lexer: TokenKind::lexer(source), functions, eoi: false }
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = CResult<Token<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.lexer.next() {
            Some(Err(_)) => Some(Err(Error::InvalidRangeExpression(format!(
                "unrecognized input at offset {}: {:?}",
                self.lexer.span().start,
                self.lexer.slice()
            )))),
            Some(Ok(kind)) => {
                let kind = match kind {
                    TokenKind::Bareword if self.functions.contains(self.lexer.slice()) => {
                        TokenKind::Function
                    }
                    kind => kind,
                };
                Some(Ok(Token { source: self.source, kind, span: self.lexer.span() }))
            }
            None if !self.eoi => {
                self.eoi = true;
                Some(Ok(Token::new_eoi(self.source)))
            }
            None => None,
        }
    }
}

/// Tokenizes a whole expression up front.
pub fn tokenize<'a>(
    source: &'a str,
    functions: &'a BTreeSet<String>,
) -> CResult<Vec<Token<'a>>> {
    Tokenizer::new(source, functions).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use TokenKind::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let functions = ["expand".to_string()].into_iter().collect();
        tokenize(source, &functions).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn barewords_and_operators() {
        assert_eq!(
            kinds("%cluster1 - host & other"),
            vec![Percent, Bareword, Minus, Bareword, Ampersand, Bareword, EOI]
        );
        assert_eq!(kinds("a.b-c_d"), vec![Bareword, EOI]);
    }

    #[test]
    fn sequence_splits_barewords() {
        assert_eq!(kinds("asdf1..1000"), vec![Bareword, Sequence, Bareword, EOI]);
        assert_eq!(kinds("a.b..c"), vec![Bareword, Sequence, Bareword, EOI]);
    }

    #[test]
    fn braces_and_parens() {
        assert_eq!(
            kinds("thing{0..6}x"),
            vec![Bareword, LBrace, Bareword, Sequence, Bareword, RBrace, Bareword, EOI]
        );
        assert_eq!(kinds("(a,b)"), vec![LParen, Bareword, Comma, Bareword, RParen, EOI]);
    }

    #[test]
    fn quoted_and_regex() {
        let functions = BTreeSet::new();
        let tokens = tokenize(r#"'lit one' "two\"q" /[345]$/ /a\/b/"#, &functions).unwrap();
        assert_eq!(tokens[0].kind, SingleQuoted);
        assert_eq!(tokens[1].kind, DoubleQuoted);
        assert_eq!(tokens[1].text(), r#""two\"q""#);
        assert_eq!(tokens[2].kind, Regex);
        assert_eq!(tokens[2].text(), "/[345]$/");
        assert_eq!(tokens[3].kind, Regex);
        assert_eq!(tokens[3].text(), r"/a\/b/");
    }

    #[test]
    fn function_classification_consults_symbol_table() {
        let functions: BTreeSet<String> =
            ["expand".to_string(), "clusters".to_string()].into_iter().collect();
        let tokens = tokenize("expand(clusters(x), notafn)", &functions).unwrap();
        assert_eq!(tokens[0].kind, Function);
        assert_eq!(tokens[2].kind, Function);
        let bare: Vec<_> =
            tokens.iter().filter(|t| t.kind == Bareword).map(|t| t.text()).collect();
        assert_eq!(bare, vec!["x", "notafn"]);
    }

    #[test]
    fn unrecognized_input_reports_offset() {
        let functions = BTreeSet::new();
        let err = tokenize("abc @def", &functions).unwrap_err();
        match err {
            Error::InvalidRangeExpression(msg) => assert!(msg.contains("offset 4"), "{}", msg),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn every_punctuation_kind_lexes() {
        use strum::IntoEnumIterator;
        let punct = [
            ("%", Percent),
            ("^", Caret),
            ("*", Star),
            ("!", Bang),
            (",", Comma),
            ("-", Minus),
            ("&", Ampersand),
            (";", Semicolon),
            (":", Colon),
            ("(", LParen),
            (")", RParen),
            ("{", LBrace),
            ("}", RBrace),
        ];
        let functions = BTreeSet::new();
        for (text, kind) in punct {
            assert_eq!(
                tokenize(text, &functions).unwrap()[0].kind,
                kind,
                "lexing {:?}",
                text
            );
        }
        // Each single-character kind above is covered exactly once.
        let covered: usize = TokenKind::iter()
            .filter(|k| punct.iter().any(|(_, kind)| kind == k))
            .count();
        assert_eq!(covered, punct.len());
    }
}
