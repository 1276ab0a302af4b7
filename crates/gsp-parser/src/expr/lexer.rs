//! Expression lexer using logos.

use crate::scan;
use logos::Logos;

/// Expression token kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Logos)]
#[logos(skip r"[ \t\r\f]+")]
#[logos(skip(r"//[^\n]*", allow_greedy = true))]
pub enum ExprToken {
    #[token("\n")]
    Newline,

    #[token(";")]
    Semi,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    #[token("{")]
    LBrace,

    #[token("}")]
    RBrace,

    #[token(",")]
    Comma,

    #[token(":")]
    Colon,

    #[token(".")]
    Dot,

    #[token("?.")]
    SafeDot,

    #[token("?:")]
    Elvis,

    #[token("?")]
    Question,

    #[token("==")]
    EqEq,

    #[token("!=")]
    NotEq,

    #[token("<=")]
    Le,

    #[token(">=")]
    Ge,

    #[token("<")]
    Lt,

    #[token(">")]
    Gt,

    #[token("&&")]
    AndAnd,

    #[token("||")]
    OrOr,

    #[token("!")]
    Bang,

    #[token("=")]
    Assign,

    #[token("+")]
    Plus,

    #[token("-")]
    Minus,

    #[token("*")]
    Star,

    #[token("/")]
    Slash,

    #[token("%")]
    Percent,

    #[token("true")]
    True,

    #[token("false")]
    False,

    #[token("null")]
    Null,

    #[token("in")]
    In,

    #[regex(r"[A-Za-z_$][A-Za-z0-9_$]*")]
    Ident,

    #[regex(r"[0-9]+")]
    Int,

    #[regex(r"[0-9]+\.[0-9]+")]
    Float,

    #[regex(r"'([^'\\]|\\.)*'")]
    SingleString,

    #[token("\"", double_string)]
    DoubleString,
}

/// Extends a `"` token to the end of its string, skipping interpolations.
fn double_string(lex: &mut logos::Lexer<'_, ExprToken>) -> bool {
    let start = lex.span().start;
    match scan::skip_string(lex.source().as_bytes(), start) {
        Some(end) => {
            lex.bump(end - lex.span().end);
            true
        }
        None => false,
    }
}

impl ExprToken {
    /// Returns a human-readable name for this token kind.
    pub fn name(&self) -> &'static str {
        match self {
            ExprToken::Newline => "newline",
            ExprToken::Semi => "';'",
            ExprToken::LParen => "'('",
            ExprToken::RParen => "')'",
            ExprToken::LBracket => "'['",
            ExprToken::RBracket => "']'",
            ExprToken::LBrace => "'{'",
            ExprToken::RBrace => "'}'",
            ExprToken::Comma => "','",
            ExprToken::Colon => "':'",
            ExprToken::Dot => "'.'",
            ExprToken::SafeDot => "'?.'",
            ExprToken::Elvis => "'?:'",
            ExprToken::Question => "'?'",
            ExprToken::EqEq => "'=='",
            ExprToken::NotEq => "'!='",
            ExprToken::Le => "'<='",
            ExprToken::Ge => "'>='",
            ExprToken::Lt => "'<'",
            ExprToken::Gt => "'>'",
            ExprToken::AndAnd => "'&&'",
            ExprToken::OrOr => "'||'",
            ExprToken::Bang => "'!'",
            ExprToken::Assign => "'='",
            ExprToken::Plus => "'+'",
            ExprToken::Minus => "'-'",
            ExprToken::Star => "'*'",
            ExprToken::Slash => "'/'",
            ExprToken::Percent => "'%'",
            ExprToken::True => "true",
            ExprToken::False => "false",
            ExprToken::Null => "null",
            ExprToken::In => "in",
            ExprToken::Ident => "identifier",
            ExprToken::Int => "integer",
            ExprToken::Float => "number",
            ExprToken::SingleString | ExprToken::DoubleString => "string",
        }
    }
}
