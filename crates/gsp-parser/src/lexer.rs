//! GSP scanner.
//!
//! Template text is lexed with `logos` until the next GSP construct opener.
//! Tags, attributes, scriptlets and `${...}` expressions are then scanned by
//! hand so that braces, quotes and nested interpolations stay balanced.
//!
//! The scanner produces:
//! - `Html` runs of literal template text
//! - `ExprStart`/`ExprEnd` pairs around `${...}` expressions
//! - `TagStart`, `AttrName`, `AttrValue` and `TagEnd` for `<ns:tag>` markup
//! - `Scriptlet`, `ScriptletExpr`, `Declaration` and `Directive` blocks

use crate::error::{ParseError, ParseErrorKind};
use crate::line_index::LineIndex;
use crate::scan;
use logos::Logos;
use std::collections::VecDeque;
use text_size::{TextRange, TextSize};

/// Longest HTML run emitted as a single token by default.
pub const DEFAULT_MAX_HTML_LENGTH: usize = 64_000;

/// How far back a split point looks for an unterminated character entity.
const ENTITY_LOOKBACK: usize = 12;

/// A token produced by the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'src> {
    /// The kind of token.
    pub kind: TokenKind,
    /// Token text. For expressions and blocks this is the inner source, for
    /// tags the local tag name, for attribute values the raw quoted content.
    pub text: &'src str,
    /// Namespace of tag tokens.
    pub namespace: Option<&'src str>,
    /// 1-based line where the token starts.
    pub line: u32,
    /// Byte range of the whole construct in the source.
    pub range: TextRange,
}

/// Token kinds for GSP source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// Literal template text.
    Html,
    /// `${`, carrying the expression source up to the matching brace.
    ExprStart,
    /// The `}` closing an expression.
    ExprEnd,
    /// `<ns:name`
    TagStart,
    /// `</ns:name>`, or `/>` with empty text.
    TagEnd,
    /// Attribute name inside a start tag.
    AttrName,
    /// Attribute value inside a start tag.
    AttrValue,
    /// `<% %>` or `%{ }%`
    Scriptlet,
    /// `<%= %>`
    ScriptletExpr,
    /// `<%! %>` or `!{ }!`
    Declaration,
    /// `<%@ %>` or `@{ }`
    Directive,
    /// End of input.
    Eof,
}

impl TokenKind {
    /// Returns a human-readable name for this token kind.
    pub fn name(&self) -> &'static str {
        match self {
            TokenKind::Html => "html",
            TokenKind::ExprStart => "expression start",
            TokenKind::ExprEnd => "expression end",
            TokenKind::TagStart => "tag start",
            TokenKind::TagEnd => "tag end",
            TokenKind::AttrName => "attribute name",
            TokenKind::AttrValue => "attribute value",
            TokenKind::Scriptlet => "scriptlet",
            TokenKind::ScriptletExpr => "scriptlet expression",
            TokenKind::Declaration => "declaration",
            TokenKind::Directive => "directive",
            TokenKind::Eof => "end of file",
        }
    }
}

/// Openers recognised in template text. Everything else is literal.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
enum Markup {
    #[token("${")]
    ExprOpen,

    #[token("<%=")]
    OutOpen,

    #[token("<%@")]
    DirectiveOpen,

    #[token("<%!")]
    DeclarationOpen,

    #[token("<%--")]
    JspCommentOpen,

    #[token("<%")]
    ScriptletOpen,

    #[token("%{--")]
    CommentOpen,

    #[token("%{")]
    BraceScriptletOpen,

    #[token("!{")]
    BraceDeclarationOpen,

    #[token("@{")]
    BraceDirectiveOpen,

    /// `<ns:`
    #[regex(r"<[A-Za-z][A-Za-z0-9_]*:")]
    TagOpen,

    /// `</ns:`
    #[regex(r"</[A-Za-z][A-Za-z0-9_]*:")]
    EndTagOpen,

    #[regex(r"[^<$%!@]+")]
    Text,

    #[regex(r"[<$%!@]")]
    Punct,
}

/// Tokenizer for GSP source.
///
/// Keeps no history beyond its position and a short queue of tokens produced
/// by the construct it scanned last.
pub struct Scanner<'src> {
    source: &'src str,
    pos: usize,
    pending: VecDeque<Token<'src>>,
    namespace: Option<&'src str>,
    max_html_length: usize,
    line_index: LineIndex,
}

impl<'src> Scanner<'src> {
    /// Creates a new scanner for the given source.
    pub fn new(source: &'src str) -> Self {
        Self {
            source,
            pos: 0,
            pending: VecDeque::new(),
            namespace: None,
            max_html_length: DEFAULT_MAX_HTML_LENGTH,
            line_index: LineIndex::new(source),
        }
    }

    /// Sets the longest HTML run emitted as one token.
    pub fn set_max_html_length(&mut self, max: usize) {
        self.max_html_length = max.max(1);
    }

    /// Returns the namespace of the most recent tag token.
    pub fn namespace(&self) -> Option<&'src str> {
        self.namespace
    }

    /// Returns the next token, or `Eof` once the source is exhausted.
    pub fn next_token(&mut self) -> Result<Token<'src>, ParseError> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                if matches!(token.kind, TokenKind::TagStart | TokenKind::TagEnd) {
                    self.namespace = token.namespace;
                }
                log::trace!(
                    target: "gsp.scanner",
                    "{} {:?} at line {}",
                    token.kind.name(),
                    token.text,
                    token.line
                );
                return Ok(token);
            }
            if self.pos >= self.source.len() {
                let end = self.source.len();
                return Ok(self.token(TokenKind::Eof, end, end, end, end));
            }
            self.scan_markup()?;
        }
    }

    fn line(&self, offset: usize) -> u32 {
        self.line_index.line(TextSize::from(offset as u32))
    }

    fn token(
        &self,
        kind: TokenKind,
        text_start: usize,
        text_end: usize,
        start: usize,
        end: usize,
    ) -> Token<'src> {
        Token {
            kind,
            text: &self.source[text_start..text_end],
            namespace: None,
            line: self.line(start),
            range: TextRange::new(TextSize::from(start as u32), TextSize::from(end as u32)),
        }
    }

    fn error(&self, kind: ParseErrorKind, offset: usize) -> ParseError {
        ParseError::new(kind, self.line(offset), TextSize::from(offset as u32))
    }

    /// Scans literal text up to and including the next construct.
    fn scan_markup(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        let mut lexer = Markup::lexer(&self.source[start..]);

        while let Some(result) = lexer.next() {
            let span = lexer.span();
            let (at, after) = (start + span.start, start + span.end);
            let kind = match result {
                Ok(Markup::Text) | Ok(Markup::Punct) | Err(_) => continue,
                Ok(kind) => kind,
            };
            let is_tag = matches!(kind, Markup::TagOpen | Markup::EndTagOpen);
            if is_tag && !self.starts_tag_name(after) {
                continue;
            }
            self.push_html(start, at);
            self.pos = self.scan_construct(kind, at, after)?;
            return Ok(());
        }

        self.push_html(start, self.source.len());
        self.pos = self.source.len();
        Ok(())
    }

    /// Queues `source[from..to]` as one or more `Html` tokens.
    fn push_html(&mut self, from: usize, to: usize) {
        let mut chunk_start = from;
        while chunk_start < to {
            let mut end = (chunk_start + self.max_html_length).min(to);
            if end < to {
                while !self.source.is_char_boundary(end) {
                    end -= 1;
                }
                match open_entity(&self.source[chunk_start..end]) {
                    Some(0) => end = entity_end(self.source, end, to),
                    Some(amp) => end = chunk_start + amp,
                    None => {}
                }
                if end == chunk_start {
                    end += self.source[chunk_start..]
                        .chars()
                        .next()
                        .map_or(1, char::len_utf8);
                }
            }
            let token = self.token(TokenKind::Html, chunk_start, end, chunk_start, end);
            self.pending.push_back(token);
            chunk_start = end;
        }
    }

    /// Scans the construct opened by `kind` at `at`. Returns the offset after it.
    fn scan_construct(
        &mut self,
        kind: Markup,
        at: usize,
        after: usize,
    ) -> Result<usize, ParseError> {
        let (token_kind, terminator, construct) = match kind {
            Markup::ExprOpen => return self.scan_expression(at, after),
            Markup::TagOpen => return self.scan_start_tag(at, after),
            Markup::EndTagOpen => return self.scan_end_tag(at, after),
            Markup::BraceDeclarationOpen => return self.scan_brace_declaration(at, after),
            Markup::JspCommentOpen => return self.skip_comment(at, after, "--%>"),
            Markup::CommentOpen => return self.skip_comment(at, after, "--}%"),
            Markup::Text | Markup::Punct => return Ok(after),
            Markup::OutOpen => (TokenKind::ScriptletExpr, "%>", "scriptlet expression"),
            Markup::DirectiveOpen => (TokenKind::Directive, "%>", "page directive"),
            Markup::DeclarationOpen => (TokenKind::Declaration, "%>", "declaration"),
            Markup::ScriptletOpen => (TokenKind::Scriptlet, "%>", "scriptlet"),
            Markup::BraceScriptletOpen => (TokenKind::Scriptlet, "}%", "scriptlet"),
            Markup::BraceDirectiveOpen => (TokenKind::Directive, "}", "page directive"),
        };
        self.scan_block(token_kind, at, after, terminator, construct)
    }

    fn scan_expression(&mut self, at: usize, after: usize) -> Result<usize, ParseError> {
        let close = scan::find_closing_brace(self.source.as_bytes(), after)
            .ok_or_else(|| self.error(ParseErrorKind::UnclosedExpression, at))?;
        let start = self.token(TokenKind::ExprStart, after, close, at, close + 1);
        let end = self.token(TokenKind::ExprEnd, close, close + 1, close, close + 1);
        self.pending.push_back(start);
        self.pending.push_back(end);
        Ok(close + 1)
    }

    fn scan_block(
        &mut self,
        kind: TokenKind,
        at: usize,
        after: usize,
        terminator: &'static str,
        construct: &'static str,
    ) -> Result<usize, ParseError> {
        let end = scan::find(self.source, after, terminator).ok_or_else(|| {
            self.error(
                ParseErrorKind::UnclosedBlock {
                    construct,
                    terminator,
                },
                at,
            )
        })?;
        let token = self.token(kind, after, end, at, end + terminator.len());
        self.pending.push_back(token);
        Ok(end + terminator.len())
    }

    /// `!{ }!` also accepts `}%` as its terminator.
    fn scan_brace_declaration(&mut self, at: usize, after: usize) -> Result<usize, ParseError> {
        let bang = scan::find(self.source, after, "}!");
        let percent = scan::find(self.source, after, "}%");
        let end = match (bang, percent) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => {
                return Err(self.error(
                    ParseErrorKind::UnclosedBlock {
                        construct: "declaration",
                        terminator: "}!",
                    },
                    at,
                ))
            }
        };
        let token = self.token(TokenKind::Declaration, after, end, at, end + 2);
        self.pending.push_back(token);
        Ok(end + 2)
    }

    fn skip_comment(
        &mut self,
        at: usize,
        after: usize,
        terminator: &'static str,
    ) -> Result<usize, ParseError> {
        let end = scan::find(self.source, after, terminator).ok_or_else(|| {
            self.error(
                ParseErrorKind::UnclosedBlock {
                    construct: "GSP comment",
                    terminator,
                },
                at,
            )
        })?;
        Ok(end + terminator.len())
    }

    fn starts_tag_name(&self, at: usize) -> bool {
        self.source
            .as_bytes()
            .get(at)
            .is_some_and(|b| b.is_ascii_alphabetic() || *b == b'_')
    }

    fn scan_name(&self, from: usize) -> usize {
        let bytes = self.source.as_bytes();
        let mut i = from;
        while i < bytes.len()
            && (bytes[i].is_ascii_alphanumeric() || matches!(bytes[i], b'_' | b'-' | b'.'))
        {
            i += 1;
        }
        i
    }

    fn skip_whitespace(&self, from: usize) -> usize {
        let bytes = self.source.as_bytes();
        let mut i = from;
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        i
    }

    fn scan_start_tag(&mut self, at: usize, after: usize) -> Result<usize, ParseError> {
        let bytes = self.source.as_bytes();
        let namespace = &self.source[at + 1..after - 1];
        let name_end = self.scan_name(after);
        let qualified = format!("{}:{}", namespace, &self.source[after..name_end]);

        let mut start = self.token(TokenKind::TagStart, after, name_end, at, name_end);
        start.namespace = Some(namespace);
        self.pending.push_back(start);

        let unterminated = |scanner: &Self| {
            scanner.error(
                ParseErrorKind::UnterminatedTag {
                    name: qualified.clone(),
                },
                at,
            )
        };

        let mut i = name_end;
        loop {
            i = self.skip_whitespace(i);
            match bytes.get(i) {
                None => return Err(unterminated(self)),
                Some(b'>') => return Ok(i + 1),
                Some(b'/') if bytes.get(i + 1) == Some(&b'>') => {
                    let mut end = self.token(TokenKind::TagEnd, i, i, i, i + 2);
                    end.namespace = Some(namespace);
                    self.pending.push_back(end);
                    return Ok(i + 2);
                }
                Some(_) => {}
            }

            let name_start = i;
            while i < bytes.len()
                && !bytes[i].is_ascii_whitespace()
                && !matches!(bytes[i], b'=' | b'>')
                && !(bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'>'))
            {
                i += 1;
            }
            let attr_name = &self.source[name_start..i];

            i = self.skip_whitespace(i);
            match bytes.get(i) {
                None => return Err(unterminated(self)),
                Some(b'=') => {}
                Some(_) => {
                    return Err(self.error(
                        ParseErrorKind::MissingAttributeValue {
                            tag: qualified.clone(),
                            name: attr_name.to_string(),
                        },
                        name_start,
                    ))
                }
            }

            i = self.skip_whitespace(i + 1);
            let quote = match bytes.get(i) {
                None => return Err(unterminated(self)),
                Some(q @ (b'"' | b'\'')) => *q,
                Some(_) => {
                    return Err(self.error(
                        ParseErrorKind::UnquotedAttributeValue {
                            tag: qualified.clone(),
                            name: attr_name.to_string(),
                        },
                        i,
                    ))
                }
            };

            let value_start = i + 1;
            let mut j = value_start;
            loop {
                match bytes.get(j) {
                    None => {
                        return Err(self.error(
                            ParseErrorKind::UnclosedAttributeQuote {
                                tag: qualified.clone(),
                                name: attr_name.to_string(),
                            },
                            i,
                        ))
                    }
                    Some(b) if *b == quote => break,
                    Some(b'$') if bytes.get(j + 1) == Some(&b'{') => {
                        j = scan::find_closing_brace(bytes, j + 2)
                            .ok_or_else(|| self.error(ParseErrorKind::UnclosedExpression, j))?
                            + 1;
                    }
                    Some(_) => j += 1,
                }
            }

            let name_end = name_start + attr_name.len();
            let name_token =
                self.token(TokenKind::AttrName, name_start, name_end, name_start, name_end);
            let value_token = self.token(TokenKind::AttrValue, value_start, j, i, j + 1);
            self.pending.push_back(name_token);
            self.pending.push_back(value_token);
            i = j + 1;
        }
    }

    fn scan_end_tag(&mut self, at: usize, after: usize) -> Result<usize, ParseError> {
        let namespace = &self.source[at + 2..after - 1];
        let name_end = self.scan_name(after);
        let close = self.skip_whitespace(name_end);
        if self.source.as_bytes().get(close) != Some(&b'>') {
            return Err(self.error(
                ParseErrorKind::UnterminatedTag {
                    name: format!("{}:{}", namespace, &self.source[after..name_end]),
                },
                at,
            ));
        }
        let mut token = self.token(TokenKind::TagEnd, after, name_end, at, close + 1);
        token.namespace = Some(namespace);
        self.pending.push_back(token);
        Ok(close + 1)
    }
}

/// Returns the offset of a trailing `&` that starts an entity cut by the end of `text`.
fn open_entity(text: &str) -> Option<usize> {
    let window_start = text.len().saturating_sub(ENTITY_LOOKBACK);
    let amp = window_start + text.as_bytes()[window_start..].iter().rposition(|b| *b == b'&')?;
    let tail = &text.as_bytes()[amp + 1..];
    let unterminated = tail
        .iter()
        .all(|b| b.is_ascii_alphanumeric() || *b == b'#');
    unterminated.then_some(amp)
}

/// Returns the offset just past the `;` closing an entity cut at `from`, or
/// `from` when no terminator follows within reach.
fn entity_end(source: &str, from: usize, to: usize) -> usize {
    let limit = (from + ENTITY_LOOKBACK).min(to);
    source.as_bytes()[from..limit]
        .iter()
        .position(|b| !(b.is_ascii_alphanumeric() || *b == b'#'))
        .filter(|&len| source.as_bytes()[from + len] == b';')
        .map_or(from, |len| from + len + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize(source: &str) -> Vec<(TokenKind, &str)> {
        let mut scanner = Scanner::new(source);
        let mut tokens = Vec::new();
        loop {
            let token = scanner.next_token().expect("scan failed");
            if token.kind == TokenKind::Eof {
                break;
            }
            tokens.push((token.kind, token.text));
        }
        tokens
    }

    #[test]
    fn test_plain_html() {
        assert_eq!(tokenize("<div>hi</div>"), vec![(TokenKind::Html, "<div>hi</div>")]);
    }

    #[test]
    fn test_stray_punctuation_is_html() {
        assert_eq!(
            tokenize("a < b $ c % d ! e @ f"),
            vec![(TokenKind::Html, "a < b $ c % d ! e @ f")]
        );
    }

    #[test]
    fn test_expression() {
        assert_eq!(
            tokenize("Hello ${name}!"),
            vec![
                (TokenKind::Html, "Hello "),
                (TokenKind::ExprStart, "name"),
                (TokenKind::ExprEnd, "}"),
                (TokenKind::Html, "!"),
            ]
        );
    }

    #[test]
    fn test_expression_with_nested_braces() {
        let tokens = tokenize(r#"${[a: "x${b}"].a}"#);
        assert_eq!(tokens[0], (TokenKind::ExprStart, r#"[a: "x${b}"].a"#));
    }

    #[test]
    fn test_unclosed_expression() {
        let mut scanner = Scanner::new("Hello ${name");
        let error = loop {
            match scanner.next_token() {
                Ok(token) if token.kind == TokenKind::Eof => panic!("expected an error"),
                Ok(_) => continue,
                Err(error) => break error,
            }
        };
        assert_eq!(error.kind, ParseErrorKind::UnclosedExpression);
        assert_eq!(error.line, 1);
    }

    #[test]
    fn test_unclosed_expression_line() {
        let mut scanner = Scanner::new("a\nb\n  ${x");
        let error = scanner.next_token().unwrap_err();
        assert_eq!(error.line, 3);
    }

    #[test]
    fn test_self_closing_tag_with_bracket_attribute() {
        let mut scanner = Scanner::new(r#"<tt:form code="testing [" />"#);
        let start = scanner.next_token().unwrap();
        assert_eq!(start.kind, TokenKind::TagStart);
        assert_eq!(start.text, "form");
        assert_eq!(start.namespace, Some("tt"));
        assert_eq!(scanner.namespace(), Some("tt"));

        let tokens: Vec<_> = std::iter::from_fn(|| {
            let token = scanner.next_token().unwrap();
            (token.kind != TokenKind::Eof).then_some((token.kind, token.text))
        })
        .collect();
        assert_eq!(
            tokens,
            vec![
                (TokenKind::AttrName, "code"),
                (TokenKind::AttrValue, "testing ["),
                (TokenKind::TagEnd, ""),
            ]
        );
    }

    #[test]
    fn test_tag_line_numbers() {
        let mut scanner = Scanner::new("<tbody>\n  <tt:form />\n</tbody>");
        let html = scanner.next_token().unwrap();
        assert_eq!(html.text, "<tbody>\n  ");
        let tag = scanner.next_token().unwrap();
        assert_eq!(tag.kind, TokenKind::TagStart);
        assert_eq!(tag.line, 2);
    }

    #[test]
    fn test_start_and_end_tag() {
        assert_eq!(
            tokenize("<g:if test='${x > 1}'>yes</g:if >"),
            vec![
                (TokenKind::TagStart, "if"),
                (TokenKind::AttrName, "test"),
                (TokenKind::AttrValue, "${x > 1}"),
                (TokenKind::Html, "yes"),
                (TokenKind::TagEnd, "if"),
            ]
        );
    }

    #[test]
    fn test_quote_inside_attribute_expression() {
        let tokens = tokenize(r#"<g:message code="${flag ? "a" : 'b'}"/>"#);
        assert_eq!(tokens[2], (TokenKind::AttrValue, r#"${flag ? "a" : 'b'}"#));
    }

    #[test]
    fn test_plain_html_namespace_lookalike() {
        assert_eq!(tokenize("<a:>x"), vec![(TokenKind::Html, "<a:>x")]);
    }

    #[test]
    fn test_unterminated_tag() {
        let mut scanner = Scanner::new("<g:link action=\"list\"");
        let error = loop {
            match scanner.next_token() {
                Ok(_) => continue,
                Err(error) => break error,
            }
        };
        assert!(matches!(error.kind, ParseErrorKind::UnterminatedTag { ref name } if name == "g:link"));
    }

    #[test]
    fn test_unquoted_attribute() {
        let error = Scanner::new("<g:link action=list/>").next_token().unwrap_err();
        assert!(matches!(error.kind, ParseErrorKind::UnquotedAttributeValue { .. }));
    }

    #[test]
    fn test_scriptlets_and_directives() {
        assert_eq!(
            tokenize("<%@ page contentType=\"text/plain\" %><% x = 1 %><%= x %>%{ y = 2 }%!{ z = 3 }!@{ expressionCodec=\"none\" }"),
            vec![
                (TokenKind::Directive, " page contentType=\"text/plain\" "),
                (TokenKind::Scriptlet, " x = 1 "),
                (TokenKind::ScriptletExpr, " x "),
                (TokenKind::Scriptlet, " y = 2 "),
                (TokenKind::Declaration, " z = 3 "),
                (TokenKind::Directive, " expressionCodec=\"none\" "),
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        assert_eq!(
            tokenize("a<%-- ${broken --%>b%{-- <g:x> --}%c"),
            vec![(TokenKind::Html, "a"), (TokenKind::Html, "b"), (TokenKind::Html, "c")]
        );
    }

    #[test]
    fn test_max_html_length_keeps_entities_whole() {
        let mut scanner = Scanner::new("abcd&amp;efgh");
        scanner.set_max_html_length(8);
        let mut parts = Vec::new();
        loop {
            let token = scanner.next_token().unwrap();
            if token.kind == TokenKind::Eof {
                break;
            }
            parts.push(token.text);
        }
        assert_eq!(parts, vec!["abcd", "&amp;efg", "h"]);
    }

    #[test]
    fn test_max_html_length_shorter_than_entity() {
        let mut scanner = Scanner::new("&hellip;ab&amp;");
        scanner.set_max_html_length(3);
        let mut parts = Vec::new();
        loop {
            let token = scanner.next_token().unwrap();
            if token.kind == TokenKind::Eof {
                break;
            }
            parts.push(token.text);
        }
        assert_eq!(parts, vec!["&hellip;", "ab", "&amp;"]);
    }

    #[test]
    fn test_max_html_length_respects_char_boundaries() {
        let mut scanner = Scanner::new("ééé");
        scanner.set_max_html_length(3);
        let first = scanner.next_token().unwrap();
        assert_eq!(first.text, "é");
    }

    #[test]
    fn test_eof_is_sticky() {
        let mut scanner = Scanner::new("");
        assert_eq!(scanner.next_token().unwrap().kind, TokenKind::Eof);
        assert_eq!(scanner.next_token().unwrap().kind, TokenKind::Eof);
    }
}
