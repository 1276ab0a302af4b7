//! Precedence-climbing parser for the expression language.

use super::ast::{BinaryOp, Call, Expr, Statement, TemplatePart, UnaryOp};
use super::lexer::ExprToken;
use crate::scan;
use logos::Logos;
use smol_str::SmolStr;
use std::ops::Range;
use thiserror::Error;

/// An expression that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExprError {
    /// A description of the problem.
    pub message: String,
    /// Byte offset within the expression source.
    pub offset: usize,
}

impl ExprError {
    fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }

    fn shifted(mut self, by: usize) -> Self {
        self.offset += by;
        self
    }
}

/// Parses a single expression, such as the body of `${...}`.
pub fn parse_expression(source: &str) -> Result<Expr, ExprError> {
    let mut parser = ExprParser::new(source)?;
    parser.skip_separators(false);
    let expr = parser.expression()?;
    parser.skip_separators(false);
    parser.expect_end()?;
    Ok(expr)
}

/// Parses a scriptlet or declaration body into statements.
///
/// Statements are separated by `;` or newlines.
pub fn parse_statements(source: &str) -> Result<Vec<Statement>, ExprError> {
    let mut parser = ExprParser::new(source)?;
    let mut statements = Vec::new();
    loop {
        parser.skip_separators(true);
        if parser.at_end() {
            return Ok(statements);
        }
        statements.push(parser.statement()?);
        match parser.peek() {
            None | Some(ExprToken::Newline) | Some(ExprToken::Semi) => {}
            Some(_) => return Err(parser.error_here("expected end of statement")),
        }
    }
}

/// Parses raw text with `${...}` and `$name` interpolation, without escapes.
///
/// Used for tag attribute values.
pub fn parse_template(content: &str) -> Result<Expr, ExprError> {
    template(content, false)
}

fn template(content: &str, escapes: bool) -> Result<Expr, ExprError> {
    let bytes = content.as_bytes();
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut i = 0;

    while i < content.len() {
        let Some(ch) = content[i..].chars().next() else {
            break;
        };
        match ch {
            '\\' if escapes => {
                let Some(next) = content[i + 1..].chars().next() else {
                    text.push('\\');
                    break;
                };
                match next {
                    'n' => text.push('\n'),
                    't' => text.push('\t'),
                    'r' => text.push('\r'),
                    'f' => text.push('\u{c}'),
                    'b' => text.push('\u{8}'),
                    '\\' | '\'' | '"' | '$' => text.push(next),
                    other => {
                        text.push('\\');
                        text.push(other);
                    }
                }
                i += 1 + next.len_utf8();
            }
            '$' if bytes.get(i + 1) == Some(&b'{') => {
                let close = scan::find_closing_brace(bytes, i + 2)
                    .ok_or_else(|| ExprError::new("unclosed '${' in string", i))?;
                let inner = parse_expression(&content[i + 2..close])
                    .map_err(|e| e.shifted(i + 2))?;
                if !text.is_empty() {
                    parts.push(TemplatePart::Text(SmolStr::from(std::mem::take(&mut text))));
                }
                parts.push(TemplatePart::Expr(inner));
                i = close + 1;
            }
            '$' if bytes
                .get(i + 1)
                .is_some_and(|b| b.is_ascii_alphabetic() || *b == b'_') =>
            {
                let (expr, end) = dotted_reference(content, i + 1);
                if !text.is_empty() {
                    parts.push(TemplatePart::Text(SmolStr::from(std::mem::take(&mut text))));
                }
                parts.push(TemplatePart::Expr(expr));
                i = end;
            }
            other => {
                text.push(other);
                i += other.len_utf8();
            }
        }
    }

    if parts.is_empty() {
        return Ok(Expr::Str(SmolStr::from(text)));
    }
    if !text.is_empty() {
        parts.push(TemplatePart::Text(SmolStr::from(text)));
    }
    Ok(Expr::Template(parts))
}

/// Reads `name(.name)*` starting at `from`. A trailing dot is left as text.
fn dotted_reference(content: &str, from: usize) -> (Expr, usize) {
    let bytes = content.as_bytes();
    let ident_end = |start: usize| {
        let mut end = start;
        while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
            end += 1;
        }
        end
    };

    let mut end = ident_end(from);
    let mut expr = Expr::Ident(SmolStr::from(&content[from..end]));
    while bytes.get(end) == Some(&b'.')
        && bytes
            .get(end + 1)
            .is_some_and(|b| b.is_ascii_alphabetic() || *b == b'_')
    {
        let name_end = ident_end(end + 1);
        expr = Expr::Property {
            target: Box::new(expr),
            name: SmolStr::from(&content[end + 1..name_end]),
            safe: false,
        };
        end = name_end;
    }
    (expr, end)
}

struct ExprParser<'src> {
    source: &'src str,
    tokens: Vec<(ExprToken, Range<usize>)>,
    pos: usize,
    /// Depth of open brackets; newlines are insignificant while positive.
    nesting: usize,
}

impl<'src> ExprParser<'src> {
    fn new(source: &'src str) -> Result<Self, ExprError> {
        let mut lexer = ExprToken::lexer(source);
        let mut tokens = Vec::new();
        while let Some(result) = lexer.next() {
            let span = lexer.span();
            match result {
                Ok(token) => tokens.push((token, span)),
                Err(()) => {
                    let message = match source[span.start..].chars().next() {
                        Some('"') | Some('\'') => "unterminated string".to_string(),
                        Some(ch) => format!("unexpected character '{}'", ch),
                        None => "unexpected end of expression".to_string(),
                    };
                    return Err(ExprError::new(message, span.start));
                }
            }
        }
        Ok(Self {
            source,
            tokens,
            pos: 0,
            nesting: 0,
        })
    }

    // === Token helpers ===

    fn peek_index(&self) -> usize {
        let mut i = self.pos;
        if self.nesting > 0 {
            while matches!(self.tokens.get(i), Some((ExprToken::Newline, _))) {
                i += 1;
            }
        }
        i
    }

    fn peek(&self) -> Option<ExprToken> {
        self.tokens.get(self.peek_index()).map(|(token, _)| *token)
    }

    /// Looks `n` significant tokens past the current one, ignoring newlines.
    fn peek_nth(&self, n: usize) -> Option<ExprToken> {
        self.tokens[self.peek_index().min(self.tokens.len())..]
            .iter()
            .map(|(token, _)| *token)
            .filter(|token| *token != ExprToken::Newline)
            .nth(n)
    }

    fn advance(&mut self) -> Option<(ExprToken, Range<usize>)> {
        let i = self.peek_index();
        let token = self.tokens.get(i).cloned()?;
        self.pos = i + 1;
        Some(token)
    }

    fn eat(&mut self, kind: ExprToken) -> bool {
        if self.peek() == Some(kind) {
            self.pos = self.peek_index() + 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: ExprToken) -> Result<Range<usize>, ExprError> {
        match self.advance() {
            Some((found, span)) if found == kind => Ok(span),
            Some((found, span)) => Err(ExprError::new(
                format!("expected {}, found {}", kind.name(), found.name()),
                span.start,
            )),
            None => Err(self.error_here(format!(
                "expected {}, found end of expression",
                kind.name()
            ))),
        }
    }

    fn at_end(&self) -> bool {
        self.peek_index() >= self.tokens.len()
    }

    fn expect_end(&self) -> Result<(), ExprError> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(self.error_here(format!("unexpected {}", token.name()))),
        }
    }

    fn skip_separators(&mut self, semicolons: bool) {
        while let Some((token, _)) = self.tokens.get(self.pos) {
            match token {
                ExprToken::Newline => self.pos += 1,
                ExprToken::Semi if semicolons => self.pos += 1,
                _ => break,
            }
        }
    }

    fn error_here(&self, message: impl Into<String>) -> ExprError {
        let offset = self
            .tokens
            .get(self.peek_index())
            .map_or(self.source.len(), |(_, span)| span.start);
        ExprError::new(message, offset)
    }

    fn slice(&self, span: &Range<usize>) -> &'src str {
        &self.source[span.clone()]
    }

    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ExprError>,
    ) -> Result<T, ExprError> {
        self.nesting += 1;
        let result = f(self);
        self.nesting -= 1;
        result
    }

    // === Grammar ===

    fn statement(&mut self) -> Result<Statement, ExprError> {
        if let (Some((ExprToken::Ident, span)), Some((ExprToken::Assign, _))) =
            (self.tokens.get(self.pos), self.tokens.get(self.pos + 1))
        {
            let name = SmolStr::from(self.slice(span));
            self.pos += 2;
            let value = self.expression()?;
            return Ok(Statement::Assign { name, value });
        }
        Ok(Statement::Expr(self.expression()?))
    }

    fn expression(&mut self) -> Result<Expr, ExprError> {
        let test = self.binary(1)?;
        if self.eat(ExprToken::Elvis) {
            let fallback = self.expression()?;
            return Ok(Expr::Elvis {
                value: Box::new(test),
                fallback: Box::new(fallback),
            });
        }
        if self.eat(ExprToken::Question) {
            let (then, otherwise) = self.nested(|p| {
                let then = p.expression()?;
                p.expect(ExprToken::Colon)?;
                Ok((then, p.expression()?))
            })?;
            return Ok(Expr::Conditional {
                test: Box::new(test),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(test)
    }

    fn binary(&mut self, min_precedence: u8) -> Result<Expr, ExprError> {
        let mut lhs = self.unary()?;
        while let Some(op) = self.peek().and_then(binary_op) {
            let precedence = op.precedence();
            if precedence < min_precedence {
                break;
            }
            self.advance();
            let rhs = self.binary(precedence + 1)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        let op = match self.peek() {
            Some(ExprToken::Bang) => UnaryOp::Not,
            Some(ExprToken::Minus) => UnaryOp::Neg,
            _ => return self.postfix(),
        };
        self.advance();
        let operand = self.unary()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn postfix(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Some(token @ (ExprToken::Dot | ExprToken::SafeDot)) => {
                    self.advance();
                    let span = self.expect(ExprToken::Ident)?;
                    let name = SmolStr::from(self.slice(&span));
                    let safe = token == ExprToken::SafeDot;
                    if self.peek() == Some(ExprToken::LParen) {
                        let (args, named) = self.arguments()?;
                        expr = Expr::Call(Box::new(Call {
                            target: Some(expr),
                            name,
                            args,
                            named,
                            safe,
                        }));
                    } else {
                        expr = Expr::Property {
                            target: Box::new(expr),
                            name,
                            safe,
                        };
                    }
                }
                Some(ExprToken::LBracket) => {
                    self.advance();
                    let index = self.nested(|p| {
                        let index = p.expression()?;
                        p.expect(ExprToken::RBracket)?;
                        Ok(index)
                    })?;
                    expr = Expr::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        let Some((token, span)) = self.advance() else {
            return Err(self.error_here("unexpected end of expression"));
        };
        let text = self.slice(&span);
        match token {
            ExprToken::Null => Ok(Expr::Null),
            ExprToken::True => Ok(Expr::Bool(true)),
            ExprToken::False => Ok(Expr::Bool(false)),
            ExprToken::Int => text.parse().map(Expr::Int).map_err(|_| {
                ExprError::new(format!("integer out of range: {}", text), span.start)
            }),
            ExprToken::Float => text
                .parse()
                .map(Expr::Float)
                .map_err(|_| ExprError::new(format!("invalid number: {}", text), span.start)),
            ExprToken::SingleString => Ok(Expr::Str(SmolStr::from(unescape(
                &text[1..text.len() - 1],
            )))),
            ExprToken::DoubleString => {
                template(&text[1..text.len() - 1], true).map_err(|e| e.shifted(span.start + 1))
            }
            ExprToken::Ident => {
                let name = SmolStr::from(text);
                if self.peek() == Some(ExprToken::LParen) {
                    let (args, named) = self.arguments()?;
                    return Ok(Expr::Call(Box::new(Call {
                        target: None,
                        name,
                        args,
                        named,
                        safe: false,
                    })));
                }
                Ok(Expr::Ident(name))
            }
            ExprToken::LParen => self.nested(|p| {
                let inner = p.expression()?;
                p.expect(ExprToken::RParen)?;
                Ok(inner)
            }),
            ExprToken::LBracket => self.nested(|p| p.collection()),
            ExprToken::LBrace => Err(ExprError::new("closures are not supported", span.start)),
            other => Err(ExprError::new(format!("unexpected {}", other.name()), span.start)),
        }
    }

    /// Parses the rest of a list or map literal after `[`.
    fn collection(&mut self) -> Result<Expr, ExprError> {
        if self.eat(ExprToken::Colon) {
            self.expect(ExprToken::RBracket)?;
            return Ok(Expr::Map(Vec::new()));
        }
        if self.eat(ExprToken::RBracket) {
            return Ok(Expr::List(Vec::new()));
        }

        if self.at_named_entry() {
            let mut entries = Vec::new();
            loop {
                let key = self.entry_key()?;
                entries.push((key, self.expression()?));
                if !self.eat(ExprToken::Comma) || self.peek() == Some(ExprToken::RBracket) {
                    break;
                }
            }
            self.expect(ExprToken::RBracket)?;
            return Ok(Expr::Map(entries));
        }

        let mut items = Vec::new();
        loop {
            items.push(self.expression()?);
            if !self.eat(ExprToken::Comma) || self.peek() == Some(ExprToken::RBracket) {
                break;
            }
        }
        self.expect(ExprToken::RBracket)?;
        Ok(Expr::List(items))
    }

    /// Parses `(args)` with positional and `name: value` arguments.
    fn arguments(&mut self) -> Result<(Vec<Expr>, Vec<(SmolStr, Expr)>), ExprError> {
        self.expect(ExprToken::LParen)?;
        self.nested(|p| {
            let mut args = Vec::new();
            let mut named = Vec::new();
            if p.eat(ExprToken::RParen) {
                return Ok((args, named));
            }
            loop {
                if p.at_named_entry() {
                    let key = p.entry_key()?;
                    named.push((key, p.expression()?));
                } else {
                    args.push(p.expression()?);
                }
                if !p.eat(ExprToken::Comma) {
                    break;
                }
            }
            p.expect(ExprToken::RParen)?;
            Ok((args, named))
        })
    }

    fn at_named_entry(&self) -> bool {
        matches!(
            self.peek(),
            Some(
                ExprToken::Ident
                    | ExprToken::SingleString
                    | ExprToken::DoubleString
                    | ExprToken::Int
                    | ExprToken::In
            )
        ) && self.peek_nth(1) == Some(ExprToken::Colon)
    }

    /// Consumes `key:` and returns the key text.
    fn entry_key(&mut self) -> Result<SmolStr, ExprError> {
        let (token, span) = self
            .advance()
            .ok_or_else(|| self.error_here("expected map key"))?;
        let text = self.slice(&span);
        let key = match token {
            ExprToken::SingleString | ExprToken::DoubleString => {
                SmolStr::from(unescape(&text[1..text.len() - 1]))
            }
            _ => SmolStr::from(text),
        };
        self.expect(ExprToken::Colon)?;
        Ok(key)
    }
}

fn binary_op(token: ExprToken) -> Option<BinaryOp> {
    Some(match token {
        ExprToken::OrOr => BinaryOp::Or,
        ExprToken::AndAnd => BinaryOp::And,
        ExprToken::EqEq => BinaryOp::Eq,
        ExprToken::NotEq => BinaryOp::NotEq,
        ExprToken::Lt => BinaryOp::Lt,
        ExprToken::Le => BinaryOp::Le,
        ExprToken::Gt => BinaryOp::Gt,
        ExprToken::Ge => BinaryOp::Ge,
        ExprToken::In => BinaryOp::In,
        ExprToken::Plus => BinaryOp::Add,
        ExprToken::Minus => BinaryOp::Sub,
        ExprToken::Star => BinaryOp::Mul,
        ExprToken::Slash => BinaryOp::Div,
        ExprToken::Percent => BinaryOp::Rem,
        _ => return None,
    })
}

/// Resolves backslash escapes in a single-quoted string.
fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\u{c}'),
            Some('b') => out.push('\u{8}'),
            Some(other @ ('\\' | '\'' | '"' | '$')) => out.push(other),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ident(name: &str) -> Expr {
        Expr::Ident(SmolStr::from(name))
    }

    #[test]
    fn test_precedence() {
        let expr = parse_expression("a + b * 2 == c").unwrap();
        assert_eq!(
            expr,
            Expr::Binary {
                op: BinaryOp::Eq,
                lhs: Box::new(Expr::Binary {
                    op: BinaryOp::Add,
                    lhs: Box::new(ident("a")),
                    rhs: Box::new(Expr::Binary {
                        op: BinaryOp::Mul,
                        lhs: Box::new(ident("b")),
                        rhs: Box::new(Expr::Int(2)),
                    }),
                }),
                rhs: Box::new(ident("c")),
            }
        );
    }

    #[test]
    fn test_property_chain_and_safe_navigation() {
        let expr = parse_expression("user?.address.city").unwrap();
        assert_eq!(
            expr,
            Expr::Property {
                target: Box::new(Expr::Property {
                    target: Box::new(ident("user")),
                    name: "address".into(),
                    safe: true,
                }),
                name: "city".into(),
                safe: false,
            }
        );
    }

    #[test]
    fn test_tag_call_with_named_arguments() {
        let expr = parse_expression("g.message(code: 'default.title', args: [1, 2])").unwrap();
        let Expr::Call(call) = expr else {
            panic!("expected a call");
        };
        assert_eq!(call.target, Some(ident("g")));
        assert_eq!(call.name, "message");
        assert!(call.args.is_empty());
        assert_eq!(call.named.len(), 2);
        assert_eq!(call.named[0], ("code".into(), Expr::Str("default.title".into())));
        assert_eq!(
            call.named[1].1,
            Expr::List(vec![Expr::Int(1), Expr::Int(2)])
        );
    }

    #[test]
    fn test_map_and_list_literals() {
        assert_eq!(parse_expression("[:]").unwrap(), Expr::Map(Vec::new()));
        assert_eq!(parse_expression("[]").unwrap(), Expr::List(Vec::new()));
        assert_eq!(
            parse_expression("[a: 1, 'b c': x]").unwrap(),
            Expr::Map(vec![("a".into(), Expr::Int(1)), ("b c".into(), ident("x"))])
        );
    }

    #[test]
    fn test_ternary_and_elvis() {
        assert!(matches!(
            parse_expression("a ? 'x' : 'y'").unwrap(),
            Expr::Conditional { .. }
        ));
        assert!(matches!(
            parse_expression("name ?: 'anonymous'").unwrap(),
            Expr::Elvis { .. }
        ));
    }

    #[test]
    fn test_interpolated_string() {
        let expr = parse_expression(r#""Hello ${user.name}, $greeting!""#).unwrap();
        assert_eq!(
            expr,
            Expr::Template(vec![
                TemplatePart::Text("Hello ".into()),
                TemplatePart::Expr(Expr::Property {
                    target: Box::new(ident("user")),
                    name: "name".into(),
                    safe: false,
                }),
                TemplatePart::Text(", ".into()),
                TemplatePart::Expr(ident("greeting")),
                TemplatePart::Text("!".into()),
            ])
        );
    }

    #[test]
    fn test_single_quoted_strings_do_not_interpolate() {
        assert_eq!(
            parse_expression(r"'${x} it\'s'").unwrap(),
            Expr::Str("${x} it's".into())
        );
    }

    #[test]
    fn test_template_without_escapes() {
        assert_eq!(
            parse_template(r"C:\dir ${x}").unwrap(),
            Expr::Template(vec![
                TemplatePart::Text(r"C:\dir ".into()),
                TemplatePart::Expr(ident("x")),
            ])
        );
        assert_eq!(parse_template("testing [").unwrap(), Expr::Str("testing [".into()));
        assert_eq!(parse_template("$5").unwrap(), Expr::Str("$5".into()));
    }

    #[test]
    fn test_statements() {
        let statements = parse_statements("x = 1; y = x + 1\nprintln(y)").unwrap();
        assert_eq!(statements.len(), 3);
        assert_eq!(
            statements[0],
            Statement::Assign {
                name: "x".into(),
                value: Expr::Int(1),
            }
        );
        assert!(matches!(statements[2], Statement::Expr(Expr::Call(_))));
    }

    #[test]
    fn test_newlines_inside_brackets() {
        let expr = parse_expression("[\n  a: 1,\n  b: 2\n]").unwrap();
        assert!(matches!(expr, Expr::Map(ref entries) if entries.len() == 2));
    }

    #[test]
    fn test_errors() {
        assert_eq!(parse_expression("a +").unwrap_err().message, "unexpected end of expression");
        assert_eq!(parse_expression("a b").unwrap_err().message, "unexpected identifier");
        assert!(parse_expression("{ -> 1 }").is_err());
        assert_eq!(parse_expression("'abc").unwrap_err().message, "unterminated string");
    }
}
