//! Template parser.
//!
//! Consumes scanner tokens and builds the page operation list. Open tags are
//! tracked on an explicit stack; when a tag closes, the operations collected
//! since its start become the tag's body.

use crate::ast::{BodyRef, Expression, PageCodecs, PageOperation, ParsedPage, Script, TagCall};
use crate::error::{ParseError, ParseErrorKind};
use crate::expr::{parse_expression, parse_statements, parse_template, Expr};
use crate::lexer::{Scanner, Token, TokenKind};
use crate::scan;
use crate::ParseOptions;
use smol_str::SmolStr;
use text_size::TextSize;

/// A start tag whose end tag has not been seen yet.
struct OpenTag<'src> {
    namespace: &'src str,
    name: &'src str,
    attributes: Vec<(SmolStr, Expression)>,
    /// Index in the operation list where the body begins.
    start: usize,
    line: u32,
    offset: TextSize,
}

impl OpenTag<'_> {
    fn qualified_name(&self) -> String {
        format!("{}:{}", self.namespace, self.name)
    }
}

/// The parser state.
pub struct Parser<'src> {
    source_name: &'src str,
    scanner: Scanner<'src>,
    peeked: Option<Token<'src>>,
    options: &'src ParseOptions,
    operations: Vec<PageOperation>,
    html_parts: Vec<String>,
    open_tags: Vec<OpenTag<'src>>,
    next_body_id: u32,
    codecs: PageCodecs,
    content_type: Option<String>,
    imports: Vec<String>,
    declarations: Vec<Script>,
}

impl<'src> Parser<'src> {
    /// Creates a new parser.
    pub fn new(source_name: &'src str, source: &'src str, options: &'src ParseOptions) -> Self {
        let mut scanner = Scanner::new(source);
        scanner.set_max_html_length(options.max_html_length);
        Self {
            source_name,
            scanner,
            peeked: None,
            options,
            operations: Vec::new(),
            html_parts: Vec::new(),
            open_tags: Vec::new(),
            next_body_id: 0,
            codecs: options.codecs.clone(),
            content_type: None,
            imports: Vec::new(),
            declarations: Vec::new(),
        }
    }

    /// Parses the whole template.
    pub fn parse(mut self) -> Result<ParsedPage, ParseError> {
        let source_name = self.source_name;
        self.parse_operations()
            .map_err(|error| error.in_source(source_name))?;

        log::debug!(
            target: "gsp.parser",
            "parsed {}: {} operations, {} html parts, {} bodies",
            self.source_name,
            self.operations.len(),
            self.html_parts.len(),
            self.next_body_id
        );

        Ok(ParsedPage {
            source_name: self.source_name.to_string(),
            operations: self.operations,
            html_parts: self.html_parts,
            codecs: self.codecs,
            content_type: self
                .content_type
                .unwrap_or_else(|| self.options.content_type.clone()),
            imports: self.imports,
            declarations: self.declarations,
            default_namespace: self.options.default_namespace.clone(),
            body_count: self.next_body_id,
        })
    }

    // === Token helpers ===

    fn next(&mut self) -> Result<Token<'src>, ParseError> {
        match self.peeked.take() {
            Some(token) => Ok(token),
            None => self.scanner.next_token(),
        }
    }

    fn peek_kind(&mut self) -> Result<TokenKind, ParseError> {
        if self.peeked.is_none() {
            self.peeked = Some(self.scanner.next_token()?);
        }
        Ok(self.peeked.as_ref().map_or(TokenKind::Eof, |token| token.kind))
    }

    fn error(&self, kind: ParseErrorKind, line: u32, offset: TextSize) -> ParseError {
        ParseError::new(kind, line, offset)
    }

    // === Operations ===

    fn parse_operations(&mut self) -> Result<(), ParseError> {
        loop {
            let token = self.next()?;
            match token.kind {
                TokenKind::Html => {
                    let index = self.html_parts.len();
                    self.html_parts.push(token.text.to_string());
                    self.operations.push(PageOperation::PrintHtml(index));
                }
                TokenKind::ExprStart => {
                    let expression = self.expression(token.text, &token)?;
                    self.operations.push(PageOperation::PrintExpression(expression));
                }
                TokenKind::ExprEnd => {}
                TokenKind::ScriptletExpr => {
                    let expression = self.expression(token.text, &token)?;
                    self.operations.push(PageOperation::PrintScriptlet(expression));
                }
                TokenKind::Scriptlet => {
                    let script = self.script(&token)?;
                    self.operations.push(PageOperation::Scriptlet(script));
                }
                TokenKind::Declaration => {
                    let script = self.script(&token)?;
                    self.declarations.push(script);
                }
                TokenKind::Directive => self.directive(&token)?,
                TokenKind::TagStart => self.start_tag(token)?,
                TokenKind::TagEnd => self.end_tag(&token)?,
                // Attributes are consumed together with their start tag.
                TokenKind::AttrName | TokenKind::AttrValue => {}
                TokenKind::Eof => break,
            }
        }

        if let Some(innermost) = self.open_tags.last() {
            let tags = self
                .open_tags
                .iter()
                .map(OpenTag::qualified_name)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(self.error(
                ParseErrorKind::UnclosedTags { tags },
                innermost.line,
                innermost.offset,
            ));
        }
        Ok(())
    }

    fn expression(&self, source: &str, token: &Token<'_>) -> Result<Expression, ParseError> {
        let source = source.trim();
        let ast = parse_expression(source).map_err(|error| {
            self.error(
                ParseErrorKind::InvalidExpression {
                    source_text: source.to_string(),
                    message: error.message,
                },
                token.line,
                token.range.start(),
            )
        })?;
        Ok(Expression {
            source: source.to_string(),
            line: token.line,
            ast,
        })
    }

    fn script(&self, token: &Token<'_>) -> Result<Script, ParseError> {
        let statements = parse_statements(token.text).map_err(|error| {
            self.error(
                ParseErrorKind::InvalidExpression {
                    source_text: token.text.trim().to_string(),
                    message: error.message,
                },
                token.line,
                token.range.start(),
            )
        })?;
        Ok(Script {
            source: token.text.to_string(),
            line: token.line,
            statements,
        })
    }

    // === Tags ===

    fn start_tag(&mut self, token: Token<'src>) -> Result<(), ParseError> {
        let namespace = token
            .namespace
            .unwrap_or(self.options.default_namespace.as_str());
        let code_attribute = if namespace == self.options.default_namespace.as_str() {
            code_attribute(token.text)
        } else {
            None
        };
        let mut attributes = Vec::new();
        while self.peek_kind()? == TokenKind::AttrName {
            let name = self.next()?;
            let value = self.next()?;
            let expression = if code_attribute == Some(name.text) {
                self.code(&value)?
            } else {
                self.attribute(&value)?
            };
            attributes.push((SmolStr::from(name.text), expression));
        }

        self.open_tags.push(OpenTag {
            namespace,
            name: token.text,
            attributes,
            start: self.operations.len(),
            line: token.line,
            offset: token.range.start(),
        });
        Ok(())
    }

    /// Converts a raw attribute value into an expression.
    ///
    /// `${expr}` covering the whole value yields `expr` itself, `[...]` is a
    /// list or map literal, anything else is an interpolated string.
    fn attribute(&self, token: &Token<'_>) -> Result<Expression, ParseError> {
        let raw = token.text;
        let trimmed = raw.trim();
        let parsed = if let Some(inner) = sole_expression(raw) {
            parse_expression(inner)
        } else if trimmed.starts_with('[') && trimmed.ends_with(']') {
            parse_expression(trimmed)
        } else {
            parse_template(raw)
        };
        let ast = parsed.map_err(|error| {
            self.error(
                ParseErrorKind::InvalidExpression {
                    source_text: raw.to_string(),
                    message: error.message,
                },
                token.line,
                token.range.start(),
            )
        })?;
        Ok(Expression {
            source: raw.to_string(),
            line: token.line,
            ast,
        })
    }

    /// Keeps an attribute holding code as its source text, after checking
    /// that it parses. A surrounding `${}` is removed.
    fn code(&self, token: &Token<'_>) -> Result<Expression, ParseError> {
        let raw = token.text;
        let code = sole_expression(raw).unwrap_or(raw).trim();
        parse_expression(code).map_err(|error| {
            self.error(
                ParseErrorKind::InvalidExpression {
                    source_text: raw.to_string(),
                    message: error.message,
                },
                token.line,
                token.range.start(),
            )
        })?;
        Ok(Expression {
            source: raw.to_string(),
            line: token.line,
            ast: Expr::Str(code.into()),
        })
    }

    fn end_tag(&mut self, token: &Token<'src>) -> Result<(), ParseError> {
        let found = format!(
            "{}:{}",
            token
                .namespace
                .unwrap_or(self.options.default_namespace.as_str()),
            token.text
        );
        let Some(open) = self.open_tags.pop() else {
            return Err(self.error(
                ParseErrorKind::UnmatchedEndTag { name: found },
                token.line,
                token.range.start(),
            ));
        };

        let self_closing = token.text.is_empty();
        if !self_closing && (open.name != token.text || Some(open.namespace) != token.namespace) {
            return Err(self.error(
                ParseErrorKind::MismatchedEndTag {
                    expected: open.qualified_name(),
                    found,
                },
                token.line,
                token.range.start(),
            ));
        }

        let body_operations = self.operations.split_off(open.start);
        let body = match body_operations.as_slice() {
            [] => BodyRef::Empty,
            [PageOperation::PrintHtml(index)] => BodyRef::Html(*index),
            _ => {
                self.next_body_id += 1;
                let id = self.next_body_id;
                self.operations.push(PageOperation::CreateTagBody {
                    id,
                    operations: body_operations,
                });
                BodyRef::Body(id)
            }
        };

        log::trace!(
            target: "gsp.parser",
            "tag {} closed at line {} with body {:?}",
            open.qualified_name(),
            token.line,
            body
        );

        self.operations.push(PageOperation::InvokeTag(TagCall {
            namespace: SmolStr::from(open.namespace),
            name: SmolStr::from(open.name),
            attributes: open.attributes,
            body,
            line: open.line,
        }));
        Ok(())
    }

    // === Directives ===

    fn directive(&mut self, token: &Token<'_>) -> Result<(), ParseError> {
        let invalid = |message: String| {
            ParseError::new(
                ParseErrorKind::InvalidDirective { message },
                token.line,
                token.range.start(),
            )
        };

        let text = token.text.trim();
        let first_word = text.split_whitespace().next().unwrap_or_default();
        let attributes = if first_word.contains('=') {
            text
        } else {
            match first_word {
                "page" => text["page".len()..].trim_start(),
                "taglib" | "include" => {
                    log::debug!(
                        target: "gsp.parser",
                        "ignoring {} directive at line {}",
                        first_word,
                        token.line
                    );
                    return Ok(());
                }
                other => return Err(invalid(format!("Unknown directive [{}]", other))),
            }
        };

        for (name, value) in directive_attributes(attributes).map_err(invalid)? {
            match name {
                "contentType" => self.content_type = Some(value.to_string()),
                "import" => self.imports.extend(
                    value
                        .split([',', ';'])
                        .map(str::trim)
                        .filter(|import| !import.is_empty())
                        .map(str::to_string),
                ),
                "expressionCodec" | "defaultCodec" => self.codecs.expression = SmolStr::from(value),
                "staticCodec" => self.codecs.static_html = SmolStr::from(value),
                "outCodec" => self.codecs.out = SmolStr::from(value),
                "taglibCodec" => self.codecs.taglib = SmolStr::from(value),
                other => {
                    log::debug!(target: "gsp.parser", "ignoring page attribute {}", other)
                }
            }
        }
        Ok(())
    }
}

/// Returns the inner source when `raw` is exactly one `${...}` expression.
/// The attribute of a core looping tag that is evaluated repeatedly by the
/// tag instead of once before the call.
fn code_attribute(tag: &str) -> Option<&'static str> {
    match tag {
        "while" => Some("test"),
        "collect" | "findAll" => Some("expr"),
        _ => None,
    }
}

fn sole_expression(raw: &str) -> Option<&str> {
    if !raw.starts_with("${") {
        return None;
    }
    let close = scan::find_closing_brace(raw.as_bytes(), 2)?;
    (close == raw.len() - 1).then(|| &raw[2..close])
}

/// Splits `name="value" name='value'` pairs.
fn directive_attributes(text: &str) -> Result<Vec<(&str, &str)>, String> {
    let mut attributes = Vec::new();
    let mut rest = text.trim_start();
    while !rest.is_empty() {
        let name_end = rest
            .find(|c: char| c == '=' || c.is_whitespace())
            .ok_or_else(|| format!("Expecting '=' after attribute name ({})", rest))?;
        let name = &rest[..name_end];
        rest = rest[name_end..].trim_start();
        rest = rest
            .strip_prefix('=')
            .ok_or_else(|| format!("Expecting '=' after attribute name ({})", name))?
            .trim_start();
        let quote = rest
            .chars()
            .next()
            .filter(|c| *c == '"' || *c == '\'')
            .ok_or_else(|| format!("Attribute value must be quoted ({})", name))?;
        let value_end = rest[1..]
            .find(quote)
            .ok_or_else(|| format!("Attribute value quote wasn't closed ({})", name))?;
        attributes.push((name, &rest[1..value_end + 1]));
        rest = rest[value_end + 2..].trim_start();
    }
    Ok(attributes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use pretty_assertions::assert_eq;

    fn parse(source: &str) -> ParsedPage {
        let options = ParseOptions::default();
        Parser::new("test", source, &options).parse().expect("parse failed")
    }

    fn parse_err(source: &str) -> ParseError {
        let options = ParseOptions::default();
        Parser::new("test", source, &options)
            .parse()
            .expect_err("expected a parse error")
    }

    #[test]
    fn test_sole_expression() {
        assert_eq!(sole_expression("${a}"), Some("a"));
        assert_eq!(sole_expression("${a}${b}"), None);
        assert_eq!(sole_expression("x${a}"), None);
        assert_eq!(sole_expression("${[a: '}']}"), Some("[a: '}']"));
    }

    #[test]
    fn test_directive_attributes() {
        assert_eq!(
            directive_attributes(r#"contentType="text/plain" import='a.B, c.D'"#).unwrap(),
            vec![("contentType", "text/plain"), ("import", "a.B, c.D")]
        );
        assert!(directive_attributes("contentType").is_err());
        assert!(directive_attributes("contentType=plain").is_err());
    }

    #[test]
    fn test_code_attributes_keep_their_source() {
        let page =
            parse("<g:while test=\"${i < 3}\">x</g:while><g:findAll in=\"${xs}\" expr=\"it > 1\"/>");
        let calls: Vec<&TagCall> = page
            .operations
            .iter()
            .filter_map(|op| match op {
                PageOperation::InvokeTag(call) => Some(call),
                _ => None,
            })
            .collect();
        assert_eq!(calls[0].attributes[0].1.ast, Expr::Str("i < 3".into()));
        assert_eq!(calls[1].attributes[0].1.ast, Expr::Ident("xs".into()));
        assert_eq!(calls[1].attributes[1].1.ast, Expr::Str("it > 1".into()));

        let error = parse_err("<g:while test=\"${i <}\">x</g:while>");
        assert!(matches!(error.kind, ParseErrorKind::InvalidExpression { .. }));
    }

    #[test]
    fn test_attribute_kinds() {
        let page = parse(r#"<g:x a="${n}" b="hi ${n}" c="[1, 2]" d="plain"/>"#);
        let PageOperation::InvokeTag(call) = &page.operations[0] else {
            panic!("expected a tag invocation");
        };
        assert_eq!(call.attributes[0].1.ast, Expr::Ident("n".into()));
        assert!(matches!(call.attributes[1].1.ast, Expr::Template(_)));
        assert!(matches!(call.attributes[2].1.ast, Expr::List(_)));
        assert_eq!(call.attributes[3].1.ast, Expr::Str("plain".into()));
        assert_eq!(call.attributes[3].1.source, "plain");
    }

    #[test]
    fn test_page_directive() {
        let page = parse(
            r#"<%@ page contentType="text/plain;charset=UTF-8" expressionCodec="none" import="java.util.Date" %>x"#,
        );
        assert_eq!(page.content_type, "text/plain;charset=UTF-8");
        assert_eq!(page.codecs.expression, "none");
        assert_eq!(page.imports, vec!["java.util.Date".to_string()]);
        assert_eq!(page.operations, vec![PageOperation::PrintHtml(0)]);
    }

    #[test]
    fn test_brace_directive() {
        let page = parse(r#"@{ staticCodec="HTML" taglibCodec="JavaScript" }"#);
        assert_eq!(page.codecs.static_html, "HTML");
        assert_eq!(page.codecs.taglib, "JavaScript");
    }

    #[test]
    fn test_unknown_directive() {
        let error = parse_err("<%@ bogus x=\"1\" %>");
        assert!(matches!(error.kind, ParseErrorKind::InvalidDirective { .. }));
    }

    #[test]
    fn test_body_ids_are_unique() {
        let page = parse("<g:a><g:b>1${x}</g:b>2${y}</g:a>");
        assert_eq!(page.body_count, 2);
    }
}
