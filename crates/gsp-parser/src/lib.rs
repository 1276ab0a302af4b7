//! GSP template parser.
//!
//! This crate turns GSP source into a list of page operations:
//! - Scanner for HTML runs, `${...}` expressions, `<ns:tag>` markup and
//!   scriptlet blocks, using `logos`
//! - Parser that nests tag bodies with an explicit open-tag stack
//! - A small expression language for expressions, attributes and scriptlets
//!
//! Errors are fatal: a template either parses completely or yields a single
//! [`ParseError`] naming the source and line.
//!
//! # Example
//!
//! ```
//! use gsp_parser::{parse, PageOperation};
//!
//! let page = parse("hello.gsp", "<p>Hello ${name}</p>").unwrap();
//! assert_eq!(page.html_parts, vec!["<p>Hello ".to_string(), "</p>".to_string()]);
//! assert!(matches!(page.operations[1], PageOperation::PrintExpression(_)));
//! ```

mod ast;
mod error;
pub mod expr;
mod lexer;
mod line_index;
mod parser;
mod scan;

use std::borrow::Cow;

pub use ast::*;
pub use error::{ParseError, ParseErrorKind};
pub use lexer::{Scanner, Token, TokenKind, DEFAULT_MAX_HTML_LENGTH};
pub use line_index::LineIndex;
use smol_str::SmolStr;
use text_size::TextSize;

/// Namespace of the built-in tag library.
pub const DEFAULT_NAMESPACE: &str = "g";

/// Options for parsing templates.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Namespace for tag calls written without a prefix.
    pub default_namespace: SmolStr,
    /// Codecs applied when the page declares none.
    pub codecs: PageCodecs,
    /// Content type used when the page declares none.
    pub content_type: String,
    /// Longest HTML run kept in a single part.
    pub max_html_length: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            default_namespace: SmolStr::new_static(DEFAULT_NAMESPACE),
            codecs: PageCodecs::default(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            max_html_length: DEFAULT_MAX_HTML_LENGTH,
        }
    }
}

/// Parses a template with default options.
pub fn parse(source_name: &str, source: &str) -> Result<ParsedPage, ParseError> {
    parse_with_options(source_name, source, &ParseOptions::default())
}

/// Parses a template with custom options.
pub fn parse_with_options(
    source_name: &str,
    source: &str,
    options: &ParseOptions,
) -> Result<ParsedPage, ParseError> {
    parser::Parser::new(source_name, source, options).parse()
}

/// Decodes template bytes in the given encoding and parses them.
///
/// Supported encodings are UTF-8, ISO-8859-1 and US-ASCII. A UTF-8 byte
/// order mark is ignored.
pub fn parse_bytes(
    source_name: &str,
    bytes: &[u8],
    encoding: &str,
    options: &ParseOptions,
) -> Result<ParsedPage, ParseError> {
    let source = decode(bytes, encoding)
        .map_err(|kind| ParseError::new(kind, 1, TextSize::from(0)).in_source(source_name))?;
    parse_with_options(source_name, &source, options)
}

/// Decodes template bytes.
pub fn decode<'a>(bytes: &'a [u8], encoding: &str) -> Result<Cow<'a, str>, ParseErrorKind> {
    let invalid = || ParseErrorKind::InvalidEncoding {
        encoding: encoding.to_string(),
    };
    match encoding.to_ascii_lowercase().replace('_', "-").as_str() {
        "utf-8" | "utf8" => {
            let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
            std::str::from_utf8(bytes).map(Cow::Borrowed).map_err(|_| invalid())
        }
        "iso-8859-1" | "latin1" | "latin-1" => {
            Ok(Cow::Owned(bytes.iter().copied().map(char::from).collect()))
        }
        "us-ascii" | "ascii" => {
            if bytes.is_ascii() {
                std::str::from_utf8(bytes).map(Cow::Borrowed).map_err(|_| invalid())
            } else {
                Err(invalid())
            }
        }
        _ => Err(ParseErrorKind::UnsupportedEncoding {
            encoding: encoding.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty() {
        let page = parse("empty", "").unwrap();
        assert!(page.operations.is_empty());
        assert_eq!(page.content_type, DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn test_parse_simple_element() {
        let page = parse("simple", "<div>hi</div>").unwrap();
        assert_eq!(page.html_parts, vec!["<div>hi</div>".to_string()]);
        assert_eq!(page.operations, vec![PageOperation::PrintHtml(0)]);
    }

    #[test]
    fn test_decode_latin1() {
        let decoded = decode(b"caf\xe9", "ISO-8859-1").unwrap();
        assert_eq!(decoded, "café");
    }

    #[test]
    fn test_decode_strips_bom() {
        let decoded = decode(b"\xEF\xBB\xBFhi", "UTF-8").unwrap();
        assert_eq!(decoded, "hi");
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            decode(b"\xff", "UTF-8"),
            Err(ParseErrorKind::InvalidEncoding { .. })
        ));
        assert!(matches!(
            decode(b"x", "EBCDIC"),
            Err(ParseErrorKind::UnsupportedEncoding { .. })
        ));
    }

    #[test]
    fn test_parse_bytes_reports_source_name() {
        let error = parse_bytes("bad.gsp", b"\xff", "UTF-8", &ParseOptions::default()).unwrap_err();
        assert_eq!(error.to_string(), "[bad.gsp:1] Template is not valid UTF-8");
    }
}
