//! Parse error types.

use text_size::TextSize;
use thiserror::Error;

/// A template that could not be compiled.
///
/// Displays as `[sourceName:line] message`, with a 1-based line number.
#[derive(Debug, Clone, Error)]
#[error("[{source_name}:{line}] {kind}")]
pub struct ParseError {
    /// The kind of error.
    pub kind: ParseErrorKind,
    /// Name of the template being compiled.
    pub source_name: String,
    /// 1-based line where the error was detected.
    pub line: u32,
    /// Byte offset of the construct that failed.
    pub offset: TextSize,
}

impl ParseError {
    /// Creates a new parse error without a source name.
    pub fn new(kind: ParseErrorKind, line: u32, offset: TextSize) -> Self {
        Self {
            kind,
            source_name: String::new(),
            line,
            offset,
        }
    }

    /// Attaches the template name used in the error message.
    pub fn in_source(mut self, source_name: &str) -> Self {
        self.source_name = source_name.to_string();
        self
    }
}

/// The kind of parse error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
    /// A `${` without its matching `}`.
    #[error("Unclosed GSP expression")]
    UnclosedExpression,

    /// A scriptlet, directive, declaration or comment without its terminator.
    #[error("Unclosed {construct}, expected '{terminator}'")]
    UnclosedBlock {
        /// Human readable name of the construct.
        construct: &'static str,
        /// The terminator that was never found.
        terminator: &'static str,
    },

    /// The end of the file was reached inside a start or end tag.
    #[error("Unexpected end of file encountered parsing Tag [{name}]. Are you missing a closing brace '}}'?")]
    UnterminatedTag {
        /// Qualified name of the tag.
        name: String,
    },

    /// An attribute without `=`.
    #[error("Expecting '=' after attribute name ({name}) in tag [{tag}]")]
    MissingAttributeValue {
        /// The tag being scanned.
        tag: String,
        /// The attribute name.
        name: String,
    },

    /// An attribute value without quotes.
    #[error("Attribute value must be quoted ({name}) in tag [{tag}]")]
    UnquotedAttributeValue {
        /// The tag being scanned.
        tag: String,
        /// The attribute name.
        name: String,
    },

    /// An attribute value whose quote is never closed.
    #[error("Attribute value quote wasn't closed ({name}) in tag [{tag}]")]
    UnclosedAttributeQuote {
        /// The tag being scanned.
        tag: String,
        /// The attribute name.
        name: String,
    },

    /// An end tag without a matching start tag.
    #[error("Found closing Grails tag with no opening [{name}]")]
    UnmatchedEndTag {
        /// Qualified name of the end tag.
        name: String,
    },

    /// An end tag that does not close the innermost open tag.
    #[error("Grails tag [{expected}] was not closed")]
    MismatchedEndTag {
        /// Qualified name of the innermost open tag.
        expected: String,
        /// Qualified name of the end tag that was found.
        found: String,
    },

    /// Tags still open when the source ended.
    #[error("Grails tags were not closed! [{tags}] in GSP page")]
    UnclosedTags {
        /// The open tags, outermost first.
        tags: String,
    },

    /// An expression, scriptlet or attribute with invalid syntax.
    #[error("Invalid expression [{source_text}]: {message}")]
    InvalidExpression {
        /// The offending source text.
        source_text: String,
        /// A description of the problem.
        message: String,
    },

    /// A page directive that could not be read.
    #[error("Invalid page directive: {message}")]
    InvalidDirective {
        /// A description of the problem.
        message: String,
    },

    /// The requested source encoding is not supported.
    #[error("Unsupported template encoding [{encoding}]")]
    UnsupportedEncoding {
        /// The encoding name.
        encoding: String,
    },

    /// The source bytes are not valid in the requested encoding.
    #[error("Template is not valid {encoding}")]
    InvalidEncoding {
        /// The encoding name.
        encoding: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ParseError::new(ParseErrorKind::UnclosedExpression, 1, TextSize::from(6))
            .in_source("myTest3");
        assert_eq!(error.to_string(), "[myTest3:1] Unclosed GSP expression");
    }

    #[test]
    fn test_unterminated_tag_message() {
        let error = ParseError::new(
            ParseErrorKind::UnterminatedTag {
                name: "g:link".to_string(),
            },
            3,
            TextSize::from(0),
        )
        .in_source("index.gsp");
        assert_eq!(
            error.to_string(),
            "[index.gsp:3] Unexpected end of file encountered parsing Tag [g:link]. Are you missing a closing brace '}'?"
        );
    }
}
