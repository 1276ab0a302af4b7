//! Page operation types produced by the parser.

use crate::expr::{Expr, Statement};
use smol_str::SmolStr;

/// The content type used when a page declares none.
pub const DEFAULT_CONTENT_TYPE: &str = "text/html;charset=UTF-8";

/// Codec name meaning "no encoding".
pub const NO_CODEC: &str = "none";

/// A parsed template.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ParsedPage {
    /// Name used in error messages.
    pub source_name: String,
    /// Top-level operations in source order.
    pub operations: Vec<PageOperation>,
    /// Literal HTML runs, referenced by index from `PrintHtml`.
    pub html_parts: Vec<String>,
    /// Codec names per output channel, after page directives.
    pub codecs: PageCodecs,
    /// Content type declared by the page or the configured default.
    pub content_type: String,
    /// Imports declared with `<%@ page import="..." %>`.
    pub imports: Vec<String>,
    /// Declarations (`<%! %>`, `!{ }!`), run once before the page body.
    pub declarations: Vec<Script>,
    /// Namespace used for tag calls without a prefix.
    pub default_namespace: SmolStr,
    /// Number of tag bodies created by `CreateTagBody`.
    pub body_count: u32,
}

/// Codec names applied to each output channel.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PageCodecs {
    /// `${...}` expressions.
    pub expression: SmolStr,
    /// Literal HTML parts.
    pub static_html: SmolStr,
    /// `<%= %>` scriptlet output.
    pub out: SmolStr,
    /// Output written by tags.
    pub taglib: SmolStr,
}

impl Default for PageCodecs {
    fn default() -> Self {
        Self {
            expression: SmolStr::new_static("HTML"),
            static_html: SmolStr::new_static(NO_CODEC),
            out: SmolStr::new_static(NO_CODEC),
            taglib: SmolStr::new_static(NO_CODEC),
        }
    }
}

/// A single page operation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum PageOperation {
    /// Write the HTML part with this index.
    PrintHtml(usize),
    /// Evaluate a `${...}` expression and write it through the expression codec.
    PrintExpression(Expression),
    /// Evaluate a `<%= %>` expression and write it through the out codec.
    PrintScriptlet(Expression),
    /// Run scriptlet statements.
    Scriptlet(Script),
    /// Invoke a tag.
    InvokeTag(TagCall),
    /// Register the body of the following `InvokeTag`.
    CreateTagBody {
        /// Fresh body id, unique within the page.
        id: u32,
        /// Operations of the body.
        operations: Vec<PageOperation>,
    },
}

/// An expression together with its source.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Expression {
    /// Source text as written in the template.
    pub source: String,
    /// 1-based line of the expression.
    pub line: u32,
    /// Parsed form.
    pub ast: Expr,
}

/// A scriptlet or declaration block.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Script {
    /// Source text of the block.
    pub source: String,
    /// 1-based line of the block.
    pub line: u32,
    /// Parsed statements.
    pub statements: Vec<Statement>,
}

/// A tag invocation site.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TagCall {
    /// Tag namespace, e.g. `g`.
    pub namespace: SmolStr,
    /// Tag name, e.g. `link`.
    pub name: SmolStr,
    /// Attributes in source order.
    pub attributes: Vec<(SmolStr, Expression)>,
    /// The body passed to the tag.
    pub body: BodyRef,
    /// 1-based line of the start tag.
    pub line: u32,
}

impl TagCall {
    /// Returns `namespace:name`.
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.namespace, self.name)
    }
}

/// Reference to the body of a tag invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum BodyRef {
    /// The tag has no body.
    Empty,
    /// The body is a single HTML part.
    Html(usize),
    /// The body registered by `CreateTagBody` with this id.
    Body(u32),
}
