//! Render error types.

use smol_str::SmolStr;
use std::error::Error as StdError;
use std::io;
use thiserror::Error;

/// Boxed cause of a tag failure.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// An error raised while rendering a page.
#[derive(Debug, Error)]
pub enum RenderError {
    /// No tag library provides the requested tag.
    #[error("Tag [{name}] does not exist. No corresponding tag library found for namespace: {namespace}")]
    TagNotFound {
        /// Namespace of the tag.
        namespace: SmolStr,
        /// Name of the tag.
        name: SmolStr,
        /// Page being rendered.
        page: String,
        /// 1-based line of the invocation.
        line: u32,
    },

    /// A tag implementation failed.
    #[error(transparent)]
    TagExecution(#[from] TagExecutionError),

    /// A codec could not be resolved or failed.
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    /// An expression could not be evaluated.
    #[error("Error evaluating expression [{expression}] on line [{line}] of [{page}]: {message}")]
    Evaluation {
        /// Page being rendered.
        page: String,
        /// 1-based line of the expression.
        line: u32,
        /// Source of the expression.
        expression: String,
        /// A description of the problem.
        message: String,
    },

    /// The output writer failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl RenderError {
    /// Returns the page and line the error refers to, when known.
    pub fn location(&self) -> Option<(&str, u32)> {
        match self {
            RenderError::TagNotFound { page, line, .. }
            | RenderError::Evaluation { page, line, .. } => Some((page, *line)),
            RenderError::TagExecution(error) => Some((&error.page, error.line)),
            RenderError::Encoding(_) | RenderError::Io(_) => None,
        }
    }
}

/// A tag implementation failed.
#[derive(Debug, Error)]
#[error("Error executing tag <{namespace}:{tag}>: {source}")]
pub struct TagExecutionError {
    /// Namespace of the tag.
    pub namespace: SmolStr,
    /// Name of the tag.
    pub tag: SmolStr,
    /// Name of the tag library that provided the tag.
    pub library: SmolStr,
    /// Page being rendered.
    pub page: String,
    /// 1-based line of the invocation.
    pub line: u32,
    /// The underlying failure.
    pub source: BoxError,
}

/// A codec could not be resolved or failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    /// No codec with this name is registered.
    #[error("Unknown codec [{name}]")]
    UnknownCodec {
        /// The requested codec name.
        name: String,
    },

    /// The codec rejected its input.
    #[error("Codec [{codec}] failed: {message}")]
    Failed {
        /// Name of the codec.
        codec: String,
        /// A description of the problem.
        message: String,
    },
}

/// The error type returned by tag implementations.
///
/// Failures raised by the tag itself are wrapped into [`TagExecutionError`]
/// with the tag's identity; errors from nested rendering pass through
/// unchanged.
#[derive(Debug, Error)]
pub enum TagError {
    /// A failure of the tag implementation.
    #[error("{0}")]
    Failed(BoxError),

    /// An error raised by nested rendering.
    #[error(transparent)]
    Render(Box<RenderError>),
}

impl TagError {
    /// Creates a tag failure from a message.
    pub fn msg(message: impl Into<String>) -> Self {
        TagError::Failed(message.into().into())
    }

    /// Creates a tag failure from any error.
    pub fn new(error: impl StdError + Send + Sync + 'static) -> Self {
        TagError::Failed(Box::new(error))
    }
}

impl From<RenderError> for TagError {
    fn from(error: RenderError) -> Self {
        TagError::Render(Box::new(error))
    }
}

impl From<EncodingError> for TagError {
    fn from(error: EncodingError) -> Self {
        TagError::Render(Box::new(RenderError::Encoding(error)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_not_found_message() {
        let error = RenderError::TagNotFound {
            namespace: "tt".into(),
            name: "form".into(),
            page: "index.gsp".into(),
            line: 2,
        };
        assert_eq!(
            error.to_string(),
            "Tag [form] does not exist. No corresponding tag library found for namespace: tt"
        );
        assert_eq!(error.location(), Some(("index.gsp", 2)));
    }

    #[test]
    fn test_tag_execution_message() {
        let error = TagExecutionError {
            namespace: "g".into(),
            tag: "each".into(),
            library: "CoreTagLib".into(),
            page: "list.gsp".into(),
            line: 4,
            source: "Tag [each] is missing required attribute [in]".into(),
        };
        assert_eq!(
            error.to_string(),
            "Error executing tag <g:each>: Tag [each] is missing required attribute [in]"
        );
    }

    #[test]
    fn test_nested_render_error_passes_through() {
        let nested = RenderError::Encoding(EncodingError::UnknownCodec { name: "rot13".into() });
        let error = TagError::from(nested);
        assert!(matches!(error, TagError::Render(_)));
        assert_eq!(error.to_string(), "Unknown codec [rot13]");
    }
}
