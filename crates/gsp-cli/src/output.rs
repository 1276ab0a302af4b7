//! Output formatting.

use crate::cli::OutputFormat;
use gsp_parser::{BodyRef, PageOperation, ParseError, ParsedPage};
use gsp_runtime::{EncodingError, RenderError};
use miette::{
    Diagnostic, GraphicalReportHandler, GraphicalTheme, LabeledSpan, NamedSource, SourceCode,
    SourceSpan,
};
use serde::Serialize;
use std::fmt::{self, Write as _};
use thiserror::Error;

/// Where a template problem was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Scanning, parsing or decoding.
    Parse,
    /// Codec resolution for the page channels.
    Codec,
    /// Rendering.
    Render,
}

impl Stage {
    fn code(self) -> &'static str {
        match self {
            Stage::Parse => "gsp::parse",
            Stage::Codec => "gsp::codec",
            Stage::Render => "gsp::render",
        }
    }
}

/// A problem found in a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateDiagnostic {
    /// The stage that failed.
    pub stage: Stage,
    /// The template path.
    pub filename: String,
    /// 1-indexed line number.
    pub line: u32,
    /// Byte offset, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    /// The message.
    pub message: String,
}

impl TemplateDiagnostic {
    /// Diagnostic for a template that failed to parse.
    pub fn from_parse(filename: &str, error: &ParseError) -> Self {
        Self {
            stage: Stage::Parse,
            filename: filename.to_string(),
            line: error.line,
            offset: Some(u32::from(error.offset)),
            message: error.kind.to_string(),
        }
    }

    /// Diagnostic for a page whose codecs do not resolve.
    pub fn from_codec(filename: &str, error: &EncodingError) -> Self {
        Self {
            stage: Stage::Codec,
            filename: filename.to_string(),
            line: 1,
            offset: None,
            message: error.to_string(),
        }
    }

    /// Diagnostic for a failed render.
    pub fn from_render(filename: &str, error: &RenderError) -> Self {
        Self {
            stage: Stage::Render,
            filename: filename.to_string(),
            line: error.location().map_or(1, |(_, line)| line),
            offset: None,
            message: error.to_string(),
        }
    }

    /// Returns the span to label in `source`.
    ///
    /// A known offset runs to the end of its line; otherwise the whole line
    /// is labelled.
    fn span(&self, source: &str) -> SourceSpan {
        let start = match self.offset {
            Some(offset) => (offset as usize).min(source.len()),
            None => line_start(source, self.line),
        };
        let rest = &source[start..];
        let len = rest.find(['\r', '\n']).unwrap_or(rest.len());
        SourceSpan::from((start, len))
    }
}

fn line_start(source: &str, line: u32) -> usize {
    if line <= 1 {
        return 0;
    }
    source
        .match_indices('\n')
        .nth(line as usize - 2)
        .map_or(source.len(), |(index, _)| index + 1)
}

/// A diagnostic rendered with its source snippet.
#[derive(Debug, Error)]
#[error("{message}")]
struct SnippetReport {
    message: String,
    code: &'static str,
    source_code: NamedSource<String>,
    span: SourceSpan,
}

impl Diagnostic for SnippetReport {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(self.code))
    }

    fn source_code(&self) -> Option<&dyn SourceCode> {
        Some(&self.source_code)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        Some(Box::new(std::iter::once(LabeledSpan::new_with_span(
            Some("here".to_string()),
            self.span,
        ))))
    }
}

/// Formats template diagnostics for output.
pub struct Formatter {
    format: OutputFormat,
}

impl Formatter {
    /// Creates a new formatter.
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats the diagnostics of one template.
    ///
    /// JSON output is produced for the whole run by [`Formatter::format_json`],
    /// so this returns nothing in JSON mode.
    pub fn format(&self, diagnostics: &[TemplateDiagnostic], source: &str) -> String {
        match self.format {
            OutputFormat::Human => Self::format_human(diagnostics),
            OutputFormat::HumanVerbose => Self::format_human_verbose(diagnostics, source),
            OutputFormat::Json => String::new(),
            OutputFormat::Machine => Self::format_machine(diagnostics),
        }
    }

    fn format_human(diagnostics: &[TemplateDiagnostic]) -> String {
        let mut output = String::new();
        for diag in diagnostics {
            let _ = write!(
                output,
                "{}:{}\nError: {} ({})\n\n",
                diag.filename,
                diag.line,
                diag.message,
                diag.stage.code()
            );
        }
        output
    }

    fn format_human_verbose(diagnostics: &[TemplateDiagnostic], source: &str) -> String {
        let handler = GraphicalReportHandler::new_themed(GraphicalTheme::unicode_nocolor());
        let mut output = String::new();
        for diag in diagnostics {
            let report = SnippetReport {
                message: diag.message.clone(),
                code: diag.stage.code(),
                source_code: NamedSource::new(&diag.filename, source.to_string()),
                span: diag.span(source),
            };
            if handler.render_report(&mut output, &report).is_err() {
                output.push_str(&Self::format_human(std::slice::from_ref(diag)));
            }
        }
        output
    }

    fn format_machine(diagnostics: &[TemplateDiagnostic]) -> String {
        let mut output = String::new();
        for diag in diagnostics {
            let _ = writeln!(
                output,
                "ERROR {}:{} {} ({})",
                diag.filename,
                diag.line,
                diag.message,
                diag.stage.code()
            );
        }
        output
    }

    /// Formats all diagnostics of a run as a JSON array.
    pub fn format_json(diagnostics: &[TemplateDiagnostic]) -> String {
        serde_json::to_string_pretty(diagnostics).unwrap_or_default()
    }
}

/// Summary of a check run.
#[derive(Debug, Default)]
pub struct CheckSummary {
    /// Number of templates checked.
    pub file_count: usize,
    /// Number of templates that failed.
    pub error_count: usize,
}

impl CheckSummary {
    /// Formats the summary line.
    pub fn format(&self) -> String {
        let error_word = if self.error_count == 1 {
            "error"
        } else {
            "errors"
        };
        let file_word = if self.file_count == 1 {
            "template"
        } else {
            "templates"
        };
        format!(
            "====================================\ngsp found {} {} in {} {}",
            self.error_count, error_word, self.file_count, file_word
        )
    }
}

/// Prints the operations of a parsed page, one per line.
pub fn listing(page: &ParsedPage) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "page {}", page.source_name);
    let _ = writeln!(output, "  contentType: {}", page.content_type);
    let _ = writeln!(
        output,
        "  codecs: expression={} static={} out={} taglib={}",
        page.codecs.expression, page.codecs.static_html, page.codecs.out, page.codecs.taglib
    );
    for import in &page.imports {
        let _ = writeln!(output, "  import: {import}");
    }
    for declaration in &page.declarations {
        let _ = writeln!(
            output,
            "  declaration (line {}): {}",
            declaration.line,
            declaration.source.trim()
        );
    }
    list_operations(&mut output, page, &page.operations, 1);
    output
}

fn list_operations(
    output: &mut String,
    page: &ParsedPage,
    operations: &[PageOperation],
    depth: usize,
) {
    let indent = "  ".repeat(depth);
    for operation in operations {
        let _ = match operation {
            PageOperation::PrintHtml(index) => writeln!(
                output,
                "{indent}PrintHtml #{index} {:?}",
                page.html_parts.get(*index).map_or("", String::as_str)
            ),
            PageOperation::PrintExpression(expression) => writeln!(
                output,
                "{indent}PrintExpression ${{{}}} (line {})",
                expression.source, expression.line
            ),
            PageOperation::PrintScriptlet(expression) => writeln!(
                output,
                "{indent}PrintScriptlet <%= {} %> (line {})",
                expression.source.trim(),
                expression.line
            ),
            PageOperation::Scriptlet(script) => writeln!(
                output,
                "{indent}Scriptlet {:?} (line {})",
                script.source.trim(),
                script.line
            ),
            PageOperation::InvokeTag(call) => {
                let attributes: Vec<String> = call
                    .attributes
                    .iter()
                    .map(|(name, value)| format!("{name}={:?}", value.source))
                    .collect();
                let body = match call.body {
                    BodyRef::Empty => "empty".to_string(),
                    BodyRef::Html(index) => format!("html #{index}"),
                    BodyRef::Body(id) => format!("body {id}"),
                };
                writeln!(
                    output,
                    "{indent}InvokeTag {} [{}] {body} (line {})",
                    call.qualified_name(),
                    attributes.join(", "),
                    call.line
                )
            }
            PageOperation::CreateTagBody { id, operations } => {
                let _ = writeln!(output, "{indent}CreateTagBody {id}");
                list_operations(output, page, operations, depth + 1);
                Ok(())
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse_failure() -> TemplateDiagnostic {
        let error = gsp_parser::parse("bad.gsp", "<p>\n${oops</p>").unwrap_err();
        TemplateDiagnostic::from_parse("views/bad.gsp", &error)
    }

    #[test]
    fn test_format_human() {
        let diag = parse_failure();
        let output = Formatter::new(OutputFormat::Human).format(&[diag], "<p>\n${oops</p>");
        assert!(output.starts_with("views/bad.gsp:2\nError: Unclosed GSP expression"));
        assert!(output.contains("(gsp::parse)"));
    }

    #[test]
    fn test_format_human_verbose_shows_snippet() {
        let source = "<p>\n${oops</p>";
        let output = Formatter::new(OutputFormat::HumanVerbose).format(&[parse_failure()], source);
        assert!(output.contains("Unclosed GSP expression"));
        assert!(output.contains("${oops</p>"));
        assert!(output.contains("here"));
    }

    #[test]
    fn test_format_machine() {
        let output = Formatter::new(OutputFormat::Machine).format(&[parse_failure()], "");
        assert_eq!(
            output,
            "ERROR views/bad.gsp:2 Unclosed GSP expression (gsp::parse)\n"
        );
    }

    #[test]
    fn test_format_json() {
        let output = Formatter::format_json(&[parse_failure()]);
        assert!(output.contains("\"filename\": \"views/bad.gsp\""));
        assert!(output.contains("\"stage\": \"parse\""));
    }

    #[test]
    fn test_render_span_covers_line() {
        let diag = TemplateDiagnostic {
            stage: Stage::Render,
            filename: "a.gsp".to_string(),
            line: 2,
            offset: None,
            message: "boom".to_string(),
        };
        let span = diag.span("one\ntwo\r\nthree");
        assert_eq!((span.offset(), span.len()), (4, 3));
    }

    #[test]
    fn test_summary() {
        let summary = CheckSummary {
            file_count: 5,
            error_count: 1,
        };
        let output = summary.format();
        assert!(output.contains("1 error in 5 templates"));
    }

    #[test]
    fn test_listing() {
        let page = gsp_parser::parse(
            "list.gsp",
            "<ul><g:each in=\"${items}\"><li>${it}</li></g:each></ul>",
        )
        .unwrap();
        let output = listing(&page);
        assert!(output.starts_with("page list.gsp\n"));
        assert!(output.contains("  CreateTagBody 1\n    PrintHtml #1 \"<li>\""));
        assert!(output.contains("InvokeTag g:each [in=\"${items}\"] body 1 (line 1)"));
    }
}
