//! Executable pages.

use crate::body::TagBody;
use crate::value::Text;
use gsp_parser::{
    BodyRef, Expression, PageCodecs, PageOperation, ParseError, ParseOptions, ParsedPage, Script,
    TagCall,
};
use rustc_hash::FxHashSet;
use smol_str::SmolStr;

/// A single step of a page or tag body.
#[derive(Debug, Clone)]
pub(crate) enum Instruction {
    PrintHtml(usize),
    PrintExpression(Expression),
    PrintScriptlet(Expression),
    Scriptlet(Script),
    InvokeTag(TagCall),
}

/// A compiled page, ready to render.
///
/// Pages are immutable and can be shared between threads; every render
/// keeps its own state.
#[derive(Debug)]
pub struct ExecutablePage {
    name: String,
    content_type: String,
    codecs: PageCodecs,
    default_namespace: SmolStr,
    imports: Vec<String>,
    html_parts: Vec<Text>,
    html_part_ids: FxHashSet<usize>,
    declarations: Vec<Script>,
    main: Vec<Instruction>,
    // Indexed by body id - 1.
    bodies: Vec<Vec<Instruction>>,
}

impl ExecutablePage {
    /// Name of the page, used in error messages.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Content type of the rendered output.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Codec names per output channel.
    pub fn codecs(&self) -> &PageCodecs {
        &self.codecs
    }

    /// Namespace of tag calls without a prefix.
    pub fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    /// Imports declared by the page.
    pub fn imports(&self) -> &[String] {
        &self.imports
    }

    /// The page's literal HTML parts.
    pub fn html_parts(&self) -> &[Text] {
        &self.html_parts
    }

    /// Returns `true` if `text` is one of this page's HTML parts.
    ///
    /// Compares identity, not content.
    pub fn is_html_part(&self, text: &Text) -> bool {
        self.html_part_ids.contains(&text.identity())
    }

    /// Number of tag bodies.
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub(crate) fn html_part(&self, index: usize) -> Option<&Text> {
        self.html_parts.get(index)
    }

    pub(crate) fn declarations(&self) -> &[Script] {
        &self.declarations
    }

    pub(crate) fn main(&self) -> &[Instruction] {
        &self.main
    }

    pub(crate) fn tag_body(&self, body: BodyRef) -> TagBody<'_> {
        match body {
            BodyRef::Empty => TagBody::empty(),
            BodyRef::Html(index) => self
                .html_part(index)
                .map_or_else(TagBody::empty, TagBody::constant),
            BodyRef::Body(id) => id
                .checked_sub(1)
                .and_then(|index| self.bodies.get(index as usize))
                .map_or_else(TagBody::empty, |operations| TagBody::operations(operations)),
        }
    }
}

/// Compiles a parsed page.
pub fn compile(parsed: ParsedPage) -> ExecutablePage {
    let html_parts: Vec<Text> = parsed.html_parts.into_iter().map(Text::from).collect();
    let html_part_ids = html_parts.iter().map(Text::identity).collect();
    let mut bodies = vec![Vec::new(); parsed.body_count as usize];
    let main = flatten(parsed.operations, &mut bodies);
    log::debug!(
        target: "gsp.runtime",
        "compiled {}: {} instructions, {} bodies, {} html parts",
        parsed.source_name,
        main.len(),
        bodies.len(),
        html_parts.len()
    );
    ExecutablePage {
        name: parsed.source_name,
        content_type: parsed.content_type,
        codecs: parsed.codecs,
        default_namespace: parsed.default_namespace,
        imports: parsed.imports,
        html_parts,
        html_part_ids,
        declarations: parsed.declarations,
        main,
        bodies,
    }
}

/// Parses and compiles template source.
pub fn compile_source(
    source_name: &str,
    source: &str,
    options: &ParseOptions,
) -> Result<ExecutablePage, ParseError> {
    gsp_parser::parse_with_options(source_name, source, options).map(compile)
}

/// Decodes, parses and compiles template bytes.
pub fn compile_bytes(
    source_name: &str,
    bytes: &[u8],
    encoding: &str,
    options: &ParseOptions,
) -> Result<ExecutablePage, ParseError> {
    gsp_parser::parse_bytes(source_name, bytes, encoding, options).map(compile)
}

fn flatten(operations: Vec<PageOperation>, bodies: &mut Vec<Vec<Instruction>>) -> Vec<Instruction> {
    let mut instructions = Vec::with_capacity(operations.len());
    for operation in operations {
        match operation {
            PageOperation::PrintHtml(index) => instructions.push(Instruction::PrintHtml(index)),
            PageOperation::PrintExpression(expression) => {
                instructions.push(Instruction::PrintExpression(expression))
            }
            PageOperation::PrintScriptlet(expression) => {
                instructions.push(Instruction::PrintScriptlet(expression))
            }
            PageOperation::Scriptlet(script) => instructions.push(Instruction::Scriptlet(script)),
            PageOperation::InvokeTag(call) => instructions.push(Instruction::InvokeTag(call)),
            PageOperation::CreateTagBody { id, operations } => {
                let body = flatten(operations, bodies);
                let index = id.saturating_sub(1) as usize;
                if index >= bodies.len() {
                    bodies.resize(index + 1, Vec::new());
                }
                bodies[index] = body;
            }
        }
    }
    instructions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bodies_are_flattened() {
        let page = compile_source(
            "nested",
            "<g:a>x<g:b>${y}</g:b></g:a>",
            &ParseOptions::default(),
        )
        .unwrap();
        assert_eq!(page.body_count(), 2);
        assert_eq!(page.main().len(), 1);
        assert!(!page.tag_body(BodyRef::Body(1)).is_empty());
        assert!(page.tag_body(BodyRef::Body(3)).is_empty());
        assert!(page.tag_body(BodyRef::Body(0)).is_empty());
    }

    #[test]
    fn test_html_part_identity() {
        let page = compile_source("parts", "<br/>${a}<br/>", &ParseOptions::default()).unwrap();
        assert_eq!(page.html_parts().len(), 2);
        let part = page.html_parts()[0].clone();
        assert!(page.is_html_part(&part));
        assert!(!page.is_html_part(&Text::from("<br/>")));
    }

    #[test]
    fn test_page_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ExecutablePage>();
    }
}
