//! Rendering pages.

use crate::codec::CodecRegistry;
use crate::context::RenderContext;
use crate::core_tags;
use crate::encoding_state::EncodingStateRegistry;
use crate::error::RenderError;
use crate::eval::{evaluate, run_script};
use crate::invoke::{invoke_tag, TagRequest};
use crate::page::{ExecutablePage, Instruction};
use crate::stack::{Channel, ChannelEncoders, OutputEncodingStack};
use crate::taglib::{Attributes, TagLibraryRegistry};
use crate::value::{Bindings, Value};
use std::io;

/// Codecs and tag libraries shared by renders.
#[derive(Debug)]
pub struct RenderEnv {
    /// Codecs available to pages and tags.
    pub codecs: CodecRegistry,
    /// Tag libraries available to pages.
    pub taglibs: TagLibraryRegistry,
}

impl RenderEnv {
    /// Creates an environment.
    pub fn new(codecs: CodecRegistry, taglibs: TagLibraryRegistry) -> Self {
        Self { codecs, taglibs }
    }
}

impl Default for RenderEnv {
    /// Built-in codecs and the core `g` tags.
    fn default() -> Self {
        Self::new(
            CodecRegistry::default(),
            TagLibraryRegistry::with_libraries(vec![core_tags::library()]),
        )
    }
}

/// Renders a page to `out`.
///
/// `registry` tracks encoding states for this render and is cleared when
/// the render ends, whether it succeeds or not.
pub fn render(
    page: &ExecutablePage,
    bindings: Bindings,
    out: &mut dyn io::Write,
    registry: &mut EncodingStateRegistry,
    env: &RenderEnv,
) -> Result<(), RenderError> {
    log::debug!(target: "gsp.runtime", "rendering {}", page.name());
    let encoders = ChannelEncoders::for_page(page.codecs(), &env.codecs)?;
    let result = {
        let stack = OutputEncodingStack::new(out, encoders);
        let mut ctx = RenderContext::new(
            page,
            env.taglibs.snapshot(),
            &env.codecs,
            registry,
            stack,
            bindings,
        );
        run(&mut ctx)
    };
    registry.clear();
    result
}

/// Renders a page to a string.
pub fn render_to_string(
    page: &ExecutablePage,
    bindings: Bindings,
    env: &RenderEnv,
) -> Result<String, RenderError> {
    let mut out = Vec::new();
    let mut registry = EncodingStateRegistry::new();
    render(page, bindings, &mut out, &mut registry, env)?;
    String::from_utf8(out)
        .map_err(|error| RenderError::Io(io::Error::new(io::ErrorKind::InvalidData, error)))
}

fn run(ctx: &mut RenderContext<'_>) -> Result<(), RenderError> {
    let page = ctx.page;
    for declaration in page.declarations() {
        run_script(ctx, declaration)?;
    }
    execute(ctx, page.main())?;
    ctx.stack.flush()?;
    Ok(())
}

/// Executes instructions in order.
///
/// Returns the value of the last instruction when it is a scriptlet, and
/// `null` otherwise.
pub(crate) fn execute(
    ctx: &mut RenderContext<'_>,
    instructions: &[Instruction],
) -> Result<Value, RenderError> {
    let page = ctx.page;
    let mut last = Value::Null;
    for instruction in instructions {
        last = Value::Null;
        match instruction {
            Instruction::PrintHtml(index) => {
                if let Some(part) = page.html_part(*index) {
                    ctx.write_to(Channel::Static, &Value::Str(part.clone()))?;
                }
            }
            Instruction::PrintExpression(expression) => {
                let value = evaluate(ctx, expression)?;
                ctx.write_to(Channel::Expression, &value)?;
            }
            Instruction::PrintScriptlet(expression) => {
                let value = evaluate(ctx, expression)?;
                ctx.write_to(Channel::Out, &value)?;
            }
            Instruction::Scriptlet(script) => last = run_script(ctx, script)?,
            Instruction::InvokeTag(call) => {
                let mut attributes = Attributes::with_capacity(call.attributes.len());
                for (name, expression) in &call.attributes {
                    attributes.insert(name.clone(), evaluate(ctx, expression)?);
                }
                ctx.line = call.line;
                invoke_tag(
                    ctx,
                    TagRequest {
                        namespace: &call.namespace,
                        name: &call.name,
                        attributes,
                        body: page.tag_body(call.body),
                        line: call.line,
                        expression_context: false,
                    },
                )?;
            }
        }
    }
    Ok(last)
}
