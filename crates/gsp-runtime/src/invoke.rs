//! Tag invocation.

use crate::body::TagBody;
use crate::context::RenderContext;
use crate::encoding_state::{encode_value, mark_raw};
use crate::error::{RenderError, TagError, TagExecutionError};
use crate::stack::{Channel, CodecSettings};
use crate::taglib::{Attributes, ResolvedTag, TagCallable};
use crate::value::Value;
use smol_str::SmolStr;

/// Name of the tag whose attributes set codecs for its body.
const APPLY_CODEC: &str = "applyCodec";

/// A request to run a tag.
pub(crate) struct TagRequest<'a, 'p> {
    pub(crate) namespace: &'a str,
    pub(crate) name: &'a str,
    pub(crate) attributes: Attributes,
    pub(crate) body: TagBody<'p>,
    pub(crate) line: u32,
    /// Whether the caller wants the tag's output returned instead of written.
    pub(crate) expression_context: bool,
}

/// Runs a tag.
///
/// In statement context output is written to the current frame and `null`
/// is returned. In expression context the output is captured and returned,
/// encoded with the frame's taglib codec.
///
/// Every invocation pushes one frame: capturing in expression context,
/// inheriting otherwise. It is popped again before returning, whether the
/// tag succeeds or fails.
pub(crate) fn invoke_tag(
    ctx: &mut RenderContext<'_>,
    request: TagRequest<'_, '_>,
) -> Result<Value, RenderError> {
    let Some(tag) = ctx.lookup.lookup(request.namespace, request.name).cloned() else {
        return Err(RenderError::TagNotFound {
            namespace: SmolStr::new(request.namespace),
            name: SmolStr::new(request.name),
            page: ctx.page.name().to_string(),
            line: request.line,
        });
    };
    log::trace!(
        target: "gsp.runtime",
        "invoking {}:{} at line {}",
        request.namespace,
        request.name,
        request.line
    );

    let requested = if request.name == APPLY_CODEC
        && request.namespace == ctx.page.default_namespace()
    {
        CodecSettings::from_attributes(&request.attributes)
    } else {
        request
            .attributes
            .get("encodeAs")
            .map(CodecSettings::from_value)
            .unwrap_or_default()
    };
    let settings = requested.merged_over(&tag.codecs);

    let encoders = ctx.stack.encoders().with_settings(&settings, ctx.codecs)?;
    let taglib_encoder = encoders.for_channel(Channel::Taglib).cloned();
    ctx.stack.push(request.expression_context, encoders);

    let outcome = run_tag(ctx, &tag, &request);
    let captured = ctx.stack.pop();
    let value = outcome?;

    if !request.expression_context {
        return Ok(Value::Null);
    }
    if tag.returns_value() && !value.is_null() && !matches!(value, Value::Buffer(_)) {
        return match taglib_encoder {
            Some(encoder) => Ok(encode_value(encoder.as_ref(), &value, ctx.registry)?),
            None => Ok(value),
        };
    }
    let output = Value::Buffer(captured.unwrap_or_default());
    match taglib_encoder {
        Some(encoder) => Ok(encode_value(encoder.as_ref(), &output, ctx.registry)?),
        // Tag output is markup; it is not encoded again by the caller.
        None => Ok(mark_raw(&output, ctx.registry)),
    }
}

fn run_tag(
    ctx: &mut RenderContext<'_>,
    tag: &ResolvedTag,
    request: &TagRequest<'_, '_>,
) -> Result<Value, RenderError> {
    let callable = tag.descriptor.callable();
    let result = match callable {
        TagCallable::NoArgs(f) => f(ctx),
        TagCallable::Attrs(f) => f(&request.attributes, ctx),
        TagCallable::AttrsAndBody(f) => f(&request.attributes, &request.body, ctx),
    };
    let value = result.map_err(|error| match error {
        TagError::Render(error) => *error,
        TagError::Failed(source) => RenderError::TagExecution(TagExecutionError {
            namespace: SmolStr::new(request.namespace),
            tag: SmolStr::new(request.name),
            library: tag.library.clone(),
            page: ctx.page.name().to_string(),
            line: request.line,
            source,
        }),
    })?;

    let value = if request.expression_context {
        value
    } else {
        output_result(ctx, tag, value)?;
        Value::Null
    };

    if callable.arity() < 2 && !request.body.is_empty() {
        let body = request.body.call(ctx)?;
        ctx.write_to(Channel::Static, &body)?;
    }
    Ok(value)
}

/// Writes the result of a value-returning tag in statement context.
fn output_result(
    ctx: &mut RenderContext<'_>,
    tag: &ResolvedTag,
    value: Value,
) -> Result<(), RenderError> {
    if !tag.returns_value() || value.is_null() || matches!(value, Value::Buffer(_)) {
        return Ok(());
    }
    let channel = match &value {
        Value::Str(text) if ctx.page.is_html_part(text) => Channel::Static,
        _ => Channel::Taglib,
    };
    ctx.write_to(channel, &value)
}
