//! The core `g` tag library.

use crate::body::TagBody;
use crate::context::RenderContext;
use crate::error::{RenderError, TagError};
use crate::eval::evaluate_with;
use crate::taglib::{Attributes, TagCallable, TagDescriptor, TagLibrary, TagResult};
use crate::value::{Bindings, Value};
use gsp_parser::expr::{parse_expression, Expr};
use gsp_parser::DEFAULT_NAMESPACE;
use smol_str::SmolStr;

/// Name of the core tag library.
pub const LIBRARY_NAME: &str = "CoreTagLib";

/// Builds the core tag library: the conditionals, the loops, `set` and
/// `applyCodec`.
pub fn library() -> TagLibrary {
    TagLibrary::new(DEFAULT_NAMESPACE, LIBRARY_NAME)
        .tag(TagDescriptor::new("if", TagCallable::with_body(if_tag)))
        .tag(TagDescriptor::new("elseif", TagCallable::with_body(elseif_tag)))
        .tag(TagDescriptor::new("else", TagCallable::with_body(else_tag)))
        .tag(TagDescriptor::new("unless", TagCallable::with_body(unless_tag)))
        .tag(TagDescriptor::new("each", TagCallable::with_body(each_tag)))
        .tag(TagDescriptor::new("while", TagCallable::with_body(while_tag)))
        .tag(TagDescriptor::new("collect", TagCallable::with_body(collect_tag)))
        .tag(TagDescriptor::new("findAll", TagCallable::with_body(find_all_tag)))
        .tag(TagDescriptor::new("set", TagCallable::with_body(set_tag)))
        .tag(TagDescriptor::new(
            "applyCodec",
            TagCallable::with_body(apply_codec_tag),
        ))
}

fn required<'a>(attributes: &'a Attributes, tag: &str, name: &str) -> Result<&'a Value, TagError> {
    attributes
        .get(name)
        .ok_or_else(|| TagError::msg(format!("Tag [{tag}] is missing required attribute [{name}]")))
}

fn render_if(condition: bool, body: &TagBody<'_>, ctx: &mut RenderContext<'_>) -> TagResult {
    ctx.set_last_condition(Some(condition));
    if condition {
        let output = body.call(ctx)?;
        ctx.write(output)?;
    }
    Ok(Value::Null)
}

fn if_tag(attributes: &Attributes, body: &TagBody<'_>, ctx: &mut RenderContext<'_>) -> TagResult {
    let condition = required(attributes, "if", "test")?.is_truthy();
    render_if(condition, body, ctx)
}

fn elseif_tag(
    attributes: &Attributes,
    body: &TagBody<'_>,
    ctx: &mut RenderContext<'_>,
) -> TagResult {
    match ctx.last_condition() {
        None => Err(TagError::msg(
            "Tag [elseif] cannot be used without a preceding [if] or [elseif] tag",
        )),
        Some(true) => Ok(Value::Null),
        Some(false) => {
            let condition = required(attributes, "elseif", "test")?.is_truthy();
            render_if(condition, body, ctx)
        }
    }
}

fn else_tag(_: &Attributes, body: &TagBody<'_>, ctx: &mut RenderContext<'_>) -> TagResult {
    let last = ctx.last_condition();
    ctx.set_last_condition(None);
    match last {
        None => Err(TagError::msg(
            "Tag [else] cannot be used without a preceding [if] or [elseif] tag",
        )),
        Some(true) => Ok(Value::Null),
        Some(false) => {
            let output = body.call(ctx)?;
            ctx.write(output)?;
            Ok(Value::Null)
        }
    }
}

fn unless_tag(
    attributes: &Attributes,
    body: &TagBody<'_>,
    ctx: &mut RenderContext<'_>,
) -> TagResult {
    if !required(attributes, "unless", "test")?.is_truthy() {
        let output = body.call(ctx)?;
        ctx.write(output)?;
    }
    Ok(Value::Null)
}

/// Iterates over `in`, binding each item to `var` (default `it`) and the
/// index to `status` when given. Maps yield entries with `key` and `value`.
fn each_tag(attributes: &Attributes, body: &TagBody<'_>, ctx: &mut RenderContext<'_>) -> TagResult {
    let items = items(required(attributes, "each", "in")?);
    let var = attributes
        .get("var")
        .map(|value| SmolStr::new(value.to_text().as_str()))
        .unwrap_or_else(|| SmolStr::new_static("it"));
    let status = attributes
        .get("status")
        .map(|value| SmolStr::new(value.to_text().as_str()));

    for (index, item) in items.into_iter().enumerate() {
        let mut variables = Bindings::new();
        variables.insert(var.clone(), item);
        if let Some(status) = &status {
            variables.insert(status.clone(), Value::from(index));
        }
        let output = body.call_with(ctx, variables)?;
        ctx.write(output)?;
    }
    Ok(Value::Null)
}

fn items(value: &Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::List(items) => items.clone(),
        Value::Map(entries) => entries
            .iter()
            .map(|(key, value)| {
                [
                    (SmolStr::new_static("key"), Value::from(key.as_str())),
                    (SmolStr::new_static("value"), value.clone()),
                ]
                .into_iter()
                .collect::<Value>()
            })
            .collect(),
        other => vec![other.clone()],
    }
}

/// Code held by the `test` or `expr` attribute of a looping tag.
struct Code {
    source: String,
    expr: Expr,
}

impl Code {
    fn from_attribute(attributes: &Attributes, tag: &str, name: &str) -> Result<Self, TagError> {
        let source = required(attributes, tag, name)?.to_text().as_str().to_string();
        let expr = parse_expression(&source).map_err(|error| {
            TagError::msg(format!(
                "Tag [{tag}] has an invalid [{name}] expression: {}",
                error.message
            ))
        })?;
        Ok(Self { source, expr })
    }

    fn eval(
        &self,
        ctx: &mut RenderContext<'_>,
        it: Option<&Value>,
    ) -> Result<Value, RenderError> {
        let mut variables = Bindings::new();
        if let Some(it) = it {
            variables.insert(SmolStr::new_static("it"), it.clone());
        }
        evaluate_with(ctx, &self.expr, &self.source, variables)
    }
}

/// Renders the body for as long as `test` holds. `test` is re-evaluated
/// before every pass.
fn while_tag(
    attributes: &Attributes,
    body: &TagBody<'_>,
    ctx: &mut RenderContext<'_>,
) -> TagResult {
    let test = Code::from_attribute(attributes, "while", "test")?;
    while test.eval(ctx, None)?.is_truthy() {
        let output = body.call(ctx)?;
        ctx.write(output)?;
    }
    Ok(Value::Null)
}

/// Renders the body once per item of `in`, with `it` bound to the value of
/// `expr` for that item.
fn collect_tag(
    attributes: &Attributes,
    body: &TagBody<'_>,
    ctx: &mut RenderContext<'_>,
) -> TagResult {
    let items = items(required(attributes, "collect", "in")?);
    let expr = Code::from_attribute(attributes, "collect", "expr")?;
    for item in items {
        let collected = expr.eval(ctx, Some(&item))?;
        let output = body.call_with_it(ctx, collected)?;
        ctx.write(output)?;
    }
    Ok(Value::Null)
}

/// Renders the body for the items of `in` for which `expr` holds, with `it`
/// bound to the item.
fn find_all_tag(
    attributes: &Attributes,
    body: &TagBody<'_>,
    ctx: &mut RenderContext<'_>,
) -> TagResult {
    let items = items(required(attributes, "findAll", "in")?);
    let expr = Code::from_attribute(attributes, "findAll", "expr")?;
    for item in items {
        if expr.eval(ctx, Some(&item))?.is_truthy() {
            let output = body.call_with_it(ctx, item)?;
            ctx.write(output)?;
        }
    }
    Ok(Value::Null)
}

/// Sets a page variable from `value`, or from the rendered body when
/// `value` is absent.
fn set_tag(attributes: &Attributes, body: &TagBody<'_>, ctx: &mut RenderContext<'_>) -> TagResult {
    let var = required(attributes, "set", "var")?.to_text();
    let value = match attributes.get("value") {
        Some(value) => value.clone(),
        None => body.call(ctx)?,
    };
    ctx.set_page_variable(&var, value);
    Ok(Value::Null)
}

/// Renders the body. The codecs named by the attributes are applied by the
/// tag runtime before the body runs.
fn apply_codec_tag(_: &Attributes, body: &TagBody<'_>, ctx: &mut RenderContext<'_>) -> TagResult {
    let output = body.call(ctx)?;
    ctx.write(output)?;
    Ok(Value::Null)
}
