//! Expression evaluation.

use crate::body::TagBody;
use crate::context::RenderContext;
use crate::encoding_state::mark_raw;
use crate::error::{EncodingError, RenderError};
use crate::taglib::Attributes;
use crate::value::{Bindings, Value};
use gsp_parser::expr::{BinaryOp, Call, Expr, Statement, TemplatePart, UnaryOp};
use gsp_parser::{Expression, Script};
use indexmap::IndexMap;
use smol_str::SmolStr;
use std::cmp::Ordering;

/// Why an evaluation stopped.
enum Fault {
    Message(String),
    Render(RenderError),
}

impl From<RenderError> for Fault {
    fn from(error: RenderError) -> Self {
        Fault::Render(error)
    }
}

impl From<EncodingError> for Fault {
    fn from(error: EncodingError) -> Self {
        Fault::Render(RenderError::Encoding(error))
    }
}

impl Fault {
    fn into_render_error(self, page: &str, source: &str, line: u32) -> RenderError {
        match self {
            Fault::Render(error) => error,
            Fault::Message(message) => RenderError::Evaluation {
                page: page.to_string(),
                line,
                expression: source.to_string(),
                message,
            },
        }
    }
}

/// Longest string a repetition may produce, in bytes.
const MAX_STRING_LEN: usize = i32::MAX as usize;

fn fail<T>(message: impl Into<String>) -> Result<T, Fault> {
    Err(Fault::Message(message.into()))
}

/// Evaluates an expression.
pub(crate) fn evaluate(
    ctx: &mut RenderContext<'_>,
    expression: &Expression,
) -> Result<Value, RenderError> {
    ctx.line = expression.line;
    eval(ctx, &expression.ast).map_err(|fault| {
        fault.into_render_error(ctx.page.name(), &expression.source, expression.line)
    })
}

/// Evaluates parsed code with extra variables in scope.
pub(crate) fn evaluate_with(
    ctx: &mut RenderContext<'_>,
    expr: &Expr,
    source: &str,
    variables: Bindings,
) -> Result<Value, RenderError> {
    ctx.push_scope(variables);
    let result = eval(ctx, expr);
    ctx.pop_scope();
    result.map_err(|fault| fault.into_render_error(ctx.page.name(), source, ctx.line))
}

/// Runs the statements of a scriptlet or declaration and returns the value
/// of the last one. An assignment yields the assigned value.
pub(crate) fn run_script(
    ctx: &mut RenderContext<'_>,
    script: &Script,
) -> Result<Value, RenderError> {
    ctx.line = script.line;
    let mut last = Value::Null;
    for statement in &script.statements {
        let outcome = match statement {
            Statement::Assign { name, value } => eval(ctx, value).map(|value| {
                ctx.assign_variable(name, value.clone());
                value
            }),
            Statement::Expr(expr) => eval(ctx, expr),
        };
        last = outcome.map_err(|fault| {
            fault.into_render_error(ctx.page.name(), &script.source, script.line)
        })?;
    }
    Ok(last)
}

fn eval(ctx: &mut RenderContext<'_>, expr: &Expr) -> Result<Value, Fault> {
    match expr {
        Expr::Null => Ok(Value::Null),
        Expr::Bool(value) => Ok(Value::Bool(*value)),
        Expr::Int(value) => Ok(Value::Int(*value)),
        Expr::Float(value) => Ok(Value::Float(*value)),
        Expr::Str(text) => Ok(Value::from(text.as_str())),
        Expr::Template(parts) => {
            let mut out = String::new();
            for part in parts {
                match part {
                    TemplatePart::Text(text) => out.push_str(text),
                    TemplatePart::Expr(expr) => out.push_str(&eval(ctx, expr)?.to_text()),
                }
            }
            Ok(Value::from(out))
        }
        Expr::Ident(name) => Ok(ctx.variable(name).cloned().unwrap_or_default()),
        Expr::List(items) => items
            .iter()
            .map(|item| eval(ctx, item))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        Expr::Map(entries) => entries
            .iter()
            .map(|(key, value)| Ok((key.clone(), eval(ctx, value)?)))
            .collect::<Result<IndexMap<_, _>, Fault>>()
            .map(Value::Map),
        Expr::Property { target, name, safe } => {
            let target = eval(ctx, target)?;
            property(&target, name, *safe)
        }
        Expr::Index { target, index } => {
            let target = eval(ctx, target)?;
            let index = eval(ctx, index)?;
            index_value(&target, &index)
        }
        Expr::Call(call) => eval_call(ctx, call),
        Expr::Unary { op, operand } => {
            let operand = eval(ctx, operand)?;
            match (op, operand) {
                (UnaryOp::Not, operand) => Ok(Value::Bool(!operand.is_truthy())),
                (UnaryOp::Neg, Value::Int(value)) => value
                    .checked_neg()
                    .map(Value::Int)
                    .map_or_else(|| fail("Integer overflow"), Ok),
                (UnaryOp::Neg, Value::Float(value)) => Ok(Value::Float(-value)),
                (UnaryOp::Neg, other) => fail(format!("Cannot negate {}", other.type_name())),
            }
        }
        Expr::Binary { op, lhs, rhs } => binary(ctx, *op, lhs, rhs),
        Expr::Elvis { value, fallback } => {
            let value = eval(ctx, value)?;
            if value.is_truthy() {
                Ok(value)
            } else {
                eval(ctx, fallback)
            }
        }
        Expr::Conditional {
            test,
            then,
            otherwise,
        } => {
            if eval(ctx, test)?.is_truthy() {
                eval(ctx, then)
            } else {
                eval(ctx, otherwise)
            }
        }
    }
}

fn property(target: &Value, name: &str, safe: bool) -> Result<Value, Fault> {
    match target {
        Value::Null if safe => Ok(Value::Null),
        Value::Null => fail(format!("Cannot get property '{name}' on null object")),
        Value::Map(entries) => Ok(entries.get(name).cloned().unwrap_or_default()),
        Value::List(items) => items
            .iter()
            .map(|item| property(item, name, true))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        Value::Object(object) => object
            .property(name)
            .map_or_else(|| no_such_property(target, name), Ok),
        Value::Str(_) | Value::Buffer(_) if name == "empty" => {
            Ok(Value::Bool(!target.is_truthy()))
        }
        _ => no_such_property(target, name),
    }
}

fn no_such_property(target: &Value, name: &str) -> Result<Value, Fault> {
    fail(format!(
        "No such property: {name} for class: {}",
        target.type_name()
    ))
}

fn index_value(target: &Value, index: &Value) -> Result<Value, Fault> {
    match (target, index) {
        (Value::Null, _) => fail("Cannot invoke method getAt() on null object"),
        (Value::List(items), Value::Int(index)) => {
            Ok(list_index(items.len(), *index)
                .and_then(|index| items.get(index))
                .cloned()
                .unwrap_or_default())
        }
        (Value::Map(entries), key) => Ok(entries
            .get(key.to_text().as_str())
            .cloned()
            .unwrap_or_default()),
        (Value::Str(text), Value::Int(index)) => {
            let chars: Vec<char> = text.chars().collect();
            match list_index(chars.len(), *index).and_then(|index| chars.get(index)) {
                Some(ch) => Ok(Value::from(ch.to_string())),
                None => fail(format!("String index out of range: {index}")),
            }
        }
        _ => fail(format!(
            "Cannot index {} with {}",
            target.type_name(),
            index.type_name()
        )),
    }
}

fn list_index(len: usize, index: i64) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let index = if index < 0 { len + index } else { index };
    usize::try_from(index).ok()
}

fn eval_call(ctx: &mut RenderContext<'_>, call: &Call) -> Result<Value, Fault> {
    let Some(target) = &call.target else {
        return call_function(ctx, call);
    };
    if let Expr::Ident(namespace) = target {
        if ctx.variable(namespace).is_none() && ctx.lookup.has_namespace(namespace) {
            return call_tag(ctx, namespace, call);
        }
    }
    let receiver = eval(ctx, target)?;
    let mut args = Vec::with_capacity(call.args.len() + 1);
    if !call.named.is_empty() {
        args.push(Value::Map(named_arguments(ctx, &call.named)?));
    }
    for arg in &call.args {
        args.push(eval(ctx, arg)?);
    }
    if receiver.is_null() {
        if call.safe {
            return Ok(Value::Null);
        }
        return fail(format!("Cannot invoke method {}() on null object", call.name));
    }
    call_method(ctx, &receiver, &call.name, &args)
}

fn named_arguments(
    ctx: &mut RenderContext<'_>,
    named: &[(SmolStr, Expr)],
) -> Result<IndexMap<SmolStr, Value>, Fault> {
    named
        .iter()
        .map(|(name, value)| Ok((name.clone(), eval(ctx, value)?)))
        .collect()
}

fn call_function(ctx: &mut RenderContext<'_>, call: &Call) -> Result<Value, Fault> {
    if call.name == "raw" && call.named.is_empty() {
        let [arg] = call.args.as_slice() else {
            return fail("raw() takes exactly one argument");
        };
        let value = eval(ctx, arg)?;
        return Ok(mark_raw(&value, ctx.registry));
    }
    let namespace = SmolStr::new(ctx.page.default_namespace());
    if ctx.lookup.lookup(&namespace, &call.name).is_some() {
        return call_tag(ctx, &namespace, call);
    }
    fail(format!("No signature of method: {}() is applicable", call.name))
}

/// Calls a tag from an expression: `g.link(action: 'list')` or `link(...)`.
///
/// Named arguments and map arguments become attributes; a string argument
/// becomes the body.
fn call_tag(ctx: &mut RenderContext<'_>, namespace: &str, call: &Call) -> Result<Value, Fault> {
    let mut attributes: Attributes = named_arguments(ctx, &call.named)?;
    let mut body_text = None;
    for arg in &call.args {
        match eval(ctx, arg)? {
            Value::Map(entries) => attributes.extend(entries),
            Value::Null => {}
            other => body_text = Some(other.to_text()),
        }
    }
    let body = body_text.as_ref().map_or_else(TagBody::empty, TagBody::constant);
    Ok(ctx.call_tag(namespace, &call.name, attributes, body)?)
}

fn call_method(
    ctx: &mut RenderContext<'_>,
    receiver: &Value,
    name: &str,
    args: &[Value],
) -> Result<Value, Fault> {
    if let (Some(codec), []) = (name.strip_prefix("encodeAs"), args) {
        return Ok(ctx.encode_as(codec, receiver)?);
    }
    let result = match (name, receiver, args) {
        ("toString", value, []) => Value::Str(value.to_text()),
        ("size" | "length", Value::Str(text), []) => Value::from(text.chars().count()),
        ("size", Value::List(items), []) => Value::from(items.len()),
        ("size", Value::Map(entries), []) => Value::from(entries.len()),
        ("isEmpty", Value::Str(_) | Value::List(_) | Value::Map(_) | Value::Buffer(_), []) => {
            Value::Bool(!receiver.is_truthy())
        }
        ("toUpperCase", Value::Str(text), []) => Value::from(text.to_uppercase()),
        ("toLowerCase", Value::Str(text), []) => Value::from(text.to_lowercase()),
        ("trim", Value::Str(text), []) => Value::from(text.trim()),
        ("contains", Value::Str(text), [needle]) => {
            Value::Bool(text.contains(needle.to_text().as_str()))
        }
        ("contains", Value::List(items), [needle]) => {
            Value::Bool(items.iter().any(|item| item.loose_eq(needle)))
        }
        ("startsWith", Value::Str(text), [prefix]) => {
            Value::Bool(text.starts_with(prefix.to_text().as_str()))
        }
        ("endsWith", Value::Str(text), [suffix]) => {
            Value::Bool(text.ends_with(suffix.to_text().as_str()))
        }
        ("replace", Value::Str(text), [from, to]) => {
            Value::from(text.replace(from.to_text().as_str(), to.to_text().as_str()))
        }
        ("join", Value::List(items), []) => join(items, ""),
        ("join", Value::List(items), [separator]) => join(items, &separator.to_text()),
        ("get", Value::Map(entries), [key]) => entries
            .get(key.to_text().as_str())
            .cloned()
            .unwrap_or_default(),
        ("containsKey", Value::Map(entries), [key]) => {
            Value::Bool(entries.contains_key(key.to_text().as_str()))
        }
        ("first", Value::List(items), []) => items.first().cloned().unwrap_or_default(),
        ("last", Value::List(items), []) => items.last().cloned().unwrap_or_default(),
        _ => {
            return fail(format!(
                "No signature of method: {}.{name}() is applicable for {} argument(s)",
                receiver.type_name(),
                args.len()
            ))
        }
    };
    Ok(result)
}

fn join(items: &[Value], separator: &str) -> Value {
    let joined = items
        .iter()
        .map(|item| item.to_text().to_string())
        .collect::<Vec<_>>()
        .join(separator);
    Value::from(joined)
}

fn binary(
    ctx: &mut RenderContext<'_>,
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
) -> Result<Value, Fault> {
    match op {
        BinaryOp::And => {
            let result = eval(ctx, lhs)?.is_truthy() && eval(ctx, rhs)?.is_truthy();
            return Ok(Value::Bool(result));
        }
        BinaryOp::Or => {
            let result = eval(ctx, lhs)?.is_truthy() || eval(ctx, rhs)?.is_truthy();
            return Ok(Value::Bool(result));
        }
        _ => {}
    }
    let lhs = eval(ctx, lhs)?;
    let rhs = eval(ctx, rhs)?;
    match op {
        BinaryOp::Eq => Ok(Value::Bool(lhs.loose_eq(&rhs))),
        BinaryOp::NotEq => Ok(Value::Bool(!lhs.loose_eq(&rhs))),
        BinaryOp::Lt => compare(&lhs, &rhs).map(|order| Value::Bool(order.is_lt())),
        BinaryOp::Le => compare(&lhs, &rhs).map(|order| Value::Bool(order.is_le())),
        BinaryOp::Gt => compare(&lhs, &rhs).map(|order| Value::Bool(order.is_gt())),
        BinaryOp::Ge => compare(&lhs, &rhs).map(|order| Value::Bool(order.is_ge())),
        BinaryOp::In => contains(&rhs, &lhs).map(Value::Bool),
        BinaryOp::Add => add(lhs, rhs),
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => arithmetic(op, &lhs, &rhs),
        BinaryOp::And | BinaryOp::Or => Ok(Value::Null),
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Int(value) => Some(*value as f64),
        Value::Float(value) => Some(*value),
        _ => None,
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Result<Ordering, Fault> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Ok(a.as_str().cmp(b.as_str())),
        _ => match (as_f64(lhs), as_f64(rhs)) {
            (Some(a), Some(b)) => a
                .partial_cmp(&b)
                .map_or_else(|| fail("Cannot compare NaN"), Ok),
            _ => fail(format!(
                "Cannot compare {} with {}",
                lhs.type_name(),
                rhs.type_name()
            )),
        },
    }
}

fn contains(collection: &Value, item: &Value) -> Result<bool, Fault> {
    match collection {
        Value::Null => Ok(false),
        Value::List(items) => Ok(items.iter().any(|candidate| candidate.loose_eq(item))),
        Value::Map(entries) => Ok(entries.contains_key(item.to_text().as_str())),
        Value::Str(_) | Value::Buffer(_) => {
            Ok(collection.to_text().contains(item.to_text().as_str()))
        }
        other => fail(format!("Cannot test membership in {}", other.type_name())),
    }
}

fn add(lhs: Value, rhs: Value) -> Result<Value, Fault> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => a
            .checked_add(b)
            .map(Value::Int)
            .map_or_else(|| fail("Integer overflow"), Ok),
        (lhs @ (Value::Str(_) | Value::Buffer(_)), rhs) => {
            Ok(Value::from(format!("{}{}", lhs.to_text(), rhs.to_text())))
        }
        (Value::List(mut items), Value::List(more)) => {
            items.extend(more);
            Ok(Value::List(items))
        }
        (Value::List(mut items), item) => {
            items.push(item);
            Ok(Value::List(items))
        }
        (Value::Map(mut entries), Value::Map(more)) => {
            entries.extend(more);
            Ok(Value::Map(entries))
        }
        (lhs, rhs) => match (as_f64(&lhs), as_f64(&rhs)) {
            (Some(a), Some(b)) => Ok(Value::Float(a + b)),
            _ => fail(format!(
                "Cannot add {} and {}",
                lhs.type_name(),
                rhs.type_name()
            )),
        },
    }
}

fn arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, Fault> {
    if let (BinaryOp::Mul, Value::Str(text), Value::Int(count)) = (op, lhs, rhs) {
        let count = usize::try_from(*count).unwrap_or(0);
        match text.len().checked_mul(count) {
            Some(len) if len <= MAX_STRING_LEN => {}
            _ => return fail("Integer overflow"),
        }
        return Ok(Value::from(text.repeat(count)));
    }
    if let (Value::Int(a), Value::Int(b)) = (lhs, rhs) {
        let (a, b) = (*a, *b);
        let result = match op {
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Div if b == 0 => return fail("Division by zero"),
            BinaryOp::Div if a.checked_rem(b).is_some_and(|rem| rem != 0) => {
                return Ok(Value::Float(a as f64 / b as f64))
            }
            BinaryOp::Div => a.checked_div(b),
            BinaryOp::Rem if b == 0 => return fail("Division by zero"),
            BinaryOp::Rem => a.checked_rem(b),
            _ => None,
        };
        return result
            .map(Value::Int)
            .map_or_else(|| fail("Integer overflow"), Ok);
    }
    let (Some(a), Some(b)) = (as_f64(lhs), as_f64(rhs)) else {
        return fail(format!(
            "Cannot apply '{}' to {} and {}",
            op.as_str(),
            lhs.type_name(),
            rhs.type_name()
        ));
    };
    match op {
        BinaryOp::Div | BinaryOp::Rem if b == 0.0 => fail("Division by zero"),
        BinaryOp::Sub => Ok(Value::Float(a - b)),
        BinaryOp::Mul => Ok(Value::Float(a * b)),
        BinaryOp::Div => Ok(Value::Float(a / b)),
        _ => Ok(Value::Float(a % b)),
    }
}

#[cfg(test)]
mod tests {
    use crate::page::compile_source;
    use crate::render::{render_to_string, RenderEnv};
    use crate::value::{Bindings, Value};
    use gsp_parser::ParseOptions;
    use smol_str::SmolStr;

    fn eval_str(source: &str) -> String {
        let user: Value = [
            (SmolStr::new("name"), Value::from("Ada")),
            (SmolStr::new("roles"), Value::from(vec!["admin", "dev"])),
        ]
        .into_iter()
        .collect();
        let mut bindings = Bindings::new();
        bindings.insert(SmolStr::new("user"), user);
        bindings.insert(SmolStr::new("count"), Value::Int(7));
        let template = format!("<%@ page defaultCodec='none' %>${{{source}}}");
        let page = compile_source("eval.gsp", &template, &ParseOptions::default()).unwrap();
        render_to_string(&page, bindings, &RenderEnv::default()).unwrap()
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval_str("1 + 2 * 3"), "7");
        assert_eq!(eval_str("count / 2"), "3.5");
        assert_eq!(eval_str("count / 7"), "1");
        assert_eq!(eval_str("count % 4"), "3");
        assert_eq!(eval_str("-count + 0.5"), "-6.5");
        assert_eq!(eval_str("'ab' * 2"), "abab");
        assert_eq!(eval_str("'ab' * -1"), "");
    }

    #[test]
    fn test_strings_and_templates() {
        assert_eq!(eval_str("'Hi ' + user.name"), "Hi Ada");
        assert_eq!(eval_str("\"${user.name} has ${count}\""), "Ada has 7");
        assert_eq!(eval_str("user.name.toUpperCase()"), "ADA");
        assert_eq!(eval_str("user.name.size()"), "3");
    }

    #[test]
    fn test_collections() {
        assert_eq!(eval_str("user.roles[0]"), "admin");
        assert_eq!(eval_str("user.roles[-1]"), "dev");
        assert_eq!(eval_str("user.roles[5]"), "");
        assert_eq!(eval_str("user.roles.join(', ')"), "admin, dev");
        assert_eq!(eval_str("'dev' in user.roles"), "true");
        assert_eq!(eval_str("[a: 1, b: 2].b"), "2");
        assert_eq!(eval_str("[1, 2] + 3"), "[1, 2, 3]");
    }

    #[test]
    fn test_logic() {
        assert_eq!(eval_str("count > 5 && user.name == 'Ada'"), "true");
        assert_eq!(eval_str("missing ?: 'fallback'"), "fallback");
        assert_eq!(eval_str("count < 5 ? 'small' : 'big'"), "big");
        assert_eq!(eval_str("missing?.name"), "");
        assert_eq!(eval_str("!user.roles"), "false");
    }

    #[test]
    fn test_errors() {
        let page = compile_source("err.gsp", "${1 / 0}", &ParseOptions::default()).unwrap();
        let error = render_to_string(&page, Bindings::new(), &RenderEnv::default()).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Error evaluating expression [1 / 0] on line [1] of [err.gsp]: Division by zero"
        );

        let page = compile_source(
            "err.gsp",
            "${'ab' * 9223372036854775807}",
            &ParseOptions::default(),
        )
        .unwrap();
        let error = render_to_string(&page, Bindings::new(), &RenderEnv::default()).unwrap_err();
        assert!(error.to_string().ends_with("Integer overflow"));

        let page = compile_source("err.gsp", "${count.foo()}", &ParseOptions::default()).unwrap();
        let mut bindings = Bindings::new();
        bindings.insert(SmolStr::new("count"), Value::Int(1));
        let error = render_to_string(&page, bindings, &RenderEnv::default()).unwrap_err();
        assert!(error
            .to_string()
            .ends_with("No signature of method: Integer.foo() is applicable for 0 argument(s)"));
    }
}
