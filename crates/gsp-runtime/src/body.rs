//! Tag bodies.

use crate::codec::RawEncoder;
use crate::context::RenderContext;
use crate::error::RenderError;
use crate::page::Instruction;
use crate::render::execute;
use crate::value::{Bindings, Text, Value};
use smol_str::SmolStr;

#[derive(Clone, Copy)]
enum BodyKind<'p> {
    Empty,
    Constant(&'p Text),
    Operations(&'p [Instruction]),
}

/// The body passed to a tag.
///
/// Calling a body renders it into a capturing frame and returns the
/// captured output.
#[derive(Clone, Copy)]
pub struct TagBody<'p> {
    kind: BodyKind<'p>,
}

impl<'p> TagBody<'p> {
    /// A body that renders nothing.
    pub fn empty() -> Self {
        Self {
            kind: BodyKind::Empty,
        }
    }

    pub(crate) fn constant(text: &'p Text) -> Self {
        Self {
            kind: BodyKind::Constant(text),
        }
    }

    pub(crate) fn operations(operations: &'p [Instruction]) -> Self {
        Self {
            kind: BodyKind::Operations(operations),
        }
    }

    /// Returns `true` for the empty body.
    pub fn is_empty(&self) -> bool {
        matches!(self.kind, BodyKind::Empty)
    }

    /// Renders the body.
    pub fn call(&self, ctx: &mut RenderContext<'_>) -> Result<Value, RenderError> {
        self.call_with(ctx, Bindings::new())
    }

    /// Renders the body with `it` bound to `value`.
    pub fn call_with_it(
        &self,
        ctx: &mut RenderContext<'_>,
        value: Value,
    ) -> Result<Value, RenderError> {
        let mut variables = Bindings::new();
        variables.insert(SmolStr::new_static("it"), value);
        self.call_with(ctx, variables)
    }

    /// Renders the body with extra variables in scope.
    ///
    /// Returns the captured output, or the body's own result when nothing
    /// was written. A constant body returns its HTML part, marked as safe.
    pub fn call_with(
        &self,
        ctx: &mut RenderContext<'_>,
        variables: Bindings,
    ) -> Result<Value, RenderError> {
        match self.kind {
            BodyKind::Empty => Ok(Value::Null),
            BodyKind::Constant(text) => {
                ctx.registry.mark(text, &RawEncoder);
                Ok(Value::Str(text.clone()))
            }
            BodyKind::Operations(operations) => {
                let encoders = ctx.stack.encoders().clone();
                ctx.stack.push(true, encoders);
                ctx.push_scope(variables);
                let result = execute(ctx, operations);
                ctx.pop_scope();
                let used = ctx.stack.is_used();
                let captured = ctx.stack.pop().unwrap_or_default();
                match result? {
                    Value::Null | Value::Buffer(_) => Ok(Value::Buffer(captured)),
                    _ if used => Ok(Value::Buffer(captured)),
                    value => Ok(value),
                }
            }
        }
    }
}

impl std::fmt::Debug for TagBody<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            BodyKind::Empty => f.write_str("TagBody::Empty"),
            BodyKind::Constant(text) => write!(f, "TagBody::Constant({text:?})"),
            BodyKind::Operations(operations) => {
                write!(f, "TagBody::Operations({} instructions)", operations.len())
            }
        }
    }
}
