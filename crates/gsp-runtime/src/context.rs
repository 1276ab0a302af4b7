//! State of a single render.

use crate::body::TagBody;
use crate::codec::CodecRegistry;
use crate::encoding_state::{encode_value, EncodingStateRegistry};
use crate::error::RenderError;
use crate::invoke::{invoke_tag, TagRequest};
use crate::page::ExecutablePage;
use crate::stack::{Channel, FrameStats, OutputEncodingStack};
use crate::taglib::{Attributes, TagLibraryLookup};
use crate::value::{Bindings, Value};
use smol_str::SmolStr;
use std::sync::Arc;

/// A variable scope.
#[derive(Debug, Default)]
pub(crate) struct Scope {
    pub(crate) variables: Bindings,
    /// Outcome of the last `if`/`elseif` in this scope, until consumed.
    pub(crate) last_condition: Option<bool>,
}

/// Everything a render needs: the page, its output stack and variables.
///
/// Tags receive the context to write output, read and set variables, and
/// call other tags.
pub struct RenderContext<'r> {
    pub(crate) page: &'r ExecutablePage,
    pub(crate) lookup: Arc<TagLibraryLookup>,
    pub(crate) codecs: &'r CodecRegistry,
    pub(crate) registry: &'r mut EncodingStateRegistry,
    pub(crate) stack: OutputEncodingStack<'r>,
    pub(crate) scopes: Vec<Scope>,
    /// Line of the instruction being executed.
    pub(crate) line: u32,
}

impl<'r> RenderContext<'r> {
    pub(crate) fn new(
        page: &'r ExecutablePage,
        lookup: Arc<TagLibraryLookup>,
        codecs: &'r CodecRegistry,
        registry: &'r mut EncodingStateRegistry,
        stack: OutputEncodingStack<'r>,
        bindings: Bindings,
    ) -> Self {
        Self {
            page,
            lookup,
            codecs,
            registry,
            stack,
            scopes: vec![Scope {
                variables: bindings,
                last_condition: None,
            }],
            line: 0,
        }
    }

    /// The page being rendered.
    pub fn page(&self) -> &ExecutablePage {
        self.page
    }

    /// The tag libraries visible to this render.
    pub fn tag_libraries(&self) -> &TagLibraryLookup {
        &self.lookup
    }

    /// Writes a value through the tag output channel.
    pub fn write(&mut self, value: impl Into<Value>) -> Result<(), RenderError> {
        self.write_to(Channel::Taglib, &value.into())
    }

    /// Writes a value through a specific channel.
    pub fn write_to(&mut self, channel: Channel, value: &Value) -> Result<(), RenderError> {
        self.stack.write(channel, value, self.registry)
    }

    /// Encodes a value with a named codec.
    pub fn encode_as(&mut self, codec: &str, value: &Value) -> Result<Value, RenderError> {
        match self.codecs.lookup(codec)? {
            Some(encoder) => Ok(encode_value(encoder.as_ref(), value, self.registry)?),
            None => Ok(value.clone()),
        }
    }

    /// Looks a variable up, innermost scope first.
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.variables.get(name))
    }

    /// Assigns a variable where it is defined, or in the innermost scope.
    pub fn assign_variable(&mut self, name: &str, value: Value) {
        let scope = self
            .scopes
            .iter()
            .rposition(|scope| scope.variables.contains_key(name))
            .unwrap_or(self.scopes.len() - 1);
        self.scopes[scope].variables.insert(SmolStr::new(name), value);
    }

    /// Sets a variable in the page scope.
    pub fn set_page_variable(&mut self, name: &str, value: Value) {
        self.scopes[0].variables.insert(SmolStr::new(name), value);
    }

    /// Outcome of the last `if`/`elseif` in the current scope.
    pub fn last_condition(&self) -> Option<bool> {
        self.current_scope().last_condition
    }

    /// Records the outcome of a conditional tag in the current scope.
    pub fn set_last_condition(&mut self, outcome: Option<bool>) {
        self.current_scope_mut().last_condition = outcome;
    }

    /// Calls a tag in expression context, returning its result.
    pub fn call_tag(
        &mut self,
        namespace: &str,
        name: &str,
        attributes: Attributes,
        body: TagBody<'_>,
    ) -> Result<Value, RenderError> {
        let line = self.line;
        invoke_tag(
            self,
            TagRequest {
                namespace,
                name,
                attributes,
                body,
                line,
                expression_context: true,
            },
        )
    }

    /// Number of output frames, including the bottom frame.
    pub fn frame_depth(&self) -> usize {
        self.stack.depth()
    }

    /// Push and pop counts of the output stack.
    pub fn frame_stats(&self) -> FrameStats {
        self.stack.stats()
    }

    pub(crate) fn push_scope(&mut self, variables: Bindings) {
        self.scopes.push(Scope {
            variables,
            last_condition: None,
        });
    }

    pub(crate) fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    fn current_scope(&self) -> &Scope {
        // The page scope is never popped.
        &self.scopes[self.scopes.len() - 1]
    }

    fn current_scope_mut(&mut self) -> &mut Scope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }
}
