//! Tracks which encoders have been applied to which texts.
//!
//! Entries are keyed by the identity of a [`Text`], never by content: two
//! equal strings from different sources may need different treatment.

use crate::codec::{Encoder, RawEncoder};
use crate::error::EncodingError;
use crate::value::{Text, Value};
use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use std::borrow::Cow;

/// An encoder recorded in an [`EncodingState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedEncoder {
    /// Name of the encoder.
    pub name: SmolStr,
    /// Whether the encoder is safe.
    pub safe: bool,
}

impl AppliedEncoder {
    fn of(encoder: &dyn Encoder) -> Self {
        Self {
            name: SmolStr::new(encoder.name()),
            safe: encoder.is_safe(),
        }
    }
}

/// The encoders already applied to a value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodingState {
    applied: Vec<AppliedEncoder>,
}

impl EncodingState {
    /// The state of a value encoded once with `encoder`.
    pub fn encoded_with(encoder: &dyn Encoder) -> Self {
        Self {
            applied: vec![AppliedEncoder::of(encoder)],
        }
    }

    /// Returns the applied encoders, oldest first.
    pub fn applied(&self) -> &[AppliedEncoder] {
        &self.applied
    }

    /// Returns `true` if `encoder` has to be applied on top of this state.
    pub fn should_encode_with(&self, encoder: &dyn Encoder) -> bool {
        self.applied.iter().all(|previous| {
            if previous.name.eq_ignore_ascii_case(encoder.name()) {
                return false;
            }
            !(previous.safe && encoder.is_safe() && !encoder.apply_to_safely_encoded())
        })
    }

    fn push(&mut self, encoder: &dyn Encoder) {
        if !self
            .applied
            .iter()
            .any(|previous| previous.name.eq_ignore_ascii_case(encoder.name()))
        {
            self.applied.push(AppliedEncoder::of(encoder));
        }
    }
}

struct Entry {
    // Keeps the allocation alive so its address is not reused while tracked.
    _text: Text,
    state: EncodingState,
}

/// Per-render registry of encoding states.
///
/// A registry belongs to one render; it is not shared between threads.
#[derive(Default)]
pub struct EncodingStateRegistry {
    entries: FxHashMap<usize, Entry>,
}

impl EncodingStateRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the state recorded for `text`.
    pub fn state_of(&self, text: &Text) -> Option<&EncodingState> {
        self.entries.get(&text.identity()).map(|entry| &entry.state)
    }

    /// Returns `true` if `encoder` still has to be applied to `text`.
    pub fn should_encode_with(&self, encoder: &dyn Encoder, text: &Text) -> bool {
        self.state_of(text)
            .map_or(true, |state| state.should_encode_with(encoder))
    }

    /// Records that `text` has been encoded with `encoder`.
    pub fn mark(&mut self, text: &Text, encoder: &dyn Encoder) {
        self.entries
            .entry(text.identity())
            .or_insert_with(|| Entry {
                _text: text.clone(),
                state: EncodingState::default(),
            })
            .state
            .push(encoder);
    }

    /// Number of tracked texts.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forgets all states.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl std::fmt::Debug for EncodingStateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodingStateRegistry")
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// Encodes `text` unless the registry shows `encoder` is already covered.
///
/// The result is registered as encoded with `encoder`. When the encoder
/// leaves the text unchanged the original text is returned and registered.
pub fn encode_text(
    encoder: &dyn Encoder,
    text: &Text,
    registry: &mut EncodingStateRegistry,
) -> Result<Text, EncodingError> {
    if !registry.should_encode_with(encoder, text) {
        return Ok(text.clone());
    }
    let encoded = match encoder.encode(text.as_str())? {
        Cow::Borrowed(_) => text.clone(),
        Cow::Owned(encoded) => Text::from(encoded),
    };
    registry.mark(&encoded, encoder);
    Ok(encoded)
}

/// Encodes a value with `encoder`.
///
/// Buffers are encoded segment by segment, self-encoding objects encode
/// themselves, and `null` stays `null`.
pub fn encode_value(
    encoder: &dyn Encoder,
    value: &Value,
    registry: &mut EncodingStateRegistry,
) -> Result<Value, EncodingError> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Buffer(buffer) => {
            let segments = buffer
                .segments()
                .iter()
                .map(|segment| encode_text(encoder, segment, registry))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Buffer(segments.into()))
        }
        Value::Object(object) => {
            let encoded = object.encode(Some(encoder))?;
            registry.mark(&encoded, encoder);
            Ok(Value::Str(encoded))
        }
        other => encode_text(encoder, &other.to_text(), registry).map(Value::Str),
    }
}

/// Marks a value as safe so safe encoders leave it alone.
pub fn mark_raw(value: &Value, registry: &mut EncodingStateRegistry) -> Value {
    match value {
        Value::Buffer(buffer) => {
            for segment in buffer.segments() {
                registry.mark(segment, &RawEncoder);
            }
            value.clone()
        }
        Value::Null => Value::Null,
        other => {
            let text = other.to_text();
            registry.mark(&text, &RawEncoder);
            Value::Str(text)
        }
    }
}
