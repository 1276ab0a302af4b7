//! The output encoding stack.
//!
//! Each frame decides where output goes and which encoder each channel
//! applies. The bottom frame writes to the render's writer; tags and tag
//! bodies push frames that capture output or change codecs.

use crate::buffer::OutputBuffer;
use crate::codec::{CodecRegistry, Encoder, RawEncoder};
use crate::encoding_state::{encode_text, EncodingStateRegistry};
use crate::error::{EncodingError, RenderError};
use crate::value::{Text, Value};
use gsp_parser::PageCodecs;
use smol_str::SmolStr;
use std::io;
use std::sync::Arc;

/// An output channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// `${...}` expression output.
    Expression,
    /// Literal HTML parts.
    Static,
    /// `<%= %>` scriptlet output.
    Out,
    /// Output written by tags.
    Taglib,
}

/// Codec names requested for a frame. Unset channels inherit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodecSettings {
    /// Codec for `${...}` output.
    pub expression: Option<SmolStr>,
    /// Codec for literal HTML.
    pub static_html: Option<SmolStr>,
    /// Codec for scriptlet output.
    pub out: Option<SmolStr>,
    /// Codec for tag output.
    pub taglib: Option<SmolStr>,
}

impl CodecSettings {
    /// Settings applying one codec to expression, out and taglib output.
    pub fn all(codec: &str) -> Self {
        let codec = SmolStr::new(codec);
        Self {
            expression: Some(codec.clone()),
            static_html: None,
            out: Some(codec.clone()),
            taglib: Some(codec),
        }
    }

    /// Reads an `encodeAs` value.
    ///
    /// A string applies to expression, out and taglib output. A map names
    /// codecs per channel with the keys `expression`, `static`, `out`
    /// (or `scriptlet`) and `taglib`; the key `all` is a fallback for the
    /// channels a string would cover.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Str(codec) => Self::all(codec),
            Value::Map(entries) => {
                let codec = |key: &str| {
                    entries
                        .get(key)
                        .map(|value| SmolStr::new(value.to_text().as_str()))
                };
                let all = codec("all");
                Self {
                    expression: codec("expression").or_else(|| all.clone()),
                    static_html: codec("static"),
                    out: codec("out").or_else(|| codec("scriptlet")).or_else(|| all.clone()),
                    taglib: codec("taglib").or(all),
                }
            }
            Value::Null => Self::default(),
            other => Self::all(&other.to_text()),
        }
    }

    /// Reads settings from tag attributes, as given to `applyCodec`.
    ///
    /// `encodeAs` is read first; channel attributes override it.
    pub fn from_attributes(attributes: &crate::taglib::Attributes) -> Self {
        let base = attributes
            .get("encodeAs")
            .map(Self::from_value)
            .unwrap_or_default();
        let codec = |key: &str| {
            attributes
                .get(key)
                .map(|value| SmolStr::new(value.to_text().as_str()))
        };
        Self {
            expression: codec("expressionCodec")
                .or_else(|| codec("expression"))
                .or(base.expression),
            static_html: codec("staticCodec")
                .or_else(|| codec("static"))
                .or(base.static_html),
            out: codec("outCodec")
                .or_else(|| codec("scriptletCodec"))
                .or_else(|| codec("out"))
                .or(base.out),
            taglib: codec("taglibCodec")
                .or_else(|| codec("taglib"))
                .or(base.taglib),
        }
    }

    /// Fills unset channels from `defaults`.
    pub fn merged_over(self, defaults: &CodecSettings) -> Self {
        Self {
            expression: self.expression.or_else(|| defaults.expression.clone()),
            static_html: self.static_html.or_else(|| defaults.static_html.clone()),
            out: self.out.or_else(|| defaults.out.clone()),
            taglib: self.taglib.or_else(|| defaults.taglib.clone()),
        }
    }

    /// Returns `true` if no channel is set.
    pub fn is_empty(&self) -> bool {
        self.expression.is_none()
            && self.static_html.is_none()
            && self.out.is_none()
            && self.taglib.is_none()
    }
}

/// Resolved encoders of one frame.
#[derive(Debug, Clone, Default)]
pub struct ChannelEncoders {
    /// Encoder for `${...}` output.
    pub expression: Option<Arc<dyn Encoder>>,
    /// Encoder for literal HTML.
    pub static_html: Option<Arc<dyn Encoder>>,
    /// Encoder for scriptlet output.
    pub out: Option<Arc<dyn Encoder>>,
    /// Encoder for tag output set on this frame.
    pub taglib: Option<Arc<dyn Encoder>>,
    /// Page-level encoder for tag output, used when `taglib` is unset.
    pub default_taglib: Option<Arc<dyn Encoder>>,
}

impl ChannelEncoders {
    /// Resolves the page's codecs for the bottom frame.
    pub fn for_page(codecs: &PageCodecs, registry: &CodecRegistry) -> Result<Self, EncodingError> {
        Ok(Self {
            expression: registry.lookup(&codecs.expression)?,
            static_html: registry.lookup(&codecs.static_html)?,
            out: registry.lookup(&codecs.out)?,
            taglib: None,
            default_taglib: registry.lookup(&codecs.taglib)?,
        })
    }

    /// Applies `settings` on top of these encoders.
    pub fn with_settings(
        &self,
        settings: &CodecSettings,
        registry: &CodecRegistry,
    ) -> Result<Self, EncodingError> {
        if settings.is_empty() {
            return Ok(self.clone());
        }
        let resolve = |requested: &Option<SmolStr>, inherited: &Option<Arc<dyn Encoder>>| {
            match requested {
                Some(name) => registry.lookup(name),
                None => Ok(inherited.clone()),
            }
        };
        Ok(Self {
            expression: resolve(&settings.expression, &self.expression)?,
            static_html: resolve(&settings.static_html, &self.static_html)?,
            out: resolve(&settings.out, &self.out)?,
            taglib: resolve(&settings.taglib, &self.taglib)?,
            default_taglib: self.default_taglib.clone(),
        })
    }

    /// Returns the encoder applied to `channel`.
    pub fn for_channel(&self, channel: Channel) -> Option<&Arc<dyn Encoder>> {
        match channel {
            Channel::Expression => self.expression.as_ref(),
            Channel::Static => self.static_html.as_ref(),
            Channel::Out => self.out.as_ref(),
            Channel::Taglib => self.taglib.as_ref().or(self.default_taglib.as_ref()),
        }
    }
}

enum Target {
    Root,
    Capture(Vec<Text>),
    Inherit,
}

struct Frame {
    target: Target,
    encoders: ChannelEncoders,
    used: bool,
}

/// Push and pop counts of a stack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frames pushed, the bottom frame excluded.
    pub pushed: usize,
    /// Frames popped.
    pub popped: usize,
}

/// The stack of output frames of one render.
pub struct OutputEncodingStack<'w> {
    root: &'w mut dyn io::Write,
    frames: Vec<Frame>,
    stats: FrameStats,
}

impl<'w> OutputEncodingStack<'w> {
    /// Creates a stack writing to `root` with the page's encoders.
    pub fn new(root: &'w mut dyn io::Write, encoders: ChannelEncoders) -> Self {
        Self {
            root,
            frames: vec![Frame {
                target: Target::Root,
                encoders,
                used: false,
            }],
            stats: FrameStats::default(),
        }
    }

    /// Pushes a frame.
    ///
    /// A capturing frame collects output until it is popped; otherwise
    /// output goes wherever the frame below sends it.
    pub fn push(&mut self, capture: bool, encoders: ChannelEncoders) {
        let target = if capture {
            Target::Capture(Vec::new())
        } else {
            Target::Inherit
        };
        self.frames.push(Frame {
            target,
            encoders,
            used: false,
        });
        self.stats.pushed += 1;
        log::trace!(
            target: "gsp.runtime",
            "push frame (capture: {capture}), depth {}",
            self.frames.len()
        );
    }

    /// Pops the top frame, returning its output if it was capturing.
    ///
    /// The bottom frame is never popped.
    pub fn pop(&mut self) -> Option<OutputBuffer> {
        if self.frames.len() <= 1 {
            log::warn!(target: "gsp.runtime", "attempt to pop the bottom output frame");
            return None;
        }
        let frame = self.frames.pop()?;
        self.stats.popped += 1;
        log::trace!(target: "gsp.runtime", "pop frame, depth {}", self.frames.len());
        match frame.target {
            Target::Capture(segments) => Some(OutputBuffer::from(segments)),
            Target::Root | Target::Inherit => None,
        }
    }

    /// Number of frames, including the bottom frame.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Push and pop counts so far.
    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Encoders of the top frame.
    pub fn encoders(&self) -> &ChannelEncoders {
        &self.top().encoders
    }

    /// Encoders of the bottom frame.
    pub fn page_encoders(&self) -> &ChannelEncoders {
        &self.frames[0].encoders
    }

    /// Whether anything was written through the top frame.
    pub fn is_used(&self) -> bool {
        self.top().used
    }

    fn top(&self) -> &Frame {
        // The bottom frame is never popped.
        &self.frames[self.frames.len() - 1]
    }

    /// Writes a value through `channel` of the top frame.
    pub fn write(
        &mut self,
        channel: Channel,
        value: &Value,
        registry: &mut EncodingStateRegistry,
    ) -> Result<(), RenderError> {
        let encoder = self.top().encoders.for_channel(channel).cloned();
        let encoder: Option<&dyn Encoder> = match (channel, encoder.as_deref()) {
            // Literal HTML is safe even without a codec.
            (Channel::Static, None) => Some(&RawEncoder),
            (_, encoder) => encoder,
        };
        match value {
            Value::Null => Ok(()),
            Value::Buffer(buffer) => {
                for segment in buffer.segments() {
                    self.write_text(segment, encoder, registry)?;
                }
                Ok(())
            }
            Value::Object(object) => {
                let text = object.encode(encoder)?;
                if let Some(encoder) = encoder {
                    registry.mark(&text, encoder);
                }
                self.emit(text)
            }
            other => self.write_text(&other.to_text(), encoder, registry),
        }
    }

    fn write_text(
        &mut self,
        text: &Text,
        encoder: Option<&dyn Encoder>,
        registry: &mut EncodingStateRegistry,
    ) -> Result<(), RenderError> {
        let Some(encoder) = encoder else {
            return self.emit(text.clone());
        };
        if !registry.should_encode_with(encoder, text) {
            return self.emit(text.clone());
        }
        if self.target_is_root() {
            if let Some(streaming) = encoder.streaming() {
                self.mark_used();
                streaming.encode_to_writer(text, &mut *self.root)?;
                return Ok(());
            }
        }
        let encoded = encode_text(encoder, text, registry)?;
        self.emit(encoded)
    }

    fn target_is_root(&self) -> bool {
        for frame in self.frames.iter().rev() {
            match frame.target {
                Target::Inherit => continue,
                Target::Root => return true,
                Target::Capture(_) => return false,
            }
        }
        false
    }

    fn mark_used(&mut self) {
        for frame in self.frames.iter_mut().rev() {
            frame.used = true;
            if !matches!(frame.target, Target::Inherit) {
                break;
            }
        }
    }

    fn emit(&mut self, text: Text) -> Result<(), RenderError> {
        self.mark_used();
        let target = self
            .frames
            .iter_mut()
            .rev()
            .map(|frame| &mut frame.target)
            .find(|target| !matches!(target, Target::Inherit));
        match target {
            Some(Target::Capture(segments)) => {
                segments.push(text);
                Ok(())
            }
            _ => {
                self.root.write_all(text.as_bytes())?;
                Ok(())
            }
        }
    }

    /// Flushes the underlying writer.
    pub fn flush(&mut self) -> io::Result<()> {
        self.root.flush()
    }
}
