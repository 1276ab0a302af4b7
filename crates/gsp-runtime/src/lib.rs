//! GSP page runtime.
//!
//! Compiles parsed templates into [`ExecutablePage`]s and renders them:
//! - Output encoding stack with per-channel codecs (expression, static,
//!   scriptlet and tag output)
//! - Identity-based encoding state tracking, so nothing is encoded twice
//! - Tag libraries with a shared, reloadable lookup
//! - Tag invocation with body capture and `encodeAs` handling
//!
//! # Example
//!
//! ```
//! use gsp_runtime::{compile_source, render_to_string, Bindings, RenderEnv, Value};
//!
//! let page = compile_source("hello.gsp", "<p>${name}</p>", &Default::default()).unwrap();
//! let mut bindings = Bindings::new();
//! bindings.insert("name".into(), Value::from("<Tom>"));
//! let html = render_to_string(&page, bindings, &RenderEnv::default()).unwrap();
//! assert_eq!(html, "<p>&lt;Tom&gt;</p>");
//! ```

mod body;
mod buffer;
mod codec;
mod context;
pub mod core_tags;
mod encoding_state;
mod error;
mod eval;
mod invoke;
mod page;
mod render;
mod stack;
mod taglib;
mod value;

pub use body::TagBody;
pub use buffer::OutputBuffer;
pub use codec::{CharReplacementEncoder, CodecRegistry, Encoder, RawEncoder, StreamingEncoder};
pub use context::RenderContext;
pub use encoding_state::{
    encode_text, encode_value, mark_raw, AppliedEncoder, EncodingState, EncodingStateRegistry,
};
pub use error::{BoxError, EncodingError, RenderError, TagError, TagExecutionError};
pub use page::{compile, compile_bytes, compile_source, ExecutablePage};
pub use render::{render, render_to_string, RenderEnv};
pub use stack::{Channel, ChannelEncoders, CodecSettings, FrameStats, OutputEncodingStack};
pub use taglib::{
    Attributes, ResolvedTag, TagCallable, TagDescriptor, TagLibrary, TagLibraryLookup,
    TagLibraryRegistry, TagResult,
};
pub use value::{Bindings, CharSequence, Encodeable, Text, Value};
