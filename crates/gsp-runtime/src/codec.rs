//! Encoders and the codec registry.

use crate::error::EncodingError;
use crate::value::CharSequence;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use std::borrow::Cow;
use std::fmt;
use std::io;
use std::sync::Arc;

/// Size of the chunks written by streaming encoders.
const CHUNK_SIZE: usize = 8 * 1024;

/// Transforms text for safe output in some context.
pub trait Encoder: fmt::Debug + Send + Sync {
    /// Name the encoder is registered under.
    fn name(&self) -> &str;

    /// Whether output of this encoder is safe to emit into markup.
    ///
    /// A value already encoded by a safe encoder is not encoded again by
    /// another safe encoder, unless that one applies to safely encoded
    /// values.
    fn is_safe(&self) -> bool {
        true
    }

    /// Whether this encoder applies to values another safe encoder has
    /// already handled.
    fn apply_to_safely_encoded(&self) -> bool {
        false
    }

    /// Encodes `input`, borrowing it when nothing changes.
    fn encode<'a>(&self, input: &'a str) -> Result<Cow<'a, str>, EncodingError>;

    /// Returns the streaming form of this encoder, if it has one.
    fn streaming(&self) -> Option<&dyn StreamingEncoder> {
        None
    }

    /// Returns `true` if `other` is the same encoder.
    fn is_same(&self, other: &dyn Encoder) -> bool {
        self.name().eq_ignore_ascii_case(other.name())
    }
}

/// An encoder that writes its output directly to a sink.
pub trait StreamingEncoder {
    /// Encodes `input` into `out`.
    fn encode_to_writer(&self, input: &dyn CharSequence, out: &mut dyn io::Write)
        -> io::Result<()>;
}

/// Replacement text for a single character, given the previous character.
type Replacement = fn(char, Option<char>) -> Option<Cow<'static, str>>;

/// An encoder that replaces individual characters.
#[derive(Clone)]
pub struct CharReplacementEncoder {
    name: &'static str,
    safe: bool,
    apply_to_safely_encoded: bool,
    replacement: Replacement,
}

impl CharReplacementEncoder {
    /// Creates an encoder from a replacement function.
    pub const fn new(name: &'static str, replacement: Replacement) -> Self {
        Self {
            name,
            safe: true,
            apply_to_safely_encoded: false,
            replacement,
        }
    }

    /// Marks the output of this encoder as unsafe for markup.
    pub const fn unsafe_output(mut self) -> Self {
        self.safe = false;
        self
    }

    /// Makes this encoder apply to values already encoded by a safe encoder.
    pub const fn applies_to_safely_encoded(mut self) -> Self {
        self.apply_to_safely_encoded = true;
        self
    }

    /// The HTML escaping encoder.
    pub const fn html() -> Self {
        Self::new("HTML", html_replacement)
    }

    /// The JavaScript string escaping encoder.
    pub const fn javascript() -> Self {
        Self::new("JavaScript", javascript_replacement).applies_to_safely_encoded()
    }

    /// The URL form encoder.
    pub const fn url() -> Self {
        Self::new("URL", url_replacement).unsafe_output()
    }
}

impl fmt::Debug for CharReplacementEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CharReplacementEncoder")
            .field("name", &self.name)
            .field("safe", &self.safe)
            .finish()
    }
}

impl Encoder for CharReplacementEncoder {
    fn name(&self) -> &str {
        self.name
    }

    fn is_safe(&self) -> bool {
        self.safe
    }

    fn apply_to_safely_encoded(&self) -> bool {
        self.apply_to_safely_encoded
    }

    fn encode<'a>(&self, input: &'a str) -> Result<Cow<'a, str>, EncodingError> {
        let mut prev = None;
        let mut out: Option<String> = None;
        let mut copied = 0;
        for (index, ch) in input.char_indices() {
            if let Some(replacement) = (self.replacement)(ch, prev) {
                let buffer = out.get_or_insert_with(|| String::with_capacity(input.len() + 16));
                buffer.push_str(&input[copied..index]);
                buffer.push_str(&replacement);
                copied = index + ch.len_utf8();
            }
            prev = Some(ch);
        }
        Ok(match out {
            Some(mut buffer) => {
                buffer.push_str(&input[copied..]);
                Cow::Owned(buffer)
            }
            None => Cow::Borrowed(input),
        })
    }

    fn streaming(&self) -> Option<&dyn StreamingEncoder> {
        Some(self)
    }
}

impl StreamingEncoder for CharReplacementEncoder {
    fn encode_to_writer(
        &self,
        input: &dyn CharSequence,
        out: &mut dyn io::Write,
    ) -> io::Result<()> {
        let input = input.to_contiguous();
        let mut chunk = String::with_capacity(CHUNK_SIZE.min(input.len() + 16));
        let mut prev = None;
        for ch in input.chars() {
            match (self.replacement)(ch, prev) {
                Some(replacement) => chunk.push_str(&replacement),
                None => chunk.push(ch),
            }
            prev = Some(ch);
            if chunk.len() >= CHUNK_SIZE {
                out.write_all(chunk.as_bytes())?;
                chunk.clear();
            }
        }
        if !chunk.is_empty() {
            out.write_all(chunk.as_bytes())?;
        }
        Ok(())
    }
}

fn html_replacement(ch: char, _prev: Option<char>) -> Option<Cow<'static, str>> {
    let replacement = match ch {
        '&' => "&amp;",
        '<' => "&lt;",
        '>' => "&gt;",
        '"' => "&quot;",
        '\'' => "&#39;",
        _ => return None,
    };
    Some(Cow::Borrowed(replacement))
}

fn javascript_replacement(ch: char, prev: Option<char>) -> Option<Cow<'static, str>> {
    let replacement = match ch {
        '"' => "\\u0022",
        '\'' => "\\u0027",
        '`' => "\\u0060",
        '\\' => "\\u005c",
        '/' => "\\u002f",
        '\t' => "\\t",
        '\n' => "\\n",
        '\r' => "\\r",
        '\u{0008}' => "\\b",
        '\u{000C}' => "\\f",
        '<' => "\\u003c",
        '>' => "\\u003e",
        '&' => "\\u0026",
        '=' => "\\u003d",
        '-' if prev == Some('-') => "\\u002d",
        '\u{2028}' => "\\u2028",
        '\u{2029}' => "\\u2029",
        ch if ch.is_control() => return Some(Cow::Owned(format!("\\u{:04x}", ch as u32))),
        _ => return None,
    };
    Some(Cow::Borrowed(replacement))
}

fn url_replacement(ch: char, _prev: Option<char>) -> Option<Cow<'static, str>> {
    match ch {
        'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' | '.' | '*' => None,
        ' ' => Some(Cow::Borrowed("+")),
        ch => {
            let mut bytes = [0; 4];
            let encoded = ch
                .encode_utf8(&mut bytes)
                .bytes()
                .map(|byte| format!("%{byte:02X}"))
                .collect();
            Some(Cow::Owned(encoded))
        }
    }
}

/// The identity encoder. Marks its input as safe without changing it.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawEncoder;

impl RawEncoder {
    /// Registered name of the raw encoder.
    pub const NAME: &'static str = "Raw";
}

impl Encoder for RawEncoder {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn encode<'a>(&self, input: &'a str) -> Result<Cow<'a, str>, EncodingError> {
        Ok(Cow::Borrowed(input))
    }
}

/// Encoders by case-insensitive name.
#[derive(Debug, Clone)]
pub struct CodecRegistry {
    encoders: FxHashMap<SmolStr, Arc<dyn Encoder>>,
}

impl CodecRegistry {
    /// Creates a registry without any encoders.
    pub fn empty() -> Self {
        Self {
            encoders: FxHashMap::default(),
        }
    }

    /// Registers an encoder under its own name.
    pub fn register(&mut self, encoder: Arc<dyn Encoder>) {
        let name = encoder.name().to_string();
        self.register_as(&name, encoder);
    }

    /// Registers an encoder under an additional name.
    pub fn register_as(&mut self, name: &str, encoder: Arc<dyn Encoder>) {
        self.encoders
            .insert(SmolStr::new(name.to_ascii_lowercase()), encoder);
    }

    /// Resolves a codec name.
    ///
    /// `"none"` and the empty name resolve to no encoder.
    pub fn lookup(&self, name: &str) -> Result<Option<Arc<dyn Encoder>>, EncodingError> {
        let name = name.trim();
        if name.is_empty() || name.eq_ignore_ascii_case(gsp_parser::NO_CODEC) {
            return Ok(None);
        }
        self.encoders
            .get(name.to_ascii_lowercase().as_str())
            .cloned()
            .map(Some)
            .ok_or_else(|| EncodingError::UnknownCodec {
                name: name.to_string(),
            })
    }

    /// Returns the registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.encoders.keys().map(SmolStr::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for CodecRegistry {
    /// The built-in codecs: `HTML`, `JavaScript` (alias `JS`), `URL` and `Raw`.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(CharReplacementEncoder::html()));
        let javascript: Arc<dyn Encoder> = Arc::new(CharReplacementEncoder::javascript());
        registry.register_as("JS", javascript.clone());
        registry.register(javascript);
        registry.register(Arc::new(CharReplacementEncoder::url()));
        registry.register(Arc::new(RawEncoder));
        registry
    }
}
