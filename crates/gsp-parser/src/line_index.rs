//! Line index for offset to line conversion.

use text_size::TextSize;

/// An index for converting byte offsets to 1-based line numbers.
///
/// The index stores the byte offset of the start of each line, so lookups are
/// a binary search.
#[derive(Debug, Clone)]
pub struct LineIndex {
    /// `line_starts[i]` is the offset where line `i + 1` begins.
    line_starts: Vec<TextSize>,
}

impl LineIndex {
    /// Creates a new line index from source text.
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![TextSize::from(0)];
        for (offset, byte) in text.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(TextSize::from((offset + 1) as u32));
            }
        }
        Self { line_starts }
    }

    /// Returns the number of lines in the source.
    #[inline]
    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Returns the 1-based line containing `offset`.
    ///
    /// Offsets past the end of the text map to the last line.
    pub fn line(&self, offset: TextSize) -> u32 {
        let index = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(line) => line.saturating_sub(1),
        };
        index as u32 + 1
    }

    /// Returns the byte offset where the 1-based `line` starts.
    pub fn line_start(&self, line: u32) -> Option<TextSize> {
        let index = (line as usize).checked_sub(1)?;
        self.line_starts.get(index).copied()
    }
}
