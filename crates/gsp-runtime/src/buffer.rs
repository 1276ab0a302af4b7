//! Captured output.

use crate::value::{CharSequence, Text};
use std::sync::Arc;

/// Output captured from a tag or tag body.
///
/// The buffer keeps the texts that were written as separate segments, so
/// each keeps its identity and with it its encoding state.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    segments: Arc<[Text]>,
}

impl OutputBuffer {
    /// Returns the captured segments in write order.
    pub fn segments(&self) -> &[Text] {
        &self.segments
    }

    /// Returns `true` if nothing non-empty was captured.
    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|segment| segment.is_empty())
    }

    /// Total length in bytes.
    pub fn len(&self) -> usize {
        self.segments.iter().map(|segment| segment.len()).sum()
    }

    /// Returns the captured output as one text.
    ///
    /// A single segment is returned as is, keeping its identity.
    pub fn to_text(&self) -> Text {
        match &*self.segments {
            [single] => single.clone(),
            segments => Text::from(segments.iter().map(Text::as_str).collect::<String>()),
        }
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::from(Vec::new())
    }
}

impl From<Vec<Text>> for OutputBuffer {
    fn from(segments: Vec<Text>) -> Self {
        Self {
            segments: segments.into(),
        }
    }
}

impl CharSequence for OutputBuffer {
    fn contiguous(&self) -> Option<&str> {
        match &*self.segments {
            [] => Some(""),
            [single] => Some(single.as_str()),
            _ => None,
        }
    }

    fn copy_into(&self, out: &mut String) {
        for segment in self.segments.iter() {
            out.push_str(segment);
        }
    }
}
