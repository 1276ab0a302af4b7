//! Configuration loading.

use camino::Utf8Path;
use gsp_parser::{ParseOptions, DEFAULT_MAX_HTML_LENGTH};
use serde::Deserialize;
use smol_str::SmolStr;
use std::fs;

/// Name of the configuration file in the project root.
pub const CONFIG_FILE: &str = "gsp.json";

/// Directories skipped when no `exclude` is configured.
const DEFAULT_EXCLUDE: [&str; 4] = ["build", "target", "node_modules", ".git"];

/// Project configuration read from `gsp.json`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GspConfig {
    /// Codec for `${...}` expressions.
    pub default_codec: Option<String>,

    /// Codec for literal HTML.
    pub static_codec: Option<String>,

    /// Codec for `<%= %>` output.
    pub out_codec: Option<String>,

    /// Codec for tag output.
    pub taglib_codec: Option<String>,

    /// Template file encoding.
    pub encoding: Option<String>,

    /// Content type for pages that declare none.
    pub content_type: Option<String>,

    /// Longest HTML run kept in a single part.
    pub max_html_length: Option<usize>,

    /// File extensions to process.
    pub extensions: Vec<String>,

    /// Path segments or relative path prefixes to skip.
    pub exclude: Vec<String>,
}

impl GspConfig {
    /// Loads `gsp.json` from the project root.
    ///
    /// A missing file yields the defaults; an unreadable one is reported
    /// and ignored.
    pub fn load(project_root: &Utf8Path) -> Self {
        let path = project_root.join(CONFIG_FILE);
        if !path.exists() {
            return Self::default();
        }
        match Self::parse_config(&path) {
            Ok(config) => {
                log::debug!("loaded {path}");
                config
            }
            Err(e) => {
                log::warn!("Failed to parse {path}: {e}");
                Self::default()
            }
        }
    }

    fn parse_config(path: &Utf8Path) -> Result<Self, String> {
        let content = fs::read_to_string(path).map_err(|e| e.to_string())?;
        serde_json::from_str(&content).map_err(|e| e.to_string())
    }

    /// Applies command-line overrides.
    pub fn with_overrides(mut self, default_codec: Option<&str>, encoding: Option<&str>) -> Self {
        if let Some(codec) = default_codec {
            self.default_codec = Some(codec.to_string());
        }
        if let Some(encoding) = encoding {
            self.encoding = Some(encoding.to_string());
        }
        self
    }

    /// Returns the parse options described by this configuration.
    pub fn parse_options(&self) -> ParseOptions {
        let mut options = ParseOptions::default();
        let codec = |name: &Option<String>, slot: &mut SmolStr| {
            if let Some(name) = name {
                *slot = SmolStr::new(name);
            }
        };
        codec(&self.default_codec, &mut options.codecs.expression);
        codec(&self.static_codec, &mut options.codecs.static_html);
        codec(&self.out_codec, &mut options.codecs.out);
        codec(&self.taglib_codec, &mut options.codecs.taglib);
        if let Some(content_type) = &self.content_type {
            options.content_type = content_type.clone();
        }
        options.max_html_length = self
            .max_html_length
            .filter(|length| *length > 0)
            .unwrap_or(DEFAULT_MAX_HTML_LENGTH);
        options
    }

    /// Returns the template file encoding.
    pub fn encoding(&self) -> &str {
        self.encoding.as_deref().unwrap_or("UTF-8")
    }

    /// Returns the file extensions to process.
    pub fn file_extensions(&self) -> Vec<&str> {
        if self.extensions.is_empty() {
            vec![".gsp"]
        } else {
            self.extensions.iter().map(String::as_str).collect()
        }
    }

    /// Returns whether a path relative to the project root is excluded.
    pub fn is_excluded(&self, relative: &Utf8Path) -> bool {
        let patterns: Vec<&str> = if self.exclude.is_empty() {
            DEFAULT_EXCLUDE.to_vec()
        } else {
            self.exclude.iter().map(String::as_str).collect()
        };
        patterns.into_iter().any(|pattern| {
            let pattern = pattern.trim_matches('/');
            relative.starts_with(pattern)
                || relative.components().any(|part| part.as_str() == pattern)
        })
    }
}
