//! Minimal source map v3 support.
//!
//! Mappings are line granular: every generated line points at the start of
//! one original line. That is enough to find the source file and line of a
//! minified stylesheet rule or a bundled script statement in the devtools.

use serde::{Deserialize, Serialize};

const BASE64: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMap {
    pub version: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_root: Option<String>,
    pub sources: Vec<String>,
    #[serde(default)]
    pub sources_content: Vec<Option<String>>,
    #[serde(default)]
    pub names: Vec<String>,
    pub mappings: String,
}

impl SourceMap {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    source: u32,
    line: u32,
}

/// Incrementally collects line mappings for one generated file.
#[derive(Debug, Default)]
pub struct MapBuilder {
    file: Option<String>,
    source_root: Option<String>,
    sources: Vec<String>,
    contents: Vec<Option<String>>,
    lines: Vec<Option<Segment>>,
}

impl MapBuilder {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: Some(file.into()),
            ..Self::default()
        }
    }

    pub fn source_root(mut self, root: impl Into<String>) -> Self {
        self.source_root = Some(root.into());
        self
    }

    /// Registers an original file and returns its index.
    pub fn add_source(&mut self, name: impl Into<String>, content: Option<String>) -> u32 {
        self.sources.push(name.into());
        self.contents.push(content);
        (self.sources.len() - 1) as u32
    }

    /// Maps generated line `generated` to line `original` of `source`.
    /// Both are zero based.
    pub fn map_line(&mut self, generated: usize, source: u32, original: u32) {
        if self.lines.len() <= generated {
            self.lines.resize(generated + 1, None);
        }
        self.lines[generated] = Some(Segment {
            source,
            line: original,
        });
    }

    pub fn build(self) -> SourceMap {
        let mut mappings = String::new();
        let mut prev_source = 0i64;
        let mut prev_line = 0i64;

        for (i, segment) in self.lines.iter().enumerate() {
            if i > 0 {
                mappings.push(';');
            }

            if let Some(segment) = segment {
                // generated column, source, original line, original column
                vlq(0, &mut mappings);
                vlq(segment.source as i64 - prev_source, &mut mappings);
                vlq(segment.line as i64 - prev_line, &mut mappings);
                vlq(0, &mut mappings);

                prev_source = segment.source as i64;
                prev_line = segment.line as i64;
            }
        }

        SourceMap {
            version: 3,
            file: self.file,
            source_root: self.source_root,
            sources: self.sources,
            sources_content: self.contents,
            names: Vec::new(),
            mappings,
        }
    }
}

/// Base64 VLQ encoding of a single signed value.
fn vlq(value: i64, out: &mut String) {
    let mut rest = if value < 0 {
        ((-value) << 1) | 1
    } else {
        value << 1
    };

    loop {
        let mut digit = rest & 0b11111;
        rest >>= 5;
        if rest > 0 {
            digit |= 0b100000;
        }
        out.push(BASE64[digit as usize] as char);
        if rest == 0 {
            break;
        }
    }
}
