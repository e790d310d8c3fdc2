//! Splicing text replacements into a source file.
//!
//! Rewrites are computed as byte ranges over the original text and applied in
//! one pass. Untouched text is mapped back to its original position line by
//! line; generated text is attributed to the start of the range it replaced.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use swc_core::common::{
    source_map::SourceMapGenConfig, sync::Lrc, BytePos, FileName, LineCol, SourceMap,
};

use crate::error::{Result, TransformError};
use crate::parse::ParsedModule;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Replacement {
    pub start: usize,
    pub end: usize,
    pub content: String,
}

impl Replacement {
    pub fn new(start: usize, end: usize, content: impl Into<String>) -> Self {
        Self {
            start,
            end,
            content: content.into(),
        }
    }

    pub fn insert(at: usize, content: impl Into<String>) -> Self {
        Self::new(at, at, content)
    }

    pub fn remove(start: usize, end: usize) -> Self {
        Self::new(start, end, "")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransformOutput {
    pub code: String,
    /// JSON source map, when requested.
    pub map: Option<String>,
}

impl TransformOutput {
    /// The code with its source map appended as a base64 data URL comment.
    pub fn with_inline_map(&self) -> String {
        match &self.map {
            Some(map) => format!(
                "{}\n//# sourceMappingURL=data:application/json;base64,{}",
                self.code,
                STANDARD.encode(map)
            ),
            None => self.code.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Applied {
    /// Nothing to replace; callers keep the original text.
    Unchanged,
    Changed(TransformOutput),
}

impl Applied {
    pub fn into_output(self) -> Option<TransformOutput> {
        match self {
            Applied::Unchanged => None,
            Applied::Changed(out) => Some(out),
        }
    }
}

/// Where the original text lives in a swc [`SourceMap`], for map generation.
pub struct MapSource {
    cm: Lrc<SourceMap>,
    start_pos: BytePos,
}

impl MapSource {
    pub fn for_module(parsed: &ParsedModule) -> Self {
        Self {
            cm: parsed.cm.clone(),
            start_pos: parsed.file.start_pos,
        }
    }

    /// Registers free-standing text (a rendered chunk) under `name`.
    pub fn new(name: &str, text: &str) -> Self {
        let cm: Lrc<SourceMap> = Default::default();
        let file = cm.new_source_file(FileName::Custom(name.to_string()).into(), text.to_string());
        Self {
            cm,
            start_pos: file.start_pos,
        }
    }
}

struct InlineSources;

impl SourceMapGenConfig for InlineSources {
    fn file_name_to_source(&self, f: &FileName) -> String {
        match f {
            FileName::Real(path) => path.to_string_lossy().replace('\\', "/"),
            other => other.to_string(),
        }
    }

    fn inline_sources_content(&self, _f: &FileName) -> bool {
        true
    }
}

// Generated-side position, columns in UTF-16 units.
#[derive(Default)]
struct Cursor {
    line: u32,
    col: u32,
}

impl Cursor {
    fn advance(&mut self, text: &str) {
        for ch in text.chars() {
            if ch == '\n' {
                self.line += 1;
                self.col = 0;
            } else {
                self.col += ch.len_utf16() as u32;
            }
        }
    }

    fn pos(&self) -> LineCol {
        LineCol {
            line: self.line,
            col: self.col,
        }
    }
}

fn validate(source: &str, replacements: &mut [Replacement]) -> Result<()> {
    replacements.sort_by_key(|r| (r.start, r.end));
    let len = source.len();
    let mut prev: Option<&Replacement> = None;
    for r in replacements.iter() {
        if r.start > r.end
            || r.end > len
            || !source.is_char_boundary(r.start)
            || !source.is_char_boundary(r.end)
        {
            return Err(TransformError::InvalidReplacement {
                start: r.start,
                end: r.end,
                len,
            });
        }
        if let Some(p) = prev {
            if r.start < p.end {
                return Err(TransformError::OverlappingReplacements {
                    first: (p.start, p.end),
                    second: (r.start, r.end),
                });
            }
        }
        prev = Some(r);
    }
    Ok(())
}

// Output under construction plus the mappings recorded so far.
struct Splice<'a> {
    source: &'a str,
    base: Option<u32>,
    code: String,
    cursor: Cursor,
    mappings: Vec<(BytePos, LineCol)>,
}

impl Splice<'_> {
    fn mark(&mut self, original: usize) {
        if let Some(base) = self.base {
            if original < self.source.len() {
                self.mappings
                    .push((BytePos(base + original as u32), self.cursor.pos()));
            }
        }
    }

    /// Copies untouched text, mapping the start of every line it covers.
    fn copy(&mut self, from: usize, to: usize) {
        if from >= to {
            return;
        }
        let source = self.source;
        let segment = &source[from..to];
        let mut at = from;
        for line in segment.split_inclusive('\n') {
            self.mark(at);
            self.cursor.advance(line);
            at += line.len();
        }
        self.code.push_str(segment);
    }

    fn generate(&mut self, original: usize, content: &str) {
        if !content.is_empty() {
            self.mark(original);
        }
        self.code.push_str(content);
        self.cursor.advance(content);
    }
}

/// Applies `replacements` to `source`. Either every replacement is applied or,
/// on an invalid set, none is and the error is returned.
pub fn apply(
    source: &str,
    mut replacements: Vec<Replacement>,
    map_source: Option<&MapSource>,
) -> Result<Applied> {
    if replacements.is_empty() {
        return Ok(Applied::Unchanged);
    }
    validate(source, &mut replacements)?;

    let extra: usize = replacements.iter().map(|r| r.content.len()).sum();
    let mut splice = Splice {
        source,
        base: map_source.map(|m| m.start_pos.0),
        code: String::with_capacity(source.len() + extra),
        cursor: Cursor::default(),
        mappings: vec![],
    };

    let mut last = 0usize;
    for r in &replacements {
        splice.copy(last, r.start);
        splice.generate(r.start, &r.content);
        last = r.end;
    }
    splice.copy(last, source.len());

    let map = match map_source {
        Some(m) => {
            let built = m.cm.build_source_map(&splice.mappings, None, InlineSources);
            let mut buf = vec![];
            built
                .to_writer(&mut buf)
                .map_err(|e| TransformError::SourceMap(e.to_string()))?;
            Some(String::from_utf8(buf).map_err(|e| TransformError::SourceMap(e.to_string()))?)
        }
        None => None,
    };

    Ok(Applied::Changed(TransformOutput {
        code: splice.code,
        map,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(source: &str, replacements: Vec<Replacement>) -> String {
        match apply(source, replacements, None).unwrap() {
            Applied::Changed(out) => out.code,
            Applied::Unchanged => source.to_string(),
        }
    }

    #[test]
    fn empty_set_is_identity() {
        assert_eq!(apply("abc", vec![], None).unwrap(), Applied::Unchanged);
    }

    #[test]
    fn order_of_discovery_does_not_matter() {
        let a = vec![
            Replacement::new(0, 1, "X"),
            Replacement::new(4, 5, "Y"),
            Replacement::insert(8, "!"),
        ];
        let mut b = a.clone();
        b.reverse();
        assert_eq!(code("a + b + c", a), "X + Y + !c");
        assert_eq!(code("a + b + c", b), "X + Y + !c");
    }

    #[test]
    fn overlap_is_rejected() {
        let err = apply(
            "abcdef",
            vec![Replacement::new(0, 3, "x"), Replacement::new(2, 4, "y")],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, TransformError::OverlappingReplacements { .. }));
    }

    #[test]
    fn out_of_range_is_rejected() {
        let err = apply("abc", vec![Replacement::new(2, 9, "x")], None).unwrap_err();
        assert!(matches!(err, TransformError::InvalidReplacement { .. }));
    }

    #[test]
    fn adjacent_ranges_and_appends_are_fine() {
        let src = "foo(bar)";
        let out = code(
            src,
            vec![
                Replacement::new(0, 4, "call(["),
                Replacement::new(7, 8, "])"),
                Replacement::insert(src.len(), ";\nend"),
            ],
        );
        assert_eq!(out, "call([bar]);\nend");
    }

    #[test]
    fn produces_a_source_map() {
        let src = "const a = f(1);\nconst b = 2;\n";
        let map_source = MapSource::new("input.js", src);
        let out = apply(src, vec![Replacement::new(10, 14, "g([1])")], Some(&map_source))
            .unwrap()
            .into_output()
            .unwrap();
        assert_eq!(out.code, "const a = g([1]);\nconst b = 2;\n");
        let map: serde_json::Value = serde_json::from_str(out.map.as_deref().unwrap()).unwrap();
        assert_eq!(map["version"], 3);
        assert!(!map["mappings"].as_str().unwrap().is_empty());
        assert!(out.with_inline_map().contains("sourceMappingURL=data:application/json;base64,"));
    }
}
