use std::path::{Path, PathBuf};

use swc_core::{
    common::{sync::Lrc, BytePos, FileName, Globals, Mark, SourceFile, SourceMap, Span, GLOBALS},
    ecma::{
        ast::{EsVersion, Module},
        parser::{parse_file_as_module, EsSyntax, Syntax, TsSyntax},
        transforms::base::resolver,
        visit::VisitMutWith,
    },
};

use crate::error::{Result, TransformError};

/// A source file parsed once and kept together with the text its spans point into.
pub struct ParsedModule {
    pub path: PathBuf,
    pub source: String,
    pub cm: Lrc<SourceMap>,
    pub file: Lrc<SourceFile>,
    pub module: Module,
}

fn syntax_for(path: &Path) -> Syntax {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "ts" | "mts" | "cts" => Syntax::Typescript(TsSyntax {
            decorators: true,
            ..Default::default()
        }),
        "tsx" => Syntax::Typescript(TsSyntax {
            tsx: true,
            decorators: true,
            ..Default::default()
        }),
        _ => Syntax::Es(EsSyntax {
            jsx: true,
            decorators: true,
            ..Default::default()
        }),
    }
}

pub fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| TransformError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Parses `source` as an ES module and runs the scope resolver over it, so
/// identifiers bound by different declarations carry different contexts.
pub fn parse_module(path: &Path, source: String) -> Result<ParsedModule> {
    let cm: Lrc<SourceMap> = Default::default();
    let file = cm.new_source_file(FileName::Real(path.to_path_buf()).into(), source.clone());
    let syntax = syntax_for(path);

    let mut recovered = vec![];
    let parsed = parse_file_as_module(&file, syntax, EsVersion::latest(), None, &mut recovered);
    let mut module = match parsed {
        Ok(module) => module,
        Err(err) => {
            return Err(TransformError::Parse {
                path: path.to_path_buf(),
                message: err.kind().msg().to_string(),
            })
        }
    };
    if let Some(err) = recovered.first() {
        return Err(TransformError::Parse {
            path: path.to_path_buf(),
            message: err.kind().msg().to_string(),
        });
    }

    GLOBALS.set(&Globals::new(), || {
        let unresolved_mark = Mark::new();
        let top_level_mark = Mark::new();
        module.visit_mut_with(&mut resolver(
            unresolved_mark,
            top_level_mark,
            syntax.typescript(),
        ));
    });

    Ok(ParsedModule {
        path: path.to_path_buf(),
        source,
        cm,
        file,
        module,
    })
}

pub fn parse_path(path: &Path) -> Result<ParsedModule> {
    let source = read_source(path)?;
    parse_module(path, source)
}

impl ParsedModule {
    /// Byte range of `span` inside [`ParsedModule::source`].
    pub fn range(&self, span: Span) -> (usize, usize) {
        let base = self.file.start_pos.0;
        (
            (span.lo.0 - base) as usize,
            (span.hi.0 - base) as usize,
        )
    }

    pub fn offset(&self, pos: BytePos) -> usize {
        (pos.0 - self.file.start_pos.0) as usize
    }

    pub fn start(&self, span: Span) -> usize {
        self.range(span).0
    }

    pub fn end(&self, span: Span) -> usize {
        self.range(span).1
    }

    pub fn snippet(&self, span: Span) -> &str {
        let (lo, hi) = self.range(span);
        &self.source[lo..hi]
    }

    /// One-based line of the start of `span`.
    pub fn line(&self, span: Span) -> usize {
        self.cm.lookup_char_pos(span.lo).line
    }
}
