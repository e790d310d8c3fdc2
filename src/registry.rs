//! Project-wide discovery of server functions.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;
use swc_core::{common::Span, ecma::ast::*};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::Config;
use crate::error::{Result, TransformError};
use crate::parse::{parse_path, ParsedModule};
use crate::provenance::ImportBindings;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerFunctionInfo {
    pub id: String,
    pub source_file: PathBuf,
    /// Name other modules import it by.
    pub exported_name: String,
    /// Binding inside the defining module; what registration points at.
    pub local_name: String,
    pub requires_context: bool,
}

/// `<name>@<path>:<line>`, the identifier shared by call sites and registration.
pub fn format_id(name: &str, relative_path: &str, line: usize) -> String {
    format!("{name}@{relative_path}:{line}")
}

/// Path of `file` relative to `root`, `/`-separated.
pub fn relative_id_path(root: &Path, file: &Path) -> String {
    let rel = file.strip_prefix(root).unwrap_or(file);
    rel.to_string_lossy().replace('\\', "/")
}

pub type FileFunctions = BTreeMap<String, ServerFunctionInfo>;

/// File path → exported name → server function. Read-only once built.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    root: PathBuf,
    files: BTreeMap<PathBuf, FileFunctions>,
}

impl Registry {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            files: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Records (or overwrites) the functions of one file. Files without any
    /// server function are not stored.
    pub fn insert_file(&mut self, path: PathBuf, functions: FileFunctions) {
        if functions.is_empty() {
            self.files.remove(&path);
        } else {
            self.files.insert(path, functions);
        }
    }

    pub fn get(&self, path: &Path) -> Option<&FileFunctions> {
        self.files.get(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    pub fn files(&self) -> impl Iterator<Item = (&PathBuf, &FileFunctions)> {
        self.files.iter()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn function_count(&self) -> usize {
        self.files.values().map(|f| f.len()).sum()
    }

    pub fn find_by_id(&self, id: &str) -> Option<&ServerFunctionInfo> {
        self.files.values().flat_map(|f| f.values()).find(|info| info.id == id)
    }
}

// -----------------------------------------------------------------------------
// Builder
// -----------------------------------------------------------------------------

pub struct RegistryBuilder<'a> {
    config: &'a Config,
    pattern: Option<Regex>,
}

// A server-function-shaped declaration before export status is known.
struct Candidate {
    local: String,
    span: Span,
    requires_context: bool,
}

impl<'a> RegistryBuilder<'a> {
    pub fn new(config: &'a Config) -> Result<Self> {
        Ok(Self {
            config,
            pattern: config.detection.compile()?,
        })
    }

    fn is_excluded(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return false;
        }
        let name = entry.file_name().to_string_lossy();
        name.starts_with('.') || self.config.exclude_dirs.iter().any(|d| *d == name)
    }

    /// Walks `root` and records every exported server function found below it.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn build(&self, root: &Path) -> Result<Registry> {
        let root = std::fs::canonicalize(root).map_err(|source| TransformError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        let mut registry = Registry::new(root.clone());
        let mut scanned = 0usize;

        let walker = WalkDir::new(&root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !self.is_excluded(e));
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() || !self.config.has_source_extension(entry.path()) {
                continue;
            }
            scanned += 1;
            let parsed = match parse_path(entry.path()) {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!(path = %entry.path().display(), error = %err, "skipping unparsable file");
                    continue;
                }
            };
            let functions = self.scan_module(&parsed, &root);
            if !functions.is_empty() {
                debug!(
                    path = %entry.path().display(),
                    count = functions.len(),
                    "found server functions"
                );
            }
            registry.insert_file(entry.path().to_path_buf(), functions);
        }

        info!(
            root = %root.display(),
            files = scanned,
            modules = registry.file_count(),
            functions = registry.function_count(),
            "server function discovery finished"
        );
        Ok(registry)
    }

    /// Server functions exported by one parsed module.
    pub fn scan_module(&self, parsed: &ParsedModule, root: &Path) -> FileFunctions {
        let rel = relative_id_path(root, &parsed.path);
        let candidates = match &self.pattern {
            Some(pattern) if pattern.is_match(&rel) => self.pattern_candidates(parsed),
            Some(_) => return FileFunctions::new(),
            None => self.marker_candidates(parsed),
        };

        let mut out = FileFunctions::new();
        for (exported, candidate) in candidates {
            let id = format_id(&candidate.local, &rel, parsed.line(candidate.span));
            out.insert(
                exported.clone(),
                ServerFunctionInfo {
                    id,
                    source_file: parsed.path.clone(),
                    exported_name: exported,
                    local_name: candidate.local,
                    requires_context: candidate.requires_context,
                },
            );
        }
        out
    }

    fn marker_candidates(&self, parsed: &ParsedModule) -> Vec<(String, Candidate)> {
        let imports = ImportBindings::collect(&parsed.module);
        let lib = &self.config.library;
        if !imports.imports_from(&lib.specifier) {
            return vec![];
        }
        let check = |d: &VarDeclarator| -> Option<Candidate> {
            let name = d.name.as_ident()?;
            let Expr::Call(call) = &**d.init.as_ref()? else {
                return None;
            };
            if !imports.is_library_call(call, &lib.specifier, &lib.marker) {
                return None;
            }
            let [arg] = call.args.as_slice() else {
                return None;
            };
            if arg.spread.is_some() {
                return None;
            }
            let first_param = first_param_type(&arg.expr)?;
            Some(Candidate {
                local: name.id.sym.to_string(),
                span: d.span,
                requires_context: first_param.is_some_and(|ty| {
                    imports.is_library_type(ty, &lib.specifier, &lib.context_type)
                }),
            })
        };
        collect_exported(&parsed.module, |decl| match decl {
            Decl::Var(v) => v.decls.iter().filter_map(&check).collect(),
            _ => vec![],
        })
    }

    fn pattern_candidates(&self, parsed: &ParsedModule) -> Vec<(String, Candidate)> {
        let imports = ImportBindings::collect(&parsed.module);
        let lib = &self.config.library;
        let is_ctx = |ty: Option<&TsType>| {
            ty.is_some_and(|ty| imports.is_library_type(ty, &lib.specifier, &lib.context_type))
        };
        collect_exported(&parsed.module, |decl| match decl {
            Decl::Fn(f) => vec![Candidate {
                local: f.ident.sym.to_string(),
                span: f.function.span,
                requires_context: is_ctx(
                    f.function.params.first().and_then(|p| pat_type(&p.pat)),
                ),
            }],
            Decl::Var(v) => v
                .decls
                .iter()
                .filter_map(|d| {
                    let name = d.name.as_ident()?;
                    let first = first_param_type(d.init.as_ref()?)?;
                    Some(Candidate {
                        local: name.id.sym.to_string(),
                        span: d.span,
                        requires_context: is_ctx(first),
                    })
                })
                .collect(),
            _ => vec![],
        })
    }
}

/// Runs `check` over every top-level declaration and keeps the candidates
/// that are exported, either inline or through a local `export { .. }` list.
fn collect_exported<F>(module: &Module, check: F) -> Vec<(String, Candidate)>
where
    F: Fn(&Decl) -> Vec<Candidate>,
{
    let mut out = vec![];
    let mut locals: HashMap<String, Candidate> = HashMap::new();
    for item in &module.body {
        match item {
            ModuleItem::ModuleDecl(ModuleDecl::ExportDecl(export)) => {
                for c in check(&export.decl) {
                    out.push((c.local.clone(), c));
                }
            }
            ModuleItem::Stmt(Stmt::Decl(decl)) => {
                for c in check(decl) {
                    locals.insert(c.local.clone(), c);
                }
            }
            _ => {}
        }
    }
    for item in &module.body {
        let ModuleItem::ModuleDecl(ModuleDecl::ExportNamed(named)) = item else {
            continue;
        };
        if named.src.is_some() || named.type_only {
            continue;
        }
        for spec in &named.specifiers {
            let ExportSpecifier::Named(spec) = spec else {
                continue;
            };
            let ModuleExportName::Ident(orig) = &spec.orig else {
                continue;
            };
            let Some(c) = locals.get(orig.sym.as_ref()) else {
                continue;
            };
            let exported = match &spec.exported {
                Some(ModuleExportName::Ident(i)) => i.sym.to_string(),
                Some(ModuleExportName::Str(s)) => s.value.to_string(),
                None => orig.sym.to_string(),
            };
            out.push((
                exported,
                Candidate {
                    local: c.local.clone(),
                    span: c.span,
                    requires_context: c.requires_context,
                },
            ));
        }
    }
    out
}

/// For a function literal, the type annotation of its first parameter
/// (`Some(None)` when it has none). `None` when `expr` is not a function literal.
fn first_param_type(expr: &Expr) -> Option<Option<&TsType>> {
    match expr {
        Expr::Arrow(arrow) => Some(arrow.params.first().and_then(pat_type)),
        Expr::Fn(f) => Some(f.function.params.first().and_then(|p| pat_type(&p.pat))),
        _ => None,
    }
}

fn pat_type(pat: &Pat) -> Option<&TsType> {
    let ann = match pat {
        Pat::Ident(b) => b.type_ann.as_ref(),
        Pat::Object(o) => o.type_ann.as_ref(),
        Pat::Array(a) => a.type_ann.as_ref(),
        Pat::Assign(a) => return pat_type(&a.left),
        _ => None,
    }?;
    Some(&ann.type_ann)
}
