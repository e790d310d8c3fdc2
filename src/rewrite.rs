//! Rewrite rules that run over a module's syntax tree and produce text
//! replacements: server-function call sites, client stubs, and the inlining
//! of the library's runtime helpers in production builds.

use std::collections::HashMap;

use swc_core::{
    common::{BytePos, Spanned},
    ecma::{
        ast::*,
        visit::{Visit, VisitWith},
    },
};

use crate::config::{GlobalNames, LibraryNames};
use crate::emit::js_string;
use crate::imports::ImportedFunctionsMap;
use crate::parse::ParsedModule;
use crate::provenance::{export_name_str, ImportBindings, Imported};
use crate::registry::FileFunctions;
use crate::replace::Replacement;

/// Which rewrites run for one file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Passes {
    /// Server-function calls become dispatch calls.
    pub call_sites: bool,
    /// Server-function bodies are replaced by dispatching stubs.
    pub client_stubs: bool,
    /// Registry assignments are appended.
    pub registration: bool,
    /// Marker unwrapping, `handle`/`setCallHandler` inlining, import excision.
    pub inline_helpers: bool,
}

/// `<dispatch>("<id>", <args>)`
pub fn dispatch_call(globals: &GlobalNames, id: &str, args: &str) -> String {
    format!("{}({}, {})", globals.dispatch_ref(), js_string(id), args)
}

fn dispatch_stub(globals: &GlobalNames, id: &str) -> String {
    format!("(...args) => {}", dispatch_call(globals, id, "args"))
}

/// Client replacement for a whole-module server file: one stub per export.
pub fn stub_module(functions: &FileFunctions, globals: &GlobalNames) -> String {
    let mut out = String::new();
    for info in functions.values() {
        out.push_str(&format!(
            "export const {} = {};\n",
            info.exported_name,
            dispatch_stub(globals, &info.id)
        ));
    }
    out
}

fn handle_inline(globals: &GlobalNames) -> String {
    format!(
        "((id, args, ctx) => {{ const fn = {registry}?.[id]; \
         if (!fn) throw new Error(\"Server function not found: \" + id); \
         return fn.{flag} ? fn(ctx, ...args) : fn(...args); }})",
        registry = globals.registry_ref(),
        flag = globals.context_flag,
    )
}

fn set_call_handler_inline(globals: &GlobalNames) -> String {
    format!("((handler) => {{ {} = handler; }})", globals.dispatch_ref())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Helper {
    Marker,
    Handle,
    SetCallHandler,
}

pub struct Rewriter<'a> {
    parsed: &'a ParsedModule,
    imports: &'a ImportBindings,
    imported: &'a ImportedFunctionsMap,
    library: &'a LibraryNames,
    globals: &'a GlobalNames,
    passes: Passes,
    // marker call start -> id of the server function it defines
    stubs: HashMap<BytePos, String>,
    // uses of each import binding outside stubbed bodies and inlined callees
    refs: HashMap<Id, usize>,
    out: Vec<Replacement>,
}

impl<'a> Rewriter<'a> {
    pub fn new(
        parsed: &'a ParsedModule,
        imports: &'a ImportBindings,
        imported: &'a ImportedFunctionsMap,
        library: &'a LibraryNames,
        globals: &'a GlobalNames,
        passes: Passes,
        own: &FileFunctions,
    ) -> Self {
        let mut rewriter = Self {
            parsed,
            imports,
            imported,
            library,
            globals,
            passes,
            stubs: HashMap::new(),
            refs: HashMap::new(),
            out: vec![],
        };
        if passes.client_stubs {
            rewriter.collect_stub_targets(own);
        }
        rewriter
    }

    fn needs_walk(&self) -> bool {
        (self.passes.call_sites && !self.imported.is_empty())
            || !self.stubs.is_empty()
            || (self.passes.inline_helpers && self.imports.imports_from(&self.library.specifier))
    }

    pub fn run(mut self) -> Vec<Replacement> {
        if !self.needs_walk() {
            return self.out;
        }
        let parsed = self.parsed;
        parsed.module.visit_with(&mut self);
        if self.passes.inline_helpers || !self.stubs.is_empty() {
            self.excise_imports();
        }
        self.out
    }

    // Top-level marker calls that define one of this module's server functions.
    fn collect_stub_targets(&mut self, own: &FileFunctions) {
        let by_local: HashMap<&str, &str> = own
            .values()
            .map(|info| (info.local_name.as_str(), info.id.as_str()))
            .collect();
        for item in &self.parsed.module.body {
            let var = match item {
                ModuleItem::ModuleDecl(ModuleDecl::ExportDecl(ExportDecl {
                    decl: Decl::Var(var),
                    ..
                })) => var,
                ModuleItem::Stmt(Stmt::Decl(Decl::Var(var))) => var,
                _ => continue,
            };
            for d in &var.decls {
                let Some(name) = d.name.as_ident() else {
                    continue;
                };
                let Some(id) = by_local.get(name.id.sym.as_ref()) else {
                    continue;
                };
                let Some(Expr::Call(call)) = d.init.as_deref() else {
                    continue;
                };
                if call.args.len() == 1
                    && self
                        .imports
                        .is_library_call(call, &self.library.specifier, &self.library.marker)
                {
                    self.stubs.insert(call.span.lo, id.to_string());
                }
            }
        }
    }

    fn helper(&self, callee: &Expr) -> Option<Helper> {
        let export = self.imports.library_export(callee, &self.library.specifier)?;
        if export == self.library.marker {
            Some(Helper::Marker)
        } else if export == self.library.handle {
            Some(Helper::Handle)
        } else if export == self.library.set_call_handler {
            Some(Helper::SetCallHandler)
        } else {
            None
        }
    }

    // Replaces the callee (and type arguments) of `call`.
    fn replace_callee(&mut self, call: &CallExpr, callee: &Expr, content: String) {
        let start = self.parsed.start(call.span);
        let end = match &call.type_args {
            Some(type_args) => self.parsed.end(type_args.span),
            None => self.parsed.end(callee.span()),
        };
        self.out.push(Replacement::new(start, end, content));
    }

    fn rewrite_call_site(&mut self, call: &CallExpr, id: &str) {
        let call_start = self.parsed.start(call.span);
        let call_end = self.parsed.end(call.span);
        let head = format!("{}({}, [", self.globals.dispatch_ref(), js_string(id));
        match (call.args.first(), call.args.last()) {
            (Some(first), Some(last)) => {
                let args_start = first.spread.map(|s| s.lo).unwrap_or_else(|| first.expr.span().lo);
                let args_end = self.parsed.end(last.expr.span());
                self.out
                    .push(Replacement::new(call_start, self.parsed.offset(args_start), head));
                self.out.push(Replacement::new(args_end, call_end, "])"));
            }
            _ => self
                .out
                .push(Replacement::new(call_start, call_end, format!("{head}])"))),
        }
    }

    fn inline_helper(&mut self, call: &CallExpr, callee: &Expr, helper: Helper) -> bool {
        if call.args.iter().any(|a| a.spread.is_some()) {
            return false;
        }
        match helper {
            Helper::Marker if call.args.len() == 1 => {
                self.replace_callee(call, callee, String::new());
            }
            Helper::Handle if (2..=3).contains(&call.args.len()) => {
                self.replace_callee(call, callee, handle_inline(self.globals));
            }
            Helper::SetCallHandler if call.args.len() == 1 => {
                self.replace_callee(call, callee, set_call_handler_inline(self.globals));
            }
            _ => return false,
        }
        true
    }

    fn visit_args(&mut self, call: &CallExpr) {
        for arg in &call.args {
            arg.visit_with(self);
        }
    }

    fn is_helper_binding(&self, id: &Id) -> bool {
        self.imports.get(id).is_some_and(|b| {
            b.source == self.library.specifier
                && matches!(&b.imported, Imported::Named(name) if self.library.is_inlined_helper(name))
        })
    }

    fn stray_helper_refs(&self) -> usize {
        self.refs
            .iter()
            .filter(|(id, _)| self.is_helper_binding(id))
            .map(|(_, n)| n)
            .sum()
    }

    // Library import whose every specifier is a helper that production inlines.
    fn is_inlined_library_import(&self, decl: &ImportDecl) -> bool {
        decl.src.value.to_string() == self.library.specifier
            && !decl.type_only
            && decl.specifiers.iter().all(|s| match s {
                ImportSpecifier::Named(named) if !named.is_type_only => {
                    let imported = named
                        .imported
                        .as_ref()
                        .map(export_name_str)
                        .unwrap_or_else(|| named.local.sym.to_string());
                    self.library.is_inlined_helper(&imported)
                }
                _ => false,
            })
    }

    /// Removes library imports made dead by helper inlining, and on stubbed
    /// client modules every import no surviving code refers to.
    fn excise_imports(&mut self) {
        let source = &self.parsed.source;
        let helpers_unused = self.passes.inline_helpers && self.stray_helper_refs() == 0;
        let stubbed = !self.stubs.is_empty();
        for item in &self.parsed.module.body {
            let ModuleItem::ModuleDecl(ModuleDecl::Import(decl)) = item else {
                continue;
            };
            // side-effect imports stay
            if decl.specifiers.is_empty() {
                continue;
            }
            let dead_helpers = helpers_unused && self.is_inlined_library_import(decl);
            let unreferenced = stubbed
                && decl
                    .specifiers
                    .iter()
                    .all(|s| !self.refs.contains_key(&specifier_local(s).to_id()));
            if !dead_helpers && !unreferenced {
                continue;
            }
            let (start, mut end) = self.parsed.range(decl.span);
            let rest = &source[end..];
            if rest.starts_with("\r\n") {
                end += 2;
            } else if rest.starts_with('\n') {
                end += 1;
            }
            self.out.push(Replacement::remove(start, end));
        }
    }
}

fn specifier_local(s: &ImportSpecifier) -> &Ident {
    match s {
        ImportSpecifier::Named(named) => &named.local,
        ImportSpecifier::Default(def) => &def.local,
        ImportSpecifier::Namespace(ns) => &ns.local,
    }
}

impl Visit for Rewriter<'_> {
    fn visit_import_decl(&mut self, _: &ImportDecl) {}

    fn visit_ident(&mut self, n: &Ident) {
        let id = n.to_id();
        if self.imports.get(&id).is_some() {
            *self.refs.entry(id).or_default() += 1;
        }
    }

    fn visit_call_expr(&mut self, n: &CallExpr) {
        let Callee::Expr(callee) = &n.callee else {
            n.visit_children_with(self);
            return;
        };

        if let Some(id) = self.stubs.get(&n.span.lo).cloned() {
            // the body is server-only; nothing inside it survives
            if self.passes.inline_helpers {
                self.replace_callee(n, callee, String::new());
            } else {
                callee.visit_with(self);
                n.type_args.visit_with(self);
            }
            let arg = &n.args[0];
            let (start, end) = self.parsed.range(arg.expr.span());
            self.out
                .push(Replacement::new(start, end, dispatch_stub(self.globals, &id)));
            return;
        }

        if self.passes.call_sites {
            if let Some(info) = self.imported.lookup(callee) {
                let id = info.id.clone();
                self.rewrite_call_site(n, &id);
                self.visit_args(n);
                return;
            }
        }

        if self.passes.inline_helpers {
            if let Some(helper) = self.helper(callee) {
                if self.inline_helper(n, callee, helper) {
                    self.visit_args(n);
                    return;
                }
            }
        }

        n.visit_children_with(self);
    }
}
