//! Where does a callee come from?
//!
//! Every import binding of a module is collected up-front, keyed by its
//! scope-resolved identifier. A call is attributed to a module export only
//! when its callee resolves to one of those bindings in a single hop; locals
//! that shadow an import carry a different syntax context and never match.

use std::collections::HashMap;

use swc_core::{
    common::Span,
    ecma::{
        ast::*,
        visit::{Visit, VisitWith},
    },
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Imported {
    Named(String),
    Default,
    Namespace,
}

#[derive(Clone, Debug)]
pub struct ImportBinding {
    pub source: String,
    pub imported: Imported,
    pub type_only: bool,
    pub span: Span,
}

#[derive(Default)]
pub struct ImportBindings {
    bindings: HashMap<Id, ImportBinding>,
}

struct ImportCollector<'a> {
    out: &'a mut HashMap<Id, ImportBinding>,
}

pub(crate) fn export_name_str(name: &ModuleExportName) -> String {
    match name {
        ModuleExportName::Ident(i) => i.sym.to_string(),
        ModuleExportName::Str(s) => s.value.to_string(),
    }
}

impl<'a> Visit for ImportCollector<'a> {
    fn visit_import_decl(&mut self, n: &ImportDecl) {
        let source = n.src.value.to_string();
        for s in &n.specifiers {
            match s {
                ImportSpecifier::Named(named) => {
                    let imported = named
                        .imported
                        .as_ref()
                        .map(export_name_str)
                        .unwrap_or_else(|| named.local.sym.to_string());
                    self.out.insert(
                        named.local.to_id(),
                        ImportBinding {
                            source: source.clone(),
                            imported: Imported::Named(imported),
                            type_only: n.type_only || named.is_type_only,
                            span: named.local.span,
                        },
                    );
                }
                ImportSpecifier::Default(def) => {
                    self.out.insert(
                        def.local.to_id(),
                        ImportBinding {
                            source: source.clone(),
                            imported: Imported::Default,
                            type_only: n.type_only,
                            span: def.local.span,
                        },
                    );
                }
                ImportSpecifier::Namespace(ns) => {
                    self.out.insert(
                        ns.local.to_id(),
                        ImportBinding {
                            source: source.clone(),
                            imported: Imported::Namespace,
                            type_only: n.type_only,
                            span: ns.local.span,
                        },
                    );
                }
            }
        }
    }

    // imports only live at module level
    fn visit_stmt(&mut self, _: &Stmt) {}
}

impl ImportBindings {
    pub fn collect(module: &Module) -> Self {
        let mut bindings = HashMap::new();
        module.visit_with(&mut ImportCollector { out: &mut bindings });
        Self { bindings }
    }

    pub fn get(&self, id: &Id) -> Option<&ImportBinding> {
        self.bindings.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Id, &ImportBinding)> {
        self.bindings.iter()
    }

    pub fn imports_from(&self, source: &str) -> bool {
        self.bindings.values().any(|b| b.source == source)
    }

    /// The export of `library` that `expr` names, if it is a value import
    /// (`func`, `alias` for `func as alias`) or a namespace member (`lib.func`).
    pub fn library_export<'a>(&'a self, expr: &'a Expr, library: &str) -> Option<&'a str> {
        match expr {
            Expr::Ident(i) => {
                let b = self.bindings.get(&i.to_id())?;
                if b.source != library || b.type_only {
                    return None;
                }
                match &b.imported {
                    Imported::Named(name) => Some(name.as_str()),
                    _ => None,
                }
            }
            Expr::Member(m) => {
                let (Expr::Ident(obj), MemberProp::Ident(prop)) = (&*m.obj, &m.prop) else {
                    return None;
                };
                let b = self.bindings.get(&obj.to_id())?;
                if b.source == library && !b.type_only && b.imported == Imported::Namespace {
                    Some(prop.sym.as_ref())
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    pub fn is_library_call(&self, call: &CallExpr, library: &str, export: &str) -> bool {
        match &call.callee {
            Callee::Expr(callee) => self.library_export(callee, library) == Some(export),
            _ => false,
        }
    }

    /// Whether `ty` is a reference to the type `export` of `library`, either
    /// `Context` through a (possibly type-only) import or `ns.Context`.
    pub fn is_library_type(&self, ty: &TsType, library: &str, export: &str) -> bool {
        let TsType::TsTypeRef(r) = ty else {
            return false;
        };
        match &r.type_name {
            TsEntityName::Ident(i) => self.bindings.get(&i.to_id()).is_some_and(|b| {
                b.source == library && b.imported == Imported::Named(export.to_string())
            }),
            TsEntityName::TsQualifiedName(q) => {
                let TsEntityName::Ident(ns) = &q.left else {
                    return false;
                };
                q.right.sym.as_ref() == export
                    && self.bindings.get(&ns.to_id()).is_some_and(|b| {
                        b.source == library && b.imported == Imported::Namespace
                    })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_module;
    use std::path::Path;

    struct Calls<'a> {
        imports: &'a ImportBindings,
        hits: Vec<String>,
        misses: Vec<String>,
    }

    impl Visit for Calls<'_> {
        fn visit_call_expr(&mut self, n: &CallExpr) {
            if let Callee::Expr(e) = &n.callee {
                let name = match &**e {
                    Expr::Ident(i) => i.sym.to_string(),
                    Expr::Member(m) => match &m.prop {
                        MemberProp::Ident(p) => p.sym.to_string(),
                        _ => "<computed>".into(),
                    },
                    _ => "<expr>".into(),
                };
                if self.imports.is_library_call(n, "serverfn", "func") {
                    self.hits.push(name);
                } else {
                    self.misses.push(name);
                }
            }
            n.visit_children_with(self);
        }
    }

    fn classify(src: &str) -> (Vec<String>, Vec<String>) {
        let parsed = parse_module(Path::new("/p/a.ts"), src.to_string()).unwrap();
        let imports = ImportBindings::collect(&parsed.module);
        let mut calls = Calls { imports: &imports, hits: vec![], misses: vec![] };
        parsed.module.visit_with(&mut calls);
        (calls.hits, calls.misses)
    }

    #[test]
    fn matches_named_alias_and_namespace_imports() {
        let (hits, misses) = classify(
            r#"
            import { func, func as server } from "serverfn";
            import * as sf from "serverfn";
            export const a = func(() => 1);
            export const b = server(() => 2);
            export const c = sf.func(() => 3);
            "#,
        );
        assert_eq!(hits, vec!["func", "server", "func"]);
        assert!(misses.is_empty());
    }

    #[test]
    fn ignores_other_modules_and_shadowing_locals() {
        let (hits, misses) = classify(
            r#"
            import { func } from "serverfn";
            import { func as other } from "serverfn/other";
            function wrap() {
                const func = (f) => f;
                return func(() => 1);
            }
            export const x = other(() => 2);
            export const y = func(() => 3);
            "#,
        );
        assert_eq!(hits, vec!["func"]);
        assert_eq!(misses, vec!["func", "other"]);
    }

    #[test]
    fn recognises_context_type() {
        let parsed = parse_module(
            Path::new("/p/a.ts"),
            r#"
            import type { Context } from "serverfn";
            import * as sf from "serverfn";
            type A = Context;
            type B = sf.Context;
            type C = Other;
            "#
            .to_string(),
        )
        .unwrap();
        let imports = ImportBindings::collect(&parsed.module);
        let mut hits = vec![];
        for item in &parsed.module.body {
            if let ModuleItem::Stmt(Stmt::Decl(Decl::TsTypeAlias(alias))) = item {
                hits.push(imports.is_library_type(&alias.type_ann, "serverfn", "Context"));
            }
        }
        assert_eq!(hits, vec![true, true, false]);
    }

    #[test]
    fn shadowed_context_type_is_not_the_library_type() {
        let parsed = parse_module(
            Path::new("/p/a.ts"),
            r#"
            import { func, type Context } from "serverfn";
            export const f = func(async <Context,>(x: Context) => x);
            export const g = func(async (x: Context) => x);
            "#
            .to_string(),
        )
        .unwrap();
        let imports = ImportBindings::collect(&parsed.module);
        let mut hits = vec![];
        for item in &parsed.module.body {
            let ModuleItem::ModuleDecl(ModuleDecl::ExportDecl(export)) = item else {
                continue;
            };
            let Decl::Var(var) = &export.decl else {
                continue;
            };
            let Some(Expr::Call(call)) = var.decls[0].init.as_deref() else {
                continue;
            };
            let Expr::Arrow(arrow) = &*call.args[0].expr else {
                continue;
            };
            let Pat::Ident(param) = &arrow.params[0] else {
                continue;
            };
            let ann = param.type_ann.as_ref().unwrap();
            hits.push(imports.is_library_type(&ann.type_ann, "serverfn", "Context"));
        }
        assert_eq!(hits, vec![false, true]);
    }
}
