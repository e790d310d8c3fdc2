//! Maps a module's imports onto server functions defined elsewhere.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use swc_core::ecma::ast::{Expr, Id, MemberProp};
use tracing::debug;

use crate::provenance::{ImportBindings, Imported};
use crate::registry::{FileFunctions, Registry, ServerFunctionInfo};

#[derive(Clone, Debug)]
pub struct ImportedFunction {
    pub info: ServerFunctionInfo,
    /// The import binding the key refers to: the specifier's local
    /// identifier, or the namespace identifier for `ns.name` keys.
    pub binding: Id,
}

/// Local name (`fetchUser`, `api.getUser`) → server function it resolves to.
#[derive(Clone, Debug, Default)]
pub struct ImportedFunctionsMap {
    entries: HashMap<String, ImportedFunction>,
}

impl ImportedFunctionsMap {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: &str) -> Option<&ImportedFunction> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// Server function called through `callee`, matched by callee text and
    /// by the binding it resolves to.
    pub fn lookup(&self, callee: &Expr) -> Option<&ServerFunctionInfo> {
        let (key, binding) = match callee {
            Expr::Ident(i) => (i.sym.to_string(), i.to_id()),
            Expr::Member(m) => {
                let (Expr::Ident(obj), MemberProp::Ident(prop)) = (&*m.obj, &m.prop) else {
                    return None;
                };
                (format!("{}.{}", obj.sym, prop.sym), obj.to_id())
            }
            _ => return None,
        };
        self.entries
            .get(&key)
            .filter(|entry| entry.binding == binding)
            .map(|entry| &entry.info)
    }
}

// -----------------------------------------------------------------------------
// Path resolution
// -----------------------------------------------------------------------------

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for c in path.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

fn canonical(path: PathBuf) -> PathBuf {
    std::fs::canonicalize(&path).unwrap_or(path)
}

/// Resolves a relative specifier the way bundlers do: the exact file, then
/// each extension in order, then `index.<ext>` inside a directory. A `.js`
/// family specifier also finds its TypeScript source.
pub fn resolve_relative(importer: &Path, specifier: &str, extensions: &[String]) -> Option<PathBuf> {
    if !specifier.starts_with('.') {
        return None;
    }
    let base = importer.parent().unwrap_or_else(|| Path::new("."));
    let candidate = normalize(&base.join(specifier));

    if candidate.is_file() {
        return Some(canonical(candidate));
    }
    let ts_sources: &[&str] = match candidate.extension().and_then(|e| e.to_str()) {
        Some("js") => &["ts", "tsx"],
        Some("jsx") => &["tsx"],
        Some("mjs") => &["mts"],
        Some("cjs") => &["cts"],
        _ => &[],
    };
    for ext in ts_sources {
        let c = candidate.with_extension(ext);
        if c.is_file() {
            return Some(canonical(c));
        }
    }
    for ext in extensions {
        let c = with_suffix(&candidate, &format!(".{ext}"));
        if c.is_file() {
            return Some(canonical(c));
        }
    }
    if candidate.is_dir() {
        for ext in extensions {
            let c = candidate.join(format!("index.{ext}"));
            if c.is_file() {
                return Some(canonical(c));
            }
        }
    }
    None
}

// -----------------------------------------------------------------------------
// Import → server function mapping
// -----------------------------------------------------------------------------

/// Builds the map for the module at `importer`. `own` lists the server
/// functions the module defines itself; those names, and imports of the
/// module from itself, are never treated as imported, so local calls run
/// directly.
pub fn resolve_imports(
    importer: &Path,
    imports: &ImportBindings,
    registry: &Registry,
    extensions: &[String],
    own: Option<&FileFunctions>,
) -> ImportedFunctionsMap {
    let mut entries = HashMap::new();
    let mut resolved: HashMap<&str, Option<PathBuf>> = HashMap::new();

    for (id, binding) in imports.iter() {
        if binding.type_only {
            continue;
        }
        let target: &Option<PathBuf> = resolved
            .entry(binding.source.as_str())
            .or_insert_with(|| resolve_relative(importer, &binding.source, extensions));
        let Some(functions) = target
            .as_ref()
            .filter(|t| t.as_path() != importer)
            .and_then(|t| registry.get(t))
        else {
            continue;
        };
        match &binding.imported {
            Imported::Named(name) => {
                if let Some(info) = functions.get(name) {
                    debug!(local = %id.0, id = %info.id, "import resolves to server function");
                    entries.insert(
                        id.0.to_string(),
                        ImportedFunction {
                            info: info.clone(),
                            binding: id.clone(),
                        },
                    );
                }
            }
            Imported::Namespace => {
                for (name, info) in functions {
                    entries.insert(
                        format!("{}.{}", id.0, name),
                        ImportedFunction {
                            info: info.clone(),
                            binding: id.clone(),
                        },
                    );
                }
            }
            Imported::Default => {}
        }
    }

    if let Some(own) = own {
        for info in own.values() {
            entries.remove(&info.local_name);
            entries.remove(&info.exported_name);
        }
    }

    ImportedFunctionsMap { entries }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::parse::parse_module;
    use crate::registry::RegistryBuilder;
    use std::fs;

    fn project() -> (tempfile::TempDir, Registry, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src/server/users")).unwrap();
        fs::write(
            root.join("src/server/users/index.ts"),
            "import { func } from \"serverfn\";\n\
             export const getUser = func(async (id: string) => ({ id }));\n\
             export const helper = (x: number) => x;\n",
        )
        .unwrap();
        fs::write(
            root.join("src/server/phones.ts"),
            "import { func } from \"serverfn\";\n\
             export const getPhones = func(async (q: string) => [q]);\n",
        )
        .unwrap();
        fs::write(root.join("src/client.ts"), "").unwrap();
        let config = Config::default();
        let registry = RegistryBuilder::new(&config).unwrap().build(root).unwrap();
        let client = fs::canonicalize(root.join("src/client.ts")).unwrap();
        (dir, registry, client)
    }

    fn map_for(src: &str) -> ImportedFunctionsMap {
        let (_dir, registry, client) = project();
        let parsed = parse_module(&client, src.to_string()).unwrap();
        let imports = ImportBindings::collect(&parsed.module);
        resolve_imports(&client, &imports, &registry, &Config::default().extensions, None)
    }

    #[test]
    fn resolves_aliases_index_files_and_js_specifiers() {
        let map = map_for(
            r#"
            import { getUser as fetchUser, helper } from "./server/users";
            import { getPhones } from "./server/phones.js";
            import { nothing } from "./missing";
            import { getUser } from "some-package";
            "#,
        );
        let mut keys: Vec<_> = map.keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["fetchUser", "getPhones"]);
        assert!(map.get("fetchUser").unwrap().info.id.starts_with("getUser@src/server/users/index.ts:"));
    }

    #[test]
    fn namespace_imports_expand_to_qualified_keys() {
        let map = map_for(r#"import * as api from "./server/users/index";"#);
        let keys: Vec<_> = map.keys().cloned().collect();
        assert_eq!(keys, vec!["api.getUser"]);
    }

    #[test]
    fn type_only_imports_are_ignored() {
        let map = map_for(r#"import type { getUser } from "./server/users";"#);
        assert!(map.is_empty());
    }

    #[test]
    fn own_functions_stay_local_even_through_a_self_import() {
        let (_dir, registry, _client) = project();
        let phones = registry
            .files()
            .map(|(path, _)| path.clone())
            .find(|p| p.ends_with("src/server/phones.ts"))
            .unwrap();
        let parsed = parse_module(
            &phones,
            r#"
            import { func } from "serverfn";
            import * as self from "./phones";
            import { getUser } from "./users";
            export const getPhones = func(async (q: string) => [q]);
            export const both = (q: string) => [getPhones(q), self.getPhones(q), getUser(q)];
            "#
            .to_string(),
        )
        .unwrap();
        let imports = ImportBindings::collect(&parsed.module);
        let map = resolve_imports(
            &phones,
            &imports,
            &registry,
            &Config::default().extensions,
            registry.get(&phones),
        );
        let keys: Vec<_> = map.keys().cloned().collect();
        assert_eq!(keys, vec!["getUser"]);
    }

    #[test]
    fn bare_specifiers_never_resolve() {
        assert!(resolve_relative(Path::new("/a/b.ts"), "react", &Config::default().extensions).is_none());
    }
}
