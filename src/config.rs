use std::path::PathBuf;

use regex::Regex;
use serde::Deserialize;

use crate::error::Result;

/// Which half of a server-function module survives the transform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Client,
    Server,
    /// Decided per hook call from the host's `ssr` flag.
    #[default]
    Inferred,
}

/// Concrete side after resolving [`Target::Inferred`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Client,
    Server,
}

impl Target {
    pub fn resolve(self, ssr: bool) -> Side {
        match self {
            Target::Client => Side::Client,
            Target::Server => Side::Server,
            Target::Inferred if ssr => Side::Server,
            Target::Inferred => Side::Client,
        }
    }
}

/// How server functions are discovered. The two modes never combine.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Detection {
    /// Exported declarations wrapped in the library's marker call.
    #[default]
    Marker,
    /// Every exported function of a file whose root-relative path matches.
    FilePattern { pattern: String },
}

impl Detection {
    pub fn compile(&self) -> Result<Option<Regex>> {
        match self {
            Detection::Marker => Ok(None),
            Detection::FilePattern { pattern } => Ok(Some(Regex::new(pattern)?)),
        }
    }
}

/// Process-wide names the generated code talks to.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalNames {
    pub dispatch: String,
    pub registry: String,
    pub context_flag: String,
}

impl Default for GlobalNames {
    fn default() -> Self {
        Self {
            dispatch: "__SERVERFN_CALL__".to_string(),
            registry: "__SERVERFN_REGISTRY__".to_string(),
            context_flag: "__serverfnContext".to_string(),
        }
    }
}

impl GlobalNames {
    pub fn dispatch_ref(&self) -> String {
        format!("globalThis.{}", self.dispatch)
    }

    pub fn registry_ref(&self) -> String {
        format!("globalThis.{}", self.registry)
    }
}

/// The library's module specifier and the exports the transformer knows about.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LibraryNames {
    pub specifier: String,
    pub marker: String,
    pub handle: String,
    pub set_call_handler: String,
    pub context_type: String,
}

impl Default for LibraryNames {
    fn default() -> Self {
        Self {
            specifier: "serverfn".to_string(),
            marker: "func".to_string(),
            handle: "handle".to_string(),
            set_call_handler: "setCallHandler".to_string(),
            context_type: "Context".to_string(),
        }
    }
}

impl LibraryNames {
    /// Value exports that production builds replace with inline code.
    pub fn is_inlined_helper(&self, name: &str) -> bool {
        name == self.marker || name == self.handle || name == self.set_call_handler
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub development: bool,
    pub target: Target,
    pub root: Option<PathBuf>,
    pub library: LibraryNames,
    pub exclude_dirs: Vec<String>,
    pub extensions: Vec<String>,
    pub source_maps: bool,
    pub detection: Detection,
    pub globals: GlobalNames,
    /// Fixes the production rename suffix; random per build when absent.
    pub build_salt: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            development: true,
            target: Target::default(),
            root: None,
            library: LibraryNames::default(),
            exclude_dirs: vec![
                "node_modules".to_string(),
                "dist".to_string(),
                "build".to_string(),
            ],
            extensions: ["ts", "tsx", "mts", "cts", "js", "jsx", "mjs", "cjs"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            source_maps: true,
            detection: Detection::default(),
            globals: GlobalNames::default(),
            build_salt: None,
        }
    }
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn is_production(&self) -> bool {
        !self.development
    }

    pub fn has_source_extension(&self, path: &std::path::Path) -> bool {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if name.ends_with(".d.ts") || name.ends_with(".d.mts") || name.ends_with(".d.cts") {
            return false;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.extensions.iter().any(|e| e == ext))
            .unwrap_or(false)
    }

    /// Whether any directory component of `path` is hidden or listed in
    /// `exclude_dirs`.
    pub fn is_excluded_path(&self, path: &std::path::Path) -> bool {
        let Some(parent) = path.parent() else {
            return false;
        };
        parent.components().any(|c| match c {
            std::path::Component::Normal(name) => {
                let name = name.to_string_lossy();
                (name.starts_with('.') && name.len() > 1)
                    || self.exclude_dirs.iter().any(|d| *d == name)
            }
            _ => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_development_and_marker_detection() {
        let config = Config::from_json("{}").unwrap();
        assert!(config.development);
        assert_eq!(config.target, Target::Inferred);
        assert_eq!(config.detection, Detection::Marker);
        assert_eq!(config.library.specifier, "serverfn");
        assert!(config.source_maps);
    }

    #[test]
    fn reads_camel_case_options() {
        let config = Config::from_json(
            r#"{
                "development": false,
                "target": "server",
                "library": { "specifier": "@acme/rpc" },
                "detection": { "kind": "filePattern", "pattern": "\\.server\\.ts$" },
                "globals": { "dispatch": "__CALL__" },
                "buildSalt": "abc"
            }"#,
        )
        .unwrap();
        assert!(config.is_production());
        assert_eq!(config.target, Target::Server);
        assert_eq!(config.library.specifier, "@acme/rpc");
        assert_eq!(config.library.marker, "func");
        assert_eq!(config.globals.dispatch, "__CALL__");
        assert_eq!(config.globals.registry, "__SERVERFN_REGISTRY__");
        assert_eq!(config.build_salt.as_deref(), Some("abc"));
        assert!(config.detection.compile().unwrap().is_some());
    }

    #[test]
    fn rejects_bad_pattern() {
        let detection = Detection::FilePattern { pattern: "(".into() };
        assert!(detection.compile().is_err());
    }

    #[test]
    fn inferred_target_follows_ssr_flag() {
        assert_eq!(Target::Inferred.resolve(true), Side::Server);
        assert_eq!(Target::Inferred.resolve(false), Side::Client);
        assert_eq!(Target::Client.resolve(true), Side::Client);
    }

    #[test]
    fn skips_declaration_files() {
        let config = Config::default();
        assert!(config.has_source_extension(std::path::Path::new("a/b.ts")));
        assert!(!config.has_source_extension(std::path::Path::new("a/b.d.ts")));
        assert!(!config.has_source_extension(std::path::Path::new("a/b.css")));
    }

    #[test]
    fn excludes_vendor_and_hidden_dirs() {
        let config = Config::default();
        assert!(config.is_excluded_path(std::path::Path::new("/p/node_modules/x/index.js")));
        assert!(config.is_excluded_path(std::path::Path::new("/p/.cache/a.ts")));
        assert!(!config.is_excluded_path(std::path::Path::new("/p/src/.hidden.ts")));
        assert!(!config.is_excluded_path(std::path::Path::new("/p/src/api.ts")));
    }
}
