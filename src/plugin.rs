//! Host-facing plugin object: build lifecycle and hook shape selection.
//!
//! Exactly one hook shape rewrites files in a build; the other one is a no-op
//! for every file. The selected hook rewrites a file every time it is called,
//! so edits picked up by a watching host are transformed again.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Result, TransformError};
use crate::imports::resolve_relative;
use crate::mangle;
use crate::parse::read_source;
use crate::pipeline::transform_file;
use crate::registry::{Registry, RegistryBuilder};
use crate::replace::TransformOutput;

/// Which pair of host hooks performs the rewrite for this build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookShape {
    /// `resolve_id` flags a file, `load` reads and rewrites it.
    ResolveLoad,
    /// `transform` flags and rewrites in one call.
    Transform,
}

/// What the host reported about module metadata at the start of a build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleSignal {
    /// Metadata attached at resolution reaches the load hook.
    MetaPropagates,
    /// The host drops resolution metadata; everything happens in `transform`.
    MetaDropped,
}

impl LifecycleSignal {
    fn shape(self) -> HookShape {
        match self {
            LifecycleSignal::MetaPropagates => HookShape::ResolveLoad,
            LifecycleSignal::MetaDropped => HookShape::Transform,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct HookContext {
    pub ssr: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedId {
    pub path: PathBuf,
}

pub struct ServerFnPlugin {
    config: Config,
    registry: Option<Arc<Registry>>,
    shape: Option<HookShape>,
    flagged: HashSet<PathBuf>,
    salt: String,
}

impl ServerFnPlugin {
    pub fn new(config: Config) -> Self {
        let salt = mangle::build_salt(config.build_salt.as_deref());
        Self {
            config,
            registry: None,
            shape: None,
            flagged: HashSet::new(),
            salt,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(Self::new(Config::from_json(json)?))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Scans the project and resets every per-build flag.
    pub fn build_start(&mut self, cwd: &Path) -> Result<()> {
        let root = match &self.config.root {
            Some(root) if root.is_absolute() => root.clone(),
            Some(root) => cwd.join(root),
            None => cwd.to_path_buf(),
        };
        info!(
            root = %root.display(),
            development = self.config.development,
            "server function build starting"
        );
        let registry = RegistryBuilder::new(&self.config)?.build(&root)?;
        self.registry = Some(Arc::new(registry));
        self.shape = None;
        self.flagged.clear();
        self.salt = mangle::build_salt(self.config.build_salt.as_deref());
        Ok(())
    }

    /// Records how the host behaves. Only the first signal of a build counts.
    pub fn observe_lifecycle(&mut self, signal: LifecycleSignal) {
        if self.shape.is_none() {
            debug!(?signal, "hook shape selected");
            self.shape = Some(signal.shape());
        }
    }

    pub fn shape(&self) -> HookShape {
        self.shape.unwrap_or(HookShape::Transform)
    }

    pub fn registry(&self) -> Result<Arc<Registry>> {
        self.registry.clone().ok_or(TransformError::RegistryNotBuilt)
    }

    fn is_candidate(&self, path: &Path) -> bool {
        // exclusions apply below the project root, not to the directories above it
        let rel = self
            .registry
            .as_ref()
            .and_then(|r| path.strip_prefix(r.root()).ok())
            .unwrap_or(path);
        self.config.has_source_extension(path) && !self.config.is_excluded_path(rel)
    }

    /// Resolves relative source imports and flags them for `load`.
    pub fn resolve_id(&mut self, specifier: &str, importer: Option<&Path>) -> Option<ResolvedId> {
        if self.shape() != HookShape::ResolveLoad {
            return None;
        }
        let path = match importer {
            Some(importer) => resolve_relative(importer, specifier, &self.config.extensions)?,
            None => std::fs::canonicalize(specifier).ok()?,
        };
        if !self.is_candidate(&path) {
            return None;
        }
        self.flagged.insert(path.clone());
        Some(ResolvedId { path })
    }

    pub fn load(&self, path: &Path, ctx: HookContext) -> Result<Option<TransformOutput>> {
        if self.shape() != HookShape::ResolveLoad || !self.flagged.contains(path) {
            return Ok(None);
        }
        let source = read_source(path)?;
        self.run(path, source, ctx)
    }

    pub fn transform(
        &self,
        code: &str,
        path: &Path,
        ctx: HookContext,
    ) -> Result<Option<TransformOutput>> {
        if self.shape() != HookShape::Transform || !self.is_candidate(path) {
            return Ok(None);
        }
        self.run(path, code.to_string(), ctx)
    }

    fn run(&self, path: &Path, source: String, ctx: HookContext) -> Result<Option<TransformOutput>> {
        let side = self.config.target.resolve(ctx.ssr);
        let registry = self.registry()?;
        Ok(transform_file(&self.config, &registry, side, path, source)?.into_output())
    }

    /// Production-only rename of the runtime globals in an emitted chunk.
    pub fn render_chunk(&self, code: &str, chunk_name: &str) -> Result<Option<TransformOutput>> {
        if !self.config.is_production() {
            return Ok(None);
        }
        let out = mangle::rename_globals(
            code,
            chunk_name,
            &self.config.globals,
            &self.salt,
            self.config.source_maps,
        )?;
        Ok(out.into_output())
    }
}
