//! One file through the transform: parse, pick passes, collect replacements,
//! apply them.

use std::path::Path;

use tracing::debug;

use crate::config::{Config, Detection, Side};
use crate::emit;
use crate::error::{Result, TransformError};
use crate::imports::resolve_imports;
use crate::parse::{parse_module, ParsedModule};
use crate::provenance::ImportBindings;
use crate::registry::{FileFunctions, Registry, RegistryBuilder};
use crate::replace::{apply, Applied, MapSource, Replacement};
use crate::rewrite::{stub_module, Passes, Rewriter};

pub fn select_passes(config: &Config, side: Side, defines_functions: bool) -> Passes {
    Passes {
        call_sites: side == Side::Client,
        client_stubs: side == Side::Client && defines_functions,
        registration: side == Side::Server && defines_functions,
        inline_helpers: config.is_production(),
    }
}

/// Transforms `source`, the contents of `path`, for `side`.
#[tracing::instrument(level = "trace", skip_all, fields(path = %path.display()))]
pub fn transform_file(
    config: &Config,
    registry: &Registry,
    side: Side,
    path: &Path,
    source: String,
) -> Result<Applied> {
    let path = std::fs::canonicalize(path).map_err(|source| TransformError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed = parse_module(&path, source)?;
    transform_module(config, registry, side, &parsed)
}

pub fn transform_module(
    config: &Config,
    registry: &Registry,
    side: Side,
    parsed: &ParsedModule,
) -> Result<Applied> {
    // files outside the scanned tree (or created after the scan) are checked on the spot
    let scanned;
    let own: &FileFunctions = match registry.get(&parsed.path) {
        Some(functions) => functions,
        None => {
            scanned = RegistryBuilder::new(config)?.scan_module(parsed, registry.root());
            &scanned
        }
    };
    let passes = select_passes(config, side, !own.is_empty());
    let map_source = config.source_maps.then(|| MapSource::for_module(parsed));

    if passes.client_stubs && matches!(config.detection, Detection::FilePattern { .. }) {
        debug!(
            path = %parsed.path.display(),
            functions = own.len(),
            "replacing server module with client stubs"
        );
        let whole = Replacement::new(0, parsed.source.len(), stub_module(own, &config.globals));
        return apply(&parsed.source, vec![whole], map_source.as_ref());
    }

    let imports = ImportBindings::collect(&parsed.module);
    let imported = if passes.call_sites {
        resolve_imports(&parsed.path, &imports, registry, &config.extensions, Some(own))
    } else {
        Default::default()
    };

    let mut replacements = Rewriter::new(
        parsed,
        &imports,
        &imported,
        &config.library,
        &config.globals,
        passes,
        own,
    )
    .run();
    if passes.registration {
        replacements.extend(emit::registration(parsed.source.len(), own, &config.globals));
    }

    debug!(
        path = %parsed.path.display(),
        ?side,
        imported = imported.len(),
        defined = own.len(),
        replacements = replacements.len(),
        "transformed module"
    );
    apply(&parsed.source, replacements, map_source.as_ref())
}
