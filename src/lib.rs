//! Build-time transform for server functions.
//!
//! Server functions are exported from ordinary modules (wrapped in the
//! library's marker, or living in files that match a configured pattern).
//! Client builds replace every call to one with a dispatch through a global
//! transport and reduce the defining module to stubs; server builds keep the
//! bodies and register them under a stable id. Production builds also inline
//! the library's runtime helpers and salt the global names per build.

pub mod config;
pub mod emit;
pub mod error;
pub mod imports;
pub mod mangle;
pub mod parse;
pub mod pipeline;
pub mod plugin;
pub mod provenance;
pub mod registry;
pub mod replace;
pub mod rewrite;

pub use config::{Config, Detection, GlobalNames, LibraryNames, Side, Target};
pub use error::{Result, TransformError};
pub use pipeline::{transform_file, transform_module};
pub use plugin::{HookContext, HookShape, LifecycleSignal, ResolvedId, ServerFnPlugin};
pub use registry::{format_id, Registry, RegistryBuilder, ServerFunctionInfo};
pub use replace::{Applied, TransformOutput};
