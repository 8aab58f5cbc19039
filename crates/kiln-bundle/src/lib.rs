//! Bundle assembly for kiln.
//!
//! Resolves the module graph from configured entry points, runs every asset
//! through the transform chain and emits script chunks, extracted
//! stylesheets, copied assets, icons and the HTML shell.

pub mod builder;
pub mod config;
pub mod error;
pub mod graph;
pub mod html;
pub mod icons;
pub mod namer;
pub mod output;
pub mod runtime;
pub mod scan;

pub use builder::{BuildResult, Bundler};
pub use config::{
    BuildConfig, EntryPoint, HtmlConfig, IconConfig, LintConfig, Mode, COMMONS_CHUNK,
};
pub use error::{AssetFailure, BuildError, BuildReport};
pub use graph::{Module, ModuleGraph, ModuleId};
pub use namer::{content_hash, output_file_name};
pub use output::{write_output, ArtifactKind, OutputArtifact, OutputSet, WriteSummary};
pub use runtime::render_hot_update;
