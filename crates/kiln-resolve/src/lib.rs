//! Import specifier resolution for kiln.
//!
//! Maps logical import specifiers to concrete files on disk, applying
//! short-name aliases, extension inference, directory indexes and
//! `node_modules` package lookup.

pub mod alias;
pub mod package_json;
pub mod resolver;

pub use alias::AliasTable;
pub use package_json::PackageJson;
pub use resolver::{ResolveError, ResolveOptions, Resolver};
