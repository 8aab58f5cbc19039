//! Specifier resolution.
//!
//! Resolution order for a specifier requested from an importer:
//!
//! 1. Registered aliases (`@/util`, `@core/math`)
//! 2. Relative (`./a`, `../b`) and absolute (`/abs/c`) paths
//! 3. Bare package names through `node_modules`
//!
//! Whatever the route, the result is the canonical physical path, so two
//! specifiers naming the same file always resolve to the same value.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::alias::{join_segments, AliasTable};
use crate::package_json::PackageJson;

/// Resolver options.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Alias table applied before any other resolution
    pub aliases: AliasTable,

    /// Extensions tried, in order, for extensionless specifiers (with leading dot)
    pub extensions: Vec<String>,

    /// Fail when more than one extension matches instead of taking the first
    pub strict_extensions: bool,

    /// Directory name searched for bare package specifiers
    pub modules_dir: String,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            aliases: AliasTable::default(),
            extensions: vec![".js".to_string(), ".json".to_string()],
            strict_extensions: false,
            modules_dir: "node_modules".to_string(),
        }
    }
}

/// Errors that can occur while resolving a specifier.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolveError {
    #[error("Module not found: '{specifier}' from {}", .from.display())]
    NotFound { specifier: String, from: PathBuf },

    #[error(
        "Ambiguous extension for '{specifier}' from {}: {}",
        .from.display(),
        .candidates.join(", ")
    )]
    AmbiguousExtension {
        specifier: String,
        from: PathBuf,
        candidates: Vec<String>,
    },

    #[error("Invalid package manifest for '{specifier}': {message}")]
    Package { specifier: String, message: String },
}

/// Import resolver.
#[derive(Debug)]
pub struct Resolver {
    options: ResolveOptions,

    /// Memoized resolutions keyed by (requesting directory, specifier)
    cache: RwLock<HashMap<(PathBuf, String), PathBuf>>,
}

impl Resolver {
    /// Create a new resolver.
    pub fn new(options: ResolveOptions) -> Self {
        Self {
            options,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Options this resolver was created with.
    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    /// Resolve `specifier` as imported by the file `importer`.
    pub fn resolve(&self, specifier: &str, importer: &Path) -> Result<PathBuf, ResolveError> {
        let dir = importer.parent().unwrap_or(Path::new("."));
        self.resolve_from_dir(specifier, dir)
    }

    /// Resolve `specifier` relative to the directory `dir`.
    pub fn resolve_from_dir(&self, specifier: &str, dir: &Path) -> Result<PathBuf, ResolveError> {
        let key = (dir.to_path_buf(), specifier.to_string());
        if let Ok(cache) = self.cache.read() {
            if let Some(hit) = cache.get(&key) {
                return Ok(hit.clone());
            }
        }

        let resolved = self.resolve_uncached(specifier, dir)?;
        tracing::trace!("resolved '{}' -> {}", specifier, resolved.display());

        if let Ok(mut cache) = self.cache.write() {
            cache.insert(key, resolved.clone());
        }

        Ok(resolved)
    }

    /// Drop all memoized resolutions (files may have been added or removed).
    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }

    fn resolve_uncached(&self, specifier: &str, dir: &Path) -> Result<PathBuf, ResolveError> {
        if let Some(target) = self.options.aliases.apply(specifier) {
            return self.resolve_path(&target, specifier, dir);
        }

        if specifier.starts_with("./")
            || specifier.starts_with("../")
            || specifier == "."
            || specifier == ".."
        {
            let target = join_segments(dir, specifier);
            return self.resolve_path(&target, specifier, dir);
        }

        if Path::new(specifier).is_absolute() {
            return self.resolve_path(Path::new(specifier), specifier, dir);
        }

        self.resolve_bare(specifier, dir)
    }

    /// Resolve a concrete path: exact file, inferred extension, or directory index.
    fn resolve_path(
        &self,
        target: &Path,
        specifier: &str,
        from: &Path,
    ) -> Result<PathBuf, ResolveError> {
        if target.is_file() {
            return canonical(target, specifier, from);
        }

        if let Some(found) = self.try_extensions(target, specifier, from)? {
            return Ok(found);
        }

        if target.is_dir() {
            return self.resolve_directory(target, specifier, from);
        }

        Err(ResolveError::NotFound {
            specifier: specifier.to_string(),
            from: from.to_path_buf(),
        })
    }

    /// Try each configured extension appended to `target`.
    fn try_extensions(
        &self,
        target: &Path,
        specifier: &str,
        from: &Path,
    ) -> Result<Option<PathBuf>, ResolveError> {
        let Some(file_name) = target.file_name().and_then(|n| n.to_str()) else {
            return Ok(None);
        };

        let mut matches = Vec::new();
        for ext in &self.options.extensions {
            let candidate = target.with_file_name(format!("{file_name}{ext}"));
            if candidate.is_file() {
                if !self.options.strict_extensions {
                    return canonical(&candidate, specifier, from).map(Some);
                }
                matches.push(candidate);
            }
        }

        match matches.len() {
            0 => Ok(None),
            1 => canonical(&matches[0], specifier, from).map(Some),
            _ => Err(ResolveError::AmbiguousExtension {
                specifier: specifier.to_string(),
                from: from.to_path_buf(),
                candidates: matches.iter().map(|p| p.display().to_string()).collect(),
            }),
        }
    }

    /// Resolve a directory through its manifest entry or `index` file.
    fn resolve_directory(
        &self,
        dir: &Path,
        specifier: &str,
        from: &Path,
    ) -> Result<PathBuf, ResolveError> {
        let manifest = PackageJson::read_from_dir(dir).map_err(|e| ResolveError::Package {
            specifier: specifier.to_string(),
            message: e.to_string(),
        })?;

        if let Some(pkg) = manifest {
            for field in pkg.entry_fields() {
                let entry = join_segments(dir, field);
                if entry.is_file() {
                    return canonical(&entry, specifier, from);
                }
                if let Some(found) = self.try_extensions(&entry, specifier, from)? {
                    return Ok(found);
                }
            }
        }

        let index = dir.join("index");
        if let Some(found) = self.try_extensions(&index, specifier, from)? {
            return Ok(found);
        }

        Err(ResolveError::NotFound {
            specifier: specifier.to_string(),
            from: from.to_path_buf(),
        })
    }

    /// Resolve a bare package specifier by walking up `node_modules` directories.
    fn resolve_bare(&self, specifier: &str, dir: &Path) -> Result<PathBuf, ResolveError> {
        let (package, subpath) = split_package_specifier(specifier);

        for ancestor in dir.ancestors() {
            let package_dir = ancestor.join(&self.options.modules_dir).join(package);
            if !package_dir.is_dir() {
                continue;
            }

            return match subpath {
                Some(rest) => self.resolve_path(&join_segments(&package_dir, rest), specifier, dir),
                None => self.resolve_directory(&package_dir, specifier, dir),
            };
        }

        Err(ResolveError::NotFound {
            specifier: specifier.to_string(),
            from: dir.to_path_buf(),
        })
    }
}

/// Split `@scope/pkg/sub/path` into (`@scope/pkg`, `Some("sub/path")`).
fn split_package_specifier(specifier: &str) -> (&str, Option<&str>) {
    let name_segments = if specifier.starts_with('@') { 2 } else { 1 };

    let mut end = specifier.len();
    let mut seen = 0;
    for (idx, ch) in specifier.char_indices() {
        if ch == '/' {
            seen += 1;
            if seen == name_segments {
                end = idx;
                break;
            }
        }
    }

    if end == specifier.len() {
        (specifier, None)
    } else {
        (&specifier[..end], Some(&specifier[end + 1..]))
    }
}

fn canonical(path: &Path, specifier: &str, from: &Path) -> Result<PathBuf, ResolveError> {
    fs::canonicalize(path).map_err(|_| ResolveError::NotFound {
        specifier: specifier.to_string(),
        from: from.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn resolver_with_aliases(src: &Path) -> Resolver {
        Resolver::new(ResolveOptions {
            aliases: AliasTable::new([
                ("@".to_string(), src.to_path_buf()),
                ("@core".to_string(), src.join("core")),
            ]),
            ..Default::default()
        })
    }

    #[test]
    fn alias_and_relative_resolve_identically() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        write(&src.join("core/math.js"), "export const x = 1;");
        write(&src.join("pages/home.js"), "");

        let resolver = resolver_with_aliases(&src);
        let importer = src.join("pages/home.js");

        let via_alias = resolver.resolve("@core/math", &importer).unwrap();
        let via_root_alias = resolver.resolve("@/core/math.js", &importer).unwrap();
        let via_relative = resolver.resolve("../core/math", &importer).unwrap();

        assert_eq!(via_alias, via_relative);
        assert_eq!(via_root_alias, via_relative);
    }

    #[test]
    fn infers_extensions_in_declared_order() {
        let temp = tempdir().unwrap();
        write(&temp.path().join("data.js"), "");
        write(&temp.path().join("data.json"), "{}");
        let importer = temp.path().join("index.js");

        let resolver = Resolver::new(ResolveOptions::default());
        let resolved = resolver.resolve("./data", &importer).unwrap();
        assert_eq!(resolved.file_name().unwrap(), "data.js");

        let resolver = Resolver::new(ResolveOptions {
            extensions: vec![".json".to_string(), ".js".to_string()],
            ..Default::default()
        });
        let resolved = resolver.resolve("./data", &importer).unwrap();
        assert_eq!(resolved.file_name().unwrap(), "data.json");
    }

    #[test]
    fn strict_mode_reports_ambiguous_extension() {
        let temp = tempdir().unwrap();
        write(&temp.path().join("data.js"), "");
        write(&temp.path().join("data.json"), "{}");

        let resolver = Resolver::new(ResolveOptions {
            strict_extensions: true,
            ..Default::default()
        });

        let err = resolver
            .resolve("./data", &temp.path().join("index.js"))
            .unwrap_err();
        assert!(matches!(err, ResolveError::AmbiguousExtension { ref candidates, .. } if candidates.len() == 2));
    }

    #[test]
    fn reports_missing_module() {
        let temp = tempdir().unwrap();
        let resolver = Resolver::new(ResolveOptions::default());

        let err = resolver
            .resolve("./nope", &temp.path().join("index.js"))
            .unwrap_err();
        assert!(matches!(err, ResolveError::NotFound { ref specifier, .. } if specifier == "./nope"));
        assert!(err.to_string().contains("./nope"));
    }

    #[test]
    fn resolves_directory_index() {
        let temp = tempdir().unwrap();
        write(&temp.path().join("widgets/index.js"), "");

        let resolver = Resolver::new(ResolveOptions::default());
        let resolved = resolver
            .resolve("./widgets", &temp.path().join("main.js"))
            .unwrap();
        assert!(resolved.ends_with("widgets/index.js"));
    }

    #[test]
    fn resolves_package_from_node_modules() {
        let temp = tempdir().unwrap();
        let pkg = temp.path().join("node_modules/tiny");
        write(&pkg.join("package.json"), r#"{ "name": "tiny", "main": "lib/main" }"#);
        write(&pkg.join("lib/main.js"), "");
        write(&pkg.join("extra.js"), "");
        write(&temp.path().join("src/app/main.js"), "");

        let resolver = Resolver::new(ResolveOptions::default());
        let importer = temp.path().join("src/app/main.js");

        assert!(resolver
            .resolve("tiny", &importer)
            .unwrap()
            .ends_with("lib/main.js"));
        assert!(resolver
            .resolve("tiny/extra", &importer)
            .unwrap()
            .ends_with("tiny/extra.js"));
    }

    #[test]
    fn splits_scoped_package_specifiers() {
        assert_eq!(split_package_specifier("lodash"), ("lodash", None));
        assert_eq!(
            split_package_specifier("lodash/fp/map"),
            ("lodash", Some("fp/map"))
        );
        assert_eq!(split_package_specifier("@scope/pkg"), ("@scope/pkg", None));
        assert_eq!(
            split_package_specifier("@scope/pkg/sub"),
            ("@scope/pkg", Some("sub"))
        );
    }

    #[test]
    fn caches_until_cleared() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("a.js");
        write(&file, "");

        let resolver = Resolver::new(ResolveOptions::default());
        let importer = temp.path().join("index.js");
        assert!(resolver.resolve("./a", &importer).is_ok());

        fs::remove_file(&file).unwrap();
        assert!(resolver.resolve("./a", &importer).is_ok());

        resolver.clear_cache();
        assert!(resolver.resolve("./a", &importer).is_err());
    }
}
