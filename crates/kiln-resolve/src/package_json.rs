//! Package manifest reading for `node_modules` resolution.

use std::fs;
use std::path::Path;

use serde::Deserialize;

/// The subset of `package.json` used to locate a package entry.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct PackageJson {
    /// Package name
    #[serde(default)]
    pub name: Option<String>,

    /// ES module entry (preferred for bundling)
    #[serde(default)]
    pub module: Option<String>,

    /// CommonJS entry
    #[serde(default)]
    pub main: Option<String>,
}

/// Errors reading a package manifest.
#[derive(Debug, thiserror::Error)]
pub enum PackageJsonError {
    #[error("Failed to read {path}: {message}")]
    Read { path: String, message: String },

    #[error("Invalid JSON in {path}: {message}")]
    Parse { path: String, message: String },
}

impl PackageJson {
    /// Read `package.json` from a package directory.
    ///
    /// Returns `Ok(None)` when the directory has no manifest.
    pub fn read_from_dir(dir: &Path) -> Result<Option<Self>, PackageJsonError> {
        let path = dir.join("package.json");
        if !path.is_file() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).map_err(|e| PackageJsonError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| PackageJsonError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            })
    }

    /// Entry fields in lookup order.
    pub fn entry_fields(&self) -> impl Iterator<Item = &str> {
        [self.module.as_deref(), self.main.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn prefers_module_over_main() {
        let pkg = PackageJson {
            name: Some("pkg".to_string()),
            module: Some("esm/index.js".to_string()),
            main: Some("cjs/index.js".to_string()),
        };

        let fields: Vec<&str> = pkg.entry_fields().collect();
        assert_eq!(fields, vec!["esm/index.js", "cjs/index.js"]);
    }

    #[test]
    fn missing_manifest_is_none() {
        let temp = tempdir().unwrap();
        assert!(PackageJson::read_from_dir(temp.path()).unwrap().is_none());
    }

    #[test]
    fn reports_malformed_manifest() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("package.json"), "{ not json").unwrap();

        let err = PackageJson::read_from_dir(temp.path()).unwrap_err();
        assert!(matches!(err, PackageJsonError::Parse { .. }));
    }
}
