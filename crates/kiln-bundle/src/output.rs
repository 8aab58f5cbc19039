//! Build artifacts and writing them to the output directory.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::BuildError;

/// Kind of a produced file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Script,
    Stylesheet,
    Html,
    Icon,
    Manifest,
    Asset,
}

impl ArtifactKind {
    /// `Content-Type` value for serving this artifact.
    pub fn content_type(self, file_name: &str) -> &'static str {
        match self {
            Self::Script => "application/javascript; charset=utf-8",
            Self::Stylesheet => "text/css; charset=utf-8",
            Self::Html => "text/html; charset=utf-8",
            Self::Manifest => "application/manifest+json",
            Self::Icon | Self::Asset => content_type_for(file_name),
        }
    }
}

fn content_type_for(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "ico" => "image/x-icon",
        "json" => "application/json",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// One produced file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputArtifact {
    /// Logical name (entry name, `commons`, source file name)
    pub name: String,
    pub kind: ArtifactKind,
    /// Path relative to the output directory, `/`-separated
    pub file_name: String,
    pub content: Vec<u8>,
}

/// Every artifact of one build, in emission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputSet {
    artifacts: Vec<OutputArtifact>,
}

impl OutputSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an artifact, replacing any earlier one with the same file name.
    pub fn push(&mut self, artifact: OutputArtifact) {
        if let Some(existing) = self
            .artifacts
            .iter_mut()
            .find(|a| a.file_name == artifact.file_name)
        {
            *existing = artifact;
        } else {
            self.artifacts.push(artifact);
        }
    }

    /// Look up an artifact by its relative file name.
    pub fn get(&self, file_name: &str) -> Option<&OutputArtifact> {
        let file_name = file_name.trim_start_matches('/');
        self.artifacts.iter().find(|a| a.file_name == file_name)
    }

    /// Artifacts of `kind` with logical name `name`.
    pub fn find(&self, name: &str, kind: ArtifactKind) -> Option<&OutputArtifact> {
        self.artifacts
            .iter()
            .find(|a| a.kind == kind && a.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutputArtifact> {
        self.artifacts.iter()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn file_names(&self) -> Vec<&str> {
        self.artifacts.iter().map(|a| a.file_name.as_str()).collect()
    }
}

/// What [`write_output`] changed on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub written: usize,
    /// Stale files removed, relative to the output directory
    pub removed: Vec<String>,
}

/// Write `set` into `out_dir`.
///
/// Files are first written to a staging directory next to `out_dir` and then
/// moved into place, so a failed write leaves the previous output intact.
/// With `clean`, files in `out_dir` that are not part of `set` are deleted
/// afterwards.
pub fn write_output(set: &OutputSet, out_dir: &Path, clean: bool) -> Result<WriteSummary, BuildError> {
    fs::create_dir_all(out_dir).map_err(|e| BuildError::write(out_dir, e))?;

    let staging = staging_dir(out_dir);
    if staging.exists() {
        fs::remove_dir_all(&staging).map_err(|e| BuildError::write(&staging, e))?;
    }

    let staged = stage(set, &staging);
    if let Err(err) = staged {
        let _ = fs::remove_dir_all(&staging);
        return Err(err);
    }

    for artifact in set.iter() {
        let from = staging.join(&artifact.file_name);
        let to = out_dir.join(&artifact.file_name);
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(|e| BuildError::write(parent, e))?;
        }
        fs::rename(&from, &to).map_err(|e| BuildError::write(&to, e))?;
    }

    let _ = fs::remove_dir_all(&staging);

    let removed = if clean {
        remove_stale(set, out_dir)?
    } else {
        Vec::new()
    };

    tracing::debug!(
        "wrote {} file(s) to {}, removed {}",
        set.len(),
        out_dir.display(),
        removed.len()
    );

    Ok(WriteSummary {
        written: set.len(),
        removed,
    })
}

fn staging_dir(out_dir: &Path) -> PathBuf {
    let name = out_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "dist".to_string());
    out_dir.with_file_name(format!(".{name}.kiln-staging"))
}

fn stage(set: &OutputSet, staging: &Path) -> Result<(), BuildError> {
    for artifact in set.iter() {
        let path = staging.join(&artifact.file_name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| BuildError::write(parent, e))?;
        }
        fs::write(&path, &artifact.content).map_err(|e| BuildError::write(&path, e))?;
    }
    Ok(())
}

fn remove_stale(set: &OutputSet, out_dir: &Path) -> Result<Vec<String>, BuildError> {
    let keep: HashSet<&str> = set.file_names().into_iter().collect();
    let mut removed = Vec::new();

    for entry in WalkDir::new(out_dir)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let relative = entry
            .path()
            .strip_prefix(out_dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");

        if !keep.contains(relative.as_str()) {
            fs::remove_file(entry.path()).map_err(|e| BuildError::write(entry.path(), e))?;
            removed.push(relative);
        }
    }

    // Deepest directories first so parents empty out.
    let mut dirs: Vec<PathBuf> = WalkDir::new(out_dir)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.into_path())
        .collect();
    dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
    for dir in dirs {
        let _ = fs::remove_dir(&dir);
    }

    removed.sort();
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn artifact(file_name: &str, content: &str) -> OutputArtifact {
        OutputArtifact {
            name: file_name.to_string(),
            kind: ArtifactKind::Asset,
            file_name: file_name.to_string(),
            content: content.as_bytes().to_vec(),
        }
    }

    #[test]
    fn writes_nested_artifacts() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("dist");

        let mut set = OutputSet::new();
        set.push(artifact("main.bundle.js", "js"));
        set.push(artifact("icons/favicon.ico", "ico"));

        let summary = write_output(&set, &out, false).unwrap();

        assert_eq!(summary.written, 2);
        assert_eq!(fs::read_to_string(out.join("main.bundle.js")).unwrap(), "js");
        assert_eq!(fs::read_to_string(out.join("icons/favicon.ico")).unwrap(), "ico");
        assert!(!temp.path().join(".dist.kiln-staging").exists());
    }

    #[test]
    fn clean_removes_stale_files() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("dist");
        fs::create_dir_all(out.join("old")).unwrap();
        fs::write(out.join("main.aaaa.bundle.js"), "old").unwrap();
        fs::write(out.join("old/unused.png"), "old").unwrap();

        let mut set = OutputSet::new();
        set.push(artifact("main.bbbb.bundle.js", "new"));

        let summary = write_output(&set, &out, true).unwrap();

        assert_eq!(summary.removed, vec!["main.aaaa.bundle.js", "old/unused.png"]);
        assert!(out.join("main.bbbb.bundle.js").exists());
        assert!(!out.join("old").exists());
    }

    #[test]
    fn keeps_stale_files_without_clean() {
        let temp = TempDir::new().unwrap();
        let out = temp.path().join("dist");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("leftover.js"), "x").unwrap();

        let mut set = OutputSet::new();
        set.push(artifact("main.bundle.js", "new"));
        write_output(&set, &out, false).unwrap();

        assert!(out.join("leftover.js").exists());
    }

    #[test]
    fn push_replaces_same_file_name() {
        let mut set = OutputSet::new();
        set.push(artifact("a.js", "1"));
        set.push(artifact("a.js", "2"));

        assert_eq!(set.len(), 1);
        assert_eq!(set.get("/a.js").unwrap().content, b"2".to_vec());
    }

    #[test]
    fn content_types() {
        assert_eq!(ArtifactKind::Icon.content_type("favicon.ico"), "image/x-icon");
        assert_eq!(ArtifactKind::Asset.content_type("logo.PNG"), "image/png");
        assert_eq!(
            ArtifactKind::Script.content_type("main.bundle.js"),
            "application/javascript; charset=utf-8"
        );
    }
}
