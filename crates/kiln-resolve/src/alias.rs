//! Short-name aliases for import specifiers.

use std::path::{Path, PathBuf};

/// Table of `logical prefix -> physical path` substitutions.
///
/// Lookups prefer the longest matching prefix, so `@core/x` picks `@core`
/// over `@` when both are registered.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    entries: Vec<(String, PathBuf)>,
}

impl AliasTable {
    /// Create an alias table from `(prefix, target)` pairs.
    pub fn new<I, K, P>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, P)>,
        K: Into<String>,
        P: Into<PathBuf>,
    {
        let mut entries: Vec<(String, PathBuf)> = entries
            .into_iter()
            .map(|(k, p)| (k.into().trim_end_matches('/').to_string(), p.into()))
            .filter(|(k, _)| !k.is_empty())
            .collect();

        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        entries.dedup_by(|a, b| a.0 == b.0);

        Self { entries }
    }

    /// Substitute the aliased prefix of `specifier`, if any.
    ///
    /// A prefix matches when the specifier equals it or continues with `/`.
    pub fn apply(&self, specifier: &str) -> Option<PathBuf> {
        for (prefix, target) in &self.entries {
            if specifier == prefix {
                return Some(target.clone());
            }

            if let Some(rest) = specifier
                .strip_prefix(prefix.as_str())
                .and_then(|r| r.strip_prefix('/'))
            {
                return Some(join_segments(target, rest));
            }
        }

        None
    }

    /// Number of registered aliases.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no aliases are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(prefix, target)` pairs, longest prefix first.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.entries.iter().map(|(k, p)| (k.as_str(), p.as_path()))
    }
}

/// Join a `/`-separated specifier tail onto a base path.
pub(crate) fn join_segments(base: &Path, rest: &str) -> PathBuf {
    let mut out = base.to_path_buf();
    for segment in rest.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            s => out.push(s),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_longest_prefix() {
        let table = AliasTable::new([("@", "/src"), ("@core", "/src/core")]);

        assert_eq!(
            table.apply("@core/math"),
            Some(PathBuf::from("/src/core/math"))
        );
        assert_eq!(table.apply("@/util"), Some(PathBuf::from("/src/util")));
    }

    #[test]
    fn exact_alias_maps_to_target() {
        let table = AliasTable::new([("@core", "/src/core")]);
        assert_eq!(table.apply("@core"), Some(PathBuf::from("/src/core")));
    }

    #[test]
    fn does_not_match_partial_segment() {
        let table = AliasTable::new([("@core", "/src/core")]);

        assert_eq!(table.apply("@corelib/x"), None);
        assert_eq!(table.apply("./@core/x"), None);
    }

    #[test]
    fn ignores_trailing_slash_in_prefix() {
        let table = AliasTable::new([("@/", "/src")]);
        assert_eq!(table.apply("@/a/b"), Some(PathBuf::from("/src/a/b")));
    }
}
