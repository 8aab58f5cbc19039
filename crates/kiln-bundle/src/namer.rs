//! Output file naming.
//!
//! Development names are stable (`main.bundle.js`) so reloads hit the same
//! URL. Production names embed a content hash (`main.<hash>.bundle.js`) so
//! unchanged artifacts keep their names and can be cached indefinitely.

use crate::config::Mode;
use crate::output::ArtifactKind;

/// Number of hex characters of the content hash kept in file names.
pub const HASH_LEN: usize = 20;

/// Truncated BLAKE3 digest of `content` in hex.
pub fn content_hash(content: &[u8]) -> String {
    let hex = blake3::hash(content).to_hex();
    hex.as_str()[..HASH_LEN].to_string()
}

/// File name for an artifact.
///
/// `name` is the logical name: the entry or chunk name for bundles, the
/// source file name (`logo.png`) for copied assets. Other kinds keep their
/// name unchanged.
pub fn output_file_name(name: &str, kind: ArtifactKind, mode: Mode, content: &[u8]) -> String {
    match kind {
        ArtifactKind::Script | ArtifactKind::Stylesheet => {
            let ext = if kind == ArtifactKind::Script { "js" } else { "css" };
            match mode {
                Mode::Development => format!("{name}.bundle.{ext}"),
                Mode::Production => format!("{name}.{}.bundle.{ext}", content_hash(content)),
            }
        }
        ArtifactKind::Asset => match mode {
            Mode::Development => name.to_string(),
            Mode::Production => {
                let (dir, file) = match name.rsplit_once('/') {
                    Some((dir, file)) => (&name[..=dir.len()], file),
                    None => ("", name),
                };
                match file.rsplit_once('.') {
                    Some((stem, ext)) if !stem.is_empty() => {
                        format!("{dir}{stem}.{}.{ext}", content_hash(content))
                    }
                    _ => format!("{name}.{}", content_hash(content)),
                }
            }
        },
        ArtifactKind::Html | ArtifactKind::Icon | ArtifactKind::Manifest => name.to_string(),
    }
}
