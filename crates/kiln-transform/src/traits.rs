//! Trait definitions for asset transformers.

use std::fmt;
use std::path::Path;

/// Shape of an asset's content at some point in its chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    /// JavaScript module
    Script,
    /// Sass or SCSS source
    Sass,
    /// Plain CSS
    Css,
    /// JSON document
    Json,
    /// Raster or vector image
    Image,
    /// HTML markup
    Markup,
    /// Anything else
    Other,
}

impl ContentKind {
    /// Classify a file by its extension.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match ext.as_str() {
            "js" | "mjs" | "cjs" => Self::Script,
            "scss" | "sass" => Self::Sass,
            "css" => Self::Css,
            "json" => Self::Json,
            "png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" | "avif" | "ico" => Self::Image,
            "html" | "htm" => Self::Markup,
            _ => Self::Other,
        }
    }

    /// Whether content of this kind is text that transformers can read.
    pub fn is_text(&self) -> bool {
        !matches!(self, Self::Image | Self::Other)
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Script => "script",
            Self::Sass => "sass",
            Self::Css => "css",
            Self::Json => "json",
            Self::Image => "image",
            Self::Markup => "markup",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// Content flowing through a transformer chain.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetContent {
    /// Current content shape
    pub kind: ContentKind,

    /// Current content
    pub code: String,

    /// CSS pulled out of the module by an extraction stage
    pub extracted_css: Option<String>,
}

impl AssetContent {
    /// Wrap freshly read source text.
    pub fn new(kind: ContentKind, code: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            extracted_css: None,
        }
    }
}

/// Build-wide settings handed to every transformer.
#[derive(Debug, Clone, Default)]
pub struct TransformContext {
    /// Production build
    pub production: bool,

    /// Minify output
    pub minify: bool,
}

/// Errors that can occur during transformation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransformError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Compile error: {0}")]
    Compile(String),

    #[error("Expected {expected} input, got {actual}")]
    UnexpectedInput {
        expected: ContentKind,
        actual: ContentKind,
    },
}

/// A single transformation stage.
pub trait Transformer: Send + Sync {
    /// Stage identifier used in error reports (e.g., "sass", "css")
    fn name(&self) -> &'static str;

    /// Content kinds this stage can consume.
    fn accepts(&self) -> &[ContentKind];

    /// Transform one asset's content.
    ///
    /// # Arguments
    /// * `content` - Output of the previous stage (or the raw source)
    /// * `path` - Source file path, for diagnostics and relative lookups
    /// * `ctx` - Build-wide settings
    fn transform(
        &self,
        content: AssetContent,
        path: &Path,
        ctx: &TransformContext,
    ) -> Result<AssetContent, TransformError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_extension() {
        assert_eq!(ContentKind::from_path(Path::new("a/b.mjs")), ContentKind::Script);
        assert_eq!(ContentKind::from_path(Path::new("theme.SCSS")), ContentKind::Sass);
        assert_eq!(ContentKind::from_path(Path::new("x.sass")), ContentKind::Sass);
        assert_eq!(ContentKind::from_path(Path::new("logo.svg")), ContentKind::Image);
        assert_eq!(ContentKind::from_path(Path::new("README")), ContentKind::Other);
    }

    #[test]
    fn images_are_not_text() {
        assert!(!ContentKind::Image.is_text());
        assert!(ContentKind::Json.is_text());
    }
}
