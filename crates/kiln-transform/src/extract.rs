//! Extraction of CSS into separate stylesheet artifacts.

use std::path::Path;

use crate::traits::{AssetContent, ContentKind, TransformContext, TransformError, Transformer};

/// Module body left behind once a stylesheet's CSS has been extracted.
pub const EXTRACTED_MODULE_STUB: &str = "// extracted by kiln\n";

/// Moves CSS out of the module graph.
///
/// The CSS becomes side output collected into the owning entry's
/// stylesheet artifact; the module itself turns into an empty script.
#[derive(Debug, Clone, Copy, Default)]
pub struct CssExtractor;

impl CssExtractor {
    /// Create a new extractor.
    pub fn new() -> Self {
        Self
    }
}

impl Transformer for CssExtractor {
    fn name(&self) -> &'static str {
        "extract-css"
    }

    fn accepts(&self) -> &[ContentKind] {
        &[ContentKind::Css]
    }

    fn transform(
        &self,
        content: AssetContent,
        _path: &Path,
        _ctx: &TransformContext,
    ) -> Result<AssetContent, TransformError> {
        let css = match content.extracted_css {
            Some(mut earlier) => {
                earlier.push_str(&content.code);
                earlier
            }
            None => content.code,
        };

        Ok(AssetContent {
            kind: ContentKind::Script,
            code: EXTRACTED_MODULE_STUB.to_string(),
            extracted_css: Some(css),
        })
    }
}
