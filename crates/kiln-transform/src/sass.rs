//! Sass/SCSS compilation using grass.

use std::path::{Path, PathBuf};

use crate::traits::{AssetContent, ContentKind, TransformContext, TransformError, Transformer};

/// Compiles `.scss` and `.sass` sources to CSS.
#[derive(Debug, Clone, Default)]
pub struct SassCompiler {
    /// Extra include paths for `@use`/`@import` resolution
    pub include_paths: Vec<PathBuf>,
}

impl SassCompiler {
    /// Create a compiler with no extra include paths.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an include path.
    pub fn with_include_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.include_paths.push(path.into());
        self
    }
}

impl Transformer for SassCompiler {
    fn name(&self) -> &'static str {
        "sass"
    }

    fn accepts(&self) -> &[ContentKind] {
        &[ContentKind::Sass]
    }

    fn transform(
        &self,
        content: AssetContent,
        path: &Path,
        _ctx: &TransformContext,
    ) -> Result<AssetContent, TransformError> {
        let indented = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("sass"));

        let mut options = grass::Options::default().style(grass::OutputStyle::Expanded);
        if indented {
            options = options.input_syntax(grass::InputSyntax::Sass);
        }

        for include in &self.include_paths {
            options = options.load_path(include);
        }
        if let Some(parent) = path.parent() {
            options = options.load_path(parent);
        }

        let css = grass::from_string(content.code, &options)
            .map_err(|e| TransformError::Compile(e.to_string()))?;

        Ok(AssetContent {
            kind: ContentKind::Css,
            code: css,
            extracted_css: content.extracted_css,
        })
    }
}
