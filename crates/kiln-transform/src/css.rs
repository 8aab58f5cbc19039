//! CSS translation using lightningcss.
//!
//! Parses CSS, lowers modern syntax and adds vendor prefixes for the
//! configured browser targets, and minifies in production.

use std::path::Path;

use lightningcss::printer::PrinterOptions;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};

use crate::traits::{AssetContent, ContentKind, TransformContext, TransformError, Transformer};

/// Normalizes CSS for the target browsers.
#[derive(Debug, Clone)]
pub struct CssTranslator {
    targets: Browsers,
}

impl CssTranslator {
    /// Create a translator with the default browser targets.
    pub fn new() -> Self {
        Self {
            targets: default_browser_targets(),
        }
    }

    /// Create a translator for explicit browser targets.
    pub fn with_targets(targets: Browsers) -> Self {
        Self { targets }
    }
}

impl Default for CssTranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl Transformer for CssTranslator {
    fn name(&self) -> &'static str {
        "css"
    }

    fn accepts(&self) -> &[ContentKind] {
        &[ContentKind::Css]
    }

    fn transform(
        &self,
        content: AssetContent,
        path: &Path,
        ctx: &TransformContext,
    ) -> Result<AssetContent, TransformError> {
        let code = translate_css(&content.code, path, self.targets, ctx.minify)?;

        Ok(AssetContent {
            kind: ContentKind::Css,
            code,
            extracted_css: content.extracted_css,
        })
    }
}

/// Parse, lower and print a stylesheet.
pub fn translate_css(
    source: &str,
    path: &Path,
    browsers: Browsers,
    minify: bool,
) -> Result<String, TransformError> {
    let parser_options = ParserOptions {
        filename: path.display().to_string(),
        ..ParserOptions::default()
    };

    let mut stylesheet = StyleSheet::parse(source, parser_options)
        .map_err(|e| TransformError::Parse(e.to_string()))?;

    let targets = Targets::from(browsers);

    stylesheet
        .minify(MinifyOptions {
            targets,
            ..Default::default()
        })
        .map_err(|e| TransformError::Compile(e.to_string()))?;

    let output = stylesheet
        .to_css(PrinterOptions {
            minify,
            targets,
            ..Default::default()
        })
        .map_err(|e| TransformError::Compile(e.to_string()))?;

    Ok(output.code)
}

/// Browser targets roughly matching "last 2 versions, not dead".
fn default_browser_targets() -> Browsers {
    Browsers {
        chrome: Some(80 << 16),
        firefox: Some(75 << 16),
        safari: Some(13 << 16),
        edge: Some(80 << 16),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str, minify: bool) -> Result<AssetContent, TransformError> {
        CssTranslator::new().transform(
            AssetContent::new(ContentKind::Css, source),
            Path::new("styles.css"),
            &TransformContext {
                production: minify,
                minify,
            },
        )
    }

    #[test]
    fn keeps_declarations() {
        let out = run(".foo { color: red; }", false).unwrap();
        assert!(out.code.contains(".foo"));
        assert!(out.code.contains("red"));
    }

    #[test]
    fn minifies_in_production() {
        let out = run(".foo {\n  color: red;\n  margin: 10px;\n}\n", true).unwrap();
        assert!(!out.code.contains('\n'));
        assert!(out.code.contains(".foo"));
    }

    #[test]
    fn prefixes_for_targets() {
        let out = run(".card { user-select: none; }", false).unwrap();
        assert!(out.code.contains("-webkit-user-select"));
    }
}
