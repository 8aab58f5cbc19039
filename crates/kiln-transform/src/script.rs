//! JavaScript syntax downleveling using oxc.

use std::path::Path;

use oxc_allocator::Allocator;
use oxc_codegen::{Codegen, CodegenOptions};
use oxc_parser::Parser;
use oxc_semantic::SemanticBuilder;
use oxc_span::SourceType;
use oxc_transformer::{HelperLoaderMode, TransformOptions, Transformer as OxcTransformer};

use crate::traits::{AssetContent, ContentKind, TransformContext, TransformError, Transformer};

/// Default language level scripts are lowered to.
pub const DEFAULT_TARGET: &str = "es2015";

/// Lowers modern JavaScript syntax to the configured target.
///
/// ES module syntax is preserved; linking is done by the assembler.
#[derive(Debug, Clone)]
pub struct ScriptDownleveler {
    target: String,
}

impl ScriptDownleveler {
    /// Create a downleveler for a target such as `es2015` or `chrome80`.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    /// Configured target.
    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Default for ScriptDownleveler {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET)
    }
}

impl Transformer for ScriptDownleveler {
    fn name(&self) -> &'static str {
        "script"
    }

    fn accepts(&self) -> &[ContentKind] {
        &[ContentKind::Script]
    }

    fn transform(
        &self,
        content: AssetContent,
        path: &Path,
        ctx: &TransformContext,
    ) -> Result<AssetContent, TransformError> {
        let mut options =
            TransformOptions::from_target(&self.target).map_err(TransformError::Compile)?;
        // Helpers come from the `babelHelpers` global the chunk runtime installs.
        options.helper_loader.mode = HelperLoaderMode::External;

        let allocator = Allocator::default();
        let parsed = Parser::new(&allocator, &content.code, SourceType::mjs()).parse();

        if !parsed.errors.is_empty() {
            return Err(TransformError::Parse(join_diagnostics(&parsed.errors)));
        }

        let mut program = parsed.program;
        let scoping = SemanticBuilder::new()
            .build(&program)
            .semantic
            .into_scoping();

        let transformed = OxcTransformer::new(&allocator, path, &options)
            .build_with_scoping(scoping, &mut program);

        if !transformed.errors.is_empty() {
            return Err(TransformError::Compile(join_diagnostics(
                &transformed.errors,
            )));
        }

        let code = Codegen::new()
            .with_options(CodegenOptions {
                minify: ctx.minify,
                ..CodegenOptions::default()
            })
            .build(&program)
            .code;

        Ok(AssetContent {
            kind: ContentKind::Script,
            code,
            extracted_css: content.extracted_css,
        })
    }
}

fn join_diagnostics<D: ToString>(errors: &[D]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lower(source: &str, target: &str) -> Result<AssetContent, TransformError> {
        ScriptDownleveler::new(target).transform(
            AssetContent::new(ContentKind::Script, source),
            Path::new("index.js"),
            &TransformContext::default(),
        )
    }

    #[test]
    fn lowers_optional_chaining() {
        let out = lower("const v = a?.b ?? 1;\nexport { v };", "es2015").unwrap();

        assert!(!out.code.contains("?."));
        assert!(!out.code.contains("??"));
        assert!(out.code.contains("export"));
    }

    #[test]
    fn async_functions_use_global_helpers() {
        let out = lower("export async function f() { await 1; }", "es2015").unwrap();

        assert!(out.code.contains("babelHelpers.asyncToGenerator"));
        assert!(!out.code.contains("@oxc-project/runtime"));
        assert!(!out.code.contains("async function"));
    }

    #[test]
    fn preserves_module_syntax() {
        let out = lower("import { x } from './x.js';\nexport default x;", "es2015").unwrap();

        assert!(out.code.contains("import"));
        assert!(out.code.contains("./x.js"));
    }

    #[test]
    fn reports_syntax_errors() {
        let err = lower("const = ;", "es2015").unwrap_err();
        assert!(matches!(err, TransformError::Parse(_)));
    }

    #[test]
    fn rejects_unknown_target() {
        let err = lower("let a = 1;", "not-a-target").unwrap_err();
        assert!(matches!(err, TransformError::Compile(_)));
    }
}
