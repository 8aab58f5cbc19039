//! Rule-based selection and ordered application of transformers.
//!
//! A chain holds a list of rules. The first rule whose test pattern matches
//! an asset path (and whose exclude pattern does not) supplies the ordered
//! list of transformers applied to that asset.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;

use crate::css::CssTranslator;
use crate::extract::CssExtractor;
use crate::sass::SassCompiler;
use crate::script::ScriptDownleveler;
use crate::traits::{AssetContent, TransformContext, TransformError, Transformer};

/// A match pattern plus the transformers it selects.
#[derive(Clone)]
pub struct Rule {
    test: Regex,
    exclude: Option<Regex>,
    uses: Vec<Arc<dyn Transformer>>,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("test", &self.test.as_str())
            .field("exclude", &self.exclude.as_ref().map(Regex::as_str))
            .field("uses", &self.stage_names())
            .finish()
    }
}

impl Rule {
    /// Create a rule for paths matching `test`.
    ///
    /// `uses` lists transformers in application order.
    pub fn new(test: &str, uses: Vec<Arc<dyn Transformer>>) -> Result<Self, regex::Error> {
        Ok(Self {
            test: Regex::new(test)?,
            exclude: None,
            uses,
        })
    }

    /// Skip paths matching `pattern` even when the test matches.
    pub fn exclude(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.exclude = Some(Regex::new(pattern)?);
        Ok(self)
    }

    /// Whether this rule applies to a `/`-separated path.
    pub fn matches(&self, path: &str) -> bool {
        self.test.is_match(path) && !self.exclude.as_ref().is_some_and(|ex| ex.is_match(path))
    }

    /// Names of this rule's stages, in application order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.uses.iter().map(|t| t.name()).collect()
    }
}

/// A transformer failure tied to the asset and stage that produced it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{}: [{stage}] {error}", .path.display())]
pub struct ChainError {
    /// Asset being transformed
    pub path: PathBuf,
    /// Stage that failed
    pub stage: &'static str,
    /// Underlying failure
    pub error: TransformError,
}

/// Ordered list of transformation rules.
#[derive(Debug, Clone, Default)]
pub struct TransformChain {
    rules: Vec<Rule>,
}

impl TransformChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Default rules:
    ///
    /// - `.scss`/`.sass`: sass → css → extract-css
    /// - `.css`: css → extract-css
    /// - `.js`/`.mjs` outside `node_modules`: script
    pub fn with_defaults(script_target: &str) -> Result<Self, regex::Error> {
        let css: Arc<dyn Transformer> = Arc::new(CssTranslator::new());
        let extract: Arc<dyn Transformer> = Arc::new(CssExtractor::new());
        let script: Arc<dyn Transformer> = Arc::new(ScriptDownleveler::new(script_target));

        Ok(Self::new()
            .rule(Rule::new(
                r"(?i)\.s[ac]ss$",
                vec![
                    Arc::new(SassCompiler::new()) as Arc<dyn Transformer>,
                    Arc::clone(&css),
                    Arc::clone(&extract),
                ],
            )?)
            .rule(Rule::new(r"(?i)\.css$", vec![css, extract])?)
            .rule(
                Rule::new(r"\.m?js$", vec![script])?.exclude(r"(^|/)node_modules/")?,
            ))
    }

    /// Append a rule; earlier rules take precedence.
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    /// All rules, in precedence order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// The rule applying to `path`, if any.
    pub fn rule_for(&self, path: &Path) -> Option<&Rule> {
        let normalized = normalize(path);
        self.rules.iter().find(|rule| rule.matches(&normalized))
    }

    /// Run the matching rule's transformers over `content`.
    ///
    /// Content no rule matches is returned unchanged. Each stage must
    /// accept the content kind produced by the stage before it.
    pub fn apply(
        &self,
        path: &Path,
        content: AssetContent,
        ctx: &TransformContext,
    ) -> Result<AssetContent, ChainError> {
        let Some(rule) = self.rule_for(path) else {
            return Ok(content);
        };

        let mut current = content;
        for stage in &rule.uses {
            if !stage.accepts().contains(&current.kind) {
                return Err(ChainError {
                    path: path.to_path_buf(),
                    stage: stage.name(),
                    error: TransformError::UnexpectedInput {
                        expected: stage.accepts().first().copied().unwrap_or(current.kind),
                        actual: current.kind,
                    },
                });
            }

            tracing::trace!("{} <- {}", stage.name(), path.display());

            current = stage
                .transform(current, path, ctx)
                .map_err(|error| ChainError {
                    path: path.to_path_buf(),
                    stage: stage.name(),
                    error,
                })?;
        }

        Ok(current)
    }
}

fn normalize(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::EXTRACTED_MODULE_STUB;
    use crate::traits::ContentKind;
    use pretty_assertions::assert_eq;

    fn chain() -> TransformChain {
        TransformChain::with_defaults("es2015").unwrap()
    }

    #[test]
    fn selects_stages_by_extension() {
        let chain = chain();

        assert_eq!(
            chain.rule_for(Path::new("src/theme.scss")).unwrap().stage_names(),
            vec!["sass", "css", "extract-css"]
        );
        assert_eq!(
            chain.rule_for(Path::new("src/base.css")).unwrap().stage_names(),
            vec!["css", "extract-css"]
        );
        assert_eq!(
            chain.rule_for(Path::new("src/app.mjs")).unwrap().stage_names(),
            vec!["script"]
        );
        assert!(chain.rule_for(Path::new("src/data.json")).is_none());
    }

    #[test]
    fn excludes_dependency_directory() {
        let chain = chain();
        assert!(chain
            .rule_for(Path::new("/proj/node_modules/lib/index.js"))
            .is_none());
    }

    #[test]
    fn runs_stylesheet_stages_in_order() {
        let out = chain()
            .apply(
                Path::new("theme.scss"),
                AssetContent::new(ContentKind::Sass, "$c: red;\n.a { color: $c; }"),
                &TransformContext::default(),
            )
            .unwrap();

        assert_eq!(out.kind, ContentKind::Script);
        assert_eq!(out.code, EXTRACTED_MODULE_STUB);
        assert!(out.extracted_css.unwrap().contains("color: red"));
    }

    #[test]
    fn rejects_misordered_stages() {
        let chain = TransformChain::new().rule(
            Rule::new(
                r"\.scss$",
                vec![
                    Arc::new(CssExtractor::new()) as Arc<dyn Transformer>,
                    Arc::new(SassCompiler::new()),
                ],
            )
            .unwrap(),
        );

        let err = chain
            .apply(
                Path::new("theme.scss"),
                AssetContent::new(ContentKind::Sass, ".a { color: red; }"),
                &TransformContext::default(),
            )
            .unwrap_err();

        assert_eq!(err.stage, "extract-css");
        assert_eq!(
            err.error,
            TransformError::UnexpectedInput {
                expected: ContentKind::Css,
                actual: ContentKind::Sass,
            }
        );
    }

    #[test]
    fn failure_names_file_and_stage() {
        let err = chain()
            .apply(
                Path::new("src/broken.scss"),
                AssetContent::new(ContentKind::Sass, ".a { color: $nope; }"),
                &TransformContext::default(),
            )
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("src/broken.scss"));
        assert!(message.contains("[sass]"));

        // The inner message is printed once, not again as a cause.
        let inner = err.error.to_string();
        assert_eq!(message.matches(inner.as_str()).count(), 1);
        assert!(std::error::Error::source(&err).is_none());
    }

    #[test]
    fn passes_unmatched_content_through() {
        let content = AssetContent::new(ContentKind::Json, r#"{"a":1}"#);
        let out = chain()
            .apply(Path::new("data.json"), content.clone(), &TransformContext::default())
            .unwrap();
        assert_eq!(out, content);
    }
}
