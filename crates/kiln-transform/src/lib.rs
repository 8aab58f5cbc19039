//! Asset transformers for kiln.
//!
//! Each transformer converts one content kind into another (Sass to CSS,
//! CSS to extracted side output, modern JavaScript to a lower language
//! level). A [`TransformChain`] selects transformers per asset by path
//! pattern and applies them in declared order.

pub mod chain;
pub mod css;
pub mod extract;
pub mod lint;
pub mod sass;
pub mod script;
pub mod traits;

pub use chain::{ChainError, Rule, TransformChain};
pub use css::CssTranslator;
pub use extract::{CssExtractor, EXTRACTED_MODULE_STUB};
pub use lint::{lint_source, LintDiagnostic, LintOptions, RuleLevel};
pub use sass::SassCompiler;
pub use script::{ScriptDownleveler, DEFAULT_TARGET};
pub use traits::{AssetContent, ContentKind, TransformContext, TransformError, Transformer};
