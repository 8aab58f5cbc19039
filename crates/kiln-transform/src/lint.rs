//! Pre-build lint gate for script sources.

use std::path::{Path, PathBuf};

use oxc_allocator::Allocator;
use oxc_ast::ast::{CallExpression, Expression};
use oxc_ast::AstKind;
use oxc_parser::Parser;
use oxc_semantic::SemanticBuilder;
use oxc_span::SourceType;
use serde::Deserialize;

/// How a lint rule reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleLevel {
    Off,
    Warn,
    Error,
}

/// Enabled rules.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LintOptions {
    /// `debugger` statements
    pub no_debugger: RuleLevel,

    /// `console.*` calls
    pub no_console: RuleLevel,
}

impl Default for LintOptions {
    fn default() -> Self {
        Self {
            no_debugger: RuleLevel::Error,
            no_console: RuleLevel::Warn,
        }
    }
}

/// One lint finding.
#[derive(Debug, Clone, PartialEq)]
pub struct LintDiagnostic {
    pub rule: &'static str,
    pub level: RuleLevel,
    pub path: PathBuf,
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for LintDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}: {} ({})",
            self.path.display(),
            self.line,
            self.message,
            self.rule
        )
    }
}

/// Lint one script source.
///
/// Sources that fail to parse produce no findings; the transform chain
/// reports those.
pub fn lint_source(source: &str, path: &Path, options: &LintOptions) -> Vec<LintDiagnostic> {
    let allocator = Allocator::default();
    let parsed = Parser::new(&allocator, source, SourceType::mjs()).parse();
    if !parsed.errors.is_empty() {
        return Vec::new();
    }

    let semantic = SemanticBuilder::new().build(&parsed.program).semantic;
    let mut findings = Vec::new();

    for node in semantic.nodes().iter() {
        match node.kind() {
            AstKind::DebuggerStatement(stmt) if options.no_debugger != RuleLevel::Off => {
                findings.push(LintDiagnostic {
                    rule: "no-debugger",
                    level: options.no_debugger,
                    path: path.to_path_buf(),
                    line: line_of(source, stmt.span.start),
                    message: "Unexpected 'debugger' statement".to_string(),
                });
            }
            AstKind::CallExpression(call)
                if options.no_console != RuleLevel::Off && is_console_call(call) =>
            {
                findings.push(LintDiagnostic {
                    rule: "no-console",
                    level: options.no_console,
                    path: path.to_path_buf(),
                    line: line_of(source, call.span.start),
                    message: "Unexpected console statement".to_string(),
                });
            }
            _ => {}
        }
    }

    findings.sort_by_key(|d| d.line);
    findings
}

fn is_console_call(call: &CallExpression) -> bool {
    match &call.callee {
        Expression::StaticMemberExpression(member) => {
            matches!(&member.object, Expression::Identifier(id) if id.name.as_str() == "console")
        }
        _ => false,
    }
}

fn line_of(source: &str, offset: u32) -> usize {
    let end = (offset as usize).min(source.len());
    source.as_bytes()[..end].iter().filter(|&&b| b == b'\n').count() + 1
}
