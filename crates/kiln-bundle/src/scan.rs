//! Import/export discovery and linking for script modules.
//!
//! [`scan_module`] parses a script and records every module-level import and
//! export plus `require("...")` calls. [`link_module`] then rewrites those
//! statements into calls against the bundle runtime so the module body can
//! run inside a registry factory.
//!
//! Imported bindings stay live: every reference to one is rewritten into a
//! member access on the imported module's exports, so cyclic imports see
//! values assigned after the importer started running.

use std::collections::{HashMap, HashSet};
use std::ops::Range;

use oxc_allocator::Allocator;
use oxc_ast::ast::{
    Argument, CallExpression, Declaration, ExportDefaultDeclarationKind, Expression,
    ImportDeclarationSpecifier, Statement,
};
use oxc_ast::AstKind;
use oxc_parser::Parser;
use oxc_semantic::{SemanticBuilder, SymbolFlags};
use oxc_span::{GetSpan, SourceType, Span};

use kiln_transform::TransformError;

/// A module-level dependency or export found in a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleItem {
    /// `import d, { a as b } from "x"` / `import * as ns from "x"` / `import "x"`
    Import {
        span: Range<usize>,
        source: String,
        default: Option<String>,
        namespace: Option<String>,
        /// `(imported, local)` pairs
        named: Vec<(String, String)>,
    },
    /// `export const a = 1`, `export function f() {}`
    ExportDeclaration {
        /// The `export ` keyword in front of the declaration
        keyword: Range<usize>,
        names: Vec<String>,
    },
    /// `export { a as b }`
    ExportLocal {
        span: Range<usize>,
        /// `(local, exported)` pairs
        specifiers: Vec<(String, String)>,
    },
    /// `export { a as b } from "x"`
    ExportFrom {
        span: Range<usize>,
        source: String,
        /// `(imported, exported)` pairs
        specifiers: Vec<(String, String)>,
    },
    /// `export * from "x"` / `export * as ns from "x"`
    ExportAll {
        span: Range<usize>,
        source: String,
        alias: Option<String>,
    },
    /// `export default ...`
    ExportDefault {
        keyword: Range<usize>,
        end: usize,
        /// Name of a named default function or class
        local: Option<String>,
    },
    /// `require("x")`
    Require { span: Range<usize>, source: String },
}

impl ModuleItem {
    /// Specifier this item loads, if any.
    pub fn source(&self) -> Option<&str> {
        match self {
            Self::Import { source, .. }
            | Self::ExportFrom { source, .. }
            | Self::ExportAll { source, .. }
            | Self::Require { source, .. } => Some(source),
            _ => None,
        }
    }

    fn start(&self) -> usize {
        match self {
            Self::Import { span, .. }
            | Self::ExportLocal { span, .. }
            | Self::ExportFrom { span, .. }
            | Self::ExportAll { span, .. }
            | Self::Require { span, .. } => span.start,
            Self::ExportDeclaration { keyword, .. } | Self::ExportDefault { keyword, .. } => {
                keyword.start
            }
        }
    }
}

/// How a reference to an imported binding is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefPosition {
    Value,
    /// Called directly, `f()` or ``tag`...` ``
    Callee,
    /// Constructed, `new C()`
    New,
    /// Shorthand object property, `{ a }`
    Shorthand,
}

/// A use of a default or named import inside the module body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRef {
    pub span: Range<usize>,
    pub local: String,
    pub position: RefPosition,
}

/// Result of scanning one script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScannedModule {
    /// Items in source order
    pub items: Vec<ModuleItem>,
    /// References to imported bindings, in source order
    pub import_refs: Vec<ImportRef>,
    /// Whether the module uses import/export syntax
    pub is_esm: bool,
    /// Whether the module accepts its own hot updates (`module.hot.accept()`)
    pub hot_accept: bool,
}

impl ScannedModule {
    /// Requested specifiers, deduplicated, in first-use order.
    pub fn requests(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for source in self.items.iter().filter_map(ModuleItem::source) {
            if !out.contains(&source) {
                out.push(source);
            }
        }
        out
    }
}

/// Parse `code` and collect its module items.
pub fn scan_module(code: &str) -> Result<ScannedModule, TransformError> {
    let allocator = Allocator::default();
    let parsed = Parser::new(&allocator, code, SourceType::mjs()).parse();

    if !parsed.errors.is_empty() {
        let message = parsed
            .errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        return Err(TransformError::Parse(message));
    }

    let program = &parsed.program;
    let mut items = Vec::new();
    let mut namespaces = HashSet::new();

    for stmt in &program.body {
        match stmt {
            Statement::ImportDeclaration(decl) => {
                let mut default = None;
                let mut namespace = None;
                let mut named = Vec::new();

                for spec in decl.specifiers.iter().flatten() {
                    match spec {
                        ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => {
                            default = Some(s.local.name.to_string());
                        }
                        ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => {
                            namespace = Some(s.local.name.to_string());
                            namespaces.insert(s.local.name.to_string());
                        }
                        ImportDeclarationSpecifier::ImportSpecifier(s) => {
                            named.push((s.imported.name().to_string(), s.local.name.to_string()));
                        }
                    }
                }

                items.push(ModuleItem::Import {
                    span: range(decl.span),
                    source: decl.source.value.to_string(),
                    default,
                    namespace,
                    named,
                });
            }
            Statement::ExportNamedDeclaration(decl) => {
                if let Some(declaration) = &decl.declaration {
                    items.push(ModuleItem::ExportDeclaration {
                        keyword: decl.span.start as usize..declaration.span().start as usize,
                        names: declared_names(declaration),
                    });
                    continue;
                }

                let pairs: Vec<(String, String)> = decl
                    .specifiers
                    .iter()
                    .map(|s| (s.local.name().to_string(), s.exported.name().to_string()))
                    .collect();

                match &decl.source {
                    Some(source) => items.push(ModuleItem::ExportFrom {
                        span: range(decl.span),
                        source: source.value.to_string(),
                        specifiers: pairs,
                    }),
                    None => items.push(ModuleItem::ExportLocal {
                        span: range(decl.span),
                        specifiers: pairs,
                    }),
                }
            }
            Statement::ExportAllDeclaration(decl) => {
                items.push(ModuleItem::ExportAll {
                    span: range(decl.span),
                    source: decl.source.value.to_string(),
                    alias: decl.exported.as_ref().map(|e| e.name().to_string()),
                });
            }
            Statement::ExportDefaultDeclaration(decl) => {
                let local = match &decl.declaration {
                    ExportDefaultDeclarationKind::FunctionDeclaration(f) => {
                        f.id.as_ref().map(|id| id.name.to_string())
                    }
                    ExportDefaultDeclarationKind::ClassDeclaration(c) => {
                        c.id.as_ref().map(|id| id.name.to_string())
                    }
                    _ => None,
                };

                items.push(ModuleItem::ExportDefault {
                    keyword: decl.span.start as usize..decl.declaration.span().start as usize,
                    end: decl.span.end as usize,
                    local,
                });
            }
            _ => {}
        }
    }

    let is_esm = !items.is_empty();
    let mut hot_accept = false;

    let semantic = SemanticBuilder::new().build(program).semantic;
    let scoping = semantic.scoping();
    let nodes = semantic.nodes();
    let mut import_refs = Vec::new();

    for node in nodes.iter() {
        match node.kind() {
            AstKind::CallExpression(call) => {
                if let Some(source) = require_source(call) {
                    items.push(ModuleItem::Require {
                        span: range(call.span),
                        source,
                    });
                } else if is_self_accept(call) {
                    hot_accept = true;
                }
            }
            AstKind::IdentifierReference(ident) => {
                let Some(symbol) = ident
                    .reference_id
                    .get()
                    .and_then(|id| scoping.get_reference(id).symbol_id())
                else {
                    continue;
                };
                if !scoping.symbol_flags(symbol).contains(SymbolFlags::Import) {
                    continue;
                }
                let local = scoping.symbol_name(symbol);
                if namespaces.contains(local) {
                    continue;
                }

                let position = match nodes.parent_kind(node.id()) {
                    Some(AstKind::CallExpression(call)) if call.callee.span() == ident.span => {
                        RefPosition::Callee
                    }
                    Some(AstKind::TaggedTemplateExpression(tagged))
                        if tagged.tag.span() == ident.span =>
                    {
                        RefPosition::Callee
                    }
                    Some(AstKind::NewExpression(expr)) if expr.callee.span() == ident.span => {
                        RefPosition::New
                    }
                    Some(AstKind::ObjectProperty(prop)) if prop.shorthand => RefPosition::Shorthand,
                    _ => RefPosition::Value,
                };

                import_refs.push(ImportRef {
                    span: range(ident.span),
                    local: local.to_string(),
                    position,
                });
            }
            _ => {}
        }
    }

    items.sort_by_key(ModuleItem::start);
    import_refs.sort_by_key(|r| r.span.start);

    Ok(ScannedModule {
        items,
        import_refs,
        is_esm,
        hot_accept,
    })
}

fn range(span: Span) -> Range<usize> {
    span.start as usize..span.end as usize
}

fn declared_names(declaration: &Declaration) -> Vec<String> {
    match declaration {
        Declaration::VariableDeclaration(var) => var
            .declarations
            .iter()
            .flat_map(|d| d.id.get_binding_identifiers())
            .map(|id| id.name.to_string())
            .collect(),
        Declaration::FunctionDeclaration(f) => {
            f.id.iter().map(|id| id.name.to_string()).collect()
        }
        Declaration::ClassDeclaration(c) => c.id.iter().map(|id| id.name.to_string()).collect(),
        _ => Vec::new(),
    }
}

fn require_source(call: &CallExpression) -> Option<String> {
    match &call.callee {
        Expression::Identifier(id) if id.name.as_str() == "require" => {}
        _ => return None,
    }
    if call.arguments.len() != 1 {
        return None;
    }
    match call.arguments.first() {
        Some(Argument::StringLiteral(lit)) => Some(lit.value.to_string()),
        _ => None,
    }
}

/// `module.hot.accept()` or `module.hot.accept(cb)`; accepting named
/// dependencies does not count.
fn is_self_accept(call: &CallExpression) -> bool {
    let Expression::StaticMemberExpression(member) = &call.callee else {
        return false;
    };
    if member.property.name.as_str() != "accept" {
        return false;
    }
    let Expression::StaticMemberExpression(hot) = &member.object else {
        return false;
    };
    if hot.property.name.as_str() != "hot" {
        return false;
    }
    !matches!(
        call.arguments.first(),
        Some(Argument::StringLiteral(_)) | Some(Argument::ArrayExpression(_))
    )
}

/// Rewrite a scanned module into a factory body.
///
/// `id_of` maps each requested specifier to the module id registered in the
/// bundle.
pub fn link_module(code: &str, scanned: &ScannedModule, id_of: impl Fn(&str) -> String) -> String {
    let mut getters = String::new();
    let mut requires = String::new();
    let mut reexports = String::new();
    let mut edits: Vec<(Range<usize>, String)> = Vec::new();

    let temps = module_temps(&scanned.items);
    let bindings = import_bindings(&scanned.items, &temps);

    for (item, temp) in scanned.items.iter().zip(&temps) {
        match item {
            ModuleItem::Import {
                span,
                source,
                namespace,
                ..
            } => {
                edits.push((span.clone(), String::new()));
                let id = quote(&id_of(source));

                let Some(module) = temp else {
                    requires.push_str(&format!("__kiln_require__({id});\n"));
                    continue;
                };
                requires.push_str(&format!("var {module} = __kiln_require__({id});\n"));
                if let Some(local) = namespace {
                    requires.push_str(&format!("var {local} = {module};\n"));
                }
            }
            ModuleItem::ExportDeclaration { keyword, names } => {
                edits.push((keyword.clone(), String::new()));
                for name in names {
                    getters.push_str(&getter(name, name));
                }
            }
            ModuleItem::ExportLocal { span, specifiers } => {
                edits.push((span.clone(), String::new()));
                for (local, exported) in specifiers {
                    let expr = bindings.get(local.as_str()).map_or(local.as_str(), String::as_str);
                    getters.push_str(&getter(exported, expr));
                }
            }
            ModuleItem::ExportFrom {
                span,
                source,
                specifiers,
            } => {
                edits.push((span.clone(), String::new()));
                let Some(module) = temp else { continue };
                requires.push_str(&format!(
                    "var {module} = __kiln_require__({});\n",
                    quote(&id_of(source))
                ));
                for (imported, exported) in specifiers {
                    getters.push_str(&getter(exported, &format!("{module}[{}]", quote(imported))));
                }
            }
            ModuleItem::ExportAll {
                span,
                source,
                alias,
            } => {
                edits.push((span.clone(), String::new()));
                let Some(module) = temp else { continue };
                requires.push_str(&format!(
                    "var {module} = __kiln_require__({});\n",
                    quote(&id_of(source))
                ));
                match alias {
                    Some(alias) => getters.push_str(&getter(alias, module)),
                    None => reexports.push_str(&format!("__kiln_require__.x(exports, {module});\n")),
                }
            }
            ModuleItem::ExportDefault {
                keyword,
                end,
                local,
            } => match local {
                Some(local) => {
                    edits.push((keyword.clone(), String::new()));
                    getters.push_str(&getter("default", local));
                }
                None => {
                    edits.push((keyword.clone(), "var __kiln_default__ = ".to_string()));
                    edits.push((*end..*end, ";".to_string()));
                    getters.push_str(&getter("default", "__kiln_default__"));
                }
            },
            ModuleItem::Require { span, source } => {
                edits.push((
                    span.clone(),
                    format!("__kiln_require__({})", quote(&id_of(source))),
                ));
            }
        }
    }

    for reference in &scanned.import_refs {
        let Some(expr) = bindings.get(reference.local.as_str()) else {
            continue;
        };
        let replacement = match reference.position {
            RefPosition::Value => expr.clone(),
            RefPosition::Callee => format!("(0, {expr})"),
            RefPosition::New => format!("({expr})"),
            RefPosition::Shorthand => format!("{}: {expr}", reference.local),
        };
        edits.push((reference.span.clone(), replacement));
    }

    let body = apply_edits(code, edits);

    if !scanned.is_esm {
        return body;
    }

    let mut out = String::with_capacity(body.len() + getters.len() + requires.len() + 64);
    out.push_str("\"use strict\";\n__kiln_require__.r(exports);\n");
    out.push_str(&getters);
    out.push_str(&requires);
    out.push_str(&reexports);
    out.push_str(body.trim_start());
    out
}

/// Temporary holding the required module for each item that loads one by
/// name, numbered in source order.
fn module_temps(items: &[ModuleItem]) -> Vec<Option<String>> {
    let mut next = 0usize;
    items
        .iter()
        .map(|item| {
            let needs_temp = match item {
                ModuleItem::Import {
                    default,
                    namespace,
                    named,
                    ..
                } => default.is_some() || namespace.is_some() || !named.is_empty(),
                ModuleItem::ExportFrom { .. } | ModuleItem::ExportAll { .. } => true,
                _ => false,
            };
            needs_temp.then(|| {
                let name = format!("__kiln_m{next}__");
                next += 1;
                name
            })
        })
        .collect()
}

/// Expression reading each default or named import through its module.
fn import_bindings<'a>(
    items: &'a [ModuleItem],
    temps: &[Option<String>],
) -> HashMap<&'a str, String> {
    let mut bindings = HashMap::new();

    for (item, temp) in items.iter().zip(temps) {
        let (ModuleItem::Import { default, named, .. }, Some(module)) = (item, temp) else {
            continue;
        };
        if let Some(local) = default {
            bindings.insert(local.as_str(), format!("__kiln_require__.n({module})"));
        }
        for (imported, local) in named {
            let expr = if imported == "default" {
                format!("__kiln_require__.n({module})")
            } else {
                format!("{module}[{}]", quote(imported))
            };
            bindings.insert(local.as_str(), expr);
        }
    }

    bindings
}

fn getter(exported: &str, expr: &str) -> String {
    format!(
        "__kiln_require__.d(exports, {}, function () {{ return {expr}; }});\n",
        quote(exported)
    )
}

fn quote(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{value}\""))
}

fn apply_edits(code: &str, mut edits: Vec<(Range<usize>, String)>) -> String {
    edits.sort_by_key(|(range, _)| (range.start, range.end));

    let mut out = String::with_capacity(code.len());
    let mut cursor = 0;

    for (range, replacement) in edits {
        if range.start < cursor || range.end > code.len() {
            continue;
        }
        out.push_str(&code[cursor..range.start]);
        out.push_str(&replacement);
        cursor = range.end;
    }

    out.push_str(&code[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn link(code: &str) -> String {
        let scanned = scan_module(code).unwrap();
        link_module(code, &scanned, |s| format!("./src/{}", s.trim_start_matches("./")))
    }

    #[test]
    fn collects_requests_in_order() {
        let scanned = scan_module(
            "import a from './a.js';\nexport { b } from './b.js';\nimport './a.js';\nconst c = require('./c.js');\n",
        )
        .unwrap();

        assert_eq!(scanned.requests(), vec!["./a.js", "./b.js", "./c.js"]);
        assert!(scanned.is_esm);
    }

    #[test]
    fn commonjs_is_not_esm() {
        let scanned = scan_module("module.exports = require('./x');").unwrap();
        assert!(!scanned.is_esm);
        assert_eq!(scanned.requests(), vec!["./x"]);
    }

    #[test]
    fn rewrites_imports() {
        let out = link("import def, { x as y } from './a.js';\nimport * as ns from './b.js';\nconsole.log(def, y, ns);\n");

        assert!(out.starts_with("\"use strict\";\n__kiln_require__.r(exports);\n"));
        assert!(out.contains("var __kiln_m0__ = __kiln_require__(\"./src/a.js\");"));
        assert!(out.contains("var ns = __kiln_m1__;"));
        assert!(!out.contains("var def"));
        assert!(!out.contains("var y"));
        assert!(!out.contains("import "));
        assert!(out.contains("console.log(__kiln_require__.n(__kiln_m0__), __kiln_m0__[\"x\"], ns);"));
    }

    #[test]
    fn imported_bindings_are_read_live() {
        let out = link(
            "import { a, make, Thing, tag } from './a.js';\n\
             export function read() { return [a, make(), new Thing(), tag`x`, { a }]; }\n\
             export { a as again };\n",
        );

        assert!(out.contains("return [__kiln_m0__[\"a\"], (0, __kiln_m0__[\"make\"])(), new (__kiln_m0__[\"Thing\"])(), (0, __kiln_m0__[\"tag\"])`x`, { a: __kiln_m0__[\"a\"] }];"));
        assert!(out.contains("__kiln_require__.d(exports, \"again\", function () { return __kiln_m0__[\"a\"]; });"));
    }

    #[test]
    fn shadowed_names_are_left_alone() {
        let out = link("import { a } from './a.js';\nfunction f(a) { return a; }\nconsole.log(a, f(1));\n");

        assert!(out.contains("function f(a) { return a; }"));
        assert!(out.contains("console.log(__kiln_m0__[\"a\"], f(1));"));
    }

    #[test]
    fn rewrites_exports() {
        let out = link("export const a = 1, b = 2;\nfunction f() {}\nexport { f as g };\nexport default 42;\n");

        assert!(out.contains("__kiln_require__.d(exports, \"a\", function () { return a; });"));
        assert!(out.contains("__kiln_require__.d(exports, \"b\", function () { return b; });"));
        assert!(out.contains("__kiln_require__.d(exports, \"g\", function () { return f; });"));
        assert!(out.contains("var __kiln_default__ = 42;"));
        assert!(out.contains("const a = 1, b = 2;"));
        assert!(!out.contains("export "));
    }

    #[test]
    fn keeps_named_default_declarations() {
        let out = link("export default function main() { return 1; }\n");

        assert!(out.contains("function main() { return 1; }"));
        assert!(out.contains("__kiln_require__.d(exports, \"default\", function () { return main; });"));
    }

    #[test]
    fn rewrites_reexports() {
        let out = link("export * from './a.js';\nexport * as b from './b.js';\n");

        assert!(out.contains("__kiln_require__.x(exports, __kiln_m0__);"));
        assert!(out.contains("__kiln_require__.d(exports, \"b\", function () { return __kiln_m1__; });"));
    }

    #[test]
    fn rewrites_require_calls() {
        let out = link("const x = require('./x.js');\nmodule.exports = x;\n");
        assert_eq!(
            out,
            "const x = __kiln_require__(\"./src/x.js\");\nmodule.exports = x;\n"
        );
    }

    #[test]
    fn detects_self_accepting_modules() {
        assert!(scan_module("if (module.hot) { module.hot.accept(); }").unwrap().hot_accept);
        assert!(scan_module("module.hot.accept(() => render());").unwrap().hot_accept);
        assert!(!scan_module("module.hot.accept('./dep.js', cb);").unwrap().hot_accept);
        assert!(!scan_module("render();").unwrap().hot_accept);
    }

    #[test]
    fn reports_parse_errors() {
        assert!(matches!(scan_module("import {"), Err(TransformError::Parse(_))));
    }
}
