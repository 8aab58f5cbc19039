//! Bundle builder.
//!
//! A build resolves the module graph from the configured entries, running
//! each newly discovered wave of assets through the transform chain in
//! parallel, then emits script chunks, stylesheets, copied assets, icons and
//! the HTML shell as one [`OutputSet`].

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use rayon::prelude::*;
use walkdir::WalkDir;

use kiln_resolve::Resolver;
use kiln_transform::{
    lint_source, AssetContent, ContentKind, LintDiagnostic, RuleLevel, TransformChain,
};

use crate::config::{BuildConfig, Mode, COMMONS_CHUNK};
use crate::error::{AssetFailure, BuildError, BuildReport};
use crate::graph::{Module, ModuleGraph, ModuleId};
use crate::html::{HtmlEmitter, ShellContext};
use crate::icons::IconEmitter;
use crate::namer::output_file_name;
use crate::output::{write_output, ArtifactKind, OutputArtifact, OutputSet, WriteSummary};
use crate::runtime::render_chunk;
use crate::scan::{link_module, scan_module};

/// Result of a successful build.
#[derive(Debug)]
pub struct BuildResult {
    pub mode: Mode,

    /// Every produced artifact
    pub output: OutputSet,

    /// The module graph the output was assembled from
    pub graph: ModuleGraph,

    /// Lint findings that did not fail the build
    pub lint: Vec<LintDiagnostic>,

    /// Whether icons were rendered (`Some(false)` when reused from cache)
    pub icons_regenerated: Option<bool>,

    /// Total build time in milliseconds
    pub duration_ms: u64,
}

impl BuildResult {
    /// Script artifact file names, in HTML load order.
    pub fn scripts(&self) -> Vec<&str> {
        self.output
            .iter()
            .filter(|a| a.kind == ArtifactKind::Script)
            .map(|a| a.file_name.as_str())
            .collect()
    }

    /// Stylesheet artifact file names, in HTML load order.
    pub fn stylesheets(&self) -> Vec<&str> {
        self.output
            .iter()
            .filter(|a| a.kind == ArtifactKind::Stylesheet)
            .map(|a| a.file_name.as_str())
            .collect()
    }
}

/// A module before its dependencies are linked into the graph.
struct Processed {
    module: Module,
    dependencies: Vec<PathBuf>,
    failures: Vec<AssetFailure>,
}

enum ProcessError {
    Failed(AssetFailure),
    Fatal(BuildError),
}

/// Bundle builder.
pub struct Bundler {
    config: BuildConfig,
    resolver: Resolver,
    chain: TransformChain,
    root: PathBuf,
    src_root: PathBuf,
}

impl Bundler {
    /// Create a builder, validating the configuration.
    pub fn new(config: BuildConfig) -> Result<Self, BuildError> {
        config.validate().map_err(BuildError::Config)?;

        let chain = TransformChain::with_defaults(&config.script_target)
            .map_err(|e| BuildError::Config(e.to_string()))?;
        let resolver = Resolver::new(config.resolve_options());
        let root = fs::canonicalize(&config.root).unwrap_or_else(|_| config.root.clone());
        let src_root =
            fs::canonicalize(&config.src_dir).unwrap_or_else(|_| config.src_dir.clone());

        Ok(Self {
            config,
            resolver,
            chain,
            root,
            src_root,
        })
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Build into memory.
    pub fn build(&self) -> Result<BuildResult, BuildError> {
        let start = Instant::now();

        // Files may have been added or removed since the last build.
        self.resolver.clear_cache();

        let lint = self.lint()?;
        let graph = self.assemble()?;

        let mut output = OutputSet::new();
        let (scripts, styles) = self.emit_bundles(&graph, &mut output);

        for module in graph.modules() {
            if let Some(asset) = &module.asset {
                output.push(asset.clone());
            }
        }

        let (head_tags, icons_regenerated) = self.emit_icons(&mut output)?;
        self.emit_html(&mut output, scripts, styles, head_tags)?;

        let duration = start.elapsed();
        tracing::debug!(
            "assembled {} module(s) into {} artifact(s) in {:?}",
            graph.len(),
            output.len(),
            duration
        );

        Ok(BuildResult {
            mode: self.config.mode,
            output,
            graph,
            lint,
            icons_regenerated,
            duration_ms: duration.as_millis() as u64,
        })
    }

    /// Build and write the output directory.
    pub fn build_and_write(&self) -> Result<(BuildResult, WriteSummary), BuildError> {
        let result = self.build()?;
        let summary = write_output(&result.output, &self.config.out_dir, self.config.clean)?;
        Ok((result, summary))
    }

    /// Runtime registry key for a canonical path.
    pub fn module_key(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(relative) => format!("./{}", relative.to_string_lossy().replace('\\', "/")),
            Err(_) => path.to_string_lossy().replace('\\', "/"),
        }
    }

    fn lint(&self) -> Result<Vec<LintDiagnostic>, BuildError> {
        let Some(lint) = &self.config.lint else {
            return Ok(Vec::new());
        };

        let files: Vec<PathBuf> = WalkDir::new(&self.config.src_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.file_name() != "node_modules")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| ContentKind::from_path(p) == ContentKind::Script)
            .collect();

        let findings: Vec<LintDiagnostic> = files
            .par_iter()
            .flat_map_iter(|path| match fs::read_to_string(path) {
                Ok(source) => lint_source(&source, path, &lint.options),
                Err(e) => {
                    tracing::warn!("Failed to read {} for linting: {}", path.display(), e);
                    Vec::new()
                }
            })
            .collect();

        for finding in &findings {
            match finding.level {
                RuleLevel::Error => tracing::error!("{}", finding),
                _ => tracing::warn!("{}", finding),
            }
        }

        let blocking = lint.fail_on_error && self.config.mode.is_production();
        if blocking && findings.iter().any(|f| f.level == RuleLevel::Error) {
            let mut report = BuildReport::default();
            for finding in findings.iter().filter(|f| f.level == RuleLevel::Error) {
                report.push(AssetFailure::new(
                    &finding.path,
                    "lint",
                    format!("line {}: {} ({})", finding.line, finding.message, finding.rule),
                ));
            }
            report.sort();
            return Err(BuildError::Failed(report));
        }

        Ok(findings)
    }

    /// Resolve and transform every asset reachable from the entries.
    fn assemble(&self) -> Result<ModuleGraph, BuildError> {
        let mut roots = Vec::with_capacity(self.config.entries.len());
        for entry in &self.config.entries {
            let path = self
                .resolver
                .resolve_from_dir(&entry.path, &self.config.src_dir)
                .map_err(|e| BuildError::MissingEntry {
                    name: entry.name.clone(),
                    message: e.to_string(),
                })?;
            roots.push((entry.name.clone(), path));
        }

        let mut graph = ModuleGraph::new();
        let mut report = BuildReport::default();
        let mut links: Vec<(ModuleId, Vec<PathBuf>)> = Vec::new();

        let mut queued: HashSet<PathBuf> = HashSet::new();
        let mut wave: Vec<PathBuf> = Vec::new();
        for (_, path) in &roots {
            if queued.insert(path.clone()) {
                wave.push(path.clone());
            }
        }

        while !wave.is_empty() {
            tracing::trace!("processing wave of {} asset(s)", wave.len());

            let results: Vec<Result<Processed, ProcessError>> =
                wave.par_iter().map(|path| self.process(path)).collect();

            let mut next = Vec::new();
            for result in results {
                match result {
                    Ok(processed) => {
                        report.failures.extend(processed.failures);
                        for dep in &processed.dependencies {
                            if queued.insert(dep.clone()) {
                                next.push(dep.clone());
                            }
                        }
                        let id = graph.insert(processed.module);
                        links.push((id, processed.dependencies));
                    }
                    Err(ProcessError::Failed(failure)) => report.push(failure),
                    Err(ProcessError::Fatal(err)) => return Err(err),
                }
            }
            wave = next;
        }

        if !report.is_empty() {
            report.sort();
            return Err(BuildError::Failed(report));
        }

        for (id, deps) in links {
            let deps = deps.iter().filter_map(|d| graph.id_of(d)).collect();
            graph.set_dependencies(id, deps);
        }

        for (name, path) in roots {
            if let Some(id) = graph.id_of(&path) {
                graph.add_entry(name, id);
            }
        }

        Ok(graph)
    }

    /// Transform one asset and resolve its requests.
    fn process(&self, path: &Path) -> Result<Processed, ProcessError> {
        let kind = ContentKind::from_path(path);
        let key = self.module_key(path);

        let module = |code: String| Module {
            path: path.to_path_buf(),
            key: key.clone(),
            kind,
            code,
            css: None,
            hot_accept: false,
            asset: None,
            dependencies: Vec::new(),
        };

        match kind {
            ContentKind::Script | ContentKind::Sass | ContentKind::Css => {
                let source = read_text(path)?;
                let content = self
                    .chain
                    .apply(
                        path,
                        AssetContent::new(kind, source),
                        &self.config.transform_context(),
                    )
                    .map_err(|e| ProcessError::Failed(e.into()))?;

                let scanned = scan_module(&content.code).map_err(|e| {
                    ProcessError::Failed(AssetFailure::new(path, "scan", e.to_string()))
                })?;

                let mut dependencies = Vec::new();
                let mut failures = Vec::new();
                let mut keys: HashMap<&str, String> = HashMap::new();

                for specifier in scanned.requests() {
                    match self.resolver.resolve(specifier, path) {
                        Ok(dep) => {
                            keys.insert(specifier, self.module_key(&dep));
                            if !dependencies.contains(&dep) {
                                dependencies.push(dep);
                            }
                        }
                        Err(e) => failures.push(AssetFailure::resolution(path, &e)),
                    }
                }

                let code = link_module(&content.code, &scanned, |s| {
                    keys.get(s).cloned().unwrap_or_else(|| s.to_string())
                });

                Ok(Processed {
                    module: Module {
                        css: content.extracted_css,
                        hot_accept: scanned.hot_accept,
                        ..module(code)
                    },
                    dependencies,
                    failures,
                })
            }
            ContentKind::Json => {
                let source = read_text(path)?;
                let value: serde_json::Value = serde_json::from_str(&source).map_err(|e| {
                    ProcessError::Failed(AssetFailure::new(path, "json", e.to_string()))
                })?;

                Ok(Processed {
                    module: module(format!("module.exports = {value};\n")),
                    dependencies: Vec::new(),
                    failures: Vec::new(),
                })
            }
            ContentKind::Image | ContentKind::Markup | ContentKind::Other => {
                let bytes = fs::read(path).map_err(|e| fatal(path, e))?;
                let name = self.asset_name(path);
                let file_name = output_file_name(&name, ArtifactKind::Asset, self.config.mode, &bytes);
                let url = serde_json::to_string(&format!("{}{}", self.config.public_path, file_name))
                    .map_err(|e| fatal(path, e))?;

                Ok(Processed {
                    module: Module {
                        asset: Some(OutputArtifact {
                            name,
                            kind: ArtifactKind::Asset,
                            file_name,
                            content: bytes,
                        }),
                        ..module(format!("module.exports = {url};\n"))
                    },
                    dependencies: Vec::new(),
                    failures: Vec::new(),
                })
            }
        }
    }

    /// Output name of an asset: its path under the source root, else under
    /// the project root, else its file name.
    fn asset_name(&self, path: &Path) -> String {
        let relative = path
            .strip_prefix(&self.src_root)
            .or_else(|_| path.strip_prefix(&self.root))
            .ok()
            .filter(|p| !p.as_os_str().is_empty());

        match relative {
            Some(relative) => relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
            None => path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "asset".to_string()),
        }
    }

    /// Emit the commons chunk, then one script and stylesheet per entry.
    ///
    /// Returns the script and stylesheet URLs in load order.
    fn emit_bundles(&self, graph: &ModuleGraph, output: &mut OutputSet) -> (Vec<String>, Vec<String>) {
        let mode = self.config.mode;
        let counts = graph.entry_counts();
        let mut scripts = Vec::new();
        let mut styles = Vec::new();

        let mut shared = Vec::new();
        let mut seen = HashSet::new();
        for (_, root) in graph.entries() {
            for id in graph.execution_order(*root) {
                if counts[id] > 1 && seen.insert(id) {
                    shared.push(id);
                }
            }
        }

        if !shared.is_empty() {
            let code = render_chunk(&factories(graph, &shared), None);
            let file_name = output_file_name(COMMONS_CHUNK, ArtifactKind::Script, mode, code.as_bytes());
            scripts.push(format!("{}{}", self.config.public_path, file_name));
            output.push(OutputArtifact {
                name: COMMONS_CHUNK.to_string(),
                kind: ArtifactKind::Script,
                file_name,
                content: code.into_bytes(),
            });
        }

        for (name, root) in graph.entries() {
            let order = graph.execution_order(*root);
            let own: Vec<ModuleId> = order.iter().copied().filter(|id| counts[*id] == 1).collect();
            let entry_key = graph.get(*root).map(|m| m.key.as_str());

            let code = render_chunk(&factories(graph, &own), entry_key);
            let file_name = output_file_name(name, ArtifactKind::Script, mode, code.as_bytes());
            scripts.push(format!("{}{}", self.config.public_path, file_name));
            output.push(OutputArtifact {
                name: name.clone(),
                kind: ArtifactKind::Script,
                file_name,
                content: code.into_bytes(),
            });

            let css = order
                .iter()
                .filter_map(|id| graph.get(*id).and_then(|m| m.css.as_deref()))
                .filter(|css| !css.trim().is_empty())
                .collect::<Vec<_>>()
                .join("\n");

            if !css.is_empty() {
                let file_name = output_file_name(name, ArtifactKind::Stylesheet, mode, css.as_bytes());
                styles.push(format!("{}{}", self.config.public_path, file_name));
                output.push(OutputArtifact {
                    name: name.clone(),
                    kind: ArtifactKind::Stylesheet,
                    file_name,
                    content: css.into_bytes(),
                });
            }
        }

        (scripts, styles)
    }

    fn emit_icons(&self, output: &mut OutputSet) -> Result<(Vec<String>, Option<bool>), BuildError> {
        let Some(icons) = &self.config.icons else {
            return Ok((Vec::new(), None));
        };

        let source = self.config.source_path(&icons.source);
        if !source.is_file() {
            tracing::warn!("Icon source {} not found, skipping icons", source.display());
            return Ok((Vec::new(), None));
        }

        let emitter = IconEmitter::new(
            icons.clone(),
            Some(self.config.cache_dir.clone()),
            self.config.public_path.clone(),
        );
        let set = emitter.emit(&source)?;

        for (file_name, content) in set.icons {
            output.push(OutputArtifact {
                name: file_name.clone(),
                kind: ArtifactKind::Icon,
                file_name,
                content,
            });
        }
        let (file_name, content) = set.manifest;
        output.push(OutputArtifact {
            name: file_name.clone(),
            kind: ArtifactKind::Manifest,
            file_name,
            content,
        });

        Ok((set.head_tags, Some(set.regenerated)))
    }

    fn emit_html(
        &self,
        output: &mut OutputSet,
        scripts: Vec<String>,
        styles: Vec<String>,
        head_tags: Vec<String>,
    ) -> Result<(), BuildError> {
        let Some(html) = &self.config.html else {
            return Ok(());
        };

        let template_path = self.config.source_path(&html.template);
        let template = if template_path.is_file() {
            Some(fs::read_to_string(&template_path).map_err(|e| {
                BuildError::Template(format!("{}: {}", template_path.display(), e))
            })?)
        } else {
            tracing::debug!("no template at {}, using built-in shell", template_path.display());
            None
        };

        let rendered = HtmlEmitter::new(template)?.render(&ShellContext {
            title: html.title.clone(),
            mode: self.config.mode.to_string(),
            styles,
            scripts,
            head_tags,
            client_script: self.config.dev_client.clone(),
        })?;

        output.push(OutputArtifact {
            name: html.filename.clone(),
            kind: ArtifactKind::Html,
            file_name: html.filename.clone(),
            content: rendered.into_bytes(),
        });

        Ok(())
    }
}

fn factories<'a>(graph: &'a ModuleGraph, ids: &[ModuleId]) -> Vec<(&'a str, &'a str)> {
    ids.iter()
        .filter_map(|id| graph.get(*id))
        .map(|m| (m.key.as_str(), m.code.as_str()))
        .collect()
}

fn read_text(path: &Path) -> Result<String, ProcessError> {
    fs::read_to_string(path).map_err(|e| fatal(path, e))
}

fn fatal(path: &Path, err: impl std::fmt::Display) -> ProcessError {
    ProcessError::Fatal(BuildError::Assembly {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}
