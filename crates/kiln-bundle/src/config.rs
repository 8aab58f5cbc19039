//! Build configuration and mode presets.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use kiln_resolve::{AliasTable, ResolveOptions};
use kiln_transform::{LintOptions, TransformContext, DEFAULT_TARGET};
use serde::{Deserialize, Serialize};

/// Name of the shared chunk holding modules reached from more than one entry.
pub const COMMONS_CHUNK: &str = "commons";

/// Build mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Development,
    Production,
}

impl Mode {
    pub fn is_production(self) -> bool {
        self == Mode::Production
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Development => "development",
            Mode::Production => "production",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Mode::Development),
            "production" | "prod" => Ok(Mode::Production),
            other => Err(format!("unknown mode '{other}'")),
        }
    }
}

/// A named root of the module graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    /// Logical name, used for output file names
    pub name: String,
    /// Specifier resolved from the source root, e.g. `./index.js`
    pub path: String,
}

impl EntryPoint {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// HTML shell settings.
#[derive(Debug, Clone)]
pub struct HtmlConfig {
    /// Template path relative to the source root
    pub template: PathBuf,
    /// Output file name
    pub filename: String,
    /// Page title passed to the template
    pub title: String,
}

impl Default for HtmlConfig {
    fn default() -> Self {
        Self {
            template: PathBuf::from("index.html"),
            filename: "index.html".to_string(),
            title: "Kiln App".to_string(),
        }
    }
}

/// Icon generation settings.
#[derive(Debug, Clone)]
pub struct IconConfig {
    /// Source image relative to the source root (SVG or PNG)
    pub source: PathBuf,
    /// Application name written to the manifest
    pub app_name: String,
    pub theme_color: String,
    pub background_color: String,
    /// Reuse generated icons when the source image is unchanged
    pub cache: bool,
}

impl Default for IconConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("favicon.svg"),
            app_name: "Kiln App".to_string(),
            theme_color: "#ffffff".to_string(),
            background_color: "#ffffff".to_string(),
            cache: true,
        }
    }
}

/// Lint gate settings.
#[derive(Debug, Clone, Default)]
pub struct LintConfig {
    pub options: LintOptions,
    /// Fail production builds on error-level findings
    pub fail_on_error: bool,
}

/// Configuration for one build.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub mode: Mode,

    /// Project root; module ids are relative to it
    pub root: PathBuf,

    /// Source root; entries and the HTML template resolve from here
    pub src_dir: PathBuf,

    /// Output directory
    pub out_dir: PathBuf,

    /// Directory for persistent caches (generated icons)
    pub cache_dir: PathBuf,

    /// Entry points in declaration order
    pub entries: Vec<EntryPoint>,

    /// Import prefix aliases
    pub aliases: Vec<(String, PathBuf)>,

    /// Extensions tried for extension-less specifiers
    pub extensions: Vec<String>,

    /// Report a specifier matching several extensions instead of taking the first
    pub strict_extensions: bool,

    /// Language level scripts are lowered to
    pub script_target: String,

    /// Minify scripts and stylesheets
    pub minify: bool,

    /// Delete output files the build did not produce
    pub clean: bool,

    /// URL prefix for artifact references in the HTML shell
    pub public_path: String,

    pub html: Option<HtmlConfig>,

    pub icons: Option<IconConfig>,

    pub lint: Option<LintConfig>,

    /// Live-update client script URL injected into the HTML shell
    pub dev_client: Option<String>,
}

impl BuildConfig {
    /// Preset for `mode`, rooted at `root`.
    pub fn preset(mode: Mode, root: impl Into<PathBuf>) -> Self {
        match mode {
            Mode::Development => Self::development(root),
            Mode::Production => Self::production(root),
        }
    }

    /// Readable output, stable names, no cleaning.
    pub fn development(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let src_dir = root.join("src");

        Self {
            mode: Mode::Development,
            out_dir: root.join("dist"),
            cache_dir: root.join(".kiln-cache"),
            entries: vec![EntryPoint::new("main", "./index.js")],
            aliases: vec![
                ("@".to_string(), src_dir.clone()),
                ("@core".to_string(), src_dir.join("core")),
            ],
            extensions: vec![".js".to_string(), ".json".to_string()],
            strict_extensions: false,
            script_target: DEFAULT_TARGET.to_string(),
            minify: false,
            clean: false,
            public_path: String::new(),
            html: Some(HtmlConfig::default()),
            icons: Some(IconConfig::default()),
            lint: Some(LintConfig::default()),
            dev_client: None,
            src_dir,
            root,
        }
    }

    /// Minified output, content-hashed names, stale files removed.
    pub fn production(root: impl Into<PathBuf>) -> Self {
        Self {
            mode: Mode::Production,
            minify: true,
            clean: true,
            lint: Some(LintConfig {
                options: LintOptions::default(),
                fail_on_error: true,
            }),
            ..Self::development(root)
        }
    }

    /// Resolver options derived from this configuration.
    pub fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            aliases: AliasTable::new(self.aliases.iter().cloned()),
            extensions: self.extensions.clone(),
            strict_extensions: self.strict_extensions,
            ..ResolveOptions::default()
        }
    }

    /// Options handed to every transformer.
    pub fn transform_context(&self) -> TransformContext {
        TransformContext {
            production: self.mode.is_production(),
            minify: self.minify,
        }
    }

    /// Check the configuration before building.
    pub fn validate(&self) -> Result<(), String> {
        if self.entries.is_empty() {
            return Err("at least one entry point is required".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for entry in &self.entries {
            if entry.name.is_empty() || entry.name.contains(['/', '\\']) {
                return Err(format!("invalid entry name '{}'", entry.name));
            }
            if entry.name == COMMONS_CHUNK {
                return Err(format!("entry name '{COMMONS_CHUNK}' is reserved"));
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(format!("duplicate entry name '{}'", entry.name));
            }
        }

        for ext in &self.extensions {
            if !ext.starts_with('.') {
                return Err(format!("extension '{ext}' must start with '.'"));
            }
        }

        // Cleaning the output directory must never reach project files.
        let out = normalize(&self.root.join(&self.out_dir));
        for (label, dir) in [
            ("project root", &self.root),
            ("source directory", &self.src_dir),
            ("cache directory", &self.cache_dir),
        ] {
            if normalize(&self.root.join(dir)).starts_with(&out) {
                return Err(format!(
                    "output directory {} contains the {label}",
                    self.out_dir.display()
                ));
            }
        }

        Ok(())
    }

    /// Move the source root, carrying along aliases that pointed inside it.
    pub fn set_src_dir(&mut self, src_dir: PathBuf) {
        for (_, target) in &mut self.aliases {
            if let Ok(rest) = target.strip_prefix(&self.src_dir) {
                *target = src_dir.join(rest);
            }
        }
        self.src_dir = src_dir;
    }

    /// Absolute form of a path relative to the source root.
    pub fn source_path(&self, relative: &Path) -> PathBuf {
        if relative.is_absolute() {
            relative.to_path_buf()
        } else {
            self.src_dir.join(relative)
        }
    }
}

/// Lexically resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn development_preset() {
        let config = BuildConfig::development("/proj");

        assert_eq!(config.mode, Mode::Development);
        assert_eq!(config.src_dir, PathBuf::from("/proj/src"));
        assert_eq!(config.out_dir, PathBuf::from("/proj/dist"));
        assert_eq!(config.entries, vec![EntryPoint::new("main", "./index.js")]);
        assert!(!config.minify);
        assert!(!config.clean);
    }

    #[test]
    fn production_preset() {
        let config = BuildConfig::production("/proj");

        assert_eq!(config.mode, Mode::Production);
        assert!(config.minify);
        assert!(config.clean);
        assert!(config.transform_context().production);
        assert!(config.lint.unwrap().fail_on_error);
    }

    #[test]
    fn default_aliases() {
        let options = BuildConfig::development("/proj").resolve_options();

        assert_eq!(
            options.aliases.apply("@core/util"),
            Some(PathBuf::from("/proj/src/core/util"))
        );
        assert_eq!(
            options.aliases.apply("@/app"),
            Some(PathBuf::from("/proj/src/app"))
        );
    }

    #[test]
    fn parses_mode() {
        assert_eq!("production".parse::<Mode>(), Ok(Mode::Production));
        assert_eq!("DEV".parse::<Mode>(), Ok(Mode::Development));
        assert!("staging".parse::<Mode>().is_err());
    }

    #[test]
    fn rejects_invalid_entries() {
        let mut config = BuildConfig::development("/proj");
        config.entries.push(EntryPoint::new("main", "./other.js"));
        assert!(config.validate().unwrap_err().contains("duplicate"));

        config.entries = vec![EntryPoint::new(COMMONS_CHUNK, "./x.js")];
        assert!(config.validate().unwrap_err().contains("reserved"));

        config.entries.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_output_over_project_files() {
        let mut config = BuildConfig::production("/proj");
        assert!(config.validate().is_ok());

        config.out_dir = PathBuf::from("/proj");
        assert!(config.validate().unwrap_err().contains("project root"));

        config.out_dir = PathBuf::from("/proj/src/..");
        assert!(config.validate().unwrap_err().contains("project root"));

        config.out_dir = PathBuf::from("/");
        assert!(config.validate().is_err());

        config.out_dir = PathBuf::from("/proj/src");
        assert!(config.validate().unwrap_err().contains("source directory"));

        config.out_dir = PathBuf::from("/proj/.kiln-cache");
        assert!(config.validate().unwrap_err().contains("cache directory"));

        config.out_dir = PathBuf::from("/proj/src/dist");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn moving_src_rebases_aliases() {
        let mut config = BuildConfig::development("/proj");
        config.aliases.push(("~lib".to_string(), PathBuf::from("/proj/lib")));
        config.set_src_dir(PathBuf::from("/proj/app"));

        assert_eq!(config.src_dir, PathBuf::from("/proj/app"));
        assert_eq!(
            config.aliases,
            vec![
                ("@".to_string(), PathBuf::from("/proj/app")),
                ("@core".to_string(), PathBuf::from("/proj/app/core")),
                ("~lib".to_string(), PathBuf::from("/proj/lib")),
            ]
        );
    }
}
