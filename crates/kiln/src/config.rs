//! Project configuration file (kiln.toml).
//!
//! Every value is optional. Values present in the file replace the mode
//! preset; command-line flags replace both.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use kiln_bundle::{BuildConfig, EntryPoint, HtmlConfig, IconConfig, LintConfig, Mode};
use kiln_transform::RuleLevel;
use serde::Deserialize;

/// Environment variable selecting the mode when `--mode` is absent.
pub const MODE_ENV: &str = "KILN_MODE";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub build: BuildSection,
    /// Entry name to specifier, in declaration order
    pub entries: Option<toml::Table>,
    #[serde(default)]
    pub resolve: ResolveSection,
    #[serde(default)]
    pub html: HtmlSection,
    #[serde(default)]
    pub icons: IconsSection,
    #[serde(default)]
    pub dev: DevSection,
    #[serde(default)]
    pub lint: LintSection,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct BuildSection {
    pub mode: Option<Mode>,
    pub src: Option<PathBuf>,
    pub out: Option<PathBuf>,
    pub cache: Option<PathBuf>,
    pub target: Option<String>,
    pub minify: Option<bool>,
    pub clean: Option<bool>,
    pub public_path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ResolveSection {
    /// Prefix to directory, relative to the project root
    pub aliases: Option<toml::Table>,
    pub extensions: Option<Vec<String>>,
    pub strict: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HtmlSection {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub template: Option<PathBuf>,
    pub filename: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IconsSection {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub source: Option<PathBuf>,
    pub app_name: Option<String>,
    pub theme_color: Option<String>,
    pub background_color: Option<String>,
    pub cache: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DevSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_enabled")]
    pub open: bool,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LintSection {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub fail_on_error: Option<bool>,
    pub no_debugger: Option<RuleLevel>,
    pub no_console: Option<RuleLevel>,
}

fn default_enabled() -> bool {
    true
}
fn default_port() -> u16 {
    7777
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_debounce_ms() -> u64 {
    100
}

impl Default for HtmlSection {
    fn default() -> Self {
        Self {
            enabled: true,
            template: None,
            filename: None,
            title: None,
        }
    }
}

impl Default for IconsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            source: None,
            app_name: None,
            theme_color: None,
            background_color: None,
            cache: None,
        }
    }
}

impl Default for DevSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            open: true,
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl Default for LintSection {
    fn default() -> Self {
        Self {
            enabled: true,
            fail_on_error: None,
            no_debugger: None,
            no_console: None,
        }
    }
}

/// Load the config file if it exists.
/// Returns an error if the file exists but is malformed.
pub fn load_config(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        tracing::debug!("No {} found, using defaults", path.display());
        return Ok(ConfigFile::default());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config = parse_config(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    tracing::info!("Loaded config from {}", path.display());
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<ConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Pick the build mode: flag, then environment, then file, then development.
pub fn select_mode(flag: Option<Mode>, env: Option<&str>, file: &ConfigFile) -> Result<Mode> {
    if let Some(mode) = flag {
        return Ok(mode);
    }
    if let Some(value) = env.filter(|v| !v.trim().is_empty()) {
        return value
            .parse()
            .map_err(|e: String| anyhow::anyhow!("{MODE_ENV}: {e}"));
    }
    Ok(file.build.mode.unwrap_or_default())
}

impl ConfigFile {
    /// Preset for `mode` rooted at `root`, overlaid with this file.
    pub fn build_config(&self, mode: Mode, root: &Path) -> Result<BuildConfig> {
        let mut config = BuildConfig::preset(mode, root);
        let rooted = |p: &PathBuf| root.join(p);

        let build = &self.build;
        if let Some(src) = &build.src {
            config.set_src_dir(rooted(src));
        }
        if let Some(out) = &build.out {
            config.out_dir = rooted(out);
        }
        if let Some(cache) = &build.cache {
            config.cache_dir = rooted(cache);
        }
        if let Some(target) = &build.target {
            config.script_target = target.clone();
        }
        if let Some(minify) = build.minify {
            config.minify = minify;
        }
        if let Some(clean) = build.clean {
            config.clean = clean;
        }
        if let Some(public_path) = &build.public_path {
            config.public_path = public_path.clone();
        }

        if let Some(entries) = &self.entries {
            config.entries = entries
                .iter()
                .map(|(name, value)| {
                    value
                        .as_str()
                        .map(|path| EntryPoint::new(name.clone(), path))
                        .with_context(|| format!("entry '{name}' must be a string"))
                })
                .collect::<Result<_>>()?;
        }

        self.apply_resolve(&mut config, root)?;
        self.apply_html(&mut config);
        self.apply_icons(&mut config);
        self.apply_lint(&mut config);

        Ok(config)
    }

    fn apply_resolve(&self, config: &mut BuildConfig, root: &Path) -> Result<()> {
        let resolve = &self.resolve;

        if let Some(aliases) = &resolve.aliases {
            for (prefix, value) in aliases {
                let dir = value
                    .as_str()
                    .with_context(|| format!("alias '{prefix}' must be a string"))?;
                let dir = root.join(dir);
                match config.aliases.iter_mut().find(|(p, _)| p == prefix) {
                    Some(existing) => existing.1 = dir,
                    None => config.aliases.push((prefix.clone(), dir)),
                }
            }
        }
        if let Some(extensions) = &resolve.extensions {
            config.extensions = extensions.clone();
        }
        if let Some(strict) = resolve.strict {
            config.strict_extensions = strict;
        }

        Ok(())
    }

    fn apply_html(&self, config: &mut BuildConfig) {
        let section = &self.html;
        if !section.enabled {
            config.html = None;
            return;
        }

        let html = config.html.get_or_insert_with(HtmlConfig::default);
        if let Some(template) = &section.template {
            html.template = template.clone();
        }
        if let Some(filename) = &section.filename {
            html.filename = filename.clone();
        }
        if let Some(title) = &section.title {
            html.title = title.clone();
        }
    }

    fn apply_icons(&self, config: &mut BuildConfig) {
        let section = &self.icons;
        if !section.enabled {
            config.icons = None;
            return;
        }

        let icons = config.icons.get_or_insert_with(IconConfig::default);
        if let Some(source) = &section.source {
            icons.source = source.clone();
        }
        if let Some(name) = &section.app_name {
            icons.app_name = name.clone();
        }
        if let Some(color) = &section.theme_color {
            icons.theme_color = color.clone();
        }
        if let Some(color) = &section.background_color {
            icons.background_color = color.clone();
        }
        if let Some(cache) = section.cache {
            icons.cache = cache;
        }
    }

    fn apply_lint(&self, config: &mut BuildConfig) {
        let section = &self.lint;
        if !section.enabled {
            config.lint = None;
            return;
        }

        let lint = config.lint.get_or_insert_with(LintConfig::default);
        if let Some(fail) = section.fail_on_error {
            lint.fail_on_error = fail;
        }
        if let Some(level) = section.no_debugger {
            lint.options.no_debugger = level;
        }
        if let Some(level) = section.no_console {
            lint.options.no_console = level;
        }
    }

    /// Debounce window for the dev loop.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.dev.debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_file_keeps_preset() {
        let file = parse_config("").unwrap();
        let config = file.build_config(Mode::Production, Path::new("/proj")).unwrap();

        assert_eq!(config.mode, Mode::Production);
        assert!(config.minify);
        assert!(config.clean);
        assert_eq!(config.out_dir, PathBuf::from("/proj/dist"));
        assert_eq!(file.dev.port, 7777);
    }

    #[test]
    fn file_values_override_preset() {
        let file = parse_config(
            r##"
[build]
out = "public"
minify = true

[entries]
app = "./app.js"
admin = "./admin/index.js"

[resolve]
extensions = [".js", ".mjs", ".json"]
aliases = { "@core" = "lib/core", "~" = "src" }

[html]
title = "Dashboard"

[icons]
enabled = false

[lint]
no_console = "off"

[dev]
port = 3000
"##,
        )
        .unwrap();
        let config = file.build_config(Mode::Development, Path::new("/proj")).unwrap();

        assert_eq!(config.out_dir, PathBuf::from("/proj/public"));
        assert!(config.minify);
        assert!(!config.clean);
        assert_eq!(
            config.entries,
            vec![
                EntryPoint::new("app", "./app.js"),
                EntryPoint::new("admin", "./admin/index.js"),
            ]
        );
        assert_eq!(config.extensions, vec![".js", ".mjs", ".json"]);
        assert_eq!(
            config.aliases,
            vec![
                ("@".to_string(), PathBuf::from("/proj/src")),
                ("@core".to_string(), PathBuf::from("/proj/lib/core")),
                ("~".to_string(), PathBuf::from("/proj/src")),
            ]
        );
        assert_eq!(config.html.unwrap().title, "Dashboard");
        assert!(config.icons.is_none());
        assert_eq!(config.lint.unwrap().options.no_console, RuleLevel::Off);
        assert_eq!(file.dev.port, 3000);
        assert_eq!(file.dev.host, "127.0.0.1");
    }

    #[test]
    fn src_setting_moves_preset_aliases() {
        let file = parse_config(
            r#"
[build]
src = "app"

[resolve]
aliases = { "@core" = "lib/core" }
"#,
        )
        .unwrap();
        let config = file.build_config(Mode::Development, Path::new("/proj")).unwrap();

        assert_eq!(config.src_dir, PathBuf::from("/proj/app"));
        assert_eq!(
            config.aliases,
            vec![
                ("@".to_string(), PathBuf::from("/proj/app")),
                ("@core".to_string(), PathBuf::from("/proj/lib/core")),
            ]
        );
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(parse_config("[build]\nminfy = true\n").is_err());
    }

    #[test]
    fn rejects_non_string_entries() {
        let file = parse_config("[entries]\nmain = 1\n").unwrap();
        assert!(file.build_config(Mode::Development, Path::new("/proj")).is_err());
    }

    #[test]
    fn mode_precedence() {
        let file = parse_config("[build]\nmode = \"production\"\n").unwrap();

        assert_eq!(select_mode(None, None, &file).unwrap(), Mode::Production);
        assert_eq!(select_mode(None, Some("dev"), &file).unwrap(), Mode::Development);
        assert_eq!(
            select_mode(Some(Mode::Production), Some("dev"), &file).unwrap(),
            Mode::Production
        );
        assert_eq!(
            select_mode(None, None, &ConfigFile::default()).unwrap(),
            Mode::Development
        );
        assert!(select_mode(None, Some("staging"), &file).is_err());
    }
}
