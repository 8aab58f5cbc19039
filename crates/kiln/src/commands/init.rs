//! Scaffold a new project.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

const FILES: &[(&str, &str)] = &[
    ("kiln.toml", DEFAULT_CONFIG),
    ("src/index.js", DEFAULT_INDEX_JS),
    ("src/app.js", DEFAULT_APP_JS),
    ("src/index.html", DEFAULT_TEMPLATE),
    ("src/styles.scss", DEFAULT_STYLES),
    ("src/favicon.svg", DEFAULT_FAVICON),
];

/// Run the init command.
pub async fn run(config_path: &Path, yes: bool) -> Result<()> {
    tracing::info!("Initializing kiln project...");

    let root = super::build::project_root(config_path)?;
    let created = scaffold(&root, yes)?;

    if created.is_empty() {
        tracing::warn!("Project files already exist. Use --yes to overwrite.");
        return Ok(());
    }

    for path in &created {
        tracing::info!("Created {}", path.display());
    }

    tracing::info!("Initialization complete!");
    tracing::info!("Run 'kiln dev' to start the development server.");

    Ok(())
}

/// Write the starter files under `root`, returning the relative paths written.
///
/// Existing files are left alone unless `overwrite` is set.
pub fn scaffold(root: &Path, overwrite: bool) -> Result<Vec<PathBuf>> {
    let mut created = Vec::new();

    for (relative, content) in FILES {
        let path = root.join(relative);
        if path.exists() && !overwrite {
            tracing::debug!("Skipping existing {}", path.display());
            continue;
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&path, content).with_context(|| format!("Failed to write {}", relative))?;
        created.push(PathBuf::from(relative));
    }

    Ok(created)
}

const DEFAULT_CONFIG: &str = r##"# kiln configuration

[build]
# Source and output directories, relative to this file
src = "src"
out = "dist"

# Mode when neither --mode nor KILN_MODE is given
# mode = "production"

[entries]
# Entry name = specifier resolved from the source directory
main = "./index.js"

[resolve]
extensions = [".js", ".json"]

[resolve.aliases]
"@" = "src"

[html]
template = "index.html"
title = "Kiln App"

[icons]
source = "favicon.svg"
app_name = "Kiln App"
theme_color = "#ffffff"

[dev]
port = 7777
"##;

const DEFAULT_INDEX_JS: &str = r#"import './styles.scss';
import { render } from './app.js';

render(document.getElementById('app'));
"#;

const DEFAULT_APP_JS: &str = r#"export function render(root) {
  root.textContent = 'Hello from kiln';
}

if (module.hot) {
  module.hot.accept();
}
"#;

const DEFAULT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>{{ title }}</title>
</head>
<body>
  <div id="app"></div>
</body>
</html>
"#;

const DEFAULT_STYLES: &str = r#"$accent: #e8590c;

body {
  margin: 0;
  font-family: system-ui, sans-serif;

  #app {
    padding: 2rem;
    color: $accent;
  }
}
"#;

const DEFAULT_FAVICON: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 64 64">
  <rect width="64" height="64" rx="12" fill="#e8590c"/>
  <path d="M20 44 L32 16 L44 44 Z" fill="#ffffff"/>
</svg>
"##;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use kiln_bundle::{Bundler, Mode};
    use tempfile::TempDir;

    #[test]
    fn scaffolds_then_skips_existing() {
        let temp = TempDir::new().unwrap();

        let created = scaffold(temp.path(), false).unwrap();
        assert_eq!(created.len(), FILES.len());
        assert!(temp.path().join("src/favicon.svg").exists());

        fs::write(temp.path().join("src/app.js"), "// mine\n").unwrap();
        assert!(scaffold(temp.path(), false).unwrap().is_empty());
        assert_eq!(
            fs::read_to_string(temp.path().join("src/app.js")).unwrap(),
            "// mine\n"
        );

        assert_eq!(scaffold(temp.path(), true).unwrap().len(), FILES.len());
    }

    #[test]
    fn scaffolded_project_builds() {
        let temp = TempDir::new().unwrap();
        scaffold(temp.path(), false).unwrap();

        let file = parse_config(DEFAULT_CONFIG).unwrap();
        let config = file.build_config(Mode::Development, temp.path()).unwrap();
        let result = Bundler::new(config).unwrap().build().unwrap();

        assert_eq!(result.scripts(), vec!["main.bundle.js"]);
        assert_eq!(result.stylesheets(), vec!["main.bundle.css"]);
        assert!(result.output.get("index.html").is_some());
        assert!(result.output.get("icons/favicon.ico").is_some());
    }
}
