//! HTML shell rendering.
//!
//! The shell template is rendered with minijinja, then stylesheet links and
//! head tags are injected before `</head>` and scripts before `</body>`.

use minijinja::{context, Environment};
use serde::Serialize;

use crate::error::BuildError;

const SHELL: &str = "index.html";

/// Values available to the shell template and the injected tags.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShellContext {
    pub title: String,
    pub mode: String,
    /// Stylesheet URLs, in load order
    pub styles: Vec<String>,
    /// Script URLs, in load order
    pub scripts: Vec<String>,
    /// Extra tags for `<head>` (icons, manifest)
    pub head_tags: Vec<String>,
    /// Live-update client script URL
    pub client_script: Option<String>,
}

/// Renders the HTML shell.
pub struct HtmlEmitter {
    env: Environment<'static>,
}

impl HtmlEmitter {
    /// Create an emitter for a user template, or the built-in one.
    pub fn new(template: Option<String>) -> Result<Self, BuildError> {
        let mut env = Environment::new();
        env.add_template_owned(
            SHELL.to_string(),
            template.unwrap_or_else(|| DEFAULT_TEMPLATE.to_string()),
        )
        .map_err(|e| BuildError::Template(e.to_string()))?;

        Ok(Self { env })
    }

    /// Render the shell with every reference injected.
    pub fn render(&self, ctx: &ShellContext) -> Result<String, BuildError> {
        let tmpl = self
            .env
            .get_template(SHELL)
            .map_err(|e| BuildError::Template(e.to_string()))?;

        let html = tmpl
            .render(context! {
                title => &ctx.title,
                mode => &ctx.mode,
            })
            .map_err(|e| BuildError::Template(e.to_string()))?;

        let mut head = String::new();
        for tag in &ctx.head_tags {
            head.push_str(&format!("  {tag}\n"));
        }
        for style in &ctx.styles {
            head.push_str(&format!("  <link rel=\"stylesheet\" href=\"{style}\">\n"));
        }

        let mut body = String::new();
        for script in &ctx.scripts {
            body.push_str(&format!("  <script defer src=\"{script}\"></script>\n"));
        }
        if let Some(client) = &ctx.client_script {
            body.push_str(&format!("  <script src=\"{client}\"></script>\n"));
        }

        let html = inject_before(&html, "</head>", &head, false);
        Ok(inject_before(&html, "</body>", &body, true))
    }
}

/// Insert `snippet` before the last (or first) occurrence of `tag`,
/// matched case-insensitively; append when the tag is missing.
fn inject_before(html: &str, tag: &str, snippet: &str, last: bool) -> String {
    if snippet.is_empty() {
        return html.to_string();
    }

    let lower = html.to_ascii_lowercase();
    let found = if last { lower.rfind(tag) } else { lower.find(tag) };

    match found {
        Some(idx) => {
            let mut out = String::with_capacity(html.len() + snippet.len());
            out.push_str(&html[..idx]);
            out.push_str(snippet);
            out.push_str(&html[idx..]);
            out
        }
        None if last => format!("{html}\n{snippet}"),
        None => format!("{snippet}{html}"),
    }
}

const DEFAULT_TEMPLATE: &str = r##"<!DOCTYPE html>
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
"##;
