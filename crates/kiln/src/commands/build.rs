//! Build command.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use kiln_bundle::{BuildConfig, Bundler, Mode};

use crate::config::{load_config, select_mode, MODE_ENV};

/// Resolve the effective build configuration for a command.
pub fn resolve_config(
    config_path: &Path,
    mode: Option<Mode>,
    src: Option<PathBuf>,
    out: Option<PathBuf>,
) -> Result<BuildConfig> {
    let file = load_config(config_path)?;
    let env = std::env::var(MODE_ENV).ok();
    let mode = select_mode(mode, env.as_deref(), &file)?;
    let root = project_root(config_path)?;

    let mut config = file.build_config(mode, &root)?;
    apply_overrides(&mut config, &root, src, out);

    Ok(config)
}

/// Apply `--src` and `--out` on top of the file configuration.
fn apply_overrides(
    config: &mut BuildConfig,
    root: &Path,
    src: Option<PathBuf>,
    out: Option<PathBuf>,
) {
    if let Some(src) = src {
        config.set_src_dir(root.join(src));
    }
    if let Some(out) = out {
        config.out_dir = root.join(out);
    }
}

/// Directory containing the config file, as an absolute path.
pub fn project_root(config_path: &Path) -> Result<PathBuf> {
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    Ok(match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => cwd.join(parent),
        _ => cwd,
    })
}

/// Run the build command.
pub async fn run(
    config_path: &Path,
    mode: Option<Mode>,
    src: Option<PathBuf>,
    out: Option<PathBuf>,
) -> Result<()> {
    let config = resolve_config(config_path, mode, src, out)?;
    tracing::info!("Building in {} mode...", config.mode);

    let out_dir = config.out_dir.clone();
    let bundler = Bundler::new(config)?;
    let (result, summary) = tokio::task::spawn_blocking(move || bundler.build_and_write())
        .await
        .context("Build task panicked")??;

    for artifact in result.output.iter() {
        tracing::debug!("  {} ({} bytes)", artifact.file_name, artifact.content.len());
    }

    tracing::info!(
        "Built {} modules into {} files ({} written) in {}ms",
        result.graph.len(),
        result.output.len(),
        summary.written,
        result.duration_ms
    );
    if !result.lint.is_empty() {
        tracing::info!("{} lint warning(s)", result.lint.len());
    }
    for removed in &summary.removed {
        tracing::debug!("  removed {}", removed);
    }
    if !summary.removed.is_empty() {
        tracing::info!("Removed {} stale file(s)", summary.removed.len());
    }

    tracing::info!("Output: {}", out_dir.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use pretty_assertions::assert_eq;

    #[test]
    fn src_flag_moves_preset_aliases() {
        let root = Path::new("/proj");
        let file = parse_config("[resolve.aliases]\n\"~shared\" = \"shared\"\n").unwrap();
        let mut config = file.build_config(Mode::Development, root).unwrap();

        apply_overrides(
            &mut config,
            root,
            Some(PathBuf::from("app")),
            Some(PathBuf::from("public")),
        );

        assert_eq!(config.src_dir, PathBuf::from("/proj/app"));
        assert_eq!(config.out_dir, PathBuf::from("/proj/public"));
        assert_eq!(
            config.aliases,
            vec![
                ("@".to_string(), PathBuf::from("/proj/app")),
                ("@core".to_string(), PathBuf::from("/proj/app/core")),
                ("~shared".to_string(), PathBuf::from("/proj/shared")),
            ]
        );
    }
}
