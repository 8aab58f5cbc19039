//! Dev loop: build, watch, rebuild, and push live updates.
//!
//! The controller owns the last successful build. Each rebuild runs on a
//! blocking thread; on success its output replaces the served set in one
//! swap, on failure the previous set stays live and the error is pushed to
//! connected pages.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};

use kiln_bundle::{render_hot_update, ArtifactKind, BuildResult, Bundler, OutputSet};

use crate::watcher::WatchEvent;
use crate::websocket::{HmrHub, HmrMessage};

/// Where the dev loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DevState {
    Idle,
    Building,
    Serving,
    Rebuilding,
}

/// State shared between the controller and request handlers.
pub struct ServerState {
    pub status: DevState,

    /// Last successful output
    pub output: Arc<OutputSet>,

    /// Error from the most recent build, if it failed
    pub error: Option<String>,

    /// Builds run so far, successful or not
    pub builds: u64,

    pub hmr: HmrHub,
}

impl ServerState {
    pub fn new(hmr: HmrHub) -> Self {
        Self {
            status: DevState::Idle,
            output: Arc::new(OutputSet::new()),
            error: None,
            builds: 0,
            hmr,
        }
    }
}

pub type SharedState = Arc<RwLock<ServerState>>;

/// Drives builds for the dev server.
pub struct DevController {
    bundler: Arc<Bundler>,
    state: SharedState,
    debounce: Duration,
    last: Option<BuildResult>,
}

impl DevController {
    pub fn new(bundler: Arc<Bundler>, state: SharedState, debounce: Duration) -> Self {
        Self {
            bundler,
            state,
            debounce,
            last: None,
        }
    }

    /// Initial build, then one rebuild per coalesced burst of events.
    pub async fn run(mut self, mut events: mpsc::Receiver<WatchEvent>) {
        self.build().await;

        while let Some(first) = events.recv().await {
            let mut changed = BTreeSet::new();
            changed.insert(first.path().to_path_buf());

            // Wait for the burst to go quiet. A closed channel still gets
            // its last rebuild.
            let mut closed = false;
            loop {
                match tokio::time::timeout(self.debounce, events.recv()).await {
                    Ok(Some(event)) => {
                        changed.insert(event.path().to_path_buf());
                    }
                    Ok(None) => {
                        closed = true;
                        break;
                    }
                    Err(_) => break,
                }
            }

            log_changes(&changed);
            self.build().await;
            if closed {
                return;
            }
        }
    }

    /// Run one build and publish its outcome. Returns whether it succeeded.
    pub async fn build(&mut self) -> bool {
        let status = if self.last.is_some() {
            DevState::Rebuilding
        } else {
            DevState::Building
        };
        {
            let mut state = self.state.write().await;
            state.status = status;
            state.builds += 1;
        }

        let bundler = Arc::clone(&self.bundler);
        let outcome = tokio::task::spawn_blocking(move || bundler.build())
            .await
            .map_err(|e| e.to_string())
            .and_then(|r| r.map_err(|e| e.to_string()));

        match outcome {
            Ok(result) => {
                let messages = plan_update(self.last.as_ref(), &result);
                tracing::info!(
                    "Built {} module(s) in {}ms",
                    result.graph.len(),
                    result.duration_ms
                );

                {
                    let mut state = self.state.write().await;
                    state.output = Arc::new(result.output.clone());
                    state.error = None;
                    state.status = DevState::Serving;
                    for msg in messages {
                        state.hmr.send(msg);
                    }
                }

                self.last = Some(result);
                true
            }
            Err(message) => {
                tracing::error!("{}", message);

                let mut state = self.state.write().await;
                state.error = Some(message.clone());
                state.status = DevState::Serving;
                state.hmr.send(HmrMessage::Error { message });
                false
            }
        }
    }
}

fn log_changes(changed: &BTreeSet<PathBuf>) {
    match changed.len() {
        1 => {
            if let Some(path) = changed.iter().next() {
                tracing::info!("Changed: {}", path.display());
            }
        }
        n => tracing::info!("{} files changed", n),
    }
}

/// Decide which live-update messages move pages from `previous` to `next`.
///
/// Changed script modules become an `update` when every one of them accepts
/// hot updates; stylesheet-only changes become a `css-update`; anything
/// else (removed modules, a changed HTML shell, no previous build) reloads.
pub fn plan_update(previous: Option<&BuildResult>, next: &BuildResult) -> Vec<HmrMessage> {
    let Some(previous) = previous else {
        return vec![HmrMessage::Reload];
    };

    if html_of(&previous.output) != html_of(&next.output) {
        return vec![HmrMessage::Reload];
    }

    let before: HashMap<&str, _> = previous
        .graph
        .modules()
        .iter()
        .map(|m| (m.key.as_str(), m))
        .collect();

    let next_keys: BTreeSet<&str> = next.graph.modules().iter().map(|m| m.key.as_str()).collect();
    if before.keys().any(|key| !next_keys.contains(key)) {
        return vec![HmrMessage::Reload];
    }

    let mut scripts = Vec::new();
    let mut styles_changed = false;

    for module in next.graph.modules() {
        match before.get(module.key.as_str()) {
            Some(old) => {
                if old.code != module.code {
                    if !module.hot_accept {
                        return vec![HmrMessage::Reload];
                    }
                    scripts.push(module);
                }
                if old.css != module.css {
                    styles_changed = true;
                }
            }
            None => {
                scripts.push(module);
                if module.css.is_some() {
                    styles_changed = true;
                }
            }
        }
    }

    let mut messages = Vec::new();

    if !scripts.is_empty() {
        // New modules alone (nothing existing changed) cannot be reached
        // without a changed importer.
        if scripts.iter().all(|m| !before.contains_key(m.key.as_str())) {
            return vec![HmrMessage::Reload];
        }

        let factories: Vec<(&str, &str)> = scripts
            .iter()
            .map(|m| (m.key.as_str(), m.code.as_str()))
            .collect();
        messages.push(HmrMessage::Update {
            modules: scripts.iter().map(|m| m.key.clone()).collect(),
            code: render_hot_update(&factories),
        });
    }

    if styles_changed {
        messages.push(HmrMessage::CssUpdate {
            stylesheets: next
                .output
                .iter()
                .filter(|a| a.kind == ArtifactKind::Stylesheet)
                .map(|a| a.file_name.clone())
                .collect(),
        });
    }

    messages
}

fn html_of(output: &OutputSet) -> Option<&[u8]> {
    output
        .iter()
        .find(|a| a.kind == ArtifactKind::Html)
        .map(|a| a.content.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_bundle::{BuildConfig, Mode};
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn project(files: &[(&str, &str)]) -> TempDir {
        let temp = TempDir::new().unwrap();
        for (path, content) in files {
            let full = temp.path().join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, content).unwrap();
        }
        temp
    }

    fn bundler(root: &Path) -> Bundler {
        let mut config = BuildConfig::preset(Mode::Development, root);
        config.icons = None;
        Bundler::new(config).unwrap()
    }

    fn build(root: &Path) -> BuildResult {
        bundler(root).build().unwrap()
    }

    #[test]
    fn first_build_reloads() {
        let temp = project(&[("src/index.js", "export const a = 1;\n")]);
        assert_eq!(plan_update(None, &build(temp.path())), vec![HmrMessage::Reload]);
    }

    #[test]
    fn unchanged_build_sends_nothing() {
        let temp = project(&[("src/index.js", "export const a = 1;\n")]);
        let a = build(temp.path());
        let b = build(temp.path());
        assert!(plan_update(Some(&a), &b).is_empty());
    }

    #[test]
    fn self_accepting_change_is_hot_updated() {
        let temp = project(&[
            ("src/index.js", "import './view.js';\n"),
            ("src/view.js", "export const v = 1;\nif (module.hot) module.hot.accept();\n"),
        ]);
        let before = build(temp.path());

        fs::write(
            temp.path().join("src/view.js"),
            "export const v = 2;\nif (module.hot) module.hot.accept();\n",
        )
        .unwrap();
        let after = build(temp.path());

        let messages = plan_update(Some(&before), &after);
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            HmrMessage::Update { modules, code } => {
                assert_eq!(modules, &vec!["./src/view.js".to_string()]);
                assert!(code.contains("__kiln__.hotUpdate"));
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn non_accepting_change_reloads() {
        let temp = project(&[("src/index.js", "export const a = 1;\n")]);
        let before = build(temp.path());
        fs::write(temp.path().join("src/index.js"), "export const a = 2;\n").unwrap();
        let after = build(temp.path());

        assert_eq!(plan_update(Some(&before), &after), vec![HmrMessage::Reload]);
    }

    #[test]
    fn stylesheet_change_is_css_update() {
        let temp = project(&[
            ("src/index.js", "import './style.css';\n"),
            ("src/style.css", ".a { color: red; }\n"),
        ]);
        let before = build(temp.path());
        fs::write(temp.path().join("src/style.css"), ".a { color: blue; }\n").unwrap();
        let after = build(temp.path());

        assert_eq!(
            plan_update(Some(&before), &after),
            vec![HmrMessage::CssUpdate {
                stylesheets: vec!["main.bundle.css".to_string()],
            }]
        );
    }

    #[tokio::test]
    async fn failed_rebuild_keeps_last_good_output() {
        let temp = project(&[("src/index.js", "export const a = 1;\n")]);
        let hub = HmrHub::new();
        let state: SharedState = Arc::new(RwLock::new(ServerState::new(hub.clone())));
        let mut controller = DevController::new(
            Arc::new(bundler(temp.path())),
            Arc::clone(&state),
            Duration::from_millis(10),
        );

        assert!(controller.build().await);
        let good = Arc::clone(&state.read().await.output);
        assert!(good.get("main.bundle.js").is_some());

        let mut rx = hub.subscribe();
        fs::write(temp.path().join("src/index.js"), "import './missing.js';\n").unwrap();
        assert!(!controller.build().await);

        let state = state.read().await;
        assert_eq!(state.status, DevState::Serving);
        assert!(Arc::ptr_eq(&state.output, &good));
        assert!(state.error.as_deref().unwrap().contains("missing.js"));
        assert!(matches!(rx.try_recv(), Ok(HmrMessage::Error { .. })));
    }

    fn controller(root: &Path, debounce: Duration) -> (DevController, SharedState) {
        let state: SharedState = Arc::new(RwLock::new(ServerState::new(HmrHub::new())));
        let controller = DevController::new(Arc::new(bundler(root)), Arc::clone(&state), debounce);
        (controller, state)
    }

    #[tokio::test]
    async fn burst_of_changes_rebuilds_once() {
        let temp = project(&[("src/index.js", "export const a = 1;\n")]);
        let (controller, state) = controller(temp.path(), Duration::from_millis(200));
        let (tx, rx) = mpsc::channel(16);

        let path = temp.path().join("src/index.js");
        for _ in 0..5 {
            tx.send(WatchEvent::Modified(path.clone())).await.unwrap();
        }
        drop(tx);

        controller.run(rx).await;

        // Initial build plus one for the whole burst.
        let state = state.read().await;
        assert_eq!(state.builds, 2);
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn separate_bursts_rebuild_separately() {
        let temp = project(&[("src/index.js", "export const a = 1;\n")]);
        let (controller, state) = controller(temp.path(), Duration::from_millis(50));
        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(controller.run(rx));

        let path = temp.path().join("src/index.js");
        for _ in 0..3 {
            tx.send(WatchEvent::Modified(path.clone())).await.unwrap();
        }
        while state.read().await.builds < 2 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        for _ in 0..3 {
            tx.send(WatchEvent::Created(path.clone())).await.unwrap();
        }
        drop(tx);

        handle.await.unwrap();
        assert_eq!(state.read().await.builds, 3);
    }
}
