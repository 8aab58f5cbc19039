//! The resolved module graph.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use kiln_transform::ContentKind;

use crate::output::OutputArtifact;

/// Index of a module within its graph.
pub type ModuleId = usize;

/// One physical asset after transformation and linking.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    /// Canonical path on disk
    pub path: PathBuf,

    /// Stable identifier used by the runtime registry (`./src/app.js`)
    pub key: String,

    /// Kind of the source file
    pub kind: ContentKind,

    /// Linked factory body
    pub code: String,

    /// Stylesheet extracted from this module
    pub css: Option<String>,

    /// Whether the module accepts its own hot updates
    pub hot_accept: bool,

    /// File copied to the output for non-script assets (images)
    pub asset: Option<OutputArtifact>,

    /// Direct dependencies, in request order
    pub dependencies: Vec<ModuleId>,
}

/// Modules reachable from the configured entries, each held exactly once.
#[derive(Debug, Clone, Default)]
pub struct ModuleGraph {
    modules: Vec<Module>,
    by_path: HashMap<PathBuf, ModuleId>,
    entries: Vec<(String, ModuleId)>,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module, returning the existing id if its path is already present.
    pub fn insert(&mut self, module: Module) -> ModuleId {
        if let Some(&id) = self.by_path.get(&module.path) {
            return id;
        }
        let id = self.modules.len();
        self.by_path.insert(module.path.clone(), id);
        self.modules.push(module);
        id
    }

    /// Record a named entry rooted at `id`.
    pub fn add_entry(&mut self, name: impl Into<String>, id: ModuleId) {
        self.entries.push((name.into(), id));
    }

    pub fn set_dependencies(&mut self, id: ModuleId, dependencies: Vec<ModuleId>) {
        if let Some(module) = self.modules.get_mut(id) {
            module.dependencies = dependencies;
        }
    }

    pub fn get(&self, id: ModuleId) -> Option<&Module> {
        self.modules.get(id)
    }

    pub fn id_of(&self, path: &Path) -> Option<ModuleId> {
        self.by_path.get(path).copied()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.by_path.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Modules in insertion order.
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    /// `(name, root)` pairs in declaration order.
    pub fn entries(&self) -> &[(String, ModuleId)] {
        &self.entries
    }

    /// Modules reachable from `root` in execution order: every module after
    /// the dependencies it requested before any cycle back-edge.
    ///
    /// Each module appears once even when the graph has cycles.
    pub fn execution_order(&self, root: ModuleId) -> Vec<ModuleId> {
        let mut order = Vec::new();
        if root >= self.modules.len() {
            return order;
        }

        let mut visited = HashSet::new();
        let mut stack: Vec<(ModuleId, usize)> = vec![(root, 0)];
        visited.insert(root);

        while let Some(&(id, next)) = stack.last() {
            let deps = &self.modules[id].dependencies;
            if next < deps.len() {
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                let dep = deps[next];
                if visited.insert(dep) {
                    stack.push((dep, 0));
                }
            } else {
                order.push(id);
                stack.pop();
            }
        }

        order
    }

    /// Number of entries reaching each module.
    pub fn entry_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.modules.len()];
        for (_, root) in &self.entries {
            for id in self.execution_order(*root) {
                counts[id] += 1;
            }
        }
        counts
    }

    /// Modules that (transitively) depend on `id`, including `id` itself.
    pub fn dependents_of(&self, id: ModuleId) -> Vec<ModuleId> {
        let mut reverse: HashMap<ModuleId, Vec<ModuleId>> = HashMap::new();
        for (from, module) in self.modules.iter().enumerate() {
            for &to in &module.dependencies {
                reverse.entry(to).or_default().push(from);
            }
        }

        let mut seen = HashSet::new();
        let mut queue = vec![id];
        let mut out = Vec::new();
        while let Some(current) = queue.pop() {
            if !seen.insert(current) {
                continue;
            }
            out.push(current);
            if let Some(parents) = reverse.get(&current) {
                queue.extend(parents.iter().copied());
            }
        }
        out.sort_unstable();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn module(name: &str) -> Module {
        Module {
            path: PathBuf::from(format!("/p/{name}")),
            key: format!("./{name}"),
            kind: ContentKind::Script,
            code: String::new(),
            css: None,
            hot_accept: false,
            asset: None,
            dependencies: Vec::new(),
        }
    }

    fn graph(edges: &[(&str, &[&str])]) -> ModuleGraph {
        let mut graph = ModuleGraph::new();
        for (name, _) in edges {
            graph.insert(module(name));
        }
        for (name, deps) in edges {
            let id = graph.id_of(Path::new(&format!("/p/{name}"))).unwrap();
            let deps = deps
                .iter()
                .map(|d| graph.id_of(Path::new(&format!("/p/{d}"))).unwrap())
                .collect();
            graph.set_dependencies(id, deps);
        }
        graph
    }

    #[test]
    fn insert_deduplicates_by_path() {
        let mut graph = ModuleGraph::new();
        let a = graph.insert(module("a.js"));
        let again = graph.insert(module("a.js"));
        assert_eq!(a, again);
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn orders_dependencies_first() {
        let graph = graph(&[
            ("main.js", &["a.js", "b.js"]),
            ("a.js", &["c.js"]),
            ("b.js", &["c.js"]),
            ("c.js", &[]),
        ]);

        let order: Vec<&str> = graph
            .execution_order(0)
            .into_iter()
            .map(|id| graph.get(id).unwrap().key.as_str())
            .collect();

        assert_eq!(order, vec!["./c.js", "./a.js", "./b.js", "./main.js"]);
    }

    #[test]
    fn terminates_on_cycles() {
        let graph = graph(&[("a.js", &["b.js"]), ("b.js", &["a.js"])]);

        assert_eq!(graph.execution_order(0), vec![1, 0]);
        assert_eq!(graph.execution_order(1), vec![0, 1]);
    }

    #[test]
    fn counts_entries_per_module() {
        let mut graph = graph(&[
            ("one.js", &["shared.js"]),
            ("two.js", &["shared.js"]),
            ("shared.js", &[]),
        ]);
        graph.add_entry("one", 0);
        graph.add_entry("two", 1);

        assert_eq!(graph.entry_counts(), vec![1, 1, 2]);
    }

    #[test]
    fn finds_dependents() {
        let graph = graph(&[
            ("main.js", &["a.js"]),
            ("a.js", &["c.js"]),
            ("c.js", &[]),
            ("other.js", &[]),
        ]);

        assert_eq!(graph.dependents_of(2), vec![0, 1, 2]);
    }
}
