//! Reverse dependency index.
//!
//! Tracks two kinds of edges from a component to other files:
//!
//! - **type dependencies**: files imported only for compile-time prop/emit
//!   inference. They never become modules, so the bundler cannot see them;
//!   a change to one has to be mapped back to the components that read it.
//! - **src references**: files whose content is a block of the component
//!   (`<style src="./theme.css">`).

use parking_lot::RwLock;
use vize_carton::{normalize_path, FxHashMap, FxHashSet};

#[derive(Debug, Default)]
struct EdgeMap {
    forward: FxHashMap<String, FxHashSet<String>>,
    reverse: FxHashMap<String, FxHashSet<String>>,
}

impl EdgeMap {
    fn set(&mut self, from: &str, targets: FxHashSet<String>) {
        self.remove(from);
        for target in &targets {
            self.reverse
                .entry(target.clone())
                .or_default()
                .insert(from.to_string());
        }
        if !targets.is_empty() {
            self.forward.insert(from.to_string(), targets);
        }
    }

    fn remove(&mut self, from: &str) {
        let Some(targets) = self.forward.remove(from) else {
            return;
        };
        for target in targets {
            if let Some(sources) = self.reverse.get_mut(&target) {
                sources.remove(from);
                if sources.is_empty() {
                    self.reverse.remove(&target);
                }
            }
        }
    }

    fn dependents(&self, target: &str) -> Vec<String> {
        let mut dependents: Vec<String> = self
            .reverse
            .get(target)
            .map(|sources| sources.iter().cloned().collect())
            .unwrap_or_default();
        dependents.sort();
        dependents
    }

    fn clear(&mut self) {
        self.forward.clear();
        self.reverse.clear();
    }
}

#[derive(Debug, Default)]
struct IndexState {
    types: EdgeMap,
    sources: EdgeMap,
}

/// Process-wide (per session) reverse index from files to the components using them.
#[derive(Debug, Default)]
pub struct DependencyIndex {
    state: RwLock<IndexState>,
}

impl DependencyIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the type dependencies of `component`.
    pub fn record_type_deps<I, S>(&self, component: &str, deps: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let targets = normalize_all(deps);
        self.state
            .write()
            .types
            .set(&normalize_path(component), targets);
    }

    /// Replace the `src` references of `component` (already resolved paths).
    pub fn record_src_refs<I, S>(&self, component: &str, refs: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let targets = normalize_all(refs);
        self.state
            .write()
            .sources
            .set(&normalize_path(component), targets);
    }

    /// Components whose type inference reads `path`, sorted.
    pub fn type_dependents(&self, path: &str) -> Vec<String> {
        self.state.read().types.dependents(&normalize_path(path))
    }

    /// Components with a block loaded from `path`, sorted.
    pub fn src_dependents(&self, path: &str) -> Vec<String> {
        self.state.read().sources.dependents(&normalize_path(path))
    }

    /// Drop every edge leaving `component`.
    pub fn forget(&self, component: &str) {
        let component = normalize_path(component);
        let mut state = self.state.write();
        state.types.remove(&component);
        state.sources.remove(&component);
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.types.clear();
        state.sources.clear();
    }
}

fn normalize_all<I, S>(paths: I) -> FxHashSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    paths
        .into_iter()
        .map(|p| normalize_path(p.as_ref()))
        .collect()
}
