//! Hot-update coordinator.
//!
//! On a file change the coordinator decides the smallest update the runtime
//! can apply. The decision itself ([`diff_for_hot_update`]) is a pure
//! function of the previous and the fresh descriptor; [`Pipeline::handle_hot_update`]
//! wires it to the cache and the dependency index.
//!
//! Anything unexpected (a file that was never loaded, a source that no longer
//! parses, an unreadable file) degrades to a full reload instead of failing
//! the dev session.

use serde::{Deserialize, Serialize};
use vize_carton::{normalize_path, FxHashMap};

use crate::compiler::SfcCompiler;
use crate::pipeline::{resolve_reference, style_imports, Pipeline};
use crate::query::{is_vue_file, VirtualRequest};
use crate::types::{SfcBlock, SfcCustomBlock, SfcDescriptor, SfcStyleBlock};

const TARGET: &str = "vize_chevalet::hmr";

/// Update the runtime has to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HotUpdateKind {
    /// Discard component instances and remount
    FullReload,
    /// Swap the render function, keep instance state
    Rerender,
    /// Only style sub-modules changed
    StyleUpdate,
    /// A type-only dependency changed; re-run inference and diagnostics
    TypeRecheck,
    /// Nothing observable changed
    NoOp,
}

impl HotUpdateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FullReload => "full-reload",
            Self::Rerender => "rerender",
            Self::StyleUpdate => "style-update",
            Self::TypeRecheck => "type-recheck",
            Self::NoOp => "no-op",
        }
    }
}

impl std::fmt::Display for HotUpdateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Style sub-module ids that differ between two descriptors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleDiff {
    /// Ids present only in the fresh descriptor
    pub added: Vec<String>,
    /// Ids present in both whose block content changed
    pub changed: Vec<String>,
    /// Ids present only in the previous descriptor
    pub removed: Vec<String>,
}

impl StyleDiff {
    /// Whether the style lists are equivalent.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    /// Ids the host has to (re)load: added then changed.
    pub fn updated(&self) -> impl Iterator<Item = &str> {
        self.added
            .iter()
            .chain(self.changed.iter())
            .map(String::as_str)
    }
}

/// Decision for one component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotUpdate {
    /// Component file
    pub filename: String,
    pub kind: HotUpdateKind,
    #[serde(default)]
    pub styles: StyleDiff,
}

impl HotUpdate {
    fn new(filename: impl Into<String>, kind: HotUpdateKind) -> Self {
        Self {
            filename: filename.into(),
            kind,
            styles: StyleDiff::default(),
        }
    }

    /// Module ids the host should invalidate.
    pub fn modules(&self) -> Vec<String> {
        match self.kind {
            HotUpdateKind::FullReload | HotUpdateKind::Rerender => {
                let mut modules = vec![self.filename.clone()];
                modules.extend(self.styles.updated().map(str::to_string));
                modules
            }
            HotUpdateKind::StyleUpdate => self.styles.updated().map(str::to_string).collect(),
            HotUpdateKind::TypeRecheck | HotUpdateKind::NoOp => Vec::new(),
        }
    }
}

/// Classify the change from `previous` to `fresh`.
///
/// Checked in order: script, CSS module bindings, template (including the
/// component switching between scoped and unscoped styles), custom blocks,
/// styles.
pub fn diff_for_hot_update(previous: &SfcDescriptor, fresh: &SfcDescriptor) -> HotUpdateKind {
    if !same_block(previous.script.as_ref(), fresh.script.as_ref()) {
        return HotUpdateKind::FullReload;
    }
    if css_modules(previous) != css_modules(fresh) {
        return HotUpdateKind::FullReload;
    }
    if !same_block(previous.template.as_ref(), fresh.template.as_ref())
        || previous.has_scoped_style() != fresh.has_scoped_style()
    {
        return HotUpdateKind::Rerender;
    }
    if !same_list(&previous.custom_blocks, &fresh.custom_blocks, same_custom_block) {
        return HotUpdateKind::FullReload;
    }
    if !same_list(&previous.styles, &fresh.styles, same_style) {
        return HotUpdateKind::StyleUpdate;
    }
    HotUpdateKind::NoOp
}

/// Minimal style diff keyed by encoded sub-module id.
pub fn diff_styles(previous: &SfcDescriptor, fresh: &SfcDescriptor) -> StyleDiff {
    let previous_ids: FxHashMap<String, &SfcStyleBlock> = style_imports(previous)
        .into_iter()
        .zip(previous.styles.iter())
        .collect();
    let fresh_ids = style_imports(fresh);

    let mut diff = StyleDiff::default();
    for (id, block) in fresh_ids.iter().zip(fresh.styles.iter()) {
        match previous_ids.get(id) {
            None => diff.added.push(id.clone()),
            Some(old) if !same_style(old, block) => diff.changed.push(id.clone()),
            Some(_) => {}
        }
    }
    diff.removed = style_imports(previous)
        .into_iter()
        .filter(|id| !fresh_ids.contains(id))
        .collect();
    diff
}

fn same_block(a: Option<&SfcBlock>, b: Option<&SfcBlock>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            a.content == b.content && a.lang == b.lang && a.src == b.src && a.attrs == b.attrs
        }
        _ => false,
    }
}

fn same_style(a: &SfcStyleBlock, b: &SfcStyleBlock) -> bool {
    a.content == b.content
        && a.lang == b.lang
        && a.src == b.src
        && a.scoped == b.scoped
        && a.module == b.module
}

fn same_custom_block(a: &SfcCustomBlock, b: &SfcCustomBlock) -> bool {
    a.block_type == b.block_type && a.content == b.content && a.lang == b.lang && a.src == b.src
}

fn same_list<T>(a: &[T], b: &[T], same: fn(&T, &T) -> bool) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(a, b)| same(a, b))
}

fn css_modules(descriptor: &SfcDescriptor) -> Vec<Option<&str>> {
    descriptor
        .styles
        .iter()
        .filter(|s| s.module.is_some())
        .map(|s| s.module.as_deref())
        .collect()
}

impl<C: SfcCompiler> Pipeline<C> {
    /// React to a change of `path` on disk.
    ///
    /// Returns one decision per affected component; an empty list means the
    /// file is none of ours. Never fails: errors degrade to
    /// [`HotUpdateKind::FullReload`].
    pub fn handle_hot_update(&self, path: &str) -> Vec<HotUpdate> {
        let path = normalize_path(path);
        let mut updates: Vec<HotUpdate> = self
            .deps
            .type_dependents(&path)
            .into_iter()
            .map(|component| HotUpdate::new(component, HotUpdateKind::TypeRecheck))
            .collect();

        let referencing = self.deps.src_dependents(&path);
        if !referencing.is_empty() {
            self.cache.invalidate_external(&path);
            for component in referencing {
                updates.push(self.referenced_file_changed(&component, &path));
            }
        }

        if let Some(update) = self.component_changed(&path) {
            updates.push(update);
        }

        for update in &updates {
            tracing::debug!(target: TARGET, "{}: {}", update.filename, update.kind);
            match update.kind {
                HotUpdateKind::Rerender => {
                    self.rerender_only.insert(update.filename.clone());
                }
                HotUpdateKind::TypeRecheck => {}
                _ => {
                    self.rerender_only.remove(&update.filename);
                }
            }
        }
        updates
    }

    /// Forget a deleted file.
    ///
    /// Components reading the file through a `src` attribute are reported for
    /// a full reload, type-level dependents for a re-check.
    pub fn handle_file_removed(&self, path: &str) -> Vec<HotUpdate> {
        let path = normalize_path(path);
        tracing::debug!(target: TARGET, "removed {}", path);

        self.cache.invalidate(&path);
        self.cache.invalidate_external(&path);
        self.deps.forget(&path);
        self.rerender_only.remove(&path);

        let mut updates: Vec<HotUpdate> = self
            .deps
            .type_dependents(&path)
            .into_iter()
            .map(|component| HotUpdate::new(component, HotUpdateKind::TypeRecheck))
            .collect();
        updates.extend(
            self.deps
                .src_dependents(&path)
                .into_iter()
                .map(|component| HotUpdate::new(component, HotUpdateKind::FullReload)),
        );
        updates
    }

    /// A file read through a `src` attribute of `component` changed.
    fn referenced_file_changed(&self, component: &str, path: &str) -> HotUpdate {
        let Some(descriptor) = self.cache.get(component) else {
            return HotUpdate::new(component, HotUpdateKind::FullReload);
        };
        let refers_to = |src: Option<&String>| {
            src.is_some_and(|src| resolve_reference(&descriptor.filename, src) == path)
        };

        let only_styles = !refers_to(descriptor.script.as_ref().and_then(|b| b.src.as_ref()))
            && !refers_to(descriptor.template.as_ref().and_then(|b| b.src.as_ref()))
            && !descriptor
                .custom_blocks
                .iter()
                .any(|b| refers_to(b.src.as_ref()));
        if !only_styles {
            return HotUpdate::new(component, HotUpdateKind::FullReload);
        }

        let mut update = HotUpdate::new(component, HotUpdateKind::StyleUpdate);
        update.styles.changed = descriptor
            .styles
            .iter()
            .enumerate()
            .filter(|(_, block)| refers_to(block.src.as_ref()))
            .map(|(index, block)| {
                VirtualRequest::for_style_block(&descriptor.filename, index, block).encode()
            })
            .collect();
        update
    }

    /// Re-parse a component and diff it against the cached descriptor.
    fn component_changed(&self, path: &str) -> Option<HotUpdate> {
        let options = self.options.snapshot();
        let cached = self.cache.get(path).is_some();
        if !cached {
            // Never loaded: nothing to diff against.
            return (is_vue_file(path) && options.filter.matches(path))
                .then(|| HotUpdate::new(path, HotUpdateKind::FullReload));
        }

        let source = match self.fs.read_to_string(std::path::Path::new(path)) {
            Ok(source) => source,
            Err(error) => {
                tracing::warn!(target: TARGET, "failed to read {}: {}", path, error);
                self.cache.invalidate(path);
                return Some(HotUpdate::new(path, HotUpdateKind::FullReload));
            }
        };

        let refreshed = self.cache.refresh(
            &self.compiler,
            path,
            &source,
            &options.parse_options(),
            |previous, fresh| match previous {
                Some(previous) => (
                    diff_for_hot_update(previous, fresh),
                    diff_styles(previous, fresh),
                ),
                None => (HotUpdateKind::FullReload, StyleDiff::default()),
            },
        );

        match refreshed {
            Ok(((kind, styles), fresh)) => {
                // Style-only updates never re-run the main transform.
                self.deps.record_src_refs(
                    path,
                    fresh
                        .src_references()
                        .map(|src| resolve_reference(&fresh.filename, src)),
                );
                Some(HotUpdate {
                    filename: path.to_string(),
                    kind,
                    styles,
                })
            }
            Err(error) => {
                tracing::warn!(target: TARGET, "{}", error);
                self.cache.invalidate(path);
                Some(HotUpdate::new(path, HotUpdateKind::FullReload))
            }
        }
    }
}
