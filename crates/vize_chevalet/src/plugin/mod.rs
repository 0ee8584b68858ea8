//! Host adapters.
//!
//! [`ChevaletPlugin`] maps the hook surface shared by bundler plugin hosts
//! (`resolveId` / `load` / `transform` with their include filters, plus the
//! dev-server `handleHotUpdate`) onto one [`Pipeline`]. Host differences are
//! expressed as [`HostCapabilities`] instead of separate code paths.
//!
//! [`AsyncPlugin`] exposes the same hooks to async hosts.

mod async_hooks;

pub use async_hooks::AsyncPlugin;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use vize_carton::{normalize_path, FxHashSet};

use crate::compiler::SfcCompiler;
use crate::error::Result;
use crate::fs::FileSystem;
use crate::hmr::HotUpdate;
use crate::options::{resolve_options, Options, ResolvedOptions};
use crate::pipeline::{ModuleOutput, Pipeline};
use crate::query::{decode, is_vue_file};

/// Plugin name reported to hosts.
pub const PLUGIN_NAME: &str = "vize:chevalet";

/// Custom event sent to the client when a component file changes.
pub const FILE_CHANGED_EVENT: &str = "file-changed";

/// Bundler hosting the plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostKind {
    Vite,
    Rollup,
    Rolldown,
    Webpack,
    Esbuild,
    Farm,
}

/// Optional hooks a host understands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostCapabilities {
    /// Single-call "file changed, return affected modules" hook
    pub hot_update: bool,
    /// Module type registration for the `.vue` extension
    pub module_types: bool,
    /// Compile-time constant definitions
    pub define: bool,
}

impl HostKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vite => "vite",
            Self::Rollup => "rollup",
            Self::Rolldown => "rolldown",
            Self::Webpack => "webpack",
            Self::Esbuild => "esbuild",
            Self::Farm => "farm",
        }
    }

    pub fn capabilities(self) -> HostCapabilities {
        match self {
            Self::Vite => HostCapabilities {
                hot_update: true,
                module_types: false,
                define: true,
            },
            Self::Rolldown => HostCapabilities {
                module_types: true,
                ..Default::default()
            },
            Self::Rollup | Self::Webpack | Self::Esbuild | Self::Farm => {
                HostCapabilities::default()
            }
        }
    }
}

/// Payload of the `file-changed` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChanged {
    pub file: String,
}

/// Custom event to send over the dev-server socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomEvent {
    pub event: String,
    pub data: FileChanged,
}

/// Answer to a dev-server hot-update call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotUpdateResponse {
    /// Event to broadcast before the update, for component files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<CustomEvent>,

    /// Decision per affected component
    pub updates: Vec<HotUpdate>,

    /// Module ids the host should invalidate, deduplicated
    pub modules: Vec<String>,
}

/// Settings a host resolves from its own configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostConfig {
    pub root: Option<String>,
    pub is_production: Option<bool>,
    pub source_map: Option<bool>,
}

/// The plugin for one host and one build session.
#[derive(Debug)]
pub struct ChevaletPlugin<C> {
    host: HostKind,
    pipeline: Pipeline<C>,
}

impl<C: SfcCompiler> ChevaletPlugin<C> {
    pub fn new(host: HostKind, compiler: C, options: ResolvedOptions) -> Self {
        Self {
            host,
            pipeline: Pipeline::new(compiler, options),
        }
    }

    /// Plugin reading files through `fs`.
    pub fn with_fs(
        host: HostKind,
        compiler: C,
        options: ResolvedOptions,
        fs: Arc<dyn FileSystem>,
    ) -> Self {
        Self {
            host,
            pipeline: Pipeline::with_fs(compiler, options, fs),
        }
    }

    /// Resolve user options and create the plugin.
    pub fn from_options(host: HostKind, compiler: C, options: Options) -> Result<Self> {
        Ok(Self::new(host, compiler, resolve_options(options)?))
    }

    pub fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    pub fn host(&self) -> HostKind {
        self.host
    }

    pub fn capabilities(&self) -> HostCapabilities {
        self.host.capabilities()
    }

    pub fn pipeline(&self) -> &Pipeline<C> {
        &self.pipeline
    }

    /// Apply settings the host resolved (root, mode, source maps).
    pub fn config_resolved(&self, config: HostConfig) {
        self.pipeline.update_options(|options| {
            if let Some(root) = config.root {
                options.root = normalize_path(&root);
            }
            if let Some(is_production) = config.is_production {
                options.is_production = is_production;
                options.devtools_enabled = options.prod_devtools || !is_production;
            }
            if let Some(source_map) = config.source_map {
                options.source_map = source_map;
            }
        });
    }

    /// Compile-time constants, for hosts that accept definitions.
    pub fn define(&self) -> Vec<(&'static str, bool)> {
        if !self.capabilities().define {
            return Vec::new();
        }
        self.pipeline.options().define_constants().to_vec()
    }

    /// Module type registrations, for hosts that need them.
    pub fn module_types(&self) -> Vec<(&'static str, &'static str)> {
        if self.capabilities().module_types {
            vec![("vue", "js")]
        } else {
            Vec::new()
        }
    }

    pub fn build_start(&self) {
        self.pipeline.build_start();
    }

    /// Claim component files and sub-module ids.
    pub fn resolve_id(&self, id: &str) -> Option<String> {
        (is_vue_file(id) || decode(id).is_some()).then(|| id.to_string())
    }

    pub fn load_include(&self, id: &str) -> bool {
        self.pipeline.handles(id)
    }

    pub fn transform_include(&self, id: &str) -> bool {
        self.pipeline.handles(id)
    }

    pub fn load(&self, id: &str) -> Result<Option<ModuleOutput>> {
        if !self.load_include(id) {
            return Ok(None);
        }
        self.pipeline.load(id)
    }

    pub fn transform(&self, code: &str, id: &str) -> Result<Option<ModuleOutput>> {
        if !self.transform_include(id) {
            return Ok(None);
        }
        self.pipeline.transform(code, id)
    }

    /// Dev-server hot update. `None` when the host has no such hook or the
    /// file concerns no component.
    pub fn handle_hot_update(&self, file: &str) -> Option<HotUpdateResponse> {
        if !self.capabilities().hot_update {
            return None;
        }
        let file = normalize_path(file);
        let event = is_vue_file(&file).then(|| CustomEvent {
            event: FILE_CHANGED_EVENT.to_string(),
            data: FileChanged { file: file.clone() },
        });

        let updates = self.pipeline.handle_hot_update(&file);
        if event.is_none() && updates.is_empty() {
            return None;
        }

        let mut seen = FxHashSet::default();
        let modules = updates
            .iter()
            .flat_map(HotUpdate::modules)
            .filter(|id| seen.insert(id.clone()))
            .collect();
        Some(HotUpdateResponse {
            event,
            updates,
            modules,
        })
    }

    pub fn handle_file_removed(&self, file: &str) -> Vec<HotUpdate> {
        self.pipeline.handle_file_removed(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFileSystem;
    use crate::hmr::HotUpdateKind;
    use crate::test_utils::FixtureCompiler;

    const APP: &str = "<script>let x=1</script>\n<template><div>{{x}}</div></template>\n";

    fn plugin(host: HostKind) -> (ChevaletPlugin<FixtureCompiler>, Arc<MemoryFileSystem>) {
        let options = resolve_options(Options {
            is_production: Some(false),
            root: Some("/project".into()),
            ..Default::default()
        })
        .unwrap();
        let fs = Arc::new(MemoryFileSystem::new());
        (
            ChevaletPlugin::with_fs(host, FixtureCompiler::new(), options, fs.clone()),
            fs,
        )
    }

    #[test]
    fn test_capabilities() {
        assert!(HostKind::Vite.capabilities().hot_update);
        assert!(!HostKind::Rollup.capabilities().hot_update);
        assert!(HostKind::Rolldown.capabilities().module_types);

        let (vite, _) = plugin(HostKind::Vite);
        assert!(vite.module_types().is_empty());
        assert_eq!(vite.define().len(), 3);

        let (rolldown, _) = plugin(HostKind::Rolldown);
        assert_eq!(rolldown.module_types(), vec![("vue", "js")]);
        assert!(rolldown.define().is_empty());
        assert_eq!(rolldown.name(), "vize:chevalet");
    }

    #[test]
    fn test_resolve_id_and_include() {
        let (plugin, _) = plugin(HostKind::Rollup);
        assert_eq!(
            plugin.resolve_id("/project/src/App.vue").as_deref(),
            Some("/project/src/App.vue")
        );
        assert_eq!(plugin.resolve_id("/project/src/main.ts"), None);
        assert!(plugin.load_include("/project/src/App.vue?vue&type=script"));
        assert!(!plugin.transform_include("/project/src/main.ts"));
    }

    #[test]
    fn test_hot_update_sends_file_changed() {
        let (plugin, fs) = plugin(HostKind::Vite);
        plugin.transform(APP, "/project/src/App.vue").unwrap();
        fs.write("/project/src/App.vue", APP.replace("<div>", "<p>").replace("</div>", "</p>"));

        let response = plugin.handle_hot_update("/project/src/./App.vue").unwrap();
        assert_eq!(
            response.event,
            Some(CustomEvent {
                event: "file-changed".into(),
                data: FileChanged {
                    file: "/project/src/App.vue".into()
                }
            })
        );
        assert_eq!(response.updates[0].kind, HotUpdateKind::Rerender);
        assert_eq!(response.modules, vec!["/project/src/App.vue".to_string()]);
    }

    #[test]
    fn test_hot_update_without_capability() {
        let (plugin, _) = plugin(HostKind::Webpack);
        plugin.transform(APP, "/project/src/App.vue").unwrap();
        assert_eq!(plugin.handle_hot_update("/project/src/App.vue"), None);
    }

    #[test]
    fn test_config_resolved() {
        let (plugin, _) = plugin(HostKind::Vite);
        plugin.config_resolved(HostConfig {
            root: Some("/other".into()),
            is_production: Some(true),
            source_map: Some(false),
        });
        let options = plugin.pipeline().options();
        assert_eq!(options.root, "/other");
        assert!(options.is_production);
        assert!(!options.devtools_enabled);
        assert!(!options.source_map);
        assert_eq!(
            options.component_id_strategy(),
            crate::options::ComponentIdStrategy::FilepathSource
        );
        assert_ne!(
            options.component_id("/other/src/App.vue", "<template>a</template>"),
            options.component_id("/other/src/App.vue", "<template>b</template>")
        );
    }
}
