//! Async hook surface.
//!
//! Parsing and compiling block the calling thread, so each hook runs the
//! synchronous plugin on tokio's blocking pool and hands the result back to
//! the async host.

use std::sync::Arc;

use crate::compiler::SfcCompiler;
use crate::error::{ChevaletError, Result};
use crate::hmr::HotUpdate;
use crate::pipeline::ModuleOutput;

use super::{ChevaletPlugin, HotUpdateResponse};

/// Async wrapper around a shared [`ChevaletPlugin`].
#[derive(Debug)]
pub struct AsyncPlugin<C> {
    inner: Arc<ChevaletPlugin<C>>,
}

impl<C> Clone for AsyncPlugin<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: SfcCompiler + 'static> AsyncPlugin<C> {
    pub fn new(plugin: ChevaletPlugin<C>) -> Self {
        Self {
            inner: Arc::new(plugin),
        }
    }

    pub fn from_shared(plugin: Arc<ChevaletPlugin<C>>) -> Self {
        Self { inner: plugin }
    }

    /// The wrapped synchronous plugin.
    pub fn plugin(&self) -> &ChevaletPlugin<C> {
        &self.inner
    }

    pub async fn build_start(&self) -> Result<()> {
        self.run(|plugin| {
            plugin.build_start();
            Ok(())
        })
        .await
    }

    /// Id classification is pure string work and runs inline.
    pub async fn resolve_id(&self, id: &str) -> Option<String> {
        self.inner.resolve_id(id)
    }

    pub async fn load(&self, id: impl Into<String>) -> Result<Option<ModuleOutput>> {
        let id = id.into();
        self.run(move |plugin| plugin.load(&id)).await
    }

    pub async fn transform(
        &self,
        code: impl Into<String>,
        id: impl Into<String>,
    ) -> Result<Option<ModuleOutput>> {
        let (code, id) = (code.into(), id.into());
        self.run(move |plugin| plugin.transform(&code, &id)).await
    }

    pub async fn handle_hot_update(
        &self,
        file: impl Into<String>,
    ) -> Result<Option<HotUpdateResponse>> {
        let file = file.into();
        self.run(move |plugin| Ok(plugin.handle_hot_update(&file)))
            .await
    }

    pub async fn handle_file_removed(&self, file: impl Into<String>) -> Result<Vec<HotUpdate>> {
        let file = file.into();
        self.run(move |plugin| Ok(plugin.handle_file_removed(&file)))
            .await
    }

    async fn run<T, F>(&self, hook: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&ChevaletPlugin<C>) -> Result<T> + Send + 'static,
    {
        let plugin = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || hook(&plugin))
            .await
            .map_err(|error| ChevaletError::Join(error.to_string()))?
    }
}
