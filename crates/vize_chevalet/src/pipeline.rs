//! Transform pipeline.
//!
//! One [`Pipeline`] per build session. It owns the descriptor cache, the
//! dependency index and the options cell, so two sessions in one process
//! never share state.
//!
//! A request flows through three steps:
//!
//! 1. [`classify`](crate::query::classify) the id into a main or a sub request
//! 2. main requests parse the component and assemble the main module
//!    ([`Pipeline::transform_main`])
//! 3. sub requests select one block of the cached descriptor and compile it
//!    alone ([`Pipeline::load_block`])

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use vize_carton::normalize_path;

use crate::cache::DescriptorCache;
use crate::compiler::{CompileOptions, SfcCompiler};
use crate::deps::DependencyIndex;
use crate::error::{ChevaletError, Result};
use crate::fs::{FileSystem, OsFileSystem};
use crate::options::{OptionsCell, ResolvedOptions};
use crate::query::{classify, BlockKind, Request, VirtualRequest};
use crate::types::{CompiledBlock, SfcBlock, SfcDescriptor, SfcError};

const TARGET: &str = "vize_chevalet::compile";

/// Identifier the assembled main module binds the component to.
const COMPONENT_BINDING: &str = "_sfc_main";

/// Code emitted by a load or transform hook.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleOutput {
    /// Module code
    pub code: String,

    /// Source map
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<serde_json::Value>,

    /// Sub-module ids imported by `code`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<String>,
}

impl From<CompiledBlock> for ModuleOutput {
    fn from(block: CompiledBlock) -> Self {
        Self {
            code: block.code,
            map: block.map,
            imports: Vec::new(),
        }
    }
}

/// Per-session transform pipeline over an external compiler.
pub struct Pipeline<C> {
    pub(crate) compiler: C,
    pub(crate) fs: Arc<dyn FileSystem>,
    pub(crate) options: OptionsCell,
    pub(crate) cache: DescriptorCache,
    pub(crate) deps: DependencyIndex,
    /// Components whose next main module is a re-render only update
    pub(crate) rerender_only: DashSet<String>,
}

impl<C: SfcCompiler> Pipeline<C> {
    /// Create a pipeline reading from the operating system file system.
    pub fn new(compiler: C, options: ResolvedOptions) -> Self {
        Self::with_fs(compiler, options, Arc::new(OsFileSystem))
    }

    /// Create a pipeline reading through `fs`.
    pub fn with_fs(compiler: C, options: ResolvedOptions, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            compiler,
            fs,
            options: OptionsCell::new(options),
            cache: DescriptorCache::new(),
            deps: DependencyIndex::new(),
            rerender_only: DashSet::new(),
        }
    }

    /// Current options snapshot.
    pub fn options(&self) -> Arc<ResolvedOptions> {
        self.options.snapshot()
    }

    /// Replace the options. Requests already running keep their snapshot.
    pub fn set_options(&self, options: ResolvedOptions) {
        self.options.set(options);
    }

    /// Derive new options from the current ones.
    pub fn update_options(&self, f: impl FnOnce(&mut ResolvedOptions)) {
        self.options.update(f);
    }

    pub fn cache(&self) -> &DescriptorCache {
        &self.cache
    }

    pub fn deps(&self) -> &DependencyIndex {
        &self.deps
    }

    pub fn compiler(&self) -> &C {
        &self.compiler
    }

    pub fn file_system(&self) -> &dyn FileSystem {
        self.fs.as_ref()
    }

    /// Start a build session: nothing cached by a previous session survives.
    pub fn build_start(&self) {
        self.cache.clear();
        self.deps.clear();
        self.rerender_only.clear();
        tracing::debug!(target: TARGET, "build start: state cleared");
    }

    /// Whether the load/transform hooks handle `id`.
    pub fn handles(&self, id: &str) -> bool {
        crate::query::decode(id).is_some() || self.options.snapshot().filter.matches(id)
    }

    /// Load hook. Main requests are left to the host (`None`), sub requests
    /// produce the block module.
    pub fn load(&self, id: &str) -> Result<Option<ModuleOutput>> {
        match classify(id)? {
            Request::Main { .. } => Ok(None),
            Request::Sub(request) => self.load_block(&request).map(Some),
        }
    }

    /// Transform hook.
    ///
    /// Style sub-modules pass through untouched (some hosts run transform
    /// again on content already emitted by [`load`](Self::load)); other sub
    /// requests are declined; included real files become main modules.
    pub fn transform(&self, code: &str, id: &str) -> Result<Option<ModuleOutput>> {
        match classify(id)? {
            Request::Sub(request) if request.kind == BlockKind::Style => Ok(Some(ModuleOutput {
                code: code.to_string(),
                ..Default::default()
            })),
            Request::Sub(_) => Ok(None),
            Request::Main { filename } => {
                if !self.options.snapshot().filter.matches(id) {
                    return Ok(None);
                }
                self.transform_main(&filename, code).map(Some)
            }
        }
    }

    /// Parse (or reuse) the descriptor of `filename` and assemble its main module.
    pub fn transform_main(&self, filename: &str, source: &str) -> Result<ModuleOutput> {
        let options = self.options.snapshot();
        let descriptor = self.cache.get_or_parse(
            &self.compiler,
            filename,
            source,
            &options.parse_options(),
        )?;
        let filename = descriptor.filename.as_str();
        let compile_options = options.compile_options(filename, source);

        tracing::debug!(target: TARGET, "transform main {} ({})", filename, compile_options.id);
        let compiled = self
            .compiler
            .compile_main(&descriptor, &compile_options)
            .map_err(|error| compile_error(filename, BlockKind::Main, error))?;

        self.deps.record_type_deps(filename, &compiled.dependencies);
        self.deps.record_src_refs(
            filename,
            descriptor
                .src_references()
                .map(|src| resolve_reference(filename, src)),
        );

        let mut code = bind_default_export(&compiled.code).ok_or_else(|| {
            ChevaletError::MissingDefaultExport {
                filename: filename.to_string(),
            }
        })?;

        for (index, block) in descriptor.custom_blocks.iter().enumerate() {
            let id = VirtualRequest::for_custom_block(filename, index, block).encode();
            let _ = write!(
                code,
                "\nimport block{index} from {id}\nif (typeof block{index} === 'function') block{index}({binding})",
                id = js_string(&id),
                binding = COMPONENT_BINDING,
            );
        }

        if options.devtools_enabled {
            let _ = write!(
                code,
                "\n{}.__hmrId = {}",
                COMPONENT_BINDING,
                js_string(&compile_options.id)
            );
        }
        if !options.is_production && !options.ssr {
            code.push_str(&hot_stanza());
            if self.rerender_only.contains(filename) {
                code.push_str("\nexport const _rerender_only = true");
            }
        }
        let _ = write!(code, "\nexport default {}", COMPONENT_BINDING);

        let imports = style_imports(&descriptor);
        for id in &imports {
            let _ = write!(code, "\nimport {}", js_string(id));
        }
        code.push('\n');

        Ok(ModuleOutput {
            code,
            map: compiled.map,
            imports,
        })
    }

    /// Produce the module of one block.
    ///
    /// The parent component must already be cached by a main request. Blocks
    /// with a `src` attribute are read from the referenced file instead of
    /// being sliced out of the parent.
    pub fn load_block(&self, request: &VirtualRequest) -> Result<ModuleOutput> {
        let options = self.options.snapshot();
        let filename = normalize_path(&request.filename);
        let parent = self
            .cache
            .get(&filename)
            .ok_or_else(|| ChevaletError::OrphanSubRequest {
                id: request.encode(),
                filename: filename.clone(),
            })?;

        tracing::debug!(target: TARGET, "load {} block of {}", request.kind, filename);
        if request.kind == BlockKind::Raw {
            return Ok(ModuleOutput {
                code: parent.source.clone(),
                ..Default::default()
            });
        }

        check_identity(&parent, request)?;
        let compile_options = options.compile_options(&parent.filename, &parent.source);
        let (descriptor, index) = if request.flags.src {
            let src = referenced_src(&parent, request)?;
            let external = self.cache.get_or_parse_external(
                self.fs.as_ref(),
                &parent.filename,
                &resolve_reference(&parent.filename, src),
                request.kind,
                &request.flags,
            )?;
            (external, 0)
        } else {
            (parent, request.index.unwrap_or(0))
        };

        self.compile_block(&descriptor, request.kind, index, &compile_options)
    }

    fn compile_block(
        &self,
        descriptor: &SfcDescriptor,
        kind: BlockKind,
        index: usize,
        options: &CompileOptions,
    ) -> Result<ModuleOutput> {
        let filename = descriptor.filename.as_str();
        let compiled = match kind {
            BlockKind::Script => {
                require_block(descriptor.script.is_some(), filename, kind)?;
                self.compiler.compile_script(descriptor, options)
            }
            BlockKind::Template => {
                require_block(descriptor.template.is_some(), filename, kind)?;
                self.compiler.compile_template(descriptor, options)
            }
            BlockKind::Style => {
                check_index(filename, kind, index, descriptor.styles.len())?;
                self.compiler.compile_style(descriptor, index, options)
            }
            BlockKind::Custom => {
                check_index(filename, kind, index, descriptor.custom_blocks.len())?;
                let block = &descriptor.custom_blocks[index];
                return Ok(ModuleOutput {
                    code: block.content.clone(),
                    ..Default::default()
                });
            }
            BlockKind::Main | BlockKind::Raw => {
                return Ok(ModuleOutput {
                    code: descriptor.source.clone(),
                    ..Default::default()
                })
            }
        };
        compiled
            .map(ModuleOutput::from)
            .map_err(|error| compile_error(filename, kind, error))
    }
}

impl<C> std::fmt::Debug for Pipeline<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("cache", &self.cache)
            .field("deps", &self.deps)
            .finish_non_exhaustive()
    }
}

fn compile_error(filename: &str, block: BlockKind, error: SfcError) -> ChevaletError {
    ChevaletError::Compile {
        filename: filename.to_string(),
        block,
        error,
    }
}

fn require_block(present: bool, filename: &str, kind: BlockKind) -> Result<()> {
    if present {
        Ok(())
    } else {
        Err(ChevaletError::MissingBlock {
            filename: filename.to_string(),
            kind,
        })
    }
}

fn check_index(filename: &str, kind: BlockKind, index: usize, len: usize) -> Result<()> {
    if index < len {
        Ok(())
    } else {
        Err(ChevaletError::StaleIndex {
            filename: filename.to_string(),
            kind,
            index,
            len,
        })
    }
}

/// Reject a request whose flags no longer describe the block now at its
/// position, so an outdated id never receives a neighbouring block.
fn check_identity(parent: &SfcDescriptor, request: &VirtualRequest) -> Result<()> {
    let filename = parent.filename.as_str();
    let kind = request.kind;
    let index = request.index.unwrap_or(0);
    let same_src = |block: Option<&SfcBlock>| {
        block.map_or(true, |block| block.src.is_some() == request.flags.src)
    };
    let (matches, len) = match kind {
        BlockKind::Style => {
            let len = parent.styles.len();
            check_index(filename, kind, index, len)?;
            let current = VirtualRequest::for_style_block(filename, index, &parent.styles[index]);
            (current.flags == request.flags, len)
        }
        BlockKind::Custom => {
            let len = parent.custom_blocks.len();
            check_index(filename, kind, index, len)?;
            let current =
                VirtualRequest::for_custom_block(filename, index, &parent.custom_blocks[index]);
            (current.flags == request.flags, len)
        }
        BlockKind::Script => (same_src(parent.script.as_ref()), 1),
        BlockKind::Template => (same_src(parent.template.as_ref()), 1),
        BlockKind::Main | BlockKind::Raw => (true, 1),
    };
    if matches {
        return Ok(());
    }
    tracing::debug!(target: TARGET, "{} no longer matches {}", request.encode(), filename);
    Err(ChevaletError::StaleIndex {
        filename: filename.to_string(),
        kind,
        index,
        len,
    })
}

/// The `src` attribute of the block addressed by `request`.
fn referenced_src<'a>(parent: &'a SfcDescriptor, request: &VirtualRequest) -> Result<&'a str> {
    let filename = parent.filename.as_str();
    let kind = request.kind;
    let index = request.index.unwrap_or(0);
    let src = match kind {
        BlockKind::Script => parent.script.as_ref().and_then(|b| b.src.as_deref()),
        BlockKind::Template => parent.template.as_ref().and_then(|b| b.src.as_deref()),
        BlockKind::Style => {
            check_index(filename, kind, index, parent.styles.len())?;
            parent.styles[index].src.as_deref()
        }
        BlockKind::Custom => {
            check_index(filename, kind, index, parent.custom_blocks.len())?;
            parent.custom_blocks[index].src.as_deref()
        }
        BlockKind::Main | BlockKind::Raw => None,
    };
    src.ok_or_else(|| ChevaletError::MissingBlock {
        filename: filename.to_string(),
        kind,
    })
}

/// Resolve a `src` attribute against the directory of `importer`.
pub(crate) fn resolve_reference(importer: &str, src: &str) -> String {
    if src.starts_with('/') || Path::new(src).is_absolute() {
        return normalize_path(src);
    }
    let dir = importer.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
    normalize_path(&format!("{}/{}", dir, src))
}

/// Ids of every style sub-module of `descriptor`, in block order.
pub(crate) fn style_imports(descriptor: &SfcDescriptor) -> Vec<String> {
    descriptor
        .styles
        .iter()
        .enumerate()
        .map(|(index, block)| {
            VirtualRequest::for_style_block(&descriptor.filename, index, block).encode()
        })
        .collect()
}

/// Rebind the first top-level `export default` to [`COMPONENT_BINDING`].
fn bind_default_export(code: &str) -> Option<String> {
    const EXPORT_DEFAULT: &str = "export default";
    let position = code
        .match_indices(EXPORT_DEFAULT)
        .map(|(position, _)| position)
        .find(|&position| position == 0 || code[..position].ends_with('\n'))?;

    let mut out = String::with_capacity(code.len() + 64);
    out.push_str(&code[..position]);
    let _ = write!(out, "const {} =", COMPONENT_BINDING);
    out.push_str(&code[position + EXPORT_DEFAULT.len()..]);
    Some(out)
}

fn hot_stanza() -> String {
    format!(
        r#"
typeof __VUE_HMR_RUNTIME__ !== 'undefined' && __VUE_HMR_RUNTIME__.createRecord({binding}.__hmrId, {binding})
import.meta.hot.on('file-changed', ({{ file }}) => {{
  __VUE_HMR_RUNTIME__.CHANGED_FILE = file
}})
import.meta.hot.accept(mod => {{
  if (!mod) return
  const {{ default: updated, _rerender_only }} = mod
  if (_rerender_only) {{
    __VUE_HMR_RUNTIME__.rerender(updated.__hmrId, updated.render)
  }} else {{
    __VUE_HMR_RUNTIME__.reload(updated.__hmrId, updated)
  }}
}})"#,
        binding = COMPONENT_BINDING
    )
}

fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}
