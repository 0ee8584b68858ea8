//! # vize_chevalet
//!
//! Chevalet - The easel that holds Vue SFCs for every bundler.
//!
//! ## Name Origin
//!
//! **Chevalet** (/ʃəvalɛ/) is French for *easel*: the stand that holds a
//! canvas steady while the painter works on one part of it at a time.
//! `vize_chevalet` holds a single-file component steady across the hook calls
//! of a bundler, presenting each block (script, template, styles, custom
//! blocks) as its own module while keeping one consistent view of the file.
//!
//! ## Architecture
//!
//! ```text
//! +-------------------------------------------------------------+
//! |                        vize_chevalet                         |
//! +-------------------------------------------------------------+
//! |                                                              |
//! |  ChevaletPlugin / AsyncPlugin   (resolveId, load, transform, |
//! |          |                       handleHotUpdate)            |
//! |          v                                                   |
//! |  +----------------+   classify   +----------------------+    |
//! |  | Pipeline       |------------->| query (id codec)     |    |
//! |  | - transform    |              +----------------------+    |
//! |  | - load_block   |   parse      +----------------------+    |
//! |  | - hot update   |------------->| DescriptorCache      |    |
//! |  +----------------+              | DependencyIndex      |    |
//! |          |                       +----------------------+    |
//! |          v                                                   |
//! |  SfcCompiler (external)                                      |
//! +-------------------------------------------------------------+
//! ```
//!
//! ## Example
//!
//! ```
//! use vize_chevalet::{decode, BlockKind, VirtualRequest};
//!
//! let id = VirtualRequest::style("/src/App.vue", 0, true, Some("scss".into())).encode();
//! assert_eq!(id, "/src/App.vue?vue&type=style&index=0&scoped=true&lang=scss");
//!
//! let request = decode(&id).unwrap();
//! assert_eq!(request.kind, BlockKind::Style);
//! assert_eq!(request.index, Some(0));
//! ```

pub mod cache;
pub mod compiler;
pub mod debug;
pub mod deps;
pub mod error;
pub mod fs;
pub mod hmr;
pub mod options;
pub mod pipeline;
pub mod plugin;
pub mod query;
pub mod types;

#[cfg(test)]
mod test_utils;

pub use cache::{DescriptorCache, Revision};
pub use compiler::{CompileOptions, ParseOptions, SfcCompiler};
pub use debug::init_debug_logging;
pub use deps::DependencyIndex;
pub use error::{ChevaletError, Result};
pub use fs::{FileSystem, MemoryFileSystem, OsFileSystem};
pub use hmr::{diff_for_hot_update, diff_styles, HotUpdate, HotUpdateKind, StyleDiff};
pub use options::{load_options, resolve_options, Options, OptionsCell, ResolvedOptions};
pub use pipeline::{ModuleOutput, Pipeline};
pub use plugin::{AsyncPlugin, ChevaletPlugin, HostCapabilities, HostKind, HotUpdateResponse};
pub use query::{classify, decode, encode, BlockKind, Request, RequestFlags, VirtualRequest};
pub use types::{
    BlockLocation, CompiledBlock, CompiledMain, SfcBlock, SfcCustomBlock, SfcDescriptor, SfcError,
    SfcStyleBlock,
};
