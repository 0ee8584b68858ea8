//! The compiler seam.
//!
//! Chevalet never compiles anything itself. Parsing a component into blocks and
//! compiling those blocks is delegated to an [`SfcCompiler`]; this crate only
//! decides *what* to compile, caches the answer and assembles the modules the
//! bundler sees.

use std::sync::Arc;

use crate::types::{CompiledBlock, CompiledMain, SfcDescriptor, SfcError};

/// Options that influence how a source is split into blocks.
///
/// Part of the descriptor cache key: a cached descriptor is only reused when
/// both the source and these options are unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ParseOptions {
    /// Produce block source maps
    pub source_map: bool,

    /// Drop blocks whose content is only whitespace
    pub ignore_empty: bool,
}

/// Options handed to every block compilation of one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// Stable component id, also used as the scope id for scoped CSS
    pub id: String,

    /// Production build
    pub is_production: bool,

    /// Server-side rendering output
    pub ssr: bool,

    /// Emit source maps
    pub source_map: bool,

    /// Inline the render function into `<script setup>`
    pub inline_template: bool,

    /// Compile as a custom element
    pub custom_element: bool,

    /// Reactive props destructure, `None` leaves the compiler default
    pub props_destructure: Option<bool>,

    /// Options API support
    pub options_api: bool,
}

/// External component compiler.
///
/// Implementations must be pure with respect to their inputs: the same
/// descriptor and options always yield the same output.
pub trait SfcCompiler: Send + Sync {
    /// Split `source` into a descriptor.
    fn parse(
        &self,
        source: &str,
        filename: &str,
        options: &ParseOptions,
    ) -> Result<SfcDescriptor, SfcError>;

    /// Fused script + template compilation of the whole component.
    fn compile_main(
        &self,
        descriptor: &SfcDescriptor,
        options: &CompileOptions,
    ) -> Result<CompiledMain, SfcError>;

    /// Resolved script (script and script setup merged).
    fn compile_script(
        &self,
        descriptor: &SfcDescriptor,
        options: &CompileOptions,
    ) -> Result<CompiledBlock, SfcError>;

    /// Template compiled to a render function module.
    fn compile_template(
        &self,
        descriptor: &SfcDescriptor,
        options: &CompileOptions,
    ) -> Result<CompiledBlock, SfcError>;

    /// Style block `index`, preprocessed and scoped.
    fn compile_style(
        &self,
        descriptor: &SfcDescriptor,
        index: usize,
        options: &CompileOptions,
    ) -> Result<CompiledBlock, SfcError>;
}

impl<C: SfcCompiler + ?Sized> SfcCompiler for Arc<C> {
    fn parse(
        &self,
        source: &str,
        filename: &str,
        options: &ParseOptions,
    ) -> Result<SfcDescriptor, SfcError> {
        (**self).parse(source, filename, options)
    }

    fn compile_main(
        &self,
        descriptor: &SfcDescriptor,
        options: &CompileOptions,
    ) -> Result<CompiledMain, SfcError> {
        (**self).compile_main(descriptor, options)
    }

    fn compile_script(
        &self,
        descriptor: &SfcDescriptor,
        options: &CompileOptions,
    ) -> Result<CompiledBlock, SfcError> {
        (**self).compile_script(descriptor, options)
    }

    fn compile_template(
        &self,
        descriptor: &SfcDescriptor,
        options: &CompileOptions,
    ) -> Result<CompiledBlock, SfcError> {
        (**self).compile_template(descriptor, options)
    }

    fn compile_style(
        &self,
        descriptor: &SfcDescriptor,
        index: usize,
        options: &CompileOptions,
    ) -> Result<CompiledBlock, SfcError> {
        (**self).compile_style(descriptor, index, options)
    }
}
