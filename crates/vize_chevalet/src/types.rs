//! SFC descriptor types.
//!
//! A descriptor outlives the request that parsed it (it sits in the cache
//! until the file changes), so blocks own their strings instead of borrowing
//! from the source.

use serde::{Deserialize, Serialize};
use std::fmt;
use vize_carton::FxHashMap;

use crate::query::BlockKind;

/// SFC Descriptor - parsed result of a .vue file at one point in time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SfcDescriptor {
    /// Normalized absolute filename, without query
    pub filename: String,

    /// Source code the descriptor was parsed from
    pub source: String,

    /// Script block (`<script>` and `<script setup>` already merged by the compiler)
    pub script: Option<SfcBlock>,

    /// Template block
    pub template: Option<SfcBlock>,

    /// Style blocks, in source order
    pub styles: Vec<SfcStyleBlock>,

    /// Custom blocks (e.g., <i18n>, <docs>), in source order
    pub custom_blocks: Vec<SfcCustomBlock>,
}

impl SfcDescriptor {
    /// Create an empty descriptor for `filename` holding `source`.
    pub fn new(filename: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            source: source.into(),
            ..Default::default()
        }
    }

    /// Whether this descriptor was parsed from exactly `source`.
    #[inline]
    pub fn is_parsed_from(&self, source: &str) -> bool {
        self.source == source
    }

    /// Wrap the content of a `src`-referenced file as the only block of its kind.
    ///
    /// The block sits at index 0. `Main` and `Raw` have no block, so the
    /// descriptor only carries the source.
    pub fn single_block(
        path: &str,
        content: String,
        kind: BlockKind,
        lang: Option<String>,
        scoped: bool,
    ) -> Self {
        let mut descriptor = Self::new(path, content.clone());
        let src = Some(path.to_string());
        match kind {
            BlockKind::Script | BlockKind::Template => {
                let block = SfcBlock {
                    content,
                    lang,
                    src,
                    ..Default::default()
                };
                if kind == BlockKind::Script {
                    descriptor.script = Some(block);
                } else {
                    descriptor.template = Some(block);
                }
            }
            BlockKind::Style => descriptor.styles.push(SfcStyleBlock {
                content,
                lang,
                src,
                scoped,
                ..Default::default()
            }),
            BlockKind::Custom => descriptor.custom_blocks.push(SfcCustomBlock {
                block_type: "custom".to_string(),
                content,
                lang,
                src,
                ..Default::default()
            }),
            BlockKind::Main | BlockKind::Raw => {}
        }
        descriptor
    }

    /// Style block at `index`.
    pub fn style(&self, index: usize) -> Option<&SfcStyleBlock> {
        self.styles.get(index)
    }

    /// Custom block at `index`.
    pub fn custom_block(&self, index: usize) -> Option<&SfcCustomBlock> {
        self.custom_blocks.get(index)
    }

    /// Whether any style block is scoped.
    pub fn has_scoped_style(&self) -> bool {
        self.styles.iter().any(|s| s.scoped)
    }

    /// Iterate over the `src` attributes of every block.
    pub fn src_references(&self) -> impl Iterator<Item = &str> {
        self.script
            .iter()
            .chain(self.template.iter())
            .filter_map(|b| b.src.as_deref())
            .chain(self.styles.iter().filter_map(|s| s.src.as_deref()))
            .chain(self.custom_blocks.iter().filter_map(|c| c.src.as_deref()))
    }
}

/// Script or template block
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SfcBlock {
    /// Block content
    pub content: String,

    /// Block location in source
    pub loc: BlockLocation,

    /// Block language (ts, pug, ...)
    #[serde(default)]
    pub lang: Option<String>,

    /// Source attribute for an external block
    #[serde(default)]
    pub src: Option<String>,

    /// Additional attributes
    #[serde(default)]
    pub attrs: FxHashMap<String, String>,
}

impl SfcBlock {
    /// Create a block from its content.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

/// Style block
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SfcStyleBlock {
    /// Block content
    pub content: String,

    /// Block location in source
    pub loc: BlockLocation,

    /// Style language (css/scss/less/etc)
    #[serde(default)]
    pub lang: Option<String>,

    /// Source attribute for external style
    #[serde(default)]
    pub src: Option<String>,

    /// Whether the style is scoped
    #[serde(default)]
    pub scoped: bool,

    /// CSS module binding name
    #[serde(default)]
    pub module: Option<String>,

    /// Additional attributes
    #[serde(default)]
    pub attrs: FxHashMap<String, String>,
}

impl SfcStyleBlock {
    /// Create an unscoped style block from its content.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    /// Style language, `css` when unspecified.
    pub fn lang_or_default(&self) -> &str {
        self.lang.as_deref().unwrap_or("css")
    }
}

/// Custom block (e.g., <i18n>, <docs>)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SfcCustomBlock {
    /// Block type/tag name
    #[serde(rename = "type")]
    pub block_type: String,

    /// Block content
    pub content: String,

    /// Block location in source
    pub loc: BlockLocation,

    /// Declared language, if any
    #[serde(default)]
    pub lang: Option<String>,

    /// Source attribute for an external block
    #[serde(default)]
    pub src: Option<String>,

    /// Additional attributes
    #[serde(default)]
    pub attrs: FxHashMap<String, String>,
}

/// Location information for a block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLocation {
    /// Start offset in source
    pub start: usize,

    /// End offset in source
    pub end: usize,

    /// Start line (1-based)
    pub start_line: usize,

    /// Start column (1-based)
    pub start_column: usize,

    /// End line (1-based)
    pub end_line: usize,

    /// End column (1-based)
    pub end_column: usize,
}

/// Output of compiling one block
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledBlock {
    /// Generated code (JavaScript or CSS)
    pub code: String,

    /// Source map
    #[serde(default)]
    pub map: Option<serde_json::Value>,
}

impl CompiledBlock {
    /// Create a compiled block without a source map.
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            map: None,
        }
    }
}

/// Output of the fused script + template compilation of a whole SFC
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledMain {
    /// Main module body, ending in `export default`
    pub code: String,

    /// Source map
    #[serde(default)]
    pub map: Option<serde_json::Value>,

    /// Files consumed only for type inference (props/emits), absolute paths
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// SFC error/warning reported by the compiler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SfcError {
    /// Error message
    pub message: String,

    /// Error code
    #[serde(default)]
    pub code: Option<String>,

    /// Location
    #[serde(default)]
    pub loc: Option<BlockLocation>,
}

impl SfcError {
    /// Create an error without code or location.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            loc: None,
        }
    }

    /// Attach an error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach a source location.
    pub fn at(mut self, loc: BlockLocation) -> Self {
        self.loc = Some(loc);
        self
    }
}

impl fmt::Display for SfcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = &self.code {
            write!(f, "[{}] ", code)?;
        }
        write!(f, "{}", self.message)?;
        if let Some(loc) = &self.loc {
            write!(f, " ({}:{})", loc.start_line, loc.start_column)?;
        }
        Ok(())
    }
}

impl std::error::Error for SfcError {}
