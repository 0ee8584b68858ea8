//! Virtual module identity codec.
//!
//! Every block of a component is exposed to the bundler as its own module,
//! addressed by the component path plus a query:
//!
//! ```text
//! /src/App.vue?vue&type=style&index=0&scoped=true&lang=scss
//! ```
//!
//! The `vue` key is the sub-module marker. Hooks test for it with [`decode`]
//! before doing any other work, so ordinary files are declined cheaply.
//! Canonical ids (the output of [`encode`]) round-trip exactly; unknown query
//! keys appended by hosts (timestamps, import flags) are ignored on decode.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::fmt::Write as _;

use vize_carton::{clean_id, normalize_path};

use crate::error::{ChevaletError, Result};
use crate::types::{SfcCustomBlock, SfcStyleBlock};

/// Query key that marks an id as a component sub-module.
pub const DISCRIMINATOR: &str = "vue";

/// Characters escaped in the path segment.
const PATH_RESERVED: &[char] = &['%', '?'];

/// Characters escaped in query values.
const VALUE_RESERVED: &[char] = &['%', '&', '=', '#'];

/// Which part of a component a request addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    /// The whole component
    Main,
    /// Resolved script
    Script,
    /// Template render function
    Template,
    /// One style block
    Style,
    /// One custom block
    Custom,
    /// The untouched component source
    Raw,
}

impl BlockKind {
    /// Value used for the `type` query key.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Script => "script",
            Self::Template => "template",
            Self::Style => "style",
            Self::Custom => "custom",
            Self::Raw => "raw",
        }
    }

    /// Parse a `type` query value.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "main" => Some(Self::Main),
            "script" => Some(Self::Script),
            "template" => Some(Self::Template),
            "style" => Some(Self::Style),
            "custom" => Some(Self::Custom),
            "raw" => Some(Self::Raw),
            _ => None,
        }
    }

    /// Kinds addressing one of several blocks carry an index.
    #[inline]
    pub fn is_indexed(self) -> bool {
        matches!(self, Self::Style | Self::Custom)
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flags carried by a request so downstream stages need not re-inspect the descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RequestFlags {
    /// Scoped style (meaningful for `style` only)
    pub scoped: bool,

    /// Block language tag
    pub lang: Option<String>,

    /// Block content lives in an external file (`<style src="...">`)
    pub src: bool,
}

/// Decoded view of a sub-module id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VirtualRequest {
    /// Target component file
    pub filename: String,

    /// Addressed block
    pub kind: BlockKind,

    /// Block ordinal for `style`/`custom`
    pub index: Option<usize>,

    /// Downstream flags
    pub flags: RequestFlags,
}

impl VirtualRequest {
    fn with_kind(filename: impl Into<String>, kind: BlockKind) -> Self {
        Self {
            filename: filename.into(),
            kind,
            index: None,
            flags: RequestFlags::default(),
        }
    }

    /// Request for the whole component.
    pub fn main(filename: impl Into<String>) -> Self {
        Self::with_kind(filename, BlockKind::Main)
    }

    /// Request for the resolved script.
    pub fn script(filename: impl Into<String>, lang: Option<String>) -> Self {
        let mut request = Self::with_kind(filename, BlockKind::Script);
        request.flags.lang = lang;
        request
    }

    /// Request for the compiled template.
    pub fn template(filename: impl Into<String>, lang: Option<String>) -> Self {
        let mut request = Self::with_kind(filename, BlockKind::Template);
        request.flags.lang = lang;
        request
    }

    /// Request for style block `index`.
    pub fn style(
        filename: impl Into<String>,
        index: usize,
        scoped: bool,
        lang: Option<String>,
    ) -> Self {
        let mut request = Self::with_kind(filename, BlockKind::Style);
        request.index = Some(index);
        request.flags.scoped = scoped;
        request.flags.lang = lang;
        request
    }

    /// Request for custom block `index`.
    pub fn custom(filename: impl Into<String>, index: usize, lang: Option<String>) -> Self {
        let mut request = Self::with_kind(filename, BlockKind::Custom);
        request.index = Some(index);
        request.flags.lang = lang;
        request
    }

    /// Request for the raw component source.
    pub fn raw(filename: impl Into<String>) -> Self {
        Self::with_kind(filename, BlockKind::Raw)
    }

    /// Request for style block `index`, flags taken from the block itself.
    pub fn for_style_block(filename: impl Into<String>, index: usize, block: &SfcStyleBlock) -> Self {
        let request = Self::style(
            filename,
            index,
            block.scoped,
            Some(block.lang_or_default().to_string()),
        );
        if block.src.is_some() {
            request.with_src()
        } else {
            request
        }
    }

    /// Request for custom block `index`; the language falls back to the block tag.
    pub fn for_custom_block(
        filename: impl Into<String>,
        index: usize,
        block: &SfcCustomBlock,
    ) -> Self {
        let lang = block.lang.clone().unwrap_or_else(|| block.block_type.clone());
        let request = Self::custom(filename, index, Some(lang));
        if block.src.is_some() {
            request.with_src()
        } else {
            request
        }
    }

    /// Mark the block as externally referenced.
    pub fn with_src(mut self) -> Self {
        self.flags.src = true;
        self
    }

    /// Encode into a module id.
    pub fn encode(&self) -> String {
        encode(self)
    }
}

/// Result of classifying an incoming id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// A real file (no sub-module marker)
    Main { filename: String },
    /// A block of a component
    Sub(VirtualRequest),
}

/// Encode a request into its module id.
pub fn encode(request: &VirtualRequest) -> String {
    let mut id = escape(&request.filename, PATH_RESERVED).into_owned();
    id.push('?');
    id.push_str(DISCRIMINATOR);
    id.push_str("&type=");
    id.push_str(request.kind.as_str());

    if request.kind.is_indexed() {
        if let Some(index) = request.index {
            let _ = write!(id, "&index={}", index);
        }
    }
    if request.flags.src {
        id.push_str("&src=true");
    }
    if request.kind == BlockKind::Style {
        let _ = write!(id, "&scoped={}", request.flags.scoped);
    }
    if let Some(lang) = &request.flags.lang {
        id.push_str("&lang=");
        id.push_str(&escape(lang, VALUE_RESERVED));
    }

    id
}

/// Decode a module id, `None` when it is not a well-formed sub-module id.
pub fn decode(id: &str) -> Option<VirtualRequest> {
    parse_id(id).ok().flatten()
}

/// Classify an id as a main request or a sub request.
///
/// Ids carrying the marker but otherwise malformed are rejected instead of
/// being mistaken for a real file.
pub fn classify(id: &str) -> Result<Request> {
    match parse_id(id) {
        Ok(Some(request)) if request.kind == BlockKind::Main => Ok(Request::Main {
            filename: normalize_path(&request.filename),
        }),
        Ok(Some(request)) => Ok(Request::Sub(request)),
        Ok(None) => Ok(Request::Main {
            filename: normalize_path(clean_id(id)),
        }),
        Err(reason) => Err(ChevaletError::InvalidRequest {
            id: id.to_string(),
            reason,
        }),
    }
}

/// Whether the id targets a `.vue` file (query ignored).
#[inline]
pub fn is_vue_file(id: &str) -> bool {
    clean_id(id).ends_with(".vue")
}

/// `Ok(None)` when the marker is absent, `Err` when present but malformed.
fn parse_id(id: &str) -> std::result::Result<Option<VirtualRequest>, String> {
    let Some((path, query)) = id.split_once('?') else {
        return Ok(None);
    };

    let mut marked = false;
    let mut kind = None;
    let mut index = None;
    let mut scoped = false;
    let mut src = false;
    let mut lang = None;

    for pair in query.split('&') {
        let (key, value) = match pair.split_once('=') {
            Some((key, value)) => (key, Some(value)),
            None => (pair, None),
        };
        match (key, value) {
            (DISCRIMINATOR, None) => marked = true,
            ("type", Some(value)) => kind = BlockKind::parse(value),
            ("index", Some(value)) => index = value.parse::<usize>().ok(),
            ("scoped", Some(value)) => scoped = value == "true",
            ("src", Some(value)) => src = value == "true",
            ("lang", Some(value)) => lang = Some(unescape(value, VALUE_RESERVED).into_owned()),
            _ => {}
        }
    }

    if !marked {
        return Ok(None);
    }

    let kind = kind.unwrap_or(BlockKind::Main);
    let index = if kind.is_indexed() {
        match index {
            Some(index) => Some(index),
            None => return Err(format!("`{}` requests require a numeric index", kind)),
        }
    } else {
        None
    };

    Ok(Some(VirtualRequest {
        filename: unescape(path, PATH_RESERVED).into_owned(),
        kind,
        index,
        flags: RequestFlags {
            scoped: kind == BlockKind::Style && scoped,
            lang,
            src,
        },
    }))
}

fn escape<'a>(value: &'a str, reserved: &[char]) -> Cow<'a, str> {
    if !value.contains(reserved) {
        return Cow::Borrowed(value);
    }

    let mut out = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        if reserved.contains(&c) {
            let _ = write!(out, "%{:02X}", c as u32);
        } else {
            out.push(c);
        }
    }
    Cow::Owned(out)
}

fn unescape<'a>(value: &'a str, reserved: &[char]) -> Cow<'a, str> {
    if !value.contains('%') {
        return Cow::Borrowed(value);
    }

    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let decoded = tail
            .get(1..3)
            .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            .map(char::from)
            .filter(|c| reserved.contains(c));
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &tail[3..];
            }
            None => {
                out.push('%');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}
