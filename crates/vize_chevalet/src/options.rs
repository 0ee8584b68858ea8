//! Plugin options.
//!
//! [`Options`] is what a user writes (every field optional, camelCase, the
//! same shape as the `chevalet` section of `vize.config.json`).
//! [`resolve_options`] fills in defaults and compiles the filters once, giving
//! a [`ResolvedOptions`] snapshot. The pipeline keeps the current snapshot in
//! an [`OptionsCell`]; a request reads it once at its start and never sees a
//! change made while it runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use vize_carton::{clean_id, normalize_path, relative_to, short_hash};

use crate::compiler::{CompileOptions, ParseOptions};
use crate::error::{ChevaletError, Result};

/// Name of the configuration file read by [`load_options`].
pub const CONFIG_FILE: &str = "vize.config.json";

/// Default include pattern.
pub const DEFAULT_INCLUDE: &str = r"\.vue$";

/// Default custom element pattern.
pub const DEFAULT_CUSTOM_ELEMENT: &str = r"\.ce\.vue$";

/// One pattern or a list of patterns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Patterns {
    One(String),
    Many(Vec<String>),
}

impl Patterns {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(pattern) => vec![pattern],
            Self::Many(patterns) => patterns,
        }
    }
}

/// User-facing plugin options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Options {
    /// Files to handle (regular expressions), default `\.vue$`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include: Option<Patterns>,

    /// Files to skip even when included
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude: Option<Patterns>,

    /// Production build, default from `NODE_ENV`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_production: Option<bool>,

    /// Server-side rendering output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssr: Option<bool>,

    /// Emit source maps, default `true`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_map: Option<bool>,

    /// Project root, default the working directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    /// Inline the render function into `<script setup>`, default `true`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_template: Option<bool>,

    /// Vue feature flags
    pub features: Features,
}

/// Vue feature flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Features {
    #[serde(rename = "optionsAPI", alias = "optionsApi")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options_api: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prod_devtools: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prod_hydration_mismatch_details: Option<bool>,

    /// Reactive props destructure; left to the compiler when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub props_destructure: Option<bool>,

    /// `true` turns every component into a custom element, patterns select files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_element: Option<CustomElementOption>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_id_generator: Option<ComponentIdStrategy>,
}

/// `features.customElement`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CustomElementOption {
    Enabled(bool),
    Patterns(Patterns),
}

/// How the per-component id is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComponentIdStrategy {
    /// Hash of the root-relative path
    Filepath,
    /// Hash of the root-relative path and the source
    FilepathSource,
}

/// Include/exclude filter over cleaned module ids.
#[derive(Debug, Clone)]
pub struct Filter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl Filter {
    /// Compile the patterns. An empty include list matches everything.
    pub fn new<S: AsRef<str>>(include: &[S], exclude: &[S]) -> Result<Self> {
        Ok(Self {
            include: compile_patterns(include)?,
            exclude: compile_patterns(exclude)?,
        })
    }

    /// Whether `id` (query ignored) is included and not excluded.
    ///
    /// Ids starting with `\0` belong to other plugins and never match.
    pub fn matches(&self, id: &str) -> bool {
        if id.starts_with('\0') {
            return false;
        }
        let path = normalize_path(clean_id(id));
        if self.exclude.iter().any(|re| re.is_match(&path)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|re| re.is_match(&path))
    }
}

fn compile_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Regex::new(p.as_ref()).map_err(ChevaletError::from))
        .collect()
}

/// Resolved `features.customElement`.
#[derive(Debug, Clone)]
pub enum CustomElementFilter {
    All,
    Nothing,
    Matching(Filter),
}

impl CustomElementFilter {
    fn matches(&self, filename: &str) -> bool {
        match self {
            Self::All => true,
            Self::Nothing => false,
            Self::Matching(filter) => filter.matches(filename),
        }
    }
}

/// Options with every default applied.
#[derive(Debug, Clone)]
pub struct ResolvedOptions {
    pub filter: Filter,
    pub is_production: bool,
    pub ssr: bool,
    pub source_map: bool,
    /// Normalized project root
    pub root: String,
    pub inline_template: bool,
    pub options_api: bool,
    pub prod_devtools: bool,
    pub prod_hydration_mismatch_details: bool,
    pub props_destructure: Option<bool>,
    pub custom_element: CustomElementFilter,
    /// Explicit id strategy; unset follows `is_production`
    pub component_id_generator: Option<ComponentIdStrategy>,
    /// HMR and devtools hooks are emitted
    pub devtools_enabled: bool,
}

impl ResolvedOptions {
    /// Id strategy in effect: `filepath` in development, `filepath-source`
    /// in production, unless set explicitly.
    pub fn component_id_strategy(&self) -> ComponentIdStrategy {
        self.component_id_generator.unwrap_or(if self.is_production {
            ComponentIdStrategy::FilepathSource
        } else {
            ComponentIdStrategy::Filepath
        })
    }

    /// Stable id of a component, used as HMR id and scope id.
    pub fn component_id(&self, filename: &str, source: &str) -> String {
        let relative = relative_to(filename, &self.root);
        match self.component_id_strategy() {
            ComponentIdStrategy::Filepath => short_hash(&relative),
            ComponentIdStrategy::FilepathSource => short_hash(&format!("{}{}", relative, source)),
        }
    }

    /// Whether `filename` compiles as a custom element.
    pub fn is_custom_element(&self, filename: &str) -> bool {
        self.custom_element.matches(filename)
    }

    /// Options for splitting a source into blocks.
    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            source_map: self.source_map,
            ignore_empty: true,
        }
    }

    /// Options for compiling the blocks of one component.
    pub fn compile_options(&self, filename: &str, source: &str) -> CompileOptions {
        CompileOptions {
            id: self.component_id(filename, source),
            is_production: self.is_production,
            ssr: self.ssr,
            source_map: self.source_map,
            inline_template: self.inline_template,
            custom_element: self.is_custom_element(filename),
            props_destructure: self.props_destructure,
            options_api: self.options_api,
        }
    }

    /// Compile-time constants a host should define for the Vue runtime.
    pub fn define_constants(&self) -> [(&'static str, bool); 3] {
        [
            ("__VUE_OPTIONS_API__", self.options_api),
            ("__VUE_PROD_DEVTOOLS__", self.prod_devtools),
            (
                "__VUE_PROD_HYDRATION_MISMATCH_DETAILS__",
                self.prod_hydration_mismatch_details,
            ),
        ]
    }
}

/// Apply defaults, reading `NODE_ENV` and the working directory when needed.
pub fn resolve_options(options: Options) -> Result<ResolvedOptions> {
    let node_env = std::env::var("NODE_ENV").ok();
    let cwd = std::env::current_dir().unwrap_or_default();
    resolve_with(options, node_env.as_deref(), &cwd)
}

fn resolve_with(options: Options, node_env: Option<&str>, cwd: &Path) -> Result<ResolvedOptions> {
    let is_production = options
        .is_production
        .unwrap_or(node_env == Some("production"));
    let features = options.features;
    let prod_devtools = features.prod_devtools.unwrap_or(false);

    let include = options
        .include
        .map(Patterns::into_vec)
        .unwrap_or_else(|| vec![DEFAULT_INCLUDE.to_string()]);
    let exclude = options.exclude.map(Patterns::into_vec).unwrap_or_default();

    let custom_element = match features.custom_element {
        Some(CustomElementOption::Enabled(true)) => CustomElementFilter::All,
        Some(CustomElementOption::Enabled(false)) => CustomElementFilter::Nothing,
        Some(CustomElementOption::Patterns(patterns)) => {
            CustomElementFilter::Matching(Filter::new(&patterns.into_vec(), &[])?)
        }
        None => CustomElementFilter::Matching(Filter::new(&[DEFAULT_CUSTOM_ELEMENT], &[])?),
    };

    let root = options.root.unwrap_or_else(|| cwd.to_path_buf());

    Ok(ResolvedOptions {
        filter: Filter::new(&include, &exclude)?,
        is_production,
        ssr: options.ssr.unwrap_or(false),
        source_map: options.source_map.unwrap_or(true),
        root: normalize_path(&root.to_string_lossy()),
        inline_template: options.inline_template.unwrap_or(true),
        options_api: features.options_api.unwrap_or(true),
        prod_devtools,
        prod_hydration_mismatch_details: features.prod_hydration_mismatch_details.unwrap_or(false),
        props_destructure: features.props_destructure,
        custom_element,
        component_id_generator: features.component_id_generator,
        devtools_enabled: prod_devtools || !is_production,
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    chevalet: Option<Options>,
}

/// Load the `chevalet` section of `vize.config.json` from `dir` (or CWD if None).
///
/// A missing file or section yields the default options. A malformed file is
/// an error rather than being silently ignored.
pub fn load_options(dir: Option<&Path>) -> Result<Options> {
    let base = dir
        .map(|d| d.to_path_buf())
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());
    let config_path = base.join(CONFIG_FILE);

    if !config_path.exists() {
        tracing::debug!(target: "vize_chevalet::compile", "no {} in {}", CONFIG_FILE, base.display());
        return Ok(Options::default());
    }

    let content = std::fs::read_to_string(&config_path)?;
    let config: ConfigFile =
        serde_json::from_str(&content).map_err(|source| ChevaletError::Config {
            path: config_path,
            source,
        })?;
    Ok(config.chevalet.unwrap_or_default())
}

/// The pipeline's mutable configuration cell.
#[derive(Debug)]
pub struct OptionsCell {
    current: RwLock<Arc<ResolvedOptions>>,
}

impl OptionsCell {
    pub fn new(options: ResolvedOptions) -> Self {
        Self {
            current: RwLock::new(Arc::new(options)),
        }
    }

    /// Snapshot for one request.
    pub fn snapshot(&self) -> Arc<ResolvedOptions> {
        Arc::clone(&*self.current.read())
    }

    /// Replace the options. In-flight requests keep their snapshot.
    pub fn set(&self, options: ResolvedOptions) {
        *self.current.write() = Arc::new(options);
    }

    /// Derive new options from the current ones and install them.
    pub fn update(&self, f: impl FnOnce(&mut ResolvedOptions)) {
        let mut current = self.current.write();
        let mut next = ResolvedOptions::clone(&current);
        f(&mut next);
        *current = Arc::new(next);
    }
}
