//! Descriptor cache.
//!
//! The single source of truth for which blocks a component currently has.
//! Entries are never mutated: a changed source produces a new descriptor that
//! replaces the old `Arc` wholesale, so a request holding the old descriptor
//! keeps a consistent view.
//!
//! Read-modify-write sequences are serialized per filename. Each call takes a
//! [`Revision`] ticket before parsing; a store is refused when a later ticket
//! already stored its result, so a slow parse of an outdated source never
//! overwrites a newer entry.

use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use vize_carton::{normalize_path, FxHasher};

use crate::compiler::{ParseOptions, SfcCompiler};
use crate::error::{ChevaletError, Result};
use crate::fs::FileSystem;
use crate::query::{BlockKind, RequestFlags};
use crate::types::SfcDescriptor;

const TARGET: &str = "vize_chevalet::cache";

/// Monotonic ticket ordering cache writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Revision(u64);

#[derive(Debug, Clone)]
struct CacheEntry {
    descriptor: Arc<SfcDescriptor>,
    fingerprint: u64,
    revision: Revision,
}

/// Key of a `src`-referenced pseudo-descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ExternalKey {
    path: String,
    kind: BlockKind,
    scoped: bool,
    lang: Option<String>,
}

/// Per-session descriptor cache.
#[derive(Debug, Default)]
pub struct DescriptorCache {
    entries: DashMap<String, CacheEntry>,
    external: DashMap<ExternalKey, Arc<SfcDescriptor>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    revision: AtomicU64,
}

impl DescriptorCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pure lookup; never parses.
    pub fn get(&self, filename: &str) -> Option<Arc<SfcDescriptor>> {
        self.entries
            .get(&normalize_path(filename))
            .map(|entry| Arc::clone(&entry.descriptor))
    }

    /// Take a write ticket. Later tickets win over earlier ones.
    pub fn begin(&self) -> Revision {
        Revision(self.revision.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Return the cached descriptor when `source` and `options` are unchanged,
    /// otherwise parse, store and return a new one.
    pub fn get_or_parse<C: SfcCompiler + ?Sized>(
        &self,
        compiler: &C,
        filename: &str,
        source: &str,
        options: &ParseOptions,
    ) -> Result<Arc<SfcDescriptor>> {
        let revision = self.begin();
        self.get_or_parse_at(revision, compiler, filename, source, options)
    }

    /// [`get_or_parse`](Self::get_or_parse) with a ticket taken earlier by [`begin`](Self::begin).
    pub fn get_or_parse_at<C: SfcCompiler + ?Sized>(
        &self,
        revision: Revision,
        compiler: &C,
        filename: &str,
        source: &str,
        options: &ParseOptions,
    ) -> Result<Arc<SfcDescriptor>> {
        let filename = normalize_path(filename);
        let fingerprint = fingerprint(options);
        let lock = self.lock_for(&filename);
        let _guard = lock.lock();

        if let Some(cached) = self.lookup(&filename, source, fingerprint) {
            tracing::trace!(target: TARGET, "hit {}", filename);
            return Ok(cached);
        }

        let descriptor = Arc::new(parse(compiler, &filename, source, options)?);
        self.store(
            filename,
            CacheEntry {
                descriptor: Arc::clone(&descriptor),
                fingerprint,
                revision,
            },
        );
        Ok(descriptor)
    }

    /// Re-parse `filename` and hand both the previous and the fresh descriptor
    /// to `decide` before the fresh one replaces the entry.
    ///
    /// The whole sequence runs under the filename lock. When the source is
    /// unchanged the fresh descriptor is the cached one.
    pub fn refresh<C, T>(
        &self,
        compiler: &C,
        filename: &str,
        source: &str,
        options: &ParseOptions,
        decide: impl FnOnce(Option<&SfcDescriptor>, &SfcDescriptor) -> T,
    ) -> Result<(T, Arc<SfcDescriptor>)>
    where
        C: SfcCompiler + ?Sized,
    {
        let revision = self.begin();
        let filename = normalize_path(filename);
        let fingerprint = fingerprint(options);
        let lock = self.lock_for(&filename);
        let _guard = lock.lock();

        let previous = self
            .entries
            .get(&filename)
            .map(|entry| (Arc::clone(&entry.descriptor), entry.fingerprint));

        let fresh = match &previous {
            Some((descriptor, cached_fingerprint))
                if *cached_fingerprint == fingerprint && descriptor.is_parsed_from(source) =>
            {
                Arc::clone(descriptor)
            }
            _ => Arc::new(parse(compiler, &filename, source, options)?),
        };

        let decision = decide(previous.as_ref().map(|(d, _)| d.as_ref()), &fresh);

        self.store(
            filename,
            CacheEntry {
                descriptor: Arc::clone(&fresh),
                fingerprint,
                revision,
            },
        );
        Ok((decision, fresh))
    }

    /// Read a `src`-referenced file and wrap it as a single-block descriptor.
    ///
    /// The block sits at index 0 of its kind. Pseudo-descriptors live in their
    /// own map so they never shadow a component stored under the same path.
    /// Read failures are attributed to `importer`.
    pub fn get_or_parse_external(
        &self,
        fs: &dyn FileSystem,
        importer: &str,
        referenced: &str,
        kind: BlockKind,
        flags: &RequestFlags,
    ) -> Result<Arc<SfcDescriptor>> {
        let path = normalize_path(referenced);
        let content =
            fs.read_to_string(Path::new(&path))
                .map_err(|source| ChevaletError::ExternalRead {
                    importer: normalize_path(importer),
                    path: path.clone(),
                    source,
                })?;

        let key = ExternalKey {
            path: path.clone(),
            kind,
            scoped: flags.scoped,
            lang: flags.lang.clone(),
        };
        let lock = self.lock_for(&external_lock_key(&path));
        let _guard = lock.lock();

        if let Some(cached) = self.external.get(&key) {
            if cached.is_parsed_from(&content) {
                return Ok(Arc::clone(cached.value()));
            }
        }

        tracing::debug!(target: TARGET, "reading external {} block from {}", kind, path);
        let descriptor = Arc::new(SfcDescriptor::single_block(
            &path,
            content,
            kind,
            flags.lang.clone(),
            flags.scoped,
        ));
        self.external.insert(key, Arc::clone(&descriptor));
        Ok(descriptor)
    }

    /// Remove the entry for `filename`. Idempotent.
    pub fn invalidate(&self, filename: &str) {
        let filename = normalize_path(filename);
        if self.entries.remove(&filename).is_some() {
            tracing::debug!(target: TARGET, "invalidated {}", filename);
        }
        self.prune_lock(&filename);
    }

    /// Remove every pseudo-descriptor read from `referenced`. Idempotent.
    pub fn invalidate_external(&self, referenced: &str) {
        let path = normalize_path(referenced);
        self.external.retain(|key, _| key.path != path);
        self.prune_lock(&external_lock_key(&path));
    }

    /// Drop all state. Called when a build session starts.
    ///
    /// Locks still held by a running request are kept.
    pub fn clear(&self) {
        self.entries.clear();
        self.external.clear();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Number of cached components.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no component is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of cached pseudo-descriptors.
    pub fn external_len(&self) -> usize {
        self.external.len()
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.get(key) {
            return Arc::clone(lock.value());
        }
        Arc::clone(self.locks.entry(key.to_string()).or_default().value())
    }

    /// Drop the lock for `key` unless someone holds a handle to it.
    fn prune_lock(&self, key: &str) {
        self.locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    fn lookup(&self, filename: &str, source: &str, fingerprint: u64) -> Option<Arc<SfcDescriptor>> {
        let entry = self.entries.get(filename)?;
        (entry.fingerprint == fingerprint && entry.descriptor.is_parsed_from(source))
            .then(|| Arc::clone(&entry.descriptor))
    }

    fn store(&self, filename: String, entry: CacheEntry) {
        match self.entries.entry(filename) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().revision > entry.revision {
                    tracing::debug!(
                        target: TARGET,
                        "discarding stale parse of {} (revision {} < {})",
                        occupied.key(),
                        entry.revision.0,
                        occupied.get().revision.0
                    );
                } else {
                    occupied.insert(entry);
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
        }
    }
}

fn external_lock_key(path: &str) -> String {
    format!("\0external:{}", path)
}

fn fingerprint(options: &ParseOptions) -> u64 {
    let mut hasher = FxHasher::default();
    options.hash(&mut hasher);
    hasher.finish()
}

fn parse<C: SfcCompiler + ?Sized>(
    compiler: &C,
    filename: &str,
    source: &str,
    options: &ParseOptions,
) -> Result<SfcDescriptor> {
    tracing::debug!(target: TARGET, "parsing {}", filename);
    let mut descriptor =
        compiler
            .parse(source, filename, options)
            .map_err(|error| ChevaletError::Parse {
                filename: filename.to_string(),
                error,
            })?;
    descriptor.filename = filename.to_string();
    if !descriptor.is_parsed_from(source) {
        descriptor.source = source.to_string();
    }
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFileSystem;
    use crate::test_utils::FixtureCompiler;

    const APP: &str = "<script>let x = 1</script>\n<template><div>{{ x }}</div></template>\n";

    #[test]
    fn test_get_never_parses() {
        let cache = DescriptorCache::new();
        assert!(cache.get("/src/App.vue").is_none());
    }

    #[test]
    fn test_get_or_parse_is_idempotent() {
        let compiler = FixtureCompiler::new();
        let cache = DescriptorCache::new();
        let options = ParseOptions::default();

        let first = cache.get_or_parse(&compiler, "/src/App.vue", APP, &options).unwrap();
        let second = cache.get_or_parse(&compiler, "/src/App.vue", APP, &options).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(compiler.parse_count(), 1);
        assert!(Arc::ptr_eq(&cache.get("/src/App.vue").unwrap(), &first));
    }

    #[test]
    fn test_changed_source_replaces_entry() {
        let compiler = FixtureCompiler::new();
        let cache = DescriptorCache::new();
        let options = ParseOptions::default();

        let first = cache.get_or_parse(&compiler, "/src/App.vue", APP, &options).unwrap();
        let edited = APP.replace("x = 1", "x = 2");
        let second = cache.get_or_parse(&compiler, "/src/App.vue", &edited, &options).unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(compiler.parse_count(), 2);
        assert_eq!(first.script.as_ref().unwrap().content, "let x = 1");
        assert!(cache.get("/src/App.vue").unwrap().is_parsed_from(&edited));
    }

    #[test]
    fn test_changed_parse_options_reparse() {
        let compiler = FixtureCompiler::new();
        let cache = DescriptorCache::new();

        cache
            .get_or_parse(&compiler, "/src/App.vue", APP, &ParseOptions::default())
            .unwrap();
        cache
            .get_or_parse(
                &compiler,
                "/src/App.vue",
                APP,
                &ParseOptions {
                    source_map: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(compiler.parse_count(), 2);
    }

    #[test]
    fn test_filename_is_normalized() {
        let compiler = FixtureCompiler::new();
        let cache = DescriptorCache::new();
        let options = ParseOptions::default();

        cache.get_or_parse(&compiler, "/src/./App.vue", APP, &options).unwrap();
        let descriptor = cache.get("/src/App.vue").unwrap();
        assert_eq!(descriptor.filename, "/src/App.vue");
    }

    #[test]
    fn test_stale_parse_is_discarded() {
        let compiler = FixtureCompiler::new();
        let cache = DescriptorCache::new();
        let options = ParseOptions::default();
        let newer_source = APP.replace("x = 1", "x = 3");

        let older = cache.begin();
        let newer = cache.begin();
        cache
            .get_or_parse_at(newer, &compiler, "/src/App.vue", &newer_source, &options)
            .unwrap();
        let late = cache
            .get_or_parse_at(older, &compiler, "/src/App.vue", APP, &options)
            .unwrap();

        // The late caller still gets a descriptor for its own source...
        assert!(late.is_parsed_from(APP));
        // ...but the cache keeps the newer one.
        assert!(cache.get("/src/App.vue").unwrap().is_parsed_from(&newer_source));
    }

    #[test]
    fn test_parse_failure_is_not_cached() {
        let compiler = FixtureCompiler::new();
        let cache = DescriptorCache::new();
        let result = cache.get_or_parse(
            &compiler,
            "/src/Broken.vue",
            "<template><div>",
            &ParseOptions::default(),
        );

        match result {
            Err(ChevaletError::Parse { filename, error }) => {
                assert_eq!(filename, "/src/Broken.vue");
                assert!(error.loc.is_some());
            }
            other => panic!("expected parse failure, got {:?}", other),
        }
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_prunes_idle_lock() {
        let compiler = FixtureCompiler::new();
        let cache = DescriptorCache::new();
        cache
            .get_or_parse(&compiler, "/src/App.vue", APP, &ParseOptions::default())
            .unwrap();
        assert_eq!(cache.locks.len(), 1);

        cache.invalidate("/src/App.vue");
        assert!(cache.locks.is_empty());
    }

    #[test]
    fn test_clear_keeps_held_lock() {
        let cache = DescriptorCache::new();
        let held = cache.lock_for("/src/App.vue");
        let _guard = held.lock();
        cache.lock_for("/src/Other.vue");

        cache.clear();
        assert_eq!(cache.locks.len(), 1);
        assert!(Arc::ptr_eq(&held, &cache.lock_for("/src/App.vue")));
    }

    #[test]
    fn test_refresh_sees_previous_and_fresh() {
        let compiler = FixtureCompiler::new();
        let cache = DescriptorCache::new();
        let options = ParseOptions::default();
        cache.get_or_parse(&compiler, "/src/App.vue", APP, &options).unwrap();

        let edited = APP.replace("{{ x }}", "{{ x + 1 }}");
        let (templates, fresh) = cache
            .refresh(&compiler, "/src/App.vue", &edited, &options, |previous, fresh| {
                (
                    previous.and_then(|d| d.template.clone()).map(|t| t.content),
                    fresh.template.clone().map(|t| t.content),
                )
            })
            .unwrap();

        assert_eq!(templates.0.as_deref(), Some("<div>{{ x }}</div>"));
        assert_eq!(templates.1.as_deref(), Some("<div>{{ x + 1 }}</div>"));
        assert!(Arc::ptr_eq(&cache.get("/src/App.vue").unwrap(), &fresh));
    }

    #[test]
    fn test_invalidate_and_clear() {
        let compiler = FixtureCompiler::new();
        let cache = DescriptorCache::new();
        let options = ParseOptions::default();
        cache.get_or_parse(&compiler, "/src/A.vue", APP, &options).unwrap();
        cache.get_or_parse(&compiler, "/src/B.vue", APP, &options).unwrap();

        cache.invalidate("/src/A.vue");
        cache.invalidate("/src/A.vue");
        assert!(cache.get("/src/A.vue").is_none());
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_external_descriptor() {
        let fs = MemoryFileSystem::new();
        fs.write("/src/theme.css", ".theme { color: red }");
        let cache = DescriptorCache::new();
        let flags = RequestFlags {
            scoped: true,
            lang: Some("css".into()),
            src: true,
        };

        let first = cache
            .get_or_parse_external(&fs, "/src/App.vue", "/src/theme.css", BlockKind::Style, &flags)
            .unwrap();
        let second = cache
            .get_or_parse_external(&fs, "/src/App.vue", "/src/theme.css", BlockKind::Style, &flags)
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.styles.len(), 1);
        assert!(first.styles[0].scoped);
        assert_eq!(first.styles[0].content, ".theme { color: red }");
        // Not stored as a component.
        assert!(cache.get("/src/theme.css").is_none());

        cache.invalidate_external("/src/theme.css");
        assert_eq!(cache.external_len(), 0);
    }

    #[test]
    fn test_external_read_failure_names_importer() {
        let fs = MemoryFileSystem::new();
        let cache = DescriptorCache::new();
        let error = cache
            .get_or_parse_external(
                &fs,
                "/src/App.vue",
                "/src/missing.css",
                BlockKind::Style,
                &RequestFlags::default(),
            )
            .unwrap_err();

        match error {
            ChevaletError::ExternalRead { importer, path, .. } => {
                assert_eq!(importer, "/src/App.vue");
                assert_eq!(path, "/src/missing.css");
            }
            other => panic!("expected external read failure, got {:?}", other),
        }
    }

    #[test]
    fn test_concurrent_parse_of_same_source_parses_once() {
        let compiler = Arc::new(FixtureCompiler::new());
        let cache = Arc::new(DescriptorCache::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let compiler = Arc::clone(&compiler);
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    cache
                        .get_or_parse(&*compiler, "/src/App.vue", APP, &ParseOptions::default())
                        .unwrap()
                })
            })
            .collect();

        let descriptors: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(compiler.parse_count(), 1);
        assert!(descriptors.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
