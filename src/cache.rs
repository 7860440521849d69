//! Support for skipping unchanged modules between builds.
//!
//! The cache file lives at `<project>/.forge/.forge-cache.json` and stores one
//! entry per `(module, profile)` pair. An entry is three SHA-256 fingerprints
//! (sources, descriptor, dependency set) plus the artifact paths the compile
//! produced. A module is considered cached only if all three fingerprints
//! match, every artifact still exists on disk and none of its transitive
//! dependencies were rebuilt in the current run; the last rule is the
//! transitive invalidation that guards against silently stale ABIs.
//!
//! The cache survives failed runs: entries for modules that succeeded are
//! written out before the run aborts.

use crate::{
    config::{BuildProfile, ModuleConfig},
    error::Result,
    utils,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashSet},
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

/// Cache schema version.
const FORMAT_VERSION: &str = "1.0";

/// The file name of the cache file
pub const FORGE_CACHE_FILENAME: &str = ".forge-cache.json";

/// Why a module cannot be served from cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Freshness {
    /// All fingerprints match and every artifact exists.
    Cached,
    /// The module must be rebuilt, with a human-readable reason.
    Rebuild(String),
}

impl Freshness {
    pub fn is_cached(&self) -> bool {
        matches!(self, Freshness::Cached)
    }
}

/// The three content fingerprints of a module.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub source_hash: String,
    pub config_hash: String,
    pub dependencies_hash: String,
}

impl Fingerprint {
    /// Computes the fingerprints for `module`, hashing every file under the
    /// module's source directory whose extension is in `extensions`.
    ///
    /// The source hash covers `(file_bytes ∥ file_path_utf8)` per file in
    /// sorted path order; a module without matching sources yields the hash
    /// of empty input.
    pub fn compute(module: &ModuleConfig, extensions: &[&str]) -> Result<Self> {
        let files = utils::source_files(&module.source_dir(), extensions);
        let mut chunks: Vec<Vec<u8>> = Vec::with_capacity(files.len() * 2);
        for file in &files {
            let bytes = fs::read(file).map_err(|err| crate::error::ForgeError::io(err, file))?;
            chunks.push(bytes);
            chunks.push(file.to_string_lossy().into_owned().into_bytes());
        }
        let source_hash = utils::sha256_chunks_hex(&chunks);

        let descriptor = fs::read(&module.descriptor_path)
            .map_err(|err| crate::error::ForgeError::io(err, &module.descriptor_path))?;
        let config_hash = utils::sha256_hex(descriptor);

        let mut deps = module.dependencies.clone();
        deps.sort();
        let dependencies_hash = if deps.is_empty() {
            utils::sha256_hex("empty")
        } else {
            utils::sha256_hex(deps.join("|"))
        };

        Ok(Self { source_hash, config_hash, dependencies_hash })
    }
}

/// A cache entry for one `(module, profile)` pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub module: String,
    pub profile: BuildProfile,
    pub source_hash: String,
    pub config_hash: String,
    pub dependencies_hash: String,
    pub artifact_paths: Vec<PathBuf>,
    /// Seconds since the unix epoch at the time of the compile.
    pub compiled_at: u64,
}

impl CacheEntry {
    /// Returns the first artifact that no longer exists on disk, if any.
    pub fn missing_artifact(&self) -> Option<&Path> {
        self.artifact_paths.iter().map(PathBuf::as_path).find(|path| !path.exists())
    }

    pub fn all_artifacts_exist(&self) -> bool {
        self.missing_artifact().is_none()
    }
}

/// The on-disk build cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForgeCache {
    pub version: String,
    pub entries: BTreeMap<String, CacheEntry>,
}

impl Default for ForgeCache {
    fn default() -> Self {
        Self { version: FORMAT_VERSION.to_string(), entries: BTreeMap::new() }
    }
}

impl ForgeCache {
    /// The cache key for a `(module, profile)` pair.
    pub fn key(module: &str, profile: BuildProfile) -> String {
        format!("{module}:{profile}")
    }

    /// Reads the cache json file from the given path.
    pub fn read(path: &Path) -> Result<Self> {
        trace!("reading build cache at {}", path.display());
        let cache: ForgeCache = utils::read_json_file(path)?;
        trace!(version = %cache.version, entries = cache.entries.len(), "read cache");
        Ok(cache)
    }

    /// Reads the cache if it exists and parses, otherwise starts empty.
    ///
    /// An unreadable cache is not an error, everything simply rebuilds.
    pub fn read_or_default(path: &Path) -> Self {
        match Self::read(path) {
            Ok(cache) if cache.version == FORMAT_VERSION => cache,
            Ok(cache) => {
                warn!(version = %cache.version, "cache format version mismatch, starting fresh");
                Self::default()
            }
            Err(_) => Self::default(),
        }
    }

    /// Write the cache as json file to the given path
    pub fn write(&self, path: &Path) -> Result<()> {
        trace!(entries = self.entries.len(), "writing cache to {}", path.display());
        utils::create_parent_dir_all(path)?;
        utils::write_json_file(self, path, 64 * 1024)?;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entry(&self, module: &str, profile: BuildProfile) -> Option<&CacheEntry> {
        self.entries.get(&Self::key(module, profile))
    }

    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    /// Records a successful compile.
    pub fn insert(
        &mut self,
        module: &str,
        profile: BuildProfile,
        fingerprint: Fingerprint,
        artifact_paths: Vec<PathBuf>,
    ) {
        let compiled_at =
            SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        self.entries.insert(
            Self::key(module, profile),
            CacheEntry {
                module: module.to_string(),
                profile,
                source_hash: fingerprint.source_hash,
                config_hash: fingerprint.config_hash,
                dependencies_hash: fingerprint.dependencies_hash,
                artifact_paths,
                compiled_at,
            },
        );
    }

    pub fn remove(&mut self, module: &str, profile: BuildProfile) -> Option<CacheEntry> {
        self.entries.remove(&Self::key(module, profile))
    }

    /// Decides whether `module` can be served from cache in the current run.
    ///
    /// `rebuilt` is the set of modules already rebuilt in this run,
    /// `transitive_deps` the module's full dependency closure; any overlap
    /// forces a rebuild regardless of local fingerprints.
    pub fn freshness(
        &self,
        module: &str,
        profile: BuildProfile,
        fingerprint: &Fingerprint,
        transitive_deps: &HashSet<&str>,
        rebuilt: &HashSet<String>,
    ) -> Freshness {
        let Some(entry) = self.entry(module, profile) else {
            return Freshness::Rebuild("no cache entry".to_string());
        };
        if entry.source_hash != fingerprint.source_hash {
            return Freshness::Rebuild("source changed".to_string());
        }
        if entry.config_hash != fingerprint.config_hash {
            return Freshness::Rebuild("config changed".to_string());
        }
        if entry.dependencies_hash != fingerprint.dependencies_hash {
            return Freshness::Rebuild("dependencies changed".to_string());
        }
        if let Some(missing) = entry.missing_artifact() {
            return Freshness::Rebuild(format!("artifact missing: {}", missing.display()));
        }
        if transitive_deps.iter().any(|dep| rebuilt.contains(*dep)) {
            return Freshness::Rebuild("dependencies changed".to_string());
        }
        Freshness::Cached
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LanguageOptions, ModuleKind};
    use pretty_assertions::assert_eq;

    fn fake_module(dir: &Path, name: &str, deps: &[&str]) -> ModuleConfig {
        let module_path = dir.join(name);
        fs::create_dir_all(module_path.join("src")).unwrap();
        fs::write(module_path.join("module.json"), format!("{{ \"name\": \"{name}\" }}"))
            .unwrap();
        ModuleConfig {
            name: name.to_string(),
            language: "c".to_string(),
            kind: ModuleKind::Library,
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            options: LanguageOptions::default(),
            descriptor_path: module_path.join("module.json"),
            module_path,
        }
    }

    #[test]
    fn fingerprint_is_stable_and_tracks_content() {
        let tmp = tempfile::tempdir().unwrap();
        let module = fake_module(tmp.path(), "core", &[]);
        fs::write(module.source_dir().join("a.c"), "int a;").unwrap();

        let first = Fingerprint::compute(&module, &["c"]).unwrap();
        let second = Fingerprint::compute(&module, &["c"]).unwrap();
        assert_eq!(first, second);

        fs::write(module.source_dir().join("a.c"), "int b;").unwrap();
        let third = Fingerprint::compute(&module, &["c"]).unwrap();
        assert_ne!(first.source_hash, third.source_hash);
        assert_eq!(first.config_hash, third.config_hash);
    }

    #[test]
    fn empty_source_dir_hashes_to_empty_input() {
        let tmp = tempfile::tempdir().unwrap();
        let module = fake_module(tmp.path(), "core", &[]);
        let fp = Fingerprint::compute(&module, &["c"]).unwrap();
        assert_eq!(fp.source_hash, utils::sha256_hex([]));
    }

    #[test]
    fn dependency_hash_sorts_names() {
        let tmp = tempfile::tempdir().unwrap();
        let ab = Fingerprint::compute(&fake_module(tmp.path(), "x", &["a", "b"]), &["c"]).unwrap();
        let ba = Fingerprint::compute(&fake_module(tmp.path(), "y", &["b", "a"]), &["c"]).unwrap();
        assert_eq!(ab.dependencies_hash, ba.dependencies_hash);
        let none = Fingerprint::compute(&fake_module(tmp.path(), "z", &[]), &["c"]).unwrap();
        assert_eq!(none.dependencies_hash, utils::sha256_hex("empty"));
    }

    fn fresh_cache(module: &ModuleConfig, fp: &Fingerprint, artifacts: Vec<PathBuf>) -> ForgeCache {
        let mut cache = ForgeCache::default();
        cache.insert(&module.name, BuildProfile::Debug, fp.clone(), artifacts);
        cache
    }

    #[test]
    fn all_reasons_surface() {
        let tmp = tempfile::tempdir().unwrap();
        let module = fake_module(tmp.path(), "core", &[]);
        fs::write(module.source_dir().join("a.c"), "int a;").unwrap();
        let artifact = tmp.path().join("libcore.a");
        fs::write(&artifact, "obj").unwrap();

        let fp = Fingerprint::compute(&module, &["c"]).unwrap();
        let cache = fresh_cache(&module, &fp, vec![artifact.clone()]);
        let no_deps = HashSet::new();
        let none_rebuilt = HashSet::new();

        assert_eq!(
            cache.freshness("core", BuildProfile::Debug, &fp, &no_deps, &none_rebuilt),
            Freshness::Cached
        );
        assert_eq!(
            cache.freshness("other", BuildProfile::Debug, &fp, &no_deps, &none_rebuilt),
            Freshness::Rebuild("no cache entry".to_string())
        );
        // a profile switch reads as a missing entry
        assert_eq!(
            cache.freshness("core", BuildProfile::Release, &fp, &no_deps, &none_rebuilt),
            Freshness::Rebuild("no cache entry".to_string())
        );

        let mut changed = fp.clone();
        changed.source_hash = utils::sha256_hex("different");
        assert_eq!(
            cache.freshness("core", BuildProfile::Debug, &changed, &no_deps, &none_rebuilt),
            Freshness::Rebuild("source changed".to_string())
        );

        let mut changed = fp.clone();
        changed.config_hash = utils::sha256_hex("different");
        assert_eq!(
            cache.freshness("core", BuildProfile::Debug, &changed, &no_deps, &none_rebuilt),
            Freshness::Rebuild("config changed".to_string())
        );

        let mut changed = fp.clone();
        changed.dependencies_hash = utils::sha256_hex("different");
        assert_eq!(
            cache.freshness("core", BuildProfile::Debug, &changed, &no_deps, &none_rebuilt),
            Freshness::Rebuild("dependencies changed".to_string())
        );

        fs::remove_file(&artifact).unwrap();
        let reason = cache.freshness("core", BuildProfile::Debug, &fp, &no_deps, &none_rebuilt);
        match reason {
            Freshness::Rebuild(msg) => {
                assert!(msg.starts_with("artifact missing: "), "{msg}");
                assert!(msg.contains("libcore.a"), "{msg}");
            }
            Freshness::Cached => panic!("expected rebuild"),
        }
    }

    #[test]
    fn rebuilt_transitive_dependency_invalidates() {
        let tmp = tempfile::tempdir().unwrap();
        let module = fake_module(tmp.path(), "high", &["mid"]);
        fs::write(module.source_dir().join("a.c"), "int a;").unwrap();
        let artifact = tmp.path().join("libhigh.a");
        fs::write(&artifact, "obj").unwrap();

        let fp = Fingerprint::compute(&module, &["c"]).unwrap();
        let cache = fresh_cache(&module, &fp, vec![artifact]);

        let transitive = HashSet::from(["mid", "low"]);
        let rebuilt = HashSet::from(["low".to_string()]);
        assert_eq!(
            cache.freshness("high", BuildProfile::Debug, &fp, &transitive, &rebuilt),
            Freshness::Rebuild("dependencies changed".to_string())
        );
        // nothing rebuilt, still cached
        assert_eq!(
            cache.freshness("high", BuildProfile::Debug, &fp, &transitive, &HashSet::new()),
            Freshness::Cached
        );
    }

    #[test]
    fn cache_roundtrips_through_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let module = fake_module(tmp.path(), "core", &[]);
        let fp = Fingerprint::compute(&module, &["c"]).unwrap();
        let mut cache = ForgeCache::default();
        cache.insert("core", BuildProfile::Debug, fp, vec![tmp.path().join("libcore.a")]);

        let path = tmp.path().join(".forge").join(FORGE_CACHE_FILENAME);
        cache.write(&path).unwrap();
        let read = ForgeCache::read(&path).unwrap();
        assert_eq!(read, cache);

        // unknown versions are discarded rather than trusted
        let mut stale = read.clone();
        stale.version = "0.9".to_string();
        stale.write(&path).unwrap();
        assert!(ForgeCache::read_or_default(&path).is_empty());
    }
}
