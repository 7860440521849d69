//! The language-plugin abstraction and dispatch.
//!
//! A [`LanguagePlugin`] is the per-language strategy the orchestrator drives:
//! it can probe for a working toolchain, compile a module into artifacts,
//! extract the module's FFI interface from a compiled artifact and render
//! glue bindings for a consumer language. Built-in plugins cover the
//! heavyweight languages; everything that fits the "invoke compiler with
//! sources and an output path" pattern is covered declaratively by
//! [`generic::LanguageDefinition`] so the long tail is data, not code.
//!
//! The [`PluginRegistry`] is built once at startup and read-only afterwards;
//! lookup by language id is O(1) and case-insensitive, lookup by file
//! extension scans the plugins.

use crate::{
    compile::CompileResult,
    config::{BuildProfile, ModuleConfig, ValidatedForgeConfig},
    error::{ForgeError, Result},
    glue::GlueCode,
    interface::ModuleInterface,
    process::{self, CancelToken, CommandSpec},
    target::{ArtifactKind, Target},
};
use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

pub mod asm;
pub mod c;
pub mod csharp;
pub mod generic;
pub mod go;
pub mod python;
pub mod rust;
pub mod wasm;

/// What a plugin can do, queried before work is dispatched to it.
#[derive(Clone, Debug)]
pub struct PluginCapabilities {
    pub language_id: String,
    pub supported_extensions: Vec<String>,
    /// Produces native machine code (as opposed to managed/bytecode output).
    pub supports_native: bool,
    /// Can target platforms other than the host.
    pub supports_cross: bool,
    pub supports_interface_extraction: bool,
    pub supports_glue: bool,
    /// Targets the plugin can build for; empty means all.
    pub supported_targets: Vec<Target>,
}

impl PluginCapabilities {
    pub fn new(language_id: impl Into<String>, extensions: &[&str]) -> Self {
        Self {
            language_id: language_id.into(),
            supported_extensions: extensions.iter().map(|s| s.to_string()).collect(),
            supports_native: true,
            supports_cross: false,
            supports_interface_extraction: false,
            supports_glue: true,
            supported_targets: Vec::new(),
        }
    }

    pub fn supports_target(&self, target: &Target) -> bool {
        self.supported_targets.is_empty() || self.supported_targets.contains(target)
    }

    pub fn supports_extension(&self, ext: &str) -> bool {
        self.supported_extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
    }
}

/// Result of probing for a language's backend.
#[derive(Clone, Debug)]
pub enum ToolchainStatus {
    /// The first working backend from the preference list.
    Available { backend: String, path: PathBuf },
    /// No candidate resolved on `PATH`.
    Missing { tried: Vec<String> },
}

impl ToolchainStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available { .. })
    }

    pub fn message(&self) -> String {
        match self {
            Self::Available { backend, path } => {
                format!("{backend} ({})", path.display())
            }
            Self::Missing { tried } => {
                format!("no backend found, tried: {}", tried.join(", "))
            }
        }
    }

    /// The resolved backend path.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Available { path, .. } => Some(path),
            Self::Missing { .. } => None,
        }
    }

    /// Asks the resolved backend for its version.
    pub fn version(&self) -> Option<semver::Version> {
        self.path().and_then(|path| process::probe_version(path).ok())
    }
}

/// Probes `candidates` in preference order and returns the first that
/// resolves on `PATH`.
pub fn find_backend(candidates: &[&str]) -> ToolchainStatus {
    for candidate in candidates {
        if let Some(path) = process::find_executable(candidate) {
            trace!(backend = candidate, path = %path.display(), "resolved toolchain backend");
            return ToolchainStatus::Available { backend: candidate.to_string(), path };
        }
    }
    ToolchainStatus::Missing { tried: candidates.iter().map(|s| s.to_string()).collect() }
}

/// Per-plugin timeout overrides; defaults follow the crate-wide limits.
#[derive(Clone, Copy, Debug)]
pub struct PluginTimeouts {
    pub compile: Duration,
    pub probe: Duration,
    pub symbols: Duration,
}

impl Default for PluginTimeouts {
    fn default() -> Self {
        Self {
            compile: process::COMPILE_TIMEOUT,
            probe: process::VERSION_PROBE_TIMEOUT,
            symbols: process::SYMBOL_QUERY_TIMEOUT,
        }
    }
}

/// Everything a plugin needs to compile one module.
#[derive(Clone, Debug)]
pub struct CompileContext<'a> {
    pub project: &'a ValidatedForgeConfig,
    pub module: &'a ModuleConfig,
    pub target: Target,
    pub profile: BuildProfile,
    /// The module's private build directory, created before dispatch.
    pub build_dir: PathBuf,
}

impl CompileContext<'_> {
    /// Discovers the module's sources by the plugin's extension set, sorted.
    ///
    /// An empty result is the "no source files found" compile failure.
    pub fn sources(&self, extensions: &[&str]) -> Result<Vec<PathBuf>> {
        let files = crate::utils::source_files(&self.module.source_dir(), extensions);
        if files.is_empty() {
            return Err(ForgeError::msg(format!(
                "no source files found in {}; searched extensions: {}",
                self.module.source_dir().display(),
                extensions.join(", ")
            )));
        }
        Ok(files)
    }

    /// The object-file path in the build dir for the given source. Nested
    /// sources keep their relative path in the file name so `a/x.c` and
    /// `b/x.c` cannot collide.
    pub fn object_path(&self, source: &Path) -> PathBuf {
        let source_dir = self.module.source_dir();
        let relative = source.strip_prefix(&source_dir).unwrap_or(source);
        let mut stem = relative.with_extension("").to_string_lossy().into_owned();
        stem = stem.replace(['/', '\\'], "_");
        self.build_dir
            .join(format!("{stem}.{}", self.target.artifact_extension(ArtifactKind::Object)))
    }

    /// The artifact file name for this module and `kind` on the target.
    pub fn artifact_path(&self, kind: ArtifactKind) -> PathBuf {
        self.build_dir.join(self.target.artifact_file_name(&self.module.name, kind))
    }
}

/// The per-language strategy interface.
pub trait LanguagePlugin: Send + Sync {
    fn capabilities(&self) -> PluginCapabilities;

    /// Discovers the first working backend in the plugin's preference order.
    fn validate_toolchain(&self) -> ToolchainStatus;

    /// Compiles the module into its artifacts. Tool failures, timeouts and
    /// missing sources are reported inside the returned [`CompileResult`],
    /// never panicked or silently dropped.
    fn compile(&self, ctx: &CompileContext<'_>, cancel: &CancelToken) -> CompileResult;

    /// Extracts the module's FFI interface from a compiled artifact, from the
    /// most authoritative source the plugin has. Returns `Ok(None)` if this
    /// plugin has no interface story for the artifact.
    fn extract_interface(
        &self,
        module: &ModuleConfig,
        artifact: &Path,
        cancel: &CancelToken,
    ) -> Result<Option<ModuleInterface>>;

    /// Renders FFI binding source of `interface` for `target_language`.
    fn generate_glue(&self, interface: &ModuleInterface, target_language: &str) -> Result<GlueCode> {
        crate::glue::generate(interface, target_language)
    }

    fn timeouts(&self) -> PluginTimeouts {
        PluginTimeouts::default()
    }
}

/// Runs `f` and folds any error into a failed [`CompileResult`], preserving
/// the failure-policy messages plugins produce.
pub(crate) fn compile_with(
    module: &str,
    f: impl FnOnce() -> Result<CompileResult>,
) -> CompileResult {
    let start = Instant::now();
    match f() {
        Ok(result) => result,
        Err(ForgeError::Cancelled) => CompileResult::failure(
            module,
            "compile cancelled",
            Vec::new(),
            start.elapsed(),
        ),
        Err(err) => CompileResult::failure(module, err.to_string(), Vec::new(), start.elapsed()),
    }
}

/// Runs one external compile step, appending its output to `logs` and
/// mapping failure, timeout and cancellation to the right errors.
pub(crate) fn run_tool_step(
    module: &str,
    spec: &CommandSpec,
    cancel: &CancelToken,
    logs: &mut Vec<String>,
) -> Result<()> {
    let output = process::run(spec, cancel)?;
    if !output.stdout.trim().is_empty() {
        logs.push(output.stdout.clone());
    }
    if output.cancelled() {
        return Err(ForgeError::Cancelled);
    }
    if !output.success() {
        logs.push(output.stderr.clone());
        return Err(ForgeError::Compile {
            module: module.to_string(),
            command: spec.display_line(),
            exit_code: output.exit_code,
            stderr: output.stderr,
        });
    }
    Ok(())
}

/// Compiles every source to an object file via `build_cmd`, honouring
/// cancellation between invocations.
pub(crate) fn compile_objects(
    ctx: &CompileContext<'_>,
    cancel: &CancelToken,
    sources: &[PathBuf],
    logs: &mut Vec<String>,
    build_cmd: impl Fn(&Path, &Path) -> CommandSpec,
) -> Result<Vec<PathBuf>> {
    let mut objects = Vec::with_capacity(sources.len());
    for source in sources {
        cancel.check()?;
        let object = ctx.object_path(source);
        let spec = build_cmd(source, &object);
        run_tool_step(&ctx.module.name, &spec, cancel, logs)?;
        objects.push(object);
    }
    Ok(objects)
}

/// Packs object files into a static archive with `ar`.
pub(crate) fn archive_objects(
    ctx: &CompileContext<'_>,
    cancel: &CancelToken,
    objects: &[PathBuf],
    logs: &mut Vec<String>,
) -> Result<PathBuf> {
    let archive = ctx.artifact_path(ArtifactKind::StaticLib);
    let ar = find_backend(&["ar", "llvm-ar"]);
    let Some(path) = ar.path() else {
        return Err(ForgeError::msg(format!("cannot archive objects: {}", ar.message())));
    };
    let mut spec = CommandSpec::new(path).arg("rcs").arg(archive.display().to_string());
    for object in objects {
        spec = spec.arg(object.display().to_string());
    }
    run_tool_step(&ctx.module.name, &spec, cancel, logs)?;
    Ok(archive)
}

/// Registry of all language plugins, frozen after startup.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn LanguagePlugin>>,
    by_id: HashMap<String, usize>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry").field("languages", &self.known_ids()).finish()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry with every built-in plugin plus the declarative
    /// definitions of the long-tail languages.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let builtin: Vec<Arc<dyn LanguagePlugin>> = vec![
            Arc::new(c::CPlugin::c()),
            Arc::new(c::CPlugin::cpp()),
            Arc::new(rust::RustPlugin::default()),
            Arc::new(go::GoPlugin::default()),
            Arc::new(csharp::CsharpPlugin::default()),
            Arc::new(asm::AsmPlugin::default()),
            Arc::new(wasm::WasmPlugin::default()),
            Arc::new(python::PythonPlugin::default()),
        ];
        for plugin in builtin {
            registry.register(plugin).expect("built-in plugin ids are unique");
        }
        for definition in generic::builtin_definitions() {
            registry
                .register(Arc::new(generic::GenericPlugin::new(definition)))
                .expect("built-in definition ids are unique");
        }
        registry
    }

    /// Registers a plugin; rejects duplicate language ids.
    pub fn register(&mut self, plugin: Arc<dyn LanguagePlugin>) -> Result<()> {
        let id = plugin.capabilities().language_id.to_lowercase();
        if self.by_id.contains_key(&id) {
            return Err(ForgeError::Config(format!("language `{id}` is already registered")));
        }
        self.by_id.insert(id, self.plugins.len());
        self.plugins.push(plugin);
        Ok(())
    }

    /// Looks a plugin up by language id, case-insensitive.
    pub fn get(&self, language: &str) -> Option<&Arc<dyn LanguagePlugin>> {
        self.by_id.get(&language.to_lowercase()).map(|&idx| &self.plugins[idx])
    }

    /// Looks a plugin up by file extension; linear over the plugins.
    pub fn by_extension(&self, ext: &str) -> Option<&Arc<dyn LanguagePlugin>> {
        let ext = ext.trim_start_matches('.');
        self.plugins.iter().find(|p| p.capabilities().supports_extension(ext))
    }

    pub fn known_ids(&self) -> HashSet<String> {
        self.by_id.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn LanguagePlugin>> {
        self.plugins.iter()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Probes every registered plugin's toolchain and reports what resolved,
    /// including the backend version where the tool answers a probe.
    pub fn toolchain_report(&self) -> Vec<ToolchainReportEntry> {
        let mut entries: Vec<ToolchainReportEntry> = self
            .plugins
            .iter()
            .map(|plugin| {
                let status = plugin.validate_toolchain();
                let version = status.version();
                ToolchainReportEntry {
                    language: plugin.capabilities().language_id,
                    status,
                    version,
                }
            })
            .collect();
        entries.sort_by(|a, b| a.language.cmp(&b.language));
        entries
    }
}

/// One row of [`PluginRegistry::toolchain_report`].
#[derive(Clone, Debug)]
pub struct ToolchainReportEntry {
    pub language: String,
    pub status: ToolchainStatus,
    pub version: Option<semver::Version>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_covers_the_builtin_languages() {
        let registry = PluginRegistry::with_defaults();
        for language in ["c", "cpp", "rust", "go", "csharp", "asm", "wasm", "python"] {
            assert!(registry.get(language).is_some(), "missing plugin for {language}");
        }
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = PluginRegistry::with_defaults();
        assert!(registry.get("Rust").is_some());
        assert!(registry.get("CSHARP").is_some());
    }

    #[test]
    fn lookup_by_extension() {
        let registry = PluginRegistry::with_defaults();
        assert_eq!(registry.by_extension("rs").unwrap().capabilities().language_id, "rust");
        assert_eq!(registry.by_extension(".go").unwrap().capabilities().language_id, "go");
        assert!(registry.by_extension("xyz").is_none());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = PluginRegistry::with_defaults();
        let err = registry.register(Arc::new(c::CPlugin::c())).unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }
}
