//! Rust support.
//!
//! Modules compile with `rustc` into a static archive so the final link can
//! fold Rust code into artifacts of any language. Interface extraction reads
//! the `#[no_mangle] pub extern "C"` declarations, which carry full type
//! information, and falls back to the artifact's symbol table when a module
//! exports nothing that way.

use super::{
    compile_with, find_backend, CompileContext, LanguagePlugin, PluginCapabilities,
    ToolchainStatus,
};
use crate::{
    compile::CompileResult,
    config::{BuildProfile, ModuleConfig},
    error::{ForgeError, Result},
    interface::{symbols, Export, ModuleInterface, Parameter, Signature, Type},
    process::{CancelToken, CommandSpec},
    target::{ArtifactKind, Target},
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Instant,
};

/// Matches a `#[no_mangle] pub extern "C" fn` item with named groups for the
/// function name, parameter list and return type.
static RE_EXTERN_FN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"#\[no_mangle\]\s*pub\s+(?:unsafe\s+)?extern\s+"C"\s+fn\s+(?P<name>\w+)\s*\((?P<params>[^)]*)\)\s*(?:->\s*(?P<ret>[^\{]+))?\{"#,
    )
    .unwrap()
});

#[derive(Clone, Debug, Default)]
pub struct RustPlugin;

impl RustPlugin {
    fn compile_inner(
        &self,
        ctx: &CompileContext<'_>,
        cancel: &CancelToken,
    ) -> Result<CompileResult> {
        let start = Instant::now();
        let sources = ctx.sources(&["rs"])?;
        let toolchain = self.validate_toolchain();
        let Some(rustc) = toolchain.path() else {
            return Err(ForgeError::Toolchain {
                language: "rust".to_string(),
                tried: toolchain.message(),
            });
        };
        let root = crate_root(&sources);
        let artifact = ctx.artifact_path(ArtifactKind::StaticLib);
        let edition = ctx.module.options.edition.clone().unwrap_or_else(|| "2021".to_string());

        let mut spec = CommandSpec::new(rustc)
            .timeout(self.timeouts().compile)
            .arg(root.display().to_string())
            .arg("--crate-name")
            .arg(ctx.module.name.replace('-', "_"))
            .arg("--crate-type")
            .arg("staticlib")
            .arg("--edition")
            .arg(edition)
            .arg("-o")
            .arg(artifact.display().to_string());
        match ctx.profile {
            BuildProfile::Debug => spec = spec.arg("-g"),
            BuildProfile::Release => spec = spec.arg("-O"),
        }
        if ctx.target != Target::host() {
            spec = spec.arg("--target").arg(ctx.target.triple());
        }
        spec = spec.args(ctx.module.options.flags.iter().cloned());

        let mut logs = Vec::new();
        super::run_tool_step(&ctx.module.name, &spec, cancel, &mut logs)?;
        Ok(CompileResult::success(&ctx.module.name, vec![artifact], logs, start.elapsed()))
    }
}

/// The crate root: `lib.rs` if present, else `main.rs`, else the first
/// source in sorted order.
fn crate_root(sources: &[PathBuf]) -> &Path {
    for name in ["lib.rs", "main.rs"] {
        if let Some(root) = sources.iter().find(|p| p.file_name().is_some_and(|f| f == name)) {
            return root;
        }
    }
    &sources[0]
}

/// Parses the typed exports declared in the module's sources.
fn declared_exports(module: &ModuleConfig) -> Vec<Export> {
    let mut exports = Vec::new();
    for source in crate::utils::source_files(&module.source_dir(), &["rs"]) {
        let Ok(content) = fs::read_to_string(&source) else { continue };
        for cap in RE_EXTERN_FN.captures_iter(&content) {
            let name = cap["name"].to_string();
            let parameters = cap["params"]
                .split(',')
                .filter_map(|param| {
                    let (name, ty) = param.split_once(':')?;
                    Some(Parameter::new(
                        name.trim().trim_start_matches("mut ").to_string(),
                        Type::from_rust_declaration(ty),
                    ))
                })
                .collect();
            let return_type = cap
                .name("ret")
                .map(|ret| Type::from_rust_declaration(ret.as_str()))
                .unwrap_or(Type::VOID);
            exports.push(Export::new(
                name,
                Signature { parameters, return_type, ..Default::default() },
            ));
        }
    }
    exports.sort_by(|a, b| a.name.cmp(&b.name));
    exports
}

impl LanguagePlugin for RustPlugin {
    fn capabilities(&self) -> PluginCapabilities {
        PluginCapabilities {
            supports_cross: true,
            supports_interface_extraction: true,
            ..PluginCapabilities::new("rust", &["rs"])
        }
    }

    fn validate_toolchain(&self) -> ToolchainStatus {
        find_backend(&["rustc"])
    }

    fn compile(&self, ctx: &CompileContext<'_>, cancel: &CancelToken) -> CompileResult {
        compile_with(&ctx.module.name, || self.compile_inner(ctx, cancel))
    }

    fn extract_interface(
        &self,
        module: &ModuleConfig,
        artifact: &Path,
        cancel: &CancelToken,
    ) -> Result<Option<ModuleInterface>> {
        let exports = declared_exports(module);
        if !exports.is_empty() {
            return Ok(Some(
                ModuleInterface::new(&module.name, "0.0.0", "rust").with_exports(exports),
            ));
        }
        symbols::extract(artifact, &module.name, "0.0.0", "rust", cancel).map(Some)
    }
}
