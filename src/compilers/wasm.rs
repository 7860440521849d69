//! WebAssembly support.
//!
//! C sources compile through the WASI SDK's clang (honouring the
//! `WASI_SDK_PATH` override), `.wat` text assembles with `wat2wasm`.
//! Library modules archive their objects, executables link to a `.wasm`
//! binary through the clang driver, which delegates to `wasm-ld`.

use super::{
    archive_objects, compile_with, find_backend, run_tool_step, CompileContext, LanguagePlugin,
    PluginCapabilities, ToolchainStatus,
};
use crate::{
    compile::CompileResult,
    config::{BuildProfile, ModuleConfig, ModuleKind},
    error::{ForgeError, Result},
    interface::{symbols, ModuleInterface},
    process::{self, CancelToken, CommandSpec},
    target::{Arch, ArtifactKind, Os, Target, Vendor},
};
use std::{
    path::{Path, PathBuf},
    time::Instant,
};

/// Environment override for WASI SDK discovery.
pub const WASI_SDK_PATH_ENV: &str = "WASI_SDK_PATH";

const WASM_TARGET: Target = Target::new(Arch::Wasm32, Vendor::Unknown, Os::Wasi, None);

#[derive(Clone, Debug, Default)]
pub struct WasmPlugin;

/// The wasm-capable clang: `$WASI_SDK_PATH/bin/clang` when set, the `PATH`
/// clang otherwise.
fn find_wasm_clang() -> Option<PathBuf> {
    if let Ok(sdk) = std::env::var(WASI_SDK_PATH_ENV) {
        let clang = Path::new(&sdk).join("bin").join("clang");
        if clang.is_file() {
            return Some(clang);
        }
    }
    process::find_executable("clang")
}

impl WasmPlugin {
    fn compile_inner(
        &self,
        ctx: &CompileContext<'_>,
        cancel: &CancelToken,
    ) -> Result<CompileResult> {
        let start = Instant::now();
        let Some(clang) = find_wasm_clang() else {
            return Err(ForgeError::Toolchain {
                language: "wasm".to_string(),
                tried: format!("no backend found, tried: ${WASI_SDK_PATH_ENV}/bin/clang, clang"),
            });
        };

        let sources = ctx.sources(&["c", "wat"])?;
        let mut logs = Vec::new();
        let mut objects = Vec::new();
        for source in &sources {
            cancel.check()?;
            let ext = source.extension().and_then(|e| e.to_str()).unwrap_or_default();
            if ext == "wat" {
                let Some(wat2wasm) = process::find_executable("wat2wasm") else {
                    return Err(ForgeError::Toolchain {
                        language: "wasm".to_string(),
                        tried: "no backend found for .wat sources, tried: wat2wasm".to_string(),
                    });
                };
                let out = ctx.build_dir.join(format!(
                    "{}.wasm",
                    source.file_stem().unwrap_or_default().to_string_lossy()
                ));
                let spec = CommandSpec::new(wat2wasm)
                    .timeout(self.timeouts().compile)
                    .arg(source.display().to_string())
                    .arg("-o")
                    .arg(out.display().to_string());
                run_tool_step(&ctx.module.name, &spec, cancel, &mut logs)?;
                objects.push(out);
                continue;
            }
            let object = ctx.object_path(source);
            let mut spec = CommandSpec::new(&clang)
                .timeout(self.timeouts().compile)
                .arg("--target=wasm32-wasi")
                .arg("-c")
                .arg(source.display().to_string())
                .arg("-o")
                .arg(object.display().to_string());
            if ctx.profile == BuildProfile::Release {
                spec = spec.arg("-O2");
            }
            for define in WASM_TARGET.defines() {
                spec = spec.arg(format!("-D{define}"));
            }
            spec = spec.args(ctx.module.options.flags.iter().cloned());
            run_tool_step(&ctx.module.name, &spec, cancel, &mut logs)?;
            objects.push(object);
        }

        let artifacts = match ctx.module.kind {
            ModuleKind::Library => vec![archive_objects(ctx, cancel, &objects, &mut logs)?],
            ModuleKind::Executable => {
                let output = ctx.build_dir.join(
                    WASM_TARGET.artifact_file_name(&ctx.module.name, ArtifactKind::Executable),
                );
                let mut spec = CommandSpec::new(&clang)
                    .timeout(self.timeouts().compile)
                    .arg("--target=wasm32-wasi");
                for object in &objects {
                    spec = spec.arg(object.display().to_string());
                }
                spec = spec.arg("-o").arg(output.display().to_string());
                run_tool_step(&ctx.module.name, &spec, cancel, &mut logs)?;
                vec![output]
            }
        };
        Ok(CompileResult::success(&ctx.module.name, artifacts, logs, start.elapsed()))
    }
}

impl LanguagePlugin for WasmPlugin {
    fn capabilities(&self) -> PluginCapabilities {
        PluginCapabilities {
            supports_cross: true,
            supports_interface_extraction: true,
            supported_targets: vec![WASM_TARGET],
            ..PluginCapabilities::new("wasm", &["c", "wat"])
        }
    }

    fn validate_toolchain(&self) -> ToolchainStatus {
        match find_wasm_clang() {
            Some(path) => ToolchainStatus::Available { backend: "clang".to_string(), path },
            None => find_backend(&["clang"]),
        }
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
        // wasm binaries need a wasm-aware nm; plain archives of wasm objects
        // still answer to the llvm tools
        match symbols::extract(artifact, &module.name, "0.0.0", "wasm", cancel) {
            Ok(interface) => Ok(Some(interface)),
            Err(_) => Ok(None),
        }
    }
}
