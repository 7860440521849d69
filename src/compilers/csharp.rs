//! C# support.
//!
//! Modules build with `dotnet build` into managed assemblies. Interface
//! extraction cannot read CLR metadata natively, so it is delegated to an
//! external helper process (`FORGE_CLR_DUMP`, default `forge-clrdump`) that
//! prints interface JSON on stdout; a missing helper is a non-fatal
//! extraction failure and linking proceeds without that edge's glue.

use super::{
    compile_with, find_backend, CompileContext, LanguagePlugin, PluginCapabilities,
    ToolchainStatus,
};
use crate::{
    compile::CompileResult,
    config::{BuildProfile, ModuleConfig},
    error::{ForgeError, Result},
    interface::{InterfaceAbi, InterfaceMode, ModuleInterface},
    process::{self, CancelToken, CommandSpec},
    utils,
};
use std::{path::Path, time::Instant};

/// Environment variable naming the CLR metadata helper.
pub const CLR_DUMP_ENV: &str = "FORGE_CLR_DUMP";
const CLR_DUMP_DEFAULT: &str = "forge-clrdump";

#[derive(Clone, Debug, Default)]
pub struct CsharpPlugin;

impl CsharpPlugin {
    fn compile_inner(
        &self,
        ctx: &CompileContext<'_>,
        cancel: &CancelToken,
    ) -> Result<CompileResult> {
        let start = Instant::now();
        ctx.sources(&["cs"])?;
        let toolchain = self.validate_toolchain();
        let Some(dotnet) = toolchain.path() else {
            return Err(ForgeError::Toolchain {
                language: "csharp".to_string(),
                tried: toolchain.message(),
            });
        };

        let configuration = ctx.module.options.configuration.clone().unwrap_or_else(|| {
            match ctx.profile {
                BuildProfile::Debug => "Debug".to_string(),
                BuildProfile::Release => "Release".to_string(),
            }
        });

        let spec = CommandSpec::new(dotnet)
            .timeout(self.timeouts().compile)
            .current_dir(&ctx.module.module_path)
            .arg("build")
            .arg("--nologo")
            .arg("-c")
            .arg(configuration)
            .arg("-o")
            .arg(ctx.build_dir.display().to_string())
            .args(ctx.module.options.flags.iter().cloned());

        let mut logs = Vec::new();
        super::run_tool_step(&ctx.module.name, &spec, cancel, &mut logs)?;

        // the assemblies plus their runtime manifests are the artifacts
        let mut artifacts = utils::source_files(&ctx.build_dir, &["dll"]);
        artifacts.extend(utils::source_files(&ctx.build_dir, &["json"]).into_iter().filter(
            |p| {
                let name = p.file_name().unwrap_or_default().to_string_lossy();
                name.ends_with(".deps.json") || name.ends_with(".runtimeconfig.json")
            },
        ));
        if artifacts.is_empty() {
            return Err(ForgeError::msg(format!(
                "dotnet build produced no assemblies in {}",
                ctx.build_dir.display()
            )));
        }
        Ok(CompileResult::success(&ctx.module.name, artifacts, logs, start.elapsed()))
    }
}

impl LanguagePlugin for CsharpPlugin {
    fn capabilities(&self) -> PluginCapabilities {
        PluginCapabilities {
            supports_native: false,
            supports_interface_extraction: true,
            ..PluginCapabilities::new("csharp", &["cs", "csproj"])
        }
    }

    fn validate_toolchain(&self) -> ToolchainStatus {
        find_backend(&["dotnet"])
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
        if artifact.extension().and_then(|ext| ext.to_str()) != Some("dll") {
            return Ok(None);
        }
        let helper =
            std::env::var(CLR_DUMP_ENV).unwrap_or_else(|_| CLR_DUMP_DEFAULT.to_string());
        if !process::command_exists(&helper) {
            return Err(ForgeError::Extraction {
                module: module.name.clone(),
                message: format!(
                    "CLR metadata helper `{helper}` not found on PATH (set {CLR_DUMP_ENV} to override)"
                ),
            });
        }
        let spec = CommandSpec::new(&helper)
            .arg(artifact.display().to_string())
            .timeout(self.timeouts().symbols);
        let output = process::run(&spec, cancel)?;
        if !output.success() {
            return Err(ForgeError::Extraction {
                module: module.name.clone(),
                message: format!("`{helper}` exited with {}: {}", output.exit_code, output.stderr),
            });
        }
        let mut interface = ModuleInterface::from_json(&output.stdout).map_err(|err| {
            ForgeError::Extraction { module: module.name.clone(), message: err.to_string() }
        })?;
        interface.language.abi = InterfaceAbi::Clr;
        interface.language.mode = InterfaceMode::Clr;
        Ok(Some(interface))
    }
}
