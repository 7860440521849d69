//! Assembly support.
//!
//! Sources assemble one object each, `nasm` before `yasm` before the system
//! `as`. The object format defaults per target (`elf64`, `macho64`, `win64`)
//! and can be pinned in the module's `asm.format` option.

use super::{
    archive_objects, compile_objects, compile_with, find_backend, CompileContext,
    LanguagePlugin, PluginCapabilities, ToolchainStatus,
};
use crate::{
    compile::CompileResult,
    config::{ModuleConfig, ModuleKind},
    error::{ForgeError, Result},
    interface::{symbols, ModuleInterface},
    process::{CancelToken, CommandSpec},
    target::{Os, Target},
};
use std::{path::Path, time::Instant};

#[derive(Clone, Debug, Default)]
pub struct AsmPlugin;

fn default_format(target: &Target) -> &'static str {
    match target.os {
        Os::Windows => "win64",
        Os::Macos => "macho64",
        Os::Linux | Os::Wasi => "elf64",
    }
}

impl AsmPlugin {
    fn compile_inner(
        &self,
        ctx: &CompileContext<'_>,
        cancel: &CancelToken,
    ) -> Result<CompileResult> {
        let start = Instant::now();
        let sources = ctx.sources(&["asm", "s", "S"])?;
        let toolchain = self.validate_toolchain();
        let ToolchainStatus::Available { backend, path } = &toolchain else {
            return Err(ForgeError::Toolchain {
                language: "asm".to_string(),
                tried: toolchain.message(),
            });
        };
        let format =
            ctx.module.options.format.clone().unwrap_or_else(|| default_format(&ctx.target).to_string());
        let gas = backend == "as";

        let mut logs = Vec::new();
        let objects = compile_objects(ctx, cancel, &sources, &mut logs, |source, object| {
            let spec = CommandSpec::new(path).timeout(self.timeouts().compile);
            let spec = if gas {
                // the system assembler has no format switch, it targets the host
                spec.arg(source.display().to_string()).arg("-o").arg(object.display().to_string())
            } else {
                spec.arg("-f")
                    .arg(&format)
                    .arg(source.display().to_string())
                    .arg("-o")
                    .arg(object.display().to_string())
            };
            spec.args(ctx.module.options.flags.iter().cloned())
        })?;

        let artifacts = match ctx.module.kind {
            ModuleKind::Library => vec![archive_objects(ctx, cancel, &objects, &mut logs)?],
            ModuleKind::Executable => objects,
        };
        Ok(CompileResult::success(&ctx.module.name, artifacts, logs, start.elapsed()))
    }
}

impl LanguagePlugin for AsmPlugin {
    fn capabilities(&self) -> PluginCapabilities {
        PluginCapabilities {
            supports_interface_extraction: true,
            ..PluginCapabilities::new("asm", &["asm", "s", "S"])
        }
    }

    fn validate_toolchain(&self) -> ToolchainStatus {
        find_backend(&["nasm", "yasm", "as"])
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
        symbols::extract(artifact, &module.name, "0.0.0", "asm", cancel).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_format_defaults_follow_the_target() {
        assert_eq!(default_format(&Target::parse("linux-x64").unwrap()), "elf64");
        assert_eq!(default_format(&Target::parse("macos-arm64").unwrap()), "macho64");
        assert_eq!(default_format(&Target::parse("windows-x64").unwrap()), "win64");
    }
}
