//! C and C++ support.
//!
//! Sources compile one object per translation unit, library modules are then
//! packed into a static archive while executable modules leave their objects
//! for the final link. Backends are probed in preference order, `clang`
//! before `gcc` before `cl`.

use super::{
    archive_objects, compile_objects, compile_with, find_backend, CompileContext,
    LanguagePlugin, PluginCapabilities, ToolchainStatus,
};
use crate::{
    compile::CompileResult,
    config::{BuildProfile, ModuleConfig, ModuleKind},
    error::{ForgeError, Result},
    interface::{symbols, ModuleInterface},
    process::{CancelToken, CommandSpec},
    target::Target,
};
use std::{path::Path, time::Instant};

#[derive(Clone, Debug)]
pub struct CPlugin {
    id: &'static str,
    backends: &'static [&'static str],
    /// Extensions that participate in fingerprinting.
    extensions: &'static [&'static str],
    /// Extensions actually handed to the compiler.
    compile_extensions: &'static [&'static str],
}

impl CPlugin {
    pub fn c() -> Self {
        Self {
            id: "c",
            backends: &["clang", "gcc", "cl"],
            extensions: &["c", "h"],
            compile_extensions: &["c"],
        }
    }

    pub fn cpp() -> Self {
        Self {
            id: "cpp",
            backends: &["clang++", "g++", "cl"],
            extensions: &["cpp", "cc", "cxx", "hpp", "h"],
            compile_extensions: &["cpp", "cc", "cxx"],
        }
    }

    fn compile_inner(
        &self,
        ctx: &CompileContext<'_>,
        cancel: &CancelToken,
    ) -> Result<CompileResult> {
        let start = Instant::now();
        let sources = ctx.sources(self.compile_extensions)?;
        let toolchain = self.validate_toolchain();
        let ToolchainStatus::Available { backend, path } = &toolchain else {
            return Err(ForgeError::Toolchain {
                language: self.id.to_string(),
                tried: toolchain.message(),
            });
        };

        let mut logs = Vec::new();

        let standard = ctx.module.options.standard.clone();
        let cross = ctx.target != Target::host() && backend.starts_with("clang");
        let objects = compile_objects(ctx, cancel, &sources, &mut logs, |source, object| {
            let mut spec = CommandSpec::new(path)
                .timeout(self.timeouts().compile)
                .arg("-c")
                .arg(source.display().to_string())
                .arg("-o")
                .arg(object.display().to_string())
                .arg("-fPIC");
            match ctx.profile {
                BuildProfile::Debug => spec = spec.arg("-g").arg("-O0"),
                BuildProfile::Release => spec = spec.arg("-O2"),
            }
            if let Some(standard) = &standard {
                spec = spec.arg(format!("-std={standard}"));
            }
            for define in ctx.target.defines() {
                spec = spec.arg(format!("-D{define}"));
            }
            if cross {
                spec = spec.arg(format!("--target={}", ctx.target.triple()));
            }
            spec.args(ctx.module.options.flags.iter().cloned())
        })?;

        let artifacts = match ctx.module.kind {
            ModuleKind::Library => vec![archive_objects(ctx, cancel, &objects, &mut logs)?],
            ModuleKind::Executable => objects,
        };

        Ok(CompileResult::success(&ctx.module.name, artifacts, logs, start.elapsed()))
    }
}

impl LanguagePlugin for CPlugin {
    fn capabilities(&self) -> PluginCapabilities {
        PluginCapabilities {
            supports_cross: true,
            supports_interface_extraction: true,
            ..PluginCapabilities::new(self.id, self.extensions)
        }
    }

    fn validate_toolchain(&self) -> ToolchainStatus {
        find_backend(self.backends)
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
        // objects and archives both answer to nm
        let ext = artifact.extension().and_then(|e| e.to_str()).unwrap_or_default();
        if !matches!(ext, "o" | "obj" | "a" | "lib" | "so" | "dylib" | "dll") {
            return Ok(None);
        }
        symbols::extract(artifact, &module.name, "0.0.0", self.id, cancel).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_sets_differ_per_dialect() {
        let c = CPlugin::c().capabilities();
        assert_eq!(c.language_id, "c");
        assert!(c.supports_extension("c"));
        assert!(c.supports_extension("h"));
        assert!(!c.supports_extension("cpp"));

        let cpp = CPlugin::cpp().capabilities();
        assert_eq!(cpp.language_id, "cpp");
        assert!(cpp.supports_extension("cc"));
    }

    #[test]
    fn non_native_artifacts_are_skipped() {
        let module = ModuleConfig {
            name: "m".into(),
            language: "c".into(),
            kind: ModuleKind::Library,
            dependencies: vec![],
            options: Default::default(),
            module_path: "/tmp/m".into(),
            descriptor_path: "/tmp/m/module.json".into(),
        };
        let result = CPlugin::c()
            .extract_interface(&module, Path::new("/tmp/m.dll.config"), &CancelToken::new())
            .unwrap();
        assert!(result.is_none());
    }
}
