//! Python support, via ahead-of-time compilers.
//!
//! Cython is preferred over mypyc: `.py`/`.pyx` sources transpile to C in
//! the build directory and then compile with the C backend. The resulting
//! artifacts embed the CPython API, so the final link additionally needs the
//! interpreter's library; the required include flags are probed from
//! `python3-config`. Python modules are interface-less: the exported surface
//! is interpreter state, not C symbols.

use super::{
    archive_objects, compile_with, find_backend, run_tool_step, CompileContext, LanguagePlugin,
    PluginCapabilities, ToolchainStatus,
};
use crate::{
    compile::CompileResult,
    config::{ModuleConfig, ModuleKind},
    error::{ForgeError, Result},
    interface::ModuleInterface,
    process::{self, CancelToken, CommandSpec},
    utils,
};
use std::{path::Path, time::Instant};

#[derive(Clone, Debug, Default)]
pub struct PythonPlugin;

/// Include flags for the CPython headers, empty when `python3-config` is not
/// around.
fn python_include_flags(cancel: &CancelToken) -> Vec<String> {
    let Some(config) = process::find_executable("python3-config") else { return Vec::new() };
    let spec = CommandSpec::new(config)
        .arg("--includes")
        .timeout(process::VERSION_PROBE_TIMEOUT);
    match process::run(&spec, cancel) {
        Ok(output) if output.success() => {
            output.stdout.split_whitespace().map(str::to_string).collect()
        }
        _ => Vec::new(),
    }
}

impl PythonPlugin {
    fn compile_inner(
        &self,
        ctx: &CompileContext<'_>,
        cancel: &CancelToken,
    ) -> Result<CompileResult> {
        let start = Instant::now();
        let sources = ctx.sources(&["py", "pyx"])?;
        let toolchain = self.validate_toolchain();
        let ToolchainStatus::Available { backend, path } = &toolchain else {
            return Err(ForgeError::Toolchain {
                language: "python".to_string(),
                tried: toolchain.message(),
            });
        };
        let mut logs = Vec::new();

        if backend == "mypyc" {
            // mypyc drives its own C compilation and drops extension modules
            // next to the sources
            let mut spec = CommandSpec::new(path)
                .timeout(self.timeouts().compile)
                .current_dir(&ctx.module.module_path);
            for source in &sources {
                spec = spec.arg(source.display().to_string());
            }
            run_tool_step(&ctx.module.name, &spec, cancel, &mut logs)?;
            let artifacts = utils::source_files(&ctx.module.module_path, &["so", "pyd"]);
            if artifacts.is_empty() {
                return Err(ForgeError::msg("mypyc produced no extension modules".to_string()));
            }
            return Ok(CompileResult::success(&ctx.module.name, artifacts, logs, start.elapsed()));
        }

        // cython: transpile each source to C, then compile the C
        let mut c_files = Vec::with_capacity(sources.len());
        for source in &sources {
            cancel.check()?;
            let c_file = ctx.build_dir.join(format!(
                "{}.c",
                source.file_stem().unwrap_or_default().to_string_lossy()
            ));
            let spec = CommandSpec::new(path)
                .timeout(self.timeouts().compile)
                .arg("-3")
                .arg(source.display().to_string())
                .arg("-o")
                .arg(c_file.display().to_string());
            run_tool_step(&ctx.module.name, &spec, cancel, &mut logs)?;
            c_files.push(c_file);
        }

        let cc = find_backend(&["clang", "gcc"]);
        let Some(cc_path) = cc.path() else {
            return Err(ForgeError::Toolchain {
                language: "python".to_string(),
                tried: format!("cython needs a C backend: {}", cc.message()),
            });
        };
        let includes = python_include_flags(cancel);
        let mut objects = Vec::with_capacity(c_files.len());
        for c_file in &c_files {
            cancel.check()?;
            let object = ctx.object_path(c_file);
            let mut spec = CommandSpec::new(cc_path)
                .timeout(self.timeouts().compile)
                .arg("-c")
                .arg(c_file.display().to_string())
                .arg("-o")
                .arg(object.display().to_string())
                .arg("-fPIC");
            spec = spec.args(includes.iter().cloned());
            run_tool_step(&ctx.module.name, &spec, cancel, &mut logs)?;
            objects.push(object);
        }

        let artifacts = match ctx.module.kind {
            ModuleKind::Library => vec![archive_objects(ctx, cancel, &objects, &mut logs)?],
            ModuleKind::Executable => objects,
        };
        Ok(CompileResult::success(&ctx.module.name, artifacts, logs, start.elapsed()))
    }
}

impl LanguagePlugin for PythonPlugin {
    fn capabilities(&self) -> PluginCapabilities {
        PluginCapabilities {
            supports_interface_extraction: false,
            ..PluginCapabilities::new("python", &["py", "pyx"])
        }
    }

    fn validate_toolchain(&self) -> ToolchainStatus {
        find_backend(&["cython", "mypyc"])
    }

    fn compile(&self, ctx: &CompileContext<'_>, cancel: &CancelToken) -> CompileResult {
        compile_with(&ctx.module.name, || self.compile_inner(ctx, cancel))
    }

    fn extract_interface(
        &self,
        _module: &ModuleConfig,
        _artifact: &Path,
        _cancel: &CancelToken,
    ) -> Result<Option<ModuleInterface>> {
        // interface-less: python exports live behind the interpreter
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_modules_are_interface_less() {
        let module = ModuleConfig {
            name: "py".into(),
            language: "python".into(),
            kind: ModuleKind::Library,
            dependencies: vec![],
            options: Default::default(),
            module_path: "/tmp/py".into(),
            descriptor_path: "/tmp/py/module.json".into(),
        };
        let result = PythonPlugin
            .extract_interface(&module, Path::new("/tmp/libpy.a"), &CancelToken::new())
            .unwrap();
        assert!(result.is_none());
        assert!(!PythonPlugin.capabilities().supports_interface_extraction);
    }
}
