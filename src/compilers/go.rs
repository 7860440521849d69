//! Go support.
//!
//! Library modules build with `-buildmode=c-archive` (or the configured
//! buildmode) so cgo emits a C header next to the archive; that header is
//! the authoritative interface source and is parsed back into typed exports.

use super::{
    compile_with, find_backend, CompileContext, LanguagePlugin, PluginCapabilities,
    ToolchainStatus,
};
use crate::{
    compile::CompileResult,
    config::{ModuleConfig, ModuleKind},
    error::{ForgeError, Result},
    interface::{symbols, Export, ModuleInterface, Parameter, Signature, Type},
    process::{CancelToken, CommandSpec},
    target::{Arch, ArtifactKind, Os, Target},
    utils,
};
use std::{fs, path::Path, time::Instant};

#[derive(Clone, Debug, Default)]
pub struct GoPlugin;

impl GoPlugin {
    fn compile_inner(
        &self,
        ctx: &CompileContext<'_>,
        cancel: &CancelToken,
    ) -> Result<CompileResult> {
        let start = Instant::now();
        // `go build` discovers its own sources, but an empty module is still
        // the standard "no source files" failure
        ctx.sources(&["go"])?;
        let toolchain = self.validate_toolchain();
        let Some(go) = toolchain.path() else {
            return Err(ForgeError::Toolchain {
                language: "go".to_string(),
                tried: toolchain.message(),
            });
        };

        let (artifact, buildmode) = match ctx.module.kind {
            ModuleKind::Library => {
                let mode = ctx
                    .module
                    .options
                    .buildmode
                    .clone()
                    .unwrap_or_else(|| "c-archive".to_string());
                let kind = if mode == "c-shared" {
                    ArtifactKind::SharedLib
                } else {
                    ArtifactKind::StaticLib
                };
                (ctx.artifact_path(kind), Some(mode))
            }
            ModuleKind::Executable => (ctx.artifact_path(ArtifactKind::Executable), None),
        };

        let mut spec = CommandSpec::new(go)
            .timeout(self.timeouts().compile)
            .current_dir(&ctx.module.module_path)
            .arg("build");
        if let Some(mode) = &buildmode {
            spec = spec.arg(format!("-buildmode={mode}"));
        }
        spec = spec
            .arg("-o")
            .arg(artifact.display().to_string())
            .args(ctx.module.options.flags.iter().cloned())
            .env("CGO_ENABLED", "1");
        if ctx.target != Target::host() {
            spec = spec.env("GOOS", goos(ctx.target.os)).env("GOARCH", goarch(ctx.target.arch));
        }
        spec = spec.arg(".");

        let mut logs = Vec::new();
        super::run_tool_step(&ctx.module.name, &spec, cancel, &mut logs)?;

        // cgo writes `<artifact stem>.h` next to the archive
        let mut artifacts = vec![artifact.clone()];
        let header = artifact.with_extension("h");
        if header.is_file() {
            artifacts.push(header);
        }
        Ok(CompileResult::success(&ctx.module.name, artifacts, logs, start.elapsed()))
    }
}

fn goos(os: Os) -> &'static str {
    match os {
        Os::Linux => "linux",
        Os::Macos => "darwin",
        Os::Windows => "windows",
        Os::Wasi => "wasip1",
    }
}

fn goarch(arch: Arch) -> &'static str {
    match arch {
        Arch::X86_64 => "amd64",
        Arch::Aarch64 => "arm64",
        Arch::Wasm32 => "wasm",
    }
}

/// Parses the function prototypes of a cgo-generated header.
fn parse_cgo_header(content: &str) -> Vec<Export> {
    let mut exports: Vec<Export> = utils::RE_C_PROTOTYPE
        .captures_iter(content)
        .map(|cap| {
            let parameters = split_params(&cap["params"]);
            Export::new(
                cap["name"].to_string(),
                Signature {
                    parameters,
                    return_type: Type::from_c_declaration(&cap["ret"]),
                    ..Default::default()
                },
            )
        })
        .collect();
    exports.sort_by(|a, b| a.name.cmp(&b.name));
    exports
}

fn split_params(params: &str) -> Vec<Parameter> {
    let params = params.trim();
    if params.is_empty() || params == "void" {
        return Vec::new();
    }
    params
        .split(',')
        .enumerate()
        .map(|(idx, param)| {
            let param = param.trim();
            // `<type tokens> <name>`, the name is the last identifier unless
            // the declaration is abstract
            match param.rsplit_once(|c: char| c == ' ' || c == '*') {
                Some((ty_prefix, name))
                    if !name.is_empty()
                        && name.chars().all(|c| c.is_alphanumeric() || c == '_') =>
                {
                    let ty = format!(
                        "{}{}",
                        ty_prefix,
                        if param[..param.len() - name.len()].contains('*') { "*" } else { "" }
                    );
                    Parameter::new(name.to_string(), Type::from_c_declaration(ty.trim()))
                }
                _ => Parameter::new(format!("arg{idx}"), Type::from_c_declaration(param)),
            }
        })
        .collect()
}

impl LanguagePlugin for GoPlugin {
    fn capabilities(&self) -> PluginCapabilities {
        PluginCapabilities {
            supports_cross: true,
            supports_interface_extraction: true,
            ..PluginCapabilities::new("go", &["go"])
        }
    }

    fn validate_toolchain(&self) -> ToolchainStatus {
        find_backend(&["go"])
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
        let header = artifact.with_extension("h");
        if header.is_file() {
            let content =
                fs::read_to_string(&header).map_err(|err| ForgeError::io(err, &header))?;
            let exports = parse_cgo_header(&content);
            if !exports.is_empty() {
                return Ok(Some(
                    ModuleInterface::new(&module.name, "0.0.0", "go").with_exports(exports),
                ));
            }
        }
        symbols::extract(artifact, &module.name, "0.0.0", "go", cancel).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_cgo_header_prototypes() {
        let header = r#"
/* Code generated by cmd/cgo; DO NOT EDIT. */

#ifdef __cplusplus
extern "C" {
#endif

extern GoInt Add(GoInt a, GoInt b);
extern int32_t Sum(int32_t x, int32_t y);
extern void Reset();

#ifdef __cplusplus
}
#endif
"#;
        let exports = parse_cgo_header(header);
        let names: Vec<_> = exports.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Add", "Reset", "Sum"]);

        let sum = exports.iter().find(|e| e.name == "Sum").unwrap();
        assert_eq!(sum.signature.parameters.len(), 2);
        assert_eq!(sum.signature.parameters[0].name, "x");
        assert_eq!(sum.signature.parameters[0].ty.c_type(), "int32_t");
        assert_eq!(sum.signature.return_type.c_type(), "int32_t");
    }

    #[test]
    fn goos_goarch_mapping() {
        assert_eq!(goos(Os::Macos), "darwin");
        assert_eq!(goarch(Arch::Aarch64), "arm64");
    }
}
