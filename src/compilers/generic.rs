//! The data-driven plugin for the long tail of languages.
//!
//! Any toolchain that fits the "invoke compiler with sources and an output
//! path" pattern is described by a [`LanguageDefinition`] instead of a
//! hand-written plugin: candidate backends in preference order plus argv
//! templates with `$SOURCES`/`$OUTPUT` placeholders. The built-in definition
//! set covers zig, d, fortran and swift.

use super::{
    compile_with, find_backend, run_tool_step, CompileContext, LanguagePlugin,
    PluginCapabilities, ToolchainStatus,
};
use crate::{
    compile::CompileResult,
    config::{ModuleConfig, ModuleKind},
    error::{ForgeError, Result},
    interface::{symbols, ModuleInterface},
    process::{CancelToken, CommandSpec},
    target::ArtifactKind,
};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Instant,
};

/// Placeholder expanded to every discovered source path.
pub const SOURCES_TOKEN: &str = "$SOURCES";
/// Placeholder expanded to the artifact output path.
pub const OUTPUT_TOKEN: &str = "$OUTPUT";

/// A declarative description of a compiled language.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LanguageDefinition {
    pub id: String,
    pub extensions: Vec<String>,
    /// Candidate backends in preference order.
    pub toolchains: Vec<String>,
    /// argv template for library modules.
    pub library_args: Vec<String>,
    /// argv template for executable modules.
    pub executable_args: Vec<String>,
    /// What a library module compiles into.
    pub library_kind: ArtifactKind,
}

/// The built-in long-tail definitions.
pub fn builtin_definitions() -> Vec<LanguageDefinition> {
    vec![
        LanguageDefinition {
            id: "zig".to_string(),
            extensions: vec!["zig".to_string()],
            toolchains: vec!["zig".to_string()],
            library_args: str_args(&["build-lib", SOURCES_TOKEN, "-femit-bin=$OUTPUT"]),
            executable_args: str_args(&["build-exe", SOURCES_TOKEN, "-femit-bin=$OUTPUT"]),
            library_kind: ArtifactKind::StaticLib,
        },
        LanguageDefinition {
            id: "d".to_string(),
            extensions: vec!["d".to_string()],
            toolchains: vec!["ldc2".to_string(), "dmd".to_string()],
            library_args: str_args(&["-lib", SOURCES_TOKEN, "-of=$OUTPUT"]),
            executable_args: str_args(&[SOURCES_TOKEN, "-of=$OUTPUT"]),
            library_kind: ArtifactKind::StaticLib,
        },
        LanguageDefinition {
            id: "fortran".to_string(),
            extensions: vec!["f90".to_string(), "f95".to_string(), "f03".to_string(), "f".to_string()],
            toolchains: vec!["gfortran".to_string(), "flang".to_string()],
            library_args: str_args(&["-shared", "-fPIC", SOURCES_TOKEN, "-o", OUTPUT_TOKEN]),
            executable_args: str_args(&[SOURCES_TOKEN, "-o", OUTPUT_TOKEN]),
            library_kind: ArtifactKind::SharedLib,
        },
        LanguageDefinition {
            id: "swift".to_string(),
            extensions: vec!["swift".to_string()],
            toolchains: vec!["swiftc".to_string()],
            library_args: str_args(&["-emit-library", SOURCES_TOKEN, "-o", OUTPUT_TOKEN]),
            executable_args: str_args(&[SOURCES_TOKEN, "-o", OUTPUT_TOKEN]),
            library_kind: ArtifactKind::SharedLib,
        },
    ]
}

fn str_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// A plugin entirely driven by a [`LanguageDefinition`].
#[derive(Clone, Debug)]
pub struct GenericPlugin {
    definition: LanguageDefinition,
}

impl GenericPlugin {
    pub fn new(definition: LanguageDefinition) -> Self {
        Self { definition }
    }

    pub fn definition(&self) -> &LanguageDefinition {
        &self.definition
    }

    fn compile_inner(
        &self,
        ctx: &CompileContext<'_>,
        cancel: &CancelToken,
    ) -> Result<CompileResult> {
        let start = Instant::now();
        let extensions: Vec<&str> =
            self.definition.extensions.iter().map(String::as_str).collect();
        let sources = ctx.sources(&extensions)?;
        let toolchain = self.validate_toolchain();
        let Some(backend) = toolchain.path() else {
            return Err(ForgeError::Toolchain {
                language: self.definition.id.clone(),
                tried: toolchain.message(),
            });
        };

        let (template, artifact) = match ctx.module.kind {
            ModuleKind::Library => {
                (&self.definition.library_args, ctx.artifact_path(self.definition.library_kind))
            }
            ModuleKind::Executable => {
                (&self.definition.executable_args, ctx.artifact_path(ArtifactKind::Executable))
            }
        };

        let mut spec = CommandSpec::new(backend).timeout(self.timeouts().compile);
        for token in template {
            spec = expand_token(spec, token, &sources, &artifact);
        }
        spec = spec.args(ctx.module.options.flags.iter().cloned());

        let mut logs = Vec::new();
        run_tool_step(&ctx.module.name, &spec, cancel, &mut logs)?;
        Ok(CompileResult::success(&ctx.module.name, vec![artifact], logs, start.elapsed()))
    }
}

fn expand_token(
    spec: CommandSpec,
    token: &str,
    sources: &[PathBuf],
    artifact: &Path,
) -> CommandSpec {
    if token == SOURCES_TOKEN {
        return sources.iter().fold(spec, |spec, s| spec.arg(s.display().to_string()));
    }
    spec.arg(token.replace(OUTPUT_TOKEN, &artifact.display().to_string()))
}

impl LanguagePlugin for GenericPlugin {
    fn capabilities(&self) -> PluginCapabilities {
        let extensions: Vec<&str> =
            self.definition.extensions.iter().map(String::as_str).collect();
        PluginCapabilities {
            supports_interface_extraction: true,
            ..PluginCapabilities::new(self.definition.id.clone(), &extensions)
        }
    }

    fn validate_toolchain(&self) -> ToolchainStatus {
        let candidates: Vec<&str> =
            self.definition.toolchains.iter().map(String::as_str).collect();
        find_backend(&candidates)
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
        // best effort: native outputs answer to nm, anything else is
        // documented interface-less
        match symbols::extract(artifact, &module.name, "0.0.0", &self.definition.id, cancel) {
            Ok(interface) => Ok(Some(interface)),
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn builtin_definitions_are_well_formed() {
        for definition in builtin_definitions() {
            assert!(!definition.id.is_empty());
            assert!(!definition.extensions.is_empty());
            assert!(!definition.toolchains.is_empty());
            assert!(
                definition.library_args.iter().any(|t| t.contains("$OUTPUT")),
                "{} library template never names the output",
                definition.id
            );
        }
    }

    #[test]
    fn token_expansion() {
        let sources = vec![PathBuf::from("/m/a.zig"), PathBuf::from("/m/b.zig")];
        let artifact = PathBuf::from("/build/libm.a");
        let mut spec = CommandSpec::new("zig");
        for token in ["build-lib", SOURCES_TOKEN, "-femit-bin=$OUTPUT"] {
            spec = expand_token(spec, token, &sources, &artifact);
        }
        assert_eq!(
            spec.args,
            vec!["build-lib", "/m/a.zig", "/m/b.zig", "-femit-bin=/build/libm.a"]
        );
    }

    #[test]
    fn definitions_roundtrip_through_serde() {
        let definition = builtin_definitions().remove(0);
        let json = serde_json::to_string(&definition).unwrap();
        let parsed: LanguageDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, definition);
    }
}
