//! Final artifact linking.
//!
//! Linker selection is platform-first, availability-second: Windows wants
//! MSVC's `link` and falls back to `lld-link`, macOS drives the Apple
//! toolchain through `clang` with `ld64.lld` as fallback, everything else
//! tries LLD and then the GNU toolchain. Inputs are collected from each
//! module's build directory by language-appropriate extensions.
//!
//! A build whose inputs are all managed assemblies never touches a native
//! linker: the "main" assembly and its siblings (plus any adjacent
//! `.deps.json`/`.runtimeconfig.json`) are copied into the output directory
//! under the final name instead.

use crate::{
    compile::LinkResult,
    config::{ModuleConfig, ValidatedForgeConfig},
    error::{ForgeError, Result},
    process::{self, CancelToken, CommandSpec, LINK_TIMEOUT},
    report,
    target::{ArtifactKind, Os, Target},
    utils,
};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
    time::Instant,
};

/// The linker families the orchestrator can drive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkerFlavor {
    /// MSVC `link.exe`.
    Msvc,
    /// LLD in any of its guises (`ld.lld`, `lld-link`).
    Lld,
    /// Apple's toolchain behind the `clang` driver.
    Apple,
    /// GNU `ld`, or a compiler driver fronting it.
    Gnu,
}

impl fmt::Display for LinkerFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Msvc => "msvc",
            Self::Lld => "lld",
            Self::Apple => "apple",
            Self::Gnu => "gnu",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug)]
pub struct Linker {
    pub flavor: LinkerFlavor,
    pub path: PathBuf,
}

/// Candidate linkers for the target, platform-first.
fn candidates(target: &Target) -> &'static [(&'static str, LinkerFlavor)] {
    match target.os {
        Os::Windows => &[("link", LinkerFlavor::Msvc), ("lld-link", LinkerFlavor::Lld)],
        Os::Macos => &[("clang", LinkerFlavor::Apple), ("ld64.lld", LinkerFlavor::Lld)],
        Os::Wasi => &[("wasm-ld", LinkerFlavor::Lld), ("clang", LinkerFlavor::Gnu)],
        // LLD first, via the clang driver so the platform runtime comes
        // along; raw lld and the GNU toolchain follow
        Os::Linux => &[
            ("clang", LinkerFlavor::Lld),
            ("gcc", LinkerFlavor::Gnu),
            ("cc", LinkerFlavor::Gnu),
            ("ld.lld", LinkerFlavor::Lld),
            ("ld", LinkerFlavor::Gnu),
        ],
    }
}

/// Picks the first available linker for the target.
pub fn select_linker(target: &Target) -> Result<Linker> {
    let candidates = candidates(target);
    for (name, flavor) in candidates {
        if let Some(path) = process::find_executable(name) {
            debug!(linker = name, %flavor, "selected linker");
            return Ok(Linker { flavor: *flavor, path });
        }
    }
    Err(ForgeError::Link(format!(
        "no linker available for {}; tried: {}",
        target.triple(),
        candidates.iter().map(|(name, _)| *name).collect::<Vec<_>>().join(", ")
    )))
}

/// How a collected input participates in the link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LinkInputKind {
    Object,
    StaticLib,
    SharedLib,
    RustLib,
    DotNetAssembly,
}

#[derive(Clone, Debug)]
pub struct LinkInput {
    pub path: PathBuf,
    pub kind: LinkInputKind,
    /// The module whose build directory the input came from.
    pub module: String,
}

/// The extensions-to-kind table for one language.
fn language_inputs(language: &str) -> &'static [(&'static str, LinkInputKind)] {
    match language {
        "rust" => &[
            ("rlib", LinkInputKind::RustLib),
            ("a", LinkInputKind::StaticLib),
            ("so", LinkInputKind::SharedLib),
            ("dylib", LinkInputKind::SharedLib),
        ],
        "csharp" => &[("dll", LinkInputKind::DotNetAssembly)],
        "go" => &[("a", LinkInputKind::StaticLib), ("so", LinkInputKind::SharedLib)],
        // c, cpp, asm, wasm, python and the generic tail leave objects and
        // archives
        _ => &[
            ("o", LinkInputKind::Object),
            ("obj", LinkInputKind::Object),
            ("a", LinkInputKind::StaticLib),
            ("lib", LinkInputKind::StaticLib),
            ("so", LinkInputKind::SharedLib),
            ("dylib", LinkInputKind::SharedLib),
        ],
    }
}

/// Scans each module's build output directory for linkable artifacts.
pub fn collect_inputs<'a>(
    project: &ValidatedForgeConfig,
    modules: impl IntoIterator<Item = &'a ModuleConfig>,
) -> Vec<LinkInput> {
    let mut inputs = Vec::new();
    for module in modules {
        let build_dir = project.module_build_dir(&module.name);
        if !build_dir.is_dir() {
            continue;
        }
        for (ext, kind) in language_inputs(&module.language).iter().copied() {
            for path in utils::source_files(&build_dir, &[ext]) {
                inputs.push(LinkInput { path, kind, module: module.name.clone() });
            }
        }
    }
    inputs.sort_by(|a, b| a.path.cmp(&b.path));
    inputs.dedup_by(|a, b| a.path == b.path);
    inputs
}

/// Links the collected inputs into the final artifact.
pub fn link(
    project: &ValidatedForgeConfig,
    target: &Target,
    inputs: &[LinkInput],
    kind: ArtifactKind,
    main_module: Option<&str>,
    cancel: &CancelToken,
) -> Result<LinkResult> {
    if inputs.is_empty() {
        return Err(ForgeError::Link("no linkable inputs were produced".to_string()));
    }
    if inputs.iter().all(|i| i.kind == LinkInputKind::DotNetAssembly) {
        return copy_managed_output(project, inputs, main_module);
    }

    let start = Instant::now();
    let linker = select_linker(target)?;
    let output = project
        .output_dir
        .join(target.artifact_file_name(&project.artifact_name, kind));
    utils::create_parent_dir_all(&output)?;

    let spec = build_link_command(&linker, target, inputs, &output, kind);
    let result = process::run(&spec, cancel)?;
    if result.cancelled() {
        return Err(ForgeError::Cancelled);
    }
    if !result.success() {
        return Err(ForgeError::Link(format!(
            "`{}` exited with {}\n{}",
            spec.display_line(),
            result.exit_code,
            result.stderr
        )));
    }
    let duration = start.elapsed();
    Ok(LinkResult { success: true, output, logs: split_logs(result.stdout, result.stderr), duration })
}

fn build_link_command(
    linker: &Linker,
    target: &Target,
    inputs: &[LinkInput],
    output: &Path,
    kind: ArtifactKind,
) -> CommandSpec {
    let mut spec = CommandSpec::new(&linker.path).timeout(LINK_TIMEOUT);
    match linker.flavor {
        LinkerFlavor::Msvc => {
            spec = spec.arg("/NOLOGO").arg(format!("/OUT:{}", output.display()));
            if kind == ArtifactKind::SharedLib {
                spec = spec.arg("/DLL");
            }
            for input in inputs {
                spec = spec.arg(input.path.display().to_string());
            }
            for lib in target.link_libraries() {
                spec = spec.arg(format!("{lib}.lib"));
            }
        }
        LinkerFlavor::Apple | LinkerFlavor::Gnu => {
            // compiler drivers; they find the platform runtime themselves
            if kind == ArtifactKind::SharedLib {
                spec = spec.arg(if target.os == Os::Macos { "-dynamiclib" } else { "-shared" });
            }
            for input in inputs {
                spec = spec.arg(input.path.display().to_string());
            }
            spec = spec.arg("-o").arg(output.display().to_string());
            for lib in target.link_libraries() {
                spec = spec.arg(format!("-l{lib}"));
            }
        }
        LinkerFlavor::Lld => {
            let driver = linker
                .path
                .file_stem()
                .map(|stem| stem.to_string_lossy().starts_with("clang"))
                .unwrap_or(false);
            if driver {
                spec = spec.arg("-fuse-ld=lld");
            }
            if kind == ArtifactKind::SharedLib {
                spec = spec.arg("-shared");
            }
            for input in inputs {
                spec = spec.arg(input.path.display().to_string());
            }
            spec = spec.arg("-o").arg(output.display().to_string());
            for lib in target.link_libraries() {
                spec = spec.arg(format!("-l{lib}"));
            }
        }
    }
    spec
}

/// The managed-runtime equivalent of linking: copy the main assembly plus
/// siblings and runtime manifests into the output directory.
fn copy_managed_output(
    project: &ValidatedForgeConfig,
    inputs: &[LinkInput],
    main_module: Option<&str>,
) -> Result<LinkResult> {
    let start = Instant::now();
    let main = pick_main_assembly(inputs, main_module)?;
    let output = project.output_dir.join(format!("{}.dll", project.artifact_name));
    utils::create_parent_dir_all(&output)?;

    let mut logs = Vec::new();
    fs::copy(&main.path, &output).map_err(|err| ForgeError::io(err, &main.path))?;
    logs.push(format!("copied {} -> {}", main.path.display(), output.display()));

    // sibling assemblies keep their own names
    for input in inputs.iter().filter(|i| i.path != main.path) {
        let dest = project.output_dir.join(input.path.file_name().unwrap_or_default());
        fs::copy(&input.path, &dest).map_err(|err| ForgeError::io(err, &input.path))?;
        logs.push(format!("copied {}", input.path.display()));
    }

    // runtime manifests follow the final name
    let stem = main.path.file_stem().unwrap_or_default().to_string_lossy().into_owned();
    for suffix in ["deps.json", "runtimeconfig.json"] {
        let manifest = main.path.with_file_name(format!("{stem}.{suffix}"));
        if manifest.is_file() {
            let dest = project.output_dir.join(format!("{}.{suffix}", project.artifact_name));
            fs::copy(&manifest, &dest).map_err(|err| ForgeError::io(err, &manifest))?;
            logs.push(format!("copied {}", manifest.display()));
        }
    }

    Ok(LinkResult { success: true, output, logs, duration: start.elapsed() })
}

/// Picks the "main" assembly: the one named after `main_module` when given,
/// the sole input otherwise. Ambiguity is surfaced as a warning rather than
/// silently resolved.
fn pick_main_assembly<'a>(
    inputs: &'a [LinkInput],
    main_module: Option<&str>,
) -> Result<&'a LinkInput> {
    if let Some(name) = main_module {
        if let Some(input) = inputs
            .iter()
            .find(|i| i.path.file_stem().is_some_and(|stem| stem.to_string_lossy() == name))
        {
            return Ok(input);
        }
    }
    if inputs.len() > 1 {
        report::warning(&format!(
            "multiple assemblies and no unambiguous main, using {}",
            inputs[0].path.display()
        ));
    }
    inputs.first().ok_or_else(|| ForgeError::Link("no assemblies to copy".to_string()))
}

fn split_logs(stdout: String, stderr: String) -> Vec<String> {
    let mut logs = Vec::new();
    if !stdout.trim().is_empty() {
        logs.push(stdout);
    }
    if !stderr.trim().is_empty() {
        logs.push(stderr);
    }
    logs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LanguageOptions, ModuleKind};
    use pretty_assertions::assert_eq;

    fn project(root: &Path) -> ValidatedForgeConfig {
        ValidatedForgeConfig {
            name: "p".into(),
            version: "0.1.0".into(),
            root: root.to_path_buf(),
            output_dir: root.join("build"),
            artifact_name: "p".into(),
            default_target: Target::host(),
            modules: Vec::new(),
        }
    }

    fn module(name: &str, language: &str) -> ModuleConfig {
        ModuleConfig {
            name: name.into(),
            language: language.into(),
            kind: ModuleKind::Library,
            dependencies: vec![],
            options: LanguageOptions::default(),
            module_path: PathBuf::from("/proj").join(name),
            descriptor_path: PathBuf::from("/proj").join(name).join("module.json"),
        }
    }

    #[test]
    fn inputs_are_classified_per_language() {
        let tmp = tempfile::tempdir().unwrap();
        let project = project(tmp.path());
        for (module, file) in
            [("cmod", "x.o"), ("cmod", "libcmod.a"), ("rustmod", "librustmod.a"), ("managed", "managed.dll")]
        {
            let dir = project.module_build_dir(module);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(file), b"x").unwrap();
        }
        let modules =
            vec![module("cmod", "c"), module("rustmod", "rust"), module("managed", "csharp")];
        let inputs = collect_inputs(&project, modules.iter());

        let kind_of = |name: &str| {
            inputs
                .iter()
                .find(|i| i.path.file_name().unwrap().to_string_lossy() == name)
                .map(|i| i.kind)
        };
        assert_eq!(kind_of("x.o"), Some(LinkInputKind::Object));
        assert_eq!(kind_of("libcmod.a"), Some(LinkInputKind::StaticLib));
        assert_eq!(kind_of("librustmod.a"), Some(LinkInputKind::StaticLib));
        assert_eq!(kind_of("managed.dll"), Some(LinkInputKind::DotNetAssembly));
    }

    #[test]
    fn managed_only_build_copies_instead_of_linking() {
        let tmp = tempfile::tempdir().unwrap();
        let project = project(tmp.path());
        let dir = project.module_build_dir("managed");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("managed.dll"), b"assembly").unwrap();
        fs::write(dir.join("managed.deps.json"), b"{}").unwrap();
        fs::write(dir.join("managed.runtimeconfig.json"), b"{}").unwrap();
        fs::write(dir.join("Helper.dll"), b"helper").unwrap();

        let modules = vec![module("managed", "csharp")];
        let inputs = collect_inputs(&project, modules.iter());
        assert!(inputs.iter().all(|i| i.kind == LinkInputKind::DotNetAssembly));

        let result =
            link(&project, &Target::host(), &inputs, ArtifactKind::Executable, Some("managed"), &CancelToken::new())
                .unwrap();
        assert!(result.success);
        assert_eq!(result.output, project.output_dir.join("p.dll"));
        assert!(result.output.is_file());
        assert!(project.output_dir.join("p.deps.json").is_file());
        assert!(project.output_dir.join("p.runtimeconfig.json").is_file());
        assert!(project.output_dir.join("Helper.dll").is_file());
        assert_eq!(fs::read(&result.output).unwrap(), b"assembly");
    }

    #[test]
    fn empty_inputs_fail_to_link() {
        let tmp = tempfile::tempdir().unwrap();
        let project = project(tmp.path());
        let err = link(&project, &Target::host(), &[], ArtifactKind::Executable, None, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, ForgeError::Link(_)));
    }

    #[test]
    fn linker_candidates_are_platform_first() {
        let windows = candidates(&Target::parse("windows-x64").unwrap());
        assert_eq!(windows[0], ("link", LinkerFlavor::Msvc));
        let macos = candidates(&Target::parse("macos-arm64").unwrap());
        assert_eq!(macos[0], ("clang", LinkerFlavor::Apple));
        let linux = candidates(&Target::parse("linux-x64").unwrap());
        assert_eq!(linux[0], ("clang", LinkerFlavor::Lld));
    }
}
