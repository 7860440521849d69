//! End-to-end builds against temporary projects.
//!
//! The managed-assembly path never touches a native linker, so a stub
//! "csharp" plugin lets the whole pipeline (schedule, cache, interface
//! extraction, glue, final copy-link) run without any host toolchains.

use polyforge::{
    compilers::{
        CompileContext, LanguagePlugin, PluginCapabilities, PluginRegistry, ToolchainStatus,
    },
    error::ForgeError,
    interface::{
        ModuleInterface, Parameter, PrimitiveKind, Signature, Type,
    },
    CancelToken, CompileResult, ModuleConfig, Phase, Project,
};
use std::{
    fs,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

/// A plugin that "compiles" by writing a stub assembly, counting every
/// invocation.
struct StubManagedPlugin {
    compiles: Arc<AtomicUsize>,
}

impl LanguagePlugin for StubManagedPlugin {
    fn capabilities(&self) -> PluginCapabilities {
        PluginCapabilities {
            supports_native: false,
            supports_interface_extraction: true,
            ..PluginCapabilities::new("csharp", &["cs"])
        }
    }

    fn validate_toolchain(&self) -> ToolchainStatus {
        ToolchainStatus::Available { backend: "stub".to_string(), path: "stub".into() }
    }

    fn compile(&self, ctx: &CompileContext<'_>, _cancel: &CancelToken) -> CompileResult {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        match ctx.sources(&["cs"]) {
            Ok(_) => {
                let artifact = ctx.build_dir.join(format!("{}.dll", ctx.module.name));
                fs::write(&artifact, ctx.module.name.as_bytes()).unwrap();
                CompileResult::success(&ctx.module.name, vec![artifact], vec![], Duration::ZERO)
            }
            Err(err) => {
                CompileResult::failure(&ctx.module.name, err.to_string(), vec![], Duration::ZERO)
            }
        }
    }

    fn extract_interface(
        &self,
        module: &ModuleConfig,
        _artifact: &Path,
        _cancel: &CancelToken,
    ) -> Result<Option<ModuleInterface>, ForgeError> {
        Ok(Some(ModuleInterface::new(&module.name, "0.1.0", "csharp").with_exports(vec![
            polyforge::interface::Export::new(
                "add",
                Signature {
                    parameters: vec![
                        Parameter::new("a", Type::Primitive(PrimitiveKind::I32)),
                        Parameter::new("b", Type::Primitive(PrimitiveKind::I32)),
                    ],
                    return_type: Type::Primitive(PrimitiveKind::I32),
                    ..Default::default()
                },
            ),
        ])))
    }
}

struct TestProject {
    root: tempfile::TempDir,
    compiles: Arc<AtomicUsize>,
    registry: Arc<PluginRegistry>,
}

impl TestProject {
    /// Lays out a project whose modules all use the stub plugin.
    fn new(modules: &[(&str, &[&str])]) -> Self {
        let root = tempfile::tempdir().unwrap();
        let names: Vec<String> = modules.iter().map(|(name, _)| format!("\"{name}\"")).collect();
        fs::write(
            root.path().join("forge.json"),
            format!(r#"{{ "name": "p", "modules": [{}] }}"#, names.join(", ")),
        )
        .unwrap();
        for (name, deps) in modules {
            let dir = root.path().join("modules").join(name);
            fs::create_dir_all(dir.join("src")).unwrap();
            let deps: Vec<String> = deps.iter().map(|d| format!("\"{d}\"")).collect();
            fs::write(
                dir.join("module.json"),
                format!(
                    r#"{{ "name": "{name}", "language": "csharp", "dependencies": [{}] }}"#,
                    deps.join(", ")
                ),
            )
            .unwrap();
            fs::write(dir.join("src").join(format!("{name}.cs")), format!("// {name}\n"))
                .unwrap();
        }

        let compiles = Arc::new(AtomicUsize::new(0));
        let mut registry = PluginRegistry::new();
        registry
            .register(Arc::new(StubManagedPlugin { compiles: compiles.clone() }))
            .unwrap();
        Self { root, compiles, registry: Arc::new(registry) }
    }

    fn project(&self) -> Project {
        Project::builder()
            .root(self.root.path())
            .registry(self.registry.clone())
            .build()
            .unwrap()
    }

    fn touch(&self, module: &str, content: &str) {
        let src = self
            .root
            .path()
            .join("modules")
            .join(module)
            .join("src")
            .join(format!("{module}.cs"));
        fs::write(src, content).unwrap();
    }
}

#[test]
fn empty_project_builds_successfully() {
    let root = tempfile::tempdir().unwrap();
    fs::write(root.path().join("forge.json"), r#"{ "name": "p" }"#).unwrap();
    let project = Project::builder().root(root.path()).build().unwrap();
    let output = project.compile().unwrap();
    assert!(output.compiles.is_empty());
    assert!(output.link.is_none());
    // nothing ran, so nothing was cached
    assert!(!project.cache_path().exists());
}

#[test]
fn clean_build_then_cache_hit() {
    let fixture = TestProject::new(&[("core", &[])]);
    let project = fixture.project();

    let output = project.compile().unwrap();
    assert_eq!(fixture.compiles.load(Ordering::SeqCst), 1);
    assert_eq!(output.rebuilt().count(), 1);
    let artifact = output.artifact().unwrap().clone();
    assert!(artifact.ends_with("p.dll"));
    assert!(artifact.is_file());

    // second run, no file changed: served from cache, no compile invoked
    let output = fixture.project().compile().unwrap();
    assert_eq!(fixture.compiles.load(Ordering::SeqCst), 1);
    assert_eq!(output.cached().count(), 1);
    assert_eq!(output.rebuilt().count(), 0);
    assert!(output.artifact().unwrap().is_file());
}

#[test]
fn transitive_invalidation_rebuilds_dependents() {
    let fixture =
        TestProject::new(&[("low", &[]), ("mid", &["low"]), ("high", &["mid"])]);
    fixture.project().compile().unwrap();
    assert_eq!(fixture.compiles.load(Ordering::SeqCst), 3);

    fixture.touch("low", "// low, edited\n");

    // the plan names the exact rebuild reasons
    let plan = fixture.project().plan().unwrap().plan.unwrap();
    let reason = |name: &str| {
        plan.modules.iter().find(|m| m.module == name).unwrap().reason.clone().unwrap()
    };
    assert_eq!(reason("low"), "source changed");
    assert_eq!(reason("mid"), "dependencies changed");
    assert_eq!(reason("high"), "dependencies changed");

    // and the build rebuilds all three
    let output = fixture.project().compile().unwrap();
    assert_eq!(fixture.compiles.load(Ordering::SeqCst), 6);
    assert_eq!(output.rebuilt().count(), 3);
}

#[test]
fn artifact_deletion_heals_by_rebuilding() {
    let fixture = TestProject::new(&[("core", &[])]);
    let project = fixture.project();
    let output = project.compile().unwrap();
    let dll = output.compile_result("core").unwrap().artifacts[0].clone();
    fs::remove_file(&dll).unwrap();

    let plan = fixture.project().plan().unwrap().plan.unwrap();
    let reason = plan.modules[0].reason.clone().unwrap();
    assert!(reason.starts_with("artifact missing: "), "{reason}");

    fixture.project().compile().unwrap();
    assert_eq!(fixture.compiles.load(Ordering::SeqCst), 2);
    assert!(dll.is_file());
}

#[test]
fn cycle_is_detected_before_any_compile() {
    let fixture = TestProject::new(&[("A", &["B"]), ("B", &["C"]), ("C", &["A"])]);
    let err = fixture.project().compile().unwrap_err();
    assert!(err.to_string().contains("A → B → C → A"), "{err}");
    assert_eq!(err.phase(), Phase::DependencyAnalysis);
    assert_eq!(err.exit_code(), 2);
    assert_eq!(fixture.compiles.load(Ordering::SeqCst), 0);
}

#[test]
fn missing_dependency_names_both_parties() {
    let fixture = TestProject::new(&[("a", &["z"])]);
    let err = fixture.project().compile().unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("`a`") && msg.contains("`z`"), "{msg}");
    assert_eq!(fixture.compiles.load(Ordering::SeqCst), 0);
}

#[test]
fn module_without_sources_fails_with_searched_extensions() {
    let fixture = TestProject::new(&[("core", &[])]);
    let src = fixture.root.path().join("modules/core/src/core.cs");
    fs::remove_file(src).unwrap();

    let err = fixture.project().compile().unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("`core`"), "{msg}");
    assert!(msg.contains("no source files found"), "{msg}");
    assert!(msg.contains("cs"), "{msg}");
    assert_eq!(err.exit_code(), Phase::Compilation.id());
}

#[test]
fn managed_only_output_is_copied_with_manifests() {
    let fixture = TestProject::new(&[("managed", &[])]);
    let project = fixture.project();
    // drop runtime manifests next to the future assembly
    let build_dir = project.config.module_build_dir("managed");
    fs::create_dir_all(&build_dir).unwrap();
    fs::write(build_dir.join("managed.deps.json"), "{}").unwrap();
    fs::write(build_dir.join("managed.runtimeconfig.json"), "{}").unwrap();

    let output = project.compile().unwrap();
    let link = output.link.unwrap();
    assert!(link.success);
    assert_eq!(link.output, project.config.output_dir.join("p.dll"));
    assert!(project.config.output_dir.join("p.deps.json").is_file());
    assert!(project.config.output_dir.join("p.runtimeconfig.json").is_file());
}

#[test]
fn glue_is_rendered_per_dependency_edge() {
    let fixture = TestProject::new(&[("low", &[]), ("high", &["low"])]);
    let project = fixture.project();
    project.compile().unwrap();

    // producer `low`, consumer `high` in the consumer's language
    let glue = project.config.glue_dir().join("low_to_high.cs");
    assert!(glue.is_file(), "missing {}", glue.display());
    let content = fs::read_to_string(&glue).unwrap();
    assert!(content.contains("public static extern int add(int a, int b);"), "{content}");
    assert!(content.contains("Auto-generated"), "{content}");

    // the producer's interface description is written next to its artifacts
    let interface = project.config.module_build_dir("low").join("low.interface.json");
    assert!(interface.is_file());
    let parsed = ModuleInterface::read(&interface).unwrap();
    assert_eq!(parsed.module.name, "low");
    assert_eq!(parsed.export("add").unwrap().signature.parameters.len(), 2);
}

#[test]
fn targeted_build_restricts_to_transitive_dependencies() {
    let fixture =
        TestProject::new(&[("low", &[]), ("mid", &["low"]), ("high", &["mid"]), ("side", &[])]);
    let project = Project::builder()
        .root(fixture.root.path())
        .registry(fixture.registry.clone())
        .only("mid")
        .build()
        .unwrap();
    project.compile().unwrap();
    // only `low` and `mid` were built
    assert_eq!(fixture.compiles.load(Ordering::SeqCst), 2);

    // a later full plan sees them cached and the rest missing
    let plan = fixture.project().plan().unwrap().plan.unwrap();
    let by_name = |name: &str| plan.modules.iter().find(|m| m.module == name).unwrap();
    assert!(by_name("low").cached);
    assert!(by_name("mid").cached);
    assert_eq!(by_name("high").reason.as_deref(), Some("no cache entry"));
    assert_eq!(by_name("side").reason.as_deref(), Some("no cache entry"));
}

#[test]
fn cancellation_aborts_with_negative_exit_code() {
    let fixture = TestProject::new(&[("core", &[])]);
    let project = fixture.project();
    project.cancel_token().cancel();
    let err = project.compile().unwrap_err();
    assert!(matches!(err, ForgeError::Cancelled));
    assert_eq!(err.exit_code(), -2);
    assert_eq!(fixture.compiles.load(Ordering::SeqCst), 0);
}

#[test]
fn dry_run_returns_a_readable_plan_and_compiles_nothing() {
    let fixture = TestProject::new(&[("low", &[]), ("high", &["low"])]);
    let project = Project::builder()
        .root(fixture.root.path())
        .registry(fixture.registry.clone())
        .dry_run()
        .build()
        .unwrap();
    let output = project.compile().unwrap();
    assert!(output.is_dry_run());
    assert_eq!(fixture.compiles.load(Ordering::SeqCst), 0);

    let plan = output.plan.unwrap();
    assert_eq!(plan.schedule, vec![vec!["low".to_string()], vec!["high".to_string()]]);
    assert_eq!(plan.rebuild_count(), 2);
    let rendered = plan.to_string();
    assert!(rendered.contains("layer 0"), "{rendered}");
    assert!(rendered.contains("no cache entry"), "{rendered}");
}

#[test]
fn failed_compile_aborts_but_preserves_finished_layers() {
    // `low` compiles fine, `broken` has no sources and fails in layer 1
    let fixture = TestProject::new(&[("low", &[]), ("broken", &["low"])]);
    let src = fixture.root.path().join("modules/broken/src/broken.cs");
    fs::remove_file(src).unwrap();

    let err = fixture.project().compile().unwrap_err();
    assert!(err.to_string().contains("`broken`"), "{err}");

    // low's successful compile survived the abort
    let plan = fixture.project().plan().unwrap().plan.unwrap();
    let low = plan.modules.iter().find(|m| m.module == "low").unwrap();
    assert!(low.cached);
}
