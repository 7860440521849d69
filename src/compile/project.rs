//! Manages the build of a `Project`.
//!
//! The build is a state machine over [`Phase`]: the module graph is resolved
//! and layered, each layer compiles in parallel against the incremental
//! cache, interfaces are extracted for every module some other module
//! depends on, glue is rendered per dependency edge, and a single link step
//! produces the final artifact.
//!
//! Correctness rules the pipeline enforces:
//! - a module compiles only after every dependency's layer completed;
//! - cache updates for layer N are persisted before layer N+1 starts, so an
//!   aborted run never loses finished work;
//! - a rebuilt dependency invalidates every transitive dependent, even if
//!   that dependent's own inputs are unchanged;
//! - on the first compile failure the in-flight layer finishes, the cache is
//!   saved, and the run aborts naming the offending module;
//! - cancellation drains workers without starting new compiles and still
//!   saves the cache.

use super::{
    output::{BuildOutput, BuildPlan, CompileResult, PlannedModule},
    Phase,
};
use crate::{
    cache::{Fingerprint, ForgeCache, Freshness},
    compilers::{CompileContext, LanguagePlugin},
    config::ModuleConfig,
    error::{ForgeError, Result},
    glue::glue_file_name,
    interface::ModuleInterface,
    link,
    report,
    resolver::{BuildSchedule, ModuleGraph},
    target::ArtifactKind,
    utils, Project,
};
use rayon::prelude::*;
use std::{
    collections::{HashMap, HashSet},
    fs,
    sync::Arc,
    time::Instant,
};

pub struct ProjectCompiler<'a> {
    project: &'a Project,
    graph: ModuleGraph,
    schedule: BuildSchedule,
}

impl<'a> ProjectCompiler<'a> {
    /// Resolves the module graph and the build schedule for the project.
    pub fn new(project: &'a Project) -> Result<Self> {
        report::phase(Phase::Init, &format!("project `{}`", project.config.name), 0, 0);
        report::phase(Phase::DependencyAnalysis, "resolving module graph", 0, 0);

        let mut graph = ModuleGraph::resolve(&project.config.modules)?;
        if let Some(only) = &project.only {
            graph = graph.restrict_to(only)?;
        }
        let schedule = graph.schedule()?;
        debug!(layers = schedule.len(), modules = schedule.module_count(), "layered build schedule");
        Ok(Self { project, graph, schedule })
    }

    pub fn schedule(&self) -> &BuildSchedule {
        &self.schedule
    }

    /// Drives the build to completion.
    pub fn compile(self) -> Result<BuildOutput> {
        let project = self.project;
        let cancel = project.cancel.clone();

        let mut cache = if project.cached {
            ForgeCache::read_or_default(&project.cache_path())
        } else {
            ForgeCache::default()
        };

        // empty module list: nothing to compile, nothing to link
        if self.graph.is_empty() {
            report::phase(Phase::Complete, "no modules", 0, 0);
            return Ok(BuildOutput::default());
        }

        let states = self.assess(&cache)?;

        if project.dry_run {
            let plan = self.plan(&states);
            report::phase(Phase::Complete, "dry run", 0, 0);
            return Ok(BuildOutput { plan: Some(plan), ..Default::default() });
        }

        let compiles = self.compile_layers(&states, &mut cache, &cancel)?;

        let interfaces = self.extract_interfaces(&compiles, &cancel);
        self.generate_glue(&interfaces)?;
        let link = self.link_project(&cancel)?;

        report::phase(Phase::Complete, "build finished", 0, 0);
        Ok(BuildOutput { compiles, link: Some(link), plan: None })
    }

    /// Computes per-module fingerprints and cache freshness, simulating the
    /// rebuilt-set layer by layer so transitive invalidation shows up in the
    /// assessment.
    fn assess(&self, cache: &ForgeCache) -> Result<HashMap<String, ModuleState>> {
        let project = self.project;
        let mut states = HashMap::new();
        let mut rebuilt: HashSet<String> = HashSet::new();

        for (layer_idx, layer) in self.schedule.layers().iter().enumerate() {
            for name in layer {
                let module = self.graph.module(name).expect("scheduled module is in the graph");
                let plugin = self.plugin(module)?;
                let capabilities = plugin.capabilities();
                let extensions: Vec<&str> = capabilities
                    .supported_extensions
                    .iter()
                    .map(String::as_str)
                    .collect();
                let fingerprint = Fingerprint::compute(module, &extensions)?;
                let freshness = if project.cached {
                    let deps = self.graph.transitive_dependencies(name);
                    cache.freshness(name, project.profile, &fingerprint, &deps, &rebuilt)
                } else {
                    Freshness::Rebuild("caching disabled".to_string())
                };
                if !freshness.is_cached() {
                    rebuilt.insert(name.clone());
                }
                states.insert(
                    name.clone(),
                    ModuleState { layer: layer_idx, fingerprint, freshness },
                );
            }
        }
        Ok(states)
    }

    fn plan(&self, states: &HashMap<String, ModuleState>) -> BuildPlan {
        let mut modules: Vec<PlannedModule> = self
            .graph
            .modules()
            .map(|module| {
                let state = &states[&module.name];
                PlannedModule {
                    module: module.name.clone(),
                    language: module.language.clone(),
                    layer: state.layer,
                    cached: state.freshness.is_cached(),
                    reason: match &state.freshness {
                        Freshness::Cached => None,
                        Freshness::Rebuild(reason) => Some(reason.clone()),
                    },
                }
            })
            .collect();
        modules.sort_by(|a, b| (a.layer, &a.module).cmp(&(b.layer, &b.module)));
        BuildPlan::new(&self.schedule, modules)
    }

    /// Runs the layered compilation, updating and persisting the cache after
    /// every layer.
    fn compile_layers(
        &self,
        states: &HashMap<String, ModuleState>,
        cache: &mut ForgeCache,
        cancel: &crate::process::CancelToken,
    ) -> Result<Vec<CompileResult>> {
        let project = self.project;
        let total = self.schedule.module_count();
        let mut compiles = Vec::with_capacity(total);
        let mut done = 0usize;

        for layer in self.schedule.layers() {
            if cancel.is_cancelled() {
                self.persist_cache(cache);
                return Err(ForgeError::Cancelled);
            }
            report::phase(Phase::Compilation, &format!("{} module(s)", layer.len()), done, total);

            let mut to_build: Vec<&ModuleConfig> = Vec::new();
            for name in layer {
                let module = self.graph.module(name).expect("scheduled module is in the graph");
                match &states[name].freshness {
                    Freshness::Cached => {
                        let artifacts = cache
                            .entry(name, project.profile)
                            .map(|entry| entry.artifact_paths.clone())
                            .unwrap_or_default();
                        report::module_cached(name);
                        compiles.push(CompileResult::cached(name, artifacts));
                        done += 1;
                    }
                    Freshness::Rebuild(reason) => {
                        trace!(module = name.as_str(), reason = reason.as_str(), "rebuilding");
                        to_build.push(module);
                    }
                }
            }

            if to_build.is_empty() {
                continue;
            }
            let results = self.compile_layer_parallel(&to_build, cancel)?;
            done += results.len();

            // record successes before reacting to failures so partial
            // progress survives the abort
            for result in &results {
                if result.success {
                    cache.insert(
                        &result.module,
                        project.profile,
                        states[&result.module].fingerprint.clone(),
                        result.artifacts.clone(),
                    );
                }
            }
            self.persist_cache(cache);

            let failed = results.iter().find(|r| !r.success);
            if let Some(failure) = failed {
                if cancel.is_cancelled() {
                    return Err(ForgeError::Cancelled);
                }
                return Err(ForgeError::ModuleFailed {
                    module: failure.module.clone(),
                    message: failure.error.clone().unwrap_or_else(|| "unknown error".to_string()),
                });
            }
            compiles.extend(results);
        }
        self.persist_cache(cache);
        Ok(compiles)
    }

    /// Compiles one layer's modules concurrently, bounded by
    /// `min(layer_size, available_parallelism)`.
    fn compile_layer_parallel(
        &self,
        modules: &[&ModuleConfig],
        cancel: &crate::process::CancelToken,
    ) -> Result<Vec<CompileResult>> {
        let project = self.project;
        let jobs = project.jobs.min(modules.len()).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build()
            .map_err(|err| ForgeError::msg(format!("failed to build worker pool: {err}")))?;

        let results: Vec<CompileResult> = pool.install(|| {
            modules
                .par_iter()
                .map(|module| {
                    if cancel.is_cancelled() {
                        return CompileResult::failure(
                            &module.name,
                            "compile cancelled",
                            Vec::new(),
                            Default::default(),
                        );
                    }
                    self.compile_module(module, cancel)
                })
                .collect()
        });
        Ok(results)
    }

    fn compile_module(
        &self,
        module: &ModuleConfig,
        cancel: &crate::process::CancelToken,
    ) -> CompileResult {
        let project = self.project;
        let plugin = match self.plugin(module) {
            Ok(plugin) => plugin,
            Err(err) => {
                return CompileResult::failure(&module.name, err.to_string(), Vec::new(), Default::default())
            }
        };
        let build_dir = project.config.module_build_dir(&module.name);
        if let Err(err) = fs::create_dir_all(&build_dir) {
            return CompileResult::failure(
                &module.name,
                format!("failed to create {}: {err}", build_dir.display()),
                Vec::new(),
                Default::default(),
            );
        }
        let ctx = CompileContext {
            project: &project.config,
            module,
            target: project.target,
            profile: project.profile,
            build_dir,
        };
        report::module_compile_start(&module.name, &module.language);
        let start = Instant::now();
        let result = plugin.compile(&ctx, cancel);
        report::module_compiled(&module.name, result.success, start.elapsed());
        result
    }

    /// Extracts an interface for every module some other module depends on.
    /// Failures are warnings: linking proceeds without the affected glue.
    fn extract_interfaces(
        &self,
        compiles: &[CompileResult],
        cancel: &crate::process::CancelToken,
    ) -> HashMap<String, ModuleInterface> {
        let producers: Vec<&ModuleConfig> = self
            .graph
            .modules()
            .filter(|m| !self.graph.dependents(&m.name).is_empty())
            .collect();
        let total = producers.len();
        let mut interfaces = HashMap::new();

        for (idx, module) in producers.into_iter().enumerate() {
            report::phase(Phase::InterfaceExtraction, &module.name, idx, total);
            let Ok(plugin) = self.plugin(module) else { continue };
            if !plugin.capabilities().supports_interface_extraction {
                continue;
            }
            let Some(artifact) = compiles
                .iter()
                .find(|c| c.module == module.name)
                .and_then(|c| c.artifacts.first())
            else {
                continue;
            };
            match plugin.extract_interface(module, artifact, cancel) {
                Ok(Some(interface)) => {
                    let path = self
                        .project
                        .config
                        .module_build_dir(&module.name)
                        .join(format!("{}.interface.json", module.name));
                    if let Err(err) = interface.write(&path) {
                        report::warning(&format!(
                            "failed to write interface for `{}`: {err}",
                            module.name
                        ));
                    }
                    interfaces.insert(module.name.clone(), interface);
                }
                Ok(None) => {
                    trace!(module = module.name.as_str(), "module is interface-less");
                }
                Err(err) => report::warning(&err.to_string()),
            }
        }
        interfaces
    }

    /// Renders one glue file per dependency edge whose producer has an
    /// interface.
    fn generate_glue(&self, interfaces: &HashMap<String, ModuleInterface>) -> Result<()> {
        let glue_dir = self.project.config.glue_dir();
        let edges: Vec<(&ModuleConfig, &ModuleConfig)> = self
            .graph
            .modules()
            .flat_map(|consumer| {
                self.graph
                    .dependencies(&consumer.name)
                    .into_iter()
                    .filter_map(|dep| self.graph.module(dep))
                    .map(move |producer| (consumer, producer))
            })
            .collect();
        let total = edges.len();

        for (idx, (consumer, producer)) in edges.into_iter().enumerate() {
            report::phase(
                Phase::GlueGeneration,
                &format!("{} -> {}", producer.name, consumer.name),
                idx,
                total,
            );
            let Some(interface) = interfaces.get(&producer.name) else { continue };
            let Ok(plugin) = self.plugin(producer) else { continue };
            match plugin.generate_glue(interface, &consumer.language) {
                Ok(glue) => {
                    let path = glue_dir.join(glue_file_name(
                        &producer.name,
                        &consumer.name,
                        glue.extension,
                    ));
                    utils::create_parent_dir_all(&path)?;
                    if let Err(err) = fs::write(&path, &glue.content) {
                        report::warning(&format!(
                            "failed to write glue {}: {err}",
                            path.display()
                        ));
                        continue;
                    }
                    report::glue_generated(&producer.name, &consumer.name);
                }
                Err(err) => {
                    // non-fatal: the edge simply has no glue
                    let err = ForgeError::Glue {
                        producer: producer.name.clone(),
                        consumer: consumer.name.clone(),
                        message: err.to_string(),
                    };
                    report::warning(&err.to_string());
                }
            }
        }
        Ok(())
    }

    fn link_project(&self, cancel: &crate::process::CancelToken) -> Result<crate::compile::LinkResult> {
        let project = self.project;
        report::phase(Phase::Linking, "collecting inputs", 0, 0);
        let start = Instant::now();

        let modules: Vec<&ModuleConfig> = self.graph.modules().collect();
        let inputs = link::collect_inputs(&project.config, modules.iter().copied());
        let main_module =
            modules.iter().find(|m| m.kind == crate::config::ModuleKind::Executable);
        let kind = if main_module.is_some() {
            ArtifactKind::Executable
        } else {
            ArtifactKind::SharedLib
        };
        let result = link::link(
            &project.config,
            &project.target,
            &inputs,
            kind,
            main_module.map(|m| m.name.as_str()),
            cancel,
        )?;
        report::link_complete(&result.output.display().to_string(), start.elapsed());
        Ok(result)
    }

    fn plugin(&self, module: &ModuleConfig) -> Result<&Arc<dyn LanguagePlugin>> {
        self.project.registry.get(&module.language).ok_or_else(|| {
            ForgeError::Config(format!(
                "no plugin registered for language `{}` (module `{}`)",
                module.language, module.name
            ))
        })
    }

    fn persist_cache(&self, cache: &ForgeCache) {
        if !self.project.cached {
            return;
        }
        if let Err(err) = cache.write(&self.project.cache_path()) {
            report::warning(&format!("failed to persist build cache: {err}"));
        }
    }
}

/// Pre-computed build state of one module.
struct ModuleState {
    layer: usize,
    fingerprint: Fingerprint,
    freshness: Freshness,
}
