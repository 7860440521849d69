#![doc = include_str!("../README.md")]
#![warn(rustdoc::all)]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

#[macro_use]
pub mod error;

pub mod cache;

pub mod resolver;
pub use resolver::{BuildSchedule, ModuleGraph};

pub mod compilers;
pub use compilers::{LanguagePlugin, PluginRegistry};

mod compile;
pub use compile::{
    output::{BuildOutput, BuildPlan, CompileResult, LinkResult, PlannedModule},
    Phase, ProjectCompiler,
};

mod config;
pub use config::{
    BuildProfile, LanguageOptions, ModuleConfig, ModuleKind, ValidatedForgeConfig,
};

pub mod glue;
pub mod interface;
pub mod link;
pub mod process;
pub use process::CancelToken;

pub mod report;

pub mod target;
pub use target::{ArtifactKind, Target};

pub mod utils;

use crate::{cache::FORGE_CACHE_FILENAME, error::Result};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

/// Represents a validated project workspace and handles building all of its
/// modules into a linked final artifact.
#[derive(Clone, Debug)]
pub struct Project {
    /// The validated descriptor tree.
    pub config: ValidatedForgeConfig,
    /// The frozen language-plugin registry.
    pub registry: Arc<PluginRegistry>,
    /// The build profile cache entries are keyed under.
    pub profile: BuildProfile,
    /// The target the build produces artifacts for.
    pub target: Target,
    /// Maximum number of concurrent compile processes within one layer.
    pub jobs: usize,
    /// Whether caching is enabled.
    pub cached: bool,
    /// Whether to stop after scheduling and return a plan.
    pub dry_run: bool,
    /// Restricts the build to one module and its transitive dependencies.
    pub only: Option<String>,
    cancel: CancelToken,
}

impl Project {
    /// Convenience function to call [`ProjectBuilder::default()`].
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use polyforge::Project;
    ///
    /// let project = Project::builder().root("./demo").build()?;
    /// let output = project.compile()?;
    /// # Ok::<_, polyforge::error::ForgeError>(())
    /// ```
    pub fn builder() -> ProjectBuilder {
        ProjectBuilder::default()
    }

    /// Runs the full pipeline: schedule, compile, extract, glue, link.
    pub fn compile(&self) -> Result<BuildOutput> {
        ProjectCompiler::new(self)?.compile()
    }

    /// The build plan without running anything, regardless of the configured
    /// dry-run flag.
    pub fn plan(&self) -> Result<BuildOutput> {
        let project = Project { dry_run: true, ..self.clone() };
        ProjectCompiler::new(&project)?.compile()
    }

    /// Path of the incremental cache file.
    pub fn cache_path(&self) -> PathBuf {
        self.config.forge_dir().join(FORGE_CACHE_FILENAME)
    }

    /// The cancellation handle for this project's builds. Cancelling kills
    /// in-flight compiler processes and drains the workers.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}

/// Builder for a [`Project`].
#[derive(Clone, Debug)]
pub struct ProjectBuilder {
    root: PathBuf,
    profile: BuildProfile,
    target: Option<String>,
    jobs: Option<usize>,
    cached: bool,
    dry_run: bool,
    only: Option<String>,
    registry: Option<Arc<PluginRegistry>>,
}

impl Default for ProjectBuilder {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            profile: BuildProfile::Debug,
            target: None,
            jobs: None,
            cached: true,
            dry_run: false,
            only: None,
            registry: None,
        }
    }
}

impl ProjectBuilder {
    pub fn root(mut self, root: impl AsRef<Path>) -> Self {
        self.root = root.as_ref().to_path_buf();
        self
    }

    pub fn profile(mut self, profile: BuildProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Overrides the project's default target, alias or full triple.
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = Some(jobs);
        self
    }

    /// Disables the incremental cache, forcing every module to rebuild.
    pub fn no_cache(mut self) -> Self {
        self.cached = false;
        self
    }

    /// Stops after scheduling and returns a human-readable plan.
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Restricts the build to `module` and its transitive dependencies.
    pub fn only(mut self, module: impl Into<String>) -> Self {
        self.only = Some(module.into());
        self
    }

    /// Uses a custom plugin registry instead of the built-in defaults.
    pub fn registry(mut self, registry: Arc<PluginRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Loads and validates the project, producing an immutable [`Project`].
    pub fn build(self) -> Result<Project> {
        let registry =
            self.registry.unwrap_or_else(|| Arc::new(PluginRegistry::with_defaults()));
        let config = ValidatedForgeConfig::load(&self.root, &registry.known_ids())?;
        let target = match &self.target {
            Some(target) => Target::parse(target)?,
            None => config.default_target,
        };
        let jobs = self.jobs.unwrap_or_else(num_cpus::get).max(1);
        Ok(Project {
            config,
            registry,
            profile: self.profile,
            target,
            jobs,
            cached: self.cached,
            dry_run: self.dry_run,
            only: self.only,
            cancel: CancelToken::new(),
        })
    }
}
