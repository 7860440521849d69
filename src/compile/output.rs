//! The output of a build: per-module compile results, the final link result
//! and the dry-run plan.

use crate::resolver::BuildSchedule;
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, time::Duration};

/// The outcome of compiling one module.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompileResult {
    pub module: String,
    pub success: bool,
    /// Paths the compile produced; empty on failure.
    pub artifacts: Vec<PathBuf>,
    /// Captured compiler output, one entry per invocation.
    pub logs: Vec<String>,
    pub duration: Duration,
    /// Failure description; absent on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the module was served from cache instead of rebuilt.
    #[serde(default)]
    pub cached: bool,
}

impl CompileResult {
    pub fn success(module: impl Into<String>, artifacts: Vec<PathBuf>, logs: Vec<String>, duration: Duration) -> Self {
        Self { module: module.into(), success: true, artifacts, logs, duration, error: None, cached: false }
    }

    pub fn failure(module: impl Into<String>, error: impl Into<String>, logs: Vec<String>, duration: Duration) -> Self {
        Self {
            module: module.into(),
            success: false,
            artifacts: Vec::new(),
            logs,
            duration,
            error: Some(error.into()),
            cached: false,
        }
    }

    pub fn cached(module: impl Into<String>, artifacts: Vec<PathBuf>) -> Self {
        Self {
            module: module.into(),
            success: true,
            artifacts,
            logs: Vec::new(),
            duration: Duration::ZERO,
            error: None,
            cached: true,
        }
    }
}

/// The outcome of the final link step.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkResult {
    pub success: bool,
    /// The linked (or, for managed-only builds, copied) final artifact.
    pub output: PathBuf,
    pub logs: Vec<String>,
    pub duration: Duration,
}

/// One module's row in a dry-run plan.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlannedModule {
    pub module: String,
    pub language: String,
    pub layer: usize,
    pub cached: bool,
    /// Rebuild reason when not cached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A human-readable build plan, returned by dry runs.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BuildPlan {
    pub schedule: Vec<Vec<String>>,
    pub modules: Vec<PlannedModule>,
}

impl BuildPlan {
    pub fn new(schedule: &BuildSchedule, modules: Vec<PlannedModule>) -> Self {
        Self { schedule: schedule.layers().to_vec(), modules }
    }

    pub fn rebuild_count(&self) -> usize {
        self.modules.iter().filter(|m| !m.cached).count()
    }
}

impl fmt::Display for BuildPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "build plan ({} layers):", self.schedule.len())?;
        for (idx, layer) in self.schedule.iter().enumerate() {
            writeln!(f, "  layer {idx}:")?;
            for name in layer {
                let planned = self.modules.iter().find(|m| &m.module == name);
                match planned {
                    Some(m) if m.cached => writeln!(f, "    {name} ({}) [cached]", m.language)?,
                    Some(m) => match &m.reason {
                        Some(reason) => {
                            writeln!(f, "    {name} ({}) [rebuild: {reason}]", m.language)?
                        }
                        None => writeln!(f, "    {name} ({}) [rebuild]", m.language)?,
                    },
                    None => writeln!(f, "    {name}")?,
                }
            }
        }
        Ok(())
    }
}

/// Everything a completed (or aborted) build produced.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BuildOutput {
    pub compiles: Vec<CompileResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<LinkResult>,
    /// Set for dry runs, in which case `compiles` and `link` stay empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<BuildPlan>,
}

impl BuildOutput {
    pub fn compile_result(&self, module: &str) -> Option<&CompileResult> {
        self.compiles.iter().find(|c| c.module == module)
    }

    /// Modules that were actually rebuilt in this run.
    pub fn rebuilt(&self) -> impl Iterator<Item = &CompileResult> {
        self.compiles.iter().filter(|c| c.success && !c.cached)
    }

    /// Modules served from cache in this run.
    pub fn cached(&self) -> impl Iterator<Item = &CompileResult> {
        self.compiles.iter().filter(|c| c.cached)
    }

    pub fn is_dry_run(&self) -> bool {
        self.plan.is_some()
    }

    /// The final artifact, if linking ran and succeeded.
    pub fn artifact(&self) -> Option<&PathBuf> {
        self.link.as_ref().filter(|l| l.success).map(|l| &l.output)
    }
}
