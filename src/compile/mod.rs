pub mod output;
pub mod project;

pub use output::{BuildOutput, BuildPlan, CompileResult, LinkResult, PlannedModule};
pub use project::ProjectCompiler;

use serde::{Deserialize, Serialize};
use std::fmt;

/// The orchestrator's pipeline phases, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    Init,
    DependencyAnalysis,
    Compilation,
    InterfaceExtraction,
    GlueGeneration,
    Linking,
    Complete,
}

impl Phase {
    pub const ALL: &'static [Self] = &[
        Self::Init,
        Self::DependencyAnalysis,
        Self::Compilation,
        Self::InterfaceExtraction,
        Self::GlueGeneration,
        Self::Linking,
        Self::Complete,
    ];

    /// Stable identifier, used as the process exit code of a failing run.
    pub fn id(&self) -> i32 {
        match self {
            Self::Init => 1,
            Self::DependencyAnalysis => 2,
            Self::Compilation => 3,
            Self::InterfaceExtraction => 4,
            Self::GlueGeneration => 5,
            Self::Linking => 6,
            Self::Complete => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::DependencyAnalysis => "dependency-analysis",
            Self::Compilation => "compilation",
            Self::InterfaceExtraction => "interface-extraction",
            Self::GlueGeneration => "glue-generation",
            Self::Linking => "linking",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
