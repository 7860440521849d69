use std::{
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;

use crate::compile::Phase;

pub type Result<T> = std::result::Result<T, ForgeError>;

/// Various error types
#[derive(Debug, Error)]
pub enum ForgeError {
    /// Missing or malformed descriptor, unknown language, empty required field.
    #[error("invalid project configuration: {0}")]
    Config(String),
    /// Missing dependency or dependency cycle, reported with the full chain.
    #[error("dependency graph error: {0}")]
    Graph(String),
    /// No working backend found for a language.
    #[error("no toolchain available for `{language}`: {tried}")]
    Toolchain { language: String, tried: String },
    /// An external compiler failed; carries the command line and its stderr.
    #[error("`{command}` exited with {exit_code}\n{stderr}")]
    Compile { module: String, command: String, exit_code: i32, stderr: String },
    /// A module's compile failed; the orchestrator's abort error, wrapping
    /// the plugin's failure message.
    #[error("module `{module}` failed to compile: {message}")]
    ModuleFailed { module: String, message: String },
    /// Interface extraction failed. Non-fatal, linking proceeds without glue.
    #[error("interface extraction failed for `{module}`: {message}")]
    Extraction { module: String, message: String },
    /// Glue generation failed. Non-fatal, linking proceeds without glue.
    #[error("glue generation for `{producer}` -> `{consumer}` failed: {message}")]
    Glue { producer: String, consumer: String, message: String },
    /// The linker failed or none was available.
    #[error("linking failed: {0}")]
    Link(String),
    /// Unknown `"kind"` discriminator in an interface JSON type.
    #[error("unknown type kind `{0}` in interface description")]
    UnknownTypeKind(String),
    /// User-requested abort.
    #[error("build cancelled")]
    Cancelled,
    #[error(transparent)]
    SemverError(#[from] semver::Error),
    /// Deserialization error
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    /// Filesystem IO error
    #[error(transparent)]
    Io(#[from] ForgeIoError),
    /// General purpose message.
    #[error("{0}")]
    Message(String),
}

impl ForgeError {
    pub(crate) fn io(err: io::Error, path: impl Into<PathBuf>) -> Self {
        ForgeIoError::new(err, path).into()
    }

    /// General purpose message.
    pub fn msg(msg: impl std::fmt::Display) -> Self {
        ForgeError::Message(msg.to_string())
    }

    /// The build phase this error is attributed to.
    pub fn phase(&self) -> Phase {
        match self {
            ForgeError::Config(_) => Phase::Init,
            ForgeError::Graph(_) => Phase::DependencyAnalysis,
            ForgeError::Toolchain { .. }
            | ForgeError::Compile { .. }
            | ForgeError::ModuleFailed { .. } => Phase::Compilation,
            ForgeError::Extraction { .. } | ForgeError::UnknownTypeKind(_) => {
                Phase::InterfaceExtraction
            }
            ForgeError::Glue { .. } => Phase::GlueGeneration,
            ForgeError::Link(_) => Phase::Linking,
            _ => Phase::Init,
        }
    }

    /// Process exit code for this error: the identifier of the failing phase,
    /// or a negative code for cancellation.
    pub fn exit_code(&self) -> i32 {
        match self {
            ForgeError::Cancelled => -2,
            err => err.phase().id(),
        }
    }

    /// Whether the orchestrator treats this error as a warning rather than an
    /// abort. Extraction and glue failures only cost the affected edge.
    pub fn is_warning(&self) -> bool {
        matches!(self, ForgeError::Extraction { .. } | ForgeError::Glue { .. })
    }

    /// Renders the error the way a failing run is shown to the user: the
    /// phase name, the failing module where one is known, and at most the
    /// first 50 lines of tool output.
    pub fn render_failure(&self) -> String {
        let mut out = format!("build failed during {}", self.phase());
        match self {
            ForgeError::ModuleFailed { module, .. }
            | ForgeError::Compile { module, .. }
            | ForgeError::Extraction { module, .. } => {
                out.push_str(&format!(" (module `{module}`)"));
            }
            _ => {}
        }
        out.push('\n');
        let message = self.to_string();
        let mut lines = message.lines();
        for line in lines.by_ref().take(50) {
            out.push_str(line);
            out.push('\n');
        }
        if lines.next().is_some() {
            out.push_str("...\n");
        }
        out
    }
}

macro_rules! _format_err {
    ($($tt:tt)*) => {
        $crate::error::ForgeError::msg(format!($($tt)*))
    };
}
#[allow(unused)]
pub(crate) use _format_err as format_err;

macro_rules! _bail {
    ($($tt:tt)*) => { return Err($crate::error::format_err!($($tt)*)) };
}
#[allow(unused)]
pub(crate) use _bail as bail;

#[derive(Debug, Error)]
#[error("\"{}\": {io}", self.path.display())]
pub struct ForgeIoError {
    io: io::Error,
    path: PathBuf,
}

impl ForgeIoError {
    pub fn new(io: io::Error, path: impl Into<PathBuf>) -> Self {
        Self { io, path: path.into() }
    }

    /// The path at which the error occurred
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The underlying `io::Error`
    pub fn source(&self) -> &io::Error {
        &self.io
    }
}

impl From<ForgeIoError> for io::Error {
    fn from(err: ForgeIoError) -> Self {
        err.io
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_identify_the_failing_phase() {
        assert_eq!(ForgeError::Config("x".into()).exit_code(), 1);
        assert_eq!(ForgeError::Graph("x".into()).exit_code(), 2);
        assert_eq!(
            ForgeError::ModuleFailed { module: "m".into(), message: "x".into() }.exit_code(),
            3
        );
        assert_eq!(ForgeError::Link("x".into()).exit_code(), 6);
        assert_eq!(ForgeError::Cancelled.exit_code(), -2);
    }

    #[test]
    fn failure_rendering_caps_tool_output() {
        let stderr: String =
            (0..80).map(|i| format!("error line {i}\n")).collect();
        let err = ForgeError::Compile {
            module: "core".into(),
            command: "clang -c a.c".into(),
            exit_code: 1,
            stderr,
        };
        let rendered = err.render_failure();
        assert!(rendered.starts_with("build failed during compilation (module `core`)"));
        assert!(rendered.contains("error line 0"));
        assert!(!rendered.contains("error line 60"));
        assert!(rendered.ends_with("...\n"));
    }

    #[test]
    fn extraction_and_glue_are_warnings() {
        let err = ForgeError::Extraction { module: "m".into(), message: "no helper".into() };
        assert!(err.is_warning());
        let err = ForgeError::Graph("cycle".into());
        assert!(!err.is_warning());
    }
}
