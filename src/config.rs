//! Project and module descriptors.
//!
//! A project is a directory with a `forge.json` at its root and one
//! `module.json` per module directory. Loading validates the whole tree and
//! produces an immutable [`ValidatedForgeConfig`] with absolute paths; every
//! later stage works off that value and never re-reads descriptors.
//!
//! Both descriptor files tolerate `//` line comments and trailing commas.

use crate::{
    error::{ForgeError, Result},
    target::Target,
    utils,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fmt, fs,
    path::{Path, PathBuf},
};

/// File name of the project descriptor.
pub const PROJECT_DESCRIPTOR: &str = "forge.json";
/// File name of a module descriptor.
pub const MODULE_DESCRIPTOR: &str = "module.json";
/// Directory modules live under, both for declared and discovered modules.
pub const MODULES_DIR: &str = "modules";

/// What a module compiles into.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    #[default]
    Library,
    Executable,
}

/// Build profile, selects optimization level conventions per plugin.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildProfile {
    #[default]
    Debug,
    Release,
}

impl fmt::Display for BuildProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildProfile::Debug => f.write_str("debug"),
            BuildProfile::Release => f.write_str("release"),
        }
    }
}

/// Per-language options sub-object of a `module.json`, keyed by the module's
/// language id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LanguageOptions {
    /// C/C++ standard, e.g. `c11`, `c++17`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard: Option<String>,
    /// Rust edition, e.g. `2021`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edition: Option<String>,
    /// Go build mode, e.g. `c-shared`, `c-archive`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buildmode: Option<String>,
    /// Assembler object format, e.g. `elf64`, `win64`, `macho64`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// .NET build configuration, e.g. `Release`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<String>,
    /// Extra flags passed verbatim to the backend.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
    /// Any additional keys a plugin may interpret.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A validated module of the project.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Unique within the project.
    pub name: String,
    /// Registered language id, lower-cased.
    pub language: String,
    #[serde(rename = "type", default)]
    pub kind: ModuleKind,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Options from the descriptor's per-language sub-object.
    #[serde(default)]
    pub options: LanguageOptions,
    /// Absolute path of the module directory.
    pub module_path: PathBuf,
    /// Absolute path of the `module.json` this was read from.
    pub descriptor_path: PathBuf,
}

impl ModuleConfig {
    /// Directory the module's sources are discovered in: `src/` if present,
    /// otherwise the module directory itself.
    pub fn source_dir(&self) -> PathBuf {
        let src = self.module_path.join("src");
        if src.is_dir() {
            src
        } else {
            self.module_path.clone()
        }
    }
}

/// The immutable, validated project tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidatedForgeConfig {
    pub name: String,
    pub version: String,
    /// Absolute project root.
    pub root: PathBuf,
    /// Absolute build output directory.
    pub output_dir: PathBuf,
    /// Base name of the final linked artifact.
    pub artifact_name: String,
    pub default_target: Target,
    pub modules: Vec<ModuleConfig>,
}

impl ValidatedForgeConfig {
    /// Loads and validates the project rooted at `root`.
    ///
    /// `known_languages` is the plugin registry's id set; any module whose
    /// language is not in it fails validation.
    pub fn load(root: &Path, known_languages: &HashSet<String>) -> Result<Self> {
        if !root.is_dir() {
            return Err(ForgeError::Config(format!(
                "project root does not exist: {}",
                root.display()
            )));
        }
        let root = utils::canonicalized(root);
        let descriptor = root.join(PROJECT_DESCRIPTOR);
        if !descriptor.is_file() {
            return Err(ForgeError::Config(format!("{PROJECT_DESCRIPTOR} not found in {}", root.display())));
        }
        let raw: RawProjectConfig = utils::read_jsonc_file(&descriptor).map_err(|err| {
            ForgeError::Config(format!("malformed {}: {err}", descriptor.display()))
        })?;
        if raw.name.trim().is_empty() {
            return Err(ForgeError::Config(format!(
                "project `name` must not be empty in {}",
                descriptor.display()
            )));
        }

        let module_dirs = if raw.modules.is_empty() {
            discover_module_dirs(&root)?
        } else {
            raw.modules
                .iter()
                .map(|name| {
                    let dir = root.join(MODULES_DIR).join(name);
                    if dir.join(MODULE_DESCRIPTOR).is_file() {
                        Ok(dir)
                    } else {
                        Err(ForgeError::Config(format!(
                            "declared module `{name}` has no {MODULE_DESCRIPTOR} under {}",
                            dir.display()
                        )))
                    }
                })
                .collect::<Result<Vec<_>>>()?
        };

        let mut modules = Vec::with_capacity(module_dirs.len());
        let mut seen = HashSet::new();
        for dir in module_dirs {
            let module = load_module(&dir, known_languages)?;
            if !seen.insert(module.name.clone()) {
                return Err(ForgeError::Config(format!(
                    "duplicate module name `{}` in project `{}`",
                    module.name, raw.name
                )));
            }
            modules.push(module);
        }

        let output_dir = root.join(&raw.output.dir);
        let artifact_name =
            if raw.output.artifact_name.is_empty() { raw.name.clone() } else { raw.output.artifact_name };
        let default_target = Target::parse(&raw.target.default)?;

        debug!(project = %raw.name, modules = modules.len(), "loaded project config");
        Ok(Self {
            name: raw.name,
            version: raw.version,
            root,
            output_dir,
            artifact_name,
            default_target,
            modules,
        })
    }

    pub fn module(&self, name: &str) -> Option<&ModuleConfig> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// The per-module build directory, `<output_dir>/<module>`.
    pub fn module_build_dir(&self, module: &str) -> PathBuf {
        self.output_dir.join(module)
    }

    /// Directory generated glue files are written to.
    pub fn glue_dir(&self) -> PathBuf {
        self.output_dir.join("glue")
    }

    /// Directory the cache file lives in.
    pub fn forge_dir(&self) -> PathBuf {
        self.root.join(".forge")
    }
}

fn discover_module_dirs(root: &Path) -> Result<Vec<PathBuf>> {
    let modules_root = root.join(MODULES_DIR);
    if !modules_root.is_dir() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    let entries =
        fs::read_dir(&modules_root).map_err(|err| ForgeError::io(err, &modules_root))?;
    for entry in entries {
        let entry = entry.map_err(|err| ForgeError::io(err, &modules_root))?;
        let path = entry.path();
        if path.is_dir() && path.join(MODULE_DESCRIPTOR).is_file() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn load_module(dir: &Path, known_languages: &HashSet<String>) -> Result<ModuleConfig> {
    let descriptor = dir.join(MODULE_DESCRIPTOR);
    let raw: RawModuleConfig = utils::read_jsonc_file(&descriptor).map_err(|err| {
        ForgeError::Config(format!("malformed {}: {err}", descriptor.display()))
    })?;
    if raw.name.trim().is_empty() {
        return Err(ForgeError::Config(format!(
            "module `name` must not be empty in {}",
            descriptor.display()
        )));
    }
    if raw.language.trim().is_empty() {
        return Err(ForgeError::Config(format!(
            "module `language` must not be empty in {}",
            descriptor.display()
        )));
    }
    let language = raw.language.to_lowercase();
    if !known_languages.contains(&language) {
        return Err(ForgeError::Config(format!(
            "module `{}` uses unknown language `{}`; registered languages: {}",
            raw.name,
            raw.language,
            sorted_list(known_languages)
        )));
    }
    // the per-language options live in a sub-object named after the language
    let options = raw
        .extra
        .get(&language)
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|err| {
            ForgeError::Config(format!(
                "invalid `{language}` options in {}: {err}",
                descriptor.display()
            ))
        })?
        .unwrap_or_default();

    Ok(ModuleConfig {
        name: raw.name,
        language,
        kind: raw.kind,
        dependencies: raw.dependencies,
        options,
        module_path: utils::canonicalized(dir),
        descriptor_path: utils::canonicalized(&descriptor),
    })
}

fn sorted_list(set: &HashSet<String>) -> String {
    let mut ids: Vec<_> = set.iter().map(String::as_str).collect();
    ids.sort_unstable();
    ids.join(", ")
}

#[derive(Debug, Deserialize)]
struct RawProjectConfig {
    #[serde(default)]
    name: String,
    #[serde(default = "default_version")]
    version: String,
    #[serde(default)]
    output: RawOutputConfig,
    #[serde(default)]
    target: RawTargetConfig,
    #[serde(default)]
    modules: Vec<String>,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawOutputConfig {
    dir: String,
    artifact_name: String,
}

impl Default for RawOutputConfig {
    fn default() -> Self {
        Self { dir: "build".to_string(), artifact_name: String::new() }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawTargetConfig {
    default: String,
}

impl Default for RawTargetConfig {
    fn default() -> Self {
        Self { default: "native".to_string() }
    }
}

#[derive(Debug, Deserialize)]
struct RawModuleConfig {
    #[serde(default)]
    name: String,
    #[serde(default)]
    language: String,
    #[serde(rename = "type", default)]
    kind: ModuleKind,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn known() -> HashSet<String> {
        ["c", "cpp", "rust", "go", "csharp", "asm", "wasm", "python"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn write_project(root: &Path, forge: &str, modules: &[(&str, &str)]) {
        fs::write(root.join(PROJECT_DESCRIPTOR), forge).unwrap();
        for (name, descriptor) in modules {
            let dir = root.join(MODULES_DIR).join(name);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(MODULE_DESCRIPTOR), descriptor).unwrap();
        }
    }

    #[test]
    fn loads_project_with_comments_and_trailing_commas() {
        let tmp = tempfile::tempdir().unwrap();
        write_project(
            tmp.path(),
            r#"{
                // the project
                "name": "demo",
                "modules": ["core",],
            }"#,
            &[(
                "core",
                r#"{ "name": "core", "language": "c", "type": "library", "c": { "standard": "c11", } }"#,
            )],
        );
        let config = ValidatedForgeConfig::load(tmp.path(), &known()).unwrap();
        assert_eq!(config.name, "demo");
        assert_eq!(config.artifact_name, "demo");
        assert_eq!(config.modules.len(), 1);
        let core = &config.modules[0];
        assert_eq!(core.language, "c");
        assert_eq!(core.kind, ModuleKind::Library);
        assert_eq!(core.options.standard.as_deref(), Some("c11"));
        assert!(core.module_path.is_absolute());
    }

    #[test]
    fn discovers_modules_when_none_declared() {
        let tmp = tempfile::tempdir().unwrap();
        write_project(
            tmp.path(),
            r#"{ "name": "demo" }"#,
            &[
                ("a", r#"{ "name": "a", "language": "c" }"#),
                ("b", r#"{ "name": "b", "language": "rust" }"#),
            ],
        );
        let config = ValidatedForgeConfig::load(tmp.path(), &known()).unwrap();
        let names: Vec<_> = config.modules.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn missing_root_fails() {
        let err = ValidatedForgeConfig::load(Path::new("/definitely/not/here"), &known())
            .unwrap_err();
        assert!(matches!(err, ForgeError::Config(_)));
    }

    #[test]
    fn missing_descriptor_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let err = ValidatedForgeConfig::load(tmp.path(), &known()).unwrap_err();
        assert!(err.to_string().contains(PROJECT_DESCRIPTOR));
    }

    #[test]
    fn empty_name_fails() {
        let tmp = tempfile::tempdir().unwrap();
        write_project(tmp.path(), r#"{ "name": "" }"#, &[]);
        let err = ValidatedForgeConfig::load(tmp.path(), &known()).unwrap_err();
        assert!(err.to_string().contains("`name`"));
    }

    #[test]
    fn unknown_language_fails() {
        let tmp = tempfile::tempdir().unwrap();
        write_project(
            tmp.path(),
            r#"{ "name": "demo", "modules": ["core"] }"#,
            &[("core", r#"{ "name": "core", "language": "cobol" }"#)],
        );
        let err = ValidatedForgeConfig::load(tmp.path(), &known()).unwrap_err();
        assert!(err.to_string().contains("cobol"));
    }

    #[test]
    fn duplicate_module_names_fail() {
        let tmp = tempfile::tempdir().unwrap();
        write_project(
            tmp.path(),
            r#"{ "name": "demo" }"#,
            &[
                ("a", r#"{ "name": "same", "language": "c" }"#),
                ("b", r#"{ "name": "same", "language": "c" }"#),
            ],
        );
        let err = ValidatedForgeConfig::load(tmp.path(), &known()).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn language_ids_are_case_insensitive() {
        let tmp = tempfile::tempdir().unwrap();
        write_project(
            tmp.path(),
            r#"{ "name": "demo", "modules": ["core"] }"#,
            &[("core", r#"{ "name": "core", "language": "Rust" }"#)],
        );
        let config = ValidatedForgeConfig::load(tmp.path(), &known()).unwrap();
        assert_eq!(config.modules[0].language, "rust");
    }
}
