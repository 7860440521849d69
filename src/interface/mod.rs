//! The typed, language-agnostic description of a module's exported and
//! imported symbols.
//!
//! Interfaces are produced by the plugins' extraction step, written next to
//! the artifacts as JSON, and consumed by the glue generator. The JSON form
//! is versioned and round-trips losslessly.

use crate::error::{ForgeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub mod symbols;
mod ty;
pub use ty::{CallingConvention, Direction, Parameter, PrimitiveKind, Signature, Type};

/// Interface schema version.
pub const INTERFACE_VERSION: &str = "1.0";

/// Binary interface family of the producing toolchain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceAbi {
    #[default]
    C,
    Clr,
}

/// Whether the artifact holds native code or managed bytecode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceMode {
    #[default]
    Native,
    Clr,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRef {
    pub name: String,
    pub version: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageRef {
    pub name: String,
    #[serde(default)]
    pub abi: InterfaceAbi,
    #[serde(default)]
    pub mode: InterfaceMode,
}

/// A function exported by a module.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Export {
    pub name: String,
    pub signature: Signature,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<String>,
}

impl Export {
    pub fn new(name: impl Into<String>, signature: Signature) -> Self {
        Self { name: name.into(), signature, attributes: Vec::new() }
    }

    /// Exports discovered from a symbol table carry no type information.
    pub fn is_opaque(&self) -> bool {
        self.attributes.iter().any(|a| a == "opaque")
    }
}

/// A function a module expects its host to provide.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Import {
    pub name: String,
    pub signature: Signature,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<String>,
}

/// The full FFI description of one compiled module.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInterface {
    pub version: String,
    pub module: ModuleRef,
    pub language: LanguageRef,
    #[serde(default)]
    pub exports: Vec<Export>,
    #[serde(default)]
    pub imports: Vec<Import>,
}

impl ModuleInterface {
    pub fn new(
        module_name: impl Into<String>,
        module_version: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            version: INTERFACE_VERSION.to_string(),
            module: ModuleRef { name: module_name.into(), version: module_version.into() },
            language: LanguageRef {
                name: language.into(),
                abi: InterfaceAbi::C,
                mode: InterfaceMode::Native,
            },
            exports: Vec::new(),
            imports: Vec::new(),
        }
    }

    pub fn with_abi(mut self, abi: InterfaceAbi, mode: InterfaceMode) -> Self {
        self.language.abi = abi;
        self.language.mode = mode;
        self
    }

    pub fn with_exports(mut self, exports: Vec<Export>) -> Self {
        self.exports = exports;
        self
    }

    pub fn module_name(&self) -> &str {
        &self.module.name
    }

    pub fn export(&self, name: &str) -> Option<&Export> {
        self.exports.iter().find(|e| e.name == name)
    }

    /// Parses an interface description, mapping an unknown type discriminator
    /// to [`ForgeError::UnknownTypeKind`].
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(classify_parse_error)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|err| ForgeError::io(err, path))?;
        Self::from_json(&content)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        crate::utils::create_parent_dir_all(path)?;
        std::fs::write(path, self.to_json()?).map_err(|err| ForgeError::io(err, path))
    }
}

fn classify_parse_error(err: serde_json::Error) -> ForgeError {
    let msg = err.to_string();
    if let Some(rest) = msg.split("unknown type kind `").nth(1) {
        if let Some(kind) = rest.split('`').next() {
            return ForgeError::UnknownTypeKind(kind.to_string());
        }
    }
    err.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> ModuleInterface {
        ModuleInterface::new("rustlib", "0.1.0", "rust").with_exports(vec![Export::new(
            "add",
            Signature {
                parameters: vec![
                    Parameter::new("a", Type::Primitive(PrimitiveKind::I32)),
                    Parameter::new("b", Type::Primitive(PrimitiveKind::I32)),
                ],
                return_type: Type::Primitive(PrimitiveKind::I32),
                calling_convention: CallingConvention::Cdecl,
            },
        )])
    }

    #[test]
    fn interface_json_matches_schema() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["version"], "1.0");
        assert_eq!(value["module"]["name"], "rustlib");
        assert_eq!(value["language"]["name"], "rust");
        assert_eq!(value["language"]["abi"], "c");
        assert_eq!(value["language"]["mode"], "native");
        let export = &value["exports"][0];
        assert_eq!(export["name"], "add");
        assert_eq!(export["signature"]["params"][0]["direction"], "in");
        assert_eq!(export["signature"]["return"]["kind"], "i32");
        assert_eq!(export["signature"]["convention"], "cdecl");
    }

    #[test]
    fn interface_roundtrips_byte_identical_after_normalization() {
        let iface = sample();
        let json = iface.to_json().unwrap();
        let parsed = ModuleInterface::from_json(&json).unwrap();
        assert_eq!(parsed, iface);
        // normalized (Value) forms compare equal, and re-emission is stable
        let lhs: serde_json::Value = serde_json::from_str(&json).unwrap();
        let rhs: serde_json::Value =
            serde_json::from_str(&parsed.to_json().unwrap()).unwrap();
        assert_eq!(lhs, rhs);
        assert_eq!(parsed.to_json().unwrap(), json);
    }

    #[test]
    fn unknown_discriminator_is_a_typed_error() {
        let json = r#"{
            "version": "1.0",
            "module": { "name": "m", "version": "0" },
            "language": { "name": "c" },
            "exports": [ { "name": "f", "signature": {
                "params": [], "return": { "kind": "matrix" }, "convention": "cdecl"
            } } ]
        }"#;
        match ModuleInterface::from_json(json).unwrap_err() {
            ForgeError::UnknownTypeKind(kind) => assert_eq!(kind, "matrix"),
            other => panic!("expected UnknownTypeKind, got {other}"),
        }
    }

    #[test]
    fn reads_and_writes_files() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("iface").join("rustlib.json");
        let iface = sample();
        iface.write(&path).unwrap();
        assert_eq!(ModuleInterface::read(&path).unwrap(), iface);
    }
}
