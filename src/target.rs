//! Canonical build-target representation.
//!
//! A [`Target`] is the `<arch>-<vendor>-<os>[-<abi>]` triple the orchestrator
//! plans for. Users write either a short alias (`linux-x64`, `macos-arm64`,
//! `wasm32-wasi`) or a full triple; both parse to the same canonical value,
//! and the canonical triple drives artifact naming, preprocessor defines and
//! the implicit link libraries.

use crate::error::ForgeError;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Linux,
    Macos,
    Windows,
    Wasi,
}

impl Os {
    fn as_str(&self) -> &'static str {
        match self {
            Os::Linux => "linux",
            Os::Macos => "darwin",
            Os::Windows => "windows",
            Os::Wasi => "wasi",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    X86_64,
    Aarch64,
    Wasm32,
}

impl Arch {
    fn as_str(&self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::Aarch64 => "aarch64",
            Arch::Wasm32 => "wasm32",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Unknown,
    Apple,
    Pc,
}

impl Vendor {
    fn as_str(&self) -> &'static str {
        match self {
            Vendor::Unknown => "unknown",
            Vendor::Apple => "apple",
            Vendor::Pc => "pc",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Abi {
    Gnu,
    Musl,
    Msvc,
}

impl Abi {
    fn as_str(&self) -> &'static str {
        match self {
            Abi::Gnu => "gnu",
            Abi::Musl => "musl",
            Abi::Msvc => "msvc",
        }
    }
}

/// The kind of file a build step produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Executable,
    SharedLib,
    StaticLib,
    Object,
}

/// A canonical OS/architecture/ABI triple.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Target {
    pub arch: Arch,
    pub vendor: Vendor,
    pub os: Os,
    pub abi: Option<Abi>,
}

impl Target {
    pub const fn new(arch: Arch, vendor: Vendor, os: Os, abi: Option<Abi>) -> Self {
        Self { arch, vendor, os, abi }
    }

    /// The target of the host this process runs on.
    pub fn host() -> Self {
        #[cfg(target_os = "macos")]
        let os = Os::Macos;
        #[cfg(target_os = "windows")]
        let os = Os::Windows;
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        let os = Os::Linux;

        #[cfg(target_arch = "aarch64")]
        let arch = Arch::Aarch64;
        #[cfg(not(target_arch = "aarch64"))]
        let arch = Arch::X86_64;

        Self { arch, vendor: default_vendor(os), os, abi: default_abi(os) }
    }

    /// Parses an alias or full triple, accepting `"native"` for the host.
    pub fn parse(s: &str) -> Result<Self, ForgeError> {
        s.parse()
    }

    /// The canonical `<arch>-<vendor>-<os>[-<abi>]` string.
    pub fn triple(&self) -> String {
        self.to_string()
    }

    /// File extension for artifacts of `kind` on this target, without the dot.
    /// Executables on unix-likes have none.
    pub fn artifact_extension(&self, kind: ArtifactKind) -> &'static str {
        match (kind, self.os) {
            (ArtifactKind::Executable, Os::Windows) => "exe",
            (ArtifactKind::Executable, Os::Wasi) => "wasm",
            (ArtifactKind::Executable, _) => "",
            (ArtifactKind::SharedLib, Os::Windows) => "dll",
            (ArtifactKind::SharedLib, Os::Macos) => "dylib",
            (ArtifactKind::SharedLib, Os::Wasi) => "wasm",
            (ArtifactKind::SharedLib, Os::Linux) => "so",
            (ArtifactKind::StaticLib, Os::Windows) => "lib",
            (ArtifactKind::StaticLib, _) => "a",
            (ArtifactKind::Object, Os::Windows) => "obj",
            (ArtifactKind::Object, _) => "o",
        }
    }

    /// Conventional file-name prefix for artifacts of `kind`, `lib` for
    /// libraries outside Windows.
    pub fn artifact_prefix(&self, kind: ArtifactKind) -> &'static str {
        match (kind, self.os) {
            (ArtifactKind::SharedLib | ArtifactKind::StaticLib, Os::Windows | Os::Wasi) => "",
            (ArtifactKind::SharedLib | ArtifactKind::StaticLib, _) => "lib",
            _ => "",
        }
    }

    /// Full artifact file name for `base` and `kind` on this target.
    pub fn artifact_file_name(&self, base: &str, kind: ArtifactKind) -> String {
        let ext = self.artifact_extension(kind);
        if ext.is_empty() {
            format!("{}{base}", self.artifact_prefix(kind))
        } else {
            format!("{}{base}.{ext}", self.artifact_prefix(kind))
        }
    }

    /// Preprocessor defines every native compile on this target receives.
    pub fn defines(&self) -> &'static [&'static str] {
        match self.os {
            Os::Linux => &["PLATFORM_LINUX", "PLATFORM_POSIX"],
            Os::Macos => &["PLATFORM_MACOS", "PLATFORM_POSIX"],
            Os::Windows => &["PLATFORM_WINDOWS"],
            Os::Wasi => &["PLATFORM_WASI"],
        }
    }

    /// System libraries the final link implicitly pulls in on this target.
    pub fn link_libraries(&self) -> &'static [&'static str] {
        match self.os {
            Os::Linux => &["m", "pthread", "dl"],
            Os::Macos => &[],
            Os::Windows => &["kernel32", "user32"],
            Os::Wasi => &[],
        }
    }
}

fn default_vendor(os: Os) -> Vendor {
    match os {
        Os::Macos => Vendor::Apple,
        Os::Windows => Vendor::Pc,
        Os::Linux | Os::Wasi => Vendor::Unknown,
    }
}

fn default_abi(os: Os) -> Option<Abi> {
    match os {
        Os::Linux => Some(Abi::Gnu),
        Os::Windows => Some(Abi::Msvc),
        Os::Macos | Os::Wasi => None,
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.arch.as_str(), self.vendor.as_str(), self.os.as_str())?;
        if let Some(abi) = self.abi {
            write!(f, "-{}", abi.as_str())?;
        }
        Ok(())
    }
}

impl FromStr for Target {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "native" {
            return Ok(Self::host());
        }
        // short aliases first
        let alias = match s {
            "linux-x64" => Some((Arch::X86_64, Os::Linux)),
            "linux-arm64" => Some((Arch::Aarch64, Os::Linux)),
            "macos-x64" => Some((Arch::X86_64, Os::Macos)),
            "macos-arm64" => Some((Arch::Aarch64, Os::Macos)),
            "windows-x64" => Some((Arch::X86_64, Os::Windows)),
            "windows-arm64" => Some((Arch::Aarch64, Os::Windows)),
            "wasm32-wasi" => Some((Arch::Wasm32, Os::Wasi)),
            _ => None,
        };
        if let Some((arch, os)) = alias {
            return Ok(Self { arch, vendor: default_vendor(os), os, abi: default_abi(os) });
        }

        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() < 2 || parts.len() > 4 {
            return Err(ForgeError::Config(format!("unrecognized target `{s}`")));
        }
        let arch = match parts[0] {
            "x86_64" | "amd64" => Arch::X86_64,
            "aarch64" | "arm64" => Arch::Aarch64,
            "wasm32" => Arch::Wasm32,
            other => {
                return Err(ForgeError::Config(format!(
                    "unrecognized architecture `{other}` in target `{s}`"
                )))
            }
        };
        let (vendor, rest) = match parts[1] {
            "unknown" | "apple" | "pc" if parts.len() > 2 => {
                let vendor = match parts[1] {
                    "apple" => Vendor::Apple,
                    "pc" => Vendor::Pc,
                    _ => Vendor::Unknown,
                };
                (Some(vendor), &parts[2..])
            }
            _ => (None, &parts[1..]),
        };
        let os = match rest[0] {
            "linux" => Os::Linux,
            "darwin" | "macos" => Os::Macos,
            "windows" => Os::Windows,
            "wasi" => Os::Wasi,
            other => {
                return Err(ForgeError::Config(format!(
                    "unrecognized os `{other}` in target `{s}`"
                )))
            }
        };
        let abi = match rest.get(1) {
            Some(&"gnu") => Some(Abi::Gnu),
            Some(&"musl") => Some(Abi::Musl),
            Some(&"msvc") => Some(Abi::Msvc),
            Some(other) => {
                return Err(ForgeError::Config(format!("unrecognized abi `{other}` in target `{s}`")))
            }
            None => default_abi(os),
        };
        Ok(Self { arch, vendor: vendor.unwrap_or_else(|| default_vendor(os)), os, abi })
    }
}

impl Serialize for Target {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Target {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn aliases_canonicalize() {
        assert_eq!(Target::parse("linux-x64").unwrap().triple(), "x86_64-unknown-linux-gnu");
        assert_eq!(Target::parse("macos-arm64").unwrap().triple(), "aarch64-apple-darwin");
        assert_eq!(Target::parse("windows-x64").unwrap().triple(), "x86_64-pc-windows-msvc");
        assert_eq!(Target::parse("wasm32-wasi").unwrap().triple(), "wasm32-unknown-wasi");
    }

    #[test]
    fn triples_roundtrip() {
        for s in [
            "x86_64-unknown-linux-gnu",
            "aarch64-apple-darwin",
            "x86_64-pc-windows-msvc",
            "x86_64-unknown-linux-musl",
            "wasm32-unknown-wasi",
        ] {
            let target = Target::parse(s).unwrap();
            assert_eq!(target.triple(), s);
            // identical inputs produce identical triples
            assert_eq!(Target::parse(s).unwrap(), target);
        }
    }

    #[test]
    fn full_triple_without_vendor() {
        let target = Target::parse("x86_64-apple-darwin").unwrap();
        assert_eq!(target.vendor, Vendor::Apple);
        assert_eq!(target.triple(), "x86_64-apple-darwin");
    }

    #[test]
    fn artifact_names_follow_platform_conventions() {
        let linux = Target::parse("linux-x64").unwrap();
        assert_eq!(linux.artifact_file_name("core", ArtifactKind::SharedLib), "libcore.so");
        assert_eq!(linux.artifact_file_name("core", ArtifactKind::StaticLib), "libcore.a");
        assert_eq!(linux.artifact_file_name("app", ArtifactKind::Executable), "app");

        let windows = Target::parse("windows-x64").unwrap();
        assert_eq!(windows.artifact_file_name("core", ArtifactKind::SharedLib), "core.dll");
        assert_eq!(windows.artifact_file_name("app", ArtifactKind::Executable), "app.exe");

        let wasi = Target::parse("wasm32-wasi").unwrap();
        assert_eq!(wasi.artifact_file_name("app", ArtifactKind::Executable), "app.wasm");
    }

    #[test]
    fn unknown_targets_fail() {
        assert!(Target::parse("sparc-sun-solaris").is_err());
        assert!(Target::parse("bogus").is_err());
    }
}
