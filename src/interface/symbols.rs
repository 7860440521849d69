//! Symbol-table based interface extraction for native artifacts.
//!
//! `nm` is the authoritative source where no richer metadata exists; when it
//! is unavailable `objdump -t` is close enough. Symbol tables carry names
//! only, so the resulting exports are marked `opaque` and default to a
//! `() -> void` signature.

use crate::{
    error::{ForgeError, Result},
    interface::{Export, InterfaceAbi, InterfaceMode, ModuleInterface, Signature},
    process::{self, CancelToken, CommandSpec, SYMBOL_QUERY_TIMEOUT},
};
use std::path::Path;

/// Attribute marking exports recovered from a symbol table.
pub const OPAQUE_ATTRIBUTE: &str = "opaque";

/// Lists the globally defined function symbols of a native artifact.
pub fn defined_symbols(artifact: &Path, cancel: &CancelToken) -> Result<Vec<String>> {
    if process::command_exists("nm") {
        let spec = CommandSpec::new("nm")
            .arg("-g")
            .arg("--defined-only")
            .arg(artifact.display().to_string())
            .timeout(SYMBOL_QUERY_TIMEOUT);
        let output = process::run(&spec, cancel)?;
        if output.success() {
            return Ok(parse_nm(&output.stdout));
        }
    }
    if process::command_exists("objdump") {
        let spec = CommandSpec::new("objdump")
            .arg("-t")
            .arg(artifact.display().to_string())
            .timeout(SYMBOL_QUERY_TIMEOUT);
        let output = process::run(&spec, cancel)?;
        if output.success() {
            return Ok(parse_objdump(&output.stdout));
        }
    }
    Err(ForgeError::msg(format!(
        "neither `nm` nor `objdump` could read symbols from {}",
        artifact.display()
    )))
}

/// Builds an interface from a native artifact's symbol table.
pub fn extract(
    artifact: &Path,
    module_name: &str,
    module_version: &str,
    language: &str,
    cancel: &CancelToken,
) -> Result<ModuleInterface> {
    let symbols = defined_symbols(artifact, cancel)?;
    let exports = symbols
        .into_iter()
        .map(|name| {
            let mut export = Export::new(name, Signature::default());
            export.attributes.push(OPAQUE_ATTRIBUTE.to_string());
            export
        })
        .collect();
    Ok(ModuleInterface::new(module_name, module_version, language)
        .with_abi(InterfaceAbi::C, InterfaceMode::Native)
        .with_exports(exports))
}

/// Parses `nm -g --defined-only` output: `<addr> <kind> <name>`.
///
/// Only text/weak symbols are kept; the Mach-O leading underscore is
/// stripped.
fn parse_nm(stdout: &str) -> Vec<String> {
    let mut symbols: Vec<String> = stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let _addr = parts.next()?;
            let kind = parts.next()?;
            let name = parts.next()?;
            matches!(kind, "T" | "t" | "W" | "w").then(|| demangle_platform(name))
        })
        .filter(|name| !is_runtime_symbol(name))
        .collect();
    symbols.sort();
    symbols.dedup();
    symbols
}

/// Parses `objdump -t` output, keeping function symbols in the text section.
fn parse_objdump(stdout: &str) -> Vec<String> {
    let mut symbols: Vec<String> = stdout
        .lines()
        .filter(|line| line.contains(".text") && (line.contains(" g ") || line.contains(" F ")))
        .filter_map(|line| line.split_whitespace().last())
        .map(demangle_platform)
        .filter(|name| !is_runtime_symbol(name))
        .collect();
    symbols.sort();
    symbols.dedup();
    symbols
}

fn demangle_platform(name: &str) -> String {
    // Mach-O prefixes every C symbol with `_`
    if cfg!(target_os = "macos") {
        name.strip_prefix('_').unwrap_or(name).to_string()
    } else {
        name.to_string()
    }
}

/// Linker/runtime bookkeeping symbols are never part of a module's interface.
fn is_runtime_symbol(name: &str) -> bool {
    name.starts_with("__")
        || name.starts_with("_init")
        || name.starts_with("_fini")
        || matches!(name, "main" | "_start" | "frame_dummy")
        || name.starts_with(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_nm_output() {
        let stdout = "\
0000000000001120 T add\n\
0000000000001140 T mul\n\
0000000000004028 B counter\n\
0000000000001000 t local_helper\n\
0000000000001100 T __libc_csu_init\n";
        // lowercase `t` is local text, still a defined function symbol
        let symbols = parse_nm(stdout);
        assert_eq!(symbols, vec!["add", "local_helper", "mul"]);
    }

    #[test]
    fn parses_objdump_output() {
        let stdout = "\
0000000000001120 g     F .text  0000000000000010 add\n\
0000000000004028 g     O .data  0000000000000004 counter\n\
0000000000001140 g     F .text  0000000000000012 sub\n";
        assert_eq!(parse_objdump(stdout), vec!["add", "sub"]);
    }

    #[test]
    fn opaque_exports_have_void_signatures() {
        let export = {
            let mut e = Export::new("add", Signature::default());
            e.attributes.push(OPAQUE_ATTRIBUTE.to_string());
            e
        };
        assert!(export.is_opaque());
        assert!(export.signature.parameters.is_empty());
    }
}
