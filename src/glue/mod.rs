//! FFI binding generation.
//!
//! For every dependency edge `consumer -> producer` the orchestrator renders
//! one glue file: the producer's exported functions declared in the
//! consumer's language. Files land in `<build_dir>/glue/` as
//! `<producer>_to_<consumer>.<ext>`.

use crate::{
    error::{ForgeError, Result},
    interface::{CallingConvention, Export, ModuleInterface, PrimitiveKind, Type},
};
use std::fmt::Write;

/// Rendered binding source for one target language.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GlueCode {
    pub target_language: String,
    /// File extension the target language's bindings use, without the dot.
    pub extension: &'static str,
    pub content: String,
}

/// The glue file name for the edge `consumer -> producer`.
pub fn glue_file_name(producer: &str, consumer: &str, extension: &str) -> String {
    format!("{producer}_to_{consumer}.{extension}")
}

/// Renders `interface` for `target_language`.
///
/// Unsupported target languages are an error; the orchestrator treats it as
/// a non-fatal warning for the affected edge.
pub fn generate(interface: &ModuleInterface, target_language: &str) -> Result<GlueCode> {
    let target = target_language.to_lowercase();
    let (extension, content) = match target.as_str() {
        "c" => ("h", c_header(interface, false)),
        "cpp" => ("hpp", c_header(interface, true)),
        "rust" => ("rs", rust_bindings(interface)),
        "csharp" => ("cs", csharp_bindings(interface)),
        other => {
            return Err(ForgeError::msg(format!(
                "glue generation does not support target language `{other}`"
            )))
        }
    };
    Ok(GlueCode { target_language: target, extension, content })
}

fn banner(interface: &ModuleInterface, comment: &str) -> String {
    format!(
        "{comment} Auto-generated bindings for module `{}` ({}). Do not edit.\n",
        interface.module.name, interface.language.name
    )
}

fn c_header(interface: &ModuleInterface, cpp: bool) -> String {
    let module = &interface.module.name;
    let guard = format!("{}_GLUE_{}", module.to_uppercase().replace('-', "_"), if cpp { "HPP" } else { "H" });
    let mut out = banner(interface, "//");
    let _ = writeln!(out, "#ifndef {guard}");
    let _ = writeln!(out, "#define {guard}");
    out.push('\n');
    out.push_str("#include <stdbool.h>\n#include <stddef.h>\n#include <stdint.h>\n\n");
    if cpp {
        out.push_str("extern \"C\" {\n\n");
    } else {
        out.push_str("#ifdef __cplusplus\nextern \"C\" {\n#endif\n\n");
    }
    for export in &interface.exports {
        out.push_str(&c_prototype(export));
        out.push('\n');
    }
    out.push('\n');
    if cpp {
        out.push_str("} // extern \"C\"\n");
    } else {
        out.push_str("#ifdef __cplusplus\n} // extern \"C\"\n#endif\n");
    }
    let _ = writeln!(out, "\n#endif // {guard}");
    out
}

fn c_prototype(export: &Export) -> String {
    let signature = &export.signature;
    let convention = match signature.calling_convention {
        CallingConvention::Cdecl => "",
        CallingConvention::Stdcall => "__stdcall ",
        CallingConvention::Fastcall => "__fastcall ",
        CallingConvention::Thiscall => "__thiscall ",
    };
    let params = if signature.parameters.is_empty() {
        "void".to_string()
    } else {
        signature
            .parameters
            .iter()
            .map(|p| p.ty.c_decl(&mangle_c(&p.name)))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!("{} {convention}{}({params});", signature.return_type.c_type(), export.name)
}

fn rust_bindings(interface: &ModuleInterface) -> String {
    let mut out = banner(interface, "//");
    out.push_str("#![allow(non_camel_case_types, non_snake_case, dead_code)]\n\n");
    let _ = writeln!(out, "#[link(name = \"{}\")]", interface.module.name);
    // all spec conventions collapse to "C" on non-windows targets; emit the
    // explicit ABI string where it differs
    let mut by_abi: Vec<(&str, Vec<&Export>)> = Vec::new();
    for export in &interface.exports {
        let abi = match export.signature.calling_convention {
            CallingConvention::Cdecl => "C",
            CallingConvention::Stdcall => "stdcall",
            CallingConvention::Fastcall => "fastcall",
            CallingConvention::Thiscall => "thiscall",
        };
        match by_abi.iter_mut().find(|(a, _)| *a == abi) {
            Some((_, exports)) => exports.push(export),
            None => by_abi.push((abi, vec![export])),
        }
    }
    if by_abi.is_empty() {
        by_abi.push(("C", Vec::new()));
    }
    for (abi, exports) in by_abi {
        let _ = writeln!(out, "extern \"{abi}\" {{");
        for export in exports {
            let params = export
                .signature
                .parameters
                .iter()
                .map(|p| format!("{}: {}", mangle_rust(&p.name), p.ty.rust_type()))
                .collect::<Vec<_>>()
                .join(", ");
            if export.signature.return_type == Type::VOID {
                let _ = writeln!(out, "    pub fn {}({params});", export.name);
            } else {
                let _ = writeln!(
                    out,
                    "    pub fn {}({params}) -> {};",
                    export.name,
                    export.signature.return_type.rust_type()
                );
            }
        }
        out.push_str("}\n");
    }
    out
}

fn csharp_bindings(interface: &ModuleInterface) -> String {
    let module = &interface.module.name;
    let class = {
        let mut name = module.replace('-', "_");
        if !name.is_empty() {
            let first = name[0..1].to_uppercase();
            name.replace_range(0..1, &first);
        }
        format!("{name}Native")
    };
    let mut out = banner(interface, "//");
    out.push_str("using System;\nusing System.Runtime.InteropServices;\n\n");
    let _ = writeln!(out, "internal static class {class}");
    out.push_str("{\n");
    for export in &interface.exports {
        let convention = match export.signature.calling_convention {
            CallingConvention::Cdecl => "Cdecl",
            CallingConvention::Stdcall => "StdCall",
            CallingConvention::Fastcall => "FastCall",
            CallingConvention::Thiscall => "ThisCall",
        };
        let _ = writeln!(
            out,
            "    [DllImport(\"{module}\", CallingConvention = CallingConvention.{convention})]"
        );
        let params = export
            .signature
            .parameters
            .iter()
            .map(|p| format!("{} {}", csharp_type(&p.ty), mangle_csharp(&p.name)))
            .collect::<Vec<_>>()
            .join(", ");
        let _ = writeln!(
            out,
            "    public static extern {} {}({params});\n",
            csharp_type(&export.signature.return_type),
            export.name
        );
    }
    out.push_str("}\n");
    out
}

fn csharp_type(ty: &Type) -> &'static str {
    match ty {
        Type::Primitive(kind) => match kind {
            PrimitiveKind::Void => "void",
            PrimitiveKind::Bool => "bool",
            PrimitiveKind::I8 => "sbyte",
            PrimitiveKind::I16 => "short",
            PrimitiveKind::I32 => "int",
            PrimitiveKind::I64 => "long",
            PrimitiveKind::U8 => "byte",
            PrimitiveKind::U16 => "ushort",
            PrimitiveKind::U32 => "uint",
            PrimitiveKind::U64 => "ulong",
            PrimitiveKind::F32 => "float",
            PrimitiveKind::F64 => "double",
            PrimitiveKind::Isize => "IntPtr",
            PrimitiveKind::Usize => "UIntPtr",
        },
        // pointers, arrays, named structs and function pointers all cross the
        // managed boundary as raw pointers
        Type::Pointer { .. } | Type::Array { .. } | Type::Struct { .. } => "IntPtr",
        Type::FunctionPointer { .. } => "IntPtr",
    }
}

const C_KEYWORDS: &[&str] = &[
    "auto", "break", "case", "char", "const", "continue", "default", "do", "double", "else",
    "enum", "extern", "float", "for", "goto", "if", "inline", "int", "long", "register",
    "restrict", "return", "short", "signed", "sizeof", "static", "struct", "switch", "typedef",
    "union", "unsigned", "void", "volatile", "while",
];

const RUST_KEYWORDS: &[&str] = &[
    "as", "box", "break", "const", "continue", "crate", "dyn", "else", "enum", "extern", "fn",
    "for", "if", "impl", "in", "let", "loop", "match", "mod", "move", "mut", "pub", "ref",
    "return", "self", "static", "struct", "trait", "type", "unsafe", "use", "where", "while",
];

const CSHARP_KEYWORDS: &[&str] = &[
    "abstract", "base", "bool", "byte", "case", "catch", "char", "class", "const", "decimal",
    "default", "delegate", "double", "else", "enum", "event", "fixed", "float", "for", "if",
    "in", "int", "internal", "lock", "long", "namespace", "new", "object", "out", "params",
    "private", "public", "ref", "return", "sbyte", "sealed", "short", "static", "string",
    "struct", "this", "uint", "ulong", "ushort", "using", "virtual", "void", "while",
];

fn mangle_c(name: &str) -> String {
    if C_KEYWORDS.contains(&name) {
        format!("{name}_")
    } else {
        name.to_string()
    }
}

fn mangle_rust(name: &str) -> String {
    if RUST_KEYWORDS.contains(&name) {
        format!("r#{name}")
    } else {
        name.to_string()
    }
}

fn mangle_csharp(name: &str) -> String {
    if CSHARP_KEYWORDS.contains(&name) {
        format!("@{name}")
    } else {
        name.to_string()
    }
}
