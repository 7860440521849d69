//! The language-agnostic FFI type tree.
//!
//! Types serialize as `"kind"`-tagged JSON objects: primitives are a bare
//! kind (`{"kind": "i32"}`), compound types add their payload fields. The
//! serialized form round-trips bit-equal through parse and re-serialize.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The fixed-size primitive set every source language maps into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveKind {
    Void,
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Isize,
    Usize,
}

impl PrimitiveKind {
    pub const ALL: &'static [Self] = &[
        Self::Void,
        Self::Bool,
        Self::I8,
        Self::I16,
        Self::I32,
        Self::I64,
        Self::U8,
        Self::U16,
        Self::U32,
        Self::U64,
        Self::F32,
        Self::F64,
        Self::Isize,
        Self::Usize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Bool => "bool",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Isize => "isize",
            Self::Usize => "usize",
        }
    }

    fn from_kind(kind: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.as_str() == kind)
    }

    /// The canonical C spelling, `<stdint.h>` vocabulary.
    pub fn c_name(&self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Bool => "_Bool",
            Self::I8 => "int8_t",
            Self::I16 => "int16_t",
            Self::I32 => "int32_t",
            Self::I64 => "int64_t",
            Self::U8 => "uint8_t",
            Self::U16 => "uint16_t",
            Self::U32 => "uint32_t",
            Self::U64 => "uint64_t",
            Self::F32 => "float",
            Self::F64 => "double",
            Self::Isize => "intptr_t",
            Self::Usize => "size_t",
        }
    }

    /// The canonical Rust spelling.
    pub fn rust_name(&self) -> &'static str {
        match self {
            Self::Void => "()",
            Self::Bool => "bool",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Isize => "isize",
            Self::Usize => "usize",
        }
    }

    /// Maps a C type name (stdint or classic spellings) back to a primitive.
    pub fn from_c_name(name: &str) -> Option<Self> {
        Some(match name {
            "void" => Self::Void,
            "_Bool" | "bool" => Self::Bool,
            "int8_t" | "signed char" | "char" => Self::I8,
            "int16_t" | "short" => Self::I16,
            "int32_t" | "int" => Self::I32,
            "int64_t" | "long long" | "long" => Self::I64,
            "uint8_t" | "unsigned char" => Self::U8,
            "uint16_t" | "unsigned short" => Self::U16,
            "uint32_t" | "unsigned int" | "unsigned" => Self::U32,
            "uint64_t" | "unsigned long long" | "unsigned long" => Self::U64,
            "float" => Self::F32,
            "double" => Self::F64,
            "intptr_t" | "ssize_t" | "ptrdiff_t" => Self::Isize,
            "size_t" | "uintptr_t" => Self::Usize,
            _ => return None,
        })
    }
}

/// A typed FFI description of a value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Type {
    Primitive(PrimitiveKind),
    Pointer { pointee: Box<Type>, nullable: bool, mutable: bool },
    Array { element: Box<Type>, length: Option<u64> },
    /// Named reference, definition resolved by context.
    Struct { name: String },
    FunctionPointer { signature: Box<Signature> },
}

impl Type {
    pub const VOID: Self = Self::Primitive(PrimitiveKind::Void);

    pub fn primitive(kind: PrimitiveKind) -> Self {
        Self::Primitive(kind)
    }

    pub fn pointer_to(pointee: Type, mutable: bool) -> Self {
        Self::Pointer { pointee: Box::new(pointee), nullable: false, mutable }
    }

    /// Parses a C type spelling as found in generated headers; pointers and
    /// `const` qualifiers are understood, anything unknown becomes a named
    /// struct reference.
    pub fn from_c_declaration(spelling: &str) -> Self {
        let mut spelling = spelling.trim();
        let mut depth = 0usize;
        while let Some(stripped) = spelling.strip_suffix('*') {
            spelling = stripped.trim_end();
            depth += 1;
        }
        let mutable = !spelling.starts_with("const ");
        let base = spelling.strip_prefix("const ").unwrap_or(spelling).trim();
        let mut ty = match PrimitiveKind::from_c_name(base) {
            Some(kind) => Self::Primitive(kind),
            None => Self::Struct { name: base.trim_start_matches("struct ").to_string() },
        };
        for level in 0..depth {
            // only the innermost level carries the const qualifier
            let mutable = if level == 0 { mutable } else { true };
            ty = Self::Pointer { pointee: Box::new(ty), nullable: true, mutable };
        }
        ty
    }

    /// Parses a Rust type spelling as written in `extern "C"` declarations.
    /// Unknown names become named struct references.
    pub fn from_rust_declaration(spelling: &str) -> Self {
        let s = spelling.trim();
        if s == "()" {
            return Self::VOID;
        }
        if let Some(rest) = s.strip_prefix("*mut ") {
            return Self::Pointer {
                pointee: Box::new(Self::from_rust_declaration(rest)),
                nullable: true,
                mutable: true,
            };
        }
        if let Some(rest) = s.strip_prefix("*const ") {
            return Self::Pointer {
                pointee: Box::new(Self::from_rust_declaration(rest)),
                nullable: true,
                mutable: false,
            };
        }
        match PrimitiveKind::ALL.iter().find(|p| p.rust_name() == s) {
            Some(&kind) => Self::Primitive(kind),
            None => Self::Struct { name: s.to_string() },
        }
    }

    /// Renders the type for a C return position; dynamic and sized arrays
    /// both decay to the element pointer.
    pub fn c_type(&self) -> String {
        match self {
            Self::Primitive(kind) => kind.c_name().to_string(),
            Self::Pointer { pointee, mutable, .. } => {
                if *mutable {
                    format!("{}*", pointee.c_type())
                } else {
                    format!("const {}*", pointee.c_type())
                }
            }
            Self::Array { element, .. } => format!("{}*", element.c_type()),
            Self::Struct { name } => name.clone(),
            Self::FunctionPointer { signature } => signature.c_function_pointer(""),
        }
    }

    /// Renders a C parameter declaration for `ident`, keeping known array
    /// lengths as `T ident[N]`.
    pub fn c_decl(&self, ident: &str) -> String {
        match self {
            Self::Array { element, length: Some(len) } => {
                format!("{} {ident}[{len}]", element.c_type())
            }
            Self::Array { element, length: None } => format!("{}* {ident}", element.c_type()),
            Self::FunctionPointer { signature } => signature.c_function_pointer(ident),
            other => format!("{} {ident}", other.c_type()),
        }
    }

    /// Renders the type in Rust-native spelling.
    pub fn rust_type(&self) -> String {
        match self {
            Self::Primitive(kind) => kind.rust_name().to_string(),
            Self::Pointer { pointee, mutable, .. } => {
                if *mutable {
                    format!("*mut {}", pointee.rust_type())
                } else {
                    format!("*const {}", pointee.rust_type())
                }
            }
            Self::Array { element, length: Some(len) } => {
                format!("[{}; {len}]", element.rust_type())
            }
            Self::Array { element, length: None } => format!("*const {}", element.rust_type()),
            Self::Struct { name } => name.clone(),
            Self::FunctionPointer { signature } => {
                let params: Vec<_> =
                    signature.parameters.iter().map(|p| p.ty.rust_type()).collect();
                if signature.return_type == Self::VOID {
                    format!("extern \"C\" fn({})", params.join(", "))
                } else {
                    format!(
                        "extern \"C\" fn({}) -> {}",
                        params.join(", "),
                        signature.return_type.rust_type()
                    )
                }
            }
        }
    }
}

/// Direction of a parameter as seen from the callee.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    In,
    Out,
    Inout,
}

/// Calling convention of an exported function.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallingConvention {
    #[default]
    Cdecl,
    Stdcall,
    Fastcall,
    Thiscall,
}

impl fmt::Display for CallingConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Cdecl => "cdecl",
            Self::Stdcall => "stdcall",
            Self::Fastcall => "fastcall",
            Self::Thiscall => "thiscall",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Type,
    #[serde(default)]
    pub direction: Direction,
}

impl Parameter {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self { name: name.into(), ty, direction: Direction::In }
    }
}

/// A function signature: parameters, return type and calling convention.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    #[serde(rename = "params", default)]
    pub parameters: Vec<Parameter>,
    #[serde(rename = "return", default = "void_type")]
    pub return_type: Type,
    #[serde(rename = "convention", default)]
    pub calling_convention: CallingConvention,
}

fn void_type() -> Type {
    Type::VOID
}

impl Default for Signature {
    fn default() -> Self {
        Self {
            parameters: Vec::new(),
            return_type: Type::VOID,
            calling_convention: CallingConvention::Cdecl,
        }
    }
}

impl Signature {
    /// C parameter list, `void` when empty.
    pub fn c_params(&self) -> String {
        if self.parameters.is_empty() {
            return "void".to_string();
        }
        self.parameters
            .iter()
            .map(|p| p.ty.c_decl(&p.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn c_function_pointer(&self, ident: &str) -> String {
        format!("{} (*{ident})({})", self.return_type.c_type(), self.c_params())
    }
}

// `Type` serializes through a flat repr so that primitives stay payload-free
// and unknown optional fields are ignored on the way in.
#[derive(Serialize, Deserialize)]
struct TypeRepr {
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pointee: Option<Box<TypeRepr>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nullable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mutable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    element: Option<Box<TypeRepr>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    signature: Option<Box<Signature>>,
}

impl TypeRepr {
    fn bare(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            pointee: None,
            nullable: None,
            mutable: None,
            element: None,
            length: None,
            name: None,
            signature: None,
        }
    }
}

impl From<&Type> for TypeRepr {
    fn from(ty: &Type) -> Self {
        match ty {
            Type::Primitive(kind) => Self::bare(kind.as_str()),
            Type::Pointer { pointee, nullable, mutable } => Self {
                pointee: Some(Box::new(pointee.as_ref().into())),
                nullable: Some(*nullable),
                mutable: Some(*mutable),
                ..Self::bare("ptr")
            },
            Type::Array { element, length } => Self {
                element: Some(Box::new(element.as_ref().into())),
                length: *length,
                ..Self::bare("array")
            },
            Type::Struct { name } => Self { name: Some(name.clone()), ..Self::bare("struct") },
            Type::FunctionPointer { signature } => {
                Self { signature: Some(signature.clone()), ..Self::bare("fn_ptr") }
            }
        }
    }
}

impl TypeRepr {
    fn into_type(self) -> Result<Type, String> {
        if let Some(kind) = PrimitiveKind::from_kind(&self.kind) {
            return Ok(Type::Primitive(kind));
        }
        match self.kind.as_str() {
            "ptr" => Ok(Type::Pointer {
                pointee: Box::new(
                    self.pointee.ok_or_else(|| "ptr type without pointee".to_string())?.into_type()?,
                ),
                nullable: self.nullable.unwrap_or(false),
                mutable: self.mutable.unwrap_or(false),
            }),
            "array" => Ok(Type::Array {
                element: Box::new(
                    self.element
                        .ok_or_else(|| "array type without element".to_string())?
                        .into_type()?,
                ),
                length: self.length,
            }),
            "struct" => Ok(Type::Struct {
                name: self.name.ok_or_else(|| "struct type without name".to_string())?,
            }),
            "fn_ptr" => Ok(Type::FunctionPointer {
                signature: self
                    .signature
                    .ok_or_else(|| "fn_ptr type without signature".to_string())?,
            }),
            other => Err(format!("unknown type kind `{other}`")),
        }
    }
}

impl Serialize for Type {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        TypeRepr::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Type {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        TypeRepr::deserialize(deserializer)?.into_type().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_types() -> Vec<Type> {
        vec![
            Type::Primitive(PrimitiveKind::I32),
            Type::Primitive(PrimitiveKind::Void),
            Type::pointer_to(Type::Primitive(PrimitiveKind::U8), false),
            Type::Pointer {
                pointee: Box::new(Type::Struct { name: "Context".to_string() }),
                nullable: true,
                mutable: true,
            },
            Type::Array { element: Box::new(Type::Primitive(PrimitiveKind::F64)), length: Some(4) },
            Type::Array { element: Box::new(Type::Primitive(PrimitiveKind::U8)), length: None },
            Type::FunctionPointer {
                signature: Box::new(Signature {
                    parameters: vec![Parameter::new("x", Type::Primitive(PrimitiveKind::I64))],
                    return_type: Type::Primitive(PrimitiveKind::Bool),
                    calling_convention: CallingConvention::Cdecl,
                }),
            },
        ]
    }

    #[test]
    fn types_roundtrip_bit_equal() {
        for ty in sample_types() {
            let json = serde_json::to_string(&ty).unwrap();
            let parsed: Type = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed, ty);
            let rejson = serde_json::to_string(&parsed).unwrap();
            assert_eq!(rejson, json);
        }
    }

    #[test]
    fn primitives_serialize_without_payload() {
        let json = serde_json::to_value(Type::Primitive(PrimitiveKind::Usize)).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "usize" }));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = serde_json::from_str::<Type>(r#"{ "kind": "quaternion" }"#).unwrap_err();
        assert!(err.to_string().contains("unknown type kind `quaternion`"));
    }

    #[test]
    fn unknown_optional_fields_are_ignored() {
        let parsed: Type =
            serde_json::from_str(r#"{ "kind": "i32", "comment": "ignored" }"#).unwrap();
        assert_eq!(parsed, Type::Primitive(PrimitiveKind::I32));
    }

    #[test]
    fn c_rendering() {
        let ptr = Type::pointer_to(Type::Primitive(PrimitiveKind::U8), false);
        assert_eq!(ptr.c_type(), "const uint8_t*");
        let arr =
            Type::Array { element: Box::new(Type::Primitive(PrimitiveKind::I32)), length: Some(3) };
        assert_eq!(arr.c_decl("xs"), "int32_t xs[3]");
        let dynamic =
            Type::Array { element: Box::new(Type::Primitive(PrimitiveKind::I32)), length: None };
        assert_eq!(dynamic.c_decl("xs"), "int32_t* xs");
    }

    #[test]
    fn rust_rendering() {
        let ptr = Type::pointer_to(Type::Primitive(PrimitiveKind::U8), true);
        assert_eq!(ptr.rust_type(), "*mut u8");
        let konst = Type::pointer_to(Type::Primitive(PrimitiveKind::U8), false);
        assert_eq!(konst.rust_type(), "*const u8");
        assert_eq!(Type::VOID.rust_type(), "()");
    }

    #[test]
    fn parses_c_declarations() {
        assert_eq!(
            Type::from_c_declaration("const char*"),
            Type::Pointer {
                pointee: Box::new(Type::Primitive(PrimitiveKind::I8)),
                nullable: true,
                mutable: false,
            }
        );
        assert_eq!(Type::from_c_declaration("int32_t"), Type::Primitive(PrimitiveKind::I32));
        assert_eq!(
            Type::from_c_declaration("struct widget"),
            Type::Struct { name: "widget".to_string() }
        );
    }
}
