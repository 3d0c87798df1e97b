// Copyright 2026 the BEF Loader Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Value types and the textual type-specification parser.
//!
//! The Types section stores each type as a string; parsing turns it into a
//! [`Type`]. The grammar is deliberately small: the primitive integer/float
//! spellings, `none` for the untyped placeholder, and `!`-prefixed
//! dialect-specific types kept as opaque spec strings.

use core::fmt;

/// A decoded value type.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Type<'bef> {
    /// 1-bit integer.
    I1,
    /// 32-bit integer.
    I32,
    /// 64-bit integer.
    I64,
    /// 16-bit float.
    F16,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
    /// The untyped placeholder, used when no type information was recorded.
    None,
    /// A dialect-specific type, kept as its textual spec (e.g. `!hex.chain`).
    Opaque(&'bef str),
}

impl<'bef> Type<'bef> {
    /// Parses a textual type specification.
    #[must_use]
    pub fn parse(spec: &'bef str) -> Option<Self> {
        match spec {
            "i1" => Some(Self::I1),
            "i32" => Some(Self::I32),
            "i64" => Some(Self::I64),
            "f16" => Some(Self::F16),
            "f32" => Some(Self::F32),
            "f64" => Some(Self::F64),
            "none" => Some(Self::None),
            _ => {
                let body = spec.strip_prefix('!')?;
                let mut parts = body.split('.');
                // At least `!dialect.name`.
                let (first, second) = (parts.next()?, parts.next()?);
                for part in [first, second].into_iter().chain(parts) {
                    let mut chars = part.chars();
                    let head = chars.next()?;
                    if !(head.is_ascii_alphabetic() || head == '_') {
                        return None;
                    }
                    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
                        return None;
                    }
                }
                Some(Self::Opaque(spec))
            }
        }
    }

    /// Decodes a primitive type code (Type attributes, dense-tensor element
    /// types).
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::I1),
            1 => Some(Self::I32),
            2 => Some(Self::I64),
            3 => Some(Self::F16),
            4 => Some(Self::F32),
            5 => Some(Self::F64),
            _ => None,
        }
    }

    /// Returns the primitive type code, if this is a primitive.
    #[must_use]
    pub fn code(self) -> Option<u8> {
        match self {
            Self::I1 => Some(0),
            Self::I32 => Some(1),
            Self::I64 => Some(2),
            Self::F16 => Some(3),
            Self::F32 => Some(4),
            Self::F64 => Some(5),
            Self::None | Self::Opaque(_) => None,
        }
    }

    /// Returns the integer bit width, if this is an integer type.
    #[must_use]
    pub fn integer_width(self) -> Option<u32> {
        match self {
            Self::I1 => Some(1),
            Self::I32 => Some(32),
            Self::I64 => Some(64),
            _ => None,
        }
    }

    /// Returns the float bit width, if this is a float type.
    #[must_use]
    pub fn float_width(self) -> Option<u32> {
        match self {
            Self::F16 => Some(16),
            Self::F32 => Some(32),
            Self::F64 => Some(64),
            _ => None,
        }
    }
}

impl fmt::Display for Type<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I1 => f.write_str("i1"),
            Self::I32 => f.write_str("i32"),
            Self::I64 => f.write_str("i64"),
            Self::F16 => f.write_str("f16"),
            Self::F32 => f.write_str("f32"),
            Self::F64 => f.write_str("f64"),
            Self::None => f.write_str("none"),
            Self::Opaque(spec) => f.write_str(spec),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_primitives() {
        assert_eq!(Type::parse("i1"), Some(Type::I1));
        assert_eq!(Type::parse("i32"), Some(Type::I32));
        assert_eq!(Type::parse("i64"), Some(Type::I64));
        assert_eq!(Type::parse("f32"), Some(Type::F32));
        assert_eq!(Type::parse("none"), Some(Type::None));
    }

    #[test]
    fn parses_dialect_types() {
        assert_eq!(Type::parse("!hex.chain"), Some(Type::Opaque("!hex.chain")));
        assert_eq!(
            Type::parse("!corert.tensor_handle"),
            Some(Type::Opaque("!corert.tensor_handle"))
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(Type::parse(""), None);
        assert_eq!(Type::parse("i33"), None);
        assert_eq!(Type::parse("!chain"), None);
        assert_eq!(Type::parse("!hex."), None);
        assert_eq!(Type::parse("!hex.cha in"), None);
        assert_eq!(Type::parse("!9hex.chain"), None);
    }

    #[test]
    fn code_roundtrip() {
        for code in 0..6u8 {
            let ty = Type::from_code(code).unwrap();
            assert_eq!(ty.code(), Some(code));
        }
        assert_eq!(Type::from_code(6), None);
        assert_eq!(Type::None.code(), None);
    }

    #[test]
    fn display_matches_parse() {
        use alloc::string::ToString;
        for spec in ["i1", "i32", "i64", "f16", "f32", "f64", "none", "!hex.chain"] {
            let ty = Type::parse(spec).unwrap();
            assert_eq!(ty.to_string(), spec);
        }
    }
}
