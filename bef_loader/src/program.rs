// Copyright 2026 the BEF Loader Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The decoded, fully-resolved program representation.
//!
//! The IR is a set of flat arenas addressed by index: [`Program`] owns every
//! [`Region`]; regions refer to registers and instructions by position;
//! nested regions and def-use edges are index references rather than owned
//! pointers. Everything is immutable once a [`Program`] is returned, so the
//! whole structure is safe to read from multiple threads without further
//! synchronization.
//!
//! String data (function names, opcode names, string attributes, opaque type
//! specs) is borrowed from the input buffer: a `Program<'bef>` cannot outlive
//! the bytes it was decoded from.

use alloc::borrow::Cow;
use alloc::vec::Vec;
use core::fmt;

use crate::attr::AttrValue;
use crate::types::Type;

/// Index of a [`Region`] within [`Program::regions`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RegionId(pub u32);

/// A fully-resolved program: the ordered set of named functions plus the
/// arena of all region bodies (top-level and nested).
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Program<'bef> {
    /// Named functions, in function-index order.
    pub functions: Vec<Function<'bef>>,
    /// Arena of all region bodies. Each region is owned by exactly one
    /// function body or one instruction nested-region slot.
    pub regions: Vec<Region<'bef>>,
}

impl<'bef> Program<'bef> {
    /// Returns the region for `id`.
    #[must_use]
    pub fn region(&self, id: RegionId) -> Option<&Region<'bef>> {
        self.regions.get(id.0 as usize)
    }

    /// Returns the named function called `name`.
    #[must_use]
    pub fn function(&self, name: &str) -> Option<&Function<'bef>> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// How a function is realized.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FunctionKind {
    /// A function with an encoded body.
    Normal,
    /// A native/host function declared by signature only; it has no body.
    External,
}

impl FunctionKind {
    /// Decodes the 1-byte function-kind tag.
    #[must_use]
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Normal),
            1 => Some(Self::External),
            _ => None,
        }
    }
}

/// A named, externally-visible function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Function<'bef> {
    /// Function name. Never empty: anonymous bodies only appear as nested
    /// regions, not as program-level functions.
    pub name: &'bef str,
    /// Function kind.
    pub kind: FunctionKind,
    /// Declared argument types.
    pub arg_types: Vec<Type<'bef>>,
    /// Result types. Inferred from the bound result registers for
    /// [`FunctionKind::Normal`], declared verbatim for
    /// [`FunctionKind::External`].
    pub result_types: Vec<Type<'bef>>,
    /// The function body; `None` exactly for [`FunctionKind::External`].
    pub body: Option<RegionId>,
}

/// An ordered instruction list with argument registers and an implicit
/// terminator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Region<'bef> {
    /// Source location of the owning function body.
    pub location: Location<'bef>,
    /// Registers bound to the owner's declared arguments, in order
    /// (indices into [`Region::registers`]).
    pub arguments: Vec<u32>,
    /// Register table of this region.
    pub registers: Vec<Register<'bef>>,
    /// Instructions in execution order.
    pub instructions: Vec<Instruction<'bef>>,
    /// The implicit terminator: result registers in declared order
    /// (indices into [`Region::registers`]).
    pub results: Vec<u32>,
}

/// The single definition site of a register.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Def {
    /// Bound to a region argument.
    Argument {
        /// Argument position.
        index: u32,
    },
    /// Bound to an instruction result.
    Result {
        /// Index into the owning region's instruction list.
        instruction: u32,
        /// Result position within that instruction.
        index: u32,
    },
}

/// A single-assignment value slot scoped to one region.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Register<'bef> {
    /// Declared type, or [`Type::None`] when the optional RegisterTypes
    /// section was absent.
    pub ty: Type<'bef>,
    /// Declared use count from the register table.
    pub declared_uses: u32,
    /// Consumers of this register: indices into the owning region's
    /// instruction list. `instructions.len()` addresses the implicit
    /// terminator.
    pub used_by: Vec<u32>,
    /// The definition that bound this register, if any.
    pub def: Option<Def>,
}

/// One decoded instruction ("kernel" invocation).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instruction<'bef> {
    /// Opcode name from the kernel-name table.
    pub name: &'bef str,
    /// Source location.
    pub location: Location<'bef>,
    /// Operand registers (indices into the owning region's register table).
    pub operands: Vec<u32>,
    /// Non-strict scheduling marker. Decoded as a tag only; its semantics
    /// belong to the execution engine.
    pub non_strict: bool,
    /// Named attribute values.
    pub attributes: Vec<Attribute<'bef>>,
    /// Function-reference slots: callee symbols and nested regions.
    pub func_refs: Vec<FuncRef<'bef>>,
    /// Result registers (indices into the owning region's register table).
    pub results: Vec<u32>,
}

/// A named attribute on an instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attribute<'bef> {
    /// Attribute name. Borrowed when the AttributeNames section names the
    /// slot, otherwise a generated `attrN` default.
    pub name: Cow<'bef, str>,
    /// Attribute value.
    pub value: AttrValue<'bef>,
}

/// A function-reference slot on an instruction.
///
/// Each slot is either a by-name callee reference or an owned nested region;
/// the two are mutually exclusive per slot. [`FuncRef::Pending`] only exists
/// while decoding and never survives into a returned [`Program`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FuncRef<'bef> {
    /// A reference to a named function, matched by symbol.
    Callee(&'bef str),
    /// An owned nested region.
    Region(RegionId),
    /// A not-yet-resolved nested region, keyed by its function-index slot.
    Pending(u32),
}

/// A source location, or the lack of one.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Location<'bef> {
    /// A file/line/column position.
    File {
        /// Filename from the location-filenames table.
        filename: &'bef str,
        /// 1-based line.
        line: u32,
        /// 1-based column.
        column: u32,
    },
    /// No recorded location.
    Unknown,
}

impl fmt::Display for Location<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File {
                filename,
                line,
                column,
            } => write!(f, "{filename}:{line}:{column}"),
            Self::Unknown => f.write_str("<unknown>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;
    use alloc::vec;

    #[test]
    fn function_lookup_by_name() {
        let program = Program {
            functions: vec![
                Function {
                    name: "main",
                    kind: FunctionKind::Normal,
                    arg_types: vec![],
                    result_types: vec![Type::I32],
                    body: Some(RegionId(0)),
                },
                Function {
                    name: "native_add",
                    kind: FunctionKind::External,
                    arg_types: vec![Type::I32, Type::I32],
                    result_types: vec![Type::I32],
                    body: None,
                },
            ],
            regions: vec![Region {
                location: Location::Unknown,
                arguments: vec![],
                registers: vec![],
                instructions: vec![],
                results: vec![],
            }],
        };
        assert_eq!(program.function("native_add").map(|f| f.kind), Some(FunctionKind::External));
        assert!(program.function("missing").is_none());
        assert!(program.region(RegionId(0)).is_some());
        assert!(program.region(RegionId(1)).is_none());
    }

    #[test]
    fn location_display() {
        let loc = Location::File {
            filename: "model.mlir",
            line: 12,
            column: 3,
        };
        assert_eq!(loc.to_string(), "model.mlir:12:3");
        assert_eq!(Location::Unknown.to_string(), "<unknown>");
    }
}
