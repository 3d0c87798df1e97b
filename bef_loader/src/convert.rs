// Copyright 2026 the BEF Loader Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! BEF-to-program conversion.
//!
//! Conversion runs in three phases. The first phase scans the section table
//! and decodes every section except Functions, keeping strings, types,
//! locations and attributes keyed by their offsets or indices. The second
//! phase decodes every function body into a region, leaving nested-region
//! slots as pending references. The third phase resolves every function as
//! either a program-level function or a nested region of exactly one
//! instruction, and fails if anything is left unresolved.
//!
//! Conversion is atomic: either a fully-linked [`Program`] is returned, or an
//! error is. Non-fatal degradations (missing optional sections, attribute
//! slots that cannot be resolved) are accumulated as [`Warning`]s.

use alloc::borrow::Cow;
use alloc::format;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use hashbrown::HashMap;

use crate::attr::{AttrValue, MISSING_ATTRIBUTE, decode_attribute};
use crate::format::{DecodeError, Reader};
use crate::program::{
    Attribute, Def, FuncRef, Function, FunctionKind, Instruction, Location, Program, Region,
    RegionId, Register,
};
use crate::sections::{BEF_VERSION, KERNEL_ENTRY_ALIGNMENT, SectionId, SectionTable};
use crate::types::Type;

/// An owned source location attached to diagnostics.
///
/// `line == 0 && column == 0` stands for "the buffer itself" (used when a
/// failure has no decoded location, e.g. a malformed header).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceLocation {
    /// Filename (or the caller-provided buffer name).
    pub filename: String,
    /// 1-based line, or 0.
    pub line: u32,
    /// 1-based column, or 0.
    pub column: u32,
}

impl SourceLocation {
    /// Converts a decoded [`Location`] into an owned diagnostic location.
    #[must_use]
    pub fn from_location(location: &Location<'_>) -> Option<Self> {
        match *location {
            Location::File {
                filename,
                line,
                column,
            } => Some(Self {
                filename: String::from(filename),
                line,
                column,
            }),
            Location::Unknown => None,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 && self.column == 0 {
            f.write_str(&self.filename)
        } else {
            write!(f, "{}:{}:{}", self.filename, self.line, self.column)
        }
    }
}

/// What went wrong during conversion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConvertErrorKind {
    /// The 2-byte magic prefix is missing or wrong.
    MalformedHeader,
    /// A section payload is truncated or garbled. `section` is `None` when
    /// the failure happened in the header of an unrecognized section.
    MalformedSection {
        /// The section that failed to decode.
        section: Option<SectionId>,
        /// Short description of the failure.
        detail: &'static str,
    },
    /// A dangling offset or index reference into a table.
    UnresolvedReference {
        /// The referenced section.
        section: SectionId,
        /// The dangling offset or index.
        offset: u64,
    },
    /// A register was bound by a second definition.
    RedefinedRegister {
        /// The register index within its function.
        register: u32,
    },
    /// An attribute kind or type code is not recognized.
    UnknownAttributeEncoding {
        /// The offending encoded value.
        encoded: u64,
    },
    /// An integer/float width with no defined attribute encoding.
    UnsupportedBitWidth {
        /// The offending bit width.
        width: u64,
    },
    /// A nested-region reference could not be linked, or an anonymous body
    /// was not consumed exactly once.
    UnlinkedNestedRegion {
        /// The function-index slot of the region.
        function_index: u32,
    },
}

impl fmt::Display for ConvertErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedHeader => f.write_str("invalid BEF file header"),
            Self::MalformedSection {
                section: Some(section),
                detail,
            } => write!(f, "malformed {} section: {detail}", section.name()),
            Self::MalformedSection {
                section: None,
                detail,
            } => write!(f, "malformed section header: {detail}"),
            Self::UnresolvedReference { section, offset } => write!(
                f,
                "unresolved reference into {} section ({offset})",
                section.name()
            ),
            Self::RedefinedRegister { register } => {
                write!(f, "redefinition of register {register}")
            }
            Self::UnknownAttributeEncoding { encoded } => {
                write!(f, "unknown attribute encoding {encoded:#x}")
            }
            Self::UnsupportedBitWidth { width } => {
                write!(f, "unsupported attribute bit width {width}")
            }
            Self::UnlinkedNestedRegion { function_index } => {
                write!(
                    f,
                    "nested region for function index {function_index} was not resolved"
                )
            }
        }
    }
}

/// A terminal conversion failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConvertError {
    /// What went wrong.
    pub kind: ConvertErrorKind,
    /// Where, when a location is available.
    pub location: Option<SourceLocation>,
}

impl ConvertError {
    pub(crate) fn malformed_header() -> Self {
        ConvertErrorKind::MalformedHeader.into()
    }

    pub(crate) fn malformed_scan(section: Option<SectionId>, cause: DecodeError) -> Self {
        ConvertErrorKind::MalformedSection {
            section,
            detail: cause.as_str(),
        }
        .into()
    }

    pub(crate) fn malformed(section: SectionId, detail: &'static str) -> Self {
        ConvertErrorKind::MalformedSection {
            section: Some(section),
            detail,
        }
        .into()
    }

    pub(crate) fn unresolved(section: SectionId, offset: u64) -> Self {
        ConvertErrorKind::UnresolvedReference { section, offset }.into()
    }

    pub(crate) fn redefined_register(register: u32) -> Self {
        ConvertErrorKind::RedefinedRegister { register }.into()
    }

    pub(crate) fn unknown_attribute_encoding(encoded: u64) -> Self {
        ConvertErrorKind::UnknownAttributeEncoding { encoded }.into()
    }

    pub(crate) fn unsupported_bit_width(width: u64) -> Self {
        ConvertErrorKind::UnsupportedBitWidth { width }.into()
    }

    pub(crate) fn unlinked(function_index: u32) -> Self {
        ConvertErrorKind::UnlinkedNestedRegion { function_index }.into()
    }

    /// Attaches `location` if no more precise location is recorded yet.
    #[must_use]
    pub(crate) fn at(mut self, location: &Location<'_>) -> Self {
        if self.location.is_none() {
            self.location = SourceLocation::from_location(location);
        }
        self
    }

    fn with_source(mut self, source: &str) -> Self {
        if self.location.is_none() {
            self.location = Some(SourceLocation {
                filename: String::from(source),
                line: 0,
                column: 0,
            });
        }
        self
    }
}

impl From<ConvertErrorKind> for ConvertError {
    fn from(kind: ConvertErrorKind) -> Self {
        Self {
            kind,
            location: None,
        }
    }
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{loc}: {}", self.kind),
            None => self.kind.fmt(f),
        }
    }
}

impl core::error::Error for ConvertError {}

/// A non-fatal degradation encountered during conversion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Warning {
    /// An optional section is absent; downstream tables use degraded
    /// defaults (untyped registers, generated attribute names, sentinel
    /// attribute values).
    MissingSection {
        /// The absent section.
        section: SectionId,
    },
    /// An attribute slot referenced an offset with no decoded attribute; the
    /// sentinel value was substituted.
    UnknownAttribute {
        /// The dangling Attributes-section offset.
        offset: u32,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSection { section } => {
                write!(f, "missing optional {} section", section.name())
            }
            Self::UnknownAttribute { offset } => {
                write!(f, "unknown attribute at offset {offset}, using sentinel")
            }
        }
    }
}

/// Converts a BEF byte buffer into a fully-resolved [`Program`].
///
/// `source` names the buffer for diagnostics (typically a file path).
/// Warnings are appended to `warnings` when a sink is provided and silently
/// dropped otherwise. The returned program borrows from `bytes`.
pub fn convert_bef<'bef>(
    bytes: &'bef [u8],
    source: &str,
    warnings: Option<&mut Vec<Warning>>,
) -> Result<Program<'bef>, ConvertError> {
    let mut local = Vec::new();
    let sink = match warnings {
        Some(sink) => sink,
        None => &mut local,
    };
    convert_inner(bytes, sink).map_err(|e| e.with_source(source))
}

fn convert_inner<'bef>(
    bytes: &'bef [u8],
    warnings: &mut Vec<Warning>,
) -> Result<Program<'bef>, ConvertError> {
    let sections = SectionTable::scan(bytes)?;

    let version = sections
        .get(SectionId::FormatVersion)
        .and_then(|payload| payload.first().copied())
        .ok_or_else(|| ConvertError::malformed(SectionId::FormatVersion, "missing version byte"))?;
    if version != BEF_VERSION {
        return Err(ConvertError::malformed(
            SectionId::FormatVersion,
            "unsupported format version",
        ));
    }

    for id in SectionId::OPTIONAL {
        if sections.get(id).is_none() {
            warnings.push(Warning::MissingSection { section: id });
        }
    }

    let mut converter = Converter {
        sections,
        bef: BefTables::default(),
    };
    converter.read_location_filenames()?;
    converter.read_location_positions()?;
    converter.read_strings()?;
    converter.read_types()?;
    converter.read_attributes(warnings)?;
    converter.read_kernel_names()?;
    converter.read_function_index()?;

    let bodies = converter.read_function_bodies(warnings)?;
    resolve(converter.bef, bodies)
}

/// The decoded flat tables of one BEF buffer (everything except Functions).
#[derive(Default)]
struct BefTables<'bef> {
    location_filenames: Vec<&'bef str>,
    location_positions: HashMap<u64, Location<'bef>>,
    strings: HashMap<u64, &'bef str>,
    attributes: HashMap<u32, AttrValue<'bef>>,
    kernel_names: Vec<&'bef str>,
    types: Vec<Type<'bef>>,
    function_index: Vec<IndexedFunction<'bef>>,
}

/// One FunctionIndex entry: signature, kind and body offset.
struct IndexedFunction<'bef> {
    offset: usize,
    name: &'bef str,
    kind: FunctionKind,
    arg_types: Vec<Type<'bef>>,
    result_types: Vec<Type<'bef>>,
}

impl IndexedFunction<'_> {
    /// Named entries become program-level functions; unnamed entries are
    /// nested region bodies.
    fn is_named(&self) -> bool {
        !self.name.is_empty()
    }
}

/// Reads a count-prefixed varint list.
fn read_index_list(r: &mut Reader<'_>) -> Result<Vec<u64>, DecodeError> {
    let count = r.read_uleb128_u64()?;
    let count = usize::try_from(count).map_err(|_| DecodeError::OutOfBounds)?;
    // Each item takes at least one byte; reject counts the input cannot hold.
    if count > r.bytes().len() - r.offset() {
        return Err(DecodeError::OutOfBounds);
    }
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(r.read_uleb128_u64()?);
    }
    Ok(items)
}

struct Converter<'bef> {
    sections: SectionTable<'bef>,
    bef: BefTables<'bef>,
}

impl<'bef> Converter<'bef> {
    fn read_location_filenames(&mut self) -> Result<(), ConvertError> {
        let mut r = Reader::new(self.sections.get_or_empty(SectionId::LocationFilenames));
        while !r.is_empty() {
            let s = r
                .read_null_str()
                .map_err(|e| ConvertError::malformed_scan(Some(SectionId::LocationFilenames), e))?;
            self.bef.location_filenames.push(s);
        }
        Ok(())
    }

    fn read_location_positions(&mut self) -> Result<(), ConvertError> {
        let section = SectionId::LocationPositions;
        let mut r = Reader::new(self.sections.get_or_empty(section));
        while !r.is_empty() {
            let offset = r.offset() as u64;
            let filename_index = r
                .read_uleb128_u64()
                .map_err(|e| ConvertError::malformed_scan(Some(section), e))?;
            let line = r
                .read_uleb128_u64()
                .map_err(|e| ConvertError::malformed_scan(Some(section), e))?;
            let column = r
                .read_uleb128_u64()
                .map_err(|e| ConvertError::malformed_scan(Some(section), e))?;

            let filename = usize::try_from(filename_index)
                .ok()
                .and_then(|i| self.bef.location_filenames.get(i).copied())
                .ok_or_else(|| {
                    ConvertError::unresolved(SectionId::LocationFilenames, filename_index)
                })?;
            let line = u32::try_from(line)
                .map_err(|_| ConvertError::malformed(section, "line number out of range"))?;
            let column = u32::try_from(column)
                .map_err(|_| ConvertError::malformed(section, "column number out of range"))?;
            self.bef.location_positions.insert(
                offset,
                Location::File {
                    filename,
                    line,
                    column,
                },
            );
        }
        Ok(())
    }

    fn read_strings(&mut self) -> Result<(), ConvertError> {
        let mut r = Reader::new(self.sections.get_or_empty(SectionId::Strings));
        while !r.is_empty() {
            let offset = r.offset() as u64;
            let s = r
                .read_null_str()
                .map_err(|e| ConvertError::malformed_scan(Some(SectionId::Strings), e))?;
            self.bef.strings.insert(offset, s);
        }
        Ok(())
    }

    /// Reads a section that is a count-prefixed list of Strings offsets.
    fn read_string_offsets(&self, section: SectionId) -> Result<Vec<&'bef str>, ConvertError> {
        let mut r = Reader::new(self.sections.get_or_empty(section));
        let offsets = read_index_list(&mut r)
            .map_err(|e| ConvertError::malformed_scan(Some(section), e))?;
        let mut out = Vec::with_capacity(offsets.len());
        for offset in offsets {
            let s = self
                .bef
                .strings
                .get(&offset)
                .copied()
                .ok_or_else(|| ConvertError::unresolved(SectionId::Strings, offset))?;
            out.push(s);
        }
        Ok(out)
    }

    fn read_types(&mut self) -> Result<(), ConvertError> {
        for spec in self.read_string_offsets(SectionId::Types)? {
            // A single unparsable spec fails the stage: types are
            // structurally load-bearing for everything downstream.
            let ty = Type::parse(spec).ok_or_else(|| {
                ConvertError::malformed(SectionId::Types, "unparsable type specification")
            })?;
            self.bef.types.push(ty);
        }
        Ok(())
    }

    fn read_kernel_names(&mut self) -> Result<(), ConvertError> {
        self.bef.kernel_names = self.read_string_offsets(SectionId::Kernels)?;
        Ok(())
    }

    fn read_attributes(&mut self, warnings: &mut Vec<Warning>) -> Result<(), ConvertError> {
        let Some(attribute_types) = self.sections.get(SectionId::AttributeTypes) else {
            // Absent index: every attribute slot degrades to the sentinel.
            return Ok(());
        };
        let attributes = self.sections.get_or_empty(SectionId::Attributes);

        let section = SectionId::AttributeTypes;
        let mut r = Reader::new(attribute_types);
        let count = r
            .read_uleb128_u64()
            .map_err(|e| ConvertError::malformed_scan(Some(section), e))?;
        for _ in 0..count {
            let offset = r
                .read_uleb128_u64()
                .map_err(|e| ConvertError::malformed_scan(Some(section), e))?;
            let encoded = r
                .read_uleb128_u64()
                .map_err(|e| ConvertError::malformed_scan(Some(section), e))?;
            let offset = u32::try_from(offset)
                .map_err(|_| ConvertError::malformed(section, "attribute offset out of range"))?;
            let value = decode_attribute(
                attributes,
                &self.bef.types,
                &self.bef.attributes,
                offset,
                encoded,
                warnings,
            )?;
            self.bef.attributes.insert(offset, value);
        }
        Ok(())
    }

    fn read_function_index(&mut self) -> Result<(), ConvertError> {
        let section = SectionId::FunctionIndex;
        let mut r = Reader::new(self.sections.get_or_empty(section));
        let count = r
            .read_uleb128_u64()
            .map_err(|e| ConvertError::malformed_scan(Some(section), e))?;
        for _ in 0..count {
            let kind = r
                .read_u8()
                .map_err(|e| ConvertError::malformed_scan(Some(section), e))?;
            let kind = FunctionKind::from_u8(kind)
                .ok_or_else(|| ConvertError::malformed(section, "unknown function kind"))?;
            let offset = r
                .read_uleb128_u64()
                .map_err(|e| ConvertError::malformed_scan(Some(section), e))?;
            let offset = usize::try_from(offset)
                .map_err(|_| ConvertError::malformed(section, "function offset out of range"))?;
            let name_offset = r
                .read_uleb128_u64()
                .map_err(|e| ConvertError::malformed_scan(Some(section), e))?;
            let name = self
                .bef
                .strings
                .get(&name_offset)
                .copied()
                .ok_or_else(|| ConvertError::unresolved(SectionId::Strings, name_offset))?;

            let mut read_types = |r: &mut Reader<'_>| -> Result<Vec<Type<'bef>>, ConvertError> {
                let indices = read_index_list(r)
                    .map_err(|e| ConvertError::malformed_scan(Some(section), e))?;
                let mut out = Vec::with_capacity(indices.len());
                for index in indices {
                    let ty = usize::try_from(index)
                        .ok()
                        .and_then(|i| self.bef.types.get(i).copied())
                        .ok_or_else(|| ConvertError::unresolved(SectionId::Types, index))?;
                    out.push(ty);
                }
                Ok(out)
            };
            let arg_types = read_types(&mut r)?;
            let result_types = read_types(&mut r)?;

            self.bef.function_index.push(IndexedFunction {
                offset,
                name,
                kind,
                arg_types,
                result_types,
            });
        }
        Ok(())
    }

    /// Decodes every non-external function body. Nested-region slots stay
    /// pending until [`resolve`].
    fn read_function_bodies(
        &self,
        warnings: &mut Vec<Warning>,
    ) -> Result<Vec<Option<Region<'bef>>>, ConvertError> {
        let functions = self.sections.get_or_empty(SectionId::Functions);

        // AttributeNames and RegisterTypes are consumed sequentially, one
        // table per decoded function, when present.
        let mut attr_names = self.sections.get(SectionId::AttributeNames).map(Reader::new);
        if let Some(r) = &mut attr_names {
            r.read_uleb128_u64()
                .map_err(|e| ConvertError::malformed_scan(Some(SectionId::AttributeNames), e))?;
        }
        let mut register_types = self.sections.get(SectionId::RegisterTypes).map(Reader::new);
        if let Some(r) = &mut register_types {
            r.read_uleb128_u64()
                .map_err(|e| ConvertError::malformed_scan(Some(SectionId::RegisterTypes), e))?;
        }

        let mut bodies = Vec::with_capacity(self.bef.function_index.len());
        for function in &self.bef.function_index {
            if function.kind == FunctionKind::External {
                bodies.push(None);
                continue;
            }
            let record = functions.get(function.offset..).ok_or_else(|| {
                ConvertError::unresolved(SectionId::Functions, function.offset as u64)
            })?;
            let decoder = BodyDecoder {
                bef: &self.bef,
                function,
                reader: Reader::new(record),
                location: Location::Unknown,
                registers: Vec::new(),
                kernel_table: Vec::new(),
                result_regs: Vec::new(),
            };
            bodies.push(Some(decoder.decode(
                &mut attr_names,
                &mut register_types,
                warnings,
            )?));
        }
        Ok(bodies)
    }
}

/// A kernel-table entry: byte offset into the instruction words plus the
/// operand count carried alongside it.
struct KernelEntry {
    offset: u32,
    num_operands: u32,
}

/// The 4-byte-aligned instruction words of one function record.
struct Words<'bef> {
    bytes: &'bef [u8],
}

impl<'bef> Words<'bef> {
    fn new(bytes: &'bef [u8]) -> Self {
        Self { bytes }
    }

    fn word_count(&self) -> usize {
        self.bytes.len() / KERNEL_ENTRY_ALIGNMENT
    }

    fn get(&self, index: u32) -> Result<u32, ConvertError> {
        let start = (index as usize)
            .checked_mul(KERNEL_ENTRY_ALIGNMENT)
            .ok_or_else(|| ConvertError::malformed(SectionId::Functions, "kernel entry overflow"))?;
        let end = start
            .checked_add(KERNEL_ENTRY_ALIGNMENT)
            .ok_or_else(|| ConvertError::malformed(SectionId::Functions, "kernel entry overflow"))?;
        let b = self.bytes.get(start..end).ok_or_else(|| {
            ConvertError::malformed(SectionId::Functions, "kernel entry out of bounds")
        })?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Rejects per-kernel counts larger than the whole words array.
    fn check_count(&self, count: u32) -> Result<u32, ConvertError> {
        if count as usize > self.word_count() {
            return Err(ConvertError::malformed(
                SectionId::Functions,
                "kernel entry count exceeds instruction words",
            ));
        }
        Ok(count)
    }
}

/// A cursor over the words of a single kernel entry.
struct KernelCursor<'w, 'bef> {
    words: &'w Words<'bef>,
    index: u32,
}

impl KernelCursor<'_, '_> {
    fn next(&mut self) -> Result<u32, ConvertError> {
        let v = self.words.get(self.index)?;
        self.index += 1;
        Ok(v)
    }
}

/// Decodes one function record into a [`Region`].
struct BodyDecoder<'c, 'bef> {
    bef: &'c BefTables<'bef>,
    function: &'c IndexedFunction<'bef>,
    reader: Reader<'bef>,
    location: Location<'bef>,
    registers: Vec<Register<'bef>>,
    kernel_table: Vec<KernelEntry>,
    result_regs: Vec<u32>,
}

impl<'bef> BodyDecoder<'_, 'bef> {
    fn decode(
        mut self,
        attr_names: &mut Option<Reader<'bef>>,
        register_types: &mut Option<Reader<'bef>>,
        warnings: &mut Vec<Warning>,
    ) -> Result<Region<'bef>, ConvertError> {
        let section = SectionId::Functions;

        // Function location first, so later failures can carry it.
        let location_offset = self
            .reader
            .read_uleb128_u64()
            .map_err(|_| ConvertError::malformed(section, "truncated function location"))?;
        self.location = *self
            .bef
            .location_positions
            .get(&location_offset)
            .ok_or_else(|| ConvertError::unresolved(SectionId::LocationPositions, location_offset))?;

        self.decode_body(attr_names, register_types, warnings)
            .map_err(|e| e.at(&self.location))
    }

    fn decode_body(
        &mut self,
        attr_names: &mut Option<Reader<'bef>>,
        register_types: &mut Option<Reader<'bef>>,
        warnings: &mut Vec<Warning>,
    ) -> Result<Region<'bef>, ConvertError> {
        let section = SectionId::Functions;

        self.read_register_table(register_types)?;
        self.read_kernel_table()?;
        self.read_result_regs()?;

        // The per-function attribute-name table opens with a kernel count.
        if let Some(r) = attr_names {
            let count = r
                .read_uleb128_u64()
                .map_err(|e| ConvertError::malformed_scan(Some(SectionId::AttributeNames), e))?;
            if count != self.kernel_table.len() as u64 {
                return Err(ConvertError::malformed(
                    SectionId::AttributeNames,
                    "kernel count mismatch",
                ));
            }
        }

        // Instruction entries are 4-byte aligned relative to the record.
        self.reader
            .skip_alignment(KERNEL_ENTRY_ALIGNMENT)
            .map_err(|_| ConvertError::malformed(section, "truncated instruction words"))?;
        let words = Words::new(&self.reader.bytes()[self.reader.offset()..]);

        let start: usize = usize::from(!self.function.arg_types.is_empty());
        if start > self.kernel_table.len() {
            return Err(ConvertError::malformed(
                section,
                "missing arguments pseudo entry",
            ));
        }
        let real_count = (self.kernel_table.len() - start) as u32;

        let mut arguments = Vec::new();
        if start == 1 {
            arguments = self.decode_arguments_pseudo(&words, attr_names, real_count)?;
        }

        let mut instructions: Vec<Instruction<'bef>> = Vec::with_capacity(real_count as usize);
        for i in start..self.kernel_table.len() {
            let instr = self.decode_kernel(
                &words,
                i,
                attr_names,
                instructions.len() as u32,
                real_count,
                warnings,
            )?;
            instructions.push(instr);
        }

        // The implicit terminator consumes the declared result registers;
        // every one of them must be bound by now.
        for &reg in &self.result_regs {
            if self.registers[reg as usize].def.is_none() {
                return Err(ConvertError::malformed(
                    section,
                    "function result register is never defined",
                ));
            }
        }

        Ok(Region {
            location: self.location,
            arguments,
            registers: core::mem::take(&mut self.registers),
            instructions,
            results: core::mem::take(&mut self.result_regs),
        })
    }

    fn read_register_table(
        &mut self,
        register_types: &mut Option<Reader<'bef>>,
    ) -> Result<(), ConvertError> {
        let type_indices = match register_types {
            Some(r) => Some(
                read_index_list(r)
                    .map_err(|e| ConvertError::malformed_scan(Some(SectionId::RegisterTypes), e))?,
            ),
            None => None,
        };
        let use_counts = read_index_list(&mut self.reader)
            .map_err(|_| ConvertError::malformed(SectionId::Functions, "truncated register table"))?;

        if let Some(indices) = &type_indices {
            if indices.len() != use_counts.len() {
                return Err(ConvertError::malformed(
                    SectionId::RegisterTypes,
                    "register type list length mismatch",
                ));
            }
        }

        self.registers = Vec::with_capacity(use_counts.len());
        for (i, &uses) in use_counts.iter().enumerate() {
            let ty = match &type_indices {
                Some(indices) => {
                    let index = indices[i];
                    usize::try_from(index)
                        .ok()
                        .and_then(|t| self.bef.types.get(t).copied())
                        .ok_or_else(|| ConvertError::unresolved(SectionId::Types, index))?
                }
                None => Type::None,
            };
            let declared_uses = u32::try_from(uses).map_err(|_| {
                ConvertError::malformed(SectionId::Functions, "register use count out of range")
            })?;
            self.registers.push(Register {
                ty,
                declared_uses,
                used_by: Vec::new(),
                def: None,
            });
        }
        Ok(())
    }

    fn read_kernel_table(&mut self) -> Result<(), ConvertError> {
        let section = SectionId::Functions;
        let count = self
            .reader
            .read_uleb128_u64()
            .map_err(|_| ConvertError::malformed(section, "truncated kernel table"))?;
        for _ in 0..count {
            let offset = self
                .reader
                .read_uleb128_u64()
                .and_then(|v| u32::try_from(v).map_err(|_| DecodeError::OutOfBounds))
                .map_err(|_| ConvertError::malformed(section, "truncated kernel table"))?;
            let num_operands = self
                .reader
                .read_uleb128_u64()
                .and_then(|v| u32::try_from(v).map_err(|_| DecodeError::OutOfBounds))
                .map_err(|_| ConvertError::malformed(section, "truncated kernel table"))?;
            if offset as usize % KERNEL_ENTRY_ALIGNMENT != 0 {
                return Err(ConvertError::malformed(
                    section,
                    "misaligned kernel entry offset",
                ));
            }
            self.kernel_table.push(KernelEntry {
                offset,
                num_operands,
            });
        }
        Ok(())
    }

    fn read_result_regs(&mut self) -> Result<(), ConvertError> {
        let section = SectionId::Functions;
        for _ in 0..self.function.result_types.len() {
            let reg = self
                .reader
                .read_uleb128_u64()
                .ok()
                .and_then(|v| u32::try_from(v).ok())
                .filter(|&r| (r as usize) < self.registers.len())
                .ok_or_else(|| {
                    ConvertError::malformed(section, "result register index out of range")
                })?;
            self.result_regs.push(reg);
        }
        Ok(())
    }

    /// Reads the special scheduling marker byte for one kernel.
    fn read_special_marker(
        attr_names: &mut Option<Reader<'bef>>,
    ) -> Result<bool, ConvertError> {
        let Some(r) = attr_names else {
            return Ok(false);
        };
        match r.read_u8() {
            Ok(0) => Ok(false),
            Ok(1) => Ok(true),
            Ok(_) => Err(ConvertError::malformed(
                SectionId::AttributeNames,
                "unknown special attribute marker",
            )),
            Err(e) => Err(ConvertError::malformed_scan(
                Some(SectionId::AttributeNames),
                e,
            )),
        }
    }

    /// Binds a register to its single definition, snapshotting its declared
    /// use-by list.
    fn bind(
        &mut self,
        register: u32,
        def: Def,
        used_by: Vec<u32>,
    ) -> Result<(), ConvertError> {
        let slot = self
            .registers
            .get_mut(register as usize)
            .ok_or_else(|| {
                ConvertError::malformed(SectionId::Functions, "register index out of range")
            })?;
        if slot.def.is_some() {
            return Err(ConvertError::redefined_register(register));
        }
        if used_by.len() as u64 != u64::from(slot.declared_uses) {
            return Err(ConvertError::malformed(
                SectionId::Functions,
                "register use count mismatch",
            ));
        }
        slot.def = Some(def);
        slot.used_by = used_by;
        Ok(())
    }

    /// Reads one def-use list; entries index the materialized instruction
    /// list, with `real_count` addressing the implicit terminator.
    fn read_used_by(
        cursor: &mut KernelCursor<'_, '_>,
        count: u32,
        real_count: u32,
    ) -> Result<Vec<u32>, ConvertError> {
        let mut used_by = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let user = cursor.next()?;
            if user > real_count {
                return Err(ConvertError::malformed(
                    SectionId::Functions,
                    "def-use edge out of range",
                ));
            }
            used_by.push(user);
        }
        Ok(used_by)
    }

    /// The first kernel entry of a function with arguments is a
    /// pseudo-instruction that only defines the argument registers; it is
    /// not materialized. Returns the argument register indices.
    fn decode_arguments_pseudo(
        &mut self,
        words: &Words<'bef>,
        attr_names: &mut Option<Reader<'bef>>,
        real_count: u32,
    ) -> Result<Vec<u32>, ConvertError> {
        let section = SectionId::Functions;
        let entry = &self.kernel_table[0];
        let mut cursor = KernelCursor {
            words,
            index: entry.offset / KERNEL_ENTRY_ALIGNMENT as u32,
        };
        let _code = cursor.next()?;
        let _location = cursor.next()?;
        let num_operands = cursor.next()?;
        let num_attributes = cursor.next()?;
        let num_functions = cursor.next()?;
        let num_results = words.check_count(cursor.next()?)?;

        if num_operands != 0 || num_attributes != 0 || num_functions != 0 {
            return Err(ConvertError::malformed(
                section,
                "malformed arguments pseudo entry",
            ));
        }
        if num_results as usize != self.function.arg_types.len() {
            return Err(ConvertError::malformed(
                section,
                "arguments pseudo result count mismatch",
            ));
        }

        // The pseudo entry carries no attributes, so its marker must be
        // empty.
        if Self::read_special_marker(attr_names)? {
            return Err(ConvertError::malformed(
                SectionId::AttributeNames,
                "non-strict marker on arguments pseudo entry",
            ));
        }

        let mut used_by_counts = Vec::with_capacity(num_results as usize);
        for _ in 0..num_results {
            used_by_counts.push(words.check_count(cursor.next()?)?);
        }
        let mut arguments = Vec::with_capacity(num_results as usize);
        for _ in 0..num_results {
            arguments.push(cursor.next()?);
        }
        for (i, &reg) in arguments.iter().enumerate() {
            let used_by = Self::read_used_by(&mut cursor, used_by_counts[i], real_count)?;
            self.bind(
                reg,
                Def::Argument { index: i as u32 },
                used_by,
            )?;
            // Argument registers take the declared argument type; a typed
            // register table must agree.
            let declared = self.function.arg_types[i];
            let slot = &mut self.registers[reg as usize];
            if slot.ty == Type::None {
                slot.ty = declared;
            } else if slot.ty != declared {
                return Err(ConvertError::malformed(
                    section,
                    "argument register type mismatch",
                ));
            }
        }
        Ok(arguments)
    }

    /// Decodes one kernel entry into an [`Instruction`].
    fn decode_kernel(
        &mut self,
        words: &Words<'bef>,
        table_index: usize,
        attr_names: &mut Option<Reader<'bef>>,
        instr_index: u32,
        real_count: u32,
        warnings: &mut Vec<Warning>,
    ) -> Result<Instruction<'bef>, ConvertError> {
        let section = SectionId::Functions;
        let entry = &self.kernel_table[table_index];
        let mut cursor = KernelCursor {
            words,
            index: entry.offset / KERNEL_ENTRY_ALIGNMENT as u32,
        };

        let code = cursor.next()?;
        let location_offset = cursor.next()?;
        let num_operands = words.check_count(cursor.next()?)?;
        let num_attributes = words.check_count(cursor.next()?)?;
        let num_functions = words.check_count(cursor.next()?)?;
        let num_results = words.check_count(cursor.next()?)?;

        if num_operands != entry.num_operands {
            return Err(ConvertError::malformed(
                section,
                "kernel operand count mismatch",
            ));
        }

        let name = self
            .bef
            .kernel_names
            .get(code as usize)
            .copied()
            .ok_or_else(|| ConvertError::unresolved(SectionId::Kernels, u64::from(code)))?;
        let location = *self
            .bef
            .location_positions
            .get(&u64::from(location_offset))
            .ok_or_else(|| {
                ConvertError::unresolved(SectionId::LocationPositions, u64::from(location_offset))
            })?;

        let mut used_by_counts = Vec::with_capacity(num_results as usize);
        for _ in 0..num_results {
            used_by_counts.push(words.check_count(cursor.next()?)?);
        }

        // Operands must already be bound: definitions precede uses in decode
        // order.
        let mut operands = Vec::with_capacity(num_operands as usize);
        for _ in 0..num_operands {
            let reg = cursor.next()?;
            let slot = self.registers.get(reg as usize).ok_or_else(|| {
                ConvertError::malformed(section, "operand register index out of range")
            })?;
            if slot.def.is_none() {
                return Err(ConvertError::malformed(
                    section,
                    "operand register used before it is defined",
                ));
            }
            operands.push(reg);
        }

        let non_strict = Self::read_special_marker(attr_names)?;

        let mut attributes = Vec::with_capacity(num_attributes as usize);
        for i in 0..num_attributes {
            let value_offset = cursor.next()?;
            let name = match attr_names {
                Some(r) => {
                    let name_offset = r.read_uleb128_u64().map_err(|e| {
                        ConvertError::malformed_scan(Some(SectionId::AttributeNames), e)
                    })?;
                    match self.bef.strings.get(&name_offset) {
                        Some(s) => Cow::Borrowed(*s),
                        // A dangling name offset keeps the generated default.
                        None => Cow::Owned(format!("attr{i}")),
                    }
                }
                None => Cow::Owned(format!("attr{i}")),
            };
            let value = match self.bef.attributes.get(&value_offset) {
                Some(value) => value.clone(),
                None => {
                    warnings.push(Warning::UnknownAttribute {
                        offset: value_offset,
                    });
                    MISSING_ATTRIBUTE
                }
            };
            attributes.push(Attribute { name, value });
        }

        let mut func_refs = Vec::with_capacity(num_functions as usize);
        for _ in 0..num_functions {
            let index = cursor.next()?;
            let target = self
                .bef
                .function_index
                .get(index as usize)
                .ok_or_else(|| {
                    ConvertError::unresolved(SectionId::FunctionIndex, u64::from(index))
                })?;
            if target.is_named() {
                // Named functions are matched by symbol; no pending state.
                func_refs.push(FuncRef::Callee(target.name));
            } else {
                func_refs.push(FuncRef::Pending(index));
            }
        }

        let mut results = Vec::with_capacity(num_results as usize);
        for _ in 0..num_results {
            results.push(cursor.next()?);
        }
        for (i, &reg) in results.iter().enumerate() {
            let used_by = Self::read_used_by(&mut cursor, used_by_counts[i], real_count)?;
            self.bind(
                reg,
                Def::Result {
                    instruction: instr_index,
                    index: i as u32,
                },
                used_by,
            )?;
        }

        Ok(Instruction {
            name,
            location,
            operands,
            non_strict,
            attributes,
            func_refs,
            results,
        })
    }
}

/// Final fix-up pass: assembles program-level functions and links every
/// pending nested-region reference, failing if any region is left unresolved
/// or consumed more than once.
fn resolve<'bef>(
    bef: BefTables<'bef>,
    bodies: Vec<Option<Region<'bef>>>,
) -> Result<Program<'bef>, ConvertError> {
    let mut regions: Vec<Region<'bef>> = Vec::new();
    let mut region_of: Vec<Option<RegionId>> = Vec::with_capacity(bodies.len());
    for body in bodies {
        match body {
            Some(region) => {
                region_of.push(Some(RegionId(regions.len() as u32)));
                regions.push(region);
            }
            None => region_of.push(None),
        }
    }
    let mut consumed = vec![false; region_of.len()];

    // Top-level assembly: every named entry becomes a program function.
    let mut functions = Vec::new();
    for (i, entry) in bef.function_index.iter().enumerate() {
        if !entry.is_named() {
            continue;
        }
        match entry.kind {
            FunctionKind::Normal => {
                let id = region_of[i].ok_or_else(|| ConvertError::unlinked(i as u32))?;
                consumed[i] = true;
                let region = &regions[id.0 as usize];
                // Result types follow the registers the terminator returns.
                let result_types = region
                    .results
                    .iter()
                    .map(|&r| region.registers[r as usize].ty)
                    .collect();
                functions.push(Function {
                    name: entry.name,
                    kind: FunctionKind::Normal,
                    arg_types: entry.arg_types.clone(),
                    result_types,
                    body: Some(id),
                });
            }
            FunctionKind::External => {
                // Declared result types are taken verbatim: there is no body
                // to infer them from.
                functions.push(Function {
                    name: entry.name,
                    kind: FunctionKind::External,
                    arg_types: entry.arg_types.clone(),
                    result_types: entry.result_types.clone(),
                    body: None,
                });
            }
        }
    }

    // Nested-region linking: each pending slot consumes exactly one
    // anonymous body.
    for region_index in 0..regions.len() {
        for instr in &mut regions[region_index].instructions {
            for slot in &mut instr.func_refs {
                if let FuncRef::Pending(index) = *slot {
                    let i = index as usize;
                    let id = region_of
                        .get(i)
                        .copied()
                        .flatten()
                        .ok_or_else(|| ConvertError::unlinked(index))?;
                    if consumed[i] {
                        return Err(ConvertError::unlinked(index));
                    }
                    consumed[i] = true;
                    *slot = FuncRef::Region(id);
                }
            }
        }
    }

    // Atomicity: every decoded body must now have exactly one owner.
    for (i, id) in region_of.iter().enumerate() {
        if id.is_some() && !consumed[i] {
            return Err(ConvertError::unlinked(i as u32));
        }
    }

    Ok(Program { functions, regions })
}
