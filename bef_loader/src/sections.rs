// Copyright 2026 the BEF Loader Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The BEF section container.
//!
//! A BEF buffer is a 2-byte magic prefix followed by a concatenation of
//! `(id: u8, length: varint, payload)` sections. [`SectionTable`] splits the
//! buffer into per-id byte ranges in a single scan. Unknown ids are skipped
//! (producers newer than this decoder may emit sections we do not know), and
//! a repeated known id overwrites the earlier payload.

use crate::convert::ConvertError;
use crate::format::Reader;

/// The 2-byte magic prefix of every BEF buffer.
pub const BEF_MAGIC: [u8; 2] = [0x0b, 0xef];

/// The format version this decoder understands (FormatVersion payload).
pub const BEF_VERSION: u8 = 0;

/// Instruction entries are addressed as 32-bit words at this alignment.
pub const KERNEL_ENTRY_ALIGNMENT: usize = 4;

/// Identifiers of the known BEF sections.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SectionId {
    /// Single-byte format version; must equal [`BEF_VERSION`].
    FormatVersion = 1,
    /// NUL-terminated filename strings, referenced by index.
    LocationFilenames = 2,
    /// `(filename index, line, column)` varint triples, referenced by offset.
    LocationPositions = 3,
    /// NUL-terminated strings, referenced by byte offset.
    Strings = 4,
    /// Typed constant payloads, referenced by byte offset.
    Attributes = 5,
    /// Kernel (opcode) names as string offsets, referenced by index.
    Kernels = 6,
    /// Type specifications as string offsets, referenced by index.
    Types = 7,
    /// Function signatures and body offsets.
    FunctionIndex = 8,
    /// Function bodies: register tables, kernel tables and instruction words.
    Functions = 9,
    /// `(offset, encoded type)` index of the Attributes section (optional).
    AttributeTypes = 10,
    /// Per-kernel attribute names and scheduling markers (optional).
    AttributeNames = 11,
    /// Per-function register type indices (optional).
    RegisterTypes = 12,
}

/// Number of known section ids.
const SECTION_COUNT: usize = 12;

impl SectionId {
    /// Decodes a section id byte. Unknown ids return `None`.
    #[must_use]
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::FormatVersion),
            2 => Some(Self::LocationFilenames),
            3 => Some(Self::LocationPositions),
            4 => Some(Self::Strings),
            5 => Some(Self::Attributes),
            6 => Some(Self::Kernels),
            7 => Some(Self::Types),
            8 => Some(Self::FunctionIndex),
            9 => Some(Self::Functions),
            10 => Some(Self::AttributeTypes),
            11 => Some(Self::AttributeNames),
            12 => Some(Self::RegisterTypes),
            _ => None,
        }
    }

    /// Returns the section name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::FormatVersion => "FormatVersion",
            Self::LocationFilenames => "LocationFilenames",
            Self::LocationPositions => "LocationPositions",
            Self::Strings => "Strings",
            Self::Attributes => "Attributes",
            Self::Kernels => "Kernels",
            Self::Types => "Types",
            Self::FunctionIndex => "FunctionIndex",
            Self::Functions => "Functions",
            Self::AttributeTypes => "AttributeTypes",
            Self::AttributeNames => "AttributeNames",
            Self::RegisterTypes => "RegisterTypes",
        }
    }

    /// Sections whose absence degrades fidelity instead of failing the
    /// conversion.
    pub const OPTIONAL: [Self; 3] = [Self::AttributeTypes, Self::AttributeNames, Self::RegisterTypes];

    fn slot(self) -> usize {
        self as usize - 1
    }
}

/// The known sections of one BEF buffer, split by a single header scan.
#[derive(Clone, Debug)]
pub struct SectionTable<'bef> {
    sections: [Option<&'bef [u8]>; SECTION_COUNT],
}

impl<'bef> SectionTable<'bef> {
    /// Scans `bytes` (magic prefix included) into a section table.
    pub fn scan(bytes: &'bef [u8]) -> Result<Self, ConvertError> {
        let mut r = Reader::new(bytes);
        let magic = r
            .read_bytes(BEF_MAGIC.len())
            .map_err(|_| ConvertError::malformed_header())?;
        if magic != &BEF_MAGIC[..] {
            return Err(ConvertError::malformed_header());
        }

        let mut sections = [None; SECTION_COUNT];
        while !r.is_empty() {
            let id_byte = r
                .read_u8()
                .map_err(|e| ConvertError::malformed_scan(None, e))?;
            let id = SectionId::from_u8(id_byte);
            let len = r
                .read_uleb128_u64()
                .and_then(|len| usize::try_from(len).map_err(|_| crate::format::DecodeError::OutOfBounds))
                .map_err(|e| ConvertError::malformed_scan(id, e))?;
            let payload = r
                .read_bytes(len)
                .map_err(|e| ConvertError::malformed_scan(id, e))?;
            // Unknown ids are retained nowhere; later duplicates overwrite.
            if let Some(id) = id {
                sections[id.slot()] = Some(payload);
            }
        }
        Ok(Self { sections })
    }

    /// Returns the payload of `id`, if the section was present.
    #[must_use]
    pub fn get(&self, id: SectionId) -> Option<&'bef [u8]> {
        self.sections[id.slot()]
    }

    /// Returns the payload of `id`, or an empty slice if absent.
    #[must_use]
    pub fn get_or_empty(&self, id: SectionId) -> &'bef [u8] {
        self.get(id).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::ConvertErrorKind;
    use crate::format::Writer;

    fn section(w: &mut Writer, id: u8, payload: &[u8]) {
        w.write_u8(id);
        w.write_uleb128_u64(payload.len() as u64);
        w.write_bytes(payload);
    }

    fn with_magic() -> Writer {
        let mut w = Writer::new();
        w.write_bytes(&BEF_MAGIC);
        w
    }

    #[test]
    fn rejects_bad_magic() {
        let err = SectionTable::scan(&[0xde, 0xad]).unwrap_err();
        assert!(matches!(err.kind, ConvertErrorKind::MalformedHeader));
        let err = SectionTable::scan(&[0x0b]).unwrap_err();
        assert!(matches!(err.kind, ConvertErrorKind::MalformedHeader));
    }

    #[test]
    fn splits_sections() {
        let mut w = with_magic();
        section(&mut w, SectionId::FormatVersion as u8, &[BEF_VERSION]);
        section(&mut w, SectionId::Strings as u8, b"main\0");
        let table = SectionTable::scan(w.as_slice()).unwrap();
        assert_eq!(table.get(SectionId::FormatVersion), Some(&[0u8][..]));
        assert_eq!(table.get(SectionId::Strings), Some(&b"main\0"[..]));
        assert_eq!(table.get(SectionId::Kernels), None);
        assert_eq!(table.get_or_empty(SectionId::Kernels), &[] as &[u8]);
    }

    #[test]
    fn skips_unknown_sections() {
        let mut w = with_magic();
        section(&mut w, SectionId::FormatVersion as u8, &[BEF_VERSION]);
        section(&mut w, 0x7f, &[1, 2, 3, 4]);
        section(&mut w, SectionId::Strings as u8, b"x\0");
        let table = SectionTable::scan(w.as_slice()).unwrap();
        assert_eq!(table.get(SectionId::Strings), Some(&b"x\0"[..]));
    }

    #[test]
    fn later_duplicate_overwrites() {
        let mut w = with_magic();
        section(&mut w, SectionId::Strings as u8, b"old\0");
        section(&mut w, SectionId::Strings as u8, b"new\0");
        let table = SectionTable::scan(w.as_slice()).unwrap();
        assert_eq!(table.get(SectionId::Strings), Some(&b"new\0"[..]));
    }

    #[test]
    fn truncated_payload_is_malformed() {
        let mut w = with_magic();
        w.write_u8(SectionId::Strings as u8);
        w.write_uleb128_u64(10);
        w.write_bytes(b"abc");
        let err = SectionTable::scan(w.as_slice()).unwrap_err();
        assert!(matches!(
            err.kind,
            ConvertErrorKind::MalformedSection {
                section: Some(SectionId::Strings),
                ..
            }
        ));
    }
}
