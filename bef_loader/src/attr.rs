// Copyright 2026 the BEF Loader Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Typed constant attributes and their decoding.
//!
//! Attribute values live in the Attributes section; the AttributeTypes
//! section is an index of `(offset, encoded type)` pairs describing how to
//! decode each value. The encoded type packs a kind discriminant in its low
//! bits and a kind-specific payload (a type-table index, or an element's
//! encoded type) in the rest.
//!
//! Length-prefixed payloads (strings, arrays) store their length *backward*
//! in the bytes preceding the payload, so a writer can emit values in one
//! forward pass; see [`crate::format::read_trailing_vbr_u64`].

use alloc::vec::Vec;
use hashbrown::HashMap;

use crate::convert::{ConvertError, Warning};
use crate::format::{Reader, read_trailing_vbr_u64};
use crate::sections::SectionId;
use crate::types::Type;

/// Number of low bits holding the attribute kind discriminant.
const ATTR_KIND_BITS: u32 = 3;

/// The kind discriminant of an encoded attribute type.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AttrKind {
    /// Fixed-width integer or float; payload is a type-table index.
    Standard = 0,
    /// One byte, nonzero = true.
    Bool = 1,
    /// Length-prefixed UTF-8 text.
    String = 2,
    /// One byte naming a primitive type code.
    Type = 3,
    /// Length-prefixed elements; payload is the element's encoded type.
    FlatArray = 4,
    /// Length-prefixed 4-byte offsets of previously decoded attributes.
    OffsetArray = 5,
    /// Shaped, packed elements of one primitive type.
    DenseTensor = 6,
}

impl AttrKind {
    /// Decodes the kind discriminant of an encoded attribute type.
    #[must_use]
    pub fn from_encoded(encoded: u64) -> Option<Self> {
        match encoded & ((1 << ATTR_KIND_BITS) - 1) {
            0 => Some(Self::Standard),
            1 => Some(Self::Bool),
            2 => Some(Self::String),
            3 => Some(Self::Type),
            4 => Some(Self::FlatArray),
            5 => Some(Self::OffsetArray),
            6 => Some(Self::DenseTensor),
            _ => None,
        }
    }

    /// Packs this kind with a payload into an encoded attribute type.
    #[must_use]
    pub fn encode(self, payload: u64) -> u64 {
        (payload << ATTR_KIND_BITS) | self as u64
    }
}

/// A decoded attribute value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttrValue<'bef> {
    /// Boolean.
    Bool(bool),
    /// Fixed-width integer, carried as raw bits.
    Integer {
        /// Bit width (1, 32 or 64).
        width: u32,
        /// Value bits, zero-extended.
        bits: u64,
    },
    /// Fixed-width float, carried as raw IEEE 754 bits.
    Float {
        /// Bit width (32).
        width: u32,
        /// Value bits, zero-extended.
        bits: u64,
    },
    /// UTF-8 text borrowed from the input buffer.
    String(&'bef str),
    /// A type value.
    Type(Type<'bef>),
    /// Homogeneously-encoded elements.
    Array(Vec<AttrValue<'bef>>),
    /// Elements gathered by offset from earlier in the attribute table.
    OffsetArray(Vec<AttrValue<'bef>>),
    /// A shaped tensor of packed primitive elements, row-major.
    DenseTensor {
        /// Element type.
        elem: Type<'bef>,
        /// Dimension sizes.
        shape: Vec<u64>,
        /// Elements in row-major order; `Integer` or `Float` values.
        elements: Vec<AttrValue<'bef>>,
    },
}

/// Sentinel substituted for attribute slots whose value cannot be resolved.
pub const MISSING_ATTRIBUTE: AttrValue<'static> = AttrValue::Integer {
    width: 32,
    bits: 0xdead_beef,
};

fn malformed(detail: &'static str) -> ConvertError {
    ConvertError::malformed(SectionId::Attributes, detail)
}

/// Guards length-prefixed reads against absurd counts before allocating:
/// every element occupies at least `min_elem_bytes` of the remaining input.
fn check_count(r: &Reader<'_>, count: u64, min_elem_bytes: u64) -> Result<usize, ConvertError> {
    let remaining = (r.bytes().len() - r.offset()) as u64;
    let need = count
        .checked_mul(min_elem_bytes)
        .ok_or_else(|| malformed("length prefix overflows"))?;
    if need > remaining {
        return Err(malformed("length prefix exceeds section size"));
    }
    usize::try_from(count).map_err(|_| malformed("length prefix overflows"))
}

/// Decodes the attribute at `offset` in the Attributes section.
///
/// `decoded` holds the attributes already decoded in file order; offset-array
/// elements must reference only those. Dangling element offsets substitute
/// [`MISSING_ATTRIBUTE`] and accumulate a warning rather than failing.
pub(crate) fn decode_attribute<'bef>(
    section: &'bef [u8],
    types: &[Type<'bef>],
    decoded: &HashMap<u32, AttrValue<'bef>>,
    offset: u32,
    encoded: u64,
    warnings: &mut Vec<Warning>,
) -> Result<AttrValue<'bef>, ConvertError> {
    let mut r = Reader::at_offset(section, offset as usize)
        .map_err(|_| malformed("attribute offset out of bounds"))?;
    read_value(&mut r, types, decoded, encoded, warnings)
}

fn read_value<'bef>(
    r: &mut Reader<'bef>,
    types: &[Type<'bef>],
    decoded: &HashMap<u32, AttrValue<'bef>>,
    encoded: u64,
    warnings: &mut Vec<Warning>,
) -> Result<AttrValue<'bef>, ConvertError> {
    let kind = AttrKind::from_encoded(encoded)
        .ok_or(ConvertError::unknown_attribute_encoding(encoded))?;
    let payload = encoded >> ATTR_KIND_BITS;

    match kind {
        AttrKind::Standard => {
            let index = usize::try_from(payload)
                .ok()
                .filter(|&i| i < types.len())
                .ok_or(ConvertError::unresolved(SectionId::Types, payload))?;
            read_standard(r, types[index])
        }
        AttrKind::Bool => {
            let byte = r
                .read_u8()
                .map_err(|_| malformed("truncated bool attribute"))?;
            Ok(AttrValue::Bool(byte != 0))
        }
        AttrKind::String => {
            let len = read_trailing_vbr_u64(r.bytes(), r.offset())
                .map_err(|e| ConvertError::malformed(SectionId::Attributes, e.as_str()))?;
            let len = check_count(r, len, 1)?;
            let s = r
                .read_str(len)
                .map_err(|e| ConvertError::malformed(SectionId::Attributes, e.as_str()))?;
            Ok(AttrValue::String(s))
        }
        AttrKind::Type => {
            let code = r
                .read_u8()
                .map_err(|_| malformed("truncated type attribute"))?;
            let ty = Type::from_code(code)
                .ok_or(ConvertError::unknown_attribute_encoding(u64::from(code)))?;
            Ok(AttrValue::Type(ty))
        }
        AttrKind::FlatArray => {
            let len = read_trailing_vbr_u64(r.bytes(), r.offset())
                .map_err(|e| ConvertError::malformed(SectionId::Attributes, e.as_str()))?;
            let len = check_count(r, len, 1)?;
            let mut elements = Vec::with_capacity(len);
            for _ in 0..len {
                elements.push(read_value(r, types, decoded, payload, warnings)?);
            }
            Ok(AttrValue::Array(elements))
        }
        AttrKind::OffsetArray => {
            let len = read_trailing_vbr_u64(r.bytes(), r.offset())
                .map_err(|e| ConvertError::malformed(SectionId::Attributes, e.as_str()))?;
            let len = check_count(r, len, 4)?;
            let mut elements = Vec::with_capacity(len);
            for _ in 0..len {
                let element_offset = r
                    .read_u32_le()
                    .map_err(|_| malformed("truncated offset array"))?;
                match decoded.get(&element_offset) {
                    Some(value) => elements.push(value.clone()),
                    None => {
                        // Elements must be encoded before the array that
                        // references them; a dangling offset degrades to the
                        // sentinel instead of failing the conversion.
                        warnings.push(Warning::UnknownAttribute {
                            offset: element_offset,
                        });
                        elements.push(MISSING_ATTRIBUTE);
                    }
                }
            }
            Ok(AttrValue::OffsetArray(elements))
        }
        AttrKind::DenseTensor => {
            let packed = r
                .read_u64_le()
                .map_err(|_| malformed("truncated dense tensor header"))?;
            let code = (packed >> 56) as u8;
            let elem = Type::from_code(code)
                .ok_or(ConvertError::unknown_attribute_encoding(u64::from(code)))?;
            let rank = packed & ((1 << 56) - 1);
            let count = r
                .read_u64_le()
                .map_err(|_| malformed("truncated dense tensor header"))?;

            let rank = check_count(r, rank, 8)?;
            let mut shape = Vec::with_capacity(rank);
            for _ in 0..rank {
                shape.push(
                    r.read_u64_le()
                        .map_err(|_| malformed("truncated dense tensor shape"))?,
                );
            }

            let count = check_count(r, count, 1)?;
            let mut elements = Vec::with_capacity(count);
            for _ in 0..count {
                elements.push(read_standard(r, elem)?);
            }
            Ok(AttrValue::DenseTensor {
                elem,
                shape,
                elements,
            })
        }
    }
}

/// Reads a fixed-width integer or float matching `ty`, little-endian.
fn read_standard<'bef>(r: &mut Reader<'bef>, ty: Type<'bef>) -> Result<AttrValue<'bef>, ConvertError> {
    if let Some(width) = ty.integer_width() {
        let bits = match width {
            1 => u64::from(
                r.read_u8()
                    .map_err(|_| malformed("truncated integer attribute"))?
                    & 1,
            ),
            32 => u64::from(
                r.read_u32_le()
                    .map_err(|_| malformed("truncated integer attribute"))?,
            ),
            64 => r
                .read_u64_le()
                .map_err(|_| malformed("truncated integer attribute"))?,
            _ => return Err(ConvertError::unsupported_bit_width(u64::from(width))),
        };
        return Ok(AttrValue::Integer { width, bits });
    }

    if let Some(width) = ty.float_width() {
        // Only f32 has a defined standard encoding: a reinterpreted 32-bit
        // little-endian integer read.
        if width != 32 {
            return Err(ConvertError::unsupported_bit_width(u64::from(width)));
        }
        let bits = u64::from(
            r.read_u32_le()
                .map_err(|_| malformed("truncated float attribute"))?,
        );
        return Ok(AttrValue::Float { width, bits });
    }

    Err(malformed("standard attribute type is not numeric"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::ConvertErrorKind;
    use crate::format::Writer;
    use alloc::vec;

    fn decode<'a>(
        section: &'a [u8],
        types: &[Type<'a>],
        offset: u32,
        encoded: u64,
    ) -> Result<AttrValue<'a>, ConvertError> {
        let mut warnings = Vec::new();
        decode_attribute(section, types, &HashMap::new(), offset, encoded, &mut warnings)
    }

    #[test]
    fn decodes_standard_integers() {
        let mut w = Writer::new();
        w.write_u32_le(0x1234_5678);
        let value = decode(w.as_slice(), &[Type::I32], 0, AttrKind::Standard.encode(0)).unwrap();
        assert_eq!(
            value,
            AttrValue::Integer {
                width: 32,
                bits: 0x1234_5678
            }
        );

        let mut w = Writer::new();
        w.write_u8(0xff);
        let value = decode(w.as_slice(), &[Type::I1], 0, AttrKind::Standard.encode(0)).unwrap();
        assert_eq!(value, AttrValue::Integer { width: 1, bits: 1 });
    }

    #[test]
    fn decodes_f32_and_rejects_other_float_widths() {
        let mut w = Writer::new();
        w.write_u32_le(1.5f32.to_bits());
        let value = decode(w.as_slice(), &[Type::F32], 0, AttrKind::Standard.encode(0)).unwrap();
        assert_eq!(
            value,
            AttrValue::Float {
                width: 32,
                bits: u64::from(1.5f32.to_bits())
            }
        );

        let mut w = Writer::new();
        w.write_u64_le(0);
        let err = decode(w.as_slice(), &[Type::F64], 0, AttrKind::Standard.encode(0)).unwrap_err();
        assert!(matches!(
            err.kind,
            ConvertErrorKind::UnsupportedBitWidth { width: 64 }
        ));
    }

    #[test]
    fn decodes_bool_and_type() {
        let value = decode(&[1], &[], 0, AttrKind::Bool.encode(0)).unwrap();
        assert_eq!(value, AttrValue::Bool(true));

        let code = Type::I64.code().unwrap();
        let code_bytes = [code];
        let value = decode(&code_bytes, &[], 0, AttrKind::Type.encode(0)).unwrap();
        assert_eq!(value, AttrValue::Type(Type::I64));

        let err = decode(&[0x3f], &[], 0, AttrKind::Type.encode(0)).unwrap_err();
        assert!(matches!(
            err.kind,
            ConvertErrorKind::UnknownAttributeEncoding { .. }
        ));
    }

    #[test]
    fn decodes_string_with_trailing_length() {
        let mut w = Writer::new();
        w.write_trailing_vbr_u64(5);
        let offset = w.len() as u32;
        w.write_bytes(b"hello");
        let value = decode(w.as_slice(), &[], offset, AttrKind::String.encode(0)).unwrap();
        assert_eq!(value, AttrValue::String("hello"));
    }

    #[test]
    fn decodes_flat_array() {
        let mut w = Writer::new();
        w.write_trailing_vbr_u64(3);
        let offset = w.len() as u32;
        for v in [7u32, 8, 9] {
            w.write_u32_le(v);
        }
        let encoded = AttrKind::FlatArray.encode(AttrKind::Standard.encode(0));
        let value = decode(w.as_slice(), &[Type::I32], offset, encoded).unwrap();
        let expected: Vec<AttrValue<'_>> = [7u64, 8, 9]
            .iter()
            .map(|&bits| AttrValue::Integer { width: 32, bits })
            .collect();
        assert_eq!(value, AttrValue::Array(expected));
    }

    #[test]
    fn offset_array_gathers_decoded_attributes() {
        let mut w = Writer::new();
        w.write_trailing_vbr_u64(2);
        let offset = w.len() as u32;
        w.write_u32_le(100);
        w.write_u32_le(200);

        let mut decoded = HashMap::new();
        decoded.insert(100u32, AttrValue::Bool(true));
        let mut warnings = Vec::new();
        let value = decode_attribute(
            w.as_slice(),
            &[],
            &decoded,
            offset,
            AttrKind::OffsetArray.encode(0),
            &mut warnings,
        )
        .unwrap();
        assert_eq!(
            value,
            AttrValue::OffsetArray(vec![AttrValue::Bool(true), MISSING_ATTRIBUTE])
        );
        assert_eq!(warnings, vec![Warning::UnknownAttribute { offset: 200 }]);
    }

    #[test]
    fn decodes_dense_tensor_row_major() {
        let mut w = Writer::new();
        let code = Type::F32.code().unwrap();
        w.write_u64_le((u64::from(code) << 56) | 2); // f32, rank 2
        w.write_u64_le(6); // element count
        w.write_u64_le(2);
        w.write_u64_le(3);
        let values = [0.0f32, 1.0, 2.0, 3.0, 4.0, 5.0];
        for v in values {
            w.write_u32_le(v.to_bits());
        }
        let value = decode(w.as_slice(), &[], 0, AttrKind::DenseTensor.encode(0)).unwrap();
        let AttrValue::DenseTensor {
            elem,
            shape,
            elements,
        } = value
        else {
            panic!("expected dense tensor");
        };
        assert_eq!(elem, Type::F32);
        assert_eq!(shape, vec![2, 3]);
        assert_eq!(elements.len(), 6);
        for (element, v) in elements.iter().zip(values) {
            assert_eq!(
                *element,
                AttrValue::Float {
                    width: 32,
                    bits: u64::from(v.to_bits())
                }
            );
        }
    }

    #[test]
    fn rejects_unknown_kind() {
        let err = decode(&[0], &[], 0, 7).unwrap_err();
        assert!(matches!(
            err.kind,
            ConvertErrorKind::UnknownAttributeEncoding { encoded: 7 }
        ));
    }

    #[test]
    fn rejects_absurd_length_prefix() {
        let mut w = Writer::new();
        w.write_trailing_vbr_u64(1 << 40);
        let offset = w.len() as u32;
        let err = decode(w.as_slice(), &[], offset, AttrKind::String.encode(0)).unwrap_err();
        assert!(matches!(
            err.kind,
            ConvertErrorKind::MalformedSection { .. }
        ));
    }
}
