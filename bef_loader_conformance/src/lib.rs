// Copyright 2026 the BEF Loader Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! An independent BEF test encoder.
//!
//! [`BefBuilder`] emits BEF byte buffers by hand — section headers, string
//! pools, attribute payloads with trailing VBR lengths, function records and
//! word-aligned instruction entries — without reusing any decoder logic. The
//! conformance tests and benches decode its output with `bef_loader` and
//! check the result structurally.
//!
//! The builder is a test harness: it trusts its caller and panics on misuse
//! (e.g. mixing functions with and without register type lists).

use std::collections::HashMap;

use bef_loader::attr::AttrKind;
use bef_loader::format::Writer;
use bef_loader::sections::{BEF_MAGIC, BEF_VERSION, KERNEL_ENTRY_ALIGNMENT, SectionId};

/// Function-kind byte for a function with an encoded body.
pub const KIND_NORMAL: u8 = 0;
/// Function-kind byte for a native function declared by signature only.
pub const KIND_EXTERNAL: u8 = 1;

/// One kernel (instruction) of a function under construction.
#[derive(Clone, Debug, Default)]
pub struct KernelDef {
    /// Kernel-name table index (see [`BefBuilder::kernel_idx`]).
    pub kernel: u32,
    /// LocationPositions offset (see [`BefBuilder::location`]).
    pub location: u64,
    /// Operand register indices.
    pub operands: Vec<u32>,
    /// Non-strict scheduling marker.
    pub non_strict: bool,
    /// Attribute slots: `(name string offset, Attributes-section offset)`.
    pub attributes: Vec<(u64, u32)>,
    /// Function-reference slots: FunctionIndex indices.
    pub functions: Vec<u32>,
    /// Results: `(register, used_by instruction indices)`. The terminator is
    /// addressed as the number of real instructions in the function.
    pub results: Vec<(u32, Vec<u32>)>,
}

/// One function under construction.
#[derive(Clone, Debug, Default)]
pub struct FunctionDef {
    /// Function name; empty means anonymous (nested-region body).
    pub name: String,
    /// [`KIND_NORMAL`] or [`KIND_EXTERNAL`].
    pub kind: u8,
    /// Argument type-table indices.
    pub arg_types: Vec<u32>,
    /// Result type-table indices.
    pub result_types: Vec<u32>,
    /// LocationPositions offset of the function.
    pub location: u64,
    /// Declared per-register use counts.
    pub reg_uses: Vec<u32>,
    /// Optional per-register type-table indices (parallel to `reg_uses`).
    pub reg_types: Option<Vec<u32>>,
    /// Argument register bindings for the pseudo entry:
    /// `(register, used_by)`, parallel to `arg_types`.
    pub args: Vec<(u32, Vec<u32>)>,
    /// The kernels of the function, in execution order.
    pub kernels: Vec<KernelDef>,
    /// Result register indices, parallel to `result_types`.
    pub result_regs: Vec<u32>,
}

/// Builds BEF byte buffers section by section.
#[derive(Debug, Default)]
pub struct BefBuilder {
    strings: Vec<u8>,
    string_offsets: HashMap<String, u64>,
    filenames: Vec<String>,
    positions: Writer,
    types: Vec<u64>,
    type_indices: HashMap<String, u32>,
    kernels: Vec<u64>,
    kernel_indices: HashMap<String, u32>,
    attributes: Writer,
    attribute_types: Vec<(u32, u64)>,
    functions: Writer,
    function_index: Vec<IndexEntry>,
    attr_name_tables: Vec<Vec<u8>>,
    reg_type_tables: Vec<Option<Vec<u8>>>,
    /// When set, `(id, payload)` is emitted between two known sections.
    pub extra_section: Option<(u8, Vec<u8>)>,
    /// Drop the AttributeTypes section from the output.
    pub omit_attribute_types: bool,
    /// Drop the AttributeNames section from the output.
    pub omit_attribute_names: bool,
}

#[derive(Clone, Debug)]
struct IndexEntry {
    kind: u8,
    offset: u64,
    name_offset: u64,
    arg_types: Vec<u32>,
    result_types: Vec<u32>,
}

impl BefBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `s` into the Strings section, returning its byte offset.
    pub fn str_offset(&mut self, s: &str) -> u64 {
        if let Some(&offset) = self.string_offsets.get(s) {
            return offset;
        }
        let offset = self.strings.len() as u64;
        self.strings.extend_from_slice(s.as_bytes());
        self.strings.push(0);
        self.string_offsets.insert(s.to_string(), offset);
        offset
    }

    /// Interns a type specification, returning its type-table index.
    pub fn type_idx(&mut self, spec: &str) -> u32 {
        if let Some(&index) = self.type_indices.get(spec) {
            return index;
        }
        let offset = self.str_offset(spec);
        let index = self.types.len() as u32;
        self.types.push(offset);
        self.type_indices.insert(spec.to_string(), index);
        index
    }

    /// Interns a kernel name, returning its kernel-table index.
    pub fn kernel_idx(&mut self, name: &str) -> u32 {
        if let Some(&index) = self.kernel_indices.get(name) {
            return index;
        }
        let offset = self.str_offset(name);
        let index = self.kernels.len() as u32;
        self.kernels.push(offset);
        self.kernel_indices.insert(name.to_string(), index);
        index
    }

    /// Records a file/line/column position, returning its
    /// LocationPositions offset.
    pub fn location(&mut self, filename: &str, line: u32, column: u32) -> u64 {
        let index = match self.filenames.iter().position(|f| f == filename) {
            Some(index) => index as u64,
            None => {
                self.filenames.push(filename.to_string());
                (self.filenames.len() - 1) as u64
            }
        };
        let offset = self.positions.len() as u64;
        self.positions.write_uleb128_u64(index);
        self.positions.write_uleb128_u64(u64::from(line));
        self.positions.write_uleb128_u64(u64::from(column));
        offset
    }

    fn push_attr(&mut self, encoded: u64, payload: &[u8]) -> u32 {
        let offset = self.attributes.len() as u32;
        self.attributes.write_bytes(payload);
        self.attribute_types.push((offset, encoded));
        offset
    }

    /// Emits a raw attribute payload with an explicit encoded type.
    pub fn attr_raw(&mut self, encoded: u64, payload: &[u8]) -> u32 {
        self.push_attr(encoded, payload)
    }

    /// Emits a standard `i32` attribute.
    pub fn attr_i32(&mut self, v: i32) -> u32 {
        let ty = self.type_idx("i32");
        self.push_attr(
            AttrKind::Standard.encode(u64::from(ty)),
            &(v as u32).to_le_bytes(),
        )
    }

    /// Emits a standard `i64` attribute.
    pub fn attr_i64(&mut self, v: i64) -> u32 {
        let ty = self.type_idx("i64");
        self.push_attr(
            AttrKind::Standard.encode(u64::from(ty)),
            &(v as u64).to_le_bytes(),
        )
    }

    /// Emits a standard `f32` attribute.
    pub fn attr_f32(&mut self, v: f32) -> u32 {
        let ty = self.type_idx("f32");
        self.push_attr(
            AttrKind::Standard.encode(u64::from(ty)),
            &v.to_bits().to_le_bytes(),
        )
    }

    /// Emits a bool attribute.
    pub fn attr_bool(&mut self, v: bool) -> u32 {
        self.push_attr(AttrKind::Bool.encode(0), &[u8::from(v)])
    }

    /// Emits a string attribute (trailing VBR length, then bytes).
    pub fn attr_string(&mut self, s: &str) -> u32 {
        self.attributes.write_trailing_vbr_u64(s.len() as u64);
        let offset = self.attributes.len() as u32;
        self.attributes.write_bytes(s.as_bytes());
        self.attribute_types
            .push((offset, AttrKind::String.encode(0)));
        offset
    }

    /// Emits a type attribute from a primitive type code.
    pub fn attr_type_code(&mut self, code: u8) -> u32 {
        self.push_attr(AttrKind::Type.encode(0), &[code])
    }

    /// Emits a flat array of standard `i32` elements.
    pub fn attr_array_i32(&mut self, values: &[i32]) -> u32 {
        let ty = self.type_idx("i32");
        self.attributes.write_trailing_vbr_u64(values.len() as u64);
        let offset = self.attributes.len() as u32;
        for &v in values {
            self.attributes.write_bytes(&(v as u32).to_le_bytes());
        }
        let elem = AttrKind::Standard.encode(u64::from(ty));
        self.attribute_types
            .push((offset, AttrKind::FlatArray.encode(elem)));
        offset
    }

    /// Emits an offset array gathering previously emitted attributes.
    pub fn attr_offset_array(&mut self, offsets: &[u32]) -> u32 {
        self.attributes.write_trailing_vbr_u64(offsets.len() as u64);
        let offset = self.attributes.len() as u32;
        for &element in offsets {
            self.attributes.write_bytes(&element.to_le_bytes());
        }
        self.attribute_types
            .push((offset, AttrKind::OffsetArray.encode(0)));
        offset
    }

    /// Emits a dense tensor of `f32` elements in row-major order.
    pub fn attr_dense_f32(&mut self, shape: &[u64], values: &[f32]) -> u32 {
        let offset = self.attributes.len() as u32;
        let code = 4u64; // f32 primitive type code
        self.attributes
            .write_u64_le((code << 56) | shape.len() as u64);
        self.attributes.write_u64_le(values.len() as u64);
        for &dim in shape {
            self.attributes.write_u64_le(dim);
        }
        for &v in values {
            self.attributes.write_bytes(&v.to_bits().to_le_bytes());
        }
        self.attribute_types
            .push((offset, AttrKind::DenseTensor.encode(0)));
        offset
    }

    /// Appends a function (body, index entry, and side tables).
    pub fn add_function(&mut self, def: &FunctionDef) {
        let name_offset = self.str_offset(&def.name);
        if def.kind == KIND_EXTERNAL {
            self.function_index.push(IndexEntry {
                kind: def.kind,
                offset: 0,
                name_offset,
                arg_types: def.arg_types.clone(),
                result_types: def.result_types.clone(),
            });
            return;
        }

        let record_start = self.functions.len();
        self.functions.write_uleb128_u64(def.location);

        // Register use-count table.
        self.functions.write_uleb128_u64(def.reg_uses.len() as u64);
        for &uses in &def.reg_uses {
            self.functions.write_uleb128_u64(u64::from(uses));
        }

        // Lay out instruction words first so the kernel table can carry
        // their byte offsets.
        assert_eq!(def.args.len(), def.arg_types.len(), "argument binding mismatch");
        let mut words: Vec<u32> = Vec::new();
        let mut table: Vec<(u32, u32)> = Vec::new();
        if !def.args.is_empty() {
            let offset = (words.len() * KERNEL_ENTRY_ALIGNMENT) as u32;
            words.extend_from_slice(&[0, 0, 0, 0, 0, def.args.len() as u32]);
            for (_, used_by) in &def.args {
                words.push(used_by.len() as u32);
            }
            for &(reg, _) in &def.args {
                words.push(reg);
            }
            for (_, used_by) in &def.args {
                words.extend_from_slice(used_by);
            }
            table.push((offset, 0));
        }
        for kernel in &def.kernels {
            let offset = (words.len() * KERNEL_ENTRY_ALIGNMENT) as u32;
            words.extend_from_slice(&[
                kernel.kernel,
                u32::try_from(kernel.location).unwrap(),
                kernel.operands.len() as u32,
                kernel.attributes.len() as u32,
                kernel.functions.len() as u32,
                kernel.results.len() as u32,
            ]);
            for (_, used_by) in &kernel.results {
                words.push(used_by.len() as u32);
            }
            words.extend_from_slice(&kernel.operands);
            for &(_, value_offset) in &kernel.attributes {
                words.push(value_offset);
            }
            words.extend_from_slice(&kernel.functions);
            for &(reg, _) in &kernel.results {
                words.push(reg);
            }
            for (_, used_by) in &kernel.results {
                words.extend_from_slice(used_by);
            }
            table.push((offset, kernel.operands.len() as u32));
        }

        // Kernel table and result registers.
        self.functions.write_uleb128_u64(table.len() as u64);
        for &(offset, operands) in &table {
            self.functions.write_uleb128_u64(u64::from(offset));
            self.functions.write_uleb128_u64(u64::from(operands));
        }
        assert_eq!(def.result_regs.len(), def.result_types.len());
        for &reg in &def.result_regs {
            self.functions.write_uleb128_u64(u64::from(reg));
        }

        // Instruction words are aligned relative to the record start.
        while (self.functions.len() - record_start) % KERNEL_ENTRY_ALIGNMENT != 0 {
            self.functions.write_u8(0);
        }
        for word in words {
            self.functions.write_u32_le(word);
        }

        // Per-function AttributeNames table: kernel count, then one marker
        // byte and the attribute name offsets per kernel-table entry.
        let mut names = Writer::new();
        names.write_uleb128_u64(table.len() as u64);
        if !def.args.is_empty() {
            names.write_u8(0);
        }
        for kernel in &def.kernels {
            names.write_u8(u8::from(kernel.non_strict));
            for &(name_offset, _) in &kernel.attributes {
                names.write_uleb128_u64(name_offset);
            }
        }
        self.attr_name_tables.push(names.into_vec());

        // Per-function RegisterTypes table.
        self.reg_type_tables.push(def.reg_types.as_ref().map(|indices| {
            assert_eq!(indices.len(), def.reg_uses.len(), "register type list mismatch");
            let mut w = Writer::new();
            w.write_uleb128_u64(indices.len() as u64);
            for &index in indices {
                w.write_uleb128_u64(u64::from(index));
            }
            w.into_vec()
        }));

        self.function_index.push(IndexEntry {
            kind: def.kind,
            offset: record_start as u64,
            name_offset,
            arg_types: def.arg_types.clone(),
            result_types: def.result_types.clone(),
        });
    }

    /// Assembles the final BEF byte buffer.
    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.write_bytes(&BEF_MAGIC);
        section(&mut w, SectionId::FormatVersion as u8, &[BEF_VERSION]);

        let mut filenames = Writer::new();
        for f in &self.filenames {
            filenames.write_bytes(f.as_bytes());
            filenames.write_u8(0);
        }
        section(
            &mut w,
            SectionId::LocationFilenames as u8,
            filenames.as_slice(),
        );
        section(
            &mut w,
            SectionId::LocationPositions as u8,
            self.positions.as_slice(),
        );
        section(&mut w, SectionId::Strings as u8, &self.strings);

        if let Some((id, payload)) = &self.extra_section {
            section(&mut w, *id, payload);
        }

        section(&mut w, SectionId::Attributes as u8, self.attributes.as_slice());
        if !self.omit_attribute_types {
            let mut index = Writer::new();
            index.write_uleb128_u64(self.attribute_types.len() as u64);
            for &(offset, encoded) in &self.attribute_types {
                index.write_uleb128_u64(u64::from(offset));
                index.write_uleb128_u64(encoded);
            }
            section(&mut w, SectionId::AttributeTypes as u8, index.as_slice());
        }
        if !self.omit_attribute_names {
            let mut names = Writer::new();
            names.write_uleb128_u64(self.attr_name_tables.len() as u64);
            for table in &self.attr_name_tables {
                names.write_bytes(table);
            }
            section(&mut w, SectionId::AttributeNames as u8, names.as_slice());
        }

        let mut kernels = Writer::new();
        kernels.write_uleb128_u64(self.kernels.len() as u64);
        for &offset in &self.kernels {
            kernels.write_uleb128_u64(offset);
        }
        section(&mut w, SectionId::Kernels as u8, kernels.as_slice());

        let mut types = Writer::new();
        types.write_uleb128_u64(self.types.len() as u64);
        for &offset in &self.types {
            types.write_uleb128_u64(offset);
        }
        section(&mut w, SectionId::Types as u8, types.as_slice());

        let provided = self.reg_type_tables.iter().filter(|t| t.is_some()).count();
        if provided > 0 {
            assert_eq!(
                provided,
                self.reg_type_tables.len(),
                "either every function or none carries register types"
            );
            let mut reg_types = Writer::new();
            reg_types.write_uleb128_u64(self.reg_type_tables.len() as u64);
            for table in self.reg_type_tables.iter().flatten() {
                reg_types.write_bytes(table);
            }
            section(&mut w, SectionId::RegisterTypes as u8, reg_types.as_slice());
        }

        section(&mut w, SectionId::Functions as u8, self.functions.as_slice());

        let mut index = Writer::new();
        index.write_uleb128_u64(self.function_index.len() as u64);
        for entry in &self.function_index {
            index.write_u8(entry.kind);
            index.write_uleb128_u64(entry.offset);
            index.write_uleb128_u64(entry.name_offset);
            index.write_uleb128_u64(entry.arg_types.len() as u64);
            for &t in &entry.arg_types {
                index.write_uleb128_u64(u64::from(t));
            }
            index.write_uleb128_u64(entry.result_types.len() as u64);
            for &t in &entry.result_types {
                index.write_uleb128_u64(u64::from(t));
            }
        }
        section(&mut w, SectionId::FunctionIndex as u8, index.as_slice());

        w.into_vec()
    }
}

fn section(w: &mut Writer, id: u8, payload: &[u8]) {
    w.write_u8(id);
    w.write_uleb128_u64(payload.len() as u64);
    w.write_bytes(payload);
}
