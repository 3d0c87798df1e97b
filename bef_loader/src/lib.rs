// Copyright 2026 the BEF Loader Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `bef_loader`: a defensive decoder for BEF, a section-based binary
//! container for dataflow programs.
//!
//! A BEF buffer is a 2-byte magic prefix followed by tagged sections holding
//! string/type/attribute tables and per-function instruction streams.
//! [`convert::convert_bef`] turns such a buffer into a fully-linked, immutable
//! [`program::Program`] that an execution engine can walk. Decoding is a pure,
//! single-threaded transform over a complete in-memory buffer; the returned
//! program borrows string data from that buffer and is safe to share across
//! threads once returned.
//!
//! Malformed or adversarial input is rejected with a typed
//! [`convert::ConvertError`]; recoverable degradations (missing optional
//! sections, unresolvable attribute slots) are reported as
//! [`convert::Warning`]s instead of failing the conversion.
//!
//! ## Example
//!
//! ```
//! use bef_loader::convert::{ConvertError, Warning, convert_bef};
//!
//! // The smallest well-formed module: magic, a FormatVersion section, and
//! // empty Types/Kernels/FunctionIndex tables.
//! let bytes = [
//!     0x0b, 0xef, // magic
//!     0x01, 0x01, 0x00, // FormatVersion: version 0
//!     0x07, 0x01, 0x00, // Types: no entries
//!     0x06, 0x01, 0x00, // Kernels: no entries
//!     0x08, 0x01, 0x00, // FunctionIndex: no entries
//! ];
//!
//! let mut warnings: Vec<Warning> = Vec::new();
//! let program = convert_bef(&bytes, "empty.bef", Some(&mut warnings))?;
//! assert!(program.functions.is_empty());
//! // The optional AttributeTypes/AttributeNames/RegisterTypes sections are
//! // absent, which degrades fidelity but does not fail the conversion.
//! assert_eq!(warnings.len(), 3);
//! # Ok::<(), ConvertError>(())
//! ```

#![no_std]

extern crate alloc;

pub mod attr;
pub mod convert;
pub mod format;
pub mod program;
pub mod sections;
pub mod types;
