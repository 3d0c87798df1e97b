// Copyright 2026 the BEF Loader Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Benchmark-only crate; see `benches/convert.rs`.
