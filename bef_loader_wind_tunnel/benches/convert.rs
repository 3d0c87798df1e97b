// Copyright 2026 the BEF Loader Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use bef_loader::convert::convert_bef;
use bef_loader_conformance::{BefBuilder, FunctionDef, KIND_NORMAL, KernelDef};

/// Builds a module with one function holding a chain of `len` kernels, each
/// consuming the previous result and carrying one i32 attribute.
fn build_kernel_chain(len: u32) -> Vec<u8> {
    let mut b = BefBuilder::new();
    let i32_ty = b.type_idx("i32");
    let fn_loc = b.location("bench.mlir", 1, 1);
    let constant = b.kernel_idx("bef.constant");
    let add = b.kernel_idx("arith.addi");
    let value_name = b.str_offset("value");

    let mut kernels = Vec::with_capacity(len as usize);
    let mut reg_uses = Vec::with_capacity(len as usize + 1);
    let mut reg_types = Vec::with_capacity(len as usize + 1);

    let seed_attr = b.attr_i32(1);
    let loc = b.location("bench.mlir", 2, 1);
    kernels.push(KernelDef {
        kernel: constant,
        location: loc,
        attributes: vec![(value_name, seed_attr)],
        results: vec![(0, vec![1])],
        ..KernelDef::default()
    });
    reg_uses.push(1);
    reg_types.push(i32_ty);

    for i in 1..len {
        let attr = b.attr_i32(i as i32);
        let loc = b.location("bench.mlir", 2 + i, 1);
        kernels.push(KernelDef {
            kernel: add,
            location: loc,
            operands: vec![i - 1],
            attributes: vec![(value_name, attr)],
            results: vec![(i, vec![i + 1])],
            ..KernelDef::default()
        });
        reg_uses.push(1);
        reg_types.push(i32_ty);
    }
    // The last register is consumed by the implicit terminator.

    b.add_function(&FunctionDef {
        name: "chain".to_string(),
        kind: KIND_NORMAL,
        arg_types: vec![],
        result_types: vec![i32_ty],
        location: fn_loc,
        reg_uses,
        reg_types: Some(reg_types),
        kernels,
        result_regs: vec![len - 1],
        ..FunctionDef::default()
    });
    b.build()
}

fn bench_convert(c: &mut Criterion) {
    let mut group = c.benchmark_group("convert_kernel_chain");
    for &len in &[10_u32, 100, 1000] {
        let bytes = build_kernel_chain(len);
        group.bench_with_input(BenchmarkId::from_parameter(len), &bytes, |b, bytes| {
            b.iter(|| {
                let program = convert_bef(bytes, "bench.bef", None).unwrap();
                black_box(program);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_convert);
criterion_main!(benches);
