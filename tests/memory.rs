mod common;

use common::*;
use gpulower::ir::{OpKind, Type};
use gpulower::LoweringOptions;

fn func(params: &str, body: &str) -> String {
    format!("func @main({}) {{\n{}\n  return\n}}\n", params, body)
}

fn notes(source: &str) -> Vec<String> {
    lower_errors(source, &LoweringOptions::default())
        .into_iter()
        .flat_map(|d| d.notes)
        .collect()
}

#[test]
fn test_buffer_lifecycle() {
    let m = lower(&func(
        "%n: index, %v: f32",
        "  %t0 = gpu.wait async
  %m, %t1 = gpu.alloc async [%t0] (%n) : memref<?x4xf32>
  %t2 = gpu.memset async [%t1] %m, %v
  %t3 = gpu.dealloc async [%t2] %m
  gpu.wait [%t3]",
    ));
    insta::assert_snapshot!(trace(&m, "main"), @r"
    mgpuStreamCreate
    mgpuMemAlloc
    mgpuMemset32
    mgpuMemFree
    mgpuStreamSynchronize
    mgpuStreamDestroy
    ");

    // every call runs on the one stream
    let stream = results_of(&m, "mgpuStreamCreate")[0];
    assert_eq!(calls_to(&m, "mgpuMemAlloc")[0][1], stream);
    assert_eq!(calls_to(&m, "mgpuMemset32")[0][3], stream);
    assert_eq!(calls_to(&m, "mgpuMemFree")[0][1], stream);
}

#[test]
fn test_dynamic_alloc_multiplies_sizes() {
    let m = lower(&func(
        "%n: index",
        "  %t0 = gpu.wait async
  %m, %t1 = gpu.alloc async [%t0] (%n) : memref<?x4xf32>
  gpu.wait [%t1]",
    ));
    // only the dynamic dimension needs a runtime multiply
    assert_eq!(count(&m, |k| matches!(k, OpKind::Mul { .. })), 1);
    let size = calls_to(&m, "mgpuMemAlloc")[0][0];
    assert_eq!(*m.ty(size), Type::Int(64));
}

#[test]
fn test_static_alloc_has_no_multiply() {
    let m = lower(&func(
        "",
        "  %t0 = gpu.wait async
  %m, %t1 = gpu.alloc async [%t0] : memref<4x8xi32>
  gpu.wait [%t1]",
    ));
    assert_eq!(count(&m, |k| matches!(k, OpKind::Mul { .. })), 0);
    assert_eq!(count(&m, |k| matches!(k, OpKind::PtrToInt { .. })), 1);
}

#[test]
fn test_index_bitwidth_sizes_allocation() {
    let options = LoweringOptions::default().with_index_bitwidth(32);
    let m = lower_with(
        &func(
            "",
            "  %t0 = gpu.wait async
  %m, %t1 = gpu.alloc async [%t0] : memref<16xf32>
  gpu.wait [%t1]",
        ),
        &options,
    );
    let size = calls_to(&m, "mgpuMemAlloc")[0][0];
    assert_eq!(*m.ty(size), Type::Int(32));
    assert_eq!(m.decl("mgpuMemAlloc").unwrap().params[0], Type::Int(32));
}

#[test]
fn test_memcpy_between_buffers() {
    let m = lower(&func(
        "%dst: memref<16xf32>, %src: memref<16xf32>",
        "  %t0 = gpu.wait async
  %t1 = gpu.memcpy async [%t0] %dst, %src
  gpu.wait [%t1]",
    ));
    insta::assert_snapshot!(trace(&m, "main"), @r"
    mgpuStreamCreate
    mgpuMemcpy
    mgpuStreamSynchronize
    mgpuStreamDestroy
    ");
    let call = &calls_to(&m, "mgpuMemcpy")[0];
    assert_eq!(call.len(), 4);
    assert_eq!(*m.ty(call[0]), Type::i8_ptr());
    assert_eq!(*m.ty(call[1]), Type::i8_ptr());
    assert_eq!(call[3], results_of(&m, "mgpuStreamCreate")[0]);
}

#[test]
fn test_memcpy_rejects_strided_source() {
    let notes = notes(&func(
        "%dst: memref<4x4xf32>, %src: memref<4x4xf32, strided<[1, 4], offset: 0>>",
        "  %t0 = gpu.wait async
  %t1 = gpu.memcpy async [%t0] %dst, %src
  gpu.wait [%t1]",
    ));
    assert!(
        notes
            .iter()
            .any(|n| n.starts_with("gpu.memcpy: source buffer layout is not the identity")),
        "{:?}",
        notes
    );
}

#[test]
fn test_memset_rejects_64_bit_value() {
    let notes = notes(&func(
        "%dst: memref<4xf64>, %v: f64",
        "  %t0 = gpu.wait async
  %t1 = gpu.memset async [%t0] %dst, %v
  gpu.wait [%t1]",
    ));
    assert!(notes.contains(&"gpu.memset: value must be a 32-bit scalar, got 64 bits".to_string()));
}

#[test]
fn test_memset_bitcasts_value() {
    let m = lower(&func(
        "%dst: memref<8xi32>, %v: i32",
        "  %t0 = gpu.wait async
  %t1 = gpu.memset async [%t0] %dst, %v
  gpu.wait [%t1]",
    ));
    let call = &calls_to(&m, "mgpuMemset32")[0];
    assert_eq!(*m.ty(call[1]), Type::Int(32));
    assert_eq!(*m.ty(call[2]), Type::Int(64));
}

#[test]
fn test_synchronous_memcpy_is_rejected() {
    let notes = notes(&func(
        "%dst: memref<4xf32>, %src: memref<4xf32>",
        "  gpu.memcpy %dst, %src",
    ));
    assert_eq!(
        notes,
        vec!["gpu.memcpy: requires exactly one async dependency, found 0"]
    );
}

#[test]
fn test_async_memcpy_without_dependency_is_rejected() {
    let notes = notes(&func(
        "%dst: memref<4xf32>, %src: memref<4xf32>",
        "  %t = gpu.memcpy async %dst, %src",
    ));
    assert_eq!(
        notes,
        vec!["gpu.memcpy: requires exactly one async dependency, found 0"]
    );
}

#[test]
fn test_host_register() {
    let m = lower(&func("%buf: memref<*xf32>", "  gpu.host_register %buf"));
    insta::assert_snapshot!(trace(&m, "main"), @"mgpuMemHostRegisterMemRef");
    let call = &calls_to(&m, "mgpuMemHostRegisterMemRef")[0];
    assert_eq!(*m.ty(call[0]), Type::Int(64));
    assert_eq!(*m.ty(call[1]), Type::i8_ptr());
    assert_eq!(*m.ty(call[2]), Type::Int(64));
}

#[test]
fn test_host_register_rejects_ranked_buffer() {
    let notes = notes(&func("%buf: memref<4xf32>", "  gpu.host_register %buf"));
    assert_eq!(
        notes,
        vec!["gpu.host_register: operand must be an unranked buffer, found memref<4xf32>"]
    );
}

#[test]
fn test_set_default_device() {
    let m = lower(&func("%d: i32", "  gpu.set_default_device %d"));
    let arg = m.func("main").unwrap().args[0];
    assert_eq!(calls_to(&m, "mgpuSetDefaultDevice"), vec![vec![arg]]);
    assert_eq!(m.decls.len(), 1);
}

#[test]
fn test_oversized_static_alloc_is_rejected() {
    let notes = notes(&func(
        "",
        "  %t0 = gpu.wait async
  %m, %t1 = gpu.alloc async [%t0] : memref<4294967296x4294967296x2xf32>
  gpu.wait [%t1]",
    ));
    assert!(
        notes.contains(&"gpu.alloc: static buffer size overflows the index type".to_string()),
        "{:?}",
        notes
    );
}

#[test]
fn test_oversized_static_copy_is_rejected() {
    let notes = notes(&func(
        "%dst: memref<4294967296x4294967296xf32>, %src: memref<4294967296x4294967296xf32>",
        "  %t0 = gpu.wait async
  %t1 = gpu.memcpy async [%t0] %dst, %src
  gpu.wait [%t1]",
    ));
    assert!(notes.contains(&"gpu.memcpy: static buffer size overflows the index type".to_string()));
}

#[test]
fn test_sizes_checked_against_32_bit_index() {
    let options = LoweringOptions::default().with_index_bitwidth(32);
    let alloc = |ty: &str| {
        func(
            "",
            &format!(
                "  %t0 = gpu.wait async
  %m, %t1 = gpu.alloc async [%t0] : {}
  gpu.wait [%t1]",
                ty
            ),
        )
    };

    // the element count itself does not fit
    let diags = lower_errors(&alloc("memref<4294967296xf32>"), &options);
    assert_eq!(
        diags[0].notes,
        vec!["gpu.alloc: static buffer size overflows the index type"]
    );

    // the count fits but the byte size does not
    let diags = lower_errors(&alloc("memref<1073741824xf32>"), &options);
    assert_eq!(
        diags[0].notes,
        vec!["gpu.alloc: static buffer size overflows the index type"]
    );

    // the same buffer is fine with a 64-bit index
    let m = lower(&alloc("memref<1073741824xf32>"));
    assert_eq!(calls_to(&m, "mgpuMemAlloc").len(), 1);

    let diags = lower_errors(
        &func(
            "%dst: memref<1073741824xi32>, %v: i32",
            "  %t0 = gpu.wait async
  %t1 = gpu.memset async [%t0] %dst, %v
  gpu.wait [%t1]",
        ),
        &options,
    );
    assert_eq!(
        diags[0].notes,
        vec!["gpu.memset: static buffer size overflows the index type"]
    );
}

#[test]
fn test_memory_ops_need_exactly_one_dependency() {
    let two = "  %a = gpu.wait async
  %b = gpu.wait async";
    let cases = [
        (
            "gpu.alloc",
            "%v: f32",
            format!("{}\n  %m, %t = gpu.alloc async [%a, %b] : memref<4xf32>", two),
        ),
        (
            "gpu.dealloc",
            "%buf: memref<4xf32>",
            format!("{}\n  %t = gpu.dealloc async [%a, %b] %buf", two),
        ),
        (
            "gpu.memcpy",
            "%dst: memref<4xf32>, %src: memref<4xf32>",
            format!("{}\n  %t = gpu.memcpy async [%a, %b] %dst, %src", two),
        ),
        (
            "gpu.memset",
            "%dst: memref<4xf32>, %v: f32",
            format!("{}\n  %t = gpu.memset async [%a, %b] %dst, %v", two),
        ),
        (
            "gpu.dealloc",
            "%buf: memref<4xf32>",
            "  %t = gpu.dealloc async %buf".to_string(),
        ),
        (
            "gpu.memset",
            "%dst: memref<4xf32>, %v: f32",
            "  %t = gpu.memset async %dst, %v".to_string(),
        ),
    ];
    for (op, params, body) in cases {
        let found = if body.contains("[%a, %b]") { 2 } else { 0 };
        let notes = notes(&func(params, &body));
        assert_eq!(
            notes,
            vec![format!(
                "{}: requires exactly one async dependency, found {}",
                op, found
            )],
            "{}",
            body
        );
    }
}
