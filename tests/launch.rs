mod common;

use common::*;
use gpulower::ir::{OpKind, Type};
use gpulower::LoweringOptions;

fn program(body: &str, params: &str) -> String {
    format!("{}func @main({}) {{\n{}\n  return\n}}\n", KERNELS, params, body)
}

#[test]
fn test_sync_launch_sequence() {
    let m = lower(&program(
        "  gpu.launch_func @kernels::@k blocks in (%n, %n, %n) threads in (%n, %n, %n)",
        "%n: index",
    ));
    insta::assert_snapshot!(trace(&m, "main"), @r"
    mgpuModuleLoad
    mgpuModuleGetFunction
    mgpuStreamCreate
    mgpuLaunchKernel
    mgpuStreamSynchronize
    mgpuStreamDestroy
    mgpuModuleUnload
    ");
    let stream = results_of(&m, "mgpuStreamCreate")[0];
    assert_eq!(calls_to(&m, "mgpuStreamDestroy"), vec![vec![stream]]);
}

#[test]
fn test_async_launch_uses_dependency_stream() {
    let m = lower(&program(
        "  %t0 = gpu.wait async
  %t1 = gpu.launch_func async [%t0] @kernels::@k blocks in (%n, %n, %n) threads in (%n, %n, %n)
  gpu.wait [%t1]",
        "%n: index",
    ));
    insta::assert_snapshot!(trace(&m, "main"), @r"
    mgpuStreamCreate
    mgpuModuleLoad
    mgpuModuleGetFunction
    mgpuLaunchKernel
    mgpuModuleUnload
    mgpuStreamSynchronize
    mgpuStreamDestroy
    ");
    let stream = results_of(&m, "mgpuStreamCreate")[0];
    let launch = &calls_to(&m, "mgpuLaunchKernel")[0];
    assert_eq!(launch.len(), 11);
    assert_eq!(launch[8], stream);
    // the launch's token was replaced by the same stream
    assert_eq!(calls_to(&m, "mgpuStreamSynchronize"), vec![vec![stream]]);
}

#[test]
fn test_launch_configuration_order() {
    let m = lower(&program(
        "  gpu.launch_func @kernels::@k blocks in (%a, %b, %c) threads in (%d, %e, %f) dynamic_shared_memory_size %shm",
        "%a: index, %b: index, %c: index, %d: index, %e: index, %f: index, %shm: i32",
    ));
    let args = &m.func("main").unwrap().args;
    let launch = &calls_to(&m, "mgpuLaunchKernel")[0];
    assert_eq!(&launch[1..7], &args[0..6]);
    assert_eq!(launch[7], args[6]);
    assert_eq!(*m.ty(launch[10]), Type::i8_ptr_ptr());
    assert!(matches!(
        ops(&m).iter().find(|op| op.kind.results().contains(&launch[10])).map(|op| &op.kind),
        Some(OpKind::Null { .. })
    ));
}

#[test]
fn test_default_shared_memory_is_zero() {
    let m = lower(&program(
        "  gpu.launch_func @kernels::@k blocks in (%n, %n, %n) threads in (%n, %n, %n)",
        "%n: index",
    ));
    let launch = &calls_to(&m, "mgpuLaunchKernel")[0];
    let shm = launch[7];
    assert_eq!(*m.ty(shm), Type::Int(32));
    let def = ops(&m)
        .into_iter()
        .find(|op| op.kind.results() == vec![shm])
        .map(|op| op.kind.clone());
    assert!(matches!(
        def,
        Some(OpKind::Constant {
            value: gpulower::ir::Literal::Int(0),
            ..
        })
    ));
}

#[test]
fn test_blob_and_kernel_name_globals() {
    let m = lower(&program(
        "  gpu.launch_func @kernels::@saxpy blocks in (%n, %n, %n) threads in (%n, %n, %n)",
        "%n: index",
    ));
    assert!(m.gpu_modules.is_empty());
    assert_eq!(m.global("kernels_gpubin_cst").unwrap().bytes, b"BLOB");
    assert_eq!(
        m.global("kernels_saxpy_kernel_name").unwrap().bytes,
        b"saxpy\0"
    );
    let text = m.to_string();
    assert!(text.contains(
        "llvm.mlir.global internal constant @kernels_saxpy_kernel_name(\"saxpy\\00\") : !llvm.array<6 x i8>"
    ));
}

#[test]
fn test_repeated_launch_reuses_globals() {
    let m = lower(&program(
        "  gpu.launch_func @kernels::@k blocks in (%n, %n, %n) threads in (%n, %n, %n)
  gpu.launch_func @kernels::@k blocks in (%n, %n, %n) threads in (%n, %n, %n)",
        "%n: index",
    ));
    assert_eq!(m.globals.len(), 2);
    assert_eq!(calls_to(&m, "mgpuModuleLoad").len(), 2);
    assert_eq!(calls_to(&m, "mgpuModuleUnload").len(), 2);
    assert_eq!(m.decls.iter().filter(|d| d.name == "mgpuModuleLoad").count(), 1);
}

#[test]
fn test_descriptor_arguments_are_unpacked() {
    let m = lower(&program(
        "  gpu.launch_func @kernels::@k blocks in (%n, %n, %n) threads in (%n, %n, %n) args(%buf, %x)",
        "%n: index, %buf: memref<4xf32>, %x: f32",
    ));
    // allocated, aligned, offset, size, stride, then the scalar
    let allocas: Vec<Type> = ops(&m)
        .into_iter()
        .filter_map(|op| match &op.kind {
            OpKind::Alloca { result, .. } => Some(m.ty(*result).clone()),
            _ => None,
        })
        .collect();
    assert_eq!(allocas.len(), 2);
    match allocas[0].pointee() {
        Some(Type::Struct(fields)) => {
            assert_eq!(fields.len(), 6);
            assert_eq!(fields[5], Type::Float(32));
        }
        other => panic!("expected a parameter struct, got {:?}", other),
    }
    assert_eq!(allocas[1], Type::i8_ptr_ptr());
    assert_eq!(count(&m, |k| matches!(k, OpKind::Store { .. })), 12);
}

#[test]
fn test_bare_pointer_arguments() {
    let options = LoweringOptions::default().with_bare_ptr_call_conv(true);
    let m = lower_with(
        &program(
            "  gpu.launch_func @kernels::@k blocks in (%n, %n, %n) threads in (%n, %n, %n) args(%buf, %x)",
            "%n: index, %buf: memref<4x4xf32>, %x: f32",
        ),
        &options,
    );
    let block = ops(&m)
        .into_iter()
        .find_map(|op| match &op.kind {
            OpKind::Alloca { result, .. } => Some(m.ty(*result).clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(
        block.pointee(),
        Some(&Type::Struct(vec![Type::ptr(Type::Float(32)), Type::Float(32)]))
    );
}

#[test]
fn test_bare_pointer_rejects_dynamic_shape() {
    let options = LoweringOptions::default().with_bare_ptr_call_conv(true);
    let diags = lower_errors(
        &program(
            "  gpu.launch_func @kernels::@k blocks in (%n, %n, %n) threads in (%n, %n, %n) args(%buf)",
            "%n: index, %buf: memref<?xf32>",
        ),
        &options,
    );
    assert_eq!(
        diags[0].message,
        "cannot pass memref<?xf32> as a bare pointer to kernel '@kernels::@k'"
    );
    assert!(diags[0].help.is_some());
}

#[test]
fn test_bare_pointer_rejects_unranked_and_strided() {
    let options = LoweringOptions::default().with_bare_ptr_call_conv(true);
    for ty in ["memref<*xf32>", "memref<4x4xf32, strided<[1, 4], offset: 0>>"] {
        let diags = lower_errors(
            &program(
                "  gpu.launch_func @kernels::@k blocks in (%n, %n, %n) threads in (%n, %n, %n) args(%buf)",
                &format!("%n: index, %buf: {}", ty),
            ),
            &options,
        );
        assert!(
            diags[0].message.starts_with("cannot pass memref<"),
            "{}: {}",
            ty,
            diags[0]
        );
    }
}

#[test]
fn test_unranked_argument_passes_rank_and_pointer() {
    let m = lower(&program(
        "  gpu.launch_func @kernels::@k blocks in (%n, %n, %n) threads in (%n, %n, %n) args(%buf)",
        "%n: index, %buf: memref<*xf32>",
    ));
    let block = ops(&m)
        .into_iter()
        .find_map(|op| match &op.kind {
            OpKind::Alloca { result, .. } => Some(m.ty(*result).clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(
        block.pointee(),
        Some(&Type::Struct(vec![Type::Int(64), Type::i8_ptr()]))
    );
}

#[test]
fn test_launch_with_two_dependencies_is_rejected() {
    let diags = lower_errors(
        &program(
            "  %t0 = gpu.wait async
  %t1 = gpu.wait async
  %t2 = gpu.launch_func async [%t0, %t1] @kernels::@k blocks in (%n, %n, %n) threads in (%n, %n, %n)
  gpu.wait [%t2]",
            "%n: index",
        ),
        &LoweringOptions::default(),
    );
    assert_eq!(diags[0].message, "failed to legalize operation 'gpu.launch_func'");
    assert_eq!(
        diags[0].notes,
        vec!["gpu.launch_func: cannot convert with more than one async dependency, found 2"]
    );
}

#[test]
fn test_sync_launch_with_dependency_is_rejected() {
    let diags = lower_errors(
        &program(
            "  %t0 = gpu.wait async
  gpu.launch_func [%t0] @kernels::@k blocks in (%n, %n, %n) threads in (%n, %n, %n)",
            "%n: index",
        ),
        &LoweringOptions::default(),
    );
    assert_eq!(
        diags[0].notes,
        vec!["gpu.launch_func: cannot convert a synchronous launch with async dependencies"]
    );
}
