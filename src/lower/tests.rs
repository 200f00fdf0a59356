use super::*;
use crate::ir::Type;
use crate::syntax::parse_module;

fn parse(source: &str) -> Module {
    match parse_module(source) {
        Ok(m) => m,
        Err(diags) => panic!("parse failed: {:?}", diags),
    }
}

fn lower_ok(source: &str) -> Module {
    lower_with(source, &LoweringOptions::default())
}

fn lower_with(source: &str, options: &LoweringOptions) -> Module {
    match lower_module(parse(source), options) {
        Ok(m) => m,
        Err(err) => panic!("lowering failed: {:?}", err.diagnostics()),
    }
}

fn lower_err(source: &str, options: &LoweringOptions) -> Vec<Diagnostic> {
    match lower_module(parse(source), options) {
        Ok(m) => panic!("expected lowering to fail, got:\n{}", m),
        Err(LoweringError::Legalization { diagnostics }) => diagnostics,
        Err(other) => panic!("unexpected error: {}", other),
    }
}

fn no_gpu_ops(m: &Module) -> bool {
    let mut clean = true;
    m.walk(&mut |op| clean &= !op.kind.is_gpu());
    clean
}

#[test]
fn test_wait_chain() {
    let m = lower_ok(
        "func @main() {
           %t0 = gpu.wait async
           %t1 = gpu.wait async [%t0]
           gpu.wait [%t1]
           return
         }",
    );
    assert!(no_gpu_ops(&m));
    assert_eq!(
        m.call_trace("main"),
        vec![
            "mgpuStreamCreate",
            "mgpuEventCreate",
            "mgpuEventRecord",
            "mgpuStreamCreate",
            "mgpuStreamWaitEvent",
            "mgpuEventDestroy",
            "mgpuStreamSynchronize",
            "mgpuStreamDestroy",
        ]
    );
}

#[test]
fn test_declarations_are_unique() {
    let m = lower_ok(
        "func @main() {
           %t0 = gpu.wait async
           gpu.wait [%t0]
           %t1 = gpu.wait async
           gpu.wait [%t1]
           return
         }",
    );
    let names: Vec<&str> = m.decls.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["mgpuStreamCreate", "mgpuStreamSynchronize", "mgpuStreamDestroy"]
    );
}

#[test]
fn test_token_argument_is_an_event() {
    let m = lower_ok(
        "func @main(%t: !gpu.async.token) {
           gpu.wait [%t]
           return
         }",
    );
    let f = m.func("main").unwrap();
    assert_eq!(*m.ty(f.args[0]), Type::i8_ptr());
    assert_eq!(
        m.call_trace("main"),
        vec!["mgpuEventSynchronize", "mgpuEventDestroy"]
    );
}

#[test]
fn test_index_constant_is_retyped() {
    let m = lower_with(
        "func @main() {
           %c = constant 8 : index
           return
         }",
        &LoweringOptions::default().with_index_bitwidth(32),
    );
    let f = m.func("main").unwrap();
    let OpKind::Constant { result, .. } = &f.body.ops[0].kind else {
        panic!("expected constant");
    };
    assert_eq!(*m.ty(*result), Type::Int(32));
}

#[test]
fn test_returned_token_is_remapped() {
    let m = lower_ok(
        "func @main() {
           %t = gpu.wait async
           return %t
         }",
    );
    let f = m.func("main").unwrap();
    let OpKind::Return { operands } = &f.body.ops.last().unwrap().kind else {
        panic!("expected return");
    };
    assert_eq!(m.defining_callee(operands[0]), Some("mgpuStreamCreate"));
}

#[test]
fn test_missing_dependency_is_reported() {
    let diags = lower_err(
        "func @main() {
           %buf, %t = gpu.alloc async : memref<4xf32>
           return
         }",
        &LoweringOptions::default(),
    );
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].message, "failed to legalize operation 'gpu.alloc'");
    assert_eq!(
        diags[0].notes,
        vec!["gpu.alloc: requires exactly one async dependency, found 0"]
    );
}

#[test]
fn test_failure_blocks_dependents() {
    let diags = lower_err(
        "func @main(%v: f64) {
           %t0 = gpu.wait async
           %buf, %t1 = gpu.alloc async [%t0] : memref<16xf64>
           %t2 = gpu.memset async [%t1] %buf, %v
           gpu.wait [%t2]
           return
         }",
        &LoweringOptions::default(),
    );
    let messages: Vec<&str> = diags.iter().map(|d| d.message.as_str()).collect();
    assert_eq!(
        messages,
        vec![
            "failed to legalize operation 'gpu.memset'",
            "failed to legalize operation 'gpu.wait'",
        ]
    );
    assert_eq!(
        diags[0].notes,
        vec!["gpu.memset: value must be a 32-bit scalar, got 64 bits"]
    );
    assert!(diags[1]
        .notes
        .iter()
        .any(|n| n == "gpu.wait: operands are not of runtime type"));
}

#[test]
fn test_missing_binary_is_a_hard_failure() {
    let diags = lower_err(
        "gpu.module @kernels
         func @main(%n: index) {
           gpu.launch_func @kernels::@k blocks in (%n, %n, %n) threads in (%n, %n, %n)
           return
         }",
        &LoweringOptions::default(),
    );
    assert_eq!(diags[0].message, "missing `gpu.binary` attribute");
    assert_eq!(diags[0].span.start, 0);
    assert_eq!(diags[1].message, "failed to legalize operation 'gpu.launch_func'");
    assert_eq!(
        diags[1].notes,
        vec!["gpu.launch_func: missing `gpu.binary` attribute"]
    );
}

#[test]
fn test_unknown_kernel_module() {
    let diags = lower_err(
        "func @main(%n: index) {
           gpu.launch_func @nowhere::@k blocks in (%n, %n, %n) threads in (%n, %n, %n)
           return
         }",
        &LoweringOptions::default(),
    );
    assert_eq!(diags[0].message, "unknown kernel module '@nowhere'");
}

#[test]
fn test_custom_binary_annotation() {
    let m = lower_with(
        r#"gpu.module @kernels attributes {nvvm.cubin = "CUBIN"}
           func @main(%n: index) {
             gpu.launch_func @kernels::@k blocks in (%n, %n, %n) threads in (%n, %n, %n)
             return
           }"#,
        &LoweringOptions::default().with_gpu_binary_annotation("nvvm.cubin"),
    );
    assert!(m.gpu_modules.is_empty());
    assert_eq!(m.global("kernels_gpubin_cst").unwrap().bytes, b"CUBIN");
    assert_eq!(m.global("kernels_k_kernel_name").unwrap().bytes, b"k\0");
}

#[test]
fn test_invalid_options_are_rejected() {
    let err = lower_module(Module::new(), &LoweringOptions::default().with_index_bitwidth(16))
        .unwrap_err();
    assert!(matches!(err, LoweringError::Config(_)));
    assert_eq!(err.diagnostics().len(), 1);
}

#[test]
fn test_pending_conversions() {
    let m = parse(
        "func @main() {
           %c = constant 1 : i32
           %t = gpu.wait async
           gpu.set_default_device %c
           return %t
         }",
    );
    let names: Vec<&str> = pending_conversions(&m, &LoweringOptions::default())
        .iter()
        .map(|op| op.kind.name())
        .collect();
    assert_eq!(names, vec!["gpu.wait", "gpu.set_default_device", "return"]);
}

#[test]
fn test_stats() {
    let (_, stats) = lower_module_with_stats(
        parse(
            "func @main() {
               %t = gpu.wait async
               gpu.wait [%t]
               return
             }",
        ),
        &LoweringOptions::default(),
    )
    .unwrap();
    assert_eq!(stats.converted, 2);
    assert_eq!(stats.runtime_functions, 3);
    assert_eq!(stats.sweeps, 2);
}
