//! Kernel launch lowering.
//!
//! A `gpu.launch_func` becomes, in order:
//!
//! ```text
//! mgpuModuleLoad(<module>_gpubin_cst)
//! mgpuModuleGetFunction(module, <module>_<kernel>_kernel_name)
//! [mgpuStreamCreate()]                     ; only without a dependency
//! <kernel parameter block>
//! mgpuLaunchKernel(f, gx, gy, gz, bx, by, bz, shmem, stream, params, null)
//! [mgpuStreamSynchronize, mgpuStreamDestroy] ; synchronous launches
//! mgpuModuleUnload(module)
//! ```
//!
//! Every check runs before the first emission, so a failing launch leaves
//! nothing behind.

use crate::diagnostic::Diagnostic;
use crate::ir::{Attr, GepIndex, LaunchFunc, Type, ValueId};

use super::descriptor::{MemRefDescriptor, UnrankedMemRefDescriptor};
use super::registry::{
    LAUNCH_KERNEL, MODULE_GET_FUNCTION, MODULE_LOAD, MODULE_UNLOAD, STREAM_CREATE, STREAM_DESTROY,
    STREAM_SYNCHRONIZE,
};
use super::rewriter::{MatchFailure, Replacement, Rewriter};
use super::rules::require_converted;

/// Suffix of the global holding a kernel module's binary.
pub const GPU_BINARY_SUFFIX: &str = "_gpubin_cst";

pub fn binary_global_name(module: &str) -> String {
    format!("{}{}", module, GPU_BINARY_SUFFIX)
}

pub fn kernel_name_global_name(module: &str, kernel: &str) -> String {
    format!("{}_{}_kernel_name", module, kernel)
}

/// Launch operands split by role.
struct LaunchOperands<'a> {
    dependency: Option<ValueId>,
    grid: &'a [ValueId],
    block: &'a [ValueId],
    dynamic_shared_memory: Option<ValueId>,
    args: &'a [ValueId],
}

impl<'a> LaunchOperands<'a> {
    fn split(launch: &LaunchFunc, operands: &'a [ValueId]) -> Self {
        let (deps, rest) = operands.split_at(launch.deps.len());
        let (grid, rest) = rest.split_at(3);
        let (block, rest) = rest.split_at(3);
        let (dynamic_shared_memory, args) = match launch.dynamic_shared_memory {
            Some(_) => (rest.first().copied(), &rest[1..]),
            None => (None, rest),
        };
        debug_assert_eq!(args.len(), launch.args.len());
        Self {
            dependency: deps.first().copied(),
            grid,
            block,
            dynamic_shared_memory,
            args,
        }
    }
}

pub(crate) fn lower_launch(
    rw: &mut Rewriter<'_>,
    launch: &LaunchFunc,
    operands: &[ValueId],
) -> Result<Replacement, MatchFailure> {
    require_converted(rw, operands)?;
    if launch.deps.len() > 1 {
        return Err(MatchFailure::decline(format!(
            "cannot convert with more than one async dependency, found {}",
            launch.deps.len()
        )));
    }
    if launch.token.is_none() && !launch.deps.is_empty() {
        return Err(MatchFailure::decline(
            "cannot convert a synchronous launch with async dependencies",
        ));
    }

    let blob = binary_blob(rw, launch)?;
    let arg_types: Vec<Type> = launch.args.iter().map(|&a| rw.ty(a).clone()).collect();
    if rw.options().kernel_bare_ptr_call_conv {
        check_bare_ptr_args(rw, launch, &arg_types)?;
    }

    let ops = LaunchOperands::split(launch, operands);

    let blob_ptr = rw.string_ptr(&binary_global_name(&launch.kernel_module), &blob);
    let module = rw.call_value(&MODULE_LOAD, &[blob_ptr]);
    let mut name = launch.kernel_name.clone().into_bytes();
    name.push(0);
    let name_ptr = rw.string_ptr(
        &kernel_name_global_name(&launch.kernel_module, &launch.kernel_name),
        &name,
    );
    let function = rw.call_value(&MODULE_GET_FUNCTION, &[module, name_ptr]);

    let zero = rw.i32_const(0);
    let stream = match ops.dependency {
        Some(stream) => stream,
        None => rw.call_value(&STREAM_CREATE, &[]),
    };
    let params = kernel_params(rw, &arg_types, ops.args);
    let extra = rw.null(Type::i8_ptr_ptr());

    let mut args = Vec::with_capacity(LAUNCH_KERNEL.params.len());
    args.push(function);
    args.extend_from_slice(ops.grid);
    args.extend_from_slice(ops.block);
    args.push(ops.dynamic_shared_memory.unwrap_or(zero));
    args.extend([stream, params, extra]);
    rw.call_void(&LAUNCH_KERNEL, &args);

    let replacement = if launch.token.is_some() {
        Replacement::Values(vec![stream])
    } else {
        rw.call_void(&STREAM_SYNCHRONIZE, &[stream]);
        rw.call_void(&STREAM_DESTROY, &[stream]);
        Replacement::Erase
    };
    rw.call_void(&MODULE_UNLOAD, &[module]);
    Ok(replacement)
}

/// The kernel module's binary, read from the configured attribute.
fn binary_blob(rw: &Rewriter<'_>, launch: &LaunchFunc) -> Result<Vec<u8>, MatchFailure> {
    let Some(kernel_module) = rw.module().gpu_module(&launch.kernel_module) else {
        return Err(MatchFailure::hard(
            Diagnostic::error(
                format!("unknown kernel module '@{}'", launch.kernel_module),
                rw.span(),
            )
            .with_help("declare it with `gpu.module @name attributes {...}`".to_string()),
        ));
    };
    let annotation = &rw.options().gpu_binary_annotation;
    match kernel_module.attr(annotation) {
        Some(Attr::Str(bytes)) => Ok(bytes.clone()),
        _ => Err(MatchFailure::hard(
            Diagnostic::error(format!("missing `{}` attribute", annotation), kernel_module.span)
                .with_note(format!(
                    "required to launch '@{}::@{}'",
                    launch.kernel_module, launch.kernel_name
                )),
        )),
    }
}

/// With bare pointers a kernel receives only the data pointer, so the
/// buffer's shape and layout must be fully known statically.
fn check_bare_ptr_args(
    rw: &Rewriter<'_>,
    launch: &LaunchFunc,
    arg_types: &[Type],
) -> Result<(), MatchFailure> {
    for ty in arg_types {
        let passable = match ty {
            Type::MemRef(m) => m.has_static_shape() && m.has_identity_layout(),
            Type::UnrankedMemRef(_) => false,
            _ => true,
        };
        if !passable {
            return Err(MatchFailure::hard(
                Diagnostic::error(
                    format!(
                        "cannot pass {} as a bare pointer to kernel '@{}::@{}'",
                        ty, launch.kernel_module, launch.kernel_name
                    ),
                    rw.span(),
                )
                .with_help(
                    "bare-pointer kernels accept only statically shaped buffers with an identity layout"
                        .to_string(),
                ),
            ));
        }
    }
    Ok(())
}

/// Flatten one kernel argument into the values the kernel receives.
fn promote(rw: &mut Rewriter<'_>, ty: &Type, value: ValueId) -> Vec<ValueId> {
    match ty {
        Type::MemRef(_) if rw.options().kernel_bare_ptr_call_conv => {
            vec![MemRefDescriptor::new(value).aligned_ptr(rw)]
        }
        Type::MemRef(m) => MemRefDescriptor::new(value).unpack(rw, m.rank()),
        Type::UnrankedMemRef(_) => UnrankedMemRefDescriptor::new(value).unpack(rw),
        _ => vec![value],
    }
}

/// Stack-allocated parameter block: a struct holding every promoted
/// argument and an `i8*` array pointing at its fields.
fn kernel_params(rw: &mut Rewriter<'_>, arg_types: &[Type], args: &[ValueId]) -> ValueId {
    let mut values = Vec::new();
    for (ty, &arg) in arg_types.iter().zip(args) {
        values.extend(promote(rw, ty, arg));
    }
    let field_types: Vec<Type> = values.iter().map(|&v| rw.ty(v).clone()).collect();

    let one = rw.i32_const(1);
    let block = rw.alloca(one, Type::Struct(field_types.clone()));
    let count = rw.i32_const(values.len() as i32);
    let array = rw.alloca(count, Type::i8_ptr());
    for (i, (&value, field_ty)) in values.iter().zip(field_types).enumerate() {
        let field = rw.gep(
            block,
            vec![GepIndex::Const(0), GepIndex::Const(i as i64)],
            Type::ptr(field_ty),
        );
        rw.store(value, field);
        let slot = rw.gep(array, vec![GepIndex::Const(i as i64)], Type::i8_ptr_ptr());
        let erased = rw.bitcast(field, Type::i8_ptr());
        rw.store(erased, slot);
    }
    array
}
