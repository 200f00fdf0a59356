//! Runtime entry points and the registry that declares them.
//!
//! Every call the lowering emits goes through a [`CallSignature`]. The
//! [`CallRegistry`] turns the first use of a signature into a
//! [`FuncDecl`] at the top of the module and hands out the same
//! [`FuncRef`] for every later use.

use std::collections::HashMap;

use crate::ir::{FuncDecl, Module, Type};

/// Argument and return types of the runtime ABI, before the index width is
/// known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtType {
    Void,
    /// `i8*`
    Ptr,
    /// `i8**`
    PtrPtr,
    I32,
    /// Integer of the configured index width.
    IntPtr,
}

impl RtType {
    pub fn lower(self, index_bits: u32) -> Type {
        match self {
            RtType::Void => Type::Void,
            RtType::Ptr => Type::i8_ptr(),
            RtType::PtrPtr => Type::i8_ptr_ptr(),
            RtType::I32 => Type::Int(32),
            RtType::IntPtr => Type::Int(index_bits),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct CallSignature {
    pub name: &'static str,
    pub ret: RtType,
    pub params: &'static [RtType],
}

impl CallSignature {
    pub fn returns_value(&self) -> bool {
        self.ret != RtType::Void
    }

    pub fn decl(&self, index_bits: u32) -> FuncDecl {
        FuncDecl {
            name: self.name.to_string(),
            ret: self.ret.lower(index_bits),
            params: self.params.iter().map(|p| p.lower(index_bits)).collect(),
        }
    }
}

use RtType::{IntPtr, Ptr, PtrPtr, Void, I32};

pub const MODULE_LOAD: CallSignature = CallSignature {
    name: "mgpuModuleLoad",
    ret: Ptr,
    params: &[Ptr],
};
pub const MODULE_UNLOAD: CallSignature = CallSignature {
    name: "mgpuModuleUnload",
    ret: Void,
    params: &[Ptr],
};
pub const MODULE_GET_FUNCTION: CallSignature = CallSignature {
    name: "mgpuModuleGetFunction",
    ret: Ptr,
    params: &[Ptr, Ptr],
};
/// function, grid x/y/z, block x/y/z, dynamic shared memory, stream,
/// kernel params, extra
pub const LAUNCH_KERNEL: CallSignature = CallSignature {
    name: "mgpuLaunchKernel",
    ret: Void,
    params: &[
        Ptr, IntPtr, IntPtr, IntPtr, IntPtr, IntPtr, IntPtr, I32, Ptr, PtrPtr, PtrPtr,
    ],
};
pub const STREAM_CREATE: CallSignature = CallSignature {
    name: "mgpuStreamCreate",
    ret: Ptr,
    params: &[],
};
pub const STREAM_DESTROY: CallSignature = CallSignature {
    name: "mgpuStreamDestroy",
    ret: Void,
    params: &[Ptr],
};
pub const STREAM_SYNCHRONIZE: CallSignature = CallSignature {
    name: "mgpuStreamSynchronize",
    ret: Void,
    params: &[Ptr],
};
pub const STREAM_WAIT_EVENT: CallSignature = CallSignature {
    name: "mgpuStreamWaitEvent",
    ret: Void,
    params: &[Ptr, Ptr],
};
pub const EVENT_CREATE: CallSignature = CallSignature {
    name: "mgpuEventCreate",
    ret: Ptr,
    params: &[],
};
pub const EVENT_DESTROY: CallSignature = CallSignature {
    name: "mgpuEventDestroy",
    ret: Void,
    params: &[Ptr],
};
pub const EVENT_SYNCHRONIZE: CallSignature = CallSignature {
    name: "mgpuEventSynchronize",
    ret: Void,
    params: &[Ptr],
};
/// event, stream
pub const EVENT_RECORD: CallSignature = CallSignature {
    name: "mgpuEventRecord",
    ret: Void,
    params: &[Ptr, Ptr],
};
/// rank, descriptor pointer, element size in bytes
pub const HOST_REGISTER: CallSignature = CallSignature {
    name: "mgpuMemHostRegisterMemRef",
    ret: Void,
    params: &[IntPtr, Ptr, IntPtr],
};
/// size in bytes, stream
pub const MEM_ALLOC: CallSignature = CallSignature {
    name: "mgpuMemAlloc",
    ret: Ptr,
    params: &[IntPtr, Ptr],
};
/// pointer, stream
pub const MEM_FREE: CallSignature = CallSignature {
    name: "mgpuMemFree",
    ret: Void,
    params: &[Ptr, Ptr],
};
/// dst, src, size in bytes, stream
pub const MEMCPY: CallSignature = CallSignature {
    name: "mgpuMemcpy",
    ret: Void,
    params: &[Ptr, Ptr, IntPtr, Ptr],
};
/// dst, value, element count, stream
pub const MEMSET32: CallSignature = CallSignature {
    name: "mgpuMemset32",
    ret: Void,
    params: &[Ptr, I32, IntPtr, Ptr],
};
pub const SET_DEFAULT_DEVICE: CallSignature = CallSignature {
    name: "mgpuSetDefaultDevice",
    ret: Void,
    params: &[I32],
};

/// The whole runtime ABI, in declaration-table order.
pub const RUNTIME_ABI: [&CallSignature; 18] = [
    &MODULE_LOAD,
    &MODULE_UNLOAD,
    &MODULE_GET_FUNCTION,
    &LAUNCH_KERNEL,
    &STREAM_CREATE,
    &STREAM_DESTROY,
    &STREAM_SYNCHRONIZE,
    &STREAM_WAIT_EVENT,
    &EVENT_CREATE,
    &EVENT_DESTROY,
    &EVENT_SYNCHRONIZE,
    &EVENT_RECORD,
    &HOST_REGISTER,
    &MEM_ALLOC,
    &MEM_FREE,
    &MEMCPY,
    &MEMSET32,
    &SET_DEFAULT_DEVICE,
];

/// A declared runtime function: its name and position in `Module::decls`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuncRef {
    pub name: &'static str,
    pub decl: usize,
}

/// Name → declaration table for one lowering run.
#[derive(Debug)]
pub struct CallRegistry {
    index_bits: u32,
    declared: HashMap<&'static str, FuncRef>,
}

impl CallRegistry {
    pub fn new(index_bits: u32) -> Self {
        Self {
            index_bits,
            declared: HashMap::new(),
        }
    }

    /// Declare `sig` in `module` on first use; afterwards return the same
    /// reference. A declaration the module already carries is reused.
    pub fn get_or_create(&mut self, module: &mut Module, sig: &'static CallSignature) -> FuncRef {
        if let Some(&func) = self.declared.get(sig.name) {
            debug_assert_eq!(
                module.decls[func.decl],
                sig.decl(self.index_bits),
                "conflicting signatures for {}",
                sig.name
            );
            return func;
        }
        let decl = match module.decls.iter().position(|d| d.name == sig.name) {
            Some(i) => i,
            None => {
                module.decls.push(sig.decl(self.index_bits));
                tracing::debug!(callee = sig.name, "declared runtime function");
                module.decls.len() - 1
            }
        };
        let func = FuncRef {
            name: sig.name,
            decl,
        };
        self.declared.insert(sig.name, func);
        func
    }

    pub fn len(&self) -> usize {
        self.declared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declared.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declares_once() {
        let mut module = Module::new();
        let mut registry = CallRegistry::new(64);
        let a = registry.get_or_create(&mut module, &STREAM_CREATE);
        let b = registry.get_or_create(&mut module, &STREAM_CREATE);
        assert_eq!(a, b);
        assert_eq!(module.decls.len(), 1);
        assert_eq!(registry.len(), 1);
        registry.get_or_create(&mut module, &STREAM_DESTROY);
        assert_eq!(module.decls.len(), 2);
    }

    #[test]
    fn test_reuses_existing_declaration() {
        let mut module = Module::new();
        module.decls.push(MEMCPY.decl(64));
        let mut registry = CallRegistry::new(64);
        let f = registry.get_or_create(&mut module, &MEMCPY);
        assert_eq!(f.decl, 0);
        assert_eq!(module.decls.len(), 1);
    }

    #[test]
    fn test_index_width_in_signature() {
        let decl = HOST_REGISTER.decl(32);
        assert_eq!(
            decl.params,
            vec![Type::Int(32), Type::i8_ptr(), Type::Int(32)]
        );
        assert_eq!(decl.ret, Type::Void);
    }

    #[test]
    fn test_launch_kernel_abi() {
        let decl = LAUNCH_KERNEL.decl(64);
        assert_eq!(decl.params.len(), 11);
        assert_eq!(decl.params[7], Type::Int(32));
        assert_eq!(decl.params[9], Type::i8_ptr_ptr());
        assert_eq!(decl.params[10], Type::i8_ptr_ptr());
    }

    #[test]
    fn test_abi_names_are_unique() {
        let mut names: Vec<&str> = RUNTIME_ABI.iter().map(|s| s.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), RUNTIME_ABI.len());
        assert!(names.iter().all(|n| n.starts_with("mgpu")));
    }
}
