//! Telling streams from events.
//!
//! After lowering, every async token is an opaque `i8*`. What kind of
//! handle it is depends only on which runtime call produced it: a value
//! defined by `mgpuStreamCreate` is a stream, anything else is an event.

use crate::ir::{Module, ValueId};

use super::registry::STREAM_CREATE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Stream,
    Event,
}

impl HandleKind {
    pub fn of(module: &Module, handle: ValueId) -> Self {
        if module.defining_callee(handle) == Some(STREAM_CREATE.name) {
            HandleKind::Stream
        } else {
            HandleKind::Event
        }
    }

    pub fn is_stream(module: &Module, handle: ValueId) -> bool {
        Self::of(module, handle) == HandleKind::Stream
    }
}
