use crate::ir::ValueId;
use crate::lower::registry::SET_DEFAULT_DEVICE;
use crate::lower::rewriter::{MatchFailure, Replacement, Rewriter};

pub(super) fn set_default_device(
    rw: &mut Rewriter<'_>,
    operands: &[ValueId],
) -> Result<Replacement, MatchFailure> {
    rw.call_void(&SET_DEFAULT_DEVICE, &[operands[0]]);
    Ok(Replacement::Erase)
}
