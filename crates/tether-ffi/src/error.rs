//! Per-thread error reporting at the C boundary.

use std::cell::Cell;
use std::os::raw::c_int;
use std::panic::{self, AssertUnwindSafe};
use tether_core::ClientError;
use tracing::{debug, error};

/// The last call succeeded.
pub const TETHER_OK: c_int = 0;

/// A panic was caught inside the library.
pub const TETHER_ERR_INTERNAL: c_int = 5;

thread_local! {
    static LAST_ERROR: Cell<c_int> = const { Cell::new(TETHER_OK) };
}

pub(crate) fn set_last_error(code: c_int) {
    LAST_ERROR.with(|last| last.set(code));
}

pub(crate) fn last_error() -> c_int {
    LAST_ERROR.with(Cell::get)
}

/// Run `f`, recording its outcome, and never let a panic cross into C.
///
/// Returns `0` on success and `-1` on any failure.
pub(crate) fn boundary(call: &'static str, f: impl FnOnce() -> Result<(), ClientError>) -> c_int {
    match guard(call, f) {
        Some(()) => 0,
        None => -1,
    }
}

/// Like [`boundary`] but hands back the produced value.
pub(crate) fn guard<T>(
    call: &'static str,
    f: impl FnOnce() -> Result<T, ClientError>,
) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => {
            set_last_error(TETHER_OK);
            Some(value)
        }
        Ok(Err(err)) => {
            debug!(call, error = %err, "Call rejected");
            set_last_error(err.kind().code());
            None
        }
        Err(_) => {
            error!(call, "Panic caught at the C boundary");
            set_last_error(TETHER_ERR_INTERNAL);
            None
        }
    }
}
