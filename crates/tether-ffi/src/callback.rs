//! Bridges inbound events to the C callback.

use std::ffi::{c_void, CString};
use std::os::raw::c_char;
use tether_core::{InboundEvent, MessageHandler};
use tracing::trace;

/// Signature of the message callback registered with `tether_create`.
///
/// Both strings are only valid for the duration of the call.
pub type TetherCallback =
    Option<unsafe extern "C" fn(sender_id: *const c_char, payload: *const c_char, context: *mut c_void)>;

/// Opaque host pointer passed back to the callback untouched.
#[derive(Clone, Copy)]
struct UserData(*mut c_void);

// The library never dereferences the context; thread safety of what it
// points to is the host's contract.
unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

/// Forwards each inbound message to a C function pointer.
pub(crate) struct CallbackHandler {
    callback: TetherCallback,
    context: UserData,
}

impl CallbackHandler {
    pub(crate) fn new(callback: TetherCallback, context: *mut c_void) -> Self {
        Self {
            callback,
            context: UserData(context),
        }
    }
}

/// C string for `bytes`, cut at the first NUL.
fn to_c_string(bytes: &[u8]) -> CString {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    CString::new(&bytes[..end]).unwrap_or_default()
}

impl MessageHandler for CallbackHandler {
    fn on_message(&self, event: &InboundEvent) {
        let Some(callback) = self.callback else {
            trace!(sender = %event.sender_id, "No callback registered, dropping message");
            return;
        };
        let sender = to_c_string(event.sender_id.as_bytes());
        let payload = to_c_string(&event.payload);
        // SAFETY: the host registered `callback` for exactly this signature
        // and both strings outlive the call.
        unsafe { callback(sender.as_ptr(), payload.as_ptr(), self.context.0) };
    }
}
