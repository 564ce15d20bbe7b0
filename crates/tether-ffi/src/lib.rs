//! # tether-ffi
//!
//! C ABI for Tether clients. The matching header is `include/tether.h`.
//!
//! Every call returns `0` when the request was accepted and `-1` when it was
//! rejected synchronously; `tether_last_error` then tells why. Failures the
//! service reports later are only logged.
//!
//! Each client sits behind a mutex, so concurrent calls on one handle are
//! serialized. Callbacks run with that mutex released and may call back into
//! the library, including `tether_destroy` on their own handle.

// Entry points take raw pointers from C and check them for NULL.
#![allow(clippy::not_unsafe_ptr_arg_deref)]

mod callback;
mod error;
mod registry;

use std::ffi::{c_void, CStr};
use std::os::raw::{c_char, c_int};
use std::sync::Arc;
use tether_core::{Backend, Client, ClientConfig, ClientError, SimulatorBackend};
use tether_transport::{RemoteBackend, WebSocketConfig};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use callback::TetherCallback;
pub use error::{TETHER_ERR_INTERNAL, TETHER_OK};
pub use registry::TetherHandle;

/// Client settings passed to [`tether_create`]. All strings are UTF-8 and
/// NUL-terminated.
#[repr(C)]
pub struct TetherConfig {
    /// Tenant/application identifier. Required.
    pub app_id: *const c_char,
    /// Default token. May be NULL.
    pub token: *const c_char,
    /// Default channel. May be NULL.
    pub channel: *const c_char,
    /// Local participant identifier. Required.
    pub client_id: *const c_char,
    /// Service URL. NULL selects the in-process simulator.
    pub endpoint: *const c_char,
}

/// Borrow a C string, `None` for NULL.
///
/// # Safety
///
/// `ptr` must be NULL or point to a NUL-terminated string that outlives `'a`.
unsafe fn opt_str<'a>(ptr: *const c_char) -> Result<Option<&'a str>, ClientError> {
    if ptr.is_null() {
        return Ok(None);
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map(Some)
        .map_err(|_| ClientError::InvalidArgument("string is not valid UTF-8"))
}

/// Borrow a required C string.
///
/// # Safety
///
/// Same as [`opt_str`].
unsafe fn req_str<'a>(ptr: *const c_char, missing: &'static str) -> Result<&'a str, ClientError> {
    opt_str(ptr)?.ok_or(ClientError::InvalidArgument(missing))
}

fn on_client(
    call: &'static str,
    handle: TetherHandle,
    op: impl FnOnce(&mut Client) -> Result<(), ClientError>,
) -> c_int {
    error::boundary(call, || registry::lookup(handle)?.with_client(op))
}

/// Create a client. Returns `0` on failure.
///
/// The callback is never invoked before this returns.
#[no_mangle]
pub extern "C" fn tether_create(
    config: *const TetherConfig,
    callback: TetherCallback,
    context: *mut c_void,
) -> TetherHandle {
    error::guard("tether_create", || {
        // SAFETY: the caller passes NULL or a valid config whose strings
        // live for the duration of this call.
        let config = unsafe { config.as_ref() }
            .ok_or(ClientError::InvalidArgument("config must not be NULL"))?;
        let (settings, endpoint) = unsafe {
            let mut settings = ClientConfig::new(
                req_str(config.app_id, "app_id must not be NULL")?,
                req_str(config.client_id, "client_id must not be NULL")?,
            );
            if let Some(token) = opt_str(config.token)? {
                settings = settings.with_token(token);
            }
            if let Some(channel) = opt_str(config.channel)? {
                settings = settings.with_channel(channel);
            }
            (settings, opt_str(config.endpoint)?)
        };

        let backend: Box<dyn Backend> = match endpoint {
            Some(url) => Box::new(RemoteBackend::websocket(WebSocketConfig::new(url))),
            None => Box::new(SimulatorBackend::new()),
        };
        let handler = Arc::new(callback::CallbackHandler::new(callback, context));
        let client = Client::with_handler(settings, backend, handler)?;

        let handle = registry::insert(client);
        debug!(handle, "Handle created");
        Ok(handle)
    })
    .unwrap_or(0)
}

/// Destroy a client. Unknown handles are ignored.
///
/// No callback for this client starts after this returns. Called from
/// inside the client's own callback, it does not wait for that callback.
#[no_mangle]
pub extern "C" fn tether_destroy(handle: TetherHandle) {
    error::boundary("tether_destroy", || {
        let Some(entry) = registry::remove(handle) else {
            return Ok(());
        };
        entry.dispatcher.close();
        if let Ok(mut client) = entry.client.lock() {
            client.close();
        }
        debug!(handle, "Handle destroyed");
        Ok(())
    });
}

/// Establish the connection.
#[no_mangle]
pub extern "C" fn tether_connect(handle: TetherHandle) -> c_int {
    on_client("tether_connect", handle, Client::connect)
}

/// End the session from any state.
#[no_mangle]
pub extern "C" fn tether_disconnect(handle: TetherHandle) -> c_int {
    on_client("tether_disconnect", handle, Client::disconnect)
}

/// Authenticate as `participant_id`. A NULL or empty `token` falls back to
/// the configured one.
#[no_mangle]
pub extern "C" fn tether_login(
    handle: TetherHandle,
    token: *const c_char,
    participant_id: *const c_char,
) -> c_int {
    on_client("tether_login", handle, |client| {
        // SAFETY: NULL or valid strings for the duration of the call.
        let (token, participant) = unsafe {
            (
                opt_str(token)?,
                req_str(participant_id, "participant_id must not be NULL")?,
            )
        };
        client.authenticate(token, participant)
    })
}

/// Join `channel_id`, leaving any current channel.
#[no_mangle]
pub extern "C" fn tether_join_channel(handle: TetherHandle, channel_id: *const c_char) -> c_int {
    on_client("tether_join_channel", handle, |client| {
        // SAFETY: NULL or a valid string for the duration of the call.
        let channel = unsafe { req_str(channel_id, "channel_id must not be NULL")? };
        client.join_channel(channel)
    })
}

/// Leave the current channel.
#[no_mangle]
pub extern "C" fn tether_leave_channel(handle: TetherHandle) -> c_int {
    on_client("tether_leave_channel", handle, Client::leave_channel)
}

/// Broadcast `payload` on the joined channel.
#[no_mangle]
pub extern "C" fn tether_publish_channel(handle: TetherHandle, payload: *const c_char) -> c_int {
    on_client("tether_publish_channel", handle, |client| {
        // SAFETY: NULL or a valid string for the duration of the call.
        let payload = unsafe { req_str(payload, "payload must not be NULL")? };
        client.publish_to_channel(payload.as_bytes().to_vec())
    })
}

/// Send `payload` to one participant.
#[no_mangle]
pub extern "C" fn tether_send_peer(
    handle: TetherHandle,
    target_id: *const c_char,
    payload: *const c_char,
) -> c_int {
    on_client("tether_send_peer", handle, |client| {
        // SAFETY: NULL or valid strings for the duration of the call.
        let (target, payload) = unsafe {
            (
                req_str(target_id, "target_id must not be NULL")?,
                req_str(payload, "payload must not be NULL")?,
            )
        };
        client.send_to_peer(target, payload.as_bytes().to_vec())
    })
}

/// Replace the session token.
#[no_mangle]
pub extern "C" fn tether_set_token(handle: TetherHandle, token: *const c_char) -> c_int {
    on_client("tether_set_token", handle, |client| {
        // SAFETY: NULL or a valid string for the duration of the call.
        let token = unsafe { req_str(token, "token must not be NULL")? };
        client.renew_token(token)
    })
}

/// Current connection state (`0` disconnected, `1` connected, `2`
/// authenticated, `3` channel joined), or `-1` for an unknown handle.
#[no_mangle]
pub extern "C" fn tether_state(handle: TetherHandle) -> c_int {
    error::guard("tether_state", || {
        let entry = registry::lookup(handle)?;
        let client = entry.client.lock().map_err(|_| ClientError::InvalidHandle)?;
        Ok(client.state().as_i32())
    })
    .unwrap_or(-1)
}

/// Why the last call on this thread failed, `0` if it succeeded.
///
/// `1` invalid handle, `2` invalid state, `3` invalid argument, `4` backend
/// failure, `5` internal error.
#[no_mangle]
pub extern "C" fn tether_last_error() -> c_int {
    error::last_error()
}

/// Log to stderr, filtered by `RUST_LOG` (default `tether=info`).
///
/// Returns `-1` if the process already has a global subscriber.
#[no_mangle]
pub extern "C" fn tether_init_logging() -> c_int {
    let installed = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tether=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
    match installed {
        Ok(()) => {
            info!(version = env!("CARGO_PKG_VERSION"), "Tether logging enabled");
            0
        }
        Err(_) => -1,
    }
}
