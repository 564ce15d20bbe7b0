//! The C surface driven the way a C host would, over the simulator.

use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tether::*;

macro_rules! cstr {
    ($s:literal) => {
        concat!($s, "\0").as_ptr().cast::<c_char>()
    };
}

#[derive(Default)]
struct Host {
    handle: AtomicU64,
    messages: Mutex<Vec<(String, String)>>,
}

impl Host {
    fn context(&self) -> *mut c_void {
        self as *const Host as *mut c_void
    }

    fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }
}

unsafe fn host<'a>(context: *mut c_void) -> &'a Host {
    &*(context as *const Host)
}

unsafe fn record(sender: *const c_char, payload: *const c_char, context: *mut c_void) {
    let host = host(context);
    host.messages.lock().unwrap().push((
        CStr::from_ptr(sender).to_string_lossy().into_owned(),
        CStr::from_ptr(payload).to_string_lossy().into_owned(),
    ));
}

unsafe extern "C" fn on_message(sender: *const c_char, payload: *const c_char, context: *mut c_void) {
    record(sender, payload, context);
}

/// Answers the first broadcast with a directed message from inside the callback.
unsafe extern "C" fn reply_once(sender: *const c_char, payload: *const c_char, context: *mut c_void) {
    let first = host(context).messages.lock().unwrap().is_empty();
    record(sender, payload, context);
    if first {
        let handle = host(context).handle.load(Ordering::SeqCst);
        assert_eq!(tether_state(handle), 3);
        assert_eq!(tether_send_peer(handle, cstr!("peer42"), cstr!("pong")), 0);
    }
}

unsafe extern "C" fn destroy_self(sender: *const c_char, payload: *const c_char, context: *mut c_void) {
    record(sender, payload, context);
    tether_destroy(host(context).handle.load(Ordering::SeqCst));
}

struct Strings {
    app_id: CString,
    client_id: CString,
    channel: CString,
}

fn create(host: &Host, callback: TetherCallback) -> TetherHandle {
    let strings = Strings {
        app_id: CString::new("A").unwrap(),
        client_id: CString::new("u1").unwrap(),
        channel: CString::new("c1").unwrap(),
    };
    let config = TetherConfig {
        app_id: strings.app_id.as_ptr(),
        token: ptr::null(),
        channel: strings.channel.as_ptr(),
        client_id: strings.client_id.as_ptr(),
        endpoint: ptr::null(),
    };
    let handle = tether_create(&config, callback, host.context());
    assert_ne!(handle, 0);
    host.handle.store(handle, Ordering::SeqCst);
    handle
}

#[test]
fn publish_only_after_join() {
    let host = Host::default();
    let handle = create(&host, Some(on_message));

    assert_eq!(tether_connect(handle), 0);
    assert_eq!(tether_login(handle, cstr!("tok"), cstr!("u1")), 0);

    assert_eq!(tether_publish_channel(handle, cstr!("x")), -1);
    assert_eq!(tether_last_error(), 2);
    assert!(host.messages().is_empty());

    assert_eq!(tether_join_channel(handle, cstr!("c1")), 0);
    assert_eq!(tether_publish_channel(handle, cstr!("x")), 0);
    assert_eq!(tether_last_error(), TETHER_OK);
    assert_eq!(host.messages(), vec![("u1".to_string(), "x".to_string())]);

    tether_destroy(handle);
}

#[test]
fn directed_message_reports_target_as_sender() {
    let host = Host::default();
    let handle = create(&host, Some(on_message));

    assert_eq!(tether_connect(handle), 0);
    assert_eq!(tether_login(handle, ptr::null(), cstr!("u1")), 0);
    assert_eq!(tether_send_peer(handle, cstr!("peer42"), cstr!("ping")), 0);
    assert_eq!(host.messages(), vec![("peer42".to_string(), "ping".to_string())]);

    tether_destroy(handle);
}

#[test]
fn state_and_disconnect() {
    let host = Host::default();
    let handle = create(&host, None);

    assert_eq!(tether_state(handle), 0);
    assert_eq!(tether_login(handle, ptr::null(), cstr!("u1")), -1);
    assert_eq!(tether_last_error(), 2);

    assert_eq!(tether_connect(handle), 0);
    assert_eq!(tether_login(handle, ptr::null(), cstr!("u1")), 0);
    assert_eq!(tether_join_channel(handle, cstr!("c1")), 0);
    assert_eq!(tether_state(handle), 3);
    assert_eq!(tether_set_token(handle, cstr!("fresh")), 0);
    assert_eq!(tether_leave_channel(handle), 0);
    assert_eq!(tether_state(handle), 2);

    assert_eq!(tether_disconnect(handle), 0);
    assert_eq!(tether_disconnect(handle), 0);
    assert_eq!(tether_state(handle), 0);

    tether_destroy(handle);
}

#[test]
fn bad_arguments_are_rejected() {
    assert_eq!(tether_create(ptr::null(), None, ptr::null_mut()), 0);
    assert_eq!(tether_last_error(), 3);

    let missing_client = TetherConfig {
        app_id: cstr!("A"),
        token: ptr::null(),
        channel: ptr::null(),
        client_id: ptr::null(),
        endpoint: ptr::null(),
    };
    assert_eq!(tether_create(&missing_client, None, ptr::null_mut()), 0);
    assert_eq!(tether_last_error(), 3);

    let host = Host::default();
    let handle = create(&host, None);
    assert_eq!(tether_connect(handle), 0);
    assert_eq!(tether_login(handle, ptr::null(), ptr::null()), -1);
    assert_eq!(tether_last_error(), 3);
    tether_destroy(handle);
}

#[test]
fn destroyed_handles_are_inert() {
    let host = Host::default();
    let handle = create(&host, Some(on_message));

    tether_destroy(handle);
    tether_destroy(handle);

    assert_eq!(tether_connect(handle), -1);
    assert_eq!(tether_last_error(), 1);
    assert_eq!(tether_state(handle), -1);
    assert_eq!(tether_publish_channel(handle, cstr!("x")), -1);
    assert_eq!(tether_connect(0), -1);
    tether_destroy(0);
}

#[test]
fn callback_can_call_back_in() {
    let host = Host::default();
    let handle = create(&host, Some(reply_once));

    assert_eq!(tether_connect(handle), 0);
    assert_eq!(tether_login(handle, ptr::null(), cstr!("u1")), 0);
    assert_eq!(tether_join_channel(handle, cstr!("c1")), 0);
    assert_eq!(tether_publish_channel(handle, cstr!("hello")), 0);

    assert_eq!(
        host.messages(),
        vec![
            ("u1".to_string(), "hello".to_string()),
            ("peer42".to_string(), "pong".to_string()),
        ]
    );

    tether_destroy(handle);
}

#[test]
fn callback_can_destroy_its_own_client() {
    let host = Host::default();
    let handle = create(&host, Some(destroy_self));

    assert_eq!(tether_connect(handle), 0);
    assert_eq!(tether_login(handle, ptr::null(), cstr!("u1")), 0);
    assert_eq!(tether_send_peer(handle, cstr!("peer42"), cstr!("bye")), 0);

    assert_eq!(host.messages().len(), 1);
    assert_eq!(tether_state(handle), -1);
    assert_eq!(tether_send_peer(handle, cstr!("peer42"), cstr!("again")), -1);
    assert_eq!(host.messages().len(), 1);
}
