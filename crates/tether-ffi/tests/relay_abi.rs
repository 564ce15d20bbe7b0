//! The C surface over the WebSocket backend, against an in-process relay.

use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tether::*;
use tether_relay::{serve, AppState, Config};

macro_rules! cstr {
    ($s:literal) => {
        concat!($s, "\0").as_ptr().cast::<c_char>()
    };
}

struct Relay {
    state: Arc<AppState>,
    endpoint: CString,
}

fn start_relay() -> Relay {
    let mut config = Config::default();
    config.metrics.enabled = false;
    let state = Arc::new(AppState::new(config));

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();

    let served = Arc::clone(&state);
    thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            serve(listener, served).await.unwrap();
        });
    });

    Relay {
        state,
        endpoint: CString::new(format!("ws://{addr}/ws")).unwrap(),
    }
}

#[derive(Default)]
struct Inbox {
    messages: Mutex<Vec<(String, String)>>,
}

impl Inbox {
    fn context(&self) -> *mut c_void {
        self as *const Inbox as *mut c_void
    }

    fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }
}

unsafe extern "C" fn on_message(sender: *const c_char, payload: *const c_char, context: *mut c_void) {
    let inbox = &*(context as *const Inbox);
    inbox.messages.lock().unwrap().push((
        CStr::from_ptr(sender).to_string_lossy().into_owned(),
        CStr::from_ptr(payload).to_string_lossy().into_owned(),
    ));
}

fn create(endpoint: &CString, client_id: &CString, inbox: &Inbox) -> TetherHandle {
    let config = TetherConfig {
        app_id: cstr!("A"),
        token: ptr::null(),
        channel: cstr!("c1"),
        client_id: client_id.as_ptr(),
        endpoint: endpoint.as_ptr(),
    };
    tether_create(&config, Some(on_message), inbox.context())
}

fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn broadcast_and_directed_through_the_relay() {
    let relay = start_relay();
    let (u1, u2) = (CString::new("u1").unwrap(), CString::new("u2").unwrap());
    let (inbox1, inbox2) = (Inbox::default(), Inbox::default());

    let h1 = create(&relay.endpoint, &u1, &inbox1);
    let h2 = create(&relay.endpoint, &u2, &inbox2);
    assert_ne!(h1, 0);
    assert_ne!(h2, 0);

    for (handle, user) in [(h1, &u1), (h2, &u2)] {
        assert_eq!(tether_connect(handle), 0);
        assert_eq!(tether_login(handle, cstr!("tok"), user.as_ptr()), 0);
        assert_eq!(tether_join_channel(handle, cstr!("c1")), 0);
        assert_eq!(tether_state(handle), 3);
    }
    wait_until("both subscriptions", || {
        relay.state.router.subscriber_count("c1") == 2
    });

    assert_eq!(tether_publish_channel(h1, cstr!("hello")), 0);
    assert_eq!(tether_last_error(), TETHER_OK);
    wait_until("broadcast delivery", || !inbox2.messages().is_empty());
    assert_eq!(inbox2.messages(), vec![("u1".to_string(), "hello".to_string())]);

    assert_eq!(tether_send_peer(h2, cstr!("u1"), cstr!("ping")), 0);
    wait_until("directed delivery", || !inbox1.messages().is_empty());
    assert_eq!(inbox1.messages(), vec![("u2".to_string(), "ping".to_string())]);

    tether_destroy(h1);
    tether_destroy(h2);
    wait_until("sessions released", || relay.state.active_connections() == 0);
    assert_eq!(tether_state(h1), -1);
}

#[test]
fn state_rules_hold_over_the_relay() {
    let relay = start_relay();
    let u1 = CString::new("u1").unwrap();
    let inbox = Inbox::default();
    let handle = create(&relay.endpoint, &u1, &inbox);
    assert_ne!(handle, 0);

    assert_eq!(tether_connect(handle), 0);
    assert_eq!(tether_login(handle, ptr::null(), u1.as_ptr()), 0);
    assert_eq!(tether_publish_channel(handle, cstr!("x")), -1);
    assert_eq!(tether_last_error(), 2);

    assert_eq!(tether_disconnect(handle), 0);
    wait_until("logout", || !relay.state.router.is_online("u1"));
    assert_eq!(tether_state(handle), 0);

    tether_destroy(handle);
    assert!(inbox.messages().is_empty());
}

#[test]
fn unreachable_endpoint_fails_create() {
    let inbox = Inbox::default();
    let endpoint = CString::new("ws://127.0.0.1:1/ws").unwrap();
    let u1 = CString::new("u1").unwrap();

    assert_eq!(create(&endpoint, &u1, &inbox), 0);
    assert_eq!(tether_last_error(), 4);
}
