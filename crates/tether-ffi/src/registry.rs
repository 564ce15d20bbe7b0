//! Live clients, keyed by the handles given out to C.
//!
//! Handles are plain integers rather than pointers, so a stale or repeated
//! handle finds nothing instead of freed memory.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tether_core::{Client, ClientError, Dispatcher};

/// Opaque client handle. `0` is never a valid handle.
pub type TetherHandle = u64;

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// A registered client.
pub(crate) struct Entry {
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) client: Mutex<Client>,
}

fn clients() -> &'static DashMap<TetherHandle, Arc<Entry>> {
    static CLIENTS: OnceLock<DashMap<TetherHandle, Arc<Entry>>> = OnceLock::new();
    CLIENTS.get_or_init(DashMap::new)
}

pub(crate) fn insert(client: Client) -> TetherHandle {
    let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
    let entry = Entry {
        dispatcher: Arc::clone(client.dispatcher()),
        client: Mutex::new(client),
    };
    clients().insert(handle, Arc::new(entry));
    handle
}

/// The entry for `handle`. The map lock is released before returning.
pub(crate) fn lookup(handle: TetherHandle) -> Result<Arc<Entry>, ClientError> {
    clients()
        .get(&handle)
        .map(|entry| Arc::clone(entry.value()))
        .ok_or(ClientError::InvalidHandle)
}

pub(crate) fn remove(handle: TetherHandle) -> Option<Arc<Entry>> {
    clients().remove(&handle).map(|(_, entry)| entry)
}

impl Entry {
    /// Run `op` on the client with deliveries deferred until the client
    /// lock is released, so the callback can call back into the library.
    pub(crate) fn with_client<T>(
        &self,
        op: impl FnOnce(&mut Client) -> Result<T, ClientError>,
    ) -> Result<T, ClientError> {
        let _hold = self.dispatcher.hold();
        let mut client = self.client.lock().map_err(|_| ClientError::InvalidHandle)?;
        op(&mut client)
    }
}
