//! Callback dispatch boundary.
//!
//! Backends may signal inbound traffic from any thread. The [`Dispatcher`]
//! turns those signals into handler invocations that are
//!
//! - serialized: at most one invocation runs at a time, across all threads;
//! - lock-free while running: the internal lock only guards the queue, so a
//!   handler may call back into the client;
//! - bounded by the client's lifetime: after [`Dispatcher::close`] returns no
//!   invocation starts, and one already running on another thread has
//!   finished.
//!
//! Whichever thread finds the queue idle becomes the *drainer* and delivers
//! everything queued, including events other threads enqueue meanwhile.
//! Re-entrant emissions from inside the handler are queued and delivered by
//! the outer loop once the handler returns.

use crate::backend::BackendFailure;
use crate::message::InboundEvent;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// Receives inbound traffic for one client.
pub trait MessageHandler: Send + Sync {
    /// An inbound message.
    fn on_message(&self, event: &InboundEvent);

    /// A request the service rejected after the originating call returned.
    fn on_failure(&self, failure: &BackendFailure) {
        warn!(%failure, "Backend request failed");
    }
}

impl<F> MessageHandler for F
where
    F: Fn(&InboundEvent) + Send + Sync,
{
    fn on_message(&self, event: &InboundEvent) {
        self(event);
    }
}

/// Item waiting for delivery.
pub(crate) enum Dispatch {
    Message(InboundEvent),
    Failure(BackendFailure),
}

#[derive(Default)]
struct DispatchState {
    queue: VecDeque<Dispatch>,
    drainer: Option<ThreadId>,
    closed: bool,
}

/// Serializes handler invocations for one client.
pub struct Dispatcher {
    handler: Arc<dyn MessageHandler>,
    state: Mutex<DispatchState>,
    idle: Condvar,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Dispatcher {
    /// Create a dispatcher delivering to `handler`.
    #[must_use]
    pub fn new(handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            handler,
            state: Mutex::new(DispatchState::default()),
            idle: Condvar::new(),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue an item and deliver it now unless another drainer is active.
    pub(crate) fn push(&self, item: Dispatch) {
        let mut state = self.lock();
        if state.closed {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!("Dispatcher closed, dropping inbound item");
            return;
        }
        state.queue.push_back(item);
        if state.drainer.is_some() {
            return;
        }
        state.drainer = Some(thread::current().id());
        drop(state);
        self.drain();
    }

    /// Defer deliveries until the returned hold is dropped.
    ///
    /// While held, emissions from any thread are queued; dropping the hold
    /// delivers them on the holder's thread. Take a hold before entering a
    /// lock that the handler might also take. Holds nest: only the outermost
    /// one delivers.
    #[must_use]
    pub fn hold(self: &Arc<Self>) -> DispatchHold {
        let mut state = self.lock();
        let claimed = !state.closed && state.drainer.is_none();
        if claimed {
            state.drainer = Some(thread::current().id());
        }
        DispatchHold {
            dispatcher: Arc::clone(self),
            claimed,
        }
    }

    /// Stop all further deliveries.
    ///
    /// Pending items are discarded. If a delivery is running on another
    /// thread this waits for it to finish; when called from inside the
    /// handler it returns immediately.
    pub fn close(&self) {
        let mut state = self.lock();
        if !state.closed {
            state.closed = true;
            let discarded = state.queue.len() as u64;
            state.queue.clear();
            self.dropped.fetch_add(discarded, Ordering::Relaxed);
        }
        let me = thread::current().id();
        while let Some(drainer) = state.drainer {
            if drainer == me {
                break;
            }
            state = self
                .idle
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of items handed to the handler so far.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Number of items discarded because the dispatcher was closed.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Deliver queued items until the queue is empty. The caller must own
    /// the drainer role.
    fn drain(&self) {
        let mut release = DrainerRelease {
            dispatcher: self,
            armed: true,
        };
        loop {
            let next = {
                let mut state = self.lock();
                if state.closed {
                    state.queue.clear();
                }
                match state.queue.pop_front() {
                    Some(item) => item,
                    None => {
                        state.drainer = None;
                        release.armed = false;
                        drop(state);
                        self.idle.notify_all();
                        return;
                    }
                }
            };
            self.invoke(next);
        }
    }

    fn invoke(&self, item: Dispatch) {
        match item {
            Dispatch::Message(event) => {
                trace!(
                    sender = %event.sender_id,
                    mode = %event.mode,
                    bytes = event.payload.len(),
                    "Delivering inbound message"
                );
                self.handler.on_message(&event);
            }
            Dispatch::Failure(failure) => self.handler.on_failure(&failure),
        }
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("closed", &self.is_closed())
            .field("delivered", &self.delivered())
            .field("dropped", &self.dropped())
            .finish()
    }
}

/// Gives up the drainer role if the handler unwinds.
struct DrainerRelease<'a> {
    dispatcher: &'a Dispatcher,
    armed: bool,
}

impl Drop for DrainerRelease<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.dispatcher.lock().drainer = None;
            self.dispatcher.idle.notify_all();
        }
    }
}

/// Guard returned by [`Dispatcher::hold`].
#[must_use = "deliveries resume when the hold is dropped"]
pub struct DispatchHold {
    dispatcher: Arc<Dispatcher>,
    claimed: bool,
}

impl Drop for DispatchHold {
    fn drop(&mut self) {
        if self.claimed {
            self.dispatcher.drain();
        }
    }
}

/// Handler that forwards messages into a tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<InboundEvent>,
}

impl MessageHandler for ChannelHandler {
    fn on_message(&self, event: &InboundEvent) {
        if self.tx.send(event.clone()).is_err() {
            trace!("Event receiver dropped, discarding message");
        }
    }
}

/// Receiving half of [`channel`].
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<InboundEvent>,
}

impl EventReceiver {
    /// Wait for the next message. `None` once the client is gone.
    pub async fn next(&mut self) -> Option<InboundEvent> {
        self.rx.recv().await
    }

    /// Blocking variant of [`next`](Self::next) for synchronous hosts.
    /// Must not be called from inside an async runtime.
    pub fn blocking_next(&mut self) -> Option<InboundEvent> {
        self.rx.blocking_recv()
    }

    /// Next message if one is already queued.
    pub fn try_next(&mut self) -> Option<InboundEvent> {
        self.rx.try_recv().ok()
    }

    /// Everything queued right now.
    pub fn drain(&mut self) -> Vec<InboundEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// A handler/receiver pair for hosts that prefer pulling events.
#[must_use]
pub fn channel() -> (ChannelHandler, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelHandler { tx }, EventReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Request;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn recording() -> (Arc<Dispatcher>, Arc<StdMutex<Vec<String>>>) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = move |event: &InboundEvent| {
            sink.lock().unwrap().push(event.payload_str().into_owned());
        };
        (Arc::new(Dispatcher::new(Arc::new(handler))), seen)
    }

    #[test]
    fn test_push_delivers_inline() {
        let (dispatcher, seen) = recording();
        dispatcher.push(Dispatch::Message(InboundEvent::directed("p", "a")));
        assert_eq!(*seen.lock().unwrap(), vec!["a"]);
        assert_eq!(dispatcher.delivered(), 1);
    }

    #[test]
    fn test_hold_defers_until_dropped() {
        let (dispatcher, seen) = recording();
        {
            let _hold = dispatcher.hold();
            let _nested = dispatcher.hold();
            dispatcher.push(Dispatch::Message(InboundEvent::directed("p", "a")));
            dispatcher.push(Dispatch::Message(InboundEvent::directed("p", "b")));
            assert!(seen.lock().unwrap().is_empty());
        }
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_closed_dispatcher_drops_items() {
        let (dispatcher, seen) = recording();
        dispatcher.close();
        dispatcher.push(Dispatch::Message(InboundEvent::directed("p", "late")));
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(dispatcher.dropped(), 1);
        assert!(dispatcher.is_closed());
    }

    #[test]
    fn test_reentrant_push_is_queued_not_nested() {
        struct Reentrant {
            dispatcher: StdMutex<Option<Arc<Dispatcher>>>,
            depth: AtomicUsize,
            max_depth: AtomicUsize,
            order: StdMutex<Vec<String>>,
        }

        impl MessageHandler for Reentrant {
            fn on_message(&self, event: &InboundEvent) {
                let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_depth.fetch_max(depth, Ordering::SeqCst);
                self.order.lock().unwrap().push(event.payload_str().into_owned());
                if event.payload_str() == "first" {
                    let dispatcher = self.dispatcher.lock().unwrap().clone().unwrap();
                    dispatcher.push(Dispatch::Message(InboundEvent::directed("p", "second")));
                    // Not delivered yet: we are still inside the handler.
                    assert_eq!(self.order.lock().unwrap().len(), 1);
                }
                self.depth.fetch_sub(1, Ordering::SeqCst);
            }
        }

        let handler = Arc::new(Reentrant {
            dispatcher: StdMutex::new(None),
            depth: AtomicUsize::new(0),
            max_depth: AtomicUsize::new(0),
            order: StdMutex::new(Vec::new()),
        });
        let dispatcher = Arc::new(Dispatcher::new(handler.clone()));
        *handler.dispatcher.lock().unwrap() = Some(Arc::clone(&dispatcher));

        dispatcher.push(Dispatch::Message(InboundEvent::directed("p", "first")));

        assert_eq!(*handler.order.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(handler.max_depth.load(Ordering::SeqCst), 1);
        *handler.dispatcher.lock().unwrap() = None;
    }

    #[test]
    fn test_concurrent_emitters_never_overlap() {
        struct Overlap {
            active: AtomicUsize,
            overlaps: AtomicUsize,
            count: AtomicUsize,
        }

        impl MessageHandler for Overlap {
            fn on_message(&self, _event: &InboundEvent) {
                if self.active.fetch_add(1, Ordering::SeqCst) != 0 {
                    self.overlaps.fetch_add(1, Ordering::SeqCst);
                }
                std::thread::sleep(Duration::from_micros(50));
                self.active.fetch_sub(1, Ordering::SeqCst);
                self.count.fetch_add(1, Ordering::SeqCst);
            }
        }

        let handler = Arc::new(Overlap {
            active: AtomicUsize::new(0),
            overlaps: AtomicUsize::new(0),
            count: AtomicUsize::new(0),
        });
        let dispatcher = Arc::new(Dispatcher::new(handler.clone()));

        let threads: Vec<_> = (0..4)
            .map(|t| {
                let dispatcher = Arc::clone(&dispatcher);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        dispatcher.push(Dispatch::Message(InboundEvent::directed(
                            format!("t{t}"),
                            format!("{i}"),
                        )));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        // The last drainer may still be finishing on another thread.
        dispatcher.close();
        assert_eq!(handler.overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(
            handler.count.load(Ordering::SeqCst) as u64 + dispatcher.dropped(),
            200
        );
    }

    #[test]
    fn test_close_waits_for_running_delivery() {
        let finished = Arc::new(AtomicUsize::new(0));
        let entered = Arc::new(std::sync::Barrier::new(2));
        let handler = {
            let finished = Arc::clone(&finished);
            let entered = Arc::clone(&entered);
            move |_event: &InboundEvent| {
                entered.wait();
                std::thread::sleep(Duration::from_millis(50));
                finished.fetch_add(1, Ordering::SeqCst);
            }
        };
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(handler)));

        let emitter = {
            let dispatcher = Arc::clone(&dispatcher);
            std::thread::spawn(move || {
                dispatcher.push(Dispatch::Message(InboundEvent::directed("p", "slow")));
            })
        };

        entered.wait();
        dispatcher.close();
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        emitter.join().unwrap();
    }

    #[test]
    fn test_failures_reach_handler() {
        struct Failures(AtomicUsize);
        impl MessageHandler for Failures {
            fn on_message(&self, _event: &InboundEvent) {}
            fn on_failure(&self, failure: &BackendFailure) {
                assert_eq!(failure.request, Request::Subscribe);
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let handler = Arc::new(Failures(AtomicUsize::new(0)));
        let dispatcher = Dispatcher::new(handler.clone());
        dispatcher.push(Dispatch::Failure(BackendFailure {
            request: Request::Subscribe,
            request_id: 1,
            code: 1005,
            reason: None,
        }));
        assert_eq!(handler.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_channel_handler_feeds_receiver() {
        let (handler, mut rx) = channel();
        let dispatcher = Dispatcher::new(Arc::new(handler));

        dispatcher.push(Dispatch::Message(InboundEvent::broadcast("u1", "room1", "one")));
        dispatcher.push(Dispatch::Message(InboundEvent::broadcast("u1", "room1", "two")));

        let first = rx.next().await.unwrap();
        assert_eq!(first.payload_str(), "one");
        let rest = rx.drain();
        assert_eq!(rest.len(), 1);
        assert!(rx.try_next().is_none());
    }
}
