//! Typed notification channels
//!
//! Logical objects (resources, base textures, textures, buffers) announce
//! state transitions through [`Signal`]s. Listeners are plain closures with a
//! strongly-typed payload; every listener gets a [`ListenerId`] so it can be
//! removed again.
//!
//! Emission snapshots the listener list before calling out, so listeners may
//! connect, disconnect or emit on other signals while being notified.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_UID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique id for a logical object
pub fn next_uid() -> u64 {
    NEXT_UID.fetch_add(1, Ordering::Relaxed)
}

/// Identifies a connected listener
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

impl ListenerId {
    /// A fresh, unique listener id
    pub fn unique() -> Self {
        Self(next_uid())
    }
}

type Callback<T> = Rc<dyn Fn(&T)>;

struct Slot<T: ?Sized> {
    id: ListenerId,
    once: bool,
    callback: Callback<T>,
}

/// A typed observer list
pub struct Signal<T: ?Sized> {
    slots: RefCell<Vec<Slot<T>>>,
    closed: Cell<bool>,
}

impl<T: ?Sized> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("listeners", &self.slots.borrow().len())
            .field("closed", &self.closed.get())
            .finish()
    }
}

impl<T: ?Sized> Signal<T> {
    pub fn new() -> Self {
        Self {
            slots: RefCell::new(Vec::new()),
            closed: Cell::new(false),
        }
    }

    /// Connect a listener, returning its id
    pub fn connect<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&T) + 'static,
    {
        let id = ListenerId::unique();
        self.connect_as(id, callback);
        id
    }

    /// Connect a listener that is removed after its first notification
    pub fn connect_once<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&T) + 'static,
    {
        let id = ListenerId::unique();
        self.push(id, true, Rc::new(callback));
        id
    }

    /// Connect a listener under a caller-chosen id
    ///
    /// Several listeners may share an id; [`Signal::disconnect`] removes all of them.
    pub fn connect_as<F>(&self, id: ListenerId, callback: F)
    where
        F: Fn(&T) + 'static,
    {
        self.push(id, false, Rc::new(callback));
    }

    fn push(&self, id: ListenerId, once: bool, callback: Callback<T>) {
        if self.closed.get() {
            tracing::warn!("listener {:?} connected to a closed signal, ignoring", id);
            return;
        }
        self.slots.borrow_mut().push(Slot { id, once, callback });
    }

    /// Remove every listener registered under `id`
    ///
    /// Returns true if anything was removed.
    pub fn disconnect(&self, id: ListenerId) -> bool {
        let mut slots = self.slots.borrow_mut();
        let before = slots.len();
        slots.retain(|slot| slot.id != id);
        slots.len() != before
    }

    /// Whether a listener with this id is connected
    pub fn is_connected(&self, id: ListenerId) -> bool {
        self.slots.borrow().iter().any(|slot| slot.id == id)
    }

    /// Notify every listener
    pub fn emit(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = {
            let mut slots = self.slots.borrow_mut();
            let callbacks = slots.iter().map(|slot| slot.callback.clone()).collect();
            slots.retain(|slot| !slot.once);
            callbacks
        };

        for callback in callbacks {
            callback(value);
        }
    }

    /// Number of connected listeners
    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.borrow().is_empty()
    }

    /// Drop every listener
    pub fn clear(&self) {
        self.slots.borrow_mut().clear();
    }

    /// Drop every listener and refuse new ones
    pub fn close(&self) {
        self.clear();
        self.closed.set(true);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }
}

/// Kinds of GPU-backed objects that announce disposal
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Disposal {
    Texture(u64),
    Buffer(u64),
    Geometry(u64),
    Framebuffer(u64),
}

/// Shared queue of disposal notices
///
/// Systems that own per-context GPU handles subscribe to the `dispose` signal of
/// each logical object they upload, pushing the notice here; the queue is
/// drained before the system touches its tables again.
#[derive(Clone, Debug, Default)]
pub struct DisposalQueue {
    pending: Rc<RefCell<Vec<Disposal>>>,
}

impl DisposalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, disposal: Disposal) {
        self.pending.borrow_mut().push(disposal);
    }

    /// Take every pending notice
    pub fn drain(&self) -> Vec<Disposal> {
        std::mem::take(&mut *self.pending.borrow_mut())
    }

    pub fn len(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.borrow().is_empty()
    }

    /// A listener closure that forwards into this queue
    pub fn sink(&self, map: fn(u64) -> Disposal) -> impl Fn(&u64) + 'static {
        let pending = Rc::downgrade(&self.pending);
        move |uid: &u64| {
            if let Some(pending) = pending.upgrade() {
                pending.borrow_mut().push(map(*uid));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_reaches_every_listener() {
        let signal: Signal<u32> = Signal::new();
        let total = Rc::new(Cell::new(0));

        for _ in 0..3 {
            let total = total.clone();
            signal.connect(move |v| total.set(total.get() + *v));
        }

        signal.emit(&2);
        assert_eq!(total.get(), 6);
    }

    #[test]
    fn once_listeners_fire_a_single_time() {
        let signal: Signal<()> = Signal::new();
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        signal.connect_once(move |_| h.set(h.get() + 1));

        signal.emit(&());
        signal.emit(&());
        assert_eq!(hits.get(), 1);
        assert!(signal.is_empty());
    }

    #[test]
    fn disconnect_removes_shared_ids() {
        let signal: Signal<()> = Signal::new();
        let id = ListenerId::unique();
        signal.connect_as(id, |_| {});
        signal.connect_as(id, |_| {});
        signal.connect(|_| {});

        assert!(signal.disconnect(id));
        assert_eq!(signal.len(), 1);
        assert!(!signal.disconnect(id));
    }

    #[test]
    fn listeners_may_disconnect_during_emit() {
        let signal: Rc<Signal<()>> = Rc::new(Signal::new());
        let id = ListenerId::unique();
        let weak = Rc::downgrade(&signal);
        signal.connect_as(id, move |_| {
            if let Some(signal) = weak.upgrade() {
                signal.disconnect(id);
            }
        });

        signal.emit(&());
        assert!(signal.is_empty());
    }

    #[test]
    fn closed_signal_rejects_listeners() {
        let signal: Signal<()> = Signal::new();
        signal.close();
        signal.connect(|_| {});
        assert!(signal.is_empty());
    }

    #[test]
    fn disposal_sink_forwards() {
        let queue = DisposalQueue::new();
        let signal: Signal<u64> = Signal::new();
        signal.connect(queue.sink(Disposal::Texture));

        signal.emit(&7);
        assert_eq!(queue.drain(), vec![Disposal::Texture(7)]);
        assert!(queue.is_empty());
    }
}
