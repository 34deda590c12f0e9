//! Shared per-frame update list

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::signal::{ListenerId, Signal};

/// Timing for one tick
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tick {
    /// Current time in milliseconds
    pub now_ms: f64,
    /// Milliseconds since the previous tick (0 on the first)
    pub delta_ms: f64,
}

struct TickerInner {
    listeners: Signal<Tick>,
    last_ms: Cell<Option<f64>>,
}

/// A cheaply cloneable update list driven by the embedding application
///
/// Objects that must refresh every frame, such as playing videos, register
/// here and remove themselves when they stop.
#[derive(Clone)]
pub struct Ticker(Rc<TickerInner>);

impl Default for Ticker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ticker")
            .field("listeners", &self.0.listeners.len())
            .field("last_ms", &self.0.last_ms.get())
            .finish()
    }
}

impl Ticker {
    pub fn new() -> Self {
        Self(Rc::new(TickerInner {
            listeners: Signal::new(),
            last_ms: Cell::new(None),
        }))
    }

    /// Register `callback` under `id`; a second add with the same id is ignored
    pub fn add<F>(&self, id: ListenerId, callback: F)
    where
        F: Fn(&Tick) + 'static,
    {
        if self.0.listeners.is_connected(id) {
            return;
        }
        self.0.listeners.connect_as(id, callback);
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        self.0.listeners.disconnect(id)
    }

    pub fn contains(&self, id: ListenerId) -> bool {
        self.0.listeners.is_connected(id)
    }

    pub fn len(&self) -> usize {
        self.0.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.listeners.is_empty()
    }

    /// Advance to `now_ms` and run every registered update
    pub fn update(&self, now_ms: f64) {
        let delta_ms = match self.0.last_ms.replace(Some(now_ms)) {
            Some(last) => (now_ms - last).max(0.0),
            None => 0.0,
        };
        self.0.listeners.emit(&Tick { now_ms, delta_ms });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_reports_delta() {
        let ticker = Ticker::new();
        let seen = Rc::new(Cell::new(-1.0));
        let s = seen.clone();
        ticker.add(ListenerId::unique(), move |t| s.set(t.delta_ms));

        ticker.update(100.0);
        assert_eq!(seen.get(), 0.0);
        ticker.update(116.0);
        assert_eq!(seen.get(), 16.0);
    }

    #[test]
    fn duplicate_add_is_ignored() {
        let ticker = Ticker::new();
        let id = ListenerId::unique();
        ticker.add(id, |_| {});
        ticker.add(id, |_| {});
        assert_eq!(ticker.len(), 1);
        assert!(ticker.remove(id));
        assert!(ticker.is_empty());
    }
}
