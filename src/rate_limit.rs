//! Rate limiters - throttle, debounce and memoize wrappers
//!
//! The dashboard runs on a single-threaded event loop, so none of these
//! primitives own a timer. Every time-dependent call takes the current clock
//! in milliseconds and the host polls pending work from its frame or timer
//! callback.
//!
//! # Example (JavaScript host driving a debounced save)
//!
//! ```javascript
//! index.toggle_reaction('tx1', userId, 'like');   // schedules a flush
//! setInterval(() => index.poll_flush(Date.now()), 50);
//! ```

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

// =============================================================================
// Debounce Timer - deadline bookkeeping shared by all debounced work
// =============================================================================

/// A resettable deadline. Each `schedule` pushes the deadline out to
/// `now + delay`, so only the last call in a burst fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebounceTimer {
    delay_ms: u64,
    deadline: Option<u64>,
}

impl DebounceTimer {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            deadline: None,
        }
    }

    /// (Re)start the quiet period at `now_ms`.
    pub fn schedule(&mut self, now_ms: u64) {
        self.deadline = Some(now_ms.saturating_add(self.delay_ms));
    }

    /// Returns true exactly once per scheduled burst, when the deadline has passed.
    pub fn fire_if_due(&mut self, now_ms: u64) -> bool {
        match self.deadline {
            Some(deadline) if now_ms >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Drop the pending deadline. Returns whether anything was pending.
    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<u64> {
        self.deadline
    }

    pub fn delay_ms(&self) -> u64 {
        self.delay_ms
    }
}

// =============================================================================
// Debounce
// =============================================================================

/// Invokes the wrapped function once `delay_ms` of silence has passed since
/// the last call. The arguments of the last call win.
pub struct Debounced<A, F>
where
    F: FnMut(A),
{
    timer: DebounceTimer,
    pending: Option<A>,
    func: F,
}

/// Wrap `func` so that bursts of calls collapse into one trailing call.
pub fn debounce<A, F>(func: F, delay_ms: u64) -> Debounced<A, F>
where
    F: FnMut(A),
{
    Debounced {
        timer: DebounceTimer::new(delay_ms),
        pending: None,
        func,
    }
}

impl<A, F> Debounced<A, F>
where
    F: FnMut(A),
{
    /// Record a call. Replaces any pending arguments and resets the timer.
    pub fn call(&mut self, args: A, now_ms: u64) {
        self.pending = Some(args);
        self.timer.schedule(now_ms);
    }

    /// Run the pending call if its quiet period has elapsed.
    pub fn poll(&mut self, now_ms: u64) -> bool {
        if !self.timer.fire_if_due(now_ms) {
            return false;
        }
        match self.pending.take() {
            Some(args) => {
                (self.func)(args);
                true
            }
            None => false,
        }
    }

    /// Run the pending call immediately, ignoring the timer.
    pub fn flush(&mut self) -> bool {
        self.timer.cancel();
        match self.pending.take() {
            Some(args) => {
                (self.func)(args);
                true
            }
            None => false,
        }
    }

    /// Discard the pending call. Must be called on teardown.
    pub fn cancel(&mut self) -> bool {
        self.timer.cancel();
        self.pending.take().is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

// =============================================================================
// Throttle
// =============================================================================

/// Leading-edge throttle gate. Calls inside the interval are dropped, never queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Throttle {
    interval_ms: u64,
    last_accepted: Option<u64>,
}

impl Throttle {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_accepted: None,
        }
    }

    /// Returns true if a call at `now_ms` is accepted.
    pub fn try_acquire(&mut self, now_ms: u64) -> bool {
        let accepted = match self.last_accepted {
            None => true,
            // A clock that went backwards counts as elapsed
            Some(last) => now_ms < last || now_ms - last >= self.interval_ms,
        };
        if accepted {
            self.last_accepted = Some(now_ms);
        }
        accepted
    }

    pub fn reset(&mut self) {
        self.last_accepted = None;
    }
}

/// A function gated by a [`Throttle`].
pub struct Throttled<A, R, F>
where
    F: FnMut(A) -> R,
{
    gate: Throttle,
    func: F,
    _marker: std::marker::PhantomData<fn(A) -> R>,
}

/// Wrap `func` so that it runs at most once per `interval_ms`.
pub fn throttle<A, R, F>(func: F, interval_ms: u64) -> Throttled<A, R, F>
where
    F: FnMut(A) -> R,
{
    Throttled {
        gate: Throttle::new(interval_ms),
        func,
        _marker: std::marker::PhantomData,
    }
}

impl<A, R, F> Throttled<A, R, F>
where
    F: FnMut(A) -> R,
{
    /// Invoke if the gate is open. Returns `None` for dropped calls.
    pub fn call(&mut self, args: A, now_ms: u64) -> Option<R> {
        if self.gate.try_acquire(now_ms) {
            Some((self.func)(args))
        } else {
            None
        }
    }
}

// =============================================================================
// Memoize
// =============================================================================

/// Caches results keyed by the JSON serialization of the arguments.
///
/// The cache is unbounded. Keys are bounded by transaction and user
/// cardinality within a session; call [`Memoized::clear`] to reset.
pub struct Memoized<A, R, F>
where
    A: Serialize,
    R: Clone,
    F: Fn(&A) -> R,
{
    cache: HashMap<String, R>,
    func: F,
    _marker: std::marker::PhantomData<fn(&A)>,
}

pub fn memoize<A, R, F>(func: F) -> Memoized<A, R, F>
where
    A: Serialize,
    R: Clone,
    F: Fn(&A) -> R,
{
    Memoized {
        cache: HashMap::new(),
        func,
        _marker: std::marker::PhantomData,
    }
}

impl<A, R, F> Memoized<A, R, F>
where
    A: Serialize,
    R: Clone,
    F: Fn(&A) -> R,
{
    pub fn get(&mut self, args: &A) -> R {
        let key = match serde_json::to_string(args) {
            Ok(key) => key,
            Err(e) => {
                // Unserializable arguments are computed but never cached
                debug!(error = %e, "memoize key serialization failed");
                return (self.func)(args);
            }
        };
        if let Some(hit) = self.cache.get(&key) {
            return hit.clone();
        }
        let value = (self.func)(args);
        self.cache.insert(key, value.clone());
        value
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    #[test]
    fn test_debounce_last_call_wins() {
        let seen = RefCell::new(Vec::new());
        let mut save = debounce(|v: u32| seen.borrow_mut().push(v), 300);

        save.call(1, 0);
        save.call(2, 50);
        assert!(!save.poll(300)); // quiet period restarted at 50
        assert!(save.poll(350));
        assert!(!save.poll(1000));

        assert_eq!(*seen.borrow(), vec![2]);
    }

    #[test]
    fn test_debounce_cancel_prevents_call() {
        let calls = Cell::new(0);
        let mut save = debounce(|_: ()| calls.set(calls.get() + 1), 100);

        save.call((), 0);
        assert!(save.cancel());
        assert!(!save.poll(500));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_debounce_flush_runs_immediately() {
        let calls = Cell::new(0);
        let mut save = debounce(|_: ()| calls.set(calls.get() + 1), 100);

        save.call((), 0);
        assert!(save.flush());
        assert!(!save.poll(500));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_throttle_drops_calls_within_interval() {
        let mut scroll = throttle(|y: u32| y * 2, 100);

        assert_eq!(scroll.call(1, 0), Some(2));
        assert_eq!(scroll.call(2, 50), None);
        assert_eq!(scroll.call(3, 99), None);
        assert_eq!(scroll.call(4, 100), Some(8));
        // Interval is measured from the last accepted call
        assert_eq!(scroll.call(5, 150), None);
        assert_eq!(scroll.call(6, 200), Some(12));
    }

    #[test]
    fn test_throttle_gate_reset() {
        let mut gate = Throttle::new(1000);
        assert!(gate.try_acquire(10));
        assert!(!gate.try_acquire(20));
        gate.reset();
        assert!(gate.try_acquire(30));
    }

    #[test]
    fn test_memoize_caches_by_arguments() {
        let calls = Cell::new(0);
        let mut avg = memoize(|args: &(String, u32)| {
            calls.set(calls.get() + 1);
            args.1 * 10
        });

        assert_eq!(avg.get(&("tx1".to_string(), 3)), 30);
        assert_eq!(avg.get(&("tx1".to_string(), 3)), 30);
        assert_eq!(avg.get(&("tx2".to_string(), 3)), 30);
        assert_eq!(calls.get(), 2);
        assert_eq!(avg.len(), 2);

        avg.clear();
        assert!(avg.is_empty());
        avg.get(&("tx1".to_string(), 3));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_timer_deadline() {
        let mut timer = DebounceTimer::new(16);
        assert!(!timer.is_pending());
        timer.schedule(100);
        assert_eq!(timer.deadline(), Some(116));
        assert!(!timer.fire_if_due(115));
        assert!(timer.fire_if_due(116));
        assert!(!timer.is_pending());
    }
}
