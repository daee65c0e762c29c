//! Deferred reclamation
//!
//! Execution contexts may hold raw layout assumptions about a class (slot
//! indices, property offsets) for as long as they run. A destroyed class is
//! therefore not freed on the spot: its release is queued here tagged with
//! the current generation, and runs only once every context that was active
//! at enqueue time has finished or passed a checkpoint.
//!
//! Each start, checkpoint and enqueue bumps the generation. An item is
//! released when the oldest active context started after the item was
//! queued.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use tracing::trace;

pub type TreadmillItem = Box<dyn FnOnce() + Send>;

/// Handle identifying one active execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestToken(u64);

struct Pending {
    generation: u64,
    item: TreadmillItem,
}

#[derive(Default)]
struct State {
    generation: u64,
    next_token: u64,
    /// token -> generation at which the context started (or last
    /// checkpointed)
    active: HashMap<u64, u64>,
    pending: VecDeque<Pending>,
}

impl State {
    fn bump(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn oldest_active(&self) -> Option<u64> {
        self.active.values().copied().min()
    }

    fn take_ready(&mut self) -> Vec<TreadmillItem> {
        let oldest = self.oldest_active();
        let mut ready = Vec::new();
        while let Some(front) = self.pending.front() {
            if oldest.is_some_and(|start| start <= front.generation) {
                break;
            }
            if let Some(p) = self.pending.pop_front() {
                ready.push(p.item);
            }
        }
        ready
    }
}

#[derive(Default)]
pub struct Treadmill {
    state: Mutex<State>,
}

impl fmt::Debug for Treadmill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.lock();
        f.debug_struct("Treadmill")
            .field("generation", &st.generation)
            .field("active", &st.active.len())
            .field("pending", &st.pending.len())
            .finish()
    }
}

impl Treadmill {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_request(&self) -> RequestToken {
        let mut st = self.state.lock();
        let start = st.bump();
        st.next_token += 1;
        let token = st.next_token;
        st.active.insert(token, start);
        trace!(token, generation = start, "request started");
        RequestToken(token)
    }

    pub fn finish_request(&self, token: RequestToken) {
        let ready = {
            let mut st = self.state.lock();
            st.active.remove(&token.0);
            st.take_ready()
        };
        trace!(token = token.0, released = ready.len(), "request finished");
        Self::run(ready);
    }

    /// The context holds no raw references acquired before this point.
    pub fn checkpoint(&self, token: RequestToken) {
        let ready = {
            let mut st = self.state.lock();
            let now = st.bump();
            if let Some(start) = st.active.get_mut(&token.0) {
                *start = now;
            }
            st.take_ready()
        };
        Self::run(ready);
    }

    /// Queue `item` until every context active right now is done with it.
    pub fn enqueue<F>(&self, item: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let ready = {
            let mut st = self.state.lock();
            let generation = st.bump();
            st.pending.push_back(Pending {
                generation,
                item: Box::new(item),
            });
            trace!(generation, pending = st.pending.len(), "treadmill enqueue");
            st.take_ready()
        };
        Self::run(ready);
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn active_requests(&self) -> usize {
        self.state.lock().active.len()
    }

    // Items run outside the lock; they may drop classes, which logs and may
    // re-enter the registry.
    fn run(items: Vec<TreadmillItem>) {
        for item in items {
            item();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        (hits, move || {
            h.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_runs_immediately_when_idle() {
        let tm = Treadmill::new();
        let (hits, item) = counter();
        tm.enqueue(item);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(tm.pending_len(), 0);
    }

    #[test]
    fn test_waits_for_active_request() {
        let tm = Treadmill::new();
        let token = tm.start_request();
        let (hits, item) = counter();
        tm.enqueue(item);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        // A request started after the enqueue does not hold the item back.
        let late = tm.start_request();
        tm.finish_request(token);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        tm.finish_request(late);
        assert_eq!(tm.active_requests(), 0);
    }

    #[test]
    fn test_checkpoint_releases() {
        let tm = Treadmill::new();
        let token = tm.start_request();
        let (hits, item) = counter();
        tm.enqueue(item);
        assert_eq!(tm.pending_len(), 1);
        tm.checkpoint(token);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        tm.finish_request(token);
    }

    #[test]
    fn test_items_release_in_order() {
        let tm = Treadmill::new();
        let first = tm.start_request();
        let (a, item_a) = counter();
        tm.enqueue(item_a);
        let second = tm.start_request();
        let (b, item_b) = counter();
        tm.enqueue(item_b);

        tm.finish_request(first);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 0);
        tm.finish_request(second);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }
}
