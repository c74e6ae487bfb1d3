//! Bounded blocking queue used to wire the pipeline stages together.
//!
//! The queue is a fixed-capacity ring of slots guarded by a single mutex.
//! Pushers block while the slot at `head` is occupied, poppers block while
//! the slot at `tail` is empty. Two condition variables keep the wake-ups
//! apart: `not_full` for blocked pushers (and drain waiters), `not_empty`
//! for blocked poppers.
//!
//! Shutdown goes through [`BoundedQueue::exit`], which optionally waits for
//! the queue to drain, then rejects every further push and pop and hands
//! back whatever is still resident. A popped `None` is the signal every
//! consumer loop treats as "no more work".
//!
//! # Example
//!
//! ```
//! use bluegate::queue::{BoundedQueue, DrainPolicy};
//!
//! let queue = BoundedQueue::new(4);
//! queue.push("a").unwrap();
//! queue.push("b").unwrap();
//! assert_eq!(queue.pop(), Some("a"));
//!
//! let leftovers = queue.exit(DrainPolicy::Immediate);
//! assert_eq!(leftovers, vec!["b"]);
//! assert_eq!(queue.pop(), None);
//! assert_eq!(queue.push("c"), Err("c"));
//! ```

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

/// How [`BoundedQueue::exit`] treats items that are still queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainPolicy {
    /// Reject everything now and hand back whatever is resident.
    Immediate,
    /// Wait up to the given duration for consumers to drain the queue.
    Timeout(Duration),
    /// Wait until consumers have drained the queue, however long it takes.
    Infinite,
}

/// Error returned by [`BoundedQueue::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ReleaseError {
    /// `exit` has not completed yet; blocked callers may still be inside.
    #[error("queue has not exited yet")]
    NotExited,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Status(u8);

impl Status {
    const REJECT_PUSH: u8 = 1 << 0;
    const REJECT_POP: u8 = 1 << 1;
    const EXITED: u8 = 1 << 6;
    const COLLECTED: u8 = 1 << 7;

    #[inline]
    const fn has(self, flags: u8) -> bool {
        self.0 & flags != 0
    }

    #[inline]
    fn set(&mut self, flags: u8) {
        self.0 |= flags;
    }
}

struct State<T> {
    slots: Box<[Option<T>]>,
    head: usize,
    tail: usize,
    status: Status,
}

impl<T> State<T> {
    #[inline]
    fn next(&self, idx: usize) -> usize {
        if idx + 1 >= self.slots.len() { 0 } else { idx + 1 }
    }

    #[inline]
    fn head_occupied(&self) -> bool {
        self.slots[self.head].is_some()
    }

    #[inline]
    fn tail_occupied(&self) -> bool {
        self.slots.get(self.tail).is_some_and(Option::is_some)
    }

    fn len(&self) -> usize {
        let capacity = self.slots.len();
        if capacity == 0 {
            0
        } else if self.head_occupied() {
            capacity
        } else if self.head < self.tail {
            self.head + capacity - self.tail
        } else {
            self.head - self.tail
        }
    }

    /// Takes every resident item in FIFO order, following the ring from
    /// `tail` across the wrap point until an empty slot is reached.
    fn collect(&mut self) -> Vec<T> {
        let mut items = Vec::with_capacity(self.len());
        while let Some(item) = self.slots.get_mut(self.tail).and_then(Option::take) {
            items.push(item);
            self.tail = self.next(self.tail);
        }
        self.head = self.tail;
        items
    }
}

/// A fixed-capacity, blocking, multi-producer/multi-consumer FIFO queue.
pub struct BoundedQueue<T> {
    state: Mutex<State<T>>,
    capacity: usize,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<T> BoundedQueue<T> {
    /// Create an empty queue holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be greater than 0");

        let slots = std::iter::repeat_with(|| None).take(capacity).collect();

        Self {
            state: Mutex::new(State {
                slots,
                head: 0,
                tail: 0,
                status: Status::default(),
            }),
            capacity,
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    /// Push an item, blocking while the queue is full.
    ///
    /// Returns the item back when the queue rejects pushes, either because
    /// it has already exited or because it started exiting while the caller
    /// was blocked. The caller owns the returned item and must dispose of it.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();

        if state.status.has(Status::EXITED | Status::REJECT_PUSH) {
            return Err(item);
        }

        while state.head_occupied() {
            self.not_full.wait(&mut state);

            if state.status.has(Status::REJECT_PUSH) {
                return Err(item);
            }
        }

        let head = state.head;
        state.slots[head] = Some(item);
        state.head = state.next(head);

        self.not_empty.notify_one();
        Ok(())
    }

    /// Pop the oldest item, blocking while the queue is empty.
    ///
    /// Returns `None` once the queue rejects pops; consumers treat this as
    /// the signal to terminate.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();

        if state.status.has(Status::EXITED | Status::REJECT_POP) {
            return None;
        }

        while !state.tail_occupied() {
            self.not_empty.wait(&mut state);

            if state.status.has(Status::REJECT_POP) {
                return None;
            }
        }

        let tail = state.tail;
        let item = state.slots[tail].take();
        state.tail = state.next(tail);

        // Once drained, wake every space waiter so a pending `exit` is not
        // starved by a pusher consuming the only notification.
        if state.tail_occupied() {
            self.not_full.notify_one();
        } else {
            self.not_full.notify_all();
        }

        item
    }

    /// Begin shutdown and return the items still resident, oldest first.
    ///
    /// Depending on `policy` this first waits for consumers to drain the
    /// queue. Afterwards every blocked pusher gets its item back, every
    /// blocked popper gets `None`, and all further operations are refused.
    /// Only the first call does anything; later calls return an empty vector.
    pub fn exit(&self, policy: DrainPolicy) -> Vec<T> {
        let mut state = self.state.lock();

        if state.status.has(Status::EXITED) {
            return Vec::new();
        }

        match policy {
            DrainPolicy::Immediate => {}
            DrainPolicy::Timeout(timeout) => match Instant::now().checked_add(timeout) {
                Some(deadline) => {
                    while state.tail_occupied() {
                        if self.not_full.wait_until(&mut state, deadline).timed_out() {
                            break;
                        }
                    }
                }
                // A deadline past what `Instant` can represent never expires.
                None => self.wait_drained(&mut state),
            },
            DrainPolicy::Infinite => self.wait_drained(&mut state),
        }

        // A concurrent exit may have finished while this one was waiting.
        if state.status.has(Status::EXITED) {
            return Vec::new();
        }

        state.status.set(Status::REJECT_PUSH);
        self.not_full.notify_all();

        state.status.set(Status::REJECT_POP);
        self.not_empty.notify_all();

        let leftovers = state.collect();
        state.status.set(Status::EXITED);

        tracing::trace!(leftovers = leftovers.len(), ?policy, "queue exited");
        leftovers
    }

    fn wait_drained(&self, state: &mut MutexGuard<'_, State<T>>) {
        while state.tail_occupied() {
            self.not_full.wait(state);
        }
    }

    /// Release the slot storage.
    ///
    /// This is a no-op when the queue was already released, and fails with
    /// [`ReleaseError::NotExited`] when [`exit`](Self::exit) has not
    /// completed. Queue operations after release keep being refused.
    pub fn release(&self) -> Result<(), ReleaseError> {
        let mut state = self.state.lock();

        if state.status.has(Status::COLLECTED) {
            return Ok(());
        }

        if !state.status.has(Status::EXITED) {
            return Err(ReleaseError::NotExited);
        }

        state.slots = Box::default();
        state.head = 0;
        state.tail = 0;
        state.status.set(Status::COLLECTED);
        Ok(())
    }

    /// Whether [`exit`](Self::exit) has completed.
    pub fn is_exited(&self) -> bool {
        self.state.lock().status.has(Status::EXITED)
    }

    /// Whether [`release`](Self::release) has completed.
    pub fn is_released(&self) -> bool {
        self.state.lock().status.has(Status::COLLECTED)
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    /// Whether no item is currently queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of items the queue holds.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> std::fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BoundedQueue")
            .field("capacity", &self.capacity)
            .field("len", &state.len())
            .field("head", &state.head)
            .field("tail", &state.tail)
            .field("status", &state.status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn should_pop_items_in_push_order() {
        let queue = BoundedQueue::new(8);
        for i in 0..8 {
            queue.push(i).unwrap();
        }

        let popped: Vec<_> = (0..8).map(|_| queue.pop().unwrap()).collect();
        assert_eq!(popped, (0..8).collect::<Vec<_>>());
        assert!(queue.is_empty());
    }

    #[test]
    fn should_report_length_across_wraparound() {
        let queue = BoundedQueue::new(3);
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        assert_eq!(queue.len(), 2);

        queue.pop();
        queue.push(3).unwrap();
        queue.push(4).unwrap();
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.capacity(), 3);
    }

    #[test]
    fn should_block_push_until_pop_frees_a_slot() {
        let queue = Arc::new(BoundedQueue::new(1));
        queue.push(1).unwrap();

        let pushed = Arc::new(AtomicBool::new(false));
        let handle = {
            let queue = Arc::clone(&queue);
            let pushed = Arc::clone(&pushed);
            thread::spawn(move || {
                queue.push(2).unwrap();
                pushed.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!pushed.load(Ordering::SeqCst));

        assert_eq!(queue.pop(), Some(1));
        handle.join().unwrap();

        assert!(pushed.load(Ordering::SeqCst));
        assert_eq!(queue.pop(), Some(2));
    }

    #[test]
    fn should_unblock_exactly_one_pusher_per_pop() {
        let queue = Arc::new(BoundedQueue::new(1));
        queue.push(0).unwrap();

        let completed = Arc::new(AtomicUsize::new(0));
        let pushers: Vec<_> = (1..=3)
            .map(|item| {
                let queue = Arc::clone(&queue);
                let completed = Arc::clone(&completed);
                thread::spawn(move || {
                    let pushed = queue.push(item);
                    if pushed.is_ok() {
                        completed.fetch_add(1, Ordering::SeqCst);
                    }
                    pushed
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(50));
        assert_eq!(completed.load(Ordering::SeqCst), 0);

        assert_eq!(queue.pop(), Some(0));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(completed.load(Ordering::SeqCst), 1);
        assert_eq!(queue.len(), 1);

        let leftovers = queue.exit(DrainPolicy::Immediate);
        let results: Vec<_> = pushers.into_iter().map(|p| p.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(results.iter().filter(|r| r.is_err()).count(), 2);
        assert_eq!(leftovers.len(), 1);
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn should_block_pop_until_an_item_arrives() {
        let queue = Arc::new(BoundedQueue::new(2));

        let handle = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };

        thread::sleep(Duration::from_millis(20));
        queue.push("late").unwrap();

        assert_eq!(handle.join().unwrap(), Some("late"));
    }

    #[test]
    fn should_reject_everything_after_immediate_exit() {
        let queue = BoundedQueue::new(4);
        queue.push(1).unwrap();
        queue.push(2).unwrap();

        let leftovers = queue.exit(DrainPolicy::Immediate);

        assert_eq!(leftovers, vec![1, 2]);
        assert!(queue.is_exited());
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.push(3), Err(3));
    }

    #[test]
    fn should_treat_zero_timeout_like_immediate_exit() {
        let queue = BoundedQueue::new(4);
        queue.push("pending").unwrap();

        let started = Instant::now();
        let leftovers = queue.exit(DrainPolicy::Timeout(Duration::ZERO));

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(leftovers, vec!["pending"]);
    }

    #[test]
    fn should_collect_wrapped_items_in_fifo_order() {
        let queue = BoundedQueue::new(4);
        for i in 0..3 {
            queue.push(i).unwrap();
        }
        assert_eq!(queue.pop(), Some(0));
        assert_eq!(queue.pop(), Some(1));
        // head wraps past the end while tail stays at slot 2
        queue.push(3).unwrap();
        queue.push(4).unwrap();

        let leftovers = queue.exit(DrainPolicy::Immediate);
        assert_eq!(leftovers, vec![2, 3, 4]);
    }

    #[test]
    fn should_collect_every_item_of_a_full_queue() {
        let queue = BoundedQueue::new(3);
        queue.push('a').unwrap();
        queue.pop();
        for c in ['b', 'c', 'd'] {
            queue.push(c).unwrap();
        }
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.exit(DrainPolicy::Immediate), vec!['b', 'c', 'd']);
    }

    #[test]
    fn should_wait_for_consumers_on_infinite_exit() {
        let queue = Arc::new(BoundedQueue::new(16));
        for i in 0..10 {
            queue.push(i).unwrap();
        }

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut seen = Vec::new();
                while let Some(item) = queue.pop() {
                    thread::sleep(Duration::from_millis(2));
                    seen.push(item);
                }
                seen
            })
        };

        let leftovers = queue.exit(DrainPolicy::Infinite);
        assert!(leftovers.is_empty());

        let seen = consumer.join().unwrap();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn should_drain_with_unrepresentable_timeout() {
        let empty = BoundedQueue::<u8>::new(2);
        assert!(empty.exit(DrainPolicy::Timeout(Duration::MAX)).is_empty());
        assert!(empty.is_exited());

        let queue = Arc::new(BoundedQueue::new(4));
        queue.push(1).unwrap();
        queue.push(2).unwrap();
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut seen = Vec::new();
                while let Some(item) = queue.pop() {
                    seen.push(item);
                }
                seen
            })
        };

        assert!(queue.exit(DrainPolicy::Timeout(Duration::MAX)).is_empty());
        assert_eq!(consumer.join().unwrap(), vec![1, 2]);
    }

    #[test]
    fn should_hand_back_items_after_timeout_without_consumers() {
        let queue = BoundedQueue::new(4);
        queue.push(7).unwrap();

        let started = Instant::now();
        let leftovers = queue.exit(DrainPolicy::Timeout(Duration::from_millis(30)));

        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(leftovers, vec![7]);
    }

    #[test]
    fn should_release_blocked_callers_on_exit() {
        let full = Arc::new(BoundedQueue::new(1));
        full.push(0).unwrap();
        let pusher = {
            let full = Arc::clone(&full);
            thread::spawn(move || full.push(1))
        };

        let empty = Arc::new(BoundedQueue::<u32>::new(1));
        let popper = {
            let empty = Arc::clone(&empty);
            thread::spawn(move || empty.pop())
        };

        thread::sleep(Duration::from_millis(20));
        assert_eq!(full.exit(DrainPolicy::Immediate), vec![0]);
        assert!(empty.exit(DrainPolicy::Immediate).is_empty());

        assert_eq!(pusher.join().unwrap(), Err(1));
        assert_eq!(popper.join().unwrap(), None);
    }

    #[test]
    fn should_ignore_repeated_exit() {
        let queue = BoundedQueue::new(2);
        queue.push(1).unwrap();

        assert_eq!(queue.exit(DrainPolicy::Immediate), vec![1]);
        assert!(queue.exit(DrainPolicy::Infinite).is_empty());
    }

    #[test]
    fn should_refuse_release_before_exit() {
        let queue = BoundedQueue::<u8>::new(2);

        assert_eq!(queue.release(), Err(ReleaseError::NotExited));
        assert!(!queue.is_released());

        queue.exit(DrainPolicy::Immediate);
        assert_eq!(queue.release(), Ok(()));
        assert!(queue.is_released());
        assert_eq!(queue.release(), Ok(()));

        assert_eq!(queue.pop(), None);
        assert_eq!(queue.push(1), Err(1));
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn should_deliver_every_item_with_many_producers_and_consumers() {
        let queue = Arc::new(BoundedQueue::new(4));

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..250 {
                        queue.push(p * 1000 + i).unwrap();
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Some(item) = queue.pop() {
                        seen.push(item);
                    }
                    seen
                })
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }
        assert!(queue.exit(DrainPolicy::Infinite).is_empty());

        let mut all: Vec<_> = consumers
            .into_iter()
            .flat_map(|c| c.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all.len(), 1000);
        all.dedup();
        assert_eq!(all.len(), 1000);
    }

    #[test]
    fn should_keep_per_producer_order() {
        let queue = Arc::new(BoundedQueue::new(2));
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..100 {
                    queue.push(i).unwrap();
                }
            })
        };

        let received: Vec<_> = (0..100).map(|_| queue.pop().unwrap()).collect();
        producer.join().unwrap();
        assert!(received.windows(2).all(|w| w[0] < w[1]));
    }
}
