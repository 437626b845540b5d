/* Copyright (c) 2018 University of Utah
 *
 * Permission to use, copy, modify, and distribute this software for any
 * purpose with or without fee is hereby granted, provided that the above
 * copyright notice and this permission notice appear in all copies.
 *
 * THE SOFTWARE IS PROVIDED "AS IS" AND THE AUTHOR(S) DISCLAIM ALL WARRANTIES
 * WITH REGARD TO THIS SOFTWARE INCLUDING ALL IMPLIED WARRANTIES OF
 * MERCHANTABILITY AND FITNESS. IN NO EVENT SHALL AUTHORS BE LIABLE FOR
 * ANY SPECIAL, DIRECT, INDIRECT, OR CONSEQUENTIAL DAMAGES OR ANY DAMAGES
 * WHATSOEVER RESULTING FROM LOSS OF USE, DATA OR PROFITS, WHETHER IN AN
 * ACTION OF CONTRACT, NEGLIGENCE OR OTHER TORTIOUS ACTION, ARISING OUT OF
 * OR IN CONNECTION WITH THE USE OR PERFORMANCE OF THIS SOFTWARE.
 */

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use spin::Mutex;

/// A unit of deferred work. Parameter-less, runs at most once.
pub type Thunk = Box<dyn FnOnce() + Send>;

// One shard of the queue. Contention is bounded per shard; pushers and
// poppers that lose a try-lock simply move to the next shard.
struct Shard {
    tasks: Mutex<VecDeque<Thunk>>,
}

/// A roughly-FIFO task-stealing queue. Work is spread across shards so that
/// concurrent workers rarely touch the same lock; the common path is a
/// single uncontended try-lock. After `signal_done`, `push` refuses new
/// work, and `drain_and_eject` returns every thunk that was accepted but
/// never popped.
pub struct TaskQueue {
    // The shards. Sized once at construction; one per worker plus one is
    // the usual arrangement.
    shards: Vec<Shard>,

    // Next shard to start a push attempt at. Advances on every push so that
    // producers spread out.
    push_index: AtomicUsize,

    // Next shard to start a pop attempt at. Advances on every pop.
    pop_index: AtomicUsize,

    // Number of callers currently inside push(). drain_and_eject() waits
    // for this to reach zero after setting the done flag, which closes the
    // race where a pusher reads done == false and inserts its thunk after
    // the shards have been ejected.
    in_push: AtomicUsize,

    // Set once, with release semantics. After this, push() returns false.
    is_done: AtomicBool,
}

// Implementation of methods on TaskQueue.
impl TaskQueue {
    /// Creates a task queue with `shards` shards.
    ///
    /// # Arguments
    ///
    /// * `shards`: The number of shards to spread work across. Must be at
    ///             least one.
    pub fn new(shards: usize) -> TaskQueue {
        assert!(shards >= 1);
        TaskQueue {
            shards: (0..shards)
                .map(|_| Shard {
                    tasks: Mutex::new(VecDeque::new()),
                })
                .collect(),
            push_index: AtomicUsize::new(0),
            pop_index: AtomicUsize::new(0),
            in_push: AtomicUsize::new(0),
            is_done: AtomicBool::new(false),
        }
    }

    /// Pushes `thunk` onto the queue, retrying across shards until one
    /// accepts it.
    ///
    /// # Return
    ///
    /// True if the thunk was enqueued; false if the queue was already done,
    /// in which case the thunk is dropped unexecuted.
    pub fn push(&self, thunk: Thunk) -> bool {
        self.in_push.fetch_add(1, Ordering::AcqRel);
        let is_done = self.is_done.load(Ordering::Acquire);

        if !is_done {
            let mut slot = Some(thunk);
            while let Some(thunk) = slot.take() {
                if let Err(thunk) = self.try_push_round(thunk) {
                    slot = Some(thunk);
                    thread::yield_now();
                }
            }
        }

        self.in_push.fetch_sub(1, Ordering::AcqRel);
        !is_done
    }

    // One round-robin pass over the shards. Gives the thunk back if every
    // shard's try-lock failed.
    fn try_push_round(&self, thunk: Thunk) -> Result<(), Thunk> {
        let offset = self.push_index.fetch_add(1, Ordering::Relaxed);

        for i in 0..self.shards.len() {
            let shard = &self.shards[(offset + i) % self.shards.len()];
            if let Some(mut tasks) = shard.tasks.try_lock() {
                tasks.push_back(thunk);
                return Ok(());
            }
        }

        Err(thunk)
    }

    /// Attempts to pop one thunk; non-blocking. Fails fast on contended or
    /// empty shards.
    pub fn try_pop(&self) -> Option<Thunk> {
        let offset = self.pop_index.fetch_add(1, Ordering::Relaxed);

        for i in 0..self.shards.len() {
            let shard = &self.shards[(offset + i) % self.shards.len()];
            if let Some(mut tasks) = shard.tasks.try_lock() {
                if let Some(thunk) = tasks.pop_front() {
                    return Some(thunk);
                }
            }
        }

        None
    }

    /// Signals that no more thunks should be accepted.
    pub fn signal_done(&self) {
        self.is_done.store(true, Ordering::Release);
    }

    /// Returns true once `signal_done` has been called.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.is_done.load(Ordering::Acquire)
    }

    /// Drains the shards, returning every thunk that was accepted by `push`
    /// and never observed by `try_pop`. Signals done if that has not
    /// happened yet, then waits out any pushes still in flight before
    /// ejecting, so nothing can slip in behind the drain.
    pub fn drain_and_eject(&self) -> VecDeque<Thunk> {
        self.signal_done();

        while self.in_push.load(Ordering::Acquire) > 0 {
            thread::yield_now();
        }

        let mut thunks = VecDeque::new();
        for shard in &self.shards {
            thunks.append(&mut *shard.tasks.lock());
        }
        thunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn pushed_thunks_pop_in_rough_order() {
        let queue = TaskQueue::new(1);
        let seen = Arc::new(AtomicUsize::new(0));

        for i in 0..4 {
            let seen = seen.clone();
            assert!(queue.push(Box::new(move || {
                seen.fetch_add(i, Ordering::SeqCst);
            })));
        }

        let mut popped = 0;
        while let Some(thunk) = queue.try_pop() {
            thunk();
            popped += 1;
        }
        assert_eq!(popped, 4);
        assert_eq!(seen.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn push_fails_after_done() {
        let queue = TaskQueue::new(2);
        queue.signal_done();
        assert!(!queue.push(Box::new(|| {})));
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn drain_returns_unpopped_thunks() {
        let queue = TaskQueue::new(3);
        for _ in 0..10 {
            assert!(queue.push(Box::new(|| {})));
        }
        let _ = queue.try_pop().unwrap();

        let drained = queue.drain_and_eject();
        assert_eq!(drained.len(), 9);
        assert!(!queue.push(Box::new(|| {})));
    }

    // Every thunk whose push was accepted is either popped before done or
    // ejected by the drain; none is lost, none is duplicated.
    #[test]
    fn no_thunk_is_lost_or_duplicated_under_contention() {
        let queue = Arc::new(TaskQueue::new(4));
        let executed = Arc::new(AtomicUsize::new(0));
        let accepted = Arc::new(AtomicUsize::new(0));

        let pushers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                let executed = executed.clone();
                let accepted = accepted.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let executed = executed.clone();
                        if queue.push(Box::new(move || {
                            executed.fetch_add(1, Ordering::SeqCst);
                        })) {
                            accepted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();

        let poppers: Vec<_> = (0..2)
            .map(|_| {
                let queue = queue.clone();
                thread::spawn(move || {
                    let mut ran = 0;
                    while !queue.is_done() {
                        if let Some(thunk) = queue.try_pop() {
                            thunk();
                            ran += 1;
                        }
                    }
                    ran
                })
            })
            .collect();

        for pusher in pushers {
            pusher.join().unwrap();
        }

        let drained = queue.drain_and_eject();
        let mut popped = 0;
        for popper in poppers {
            popped += popper.join().unwrap();
        }

        let ejected = drained.len();
        for thunk in drained {
            thunk();
        }

        assert_eq!(popped + ejected, accepted.load(Ordering::SeqCst));
        assert_eq!(executed.load(Ordering::SeqCst), popped + ejected);
    }
}
