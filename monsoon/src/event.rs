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

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use spin::Mutex;

/// A heap-owned asynchronous operation registered with a completion queue.
/// The box is the tag: it is surrendered into the queue when the operation
/// is registered, and reclaimed exactly once by the worker that observes its
/// completion. `complete` consumes the box; dropping it afterwards is the
/// self-destruction the lifecycle contract requires.
pub trait CompletionQueueEvent: Send {
    /// Invoked exactly once when the operation completes. `is_ok` is false
    /// when the completion was manufactured by queue shutdown rather than by
    /// the operation actually finishing.
    fn complete(self: Box<Self>, is_ok: bool);
}

/// The result of polling a completion queue.
pub enum Next {
    /// An event completed; the caller now owns it and must call `complete`.
    Event(Box<dyn CompletionQueueEvent>, bool),

    /// Nothing to deliver right now.
    Idle,

    /// The queue has been shut down and fully drained.
    Shutdown,
}

// An alarm waiting for its deadline. Ordered so that the earliest deadline
// sits on top of the max-heap; `seq` breaks ties to keep the order total.
struct AlarmEntry {
    deadline: Instant,
    seq: u64,
    event: Box<dyn CompletionQueueEvent>,
}

impl PartialEq for AlarmEntry {
    fn eq(&self, other: &AlarmEntry) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for AlarmEntry {}

impl PartialOrd for AlarmEntry {
    fn partial_cmp(&self, other: &AlarmEntry) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for AlarmEntry {
    fn cmp(&self, other: &AlarmEntry) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then(other.seq.cmp(&self.seq))
    }
}

/// A bounded rendezvous between the transport and the worker threads. The
/// transport (or a timer) completes operations keyed by ticket; workers poll
/// with `next` and dispatch the events that fall out. Any worker may poll
/// any queue, and any producer may complete onto any queue.
pub struct CompletionQueue {
    // Events whose completion has been observed, waiting for a worker.
    ready: Mutex<VecDeque<(Box<dyn CompletionQueueEvent>, bool)>>,

    // Timer events ordered by deadline.
    alarms: Mutex<BinaryHeap<AlarmEntry>>,

    // Events registered and awaiting an external completion, keyed by the
    // ticket handed back at registration.
    pending: Mutex<HashMap<u64, Box<dyn CompletionQueueEvent>>>,

    next_ticket: AtomicU64,
    alarm_seq: AtomicU64,
    is_shutdown: AtomicBool,
}

// Implementation of methods on CompletionQueue.
impl CompletionQueue {
    pub fn new() -> Arc<CompletionQueue> {
        Arc::new(CompletionQueue {
            ready: Mutex::new(VecDeque::new()),
            alarms: Mutex::new(BinaryHeap::new()),
            pending: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(1),
            alarm_seq: AtomicU64::new(0),
            is_shutdown: AtomicBool::new(false),
        })
    }

    /// Surrenders `event` to the queue, to be completed later through the
    /// returned ticket. If the queue is already shut down the event is
    /// immediately made ready with `is_ok = false` instead.
    pub fn register(&self, event: Box<dyn CompletionQueueEvent>) -> u64 {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);

        if self.is_shutdown.load(Ordering::Acquire) {
            self.ready.lock().push_back((event, false));
        } else {
            self.pending.lock().insert(ticket, event);
        }

        ticket
    }

    /// Completes the operation registered under `ticket`, making its event
    /// ready for a worker.
    ///
    /// # Return
    ///
    /// True if the ticket was pending; false if it was unknown or already
    /// completed (e.g. cancelled by shutdown).
    pub fn complete(&self, ticket: u64, is_ok: bool) -> bool {
        let event = self.pending.lock().remove(&ticket);
        match event {
            Some(event) => {
                self.ready.lock().push_back((event, is_ok));
                true
            }
            None => false,
        }
    }

    /// Makes `event` ready immediately, without a registration round-trip.
    /// Used for operations that complete at the point they are issued, such
    /// as a response write.
    pub fn push_ready(&self, event: Box<dyn CompletionQueueEvent>, is_ok: bool) {
        self.ready.lock().push_back((event, is_ok));
    }

    /// Schedules `event` to become ready at `deadline` with `is_ok = true`,
    /// or at shutdown with `is_ok = false`, whichever comes first.
    pub fn post_alarm(&self, deadline: Instant, event: Box<dyn CompletionQueueEvent>) {
        if self.is_shutdown.load(Ordering::Acquire) {
            self.ready.lock().push_back((event, false));
            return;
        }

        let seq = self.alarm_seq.fetch_add(1, Ordering::Relaxed);
        self.alarms.lock().push(AlarmEntry {
            deadline: deadline,
            seq: seq,
            event: event,
        });
    }

    /// Non-blocking poll. Expires due alarms, then delivers one ready event
    /// if there is one.
    pub fn next(&self) -> Next {
        self.expire_alarms();

        if let Some((event, is_ok)) = self.ready.lock().pop_front() {
            return Next::Event(event, is_ok);
        }

        if self.is_shutdown.load(Ordering::Acquire) && self.is_drained() {
            Next::Shutdown
        } else {
            Next::Idle
        }
    }

    fn expire_alarms(&self) {
        let now = Instant::now();
        let mut expired = Vec::new();

        {
            let mut alarms = self.alarms.lock();
            loop {
                match alarms.peek() {
                    Some(entry) if entry.deadline <= now => {
                        // Guarded by the peek above.
                        if let Some(entry) = alarms.pop() {
                            expired.push(entry.event);
                        }
                    }
                    _ => break,
                }
            }
        }

        if !expired.is_empty() {
            let mut ready = self.ready.lock();
            for event in expired {
                ready.push_back((event, true));
            }
        }
    }

    fn is_drained(&self) -> bool {
        self.ready.lock().is_empty()
            && self.pending.lock().is_empty()
            && self.alarms.lock().is_empty()
    }

    /// Begins shutdown. Every pending registration and every unexpired alarm
    /// is made ready with `is_ok = false`; once those have been consumed,
    /// `next` reports `Shutdown`. Idempotent.
    pub fn shutdown(&self) {
        if self.is_shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut cancelled: Vec<Box<dyn CompletionQueueEvent>> = Vec::new();

        for entry in self.alarms.lock().drain() {
            cancelled.push(entry.event);
        }
        for (_, event) in self.pending.lock().drain() {
            cancelled.push(event);
        }

        let mut ready = self.ready.lock();
        for event in cancelled {
            ready.push_back((event, false));
        }
    }

    /// Returns true once shutdown has begun.
    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::Acquire)
    }
}

/// The timer event: wraps a thunk taking a single boolean that tells it
/// whether the alarm actually fired (true) or was cancelled by queue
/// shutdown (false).
pub struct Alarm {
    thunk: Box<dyn FnOnce(bool) + Send>,
}

impl Alarm {
    pub fn new(thunk: Box<dyn FnOnce(bool) + Send>) -> Alarm {
        Alarm { thunk: thunk }
    }
}

impl CompletionQueueEvent for Alarm {
    fn complete(self: Box<Self>, is_ok: bool) {
        (self.thunk)(is_ok);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Probe {
        hits: Arc<AtomicUsize>,
        oks: Arc<AtomicUsize>,
    }

    impl CompletionQueueEvent for Probe {
        fn complete(self: Box<Self>, is_ok: bool) {
            self.hits.fetch_add(1, Ordering::SeqCst);
            if is_ok {
                self.oks.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn probe(hits: &Arc<AtomicUsize>, oks: &Arc<AtomicUsize>) -> Box<Probe> {
        Box::new(Probe {
            hits: hits.clone(),
            oks: oks.clone(),
        })
    }

    #[test]
    fn registered_events_complete_through_their_ticket() {
        let cq = CompletionQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let oks = Arc::new(AtomicUsize::new(0));

        let ticket = cq.register(probe(&hits, &oks));
        assert!(matches!(cq.next(), Next::Idle));

        assert!(cq.complete(ticket, true));
        match cq.next() {
            Next::Event(event, is_ok) => event.complete(is_ok),
            _ => panic!("expected an event"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(oks.load(Ordering::SeqCst), 1);

        // A ticket completes at most once.
        assert!(!cq.complete(ticket, true));
    }

    #[test]
    fn alarms_fire_in_deadline_order() {
        let cq = CompletionQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let now = Instant::now();
        for (label, offset) in [(2u32, 20u64), (1, 10)] {
            let order = order.clone();
            cq.post_alarm(
                now + Duration::from_millis(offset),
                Box::new(Alarm::new(Box::new(move |is_ok| {
                    assert!(is_ok);
                    order.lock().push(label);
                }))),
            );
        }

        std::thread::sleep(Duration::from_millis(40));
        while let Next::Event(event, is_ok) = cq.next() {
            event.complete(is_ok);
        }

        assert_eq!(*order.lock(), vec![1, 2]);
    }

    #[test]
    fn shutdown_cancels_pending_and_alarmed_events() {
        let cq = CompletionQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let oks = Arc::new(AtomicUsize::new(0));

        let _ticket = cq.register(probe(&hits, &oks));
        cq.post_alarm(
            Instant::now() + Duration::from_secs(3600),
            probe(&hits, &oks),
        );

        cq.shutdown();

        let mut seen = 0;
        loop {
            match cq.next() {
                Next::Event(event, is_ok) => {
                    assert!(!is_ok);
                    event.complete(is_ok);
                    seen += 1;
                }
                Next::Shutdown => break,
                Next::Idle => panic!("queue must report shutdown once drained"),
            }
        }

        assert_eq!(seen, 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(oks.load(Ordering::SeqCst), 0);

        // Late registrations complete immediately with is_ok = false.
        let ticket = cq.register(probe(&hits, &oks));
        assert!(!cq.complete(ticket, true));
        match cq.next() {
            Next::Event(event, is_ok) => {
                assert!(!is_ok);
                event.complete(is_ok);
            }
            _ => panic!("expected the cancelled event"),
        }
    }
}
