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

//! Lifecycle and scheduling behavior of the execution context.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use monsoon::{ExecutionContext, ExecutionState, RpcStatusCode, Scheduler};
use squall::exec::sync_wait;

fn context(workers: usize, queues: usize) -> Arc<ExecutionContext> {
    ExecutionContext::new(workers, queues).unwrap()
}

#[test]
fn construction_validates_its_arguments() {
    assert!(ExecutionContext::new(0, 1).is_err());
    assert!(ExecutionContext::new(1, 0).is_err());
    assert!(ExecutionContext::new(1, 1).is_ok());
}

#[test]
fn a_single_unit_of_work_runs_exactly_once() {
    let context = context(1, 1);
    assert!(context.run());

    let hits = Arc::new(AtomicUsize::new(0));
    let posted = {
        let hits = hits.clone();
        context.post(move || {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    };
    assert!(posted);

    context.stop();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(context.is_stopped());
}

#[test]
fn lifecycle_is_monotonic_and_final() {
    let context = context(1, 1);
    assert_eq!(context.state(), ExecutionState::Ready);

    assert!(context.run());
    assert_eq!(context.state(), ExecutionState::Running);

    // A second run is refused.
    assert!(!context.run());

    context.stop();
    assert_eq!(context.state(), ExecutionState::Stopped);

    // stop is idempotent, and a stopped context cannot be restarted.
    context.stop();
    assert!(!context.run());
    assert_eq!(context.state(), ExecutionState::Stopped);
    assert!(!context.post(|| {}));
}

#[test]
fn an_alarm_in_the_past_fires_false_promptly() {
    let context = context(1, 1);
    assert!(context.run());

    let (tx, rx) = mpsc::channel();
    let posted = context.post_deadline(
        move |fired| {
            tx.send(fired).unwrap();
        },
        Instant::now() - Duration::from_secs(1),
    );
    assert!(posted);

    let fired = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(fired, false);

    context.stop();
}

#[test]
fn a_future_alarm_fires_true() {
    let context = context(1, 2);
    assert!(context.run());

    let (tx, rx) = mpsc::channel();
    let posted = context.post_after(
        move |fired| {
            tx.send(fired).unwrap();
        },
        Duration::from_millis(20),
    );
    assert!(posted);

    let fired = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(fired, true);

    context.stop();
}

#[test]
fn pending_alarms_are_cancelled_by_stop() {
    let context = context(1, 1);
    assert!(context.run());

    let (tx, rx) = mpsc::channel();
    assert!(context.post_after(
        move |fired| {
            tx.send(fired).unwrap();
        },
        Duration::from_secs(3600),
    ));

    context.stop();
    let fired = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(fired, false);
}

// Ten threads posting in a tight loop race one stop. Every callable whose
// post reported success must run; none may run twice; nothing may be
// accepted once stop has returned.
#[test]
fn stop_races_posts_without_losing_work() {
    let context = context(2, 2);
    assert!(context.run());

    let executed = Arc::new(AtomicUsize::new(0));
    let accepted = Arc::new(AtomicUsize::new(0));

    let pushers: Vec<_> = (0..10)
        .map(|_| {
            let context = context.clone();
            let executed = executed.clone();
            let accepted = accepted.clone();
            thread::spawn(move || loop {
                let executed = executed.clone();
                let posted = context.post(move || {
                    executed.fetch_add(1, Ordering::SeqCst);
                });
                if posted {
                    accepted.fetch_add(1, Ordering::SeqCst);
                } else {
                    break;
                }
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(10));
    context.stop();

    for pusher in pushers {
        pusher.join().unwrap();
    }

    assert!(!context.post(|| {}));
    assert_eq!(executed.load(Ordering::SeqCst), accepted.load(Ordering::SeqCst));
}

#[test]
fn notifications_fire_after_stop_in_insertion_order() {
    let context = context(1, 1);
    assert!(context.run());

    let order = Arc::new(spin::Mutex::new(Vec::new()));
    for label in 0..3 {
        let order = order.clone();
        let context_probe = context.clone();
        context.notify_at_stopped(move || {
            assert!(context_probe.is_stopped());
            order.lock().push(label);
        });
    }

    context.stop();
    assert_eq!(*order.lock(), vec![0, 1, 2]);

    // Late registration runs immediately.
    let order_late = order.clone();
    context.notify_at_stopped(move || order_late.lock().push(99));
    assert_eq!(*order.lock(), vec![0, 1, 2, 99]);
}

#[test]
fn schedule_delivers_unit_on_a_worker_thread() {
    let context = context(2, 1);
    assert!(context.run());

    let scheduler = Scheduler::new(context.clone());
    assert_eq!(sync_wait(scheduler.schedule()), Ok(()));

    context.stop();
}

#[test]
fn schedule_reports_unavailable_once_stopped() {
    let context = context(1, 1);
    assert!(context.run());
    context.stop();

    let scheduler = Scheduler::new(context.clone());
    let result = sync_wait(scheduler.schedule());
    assert_eq!(result.unwrap_err().code(), RpcStatusCode::Unavailable);
}

#[test]
fn schedulers_compare_by_context_identity() {
    let a = context(1, 1);
    let b = context(1, 1);
    assert_eq!(Scheduler::new(a.clone()), Scheduler::new(a.clone()));
    assert!(Scheduler::new(a) != Scheduler::new(b));
}

#[test]
fn run_while_stops_cooperatively() {
    let context = context(2, 1);
    let flag = Arc::new(AtomicBool::new(false));

    let predicate_flag = flag.clone();
    assert!(context.run_while(move || predicate_flag.load(Ordering::SeqCst)));
    assert_eq!(context.state(), ExecutionState::Running);

    flag.store(true, Ordering::SeqCst);

    let deadline = Instant::now() + Duration::from_secs(5);
    while !context.is_stopped() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(context.is_stopped());
}
