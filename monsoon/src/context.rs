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

use std::sync::atomic::{fence, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use spin::{Mutex, RwLock};

use super::container::ServerHandle;
use super::error::Error;
use super::event::{Alarm, CompletionQueue, Next};
use super::inflight::UnaryCall;
use super::queue::TaskQueue;

/// Lifecycle of an execution context. Transitions are monotonic: a context
/// moves forward through these states and never back; a stopped context
/// cannot be restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExecutionState {
    Ready = 0,
    Running = 1,
    ShuttingDown = 2,
    Stopped = 3,
}

impl ExecutionState {
    fn from_usize(value: usize) -> ExecutionState {
        match value {
            0 => ExecutionState::Ready,
            1 => ExecutionState::Running,
            2 => ExecutionState::ShuttingDown,
            _ => ExecutionState::Stopped,
        }
    }
}

/// The runtime root: owns the worker threads, the task-stealing queue, the
/// client-side completion queues, and the completion queues of any attached
/// servers. All asynchronous work flows through one of the three `post`
/// entry points; all of it is dispatched by the worker loop; all of it is
/// accounted for by the shutdown protocol.
pub struct ExecutionContext {
    // Self-handle so run() can hand an owning reference to each worker
    // thread. Always upgradable while a caller holds the context.
    myself: Weak<ExecutionContext>,

    // Number of worker threads spawned by run().
    workers: usize,

    // Deferred plain work. Sized with one shard more than there are
    // workers.
    tasks: TaskQueue,

    // Client-side completion queues: in-flight RPCs and timers.
    client_cqs: Vec<Arc<CompletionQueue>>,

    // Completion queues contributed by attached servers. Grown before
    // run(); a snapshot is handed to each worker at spawn.
    server_cqs: Mutex<Vec<Arc<CompletionQueue>>>,

    // Attached server containers. Held so that they live at least until
    // stop() has finished with their queues.
    servers: Mutex<Vec<Arc<dyn ServerHandle>>>,

    // Current ExecutionState, stored as its discriminant.
    state: AtomicUsize,

    // Round-robin write index over client_cqs.
    cq_index: AtomicUsize,

    // Number of post operations currently between their state check and
    // their enqueue. stop() waits for this to reach zero after leaving
    // Running, so nothing can land on a queue after the queues shut down.
    in_post: AtomicUsize,

    // Thunks to run once the context reaches Stopped, in insertion order.
    notify: Mutex<Vec<Box<dyn FnOnce() + Send>>>,

    // Worker join handles, consumed by stop().
    threads: Mutex<Vec<JoinHandle<()>>>,

    // Identifiers of the worker threads. A worker that loses the race to
    // stop must not block waiting for Stopped; it has a loop to exit.
    worker_ids: RwLock<Vec<ThreadId>>,
}

// Implementation of methods on ExecutionContext.
impl ExecutionContext {
    /// Creates a context that owns its completion queues.
    ///
    /// # Arguments
    ///
    /// * `workers`: Number of worker threads to spawn at run(). At least 1.
    /// * `queues`:  Number of client-side completion queues. At least 1.
    pub fn new(workers: usize, queues: usize) -> Result<Arc<ExecutionContext>, Error> {
        if queues < 1 {
            return Err(Error::InvalidArgument(
                "an execution context requires at least one completion queue",
            ));
        }
        ExecutionContext::with_queues(workers, (0..queues).map(|_| CompletionQueue::new()).collect())
    }

    /// Creates a context over an explicit collection of completion queues.
    pub fn with_queues(
        workers: usize,
        queues: Vec<Arc<CompletionQueue>>,
    ) -> Result<Arc<ExecutionContext>, Error> {
        if workers < 1 {
            return Err(Error::InvalidArgument(
                "an execution context requires at least one worker thread",
            ));
        }
        if queues.is_empty() {
            return Err(Error::InvalidArgument(
                "an execution context requires at least one completion queue",
            ));
        }

        Ok(Arc::new_cyclic(|myself| ExecutionContext {
            myself: myself.clone(),
            workers: workers,
            tasks: TaskQueue::new(workers + 1),
            client_cqs: queues,
            server_cqs: Mutex::new(Vec::new()),
            servers: Mutex::new(Vec::new()),
            state: AtomicUsize::new(ExecutionState::Ready as usize),
            cq_index: AtomicUsize::new(0),
            in_post: AtomicUsize::new(0),
            notify: Mutex::new(Vec::new()),
            threads: Mutex::new(Vec::new()),
            worker_ids: RwLock::new(Vec::new()),
        }))
    }

    /// Returns the current lifecycle state.
    #[inline]
    pub fn state(&self) -> ExecutionState {
        ExecutionState::from_usize(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.state() == ExecutionState::Running
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.state() == ExecutionState::Stopped
    }

    /// Attaches a server container: its completion queues will be polled by
    /// the workers, and the container is kept alive until stop() completes.
    /// Only legal before run().
    pub fn attach_server(&self, server: Arc<dyn ServerHandle>) -> Result<(), Error> {
        if self.state() != ExecutionState::Ready {
            return Err(Error::InvalidState(
                "servers can only be attached before the context runs",
            ));
        }

        self.server_cqs.lock().extend(server.work_queues());
        self.servers.lock().push(server);
        Ok(())
    }

    /// Enqueues a plain unit of work.
    ///
    /// # Return
    ///
    /// True if the queue accepted the work; false once the context has begun
    /// shutting down.
    pub fn post<F: FnOnce() + Send + 'static>(&self, work: F) -> bool {
        self.tasks.push(Box::new(work))
    }

    /// Schedules `work` to run at `deadline` on one of the completion
    /// queues. The thunk receives true when the timer fired, false when it
    /// was cancelled by shutdown. A deadline already in the past degenerates
    /// to an immediate task post carrying false.
    ///
    /// # Return
    ///
    /// True if the timer (or the degenerate task) was accepted.
    pub fn post_deadline<F: FnOnce(bool) + Send + 'static>(
        &self,
        work: F,
        deadline: Instant,
    ) -> bool {
        if deadline <= Instant::now() {
            return self.post(move || work(false));
        }

        self.in_post.fetch_add(1, Ordering::AcqRel);
        fence(Ordering::SeqCst);

        let accepted = self.state() <= ExecutionState::Running;
        if accepted {
            self.next_cq()
                .post_alarm(deadline, Box::new(Alarm::new(Box::new(work))));
        }

        self.in_post.fetch_sub(1, Ordering::AcqRel);
        accepted
    }

    /// Schedules `work` to run after `delta` has elapsed. See
    /// `post_deadline`.
    pub fn post_after<F: FnOnce(bool) + Send + 'static>(&self, work: F, delta: Duration) -> bool {
        self.post_deadline(work, Instant::now() + delta)
    }

    /// Launches a unary RPC on a round-robin-selected completion queue. The
    /// queues belong to the context, so only the context decides which queue
    /// a call goes on and whether it goes on at all.
    ///
    /// # Return
    ///
    /// `Ok` if the call was launched; the untouched call back if the context
    /// is no longer accepting work, so the caller can deliver its refusal.
    pub fn post_rpc(&self, call: UnaryCall) -> Result<(), UnaryCall> {
        self.in_post.fetch_add(1, Ordering::AcqRel);
        fence(Ordering::SeqCst);

        let result = if self.state() <= ExecutionState::Running {
            call.launch(self.next_cq());
            Ok(())
        } else {
            Err(call)
        };

        self.in_post.fetch_sub(1, Ordering::AcqRel);
        result
    }

    // Approximate round-robin spread over the client completion queues; a
    // relaxed counter is plenty.
    fn next_cq(&self) -> &Arc<CompletionQueue> {
        let index = self.cq_index.fetch_add(1, Ordering::Relaxed);
        &self.client_cqs[index % self.client_cqs.len()]
    }

    /// Registers a thunk to run once the context reaches Stopped. Thunks run
    /// in insertion order; a thunk registered after the fact runs
    /// immediately.
    pub fn notify_at_stopped<F: FnOnce() + Send + 'static>(&self, thunk: F) {
        {
            // The state check happens under the list lock so a registration
            // cannot slip in behind the drain in teardown().
            let mut notify = self.notify.lock();
            if !self.is_stopped() {
                notify.push(Box::new(thunk));
                return;
            }
        }
        thunk();
    }

    /// Spawns the worker threads and returns immediately. Runs until
    /// stop().
    pub fn run(&self) -> bool {
        self.run_while(|| false)
    }

    /// Spawns the worker threads and returns immediately. Each worker
    /// checks `predicate` once per loop; the first to observe true stops
    /// the context cooperatively.
    ///
    /// # Return
    ///
    /// True if the context transitioned Ready to Running; false if it had
    /// already left Ready.
    pub fn run_while<P>(&self, predicate: P) -> bool
    where
        P: Fn() -> bool + Send + Sync + 'static,
    {
        // Callers always hold the context in an Arc; the upgrade only
        // exists to mint owning handles for the worker threads.
        let myself = match self.myself.upgrade() {
            Some(myself) => myself,
            None => return false,
        };

        let transitioned = self.state.compare_exchange(
            ExecutionState::Ready as usize,
            ExecutionState::Running as usize,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if transitioned.is_err() {
            return false;
        }

        debug!("Execution context running with {} workers", self.workers);

        // Attachment is sealed by the state transition above; this snapshot
        // is what every worker polls.
        let server_cqs = self.server_cqs.lock().clone();
        let predicate: Arc<dyn Fn() -> bool + Send + Sync> = Arc::new(predicate);

        let mut threads = self.threads.lock();
        for index in 0..self.workers {
            let context = myself.clone();
            let server_cqs = server_cqs.clone();
            let predicate = predicate.clone();
            let handle = thread::Builder::new()
                .name(format!("monsoon-worker-{}", index))
                .spawn(move || worker_loop(context, server_cqs, predicate, index))
                .expect("failed to spawn worker thread");
            threads.push(handle);
        }

        true
    }

    /// Stops the context: transitions out of Running, waits for in-flight
    /// posts to drain, shuts down every completion queue and attached
    /// server, joins the workers, executes any work left in the task queue,
    /// and finally fires the stopped notifications. Idempotent; safe to call
    /// from a worker thread (cooperative cancellation), in which case a
    /// losing caller returns without waiting.
    pub fn stop(&self) {
        loop {
            match self.state() {
                ExecutionState::Stopped => return,
                ExecutionState::ShuttingDown => {
                    if self.is_worker_thread() {
                        return;
                    }
                    thread::sleep(Duration::from_millis(1));
                }
                current => {
                    let exchanged = self.state.compare_exchange(
                        current as usize,
                        ExecutionState::ShuttingDown as usize,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                    if exchanged.is_ok() {
                        self.teardown();
                        return;
                    }
                }
            }
        }
    }

    fn teardown(&self) {
        debug!("Stopping execution context");
        fence(Ordering::SeqCst);

        // No post may complete once we move past this point.
        while self.in_post.load(Ordering::Acquire) != 0 {
            thread::yield_now();
        }

        self.tasks.signal_done();

        let servers = self.servers.lock().clone();
        for server in &servers {
            server.shutdown_transport();
        }

        for cq in &self.client_cqs {
            cq.shutdown();
        }
        let server_cqs = self.server_cqs.lock().clone();
        for cq in &server_cqs {
            cq.shutdown();
        }

        let handles: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }

        // Anything the workers did not get to runs here, on the stopping
        // thread, before stop() returns.
        for thunk in self.tasks.drain_and_eject() {
            thunk();
        }

        self.state
            .store(ExecutionState::Stopped as usize, Ordering::Release);
        debug!("Execution context stopped");

        let notify: Vec<Box<dyn FnOnce() + Send>> = {
            let mut notify = self.notify.lock();
            notify.drain(..).collect()
        };
        for thunk in notify {
            thunk();
        }
    }

    fn is_worker_thread(&self) -> bool {
        let current = thread::current().id();
        self.worker_ids.read().contains(&current)
    }
}

// The loop body every worker runs. Polls the completion queues (client
// first, then server, each from a thread-unique offset), then the task
// queue, and backs off for a millisecond when nothing had work. Exits once
// every completion queue reports shutdown, then drains the task queue in
// place.
fn worker_loop(
    context: Arc<ExecutionContext>,
    server_cqs: Vec<Arc<CompletionQueue>>,
    predicate: Arc<dyn Fn() -> bool + Send + Sync>,
    index: usize,
) {
    context.worker_ids.write().push(thread::current().id());

    let client_cqs = &context.client_cqs;
    let total_queues = client_cqs.len() + server_cqs.len();

    loop {
        if predicate() {
            context.stop();
        }

        let mut did_work = false;
        let mut shutdown_queues = 0;

        for i in 0..client_cqs.len() {
            let cq = &client_cqs[(index + i) % client_cqs.len()];
            match cq.next() {
                Next::Event(event, is_ok) => {
                    event.complete(is_ok);
                    did_work = true;
                    break;
                }
                Next::Shutdown => shutdown_queues += 1,
                Next::Idle => {}
            }
        }

        if !did_work {
            for i in 0..server_cqs.len() {
                let cq = &server_cqs[(index + i) % server_cqs.len()];
                match cq.next() {
                    Next::Event(event, is_ok) => {
                        event.complete(is_ok);
                        did_work = true;
                        break;
                    }
                    Next::Shutdown => shutdown_queues += 1,
                    Next::Idle => {}
                }
            }
        }

        if !did_work && shutdown_queues == total_queues {
            break;
        }

        if let Some(task) = context.tasks.try_pop() {
            task();
            did_work = true;
        }

        if !did_work {
            thread::sleep(Duration::from_millis(1));
        }
    }

    trace!("Worker {} draining task queue and exiting", index);
    for thunk in context.tasks.drain_and_eject() {
        thunk();
    }
}
