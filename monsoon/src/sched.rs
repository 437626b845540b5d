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

use std::sync::Arc;

use spin::Mutex;

use squall::exec::{Receiver, Sender};
use squall::status::{RpcStatus, RpcStatusCode};

use super::context::ExecutionContext;

/// A cheap value handle through which sender chains are moved onto an
/// execution context. Two schedulers compare equal exactly when they refer
/// to the same context.
#[derive(Clone)]
pub struct Scheduler {
    context: Arc<ExecutionContext>,
}

// Implementation of methods on Scheduler.
impl Scheduler {
    pub fn new(context: Arc<ExecutionContext>) -> Scheduler {
        Scheduler { context: context }
    }

    /// Returns the context this scheduler posts onto.
    #[inline]
    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.context
    }

    /// Returns a sender that completes with `()` from a worker thread of
    /// the context. This is the injection point by which arbitrary sender
    /// compositions start executing on the runtime.
    pub fn schedule(&self) -> ScheduleSender {
        ScheduleSender {
            context: self.context.clone(),
        }
    }
}

impl PartialEq for Scheduler {
    fn eq(&self, other: &Scheduler) -> bool {
        Arc::ptr_eq(&self.context, &other.context)
    }
}

impl Eq for Scheduler {}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("context", &Arc::as_ptr(&self.context))
            .finish()
    }
}

/// Free-function spelling of `Scheduler::schedule`.
pub fn schedule(scheduler: &Scheduler) -> ScheduleSender {
    scheduler.schedule()
}

/// The sender produced by `schedule`. On start it posts a thunk onto the
/// context's task queue that delivers `set_value(())`; if the context is no
/// longer accepting work the receiver gets `set_error(Unavailable)`
/// instead.
pub struct ScheduleSender {
    context: Arc<ExecutionContext>,
}

impl Sender for ScheduleSender {
    type Output = ();

    fn submit<R>(self, receiver: R)
    where
        R: Receiver<Input = ()>,
    {
        // The receiver has to survive either path: moved into the posted
        // thunk when the queue accepts it, or recovered for the error
        // delivery when it does not. The cell is claimed exactly once.
        let cell = Arc::new(Mutex::new(Some(receiver)));
        let posted = cell.clone();

        let accepted = self.context.post(move || {
            if let Some(receiver) = posted.lock().take() {
                receiver.set_value(());
            }
        });

        if !accepted {
            if let Some(receiver) = cell.lock().take() {
                receiver.set_error(RpcStatus::with_details(
                    RpcStatusCode::Unavailable,
                    "execution context is not accepting work",
                ));
            }
        }
    }
}
