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

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use spin::Mutex;

use squall::exec::{start_detached, AnySender, Sender, SenderExt};
use squall::status::RpcStatus;

use super::event::{CompletionQueue, CompletionQueueEvent};
use super::sched::Scheduler;
use super::server::{BindRequestFn, RequestSlot, ResponseWriter, Service};
use super::wire::{self, CallId, MethodId, Status};

/// Request-side information handed to server logic alongside the payload.
pub struct ServerContext {
    pub peer: SocketAddr,
    pub call_id: CallId,
    pub method: MethodId,
}

/// What a piece of server logic produced for one request.
pub enum UnaryOutcome {
    /// A response envelope, ready to write immediately.
    Response(Bytes),

    /// An immediate failure; the status is mapped onto the wire verbatim.
    Fail(RpcStatus),

    /// A sender that will produce the response envelope. It is composed
    /// onto the context's scheduler and detached; its error status, if any,
    /// is mapped onto the wire verbatim.
    Deferred(AnySender<Bytes>),
}

// Implementation of methods on UnaryOutcome.
impl UnaryOutcome {
    pub fn reply(response: Bytes) -> UnaryOutcome {
        UnaryOutcome::Response(response)
    }

    pub fn fail(status: RpcStatus) -> UnaryOutcome {
        UnaryOutcome::Fail(status)
    }

    pub fn deferred<S>(sender: S) -> UnaryOutcome
    where
        S: Sender<Output = Bytes>,
    {
        UnaryOutcome::Deferred(AnySender::new(sender))
    }
}

/// Server logic for one class of unary requests.
pub type UnaryLogic = Arc<dyn Fn(&ServerContext, Bytes) -> UnaryOutcome + Send + Sync>;

// Where in its lifecycle a handler is. AwaitRequest means the handler is
// the registered tag for the next request of its method; Finish means the
// response write is in flight and the next completion is terminal.
enum Phase {
    AwaitRequest,
    Finish,
}

/// A completion-queue event servicing one class of unary requests on one
/// completion queue. On its first completion it spawns an identical sibling
/// (so the service stays continuously ready), runs the logic, and arranges
/// the response write with itself as the finishing tag; the second
/// completion destroys it. A first completion with `is_ok == false` means
/// the service is shutting down, and destroys it directly.
pub struct UnaryHandler {
    scheduler: Scheduler,
    service: Service,
    bind: BindRequestFn,
    logic: UnaryLogic,
    cq: Arc<CompletionQueue>,
    slot: RequestSlot,
    phase: Phase,
}

// Implementation of methods on UnaryHandler.
impl UnaryHandler {
    /// Creates a handler and registers it as the tag for the next request
    /// of its method. The completion queue's event graph owns it from here
    /// on.
    ///
    /// # Arguments
    ///
    /// * `scheduler`: Scheduler deferred logic is composed onto.
    /// * `service`:   The service facade, for constructing response writers.
    /// * `bind`:      The bind-request thunk tying one method to this
    ///                handler; re-invoked verbatim to spawn siblings.
    /// * `logic`:     The request logic.
    /// * `cq`:        The completion queue this handler lives on.
    pub fn spawn(
        scheduler: Scheduler,
        service: Service,
        bind: BindRequestFn,
        logic: UnaryLogic,
        cq: Arc<CompletionQueue>,
    ) {
        let slot: RequestSlot = Arc::new(Mutex::new(None));
        let handler = Box::new(UnaryHandler {
            scheduler: scheduler,
            service: service,
            bind: bind.clone(),
            logic: logic,
            cq: cq.clone(),
            slot: slot.clone(),
            phase: Phase::AwaitRequest,
        });
        bind(slot, &cq, handler);
    }
}

impl CompletionQueueEvent for UnaryHandler {
    fn complete(mut self: Box<Self>, is_ok: bool) {
        match self.phase {
            // The response write finished (or was cancelled); either way
            // this handler's call is over.
            Phase::Finish => return,

            Phase::AwaitRequest => {
                if !is_ok {
                    // Service shutdown; nothing to recycle.
                    return;
                }
            }
        }

        // Spawn the sibling first: from this moment the service is again
        // listening for the next request on this queue.
        UnaryHandler::spawn(
            self.scheduler.clone(),
            self.service.clone(),
            self.bind.clone(),
            self.logic.clone(),
            self.cq.clone(),
        );
        self.phase = Phase::Finish;

        let call = match self.slot.lock().take() {
            Some(call) => call,
            None => {
                warn!("Request completion delivered without a request; dropping handler");
                return;
            }
        };

        let context = ServerContext {
            peer: call.peer,
            call_id: call.call_id,
            method: call.method,
        };
        let writer = self.service.response_writer(&call);
        let cq = self.cq.clone();
        let scheduler = self.scheduler.clone();
        let logic = self.logic.clone();

        match logic(&context, call.payload) {
            UnaryOutcome::Response(response) => {
                writer.finish(response, Status::ok(), &cq, self);
            }
            UnaryOutcome::Fail(status) => {
                writer.finish(Bytes::new(), wire::rpc_to_status(&status), &cq, self);
            }
            UnaryOutcome::Deferred(sender) => {
                let finisher = Finisher::new(writer, cq, self);
                let on_value = finisher.clone();
                let on_error = finisher;

                let work = scheduler
                    .schedule()
                    .let_value(move |_| sender)
                    .then(move |response: Bytes| on_value.finish(response, Status::ok()))
                    .upon_error(move |status| {
                        on_error.finish(Bytes::new(), wire::rpc_to_status(&status))
                    });
                start_detached(work);
            }
        }
    }
}

// The writer, queue, and finishing tag of a deferred response, shared
// between the value and error arms of the detached chain. Exactly one arm
// runs; the first call claims the state and later calls are no-ops.
#[derive(Clone)]
struct Finisher {
    inner: Arc<Mutex<Option<FinishState>>>,
}

struct FinishState {
    writer: ResponseWriter,
    cq: Arc<CompletionQueue>,
    tag: Box<dyn CompletionQueueEvent>,
}

impl Finisher {
    fn new(writer: ResponseWriter, cq: Arc<CompletionQueue>, tag: Box<dyn CompletionQueueEvent>) -> Finisher {
        Finisher {
            inner: Arc::new(Mutex::new(Some(FinishState {
                writer: writer,
                cq: cq,
                tag: tag,
            }))),
        }
    }

    fn finish(&self, response: Bytes, status: Status) {
        if let Some(state) = self.inner.lock().take() {
            state.writer.finish(response, status, &state.cq, state.tag);
        }
    }
}
