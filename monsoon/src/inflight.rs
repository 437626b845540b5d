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

use std::mem;
use std::sync::Arc;

use bytes::Bytes;
use spin::Mutex;

use super::channel::{Channel, Reply, ReplySlot};
use super::event::{CompletionQueue, CompletionQueueEvent};
use super::wire::{MethodId, Status};

/// Invoked exactly once when a client call reaches its terminal state.
/// `is_ok == false` means the completion was manufactured by shutdown; the
/// status and payload are meaningful only when `is_ok` is true.
pub type CompletionThunk = Box<dyn FnOnce(bool, Status, Bytes) + Send>;

/// A single client-side request/response round-trip, living on the heap as
/// the tag for its own completion. Constructed inside a completion-queue
/// post; owned by the queue until the reply (or a cancellation) arrives;
/// consumed when a worker dispatches the completion.
pub struct InflightRpc {
    // Filled in by the channel's receive thread before the ticket
    // completes.
    reply: ReplySlot,

    completion: CompletionThunk,
}

impl CompletionQueueEvent for InflightRpc {
    fn complete(self: Box<Self>, is_ok: bool) {
        let reply = {
            let mut slot = self.reply.lock();
            mem::replace(&mut *slot, Reply::unset())
        };
        (self.completion)(is_ok, reply.status, reply.payload);
    }
}

/// Everything needed to put one unary call on the wire, bundled so the
/// execution context can launch it onto the completion queue it selects, or
/// hand it back untouched when the context is no longer accepting work.
pub struct UnaryCall {
    channel: Arc<Channel>,
    method: MethodId,
    request: Bytes,
    completion: CompletionThunk,
}

// Implementation of methods on UnaryCall.
impl UnaryCall {
    /// Bundles a call.
    ///
    /// # Arguments
    ///
    /// * `channel`:    The channel to issue the call on.
    /// * `method`:     The method to invoke.
    /// * `request`:    The request payload envelope.
    /// * `completion`: The thunk to invoke at the call's terminal state.
    pub fn new(
        channel: Arc<Channel>,
        method: MethodId,
        request: Bytes,
        completion: CompletionThunk,
    ) -> UnaryCall {
        UnaryCall {
            channel: channel,
            method: method,
            request: request,
            completion: completion,
        }
    }

    /// Launches the call: constructs the in-flight event, surrenders it to
    /// `cq`, and sends the request. Called by the execution context with the
    /// completion queue it selected.
    pub(crate) fn launch(self, cq: &Arc<CompletionQueue>) {
        let reply: ReplySlot = Arc::new(Mutex::new(Reply::unset()));
        let event = Box::new(InflightRpc {
            reply: reply.clone(),
            completion: self.completion,
        });
        self.channel
            .start_unary(self.method, &self.request, reply, cq, event);
    }

    /// Delivers the refused-completion directly: the context declined to
    /// launch the call because it is shutting down.
    pub fn reject(self) {
        (self.completion)(false, Status::unset(), Bytes::new());
    }
}
