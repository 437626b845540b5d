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

//! Client-side stubs. An `RpcStub` produces senders that surface the raw
//! response envelope; a `WrappedRpcStub` applies a conversion functor so
//! that the rest of the application never touches wire types.
//!
//! Only the execution context may decide which completion queue a call is
//! attached to, and whether it is attached at all. The stubs therefore
//! describe a call as a `UnaryCall` bundle and hand it to `post_rpc` at
//! start time; a refused bundle comes back so the sender can deliver
//! `Unavailable` itself.

use std::io;
use std::sync::Arc;

use bytes::Bytes;

use squall::exec::{Receiver, Sender};
use squall::status::{RpcStatus, RpcStatusCode};

use super::channel::Channel;
use super::context::ExecutionContext;
use super::inflight::{CompletionThunk, UnaryCall};
use super::wire::{self, MethodId, Status};

/// Converts a response envelope into an application result. Failures are
/// delivered to the caller as `Internal` errors carrying the cause.
pub type ConvertFn<R> = Arc<dyn Fn(Bytes) -> io::Result<R> + Send + Sync>;

/// Invoked with the converted result of a wrapped call, or with whatever
/// status prevented conversion.
pub type WrappedCompletion<R> = Box<dyn FnOnce(bool, Status, Option<R>) + Send>;

fn unavailable_after_shutdown() -> RpcStatus {
    RpcStatus::with_details(RpcStatusCode::Unavailable, "operation posted after shutdown")
}

/// The client stub for one method, producing "pure" senders whose value
/// channel carries the raw response envelope.
pub struct RpcStub {
    channel: Arc<Channel>,
    method: MethodId,
}

// Implementation of methods on RpcStub.
impl RpcStub {
    /// # Arguments
    ///
    /// * `channel`: The channel calls are issued on.
    /// * `method`:  The method this stub invokes.
    pub fn new(channel: Arc<Channel>, method: MethodId) -> RpcStub {
        RpcStub {
            channel: channel,
            method: method,
        }
    }

    /// Describes one call against `context`. Nothing touches the wire until
    /// the returned sender is connected and started.
    pub fn call(&self, context: &Arc<ExecutionContext>, request: Bytes) -> PureRpcSender {
        PureRpcSender {
            context: context.clone(),
            channel: self.channel.clone(),
            method: self.method,
            request: request,
        }
    }
}

/// A sender for one unary call, exposing the transport-level response
/// envelope on its value channel.
pub struct PureRpcSender {
    context: Arc<ExecutionContext>,
    channel: Arc<Channel>,
    method: MethodId,
    request: Bytes,
}

impl Sender for PureRpcSender {
    type Output = Bytes;

    fn submit<R>(self, receiver: R)
    where
        R: Receiver<Input = Bytes>,
    {
        let completion: CompletionThunk = Box::new(move |is_ok, status, payload| {
            if !is_ok {
                receiver.set_error(unavailable_after_shutdown());
            } else if !status.is_ok() {
                receiver.set_error(wire::status_to_rpc(&status));
            } else {
                receiver.set_value(payload);
            }
        });

        let call = UnaryCall::new(self.channel, self.method, self.request, completion);
        if let Err(call) = self.context.post_rpc(call) {
            call.reject();
        }
    }
}

/// The client stub for one method plus a conversion functor. Its senders
/// are parameterised only by the application result type; the service, the
/// envelope shape, and the transport status never escape.
pub struct WrappedRpcStub<R> {
    channel: Arc<Channel>,
    method: MethodId,
    convert: ConvertFn<R>,
}

// Implementation of methods on WrappedRpcStub.
impl<R: Send + 'static> WrappedRpcStub<R> {
    /// # Arguments
    ///
    /// * `channel`: The channel calls are issued on.
    /// * `method`:  The method this stub invokes.
    /// * `convert`: Converts response envelopes into application results.
    pub fn new<F>(channel: Arc<Channel>, method: MethodId, convert: F) -> WrappedRpcStub<R>
    where
        F: Fn(Bytes) -> io::Result<R> + Send + Sync + 'static,
    {
        WrappedRpcStub {
            channel: channel,
            method: method,
            convert: Arc::new(convert),
        }
    }

    /// Describes one call against `context`, producing a type-erased
    /// sender of the converted result.
    pub fn call(&self, context: &Arc<ExecutionContext>, request: Bytes) -> RpcSender<R> {
        let channel = self.channel.clone();
        let method = self.method;
        let convert = self.convert.clone();

        // Outer layer: curries the conversion into the completion the
        // transport will eventually run. Inner layer: the UnaryCall the
        // context launches once it has picked a completion queue.
        let factory = move |completion: WrappedCompletion<R>| -> UnaryCall {
            let curried: CompletionThunk = Box::new(move |is_ok, status, payload| {
                if !is_ok || !status.is_ok() {
                    completion(is_ok, status, None);
                    return;
                }
                match convert(payload) {
                    Ok(result) => completion(true, status, Some(result)),
                    Err(e) => completion(
                        true,
                        Status::internal(format!("failed to unpack response envelope: {}", e)),
                        None,
                    ),
                }
            });
            UnaryCall::new(channel, method, request, curried)
        };

        RpcSender {
            context: context.clone(),
            factory: Box::new(factory),
        }
    }
}

/// A type-erased sender for one wrapped call: knows the result type and
/// nothing else.
pub struct RpcSender<R> {
    context: Arc<ExecutionContext>,
    factory: Box<dyn FnOnce(WrappedCompletion<R>) -> UnaryCall + Send>,
}

impl<R: Send + 'static> Sender for RpcSender<R> {
    type Output = R;

    fn submit<Recv>(self, receiver: Recv)
    where
        Recv: Receiver<Input = R>,
    {
        let completion: WrappedCompletion<R> = Box::new(move |is_ok, status, result| {
            if !is_ok {
                receiver.set_error(unavailable_after_shutdown());
            } else if !status.is_ok() {
                receiver.set_error(wire::status_to_rpc(&status));
            } else {
                match result {
                    Some(value) => receiver.set_value(value),
                    None => receiver.set_error(RpcStatus::with_details(
                        RpcStatusCode::LogicError,
                        "successful result contained no value",
                    )),
                }
            }
        });

        let call = (self.factory)(completion);
        if let Err(call) = self.context.post_rpc(call) {
            call.reject();
        }
    }
}
