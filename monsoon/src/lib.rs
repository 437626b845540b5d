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

//! An asynchronous RPC execution runtime: a pool of worker threads driving
//! completion queues and a task-stealing queue, with the sender/receiver
//! model from the `squall` crate layered on top. Client calls and server
//! handlers are heap-owned completion-queue events; values and errors flow
//! to application code through sender compositions only.

#[macro_use]
extern crate log;

pub mod channel;
pub mod config;
pub mod container;
pub mod context;
pub mod error;
pub mod event;
pub mod handler;
pub mod inflight;
pub mod queue;
pub mod sched;
pub mod server;
pub mod stub;
pub mod wire;

pub use channel::Channel;
pub use container::{ServerContainer, ServerHandle};
pub use context::{ExecutionContext, ExecutionState};
pub use error::Error;
pub use event::{CompletionQueue, CompletionQueueEvent};
pub use handler::{ServerContext, UnaryHandler, UnaryLogic, UnaryOutcome};
pub use sched::{schedule, Scheduler};
pub use server::Service;
pub use stub::{PureRpcSender, RpcSender, RpcStub, WrappedRpcStub};
pub use wire::MethodId;

pub use squall::status::{RpcStatus, RpcStatusCode};
