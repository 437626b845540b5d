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

use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use spin::Mutex;

use super::error::Error;
use super::event::{CompletionQueue, CompletionQueueEvent};
use super::wire::{self, CallId, MethodId, Status};

// How long the receive thread blocks before re-checking the shutdown flag.
const RECV_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// The wire status and payload of one finished call. The transport fills
/// this in before it completes the call's ticket; the in-flight event reads
/// it back out when a worker dispatches the completion.
pub struct Reply {
    pub status: Status,
    pub payload: Bytes,
}

impl Reply {
    pub fn unset() -> Reply {
        Reply {
            status: Status::unset(),
            payload: Bytes::new(),
        }
    }
}

/// Shared slot through which the transport hands a reply to the event that
/// owns the call.
pub type ReplySlot = Arc<Mutex<Reply>>;

// Where a response for an outstanding call should be delivered.
struct Route {
    cq: Arc<CompletionQueue>,
    ticket: u64,
    reply: ReplySlot,
}

/// The client side of the transport: one connected datagram socket, a
/// background receive thread, and a routing table from call identifiers to
/// the completion queues awaiting their replies.
pub struct Channel {
    socket: UdpSocket,

    // Outstanding calls. Entries leave when a response arrives or when the
    // channel shuts down.
    routes: Mutex<HashMap<CallId, Route>>,

    next_call_id: AtomicU64,
    is_shutdown: AtomicBool,

    // The receive thread. Joined on shutdown.
    receiver: Mutex<Option<JoinHandle<()>>>,
}

// Implementation of methods on Channel.
impl Channel {
    /// Connects a channel to a server.
    ///
    /// # Arguments
    ///
    /// * `server`: The address the server's wire socket is bound to.
    ///
    /// # Return
    ///
    /// A channel ready to issue calls, or the socket error that prevented
    /// binding or connecting.
    pub fn connect(server: SocketAddr) -> Result<Arc<Channel>, Error> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(server)?;
        socket.set_read_timeout(Some(RECV_POLL_INTERVAL))?;

        let channel = Arc::new(Channel {
            socket: socket,
            routes: Mutex::new(HashMap::new()),
            next_call_id: AtomicU64::new(1),
            is_shutdown: AtomicBool::new(false),
            receiver: Mutex::new(None),
        });

        let weak = Arc::downgrade(&channel);
        let handle = thread::Builder::new()
            .name("monsoon-channel".to_string())
            .spawn(move || Channel::recv_loop(weak))?;
        *channel.receiver.lock() = Some(handle);

        Ok(channel)
    }

    /// Issues one unary call. The event is registered with `cq` before the
    /// request datagram leaves, so a reply can never race its own
    /// registration. A send failure is reported through the normal
    /// completion path as an `Unavailable` wire status.
    ///
    /// # Arguments
    ///
    /// * `method`:  The method to invoke on the server.
    /// * `request`: The request payload envelope.
    /// * `reply`:   The slot the transport will deposit the reply into.
    /// * `cq`:      The completion queue the call is attached to.
    /// * `event`:   The heap-owned event to complete when the reply lands.
    pub(crate) fn start_unary(
        &self,
        method: MethodId,
        request: &Bytes,
        reply: ReplySlot,
        cq: &Arc<CompletionQueue>,
        event: Box<dyn CompletionQueueEvent>,
    ) {
        let ticket = cq.register(event);

        if self.is_shutdown.load(Ordering::Acquire) {
            cq.complete(ticket, false);
            return;
        }

        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        self.routes.lock().insert(
            call_id,
            Route {
                cq: cq.clone(),
                ticket: ticket,
                reply: reply.clone(),
            },
        );

        let result = wire::encode_request(method, call_id, request)
            .and_then(|datagram| self.socket.send(&datagram));

        if let Err(e) = result {
            self.routes.lock().remove(&call_id);
            reply.lock().status = Status::unavailable(format!("request send failed: {}", e));
            cq.complete(ticket, true);
        }
    }

    // Body of the receive thread. Holds only a weak handle so that dropping
    // the last user reference lets the thread wind down on its own.
    fn recv_loop(weak: Weak<Channel>) {
        let mut buf = vec![0u8; wire::MAX_DATAGRAM];

        loop {
            let channel = match weak.upgrade() {
                Some(channel) => channel,
                None => break,
            };

            if channel.is_shutdown.load(Ordering::Acquire) {
                break;
            }

            match channel.socket.recv(&mut buf) {
                Ok(n) => channel.route_response(&buf[..n]),
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    error!("Failed to receive response datagram: {}", e);
                    thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }

    fn route_response(&self, datagram: &[u8]) {
        match wire::decode_response(datagram) {
            Ok((call_id, status, payload)) => {
                let route = self.routes.lock().remove(&call_id);
                match route {
                    Some(route) => {
                        {
                            let mut reply = route.reply.lock();
                            reply.status = status;
                            reply.payload = payload;
                        }
                        route.cq.complete(route.ticket, true);
                    }
                    None => debug!("Dropping response for unknown call {}", call_id),
                }
            }
            Err(e) => warn!("Dropping undecodable response datagram: {}", e),
        }
    }

    /// Shuts the channel down: stops the receive thread and cancels every
    /// outstanding call with `is_ok = false`. Idempotent.
    pub fn shutdown(&self) {
        if self.is_shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        let handle = self.receiver.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }

        let routes: Vec<Route> = self.routes.lock().drain().map(|(_, route)| route).collect();
        for route in routes {
            route.cq.complete(route.ticket, false);
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.shutdown();
    }
}
