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

use std::collections::{HashMap, VecDeque};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use spin::Mutex;

use super::error::Error;
use super::event::{CompletionQueue, CompletionQueueEvent};
use super::wire::{self, CallId, MethodId, Status};
use squall::status::RpcStatusCode;

const RECV_POLL_INTERVAL: Duration = Duration::from_millis(20);

// Requests that arrive while no handler is re-armed yet are parked per
// method, up to this many. Past that the datagram is dropped; datagram
// transports are allowed to shed load this way.
const REQUEST_BACKLOG_LIMIT: usize = 1024;

/// One request as delivered to a server-side handler.
pub struct IncomingCall {
    pub peer: SocketAddr,
    pub call_id: CallId,
    pub method: MethodId,
    pub payload: Bytes,
}

/// Shared slot through which the wire server hands a request to the handler
/// event that claimed it.
pub type RequestSlot = Arc<Mutex<Option<IncomingCall>>>;

/// A thunk binding one service method to a handler: invoking it registers
/// the handler's event as the tag for the next request of that method on the
/// given completion queue. Handlers hold one of these so they can re-arm a
/// sibling with identical parameters.
pub type BindRequestFn =
    Arc<dyn Fn(RequestSlot, &Arc<CompletionQueue>, Box<dyn CompletionQueueEvent>) + Send + Sync>;

// A handler waiting for a request of one method.
struct WaitingTag {
    cq: Arc<CompletionQueue>,
    ticket: u64,
    slot: RequestSlot,
}

// Per-method routing state.
struct MethodEntry {
    waiting: VecDeque<WaitingTag>,
    backlog: VecDeque<IncomingCall>,
}

impl MethodEntry {
    fn new() -> MethodEntry {
        MethodEntry {
            waiting: VecDeque::new(),
            backlog: VecDeque::new(),
        }
    }
}

/// The server side of the transport: a bound datagram socket, a background
/// receive thread, and per-method queues pairing incoming requests with the
/// handler events waiting for them.
pub struct WireServer {
    socket: UdpSocket,
    port: u16,

    methods: Mutex<HashMap<MethodId, MethodEntry>>,

    is_shutdown: AtomicBool,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

// Implementation of methods on WireServer.
impl WireServer {
    /// Binds a wire server.
    ///
    /// # Arguments
    ///
    /// * `ip`:   The address to listen on, e.g. "0.0.0.0".
    /// * `port`: The UDP port to bind. Zero means pick a free port; the
    ///           chosen port is reported by `port()`.
    pub fn bind(ip: &str, port: u16) -> Result<Arc<WireServer>, Error> {
        let socket = UdpSocket::bind((ip, port))?;
        let port = socket.local_addr()?.port();
        socket.set_read_timeout(Some(RECV_POLL_INTERVAL))?;

        let server = Arc::new(WireServer {
            socket: socket,
            port: port,
            methods: Mutex::new(HashMap::new()),
            is_shutdown: AtomicBool::new(false),
            receiver: Mutex::new(None),
        });

        let weak = Arc::downgrade(&server);
        let handle = thread::Builder::new()
            .name("monsoon-server".to_string())
            .spawn(move || WireServer::recv_loop(weak))?;
        *server.receiver.lock() = Some(handle);

        info!("Wire server listening on {}:{}", ip, port);
        Ok(server)
    }

    /// Returns the UDP port the server is bound to.
    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Registers `event` as the tag for the next `method` request delivered
    /// through `cq`. If a request is already parked in the backlog, the
    /// event is completed immediately.
    pub(crate) fn bind_request(
        &self,
        method: MethodId,
        slot: RequestSlot,
        cq: &Arc<CompletionQueue>,
        event: Box<dyn CompletionQueueEvent>,
    ) {
        let ticket = cq.register(event);

        if self.is_shutdown.load(Ordering::Acquire) {
            cq.complete(ticket, false);
            return;
        }

        let parked = {
            let mut methods = self.methods.lock();
            let entry = methods.entry(method).or_insert_with(MethodEntry::new);
            match entry.backlog.pop_front() {
                Some(call) => {
                    *slot.lock() = Some(call);
                    true
                }
                None => {
                    entry.waiting.push_back(WaitingTag {
                        cq: cq.clone(),
                        ticket: ticket,
                        slot: slot,
                    });
                    false
                }
            }
        };

        if parked {
            cq.complete(ticket, true);
        }
    }

    fn recv_loop(weak: Weak<WireServer>) {
        let mut buf = vec![0u8; wire::MAX_DATAGRAM];

        loop {
            let server = match weak.upgrade() {
                Some(server) => server,
                None => break,
            };

            if server.is_shutdown.load(Ordering::Acquire) {
                break;
            }

            match server.socket.recv_from(&mut buf) {
                Ok((n, peer)) => server.route_request(&buf[..n], peer),
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    error!("Failed to receive request datagram: {}", e);
                    thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }

    fn route_request(&self, datagram: &[u8], peer: SocketAddr) {
        let (header, payload) = match wire::decode_request(datagram) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Dropping undecodable request datagram from {}: {}", peer, e);
                return;
            }
        };

        let call = IncomingCall {
            peer: peer,
            call_id: header.call_id,
            method: header.method,
            payload: payload,
        };

        // Hand the request to a waiting handler. A waiting tag can be stale
        // if its completion queue was shut down underneath it; such tags are
        // discarded and the next one tried.
        let mut call = call;
        loop {
            let mut methods = self.methods.lock();
            let entry = match methods.get_mut(&header.method) {
                Some(entry) => entry,
                None => {
                    // No handler was ever bound for this method.
                    drop(methods);
                    let status = Status::new(
                        RpcStatusCode::Unimplemented.to_wire(),
                        format!("no handler bound for method {}", header.method),
                    );
                    if let Err(e) =
                        self.send_response(call.peer, call.call_id, &status, &Bytes::new())
                    {
                        warn!("Failed to reject call {}: {}", call.call_id, e);
                    }
                    return;
                }
            };

            match entry.waiting.pop_front() {
                Some(tag) => {
                    *tag.slot.lock() = Some(call);
                    drop(methods);
                    if tag.cq.complete(tag.ticket, true) {
                        return;
                    }
                    // Stale tag; reclaim the request and try the next one.
                    match tag.slot.lock().take() {
                        Some(reclaimed) => call = reclaimed,
                        None => return,
                    }
                }
                None => {
                    if entry.backlog.len() >= REQUEST_BACKLOG_LIMIT {
                        warn!(
                            "Request backlog full for method {}; dropping call from {}",
                            header.method, peer
                        );
                        return;
                    }
                    entry.backlog.push_back(call);
                    return;
                }
            }
        }
    }

    /// Sends a response datagram back to the peer that issued `call_id`.
    pub(crate) fn send_response(
        &self,
        peer: SocketAddr,
        call_id: CallId,
        status: &Status,
        payload: &Bytes,
    ) -> std::io::Result<()> {
        let datagram = wire::encode_response(call_id, status, payload)?;
        self.socket.send_to(&datagram, peer)?;
        Ok(())
    }

    /// Shuts the server down: stops the receive thread, completes every
    /// waiting handler tag with `is_ok = false`, and discards the backlog.
    /// Idempotent.
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

        let entries: Vec<MethodEntry> = {
            let mut methods = self.methods.lock();
            methods.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            for tag in entry.waiting {
                tag.cq.complete(tag.ticket, false);
            }
        }
    }
}

impl Drop for WireServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The cloneable facade handed to service wiring code. Produces the
/// bind-request thunks handlers recycle through, and the response writers
/// they finish calls with.
#[derive(Clone)]
pub struct Service {
    server: Arc<WireServer>,
}

// Implementation of methods on Service.
impl Service {
    pub fn new(server: Arc<WireServer>) -> Service {
        Service { server: server }
    }

    /// Returns a bind-request thunk for `method`. Each invocation arms one
    /// handler event as the tag for the next request of that method.
    pub fn bind_unary(&self, method: MethodId) -> BindRequestFn {
        let server = self.server.clone();
        Arc::new(move |slot, cq, event| server.bind_request(method, slot, cq, event))
    }

    /// Returns the writer that finishes `call` with a response.
    pub fn response_writer(&self, call: &IncomingCall) -> ResponseWriter {
        ResponseWriter {
            server: self.server.clone(),
            peer: call.peer,
            call_id: call.call_id,
        }
    }
}

/// Writes the single response of a unary call and re-queues the finishing
/// tag. Consumed by use; a call is finished at most once.
pub struct ResponseWriter {
    server: Arc<WireServer>,
    peer: SocketAddr,
    call_id: CallId,
}

// Implementation of methods on ResponseWriter.
impl ResponseWriter {
    /// Sends `response` with `status` and makes `tag` ready on `cq` so the
    /// finishing completion reaches the handler. A failed send still
    /// completes the tag; the handler's lifecycle must advance regardless.
    pub fn finish(
        self,
        response: Bytes,
        status: Status,
        cq: &Arc<CompletionQueue>,
        tag: Box<dyn CompletionQueueEvent>,
    ) {
        if let Err(e) = self
            .server
            .send_response(self.peer, self.call_id, &status, &response)
        {
            warn!("Failed to send response for call {}: {}", self.call_id, e);
        }
        cq.push_ready(tag, true);
    }
}
