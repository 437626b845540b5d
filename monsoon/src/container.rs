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

use super::context::ExecutionContext;
use super::error::Error;
use super::event::CompletionQueue;
use super::sched::Scheduler;
use super::server::{Service, WireServer};

/// What the execution context needs from an attached server: its work
/// queues, so the workers poll them, and a way to stop its transport during
/// shutdown.
pub trait ServerHandle: Send + Sync {
    fn work_queues(&self) -> Vec<Arc<CompletionQueue>>;
    fn shutdown_transport(&self);
}

/// Owns one running service: the wire server, the application server
/// object, and the completion queues its handlers live on. Building a
/// container attaches it to the execution context, which keeps it alive
/// through shutdown and polls its queues.
pub struct ServerContainer<A> {
    service: Service,
    wire: Arc<WireServer>,
    server: Arc<A>,
    cqs: Vec<Arc<CompletionQueue>>,
    port: u16,
}

// Implementation of methods on ServerContainer.
impl<A: Send + Sync + 'static> ServerContainer<A> {
    /// Builds and starts a server.
    ///
    /// # Arguments
    ///
    /// * `context`:     The execution context that will poll the server's
    ///                  work queues. Must not have been run yet.
    /// * `server`:      The application server object handed to the wiring
    ///                  routine.
    /// * `wire_rpcs`:   Installs handlers: called once per work queue with
    ///                  the application server, the service facade, a
    ///                  scheduler over `context`, and the queue. It should
    ///                  construct one handler per RPC method.
    /// * `work_queues`: Number of completion queues to service requests on.
    ///                  At least 1.
    /// * `port`:        UDP port to listen on; zero picks a free port.
    ///
    /// # Return
    ///
    /// The attached container, exposing the bound port, or a construction
    /// error.
    pub fn build<F>(
        context: &Arc<ExecutionContext>,
        server: Arc<A>,
        wire_rpcs: F,
        work_queues: usize,
        port: u16,
    ) -> Result<Arc<ServerContainer<A>>, Error>
    where
        F: Fn(&A, &Service, Scheduler, &Arc<CompletionQueue>),
    {
        if work_queues < 1 {
            return Err(Error::InvalidArgument("requires at least 1 work queue"));
        }

        let wire = WireServer::bind("0.0.0.0", port)?;
        let port = wire.port();
        let service = Service::new(wire.clone());

        let cqs: Vec<Arc<CompletionQueue>> =
            (0..work_queues).map(|_| CompletionQueue::new()).collect();

        // Register the RPC handlers onto every work queue.
        for cq in &cqs {
            wire_rpcs(&server, &service, Scheduler::new(context.clone()), cq);
        }

        let container = Arc::new(ServerContainer {
            service: service,
            wire: wire,
            server: server,
            cqs: cqs,
            port: port,
        });

        if let Err(e) = context.attach_server(container.clone()) {
            container.stop();
            return Err(e);
        }

        Ok(container)
    }

    /// Returns the UDP port the server is listening on.
    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the application server object.
    #[inline]
    pub fn server(&self) -> &Arc<A> {
        &self.server
    }

    /// Returns the service facade, should late wiring be needed in tests.
    #[inline]
    pub fn service(&self) -> &Service {
        &self.service
    }

    /// Stops the service: shuts the wire transport down (waiting handlers
    /// see `is_ok = false` and retire) and shuts down the work queues so
    /// the workers finish draining them. Idempotent.
    pub fn stop(&self) {
        self.wire.shutdown();
        for cq in &self.cqs {
            cq.shutdown();
        }
    }
}

impl<A: Send + Sync + 'static> ServerHandle for ServerContainer<A> {
    fn work_queues(&self) -> Vec<Arc<CompletionQueue>> {
        self.cqs.clone()
    }

    fn shutdown_transport(&self) {
        self.wire.shutdown();
    }
}
