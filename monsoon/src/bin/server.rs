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

//! Demo greeting server. Hosts one service with an immediate-mode method
//! and a deferred (sender-composed) method, then serves until killed.

use std::sync::Arc;
use std::thread;

use log::{error, info};

use monsoon::config;
use monsoon::{
    ExecutionContext, MethodId, RpcStatus, RpcStatusCode, ServerContainer, UnaryHandler,
    UnaryOutcome,
};
use squall::envelope;
use squall::exec::{just, SenderExt};

// Method identifiers of the greeting service. Shared by convention with the
// demo client.
const SAY_HELLO: MethodId = 1;
const SAY_HELLO_SLOW: MethodId = 2;

// The application server object: what the RPC handlers call into.
struct GreetingServer {
    greeting: String,
}

impl GreetingServer {
    fn compose(&self, name: &str) -> String {
        format!("{}, {}!", self.greeting, name)
    }
}

fn main() {
    env_logger::init();

    let config = match config::load_server("server.toml") {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let context = ExecutionContext::new(config.workers, config.client_queues)
        .expect("Failed to create the execution context");

    let app = Arc::new(GreetingServer {
        greeting: "Hello".to_string(),
    });

    let wiring_app = app.clone();
    let container = ServerContainer::build(
        &context,
        app,
        move |_, service, scheduler, cq| {
            // Immediate mode: the logic returns the response envelope.
            let greeter = wiring_app.clone();
            UnaryHandler::spawn(
                scheduler.clone(),
                service.clone(),
                service.bind_unary(SAY_HELLO),
                Arc::new(move |_, payload| match envelope::unpack_str(&payload) {
                    Ok(name) => UnaryOutcome::reply(envelope::pack_str(&greeter.compose(&name))),
                    Err(e) => UnaryOutcome::fail(RpcStatus::with_details(
                        RpcStatusCode::InvalidArgument,
                        format!("bad request envelope: {}", e),
                    )),
                }),
                cq.clone(),
            );

            // Deferred mode: the logic returns a sender of the response.
            let greeter = wiring_app.clone();
            UnaryHandler::spawn(
                scheduler.clone(),
                service.clone(),
                service.bind_unary(SAY_HELLO_SLOW),
                Arc::new(move |_, payload| {
                    let greeter = greeter.clone();
                    match envelope::unpack_str(&payload) {
                        Ok(name) => UnaryOutcome::deferred(
                            just(name)
                                .then(move |name| envelope::pack_str(&greeter.compose(&name))),
                        ),
                        Err(e) => UnaryOutcome::fail(RpcStatus::with_details(
                            RpcStatusCode::InvalidArgument,
                            format!("bad request envelope: {}", e),
                        )),
                    }
                }),
                cq.clone(),
            );
        },
        config.work_queues,
        config.udp_port,
    )
    .expect("Failed to start the greeting server");

    context.run();
    info!("Greeting server serving on port {}", container.port());

    // No shutdown handling here; the demo serves until the process is
    // killed.
    loop {
        thread::park();
    }
}
