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

//! Demo greeting client. Issues a handful of unary calls through the
//! wrapped stub and waits on each with `sync_wait`.

use std::net::SocketAddr;

use log::{error, info};

use monsoon::config;
use monsoon::{Channel, ExecutionContext, MethodId, WrappedRpcStub};
use squall::envelope;
use squall::exec::sync_wait;
use squall::Bytes;

const SAY_HELLO: MethodId = 1;
const SAY_HELLO_SLOW: MethodId = 2;

fn main() {
    env_logger::init();

    let config = match config::load_client("client.toml") {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let context = ExecutionContext::new(config.workers, config.client_queues)
        .expect("Failed to create the execution context");
    context.run();

    let server: SocketAddr = format!("{}:{}", config.server_ip, config.server_port)
        .parse()
        .expect("Malformed server address");
    let channel = Channel::connect(server).expect("Failed to connect to the server");

    let hello = WrappedRpcStub::new(channel.clone(), SAY_HELLO, |payload: Bytes| {
        envelope::unpack_str(&payload)
    });
    let hello_slow = WrappedRpcStub::new(channel.clone(), SAY_HELLO_SLOW, |payload: Bytes| {
        envelope::unpack_str(&payload)
    });

    for i in 0..config.requests {
        let stub = if i % 2 == 0 { &hello } else { &hello_slow };
        let request = envelope::pack_str(&format!("visitor-{}", i));

        match sync_wait(stub.call(&context, request)) {
            Ok(reply) => info!("reply {}: {}", i, reply),
            Err(status) => error!("call {} failed: {}", i, status),
        }
    }

    channel.shutdown();
    context.stop();
}
