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

//! End-to-end unary calls over the loopback transport: a greeting service
//! hosted on an execution context, exercised through the pure and wrapped
//! stubs.

use std::sync::Arc;

use monsoon::{
    Channel, ExecutionContext, MethodId, RpcStatus, RpcStatusCode, ServerContainer, UnaryHandler,
    UnaryOutcome, WrappedRpcStub,
};
use squall::envelope;
use squall::exec::{just, just_error, sync_wait, SenderExt};
use squall::Bytes;

const GREET: MethodId = 1;
const GREET_DEFERRED: MethodId = 2;
const FAIL_DEFERRED: MethodId = 3;
const FAIL_IMMEDIATE: MethodId = 4;
const BAD_REPLY: MethodId = 5;

struct GreetingServer {
    greeting: String,
}

impl GreetingServer {
    fn compose(&self, name: &str) -> String {
        format!("{}, {}!", self.greeting, name)
    }
}

struct Harness {
    context: Arc<ExecutionContext>,
    channel: Arc<Channel>,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.channel.shutdown();
        self.context.stop();
    }
}

// Brings up the whole stack on loopback: a context, a greeting service on
// an ephemeral port, and a connected channel.
fn start_greeting(workers: usize, work_queues: usize) -> Harness {
    let context = ExecutionContext::new(workers, 1).unwrap();
    let app = Arc::new(GreetingServer {
        greeting: "Hello".to_string(),
    });

    let wiring_app = app.clone();
    let container = ServerContainer::build(
        &context,
        app,
        move |_, service, scheduler, cq| {
            let greeter = wiring_app.clone();
            UnaryHandler::spawn(
                scheduler.clone(),
                service.clone(),
                service.bind_unary(GREET),
                Arc::new(move |_, payload| match envelope::unpack_str(&payload) {
                    Ok(name) => UnaryOutcome::reply(envelope::pack_str(&greeter.compose(&name))),
                    Err(e) => UnaryOutcome::fail(RpcStatus::with_details(
                        RpcStatusCode::InvalidArgument,
                        format!("bad request envelope: {}", e),
                    )),
                }),
                cq.clone(),
            );

            let greeter = wiring_app.clone();
            UnaryHandler::spawn(
                scheduler.clone(),
                service.clone(),
                service.bind_unary(GREET_DEFERRED),
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

            UnaryHandler::spawn(
                scheduler.clone(),
                service.clone(),
                service.bind_unary(FAIL_DEFERRED),
                Arc::new(move |_, _| {
                    UnaryOutcome::deferred(just_error::<Bytes>(RpcStatus::with_details(
                        RpcStatusCode::NotFound,
                        "m",
                    )))
                }),
                cq.clone(),
            );

            UnaryHandler::spawn(
                scheduler.clone(),
                service.clone(),
                service.bind_unary(FAIL_IMMEDIATE),
                Arc::new(move |_, _| {
                    UnaryOutcome::fail(RpcStatus::with_details(
                        RpcStatusCode::PermissionDenied,
                        "boom",
                    ))
                }),
                cq.clone(),
            );

            // Replies with an envelope no string conversion can unpack.
            UnaryHandler::spawn(
                scheduler.clone(),
                service.clone(),
                service.bind_unary(BAD_REPLY),
                Arc::new(move |_, _| UnaryOutcome::reply(Bytes::from_static(&[0xff]))),
                cq.clone(),
            );
        },
        work_queues,
        0,
    )
    .unwrap();

    assert!(context.run());

    let server = format!("127.0.0.1:{}", container.port()).parse().unwrap();
    let channel = Channel::connect(server).unwrap();

    Harness {
        context: context,
        channel: channel,
    }
}

fn greeting_stub(harness: &Harness, method: MethodId) -> WrappedRpcStub<String> {
    WrappedRpcStub::new(harness.channel.clone(), method, |payload: Bytes| {
        envelope::unpack_str(&payload)
    })
}

#[test]
fn immediate_logic_answers_a_unary_call() {
    let harness = start_greeting(2, 1);
    let stub = greeting_stub(&harness, GREET);

    let reply = sync_wait(stub.call(&harness.context, envelope::pack_str("squall")));
    assert_eq!(reply, Ok("Hello, squall!".to_string()));
}

#[test]
fn deferred_logic_answers_through_the_scheduler() {
    let harness = start_greeting(2, 1);
    let stub = greeting_stub(&harness, GREET_DEFERRED);

    let reply = sync_wait(stub.call(&harness.context, envelope::pack_str("monsoon")));
    assert_eq!(reply, Ok("Hello, monsoon!".to_string()));
}

#[test]
fn the_pure_stub_surfaces_the_raw_envelope() {
    let harness = start_greeting(2, 1);
    let stub = monsoon::RpcStub::new(harness.channel.clone(), GREET);

    let envelope_out =
        sync_wait(stub.call(&harness.context, envelope::pack_str("wire"))).unwrap();
    assert_eq!(envelope::unpack_str(&envelope_out).unwrap(), "Hello, wire!");
}

// A thousand requests over two work queues; the handlers must keep
// recycling so that every request finds a listener.
#[test]
fn handlers_recycle_through_a_thousand_requests() {
    let harness = start_greeting(4, 2);
    let stub = greeting_stub(&harness, GREET);

    for i in 0..1000 {
        let name = format!("visitor-{}", i);
        let reply = sync_wait(stub.call(&harness.context, envelope::pack_str(&name)));
        assert_eq!(reply, Ok(format!("Hello, visitor-{}!", i)));
    }
}

#[test]
fn both_logic_shapes_interleave() {
    let harness = start_greeting(2, 2);
    let immediate = greeting_stub(&harness, GREET);
    let deferred = greeting_stub(&harness, GREET_DEFERRED);

    for i in 0..50 {
        let name = format!("v{}", i);
        let stub = if i % 2 == 0 { &immediate } else { &deferred };
        let reply = sync_wait(stub.call(&harness.context, envelope::pack_str(&name)));
        assert_eq!(reply, Ok(format!("Hello, v{}!", i)));
    }
}

// The server logic's sender error must arrive at the client receiver with
// its code and message intact.
#[test]
fn a_deferred_error_status_travels_verbatim() {
    let harness = start_greeting(2, 1);
    let stub = greeting_stub(&harness, FAIL_DEFERRED);

    let status = sync_wait(stub.call(&harness.context, Bytes::new())).unwrap_err();
    assert_eq!(status.code(), RpcStatusCode::NotFound);
    assert_eq!(status.details(), "m");
}

#[test]
fn an_immediate_failure_travels_verbatim() {
    let harness = start_greeting(2, 1);
    let stub = greeting_stub(&harness, FAIL_IMMEDIATE);

    let status = sync_wait(stub.call(&harness.context, Bytes::new())).unwrap_err();
    assert_eq!(status.code(), RpcStatusCode::PermissionDenied);
    assert_eq!(status.details(), "boom");
}

// The response arrives fine on the wire, but the client-side conversion
// functor rejects it; the sender must deliver Internal with the cause.
#[test]
fn a_failing_conversion_becomes_an_internal_error() {
    let harness = start_greeting(2, 1);
    let stub = greeting_stub(&harness, BAD_REPLY);

    let status = sync_wait(stub.call(&harness.context, Bytes::new())).unwrap_err();
    assert_eq!(status.code(), RpcStatusCode::Internal);
    assert!(!status.details().is_empty());
}

#[test]
fn unbound_methods_are_rejected_as_unimplemented() {
    let harness = start_greeting(2, 1);
    let stub = greeting_stub(&harness, 99);

    let status = sync_wait(stub.call(&harness.context, Bytes::new())).unwrap_err();
    assert_eq!(status.code(), RpcStatusCode::Unimplemented);
}

#[test]
fn calls_after_stop_complete_with_unavailable() {
    let harness = start_greeting(2, 1);
    let stub = greeting_stub(&harness, GREET);
    harness.context.stop();

    let status =
        sync_wait(stub.call(&harness.context, envelope::pack_str("late"))).unwrap_err();
    assert_eq!(status.code(), RpcStatusCode::Unavailable);
}

#[test]
fn malformed_requests_fail_with_invalid_argument() {
    let harness = start_greeting(2, 1);
    let stub = greeting_stub(&harness, GREET);

    let status = sync_wait(stub.call(&harness.context, Bytes::from_static(&[1])))
        .unwrap_err();
    assert_eq!(status.code(), RpcStatusCode::InvalidArgument);
}
