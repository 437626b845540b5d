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

//! The sender/receiver computation model. A sender is a lazy description of
//! an asynchronous computation; connecting it to a receiver yields an
//! operation that, once started, delivers exactly one of `set_value`,
//! `set_error`, or `set_stopped` to the receiver.
//!
//! The concept set is:
//!
//! ```text
//! schedule(scheduler)        -> sender
//! connect(sender, receiver)  -> operation
//! start(operation)           -> ()
//! set_value(receiver, v)     set_error(receiver, status)     set_stopped(receiver)
//! ```
//!
//! Everything here moves by value: starting an operation either completes it
//! inline or moves the receiver into a queue, so no operation ever needs a
//! stable address.

use std::marker::PhantomData;
use std::sync::{Arc, Condvar, Mutex};

use super::status::{RpcStatus, RpcStatusCode};

/// The downstream endpoint of an asynchronous computation. Each of the three
/// completion functions consumes the receiver; exactly one of them is called
/// over the lifetime of a connected operation.
pub trait Receiver: Send + 'static {
    /// The type delivered on the value channel.
    type Input: Send + 'static;

    /// Delivers the result of the computation.
    fn set_value(self, value: Self::Input);

    /// Delivers the error terminating the computation.
    fn set_error(self, status: RpcStatus);

    /// Signals that the computation was stopped without producing a result.
    fn set_stopped(self);
}

/// A lazy description of an asynchronous computation producing one value of
/// type `Output` or one `RpcStatus` error.
pub trait Sender: Send + 'static {
    /// The type delivered on the value channel.
    type Output: Send + 'static;

    /// Drives the computation to completion against `receiver`. Callers
    /// normally go through `connect`/`start` rather than calling this
    /// directly.
    fn submit<R>(self, receiver: R)
    where
        R: Receiver<Input = Self::Output>;
}

/// The started or startable form of a sender-plus-receiver pair.
pub trait Operation {
    /// Starts the computation. Consumes the operation; the receiver will
    /// observe exactly one completion.
    fn start(self);
}

/// A connected sender-plus-receiver pair, waiting to be started.
pub struct Connected<S, R> {
    sender: S,
    receiver: R,
}

/// Connects `sender` to `receiver`, producing an operation that can be
/// started later.
pub fn connect<S, R>(sender: S, receiver: R) -> Connected<S, R>
where
    S: Sender,
    R: Receiver<Input = S::Output>,
{
    Connected {
        sender: sender,
        receiver: receiver,
    }
}

impl<S, R> Operation for Connected<S, R>
where
    S: Sender,
    R: Receiver<Input = S::Output>,
{
    fn start(self) {
        self.sender.submit(self.receiver);
    }
}

// ------------------------------------------------------------------- just

/// A sender that immediately delivers an ordinary value.
pub struct Just<T> {
    value: T,
}

/// Lifts `value` into a sender that delivers it on start.
pub fn just<T: Send + 'static>(value: T) -> Just<T> {
    Just { value: value }
}

impl<T: Send + 'static> Sender for Just<T> {
    type Output = T;

    fn submit<R>(self, receiver: R)
    where
        R: Receiver<Input = T>,
    {
        receiver.set_value(self.value);
    }
}

/// A sender that immediately delivers an error.
pub struct JustError<T> {
    status: RpcStatus,
    _marker: PhantomData<fn() -> T>,
}

/// Lifts `status` into a sender of `T` that delivers `set_error` on start.
pub fn just_error<T: Send + 'static>(status: RpcStatus) -> JustError<T> {
    JustError {
        status: status,
        _marker: PhantomData,
    }
}

impl<T: Send + 'static> Sender for JustError<T> {
    type Output = T;

    fn submit<R>(self, receiver: R)
    where
        R: Receiver<Input = T>,
    {
        receiver.set_error(self.status);
    }
}

// ------------------------------------------------------------------- then

/// The sender returned by `SenderExt::then`; applies a function to the
/// upstream value.
pub struct Then<S, F> {
    sender: S,
    function: F,
}

struct ThenReceiver<R, F, I> {
    receiver: R,
    function: F,
    _marker: PhantomData<fn(I)>,
}

impl<R, F, I> Receiver for ThenReceiver<R, F, I>
where
    R: Receiver,
    F: FnOnce(I) -> R::Input + Send + 'static,
    I: Send + 'static,
{
    type Input = I;

    fn set_value(self, value: I) {
        self.receiver.set_value((self.function)(value));
    }

    fn set_error(self, status: RpcStatus) {
        self.receiver.set_error(status);
    }

    fn set_stopped(self) {
        self.receiver.set_stopped();
    }
}

impl<S, F, U> Sender for Then<S, F>
where
    S: Sender,
    F: FnOnce(S::Output) -> U + Send + 'static,
    U: Send + 'static,
{
    type Output = U;

    fn submit<R>(self, receiver: R)
    where
        R: Receiver<Input = U>,
    {
        self.sender.submit(ThenReceiver {
            receiver: receiver,
            function: self.function,
            _marker: PhantomData,
        });
    }
}

// -------------------------------------------------------------- let_value

/// The sender returned by `SenderExt::let_value`; feeds the upstream value
/// into a function producing the next sender in the chain.
pub struct LetValue<S, F> {
    sender: S,
    function: F,
}

struct LetValueReceiver<R, F, I, S2> {
    receiver: R,
    function: F,
    _marker: PhantomData<fn(I) -> S2>,
}

impl<R, F, I, S2> Receiver for LetValueReceiver<R, F, I, S2>
where
    S2: Sender,
    R: Receiver<Input = S2::Output>,
    F: FnOnce(I) -> S2 + Send + 'static,
    I: Send + 'static,
{
    type Input = I;

    fn set_value(self, value: I) {
        (self.function)(value).submit(self.receiver);
    }

    fn set_error(self, status: RpcStatus) {
        self.receiver.set_error(status);
    }

    fn set_stopped(self) {
        self.receiver.set_stopped();
    }
}

impl<S, F, S2> Sender for LetValue<S, F>
where
    S: Sender,
    S2: Sender,
    F: FnOnce(S::Output) -> S2 + Send + 'static,
{
    type Output = S2::Output;

    fn submit<R>(self, receiver: R)
    where
        R: Receiver<Input = S2::Output>,
    {
        self.sender.submit(LetValueReceiver {
            receiver: receiver,
            function: self.function,
            _marker: PhantomData,
        });
    }
}

// ------------------------------------------------------------- upon_error

/// The sender returned by `SenderExt::upon_error`; maps an upstream error
/// into a value, leaving successful completions untouched.
pub struct UponError<S, F> {
    sender: S,
    function: F,
}

struct UponErrorReceiver<R, F> {
    receiver: R,
    function: F,
}

impl<R, F> Receiver for UponErrorReceiver<R, F>
where
    R: Receiver,
    F: FnOnce(RpcStatus) -> R::Input + Send + 'static,
{
    type Input = R::Input;

    fn set_value(self, value: R::Input) {
        self.receiver.set_value(value);
    }

    fn set_error(self, status: RpcStatus) {
        self.receiver.set_value((self.function)(status));
    }

    fn set_stopped(self) {
        self.receiver.set_stopped();
    }
}

impl<S, F> Sender for UponError<S, F>
where
    S: Sender,
    F: FnOnce(RpcStatus) -> S::Output + Send + 'static,
{
    type Output = S::Output;

    fn submit<R>(self, receiver: R)
    where
        R: Receiver<Input = S::Output>,
    {
        self.sender.submit(UponErrorReceiver {
            receiver: receiver,
            function: self.function,
        });
    }
}

// -------------------------------------------------------------- SenderExt

/// Chaining adaptors available on every sender.
pub trait SenderExt: Sender + Sized {
    /// Applies `function` to the value this sender produces.
    fn then<F, U>(self, function: F) -> Then<Self, F>
    where
        F: FnOnce(Self::Output) -> U + Send + 'static,
        U: Send + 'static,
    {
        Then {
            sender: self,
            function: function,
        }
    }

    /// Feeds the value this sender produces into `function`, continuing with
    /// the sender it returns.
    fn let_value<F, S2>(self, function: F) -> LetValue<Self, F>
    where
        F: FnOnce(Self::Output) -> S2 + Send + 'static,
        S2: Sender,
    {
        LetValue {
            sender: self,
            function: function,
        }
    }

    /// Maps an error from this sender into a value, so the chain below
    /// always completes through the value channel.
    fn upon_error<F>(self, function: F) -> UponError<Self, F>
    where
        F: FnOnce(RpcStatus) -> Self::Output + Send + 'static,
    {
        UponError {
            sender: self,
            function: function,
        }
    }
}

impl<S: Sender> SenderExt for S {}

// -------------------------------------------------------------- AnySender

// Object-safe mirror of `Receiver`, used behind the erasure boundary.
trait AnyReceiver<T>: Send {
    fn set_value(self: Box<Self>, value: T);
    fn set_error(self: Box<Self>, status: RpcStatus);
    fn set_stopped(self: Box<Self>);
}

struct ReceiverBox<R>(R);

impl<R: Receiver> AnyReceiver<R::Input> for ReceiverBox<R> {
    fn set_value(self: Box<Self>, value: R::Input) {
        self.0.set_value(value);
    }

    fn set_error(self: Box<Self>, status: RpcStatus) {
        self.0.set_error(status);
    }

    fn set_stopped(self: Box<Self>) {
        self.0.set_stopped();
    }
}

struct ErasedTarget<T> {
    inner: Box<dyn AnyReceiver<T>>,
}

impl<T: Send + 'static> Receiver for ErasedTarget<T> {
    type Input = T;

    fn set_value(self, value: T) {
        self.inner.set_value(value);
    }

    fn set_error(self, status: RpcStatus) {
        self.inner.set_error(status);
    }

    fn set_stopped(self) {
        self.inner.set_stopped();
    }
}

/// A boxed, type-erased sender of `T`. Erasure costs one allocation at
/// construction and one at connect time; everything else stays statically
/// dispatched.
pub struct AnySender<T> {
    submit_fn: Box<dyn FnOnce(Box<dyn AnyReceiver<T>>) + Send>,
}

impl<T: Send + 'static> AnySender<T> {
    /// Erases `sender` down to its output type.
    pub fn new<S>(sender: S) -> AnySender<T>
    where
        S: Sender<Output = T>,
    {
        AnySender {
            submit_fn: Box::new(move |inner| sender.submit(ErasedTarget { inner: inner })),
        }
    }
}

impl<T: Send + 'static> Sender for AnySender<T> {
    type Output = T;

    fn submit<R>(self, receiver: R)
    where
        R: Receiver<Input = T>,
    {
        (self.submit_fn)(Box::new(ReceiverBox(receiver)));
    }
}

// -------------------------------------------------------------- sync_wait

struct SyncWaitCell<T> {
    slot: Mutex<Option<Result<T, RpcStatus>>>,
    cond: Condvar,
}

struct SyncWaitReceiver<T> {
    cell: Arc<SyncWaitCell<T>>,
}

impl<T> SyncWaitReceiver<T> {
    fn deliver(self, result: Result<T, RpcStatus>) {
        let mut slot = self.cell.slot.lock().unwrap();
        *slot = Some(result);
        self.cell.cond.notify_one();
    }
}

impl<T: Send + 'static> Receiver for SyncWaitReceiver<T> {
    type Input = T;

    fn set_value(self, value: T) {
        self.deliver(Ok(value));
    }

    fn set_error(self, status: RpcStatus) {
        self.deliver(Err(status));
    }

    fn set_stopped(self) {
        self.deliver(Err(RpcStatus::with_details(
            RpcStatusCode::Cancelled,
            "computation was stopped",
        )));
    }
}

/// Starts `sender` and blocks the calling thread until it completes.
///
/// # Return
///
/// The delivered value, or the delivered error. A stopped completion is
/// reported as a `Cancelled` error.
pub fn sync_wait<S: Sender>(sender: S) -> Result<S::Output, RpcStatus> {
    let cell = Arc::new(SyncWaitCell {
        slot: Mutex::new(None),
        cond: Condvar::new(),
    });

    connect(sender, SyncWaitReceiver { cell: cell.clone() }).start();

    let mut slot = cell.slot.lock().unwrap();
    loop {
        match slot.take() {
            Some(result) => return result,
            None => slot = cell.cond.wait(slot).unwrap(),
        }
    }
}

// --------------------------------------------------------- start_detached

struct DetachedReceiver<T> {
    _marker: PhantomData<fn(T)>,
}

impl<T: Send + 'static> Receiver for DetachedReceiver<T> {
    type Input = T;

    // Detached chains are expected to consume their own errors with
    // `upon_error` before being started; completions here are discarded.
    fn set_value(self, _value: T) {}

    fn set_error(self, _status: RpcStatus) {}

    fn set_stopped(self) {}
}

/// Starts `sender` and walks away. The chain keeps itself alive through
/// whatever queues it moves across.
pub fn start_detached<S: Sender>(sender: S) {
    connect(
        sender,
        DetachedReceiver {
            _marker: PhantomData,
        },
    )
    .start();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // A receiver that counts completions, for checking the one-completion
    // contract.
    struct CountingReceiver {
        completions: Arc<AtomicUsize>,
    }

    impl Receiver for CountingReceiver {
        type Input = i32;

        fn set_value(self, _value: i32) {
            self.completions.fetch_add(1, Ordering::SeqCst);
        }

        fn set_error(self, _status: RpcStatus) {
            self.completions.fetch_add(1, Ordering::SeqCst);
        }

        fn set_stopped(self) {
            self.completions.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn just_delivers_the_value() {
        assert_eq!(sync_wait(just(42)), Ok(42));
    }

    #[test]
    fn then_transforms_the_value() {
        let sender = just(41).then(|v| v + 1);
        assert_eq!(sync_wait(sender), Ok(42));
    }

    #[test]
    fn then_chains_compose() {
        let sender = just(1).then(|v| v + 1).then(|v| v * 21);
        assert_eq!(sync_wait(sender), Ok(42));
    }

    #[test]
    fn let_value_continues_with_the_returned_sender() {
        let sender = just(6).let_value(|v| just(v * 7));
        assert_eq!(sync_wait(sender), Ok(42));
    }

    #[test]
    fn errors_skip_then_and_reach_the_receiver() {
        let status = RpcStatus::with_details(RpcStatusCode::NotFound, "m");
        let sender = just_error::<i32>(status.clone()).then(|v| v + 1);
        assert_eq!(sync_wait(sender), Err(status));
    }

    #[test]
    fn upon_error_maps_errors_into_values() {
        let sender = just_error::<i32>(RpcStatus::new(RpcStatusCode::Internal))
            .upon_error(|status| status.code().to_wire());
        assert_eq!(sync_wait(sender), Ok(13));
    }

    #[test]
    fn upon_error_passes_values_through() {
        let sender = just(7).upon_error(|_| -1);
        assert_eq!(sync_wait(sender), Ok(7));
    }

    #[test]
    fn any_sender_preserves_both_channels() {
        let erased = AnySender::new(just(5).then(|v| v * 2));
        assert_eq!(sync_wait(erased), Ok(10));

        let status = RpcStatus::new(RpcStatusCode::Aborted);
        let erased = AnySender::new(just_error::<i32>(status.clone()));
        assert_eq!(sync_wait(erased), Err(status));
    }

    #[test]
    fn connected_operation_completes_exactly_once() {
        let completions = Arc::new(AtomicUsize::new(0));
        let receiver = CountingReceiver {
            completions: completions.clone(),
        };
        connect(just(1).then(|v| v + 1), receiver).start();
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }
}
