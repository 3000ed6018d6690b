// Copyright 2024 tison <wander4096@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::VecDeque;
use std::fmt;
use std::future::poll_fn;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::task::Waker;

use crate::internal::Deferred;
use crate::internal::Mutex;
use crate::internal::WaitList;
use crate::mpmc::RecvError;
use crate::mpmc::SendError;
use crate::mpmc::TryRecvError;
use crate::mpmc::TrySendError;
use crate::policy::Offer;
use crate::policy::OnDiscarded;
use crate::policy::OverflowPolicy;
use crate::policy::offer;

pub(super) fn new<T>(
    capacity: Option<usize>,
    policy: OverflowPolicy,
    on_discarded: Option<OnDiscarded<T>>,
) -> (Sender<T>, Receiver<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            buffer: VecDeque::new(),
            closed: false,
            discarding: false,
            cause: None,
            senders: 1,
            receivers: 1,
            send_waiters: WaitList::new(),
            recv_waiters: WaitList::new(),
        }),
        capacity,
        policy,
        on_discarded,
    });
    let sender = Sender {
        shared: shared.clone(),
    };
    let receiver = Receiver { shared };
    (sender, receiver)
}

struct Shared<T> {
    state: Mutex<State<T>>,
    // `None` for an unlimited channel
    capacity: Option<usize>,
    policy: OverflowPolicy,
    on_discarded: Option<OnDiscarded<T>>,
}

struct State<T> {
    buffer: VecDeque<T>,
    closed: bool,
    // set once undelivered elements must be reported instead of kept
    discarding: bool,
    cause: Option<Arc<str>>,
    senders: usize,
    receivers: usize,
    // parked senders hold the element they are waiting to enqueue
    send_waiters: WaitList<Parked<T>>,
    // parked receivers may be handed an element directly while the buffer is empty
    recv_waiters: WaitList<Parked<T>>,
}

struct Parked<T> {
    value: Option<T>,
    waker: Option<Waker>,
}

impl<T> Parked<T> {
    fn new(value: Option<T>, waker: &Waker) -> Self {
        Self {
            value,
            waker: Some(waker.clone()),
        }
    }

    fn update_waker(&mut self, waker: &Waker) {
        if self.waker.as_ref().is_none_or(|w| !w.will_wake(waker)) {
            self.waker = Some(waker.clone());
        }
    }
}

impl<T> Shared<T> {
    fn no_buffer_lossy(&self) -> bool {
        self.capacity == Some(0) && self.policy.is_lossy()
    }

    fn try_push(
        &self,
        state: &mut State<T>,
        value: T,
        deferred: &mut Deferred<T>,
    ) -> Result<(), TrySendError<T>> {
        if state.closed {
            return Err(TrySendError::Closed(value));
        }

        // a parked receiver implies an empty buffer; hand the element over directly
        if !self.no_buffer_lossy() && state.buffer.is_empty() {
            if let Some(key) = state.recv_waiters.pop_front() {
                let parked = state.recv_waiters.get_mut(key);
                parked.value = Some(value);
                deferred.wakers.extend(parked.waker.take());
                return Ok(());
            }
        }

        // keep FIFO order behind senders that are already waiting
        if !state.send_waiters.is_empty() {
            return Err(TrySendError::Full(value));
        }

        let limit = self.capacity.unwrap_or(usize::MAX);
        match offer(&mut state.buffer, limit, self.policy, value) {
            Offer::Stored { evicted } => {
                deferred.discarded.extend(evicted);
                Ok(())
            }
            Offer::Rejected(value) => {
                deferred.discarded.push(value);
                Ok(())
            }
            Offer::Full(value) => Err(TrySendError::Full(value)),
        }
    }

    fn try_pop(&self, state: &mut State<T>, deferred: &mut Deferred<T>) -> Option<T> {
        if let Some(value) = state.buffer.pop_front() {
            // a slot is free now; move the first parked sender's element in
            if let Some(key) = state.send_waiters.pop_front() {
                let parked = state.send_waiters.get_mut(key);
                state.buffer.extend(parked.value.take());
                deferred.wakers.extend(parked.waker.take());
            }
            return Some(value);
        }

        // rendezvous: take straight from a parked sender
        let key = state.send_waiters.pop_front()?;
        let parked = state.send_waiters.get_mut(key);
        deferred.wakers.extend(parked.waker.take());
        parked.value.take()
    }

    /// Returns an element handed to a receiver that gave up before taking it.
    fn redeliver(&self, state: &mut State<T>, value: T, deferred: &mut Deferred<T>) {
        if state.discarding {
            deferred.discarded.push(value);
        } else if let Some(key) = state.recv_waiters.pop_front() {
            let parked = state.recv_waiters.get_mut(key);
            parked.value = Some(value);
            deferred.wakers.extend(parked.waker.take());
        } else {
            // it was the oldest element, so it goes back to the front
            state.buffer.push_front(value);
        }
    }

    fn close(&self, cause: Option<Arc<str>>, discard: bool) -> bool {
        let mut deferred = Deferred::new();
        let newly_closed = {
            let mut state = self.state.lock();
            let newly_closed = !state.closed;
            if newly_closed {
                state.closed = true;
                state.cause = cause;
                state
                    .recv_waiters
                    .drain_with(|p| deferred.wakers.extend(p.waker.take()));
                state
                    .send_waiters
                    .drain_with(|p| deferred.wakers.extend(p.waker.take()));
            }
            if discard && !state.discarding {
                state.discarding = true;
                deferred.discarded.extend(state.buffer.drain(..));
            }
            newly_closed
        };
        if newly_closed {
            tracing::trace!(discard, "channel closed");
        }
        deferred.run(self.on_discarded.as_ref());
        newly_closed
    }

    fn len(&self) -> usize {
        self.state.lock().buffer.len()
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

/// Sends elements into the channel.
///
/// Instances are created by [`channel`](super::channel) and [`bounded`](super::bounded). The
/// channel closes once every `Sender` is dropped.
pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender").finish_non_exhaustive()
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.shared.state.lock().senders += 1;
        Sender {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        let last = {
            let mut state = self.shared.state.lock();
            state.senders -= 1;
            state.senders == 0
        };
        if last {
            self.shared.close(None, false);
        }
    }
}

impl<T> Sender<T> {
    /// Sends an element, waiting for buffer space if the policy is
    /// [`Block`](OverflowPolicy::Block).
    ///
    /// Under a drop policy this never waits and succeeds as long as the channel is open, even if
    /// the element (or an older one) ends up discarded.
    ///
    /// If the channel is closed, or gets closed while this call waits, the element is returned
    /// inside the error.
    ///
    /// # Cancel safety
    ///
    /// If the future is dropped while waiting, the element was not sent and is dropped with it.
    pub async fn send(&self, value: T) -> Result<(), SendError<T>> {
        struct SendState<'a, T> {
            shared: &'a Shared<T>,
            value: Option<T>,
            key: Option<usize>,
        }

        impl<T> Drop for SendState<'_, T> {
            fn drop(&mut self) {
                if let Some(key) = self.key.take() {
                    drop(self.shared.state.lock().send_waiters.release(key));
                }
            }
        }

        impl<T> SendState<'_, T> {
            fn poll_send(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), SendError<T>>> {
                let mut deferred = Deferred::new();
                let poll = {
                    let mut state = self.shared.state.lock();
                    match self.key {
                        Some(key) if state.send_waiters.is_linked(key) => {
                            state.send_waiters.get_mut(key).update_waker(cx.waker());
                            Poll::Pending
                        }
                        Some(key) => {
                            self.key = None;
                            match state.send_waiters.release(key).value {
                                // taken by a receiver or moved into the buffer
                                None => Poll::Ready(Ok(())),
                                // released by close
                                Some(value) => {
                                    Poll::Ready(Err(SendError::new(value, state.cause.clone())))
                                }
                            }
                        }
                        None => match self.value.take() {
                            None => Poll::Ready(Ok(())),
                            Some(value) => {
                                match self.shared.try_push(&mut state, value, &mut deferred) {
                                    Ok(()) => Poll::Ready(Ok(())),
                                    Err(TrySendError::Closed(value)) => Poll::Ready(Err(
                                        SendError::new(value, state.cause.clone()),
                                    )),
                                    Err(TrySendError::Full(value)) => {
                                        let parked = Parked::new(Some(value), cx.waker());
                                        self.key = Some(state.send_waiters.push_back(parked));
                                        Poll::Pending
                                    }
                                }
                            }
                        },
                    }
                };
                deferred.run(self.shared.on_discarded.as_ref());
                poll
            }
        }

        let mut send = SendState {
            shared: &self.shared,
            value: Some(value),
            key: None,
        };
        poll_fn(|cx| send.poll_send(cx)).await
    }

    /// Attempts to send an element without waiting.
    ///
    /// Returns [`TrySendError::Full`] if the buffer is full under
    /// [`Block`](OverflowPolicy::Block), and [`TrySendError::Closed`] if the channel is closed.
    /// On a rendezvous channel this succeeds only if a receiver is already waiting.
    ///
    /// # Examples
    ///
    /// ```
    /// use coalesce::mpmc;
    /// use coalesce::mpmc::TrySendError;
    ///
    /// let (tx, rx) = mpmc::bounded::<i32>(1);
    /// tx.try_send(1).unwrap();
    /// assert_eq!(tx.try_send(2), Err(TrySendError::Full(2)));
    ///
    /// drop(rx);
    /// assert_eq!(tx.try_send(3), Err(TrySendError::Closed(3)));
    /// ```
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let mut deferred = Deferred::new();
        let result = {
            let mut state = self.shared.state.lock();
            self.shared.try_push(&mut state, value, &mut deferred)
        };
        deferred.run(self.shared.on_discarded.as_ref());
        result
    }

    /// Closes the channel. Receivers drain what is buffered, then observe [`RecvError`].
    ///
    /// Senders waiting for space get their element back in a [`SendError`]. Returns `false` if
    /// the channel was already closed.
    pub fn close(&self) -> bool {
        self.shared.close(None, false)
    }

    /// Closes the channel like [`close`](Sender::close), recording `cause` in the errors
    /// observed by both sides.
    pub fn close_with(&self, cause: impl Into<Arc<str>>) -> bool {
        self.shared.close(Some(cause.into()), false)
    }

    /// Returns `true` if the channel is closed.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Returns the number of buffered elements.
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    /// Returns `true` if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the buffer capacity, or `None` for an unlimited channel.
    pub fn capacity(&self) -> Option<usize> {
        self.shared.capacity()
    }

    /// Returns the overflow policy of the channel.
    pub fn policy(&self) -> OverflowPolicy {
        self.shared.policy
    }
}

/// Receives elements from the channel.
///
/// Instances are created by [`channel`](super::channel) and [`bounded`](super::bounded).
/// Cloned receivers compete for elements; each element goes to exactly one of them. The channel
/// is cancelled once every `Receiver` is dropped.
pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver").finish_non_exhaustive()
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        self.shared.state.lock().receivers += 1;
        Receiver {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        let last = {
            let mut state = self.shared.state.lock();
            state.receivers -= 1;
            state.receivers == 0
        };
        if last {
            self.shared.close(None, true);
        }
    }
}

impl<T> Receiver<T> {
    /// Receives the next element, waiting until one is available.
    ///
    /// Returns [`RecvError`] once the channel is closed and everything buffered before the close
    /// has been received.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. An element handed to a receiver that is dropped before
    /// completing goes to the next waiting receiver, or back to the front of the buffer.
    ///
    /// # Examples
    ///
    /// ```
    /// # #[tokio::main]
    /// # async fn main() {
    /// use coalesce::mpmc;
    ///
    /// let (tx, rx) = mpmc::bounded(0);
    ///
    /// tokio::spawn(async move {
    ///     tx.send("hello").await.unwrap();
    /// });
    ///
    /// assert_eq!(rx.recv().await, Ok("hello"));
    /// assert!(rx.recv().await.is_err());
    /// # }
    /// ```
    pub async fn recv(&self) -> Result<T, RecvError> {
        struct RecvState<'a, T> {
            shared: &'a Shared<T>,
            key: Option<usize>,
        }

        impl<T> Drop for RecvState<'_, T> {
            fn drop(&mut self) {
                if let Some(key) = self.key.take() {
                    let mut deferred = Deferred::new();
                    {
                        let mut state = self.shared.state.lock();
                        if let Some(value) = state.recv_waiters.release(key).value {
                            self.shared.redeliver(&mut state, value, &mut deferred);
                        }
                    }
                    deferred.run(self.shared.on_discarded.as_ref());
                }
            }
        }

        impl<T> RecvState<'_, T> {
            fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Result<T, RecvError>> {
                let mut deferred = Deferred::new();
                let poll = {
                    let mut state = self.shared.state.lock();
                    self.poll_locked(&mut state, cx, &mut deferred)
                };
                deferred.run(self.shared.on_discarded.as_ref());
                poll
            }

            fn poll_locked(
                &mut self,
                state: &mut State<T>,
                cx: &mut Context<'_>,
                deferred: &mut Deferred<T>,
            ) -> Poll<Result<T, RecvError>> {
                if let Some(key) = self.key {
                    if state.recv_waiters.is_linked(key) {
                        state.recv_waiters.get_mut(key).update_waker(cx.waker());
                        return Poll::Pending;
                    }
                    self.key = None;
                    if let Some(value) = state.recv_waiters.release(key).value {
                        return Poll::Ready(Ok(value));
                    }
                }

                match self.shared.try_pop(state, deferred) {
                    Some(value) => Poll::Ready(Ok(value)),
                    None if state.closed => Poll::Ready(Err(RecvError::new(state.cause.clone()))),
                    None => {
                        self.key = Some(state.recv_waiters.push_back(Parked::new(None, cx.waker())));
                        Poll::Pending
                    }
                }
            }
        }

        let mut recv = RecvState {
            shared: &self.shared,
            key: None,
        };
        poll_fn(|cx| recv.poll_recv(cx)).await
    }

    /// Attempts to receive an element without waiting.
    ///
    /// # Examples
    ///
    /// ```
    /// use coalesce::mpmc;
    /// use coalesce::mpmc::TryRecvError;
    ///
    /// let (tx, rx) = mpmc::bounded(2);
    /// tx.try_send("hello").unwrap();
    /// assert_eq!(rx.try_recv(), Ok("hello"));
    /// assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    ///
    /// drop(tx);
    /// assert!(matches!(rx.try_recv(), Err(TryRecvError::Closed(_))));
    /// ```
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let mut deferred = Deferred::new();
        let result = {
            let mut state = self.shared.state.lock();
            match self.shared.try_pop(&mut state, &mut deferred) {
                Some(value) => Ok(value),
                None if state.closed => Err(RecvError::new(state.cause.clone()).into()),
                None => Err(TryRecvError::Empty),
            }
        };
        deferred.run(self.shared.on_discarded.as_ref());
        result
    }

    /// Closes the channel and discards everything still buffered, reporting each element to the
    /// `on_discarded` callback. Returns `false` if the channel was already closed, though any
    /// elements left over from a graceful close are still discarded.
    pub fn cancel(&self) -> bool {
        self.shared.close(None, true)
    }

    /// Cancels the channel like [`cancel`](Receiver::cancel), recording `cause` in the errors
    /// observed by both sides.
    pub fn cancel_with(&self, cause: impl Into<Arc<str>>) -> bool {
        self.shared.close(Some(cause.into()), true)
    }

    /// Returns `true` if the channel is closed.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Returns the number of buffered elements.
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    /// Returns `true` if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
