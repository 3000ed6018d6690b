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

use slab::Slab;

use crate::broadcast::RecvError;
use crate::broadcast::SendError;
use crate::broadcast::TryRecvError;
use crate::broadcast::TrySendError;
use crate::internal::Deferred;
use crate::internal::Mutex;
use crate::internal::WaitList;
use crate::policy::OnDiscarded;
use crate::policy::OverflowPolicy;

pub(super) fn new<T: Clone>(
    replay: usize,
    capacity: usize,
    policy: OverflowPolicy,
    on_discarded: Option<OnDiscarded<T>>,
) -> Publisher<T> {
    let shared = Arc::new(Shared {
        state: Mutex::new(State {
            buffer: VecDeque::new(),
            head: 0,
            closed: false,
            cause: None,
            publishers: 1,
            cursors: Slab::new(),
            publish_waiters: WaitList::new(),
            delivery_waiters: WaitList::new(),
        }),
        replay,
        capacity: capacity as u64,
        policy,
        on_discarded,
    });
    Publisher { shared }
}

struct Shared<T> {
    state: Mutex<State<T>>,
    replay: usize,
    capacity: u64,
    policy: OverflowPolicy,
    on_discarded: Option<OnDiscarded<T>>,
}

struct State<T> {
    // holds elements with sequence numbers `head..tail()`
    buffer: VecDeque<Entry<T>>,
    head: u64,
    closed: bool,
    cause: Option<Arc<str>>,
    publishers: usize,
    cursors: Slab<Cursor>,
    // publishers waiting for room; the element stays here until it is admitted
    publish_waiters: WaitList<Parked<T>>,
    // rendezvous publishers whose element is admitted but not yet received by everyone
    delivery_waiters: WaitList<Option<Waker>>,
}

struct Entry<T> {
    value: T,
    delivered: bool,
}

struct Cursor {
    // sequence number of the next element this subscriber receives
    next: u64,
    waker: Option<Waker>,
}

struct Parked<T> {
    value: Option<T>,
    // sequence number assigned on admission
    seq: u64,
    waker: Option<Waker>,
}

fn update_waker(slot: &mut Option<Waker>, waker: &Waker) {
    if slot.as_ref().is_none_or(|w| !w.will_wake(waker)) {
        *slot = Some(waker.clone());
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let mut deferred = Deferred::new();
        deferred.discarded.extend(
            state
                .buffer
                .drain(..)
                .filter(|entry| !entry.delivered)
                .map(|entry| entry.value),
        );
        deferred.run(self.on_discarded.as_ref());
    }
}

impl<T> State<T> {
    fn tail(&self) -> u64 {
        self.head + self.buffer.len() as u64
    }

    fn slowest(&self) -> Option<u64> {
        self.cursors.iter().map(|(_, c)| c.next).min()
    }

    /// Returns `true` if the slowest subscriber is `room` or more elements behind.
    fn is_full(&self, room: u64) -> bool {
        self.slowest()
            .is_some_and(|slowest| self.tail() - slowest >= room)
    }

    fn push(&mut self, value: T, deferred: &mut Deferred<T>) {
        self.buffer.push_back(Entry {
            value,
            delivered: false,
        });
        self.wake_subscribers(deferred);
    }

    /// Drops elements that every subscriber has passed, keeping the replay window.
    fn trim(&mut self, replay: usize, deferred: &mut Deferred<T>) {
        let slowest = self.slowest();
        while self.buffer.len() > replay && slowest.is_none_or(|s| self.head < s) {
            let Some(entry) = self.buffer.pop_front() else {
                break;
            };
            self.head += 1;
            if !entry.delivered {
                deferred.discarded.push(entry.value);
            }
        }
    }

    fn wake_subscribers(&mut self, deferred: &mut Deferred<T>) {
        for (_, cursor) in self.cursors.iter_mut() {
            deferred.wakers.extend(cursor.waker.take());
        }
    }

    fn wake_delivery_waiters(&mut self, deferred: &mut Deferred<T>) {
        self.delivery_waiters
            .drain_with(|waker| deferred.wakers.extend(waker.take()));
    }
}

impl<T> Shared<T> {
    /// Moves the elements of waiting publishers into the buffer, in arrival order, while the
    /// slowest subscriber leaves room for them.
    ///
    /// A rendezvous channel has no room of its own. A subscriber asking for an element (`pull`)
    /// lends it a single slot once every subscriber has caught up.
    fn admit(&self, state: &mut State<T>, pull: bool, deferred: &mut Deferred<T>) {
        let room = if pull {
            self.capacity.max(1)
        } else {
            self.capacity
        };
        while state.publish_waiters.front().is_some() && !state.is_full(room) {
            let Some(key) = state.publish_waiters.pop_front() else {
                break;
            };
            let seq = state.tail();
            let parked = state.publish_waiters.get_mut(key);
            parked.seq = seq;
            deferred.wakers.extend(parked.waker.take());
            let value = parked.value.take();
            if let Some(value) = value {
                state.push(value, deferred);
            }
        }
    }

    /// Lets waiting publishers make progress after a subscriber advanced or left.
    fn release_publishers(&self, state: &mut State<T>, deferred: &mut Deferred<T>) {
        self.admit(state, false, deferred);
        state.trim(self.replay, deferred);
        state.wake_delivery_waiters(deferred);
        if self.capacity == 0 && !state.publish_waiters.is_empty() {
            // caught-up subscribers pull the next rendezvous element themselves
            state.wake_subscribers(deferred);
        }
    }

    fn close(&self, cause: Option<Arc<str>>) -> bool {
        let mut deferred = Deferred::new();
        let newly_closed = {
            let mut state = self.state.lock();
            let newly_closed = !state.closed;
            if newly_closed {
                state.closed = true;
                state.cause = cause;
                state.wake_subscribers(&mut deferred);
                state
                    .publish_waiters
                    .drain_with(|p| deferred.wakers.extend(p.waker.take()));
                state.wake_delivery_waiters(&mut deferred);
            }
            newly_closed
        };
        if newly_closed {
            tracing::trace!("broadcast channel closed");
        }
        deferred.run(self.on_discarded.as_ref());
        newly_closed
    }
}

impl<T: Clone> Shared<T> {
    /// Publishes `value` if the policy allows it without waiting.
    ///
    /// Under [`OverflowPolicy::Block`], a full buffer or publishers already waiting ahead hand
    /// the element back as [`TrySendError::Full`].
    fn try_publish(
        &self,
        state: &mut State<T>,
        value: T,
        deferred: &mut Deferred<T>,
    ) -> Result<(), TrySendError<T>> {
        if state.closed {
            return Err(TrySendError::Closed(value));
        }

        let full = state.is_full(self.capacity);
        match self.policy {
            OverflowPolicy::Block if full || !state.publish_waiters.is_empty() => {
                return Err(TrySendError::Full(value));
            }
            OverflowPolicy::DropNewest if full => {
                deferred.discarded.push(value);
                return Ok(());
            }
            OverflowPolicy::DropOldest if full => {
                // capacity > 0 is checked at construction
                let floor = state.tail() + 1 - self.capacity;
                for (_, cursor) in state.cursors.iter_mut() {
                    cursor.next = cursor.next.max(floor);
                }
            }
            _ => {}
        }

        state.push(value, deferred);
        state.trim(self.replay, deferred);
        Ok(())
    }

    fn poll_recv(
        &self,
        id: usize,
        cx: Option<&mut Context<'_>>,
    ) -> Poll<Result<T, RecvError>> {
        let mut deferred = Deferred::new();
        let poll = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let next = state.cursors[id].next.max(state.head);
            state.cursors[id].next = next;
            if self.capacity == 0 && next >= state.tail() {
                self.admit(state, true, &mut deferred);
            }

            let head = state.head;
            let cursor = &mut state.cursors[id];
            if cursor.next < head + state.buffer.len() as u64 {
                let index = (cursor.next - head) as usize;
                cursor.next += 1;
                let entry = &mut state.buffer[index];
                entry.delivered = true;
                let value = entry.value.clone();
                self.release_publishers(state, &mut deferred);
                Poll::Ready(Ok(value))
            } else if state.closed {
                Poll::Ready(Err(RecvError::new(state.cause.clone())))
            } else {
                if let Some(cx) = cx {
                    update_waker(&mut cursor.waker, cx.waker());
                }
                Poll::Pending
            }
        };
        deferred.run(self.on_discarded.as_ref());
        poll
    }
}

/// Publishes elements to every [`Subscriber`].
///
/// Instances are created by [`channel`](super::channel). The channel closes once every
/// `Publisher` is dropped.
pub struct Publisher<T> {
    shared: Arc<Shared<T>>,
}

impl<T> fmt::Debug for Publisher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher").finish_non_exhaustive()
    }
}

impl<T> Clone for Publisher<T> {
    fn clone(&self) -> Self {
        self.shared.state.lock().publishers += 1;
        Publisher {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Drop for Publisher<T> {
    fn drop(&mut self) {
        let last = {
            let mut state = self.shared.state.lock();
            state.publishers -= 1;
            state.publishers == 0
        };
        if last {
            self.shared.close(None);
        }
    }
}

impl<T: Clone> Publisher<T> {
    /// Publishes an element to every current subscriber.
    ///
    /// Under [`Block`](OverflowPolicy::Block) this waits until the slowest subscriber leaves room
    /// for the element, and only then makes it visible. On a channel without a buffer, the
    /// element is handed over once every subscriber has caught up, and the call completes when
    /// all of them have received it.
    ///
    /// Returns the element back if the channel is closed before it was published.
    ///
    /// # Cancel safety
    ///
    /// If the future is dropped while waiting for room, the element was not published and is
    /// dropped with it.
    pub async fn send(&self, value: T) -> Result<(), SendError<T>> {
        struct SendState<'a, T> {
            shared: &'a Shared<T>,
            value: Option<T>,
            key: Option<usize>,
            // rendezvous only: admitted under this sequence number, awaiting every subscriber
            handed_off: Option<u64>,
            delivery_key: Option<usize>,
        }

        impl<T> Drop for SendState<'_, T> {
            fn drop(&mut self) {
                if self.key.is_none() && self.delivery_key.is_none() {
                    return;
                }
                let parked = {
                    let mut state = self.shared.state.lock();
                    if let Some(key) = self.delivery_key.take() {
                        state.delivery_waiters.release(key);
                    }
                    self.key.take().map(|key| state.publish_waiters.release(key))
                };
                drop(parked);
            }
        }

        impl<T: Clone> SendState<'_, T> {
            fn poll_send(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), SendError<T>>> {
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
            ) -> Poll<Result<(), SendError<T>>> {
                if let Some(key) = self.key {
                    if state.publish_waiters.is_linked(key) {
                        update_waker(&mut state.publish_waiters.get_mut(key).waker, cx.waker());
                        return Poll::Pending;
                    }
                    self.key = None;
                    let parked = state.publish_waiters.release(key);
                    match parked.value {
                        // released by close before there was room
                        Some(value) => {
                            return Poll::Ready(Err(SendError::new(value, state.cause.clone())));
                        }
                        None if self.shared.capacity == 0 => self.handed_off = Some(parked.seq),
                        None => return Poll::Ready(Ok(())),
                    }
                }

                if let Some(seq) = self.handed_off {
                    let received =
                        state.closed || state.slowest().is_none_or(|slowest| slowest > seq);
                    if received {
                        if let Some(key) = self.delivery_key.take() {
                            state.delivery_waiters.release(key);
                        }
                        return Poll::Ready(Ok(()));
                    }
                    match self.delivery_key {
                        Some(key) if state.delivery_waiters.is_linked(key) => {
                            update_waker(state.delivery_waiters.get_mut(key), cx.waker());
                        }
                        key => {
                            if let Some(key) = key {
                                state.delivery_waiters.release(key);
                            }
                            let waker = Some(cx.waker().clone());
                            self.delivery_key = Some(state.delivery_waiters.push_back(waker));
                        }
                    }
                    return Poll::Pending;
                }

                let Some(value) = self.value.take() else {
                    return Poll::Ready(Ok(()));
                };
                match self.shared.try_publish(state, value, deferred) {
                    Ok(()) => Poll::Ready(Ok(())),
                    Err(TrySendError::Closed(value)) => {
                        Poll::Ready(Err(SendError::new(value, state.cause.clone())))
                    }
                    Err(TrySendError::Full(value)) => {
                        let parked = Parked {
                            value: Some(value),
                            seq: 0,
                            waker: Some(cx.waker().clone()),
                        };
                        self.key = Some(state.publish_waiters.push_back(parked));
                        if self.shared.capacity == 0 {
                            state.wake_subscribers(deferred);
                        }
                        Poll::Pending
                    }
                }
            }
        }

        let mut send = SendState {
            shared: &self.shared,
            value: Some(value),
            key: None,
            handed_off: None,
            delivery_key: None,
        };
        poll_fn(|cx| send.poll_send(cx)).await
    }

    /// Attempts to publish an element without waiting.
    ///
    /// Returns [`TrySendError::Full`] if the policy is [`Block`](OverflowPolicy::Block) and the
    /// slowest subscriber leaves no room. On a channel without a buffer this fails whenever
    /// there is a subscriber.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let mut deferred = Deferred::new();
        let result = {
            let mut state = self.shared.state.lock();
            self.shared.try_publish(&mut state, value, &mut deferred)
        };
        deferred.run(self.shared.on_discarded.as_ref());
        result
    }

    /// Creates a subscriber that first receives the replay window, then live elements.
    pub fn subscribe(&self) -> Subscriber<T> {
        let id = {
            let mut state = self.shared.state.lock();
            let replayed = state.buffer.len().min(self.shared.replay) as u64;
            let next = state.tail() - replayed;
            state.cursors.insert(Cursor { next, waker: None })
        };
        Subscriber {
            shared: self.shared.clone(),
            id,
        }
    }

    /// Returns the elements a new subscriber would be replayed, oldest first.
    pub fn replay_cache(&self) -> Vec<T> {
        let state = self.shared.state.lock();
        let skip = state.buffer.len().saturating_sub(self.shared.replay);
        state
            .buffer
            .iter()
            .skip(skip)
            .map(|entry| entry.value.clone())
            .collect()
    }
}

impl<T> Publisher<T> {
    /// Closes the channel. Subscribers receive what they have not seen yet, then observe
    /// [`RecvError`]. Returns `false` if the channel was already closed.
    pub fn close(&self) -> bool {
        self.shared.close(None)
    }

    /// Closes the channel like [`close`](Publisher::close), recording `cause`.
    pub fn close_with(&self, cause: impl Into<Arc<str>>) -> bool {
        self.shared.close(Some(cause.into()))
    }

    /// Returns `true` if the channel is closed.
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.shared.state.lock().cursors.len()
    }
}

/// Receives every element published after it subscribed.
///
/// Instances are created by [`Publisher::subscribe`].
pub struct Subscriber<T> {
    shared: Arc<Shared<T>>,
    id: usize,
}

impl<T> fmt::Debug for Subscriber<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber").finish_non_exhaustive()
    }
}

impl<T> Drop for Subscriber<T> {
    fn drop(&mut self) {
        let mut deferred = Deferred::new();
        {
            let mut state = self.shared.state.lock();
            state.cursors.remove(self.id);
            self.shared.release_publishers(&mut state, &mut deferred);
        }
        deferred.run(self.shared.on_discarded.as_ref());
    }
}

impl<T: Clone> Subscriber<T> {
    /// Receives the next element, waiting until one is published.
    ///
    /// Returns [`RecvError`] once the channel is closed and this subscriber has seen everything
    /// still buffered for it.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe.
    pub async fn recv(&self) -> Result<T, RecvError> {
        poll_fn(|cx| self.shared.poll_recv(self.id, Some(cx))).await
    }

    /// Attempts to receive an element without waiting.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        match self.shared.poll_recv(self.id, None) {
            Poll::Ready(Ok(value)) => Ok(value),
            Poll::Ready(Err(err)) => Err(err.into()),
            Poll::Pending => Err(TryRecvError::Empty),
        }
    }
}

impl<T> Subscriber<T> {
    /// Returns the number of published elements this subscriber has not received yet.
    pub fn lag(&self) -> usize {
        let state = self.shared.state.lock();
        let next = state.cursors[self.id].next.max(state.head);
        (state.tail() - next) as usize
    }
}
