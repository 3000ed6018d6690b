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

//! A single-flight cache: at most one fetch runs at a time, and every caller observes its result.
//!
//! [`CoalescingCache::refresh`] starts a fetch against a [`FetchSource`] unless one is already in
//! flight, in which case the call joins it and returns immediately. [`CoalescingCache::read`]
//! waits for the in-flight fetch, if any, then returns the latest successfully fetched value.
//!
//! A failed fetch is logged and leaves the previous value in place. Whatever way a fetch task
//! ends (success, failure, panic, or being dropped by the executor), the cache returns to idle
//! so the next refresh can start a new fetch.
//!
//! # Examples
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use std::convert::Infallible;
//!
//! use coalesce::cache::BoxFuture;
//! use coalesce::cache::CoalescingCache;
//! use coalesce::cache::FetchFn;
//! use coalesce::cache::Refresh;
//!
//! let source = FetchFn(|| async { Ok::<_, Infallible>(vec!["Ivan", "Oleg"]) });
//! let cache = CoalescingCache::new(source, |task: BoxFuture| {
//!     tokio::spawn(task);
//! });
//!
//! assert_eq!(cache.read().await, None);
//! assert_eq!(cache.refresh(), Refresh::Started);
//! assert_eq!(cache.refresh(), Refresh::Joined);
//! assert_eq!(cache.read().await.as_deref(), Some(&vec!["Ivan", "Oleg"]));
//! # }
//! ```


use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::internal::Mutex;
use crate::signal::Signal;

/// A boxed task handed to a [`Spawn`] implementation.
pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Starts detached tasks on some executor.
///
/// Implemented for every `Fn(BoxFuture)`, so a closure calling the runtime's spawn function is
/// enough:
///
/// ```
/// # #[tokio::main]
/// # async fn main() {
/// use coalesce::cache::BoxFuture;
/// use coalesce::cache::Spawn;
///
/// let spawner = |task: BoxFuture| {
///     tokio::spawn(task);
/// };
/// spawner.spawn(Box::pin(async {}));
/// # }
/// ```
pub trait Spawn: Send + Sync + 'static {
    /// Runs `task` to completion in the background.
    ///
    /// Dropping the task instead of running it is allowed; the cache treats it as a cancelled
    /// fetch.
    fn spawn(&self, task: BoxFuture);
}

impl<F> Spawn for F
where
    F: Fn(BoxFuture) + Send + Sync + 'static,
{
    fn spawn(&self, task: BoxFuture) {
        self(task)
    }
}

/// A slow, fallible producer of the cached value.
pub trait FetchSource: Send + Sync + 'static {
    /// The value produced by a successful fetch.
    type Output: Send + Sync + 'static;
    /// The error produced by a failed fetch. It is logged and then dropped.
    type Error: fmt::Display + Send + 'static;

    /// Fetches a fresh value.
    fn fetch(&self) -> impl Future<Output = Result<Self::Output, Self::Error>> + Send;
}

/// Adapts a closure returning a future into a [`FetchSource`].
#[derive(Clone, Copy, Debug)]
pub struct FetchFn<F>(pub F);

impl<F, Fut, T, E> FetchSource for FetchFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send,
    T: Send + Sync + 'static,
    E: fmt::Display + Send + 'static,
{
    type Output = T;
    type Error = E;

    fn fetch(&self) -> impl Future<Output = Result<T, E>> + Send {
        (self.0)()
    }
}

/// The outcome of [`CoalescingCache::refresh`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Refresh {
    /// A new fetch was started.
    Started,
    /// A fetch was already in flight; this call joined it.
    Joined,
}

/// Whether a fetch is currently running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlightState {
    /// No fetch is running.
    Idle,
    /// A fetch is running.
    Fetching,
}

/// A cache holding the latest value fetched from a [`FetchSource`], with at most one fetch in
/// flight.
///
/// Cloning the cache yields another handle to the same state.
///
/// See the [module level documentation](self) for more.
pub struct CoalescingCache<S: FetchSource> {
    inner: Arc<Inner<S>>,
}

struct Inner<S: FetchSource> {
    source: S,
    spawner: Box<dyn Spawn>,
    // the single lock for the cached value and the in-flight marker; never held across `.await`
    slot: Mutex<Slot<S::Output>>,
}

struct Slot<T> {
    value: Option<Arc<T>>,
    // non-null iff a fetch task is alive
    in_flight: Option<Arc<Signal>>,
    fetches: u64,
}

impl<S: FetchSource> Clone for CoalescingCache<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: FetchSource> fmt::Debug for CoalescingCache<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.inner.slot.lock();
        f.debug_struct("CoalescingCache")
            .field("cached", &slot.value.is_some())
            .field("fetching", &slot.in_flight.is_some())
            .field("fetches", &slot.fetches)
            .finish_non_exhaustive()
    }
}

impl<S: FetchSource> CoalescingCache<S> {
    /// Creates an empty cache that fetches from `source` on tasks started by `spawner`.
    pub fn new(source: S, spawner: impl Spawn) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                spawner: Box::new(spawner),
                slot: Mutex::new(Slot {
                    value: None,
                    in_flight: None,
                    fetches: 0,
                }),
            }),
        }
    }

    /// Requests fresh data.
    ///
    /// Starts a fetch task if none is running and returns [`Refresh::Started`]; otherwise returns
    /// [`Refresh::Joined`] without doing anything. Either way, the result becomes visible through
    /// [`read`](CoalescingCache::read). Fetch failures never surface here.
    pub fn refresh(&self) -> Refresh {
        let flight = {
            let mut slot = self.inner.slot.lock();
            if slot.in_flight.is_some() {
                tracing::trace!("joined in-flight fetch");
                return Refresh::Joined;
            }
            let flight = Arc::new(Signal::new());
            slot.in_flight = Some(flight.clone());
            slot.fetches += 1;
            tracing::debug!(fetch = slot.fetches, "starting fetch");
            flight
        };

        let guard = FlightGuard {
            inner: self.inner.clone(),
            flight,
            outcome: Outcome::Pending,
        };
        self.inner.spawner.spawn(Box::pin(run_fetch(guard)));
        Refresh::Started
    }

    /// Returns the latest fetched value, waiting for the in-flight fetch to finish first.
    ///
    /// Returns `None` if no fetch has ever succeeded. If the in-flight fetch fails, the previous
    /// value is returned.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. Dropping the future abandons only this caller's wait; the
    /// fetch keeps running for everyone else.
    pub async fn read(&self) -> Option<Arc<S::Output>> {
        let flight = self.inner.slot.lock().in_flight.clone();
        if let Some(flight) = flight {
            flight.wait().await;
        }
        self.peek()
    }

    /// Requests fresh data, then waits for it like [`read`](CoalescingCache::read).
    pub async fn refresh_and_read(&self) -> Option<Arc<S::Output>> {
        self.refresh();
        self.read().await
    }

    /// Returns the latest fetched value without waiting.
    pub fn peek(&self) -> Option<Arc<S::Output>> {
        self.inner.slot.lock().value.clone()
    }

    /// Returns whether a fetch is currently running.
    pub fn state(&self) -> FlightState {
        match self.inner.slot.lock().in_flight {
            Some(_) => FlightState::Fetching,
            None => FlightState::Idle,
        }
    }

    /// Returns how many fetches this cache has started.
    pub fn fetch_count(&self) -> u64 {
        self.inner.slot.lock().fetches
    }
}

enum Outcome<T> {
    Pending,
    Fetched(T),
    Failed,
}

/// Owned by the fetch task. Dropping it publishes the outcome and clears the in-flight marker,
/// which also happens when the task is dropped without ever being polled to completion.
struct FlightGuard<S: FetchSource> {
    inner: Arc<Inner<S>>,
    flight: Arc<Signal>,
    outcome: Outcome<S::Output>,
}

impl<S: FetchSource> Drop for FlightGuard<S> {
    fn drop(&mut self) {
        let outcome = std::mem::replace(&mut self.outcome, Outcome::Failed);
        let cancelled = matches!(outcome, Outcome::Pending);
        {
            let mut slot = self.inner.slot.lock();
            if let Outcome::Fetched(value) = outcome {
                slot.value = Some(Arc::new(value));
            }
            if slot
                .in_flight
                .as_ref()
                .is_some_and(|f| Arc::ptr_eq(f, &self.flight))
            {
                slot.in_flight = None;
            }
        }
        self.flight.fire();

        if cancelled {
            tracing::warn!("fetch task ended before completing");
        }
    }
}

async fn run_fetch<S: FetchSource>(mut guard: FlightGuard<S>) {
    let result = guard.inner.source.fetch().await;
    guard.outcome = match result {
        Ok(value) => {
            tracing::debug!("fetch completed");
            Outcome::Fetched(value)
        }
        Err(err) => {
            tracing::warn!(error = %err, "fetch failed, keeping last good value");
            Outcome::Failed
        }
    };
}
