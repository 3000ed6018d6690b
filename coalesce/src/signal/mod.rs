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

//! A one-shot completion signal that any number of tasks can wait on.
//!
//! A [`Signal`] starts unfired. Calling [`Signal::fire`] wakes every current waiter, and every
//! later [`Signal::wait`] resolves immediately. Dropping a [`Wait`] future only abandons that
//! caller's wait; it never affects whoever is going to fire the signal.
//!
//! # Examples
//!
//! ```
//! # #[tokio::main]
//! # async fn main() {
//! use std::sync::Arc;
//!
//! use coalesce::signal::Signal;
//!
//! let signal = Arc::new(Signal::new());
//! let waiter = {
//!     let signal = signal.clone();
//!     tokio::spawn(async move { signal.wait().await })
//! };
//!
//! signal.fire();
//! waiter.await.unwrap();
//! assert!(signal.is_fired());
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;
use std::task::Waker;

use crate::internal::Mutex;
use crate::internal::WaitList;

#[cfg(test)]
mod tests;

/// A one-shot completion signal.
///
/// See the [module level documentation](self) for more.
pub struct Signal {
    state: Mutex<State>,
}

struct State {
    fired: bool,
    waiters: WaitList<Option<Waker>>,
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("fired", &self.is_fired())
            .finish_non_exhaustive()
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl Signal {
    /// Creates a new, unfired signal.
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(State {
                fired: false,
                waiters: WaitList::new(),
            }),
        }
    }

    /// Returns `true` once [`fire`](Signal::fire) has been called.
    pub fn is_fired(&self) -> bool {
        self.state.lock().fired
    }

    /// Fires the signal, waking every waiting task.
    ///
    /// Firing an already fired signal does nothing.
    pub fn fire(&self) {
        let mut wakers = Vec::new();
        {
            let mut state = self.state.lock();
            if state.fired {
                return;
            }
            state.fired = true;
            state.waiters.drain_with(|waker| wakers.extend(waker.take()));
        }
        for waker in wakers {
            waker.wake();
        }
    }

    /// Returns a future that resolves once the signal is fired.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. Dropping the future deregisters the waiter.
    pub fn wait(&self) -> Wait<'_> {
        Wait {
            signal: self,
            key: None,
        }
    }
}

/// Future returned by [`Signal::wait`].
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Wait<'a> {
    signal: &'a Signal,
    key: Option<usize>,
}

impl fmt::Debug for Wait<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wait").finish_non_exhaustive()
    }
}

impl Drop for Wait<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.signal.state.lock().waiters.release(key);
        }
    }
}

impl Future for Wait<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut state = this.signal.state.lock();

        if state.fired {
            if let Some(key) = this.key.take() {
                state.waiters.release(key);
            }
            return Poll::Ready(());
        }

        match this.key {
            Some(key) => {
                let waker = state.waiters.get_mut(key);
                if waker.as_ref().is_none_or(|w| !w.will_wake(cx.waker())) {
                    *waker = Some(cx.waker().clone());
                }
            }
            None => this.key = Some(state.waiters.push_back(Some(cx.waker().clone()))),
        }
        Poll::Pending
    }
}
