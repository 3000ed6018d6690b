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

//! A multi-producer, multi-consumer channel with a fixed-size buffer and an overflow policy.
//!
//! Every element is delivered to exactly one [`Receiver`], in the order it was sent. What happens
//! when producers outpace consumers is decided by the [`OverflowPolicy`] chosen at construction:
//!
//! * [`Block`](OverflowPolicy::Block) suspends [`Sender::send`] until a slot frees up.
//! * [`DropOldest`](OverflowPolicy::DropOldest) evicts the oldest buffered element.
//! * [`DropNewest`](OverflowPolicy::DropNewest) discards the incoming element.
//!
//! Elements that leave the channel without reaching a receiver (evicted, rejected, or still
//! buffered when the channel is cancelled) are passed to the optional
//! [`on_discarded`](Config::on_discarded) callback exactly once.
//!
//! # Examples
//!
//! ```
//! # #[tokio::main]
//! # async fn main() {
//! use std::sync::Arc;
//! use std::sync::Mutex;
//!
//! use coalesce::mpmc;
//! use coalesce::mpmc::Capacity;
//! use coalesce::mpmc::Config;
//! use coalesce::policy::OverflowPolicy;
//!
//! let dropped = Arc::new(Mutex::new(Vec::new()));
//! let config = Config::new(Capacity::Fixed(1))
//!     .overflow(OverflowPolicy::DropOldest)
//!     .on_discarded({
//!         let dropped = dropped.clone();
//!         move |v| dropped.lock().unwrap().push(v)
//!     });
//! let (tx, rx) = mpmc::channel(config).unwrap();
//!
//! for i in 1..=3 {
//!     tx.send(i).await.unwrap();
//! }
//! assert_eq!(rx.recv().await, Ok(3));
//! assert_eq!(*dropped.lock().unwrap(), vec![1, 2]);
//! # }
//! ```

mod chan;
mod error;
#[cfg(test)]
mod tests;

use std::fmt;
use std::sync::Arc;

pub use self::chan::Receiver;
pub use self::chan::Sender;
pub use self::error::RecvError;
pub use self::error::SendError;
pub use self::error::TryRecvError;
pub use self::error::TrySendError;
use crate::policy::BuildError;
use crate::policy::OnDiscarded;
use crate::policy::OverflowPolicy;

/// The buffer size used by [`Capacity::Buffered`].
pub const DEFAULT_BUFFER: usize = 64;

/// How many elements a channel can hold before its overflow policy applies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Capacity {
    /// No buffer: a send completes only once a receiver takes the element.
    #[default]
    Rendezvous,
    /// A buffer of exactly this many elements. `Fixed(0)` is the same as
    /// [`Rendezvous`](Capacity::Rendezvous).
    Fixed(usize),
    /// A buffer of [`DEFAULT_BUFFER`] elements.
    Buffered,
    /// A buffer that never fills up.
    Unlimited,
    /// A single slot that always holds the latest element; implies
    /// [`DropOldest`](OverflowPolicy::DropOldest).
    Conflated,
}

/// Construction parameters for [`channel`].
pub struct Config<T> {
    capacity: Capacity,
    policy: Option<OverflowPolicy>,
    on_discarded: Option<OnDiscarded<T>>,
}

impl<T> fmt::Debug for Config<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .field("on_discarded", &self.on_discarded.is_some())
            .finish()
    }
}

impl<T> Default for Config<T> {
    fn default() -> Self {
        Self::new(Capacity::default())
    }
}

impl<T> Config<T> {
    /// Creates a configuration with the given capacity and no explicit overflow policy.
    pub fn new(capacity: Capacity) -> Self {
        Self {
            capacity,
            policy: None,
            on_discarded: None,
        }
    }

    /// Sets the overflow policy. Defaults to [`Block`](OverflowPolicy::Block), or
    /// [`DropOldest`](OverflowPolicy::DropOldest) for a conflated channel.
    pub fn overflow(mut self, policy: OverflowPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Sets the callback invoked with every element that is removed from the channel without
    /// being delivered.
    ///
    /// The callback runs on the task that caused the removal, outside of any internal lock. It
    /// should return quickly.
    pub fn on_discarded<F>(mut self, f: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.on_discarded = Some(Arc::new(f));
        self
    }

    fn resolve(
        self,
    ) -> Result<(Option<usize>, OverflowPolicy, Option<OnDiscarded<T>>), BuildError> {
        let (capacity, policy) = match (self.capacity, self.policy) {
            (Capacity::Conflated, None | Some(OverflowPolicy::DropOldest)) => {
                (Some(1), OverflowPolicy::DropOldest)
            }
            (Capacity::Conflated, Some(policy)) => return Err(BuildError::ConflatedPolicy(policy)),
            (Capacity::Rendezvous, policy) => (Some(0), policy.unwrap_or_default()),
            (Capacity::Fixed(n), policy) => (Some(n), policy.unwrap_or_default()),
            (Capacity::Buffered, policy) => (Some(DEFAULT_BUFFER), policy.unwrap_or_default()),
            (Capacity::Unlimited, policy) => (None, policy.unwrap_or_default()),
        };
        Ok((capacity, policy, self.on_discarded))
    }
}

/// Creates a channel from `config`.
///
/// Returns [`BuildError`] if the capacity and overflow policy cannot be combined.
///
/// A zero-capacity channel with a drop policy has no buffer to hold anything, so every element
/// sent on it is discarded, including the first one.
pub fn channel<T>(config: Config<T>) -> Result<(Sender<T>, Receiver<T>), BuildError> {
    let (capacity, policy, on_discarded) = config.resolve()?;
    Ok(chan::new(capacity, policy, on_discarded))
}

/// Creates a channel holding up to `buffer` elements whose senders wait when it is full.
///
/// `bounded(0)` creates a rendezvous channel.
pub fn bounded<T>(buffer: usize) -> (Sender<T>, Receiver<T>) {
    chan::new(Some(buffer), OverflowPolicy::Block, None)
}
