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

//! A broadcast channel: every subscriber observes every element published after it subscribed.
//!
//! A [`Publisher`] keeps a buffer of `replay + extra_capacity` elements. A new [`Subscriber`]
//! first receives up to `replay` of the most recent elements, then live ones. When the slowest
//! subscriber falls a full buffer behind, the [`OverflowPolicy`] applies:
//!
//! * [`Block`](OverflowPolicy::Block) suspends [`Publisher::send`] until the slowest subscriber
//!   catches up; subscribers see the element only once it fits. With no buffer at all, the
//!   element is handed to subscribers as they ask for it. With no subscribers, publishing never
//!   waits.
//! * [`DropOldest`](OverflowPolicy::DropOldest) moves lagging subscribers past the oldest element.
//! * [`DropNewest`](OverflowPolicy::DropNewest) discards the incoming element.
//!
//! An element that leaves the buffer without having reached any subscriber is passed to the
//! optional [`on_discarded`](BroadcastConfig::on_discarded) callback exactly once.
//!
//! # Examples
//!
//! ```
//! # #[tokio::main]
//! # async fn main() {
//! use coalesce::broadcast;
//! use coalesce::broadcast::BroadcastConfig;
//!
//! let config = BroadcastConfig::new().replay(2).extra_capacity(1);
//! let publisher = broadcast::channel(config).unwrap();
//! for i in 1..=3 {
//!     publisher.send(i).await.unwrap();
//! }
//!
//! let late = publisher.subscribe();
//! publisher.send(4).await.unwrap();
//! publisher.close();
//!
//! let mut seen = Vec::new();
//! while let Ok(v) = late.recv().await {
//!     seen.push(v);
//! }
//! assert_eq!(seen, vec![2, 3, 4]);
//! # }
//! ```

mod chan;

use std::fmt;
use std::sync::Arc;

pub use self::chan::Publisher;
pub use self::chan::Subscriber;
pub use crate::mpmc::RecvError;
pub use crate::mpmc::SendError;
pub use crate::mpmc::TryRecvError;
pub use crate::mpmc::TrySendError;
use crate::policy::BuildError;
use crate::policy::OnDiscarded;
use crate::policy::OverflowPolicy;

/// Construction parameters for [`channel`].
pub struct BroadcastConfig<T> {
    replay: usize,
    extra_capacity: usize,
    policy: OverflowPolicy,
    on_discarded: Option<OnDiscarded<T>>,
}

impl<T> fmt::Debug for BroadcastConfig<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastConfig")
            .field("replay", &self.replay)
            .field("extra_capacity", &self.extra_capacity)
            .field("policy", &self.policy)
            .field("on_discarded", &self.on_discarded.is_some())
            .finish()
    }
}

impl<T> Default for BroadcastConfig<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BroadcastConfig<T> {
    /// Creates a configuration with no replay, no extra buffer and the
    /// [`Block`](OverflowPolicy::Block) policy.
    pub fn new() -> Self {
        Self {
            replay: 0,
            extra_capacity: 0,
            policy: OverflowPolicy::Block,
            on_discarded: None,
        }
    }

    /// Sets how many of the most recent elements a new subscriber receives first.
    pub fn replay(mut self, replay: usize) -> Self {
        self.replay = replay;
        self
    }

    /// Sets how many elements are buffered for slow subscribers beyond the replay window.
    pub fn extra_capacity(mut self, extra_capacity: usize) -> Self {
        self.extra_capacity = extra_capacity;
        self
    }

    /// Sets the overflow policy.
    pub fn overflow(mut self, policy: OverflowPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the callback invoked with every element that leaves the buffer without having been
    /// delivered to any subscriber.
    pub fn on_discarded<F>(mut self, f: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.on_discarded = Some(Arc::new(f));
        self
    }
}

/// Creates a broadcast channel from `config`.
///
/// Returns [`BuildError::NoBuffer`] if a drop policy is combined with a zero-sized buffer.
pub fn channel<T: Clone>(config: BroadcastConfig<T>) -> Result<Publisher<T>, BuildError> {
    let capacity = config.replay.saturating_add(config.extra_capacity);
    if capacity == 0 && config.policy.is_lossy() {
        return Err(BuildError::NoBuffer(config.policy));
    }
    Ok(chan::new(
        config.replay,
        capacity,
        config.policy,
        config.on_discarded,
    ))
}
