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

//! Overflow policies for bounded buffers.
//!
//! An [`OverflowPolicy`] decides what happens when an element arrives at a buffer that is already
//! full. It is chosen when a channel is built and never changes afterwards.
//!
//! [`offer`] is the policy-agnostic strategy the channels dispatch through: given the current
//! buffer, its capacity and the incoming element, it either stores the element (possibly evicting
//! another one) or hands the element back because the caller must wait.

use std::collections::VecDeque;
use std::sync::Arc;

/// Callback invoked with every element removed from a buffer without being delivered.
pub(crate) type OnDiscarded<T> = Arc<dyn Fn(T) + Send + Sync>;

/// An invalid combination of capacity and overflow policy, rejected at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// A conflated channel always drops the oldest element; no other policy can be attached.
    #[error("conflated capacity cannot be combined with {0:?}")]
    ConflatedPolicy(OverflowPolicy),
    /// A lossy policy needs a buffer to evict from.
    #[error("{0:?} requires a non-zero buffer (replay + extra capacity)")]
    NoBuffer(OverflowPolicy),
}

/// Policy describing how to handle an element arriving at a full buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum OverflowPolicy {
    /// Suspend the sender until space becomes available.
    #[default]
    Block,
    /// Evict the oldest buffered element to make room for the incoming one.
    DropOldest,
    /// Discard the incoming element and leave the buffer unchanged.
    DropNewest,
}

impl OverflowPolicy {
    /// Returns `true` if this policy never suspends the sender.
    pub const fn is_lossy(self) -> bool {
        !matches!(self, OverflowPolicy::Block)
    }
}

/// Outcome of offering an element to a bounded buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum Offer<T> {
    /// The element was appended; `evicted` holds the element removed to make room, if any.
    Stored {
        /// The element evicted under [`OverflowPolicy::DropOldest`].
        evicted: Option<T>,
    },
    /// The incoming element was discarded under [`OverflowPolicy::DropNewest`].
    Rejected(T),
    /// The buffer is full and the policy is [`OverflowPolicy::Block`]; the element is handed
    /// back so the caller can wait for space.
    Full(T),
}

/// Offers `value` to `buffer`, which holds at most `capacity` elements.
///
/// A `capacity` of zero has no room at all: [`OverflowPolicy::Block`] reports [`Offer::Full`] and
/// both drop policies discard the incoming element.
///
/// # Examples
///
/// ```
/// use std::collections::VecDeque;
///
/// use coalesce::policy::Offer;
/// use coalesce::policy::OverflowPolicy;
/// use coalesce::policy::offer;
///
/// let mut buffer = VecDeque::from([1]);
/// assert_eq!(
///     offer(&mut buffer, 1, OverflowPolicy::DropOldest, 2),
///     Offer::Stored { evicted: Some(1) }
/// );
/// assert_eq!(buffer, [2]);
///
/// assert_eq!(offer(&mut buffer, 1, OverflowPolicy::DropNewest, 3), Offer::Rejected(3));
/// assert_eq!(offer(&mut buffer, 1, OverflowPolicy::Block, 4), Offer::Full(4));
/// assert_eq!(buffer, [2]);
/// ```
pub fn offer<T>(
    buffer: &mut VecDeque<T>,
    capacity: usize,
    policy: OverflowPolicy,
    value: T,
) -> Offer<T> {
    if buffer.len() < capacity {
        buffer.push_back(value);
        return Offer::Stored { evicted: None };
    }

    match policy {
        OverflowPolicy::Block => Offer::Full(value),
        OverflowPolicy::DropNewest => Offer::Rejected(value),
        OverflowPolicy::DropOldest if capacity == 0 => Offer::Rejected(value),
        OverflowPolicy::DropOldest => {
            let evicted = buffer.pop_front();
            buffer.push_back(value);
            Offer::Stored { evicted }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_while_room() {
        let mut buffer = VecDeque::new();
        for policy in [
            OverflowPolicy::Block,
            OverflowPolicy::DropOldest,
            OverflowPolicy::DropNewest,
        ] {
            buffer.clear();
            assert_eq!(offer(&mut buffer, 2, policy, 1), Offer::Stored { evicted: None });
            assert_eq!(offer(&mut buffer, 2, policy, 2), Offer::Stored { evicted: None });
            assert_eq!(buffer, [1, 2]);
        }
    }

    #[test]
    fn drop_oldest_keeps_order() {
        let mut buffer = VecDeque::from([1, 2, 3]);
        assert_eq!(
            offer(&mut buffer, 3, OverflowPolicy::DropOldest, 4),
            Offer::Stored { evicted: Some(1) }
        );
        assert_eq!(buffer, [2, 3, 4]);
    }

    #[test]
    fn no_buffer_discards_newest() {
        let mut buffer = VecDeque::new();
        assert_eq!(offer(&mut buffer, 0, OverflowPolicy::DropOldest, 1), Offer::Rejected(1));
        assert_eq!(offer(&mut buffer, 0, OverflowPolicy::DropNewest, 2), Offer::Rejected(2));
        assert_eq!(offer(&mut buffer, 0, OverflowPolicy::Block, 3), Offer::Full(3));
        assert!(buffer.is_empty());
    }

    #[test]
    fn build_error_messages() {
        assert_eq!(
            BuildError::ConflatedPolicy(OverflowPolicy::Block).to_string(),
            "conflated capacity cannot be combined with Block"
        );
        assert_eq!(
            BuildError::NoBuffer(OverflowPolicy::DropNewest).to_string(),
            "DropNewest requires a non-zero buffer (replay + extra capacity)"
        );
    }

    #[test]
    fn lossy() {
        assert!(!OverflowPolicy::Block.is_lossy());
        assert!(OverflowPolicy::DropOldest.is_lossy());
        assert!(OverflowPolicy::DropNewest.is_lossy());
        assert_eq!(OverflowPolicy::default(), OverflowPolicy::Block);
    }
}
