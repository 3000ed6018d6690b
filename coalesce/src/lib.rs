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

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]

//! # Coalesce
//!
//! `coalesce` is a runtime-agnostic library for moving data between asynchronous tasks without
//! doing the same work twice or losing track of what was dropped on the floor.
//!
//! ## Features
//!
//! * [`CoalescingCache`]: A single-flight cache. Concurrent refresh requests share one fetch, and
//!   readers wait for it before observing the latest value.
//! * [`mpmc::channel`]: A multi-producer, multi-consumer queue where each element is delivered to
//!   exactly one receiver. Capacity presets range from rendezvous to unlimited, with a
//!   configurable [`OverflowPolicy`] for when the buffer is full.
//! * [`broadcast::channel`]: A hot stream where every subscriber receives every element, with an
//!   optional replay window for late subscribers.
//! * [`Signal`]: A one-shot event that any number of tasks can wait for.
//!
//! Channels report every element they drop without delivering (by overflow policy, by
//! cancellation, or by being dropped with a non-empty buffer) to an optional callback, exactly
//! once per element.
//!
//! ## Runtime Agnostic
//!
//! Nothing in this library depends on a particular executor. Futures are woken through the
//! standard [`Waker`] machinery, and the cache starts its background fetches through the
//! [`Spawn`] trait, which a closure calling the runtime's spawn function implements.
//!
//! ## Thread Safety
//!
//! All handles in this library implement `Send` and `Sync` when the values they carry do.
//!
//! [`CoalescingCache`]: cache::CoalescingCache
//! [`OverflowPolicy`]: policy::OverflowPolicy
//! [`Signal`]: signal::Signal
//! [`Spawn`]: cache::Spawn
//! [`Waker`]: std::task::Waker

pub(crate) mod internal;

pub mod broadcast;
pub mod cache;
pub mod mpmc;
pub mod policy;
pub mod signal;

#[cfg(test)]
mod tests {
    use crate::broadcast;
    use crate::cache::CoalescingCache;
    use crate::cache::FetchFn;
    use crate::mpmc;
    use crate::policy::BuildError;
    use crate::policy::OverflowPolicy;
    use crate::signal::Signal;
    use crate::signal::Wait;

    type Source = FetchFn<fn() -> std::future::Ready<Result<u32, String>>>;

    #[test]
    fn assert_send_and_sync() {
        fn do_assert_send_and_sync<T: Send + Sync>() {}
        do_assert_send_and_sync::<Signal>();
        do_assert_send_and_sync::<Wait<'_>>();
        do_assert_send_and_sync::<CoalescingCache<Source>>();
        do_assert_send_and_sync::<BuildError>();
        do_assert_send_and_sync::<OverflowPolicy>();
        do_assert_send_and_sync::<mpmc::Config<i64>>();
        do_assert_send_and_sync::<mpmc::Sender<i64>>();
        do_assert_send_and_sync::<mpmc::Receiver<i64>>();
        do_assert_send_and_sync::<mpmc::SendError<i64>>();
        do_assert_send_and_sync::<mpmc::TrySendError<i64>>();
        do_assert_send_and_sync::<mpmc::RecvError>();
        do_assert_send_and_sync::<mpmc::TryRecvError>();
        do_assert_send_and_sync::<broadcast::BroadcastConfig<i64>>();
        do_assert_send_and_sync::<broadcast::Publisher<i64>>();
        do_assert_send_and_sync::<broadcast::Subscriber<i64>>();
    }

    #[test]
    fn assert_unpin() {
        fn do_assert_unpin<T: Unpin>() {}
        do_assert_unpin::<Signal>();
        do_assert_unpin::<Wait<'_>>();
        do_assert_unpin::<CoalescingCache<Source>>();
        do_assert_unpin::<mpmc::Sender<i64>>();
        do_assert_unpin::<mpmc::Receiver<i64>>();
        do_assert_unpin::<mpmc::SendError<i64>>();
        do_assert_unpin::<broadcast::Publisher<i64>>();
        do_assert_unpin::<broadcast::Subscriber<i64>>();
    }
}
