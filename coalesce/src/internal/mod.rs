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

use std::sync::PoisonError;
use std::task::Waker;

use crate::policy::OnDiscarded;

mod waitlist;

pub(crate) use self::waitlist::WaitList;

/// A thin wrapper over [`std::sync::Mutex`] that ignores poisoning.
///
/// Critical sections guarded by this lock never run user code, so a poisoned lock only means
/// some other thread panicked while holding it; the protected state is still consistent.
#[derive(Debug, Default)]
pub(crate) struct Mutex<T: ?Sized>(std::sync::Mutex<T>);

impl<T> Mutex<T> {
    pub(crate) const fn new(t: T) -> Self {
        Self(std::sync::Mutex::new(t))
    }
}

impl<T: ?Sized> Mutex<T> {
    pub(crate) fn lock(&self) -> std::sync::MutexGuard<'_, T> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn get_mut(&mut self) -> &mut T {
        self.0.get_mut().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Wake-ups and discard reports collected under a lock, performed after releasing it.
#[must_use]
pub(crate) struct Deferred<T> {
    pub(crate) wakers: Vec<Waker>,
    pub(crate) discarded: Vec<T>,
}

impl<T> Deferred<T> {
    pub(crate) fn new() -> Self {
        Self {
            wakers: Vec::new(),
            discarded: Vec::new(),
        }
    }

    /// Wakes every collected waiter, then reports the discarded elements.
    ///
    /// Waiters are woken before any user callback runs, so a panicking callback leaves no task
    /// parked.
    pub(crate) fn run(self, on_discarded: Option<&OnDiscarded<T>>) {
        for waker in self.wakers {
            waker.wake();
        }
        if !self.discarded.is_empty() {
            tracing::trace!(count = self.discarded.len(), "discarding undelivered elements");
        }
        for value in self.discarded {
            if let Some(f) = on_discarded {
                f(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::panic::AssertUnwindSafe;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::task::Wake;

    use super::*;

    #[derive(Default)]
    struct CountingWaker(AtomicUsize);

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn panicking_callback_still_wakes() {
        let counter = Arc::new(CountingWaker::default());
        let mut deferred = Deferred::new();
        deferred.wakers.push(Waker::from(counter.clone()));
        deferred.wakers.push(Waker::from(counter.clone()));
        deferred.discarded.push(1);

        let on_discarded: OnDiscarded<i32> = Arc::new(|_: i32| panic!("callback failed"));
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            deferred.run(Some(&on_discarded));
        }));
        assert!(result.is_err());
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }
}
