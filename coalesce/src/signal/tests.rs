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

use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Waker;
use std::time::Duration;

use super::*;

#[test]
fn fire_before_wait() {
    let signal = Signal::new();
    signal.fire();

    let mut cx = Context::from_waker(Waker::noop());
    assert!(pin!(signal.wait()).poll(&mut cx).is_ready());
}

#[test]
fn fire_twice_is_noop() {
    let signal = Signal::new();
    signal.fire();
    signal.fire();
    assert!(signal.is_fired());
}

#[test]
fn dropped_wait_deregisters() {
    let signal = Signal::new();
    let mut cx = Context::from_waker(Waker::noop());
    {
        let wait = pin!(signal.wait());
        assert!(wait.poll(&mut cx).is_pending());
    }
    assert!(signal.state.lock().waiters.is_empty());

    let mut wait = pin!(signal.wait());
    assert!(wait.as_mut().poll(&mut cx).is_pending());
    signal.fire();
    assert!(wait.poll(&mut cx).is_ready());
}

#[tokio::test]
async fn wakes_all_waiters() {
    let signal = Arc::new(Signal::new());
    let waiters: Vec<_> = (0..8)
        .map(|_| {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(20)).await;
    signal.fire();

    for w in waiters {
        w.await.unwrap();
    }
}

#[tokio::test]
async fn cancelled_waiter_does_not_block_others() {
    let signal = Arc::new(Signal::new());

    let cancelled = {
        let signal = signal.clone();
        tokio::spawn(async move {
            let _ = tokio::time::timeout(Duration::from_millis(1), signal.wait()).await;
        })
    };
    let waiting = {
        let signal = signal.clone();
        tokio::spawn(async move { signal.wait().await })
    };

    cancelled.await.unwrap();
    signal.fire();
    waiting.await.unwrap();
}
