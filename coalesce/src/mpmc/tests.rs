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
use std::sync::Mutex;
use std::task::Context;
use std::task::Waker;
use std::time::Duration;

use super::*;

fn recorder<T: Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(T) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let seen = seen.clone();
        move |v| seen.lock().unwrap().push(v)
    };
    (seen, sink)
}

fn lossy<T: Send + 'static>(
    capacity: Capacity,
    policy: OverflowPolicy,
) -> (Sender<T>, Receiver<T>, Arc<Mutex<Vec<T>>>) {
    let (seen, sink) = recorder();
    let config = Config::new(capacity).overflow(policy).on_discarded(sink);
    let (tx, rx) = channel(config).unwrap();
    (tx, rx, seen)
}

#[test]
fn block_suspends_when_full() {
    let mut cx = Context::from_waker(Waker::noop());
    let (tx, rx) = bounded(2);

    assert!(pin!(tx.send(1)).poll(&mut cx).is_ready());
    assert!(pin!(tx.send(2)).poll(&mut cx).is_ready());

    let mut third = pin!(tx.send(3));
    assert!(third.as_mut().poll(&mut cx).is_pending());
    assert!(third.as_mut().poll(&mut cx).is_pending());
    assert_eq!(tx.len(), 2);

    assert_eq!(rx.try_recv(), Ok(1));
    assert!(matches!(third.poll(&mut cx), std::task::Poll::Ready(Ok(()))));

    assert_eq!(rx.try_recv(), Ok(2));
    assert_eq!(rx.try_recv(), Ok(3));
    assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
}

#[test]
fn drop_oldest_evicts_in_order() {
    let (tx, rx, seen) = lossy(Capacity::Fixed(1), OverflowPolicy::DropOldest);
    for i in 1..=3 {
        tx.try_send(i).unwrap();
    }
    assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    assert_eq!(rx.try_recv(), Ok(3));
    assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test]
async fn drop_newest_keeps_buffer() {
    let (tx, rx, seen) = lossy(Capacity::Fixed(1), OverflowPolicy::DropNewest);
    for i in 1..=3 {
        tx.send(i).await.unwrap();
    }
    assert_eq!(*seen.lock().unwrap(), vec![2, 3]);
    assert_eq!(rx.recv().await, Ok(1));
    assert_eq!(rx.len(), 0);
}

#[test]
fn no_buffer_drop_policy_discards_everything() {
    for policy in [OverflowPolicy::DropOldest, OverflowPolicy::DropNewest] {
        let (tx, rx, seen) = lossy(Capacity::Rendezvous, policy);

        // even a receiver already waiting does not get the element
        let mut cx = Context::from_waker(Waker::noop());
        let mut recv = pin!(rx.recv());
        assert!(recv.as_mut().poll(&mut cx).is_pending());

        tx.try_send(1).unwrap();
        tx.try_send(2).unwrap();
        assert!(recv.as_mut().poll(&mut cx).is_pending());
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }
}

#[test]
fn conflated_keeps_latest() {
    let (tx, rx, seen) = lossy(Capacity::Conflated, OverflowPolicy::DropOldest);
    tx.try_send(5).unwrap();
    tx.try_send(1).unwrap();
    assert_eq!(tx.capacity(), Some(1));
    assert_eq!(tx.policy(), OverflowPolicy::DropOldest);
    assert_eq!(rx.try_recv(), Ok(1));
    assert_eq!(*seen.lock().unwrap(), vec![5]);
}

#[test]
fn conflated_rejects_other_policies() {
    for policy in [OverflowPolicy::Block, OverflowPolicy::DropNewest] {
        let config = Config::<i32>::new(Capacity::Conflated).overflow(policy);
        assert_eq!(
            channel(config).unwrap_err(),
            BuildError::ConflatedPolicy(policy)
        );
    }
}

#[test]
fn capacity_presets() {
    let (tx, _rx) = channel::<i32>(Config::new(Capacity::Buffered)).unwrap();
    assert_eq!(tx.capacity(), Some(DEFAULT_BUFFER));
    let (tx, _rx) = channel::<i32>(Config::new(Capacity::Unlimited)).unwrap();
    assert_eq!(tx.capacity(), None);
    for i in 0..1000 {
        tx.try_send(i).unwrap();
    }
    assert_eq!(tx.len(), 1000);
    let (tx, _rx) = channel::<i32>(Config::default()).unwrap();
    assert_eq!(tx.capacity(), Some(0));
    assert_eq!(tx.policy(), OverflowPolicy::Block);
    let (tx, _rx) = channel::<i32>(Config::new(Capacity::Fixed(usize::MAX))).unwrap();
    assert_eq!(tx.capacity(), Some(usize::MAX));
    let (tx, _rx) = channel::<i32>(Config::new(Capacity::Conflated)).unwrap();
    assert_eq!(tx.capacity(), Some(1));
    assert_eq!(tx.policy(), OverflowPolicy::DropOldest);
}

#[tokio::test]
async fn rendezvous_send_waits_for_receiver() {
    let (tx, rx) = bounded(0);
    assert_eq!(tx.try_send(1), Err(TrySendError::Full(1)));

    let sent = tokio::spawn(async move {
        tx.send(2).await.unwrap();
        tx
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!sent.is_finished());

    assert_eq!(rx.recv().await, Ok(2));
    let tx = sent.await.unwrap();

    // a waiting receiver lets `try_send` hand over directly
    let waiting = tokio::spawn(async move { rx.recv().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    tx.try_send(3).unwrap();
    assert_eq!(waiting.await.unwrap(), Ok(3));
}

#[tokio::test]
async fn close_drains_then_fails() {
    let (tx, rx) = bounded(4);
    tx.send(1).await.unwrap();
    tx.send(2).await.unwrap();
    assert!(tx.close_with("done"));
    assert!(!tx.close());
    assert!(rx.is_closed());

    let err = tx.send(3).await.unwrap_err();
    assert_eq!(err.cause(), Some("done"));
    assert_eq!(err.into_inner(), 3);

    assert_eq!(rx.recv().await, Ok(1));
    assert_eq!(rx.recv().await, Ok(2));
    let err = rx.recv().await.unwrap_err();
    assert_eq!(err.cause(), Some("done"));
}

#[tokio::test]
async fn close_releases_waiting_sender() {
    let (tx, rx) = bounded(1);
    tx.send(1).await.unwrap();

    let tx = Arc::new(tx);
    let waiting = {
        let tx = tx.clone();
        tokio::spawn(async move { tx.send(2).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    tx.close();
    let err = waiting.await.unwrap().unwrap_err();
    assert_eq!(err.into_inner(), 2);
    assert_eq!(rx.recv().await, Ok(1));
    assert!(rx.recv().await.is_err());
}

#[test]
fn cancel_reports_each_buffered_element_once() {
    let (tx, rx, seen) = lossy(Capacity::Fixed(5), OverflowPolicy::Block);
    for i in [5, 10, 15, 20, 25] {
        tx.try_send(i).unwrap();
    }
    assert_eq!(rx.try_recv(), Ok(5));

    assert!(rx.cancel_with("shutdown"));
    assert!(!rx.cancel());
    assert_eq!(*seen.lock().unwrap(), vec![10, 15, 20, 25]);

    let err = rx.try_recv().unwrap_err();
    assert_eq!(err, TryRecvError::Closed(RecvError::new(Some("shutdown".into()))));
    assert_eq!(tx.try_send(30), Err(TrySendError::Closed(30)));
    assert_eq!(seen.lock().unwrap().len(), 4);
}

#[test]
fn cancel_after_close_discards_leftovers() {
    let (tx, rx, seen) = lossy(Capacity::Fixed(3), OverflowPolicy::Block);
    tx.try_send(1).unwrap();
    tx.try_send(2).unwrap();
    tx.close();
    assert_eq!(rx.try_recv(), Ok(1));
    assert!(!rx.cancel());
    assert_eq!(*seen.lock().unwrap(), vec![2]);
}

#[test]
fn dropping_last_receiver_reports_buffered() {
    let (tx, rx, seen) = lossy(Capacity::Fixed(3), OverflowPolicy::Block);
    let rx2 = rx.clone();
    tx.try_send(1).unwrap();
    tx.try_send(2).unwrap();
    tx.try_send(3).unwrap();
    assert_eq!(rx2.try_recv(), Ok(1));

    drop(rx);
    assert!(seen.lock().unwrap().is_empty());
    drop(rx2);
    assert_eq!(*seen.lock().unwrap(), vec![2, 3]);
    assert!(tx.is_closed());
}

#[test]
fn dropping_last_sender_closes() {
    let (tx, rx) = bounded::<i32>(1);
    let tx2 = tx.clone();
    drop(tx);
    assert!(!rx.is_closed());
    drop(tx2);
    assert!(rx.is_closed());
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Closed(_))));
}

#[test]
fn cancelled_recv_keeps_element() {
    let mut cx = Context::from_waker(Waker::noop());
    let (tx, rx) = bounded(0);
    {
        let recv = pin!(rx.recv());
        assert!(recv.poll(&mut cx).is_pending());
        tx.try_send(7).unwrap();
    }
    assert_eq!(rx.try_recv(), Ok(7));
}

#[test]
fn cancelled_recv_passes_element_on() {
    let mut cx = Context::from_waker(Waker::noop());
    let (tx, rx) = bounded(1);
    let rx2 = rx.clone();

    let mut second = pin!(rx2.recv());
    {
        let first = pin!(rx.recv());
        assert!(first.poll(&mut cx).is_pending());
        assert!(second.as_mut().poll(&mut cx).is_pending());
        tx.try_send(7).unwrap();
    }
    assert!(matches!(second.poll(&mut cx), std::task::Poll::Ready(Ok(7))));
}

#[test]
fn cancelled_send_takes_element_back() {
    let mut cx = Context::from_waker(Waker::noop());
    let (tx, rx) = bounded(1);
    tx.try_send(1).unwrap();
    {
        let send = pin!(tx.send(2));
        assert!(send.poll(&mut cx).is_pending());
    }
    assert_eq!(rx.try_recv(), Ok(1));
    assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    tx.try_send(3).unwrap();
    assert_eq!(rx.try_recv(), Ok(3));
}

#[tokio::test]
async fn each_element_delivered_once() {
    let (tx, rx) = bounded(4);
    let consumers: Vec<_> = (0..4)
        .map(|_| {
            let rx = rx.clone();
            tokio::spawn(async move {
                let mut got = Vec::new();
                while let Ok(v) = rx.recv().await {
                    got.push(v);
                }
                got
            })
        })
        .collect();
    drop(rx);

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let tx = tx.clone();
            tokio::spawn(async move {
                for i in 0..50 {
                    tx.send(p * 50 + i).await.unwrap();
                }
            })
        })
        .collect();
    drop(tx);

    for p in producers {
        p.await.unwrap();
    }
    let mut all = Vec::new();
    for c in consumers {
        all.extend(c.await.unwrap());
    }
    all.sort_unstable();
    assert_eq!(all, (0..200).collect::<Vec<_>>());
}

#[tokio::test]
async fn fifo_per_producer() {
    let (tx, rx) = bounded(2);
    let producer = tokio::spawn(async move {
        for i in 0..100 {
            tx.send(i).await.unwrap();
        }
    });

    let mut got = Vec::new();
    while let Ok(v) = rx.recv().await {
        got.push(v);
    }
    producer.await.unwrap();
    assert_eq!(got, (0..100).collect::<Vec<_>>());
}
