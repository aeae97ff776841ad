#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use brrtpool::{Pool, PoolConfig, PoolError, Publisher, Responder};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(2));
    }
}

fn multiset<T: std::hash::Hash + Eq>(items: impl IntoIterator<Item = T>) -> HashMap<T, usize> {
    let mut counts = HashMap::new();
    for item in items {
        *counts.entry(item).or_insert(0) += 1;
    }
    counts
}

/// Publish one payload, then ten thousand more with a concurrent shutdown,
/// and read everything back off the response channel until it closes.
#[test]
fn test_echo_scenario() {
    may::config().set_workers(2);

    let pool = Pool::with_workers(5).unwrap();
    let (publisher, responses) =
        pool.register(|_p: &Publisher<String>, word: String, out: &Responder<String>| {
            let _ = out.send(word);
        });

    publisher.publish("x".to_string());
    assert_eq!(responses.recv().unwrap(), "x");

    let expected: Vec<String> = (0..10_000).map(|i| format!("payload-{i}")).collect();
    for payload in &expected {
        publisher.publish(payload.clone());
    }

    let shutdown = std::thread::spawn(move || pool.shutdown());
    let received: Vec<String> = responses.iter().collect();
    shutdown.join().unwrap();

    assert_eq!(received.len(), expected.len());
    assert_eq!(multiset(received), multiset(expected));
}

#[test]
fn test_empty_shutdown_is_prompt() {
    may::config().set_workers(2);

    let pool = Pool::with_workers(3).unwrap();
    let (_publisher, responses) =
        pool.register(|_p: &Publisher<u32>, n: u32, out: &Responder<u32>| {
            let _ = out.send(n);
        });
    assert!(pool.is_idle());

    let start = Instant::now();
    pool.shutdown();
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(responses.recv().is_err());
}

#[test]
fn test_shutdown_waits_for_in_flight_tasks() {
    may::config().set_workers(2);

    let finished = Arc::new(AtomicUsize::new(0));
    let pool = Pool::with_workers(2).unwrap();
    let counter = Arc::clone(&finished);
    let (publisher, responses) =
        pool.register(move |_p: &Publisher<u64>, ms: u64, out: &Responder<u64>| {
            may::coroutine::sleep(Duration::from_millis(ms));
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = out.send(ms);
        });

    for _ in 0..6 {
        publisher.publish(30);
    }
    pool.shutdown();

    // Every task ran to completion before shutdown returned
    assert_eq!(finished.load(Ordering::SeqCst), 6);
    let received: Vec<u64> = responses.iter().collect();
    assert_eq!(received, vec![30; 6]);
}

#[test]
fn test_recursive_publish_completes_before_shutdown() {
    may::config().set_workers(2);

    let pool = Pool::with_workers(2).unwrap();
    let (publisher, responses) =
        pool.register(|publisher: &Publisher<u32>, n: u32, out: &Responder<u32>| {
            let _ = out.send(n);
            if n > 0 {
                // Fan out: each step publishes two more, forming a binary tree
                publisher.publish(n - 1);
                publisher.publish(n - 1);
            }
        });

    publisher.publish(6);
    pool.shutdown();

    let received: Vec<u32> = responses.iter().collect();
    // 2^7 - 1 nodes in a depth-6 binary tree
    assert_eq!(received.len(), 127);
    let counts = multiset(received);
    for depth in 0..=6u32 {
        assert_eq!(counts[&(6 - depth)], 1 << depth);
    }
}

#[test]
fn test_panicking_handler_does_not_stall_shutdown() {
    may::config().set_workers(2);

    // Unwinding needs more stack than the default
    let pool = Pool::new(PoolConfig::new(2, 0x100000)).unwrap();
    let (publisher, responses) =
        pool.register(|_p: &Publisher<u32>, n: u32, out: &Responder<u32>| {
            if n % 3 == 0 {
                panic!("handler rejected {n}");
            }
            let _ = out.send(n);
        });

    for n in 0..30 {
        publisher.publish(n);
    }
    wait_until("all tasks to finish", || pool.metrics().completed == 30);

    let snapshot = pool.metrics();
    assert_eq!(snapshot.panicked, 10);
    assert_eq!(pool.backlog_size(), 0);
    pool.shutdown();

    let mut received: Vec<u32> = responses.iter().collect();
    received.sort_unstable();
    let expected: Vec<u32> = (0..30).filter(|n| n % 3 != 0).collect();
    assert_eq!(received, expected);
}

#[test]
fn test_multiple_typed_handlers() {
    may::config().set_workers(2);

    let pool = Pool::with_workers(3).unwrap();
    let (words, lengths) =
        pool.register(|_p: &Publisher<String>, word: String, out: &Responder<usize>| {
            let _ = out.send(word.len());
        });
    let (numbers, squares) =
        pool.register(|_p: &Publisher<u64>, n: u64, out: &Responder<u64>| {
            let _ = out.send(n * n);
        });
    assert_ne!(words.handler_id(), numbers.handler_id());

    for word in ["a", "bb", "ccc"] {
        words.publish(word.to_string());
    }
    for n in 1..=4 {
        numbers.publish(n);
    }
    pool.shutdown();

    let mut lengths: Vec<usize> = lengths.iter().collect();
    lengths.sort_unstable();
    assert_eq!(lengths, vec![1, 2, 3]);

    let mut squares: Vec<u64> = squares.iter().collect();
    squares.sort_unstable();
    assert_eq!(squares, vec![1, 4, 9, 16]);
}

#[test]
fn test_single_drain_under_concurrent_publishers() {
    may::config().set_workers(2);

    let pool = Pool::with_workers(2).unwrap();
    let (publisher, responses) =
        pool.register(|_p: &Publisher<u32>, n: u32, out: &Responder<u32>| {
            if n % 64 == 0 {
                may::coroutine::sleep(Duration::from_millis(1));
            }
            let _ = out.send(n);
        });

    let publishers: Vec<_> = (0..8u32)
        .map(|t| {
            let publisher = publisher.clone();
            std::thread::spawn(move || {
                for i in 0..500 {
                    publisher.publish(t * 500 + i);
                }
            })
        })
        .collect();
    for handle in publishers {
        handle.join().unwrap();
    }

    wait_until("pool to go idle", || {
        pool.is_idle() && pool.metrics().completed == 4000
    });
    wait_until("drain to exit", || pool.metrics().active_drains == 0);
    let snapshot = pool.metrics();
    assert_eq!(snapshot.submitted, 4000);
    assert_eq!(snapshot.completed, 4000);
    assert_eq!(
        snapshot.direct_handoffs + snapshot.backlogged,
        snapshot.submitted
    );
    assert!(snapshot.peak_drains <= 1, "peak drains {}", snapshot.peak_drains);
    pool.shutdown();

    let received: Vec<u32> = responses.iter().collect();
    assert_eq!(received.len(), 4000);
    let counts = multiset(received);
    assert_eq!(counts.len(), 4000, "a task was delivered twice");
}

#[test]
fn test_varied_handler_delays() {
    may::config().set_workers(2);

    let pool = Pool::with_workers(4).unwrap();
    let (publisher, responses) =
        pool.register(|_p: &Publisher<u64>, n: u64, out: &Responder<u64>| {
            may::coroutine::sleep(Duration::from_micros((n * 7919) % 3000));
            let _ = out.send(n);
        });

    for n in 0..200 {
        publisher.publish(n);
    }
    let shutdown = std::thread::spawn(move || pool.shutdown());
    let mut received: Vec<u64> = responses.iter().collect();
    shutdown.join().unwrap();

    received.sort_unstable();
    assert_eq!(received, (0..200).collect::<Vec<_>>());
}

#[test]
fn test_response_channel_closed_after_shutdown() {
    may::config().set_workers(2);

    let pool = Pool::with_workers(1).unwrap();
    let (publisher, responses) =
        pool.register(|_p: &Publisher<u8>, n: u8, out: &Responder<u8>| {
            let _ = out.send(n);
        });
    publisher.publish(1);
    pool.shutdown();

    assert_eq!(responses.recv().unwrap(), 1);
    assert!(responses.recv().is_err());
}

#[test]
#[should_panic(expected = "published after the pool shut down")]
fn test_publish_after_shutdown_panics() {
    may::config().set_workers(2);

    let pool = Pool::with_workers(1).unwrap();
    let (publisher, _responses) = pool.register(|_p: &Publisher<u8>, _n: u8, _out: &Responder<()>| {});
    pool.shutdown();

    publisher.publish(1);
}

#[test]
fn test_zero_workers_is_an_error() {
    let err = Pool::with_workers(0).err().unwrap();
    assert!(matches!(err, PoolError::NoWorkers));
}

#[test]
fn test_pool_accessors() {
    may::config().set_workers(2);

    let pool = Pool::new(PoolConfig::new(3, 0x20000)).unwrap();
    assert_eq!(pool.worker_count(), 3);
    assert_eq!(pool.config().stack_size, 0x20000);
    assert_eq!(pool.backlog_size(), 0);
    assert_eq!(pool.metrics().submitted, 0);
    pool.shutdown();
}

#[test]
fn test_drop_without_shutdown_still_drains() {
    may::config().set_workers(2);

    let ran = Arc::new(AtomicUsize::new(0));
    let responses = {
        let pool = Pool::with_workers(2).unwrap();
        let counter = Arc::clone(&ran);
        let (publisher, responses) =
            pool.register(move |_p: &Publisher<u32>, n: u32, out: &Responder<u32>| {
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = out.send(n);
            });
        for n in 0..20 {
            publisher.publish(n);
        }
        responses
    };

    assert_eq!(ran.load(Ordering::SeqCst), 20);
    assert_eq!(responses.iter().count(), 20);
}
