//! Burst scenarios shared by every blocking strategy, driven through the
//! [`Coalesce`] trait.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

use coalesce_core::traits::Coalesce;

use crate::{Coalescer, KeyedCoalescer};

const CALLERS: usize = 100;
const KEY: &str = "cacheKey";

/// Starts `CALLERS` threads that resolve `key` at the same instant and
/// returns what each of them observed.
fn burst<C>(
    cache: &Arc<C>,
    calls: &Arc<AtomicUsize>,
    key: &'static str,
    ttl: Duration,
    work: Duration,
) -> Vec<Result<usize, String>>
where
    C: Coalesce<usize, String> + 'static,
{
    let barrier = Arc::new(Barrier::new(CALLERS));
    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let cache = cache.clone();
            let calls = calls.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                cache.resolve(key, ttl, || {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    thread::sleep(work);
                    Ok(n)
                })
            })
        })
        .collect();

    handles
        .into_iter()
        .map(|h| h.join().expect("caller thread panicked"))
        .collect()
}

fn calls_operation_once<C>()
where
    C: Coalesce<usize, String> + Default + 'static,
{
    let cache = Arc::new(C::default());
    let calls = Arc::new(AtomicUsize::new(0));

    let results = burst(&cache, &calls, KEY, Duration::from_secs(1), Duration::from_millis(2));

    assert!(results.iter().all(|r| *r == Ok(1)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().requests(), CALLERS as u64);
}

fn reuses_result_across_waves<C>()
where
    C: Coalesce<usize, String> + Default + 'static,
{
    let cache = Arc::new(C::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let ttl = Duration::from_secs(1);

    for _wave in 0..2 {
        let results = burst(&cache, &calls, KEY, ttl, Duration::ZERO);
        assert!(results.iter().all(|r| *r == Ok(1)));
        // The gap between waves is well inside the TTL.
        thread::sleep(Duration::from_millis(2));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().computations, 1);
}

fn recomputes_after_expiry<C>()
where
    C: Coalesce<usize, String> + Default + 'static,
{
    let cache = Arc::new(C::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let ttl = Duration::from_millis(200);

    for expected in 1..=2 {
        let results = burst(&cache, &calls, KEY, ttl, Duration::ZERO);
        assert!(results.iter().all(|r| *r == Ok(expected)));
        // Longer than the TTL, so the next wave finds the entry stale.
        thread::sleep(Duration::from_millis(250));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

fn caches_errors<C>()
where
    C: Coalesce<usize, String> + Default + 'static,
{
    let cache = Arc::new(C::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(CALLERS));

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let cache = cache.clone();
            let calls = calls.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                cache.resolve(KEY, Duration::from_secs(1), || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(2));
                    Err("connection refused".to_string())
                })
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), Err("connection refused".to_string()));
    }
    // Still served from the cached failure.
    assert_eq!(
        cache.resolve(KEY, Duration::from_secs(1), || Ok(5)),
        Err("connection refused".to_string())
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

fn keys_resolve_independently_in_one_burst<C>()
where
    C: Coalesce<usize, String> + Default + 'static,
{
    let cache = Arc::new(C::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(CALLERS));

    let handles: Vec<_> = (0..CALLERS)
        .map(|i| {
            let cache = cache.clone();
            let calls = calls.clone();
            let barrier = barrier.clone();
            let (key, value) = if i % 2 == 0 { ("left", 10) } else { ("right", 20) };
            thread::spawn(move || {
                barrier.wait();
                let out = cache.resolve(key, Duration::from_secs(1), || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(2));
                    Ok(value)
                });
                (value, out)
            })
        })
        .collect();

    for handle in handles {
        let (expected, out) = handle.join().unwrap();
        assert_eq!(out, Ok(expected));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.stats().total_entries, 2);
}

fn keys_are_isolated<C>(keys: &[String]) -> Result<(), TestCaseError>
where
    C: Coalesce<String, ()> + Default,
{
    let cache = C::default();
    let calls = AtomicUsize::new(0);

    for key in keys {
        let out = cache.resolve(key, Duration::from_secs(60), || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("value-{key}"))
        });
        prop_assert_eq!(out, Ok(format!("value-{key}")));
    }

    let distinct: HashSet<&String> = keys.iter().collect();
    prop_assert_eq!(calls.load(Ordering::SeqCst), distinct.len());
    prop_assert_eq!(cache.stats().total_entries, distinct.len());
    Ok(())
}

macro_rules! strategy_tests {
    ($name:ident, $cache:ident) => {
        mod $name {
            use proptest::prelude::*;

            use super::*;

            #[test]
            fn test_calls_operation_once() {
                calls_operation_once::<$cache<usize, String>>();
            }

            #[test]
            fn test_reuses_result_across_waves() {
                reuses_result_across_waves::<$cache<usize, String>>();
            }

            #[test]
            fn test_recomputes_after_expiry() {
                recomputes_after_expiry::<$cache<usize, String>>();
            }

            #[test]
            fn test_caches_errors() {
                caches_errors::<$cache<usize, String>>();
            }

            #[test]
            fn test_keys_resolve_independently_in_one_burst() {
                keys_resolve_independently_in_one_burst::<$cache<usize, String>>();
            }

            proptest! {
                #[test]
                fn prop_keys_are_isolated(keys in proptest::collection::vec("[a-f]{1,2}", 1..64)) {
                    keys_are_isolated::<$cache<String, ()>>(&keys)?;
                }
            }
        }
    };
}

strategy_tests!(global, Coalescer);
strategy_tests!(keyed, KeyedCoalescer);
