//! Concurrency Tests
//!
//! Many threads hammering a small pool. These check behavioural contracts that must
//! hold under any interleaving:
//! - No session is ever held by two callers at once
//! - Every optimistic debit is finalised exactly once
//! - Epoch transitions racing with selection never strand a lease
//! - Racing reports on one lease finalise it once; racing blocks take effect once
//! - Bans never leak into an epoch other than the one they were recorded in

use crate::fixtures::{paired_manager, pairing_list, provider_address};
use relay_core::session::{QosSample, RelayError, SessionError, SessionId};
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Barrier, Mutex,
    },
    thread,
};

const THREADS: usize = 8;
const ITERATIONS: usize = 500;

#[test]
fn test_no_session_is_ever_shared() {
    let manager = paired_manager(1, 2, 2);
    let held: Mutex<HashSet<(String, SessionId)>> = Mutex::new(HashSet::new());
    let completed = AtomicU64::new(0);
    let barrier = Barrier::new(THREADS);

    thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                barrier.wait();
                for _ in 0..ITERATIONS {
                    let lease = match manager.get_session(3) {
                        Ok(lease) => lease,
                        Err(SessionError::NoAvailableSession { .. }) => continue,
                        Err(e) => panic!("unexpected selection error: {e}"),
                    };
                    let key = (lease.provider_address().to_string(), lease.session_id());

                    assert!(held.lock().unwrap().insert(key.clone()), "session handed out twice");
                    thread::yield_now();
                    assert!(held.lock().unwrap().remove(&key));

                    manager.done_with_session(&lease, QosSample::default(), 0).unwrap();
                    completed.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
    });

    let stats = manager.stats();
    assert_eq!(stats.locked_sessions, 0);
    assert_eq!(stats.committed_compute_units, completed.load(Ordering::Relaxed) * 3);
    assert!(completed.load(Ordering::Relaxed) > 0);
}

#[test]
fn test_every_debit_finalised_once_under_mixed_outcomes() {
    // Large pool so failures (which retire sessions) never drain it.
    let manager = paired_manager(1, 4, 1_000);
    let committed = AtomicU64::new(0);

    thread::scope(|scope| {
        for worker in 0..THREADS {
            let manager = &manager;
            let committed = &committed;
            scope.spawn(move || {
                for i in 0..ITERATIONS / 5 {
                    let Ok(lease) = manager.get_session(2) else { continue };
                    match (worker + i) % 4 {
                        0 => manager.session_failure(&lease, &RelayError::RateLimited).unwrap(),
                        1 => drop(lease),
                        _ => {
                            manager.done_with_session(&lease, QosSample::default(), 0).unwrap();
                            committed.fetch_add(2, Ordering::Relaxed);
                        }
                    }
                }
            });
        }
    });

    let mut used = 0;
    let mut pending = 0;
    for address in manager.pairing_addresses() {
        let provider = manager.provider(&address).unwrap();
        used += provider.used_compute_units();
        pending += provider.sessions().iter().map(|s| s.accounting().latest_relay_cu).sum::<u64>();
    }

    assert_eq!(pending, 0, "no debit left pending");
    assert_eq!(manager.stats().committed_compute_units, committed.load(Ordering::Relaxed));
    assert_eq!(used, committed.load(Ordering::Relaxed), "budget holds exactly the committed CU");
}

#[test]
fn test_transitions_race_with_selection() {
    let manager = paired_manager(1, 3, 4);
    let finalised = AtomicU64::new(0);
    let barrier = Barrier::new(THREADS + 1);

    thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                barrier.wait();
                for _ in 0..ITERATIONS / 2 {
                    let Ok(lease) = manager.get_session(1) else { continue };
                    thread::yield_now();
                    manager.done_with_session(&lease, QosSample::default(), 0).unwrap();
                    assert!(!lease.is_active());
                    finalised.fetch_add(1, Ordering::Relaxed);
                }
            });
        }

        scope.spawn(|| {
            barrier.wait();
            for epoch in 2..=50 {
                manager.update_all_providers(epoch, pairing_list(3, 1)).unwrap();
                thread::yield_now();
            }
        });
    });

    assert_eq!(manager.current_epoch(), 50);
    assert_eq!(manager.stats().locked_sessions, 0);
    assert!(finalised.load(Ordering::Relaxed) > 0);
}

#[test]
fn test_racing_failure_reports_finalise_once() {
    const ROUNDS: usize = 64;
    const REPORTERS: usize = 4;
    let manager = paired_manager(1, 1, ROUNDS);

    for _ in 0..ROUNDS {
        let lease = manager.get_session(5).unwrap();
        let barrier = Barrier::new(REPORTERS);

        let results: Vec<Result<(), SessionError>> = thread::scope(|scope| {
            let reporters: Vec<_> = (0..REPORTERS)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        manager.session_failure(&lease, &RelayError::Timeout)
                    })
                })
                .collect();
            reporters.into_iter().map(|reporter| reporter.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
        for result in results.iter().filter_map(|result| result.as_ref().err()) {
            assert!(matches!(result, SessionError::AlreadyBlocklisted { .. }), "got {result}");
        }
    }

    let provider = manager.provider(&provider_address(0)).unwrap();
    assert_eq!(provider.failure_streak(), u32::try_from(ROUNDS).unwrap(), "one count per lease");
    assert_eq!(provider.blocklisted_sessions(), ROUNDS);
    assert_eq!(provider.used_compute_units(), 0);
}

#[test]
fn test_racing_completion_and_failure_finalise_once() {
    const ROUNDS: usize = 64;
    let manager = paired_manager(1, 1, ROUNDS);
    let mut completed = 0u64;
    let mut failed = 0usize;

    for _ in 0..ROUNDS {
        let lease = manager.get_session(5).unwrap();
        let barrier = Barrier::new(2);

        let (done, failure) = thread::scope(|scope| {
            let done = scope.spawn(|| {
                barrier.wait();
                manager.done_with_session(&lease, QosSample::default(), 0)
            });
            let failure = scope.spawn(|| {
                barrier.wait();
                manager.session_failure(&lease, &RelayError::RateLimited)
            });
            (done.join().unwrap(), failure.join().unwrap())
        });

        assert_ne!(done.is_ok(), failure.is_ok(), "exactly one finalisation wins");
        if done.is_ok() {
            completed += 5;
            assert!(!lease.session().is_blocklisted());
        } else {
            failed += 1;
            assert!(lease.session().is_blocklisted());
        }
        assert!(!lease.session().is_locked());
    }

    let provider = manager.provider(&provider_address(0)).unwrap();
    assert_eq!(provider.committed_compute_units(), completed);
    assert_eq!(provider.used_compute_units(), completed);
    assert_eq!(provider.blocklisted_sessions(), failed);
}

#[test]
fn test_concurrent_failures_block_provider_once() {
    let manager = paired_manager(1, 1, THREADS);
    let leases: Vec<_> = (0..THREADS).map(|_| manager.get_session(1).unwrap()).collect();
    let barrier = Barrier::new(THREADS);

    thread::scope(|scope| {
        for lease in &leases {
            let manager = &manager;
            let barrier = &barrier;
            scope.spawn(move || {
                barrier.wait();
                let error = RelayError::ConnectionFailed("connection reset".into());
                manager.session_failure(lease, &error).unwrap();
            });
        }
    });

    assert_eq!(manager.blocked_addresses(), vec![provider_address(0)]);
    assert_eq!(manager.get_reported_providers(1), vec![provider_address(0)]);
    assert!(manager.valid_addresses().is_empty());

    let stats = manager.stats();
    assert_eq!(stats.blocked_providers, 1);
    assert_eq!(stats.reported_providers, 1);
    assert_eq!(stats.blocklisted_sessions, THREADS);
}

#[test]
fn test_racing_provider_blocks_take_effect_once() {
    let manager = paired_manager(1, 2, 1);
    let accepted = AtomicU64::new(0);
    let barrier = Barrier::new(THREADS);

    thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                barrier.wait();
                if manager.provider_block(&provider_address(0), true, 1) {
                    accepted.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
    });

    assert_eq!(accepted.load(Ordering::Relaxed), 1);
    assert_eq!(manager.blocked_addresses(), vec![provider_address(0)]);
    assert_eq!(manager.get_reported_providers(1), vec![provider_address(0)]);
    assert_eq!(manager.valid_addresses(), vec![provider_address(1)]);
}

#[test]
fn test_bans_never_cross_epochs_during_transitions() {
    const SELECTORS: usize = 4;
    let manager = paired_manager(1, 1, SELECTORS);
    let banned: HashSet<String> = HashSet::from([provider_address(0)]);
    let stop = AtomicBool::new(false);
    let honoured = AtomicU64::new(0);

    thread::scope(|scope| {
        scope.spawn(|| {
            while !stop.load(Ordering::Acquire) {
                let epoch = manager.current_epoch() + 1;
                manager.update_all_providers(epoch, pairing_list(1, 1)).unwrap();
                thread::yield_now();
            }
        });

        let selectors: Vec<_> = (0..SELECTORS)
            .map(|_| {
                scope.spawn(|| {
                    for _ in 0..ITERATIONS * 20 {
                        let banned_epoch = manager.current_epoch();
                        match manager.get_session_from_all_except(&banned, 1, banned_epoch) {
                            Ok(lease) => {
                                assert_ne!(lease.epoch(), banned_epoch, "ban was not applied");
                                manager.done_with_session(&lease, QosSample::default(), 0).unwrap();
                            }
                            Err(SessionError::NoAvailableSession { epoch, .. }) => {
                                assert_eq!(epoch, banned_epoch, "ban applied to another epoch");
                                honoured.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => panic!("unexpected selection error: {e}"),
                        }
                    }
                })
            })
            .collect();

        for selector in selectors {
            selector.join().unwrap();
        }
        stop.store(true, Ordering::Release);
    });

    assert!(honoured.load(Ordering::Relaxed) > 0);
    assert!(manager.current_epoch() > 1);
}
