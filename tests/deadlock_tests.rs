mod common;

#[cfg(test)]
mod tests {
    use crate::common::{setup_lock_manager, wait_for_waiters};
    use anubis::{AnubisError, LockHolder, LockMode};
    use rand::Rng;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_cross_wait_fails_the_closing_request() {
        let manager = setup_lock_manager(true);
        let h1 = Arc::new(LockHolder::new(1));
        let h2 = LockHolder::new(2);
        manager.lock(&h1, "a", LockMode::Exclusive).unwrap();
        manager.lock(&h2, "b", LockMode::Exclusive).unwrap();

        let handle = {
            let manager = manager.clone();
            let h1 = h1.clone();
            thread::spawn(move || manager.lock(&h1, "b", LockMode::Exclusive))
        };
        wait_for_waiters(&manager, &"b", 1);

        match manager.lock(&h2, "a", LockMode::Exclusive) {
            Err(AnubisError::Deadlock { holder, cycle }) => {
                assert_eq!(holder, 2);
                assert_eq!(cycle, vec![2, 1]);
            }
            other => panic!("expected Deadlock, got {:?}", other),
        }
        // The victim was granted nothing and left no edges behind.
        assert!(!h2.holds(&"a"));
        assert!(manager.wait_for_graph().successors(2).is_empty());
        assert_eq!(manager.owners(&"a"), vec![1]);

        // Rolling back the victim lets the survivor through.
        manager.unlock_all(&h2).unwrap();
        handle.join().unwrap().unwrap();
        assert_eq!(manager.owners(&"b"), vec![1]);

        manager.unlock_all(&h1).unwrap();
        assert!(manager.is_empty());
        assert!(manager.wait_for_graph().is_empty());
    }

    #[test]
    fn test_racing_cross_wait_fails_exactly_one() {
        for _ in 0..20 {
            let manager = setup_lock_manager(true);
            let barrier = Arc::new(Barrier::new(2));
            let deadlocks = Arc::new(AtomicUsize::new(0));

            let handles: Vec<_> = [(1u64, "a", "b"), (2u64, "b", "a")]
                .into_iter()
                .map(|(tx_id, first, second)| {
                    let manager = manager.clone();
                    let barrier = barrier.clone();
                    let deadlocks = deadlocks.clone();
                    thread::spawn(move || {
                        let holder = LockHolder::new(tx_id);
                        manager.lock(&holder, first, LockMode::Exclusive).unwrap();
                        barrier.wait();
                        match manager.lock(&holder, second, LockMode::Exclusive) {
                            Ok(()) => {}
                            Err(e) => {
                                assert!(e.is_deadlock(), "unexpected error {:?}", e);
                                deadlocks.fetch_add(1, Ordering::SeqCst);
                            }
                        }
                        manager.unlock_all(&holder).unwrap();
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }
            assert_eq!(deadlocks.load(Ordering::SeqCst), 1);
            assert!(manager.is_empty());
            assert!(manager.wait_for_graph().is_empty());
        }
    }

    #[test]
    fn test_wait_chain_is_not_a_deadlock() {
        let manager = setup_lock_manager(true);
        let h1 = Arc::new(LockHolder::new(1));
        let h2 = Arc::new(LockHolder::new(2));
        let h3 = LockHolder::new(3);
        manager.lock(&h1, "a", LockMode::Exclusive).unwrap();
        manager.lock(&h2, "b", LockMode::Exclusive).unwrap();
        manager.lock(&h3, "c", LockMode::Exclusive).unwrap();

        // 2 waits for 3, then 1 waits for 2.
        let t2 = {
            let manager = manager.clone();
            let h2 = h2.clone();
            thread::spawn(move || {
                manager.lock(&h2, "c", LockMode::Exclusive)?;
                manager.unlock_all(&h2)
            })
        };
        wait_for_waiters(&manager, &"c", 1);
        let t1 = {
            let manager = manager.clone();
            let h1 = h1.clone();
            thread::spawn(move || {
                manager.lock(&h1, "b", LockMode::Shared)?;
                manager.unlock_all(&h1)
            })
        };
        wait_for_waiters(&manager, &"b", 1);

        let graph = manager.wait_for_graph();
        assert_eq!(graph.successors(1), vec![2]);
        assert_eq!(graph.successors(2), vec![3]);
        assert!(graph.find_cycles().is_empty());

        manager.unlock_all(&h3).unwrap();
        t2.join().unwrap().unwrap();
        t1.join().unwrap().unwrap();
        assert!(manager.is_empty());
        assert!(manager.wait_for_graph().is_empty());
    }

    #[test]
    fn test_joint_upgrade_deadlock() {
        let manager = setup_lock_manager(true);
        let h1 = Arc::new(LockHolder::new(1));
        let h2 = LockHolder::new(2);
        manager.lock(&h1, "a", LockMode::Shared).unwrap();
        manager.lock(&h2, "a", LockMode::Shared).unwrap();

        let handle = {
            let manager = manager.clone();
            let h1 = h1.clone();
            thread::spawn(move || manager.lock(&h1, "a", LockMode::Exclusive))
        };
        wait_for_waiters(&manager, &"a", 1);

        match manager.lock(&h2, "a", LockMode::Exclusive) {
            Err(AnubisError::Deadlock { holder: 2, cycle }) => assert_eq!(cycle, vec![2, 1]),
            other => panic!("expected Deadlock, got {:?}", other),
        }
        // The failed upgrade keeps the shared hold it started from.
        assert_eq!(manager.lock_on(&h2, &"a"), LockMode::Shared);

        manager.unlock(&h2, &"a").unwrap();
        handle.join().unwrap().unwrap();
        assert_eq!(manager.mode(&"a"), LockMode::Exclusive);
        assert_eq!(manager.owners(&"a"), vec![1]);
    }

    #[test]
    fn test_reader_behind_writer_deadlock_is_detected() {
        // 1 holds a shared, 2 waits for exclusive on a, 3 holds b. When 1 asks for b
        // and 3 asks for a (queued behind the writer), the cycle 3 -> 2 -> 1 -> 3 closes.
        let manager = setup_lock_manager(true);
        let h1 = Arc::new(LockHolder::new(1));
        let h3 = LockHolder::new(3);
        manager.lock(&h1, "a", LockMode::Shared).unwrap();
        manager.lock(&h3, "b", LockMode::Exclusive).unwrap();

        let writer = {
            let manager = manager.clone();
            thread::spawn(move || {
                let h2 = LockHolder::new(2);
                manager.lock(&h2, "a", LockMode::Exclusive)?;
                manager.unlock_all(&h2)
            })
        };
        wait_for_waiters(&manager, &"a", 1);

        let reader = {
            let manager = manager.clone();
            let h1 = h1.clone();
            thread::spawn(move || manager.lock(&h1, "b", LockMode::Shared))
        };
        wait_for_waiters(&manager, &"b", 1);

        let err = manager.lock(&h3, "a", LockMode::Shared).unwrap_err();
        assert!(err.is_deadlock(), "expected Deadlock, got {:?}", err);

        manager.unlock_all(&h3).unwrap();
        reader.join().unwrap().unwrap();
        manager.unlock_all(&h1).unwrap();
        writer.join().unwrap().unwrap();
        assert!(manager.is_empty());
        assert!(manager.wait_for_graph().is_empty());
    }

    #[test]
    fn test_random_workload_terminates() {
        const THREADS: u64 = 8;
        const ROUNDS: usize = 200;
        const RESOURCES: [&str; 4] = ["a", "b", "c", "d"];

        let manager = setup_lock_manager(true);
        let barrier = Arc::new(Barrier::new(THREADS as usize));
        let committed = Arc::new(AtomicUsize::new(0));
        let aborted = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let manager = manager.clone();
                let barrier = barrier.clone();
                let committed = committed.clone();
                let aborted = aborted.clone();
                thread::spawn(move || {
                    let mut rng = rand::rng();
                    barrier.wait();
                    for round in 0..ROUNDS {
                        let holder = LockHolder::new(t + 1 + round as u64 * THREADS);
                        let mut result = Ok(());
                        for _ in 0..2 {
                            let resource = RESOURCES[rng.random_range(0..RESOURCES.len())];
                            let mode = if rng.random_bool(0.5) {
                                LockMode::Shared
                            } else {
                                LockMode::Exclusive
                            };
                            result = manager.lock(&holder, resource, mode);
                            if result.is_err() {
                                break;
                            }
                        }
                        match result {
                            Ok(()) => committed.fetch_add(1, Ordering::SeqCst),
                            Err(e) => {
                                assert!(e.is_deadlock(), "unexpected error {:?}", e);
                                aborted.fetch_add(1, Ordering::SeqCst)
                            }
                        };
                        manager.unlock_all(&holder).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        println!(
            "{} committed, {} aborted",
            committed.load(Ordering::SeqCst),
            aborted.load(Ordering::SeqCst)
        );
        assert_eq!(
            committed.load(Ordering::SeqCst) + aborted.load(Ordering::SeqCst),
            THREADS as usize * ROUNDS
        );
        assert!(manager.is_empty());
        assert!(manager.wait_for_graph().is_empty());
    }
}
