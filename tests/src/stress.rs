//! # Registry Stress
//!
//! Concurrent add/remove churn interleaved with dispatch from separate
//! threads. The properties checked are the deterministic ones: no lost or
//! leaked registrations, a stable listener observing every dispatch of its
//! kind exactly once, and no invocations of a listener after its removal
//! has been observed.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Arc;

    use rand::{rngs::StdRng, Rng, SeedableRng};

    use packet_link::ListenerRegistry;

    use crate::support::{RadioFrame, RadioKind};

    const CHURN_THREADS: usize = 4;
    const DISPATCH_THREADS: usize = 2;
    const OPS_PER_THREAD: usize = 500;

    #[test]
    fn test_churn_and_dispatch_keep_registry_consistent() {
        let registry = Arc::new(ListenerRegistry::<RadioFrame>::new());

        // Stable sentinel: must observe every Telemetry dispatch exactly once.
        let sentinel_hits = Arc::new(AtomicU64::new(0));
        let sentinel = sentinel_hits.clone();
        registry.add(RadioKind::Telemetry, move |_p: &RadioFrame| {
            sentinel.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let telemetry_dispatches = Arc::new(AtomicU64::new(0));
        let mut handles = Vec::new();

        for thread in 0..CHURN_THREADS {
            let registry = registry.clone();
            handles.push(std::thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(thread as u64);
                let mut live = Vec::new();
                for _ in 0..OPS_PER_THREAD {
                    if live.is_empty() || rng.gen_bool(0.6) {
                        let id = registry.add(RadioKind::Pong, |_p: &RadioFrame| Ok(()));
                        live.push(id);
                    } else {
                        let index = rng.gen_range(0..live.len());
                        let id = live.swap_remove(index);
                        assert!(registry.remove(RadioKind::Pong, id));
                    }
                }
                // Leave nothing behind.
                for id in live {
                    assert!(registry.remove(RadioKind::Pong, id));
                }
            }));
        }

        for thread in 0..DISPATCH_THREADS {
            let registry = registry.clone();
            let telemetry_dispatches = telemetry_dispatches.clone();
            handles.push(std::thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(1000 + thread as u64);
                for seq in 0..OPS_PER_THREAD as u32 {
                    if rng.gen_bool(0.5) {
                        registry.dispatch(&RadioFrame::Pong { seq });
                    } else {
                        registry.dispatch(&RadioFrame::Telemetry { reading: 1 });
                        telemetry_dispatches.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }));
        }

        for handle in handles {
            handle.join().expect("worker thread panicked");
        }

        // Every churned registration was removed; only the sentinel remains.
        assert_eq!(registry.listener_count(RadioKind::Pong), 0);
        assert_eq!(registry.listener_count(RadioKind::Telemetry), 1);
        assert_eq!(
            sentinel_hits.load(Ordering::SeqCst),
            telemetry_dispatches.load(Ordering::SeqCst),
        );
        assert_eq!(registry.stats().listener_failures, 0);
    }

    #[test]
    fn test_removed_listeners_stay_silent() {
        let registry = Arc::new(ListenerRegistry::<RadioFrame>::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let mut removed = Vec::new();
        for _ in 0..32 {
            let hits = hits.clone();
            let id = registry.add(RadioKind::Pong, move |_p: &RadioFrame| {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            removed.push(id);
        }
        for id in removed {
            assert!(registry.remove(RadioKind::Pong, id));
        }

        let settled = hits.load(Ordering::SeqCst);
        assert_eq!(settled, 0);
        for seq in 0..16 {
            registry.dispatch(&RadioFrame::Pong { seq });
        }
        assert_eq!(hits.load(Ordering::SeqCst), settled);
    }

    /// Requests racing each other from many tasks: every one resolves with
    /// exactly one outcome and the registry drains back to empty.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_many_concurrent_requests_all_resolve_once() {
        use crate::support::EchoTransport;
        use packet_link::PacketLink;
        use std::time::Duration;

        let transport = Arc::new(EchoTransport::new(Duration::from_millis(1)));
        let link = Arc::new(PacketLink::new(transport.clone()));
        transport.connect(link.dispatcher());

        let mut pending = Vec::new();
        for seq in 0..64u32 {
            let link = link.clone();
            pending.push(tokio::spawn(async move {
                link.request(
                    RadioKind::Pong,
                    RadioFrame::Ping { seq },
                    Some(Duration::from_secs(5)),
                )
                .await
            }));
        }

        let mut resolved = 0;
        for task in futures::future::join_all(pending).await {
            let outcome = task.expect("task should not panic");
            // The echo answers every Ping, but each request may legally be
            // completed by any Pong; all that matters is one clean outcome.
            assert!(outcome.is_ok());
            resolved += 1;
        }

        assert_eq!(resolved, 64);
        assert_eq!(link.listener_count(RadioKind::Pong), 0);
        assert_eq!(link.request_stats().completed, 64);
    }
}
