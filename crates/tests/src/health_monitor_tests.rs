//! Endpoint Health Monitor Tests
//!
//! The monitor runs outside the registry locks and feeds endpoint liveness back into
//! selection. These tests drive it with a probe whose answers the test controls.

use crate::fixtures::{endpoint_address, paired_manager, pairing_list};
use async_trait::async_trait;
use relay_core::session::{
    ConsumerSessionManager, Endpoint, EndpointHealthMonitor, EndpointProbe, QosSample,
    SessionError,
};
use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::broadcast;

/// Probe whose set of unreachable endpoints can be changed while the monitor runs.
#[derive(Default)]
struct ScriptedProbe {
    down: Mutex<HashSet<String>>,
}

impl ScriptedProbe {
    fn set_down(&self, endpoints: &[String]) {
        *self.down.lock().unwrap() = endpoints.iter().cloned().collect();
    }
}

#[async_trait]
impl EndpointProbe for ScriptedProbe {
    async fn probe(&self, endpoint: &Endpoint) -> bool {
        !self.down.lock().unwrap().contains(endpoint.network_address())
    }
}

fn monitor(
    manager: &Arc<ConsumerSessionManager>,
    probe: &Arc<ScriptedProbe>,
    check_interval: Duration,
) -> EndpointHealthMonitor {
    EndpointHealthMonitor::new(
        Arc::clone(manager),
        Arc::clone(probe) as Arc<dyn EndpointProbe>,
        check_interval,
        Duration::from_millis(50),
    )
}

#[tokio::test]
async fn test_unreachable_provider_leaves_selection_and_returns() {
    let manager = paired_manager(1, 2, 2);
    let probe = Arc::new(ScriptedProbe::default());
    let monitor = monitor(&manager, &probe, Duration::from_secs(60));

    probe.set_down(&[endpoint_address(0, 0)]);
    let round = monitor.check_once().await;
    assert_eq!(round.disconnected, 1);
    assert_eq!(round.changed, 1);

    for _ in 0..20 {
        let lease = manager.get_session(1).unwrap();
        assert_eq!(lease.provider_address(), "provider-1");
        manager.done_with_session(&lease, QosSample::default(), 0).unwrap();
    }

    probe.set_down(&[]);
    let round = monitor.check_once().await;
    assert_eq!(round.connected, 2);
    assert_eq!(round.changed, 1);

    let mut seen = HashSet::new();
    for _ in 0..200 {
        let lease = manager.get_session(1).unwrap();
        seen.insert(lease.provider_address().to_string());
        manager.done_with_session(&lease, QosSample::default(), 0).unwrap();
    }
    assert_eq!(seen.len(), 2, "recovered provider is selectable again");
}

#[tokio::test]
async fn test_all_endpoints_down_means_no_session() {
    let manager = paired_manager(1, 2, 1);
    let probe = Arc::new(ScriptedProbe::default());
    probe.set_down(&[endpoint_address(0, 0), endpoint_address(1, 0)]);

    monitor(&manager, &probe, Duration::from_secs(60)).check_once().await;

    let err = manager.get_session(1).unwrap_err();
    assert!(matches!(err, SessionError::NoAvailableSession { providers: 2, .. }));
}

#[tokio::test]
async fn test_monitor_follows_epoch_transitions() {
    let manager = paired_manager(1, 1, 1);
    let probe = Arc::new(ScriptedProbe::default());
    let monitor = monitor(&manager, &probe, Duration::from_secs(60));

    manager.update_all_providers(2, pairing_list(3, 1)).unwrap();
    let round = monitor.check_once().await;
    assert_eq!(round.probed, 3, "only the current generation is probed");
}

#[tokio::test]
async fn test_background_monitor_applies_probe_results() {
    let manager = paired_manager(1, 2, 1);
    let probe = Arc::new(ScriptedProbe::default());
    probe.set_down(&[endpoint_address(1, 0)]);

    let monitor = Arc::new(monitor(&manager, &probe, Duration::from_millis(10)));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = monitor.start_with_shutdown(shutdown_rx);

    let endpoint = Arc::clone(&manager.provider("provider-1").unwrap().endpoints()[0]);
    tokio::time::timeout(Duration::from_secs(2), async {
        while endpoint.is_connected() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("monitor marks the endpoint down");

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
}
