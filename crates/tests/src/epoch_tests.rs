//! Epoch Transition Tests
//!
//! Verifies how the registry behaves when the epoch rolls over:
//! - Only strictly newer epochs are accepted; rejected updates change nothing
//! - Blocks, reports and bans are scoped to the epoch they were made in
//! - Leases issued before a transition can still be finalised
//! - Retired providers are dropped after a second transition

use crate::fixtures::{config, paired_manager, pairing_list, provider_pairing};
use relay_core::{
    session::{ConsumerSessionManager, QosSample, RelayError, SessionError},
    types::ProviderPairing,
};
use std::{collections::HashSet, time::Duration};

#[test]
fn test_newer_epoch_replaces_valid_addresses() {
    let manager = paired_manager(5, 2, 1);
    assert_eq!(manager.valid_addresses(), vec!["provider-0", "provider-1"]);

    manager
        .update_all_providers(6, vec![provider_pairing(7, 1), provider_pairing(8, 1)])
        .unwrap();

    assert_eq!(manager.current_epoch(), 6);
    assert_eq!(manager.valid_addresses(), vec!["provider-7", "provider-8"]);
    assert_eq!(manager.pairing_addresses(), manager.valid_addresses());
    assert!(manager.blocked_addresses().is_empty());
}

#[test]
fn test_stale_update_leaves_state_untouched() {
    let manager = paired_manager(10, 3, 2);
    assert!(manager.provider_block("provider-2", true, 10));
    let lease = manager.get_session(3).unwrap();
    let before = manager.stats();

    for stale in [0, 1, 9, 10] {
        let err = manager.update_all_providers(stale, pairing_list(8, 1)).unwrap_err();
        assert_eq!(err, SessionError::StaleEpoch { requested: stale, current: 10 });
    }

    assert_eq!(manager.stats(), before);
    assert_eq!(manager.current_epoch(), 10);
    assert_eq!(manager.blocked_addresses(), vec!["provider-2"]);
    assert_eq!(manager.get_reported_providers(10), vec!["provider-2"]);
    assert!(lease.is_active());
}

#[test]
fn test_transition_clears_blocks_and_reports() {
    let manager = paired_manager(1, 3, 1);
    manager.provider_block("provider-0", true, 1);
    manager.provider_block("provider-1", false, 1);
    assert_eq!(manager.get_reported_providers(1), vec!["provider-0"]);

    manager.update_all_providers(2, pairing_list(3, 1)).unwrap();

    assert!(manager.blocked_addresses().is_empty());
    assert_eq!(manager.valid_addresses().len(), 3);
    assert!(manager.get_reported_providers(2).is_empty());
    assert!(manager.get_reported_providers(1).is_empty(), "reports expire with the epoch");
}

#[test]
fn test_stale_bans_are_ignored() {
    let manager = paired_manager(1, 1, 2);
    manager.update_all_providers(2, pairing_list(1, 1)).unwrap();

    let banned = HashSet::from(["provider-0".to_string()]);
    let err = manager.get_session_from_all_except(&banned, 1, 2).unwrap_err();
    assert!(matches!(err, SessionError::NoAvailableSession { epoch: 2, .. }));

    let lease = manager.get_session_from_all_except(&banned, 1, 1).unwrap();
    assert_eq!(lease.provider_address(), "provider-0");
    assert_eq!(lease.epoch(), 2);
}

#[test]
fn test_block_for_past_epoch_is_ignored() {
    let manager = paired_manager(1, 2, 1);
    manager.update_all_providers(2, pairing_list(2, 1)).unwrap();

    assert!(!manager.provider_block("provider-0", true, 1));
    assert_eq!(manager.valid_addresses().len(), 2);
}

#[test]
fn test_lease_from_previous_epoch_completes_against_purge() {
    let manager = paired_manager(1, 1, 1);
    let lease = manager.get_session(25).unwrap();

    manager.update_all_providers(2, vec![provider_pairing(9, 1)]).unwrap();
    assert_eq!(manager.stats().purge_providers, 1);

    let sample = QosSample::new(Duration::from_millis(80), 1);
    manager.done_with_session(&lease, sample, 1_000).unwrap();

    let retired = manager.provider("provider-0").expect("kept in the purge generation");
    assert_eq!(retired.committed_compute_units(), 25);
    assert_eq!(retired.qos_summary().relays, 1);

    // The retired provider never re-enters selection.
    let fresh = manager.get_session(1).unwrap();
    assert_eq!(fresh.provider_address(), "provider-9");
}

#[test]
fn test_failure_from_previous_epoch_does_not_block_new_pairing() {
    let manager = paired_manager(1, 2, 1);
    let lease = manager.get_session(5).unwrap();
    let address = lease.provider_address().to_string();

    manager.update_all_providers(2, pairing_list(2, 1)).unwrap();
    manager.session_failure(&lease, &RelayError::ProtocolViolation("bad envelope".into())).unwrap();

    assert!(manager.blocked_addresses().is_empty());
    assert!(manager.get_reported_providers(2).is_empty());
    assert!(manager.valid_addresses().contains(&address));
}

#[test]
fn test_purge_generation_dropped_after_second_transition() {
    let manager = paired_manager(1, 2, 1);
    let lease = manager.get_session(1).unwrap();

    manager.update_all_providers(2, vec![provider_pairing(5, 1)]).unwrap();
    manager.update_all_providers(3, vec![provider_pairing(6, 1)]).unwrap();

    assert!(manager.provider("provider-0").is_none());
    assert!(manager.provider("provider-1").is_none());
    assert!(manager.provider("provider-5").is_some());

    // The lease keeps its provider alive and can still be finalised.
    manager.done_with_session(&lease, QosSample::default(), 0).unwrap();
    assert_eq!(lease.session().accounting().cu_sum, 1);
}

#[test]
fn test_first_pairing_must_be_after_epoch_zero() {
    let manager = ConsumerSessionManager::new(config(1));
    let err = manager.update_all_providers(0, pairing_list(1, 1)).unwrap_err();
    assert_eq!(err, SessionError::StaleEpoch { requested: 0, current: 0 });
    manager.update_all_providers(1, pairing_list(1, 1)).unwrap();
}

#[test]
fn test_compute_unit_budget_resets_each_epoch() {
    let manager = ConsumerSessionManager::new(config(2));
    let capped = |epoch: u64| -> Vec<ProviderPairing> {
        vec![provider_pairing(0, 1).with_max_compute_units(10 * epoch)]
    };

    manager.update_all_providers(1, capped(1)).unwrap();
    let lease = manager.get_session(10).unwrap();
    manager.done_with_session(&lease, QosSample::default(), 0).unwrap();
    assert!(manager.get_session(1).is_err(), "budget of epoch 1 is spent");

    manager.update_all_providers(2, capped(2)).unwrap();
    let lease = manager.get_session(20).unwrap();
    assert_eq!(lease.epoch(), 2);
}
