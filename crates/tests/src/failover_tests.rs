//! Failover Tests
//!
//! How relay failures propagate from a session to its provider, and how a caller
//! retries on the remaining providers.

use crate::fixtures::{paired_manager, pairing_list};
use relay_core::{
    config::SessionManagerConfig,
    session::{ConsumerSessionManager, FailureAction, QosSample, RelayError, SessionError},
};
use std::collections::HashSet;

/// Outcome of driving one relay through the manager with a caller-side retry loop.
struct RetryOutcome {
    served_by: Option<String>,
    attempts: usize,
}

/// Relays once, retrying on other providers while `fails` says the provider errors.
fn relay_with_retry(
    manager: &ConsumerSessionManager,
    fails: impl Fn(&str) -> Option<RelayError>,
) -> RetryOutcome {
    let epoch = manager.current_epoch();
    let mut banned = HashSet::new();
    let mut attempts = 0;

    loop {
        let lease = match manager.get_session_from_all_except(&banned, 10, epoch) {
            Ok(lease) => lease,
            Err(_) => return RetryOutcome { served_by: None, attempts },
        };
        attempts += 1;

        let provider = lease.provider_address().to_string();
        match fails(&provider) {
            Some(error) => {
                manager.session_failure(&lease, &error).unwrap();
                banned.insert(provider);
            }
            None => {
                manager.done_with_session(&lease, QosSample::default(), 0).unwrap();
                return RetryOutcome { served_by: Some(provider), attempts };
            }
        }
    }
}

#[test]
fn test_retry_reaches_healthy_provider() {
    let manager = paired_manager(1, 4, 2);

    let outcome = relay_with_retry(&manager, |provider| {
        (provider != "provider-3").then(|| RelayError::ConnectionFailed("refused".into()))
    });

    assert_eq!(outcome.served_by.as_deref(), Some("provider-3"));
    assert!(outcome.attempts <= 4);
    assert_eq!(manager.valid_addresses(), vec!["provider-3"]);

    assert_eq!(manager.get_reported_providers(1).len(), outcome.attempts - 1);
}

#[test]
fn test_retry_exhausts_when_every_provider_fails() {
    let manager = paired_manager(1, 3, 1);

    let outcome = relay_with_retry(&manager, |_| Some(RelayError::Timeout));

    assert!(outcome.served_by.is_none());
    assert_eq!(outcome.attempts, 3, "each provider is tried once");
    // Timeouts retire sessions, not providers.
    assert_eq!(manager.valid_addresses().len(), 3);
    assert_eq!(manager.stats().blocklisted_sessions, 3);
}

#[test]
fn test_classification_drives_provider_block() {
    let cases = [
        (RelayError::Timeout, FailureAction::SessionOnly),
        (RelayError::RateLimited, FailureAction::SessionOnly),
        (RelayError::Cancelled, FailureAction::SessionOnly),
        (RelayError::Rpc(-32000, "execution reverted".into()), FailureAction::SessionOnly),
        (RelayError::Rpc(-32700, "parse error".into()), FailureAction::BlockProvider),
        (RelayError::InvalidResponse("truncated body".into()), FailureAction::BlockProvider),
        (RelayError::ConnectionFailed("reset".into()), FailureAction::BlockAndReport),
        (RelayError::ProtocolViolation("wrong chain".into()), FailureAction::BlockAndReport),
    ];

    for (error, expected) in cases {
        let manager = paired_manager(1, 1, 2);
        let lease = manager.get_session(1).unwrap();
        manager.session_failure(&lease, &error).unwrap();

        assert_eq!(error.failure_action(), expected);
        assert_eq!(
            manager.blocked_addresses().len(),
            usize::from(expected.blocks_provider()),
            "{error}"
        );
        assert_eq!(
            manager.get_reported_providers(1).len(),
            usize::from(expected.reports_provider()),
            "{error}"
        );
    }
}

#[test]
fn test_failure_streak_threshold() {
    let config =
        SessionManagerConfig { sessions_per_endpoint: 4, provider_failure_threshold: Some(2) };
    let manager = ConsumerSessionManager::new(config);
    manager.update_all_providers(1, pairing_list(1, 1)).unwrap();

    let lease = manager.get_session(1).unwrap();
    manager.session_failure(&lease, &RelayError::Timeout).unwrap();
    assert!(manager.blocked_addresses().is_empty());

    let lease = manager.get_session(1).unwrap();
    manager.session_failure(&lease, &RelayError::Rpc(-32603, "internal".into())).unwrap();
    assert_eq!(manager.blocked_addresses(), vec!["provider-0"]);
    assert!(manager.get_reported_providers(1).is_empty());

    let err = manager.get_session(1).unwrap_err();
    assert_eq!(err, SessionError::EmptyPairingList { epoch: 1 });
}

#[test]
fn test_blocked_provider_keeps_in_flight_leases_usable() {
    let manager = paired_manager(1, 1, 2);
    let first = manager.get_session(3).unwrap();
    let second = manager.get_session(4).unwrap();

    manager.session_failure(&first, &RelayError::InvalidResponse("garbage".into())).unwrap();
    assert_eq!(manager.blocked_addresses(), vec!["provider-0"]);

    manager.done_with_session(&second, QosSample::default(), 12).unwrap();
    assert_eq!(second.session().accounting().cu_sum, 4);
    assert_eq!(second.session().accounting().latest_block, 12);
}

#[test]
fn test_ban_list_excluding_everything() {
    let manager = paired_manager(1, 2, 1);
    let banned: HashSet<String> = manager.valid_addresses().into_iter().collect();

    let err = manager.get_session_from_all_except(&banned, 1, 1).unwrap_err();
    assert_eq!(err, SessionError::NoAvailableSession { epoch: 1, providers: 2 });
}

#[test]
fn test_unknown_banned_addresses_are_harmless() {
    let manager = paired_manager(1, 1, 1);
    let banned = HashSet::from(["not-paired".to_string()]);

    let lease = manager.get_session_from_all_except(&banned, 1, 1).unwrap();
    assert_eq!(lease.provider_address(), "provider-0");
}
