//! Registry Integration Tests
//!
//! Run with: cargo test --test integration_registry

use pstate_core::{
    AccountId, AccountStoreRegistry, BackendKind, ConfigError, DatabaseSettings, DeviceAddress,
    DistributionId, NoopObserver, PrometheusObserver,
};
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::tempdir;

#[test]
fn test_many_accounts_many_threads() {
    let dir = tempdir().unwrap();
    let registry = AccountStoreRegistry::open(
        DatabaseSettings::sqlite(dir.path().join("state.db")),
        Arc::new(NoopObserver),
    )
    .unwrap();
    let accounts: Vec<AccountId> = (0..4).map(|i| AccountId::new(format!("acct-{i}"))).collect();
    let barrier = Barrier::new(accounts.len() * 4);

    let handles: Vec<Vec<_>> = thread::scope(|scope| {
        let spawned: Vec<_> = accounts
            .iter()
            .flat_map(|account| std::iter::repeat(account).take(4))
            .map(|account| {
                let registry = &registry;
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    let store = registry.get(account).unwrap();
                    let dist = DistributionId::new(format!("dist-{account}"));
                    store
                        .sender_key_shared()
                        .mark_distributed(&dist, [&DeviceAddress::new("alice", 1)])
                        .unwrap();
                    store
                })
            })
            .collect();
        spawned
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Vec<_>>()
            .chunks(4)
            .map(|chunk| chunk.to_vec())
            .collect()
    });

    assert_eq!(registry.cached_accounts(), accounts.len());
    for (account, stores) in accounts.iter().zip(&handles) {
        assert!(stores.iter().all(|s| Arc::ptr_eq(s, &stores[0])));
        assert_eq!(stores[0].account_id(), account);

        let dist = DistributionId::new(format!("dist-{account}"));
        assert_eq!(
            stores[0].sender_key_shared().get_recipients(&dist).unwrap().len(),
            1
        );
    }
}

#[test]
fn test_postgres_descriptor_resolves_without_connecting() {
    let registry = AccountStoreRegistry::open(
        DatabaseSettings::postgres("postgresql://127.0.0.1:1/pstate", "pstate", "secret"),
        Arc::new(NoopObserver),
    )
    .unwrap();
    assert_eq!(registry.resolve_backend_kind().unwrap(), BackendKind::Postgres);

    // Building a store does no I/O; the first statement does.
    let store = registry.get(&AccountId::new("A1")).unwrap();
    assert_eq!(store.backend_kind(), BackendKind::Postgres);
    let err = store
        .sender_key_shared()
        .get_recipients(&DistributionId::random())
        .unwrap_err();
    assert!(err.is_unavailable(), "unexpected error: {err}");
}

#[test]
fn test_postgres_without_credentials_is_fatal() {
    let settings = DatabaseSettings {
        url: "postgresql://localhost/pstate".to_string(),
        ..DatabaseSettings::default()
    };
    let err = AccountStoreRegistry::open(settings, Arc::new(NoopObserver))
        .err()
        .unwrap();
    assert_eq!(err, ConfigError::MissingCredentials(BackendKind::Postgres));
}

#[test]
fn test_prometheus_histogram_fed_by_registry() {
    let metrics = prometheus::Registry::new();
    let observer = PrometheusObserver::register("pstate", &metrics).unwrap();
    let registry =
        AccountStoreRegistry::open(DatabaseSettings::default(), Arc::new(observer)).unwrap();

    let store = registry.get(&AccountId::new("A1")).unwrap();
    store
        .sender_key_shared()
        .get_recipients(&DistributionId::random())
        .unwrap();

    let families = metrics.gather();
    assert_eq!(families[0].get_name(), "pstate_query_latency_seconds");
    let total: u64 = families[0]
        .get_metric()
        .iter()
        .map(|m| m.get_histogram().get_sample_count())
        .sum();
    assert_eq!(total, 1);
}
