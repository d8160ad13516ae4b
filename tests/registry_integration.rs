mod support;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::{sleep, timeout};

use offline_cache::{CacheError, registry::CacheHandleRegistry};

use support::*;

async fn wait_for_opens(backend: &CountingBackend, count: usize) -> Result<()> {
    timeout(Duration::from_secs(5), async {
        while backend.opens() < count {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_opens_share_one_backend_open() -> Result<()> {
    let (backend, gate) = CountingBackend::gated();
    let registry = Arc::new(CacheHandleRegistry::new(backend.clone()));

    let opens: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.open("x").await })
        })
        .collect();

    wait_for_opens(&backend, 1).await?;
    sleep(Duration::from_millis(50)).await;
    gate.add_permits(1);

    let mut handles = Vec::new();
    for open in opens {
        handles.push(open.await??);
    }

    assert_eq!(backend.opens(), 1);
    let first = &handles[0];
    assert!(handles.iter().all(|handle| Arc::ptr_eq(first, handle)));
    assert_eq!(first.name(), "x");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_open_reaches_every_waiter_and_is_retried() -> Result<()> {
    let (backend, gate) = CountingBackend::gated();
    backend.fail_next_opens(1);
    let registry = Arc::new(CacheHandleRegistry::new(backend.clone()));

    let opens: Vec<_> = (0..3)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.open("x").await })
        })
        .collect();

    wait_for_opens(&backend, 1).await?;
    sleep(Duration::from_millis(50)).await;
    gate.add_permits(1);

    for open in opens {
        match open.await? {
            Err(CacheError::Open { name, .. }) => assert_eq!(name, "x"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("open unexpectedly succeeded"),
        }
    }
    assert_eq!(backend.opens(), 1);
    assert!(registry.list_known().is_empty());

    registry.open("x").await?;
    assert_eq!(backend.opens(), 2);
    assert!(registry.list_known().contains("x"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn open_finishing_after_invalidate_is_not_memoized() -> Result<()> {
    let (backend, gate) = CountingBackend::gated();
    let registry = Arc::new(CacheHandleRegistry::new(backend.clone()));

    let open = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.open("x").await })
    };
    wait_for_opens(&backend, 1).await?;
    registry.invalidate("x");
    gate.add_permits(1);

    open.await??;
    assert!(registry.list_known().is_empty());
    Ok(())
}

#[tokio::test]
async fn names_are_independent() -> Result<()> {
    let backend = CountingBackend::new();
    let registry = CacheHandleRegistry::new(backend.clone());

    let a = registry.open("a").await?;
    let b = registry.open("b").await?;
    assert!(!Arc::ptr_eq(&a, &b));
    registry.open("a").await?;
    assert_eq!(backend.opens(), 2);
    assert_eq!(
        registry.list_known().into_iter().collect::<Vec<_>>(),
        vec!["a".to_string(), "b".to_string()]
    );
    Ok(())
}
