use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use croupier::id_allocator::IdAllocator;
use croupier::storage::memory_counter::MemoryCounterStore;

async fn allocate_concurrently(store: Arc<MemoryCounterStore>, n: usize) -> BTreeSet<i64> {
    let mut handles = Vec::with_capacity(n);
    for i in 0..n {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            IdAllocator::new(store, format!("host-{i}"), 1000, Duration::from_millis(10))
                .allocate()
                .await
                .unwrap()
        }));
    }
    let mut ids = BTreeSet::new();
    for h in handles {
        assert!(ids.insert(h.await.unwrap().value()), "duplicate id allocated");
    }
    ids
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fifty_concurrent_allocations_yield_one_to_fifty() {
    let store = Arc::new(MemoryCounterStore::new());
    let ids = allocate_concurrently(store.clone(), 50).await;

    assert_eq!(ids, (1..=50).collect::<BTreeSet<i64>>());
    assert_eq!(store.rows().len(), 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn induced_conflicts_do_not_break_uniqueness() {
    let store = Arc::new(MemoryCounterStore::new());
    store.inject_conflicts(25);
    let ids = allocate_concurrently(store.clone(), 20).await;

    assert_eq!(ids, (1..=20).collect::<BTreeSet<i64>>());
    assert!(store.insert_attempts() >= 45);
}
