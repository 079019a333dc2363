use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::err::Error;
use crate::options::Options;
use crate::seq::Allocator;
use crate::store::MemStore;

/// Deterministic options: no background task, no adaptive growth.
fn options() -> Options {
	Options::default()
		.with_prefetch(false)
		.with_adaptive_quantity(false)
		.with_housekeeper_interval(Duration::from_secs(60))
}

#[tokio::test]
async fn worked_example() {
	let store = Arc::new(MemStore::new());
	store.provision("FOO", 1, 5).await;
	let alloc = Allocator::new(store.clone(), options());
	// The first request reserves the block 1..=5 and issues its head
	assert_eq!(alloc.get_next_ids("FOO", 3).await.unwrap(), vec![1, 2, 3]);
	assert_eq!(store.counter_row("FOO").await, Some((6, 5)));
	// The remainder of the block is served without storage operations
	let ops = store.operations();
	assert_eq!(alloc.get_next_ids("FOO", 2).await.unwrap(), vec![4, 5]);
	assert_eq!(store.operations(), ops);
	// A drained cache forces a fresh reservation
	assert_eq!(alloc.get_next_ids("FOO", 1).await.unwrap(), vec![6]);
	assert_eq!(store.counter_row("FOO").await, Some((11, 5)));
}

#[tokio::test]
async fn sequential_ids_are_unique() {
	let store = Arc::new(MemStore::new());
	store.provision("BAR", 1, 7).await;
	let alloc = Allocator::new(store.clone(), options());
	let mut seen = HashSet::new();
	for _ in 0..40 {
		let id = alloc.get_id_as_long("BAR").await.unwrap();
		assert!(seen.insert(id), "id {id} was issued twice");
	}
	for _ in 0..10 {
		for id in alloc.get_next_ids("BAR", 3).await.unwrap() {
			assert!(seen.insert(id), "id {id} was issued twice");
		}
	}
	assert_eq!(seen.len(), 70);
}

#[tokio::test]
async fn oversized_requests_are_rejected() {
	let store = Arc::new(MemStore::new());
	store.provision("FOO", 1, 5).await;
	let alloc = Allocator::new(store.clone(), options());
	let err = alloc.get_next_ids("FOO", 6).await.unwrap_err();
	assert!(matches!(
		err.downcast_ref::<Error>(),
		Some(Error::QuantityExceeded {
			requested: 6,
			quantity: 5,
			..
		})
	));
	// The request was refused before any reservation was attempted
	assert_eq!(store.counter_row("FOO").await, Some((1, 5)));
}

#[tokio::test]
async fn missing_counter_rows_are_fatal() {
	let store = Arc::new(MemStore::new());
	store.provision("FOO", 1, 5).await;
	let alloc = Allocator::new(store.clone(), options());
	let err = alloc.get_next_ids("NOPE", 1).await.unwrap_err();
	assert!(matches!(err.downcast_ref::<Error>(), Some(Error::CounterRowMissing { table }) if table == "NOPE"));
}

#[tokio::test]
async fn corrupt_counter_rows_are_rejected() {
	let store = Arc::new(MemStore::new());
	store.provision("FOO", 1, 0).await;
	let alloc = Allocator::new(store.clone(), options());
	let err = alloc.get_next_ids("FOO", 1).await.unwrap_err();
	assert!(matches!(err.downcast_ref::<Error>(), Some(Error::CorruptCounterRow { .. })));
}

#[tokio::test]
async fn empty_requests_allocate_nothing() {
	let store = Arc::new(MemStore::new());
	let alloc = Allocator::new(store.clone(), options());
	assert!(alloc.get_next_ids("FOO", 0).await.unwrap().is_empty());
	assert_eq!(store.operations(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_allocators_never_overlap() {
	let store = Arc::new(MemStore::new());
	store.provision("SHARED", 0, 25).await;
	// Two allocator instances over one store model two processes
	let task = |store: Arc<MemStore>| async move {
		let alloc = Allocator::new(store, options());
		let mut ids = Vec::with_capacity(100);
		for _ in 0..100 {
			ids.push(alloc.get_id_as_long("SHARED").await.unwrap());
		}
		ids
	};
	let one = tokio::spawn(task(store.clone()));
	let two = tokio::spawn(task(store.clone()));
	let (one, two) = tokio::try_join!(one, two).unwrap();
	let mut seen = HashSet::new();
	for id in one.into_iter().chain(two) {
		assert!(seen.insert(id), "id {id} was issued twice");
	}
	assert_eq!(seen.len(), 200);
	// Every reservation advanced the shared counter row
	let (next_id, _) = store.counter_row("SHARED").await.unwrap();
	assert_eq!(next_id, 200);
}

#[tokio::test]
async fn forced_refills_in_quick_succession_grow_the_quantity() {
	let store = Arc::new(MemStore::new());
	store.provision("GROW", 1, 5).await;
	let opts = options().with_adaptive_quantity(true);
	let alloc = Allocator::new(store.clone(), opts);
	// First forced refill, nothing to compare against yet
	assert_eq!(alloc.get_next_ids("GROW", 5).await.unwrap(), vec![1, 2, 3, 4, 5]);
	assert_eq!(store.counter_row("GROW").await, Some((6, 5)));
	// A second forced refill well inside the housekeeper interval signals
	// that consumption outpaces the background task
	tokio::time::sleep(Duration::from_millis(5)).await;
	assert_eq!(alloc.get_next_ids("GROW", 5).await.unwrap(), vec![6, 7, 8, 9, 10]);
	let (next_id, quantity) = store.counter_row("GROW").await.unwrap();
	assert!(quantity > 5, "the block quantity should have grown, found {quantity}");
	// The grown quantity was persisted and the counter advanced by it
	assert_eq!(next_id, 6 + quantity);
}

#[tokio::test]
async fn static_quantities_never_grow() {
	let store = Arc::new(MemStore::new());
	store.provision("FLAT", 1, 5).await;
	let alloc = Allocator::new(store.clone(), options());
	alloc.get_next_ids("FLAT", 5).await.unwrap();
	tokio::time::sleep(Duration::from_millis(5)).await;
	alloc.get_next_ids("FLAT", 5).await.unwrap();
	assert_eq!(store.counter_row("FLAT").await, Some((11, 5)));
}

#[tokio::test]
async fn cached_ids_are_wasted_not_reissued() {
	let store = Arc::new(MemStore::new());
	store.provision("CRASH", 1, 5).await;
	// The first allocator reserves 1..=5 but only issues the first id
	let alloc = Allocator::new(store.clone(), options());
	assert_eq!(alloc.get_id_as_long("CRASH").await.unwrap(), 1);
	drop(alloc);
	// A fresh allocator models a process restart; the lost block stays lost
	let alloc = Allocator::new(store.clone(), options());
	assert_eq!(alloc.get_next_ids("CRASH", 2).await.unwrap(), vec![6, 7]);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn housekeeper_refills_drained_caches() {
	let store = Arc::new(MemStore::new());
	store.provision("WARM", 1, 10).await;
	let opts = options().with_prefetch(true).with_housekeeper_interval(Duration::from_millis(100));
	let alloc = Allocator::new(store.clone(), opts);
	// Drain the cache below its quantity target
	assert_eq!(alloc.get_next_ids("WARM", 8).await.unwrap().len(), 8);
	assert_eq!(store.counter_row("WARM").await, Some((11, 10)));
	// The housekeeper should reserve a fresh block without being asked
	let mut warmed = false;
	for _ in 0..50 {
		tokio::time::sleep(Duration::from_millis(50)).await;
		if store.counter_row("WARM").await == Some((21, 10)) {
			warmed = true;
			break;
		}
	}
	assert!(warmed, "the housekeeper never refilled the cache");
	// The topped-up cache now serves requests without storage operations
	let ops = store.operations();
	assert_eq!(alloc.get_next_ids("WARM", 2).await.unwrap(), vec![9, 10]);
	assert_eq!(store.operations(), ops);
	alloc.stop();
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn stopping_halts_the_housekeeper() {
	let store = Arc::new(MemStore::new());
	store.provision("HALT", 1, 10).await;
	let opts = options().with_prefetch(true).with_housekeeper_interval(Duration::from_millis(50));
	let alloc = Allocator::new(store.clone(), opts);
	alloc.get_next_ids("HALT", 8).await.unwrap();
	alloc.stop();
	// With the housekeeper stopped the drained cache stays drained
	tokio::time::sleep(Duration::from_millis(300)).await;
	assert_eq!(store.counter_row("HALT").await, Some((11, 10)));
}

#[tokio::test]
async fn allocation_works_without_transactions() {
	// A store without transactional guarantees is reduced to a warning
	let store = Arc::new(MemStore::new_auto_commit());
	store.provision("FOO", 1, 5).await;
	let alloc = Allocator::new(store.clone(), options());
	assert_eq!(alloc.get_next_ids("FOO", 3).await.unwrap(), vec![1, 2, 3]);
	assert_eq!(store.counter_row("FOO").await, Some((6, 5)));
}

#[tokio::test]
async fn single_id_conversions() {
	let store = Arc::new(MemStore::new());
	store.provision("CONV", 1, 10).await;
	let alloc = Allocator::new(store.clone(), options());
	assert_eq!(alloc.get_id_as_int("CONV").await.unwrap(), 1);
	assert_eq!(alloc.get_id_as_long("CONV").await.unwrap(), 2);
	assert_eq!(alloc.get_id_as_decimal("CONV").await.unwrap(), Decimal::from(3));
	assert_eq!(alloc.get_id_as_string("CONV").await.unwrap(), "4");
}

#[tokio::test]
async fn narrow_conversions_fail_out_of_range() {
	let store = Arc::new(MemStore::new());
	store.provision("BIG", i64::from(i32::MAX) + 1, 5).await;
	let alloc = Allocator::new(store.clone(), options());
	let err = alloc.get_id_as_int("BIG").await.unwrap_err();
	assert!(matches!(err.downcast_ref::<Error>(), Some(Error::IdOutOfRange { .. })));
	// The id itself was allocated; only the conversion was refused
	assert_eq!(alloc.get_id_as_long("BIG").await.unwrap(), i64::from(i32::MAX) + 2);
}
