use std::collections::BTreeMap;

use proptest::prelude::*;
use storecheck::cache::{CacheStore, SlotLayout};
use storecheck::distribution::{partition, records_per_worker, Partitioning, QueueDistribution};
use storecheck::multipass::MultiPassStore;
use storecheck::record::RelationshipRecord;

fn high_id_and_workers() -> impl Strategy<Value = (u64, usize)> {
    (1u64..50_000, 1usize..32)
}

proptest! {
    #[test]
    fn prop_every_id_has_exactly_one_owner(
        (high_id, workers) in high_id_and_workers(),
        picks in prop::collection::vec(any::<prop::sample::Index>(), 1..64),
    ) {
        let per_worker = records_per_worker(high_id, workers);
        let ranges = Partitioning::Ranges { workers, records_per_worker: per_worker };
        for pick in picks {
            let id = pick.index(high_id as usize) as u64;
            let owner = partition(id, per_worker, workers);
            prop_assert!(owner < workers);
            let owners = (0..workers).filter(|&worker| ranges.owns(worker, id)).count();
            prop_assert_eq!(owners, 1);
            if id + 1 < high_id {
                prop_assert!(owner <= partition(id + 1, per_worker, workers));
            }
        }
    }

    #[test]
    fn prop_relationships_go_to_each_endpoint_owner(
        (high_id, workers) in high_id_and_workers(),
        first in any::<prop::sample::Index>(),
        second in any::<prop::sample::Index>(),
    ) {
        let a = first.index(high_id as usize) as u64;
        let b = second.index(high_id as usize) as u64;
        let mut distributor = QueueDistribution::EndpointAffinity.distributor(workers, high_id);
        let partitioning = distributor.partitioning();
        let targets = distributor
            .targets(&RelationshipRecord::new(0, a, b, 0))
            .expect("targets in range");

        let owner_a = (0..workers).find(|&w| partitioning.owns(w, a));
        let owner_b = (0..workers).find(|&w| partitioning.owns(w, b));
        prop_assert!(owner_a.is_some_and(|w| targets.contains(&w)));
        prop_assert!(owner_b.is_some_and(|w| targets.contains(&w)));
        prop_assert_eq!(targets.len(), if owner_a == owner_b { 1 } else { 2 });
    }

    #[test]
    fn prop_cache_returns_the_last_write(
        high_id in 1u64..512,
        writes in prop::collection::vec(
            (any::<prop::sample::Index>(), 0usize..3, any::<u64>()),
            0..200,
        ),
    ) {
        let mut cache = CacheStore::new();
        cache.prepare_for_processing_of_single_store(high_id, SlotLayout::new(&[1, 1, 1]));
        let client = cache.client();
        let mut model = BTreeMap::new();
        for (pick, slot, value) in writes {
            let id = pick.index(high_id as usize) as u64;
            client.put(id, slot, value).expect("put in range");
            model.insert((id, slot), value);
        }
        for id in 0..high_id {
            for slot in 0..3 {
                let expected = model.get(&(id, slot)).copied().unwrap_or(0);
                prop_assert_eq!(client.get(id, slot).expect("get in range"), expected);
            }
        }
    }

    #[test]
    fn prop_windows_cover_every_id_once(high_id in 0u64..10_000, per_pass in 1u64..2_000) {
        let windows = MultiPassStore::windows(high_id, per_pass);
        let mut next = 0;
        for window in &windows {
            prop_assert_eq!(window.start, next);
            prop_assert!(window.end - window.start <= per_pass);
            next = window.end;
        }
        prop_assert_eq!(next, high_id);
    }
}
