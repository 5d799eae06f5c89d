mod common;

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use listingsdb::{Config, ListingsStore, Result, UpdateStatus};
use rand::random;

use crate::common::{make_listings, run_in_tempdir};

#[test]
fn test_same_key_writers() -> Result<()> {
    run_in_tempdir(|dir| {
        let db = Arc::new(ListingsStore::open(dir, Config::default())?);
        const NUM_THREADS: usize = 16;
        const WORLD_ID: u16 = 33;
        const ITEM_ID: u16 = 4444;

        // every thread writes its own set: a distinct count and prices, so any mix-up is detectable
        let sets = (0..NUM_THREADS)
            .map(|thid| make_listings(thid * 5 + 1, thid as u32 * 1000))
            .collect::<Vec<_>>();
        let sets = Arc::new(sets);

        let done = Arc::new(AtomicBool::new(false));
        let num_reads = Arc::new(AtomicUsize::new(0));

        let mut readers = vec![];
        for _ in 0..4 {
            let db = db.clone();
            let sets = sets.clone();
            let done = done.clone();
            let num_reads = num_reads.clone();
            readers.push(std::thread::spawn(move || {
                while !done.load(Ordering::Relaxed) {
                    if let Some(snap) = db.query_listings(WORLD_ID, ITEM_ID) {
                        // never a torn record: it must be one of the sets, as a whole
                        assert!(sets.iter().any(|set| *set == snap.listings), "{snap:?}");
                        num_reads.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }));
        }

        let mut writers = vec![];
        for thid in 0..NUM_THREADS {
            let db = db.clone();
            let sets = sets.clone();
            writers.push(std::thread::spawn(move || {
                for _ in 0..200 {
                    let status = db.update_listings(WORLD_ID, ITEM_ID, &sets[thid]);
                    assert_eq!(status, UpdateStatus::Updated(sets[thid].len()));
                    if random::<f32>() > 0.9 {
                        std::thread::yield_now();
                    }
                }
            }));
        }

        for thd in writers {
            thd.join().unwrap();
        }
        done.store(true, Ordering::Relaxed);
        for thd in readers {
            thd.join().unwrap();
        }

        let snap = db.query_listings(WORLD_ID, ITEM_ID).unwrap();
        assert_eq!(
            sets.iter().filter(|set| **set == snap.listings).count(),
            1
        );

        let stats = db.stats();
        println!("{stats} reads={}", num_reads.load(Ordering::Relaxed));
        assert_eq!(stats.num_worlds, 1);
        assert_eq!(stats.num_items, 1);
        assert_eq!(stats.num_created_shards, 1);
        assert_eq!(stats.num_updates, NUM_THREADS * 200);
        Ok(())
    })
}

#[test]
fn test_distinct_worlds() -> Result<()> {
    run_in_tempdir(|dir| {
        let db = Arc::new(ListingsStore::open(dir, Config::default())?);
        const NUM_THREADS: u16 = 32;
        const NUM_ITEMS: u16 = 200;

        let mut thds = vec![];
        for thid in 0..NUM_THREADS {
            let db = db.clone();
            thds.push(std::thread::spawn(move || -> Result<()> {
                let world_id = 1000 + thid;
                for item_id in 1..=NUM_ITEMS {
                    // all threads share the same items, so they race on allocating them
                    let listings = make_listings((item_id % 10) as usize + 1, world_id as u32);
                    assert_eq!(
                        db.update_listings(world_id, item_id, &listings),
                        UpdateStatus::Updated(listings.len())
                    );
                    let snap = db.query_listings(world_id, item_id).unwrap();
                    assert_eq!(snap.listings, listings);
                }
                Ok(())
            }));
        }

        for thd in thds {
            thd.join().unwrap()?;
        }

        let stats = db.stats();
        assert_eq!(stats.num_worlds, NUM_THREADS as usize);
        assert_eq!(stats.num_items, NUM_ITEMS as usize);
        assert_eq!(stats.num_mapped_shards, NUM_THREADS as usize);
        assert_eq!(stats.num_created_shards, NUM_THREADS as usize);

        for thid in 0..NUM_THREADS {
            let world_id = 1000 + thid;
            for item_id in 1..=NUM_ITEMS {
                let listings = make_listings((item_id % 10) as usize + 1, world_id as u32);
                assert_eq!(db.query_listings(world_id, item_id).unwrap().listings, listings);
            }
        }

        let mut worlds = db.known_worlds();
        worlds.sort();
        assert_eq!(worlds, (1000..1000 + NUM_THREADS).collect::<Vec<_>>());
        Ok(())
    })
}

#[test]
fn test_lazy_shard_creation_race() -> Result<()> {
    run_in_tempdir(|dir| {
        for attempt in 0..5u16 {
            let db = Arc::new(ListingsStore::open(dir, Config::default())?);
            let world_id = 500 + attempt;

            // many threads hit a brand new world at once, only one of them may create its shard
            let mut thds = vec![];
            for thid in 0..16u16 {
                let db = db.clone();
                thds.push(std::thread::spawn(move || {
                    let listings = make_listings(1, thid as u32);
                    db.update_listings(world_id, thid + 1, &listings)
                }));
            }
            for thd in thds {
                assert_eq!(thd.join().unwrap(), UpdateStatus::Updated(1));
            }

            let stats = db.stats();
            assert_eq!(stats.num_created_shards, 1, "[{attempt}] {stats}");
            for thid in 0..16u16 {
                let snap = db.query_listings(world_id, thid + 1).unwrap();
                assert_eq!(snap.listings[0].price_per_unit, thid as u32);
            }
            db.shutdown();
        }
        Ok(())
    })
}
