use std::{
    fmt::Display,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::shard::SHARD_FILE_SIZE;

/// Stats from ListingsStore, mainly useful for debugging. Operation counters are local to the instance
/// and restart from zero on every `init`
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Stats {
    pub num_worlds: usize,
    pub num_items: usize,
    pub num_mapped_shards: usize,
    pub num_created_shards: usize,

    pub num_updates: usize,
    pub num_truncated_updates: usize,
    pub num_dropped_updates: usize,
    pub num_positive_lookups: usize,
    pub num_negative_lookups: usize,
}

impl Stats {
    pub const SHARD_FILE_SIZE: usize = SHARD_FILE_SIZE;

    /// The address space taken by the mapped shards (not the disk usage, since shard files are sparse)
    pub fn mapped_bytes(&self) -> usize {
        self.num_mapped_shards * Self::SHARD_FILE_SIZE
    }
    pub fn num_lookups(&self) -> usize {
        self.num_positive_lookups + self.num_negative_lookups
    }
}

impl Display for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f,
            "worlds={} items={} shards=[mapped={} created={}] updates=[ok={} trunc={} dropped={}] [+lkup={} -lkup={}]",
            self.num_worlds, self.num_items, self.num_mapped_shards, self.num_created_shards,
            self.num_updates, self.num_truncated_updates, self.num_dropped_updates,
            self.num_positive_lookups, self.num_negative_lookups)
    }
}

#[derive(Debug, Default)]
pub(crate) struct InternalStats {
    pub(crate) num_created_shards: AtomicUsize,

    pub(crate) num_updates: AtomicUsize,
    pub(crate) num_truncated_updates: AtomicUsize,
    pub(crate) num_dropped_updates: AtomicUsize,
    pub(crate) num_positive_lookups: AtomicUsize,
    pub(crate) num_negative_lookups: AtomicUsize,
}

impl InternalStats {
    pub(crate) fn report_update(&self, num_given: usize, num_stored: usize) {
        self.num_updates.fetch_add(1, Ordering::Relaxed);
        if num_stored < num_given {
            self.num_truncated_updates.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn report_lookup(&self, found: bool) {
        if found {
            self.num_positive_lookups.fetch_add(1, Ordering::Relaxed);
        } else {
            self.num_negative_lookups.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn clear(&self) {
        self.num_created_shards.store(0, Ordering::SeqCst);

        self.num_updates.store(0, Ordering::SeqCst);
        self.num_truncated_updates.store(0, Ordering::SeqCst);
        self.num_dropped_updates.store(0, Ordering::SeqCst);
        self.num_positive_lookups.store(0, Ordering::SeqCst);
        self.num_negative_lookups.store(0, Ordering::SeqCst);
    }

    pub(crate) fn fill_stats(&self, stats: &mut Stats) {
        stats.num_created_shards = self.num_created_shards.load(Ordering::Relaxed);

        stats.num_updates = self.num_updates.load(Ordering::Relaxed);
        stats.num_truncated_updates = self.num_truncated_updates.load(Ordering::Relaxed);
        stats.num_dropped_updates = self.num_dropped_updates.load(Ordering::Relaxed);
        stats.num_positive_lookups = self.num_positive_lookups.load(Ordering::Relaxed);
        stats.num_negative_lookups = self.num_negative_lookups.load(Ordering::Relaxed);
    }
}

#[test]
fn test_internal_stats() {
    let internal = InternalStats::default();
    internal.report_update(3, 3);
    internal.report_update(150, 100);
    internal.report_lookup(true);
    internal.report_lookup(false);
    internal.report_lookup(false);
    internal.num_dropped_updates.fetch_add(1, Ordering::Relaxed);

    let mut stats = Stats {
        num_mapped_shards: 2,
        ..Default::default()
    };
    internal.fill_stats(&mut stats);
    assert_eq!(stats.num_updates, 2);
    assert_eq!(stats.num_truncated_updates, 1);
    assert_eq!(stats.num_dropped_updates, 1);
    assert_eq!(stats.num_positive_lookups, 1);
    assert_eq!(stats.num_negative_lookups, 2);
    assert_eq!(stats.num_lookups(), 3);
    assert_eq!(stats.mapped_bytes(), 2 * Stats::SHARD_FILE_SIZE);
    assert!(stats.to_string().contains("trunc=1"));

    internal.clear();
    let mut stats = Stats::default();
    internal.fill_stats(&mut stats);
    assert_eq!(stats, Stats::default());
}
