use std::path::{Path, PathBuf};

use bytemuck::{Pod, Zeroable};
use parking_lot::RwLock;

use crate::{
    listing::{ItemListings, Listing, ListingsSnapshot, ITEM_LISTINGS_SIZE},
    mapping::MappedFile,
    Result, MAX_NUM_ITEMS, MAX_NUM_WORLDS,
};

//
// a shard holds the listings of a single world: one fixed-size record per item index, so that an item's
// position in the file never changes and a write never needs to grow the file. the file is sparse, only
// the items that were ever written take up disk space (~4KB each)
//
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub(crate) struct WorldShard {
    // item index `i` lives at `items[i - 1]`
    items: [ItemListings; MAX_NUM_ITEMS],
}

pub(crate) const SHARD_FILE_SIZE: usize = size_of::<WorldShard>();
const _: () = assert!(SHARD_FILE_SIZE == ITEM_LISTINGS_SIZE * MAX_NUM_ITEMS);

pub(crate) struct Shard {
    pub(crate) world_id: u16,
    mmap: MappedFile<WorldShard>,
}

impl Shard {
    pub(crate) fn open(world_id: u16, filename: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            world_id,
            mmap: MappedFile::open(filename)?,
        })
    }

    pub(crate) fn filename(dir_path: &Path, world_id: u16) -> PathBuf {
        dir_path.join(world_id.to_string())
    }

    #[inline]
    fn slot(item_index: u16) -> usize {
        debug_assert!(item_index >= 1 && item_index as usize <= MAX_NUM_ITEMS);
        item_index as usize - 1
    }

    /// Copies the whole record out, so the caller can drop the lock before looking at it
    pub(crate) fn read_item(&self, item_index: u16) -> ItemListings {
        self.mmap.items[Self::slot(item_index)]
    }

    pub(crate) fn write_item(&mut self, item_index: u16, now: u64, listings: &[Listing]) -> usize {
        self.mmap.items[Self::slot(item_index)].replace(now, listings)
    }

    pub(crate) fn flush(&self) -> Result<()> {
        self.mmap.flush()
    }

    pub(crate) fn path(&self) -> &Path {
        self.mmap.path()
    }
}

/// One lock per world index, guarding both whether the shard exists and its contents
pub(crate) struct ShardTable {
    dir_path: PathBuf,
    slots: Vec<RwLock<Option<Shard>>>,
}

pub(crate) enum ShardStatus {
    Existing,
    Created,
}

impl ShardTable {
    pub(crate) fn new(dir_path: PathBuf) -> Self {
        Self {
            dir_path,
            slots: (0..MAX_NUM_WORLDS).map(|_| RwLock::new(None)).collect(),
        }
    }

    #[inline]
    fn slot(&self, world_index: u16) -> &RwLock<Option<Shard>> {
        debug_assert!(world_index >= 1 && world_index as usize <= MAX_NUM_WORLDS);
        &self.slots[world_index as usize - 1]
    }

    /// Installs a shard found while scanning the base directory. Returns false if the slot is taken
    pub(crate) fn install(&self, world_index: u16, shard: Shard) -> bool {
        let mut guard = self.slot(world_index).write();
        if guard.is_some() {
            return false;
        }
        *guard = Some(shard);
        true
    }

    /// Makes sure the shard of `world_index` is mapped, creating its file if needed. Once a shard exists this
    /// only takes the slot's read lock. If mapping fails the slot stays empty, so a later call can retry
    pub(crate) fn get_or_create(&self, world_index: u16, world_id: u16) -> Result<ShardStatus> {
        let slot = self.slot(world_index);
        if slot.read().is_some() {
            return Ok(ShardStatus::Existing);
        }

        let mut guard = slot.write();
        if guard.is_some() {
            return Ok(ShardStatus::Existing);
        }
        *guard = Some(Shard::open(
            world_id,
            Shard::filename(&self.dir_path, world_id),
        )?);
        Ok(ShardStatus::Created)
    }

    pub(crate) fn read_item(&self, world_index: u16, item_index: u16) -> Option<ItemListings> {
        self.slot(world_index)
            .read()
            .as_ref()
            .map(|shard| shard.read_item(item_index))
    }

    pub(crate) fn read_snapshot(
        &self,
        world_index: u16,
        item_index: u16,
    ) -> Option<ListingsSnapshot> {
        // build the Vec outside of the lock
        let rec = self.read_item(world_index, item_index)?;
        // every write stamps a non-zero time, so this item was never written in this world
        if rec.last_update_time == 0 {
            return None;
        }
        Some(rec.to_snapshot())
    }

    /// Returns the number of listings stored, or None if the shard isn't mapped
    pub(crate) fn write_item(
        &self,
        world_index: u16,
        item_index: u16,
        now: u64,
        listings: &[Listing],
    ) -> Option<usize> {
        self.slot(world_index)
            .write()
            .as_mut()
            .map(|shard| shard.write_item(item_index, now, listings))
    }

    pub(crate) fn num_mapped(&self) -> usize {
        self.slots.iter().filter(|slot| slot.read().is_some()).count()
    }

    pub(crate) fn flush(&self) -> Result<()> {
        for slot in self.slots.iter() {
            if let Some(shard) = slot.read().as_ref() {
                shard.flush()?;
            }
        }
        Ok(())
    }

    /// Unmaps all shards
    pub(crate) fn clear(&self) {
        for slot in self.slots.iter() {
            if let Some(shard) = slot.write().take() {
                tracing::debug!(world_id = shard.world_id, path = %shard.path().display(), "unmapped shard");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::FileExt;

    fn tempdir() -> PathBuf {
        let rand: u64 = rand::random();
        let dir = std::env::temp_dir().join(format!("listingsdb-shard-{rand}"));
        _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn listing(price: u32) -> Listing {
        let mut l = Listing::default();
        l.price_per_unit = price;
        l.amount = 1;
        l
    }

    #[test]
    fn test_shard_layout() -> Result<()> {
        let dir = tempdir();
        let table = ShardTable::new(dir.clone());

        assert!(table.read_item(3, 1).is_none());
        assert!(table.write_item(3, 1, 100, &[listing(1)]).is_none());

        assert!(matches!(table.get_or_create(3, 73)?, ShardStatus::Created));
        assert!(matches!(table.get_or_create(3, 73)?, ShardStatus::Existing));
        assert_eq!(
            std::fs::metadata(dir.join("73"))?.len(),
            SHARD_FILE_SIZE as u64
        );
        assert_eq!(table.num_mapped(), 1);

        // never written items are all zeros
        let rec = table.read_item(3, MAX_NUM_ITEMS as u16).unwrap();
        assert_eq!(rec.last_update_time, 0);
        assert!(rec.active().is_empty());

        assert_eq!(table.write_item(3, 1, 100, &[listing(5), listing(6)]), Some(2));
        assert_eq!(
            table.write_item(3, MAX_NUM_ITEMS as u16, 101, &[listing(7)]),
            Some(1)
        );
        let snap = table.read_snapshot(3, 1).unwrap();
        assert_eq!(snap.last_update_time, 100);
        assert_eq!(snap.listings, vec![listing(5), listing(6)]);
        assert_eq!(
            table.read_snapshot(3, MAX_NUM_ITEMS as u16).unwrap().listings,
            vec![listing(7)]
        );
        table.flush()?;
        table.clear();
        assert_eq!(table.num_mapped(), 0);
        assert!(table.read_item(3, 1).is_none());

        // the records are at fixed offsets in the file
        let file = std::fs::File::open(dir.join("73"))?;
        let mut buf = vec![0u8; ITEM_LISTINGS_SIZE];
        file.read_exact_at(&mut buf, 0)?;
        let first: ItemListings = bytemuck::pod_read_unaligned(&buf);
        assert_eq!(first.last_update_time, 100);
        assert_eq!(first.active(), &[listing(5), listing(6)]);
        file.read_exact_at(&mut buf, (SHARD_FILE_SIZE - ITEM_LISTINGS_SIZE) as u64)?;
        let last: ItemListings = bytemuck::pod_read_unaligned(&buf);
        assert_eq!(last.active(), &[listing(7)]);

        _ = std::fs::remove_dir_all(&dir);
        Ok(())
    }

    #[test]
    fn test_install_and_failed_create() -> Result<()> {
        let dir = tempdir();
        let table = ShardTable::new(dir.join("does-not-exist"));

        // the directory is missing, so the shard can't be created, and the slot stays empty
        assert!(table.get_or_create(1, 10).is_err());
        assert_eq!(table.num_mapped(), 0);

        let shard = Shard::open(10, Shard::filename(&dir, 10))?;
        assert!(table.install(1, shard));
        let shard = Shard::open(11, Shard::filename(&dir, 11))?;
        assert!(!table.install(1, shard));
        assert!(matches!(table.get_or_create(1, 10)?, ShardStatus::Existing));

        table.clear();
        _ = std::fs::remove_dir_all(&dir);
        Ok(())
    }
}
