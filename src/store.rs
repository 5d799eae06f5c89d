use std::{
    ops::DerefMut,
    path::{Path, PathBuf},
    sync::{atomic::Ordering, Arc},
    time::{SystemTime, UNIX_EPOCH},
};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::{
    id_table::{IdKind, IdMappings, IdTable, ItemIdMappings, WorldIdMappings},
    listing::{Listing, ListingsSnapshot},
    mapping::MappedFile,
    shard::{Shard, ShardStatus, ShardTable},
    stats::{InternalStats, Stats},
    Config, ListingsError, Result, HIGHEST_WORLD_ID, ITEM_ID_MAPPINGS_FILENAME, MAX_NUM_ITEMS,
    MAX_NUM_WORLDS,
};

/// What [ListingsStore::update_listings] did with the given listings. Anything other than `Updated` means
/// nothing was written; callers that don't care can simply ignore it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    /// the snapshot was replaced, holding this many listings
    Updated(usize),
    NotInitialized,
    NoListings,
    /// world or item id 0
    InvalidId,
    /// there's no room left for another world or item
    CapacityExceeded(IdKind),
    /// the world's shard file could not be created or mapped
    ShardUnavailable,
}

// everything that exists only while the store is initialized. dropping it unmaps all files
struct OpenStore {
    dir_path: PathBuf,
    worlds: IdTable<Box<WorldIdMappings>, MAX_NUM_WORLDS>,
    items: IdTable<MappedFile<ItemIdMappings>, MAX_NUM_ITEMS>,
    shards: ShardTable,
}

impl OpenStore {
    fn load(dir_path: &Path, config: &Config) -> Result<Self> {
        let path_len = dir_path.as_os_str().len();
        // an empty path would resolve against the current directory
        if path_len == 0 {
            return Err(ListingsError::EmptyBasePath.into());
        }
        if path_len > config.max_base_path_len {
            return Err(ListingsError::BasePathTooLong(path_len, config.max_base_path_len).into());
        }
        if config.create_base_dir {
            std::fs::create_dir_all(dir_path)?;
        }

        let item_mappings =
            MappedFile::<ItemIdMappings>::open(dir_path.join(ITEM_ID_MAPPINGS_FILENAME))?;
        if config.verify_item_table {
            item_mappings.verify()?;
        }

        let store = Self {
            dir_path: dir_path.to_path_buf(),
            worlds: IdTable::new(IdKind::World, bytemuck::zeroed_box()),
            items: IdTable::new(IdKind::Item, item_mappings),
            shards: ShardTable::new(dir_path.to_path_buf()),
        };
        store.load_existing_worlds()?;
        Ok(store)
    }

    /// Shard files are named by the decimal world id. Anything else is not ours
    fn parse_world_filename(filename: &str) -> Option<u16> {
        if filename.is_empty() || !filename.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        // too many digits to fit a u64 is also out of range
        let world_id = filename.parse::<u64>().ok()?;
        if world_id == 0 || world_id > HIGHEST_WORLD_ID as u64 {
            return None;
        }
        Some(world_id as u16)
    }

    fn load_existing_worlds(&self) -> Result<()> {
        let mut found_worlds = vec![];
        for res in std::fs::read_dir(&self.dir_path)? {
            let entry = res?;
            let filename = entry.file_name();
            let Some(filename) = filename.to_str() else {
                continue;
            };
            let Ok(filetype) = entry.file_type() else {
                continue;
            };
            if filetype.is_dir() {
                continue;
            }
            let Some(world_id) = Self::parse_world_filename(filename) else {
                debug!(filename, "ignoring unrelated file");
                continue;
            };
            found_worlds.push((world_id, entry.path()));
        }

        // read_dir's order is arbitrary, this way world indices are assigned the same way every time
        found_worlds.sort();

        for (world_id, path) in found_worlds {
            // "073" and "73" are the same world
            let world_index = self.worlds.allocate_new(world_id)?;
            let shard = Shard::open(world_id, &path)?;
            if !self.shards.install(world_index, shard) {
                return Err(ListingsError::DuplicateWorld(world_id).into());
            }
            debug!(world_id, world_index, path = %path.display(), "mapped existing shard");
        }
        Ok(())
    }

    fn resolve_or_allocate<S, const CAP: usize>(
        table: &IdTable<S, CAP>,
        game_id: u16,
    ) -> std::result::Result<u16, UpdateStatus>
    where
        S: DerefMut<Target = IdMappings<CAP>>,
    {
        match table.resolve_or_allocate(game_id) {
            Ok((idx, allocated)) => {
                if allocated {
                    debug!(kind = %table.kind(), game_id, idx, "allocated new index");
                }
                Ok(idx)
            }
            Err(e) => {
                warn!(kind = %table.kind(), game_id, "refusing update: {e}");
                match e.downcast_ref::<ListingsError>() {
                    Some(ListingsError::CapacityExceeded(kind, _)) => {
                        Err(UpdateStatus::CapacityExceeded(*kind))
                    }
                    _ => Err(UpdateStatus::InvalidId),
                }
            }
        }
    }

    fn update(
        &self,
        world_id: u16,
        item_id: u16,
        listings: &[Listing],
        stats: &InternalStats,
    ) -> UpdateStatus {
        if world_id == 0 || item_id == 0 {
            return UpdateStatus::InvalidId;
        }

        // don't take a new world slot for a write that can't be stored anyway
        if self.worlds.resolve(world_id).is_none() && !self.items.has_room_for(item_id) {
            warn!(world_id, item_id, "refusing update: no room for another item");
            return UpdateStatus::CapacityExceeded(IdKind::Item);
        }

        let world_index = match Self::resolve_or_allocate(&self.worlds, world_id) {
            Ok(idx) => idx,
            Err(status) => return status,
        };
        let item_index = match Self::resolve_or_allocate(&self.items, item_id) {
            Ok(idx) => idx,
            Err(status) => return status,
        };

        match self.shards.get_or_create(world_index, world_id) {
            Ok(ShardStatus::Existing) => {}
            Ok(ShardStatus::Created) => {
                stats.num_created_shards.fetch_add(1, Ordering::Relaxed);
                debug!(world_id, world_index, "created shard");
            }
            Err(e) => {
                warn!(world_id, world_index, "failed to map shard: {e:#}");
                return UpdateStatus::ShardUnavailable;
            }
        }

        match self
            .shards
            .write_item(world_index, item_index, now_secs(), listings)
        {
            Some(n) => {
                stats.report_update(listings.len(), n);
                UpdateStatus::Updated(n)
            }
            None => UpdateStatus::ShardUnavailable,
        }
    }

    fn query(&self, world_id: u16, item_id: u16) -> Option<ListingsSnapshot> {
        let world_index = self.worlds.resolve(world_id)?;
        let item_index = self.items.resolve(item_id)?;
        self.shards.read_snapshot(world_index, item_index)
    }

    fn flush(&self) -> Result<()> {
        self.items.with_storage(|mappings| mappings.flush())?;
        self.shards.flush()
    }
}

// 0 is how a never-written record looks, so don't ever store it
fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(1, |d| d.as_secs().max(1))
}

/// The ListingsStore object. It's fully sync'ed, so share it between threads using `Arc`.
///
/// The store starts out uninitialized; [init](Self::init) maps the files under a base directory and
/// [shutdown](Self::shutdown) unmaps them again, after which it can be initialized again (with the same or a
/// different directory). Updates and queries on an uninitialized store do nothing.
pub struct ListingsStore {
    config: Arc<Config>,
    // the outermost lock: operations hold it for reading, init and shutdown for writing
    state: RwLock<Option<OpenStore>>,
    stats: Arc<InternalStats>,
}

impl ListingsStore {
    /// Creates an uninitialized store
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            state: RwLock::new(None),
            stats: Arc::new(InternalStats::default()),
        }
    }

    /// Creates a store and initializes it with the given base directory
    pub fn open(base_path: impl AsRef<Path>, config: Config) -> Result<Self> {
        let store = Self::new(config);
        store.init(base_path)?;
        Ok(store)
    }

    /// Maps the item table and every world shard found under `base_path`. Returns `Ok` right away if the
    /// store is already initialized (even if `base_path` is a different one).
    ///
    /// On failure nothing stays mapped and the store remains uninitialized, so `init` may simply be retried.
    /// Every attempt starts from a fresh directory scan.
    pub fn init(&self, base_path: impl AsRef<Path>) -> Result<()> {
        let base_path = base_path.as_ref();
        let mut guard = self.state.write();
        if guard.is_some() {
            return Ok(());
        }

        let open = match OpenStore::load(base_path, &self.config) {
            Ok(open) => open,
            Err(e) => {
                // whatever was mapped so far was dropped along with the partial store
                warn!(base_path = %base_path.display(), "init failed: {e:#}");
                return Err(e);
            }
        };

        self.stats.clear();
        info!(
            base_path = %base_path.display(),
            num_worlds = open.worlds.len(),
            num_items = open.items.len(),
            "listings store initialized"
        );
        *guard = Some(open);
        Ok(())
    }

    /// Unmaps everything and goes back to uninitialized. Calling it on an uninitialized store is a no-op
    pub fn shutdown(&self) {
        let mut guard = self.state.write();
        if let Some(open) = guard.take() {
            open.shards.clear();
            info!(base_path = %open.dir_path.display(), "listings store shut down");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state.read().is_some()
    }

    /// Replaces the listings of `item_id` in `world_id` with the given ones (at most
    /// [MAX_NUM_LISTINGS_PER_ITEM](crate::MAX_NUM_LISTINGS_PER_ITEM) are kept), and stamps the current time.
    /// New worlds and items are allocated on the fly.
    ///
    /// Nothing is written if the store is not initialized, `listings` is empty, either id is 0, there's no room
    /// for a new world or item, or the world's shard can't be mapped. The returned status tells which
    pub fn update_listings(&self, world_id: u16, item_id: u16, listings: &[Listing]) -> UpdateStatus {
        let guard = self.state.read();
        let Some(open) = guard.as_ref() else {
            return UpdateStatus::NotInitialized;
        };

        let status = if listings.is_empty() {
            UpdateStatus::NoListings
        } else {
            open.update(world_id, item_id, listings, &self.stats)
        };
        if !matches!(status, UpdateStatus::Updated(_)) {
            self.stats.num_dropped_updates.fetch_add(1, Ordering::Relaxed);
        }
        status
    }

    /// Returns a copy of the latest listings of `item_id` in `world_id`, or `None` if the store is not
    /// initialized or this pair was never written
    pub fn query_listings(&self, world_id: u16, item_id: u16) -> Option<ListingsSnapshot> {
        let guard = self.state.read();
        let open = guard.as_ref()?;
        let res = open.query(world_id, item_id);
        self.stats.report_lookup(res.is_some());
        res
    }

    /// The world ids known to the store, in order of their (internal) index
    pub fn known_worlds(&self) -> Vec<u16> {
        self.state
            .read()
            .as_ref()
            .map(|open| open.worlds.game_ids())
            .unwrap_or_default()
    }

    /// Asks the OS to write all mapped files back to disk. This is never needed for correctness, and it's
    /// costly, so use sparingly
    pub fn flush(&self) -> Result<()> {
        let guard = self.state.read();
        let Some(open) = guard.as_ref() else {
            return Err(ListingsError::NotInitialized.into());
        };
        open.flush()
    }

    /// Returns some stats, useful for debugging
    pub fn stats(&self) -> Stats {
        let mut stats = Stats::default();
        if let Some(open) = self.state.read().as_ref() {
            stats.num_worlds = open.worlds.len();
            stats.num_items = open.items.len();
            stats.num_mapped_shards = open.shards.num_mapped();
        }
        self.stats.fill_stats(&mut stats);
        stats
    }
}
