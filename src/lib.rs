//! An embeddable, file-backed store for market listings, keyed by a `(world, item)` pair and built for
//! many threads reading and writing at the same time.
//!
//! Every world gets its own shard file, which is `mmap`-ed in full and holds a fixed-size array of
//! per-item listing snapshots. World and item identifiers are 16-bit numbers coming from the outside world;
//! they are remapped to dense 1-based indices when first seen, so a shard only needs room for
//! [MAX_NUM_ITEMS] items rather than the whole identifier range. The item remapping table is itself a
//! mapped file, so item indices stay stable across restarts. The world remapping table is rebuilt on
//! every `init` from the shard filenames (each shard is named after its world id, in decimal).
//!
//! Locking is done in three tiers, always taken outermost-first: an init guard that every operation
//! holds for reading, one lock per identifier table, and one lock per world shard. Writers to one world
//! never block readers or writers of another world.
//!
//! Notes:
//! * durability is whatever the OS page cache gives us; use [ListingsStore::flush] if you need more
//! * the file layout is fixed by the constants below and the `repr(C)` records in [listing]
//!
//! Example:
//! ```
//! use listingsdb::{Config, Listing, ListingsStore, Result};
//!
//! fn main() -> Result<()> {
//!     let db = ListingsStore::open("/tmp/listingsdb-doc", Config::default())?;
//!
//!     let mut listing = Listing::default();
//!     listing.price_per_unit = 1500;
//!     listing.amount = 99;
//!     listing.set_retainer_name(b"Retainer");
//!     db.update_listings(73, 5057, &[listing]);
//!
//!     let snapshot = db.query_listings(73, 5057).unwrap();
//!     assert_eq!(snapshot.listings, vec![listing]);
//!     assert!(db.query_listings(73, 5058).is_none());
//!
//!     db.shutdown();
//!     Ok(())
//! }
//! ```

mod id_table;
pub mod listing;
mod mapping;
mod shard;
mod stats;
mod store;

pub use id_table::IdKind;
pub use listing::{
    Listing, ListingsSnapshot, Materia, FLAG_IS_CRAFTED, FLAG_IS_HQ, FLAG_IS_ON_MANNEQUIN,
};
pub use stats::Stats;
pub use store::{ListingsStore, UpdateStatus};

use std::fmt::{Display, Formatter};

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ListingsError {
    EmptyBasePath,
    BasePathTooLong(usize, usize),
    InvalidGameId(IdKind),
    CapacityExceeded(IdKind, usize),
    DuplicateWorld(u16),
    CorruptIdTable(String),
    NotInitialized,
}

impl Display for ListingsError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Self::EmptyBasePath => write!(f, "base path is empty"),
            Self::BasePathTooLong(len, max) => write!(f, "base path too long ({len} > {max})"),
            Self::InvalidGameId(kind) => write!(f, "{kind} id 0 is reserved"),
            Self::CapacityExceeded(kind, cap) => {
                write!(f, "no room for another {kind} (capacity is {cap})")
            }
            Self::DuplicateWorld(world_id) => {
                write!(f, "world {world_id} appears more than once in the base directory")
            }
            Self::CorruptIdTable(reason) => write!(f, "item id table is corrupt: {reason}"),
            Self::NotInitialized => write!(f, "store is not initialized"),
        }
    }
}

impl std::error::Error for ListingsError {}

pub type Result<T> = anyhow::Result<T>;

/// The configuration options for ListingsStore. The defaults are what you want in most cases
#[derive(Debug, Clone)]
pub struct Config {
    /// longest base path (in bytes) that `init` accepts
    pub max_base_path_len: usize,
    /// whether or not `init` should create the base directory if it's missing
    pub create_base_dir: bool,
    /// whether or not to check the persisted item table for consistency when loading it
    pub verify_item_table: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_base_path_len: 1023,
            create_base_dir: true,
            verify_item_table: true,
        }
    }
}

pub const HIGHEST_WORLD_ID: u16 = u16::MAX;
pub const HIGHEST_ITEM_ID: u16 = u16::MAX;
pub const MAX_NUM_WORLDS: usize = 256;
pub const MAX_NUM_ITEMS: usize = 16384;
pub const MAX_NUM_LISTINGS_PER_ITEM: usize = 100;
pub const MAX_NUM_MATERIA_PER_ITEM: usize = 5;
pub const MAX_RETAINER_NAME_LENGTH: usize = 24;

pub(crate) const ITEM_ID_MAPPINGS_FILENAME: &str = "item_id_mappings";

// dense indices are stored as u16 in the mapping tables
const _: () = assert!(MAX_NUM_WORLDS <= u16::MAX as usize);
const _: () = assert!(MAX_NUM_ITEMS <= u16::MAX as usize);
// num_active_listings is a u8
const _: () = assert!(MAX_NUM_LISTINGS_PER_ITEM <= u8::MAX as usize);
