//! The records stored for every `(world, item)` pair. Both are `repr(C)` and [Pod], since they are read
//! and written in-place inside the mapped shard files.

use bytemuck::{Pod, Zeroable};

use crate::{MAX_NUM_LISTINGS_PER_ITEM, MAX_NUM_MATERIA_PER_ITEM, MAX_RETAINER_NAME_LENGTH};

pub const FLAG_IS_HQ: u8 = 1 << 0;
pub const FLAG_IS_CRAFTED: u8 = 1 << 1;
pub const FLAG_IS_ON_MANNEQUIN: u8 = 1 << 2;

/// A single market offer
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct Listing {
    pub flags: u8,
    pub city: u8,
    pub dye_id: u16,
    /// packed [Materia], 0 means the slot is empty
    pub materia_ids: [u16; MAX_NUM_MATERIA_PER_ITEM],
    pub amount: u16,
    pub price_per_unit: u32,
    /// opaque bytes, zero-padded. no encoding is assumed
    pub retainer_name: [u8; MAX_RETAINER_NAME_LENGTH],
}

const _: () = assert!(size_of::<Listing>() == 44);

/// A materia melded into the listed item
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Materia {
    pub materia_index: u8,
    pub slot_index: u8,
}

impl Materia {
    pub fn pack(&self) -> u16 {
        ((self.materia_index as u16) << 8) | self.slot_index as u16
    }

    pub fn unpack(packed: u16) -> Self {
        Self {
            materia_index: (packed >> 8) as u8,
            slot_index: packed as u8,
        }
    }
}

impl Listing {
    pub fn is_hq(&self) -> bool {
        self.flags & FLAG_IS_HQ != 0
    }
    pub fn is_crafted(&self) -> bool {
        self.flags & FLAG_IS_CRAFTED != 0
    }
    pub fn is_on_mannequin(&self) -> bool {
        self.flags & FLAG_IS_ON_MANNEQUIN != 0
    }

    pub fn set_flag(&mut self, flag: u8, on: bool) {
        if on {
            self.flags |= flag;
        } else {
            self.flags &= !flag;
        }
    }

    /// Fills the materia slots from the given iterator. Anything beyond
    /// [MAX_NUM_MATERIA_PER_ITEM] is dropped, unused slots are cleared
    pub fn set_materia(&mut self, materia: impl IntoIterator<Item = Materia>) {
        self.materia_ids = [0; MAX_NUM_MATERIA_PER_ITEM];
        for (slot, m) in self.materia_ids.iter_mut().zip(materia) {
            *slot = m.pack();
        }
    }

    pub fn materia(&self) -> impl Iterator<Item = Materia> + '_ {
        self.materia_ids
            .iter()
            .filter(|&&packed| packed != 0)
            .map(|&packed| Materia::unpack(packed))
    }

    /// Copies up to [MAX_RETAINER_NAME_LENGTH] bytes of `name` and zero-fills the rest
    pub fn set_retainer_name<B: AsRef<[u8]> + ?Sized>(&mut self, name: &B) {
        let name = name.as_ref();
        let len = name.len().min(MAX_RETAINER_NAME_LENGTH);
        self.retainer_name = [0; MAX_RETAINER_NAME_LENGTH];
        self.retainer_name[..len].copy_from_slice(&name[..len]);
    }

    /// The retainer name up to (not including) the first zero byte
    pub fn retainer_name_bytes(&self) -> &[u8] {
        let len = self
            .retainer_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MAX_RETAINER_NAME_LENGTH);
        &self.retainer_name[..len]
    }
}

/// The latest known state of one item's offers in one world, as returned by
/// [ListingsStore::query_listings](crate::ListingsStore::query_listings)
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ListingsSnapshot {
    /// seconds since the unix epoch
    pub last_update_time: u64,
    pub listings: Vec<Listing>,
}

impl ListingsSnapshot {
    pub fn num_listings(&self) -> usize {
        self.listings.len()
    }
}

// the in-file record. padding is spelled out so that the layout is the natural C one and the type is Pod
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub(crate) struct ItemListings {
    pub last_update_time: u64,
    pub num_active_listings: u8,
    _padding: [u8; 3],
    pub listings: [Listing; MAX_NUM_LISTINGS_PER_ITEM],
    _tail_padding: [u8; 4],
}

pub(crate) const ITEM_LISTINGS_SIZE: usize = size_of::<ItemListings>();
const _: () = assert!(ITEM_LISTINGS_SIZE == 4416);

impl ItemListings {
    /// Replaces the whole snapshot. Slots past the new count keep stale bytes, they're unreachable
    pub(crate) fn replace(&mut self, now: u64, listings: &[Listing]) -> usize {
        let n = listings.len().min(MAX_NUM_LISTINGS_PER_ITEM);
        self.last_update_time = now;
        self.num_active_listings = n as u8;
        self.listings[..n].copy_from_slice(&listings[..n]);
        n
    }

    pub(crate) fn active(&self) -> &[Listing] {
        // the count comes from a file, don't trust it blindly
        let n = (self.num_active_listings as usize).min(MAX_NUM_LISTINGS_PER_ITEM);
        &self.listings[..n]
    }

    pub(crate) fn to_snapshot(&self) -> ListingsSnapshot {
        ListingsSnapshot {
            last_update_time: self.last_update_time,
            listings: self.active().to_vec(),
        }
    }
}
