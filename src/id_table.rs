use std::{
    fmt::{Display, Formatter},
    ops::DerefMut,
};

use bytemuck::{Pod, Zeroable};
use parking_lot::RwLock;

use crate::{ListingsError, Result, MAX_NUM_ITEMS, MAX_NUM_WORLDS};

const NUM_GAME_IDS: usize = u16::MAX as usize + 1;

/// Which of the two identifier spaces an id belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdKind {
    World,
    Item,
}

impl Display for IdKind {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Self::World => write!(f, "world"),
            Self::Item => write!(f, "item"),
        }
    }
}

/// A grow-only bijection between 16-bit game ids (0 is reserved) and dense indices in `1..=CAP`.
/// Index `i` is allocated only after `1..i` were, and never handed out again.
///
/// The layout is `repr(C)` since the item table lives in a mapped file:
/// `| highest_used_index: u32 | game_id_to_index: [u16; 65536] | index_to_game_id: [u16; CAP] |`
/// where `index_to_game_id[i - 1]` holds the game id of index `i`.
#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct IdMappings<const CAP: usize> {
    highest_used_index: u32,
    game_id_to_index: [u16; NUM_GAME_IDS],
    index_to_game_id: [u16; CAP],
}

pub(crate) type WorldIdMappings = IdMappings<MAX_NUM_WORLDS>;
pub(crate) type ItemIdMappings = IdMappings<MAX_NUM_ITEMS>;

// all fields are plain integers and both capacities are even, so there's no padding and every bit
// pattern is valid
unsafe impl Zeroable for WorldIdMappings {}
unsafe impl Pod for WorldIdMappings {}
unsafe impl Zeroable for ItemIdMappings {}
unsafe impl Pod for ItemIdMappings {}

const _: () = assert!(MAX_NUM_WORLDS % 2 == 0 && MAX_NUM_ITEMS % 2 == 0);

const _: () = assert!(size_of::<WorldIdMappings>() == 4 + 2 * NUM_GAME_IDS + 2 * MAX_NUM_WORLDS);
const _: () = assert!(size_of::<ItemIdMappings>() == 4 + 2 * NUM_GAME_IDS + 2 * MAX_NUM_ITEMS);

impl<const CAP: usize> IdMappings<CAP> {
    /// An index past `CAP` can only come from a corrupt (unverified) file, and is treated as unmapped
    #[inline]
    pub(crate) fn get(&self, game_id: u16) -> Option<u16> {
        match self.game_id_to_index[game_id as usize] {
            0 => None,
            idx if idx as usize > CAP => None,
            idx => Some(idx),
        }
    }

    pub(crate) fn game_id_of(&self, index: u16) -> Option<u16> {
        if index == 0 || index as u32 > self.highest_used_index || index as usize > CAP {
            return None;
        }
        Some(self.index_to_game_id[index as usize - 1])
    }

    pub(crate) fn len(&self) -> usize {
        self.highest_used_index as usize
    }

    pub(crate) fn is_full(&self) -> bool {
        self.highest_used_index as usize >= CAP
    }

    /// Assigns the next index to `game_id`. The caller must have checked that it's not mapped yet.
    /// An out-of-range entry left by a corrupt file is overwritten
    fn allocate(&mut self, kind: IdKind, game_id: u16) -> Result<u16> {
        if game_id == 0 {
            return Err(ListingsError::InvalidGameId(kind).into());
        }
        debug_assert!(self.get(game_id).is_none());
        if self.highest_used_index as usize + 1 > CAP {
            return Err(ListingsError::CapacityExceeded(kind, CAP).into());
        }

        self.highest_used_index += 1;
        let idx = self.highest_used_index as u16;
        self.game_id_to_index[game_id as usize] = idx;
        self.index_to_game_id[idx as usize - 1] = game_id;
        Ok(idx)
    }

    /// Checks a table we didn't build ourselves (i.e., one loaded from a file)
    pub(crate) fn verify(&self) -> std::result::Result<(), ListingsError> {
        if self.highest_used_index as usize > CAP {
            return Err(ListingsError::CorruptIdTable(format!(
                "highest_used_index={} > {CAP}",
                self.highest_used_index
            )));
        }
        for idx in 1..=self.highest_used_index as u16 {
            let game_id = self.index_to_game_id[idx as usize - 1];
            if game_id == 0 || self.game_id_to_index[game_id as usize] != idx {
                return Err(ListingsError::CorruptIdTable(format!(
                    "index {idx} maps to game id {game_id}, which maps back to {}",
                    self.game_id_to_index[game_id as usize]
                )));
            }
        }
        let num_mapped = self.game_id_to_index.iter().filter(|&&idx| idx != 0).count();
        if num_mapped != self.highest_used_index as usize {
            return Err(ListingsError::CorruptIdTable(format!(
                "{num_mapped} game ids mapped but highest_used_index={}",
                self.highest_used_index
            )));
        }
        Ok(())
    }
}

/// An [IdMappings] behind its own lock, stored in `S` (a heap box for worlds, a mapped file for items)
pub(crate) struct IdTable<S, const CAP: usize> {
    kind: IdKind,
    mappings: RwLock<S>,
}

impl<S, const CAP: usize> IdTable<S, CAP>
where
    S: DerefMut<Target = IdMappings<CAP>>,
{
    pub(crate) fn new(kind: IdKind, mappings: S) -> Self {
        Self {
            kind,
            mappings: RwLock::new(mappings),
        }
    }

    pub(crate) fn kind(&self) -> IdKind {
        self.kind
    }

    pub(crate) fn resolve(&self, game_id: u16) -> Option<u16> {
        self.mappings.read().get(game_id)
    }

    /// Returns the index of `game_id`, allocating one if it's new. The returned bool tells whether
    /// this call did the allocation
    pub(crate) fn resolve_or_allocate(&self, game_id: u16) -> Result<(u16, bool)> {
        if let Some(idx) = self.resolve(game_id) {
            return Ok((idx, false));
        }

        let mut guard = self.mappings.write();
        // someone might have beaten us to it while we weren't holding the lock
        if let Some(idx) = guard.get(game_id) {
            return Ok((idx, false));
        }
        let idx = guard.allocate(self.kind, game_id)?;
        Ok((idx, true))
    }

    /// Allocates an index for a world found on disk, failing if it already has one
    pub(crate) fn allocate_new(&self, game_id: u16) -> Result<u16> {
        let mut guard = self.mappings.write();
        if guard.get(game_id).is_some() {
            return Err(ListingsError::DuplicateWorld(game_id).into());
        }
        guard.allocate(self.kind, game_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.mappings.read().len()
    }

    /// Whether `game_id` is mapped or could still be. Only a hint, as others may allocate right after
    pub(crate) fn has_room_for(&self, game_id: u16) -> bool {
        let guard = self.mappings.read();
        guard.get(game_id).is_some() || !guard.is_full()
    }

    /// All mapped game ids, ordered by their index
    pub(crate) fn game_ids(&self) -> Vec<u16> {
        let guard = self.mappings.read();
        (1..=guard.len() as u16)
            .filter_map(|idx| guard.game_id_of(idx))
            .collect()
    }

    pub(crate) fn with_storage<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.mappings.read())
    }
}
