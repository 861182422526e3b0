//! Symbol Table - raw security identifier to dense symbol index.
//!
//! The table is a fixed list of configured identifiers; the position of
//! an identifier is its symbol index. When the same identifier appears in
//! more than one slot the highest slot wins, matching a linear scan that
//! does not stop at the first hit.

use rustc_hash::FxHashMap;

use crate::types::NUM_SYMBOLS;

/// Static identifier → index mapping, rebuilt only on configuration.
#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
    /// Raw identifiers by slot
    slots: Vec<u32>,
    /// Identifier -> winning slot
    index: FxHashMap<u32, u8>,
}

impl SymbolTable {
    /// Build a table from identifiers in slot order.
    ///
    /// Slots beyond [`NUM_SYMBOLS`] are ignored.
    pub fn new(identifiers: &[u32]) -> Self {
        let slots: Vec<u32> = identifiers.iter().copied().take(NUM_SYMBOLS).collect();
        let mut index = FxHashMap::default();
        index.reserve(slots.len());
        // Later slots overwrite earlier ones
        for (slot, id) in slots.iter().enumerate() {
            index.insert(*id, slot as u8);
        }
        Self { slots, index }
    }

    /// Resolve a raw identifier, `None` when it is not configured.
    #[inline]
    pub fn lookup(&self, security_id: u32) -> Option<u8> {
        self.index.get(&security_id).copied()
    }

    /// Raw identifier configured at `slot`.
    #[inline]
    pub fn identifier(&self, slot: u8) -> Option<u32> {
        self.slots.get(slot as usize).copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
