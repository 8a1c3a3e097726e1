//! Identity types for the item graph.
//!
//! `ItemId` is a newtype over `u32` that serves as a direct index into
//! `ItemGraph`'s item slots. `PortId` packs the owning item and the port's
//! position into a single word.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Index into `ItemGraph::items`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub u32);

impl ItemId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemId({})", self.0)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Compact port identifier. High 20 bits = item index, low 12 bits = port index.
/// Supports up to ~1M items with 4096 ports each.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortId(pub u32);

impl PortId {
    const PORT_BITS: u32 = 12;
    const PORT_MASK: u32 = (1 << Self::PORT_BITS) - 1;

    /// Number of item ids that can be packed.
    pub const MAX_ITEMS: u32 = 1 << (32 - Self::PORT_BITS);
    /// Number of port indices that can be packed per item.
    pub const MAX_PORTS: usize = 1 << Self::PORT_BITS;

    /// `None` when `item` or `port_index` does not fit its bit field.
    pub fn new(item: ItemId, port_index: usize) -> Option<Self> {
        if item.0 >= Self::MAX_ITEMS || port_index >= Self::MAX_PORTS {
            return None;
        }
        Some(Self((item.0 << Self::PORT_BITS) | port_index as u32))
    }

    #[inline]
    pub fn item(self) -> ItemId {
        ItemId(self.0 >> Self::PORT_BITS)
    }

    #[inline]
    pub fn port_index(self) -> u16 {
        (self.0 & Self::PORT_MASK) as u16
    }
}

impl fmt::Debug for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PortId(item={}, port={})",
            self.item().0,
            self.port_index()
        )
    }
}

/// Handle of one registration in an output's subscriber list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub u64);
