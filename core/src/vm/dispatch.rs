use serde::{Deserialize, Serialize};

use crate::util::fast_map::FastHashMap;

/// How many variant tags fit in one packed SELECT key (8 bits each).
pub const MAX_SELECT_KEYS: usize = 8;

/// Pack several variant tags into one fixed-width vector key. Returns
/// `None` when more scrutinees are supplied than the key can carry.
pub fn pack_tags(tags: &[u8]) -> Option<u64> {
    if tags.len() > MAX_SELECT_KEYS {
        return None;
    }
    let mut key = 0u64;
    for (i, tag) in tags.iter().enumerate() {
        key |= (*tag as u64) << (8 * i);
    }
    Some(key)
}

/// External index mapping for one branch point: scrutinee key (a single
/// variant tag, or a packed vector of several) to branch number. Built ahead
/// of time by the front end; lookup is O(1) and allocation-free.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchTable {
    entries: FastHashMap<u64, u16>,
    default: Option<u16>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a single variant tag to a branch number.
    pub fn map_tag(mut self, tag: u8, branch: u16) -> Self {
        self.entries.insert(tag as u64, branch);
        self
    }

    /// Map a packed vector of variant tags to a branch number.
    ///
    /// # Panics
    /// Panics when more than [`MAX_SELECT_KEYS`] tags are supplied; table
    /// construction happens at program-build time, not during execution.
    pub fn map_tags(mut self, tags: &[u8], branch: u16) -> Self {
        let key = pack_tags(tags).expect("too many scrutinees for one dispatch key");
        self.entries.insert(key, branch);
        self
    }

    /// Declare the wildcard branch taken when no mapping matches.
    pub fn with_default(mut self, branch: u16) -> Self {
        self.default = Some(branch);
        self
    }

    #[inline]
    pub fn lookup(&self, key: u64) -> Option<u16> {
        self.entries.get(&key).copied().or(self.default)
    }
}
