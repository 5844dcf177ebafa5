use crate::{ImageId, IntervalKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Index of a block in the block map, stable for the whole run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlockHandle(pub u32);

impl BlockHandle {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Static information of a basic block.
///
/// Dynamic counters are kept per thread in [`crate::ThreadProfile`], indexed by
/// the block handle, so that a thread never writes into another thread's slots.
#[derive(Debug, Clone)]
pub struct Block {
    key: IntervalKey,
    static_instructions: u64,
    /// id assigned at discovery, 0 when ids are handed out on first execution
    id: u32,
    image: Option<ImageId>,
}

impl Block {
    pub fn key(&self) -> &IntervalKey {
        &self.key
    }

    pub fn static_instructions(&self) -> u64 {
        self.static_instructions
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn image(&self) -> Option<ImageId> {
        self.image
    }
}

/// Arena of all blocks ever discovered, plus an address-ordered index.
///
/// Blocks are never removed, so handles remain valid for the whole run.
#[derive(Debug, Default)]
pub struct BlockMap {
    /// in discovery order
    blocks: Vec<Block>,
    /// ordered by address range, see [`IntervalKey`]
    index: BTreeMap<IntervalKey, BlockHandle>,
    /// assign ids at discovery?
    eager_ids: bool,
    next_id: u32,
}

impl BlockMap {
    pub fn new(eager_ids: bool) -> Self {
        Self {
            blocks: vec![],
            index: BTreeMap::new(),
            eager_ids,
            next_id: 1,
        }
    }

    /// Returns the block registered for exactly this range, or creates it
    pub fn insert_or_get(
        &mut self,
        key: IntervalKey,
        static_instructions: u64,
        image: Option<ImageId>,
    ) -> BlockHandle {
        assert!(!key.is_point(), "point probe inserted into block map");
        if let Some(handle) = self.index.get(&key) {
            return *handle;
        }

        if let Some(existing) = self.find_overlap(&key) {
            let existing = self.get(existing).key();
            panic!(
                "block 0x{:x}:0x{:x} overlaps existing block 0x{:x}:0x{:x}",
                key.start(),
                key.end(),
                existing.start(),
                existing.end()
            );
        }

        let id = if self.eager_ids {
            self.next_id += 1;
            self.next_id - 1
        } else {
            0
        };
        let handle = BlockHandle(self.blocks.len() as u32);
        self.blocks.push(Block {
            key,
            static_instructions,
            id,
            image,
        });
        self.index.insert(key, handle);
        handle
    }

    /// Finds a block sharing addresses with `key` without having exactly its range
    pub fn find_overlap(&self, key: &IntervalKey) -> Option<BlockHandle> {
        // the closest block starting at or before our end must finish before our start
        let (existing, handle) = self
            .index
            .range(..=IntervalKey::point(key.end()))
            .next_back()?;
        let same_range = existing.start() == key.start() && existing.end() == key.end();
        if existing.end() >= key.start() && !same_range {
            Some(*handle)
        } else {
            None
        }
    }

    /// Finds the block whose range contains the address
    pub fn find_containing(&self, addr: u64) -> Option<BlockHandle> {
        self.index.get(&IntervalKey::point(addr)).copied()
    }

    pub fn get(&self, handle: BlockHandle) -> &Block {
        match self.blocks.get(handle.index()) {
            Some(block) => block,
            None => panic!("unknown block handle {:?}", handle),
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Blocks in discovery order
    pub fn iter(&self) -> impl Iterator<Item = (BlockHandle, &Block)> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, block)| (BlockHandle(i as u32), block))
    }

    /// Blocks in address order
    pub fn iter_by_address(&self) -> impl Iterator<Item = (BlockHandle, &Block)> {
        self.index
            .values()
            .map(|handle| (*handle, &self.blocks[handle.index()]))
    }
}

#[cfg(test)]
mod tests {
    use crate::{BlockHandle, BlockMap, ImageId, IntervalKey};

    #[test]
    fn test_insert_or_get() {
        let mut map = BlockMap::new(true);
        let a = map.insert_or_get(IntervalKey::new(0x200, 0x210, 0x14), 5, None);
        let b = map.insert_or_get(IntervalKey::new(0x100, 0x110, 0x14), 4, Some(ImageId(1)));
        let again = map.insert_or_get(IntervalKey::new(0x200, 0x210, 0x14), 5, None);
        assert_eq!(a, again);
        assert_ne!(a, b);
        assert_eq!(map.len(), 2);

        // eager ids follow discovery order
        assert_eq!(map.get(a).id(), 1);
        assert_eq!(map.get(b).id(), 2);
        assert_eq!(map.get(b).image(), Some(ImageId(1)));

        let by_address: Vec<BlockHandle> = map.iter_by_address().map(|(h, _)| h).collect();
        assert_eq!(by_address, vec![b, a]);
        let by_discovery: Vec<BlockHandle> = map.iter().map(|(h, _)| h).collect();
        assert_eq!(by_discovery, vec![a, b]);
    }

    #[test]
    fn test_lazy_ids() {
        let mut map = BlockMap::new(false);
        let a = map.insert_or_get(IntervalKey::new(0x200, 0x210, 0x14), 5, None);
        assert_eq!(map.get(a).id(), 0);
    }

    #[test]
    fn test_find_containing() {
        let mut map = BlockMap::new(true);
        let low = map.insert_or_get(IntervalKey::new(100, 150, 51), 10, None);
        let high = map.insert_or_get(IntervalKey::new(151, 200, 50), 10, None);
        assert_eq!(map.find_containing(175), Some(high));
        assert_eq!(map.find_containing(151), Some(high));
        assert_eq!(map.find_containing(150), Some(low));
        assert_eq!(map.find_containing(99), None);
        assert_eq!(map.find_containing(201), None);
    }

    #[test]
    fn test_find_overlap() {
        let mut map = BlockMap::new(true);
        let block = map.insert_or_get(IntervalKey::new(0x100, 0x150, 0x51), 10, None);
        let overlap = |start: u64, end: u64| map.find_overlap(&IntervalKey::new(start, end, 1));
        assert_eq!(overlap(0x100, 0x150), None);
        assert_eq!(overlap(0x120, 0x170), Some(block));
        assert_eq!(overlap(0x80, 0x100), Some(block));
        assert_eq!(overlap(0x80, 0x200), Some(block));
        assert_eq!(overlap(0x110, 0x120), Some(block));
        assert_eq!(overlap(0x151, 0x200), None);
        assert_eq!(overlap(0x80, 0xff), None);
    }

    #[test]
    #[should_panic]
    fn test_overlap_rejected() {
        let mut map = BlockMap::new(true);
        map.insert_or_get(IntervalKey::new(100, 150, 51), 10, None);
        map.insert_or_get(IntervalKey::new(120, 170, 51), 10, None);
    }
}
