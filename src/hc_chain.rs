use indexmap::IndexMap;

use crate::hc_blocks::{Block, BlockChunk};
use crate::hc_interface::{Digest, SimTick, GENESIS_HASH};

/// Outcome of looking up the successor of a block hash.
#[derive(Debug, PartialEq)]
pub enum Lookup<'a> {
    /// the stored block whose previous hash matches
    Found(&'a Block),
    /// the walk ran into a block body this chain never stored
    Unfetched,
    /// walked back to genesis without a match
    Missing,
}

/// Append-only ledger. Blocks and chunks live in arenas keyed by their hash;
/// the head and the last chunk are plain hash pointers into them.
#[derive(Clone, Debug)]
pub struct Chain {
    blocks: IndexMap<Digest, Block>,
    chunks: IndexMap<Digest, BlockChunk>,
    height: u64,
    current: Digest,
    current_chunk: Digest,
    last_chunk_height: u64,
    last_received: SimTick,
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

impl Chain {
    pub fn new() -> Self {
        Self {
            blocks: IndexMap::new(),
            chunks: IndexMap::new(),
            height: 0,
            current: GENESIS_HASH.to_string(),
            current_chunk: GENESIS_HASH.to_string(),
            last_chunk_height: 0,
            last_received: 0,
        }
    }

    /// Append on top of the head. The block is restamped with the head hash and
    /// `height + 1`; a block that already chains correctly keeps its hash.
    pub fn append(&mut self, mut block: Block) -> Digest {
        block.previous_hash = self.current.clone();
        block.height = self.height + 1;
        let hash = block.hash();
        self.blocks.insert(hash.clone(), block);
        self.height += 1;
        self.current = hash.clone();
        hash
    }

    /// Fold every block since the last chunk into a new chunk and make it the
    /// current one. Walks back from the head while blocks still point at the
    /// previous chunk.
    pub fn fold_chunk(&mut self) -> Digest {
        let mut chunk = BlockChunk::new(self.current_chunk.clone());
        let mut cursor = self.current.clone();

        while let Some(block) = self.blocks.get(&cursor) {
            if block.previous_chunk_hash != self.current_chunk {
                break;
            }
            chunk.add_member(cursor.clone());
            cursor = block.previous_hash.clone();
        }

        let hash = chunk.hash();
        self.chunks.insert(hash.clone(), chunk);
        self.current_chunk = hash.clone();
        self.last_chunk_height = self.height;
        hash
    }

    /// Drop the stored bodies of blocks folded into all but the newest `keep`
    /// chunks. The head body is never dropped. Returns how many bodies went.
    pub fn prune_folded(&mut self, keep: usize) -> usize {
        let stale = self.chunks.len().saturating_sub(keep);
        let mut pruned = 0;
        for (_, chunk) in self.chunks.iter().take(stale) {
            for member in chunk.members.iter() {
                if *member != self.current && self.blocks.shift_remove(member).is_some() {
                    pruned += 1;
                }
            }
        }
        pruned
    }

    /// True once more than `threshold` blocks were appended since the last fold.
    pub fn should_fold(&self, threshold: u64) -> bool {
        self.last_chunk_height + threshold < self.height
    }

    /// Find the stored block whose `previous_hash` is `hash`, walking back from
    /// the head at most `height` steps.
    pub fn find_by_previous(&self, hash: &str) -> Lookup<'_> {
        let mut cursor = self.current.as_str();
        for _ in 0..self.height {
            let Some(block) = self.blocks.get(cursor) else {
                return Lookup::Unfetched;
            };
            if block.previous_hash == hash {
                return Lookup::Found(block);
            }
            cursor = block.previous_hash.as_str();
        }
        Lookup::Missing
    }

    /// A block more than `gap` heights ahead of the head is implausible.
    pub fn is_suspicious_future(&self, height: u64, gap: u64) -> bool {
        self.height + gap < height
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn current_hash(&self) -> &str {
        &self.current
    }

    pub fn current_block(&self) -> Option<&Block> {
        self.blocks.get(&self.current)
    }

    pub fn current_chunk_hash(&self) -> &str {
        &self.current_chunk
    }

    pub fn current_chunk(&self) -> Option<&BlockChunk> {
        self.chunks.get(&self.current_chunk)
    }

    pub fn block(&self, hash: &str) -> Option<&Block> {
        self.blocks.get(hash)
    }

    pub fn last_chunk_height(&self) -> u64 {
        self.last_chunk_height
    }

    pub fn last_received(&self) -> SimTick {
        self.last_received
    }

    pub fn set_last_received(&mut self, tick: SimTick) {
        self.last_received = tick;
    }

    /// Blocks from the head back to genesis, or to the first pruned body.
    pub fn history(&self) -> Vec<&Block> {
        let mut out = Vec::with_capacity(self.height as usize);
        let mut cursor = self.current.as_str();
        while let Some(block) = self.blocks.get(cursor) {
            out.push(block);
            cursor = block.previous_hash.as_str();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grow(chain: &mut Chain, n: usize) -> Vec<Digest> {
        (0..n)
            .map(|i| {
                let mut block = Block::new("w", format!("a;{}", i));
                block.previous_chunk_hash = chain.current_chunk_hash().to_string();
                chain.append(block)
            })
            .collect()
    }

    #[test]
    fn test_append_links_and_increments_height() {
        let mut chain = Chain::new();
        assert_eq!(chain.current_hash(), GENESIS_HASH);

        let hashes = grow(&mut chain, 3);
        assert_eq!(chain.height(), 3);
        assert_eq!(chain.current_hash(), hashes[2]);

        let head = chain.current_block().unwrap();
        assert_eq!(head.height, 3);
        assert_eq!(head.previous_hash, hashes[1]);
        assert_eq!(chain.block(&hashes[0]).unwrap().previous_hash, GENESIS_HASH);
    }

    #[test]
    fn test_height_never_decreases() {
        let mut chain = Chain::new();
        let mut last = chain.height();
        for i in 0..10 {
            let mut block = Block::new("w", i.to_string());
            // stale stamps are overwritten by the chain
            block.height = 1;
            chain.append(block);
            assert_eq!(chain.height(), last + 1);
            last = chain.height();
        }
    }

    #[test]
    fn test_find_by_previous() {
        let mut chain = Chain::new();
        let hashes = grow(&mut chain, 4);

        match chain.find_by_previous(&hashes[1]) {
            Lookup::Found(block) => assert_eq!(block.hash(), hashes[2]),
            other => panic!("unexpected lookup {:?}", other),
        }
        match chain.find_by_previous(GENESIS_HASH) {
            Lookup::Found(block) => assert_eq!(block.height, 1),
            other => panic!("unexpected lookup {:?}", other),
        }
        // nothing follows the head
        assert_eq!(chain.find_by_previous(&hashes[3]), Lookup::Missing);
        assert_eq!(chain.find_by_previous("unknown"), Lookup::Missing);
    }

    #[test]
    fn test_fold_chunk_collects_blocks_since_last_chunk() {
        let mut chain = Chain::new();
        let first = grow(&mut chain, 3);
        assert!(!chain.should_fold(5));

        let chunk_hash = chain.fold_chunk();
        let chunk = chain.current_chunk().unwrap();
        assert_eq!(chunk.previous_chunk_hash, GENESIS_HASH);
        assert_eq!(chunk.members.len(), 3);
        assert_eq!(chunk.members.get_index(0), Some(&first[2]));
        assert_eq!(chain.last_chunk_height(), 3);

        let second = grow(&mut chain, 2);
        chain.fold_chunk();
        let chunk = chain.current_chunk().unwrap();
        assert_eq!(chunk.previous_chunk_hash, chunk_hash);
        assert_eq!(chunk.members.iter().cloned().collect::<Vec<_>>(), vec![second[1].clone(), second[0].clone()]);
    }

    #[test]
    fn test_fold_threshold_and_future_gap() {
        let mut chain = Chain::new();
        grow(&mut chain, 6);
        assert!(chain.should_fold(5));
        chain.fold_chunk();
        assert!(!chain.should_fold(5));

        assert!(!chain.is_suspicious_future(11, 5));
        assert!(chain.is_suspicious_future(12, 5));
    }

    #[test]
    fn test_pruned_bodies_are_unfetched() {
        let mut chain = Chain::new();
        let first = grow(&mut chain, 3);
        chain.fold_chunk();
        let second = grow(&mut chain, 3);
        chain.fold_chunk();
        let head = grow(&mut chain, 1);

        assert_eq!(chain.prune_folded(2), 0);
        assert_eq!(chain.prune_folded(1), 3);
        assert_eq!(chain.height(), 7);
        assert!(chain.block(&first[0]).is_none());
        assert!(chain.block(&second[0]).is_some());

        assert_eq!(chain.find_by_previous(GENESIS_HASH), Lookup::Unfetched);
        match chain.find_by_previous(&first[2]) {
            Lookup::Found(block) => assert_eq!(block.hash(), second[0]),
            other => panic!("unexpected lookup {:?}", other),
        }
        // past a pruned body nothing can be ruled out
        assert_eq!(chain.find_by_previous("unknown"), Lookup::Unfetched);
        assert_eq!(chain.history().len(), 4);
        assert_eq!(chain.history()[0].hash(), head[0]);

        // the head survives even when every chunk goes
        chain.fold_chunk();
        chain.prune_folded(0);
        assert!(chain.current_block().is_some());
    }

    #[test]
    fn test_history_walks_back_to_genesis() {
        let mut chain = Chain::new();
        let hashes = grow(&mut chain, 3);
        let history: Vec<Digest> = chain.history().iter().map(|b| b.hash()).collect();
        assert_eq!(history, vec![hashes[2].clone(), hashes[1].clone(), hashes[0].clone()]);
    }
}
