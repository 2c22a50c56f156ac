use std::sync::Arc;
use crate::{store::StoreInfo, BLOCK_SIZE};

// Identifies a block a peer has requested, or that we have requested from a
// peer. Small and Copy so it can live in hash sets keyed by (piece, offset).
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy)]
pub struct BlockRequest {

    pub piece_idx: usize,

    pub offset: usize,

    pub len: usize,

}

impl BlockRequest {

    #[inline]
    pub fn idx_in_piece(&self) -> usize {
        self.offset / BLOCK_SIZE
    }

    pub fn from_block(block: &Block) -> Self {
        BlockRequest { piece_idx: block.piece_idx, offset: block.offset, len: block.data.len() }
    }

    // Request is well formed with respect to the torrent's geometry: aligned
    // on a block boundary, within the piece, and no larger than one block.
    pub fn is_valid(&self, info: &StoreInfo) -> bool {
        self.piece_idx < info.num_pieces as usize
        && self.offset % BLOCK_SIZE == 0
        && self.len > 0
        && self.len <= BLOCK_SIZE
        && self.offset + self.len <= info.piece_length(self.piece_idx)
    }
}

// The bytes of a block as received from a peer, or as read from disk to
// serve one. Reads that hit the piece cache share the same backing buffer
// across peers instead of cloning it per-request.
#[derive(Debug, Clone)]
pub enum BlockData {

    Owned(Vec<u8>),

    Cached(Arc<Vec<u8>>),

}

impl std::ops::Deref for BlockData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            BlockData::Owned(v) => v,
            BlockData::Cached(v) => v,
        }
    }
}

impl BlockData {
    pub fn into_vec(self) -> Vec<u8> {
        match self {
            BlockData::Owned(v) => v,
            BlockData::Cached(v) => (*v).clone(),
        }
    }
}

impl PartialEq for BlockData {
    fn eq(&self, other: &Self) -> bool {
        self.as_ref() == other.as_ref()
    }
}
impl Eq for BlockData {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {

    pub piece_idx: usize,

    pub offset: usize,

    pub data: BlockData,

}

// Length in bytes of the block at `block_idx` within a piece of `piece_len`
// bytes. Only the final block of a piece may be shorter than BLOCK_SIZE.
pub fn block_len(piece_len: usize, block_idx: usize) -> usize {
    BLOCK_SIZE.min(piece_len - (block_idx * BLOCK_SIZE))
}

pub fn num_blocks(piece_len: usize) -> u32 {
    ((piece_len + (BLOCK_SIZE - 1)) / BLOCK_SIZE) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_len() {
        let normal_piece_len = 32_768;
        let last_piece_len = 24_930;
        let normal_block_len = 16_384;
        let last_block_len = 8546;
        assert_eq!(block_len(normal_piece_len, 0), normal_block_len);
        assert_eq!(block_len(normal_piece_len, 1), normal_block_len);
        assert_eq!(block_len(last_piece_len, 0), normal_block_len);
        assert_eq!(block_len(last_piece_len, 1), last_block_len);
    }

    #[test]
    fn test_num_blocks() {
        (0..12)
            .into_iter()
            .for_each(|i| assert_eq!(num_blocks(BLOCK_SIZE * i), i as u32));
        assert_eq!(num_blocks(BLOCK_SIZE + 500), 2);
        assert_eq!(num_blocks(BLOCK_SIZE * 5 + 1000), 6);
        assert_eq!(num_blocks(0), 0);
    }

    #[test]
    fn block_data_derefs_regardless_of_ownership() {
        let owned = BlockData::Owned(vec![1, 2, 3]);
        let cached = BlockData::Cached(Arc::new(vec![1, 2, 3]));
        assert_eq!(owned, cached);
        assert_eq!(&owned[..], &[1, 2, 3]);
    }
}
