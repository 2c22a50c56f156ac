use std::ops::Range;
use std::io::{Seek, Write};

use super::{Result, TorrentFile};

// A piece being assembled in the write buffer. Blocks arrive out of order
// from possibly multiple peers, so we track which have landed and only
// verify/flush once the whole piece is present.
#[derive(Debug)]
pub struct Piece {

    pub hash: [u8; 20],

    pub length: usize,

    // Piece bytes, written into by offset as blocks arrive.
    pub data: Vec<u8>,

    // One entry per block, true once that block has been written.
    pub blocks_received: Vec<bool>,

    pub num_blocks_received: usize,

    // Indices into StoreInfo::files that this piece overlaps.
    pub file_overlap: Range<usize>,

}

impl Piece {

    // Copies a block's bytes into the piece buffer at `offset`. A repeat
    // delivery of an already-received block is overwritten but not counted
    // twice.
    pub fn add_block(&mut self, offset: usize, data: Vec<u8>) {
        let block_idx = offset / crate::BLOCK_SIZE;
        self.data[offset..offset + data.len()].copy_from_slice(&data);
        if !self.blocks_received[block_idx] {
            self.blocks_received[block_idx] = true;
            self.num_blocks_received += 1;
        } else {
            tracing::warn!("duplicate block at offset {}", offset);
        }
    }

    // Hash the piece data and compare with hash given in metainfo.
    pub fn verify_hash(&self) -> bool {
        use sha1::Digest;
        let mut hasher = sha1::Sha1::new();
        hasher.update(&self.data);
        let digest: [u8; 20] = hasher.finalize().into();
        digest == self.hash
    }

    // Writes the piece to the file(s) it overlaps, splitting across file
    // boundaries as needed.
    pub fn write(&self, piece_offset: usize, files: &[std::sync::RwLock<TorrentFile>]) -> Result<()> {

        let mut bytes_written = 0;
        let mut total_offset = piece_offset;

        let files = &files[self.file_overlap.clone()];
        for file in files.iter() {
            let mut f = file.write()?;

            let byte_range = f.info.byte_range();
            let file_offset = total_offset - byte_range.start;
            let piece_remaining = self.length - bytes_written;
            let file_remaining = byte_range.end - total_offset;
            let n = std::cmp::min(piece_remaining, file_remaining);

            f.handle.seek(std::io::SeekFrom::Start(file_offset as u64))?;
            f.handle.write_all(&self.data[bytes_written..bytes_written + n])?;

            bytes_written += n;
            total_offset += n;
        }
        debug_assert_eq!(bytes_written, self.length);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_piece(length: usize) -> Piece {
        use sha1::Digest;
        let data = vec![7u8; length];
        let mut hasher = sha1::Sha1::new();
        hasher.update(&data);
        Piece {
            hash: hasher.finalize().into(),
            length,
            data: vec![0; length],
            blocks_received: vec![false; crate::block::num_blocks(length) as usize],
            num_blocks_received: 0,
            file_overlap: 0..1,
        }
    }

    #[test]
    fn add_block_writes_bytes_and_counts_once() {
        let mut piece = test_piece(crate::BLOCK_SIZE * 2);
        piece.add_block(0, vec![7u8; crate::BLOCK_SIZE]);
        assert_eq!(piece.num_blocks_received, 1);
        // Re-delivery of the same block does not double count.
        piece.add_block(0, vec![7u8; crate::BLOCK_SIZE]);
        assert_eq!(piece.num_blocks_received, 1);
        piece.add_block(crate::BLOCK_SIZE, vec![7u8; crate::BLOCK_SIZE]);
        assert_eq!(piece.num_blocks_received, 2);
        assert!(piece.verify_hash());
    }

    #[test]
    fn verify_hash_rejects_corrupt_data() {
        let mut piece = test_piece(crate::BLOCK_SIZE);
        piece.add_block(0, vec![7u8; crate::BLOCK_SIZE]);
        assert!(piece.verify_hash());
        piece.data[0] = 0;
        assert!(!piece.verify_hash());
    }
}
