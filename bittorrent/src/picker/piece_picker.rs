use crate::Bitfield;

/*
A better strategy is to download pieces in rarest first order. The client can determine this
by keeping the initial bitfield from each peer, and updating it with every have message.
Then, the client can download the pieces that appear least frequently in these peer bitfields.
Note that any Rarest First strategy should include randomization among at least several of the
least common pieces, as having many clients all attempting to jump on the same "least common"
piece would be counter productive
*/

#[derive(Clone, Copy, Default, Debug)]
struct PieceInfo {
    // Number of peers that have this piece.
    frequency: usize,
    // Is the piece partially downloaded.
    is_partial: bool,
}

#[derive(Debug)]
pub struct PiecePicker {
    // All pieces in the torrent, idx aligned.
    pieces: Vec<PieceInfo>,
    // The pieces that we have.
    have: Bitfield,
}

impl PiecePicker {
    
    pub fn new(num_pieces: usize) -> Self {
        let mut have = Bitfield::new();
        have.resize(num_pieces, false);
        Self {
            pieces: vec![PieceInfo::default(); num_pieces],
            have,
        }
    }

    pub fn own_bitfield(&self) -> &Bitfield {
        &self.have
    }

    pub fn all(&self) -> bool {
        self.have.all()
    }
    
    pub fn set_own_bitfield(&mut self, bf: Bitfield) {
        debug_assert_eq!(bf.len(), self.have.len());
        self.have = bf;
    }

    pub fn increment_piece(&mut self, idx: usize) -> bool {
        assert!(idx < self.pieces.len());
        self.pieces[idx].frequency += 1;
        self.have[idx]
    }

    pub fn received_piece(&mut self, idx: usize) {
        assert!(idx < self.pieces.len());
        self.have.set(idx, true);
    }

    // Will return true if there is at least one piece that peer has and we don't.
    pub fn bitfield_update(&mut self, bf: &Bitfield) -> bool {
        debug_assert_eq!(bf.len(), self.have.len());
        let mut interested = false;
        bf
            .iter()
            .enumerate()
            .filter(|(_, b)| **b)
            .for_each(|(i, _)| {
                self.pieces[i].frequency += 1;
                if !self.have[i] {
                    interested = true;
                }
        });
        interested
    }

    // Rarest-first: among pieces we lack, aren't already partially
    // downloading, and this peer has, pick the one with the lowest
    // frequency (ties broken by piece index).
    pub fn pick_new_piece(&mut self, bf: &Bitfield) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None; // (frequency, idx)
        for idx in 0..self.have.len() {
            let piece = &self.pieces[idx];
            if self.have[idx] || piece.is_partial || piece.frequency == 0 || !bf[idx] {
                continue;
            }
            if best.map_or(true, |(freq, _)| piece.frequency < freq) {
                best = Some((piece.frequency, idx));
            }
        }
        if let Some((_, idx)) = best {
            self.pieces[idx].is_partial = true;
        }
        best.map(|(_, idx)| idx)
    }
}