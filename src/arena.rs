// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Batched allocation of counter vectors. Accumulating counters for
//! every function in a large binary would otherwise make one small
//! allocation per function; instead, vectors are sub-sliced out of
//! chunks and never individually freed. The arena lives for one pod
//! visit.

const CHUNK_SLOTS: usize = 8192;

/// Handle to one counter vector inside the arena.
#[derive(Clone, Copy, Debug)]
pub struct CounterSlot {
    chunk: usize,
    start: usize,
    len: usize,
}

impl CounterSlot {
    pub fn len(&self) -> usize {
        self.len
    }
}

#[derive(Debug, Default)]
pub struct CounterArena {
    chunks: Vec<Vec<u32>>,
}

impl CounterArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out a zeroed vector of `n` counters.
    pub fn alloc(&mut self, n: usize) -> CounterSlot {
        let needs_chunk = match self.chunks.last() {
            Some(chunk) => chunk.capacity() - chunk.len() < n,
            None => true,
        };
        if needs_chunk {
            self.chunks.push(Vec::with_capacity(CHUNK_SLOTS.max(n)));
        }

        let chunk_idx = self.chunks.len() - 1;
        let chunk = &mut self.chunks[chunk_idx];
        let start = chunk.len();
        chunk.resize(start + n, 0);

        CounterSlot {
            chunk: chunk_idx,
            start,
            len: n,
        }
    }

    /// Allocate a larger vector and carry over the contents of `slot`.
    /// The old slot stays allocated; arena memory is only reclaimed by
    /// `reset`.
    pub fn grow(&mut self, slot: CounterSlot, n: usize) -> CounterSlot {
        debug_assert!(n >= slot.len);

        let new = self.alloc(n);
        if new.chunk == slot.chunk {
            self.chunks[new.chunk].copy_within(slot.start..slot.start + slot.len, new.start);
        } else {
            // alloc only ever appends, so slot.chunk < new.chunk.
            let (lo, hi) = self.chunks.split_at_mut(new.chunk);
            hi[0][new.start..new.start + slot.len]
                .copy_from_slice(&lo[slot.chunk][slot.start..slot.start + slot.len]);
        }

        new
    }

    pub fn get(&self, slot: &CounterSlot) -> &[u32] {
        &self.chunks[slot.chunk][slot.start..slot.start + slot.len]
    }

    pub fn get_mut(&mut self, slot: &CounterSlot) -> &mut [u32] {
        &mut self.chunks[slot.chunk][slot.start..slot.start + slot.len]
    }

    /// Drop every allocation at once.
    pub fn reset(&mut self) {
        self.chunks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::{CounterArena, CHUNK_SLOTS};

    #[test]
    fn slots_are_zeroed_and_disjoint() {
        let mut arena = CounterArena::new();

        let a = arena.alloc(4);
        let b = arena.alloc(2);

        arena.get_mut(&a).copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(arena.get(&b), &[0, 0]);
        assert_eq!(arena.get(&a), &[1, 2, 3, 4]);
    }

    #[test]
    fn grow_preserves_contents() {
        let mut arena = CounterArena::new();

        let slot = arena.alloc(3);
        arena.get_mut(&slot).copy_from_slice(&[7, 8, 9]);

        let grown = arena.grow(slot, 5);
        assert_eq!(arena.get(&grown), &[7, 8, 9, 0, 0]);
    }

    #[test]
    fn exhausted_chunks_start_fresh_ones() {
        let mut arena = CounterArena::new();

        let a = arena.alloc(CHUNK_SLOTS - 1);
        let b = arena.alloc(8);
        arena.get_mut(&b).fill(5);

        // A request larger than a whole chunk gets a dedicated one.
        let big = arena.alloc(CHUNK_SLOTS * 2);
        assert_eq!(arena.get(&big).len(), CHUNK_SLOTS * 2);
        assert_eq!(arena.get(&a).len(), CHUNK_SLOTS - 1);
        assert_eq!(arena.get(&b), &[5; 8]);

        // Growing across chunks carries values over.
        let grown = arena.grow(b, 16);
        assert_eq!(&arena.get(&grown)[..8], &[5; 8]);
        assert_eq!(&arena.get(&grown)[8..], &[0; 8]);
    }

    #[test]
    fn reset_discards_everything() {
        let mut arena = CounterArena::new();
        arena.alloc(10);
        arena.reset();

        let slot = arena.alloc(1);
        assert_eq!(arena.get(&slot), &[0]);
    }
}
