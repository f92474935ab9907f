use std::collections::VecDeque;

use crate::audio::AudioChunk;

/// Bounded FIFO of chunks waiting to be decoded and scheduled
///
/// When full, the oldest chunk is discarded so the queue always holds the
/// most recent continuous tail of audio.
#[derive(Debug, Clone)]
pub struct PlaybackQueue {
    capacity: usize,
    chunks: VecDeque<AudioChunk>,
    dropped: u64,
}

impl PlaybackQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            chunks: VecDeque::with_capacity(capacity),
            dropped: 0,
        }
    }

    /// Append a chunk, returning true if an older chunk was shed to make room
    pub fn push(&mut self, chunk: AudioChunk) -> bool {
        let mut dropped = false;
        while self.chunks.len() >= self.capacity {
            self.chunks.pop_front();
            self.dropped += 1;
            dropped = true;
        }
        self.chunks.push_back(chunk);
        dropped
    }

    pub fn pop(&mut self) -> Option<AudioChunk> {
        self.chunks.pop_front()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total chunks shed on overflow
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn iter(&self) -> impl Iterator<Item = &AudioChunk> {
        self.chunks.iter()
    }
}
