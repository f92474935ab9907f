/// Fixed-size sample window
///
/// Device callbacks deliver blocks whose size has nothing to do with the
/// window size. The running index carries across calls: a window is flushed
/// exactly when it fills, and leftover samples start the next window.
#[derive(Debug, Clone)]
pub struct PcmWindow {
    buffer: Vec<f32>,
    index: usize,
}

impl PcmWindow {
    pub fn new(size: usize) -> Self {
        Self {
            buffer: vec![0.0; size.max(1)],
            index: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    /// Samples waiting for the current window to fill
    pub fn pending(&self) -> usize {
        self.index
    }

    /// Append samples, returning every window that filled up
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        let mut full = Vec::new();
        let mut rest = samples;

        while !rest.is_empty() {
            let room = self.buffer.len() - self.index;
            let take = room.min(rest.len());
            self.buffer[self.index..self.index + take].copy_from_slice(&rest[..take]);
            self.index += take;
            rest = &rest[take..];

            if self.index == self.buffer.len() {
                full.push(self.buffer.clone());
                self.index = 0;
            }
        }

        full
    }

    pub fn clear(&mut self) {
        self.index = 0;
    }
}
