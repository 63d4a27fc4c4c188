//! Fixed-capacity sample FIFO for the streaming pipeline.
//!
//! One producer, one consumer, no internal locking: within a session all
//! processing is single-threaded, so the buffer is plain `&mut self` state.
//! Overflow and underflow are caller-visible — `write` and `read` return the
//! number of samples actually moved and never silently drop.

/// Sample-accurate FIFO over a fixed float storage.
pub struct RingBuffer {
    storage: Vec<f32>,
    /// Next read position.
    head: usize,
    /// Number of readable samples.
    len: usize,
}

impl RingBuffer {
    /// Create a buffer holding up to `capacity` samples.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: vec![0.0; capacity.max(1)],
            head: 0,
            len: 0,
        }
    }

    /// Total capacity in samples.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Number of samples available to read.
    #[must_use]
    pub fn available_read(&self) -> usize {
        self.len
    }

    /// Number of samples that can still be written.
    #[must_use]
    pub fn available_write(&self) -> usize {
        self.storage.len() - self.len
    }

    /// Whether no samples are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the buffer is at capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len == self.storage.len()
    }

    /// Append samples in FIFO order. Returns how many were written; the
    /// remainder (if the buffer filled up) is the caller's to retry.
    pub fn write(&mut self, samples: &[f32]) -> usize {
        let n = samples.len().min(self.available_write());
        let cap = self.storage.len();
        let mut pos = (self.head + self.len) % cap;
        for &s in &samples[..n] {
            self.storage[pos] = s;
            pos += 1;
            if pos == cap {
                pos = 0;
            }
        }
        self.len += n;
        n
    }

    /// Pop up to `out.len()` samples into `out`. Returns how many were read.
    pub fn read(&mut self, out: &mut [f32]) -> usize {
        let n = self.peek(out);
        self.advance(n);
        n
    }

    /// Copy up to `out.len()` samples into `out` without consuming them.
    /// Returns how many were copied.
    pub fn peek(&self, out: &mut [f32]) -> usize {
        let n = out.len().min(self.len);
        let cap = self.storage.len();
        let mut pos = self.head;
        for slot in &mut out[..n] {
            *slot = self.storage[pos];
            pos += 1;
            if pos == cap {
                pos = 0;
            }
        }
        n
    }

    /// Discard up to `n` samples from the front. Returns how many were
    /// discarded.
    pub fn advance(&mut self, n: usize) -> usize {
        let n = n.min(self.len);
        self.head = (self.head + n) % self.storage.len();
        self.len -= n;
        n
    }

    /// Drop all buffered samples. Capacity is unchanged.
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}
