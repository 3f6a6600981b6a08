//! Fixed-capacity overwrite ring for realtime introspection logs.
//!
//! Realtime mode cannot grow the detection-function and output-increment
//! records per chunk, so it keeps only the most recent values here and the
//! accessors drain whatever is still queued.

/// Bounded ring that overwrites its oldest entry when full.
#[derive(Debug, Clone)]
pub struct HistoryRing<T>
where
    T: Copy + Default,
{
    data: Vec<T>,
    head: usize,
    len: usize,
}

impl<T> HistoryRing<T>
where
    T: Copy + Default,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![T::default(); capacity.max(1)],
            head: 0,
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Records a value, discarding the oldest if the ring is full.
    pub fn record(&mut self, value: T) {
        let cap = self.data.len();
        let tail = (self.head + self.len) % cap;
        self.data[tail] = value;
        if self.len == cap {
            self.head = (self.head + 1) % cap;
        } else {
            self.len += 1;
        }
    }

    /// Removes and returns all recorded values, oldest first.
    pub fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len);
        let cap = self.data.len();
        for i in 0..self.len {
            out.push(self.data[(self.head + i) % cap]);
        }
        self.head = 0;
        self.len = 0;
        out
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}
