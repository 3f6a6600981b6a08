//! Lock-free SPSC sample rings connecting the orchestrator to a channel's
//! processing side.
//!
//! Each per-channel input and output stream is one `HeapRb<f32>` split into
//! its producer and consumer halves. The halves live in different structs
//! so that, in threaded mode, the processing half can move into its worker
//! thread while the feeding half stays with the caller thread; the ring
//! itself is the only shared state and needs no lock.

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

/// Creates a ring of the given capacity and returns its two halves.
pub fn sample_ring(capacity: usize) -> (RingWriter, RingReader) {
    let rb = HeapRb::<f32>::new(capacity.max(1));
    let (prod, cons) = rb.split();
    (RingWriter { prod }, RingReader { cons })
}

/// Producer half: the side that feeds samples in.
pub struct RingWriter {
    prod: HeapProd<f32>,
}

impl RingWriter {
    /// Free space in samples.
    #[inline]
    pub fn write_space(&self) -> usize {
        self.prod.vacant_len()
    }

    /// Samples currently queued (readable by the other half).
    #[inline]
    pub fn read_space(&self) -> usize {
        self.prod.occupied_len()
    }

    /// Writes as many samples as fit, returning the count written.
    #[inline]
    pub fn write(&mut self, input: &[f32]) -> usize {
        self.prod.push_slice(input)
    }

    /// Appends `n` zeros as if they had been written, up to the free space.
    /// Returns the count actually zero-filled.
    pub fn zero(&mut self, n: usize) -> usize {
        const ZEROS: [f32; 256] = [0.0; 256];
        let mut remaining = n.min(self.write_space());
        let total = remaining;
        while remaining > 0 {
            let chunk = remaining.min(ZEROS.len());
            let pushed = self.prod.push_slice(&ZEROS[..chunk]);
            if pushed == 0 {
                break;
            }
            remaining -= pushed;
        }
        total - remaining
    }
}

/// Consumer half: the side that drains samples out.
pub struct RingReader {
    cons: HeapCons<f32>,
}

impl RingReader {
    /// Samples available to read.
    #[inline]
    pub fn read_space(&self) -> usize {
        self.cons.occupied_len()
    }

    /// Copies up to `out.len()` samples into `out` without consuming them.
    /// Returns the count copied.
    pub fn peek(&self, out: &mut [f32]) -> usize {
        let (first, second) = self.cons.as_slices();
        let want = out.len();
        let from_first = want.min(first.len());
        out[..from_first].copy_from_slice(&first[..from_first]);
        let from_second = (want - from_first).min(second.len());
        if from_second > 0 {
            out[from_first..from_first + from_second].copy_from_slice(&second[..from_second]);
        }
        from_first + from_second
    }

    /// Discards up to `n` samples, returning the count discarded.
    #[inline]
    pub fn skip(&mut self, n: usize) -> usize {
        self.cons.skip(n)
    }

    /// Reads up to `out.len()` samples into `out`, returning the count.
    #[inline]
    pub fn read(&mut self, out: &mut [f32]) -> usize {
        self.cons.pop_slice(out)
    }

    /// Drops everything queued.
    #[inline]
    pub fn clear(&mut self) {
        self.cons.clear();
    }
}

impl std::fmt::Debug for RingWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingWriter")
            .field("write_space", &self.write_space())
            .finish()
    }
}

impl std::fmt::Debug for RingReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingReader")
            .field("read_space", &self.read_space())
            .finish()
    }
}
