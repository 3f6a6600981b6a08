//! Per-channel state, split for exclusive ownership.
//!
//! Each channel is two halves joined only by its lock-free rings:
//!
//! * [`ChannelFeed`] stays with the caller thread — it writes input, reads
//!   finished output, and observes ring levels for pacing.
//! * [`ChannelProcessor`] is the synthesis side — in single-threaded modes
//!   the stretcher drives it inline, in threaded mode it moves into the
//!   channel's worker thread.
//!
//! The few facts both sides need (`input_size`, `draining`,
//! `output_complete`, `out_count`) live in [`ChannelShared`] as atomics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use log::warn;

use crate::core::fft::RealFft;
use crate::core::resample::{Quality, Resampler};
use crate::core::ring::{sample_ring, RingReader, RingWriter};
use crate::core::window::Window;
use crate::stream::options::Options;
use crate::stretch::vocoder::{ChannelVocoder, PhaseMode, PhasePolicy};

/// Sentinel for "total input length not yet known".
const INPUT_SIZE_UNKNOWN: i64 = -1;

/// Cross-thread channel facts.
#[derive(Debug)]
pub(crate) struct ChannelShared {
    input_size: AtomicI64,
    draining: AtomicBool,
    output_complete: AtomicBool,
    out_count: AtomicU64,
}

impl ChannelShared {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            input_size: AtomicI64::new(INPUT_SIZE_UNKNOWN),
            draining: AtomicBool::new(false),
            output_complete: AtomicBool::new(false),
            out_count: AtomicU64::new(0),
        })
    }

    // Release/acquire on the end-of-stream flags: a reader that observes
    // them must also observe every ring write that preceded them, or a
    // worker could conclude a ring is drained while samples are still in
    // flight.

    #[inline]
    pub fn input_size(&self) -> i64 {
        self.input_size.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_input_size(&self, size: u64) {
        self.input_size.store(size as i64, Ordering::Release);
    }

    #[inline]
    pub fn input_ended(&self) -> bool {
        self.input_size() != INPUT_SIZE_UNKNOWN
    }

    #[inline]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_draining(&self, value: bool) {
        self.draining.store(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn output_complete(&self) -> bool {
        self.output_complete.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_output_complete(&self, value: bool) {
        self.output_complete.store(value, Ordering::Release);
    }

    #[inline]
    pub fn out_count(&self) -> u64 {
        self.out_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn add_out_count(&self, n: usize) {
        self.out_count.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.input_size.store(INPUT_SIZE_UNKNOWN, Ordering::Relaxed);
        self.draining.store(false, Ordering::Relaxed);
        self.output_complete.store(false, Ordering::Relaxed);
        self.out_count.store(0, Ordering::Relaxed);
    }
}

/// Caller-thread half of a channel.
pub(crate) struct ChannelFeed {
    pub(crate) in_writer: RingWriter,
    pub(crate) out_reader: RingReader,
    pub(crate) in_count: u64,
    pub(crate) shared: Arc<ChannelShared>,
}

impl ChannelFeed {
    /// Writes as much input as the ring accepts; returns the count.
    pub fn write_input(&mut self, input: &[f32]) -> usize {
        let n = self.in_writer.write(input);
        self.in_count += n as u64;
        n
    }

    #[inline]
    pub fn input_read_space(&self) -> usize {
        self.in_writer.read_space()
    }

    #[inline]
    pub fn output_available(&self) -> usize {
        self.out_reader.read_space()
    }

    #[inline]
    pub fn read_output(&mut self, out: &mut [f32]) -> usize {
        self.out_reader.read(out)
    }
}

/// How to build a channel's resampler, when one is needed.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResamplerSpec {
    pub quality: Quality,
    pub max_block: usize,
    pub scratch: usize,
}

/// Everything needed to build one channel pair.
pub(crate) struct ChannelParams {
    /// All window sizes the channel may be switched to; per-size FFTs and
    /// scratch capacity are prepared up front so switching is
    /// allocation-free.
    pub window_sizes: Vec<usize>,
    pub window_size: usize,
    pub increment: usize,
    pub inbuf_size: usize,
    pub outbuf_size: usize,
    pub window: Arc<Window>,
    pub options: Arc<AtomicU32>,
    pub policy: PhasePolicy,
    pub effective_ratio: f64,
    /// Output resample ratio: `1 / pitch_scale`.
    pub pitch_ratio: f64,
    pub resampler: Option<ResamplerSpec>,
}

/// Builds a channel's two halves joined by fresh rings.
pub(crate) fn build_channel(params: &ChannelParams) -> (ChannelFeed, ChannelProcessor) {
    let shared = ChannelShared::new();
    let (in_writer, in_reader) = sample_ring(params.inbuf_size);
    let (out_writer, out_reader) = sample_ring(params.outbuf_size);

    let max_window = params
        .window_sizes
        .iter()
        .copied()
        .chain(std::iter::once(params.window_size))
        .max()
        .unwrap_or(params.window_size);
    let max_bins = max_window / 2 + 1;

    let mut ffts = HashMap::new();
    for &size in &params.window_sizes {
        ffts.insert(size, RealFft::new(size));
    }
    ffts.entry(params.window_size)
        .or_insert_with(|| RealFft::new(params.window_size));

    let mut vocoder = ChannelVocoder::new(max_window, params.increment);
    vocoder.set_window_size(params.window_size);

    let mut frame = Vec::with_capacity(max_window);
    frame.resize(params.window_size, 0.0);
    let mut mag = Vec::with_capacity(max_bins);
    mag.resize(params.window_size / 2 + 1, 0.0);
    let mut phase = Vec::with_capacity(max_bins);
    phase.resize(params.window_size / 2 + 1, 0.0);

    let (resampler, resample_buf) = match params.resampler {
        Some(spec) => (
            Some(Resampler::new(spec.quality, spec.max_block)),
            Vec::with_capacity(spec.scratch),
        ),
        None => (None, Vec::new()),
    };

    let feed = ChannelFeed {
        in_writer,
        out_reader,
        in_count: 0,
        shared: shared.clone(),
    };
    let processor = ChannelProcessor {
        in_reader,
        out_writer,
        ffts,
        vocoder,
        window: params.window.clone(),
        window_size: params.window_size,
        increment: params.increment,
        frame,
        mag,
        phase,
        chunk_out: Vec::with_capacity(max_window),
        resampler,
        resample_buf,
        pitch_ratio: params.pitch_ratio,
        effective_ratio: params.effective_ratio,
        schedule: None,
        chunk_index: 0,
        policy: params.policy,
        options: params.options.clone(),
        shared,
    };
    (feed, processor)
}

/// Synthesis half of a channel.
pub(crate) struct ChannelProcessor {
    pub(crate) in_reader: RingReader,
    out_writer: RingWriter,
    ffts: HashMap<usize, RealFft>,
    vocoder: ChannelVocoder,
    window: Arc<Window>,
    window_size: usize,
    increment: usize,
    frame: Vec<f32>,
    pub(crate) mag: Vec<f32>,
    phase: Vec<f32>,
    chunk_out: Vec<f32>,
    resampler: Option<Resampler>,
    resample_buf: Vec<f32>,
    pitch_ratio: f64,
    effective_ratio: f64,
    /// Offline output-increment schedule shared across channels.
    schedule: Option<Arc<Vec<i32>>>,
    chunk_index: usize,
    policy: PhasePolicy,
    options: Arc<AtomicU32>,
    shared: Arc<ChannelShared>,
}

impl ChannelProcessor {
    #[inline]
    pub fn shared(&self) -> &Arc<ChannelShared> {
        &self.shared
    }

    #[inline]
    pub fn read_space(&self) -> usize {
        self.in_reader.read_space()
    }

    pub fn set_schedule(&mut self, schedule: Option<Arc<Vec<i32>>>) {
        self.schedule = schedule;
        self.chunk_index = 0;
    }

    pub fn set_ratios(&mut self, effective_ratio: f64, pitch_ratio: f64) {
        self.effective_ratio = effective_ratio;
        self.pitch_ratio = pitch_ratio;
    }

    pub fn set_increment(&mut self, increment: usize) {
        self.increment = increment.max(1);
        self.vocoder.set_increment(increment);
    }

    pub fn set_policy(&mut self, policy: PhasePolicy) {
        self.policy = policy;
    }

    /// Switches analysis window size. Returns true if an FFT had to be
    /// allocated (the caller warns in realtime mode).
    pub fn set_window_size(&mut self, window_size: usize, window: Arc<Window>) -> bool {
        let allocated = !self.ffts.contains_key(&window_size);
        self.ffts
            .entry(window_size)
            .or_insert_with(|| RealFft::new(window_size));
        self.window_size = window_size;
        self.window = window;
        self.frame.resize(window_size, 0.0);
        self.mag.resize(window_size / 2 + 1, 0.0);
        self.phase.resize(window_size / 2 + 1, 0.0);
        self.vocoder.set_window_size(window_size);
        allocated
    }

    /// Creates the resampler if missing. Returns true if created.
    pub fn ensure_resampler(&mut self, spec: ResamplerSpec) -> bool {
        if self.resampler.is_some() {
            return false;
        }
        self.resampler = Some(Resampler::new(spec.quality, spec.max_block));
        self.resample_buf.reserve(spec.scratch);
        true
    }

    /// The scheduled increment for the current chunk. `None` once a
    /// schedule exists and is exhausted; without a study pass every chunk
    /// gets the nominal increment.
    fn next_increment(&self) -> Option<i32> {
        match &self.schedule {
            Some(s) if self.chunk_index < s.len() => Some(s[self.chunk_index]),
            Some(_) => None,
            None => {
                Some((self.increment as f64 * self.effective_ratio).round().max(1.0) as i32)
            }
        }
    }

    /// Re-reads the phase-handling bits; the orchestrator may flip them
    /// while a worker runs, and a torn read is impossible on a whole word.
    fn refresh_phase_mode(&mut self) {
        let bits = Options::from_bits(self.options.load(Ordering::Relaxed));
        self.policy.mode = if bits.contains(Options::PHASE_INDEPENDENT) {
            PhaseMode::Independent
        } else if bits.contains(Options::PHASE_PEAK_LOCKED) {
            PhaseMode::PeakLocked
        } else {
            PhaseMode::Adaptive
        };
    }

    /// Windows and transforms the next chunk into `mag`/`phase`.
    ///
    /// Returns false when no chunk can be formed yet: not enough input and
    /// the stream is still open, or the channel is fully drained.
    pub fn analyse_chunk(&mut self) -> bool {
        let rs = self.in_reader.read_space();
        if rs >= self.window_size {
            // full chunk
        } else if self.shared.input_ended() && rs > 0 {
            self.shared.set_draining(true);
        } else {
            return false;
        }

        self.frame.fill(0.0);
        let _ = self.in_reader.peek(&mut self.frame[..self.window_size]);
        self.window.cut(&mut self.frame[..self.window_size]);

        let fft = self
            .ffts
            .entry(self.window_size)
            .or_insert_with(|| RealFft::new(self.window_size));
        fft.forward_polar(&self.frame[..self.window_size], &mut self.mag, &mut self.phase);
        true
    }

    /// Synthesises the analysed chunk at the given signed increment and
    /// advances the input ring by one hop.
    pub fn emit_chunk(&mut self, signed_increment: i32) {
        self.refresh_phase_mode();

        let out_increment = signed_increment.unsigned_abs() as usize;
        let phase_reset = signed_increment < 0;

        self.chunk_out.clear();
        let fft = self
            .ffts
            .entry(self.window_size)
            .or_insert_with(|| RealFft::new(self.window_size));
        self.vocoder.synthesise_chunk(
            &self.mag,
            &self.phase,
            out_increment,
            phase_reset,
            self.policy,
            fft,
            &self.window,
            &mut self.chunk_out,
        );

        let written = match self.resampler.as_mut() {
            Some(resampler) => {
                self.resample_buf.clear();
                resampler.process(&self.chunk_out, self.pitch_ratio, &mut self.resample_buf);
                self.out_writer.write(&self.resample_buf)
            }
            None => self.out_writer.write(&self.chunk_out),
        };
        let expected = if self.resampler.is_some() {
            self.resample_buf.len()
        } else {
            self.chunk_out.len()
        };
        if written < expected {
            warn!(
                "channel output ring overflow: dropped {} samples",
                expected - written
            );
        }
        self.shared.add_out_count(written);

        let available = self.in_reader.read_space();
        self.in_reader.skip(self.increment.min(available));
        self.chunk_index += 1;
    }

    /// Drains the input ring chunk by chunk until it runs out of input or
    /// output space. Returns true if at least one chunk was processed.
    pub fn process_chunks(&mut self) -> bool {
        let mut progressed = false;
        loop {
            let rs = self.in_reader.read_space();
            let ended = self.shared.input_ended();
            if rs == 0 && ended {
                self.shared.set_output_complete(true);
                break;
            }
            if rs < self.window_size && !ended {
                break;
            }

            let inc = match self.next_increment() {
                Some(inc) => inc,
                None => {
                    // Schedule exhausted: the remaining tail is shorter
                    // than the study pass could centre a chunk on.
                    if ended {
                        let tail = self.in_reader.read_space();
                        self.in_reader.skip(tail);
                        self.shared.set_output_complete(true);
                    }
                    break;
                }
            };

            // Leave the chunk queued if the output ring cannot take it.
            let needed =
                (inc.unsigned_abs() as f64 * self.pitch_ratio).ceil() as usize + 8;
            if self.out_writer.write_space() < needed {
                break;
            }

            if !self.analyse_chunk() {
                break;
            }
            self.emit_chunk(inc);
            progressed = true;
        }
        progressed
    }

    /// Clears synthesis state for a fresh stream.
    pub fn reset(&mut self) {
        self.in_reader.clear();
        self.vocoder.reset();
        if let Some(r) = self.resampler.as_mut() {
            r.reset();
        }
        self.chunk_index = 0;
    }
}

impl std::fmt::Debug for ChannelProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelProcessor")
            .field("window_size", &self.window_size)
            .field("increment", &self.increment)
            .field("chunk_index", &self.chunk_index)
            .field("read_space", &self.read_space())
            .finish()
    }
}

/// Resets both halves of a channel for a fresh stream, keeping rings and
/// scratch allocations.
pub(crate) fn reset_pair(feed: &mut ChannelFeed, processor: &mut ChannelProcessor) {
    processor.reset();
    feed.out_reader.clear();
    feed.in_count = 0;
    feed.shared.reset();
}

/// Replaces a channel's output ring with a larger one, carrying over any
/// queued samples. Requires both halves, so it only runs when no worker
/// owns the processor.
pub(crate) fn grow_output(
    feed: &mut ChannelFeed,
    processor: &mut ChannelProcessor,
    new_capacity: usize,
) {
    let (mut writer, reader) = sample_ring(new_capacity);
    let mut scratch = [0.0f32; 256];
    loop {
        let n = feed.out_reader.read(&mut scratch);
        if n == 0 {
            break;
        }
        writer.write(&scratch[..n]);
    }
    processor.out_writer = writer;
    feed.out_reader = reader;
}
