//! The stretch orchestrator.
//!
//! Owns the window cache, detection curves, calculator, and per-channel
//! pipelines; sizes everything from the current ratios; and drives the
//! offline study/process protocol or the realtime block-at-a-time loop.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::analysis::curves::{
    ConstantCurve, DetectionCurve, HighFrequencyCurve, PercussiveCurve,
};
use crate::core::fft::RealFft;
use crate::core::history::HistoryRing;
use crate::core::resample::Quality;
use crate::core::window::{Window, WindowCache};
use crate::error::StretchError;
use crate::stream::channel::{
    build_channel, grow_output, reset_pair, ChannelFeed, ChannelParams, ChannelProcessor,
    ResamplerSpec,
};
use crate::stream::options::{Mode, Options};
use crate::stream::worker::{ChannelWorker, SIGNAL_WAIT};
use crate::stretch::calculator::StretchCalculator;
use crate::stretch::vocoder::{PhaseMode, PhasePolicy};

/// Default input hop at 48 kHz.
const DEFAULT_INCREMENT: usize = 256;
/// Default analysis window at 48 kHz.
const DEFAULT_WINDOW_SIZE: usize = 2048;
/// Largest output hop the sizing loop tolerates before shrinking the
/// input hop.
const MAX_OUTPUT_INCREMENT: usize = 1024;
/// Output-ring multiplier in realtime and threaded modes, so ratio
/// changes and worker run-ahead do not force reallocation.
const OUTBUF_HEADROOM: usize = 16;
/// Capacity of the realtime introspection logs.
const HISTORY_LOG_CAPACITY: usize = 16;

/// Rounds up to the next power of two; powers of two map to themselves.
#[inline]
pub(crate) fn round_up_pow2(value: usize) -> usize {
    value.max(1).next_power_of_two()
}

struct ChannelSlot {
    feed: ChannelFeed,
    /// Present in single-threaded modes; taken by the worker in threaded
    /// mode and restored on join.
    processor: Option<ChannelProcessor>,
}

/// Real-time-capable time stretcher and pitch shifter.
///
/// Offline use studies the whole input first, then processes it again:
///
/// ```no_run
/// use stretchkit::{Options, Stretcher};
///
/// let mut stretcher = Stretcher::new(48000, 1, Options::NONE, 2.0, 1.0).unwrap();
/// let input = vec![0.0f32; 48000];
/// stretcher.study(&[&input], true).unwrap();
///
/// let mut out = vec![0.0f32; 4096];
/// let mut stretched = Vec::new();
/// let mut fed = 0;
/// while fed < input.len() {
///     let block = 2048.min(input.len() - fed);
///     let is_final = fed + block == input.len();
///     stretcher.process(&[&input[fed..fed + block]], is_final).unwrap();
///     fed += block;
///     while let Some(n) = stretcher.available() {
///         if n == 0 && !is_final {
///             break;
///         }
///         let got = stretcher.retrieve(&mut [&mut out]);
///         stretched.extend_from_slice(&out[..got]);
///     }
/// }
/// ```
///
/// Realtime use skips study and feeds blocks of at most
/// [`samples_required`](Stretcher::samples_required) frames to `process`,
/// retrieving between calls.
pub struct Stretcher {
    sample_rate: u32,
    channel_count: usize,
    time_ratio: f64,
    pitch_scale: f64,

    base_window_size: usize,
    window_size: usize,
    increment: usize,
    outbuf_size: usize,
    max_process_size: usize,
    expected_input_duration: usize,
    rate_multiple: f64,

    realtime: bool,
    threaded: bool,
    options: Arc<AtomicU32>,
    debug_level: i32,
    mode: Mode,

    windows: WindowCache,
    window: Arc<Window>,

    study_fft: Option<RealFft>,
    study_frame: Vec<f32>,
    study_mag: Vec<f32>,
    mixdown: Vec<f32>,

    input_duration: usize,
    phase_reset_df: Vec<f32>,
    stretch_df: Vec<f32>,
    output_increments: Vec<i32>,

    last_output_increments: HistoryRing<i32>,
    last_phase_reset_df: HistoryRing<f32>,

    phase_reset_detector: PercussiveCurve,
    stretch_detector: Option<Box<dyn DetectionCurve + Send>>,
    calculator: StretchCalculator,

    freq0: f32,
    freq1: f32,
    freq2: f32,

    channels: Vec<ChannelSlot>,
    workers: Mutex<Vec<ChannelWorker>>,
    space_rx: Option<crossbeam_channel::Receiver<()>>,
    shutdown: Arc<AtomicBool>,

    /// Channel-summed magnitude scratch for the realtime detector.
    sum_mag: Vec<f32>,
}

impl Stretcher {
    /// Creates a stretcher for `channel_count` planar channels at
    /// `sample_rate`, with initial ratios.
    pub fn new(
        sample_rate: u32,
        channel_count: usize,
        options: Options,
        time_ratio: f64,
        pitch_scale: f64,
    ) -> Result<Self, StretchError> {
        if sample_rate == 0 {
            return Err(StretchError::InvalidParameter(
                "sample rate must be positive".to_string(),
            ));
        }
        if channel_count == 0 {
            return Err(StretchError::InvalidParameter(
                "at least one channel is required".to_string(),
            ));
        }
        if !(time_ratio > 0.0) || !(pitch_scale > 0.0) {
            return Err(StretchError::InvalidParameter(format!(
                "ratios must be positive, got time {} pitch {}",
                time_ratio, pitch_scale
            )));
        }

        let mut opts = options;
        let rate_multiple = (sample_rate as f64 / 48000.0).max(1.0);
        let mut base_window_size =
            round_up_pow2((DEFAULT_WINDOW_SIZE as f64 * rate_multiple) as usize);

        if opts.contains(Options::WINDOW_SHORT) && opts.contains(Options::WINDOW_LONG) {
            warn!("WINDOW_SHORT and WINDOW_LONG both set; using the standard window");
            opts.remove(Options::WINDOW_SHORT);
            opts.remove(Options::WINDOW_LONG);
        } else if opts.contains(Options::WINDOW_SHORT) {
            base_window_size /= 2;
        } else if opts.contains(Options::WINDOW_LONG) {
            base_window_size *= 2;
        }

        let realtime = opts.contains(Options::PROCESS_REAL_TIME);
        if realtime && !opts.contains(Options::STRETCH_PRECISE) {
            debug!("realtime mode: enabling STRETCH_PRECISE");
            opts.insert(Options::STRETCH_PRECISE);
        }

        let multiprocessor = std::thread::available_parallelism()
            .map(|n| n.get() > 1)
            .unwrap_or(false);
        let threaded = !realtime
            && !opts.contains(Options::THREADING_NONE)
            && (channel_count > 1 || opts.contains(Options::THREADING_ALWAYS))
            && multiprocessor;
        if threaded {
            debug!("using one worker per channel");
        }

        let mut windows = WindowCache::new();
        let window = windows.ensure(base_window_size);

        let mut stretcher = Stretcher {
            sample_rate,
            channel_count,
            time_ratio,
            pitch_scale,
            base_window_size,
            window_size: base_window_size,
            increment: DEFAULT_INCREMENT,
            outbuf_size: base_window_size * 2,
            max_process_size: base_window_size,
            expected_input_duration: 0,
            rate_multiple,
            realtime,
            threaded,
            options: Arc::new(AtomicU32::new(opts.bits())),
            debug_level: 0,
            mode: Mode::JustCreated,
            windows,
            window,
            study_fft: None,
            study_frame: Vec::new(),
            study_mag: Vec::new(),
            mixdown: Vec::new(),
            input_duration: 0,
            phase_reset_df: Vec::new(),
            stretch_df: Vec::new(),
            output_increments: Vec::new(),
            last_output_increments: HistoryRing::new(HISTORY_LOG_CAPACITY),
            last_phase_reset_df: HistoryRing::new(HISTORY_LOG_CAPACITY),
            phase_reset_detector: PercussiveCurve::new(base_window_size),
            stretch_detector: None,
            calculator: StretchCalculator::new(sample_rate, DEFAULT_INCREMENT, true),
            freq0: 600.0,
            freq1: 1200.0,
            freq2: 12000.0,
            channels: Vec::new(),
            workers: Mutex::new(Vec::new()),
            space_rx: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            sum_mag: Vec::new(),
        };
        stretcher.configure();
        Ok(stretcher)
    }

    // ----- accessors ---------------------------------------------------

    #[inline]
    pub fn time_ratio(&self) -> f64 {
        self.time_ratio
    }

    #[inline]
    pub fn pitch_scale(&self) -> f64 {
        self.pitch_scale
    }

    /// The ratio the internal stretcher works to: a pitch shift is done as
    /// extra time stretch undone by resampling at output, so this is
    /// `time_ratio * pitch_scale`, never the caller's duration ratio.
    #[inline]
    pub fn effective_ratio(&self) -> f64 {
        self.time_ratio * self.pitch_scale
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Current lifecycle state.
    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Output latency in samples: zero offline, the centring half-window
    /// (through the resampler) plus one in realtime mode.
    pub fn latency(&self) -> usize {
        if !self.realtime {
            return 0;
        }
        ((self.window_size / 2) as f64 / self.pitch_scale) as usize + 1
    }

    fn options(&self) -> Options {
        Options::from_bits(self.options.load(Ordering::Relaxed))
    }

    fn store_options(&self, opts: Options) {
        self.options.store(opts.bits(), Ordering::Relaxed);
    }

    /// Largest block the next `process` call is guaranteed to absorb; zero
    /// once every channel holds a full analysis window.
    pub fn samples_required(&self) -> usize {
        let mut required = 0usize;
        for slot in &self.channels {
            let rs = slot.feed.input_read_space();
            if rs < self.window_size && !slot.feed.shared.is_draining() {
                if !slot.feed.shared.input_ended() {
                    required = required.max(self.window_size - rs);
                    continue;
                }
                if rs == 0 {
                    required = required.max(self.window_size);
                }
            }
        }
        required
    }

    pub fn set_debug_level(&mut self, level: i32) {
        self.debug_level = level;
        self.calculator.set_debug_level(level);
    }

    // ----- parameter setters -------------------------------------------

    /// Updates the time ratio. In offline mode this is rejected once
    /// studying or processing has begun.
    pub fn set_time_ratio(&mut self, ratio: f64) {
        if !(ratio > 0.0) {
            warn!("set_time_ratio: ratio must be positive, got {}", ratio);
            return;
        }
        if !self.realtime && (self.mode == Mode::Studying || self.mode == Mode::Processing) {
            warn!(
                "set_time_ratio: cannot set ratio while {} in offline mode",
                self.mode.name()
            );
            return;
        }
        if ratio == self.time_ratio {
            return;
        }
        self.time_ratio = ratio;
        self.reconfigure();
    }

    /// Updates the pitch scale. In offline mode this is rejected once
    /// studying or processing has begun.
    pub fn set_pitch_scale(&mut self, scale: f64) {
        if !(scale > 0.0) {
            warn!("set_pitch_scale: scale must be positive, got {}", scale);
            return;
        }
        if !self.realtime && (self.mode == Mode::Studying || self.mode == Mode::Processing) {
            warn!(
                "set_pitch_scale: cannot set scale while {} in offline mode",
                self.mode.name()
            );
            return;
        }
        if scale == self.pitch_scale {
            return;
        }
        self.pitch_scale = scale;
        self.reconfigure();
    }

    /// Declares the total input length, letting the sizing logic keep the
    /// hop small enough for short inputs. Offline only, before study.
    pub fn set_expected_input_duration(&mut self, samples: usize) {
        if self.realtime {
            warn!("set_expected_input_duration: not meaningful in realtime mode");
            return;
        }
        if self.mode != Mode::JustCreated {
            warn!(
                "set_expected_input_duration: must be called before study, not while {}",
                self.mode.name()
            );
            return;
        }
        if samples == self.expected_input_duration {
            return;
        }
        self.expected_input_duration = samples;
        self.reconfigure();
    }

    /// Grows the largest single `process` block the stretcher must accept.
    /// Shrinking is a no-op.
    pub fn set_max_process_size(&mut self, samples: usize) {
        if samples <= self.max_process_size {
            return;
        }
        if self.mode == Mode::Processing && self.has_workers() {
            warn!("set_max_process_size: cannot grow buffers while workers are running");
            return;
        }
        self.max_process_size = samples;
        self.reconfigure();
    }

    /// Swaps the transient-handling bits. Realtime only.
    pub fn set_transients_option(&mut self, options: Options) {
        if !self.realtime {
            warn!("set_transients_option: not permissible in offline mode");
            return;
        }
        let mut opts = self.options();
        opts.set_transients(options);
        self.store_options(opts);
        self.calculator
            .set_use_hard_peaks(!opts.contains(Options::TRANSIENTS_SMOOTH));
    }

    /// Swaps the phase-handling bits; the synthesisers pick the change up
    /// on their next chunk.
    pub fn set_phase_option(&mut self, options: Options) {
        let mut opts = self.options();
        opts.set_phase(options);
        self.store_options(opts);
    }

    /// Sets one of the three named frequency cutoffs (0, 1, 2) in Hz.
    pub fn set_frequency_cutoff(&mut self, n: usize, freq: f32) {
        match n {
            0 => self.freq0 = freq,
            1 => self.freq1 = freq,
            2 => self.freq2 = freq,
            _ => {
                warn!("set_frequency_cutoff: no cutoff {}", n);
                return;
            }
        }
        self.sync_channels();
    }

    pub fn frequency_cutoff(&self, n: usize) -> f32 {
        match n {
            0 => self.freq0,
            1 => self.freq1,
            2 => self.freq2,
            _ => 0.0,
        }
    }

    // ----- sizing and configuration ------------------------------------

    /// Derives `window_size`, `increment`, and `outbuf_size` from the
    /// current ratios and limits.
    fn calculate_sizes(&mut self) {
        let r = self.effective_ratio();
        let mut window_size = self.base_window_size;
        let mut input_increment = DEFAULT_INCREMENT;
        let mut output_increment;

        if self.realtime {
            // Fixed input increment.
            input_increment =
                round_up_pow2((DEFAULT_INCREMENT as f64 * self.rate_multiple) as usize);

            if r < 1.0 {
                output_increment = (input_increment as f64 * r).floor() as usize;
                if output_increment < 1 {
                    output_increment = 1;
                    input_increment = round_up_pow2((1.0 / r).ceil() as usize);
                    window_size = input_increment * 4;
                }
            } else {
                output_increment = (input_increment as f64 * r).ceil() as usize;
                while output_increment > MAX_OUTPUT_INCREMENT && input_increment > 1 {
                    input_increment /= 2;
                    output_increment = (input_increment as f64 * r).ceil() as usize;
                }
                window_size = window_size.max(round_up_pow2(output_increment * 6));
                if r > 5.0 {
                    while window_size < 8192 {
                        window_size *= 2;
                    }
                }
            }
        } else {
            // Variable input increment.
            if r < 1.0 {
                input_increment = window_size / 4;
                while input_increment >= 512 {
                    input_increment /= 2;
                }
                output_increment = (input_increment as f64 * r).floor() as usize;
                if output_increment < 1 {
                    output_increment = 1;
                    input_increment = round_up_pow2((1.0 / r).ceil() as usize);
                    window_size = input_increment * 4;
                }
            } else {
                output_increment = window_size / 6;
                input_increment = (output_increment as f64 / r) as usize;
                while output_increment > MAX_OUTPUT_INCREMENT && input_increment > 1 {
                    output_increment /= 2;
                    input_increment = (output_increment as f64 / r) as usize;
                }
                window_size = window_size.max(round_up_pow2(output_increment * 6));
                if r > 5.0 {
                    while window_size < 8192 {
                        window_size *= 2;
                    }
                }
            }
        }

        if self.expected_input_duration > 0 {
            while input_increment * 4 > self.expected_input_duration && input_increment > 1 {
                input_increment /= 2;
            }
        }

        self.window_size = window_size;
        self.increment = input_increment.max(1);

        if self.debug_level > 0 {
            debug!(
                "sizes: effective ratio {}, window {}, increment {} (approx output increment {})",
                r,
                self.window_size,
                self.increment,
                (self.increment as f64 * r).round() as i64
            );
        }

        if self.window_size > self.max_process_size {
            self.max_process_size = self.window_size;
        }

        let mut outbuf = (self.max_process_size as f64 / self.pitch_scale)
            .max(self.window_size as f64 * 2.0 * self.time_ratio.max(1.0))
            .ceil() as usize;
        if self.realtime || self.threaded {
            // Headroom against reallocation on ratio changes (realtime)
            // and worker run-ahead of output drainage (threaded).
            outbuf *= OUTBUF_HEADROOM;
        }
        self.outbuf_size = outbuf;

        if self.debug_level > 0 {
            debug!("sizes: outbuf {}", self.outbuf_size);
        }
    }

    fn phase_policy(&self) -> PhasePolicy {
        let opts = self.options();
        let mode = if opts.contains(Options::PHASE_INDEPENDENT) {
            PhaseMode::Independent
        } else if opts.contains(Options::PHASE_PEAK_LOCKED) {
            PhaseMode::PeakLocked
        } else {
            PhaseMode::Adaptive
        };
        let bins = self.window_size / 2 + 1;
        let to_bin = |freq: f32| -> usize {
            ((freq as f64 * self.window_size as f64 / self.sample_rate as f64).round() as usize)
                .min(bins)
        };
        PhasePolicy {
            mode,
            rigid_bin: to_bin(self.freq0),
            lock_lo_bin: to_bin(self.freq1),
            lock_hi_bin: to_bin(self.freq2),
        }
    }

    fn resampler_spec(&self) -> ResamplerSpec {
        let scratch = ((self.increment as f64 * self.time_ratio * 2.0) / self.pitch_scale).ceil()
            as usize;
        ResamplerSpec {
            quality: Quality::FastestTolerable,
            max_block: self.window_size.max(MAX_OUTPUT_INCREMENT * 2),
            scratch: scratch.max(self.increment * 16),
        }
    }

    fn current_window_sizes(&self) -> Vec<usize> {
        let mut sizes = Vec::with_capacity(4);
        if self.realtime {
            sizes.push(self.base_window_size);
            sizes.push(self.base_window_size * 2);
            sizes.push(self.base_window_size * 4);
        }
        sizes.push(self.window_size);
        sizes.sort_unstable();
        sizes.dedup();
        sizes
    }

    /// Full configuration; allocation is permitted here. Runs at
    /// construction and, offline, whenever parameters change before
    /// processing begins.
    fn configure(&mut self) {
        let first = self.channels.is_empty();
        let prev_window_size = self.window_size;
        let prev_outbuf_size = self.outbuf_size;

        self.calculate_sizes();

        let window_size_changed = first || prev_window_size != self.window_size;
        let outbuf_size_changed = first || prev_outbuf_size != self.outbuf_size;

        let sizes = self.current_window_sizes();
        for &size in &sizes {
            self.windows.ensure(size);
        }
        self.window = self.windows.ensure(self.window_size);
        if self.debug_level > 0 {
            debug!("window area: {}", self.window.area());
        }

        if window_size_changed || outbuf_size_changed {
            self.rebuild_channels(&sizes);
        }

        if !self.realtime && window_size_changed {
            self.study_fft = Some(RealFft::new(self.window_size));
        }
        self.study_frame.resize(self.window_size, 0.0);
        self.study_mag.resize(self.window_size / 2 + 1, 0.0);
        self.sum_mag.resize(self.window_size / 2 + 1, 0.0);

        if self.pitch_scale != 1.0 || self.realtime {
            let spec = self.resampler_spec();
            for slot in &mut self.channels {
                if let Some(processor) = slot.processor.as_mut() {
                    processor.ensure_resampler(spec);
                }
            }
        }

        self.phase_reset_detector = PercussiveCurve::new(self.window_size);
        self.stretch_detector = if self.realtime {
            // The stretch curve drives offline schedule placement only.
            None
        } else if self.options().contains(Options::STRETCH_PRECISE) {
            Some(Box::new(ConstantCurve::new()))
        } else {
            Some(Box::new(HighFrequencyCurve::new(self.window_size)))
        };

        self.calculator = StretchCalculator::new(
            self.sample_rate,
            self.increment,
            !self.options().contains(Options::TRANSIENTS_SMOOTH),
        );
        self.calculator.set_debug_level(self.debug_level);
        self.input_duration = 0;

        self.sync_channels();

        // Half a window of silence so the first analysis chunk is centred
        // on the first input sample. Realtime mode skips this at configure
        // time; the first process call prefs it there instead.
        if !self.realtime {
            for slot in &mut self.channels {
                if let Some(processor) = slot.processor.as_mut() {
                    reset_pair(&mut slot.feed, processor);
                }
                slot.feed.in_writer.zero(self.window_size / 2);
            }
        }
    }

    /// Parameter-change path. Offline it defers to `configure`; realtime
    /// it avoids allocation, warning when one is forced on it.
    fn reconfigure(&mut self) {
        if !self.realtime {
            if self.mode == Mode::Processing || self.mode == Mode::Finished {
                warn!(
                    "reconfigure: ignored while {} in offline mode",
                    self.mode.name()
                );
                return;
            }
            if self.mode == Mode::Studying {
                // Bank the stretch computed so far and start fresh curves.
                self.calculate_stretch();
                self.phase_reset_df.clear();
                self.stretch_df.clear();
                self.input_duration = 0;
            }
            self.configure();
            return;
        }

        let prev_window_size = self.window_size;
        let prev_outbuf_size = self.outbuf_size;
        let prev_increment = self.increment;

        self.calculate_sizes();

        if self.window_size != prev_window_size {
            let window = match self.windows.get(self.window_size) {
                Some(window) => window,
                None => {
                    warn!(
                        "reconfigure: window allocation (size {}) required in realtime mode",
                        self.window_size
                    );
                    self.windows.ensure(self.window_size)
                }
            };
            self.window = window;
            for slot in &mut self.channels {
                if let Some(processor) = slot.processor.as_mut() {
                    if processor.set_window_size(self.window_size, self.window.clone()) {
                        warn!(
                            "reconfigure: FFT allocation (size {}) required in realtime mode",
                            self.window_size
                        );
                    }
                }
            }
            self.phase_reset_detector.set_window_size(self.window_size);
            self.study_mag.resize(self.window_size / 2 + 1, 0.0);
            self.sum_mag.resize(self.window_size / 2 + 1, 0.0);
        }

        if self.outbuf_size > prev_outbuf_size {
            debug!(
                "reconfigure: growing output rings {} -> {}",
                prev_outbuf_size, self.outbuf_size
            );
            for slot in &mut self.channels {
                if let Some(processor) = slot.processor.as_mut() {
                    grow_output(&mut slot.feed, processor, self.outbuf_size);
                }
            }
        }

        if self.pitch_scale != 1.0 {
            let spec = self.resampler_spec();
            for slot in &mut self.channels {
                if let Some(processor) = slot.processor.as_mut() {
                    if processor.ensure_resampler(spec) {
                        warn!("reconfigure: resampler construction required in realtime mode");
                    }
                }
            }
        }

        if self.increment != prev_increment {
            debug!(
                "reconfigure: increment {} -> {}, calculator restarted",
                prev_increment, self.increment
            );
            self.calculator = StretchCalculator::new(
                self.sample_rate,
                self.increment,
                !self.options().contains(Options::TRANSIENTS_SMOOTH),
            );
            self.calculator.set_debug_level(self.debug_level);
        }

        self.sync_channels();
    }

    /// Pushes current increment, ratios, and phase policy into every
    /// channel processor.
    fn sync_channels(&mut self) {
        let policy = self.phase_policy();
        let effective = self.effective_ratio();
        let pitch_ratio = 1.0 / self.pitch_scale;
        let increment = self.increment;
        for slot in &mut self.channels {
            if let Some(processor) = slot.processor.as_mut() {
                processor.set_increment(increment);
                processor.set_policy(policy);
                processor.set_ratios(effective, pitch_ratio);
            }
        }
    }

    fn rebuild_channels(&mut self, window_sizes: &[usize]) {
        self.join_workers();
        // The input ring must hold a full analysis window at any size the
        // realtime mode may switch to.
        let max_window = window_sizes
            .iter()
            .copied()
            .max()
            .unwrap_or(self.window_size)
            .max(self.window_size);
        let params = ChannelParams {
            window_sizes: window_sizes.to_vec(),
            window_size: self.window_size,
            increment: self.increment,
            inbuf_size: max_window * 2 + self.max_process_size,
            outbuf_size: self.outbuf_size,
            window: self.window.clone(),
            options: self.options.clone(),
            policy: self.phase_policy(),
            effective_ratio: self.effective_ratio(),
            pitch_ratio: 1.0 / self.pitch_scale,
            resampler: if self.pitch_scale != 1.0 || self.realtime {
                Some(self.resampler_spec())
            } else {
                None
            },
        };
        self.channels = (0..self.channel_count)
            .map(|_| {
                let (feed, processor) = build_channel(&params);
                ChannelSlot {
                    feed,
                    processor: Some(processor),
                }
            })
            .collect();
    }

    // ----- study -------------------------------------------------------

    /// Offline first pass: feeds the detection curves without producing
    /// output. Call repeatedly over the whole input, with `is_final` set
    /// on the last block, then call [`process`](Stretcher::process) over
    /// the same samples.
    pub fn study(&mut self, inputs: &[&[f32]], is_final: bool) -> Result<(), StretchError> {
        if self.realtime {
            debug!("study: not meaningful in realtime mode");
            return Ok(());
        }
        if self.mode == Mode::Processing || self.mode == Mode::Finished {
            warn!("study: cannot study after processing has begun");
            return Err(StretchError::UsageOrder {
                operation: "study",
                state: self.mode.name(),
            });
        }
        let samples = self.validate_inputs(inputs)?;
        self.mode = Mode::Studying;

        // Mix to mono for analysis.
        self.mixdown.clear();
        self.mixdown.resize(samples, 0.0);
        for channel in inputs {
            for (i, &v) in channel.iter().enumerate() {
                self.mixdown[i] += v;
            }
        }
        if self.channel_count > 1 {
            let scale = 1.0 / self.channel_count as f32;
            for v in &mut self.mixdown {
                *v *= scale;
            }
        }

        let mut consumed = 0usize;
        loop {
            let mut progressed = false;

            let writable = {
                let feed = &mut self.channels[0].feed;
                let writable = feed.in_writer.write_space().min(samples - consumed);
                if writable > 0 {
                    feed.in_writer
                        .write(&self.mixdown[consumed..consumed + writable]);
                }
                writable
            };
            if writable > 0 {
                consumed += writable;
                progressed = true;
            }

            // Drain whole chunks; on the final call a half window is
            // enough to centre the last chunk inside the input.
            loop {
                let slot = &mut self.channels[0];
                let Some(processor) = slot.processor.as_mut() else {
                    break;
                };
                let rs = processor.read_space();
                let enough =
                    rs >= self.window_size || (is_final && rs >= self.window_size / 2);
                if !enough {
                    break;
                }
                let Some(fft) = self.study_fft.as_mut() else {
                    break;
                };

                self.study_frame.fill(0.0);
                let _ = processor
                    .in_reader
                    .peek(&mut self.study_frame[..self.window_size]);
                self.window.cut(&mut self.study_frame[..self.window_size]);
                fft.forward_magnitude(
                    &self.study_frame[..self.window_size],
                    &mut self.study_mag,
                );

                let df = self
                    .phase_reset_detector
                    .process(&self.study_mag, self.increment);
                self.phase_reset_df.push(df);
                if let Some(curve) = self.stretch_detector.as_mut() {
                    let df = curve.process(&self.study_mag, self.increment);
                    self.stretch_df.push(df);
                }

                self.input_duration += self.increment;
                processor.in_reader.skip(self.increment);
                progressed = true;
            }

            if consumed >= samples {
                break;
            }
            if !progressed {
                warn!(
                    "study: input ring stalled ({} of {} samples consumed)",
                    consumed, samples
                );
                return Err(StretchError::Backpressure {
                    provided: samples,
                    consumed,
                });
            }
        }

        if is_final {
            let remaining = self.channels[0]
                .processor
                .as_ref()
                .map(|p| p.read_space())
                .unwrap_or(0);
            self.input_duration += remaining;
            // Discount the centring pre-fill, once.
            if self.input_duration >= self.window_size / 2 {
                self.input_duration -= self.window_size / 2;
            }
        }
        Ok(())
    }

    fn calculate_stretch(&mut self) {
        let increments = self.calculator.calculate(
            self.effective_ratio(),
            self.input_duration,
            &self.phase_reset_df,
            &self.stretch_df,
        );
        self.output_increments.extend_from_slice(&increments);
    }

    // ----- process -----------------------------------------------------

    /// Feeds one block of planar input. The first call materialises the
    /// offline schedule (when a study pass preceded it), pre-fills the
    /// centring silence, and spawns workers in threaded mode. With
    /// `is_final` the stretcher drains and moves to Finished.
    pub fn process(&mut self, inputs: &[&[f32]], is_final: bool) -> Result<(), StretchError> {
        if self.mode == Mode::Finished {
            warn!("process: cannot process again after the final chunk");
            return Err(StretchError::UsageOrder {
                operation: "process",
                state: self.mode.name(),
            });
        }
        let samples = self.validate_inputs(inputs)?;

        if self.mode == Mode::JustCreated || self.mode == Mode::Studying {
            if self.mode == Mode::Studying {
                self.calculate_stretch();
            }
            // Without a study pass there is no schedule; the channels fall
            // back to the nominal increment per chunk.
            let schedule = if self.realtime || self.output_increments.is_empty() {
                None
            } else {
                Some(Arc::new(self.output_increments.clone()))
            };
            for slot in &mut self.channels {
                if let Some(processor) = slot.processor.as_mut() {
                    reset_pair(&mut slot.feed, processor);
                    processor.set_schedule(schedule.clone());
                }
                slot.feed.in_writer.zero(self.window_size / 2);
            }
            if self.threaded {
                self.spawn_workers();
            }
            self.mode = Mode::Processing;
        }

        let threaded_active = self.has_workers();
        let mut consumed = vec![0usize; self.channel_count];

        loop {
            let mut all_consumed = true;
            let mut progressed = false;

            for (c, slot) in self.channels.iter_mut().enumerate() {
                let n = slot.feed.write_input(&inputs[c][consumed[c]..]);
                if n > 0 {
                    progressed = true;
                }
                consumed[c] += n;
                if consumed[c] < samples {
                    all_consumed = false;
                } else if is_final && !slot.feed.shared.input_ended() {
                    slot.feed.shared.set_input_size(slot.feed.in_count);
                }
                if !threaded_active && !self.realtime {
                    if let Some(processor) = slot.processor.as_mut() {
                        if processor.process_chunks() {
                            progressed = true;
                        }
                    }
                }
            }

            if self.realtime && self.process_one_chunk() {
                progressed = true;
            }

            if threaded_active {
                self.notify_workers();
                if !all_consumed {
                    if let Some(rx) = &self.space_rx {
                        let _ = rx.recv_timeout(SIGNAL_WAIT);
                    }
                    // The bounded wait itself is the pacing mechanism.
                    progressed = true;
                }
            }

            if all_consumed {
                break;
            }
            if !progressed {
                warn!(
                    "process: no progress; pace calls with samples_required() or grow \
                     the limit with set_max_process_size()"
                );
                return Err(StretchError::Backpressure {
                    provided: samples,
                    consumed: consumed.iter().copied().min().unwrap_or(0),
                });
            }
        }

        if is_final {
            if self.realtime {
                while self.process_one_chunk() {}
            }
            if threaded_active {
                self.notify_workers();
            }
            self.mode = Mode::Finished;
        }
        Ok(())
    }

    /// Advances every channel by one chunk in lockstep, using the summed
    /// magnitude spectrum for a single cross-channel transient decision.
    fn process_one_chunk(&mut self) -> bool {
        let mut ready = true;
        for slot in &self.channels {
            let Some(processor) = slot.processor.as_ref() else {
                return false;
            };
            let rs = processor.read_space();
            let ended = slot.feed.shared.input_ended();
            if rs >= self.window_size || (ended && rs > 0) {
                continue;
            }
            if ended && rs == 0 {
                slot.feed.shared.set_output_complete(true);
            }
            ready = false;
        }
        if !ready {
            return false;
        }

        self.sum_mag.fill(0.0);
        for slot in &mut self.channels {
            let Some(processor) = slot.processor.as_mut() else {
                return false;
            };
            if !processor.analyse_chunk() {
                return false;
            }
            for (i, &m) in processor.mag.iter().enumerate() {
                self.sum_mag[i] += m;
            }
        }
        if self.channel_count > 1 {
            let scale = 1.0 / self.channel_count as f32;
            for v in &mut self.sum_mag {
                *v *= scale;
            }
        }

        let df = self
            .phase_reset_detector
            .process(&self.sum_mag, self.increment);
        let increment = self.calculator.calculate_single(self.effective_ratio(), df);
        self.last_phase_reset_df.record(df);
        self.last_output_increments.record(increment);

        for slot in &mut self.channels {
            if let Some(processor) = slot.processor.as_mut() {
                processor.emit_chunk(increment);
            }
        }
        true
    }

    // ----- output ------------------------------------------------------

    /// Output samples ready on every channel, or `None` once the stream is
    /// finished and fully drained.
    pub fn available(&self) -> Option<usize> {
        let mut min_available = usize::MAX;
        for slot in &self.channels {
            min_available = min_available.min(slot.feed.output_available());
        }
        if min_available == usize::MAX {
            min_available = 0;
        }
        if self.mode == Mode::Finished && min_available == 0 {
            let drained = self
                .channels
                .iter()
                .all(|slot| slot.feed.shared.output_complete());
            if drained {
                return None;
            }
        }
        Some(min_available)
    }

    /// Reads up to the common available length into each channel's output
    /// slice; returns the per-channel count retrieved.
    pub fn retrieve(&mut self, outputs: &mut [&mut [f32]]) -> usize {
        if outputs.len() != self.channel_count {
            warn!(
                "retrieve: expected {} channels, got {}",
                self.channel_count,
                outputs.len()
            );
            return 0;
        }
        let want = outputs.iter().map(|o| o.len()).min().unwrap_or(0);
        let available = self
            .channels
            .iter()
            .map(|slot| slot.feed.output_available())
            .min()
            .unwrap_or(0);
        let n = want.min(available);
        for (slot, out) in self.channels.iter_mut().zip(outputs.iter_mut()) {
            slot.feed.read_output(&mut out[..n]);
        }

        // In inline modes the freed ring space lets more queued chunks
        // through; workers pump for themselves in threaded mode.
        if !self.realtime
            && !self.has_workers()
            && (self.mode == Mode::Processing || self.mode == Mode::Finished)
        {
            for slot in &mut self.channels {
                if let Some(processor) = slot.processor.as_mut() {
                    processor.process_chunks();
                }
            }
        }
        n
    }

    // ----- introspection -----------------------------------------------

    /// The output increments chosen so far: the full offline schedule, or
    /// the most recent realtime decisions (drained on read).
    pub fn output_increments(&mut self) -> Vec<i32> {
        if !self.realtime {
            self.output_increments.iter().map(|i| i.abs()).collect()
        } else {
            self.last_output_increments
                .drain()
                .into_iter()
                .map(|i| i.abs())
                .collect()
        }
    }

    /// The phase-reset detection curve: the full offline sequence, or the
    /// most recent realtime values (drained on read).
    pub fn phase_reset_curve(&mut self) -> Vec<f32> {
        if !self.realtime {
            self.phase_reset_df.clone()
        } else {
            self.last_phase_reset_df.drain()
        }
    }

    /// Chunk indices the calculator pinned as hard transients. Offline
    /// only; realtime mode reports none.
    pub fn exact_time_points(&self) -> Vec<usize> {
        if self.realtime {
            return Vec::new();
        }
        self.calculator
            .get_last_calculated_peaks()
            .iter()
            .map(|p| p.chunk)
            .collect()
    }

    // ----- lifecycle ---------------------------------------------------

    /// Returns to `JustCreated`: joins any workers, clears channel state
    /// and curves, and keeps ratios, options, and sizing.
    pub fn reset(&mut self) {
        self.join_workers();
        let sizes = self.current_window_sizes();
        self.rebuild_channels(&sizes);
        if !self.realtime {
            for slot in &mut self.channels {
                slot.feed.in_writer.zero(self.window_size / 2);
            }
        }
        self.mode = Mode::JustCreated;
        self.phase_reset_detector.reset();
        if let Some(curve) = self.stretch_detector.as_mut() {
            curve.reset();
        }
        self.calculator.reset();
        self.input_duration = 0;
        self.phase_reset_df.clear();
        self.stretch_df.clear();
        self.output_increments.clear();
        self.last_output_increments.clear();
        self.last_phase_reset_df.clear();
    }

    // ----- workers -----------------------------------------------------

    fn has_workers(&self) -> bool {
        !self.workers.lock().is_empty()
    }

    fn notify_workers(&self) {
        for worker in self.workers.lock().iter() {
            worker.notify_data();
        }
    }

    fn spawn_workers(&mut self) {
        let (space_tx, space_rx) = crossbeam_channel::bounded(self.channel_count * 4);
        self.space_rx = Some(space_rx);
        self.shutdown = Arc::new(AtomicBool::new(false));

        let mut spawned = Vec::with_capacity(self.channel_count);
        let mut failed = false;
        for (c, slot) in self.channels.iter_mut().enumerate() {
            let Some(processor) = slot.processor.take() else {
                continue;
            };
            match ChannelWorker::spawn(c, processor, space_tx.clone(), self.shutdown.clone()) {
                Ok(worker) => spawned.push(worker),
                Err(processor) => {
                    slot.processor = Some(processor);
                    failed = true;
                    break;
                }
            }
        }

        if failed {
            warn!("worker spawn failed; falling back to inline processing");
            self.shutdown.store(true, Ordering::Relaxed);
            for worker in spawned {
                let c = worker.channel;
                if let Some(processor) = worker.join() {
                    self.channels[c].processor = Some(processor);
                }
            }
            self.space_rx = None;
            self.threaded = false;
            return;
        }

        if self.debug_level > 0 {
            debug!("{} workers created", spawned.len());
        }
        *self.workers.lock() = spawned;
    }

    fn join_workers(&mut self) {
        let workers = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            return;
        }
        self.shutdown.store(true, Ordering::Relaxed);
        for worker in workers {
            let c = worker.channel;
            if let Some(processor) = worker.join() {
                self.channels[c].processor = Some(processor);
            }
        }
        self.space_rx = None;
    }

    // ----- helpers -----------------------------------------------------

    fn validate_inputs(&self, inputs: &[&[f32]]) -> Result<usize, StretchError> {
        if inputs.len() != self.channel_count {
            return Err(StretchError::InvalidParameter(format!(
                "expected {} channels, got {}",
                self.channel_count,
                inputs.len()
            )));
        }
        let samples = inputs[0].len();
        if inputs.iter().any(|c| c.len() != samples) {
            return Err(StretchError::InvalidParameter(
                "all channels must supply the same number of samples".to_string(),
            ));
        }
        Ok(samples)
    }

    #[cfg(test)]
    pub(crate) fn window_size_for_test(&self) -> usize {
        self.window_size
    }

    #[cfg(test)]
    pub(crate) fn increment_for_test(&self) -> usize {
        self.increment
    }

    #[cfg(test)]
    pub(crate) fn outbuf_size_for_test(&self) -> usize {
        self.outbuf_size
    }

    #[cfg(test)]
    pub(crate) fn df_lens_for_test(&self) -> (usize, usize) {
        (self.phase_reset_df.len(), self.stretch_df.len())
    }

    #[cfg(test)]
    pub(crate) fn input_duration_for_test(&self) -> usize {
        self.input_duration
    }

    #[cfg(test)]
    pub(crate) fn window_cached_for_test(&self, size: usize) -> bool {
        self.windows.contains(size)
    }
}

impl Drop for Stretcher {
    fn drop(&mut self) {
        self.join_workers();
    }
}

impl std::fmt::Debug for Stretcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stretcher")
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channel_count)
            .field("time_ratio", &self.time_ratio)
            .field("pitch_scale", &self.pitch_scale)
            .field("window_size", &self.window_size)
            .field("increment", &self.increment)
            .field("realtime", &self.realtime)
            .field("threaded", &self.threaded)
            .field("mode", &self.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_up_pow2_properties() {
        for v in 1..=4097usize {
            let r = round_up_pow2(v);
            assert!(r.is_power_of_two());
            assert!(r >= v);
            if v > 1 {
                assert!(r / 2 < v, "round_up_pow2({}) = {}", v, r);
            }
            // Idempotent on powers of two.
            assert_eq!(round_up_pow2(r), r);
        }
    }

    #[test]
    fn sizing_invariants_across_ratio_grid() {
        for &realtime in &[false, true] {
            for &time_ratio in &[0.1, 0.5, 0.9, 1.0, 1.5, 2.0, 5.0, 8.0] {
                for &pitch_scale in &[0.5, 1.0, 2.0] {
                    let opts = if realtime {
                        Options::PROCESS_REAL_TIME
                    } else {
                        Options::NONE
                    };
                    let s = Stretcher::new(48000, 1, opts, time_ratio, pitch_scale).unwrap();
                    let ws = s.window_size_for_test();
                    assert!(ws.is_power_of_two(), "window {} not a power of two", ws);
                    assert!(s.increment_for_test() >= 1);

                    let floor = (s.max_process_size as f64 / pitch_scale)
                        .max(ws as f64 * 2.0 * time_ratio.max(1.0))
                        .ceil() as usize;
                    assert!(
                        s.outbuf_size_for_test() >= floor,
                        "outbuf {} below floor {} at ratio {}x{}",
                        s.outbuf_size_for_test(),
                        floor,
                        time_ratio,
                        pitch_scale
                    );
                }
            }
        }
    }

    #[test]
    fn realtime_outbuf_carries_headroom() {
        let s = Stretcher::new(48000, 1, Options::PROCESS_REAL_TIME, 1.0, 1.0).unwrap();
        let ws = s.window_size_for_test();
        assert!(s.outbuf_size_for_test() >= ws * 2 * OUTBUF_HEADROOM);
    }

    #[test]
    fn construction_validates_parameters() {
        assert!(Stretcher::new(0, 1, Options::NONE, 1.0, 1.0).is_err());
        assert!(Stretcher::new(48000, 0, Options::NONE, 1.0, 1.0).is_err());
        assert!(Stretcher::new(48000, 1, Options::NONE, 0.0, 1.0).is_err());
        assert!(Stretcher::new(48000, 1, Options::NONE, 1.0, -2.0).is_err());
        assert!(Stretcher::new(48000, 1, Options::NONE, f64::NAN, 1.0).is_err());
    }

    #[test]
    fn window_option_conflict_drops_both() {
        let s = Stretcher::new(
            48000,
            1,
            Options::WINDOW_SHORT | Options::WINDOW_LONG,
            1.0,
            1.0,
        )
        .unwrap();
        let standard = Stretcher::new(48000, 1, Options::NONE, 1.0, 1.0).unwrap();
        assert_eq!(s.base_window_size, standard.base_window_size);
    }

    #[test]
    fn window_short_halves_and_long_doubles() {
        let standard = Stretcher::new(48000, 1, Options::NONE, 1.0, 1.0).unwrap();
        let short = Stretcher::new(48000, 1, Options::WINDOW_SHORT, 1.0, 1.0).unwrap();
        let long = Stretcher::new(48000, 1, Options::WINDOW_LONG, 1.0, 1.0).unwrap();
        assert_eq!(short.base_window_size * 2, standard.base_window_size);
        assert_eq!(long.base_window_size, standard.base_window_size * 2);
    }

    #[test]
    fn realtime_forces_stretch_precise() {
        let s = Stretcher::new(48000, 1, Options::PROCESS_REAL_TIME, 1.0, 1.0).unwrap();
        assert!(s.options().contains(Options::STRETCH_PRECISE));
    }

    #[test]
    fn realtime_prepopulates_window_cache() {
        let s = Stretcher::new(48000, 1, Options::PROCESS_REAL_TIME, 1.0, 1.0).unwrap();
        let base = s.base_window_size;
        assert!(s.window_cached_for_test(base));
        assert!(s.window_cached_for_test(base * 2));
        assert!(s.window_cached_for_test(base * 4));
    }

    #[test]
    fn latency_zero_offline_and_formula_realtime() {
        let offline = Stretcher::new(48000, 1, Options::NONE, 1.5, 1.0).unwrap();
        assert_eq!(offline.latency(), 0);

        let rt = Stretcher::new(48000, 1, Options::PROCESS_REAL_TIME, 1.0, 2.0).unwrap();
        let expected = ((rt.window_size_for_test() / 2) as f64 / 2.0) as usize + 1;
        assert_eq!(rt.latency(), expected);
    }

    #[test]
    fn effective_ratio_is_product_and_time_ratio_is_callers() {
        let s = Stretcher::new(48000, 1, Options::NONE, 1.5, 2.0).unwrap();
        assert_eq!(s.effective_ratio(), 3.0);
        assert_eq!(s.time_ratio(), 1.5);
        assert_eq!(s.pitch_scale(), 2.0);
    }

    #[test]
    fn ratio_changes_rejected_while_studying_offline() {
        let mut s = Stretcher::new(48000, 1, Options::NONE, 1.0, 1.0).unwrap();
        let input = vec![0.0f32; 8192];
        s.study(&[&input], false).unwrap();
        s.set_time_ratio(2.0);
        assert_eq!(s.time_ratio(), 1.0);
        s.set_pitch_scale(2.0);
        assert_eq!(s.pitch_scale(), 1.0);
    }

    #[test]
    fn ratio_change_in_just_created_is_accepted() {
        let mut s = Stretcher::new(48000, 1, Options::NONE, 1.0, 1.0).unwrap();
        s.set_time_ratio(2.0);
        assert_eq!(s.time_ratio(), 2.0);
    }

    #[test]
    fn set_same_ratio_keeps_sizes_untouched() {
        let mut s = Stretcher::new(48000, 1, Options::NONE, 1.5, 1.0).unwrap();
        let ws = s.window_size_for_test();
        let inc = s.increment_for_test();
        s.set_time_ratio(s.time_ratio());
        assert_eq!(s.window_size_for_test(), ws);
        assert_eq!(s.increment_for_test(), inc);
    }

    #[test]
    fn study_after_process_is_rejected() {
        let mut s = Stretcher::new(48000, 1, Options::NONE, 1.0, 1.0).unwrap();
        let input = vec![0.0f32; 4096];
        s.process(&[&input], false).unwrap();
        assert!(matches!(
            s.study(&[&input], false),
            Err(StretchError::UsageOrder { .. })
        ));
    }

    #[test]
    fn process_after_finished_is_rejected() {
        let mut s = Stretcher::new(48000, 1, Options::NONE, 1.0, 1.0).unwrap();
        assert_eq!(s.mode(), Mode::JustCreated);
        let input = vec![0.0f32; 4096];
        s.process(&[&input], true).unwrap();
        assert_eq!(s.mode(), Mode::Finished);
        assert!(matches!(
            s.process(&[&input], false),
            Err(StretchError::UsageOrder { .. })
        ));
    }

    #[test]
    fn mismatched_channel_count_is_rejected() {
        let mut s = Stretcher::new(48000, 2, Options::THREADING_NONE, 1.0, 1.0).unwrap();
        let input = vec![0.0f32; 256];
        assert!(s.process(&[&input], false).is_err());
    }

    #[test]
    fn study_counts_chunks_and_duration() {
        let mut s = Stretcher::new(48000, 1, Options::NONE, 2.0, 1.0).unwrap();
        let n = 48000usize;
        let input = vec![0.25f32; n];
        s.study(&[&input], true).unwrap();

        let increment = s.increment_for_test();
        let (pr_len, st_len) = s.df_lens_for_test();
        assert_eq!(pr_len, st_len);
        // One chunk per increment of input, plus the centring chunk; one
        // fewer when the trailing partial chunk fits the input exactly.
        let expected = n / increment + 1;
        assert!(
            pr_len == expected || pr_len + 1 == expected,
            "df length {} vs expected {} (increment {})",
            pr_len,
            expected,
            increment
        );
        assert_eq!(s.input_duration_for_test(), n);
    }

    #[test]
    fn samples_required_monotone_until_window_filled() {
        let mut s = Stretcher::new(48000, 1, Options::PROCESS_REAL_TIME, 1.0, 1.0).unwrap();
        let mut last = s.samples_required();
        assert!(last > 0);

        let block = vec![0.1f32; 256];
        for _ in 0..64 {
            s.process(&[&block], false).unwrap();
            let now = s.samples_required();
            assert!(
                now <= last || last == 0,
                "samples_required went up: {} -> {}",
                last,
                now
            );
            last = now;
            if now == 0 {
                break;
            }
        }
        assert_eq!(last, 0);
    }

    #[test]
    fn frequency_cutoff_defaults_and_roundtrip() {
        let mut s = Stretcher::new(48000, 1, Options::NONE, 1.0, 1.0).unwrap();
        assert_eq!(s.frequency_cutoff(0), 600.0);
        assert_eq!(s.frequency_cutoff(1), 1200.0);
        assert_eq!(s.frequency_cutoff(2), 12000.0);
        s.set_frequency_cutoff(1, 1500.0);
        assert_eq!(s.frequency_cutoff(1), 1500.0);
        assert_eq!(s.frequency_cutoff(9), 0.0);
    }

    #[test]
    fn transients_option_is_realtime_only() {
        let mut offline = Stretcher::new(48000, 1, Options::NONE, 1.0, 1.0).unwrap();
        offline.set_transients_option(Options::TRANSIENTS_SMOOTH);
        assert!(!offline.options().contains(Options::TRANSIENTS_SMOOTH));

        let mut rt = Stretcher::new(48000, 1, Options::PROCESS_REAL_TIME, 1.0, 1.0).unwrap();
        rt.set_transients_option(Options::TRANSIENTS_SMOOTH);
        assert!(rt.options().contains(Options::TRANSIENTS_SMOOTH));
    }

    #[test]
    fn max_process_size_grows_monotonically() {
        let mut s = Stretcher::new(48000, 1, Options::NONE, 1.0, 1.0).unwrap();
        let initial = s.max_process_size;
        s.set_max_process_size(initial / 2);
        assert_eq!(s.max_process_size, initial);
        s.set_max_process_size(initial * 4);
        assert_eq!(s.max_process_size, initial * 4);
        assert!(s.outbuf_size_for_test() >= initial * 4);
    }

    #[test]
    fn reset_allows_a_second_identical_run() {
        let mut s = Stretcher::new(48000, 1, Options::NONE, 1.0, 1.0).unwrap();
        let input: Vec<f32> = (0..16384)
            .map(|i| (2.0 * std::f32::consts::PI * 220.0 * i as f32 / 48000.0).sin())
            .collect();

        let run = |s: &mut Stretcher| -> Vec<f32> {
            s.study(&[&input], true).unwrap();
            let mut collected = Vec::new();
            let mut buf = vec![0.0f32; 4096];
            let mut fed = 0usize;
            while fed < input.len() {
                let block = 2048.min(input.len() - fed);
                let is_final = fed + block == input.len();
                s.process(&[&input[fed..fed + block]], is_final).unwrap();
                fed += block;
                loop {
                    match s.available() {
                        Some(n) if n > 0 => {
                            let got = s.retrieve(&mut [&mut buf]);
                            collected.extend_from_slice(&buf[..got]);
                        }
                        _ => break,
                    }
                }
            }
            for _ in 0..1000 {
                if s.available().is_none() {
                    break;
                }
                let got = s.retrieve(&mut [&mut buf]);
                collected.extend_from_slice(&buf[..got]);
            }
            assert!(s.available().is_none(), "stream failed to drain");
            collected
        };

        let first = run(&mut s);
        s.reset();
        let second = run(&mut s);
        assert_eq!(first.len(), second.len());
        assert!(first
            .iter()
            .zip(second.iter())
            .all(|(a, b)| a.to_bits() == b.to_bits()));
    }
}
