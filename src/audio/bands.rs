use crossbeam_channel::Receiver;
use log::warn;
use std::fmt;

use super::{SpectrumFrame, BAR_COUNT};

/// Inclusive bounds for the configurable band count.
pub const MIN_BAND_AMOUNT: u8 = 8;
pub const MAX_BAND_AMOUNT: u8 = 128;

/// Raw band values below this are treated as silence.
const NOISE_FLOOR: f32 = 0.01;

/// Per-tick decay a band restarts from after a peak.
const BASE_DECAY: f32 = 0.005;

/// Valid range for the decay growth factor.
const DECREASE_SPEED_RANGE: std::ops::RangeInclusive<f32> = 0.001..=5.0;

/// The four coarse perceptual ranges derived by fractional partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoarseBand {
    Bass = 0,
    Mid = 1,
    UpperMid = 2,
    Highs = 3,
}

/// Query and configuration errors surfaced to the visual layer.
#[derive(Debug, Clone, PartialEq)]
pub enum BandError {
    /// Indexed query past the current band count. Caller bug; never silently
    /// answered with a value.
    OutOfRange { index: usize, band_amount: u8 },
    /// Band count outside `[MIN_BAND_AMOUNT, MAX_BAND_AMOUNT]`.
    InvalidBandAmount(u8),
    /// Coarse-band fractions that are negative or sum past 1.0.
    InvalidSeparators { sum: f32 },
    /// Decay growth factor outside `DECREASE_SPEED_RANGE`.
    InvalidDecreaseSpeed(f32),
}

impl fmt::Display for BandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BandError::OutOfRange { index, band_amount } => {
                write!(f, "band index {} out of range (band amount is {})", index, band_amount)
            }
            BandError::InvalidBandAmount(value) => write!(
                f,
                "band amount {} outside [{}, {}]",
                value, MIN_BAND_AMOUNT, MAX_BAND_AMOUNT
            ),
            BandError::InvalidSeparators { sum } => {
                write!(f, "coarse-band separators must be non-negative and sum to at most 1.0 (sum is {})", sum)
            }
            BandError::InvalidDecreaseSpeed(value) => write!(
                f,
                "decrease speed {} outside [{}, {}]",
                value,
                DECREASE_SPEED_RANGE.start(),
                DECREASE_SPEED_RANGE.end()
            ),
        }
    }
}

impl std::error::Error for BandError {}

/// Aggregator configuration, typically sourced from the settings store.
#[derive(Debug, Clone)]
pub struct BandConfig {
    pub band_amount: u8,
    /// Growth factor applied to a band's decay rate every tick it keeps
    /// falling.
    pub decrease_speed: f32,
    /// Fractions of the spectrum assigned to the bass, mid, and upper-mid
    /// coarse bands; the highs take the remainder.
    pub separators: [f32; 3],
    /// Answer indexed queries from the smoothed bands instead of the raw
    /// ones.
    pub use_buffered: bool,
}

impl Default for BandConfig {
    fn default() -> Self {
        Self {
            band_amount: 128,
            decrease_speed: 1.15,
            separators: [0.12, 0.26, 0.30],
            use_buffered: true,
        }
    }
}

/// Reduces published spectra into per-band and coarse-band amplitudes.
///
/// The sole consumer of the frame broadcast. [`BandAggregator::update`] runs
/// once per display frame on the caller's thread; everything else only reads.
/// Frames arrive through a channel, so a publish can never tear the sample
/// snapshot mid-update.
pub struct BandAggregator {
    frames: Receiver<SpectrumFrame>,
    samples: Vec<f32>,
    freq_bands: Vec<f32>,
    buffered_bands: Vec<f32>,
    band_decay: Vec<f32>,
    band_amount: u8,
    decrease_speed: f32,
    separators: [f32; 3],
    use_buffered: bool,
    coarse: [f32; 4],
    band_amount_listeners: Vec<Box<dyn FnMut(u8) + Send>>,
}

impl BandAggregator {
    pub fn new(config: BandConfig, frames: Receiver<SpectrumFrame>) -> Result<Self, BandError> {
        validate_band_amount(config.band_amount)?;
        validate_decrease_speed(config.decrease_speed)?;
        validate_separators(config.separators)?;

        let n = config.band_amount as usize;
        Ok(Self {
            frames,
            samples: vec![0.0; BAR_COUNT],
            freq_bands: vec![0.0; n],
            buffered_bands: vec![0.0; n],
            band_decay: vec![BASE_DECAY; n],
            band_amount: config.band_amount,
            decrease_speed: config.decrease_speed,
            separators: config.separators,
            use_buffered: config.use_buffered,
            coarse: [0.0; 4],
            band_amount_listeners: Vec::new(),
        })
    }

    /// One per-display-frame update: pull the latest default-output
    /// spectrum, regroup it into bands, advance the smoothing, and refresh
    /// the coarse bands. Order matters; each stage consumes the previous
    /// stage's output.
    pub fn update(&mut self) {
        self.drain_frames();

        if self.freq_bands.len() != self.band_amount as usize {
            // A band-amount change left the sequences behind; rebuild them
            // instead of faulting the frame loop.
            self.resize_band_arrays();
        }

        self.generate_bands();
        self.generate_buffer_bands();
        self.calculate_coarse_bands();
    }

    /// Value of one band. Smoothed or raw depending on `use_buffered`.
    pub fn band(&self, index: usize) -> Result<f32, BandError> {
        let values = if self.use_buffered {
            &self.buffered_bands
        } else {
            &self.freq_bands
        };
        values.get(index).copied().ok_or(BandError::OutOfRange {
            index,
            band_amount: self.band_amount,
        })
    }

    /// Value of one of the four coarse bands, refreshed on every update.
    pub fn coarse_band(&self, band: CoarseBand) -> f32 {
        self.coarse[band as usize]
    }

    pub fn band_amount(&self) -> u8 {
        self.band_amount
    }

    /// Changes the band count, resizing all three band sequences together
    /// and notifying registered listeners. An out-of-range value is rejected
    /// whole; the prior count stays in effect.
    pub fn set_band_amount(&mut self, band_amount: u8) -> Result<(), BandError> {
        validate_band_amount(band_amount)?;
        if band_amount == self.band_amount {
            return Ok(());
        }

        self.band_amount = band_amount;
        self.resize_band_arrays();
        for listener in &mut self.band_amount_listeners {
            listener(band_amount);
        }
        Ok(())
    }

    /// Registers a callback for band-count changes (the visual layer uses
    /// this to regenerate its bar layout).
    pub fn on_band_amount_changed(&mut self, listener: impl FnMut(u8) + Send + 'static) {
        self.band_amount_listeners.push(Box::new(listener));
    }

    pub fn use_buffered(&self) -> bool {
        self.use_buffered
    }

    pub fn set_use_buffered(&mut self, use_buffered: bool) {
        self.use_buffered = use_buffered;
    }

    pub fn set_decrease_speed(&mut self, decrease_speed: f32) -> Result<(), BandError> {
        validate_decrease_speed(decrease_speed)?;
        self.decrease_speed = decrease_speed;
        Ok(())
    }

    pub fn set_separators(&mut self, separators: [f32; 3]) -> Result<(), BandError> {
        validate_separators(separators)?;
        self.separators = separators;
        Ok(())
    }

    /// Keeps the payload of the most recent default-output frame; everything
    /// else queued since the last tick is discarded.
    fn drain_frames(&mut self) {
        let mut latest = None;
        while let Ok(frame) = self.frames.try_recv() {
            if frame.from_default_output {
                latest = Some(frame);
            }
        }

        if let Some(frame) = latest {
            if frame.bars.len() == BAR_COUNT {
                self.samples.copy_from_slice(&frame.bars);
            } else {
                warn!("discarding malformed spectrum frame ({} bars)", frame.bars.len());
                self.samples.fill(0.0);
            }
        }
    }

    /// Groups the 512 samples into `band_amount` back-to-back slices whose
    /// widths triple every quarter of the band range, and takes each slice's
    /// mean. Values under the noise floor are zeroed.
    fn generate_bands(&mut self) {
        let mut cursor = 0usize;
        for i in 0..self.band_amount as usize {
            let end = (cursor + slice_width(i, self.band_amount)).min(BAR_COUNT);
            let slice = &self.samples[cursor.min(end)..end];
            let average = if slice.is_empty() {
                0.0
            } else {
                slice.iter().sum::<f32>() / slice.len() as f32
            };
            self.freq_bands[i] = if average < NOISE_FLOOR { 0.0 } else { average };
            cursor = end;
        }
    }

    /// Peak-hold with accelerating decay: a band snaps up to any raw value
    /// at or above its buffered one, otherwise it falls by its decay rate,
    /// which itself grows every falling tick.
    fn generate_buffer_bands(&mut self) {
        for i in 0..self.band_amount as usize {
            if self.freq_bands[i] >= self.buffered_bands[i] {
                self.buffered_bands[i] = self.freq_bands[i];
                self.band_decay[i] = BASE_DECAY;
            } else {
                self.buffered_bands[i] -= self.band_decay[i];
                self.band_decay[i] *= self.decrease_speed;
            }
            self.buffered_bands[i] = self.buffered_bands[i].clamp(0.0, 100.0);
        }
    }

    /// Means over four contiguous partitions of the raw samples, sized by
    /// the configured fractions; the highs take whatever remains.
    fn calculate_coarse_bands(&mut self) {
        let [x, y, z] = self.separators;
        let total = BAR_COUNT as f32;
        let first = ((total * x).round() as usize).min(BAR_COUNT);
        let second = (first + (total * y).round() as usize).min(BAR_COUNT);
        let third = (second + (total * z).round() as usize).min(BAR_COUNT);

        let bounds = [0, first, second, third, BAR_COUNT];
        for (slot, pair) in bounds.windows(2).enumerate() {
            let slice = &self.samples[pair[0]..pair[1]];
            self.coarse[slot] = if slice.is_empty() {
                0.0
            } else {
                slice.iter().sum::<f32>() / slice.len() as f32
            };
        }
    }

    fn resize_band_arrays(&mut self) {
        let n = self.band_amount as usize;
        self.freq_bands = vec![0.0; n];
        self.buffered_bands = vec![0.0; n];
        self.band_decay = vec![BASE_DECAY; n];
    }
}

/// Width in samples of band `i`'s slice: `3 ^ floor(i / (band_amount / 4))`,
/// clamped to `[1, band_amount]`.
fn slice_width(index: usize, band_amount: u8) -> usize {
    let quarter = band_amount as f32 / 4.0;
    let width = 3f32.powf((index as f32 / quarter).floor());
    width.clamp(1.0, band_amount as f32).round() as usize
}

fn validate_band_amount(value: u8) -> Result<(), BandError> {
    if (MIN_BAND_AMOUNT..=MAX_BAND_AMOUNT).contains(&value) {
        Ok(())
    } else {
        Err(BandError::InvalidBandAmount(value))
    }
}

fn validate_decrease_speed(value: f32) -> Result<(), BandError> {
    if DECREASE_SPEED_RANGE.contains(&value) {
        Ok(())
    } else {
        Err(BandError::InvalidDecreaseSpeed(value))
    }
}

fn validate_separators([x, y, z]: [f32; 3]) -> Result<(), BandError> {
    let sum = x + y + z;
    if x >= 0.0 && y >= 0.0 && z >= 0.0 && sum <= 1.0 {
        Ok(())
    } else {
        Err(BandError::InvalidSeparators { sum })
    }
}
