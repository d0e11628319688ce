use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::collections::VecDeque;
use std::sync::Arc;

use super::{BAR_COUNT, FFT_SIZE};

/// How many consecutive spectra the running average folds together.
const AVERAGE_WINDOWS: usize = 3;

/// Turns raw interleaved sample blocks into log-spaced magnitude spectra.
///
/// Blocks are downmixed to mono and accumulated until a full analysis window
/// is available, then Hann-windowed, transformed, and resampled into
/// [`BAR_COUNT`] bars. `take_spectrum` yields `None` until enough samples
/// have arrived; that is the normal "no data this tick" signal, not an error.
pub struct SpectrumEngine {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    bar_ranges: Vec<(usize, usize)>,
    pending: Vec<f32>,
    history: VecDeque<Vec<f32>>,
    use_average: bool,
    ready: VecDeque<Vec<f32>>,
}

impl SpectrumEngine {
    pub fn new(use_average: bool) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);

        Self {
            fft,
            window: Self::hann_window(FFT_SIZE),
            bar_ranges: Self::log_bar_ranges(FFT_SIZE / 2, BAR_COUNT),
            pending: Vec::with_capacity(FFT_SIZE * 2),
            history: VecDeque::with_capacity(AVERAGE_WINDOWS),
            use_average,
            ready: VecDeque::new(),
        }
    }

    /// Accumulates one delivered block of interleaved samples. Every full
    /// window queued up by this block produces one spectrum, in order.
    pub fn push_block(&mut self, interleaved: &[f32], channels: usize) {
        match channels {
            0 => return,
            1 => self.pending.extend_from_slice(interleaved),
            _ => self.pending.extend(
                interleaved
                    .chunks_exact(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32),
            ),
        }

        while self.pending.len() >= FFT_SIZE {
            self.process_window();
            self.pending.drain(..FFT_SIZE);
        }
    }

    /// Returns the oldest spectrum not yet consumed, or `None` when no full
    /// window has completed since the last call.
    pub fn take_spectrum(&mut self) -> Option<Vec<f32>> {
        self.ready.pop_front()
    }

    fn process_window(&mut self) {
        let mut buffer: Vec<Complex<f32>> = self.pending[..FFT_SIZE]
            .iter()
            .zip(&self.window)
            .map(|(&sample, &w)| Complex::new(sample * w, 0.0))
            .collect();

        self.fft.process(&mut buffer);

        let magnitudes: Vec<f32> = buffer[..FFT_SIZE / 2]
            .iter()
            .map(|c| c.norm() * 2.0 / FFT_SIZE as f32)
            .collect();

        // Peak per bar, like a line-spectrum display.
        let bars: Vec<f32> = self
            .bar_ranges
            .iter()
            .map(|&(start, end)| magnitudes[start..end].iter().fold(0.0f32, |a, &b| a.max(b)))
            .collect();

        self.history.push_back(bars);
        if self.history.len() > AVERAGE_WINDOWS {
            self.history.pop_front();
        }

        let spectrum = if self.use_average && self.history.len() > 1 {
            let mut averaged = vec![0.0f32; BAR_COUNT];
            for bars in &self.history {
                for (slot, &value) in averaged.iter_mut().zip(bars) {
                    *slot += value;
                }
            }
            let count = self.history.len() as f32;
            for slot in &mut averaged {
                *slot /= count;
            }
            averaged
        } else {
            self.history.back().cloned().unwrap_or_default()
        };

        self.ready.push_back(spectrum);
    }

    fn hann_window(size: usize) -> Vec<f32> {
        (0..size)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32;
                0.5 * (1.0 - phase.cos())
            })
            .collect()
    }

    /// Log-spaced `(start, end)` bin ranges, one per output bar. Every bar
    /// covers at least one bin, ranges never regress, and the DC bin is
    /// skipped.
    fn log_bar_ranges(bins: usize, bars: usize) -> Vec<(usize, usize)> {
        let mut ranges = Vec::with_capacity(bars);
        let mut prev = 1usize;

        for i in 0..bars {
            let edge = (bins as f32).powf((i + 1) as f32 / bars as f32).round() as usize;
            let end = edge.max(prev + 1).min(bins);
            ranges.push((prev, end));
            prev = end;
        }

        ranges
    }
}
