pub mod bands;
pub mod capture;
pub mod devices;
pub mod spectrum;

pub use bands::{BandAggregator, BandConfig, BandError, CoarseBand};
pub use capture::CaptureSession;
pub use devices::{DeviceRegistry, EndpointInfo, RegistrySettings, Subscribers};
pub use spectrum::SpectrumEngine;

use std::sync::Arc;

/// Samples per FFT analysis window.
pub const FFT_SIZE: usize = 4096;

/// Magnitude bars in every published spectrum.
pub const BAR_COUNT: usize = 512;

/// One magnitude-per-bar snapshot produced by a capture session.
///
/// Frames are immutable once published; subscribers share the bar storage.
#[derive(Debug, Clone)]
pub struct SpectrumFrame {
    /// True when the producing session is bound to the default output.
    pub from_default_output: bool,
    pub bars: Arc<[f32]>,
}

impl SpectrumFrame {
    pub fn new(from_default_output: bool, bars: Vec<f32>) -> Self {
        Self {
            from_default_output,
            bars: bars.into(),
        }
    }
}
