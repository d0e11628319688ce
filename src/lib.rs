pub mod audio;
pub mod config;

pub use audio::{
    BandAggregator, BandConfig, BandError, CoarseBand, DeviceRegistry, EndpointInfo,
    RegistrySettings, SpectrumEngine, SpectrumFrame,
};
pub use config::Settings;
