use anyhow::Result;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::audio::{BandConfig, RegistrySettings};

/// On-disk settings read once at startup.
///
/// Every field is optional; absent keys fall back to built-in defaults, and
/// an unreadable file degrades to defaults rather than aborting. Nothing is
/// ever written back; persistence belongs to the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Display-name fragment of the endpoint to treat as the default output.
    pub default_output: Option<String>,
    /// Initial band count, within [8, 128].
    pub band_amount: Option<u8>,
    /// Decay growth factor for the smoothed bands.
    pub decrease_speed: Option<f32>,
    /// Answer band queries from the smoothed values.
    pub use_buffered: Option<bool>,
    /// Coarse-band fractions (bass, mid, upper-mid); highs take the rest.
    pub separators: Option<[f32; 3]>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Reads `path` when given and present; anything else yields defaults.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load(path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("ignoring settings file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn band_config(&self) -> BandConfig {
        let defaults = BandConfig::default();
        BandConfig {
            band_amount: self.band_amount.unwrap_or(defaults.band_amount),
            decrease_speed: self.decrease_speed.unwrap_or(defaults.decrease_speed),
            separators: self.separators.unwrap_or(defaults.separators),
            use_buffered: self.use_buffered.unwrap_or(defaults.use_buffered),
        }
    }

    pub fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            default_output_override: self.default_output.clone(),
        }
    }
}
