use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, Stream};
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::devices::Subscribers;
use super::{SpectrumEngine, SpectrumFrame};

/// One loopback capture bound to a single render endpoint.
///
/// The session owns the capture stream and a private [`SpectrumEngine`] that
/// lives inside the stream callback. Every spectrum the engine yields is
/// published as a [`SpectrumFrame`] tagged with the session's current
/// default-output flag. Lifecycle is Created → Listening → Stopped; a stopped
/// session is never restarted.
pub struct CaptureSession {
    endpoint_id: String,
    is_default: Arc<AtomicBool>,
    stream: Option<Stream>,
}

impl CaptureSession {
    /// Binds to `device` and starts capturing what it renders.
    ///
    /// Failure here is recoverable: the caller logs it and skips
    /// the endpoint. No partial session survives a failed bind.
    pub fn open(device: &cpal::Device, is_default: bool, subscribers: Subscribers) -> Result<Self> {
        let endpoint_id = device.name()?;

        // Loopback reads the render side, so the stream is opened with the
        // endpoint's output configuration.
        let config = device.default_output_config()?;
        if config.sample_format() != SampleFormat::F32 {
            return Err(anyhow!(
                "endpoint `{}` renders {:?}, loopback capture needs f32",
                endpoint_id,
                config.sample_format()
            ));
        }
        let channels = config.channels() as usize;

        let is_default = Arc::new(AtomicBool::new(is_default));
        let flag = Arc::clone(&is_default);
        let mut engine = SpectrumEngine::new(true);
        let stream_id = endpoint_id.clone();

        let stream = device.build_input_stream(
            &config.into(),
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                engine.push_block(data, channels);
                while let Some(bars) = engine.take_spectrum() {
                    subscribers.publish(SpectrumFrame::new(flag.load(Ordering::Relaxed), bars));
                }
            },
            move |err| warn!("loopback stream error on `{}`: {}", stream_id, err),
            None,
        )?;
        stream.play()?;

        debug!("capture session listening on `{}`", endpoint_id);

        Ok(Self {
            endpoint_id,
            is_default,
            stream: Some(stream),
        })
    }

    pub fn endpoint_id(&self) -> &str {
        &self.endpoint_id
    }

    pub fn is_default(&self) -> bool {
        self.is_default.load(Ordering::Relaxed)
    }

    /// Mirrors the registry's default-output designation into the flag the
    /// capture callback reads.
    pub fn set_default(&self, value: bool) {
        self.is_default.store(value, Ordering::Relaxed);
    }

    /// Halts the capture stream and detaches its callbacks.
    ///
    /// Idempotent: safe to call repeatedly, and on a session whose stream
    /// never fully started.
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            debug!("capture session on `{}` stopped", self.endpoint_id);
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stopped_session() -> CaptureSession {
        CaptureSession {
            endpoint_id: "Test Endpoint".into(),
            is_default: Arc::new(AtomicBool::new(false)),
            stream: None,
        }
    }

    #[test]
    fn stop_is_idempotent() {
        let mut session = stopped_session();
        session.stop();
        session.stop();
        assert!(session.stream.is_none());
    }

    #[test]
    fn default_flag_round_trips() {
        let session = stopped_session();
        assert!(!session.is_default());
        session.set_default(true);
        assert!(session.is_default());
        session.set_default(false);
        assert!(!session.is_default());
    }
}
