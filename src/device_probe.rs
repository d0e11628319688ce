use anyhow::Result;
use cpal::traits::{DeviceTrait, HostTrait};

/// One-shot listing of the active render endpoints loopband can capture.
fn main() -> Result<()> {
    env_logger::init();

    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    for device in host.output_devices()? {
        let Ok(name) = device.name() else { continue };
        let marker = if Some(&name) == default_name.as_ref() {
            "  (default)"
        } else {
            ""
        };
        println!("{}{}", name, marker);
    }

    Ok(())
}
