//! Wires the spectrum engine into the band aggregator the way a capture
//! session and the registry broadcast would, without touching hardware.

use crossbeam_channel::unbounded;
use loopband::audio::{BandAggregator, BandConfig, SpectrumEngine, SpectrumFrame, BAR_COUNT, FFT_SIZE};
use loopband::{DeviceRegistry, RegistrySettings};

fn sine_block(freq: f32, frames: usize) -> Vec<f32> {
    (0..frames)
        .flat_map(|i| {
            let v = (2.0 * std::f32::consts::PI * freq * i as f32 / 48_000.0).sin();
            [v, v]
        })
        .collect()
}

#[test]
fn engine_to_aggregator_end_to_end() {
    let mut engine = SpectrumEngine::new(false);
    assert!(engine.take_spectrum().is_none(), "no data yet");

    engine.push_block(&sine_block(440.0, FFT_SIZE), 2);
    let bars = engine.take_spectrum().expect("one full window arrived");
    assert_eq!(bars.len(), BAR_COUNT);
    assert!(bars.iter().all(|b| b.is_finite()));

    let (tx, rx) = unbounded();
    let config = BandConfig {
        band_amount: 16,
        ..BandConfig::default()
    };
    let mut aggregator = BandAggregator::new(config, rx).unwrap();

    tx.send(SpectrumFrame::new(true, bars)).unwrap();
    aggregator.update();

    // A pure tone lands somewhere; every band answers and none is negative.
    for i in 0..16 {
        assert!(aggregator.band(i).unwrap() >= 0.0);
    }
    assert!(aggregator.band(16).is_err());
}

#[test]
fn non_default_endpoint_never_drives_the_bands() {
    let mut engine = SpectrumEngine::new(false);
    engine.push_block(&sine_block(220.0, FFT_SIZE), 2);
    let bars = engine.take_spectrum().expect("full window");

    let (tx, rx) = unbounded();
    let mut aggregator = BandAggregator::new(BandConfig::default(), rx).unwrap();

    tx.send(SpectrumFrame::new(false, bars)).unwrap();
    aggregator.update();

    for i in 0..aggregator.band_amount() as usize {
        assert_eq!(aggregator.band(i).unwrap(), 0.0);
    }
}

#[test]
fn silence_decays_every_band_to_zero() {
    let (tx, rx) = unbounded();
    let config = BandConfig {
        band_amount: 8,
        ..BandConfig::default()
    };
    let mut aggregator = BandAggregator::new(config, rx).unwrap();

    tx.send(SpectrumFrame::new(true, vec![0.5; BAR_COUNT])).unwrap();
    aggregator.update();
    assert!(aggregator.band(0).unwrap() > 0.0);

    tx.send(SpectrumFrame::new(true, vec![0.0; BAR_COUNT])).unwrap();
    for _ in 0..2_000 {
        aggregator.update();
    }
    for i in 0..8 {
        assert_eq!(aggregator.band(i).unwrap(), 0.0);
    }
}

#[test]
#[ignore = "requires a live audio endpoint"]
fn live_registry_smoke() {
    let mut registry = DeviceRegistry::start(RegistrySettings::default()).unwrap();
    let frames = registry.subscribe();

    // Give the watcher a few poll cycles to bind whatever endpoints exist.
    std::thread::sleep(std::time::Duration::from_millis(512));
    let endpoints = registry.endpoints();
    println!("tracking {} endpoint(s)", endpoints.len());

    drop(frames);
    registry.stop();
    registry.stop(); // idempotent
}
