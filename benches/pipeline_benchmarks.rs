use criterion::{criterion_group, criterion_main, Criterion};
use crossbeam_channel::unbounded;
use loopband::audio::{BandAggregator, BandConfig, SpectrumEngine, SpectrumFrame, BAR_COUNT, FFT_SIZE};

fn bench_band_update(c: &mut Criterion) {
    let (tx, rx) = unbounded();
    let mut aggregator = BandAggregator::new(BandConfig::default(), rx).unwrap();

    c.bench_function("band_update_128", |b| {
        b.iter(|| {
            tx.send(SpectrumFrame::new(true, vec![0.5; BAR_COUNT])).unwrap();
            aggregator.update();
        })
    });
}

fn bench_spectrum_window(c: &mut Criterion) {
    let mut engine = SpectrumEngine::new(true);
    let block: Vec<f32> = (0..FFT_SIZE * 2)
        .map(|i| ((i % 64) as f32 / 64.0) - 0.5)
        .collect();

    c.bench_function("spectrum_window_4096", |b| {
        b.iter(|| {
            engine.push_block(&block, 2);
            engine.take_spectrum()
        })
    });
}

criterion_group!(benches, bench_band_update, bench_spectrum_window);
criterion_main!(benches);
