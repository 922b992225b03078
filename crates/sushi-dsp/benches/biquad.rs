use criterion::{black_box, criterion_group, criterion_main, Criterion};

use sushi_core::AUDIO_CHUNK_SIZE;
use sushi_dsp::{calc_biquad_peak, BiquadFilter};

fn biquad_benchmark(c: &mut Criterion) {
    let mut filter = BiquadFilter::new();
    filter.set_smoothing(AUDIO_CHUNK_SIZE);
    filter.set_coefficients(calc_biquad_peak(48000.0, 1000.0, 1.0, 2.0));
    filter.reset();

    let input = [0.25_f32; AUDIO_CHUNK_SIZE];
    let mut output = [0.0_f32; AUDIO_CHUNK_SIZE];

    c.bench_function("biquad_process_chunk", |b| {
        b.iter(|| {
            filter.process(black_box(&input), &mut output);
            black_box(output[0])
        })
    });
}

criterion_group!(benches, biquad_benchmark);
criterion_main!(benches);
