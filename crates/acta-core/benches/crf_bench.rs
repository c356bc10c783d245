use acta_core::{Crf, Reduction};
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use criterion::{Criterion, black_box, criterion_group, criterion_main};

const BATCH: usize = 8;
const SEQ_LEN: usize = 128;
const NUM_LABELS: usize = 7;

fn bench_crf(c: &mut Criterion) {
    let dev = Device::Cpu;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
    let crf = Crf::new(NUM_LABELS, vb.pp("crf")).unwrap();

    let emissions = Tensor::randn(0f32, 1.0, (BATCH, SEQ_LEN, NUM_LABELS), &dev).unwrap();
    let tags: Vec<u32> = (0..BATCH * SEQ_LEN)
        .map(|i| (i % NUM_LABELS) as u32)
        .collect();
    let tags = Tensor::from_vec(tags, (BATCH, SEQ_LEN), &dev).unwrap();
    // Every other sequence padded to half length.
    let mask: Vec<u8> = (0..BATCH * SEQ_LEN)
        .map(|i| u8::from((i / SEQ_LEN) % 2 == 0 || i % SEQ_LEN < SEQ_LEN / 2))
        .collect();
    let mask = Tensor::from_vec(mask, (BATCH, SEQ_LEN), &dev).unwrap();

    c.bench_function("crf_nll_8x128", |b| {
        b.iter(|| {
            crf.neg_log_likelihood(
                black_box(&emissions),
                black_box(&tags),
                Some(&mask),
                Reduction::Sum,
            )
            .unwrap()
        });
    });

    c.bench_function("crf_decode_8x128", |b| {
        b.iter(|| crf.decode(black_box(&emissions), Some(&mask), 0).unwrap());
    });
}

criterion_group!(benches, bench_crf);
criterion_main!(benches);
