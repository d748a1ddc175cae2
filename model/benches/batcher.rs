use burn::data::{dataloader::batcher::Batcher, dataset::vision::MnistItem};
use burn_ndarray::{NdArray, NdArrayDevice};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use digits_model::data::{IMAGE_COLS, IMAGE_ROWS, MnistBatcher};

fn items(count: usize) -> Vec<MnistItem> {
    (0..count)
        .map(|i| {
            let mut image = [[0.0; IMAGE_COLS]; IMAGE_ROWS];
            for (r, row) in image.iter_mut().enumerate() {
                for (c, px) in row.iter_mut().enumerate() {
                    *px = ((i + r * c) % 256) as f32;
                }
            }
            MnistItem {
                image,
                label: (i % 10) as u8,
            }
        })
        .collect()
}

fn bench_batcher(c: &mut Criterion) {
    let batcher = MnistBatcher::<NdArray<f32>>::new(NdArrayDevice::Cpu);
    for size in [32, 128] {
        let batch = items(size);
        c.bench_function(&format!("batch_{size}"), |b| {
            b.iter(|| batcher.batch(black_box(batch.clone())))
        });
    }
}

criterion_group!(benches, bench_batcher);
criterion_main!(benches);
