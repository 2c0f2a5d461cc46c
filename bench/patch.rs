use burn::tensor::backend::Backend as BackendTrait;
use burn::tensor::{Distribution, Tensor};
use burn_ndarray::NdArray;
use burn_vit::{PatchGrid, patchify, patchify_flat, unpatchify};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

#[derive(Clone, Copy)]
struct PatchCase {
    name: &'static str,
    batch: usize,
    size: usize,
    patch: usize,
}

const PATCH_CASES: &[PatchCase] = &[
    PatchCase {
        name: "b128_32px_p4",
        batch: 128,
        size: 32,
        patch: 4,
    },
    PatchCase {
        name: "b32_224px_p16",
        batch: 32,
        size: 224,
        patch: 16,
    },
];

fn patch_bench(c: &mut Criterion) {
    type Backend = NdArray<f32>;
    <Backend as BackendTrait>::seed(42);
    let device = <Backend as BackendTrait>::Device::default();

    let mut group = c.benchmark_group("patchify");
    for case in PATCH_CASES {
        let images = Tensor::<Backend, 4>::random(
            [case.batch, 3, case.size, case.size],
            Distribution::Default,
            &device,
        );
        let grid = PatchGrid::from_dims(&images.dims(), case.patch).expect("valid case");

        group.bench_with_input(BenchmarkId::new("flat", case.name), case, |b, case| {
            b.iter(|| {
                patchify_flat(images.clone(), case.patch)
                    .expect("patchify")
                    .into_data()
            });
        });
        group.bench_with_input(BenchmarkId::new("round_trip", case.name), case, |b, case| {
            b.iter(|| {
                let patches = patchify(images.clone(), case.patch).expect("patchify");
                unpatchify(patches, &grid).expect("unpatchify").into_data()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, patch_bench);
criterion_main!(benches);
