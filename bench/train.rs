use burn::LearningRate;
use burn::module::AutodiffModule;
use burn::optim::{AdamWConfig, GradientsParams, Optimizer};
use burn::tensor::backend::Backend as BackendTrait;
use burn::tensor::{Distribution, Int, Tensor, TensorData};
use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;
use burn_vit::{VisionTransformer, VisionTransformerConfig};
use criterion::{BatchSize, Criterion, criterion_group, criterion_main};

fn training_step_bench(c: &mut Criterion) {
    type Backend = Autodiff<NdArray<f32>>;
    <Backend as BackendTrait>::seed(24);
    let device = <Backend as BackendTrait>::Device::default();

    let config = VisionTransformerConfig::default();
    let base_model = VisionTransformer::<Backend>::new(&config, &device);
    let batch_size = 16;

    let images = Tensor::<Backend, 4>::random(
        [batch_size, config.num_channels, config.image_size, config.image_size],
        Distribution::Normal(0.0, 1.0),
        &device,
    );
    let labels: Vec<i64> = (0..batch_size)
        .map(|idx| (idx % config.num_classes) as i64)
        .collect();
    let targets =
        Tensor::<Backend, 1, Int>::from_data(TensorData::new(labels, [batch_size]), &device);

    let optimizer_config = AdamWConfig::new().with_weight_decay(0.01);
    let lr: LearningRate = 3e-4;

    c.bench_function("vit_single_train_step", |b| {
        b.iter_batched(
            || {
                let model = base_model.clone();
                let optimizer = optimizer_config
                    .clone()
                    .init::<Backend, VisionTransformer<Backend>>();
                (model, optimizer)
            },
            |(mut model, mut optimizer)| {
                let output = model.forward_classification(images.clone(), targets.clone());
                let grads = output.loss.backward();
                let grads = GradientsParams::from_grads(grads, &model);
                model = optimizer.step(lr, model, grads);
                model.valid()
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, training_step_bench);
criterion_main!(benches);
