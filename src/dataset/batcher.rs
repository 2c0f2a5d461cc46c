use std::sync::{Arc, Mutex, PoisonError};

use burn::data::dataloader::batcher::Batcher;
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::config::AugmentationConfig;

use super::augment::{Augmentation, Image};
use super::cifar::{CHANNELS, CifarItem, IMAGE_SIZE};

#[derive(Clone, Debug)]
pub struct CifarBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

#[derive(Clone, Debug)]
struct SeededAugmentation {
    augmentation: Augmentation,
    rng: Arc<Mutex<StdRng>>,
}

/// Converts items into normalized image tensors, augmenting them when configured.
///
/// Clones share one seeded generator, so a single-worker loader draws the same
/// augmentations for the same seed.
#[derive(Clone, Debug)]
pub struct CifarBatcher {
    augmentation: Option<SeededAugmentation>,
    mean: [f32; 3],
    std: [f32; 3],
}

impl CifarBatcher {
    pub fn train(config: &AugmentationConfig, seed: u64) -> Self {
        Self {
            augmentation: Some(SeededAugmentation {
                augmentation: Augmentation::from_config(config),
                rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
            }),
            mean: config.mean,
            std: config.std,
        }
    }

    pub fn eval(config: &AugmentationConfig) -> Self {
        Self {
            augmentation: None,
            mean: config.mean,
            std: config.std,
        }
    }

    fn prepare(&self, item: &CifarItem, rng: Option<&mut StdRng>) -> Vec<f32> {
        let mut image = Image::from_bytes(CHANNELS, IMAGE_SIZE, IMAGE_SIZE, &item.pixels);
        if let (Some(seeded), Some(rng)) = (&self.augmentation, rng) {
            image = seeded.augmentation.apply(image, rng);
        }
        image.normalize(&self.mean, &self.std);
        image.data
    }
}

impl<B: Backend> Batcher<B, CifarItem, CifarBatch<B>> for CifarBatcher {
    fn batch(&self, items: Vec<CifarItem>, device: &B::Device) -> CifarBatch<B> {
        let batch_size = items.len();
        let mut pixels = Vec::with_capacity(batch_size * CHANNELS * IMAGE_SIZE * IMAGE_SIZE);
        let mut labels = Vec::with_capacity(batch_size);

        // Held for the whole batch so draws stay in item order.
        let mut guard = self.augmentation.as_ref().map(|seeded| {
            seeded
                .rng
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
        });
        for item in &items {
            pixels.extend(self.prepare(item, guard.as_deref_mut()));
            labels.push(item.label as i64);
        }
        drop(guard);

        let images = Tensor::<B, 4>::from_data(
            TensorData::new(pixels, [batch_size, CHANNELS, IMAGE_SIZE, IMAGE_SIZE]),
            device,
        );
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(labels, [batch_size]), device);

        CifarBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    use crate::dataset::cifar::PIXELS_PER_IMAGE;

    #[test]
    fn eval_batch_is_normalized() {
        type Backend = NdArray<f32>;
        let device = Default::default();
        let config = AugmentationConfig {
            mean: [0.5; 3],
            std: [0.5; 3],
            ..Default::default()
        };
        let items = vec![
            CifarItem {
                pixels: vec![255; PIXELS_PER_IMAGE],
                label: 4,
            },
            CifarItem {
                pixels: vec![0; PIXELS_PER_IMAGE],
                label: 2,
            },
        ];

        let batch: CifarBatch<Backend> = CifarBatcher::eval(&config).batch(items, &device);
        assert_eq!(batch.images.dims(), [2, 3, 32, 32]);

        let values = batch
            .images
            .into_data()
            .convert::<f32>()
            .into_vec::<f32>()
            .unwrap();
        assert!(values[..PIXELS_PER_IMAGE].iter().all(|v| (v - 1.0).abs() < 1e-6));
        assert!(values[PIXELS_PER_IMAGE..].iter().all(|v| (v + 1.0).abs() < 1e-6));

        let labels = batch.targets.into_data().convert::<i64>().into_vec::<i64>().unwrap();
        assert_eq!(labels, vec![4, 2]);
    }

    #[test]
    fn train_batch_keeps_shape() {
        type Backend = NdArray<f32>;
        let device = Default::default();
        let items = vec![
            CifarItem {
                pixels: (0..PIXELS_PER_IMAGE).map(|v| (v % 256) as u8).collect(),
                label: 1,
            };
            3
        ];

        let batcher = CifarBatcher::train(&AugmentationConfig::default(), 42);
        let batch: CifarBatch<Backend> = batcher.batch(items, &device);
        assert_eq!(batch.images.dims(), [3, 3, 32, 32]);
        assert_eq!(batch.targets.dims(), [3]);
    }

    fn augmented_values(batcher: &CifarBatcher, rounds: usize) -> Vec<f32> {
        type Backend = NdArray<f32>;
        let device = Default::default();
        let items = vec![
            CifarItem {
                pixels: (0..PIXELS_PER_IMAGE).map(|v| (v * 7 % 256) as u8).collect(),
                label: 0,
            };
            2
        ];
        (0..rounds)
            .flat_map(|_| {
                let batch: CifarBatch<Backend> = batcher.batch(items.clone(), &device);
                batch
                    .images
                    .into_data()
                    .convert::<f32>()
                    .into_vec::<f32>()
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn train_augmentation_follows_seed() {
        let config = AugmentationConfig::default();
        let first = augmented_values(&CifarBatcher::train(&config, 7), 4);
        let second = augmented_values(&CifarBatcher::train(&config, 7), 4);
        assert_eq!(first, second);

        let other = augmented_values(&CifarBatcher::train(&config, 8), 4);
        assert_ne!(first, other);
    }
}
