use std::sync::Arc;

use burn::data::dataloader::DataLoader;
use burn::tensor::ElementConversion;
use burn::tensor::backend::Backend;

use crate::dataset::CifarBatch;
use crate::model::VisionTransformer;

/// Fraction of correctly classified images over one pass of `loader`.
pub fn evaluate_accuracy<B: Backend>(
    model: &VisionTransformer<B>,
    loader: &Arc<dyn DataLoader<B, CifarBatch<B>>>,
) -> f64 {
    let mut correct = 0usize;
    let mut total = 0usize;

    for batch in loader.iter() {
        let [batch_size] = batch.targets.dims();
        let predictions = model.forward(batch.images).argmax(1).flatten::<1>(0, 1);
        let hits = predictions
            .equal(batch.targets)
            .int()
            .sum()
            .into_scalar();
        correct += hits.elem::<i64>() as usize;
        total += batch_size;
    }

    if total == 0 {
        0.0
    } else {
        correct as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::data::dataloader::DataLoaderBuilder;
    use burn::data::dataloader::batcher::Batcher;
    use burn::data::dataset::InMemDataset;
    use burn_ndarray::NdArray;

    use crate::config::AugmentationConfig;
    use crate::dataset::{CifarBatcher, CifarItem, PIXELS_PER_IMAGE};
    use crate::model::VisionTransformerConfig;

    type TestBackend = NdArray<f32>;

    fn items_with_labels(labels: &[usize]) -> Vec<CifarItem> {
        labels
            .iter()
            .enumerate()
            .map(|(idx, &label)| CifarItem {
                pixels: (0..PIXELS_PER_IMAGE)
                    .map(|v| ((v * (idx + 3) + idx * 53) % 256) as u8)
                    .collect(),
                label,
            })
            .collect()
    }

    fn loader(items: Vec<CifarItem>) -> Arc<dyn DataLoader<TestBackend, CifarBatch<TestBackend>>> {
        DataLoaderBuilder::new(CifarBatcher::eval(&AugmentationConfig::default()))
            .batch_size(2)
            .build(InMemDataset::new(items))
    }

    #[test]
    fn accuracy_counts_items_across_partial_batches() {
        let device = Default::default();
        let config = VisionTransformerConfig {
            embed_dim: 16,
            hidden_dim: 32,
            num_heads: 2,
            num_layers: 1,
            dropout: 0.0,
            ..Default::default()
        };
        let model = VisionTransformer::<TestBackend>::new(&config, &device);
        let num_classes = config.num_classes;

        let unlabelled = items_with_labels(&[0; 5]);
        let batch: CifarBatch<TestBackend> = CifarBatcher::eval(&AugmentationConfig::default())
            .batch(unlabelled, &device);
        let predicted: Vec<usize> = model
            .forward(batch.images)
            .argmax(1)
            .into_data()
            .convert::<i64>()
            .into_vec::<i64>()
            .unwrap()
            .into_iter()
            .map(|class| class as usize)
            .collect();
        assert_eq!(predicted.len(), 5);

        let matching = evaluate_accuracy(&model, &loader(items_with_labels(&predicted)));
        assert_eq!(matching, 1.0);

        let shifted: Vec<usize> = predicted
            .iter()
            .map(|class| (class + 1) % num_classes)
            .collect();
        let missing = evaluate_accuracy(&model, &loader(items_with_labels(&shifted)));
        assert_eq!(missing, 0.0);

        let mut mixed = predicted.clone();
        mixed[4] = shifted[4];
        let partial = evaluate_accuracy(&model, &loader(items_with_labels(&mixed)));
        assert!((partial - 0.8).abs() < 1e-12, "accuracy {partial}");
    }
}
