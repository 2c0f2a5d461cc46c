use burn::module::{Module, Param};
use burn::nn::{Dropout, DropoutConfig, LayerNorm, LayerNormConfig, Linear, LinearConfig};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{Distribution, Int, Tensor};
use burn_train::{ClassificationOutput, TrainOutput, TrainStep, ValidStep};

use crate::dataset::CifarBatch;
use crate::patch::{ShapeError, patchify_flat};

use super::block::AttentionBlock;
use super::config::VisionTransformerConfig;
use super::loss::classification_loss;

#[derive(Module, Debug)]
pub struct VisionTransformer<B: Backend> {
    patch_size: usize,
    patch_features: usize,
    num_patches: usize,
    embed_dim: usize,
    input_layer: Linear<B>,
    blocks: Vec<AttentionBlock<B>>,
    head_norm: LayerNorm<B>,
    head: Linear<B>,
    dropout: Dropout,
    cls_token: Param<Tensor<B, 3>>,
    pos_embedding: Param<Tensor<B, 3>>,
}

impl<B: Backend> VisionTransformer<B> {
    pub fn new(config: &VisionTransformerConfig, device: &B::Device) -> Self {
        let num_patches = config.num_patches();
        let patch_features = config.patch_features();

        let blocks = (0..config.num_layers)
            .map(|_| {
                AttentionBlock::new(
                    config.embed_dim,
                    config.hidden_dim,
                    config.num_heads,
                    config.dropout,
                    device,
                )
            })
            .collect();

        let cls_token = Tensor::<B, 3>::random(
            [1, 1, config.embed_dim],
            Distribution::Normal(0.0, 1.0),
            device,
        );
        let pos_embedding = Tensor::<B, 3>::random(
            [1, 1 + num_patches, config.embed_dim],
            Distribution::Normal(0.0, 1.0),
            device,
        );

        Self {
            patch_size: config.patch_size,
            patch_features,
            num_patches,
            embed_dim: config.embed_dim,
            input_layer: LinearConfig::new(patch_features, config.embed_dim).init(device),
            blocks,
            head_norm: LayerNormConfig::new(config.embed_dim).init(device),
            head: LinearConfig::new(config.embed_dim, config.num_classes).init(device),
            dropout: DropoutConfig::new(config.dropout).init(),
            cls_token: Param::from_tensor(cls_token),
            pos_embedding: Param::from_tensor(pos_embedding),
        }
    }

    /// Class logits `(batch, classes)` for `(batch, channel, height, width)` images.
    ///
    /// Images may be smaller than the configured size as long as they tile into
    /// patches; the positional embedding is truncated to the patch count.
    pub fn try_forward(&self, images: Tensor<B, 4>) -> Result<Tensor<B, 2>, ShapeError> {
        let patches = patchify_flat(images, self.patch_size)?;
        let [batch, count, features] = patches.dims();
        if features != self.patch_features {
            return Err(ShapeError::FeatureLength {
                expected: self.patch_features,
                actual: features,
            });
        }
        if count > self.num_patches {
            return Err(ShapeError::PatchCount {
                expected: self.num_patches,
                actual: count,
            });
        }

        let tokens = self.input_layer.forward(patches);
        let cls = self.cls_token.val().repeat_dim(0, batch);
        let tokens = Tensor::cat(vec![cls, tokens], 1);
        let positions = self.pos_embedding.val().slice_dim(1, 0..count + 1);

        let mut x = self.dropout.forward(tokens + positions);
        for block in &self.blocks {
            x = block.forward(x);
        }

        let cls_out = x.slice_dim(1, 0..1).reshape([batch, self.embed_dim]);
        Ok(self.head.forward(self.head_norm.forward(cls_out)))
    }

    /// Panics on a shape mismatch; see [`Self::try_forward`].
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        match self.try_forward(images) {
            Ok(logits) => logits,
            Err(err) => panic!("vision transformer forward failed: {err}"),
        }
    }

    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let logits = self.forward(images);
        let loss = classification_loss(logits.clone(), targets.clone());
        ClassificationOutput::new(loss, logits, targets)
    }

    pub fn num_patches(&self) -> usize {
        self.num_patches
    }
}

impl<B: AutodiffBackend> TrainStep<CifarBatch<B>, ClassificationOutput<B>> for VisionTransformer<B> {
    fn step(&self, batch: CifarBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch.images, batch.targets);
        let grads = item.loss.backward();

        TrainOutput::new(self, grads, item)
    }
}

impl<B: Backend> ValidStep<CifarBatch<B>, ClassificationOutput<B>> for VisionTransformer<B> {
    fn step(&self, batch: CifarBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type Backend = NdArray<f32>;

    fn small_config() -> VisionTransformerConfig {
        VisionTransformerConfig {
            embed_dim: 32,
            hidden_dim: 64,
            num_heads: 4,
            num_layers: 2,
            patch_size: 4,
            num_channels: 3,
            image_size: 16,
            num_classes: 10,
            dropout: 0.0,
        }
    }

    #[test]
    fn forward_produces_class_logits() {
        let device = Default::default();
        let model = VisionTransformer::<Backend>::new(&small_config(), &device);
        let images = Tensor::<Backend, 4>::random([3, 3, 16, 16], Distribution::Default, &device);

        let logits = model.forward(images);
        assert_eq!(logits.dims(), [3, 10]);
        assert_eq!(model.num_patches(), 16);
    }

    #[test]
    fn smaller_images_use_truncated_positions() {
        let device = Default::default();
        let model = VisionTransformer::<Backend>::new(&small_config(), &device);
        let images = Tensor::<Backend, 4>::zeros([1, 3, 8, 8], &device);

        assert_eq!(model.try_forward(images).expect("forward").dims(), [1, 10]);
    }

    #[test]
    fn oversized_images_are_rejected() {
        let device = Default::default();
        let model = VisionTransformer::<Backend>::new(&small_config(), &device);
        let images = Tensor::<Backend, 4>::zeros([1, 3, 32, 32], &device);

        assert_eq!(
            model.try_forward(images).unwrap_err(),
            ShapeError::PatchCount {
                expected: 16,
                actual: 64
            }
        );
    }

    #[test]
    fn indivisible_images_are_rejected() {
        let device = Default::default();
        let model = VisionTransformer::<Backend>::new(&small_config(), &device);
        let images = Tensor::<Backend, 4>::zeros([1, 3, 15, 16], &device);

        assert!(matches!(
            model.try_forward(images),
            Err(ShapeError::NotDivisible { axis: "height", .. })
        ));
    }

    #[test]
    fn classification_output_carries_loss() {
        let device = Default::default();
        let model = VisionTransformer::<Backend>::new(&small_config(), &device);
        let images = Tensor::<Backend, 4>::random([2, 3, 16, 16], Distribution::Default, &device);
        let targets =
            Tensor::<Backend, 1, Int>::from_data(TensorData::new(vec![1i64, 7], [2]), &device);

        let output = model.forward_classification(images, targets);
        let loss = output.loss.into_scalar();
        assert!(loss.is_finite() && loss > 0.0);
    }
}
