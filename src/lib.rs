#![recursion_limit = "512"]

pub mod config;
pub mod dataset;
pub mod evaluation;
pub mod model;
pub mod patch;
pub mod schedule;

pub use config::{
    AugmentationConfig, DatasetConfig, LearningRateScheduleConfig, ModelOverrides,
    OptimizerConfig, TrainingConfig, TrainingHyperparameters, load_training_config,
};
pub use dataset::{CLASS_NAMES, CifarBatch, CifarBatcher, CifarDataset, CifarItem, CifarSplit};
pub use evaluation::evaluate_accuracy;
pub use model::{
    AttentionBlock, ModelConfigError, VisionTransformer, VisionTransformerConfig,
    classification_loss,
};
pub use patch::{PatchGrid, ShapeError, patchify, patchify_flat, unflatten, unpatchify};
pub use schedule::MultiStepLrScheduler;

/// File stem of the trained model record inside the checkpoint directory.
pub const MODEL_FILE_STEM: &str = "ViT";
