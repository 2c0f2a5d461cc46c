mod block;
mod config;
mod loss;
mod vit;

pub use block::AttentionBlock;
pub use config::{ModelConfigError, VisionTransformerConfig};
pub use loss::classification_loss;
pub use vit::VisionTransformer;
