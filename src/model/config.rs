use thiserror::Error;

use crate::patch::{PatchGrid, ShapeError};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelConfigError {
    #[error("embedding dimension {embed_dim} is not divisible by {num_heads} heads")]
    HeadSplit { embed_dim: usize, num_heads: usize },
    #[error("dropout {0} is outside [0, 1)")]
    Dropout(f64),
    #[error("{0} must be positive")]
    Zero(&'static str),
    #[error(transparent)]
    Shape(#[from] ShapeError),
}

#[derive(Clone, Debug, PartialEq)]
pub struct VisionTransformerConfig {
    pub embed_dim: usize,
    pub hidden_dim: usize,
    pub num_heads: usize,
    pub num_layers: usize,
    pub patch_size: usize,
    pub num_channels: usize,
    pub image_size: usize,
    pub num_classes: usize,
    pub dropout: f64,
}

impl Default for VisionTransformerConfig {
    fn default() -> Self {
        Self {
            embed_dim: 256,
            hidden_dim: 512,
            num_heads: 8,
            num_layers: 6,
            patch_size: 4,
            num_channels: 3,
            image_size: 32,
            num_classes: 10,
            dropout: 0.2,
        }
    }
}

impl VisionTransformerConfig {
    pub fn validate(&self) -> Result<(), ModelConfigError> {
        for (name, value) in [
            ("embed_dim", self.embed_dim),
            ("hidden_dim", self.hidden_dim),
            ("num_heads", self.num_heads),
            ("num_channels", self.num_channels),
            ("num_classes", self.num_classes),
        ] {
            if value == 0 {
                return Err(ModelConfigError::Zero(name));
            }
        }
        if self.embed_dim % self.num_heads != 0 {
            return Err(ModelConfigError::HeadSplit {
                embed_dim: self.embed_dim,
                num_heads: self.num_heads,
            });
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ModelConfigError::Dropout(self.dropout));
        }
        self.patch_grid()?;
        Ok(())
    }

    /// Patch grid of a single `image_size x image_size` input.
    pub fn patch_grid(&self) -> Result<PatchGrid, ShapeError> {
        PatchGrid::new(
            self.num_channels,
            self.image_size,
            self.image_size,
            self.patch_size,
        )
    }

    pub(crate) fn num_patches(&self) -> usize {
        (self.image_size / self.patch_size.max(1)).pow(2)
    }

    pub(crate) fn patch_features(&self) -> usize {
        self.num_channels * self.patch_size * self.patch_size
    }
}
