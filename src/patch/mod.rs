//! Patch tokenization for vision transformers.
//!
//! An image batch `(batch, channel, height, width)` is cut into non-overlapping
//! `patch_size x patch_size` blocks. Patches are indexed row-major over the patch
//! grid: index `0` is the top-left block and index `cols` is the first block of
//! the second row.

mod error;

use burn::tensor::Tensor;
use burn::tensor::backend::Backend;

pub use error::ShapeError;

const IMAGE_RANK: usize = 4;

/// Patch grid derived from an image shape and a patch size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PatchGrid {
    pub channels: usize,
    pub rows: usize,
    pub cols: usize,
    pub patch_size: usize,
}

impl PatchGrid {
    /// Validates `dims` as `(batch, channel, height, width)` and derives the grid.
    pub fn from_dims(dims: &[usize], patch_size: usize) -> Result<Self, ShapeError> {
        if dims.len() != IMAGE_RANK {
            return Err(ShapeError::Rank {
                expected: IMAGE_RANK,
                actual: dims.len(),
            });
        }
        Self::new(dims[1], dims[2], dims[3], patch_size)
    }

    pub fn new(
        channels: usize,
        height: usize,
        width: usize,
        patch_size: usize,
    ) -> Result<Self, ShapeError> {
        if patch_size == 0 {
            return Err(ShapeError::ZeroPatchSize);
        }
        for (axis, extent) in [("height", height), ("width", width)] {
            if extent % patch_size != 0 {
                return Err(ShapeError::NotDivisible {
                    axis,
                    extent,
                    patch_size,
                });
            }
        }

        Ok(Self {
            channels,
            rows: height / patch_size,
            cols: width / patch_size,
            patch_size,
        })
    }

    pub fn num_patches(&self) -> usize {
        self.rows * self.cols
    }

    /// Length of a patch once channel and pixel axes are merged.
    pub fn feature_len(&self) -> usize {
        self.channels * self.patch_size * self.patch_size
    }

    pub fn height(&self) -> usize {
        self.rows * self.patch_size
    }

    pub fn width(&self) -> usize {
        self.cols * self.patch_size
    }

    /// Patch index of the block at grid position `(row, col)`.
    pub fn index_of(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }
}

/// Splits `images` into a grid-form patch sequence `(batch, patches, channel, patch, patch)`.
pub fn patchify<B: Backend>(
    images: Tensor<B, 4>,
    patch_size: usize,
) -> Result<Tensor<B, 5>, ShapeError> {
    let grid = PatchGrid::from_dims(&images.dims(), patch_size)?;
    Ok(split_patches(images, &grid))
}

/// Splits `images` into a feature-form patch sequence `(batch, patches, channel * patch * patch)`.
pub fn patchify_flat<B: Backend>(
    images: Tensor<B, 4>,
    patch_size: usize,
) -> Result<Tensor<B, 3>, ShapeError> {
    let grid = PatchGrid::from_dims(&images.dims(), patch_size)?;
    let batch = images.dims()[0];
    Ok(split_patches(images, &grid).reshape([batch, grid.num_patches(), grid.feature_len()]))
}

fn split_patches<B: Backend>(images: Tensor<B, 4>, grid: &PatchGrid) -> Tensor<B, 5> {
    let batch = images.dims()[0];
    let p = grid.patch_size;

    images
        .reshape([batch, grid.channels, grid.rows, p, grid.cols, p])
        .permute([0, 2, 4, 1, 3, 5])
        .reshape([batch, grid.num_patches(), grid.channels, p, p])
}

/// Reassembles a grid-form patch sequence into `(batch, channel, height, width)` images.
pub fn unpatchify<B: Backend>(
    patches: Tensor<B, 5>,
    grid: &PatchGrid,
) -> Result<Tensor<B, 4>, ShapeError> {
    let [batch, count, channels, patch_h, patch_w] = patches.dims();
    if count != grid.num_patches() {
        return Err(ShapeError::PatchCount {
            expected: grid.num_patches(),
            actual: count,
        });
    }
    let expected = [grid.channels, grid.patch_size, grid.patch_size];
    let actual = [channels, patch_h, patch_w];
    if expected != actual {
        return Err(ShapeError::PatchDims { expected, actual });
    }

    let p = grid.patch_size;
    Ok(patches
        .reshape([batch, grid.rows, grid.cols, grid.channels, p, p])
        .permute([0, 3, 1, 4, 2, 5])
        .reshape([batch, grid.channels, grid.height(), grid.width()]))
}

/// Restores the grid form from a feature-form patch sequence.
pub fn unflatten<B: Backend>(
    features: Tensor<B, 3>,
    grid: &PatchGrid,
) -> Result<Tensor<B, 5>, ShapeError> {
    let [batch, count, feature] = features.dims();
    if count != grid.num_patches() {
        return Err(ShapeError::PatchCount {
            expected: grid.num_patches(),
            actual: count,
        });
    }
    if feature != grid.feature_len() {
        return Err(ShapeError::FeatureLength {
            expected: grid.feature_len(),
            actual: feature,
        });
    }

    Ok(features.reshape([
        batch,
        count,
        grid.channels,
        grid.patch_size,
        grid.patch_size,
    ]))
}
