use thiserror::Error;

/// Shape violations raised while splitting images into patches or reassembling them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeError {
    #[error("expected an image batch with {expected} axes (batch, channel, height, width), got {actual}")]
    Rank { expected: usize, actual: usize },
    #[error("patch size must be positive")]
    ZeroPatchSize,
    #[error("{axis} {extent} is not divisible by patch size {patch_size}")]
    NotDivisible {
        axis: &'static str,
        extent: usize,
        patch_size: usize,
    },
    #[error("expected {expected} patches, got {actual}")]
    PatchCount { expected: usize, actual: usize },
    #[error("expected patch features of length {expected}, got {actual}")]
    FeatureLength { expected: usize, actual: usize },
    #[error("expected patches of {expected:?} (channel, height, width), got {actual:?}")]
    PatchDims {
        expected: [usize; 3],
        actual: [usize; 3],
    },
}
