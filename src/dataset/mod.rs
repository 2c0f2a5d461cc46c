pub mod augment;
mod batcher;
mod cifar;

pub use augment::{Augmentation, Image};
pub use batcher::{CifarBatch, CifarBatcher};
pub use cifar::{
    CHANNELS, CLASS_NAMES, CifarDataset, CifarItem, CifarSplit, IMAGE_SIZE, PIXELS_PER_IMAGE,
};
